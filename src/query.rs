//! Pattern queries over an evaluated [`FactStore`].

use itertools::Itertools;

use crate::{
    ast::Atom,
    eval::FactStore,
    unify::{ConstOnlySubstitution, Substitution},
};

impl FactStore {
    /// Every stored fact that unifies with `pattern`.
    pub fn query(&self, pattern: &Atom) -> Vec<Atom> {
        self.query_under(pattern, &Substitution::new())
            .into_iter()
            .map(|(fact, _)| fact)
            .collect()
    }

    fn query_under(&self, pattern: &Atom, subst: &Substitution) -> Vec<(Atom, Substitution)> {
        self.indexer()
            .index_into(pattern, subst)
            .into_iter()
            .filter_map(|fact| {
                let next = subst.unify_atom(pattern, &fact)?;
                Some((fact, next))
            })
            .collect()
    }

    /// Answers a conjunction of atoms, left to right. Each answer binds every
    /// named variable of the conjunction.
    pub fn query_conjunctive(&self, atoms: &[Atom]) -> Vec<ConstOnlySubstitution> {
        let mut answers = vec![Substitution::new()];
        for atom in atoms {
            answers = answers
                .iter()
                .flat_map(|subst| self.query_under(atom, subst))
                .map(|(_, next)| next)
                .collect();
            if answers.is_empty() {
                break;
            }
        }
        answers
            .iter()
            .map(ConstOnlySubstitution::from)
            .unique()
            .collect()
    }
}
