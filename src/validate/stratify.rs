//! Predicate dependency graph and stratification.
//!
//! Vertices are the IDB predicates, in the order they are first defined.
//! `P -> Q` means a rule defining `P` mentions `Q` in its body, positively or
//! under negation. Strongly connected components are found with the two-pass
//! (Kosaraju) depth-first search and become strata, emitted so that every
//! stratum comes after everything it depends on. A negative edge inside a
//! component is a cycle through negation and rejects the program.

use std::collections::{BTreeSet, HashMap};

use log::debug;

use super::ValidRule;
use crate::{
    ast::{PredicateSym, Premise, PremiseHandler},
    error::ValidationError,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Negative,
}

/// A group of predicates evaluated together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stratum {
    pub index: usize,
    pub predicates: BTreeSet<PredicateSym>,
    /// Whether some predicate of the stratum depends on the stratum itself.
    pub recursive: bool,
    pub has_negation: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stratification {
    pub strata: Vec<Stratum>,
    pub stratum_of: HashMap<PredicateSym, usize>,
}

impl Stratification {
    pub fn len(&self) -> usize {
        self.strata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strata.is_empty()
    }

    pub fn stratum_of(&self, pred: &PredicateSym) -> Option<usize> {
        self.stratum_of.get(pred).copied()
    }
}

#[derive(Debug, Default)]
pub struct DependencyGraph {
    vertices: Vec<PredicateSym>,
    index: HashMap<PredicateSym, usize>,
    /// `depends[p]` holds `(q, polarity)` for every body occurrence of `q`
    /// in a rule defining `p`.
    depends: Vec<Vec<(usize, Polarity)>>,
}

impl DependencyGraph {
    pub fn build(rules: &[ValidRule]) -> Self {
        let mut graph = Self::default();
        for rule in rules {
            graph.vertex(&rule.head().pred);
        }
        for rule in rules {
            let from = graph.index[&rule.head().pred];
            let mut edges = Vec::new();
            for premise in rule.body() {
                let mut handler = PremiseHandler::new(|_: &Premise| None)
                    .on_positive(|atom| Some((&atom.pred, Polarity::Positive)))
                    .on_annotated(|(atom, _)| Some((&atom.pred, Polarity::Positive)))
                    .on_negated(|atom| Some((&atom.pred, Polarity::Negative)));
                if let Some((pred, polarity)) = handler.apply(premise) {
                    // Predicates without rules are extensional and always available.
                    if let Some(&to) = graph.index.get(pred) {
                        edges.push((to, polarity));
                    }
                }
            }
            graph.depends[from].extend(edges);
        }
        graph
    }

    fn vertex(&mut self, pred: &PredicateSym) -> usize {
        if let Some(&i) = self.index.get(pred) {
            return i;
        }
        let i = self.vertices.len();
        self.vertices.push(pred.clone());
        self.index.insert(pred.clone(), i);
        self.depends.push(Vec::new());
        i
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// `feeds[q]` lists every `p` that depends on `q`.
    fn feeds(&self) -> Vec<Vec<usize>> {
        let mut feeds = vec![Vec::new(); self.len()];
        for (p, deps) in self.depends.iter().enumerate() {
            for &(q, _) in deps {
                feeds[q].push(p);
            }
        }
        feeds
    }

    /// Vertices in increasing DFS finishing time over `feeds`.
    fn finish_order(&self, feeds: &[Vec<usize>]) -> Vec<usize> {
        let mut visited = vec![false; self.len()];
        let mut finished = Vec::with_capacity(self.len());
        let mut stack: Vec<(usize, usize)> = Vec::new();

        for start in 0..self.len() {
            if visited[start] {
                continue;
            }
            visited[start] = true;
            stack.push((start, 0));
            while let Some(top) = stack.len().checked_sub(1) {
                let (v, next_edge) = stack[top];
                if next_edge < feeds[v].len() {
                    stack[top].1 += 1;
                    let w = feeds[v][next_edge];
                    if !visited[w] {
                        visited[w] = true;
                        stack.push((w, 0));
                    }
                } else {
                    stack.pop();
                    finished.push(v);
                }
            }
        }
        finished
    }

    /// Strongly connected components, dependencies before dependents.
    /// Returns the component of each vertex and the number of components.
    pub fn components(&self) -> (Vec<usize>, usize) {
        let feeds = self.feeds();
        let finished = self.finish_order(&feeds);

        let mut component: Vec<Option<usize>> = vec![None; self.len()];
        let mut count = 0;
        let mut stack = Vec::new();
        for &root in finished.iter().rev() {
            if component[root].is_some() {
                continue;
            }
            component[root] = Some(count);
            stack.push(root);
            while let Some(v) = stack.pop() {
                for &(w, _) in &self.depends[v] {
                    if component[w].is_none() {
                        component[w] = Some(count);
                        stack.push(w);
                    }
                }
            }
            count += 1;
        }
        (component.into_iter().flatten().collect(), count)
    }
}

/// Assigns every IDB predicate of `rules` to a stratum.
pub fn stratify(rules: &[ValidRule]) -> Result<Stratification, ValidationError> {
    let graph = DependencyGraph::build(rules);
    let (component, count) = graph.components();

    for (p, deps) in graph.depends.iter().enumerate() {
        for &(q, polarity) in deps {
            if polarity == Polarity::Negative && component[p] == component[q] {
                return Err(ValidationError::Unstratifiable {
                    predicate: graph.vertices[p].clone(),
                    negated: graph.vertices[q].clone(),
                });
            }
            debug_assert!(
                component[q] <= component[p],
                "stratum order violated by {} -> {}",
                graph.vertices[p],
                graph.vertices[q]
            );
        }
    }

    let mut strata: Vec<Stratum> = (0..count)
        .map(|index| Stratum {
            index,
            predicates: BTreeSet::new(),
            recursive: false,
            has_negation: false,
        })
        .collect();
    let mut stratum_of = HashMap::new();
    for (v, pred) in graph.vertices.iter().enumerate() {
        let stratum = &mut strata[component[v]];
        stratum.predicates.insert(pred.clone());
        for &(q, polarity) in &graph.depends[v] {
            stratum.recursive |= component[q] == component[v];
            stratum.has_negation |= polarity == Polarity::Negative;
        }
        stratum_of.insert(pred.clone(), component[v]);
    }

    debug!(
        "Stratified {} IDB predicates into {} strata",
        graph.len(),
        strata.len()
    );
    Ok(Stratification { strata, stratum_of })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ast::{Atom, Clause, Term},
        validate::validate_rule,
    };

    fn pos(name: &str, vars: &[&str]) -> Premise {
        Premise::Positive(Atom::from_parts(
            name,
            vars.iter().map(|v| Term::var(v)).collect::<Vec<_>>(),
        ))
    }

    fn neg(name: &str, vars: &[&str]) -> Premise {
        match pos(name, vars) {
            Premise::Positive(a) => Premise::Negated(a),
            _ => unreachable!(),
        }
    }

    fn rule(head: &str, vars: &[&str], body: Vec<Premise>) -> ValidRule {
        let head = Atom::from_parts(head, vars.iter().map(|v| Term::var(v)).collect::<Vec<_>>());
        validate_rule(&Clause::new(head, body)).unwrap()
    }

    #[test]
    fn negation_cycle_is_unstratifiable() {
        let rules = vec![
            rule("p", &[], vec![neg("q", &[])]),
            rule("q", &[], vec![neg("p", &[])]),
        ];
        assert!(matches!(
            stratify(&rules),
            Err(ValidationError::Unstratifiable { .. })
        ));
    }

    #[test]
    fn negative_self_loop_is_unstratifiable() {
        let rules = vec![rule("p", &["X"], vec![pos("r", &["X"]), neg("p", &["X"])])];
        assert!(stratify(&rules).is_err());
    }

    #[test]
    fn strata_respect_dependencies() {
        let rules = vec![
            rule(
                "not_tc",
                &["X", "Y"],
                vec![pos("node", &["X"]), pos("node", &["Y"]), neg("tc", &["X", "Y"])],
            ),
            rule("tc", &["X", "Y"], vec![pos("edge", &["X", "Y"])]),
            rule("tc", &["X", "Y"], vec![pos("tc", &["X", "Z"]), pos("tc", &["Z", "Y"])]),
            rule("node", &["X"], vec![pos("edge", &["X", "Y"])]),
        ];
        let s = stratify(&rules).unwrap();
        let of = |name: &str, arity| s.stratum_of(&PredicateSym::new(name, arity)).unwrap();
        assert!(of("tc", 2) < of("not_tc", 2));
        assert!(of("node", 1) < of("not_tc", 2));
        assert!(s.stratum_of(&PredicateSym::new("edge", 2)).is_none());
        let tc = &s.strata[of("tc", 2)];
        assert!(tc.recursive);
        assert!(!tc.has_negation);
        assert!(s.strata[of("not_tc", 2)].has_negation);
    }

    #[test]
    fn mutual_recursion_shares_a_stratum() {
        let rules = vec![
            rule("even", &["X"], vec![pos("zero", &["X"])]),
            rule("even", &["X"], vec![pos("succ", &["Y", "X"]), pos("odd", &["Y"])]),
            rule("odd", &["X"], vec![pos("succ", &["Y", "X"]), pos("even", &["Y"])]),
            rule("big", &["X"], vec![pos("odd", &["X"]), neg("even", &["X"])]),
        ];
        let s = stratify(&rules).unwrap();
        let even = s.stratum_of(&PredicateSym::new("even", 1)).unwrap();
        let odd = s.stratum_of(&PredicateSym::new("odd", 1)).unwrap();
        let big = s.stratum_of(&PredicateSym::new("big", 1)).unwrap();
        assert_eq!(even, odd);
        assert!(even < big);
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn chain_is_topologically_ordered() {
        // c depends on b depends on a, declared in reverse.
        let rules = vec![
            rule("c", &["X"], vec![pos("b", &["X"])]),
            rule("b", &["X"], vec![pos("a", &["X"])]),
            rule("a", &["X"], vec![pos("base", &["X"])]),
        ];
        let s = stratify(&rules).unwrap();
        let order: Vec<&str> = s
            .strata
            .iter()
            .map(|st| st.predicates.iter().next().unwrap().name())
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }
}
