use anyhow::Result;
use log::info;
use schemars::{gen::SchemaSettings, JsonSchema};
use semilog::{debug::FactDump, EvalConfig};

#[allow(dead_code)]
#[derive(JsonSchema)]
struct SchemaContainer {
    config: EvalConfig,
    facts: FactDump,
}

fn main() -> Result<()> {
    env_logger::init();

    // Generate schemas using schemars
    let generator = SchemaSettings::draft2019_09().into_generator();
    let schema = generator.into_root_schema_for::<SchemaContainer>();
    info!("Generated schema with {} definitions", schema.definitions.len());

    let json_output = serde_json::to_string_pretty(&schema)?;
    println!("{}", json_output);

    Ok(())
}
