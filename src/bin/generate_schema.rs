//! Generate JSON Schema for marker tree configuration
//!
//! This binary generates a JSON Schema from the TreeConfig struct using schemars,
//! for validating config files handed to `TreeConfig::load_from_file`.
//!
//! Usage:
//!   cargo run --features dev-bins --bin generate_schema > tree-config-schema.json

use anyhow::Context;
use markers::config::TreeConfig;
use schemars::schema_for;

fn main() -> anyhow::Result<()> {
    let schema = schema_for!(TreeConfig);
    let output = serde_json::to_string_pretty(&schema).context("Failed to serialize schema")?;
    println!("{}", output);
    Ok(())
}
