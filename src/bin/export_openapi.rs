//! Export the gateway OpenAPI document
//!
//! Usage:
//!   export_openapi > openapi.json
//!   export_openapi --output docs/openapi.json

use anyhow::Context;
use exchange_orchestrator::gateway::openapi::ApiDoc;
use utoipa::OpenApi;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let output_path = if args.len() > 2 && args[1] == "--output" {
        Some(args[2].as_str())
    } else {
        None
    };

    let json = ApiDoc::openapi()
        .to_pretty_json()
        .context("serializing OpenAPI document")?;

    match output_path {
        Some(path) => {
            std::fs::write(path, &json).with_context(|| format!("writing {}", path))?;
            eprintln!("OpenAPI document exported to: {}", path);
        }
        None => println!("{}", json),
    }
    Ok(())
}
