//! services/api/src/bin/openapi.rs
//!
//! Writes the OpenAPI document for the REST surface. The output path is the
//! first argument and defaults to `openapi.json`.

use studio_api_lib::web::rest::ApiDoc;
use utoipa::OpenApi;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "openapi.json".to_string());

    let document = ApiDoc::openapi().to_pretty_json()?;
    std::fs::write(&path, document)?;
    println!("OpenAPI specification for Artifact Studio written to {}", path);
    Ok(())
}
