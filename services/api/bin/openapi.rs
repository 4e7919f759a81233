//! Writes the REST API's OpenAPI document to disk.
//!
//! Usage: `openapi [OUTPUT]`, defaulting to `openapi.json`.

use nova_api::router::ApiDoc;
use utoipa::OpenApi;

/// Generates the OpenAPI specification and writes it to a file.
fn write_api_doc(
    api_doc: utoipa::openapi::OpenApi,
    path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let doc_json = api_doc.to_pretty_json()?;
    std::fs::write(path, doc_json)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let output = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "openapi.json".to_string());
    write_api_doc(ApiDoc::openapi(), &output)?;
    println!("OpenAPI document written to {output}");
    Ok(())
}
