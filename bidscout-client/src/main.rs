//! BidScout command-line client.
//!
//! ```text
//! bidscout --config client.toml q=cybersecurity dateRange=3months limit=25
//! ```
//!
//! Runs one search through the client stack and prints the outcome as JSON.

use bidscout_client::{ClientConfig, ClientResult, ClientServices, SearchInput};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ClientResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::load()?;
    let mut services = ClientServices::from_config(&config)?;

    let input = search_input_from_args();
    let result = services.orchestrator().search(&input).await;
    services.shutdown().await;

    let outcome = result?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

/// Collect `name=value` arguments, skipping `--config <path>`.
fn search_input_from_args() -> SearchInput {
    let mut pairs = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            args.next();
            continue;
        }
        if let Some((name, value)) = arg.split_once('=') {
            pairs.push((name.to_string(), value.to_string()));
        }
    }
    SearchInput::from_pairs(pairs)
}
