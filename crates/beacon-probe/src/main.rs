//! Beacon probe
//!
//! Connects to a Beacon gateway, runs the standard action suite and writes
//! every response into an output directory:
//!
//! ```text
//! beacon-probe [OUTPUT_DIR]
//! ```
//!
//! Connection settings come from `PROVIDER_*` environment variables or a
//! `.env` file in the working directory.

mod report;
mod settings;
mod suite;

use anyhow::Result;
use beacon_gateway::GatewayClient;
use report::Report;
use settings::ProbeSettings;
use suite::Suite;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let settings = ProbeSettings::load(std::env::args().nth(1))?;
    info!("Connecting to {} ...", settings.gateway.address());

    let report = Report::prepare(settings.output_dir()).await?;
    let mut client = GatewayClient::new(settings.gateway.clone());

    let outcome = match client.connect().await {
        Ok(()) => Suite::new(&client, &report, &settings).run().await,
        Err(e) => Err(e.into()),
    };
    client.close().await;

    match outcome {
        Ok(()) => {
            info!("Done. Files written to {}", report.dir().display());
            Ok(())
        }
        Err(e) => {
            error!("Test run failed: {:#}", e);
            Err(e)
        }
    }
}
