use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod args;
mod output;

use args::Cli;
use output::ConnectionReport;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match mxconnect_lib::connect(cli.options()).await {
        Ok(connection) => {
            let report = ConnectionReport::from_connection(&connection);
            println!("{}", output::render(&report, &cli.format)?);
            // the probe is done; hand the socket back to the OS
            drop(connection);
            Ok(())
        }
        Err(err) => {
            eprintln!(
                "connection failed [{}/{}{}]: {}",
                err.category,
                err.code,
                if err.temporary { ", temporary" } else { "" },
                err.message
            );
            if let Some(response) = &err.response {
                eprintln!("  {response}");
            }
            std::process::exit(1);
        }
    }
}
