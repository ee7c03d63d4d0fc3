use anyhow::Context;
use clap::Parser;
use premine_redeemer::config::{Cli, RedeemConfig};
use premine_redeemer::peer::PeerGroup;
use premine_redeemer::serialization::hash_to_hex;
use premine_redeemer::{BroadcastCoordinator, Interpreter, RedeemError, Redeemer};
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

fn init_logging(debug: bool) {
    let default_level = if debug { Level::DEBUG } else { Level::ERROR };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level.to_string())),
        )
        .init();
}

async fn run(config: RedeemConfig) -> anyhow::Result<()> {
    let peers = PeerGroup::connect(&config.params, &config.peers, config.timeout)
        .await
        .context("connecting to peers")?;
    info!("{} of {} peers connected", peers.len(), config.peers.len());
    let relays = peers.relays();

    let redeemer = Redeemer::new(
        config.params.clone(),
        peers,
        Interpreter::default(),
        config.timeout,
    );
    let redemption = redeemer
        .generate_transaction(&config.request)
        .await
        .context("building the redemption")?;

    if config.json {
        let report = redemption.report(&config.params);
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", redemption.to_hex());
    }

    let coordinator = BroadcastCoordinator::new(relays, config.timeout);
    let outcome = coordinator
        .broadcast(&redemption.transaction, config.min_peers)
        .await
        .context("broadcasting the redemption")?;

    eprintln!(
        "Transaction {} accepted by {} peers",
        hash_to_hex(&redemption.txid()),
        outcome.acknowledgments.len()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = match RedeemConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(e.exit_code());
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{:#}", e);
            let code = e
                .downcast_ref::<RedeemError>()
                .map_or(1, RedeemError::exit_code);
            ExitCode::from(code)
        }
    }
}
