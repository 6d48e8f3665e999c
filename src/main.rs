use clap::error::ErrorKind;
use clap::Parser;
use pswarm::{ConfigBundle, Swarm};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Tit-for-tat peer-to-peer file sharing over a static roster.
#[derive(Parser)]
#[command(name = "pswarm", version)]
struct Cli {
    /// This process's peer id; must appear in PeerInfo.cfg.
    peer_id: i32,

    /// Directory holding Common.cfg, PeerInfo.cfg, and the per-peer
    /// working directories.
    #[arg(long, default_value = ".")]
    root: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err)
            if matches!(
                err.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            ) =>
        {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let bundle = match ConfigBundle::load(cli.peer_id, &cli.root) {
        Ok(bundle) => bundle,
        Err(err) => {
            eprintln!("pswarm: {err}");
            return ExitCode::from(2);
        }
    };

    let swarm = match Swarm::new(bundle) {
        Ok(swarm) => swarm,
        Err(err) => {
            eprintln!("pswarm: {err}");
            return ExitCode::from(2);
        }
    };

    match swarm.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("pswarm: {err}");
            ExitCode::from(2)
        }
    }
}
