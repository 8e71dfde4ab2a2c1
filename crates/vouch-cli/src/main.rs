use std::path::PathBuf;

use alloy_primitives::Address;
use anyhow::Context;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::json;
use vouch_core::{
    NoChain, Page, RepositoryStore, VerificationCoordinator, VouchConfig,
};
use vouch_domain::MatchQuality;

#[derive(Parser)]
#[command(name = "vouch", version, about = "Verified smart-contract catalog")]
struct VouchCli {
    /// Repository root directory.
    #[arg(long, global = true, env = "VOUCH_REPOSITORY", default_value = "./repository")]
    repository: PathBuf,
    /// Emit machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,
    /// Increase log verbosity.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download every known compiler release into the local cache.
    Prewarm,
    /// Show the stored files for a verified contract.
    Lookup {
        chain_id: u64,
        address: String,
    },
    /// List verified addresses for a chain.
    List {
        chain_id: u64,
        /// full or partial
        #[arg(long, default_value = "full")]
        quality: String,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 200)]
        limit: usize,
        #[arg(long)]
        descending: bool,
    },
    /// Print the repository manifest.
    Manifest,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = VouchCli::parse();
    init_tracing(cli.verbose);

    let config = VouchConfig::new(&cli.repository).map_err(|err| eyre!("{err:?}"))?;
    tracing::debug!(repository = %config.repository_root().display(), "configured");
    match &cli.command {
        Command::Prewarm => prewarm(&cli, &config).await,
        Command::Lookup { chain_id, address } => lookup(&cli, &config, *chain_id, address),
        Command::List {
            chain_id,
            quality,
            offset,
            limit,
            descending,
        } => list(&cli, &config, *chain_id, quality, *offset, *limit, *descending),
        Command::Manifest => manifest(&cli, &config),
    }
    .map_err(|err| eyre!("{err:?}"))
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn prewarm(cli: &VouchCli, config: &VouchConfig) -> anyhow::Result<()> {
    let coordinator = VerificationCoordinator::new(config, NoChain)?;
    let summary = coordinator.prewarm_compilers().await;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "prewarm: {} requested, {} provisioned, {} failed",
            summary.requested, summary.provisioned, summary.failed
        );
        for error in &summary.errors {
            eprintln!("  {error}");
        }
    }
    Ok(())
}

fn lookup(
    cli: &VouchCli,
    config: &VouchConfig,
    chain_id: u64,
    address: &str,
) -> anyhow::Result<()> {
    let address: Address = address.parse().context("invalid contract address")?;
    let store = RepositoryStore::new(config)?;
    match store.fetch_any_files(chain_id, &address)? {
        Some((quality, files)) => {
            if cli.json {
                let listing: Vec<_> = files
                    .iter()
                    .map(|file| json!({ "name": file.name, "path": file.path }))
                    .collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "status": quality,
                        "files": listing,
                    }))?
                );
            } else {
                println!("{} ({} files)", quality.dir_name(), files.len());
                for file in &files {
                    println!("  {}", file.path.display());
                }
            }
        }
        None => {
            if cli.json {
                println!("{}", json!({ "status": null }));
            } else {
                println!("not verified");
            }
        }
    }
    Ok(())
}

fn list(
    cli: &VouchCli,
    config: &VouchConfig,
    chain_id: u64,
    quality: &str,
    offset: usize,
    limit: usize,
    descending: bool,
) -> anyhow::Result<()> {
    let quality = match quality {
        "full" => MatchQuality::Full,
        "partial" => MatchQuality::Partial,
        other => anyhow::bail!("unknown quality '{other}' (expected full or partial)"),
    };
    let store = RepositoryStore::new(config)?;
    let addresses = store.list_verified_addresses(
        chain_id,
        quality,
        Page {
            offset,
            limit,
            descending,
        },
    )?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&addresses)?);
    } else {
        for address in &addresses {
            println!("{address}");
        }
    }
    Ok(())
}

fn manifest(cli: &VouchCli, config: &VouchConfig) -> anyhow::Result<()> {
    let path = config.repository_root().join("manifest.json");
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("no manifest at {}", path.display()))?;
    if cli.json {
        println!("{}", raw.trim());
    } else {
        let tag: vouch_domain::RepositoryTag =
            serde_json::from_str(&raw).context("manifest is not parseable")?;
        println!(
            "repository {} last written at {}",
            tag.repository_version, tag.timestamp
        );
    }
    Ok(())
}
