//! 🚀 repliq — the front door, the bouncer, the maitre d' of the replication job.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 This binary is the thin wrapper that loads the document, sets up logging, resolves
//! the job, tells you what it found, and lets everything go again. Like a manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use repliq::{ConfigResolver, StorageRegistry, render_table};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// 🎛️ Resolve a replication document: validate it, open every storage target, print the job.
#[derive(Debug, Parser)]
#[command(name = "repliq", version, about)]
struct Cli {
    /// 📋 Path to the document (.toml, .yaml or .yml).
    #[arg(default_value = "repliq.toml")]
    config: PathBuf,

    /// 🤖 Print the job summary as JSON instead of a table.
    #[arg(long)]
    json: bool,

    /// 🌱 Ignore the file and read the document from REPLIQ_* environment variables only.
    #[arg(long)]
    env_only: bool,
}

/// 🚀 main() — where it all begins. The "I pressed F5 and held my breath" moment.
///
/// 🔧 Steps:
/// 1. Init tracing (so we can see what goes wrong, and when)
/// 2. Parse args
/// 3. Load the document (the moment of truth)
/// 4. Resolve it (send it and pray 🙏)
/// 5. Handle errors (cry)
#[tokio::main]
async fn main() -> Result<()> {
    // 📡 Set up tracing — because println! debugging is a lifestyle choice
    // we're trying to move past, like flip phones and cargo shorts
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one tear-jerking layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("connection refused")
                || cause_str.contains("Connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
                || cause_str.contains("did not answer SELECT 1")
                || cause_str.contains("did not answer ping")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }

        // -- 📡 if it smells like a connection problem, it's probably a connection problem
        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: looks like a storage target isn't reachable. \
                Double-check that the backing service (Elasticsearch, Postgres, MongoDB, etc.) \
                is actually running. If you're using Docker, try: \
                `docker ps` to see what's up, or `docker compose up -d` to resurrect it. \
                Even servers need a nudge sometimes. ☕"
            );
        }

        // 🗑️ Exit with prejudice. Process exitus maximus.
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    // 🔒 Validate the file exists before we get too emotionally attached
    let config_file = if cli.env_only {
        None
    } else {
        let exists = cli.config.try_exists().with_context(|| {
            format!(
                "💀 Couldn't check whether '{}' exists. If it's a relative path, pwd/cwd may be \
                 playing tricks on you; an absolute path is absolutely certain.",
                cli.config.display()
            )
        })?;
        if !exists {
            warn!(
                "📋 '{}' not found, falling back to REPLIQ_* environment variables only",
                cli.config.display()
            );
        }
        exists.then_some(cli.config.as_path())
    };

    let document = repliq::app_config::load_config(config_file).context(
        "💀 We couldn't load the document. Take a look at it, make sure it's correct, \
         and that you didn't forget something obvious.",
    )?;

    // 🛑 Ctrl-C pulls the plug on every in-flight connection attempt
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 interrupted, cancelling resolution");
            on_interrupt.cancel();
        }
    });

    let resolver = ConfigResolver::new(StorageRegistry::default());
    let job = resolver
        .resolve(document, &cancel)
        .await
        .context("💀 The document could not be turned into a job")?;

    let summary = job.summary();
    if cli.json {
        let rendered = serde_json::to_string_pretty(&summary)
            .context("💀 The summary refused to become JSON. It has never refused before.")?;
        println!("{rendered}");
    } else {
        println!("{}", render_table(&summary));
    }

    job.close()
        .await
        .context("💀 The job resolved fine but didn't let go of its storage cleanly")?;
    info!("✅ done. every handle released. pop the champagne. 🍾");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_the_defaults_are_sensible() {
        let cli = Cli::try_parse_from(["repliq"]).expect("💀 no args should parse");
        assert_eq!(cli.config, PathBuf::from("repliq.toml"));
        assert!(!cli.json);
        assert!(!cli.env_only);

        let cli = Cli::try_parse_from(["repliq", "jobs/histam.yaml", "--json"]).expect("parse");
        assert_eq!(cli.config, PathBuf::from("jobs/histam.yaml"));
        assert!(cli.json);
    }
}
