use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use sociallink_common::load_config;
use sociallink_resolver::normalize::{coerce_url, handle_of};
use sociallink_resolver::SocialLinkResolver;

#[derive(Parser)]
#[command(name = "sociallink", about = "Resolve and verify a business's social profile")]
struct Cli {
    /// Path to config TOML file
    #[arg(
        long,
        global = true,
        env = "SOCIALLINK_CONFIG",
        default_value = "./config/sociallink.toml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Find the verified profile for a website
    Resolve {
        /// Site URL or bare domain
        #[arg(long)]
        site: String,
        /// Saved page markup to harvest candidates from
        #[arg(long)]
        html: Option<PathBuf>,
        /// Profile URL or handle already known for the site
        #[arg(long)]
        twitter: Option<String>,
        /// Save the verified profile's avatar here
        #[arg(long)]
        avatar_dir: Option<PathBuf>,
    },
    /// Fetch bio links, avatar and display name for a handle
    Profile {
        handle: String,
        #[arg(long)]
        avatar: bool,
    },
    /// Recent posts for one or more handles, newest first
    Tweets {
        #[arg(required = true)]
        handles: Vec<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        oldest_days: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sociallink=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let resolver = SocialLinkResolver::from_config(&config)?;

    match cli.command {
        Command::Resolve {
            site,
            html,
            twitter,
            avatar_dir,
        } => {
            let markup = match &html {
                Some(path) => Some(
                    tokio::fs::read_to_string(path)
                        .await
                        .with_context(|| format!("Failed to read HTML file: {}", path.display()))?,
                ),
                None => None,
            };
            let mut known = BTreeMap::new();
            if let Some(twitter) = twitter {
                known.insert("twitter".to_string(), twitter);
            }
            let page_url = coerce_url(&site);

            let resolution = resolver
                .resolve(&site, &known, markup.as_deref(), Some(&page_url))
                .await?;

            if let (Some(dir), true) = (&avatar_dir, resolution.is_confirmed()) {
                let handle = handle_of(&resolution.confirmed_url).unwrap_or_default();
                let saved = resolver
                    .download_avatar(
                        &resolution.avatar_url,
                        &resolution.confirmed_url,
                        dir,
                        &handle,
                    )
                    .await;
                info!(saved = ?saved, "Avatar step finished");
            }

            println!("{}", serde_json::to_string_pretty(&resolution.into_tuple())?);
        }
        Command::Profile { handle, avatar } => {
            let profile = resolver.profile(&handle, avatar).await?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
        Command::Tweets {
            handles,
            limit,
            oldest_days,
        } => {
            let tweets = resolver.tweets(&handles, limit, oldest_days).await;
            info!(count = tweets.len(), "Tweets fetched");
            println!("{}", serde_json::to_string_pretty(&tweets)?);
        }
    }

    Ok(())
}
