//! Scout CLI - Query a suggestion engine from the command line

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scout_engine::{EngineConfig, SuggestionEngine};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "scout",
    about = "Autocomplete suggestions from local, prefetched and remote sources",
    version
)]
struct Cli {
    /// Engine configuration file (defaults to $SCOUT_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print suggestions for each query, one JSON datum per line
    Suggest {
        /// Queries to look up
        #[arg(required = true)]
        queries: Vec<String>,

        /// Override the configured result limit
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Remove persisted prefetch data and cached responses
    ClearCache,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("scout=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config).await?;

    match cli.command {
        Command::Suggest { queries, limit } => {
            if limit.is_some() {
                config.limit = limit;
            }
            suggest(config, &queries).await?;
        }
        Command::ClearCache => clear_cache(config).await?,
    }

    Ok(())
}

async fn load_config(path: Option<PathBuf>) -> Result<EngineConfig> {
    let path = match path.or_else(|| std::env::var_os("SCOUT_CONFIG").map(PathBuf::from)) {
        Some(path) => path,
        None => anyhow::bail!("No configuration given; pass --config or set SCOUT_CONFIG"),
    };

    let mut config = EngineConfig::load(&path)
        .await
        .with_context(|| format!("Failed to load {}", path.display()))?;

    if let Some(dir) = std::env::var_os("SCOUT_CACHE_DIR") {
        config.cache_dir = Some(PathBuf::from(dir));
    }
    Ok(config)
}

async fn build(config: EngineConfig) -> Result<SuggestionEngine> {
    let engine = config.into_builder().await?.build()?;
    Ok(engine)
}

async fn suggest(config: EngineConfig, queries: &[String]) -> Result<()> {
    let engine = build(config).await?;
    if let Err(e) = engine.initialize(false).await {
        warn!("Continuing without prefetched data: {}", e);
    }

    for query in queries {
        let suggestions = engine.suggest(query).await.unwrap_or_default();
        info!("{} suggestions for '{}'", suggestions.len(), query);
        for datum in suggestions {
            println!("{}", serde_json::to_string(&datum)?);
        }
    }
    Ok(())
}

async fn clear_cache(config: EngineConfig) -> Result<()> {
    let engine = build(config).await?;
    engine.clear_prefetch_cache().await;
    engine.clear_remote_cache();
    println!("Cleared cached data");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_suggest() {
        let cli = Cli::try_parse_from([
            "scout", "--config", "scout.json", "suggest", "new", "yo", "-l", "3",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("scout.json")));
        match cli.command {
            Command::Suggest { queries, limit } => {
                assert_eq!(queries, vec!["new".to_string(), "yo".to_string()]);
                assert_eq!(limit, Some(3));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_clear_cache() {
        let cli = Cli::try_parse_from(["scout", "clear-cache", "-c", "other.json"]).unwrap();
        assert!(matches!(cli.command, Command::ClearCache));
        assert_eq!(cli.config, Some(PathBuf::from("other.json")));
    }

    #[test]
    fn test_suggest_requires_a_query() {
        assert!(Cli::try_parse_from(["scout", "suggest"]).is_err());
    }
}
