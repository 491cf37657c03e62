mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use lessonkit_cache::{ResultCache, SqliteResultCache};
use lessonkit_gateway::{start_server, GatewayState};
use lessonkit_pipeline::Pipeline;
use lessonkit_prompts::{PromptRegistry, SchemaRegistry};
use lessonkit_providers::{
    build_client, DeepSeekEngine, EngineRegistry, GeminiEngine, IamTokenCache, OpenAiEngine,
    TransportSettings, YandexEngine,
};

use config::Config;

#[derive(Parser)]
#[command(name = "lessonkit")]
#[command(about = "lessonkit: homework LLM gateway")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Port to bind the HTTP server to
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Check a running gateway and print cache statistics
    Status,
    /// Delete cached parses and hints older than the given age
    PurgeCache {
        /// Age in days; 0 leaves the cache untouched
        #[arg(long, default_value_t = 90)]
        days: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    lessonkit_logging::init_logger(config.log_dir.as_deref(), &config.log_level);

    match cli.command {
        Commands::Serve { port } => {
            let config = Config {
                port: port.unwrap_or(config.port),
                ..config
            };
            run_server(config).await?;
        }
        Commands::Status => status(&config).await?,
        Commands::PurgeCache { days } => purge_cache(&config, days).await?,
    }

    Ok(())
}

fn build_engines(config: &Config) -> Result<EngineRegistry> {
    let (gemini_key, openai_key) = config.require_engine_keys()?;
    let client = build_client(&TransportSettings::default()).context("HTTP client")?;

    let mut registry = EngineRegistry::new()
        .with(Arc::new(GeminiEngine::new(client.clone(), gemini_key, &config.gemini_model)))
        .with(Arc::new(
            OpenAiEngine::new(client.clone(), openai_key, &config.openai_model)
                .with_endpoint(config.openai_endpoint),
        ));

    if let Some(key) = &config.deepseek_api_key {
        registry.register(Arc::new(DeepSeekEngine::new(client.clone(), key, &config.deepseek_model)));
    }

    if let Some(yandex) = &config.yandex {
        let tokens = IamTokenCache::new(client.clone(), &yandex.oauth_token);
        registry.register(Arc::new(YandexEngine::new(
            client,
            tokens,
            &yandex.folder_id,
            &config.yandex_model,
        )));
    }

    info!(
        engines = %registry.names().join(", "),
        openai_endpoint = %config.openai_endpoint,
        "Registered engines"
    );
    Ok(registry)
}

async fn run_server(config: Config) -> Result<()> {
    info!(
        port = config.port,
        bind = %config.bind_address,
        cache = %config.cache_db.display(),
        prompts = %config.prompt_dir.display(),
        "Starting lessonkit gateway"
    );

    let engines = build_engines(&config)?;
    let cache = SqliteResultCache::open(&config.cache_db)?;
    let pipeline = Pipeline::new(
        engines,
        PromptRegistry::new(&config.prompt_dir),
        SchemaRegistry::new(Some(config.prompt_dir.clone())),
        Arc::new(cache),
    );

    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.bind_address, config.port))?;

    start_server(addr, GatewayState::new(pipeline)).await
}

async fn status(config: &Config) -> Result<()> {
    let url = format!("http://127.0.0.1:{}/healthz", config.port);
    match reqwest::get(&url).await {
        Ok(resp) if resp.status().is_success() => println!("lessonkit is running on port {}", config.port),
        Ok(resp) => println!("lessonkit answered {} on port {}", resp.status(), config.port),
        Err(_) => println!("lessonkit is not running on port {}", config.port),
    }

    if !config.cache_db.exists() {
        println!("No cache database at {}", config.cache_db.display());
        return Ok(());
    }
    let cache = SqliteResultCache::open(&config.cache_db)?;
    let stats = cache.stats().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

const SECS_PER_DAY: u64 = 24 * 60 * 60;

fn purge_age(days: u64) -> Duration {
    Duration::from_secs(days.saturating_mul(SECS_PER_DAY))
}

async fn purge_cache(config: &Config, days: u64) -> Result<()> {
    if days == 0 {
        println!("Nothing to purge: --days 0 keeps every row");
        return Ok(());
    }
    let cache = SqliteResultCache::open(&config.cache_db)?;
    let age = purge_age(days);
    let parses = cache.purge_parse(age).await?;
    let hints = cache.purge_hints(age).await?;
    println!("Removed {parses} parsed tasks and {hints} hints older than {days} days");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purge_age_saturates() {
        assert_eq!(purge_age(30), Duration::from_secs(30 * 86_400));
        assert_eq!(purge_age(u64::MAX), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn purge_cache_days_flag_parses() {
        let cli = Cli::try_parse_from(["lessonkit", "purge-cache", "--days", "18446744073709551615"]).unwrap();
        match cli.command {
            Commands::PurgeCache { days } => assert_eq!(purge_age(days), Duration::from_secs(u64::MAX)),
            _ => panic!("expected purge-cache"),
        }
    }
}
