use anyhow::Result;
use clap::{Parser, Subcommand};
use rategate::{Config, RateLimiter, RedisStore};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Run rate limit checks against a shared Redis store from the command
/// line, using the engine's default rule set.
#[derive(Parser)]
#[command(name = "rategate", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a rule for an identifier one or more times
    Check {
        /// Rule key (e.g. login, api, sms)
        #[arg(long)]
        rule: String,
        /// Caller identifier (e.g. ip:1.2.3.4, user:42)
        #[arg(long)]
        id: String,
        /// Number of checks to run
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Print the configured rules
    Rules,
    /// Print per-(rule, identifier) counters gathered by this process
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rategate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    tracing::info!(redis_url = %config.redis_url, "connecting to store");
    let store = RedisStore::connect(&config.redis_url, config.store_timeout()).await?;
    let limiter = RateLimiter::with_default_rules(Arc::new(store), &config.key_prefix);

    match cli.command {
        Command::Check { rule, id, count } => {
            for _ in 0..count {
                let decision = limiter.check_limit(&rule, &id).await?;
                println!("{}", serde_json::to_string(&decision)?);
            }
        }
        Command::Rules => {
            println!("{}", serde_json::to_string_pretty(&limiter.list_rules())?);
        }
        Command::Stats => {
            limiter.sweep_expired_stats(config.stats_cutoff());
            let stats: Vec<_> = limiter.list_stats().into_iter().collect();
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}
