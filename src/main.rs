use admission_guard::{config::GuardConfig, init_guard, init_tracing};
use anyhow::Context;
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; variables may come from the real environment
    let dotenv = dotenvy::dotenv();

    // Config file path from command line, otherwise environment variables
    let config = match env::args().nth(1) {
        Some(path) => GuardConfig::from_file(&path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => GuardConfig::from_env().context(
            "Failed to load configuration from environment (usage: admission-guard [config_file])",
        )?,
    };

    init_tracing(&config.logging);

    if let Ok(path) = dotenv {
        tracing::info!(path = %path.display(), "Loaded environment file");
    }

    init_guard(config).await?;

    Ok(())
}
