use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use foragents::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "foragents=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        "Starting forAgents {} (data dir: {}, supabase: {})",
        env!("CARGO_PKG_VERSION"),
        config
            .data_dir
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| "disabled".to_string()),
        config.supabase.is_some()
    );

    foragents::api::serve(config).await
}
