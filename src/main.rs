use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use avatar_cache::{
    avatar_cache::{AvatarStore, AvatarUrlBuilder},
    config::{Config, defaults::DEFAULT_CONFIG_FILE},
    utils::HttpClientFactory,
    web::{AppState, WebServer},
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "avatar-cache")]
#[command(version)]
#[command(about = "Background-refreshing avatar image cache and server")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Public base URL avatar URLs are built from
    #[arg(short, long, value_name = "URL")]
    base_url: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn init_tracing(cli: &Cli) {
    let log_filter = if cli.log_level == "trace" {
        format!("avatar_cache={},tower_http=trace", cli.log_level)
    } else {
        format!("avatar_cache={},tower_http=info", cli.log_level)
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| log_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    match cli.log_format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    info!("Starting avatar cache v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load_from_file(&cli.config)?;
    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    if let Some(base_url) = cli.base_url {
        config.web.base_url = base_url;
    }

    if cli.print_config {
        println!("{}", config.to_toml_string()?);
        return Ok(());
    }

    info!(
        "Avatar cache: {} workers, stale after {}, unused after {}",
        config.avatar.concurrency,
        humantime::format_duration(config.avatar.stale_after),
        humantime::format_duration(config.avatar.unused_after)
    );

    let client = HttpClientFactory::from_config(&config.avatar).create_client()?;
    let store = Arc::new(AvatarStore::from_config(&config.avatar));
    let url_builder = Arc::new(AvatarUrlBuilder::from_config(
        Arc::clone(&store),
        &config,
        client,
    ));

    let state = AppState::new(config, store, url_builder);
    let web_server = WebServer::new(state)?;
    let (host, port) = (web_server.host(), web_server.port());

    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
    let server = tokio::spawn(web_server.serve_with_signal(ready_tx));

    match ready_rx.await {
        Ok(Ok(())) => info!("Avatar cache listening on http://{}:{}", host, port),
        Ok(Err(e)) => return Err(e),
        Err(_) => anyhow::bail!("Web server exited before it was ready"),
    }

    server.await??;
    info!("Avatar cache stopped");
    Ok(())
}
