use anyhow::Context;
use clap::Parser;
use qkd_relay::config::{DEFAULT_PORT, LogFormat, RelayConfig};
use qkd_relay::logging::init_logging;
use qkd_relay::net::RelayServer;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(name = "qkd-relay")]
#[command(about = "Message relay for BB84 key distribution", long_about = None)]
struct Cli {
    /// Interface to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Measure and re-send every relayed qubit stream (intercept-resend attack)
    #[arg(long)]
    eavesdrop: bool,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);

    let config = RelayConfig {
        host: cli.host,
        port: cli.port,
        eavesdrop: cli.eavesdrop,
    };
    config.validate()?;

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("binding {}", config.bind_address()))?;
    let relay = RelayServer::new(&config);

    tokio::select! {
        result = relay.run(listener) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
            relay.shutdown();
        }
    }

    Ok(())
}
