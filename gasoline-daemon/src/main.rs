use clap::Parser;
use gasoline_daemon::{default_settings_path, run, SecurityMode, Settings};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Gasoline browser bridge daemon", long_about = None)]
struct Cli {
    #[arg(
        long,
        default_value = "127.0.0.1:7890",
        help = "Loopback address for the MCP and extension endpoints"
    )]
    listen: SocketAddr,

    #[arg(
        long,
        value_name = "PATH",
        help = "Settings heartbeat file (defaults to $GASOLINE_SETTINGS_PATH or ~/.gasoline-settings.json)"
    )]
    settings_path: Option<PathBuf>,

    #[arg(
        long,
        default_value_t = 30_000,
        value_parser = clap::value_parser!(u64).range(1..=300_000),
        help = "How long a tool call waits for the extension, in milliseconds"
    )]
    query_timeout_ms: u64,

    #[arg(
        long,
        default_value = "standard",
        value_parser = parse_security_mode,
        help = "Security mode (standard|insecure_proxy)"
    )]
    security_mode: SecurityMode,

    #[arg(
        long,
        default_value_t = 250,
        value_parser = clap::value_parser!(u64).range(10..),
        help = "Interval of the expiry sweep for queued commands, in milliseconds"
    )]
    sweep_interval_ms: u64,
}

impl Cli {
    fn into_settings(self) -> Settings {
        Settings {
            listen: self.listen,
            settings_path: self.settings_path.unwrap_or_else(default_settings_path),
            query_timeout: Duration::from_millis(self.query_timeout_ms),
            security_mode: self.security_mode,
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    run(cli.into_settings()).await
}

fn parse_security_mode(value: &str) -> Result<SecurityMode, String> {
    value.parse()
}
