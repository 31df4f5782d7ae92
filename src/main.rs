use anyhow::Context;
use clap::Parser;
use orion_agent::agent::{self, Agent, Timing};
use orion_agent::api_client::ApiClient;
use orion_agent::identity::{Identity, IdentityOverrides};
use orion_agent::secret::SecretString;
use orion_agent::version;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

fn init_logger() {
    // LOG_LEVEL wins over RUST_LOG
    let filter = env::var("LOG_LEVEL")
        .or_else(|_| env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&filter))
        .with_target(false)
        .init();
}

#[derive(Parser)]
#[command(name = "orion-agent")]
#[command(about = "Orion field agent for sensors and cameras", long_about = None)]
struct Args {
    /// Device identity file (server URL, device ID, token)
    #[arg(long, env = "ORION_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Server root URL, e.g. https://orion.example (overrides the identity file)
    #[arg(long, env = "ORION_SERVER_URL")]
    server_url: Option<String>,

    /// Device ID (overrides the identity file)
    #[arg(long, env = "ORION_DEVICE_ID")]
    device_id: Option<String>,

    /// Device token (overrides the identity file)
    #[arg(long, env = "ORION_DEVICE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Where captured photos are staged before upload
    #[arg(long, env = "ORION_UPLOADS_DIR", default_value = agent::DEFAULT_UPLOADS_DIR)]
    uploads_dir: PathBuf,

    /// Seconds between configuration fetches
    #[arg(long, default_value_t = 60)]
    config_poll_secs: u64,

    /// Seconds between command polls
    #[arg(long, default_value_t = 5)]
    command_poll_secs: u64,

    /// Seconds slept at the end of every loop iteration
    #[arg(long, default_value_t = 1)]
    tick_secs: u64,

    /// Hard limit on a single sensor read, in seconds
    #[arg(long, default_value_t = 10)]
    driver_timeout_secs: u64,
}

impl Args {
    fn overrides(&self) -> IdentityOverrides {
        IdentityOverrides {
            server_url: self.server_url.clone(),
            device_id: self.device_id.clone(),
            token: self.token.clone().map(SecretString::from),
        }
    }

    fn timing(&self) -> Timing {
        Timing {
            tick: Duration::from_secs(self.tick_secs),
            config_poll: Duration::from_secs(self.config_poll_secs),
            command_poll: Duration::from_secs(self.command_poll_secs),
            driver_timeout: Duration::from_secs(self.driver_timeout_secs),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let args = Args::parse();

    let identity = Identity::load(&args.config, args.overrides())
        .with_context(|| {
            format!(
                "could not load device identity from {}",
                args.config.display()
            )
        })
        .inspect_err(|e| tracing::error!("{:#}", e))?;

    version::log_version(&identity.device_id);

    let client = ApiClient::new(
        &identity.server_url,
        identity.device_id.clone(),
        identity.token.clone(),
    );
    tracing::info!("API base URL: {}", client.base_url());

    let mut agent = Agent::new(client, identity.device_id.clone())
        .with_timing(args.timing())
        .with_uploads_dir(args.uploads_dir.clone());

    // Create shutdown signal channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("Shutdown signal received, finishing the current pass...");
        let _ = shutdown_tx.send(true);
    });

    agent.run(shutdown_rx).await;

    tracing::info!("Orion agent stopped");
    Ok(())
}

/// Wait for SIGTERM or SIGINT shutdown signal.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
        let mut sigint =
            signal(SignalKind::interrupt()).expect("Failed to register SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to register Ctrl+C handler");
        tracing::info!("Received Ctrl+C");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["orion-agent"]).unwrap();
        assert_eq!(args.config, PathBuf::from("config.json"));
        assert_eq!(args.uploads_dir, PathBuf::from("uploads"));
        assert_eq!(args.timing(), Timing::default());
    }

    #[test]
    fn test_cli_overrides() {
        let args = Args::try_parse_from([
            "orion-agent",
            "--server-url",
            "http://orion.local",
            "--device-id",
            "rpi-3",
            "--token",
            "secret",
            "--tick-secs",
            "2",
            "--driver-timeout-secs",
            "15",
        ])
        .unwrap();

        let overrides = args.overrides();
        assert_eq!(overrides.server_url.as_deref(), Some("http://orion.local"));
        assert_eq!(overrides.device_id.as_deref(), Some("rpi-3"));
        assert_eq!(overrides.token.unwrap().expose(), "secret");
        assert_eq!(args.timing().tick, Duration::from_secs(2));
        assert_eq!(args.timing().driver_timeout, Duration::from_secs(15));
    }
}
