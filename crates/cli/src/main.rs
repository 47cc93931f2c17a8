mod cli;
mod sink;

use anyhow::Context;
use remoteplay_core::device_store::InMemoryDeviceStore;
use remoteplay_core::session::{RemoteSession, SessionState, StartParams};
use remoteplay_protocol::RemotePlayConfig;
use sink::DemoSink;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = cli::parse_args()?;

    let config = match std::fs::read_to_string(&args.config_path) {
        Ok(raw) => toml::from_str::<RemotePlayConfig>(&raw).context("parsing config file")?,
        Err(_) => {
            info!(path = %args.config_path, "no config file found, using defaults");
            RemotePlayConfig::default()
        }
    };
    if let Err(issues) = config.validate() {
        for issue in &issues {
            error!("{issue}");
        }
        anyhow::bail!("invalid configuration");
    }

    let device_store = Arc::new(InMemoryDeviceStore::new());
    let sink = Arc::new(DemoSink::new(args.dump_video_dir));
    let session = Arc::new(RemoteSession::new(config, device_store, sink));

    let params = StartParams {
        host_ip: args.host_ip,
        device_id: args.device_id,
        wake_credential: args.wake_credential,
        psn_account_id_base64: args.psn_account_id,
        pin: args.pin,
    };

    info!(host = %params.host_ip, device_id = %params.device_id, "starting session");
    if let Err(e) = session.start(params).await {
        error!(error = %e, kind = ?e.kind(), "session failed to start");
        return Err(e.into());
    }
    info!("session ready");

    // Drive the session until the process is interrupted or it leaves
    // Ready on its own (e.g. a heartbeat stall transitions to Failed).
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received, stopping session");
                session.stop().await;
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {
                if !matches!(session.state().await, SessionState::Ready) {
                    info!(state = ?session.state().await, "session left Ready, exiting");
                    break;
                }
            }
        }
    }

    Ok(())
}
