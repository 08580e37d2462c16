use std::sync::Arc;

use anyhow::Context;
use log::{error, info};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, Instant, MissedTickBehavior};

use drive_server::net::{bind_listener, start_websocket_server};
use drive_server::state::ClientRegistry;
use drive_server::{Session, SimConfig};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("🚀 Starting drive server...");

    let config = match std::env::args().nth(1) {
        Some(path) => SimConfig::from_json_file(&path)
            .with_context(|| format!("loading config from {path}"))?,
        None => SimConfig::default(),
    };

    let listener = bind_listener(&config.server.bind_addr).await?;
    let registry = Arc::new(Mutex::new(ClientRegistry::new()));
    let (input_tx, input_rx) = mpsc::unbounded_channel();

    tokio::spawn(start_websocket_server(
        listener,
        Arc::clone(&registry),
        input_tx,
        config.world.timestep,
    ));

    let period = config.server.tick_period()?;
    let mut session = Session::with_input_channel(config, input_rx)?;

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = Instant::now();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                let dt = now.duration_since(last).as_secs_f32();
                last = now;

                match session.frame(dt) {
                    Ok(snapshot) => {
                        registry.lock().await.broadcast(&snapshot);
                    }
                    Err(e) => {
                        error!("❌ Frame failed: {e}");
                        return Err(e.into());
                    }
                }
            }
            _ = &mut shutdown => {
                info!(
                    "👋 Shutting down after {} ticks ({} recoveries)",
                    session.vehicle().ticks(),
                    session.vehicle().recoveries()
                );
                break;
            }
        }
    }

    Ok(())
}
