//! mjpeg_server - live inference display for an edge gateway
//!
//! Loads the converted model and its meta.yaml, opens the camera and serves
//! annotated frames as motion JPEG. Restricted-area warnings are published to
//! the configured MQTT broker.

use anyhow::{anyhow, Result};
use blueoil_deploy::{MjpegServer, ServerConfig, StreamContext};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = ServerConfig::load()?;
    log::info!("Motion JPEG Server Start!");
    log::info!(
        "model {} (meta {}), camera {} {}x{}@{}",
        cfg.model_path.display(),
        cfg.meta_path.display(),
        cfg.camera.device,
        cfg.camera.width,
        cfg.camera.height,
        cfg.camera.fps
    );

    let ctx = StreamContext::from_config(&cfg)?;
    log::info!("serving {} model", ctx.meta().task);
    let handle = MjpegServer::new(cfg.addr.clone(), ctx).spawn()?;
    log::info!("listening on {}", handle.addr);

    let (tx, rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let _ = rx.recv();
    log::info!("interrupted, stopping server");
    handle.stop()
}
