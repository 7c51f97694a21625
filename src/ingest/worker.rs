use anyhow::{anyhow, Context, Result};
use std::sync::mpsc;
use std::thread::JoinHandle;

use super::camera::{CameraConfig, CameraSource};
use crate::frame::Frame;

type FrameReply = mpsc::Sender<Result<Frame>>;

/// Single capture thread that owns the camera for the process lifetime.
///
/// Requests are served in order, one frame per request. Dropping the worker
/// closes the request channel, joins the thread and releases the device.
pub struct CaptureWorker {
    requests: Option<mpsc::Sender<FrameReply>>,
    join: Option<JoinHandle<()>>,
}

/// A frame capture in flight.
pub struct PendingFrame {
    reply: mpsc::Receiver<Result<Frame>>,
}

impl PendingFrame {
    /// Block until the worker delivers the frame.
    pub fn wait(self) -> Result<Frame> {
        self.reply
            .recv()
            .map_err(|_| anyhow!("capture worker stopped before delivering a frame"))?
    }
}

impl CaptureWorker {
    /// Open the camera on a dedicated thread.
    ///
    /// Returns once the device is connected, or with the connect error.
    pub fn spawn(config: CameraConfig) -> Result<Self> {
        let (request_tx, request_rx) = mpsc::channel::<FrameReply>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let join = std::thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                let mut source = match open_camera(config) {
                    Ok(source) => {
                        let _ = ready_tx.send(Ok(()));
                        source
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                for reply in request_rx {
                    let _ = reply.send(source.next_frame());
                }
                let stats = source.stats();
                log::info!(
                    "camera {} released after {} frames",
                    stats.device,
                    stats.frames_captured
                );
            })
            .context("spawn capture thread")?;

        ready_rx
            .recv()
            .map_err(|_| anyhow!("capture thread exited during startup"))??;

        Ok(Self {
            requests: Some(request_tx),
            join: Some(join),
        })
    }

    /// Queue a capture and return immediately.
    pub fn request(&self) -> Result<PendingFrame> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.requests
            .as_ref()
            .ok_or_else(|| anyhow!("capture worker stopped"))?
            .send(reply_tx)
            .map_err(|_| anyhow!("capture worker stopped"))?;
        Ok(PendingFrame { reply: reply_rx })
    }

    /// Stop the worker and release the camera.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.requests.take();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("capture thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("{}", err);
        }
    }
}

fn open_camera(config: CameraConfig) -> Result<CameraSource> {
    let mut source = CameraSource::new(config)?;
    source.connect()?;
    Ok(source)
}
