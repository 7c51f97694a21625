//! Motion-JPEG endpoint.
//!
//! Every `GET` streams annotated camera frames as
//! `multipart/x-mixed-replace` parts until the client disconnects. Clients
//! are served one at a time; the context (camera, model, publisher) is built
//! once and only read by the stream loop, while debounce state lives with
//! each connection.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use crate::annotate::Annotator;
use crate::config::ServerConfig;
use crate::ingest::{CaptureWorker, PendingFrame};
use crate::meta::{ModelMeta, Task};
use crate::nn::{self, InferenceBackend, ModelFormat};
use crate::pipeline::InferencePipeline;
use crate::publish::AlertPublisher;
use crate::visualize::FrameVisualizer;

pub const BOUNDARY: &str = "jpgboundary";
const JPEG_QUALITY: u8 = 100;
const MAX_REQUEST_BYTES: usize = 8192;
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_TRIGGER_CLASS: &str = "face";

/// Everything the stream loop needs, built once at startup.
pub struct StreamContext {
    meta: ModelMeta,
    pipeline: InferencePipeline,
    camera: CaptureWorker,
    publisher: AlertPublisher,
    annotator: Annotator,
    trigger_class_id: usize,
    alert_duration: Duration,
}

impl StreamContext {
    pub fn new(
        meta: ModelMeta,
        backend: Box<dyn InferenceBackend>,
        camera: CaptureWorker,
        publisher: AlertPublisher,
    ) -> Result<Self> {
        if meta.task == Task::SemanticSegmentation {
            return Err(anyhow!("{} models are not supported by the stream server", meta.task));
        }
        let pipeline = InferencePipeline::new(backend, &meta);
        let trigger_class_id = meta.trigger_class_id(DEFAULT_TRIGGER_CLASS);
        Ok(Self {
            meta,
            pipeline,
            camera,
            publisher,
            annotator: Annotator::new(None),
            trigger_class_id,
            alert_duration: Duration::from_secs(1),
        })
    }

    /// Class whose presence in the restricted area raises a warning, and how
    /// long a state must hold before it is shown.
    pub fn with_alert(mut self, trigger_class: &str, duration: Duration) -> Self {
        self.trigger_class_id = self.meta.trigger_class_id(trigger_class);
        self.alert_duration = duration;
        self
    }

    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = annotator;
        self
    }

    /// Load the model, metadata and devices named by `cfg`.
    pub fn from_config(cfg: &ServerConfig) -> Result<Self> {
        ModelFormat::from_path(&cfg.model_path)?;
        let meta = match cfg.meta_preset.as_deref() {
            Some(preset) => ModelMeta::preset(preset)?,
            None => ModelMeta::load(&cfg.meta_path)?,
        }
        .with_score_threshold(cfg.score_threshold);
        let backend = nn::load_model(&cfg.model_path, &meta.input_shape())?;
        let camera = CaptureWorker::spawn(cfg.camera.clone())?;
        let publisher = AlertPublisher::from_config(&cfg.publish)?;
        let annotator = Annotator::new(cfg.font_path.as_deref());
        Ok(Self::new(meta, backend, camera, publisher)?
            .with_alert(&cfg.trigger_class, cfg.alert_duration)
            .with_annotator(annotator))
    }

    pub fn meta(&self) -> &ModelMeta {
        &self.meta
    }

    /// Release the camera and drain the publisher.
    pub fn shutdown(self) -> Result<()> {
        self.publisher.stop();
        self.camera.stop()
    }
}

pub struct MjpegServer {
    addr: String,
    ctx: StreamContext,
}

/// Shutdown flag plus the connection currently being streamed, so a stop
/// request can unblock a write to a client that stopped reading.
#[derive(Debug, Default)]
struct ServerControl {
    shutdown: AtomicBool,
    active: Mutex<Option<TcpStream>>,
}

impl ServerControl {
    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Ok(active) = self.active.lock() {
            if let Some(stream) = active.as_ref() {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
    }

    fn set_active(&self, stream: Option<TcpStream>) {
        if let Ok(mut active) = self.active.lock() {
            *active = stream;
        }
    }
}

#[derive(Debug)]
pub struct ServerHandle {
    pub addr: SocketAddr,
    control: Arc<ServerControl>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Stop accepting, end the active stream and release the camera.
    pub fn stop(mut self) -> Result<()> {
        self.control.stop();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("mjpeg server thread panicked"))?;
        }
        Ok(())
    }
}

impl MjpegServer {
    pub fn new(addr: impl Into<String>, ctx: StreamContext) -> Self {
        Self {
            addr: addr.into(),
            ctx,
        }
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let configured_addr: SocketAddr = self
            .addr
            .parse()
            .with_context(|| format!("invalid server address {}", self.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("bind {}", configured_addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let control = Arc::new(ServerControl::default());
        let control_thread = control.clone();
        let ctx = self.ctx;
        let join = std::thread::Builder::new()
            .name("mjpeg-server".to_string())
            .spawn(move || {
                log::info!("server starting on {}", addr);
                if let Err(err) = run_server(listener, &ctx, &control_thread) {
                    log::error!("mjpeg server stopped: {}", err);
                }
                if let Err(err) = ctx.shutdown() {
                    log::error!("releasing stream resources: {}", err);
                }
                log::info!("server stopped");
            })
            .context("spawn server thread")?;

        Ok(ServerHandle {
            addr,
            control,
            join: Some(join),
        })
    }
}

fn run_server(listener: TcpListener, ctx: &StreamContext, control: &ServerControl) -> Result<()> {
    loop {
        if control.stopping() {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                log::info!("client connected: {}", peer);
                control.set_active(stream.try_clone().ok());
                let result = handle_connection(stream, ctx, control);
                control.set_active(None);
                if let Err(err) = result {
                    log::warn!("stream to {} ended: {:#}", peer, err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    ctx: &StreamContext,
    control: &ServerControl,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        let body = b"Unsupported method\n";
        let header = format!(
            "HTTP/1.0 501 Not Implemented\r\n\
             Content-Type: text/plain\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        stream.write_all(header.as_bytes())?;
        stream.write_all(body)?;
        return Ok(());
    }
    log::debug!("streaming {} to client", request.path);

    stream.write_all(
        format!(
            "HTTP/1.0 200 OK\r\nContent-type: multipart/x-mixed-replace; boundary={}\r\n\r\n",
            BOUNDARY
        )
        .as_bytes(),
    )?;

    let mut visualizer = FrameVisualizer::new(ctx.trigger_class_id, ctx.alert_duration);
    let mut pending = Some(ctx.camera.request()?);
    let separator = format!("\r\n--{}\r\n", BOUNDARY);
    while !control.stopping() {
        let result = stream_frame(ctx, &mut visualizer, &mut pending, &mut stream);
        stream.write_all(separator.as_bytes())?;
        result?;
    }
    Ok(())
}

/// Capture, infer, decorate and write one multipart body.
fn stream_frame(
    ctx: &StreamContext,
    visualizer: &mut FrameVisualizer,
    pending: &mut Option<PendingFrame>,
    out: &mut impl Write,
) -> Result<()> {
    let frame = pending
        .take()
        .ok_or_else(|| anyhow!("no capture in flight"))?
        .wait()?;
    let image = frame.into_image()?;
    let inference = ctx.pipeline.run(&image)?;
    *pending = Some(ctx.camera.request()?);

    let visualized = visualizer.render(
        &ctx.meta,
        &ctx.annotator,
        image,
        &inference.output,
        inference.network_fps,
        Instant::now(),
    )?;
    let jpeg = encode_jpeg(&visualized.image)?;
    if let Some(doc) = visualized.alert {
        ctx.publisher.submit(doc);
    }

    out.write_all(b"Content-type: image/jpeg\r\n\r\n")?;
    out.write_all(&jpeg)?;
    Ok(())
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY)
        .encode_image(image)
        .context("jpeg encode")?;
    Ok(buf)
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next()
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jpeg_encoding_produces_soi_marker() -> Result<()> {
        let jpeg = encode_jpeg(&RgbImage::from_pixel(16, 8, image::Rgb([200, 10, 10])))?;
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg)?;
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
        Ok(())
    }

    #[test]
    fn unsupported_model_fails_before_loading() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ServerConfig {
            model_path: dir.path().join("model.tflite"),
            meta_path: dir.path().join("missing-meta.yaml"),
            meta_preset: None,
            addr: "127.0.0.1:0".to_string(),
            score_threshold: 0.5,
            font_path: None,
            camera: crate::ingest::CameraConfig::default(),
            alert_duration: Duration::from_secs(1),
            trigger_class: "face".to_string(),
            publish: Default::default(),
        };
        let err = StreamContext::from_config(&cfg).err().unwrap();
        assert!(err.to_string().contains("Unknown file type"));
    }
}
