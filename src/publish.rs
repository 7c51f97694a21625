//! Alert publishing.
//!
//! A raised alert produces two messages: the firehose envelope
//! `{"request": {"data": <result>}, "id": "<YYYYMMDDHHMMSS>"}` and the bare
//! result document. Publishing happens on its own thread so a slow broker
//! never stalls the video stream, and failures are logged, not returned.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use rumqttc::Outgoing;
use serde_json::{json, Value};

pub const DEFAULT_FIREHOSE_TOPIC: &str = "kinesisfirehose/message";
pub const DEFAULT_RESULT_TOPIC: &str = "inference/result";
pub const DEFAULT_CLIENT_ID: &str = "blueoil-mjpeg-server";

const RECONNECT_BACKOFF_MIN: Duration = Duration::from_millis(500);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, PartialEq)]
pub struct PublishConfig {
    /// `host:port`, optionally prefixed with `mqtt://` or `tcp://`. `None`
    /// logs alerts instead of publishing them.
    pub broker: Option<String>,
    pub client_id: String,
    pub firehose_topic: String,
    pub result_topic: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            broker: None,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            firehose_topic: DEFAULT_FIREHOSE_TOPIC.to_string(),
            result_topic: DEFAULT_RESULT_TOPIC.to_string(),
        }
    }
}

/// Destination for published messages.
pub trait MessageSink: Send {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Sink used when no broker is configured.
pub struct LogSink;

impl MessageSink for LogSink {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        log::info!("alert for {} ({} bytes, no broker configured)", topic, payload.len());
        Ok(())
    }
}

pub struct MqttSink {
    client: Client,
    closing: Arc<AtomicBool>,
    connection_handle: Option<JoinHandle<()>>,
}

impl MqttSink {
    pub fn connect(broker: &str, client_id: &str) -> Result<Self> {
        let (host, port) = parse_broker(broker)?;
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);
        let (client, connection) = Client::new(options, 10);
        log::info!("publishing alerts to MQTT broker {}", broker);
        let closing = Arc::new(AtomicBool::new(false));
        Ok(Self {
            client,
            connection_handle: Some(spawn_event_loop(connection, closing.clone())?),
            closing,
        })
    }
}

/// Poll the connection until `close()` is requested. rumqttc reconnects on
/// the next poll after an error, so errors back off and retry.
fn spawn_event_loop(
    mut connection: Connection,
    closing: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("mqtt".to_string())
        .spawn(move || {
            let mut backoff = RECONNECT_BACKOFF_MIN;
            for event in connection.iter() {
                match event {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {
                        backoff = RECONNECT_BACKOFF_MIN;
                    }
                    Err(e) => {
                        if closing.load(Ordering::SeqCst) {
                            break;
                        }
                        log::warn!("MQTT connection error: {}; retrying in {:?}", e, backoff);
                        if sleep_unless_closing(backoff, &closing) {
                            break;
                        }
                        backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
                    }
                }
            }
        })
        .context("spawn MQTT event loop")
}

/// Returns true if closing was requested during the sleep.
fn sleep_unless_closing(duration: Duration, closing: &AtomicBool) -> bool {
    let step = Duration::from_millis(50);
    let mut slept = Duration::ZERO;
    while slept < duration {
        if closing.load(Ordering::SeqCst) {
            return true;
        }
        std::thread::sleep(step);
        slept += step;
    }
    closing.load(Ordering::SeqCst)
}

impl MessageSink for MqttSink {
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        // Queued for the event loop; never blocks while the broker is away.
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.to_vec())?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);
        if let Err(err) = self.client.try_disconnect() {
            log::warn!("MQTT disconnect: {}", err);
        }
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

fn parse_broker(addr: &str) -> Result<(String, u16)> {
    let mut remainder = addr.trim();
    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }
    let (host, port) = remainder
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in {}", addr));
    }
    let port: u16 = port.parse().context("invalid MQTT port")?;
    Ok((host.to_string(), port))
}

/// Envelope published to the firehose topic.
pub fn firehose_message(data: &Value, id: &str) -> Value {
    json!({
        "request": {"data": data},
        "id": id,
    })
}

fn timestamp_id() -> String {
    chrono::Local::now().format("%Y%m%d%H%M%S").to_string()
}

/// Single-worker alert publisher.
pub struct AlertPublisher {
    submissions: Option<mpsc::Sender<Value>>,
    join: Option<JoinHandle<()>>,
}

impl AlertPublisher {
    pub fn from_config(config: &PublishConfig) -> Result<Self> {
        let sink: Box<dyn MessageSink> = match config.broker.as_deref() {
            Some(broker) => Box::new(MqttSink::connect(broker, &config.client_id)?),
            None => Box::new(LogSink),
        };
        Self::spawn(sink, config.firehose_topic.clone(), config.result_topic.clone())
    }

    pub fn spawn(
        mut sink: Box<dyn MessageSink>,
        firehose_topic: String,
        result_topic: String,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Value>();
        let join = std::thread::Builder::new()
            .name("publish".to_string())
            .spawn(move || {
                for data in rx {
                    let published =
                        publish_alert(sink.as_mut(), &firehose_topic, &result_topic, &data);
                    if let Err(err) = published {
                        log::error!("Failed to publish message: {:#}", err);
                    }
                }
                if let Err(err) = sink.close() {
                    log::warn!("closing publisher: {:#}", err);
                }
            })
            .context("spawn publish thread")?;
        Ok(Self {
            submissions: Some(tx),
            join: Some(join),
        })
    }

    /// Queue a result document. Never blocks on the broker.
    pub fn submit(&self, data: Value) {
        log::info!("Publish JSON");
        let sent = self
            .submissions
            .as_ref()
            .map(|tx| tx.send(data).is_ok())
            .unwrap_or(false);
        if !sent {
            log::error!("Failed to publish message: publisher stopped");
        }
    }

    /// Drain queued alerts and stop the worker.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.submissions.take();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("publish thread panicked");
            }
        }
    }
}

impl Drop for AlertPublisher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn publish_alert(
    sink: &mut dyn MessageSink,
    firehose_topic: &str,
    result_topic: &str,
    data: &Value,
) -> Result<()> {
    let envelope = firehose_message(data, &timestamp_id());
    sink.publish(firehose_topic, &serde_json::to_vec(&envelope)?)
        .with_context(|| format!("publish to {}", firehose_topic))?;
    sink.publish(result_topic, &serde_json::to_vec(data)?)
        .with_context(|| format!("publish to {}", result_topic))?;
    Ok(())
}
