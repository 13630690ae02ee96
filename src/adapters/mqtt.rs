//! MQTT session adapter.
//!
//! Implements [`MqttSession`].
//!
//! - **`target_os = "espidf"`**: wraps `esp_idf_svc::mqtt::client::EspMqttClient`.
//!   A pump thread drains the client's event connection into a channel;
//!   `poll` hands those messages to the lifecycle one at a time. Payloads
//!   the client delivers in chunks (firmware images) surface as
//!   [`InboundMessage::Stream`] whose source blocks on the next chunk.
//! - **all other targets**: an in-memory broker with injectable inbound
//!   traffic and a log of everything published, for host runs and tests.

use log::{debug, info, warn};

use crate::app::ports::{BufferedSource, ConnectOptions, InboundMessage, MqttSession};
use crate::error::TransportError;

/// Payloads up to this size that are valid UTF-8 are delivered as text.
pub const MAX_TEXT_PAYLOAD: usize = 16 * 1024;

/// Wrap a fully received payload as text or as a buffered stream.
pub fn inbound_from_bytes(topic: String, payload: Vec<u8>) -> InboundMessage {
    if payload.len() <= MAX_TEXT_PAYLOAD {
        match String::from_utf8(payload) {
            Ok(text) => return InboundMessage::Text {
                topic,
                payload: text,
            },
            Err(e) => {
                let bytes = e.into_bytes();
                return InboundMessage::Stream {
                    topic,
                    len: bytes.len(),
                    source: Box::new(BufferedSource::new(bytes)),
                };
            }
        }
    }
    InboundMessage::Stream {
        topic,
        len: payload.len(),
        source: Box::new(BufferedSource::new(payload)),
    }
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF adapter
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
mod esp {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
    use std::time::{Duration, Instant};

    use esp_idf_svc::mqtt::client::{
        Details, EspMqttClient, EspMqttConnection, EventPayload, LwtConfiguration,
        MqttClientConfiguration, QoS,
    };

    use super::*;
    use crate::app::ports::ByteSource;

    const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    const CHUNK_TIMEOUT: Duration = Duration::from_secs(30);
    const PUMP_STACK_SIZE: usize = 6 * 1024;
    /// Chunks buffered ahead of the flasher.
    const CHUNK_BACKLOG: usize = 4;

    /// What the pump thread forwards. `Send`, unlike [`InboundMessage`].
    enum PumpEvent {
        Complete { topic: String, payload: Vec<u8> },
        StreamStart { topic: String, len: usize, chunks: Receiver<Vec<u8>> },
    }

    /// Reads a chunked payload as the pump thread forwards it.
    struct ChunkSource {
        chunks: Receiver<Vec<u8>>,
        current: Vec<u8>,
        pos: usize,
    }

    impl ByteSource for ChunkSource {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            if self.pos == self.current.len() {
                match self.chunks.recv_timeout(CHUNK_TIMEOUT) {
                    Ok(chunk) => {
                        self.current = chunk;
                        self.pos = 0;
                    }
                    // Sender dropped: stream complete.
                    Err(mpsc::RecvTimeoutError::Disconnected) => return Ok(0),
                    Err(mpsc::RecvTimeoutError::Timeout) => return Err(TransportError::Timeout),
                }
            }
            let n = (self.current.len() - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    pub struct MqttAdapter {
        client: Option<EspMqttClient<'static>>,
        connected: Arc<AtomicBool>,
        events: Option<Receiver<PumpEvent>>,
    }

    impl Default for MqttAdapter {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MqttAdapter {
        pub fn new() -> Self {
            Self {
                client: None,
                connected: Arc::new(AtomicBool::new(false)),
                events: None,
            }
        }

        fn client(&mut self) -> Result<&mut EspMqttClient<'static>, TransportError> {
            self.client.as_mut().ok_or(TransportError::NotConnected)
        }
    }

    /// Runs on its own thread until the client is dropped.
    fn pump(mut connection: EspMqttConnection, connected: Arc<AtomicBool>, tx: Sender<PumpEvent>) {
        let mut stream: Option<SyncSender<Vec<u8>>> = None;
        while let Ok(event) = connection.next() {
            match event.payload() {
                EventPayload::Connected(_) => {
                    connected.store(true, Ordering::SeqCst);
                    info!("MQTT: broker session up");
                }
                EventPayload::Disconnected => {
                    connected.store(false, Ordering::SeqCst);
                    stream = None;
                    warn!("MQTT: broker session down");
                }
                EventPayload::Received {
                    topic,
                    data,
                    details,
                    ..
                } => match details {
                    Details::Complete => {
                        let _ = tx.send(PumpEvent::Complete {
                            topic: topic.unwrap_or_default().to_owned(),
                            payload: data.to_vec(),
                        });
                    }
                    Details::InitialChunk(initial) => {
                        let (chunk_tx, chunk_rx) = mpsc::sync_channel(CHUNK_BACKLOG);
                        let _ = chunk_tx.send(data.to_vec());
                        stream = Some(chunk_tx);
                        let _ = tx.send(PumpEvent::StreamStart {
                            topic: topic.unwrap_or_default().to_owned(),
                            len: initial.total_data_size,
                            chunks: chunk_rx,
                        });
                    }
                    Details::SubsequentChunk(chunk) => {
                        if let Some(sender) = stream.as_ref() {
                            if sender.send(data.to_vec()).is_err() {
                                stream = None;
                            }
                        }
                        if chunk.current_data_offset + data.len() >= chunk.total_data_size {
                            stream = None;
                        }
                    }
                },
                EventPayload::Error(e) => warn!("MQTT: client error: {:?}", e),
                _ => {}
            }
        }
        connected.store(false, Ordering::SeqCst);
        debug!("MQTT: pump thread exiting");
    }

    impl MqttSession for MqttAdapter {
        fn connect(&mut self, options: &ConnectOptions<'_>) -> Result<(), TransportError> {
            self.disconnect();

            let url = format!("mqtt://{}:{}", options.host, options.port);
            let conf = MqttClientConfiguration {
                client_id: Some(options.client_id),
                username: Some(options.username),
                password: Some(options.password),
                keep_alive_interval: Some(Duration::from_secs(u64::from(options.keepalive_secs))),
                lwt: Some(LwtConfiguration {
                    topic: options.will_topic,
                    payload: options.will_message.as_bytes(),
                    qos: QoS::AtLeastOnce,
                    retain: true,
                }),
                ..Default::default()
            };
            let (client, connection) = EspMqttClient::new(&url, &conf).map_err(|e| {
                warn!("MQTT: client init failed: {}", e);
                TransportError::ConnectFailed
            })?;

            let (tx, rx) = mpsc::channel();
            let connected = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&connected);
            std::thread::Builder::new()
                .name("mqtt-pump".into())
                .stack_size(PUMP_STACK_SIZE)
                .spawn(move || pump(connection, flag, tx))
                .map_err(|_| TransportError::ConnectFailed)?;

            self.client = Some(client);
            self.connected = connected;
            self.events = Some(rx);

            let started = Instant::now();
            while !self.connected.load(Ordering::SeqCst) {
                if started.elapsed() >= CONNECT_TIMEOUT {
                    warn!("MQTT: broker {} did not accept the session", url);
                    self.disconnect();
                    return Err(TransportError::SessionRejected);
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.client.is_some() && self.connected.load(Ordering::SeqCst)
        }

        fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
            self.client()?
                .subscribe(topic, QoS::AtLeastOnce)
                .map(|_| ())
                .map_err(|e| {
                    warn!("MQTT: subscribe {} failed: {}", topic, e);
                    TransportError::SubscribeFailed
                })
        }

        fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError> {
            self.client()?
                .publish(topic, QoS::AtLeastOnce, retain, payload)
                .map(|_| ())
                .map_err(|e| {
                    warn!("MQTT: publish to {} failed: {}", topic, e);
                    TransportError::PublishFailed
                })
        }

        fn poll(&mut self) -> Option<InboundMessage> {
            match self.events.as_ref()?.try_recv().ok()? {
                PumpEvent::Complete { topic, payload } => Some(inbound_from_bytes(topic, payload)),
                PumpEvent::StreamStart { topic, len, chunks } => Some(InboundMessage::Stream {
                    topic,
                    len,
                    source: Box::new(ChunkSource {
                        chunks,
                        current: Vec::new(),
                        pos: 0,
                    }),
                }),
            }
        }

        fn disconnect(&mut self) {
            // Dropping the client stops it; the pump thread then exits.
            if self.client.take().is_some() {
                debug!("MQTT: client closed");
            }
            self.events = None;
            self.connected.store(false, Ordering::SeqCst);
        }
    }
}

#[cfg(target_os = "espidf")]
pub use esp::MqttAdapter;

// ───────────────────────────────────────────────────────────────
// In-memory broker (simulation)
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
mod sim {
    use std::collections::{HashMap, VecDeque};

    use super::*;

    /// One publish seen by the in-memory broker.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Published {
        pub topic: String,
        pub payload: Vec<u8>,
        pub retain: bool,
    }

    impl Published {
        pub fn text(&self) -> &str {
            core::str::from_utf8(&self.payload).unwrap_or("")
        }
    }

    #[derive(Default)]
    pub struct MqttAdapter {
        connected: bool,
        refuse: bool,
        client_id: String,
        will: Option<(String, String)>,
        subscriptions: Vec<String>,
        inbox: VecDeque<(String, Vec<u8>)>,
        published: Vec<Published>,
        retained: HashMap<String, Vec<u8>>,
        connects: usize,
    }

    impl MqttAdapter {
        pub fn new() -> Self {
            Self::default()
        }

        /// Reject (or accept again) subsequent connects.
        pub fn refuse_connections(&mut self, refuse: bool) {
            self.refuse = refuse;
        }

        /// Queue a message from the broker. Only delivered on subscribed topics.
        pub fn inject(&mut self, topic: &str, payload: impl Into<Vec<u8>>) {
            self.inbox.push_back((topic.to_owned(), payload.into()));
        }

        /// Drop the session as a broker-side disconnect would, firing the will.
        pub fn drop_session(&mut self) {
            if self.connected {
                if let Some((topic, message)) = self.will.clone() {
                    self.record(&topic, message.as_bytes(), true);
                }
            }
            self.connected = false;
        }

        pub fn published(&self) -> &[Published] {
            &self.published
        }

        pub fn published_on(&self, topic: &str) -> Vec<&Published> {
            self.published.iter().filter(|p| p.topic == topic).collect()
        }

        pub fn retained(&self, topic: &str) -> Option<&[u8]> {
            self.retained.get(topic).map(Vec::as_slice)
        }

        pub fn subscriptions(&self) -> &[String] {
            &self.subscriptions
        }

        pub fn client_id(&self) -> &str {
            &self.client_id
        }

        pub fn will(&self) -> Option<(&str, &str)> {
            self.will.as_ref().map(|(t, m)| (t.as_str(), m.as_str()))
        }

        pub fn connect_count(&self) -> usize {
            self.connects
        }

        fn record(&mut self, topic: &str, payload: &[u8], retain: bool) {
            if retain {
                if payload.is_empty() {
                    self.retained.remove(topic);
                } else {
                    self.retained.insert(topic.to_owned(), payload.to_vec());
                }
            }
            self.published.push(Published {
                topic: topic.to_owned(),
                payload: payload.to_vec(),
                retain,
            });
        }
    }

    impl MqttSession for MqttAdapter {
        fn connect(&mut self, options: &ConnectOptions<'_>) -> Result<(), TransportError> {
            self.connects += 1;
            if self.refuse {
                warn!("MQTT(sim): {}:{} refused the session", options.host, options.port);
                return Err(TransportError::SessionRejected);
            }
            self.connected = true;
            self.client_id = options.client_id.to_owned();
            self.will = Some((options.will_topic.to_owned(), options.will_message.to_owned()));
            self.subscriptions.clear();
            info!("MQTT(sim): session open as {}", options.client_id);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
            if !self.connected {
                return Err(TransportError::NotConnected);
            }
            if !self.subscriptions.iter().any(|t| t == topic) {
                self.subscriptions.push(topic.to_owned());
            }
            Ok(())
        }

        fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError> {
            if !self.connected {
                return Err(TransportError::NotConnected);
            }
            debug!("MQTT(sim): {} <- {} bytes (retain={})", topic, payload.len(), retain);
            self.record(topic, payload, retain);
            Ok(())
        }

        fn poll(&mut self) -> Option<InboundMessage> {
            if !self.connected {
                return None;
            }
            while let Some((topic, payload)) = self.inbox.pop_front() {
                if self.subscriptions.iter().any(|t| *t == topic) {
                    return Some(inbound_from_bytes(topic, payload));
                }
                debug!("MQTT(sim): dropped message on unsubscribed {}", topic);
            }
            None
        }

        fn disconnect(&mut self) {
            self.connected = false;
            self.subscriptions.clear();
        }
    }
}

#[cfg(not(target_os = "espidf"))]
pub use sim::{MqttAdapter, Published};
