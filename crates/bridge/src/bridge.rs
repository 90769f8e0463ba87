//! The bridge instance and its broker worker.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Filter, Packet};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, Event, MqttOptions};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::codec::{CodecError, FrameCodec, OptionalField};
use crate::config::{BridgeConfig, ConfigError};
use crate::frame::CanFrame;
use crate::link::{LinkState, LinkWatch};
use crate::topic;

/// Wait between reconnection attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Capacity of the MQTT client's internal request channel.
const CLIENT_QUEUE: usize = 64;

/// Handler invoked for every frame received from the bus.
pub type FrameHandler = dyn Fn(CanFrame) + Send + Sync;

/// One bridged CAN channel.
///
/// Construction spawns the worker task onto the ambient tokio runtime;
/// dropping the bridge aborts it, abandoning in-flight publishes and
/// discarding anything still queued.
pub struct CanMqttBridge {
    tx: mpsc::UnboundedSender<CanFrame>,
    link: Arc<LinkWatch>,
    pub_id: u32,
    worker: tokio::task::JoinHandle<()>,
}

impl CanMqttBridge {
    /// Validate `config` and bring up the worker.
    ///
    /// `on_frame` is called on the worker task for every accepted inbound
    /// frame and must not block.
    ///
    /// # Errors
    ///
    /// Configuration errors are fatal here and nowhere else.
    pub fn new(
        config: BridgeConfig,
        on_frame: impl Fn(CanFrame) + Send + Sync + 'static,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let codec = config.build_codec();
        let pub_id = config.pub_id.unwrap_or_else(rand::random);
        let link = Arc::new(LinkWatch::new());
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = tokio::spawn(worker_loop(
            config,
            codec,
            pub_id,
            rx,
            Arc::from(Box::new(on_frame) as Box<FrameHandler>),
            link.clone(),
        ));

        Ok(Self {
            tx,
            link,
            pub_id,
            worker,
        })
    }

    /// Hand a frame from the emulated CAN controller to the bridge.
    ///
    /// Never blocks: the frame lands in an unbounded queue the worker
    /// drains. A failed enqueue can only mean the worker is gone.
    pub fn on_frame_received(&self, frame: CanFrame) {
        if self.tx.send(frame).is_err() {
            warn!("bridge worker gone, frame dropped");
        }
    }

    /// This instance's publish identifier.
    #[must_use]
    pub fn pub_id(&self) -> u32 {
        self.pub_id
    }

    /// Current broker link state.
    #[must_use]
    pub fn link_state(&self) -> LinkState {
        self.link.get()
    }
}

impl Drop for CanMqttBridge {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

/// Enrich an outbound frame with the optional fields the codec supports and
/// encode it. Returns the topic and wire payload.
fn prepare_outbound(
    codec: &dyn FrameCodec,
    channel: u8,
    mut frame: CanFrame,
    pub_id: u32,
    pub_cnt: u32,
    now_us: u64,
) -> Result<(String, Vec<u8>), CodecError> {
    if codec.supports_optional_field(OptionalField::PubId) {
        frame.pub_id = Some(pub_id);
    }
    if codec.supports_optional_field(OptionalField::PubCnt) {
        frame.pub_cnt = Some(pub_cnt);
    }
    if codec.supports_optional_field(OptionalField::TimeStamp) {
        frame.timestamp_us = Some(now_us);
    }
    let topic = topic::publish_topic(channel, &frame);
    let payload = codec.encode(&frame)?;
    Ok((topic, payload))
}

/// Decode and vet one inbound message. `None` means drop.
fn accept_inbound(
    codec: &dyn FrameCodec,
    channel: u8,
    topic: &str,
    payload: &[u8],
    own_pub_id: u32,
) -> Option<CanFrame> {
    let frame = match codec.decode(payload) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(%err, topic, "undecodable message dropped");
            return None;
        }
    };
    if !topic::matches_frame(topic, channel, &frame) {
        warn!(topic, "message on mismatched topic dropped");
        return None;
    }
    // Belt and braces for brokers that ignore the no-local option.
    if frame.pub_id == Some(own_pub_id) {
        debug!("own publication filtered by pubId");
        return None;
    }
    Some(frame)
}

fn unix_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_micros() as u64)
        .unwrap_or_default()
}

async fn worker_loop(
    config: BridgeConfig,
    codec: Box<dyn FrameCodec>,
    pub_id: u32,
    mut rx: mpsc::UnboundedReceiver<CanFrame>,
    on_frame: Arc<FrameHandler>,
    link: Arc<LinkWatch>,
) {
    let client_id = format!("canlab-bridge-{pub_id:08x}");
    let mut pub_cnt: u32 = 0;

    loop {
        link.set(LinkState::Connecting);
        let mut options = MqttOptions::new(
            client_id.clone(),
            config.broker.host.clone(),
            config.broker.port,
        );
        options.set_clean_start(true);
        options.set_keep_alive(Duration::from_secs(30));
        let (client, mut eventloop) = AsyncClient::new(options, CLIENT_QUEUE);

        // One broker session: ends on any connection error.
        loop {
            tokio::select! {
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        if ack.code != ConnectReturnCode::Success {
                            warn!(code = ?ack.code, "broker refused connection");
                            break;
                        }
                        info!(host = %config.broker.host, port = config.broker.port, "broker connected");
                        link.set(LinkState::Connected);
                        let mut filter =
                            Filter::new(topic::subscribe_filter(config.channel), QoS::AtMostOnce);
                        filter.nolocal = true;
                        if let Err(err) = client.subscribe_many([filter]).await {
                            warn!(%err, "subscribe failed");
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::SubAck(_))) => {
                        link.set(LinkState::Subscribed);
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let topic = String::from_utf8_lossy(&publish.topic).into_owned();
                        if let Some(frame) = accept_inbound(
                            codec.as_ref(),
                            config.channel,
                            &topic,
                            &publish.payload,
                            pub_id,
                        ) {
                            on_frame(frame);
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(%err, delay_s = RECONNECT_DELAY.as_secs(), "connection lost, retrying");
                        break;
                    }
                },
                queued = rx.recv() => match queued {
                    Some(frame) => {
                        match prepare_outbound(
                            codec.as_ref(),
                            config.channel,
                            frame,
                            pub_id,
                            pub_cnt,
                            unix_micros(),
                        ) {
                            Ok((topic, payload)) => {
                                match client.try_publish(topic, QoS::AtMostOnce, false, payload) {
                                    Ok(()) => pub_cnt = pub_cnt.wrapping_add(1),
                                    Err(err) => warn!(%err, "publish failed, frame dropped"),
                                }
                            }
                            Err(err) => warn!(%err, "encode failed, frame dropped"),
                        }
                    }
                    None => {
                        debug!("bridge handle dropped, worker exiting");
                        return;
                    }
                },
            }
        }

        link.set(LinkState::Disconnected);
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}
