//! Two bridge instances sharing one broker channel.
//!
//! Instance A publishes a handful of frames; instance B, subscribed on the
//! same channel, prints what arrives. A's own subscription stays silent —
//! the no-local flag (and the pubId filter behind it) keeps self-traffic
//! out.
//!
//! Needs a broker on localhost, e.g. `mosquitto -p 1883`, then:
//! `cargo run -p bridge --example channel_echo`.

use std::time::Duration;

use bridge::{
    BridgeConfig, BrokerAddr, CanFrame, CanMqttBridge, CobId, OptionalFields, WireFormat,
};

fn config(pub_id: u32) -> BridgeConfig {
    BridgeConfig {
        broker: BrokerAddr::parse("mqtt://127.0.0.1:1883").expect("static uri"),
        channel: 1,
        format: WireFormat::Json,
        optional_fields: OptionalFields::ALL,
        pub_id: Some(pub_id),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let sender = CanMqttBridge::new(config(0xA), |frame| {
        println!("A heard its own channel?! {frame:?}");
    })
    .expect("valid config");

    let receiver = CanMqttBridge::new(config(0xB), |frame| {
        println!(
            "B received cobId={:?} pubCnt={:?}",
            frame.cob_id(),
            frame.pub_cnt
        );
    })
    .expect("valid config");

    // Give both instances a moment to subscribe.
    tokio::time::sleep(Duration::from_millis(500)).await;
    println!("sender link: {:?}", sender.link_state());
    println!("receiver link: {:?}", receiver.link_state());

    for i in 0..5u8 {
        let frame = CanFrame::data(CobId::new(0x123).expect("static id"), vec![i, i + 1])
            .expect("payload fits");
        sender.on_frame_received(frame);
    }
    sender.on_frame_received(CanFrame::remote(CobId::new(0x200).expect("static id")));
    sender.on_frame_received(CanFrame::error());

    tokio::time::sleep(Duration::from_secs(1)).await;
}
