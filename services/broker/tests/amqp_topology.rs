//! Broker-backed integration tests.
//!
//! These run against a throwaway RabbitMQ container and are ignored by
//! default; run them with `cargo test -- --ignored` on a machine with a
//! Docker daemon.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use lapin::options::{BasicConsumeOptions, BasicGetOptions};
use lapin::types::FieldTable;
use revid_broker::config::BrokerConfig;
use revid_broker::consumer::{ConsumerError, FrameConsumer, FrameHandler};
use revid_broker::messages::{CameraActivation, FramePayload};
use revid_broker::publisher::{ActivationPublisher, AmqpPublisher};
use revid_broker::topology::BrokerSession;
use testcontainers::clients::Cli;
use testcontainers::core::WaitFor;
use testcontainers::GenericImage;
use tokio::sync::mpsc;

fn rabbitmq() -> GenericImage {
    GenericImage::new("rabbitmq", "3.12")
        .with_exposed_port(5672)
        .with_wait_for(WaitFor::message_on_stdout("Server startup complete"))
}

fn config_for(port: u16) -> BrokerConfig {
    let mut config = BrokerConfig::default();
    config.port = port;
    config.reconnect_delay_secs = 1;
    config
}

fn sample_activation(camera_id: &str) -> CameraActivation {
    CameraActivation {
        camera_id: camera_id.to_string(),
        camera_url: "rtsp://example/stream".to_string(),
        running: true,
        user_id: "user-1".to_string(),
        object_list: vec!["person".to_string()],
    }
}

fn sample_frame(camera_id: &str) -> FramePayload {
    FramePayload {
        camera_id: camera_id.to_string(),
        frame: vec![0xff, 0xd8, 0xff],
        user_id: "user-1".to_string(),
        date_time: Utc::now(),
        object_list: vec!["person".to_string()],
    }
}

struct RecordingHandler {
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait::async_trait]
impl FrameHandler for RecordingHandler {
    async fn handle(&self, frame: FramePayload) -> Result<(), ConsumerError> {
        let _ = self.tx.send(frame.camera_id);
        Ok(())
    }
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn topology_declaration_is_idempotent() {
    let docker = Cli::default();
    let node = docker.run(rabbitmq());
    let config = config_for(node.get_host_port_ipv4(5672));

    let mut session = BrokerSession::connect(&config).await.expect("connect");

    session.declare_fanout("itest_fanout").await.expect("declare");
    session
        .declare_fanout("itest_fanout")
        .await
        .expect("redeclare with identical parameters");

    session
        .declare_durable_queue("itest_queue", "itest_fanout")
        .await
        .expect("declare queue");
    session
        .declare_durable_queue("itest_queue", "itest_fanout")
        .await
        .expect("redeclare queue with identical parameters");

    assert!(session.is_open());
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn fanout_delivers_one_copy_per_bound_queue() {
    let docker = Cli::default();
    let node = docker.run(rabbitmq());
    let config = config_for(node.get_host_port_ipv4(5672));

    let queues = ["itest_sub_a", "itest_sub_b", "itest_sub_c"];
    let mut session = BrokerSession::connect(&config).await.expect("connect");
    session
        .declare_fanout(&config.topology.activation_exchange)
        .await
        .expect("declare exchange");
    for queue in &queues {
        session
            .declare_durable_queue(queue, &config.topology.activation_exchange)
            .await
            .expect("declare and bind queue");
    }

    let publisher = AmqpPublisher::new(config.clone());
    publisher
        .publish_activation(sample_activation("cam-20"))
        .await
        .expect("publish");

    // Exactly one independently consumable copy per queue
    for queue in &queues {
        let message = session
            .channel()
            .basic_get(queue, BasicGetOptions { no_ack: true })
            .await
            .expect("get")
            .unwrap_or_else(|| panic!("no copy delivered to {queue}"));
        let activation: CameraActivation =
            serde_json::from_slice(&message.delivery.data).expect("decode");
        assert_eq!(activation.camera_id, "cam-20");

        let extra = session
            .channel()
            .basic_get(queue, BasicGetOptions { no_ack: true })
            .await
            .expect("get");
        assert!(extra.is_none(), "{queue} received more than one copy");
    }
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn late_subscribers_see_no_backlog() {
    let docker = Cli::default();
    let node = docker.run(rabbitmq());
    let config = config_for(node.get_host_port_ipv4(5672));

    let publisher = AmqpPublisher::new(config.clone());
    publisher
        .publish_activation(sample_activation("cam-early"))
        .await
        .expect("publish");

    // Bind after the publish: the broadcast is gone
    let mut session = BrokerSession::connect(&config).await.expect("connect");
    session
        .declare_durable_queue("itest_late", &config.topology.activation_exchange)
        .await
        .expect("bind late queue");

    let message = session
        .channel()
        .basic_get("itest_late", BasicGetOptions { no_ack: true })
        .await
        .expect("get");
    assert!(message.is_none());
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn consumer_resumes_after_broker_restart() {
    let docker = Cli::default();
    let node = docker.run(rabbitmq());
    let config = config_for(node.get_host_port_ipv4(5672));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let consumer = Arc::new(FrameConsumer::new(config.clone()));
    let handler = Arc::new(RecordingHandler { tx });

    let run_consumer = consumer.clone();
    let consumer_task = tokio::spawn(async move { run_consumer.run(handler).await });

    let publisher = AmqpPublisher::new(config.clone());
    publish_until_received(&publisher, "cam-before", &mut rx, Duration::from_secs(30)).await;

    // Drop the broker out from under the consumer mid-consume
    node.stop();
    tokio::time::sleep(Duration::from_secs(2)).await;
    node.start();

    publish_until_received(&publisher, "cam-after", &mut rx, Duration::from_secs(60)).await;

    consumer.shutdown();
    consumer_task.await.expect("consumer task");
}

/// The consumer binds its queue asynchronously and fanout has no backlog, so
/// publish repeatedly until one copy comes back.
async fn publish_until_received(
    publisher: &AmqpPublisher,
    camera_id: &str,
    rx: &mut mpsc::UnboundedReceiver<String>,
    deadline: Duration,
) {
    let received = tokio::time::timeout(deadline, async {
        loop {
            let _ = publisher.publish_frame(&sample_frame(camera_id)).await;
            match tokio::time::timeout(Duration::from_millis(500), rx.recv()).await {
                Ok(Some(id)) if id == camera_id => break,
                _ => continue,
            }
        }
    })
    .await;
    assert!(received.is_ok(), "no frame from {camera_id} within deadline");
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn frame_roundtrip_preserves_payload() {
    let docker = Cli::default();
    let node = docker.run(rabbitmq());
    let config = config_for(node.get_host_port_ipv4(5672));

    let mut session = BrokerSession::connect(&config).await.expect("connect");
    session
        .declare_fanout(&config.topology.frame_exchange)
        .await
        .expect("declare exchange");
    session
        .declare_durable_queue(&config.topology.frame_queue, &config.topology.frame_exchange)
        .await
        .expect("bind queue");

    let publisher = AmqpPublisher::new(config.clone());
    let sent = sample_frame("cam-21");
    publisher.publish_frame(&sent).await.expect("publish");

    let mut deliveries = session
        .channel()
        .basic_consume(
            &config.topology.frame_queue,
            "itest-consumer",
            BasicConsumeOptions {
                no_ack: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .expect("consume");

    let delivery = tokio::time::timeout(Duration::from_secs(10), deliveries.next())
        .await
        .expect("timed out")
        .expect("stream ended")
        .expect("delivery error");

    let received: FramePayload = serde_json::from_slice(&delivery.data).expect("decode");
    assert_eq!(received, sent);
}
