//! Integration tests for the in-process broker.

use std::time::Duration;

use meshpoint_bus::{subject, Bus};
use meshpoint_types::MeshpointError;

#[tokio::test]
async fn publish_preserves_payload_bytes() {
    let bus = Bus::new();
    let mut sub = bus.subscribe("node.*.points").unwrap();

    let payload = vec![0x00, 0xff, 0x7f, 0x80, 0x01];
    bus.publish(&subject::node_points("n1"), payload.clone())
        .unwrap();

    let msg = sub.recv().await.unwrap();
    assert_eq!(msg.subject, "node.n1.points");
    assert_eq!(msg.payload, payload);
    assert!(msg.reply.is_none());
}

#[tokio::test]
async fn per_subject_fifo_order() {
    let bus = Bus::new();
    let mut sub = bus.subscribe("node.n1.points").unwrap();

    for i in 0u8..100 {
        bus.publish("node.n1.points", vec![i]).unwrap();
    }

    for i in 0u8..100 {
        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.payload, vec![i]);
    }
}

#[tokio::test]
async fn wildcard_delivers_only_matching_subjects() {
    let bus = Bus::new();
    let mut points = bus.subscribe("node.*.points").unwrap();
    let mut reads = bus.subscribe("node.*").unwrap();

    bus.publish("node.a.points", vec![1]).unwrap();
    bus.publish("node.a", vec![2]).unwrap();
    bus.publish("node.a.b.points", vec![3]).unwrap();

    assert_eq!(points.recv().await.unwrap().payload, vec![1]);
    assert_eq!(reads.recv().await.unwrap().payload, vec![2]);
    // neither sub sees the edge write
    assert_eq!(points.depth(), 0);
    assert_eq!(reads.depth(), 0);
}

#[tokio::test]
async fn request_reply_round_trip() {
    let bus = Bus::new();
    let mut sub = bus.subscribe("node.*").unwrap();

    let responder = bus.clone();
    let server = tokio::spawn(async move {
        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.payload, b"all".to_vec());
        responder.respond(&msg, b"reply-bytes".to_vec());
    });

    let reply = bus
        .request("node.n1", b"all".to_vec(), Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(reply, b"reply-bytes".to_vec());
    server.await.unwrap();
}

#[tokio::test]
async fn request_times_out_without_responder() {
    let bus = Bus::new();
    let err = bus
        .request("node.n1", Vec::new(), Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(matches!(err, MeshpointError::Timeout { .. }));
}

#[tokio::test]
async fn close_ends_subscriber_streams() {
    let bus = Bus::new();
    let mut sub = bus.subscribe("node.*.points").unwrap();

    bus.close();

    assert!(sub.recv().await.is_none());
    assert!(bus.publish("node.n1.points", Vec::new()).is_err());
    assert!(bus.subscribe("node.*").is_err());
}

#[tokio::test]
async fn depth_tracks_queued_messages() {
    let bus = Bus::new();
    let mut sub = bus.subscribe("node.*.points").unwrap();

    for _ in 0..5 {
        bus.publish("node.n1.points", Vec::new()).unwrap();
    }
    assert_eq!(sub.depth(), 5);

    sub.recv().await.unwrap();
    assert_eq!(sub.depth(), 4);
}

#[tokio::test]
async fn dropped_subscription_stops_receiving() {
    let bus = Bus::new();
    let sub = bus.subscribe("node.*.points").unwrap();
    drop(sub);

    // must not error against the dead subscriber
    bus.publish("node.n1.points", Vec::new()).unwrap();
    bus.publish("node.n1.points", Vec::new()).unwrap();
}
