//! Tag read path tests over the simulated reader
//!
//! Tags are presented through the channel handle as an operator would hold
//! them to the reader; the checks are on the payloads that come out.


use tagbridge::protocol::TextPolicy;
use tagbridge::tag::{
    AuthKey, ChannelTransceiver, SimulatedTag, TagError, TagReadPipeline, TagTransceiver,
};
use tagbridge::testing::MockBroker;
use tagbridge::Bridge;
use test_helpers::*;
use tokio::sync::watch;

#[tokio::test]
async fn test_each_presentation_reads_once() {
    let (reader, handle) = ChannelTransceiver::new();
    let mut pipeline = TagReadPipeline::new(reader, 4, 2, TextPolicy::Trim).unwrap();

    for text in ["FIRST", "SECOND", "FIRST"] {
        handle
            .present(SimulatedTag::with_text(4, text).unwrap())
            .await
            .unwrap();
    }

    let payloads: Vec<String> = std::iter::from_fn(|| pipeline.poll())
        .map(|result| result.unwrap().to_string())
        .collect();

    assert_eq!(
        payloads,
        vec!["FIRST Cabin 2", "SECOND Cabin 2", "FIRST Cabin 2"]
    );
    assert_eq!(pipeline.reader().released(), 3);
}

#[tokio::test]
async fn test_text_policy_controls_padding() {
    let (reader, handle) = ChannelTransceiver::new();
    let mut raw = TagReadPipeline::new(reader, 4, 7, TextPolicy::Raw).unwrap();
    handle
        .present(SimulatedTag::with_text(4, "AB").unwrap())
        .await
        .unwrap();

    let payload = raw.poll().unwrap().unwrap();
    // Raw keeps every block byte, padding included
    let mut expected = b"AB".to_vec();
    expected.extend_from_slice(&[0u8; 14]);
    expected.extend_from_slice(b" Cabin 7");
    assert_eq!(payload.as_bytes(), expected.as_slice());

    let (reader, handle) = ChannelTransceiver::new();
    let mut printable = TagReadPipeline::new(reader, 4, 7, TextPolicy::Printable).unwrap();
    handle
        .present(SimulatedTag::with_text(4, "A\u{1}B").unwrap())
        .await
        .unwrap();
    assert_eq!(printable.poll().unwrap().unwrap().to_string(), "A?B Cabin 7");
}

#[tokio::test]
async fn test_failed_tag_does_not_block_the_next() {
    let (reader, handle) = ChannelTransceiver::new();
    let mut pipeline = TagReadPipeline::new(reader, 4, 1, TextPolicy::Trim).unwrap();

    let locked = SimulatedTag::with_text(4, "LOCKED")
        .unwrap()
        .with_key(AuthKey::new([0x12; 6]));
    handle.present(locked).await.unwrap();
    handle
        .present(SimulatedTag::with_text(4, "OPEN").unwrap())
        .await
        .unwrap();

    let err = pipeline.poll().unwrap().unwrap_err();
    assert!(matches!(err, TagError::AuthFailed { .. }));
    assert_eq!(pipeline.poll().unwrap().unwrap().to_string(), "OPEN Cabin 1");
    assert_eq!(pipeline.reader().released(), 2);
}

#[tokio::test]
async fn test_reads_require_a_session() {
    let (mut reader, handle) = ChannelTransceiver::new();
    handle
        .present(SimulatedTag::with_text(4, "X").unwrap())
        .await
        .unwrap();

    assert!(reader.presence_detected());
    assert!(reader.read_block(4).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_presented_tags_reach_the_broker() {
    let config = test_config();
    let (reader, handle) = ChannelTransceiver::new();
    let mut bridge = Bridge::new(
        &config,
        MockBroker::new(),
        reader,
        Box::new(tagbridge::protocol::LogDisplay),
    )
    .unwrap();
    let (_tx, mut rx) = watch::channel(false);

    handle
        .present(SimulatedTag::with_text(4, "MERT2025GMLK9999").unwrap())
        .await
        .unwrap();
    handle
        .present(SimulatedTag::with_text(4, "KAZAK2025BLUE001").unwrap())
        .await
        .unwrap();

    for _ in 0..3 {
        bridge.run_iteration(&mut rx).await;
    }

    assert_eq!(
        bridge.broker().published_on(TAG_TOPIC),
        vec!["MERT2025GMLK9999 Cabin 2", "KAZAK2025BLUE001 Cabin 2"]
    );
    assert_eq!(bridge.reader().released(), 2);
}
