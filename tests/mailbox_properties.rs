//! Property tests for the pending-link mailbox, driven through the real
//! wire-backed channel: invocations are observed as the JSON-RPC frames the
//! runtime would receive.

use deeplinkd::bridge::MethodChannel;
use deeplinkd::mailbox::DeepLinkMailbox;
use proptest::prelude::*;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Drain every queued frame and return the delivered link arguments.
fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<String> {
    let mut links = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        let Message::Text(text) = msg else {
            panic!("unexpected frame: {msg:?}");
        };
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["method"], "handleDeepLink");
        links.push(v["params"].as_str().unwrap().to_string());
    }
    links
}

proptest! {
    /// Any number of links may arrive before the channel is ready; exactly
    /// the final one is delivered on attach, exactly once.
    #[test]
    fn only_the_last_pre_attach_link_is_delivered(links in prop::collection::vec(any::<String>(), 0..8)) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = MethodChannel::new("deep_link_channel", tx);
        let mut mailbox = DeepLinkMailbox::new("handleDeepLink");

        for link in &links {
            mailbox.on_link_arrived(link.clone()).unwrap();
        }
        mailbox.on_channel_ready(channel).unwrap();

        let delivered = drain(&mut rx);
        match links.last() {
            Some(last) => prop_assert_eq!(delivered, vec![last.clone()]),
            None => prop_assert!(delivered.is_empty()),
        }
    }

    /// Every link arriving after attach is delivered immediately, exactly
    /// once, in arrival order.
    #[test]
    fn post_attach_links_are_delivered_in_order(links in prop::collection::vec(any::<String>(), 0..16)) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = MethodChannel::new("deep_link_channel", tx);
        let mut mailbox = DeepLinkMailbox::new("handleDeepLink");
        mailbox.on_channel_ready(channel).unwrap();

        for link in &links {
            mailbox.on_link_arrived(link.clone()).unwrap();
        }

        prop_assert_eq!(drain(&mut rx), links);
        prop_assert_eq!(mailbox.pending(), None);
    }

    /// Mixed timeline: pre-attach links collapse to the last one, post-attach
    /// links all follow in order.
    #[test]
    fn mixed_timeline_preserves_order_and_exactly_once(
        before in prop::collection::vec(any::<String>(), 0..6),
        after in prop::collection::vec(any::<String>(), 0..6),
    ) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let channel = MethodChannel::new("deep_link_channel", tx);
        let mut mailbox = DeepLinkMailbox::new("handleDeepLink");

        for link in &before {
            mailbox.on_link_arrived(link.clone()).unwrap();
        }
        mailbox.on_channel_ready(channel).unwrap();
        for link in &after {
            mailbox.on_link_arrived(link.clone()).unwrap();
        }

        let mut expected: Vec<String> = Vec::new();
        expected.extend(before.last().cloned());
        expected.extend(after.iter().cloned());
        prop_assert_eq!(drain(&mut rx), expected);
    }
}
