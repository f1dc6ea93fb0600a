// SPDX-License-Identifier: MIT
//! Pending-link mailbox between the host shell and the embedded runtime.
//!
//! The host observes deep-link activations before the runtime has opened its
//! method channel. The mailbox buffers the most recent undelivered link and
//! guarantees every observed link is pushed through the channel exactly once,
//! in arrival order, as soon as a channel is available.
//!
//! # State machine
//!
//! ```text
//! Detached ──(on_channel_ready)──► Attached
//!    │ ▲                             │ ▲
//!    └─┘ on_link_arrived (buffer)    └─┘ on_link_arrived (deliver)
//! ```
//!
//! - **Detached**: no channel yet. An arriving link is stored in the single
//!   pending slot, overwriting any previously stored value (last-write-wins).
//! - **Attached**: every arriving link is invoked on the channel immediately
//!   and never retained. The transition flushes a buffered link, so the slot
//!   is always empty while a channel is attached.
//!
//! The mailbox owns its state exclusively and takes `&mut self`; callers on
//! multiple tasks must wrap it in a mutex ([`crate::HostContext`] does).

use tracing::{debug, info};

use crate::bridge::{ChannelError, DeliveryChannel};

/// Observable lifecycle state of a [`DeepLinkMailbox`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxState {
    /// No delivery channel yet — links are buffered.
    Detached,
    /// A delivery channel is bound — links are delivered immediately.
    Attached,
}

impl std::fmt::Display for MailboxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailboxState::Detached => write!(f, "detached"),
            MailboxState::Attached => write!(f, "attached"),
        }
    }
}

/// What happened to a link handed to [`DeepLinkMailbox::on_link_arrived`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDisposition {
    /// Invoked on the channel synchronously.
    Delivered,
    /// Stored in the pending slot until a channel attaches.
    Buffered,
}

/// Errors from mailbox operations.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    /// `on_channel_ready` was called a second time. The channel binding is
    /// one-shot per mailbox lifetime; re-configuration is not supported.
    #[error("a delivery channel is already attached")]
    AlreadyAttached,
    /// Delivery through the channel failed. Propagated unhandled — the
    /// mailbox has no retry policy and does not retain the failed link.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Single-slot mailbox holding at most one undelivered deep link.
///
/// Generic over the channel so tests can substitute a recording fake for the
/// wire-backed [`crate::bridge::MethodChannel`].
#[derive(Debug)]
pub struct DeepLinkMailbox<C: DeliveryChannel> {
    /// Outbound method invoked for every delivered link, e.g. `handleDeepLink`.
    method: String,
    channel: Option<C>,
    pending: Option<String>,
}

impl<C: DeliveryChannel> DeepLinkMailbox<C> {
    /// Create a detached mailbox delivering links via the given method name.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            channel: None,
            pending: None,
        }
    }

    /// A new deep link was observed by the host platform.
    ///
    /// Attached: invoke the channel with the link immediately; the link is
    /// not retained, and a channel error propagates to the caller as-is.
    /// Detached: store the link, discarding any previously buffered value.
    ///
    /// The payload is passed through unchanged — empty or malformed links are
    /// not an error at this layer.
    pub fn on_link_arrived(
        &mut self,
        link: impl Into<String>,
    ) -> Result<LinkDisposition, ChannelError> {
        let link = link.into();
        match &self.channel {
            Some(channel) => {
                channel.invoke(&self.method, &link)?;
                debug!(channel = channel.name(), link = %link, "deep link delivered");
                Ok(LinkDisposition::Delivered)
            }
            None => {
                if let Some(dropped) = self.pending.replace(link) {
                    debug!(dropped = %dropped, "pending link overwritten before delivery");
                }
                Ok(LinkDisposition::Buffered)
            }
        }
    }

    /// The runtime's delivery channel became available.
    ///
    /// Binds the channel and flushes a buffered link through it. The pending
    /// slot is cleared even if the flush fails; the mailbox has no retry
    /// policy.
    ///
    /// The binding is one-shot: a second call returns
    /// [`MailboxError::AlreadyAttached`] and performs no delivery.
    pub fn on_channel_ready(&mut self, channel: C) -> Result<(), MailboxError> {
        if self.channel.is_some() {
            return Err(MailboxError::AlreadyAttached);
        }
        info!(channel = channel.name(), "delivery channel attached");
        let channel = self.channel.insert(channel);
        if let Some(link) = self.pending.take() {
            channel.invoke(&self.method, &link)?;
            debug!(channel = channel.name(), link = %link, "buffered link flushed");
        }
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> MailboxState {
        if self.channel.is_some() {
            MailboxState::Attached
        } else {
            MailboxState::Detached
        }
    }

    /// The buffered, not-yet-delivered link, if any.
    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    /// Records every invocation; can be flipped to fail like a closed socket.
    #[derive(Clone)]
    struct RecordingChannel {
        calls: Rc<RefCell<Vec<(String, String)>>>,
        closed: Rc<RefCell<bool>>,
    }

    impl RecordingChannel {
        fn new() -> Self {
            Self {
                calls: Rc::new(RefCell::new(Vec::new())),
                closed: Rc::new(RefCell::new(false)),
            }
        }

        fn close(&self) {
            *self.closed.borrow_mut() = true;
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.borrow().clone()
        }
    }

    impl DeliveryChannel for RecordingChannel {
        fn name(&self) -> &str {
            "deep_link_channel"
        }

        fn invoke(&self, method: &str, argument: &str) -> Result<(), ChannelError> {
            if *self.closed.borrow() {
                return Err(ChannelError::Closed {
                    name: self.name().to_string(),
                });
            }
            self.calls
                .borrow_mut()
                .push((method.to_string(), argument.to_string()));
            Ok(())
        }
    }

    fn mailbox() -> DeepLinkMailbox<RecordingChannel> {
        DeepLinkMailbox::new("handleDeepLink")
    }

    #[test]
    fn starts_detached_and_empty() {
        let mb = mailbox();
        assert_eq!(mb.state(), MailboxState::Detached);
        assert_eq!(mb.pending(), None);
    }

    #[test]
    fn buffered_link_is_flushed_on_attach() {
        let mut mb = mailbox();
        let ch = RecordingChannel::new();

        assert_eq!(
            mb.on_link_arrived("app://movie/42").unwrap(),
            LinkDisposition::Buffered
        );
        assert_eq!(mb.pending(), Some("app://movie/42"));

        mb.on_channel_ready(ch.clone()).unwrap();
        assert_eq!(
            ch.calls(),
            vec![("handleDeepLink".to_string(), "app://movie/42".to_string())]
        );
        assert_eq!(mb.pending(), None);
        assert_eq!(mb.state(), MailboxState::Attached);
    }

    #[test]
    fn link_after_attach_is_delivered_immediately() {
        let mut mb = mailbox();
        let ch = RecordingChannel::new();
        mb.on_channel_ready(ch.clone()).unwrap();

        assert_eq!(
            mb.on_link_arrived("app://movie/7").unwrap(),
            LinkDisposition::Delivered
        );
        assert_eq!(
            ch.calls(),
            vec![("handleDeepLink".to_string(), "app://movie/7".to_string())]
        );
        assert_eq!(mb.pending(), None);
    }

    #[test]
    fn last_write_wins_before_attach() {
        let mut mb = mailbox();
        let ch = RecordingChannel::new();

        mb.on_link_arrived("A").unwrap();
        mb.on_link_arrived("B").unwrap();
        mb.on_channel_ready(ch.clone()).unwrap();

        // Only the most recent link is ever delivered; "A" is dropped.
        assert_eq!(ch.calls(), vec![("handleDeepLink".to_string(), "B".to_string())]);
    }

    #[test]
    fn attach_with_empty_slot_delivers_nothing() {
        let mut mb = mailbox();
        let ch = RecordingChannel::new();
        mb.on_channel_ready(ch.clone()).unwrap();
        assert!(ch.calls().is_empty());
    }

    #[test]
    fn links_after_attach_arrive_in_order() {
        let mut mb = mailbox();
        let ch = RecordingChannel::new();
        mb.on_channel_ready(ch.clone()).unwrap();

        mb.on_link_arrived("app://a").unwrap();
        mb.on_link_arrived("app://b").unwrap();
        mb.on_link_arrived("app://c").unwrap();

        let args: Vec<String> = ch.calls().into_iter().map(|(_, a)| a).collect();
        assert_eq!(args, vec!["app://a", "app://b", "app://c"]);
    }

    #[test]
    fn second_attach_is_rejected_without_delivery() {
        let mut mb = mailbox();
        let first = RecordingChannel::new();
        let second = RecordingChannel::new();
        mb.on_channel_ready(first.clone()).unwrap();

        let err = mb.on_channel_ready(second.clone()).unwrap_err();
        assert!(matches!(err, MailboxError::AlreadyAttached));
        assert!(second.calls().is_empty());

        // The original channel still receives deliveries.
        mb.on_link_arrived("app://still-works").unwrap();
        assert_eq!(first.calls().len(), 1);
    }

    #[test]
    fn closed_channel_error_propagates_and_link_is_not_retained() {
        let mut mb = mailbox();
        let ch = RecordingChannel::new();
        mb.on_channel_ready(ch.clone()).unwrap();
        ch.close();

        let err = mb.on_link_arrived("app://lost").unwrap_err();
        assert!(matches!(err, ChannelError::Closed { .. }));
        // No recovery policy: the failed link is gone, the slot stays empty.
        assert_eq!(mb.pending(), None);
        assert_eq!(mb.state(), MailboxState::Attached);
    }

    #[test]
    fn failed_flush_clears_the_pending_slot() {
        let mut mb = mailbox();
        let ch = RecordingChannel::new();
        ch.close();

        mb.on_link_arrived("app://doomed").unwrap();
        let err = mb.on_channel_ready(ch).unwrap_err();
        assert!(matches!(err, MailboxError::Channel(_)));
        assert_eq!(mb.pending(), None);
        assert_eq!(mb.state(), MailboxState::Attached);
    }

    #[test]
    fn empty_link_passes_through_unchanged() {
        let mut mb = mailbox();
        let ch = RecordingChannel::new();
        mb.on_channel_ready(ch.clone()).unwrap();

        mb.on_link_arrived("").unwrap();
        assert_eq!(ch.calls(), vec![("handleDeepLink".to_string(), String::new())]);
    }
}
