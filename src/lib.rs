pub mod activation;
pub mod bridge;
pub mod config;
pub mod host;
pub mod mailbox;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use bridge::{ChannelError, MethodChannel};
use config::HostConfig;
use mailbox::{DeepLinkMailbox, LinkDisposition, MailboxError, MailboxState};

/// Shared host state passed to every connection handler.
#[derive(Clone)]
pub struct HostContext {
    pub config: Arc<HostConfig>,
    /// The pending-link mailbox. The mailbox itself is single-threaded; this
    /// mutex serializes the activation handlers and the runtime attach path,
    /// which run on different tasks.
    mailbox: Arc<Mutex<DeepLinkMailbox<MethodChannel>>>,
    pub started_at: std::time::Instant,
}

impl HostContext {
    pub fn new(config: HostConfig) -> Self {
        let mailbox = DeepLinkMailbox::new(config.channel.method.clone());
        Self {
            config: Arc::new(config),
            mailbox: Arc::new(Mutex::new(mailbox)),
            started_at: std::time::Instant::now(),
        }
    }

    /// Route an observed deep link through the mailbox.
    ///
    /// A delivery failure propagates to the caller untouched — the mailbox
    /// defines no recovery policy for that path.
    pub async fn deliver_link(&self, link: &str) -> Result<LinkDisposition, ChannelError> {
        let disposition = self.mailbox.lock().await.on_link_arrived(link)?;
        match disposition {
            LinkDisposition::Delivered => info!(link = %link, "deep link forwarded to runtime"),
            LinkDisposition::Buffered => {
                info!(link = %link, "deep link buffered until runtime attaches")
            }
        }
        Ok(disposition)
    }

    /// Bind the runtime's method channel, flushing any buffered link.
    pub async fn attach_runtime(&self, channel: MethodChannel) -> Result<(), MailboxError> {
        self.mailbox.lock().await.on_channel_ready(channel)
    }

    /// Current mailbox lifecycle state (diagnostics and tests).
    pub async fn mailbox_state(&self) -> MailboxState {
        self.mailbox.lock().await.state()
    }
}
