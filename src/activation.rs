// SPDX-License-Identifier: MIT
//! Single-instance activation frames.
//!
//! The OS launches `deeplinkd open <url>` for every deep link. If an instance
//! is already listening, the new process hands its link over as one JSON
//! object per line on a plain TCP connection and exits — the desktop analog
//! of a platform re-activation callback. A frame without a link is
//! acknowledged and ignored by the host.

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// One activation event. `link` is absent when the process was activated
/// without routing data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// Reply line from the running instance.
#[derive(Debug, Serialize, Deserialize)]
pub struct ActivationAck {
    pub ok: bool,
}

/// Hand a link to the already-running instance over `stream`.
///
/// Waits for the acknowledgement line so the forwarding process only exits
/// once the host has taken ownership of the link.
pub async fn forward_link(mut stream: TcpStream, link: &str) -> anyhow::Result<()> {
    let frame = serde_json::to_string(&ActivationFrame {
        link: Some(link.to_string()),
    })?;
    stream.write_all(frame.as_bytes()).await?;
    stream.write_all(b"\n").await?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .await
        .context("running instance closed the connection before acknowledging")?;
    let ack: ActivationAck =
        serde_json::from_str(line.trim()).context("malformed activation ack")?;
    anyhow::ensure!(ack.ok, "running instance rejected the activation");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips() {
        let frame = ActivationFrame {
            link: Some("app://movie/42".to_string()),
        };
        let json = serde_json::to_string(&frame).unwrap();
        let parsed: ActivationFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.link.as_deref(), Some("app://movie/42"));
    }

    #[test]
    fn missing_link_field_parses_as_none() {
        let parsed: ActivationFrame = serde_json::from_str("{}").unwrap();
        assert!(parsed.link.is_none());
    }

    #[test]
    fn linkless_frame_serializes_without_the_field() {
        let frame = ActivationFrame { link: None };
        assert_eq!(serde_json::to_string(&frame).unwrap(), "{}");
    }
}
