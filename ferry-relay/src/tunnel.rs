//! The tunnel record: one buffered upload waiting for its downloader.

use axum::body::Bytes;
use ferry_core::{Link, SaveMinutes, TransferOptions};
use std::time::{Duration, SystemTime};
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Who sent a tunnel and how they configured it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderInfo {
    /// Verified subdomain, when the uploader's SSH key is linked to one.
    pub subdomain: Option<String>,
    /// Directives parsed from the SSH command.
    pub options: TransferOptions,
}

/// A published tunnel.
///
/// Immutable once published; HTTP handlers share it through `Arc` and read
/// the payload without locking.
#[derive(Debug)]
pub struct Tunnel {
    /// The public key addressing this tunnel.
    pub link: Link,
    /// The uploaded bytes.
    pub payload: Bytes,
    /// Wall-clock time the link was handed to the sender.
    pub sent_at: SystemTime,
    /// Monotonic twin of `sent_at`, for elapsed time and the expiry timer.
    pub published_at: Instant,
    /// Effective lifetime.
    pub ttl: SaveMinutes,
    /// Sender identity and options.
    pub sender: SenderInfo,
}

impl Tunnel {
    /// Build a tunnel published now.
    pub fn new(link: Link, payload: Bytes, ttl: SaveMinutes, sender: SenderInfo) -> Self {
        Self {
            link,
            payload,
            sent_at: SystemTime::now(),
            published_at: Instant::now(),
            ttl,
            sender,
        }
    }

    /// Size of the payload in bytes.
    pub fn size(&self) -> u64 {
        self.payload.len() as u64
    }

    /// `sent_at + ttl`.
    pub fn expires_at(&self) -> SystemTime {
        self.sent_at + self.ttl.as_duration()
    }

    /// Monotonic deadline for the expiry timer.
    pub fn deadline(&self) -> Instant {
        self.published_at + self.ttl.as_duration()
    }

    /// Time since the link was sent.
    pub fn elapsed(&self) -> Duration {
        self.published_at.elapsed()
    }

    /// Name the file is delivered under: the `filename=` override, else the link.
    pub fn content_name(&self) -> &str {
        self.sender
            .options
            .filename
            .as_deref()
            .unwrap_or_else(|| self.link.as_str())
    }
}

/// Sending halves of a tunnel's two one-shot notifications.
///
/// Held by the registry entry, so whoever removes the entry owns them and
/// is the only party able to fire one.
#[derive(Debug)]
pub struct TunnelSignals {
    completed: oneshot::Sender<()>,
    deleted: oneshot::Sender<()>,
}

/// Receiving halves, held by the upload session.
#[derive(Debug)]
pub struct TunnelWatch {
    /// Fires when the tunnel was downloaded.
    pub completed: oneshot::Receiver<()>,
    /// Fires when the tunnel was deleted.
    pub deleted: oneshot::Receiver<()>,
}

/// Create a matched signal pair.
pub fn signal_pair() -> (TunnelSignals, TunnelWatch) {
    let (completed_tx, completed_rx) = oneshot::channel();
    let (deleted_tx, deleted_rx) = oneshot::channel();
    (
        TunnelSignals {
            completed: completed_tx,
            deleted: deleted_tx,
        },
        TunnelWatch {
            completed: completed_rx,
            deleted: deleted_rx,
        },
    )
}

impl TunnelSignals {
    /// Report a download. The delete signal is dropped unfired.
    pub fn complete(self) {
        // The session may already be gone; nothing to do then.
        let _ = self.completed.send(());
    }

    /// Report a deletion. The completion signal is dropped unfired.
    pub fn delete(self) {
        let _ = self.deleted.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tunnel(filename: Option<&str>) -> Tunnel {
        Tunnel::new(
            Link::parse("abc1234").unwrap(),
            Bytes::from_static(b"hello"),
            SaveMinutes::new(5).unwrap(),
            SenderInfo {
                subdomain: None,
                options: TransferOptions {
                    filename: filename.map(String::from),
                    ..Default::default()
                },
            },
        )
    }

    #[test]
    fn content_name_prefers_override() {
        assert_eq!(tunnel(Some("main.txt")).content_name(), "main.txt");
        assert_eq!(tunnel(None).content_name(), "abc1234");
    }

    #[tokio::test]
    async fn expiry_follows_ttl() {
        let t = tunnel(None);
        assert_eq!(t.size(), 5);
        assert_eq!(
            t.expires_at().duration_since(t.sent_at).unwrap(),
            Duration::from_secs(300)
        );
        assert_eq!(t.deadline() - t.published_at, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn complete_fires_only_completion() {
        let (signals, mut watch) = signal_pair();
        signals.complete();
        assert!(watch.completed.try_recv().is_ok());
        assert!(watch.deleted.try_recv().is_err());
    }

    #[tokio::test]
    async fn delete_fires_only_deletion() {
        let (signals, mut watch) = signal_pair();
        signals.delete();
        assert!(watch.deleted.try_recv().is_ok());
        assert!(watch.completed.try_recv().is_err());
    }
}
