//! Per-upload session management.
//!
//! Each SSH exec/shell request gets an `UploadSession` that reserves a link,
//! buffers the piped bytes, parses the directives, publishes the tunnel and
//! then waits for exactly one of download, delete, or expiry.

use crate::config::{TimeoutMode, UploadConfig};
use crate::console::{self, LinkUrls, SenderConsole};
use crate::error::{UploadError, UploadResult};
use crate::registry::Registry;
use crate::server::FerryRelay;
use crate::tunnel::{SenderInfo, Tunnel, TunnelWatch};
use axum::body::Bytes;
use ferry_core::{parse_directives, ttl_label};
use std::net::IpAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;

/// What the SSH front-end knows about an upload before any bytes arrive.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    /// Raw command string; `None` for a plain shell request.
    pub command: Option<String>,
    /// Source address of the SSH connection.
    pub peer_ip: Option<IpAddr>,
    /// SHA-256 fingerprint of the key the sender authenticated with.
    pub fingerprint: Option<String>,
}

/// One event from the sender's channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadChunk {
    /// Bytes piped in by the sender.
    Data(Vec<u8>),
    /// The sender signalled end of input.
    Eof,
}

/// How an armed tunnel ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// A direct download consumed the tunnel.
    Downloaded,
    /// The delete link revoked the tunnel.
    Deleted,
    /// The lifetime ran out first.
    Expired,
}

/// Upload session state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Link reserved, nothing received yet.
    Created,
    /// Copying bytes from the SSH channel.
    Buffering,
    /// Published; waiting for a terminal event.
    Armed,
    /// Terminal.
    Finished(SessionOutcome),
    /// Ended before it was armed, or lost its console while armed.
    Failed,
}

/// One upload, from reservation to terminal outcome.
pub struct UploadSession<C> {
    relay: Arc<FerryRelay>,
    request: UploadRequest,
    console: C,
    state: UploadState,
}

impl<C: SenderConsole> UploadSession<C> {
    /// Create a new session.
    pub fn new(relay: Arc<FerryRelay>, request: UploadRequest, console: C) -> Self {
        Self {
            relay,
            request,
            console,
            state: UploadState::Created,
        }
    }

    fn transition(&mut self, next: UploadState) {
        tracing::debug!(from = ?self.state, to = ?next, "Upload state change");
        self.state = next;
    }

    /// Run the session until it reaches a terminal state.
    ///
    /// `chunks` yields the bytes the sender pipes in and must end with
    /// [`UploadChunk::Eof`]. A channel that closes without one is a cut-off
    /// upload. Failures are reported to the sender as help text before
    /// returning.
    pub async fn run(mut self, chunks: mpsc::Receiver<UploadChunk>) -> UploadResult<SessionOutcome> {
        match self.drive(chunks).await {
            Ok(outcome) => {
                self.transition(UploadState::Finished(outcome));
                if let Err(e) = self.console.write_text(&console::outcome_text(outcome)).await {
                    tracing::debug!("Sender left before the outcome was reported: {}", e);
                }
                Ok(outcome)
            }
            Err(e) => {
                self.transition(UploadState::Failed);
                self.relay
                    .metrics()
                    .upload_failures
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(ip = ?self.request.peer_ip, "Upload failed: {}", e);
                let _ = self.console.write_text(&console::help_text(&e)).await;
                Err(e)
            }
        }
    }

    async fn drive(&mut self, mut chunks: mpsc::Receiver<UploadChunk>) -> UploadResult<SessionOutcome> {
        let relay = Arc::clone(&self.relay);
        let config = relay.config();
        let subdomain = self.resolve_subdomain().await;

        let reservation = relay.registry().reserve()?;
        tracing::debug!(link = %reservation.link(), "Upload session created");

        // Every early return below drops the reservation, which retracts it.
        self.transition(UploadState::Buffering);
        let payload = buffer_upload(&mut chunks, &config.upload).await?;

        let options = parse_directives(self.request.command.as_deref().unwrap_or(""))?;
        let ttl = options.effective_ttl(config.upload.default_ttl());

        self.record_usage().await;

        let size = payload.len() as u64;
        let (tunnel, watch) = reservation.publish(
            payload,
            ttl,
            SenderInfo {
                subdomain: subdomain.clone(),
                options,
            },
        );
        self.transition(UploadState::Armed);

        let metrics = relay.metrics();
        metrics.uploads_total.fetch_add(1, Ordering::Relaxed);
        metrics.bytes_received.fetch_add(size, Ordering::Relaxed);
        tracing::info!(
            link = %tunnel.link,
            size,
            ttl = %ttl_label(ttl),
            verified = subdomain.is_some(),
            "Tunnel published"
        );

        if let Err(e) = self.announce(&tunnel, subdomain.as_deref()).await {
            // Without a console nobody learns the link; take it back.
            if let Some(claimed) = relay.registry().remove_if_same(&tunnel.link, &tunnel) {
                claimed.expire();
            }
            return Err(e);
        }

        let outcome = wait_for_outcome(relay.registry(), &tunnel, watch).await;
        match outcome {
            SessionOutcome::Expired => {
                metrics.expirations_total.fetch_add(1, Ordering::Relaxed);
                tracing::info!(link = %tunnel.link, "Tunnel expired unclaimed");
            }
            SessionOutcome::Downloaded => {
                tracing::info!(link = %tunnel.link, "Tunnel downloaded");
            }
            SessionOutcome::Deleted => {
                tracing::info!(link = %tunnel.link, "Tunnel deleted");
            }
        }
        Ok(outcome)
    }

    async fn resolve_subdomain(&self) -> Option<String> {
        let fingerprint = self.request.fingerprint.as_deref()?;
        match self
            .relay
            .accounts()
            .find_by_ssh_fingerprint(fingerprint)
            .await
        {
            Ok(account) => account.and_then(|a| a.subdomain),
            Err(e) => {
                tracing::warn!("Account lookup failed, treating sender as unverified: {}", e);
                None
            }
        }
    }

    async fn record_usage(&self) {
        let Some(ip) = self.request.peer_ip else {
            return;
        };
        if let Err(e) = self.relay.usage().record_usage(ip).await {
            tracing::warn!(ip = %ip, "Failed to record usage: {}", e);
        }
    }

    async fn announce(&mut self, tunnel: &Tunnel, subdomain: Option<&str>) -> UploadResult<()> {
        let base_url = self.relay.config().server.base_url.clone();
        let mut text = console::greeting();
        match subdomain {
            Some(sub) => text.push_str(&console::verified_banner(&base_url, sub)),
            None => text.push_str(&console::signup_hint(&base_url)),
        }
        let urls = LinkUrls::new(&base_url, subdomain, &tunnel.link);
        text.push_str(&console::links_text(&urls, tunnel.ttl));
        self.console.write_text(&text).await
    }
}

/// Copy the sender's bytes into memory under the configured timeout policy.
async fn buffer_upload(
    chunks: &mut mpsc::Receiver<UploadChunk>,
    config: &UploadConfig,
) -> UploadResult<Bytes> {
    let grace = config.grace();
    let timed_out = || UploadError::Timeout {
        grace_secs: config.grace_secs,
    };
    let mut buffer = Vec::new();

    match config.timeout_mode {
        TimeoutMode::Total => {
            tokio::time::timeout(grace, copy_all(chunks, &mut buffer, config.max_bytes))
                .await
                .map_err(|_| timed_out())??;
        }
        TimeoutMode::Idle => loop {
            match tokio::time::timeout(grace, chunks.recv()).await {
                Err(_) => return Err(timed_out()),
                Ok(None) => return Err(cut_off()),
                Ok(Some(UploadChunk::Eof)) => break,
                Ok(Some(UploadChunk::Data(chunk))) => {
                    append(&mut buffer, &chunk, config.max_bytes)?
                }
            }
        },
    }

    if buffer.is_empty() {
        return Err(UploadError::Empty);
    }
    Ok(Bytes::from(buffer))
}

async fn copy_all(
    chunks: &mut mpsc::Receiver<UploadChunk>,
    buffer: &mut Vec<u8>,
    limit: usize,
) -> UploadResult<()> {
    loop {
        match chunks.recv().await {
            None => return Err(cut_off()),
            Some(UploadChunk::Eof) => return Ok(()),
            Some(UploadChunk::Data(chunk)) => append(buffer, &chunk, limit)?,
        }
    }
}

fn cut_off() -> UploadError {
    UploadError::Transport("ssh channel closed before EOF".into())
}

fn append(buffer: &mut Vec<u8>, chunk: &[u8], limit: usize) -> UploadResult<()> {
    if buffer.len() + chunk.len() > limit {
        return Err(UploadError::TooLarge { limit });
    }
    buffer.extend_from_slice(chunk);
    Ok(())
}

/// Resolves once one of the tunnel's signals fires; `None` if both were
/// dropped unfired.
async fn signalled(watch: TunnelWatch) -> Option<SessionOutcome> {
    let TunnelWatch { completed, deleted } = watch;
    tokio::select! {
        Ok(()) = completed => Some(SessionOutcome::Downloaded),
        Ok(()) = deleted => Some(SessionOutcome::Deleted),
        else => None,
    }
}

/// The three-way wait of an armed tunnel.
///
/// The timer branch claims the tunnel through the registry like any HTTP
/// handler would. If that claim loses, an HTTP handler holds the tunnel and
/// its signal decides the outcome. The sleep is dropped, and so cancelled,
/// whenever a signal wins.
async fn wait_for_outcome(
    registry: &Registry,
    tunnel: &Arc<Tunnel>,
    watch: TunnelWatch,
) -> SessionOutcome {
    let signal = signalled(watch);
    tokio::pin!(signal);

    tokio::select! {
        outcome = &mut signal => outcome.unwrap_or(SessionOutcome::Expired),
        _ = tokio::time::sleep_until(tunnel.deadline()) => {
            match registry.remove_if_same(&tunnel.link, tunnel) {
                Some(claimed) => {
                    claimed.expire();
                    SessionOutcome::Expired
                }
                None => signal.await.unwrap_or(SessionOutcome::Expired),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{AccountDirectory, InMemoryUsage, SenderAccount, StaticAccounts};
    use crate::config::{AccountEntry, Config};
    use crate::console::MemoryConsole;
    use crate::error::CollaboratorError;
    use async_trait::async_trait;
    use std::time::Duration;

    fn relay_with(config: Config) -> Arc<FerryRelay> {
        Arc::new(FerryRelay::standalone(config))
    }

    fn request(command: &str) -> UploadRequest {
        UploadRequest {
            command: Some(command.to_string()),
            peer_ip: Some("192.0.2.7".parse().unwrap()),
            fingerprint: None,
        }
    }

    /// Channel already holding `data` followed by EOF.
    fn finished_stream(data: &[u8]) -> mpsc::Receiver<UploadChunk> {
        let (tx, rx) = mpsc::channel(4);
        if !data.is_empty() {
            tx.try_send(UploadChunk::Data(data.to_vec())).unwrap();
        }
        tx.try_send(UploadChunk::Eof).unwrap();
        rx
    }

    async fn wait_published(relay: &FerryRelay) -> Arc<Tunnel> {
        loop {
            if let Some(link) = relay.registry().published_links().pop() {
                if let Some(tunnel) = relay.registry().lookup(&link) {
                    return tunnel;
                }
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unclaimed_tunnel_expires() {
        let relay = relay_with(Config::default());
        let console = MemoryConsole::default();
        let session = UploadSession::new(Arc::clone(&relay), request("t=1"), console.clone());

        let handle = tokio::spawn(session.run(finished_stream(b"hello")));
        let tunnel = wait_published(&relay).await;

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome, SessionOutcome::Expired);
        assert!(relay.registry().lookup(&tunnel.link).is_none());
        assert!(relay.registry().remove(&tunnel.link).is_none());
        assert_eq!(relay.metrics().expirations_total.load(Ordering::Relaxed), 1);
        assert!(console.contents().contains("No one downloaded"));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_before_expiry() {
        let relay = relay_with(Config::default());
        let console = MemoryConsole::default();
        let session = UploadSession::new(Arc::clone(&relay), request(""), console.clone());

        let handle = tokio::spawn(session.run(finished_stream(b"hello")));
        let tunnel = wait_published(&relay).await;
        relay.registry().remove(&tunnel.link).unwrap().delete();

        assert_eq!(handle.await.unwrap().unwrap(), SessionOutcome::Deleted);
        let output = console.contents();
        assert!(output.contains("Your file was deleted."));
        assert!(!output.contains("downloaded."));
    }

    #[tokio::test(start_paused = true)]
    async fn download_before_expiry() {
        let relay = relay_with(Config::default());
        let console = MemoryConsole::default();
        let session = UploadSession::new(
            Arc::clone(&relay),
            request("from=Alex filename=main.txt t=5"),
            console.clone(),
        );

        let handle = tokio::spawn(session.run(finished_stream(b"hello")));
        let tunnel = wait_published(&relay).await;
        assert_eq!(tunnel.ttl.get(), 5);
        assert_eq!(tunnel.content_name(), "main.txt");
        relay.registry().remove(&tunnel.link).unwrap().complete();

        assert_eq!(handle.await.unwrap().unwrap(), SessionOutcome::Downloaded);
        assert!(console.contents().contains("Your file was downloaded."));
        assert_eq!(relay.metrics().expirations_total.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn download_claimed_at_the_deadline_wins_over_timer() {
        let relay = relay_with(Config::default());
        let console = MemoryConsole::default();
        let session = UploadSession::new(Arc::clone(&relay), request("t=1"), console.clone());

        let handle = tokio::spawn(session.run(finished_stream(b"hello")));
        let tunnel = wait_published(&relay).await;

        // An HTTP handler holds the tunnel while the timer fires.
        let claimed = relay.registry().remove(&tunnel.link).unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(!handle.is_finished());
        claimed.complete();

        assert_eq!(handle.await.unwrap().unwrap(), SessionOutcome::Downloaded);
        assert_eq!(relay.metrics().expirations_total.load(Ordering::Relaxed), 0);
        assert!(console.contents().contains("Your file was downloaded."));
    }

    #[tokio::test(start_paused = true)]
    async fn announces_links_and_ttl() {
        let mut config = Config::default();
        config.server.base_url = "https://ferry.example".into();
        let relay = relay_with(config);
        let console = MemoryConsole::default();
        let session = UploadSession::new(Arc::clone(&relay), request("t=1"), console.clone());

        let handle = tokio::spawn(session.run(finished_stream(b"x")));
        let link = wait_published(&relay).await.link.clone();
        handle.await.unwrap().unwrap();

        let output = console.contents();
        assert!(output.contains(&format!("https://ferry.example/download/unknown/{link}")));
        assert!(output.contains(&format!("https://ferry.example/direct/{link}")));
        assert!(output.contains(&format!("https://ferry.example/delete/{link}")));
        assert!(output.contains("expires in 1 minute."));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_sender_times_out_and_is_retracted() {
        let relay = relay_with(Config::default());
        let console = MemoryConsole::default();
        let (_tx, rx) = mpsc::channel(1);

        let err = UploadSession::new(Arc::clone(&relay), request(""), console.clone())
            .run(rx)
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Timeout { grace_secs: 3 }));
        assert!(relay.registry().is_empty());
        assert_eq!(relay.metrics().upload_failures.load(Ordering::Relaxed), 1);
        assert!(console.contents().contains("ferry error: upload timed out"));
    }

    async fn trickle(mode: TimeoutMode) -> UploadResult<SessionOutcome> {
        let mut config = Config::default();
        config.upload.timeout_mode = mode;
        let relay = relay_with(config);
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            for _ in 0..5 {
                tokio::time::sleep(Duration::from_secs(2)).await;
                if tx.send(UploadChunk::Data(b"chunk".to_vec())).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(UploadChunk::Eof).await;
        });
        let session = UploadSession::new(Arc::clone(&relay), request("t=1"), MemoryConsole::default());
        let result = session.run(rx).await;
        assert!(relay.registry().is_empty());
        result
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_allows_slow_steady_upload() {
        assert_eq!(
            trickle(TimeoutMode::Idle).await.unwrap(),
            SessionOutcome::Expired
        );
    }

    #[tokio::test(start_paused = true)]
    async fn total_timeout_bounds_whole_copy() {
        assert!(matches!(
            trickle(TimeoutMode::Total).await,
            Err(UploadError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn stream_closed_without_eof_is_not_published() {
        let relay = relay_with(Config::default());
        let console = MemoryConsole::default();
        let (tx, rx) = mpsc::channel(4);
        tx.try_send(UploadChunk::Data(b"first half".to_vec())).unwrap();
        drop(tx);

        let err = UploadSession::new(Arc::clone(&relay), request(""), console.clone())
            .run(rx)
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Transport(_)));
        assert!(relay.registry().is_empty());
        assert_eq!(relay.metrics().uploads_total.load(Ordering::Relaxed), 0);
        assert!(!console.contents().contains("/direct/"));
    }

    #[tokio::test(start_paused = true)]
    async fn total_mode_treats_missing_eof_as_cut_off() {
        let mut config = Config::default();
        config.upload.timeout_mode = TimeoutMode::Total;
        let relay = relay_with(config);
        let (tx, rx) = mpsc::channel(4);
        tx.try_send(UploadChunk::Data(b"partial".to_vec())).unwrap();
        drop(tx);

        let err = UploadSession::new(Arc::clone(&relay), request(""), MemoryConsole::default())
            .run(rx)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Transport(_)));
        assert!(relay.registry().is_empty());
    }

    #[tokio::test]
    async fn bad_directives_retract_the_reservation() {
        let relay = relay_with(Config::default());
        let console = MemoryConsole::default();

        let err = UploadSession::new(
            Arc::clone(&relay),
            request("from=Alex t=61"),
            console.clone(),
        )
        .run(finished_stream(b"payload"))
        .await
        .unwrap_err();

        assert!(matches!(err, UploadError::Directive(_)));
        assert!(relay.registry().is_empty());
        assert_eq!(relay.metrics().uploads_total.load(Ordering::Relaxed), 0);
        assert!(console.contents().contains("t=MINUTES"));
    }

    #[tokio::test]
    async fn empty_upload_is_rejected() {
        let relay = relay_with(Config::default());
        let err = UploadSession::new(Arc::clone(&relay), request(""), MemoryConsole::default())
            .run(finished_stream(b""))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Empty));
        assert!(relay.registry().is_empty());
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let mut config = Config::default();
        config.upload.max_bytes = 4;
        let relay = relay_with(config);
        let err = UploadSession::new(Arc::clone(&relay), request(""), MemoryConsole::default())
            .run(finished_stream(b"too many bytes"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::TooLarge { limit: 4 }));
        assert!(relay.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn lost_console_withdraws_published_tunnel() {
        let relay = relay_with(Config::default());
        let err = UploadSession::new(Arc::clone(&relay), request(""), MemoryConsole::broken())
            .run(finished_stream(b"hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Transport(_)));
        assert!(relay.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn verified_sender_and_usage_recorded() {
        let mut config = Config::default();
        config.accounts.push(AccountEntry {
            fingerprint: "SHA256:key".into(),
            subdomain: "alex".into(),
        });
        let accounts = Arc::new(StaticAccounts::from_entries(&config.accounts));
        let usage = Arc::new(InMemoryUsage::new());
        let relay = Arc::new(FerryRelay::new(config, accounts, usage.clone()));
        let console = MemoryConsole::default();

        let mut req = request("t=1");
        req.fingerprint = Some("key".into());
        let handle = tokio::spawn(
            UploadSession::new(Arc::clone(&relay), req, console.clone())
                .run(finished_stream(b"hello")),
        );
        let tunnel = wait_published(&relay).await;
        assert_eq!(tunnel.sender.subdomain.as_deref(), Some("alex"));

        handle.await.unwrap().unwrap();
        assert!(console.contents().contains("/download/alex/"));
        assert!(console.contents().contains("Verified sender"));
        assert_eq!(usage.usage(&"192.0.2.7".parse().unwrap()), 1);
    }

    struct FailingAccounts;

    #[async_trait]
    impl AccountDirectory for FailingAccounts {
        async fn find_by_ssh_fingerprint(
            &self,
            _fingerprint: &str,
        ) -> Result<Option<SenderAccount>, CollaboratorError> {
            Err(CollaboratorError::Unavailable("down".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn account_lookup_failure_is_not_fatal() {
        let relay = Arc::new(FerryRelay::new(
            Config::default(),
            Arc::new(FailingAccounts),
            Arc::new(InMemoryUsage::new()),
        ));
        let mut req = request("t=1");
        req.fingerprint = Some("key".into());
        let outcome = UploadSession::new(Arc::clone(&relay), req, MemoryConsole::default())
            .run(finished_stream(b"hello"))
            .await
            .unwrap();
        assert_eq!(outcome, SessionOutcome::Expired);
    }
}
