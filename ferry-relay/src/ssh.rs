//! SSH front-end.
//!
//! Accepts any public key, turns each exec or shell request into an
//! [`UploadSession`], and pumps the channel's data events into it. Only an
//! SSH EOF completes an upload; a channel or connection that closes first
//! leaves it cut off. The session's text goes back over the same channel
//! through a russh `Handle`.

use crate::console::{refusal_text, SenderConsole};
use crate::error::{RelayError, UploadError, UploadResult};
use crate::server::FerryRelay;
use crate::upload::{UploadChunk, UploadRequest, UploadSession};
use async_trait::async_trait;
use russh::keys::{Algorithm, HashAlg, PrivateKey, PublicKey};
use russh::server::{self, Auth, Handle, Msg, Server as _, Session};
use russh::{Channel, ChannelId, CryptoVec};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Chunks buffered between the SSH session and the upload task.
const CHUNK_QUEUE_DEPTH: usize = 64;

/// Writes sender text to one SSH channel.
pub struct ChannelConsole {
    handle: Handle,
    channel: ChannelId,
}

impl ChannelConsole {
    /// Console for `channel` on the connection behind `handle`.
    pub fn new(handle: Handle, channel: ChannelId) -> Self {
        Self { handle, channel }
    }

    /// Report the exit status and close the channel.
    async fn finish(&self, status: u32) {
        let _ = self.handle.exit_status_request(self.channel, status).await;
        let _ = self.handle.eof(self.channel).await;
        let _ = self.handle.close(self.channel).await;
    }
}

#[async_trait]
impl SenderConsole for ChannelConsole {
    async fn write_text(&mut self, text: &str) -> Result<(), UploadError> {
        self.handle
            .data(self.channel, CryptoVec::from_slice(text.as_bytes()))
            .await
            .map_err(|_| UploadError::Transport("ssh channel closed".into()))
    }
}

/// Load the host key, or generate an in-memory Ed25519 key when no path is set.
pub fn load_host_key(path: Option<&Path>) -> Result<PrivateKey, RelayError> {
    match path {
        Some(path) => russh::keys::load_secret_key(path, None)
            .map_err(|e| RelayError::HostKey(format!("{}: {}", path.display(), e))),
        None => {
            tracing::warn!("No ssh.host_key_path configured, generating an ephemeral host key");
            PrivateKey::random(&mut rand::rngs::OsRng, Algorithm::Ed25519)
                .map_err(|e| RelayError::HostKey(e.to_string()))
        }
    }
}

/// Base64 SHA-256 fingerprint of `key`, without the `SHA256:` prefix.
pub fn key_fingerprint(key: &PublicKey) -> String {
    let fingerprint = key.fingerprint(HashAlg::Sha256).to_string();
    match fingerprint.strip_prefix("SHA256:") {
        Some(stripped) => stripped.to_string(),
        None => fingerprint,
    }
}

/// Apply the per-address upload rate limit.
pub fn admit(relay: &FerryRelay, peer_ip: Option<IpAddr>) -> UploadResult<()> {
    let Some(ip) = peer_ip else {
        return Ok(());
    };
    relay.rate_limits().check_upload(&ip).map_err(|e| {
        relay.metrics().rate_limit_hits.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(ip = %ip, "Upload rate limited: {}", e);
        UploadError::RateLimited {
            reason: e.to_string(),
        }
    })
}

/// The russh server: hands out one [`SshHandler`] per connection.
#[derive(Clone, Debug)]
pub struct SshFrontEnd {
    relay: Arc<FerryRelay>,
}

impl SshFrontEnd {
    /// Create the front-end.
    pub fn new(relay: Arc<FerryRelay>) -> Self {
        Self { relay }
    }

    /// russh server settings for `host_key`.
    pub fn server_config(&self, host_key: PrivateKey) -> server::Config {
        let ssh = &self.relay.config().ssh;
        server::Config {
            inactivity_timeout: Some(Duration::from_secs(ssh.inactivity_timeout_secs)),
            auth_rejection_time: Duration::from_secs(1),
            auth_rejection_time_initial: Some(Duration::from_secs(0)),
            keys: vec![host_key],
            ..Default::default()
        }
    }

    /// Accept connections on `ssh.bind_address` until the listener fails.
    pub async fn run(mut self, host_key: PrivateKey) -> Result<(), RelayError> {
        let config = Arc::new(self.server_config(host_key));
        let bind_address = self.relay.config().ssh.bind_address.clone();
        tracing::info!("SSH listening on {}", bind_address);
        self.run_on_address(config, bind_address.as_str()).await?;
        Ok(())
    }
}

impl server::Server for SshFrontEnd {
    type Handler = SshHandler;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> SshHandler {
        tracing::debug!("New SSH connection from {:?}", peer_addr);
        SshHandler::new(Arc::clone(&self.relay), peer_addr)
    }

    fn handle_session_error(&mut self, error: <Self::Handler as server::Handler>::Error) {
        tracing::debug!("SSH session error: {}", error);
    }
}

/// Per-connection SSH state.
pub struct SshHandler {
    relay: Arc<FerryRelay>,
    peer_addr: Option<SocketAddr>,
    fingerprint: Option<String>,
    uploads: HashMap<ChannelId, mpsc::Sender<UploadChunk>>,
}

impl SshHandler {
    fn new(relay: Arc<FerryRelay>, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            relay,
            peer_addr,
            fingerprint: None,
            uploads: HashMap::new(),
        }
    }

    fn peer_ip(&self) -> Option<IpAddr> {
        self.peer_addr.map(|addr| addr.ip())
    }

    fn start_upload(
        &mut self,
        channel: ChannelId,
        command: Option<String>,
        session: &mut Session,
    ) -> Result<(), russh::Error> {
        session.channel_success(channel)?;
        let console = ChannelConsole::new(session.handle(), channel);

        if let Err(e) = admit(&self.relay, self.peer_ip()) {
            tokio::spawn(async move {
                let mut console = console;
                let _ = console.write_text(&refusal_text(&e)).await;
                console.finish(1).await;
            });
            return Ok(());
        }

        let (tx, rx) = mpsc::channel(CHUNK_QUEUE_DEPTH);
        self.uploads.insert(channel, tx);

        let request = UploadRequest {
            command,
            peer_ip: self.peer_ip(),
            fingerprint: self.fingerprint.clone(),
        };
        let relay = Arc::clone(&self.relay);
        let closer = ChannelConsole::new(session.handle(), channel);
        tokio::spawn(async move {
            let status = match UploadSession::new(relay, request, console).run(rx).await {
                Ok(_) => 0,
                Err(_) => 1,
            };
            closer.finish(status).await;
        });
        Ok(())
    }
}

impl server::Handler for SshHandler {
    type Error = russh::Error;

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        let fingerprint = key_fingerprint(public_key);
        tracing::debug!(user, fingerprint = %fingerprint, "Public key accepted");
        self.fingerprint = Some(fingerprint);
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data).into_owned();
        self.start_upload(channel, Some(command), session)
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.start_upload(channel, None, session)
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(tx) = self.uploads.get(&channel) {
            // A closed receiver means the upload already ended; drop the rest.
            if tx.send(UploadChunk::Data(data.to_vec())).await.is_err() {
                self.uploads.remove(&channel);
            }
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(tx) = self.uploads.remove(&channel) {
            let _ = tx.send(UploadChunk::Eof).await;
        }
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        // Dropping the sender without an EOF marks the upload as cut off.
        self.uploads.remove(&channel);
        Ok(())
    }
}
