//! Text written back to the sender's SSH session.
//!
//! The relay talks to senders in plain human-readable lines, not a
//! structured protocol. Message builders are pure functions so the wording
//! is testable; [`SenderConsole`] is the seam the upload session writes
//! through.

use crate::error::UploadError;
use crate::upload::SessionOutcome;
use async_trait::async_trait;
use ferry_core::{ttl_label, Link, SaveMinutes};

/// Output side of a sender's session.
#[async_trait]
pub trait SenderConsole: Send {
    /// Write text to the sender.
    async fn write_text(&mut self, text: &str) -> Result<(), UploadError>;
}

/// The three public URLs of a tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkUrls {
    /// Landing page.
    pub download: String,
    /// Direct download (consumes the tunnel).
    pub direct: String,
    /// Revoke.
    pub delete: String,
}

impl LinkUrls {
    /// Build the URLs for `link` under `base_url`.
    ///
    /// Unverified senders get the `unknown` subdomain segment.
    pub fn new(base_url: &str, subdomain: Option<&str>, link: &Link) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            download: format!(
                "{base}/download/{}/{link}",
                subdomain.unwrap_or("unknown")
            ),
            direct: direct_url(base, link),
            delete: format!("{base}/delete/{link}"),
        }
    }
}

/// Direct download URL for `link`.
pub fn direct_url(base_url: &str, link: &Link) -> String {
    format!("{}/direct/{link}", base_url.trim_end_matches('/'))
}

/// First line of every successful session.
pub fn greeting() -> String {
    "\tWelcome to ferry!\n\n".to_string()
}

/// Shown when the uploader's key belongs to a verified subdomain.
pub fn verified_banner(base_url: &str, subdomain: &str) -> String {
    format!(
        "Verified sender: {}/domain/{subdomain}\n\n",
        base_url.trim_end_matches('/')
    )
}

/// Shown to unverified uploaders.
pub fn signup_hint(base_url: &str) -> String {
    format!(
        "Want links under your own name? Claim a free subdomain at {} and link your SSH key.\n\n",
        base_url.trim_end_matches('/')
    )
}

/// The links and the lifetime notice.
pub fn links_text(urls: &LinkUrls, ttl: SaveMinutes) -> String {
    format!(
        "Download link:\n\t{}\n\n\
         Direct download link:\n\t{}\n\n\
         Delete file link:\n\t{}\n\n\
         Your link expires in {}. Keep this session open; it closes by itself \
         once the file is downloaded, deleted, or the link expires.\n\n",
        urls.download,
        urls.direct,
        urls.delete,
        ttl_label(ttl)
    )
}

/// Final line of a session that reached a terminal state.
pub fn outcome_text(outcome: SessionOutcome) -> String {
    match outcome {
        SessionOutcome::Downloaded => "Your file was downloaded.\n".to_string(),
        SessionOutcome::Deleted => "Your file was deleted.\n".to_string(),
        SessionOutcome::Expired => {
            "Time's up! No one downloaded your file. Send it again for a new link.\n".to_string()
        }
    }
}

/// Error report plus usage help.
pub fn help_text(error: &UploadError) -> String {
    format!(
        "\n\tferry error: {error}\n\n\
         Options (space separated, no quotes needed):\n\
         \t- from=NAME       name shown on the download page\n\
         \t- msg=TEXT        message shown next to the file\n\
         \t- filename=NAME   name the file is downloaded as\n\
         \t- t=MINUTES       link lifetime, 1 to 60 (default 15)\n\n\
         Example:\n\
         \tssh <relay-host> -p <port> from=Alex msg=Hello, John! Here's your file < myfile.txt\n"
    )
}

/// Short notice for a session refused before any upload starts.
pub fn refusal_text(error: &UploadError) -> String {
    format!("\n\tferry error: {error}\n\nPlease try again in a minute.\n")
}

/// In-memory console for tests.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryConsole {
    output: std::sync::Arc<std::sync::Mutex<String>>,
    broken: bool,
}

#[cfg(test)]
impl MemoryConsole {
    /// A console whose writes all fail.
    pub(crate) fn broken() -> Self {
        Self {
            broken: true,
            ..Self::default()
        }
    }

    /// Everything written so far.
    pub(crate) fn contents(&self) -> String {
        self.output.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl SenderConsole for MemoryConsole {
    async fn write_text(&mut self, text: &str) -> Result<(), UploadError> {
        if self.broken {
            return Err(UploadError::Transport("console closed".into()));
        }
        self.output.lock().unwrap().push_str(text);
        Ok(())
    }
}
