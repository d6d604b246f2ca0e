//! # ferry-relay
//!
//! Ephemeral file relay: upload over SSH, download once over HTTP.
//!
//! This crate implements a relay server that:
//! - Accepts SSH sessions and buffers the piped file in memory
//! - Hands the sender a short random link
//! - Serves that link to exactly one successful HTTP download
//! - Forgets the file on download, delete, or expiry
//!
//! ## Architecture
//!
//! ```text
//! Sender ──ssh──►┌────────────────────────────┐◄──http── Receiver
//!                │        ferry-relay         │
//!                │  ┌──────────────────────┐  │
//!                │  │ Registry (in memory) │  │
//!                │  └──────────────────────┘  │
//!                └────────────────────────────┘
//! ```
//!
//! ## Tunnel lifecycle
//!
//! An [`upload::UploadSession`] reserves a link, buffers the upload, parses
//! the sender's directives and publishes the tunnel. It then blocks until
//! the first of three events: a direct download, a delete request, or the
//! expiry timer. Whichever removes the tunnel from the
//! [`registry::Registry`] first decides the outcome reported to the sender.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod accounts;
pub mod cleanup;
pub mod config;
pub mod console;
pub mod error;
pub mod http;
pub mod limits;
pub mod registry;
pub mod server;
pub mod ssh;
pub mod tunnel;
pub mod upload;
