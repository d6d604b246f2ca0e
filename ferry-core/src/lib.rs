//! # ferry-core
//!
//! Pure logic for ferry (no I/O, instant tests).
//!
//! This crate holds the parts of the relay that are plain functions over
//! values: link generation, the sender directive grammar, transfer options
//! and the human-readable labels shown to senders and downloaders.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without touching the network, the clock, or shared state. The relay crate
//! (`ferry-relay`) owns the registry, timers and sessions and calls into
//! these modules.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod directive;
pub mod labels;
pub mod link;
pub mod options;

pub use directive::{parse_directives, DirectiveError, Token};
pub use labels::{elapsed_label, expiry_label, sender_label, ttl_label, UNKNOWN_SENDER};
pub use link::{Link, LinkGenerator, DEFAULT_LINK_LENGTH};
pub use options::{SaveMinutes, TransferOptions};
