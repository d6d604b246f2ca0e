//! Tunnel registry: the shared map from link to tunnel.
//!
//! The registry is the single source of truth for which tunnels exist.
//! Every operation is atomic with respect to concurrent callers (the map is
//! a sharded-lock `DashMap`), and removal is the serialization point for the
//! three ways a tunnel can end: whichever caller's removal succeeds decides
//! the outcome, later removals on the same link find nothing.
//!
//! ## Entry lifecycle
//!
//! ```text
//! reserve() ──► Reserved ──publish()──► Ready ──remove()──► gone
//!                  │                               (download, delete, or timer)
//!                  └── Reservation dropped ──► gone
//! ```
//!
//! A `Reserved` entry holds the link while the upload is buffered and its
//! directives parsed. It is invisible to HTTP callers, and the
//! [`Reservation`] guard retracts it on every failure path.

use crate::error::RegistryError;
use crate::tunnel::{signal_pair, SenderInfo, Tunnel, TunnelSignals, TunnelWatch};
use axum::body::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ferry_core::{Link, LinkGenerator, SaveMinutes};
use std::sync::Arc;

/// Links tried before giving up on a reservation.
pub const MAX_RESERVE_ATTEMPTS: usize = 64;

#[derive(Debug)]
enum Slot {
    Reserved,
    Ready {
        tunnel: Arc<Tunnel>,
        signals: TunnelSignals,
    },
}

/// A tunnel taken out of the registry.
///
/// Holding one proves the caller won the removal race; only it can fire the
/// tunnel's signals.
#[derive(Debug)]
pub struct Claimed {
    /// The removed tunnel.
    pub tunnel: Arc<Tunnel>,
    signals: TunnelSignals,
}

impl Claimed {
    /// Fire the completion signal.
    pub fn complete(self) -> Arc<Tunnel> {
        self.signals.complete();
        self.tunnel
    }

    /// Fire the delete signal.
    pub fn delete(self) -> Arc<Tunnel> {
        self.signals.delete();
        self.tunnel
    }

    /// Drop both signals unfired (used by the expiry timer).
    pub fn expire(self) -> Arc<Tunnel> {
        self.tunnel
    }
}

/// The shared link → tunnel map.
#[derive(Debug)]
pub struct Registry {
    entries: DashMap<Link, Slot>,
    generator: LinkGenerator,
    max_active: Option<usize>,
}

impl Registry {
    /// Create an empty registry.
    ///
    /// `max_active` caps reserved plus published entries; `None` is unlimited.
    pub fn new(generator: LinkGenerator, max_active: Option<usize>) -> Self {
        Self {
            entries: DashMap::new(),
            generator,
            max_active,
        }
    }

    /// Reserve a fresh random link.
    pub fn reserve(&self) -> Result<Reservation<'_>, RegistryError> {
        self.reserve_with(|| self.generator.generate())
    }

    /// Reserve the first free link produced by `next`.
    ///
    /// Each candidate is checked and inserted as one atomic step, so two
    /// concurrent reservations never share a link.
    pub fn reserve_with(
        &self,
        mut next: impl FnMut() -> Link,
    ) -> Result<Reservation<'_>, RegistryError> {
        if let Some(limit) = self.max_active {
            if self.entries.len() >= limit {
                return Err(RegistryError::AtCapacity { limit });
            }
        }

        for _ in 0..MAX_RESERVE_ATTEMPTS {
            let link = next();
            match self.entries.entry(link.clone()) {
                Entry::Vacant(vacant) => {
                    vacant.insert(Slot::Reserved);
                    tracing::debug!(link = %link, "Reserved link");
                    return Ok(Reservation {
                        registry: self,
                        link,
                        published: false,
                    });
                }
                Entry::Occupied(_) => {
                    tracing::debug!(link = %link, "Link collision, retrying");
                }
            }
        }

        Err(RegistryError::LinkSpaceExhausted {
            attempts: MAX_RESERVE_ATTEMPTS,
        })
    }

    /// Look up a published tunnel without consuming it.
    pub fn lookup(&self, link: &Link) -> Option<Arc<Tunnel>> {
        self.entries.get(link).and_then(|slot| match slot.value() {
            Slot::Ready { tunnel, .. } => Some(Arc::clone(tunnel)),
            Slot::Reserved => None,
        })
    }

    /// Remove a published tunnel.
    ///
    /// Returns `None` when the link is unknown, still reserved, or already
    /// removed by someone else.
    pub fn remove(&self, link: &Link) -> Option<Claimed> {
        self.entries
            .remove_if(link, |_, slot| matches!(slot, Slot::Ready { .. }))
            .and_then(|(_, slot)| into_claimed(slot))
    }

    /// Remove a published tunnel only if it is still `expected`.
    ///
    /// Guards against consuming a newer tunnel that reuses the link.
    pub fn remove_if_same(&self, link: &Link, expected: &Arc<Tunnel>) -> Option<Claimed> {
        self.entries
            .remove_if(link, |_, slot| match slot {
                Slot::Ready { tunnel, .. } => Arc::ptr_eq(tunnel, expected),
                Slot::Reserved => false,
            })
            .and_then(|(_, slot)| into_claimed(slot))
    }

    /// Whether the link is reserved or published.
    pub fn contains(&self, link: &Link) -> bool {
        self.entries.contains_key(link)
    }

    /// Number of entries, reserved and published.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of published tunnels.
    pub fn published_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Ready { .. }))
            .count()
    }

    /// Links of all published tunnels.
    #[cfg(test)]
    pub(crate) fn published_links(&self) -> Vec<Link> {
        self.entries
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Ready { .. }))
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn retract(&self, link: &Link) {
        if self
            .entries
            .remove_if(link, |_, slot| matches!(slot, Slot::Reserved))
            .is_some()
        {
            tracing::debug!(link = %link, "Retracted reservation");
        }
    }
}

fn into_claimed(slot: Slot) -> Option<Claimed> {
    match slot {
        Slot::Ready { tunnel, signals } => Some(Claimed { tunnel, signals }),
        Slot::Reserved => None,
    }
}

/// A link held for an upload in progress.
///
/// Dropping the reservation without publishing removes the entry.
#[derive(Debug)]
pub struct Reservation<'a> {
    registry: &'a Registry,
    link: Link,
    published: bool,
}

impl Reservation<'_> {
    /// The reserved link.
    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Make the tunnel visible to HTTP callers.
    ///
    /// Returns the shared tunnel and the receiving side of its signals.
    pub fn publish(
        mut self,
        payload: Bytes,
        ttl: SaveMinutes,
        sender: SenderInfo,
    ) -> (Arc<Tunnel>, TunnelWatch) {
        let tunnel = Arc::new(Tunnel::new(self.link.clone(), payload, ttl, sender));
        let (signals, watch) = signal_pair();
        self.registry.entries.insert(
            self.link.clone(),
            Slot::Ready {
                tunnel: Arc::clone(&tunnel),
                signals,
            },
        );
        self.published = true;
        tracing::debug!(link = %self.link, size = tunnel.size(), "Published tunnel");
        (tunnel, watch)
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.published {
            self.registry.retract(&self.link);
        }
    }
}
