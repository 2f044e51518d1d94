//! # Identifier Resolver
//!
//! Binds locally minted [`CorrelationId`]s to the ids Orangebeard assigns.
//!
//! ```text
//!  allocate() ──► Pending ──resolve(id, value)──► Resolved(Ok(Some(id)) | Ok(None) | Err(e))
//!                    ▲                                   │
//!                    └──── wait(id) suspends ────────────┘ all waiters wake at once
//! ```
//!
//! Each entry owns a `tokio::sync::watch` channel. Resolution is a single
//! `send_if_modified` that only writes into an empty slot, so the first writer
//! wins and later writers observe [`Error::AlreadyResolved`].

use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::sync::watch;
use tracing::*;
use uuid::Uuid;

use crate::{Error, Result};

/// Placeholder handed to the caller before the server has answered. Never sent over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    fn new() -> CorrelationId {
        CorrelationId(Uuid::new_v4())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tmp-{}", self.0)
    }
}

/// Identifier assigned by Orangebeard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolvedId(String);

impl ResolvedId {
    pub fn new(id: impl Into<String>) -> ResolvedId {
        ResolvedId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResolvedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Uuid> for ResolvedId {
    fn from(uuid: Uuid) -> Self {
        ResolvedId(uuid.to_string())
    }
}

/// Outcome stored for a correlation id. `Ok(None)` means the call succeeded but returned no id.
pub type Resolution = Result<Option<ResolvedId>>;

type Slot = watch::Sender<Option<Resolution>>;

pub struct Resolver {
    entries: Mutex<HashMap<CorrelationId, Slot>>,
    timeout: Duration,
}

impl Resolver {
    pub fn new(timeout: Duration) -> Resolver {
        Resolver {
            entries: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CorrelationId, Slot>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mint a fresh, unresolved correlation id.
    pub fn allocate(&self) -> CorrelationId {
        let id = CorrelationId::new();
        self.entries().insert(id, watch::channel(None).0);
        id
    }

    /// Mint a correlation id that is already bound to a known server id.
    pub fn adopt(&self, resolved: ResolvedId) -> CorrelationId {
        let id = CorrelationId::new();
        self.entries()
            .insert(id, watch::channel(Some(Ok(Some(resolved)))).0);
        id
    }

    /// Store the outcome for `id`. Fails if `id` is unknown or already resolved.
    pub fn resolve(&self, id: CorrelationId, value: Resolution) -> Result<()> {
        let entries = self.entries();
        let slot = entries.get(&id).ok_or(Error::UnknownId(id))?;

        let mut value = Some(value);
        let written = slot.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = value.take();
            true
        });

        if !written {
            warn!("ignoring second resolution of {id}");
            return Err(Error::AlreadyResolved(id));
        }
        trace!("{id} resolved");
        Ok(())
    }

    /// Suspend until `id` resolves or the resolver's deadline elapses.
    pub async fn wait(&self, id: CorrelationId) -> Resolution {
        let mut rx = {
            let entries = self.entries();
            entries.get(&id).ok_or(Error::UnknownId(id))?.subscribe()
        };

        let waited = tokio::time::timeout(self.timeout, rx.wait_for(Option::is_some)).await;
        match waited {
            Ok(Ok(resolution)) => match &*resolution {
                Some(resolution) => resolution.clone(),
                None => Err(Error::UnknownId(id)),
            },
            // The slot was dropped by a teardown while we were waiting.
            Ok(Err(_)) => Err(Error::UnknownId(id)),
            Err(_) => {
                debug!("gave up waiting for {id} after {:?}", self.timeout);
                Err(Error::Timeout {
                    id,
                    waited: self.timeout,
                })
            }
        }
    }

    /// Like [`Resolver::wait`], but a resolution without an id is an error.
    pub async fn wait_resolved(&self, id: CorrelationId) -> Result<ResolvedId> {
        self.wait(id).await?.ok_or(Error::Unresolved(id))
    }

    /// Await an optional parent reference.
    pub async fn wait_optional(&self, id: Option<CorrelationId>) -> Result<Option<ResolvedId>> {
        match id {
            Some(id) => self.wait_resolved(id).await.map(Some),
            None => Ok(None),
        }
    }

    /// Number of ids that have not resolved yet.
    pub fn pending(&self) -> usize {
        self.entries()
            .values()
            .filter(|slot| slot.borrow().is_none())
            .count()
    }

    /// Drop every entry. Outstanding waiters fail with [`Error::UnknownId`].
    pub fn clear(&self) {
        self.entries().clear();
    }
}
