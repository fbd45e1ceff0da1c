//! # Safety Module
//!
//! Block and mute records, owned one-sided by the acting user.
//!
//! A block or mute lives under the owner's own namespace
//! (`users/{owner}/blocks/{target}`, `users/{owner}/mutes/{target}`) and is
//! never written to the target's records. No symmetry is assumed: A
//! blocking B says nothing about B's records, so "are we blocked either
//! way" requires consulting both users' independent record sets.
//!
//! The cross-user read in [`SafetyService::blocked_either_way`] can be
//! denied by the store's access rules. A denied read is treated as
//! not-blocked: the check fails open, trading strict enforcement for
//! availability. That is a deliberate policy choice carried over from the
//! original design, not a bug; deployments wanting strict enforcement need
//! a store-side rule rejecting writes between blocked pairs.
//!
//! Send-gating is the presentation layer's job: callers check
//! `blocked_either_way` (or the cached [`SafetyService::is_blocked`])
//! before invoking `send_message`; the messaging service itself does not
//! enforce blocking.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::store::{
    server_timestamp, Direction, Document, DocumentRef, Query, Store, Subscription, Timestamp,
};

/// Block sub-collection path for a user.
fn blocks_collection(uid: &str) -> String {
    format!("users/{}/blocks", uid)
}

/// Mute sub-collection path for a user.
fn mutes_collection(uid: &str) -> String {
    format!("users/{}/mutes", uid)
}

/// An owner-side block or mute record.
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyRecord {
    /// The blocked or muted user.
    pub target_id: String,
    /// Display-name cache captured when the record was created, so the
    /// safety lists render without a profile lookup.
    pub display_name: String,
    /// Store commit time of creation.
    pub created_at: Option<Timestamp>,
}

impl SafetyRecord {
    fn from_document(doc: &Document) -> Self {
        let display_name = doc
            .get("displayName")
            .and_then(|v| v.as_str())
            .unwrap_or(&doc.id)
            .to_string();
        let created_at = doc
            .get("createdAt")
            .and_then(|v| v.as_i64())
            .map(Timestamp::from_micros);
        Self {
            target_id: doc.id.clone(),
            display_name,
            created_at,
        }
    }
}

/// Live feed over one user's block or mute list, newest first.
pub struct SafetyFeed {
    subscription: Subscription,
}

impl SafetyFeed {
    /// The current record list.
    pub fn current(&self) -> Vec<SafetyRecord> {
        self.subscription
            .current()
            .iter()
            .map(SafetyRecord::from_document)
            .collect()
    }

    /// Wait for the next push. Returns `false` once cancelled.
    pub async fn changed(&mut self) -> bool {
        self.subscription.changed().await
    }

    /// Cancel the listener.
    pub fn cancel(&self) {
        self.subscription.cancel();
    }
}

/// Service owning block and mute state for one user.
///
/// The cached id sets are plain fields, rebuilt in full from each
/// subscription push while activated.
pub struct SafetyService {
    /// Bound caller identity.
    uid: String,
    store: Arc<Store>,
    blocked_ids: Arc<RwLock<HashSet<String>>>,
    muted_ids: Arc<RwLock<HashSet<String>>>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl SafetyService {
    /// Create a service bound to one user identity.
    pub fn new(uid: impl Into<String>, store: Arc<Store>) -> Self {
        Self {
            uid: uid.into(),
            store,
            blocked_ids: Arc::new(RwLock::new(HashSet::new())),
            muted_ids: Arc::new(RwLock::new(HashSet::new())),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// The identity this service acts on behalf of.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    fn require_other(&self, target: &str) -> Result<()> {
        if target == self.uid {
            return Err(Error::Validation("cannot block or mute yourself".into()));
        }
        Ok(())
    }

    async fn upsert(&self, collection: String, target: &str, display_name: &str) -> Result<()> {
        self.require_other(target)?;
        let record_ref = DocumentRef::new(collection, target);
        self.store
            .set_merge(
                &record_ref,
                json!({
                    "displayName": display_name,
                    "createdAt": server_timestamp(),
                }),
            )
            .await?;
        Ok(())
    }

    // ========================================================================
    // BLOCK / MUTE OPERATIONS
    // ========================================================================

    /// Block a user. Upserts this user's own record only.
    pub async fn block(&self, target: &str, display_name: &str) -> Result<()> {
        self.upsert(blocks_collection(&self.uid), target, display_name)
            .await?;
        tracing::info!("Blocked user {}", target);
        Ok(())
    }

    /// Remove this user's block record for `target`.
    pub async fn unblock(&self, target: &str) -> Result<()> {
        self.store
            .delete(&DocumentRef::new(blocks_collection(&self.uid), target))
            .await?;
        tracing::info!("Unblocked user {}", target);
        Ok(())
    }

    /// Mute a user. Keeps the chat, silences notifications.
    pub async fn mute(&self, target: &str, display_name: &str) -> Result<()> {
        self.upsert(mutes_collection(&self.uid), target, display_name)
            .await?;
        tracing::info!("Muted user {}", target);
        Ok(())
    }

    /// Remove this user's mute record for `target`.
    pub async fn unmute(&self, target: &str) -> Result<()> {
        self.store
            .delete(&DocumentRef::new(mutes_collection(&self.uid), target))
            .await?;
        tracing::info!("Unmuted user {}", target);
        Ok(())
    }

    /// Whether this user has blocked `target`, from the activated cache.
    pub fn is_blocked(&self, target: &str) -> bool {
        self.blocked_ids.read().contains(target)
    }

    /// Whether this user has muted `target`, from the activated cache.
    pub fn is_muted(&self, target: &str) -> bool {
        self.muted_ids.read().contains(target)
    }

    /// Check both directions of a block: `(we_blocked_them, they_blocked_us)`.
    ///
    /// The read of the counterpart's record may be denied by the store's
    /// access policy; a denial is reported as `false`. Unknown defaults to
    /// not-blocked, never to blocked (fail-open).
    pub async fn blocked_either_way(&self, other: &str) -> Result<(bool, bool)> {
        let mine = self
            .store
            .get(&DocumentRef::new(blocks_collection(&self.uid), other))
            .await?
            .is_some();

        let theirs_ref = DocumentRef::new(blocks_collection(other), self.uid.clone());
        let theirs = match self.store.get(&theirs_ref).await {
            Ok(doc) => doc.is_some(),
            Err(Error::PermissionDenied(_)) => {
                tracing::debug!(
                    "Read of {}'s block record denied, treating as not blocked",
                    other
                );
                false
            }
            Err(err) => return Err(err),
        };

        Ok((mine, theirs))
    }

    // ========================================================================
    // FEEDS & CACHE
    // ========================================================================

    /// Subscribe to this user's block list, newest first.
    pub async fn subscribe_blocks(&self) -> Result<SafetyFeed> {
        let query = Query::collection(blocks_collection(&self.uid))
            .order_by("createdAt", Direction::Descending);
        Ok(SafetyFeed {
            subscription: self.store.subscribe(query).await?,
        })
    }

    /// Subscribe to this user's mute list, newest first.
    pub async fn subscribe_mutes(&self) -> Result<SafetyFeed> {
        let query = Query::collection(mutes_collection(&self.uid))
            .order_by("createdAt", Direction::Descending);
        Ok(SafetyFeed {
            subscription: self.store.subscribe(query).await?,
        })
    }

    /// Keep the cached block/mute id sets synced with the store.
    ///
    /// Each push fully replaces the relevant set.
    pub async fn activate(&self) -> Result<()> {
        self.deactivate();
        let mut handles = Vec::with_capacity(2);
        for (collection, cache) in [
            (blocks_collection(&self.uid), Arc::clone(&self.blocked_ids)),
            (mutes_collection(&self.uid), Arc::clone(&self.muted_ids)),
        ] {
            let mut subscription = self.store.subscribe(Query::collection(collection)).await?;
            apply_ids(&cache, &subscription.current());
            handles.push(tokio::spawn(async move {
                while subscription.changed().await {
                    apply_ids(&cache, &subscription.current());
                }
            }));
        }
        *self.listeners.lock() = handles;
        Ok(())
    }

    /// Stop the cache listeners. The cached sets are retained.
    pub fn deactivate(&self) {
        for handle in self.listeners.lock().drain(..) {
            handle.abort();
        }
    }
}

impl Drop for SafetyService {
    fn drop(&mut self) {
        self.deactivate();
    }
}

fn apply_ids(cache: &RwLock<HashSet<String>>, docs: &[Document]) {
    *cache.write() = docs.iter().map(|doc| doc.id.clone()).collect();
}

// ============================================================================
// TESTS
// ============================================================================
