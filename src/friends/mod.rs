//! # Friends Module
//!
//! Friendship-state reconciliation over a shared pairwise record.
//!
//! ## Relationship State Machine
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    RELATIONSHIP STATE MACHINE                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Both users address ONE record keyed by the sorted pair of their ids.  │
//! │  Absence of the record means "none".                                   │
//! │                                                                         │
//! │                 send_request (initiator)                                │
//! │      (none) ───────────────────────────────► pending                   │
//! │         ▲                                       │                       │
//! │         │   cancel_request / decline_request    │  accept_request       │
//! │         ◄───────────────────────────────────────┤  (non-initiator only) │
//! │         │                                       ▼                       │
//! │         │              unfriend              friends                    │
//! │         ◄───────────────────────────────────────┘                       │
//! │              (also cascades the 1:1 chat away)                          │
//! │                                                                         │
//! │  Per-viewer status derived from the shared record:                     │
//! │  • state=friends                  → Friends                            │
//! │  • state=pending, initiator=self  → Outgoing                           │
//! │  • state=pending, initiator=other → Incoming                           │
//! │  • no record                      → None                               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Concurrent actions from the two users converge through the store's
//! transaction primitive: both-ways `send_request` leaves exactly one
//! pending record (the loser observes it inside its own transaction and
//! no-ops), and `accept_request` re-validates its precondition inside the
//! same transaction as its write, so a racing cancel wins or loses cleanly.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::store::{server_timestamp, Document, DocumentRef, Query, QuerySnapshot, Store, Timestamp};

/// Collection holding pairwise relationship records.
pub const RELATIONSHIPS: &str = "relationships";

/// Deterministic id for the record shared by two users.
///
/// The pair is sorted lexicographically and joined, so both parties compute
/// the same key without a lookup and duplicate records for a pair are
/// impossible by construction.
pub fn pair_key(a: &str, b: &str) -> String {
    if a < b {
        format!("{}_{}", a, b)
    } else {
        format!("{}_{}", b, a)
    }
}

/// State of a relationship record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipState {
    /// Request sent, not yet accepted.
    Pending,
    /// Both users are friends.
    Friends,
}

impl RelationshipState {
    /// Convert to the stored string.
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipState::Pending => "pending",
            RelationshipState::Friends => "friends",
        }
    }

    /// Parse from the stored string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RelationshipState::Pending),
            "friends" => Some(RelationshipState::Friends),
            _ => None,
        }
    }
}

/// Friendship status from one user's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FriendStatus {
    /// No relationship record exists.
    #[default]
    None,
    /// A pending request this user sent.
    Outgoing,
    /// A pending request this user received.
    Incoming,
    /// The two users are friends.
    Friends,
}

/// The shared pairwise relationship record.
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    /// The two user ids, stored sorted.
    pub users: [String; 2],
    /// The user that created the record. Retained for audit after accept.
    pub initiator: String,
    /// Current state.
    pub state: RelationshipState,
    /// Store commit time of creation.
    pub created_at: Option<Timestamp>,
}

impl Relationship {
    /// Decode a relationship from its stored document.
    pub fn from_document(doc: &Document) -> Result<Self> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Wire {
            users: Vec<String>,
            initiator: String,
            state: String,
            created_at: Option<Timestamp>,
        }

        let wire: Wire = doc.decode()?;
        let [a, b]: [String; 2] = wire.users.try_into().map_err(|_| {
            Error::Serialization(format!("relationship {} must have exactly two users", doc.id))
        })?;
        let state = RelationshipState::parse(&wire.state).ok_or_else(|| {
            Error::Serialization(format!("unknown relationship state {:?}", wire.state))
        })?;
        Ok(Self {
            users: [a, b],
            initiator: wire.initiator,
            state,
            created_at: wire.created_at,
        })
    }

    /// The counterpart of `uid` in this record, if `uid` is a participant.
    pub fn other(&self, uid: &str) -> Option<&str> {
        if self.users[0] == uid {
            Some(&self.users[1])
        } else if self.users[1] == uid {
            Some(&self.users[0])
        } else {
            None
        }
    }

    /// The status this record implies for the given viewer.
    pub fn status_for(&self, uid: &str) -> FriendStatus {
        match self.state {
            RelationshipState::Friends => FriendStatus::Friends,
            RelationshipState::Pending if self.initiator == uid => FriendStatus::Outgoing,
            RelationshipState::Pending => FriendStatus::Incoming,
        }
    }
}

/// Service owning the friendship state machine for one user.
///
/// All operations act on behalf of the identity bound at construction.
/// Shared records are never guarded by client-side locks; the store's
/// transaction primitive is the only mutual exclusion.
pub struct FriendsService {
    /// Bound caller identity.
    uid: String,
    store: Arc<Store>,
    /// Counterpart id → derived status, rebuilt in full on every push.
    statuses: Arc<RwLock<HashMap<String, FriendStatus>>>,
    /// Background listener task, present while activated.
    listener: Mutex<Option<JoinHandle<()>>>,
    /// Batch size for the conversation cascade triggered by unfriend.
    delete_batch_size: usize,
}

impl FriendsService {
    /// Create a service bound to one user identity.
    pub fn new(uid: impl Into<String>, store: Arc<Store>, delete_batch_size: usize) -> Self {
        Self {
            uid: uid.into(),
            store,
            statuses: Arc::new(RwLock::new(HashMap::new())),
            listener: Mutex::new(None),
            delete_batch_size,
        }
    }

    /// The identity this service acts on behalf of.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    fn record_ref(&self, other: &str) -> DocumentRef {
        DocumentRef::new(RELATIONSHIPS, pair_key(&self.uid, other))
    }

    fn require_other(&self, other: &str) -> Result<()> {
        if other == self.uid {
            return Err(Error::Validation(
                "cannot have a relationship with yourself".into(),
            ));
        }
        Ok(())
    }

    // ========================================================================
    // STATE TRANSITIONS
    // ========================================================================

    /// Send a friend request.
    ///
    /// If a record for the pair already exists (any state) this is a
    /// success no-op: when both users send concurrently, exactly one
    /// transaction creates the record and the other observes it.
    pub async fn send_request(&self, other: &str) -> Result<()> {
        self.require_other(other)?;
        let record_ref = self.record_ref(other);
        let me = self.uid.clone();
        let (lo, hi) = if self.uid.as_str() < other {
            (self.uid.as_str(), other)
        } else {
            (other, self.uid.as_str())
        };
        let users = json!([lo, hi]);

        let created = self
            .store
            .run_transaction(|tx| {
                if tx.get(&record_ref)?.is_some() {
                    return Ok(false);
                }
                tx.set(
                    &record_ref,
                    json!({
                        "users": users,
                        "initiator": me,
                        "state": RelationshipState::Pending.as_str(),
                        "createdAt": server_timestamp(),
                    }),
                )?;
                Ok(true)
            })
            .await?;

        if created {
            tracing::info!("Sent friend request to {}", other);
        } else {
            tracing::debug!("Relationship with {} already exists, request is a no-op", other);
        }
        Ok(())
    }

    /// Withdraw a request this user sent.
    ///
    /// Unconditionally deletes the pair record; deleting a non-existent
    /// record succeeds as a no-op.
    pub async fn cancel_request(&self, other: &str) -> Result<()> {
        self.require_other(other)?;
        self.store.delete(&self.record_ref(other)).await?;
        tracing::info!("Cancelled friend request with {}", other);
        Ok(())
    }

    /// Reject a request this user received. Same deletion as
    /// [`FriendsService::cancel_request`]; only the intent differs.
    pub async fn decline_request(&self, other: &str) -> Result<()> {
        self.cancel_request(other).await
    }

    /// Accept a pending request from `other`.
    ///
    /// The precondition (record exists, state is pending, this user is not
    /// the initiator) is re-validated inside the same transaction as the
    /// write, so a racing cancel or duplicate accept resolves cleanly.
    pub async fn accept_request(&self, other: &str) -> Result<()> {
        self.require_other(other)?;
        let record_ref = self.record_ref(other);
        let me = self.uid.clone();

        self.store
            .run_transaction(|tx| {
                let doc = tx
                    .get(&record_ref)?
                    .ok_or_else(|| Error::NotFound(format!("friend request from {}", other)))?;
                let relationship = Relationship::from_document(&doc)?;
                if relationship.state != RelationshipState::Pending {
                    return Err(Error::InvalidState("request is not pending".into()));
                }
                if relationship.initiator == me {
                    return Err(Error::InvalidState(
                        "cannot accept your own outgoing request".into(),
                    ));
                }
                tx.update(
                    &record_ref,
                    json!({"state": RelationshipState::Friends.as_str()}),
                )
            })
            .await?;

        tracing::info!("Accepted friend request from {}", other);
        Ok(())
    }

    /// Remove a friendship and tear down the pair's conversation.
    ///
    /// The relationship deletion is reported as successful even when the
    /// conversation cascade partially fails; the cascade is idempotent and
    /// callers resume it via
    /// [`MessagingService::delete_conversation_cascade`](crate::messaging::MessagingService::delete_conversation_cascade).
    pub async fn unfriend(&self, other: &str) -> Result<()> {
        self.require_other(other)?;
        self.store.delete(&self.record_ref(other)).await?;
        tracing::info!("Unfriended {}", other);

        let chat_id = pair_key(&self.uid, other);
        if let Err(err) =
            crate::messaging::run_conversation_cascade(&self.store, &chat_id, self.delete_batch_size)
                .await
        {
            tracing::warn!(
                "Conversation cleanup for {} failed after unfriend: {}; re-run the cascade to finish",
                chat_id,
                err
            );
        }
        Ok(())
    }

    // ========================================================================
    // DERIVED VIEW STATE
    // ========================================================================

    /// Status of the relationship with `other`, from the subscribed cache.
    ///
    /// Returns [`FriendStatus::None`] when no record is cached.
    pub fn status_for(&self, other: &str) -> FriendStatus {
        self.statuses.read().get(other).copied().unwrap_or_default()
    }

    /// Ids of confirmed friends, sorted.
    pub fn friend_ids(&self) -> Vec<String> {
        self.ids_with_status(FriendStatus::Friends)
    }

    /// Ids of users with a pending request to this user, sorted.
    pub fn incoming_ids(&self) -> Vec<String> {
        self.ids_with_status(FriendStatus::Incoming)
    }

    /// Ids of users this user has a pending request to, sorted.
    pub fn outgoing_ids(&self) -> Vec<String> {
        self.ids_with_status(FriendStatus::Outgoing)
    }

    fn ids_with_status(&self, status: FriendStatus) -> Vec<String> {
        let mut ids: Vec<String> = self
            .statuses
            .read()
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    // ========================================================================
    // REALTIME SYNC
    // ========================================================================

    /// Subscribe to all relationship records containing this user.
    ///
    /// Every push fully replaces the local status map rather than patching
    /// it incrementally, which sidesteps partial-update ordering bugs at
    /// the cost of an O(n) rebuild per push.
    pub async fn activate(&self) -> Result<()> {
        self.deactivate();

        let query =
            Query::collection(RELATIONSHIPS).array_contains("users", json!(self.uid.clone()));
        let mut subscription = self.store.subscribe(query).await?;

        apply_snapshot(&self.uid, &self.statuses, &subscription.current());

        let uid = self.uid.clone();
        let statuses = Arc::clone(&self.statuses);
        let handle = tokio::spawn(async move {
            while subscription.changed().await {
                apply_snapshot(&uid, &statuses, &subscription.current());
            }
        });
        *self.listener.lock() = Some(handle);
        tracing::info!("Relationship listener active for {}", self.uid);
        Ok(())
    }

    /// Stop the relationship listener. The cached status map is retained.
    pub fn deactivate(&self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for FriendsService {
    fn drop(&mut self) {
        self.deactivate();
    }
}

/// Rebuild the status map from a full snapshot.
///
/// Undecodable documents are logged and skipped; the listener keeps
/// running on the remaining records.
fn apply_snapshot(
    uid: &str,
    statuses: &RwLock<HashMap<String, FriendStatus>>,
    snapshot: &QuerySnapshot,
) {
    let mut map = HashMap::with_capacity(snapshot.len());
    for doc in snapshot.iter() {
        let relationship = match Relationship::from_document(doc) {
            Ok(r) => r,
            Err(err) => {
                tracing::warn!("Skipping undecodable relationship {}: {}", doc.id, err);
                continue;
            }
        };
        let Some(other) = relationship.other(uid) else {
            continue;
        };
        map.insert(other.to_string(), relationship.status_for(uid));
    }
    *statuses.write() = map;
}

// ============================================================================
// TESTS
// ============================================================================
