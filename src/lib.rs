//! # Commons Core
//!
//! The shared core of a campus community app: friendships, direct-message
//! chats, block/mute safety controls, abuse reporting and professor
//! reviews, all over a transactional document store with snapshot
//! listeners.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        COMMONS CORE MODULES                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌──────────────┐   │
//! │  │  Directory  │  │   Friends   │  │  Messaging  │  │    Safety    │   │
//! │  │             │  │             │  │             │  │              │   │
//! │  │ - Signup    │  │ - Requests  │  │ - Chats     │  │ - Block      │   │
//! │  │ - Search    │  │ - Accept    │  │ - Summaries │  │ - Mute       │   │
//! │  │ - Suggest   │  │ - Unfriend  │  │ - Cascades  │  │ - Fail-open  │   │
//! │  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘  └──────┬───────┘   │
//! │         │                │                │                │           │
//! │  ┌──────┴──────┐  ┌──────┴──────┐         │                │           │
//! │  │   Reports   │  │   Reviews   │         │                │           │
//! │  │             │  │             │         │                │           │
//! │  │ - Users     │  │ - Submit    │         │                │           │
//! │  │ - Reviews   │  │ - Summaries │         │                │           │
//! │  └──────┬──────┘  └──────┬──────┘         │                │           │
//! │         └────────────────┴────────┬───────┴────────────────┘           │
//! │                                   ▼                                     │
//! │  ┌───────────────────────────────────────────────────────────────────┐ │
//! │  │                              Store                                │ │
//! │  │                                                                   │ │
//! │  │  - JSON documents in named collections                            │ │
//! │  │  - Serialized transactions, monotonic commit timestamps           │ │
//! │  │  - Server-timestamp sentinels resolved at commit                  │ │
//! │  │  - Snapshot listeners (full replace, duplicate suppression)       │ │
//! │  └───────────────────────────────────────────────────────────────────┘ │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`store`] - Transactional document store with snapshot listeners
//! - [`directory`] - User profiles, signup gate, search and suggestions
//! - [`friends`] - Friendship state machine (request, accept, unfriend)
//! - [`messaging`] - Conversations, messages and summary maintenance
//! - [`safety`] - Block and mute lists with fail-open visibility checks
//! - [`reports`] - Abuse reports against users and reviews
//! - [`reviews`] - Professor review records and aggregation
//!
//! ## Consistency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         WRITE DISCIPLINES                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Transactional: friendship transitions, conversation creation.          │
//! │  Preconditions re-validate inside the transaction, so concurrent        │
//! │  callers converge on one record.                                        │
//! │                                                                         │
//! │  Chained: message append then summary merge. The summary is a cache     │
//! │  of the newest message; a lost summary write is repaired by the next    │
//! │  send, so the send itself still succeeds.                               │
//! │                                                                         │
//! │  Best-effort: read receipts, cached status maps. Failures are logged    │
//! │  and never surface to the caller.                                       │
//! │                                                                         │
//! │  Cascades: unfriend / delete-conversation remove messages in batches,   │
//! │  then members, then the chat document. Interrupted cascades resume on   │
//! │  re-invocation.                                                         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod directory;
pub mod error;
pub mod friends;
pub mod messaging;
pub mod reports;
pub mod reviews;
pub mod safety;
pub mod store;
/// Wall-clock time helpers shared across modules.
pub mod time;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use directory::{DirectoryService, IdentityProvider, UserProfile};
pub use error::{Error, Result};
pub use friends::{FriendStatus, FriendsService, RelationshipState};
pub use messaging::{ChatMessage, Conversation, MessagingService};
pub use reports::{AbuseReason, ReportStatus, ReportsService};
pub use reviews::{ProfessorSummary, Review, ReviewsService};
pub use safety::{SafetyRecord, SafetyService};
pub use store::{Document, DocumentRef, Query, Store, Subscription, Timestamp};

use std::sync::Arc;

// ============================================================================
// CLIENT
// ============================================================================

/// Configuration for constructing a [`CommonsClient`].
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Email domain allowed through the signup gate.
    pub allowed_email_domain: String,
    /// Maximum messages per live message feed.
    pub message_page_size: usize,
    /// Documents deleted per batch during conversation cascades.
    pub delete_batch_size: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            allowed_email_domain: "baylor.edu".to_string(),
            message_page_size: 100,
            delete_batch_size: 300,
        }
    }
}

/// Per-user entry point bundling all services over one shared store.
///
/// Construct one client per signed-in user. Services share the store but
/// hold independent caches; [`CommonsClient::activate`] starts the live
/// ones.
pub struct CommonsClient {
    user_id: String,
    store: Arc<Store>,
    config: CoreConfig,
    directory: DirectoryService,
    friends: FriendsService,
    messaging: MessagingService,
    safety: SafetyService,
    reports: ReportsService,
    reviews: ReviewsService,
}

impl CommonsClient {
    /// Build a client for one user over a shared store.
    pub fn new(user_id: impl Into<String>, store: Arc<Store>, config: CoreConfig) -> Self {
        let user_id = user_id.into();
        tracing::info!("Initializing client for {}", user_id);
        Self {
            directory: DirectoryService::new(user_id.clone(), Arc::clone(&store)),
            friends: FriendsService::new(
                user_id.clone(),
                Arc::clone(&store),
                config.delete_batch_size,
            ),
            messaging: MessagingService::new(
                user_id.clone(),
                Arc::clone(&store),
                config.message_page_size,
                config.delete_batch_size,
            ),
            safety: SafetyService::new(user_id.clone(), Arc::clone(&store)),
            reports: ReportsService::new(user_id.clone(), Arc::clone(&store)),
            reviews: ReviewsService::new(user_id.clone(), Arc::clone(&store)),
            user_id,
            store,
            config,
        }
    }

    /// The bound user id.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The shared store handle.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// The configuration the client was built with.
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Start the live caches: friendship statuses and block/mute sets.
    pub async fn activate(&self) -> Result<()> {
        self.friends.activate().await?;
        self.safety.activate().await?;
        Ok(())
    }

    /// Stop the live caches. Cached values are retained.
    pub fn deactivate(&self) {
        self.friends.deactivate();
        self.safety.deactivate();
    }

    /// User directory: roster, search and suggestions.
    pub fn directory(&self) -> &DirectoryService {
        &self.directory
    }

    /// Friendship requests and statuses.
    pub fn friends(&self) -> &FriendsService {
        &self.friends
    }

    /// Conversations and messages.
    pub fn messaging(&self) -> &MessagingService {
        &self.messaging
    }

    /// Block and mute controls.
    pub fn safety(&self) -> &SafetyService {
        &self.safety
    }

    /// Abuse reporting.
    pub fn reports(&self) -> &ReportsService {
        &self.reports
    }

    /// Professor reviews.
    pub fn reviews(&self) -> &ReviewsService {
        &self.reviews
    }
}

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_default_config() {
        let config = CoreConfig::default();
        assert_eq!(config.allowed_email_domain, "baylor.edu");
        assert_eq!(config.message_page_size, 100);
        assert_eq!(config.delete_batch_size, 300);
    }

    #[tokio::test]
    async fn test_two_clients_share_one_store() {
        let store = Arc::new(Store::new());
        let alice = CommonsClient::new("alice", Arc::clone(&store), CoreConfig::default());
        let bob = CommonsClient::new("bob", Arc::clone(&store), CoreConfig::default());

        alice.friends().send_request("bob").await.unwrap();
        bob.friends().accept_request("alice").await.unwrap();

        let chat_id = alice
            .messaging()
            .get_or_create_conversation("bob")
            .await
            .unwrap();
        assert_eq!(chat_id, bob.messaging().chat_id("alice"));
    }

    #[tokio::test]
    async fn test_activate_and_deactivate() {
        let store = Arc::new(Store::new());
        let client = CommonsClient::new("alice", Arc::clone(&store), CoreConfig::default());
        client.activate().await.unwrap();
        client.safety().block("bob", "Bob B").await.unwrap();
        client.deactivate();
    }
}
