//! # Messaging Module
//!
//! 1:1 conversations with a denormalized summary kept consistent with the
//! message log under concurrent writers.
//!
//! ## Send Path
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          MESSAGE SEND PATH                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  send_message(chat_id, text)                                            │
//! │        │                                                                │
//! │        ├─ 1. Trim + validate locally (empty text → ValidationError,     │
//! │        │     zero store writes)                                         │
//! │        │                                                                │
//! │        ├─ 2. Append message document                                    │
//! │        │     chats/{id}/messages/{uuid}                                 │
//! │        │     { senderId, text, createdAt: <server timestamp> }          │
//! │        │                                                                │
//! │        └─ 3. Merge summary onto the chat document (only after the       │
//! │              append committed)                                          │
//! │              { lastMessageText, lastMessageAt, lastSenderId }           │
//! │                                                                         │
//! │  The two writes are deliberately NOT one transaction. Concurrent        │
//! │  appends by both participants never conflict (independent documents),   │
//! │  and the summary is last-write-wins by store commit time, bounding      │
//! │  the inconsistency window to the store's own write latency.             │
//! │                                                                         │
//! │  A summary-write failure after a successful append is logged and the    │
//! │  send still reports success: the message was sent.                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Chat identity is the same sorted-pair key the relationship record uses,
//! so a conversation is addressable from the two participant ids without a
//! lookup and duplicate conversations for a pair are impossible.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::friends::pair_key;
use crate::store::{
    server_timestamp, Direction, Document, DocumentRef, Query, Store, Subscription, Timestamp,
};

/// Collection holding conversation documents.
pub const CHATS: &str = "chats";

/// Message sub-collection path for a chat.
fn messages_collection(chat_id: &str) -> String {
    format!("{}/{}/messages", CHATS, chat_id)
}

/// Member sub-collection path for a chat.
fn members_collection(chat_id: &str) -> String {
    format!("{}/{}/members", CHATS, chat_id)
}

/// A 1:1 conversation with its denormalized summary.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    /// Deterministic pair id.
    pub id: String,
    /// The two participants.
    pub participant_ids: Vec<String>,
    /// Store commit time of creation.
    pub created_at: Option<Timestamp>,
    /// Text of the most recently appended message, empty before any send.
    pub last_message_text: String,
    /// Commit time of the most recent append (creation time before any send).
    pub last_message_at: Option<Timestamp>,
    /// Sender of the most recent message, empty before any send.
    pub last_sender_id: String,
}

impl Conversation {
    fn from_document(doc: &Document) -> Result<Self> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Wire {
            participant_ids: Vec<String>,
            created_at: Option<Timestamp>,
            #[serde(default)]
            last_message_text: String,
            last_message_at: Option<Timestamp>,
            #[serde(default)]
            last_sender_id: String,
        }

        let wire: Wire = doc.decode()?;
        Ok(Self {
            id: doc.id.clone(),
            participant_ids: wire.participant_ids,
            created_at: wire.created_at,
            last_message_text: wire.last_message_text,
            last_message_at: wire.last_message_at,
            last_sender_id: wire.last_sender_id,
        })
    }
}

/// One message in a conversation's append-only log.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    /// Auto-assigned message id.
    pub id: String,
    /// Sender's user id.
    pub sender_id: String,
    /// Message text, trimmed.
    pub text: String,
    /// Store commit time. `None` while a write is still in flight.
    pub created_at: Option<Timestamp>,
}

impl ChatMessage {
    fn from_document(doc: &Document) -> Result<Self> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Wire {
            sender_id: String,
            text: String,
            created_at: Option<Timestamp>,
        }

        let wire: Wire = doc.decode()?;
        Ok(Self {
            id: doc.id.clone(),
            sender_id: wire.sender_id,
            text: wire.text,
            created_at: wire.created_at,
        })
    }
}

/// Live feed over this user's conversations, newest activity first.
///
/// Each push maps the full snapshot; the local list is a complete
/// replacement, never a patch. Dropping the feed cancels the listener.
pub struct ConversationFeed {
    subscription: Subscription,
}

impl ConversationFeed {
    /// The current conversation list.
    pub fn current(&self) -> Vec<Conversation> {
        map_conversations(&self.subscription.current())
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

/// Live feed over the most recent messages of one chat.
///
/// Snapshots arrive newest-first from the store and are re-sorted ascending
/// for display. Entries without a resolved server timestamp are filtered
/// out to keep the sort order stable while a write is in flight.
pub struct MessageFeed {
    subscription: Subscription,
}

impl MessageFeed {
    /// The current message list, ascending by commit time.
    pub fn current(&self) -> Vec<ChatMessage> {
        map_messages(&self.subscription.current())
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

fn map_conversations(docs: &[Document]) -> Vec<Conversation> {
    docs.iter()
        .filter_map(|doc| match Conversation::from_document(doc) {
            Ok(conversation) => Some(conversation),
            Err(err) => {
                tracing::warn!("Skipping undecodable conversation {}: {}", doc.id, err);
                None
            }
        })
        .collect()
}

fn map_messages(docs: &[Document]) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = docs
        .iter()
        .filter_map(|doc| match ChatMessage::from_document(doc) {
            Ok(message) => Some(message),
            Err(err) => {
                tracing::warn!("Skipping undecodable message {}: {}", doc.id, err);
                None
            }
        })
        .filter(|message| message.created_at.is_some())
        .collect();
    messages.sort_by_key(|message| message.created_at);
    messages
}

/// Service owning chat-summary consistency for one user.
pub struct MessagingService {
    /// Bound caller identity.
    uid: String,
    store: Arc<Store>,
    /// Message window size for [`MessagingService::subscribe_messages`].
    message_page_size: usize,
    /// Batch size for cascading deletes.
    delete_batch_size: usize,
}

impl MessagingService {
    /// Create a service bound to one user identity.
    pub fn new(
        uid: impl Into<String>,
        store: Arc<Store>,
        message_page_size: usize,
        delete_batch_size: usize,
    ) -> Self {
        Self {
            uid: uid.into(),
            store,
            message_page_size,
            delete_batch_size,
        }
    }

    /// The identity this service acts on behalf of.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Deterministic chat id for this user and `other`.
    ///
    /// Same sorted-pair scheme as the relationship key, so
    /// `chat_id(a, b) == chat_id(b, a)`.
    pub fn chat_id(&self, other: &str) -> String {
        pair_key(&self.uid, other)
    }

    /// Return the pair's conversation id, creating the conversation if it
    /// does not exist yet.
    ///
    /// Creation is transactional and idempotent: when both participants
    /// call concurrently, the first committer creates the document and
    /// seeds both member records; the second observes the existing record
    /// and returns the same id.
    pub async fn get_or_create_conversation(&self, other: &str) -> Result<String> {
        if other == self.uid {
            return Err(Error::Validation("cannot start a chat with yourself".into()));
        }
        let chat_id = self.chat_id(other);
        let chat_ref = DocumentRef::new(CHATS, chat_id.clone());
        let me_ref = DocumentRef::new(members_collection(&chat_id), self.uid.clone());
        let other_ref = DocumentRef::new(members_collection(&chat_id), other);
        let participants = json!([self.uid.clone(), other]);

        let created = self
            .store
            .run_transaction(|tx| {
                if tx.get(&chat_ref)?.is_some() {
                    return Ok(false);
                }
                tx.set(
                    &chat_ref,
                    json!({
                        "participantIds": participants,
                        "createdAt": server_timestamp(),
                        "lastMessageText": "",
                        "lastMessageAt": server_timestamp(),
                        "lastSenderId": "",
                    }),
                )?;
                tx.set(&me_ref, json!({"lastReadAt": server_timestamp()}))?;
                tx.set(&other_ref, json!({"lastReadAt": server_timestamp()}))?;
                Ok(true)
            })
            .await?;

        if created {
            tracing::info!("Created conversation {}", chat_id);
        }
        Ok(chat_id)
    }

    /// Append a message and update the conversation summary.
    ///
    /// Empty or whitespace-only text is rejected locally with a validation
    /// error before any store round-trip. The summary merge is only issued
    /// after the append commits; if the merge fails the send still returns
    /// the appended message, because the message did send.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<ChatMessage> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Error::Validation("message text is empty".into()));
        }

        let message_id = Uuid::new_v4().to_string();
        let message_ref = DocumentRef::new(messages_collection(chat_id), message_id.clone());
        let created_at = self
            .store
            .set(
                &message_ref,
                json!({
                    "senderId": self.uid.clone(),
                    "text": trimmed,
                    "createdAt": server_timestamp(),
                }),
            )
            .await?;

        let chat_ref = DocumentRef::new(CHATS, chat_id);
        let summary = json!({
            "lastMessageText": trimmed,
            "lastMessageAt": server_timestamp(),
            "lastSenderId": self.uid.clone(),
        });
        if let Err(err) = self.store.set_merge(&chat_ref, summary).await {
            // The message itself did send; the summary will catch up on the
            // next successful send.
            tracing::warn!("Summary update for {} failed after append: {}", chat_id, err);
        }

        tracing::debug!("Sent message {} in {}", message_id, chat_id);
        Ok(ChatMessage {
            id: message_id,
            sender_id: self.uid.clone(),
            text: trimmed.to_string(),
            created_at: Some(created_at),
        })
    }

    /// Subscribe to this user's conversations, newest activity first.
    pub async fn subscribe_conversations(&self) -> Result<ConversationFeed> {
        let query = Query::collection(CHATS)
            .array_contains("participantIds", json!(self.uid.clone()))
            .order_by("lastMessageAt", Direction::Descending);
        let subscription = self.store.subscribe(query).await?;
        Ok(ConversationFeed { subscription })
    }

    /// Subscribe to the most recent messages of a chat.
    ///
    /// The window covers the newest `message_page_size` messages; emitted
    /// lists are re-sorted ascending for display.
    pub async fn subscribe_messages(&self, chat_id: &str) -> Result<MessageFeed> {
        let query = Query::collection(messages_collection(chat_id))
            .order_by("createdAt", Direction::Descending)
            .limit(self.message_page_size);
        let subscription = self.store.subscribe(query).await?;
        Ok(MessageFeed { subscription })
    }

    /// Record that this user has read the chat up to now.
    ///
    /// Best-effort: failures are swallowed, a stale read marker is
    /// non-critical.
    pub async fn mark_read(&self, chat_id: &str) {
        let member_ref = DocumentRef::new(members_collection(chat_id), self.uid.clone());
        if let Err(err) = self
            .store
            .set_merge(&member_ref, json!({"lastReadAt": server_timestamp()}))
            .await
        {
            tracing::debug!("mark_read for {} failed: {}", chat_id, err);
        }
    }

    /// Delete a conversation and everything under it.
    ///
    /// Messages go first in bounded batches, then member records, then the
    /// conversation document. Each stage must complete before the next; a
    /// stage failure stops the cascade and surfaces the error, leaving a
    /// partial state that a re-invocation resumes (already-deleted items
    /// are skipped).
    pub async fn delete_conversation_cascade(&self, chat_id: &str) -> Result<()> {
        run_conversation_cascade(&self.store, chat_id, self.delete_batch_size).await
    }
}

/// The cascade body, shared with the unfriend path in [`crate::friends`].
pub(crate) async fn run_conversation_cascade(
    store: &Store,
    chat_id: &str,
    batch_size: usize,
) -> Result<()> {
    let messages = messages_collection(chat_id);
    loop {
        let deleted = store.batch_delete(&messages, batch_size).await?;
        if deleted == 0 {
            break;
        }
        tracing::debug!("Deleted {} messages from {}", deleted, chat_id);
    }

    let members = members_collection(chat_id);
    loop {
        let deleted = store.batch_delete(&members, batch_size).await?;
        if deleted == 0 {
            break;
        }
    }

    store.delete(&DocumentRef::new(CHATS, chat_id)).await?;
    tracing::info!("Deleted conversation {}", chat_id);
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: usize = 100;
    const BATCH: usize = 300;

    fn service(uid: &str, store: &Arc<Store>) -> MessagingService {
        MessagingService::new(uid, Arc::clone(store), PAGE, BATCH)
    }

    async fn chat_doc(store: &Store, chat_id: &str) -> Document {
        store
            .get(&DocumentRef::new(CHATS, chat_id))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_chat_id_symmetric() {
        let store = Arc::new(Store::new());
        let alice = service("alice", &store);
        let bob = service("bob", &store);
        assert_eq!(alice.chat_id("bob"), bob.chat_id("alice"));
    }

    #[tokio::test]
    async fn test_get_or_create_seeds_summary_and_members() {
        let store = Arc::new(Store::new());
        let alice = service("alice", &store);

        let chat_id = alice.get_or_create_conversation("bob").await.unwrap();
        assert_eq!(chat_id, "alice_bob");

        let doc = chat_doc(&store, &chat_id).await;
        let conversation = Conversation::from_document(&doc).unwrap();
        assert_eq!(conversation.participant_ids, vec!["alice", "bob"]);
        assert_eq!(conversation.last_message_text, "");
        assert_eq!(conversation.last_sender_id, "");
        // Creation sentinel: lastMessageAt starts at the creation time.
        assert_eq!(conversation.last_message_at, conversation.created_at);

        for member in ["alice", "bob"] {
            let member_doc = store
                .get(&DocumentRef::new(members_collection(&chat_id), member))
                .await
                .unwrap()
                .unwrap();
            assert!(member_doc.get("lastReadAt").is_some());
        }
    }

    #[tokio::test]
    async fn test_get_or_create_idempotent_and_concurrent() {
        let store = Arc::new(Store::new());
        let alice = service("alice", &store);
        let bob = service("bob", &store);

        let (a, b) = tokio::join!(
            alice.get_or_create_conversation("bob"),
            bob.get_or_create_conversation("alice"),
        );
        assert_eq!(a.unwrap(), b.unwrap());

        // Re-running returns the same id without touching the record.
        let doc_before = chat_doc(&store, "alice_bob").await;
        let again = alice.get_or_create_conversation("bob").await.unwrap();
        assert_eq!(again, "alice_bob");
        let doc_after = chat_doc(&store, "alice_bob").await;
        assert_eq!(doc_before.version, doc_after.version);
    }

    #[tokio::test]
    async fn test_self_chat_rejected() {
        let store = Arc::new(Store::new());
        let alice = service("alice", &store);
        let err = alice.get_or_create_conversation("alice").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_send_message_updates_summary() {
        let store = Arc::new(Store::new());
        let alice = service("alice", &store);
        let chat_id = alice.get_or_create_conversation("bob").await.unwrap();

        let message = alice.send_message(&chat_id, "  hello  ").await.unwrap();
        assert_eq!(message.text, "hello");
        assert!(message.created_at.is_some());

        let conversation =
            Conversation::from_document(&chat_doc(&store, &chat_id).await).unwrap();
        assert_eq!(conversation.last_message_text, "hello");
        assert_eq!(conversation.last_sender_id, "alice");
        assert_eq!(conversation.last_message_at, message.created_at);
    }

    #[tokio::test]
    async fn test_empty_message_rejected_with_zero_writes() {
        let store = Arc::new(Store::new());
        let alice = service("alice", &store);
        let chat_id = alice.get_or_create_conversation("bob").await.unwrap();

        for text in ["", "   ", "\n\t"] {
            let err = alice.send_message(&chat_id, text).await.unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
        }

        assert!(store
            .query(&Query::collection(messages_collection(&chat_id)))
            .await
            .unwrap()
            .is_empty());
        let conversation =
            Conversation::from_document(&chat_doc(&store, &chat_id).await).unwrap();
        assert_eq!(conversation.last_message_text, "");
    }

    #[tokio::test]
    async fn test_summary_failure_does_not_fail_send() {
        let store = Arc::new(Store::new());
        let alice = service("alice", &store);
        let chat_id = alice.get_or_create_conversation("bob").await.unwrap();

        // Let the append commit, then fail the summary merge.
        alice.send_message(&chat_id, "first").await.unwrap();
        store.fail_next_writes(CHATS, 1);
        let message = alice.send_message(&chat_id, "second").await.unwrap();
        assert_eq!(message.text, "second");

        // Message is durable, summary is stale until the next send.
        let messages = store
            .query(&Query::collection(messages_collection(&chat_id)))
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        let conversation =
            Conversation::from_document(&chat_doc(&store, &chat_id).await).unwrap();
        assert_eq!(conversation.last_message_text, "first");
    }

    #[tokio::test]
    async fn test_summary_last_write_wins_by_commit_time() {
        let store = Arc::new(Store::new());
        let alice = service("alice", &store);
        let bob = service("bob", &store);
        let chat_id = alice.get_or_create_conversation("bob").await.unwrap();

        let (a, b) = tokio::join!(
            alice.send_message(&chat_id, "from alice"),
            bob.send_message(&chat_id, "from bob"),
        );
        let a = a.unwrap();
        let b = b.unwrap();

        let conversation =
            Conversation::from_document(&chat_doc(&store, &chat_id).await).unwrap();
        let last = if a.created_at > b.created_at { &a } else { &b };
        assert_eq!(conversation.last_message_text, last.text);
        assert_eq!(conversation.last_sender_id, last.sender_id);
    }

    #[tokio::test]
    async fn test_conversation_feed_orders_by_activity() {
        let store = Arc::new(Store::new());
        let alice = service("alice", &store);

        let with_bob = alice.get_or_create_conversation("bob").await.unwrap();
        let with_carol = alice.get_or_create_conversation("carol").await.unwrap();

        let mut feed = alice.subscribe_conversations().await.unwrap();
        assert_eq!(feed.current().len(), 2);

        alice.send_message(&with_bob, "hi bob").await.unwrap();
        assert!(feed.changed().await);
        let list = feed.current();
        assert_eq!(list[0].id, with_bob);
        assert_eq!(list[1].id, with_carol);

        alice.send_message(&with_carol, "hi carol").await.unwrap();
        assert!(feed.changed().await);
        assert_eq!(feed.current()[0].id, with_carol);
    }

    #[tokio::test]
    async fn test_message_feed_ascending_and_filters_unresolved() {
        let store = Arc::new(Store::new());
        let alice = service("alice", &store);
        let chat_id = alice.get_or_create_conversation("bob").await.unwrap();

        alice.send_message(&chat_id, "one").await.unwrap();
        alice.send_message(&chat_id, "two").await.unwrap();

        // A pending write that has no resolved server timestamp yet.
        store
            .set(
                &DocumentRef::new(messages_collection(&chat_id), "pending"),
                json!({"senderId": "bob", "text": "in flight"}),
            )
            .await
            .unwrap();

        let feed = alice.subscribe_messages(&chat_id).await.unwrap();
        let messages = feed.current();
        assert_eq!(
            messages.iter().map(|m| m.text.as_str()).collect::<Vec<_>>(),
            vec!["one", "two"]
        );
    }

    #[tokio::test]
    async fn test_message_feed_window_keeps_newest() {
        let store = Arc::new(Store::new());
        let alice = MessagingService::new("alice", Arc::clone(&store), 2, BATCH);
        let chat_id = alice.get_or_create_conversation("bob").await.unwrap();

        for text in ["one", "two", "three"] {
            alice.send_message(&chat_id, text).await.unwrap();
        }

        let feed = alice.subscribe_messages(&chat_id).await.unwrap();
        let messages = feed.current();
        assert_eq!(
            messages.iter().map(|m| m.text.as_str()).collect::<Vec<_>>(),
            vec!["two", "three"]
        );
    }

    #[tokio::test]
    async fn test_mark_read_updates_member_and_swallows_failures() {
        let store = Arc::new(Store::new());
        let alice = service("alice", &store);
        let chat_id = alice.get_or_create_conversation("bob").await.unwrap();

        let member_ref = DocumentRef::new(members_collection(&chat_id), "alice");
        let before = store.get(&member_ref).await.unwrap().unwrap();
        alice.mark_read(&chat_id).await;
        let after = store.get(&member_ref).await.unwrap().unwrap();
        assert!(after.update_time > before.update_time);

        // Failure path must not panic or surface an error.
        store.fail_next_writes(&members_collection(&chat_id), 1);
        alice.mark_read(&chat_id).await;
        let unchanged = store.get(&member_ref).await.unwrap().unwrap();
        assert_eq!(unchanged.update_time, after.update_time);
    }

    #[tokio::test]
    async fn test_cascade_deletes_in_batches_and_resumes() {
        let store = Arc::new(Store::new());
        let alice = MessagingService::new("alice", Arc::clone(&store), PAGE, 2);
        let chat_id = alice.get_or_create_conversation("bob").await.unwrap();
        for i in 0..5 {
            alice
                .send_message(&chat_id, &format!("message {}", i))
                .await
                .unwrap();
        }

        // Fail mid-way through the message stage.
        store.fail_next_writes(&messages_collection(&chat_id), 1);
        let err = alice.delete_conversation_cascade(&chat_id).await.unwrap_err();
        assert!(err.is_recoverable());
        // Chat doc survives a stopped cascade.
        assert!(store
            .get(&DocumentRef::new(CHATS, chat_id.clone()))
            .await
            .unwrap()
            .is_some());

        // Re-invocation converges to nothing left.
        alice.delete_conversation_cascade(&chat_id).await.unwrap();
        assert!(store
            .query(&Query::collection(messages_collection(&chat_id)))
            .await
            .unwrap()
            .is_empty());
        assert!(store
            .query(&Query::collection(members_collection(&chat_id)))
            .await
            .unwrap()
            .is_empty());
        assert!(store
            .get(&DocumentRef::new(CHATS, chat_id))
            .await
            .unwrap()
            .is_none());
    }
}
