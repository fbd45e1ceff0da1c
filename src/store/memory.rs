//! In-memory document store with transactions and snapshot listeners.
//!
//! ## Consistency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        STORE CONSISTENCY MODEL                          │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Point writes                                                           │
//! │  ────────────                                                            │
//! │  set / set_merge / delete each commit atomically with a single          │
//! │  store-assigned timestamp. Commit timestamps are strictly monotonic     │
//! │  per store instance.                                                    │
//! │                                                                         │
//! │  Transactions                                                           │
//! │  ────────────                                                            │
//! │  run_transaction serializes against all other commits. Reads inside    │
//! │  the closure observe pre-transaction state; writes are staged and      │
//! │  applied atomically under one commit timestamp. A closure error        │
//! │  aborts the transaction with nothing applied.                          │
//! │                                                                         │
//! │  Snapshot listeners                                                     │
//! │  ──────────────────                                                      │
//! │  subscribe() delivers the full current result set immediately, then    │
//! │  re-delivers the full matching result set after every commit that      │
//! │  touches the queried collection. Deliveries are complete replacements, │
//! │  never diffs, and identical consecutive snapshots are suppressed.      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Mutual exclusion for shared records (relationships, conversations,
//! safety records) is provided entirely by this transaction primitive;
//! services never hold client-side locks around store state.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::error::{Error, Result};

use super::document::{into_fields, is_server_timestamp, Document, DocumentRef, Timestamp};
use super::query::Query;

/// An immutable full query result set, as delivered to listeners.
pub type QuerySnapshot = Arc<Vec<Document>>;

/// Read access rule: returns `true` when a read of the given document must
/// be denied. Models the hosted store's security-rule denials.
pub type ReadRule = Arc<dyn Fn(&DocumentRef) -> bool + Send + Sync>;

/// A document at rest.
struct StoredDoc {
    data: Map<String, Value>,
    create_time: Timestamp,
    update_time: Timestamp,
    version: u64,
}

impl StoredDoc {
    fn materialize(&self, id: &str) -> Document {
        Document {
            id: id.to_string(),
            data: self.data.clone(),
            create_time: self.create_time,
            update_time: self.update_time,
            version: self.version,
        }
    }
}

/// A registered snapshot listener.
struct Listener {
    id: u64,
    query: Query,
    sender: watch::Sender<QuerySnapshot>,
}

#[cfg(test)]
struct WriteFault {
    collection: String,
    remaining: u32,
}

/// Shared store state, guarded by a single lock.
struct State {
    collections: HashMap<String, BTreeMap<String, StoredDoc>>,
    /// Last commit timestamp in microseconds. Strictly increasing.
    clock_micros: i64,
    next_listener_id: u64,
    listeners: Vec<Listener>,
    #[cfg(test)]
    write_fault: Option<WriteFault>,
}

impl State {
    fn new() -> Self {
        Self {
            collections: HashMap::new(),
            clock_micros: 0,
            next_listener_id: 1,
            listeners: Vec::new(),
            #[cfg(test)]
            write_fault: None,
        }
    }

    fn get(&self, doc_ref: &DocumentRef) -> Option<Document> {
        self.collections
            .get(&doc_ref.collection)
            .and_then(|coll| coll.get(&doc_ref.id))
            .map(|doc| doc.materialize(&doc_ref.id))
    }

    fn run_query(&self, query: &Query) -> Vec<Document> {
        match self.collections.get(&query.collection) {
            Some(coll) => {
                let docs: Vec<Document> = coll
                    .iter()
                    .map(|(id, doc)| doc.materialize(id))
                    .collect();
                query.execute(docs.iter())
            }
            None => Vec::new(),
        }
    }
}

/// A single staged write.
enum WriteOp {
    /// Replace the document's fields entirely.
    Set(DocumentRef, Map<String, Value>),
    /// Merge fields into the document, creating it if absent.
    Merge(DocumentRef, Map<String, Value>),
    /// Delete the document. Deleting an absent document is a no-op.
    Delete(DocumentRef),
}

impl WriteOp {
    fn doc_ref(&self) -> &DocumentRef {
        match self {
            WriteOp::Set(r, _) | WriteOp::Merge(r, _) | WriteOp::Delete(r) => r,
        }
    }
}

/// Handle to an in-memory document store.
///
/// Clones share the same underlying data. A clone produced by
/// [`Store::with_read_rule`] additionally applies an access rule to reads,
/// which is how tests model the hosted store denying a cross-user read.
#[derive(Clone)]
pub struct Store {
    state: Arc<Mutex<State>>,
    read_rule: Option<ReadRule>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::new())),
            read_rule: None,
        }
    }

    /// A handle over the same data where reads matching `rule` fail with
    /// [`Error::PermissionDenied`]. Writes are unaffected.
    pub fn with_read_rule<F>(&self, rule: F) -> Store
    where
        F: Fn(&DocumentRef) -> bool + Send + Sync + 'static,
    {
        Store {
            state: Arc::clone(&self.state),
            read_rule: Some(Arc::new(rule)),
        }
    }

    fn check_read(&self, doc_ref: &DocumentRef) -> Result<()> {
        if let Some(rule) = &self.read_rule {
            if rule(doc_ref) {
                return Err(Error::PermissionDenied(doc_ref.path()));
            }
        }
        Ok(())
    }

    /// Read a single document.
    pub async fn get(&self, doc_ref: &DocumentRef) -> Result<Option<Document>> {
        self.check_read(doc_ref)?;
        Ok(self.state.lock().get(doc_ref))
    }

    /// Write a document, replacing any existing fields.
    ///
    /// Returns the commit timestamp.
    pub async fn set(&self, doc_ref: &DocumentRef, data: Value) -> Result<Timestamp> {
        let fields = into_fields(data)?;
        let mut state = self.state.lock();
        commit(&mut state, vec![WriteOp::Set(doc_ref.clone(), fields)])
    }

    /// Merge fields into a document, creating it if absent.
    ///
    /// Returns the commit timestamp.
    pub async fn set_merge(&self, doc_ref: &DocumentRef, data: Value) -> Result<Timestamp> {
        let fields = into_fields(data)?;
        let mut state = self.state.lock();
        commit(&mut state, vec![WriteOp::Merge(doc_ref.clone(), fields)])
    }

    /// Delete a document. Deleting an absent document succeeds as a no-op.
    pub async fn delete(&self, doc_ref: &DocumentRef) -> Result<()> {
        let mut state = self.state.lock();
        commit(&mut state, vec![WriteOp::Delete(doc_ref.clone())])?;
        Ok(())
    }

    /// Run a serialized read-modify-write transaction.
    ///
    /// Reads inside the closure observe pre-transaction state. Writes are
    /// staged and applied atomically under one commit timestamp when the
    /// closure returns `Ok`; a closure error aborts with nothing applied.
    pub async fn run_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let mut state = self.state.lock();
        let (result, writes) = {
            let mut tx = Transaction {
                state: &state,
                read_rule: self.read_rule.as_ref(),
                writes: Vec::new(),
            };
            let result = f(&mut tx)?;
            (result, tx.writes)
        };
        commit(&mut state, writes)?;
        Ok(result)
    }

    /// Execute a query once.
    pub async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        self.check_read(&DocumentRef::new(query.collection.clone(), ""))?;
        Ok(self.state.lock().run_query(query))
    }

    /// Register a snapshot listener for a query.
    ///
    /// The returned subscription carries the current result set immediately
    /// and is re-notified with a full replacement snapshot after every
    /// commit touching the queried collection.
    pub async fn subscribe(&self, query: Query) -> Result<Subscription> {
        self.check_read(&DocumentRef::new(query.collection.clone(), ""))?;
        let mut state = self.state.lock();
        let initial: QuerySnapshot = Arc::new(state.run_query(&query));
        let (sender, rx) = watch::channel(initial);
        let id = state.next_listener_id;
        state.next_listener_id += 1;
        state.listeners.push(Listener { id, query, sender });
        Ok(Subscription {
            id,
            rx,
            state: Arc::clone(&self.state),
        })
    }

    /// Delete up to `limit` documents from a collection in one commit.
    ///
    /// Returns the number deleted. The building block for cascading
    /// deletes: callers repeat until it returns zero.
    pub async fn batch_delete(&self, collection: &str, limit: usize) -> Result<usize> {
        let mut state = self.state.lock();
        let ids: Vec<String> = match state.collections.get(collection) {
            Some(coll) => coll.keys().take(limit).cloned().collect(),
            None => Vec::new(),
        };
        if ids.is_empty() {
            return Ok(0);
        }
        let count = ids.len();
        let ops = ids
            .into_iter()
            .map(|id| WriteOp::Delete(DocumentRef::new(collection, id)))
            .collect();
        commit(&mut state, ops)?;
        Ok(count)
    }

    /// Fail the next `count` commits that touch the given collection with
    /// [`Error::Unavailable`].
    #[cfg(test)]
    pub fn fail_next_writes(&self, collection: &str, count: u32) {
        self.state.lock().write_fault = Some(WriteFault {
            collection: collection.to_string(),
            remaining: count,
        });
    }
}

/// Apply a set of staged writes as one commit and notify listeners.
fn commit(state: &mut State, ops: Vec<WriteOp>) -> Result<Timestamp> {
    #[cfg(test)]
    {
        let matches_fault = state.write_fault.as_ref().is_some_and(|fault| {
            fault.remaining > 0
                && ops
                    .iter()
                    .any(|op| op.doc_ref().collection == fault.collection)
        });
        if matches_fault {
            let fault = state
                .write_fault
                .as_mut()
                .ok_or_else(|| Error::Internal("write fault vanished".into()))?;
            fault.remaining -= 1;
            let collection = fault.collection.clone();
            if fault.remaining == 0 {
                state.write_fault = None;
            }
            return Err(Error::Unavailable(format!(
                "injected write failure for {}",
                collection
            )));
        }
    }

    // An all-no-op commit (deletes of absent documents) leaves the clock
    // and listeners untouched.
    let mutates = ops.iter().any(|op| match op {
        WriteOp::Set(..) | WriteOp::Merge(..) => true,
        WriteOp::Delete(doc_ref) => state
            .collections
            .get(&doc_ref.collection)
            .is_some_and(|coll| coll.contains_key(&doc_ref.id)),
    });
    if !mutates {
        return Ok(Timestamp::from_micros(state.clock_micros));
    }

    let commit_micros = (state.clock_micros + 1).max(crate::time::now_timestamp_micros());
    state.clock_micros = commit_micros;
    let commit_time = Timestamp::from_micros(commit_micros);

    let mut touched: HashSet<String> = HashSet::new();
    for op in ops {
        touched.insert(op.doc_ref().collection.clone());
        match op {
            WriteOp::Set(doc_ref, mut fields) => {
                resolve_sentinels(&mut fields, commit_time);
                let coll = state.collections.entry(doc_ref.collection).or_default();
                match coll.get_mut(&doc_ref.id) {
                    Some(existing) => {
                        existing.data = fields;
                        existing.update_time = commit_time;
                        existing.version += 1;
                    }
                    None => {
                        coll.insert(
                            doc_ref.id,
                            StoredDoc {
                                data: fields,
                                create_time: commit_time,
                                update_time: commit_time,
                                version: 1,
                            },
                        );
                    }
                }
            }
            WriteOp::Merge(doc_ref, mut fields) => {
                resolve_sentinels(&mut fields, commit_time);
                let coll = state.collections.entry(doc_ref.collection).or_default();
                match coll.get_mut(&doc_ref.id) {
                    Some(existing) => {
                        for (key, value) in fields {
                            existing.data.insert(key, value);
                        }
                        existing.update_time = commit_time;
                        existing.version += 1;
                    }
                    None => {
                        coll.insert(
                            doc_ref.id,
                            StoredDoc {
                                data: fields,
                                create_time: commit_time,
                                update_time: commit_time,
                                version: 1,
                            },
                        );
                    }
                }
            }
            WriteOp::Delete(doc_ref) => {
                if let Some(coll) = state.collections.get_mut(&doc_ref.collection) {
                    coll.remove(&doc_ref.id);
                }
            }
        }
    }

    notify(state, &touched);
    Ok(commit_time)
}

/// Resolve top-level server-timestamp sentinels to the commit timestamp.
fn resolve_sentinels(fields: &mut Map<String, Value>, commit_time: Timestamp) {
    for value in fields.values_mut() {
        if is_server_timestamp(value) {
            *value = Value::from(commit_time.as_micros());
        }
    }
}

/// Re-deliver full snapshots to listeners on the touched collections.
fn notify(state: &mut State, touched: &HashSet<String>) {
    state.listeners.retain(|l| !l.sender.is_closed());

    let mut snapshots: Vec<(usize, Vec<Document>)> = Vec::new();
    for (idx, listener) in state.listeners.iter().enumerate() {
        if touched.contains(&listener.query.collection) {
            snapshots.push((idx, state.run_query(&listener.query)));
        }
    }
    for (idx, snapshot) in snapshots {
        state.listeners[idx].sender.send_if_modified(|current| {
            if **current != snapshot {
                *current = Arc::new(snapshot);
                true
            } else {
                false
            }
        });
    }
}

/// A transaction context handed to the [`Store::run_transaction`] closure.
pub struct Transaction<'a> {
    state: &'a State,
    read_rule: Option<&'a ReadRule>,
    writes: Vec<WriteOp>,
}

impl Transaction<'_> {
    /// Read a document as of the transaction start.
    pub fn get(&self, doc_ref: &DocumentRef) -> Result<Option<Document>> {
        if let Some(rule) = self.read_rule {
            if rule(doc_ref) {
                return Err(Error::PermissionDenied(doc_ref.path()));
            }
        }
        Ok(self.state.get(doc_ref))
    }

    /// Stage a full write of a document.
    pub fn set(&mut self, doc_ref: &DocumentRef, data: Value) -> Result<()> {
        let fields = into_fields(data)?;
        self.writes.push(WriteOp::Set(doc_ref.clone(), fields));
        Ok(())
    }

    /// Stage a field merge into a document.
    pub fn update(&mut self, doc_ref: &DocumentRef, data: Value) -> Result<()> {
        let fields = into_fields(data)?;
        self.writes.push(WriteOp::Merge(doc_ref.clone(), fields));
        Ok(())
    }

    /// Stage a document deletion.
    pub fn delete(&mut self, doc_ref: &DocumentRef) {
        self.writes.push(WriteOp::Delete(doc_ref.clone()));
    }
}

/// A live snapshot listener registration.
///
/// Dropping the subscription (or calling [`Subscription::cancel`])
/// unregisters the listener.
pub struct Subscription {
    id: u64,
    rx: watch::Receiver<QuerySnapshot>,
    state: Arc<Mutex<State>>,
}

impl Subscription {
    /// The most recently delivered snapshot.
    pub fn current(&self) -> QuerySnapshot {
        self.rx.borrow().clone()
    }

    /// Wait for the next snapshot.
    ///
    /// Returns `false` once the subscription has been cancelled.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Unregister the listener.
    pub fn cancel(&self) {
        self.state.lock().listeners.retain(|l| l.id != self.id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ============================================================================
// TESTS
// ============================================================================
