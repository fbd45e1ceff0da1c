//! # Store Module
//!
//! Transactional document store with realtime snapshot listeners.
//!
//! ## Store Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          DOCUMENT STORE                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  Collections (schema-less JSON documents)                       │   │
//! │  │  ─────────────────────────────────────────                       │   │
//! │  │                                                                 │   │
//! │  │  users                  - profile documents                    │   │
//! │  │  relationships          - pairwise friendship records          │   │
//! │  │  chats                  - conversation summaries               │   │
//! │  │  chats/{id}/messages    - append-only message log              │   │
//! │  │  chats/{id}/members     - per-participant read markers         │   │
//! │  │  users/{id}/blocks      - owner-side block records             │   │
//! │  │  users/{id}/mutes       - owner-side mute records              │   │
//! │  │  reports_users          - abuse reports against users          │   │
//! │  │  reports_reviews        - abuse reports against reviews        │   │
//! │  │  professors             - professor review documents           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌────────────────────┐   │
//! │  │  Point ops       │  │  Transactions    │  │  Subscriptions     │   │
//! │  │                  │  │                  │  │                    │   │
//! │  │  get / set /     │  │  Serialized      │  │  Filtered, ordered │   │
//! │  │  set_merge /     │  │  read-modify-    │  │  queries that      │   │
//! │  │  delete /        │  │  write, single   │  │  re-deliver the    │   │
//! │  │  batch_delete    │  │  commit time     │  │  full result set   │   │
//! │  └──────────────────┘  └──────────────────┘  └────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The services in this crate treat the store as an external collaborator:
//! the in-memory implementation here carries the full contract they rely on
//! (atomic single-document commits, serialized transactions, monotonic
//! commit timestamps, full-replace snapshot delivery), so everything above
//! it is testable without a hosted backend.

mod document;
mod memory;
mod query;

pub use document::{
    server_timestamp, Document, DocumentRef, Timestamp, SERVER_TIMESTAMP_FIELD,
};
pub use memory::{QuerySnapshot, ReadRule, Store, Subscription, Transaction};
pub use query::{Direction, Filter, Query};
