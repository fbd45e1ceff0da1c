//! # Directory Module
//!
//! Campus user directory: signup gate, profile loading, suggestions and
//! search.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Directory Module                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  sign_up ──► email gate ──► IdentityProvider ──► users/{id} │
//! │              (campus domain, checked first)                 │
//! │                                                             │
//! │  load ──► users/* ──► in-memory roster                      │
//! │                          │                                  │
//! │                          ├─► suggested()   same year+major  │
//! │                          ├─► search()      scored ranking   │
//! │                          ├─► popular_majors()               │
//! │                          └─► available_years()              │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The email gate runs before anything else: a non-campus address is
//! rejected with [`Error::Validation`] without calling the identity
//! provider or touching the store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;

use crate::error::{Error, Result};
use crate::store::{server_timestamp, Document, DocumentRef, Query, Store};

/// Collection holding user profile documents.
pub const USERS: &str = "users";

/// Score contribution of a name hit on the search term.
const SCORE_NAME: i32 = 10;
/// Score contribution of a major hit on the search term.
const SCORE_MAJOR: i32 = 5;
/// Score contribution of a year hit on the search term.
const SCORE_YEAR: i32 = 3;
/// Score contribution of a matching major or year filter.
const SCORE_FILTER: i32 = 5;

/// A user profile as stored in the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    /// Opaque unique user id.
    pub id: String,
    /// Display name.
    pub full_name: String,
    /// Class year, e.g. "2026".
    pub year: String,
    /// Declared major.
    pub major: String,
    /// Normalized campus email.
    pub email: String,
}

impl UserProfile {
    /// Build a profile from a stored document. Missing fields default to
    /// empty strings, matching the lenient reads everywhere else.
    pub fn from_document(doc: &Document) -> Self {
        let text = |field: &str| {
            doc.get(field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        Self {
            id: doc.id.clone(),
            full_name: text("fullName"),
            year: text("year"),
            major: text("major"),
            email: text("email"),
        }
    }
}

/// External collaborator issuing opaque unique user ids at signup.
///
/// Only [`sign_up`] touches this; everything else in the crate works from
/// an already-issued id.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Register the credentials and return the new user id.
    async fn create_user(&self, email: &str, password: &str) -> Result<String>;
}

/// Lowercase and trim an email address.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Whether a normalized email belongs to the allowed campus domain.
fn is_campus_email(normalized: &str, allowed_domain: &str) -> bool {
    let mut parts = normalized.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => !local.is_empty() && domain == allowed_domain,
        _ => false,
    }
}

/// Register a new user and write their profile document.
///
/// The campus-domain gate runs first: a rejected email produces
/// [`Error::Validation`] before the provider is called and before any
/// store write.
pub async fn sign_up(
    provider: &dyn IdentityProvider,
    store: &Store,
    allowed_domain: &str,
    email: &str,
    password: &str,
    full_name: &str,
    year: &str,
    major: &str,
) -> Result<String> {
    let normalized = normalize_email(email);
    if !is_campus_email(&normalized, allowed_domain) {
        return Err(Error::Validation(format!(
            "please use a valid @{} email address",
            allowed_domain
        )));
    }

    let uid = provider.create_user(&normalized, password).await?;
    let profile_ref = DocumentRef::new(USERS, &uid);
    store
        .set(
            &profile_ref,
            json!({
                "fullName": full_name,
                "year": year,
                "email": normalized,
                "major": major,
                "createdAt": server_timestamp(),
            }),
        )
        .await?;
    tracing::info!("Registered user {}", uid);
    Ok(uid)
}

/// Directory roster bound to one user identity.
///
/// [`DirectoryService::load`] pulls the full roster into memory; the query
/// helpers are pure reads over that cache.
pub struct DirectoryService {
    /// Bound caller identity.
    uid: String,
    store: Arc<Store>,
    me: RwLock<Option<UserProfile>>,
    roster: RwLock<Vec<UserProfile>>,
}

impl DirectoryService {
    /// Create a service bound to one user identity.
    pub fn new(uid: impl Into<String>, store: Arc<Store>) -> Self {
        Self {
            uid: uid.into(),
            store,
            me: RwLock::new(None),
            roster: RwLock::new(Vec::new()),
        }
    }

    /// Fetch the caller's own profile and every other user into the cache.
    ///
    /// A missing own-profile document is tolerated; suggestions then come
    /// back empty until a later reload finds it.
    pub async fn load(&self) -> Result<()> {
        let own_ref = DocumentRef::new(USERS, &self.uid);
        let own = self
            .store
            .get(&own_ref)
            .await?
            .map(|doc| UserProfile::from_document(&doc));

        let docs = self.store.query(&Query::collection(USERS)).await?;
        let others: Vec<UserProfile> = docs
            .iter()
            .filter(|doc| doc.id != self.uid)
            .map(UserProfile::from_document)
            .collect();

        tracing::info!("Loaded {} directory profiles", others.len());
        *self.me.write() = own;
        *self.roster.write() = others;
        Ok(())
    }

    /// The caller's own cached profile, if loaded.
    pub fn me(&self) -> Option<UserProfile> {
        self.me.read().clone()
    }

    /// Users sharing both the caller's year and major, name-sorted.
    pub fn suggested(&self) -> Vec<UserProfile> {
        let me = self.me.read();
        let Some(me) = me.as_ref() else {
            return Vec::new();
        };
        let year = me.year.to_lowercase();
        let major = me.major.to_lowercase();
        let mut matches: Vec<UserProfile> = self
            .roster
            .read()
            .iter()
            .filter(|user| {
                user.year.to_lowercase() == year && user.major.to_lowercase() == major
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        matches
    }

    /// Score-ranked search over the roster.
    ///
    /// The search term matches name, major and year substrings at weights
    /// 10 / 5 / 3. The major filter (substring) and year filter (exact)
    /// each add 5; with an empty search term a filter miss excludes the
    /// user outright. All-empty inputs fall back to the full name-sorted
    /// roster. Results order by score descending, then name.
    pub fn search(&self, term: &str, major_filter: &str, year_filter: &str) -> Vec<UserProfile> {
        let roster = self.roster.read();
        let term = term.trim().to_lowercase();
        let major_filter = major_filter.trim().to_lowercase();
        let year_filter = year_filter.trim();

        if term.is_empty() && major_filter.is_empty() && year_filter.is_empty() {
            let mut all = roster.clone();
            all.sort_by(|a, b| a.full_name.cmp(&b.full_name));
            return all;
        }

        let mut scored: Vec<(i32, UserProfile)> = roster
            .iter()
            .filter_map(|user| {
                let mut score = 0;
                let mut matched = false;

                if !term.is_empty() {
                    if user.full_name.to_lowercase().contains(&term) {
                        score += SCORE_NAME;
                        matched = true;
                    }
                    if user.major.to_lowercase().contains(&term) {
                        score += SCORE_MAJOR;
                        matched = true;
                    }
                    if user.year.contains(&term) {
                        score += SCORE_YEAR;
                        matched = true;
                    }
                }

                if !major_filter.is_empty() {
                    if user.major.to_lowercase().contains(&major_filter) {
                        score += SCORE_FILTER;
                        matched = true;
                    } else if term.is_empty() {
                        return None;
                    }
                }

                if !year_filter.is_empty() {
                    if user.year == year_filter {
                        score += SCORE_FILTER;
                        matched = true;
                    } else if term.is_empty() {
                        return None;
                    }
                }

                matched.then(|| (score, user.clone()))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.full_name.cmp(&b.1.full_name)));
        scored.into_iter().map(|(_, user)| user).collect()
    }

    /// Up to ten majors, most common first. Ties break by name for a
    /// stable order.
    pub fn popular_majors(&self) -> Vec<String> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for user in self.roster.read().iter() {
            *counts.entry(user.major.clone()).or_default() += 1;
        }
        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.into_iter().take(10).map(|(major, _)| major).collect()
    }

    /// Sorted distinct class years in the roster.
    pub fn available_years(&self) -> Vec<String> {
        let mut years: Vec<String> = self
            .roster
            .read()
            .iter()
            .map(|user| user.year.clone())
            .collect();
        years.sort();
        years.dedup();
        years
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeProvider {
        calls: AtomicUsize,
        fail: bool,
    }

    impl FakeProvider {
        fn new() -> Self {
            Self { calls: AtomicUsize::new(0), fail: false }
        }

        fn failing() -> Self {
            Self { calls: AtomicUsize::new(0), fail: true }
        }
    }

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        async fn create_user(&self, email: &str, _password: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Unavailable("identity backend down".into()));
            }
            Ok(format!("uid-{}", email.len()))
        }
    }

    async fn seed_user(store: &Store, id: &str, name: &str, year: &str, major: &str) {
        store
            .set(
                &DocumentRef::new(USERS, id),
                json!({
                    "fullName": name,
                    "year": year,
                    "major": major,
                    "email": format!("{}@baylor.edu", id),
                    "createdAt": server_timestamp(),
                }),
            )
            .await
            .unwrap();
    }

    async fn loaded_service(store: &Arc<Store>, uid: &str) -> DirectoryService {
        let svc = DirectoryService::new(uid, Arc::clone(store));
        svc.load().await.unwrap();
        svc
    }

    fn names(profiles: &[UserProfile]) -> Vec<&str> {
        profiles.iter().map(|p| p.full_name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_sign_up_writes_profile() {
        let store = Store::new();
        let provider = FakeProvider::new();

        let uid = sign_up(
            &provider,
            &store,
            "baylor.edu",
            "  New.Student@Baylor.EDU ",
            "hunter2",
            "New Student",
            "2027",
            "Biology",
        )
        .await
        .unwrap();

        let doc = store
            .get(&DocumentRef::new(USERS, &uid))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.get("email"), Some(&json!("new.student@baylor.edu")));
        assert_eq!(doc.get("fullName"), Some(&json!("New Student")));
        assert!(doc.get("createdAt").is_some());
    }

    #[tokio::test]
    async fn test_sign_up_rejects_foreign_domain_before_side_effects() {
        let store = Store::new();
        let provider = FakeProvider::new();

        let err = sign_up(
            &provider,
            &store,
            "baylor.edu",
            "someone@gmail.com",
            "hunter2",
            "Someone",
            "2027",
            "Biology",
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        let docs = store.query(&Query::collection(USERS)).await.unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn test_sign_up_provider_failure_leaves_no_profile() {
        let store = Store::new();
        let provider = FakeProvider::failing();

        let err = sign_up(
            &provider,
            &store,
            "baylor.edu",
            "someone@baylor.edu",
            "hunter2",
            "Someone",
            "2027",
            "Biology",
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Unavailable(_)));
        let docs = store.query(&Query::collection(USERS)).await.unwrap();
        assert!(docs.is_empty());
    }

    #[test]
    fn test_campus_email_gate() {
        assert!(is_campus_email("a@baylor.edu", "baylor.edu"));
        assert!(!is_campus_email("a@notbaylor.edu", "baylor.edu"));
        assert!(!is_campus_email("a@baylor.edu.evil.com", "baylor.edu"));
        assert!(!is_campus_email("@baylor.edu", "baylor.edu"));
        assert!(!is_campus_email("a@b@baylor.edu", "baylor.edu"));
        assert!(!is_campus_email("baylor.edu", "baylor.edu"));
    }

    #[tokio::test]
    async fn test_load_excludes_self() {
        let store = Arc::new(Store::new());
        seed_user(&store, "alice", "Alice A", "2026", "CS").await;
        seed_user(&store, "bob", "Bob B", "2026", "CS").await;

        let svc = loaded_service(&store, "alice").await;
        assert_eq!(svc.me().unwrap().full_name, "Alice A");
        let all = svc.search("", "", "");
        assert_eq!(names(&all), vec!["Bob B"]);
    }

    #[tokio::test]
    async fn test_suggested_matches_year_and_major() {
        let store = Arc::new(Store::new());
        seed_user(&store, "alice", "Alice A", "2026", "CS").await;
        seed_user(&store, "bob", "Bob B", "2026", "cs").await;
        seed_user(&store, "carol", "Carol C", "2026", "Math").await;
        seed_user(&store, "dave", "Dave D", "2027", "CS").await;

        let svc = loaded_service(&store, "alice").await;
        // Case-insensitive on both axes, name-sorted, self excluded.
        assert_eq!(names(&svc.suggested()), vec!["Bob B"]);
    }

    #[tokio::test]
    async fn test_search_scores_name_over_major() {
        let store = Arc::new(Store::new());
        seed_user(&store, "me", "Me", "2026", "Math").await;
        seed_user(&store, "bob", "Bob Chemist", "2026", "Chemistry").await;
        seed_user(&store, "carol", "Carol Chem", "2027", "History").await;
        seed_user(&store, "dave", "Dave D", "2027", "Math").await;

        let svc = loaded_service(&store, "me").await;
        // "chem" hits Carol's name (10) and Bob's name+major (15).
        let hits = svc.search("chem", "", "");
        assert_eq!(names(&hits), vec!["Bob Chemist", "Carol Chem"]);
    }

    #[tokio::test]
    async fn test_filter_only_miss_excluded() {
        let store = Arc::new(Store::new());
        seed_user(&store, "me", "Me", "2026", "Math").await;
        seed_user(&store, "bob", "Bob B", "2026", "Chemistry").await;
        seed_user(&store, "carol", "Carol C", "2027", "Math").await;

        let svc = loaded_service(&store, "me").await;
        let hits = svc.search("", "math", "");
        assert_eq!(names(&hits), vec!["Carol C"]);

        // Exact-match year filter.
        let hits = svc.search("", "", "2026");
        assert_eq!(names(&hits), vec!["Bob B"]);
    }

    #[tokio::test]
    async fn test_search_term_keeps_filter_misses() {
        let store = Arc::new(Store::new());
        seed_user(&store, "me", "Me", "2026", "Math").await;
        seed_user(&store, "bob", "Bob Math", "2026", "Math").await;
        seed_user(&store, "carol", "Carol Math", "2027", "History").await;

        let svc = loaded_service(&store, "me").await;
        // With a term present, a year-filter miss demotes rather than
        // excludes: Bob scores 10+5+5, Carol scores 10.
        let hits = svc.search("math", "", "2026");
        assert_eq!(names(&hits), vec!["Bob Math", "Carol Math"]);
    }

    #[tokio::test]
    async fn test_empty_inputs_return_full_roster_sorted() {
        let store = Arc::new(Store::new());
        seed_user(&store, "me", "Me", "2026", "Math").await;
        seed_user(&store, "bob", "Zed Z", "2026", "CS").await;
        seed_user(&store, "carol", "Ann A", "2027", "Math").await;

        let svc = loaded_service(&store, "me").await;
        assert_eq!(names(&svc.search("  ", "", "")), vec!["Ann A", "Zed Z"]);
    }

    #[tokio::test]
    async fn test_popular_majors_and_years() {
        let store = Arc::new(Store::new());
        seed_user(&store, "me", "Me", "2026", "Math").await;
        seed_user(&store, "u1", "U1", "2026", "CS").await;
        seed_user(&store, "u2", "U2", "2027", "CS").await;
        seed_user(&store, "u3", "U3", "2025", "Math").await;
        seed_user(&store, "u4", "U4", "2026", "CS").await;

        let svc = loaded_service(&store, "me").await;
        assert_eq!(svc.popular_majors(), vec!["CS", "Math"]);
        assert_eq!(svc.available_years(), vec!["2025", "2026", "2027"]);
    }
}
