//! # Reports Module
//!
//! Abuse reports against users and reviews.
//!
//! A report is keyed logically by (reporter, target, context): at most one
//! report per tuple may exist, and a duplicate submission is rejected with
//! [`Error::DuplicateReport`] rather than silently merged. The duplicate
//! check is a query followed by an insert, not wrapped in a transaction, so
//! two near-simultaneous submissions can both pass the check. That window
//! is accepted.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::{server_timestamp, DocumentRef, Query, Store};

/// Collection holding reports against users.
pub const REPORTS_USERS: &str = "reports_users";

/// Collection holding reports against professor reviews.
pub const REPORTS_REVIEWS: &str = "reports_reviews";

/// Reason attached to an abuse report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbuseReason {
    /// Harassment or hate speech.
    HarassmentOrHate,
    /// Profanity or otherwise inappropriate content.
    ProfanityOrInappropriate,
    /// Misleading content or spam.
    MisleadingOrSpam,
    /// Sharing private information / doxxing.
    PrivateInfo,
    /// Anything else, see the free-text details.
    Other,
}

impl AbuseReason {
    /// All reasons, in display order.
    pub const ALL: [AbuseReason; 5] = [
        AbuseReason::HarassmentOrHate,
        AbuseReason::ProfanityOrInappropriate,
        AbuseReason::MisleadingOrSpam,
        AbuseReason::PrivateInfo,
        AbuseReason::Other,
    ];

    /// The stored (and displayed) string.
    pub fn as_str(&self) -> &'static str {
        match self {
            AbuseReason::HarassmentOrHate => "Harassment or hate",
            AbuseReason::ProfanityOrInappropriate => "Profanity / inappropriate",
            AbuseReason::MisleadingOrSpam => "Misleading / spam",
            AbuseReason::PrivateInfo => "Private info / doxxing",
            AbuseReason::Other => "Other",
        }
    }

    /// Parse from the stored string.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|reason| reason.as_str() == s)
    }
}

/// Moderation status of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStatus {
    /// Awaiting moderation.
    Pending,
    /// Handled and upheld.
    Resolved,
    /// Handled and dismissed.
    Rejected,
}

impl ReportStatus {
    /// The stored string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Resolved => "resolved",
            ReportStatus::Rejected => "rejected",
        }
    }

    /// Parse from the stored string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ReportStatus::Pending),
            "resolved" => Some(ReportStatus::Resolved),
            "rejected" => Some(ReportStatus::Rejected),
            _ => None,
        }
    }
}

/// Service submitting abuse reports on behalf of one user.
pub struct ReportsService {
    /// Bound caller identity.
    uid: String,
    store: Arc<Store>,
}

impl ReportsService {
    /// Create a service bound to one user identity.
    pub fn new(uid: impl Into<String>, store: Arc<Store>) -> Self {
        Self {
            uid: uid.into(),
            store,
        }
    }

    /// Report a user within a chat.
    ///
    /// Rejects a second report with the same (reporter, target, chat)
    /// tuple with [`Error::DuplicateReport`].
    pub async fn report_user(
        &self,
        reported_uid: &str,
        chat_id: &str,
        reason: AbuseReason,
        details: Option<&str>,
    ) -> Result<()> {
        if reported_uid == self.uid {
            return Err(Error::Validation("cannot report yourself".into()));
        }

        let existing = Query::collection(REPORTS_USERS)
            .field_eq("reporterUid", json!(self.uid.clone()))
            .field_eq("reportedUid", json!(reported_uid))
            .field_eq("chatId", json!(chat_id))
            .limit(1);
        if !self.store.query(&existing).await?.is_empty() {
            return Err(Error::DuplicateReport(format!(
                "user {} already reported in chat {}",
                reported_uid, chat_id
            )));
        }

        let mut payload = json!({
            "reporterUid": self.uid.clone(),
            "reportedUid": reported_uid,
            "chatId": chat_id,
            "reason": reason.as_str(),
            "status": ReportStatus::Pending.as_str(),
            "createdAt": server_timestamp(),
        });
        attach_details(&mut payload, details);

        let report_ref = DocumentRef::new(REPORTS_USERS, Uuid::new_v4().to_string());
        self.store.set(&report_ref, payload).await?;
        tracing::info!("Reported user {} in chat {}", reported_uid, chat_id);
        Ok(())
    }

    /// Report a professor review.
    ///
    /// Rejects a second report of the same review by the same reporter
    /// with [`Error::DuplicateReport`].
    pub async fn report_review(
        &self,
        review_id: &str,
        reason: AbuseReason,
        details: Option<&str>,
    ) -> Result<()> {
        let existing = Query::collection(REPORTS_REVIEWS)
            .field_eq("reporterUid", json!(self.uid.clone()))
            .field_eq("reviewId", json!(review_id))
            .limit(1);
        if !self.store.query(&existing).await?.is_empty() {
            return Err(Error::DuplicateReport(format!(
                "review {} already reported",
                review_id
            )));
        }

        let mut payload = json!({
            "reporterUid": self.uid.clone(),
            "reviewId": review_id,
            "reason": reason.as_str(),
            "status": ReportStatus::Pending.as_str(),
            "createdAt": server_timestamp(),
        });
        attach_details(&mut payload, details);

        let report_ref = DocumentRef::new(REPORTS_REVIEWS, Uuid::new_v4().to_string());
        self.store.set(&report_ref, payload).await?;
        tracing::info!("Reported review {}", review_id);
        Ok(())
    }
}

/// Attach trimmed free-text details when non-empty.
fn attach_details(payload: &mut serde_json::Value, details: Option<&str>) {
    if let Some(text) = details {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            if let Some(map) = payload.as_object_mut() {
                map.insert("details".to_string(), json!(trimmed));
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn service(uid: &str, store: &Arc<Store>) -> ReportsService {
        ReportsService::new(uid, Arc::clone(store))
    }

    #[test]
    fn test_reason_round_trip() {
        for reason in AbuseReason::ALL {
            assert_eq!(AbuseReason::parse(reason.as_str()), Some(reason));
        }
        assert_eq!(AbuseReason::parse("unknown"), None);
    }

    #[test]
    fn test_status_round_trip() {
        assert_eq!(ReportStatus::parse("pending"), Some(ReportStatus::Pending));
        assert_eq!(ReportStatus::parse("resolved"), Some(ReportStatus::Resolved));
        assert_eq!(ReportStatus::parse("rejected"), Some(ReportStatus::Rejected));
        assert_eq!(ReportStatus::parse("open"), None);
    }

    #[tokio::test]
    async fn test_report_user_inserts_pending() {
        let store = Arc::new(Store::new());
        let alice = service("alice", &store);

        alice
            .report_user("bob", "alice_bob", AbuseReason::MisleadingOrSpam, Some(" spam links "))
            .await
            .unwrap();

        let docs = store.query(&Query::collection(REPORTS_USERS)).await.unwrap();
        assert_eq!(docs.len(), 1);
        let doc = &docs[0];
        assert_eq!(doc.get("reporterUid"), Some(&json!("alice")));
        assert_eq!(doc.get("reportedUid"), Some(&json!("bob")));
        assert_eq!(doc.get("status"), Some(&json!("pending")));
        assert_eq!(doc.get("details"), Some(&json!("spam links")));
    }

    #[tokio::test]
    async fn test_empty_details_omitted() {
        let store = Arc::new(Store::new());
        let alice = service("alice", &store);

        alice
            .report_user("bob", "alice_bob", AbuseReason::Other, Some("   "))
            .await
            .unwrap();

        let docs = store.query(&Query::collection(REPORTS_USERS)).await.unwrap();
        assert!(docs[0].get("details").is_none());
    }

    #[tokio::test]
    async fn test_sequential_duplicate_user_report_rejected() {
        let store = Arc::new(Store::new());
        let alice = service("alice", &store);

        alice
            .report_user("bob", "alice_bob", AbuseReason::HarassmentOrHate, None)
            .await
            .unwrap();
        let err = alice
            .report_user("bob", "alice_bob", AbuseReason::Other, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateReport(_)));

        let docs = store.query(&Query::collection(REPORTS_USERS)).await.unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[tokio::test]
    async fn test_same_target_different_context_allowed() {
        let store = Arc::new(Store::new());
        let alice = service("alice", &store);
        let carol = service("carol", &store);

        alice
            .report_user("bob", "alice_bob", AbuseReason::Other, None)
            .await
            .unwrap();
        // Different chat context and different reporter are both fine.
        alice
            .report_user("dave", "alice_dave", AbuseReason::Other, None)
            .await
            .unwrap();
        carol
            .report_user("bob", "bob_carol", AbuseReason::Other, None)
            .await
            .unwrap();

        let docs = store.query(&Query::collection(REPORTS_USERS)).await.unwrap();
        assert_eq!(docs.len(), 3);
    }

    #[tokio::test]
    async fn test_self_report_rejected() {
        let store = Arc::new(Store::new());
        let alice = service("alice", &store);
        let err = alice
            .report_user("alice", "alice_alice", AbuseReason::Other, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_duplicate_review_report_rejected() {
        let store = Arc::new(Store::new());
        let alice = service("alice", &store);

        alice
            .report_review("rev-1", AbuseReason::ProfanityOrInappropriate, None)
            .await
            .unwrap();
        let err = alice
            .report_review("rev-1", AbuseReason::Other, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateReport(_)));

        // A different reviewer may still report the same review.
        let bob = service("bob", &store);
        bob.report_review("rev-1", AbuseReason::Other, None).await.unwrap();
        let docs = store.query(&Query::collection(REPORTS_REVIEWS)).await.unwrap();
        assert_eq!(docs.len(), 2);
    }
}
