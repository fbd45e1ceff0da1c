//! # Reviews Module
//!
//! Professor review records and pure aggregation into per-professor
//! summaries. Moderation of reviews lives elsewhere; this module only
//! stores, fetches and groups them.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::{
    server_timestamp, Direction, Document, DocumentRef, Query, Store, Timestamp,
};

/// Collection holding individual review documents.
pub const PROFESSORS: &str = "professors";

/// Lowest accepted rating.
pub const MIN_RATING: f64 = 0.5;
/// Highest accepted rating.
pub const MAX_RATING: f64 = 5.0;

/// A single professor review.
#[derive(Debug, Clone, PartialEq)]
pub struct Review {
    /// Document id.
    pub id: String,
    /// Reviewed professor's name, the grouping key for summaries.
    pub professor_name: String,
    /// Course the review is about.
    pub course: String,
    /// Star rating, 0.5 through 5.0.
    pub rating: f64,
    /// Free-text review body.
    pub text: String,
    /// Display name of the reviewer.
    pub reviewer_name: String,
    /// Commit time of the review document.
    pub created_at: Option<Timestamp>,
}

impl Review {
    /// Build a review from a stored document. String fields default to
    /// empty, rating to zero.
    pub fn from_document(doc: &Document) -> Self {
        let text = |field: &str| {
            doc.get(field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        Self {
            id: doc.id.clone(),
            professor_name: text("name"),
            course: text("course"),
            rating: doc.get("rating").and_then(|v| v.as_f64()).unwrap_or(0.0),
            text: text("review"),
            reviewer_name: text("reviewerName"),
            created_at: doc
                .get("dateCreated")
                .and_then(|v| v.as_i64())
                .map(Timestamp::from_micros),
        }
    }
}

/// Aggregated view of all reviews for one professor.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfessorSummary {
    /// Professor name.
    pub name: String,
    /// Mean rating across all reviews.
    pub average_rating: f64,
    /// Number of reviews.
    pub total_reviews: usize,
    /// Distinct courses reviewed, sorted.
    pub courses: Vec<String>,
    /// The reviews themselves, newest first.
    pub reviews: Vec<Review>,
}

/// Service reading and writing professor reviews for one user.
pub struct ReviewsService {
    /// Bound caller identity, recorded as the reviewer.
    uid: String,
    store: Arc<Store>,
}

impl ReviewsService {
    /// Create a service bound to one user identity.
    pub fn new(uid: impl Into<String>, store: Arc<Store>) -> Self {
        Self {
            uid: uid.into(),
            store,
        }
    }

    /// Submit a review. The rating must fall in [0.5, 5.0].
    pub async fn submit(
        &self,
        professor_name: &str,
        course: &str,
        rating: f64,
        text: &str,
        reviewer_name: &str,
    ) -> Result<String> {
        if !(MIN_RATING..=MAX_RATING).contains(&rating) {
            return Err(Error::Validation(format!(
                "rating must be between {} and {}",
                MIN_RATING, MAX_RATING
            )));
        }

        let review_ref = DocumentRef::new(PROFESSORS, Uuid::new_v4().to_string());
        self.store
            .set(
                &review_ref,
                json!({
                    "name": professor_name,
                    "course": course,
                    "rating": rating,
                    "review": text,
                    "reviewerName": reviewer_name,
                    "dateCreated": server_timestamp(),
                }),
            )
            .await?;
        tracing::info!("Submitted review of {} by {}", professor_name, self.uid);
        Ok(review_ref.id)
    }

    /// All reviews, newest first.
    pub async fn fetch_all(&self) -> Result<Vec<Review>> {
        let query =
            Query::collection(PROFESSORS).order_by("dateCreated", Direction::Descending);
        let docs = self.store.query(&query).await?;
        Ok(docs.iter().map(Review::from_document).collect())
    }
}

/// Group reviews into per-professor summaries.
///
/// Summaries come back sorted by review count descending, then name; each
/// summary's own reviews are newest first.
pub fn summaries(reviews: &[Review]) -> Vec<ProfessorSummary> {
    let mut grouped: HashMap<String, Vec<Review>> = HashMap::new();
    for review in reviews {
        grouped
            .entry(review.professor_name.clone())
            .or_default()
            .push(review.clone());
    }

    let mut result: Vec<ProfessorSummary> = grouped
        .into_iter()
        .map(|(name, mut reviews)| {
            reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            let total = reviews.len();
            let average = reviews.iter().map(|r| r.rating).sum::<f64>() / total as f64;
            let mut courses: Vec<String> =
                reviews.iter().map(|r| r.course.clone()).collect();
            courses.sort();
            courses.dedup();
            ProfessorSummary {
                name,
                average_rating: average,
                total_reviews: total,
                courses,
                reviews,
            }
        })
        .collect();

    result.sort_by(|a, b| {
        b.total_reviews
            .cmp(&a.total_reviews)
            .then_with(|| a.name.cmp(&b.name))
    });
    result
}

// ============================================================================
// TESTS
// ============================================================================
