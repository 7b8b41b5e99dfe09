//! Repository traits describing persistence adapters.
//!
//! Every write method is one atomic unit: the adapter opens a transaction,
//! takes the row locks it needs, and commits before returning.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::catalog::{GroupSearch, NewCourse};
use crate::domain::entities::{
    CourseGroupRecord, CourseRecord, ReviewHistoryRecord, ReviewRecord, ReviewVoteRecord,
};
use crate::domain::error::DomainError;
use crate::domain::moderation::ModerationFields;
use crate::domain::reviews::{ReviewDraft, ReviewEdit};
use crate::domain::votes::{VoteDirection, VoteTally};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
    #[error("transient conflict: {message}")]
    Retryable { message: String },
    #[error(transparent)]
    Rejected(#[from] DomainError),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable {
            message: message.into(),
        }
    }

    /// Failures a fresh attempt of the same transaction may not hit again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RepoError::Timeout | RepoError::Retryable { .. })
    }
}

/// Unique constraint names shared by every adapter.
pub mod constraints {
    pub const COURSE_CODE_ID: &str = "courses_code_id_key";
    pub const REVIEW_PER_REVIEWER: &str = "reviews_course_id_reviewer_id_key";
}

#[derive(Debug, Clone)]
pub struct RegisteredCourse {
    pub course: CourseRecord,
    pub group_created: bool,
}

#[async_trait]
pub trait CatalogRepo: Send + Sync {
    /// Every group with its courses, groups ordered by `(code, id)` and
    /// courses by `(code_id, id)`.
    async fn load_hierarchy(&self) -> Result<Vec<CourseGroupRecord>, RepoError>;

    async fn find_group(&self, id: Uuid) -> Result<Option<CourseGroupRecord>, RepoError>;

    /// One page of the groups `search` matches, ordered by `(code, id)`.
    /// Groups come back without their courses.
    async fn search_groups(
        &self,
        search: &GroupSearch,
    ) -> Result<Vec<CourseGroupRecord>, RepoError>;

    async fn find_course(&self, id: Uuid) -> Result<Option<CourseRecord>, RepoError>;
}

#[async_trait]
pub trait CatalogWriteRepo: Send + Sync {
    /// Inserts the course, creating its group on first use of `code`, bumps
    /// the group's course counter and merges the credit into its credit list.
    async fn register_course(&self, course: NewCourse) -> Result<RegisteredCourse, RepoError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlaggedFilter {
    /// Reported and awaiting a decision.
    Open,
    /// Reported and already decided.
    Closed,
    All,
}

#[async_trait]
pub trait ReviewsRepo: Send + Sync {
    async fn find_review(&self, id: Uuid) -> Result<Option<ReviewRecord>, RepoError>;

    async fn list_for_courses(&self, course_ids: &[Uuid]) -> Result<Vec<ReviewRecord>, RepoError>;

    async fn list_by_reviewer(&self, reviewer_id: i64) -> Result<Vec<ReviewRecord>, RepoError>;

    /// History rows of one review, oldest first.
    async fn list_history(&self, review_id: Uuid) -> Result<Vec<ReviewHistoryRecord>, RepoError>;

    /// Vote rows cast by `user_id` on any of `review_ids`.
    async fn find_votes(
        &self,
        user_id: i64,
        review_ids: &[Uuid],
    ) -> Result<Vec<ReviewVoteRecord>, RepoError>;

    /// Reported reviews updated strictly before `before`, newest first.
    async fn list_flagged(
        &self,
        filter: FlaggedFilter,
        before: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<ReviewRecord>, RepoError>;
}

#[derive(Debug, Clone)]
pub struct CreateReviewParams {
    pub course_id: Uuid,
    pub reviewer_id: i64,
    pub draft: ReviewDraft,
    pub moderation: ModerationFields,
}

#[derive(Debug, Clone)]
pub struct ReviseReviewParams {
    pub review_id: Uuid,
    pub editor_id: i64,
    pub edit: ReviewEdit,
    pub moderation: Option<ModerationFields>,
}

#[derive(Debug, Clone)]
pub struct RevisedReview {
    pub review: ReviewRecord,
    pub history: ReviewHistoryRecord,
}

#[derive(Debug, Clone)]
pub struct ConfirmModerationParams {
    pub review_id: Uuid,
    pub sensitive: bool,
    pub detail: Option<String>,
}

#[async_trait]
pub trait ReviewsWriteRepo: Send + Sync {
    /// Fails with `Duplicate` when the reviewer already reviewed the course
    /// and `NotFound` when the course is missing. Bumps the course and group
    /// review counters in the same transaction.
    async fn create_review(&self, params: CreateReviewParams) -> Result<ReviewRecord, RepoError>;

    /// Locks the review, appends a history row holding its pre-edit state and
    /// applies the edit.
    async fn revise_review(&self, params: ReviseReviewParams) -> Result<RevisedReview, RepoError>;

    /// Locks the review, applies the toggle to the caller's vote row and
    /// recomputes both counters from the vote table.
    async fn toggle_vote(
        &self,
        review_id: Uuid,
        user_id: i64,
        direction: VoteDirection,
    ) -> Result<VoteTally, RepoError>;

    async fn confirm_moderation(
        &self,
        params: ConfirmModerationParams,
    ) -> Result<ReviewRecord, RepoError>;

    /// Removes the review together with its votes and history and
    /// decrements the course and group review counters in the same
    /// transaction. Returns the removed row.
    async fn delete_review(&self, review_id: Uuid) -> Result<ReviewRecord, RepoError>;
}
