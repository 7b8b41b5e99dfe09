//! Domain entities mirrored from persistent storage.

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::{moderation::ModerationFields, reviews::ReviewRank, votes::VoteValue};

/// A course group together with the courses registered under its code.
///
/// `course_count` and `review_count` are denormalized counters maintained by
/// the store inside the same transaction as the rows they count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseGroupRecord {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub department: String,
    pub campus_name: String,
    /// Distinct credit values in the order they were first registered.
    pub credits: Vec<f64>,
    pub course_count: i32,
    pub review_count: i32,
    pub courses: Vec<CourseRecord>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseRecord {
    pub id: Uuid,
    pub group_id: Uuid,
    pub name: String,
    pub code: String,
    pub code_id: String,
    pub credit: f64,
    pub department: String,
    pub campus_name: String,
    pub teachers: String,
    pub max_student: i32,
    pub week_hour: i32,
    pub year: i32,
    pub semester: i32,
    pub review_count: i32,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewRecord {
    pub id: Uuid,
    pub course_id: Uuid,
    pub reviewer_id: i64,
    pub title: String,
    pub content: String,
    pub rank: ReviewRank,
    pub upvote_count: i32,
    pub downvote_count: i32,
    pub modify_count: i32,
    pub moderation: ModerationFields,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Immutable copy of a review as it was right before one edit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewHistoryRecord {
    pub id: Uuid,
    pub review_id: Uuid,
    pub editor_id: i64,
    pub title: String,
    pub content: String,
    pub rank: ReviewRank,
    pub moderation: ModerationFields,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReviewVoteRecord {
    pub user_id: i64,
    pub review_id: Uuid,
    pub data: VoteValue,
}

/// A course with its reviews loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseWithReviews {
    #[serde(flatten)]
    pub course: CourseRecord,
    pub reviews: Vec<ReviewRecord>,
}

/// A course group with every course's reviews loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseGroupDetail {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub department: String,
    pub campus_name: String,
    pub credits: Vec<f64>,
    pub course_count: i32,
    pub review_count: i32,
    pub courses: Vec<CourseWithReviews>,
}
