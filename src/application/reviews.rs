//! Read path for reviews: visibility applied, viewer context attached.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::{
    deadline::Deadline,
    error::AppError,
    repos::ReviewsRepo,
    retry::{RetryPolicy, with_retry},
};
use crate::domain::entities::{ReviewHistoryRecord, ReviewRecord};
use crate::domain::moderation::ModerationState;
use crate::domain::reviews::ReviewRank;
use crate::domain::votes::{VoteTally, VoteValue};

/// A review as a viewer sees it. The body is replaced by a placeholder when
/// moderation hides it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewView {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub content: String,
    pub rank: ReviewRank,
    pub upvote_count: i32,
    pub downvote_count: i32,
    pub remark: i32,
    /// The viewer's own vote.
    pub vote: VoteValue,
    pub is_me: bool,
    pub modify_count: i32,
    pub moderation: ModerationState,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    /// Populated only for single-review reads.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryView {
    pub id: Uuid,
    pub editor_id: i64,
    pub title: String,
    pub content: String,
    pub rank: ReviewRank,
    pub created_at: OffsetDateTime,
}

impl HistoryView {
    fn from_record(record: ReviewHistoryRecord) -> Self {
        let content = record
            .moderation
            .visibility()
            .render(&record.content)
            .to_string();
        Self {
            id: record.id,
            editor_id: record.editor_id,
            title: record.title,
            content,
            rank: record.rank,
            created_at: record.created_at,
        }
    }
}

impl ReviewView {
    pub fn from_record(review: ReviewRecord, viewer_id: Option<i64>, vote: VoteValue) -> Self {
        let state = review.moderation.state();
        let content = review
            .moderation
            .visibility()
            .render(&review.content)
            .to_string();
        Self {
            id: review.id,
            course_id: review.course_id,
            title: review.title,
            content,
            rank: review.rank,
            upvote_count: review.upvote_count,
            downvote_count: review.downvote_count,
            remark: VoteTally::new(review.upvote_count, review.downvote_count).remark(),
            vote,
            is_me: viewer_id == Some(review.reviewer_id),
            modify_count: review.modify_count,
            moderation: state,
            created_at: review.created_at,
            updated_at: review.updated_at,
            history: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct ReviewQueries {
    reader: Arc<dyn ReviewsRepo>,
    retry: RetryPolicy,
}

impl ReviewQueries {
    pub fn new(reader: Arc<dyn ReviewsRepo>, retry: RetryPolicy) -> Self {
        Self { reader, retry }
    }

    pub async fn list_for_course(
        &self,
        deadline: Deadline,
        course_id: Uuid,
        viewer_id: Option<i64>,
    ) -> Result<Vec<ReviewView>, AppError> {
        let reviews = with_retry(&self.retry, deadline, "list_reviews_for_course", || {
            self.reader.list_for_courses(std::slice::from_ref(&course_id))
        })
        .await?;
        self.render(deadline, reviews, viewer_id).await
    }

    /// One review with its edit history, oldest edit first.
    pub async fn get(
        &self,
        deadline: Deadline,
        review_id: Uuid,
        viewer_id: Option<i64>,
    ) -> Result<ReviewView, AppError> {
        let review = with_retry(&self.retry, deadline, "find_review", || {
            self.reader.find_review(review_id)
        })
        .await?
        .ok_or_else(|| AppError::not_found("review", review_id))?;

        let history = with_retry(&self.retry, deadline, "list_history", || {
            self.reader.list_history(review_id)
        })
        .await?;

        let mut views = self.render(deadline, vec![review], viewer_id).await?;
        let mut view = views
            .pop()
            .ok_or_else(|| AppError::internal("rendered review vanished"))?;
        view.history = history.into_iter().map(HistoryView::from_record).collect();
        Ok(view)
    }

    pub async fn list_by_reviewer(
        &self,
        deadline: Deadline,
        reviewer_id: i64,
    ) -> Result<Vec<ReviewView>, AppError> {
        let reviews = with_retry(&self.retry, deadline, "list_reviews_by_reviewer", || {
            self.reader.list_by_reviewer(reviewer_id)
        })
        .await?;
        self.render(deadline, reviews, Some(reviewer_id)).await
    }

    async fn render(
        &self,
        deadline: Deadline,
        reviews: Vec<ReviewRecord>,
        viewer_id: Option<i64>,
    ) -> Result<Vec<ReviewView>, AppError> {
        let votes = match viewer_id {
            Some(user_id) if !reviews.is_empty() => {
                let ids: Vec<Uuid> = reviews.iter().map(|review| review.id).collect();
                with_retry(&self.retry, deadline, "find_votes", || {
                    self.reader.find_votes(user_id, &ids)
                })
                .await?
                .into_iter()
                .map(|vote| (vote.review_id, vote.data))
                .collect()
            }
            _ => HashMap::new(),
        };

        Ok(reviews
            .into_iter()
            .map(|review| {
                let vote = votes.get(&review.id).copied().unwrap_or_default();
                ReviewView::from_record(review, viewer_id, vote)
            })
            .collect())
    }
}
