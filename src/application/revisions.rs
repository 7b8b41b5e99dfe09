use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::application::{
    deadline::Deadline,
    error::AppError,
    hierarchy::AggregateCache,
    moderation::ModerationStateMachine,
    repos::{
        CreateReviewParams, RepoError, ReviseReviewParams, ReviewsRepo, ReviewsWriteRepo,
        constraints,
    },
    retry::{RetryPolicy, with_retry},
};
use crate::domain::entities::{ReviewHistoryRecord, ReviewRecord};
use crate::domain::moderation::ModerationVerdict;
use crate::domain::reviews::{ReviewDraft, ReviewEdit};

const SOURCE: &str = "application::revisions";

#[derive(Debug, Clone)]
pub struct CreateReviewCommand {
    pub course_id: Uuid,
    pub reviewer_id: i64,
    pub draft: ReviewDraft,
    /// Checker verdict for the submitted text. `None` when no check ran.
    pub verdict: Option<ModerationVerdict>,
}

#[derive(Debug, Clone)]
pub struct UpdateReviewCommand {
    pub review_id: Uuid,
    /// Already authorized by the caller.
    pub editor_id: i64,
    pub edit: ReviewEdit,
    pub verdict: Option<ModerationVerdict>,
}

#[derive(Debug, Clone)]
pub struct DeleteReviewCommand {
    pub review_id: Uuid,
    pub actor_id: i64,
    /// Admins may delete any review; everyone else only their own.
    pub actor_is_admin: bool,
}

#[derive(Debug, Clone)]
pub struct UpdatedReview {
    pub review: ReviewRecord,
    pub history: ReviewHistoryRecord,
}

/// Creates reviews and applies versioned edits.
#[derive(Clone)]
pub struct ReviewRevisionManager {
    reader: Arc<dyn ReviewsRepo>,
    writer: Arc<dyn ReviewsWriteRepo>,
    hierarchy: Arc<AggregateCache>,
    moderation: ModerationStateMachine,
    retry: RetryPolicy,
}

impl ReviewRevisionManager {
    pub fn new(
        reader: Arc<dyn ReviewsRepo>,
        writer: Arc<dyn ReviewsWriteRepo>,
        hierarchy: Arc<AggregateCache>,
        moderation: ModerationStateMachine,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            reader,
            writer,
            hierarchy,
            moderation,
            retry,
        }
    }

    /// Creates the reviewer's only review of a course. Review counters are
    /// part of the hierarchy, so the cache is invalidated after commit.
    pub async fn create(
        &self,
        deadline: Deadline,
        command: CreateReviewCommand,
    ) -> Result<ReviewRecord, AppError> {
        let params = CreateReviewParams {
            course_id: command.course_id,
            reviewer_id: command.reviewer_id,
            draft: command.draft.normalized()?,
            moderation: self.moderation.fields_for_verdict(command.verdict.as_ref()),
        };

        let result = with_retry(&self.retry, deadline, "create_review", || {
            self.writer.create_review(params.clone())
        })
        .await;

        let review = match result {
            Ok(review) => review,
            Err(RepoError::Duplicate { constraint })
                if constraint == constraints::REVIEW_PER_REVIEWER =>
            {
                return Err(AppError::conflict(format!(
                    "reviewer {} already reviewed course {}",
                    params.reviewer_id, params.course_id
                )));
            }
            Err(err @ RepoError::Timeout) => {
                // commit outcome unknown
                self.hierarchy.invalidate().await;
                return Err(err.into());
            }
            Err(err) => return Err(AppError::from_repo(err, "course", params.course_id)),
        };

        self.hierarchy.invalidate().await;
        info!(
            target = SOURCE,
            review_id = %review.id,
            course_id = %review.course_id,
            reviewer_id = review.reviewer_id,
            state = ?review.moderation.state(),
            "review created"
        );
        Ok(review)
    }

    /// Applies a partial edit. The pre-edit state is appended to the review's
    /// history in the same transaction. Edits do not touch the hierarchy.
    pub async fn update(
        &self,
        deadline: Deadline,
        command: UpdateReviewCommand,
    ) -> Result<UpdatedReview, AppError> {
        let params = ReviseReviewParams {
            review_id: command.review_id,
            editor_id: command.editor_id,
            edit: command.edit.normalized()?,
            moderation: command
                .verdict
                .as_ref()
                .map(|verdict| self.moderation.fields_for_verdict(Some(verdict))),
        };

        let revised = with_retry(&self.retry, deadline, "revise_review", || {
            self.writer.revise_review(params.clone())
        })
        .await
        .map_err(|err| AppError::from_repo(err, "review", params.review_id))?;

        info!(
            target = SOURCE,
            review_id = %revised.review.id,
            editor_id = params.editor_id,
            modify_count = revised.review.modify_count,
            state = ?revised.review.moderation.state(),
            "review revised"
        );
        Ok(UpdatedReview {
            review: revised.review,
            history: revised.history,
        })
    }

    /// Deletes a review with its votes and history. The course and group
    /// review counters drop in the same transaction, so the cache is
    /// invalidated after commit.
    pub async fn delete(
        &self,
        deadline: Deadline,
        command: DeleteReviewCommand,
    ) -> Result<ReviewRecord, AppError> {
        let review = with_retry(&self.retry, deadline, "find_review", || {
            self.reader.find_review(command.review_id)
        })
        .await?
        .ok_or_else(|| AppError::not_found("review", command.review_id))?;

        // reviewer_id is immutable
        if !command.actor_is_admin && review.reviewer_id != command.actor_id {
            warn!(
                target = SOURCE,
                review_id = %review.id,
                actor_id = command.actor_id,
                "review delete refused"
            );
            return Err(AppError::forbidden(format!(
                "user {} may not delete review {}",
                command.actor_id, review.id
            )));
        }

        let result = with_retry(&self.retry, deadline, "delete_review", || {
            self.writer.delete_review(command.review_id)
        })
        .await;

        let removed = match result {
            Ok(removed) => removed,
            Err(err @ RepoError::Timeout) => {
                // commit outcome unknown
                self.hierarchy.invalidate().await;
                return Err(err.into());
            }
            Err(err) => return Err(AppError::from_repo(err, "review", command.review_id)),
        };

        self.hierarchy.invalidate().await;
        info!(
            target = SOURCE,
            review_id = %removed.id,
            course_id = %removed.course_id,
            actor_id = command.actor_id,
            admin = command.actor_is_admin,
            "review deleted"
        );
        Ok(removed)
    }
}
