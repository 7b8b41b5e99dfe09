use std::sync::Arc;

use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::application::{
    deadline::Deadline,
    error::AppError,
    repos::{ConfirmModerationParams, FlaggedFilter, ReviewsRepo, ReviewsWriteRepo},
    retry::{RetryPolicy, with_retry},
};
use crate::domain::entities::ReviewRecord;
use crate::domain::moderation::{ModerationFields, ModerationVerdict};

const SOURCE: &str = "application::moderation";

pub const DEFAULT_FLAGGED_LIMIT: u32 = 20;
pub const MAX_FLAGGED_LIMIT: u32 = 100;

#[derive(Debug, Clone)]
pub struct ConfirmCommand {
    pub review_id: Uuid,
    /// Already authorized by the caller; recorded in the log only.
    pub admin_id: i64,
    pub sensitive: bool,
    pub detail: Option<String>,
}

/// Records checker verdicts and administrator decisions.
///
/// Visibility is never stored: readers evaluate
/// [`ModerationFields::visibility`] on every read, so a confirmation takes
/// effect immediately.
#[derive(Clone)]
pub struct ModerationStateMachine {
    reader: Arc<dyn ReviewsRepo>,
    writer: Arc<dyn ReviewsWriteRepo>,
    retry: RetryPolicy,
}

impl ModerationStateMachine {
    pub fn new(
        reader: Arc<dyn ReviewsRepo>,
        writer: Arc<dyn ReviewsWriteRepo>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            reader,
            writer,
            retry,
        }
    }

    /// Moderation fields for newly written content. Content that skipped the
    /// checker starts clean.
    pub fn fields_for_verdict(&self, verdict: Option<&ModerationVerdict>) -> ModerationFields {
        verdict
            .map(ModerationFields::from_verdict)
            .unwrap_or_default()
    }

    /// Applies an administrator decision to a flagged review.
    pub async fn confirm(
        &self,
        deadline: Deadline,
        command: ConfirmCommand,
    ) -> Result<ReviewRecord, AppError> {
        let params = ConfirmModerationParams {
            review_id: command.review_id,
            sensitive: command.sensitive,
            detail: command.detail,
        };

        let review = with_retry(&self.retry, deadline, "confirm_moderation", || {
            self.writer.confirm_moderation(params.clone())
        })
        .await
        .map_err(|err| AppError::from_repo(err, "review", command.review_id))?;

        info!(
            target = SOURCE,
            review_id = %review.id,
            admin_id = command.admin_id,
            sensitive = command.sensitive,
            state = ?review.moderation.state(),
            "moderation decision recorded"
        );
        Ok(review)
    }

    /// The moderation queue: reported reviews, most recently updated first.
    /// `before` pages backwards through `updated_at`.
    pub async fn list_flagged(
        &self,
        deadline: Deadline,
        filter: FlaggedFilter,
        before: Option<OffsetDateTime>,
        limit: Option<u32>,
    ) -> Result<Vec<ReviewRecord>, AppError> {
        let before = before.unwrap_or_else(OffsetDateTime::now_utc);
        let limit = limit
            .unwrap_or(DEFAULT_FLAGGED_LIMIT)
            .clamp(1, MAX_FLAGGED_LIMIT);

        Ok(
            with_retry(&self.retry, deadline, "list_flagged", || {
                self.reader.list_flagged(filter, before, limit)
            })
            .await?,
        )
    }
}
