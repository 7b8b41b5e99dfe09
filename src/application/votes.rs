use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::application::{
    deadline::Deadline,
    error::AppError,
    repos::ReviewsWriteRepo,
    retry::{RetryPolicy, with_retry},
};
use crate::domain::votes::{VoteDirection, VoteTally};

const SOURCE: &str = "application::votes";

/// Applies vote toggles. Counters are recomputed from the vote rows by the
/// store while it holds the review's row lock, so concurrent toggles on one
/// review serialize and never lose an update.
///
/// Votes are not part of the hierarchy snapshot and do not invalidate it.
#[derive(Clone)]
pub struct VoteTallyCoordinator {
    writer: Arc<dyn ReviewsWriteRepo>,
    retry: RetryPolicy,
}

impl VoteTallyCoordinator {
    pub fn new(writer: Arc<dyn ReviewsWriteRepo>, retry: RetryPolicy) -> Self {
        Self { writer, retry }
    }

    /// Voting in the direction already cast retracts the vote; voting the
    /// other way flips it. Returns the committed counters.
    pub async fn toggle_vote(
        &self,
        deadline: Deadline,
        review_id: Uuid,
        user_id: i64,
        direction: VoteDirection,
    ) -> Result<VoteTally, AppError> {
        let tally = with_retry(&self.retry, deadline, "toggle_vote", || {
            self.writer.toggle_vote(review_id, user_id, direction)
        })
        .await
        .map_err(|err| AppError::from_repo(err, "review", review_id))?;

        info!(
            target = SOURCE,
            %review_id,
            user_id,
            ?direction,
            upvotes = tally.upvotes,
            downvotes = tally.downvotes,
            "vote toggled"
        );
        Ok(tally)
    }
}
