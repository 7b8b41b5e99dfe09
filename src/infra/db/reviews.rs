use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{
        ConfirmModerationParams, CreateReviewParams, FlaggedFilter, RepoError,
        ReviseReviewParams, RevisedReview, ReviewsRepo, ReviewsWriteRepo, constraints,
    },
    domain::{
        entities::{ReviewHistoryRecord, ReviewRecord, ReviewVoteRecord},
        moderation::{Confirmation, ModerationFields},
        reviews::ReviewRank,
        votes::{VoteDirection, VoteTally, VoteValue},
    },
};

use super::{PostgresRepositories, map_sqlx_error};

const REVIEW_COLUMNS: &str = "id, course_id, reviewer_id, title, content, rank_overall, \
    rank_content, rank_workload, rank_assessment, upvote_count, downvote_count, \
    modify_count, reported, confirmed, detail, created_at, updated_at";

const HISTORY_COLUMNS: &str = "id, review_id, editor_id, title, content, rank_overall, \
    rank_content, rank_workload, rank_assessment, reported, confirmed, detail, created_at";

#[derive(sqlx::FromRow)]
struct ReviewRow {
    id: Uuid,
    course_id: Uuid,
    reviewer_id: i64,
    title: String,
    content: String,
    rank_overall: i32,
    rank_content: i32,
    rank_workload: i32,
    rank_assessment: i32,
    upvote_count: i32,
    downvote_count: i32,
    modify_count: i32,
    reported: bool,
    confirmed: Option<bool>,
    detail: String,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<ReviewRow> for ReviewRecord {
    fn from(row: ReviewRow) -> Self {
        Self {
            id: row.id,
            course_id: row.course_id,
            reviewer_id: row.reviewer_id,
            title: row.title,
            content: row.content,
            rank: ReviewRank::new(
                row.rank_overall,
                row.rank_content,
                row.rank_workload,
                row.rank_assessment,
            ),
            upvote_count: row.upvote_count,
            downvote_count: row.downvote_count,
            modify_count: row.modify_count,
            moderation: ModerationFields {
                reported: row.reported,
                confirmation: Confirmation::from_column(row.confirmed),
                detail: row.detail,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: Uuid,
    review_id: Uuid,
    editor_id: i64,
    title: String,
    content: String,
    rank_overall: i32,
    rank_content: i32,
    rank_workload: i32,
    rank_assessment: i32,
    reported: bool,
    confirmed: Option<bool>,
    detail: String,
    created_at: OffsetDateTime,
}

impl From<HistoryRow> for ReviewHistoryRecord {
    fn from(row: HistoryRow) -> Self {
        Self {
            id: row.id,
            review_id: row.review_id,
            editor_id: row.editor_id,
            title: row.title,
            content: row.content,
            rank: ReviewRank::new(
                row.rank_overall,
                row.rank_content,
                row.rank_workload,
                row.rank_assessment,
            ),
            moderation: ModerationFields {
                reported: row.reported,
                confirmation: Confirmation::from_column(row.confirmed),
                detail: row.detail,
            },
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct VoteRow {
    user_id: i64,
    review_id: Uuid,
    data: i16,
}

impl TryFrom<VoteRow> for ReviewVoteRecord {
    type Error = RepoError;

    fn try_from(row: VoteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: row.user_id,
            review_id: row.review_id,
            data: VoteValue::from_i16(row.data)?,
        })
    }
}

impl PostgresRepositories {
    async fn lock_review(
        tx: &mut Transaction<'_, Postgres>,
        review_id: Uuid,
    ) -> Result<ReviewRecord, RepoError> {
        sqlx::query_as::<_, ReviewRow>(&format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews WHERE id = $1 FOR UPDATE"
        ))
        .bind(review_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_sqlx_error)?
        .map(ReviewRecord::from)
        .ok_or(RepoError::NotFound)
    }

    async fn store_review(
        tx: &mut Transaction<'_, Postgres>,
        review: &ReviewRecord,
    ) -> Result<ReviewRecord, RepoError> {
        let row = sqlx::query_as::<_, ReviewRow>(&format!(
            "UPDATE reviews SET \
                title = $2, content = $3, rank_overall = $4, rank_content = $5, \
                rank_workload = $6, rank_assessment = $7, modify_count = $8, \
                reported = $9, confirmed = $10, detail = $11, updated_at = $12 \
             WHERE id = $1 \
             RETURNING {REVIEW_COLUMNS}"
        ))
        .bind(review.id)
        .bind(&review.title)
        .bind(&review.content)
        .bind(review.rank.overall)
        .bind(review.rank.content)
        .bind(review.rank.workload)
        .bind(review.rank.assessment)
        .bind(review.modify_count)
        .bind(review.moderation.reported)
        .bind(review.moderation.confirmation.to_column())
        .bind(&review.moderation.detail)
        .bind(review.updated_at)
        .fetch_one(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.into())
    }
}

#[async_trait]
impl ReviewsRepo for PostgresRepositories {
    async fn find_review(&self, id: Uuid) -> Result<Option<ReviewRecord>, RepoError> {
        let row = sqlx::query_as::<_, ReviewRow>(&format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(ReviewRecord::from))
    }

    async fn list_for_courses(&self, course_ids: &[Uuid]) -> Result<Vec<ReviewRecord>, RepoError> {
        if course_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, ReviewRow>(&format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews \
             WHERE course_id = ANY($1) \
             ORDER BY created_at, id"
        ))
        .bind(course_ids)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(ReviewRecord::from).collect())
    }

    async fn list_by_reviewer(&self, reviewer_id: i64) -> Result<Vec<ReviewRecord>, RepoError> {
        let rows = sqlx::query_as::<_, ReviewRow>(&format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews \
             WHERE reviewer_id = $1 \
             ORDER BY updated_at DESC, id DESC"
        ))
        .bind(reviewer_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(ReviewRecord::from).collect())
    }

    async fn list_history(&self, review_id: Uuid) -> Result<Vec<ReviewHistoryRecord>, RepoError> {
        let rows = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {HISTORY_COLUMNS} FROM review_history \
             WHERE review_id = $1 \
             ORDER BY created_at, id"
        ))
        .bind(review_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(ReviewHistoryRecord::from).collect())
    }

    async fn find_votes(
        &self,
        user_id: i64,
        review_ids: &[Uuid],
    ) -> Result<Vec<ReviewVoteRecord>, RepoError> {
        if review_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, VoteRow>(
            "SELECT user_id, review_id, data FROM review_votes \
             WHERE user_id = $1 AND review_id = ANY($2) AND data <> 0",
        )
        .bind(user_id)
        .bind(review_ids)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(ReviewVoteRecord::try_from).collect()
    }

    async fn list_flagged(
        &self,
        filter: FlaggedFilter,
        before: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<ReviewRecord>, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {REVIEW_COLUMNS} FROM reviews WHERE reported = TRUE AND updated_at < "
        ));
        qb.push_bind(before);
        match filter {
            FlaggedFilter::Open => {
                qb.push(" AND confirmed IS NULL");
            }
            FlaggedFilter::Closed => {
                qb.push(" AND confirmed IS NOT NULL");
            }
            FlaggedFilter::All => {}
        }
        qb.push(" ORDER BY updated_at DESC, id DESC LIMIT ");
        qb.push_bind(i64::from(limit));

        let rows = qb
            .build_query_as::<ReviewRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(ReviewRecord::from).collect())
    }
}

#[async_trait]
impl ReviewsWriteRepo for PostgresRepositories {
    async fn create_review(&self, params: CreateReviewParams) -> Result<ReviewRecord, RepoError> {
        let mut tx = self.begin().await?;
        let now = OffsetDateTime::now_utc();

        let group_id = sqlx::query_scalar::<_, Uuid>(
            "SELECT group_id FROM courses WHERE id = $1 FOR UPDATE",
        )
        .bind(params.course_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(RepoError::NotFound)?;

        let existing = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM reviews WHERE course_id = $1 AND reviewer_id = $2",
        )
        .bind(params.course_id)
        .bind(params.reviewer_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        if existing > 0 {
            return Err(RepoError::Duplicate {
                constraint: constraints::REVIEW_PER_REVIEWER.to_string(),
            });
        }

        let draft = &params.draft;
        let row = sqlx::query_as::<_, ReviewRow>(&format!(
            "INSERT INTO reviews \
                (id, course_id, reviewer_id, title, content, rank_overall, rank_content, \
                 rank_workload, rank_assessment, upvote_count, downvote_count, \
                 modify_count, reported, confirmed, detail, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, 0, 0, $10, $11, $12, $13, $13) \
             RETURNING {REVIEW_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(params.course_id)
        .bind(params.reviewer_id)
        .bind(&draft.title)
        .bind(&draft.content)
        .bind(draft.rank.overall)
        .bind(draft.rank.content)
        .bind(draft.rank.workload)
        .bind(draft.rank.assessment)
        .bind(params.moderation.reported)
        .bind(params.moderation.confirmation.to_column())
        .bind(&params.moderation.detail)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query("UPDATE courses SET review_count = review_count + 1 WHERE id = $1")
            .bind(params.course_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        sqlx::query("UPDATE course_groups SET review_count = review_count + 1 WHERE id = $1")
            .bind(group_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn revise_review(&self, params: ReviseReviewParams) -> Result<RevisedReview, RepoError> {
        let mut tx = self.begin().await?;
        let mut review = Self::lock_review(&mut tx, params.review_id).await?;

        let history = review.apply_edit(
            params.editor_id,
            &params.edit,
            params.moderation,
            OffsetDateTime::now_utc(),
        )?;

        let history = sqlx::query_as::<_, HistoryRow>(&format!(
            "INSERT INTO review_history \
                (id, review_id, editor_id, title, content, rank_overall, rank_content, \
                 rank_workload, rank_assessment, reported, confirmed, detail, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             RETURNING {HISTORY_COLUMNS}"
        ))
        .bind(history.id)
        .bind(history.review_id)
        .bind(history.editor_id)
        .bind(&history.title)
        .bind(&history.content)
        .bind(history.rank.overall)
        .bind(history.rank.content)
        .bind(history.rank.workload)
        .bind(history.rank.assessment)
        .bind(history.moderation.reported)
        .bind(history.moderation.confirmation.to_column())
        .bind(&history.moderation.detail)
        .bind(history.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let review = Self::store_review(&mut tx, &review).await?;
        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(RevisedReview {
            review,
            history: history.into(),
        })
    }

    async fn toggle_vote(
        &self,
        review_id: Uuid,
        user_id: i64,
        direction: VoteDirection,
    ) -> Result<VoteTally, RepoError> {
        let mut tx = self.begin().await?;

        sqlx::query_scalar::<_, Uuid>("SELECT id FROM reviews WHERE id = $1 FOR UPDATE")
            .bind(review_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .ok_or(RepoError::NotFound)?;

        let current = sqlx::query_scalar::<_, i16>(
            "SELECT data FROM review_votes WHERE user_id = $1 AND review_id = $2",
        )
        .bind(user_id)
        .bind(review_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .map(VoteValue::from_i16)
        .transpose()?
        .unwrap_or_default();

        let next = current.toggled(direction);

        sqlx::query(
            "INSERT INTO review_votes (user_id, review_id, data) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id, review_id) DO UPDATE SET data = EXCLUDED.data",
        )
        .bind(user_id)
        .bind(review_id)
        .bind(next.as_i16())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let (upvotes, downvotes) = sqlx::query_as::<_, (i32, i32)>(
            "UPDATE reviews SET \
                upvote_count = (SELECT COUNT(*) FROM review_votes \
                                WHERE review_id = $1 AND data = 1), \
                downvote_count = (SELECT COUNT(*) FROM review_votes \
                                  WHERE review_id = $1 AND data = -1) \
             WHERE id = $1 \
             RETURNING upvote_count, downvote_count",
        )
        .bind(review_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(VoteTally::new(upvotes, downvotes))
    }

    async fn confirm_moderation(
        &self,
        params: ConfirmModerationParams,
    ) -> Result<ReviewRecord, RepoError> {
        let mut tx = self.begin().await?;
        let mut review = Self::lock_review(&mut tx, params.review_id).await?;

        review
            .moderation
            .confirm(params.sensitive, params.detail.as_deref())?;
        review.updated_at = OffsetDateTime::now_utc();

        let review = Self::store_review(&mut tx, &review).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(review)
    }

    async fn delete_review(&self, review_id: Uuid) -> Result<ReviewRecord, RepoError> {
        let mut tx = self.begin().await?;

        // votes and history go with it through ON DELETE CASCADE
        let row = sqlx::query_as::<_, ReviewRow>(&format!(
            "DELETE FROM reviews WHERE id = $1 RETURNING {REVIEW_COLUMNS}"
        ))
        .bind(review_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(RepoError::NotFound)?;

        let group_id = sqlx::query_scalar::<_, Uuid>(
            "UPDATE courses SET review_count = review_count - 1 WHERE id = $1 RETURNING group_id",
        )
        .bind(row.course_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query("UPDATE course_groups SET review_count = review_count - 1 WHERE id = $1")
            .bind(group_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(row.into())
    }
}
