//! Process-local repository implementation.
//!
//! Every operation runs under one mutex, which gives each write the same
//! all-or-nothing behaviour a Postgres transaction with row locks provides.
//! Result ordering matches the Postgres adapter.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::time::sleep;
use uuid::Uuid;

use crate::application::repos::{
    CatalogRepo, CatalogWriteRepo, ConfirmModerationParams, CreateReviewParams, FlaggedFilter,
    RegisteredCourse, RepoError, ReviseReviewParams, RevisedReview, ReviewsRepo,
    ReviewsWriteRepo, constraints,
};
use crate::cache::mutex_lock;
use crate::domain::catalog::{GroupSearch, NewCourse, merge_credit};
use crate::domain::entities::{
    CourseGroupRecord, CourseRecord, ReviewHistoryRecord, ReviewRecord, ReviewVoteRecord,
};
use crate::domain::moderation::Confirmation;
use crate::domain::votes::{VoteDirection, VoteTally, VoteValue};

const SOURCE: &str = "infra::memory";

#[derive(Default)]
struct State {
    /// Groups are kept without their courses; reads attach them.
    groups: HashMap<Uuid, CourseGroupRecord>,
    courses: HashMap<Uuid, CourseRecord>,
    reviews: HashMap<Uuid, ReviewRecord>,
    history: Vec<ReviewHistoryRecord>,
    votes: HashMap<(i64, Uuid), VoteValue>,
}

impl State {
    fn courses_of(&self, group_id: Uuid) -> Vec<CourseRecord> {
        let mut courses: Vec<CourseRecord> = self
            .courses
            .values()
            .filter(|course| course.group_id == group_id)
            .cloned()
            .collect();
        courses.sort_by(|a, b| a.code_id.cmp(&b.code_id).then(a.id.cmp(&b.id)));
        courses
    }

    fn with_courses(&self, group: &CourseGroupRecord) -> CourseGroupRecord {
        CourseGroupRecord {
            courses: self.courses_of(group.id),
            ..group.clone()
        }
    }

    fn tally(&self, review_id: Uuid) -> VoteTally {
        VoteTally::from_values(
            self.votes
                .iter()
                .filter(|((_, id), _)| *id == review_id)
                .map(|(_, value)| *value),
        )
    }
}

#[derive(Default)]
pub struct MemoryRepositories {
    state: Mutex<State>,
    transient_failures: AtomicU32,
    latency_ms: AtomicU32,
}

impl MemoryRepositories {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` operations fail with a retryable error without
    /// touching any state.
    pub fn inject_transient_failures(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Delay applied before every operation.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u32::try_from(latency.as_millis()).unwrap_or(u32::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Vote rows of one review with a non-zero value.
    pub fn cast_votes(&self, review_id: Uuid) -> usize {
        mutex_lock(&self.state, SOURCE, "cast_votes")
            .votes
            .iter()
            .filter(|((_, id), value)| *id == review_id && **value != VoteValue::None)
            .count()
    }

    async fn enter(&self) -> Result<(), RepoError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            sleep(Duration::from_millis(u64::from(latency))).await;
        }

        let injected = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(RepoError::retryable("injected transient failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogRepo for MemoryRepositories {
    async fn load_hierarchy(&self) -> Result<Vec<CourseGroupRecord>, RepoError> {
        self.enter().await?;
        let state = mutex_lock(&self.state, SOURCE, "load_hierarchy");
        let mut groups: Vec<CourseGroupRecord> = state
            .groups
            .values()
            .map(|group| state.with_courses(group))
            .collect();
        groups.sort_by(|a, b| a.code.cmp(&b.code).then(a.id.cmp(&b.id)));
        Ok(groups)
    }

    async fn find_group(&self, id: Uuid) -> Result<Option<CourseGroupRecord>, RepoError> {
        self.enter().await?;
        let state = mutex_lock(&self.state, SOURCE, "find_group");
        Ok(state.groups.get(&id).map(|group| state.with_courses(group)))
    }

    async fn search_groups(
        &self,
        search: &GroupSearch,
    ) -> Result<Vec<CourseGroupRecord>, RepoError> {
        self.enter().await?;
        let state = mutex_lock(&self.state, SOURCE, "search_groups");
        let mut groups: Vec<CourseGroupRecord> = state
            .groups
            .values()
            .filter(|group| search.matcher.matches(group))
            .cloned()
            .collect();
        groups.sort_by(|a, b| a.code.cmp(&b.code).then(a.id.cmp(&b.id)));

        let offset = usize::try_from(search.offset()).unwrap_or(usize::MAX);
        let limit = search.limit().map_or(usize::MAX, |limit| limit as usize);
        Ok(groups.into_iter().skip(offset).take(limit).collect())
    }

    async fn find_course(&self, id: Uuid) -> Result<Option<CourseRecord>, RepoError> {
        self.enter().await?;
        Ok(mutex_lock(&self.state, SOURCE, "find_course")
            .courses
            .get(&id)
            .cloned())
    }
}

#[async_trait]
impl CatalogWriteRepo for MemoryRepositories {
    async fn register_course(&self, course: NewCourse) -> Result<RegisteredCourse, RepoError> {
        self.enter().await?;
        let mut state = mutex_lock(&self.state, SOURCE, "register_course");
        let now = OffsetDateTime::now_utc();

        if state
            .courses
            .values()
            .any(|existing| existing.code_id == course.code_id)
        {
            return Err(RepoError::Duplicate {
                constraint: constraints::COURSE_CODE_ID.to_string(),
            });
        }

        let existing_group = state
            .groups
            .values()
            .find(|group| group.code == course.code)
            .map(|group| group.id);
        let (group_id, group_created) = match existing_group {
            Some(id) => (id, false),
            None => {
                let id = Uuid::new_v4();
                state.groups.insert(
                    id,
                    CourseGroupRecord {
                        id,
                        name: course.name.clone(),
                        code: course.code.clone(),
                        department: course.department.clone(),
                        campus_name: course.campus_name.clone(),
                        credits: Vec::new(),
                        course_count: 0,
                        review_count: 0,
                        courses: Vec::new(),
                        created_at: now,
                        updated_at: now,
                    },
                );
                (id, true)
            }
        };

        let record = CourseRecord {
            id: Uuid::new_v4(),
            group_id,
            name: course.name,
            code: course.code,
            code_id: course.code_id,
            credit: course.credit,
            department: course.department,
            campus_name: course.campus_name,
            teachers: course.teachers,
            max_student: course.max_student,
            week_hour: course.week_hour,
            year: course.year,
            semester: course.semester,
            review_count: 0,
            created_at: now,
            updated_at: now,
        };

        let group = state
            .groups
            .get_mut(&group_id)
            .ok_or_else(|| RepoError::Integrity {
                message: format!("course group `{group_id}` vanished"),
            })?;
        group.course_count += 1;
        merge_credit(&mut group.credits, record.credit);
        group.updated_at = now;

        state.courses.insert(record.id, record.clone());
        Ok(RegisteredCourse {
            course: record,
            group_created,
        })
    }
}

#[async_trait]
impl ReviewsRepo for MemoryRepositories {
    async fn find_review(&self, id: Uuid) -> Result<Option<ReviewRecord>, RepoError> {
        self.enter().await?;
        Ok(mutex_lock(&self.state, SOURCE, "find_review")
            .reviews
            .get(&id)
            .cloned())
    }

    async fn list_for_courses(&self, course_ids: &[Uuid]) -> Result<Vec<ReviewRecord>, RepoError> {
        self.enter().await?;
        let state = mutex_lock(&self.state, SOURCE, "list_for_courses");
        let mut reviews: Vec<ReviewRecord> = state
            .reviews
            .values()
            .filter(|review| course_ids.contains(&review.course_id))
            .cloned()
            .collect();
        reviews.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(reviews)
    }

    async fn list_by_reviewer(&self, reviewer_id: i64) -> Result<Vec<ReviewRecord>, RepoError> {
        self.enter().await?;
        let state = mutex_lock(&self.state, SOURCE, "list_by_reviewer");
        let mut reviews: Vec<ReviewRecord> = state
            .reviews
            .values()
            .filter(|review| review.reviewer_id == reviewer_id)
            .cloned()
            .collect();
        reviews.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(reviews)
    }

    async fn list_history(&self, review_id: Uuid) -> Result<Vec<ReviewHistoryRecord>, RepoError> {
        self.enter().await?;
        let state = mutex_lock(&self.state, SOURCE, "list_history");
        // appended in edit order already
        Ok(state
            .history
            .iter()
            .filter(|entry| entry.review_id == review_id)
            .cloned()
            .collect())
    }

    async fn find_votes(
        &self,
        user_id: i64,
        review_ids: &[Uuid],
    ) -> Result<Vec<ReviewVoteRecord>, RepoError> {
        self.enter().await?;
        let state = mutex_lock(&self.state, SOURCE, "find_votes");
        Ok(review_ids
            .iter()
            .filter_map(|review_id| {
                state
                    .votes
                    .get(&(user_id, *review_id))
                    .filter(|value| **value != VoteValue::None)
                    .map(|value| ReviewVoteRecord {
                        user_id,
                        review_id: *review_id,
                        data: *value,
                    })
            })
            .collect())
    }

    async fn list_flagged(
        &self,
        filter: FlaggedFilter,
        before: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<ReviewRecord>, RepoError> {
        self.enter().await?;
        let state = mutex_lock(&self.state, SOURCE, "list_flagged");
        let mut reviews: Vec<ReviewRecord> = state
            .reviews
            .values()
            .filter(|review| review.moderation.reported && review.updated_at < before)
            .filter(|review| {
                let decided = review.moderation.confirmation != Confirmation::Unreviewed;
                match filter {
                    FlaggedFilter::Open => !decided,
                    FlaggedFilter::Closed => decided,
                    FlaggedFilter::All => true,
                }
            })
            .cloned()
            .collect();
        reviews.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        reviews.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(reviews)
    }
}

#[async_trait]
impl ReviewsWriteRepo for MemoryRepositories {
    async fn create_review(&self, params: CreateReviewParams) -> Result<ReviewRecord, RepoError> {
        self.enter().await?;
        let mut state = mutex_lock(&self.state, SOURCE, "create_review");
        let now = OffsetDateTime::now_utc();

        let group_id = state
            .courses
            .get(&params.course_id)
            .map(|course| course.group_id)
            .ok_or(RepoError::NotFound)?;

        if state.reviews.values().any(|review| {
            review.course_id == params.course_id && review.reviewer_id == params.reviewer_id
        }) {
            return Err(RepoError::Duplicate {
                constraint: constraints::REVIEW_PER_REVIEWER.to_string(),
            });
        }

        let review = ReviewRecord {
            id: Uuid::new_v4(),
            course_id: params.course_id,
            reviewer_id: params.reviewer_id,
            title: params.draft.title,
            content: params.draft.content,
            rank: params.draft.rank,
            upvote_count: 0,
            downvote_count: 0,
            modify_count: 0,
            moderation: params.moderation,
            created_at: now,
            updated_at: now,
        };

        if let Some(course) = state.courses.get_mut(&params.course_id) {
            course.review_count += 1;
        }
        if let Some(group) = state.groups.get_mut(&group_id) {
            group.review_count += 1;
        }
        state.reviews.insert(review.id, review.clone());
        Ok(review)
    }

    async fn revise_review(&self, params: ReviseReviewParams) -> Result<RevisedReview, RepoError> {
        self.enter().await?;
        let mut state = mutex_lock(&self.state, SOURCE, "revise_review");

        let mut review = state
            .reviews
            .get(&params.review_id)
            .cloned()
            .ok_or(RepoError::NotFound)?;
        let history = review.apply_edit(
            params.editor_id,
            &params.edit,
            params.moderation,
            OffsetDateTime::now_utc(),
        )?;

        state.history.push(history.clone());
        state.reviews.insert(review.id, review.clone());
        Ok(RevisedReview { review, history })
    }

    async fn toggle_vote(
        &self,
        review_id: Uuid,
        user_id: i64,
        direction: VoteDirection,
    ) -> Result<VoteTally, RepoError> {
        self.enter().await?;
        let mut state = mutex_lock(&self.state, SOURCE, "toggle_vote");

        if !state.reviews.contains_key(&review_id) {
            return Err(RepoError::NotFound);
        }

        let current = state
            .votes
            .get(&(user_id, review_id))
            .copied()
            .unwrap_or_default();
        state
            .votes
            .insert((user_id, review_id), current.toggled(direction));

        let tally = state.tally(review_id);
        if let Some(review) = state.reviews.get_mut(&review_id) {
            review.upvote_count = tally.upvotes;
            review.downvote_count = tally.downvotes;
        }
        Ok(tally)
    }

    async fn confirm_moderation(
        &self,
        params: ConfirmModerationParams,
    ) -> Result<ReviewRecord, RepoError> {
        self.enter().await?;
        let mut state = mutex_lock(&self.state, SOURCE, "confirm_moderation");

        let mut review = state
            .reviews
            .get(&params.review_id)
            .cloned()
            .ok_or(RepoError::NotFound)?;
        review
            .moderation
            .confirm(params.sensitive, params.detail.as_deref())?;
        review.updated_at = OffsetDateTime::now_utc();

        state.reviews.insert(review.id, review.clone());
        Ok(review)
    }

    async fn delete_review(&self, review_id: Uuid) -> Result<ReviewRecord, RepoError> {
        self.enter().await?;
        let mut state = mutex_lock(&self.state, SOURCE, "delete_review");

        let review = state
            .reviews
            .remove(&review_id)
            .ok_or(RepoError::NotFound)?;
        state.history.retain(|history| history.review_id != review_id);
        state.votes.retain(|(_, id), _| *id != review_id);

        let group_id = state.courses.get_mut(&review.course_id).map(|course| {
            course.review_count -= 1;
            course.group_id
        });
        if let Some(group) = group_id.and_then(|id| state.groups.get_mut(&id)) {
            group.review_count -= 1;
        }
        Ok(review)
    }
}
