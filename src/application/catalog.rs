use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::application::{
    deadline::Deadline,
    error::AppError,
    hierarchy::AggregateCache,
    repos::{CatalogRepo, CatalogWriteRepo, RepoError, ReviewsRepo, constraints},
    retry::{RetryPolicy, with_retry},
};
use crate::domain::catalog::{GroupSearch, NewCourse};
use crate::domain::entities::{
    CourseGroupDetail, CourseGroupRecord, CourseRecord, CourseWithReviews, ReviewRecord,
};

const SOURCE: &str = "application::catalog";

/// One page of a group search. Groups carry no courses.
#[derive(Debug, Clone)]
pub struct GroupPage {
    pub items: Vec<CourseGroupRecord>,
    pub page: u32,
    /// Zero when the search was unpaged.
    pub page_size: u32,
}

/// Course registration and group lookups.
#[derive(Clone)]
pub struct CatalogService {
    reader: Arc<dyn CatalogRepo>,
    writer: Arc<dyn CatalogWriteRepo>,
    reviews: Arc<dyn ReviewsRepo>,
    hierarchy: Arc<AggregateCache>,
    retry: RetryPolicy,
}

impl CatalogService {
    pub fn new(
        reader: Arc<dyn CatalogRepo>,
        writer: Arc<dyn CatalogWriteRepo>,
        reviews: Arc<dyn ReviewsRepo>,
        hierarchy: Arc<AggregateCache>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            reader,
            writer,
            reviews,
            hierarchy,
            retry,
        }
    }

    /// Registers a course, creating its group on first use of the code. The
    /// hierarchy cache is invalidated once the write has committed.
    pub async fn register_course(
        &self,
        deadline: Deadline,
        course: NewCourse,
    ) -> Result<CourseRecord, AppError> {
        let course = course.normalized()?;
        let code_id = course.code_id.clone();

        let result = with_retry(&self.retry, deadline, "register_course", || {
            self.writer.register_course(course.clone())
        })
        .await;

        match result {
            Ok(registered) => {
                self.hierarchy.invalidate().await;
                info!(
                    target = SOURCE,
                    course_id = %registered.course.id,
                    group_id = %registered.course.group_id,
                    code_id = %registered.course.code_id,
                    group_created = registered.group_created,
                    "course registered"
                );
                Ok(registered.course)
            }
            Err(RepoError::Duplicate { constraint }) if constraint == constraints::COURSE_CODE_ID => {
                Err(AppError::conflict(format!(
                    "course `{code_id}` is already registered"
                )))
            }
            Err(err @ RepoError::Timeout) => {
                // commit outcome unknown
                self.hierarchy.invalidate().await;
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// A group with every course and the reviews of each course.
    pub async fn find_group(
        &self,
        deadline: Deadline,
        id: Uuid,
    ) -> Result<CourseGroupDetail, AppError> {
        let group = with_retry(&self.retry, deadline, "find_group", || {
            self.reader.find_group(id)
        })
        .await?
        .ok_or_else(|| AppError::not_found("course group", id))?;

        let course_ids: Vec<Uuid> = group.courses.iter().map(|course| course.id).collect();
        let reviews = with_retry(&self.retry, deadline, "list_reviews_for_courses", || {
            self.reviews.list_for_courses(&course_ids)
        })
        .await?;

        let mut by_course: HashMap<Uuid, Vec<ReviewRecord>> = HashMap::new();
        for review in reviews {
            by_course.entry(review.course_id).or_default().push(review);
        }

        let courses = group
            .courses
            .into_iter()
            .map(|course| {
                let reviews = by_course.remove(&course.id).unwrap_or_default();
                CourseWithReviews { course, reviews }
            })
            .collect();

        Ok(CourseGroupDetail {
            id: group.id,
            name: group.name,
            code: group.code,
            department: group.department,
            campus_name: group.campus_name,
            credits: group.credits,
            course_count: group.course_count,
            review_count: group.review_count,
            courses,
        })
    }

    /// Searches groups by code prefix when `query` looks like a course code
    /// and by name otherwise. See [`GroupSearch::new`] for the paging rules.
    pub async fn search_groups(
        &self,
        deadline: Deadline,
        query: &str,
        page: u32,
        page_size: u32,
    ) -> Result<GroupPage, AppError> {
        let search = GroupSearch::new(query, page, page_size)?;
        let items = with_retry(&self.retry, deadline, "search_groups", || {
            self.reader.search_groups(&search)
        })
        .await?;

        debug!(
            target = SOURCE,
            matcher = ?search.matcher,
            page = search.page,
            found = items.len(),
            "course groups searched"
        );
        Ok(GroupPage {
            items,
            page: search.page,
            page_size: search.page_size,
        })
    }

    pub async fn find_course(
        &self,
        deadline: Deadline,
        id: Uuid,
    ) -> Result<CourseRecord, AppError> {
        with_retry(&self.retry, deadline, "find_course", || {
            self.reader.find_course(id)
        })
        .await?
        .ok_or_else(|| AppError::not_found("course", id))
    }
}
