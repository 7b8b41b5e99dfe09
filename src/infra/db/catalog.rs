use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{
        CatalogRepo, CatalogWriteRepo, RegisteredCourse, RepoError, constraints,
    },
    domain::{
        catalog::{GroupMatch, GroupSearch, NewCourse, merge_credit},
        entities::{CourseGroupRecord, CourseRecord},
    },
};

use super::{PostgresRepositories, map_sqlx_error};

const GROUP_COLUMNS: &str = "id, name, code, department, campus_name, credits, \
    course_count, review_count, created_at, updated_at";

const COURSE_COLUMNS: &str = "id, group_id, name, code, code_id, credit, department, \
    campus_name, teachers, max_student, week_hour, year, semester, review_count, \
    created_at, updated_at";

#[derive(sqlx::FromRow)]
struct GroupRow {
    id: Uuid,
    name: String,
    code: String,
    department: String,
    campus_name: String,
    credits: Vec<f64>,
    course_count: i32,
    review_count: i32,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl GroupRow {
    fn into_record(self, courses: Vec<CourseRecord>) -> CourseGroupRecord {
        CourseGroupRecord {
            id: self.id,
            name: self.name,
            code: self.code,
            department: self.department,
            campus_name: self.campus_name,
            credits: self.credits,
            course_count: self.course_count,
            review_count: self.review_count,
            courses,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CourseRow {
    id: Uuid,
    group_id: Uuid,
    name: String,
    code: String,
    code_id: String,
    credit: f64,
    department: String,
    campus_name: String,
    teachers: String,
    max_student: i32,
    week_hour: i32,
    year: i32,
    semester: i32,
    review_count: i32,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<CourseRow> for CourseRecord {
    fn from(row: CourseRow) -> Self {
        Self {
            id: row.id,
            group_id: row.group_id,
            name: row.name,
            code: row.code,
            code_id: row.code_id,
            credit: row.credit,
            department: row.department,
            campus_name: row.campus_name,
            teachers: row.teachers,
            max_student: row.max_student,
            week_hour: row.week_hour,
            year: row.year,
            semester: row.semester,
            review_count: row.review_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl CatalogRepo for PostgresRepositories {
    async fn load_hierarchy(&self) -> Result<Vec<CourseGroupRecord>, RepoError> {
        // one snapshot for both reads
        let mut tx = self.pool().begin().await.map_err(map_sqlx_error)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let groups = sqlx::query_as::<_, GroupRow>(&format!(
            "SELECT {GROUP_COLUMNS} FROM course_groups ORDER BY code, id"
        ))
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let courses = sqlx::query_as::<_, CourseRow>(&format!(
            "SELECT {COURSE_COLUMNS} FROM courses ORDER BY code_id, id"
        ))
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        let mut by_group: HashMap<Uuid, Vec<CourseRecord>> = HashMap::new();
        for course in courses {
            by_group
                .entry(course.group_id)
                .or_default()
                .push(course.into());
        }

        Ok(groups
            .into_iter()
            .map(|group| {
                let courses = by_group.remove(&group.id).unwrap_or_default();
                group.into_record(courses)
            })
            .collect())
    }

    async fn find_group(&self, id: Uuid) -> Result<Option<CourseGroupRecord>, RepoError> {
        let Some(group) = sqlx::query_as::<_, GroupRow>(&format!(
            "SELECT {GROUP_COLUMNS} FROM course_groups WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?
        else {
            return Ok(None);
        };

        let courses = sqlx::query_as::<_, CourseRow>(&format!(
            "SELECT {COURSE_COLUMNS} FROM courses WHERE group_id = $1 ORDER BY code_id, id"
        ))
        .bind(id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(Some(group.into_record(
            courses.into_iter().map(CourseRecord::from).collect(),
        )))
    }

    async fn search_groups(
        &self,
        search: &GroupSearch,
    ) -> Result<Vec<CourseGroupRecord>, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {GROUP_COLUMNS} FROM course_groups WHERE "
        ));
        match &search.matcher {
            GroupMatch::CodePrefix(prefix) => {
                qb.push("code LIKE ");
                qb.push_bind(format!("{}%", escape_like(prefix)));
            }
            GroupMatch::NameContains(needle) => {
                qb.push("name LIKE ");
                qb.push_bind(format!("%{}%", escape_like(needle)));
            }
        }
        qb.push(" ESCAPE '\\' ORDER BY code, id");
        if let Some(limit) = search.limit() {
            qb.push(" LIMIT ");
            qb.push_bind(i64::from(limit));
        }
        qb.push(" OFFSET ");
        qb.push_bind(i64::try_from(search.offset()).unwrap_or(i64::MAX));

        let rows = qb
            .build_query_as::<GroupRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows
            .into_iter()
            .map(|group| group.into_record(Vec::new()))
            .collect())
    }

    async fn find_course(&self, id: Uuid) -> Result<Option<CourseRecord>, RepoError> {
        let row = sqlx::query_as::<_, CourseRow>(&format!(
            "SELECT {COURSE_COLUMNS} FROM courses WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(CourseRecord::from))
    }
}

/// Makes `LIKE` treat `%`, `_` and `\` in user input literally.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

impl PostgresRepositories {
    /// Finds the group for `course.code` and locks it, creating it when the
    /// code is new. Returns the row and whether it was created.
    async fn lock_or_create_group(
        tx: &mut Transaction<'_, Postgres>,
        course: &NewCourse,
        now: OffsetDateTime,
    ) -> Result<(GroupRow, bool), RepoError> {
        let inserted = sqlx::query_as::<_, GroupRow>(&format!(
            "INSERT INTO course_groups \
                (id, name, code, department, campus_name, credits, course_count, \
                 review_count, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, '{{}}', 0, 0, $6, $6) \
             ON CONFLICT (code) DO NOTHING \
             RETURNING {GROUP_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&course.name)
        .bind(&course.code)
        .bind(&course.department)
        .bind(&course.campus_name)
        .bind(now)
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;

        if let Some(group) = inserted {
            return Ok((group, true));
        }

        let existing = sqlx::query_as::<_, GroupRow>(&format!(
            "SELECT {GROUP_COLUMNS} FROM course_groups WHERE code = $1 FOR UPDATE"
        ))
        .bind(&course.code)
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;

        // the conflicting insert has not committed yet
        existing
            .map(|group| (group, false))
            .ok_or_else(|| RepoError::retryable("course group is being created concurrently"))
    }
}

#[async_trait]
impl CatalogWriteRepo for PostgresRepositories {
    async fn register_course(&self, course: NewCourse) -> Result<RegisteredCourse, RepoError> {
        let mut tx = self.begin().await?;
        let now = OffsetDateTime::now_utc();

        let taken = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM courses WHERE code_id = $1")
            .bind(&course.code_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        if taken > 0 {
            return Err(RepoError::Duplicate {
                constraint: constraints::COURSE_CODE_ID.to_string(),
            });
        }

        let (group, group_created) = Self::lock_or_create_group(&mut tx, &course, now).await?;

        let inserted = sqlx::query_as::<_, CourseRow>(&format!(
            "INSERT INTO courses \
                (id, group_id, name, code, code_id, credit, department, campus_name, \
                 teachers, max_student, week_hour, year, semester, review_count, \
                 created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 0, $14, $14) \
             RETURNING {COURSE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(group.id)
        .bind(&course.name)
        .bind(&course.code)
        .bind(&course.code_id)
        .bind(course.credit)
        .bind(&course.department)
        .bind(&course.campus_name)
        .bind(&course.teachers)
        .bind(course.max_student)
        .bind(course.week_hour)
        .bind(course.year)
        .bind(course.semester)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let mut credits = group.credits;
        merge_credit(&mut credits, course.credit);

        sqlx::query(
            "UPDATE course_groups \
             SET course_count = course_count + 1, credits = $2, updated_at = $3 \
             WHERE id = $1",
        )
        .bind(group.id)
        .bind(&credits)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(RegisteredCourse {
            course: inserted.into(),
            group_created,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::escape_like;

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("COMP13"), "COMP13");
        assert_eq!(escape_like("100%_off\\"), "100\\%\\_off\\\\");
    }
}
