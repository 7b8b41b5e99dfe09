//! Service-level behaviour over the in-memory store: the full course, review,
//! vote and moderation flow plus the error kinds callers rely on.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use coursebook::application::{
    catalog::CatalogService,
    deadline::Deadline,
    error::ErrorKind,
    hierarchy::AggregateCache,
    moderation::{ConfirmCommand, ModerationStateMachine},
    repos::FlaggedFilter,
    retry::RetryPolicy,
    reviews::ReviewQueries,
    revisions::{
        CreateReviewCommand, DeleteReviewCommand, ReviewRevisionManager, UpdateReviewCommand,
    },
    votes::VoteTallyCoordinator,
};
use coursebook::cache::{CacheConfig, InMemorySnapshotBackend};
use coursebook::domain::{
    catalog::NewCourse,
    entities::{CourseRecord, ReviewRecord},
    moderation::{ModerationState, ModerationVerdict, PENDING_PLACEHOLDER, REMOVED_PLACEHOLDER},
    reviews::{ReviewDraft, ReviewEdit, ReviewRank},
    votes::{VoteDirection, VoteTally, VoteValue},
};
use coursebook::infra::memory::MemoryRepositories;
use uuid::Uuid;

struct Harness {
    repos: Arc<MemoryRepositories>,
    hierarchy: Arc<AggregateCache>,
    catalog: CatalogService,
    revisions: ReviewRevisionManager,
    votes: VoteTallyCoordinator,
    moderation: ModerationStateMachine,
    queries: ReviewQueries,
}

impl Harness {
    fn new() -> Self {
        Self::with_retry(RetryPolicy {
            max_attempts: NonZeroU32::new(3).expect("non-zero"),
            backoff: Duration::from_millis(1),
        })
    }

    fn with_retry(retry: RetryPolicy) -> Self {
        let repos = Arc::new(MemoryRepositories::new());
        let hierarchy = Arc::new(AggregateCache::new(
            repos.clone(),
            Arc::new(InMemorySnapshotBackend::new()),
            CacheConfig::default(),
            retry,
        ));
        let catalog = CatalogService::new(
            repos.clone(),
            repos.clone(),
            repos.clone(),
            hierarchy.clone(),
            retry,
        );
        let moderation = ModerationStateMachine::new(repos.clone(), repos.clone(), retry);
        let revisions = ReviewRevisionManager::new(
            repos.clone(),
            repos.clone(),
            hierarchy.clone(),
            moderation.clone(),
            retry,
        );
        let votes = VoteTallyCoordinator::new(repos.clone(), retry);
        let queries = ReviewQueries::new(repos.clone(), retry);

        Self {
            repos,
            hierarchy,
            catalog,
            revisions,
            votes,
            moderation,
            queries,
        }
    }

    async fn course(&self, code: &str, code_id: &str) -> CourseRecord {
        self.catalog
            .register_course(Deadline::none(), new_course(code, code_id, 3.0))
            .await
            .expect("course registers")
    }

    async fn review(&self, course_id: Uuid, reviewer_id: i64, content: &str) -> ReviewRecord {
        self.revisions
            .create(
                Deadline::none(),
                create_command(course_id, reviewer_id, content, None),
            )
            .await
            .expect("review is created")
    }

    async fn digest(&self) -> String {
        self.hierarchy
            .digest(Deadline::none())
            .await
            .expect("digest")
            .as_str()
            .to_string()
    }
}

fn new_course(code: &str, code_id: &str, credit: f64) -> NewCourse {
    NewCourse {
        name: "Introduction to Computer Science".into(),
        code: code.into(),
        code_id: code_id.into(),
        credit,
        department: "Computer Science".into(),
        campus_name: "Handan".into(),
        teachers: "Alice".into(),
        max_student: 120,
        week_hour: 4,
        year: 2024,
        semester: 1,
    }
}

fn create_command(
    course_id: Uuid,
    reviewer_id: i64,
    content: &str,
    verdict: Option<ModerationVerdict>,
) -> CreateReviewCommand {
    CreateReviewCommand {
        course_id,
        reviewer_id,
        draft: ReviewDraft {
            title: "Worth taking".into(),
            content: content.into(),
            rank: ReviewRank::new(5, 5, 5, 5),
        },
        verdict,
    }
}

fn content_edit(review_id: Uuid, editor_id: i64, content: &str) -> UpdateReviewCommand {
    UpdateReviewCommand {
        review_id,
        editor_id,
        edit: ReviewEdit {
            content: Some(content.into()),
            ..Default::default()
        },
        verdict: None,
    }
}

#[tokio::test]
async fn course_review_vote_and_edit_flow() {
    let harness = Harness::new();

    let course = harness.course("CS101-GROUP", "CS101-GROUP.01").await;
    let after_course = harness.digest().await;

    let review = harness.review(course.id, 7, "original").await;
    assert_eq!(review.rank, ReviewRank::new(5, 5, 5, 5));
    let after_review = harness.digest().await;
    assert_ne!(after_course, after_review, "review counters are part of the hierarchy");

    let tally = harness
        .votes
        .toggle_vote(Deadline::none(), review.id, 8, VoteDirection::Up)
        .await
        .expect("vote");
    assert_eq!(tally, VoteTally::new(1, 0));
    assert_eq!(harness.digest().await, after_review);

    let updated = harness
        .revisions
        .update(Deadline::none(), content_edit(review.id, 7, "revised"))
        .await
        .expect("edit");
    assert_eq!(updated.review.modify_count, 1);
    assert_eq!(updated.review.content, "revised");
    assert_eq!(updated.history.content, "original");
    assert_eq!(harness.digest().await, after_review);

    // a full reload agrees: votes and edits are not in the snapshot
    let reloaded = harness
        .hierarchy
        .refresh(Deadline::none())
        .await
        .expect("refresh");
    assert_eq!(reloaded.digest.as_str(), after_review);

    let view = harness
        .queries
        .get(Deadline::none(), review.id, Some(8))
        .await
        .expect("review view");
    assert_eq!(view.history.len(), 1);
    assert_eq!(view.history[0].content, "original");
    assert_eq!(view.vote, VoteValue::Up);
    assert_eq!(view.remark, 1);
    assert!(!view.is_me);

    harness.course("CS101-GROUP", "CS101-GROUP.02").await;
    let after_second_course = harness.digest().await;
    assert_ne!(after_second_course, after_review);

    let snapshot = harness.hierarchy.get(Deadline::none()).await.expect("get");
    assert_eq!(snapshot.groups.len(), 1);
    let group = &snapshot.groups[0];
    assert_eq!(group.code, "CS101-GROUP");
    assert_eq!(group.course_count, 2);
    assert_eq!(group.review_count, 1);
    assert_eq!(group.courses.len(), 2);
}

#[tokio::test]
async fn edit_history_tracks_every_revision() {
    let harness = Harness::new();
    let course = harness.course("MATH120", "MATH120.01").await;
    let review = harness.review(course.id, 3, "v0").await;

    for k in 1..=3 {
        let updated = harness
            .revisions
            .update(Deadline::none(), content_edit(review.id, 3, &format!("v{k}")))
            .await
            .expect("edit");
        assert_eq!(updated.review.modify_count, k);
        assert_eq!(updated.history.content, format!("v{}", k - 1));
    }

    let view = harness
        .queries
        .get(Deadline::none(), review.id, Some(3))
        .await
        .expect("view");
    assert_eq!(view.modify_count, 3);
    assert_eq!(view.content, "v3");
    assert!(view.is_me);
    let contents: Vec<&str> = view.history.iter().map(|h| h.content.as_str()).collect();
    assert_eq!(contents, ["v0", "v1", "v2"]);
}

#[tokio::test]
async fn rank_only_edit_keeps_text() {
    let harness = Harness::new();
    let course = harness.course("PHYS110", "PHYS110.01").await;
    let review = harness.review(course.id, 4, "kept").await;

    let updated = harness
        .revisions
        .update(
            Deadline::none(),
            UpdateReviewCommand {
                review_id: review.id,
                editor_id: 4,
                edit: ReviewEdit {
                    rank: Some(ReviewRank::new(2, 3, 4, 1)),
                    ..Default::default()
                },
                verdict: None,
            },
        )
        .await
        .expect("edit");

    assert_eq!(updated.review.content, "kept");
    assert_eq!(updated.review.title, review.title);
    assert_eq!(updated.review.rank, ReviewRank::new(2, 3, 4, 1));
    assert_eq!(updated.history.rank, ReviewRank::new(5, 5, 5, 5));
}

#[tokio::test]
async fn duplicate_writes_conflict() {
    let harness = Harness::new();
    let course = harness.course("CHEM101", "CHEM101.01").await;

    let err = harness
        .catalog
        .register_course(Deadline::none(), new_course("CHEM101", "CHEM101.01", 2.0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    harness.review(course.id, 9, "first").await;
    let before = harness.digest().await;
    let err = harness
        .revisions
        .create(
            Deadline::none(),
            create_command(course.id, 9, "second", None),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let group = harness
        .catalog
        .find_group(Deadline::none(), course.group_id)
        .await
        .expect("group");
    assert_eq!(group.review_count, 1);
    assert_eq!(group.courses[0].reviews.len(), 1);
    assert_eq!(harness.digest().await, before);
}

#[tokio::test]
async fn missing_entities_are_not_found() {
    let harness = Harness::new();
    let missing = Uuid::new_v4();

    let err = harness
        .revisions
        .create(Deadline::none(), create_command(missing, 1, "text", None))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = harness
        .revisions
        .update(Deadline::none(), content_edit(missing, 1, "text"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = harness
        .votes
        .toggle_vote(Deadline::none(), missing, 1, VoteDirection::Down)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = harness
        .catalog
        .find_group(Deadline::none(), missing)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = harness
        .queries
        .get(Deadline::none(), missing, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn invalid_input_is_a_bad_request() {
    let harness = Harness::new();
    let course = harness.course("ECON101", "ECON101.01").await;
    let review = harness.review(course.id, 2, "fine").await;

    let err = harness
        .revisions
        .update(
            Deadline::none(),
            UpdateReviewCommand {
                review_id: review.id,
                editor_id: 2,
                edit: ReviewEdit {
                    title: Some("   ".into()),
                    ..Default::default()
                },
                verdict: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);

    let mut command = create_command(course.id, 5, "text", None);
    command.draft.rank = ReviewRank::new(6, 1, 1, 1);
    let err = harness
        .revisions
        .create(Deadline::none(), command)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);

    let err = harness
        .catalog
        .register_course(Deadline::none(), new_course("X", "X.01", 3.0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);

    let unchanged = harness
        .queries
        .get(Deadline::none(), review.id, None)
        .await
        .expect("view");
    assert_eq!(unchanged.modify_count, 0);
    assert!(unchanged.history.is_empty());
}

#[tokio::test]
async fn moderation_controls_what_readers_see() {
    let harness = Harness::new();
    let course = harness.course("HIST200", "HIST200.01").await;

    let flagged = harness
        .revisions
        .create(
            Deadline::none(),
            create_command(
                course.id,
                11,
                "questionable",
                Some(ModerationVerdict::flagged("politics")),
            ),
        )
        .await
        .expect("flagged review");
    let clean = harness.review(course.id, 12, "harmless").await;

    let views = harness
        .queries
        .list_for_course(Deadline::none(), course.id, None)
        .await
        .expect("views");
    let flagged_view = views.iter().find(|v| v.id == flagged.id).expect("flagged view");
    assert_eq!(flagged_view.content, PENDING_PLACEHOLDER);
    assert_eq!(flagged_view.moderation, ModerationState::Pending);
    let clean_view = views.iter().find(|v| v.id == clean.id).expect("clean view");
    assert_eq!(clean_view.content, "harmless");

    let open = harness
        .moderation
        .list_flagged(Deadline::none(), FlaggedFilter::Open, None, None)
        .await
        .expect("queue");
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, flagged.id);

    let err = harness
        .moderation
        .confirm(
            Deadline::none(),
            ConfirmCommand {
                review_id: clean.id,
                admin_id: 1,
                sensitive: true,
                detail: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);

    let removed = harness
        .moderation
        .confirm(
            Deadline::none(),
            ConfirmCommand {
                review_id: flagged.id,
                admin_id: 1,
                sensitive: true,
                detail: Some("confirmed by admin".into()),
            },
        )
        .await
        .expect("confirm sensitive");
    assert!(removed.moderation.sensitive());
    let view = harness
        .queries
        .get(Deadline::none(), flagged.id, None)
        .await
        .expect("view");
    assert_eq!(view.content, REMOVED_PLACEHOLDER);

    let restored = harness
        .moderation
        .confirm(
            Deadline::none(),
            ConfirmCommand {
                review_id: flagged.id,
                admin_id: 1,
                sensitive: false,
                detail: None,
            },
        )
        .await
        .expect("confirm clean");
    assert!(!restored.moderation.sensitive());
    assert!(restored.moderation.reported);
    let view = harness
        .queries
        .get(Deadline::none(), flagged.id, None)
        .await
        .expect("view");
    assert_eq!(view.content, "questionable");

    let closed = harness
        .moderation
        .list_flagged(Deadline::none(), FlaggedFilter::Closed, None, None)
        .await
        .expect("closed queue");
    assert_eq!(closed.len(), 1);
    assert!(
        harness
            .moderation
            .list_flagged(Deadline::none(), FlaggedFilter::Open, None, None)
            .await
            .expect("open queue")
            .is_empty()
    );
}

#[tokio::test]
async fn edit_without_verdict_reopens_a_decision() {
    let harness = Harness::new();
    let course = harness.course("ARTS100", "ARTS100.01").await;
    let review = harness
        .revisions
        .create(
            Deadline::none(),
            create_command(course.id, 21, "edgy", Some(ModerationVerdict::flagged("tone"))),
        )
        .await
        .expect("review");

    harness
        .moderation
        .confirm(
            Deadline::none(),
            ConfirmCommand {
                review_id: review.id,
                admin_id: 1,
                sensitive: false,
                detail: None,
            },
        )
        .await
        .expect("cleared");

    let updated = harness
        .revisions
        .update(Deadline::none(), content_edit(review.id, 21, "edgier"))
        .await
        .expect("edit");
    assert_eq!(updated.review.moderation.state(), ModerationState::Pending);
    assert_eq!(updated.history.moderation.state(), ModerationState::ConfirmedClean);

    let passed = harness
        .revisions
        .update(
            Deadline::none(),
            UpdateReviewCommand {
                verdict: Some(ModerationVerdict::pass()),
                ..content_edit(review.id, 21, "calm")
            },
        )
        .await
        .expect("edit with verdict");
    assert_eq!(passed.review.moderation.state(), ModerationState::Clean);
}

#[tokio::test]
async fn reviewer_listing_is_most_recent_first() {
    let harness = Harness::new();
    let first = harness.course("LAW101", "LAW101.01").await;
    let second = harness.course("LAW102", "LAW102.01").await;

    let older = harness.review(first.id, 30, "older").await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let newer = harness.review(second.id, 30, "newer").await;
    harness.review(second.id, 31, "someone else").await;

    let listed = harness
        .queries
        .list_by_reviewer(Deadline::none(), 30)
        .await
        .expect("listing");
    let ids: Vec<Uuid> = listed.iter().map(|view| view.id).collect();
    assert_eq!(ids, [newer.id, older.id]);
    assert!(listed.iter().all(|view| view.is_me));
}

#[tokio::test]
async fn transient_store_failures_are_retried() {
    let harness = Harness::new();
    let course = harness.course("BIO101", "BIO101.01").await;
    let review = harness.review(course.id, 40, "text").await;

    harness.repos.inject_transient_failures(2);
    let tally = harness
        .votes
        .toggle_vote(Deadline::none(), review.id, 41, VoteDirection::Down)
        .await
        .expect("third attempt succeeds");
    assert_eq!(tally, VoteTally::new(0, 1));
    assert_eq!(harness.repos.cast_votes(review.id), 1);

    harness.repos.inject_transient_failures(3);
    let err = harness
        .votes
        .toggle_vote(Deadline::none(), review.id, 41, VoteDirection::Down)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Retryable);
    // nothing was applied by the failed attempts
    assert_eq!(harness.repos.cast_votes(review.id), 1);
}

#[tokio::test]
async fn expired_deadline_fails_as_retryable() {
    let harness = Harness::with_retry(RetryPolicy::once());
    let course = harness.course("GEO101", "GEO101.01").await;
    let review = harness.review(course.id, 50, "text").await;

    harness.repos.set_latency(Duration::from_millis(200));
    let err = harness
        .votes
        .toggle_vote(
            Deadline::after(Duration::from_millis(10)),
            review.id,
            51,
            VoteDirection::Up,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Retryable);

    let err = harness
        .hierarchy
        .refresh(Deadline::after(Duration::from_millis(10)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Retryable);

    harness.repos.set_latency(Duration::ZERO);
    let tally = harness
        .votes
        .toggle_vote(Deadline::none(), review.id, 51, VoteDirection::Up)
        .await
        .expect("vote after latency clears");
    assert_eq!(tally, VoteTally::new(1, 0));
}

#[tokio::test]
async fn group_search_matches_code_prefix_or_name() {
    let harness = Harness::new();
    for (name, code, code_id) in [
        ("Data Structures", "COMP130004", "COMP130004.01"),
        ("Data Structures", "COMP130004", "COMP130004.02"),
        ("Operating Systems", "COMP130011", "COMP130011.01"),
        ("Linear Algebra", "MATH120016", "MATH120016.01"),
    ] {
        harness
            .catalog
            .register_course(
                Deadline::none(),
                NewCourse {
                    name: name.into(),
                    ..new_course(code, code_id, 3.0)
                },
            )
            .await
            .expect("course registers");
    }
    let search = |query: &'static str, page, page_size| {
        harness
            .catalog
            .search_groups(Deadline::none(), query, page, page_size)
    };

    let by_code = search("COMP13", 0, 0).await.expect("search");
    let codes: Vec<&str> = by_code.items.iter().map(|g| g.code.as_str()).collect();
    assert_eq!(codes, ["COMP130004", "COMP130011"]);
    assert_eq!(by_code.items[0].course_count, 2);
    assert!(by_code.items.iter().all(|group| group.courses.is_empty()));

    let by_name = search("Algebra", 0, 0).await.expect("search");
    assert_eq!(by_name.items.len(), 1);
    assert_eq!(by_name.items[0].code, "MATH120016");

    // letters alone are not a course code, and no name contains them
    assert!(search("COMP", 0, 0).await.expect("search").items.is_empty());

    let second = search("COMP13", 2, 1).await.expect("search");
    assert_eq!((second.page, second.page_size), (2, 1));
    assert_eq!(second.items.len(), 1);
    assert_eq!(second.items[0].code, "COMP130011");
    assert!(search("COMP13", 3, 1).await.expect("search").items.is_empty());

    let defaulted = search("Data", 1, 0).await.expect("search");
    assert_eq!(defaulted.page_size, 10);
    assert_eq!(defaulted.items.len(), 1);

    let err = search("COMP13", 1, 101).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
    let err = search("   ", 1, 10).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
}

#[tokio::test]
async fn deleting_a_review_releases_its_counters() {
    let harness = Harness::new();
    let course = harness.course("HIST130", "HIST130.01").await;
    let before_review = harness.digest().await;

    let review = harness.review(course.id, 7, "to be removed").await;
    harness
        .votes
        .toggle_vote(Deadline::none(), review.id, 8, VoteDirection::Up)
        .await
        .expect("vote");
    harness
        .revisions
        .update(Deadline::none(), content_edit(review.id, 7, "edited once"))
        .await
        .expect("edit");
    assert_ne!(harness.digest().await, before_review);

    let delete = |actor_id, actor_is_admin| DeleteReviewCommand {
        review_id: review.id,
        actor_id,
        actor_is_admin,
    };

    let err = harness
        .revisions
        .delete(Deadline::none(), delete(9, false))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert!(
        harness
            .queries
            .get(Deadline::none(), review.id, None)
            .await
            .is_ok()
    );

    let removed = harness
        .revisions
        .delete(Deadline::none(), delete(7, false))
        .await
        .expect("owner deletes");
    assert_eq!(removed.id, review.id);

    // counters return to where they were, and the cache shows it
    assert_eq!(harness.digest().await, before_review);
    let course = harness
        .catalog
        .find_course(Deadline::none(), course.id)
        .await
        .expect("course");
    assert_eq!(course.review_count, 0);
    let snapshot = harness.hierarchy.get(Deadline::none()).await.expect("get");
    assert_eq!(snapshot.groups[0].review_count, 0);
    assert_eq!(harness.repos.cast_votes(review.id), 0);

    let err = harness
        .queries
        .get(Deadline::none(), review.id, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = harness
        .revisions
        .delete(Deadline::none(), delete(7, false))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // the reviewer may review the course again
    let again = harness.review(course.id, 7, "second attempt").await;
    let removed = harness
        .revisions
        .delete(
            Deadline::none(),
            DeleteReviewCommand {
                review_id: again.id,
                actor_id: 1,
                actor_is_admin: true,
            },
        )
        .await
        .expect("admin deletes any review");
    assert_eq!(removed.reviewer_id, 7);
}
