use std::{process, sync::Arc, time::Duration};

use coursebook::{
    application::{
        catalog::CatalogService,
        deadline::Deadline,
        error::{AppError, ErrorReport},
        hierarchy::AggregateCache,
        import::{ImportError, import_courses, parse_manifest},
        repos::{CatalogRepo, CatalogWriteRepo, ReviewsRepo},
        retry::RetryPolicy,
    },
    cache::{CacheConfig, InMemorySnapshotBackend, SnapshotBackend},
    config::{self, CommonOverrides, ImportCoursesArgs},
    infra::{db::PostgresRepositories, error::InfraError, telemetry},
};
use serde_json::json;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

const SOURCE: &str = "coursebook::main";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let report = ErrorReport::from_error(SOURCE, error);
    let emit = || {
        error!(
            target = SOURCE,
            kind = ?report.kind,
            messages = ?report.messages,
            "application error"
        );
    };

    if dispatcher::has_been_set() {
        emit();
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, emit);
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::internal(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match cli_args.command {
        config::Command::Migrate(_) => run_migrate(&settings).await,
        config::Command::Digest(args) => run_digest(&settings, &args.overrides).await,
        config::Command::Refresh(args) => run_refresh(&settings, &args.overrides).await,
        config::Command::ImportCourses(args) => run_import_courses(&settings, args).await,
    }
}

async fn run_migrate(settings: &config::Settings) -> Result<(), AppError> {
    init_repositories(settings).await?;
    info!(target = SOURCE, "migrations applied");
    Ok(())
}

async fn run_digest(
    settings: &config::Settings,
    overrides: &CommonOverrides,
) -> Result<(), AppError> {
    let repositories = init_repositories(settings).await?;
    let hierarchy = build_hierarchy(&repositories, settings);

    let digest = hierarchy.digest(deadline_from(overrides)).await?;
    println!("{digest}");
    Ok(())
}

async fn run_refresh(
    settings: &config::Settings,
    overrides: &CommonOverrides,
) -> Result<(), AppError> {
    let repositories = init_repositories(settings).await?;
    let hierarchy = build_hierarchy(&repositories, settings);

    let snapshot = hierarchy.refresh(deadline_from(overrides)).await?;
    let courses: usize = snapshot.groups.iter().map(|group| group.courses.len()).sum();
    let reviews: i64 = snapshot
        .groups
        .iter()
        .map(|group| i64::from(group.review_count))
        .sum();

    print_json(&json!({
        "groups": snapshot.groups.len(),
        "courses": courses,
        "reviews": reviews,
        "digest": snapshot.digest,
    }))
}

async fn run_import_courses(
    settings: &config::Settings,
    args: ImportCoursesArgs,
) -> Result<(), AppError> {
    let manifest = tokio::fs::read_to_string(&args.file)
        .await
        .map_err(|err| AppError::from(InfraError::read(&args.file, err)))?;
    let courses = parse_manifest(&manifest).map_err(import_error)?;

    info!(
        target = SOURCE,
        path = %args.file.display(),
        courses = courses.len(),
        "starting course import"
    );

    let repositories = init_repositories(settings).await?;
    let hierarchy = build_hierarchy(&repositories, settings);
    let retry = RetryPolicy::from(&settings.store);
    let catalog = CatalogService::new(
        repositories.clone() as Arc<dyn CatalogRepo>,
        repositories.clone() as Arc<dyn CatalogWriteRepo>,
        repositories.clone() as Arc<dyn ReviewsRepo>,
        hierarchy,
        retry,
    );

    let summary = import_courses(&catalog, deadline_from(&args.overrides), courses)
        .await
        .map_err(import_error)?;

    print_json(&json!({
        "registered": summary.registered,
        "skipped": summary.skipped,
    }))
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::migration(err.to_string())))?;

    Ok(Arc::new(
        PostgresRepositories::new(pool).with_lock_timeout(settings.database.lock_timeout),
    ))
}

/// One-shot commands have no shared cache to keep warm, so the hierarchy is
/// cached in process for the lifetime of the command.
fn build_hierarchy(
    repositories: &Arc<PostgresRepositories>,
    settings: &config::Settings,
) -> Arc<AggregateCache> {
    let catalog: Arc<dyn CatalogRepo> = repositories.clone();
    let backend: Arc<dyn SnapshotBackend> = Arc::new(InMemorySnapshotBackend::new());
    Arc::new(AggregateCache::new(
        catalog,
        backend,
        CacheConfig::from(&settings.cache),
        RetryPolicy::from(&settings.store),
    ))
}

fn deadline_from(overrides: &CommonOverrides) -> Deadline {
    overrides
        .deadline_ms
        .map(|millis| Deadline::after(Duration::from_millis(millis)))
        .unwrap_or_default()
}

fn import_error(err: ImportError) -> AppError {
    match err {
        ImportError::Manifest(err) => AppError::bad_request("manifest", err.to_string()),
        ImportError::Course {
            index,
            code_id,
            source,
        } => {
            error!(target = SOURCE, index, %code_id, "course import stopped");
            source
        }
    }
}

fn print_json(value: &serde_json::Value) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::internal(format!("failed to encode output: {err}")))?;
    println!("{rendered}");
    Ok(())
}
