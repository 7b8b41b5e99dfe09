use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the coursebook binary.
#[derive(Debug, Parser)]
#[command(
    name = "coursebook",
    version,
    about = "Course catalogue, review and moderation engine"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "COURSEBOOK_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Apply pending database migrations.
    Migrate(CommandArgs),
    /// Print the digest of the current course-group hierarchy.
    Digest(CommandArgs),
    /// Drop the cached hierarchy and load it again.
    Refresh(CommandArgs),
    /// Register the courses listed in a TOML manifest.
    #[command(name = "import-courses")]
    ImportCourses(ImportCoursesArgs),
}

impl Command {
    pub fn overrides(&self) -> &CommonOverrides {
        match self {
            Command::Migrate(args) | Command::Digest(args) | Command::Refresh(args) => {
                &args.overrides
            }
            Command::ImportCourses(args) => &args.overrides,
        }
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct CommandArgs {
    #[command(flatten)]
    pub overrides: CommonOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct ImportCoursesArgs {
    /// Manifest with one `[[courses]]` table per course.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    #[command(flatten)]
    pub overrides: CommonOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CommonOverrides {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Give up on store calls after this many milliseconds.
    #[arg(long = "deadline-ms", value_name = "MILLIS")]
    pub deadline_ms: Option<u64>,
}
