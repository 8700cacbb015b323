use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the Bookshelf binary.
#[derive(Debug, Parser)]
#[command(name = "bookshelf", version, about = "Bookshelf startup configurator")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "BOOKSHELF_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Build every configured handle and report what was constructed.
    Check(CheckArgs),
    /// Open the database and Pub/Sub client, creating the topic if it is missing.
    Topic(TopicArgs),
}

impl Default for Command {
    fn default() -> Self {
        Self::Check(CheckArgs::default())
    }
}

impl Command {
    pub fn overrides(&self) -> &Overrides {
        match self {
            Command::Check(args) => &args.overrides,
            Command::Topic(args) => &args.overrides,
        }
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct CheckArgs {
    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct TopicArgs {
    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
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

    /// Override the book storage backend (memory|mysql|mongo|datastore).
    #[arg(long = "database-backend", value_name = "BACKEND")]
    pub database_backend: Option<String>,

    /// Override the Cloud Storage bucket name.
    #[arg(long = "storage-bucket", value_name = "BUCKET")]
    pub storage_bucket: Option<String>,

    /// Override the Pub/Sub project identifier.
    #[arg(long = "pubsub-project", value_name = "PROJECT")]
    pub pubsub_project: Option<String>,
}
