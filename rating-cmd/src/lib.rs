//! Command implementations for the rating CLI.
//!
//! Every command works against a SQLite rating database: `load` fills it
//! from container files, the others open one rating set from it and query it.

use std::sync::Arc;

use clap::{Args, Subcommand};
use rating_core::{LoadMode, RatingSet};
use rating_db::Database;
use rating_utils::times::parse_time;

pub mod batch;
pub mod load;
pub mod query;

/// Which rating set to open, and how.
#[derive(Args, Debug, Clone)]
pub struct SetArgs {
    /// Path to the SQLite rating database
    #[arg(short = 'd', long)]
    pub db: String,

    /// Office that owns the rating specification
    #[arg(short = 'o', long)]
    pub office: String,

    /// Rating specification id (location.template.version)
    #[arg(short = 's', long)]
    pub spec: String,

    /// Only use ratings created before this time (RFC 3339, "YYYY-MM-DD HH:MM:SS" or "YYYY-MM-DD")
    #[arg(long)]
    pub as_of: Option<String>,

    /// Load rating headers only and fetch tables when a query needs them
    #[arg(long)]
    pub lazy: bool,
}

impl SetArgs {
    /// Open the database and read the rating set from it.
    pub fn open(&self) -> anyhow::Result<RatingSet> {
        let db = Database::open(&self.db)?;
        let as_of = self.as_of.as_deref().map(parse_time).transpose()?;
        let mode = if self.lazy { LoadMode::Lazy } else { LoadMode::Eager };
        Ok(RatingSet::from_store(Arc::new(db), &self.office, &self.spec, mode, as_of)?)
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Store a rating set container file (JSON, or gzip JSON ending in .gz)
    Load {
        /// Path to the SQLite rating database (created if missing)
        #[arg(short = 'd', long)]
        db: String,

        /// Container file to load
        #[arg(short = 'f', long)]
        file: String,

        /// Replace ratings already stored at the same effective dates
        #[arg(long)]
        overwrite: bool,

        /// Drop every stored rating of the specification first
        #[arg(long)]
        replace_base: bool,
    },

    /// List stored rating specifications as JSON
    Catalog {
        /// Path to the SQLite rating database
        #[arg(short = 'd', long)]
        db: String,
    },

    /// List the effective dates of a rating set
    Dates {
        #[command(flatten)]
        set: SetArgs,
    },

    /// Rate a CSV batch of `time,input...` rows
    Rate {
        #[command(flatten)]
        set: SetArgs,

        /// Input CSV (stdin when omitted)
        #[arg(short = 'i', long)]
        input: Option<String>,

        /// Output CSV (stdout when omitted)
        #[arg(short = 'w', long)]
        output: Option<String>,
    },

    /// Reverse-rate a CSV batch of `time,output` rows
    Reverse {
        #[command(flatten)]
        set: SetArgs,

        /// Input CSV (stdin when omitted)
        #[arg(short = 'i', long)]
        input: Option<String>,

        /// Output CSV (stdout when omitted)
        #[arg(short = 'w', long)]
        output: Option<String>,
    },

    /// Print the value ranges of the rating in effect at a time
    Extents {
        #[command(flatten)]
        set: SetArgs,

        /// Time to look up (now when omitted)
        #[arg(long)]
        at: Option<String>,
    },
}

pub fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Load {
            db,
            file,
            overwrite,
            replace_base,
        } => load::run_load(&db, &file, overwrite, replace_base),
        Command::Catalog { db } => load::run_catalog(&db),
        Command::Dates { set } => query::run_dates(&set),
        Command::Rate { set, input, output } => {
            batch::run_batch(&set, batch::Direction::Forward, input.as_deref(), output.as_deref())
        }
        Command::Reverse { set, input, output } => {
            batch::run_batch(&set, batch::Direction::Reverse, input.as_deref(), output.as_deref())
        }
        Command::Extents { set, at } => query::run_extents(&set, at.as_deref()),
    }
}
