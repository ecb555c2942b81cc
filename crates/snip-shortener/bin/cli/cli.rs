use clap::{Parser, Subcommand, ValueEnum};
use snip_core::{OwnerId, ShortCode};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const STORAGE_BACKEND_ENV: &str = "SNIP_STORAGE_BACKEND";
pub const FILE_STORAGE_PATH_ENV: &str = "SNIP_FILE_STORAGE_PATH";
pub const DATABASE_DSN_ENV: &str = "SNIP_DATABASE_DSN";
pub const BASE_URL_ENV: &str = "SNIP_BASE_URL";
pub const DUPLICATE_DETECTION_ENV: &str = "SNIP_DUPLICATE_DETECTION";
pub const OPERATION_TIMEOUT_ENV: &str = "SNIP_OPERATION_TIMEOUT_MS";
pub const LOG_FORMAT_ENV: &str = "SNIP_LOG_FORMAT";

pub const DEFAULT_FILE_STORAGE_PATH: &str = "/tmp/short-url-db.json";
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackendArg {
    #[value(name = "in-memory")]
    InMemory,
    #[value(name = "file")]
    File,
    #[value(name = "postgres")]
    Postgres,
}

impl Display for StorageBackendArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackendArg::InMemory => write!(f, "in-memory"),
            StorageBackendArg::File => write!(f, "file"),
            StorageBackendArg::Postgres => write!(f, "postgres"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "snip", about = "Shorten, resolve and manage links")]
pub struct CLI {
    #[arg(
        long,
        env = STORAGE_BACKEND_ENV,
        value_enum,
        default_value_t = StorageBackendArg::File
    )]
    pub storage: StorageBackendArg,

    #[arg(long, env = FILE_STORAGE_PATH_ENV, default_value = DEFAULT_FILE_STORAGE_PATH)]
    pub file_storage_path: PathBuf,

    #[arg(long, env = DATABASE_DSN_ENV, required_if_eq("storage", "postgres"))]
    pub database_dsn: Option<String>,

    #[arg(long, env = BASE_URL_ENV, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Reject destinations that are already stored (in-memory and file backends).
    #[arg(
        long,
        env = DUPLICATE_DETECTION_ENV,
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub duplicate_detection: bool,

    /// Per-operation storage deadline in milliseconds.
    #[arg(long, env = OPERATION_TIMEOUT_ENV)]
    pub operation_timeout_ms: Option<u64>,

    #[arg(long, env = LOG_FORMAT_ENV, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a short link.
    Shorten {
        url: String,
        /// Owner of the link; a fresh id is generated when omitted.
        #[arg(long)]
        owner: Option<OwnerId>,
    },
    /// Create short links for several URLs at once.
    Batch {
        #[arg(required = true)]
        urls: Vec<String>,
        #[arg(long)]
        owner: Option<OwnerId>,
    },
    /// Print the destination of a short code.
    Resolve { code: ShortCode },
    /// List the live links of an owner.
    List {
        #[arg(long)]
        owner: OwnerId,
    },
    /// Soft-delete links owned by an owner.
    Delete {
        #[arg(required = true)]
        codes: Vec<ShortCode>,
        #[arg(long)]
        owner: OwnerId,
    },
    /// Print the number of stored links and distinct owners.
    Stats,
}
