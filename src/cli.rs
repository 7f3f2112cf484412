//! Command-line surface.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::filter::LevelFilter;

/// Recovers previous versions of files, and files that have been deleted
/// but still remain on disk, from a single-disk pool.
///
/// The uber method scans every superblock that is still on disk but no
/// longer active, walking each preserved pool state for files. The brute
/// method scans unused sectors and attempts to parse orphaned file nodes
/// out of them. Recovered files are written to the destination with their
/// original access and modify times restored: named finds as
/// `<path>-<mtime>-uber`, anonymous finds as `<seq>-<mtime>-brute`.
#[derive(Debug, Parser)]
#[command(name = "zsalvage", version)]
pub struct Cli {
    /// Recovery method to run
    #[arg(value_enum, ignore_case = true)]
    pub method: Method,

    /// Path to the disk or image containing the pool
    pub disk: PathBuf,

    /// Location to save recovered files
    #[arg(short = 'd', long, default_value_os_t = default_destination())]
    pub destination: PathBuf,

    /// Hash the live file system first so current files are not reported
    /// as finds (default)
    #[arg(long = "cache", overrides_with = "no_cache")]
    cache: bool,

    /// Skip the live-file cache; every sector is eligible for scanning
    #[arg(long = "no-cache", overrides_with = "cache")]
    no_cache: bool,

    /// Logging level
    #[arg(
        short = 'v',
        long = "log-level",
        value_enum,
        ignore_case = true,
        default_value_t = LogLevel::Warn
    )]
    pub log_level: LogLevel,
}

impl Cli {
    /// Whether to build the live-file cache before recovery.
    pub fn cache_enabled(&self) -> bool {
        self.cache || !self.no_cache
    }
}

fn default_destination() -> PathBuf {
    std::env::temp_dir().join("zsalvage")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Method {
    /// Run uber then brute, with brute excluding uber's hits
    All,
    /// Scan unused sectors for orphaned file nodes
    Brute,
    /// Walk every preserved historical superblock
    Uber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_filter(self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}
