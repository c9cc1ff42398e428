//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "vignette";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 4;
const DEFAULT_STORAGE_ROOT: &str = "wwwroot";
const DEFAULT_THUMBNAIL_DIR: &str = "temp/thumbnails";
const DEFAULT_LARGE_DIR: &str = "temp/large";
const DEFAULT_BACKFILL_STARTUP_DELAY_SECS: u64 = 30;
const DEFAULT_BACKFILL_INTERVAL_SECS: u64 = 60;
const DEFAULT_BACKFILL_BATCH_SIZE: u32 = 5;
const DEFAULT_SYNC_INTERVAL_MINUTES: u64 = 60;
const DEFAULT_SYNC_RETRY_MINUTES: u64 = 5;
const DEFAULT_SYNC_EVENT_TYPE: &str = "sync-derived-media";
const DEFAULT_SYNC_SOURCE: &str = "vignette";

/// Command-line arguments for the vignette binary.
#[derive(Debug, Parser)]
#[command(name = "vignette", version, about = "Media thumbnail pipeline")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "VIGNETTE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the background backfill worker and sync dispatcher.
    Serve(Box<ServeArgs>),
    /// Produce missing derived variants on demand.
    #[command(name = "regenerate-thumbnails")]
    RegenerateThumbnails(RegenerateArgs),
    /// Report variant completeness per image item.
    #[command(name = "list-media")]
    ListMedia(ListMediaArgs),
    /// Reconcile derived-file storage against the database.
    #[command(name = "cleanup-thumbnails")]
    CleanupThumbnails(CleanupArgs),
}

/// Overrides shared by every subcommand.
#[derive(Debug, Args, Default, Clone)]
pub struct CommonOverrides {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the storage root directory.
    #[arg(long = "storage-root", value_name = "PATH")]
    pub storage_root: Option<PathBuf>,

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
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub common: CommonOverrides,

    /// Override the backfill startup delay.
    #[arg(long = "backfill-startup-delay-seconds", value_name = "SECONDS")]
    pub backfill_startup_delay_seconds: Option<u64>,

    /// Override the backfill tick interval.
    #[arg(long = "backfill-interval-seconds", value_name = "SECONDS")]
    pub backfill_interval_seconds: Option<u64>,

    /// Override the per-tick item budget.
    #[arg(long = "backfill-batch-size", value_name = "COUNT")]
    pub backfill_batch_size: Option<u32>,

    /// Override the sync dispatcher cadence.
    #[arg(long = "sync-interval-minutes", value_name = "MINUTES")]
    pub sync_interval_minutes: Option<u64>,

    /// Override the shortened cadence used after a failed dispatch.
    #[arg(long = "sync-retry-minutes", value_name = "MINUTES")]
    pub sync_retry_minutes: Option<u64>,

    /// Override the automation API endpoint for sync dispatch.
    #[arg(long = "sync-endpoint", value_name = "URL")]
    pub sync_endpoint: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RegenerateArgs {
    #[command(flatten)]
    pub common: CommonOverrides,

    /// Reprocess items even when all variants exist, overwriting dimensions.
    #[arg(long, short = 'f')]
    pub force: bool,

    /// Restrict processing to a single media item.
    #[arg(long, value_name = "ID")]
    pub id: Option<i64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ListMediaArgs {
    #[command(flatten)]
    pub common: CommonOverrides,

    /// Include items whose variant set is already complete.
    #[arg(long, short = 'a')]
    pub all: bool,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CleanupArgs {
    #[command(flatten)]
    pub common: CommonOverrides,

    /// List orphaned files without deleting anything.
    #[arg(long, short = 'd')]
    pub dry_run: bool,
}

impl Command {
    fn common_overrides(&self) -> &CommonOverrides {
        match self {
            Command::Serve(args) => &args.common,
            Command::RegenerateThumbnails(args) => &args.common,
            Command::ListMedia(args) => &args.common,
            Command::CleanupThumbnails(args) => &args.common,
        }
    }
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub storage: StorageSettings,
    pub backfill: BackfillSettings,
    pub sync: SyncSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Directory all public URLs are rooted under. Permanent originals live
    /// beneath it at whatever path their stored URL names.
    pub root: PathBuf,
    /// Temporary thumbnail output, relative to the root.
    pub thumbnail_dir: PathBuf,
    /// Temporary large-variant output, relative to the root.
    pub large_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct BackfillSettings {
    pub startup_delay: Duration,
    pub interval: Duration,
    pub batch_size: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub interval: Duration,
    pub retry_interval: Duration,
    /// The dispatcher is disabled while endpoint or token are unset.
    pub endpoint: Option<Url>,
    pub token: Option<String>,
    pub event_type: String,
    pub source: String,
}

impl SyncSettings {
    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some() && self.token.is_some()
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("VIGNETTE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    if let Some(command) = cli.command.as_ref() {
        raw.apply_common_overrides(command.common_overrides());
        if let Command::Serve(args) = command {
            raw.apply_serve_overrides(args);
        }
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    storage: RawStorageSettings,
    backfill: RawBackfillSettings,
    sync: RawSyncSettings,
}

impl RawSettings {
    fn apply_common_overrides(&mut self, overrides: &CommonOverrides) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(root) = overrides.storage_root.as_ref() {
            self.storage.root = Some(root.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_serve_overrides(&mut self, args: &ServeArgs) {
        if let Some(seconds) = args.backfill_startup_delay_seconds {
            self.backfill.startup_delay_seconds = Some(seconds);
        }
        if let Some(seconds) = args.backfill_interval_seconds {
            self.backfill.interval_seconds = Some(seconds);
        }
        if let Some(count) = args.backfill_batch_size {
            self.backfill.batch_size = Some(count);
        }
        if let Some(minutes) = args.sync_interval_minutes {
            self.sync.interval_minutes = Some(minutes);
        }
        if let Some(minutes) = args.sync_retry_minutes {
            self.sync.retry_minutes = Some(minutes);
        }
        if let Some(endpoint) = args.sync_endpoint.as_ref() {
            self.sync.endpoint = Some(endpoint.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            storage,
            backfill,
            sync,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            storage: build_storage_settings(storage)?,
            backfill: build_backfill_settings(backfill)?,
            sync: build_sync_settings(sync)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let root = storage
        .root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_ROOT));
    if root.as_os_str().is_empty() {
        return Err(LoadError::invalid("storage.root", "path must not be empty"));
    }

    let thumbnail_dir = relative_dir(
        storage.thumbnail_dir,
        DEFAULT_THUMBNAIL_DIR,
        "storage.thumbnail_dir",
    )?;
    let large_dir = relative_dir(storage.large_dir, DEFAULT_LARGE_DIR, "storage.large_dir")?;

    Ok(StorageSettings {
        root,
        thumbnail_dir,
        large_dir,
    })
}

fn relative_dir(
    value: Option<PathBuf>,
    default: &str,
    key: &'static str,
) -> Result<PathBuf, LoadError> {
    let dir = value.unwrap_or_else(|| PathBuf::from(default));
    if dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(key, "path must not be empty"));
    }
    if dir.is_absolute() {
        return Err(LoadError::invalid(
            key,
            "path must be relative to the storage root",
        ));
    }
    Ok(dir)
}

fn build_backfill_settings(backfill: RawBackfillSettings) -> Result<BackfillSettings, LoadError> {
    let startup_delay = Duration::from_secs(
        backfill
            .startup_delay_seconds
            .unwrap_or(DEFAULT_BACKFILL_STARTUP_DELAY_SECS),
    );

    let interval_seconds = backfill
        .interval_seconds
        .unwrap_or(DEFAULT_BACKFILL_INTERVAL_SECS);
    if interval_seconds == 0 {
        return Err(LoadError::invalid(
            "backfill.interval_seconds",
            "must be greater than zero",
        ));
    }

    let batch_size = non_zero_u32(
        backfill
            .batch_size
            .unwrap_or(DEFAULT_BACKFILL_BATCH_SIZE)
            .into(),
        "backfill.batch_size",
    )?;

    Ok(BackfillSettings {
        startup_delay,
        interval: Duration::from_secs(interval_seconds),
        batch_size,
    })
}

fn build_sync_settings(sync: RawSyncSettings) -> Result<SyncSettings, LoadError> {
    let interval_minutes = sync.interval_minutes.unwrap_or(DEFAULT_SYNC_INTERVAL_MINUTES);
    if interval_minutes == 0 {
        return Err(LoadError::invalid(
            "sync.interval_minutes",
            "must be greater than zero",
        ));
    }

    let retry_minutes = sync.retry_minutes.unwrap_or(DEFAULT_SYNC_RETRY_MINUTES);
    if retry_minutes == 0 {
        return Err(LoadError::invalid(
            "sync.retry_minutes",
            "must be greater than zero",
        ));
    }

    let endpoint = sync
        .endpoint
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            Url::parse(value)
                .map_err(|err| LoadError::invalid("sync.endpoint", format!("invalid URL: {err}")))
        })
        .transpose()?;

    let token = sync.token.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let event_type = sync
        .event_type
        .unwrap_or_else(|| DEFAULT_SYNC_EVENT_TYPE.to_string());
    if event_type.is_empty() {
        return Err(LoadError::invalid("sync.event_type", "must not be empty"));
    }

    let source = sync.source.unwrap_or_else(|| DEFAULT_SYNC_SOURCE.to_string());
    if source.is_empty() {
        return Err(LoadError::invalid("sync.source", "must not be empty"));
    }

    Ok(SyncSettings {
        interval: Duration::from_secs(interval_minutes * 60),
        retry_interval: Duration::from_secs(retry_minutes * 60),
        endpoint,
        token,
        event_type,
        source,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    root: Option<PathBuf>,
    thumbnail_dir: Option<PathBuf>,
    large_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBackfillSettings {
    startup_delay_seconds: Option<u64>,
    interval_seconds: Option<u64>,
    batch_size: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSyncSettings {
    interval_minutes: Option<u64>,
    retry_minutes: Option<u64>,
    endpoint: Option<String>,
    token: Option<String>,
    event_type: Option<String>,
    source: Option<String>,
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_cadences() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
        assert_eq!(settings.backfill.startup_delay, Duration::from_secs(30));
        assert_eq!(settings.backfill.interval, Duration::from_secs(60));
        assert_eq!(settings.backfill.batch_size.get(), 5);
        assert_eq!(settings.sync.interval, Duration::from_secs(3600));
        assert_eq!(settings.sync.retry_interval, Duration::from_secs(300));
        assert!(!settings.sync.is_configured());
    }

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.logging.level = Some("info".to_string());
        raw.database.url = Some("postgres://file".to_string());

        let overrides = CommonOverrides {
            database_url: Some("postgres://cli".to_string()),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };

        raw.apply_common_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.database.url.as_deref(), Some("postgres://cli"));
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    }

    #[test]
    fn serve_overrides_adjust_cadences() {
        let mut raw = RawSettings::default();
        let args = ServeArgs {
            backfill_interval_seconds: Some(5),
            sync_retry_minutes: Some(1),
            ..Default::default()
        };

        raw.apply_serve_overrides(&args);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.backfill.interval, Duration::from_secs(5));
        assert_eq!(settings.sync.retry_interval, Duration::from_secs(60));
    }

    #[test]
    fn absolute_derived_dirs_are_rejected() {
        let mut raw = RawSettings::default();
        raw.storage.thumbnail_dir = Some(PathBuf::from("/var/tmp/thumbs"));
        let err = Settings::from_raw(raw).expect_err("must reject absolute dir");
        assert!(matches!(err, LoadError::Invalid { key, .. } if key == "storage.thumbnail_dir"));
    }

    #[test]
    fn blank_sync_endpoint_leaves_dispatcher_unconfigured() {
        let mut raw = RawSettings::default();
        raw.sync.endpoint = Some("   ".to_string());
        raw.sync.token = Some("tok".to_string());
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert!(settings.sync.endpoint.is_none());
        assert!(!settings.sync.is_configured());
    }

    #[test]
    fn parse_regenerate_arguments() {
        let args = CliArgs::parse_from([
            "vignette",
            "regenerate-thumbnails",
            "--force",
            "--id",
            "42",
            "--database-url",
            "postgres://example",
        ]);

        match args.command.expect("regenerate command") {
            Command::RegenerateThumbnails(regen) => {
                assert!(regen.force);
                assert_eq!(regen.id, Some(42));
                assert_eq!(
                    regen.common.database_url.as_deref(),
                    Some("postgres://example")
                );
            }
            _ => panic!("wrong command parsed"),
        }
    }

    #[test]
    fn parse_list_media_short_flag() {
        let args = CliArgs::parse_from(["vignette", "list-media", "-a"]);
        match args.command.expect("list command") {
            Command::ListMedia(list) => assert!(list.all),
            _ => panic!("wrong command parsed"),
        }
    }

    #[test]
    fn parse_cleanup_dry_run() {
        let args = CliArgs::parse_from(["vignette", "cleanup-thumbnails", "--dry-run"]);
        match args.command.expect("cleanup command") {
            Command::CleanupThumbnails(cleanup) => assert!(cleanup.dry_run),
            _ => panic!("wrong command parsed"),
        }
    }

    #[test]
    fn bare_invocation_defaults_to_serve() {
        let args = CliArgs::parse_from(["vignette"]);
        assert!(args.command.is_none());
    }

    #[test]
    fn unknown_command_fails_to_parse() {
        assert!(CliArgs::try_parse_from(["vignette", "frobnicate"]).is_err());
    }
}
