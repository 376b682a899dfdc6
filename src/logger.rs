use log::LevelFilter;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::rolling_file::policy::compound::{
    CompoundPolicy, roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger,
};
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::{Path, PathBuf};

use crate::errors::DbError;

const ROLL_SIZE: u64 = 10 * 1024 * 1024;
const PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}";

/// Initializes the logging system from `log4rs.yaml` in the working directory.
/// A missing file leaves logging unconfigured.
pub fn init() -> Result<(), DbError> {
    init_file(Path::new("log4rs.yaml"))
}

/// Loads a log4rs YAML file. Absent files are skipped; unreadable or
/// malformed ones are a `DbError::Config`.
pub fn init_file(path: &Path) -> Result<(), DbError> {
    if !path.exists() {
        return Ok(());
    }
    log4rs::init_file(path, log4rs::config::Deserializers::default())
        .map_err(|e| DbError::Config(format!("{}: {e}", path.display())))
}

fn parse_level(level: Option<&str>) -> LevelFilter {
    match level.unwrap_or("info").to_ascii_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

fn rolling(base: &Path, name: &str, keep: u32) -> Result<RollingFileAppender, DbError> {
    let pattern = base.join(format!("{name}.{{}}.log"));
    let roller = FixedWindowRoller::builder()
        .build(&pattern.display().to_string(), keep)
        .map_err(|e| DbError::Config(format!("log roller {name}: {e}")))?;
    let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(ROLL_SIZE)), Box::new(roller));
    Ok(RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build(base.join(format!("{name}.log")), Box::new(policy))?)
}

/// Builds the logging config: `app.log` for everything, plus `query.log`
/// receiving the translated native queries (`snacktrack::query`, non-additive).
/// Both roll at 10 MiB and keep `retention` files (default 7).
///
/// # Errors
/// The log directory cannot be created or an appender cannot open its file.
pub fn build_config(dir: Option<&Path>, level: Option<&str>, retention: Option<usize>) -> Result<Config, DbError> {
    let base = match dir {
        Some(d) => d.to_path_buf(),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };
    std::fs::create_dir_all(&base)?;
    let keep = u32::try_from(retention.unwrap_or(7)).unwrap_or(u32::MAX);
    let lvl = parse_level(level);

    Config::builder()
        .appender(Appender::builder().build("app", Box::new(rolling(&base, "app", keep)?)))
        .appender(Appender::builder().build("query", Box::new(rolling(&base, "query", keep)?)))
        .logger(Logger::builder().appender("query").additive(false).build("snacktrack::query", lvl))
        .build(Root::builder().appender("app").build(lvl))
        .map_err(|e| DbError::Config(format!("logging: {e}")))
}

/// Configures logging globally for the process. A second call is ignored by
/// log4rs and reported as an error.
///
/// # Errors
/// See `build_config`; also fails when a logger is already installed.
pub fn configure_logging(dir: Option<&Path>, level: Option<&str>, retention: Option<usize>) -> Result<(), DbError> {
    let config = build_config(dir, level, retention)?;
    log4rs::init_config(config).map_err(|e| DbError::Config(format!("logging: {e}")))?;
    Ok(())
}

/// Configure logging from environment variables if present:
/// - SNACKTRACK_LOG_DIR
/// - SNACKTRACK_LOG_LEVEL
/// - SNACKTRACK_LOG_RETENTION
pub fn configure_from_env() -> Result<(), DbError> {
    let dir = std::env::var("SNACKTRACK_LOG_DIR").ok().map(PathBuf::from);
    let level = std::env::var("SNACKTRACK_LOG_LEVEL").ok();
    let retention = std::env::var("SNACKTRACK_LOG_RETENTION").ok().and_then(|s| s.parse::<usize>().ok());
    configure_logging(dir.as_deref(), level.as_deref(), retention)
}
