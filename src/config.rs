//! Configuration module for nice-loadtest.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::schedule::{LoadPhase, LoadSchedule, ScheduleError};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "nice-loadtest")]
#[command(author = "nice-loadtest authors")]
#[command(version = "0.1.0")]
#[command(about = "Load generator and diagnostic client for the Nice TCP protocol", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Number of runtime worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long, global = true)]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Drive simulated users against a Nice endpoint following the load schedule
    Run(RunArgs),
    /// Send one diagnostic request and print the response
    Probe(ProbeArgs),
    /// Serve delayed mock responses, standing in for the Nice backend
    Mock(MockArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Target host
    #[arg(long)]
    pub host: Option<String>,

    /// NiceProxy server port
    #[arg(long)]
    pub nice_port: Option<u16>,

    /// Per-operation socket timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Hold this many users instead of following the schedule
    #[arg(short = 'u', long, requires = "run_time")]
    pub users: Option<usize>,

    /// Users started per second with --users
    #[arg(short = 'r', long, requires = "users")]
    pub spawn_rate: Option<f64>,

    /// Test length in seconds with --users
    #[arg(short = 't', long, requires = "users")]
    pub run_time: Option<u64>,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Target host
    #[arg(default_value = "localhost")]
    pub host: String,

    /// Target port
    #[arg(default_value_t = DEFAULT_NICE_PORT)]
    pub port: u16,
}

#[derive(Args, Debug)]
pub struct MockArgs {
    /// Address to bind to (e.g., 0.0.0.0:9000)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Concurrent sessions before new connections are refused
    #[arg(long)]
    pub max_sessions: Option<usize>,
}

pub const DEFAULT_NICE_PORT: u16 = 21003;

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub load: LoadToml,
    #[serde(default)]
    pub mock: MockToml,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Endpoint under test
#[derive(Debug, Deserialize)]
pub struct TargetConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Per-operation socket timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// One `[[load.stages]]` entry
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StageToml {
    /// Seconds from test start at which the stage ends
    pub duration: u64,
    pub users: usize,
    pub spawn_rate: f64,
}

/// Load driver settings
#[derive(Debug, Deserialize)]
pub struct LoadToml {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_min_wait_ms")]
    pub min_wait_ms: u64,
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
    /// Custom schedule; the built-in one is used when absent
    #[serde(default)]
    pub stages: Vec<StageToml>,
}

impl Default for LoadToml {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            min_wait_ms: default_min_wait_ms(),
            max_wait_ms: default_max_wait_ms(),
            report_interval_secs: default_report_interval_secs(),
            stages: Vec::new(),
        }
    }
}

/// Mock backend settings
#[derive(Debug, Deserialize)]
pub struct MockToml {
    #[serde(default = "default_mock_listen")]
    pub listen: String,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_min_response_size")]
    pub min_response_size: usize,
    #[serde(default = "default_max_response_size")]
    pub max_response_size: usize,
}

impl Default for MockToml {
    fn default() -> Self {
        Self {
            listen: default_mock_listen(),
            max_sessions: default_max_sessions(),
            read_timeout_ms: default_read_timeout_ms(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            min_response_size: default_min_response_size(),
            max_response_size: default_max_response_size(),
        }
    }
}

/// Runtime configuration
#[derive(Debug, Deserialize, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads
    pub workers: Option<usize>,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_NICE_PORT
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_min_wait_ms() -> u64 {
    10
}

fn default_max_wait_ms() -> u64 {
    50
}

fn default_report_interval_secs() -> u64 {
    5
}

fn default_mock_listen() -> String {
    "0.0.0.0:9000".to_string()
}

fn default_max_sessions() -> usize {
    100
}

fn default_read_timeout_ms() -> u64 {
    30_000
}

fn default_min_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    2000
}

fn default_min_response_size() -> usize {
    10 * 1024 // 10 KB
}

fn default_max_response_size() -> usize {
    14 * 1024 // 14 KB
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolved settings for `run`
#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
    pub schedule: LoadSchedule,
    pub tick_interval: Duration,
    pub min_wait: Duration,
    pub max_wait: Duration,
    pub report_interval: Duration,
}

/// Resolved settings for `probe`
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

/// Resolved settings for `mock`
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub listen: String,
    pub max_sessions: usize,
    pub read_timeout: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub min_response_size: usize,
    pub max_response_size: usize,
}

/// What the binary was asked to do
#[derive(Debug, Clone)]
pub enum Mode {
    Run(LoadConfig),
    Probe(ProbeConfig),
    Mock(MockConfig),
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub workers: Option<usize>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let workers = cli.workers.or(toml_config.runtime.workers);
        if workers == Some(0) {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }

        let mode = match cli.command {
            Command::Run(args) => Mode::Run(load_config(args, &toml_config)?),
            Command::Probe(args) => Mode::Probe(ProbeConfig {
                host: args.host,
                port: args.port,
                timeout: Duration::from_millis(toml_config.target.timeout_ms),
            }),
            Command::Mock(args) => Mode::Mock(mock_config(args, &toml_config.mock)?),
        };

        Ok(Config {
            mode,
            workers,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

fn load_config(args: RunArgs, toml_config: &TomlConfig) -> Result<LoadConfig, ConfigError> {
    let load = &toml_config.load;

    let schedule = if let (Some(users), Some(run_time)) = (args.users, args.run_time) {
        LoadSchedule::constant(
            users,
            args.spawn_rate.unwrap_or(1.0),
            Duration::from_secs(run_time),
        )?
    } else if load.stages.is_empty() {
        LoadSchedule::nice_default()
    } else {
        LoadSchedule::new(
            load.stages
                .iter()
                .map(|stage| LoadPhase::new(stage.duration, stage.users, stage.spawn_rate))
                .collect(),
        )?
    };

    if load.min_wait_ms > load.max_wait_ms {
        return Err(ConfigError::Invalid(format!(
            "min_wait_ms ({}) exceeds max_wait_ms ({})",
            load.min_wait_ms, load.max_wait_ms
        )));
    }
    if load.tick_interval_ms == 0 || load.report_interval_secs == 0 {
        return Err(ConfigError::Invalid(
            "tick_interval_ms and report_interval_secs must be positive".to_string(),
        ));
    }

    Ok(LoadConfig {
        host: args.host.unwrap_or_else(|| toml_config.target.host.clone()),
        port: args.nice_port.unwrap_or(toml_config.target.port),
        timeout: Duration::from_millis(args.timeout_ms.unwrap_or(toml_config.target.timeout_ms)),
        schedule,
        tick_interval: Duration::from_millis(load.tick_interval_ms),
        min_wait: Duration::from_millis(load.min_wait_ms),
        max_wait: Duration::from_millis(load.max_wait_ms),
        report_interval: Duration::from_secs(load.report_interval_secs),
    })
}

fn mock_config(args: MockArgs, mock: &MockToml) -> Result<MockConfig, ConfigError> {
    if mock.min_delay_ms > mock.max_delay_ms || mock.min_response_size > mock.max_response_size {
        return Err(ConfigError::Invalid(
            "mock delay and response size ranges must have min <= max".to_string(),
        ));
    }

    Ok(MockConfig {
        listen: args.listen.unwrap_or_else(|| mock.listen.clone()),
        max_sessions: args.max_sessions.unwrap_or(mock.max_sessions),
        read_timeout: Duration::from_millis(mock.read_timeout_ms),
        min_delay: Duration::from_millis(mock.min_delay_ms),
        max_delay: Duration::from_millis(mock.max_delay_ms),
        min_response_size: mock.min_response_size,
        max_response_size: mock.max_response_size,
    })
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {err}", path = .0.display(), err = .1)]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file '{path}': {err}", path = .0.display(), err = .1)]
    TomlParse(PathBuf, toml::de::Error),
    #[error("Invalid load schedule: {0}")]
    Schedule(#[from] ScheduleError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.target.host, "localhost");
        assert_eq!(config.target.port, 21003);
        assert_eq!(config.target.timeout_ms, 30_000);
        assert_eq!(config.load.min_wait_ms, 10);
        assert_eq!(config.load.max_wait_ms, 50);
        assert_eq!(config.mock.max_sessions, 100);
        assert!(config.load.stages.is_empty());
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [target]
            host = "proxy.internal"
            port = 31003
            timeout_ms = 5000

            [load]
            tick_interval_ms = 500

            [[load.stages]]
            duration = 30
            users = 10
            spawn_rate = 1

            [[load.stages]]
            duration = 90
            users = 40
            spawn_rate = 2.5

            [runtime]
            workers = 4

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.target.host, "proxy.internal");
        assert_eq!(config.target.port, 31003);
        assert_eq!(config.load.tick_interval_ms, 500);
        assert_eq!(config.load.stages.len(), 2);
        assert_eq!(config.load.stages[1].spawn_rate, 2.5);
        assert_eq!(config.runtime.workers, Some(4));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_run_defaults() {
        let config = Config::merge(parse(&["nice-loadtest", "run"]), TomlConfig::default()).unwrap();
        let Mode::Run(load) = config.mode else {
            panic!("expected run mode");
        };
        assert_eq!(load.host, "localhost");
        assert_eq!(load.port, 21003);
        assert_eq!(load.timeout, Duration::from_secs(30));
        assert_eq!(load.schedule, LoadSchedule::nice_default());
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [target]
            host = "from-file"
            port = 1111

            [logging]
            level = "warn"
            "#,
        )
        .unwrap();

        let cli = parse(&[
            "nice-loadtest",
            "--log-level",
            "debug",
            "run",
            "--host",
            "from-cli",
            "--nice-port",
            "2222",
        ]);
        let config = Config::merge(cli, toml_config).unwrap();
        let Mode::Run(load) = config.mode else {
            panic!("expected run mode");
        };
        assert_eq!(load.host, "from-cli");
        assert_eq!(load.port, 2222);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_toml_stages_become_schedule() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [[load.stages]]
            duration = 10
            users = 3
            spawn_rate = 1
            "#,
        )
        .unwrap();
        let config = Config::merge(parse(&["nice-loadtest", "run"]), toml_config).unwrap();
        let Mode::Run(load) = config.mode else {
            panic!("expected run mode");
        };
        assert_eq!(load.schedule.phases(), &[LoadPhase::new(10, 3, 1.0)]);
    }

    #[test]
    fn test_constant_users_override() {
        let cli = parse(&[
            "nice-loadtest",
            "run",
            "--users",
            "25",
            "--spawn-rate",
            "5",
            "--run-time",
            "120",
        ]);
        let config = Config::merge(cli, TomlConfig::default()).unwrap();
        let Mode::Run(load) = config.mode else {
            panic!("expected run mode");
        };
        assert_eq!(load.schedule.phases(), &[LoadPhase::new(120, 25, 5.0)]);
    }

    #[test]
    fn test_unordered_stages_rejected() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [[load.stages]]
            duration = 60
            users = 3
            spawn_rate = 1

            [[load.stages]]
            duration = 30
            users = 5
            spawn_rate = 1
            "#,
        )
        .unwrap();
        let err = Config::merge(parse(&["nice-loadtest", "run"]), toml_config).unwrap_err();
        assert!(matches!(err, ConfigError::Schedule(_)));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = Config::merge(
            parse(&["nice-loadtest", "--workers", "0", "probe"]),
            TomlConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let toml_config: TomlConfig = toml::from_str("[runtime]\nworkers = 0\n").unwrap();
        let err = Config::merge(parse(&["nice-loadtest", "probe"]), toml_config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_probe_positionals() {
        let config = Config::merge(parse(&["nice-loadtest", "probe"]), TomlConfig::default()).unwrap();
        let Mode::Probe(probe) = config.mode else {
            panic!("expected probe mode");
        };
        assert_eq!(probe.host, "localhost");
        assert_eq!(probe.port, 21003);

        let config = Config::merge(
            parse(&["nice-loadtest", "probe", "10.0.0.5", "9000"]),
            TomlConfig::default(),
        )
        .unwrap();
        let Mode::Probe(probe) = config.mode else {
            panic!("expected probe mode");
        };
        assert_eq!(probe.host, "10.0.0.5");
        assert_eq!(probe.port, 9000);
    }

    #[test]
    fn test_mock_defaults() {
        let config = Config::merge(
            parse(&["nice-loadtest", "mock", "--max-sessions", "7"]),
            TomlConfig::default(),
        )
        .unwrap();
        let Mode::Mock(mock) = config.mode else {
            panic!("expected mock mode");
        };
        assert_eq!(mock.listen, "0.0.0.0:9000");
        assert_eq!(mock.max_sessions, 7);
        assert_eq!(mock.min_delay, Duration::from_millis(500));
        assert_eq!(mock.max_response_size, 14 * 1024);
    }
}
