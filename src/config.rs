use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Semaphore;
use crate::error::{AppError, Result};

/// How a validated scrape request is served.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrapeMode {
    /// Spawn the external scraper and relay its output.
    Subprocess,
    /// Acknowledge the tags without running anything.
    Stub,
}

impl ScrapeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrapeMode::Subprocess => "subprocess",
            ScrapeMode::Stub => "stub",
        }
    }
}

impl fmt::Display for ScrapeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScrapeMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "subprocess" => Ok(ScrapeMode::Subprocess),
            "stub" => Ok(ScrapeMode::Stub),
            other => Err(AppError::ConfigError(format!(
                "Invalid SCRAPE_MODE '{}': expected 'subprocess' or 'stub'",
                other
            ))),
        }
    }
}

/// Everything needed to start the external scraper.
#[derive(Clone, Debug)]
pub struct ScraperConfig {
    pub program: String,
    pub leading_args: Vec<String>,
    pub tags_flag: String,
    pub working_dir: PathBuf,
    pub timeout: Option<Duration>,
    pub max_concurrent: Option<usize>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        ScraperConfig {
            program: "python3".to_string(),
            leading_args: vec!["B2Bscraper.py".to_string()],
            tags_flag: "--tags".to_string(),
            working_dir: PathBuf::from("."),
            timeout: None,
            max_concurrent: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub server_addr: SocketAddr,
    pub mode: ScrapeMode,
    pub cors_enabled: bool,
    pub scraper: ScraperConfig,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load environment variables from .env file if it exists
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mode = lookup("SCRAPE_MODE")
            .ok_or_else(|| AppError::ConfigError("SCRAPE_MODE must be set to 'subprocess' or 'stub'".to_string()))?
            .parse::<ScrapeMode>()?;

        // Load server configuration with defaults
        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = lookup("PORT").unwrap_or_else(|| "3000".to_string());
        let port = port.parse::<u16>().map_err(|e| AppError::ConfigError(format!("Invalid port: {}", e)))?;
        let ip = IpAddr::from_str(&host).map_err(|e| AppError::ConfigError(format!("Invalid host address: {}", e)))?;

        let cors_enabled = match lookup("CORS_ENABLED") {
            Some(raw) => parse_bool("CORS_ENABLED", &raw)?,
            None => false,
        };

        let defaults = ScraperConfig::default();

        let leading_args = match lookup("SCRAPER_ARGS") {
            Some(raw) => raw.split_whitespace().map(str::to_string).collect(),
            None => defaults.leading_args,
        };

        let timeout = lookup("SCRAPER_TIMEOUT_SECS")
            .map(|raw| {
                raw.trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|e| AppError::ConfigError(format!("Invalid SCRAPER_TIMEOUT_SECS: {}", e)))
            })
            .transpose()?;

        let max_concurrent = lookup("SCRAPER_MAX_CONCURRENT")
            .map(|raw| match raw.trim().parse::<usize>() {
                Ok(0) => Err(AppError::ConfigError("SCRAPER_MAX_CONCURRENT must be at least 1".to_string())),
                Ok(n) if n > Semaphore::MAX_PERMITS => Err(AppError::ConfigError(format!(
                    "SCRAPER_MAX_CONCURRENT must be at most {}",
                    Semaphore::MAX_PERMITS
                ))),
                Ok(n) => Ok(n),
                Err(e) => Err(AppError::ConfigError(format!("Invalid SCRAPER_MAX_CONCURRENT: {}", e))),
            })
            .transpose()?;

        let scraper = ScraperConfig {
            program: lookup("SCRAPER_PROGRAM").unwrap_or(defaults.program),
            leading_args,
            tags_flag: lookup("SCRAPER_TAGS_FLAG").unwrap_or(defaults.tags_flag),
            working_dir: lookup("SCRAPER_WORKDIR").map(PathBuf::from).unwrap_or(defaults.working_dir),
            timeout,
            max_concurrent,
        };

        Ok(Config {
            server_addr: SocketAddr::new(ip, port),
            mode,
            cors_enabled,
            scraper,
        })
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(AppError::ConfigError(format!("Invalid {}: '{}'", key, other))),
    }
}
