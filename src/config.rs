use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub scraper: ScraperConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub selectors: PathBuf,
    pub reference: PathBuf,
    pub ledger: PathBuf,
    pub output_dir: PathBuf,
    pub links_file: PathBuf,
    pub audit_log: PathBuf,
    pub snapshot_dir: PathBuf,
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    pub base_url: String,
    pub link_marker: String,
    pub user_agent: String,
    pub request_timeout: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub chrome_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub workers: usize,
    pub fetch_timeout: u64,
    pub default_limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_prefix: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig {
                selectors: PathBuf::from("data/selectors.json"),
                reference: PathBuf::from("data/reference.html"),
                ledger: PathBuf::from("data/used_links.txt"),
                output_dir: PathBuf::from("data/records"),
                links_file: PathBuf::from("data/product_links.txt"),
                audit_log: PathBuf::from("data/repair_audit.jsonl"),
                snapshot_dir: PathBuf::from("data/html"),
                log_dir: PathBuf::from("logs"),
            },
            scraper: ScraperConfig {
                base_url: "https://ozon.by".to_string(),
                link_marker: "/product/".to_string(),
                user_agent: "DriftHarvester/0.1".to_string(),
                request_timeout: 30,
                retry_attempts: 2,
                retry_delay_ms: 1000,
                chrome_path: None,
            },
            pipeline: PipelineConfig {
                workers: 1,
                fetch_timeout: 90,
                default_limit: None,
            },
            logging: LoggingConfig {
                level: "drift_harvester=info".to_string(),
                file_prefix: "harvester.log".to_string(),
            },
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default configuration
            .add_source(File::with_name("config/default").required(false))
            // Add environment-specific config
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local config (ignored by git)
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables with prefix "HARVEST_"
            .add_source(Environment::with_prefix("HARVEST").separator("__"))
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;

        // Add Chrome path from environment if not set
        if config.scraper.chrome_path.is_none() {
            config.scraper.chrome_path = env::var("CHROME_PATH").ok();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if Url::parse(&self.scraper.base_url).is_err() {
            return Err(ConfigError::Message("Invalid scraper.base_url format".into()));
        }

        if self.scraper.link_marker.trim().is_empty() {
            return Err(ConfigError::Message("scraper.link_marker must not be empty".into()));
        }

        if self.scraper.request_timeout == 0 {
            return Err(ConfigError::Message("scraper.request_timeout must be greater than 0".into()));
        }

        if self.pipeline.workers == 0 {
            return Err(ConfigError::Message("pipeline.workers must be greater than 0".into()));
        }

        if self.pipeline.fetch_timeout == 0 {
            return Err(ConfigError::Message("pipeline.fetch_timeout must be greater than 0".into()));
        }

        if self.pipeline.default_limit == Some(0) {
            return Err(ConfigError::Message("pipeline.default_limit must be greater than 0 when set".into()));
        }

        let paths = [
            ("paths.selectors", &self.paths.selectors),
            ("paths.reference", &self.paths.reference),
            ("paths.ledger", &self.paths.ledger),
            ("paths.output_dir", &self.paths.output_dir),
            ("paths.links_file", &self.paths.links_file),
            ("paths.audit_log", &self.paths.audit_log),
            ("paths.snapshot_dir", &self.paths.snapshot_dir),
            ("paths.log_dir", &self.paths.log_dir),
        ];
        for (name, path) in paths {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Message(format!("{} must not be empty", name)));
            }
        }

        Ok(())
    }
}
