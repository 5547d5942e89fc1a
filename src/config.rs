use homedir::my_home;
use serde::{Deserialize, Serialize};

use crate::storage::{BackendLocal, StorageManager};

const TASK_QUEUE_MAX_THREADS: u16 = 10;
const TASK_QUEUE_MAX_RETRIES: u8 = 2;

/// Hard timeout on a whole page fetch
const REQUEST_TIMEOUT_MS: u64 = 10_000;
/// Redirect hop cap before a fetch counts as failed
const MAX_REDIRECTS: usize = 10;

const USER_AGENT_DEFAULT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:124.0) Gecko/20100101 Firefox/124.0";

/// Policy and limits applied to every outbound page fetch
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScrapeConfig {
    #[serde(default = "request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "max_redirects")]
    pub max_redirects: usize,

    #[serde(default = "user_agent")]
    pub user_agent: String,

    /// URL schemes we are willing to fetch
    #[serde(default = "allowed_schemes")]
    pub allowed_schemes: Vec<String>,

    /// Hosts that are never fetched
    #[serde(default)]
    pub blocked_hosts: Vec<String>,

    /// Refuse to fetch hosts that resolve to private address space
    #[serde(default = "default_true")]
    pub block_private_ips: bool,

    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: REQUEST_TIMEOUT_MS,
            max_redirects: MAX_REDIRECTS,
            user_agent: USER_AGENT_DEFAULT.to_string(),
            allowed_schemes: allowed_schemes(),
            blocked_hosts: Vec::new(),
            block_private_ips: true,
            accept_invalid_certs: false,
        }
    }
}

fn request_timeout_ms() -> u64 {
    REQUEST_TIMEOUT_MS
}

fn max_redirects() -> usize {
    MAX_REDIRECTS
}

fn user_agent() -> String {
    USER_AGENT_DEFAULT.to_string()
}

fn allowed_schemes() -> Vec<String> {
    vec!["http".to_string(), "https".to_string()]
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Concurrency bound of the scrape worker pool
    #[serde(default = "task_queue_max_threads")]
    pub task_queue_max_threads: u16,

    /// Retry budget for persist failures; scrape failures are never retried
    #[serde(default = "task_queue_max_retries")]
    pub task_queue_max_retries: u8,

    #[serde(default)]
    pub scrape: ScrapeConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            task_queue_max_threads: TASK_QUEUE_MAX_THREADS,
            task_queue_max_retries: TASK_QUEUE_MAX_RETRIES,
            scrape: ScrapeConfig::default(),
            base_path: String::new(),
        }
    }
}

fn task_queue_max_threads() -> u16 {
    TASK_QUEUE_MAX_THREADS
}

fn task_queue_max_retries() -> u8 {
    TASK_QUEUE_MAX_RETRIES
}

impl Config {
    fn validate(&mut self) {
        if self.task_queue_max_threads == 0 {
            self.task_queue_max_threads = 1
        }

        if self.scrape.request_timeout_ms == 0 {
            self.scrape.request_timeout_ms = REQUEST_TIMEOUT_MS
        }

        if self.scrape.allowed_schemes.is_empty() {
            self.scrape.allowed_schemes = allowed_schemes()
        }
    }

    pub fn load_with(base_path: &str) -> anyhow::Result<Self> {
        let store = BackendLocal::new(base_path)?;

        // create new if it does not exist
        if !store.exists("config.yaml") {
            store.write(
                "config.yaml",
                serde_yml::to_string(&Self::default())?.as_bytes(),
            )?;
        }

        let config_str = String::from_utf8(store.read("config.yaml")?)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;

        config.base_path = base_path.to_string();

        config.validate();

        // resave in case the config grew new fields
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let store = BackendLocal::new(&self.base_path)?;

        let config_str = serde_yml::to_string(&self)?;
        store.write("config.yaml", config_str.as_bytes())?;

        Ok(())
    }
}

/// Base directory for config, the record store and the queue dump.
pub fn default_base_path() -> String {
    std::env::var("PREVIEWD_BASE_PATH").unwrap_or_else(|_| {
        format!(
            "{}/.local/share/previewd",
            my_home()
                .expect("couldnt find home dir")
                .expect("couldnt find home dir")
                .to_string_lossy()
        )
    })
}
