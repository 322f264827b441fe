use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::browser::TypingProfile;

pub const DEV_MODE_ENV: &str = "ARCHIVE_NODE_DEV";
pub const IDENTITY_ENV: &str = "ARCHIVE_NODE_IDENTITY";
pub const SECRET_ENV: &str = "ARCHIVE_NODE_SECRET";
pub const VERIFICATION_ENV: &str = "ARCHIVE_NODE_VERIFICATION";

const DEV_DATA_DIR: &str = "dev-data";
const DATABASE_FILE: &str = "archive-node.sqlite3";

/// Login material. Supplied once at startup and never mutated.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub identity: String,
    pub secret: String,
    pub verification: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .field("verification", &self.verification.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
            verification: None,
        }
    }

    pub fn with_verification(mut self, code: impl Into<String>) -> Self {
        self.verification = Some(code.into());
        self
    }

    pub fn from_env() -> Result<Self> {
        let identity = std::env::var(IDENTITY_ENV)
            .map_err(|_| anyhow!("{IDENTITY_ENV} is not set"))?;
        let secret =
            std::env::var(SECRET_ENV).map_err(|_| anyhow!("{SECRET_ENV} is not set"))?;
        let verification = std::env::var(VERIFICATION_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty());

        if identity.trim().is_empty() || secret.is_empty() {
            return Err(anyhow!("{IDENTITY_ENV} and {SECRET_ENV} must not be empty"));
        }

        Ok(Self {
            identity: identity.trim().to_string(),
            secret,
            verification,
        })
    }

    /// True when the identity is an email address rather than a handle, in
    /// which case the handle has to be read back from the platform.
    pub fn identity_is_email(&self) -> bool {
        let Some((local, domain)) = self.identity.split_once('@') else {
            return false;
        };
        let Some((name, tld)) = domain.rsplit_once('.') else {
            return false;
        };
        !local.is_empty()
            && !name.is_empty()
            && tld.len() >= 2
            && tld.chars().all(|c| c.is_ascii_alphabetic())
            && !self.identity.contains(char::is_whitespace)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub mobile: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrowserSettings {
    pub headless: bool,
    pub crawl_user_agent: String,
    pub audit_user_agent: String,
    pub crawl_viewport: Viewport,
    pub audit_viewport: Viewport,
    /// Relative to the data directory.
    pub crawl_profile_dir: PathBuf,
    pub audit_profile_dir: PathBuf,
    pub navigation_timeout_ms: u64,
    pub settle_delay_ms: u64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            crawl_user_agent: "Mozilla/5.0 (iPhone; CPU iPhone OS 14_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.0 Mobile/15E148 Safari/604.1".into(),
            audit_user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".into(),
            crawl_viewport: Viewport {
                width: 397,
                height: 812,
                mobile: true,
            },
            audit_viewport: Viewport {
                width: 1024,
                height: 4000,
                mobile: false,
            },
            crawl_profile_dir: PathBuf::from("browser-profile"),
            audit_profile_dir: PathBuf::from("browser-profile-audit"),
            navigation_timeout_ms: 60_000,
            settle_delay_ms: 3_000,
        }
    }
}

/// Bounds for the randomized gap between two interactive writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CooldownSettings {
    pub min_minutes: u64,
    pub max_minutes: u64,
}

impl Default for CooldownSettings {
    fn default() -> Self {
        Self {
            min_minutes: 25,
            max_minutes: 35,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeWindowSettings {
    pub min_runtime_minutes: u64,
    pub max_runtime_minutes: u64,
    pub min_gap_minutes: u64,
    pub max_gap_minutes: u64,
    /// How long after a scheduled stop the state is considered abandoned.
    pub grace_minutes: u64,
}

impl Default for RuntimeWindowSettings {
    fn default() -> Self {
        Self {
            min_runtime_minutes: 2 * 60,
            max_runtime_minutes: 4 * 60,
            min_gap_minutes: 4 * 60,
            max_gap_minutes: 12 * 60,
            grace_minutes: 6 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuditSettings {
    pub sample_size: usize,
    pub duplicate_threshold: usize,
    pub time_tolerance_secs: i64,
    pub fetch_attempts: u32,
    pub fetch_backoff_ms: u64,
    pub blob_file_name: String,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            sample_size: 1,
            duplicate_threshold: 10,
            time_tolerance_secs: 15 * 60,
            fetch_attempts: 3,
            fetch_backoff_ms: 3_000,
            blob_file_name: "dataList.json".into(),
        }
    }
}

/// Cost parameters for newly created commitments, and the most a peer's
/// commitment may demand before verification refuses to run it.
///
/// Verification uses the parameters embedded in the commitment string, so the
/// ceilings bound what a submitter can make an auditor spend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FingerprintSettings {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
    pub max_memory_kib: u32,
    pub max_iterations: u32,
    pub max_parallelism: u32,
}

impl Default for FingerprintSettings {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
            max_memory_kib: 4 * 19 * 1024,
            max_iterations: 8,
            max_parallelism: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeConfig {
    pub data_dir: PathBuf,
    pub dev_mode: bool,
    pub search_terms: Vec<String>,
    pub reply_template: String,
    pub trigger_keyword: String,
    pub max_login_attempts: u32,
    pub session_freshness_secs: u64,
    pub round_item_cap: usize,
    pub reply_scan_passes: u32,
    pub browser: BrowserSettings,
    pub typing: TypingProfile,
    pub cooldown: CooldownSettings,
    pub runtime: RuntimeWindowSettings,
    pub audit: AuditSettings,
    pub fingerprint: FingerprintSettings,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            dev_mode: false,
            search_terms: vec!["crypto".into(), "depin".into()],
            reply_template: "Wow, {} is dope and all, but I want more.".into(),
            trigger_keyword: "koii".into(),
            max_login_attempts: 3,
            session_freshness_secs: 50,
            round_item_cap: 120,
            reply_scan_passes: 5,
            browser: BrowserSettings::default(),
            typing: TypingProfile::default(),
            cooldown: CooldownSettings::default(),
            runtime: RuntimeWindowSettings::default(),
            audit: AuditSettings::default(),
            fingerprint: FingerprintSettings::default(),
        }
    }
}

impl NodeConfig {
    /// Read the config file if present, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            match serde_json::from_str(&contents) {
                Ok(config) => config,
                Err(err) => {
                    warn!(
                        "Config at {} is malformed ({err}); falling back to defaults",
                        path.display()
                    );
                    NodeConfig::default()
                }
            }
        } else {
            NodeConfig::default()
        };

        Ok(config.with_env_overrides())
    }

    pub fn with_env_overrides(mut self) -> Self {
        let dev_mode = std::env::var(DEV_MODE_ENV)
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if dev_mode {
            self = self.into_dev_mode();
        }
        self
    }

    /// Redirect local storage and launch visible browsers.
    pub fn into_dev_mode(mut self) -> Self {
        self.dev_mode = true;
        self.data_dir = PathBuf::from(DEV_DATA_DIR);
        self.browser.headless = false;
        self
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn crawl_profile_path(&self) -> PathBuf {
        self.data_dir.join(&self.browser.crawl_profile_dir)
    }

    pub fn audit_profile_path(&self) -> PathBuf {
        self.data_dir.join(&self.browser.audit_profile_dir)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }
}
