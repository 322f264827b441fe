//! Capability surface of the browser automation collaborator.
//!
//! The node only ever talks to these traits. A concrete driver (CDP,
//! WebDriver, ...) lives outside the crate and is injected through a
//! [`BrowserLauncher`].

pub mod typing;

use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{NodeConfig, Viewport};

pub use typing::{human_type, Keystroke, TypingProfile};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// Unix seconds; `None` for session cookies.
    #[serde(default)]
    pub expires: Option<i64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub user_data_dir: PathBuf,
    pub user_agent: String,
    pub viewport: Viewport,
}

impl LaunchOptions {
    /// Mobile profile used by the crawl session.
    pub fn crawl(config: &NodeConfig) -> Self {
        Self {
            headless: config.browser.headless,
            user_data_dir: config.crawl_profile_path(),
            user_agent: config.browser.crawl_user_agent.clone(),
            viewport: config.browser.crawl_viewport,
        }
    }

    /// Desktop profile used by audits; never shares a directory with the crawl profile.
    pub fn audit(config: &NodeConfig) -> Self {
        Self {
            headless: config.browser.headless,
            user_data_dir: config.audit_profile_path(),
            user_agent: config.browser.audit_user_agent.clone(),
            viewport: config.browser.audit_viewport,
        }
    }
}

/// One tab. Every call suspends until the underlying driver answers.
#[async_trait]
pub trait Page: Send + Sync {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<()>;

    async fn url(&self) -> Result<String>;

    /// `Ok(false)` when the selector did not appear before the timeout.
    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<bool>;

    async fn click(&mut self, selector: &str) -> Result<()>;

    async fn press_key(&mut self, key: &str) -> Result<()>;

    async fn type_char(&mut self, ch: char) -> Result<()>;

    async fn exists(&self, selector: &str) -> Result<bool>;

    /// Outer markup of every element matching `selector`, in document order.
    async fn outer_html_all(&self, selector: &str) -> Result<Vec<String>>;

    /// Rendered text of every element matching `selector`, in document order.
    async fn text_all(&self, selector: &str) -> Result<Vec<String>>;

    async fn attribute_all(&self, selector: &str, attribute: &str) -> Result<Vec<String>>;

    async fn body_text(&self) -> Result<String>;

    /// Touch-drag from one point to another, used to scroll the mobile timeline.
    async fn swipe(&mut self, from: (i32, i32), to: (i32, i32), steps: u32) -> Result<()>;

    async fn cookies(&self) -> Result<Vec<Cookie>>;

    async fn set_cookies(&mut self, cookies: &[Cookie]) -> Result<()>;

    async fn pause(&mut self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait Browser: Send + Sync {
    async fn new_page(&mut self) -> Result<Box<dyn Page>>;

    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn Browser>>;
}
