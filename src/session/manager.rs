use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};

use crate::{
    browser::{human_type, Browser, BrowserLauncher, Cookie, LaunchOptions, Page},
    config::{Credentials, NodeConfig},
    db::Database,
    error::{NodeError, NodeResult},
    platform,
    utils::jittered,
};
use crate::{log_info, log_warn};

const ENABLE_LOGS: bool = true;

pub const COOKIES_KEY: &str = "cookies";

/// How long to look for the optional verification-code prompt.
const VERIFICATION_PROMPT_WAIT: Duration = Duration::from_secs(5);

/// The one authenticated crawl session. Owns its browser exclusively.
#[derive(Default)]
pub struct Session {
    pub valid: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    browser: Option<Box<dyn Browser>>,
    page: Option<Box<dyn Page>>,
}

impl Session {
    fn is_fresh(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        self.valid
            && self
                .last_checked_at
                .is_some_and(|checked| now - checked < window)
    }

    fn mark_valid(&mut self) {
        self.valid = true;
        self.last_checked_at = Some(Utc::now());
    }
}

enum LoginError {
    Fatal(NodeError),
    Transient(anyhow::Error),
}

impl From<anyhow::Error> for LoginError {
    fn from(err: anyhow::Error) -> Self {
        LoginError::Transient(err)
    }
}

/// How [`SessionManager::ensure_session`] made the session usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Checked recently enough to trust without looking.
    Fresh,
    /// Stale, but a liveness check confirmed it.
    Confirmed,
    /// A new browser was launched and the login redone.
    Negotiated,
}

pub struct SessionManager {
    launcher: Arc<dyn BrowserLauncher>,
    db: Database,
    credentials: Credentials,
    config: Arc<NodeConfig>,
    session: Session,
    acting_handle: Option<String>,
}

impl SessionManager {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        db: Database,
        credentials: Credentials,
        config: Arc<NodeConfig>,
    ) -> Self {
        Self {
            launcher,
            db,
            credentials,
            config,
            session: Session::default(),
            acting_handle: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.session.valid
    }

    pub fn last_checked_at(&self) -> Option<DateTime<Utc>> {
        self.session.last_checked_at
    }

    pub fn page_mut(&mut self) -> Option<&mut (dyn Page + 'static)> {
        self.session.page.as_deref_mut()
    }

    fn navigation_timeout(&self) -> Duration {
        jittered(Duration::from_millis(self.config.browser.navigation_timeout_ms))
    }

    fn settle_delay(&self) -> Duration {
        jittered(Duration::from_millis(self.config.browser.settle_delay_ms))
    }

    /// Make sure an authenticated session exists.
    ///
    /// Only unrecoverable login failures are returned as errors.
    pub async fn ensure_session(&mut self) -> NodeResult<SessionStatus> {
        let freshness = chrono::Duration::seconds(self.config.session_freshness_secs as i64);
        if self.session.is_fresh(Utc::now(), freshness) {
            return Ok(SessionStatus::Fresh);
        }

        if self.session.valid && self.session.browser.is_some() {
            match self.check_liveness().await {
                Ok(true) => {
                    self.session.mark_valid();
                    return Ok(SessionStatus::Confirmed);
                }
                Ok(false) => log_warn!("Session check landed on a signed-out page"),
                Err(err) => log_warn!("Session check failed: {err:#}"),
            }
            self.session.valid = false;
        }

        self.negotiate().await?;
        Ok(SessionStatus::Negotiated)
    }

    /// Check liveness from a second tab so the working tab keeps its place.
    async fn check_liveness(&mut self) -> anyhow::Result<bool> {
        let timeout = self.navigation_timeout();
        let settle = self.settle_delay();
        let browser = self
            .session
            .browser
            .as_mut()
            .ok_or_else(|| anyhow!("no browser to check the session with"))?;

        let mut tab = browser.new_page().await?;
        let outcome = async {
            tab.goto(platform::HOME_URL, timeout).await?;
            tab.pause(settle).await;
            let url = tab.url().await?;
            Ok::<_, anyhow::Error>(!platform::is_signed_out_url(&url))
        }
        .await;

        if let Err(err) = tab.close().await {
            log_warn!("Failed to close session check tab: {err:#}");
        }
        outcome
    }

    async fn negotiate(&mut self) -> NodeResult<()> {
        let max_attempts = self.config.max_login_attempts.max(1);

        for attempt in 1..=max_attempts {
            log_info!("Negotiating session (attempt {attempt}/{max_attempts})");

            match self.attempt_login(attempt == 1).await {
                Ok(()) => {
                    self.session.mark_valid();
                    if let Err(err) = self.persist_cookies().await {
                        log_warn!("Failed to persist cookies: {err:#}");
                    }
                    log_info!("Session established");
                    return Ok(());
                }
                Err(LoginError::Fatal(err)) => {
                    log::error!("Login aborted: {err}");
                    self.teardown().await;
                    return Err(err);
                }
                Err(LoginError::Transient(err)) => {
                    log_warn!("Login attempt {attempt} failed: {err:#}");
                    self.teardown().await;
                }
            }
        }

        Err(NodeError::SessionExhausted {
            attempts: max_attempts,
        })
    }

    async fn attempt_login(&mut self, try_cookies: bool) -> Result<(), LoginError> {
        self.open_browser().await?;

        if try_cookies {
            match self.login_with_cookies().await {
                Ok(true) => return Ok(()),
                Ok(false) => log_info!("Stored cookies did not authenticate"),
                Err(err) => log_warn!("Cookie login failed: {err:#}"),
            }
        }

        self.login_with_credentials().await
    }

    /// Replace any running browser with a fresh one and open its working tab.
    async fn open_browser(&mut self) -> anyhow::Result<()> {
        self.teardown().await;

        let options = LaunchOptions::crawl(&self.config);
        let mut browser = self
            .launcher
            .launch(&options)
            .await
            .context("failed to launch crawl browser")?;
        let page = match browser.new_page().await {
            Ok(page) => page,
            Err(err) => {
                let _ = browser.close().await;
                return Err(err.context("failed to open crawl tab"));
            }
        };

        self.session.browser = Some(browser);
        self.session.page = Some(page);
        Ok(())
    }

    async fn login_with_cookies(&mut self) -> anyhow::Result<bool> {
        let Some(cookies) = self.db.kv_get::<Vec<Cookie>>(COOKIES_KEY).await? else {
            return Ok(false);
        };
        if cookies.is_empty() {
            return Ok(false);
        }

        let timeout = self.navigation_timeout();
        let settle = self.settle_delay();
        let page = self.working_page()?;

        page.set_cookies(&cookies).await?;
        page.goto(platform::HOME_URL, timeout).await?;
        page.pause(settle).await;
        let url = page.url().await?;
        Ok(!platform::is_signed_out_url(&url))
    }

    async fn login_with_credentials(&mut self) -> Result<(), LoginError> {
        let timeout = self.navigation_timeout();
        let settle = self.settle_delay();
        let profile = self.config.typing.clone();
        let credentials = self.credentials.clone();
        let page = self.working_page()?;

        page.goto(platform::LOGIN_URL, timeout).await?;
        if !page.wait_for_selector(platform::IDENTITY_INPUT, timeout).await? {
            return Err(anyhow!("identity input never appeared").into());
        }
        human_type(page, platform::IDENTITY_INPUT, &credentials.identity, &profile).await?;
        page.press_key("Enter").await?;
        page.pause(settle).await;

        if page
            .wait_for_selector(platform::VERIFICATION_INPUT, VERIFICATION_PROMPT_WAIT)
            .await?
        {
            let Some(code) = credentials.verification.as_deref() else {
                return Err(LoginError::Fatal(NodeError::VerificationCodeMissing));
            };
            log_info!("Answering verification challenge");
            human_type(page, platform::VERIFICATION_INPUT, code, &profile).await?;
            page.press_key("Enter").await?;
            page.pause(settle).await;
        }

        if !page.wait_for_selector(platform::SECRET_INPUT, timeout).await? {
            return Err(anyhow!("secret input never appeared").into());
        }
        human_type(page, platform::SECRET_INPUT, &credentials.secret, &profile).await?;
        page.press_key("Enter").await?;
        page.pause(settle).await;

        let body = page.body_text().await.unwrap_or_default();
        if platform::requires_email_verification(&body) {
            return Err(LoginError::Fatal(NodeError::EmailVerificationRequired));
        }

        if !self.check_liveness().await? {
            return Err(LoginError::Fatal(NodeError::LoginRejected));
        }
        Ok(())
    }

    fn working_page(&mut self) -> anyhow::Result<&mut (dyn Page + 'static)> {
        self.session
            .page
            .as_deref_mut()
            .ok_or_else(|| anyhow!("no crawl tab open"))
    }

    async fn persist_cookies(&mut self) -> anyhow::Result<()> {
        let cookies = self.working_page()?.cookies().await?;
        self.db.kv_set(COOKIES_KEY, &cookies).await
    }

    /// Handle of the account we act as. Read from the home view when the
    /// identity is an email address.
    pub async fn acting_handle(&mut self) -> anyhow::Result<String> {
        if let Some(handle) = &self.acting_handle {
            return Ok(handle.clone());
        }

        if !self.credentials.identity_is_email() {
            let handle = self.credentials.identity.trim_start_matches('@').to_string();
            self.acting_handle = Some(handle.clone());
            return Ok(handle);
        }

        let timeout = self.navigation_timeout();
        let settle = self.settle_delay();
        let page = self.working_page()?;
        page.goto(platform::HOME_URL, timeout).await?;
        page.pause(settle).await;

        let testids = page
            .attribute_all(platform::AVATAR_CONTAINER, "data-testid")
            .await?;
        let handle = testids
            .iter()
            .take(2)
            .find_map(|testid| platform::handle_from_avatar_testid(testid))
            .map(str::to_string)
            .ok_or_else(|| anyhow!("could not find the acting account's handle"))?;

        log_info!("Acting as @{handle}");
        self.acting_handle = Some(handle.clone());
        Ok(handle)
    }

    /// Close the browser and mark the session invalid. Never fails.
    pub async fn teardown(&mut self) {
        self.session.valid = false;

        if let Some(mut page) = self.session.page.take() {
            if let Err(err) = page.close().await {
                log_warn!("Failed to close crawl tab: {err:#}");
            }
        }
        if let Some(mut browser) = self.session.browser.take() {
            if let Err(err) = browser.close().await {
                log_warn!("Failed to close crawl browser: {err:#}");
            }
        }
    }

    pub async fn close(&mut self) {
        self.teardown().await;
        self.session.last_checked_at = None;
    }
}
