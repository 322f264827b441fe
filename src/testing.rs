//! Scripted in-memory platform for exercising the node without a browser.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::{
    browser::{Browser, BrowserLauncher, Cookie, LaunchOptions, Page, TypingProfile},
    config::NodeConfig,
    error::StorageError,
    extract::{Extractor, ParsedItem},
    platform,
    storage::BlobStorage,
};

pub const SESSION_COOKIE: &str = "auth_token";

#[derive(Debug, Clone)]
pub struct FakePost {
    pub id: String,
    pub handle: String,
    pub text: String,
    pub published_at: i64,
    pub liked: bool,
    pub parent: Option<String>,
    pub deleted: bool,
}

impl FakePost {
    fn markup(&self) -> String {
        let parsed = ParsedItem {
            item_id: self.id.clone(),
            author_handle: self.handle.clone(),
            author_display_name: self.handle.to_uppercase(),
            author_profile_url: format!("{}/{}", platform::BASE_URL, self.handle),
            author_avatar_url: format!("https://pbs.example/{}.jpg", self.handle),
            text: self.text.clone(),
            published_at: self.published_at,
        };
        serde_json::to_string(&parsed).unwrap_or_default()
    }
}

#[derive(Debug)]
pub struct PlatformState {
    pub account_handle: String,
    pub identity: String,
    pub secret: String,
    pub verification_code: Option<String>,
    pub email_verification: bool,
    pub valid_token: String,
    pub error_banner: bool,
    pub fail_launches: bool,
    pub photo_traps: HashSet<String>,
    pub posts: BTreeMap<String, FakePost>,
    pub search_results: Vec<String>,
    pub reply_clock: i64,
    pub launches: usize,
    pub open_browsers: usize,
    pub credential_submissions: usize,
    pub searches: Vec<String>,
    next_reply: usize,
}

#[derive(Clone)]
pub struct FakePlatform(Arc<Mutex<PlatformState>>);

impl FakePlatform {
    pub fn new(handle: &str, identity: &str, secret: &str) -> Self {
        Self(Arc::new(Mutex::new(PlatformState {
            account_handle: handle.into(),
            identity: identity.into(),
            secret: secret.into(),
            verification_code: None,
            email_verification: false,
            valid_token: "token-1".into(),
            error_banner: false,
            fail_launches: false,
            photo_traps: HashSet::new(),
            posts: BTreeMap::new(),
            search_results: Vec::new(),
            reply_clock: 1_700_000_600,
            launches: 0,
            open_browsers: 0,
            credential_submissions: 0,
            searches: Vec::new(),
            next_reply: 1,
        })))
    }

    pub fn state(&self) -> MutexGuard<'_, PlatformState> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Add a post that shows up in search results.
    pub fn add_result(&self, id: &str, handle: &str, text: &str, published_at: i64) {
        let mut state = self.state();
        state.posts.insert(
            id.into(),
            FakePost {
                id: id.into(),
                handle: handle.into(),
                text: text.into(),
                published_at,
                liked: false,
                parent: None,
                deleted: false,
            },
        );
        state.search_results.push(id.into());
    }

    pub fn add_reply(&self, parent: &str, id: &str, handle: &str, text: &str) {
        let mut state = self.state();
        let published_at = state.reply_clock;
        state.posts.insert(
            id.into(),
            FakePost {
                id: id.into(),
                handle: handle.into(),
                text: text.into(),
                published_at,
                liked: false,
                parent: Some(parent.into()),
                deleted: false,
            },
        );
    }

    pub fn post(&self, id: &str) -> Option<FakePost> {
        self.state().posts.get(id).cloned()
    }

    pub fn replies_by(&self, handle: &str) -> Vec<FakePost> {
        self.state()
            .posts
            .values()
            .filter(|post| post.parent.is_some() && post.handle == handle)
            .cloned()
            .collect()
    }

    pub fn delete(&self, id: &str) {
        if let Some(post) = self.state().posts.get_mut(id) {
            post.deleted = true;
        }
    }

    pub fn edit(&self, id: &str, text: &str) {
        if let Some(post) = self.state().posts.get_mut(id) {
            post.text = text.into();
        }
    }

    /// Invalidate every issued session cookie.
    pub fn revoke_sessions(&self) {
        let mut state = self.state();
        state.valid_token = format!("{}-revoked", state.valid_token);
    }

    pub fn launcher(&self) -> Arc<FakeLauncher> {
        Arc::new(FakeLauncher {
            platform: self.clone(),
        })
    }
}

pub struct FakeLauncher {
    platform: FakePlatform,
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, _options: &LaunchOptions) -> Result<Box<dyn Browser>> {
        let mut state = self.platform.state();
        state.launches += 1;
        if state.fail_launches {
            bail!("browser binary crashed on start");
        }
        state.open_browsers += 1;
        Ok(Box::new(FakeBrowser {
            platform: self.platform.clone(),
            jar: Arc::new(Mutex::new(Vec::new())),
            closed: false,
        }))
    }
}

pub struct FakeBrowser {
    platform: FakePlatform,
    jar: Arc<Mutex<Vec<Cookie>>>,
    closed: bool,
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn new_page(&mut self) -> Result<Box<dyn Page>> {
        if self.closed {
            bail!("browser is closed");
        }
        Ok(Box::new(FakePage {
            platform: self.platform.clone(),
            jar: self.jar.clone(),
            view: View::Blank,
            url: "about:blank".into(),
            typed: String::new(),
            composing: false,
        }))
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            let mut state = self.platform.state();
            state.open_browsers = state.open_browsers.saturating_sub(1);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum View {
    Blank,
    SignedOut,
    LoginIdentity,
    LoginVerification,
    LoginSecret,
    EmailCheck,
    Home,
    Explore,
    Search,
    Photo(String),
    Detail(String),
    NotFound,
}

pub struct FakePage {
    platform: FakePlatform,
    jar: Arc<Mutex<Vec<Cookie>>>,
    view: View,
    url: String,
    typed: String,
    composing: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl FakePage {
    fn signed_in(&self) -> bool {
        let token = self.platform.state().valid_token.clone();
        lock(&self.jar)
            .iter()
            .any(|cookie| cookie.name == SESSION_COOKIE && cookie.value == token)
    }

    fn set_view(&mut self, view: View, url: impl Into<String>) {
        self.view = view;
        self.url = url.into();
        self.typed.clear();
        self.composing = false;
    }

    fn visible_ids(&self) -> Vec<String> {
        let state = self.platform.state();
        match &self.view {
            View::Search => state
                .search_results
                .iter()
                .filter(|id| state.posts.get(*id).is_some_and(|post| !post.deleted))
                .cloned()
                .collect(),
            View::Detail(id) => {
                let mut ids = vec![id.clone()];
                ids.extend(
                    state
                        .posts
                        .values()
                        .filter(|post| post.parent.as_deref() == Some(id.as_str()) && !post.deleted)
                        .map(|post| post.id.clone()),
                );
                ids
            }
            _ => Vec::new(),
        }
    }

    fn open_status(&mut self, item_id: &str, url: String) {
        let available = self
            .platform
            .state()
            .posts
            .get(item_id)
            .is_some_and(|post| !post.deleted);
        if available {
            self.set_view(View::Detail(item_id.into()), url);
        } else {
            self.set_view(View::NotFound, url);
        }
    }

    fn submit_login_step(&mut self) {
        let mut state = self.platform.state();
        match self.view {
            View::LoginIdentity if self.typed == state.identity => {
                self.view = if state.verification_code.is_some() {
                    View::LoginVerification
                } else {
                    View::LoginSecret
                };
            }
            View::LoginVerification if Some(&self.typed) == state.verification_code.as_ref() => {
                self.view = View::LoginSecret;
            }
            View::LoginSecret => {
                state.credential_submissions += 1;
                if self.typed != state.secret {
                    self.view = View::LoginIdentity;
                } else if state.email_verification {
                    self.view = View::EmailCheck;
                } else {
                    lock(&self.jar).push(Cookie {
                        name: SESSION_COOKIE.into(),
                        value: state.valid_token.clone(),
                        domain: ".x.com".into(),
                        path: "/".into(),
                        expires: None,
                        http_only: true,
                        secure: true,
                    });
                    self.view = View::Home;
                    self.url = platform::HOME_URL.into();
                }
            }
            _ => {}
        }
        self.typed.clear();
    }

    fn post_reply(&mut self, parent: &str) {
        let mut state = self.platform.state();
        let id = format!("R{}", state.next_reply);
        state.next_reply += 1;
        let post = FakePost {
            id: id.clone(),
            handle: state.account_handle.clone(),
            text: self.typed.clone(),
            published_at: state.reply_clock,
            liked: false,
            parent: Some(parent.into()),
            deleted: false,
        };
        state.posts.insert(id, post);
        self.typed.clear();
        self.composing = false;
    }
}

#[async_trait]
impl Page for FakePage {
    async fn goto(&mut self, url: &str, _timeout: Duration) -> Result<()> {
        if url == platform::HOME_URL {
            if self.signed_in() {
                self.set_view(View::Home, url);
            } else {
                self.set_view(View::SignedOut, platform::LOGIN_REDIRECT_URL);
            }
        } else if url == platform::LOGIN_URL {
            self.set_view(View::LoginIdentity, url);
        } else if let Some((_, id)) = url.split_once("/status/") {
            let id = id.to_string();
            self.open_status(&id, url.to_string());
        } else {
            bail!("navigation to unknown url {url}");
        }
        Ok(())
    }

    async fn url(&self) -> Result<String> {
        Ok(self.url.clone())
    }

    async fn wait_for_selector(&mut self, selector: &str, _timeout: Duration) -> Result<bool> {
        self.exists(selector).await
    }

    async fn click(&mut self, selector: &str) -> Result<()> {
        if let Some(id) = platform::scoped_item_id(selector).map(str::to_string) {
            if !self.visible_ids().contains(&id) {
                bail!("no element matches {selector}");
            }
            if selector.ends_with(platform::LIKE_BUTTON) {
                if let Some(post) = self.platform.state().posts.get_mut(&id) {
                    post.liked = true;
                }
            } else if self.platform.state().photo_traps.remove(&id) {
                self.set_view(View::Photo(id.clone()), format!("{}/photo/1", platform::item_permalink(&id)));
            } else {
                let url = platform::item_permalink(&id);
                self.set_view(View::Detail(id), url);
            }
            return Ok(());
        }

        match (selector, &self.view) {
            (platform::EXPLORE_LINK, View::Home | View::Search | View::Explore) => {
                self.set_view(View::Explore, format!("{}/explore", platform::BASE_URL));
            }
            (platform::PHOTO_CLOSE_BUTTON, View::Photo(_)) => {
                self.set_view(View::Search, format!("{}/search", platform::BASE_URL));
            }
            (platform::REPLY_BUTTON, View::Detail(_)) => {
                self.composing = true;
                self.typed.clear();
            }
            (platform::SUBMIT_REPLY_BUTTON, View::Detail(parent)) if self.composing => {
                let parent = parent.clone();
                self.post_reply(&parent);
            }
            (platform::BACK_BUTTON, View::Detail(_)) => {
                self.set_view(View::Search, format!("{}/search", platform::BASE_URL));
            }
            (platform::IDENTITY_INPUT, View::LoginIdentity)
            | (platform::VERIFICATION_INPUT, View::LoginVerification)
            | (platform::SECRET_INPUT, View::LoginSecret)
            | (platform::SEARCH_INPUT, View::Explore) => {
                self.typed.clear();
            }
            (platform::REPLY_TEXTAREA, View::Detail(_)) if self.composing => {}
            _ => bail!("no element matches {selector}"),
        }
        Ok(())
    }

    async fn press_key(&mut self, key: &str) -> Result<()> {
        match key {
            "Backspace" => {
                self.typed.pop();
            }
            "Escape" => {
                if matches!(self.view, View::Photo(_)) {
                    self.set_view(View::Search, format!("{}/search", platform::BASE_URL));
                }
            }
            "Enter" => match self.view {
                View::Explore => {
                    self.platform.state().searches.push(self.typed.clone());
                    let url = format!("{}/search?q={}", platform::BASE_URL, self.typed);
                    self.set_view(View::Search, url);
                }
                _ => self.submit_login_step(),
            },
            other => bail!("unsupported key {other}"),
        }
        Ok(())
    }

    async fn type_char(&mut self, ch: char) -> Result<()> {
        self.typed.push(ch);
        Ok(())
    }

    async fn exists(&self, selector: &str) -> Result<bool> {
        if let Some(id) = platform::scoped_item_id(selector) {
            if !self.visible_ids().iter().any(|visible| visible == id) {
                return Ok(false);
            }
            let liked = self
                .platform
                .state()
                .posts
                .get(id)
                .is_some_and(|post| post.liked);
            return Ok(if selector.ends_with(platform::UNLIKE_BUTTON) {
                liked
            } else if selector.ends_with(platform::LIKE_BUTTON) {
                !liked
            } else {
                true
            });
        }

        let view = &self.view;
        Ok(match selector {
            platform::EXPLORE_LINK => matches!(view, View::Home | View::Search | View::Explore),
            platform::SEARCH_INPUT => *view == View::Explore,
            platform::IDENTITY_INPUT => *view == View::LoginIdentity,
            platform::VERIFICATION_INPUT => *view == View::LoginVerification,
            platform::SECRET_INPUT => *view == View::LoginSecret,
            platform::REPLY_BUTTON | platform::BACK_BUTTON => matches!(view, View::Detail(_)),
            platform::REPLY_TEXTAREA | platform::SUBMIT_REPLY_BUTTON => {
                matches!(view, View::Detail(_)) && self.composing
            }
            platform::PHOTO_CLOSE_BUTTON => matches!(view, View::Photo(_)),
            platform::NOT_FOUND_INDICATOR => *view == View::NotFound,
            _ => false,
        })
    }

    async fn outer_html_all(&self, selector: &str) -> Result<Vec<String>> {
        let wanted = match (&self.view, selector) {
            (View::Search, platform::RESULT_ARTICLE) => true,
            (View::Detail(_), platform::THREAD_ARTICLE) => true,
            _ => false,
        };
        if !wanted {
            return Ok(Vec::new());
        }

        let ids = self.visible_ids();
        let state = self.platform.state();
        Ok(ids
            .iter()
            .filter_map(|id| state.posts.get(id))
            .map(FakePost::markup)
            .collect())
    }

    async fn text_all(&self, selector: &str) -> Result<Vec<String>> {
        if selector == platform::BANNER_TEXT && self.view == View::Search {
            if self.platform.state().error_banner {
                return Ok(vec![platform::ERROR_BANNER.to_string()]);
            }
            return Ok(vec!["Top".into(), "Latest".into()]);
        }
        Ok(Vec::new())
    }

    async fn attribute_all(&self, selector: &str, attribute: &str) -> Result<Vec<String>> {
        if selector == platform::AVATAR_CONTAINER && attribute == "data-testid" && self.view == View::Home
        {
            let handle = self.platform.state().account_handle.clone();
            return Ok(vec![format!("{}{handle}", platform::AVATAR_TESTID_PREFIX)]);
        }
        Ok(Vec::new())
    }

    async fn body_text(&self) -> Result<String> {
        Ok(match self.view {
            View::EmailCheck => platform::EMAIL_VERIFICATION_TEXT.to_string(),
            _ => String::new(),
        })
    }

    async fn swipe(&mut self, _from: (i32, i32), _to: (i32, i32), _steps: u32) -> Result<()> {
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<Cookie>> {
        Ok(lock(&self.jar).clone())
    }

    async fn set_cookies(&mut self, cookies: &[Cookie]) -> Result<()> {
        *lock(&self.jar) = cookies.to_vec();
        Ok(())
    }

    async fn pause(&mut self, _duration: Duration) {}

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Markup is the JSON encoding of a [`ParsedItem`].
pub struct JsonExtractor;

impl Extractor for JsonExtractor {
    fn parse_item(&self, markup: &str) -> Result<ParsedItem> {
        serde_json::from_str(markup).map_err(|err| anyhow!("unparseable markup: {err}"))
    }
}

/// Storage that hands out `cidA`, `cidB`, ... and keeps blobs in memory.
#[derive(Default)]
pub struct FakeStorage {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    uploads: AtomicUsize,
    pub fetches: AtomicUsize,
    pub fail_uploads: AtomicBool,
}

impl FakeStorage {
    pub fn blob(&self, cid: &str) -> Option<Vec<u8>> {
        lock(&self.blobs).get(cid).cloned()
    }

    pub fn put(&self, cid: &str, bytes: Vec<u8>) {
        lock(&self.blobs).insert(cid.into(), bytes);
    }
}

#[async_trait]
impl BlobStorage for FakeStorage {
    async fn upload_file(&self, path: &Path, submitter: &str) -> Result<String> {
        if self.fail_uploads.load(Ordering::SeqCst) || submitter.is_empty() {
            bail!("upload rejected");
        }
        let bytes = tokio::fs::read(path).await?;
        let index = self.uploads.fetch_add(1, Ordering::SeqCst);
        let cid = format!("cid{}", (b'A' + (index % 26) as u8) as char);
        lock(&self.blobs).insert(cid.clone(), bytes);
        Ok(cid)
    }

    async fn get_file(&self, cid: &str, _file_name: &str) -> Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        lock(&self.blobs)
            .get(cid)
            .cloned()
            .ok_or_else(|| anyhow!("{cid} not pinned"))
    }

    fn validate_identifier(&self, cid: &str) -> Result<(), StorageError> {
        if cid.starts_with("cid") && cid.len() == 4 {
            Ok(())
        } else {
            Err(StorageError::InvalidIdentifier(cid.into()))
        }
    }
}

/// Defaults tuned for tests: cheap hashing, instant typing, no backoff.
pub fn test_config(data_dir: &Path) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.data_dir = data_dir.to_path_buf();
    config.search_terms = vec!["depin".into()];
    config.reply_template = "Great point about {}".into();
    config.typing = TypingProfile::instant();
    config.fingerprint.memory_kib = 1024;
    config.fingerprint.iterations = 1;
    config.audit.fetch_backoff_ms = 0;
    config.browser.settle_delay_ms = 0;
    config
}
