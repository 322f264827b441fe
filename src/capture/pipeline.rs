use std::{collections::HashSet, sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::{
    audit::normalize_reply_text,
    browser::{human_type, Page},
    config::NodeConfig,
    db::Database,
    error::NodeResult,
    extract::{Extractor, ParsedItem},
    fingerprint::Fingerprinter,
    governor::CooldownGovernor,
    models::{CapturedItem, ReplyRecord},
    platform,
    session::{SessionManager, SessionStatus},
    utils::jittered,
};
use crate::{log_debug, log_info, log_warn};

use super::ReplyGenerator;

const ENABLE_LOGS: bool = true;

const RESULTS_SWIPE: [((i32, i32), (i32, i32), u32); 2] =
    [((150, 500), (250, 200), 10), ((150, 200), (250, 500), 5)];
const THREAD_SWIPE: ((i32, i32), (i32, i32), u32) = ((150, 500), (150, 200), 15);

/// What one search pass did. Items themselves are persisted, not returned.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CaptureSummary {
    pub found: usize,
    pub captured: usize,
    pub skipped: usize,
    pub failed: usize,
    pub replied: usize,
    /// The session had to be (re)negotiated; no search ran.
    pub session_renewed: bool,
    /// The platform showed its error banner and the round was abandoned.
    pub abandoned: bool,
    /// The round hit its item cap and the browser was recycled.
    pub recycled: bool,
}

pub struct CapturePipeline {
    db: Database,
    extractor: Arc<dyn Extractor>,
    fingerprinter: Fingerprinter,
    cooldown: Arc<CooldownGovernor>,
    replies: Arc<dyn ReplyGenerator>,
    config: Arc<NodeConfig>,
    cancel: CancellationToken,
}

struct Target<'a> {
    parsed: ParsedItem,
    search_term: &'a str,
    round: u64,
    reply_template: &'a str,
    handle: &'a str,
}

impl CapturePipeline {
    pub fn new(
        db: Database,
        extractor: Arc<dyn Extractor>,
        fingerprinter: Fingerprinter,
        cooldown: Arc<CooldownGovernor>,
        replies: Arc<dyn ReplyGenerator>,
        config: Arc<NodeConfig>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            db,
            extractor,
            fingerprinter,
            cooldown,
            replies,
            config,
            cancel,
        }
    }

    fn navigation_timeout(&self) -> Duration {
        jittered(Duration::from_millis(self.config.browser.navigation_timeout_ms))
    }

    fn settle_delay(&self) -> Duration {
        jittered(Duration::from_millis(self.config.browser.settle_delay_ms))
    }

    /// Search for `search_term` and capture every new result into `round`.
    ///
    /// A stale session is checked first. When the session had to be negotiated
    /// afresh this returns without searching; the caller retries on its next
    /// tick. Only fatal session errors escape.
    pub async fn search(
        &self,
        session: &mut SessionManager,
        search_term: &str,
        round: u64,
        reply_template: &str,
    ) -> NodeResult<CaptureSummary> {
        let mut summary = CaptureSummary::default();

        if session.ensure_session().await? == SessionStatus::Negotiated {
            log_info!("round {round}: session was renegotiated, searching next tick");
            summary.session_renewed = true;
            return Ok(summary);
        }

        let handle = match session.acting_handle().await {
            Ok(handle) => handle,
            Err(err) => {
                log_warn!("round {round}: {err:#}");
                return Ok(summary);
            }
        };

        let articles = match self.open_results(session, search_term, round).await {
            Ok(Some(articles)) => articles,
            Ok(None) => {
                log_warn!("round {round}: platform error banner shown, abandoning round");
                session.teardown().await;
                summary.abandoned = true;
                return Ok(summary);
            }
            Err(err) => {
                log_warn!("round {round}: search for '{search_term}' failed: {err:#}");
                return Ok(summary);
            }
        };

        summary.found = articles.len();
        log_info!("round {round}: {} results for '{search_term}'", articles.len());

        let mut seen: HashSet<String> = match self.db.items_for_round(round).await {
            Ok(items) => items.into_iter().map(|item| item.item_id).collect(),
            Err(err) => {
                log_warn!("round {round}: could not load round items: {err:#}");
                HashSet::new()
            }
        };

        for markup in &articles {
            if self.cancel.is_cancelled() {
                log_info!("round {round}: stop requested, leaving capture loop");
                break;
            }

            let parsed = match self.extractor.parse_item(markup) {
                Ok(parsed) if !parsed.item_id.is_empty() => parsed,
                Ok(_) => {
                    summary.failed += 1;
                    log_warn!("round {round}: result without an item id");
                    continue;
                }
                Err(err) => {
                    summary.failed += 1;
                    log_warn!("round {round}: could not parse result: {err:#}");
                    continue;
                }
            };

            match self.is_known(&parsed.item_id, &seen).await {
                Ok(true) => {
                    summary.skipped += 1;
                    log_debug!("round {round}: {} already captured", parsed.item_id);
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    summary.failed += 1;
                    log_warn!("round {round}: dedup lookup failed: {err:#}");
                    continue;
                }
            }

            let item_id = parsed.item_id.clone();
            let target = Target {
                parsed,
                search_term,
                round,
                reply_template,
                handle: &handle,
            };

            match self.capture_item(session, target).await {
                Ok(item) => {
                    if item.reply.is_some() {
                        summary.replied += 1;
                    }
                    seen.insert(item_id);
                    summary.captured += 1;
                }
                Err(err) => {
                    summary.failed += 1;
                    log_warn!("round {round}: item {item_id} failed: {err:#}");
                }
            }
        }

        match self.db.count_items_for_round(round).await {
            Ok(count) if count > self.config.round_item_cap => {
                log_info!("round {round}: {count} items captured, recycling browser");
                session.teardown().await;
                summary.recycled = true;
            }
            Ok(_) => {}
            Err(err) => log_warn!("round {round}: could not count items: {err:#}"),
        }

        log_info!(
            "round {round}: captured {}, skipped {}, failed {}",
            summary.captured,
            summary.skipped,
            summary.failed
        );
        Ok(summary)
    }

    async fn is_known(&self, item_id: &str, seen: &HashSet<String>) -> Result<bool> {
        if seen.contains(item_id) {
            return Ok(true);
        }
        self.db.item_exists(item_id).await
    }

    /// Run the search and return result markup, or `None` if the error banner showed.
    async fn open_results(
        &self,
        session: &mut SessionManager,
        search_term: &str,
        round: u64,
    ) -> Result<Option<Vec<String>>> {
        let timeout = self.navigation_timeout();
        let page = session
            .page_mut()
            .ok_or_else(|| anyhow!("session has no open tab"))?;

        if !page.wait_for_selector(platform::EXPLORE_LINK, timeout).await? {
            bail!("explore link not found");
        }
        page.click(platform::EXPLORE_LINK).await?;
        page.pause(self.settle_delay()).await;

        if !page.wait_for_selector(platform::SEARCH_INPUT, timeout).await? {
            bail!("search input not found");
        }
        log_info!("round {round}: searching for '{search_term}'");
        human_type(page, platform::SEARCH_INPUT, search_term, &self.config.typing).await?;
        page.press_key("Enter").await?;
        page.pause(self.settle_delay()).await;

        let banners = page.text_all(platform::BANNER_TEXT).await?;
        if banners.iter().any(|text| text.trim() == platform::ERROR_BANNER) {
            return Ok(None);
        }

        for (from, to, steps) in RESULTS_SWIPE {
            page.swipe(from, to, steps).await?;
            page.pause(self.settle_delay()).await;
        }

        Ok(Some(page.outer_html_all(platform::RESULT_ARTICLE).await?))
    }

    async fn capture_item(
        &self,
        session: &mut SessionManager,
        target: Target<'_>,
    ) -> Result<CapturedItem> {
        let page = session
            .page_mut()
            .ok_or_else(|| anyhow!("session has no open tab"))?;
        let item_id = target.parsed.item_id.clone();
        let round = target.round;

        self.open_detail(page, &item_id).await?;

        if let Err(err) = self.like_post(page, &item_id).await {
            log_warn!("round {round}: could not like {item_id}: {err:#}");
        }

        let mut reply = None;
        if self.cooldown.may_interact(Utc::now()).await? {
            match self.post_reply(page, &target).await {
                Ok(Some(record)) => {
                    log_info!("round {round}: replied to {item_id} as {}", record.reply_id);
                    if let Err(err) = self.cooldown.record_interaction(Utc::now()).await {
                        log_warn!("round {round}: could not record reply timing: {err:#}");
                    }
                    reply = Some(record);
                }
                Ok(None) => log_warn!("round {round}: reply to {item_id} not found after posting"),
                Err(err) => log_warn!("round {round}: reply to {item_id} failed: {err:#}"),
            }
        }

        match self.like_keyword_replies(page).await {
            Ok(0) => {}
            Ok(liked) => log_info!("round {round}: liked {liked} replies under {item_id}"),
            Err(err) => log_warn!("round {round}: reply scan under {item_id} failed: {err:#}"),
        }

        if let Err(err) = self.go_back(page).await {
            log_warn!("round {round}: could not leave {item_id}: {err:#}");
        }

        let text = platform::normalize_post_text(&target.parsed.text);
        let commitment = self
            .fingerprinter
            .commit(&text, round)
            .context("failed to commit item text")?;

        let mut item =
            CapturedItem::from_parsed(target.parsed, text, target.search_term, round, commitment);
        item.reply = reply;

        if !self.db.insert_captured_item(&item).await? {
            bail!("item {item_id} was recorded concurrently");
        }
        Ok(item)
    }

    /// Click into the post, closing the image viewer if the click landed on a photo.
    async fn open_detail(&self, page: &mut dyn Page, item_id: &str) -> Result<()> {
        let text_selector = platform::article_text(item_id);
        page.click(&text_selector)
            .await
            .with_context(|| format!("could not open {item_id}"))?;
        page.pause(self.settle_delay()).await;

        let url = page.url().await?;
        if url.contains(platform::PHOTO_VIEWER_FRAGMENT) {
            log_debug!("Opened a photo instead of {item_id}, closing it");
            if page.exists(platform::PHOTO_CLOSE_BUTTON).await? {
                page.click(platform::PHOTO_CLOSE_BUTTON).await?;
            } else {
                page.press_key("Escape").await?;
            }
            page.pause(self.settle_delay()).await;
            page.click(&text_selector).await?;
            page.pause(self.settle_delay()).await;
        }
        Ok(())
    }

    async fn like_post(&self, page: &mut dyn Page, item_id: &str) -> Result<bool> {
        if page.exists(&platform::article_unlike_button(item_id)).await? {
            return Ok(false);
        }
        let like = platform::article_like_button(item_id);
        if !page.exists(&like).await? {
            return Ok(false);
        }
        page.click(&like).await?;
        page.pause(self.settle_delay()).await;
        Ok(true)
    }

    async fn post_reply(
        &self,
        page: &mut dyn Page,
        target: &Target<'_>,
    ) -> Result<Option<ReplyRecord>> {
        let text = self
            .replies
            .generate(&target.parsed.text, target.reply_template)
            .await?;
        let timeout = self.navigation_timeout();

        if !page.wait_for_selector(platform::REPLY_BUTTON, timeout).await? {
            bail!("reply button not found");
        }
        page.click(platform::REPLY_BUTTON).await?;
        if !page.wait_for_selector(platform::REPLY_TEXTAREA, timeout).await? {
            bail!("reply box not found");
        }
        human_type(page, platform::REPLY_TEXTAREA, &text, &self.config.typing).await?;
        if !page
            .wait_for_selector(platform::SUBMIT_REPLY_BUTTON, timeout)
            .await?
        {
            bail!("reply submit button not found");
        }
        page.click(platform::SUBMIT_REPLY_BUTTON).await?;
        page.pause(self.settle_delay()).await;

        self.locate_own_reply(page, target, &text).await
    }

    async fn locate_own_reply(
        &self,
        page: &mut dyn Page,
        target: &Target<'_>,
        text: &str,
    ) -> Result<Option<ReplyRecord>> {
        let wanted = normalize_reply_text(text);
        for markup in page.outer_html_all(platform::THREAD_ARTICLE).await? {
            let Ok(candidate) = self.extractor.parse_item(&markup) else {
                continue;
            };
            if candidate.item_id != target.parsed.item_id
                && candidate.author_handle.eq_ignore_ascii_case(target.handle)
                && normalize_reply_text(&candidate.text) == wanted
            {
                return Ok(Some(ReplyRecord {
                    reply_id: candidate.item_id,
                    author_handle: candidate.author_handle,
                    text: candidate.text,
                    published_at: candidate.published_at,
                }));
            }
        }
        Ok(None)
    }

    /// Like replies in the thread that mention the trigger keyword.
    async fn like_keyword_replies(&self, page: &mut dyn Page) -> Result<usize> {
        let keyword = self.config.trigger_keyword.to_lowercase();
        if keyword.is_empty() {
            return Ok(0);
        }

        let mut liked = HashSet::new();
        for _ in 0..self.config.reply_scan_passes {
            for markup in page.outer_html_all(platform::THREAD_ARTICLE).await? {
                let Ok(candidate) = self.extractor.parse_item(&markup) else {
                    continue;
                };
                if liked.contains(&candidate.item_id)
                    || !candidate.text.to_lowercase().contains(&keyword)
                {
                    continue;
                }
                if self.like_post(page, &candidate.item_id).await? {
                    liked.insert(candidate.item_id);
                }
            }
            let (from, to, steps) = THREAD_SWIPE;
            page.swipe(from, to, steps).await?;
            page.pause(self.settle_delay()).await;
        }
        Ok(liked.len())
    }

    async fn go_back(&self, page: &mut dyn Page) -> Result<()> {
        if !page
            .wait_for_selector(platform::BACK_BUTTON, self.navigation_timeout())
            .await?
        {
            bail!("back button not found");
        }
        page.click(platform::BACK_BUTTON).await?;
        page.pause(self.settle_delay()).await;
        Ok(())
    }
}
