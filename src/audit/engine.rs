use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Result;
use rand::seq::SliceRandom;
use uuid::Uuid;

use crate::{
    browser::{Browser, BrowserLauncher, LaunchOptions, Page},
    config::NodeConfig,
    extract::{Extractor, ParsedItem},
    fingerprint::Fingerprinter,
    models::{AuditOutcome, AuditReport, AuditVerdict, CapturedItem, MismatchReason},
    platform,
    storage::{fetch_submission, BlobStorage},
    utils::jittered,
};
use crate::{log_info, log_warn};

use super::compare::{compare_original, compare_reply};

const ENABLE_LOGS: bool = true;

/// Audits a peer's proof against the live platform.
///
/// Holds no state between calls. Each audit launches its own browser with a
/// profile separate from the crawl session and closes it before returning.
pub struct AuditEngine {
    launcher: Arc<dyn BrowserLauncher>,
    storage: Arc<dyn BlobStorage>,
    extractor: Arc<dyn Extractor>,
    fingerprinter: Fingerprinter,
    config: Arc<NodeConfig>,
}

/// Item ids that occur more than once, and the number of surplus copies.
fn find_duplicates(items: &[CapturedItem]) -> (Vec<String>, usize) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for item in items {
        *counts.entry(item.item_id.as_str()).or_default() += 1;
    }

    let mut ids: Vec<String> = counts
        .iter()
        .filter(|(_, count)| **count > 1)
        .map(|(id, _)| id.to_string())
        .collect();
    ids.sort();
    let surplus = counts.values().map(|count| count - 1).sum();
    (ids, surplus)
}

impl AuditEngine {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        storage: Arc<dyn BlobStorage>,
        extractor: Arc<dyn Extractor>,
        fingerprinter: Fingerprinter,
        config: Arc<NodeConfig>,
    ) -> Self {
        Self {
            launcher,
            storage,
            extractor,
            fingerprinter,
            config,
        }
    }

    fn navigation_timeout(&self) -> Duration {
        jittered(Duration::from_millis(self.config.browser.navigation_timeout_ms))
    }

    fn settle_delay(&self) -> Duration {
        jittered(Duration::from_millis(self.config.browser.settle_delay_ms))
    }

    pub async fn audit(&self, cid: &str, round: u64) -> AuditOutcome {
        let audit_id = Uuid::new_v4();
        let settings = &self.config.audit;
        log_info!("audit {audit_id}: round {round}, proof {cid}");

        let items = match fetch_submission(
            self.storage.as_ref(),
            cid,
            &settings.blob_file_name,
            settings.fetch_attempts,
            Duration::from_millis(settings.fetch_backoff_ms),
        )
        .await
        {
            Ok(items) if items.is_empty() => {
                log_warn!("audit {audit_id}: submission is empty");
                return AuditOutcome::Inconclusive {
                    reason: "submission is empty".into(),
                };
            }
            Ok(items) => items,
            Err(err) => {
                log_warn!("audit {audit_id}: {err}");
                return AuditOutcome::Inconclusive {
                    reason: err.to_string(),
                };
            }
        };

        let (duplicate_ids, surplus) = find_duplicates(&items);
        let duplicate_risk = surplus > settings.duplicate_threshold;
        if duplicate_risk {
            log_warn!(
                "audit {audit_id}: {surplus} duplicate entries across {} ids",
                duplicate_ids.len()
            );
        }

        let sample: Vec<CapturedItem> = {
            let mut rng = rand::thread_rng();
            items
                .choose_multiple(&mut rng, settings.sample_size.max(1))
                .cloned()
                .collect()
        };
        let sampled: Vec<String> = sample.iter().map(|item| item.item_id.clone()).collect();

        let reasons = match self.verify_sample(&sample, round).await {
            Ok(reasons) => reasons,
            Err(err) => {
                log_warn!("audit {audit_id}: live lookup failed: {err:#}");
                return AuditOutcome::Inconclusive {
                    reason: format!("live lookup failed: {err}"),
                };
            }
        };

        let verdict = AuditVerdict::from_reasons(reasons);
        if verdict.pass {
            log_info!("audit {audit_id}: pass");
        } else {
            let summary: Vec<String> = verdict.reasons.iter().map(ToString::to_string).collect();
            log_warn!("audit {audit_id}: fail ({})", summary.join("; "));
        }

        AuditOutcome::Completed(AuditReport {
            audit_id,
            content_identifier: cid.to_string(),
            round,
            verdict,
            duplicate_ids,
            duplicate_risk,
            sampled,
        })
    }

    async fn verify_sample(
        &self,
        sample: &[CapturedItem],
        round: u64,
    ) -> Result<Vec<MismatchReason>> {
        let mut browser = self
            .launcher
            .launch(&LaunchOptions::audit(&self.config))
            .await?;

        let result = self.verify_with_browser(browser.as_mut(), sample, round).await;

        if let Err(err) = browser.close().await {
            log_warn!("Failed to close audit browser: {err:#}");
        }
        result
    }

    async fn verify_with_browser(
        &self,
        browser: &mut dyn Browser,
        sample: &[CapturedItem],
        round: u64,
    ) -> Result<Vec<MismatchReason>> {
        let mut page = browser.new_page().await?;
        let mut reasons = Vec::new();
        let mut outcome = Ok(());

        for item in sample {
            match self.verify_item(page.as_mut(), item, round).await {
                Ok(found) => reasons.extend(found),
                Err(err) => {
                    outcome = Err(err);
                    break;
                }
            }
        }

        if let Err(err) = page.close().await {
            log_warn!("Failed to close audit tab: {err:#}");
        }
        outcome.map(|_| reasons)
    }

    async fn visit(&self, page: &mut dyn Page, url: &str) -> Result<bool> {
        page.goto(url, self.navigation_timeout()).await?;
        page.pause(self.settle_delay()).await;
        Ok(!page.exists(platform::NOT_FOUND_INDICATOR).await?)
    }

    async fn find_article(&self, page: &dyn Page, item_id: &str) -> Result<Option<ParsedItem>> {
        for markup in page.outer_html_all(platform::THREAD_ARTICLE).await? {
            if let Ok(parsed) = self.extractor.parse_item(&markup) {
                if parsed.item_id == item_id {
                    return Ok(Some(parsed));
                }
            }
        }
        Ok(None)
    }

    async fn verify_item(
        &self,
        page: &mut dyn Page,
        item: &CapturedItem,
        round: u64,
    ) -> Result<Vec<MismatchReason>> {
        if item.item_id.is_empty() {
            return Ok(vec![MismatchReason::MissingItemId]);
        }

        let mut reasons = Vec::new();

        if let Some(reply) = &item.reply {
            let url = platform::status_url(&reply.author_handle, &reply.reply_id);
            if !self.visit(page, &url).await? {
                return Ok(vec![MismatchReason::ReplyUnavailable {
                    reply_id: reply.reply_id.clone(),
                }]);
            }
            match self.find_article(page, &reply.reply_id).await? {
                Some(live) => reasons.extend(compare_reply(
                    reply,
                    &live,
                    self.config.audit.time_tolerance_secs,
                )),
                None => reasons.push(MismatchReason::ReplyMissing {
                    reply_id: reply.reply_id.clone(),
                }),
            }
        }

        if !self.visit(page, &platform::item_permalink(&item.item_id)).await? {
            reasons.push(MismatchReason::OriginalUnavailable {
                item_id: item.item_id.clone(),
            });
            return Ok(reasons);
        }

        match self.find_article(page, &item.item_id).await? {
            Some(live) => reasons.extend(compare_original(item, &live, round, &self.fingerprinter)),
            None => reasons.push(MismatchReason::OriginalUnavailable {
                item_id: item.item_id.clone(),
            }),
        }

        Ok(reasons)
    }
}
