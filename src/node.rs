use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use chrono::Utc;
use log::{info, warn};
use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    audit::AuditEngine,
    browser::BrowserLauncher,
    capture::{CapturePipeline, CaptureSummary, ReplyGenerator},
    config::{Credentials, NodeConfig},
    db::Database,
    error::NodeResult,
    extract::Extractor,
    fingerprint::Fingerprinter,
    governor::{CooldownGovernor, RuntimeWindowGovernor},
    host::TaskHost,
    models::AuditOutcome,
    session::SessionManager,
    storage::BlobStorage,
    submission::SubmissionBuilder,
};

/// External collaborators the node is wired to.
pub struct Collaborators {
    pub launcher: Arc<dyn BrowserLauncher>,
    pub storage: Arc<dyn BlobStorage>,
    pub extractor: Arc<dyn Extractor>,
    pub replies: Arc<dyn ReplyGenerator>,
    pub host: Arc<dyn TaskHost>,
}

/// One crawl–commit–verify participant.
///
/// The runner drives it: `start` once, then `crawl_round`, `submit_round`
/// and `audit` as the task runtime schedules them, and `stop` on shutdown.
/// Fatal errors are returned, never acted on here.
pub struct ArchiveNode {
    config: Arc<NodeConfig>,
    session: Mutex<SessionManager>,
    capture: CapturePipeline,
    runtime: RuntimeWindowGovernor,
    submission: SubmissionBuilder,
    auditor: AuditEngine,
    host: Arc<dyn TaskHost>,
    cancel: CancellationToken,
    running: AtomicBool,
}

impl ArchiveNode {
    pub fn new(
        config: NodeConfig,
        credentials: Credentials,
        db: Database,
        collaborators: Collaborators,
    ) -> Self {
        let config = Arc::new(config);
        let cancel = CancellationToken::new();
        let fingerprinter = Fingerprinter::new(config.fingerprint.clone());
        let cooldown = Arc::new(CooldownGovernor::new(db.clone(), config.cooldown.clone()));

        let session = SessionManager::new(
            collaborators.launcher.clone(),
            db.clone(),
            credentials,
            config.clone(),
        );
        let capture = CapturePipeline::new(
            db.clone(),
            collaborators.extractor.clone(),
            fingerprinter.clone(),
            cooldown,
            collaborators.replies,
            config.clone(),
            cancel.clone(),
        );
        let runtime =
            RuntimeWindowGovernor::new(collaborators.host.clone(), config.runtime.clone());
        let submission = SubmissionBuilder::new(
            db,
            collaborators.storage.clone(),
            collaborators.host.clone(),
            config.audit.blob_file_name.clone(),
        );
        let auditor = AuditEngine::new(
            collaborators.launcher,
            collaborators.storage,
            collaborators.extractor,
            fingerprinter,
            config.clone(),
        );

        Self {
            config,
            session: Mutex::new(session),
            capture,
            runtime,
            submission,
            auditor,
            host: collaborators.host,
            cancel,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Establish the crawl session. A failure here is fatal for the node.
    pub async fn start(&self) -> NodeResult<()> {
        self.running.store(true, Ordering::SeqCst);
        let mut session = self.session.lock().await;
        match session.ensure_session().await {
            Ok(_) => {
                info!("Node started");
                Ok(())
            }
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    async fn window_open(&self) -> bool {
        match self.runtime.is_active(Utc::now()).await {
            Ok(active) => active,
            Err(err) => {
                warn!("Runtime window unavailable, staying idle: {err:#}");
                false
            }
        }
    }

    /// One search pass for `round`. `None` when the node is stopped or
    /// outside its runtime window.
    pub async fn crawl_round(&self, round: u64) -> NodeResult<Option<CaptureSummary>> {
        if !self.is_running() {
            return Ok(None);
        }
        if !self.window_open().await {
            info!("round {round}: outside runtime window, not crawling");
            return Ok(None);
        }

        let term = {
            let mut rng = rand::thread_rng();
            self.config.search_terms.choose(&mut rng).cloned()
        };
        let Some(term) = term else {
            warn!("round {round}: no search terms configured");
            return Ok(None);
        };

        let mut session = self.session.lock().await;
        let summary = self
            .capture
            .search(&mut session, &term, round, &self.config.reply_template)
            .await?;
        Ok(Some(summary))
    }

    /// Crawl whatever round the host is currently in.
    pub async fn crawl_current_round(&self) -> NodeResult<Option<CaptureSummary>> {
        self.crawl_round(self.host.current_round()).await
    }

    pub async fn submit_round(&self, round: u64) -> Option<String> {
        self.submission.publish(round).await
    }

    pub async fn audit(&self, cid: &str, round: u64) -> AuditOutcome {
        if !self.window_open().await {
            info!("audit of {cid} skipped: outside runtime window");
            return AuditOutcome::Skipped;
        }
        self.auditor.audit(cid, round).await
    }

    /// Signal the capture loop to stop at its next checkpoint, then close the
    /// crawl browser once the loop has let go of the session.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.cancel.cancel();
        self.session.lock().await.close().await;
        info!("Node stopped");
    }
}
