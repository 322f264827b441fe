use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use log::debug;
use tokio::sync::Mutex;

use crate::{
    config::CooldownSettings, db::Database, models::CooldownState, utils::random_between,
};

const COOLDOWN_KEY: &str = "interaction_cooldown";

/// Gates write interactions (replies) behind a randomized cooldown.
///
/// A granted permission stamps the state immediately, so a caller that never
/// reports back still cannot obtain a second grant inside the window.
pub struct CooldownGovernor {
    db: Database,
    settings: CooldownSettings,
    guard: Mutex<()>,
}

impl CooldownGovernor {
    pub fn new(db: Database, settings: CooldownSettings) -> Self {
        Self {
            db,
            settings,
            guard: Mutex::new(()),
        }
    }

    fn draw_threshold(&self) -> Duration {
        let minutes = random_between(self.settings.min_minutes, self.settings.max_minutes);
        Duration::seconds((minutes * 60) as i64)
    }

    async fn load(&self) -> Result<CooldownState> {
        Ok(self.db.kv_get(COOLDOWN_KEY).await?.unwrap_or_default())
    }

    async fn stamp(&self, at: DateTime<Utc>) -> Result<()> {
        let state = CooldownState {
            last_interaction_at: Some(at),
        };
        self.db.kv_set(COOLDOWN_KEY, &state).await
    }

    pub async fn may_interact(&self, now: DateTime<Utc>) -> Result<bool> {
        let _guard = self.guard.lock().await;
        let state = self.load().await?;

        let allowed = match state.last_interaction_at {
            None => true,
            Some(last) => {
                let threshold = self.draw_threshold();
                let elapsed = now - last;
                debug!(
                    "Cooldown check: {}s elapsed, {}s required",
                    elapsed.num_seconds(),
                    threshold.num_seconds()
                );
                elapsed > threshold
            }
        };

        if allowed {
            self.stamp(now).await?;
        }
        Ok(allowed)
    }

    /// Called after an interaction actually went through.
    pub async fn record_interaction(&self, at: DateTime<Utc>) -> Result<()> {
        let _guard = self.guard.lock().await;
        let state = self.load().await?;
        if state.last_interaction_at.map_or(true, |last| at > last) {
            self.stamp(at).await?;
        }
        Ok(())
    }
}
