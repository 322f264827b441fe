use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use log::info;

use crate::{
    config::RuntimeWindowSettings, host::TaskHost, models::RuntimeWindow, utils::random_between,
};

const RUNTIME_WINDOW_KEY: &str = "runtime_window";

/// Bounds how long the node operates per day.
///
/// The schedule lives in the host store so a restarted node resumes the
/// window it was in instead of opening a fresh one.
pub struct RuntimeWindowGovernor {
    host: Arc<dyn TaskHost>,
    settings: RuntimeWindowSettings,
}

fn minutes_between(min: u64, max: u64) -> Duration {
    Duration::minutes(random_between(min, max) as i64)
}

impl RuntimeWindowGovernor {
    pub fn new(host: Arc<dyn TaskHost>, settings: RuntimeWindowSettings) -> Self {
        Self { host, settings }
    }

    async fn load(&self) -> Result<RuntimeWindow> {
        match self.host.store_get(RUNTIME_WINDOW_KEY).await? {
            Some(value) => serde_json::from_value(value)
                .with_context(|| format!("stored {RUNTIME_WINDOW_KEY} has an unexpected shape")),
            None => Ok(RuntimeWindow::default()),
        }
    }

    async fn save(&self, window: &RuntimeWindow) -> Result<()> {
        self.host
            .store_set(RUNTIME_WINDOW_KEY, serde_json::to_value(window)?)
            .await
    }

    pub async fn current(&self) -> Result<RuntimeWindow> {
        self.load().await
    }

    /// Whether the node may operate at `now`, advancing the schedule as needed.
    pub async fn is_active(&self, now: DateTime<Utc>) -> Result<bool> {
        let window = self.load().await?;
        let grace = Duration::minutes(self.settings.grace_minutes as i64);

        let start_reached = window.window_start_at.map_or(true, |start| start <= now);
        let stop_expired = window.window_stop_at.map_or(true, |stop| now > stop + grace);
        let stop_pending = window.window_stop_at.is_some_and(|stop| stop > now);

        if start_reached && (stop_pending || stop_expired) {
            if stop_expired {
                let stop = now
                    + minutes_between(
                        self.settings.min_runtime_minutes,
                        self.settings.max_runtime_minutes,
                    );
                info!("Opening runtime window until {stop}");
                self.save(&RuntimeWindow {
                    window_start_at: None,
                    window_stop_at: Some(stop),
                })
                .await?;
            }
            return Ok(true);
        }

        if window.window_start_at.is_none() {
            let start = now
                + minutes_between(self.settings.min_gap_minutes, self.settings.max_gap_minutes);
            info!("Runtime budget spent, next window opens at {start}");
            self.save(&RuntimeWindow {
                window_start_at: Some(start),
                window_stop_at: None,
            })
            .await?;
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::{db::Database, host::LocalTaskHost};

    fn governor() -> (tempfile::TempDir, RuntimeWindowGovernor) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("node.sqlite3")).unwrap();
        let host = Arc::new(LocalTaskHost::new(db, PathBuf::from("."), "node"));
        (
            dir,
            RuntimeWindowGovernor::new(host, RuntimeWindowSettings::default()),
        )
    }

    #[tokio::test]
    async fn fresh_node_opens_a_window_of_two_to_four_hours() {
        let (_dir, governor) = governor();
        let now = Utc::now();

        assert!(governor.is_active(now).await.unwrap());
        let window = governor.current().await.unwrap();
        let length = window.window_stop_at.unwrap() - now;
        assert!(length >= Duration::hours(2) && length <= Duration::hours(4));
        assert!(window.window_start_at.is_none());
    }

    #[tokio::test]
    async fn window_stays_open_until_its_stop_time() {
        let (_dir, governor) = governor();
        let now = Utc::now();
        governor.is_active(now).await.unwrap();
        let stop = governor.current().await.unwrap().window_stop_at.unwrap();

        assert!(governor.is_active(now + Duration::minutes(90)).await.unwrap());
        assert_eq!(
            governor.current().await.unwrap().window_stop_at,
            Some(stop)
        );
    }

    #[tokio::test]
    async fn spent_window_schedules_the_next_one_four_to_twelve_hours_out() {
        let (_dir, governor) = governor();
        let now = Utc::now();
        governor.is_active(now).await.unwrap();

        let after = now + Duration::hours(5);
        assert!(!governor.is_active(after).await.unwrap());
        let next = governor.current().await.unwrap().window_start_at.unwrap();
        assert!(next - after >= Duration::hours(4) && next - after <= Duration::hours(12));

        // Still inactive before the scheduled start, and the schedule is kept.
        assert!(!governor.is_active(after + Duration::hours(1)).await.unwrap());
        assert_eq!(
            governor.current().await.unwrap().window_start_at,
            Some(next)
        );

        assert!(governor.is_active(next + Duration::minutes(1)).await.unwrap());
    }

    #[tokio::test]
    async fn stale_state_past_the_grace_period_is_reset() {
        let (_dir, governor) = governor();
        let now = Utc::now();
        governor
            .save(&RuntimeWindow {
                window_start_at: None,
                window_stop_at: Some(now - Duration::hours(7)),
            })
            .await
            .unwrap();

        assert!(governor.is_active(now).await.unwrap());
        assert!(governor.current().await.unwrap().window_stop_at.unwrap() > now);
    }
}
