use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

use super::registry::SessionRegistry;

impl SessionRegistry {
    /// Single garbage-collection pass: sessions older than `max_age` have
    /// their page closed best-effort and are dropped from the table. Younger
    /// sessions are untouched. Returns the number of reaped sessions.
    pub async fn sweep(&self, max_age: Duration) -> usize {
        let max_age =
            chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();
        let expired = {
            let mut sessions = self.sessions.write().await;
            let expired_ids: Vec<String> = sessions
                .iter()
                .filter(|(_, session)| now - session.created_at() > max_age)
                .map(|(id, _)| id.clone())
                .collect();
            expired_ids
                .iter()
                .filter_map(|id| sessions.remove(id))
                .collect::<Vec<_>>()
        };
        for session in &expired {
            session.close_page().await;
            info!(session = %session.id(), "reaped expired capture session");
        }
        expired.len()
    }
}

/// Drives periodic sweeps for long-running deployments. The sweep itself is
/// the unit of behavior; this is just the clock around it.
pub struct SessionReaper {
    registry: Arc<SessionRegistry>,
    max_age: Duration,
    period: Duration,
}

impl SessionReaper {
    pub fn new(registry: Arc<SessionRegistry>, max_age: Duration, period: Duration) -> Self {
        Self {
            registry,
            max_age,
            period,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let reaped = self.registry.sweep(self.max_age).await;
                if reaped > 0 {
                    debug!(reaped, "session sweep complete");
                }
            }
        })
    }
}
