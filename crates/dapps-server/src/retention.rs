use std::time::Duration;

use dapps_store::{KeepForever, PurgeForwardedAfter, RetentionPolicy, SharedDatabase};
use tracing::warn;

/// How often the retention policy is applied.
pub const PURGE_INTERVAL: Duration = Duration::from_secs(3600);

/// Policy for the configured number of days; `None` keeps everything.
pub fn policy_for(retention_days: Option<u32>) -> Box<dyn RetentionPolicy> {
    match retention_days {
        Some(days) => Box::new(PurgeForwardedAfter(chrono::Duration::days(i64::from(days)))),
        None => Box::new(KeepForever),
    }
}

/// Apply `policy` every [`PURGE_INTERVAL`], forever.
pub async fn run(store: SharedDatabase, policy: Box<dyn RetentionPolicy>) {
    let mut interval = tokio::time::interval(PURGE_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = store.with(|db| db.apply_retention(policy.as_ref())) {
            warn!(error = %e, "retention pass failed");
        }
    }
}
