//! Periodic deactivation of expired sessions

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::session::SessionStore;

/// Run one sweep, logging the outcome
pub async fn sweep_once(sessions: &SessionStore) {
    match sessions.sweep_expired().await {
        Ok(0) => {}
        Ok(count) => info!("Deactivated {} expired session(s)", count),
        Err(e) => error!("Session sweep failed: {}", e),
    }
}

/// Start the sweep on `schedule` (cron with seconds). The returned scheduler
/// must be kept alive for the job to keep running.
pub async fn start_session_sweeper(sessions: SessionStore, schedule: &str) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let job = Job::new_async(schedule, move |_, _| {
        let sessions = sessions.clone();
        Box::pin(async move {
            sweep_once(&sessions).await;
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    info!("Started session sweeper with schedule: {}", schedule);
    Ok(scheduler)
}
