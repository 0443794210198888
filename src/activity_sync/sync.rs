use std::collections::HashSet;

use function_timer::time;
use tracing::{error, info};

use super::{ActivityStore, ActivitySync, MergeStrategy};
use crate::config::Config;
use crate::error::{SyncError, SyncResult};
use crate::garmin_client::{ActivityApi, ActivitySummary, GarminClient};
use crate::metrics_helper;
use crate::normalize::normalize;
use crate::session::{AuthBackend, CredentialSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncReport {
    pub listed: usize,
    pub skipped: usize,
    pub written: usize,
}

impl<A: ActivityApi> ActivitySync<'_, A> {
    /// Sync, then release the API client whether or not the sync succeeded.
    pub async fn run(mut self) -> SyncResult<SyncReport> {
        let result = self.sync_activities().await;
        self.api.close();
        result
    }

    /// Activities are handled strictly in list order, one request at a time.
    /// The first failed request ends the run: under [`MergeStrategy::Prepend`]
    /// nothing is written, under [`MergeStrategy::Append`] records committed
    /// before the failure stay on disk.
    #[time("sync_activities_duration")]
    pub async fn sync_activities(&mut self) -> SyncResult<SyncReport> {
        let activities = self
            .api
            .list_activities(0, self.count, self.filter)
            .await
            .inspect_err(|e| error!("Failed to list activities: {}", e))?;

        info!("Found {} activities", activities.len());

        let listed = activities.len();
        let new_activities = self.unseen(activities);
        let skipped = listed - new_activities.len();
        metrics_helper::increment_activities_skipped_known(skipped as u64);

        info!(
            "Skipping {} known activities, fetching details for {}",
            skipped,
            new_activities.len()
        );

        let mut pending = Vec::new();
        let mut written = 0;

        for summary in &new_activities {
            info!(
                "Processing activity: {} (ID: {})",
                summary.activity_name.as_deref().unwrap_or("unnamed"),
                summary.activity_id
            );

            let detail = self
                .api
                .get_detail(&summary.activity_id)
                .await
                .inspect_err(|e| {
                    error!("Failed to fetch detail for activity {}: {}", summary.activity_id, e)
                })?;

            let record = normalize(summary, &detail);
            info!(
                "New activity {}: hr={}, gain={}",
                record.activity_id, record.heartrate_bpm, record.elevation_gain_m
            );

            match self.strategy {
                MergeStrategy::Append => {
                    written += self
                        .store
                        .commit(std::slice::from_ref(&record), MergeStrategy::Append)?;
                }
                MergeStrategy::Prepend => pending.push(record),
            }
        }

        if !pending.is_empty() {
            written += self.store.commit(&pending, MergeStrategy::Prepend)?;
        }

        metrics_helper::increment_activities_new(written as u64);
        info!("Committed {} new activities to {}", written, self.store.path().display());

        Ok(SyncReport {
            listed,
            skipped,
            written,
        })
    }

    /// Drop activities already stored or listed twice, keeping list order.
    fn unseen(&self, activities: Vec<ActivitySummary>) -> Vec<ActivitySummary> {
        let mut seen = HashSet::new();
        activities
            .into_iter()
            .filter(|a| !self.store.contains(&a.activity_id) && seen.insert(a.activity_id.clone()))
            .collect()
    }
}

/// Full run: blocking login, then the fetch phase on a single-threaded runtime.
pub fn run_sync<B: AuthBackend>(config: &Config, backend: &B) -> SyncResult<SyncReport> {
    let snapshot = CredentialSession::obtain(
        backend,
        &config.token_dir,
        &config.username,
        &config.password,
    )?
    .export()?;

    let mut store = ActivityStore::open(&config.output)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(SyncError::Runtime)?;

    let result = runtime.block_on(fetch_phase(config, &snapshot, &mut store));

    match &result {
        Ok(_) => metrics_helper::increment_sync_success(),
        Err(_) => metrics_helper::increment_sync_failure(),
    }
    result
}

async fn fetch_phase(
    config: &Config,
    snapshot: &[u8],
    store: &mut ActivityStore,
) -> SyncResult<SyncReport> {
    let api = GarminClient::connect(snapshot, &config.endpoints).await?;
    ActivitySync::new(
        api,
        store,
        config.strategy,
        config.count,
        config.activity_filter(),
    )
    .run()
    .await
}
