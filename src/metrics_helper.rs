use metrics::counter;

/// Error/Reliability Metrics - Success/Failure pairs
pub fn increment_garmin_api_success() {
    counter!("garmin_api_total", "result" => "success").increment(1);
}

pub fn increment_garmin_api_failure() {
    counter!("garmin_api_total", "result" => "failure").increment(1);
}

pub fn increment_store_commit_success() {
    counter!("store_commit_total", "result" => "success").increment(1);
}

pub fn increment_store_commit_failure() {
    counter!("store_commit_total", "result" => "failure").increment(1);
}

pub fn increment_sync_success() {
    counter!("sync_total", "result" => "success").increment(1);
}

pub fn increment_sync_failure() {
    counter!("sync_total", "result" => "failure").increment(1);
}

/// Business Logic Metrics
pub fn increment_activities_skipped_known(count: u64) {
    counter!("activities_skipped_known").increment(count);
}

pub fn increment_activities_new(count: u64) {
    counter!("activities_new").increment(count);
}
