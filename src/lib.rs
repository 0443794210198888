pub mod activity_sync;
pub mod config;
pub mod error;
pub mod garmin_client;
pub mod metrics_helper;
pub mod normalize;
pub mod session;
