use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tracing::{debug, info};

use crate::config::Endpoints;
use crate::error::{SyncError, UpstreamError};
use crate::metrics_helper;
use crate::session::{self, Credential, USER_AGENT};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(240);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(360);

/// Activity as returned by the list endpoint. Upstream omits fields freely, so
/// everything except the ID is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySummary {
    #[serde(deserialize_with = "id_as_string")]
    pub activity_id: String,
    pub activity_name: Option<String>,
    #[serde(alias = "activityTypeDTO")]
    pub activity_type: Option<ActivityType>,
    pub start_time_local: Option<String>,
    /// Meters.
    pub distance: Option<f64>,
    /// Seconds.
    pub duration: Option<f64>,
    pub steps: Option<serde_json::Number>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityType {
    pub type_key: Option<String>,
}

/// Per-activity detail document. Only the summary section is used.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityDetail {
    #[serde(rename = "summaryDTO", default)]
    pub summary: Option<SummaryDto>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryDto {
    #[serde(rename = "averageHR")]
    pub average_hr: Option<serde_json::Number>,
    pub average_heart_rate: Option<serde_json::Number>,
    pub total_elevation_gain: Option<serde_json::Number>,
    pub elevation_gain: Option<serde_json::Number>,
}

fn id_as_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        Text(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Number(n) => n.to_string(),
        RawId::Text(s) => s,
    })
}

/// Read side of the activity service.
///
/// Calls are awaited one at a time; implementations need not be `Send`.
#[async_trait(?Send)]
pub trait ActivityApi {
    async fn list_activities(
        &self,
        offset: u32,
        limit: u32,
        filter: Option<&str>,
    ) -> Result<Vec<ActivitySummary>, UpstreamError>;

    async fn get_detail(&self, activity_id: &str) -> Result<ActivityDetail, UpstreamError>;

    /// Release the underlying connection pool.
    fn close(self)
    where
        Self: Sized;
}

pub struct GarminClient {
    http: reqwest::Client,
    base_url: String,
    auth_header: String,
}

impl GarminClient {
    /// Build a client from a credential snapshot, refreshing the access token
    /// first if it has expired. The refreshed token is kept in memory only.
    pub async fn connect(snapshot: &[u8], endpoints: &Endpoints) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(UpstreamError::Network)?;

        let mut credential = Credential::import(snapshot)?;
        if credential.is_expired() {
            info!("Access token expired, refreshing");
            credential = session::refresh_credential(&http, &endpoints.token_url, &credential).await?;
        }

        Ok(Self::with_credential(http, &endpoints.api_base, &credential))
    }

    pub fn with_credential(http: reqwest::Client, base_url: &str, credential: &Credential) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header: credential.authorization_header(),
        }
    }

    fn list_url(&self) -> String {
        format!("{}/activitylist-service/activities/search/activities", self.base_url)
    }

    fn detail_url(&self, activity_id: &str) -> String {
        format!("{}/activity-service/activity/{activity_id}", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, UpstreamError> {
        debug!("GET {url}");

        let response = self
            .http
            .get(url)
            .header("Authorization", &self.auth_header)
            .query(query)
            .send()
            .await
            .inspect_err(|_e| metrics_helper::increment_garmin_api_failure())?;

        let status = response.status();
        if !status.is_success() {
            metrics_helper::increment_garmin_api_failure();
            return Err(UpstreamError::Http { status });
        }

        let body = response
            .text()
            .await
            .inspect_err(|_e| metrics_helper::increment_garmin_api_failure())?;

        let parsed: T = serde_json::from_str(&body)
            .inspect_err(|_e| metrics_helper::increment_garmin_api_failure())?;

        metrics_helper::increment_garmin_api_success();
        Ok(parsed)
    }
}

#[async_trait(?Send)]
impl ActivityApi for GarminClient {
    async fn list_activities(
        &self,
        offset: u32,
        limit: u32,
        filter: Option<&str>,
    ) -> Result<Vec<ActivitySummary>, UpstreamError> {
        let mut query = vec![("start", offset.to_string()), ("limit", limit.to_string())];
        if let Some(type_key) = filter {
            query.push(("activityType", type_key.to_string()));
        }
        self.get_json(&self.list_url(), &query).await
    }

    async fn get_detail(&self, activity_id: &str) -> Result<ActivityDetail, UpstreamError> {
        self.get_json(&self.detail_url(activity_id), &[]).await
    }

    fn close(self) {
        debug!("Closing activity API client");
        drop(self.http);
    }
}
