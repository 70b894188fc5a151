//! The per-scrape collection pipeline.
//!
//! Four phases run in order: token, identity, termination, rebalance.
//! Token and identity failures abort the scrape with no readings at all;
//! termination and rebalance failures degrade to a 0-valued availability
//! gauge and the scrape carries on. The asymmetry is intentional: the
//! instance id labels every other gauge, so without it there is nothing
//! meaningful to export.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use spotwatch_metadata::{FetchResponse, MetadataSource};

use crate::metrics::{Descriptors, Reading};

const INSTANCE_ID_PATH: &str = "instance-id";
const INSTANCE_TYPE_PATH: &str = "instance-type";
const SPOT_ACTION_PATH: &str = "spot/instance-action";
const REBALANCE_PATH: &str = "events/recommendations/rebalance";

/// Decoded `spot/instance-action` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct TerminationNotice {
    pub action: String,
    pub time: DateTime<Utc>,
}

/// Decoded `events/recommendations/rebalance` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct RebalanceNotice {
    #[serde(rename = "noticeTime")]
    pub notice_time: DateTime<Utc>,
}

/// Classification of one optional-feature endpoint fetch.
#[derive(Debug)]
pub enum EndpointState<T> {
    /// Transport-level failure; the endpoint could not be reached.
    Unreachable,
    /// The endpoint answered 404; the feature does not exist on this instance.
    Absent,
    /// The endpoint answered but the body does not decode.
    Malformed,
    /// The endpoint answered with a usable payload.
    Present(T),
}

/// Classify a completed fetch into an [`EndpointState`].
///
/// Transport errors never reach this function; callers map them to
/// [`EndpointState::Unreachable`] before classification.
pub fn classify_response<T: DeserializeOwned>(path: &str, resp: &FetchResponse) -> EndpointState<T> {
    if resp.not_found() {
        debug!(path, "endpoint not found");
        return EndpointState::Absent;
    }
    match serde_json::from_slice::<T>(&resp.body) {
        Ok(payload) => EndpointState::Present(payload),
        Err(e) => {
            // The field may legitimately hold a non-time value, so a
            // decode failure is reported but not fatal.
            error!(error = %e, path, "could not decode metadata payload");
            EndpointState::Malformed
        }
    }
}

/// Immutable collector configuration, fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct CollectorConfig {
    /// Negotiate an IMDSv2 session token before each scrape.
    pub use_imdsv2: bool,
    /// Static labels attached to every exported gauge.
    pub extra_labels: BTreeMap<String, String>,
}

/// Collects spot interruption gauges from the metadata service.
///
/// Holds no mutable state; concurrent scrapes only share the descriptor
/// set, so no locking is needed.
pub struct TerminationCollector<M> {
    source: M,
    use_imdsv2: bool,
    descriptors: Descriptors,
}

impl<M: MetadataSource> TerminationCollector<M> {
    pub fn new(source: M, config: CollectorConfig) -> Self {
        Self {
            source,
            use_imdsv2: config.use_imdsv2,
            descriptors: Descriptors::new(config.extra_labels),
        }
    }

    pub fn descriptors(&self) -> &Descriptors {
        &self.descriptors
    }

    /// Run one scrape and return its readings.
    ///
    /// Never fails: every outcome becomes a reading or a log line.
    pub async fn collect(&self) -> Vec<Reading> {
        info!("fetching termination data from the metadata service");
        let mut readings = Vec::new();

        let token = if self.use_imdsv2 {
            match self.source.negotiate_token().await {
                Ok(token) => Some(token),
                Err(e) => {
                    error!(error = %e, "could not negotiate an IMDSv2 token");
                    return readings;
                }
            }
        } else {
            None
        };
        let token = token.as_deref();

        let Some(instance_id) = self.identity(INSTANCE_ID_PATH, token).await else {
            return readings;
        };
        let Some(instance_type) = self.identity(INSTANCE_TYPE_PATH, token).await else {
            return readings;
        };

        self.termination_phase(token, &instance_id, &instance_type, &mut readings)
            .await;
        self.rebalance_phase(token, &instance_id, &instance_type, &mut readings)
            .await;

        readings
    }

    /// Fetch one half of the instance identity.
    ///
    /// Both transport errors and 404 abort the scrape: identity is a label
    /// on every other gauge, so a scrape without it emits nothing.
    async fn identity(&self, path: &str, token: Option<&str>) -> Option<String> {
        match self.source.get(path, token).await {
            Err(e) => {
                error!(error = %e, path, "could not read instance identity from metadata");
                None
            }
            Ok(resp) if resp.not_found() => {
                error!(path, "instance identity endpoint not found");
                None
            }
            Ok(resp) => Some(resp.text()),
        }
    }

    async fn termination_phase(
        &self,
        token: Option<&str>,
        instance_id: &str,
        instance_type: &str,
        readings: &mut Vec<Reading>,
    ) {
        let state = match self.source.get(SPOT_ACTION_PATH, token).await {
            Err(e) => {
                error!(error = %e, "failed to fetch data from the metadata service");
                EndpointState::Unreachable
            }
            Ok(resp) => classify_response::<TerminationNotice>(SPOT_ACTION_PATH, &resp),
        };

        let available = &self.descriptors.service_available;
        let imminent = &self.descriptors.termination_imminent;

        match state {
            EndpointState::Unreachable => {
                readings.push(available.reading(0.0, vec![instance_id.to_string()]));
            }
            EndpointState::Absent | EndpointState::Malformed => {
                readings.push(available.reading(1.0, vec![instance_id.to_string()]));
                readings.push(imminent.reading(
                    0.0,
                    vec![
                        String::new(),
                        instance_id.to_string(),
                        instance_type.to_string(),
                    ],
                ));
            }
            EndpointState::Present(notice) => {
                info!(action = %notice.action, time = %notice.time, "instance-action endpoint available");
                readings.push(available.reading(1.0, vec![instance_id.to_string()]));
                readings.push(imminent.reading(
                    1.0,
                    vec![
                        notice.action,
                        instance_id.to_string(),
                        instance_type.to_string(),
                    ],
                ));

                let remaining = notice.time.signed_duration_since(Utc::now());
                if remaining > chrono::Duration::zero() {
                    readings.push(self.descriptors.termination_in.reading(
                        remaining.num_milliseconds() as f64 / 1000.0,
                        vec![instance_id.to_string(), instance_type.to_string()],
                    ));
                }
            }
        }
    }

    async fn rebalance_phase(
        &self,
        token: Option<&str>,
        instance_id: &str,
        instance_type: &str,
        readings: &mut Vec<Reading>,
    ) {
        let state = match self.source.get(REBALANCE_PATH, token).await {
            Err(e) => {
                error!(error = %e, "failed to fetch events data from the metadata service");
                EndpointState::Unreachable
            }
            Ok(resp) => classify_response::<RebalanceNotice>(REBALANCE_PATH, &resp),
        };

        let available = &self.descriptors.events_available;
        let recommended = &self.descriptors.rebalance_recommended;

        match state {
            EndpointState::Unreachable => {
                readings.push(available.reading(0.0, vec![instance_id.to_string()]));
            }
            EndpointState::Absent | EndpointState::Malformed => {
                readings.push(available.reading(1.0, vec![instance_id.to_string()]));
                readings.push(recommended.reading(
                    0.0,
                    vec![instance_id.to_string(), instance_type.to_string()],
                ));
            }
            EndpointState::Present(notice) => {
                info!(notice_time = %notice.notice_time, "rebalance recommendation endpoint available");
                readings.push(available.reading(1.0, vec![instance_id.to_string()]));
                readings.push(recommended.reading(
                    1.0,
                    vec![instance_id.to_string(), instance_type.to_string()],
                ));
            }
        }
    }
}
