//! Lease-based leader election.
//!
//! Two controllers scaling the same workload would fight each other, so in HA
//! deployments only the holder of a `coordination.k8s.io/v1` Lease runs the
//! reconcile loop. Standby replicas wait in [`LeaderElection::acquire`] and
//! take over once the incumbent's lease goes stale. Conflicting writes are
//! resolved by the apiserver's optimistic concurrency: a 409 simply means
//! another replica won the race, and the loser keeps waiting.

use crate::error::{OperatorError, Result};
use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const SERVICE_ACCOUNT_NAMESPACE_PATH: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Knobs for the election Lease
#[derive(Debug, Clone)]
pub struct LeaseSettings {
    /// Name of the Lease object
    pub lease_name: String,
    /// How long a renewal stays valid before standbys may take over
    pub lease_duration: Duration,
    /// How often the holder renews
    pub renew_interval: Duration,
    /// How often a standby re-checks the lease
    pub retry_interval: Duration,
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self {
            lease_name: "chpa-operator-leader".to_string(),
            lease_duration: Duration::from_secs(15),
            renew_interval: Duration::from_secs(10),
            retry_interval: Duration::from_secs(5),
        }
    }
}

/// Resolves the namespace the election Lease lives in.
///
/// An explicit flag wins, then the in-cluster service account mount, then
/// `"default"`.
pub fn detect_namespace(flag: &str) -> String {
    if !flag.is_empty() {
        return flag.to_string();
    }
    std::fs::read_to_string(SERVICE_ACCOUNT_NAMESPACE_PATH)
        .ok()
        .map(|contents| contents.trim().to_string())
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| "default".to_string())
}

/// One replica's participation in the election.
pub struct LeaderElection {
    api: Api<Lease>,
    identity: String,
    settings: LeaseSettings,
}

impl LeaderElection {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self::with_settings(client, namespace, LeaseSettings::default())
    }

    pub fn with_settings(client: Client, namespace: &str, settings: LeaseSettings) -> Self {
        let identity = default_identity();
        info!(
            identity = %identity,
            namespace = %namespace,
            lease = %settings.lease_name,
            "Joining leader election"
        );
        Self {
            api: Api::namespaced(client, namespace),
            identity,
            settings,
        }
    }

    /// This replica's holder identity on the Lease.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Waits until this replica holds the lease.
    pub async fn acquire(&self) -> Result<()> {
        info!(lease = %self.settings.lease_name, "Waiting for leadership");
        loop {
            match self.ensure_leader().await {
                Ok(true) => {
                    info!(identity = %self.identity, "Became leader");
                    return Ok(());
                }
                Ok(false) => debug!("Lease held elsewhere, standing by"),
                Err(err) => warn!(error = %err, "Lease check failed, standing by"),
            }
            tokio::time::sleep(self.settings.retry_interval).await;
        }
    }

    /// Renews the lease on a ticker and returns once leadership is gone,
    /// whether lost to another replica or unrenewable due to API errors.
    pub async fn keep_renewing(&self) {
        let mut ticker = tokio::time::interval(self.settings.renew_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match self.ensure_leader().await {
                Ok(true) => debug!("Lease renewed"),
                Ok(false) => {
                    warn!("Another replica holds the lease now");
                    return;
                }
                Err(err) => {
                    warn!(error = %err, "Could not renew the lease");
                    return;
                }
            }
        }
    }

    /// Gives up the lease so a standby can take over without waiting for
    /// expiry. Best-effort: a failed handoff only costs the takeover delay.
    pub async fn resign(&self) {
        let name = &self.settings.lease_name;
        match self.api.get_opt(name).await {
            Ok(Some(lease)) if holder_of(&lease) == Some(self.identity.as_str()) => {
                let clear = serde_json::json!({
                    "spec": {
                        "holderIdentity": null,
                        "renewTime": null,
                    }
                });
                match self
                    .api
                    .patch(name, &PatchParams::default(), &Patch::Merge(&clear))
                    .await
                {
                    Ok(_) => info!("Handed off the leader lease"),
                    Err(err) => warn!(error = %err, "Could not hand off the leader lease"),
                }
            }
            Ok(_) => debug!("Lease is not ours, nothing to hand off"),
            Err(err) => warn!(error = %err, "Could not read the lease during handoff"),
        }
    }

    /// Single claim step: create the lease, renew our own hold, or take over
    /// an expired one. `Ok(false)` means another replica currently leads.
    async fn ensure_leader(&self) -> Result<bool> {
        let now = Utc::now();
        match self.api.get_opt(&self.settings.lease_name).await? {
            None => self.create_lease(now).await,
            Some(lease) => {
                if holder_of(&lease) == Some(self.identity.as_str()) {
                    self.write_claim(lease, now, false).await
                } else if lease_expired(&lease, now, self.settings.lease_duration) {
                    self.write_claim(lease, now, true).await
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn create_lease(&self, now: DateTime<Utc>) -> Result<bool> {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.settings.lease_name.clone()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(self.settings.lease_duration.as_secs() as i32),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_transitions: Some(0),
                preferred_holder: None,
                strategy: None,
            }),
        };
        match self.api.create(&PostParams::default(), &lease).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Stamps our identity and a fresh renew time onto the lease. A takeover
    /// additionally resets the acquire time and bumps the transition counter.
    async fn write_claim(&self, mut lease: Lease, now: DateTime<Utc>, takeover: bool) -> Result<bool> {
        let spec = lease.spec.get_or_insert_with(Default::default);
        if takeover {
            spec.acquire_time = Some(MicroTime(now));
            spec.lease_transitions = Some(spec.lease_transitions.unwrap_or(0) + 1);
        }
        spec.holder_identity = Some(self.identity.clone());
        spec.lease_duration_seconds = Some(self.settings.lease_duration.as_secs() as i32);
        spec.renew_time = Some(MicroTime(now));

        match self
            .api
            .replace(&self.settings.lease_name, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
            Err(err) => Err(OperatorError::KubeApi(format!(
                "lease write failed: {}",
                err
            ))),
        }
    }
}

fn default_identity() -> String {
    std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("chpa-operator-{:06x}", rand::random::<u32>() & 0xff_ffff))
}

/// The current holder identity, if any.
fn holder_of(lease: &Lease) -> Option<&str> {
    lease
        .spec
        .as_ref()
        .and_then(|spec| spec.holder_identity.as_deref())
}

/// A lease with no renew time is stale; otherwise it expires one lease
/// duration after the last renewal. The duration recorded on the lease wins
/// over our own setting so mixed configurations stay consistent.
fn lease_expired(lease: &Lease, now: DateTime<Utc>, fallback_duration: Duration) -> bool {
    let spec = lease.spec.as_ref();
    let Some(MicroTime(renewed)) = spec.and_then(|s| s.renew_time.as_ref()) else {
        return true;
    };
    let duration_secs = spec
        .and_then(|s| s.lease_duration_seconds)
        .map(i64::from)
        .unwrap_or(fallback_duration.as_secs() as i64);
    now.signed_duration_since(*renewed).num_seconds() > duration_secs
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn lease_with(renewed: Option<DateTime<Utc>>, duration: Option<i32>, holder: Option<&str>) -> Lease {
        Lease {
            metadata: ObjectMeta::default(),
            spec: Some(LeaseSpec {
                holder_identity: holder.map(str::to_string),
                lease_duration_seconds: duration,
                acquire_time: None,
                renew_time: renewed.map(MicroTime),
                lease_transitions: None,
                preferred_holder: None,
                strategy: None,
            }),
        }
    }

    #[test]
    fn test_lease_without_renew_time_is_expired() {
        let lease = lease_with(None, Some(15), Some("other"));
        assert!(lease_expired(&lease, at(0), Duration::from_secs(15)));
    }

    #[test]
    fn test_fresh_lease_is_not_expired() {
        let lease = lease_with(Some(at(0)), Some(15), Some("other"));
        assert!(!lease_expired(&lease, at(10), Duration::from_secs(15)));
    }

    #[test]
    fn test_stale_lease_is_expired() {
        let lease = lease_with(Some(at(0)), Some(15), Some("other"));
        assert!(lease_expired(&lease, at(16), Duration::from_secs(15)));
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        // exactly one duration after renewal the lease still counts as held
        let lease = lease_with(Some(at(0)), Some(15), Some("other"));
        assert!(!lease_expired(&lease, at(15), Duration::from_secs(15)));
    }

    #[test]
    fn test_recorded_duration_wins_over_fallback() {
        let lease = lease_with(Some(at(0)), Some(60), Some("other"));
        assert!(!lease_expired(&lease, at(30), Duration::from_secs(15)));

        let lease = lease_with(Some(at(0)), None, Some("other"));
        assert!(lease_expired(&lease, at(30), Duration::from_secs(15)));
    }

    #[test]
    fn test_holder_of() {
        let lease = lease_with(Some(at(0)), Some(15), Some("replica-a"));
        assert_eq!(holder_of(&lease), Some("replica-a"));

        let empty = Lease::default();
        assert_eq!(holder_of(&empty), None);
    }

    #[test]
    fn test_lease_settings_defaults() {
        let settings = LeaseSettings::default();
        assert_eq!(settings.lease_name, "chpa-operator-leader");
        assert!(settings.renew_interval < settings.lease_duration);
        assert!(settings.retry_interval < settings.lease_duration);
    }

    #[test]
    fn test_detect_namespace_explicit_flag_wins() {
        assert_eq!(detect_namespace("operators"), "operators");
    }
}
