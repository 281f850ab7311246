use std::time::Duration;

use crate::error::{BeaconError, Result};

/// Default lease timeout after which a leadership record may be reclaimed.
pub const DEFAULT_LEASE_TIMEOUT_SECS: u64 = 30;
/// Default interval between leadership claim attempts.
pub const DEFAULT_CLAIM_INTERVAL_SECS: u64 = 5;
/// Default interval between policy snapshot pushes.
pub const DEFAULT_POLICY_SYNC_INTERVAL_SECS: u64 = 30;

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 5_000;

/// Configuration for a beacon replica.
///
/// Assembled from environment variables (see [`Config::from_env`]); the CLI
/// layers its own flags on top. Every replica of the control plane runs with
/// the same configuration apart from `cluster_name`, which identifies the
/// replica in leadership records.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string for the shared coordination store.
    pub database_url: String,
    /// Identity written into leadership records claimed by this replica.
    pub cluster_name: String,
    /// When true every caller is treated as leader and the leadership
    /// table is never touched. Meant for single-replica and test setups.
    pub election_disabled: bool,
    /// Age after which a leadership record is considered expired.
    pub lease_timeout: Duration,
    /// Interval between claim attempts when contending or renewing.
    pub claim_interval: Duration,
    /// Interval between policy snapshot synchronization cycles.
    pub policy_sync_interval: Duration,
    /// Base URL of the policy engine's data API. The collaborator and
    /// project documents are PUT to fixed paths below this base.
    pub policy_url: String,
    /// Singleton duties this replica contends for.
    pub singleton_duties: Vec<String>,
    /// Connection pool sizing for all non-listener store access.
    pub max_connections: u32,
    /// How long to wait for a pooled connection before failing fast.
    pub acquire_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            cluster_name: "master".to_string(),
            election_disabled: false,
            lease_timeout: Duration::from_secs(DEFAULT_LEASE_TIMEOUT_SECS),
            claim_interval: Duration::from_secs(DEFAULT_CLAIM_INTERVAL_SECS),
            policy_sync_interval: Duration::from_secs(DEFAULT_POLICY_SYNC_INTERVAL_SECS),
            policy_url: "http://127.0.0.1:8181/v1/data/ci".to_string(),
            singleton_duties: vec!["maintenance".to_string()],
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_millis(DEFAULT_ACQUIRE_TIMEOUT_MS),
        }
    }
}

impl Config {
    /// Build a config from process environment variables.
    ///
    /// `BEACON_DATABASE_URL` and `BEACON_CLUSTER_NAME` are required; the
    /// process refuses to start without them. Everything else falls back to
    /// defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. `from_env` delegates
    /// here; tests supply a closure over a map instead of mutating the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup("BEACON_DATABASE_URL")
            .filter(|v| !v.is_empty())
            .ok_or(BeaconError::MissingConfig("BEACON_DATABASE_URL"))?;
        let cluster_name = lookup("BEACON_CLUSTER_NAME")
            .filter(|v| !v.is_empty())
            .ok_or(BeaconError::MissingConfig("BEACON_CLUSTER_NAME"))?;

        let defaults = Config::default();

        let election_disabled = match lookup("BEACON_DISABLE_LEADER_ELECTION") {
            Some(v) => parse_bool("BEACON_DISABLE_LEADER_ELECTION", &v)?,
            None => false,
        };

        let lease_timeout = parse_secs(
            "BEACON_LEASE_TIMEOUT_SECS",
            lookup("BEACON_LEASE_TIMEOUT_SECS"),
            defaults.lease_timeout,
        )?;
        let claim_interval = parse_secs(
            "BEACON_CLAIM_INTERVAL_SECS",
            lookup("BEACON_CLAIM_INTERVAL_SECS"),
            defaults.claim_interval,
        )?;
        let policy_sync_interval = parse_secs(
            "BEACON_POLICY_SYNC_INTERVAL_SECS",
            lookup("BEACON_POLICY_SYNC_INTERVAL_SECS"),
            defaults.policy_sync_interval,
        )?;

        let policy_url = lookup("BEACON_OPA_URL")
            .filter(|v| !v.is_empty())
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or(defaults.policy_url);

        let singleton_duties = match lookup("BEACON_SINGLETON_DUTIES") {
            Some(v) if !v.is_empty() => v
                .split(',')
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .collect(),
            _ => defaults.singleton_duties,
        };

        Ok(Self {
            database_url,
            cluster_name,
            election_disabled,
            lease_timeout,
            claim_interval,
            policy_sync_interval,
            policy_url,
            singleton_duties,
            max_connections: defaults.max_connections,
            acquire_timeout: defaults.acquire_timeout,
        })
    }

    /// Endpoint the collaborators document is PUT to.
    pub fn collaborators_endpoint(&self) -> String {
        format!("{}/collaborators", self.policy_url)
    }

    /// Endpoint the projects document is PUT to.
    pub fn projects_endpoint(&self) -> String {
        format!("{}/projects", self.policy_url)
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(BeaconError::InvalidConfig {
            key,
            value: value.to_string(),
        }),
    }
}

fn parse_secs(key: &'static str, value: Option<String>, default: Duration) -> Result<Duration> {
    match value {
        Some(v) if !v.is_empty() => {
            let secs: u64 = v.parse().map_err(|_| BeaconError::InvalidConfig {
                key,
                value: v.clone(),
            })?;
            Ok(Duration::from_secs(secs))
        }
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn from_map(map: &HashMap<String, String>) -> Result<Config> {
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn minimal_config() {
        let map = env(&[
            ("BEACON_DATABASE_URL", "postgres://localhost/ci"),
            ("BEACON_CLUSTER_NAME", "replica-a"),
        ]);
        let cfg = from_map(&map).unwrap();
        assert_eq!(cfg.database_url, "postgres://localhost/ci");
        assert_eq!(cfg.cluster_name, "replica-a");
        assert!(!cfg.election_disabled);
        assert_eq!(cfg.lease_timeout, Duration::from_secs(30));
        assert_eq!(cfg.claim_interval, Duration::from_secs(5));
        assert_eq!(cfg.singleton_duties, vec!["maintenance".to_string()]);
    }

    #[test]
    fn missing_database_url_is_fatal() {
        let map = env(&[("BEACON_CLUSTER_NAME", "replica-a")]);
        let err = from_map(&map).unwrap_err();
        assert!(matches!(
            err,
            BeaconError::MissingConfig("BEACON_DATABASE_URL")
        ));
    }

    #[test]
    fn missing_cluster_name_is_fatal() {
        let map = env(&[("BEACON_DATABASE_URL", "postgres://localhost/ci")]);
        let err = from_map(&map).unwrap_err();
        assert!(matches!(
            err,
            BeaconError::MissingConfig("BEACON_CLUSTER_NAME")
        ));
    }

    #[test]
    fn election_disable_flag() {
        let map = env(&[
            ("BEACON_DATABASE_URL", "postgres://localhost/ci"),
            ("BEACON_CLUSTER_NAME", "replica-a"),
            ("BEACON_DISABLE_LEADER_ELECTION", "true"),
        ]);
        assert!(from_map(&map).unwrap().election_disabled);

        let map = env(&[
            ("BEACON_DATABASE_URL", "postgres://localhost/ci"),
            ("BEACON_CLUSTER_NAME", "replica-a"),
            ("BEACON_DISABLE_LEADER_ELECTION", "0"),
        ]);
        assert!(!from_map(&map).unwrap().election_disabled);
    }

    #[test]
    fn invalid_interval_rejected() {
        let map = env(&[
            ("BEACON_DATABASE_URL", "postgres://localhost/ci"),
            ("BEACON_CLUSTER_NAME", "replica-a"),
            ("BEACON_LEASE_TIMEOUT_SECS", "soon"),
        ]);
        let err = from_map(&map).unwrap_err();
        assert!(matches!(
            err,
            BeaconError::InvalidConfig {
                key: "BEACON_LEASE_TIMEOUT_SECS",
                ..
            }
        ));
    }

    #[test]
    fn policy_url_trailing_slash_trimmed() {
        let map = env(&[
            ("BEACON_DATABASE_URL", "postgres://localhost/ci"),
            ("BEACON_CLUSTER_NAME", "replica-a"),
            ("BEACON_OPA_URL", "http://opa:8181/v1/data/ci/"),
        ]);
        let cfg = from_map(&map).unwrap();
        assert_eq!(
            cfg.collaborators_endpoint(),
            "http://opa:8181/v1/data/ci/collaborators"
        );
        assert_eq!(
            cfg.projects_endpoint(),
            "http://opa:8181/v1/data/ci/projects"
        );
    }

    #[test]
    fn duties_parsed_from_csv() {
        let map = env(&[
            ("BEACON_DATABASE_URL", "postgres://localhost/ci"),
            ("BEACON_CLUSTER_NAME", "replica-a"),
            ("BEACON_SINGLETON_DUTIES", "gc, cron-sync"),
        ]);
        let cfg = from_map(&map).unwrap();
        assert_eq!(
            cfg.singleton_duties,
            vec!["gc".to_string(), "cron-sync".to_string()]
        );
    }
}
