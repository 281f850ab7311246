use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Row shape of the `cluster_leadership` table: one row per singleton
/// duty, carrying whoever last held it and when they were last seen.
/// Rows are never deleted; an expired row is overwritten in place by the
/// next claimant.
#[derive(Debug, Clone, FromRow)]
pub struct LeaseRecord {
    pub service_name: String,
    pub holder_identity: String,
    pub last_seen_active: DateTime<Utc>,
}

impl LeaseRecord {
    /// Whether the lease is still fresh at `now` for the given timeout.
    /// Exposed for status reporting; the claim statement applies the same
    /// rule inside the store so concurrent claimants race on one row.
    pub fn is_fresh(&self, now: DateTime<Utc>, timeout: std::time::Duration) -> bool {
        let age = now.signed_duration_since(self.last_seen_active);
        age.num_milliseconds() < timeout.as_millis() as i64
    }
}

/// The claim statement. Insert, renew, or take over in one atomic upsert:
/// the row ends up with the caller's identity iff it was absent, expired,
/// or already held by the caller. A fresh row held by someone else is left
/// untouched. `RETURNING` hands back the post-upsert holder so claim and
/// read-back cannot be split by a concurrent claimant.
pub const CLAIM_SQL: &str = r#"
INSERT INTO cluster_leadership (service_name, holder_identity, last_seen_active)
VALUES ($1, $2, NOW())
ON CONFLICT (service_name) DO UPDATE SET
    holder_identity = CASE
        WHEN cluster_leadership.holder_identity = EXCLUDED.holder_identity
          OR cluster_leadership.last_seen_active < NOW() - ($3 * INTERVAL '1 second')
        THEN EXCLUDED.holder_identity
        ELSE cluster_leadership.holder_identity
    END,
    last_seen_active = CASE
        WHEN cluster_leadership.holder_identity = EXCLUDED.holder_identity
          OR cluster_leadership.last_seen_active < NOW() - ($3 * INTERVAL '1 second')
        THEN NOW()
        ELSE cluster_leadership.last_seen_active
    END
RETURNING holder_identity
"#;

pub const CLUSTER_ACTIVE_SQL: &str =
    "SELECT active AND enabled FROM clusters WHERE name = $1";

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    fn record(age_secs: i64) -> (LeaseRecord, DateTime<Utc>) {
        let now = Utc::now();
        let record = LeaseRecord {
            service_name: "maintenance".to_string(),
            holder_identity: "replica-a".to_string(),
            last_seen_active: now - ChronoDuration::seconds(age_secs),
        };
        (record, now)
    }

    #[test]
    fn recent_lease_is_fresh() {
        let (record, now) = record(5);
        assert!(record.is_fresh(now, Duration::from_secs(30)));
    }

    #[test]
    fn old_lease_is_expired() {
        let (record, now) = record(31);
        assert!(!record.is_fresh(now, Duration::from_secs(30)));
    }

    #[test]
    fn freshness_boundary() {
        let (record, now) = record(30);
        assert!(!record.is_fresh(now, Duration::from_secs(30)));
        assert!(record.is_fresh(now, Duration::from_secs(31)));
    }
}
