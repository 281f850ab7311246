use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::Result;

/// Channel carrying job state transitions.
pub const JOB_CHANNEL: &str = "job_update";
/// Channel carrying console output chunks.
pub const CONSOLE_CHANNEL: &str = "console_update";

/// Payload published on [`JOB_CHANNEL`] alongside the job row mutation.
/// Only identifiers travel in the envelope; full state is re-fetched at
/// consumption time.
#[derive(Debug, Clone, Deserialize)]
pub struct JobEnvelope {
    pub job_id: Uuid,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub emitted_at: Option<DateTime<Utc>>,
}

/// Payload published on [`CONSOLE_CHANNEL`]. `id` names the console row,
/// `job_id` the room its subscribers watch.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleEnvelope {
    pub id: Uuid,
    pub job_id: Uuid,
    #[serde(default)]
    pub emitted_at: Option<DateTime<Utc>>,
}

/// A decoded notification from either channel.
#[derive(Debug, Clone)]
pub enum Envelope {
    Job(JobEnvelope),
    Console(ConsoleEnvelope),
}

impl Envelope {
    /// Decode a raw notification. Returns `Ok(None)` for channels this
    /// listener does not handle; malformed payloads on a handled channel
    /// are an error (the subscription is restarted rather than guessing
    /// at partial data).
    pub fn decode(channel: &str, payload: &str) -> Result<Option<Envelope>> {
        match channel {
            JOB_CHANNEL => Ok(Some(Envelope::Job(serde_json::from_str(payload)?))),
            CONSOLE_CHANNEL => Ok(Some(Envelope::Console(serde_json::from_str(payload)?))),
            _ => Ok(None),
        }
    }

    /// The id of the entity the envelope refers to, for logging.
    pub fn entity_id(&self) -> Uuid {
        match self {
            Envelope::Job(env) => env.job_id,
            Envelope::Console(env) => env.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_job_envelope() {
        let payload = r#"{"job_id":"4f6c7d1e-8a30-4b6f-9a51-24dce63f4be2","kind":"state_change"}"#;
        let envelope = Envelope::decode(JOB_CHANNEL, payload).unwrap().unwrap();
        match envelope {
            Envelope::Job(env) => {
                assert_eq!(
                    env.job_id.to_string(),
                    "4f6c7d1e-8a30-4b6f-9a51-24dce63f4be2"
                );
                assert_eq!(env.kind.as_deref(), Some("state_change"));
            }
            other => panic!("expected job envelope, got {:?}", other),
        }
    }

    #[test]
    fn decodes_console_envelope() {
        let payload = concat!(
            r#"{"id":"11111111-2222-3333-4444-555555555555","#,
            r#""job_id":"aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee"}"#
        );
        let envelope = Envelope::decode(CONSOLE_CHANNEL, payload).unwrap().unwrap();
        match envelope {
            Envelope::Console(env) => {
                assert_eq!(env.id.to_string(), "11111111-2222-3333-4444-555555555555");
                assert_eq!(
                    env.job_id.to_string(),
                    "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee"
                );
            }
            other => panic!("expected console envelope, got {:?}", other),
        }
    }

    #[test]
    fn unknown_channel_is_skipped() {
        let decoded = Envelope::decode("artifact_update", "{}").unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(Envelope::decode(JOB_CHANNEL, "not json").is_err());
        assert!(Envelope::decode(CONSOLE_CHANNEL, r#"{"id":"not-a-uuid"}"#).is_err());
    }

    #[test]
    fn extra_fields_are_tolerated() {
        let payload = concat!(
            r#"{"job_id":"4f6c7d1e-8a30-4b6f-9a51-24dce63f4be2","#,
            r#""emitted_at":"2026-08-07T10:00:00Z","source":"api"}"#
        );
        assert!(Envelope::decode(JOB_CHANNEL, payload).unwrap().is_some());
    }
}
