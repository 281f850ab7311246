use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{BeaconError, Result};
use crate::gateway::BroadcastGateway;
use crate::listener::envelope::{ConsoleEnvelope, JobEnvelope};

/// Event name used for job state multicasts.
pub const JOB_EVENT: &str = "notify:job";
/// Event name used for console output multicasts.
pub const CONSOLE_EVENT: &str = "notify:console";

/// Outcome of one resolution task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Full state was fetched and multicast.
    Delivered,
    /// Nobody is watching the target room; the store was not queried.
    NoSubscribers,
    /// The referenced entity no longer exists. Dropped silently.
    Missing,
}

/// Row shape for the job lookup. One struct per query shape so schema
/// drift fails in decoding instead of producing partial payloads.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct JobRow {
    pub id: Uuid,
    pub name: String,
    pub state: String,
    #[serde(skip)]
    pub build_id: Uuid,
    #[serde(skip)]
    pub project_id: Uuid,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BuildRow {
    pub id: Uuid,
    pub build_number: i32,
    pub restart_counter: i32,
    #[serde(skip)]
    pub commit_id: Option<String>,
    #[serde(skip)]
    pub pull_request_id: Option<Uuid>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ProjectRow {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub project_type: String,
    pub public: bool,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CommitRow {
    pub id: String,
    pub branch: Option<String>,
    pub author_name: Option<String>,
    pub message: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PullRequestRow {
    pub id: Uuid,
    pub title: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
struct ConsoleRow {
    output: String,
}

/// Project types whose builds carry commit (and possibly pull request)
/// context worth resolving into the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectType {
    Upload,
    Github,
    Gerrit,
}

impl ProjectType {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "upload" => Ok(ProjectType::Upload),
            "github" => Ok(ProjectType::Github),
            "gerrit" => Ok(ProjectType::Gerrit),
            other => Err(BeaconError::UnknownProjectType(other.to_string())),
        }
    }

    pub fn is_vcs(self) -> bool {
        matches!(self, ProjectType::Github | ProjectType::Gerrit)
    }
}

/// Composite read model multicast for a job state transition. Assembled
/// per notification and discarded after delivery, never cached.
#[derive(Debug, Serialize)]
pub struct ResolvedJobEvent {
    pub job: JobRow,
    pub build: BuildRow,
    pub project: ProjectRow,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<CommitRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_request: Option<PullRequestRow>,
}

/// Read model multicast for one console output chunk.
#[derive(Debug, Serialize)]
pub struct ResolvedConsoleEvent {
    pub id: Uuid,
    pub job_id: Uuid,
    pub output: String,
}

/// Resolve a console notification and multicast it to the job's room.
///
/// Subscriber presence is checked before any store access: most console
/// events have no live watcher and skipping the lookup keeps the write
/// path's notification fan-out cheap.
pub async fn resolve_console_event<G: BroadcastGateway>(
    pool: &PgPool,
    gateway: &G,
    envelope: &ConsoleEnvelope,
) -> Result<Resolution> {
    let room = envelope.job_id.to_string();
    if !gateway.has_subscribers(&room) {
        return Ok(Resolution::NoSubscribers);
    }

    let row: Option<ConsoleRow> =
        sqlx::query_as("SELECT output FROM console_outputs WHERE id = $1")
            .bind(envelope.id)
            .fetch_optional(pool)
            .await?;

    let Some(row) = row else {
        return Ok(Resolution::Missing);
    };

    let event = ResolvedConsoleEvent {
        id: envelope.id,
        job_id: envelope.job_id,
        output: row.output,
    };
    gateway.multicast(&room, CONSOLE_EVENT, &serde_json::to_value(&event)?);
    Ok(Resolution::Delivered)
}

/// Resolve a job notification into its composite event and multicast it
/// to both the owning build's room and the owning project's room.
///
/// Commit and pull request rows are only resolved for VCS-backed projects
/// and only when the build actually references a commit; an upload build
/// legitimately has neither.
pub async fn resolve_job_event<G: BroadcastGateway>(
    pool: &PgPool,
    gateway: &G,
    envelope: &JobEnvelope,
) -> Result<Resolution> {
    let job: Option<JobRow> = sqlx::query_as(
        "SELECT id, name, state, build_id, project_id, start_date, end_date \
         FROM jobs WHERE id = $1",
    )
    .bind(envelope.job_id)
    .fetch_optional(pool)
    .await?;
    let Some(job) = job else {
        return Ok(Resolution::Missing);
    };

    let build: Option<BuildRow> = sqlx::query_as(
        "SELECT id, build_number, restart_counter, commit_id, pull_request_id \
         FROM builds WHERE id = $1",
    )
    .bind(job.build_id)
    .fetch_optional(pool)
    .await?;
    let Some(build) = build else {
        return Ok(Resolution::Missing);
    };

    let project: Option<ProjectRow> = sqlx::query_as(
        "SELECT id, name, project_type, public FROM projects WHERE id = $1",
    )
    .bind(job.project_id)
    .fetch_optional(pool)
    .await?;
    let Some(project) = project else {
        return Ok(Resolution::Missing);
    };

    let project_type = ProjectType::parse(&project.project_type)?;

    let mut commit: Option<CommitRow> = None;
    let mut pull_request: Option<PullRequestRow> = None;
    if project_type.is_vcs() {
        if let Some(commit_id) = &build.commit_id {
            commit = sqlx::query_as(
                "SELECT id, branch, author_name, message, url \
                 FROM commits WHERE id = $1 AND project_id = $2",
            )
            .bind(commit_id)
            .bind(job.project_id)
            .fetch_optional(pool)
            .await?;
        }
        if let Some(pull_request_id) = build.pull_request_id {
            pull_request = sqlx::query_as(
                "SELECT id, title, url FROM pull_requests WHERE id = $1",
            )
            .bind(pull_request_id)
            .fetch_optional(pool)
            .await?;
        }
    }

    let build_room = build.id.to_string();
    let project_room = project.id.to_string();
    let event = ResolvedJobEvent {
        job,
        build,
        project,
        commit,
        pull_request,
    };
    let payload = serde_json::to_value(&event)?;

    // Clients subscribe at either granularity; both rooms get the same
    // snapshot.
    gateway.multicast(&build_room, JOB_EVENT, &payload);
    gateway.multicast(&project_room, JOB_EVENT, &payload);
    Ok(Resolution::Delivered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::BroadcastHub;
    use serde_json::json;

    fn unreachable_pool() -> PgPool {
        // Lazily initialized: the first query would fail, so a passing
        // short-circuit test proves no query was issued.
        PgPool::connect_lazy("postgres://127.0.0.1:1/unreachable").expect("lazy pool")
    }

    #[tokio::test]
    async fn console_event_without_subscribers_issues_no_queries() {
        let hub = BroadcastHub::new();
        let envelope = ConsoleEnvelope {
            id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            emitted_at: None,
        };
        let outcome = resolve_console_event(&unreachable_pool(), &hub, &envelope)
            .await
            .unwrap();
        assert_eq!(outcome, Resolution::NoSubscribers);
    }

    #[tokio::test]
    async fn console_event_with_subscriber_reaches_the_store() {
        let hub = BroadcastHub::new();
        let envelope = ConsoleEnvelope {
            id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            emitted_at: None,
        };
        let _rx = hub.subscribe(&envelope.job_id.to_string());
        // With a watcher present the lookup must run, and against the
        // unreachable pool that surfaces as a store error.
        let outcome = resolve_console_event(&unreachable_pool(), &hub, &envelope).await;
        assert!(outcome.is_err());
    }

    #[test]
    fn project_type_parsing() {
        assert_eq!(ProjectType::parse("upload").unwrap(), ProjectType::Upload);
        assert_eq!(ProjectType::parse("github").unwrap(), ProjectType::Github);
        assert_eq!(ProjectType::parse("gerrit").unwrap(), ProjectType::Gerrit);
        assert!(matches!(
            ProjectType::parse("svn"),
            Err(BeaconError::UnknownProjectType(_))
        ));
    }

    #[test]
    fn vcs_classification() {
        assert!(!ProjectType::Upload.is_vcs());
        assert!(ProjectType::Github.is_vcs());
        assert!(ProjectType::Gerrit.is_vcs());
    }

    #[test]
    fn resolved_job_event_shape() {
        let job_id = Uuid::new_v4();
        let build_id = Uuid::new_v4();
        let project_id = Uuid::new_v4();
        let event = ResolvedJobEvent {
            job: JobRow {
                id: job_id,
                name: "compile".to_string(),
                state: "running".to_string(),
                build_id,
                project_id,
                start_date: None,
                end_date: None,
            },
            build: BuildRow {
                id: build_id,
                build_number: 7,
                restart_counter: 1,
                commit_id: None,
                pull_request_id: None,
            },
            project: ProjectRow {
                id: project_id,
                name: "api".to_string(),
                project_type: "upload".to_string(),
                public: false,
            },
            commit: None,
            pull_request: None,
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["job"]["name"], "compile");
        assert_eq!(value["build"]["build_number"], 7);
        assert_eq!(value["project"]["type"], "upload");
        // Absent joins are omitted entirely rather than serialized null.
        assert!(value.get("commit").is_none());
        assert!(value.get("pull_request").is_none());
        // Join keys stay internal.
        assert!(value["job"].get("build_id").is_none());
    }

    #[test]
    fn resolved_console_event_shape() {
        let event = ResolvedConsoleEvent {
            id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            output: "step 1 ok\n".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["output"], "step 1 ok\n");
        assert_eq!(value, json!({
            "id": event.id.to_string(),
            "job_id": event.job_id.to_string(),
            "output": "step 1 ok\n",
        }));
    }

    #[test]
    fn hub_short_circuit_matches_gateway_contract() {
        let hub = BroadcastHub::new();
        assert!(!hub.has_subscribers("j1"));
        let _rx = hub.subscribe("j1");
        assert!(hub.has_subscribers("j1"));
    }
}
