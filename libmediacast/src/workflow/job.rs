//! Publish job records and their state machine

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MediacastError, Result};
use crate::types::{
    ContainerRef, ContainerStatus, FormatOptions, MediaSpec, PublishFormat, PublishRequest,
    PublishResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    ContainerCreating,
    ContainerProcessing,
    ReadyToFinalize,
    Published,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Published | JobState::Failed | JobState::TimedOut
        )
    }

    /// The legal transition table.
    ///
    /// `Failed` is reachable from every non-terminal state, `TimedOut` only
    /// from `ContainerProcessing`, and terminal states have no exits.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Pending, ContainerCreating)
            | (ContainerCreating, ContainerProcessing)
            | (ContainerProcessing, ReadyToFinalize)
            | (ContainerProcessing, TimedOut)
            | (ReadyToFinalize, Published) => true,
            (current, Failed) => !current.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::ContainerCreating => "container_creating",
            JobState::ContainerProcessing => "container_processing",
            JobState::ReadyToFinalize => "ready_to_finalize",
            JobState::Published => "published",
            JobState::Failed => "failed",
            JobState::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "container_creating" => Ok(JobState::ContainerCreating),
            "container_processing" => Ok(JobState::ContainerProcessing),
            "ready_to_finalize" => Ok(JobState::ReadyToFinalize),
            "published" => Ok(JobState::Published),
            "failed" => Ok(JobState::Failed),
            "timed_out" => Ok(JobState::TimedOut),
            other => Err(format!("Unknown job state '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub from: JobState,
    pub to: JobState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptCounters {
    pub create: u32,
    pub finalize: u32,
    pub polls: u32,
}

/// One request to publish, tracked from submission to a terminal state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishJob {
    pub id: String,
    pub account_id: String,
    pub media: MediaSpec,
    pub caption: String,
    pub format: PublishFormat,
    pub options: FormatOptions,
    pub state: JobState,
    /// The single active container. A retried create replaces it.
    pub container: Option<ContainerRef>,
    pub container_status: Option<ContainerStatus>,
    pub result: Option<PublishResult>,
    pub attempts: AttemptCounters,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<StateChange>,
}

impl PublishJob {
    pub fn new(request: PublishRequest, started_at: DateTime<Utc>, deadline: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            account_id: request.account_id,
            media: request.media,
            caption: request.caption,
            format: request.format,
            options: request.options,
            state: JobState::Pending,
            container: None,
            container_status: None,
            result: None,
            attempts: AttemptCounters::default(),
            started_at,
            deadline,
            updated_at: started_at,
            history: Vec::new(),
        }
    }

    /// Move to `next`, recording the change.
    ///
    /// Illegal moves leave the job untouched.
    pub fn transition(&mut self, next: JobState, at: DateTime<Utc>) -> Result<StateChange> {
        if !self.state.can_transition_to(next) {
            return Err(MediacastError::InvalidTransition {
                job_id: self.id.clone(),
                from: self.state,
                to: next,
            });
        }

        let change = StateChange {
            from: self.state,
            to: next,
            at,
        };
        self.state = next;
        self.updated_at = at;
        self.history.push(change.clone());
        Ok(change)
    }

    /// Record a container status, ignoring regressions
    pub fn observe_status(&mut self, status: ContainerStatus) {
        match self.container_status {
            Some(current) if status.rank() < current.rank() => {}
            Some(current) if current.is_terminal() => {}
            _ => self.container_status = Some(status),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MediaSpec;
    use chrono::Duration;

    const ALL: [JobState; 7] = [
        JobState::Pending,
        JobState::ContainerCreating,
        JobState::ContainerProcessing,
        JobState::ReadyToFinalize,
        JobState::Published,
        JobState::Failed,
        JobState::TimedOut,
    ];

    fn job() -> PublishJob {
        let now = Utc::now();
        PublishJob::new(
            PublishRequest {
                account_id: "meta-1".to_string(),
                media: MediaSpec::video("https://cdn.example.com/a.mp4"),
                caption: "caption".to_string(),
                format: PublishFormat::Reel,
                options: FormatOptions::default(),
            },
            now,
            now + Duration::minutes(5),
        )
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for terminal in [JobState::Published, JobState::Failed, JobState::TimedOut] {
            for next in ALL {
                assert!(
                    !terminal.can_transition_to(next),
                    "{} -> {} should be illegal",
                    terminal,
                    next
                );
            }
        }
    }

    #[test]
    fn test_failed_reachable_from_every_active_state() {
        for state in ALL.iter().filter(|s| !s.is_terminal()) {
            assert!(state.can_transition_to(JobState::Failed));
        }
    }

    #[test]
    fn test_timed_out_only_from_processing() {
        for state in ALL {
            assert_eq!(
                state.can_transition_to(JobState::TimedOut),
                state == JobState::ContainerProcessing
            );
        }
    }

    #[test]
    fn test_no_skipping_forward() {
        assert!(!JobState::Pending.can_transition_to(JobState::ContainerProcessing));
        assert!(!JobState::ContainerCreating.can_transition_to(JobState::ReadyToFinalize));
        assert!(!JobState::ContainerProcessing.can_transition_to(JobState::Published));
        assert!(!JobState::ReadyToFinalize.can_transition_to(JobState::ContainerProcessing));
    }

    #[test]
    fn test_transition_records_history() {
        let mut job = job();
        let at = job.started_at;

        job.transition(JobState::ContainerCreating, at).unwrap();
        job.transition(JobState::ContainerProcessing, at).unwrap();

        assert_eq!(job.state, JobState::ContainerProcessing);
        assert_eq!(job.history.len(), 2);
        assert_eq!(job.history[0].from, JobState::Pending);
        assert_eq!(job.history[1].to, JobState::ContainerProcessing);
    }

    #[test]
    fn test_illegal_transition_leaves_job_untouched() {
        let mut job = job();
        let at = job.started_at;

        let err = job.transition(JobState::Published, at).unwrap_err();
        assert!(matches!(err, MediacastError::InvalidTransition { .. }));
        assert_eq!(job.state, JobState::Pending);
        assert!(job.history.is_empty());
    }

    #[test]
    fn test_observed_status_never_regresses() {
        let mut job = job();
        job.observe_status(ContainerStatus::Processing);
        job.observe_status(ContainerStatus::Created);
        assert_eq!(job.container_status, Some(ContainerStatus::Processing));

        job.observe_status(ContainerStatus::Finished);
        job.observe_status(ContainerStatus::Error);
        assert_eq!(job.container_status, Some(ContainerStatus::Finished));
    }

    #[test]
    fn test_state_string_roundtrip() {
        for state in ALL {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
    }
}
