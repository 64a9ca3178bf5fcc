//! Media publish workflow
//!
//! Drives one [`PublishJob`] through create → poll → finalize. The
//! workflow looks adapters up in the [`PlatformRegistry`], retries transient
//! failures at create and finalize, hands polling to the
//! [`PollingScheduler`], journals every state change and broadcasts it on
//! the [`EventBus`].
//!
//! Every outcome, including failures, ends as a terminal job carrying a
//! [`PublishResult`]. Only `check_again` on a misused job returns an error.

pub mod job;

pub use job::{AttemptCounters, JobState, PublishJob, StateChange};

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::credentials::TokenManager;
use crate::error::{ErrorKind, MediacastError, PlatformError, Result};
use crate::events::{Event, EventBus};
use crate::platforms::{PlatformClient, PlatformRegistry};
use crate::retry::{with_retry, RetryError, RetryPolicy};
use crate::scheduler::{PollOutcome, PollPolicy, PollingScheduler, StatusProbe};
use crate::store::{AccountStore, JobJournal};
use crate::types::{
    ContainerRef, ContainerStatus, Credential, FormatOptions, MediaContainer, PlatformAccount,
    PublishRequest, PublishResult,
};

/// What a single workflow step decided
enum Step {
    Advance(JobState),
    Finish(JobState, PublishResult),
}

impl Step {
    fn failed(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Step::Finish(JobState::Failed, PublishResult::failed(kind, detail))
    }
}

/// Publish workflow
///
/// Cheap to clone; clones share the token manager, stores, registry and
/// event bus.
#[derive(Clone)]
pub struct PublishWorkflow {
    tokens: Arc<TokenManager>,
    accounts: Arc<dyn AccountStore>,
    registry: Arc<PlatformRegistry>,
    clock: Arc<dyn Clock>,
    journal: Option<Arc<dyn JobJournal>>,
    events: EventBus,
    poll: PollPolicy,
    retry: RetryPolicy,
}

impl PublishWorkflow {
    pub fn new(
        tokens: Arc<TokenManager>,
        accounts: Arc<dyn AccountStore>,
        registry: Arc<PlatformRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tokens,
            accounts,
            registry,
            clock,
            journal: None,
            events: EventBus::default(),
            poll: PollPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_policies(mut self, poll: PollPolicy, retry: RetryPolicy) -> Self {
        self.poll = poll;
        self.retry = retry;
        self
    }

    pub fn with_journal(mut self, journal: Arc<dyn JobJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn poll_policy(&self) -> &PollPolicy {
        &self.poll
    }

    /// Publish `request` and wait for the terminal outcome
    pub async fn publish(&self, request: PublishRequest, cancel: &CancellationToken) -> PublishResult {
        let job = self.run(self.create_job(request), cancel).await;
        job.result.unwrap_or_else(|| {
            PublishResult::failed(ErrorKind::Cancelled, "Job ended without a result")
        })
    }

    /// New pending job.
    ///
    /// The deadline set here is provisional; it restarts when the container
    /// enters processing and again when a processing job is resumed.
    pub fn create_job(&self, request: PublishRequest) -> PublishJob {
        let now = self.clock.now();
        PublishJob::new(request, now, self.polling_deadline(now))
    }

    /// End of the polling window for polling that starts at `from`
    pub fn polling_deadline(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.poll.ceiling())
            .ok()
            .and_then(|ceiling| from.checked_add_signed(ceiling))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Drive `job` until it reaches a terminal state
    pub async fn run(&self, mut job: PublishJob, cancel: &CancellationToken) -> PublishJob {
        if job.is_finished() {
            return job;
        }

        info!(
            "Starting publish job {} for account {} ({})",
            job.id, job.account_id, job.state
        );
        self.events.emit(Event::JobStarted {
            job_id: job.id.clone(),
            account_id: job.account_id.clone(),
        });
        self.journal(&job).await;

        let (account, client) = match self.resolve(&job).await {
            Ok(resolved) => resolved,
            Err(step) => {
                self.apply(&mut job, step).await;
                return job;
            }
        };

        while !job.is_finished() {
            let step = if cancel.is_cancelled() {
                Step::failed(
                    ErrorKind::Cancelled,
                    format!("Cancelled while {}", job.state),
                )
            } else {
                match job.state {
                    JobState::Pending => self.acquire_token(&account).await,
                    JobState::ContainerCreating => {
                        self.create_container(&mut job, &account, client.as_ref(), cancel)
                            .await
                    }
                    JobState::ContainerProcessing => {
                        self.await_processing(&mut job, &account, client.as_ref(), cancel)
                            .await
                    }
                    JobState::ReadyToFinalize => {
                        self.finalize(&mut job, &account, client.as_ref(), cancel)
                            .await
                    }
                    JobState::Published | JobState::Failed | JobState::TimedOut => break,
                }
            };
            self.apply(&mut job, step).await;
        }

        job
    }

    /// Continue a journaled job after a restart.
    ///
    /// A job with a container re-polls it; one already past processing
    /// finalizes idempotently.
    pub async fn resume(&self, mut job: PublishJob, cancel: &CancellationToken) -> PublishJob {
        if job.is_finished() {
            debug!("Job {} is already {}, nothing to resume", job.id, job.state);
            return job;
        }
        info!(
            "Resuming job {} from {} (container {})",
            job.id,
            job.state,
            job.container
                .as_ref()
                .map(|c| c.container_id.as_str())
                .unwrap_or("none")
        );
        if job.state == JobState::ContainerProcessing {
            job.deadline = self.polling_deadline(self.clock.now());
        }
        self.run(job, cancel).await
    }

    /// Resume every unfinished job in the journal concurrently
    pub async fn resume_unfinished(&self, cancel: &CancellationToken) -> Result<Vec<PublishJob>> {
        let Some(journal) = &self.journal else {
            return Ok(Vec::new());
        };

        let jobs = journal.unfinished().await?;
        if jobs.is_empty() {
            return Ok(jobs);
        }

        info!("Resuming {} unfinished job(s)", jobs.len());
        Ok(join_all(jobs.into_iter().map(|job| self.resume(job, cancel))).await)
    }

    /// Manual "check again" for a timed-out job.
    ///
    /// Makes one status check. A finished container is finalized. The job
    /// stays `TimedOut`; the new outcome is recorded as its result.
    ///
    /// # Errors
    ///
    /// - `MediacastError::InvalidInput` if the job is not timed out or has no container
    /// - `MediacastError::NotFound` if the account no longer exists
    /// - `MediacastError::Token` if no valid token can be obtained
    pub async fn check_again(&self, job: &mut PublishJob) -> Result<PublishResult> {
        if job.state != JobState::TimedOut {
            return Err(MediacastError::InvalidInput(format!(
                "Job {} is {}; only timed-out jobs can be checked again",
                job.id, job.state
            )));
        }
        let container = job.container.clone().ok_or_else(|| {
            MediacastError::InvalidInput(format!("Job {} has no container to check", job.id))
        })?;
        let account = self
            .accounts
            .get_account(&job.account_id)
            .await?
            .ok_or_else(|| MediacastError::NotFound(format!("Account {}", job.account_id)))?;
        let client = self.registry.get(account.kind)?;
        let credential = self.tokens.token_for_in_flight_job(&account).await?;

        let result = match client.check_status(&credential, &container).await {
            Ok(observed) => {
                job.observe_status(observed.status);
                match observed.status {
                    ContainerStatus::Finished => {
                        let cancel = CancellationToken::new();
                        let (result, attempts) = self
                            .finalize_container(
                                client.as_ref(),
                                &credential,
                                &container,
                                &job.options,
                                &cancel,
                            )
                            .await;
                        job.attempts.finalize += attempts;
                        result
                    }
                    ContainerStatus::Error => PublishResult::failed(
                        ErrorKind::ProcessingFailed,
                        processing_detail(&observed),
                    ),
                    ContainerStatus::Created | ContainerStatus::Processing => {
                        PublishResult::failed(ErrorKind::Timeout, still_processing(&container))
                    }
                }
            }
            Err(e) => PublishResult::failed(e.kind(), e.to_string()),
        };
        job.attempts.polls += 1;

        info!(
            "Re-checked job {}: {}",
            job.id,
            if result.success { "published" } else { "not published" }
        );
        job.result = Some(result.clone());
        job.updated_at = self.clock.now();
        self.journal(job).await;
        Ok(result)
    }

    async fn resolve(
        &self,
        job: &PublishJob,
    ) -> std::result::Result<(PlatformAccount, Arc<dyn PlatformClient>), Step> {
        let account = match self.accounts.get_account(&job.account_id).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                return Err(Step::failed(
                    ErrorKind::TokenError,
                    format!("Account {} is not configured", job.account_id),
                ))
            }
            Err(e) => {
                return Err(Step::failed(
                    ErrorKind::TokenError,
                    format!("Failed to load account {}: {}", job.account_id, e),
                ))
            }
        };

        match self.registry.get(account.kind) {
            Ok(client) => Ok((account, client)),
            Err(e) => Err(Step::failed(e.kind(), e.to_string())),
        }
    }

    async fn acquire_token(&self, account: &PlatformAccount) -> Step {
        match self.tokens.token_for_new_job(account).await {
            Ok(_) => Step::Advance(JobState::ContainerCreating),
            Err(e) => Step::failed(ErrorKind::from(&e), e.to_string()),
        }
    }

    async fn create_container(
        &self,
        job: &mut PublishJob,
        account: &PlatformAccount,
        client: &dyn PlatformClient,
        cancel: &CancellationToken,
    ) -> Step {
        let credential = match self.tokens.get_valid_token(account).await {
            Ok(credential) => credential,
            Err(e) => return Step::failed(ErrorKind::from(&e), e.to_string()),
        };

        let credential = credential.as_ref();
        let media = &job.media;
        let caption = job.caption.as_str();
        let format = job.format;
        let options = &job.options;
        let outcome = with_retry(
            &self.retry,
            self.clock.as_ref(),
            cancel,
            "container creation",
            move |_| client.create_container(credential, account, media, caption, format, options),
        )
        .await;

        match outcome {
            Ok((mut container, attempts)) => {
                job.attempts.create += attempts;
                let now = self.clock.now();
                container.created_at = now;
                info!(
                    "Created container {} for job {}",
                    container.container_id, job.id
                );
                self.events.emit(Event::ContainerCreated {
                    job_id: job.id.clone(),
                    container_id: container.container_id.clone(),
                });
                job.container = Some(container);
                job.container_status = None;
                job.observe_status(ContainerStatus::Created);
                job.deadline = self.polling_deadline(now);
                Step::Advance(JobState::ContainerProcessing)
            }
            Err(RetryError::Failed { error, attempts }) => {
                job.attempts.create += attempts;
                Step::failed(error.kind(), error.to_string())
            }
            Err(RetryError::Cancelled { attempts }) => {
                job.attempts.create += attempts;
                Step::failed(ErrorKind::Cancelled, "Cancelled during container creation")
            }
        }
    }

    async fn await_processing(
        &self,
        job: &mut PublishJob,
        account: &PlatformAccount,
        client: &dyn PlatformClient,
        cancel: &CancellationToken,
    ) -> Step {
        let Some(container) = job.container.clone() else {
            return Step::failed(
                ErrorKind::PlatformRejected,
                format!("Job {} has no container to poll", job.id),
            );
        };

        let probe = ContainerProbe {
            tokens: self.tokens.as_ref(),
            clock: self.clock.as_ref(),
            events: &self.events,
            account,
            client,
            job_id: &job.id,
            checks: AtomicU32::new(job.attempts.polls),
            last_validated: Mutex::new(self.clock.now()),
        };
        let scheduler = PollingScheduler::new(self.clock.as_ref(), &self.poll);
        let outcome = scheduler
            .poll_until_terminal(&probe, &container, job.deadline, cancel)
            .await;
        job.attempts.polls += outcome.attempts();

        match outcome {
            PollOutcome::Finished { container, .. } => {
                job.observe_status(container.status);
                Step::Advance(JobState::ReadyToFinalize)
            }
            PollOutcome::Errored { container, .. } => {
                job.observe_status(container.status);
                Step::failed(ErrorKind::ProcessingFailed, processing_detail(&container))
            }
            PollOutcome::TimedOut { attempts, last } => {
                if let Some(last) = last {
                    job.observe_status(last.status);
                }
                warn!(
                    "Container {} for job {} still processing after {} checks",
                    container.container_id, job.id, attempts
                );
                Step::Finish(
                    JobState::TimedOut,
                    PublishResult::failed(ErrorKind::Timeout, still_processing(&container)),
                )
            }
            PollOutcome::Cancelled { .. } => Step::failed(
                ErrorKind::Cancelled,
                format!(
                    "Cancelled while container {} was processing; the platform keeps processing it",
                    container.container_id
                ),
            ),
            PollOutcome::Failed { error, .. } => Step::failed(error.kind(), error.to_string()),
        }
    }

    async fn finalize(
        &self,
        job: &mut PublishJob,
        account: &PlatformAccount,
        client: &dyn PlatformClient,
        cancel: &CancellationToken,
    ) -> Step {
        let Some(container) = job.container.clone() else {
            return Step::failed(
                ErrorKind::PlatformRejected,
                format!("Job {} has no container to finalize", job.id),
            );
        };
        let credential = match self.tokens.token_for_in_flight_job(account).await {
            Ok(credential) => credential,
            Err(e) => return Step::failed(ErrorKind::from(&e), e.to_string()),
        };

        let (result, attempts) = self
            .finalize_container(client, &credential, &container, &job.options, cancel)
            .await;
        job.attempts.finalize += attempts;

        if result.success {
            Step::Finish(JobState::Published, result)
        } else {
            Step::Finish(JobState::Failed, result)
        }
    }

    /// Finalize with retry.
    ///
    /// `AlreadyPublished` counts as success only when the platform told us
    /// the post id.
    async fn finalize_container(
        &self,
        client: &dyn PlatformClient,
        credential: &Credential,
        container: &ContainerRef,
        options: &FormatOptions,
        cancel: &CancellationToken,
    ) -> (PublishResult, u32) {
        let outcome = with_retry(
            &self.retry,
            self.clock.as_ref(),
            cancel,
            "finalize",
            move |_| client.finalize(credential, container, options),
        )
        .await;

        match outcome {
            Ok((post, attempts)) => (PublishResult::published(post), attempts),
            Err(RetryError::Failed {
                error: PlatformError::AlreadyPublished { container_id, post_id: None },
                attempts,
            }) => (
                PublishResult::failed(
                    ErrorKind::PlatformRejected,
                    format!(
                        "Container {} was already published but its post id could not be determined",
                        container_id
                    ),
                ),
                attempts,
            ),
            Err(RetryError::Failed {
                error: PlatformError::AlreadyPublished { container_id, post_id: Some(post_id) },
                attempts,
            }) => {
                info!("Container {} was already published as {}", container_id, post_id);
                (
                    PublishResult {
                        success: true,
                        post_id: Some(post_id),
                        post_url: None,
                        error_kind: None,
                        error_detail: Some(format!(
                            "Container {} was already published",
                            container_id
                        )),
                    },
                    attempts,
                )
            }
            Err(RetryError::Failed { error, attempts }) => {
                (PublishResult::failed(error.kind(), error.to_string()), attempts)
            }
            Err(RetryError::Cancelled { attempts }) => (
                PublishResult::failed(ErrorKind::Cancelled, "Cancelled before finalize"),
                attempts,
            ),
        }
    }

    async fn apply(&self, job: &mut PublishJob, step: Step) {
        let (next, mut result) = match step {
            Step::Advance(next) => (next, None),
            Step::Finish(next, result) => (next, Some(result)),
        };

        let now = self.clock.now();
        let change = match job.transition(next, now) {
            Ok(change) => change,
            Err(e) => {
                warn!("{}", e);
                result = Some(PublishResult::failed(ErrorKind::PlatformRejected, e.to_string()));
                match job.transition(JobState::Failed, now) {
                    Ok(change) => change,
                    Err(_) => return,
                }
            }
        };

        info!("Job {}: {} -> {}", job.id, change.from, change.to);
        self.events.emit(Event::StateChanged {
            job_id: job.id.clone(),
            from: change.from,
            to: change.to,
        });

        if let Some(result) = result {
            match &result.error_kind {
                None => info!(
                    "Job {} published as {}",
                    job.id,
                    result.post_id.as_deref().unwrap_or("unknown post")
                ),
                Some(kind) => warn!(
                    "Job {} ended {} ({}): {}",
                    job.id,
                    job.state,
                    kind,
                    result.error_detail.as_deref().unwrap_or("")
                ),
            }
            job.result = Some(result.clone());
            self.events.emit(Event::JobFinished {
                job_id: job.id.clone(),
                state: job.state,
                result,
            });
        }

        self.journal(job).await;
    }

    async fn journal(&self, job: &PublishJob) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record(job).await {
                warn!("Failed to journal job {}: {}", job.id, e);
            }
        }
    }
}

fn processing_detail(container: &MediaContainer) -> String {
    container
        .status_detail
        .clone()
        .unwrap_or_else(|| format!("Platform reported ERROR for container {}", container.container_id))
}

fn still_processing(container: &ContainerRef) -> String {
    format!(
        "Container {} did not finish processing in time. The post may still appear on the platform; check again later.",
        container.container_id
    )
}

/// One status check per call, with token upkeep for long polls
struct ContainerProbe<'a> {
    tokens: &'a TokenManager,
    clock: &'a dyn Clock,
    events: &'a EventBus,
    account: &'a PlatformAccount,
    client: &'a dyn PlatformClient,
    job_id: &'a str,
    checks: AtomicU32,
    last_validated: Mutex<DateTime<Utc>>,
}

impl ContainerProbe<'_> {
    /// Re-introspect the token once `revalidate_after` has passed
    async fn revalidate_if_due(&self) {
        let now = self.clock.now();
        let revalidate_after = self.tokens.policy().revalidate_after;
        let due = {
            let mut last = self.last_validated.lock().unwrap_or_else(|e| e.into_inner());
            let elapsed = (now - *last).to_std().unwrap_or_default();
            if elapsed >= revalidate_after {
                *last = now;
                true
            } else {
                false
            }
        };

        if due {
            let validation = self.tokens.validate_token(self.account).await;
            if !validation.valid {
                warn!(
                    "Token for {} failed revalidation while polling job {}",
                    self.account.id, self.job_id
                );
            }
        }
    }
}

#[async_trait]
impl<'a> StatusProbe for ContainerProbe<'a> {
    async fn probe(&self, container: &ContainerRef) -> std::result::Result<MediaContainer, PlatformError> {
        let credential = self
            .tokens
            .token_for_in_flight_job(self.account)
            .await
            .map_err(|e| PlatformError::Authentication(e.to_string()))?;
        self.revalidate_if_due().await;

        let attempt = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
        let observed = self.client.check_status(&credential, container).await;
        self.events.emit(Event::PollTick {
            job_id: self.job_id.to_string(),
            attempt,
            status: observed.as_ref().ok().map(|c| c.status),
        });
        observed
    }
}
