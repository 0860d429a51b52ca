//! End-to-end execution of one job.
//!
//! [`JobExecutor::submit`] runs the whole pipeline under a
//! [`TimeoutSupervisor`]:
//!
//! 1. resolve the job id through the kind's [`Admission`] policy
//! 2. take a concurrency slot, or fail fast with `CapacityExceeded`
//! 3. drain the upload body, streaming every part into the job's scratch
//!    directory
//! 4. run the external task on a blocking thread
//! 5. package the output directory and open the archive for streaming
//! 6. release the slot, hand the archive to the responder
//! 7. erase the scratch directory if the kind's [`ScratchPolicy`] says so
//!
//! The body is only read once steps 1 and 2 have passed, so rejected
//! requests answer without waiting for their upload, and the deadline covers
//! the upload too.
//!
//! The cancellation token is watched while the body is drained, and checked
//! before the external task starts, after it returns and after packaging. A
//! job cancelled at any of those points never reaches the responder.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::admission::{Admission, AdmissionLedger, JobIdGenerator};
use crate::archive::{self, ArchiveStream};
use crate::error::JobError;
use crate::slots::ConcurrencyLimiter;
use crate::staging::StagingArea;
use crate::supervisor::{Responder, SupervisionOutcome, TimeoutSupervisor};
use crate::task::{ExternalTask, RegistrationSettings, TaskError, TaskSettings, TransformSettings};
use crate::types::{InputRole, JobId, JobKind, JobState, ScratchPolicy, NUMBER_OF_TRANSFORMS_FIELD};
use crate::upload::{UploadBody, UploadSink};

/// Default wall-clock budget for one job (50 s).
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_millis(50_000);

/// How long a cancelled job waits for its external task to stop before
/// erasing the scratch directory under it.
pub const CANCEL_GRACE: Duration = Duration::from_secs(2);

/// An incoming job before admission.
pub struct JobRequest {
    /// Raw `id` value from the request, if any.
    pub id: Option<String>,
    /// Upload parts, not read until the job holds a slot.
    pub body: Box<dyn UploadBody>,
}

impl JobRequest {
    pub fn new(id: Option<String>, body: impl UploadBody) -> Self {
        Self {
            id,
            body: Box::new(body),
        }
    }
}

type JobResponder = Arc<Responder<Result<ArchiveStream, JobError>>>;

/// Runs jobs of one [`JobKind`].
pub struct JobExecutor {
    kind: JobKind,
    staging: StagingArea,
    slots: Arc<ConcurrencyLimiter>,
    admission: Admission,
    task: Arc<dyn ExternalTask>,
    supervisor: TimeoutSupervisor,
    scratch: ScratchPolicy,
}

impl JobExecutor {
    /// Executor with the kind's defaults: one slot, 50 s timeout,
    /// ledger admission and retained scratch for registrations,
    /// sequential ids and erased scratch for transforms.
    pub fn new(kind: JobKind, staging: StagingArea, task: Arc<dyn ExternalTask>) -> Self {
        let (admission, scratch) = match kind {
            JobKind::Registration => (
                Admission::Ledger(Arc::new(AdmissionLedger::new(None))),
                ScratchPolicy::Retain,
            ),
            JobKind::Transform => (
                Admission::Sequential(Arc::new(JobIdGenerator::new())),
                ScratchPolicy::Erase,
            ),
        };
        Self {
            kind,
            staging,
            slots: Arc::new(ConcurrencyLimiter::new(1)),
            admission,
            task,
            supervisor: TimeoutSupervisor::new(DEFAULT_JOB_TIMEOUT),
            scratch,
        }
    }

    pub fn with_limiter(mut self, slots: Arc<ConcurrencyLimiter>) -> Self {
        self.slots = slots;
        self
    }

    pub fn with_max_concurrent(self, max_concurrent: usize) -> Self {
        self.with_limiter(Arc::new(ConcurrencyLimiter::new(max_concurrent)))
    }

    pub fn with_admission(mut self, admission: Admission) -> Self {
        self.admission = admission;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.supervisor = TimeoutSupervisor::new(timeout);
        self
    }

    pub fn with_scratch_policy(mut self, scratch: ScratchPolicy) -> Self {
        self.scratch = scratch;
        self
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn limiter(&self) -> &Arc<ConcurrencyLimiter> {
        &self.slots
    }

    pub fn admission(&self) -> &Admission {
        &self.admission
    }

    pub fn scratch_policy(&self) -> ScratchPolicy {
        self.scratch
    }

    /// Prepare the kind's root directory.
    pub async fn init(&self) -> Result<(), JobError> {
        self.staging.ensure_root().await
    }

    /// Run one job to completion, timeout or rejection.
    pub async fn submit(self: &Arc<Self>, request: JobRequest) -> Result<ArchiveStream, JobError> {
        let executor = Arc::clone(self);
        let (outcome, result) = self
            .supervisor
            .supervise(move |cancel, responder| async move {
                executor.execute(request, cancel, responder).await;
            })
            .await;

        match outcome {
            SupervisionOutcome::CompletedNormally => {
                tracing::debug!(kind = %self.kind, "Job completed within deadline");
            }
            SupervisionOutcome::CancelledOnTimeout => {
                tracing::warn!(kind = %self.kind, "Job cancelled on timeout");
            }
            SupervisionOutcome::FailedWithException => {
                tracing::error!(kind = %self.kind, "Job failed without responding");
            }
        }
        result
    }

    async fn execute(&self, request: JobRequest, cancel: CancellationToken, responder: JobResponder) {
        let job_id = match self.admission.resolve(request.id.as_deref()) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(kind = %self.kind, error = %e, "Job not admitted");
                responder.respond(Err(e));
                return;
            }
        };
        let mut job = JobTracker::new(self.kind, job_id);

        let Some(slot) = self.slots.try_acquire_guard() else {
            job.advance(JobState::Rejected);
            responder.respond(Err(JobError::CapacityExceeded {
                kind: self.kind,
                limit: self.slots.max_concurrent(),
            }));
            return;
        };
        job.advance(JobState::Admitted);
        tracing::info!(job_id, kind = %self.kind, "Job start");

        let result = self.run_admitted(&mut job, request.body, &cancel).await;
        drop(slot);

        match result {
            Ok(stream) => {
                if responder.respond(Ok(stream)) {
                    job.advance(JobState::Succeeded);
                    tracing::info!(job_id, kind = %self.kind, "Job end");
                } else {
                    job.advance(JobState::TimedOut);
                    tracing::info!(job_id, kind = %self.kind, "Late completion suppressed");
                }
            }
            Err(JobError::Cancelled(_)) => {
                job.advance(JobState::TimedOut);
                tracing::info!(job_id, kind = %self.kind, "Job interrupted");
            }
            Err(e) => {
                job.advance(JobState::Failed);
                tracing::error!(job_id, kind = %self.kind, error = %e, "Job failed");
                responder.respond(Err(e));
            }
        }

        if self.scratch == ScratchPolicy::Erase {
            if let Err(e) = self.staging.erase_job_dir(job_id).await {
                tracing::warn!(job_id, error = %e, "Failed to erase job directory");
            }
        }
    }

    async fn run_admitted(
        &self,
        job: &mut JobTracker,
        body: Box<dyn UploadBody>,
        cancel: &CancellationToken,
    ) -> Result<ArchiveStream, JobError> {
        job.advance(JobState::Staging);
        let settings = self.stage(job.id, body, cancel).await?.single_thread();
        checkpoint(job.id, cancel)?;

        job.advance(JobState::Running);
        self.run_task(job.id, settings.clone(), cancel).await?;
        checkpoint(job.id, cancel)?;

        let archive_path = self.staging.path_for(job.id, InputRole::Archive);
        let packaged = archive::package(settings.output_dir(), &archive_path).await?;
        checkpoint(job.id, cancel)?;

        tracing::debug!(job_id = job.id, size = packaged.size, "Archive ready");
        archive::open(&packaged, self.kind.result_file_name()).await
    }

    /// Drain the upload into the job directory and build the task settings
    /// from the staged paths.
    async fn stage(
        &self,
        job_id: JobId,
        body: Box<dyn UploadBody>,
        cancel: &CancellationToken,
    ) -> Result<TaskSettings, JobError> {
        self.staging.ensure_job_dir(job_id).await?;

        let mut sink = UploadSink::new(self.kind, job_id, &self.staging);
        tokio::select! {
            drained = body.drain(&mut sink) => drained?,
            () = cancel.cancelled() => return Err(JobError::Cancelled(job_id)),
        }
        let upload = sink.finish();

        let settings = match self.kind {
            JobKind::Registration => {
                let count = upload.parse_count(NUMBER_OF_TRANSFORMS_FIELD)?;
                let received = upload.transform_param_count();
                if count > received {
                    return Err(JobError::InvalidField {
                        field: NUMBER_OF_TRANSFORMS_FIELD.into(),
                        reason: format!("{count} announced but {received} transformParam parts sent"),
                    });
                }

                let mut transforms = Vec::new();
                for index in 0..count {
                    transforms.push(upload.require(InputRole::TransformParam(index))?);
                }

                TaskSettings::Registration(RegistrationSettings {
                    fixed_image: upload.require(InputRole::FixedImage)?,
                    moving_image: upload.require(InputRole::MovingImage)?,
                    initial_transform: upload.path(InputRole::InitialTransform).cloned(),
                    transforms,
                    output_dir: self.staging.ensure_output_dir(job_id).await?,
                    threads: None,
                })
            }
            JobKind::Transform => TaskSettings::Transform(TransformSettings {
                points: upload.require(InputRole::InputPoints)?,
                transform: upload.require(InputRole::TransformFiles)?,
                output_dir: self.staging.ensure_output_dir(job_id).await?,
                threads: None,
            }),
        };
        Ok(settings)
    }

    /// Run the external task on a blocking thread.
    ///
    /// If the token fires first the thread is abandoned: it keeps running
    /// until the task returns, but its result is ignored. Kinds that erase
    /// their scratch first wait up to [`CANCEL_GRACE`] for the thread, so the
    /// erase does not race its last writes.
    async fn run_task(
        &self,
        job_id: JobId,
        settings: TaskSettings,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        let task = Arc::clone(&self.task);
        let token = cancel.clone();
        let mut handle = tokio::task::spawn_blocking(move || task.run(&settings, &token));

        let joined = tokio::select! {
            joined = &mut handle => Some(joined),
            () = cancel.cancelled() => None,
        };

        match joined {
            Some(Ok(Ok(()))) => Ok(()),
            Some(Ok(Err(TaskError::Cancelled))) => Err(JobError::Cancelled(job_id)),
            Some(Ok(Err(e))) => Err(JobError::ExternalTask(e)),
            Some(Err(e)) => Err(JobError::ExternalTask(TaskError::Failed(format!(
                "External task panicked: {e}"
            )))),
            None if self.scratch == ScratchPolicy::Erase => {
                if tokio::time::timeout(CANCEL_GRACE, handle).await.is_err() {
                    tracing::warn!(job_id, "External task still running after cancellation grace");
                }
                Err(JobError::Cancelled(job_id))
            }
            None => {
                tracing::warn!(job_id, "Abandoning external task after cancellation");
                Err(JobError::Cancelled(job_id))
            }
        }
    }
}

fn checkpoint(job_id: JobId, cancel: &CancellationToken) -> Result<(), JobError> {
    if cancel.is_cancelled() {
        Err(JobError::Cancelled(job_id))
    } else {
        Ok(())
    }
}

/// Lifecycle bookkeeping for one job, logged on every transition.
struct JobTracker {
    kind: JobKind,
    id: JobId,
    state: JobState,
}

impl JobTracker {
    fn new(kind: JobKind, id: JobId) -> Self {
        Self {
            kind,
            id,
            state: JobState::Queued,
        }
    }

    fn advance(&mut self, next: JobState) {
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                job_id = self.id,
                kind = %self.kind,
                from = %self.state,
                to = %next,
                "Unexpected job state transition",
            );
        }
        tracing::debug!(job_id = self.id, kind = %self.kind, from = %self.state, to = %next, "Job state changed");
        self.state = next;
    }
}
