use std::sync::Arc;

use regserver_core::admission::{Admission, AdmissionLedger, JobIdGenerator};
use regserver_core::executor::JobExecutor;
use regserver_core::staging::StagingArea;
use regserver_core::task::{CommandTask, ExternalTask};
use regserver_core::types::JobKind;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; every field is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Executor for image registration jobs (pre-registered ids).
    pub registration: Arc<JobExecutor>,
    /// Executor for point transform jobs (server-assigned ids).
    pub transform: Arc<JobExecutor>,
}

impl AppState {
    /// State running the configured elastix / transformix binaries.
    pub fn from_config(config: ServerConfig) -> Self {
        let registration = Arc::new(CommandTask::new(config.registration.program.clone()));
        let transform = Arc::new(CommandTask::new(config.transform.program.clone()));
        Self::with_tasks(config, registration, transform)
    }

    /// State with explicit external tasks for each kind.
    pub fn with_tasks(
        config: ServerConfig,
        registration_task: Arc<dyn ExternalTask>,
        transform_task: Arc<dyn ExternalTask>,
    ) -> Self {
        let ledger = Arc::new(AdmissionLedger::new(config.queue_ticket_ttl));
        let registration = build_executor(
            &config,
            JobKind::Registration,
            Admission::Ledger(ledger),
            registration_task,
        );
        let transform = build_executor(
            &config,
            JobKind::Transform,
            Admission::Sequential(Arc::new(JobIdGenerator::new())),
            transform_task,
        );

        Self {
            config: Arc::new(config),
            registration,
            transform,
        }
    }

    pub fn executor(&self, kind: JobKind) -> &Arc<JobExecutor> {
        match kind {
            JobKind::Registration => &self.registration,
            JobKind::Transform => &self.transform,
        }
    }
}

fn build_executor(
    config: &ServerConfig,
    kind: JobKind,
    admission: Admission,
    task: Arc<dyn ExternalTask>,
) -> Arc<JobExecutor> {
    let settings = config.kind(kind);
    Arc::new(
        JobExecutor::new(kind, StagingArea::new(config.kind_root(kind)), task)
            .with_admission(admission)
            .with_max_concurrent(settings.max_concurrent)
            .with_timeout(settings.timeout)
            .with_scratch_policy(settings.scratch),
    )
}
