use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use shared::{
    domain::{DeviceId, DeviceKind, JobId},
    error::{ChannelError, ServiceError},
    protocol::{
        DeviceCommand, JobStatus, StatusGroup, UpgradeCmd, UpgradeRequest, UpgradeResponse,
    },
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use crate::events::ConsoleEvent;
use crate::poll::{PollOutcome, PollTask};
use crate::session::CommandLink;

pub const POLL_INTERVAL: Duration = Duration::from_millis(3000);

/// Application slot the device boots into to run its updater.
pub const UPDATER_APP: &str = "updatepy";

const PERFORM_PROMPT: &str = "This will disconnect the device while it attempts to upgrade. \
The device must remain on during this process. Proceed?";

/// Remote job-status service. The production implementation speaks the
/// upgrade REST endpoint; tests script responses.
#[async_trait]
pub trait UpgradeService: Send + Sync {
    async fn submit(&self, request: UpgradeRequest) -> Result<UpgradeResponse, ServiceError>;
}

pub struct HttpUpgradeService {
    http: Client,
    api_base: String,
}

impl HttpUpgradeService {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<String>,
}

#[async_trait]
impl UpgradeService for HttpUpgradeService {
    async fn submit(&self, request: UpgradeRequest) -> Result<UpgradeResponse, ServiceError> {
        let url = format!(
            "{}/{}/{}/upgrade",
            self.api_base, request.device_type, request.device_id
        );
        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|err| ServiceError::Transport(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::OK {
            response
                .json::<UpgradeResponse>()
                .await
                .map_err(|err| ServiceError::InvalidResponse(err.to_string()))
        } else {
            let errors = response
                .json::<ErrorBody>()
                .await
                .map(|body| body.errors)
                .unwrap_or_default();
            Err(ServiceError::Rejected {
                status: status.as_u16(),
                errors,
            })
        }
    }
}

/// Yes/no decision supplied by the operator environment before the
/// device-side upgrade is triggered.
#[async_trait]
pub trait ConfirmGate: Send + Sync {
    async fn confirm(&self, prompt: &str) -> bool;
}

pub struct AutoConfirm;

#[async_trait]
impl ConfirmGate for AutoConfirm {
    async fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
pub struct UpgradeSnapshot {
    pub job_id: Option<JobId>,
    pub status: Option<JobStatus>,
    pub progress: &'static str,
    pub availability: &'static str,
    pub state_name: &'static str,
    pub can_perform: bool,
}

struct JobState {
    job_id: Option<JobId>,
    status: Option<JobStatus>,
    can_perform: bool,
}

/// Tracks one firmware job's lifecycle against the job service and the
/// device channel. Job identity is bind-once; the orchestrator itself
/// outlives terminal jobs so a new one can be created afterward.
pub struct UpgradeOrchestrator {
    device_kind: DeviceKind,
    device_id: DeviceId,
    service: Arc<dyn UpgradeService>,
    link: Arc<dyn CommandLink>,
    gate: Arc<dyn ConfirmGate>,
    events: broadcast::Sender<ConsoleEvent>,
    poll_interval: Duration,
    job: Mutex<JobState>,
    slot: Mutex<Option<PollTask>>,
}

impl UpgradeOrchestrator {
    pub fn new(
        device_kind: DeviceKind,
        device_id: DeviceId,
        service: Arc<dyn UpgradeService>,
        link: Arc<dyn CommandLink>,
        gate: Arc<dyn ConfirmGate>,
        events: broadcast::Sender<ConsoleEvent>,
    ) -> Arc<Self> {
        Self::with_poll_interval(
            device_kind,
            device_id,
            service,
            link,
            gate,
            events,
            POLL_INTERVAL,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_poll_interval(
        device_kind: DeviceKind,
        device_id: DeviceId,
        service: Arc<dyn UpgradeService>,
        link: Arc<dyn CommandLink>,
        gate: Arc<dyn ConfirmGate>,
        events: broadcast::Sender<ConsoleEvent>,
        poll_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            device_kind,
            device_id,
            service,
            link,
            gate,
            events,
            poll_interval,
            job: Mutex::new(JobState {
                job_id: None,
                status: None,
                can_perform: false,
            }),
            slot: Mutex::new(None),
        })
    }

    pub async fn snapshot(&self) -> UpgradeSnapshot {
        let job = self.job.lock().await;
        let (progress, availability, state_name) = match job.status {
            Some(status) => (status.progress(), status.availability(), status.state_name()),
            None => ("", "", ""),
        };
        UpgradeSnapshot {
            job_id: job.job_id,
            status: job.status,
            progress,
            availability,
            state_name,
            can_perform: job.can_perform,
        }
    }

    /// True while a poll task started by `create()` or `perform()` runs.
    pub async fn watching(&self) -> bool {
        let slot = self.slot.lock().await;
        slot.as_ref().is_some_and(PollTask::is_active)
    }

    /// Query the job service for the current job and record its status.
    /// Returns the raw response for callers needing job or status.
    pub async fn check(&self) -> Result<UpgradeResponse, ServiceError> {
        let held = { self.job.lock().await.job_id };
        let request = UpgradeRequest {
            cmd: UpgradeCmd::Check,
            job_id: held,
            device_type: self.device_kind,
            device_id: self.device_id.clone(),
        };
        let response = match self.service.submit(request).await {
            Ok(response) => response,
            Err(err) => {
                self.surface_service_error(&err);
                return Err(err);
            }
        };
        self.record(&response).await;
        Ok(response)
    }

    /// Request a new upgrade job, then watch it until the server reports
    /// it ready (or errored). A live upgrade, a server-error state, or an
    /// already-running watch makes this a logged no-op.
    pub async fn create(self: &Arc<Self>) -> Result<(), ServiceError> {
        let checked = self.check().await?;
        let group = checked.status.group();
        if group.upgrade_live() {
            let _ = self.events.send(ConsoleEvent::info(
                "an upgrade is already in progress; not creating another",
            ));
            return Ok(());
        }
        if !group.allows_new_job() {
            let _ = self.events.send(ConsoleEvent::error(
                "upgrade service reports an error state; cannot create a job",
            ));
            return Ok(());
        }

        let mut slot = self.slot.lock().await;
        if slot.as_ref().is_some_and(PollTask::is_active) {
            let _ = self
                .events
                .send(ConsoleEvent::info("an upgrade task is already running"));
            return Ok(());
        }

        let request = UpgradeRequest {
            cmd: UpgradeCmd::Init,
            job_id: None,
            device_type: self.device_kind,
            device_id: self.device_id.clone(),
        };
        let response = match self.service.submit(request).await {
            Ok(response) => response,
            Err(err) => {
                self.surface_service_error(&err);
                return Err(err);
            }
        };
        self.record(&response).await;

        *slot = Some(self.watch_until(|group| {
            matches!(group, StatusGroup::Ready | StatusGroup::ServerError)
        }));
        Ok(())
    }

    /// Trigger the staged upgrade on the device: behind the confirmation
    /// gate, switch the active application to the updater, reset, and
    /// watch the job until it settles.
    pub async fn perform(self: &Arc<Self>) -> Result<(), ChannelError> {
        if !self.gate.confirm(PERFORM_PROMPT).await {
            let _ = self
                .events
                .send(ConsoleEvent::info("device upgrade not confirmed"));
            return Ok(());
        }

        let mut slot = self.slot.lock().await;
        if slot.as_ref().is_some_and(PollTask::is_active) {
            let _ = self
                .events
                .send(ConsoleEvent::info("an upgrade task is already running"));
            return Ok(());
        }

        self.link
            .send_command(DeviceCommand::cmd(
                "switch_app",
                vec![UPDATER_APP.into()],
            ))
            .await?;
        self.link
            .send_command(DeviceCommand::cmd("reset", Vec::new()))
            .await?;

        *slot = Some(self.watch_until(StatusGroup::settled));
        Ok(())
    }

    /// Cooperatively cancel any active watch. Idempotent.
    pub async fn stop(&self) {
        let slot = self.slot.lock().await;
        if let Some(task) = slot.as_ref() {
            task.cancel();
        }
    }

    fn watch_until(self: &Arc<Self>, done: fn(StatusGroup) -> bool) -> PollTask {
        let orchestrator = Arc::clone(self);
        PollTask::spawn(self.poll_interval, move || {
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                match orchestrator.check().await {
                    Ok(response) if done(response.status.group()) => PollOutcome::Stop,
                    Ok(_) => PollOutcome::Continue,
                    // The failed check already surfaced its errors; the
                    // operation is aborted rather than retried blindly.
                    Err(_) => PollOutcome::Stop,
                }
            }
        })
    }

    async fn record(&self, response: &UpgradeResponse) {
        let mut job = self.job.lock().await;
        match (job.job_id, response.job_id) {
            (None, Some(reported)) if reported.is_assigned() => {
                job.job_id = Some(reported);
                debug!(job_id = reported.0, "bound upgrade job id");
            }
            (Some(held), Some(reported)) if held != reported => {
                warn!(
                    held = held.0,
                    reported = reported.0,
                    "job service reported a different job id; keeping the bound one"
                );
            }
            _ => {}
        }

        let status = response.status;
        job.status = Some(status);
        job.can_perform = status.group() == StatusGroup::Ready;
        let _ = self.events.send(ConsoleEvent::UpgradeStatusChanged {
            job_id: job.job_id,
            status,
            state_name: status.state_name(),
            progress: status.progress(),
            availability: status.availability(),
            can_perform: job.can_perform,
        });
    }

    fn surface_service_error(&self, err: &ServiceError) {
        for line in err.log_lines() {
            let _ = self.events.send(ConsoleEvent::error(line));
        }
    }
}
