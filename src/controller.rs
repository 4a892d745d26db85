//! Upload submission and job-status polling.
//!
//! `UploadController` drives one job per report type through
//! `Idle -> Uploading -> Waiting -> {Completed | Failed | TimedOut}` and
//! publishes every transition to a [`StatusBoard`]. Transport failures and
//! backend-reported failures both surface as `Failed`; the distinction is
//! kept in [`FailureCause`] for logs only.

use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    backend::{BackendError, ReportBackend, StatusResponse, SubmitResponse, models::RemoteStatus},
    jobs::{JobState, ReportType, SourceFile, UploadJob},
};

const SUBMIT_FAILED: &str = "Failed to upload file";
const UNREACHABLE: &str = "Could not reach the processing service";
const NOT_ACKNOWLEDGED: &str = "Upload was not acknowledged by the server";
const PROCESSING_FAILED: &str = "Processing failed";
const STATUS_UNAVAILABLE: &str = "Could not fetch processing status";
const TIMED_OUT: &str = "Processing did not finish in time";

/// Bounds for the status polling loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between a `waiting` answer and the next status request.
    pub interval: Duration,
    /// Number of `waiting` answers tolerated before giving up.
    pub max_attempts: u32,
    /// Wall-clock ceiling for the whole loop.
    pub max_elapsed: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            max_attempts: 150,
            max_elapsed: Some(Duration::from_secs(600)),
        }
    }
}

/// Why a job ended up `Failed`. Only used for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureCause {
    /// No HTTP response at all.
    Transport,
    /// Non-2xx response.
    Rejected,
    /// 2xx response with an unusable body.
    Malformed,
    /// The backend reported `status: failed`.
    Processing,
}

/// Errors from [`UploadController::submit`].
#[derive(Debug, Error)]
pub enum SubmitError {
    /// A job for this report type is still uploading or waiting.
    #[error("{report_type} report is already being processed")]
    Conflict { report_type: ReportType },
    /// The submission failed; `message` is safe to show to the user.
    #[error("{message}")]
    Failed {
        cause: FailureCause,
        message: String,
    },
}

/// How a polling loop ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TerminalOutcome {
    Completed,
    Failed(String),
    /// The poll bound was exhausted while the backend still said `waiting`.
    TimedOut,
    /// The caller cancelled, or the job was superseded by a reset.
    Cancelled,
}

impl TerminalOutcome {
    /// Whether downstream views should be refreshed.
    pub fn requires_refresh(&self) -> bool {
        matches!(self, TerminalOutcome::Completed)
    }
}

/// Reference to a job accepted by the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobHandle {
    pub report_type: ReportType,
    pub job_id: String,
    /// Lifecycle the handle belongs to; stale handles never touch newer jobs.
    pub attempt: Uuid,
}

/// Latest [`UploadJob`] per report type, observable through `watch` receivers.
#[derive(Clone, Debug)]
pub struct StatusBoard {
    payment: Arc<watch::Sender<UploadJob>>,
    merchant_tax: Arc<watch::Sender<UploadJob>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        let (payment, _) = watch::channel(UploadJob::idle(ReportType::Payment));
        let (merchant_tax, _) = watch::channel(UploadJob::idle(ReportType::MerchantTax));
        Self {
            payment: Arc::new(payment),
            merchant_tax: Arc::new(merchant_tax),
        }
    }

    /// Receiver that always holds the latest snapshot for `report_type`.
    pub fn subscribe(&self, report_type: ReportType) -> watch::Receiver<UploadJob> {
        self.slot(report_type).subscribe()
    }

    /// Copy of the current snapshot.
    pub fn snapshot(&self, report_type: ReportType) -> UploadJob {
        self.slot(report_type).borrow().clone()
    }

    fn slot(&self, report_type: ReportType) -> &watch::Sender<UploadJob> {
        match report_type {
            ReportType::Payment => &self.payment,
            ReportType::MerchantTax => &self.merchant_tax,
        }
    }

    /// Apply `f` only while the slot still belongs to `attempt`.
    fn update(&self, report_type: ReportType, attempt: Uuid, f: impl FnOnce(&mut UploadJob)) -> bool {
        self.slot(report_type).send_if_modified(|job| {
            if job.attempt != attempt {
                return false;
            }
            f(job);
            true
        })
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

/// Submits report files and polls their processing status.
pub struct UploadController<B> {
    backend: Arc<B>,
    policy: PollPolicy,
    board: StatusBoard,
}

impl<B: ReportBackend> UploadController<B> {
    pub fn new(backend: Arc<B>, policy: PollPolicy, board: StatusBoard) -> Self {
        Self {
            backend,
            policy,
            board,
        }
    }

    pub fn board(&self) -> &StatusBoard {
        &self.board
    }

    /// Upload `file` for `report_type` and wait for the backend acknowledgement.
    ///
    /// Fails fast with [`SubmitError::Conflict`] while a job for the same report
    /// type is uploading or waiting. Submitting from a terminal state discards
    /// the previous job. Never retries.
    pub async fn submit(
        &self,
        file: SourceFile,
        report_type: ReportType,
    ) -> Result<JobHandle, SubmitError> {
        let attempt = self.reserve(report_type, &file.file_name)?;
        self.submit_reserved(file, report_type, attempt).await
    }

    /// Claim the slot for `report_type` and move it to `Uploading`.
    ///
    /// Synchronous, so a caller can own the slot before spawning the upload.
    /// Returns the attempt id that [`submit_reserved`](Self::submit_reserved)
    /// must be given.
    pub fn reserve(&self, report_type: ReportType, file_name: &str) -> Result<Uuid, SubmitError> {
        let mut attempt = None;
        self.board.slot(report_type).send_if_modified(|job| {
            if job.state.is_in_flight() {
                return false;
            }
            attempt = Some(job.begin_upload(file_name));
            true
        });
        attempt.ok_or_else(|| {
            tracing::warn!(%report_type, "submit rejected: job already in flight");
            SubmitError::Conflict { report_type }
        })
    }

    /// Send `file` for a slot claimed with [`reserve`](Self::reserve).
    pub async fn submit_reserved(
        &self,
        file: SourceFile,
        report_type: ReportType,
        attempt: Uuid,
    ) -> Result<JobHandle, SubmitError> {
        tracing::info!(
            %report_type,
            file = %file.file_name,
            bytes = file.bytes.len(),
            "submitting report"
        );
        match interpret_submit(self.backend.submit_report(report_type, file).await) {
            Ok(job_id) => {
                tracing::info!(%report_type, %job_id, "report accepted");
                self.board
                    .update(report_type, attempt, |job| job.accept(job_id.clone()));
                Ok(JobHandle {
                    report_type,
                    job_id,
                    attempt,
                })
            }
            Err((cause, message)) => {
                tracing::warn!(%report_type, ?cause, %message, "report submission failed");
                self.board
                    .update(report_type, attempt, |job| job.fail(message.clone()));
                Err(SubmitError::Failed { cause, message })
            }
        }
    }

    /// Poll the status endpoint until the job reaches a terminal state, the
    /// poll bound is exhausted, or `cancel` fires.
    ///
    /// Calling this again for a finished job returns the recorded outcome
    /// without contacting the backend.
    pub async fn poll_until_terminal(
        &self,
        handle: &JobHandle,
        cancel: &CancellationToken,
    ) -> TerminalOutcome {
        let current = self.board.snapshot(handle.report_type);
        if current.attempt != handle.attempt {
            return TerminalOutcome::Cancelled;
        }
        match current.state {
            JobState::Waiting => {}
            JobState::Completed => return TerminalOutcome::Completed,
            JobState::Failed => {
                return TerminalOutcome::Failed(current.last_error.unwrap_or_default());
            }
            JobState::TimedOut => return TerminalOutcome::TimedOut,
            JobState::Idle | JobState::Uploading => return TerminalOutcome::Cancelled,
        }

        let started = tokio::time::Instant::now();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let resp = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.abandon(handle),
                resp = self.backend.job_status(&handle.job_id) => resp,
            };

            match interpret_status(resp) {
                PollStep::Waiting => {
                    tracing::debug!(job_id = %handle.job_id, attempts, "job still waiting");
                    let elapsed_out = self
                        .policy
                        .max_elapsed
                        .is_some_and(|max| started.elapsed() >= max);
                    if attempts >= self.policy.max_attempts || elapsed_out {
                        tracing::warn!(
                            job_id = %handle.job_id,
                            attempts,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "polling bound exhausted"
                        );
                        return self.finish(handle, TerminalOutcome::TimedOut);
                    }
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return self.abandon(handle),
                        _ = tokio::time::sleep(self.policy.interval) => {}
                    }
                }
                PollStep::Completed => {
                    tracing::info!(job_id = %handle.job_id, attempts, "job completed");
                    return self.finish(handle, TerminalOutcome::Completed);
                }
                PollStep::Failed(cause, message) => {
                    tracing::warn!(job_id = %handle.job_id, ?cause, %message, "job failed");
                    return self.finish(handle, TerminalOutcome::Failed(message));
                }
            }
        }
    }

    /// Return a terminal job to `Idle`. In-flight jobs are left alone; cancel
    /// their poll loop instead.
    pub fn reset(&self, report_type: ReportType) -> bool {
        let changed = self.board.slot(report_type).send_if_modified(|job| {
            if !job.state.is_terminal() {
                return false;
            }
            job.reset();
            true
        });
        if changed {
            tracing::info!(%report_type, "job reset");
        }
        changed
    }

    /// Publish a terminal outcome if the slot still belongs to `handle`.
    fn finish(&self, handle: &JobHandle, outcome: TerminalOutcome) -> TerminalOutcome {
        let applied = self.board.update(handle.report_type, handle.attempt, |job| match &outcome {
            TerminalOutcome::Completed => job.complete(),
            TerminalOutcome::Failed(message) => job.fail(message.clone()),
            TerminalOutcome::TimedOut => job.time_out(TIMED_OUT),
            TerminalOutcome::Cancelled => job.reset(),
        });
        if applied {
            outcome
        } else {
            TerminalOutcome::Cancelled
        }
    }

    /// Stop polling on cancellation; the waiting job goes back to `Idle`.
    fn abandon(&self, handle: &JobHandle) -> TerminalOutcome {
        tracing::info!(job_id = %handle.job_id, "polling cancelled");
        self.board.update(handle.report_type, handle.attempt, |job| {
            if job.state == JobState::Waiting {
                job.reset();
            }
        });
        TerminalOutcome::Cancelled
    }
}

/// Map a submit result to a job id or a user-facing failure.
fn interpret_submit(
    result: Result<SubmitResponse, BackendError>,
) -> Result<String, (FailureCause, String)> {
    match result {
        Ok(resp) => resp
            .job_id
            .filter(|id| !id.trim().is_empty())
            .ok_or((FailureCause::Malformed, NOT_ACKNOWLEDGED.to_string())),
        Err(BackendError::Status { status, message }) => {
            tracing::debug!(status, "upload rejected");
            Err((
                FailureCause::Rejected,
                message.unwrap_or_else(|| SUBMIT_FAILED.to_string()),
            ))
        }
        Err(BackendError::Transport(e)) => {
            tracing::debug!("upload transport error: {e}");
            Err((FailureCause::Transport, UNREACHABLE.to_string()))
        }
        Err(BackendError::Decode(e)) => {
            tracing::debug!("upload response decode error: {e}");
            Err((FailureCause::Malformed, NOT_ACKNOWLEDGED.to_string()))
        }
    }
}

enum PollStep {
    Waiting,
    Completed,
    Failed(FailureCause, String),
}

fn interpret_status(resp: Result<StatusResponse, BackendError>) -> PollStep {
    match resp {
        Ok(StatusResponse { status, message }) => match status {
            RemoteStatus::Waiting => PollStep::Waiting,
            RemoteStatus::Completed => PollStep::Completed,
            RemoteStatus::Failed => PollStep::Failed(
                FailureCause::Processing,
                message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| PROCESSING_FAILED.to_string()),
            ),
            RemoteStatus::Unknown => {
                PollStep::Failed(FailureCause::Malformed, STATUS_UNAVAILABLE.to_string())
            }
        },
        Err(BackendError::Status { status, .. }) => {
            tracing::debug!(status, "status request rejected");
            PollStep::Failed(FailureCause::Rejected, STATUS_UNAVAILABLE.to_string())
        }
        Err(BackendError::Transport(e)) => {
            tracing::debug!("status transport error: {e}");
            PollStep::Failed(FailureCause::Transport, UNREACHABLE.to_string())
        }
        Err(BackendError::Decode(e)) => {
            tracing::debug!("status decode error: {e}");
            PollStep::Failed(FailureCause::Malformed, STATUS_UNAVAILABLE.to_string())
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::{collections::VecDeque, sync::Mutex};

    /// Backend fake that replays scripted answers and records every call.
    #[derive(Default)]
    pub(crate) struct ScriptedBackend {
        submits: Mutex<VecDeque<Result<SubmitResponse, BackendError>>>,
        statuses: Mutex<VecDeque<Result<StatusResponse, BackendError>>>,
        pub(crate) submitted: Mutex<Vec<(ReportType, String)>>,
        pub(crate) polled: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        pub(crate) fn accept(self, job_id: &str) -> Self {
            self.submits.lock().unwrap().push_back(Ok(SubmitResponse {
                job_id: Some(job_id.into()),
                status: Some("waiting".into()),
                message: Some("File uploaded".into()),
            }));
            self
        }

        pub(crate) fn submit_error(self, e: BackendError) -> Self {
            self.submits.lock().unwrap().push_back(Err(e));
            self
        }

        pub(crate) fn status(self, status: RemoteStatus) -> Self {
            self.statuses.lock().unwrap().push_back(Ok(StatusResponse {
                status,
                message: None,
            }));
            self
        }

        pub(crate) fn status_error(self, e: BackendError) -> Self {
            self.statuses.lock().unwrap().push_back(Err(e));
            self
        }

        pub(crate) fn poll_count(&self) -> usize {
            self.polled.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ReportBackend for ScriptedBackend {
        async fn submit_report(
            &self,
            report_type: ReportType,
            file: SourceFile,
        ) -> Result<SubmitResponse, BackendError> {
            self.submitted
                .lock()
                .unwrap()
                .push((report_type, file.file_name));
            self.submits
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(BackendError::Transport("no script".into())))
        }

        async fn job_status(&self, job_id: &str) -> Result<StatusResponse, BackendError> {
            self.polled.lock().unwrap().push(job_id.to_string());
            // 台本が尽きたら `waiting` を返し続ける。
            self.statuses.lock().unwrap().pop_front().unwrap_or(Ok(StatusResponse {
                status: RemoteStatus::Waiting,
                message: None,
            }))
        }
    }

    fn controller(
        backend: ScriptedBackend,
        policy: PollPolicy,
    ) -> (UploadController<ScriptedBackend>, Arc<ScriptedBackend>) {
        let backend = Arc::new(backend);
        let ctrl = UploadController::new(backend.clone(), policy, StatusBoard::new());
        (ctrl, backend)
    }

    fn csv(name: &str) -> SourceFile {
        SourceFile::new(name, b"date,amount\n2024-01-01,10\n".to_vec())
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_then_completed_polls_twice() {
        // 待機中の後に完了した場合、2回のポーリングで完了になることを検証する。
        let (ctrl, backend) = controller(
            ScriptedBackend::default()
                .accept("j1")
                .status(RemoteStatus::Waiting)
                .status(RemoteStatus::Completed),
            PollPolicy::default(),
        );

        let handle = ctrl.submit(csv("payments.csv"), ReportType::Payment).await.unwrap();
        assert_eq!(handle.job_id, "j1");
        let snap = ctrl.board().snapshot(ReportType::Payment);
        assert_eq!(snap.state, JobState::Waiting);
        assert_eq!(snap.job_id.as_deref(), Some("j1"));

        let started = tokio::time::Instant::now();
        let outcome = ctrl.poll_until_terminal(&handle, &CancellationToken::new()).await;
        assert_eq!(outcome, TerminalOutcome::Completed);
        assert!(outcome.requires_refresh());
        assert_eq!(backend.poll_count(), 2);
        // 2回のポーリングの間に1回だけ待つ。
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(2000) && elapsed < Duration::from_millis(4000));
        assert_eq!(ctrl.board().snapshot(ReportType::Payment).state, JobState::Completed);

        assert_eq!(
            backend.submitted.lock().unwrap().as_slice(),
            &[(ReportType::Payment, "payments.csv".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_http_error_fails_without_polling() {
        // 投入がHTTPエラーならポーリングせずに失敗になることを検証する。
        let (ctrl, backend) = controller(
            ScriptedBackend::default().submit_error(BackendError::Status {
                status: 500,
                message: None,
            }),
            PollPolicy::default(),
        );

        let err = ctrl
            .submit(csv("mtr.csv"), ReportType::MerchantTax)
            .await
            .unwrap_err();
        match err {
            SubmitError::Failed { cause, message } => {
                assert_eq!(cause, FailureCause::Rejected);
                assert!(!message.is_empty());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let snap = ctrl.board().snapshot(ReportType::MerchantTax);
        assert_eq!(snap.state, JobState::Failed);
        assert!(snap.job_id.is_none());
        assert!(snap.last_error.as_deref().is_some_and(|m| !m.is_empty()));
        assert_eq!(backend.poll_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_surfaces_backend_message() {
        // 投入失敗時にバックエンドのメッセージをそのまま表示することを検証する。
        let (ctrl, _) = controller(
            ScriptedBackend::default().submit_error(BackendError::Status {
                status: 422,
                message: Some("Missing column: order_id".into()),
            }),
            PollPolicy::default(),
        );
        let err = ctrl.submit(csv("p.csv"), ReportType::Payment).await.unwrap_err();
        assert_eq!(err.to_string(), "Missing column: order_id");
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_transport_error_hides_raw_text() {
        // 通信エラーの生の文言を利用者へ見せないことを検証する。
        let (ctrl, _) = controller(
            ScriptedBackend::default()
                .submit_error(BackendError::Transport("tcp connect error: 111".into())),
            PollPolicy::default(),
        );
        ctrl.submit(csv("p.csv"), ReportType::Payment).await.unwrap_err();
        let snap = ctrl.board().snapshot(ReportType::Payment);
        assert_eq!(snap.state, JobState::Failed);
        assert_eq!(snap.last_error.as_deref(), Some(UNREACHABLE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_without_job_id_fails() {
        // ジョブIDの無い応答は失敗として扱うことを検証する。
        let backend = ScriptedBackend::default();
        backend.submits.lock().unwrap().push_back(Ok(SubmitResponse {
            job_id: Some("  ".into()),
            status: Some("waiting".into()),
            message: None,
        }));
        let (ctrl, _) = controller(backend, PollPolicy::default());
        let err = ctrl.submit(csv("p.csv"), ReportType::Payment).await.unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Failed {
                cause: FailureCause::Malformed,
                ..
            }
        ));
        assert!(ctrl.board().snapshot(ReportType::Payment).job_id.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_status_stops_polling() {
        // リモートが失敗を返したらポーリングを止めることを検証する。
        let (ctrl, backend) = controller(
            ScriptedBackend::default()
                .accept("j2")
                .status(RemoteStatus::Failed),
            PollPolicy::default(),
        );
        let handle = ctrl.submit(csv("p.csv"), ReportType::Payment).await.unwrap();
        let outcome = ctrl.poll_until_terminal(&handle, &CancellationToken::new()).await;
        assert_eq!(outcome, TerminalOutcome::Failed(PROCESSING_FAILED.into()));
        assert!(!outcome.requires_refresh());
        assert_eq!(backend.poll_count(), 1);
        let snap = ctrl.board().snapshot(ReportType::Payment);
        assert_eq!(snap.state, JobState::Failed);
        assert_eq!(snap.job_id.as_deref(), Some("j2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_transport_error_collapses_to_failed() {
        // ポーリング中の通信エラーは失敗に畳み込まれることを検証する。
        let (ctrl, backend) = controller(
            ScriptedBackend::default()
                .accept("j3")
                .status_error(BackendError::Transport("reset by peer".into())),
            PollPolicy::default(),
        );
        let handle = ctrl.submit(csv("p.csv"), ReportType::Payment).await.unwrap();
        let outcome = ctrl.poll_until_terminal(&handle, &CancellationToken::new()).await;
        assert_eq!(outcome, TerminalOutcome::Failed(UNREACHABLE.into()));
        assert_eq!(backend.poll_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_polls_in_order() {
        // 同じジョブIDで順番にポーリングすることを検証する。
        let (ctrl, backend) = controller(
            ScriptedBackend::default()
                .accept("j4")
                .status(RemoteStatus::Waiting)
                .status(RemoteStatus::Waiting)
                .status(RemoteStatus::Completed),
            PollPolicy::default(),
        );
        let handle = ctrl.submit(csv("p.csv"), ReportType::Payment).await.unwrap();
        let outcome = ctrl.poll_until_terminal(&handle, &CancellationToken::new()).await;
        assert_eq!(outcome, TerminalOutcome::Completed);
        assert_eq!(backend.polled.lock().unwrap().as_slice(), &["j4", "j4", "j4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_poll_after_terminal_is_idempotent() {
        // 終了後の再ポーリングはバックエンドを呼ばず同じ結果を返すことを検証する。
        let (ctrl, backend) = controller(
            ScriptedBackend::default()
                .accept("j5")
                .status(RemoteStatus::Completed),
            PollPolicy::default(),
        );
        let handle = ctrl.submit(csv("p.csv"), ReportType::Payment).await.unwrap();
        let cancel = CancellationToken::new();
        assert_eq!(ctrl.poll_until_terminal(&handle, &cancel).await, TerminalOutcome::Completed);
        assert_eq!(ctrl.poll_until_terminal(&handle, &cancel).await, TerminalOutcome::Completed);
        assert_eq!(ctrl.poll_until_terminal(&handle, &cancel).await, TerminalOutcome::Completed);
        assert_eq!(backend.poll_count(), 1);
        assert_eq!(ctrl.board().snapshot(ReportType::Payment).state, JobState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_bound_times_out() {
        // 試行回数の上限でタイムアウトになることを検証する。
        let policy = PollPolicy {
            interval: Duration::from_millis(2000),
            max_attempts: 3,
            max_elapsed: None,
        };
        let (ctrl, backend) = controller(ScriptedBackend::default().accept("j6"), policy);
        let handle = ctrl.submit(csv("p.csv"), ReportType::Payment).await.unwrap();
        let outcome = ctrl.poll_until_terminal(&handle, &CancellationToken::new()).await;
        assert_eq!(outcome, TerminalOutcome::TimedOut);
        assert_eq!(backend.poll_count(), 3);
        let snap = ctrl.board().snapshot(ReportType::Payment);
        assert_eq!(snap.state, JobState::TimedOut);
        assert_ne!(snap.state, JobState::Failed);

        // タイムアウト後はポーリングしない。
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(backend.poll_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_bound_times_out() {
        // 経過時間の上限でタイムアウトになることを検証する。
        let policy = PollPolicy {
            interval: Duration::from_millis(2000),
            max_attempts: u32::MAX,
            max_elapsed: Some(Duration::from_secs(5)),
        };
        let (ctrl, backend) = controller(ScriptedBackend::default().accept("j7"), policy);
        let handle = ctrl.submit(csv("p.csv"), ReportType::Payment).await.unwrap();
        let outcome = ctrl.poll_until_terminal(&handle, &CancellationToken::new()).await;
        assert_eq!(outcome, TerminalOutcome::TimedOut);
        // t=0, 2s, 4s, 6s にポーリングし、4回目で 6s >= 5s となる。
        assert_eq!(backend.poll_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_submit_while_waiting_conflicts() {
        // 処理中の種別への再投入は競合として拒否されることを検証する。
        let (ctrl, backend) = controller(
            ScriptedBackend::default().accept("j8").accept("j9"),
            PollPolicy::default(),
        );
        ctrl.submit(csv("a.csv"), ReportType::Payment).await.unwrap();
        let err = ctrl.submit(csv("b.csv"), ReportType::Payment).await.unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Conflict {
                report_type: ReportType::Payment
            }
        ));
        assert_eq!(backend.submitted.lock().unwrap().len(), 1);

        // 別の種別は影響を受けない。
        let other = ctrl.submit(csv("m.csv"), ReportType::MerchantTax).await.unwrap();
        assert_eq!(other.job_id, "j9");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_claims_slot_before_submission() {
        // 予約した時点で枠が埋まり、続く予約と投入が競合になることを検証する。
        let (ctrl, backend) = controller(ScriptedBackend::default().accept("j5"), PollPolicy::default());
        let attempt = ctrl.reserve(ReportType::Payment, "a.csv").unwrap();
        assert_eq!(ctrl.board().snapshot(ReportType::Payment).state, JobState::Uploading);
        assert!(matches!(
            ctrl.reserve(ReportType::Payment, "b.csv"),
            Err(SubmitError::Conflict { .. })
        ));
        assert!(matches!(
            ctrl.submit(csv("b.csv"), ReportType::Payment).await,
            Err(SubmitError::Conflict { .. })
        ));
        assert!(backend.submitted.lock().unwrap().is_empty());

        let handle = ctrl
            .submit_reserved(csv("a.csv"), ReportType::Payment, attempt)
            .await
            .unwrap();
        assert_eq!(handle.attempt, attempt);
        assert_eq!(ctrl.board().snapshot(ReportType::Payment).state, JobState::Waiting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_polling_and_returns_to_idle() {
        // キャンセルでポーリングが止まり待機状態へ戻ることを検証する。
        let (ctrl, backend) = controller(ScriptedBackend::default().accept("j10"), PollPolicy::default());
        let ctrl = Arc::new(ctrl);
        let handle = ctrl.submit(csv("p.csv"), ReportType::Payment).await.unwrap();
        let cancel = CancellationToken::new();

        let task = {
            let ctrl = ctrl.clone();
            let handle = handle.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { ctrl.poll_until_terminal(&handle, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(4500)).await;
        cancel.cancel();
        assert_eq!(task.await.unwrap(), TerminalOutcome::Cancelled);

        let polls = backend.poll_count();
        assert_eq!(polls, 3);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(backend.poll_count(), polls);

        let snap = ctrl.board().snapshot(ReportType::Payment);
        assert_eq!(snap.state, JobState::Idle);
        assert!(snap.job_id.is_none());
        // 古いハンドルはもう枠と一致しない。
        assert_eq!(
            ctrl.poll_until_terminal(&handle, &CancellationToken::new()).await,
            TerminalOutcome::Cancelled
        );
        assert_eq!(backend.poll_count(), polls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_from_terminal_clears_job() {
        // 終了状態からのリセットでジョブ情報が消えることを検証する。
        let (ctrl, _) = controller(
            ScriptedBackend::default()
                .accept("j11")
                .status(RemoteStatus::Completed)
                .submit_error(BackendError::Status {
                    status: 500,
                    message: None,
                }),
            PollPolicy::default(),
        );
        // まだリセットする対象が無い。
        assert!(!ctrl.reset(ReportType::Payment));

        let handle = ctrl.submit(csv("p.csv"), ReportType::Payment).await.unwrap();
        assert!(!ctrl.reset(ReportType::Payment), "waiting jobs are not reset");
        ctrl.poll_until_terminal(&handle, &CancellationToken::new()).await;
        assert!(ctrl.reset(ReportType::Payment));
        let snap = ctrl.board().snapshot(ReportType::Payment);
        assert_eq!(snap.state, JobState::Idle);
        assert!(snap.job_id.is_none() && snap.last_error.is_none());

        ctrl.submit(csv("p.csv"), ReportType::Payment).await.unwrap_err();
        assert!(ctrl.reset(ReportType::Payment));
        let snap = ctrl.board().snapshot(ReportType::Payment);
        assert_eq!(snap.state, JobState::Idle);
        assert!(snap.last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_latest_snapshot() {
        // 購読者が最新の状態を受け取ることを検証する。
        let (ctrl, _) = controller(ScriptedBackend::default().accept("j12"), PollPolicy::default());
        let mut rx = ctrl.board().subscribe(ReportType::MerchantTax);
        assert_eq!(rx.borrow_and_update().state, JobState::Idle);
        ctrl.submit(csv("m.xlsx"), ReportType::MerchantTax).await.unwrap();
        assert!(rx.has_changed().unwrap());
        let snap = rx.borrow_and_update().clone();
        assert_eq!(snap.state, JobState::Waiting);
        assert_eq!(snap.file_name.as_deref(), Some("m.xlsx"));
    }

    #[test]
    fn test_submit_outcome_is_exactly_one_of_waiting_or_failed() {
        // 投入結果が受理か失敗のどちらか一方になることを検証する。
        let ok = interpret_submit(Ok(SubmitResponse {
            job_id: Some("j".into()),
            ..Default::default()
        }));
        assert_eq!(ok.unwrap(), "j");
        for err in [
            BackendError::Transport("x".into()),
            BackendError::Decode("x".into()),
            BackendError::Status {
                status: 400,
                message: None,
            },
        ] {
            let (_, message) = interpret_submit(Err(err)).unwrap_err();
            assert!(!message.is_empty());
        }
    }
}
