//! Background worker handling backend calls and upload jobs.

use crate::{
    backend::{
        HttpBackend, ReportBackend,
        models::{Page, Transaction},
    },
    config::Config,
    controller::{StatusBoard, SubmitError, TerminalOutcome, UploadController},
    dashboard::{self, DashboardData, DateRange},
    jobs::{ReportType, SourceFile, UploadJob},
};
use anyhow::{Result, anyhow, bail};
use std::{collections::HashMap, path::Path, path::PathBuf, sync::Arc};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Page/size used for the processed listing behind the chart.
const PROCESSED_PAGE_SIZE: u32 = 300;
/// Page/size used for the unprocessed listing.
const UNPROCESSED_PAGE_SIZE: u32 = 100;

/// Commands sent from the UI to the worker.
#[derive(Debug)]
pub enum WorkerCmd {
    /// Read a local report file and start its upload job.
    SubmitReport {
        report_type: ReportType,
        path: PathBuf,
    },
    /// Stop polling (if any) and return the report type to idle.
    ResetReport(ReportType),
    /// Reload summary, chart and unprocessed counts for a date range.
    RefreshDashboard(DateRange),
    /// Load one page of transactions.
    LoadTransactions { page: u32 },
    /// Load the full record of one transaction.
    LoadTransaction { order_id: String },
    /// Persist and apply updated settings.
    SaveSettings(Config),
}

/// Events emitted by the worker for UI updates.
#[derive(Clone, Debug)]
pub enum WorkerEvent {
    /// Dashboard data loaded for the requested range.
    DashboardLoaded(Box<DashboardData>),
    /// A page of transactions loaded.
    TransactionsLoaded(Page<Transaction>),
    /// A single transaction loaded by order id.
    TransactionLoaded(Box<Transaction>),
    /// An upload job stopped; `Completed` means dependent views are stale.
    JobFinished {
        report_type: ReportType,
        outcome: TerminalOutcome,
    },
    /// Informational log message.
    Log(String),
    /// User-visible error message.
    Error(String),
}

/// Main worker loop: handle commands sequentially, run uploads as tasks.
pub async fn run(
    mut rx: mpsc::Receiver<WorkerCmd>,
    tx: mpsc::Sender<WorkerEvent>,
    mut cfg: Config,
    board: StatusBoard,
) {
    let (mut backend, mut controller) = match connect(&cfg, &board) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("backend client init failed: {e}");
            let _ = tx
                .send(WorkerEvent::Error(format!("client init failed: {e}")))
                .await;
            return;
        }
    };
    tracing::info!("worker started: {}", backend.base_url());
    for report_type in ReportType::ALL {
        let updates = board.subscribe(report_type);
        tokio::spawn(forward_transitions(updates, report_type, tx.clone()));
    }

    let mut slots = UploadSlots::default();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            WorkerCmd::SaveSettings(new_cfg) => match connect(&new_cfg, &board) {
                Ok((b, c)) => {
                    tracing::info!("settings updated: {}", b.base_url());
                    // Running uploads keep the controller they started with.
                    backend = b;
                    controller = c;
                    cfg = new_cfg;
                    let _ = tx.send(WorkerEvent::Log("settings updated".into())).await;
                }
                Err(e) => {
                    tracing::error!("settings rejected: {e}");
                    let _ = tx
                        .send(WorkerEvent::Error(format!("settings rejected: {e}")))
                        .await;
                }
            },

            WorkerCmd::SubmitReport { report_type, path } => {
                if board.snapshot(report_type).state.is_in_flight() {
                    let _ = tx.send(busy(report_type)).await;
                    continue;
                }
                let file = match load_source(report_type, &path).await {
                    Ok(f) => f,
                    Err(e) => {
                        tracing::warn!("file rejected: {}: {e}", path.display());
                        let _ = tx.send(WorkerEvent::Error(e.to_string())).await;
                        continue;
                    }
                };
                let file_name = file.file_name.clone();
                match slots.start(&controller, report_type, file, tx.clone()) {
                    Ok(()) => {
                        let _ = tx
                            .send(WorkerEvent::Log(format!(
                                "uploading {file_name} ({report_type})"
                            )))
                            .await;
                    }
                    // ファイル読み込み中に別の投入が枠を取った。
                    Err(_) => {
                        let _ = tx.send(busy(report_type)).await;
                    }
                }
            }

            WorkerCmd::ResetReport(report_type) => {
                if slots.reset(&controller, report_type) {
                    let _ = tx
                        .send(WorkerEvent::Log(format!("{report_type} reset")))
                        .await;
                }
            }

            WorkerCmd::RefreshDashboard(range) => {
                tracing::info!("refresh dashboard {range}");
                tokio::spawn(refresh_dashboard(backend.clone(), range, tx.clone()));
            }

            WorkerCmd::LoadTransactions { page } => {
                tokio::spawn(load_transactions(
                    backend.clone(),
                    page.max(1),
                    cfg.page_size(),
                    tx.clone(),
                ));
            }

            WorkerCmd::LoadTransaction { order_id } => {
                tokio::spawn(load_transaction(backend.clone(), order_id, tx.clone()));
            }
        }
    }
    tracing::info!("worker stopped");
}

/// Cancellation tokens of running upload tasks, one per report type.
#[derive(Default)]
struct UploadSlots {
    polls: HashMap<ReportType, CancellationToken>,
}

impl UploadSlots {
    /// Claim the report type's slot, then spawn its upload task.
    ///
    /// On `Conflict` nothing is registered, so the running job keeps its token.
    fn start<B: ReportBackend>(
        &mut self,
        controller: &Arc<UploadController<B>>,
        report_type: ReportType,
        file: SourceFile,
        tx: mpsc::Sender<WorkerEvent>,
    ) -> Result<(), SubmitError> {
        let attempt = controller.reserve(report_type, &file.file_name)?;
        let cancel = CancellationToken::new();
        // 予約できた時点で前回のジョブは終了済み。
        if let Some(previous) = self.polls.insert(report_type, cancel.clone()) {
            previous.cancel();
        }
        tokio::spawn(upload_task(
            controller.clone(),
            report_type,
            attempt,
            file,
            cancel,
            tx,
        ));
        Ok(())
    }

    /// Stop the running poll loop (if any) and clear a terminal job.
    ///
    /// A cancelled poll loop returns its job to idle on its own.
    fn reset<B: ReportBackend>(
        &mut self,
        controller: &UploadController<B>,
        report_type: ReportType,
    ) -> bool {
        let stopped = match self.polls.remove(&report_type) {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        };
        controller.reset(report_type) || stopped
    }
}

fn busy(report_type: ReportType) -> WorkerEvent {
    WorkerEvent::Error(format!("{} is still being processed", report_type.label()))
}

/// Build the HTTP client and a controller publishing to `board`.
fn connect(
    cfg: &Config,
    board: &StatusBoard,
) -> Result<(Arc<HttpBackend>, Arc<UploadController<HttpBackend>>)> {
    let backend = Arc::new(HttpBackend::new(
        &cfg.backend.base_url,
        cfg.request_timeout(),
    )?);
    let controller = Arc::new(UploadController::new(
        backend.clone(),
        cfg.poll_policy(),
        board.clone(),
    ));
    Ok((backend, controller))
}

/// Mirror every state change of one report type into the UI log.
async fn forward_transitions(
    mut rx: watch::Receiver<UploadJob>,
    report_type: ReportType,
    tx: mpsc::Sender<WorkerEvent>,
) {
    while rx.changed().await.is_ok() {
        let line = {
            let job = rx.borrow_and_update();
            match (&job.job_id, &job.last_error) {
                (_, Some(err)) => format!("{report_type}: {:?} ({err})", job.state),
                (Some(id), None) => format!("{report_type}: {:?} [{id}]", job.state),
                (None, None) => format!("{report_type}: {:?}", job.state),
            }
        };
        if tx.send(WorkerEvent::Log(line)).await.is_err() {
            break;
        }
    }
}

/// Submit, poll, and report how the job ended.
async fn upload_task<B: ReportBackend>(
    controller: Arc<UploadController<B>>,
    report_type: ReportType,
    attempt: Uuid,
    file: SourceFile,
    cancel: CancellationToken,
    tx: mpsc::Sender<WorkerEvent>,
) {
    match run_upload(&controller, report_type, attempt, file, &cancel).await {
        Ok(outcome) => {
            let _ = tx
                .send(WorkerEvent::JobFinished {
                    report_type,
                    outcome,
                })
                .await;
        }
        Err(SubmitError::Conflict { .. }) => {
            let _ = tx.send(busy(report_type)).await;
        }
        Err(SubmitError::Failed { message, .. }) => {
            let _ = tx
                .send(WorkerEvent::JobFinished {
                    report_type,
                    outcome: TerminalOutcome::Failed(message),
                })
                .await;
        }
    }
}

/// One reserved upload job from submission to its terminal outcome.
async fn run_upload<B: ReportBackend>(
    controller: &UploadController<B>,
    report_type: ReportType,
    attempt: Uuid,
    file: SourceFile,
    cancel: &CancellationToken,
) -> Result<TerminalOutcome, SubmitError> {
    let handle = controller
        .submit_reserved(file, report_type, attempt)
        .await?;
    Ok(controller.poll_until_terminal(&handle, cancel).await)
}

/// Read a report file selected by the user, applying the advisory type filter.
pub(crate) async fn load_source(report_type: ReportType, path: &Path) -> Result<SourceFile> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("not a file: {}", path.display()))?
        .to_string();
    if !report_type.accepts(&file_name) {
        bail!(
            "{} accepts {} files only",
            report_type.label(),
            report_type.accepted_extensions().join("/")
        );
    }
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| anyhow!("cannot read {file_name}: {e}"))?;
    if bytes.is_empty() {
        bail!("{file_name} is empty");
    }
    Ok(SourceFile::new(file_name, bytes))
}

async fn refresh_dashboard(
    backend: Arc<HttpBackend>,
    range: DateRange,
    tx: mpsc::Sender<WorkerEvent>,
) {
    match load_dashboard(&backend, range).await {
        Ok(data) => {
            let _ = tx.send(WorkerEvent::DashboardLoaded(Box::new(data))).await;
        }
        Err(e) => {
            tracing::error!("dashboard fetch failed: {e}");
            let _ = tx
                .send(WorkerEvent::Error("Failed to fetch data".into()))
                .await;
        }
    }
}

async fn load_transactions(
    backend: Arc<HttpBackend>,
    page: u32,
    size: u32,
    tx: mpsc::Sender<WorkerEvent>,
) {
    match backend.transactions(page, size).await {
        Ok(p) => {
            tracing::info!("transactions page {page}: {} rows", p.items.len());
            let _ = tx.send(WorkerEvent::TransactionsLoaded(p)).await;
        }
        Err(e) => {
            tracing::error!("transactions fetch failed: {e}");
            let _ = tx
                .send(WorkerEvent::Error("Failed to fetch transactions".into()))
                .await;
        }
    }
}

async fn load_transaction(
    backend: Arc<HttpBackend>,
    order_id: String,
    tx: mpsc::Sender<WorkerEvent>,
) {
    match backend.transaction(&order_id).await {
        Ok(t) => {
            let _ = tx.send(WorkerEvent::TransactionLoaded(Box::new(t))).await;
        }
        Err(e) => {
            tracing::error!("transaction {order_id} fetch failed: {e}");
            let _ = tx
                .send(WorkerEvent::Error(format!(
                    "Failed to fetch transaction {order_id}"
                )))
                .await;
        }
    }
}

/// Fetch processed, unprocessed and summary data concurrently.
async fn load_dashboard(backend: &HttpBackend, range: DateRange) -> Result<DashboardData> {
    let (processed, unprocessed, summary) = tokio::try_join!(
        backend.processed(1, PROCESSED_PAGE_SIZE),
        backend.unprocessed(1, UNPROCESSED_PAGE_SIZE),
        backend.summary(range.start, range.end),
    )?;
    Ok(DashboardData {
        chart: dashboard::chart_rows(&processed.items),
        processed_total: processed.total,
        unprocessed,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{BackendError, models::RemoteStatus},
        controller::{PollPolicy, tests::ScriptedBackend},
        jobs::JobState,
    };
    use std::{io::Write, time::Duration};

    fn controller(
        backend: ScriptedBackend,
    ) -> (Arc<UploadController<ScriptedBackend>>, Arc<ScriptedBackend>) {
        let backend = Arc::new(backend);
        let controller = Arc::new(UploadController::new(
            backend.clone(),
            PollPolicy::default(),
            StatusBoard::new(),
        ));
        (controller, backend)
    }

    fn csv() -> SourceFile {
        SourceFile::new("p.csv", b"a,b\n".to_vec())
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_upload_requests_exactly_one_refresh() {
        // 完了したジョブは再取得を要求する終了通知をちょうど1回出すことを検証する。
        let (controller, backend) = controller(
            ScriptedBackend::default()
                .accept("j1")
                .status(RemoteStatus::Waiting)
                .status(RemoteStatus::Completed),
        );
        let (tx, mut rx) = mpsc::channel(8);
        let attempt = controller.reserve(ReportType::Payment, "p.csv").unwrap();

        upload_task(
            controller.clone(),
            ReportType::Payment,
            attempt,
            csv(),
            CancellationToken::new(),
            tx,
        )
        .await;

        let mut refreshes = 0;
        while let Some(ev) = rx.recv().await {
            if let WorkerEvent::JobFinished { outcome, .. } = ev
                && outcome.requires_refresh()
            {
                refreshes += 1;
            }
        }
        assert_eq!(refreshes, 1);
        assert_eq!(
            controller.board().snapshot(ReportType::Payment).state,
            JobState::Completed
        );
        assert_eq!(backend.poll_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_submission_is_reported_as_finished_failure() {
        // 投入失敗はバックエンドのメッセージ付きの失敗終了として通知されることを検証する。
        let (controller, backend) =
            controller(ScriptedBackend::default().submit_error(BackendError::Status {
                status: 500,
                message: Some("Invalid MTR layout".into()),
            }));
        let (tx, mut rx) = mpsc::channel(8);
        let attempt = controller.reserve(ReportType::MerchantTax, "m.csv").unwrap();
        upload_task(
            controller,
            ReportType::MerchantTax,
            attempt,
            SourceFile::new("m.csv", b"x".to_vec()),
            CancellationToken::new(),
            tx,
        )
        .await;

        match rx.recv().await {
            Some(WorkerEvent::JobFinished {
                report_type,
                outcome,
            }) => {
                assert_eq!(report_type, ReportType::MerchantTax);
                assert_eq!(outcome, TerminalOutcome::Failed("Invalid MTR layout".into()));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(backend.poll_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_second_submit_keeps_reset_working() {
        // 連続した2回目の投入は拒否され、その後のリセットで最初のポーリングが止まることを検証する。
        let (controller, backend) = controller(ScriptedBackend::default().accept("j1"));
        let board = controller.board().clone();
        let (tx, _rx) = mpsc::channel(16);
        let mut slots = UploadSlots::default();

        slots
            .start(&controller, ReportType::Payment, csv(), tx.clone())
            .unwrap();
        let second = slots.start(&controller, ReportType::Payment, csv(), tx.clone());
        assert!(matches!(
            second,
            Err(SubmitError::Conflict {
                report_type: ReportType::Payment
            })
        ));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(board.snapshot(ReportType::Payment).state, JobState::Waiting);
        assert!(backend.poll_count() > 0);

        assert!(slots.reset(&controller, ReportType::Payment));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(board.snapshot(ReportType::Payment).state, JobState::Idle);

        let polls = backend.poll_count();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(backend.poll_count(), polls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_after_failure_clears_slot() {
        // 失敗済みのジョブはリセットで待機状態へ戻り、再投入できることを検証する。
        let (controller, _backend) =
            controller(ScriptedBackend::default().submit_error(BackendError::Status {
                status: 500,
                message: None,
            }));
        let (tx, _rx) = mpsc::channel(16);
        let mut slots = UploadSlots::default();

        slots
            .start(&controller, ReportType::Payment, csv(), tx.clone())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let board = controller.board();
        assert_eq!(board.snapshot(ReportType::Payment).state, JobState::Failed);

        assert!(slots.reset(&controller, ReportType::Payment));
        assert_eq!(board.snapshot(ReportType::Payment).state, JobState::Idle);
        assert!(!slots.reset(&controller, ReportType::Payment));
    }

    #[tokio::test]
    async fn test_slow_dashboard_fetch_does_not_block_commands() {
        // 応答しないバックエンドへの取得中でも後続のコマンドを処理できることを検証する。
        // 接続は受け付けるが応答を返さないサーバ。
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut cfg = Config::default();
        cfg.backend.base_url = format!("http://{}", listener.local_addr().unwrap());

        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (ev_tx, mut ev_rx) = mpsc::channel(64);
        tokio::spawn(run(cmd_rx, ev_tx, cfg.clone(), StatusBoard::new()));

        let today = chrono::Local::now().date_naive();
        cmd_tx
            .send(WorkerCmd::RefreshDashboard(DateRange::last_days(today, 7)))
            .await
            .unwrap();
        cmd_tx.send(WorkerCmd::SaveSettings(cfg)).await.unwrap();

        let applied = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(ev) = ev_rx.recv().await {
                if matches!(&ev, WorkerEvent::Log(s) if s == "settings updated") {
                    return true;
                }
            }
            false
        })
        .await;
        assert!(matches!(applied, Ok(true)));
        drop(listener);
    }

    #[tokio::test]
    async fn test_transitions_are_forwarded_to_the_log() {
        // 状態遷移がINFOログへ転送されることを検証する。
        let board = StatusBoard::new();
        let (tx, mut rx) = mpsc::channel(8);
        tokio::spawn(forward_transitions(
            board.subscribe(ReportType::Payment),
            ReportType::Payment,
            tx,
        ));

        let controller = UploadController::new(
            Arc::new(ScriptedBackend::default().accept("j7")),
            PollPolicy::default(),
            board.clone(),
        );
        controller
            .submit(SourceFile::new("p.csv", b"a\n".to_vec()), ReportType::Payment)
            .await
            .unwrap();

        // 途中の状態はまとめられることがあるが、最新の状態は必ず届く。
        loop {
            match rx.recv().await {
                Some(WorkerEvent::Log(line)) if line == "payment: Waiting [j7]" => break,
                Some(WorkerEvent::Log(_)) => continue,
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_load_source_applies_advisory_filter() {
        // 拡張子フィルタと空ファイル・存在しないファイルの拒否を検証する。
        let dir = tempfile::tempdir().unwrap();

        let csv = dir.path().join("payments.csv");
        std::fs::File::create(&csv)
            .unwrap()
            .write_all(b"date,amount\n")
            .unwrap();
        let f = load_source(ReportType::Payment, &csv).await.unwrap();
        assert_eq!(f.file_name, "payments.csv");
        assert_eq!(f.media_type, "text/csv");

        let xlsx = dir.path().join("mtr.xlsx");
        std::fs::write(&xlsx, b"PK").unwrap();
        assert!(load_source(ReportType::Payment, &xlsx).await.is_err());
        assert!(load_source(ReportType::MerchantTax, &xlsx).await.is_ok());

        let empty = dir.path().join("empty.csv");
        std::fs::write(&empty, b"").unwrap();
        let err = load_source(ReportType::Payment, &empty).await.unwrap_err();
        assert!(err.to_string().contains("empty"));

        let missing = dir.path().join("missing.csv");
        assert!(load_source(ReportType::Payment, &missing).await.is_err());
    }
}
