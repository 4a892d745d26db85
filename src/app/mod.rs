//! TUIのイベントループ、入力処理、状態管理。

mod handlers;
mod render;

use anyhow::Result;
use crossterm::event::{self, Event};
use std::{path::PathBuf, time::Duration};
use tokio::sync::mpsc;

use crate::{
    backend::models::{Page, Transaction},
    config::Config,
    controller::{StatusBoard, TerminalOutcome},
    dashboard::{DashboardData, DateRange},
    events::UiState,
    input::InputBoxState,
    jobs::ReportType,
    shortcuts::Shortcuts,
    ui::Tui,
    worker::{self, WorkerCmd, WorkerEvent},
};

use handlers::{handle_key, is_ctrl_c};
use render::draw;

/// 入力処理と描画で共有するアプリ状態。
pub struct App {
    /// 永続化された設定ファイルのパス。
    pub cfg_path: PathBuf,
    /// メモリ上の現在設定。
    pub cfg: Config,
    /// 選択位置やステータスなどUI固有の状態。
    pub ui: UiState,
    /// レポート種別ごとのアップロード状態（Workerと共有）。
    pub board: StatusBoard,
    /// ダッシュボードで操作対象のレポート種別。
    pub focused: ReportType,
    /// サマリーの集計期間。
    pub range: DateRange,
    /// 最後に取得したダッシュボードデータ。
    pub dashboard: Option<DashboardData>,
    /// 最後に取得した取引一覧のページ。
    pub transactions: Option<Page<Transaction>>,
    /// 取引一覧で表示中のページ番号。
    pub tx_page: u32,
    /// 詳細表示中の取引。
    pub detail: Option<Transaction>,
    /// Workerへのコマンド送信チャネル。
    pub worker_tx: mpsc::Sender<WorkerCmd>,
    /// Workerからのイベント受信チャネル。
    pub worker_rx: mpsc::Receiver<WorkerEvent>,

    /// 設定画面で編集するバックエンドURL。
    pub base_url: String,

    /// 入力ボックスの状態（入力中はSome）。
    pub input_box: Option<InputBoxState>,

    /// ショートカットキー設定。
    pub shortcuts: Shortcuts,
}

impl App {
    /// 設定とWorkerチャネルからアプリ状態を組み立てる。
    pub fn new(
        cfg_path: PathBuf,
        cfg: Config,
        shortcuts: Shortcuts,
        board: StatusBoard,
        worker_tx: mpsc::Sender<WorkerCmd>,
        worker_rx: mpsc::Receiver<WorkerEvent>,
    ) -> Self {
        // 既定の集計期間は今日までの直近N日。
        let today = chrono::Local::now().date_naive();
        let range = DateRange::last_days(today, cfg.dashboard.summary_days);
        Self {
            cfg_path,
            base_url: cfg.backend.base_url.clone(),
            cfg,
            ui: UiState::new(),
            board,
            focused: ReportType::Payment,
            range,
            dashboard: None,
            transactions: None,
            tx_page: 1,
            detail: None,
            worker_tx,
            worker_rx,
            input_box: None,
            shortcuts,
        }
    }
}

/// ユーザーが終了するまでメインTUIループを回す。
pub async fn run_app(terminal: &mut Tui) -> Result<()> {
    // 設定ファイルを読み込み、環境変数の上書きを適用する。
    let cfg_path = PathBuf::from("config.toml");
    let cfg = Config::load_or_default(&cfg_path)?.with_env_overrides();

    // ショートカット設定を読み込む（無ければデフォルト）。
    let shortcuts_path = PathBuf::from("shortcut.toml");
    let shortcuts = Shortcuts::load_or_default(&shortcuts_path)?;

    // Worker通信用のコマンド/イベントチャネルを作る。
    let (tx_cmd, rx_cmd) = mpsc::channel::<WorkerCmd>(64);
    let (tx_ev, rx_ev) = mpsc::channel::<WorkerEvent>(256);

    // アップロード状態はWorkerとUIで同じボードを参照する。
    let board = StatusBoard::new();
    tokio::spawn(worker::run(rx_cmd, tx_ev, cfg.clone(), board.clone()));

    let mut app = App::new(cfg_path, cfg, shortcuts, board, tx_cmd, rx_ev);

    // 起動時にダッシュボードと取引一覧を取得する。
    request_refresh(&mut app).await?;
    request_transactions(&mut app, 1).await?;

    loop {
        // 現在の状態を描画する。
        terminal.draw(|f| draw(f, &app))?;

        // 入力処理の前にWorkerイベントを消化する。
        while let Ok(ev) = app.worker_rx.try_recv() {
            handle_worker_event(&mut app, ev).await?;
        }

        // UIの応答性確保のため短いタイムアウトで入力をポーリングする。
        if event::poll(Duration::from_millis(50))?
            && let Event::Key(k) = event::read()?
        {
            // どの画面でもCtrl+Cで終了できるようにする。
            if is_ctrl_c(&k) {
                break;
            }
            if handle_key(&mut app, k).await? {
                break;
            }
        }
    }
    Ok(())
}

/// WorkerイベントをUI状態へ反映する。
async fn handle_worker_event(app: &mut App, ev: WorkerEvent) -> Result<()> {
    match ev {
        WorkerEvent::DashboardLoaded(data) => {
            app.ui.loading = false;
            app.ui.error = None;
            app.ui.status = format!(
                "Loaded summary {} ({} records)",
                app.range, data.summary.total_records
            );
            app.dashboard = Some(*data);
        }
        WorkerEvent::TransactionsLoaded(page) => {
            // 取得したページに合わせて選択行を範囲内へ戻す。
            app.tx_page = page.page.max(1);
            if app.ui.selected >= page.items.len() {
                app.ui.selected = page.items.len().saturating_sub(1);
            }
            app.transactions = Some(page);
        }
        WorkerEvent::TransactionLoaded(t) => {
            app.detail = Some(*t);
        }
        WorkerEvent::JobFinished {
            report_type,
            outcome,
        } => {
            tracing::info!("{report_type} finished: {outcome:?}");
            match &outcome {
                TerminalOutcome::Completed => {
                    app.ui.error = None;
                    app.ui.status = format!("{} processed", report_type.label());
                }
                TerminalOutcome::Failed(msg) => {
                    app.ui.error = Some(format!("{}: {msg}", report_type.label()));
                }
                TerminalOutcome::TimedOut => {
                    app.ui.error = Some(format!(
                        "{}: processing did not finish in time",
                        report_type.label()
                    ));
                }
                TerminalOutcome::Cancelled => {
                    app.ui.status = format!("{} cancelled", report_type.label());
                }
            }
            app.ui.push_log(format!("{report_type}: {outcome:?}"));
            // 完了時だけ依存する表示を再取得する。
            if outcome.requires_refresh() {
                request_refresh(app).await?;
                let page = app.tx_page;
                request_transactions(app, page).await?;
            }
        }
        WorkerEvent::Log(s) => {
            // ログを追加する。
            app.ui.push_log(s);
        }
        WorkerEvent::Error(s) => {
            // ステータスにエラーを表示する。
            app.ui.loading = false;
            app.ui.push_log(format!("error: {s}"));
            app.ui.error = Some(s);
        }
    }
    Ok(())
}

/// 現在の期間でダッシュボードの再取得をWorkerへ依頼する。
pub async fn request_refresh(app: &mut App) -> Result<()> {
    tracing::info!("refresh requested: {}", app.range);
    app.worker_tx
        .send(WorkerCmd::RefreshDashboard(app.range))
        .await?;
    app.ui.loading = true;
    app.ui.status = "Refreshing dashboard...".into();
    Ok(())
}

/// 取引一覧の指定ページをWorkerへ依頼する。
pub async fn request_transactions(app: &mut App, page: u32) -> Result<()> {
    app.worker_tx
        .send(WorkerCmd::LoadTransactions { page })
        .await?;
    Ok(())
}
