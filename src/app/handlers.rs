//! キー入力ハンドラー関数。

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::path::PathBuf;

use crate::{
    dashboard::DateRange,
    events::Screen,
    input::{InputBoxState, InputCallbackId},
    shortcuts,
    worker::WorkerCmd,
};

use super::{App, request_refresh, request_transactions};

/// キー入力を1件処理し、終了すべきならtrueを返す。
pub async fn handle_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    // 入力ボックスが開いていれば最優先で処理する。
    if app.input_box.is_some() {
        return handle_input_box_key(app, k).await;
    }

    // 画面ごとのハンドラへ委譲する。
    match app.ui.screen {
        Screen::Dashboard => handle_dashboard_key(app, k).await,
        Screen::Transactions => handle_transactions_key(app, k).await,
        Screen::Settings => handle_settings_key(app, k).await,
    }
}

/// Ctrl+Cかどうかを判定する。
pub fn is_ctrl_c(k: &KeyEvent) -> bool {
    k.modifiers.contains(KeyModifiers::CONTROL) && k.code == KeyCode::Char('c')
}

/// ダッシュボード画面のキー処理。
async fn handle_dashboard_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    let sc = &app.shortcuts.dashboard;

    if shortcuts::matches_shortcut(&k, &sc.quit) {
        return Ok(true);
    } else if shortcuts::matches_shortcut(&k, &sc.transactions) {
        // 取引一覧へ遷移する（未取得なら読み込む）。
        app.ui.screen = Screen::Transactions;
        if app.transactions.is_none() {
            let page = app.tx_page;
            request_transactions(app, page).await?;
        }
    } else if shortcuts::matches_shortcut(&k, &sc.settings) {
        // 設定画面へ遷移し、編集バッファを更新する。
        app.base_url = app.cfg.backend.base_url.clone();
        app.ui.screen = Screen::Settings;
        app.ui.status = "Settings".into();
    } else if shortcuts::matches_shortcut(&k, &sc.refresh) {
        request_refresh(app).await?;
    } else if shortcuts::matches_shortcut(&k, &sc.switch_report) {
        // 操作対象のレポート種別を切り替える。
        app.focused = app.focused.next();
    } else if shortcuts::matches_shortcut(&k, &sc.upload) {
        // 処理中の種別では新しいアップロードを受け付けない。
        if app.board.snapshot(app.focused).state.is_in_flight() {
            app.ui.error = Some(format!("{} is still being processed", app.focused.label()));
            return Ok(false);
        }
        // アップロードするファイルパスの入力ボックスを開く。
        let hint = format!(
            "accepted: {}",
            app.focused
                .accepted_extensions()
                .iter()
                .map(|e| format!(".{e}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        app.input_box = Some(
            InputBoxState::new(
                format!("{} file path:", app.focused.label()),
                "",
                InputCallbackId::UploadPath(app.focused),
            )
            .with_hint(hint),
        );
    } else if shortcuts::matches_shortcut(&k, &sc.reset) {
        // 終了済み（または待機中）のジョブを破棄してIdleに戻す。
        app.worker_tx
            .send(WorkerCmd::ResetReport(app.focused))
            .await?;
        app.ui.error = None;
    } else if shortcuts::matches_shortcut(&k, &sc.date_range) {
        // 集計期間の入力ボックスを開く。
        app.input_box = Some(InputBoxState::new(
            "Summary range (YYYY-MM-DD..YYYY-MM-DD):",
            app.range.to_string(),
            InputCallbackId::DateRange,
        ));
    } else if shortcuts::matches_shortcut(&k, &sc.default_range) {
        // 既定の直近N日に戻して再取得する。
        let today = chrono::Local::now().date_naive();
        app.range = DateRange::last_days(today, app.cfg.dashboard.summary_days);
        request_refresh(app).await?;
    }

    Ok(false)
}

/// 取引一覧画面のキー処理。
async fn handle_transactions_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    let sc = &app.shortcuts.transactions;
    // 未取得の間は1ページのみとみなす。
    let (rows, pages) = app
        .transactions
        .as_ref()
        .map(|p| (p.items.len(), p.pages.max(1)))
        .unwrap_or((0, 1));

    if shortcuts::matches_shortcut(&k, &sc.back) {
        app.detail = None;
        app.ui.screen = Screen::Dashboard;
    } else if shortcuts::matches_shortcut(&k, &sc.refresh) {
        let page = app.tx_page;
        request_transactions(app, page).await?;
    } else if shortcuts::matches_shortcut(&k, &sc.prev_page) {
        let page = app.tx_page;
        if page > 1 {
            go_to_page(app, page - 1).await?;
        }
    } else if shortcuts::matches_shortcut(&k, &sc.next_page) {
        let page = app.tx_page;
        if page < pages {
            go_to_page(app, page + 1).await?;
        }
    } else if shortcuts::matches_shortcut(&k, &sc.first_page) {
        if app.tx_page != 1 {
            go_to_page(app, 1).await?;
        }
    } else if shortcuts::matches_shortcut(&k, &sc.last_page) {
        if app.tx_page != pages {
            go_to_page(app, pages).await?;
        }
    } else if shortcuts::matches_shortcut(&k, &sc.down) {
        // 次の行へ移動する。
        if app.ui.selected + 1 < rows {
            app.ui.selected += 1;
        }
    } else if shortcuts::matches_shortcut(&k, &sc.up) {
        // 前の行へ移動する。
        app.ui.selected = app.ui.selected.saturating_sub(1);
    } else if shortcuts::matches_shortcut(&k, &sc.detail) {
        // 選択行の取引をorder idで取り直して詳細表示する。
        let order_id = app
            .transactions
            .as_ref()
            .and_then(|p| p.items.get(app.ui.selected))
            .map(|t| t.order_id.clone())
            .filter(|id| !id.is_empty());
        if let Some(order_id) = order_id {
            app.worker_tx
                .send(WorkerCmd::LoadTransaction { order_id })
                .await?;
        }
    }

    Ok(false)
}

/// ページを切り替えて先頭行を選択する。
async fn go_to_page(app: &mut App, page: u32) -> Result<()> {
    app.tx_page = page;
    app.ui.selected = 0;
    app.detail = None;
    request_transactions(app, page).await
}

/// 設定画面のキー処理。
async fn handle_settings_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    let sc = &app.shortcuts.settings;

    if shortcuts::matches_shortcut(&k, &sc.cancel) {
        // 変更を破棄してダッシュボードへ戻る。
        app.base_url = app.cfg.backend.base_url.clone();
        app.ui.screen = Screen::Dashboard;
    } else if shortcuts::matches_shortcut(&k, &sc.save) {
        let base_url = app.base_url.trim().to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            app.ui.error = Some("Backend URL must start with http:// or https://".into());
            return Ok(false);
        }
        // 編集バッファを設定へ反映して保存する。
        app.cfg.backend.base_url = base_url;
        app.cfg.save(&app.cfg_path)?;

        // Workerにも設定更新を通知し、新しい接続先で再取得する。
        app.worker_tx
            .send(WorkerCmd::SaveSettings(app.cfg.clone()))
            .await?;
        app.ui.screen = Screen::Dashboard;
        app.ui.error = None;
        request_refresh(app).await?;
        app.ui.status = "Saved settings".into();
    } else if shortcuts::matches_shortcut(&k, &sc.base_url) {
        // バックエンドURLの入力ボックスを開く。
        app.input_box = Some(InputBoxState::new(
            "Backend URL:",
            app.base_url.clone(),
            InputCallbackId::SettingsBaseUrl,
        ));
    }

    Ok(false)
}

/// 入力ボックスのキー処理。
async fn handle_input_box_key(app: &mut App, k: KeyEvent) -> Result<bool> {
    // 入力ボックスが無ければ何もしない。
    let Some(input_state) = &mut app.input_box else {
        return Ok(false);
    };

    // 入力ボックス用ショートカットを参照する。
    let sc = &app.shortcuts.input_box;

    if is_ctrl_c(&k) {
        return Ok(true);
    }

    if shortcuts::matches_shortcut(&k, &sc.confirm) {
        // 入力ボックスを閉じる前に値とコールバック種別を保存する。
        let value = input_state.value.clone();
        let callback_id = input_state.callback_id.clone();
        app.input_box = None;

        // コールバック種別に応じて値を反映する。
        apply_input_callback(app, callback_id, value).await?;
    } else if shortcuts::matches_shortcut(&k, &sc.cancel) {
        // 入力を破棄して入力ボックスを閉じる。
        app.input_box = None;
    } else if shortcuts::matches_shortcut(&k, &sc.backspace) {
        input_state.backspace();
    } else if shortcuts::matches_shortcut(&k, &sc.delete) {
        input_state.delete();
    } else if shortcuts::matches_shortcut(&k, &sc.left) {
        input_state.move_left();
    } else if shortcuts::matches_shortcut(&k, &sc.right) {
        input_state.move_right();
    } else if shortcuts::matches_shortcut(&k, &sc.home) {
        input_state.move_home();
    } else if shortcuts::matches_shortcut(&k, &sc.end) {
        input_state.move_end();
    } else if shortcuts::matches_shortcut(&k, &sc.clear_line) {
        input_state.clear_line();
    } else if let KeyCode::Char(c) = k.code
        && !k.modifiers.contains(KeyModifiers::CONTROL)
    {
        // コントロールキーでない場合のみ挿入する。
        input_state.insert_char(c);
    }

    Ok(false)
}

/// 入力ボックスのコールバックを適用する。
async fn apply_input_callback(
    app: &mut App,
    callback_id: InputCallbackId,
    value: String,
) -> Result<()> {
    match callback_id {
        InputCallbackId::UploadPath(report_type) => {
            let path = value.trim();
            if path.is_empty() {
                app.ui.error = Some("No file selected".into());
                return Ok(());
            }
            // 読み込みと拡張子の確認はWorker側で行う。
            app.ui.error = None;
            app.ui.status = format!("Submitting {}...", report_type.label());
            app.worker_tx
                .send(WorkerCmd::SubmitReport {
                    report_type,
                    path: PathBuf::from(path),
                })
                .await?;
        }
        InputCallbackId::DateRange => match DateRange::parse(&value) {
            Ok(range) => {
                app.range = range;
                request_refresh(app).await?;
            }
            Err(e) => app.ui.error = Some(e.to_string()),
        },
        InputCallbackId::SettingsBaseUrl => app.base_url = value.trim().to_string(),
    }
    Ok(())
}
