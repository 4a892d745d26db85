//! TUI描画関連の関数。

use ratatui::{
    Frame,
    prelude::*,
    widgets::{Bar, BarChart, BarGroup, Block, Borders, Paragraph, Row, Table, TableState, Wrap},
};

use crate::{
    dashboard::{self, DashboardData},
    events::Screen,
    input,
    jobs::{JobState, ReportType, UploadJob},
    layout,
    shortcuts::Shortcuts,
};

use super::App;

/// 画面全体のレイアウトを描画する。
pub fn draw(f: &mut Frame, app: &App) {
    // メインレイアウト（Body + HELP + STATUS）を作る。
    let main_layout = layout::create_main_layout(f.area());

    match app.ui.screen {
        Screen::Dashboard => draw_dashboard(f, app, main_layout.body),
        Screen::Transactions => draw_transactions(f, app, main_layout.body),
        Screen::Settings => draw_settings(f, app, main_layout.body),
    }

    // HELPバー（画面ごとのショートカット）を描画する。
    let help_text = get_help_text(app.ui.screen, &app.shortcuts);
    let help_bar = Paragraph::new(help_text)
        .block(Block::default().borders(Borders::ALL).title("HELP"))
        .wrap(Wrap { trim: true });
    f.render_widget(help_bar, main_layout.help_bar);

    // STATUSバー（画面名・アップロード状況・エラー）を描画する。
    f.render_widget(build_status_bar(app), main_layout.status_bar);

    // 入力ボックスが開いていれば重ねて描画する。
    if let Some(input_state) = &app.input_box {
        input::render_input_box(f, input_state);
    }
}

/// ダッシュボード画面を描画する。
fn draw_dashboard(f: &mut Frame, app: &App, area: Rect) {
    let dl = layout::create_dashboard_layout(area);

    // アップロードパネルは種別ごとに最新スナップショットを表示する。
    for (report_type, panel) in ReportType::ALL.into_iter().zip(dl.uploads) {
        let job = app.board.snapshot(report_type);
        f.render_widget(upload_panel(&job, report_type == app.focused), panel);
    }

    // KPIカードを描画する（未取得ならプレースホルダ）。
    let cards = summary_cards(app.dashboard.as_ref());
    for ((title, value, color), area) in cards.into_iter().zip(dl.cards) {
        let card = Paragraph::new(value)
            .style(Style::default().fg(color).add_modifier(Modifier::BOLD))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL).title(title));
        f.render_widget(card, area);
    }

    draw_chart(f, app.dashboard.as_ref(), dl.chart);

    // INFOパネル：集計期間、未処理件数、ログ。
    let info_panel = Paragraph::new(build_info_text(app))
        .block(Block::default().borders(Borders::ALL).title("INFO"))
        .wrap(Wrap { trim: true });
    f.render_widget(info_panel, dl.info_panel);
}

/// アップロードパネルを構築する。
fn upload_panel(job: &UploadJob, focused: bool) -> Paragraph<'static> {
    let (label, color) = state_label(job);
    let accepted = job
        .report_type
        .accepted_extensions()
        .iter()
        .map(|e| format!(".{e}"))
        .collect::<Vec<_>>()
        .join(", ");
    let lines = vec![
        Line::from(vec![
            Span::raw("Status: "),
            Span::styled(label, Style::default().fg(color).add_modifier(Modifier::BOLD)),
        ]),
        Line::from(format!(
            "File:   {}",
            job.file_name.as_deref().unwrap_or("-")
        )),
        Line::from(format!("Job:    {}", job.job_id.as_deref().unwrap_or("-"))),
        Line::from(Span::styled(
            format!("Accepts {accepted}"),
            Style::default().fg(Color::DarkGray),
        )),
    ];

    // 操作対象のパネルは枠をオレンジで強調する。
    let border = if focused {
        Style::default().fg(Color::Rgb(255, 140, 0))
    } else {
        Style::default()
    };
    Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(border)
            .title(job.report_type.label()),
    )
}

/// ジョブ状態を表示用ラベルと色へ変換する。
fn state_label(job: &UploadJob) -> (String, Color) {
    match job.state {
        JobState::Idle => ("Idle".into(), Color::Gray),
        JobState::Uploading => ("Uploading…".into(), Color::Yellow),
        JobState::Waiting => ("Processing…".into(), Color::Yellow),
        JobState::Completed => ("✓ processed".into(), Color::Green),
        JobState::Failed => (
            format!(
                "failed: {}",
                job.last_error.as_deref().unwrap_or("unknown error")
            ),
            Color::Red,
        ),
        JobState::TimedOut => ("timed out".into(), Color::Red),
    }
}

/// KPIカード4枚の (タイトル, 値, 色) を返す。
fn summary_cards(data: Option<&DashboardData>) -> [(&'static str, String, Color); 4] {
    let Some(data) = data else {
        let dash = || "-".to_string();
        return [
            ("Total Transactions", dash(), Color::Gray),
            ("Total Amount", dash(), Color::Gray),
            ("Orders", dash(), Color::Gray),
            ("Returns", dash(), Color::Gray),
        ];
    };
    let summary = &data.summary;
    let orders = summary.type_totals("Order");
    let returns = summary.type_totals("Return");
    [
        (
            "Total Transactions",
            summary.total_records.to_string(),
            Color::Cyan,
        ),
        (
            "Total Amount",
            dashboard::format_currency(summary.total_amount),
            amount_color(summary.total_amount),
        ),
        (
            "Orders",
            format!("{} / {}", orders.count, dashboard::format_currency(orders.total_amount)),
            Color::Green,
        ),
        (
            "Returns",
            format!("{} / {}", returns.count, dashboard::format_currency(returns.total_amount)),
            Color::Red,
        ),
    ]
}

/// 処理済みアップロードごとの取引額をバーで描画する。
fn draw_chart(f: &mut Frame, data: Option<&DashboardData>, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Transaction Overview");
    let rows = data.map(|d| d.chart.as_slice()).unwrap_or_default();
    if rows.is_empty() {
        let empty = Paragraph::new("No processed reports yet")
            .alignment(Alignment::Center)
            .block(block);
        f.render_widget(empty, area);
        return;
    }

    // 金額の絶対値をバーの高さとし、種別で色分けする。
    let bars: Vec<Bar> = rows
        .iter()
        .map(|row| {
            let color = if row.kind == "Return" {
                Color::Red
            } else {
                Color::Green
            };
            Bar::default()
                .value(row.total.abs().round() as u64)
                .text_value(dashboard::format_currency(row.total))
                .label(Line::from(format!(
                    "{} {}",
                    dashboard::format_date(&row.date_time),
                    row.kind
                )))
                .style(Style::default().fg(color))
        })
        .collect();

    let chart = BarChart::default()
        .block(block)
        .direction(Direction::Horizontal)
        .bar_width(1)
        .bar_gap(0)
        .data(BarGroup::default().bars(&bars));
    f.render_widget(chart, area);
}

/// ダッシュボードのINFOテキストを構築する。
fn build_info_text(app: &App) -> String {
    let (processed, unprocessed) = app
        .dashboard
        .as_ref()
        .map(|d| (d.processed_total.to_string(), d.unprocessed.total.to_string()))
        .unwrap_or(("-".into(), "-".into()));
    format!(
        "Range: {}\nBackend: {}\nProcessed reports: {}\nUnprocessed rows: {}\n\nLog:\n{}",
        app.range,
        app.cfg.backend.base_url,
        processed,
        unprocessed,
        app.ui
            .log
            .iter()
            .rev()
            .take(8)
            .rev()
            .cloned()
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

/// 取引一覧画面を描画する。
fn draw_transactions(f: &mut Frame, app: &App, area: Rect) {
    let tl = layout::create_table_layout(area);
    let Some(page) = &app.transactions else {
        let loading = Paragraph::new("Loading transactions...")
            .block(Block::default().borders(Borders::ALL).title("TRANSACTIONS"));
        f.render_widget(loading, area);
        return;
    };

    // 取引ページからテーブル行を組み立てる。
    let rows = page.items.iter().map(|t| {
        Row::new(vec![
            Span::raw(dashboard::format_date(&t.date_time)),
            Span::raw(t.kind.clone()),
            Span::raw(t.order_id.clone()),
            Span::raw(t.description.clone()),
            Span::styled(
                dashboard::format_currency(t.total),
                Style::default().fg(amount_color(t.total)),
            ),
        ])
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(13),
            Constraint::Length(8),
            Constraint::Length(22),
            Constraint::Min(10),
            Constraint::Length(14),
        ],
    )
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!("TRANSACTIONS (page {}/{})", page.page, page.pages.max(1))),
    )
    .header(Row::new(vec!["date", "type", "order id", "description", "total"]).bold())
    .row_highlight_style(
        Style::default()
            .bg(Color::Rgb(255, 140, 0)) // オレンジ色の背景
            .fg(Color::Black)
            .add_modifier(Modifier::BOLD),
    );

    // 選択中の行をハイライトする。
    let mut table_state = TableState::default();
    if !page.items.is_empty() {
        table_state.select(Some(app.ui.selected));
    }
    f.render_stateful_widget(table, tl.table, &mut table_state);

    // 詳細パネル：Enterで取得した取引。
    let detail_text = match &app.detail {
        Some(t) => format!(
            "{} | {} | {}\n{}\ntotal {} | invoice {} | net {}",
            t.order_id,
            t.kind,
            dashboard::format_date(&t.date_time),
            t.description,
            dashboard::format_currency(t.total),
            optional_amount(t.invoice_amount),
            optional_amount(t.net_amount),
        ),
        None => "Select a row and press Enter for details".into(),
    };
    let detail = Paragraph::new(detail_text)
        .block(Block::default().borders(Borders::ALL).title("DETAIL"))
        .wrap(Wrap { trim: true });
    f.render_widget(detail, tl.detail);

    // ページャ：表示範囲と前後のページ番号。
    let mut spans = vec![Span::raw(dashboard::showing_range(page)), Span::raw("   ")];
    for n in dashboard::page_window(app.tx_page, page.pages) {
        let style = if n == app.tx_page {
            Style::default().fg(Color::Black).bg(Color::Cyan)
        } else {
            Style::default()
        };
        spans.push(Span::styled(format!(" {n} "), style));
    }
    let pager = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL));
    f.render_widget(pager, tl.pager);
}

/// 設定画面を描画する。
fn draw_settings(f: &mut Frame, app: &App, area: Rect) {
    let policy = app.cfg.poll_policy();
    let text = format!(
        "Backend URL (editing): {}\nSaved backend URL:     {}\n\nRequest timeout: {}s\nPoll interval:   {}ms\nMax polls:       {}\nMax wait:        {}\nPage size:       {}\nSummary days:    {}",
        app.base_url,
        app.cfg.backend.base_url,
        app.cfg.backend.request_timeout_secs,
        policy.interval.as_millis(),
        policy.max_attempts,
        policy
            .max_elapsed
            .map(|d| format!("{}s", d.as_secs()))
            .unwrap_or_else(|| "unlimited".into()),
        app.cfg.page_size(),
        app.cfg.dashboard.summary_days,
    );
    let panel = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title("SETTINGS"))
        .wrap(Wrap { trim: false });
    f.render_widget(panel, area);
}

/// ステータスバーを構築する。
fn build_status_bar(app: &App) -> Paragraph<'static> {
    // 種別ごとの状態を短く並べる。
    let jobs = ReportType::ALL
        .iter()
        .map(|rt| format!("{rt}: {}", state_label(&app.board.snapshot(*rt)).0))
        .collect::<Vec<_>>()
        .join(", ");
    let loading = if app.ui.loading { " (loading)" } else { "" };

    // エラーの有無でステータス文字列を切り替える。
    let status_text = if let Some(err) = &app.ui.error {
        format!("[{}] {} | ERROR: {}", app.ui.screen.name(), jobs, err)
    } else {
        format!(
            "[{}] {} | {}{}",
            app.ui.screen.name(),
            jobs,
            app.ui.status,
            loading
        )
    };

    let mut status_bar = Paragraph::new(status_text)
        .block(Block::default().borders(Borders::ALL).title("STATUS"))
        .wrap(Wrap { trim: true });

    // エラー時は赤色で強調表示する。
    if app.ui.error.is_some() {
        status_bar = status_bar.style(Style::default().fg(Color::Red));
    }

    status_bar
}

/// 現在画面に応じたヘルプ文字列を返す。
fn get_help_text(screen: Screen, shortcuts: &Shortcuts) -> String {
    match screen {
        Screen::Dashboard => {
            let sc = &shortcuts.dashboard;
            format!(
                "{}: upload | {}: switch report | {}: reset | {}: range | {}: default range | {}: refresh | {}: transactions | {}: settings | {}: quit",
                format_keys(&sc.upload),
                format_keys(&sc.switch_report),
                format_keys(&sc.reset),
                format_keys(&sc.date_range),
                format_keys(&sc.default_range),
                format_keys(&sc.refresh),
                format_keys(&sc.transactions),
                format_keys(&sc.settings),
                format_keys(&sc.quit),
            )
        }
        Screen::Transactions => {
            let sc = &shortcuts.transactions;
            format!(
                "{}/{}: page | {}/{}: first/last | {}/{}: navigate | {}: detail | {}: refresh | {}: back",
                format_keys(&sc.prev_page),
                format_keys(&sc.next_page),
                format_keys(&sc.first_page),
                format_keys(&sc.last_page),
                format_keys(&sc.up),
                format_keys(&sc.down),
                format_keys(&sc.detail),
                format_keys(&sc.refresh),
                format_keys(&sc.back),
            )
        }
        Screen::Settings => {
            let sc = &shortcuts.settings;
            format!(
                "{}: backend url | {}: save | {}: cancel",
                format_keys(&sc.base_url),
                format_keys(&sc.save),
                format_keys(&sc.cancel),
            )
        }
    }
}

/// ショートカットキーの配列を表示用文字列に変換する。
fn format_keys(keys: &[String]) -> String {
    keys.join("/")
}

fn optional_amount(amount: Option<f64>) -> String {
    amount.map(dashboard::format_currency).unwrap_or_else(|| "-".into())
}

/// 金額の符号で色を決める（負は赤、正は緑）。
fn amount_color(amount: f64) -> Color {
    if amount < 0.0 { Color::Red } else { Color::Green }
}
