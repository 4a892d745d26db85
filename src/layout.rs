//! レイアウト計算のヘルパー関数

use ratatui::prelude::*;

/// 全画面共通の3領域
pub struct MainLayout {
    /// 画面本体
    pub body: Rect,
    /// HELPバーの領域
    pub help_bar: Rect,
    /// STATUSバーの領域
    pub status_bar: Rect,
}

/// ダッシュボード本体の領域
pub struct DashboardLayout {
    /// アップロードパネル（決済 / MTR）
    pub uploads: [Rect; 2],
    /// KPIカード4枚
    pub cards: [Rect; 4],
    /// 取引チャート
    pub chart: Rect,
    /// INFO/ログパネル
    pub info_panel: Rect,
}

/// 画面を Body + HELP + STATUS に分割
pub fn create_main_layout(area: Rect) -> MainLayout {
    let [body, help_bar, status_bar] = Layout::vertical([
        Constraint::Min(1),    // Body
        Constraint::Length(3), // HELPバー
        Constraint::Length(3), // STATUSバー
    ])
    .areas(area);

    MainLayout {
        body,
        help_bar,
        status_bar,
    }
}

/// ダッシュボード本体を アップロード / KPI / チャート+INFO に分割
pub fn create_dashboard_layout(area: Rect) -> DashboardLayout {
    let [uploads, cards, lower] = Layout::vertical([
        Constraint::Length(6), // アップロードパネル
        Constraint::Length(4), // KPIカード
        Constraint::Min(6),    // チャート + INFO
    ])
    .areas(area);

    let uploads = Layout::horizontal([Constraint::Percentage(50); 2]).areas(uploads);
    let cards = Layout::horizontal([Constraint::Ratio(1, 4); 4]).areas(cards);
    let [chart, info_panel] = Layout::horizontal([
        Constraint::Percentage(65), // チャート
        Constraint::Percentage(35), // INFO
    ])
    .areas(lower);

    DashboardLayout {
        uploads,
        cards,
        chart,
        info_panel,
    }
}

/// 取引一覧の領域
pub struct TableLayout {
    /// 取引テーブル
    pub table: Rect,
    /// 選択取引の詳細
    pub detail: Rect,
    /// ページャ
    pub pager: Rect,
}

/// 取引一覧を テーブル + 詳細 + ページャ に分割
pub fn create_table_layout(area: Rect) -> TableLayout {
    let [table, detail, pager] = Layout::vertical([
        Constraint::Min(3),    // テーブル
        Constraint::Length(5), // 詳細
        Constraint::Length(3), // ページャ
    ])
    .areas(area);

    TableLayout {
        table,
        detail,
        pager,
    }
}
