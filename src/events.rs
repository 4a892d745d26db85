//! 画面遷移用のUI状態と画面種別。

/// TUIで現在表示中の画面。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Screen {
    /// アップロード・KPI・チャートのダッシュボード。
    Dashboard,
    /// 取引一覧（ページング）。
    Transactions,
    /// 設定編集画面。
    Settings,
}

impl Screen {
    /// ステータスバー用の画面名。
    pub fn name(self) -> &'static str {
        match self {
            Screen::Dashboard => "Dashboard",
            Screen::Transactions => "Transactions",
            Screen::Settings => "Settings",
        }
    }
}

/// 描画側と共有するUI状態。
#[derive(Clone, Debug)]
pub struct UiState {
    /// 現在の画面。
    pub screen: Screen,
    /// 取引一覧の選択行。
    pub selected: usize,
    /// 右側パネルに表示するログ。
    pub log: Vec<String>,
    /// 画面下部のステータス文言。
    pub status: String,
    /// エラーメッセージ（強調表示用）。
    pub error: Option<String>,
    /// ダッシュボード取得中かどうか。
    pub loading: bool,
}

impl UiState {
    /// 初期状態（ダッシュボード表示）を作る。
    pub fn new() -> Self {
        Self {
            screen: Screen::Dashboard,
            selected: 0,
            log: vec![],
            status: "Ready".into(),
            error: None,
            loading: false,
        }
    }

    /// ログを追加する（古いものから捨てる）。
    pub fn push_log(&mut self, line: impl Into<String>) {
        const MAX_LOG: usize = 200;
        self.log.push(line.into());
        if self.log.len() > MAX_LOG {
            let overflow = self.log.len() - MAX_LOG;
            self.log.drain(..overflow);
        }
    }
}

impl Default for UiState {
    fn default() -> Self {
        Self::new()
    }
}
