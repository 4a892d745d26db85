//! TUI内での文字列入力コンポーネント（InputBox）。

use ratatui::{
    layout::Alignment,
    prelude::*,
    widgets::{Block, Borders, Clear, Paragraph},
};

use crate::jobs::ReportType;

/// InputBox入力状態
#[derive(Clone, Debug)]
pub struct InputBoxState {
    /// プロンプトメッセージ
    pub prompt: String,
    /// 補足（受付拡張子など）
    pub hint: Option<String>,
    /// 現在の入力値
    pub value: String,
    /// カーソル位置（文字単位）
    pub cursor: usize,
    /// 入力完了時のコールバック識別子
    pub callback_id: InputCallbackId,
}

/// 入力完了時のコールバック識別子
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputCallbackId {
    /// アップロードするファイルパス
    UploadPath(ReportType),
    /// サマリーの期間（YYYY-MM-DD..YYYY-MM-DD）
    DateRange,
    /// 設定画面のバックエンドURL
    SettingsBaseUrl,
}

impl InputBoxState {
    /// 初期値の末尾にカーソルを置いて作成する。
    pub fn new(prompt: impl Into<String>, value: impl Into<String>, callback_id: InputCallbackId) -> Self {
        let value = value.into();
        Self {
            prompt: prompt.into(),
            hint: None,
            cursor: value.chars().count(),
            value,
            callback_id,
        }
    }

    /// 補足行を付ける。
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// 文字単位のカーソル位置をバイト位置へ変換する。
    fn byte_index(&self, char_idx: usize) -> usize {
        self.value
            .char_indices()
            .nth(char_idx)
            .map(|(i, _)| i)
            .unwrap_or(self.value.len())
    }

    /// 文字を挿入
    pub fn insert_char(&mut self, c: char) {
        let at = self.byte_index(self.cursor);
        self.value.insert(at, c);
        self.cursor += 1;
    }

    /// Backspace（カーソル前の文字を削除）
    pub fn backspace(&mut self) {
        // カーソルが先頭なら何もしない。
        if self.cursor == 0 {
            return;
        }
        let at = self.byte_index(self.cursor - 1);
        self.value.remove(at);
        self.cursor -= 1;
    }

    /// Delete（カーソル位置の文字を削除）
    pub fn delete(&mut self) {
        // カーソルが末尾なら何もしない。
        if self.cursor < self.value.chars().count() {
            let at = self.byte_index(self.cursor);
            self.value.remove(at);
        }
    }

    /// カーソルを左に移動
    pub fn move_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    /// カーソルを右に移動
    pub fn move_right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.value.chars().count());
    }

    /// カーソルを先頭に移動
    pub fn move_home(&mut self) {
        self.cursor = 0;
    }

    /// カーソルを末尾に移動
    pub fn move_end(&mut self) {
        self.cursor = self.value.chars().count();
    }

    /// 行全体をクリア
    pub fn clear_line(&mut self) {
        self.value.clear();
        self.cursor = 0;
    }

    /// 表示幅に収まる範囲とカーソル記号を合成した文字列を返す。
    fn visible_with_cursor(&self, width: usize) -> String {
        // カーソルが表示幅を超えた分だけ横スクロールする。
        let offset = self.cursor.saturating_sub(width.saturating_sub(2));
        let visible: Vec<char> = self.value.chars().skip(offset).take(width).collect();
        let at = (self.cursor - offset).min(visible.len());
        let before: String = visible[..at].iter().collect();
        let after: String = visible[at..].iter().collect();
        format!("{before}|{after}")
    }
}

/// InputBoxをポップアップとして描画
pub fn render_input_box(f: &mut Frame, state: &InputBoxState) {
    // 中央に配置されたポップアップ領域を計算する。
    let popup_area = centered_popup(f.area(), 70, 8);

    // 既存の描画を消してポップアップ用の背景にする。
    f.render_widget(Clear, popup_area);
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Input")
        .style(Style::default().bg(Color::DarkGray));
    f.render_widget(block, popup_area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(1), // プロンプト
            Constraint::Length(1), // 入力フィールド
            Constraint::Length(1), // 補足
            Constraint::Length(1), // 空行
            Constraint::Length(1), // ヘルプ
        ])
        .split(popup_area);

    let prompt = Paragraph::new(state.prompt.as_str()).style(
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    );
    f.render_widget(prompt, rows[0]);

    let input = Paragraph::new(state.visible_with_cursor(rows[1].width as usize))
        .style(Style::default().fg(Color::Green));
    f.render_widget(input, rows[1]);

    if let Some(hint) = &state.hint {
        let hint = Paragraph::new(hint.as_str()).style(Style::default().fg(Color::Yellow));
        f.render_widget(hint, rows[2]);
    }

    let help = Paragraph::new("Enter=確定 | ESC=キャンセル | Ctrl+U=クリア")
        .style(Style::default().fg(Color::Gray))
        .alignment(Alignment::Center);
    f.render_widget(help, rows[4]);
}

/// 中央配置のポップアップ領域を計算
fn centered_popup(area: Rect, width_percent: u16, height: u16) -> Rect {
    let [_, middle, _] = Layout::vertical([
        Constraint::Length(area.height.saturating_sub(height) / 2),
        Constraint::Length(height),
        Constraint::Min(0),
    ])
    .areas(area);
    let [_, popup, _] = Layout::horizontal([
        Constraint::Percentage((100 - width_percent) / 2),
        Constraint::Percentage(width_percent),
        Constraint::Percentage((100 - width_percent) / 2),
    ])
    .areas(middle);
    popup
}
