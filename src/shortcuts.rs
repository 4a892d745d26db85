//! ショートカット設定の管理。

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// ショートカット設定の全体。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shortcuts {
    pub dashboard: DashboardShortcuts,
    pub transactions: TransactionsShortcuts,
    pub settings: SettingsShortcuts,
    pub input_box: InputBoxShortcuts,
}

/// ダッシュボード画面のショートカット。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardShortcuts {
    pub quit: Vec<String>,
    pub transactions: Vec<String>,
    pub settings: Vec<String>,
    pub refresh: Vec<String>,
    pub switch_report: Vec<String>,
    pub upload: Vec<String>,
    pub reset: Vec<String>,
    pub date_range: Vec<String>,
    pub default_range: Vec<String>,
}

/// 取引一覧画面のショートカット。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionsShortcuts {
    pub back: Vec<String>,
    pub refresh: Vec<String>,
    pub prev_page: Vec<String>,
    pub next_page: Vec<String>,
    pub first_page: Vec<String>,
    pub last_page: Vec<String>,
    pub down: Vec<String>,
    pub up: Vec<String>,
    pub detail: Vec<String>,
}

/// 設定画面のショートカット。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsShortcuts {
    pub cancel: Vec<String>,
    pub save: Vec<String>,
    pub base_url: Vec<String>,
}

/// InputBoxのショートカット。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputBoxShortcuts {
    pub confirm: Vec<String>,
    pub cancel: Vec<String>,
    pub backspace: Vec<String>,
    pub delete: Vec<String>,
    pub left: Vec<String>,
    pub right: Vec<String>,
    pub home: Vec<String>,
    pub end: Vec<String>,
    pub clear_line: Vec<String>,
}

impl Shortcuts {
    /// TOMLから読み込み、無ければデフォルトを返す。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            // 既存ファイルを読み込んでパースする。
            let content = std::fs::read_to_string(path)?;
            let shortcuts: Shortcuts = toml::from_str(&content)?;
            Ok(shortcuts)
        } else {
            // 未作成の場合は既定値を利用する。
            Ok(Self::default())
        }
    }
}

impl Default for Shortcuts {
    fn default() -> Self {
        Self {
            dashboard: DashboardShortcuts {
                quit: vec!["q".into()],
                transactions: vec!["t".into()],
                settings: vec!["s".into()],
                refresh: vec!["r".into()],
                switch_report: vec!["Tab".into()],
                upload: vec!["u".into(), "Enter".into()],
                reset: vec!["x".into()],
                date_range: vec!["d".into()],
                default_range: vec!["D".into()],
            },
            transactions: TransactionsShortcuts {
                back: vec!["Esc".into()],
                refresh: vec!["r".into()],
                prev_page: vec!["Left".into(), "h".into()],
                next_page: vec!["Right".into(), "l".into()],
                first_page: vec!["Home".into(), "g".into()],
                last_page: vec!["End".into(), "G".into()],
                down: vec!["Down".into(), "j".into()],
                up: vec!["Up".into(), "k".into()],
                detail: vec!["Enter".into()],
            },
            settings: SettingsShortcuts {
                cancel: vec!["Esc".into()],
                save: vec!["Enter".into()],
                base_url: vec!["b".into()],
            },
            input_box: InputBoxShortcuts {
                confirm: vec!["Enter".into()],
                cancel: vec!["Esc".into()],
                backspace: vec!["Backspace".into()],
                delete: vec!["Delete".into()],
                left: vec!["Left".into()],
                right: vec!["Right".into()],
                home: vec!["Home".into()],
                end: vec!["End".into()],
                clear_line: vec!["Ctrl+u".into()],
            },
        }
    }
}

/// KeyEventがいずれかのショートカット文字列と一致するか判定する。
pub fn matches_shortcut(key: &KeyEvent, shortcuts: &[String]) -> bool {
    shortcuts.iter().any(|s| matches_single_shortcut(key, s))
}

/// KeyEventが単一のショートカット文字列と一致するか判定する。
fn matches_single_shortcut(key: &KeyEvent, shortcut: &str) -> bool {
    // ショートカット文字列を分解する（例: "Ctrl+u", "a", "Enter"）。
    let parts: Vec<&str> = shortcut.split('+').collect();

    let (modifiers_str, key_str) = if parts.len() > 1 {
        // 修飾キー付きの形式（例: "Ctrl+u"）。
        (&parts[0..parts.len() - 1], parts[parts.len() - 1])
    } else {
        // 修飾キーなしの形式（例: "a", "Enter"）。
        (&[][..], parts[0])
    };

    // 修飾キーを解析して期待値を作る。
    let mut expected_modifiers = KeyModifiers::empty();
    for modifier in modifiers_str {
        match *modifier {
            "Ctrl" | "ctrl" => expected_modifiers |= KeyModifiers::CONTROL,
            "Alt" | "alt" => expected_modifiers |= KeyModifiers::ALT,
            "Shift" | "shift" => expected_modifiers |= KeyModifiers::SHIFT,
            _ => return false,
        }
    }

    // 大文字はShift付きで届く端末があるので、文字キーではShiftを無視する。
    let mut actual_modifiers = key.modifiers;
    if let KeyCode::Char(c) = key.code
        && c.is_uppercase()
    {
        actual_modifiers.remove(KeyModifiers::SHIFT);
        expected_modifiers.remove(KeyModifiers::SHIFT);
    }

    // 修飾キーが一致しなければ即座に不一致とする。
    if actual_modifiers != expected_modifiers {
        return false;
    }

    // キーコードの種別ごとに一致判定を行う。
    match key_str {
        "Enter" | "enter" => key.code == KeyCode::Enter,
        "Esc" | "esc" => key.code == KeyCode::Esc,
        "Tab" | "tab" => key.code == KeyCode::Tab,
        "Backspace" | "backspace" => key.code == KeyCode::Backspace,
        "Delete" | "delete" => key.code == KeyCode::Delete,
        "Up" | "up" => key.code == KeyCode::Up,
        "Down" | "down" => key.code == KeyCode::Down,
        "Left" | "left" => key.code == KeyCode::Left,
        "Right" | "right" => key.code == KeyCode::Right,
        "Home" | "home" => key.code == KeyCode::Home,
        "End" | "end" => key.code == KeyCode::End,
        // 単一文字は Char として比較する。
        s if s.chars().count() == 1 => s.chars().next().is_some_and(|c| key.code == KeyCode::Char(c)),
        _ => false,
    }
}
