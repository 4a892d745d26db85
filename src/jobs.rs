//! アップロードジョブとレポート種別のモデル。

use std::fmt;

use uuid::Uuid;

/// アップロード対象のレポート種別。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReportType {
    /// 決済レポート（CSVのみ）。
    Payment,
    /// マーチャント税レポート（MTR、CSV/XLSX）。
    MerchantTax,
}

impl ReportType {
    /// 画面・ログで使う全種別。
    pub const ALL: [ReportType; 2] = [ReportType::Payment, ReportType::MerchantTax];

    /// バックエンドの送信先パス。種別ごとに構造が異なるのでそのまま保持する。
    pub fn upload_path(self) -> &'static str {
        match self {
            ReportType::Payment => "/upload/payment",
            ReportType::MerchantTax => "/api/upload/mtr",
        }
    }

    /// UI側で受け付ける拡張子（あくまで目安で、送信時には再検証しない）。
    pub fn accepted_extensions(self) -> &'static [&'static str] {
        match self {
            ReportType::Payment => &["csv"],
            ReportType::MerchantTax => &["csv", "xlsx"],
        }
    }

    /// 拡張子がこの種別の受付対象か判定する。
    pub fn accepts(self, file_name: &str) -> bool {
        let ext = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        self.accepted_extensions().contains(&ext.as_str())
    }

    /// 表示用ラベル。
    pub fn label(self) -> &'static str {
        match self {
            ReportType::Payment => "Payment Report",
            ReportType::MerchantTax => "Merchant Tax Report",
        }
    }

    /// 次の種別（パネルのフォーカス切替用）。
    pub fn next(self) -> Self {
        match self {
            ReportType::Payment => ReportType::MerchantTax,
            ReportType::MerchantTax => ReportType::Payment,
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportType::Payment => f.write_str("payment"),
            ReportType::MerchantTax => f.write_str("mtr"),
        }
    }
}

/// 送信するファイル本体。送信時にトランスポートへ所有権ごと渡す。
#[derive(Clone, Debug)]
pub struct SourceFile {
    /// 元のファイル名。
    pub file_name: String,
    /// 宣言するメディアタイプ。
    pub media_type: String,
    /// ファイル内容。
    pub bytes: Vec<u8>,
}

impl SourceFile {
    /// 拡張子からメディアタイプを推定して作成する。
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let media_type = media_type_for(&file_name).to_string();
        Self {
            file_name,
            media_type,
            bytes,
        }
    }
}

/// 拡張子に対応するメディアタイプ。
fn media_type_for(file_name: &str) -> &'static str {
    let lower = file_name.to_ascii_lowercase();
    if lower.ends_with(".csv") {
        "text/csv"
    } else if lower.ends_with(".xlsx") {
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
    } else {
        "application/octet-stream"
    }
}

/// ジョブのライフサイクル状態。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    /// ファイル未送信。
    Idle,
    /// 送信リクエスト中。
    Uploading,
    /// バックエンドで処理待ち（ポーリング中）。
    Waiting,
    /// 正常完了。
    Completed,
    /// 送信失敗または処理失敗。
    Failed,
    /// ポーリング上限に達した。
    TimedOut,
}

impl JobState {
    /// 終端状態かどうか。
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::TimedOut
        )
    }

    /// 処理中（新規送信を受け付けない状態）かどうか。
    pub fn is_in_flight(self) -> bool {
        matches!(self, JobState::Uploading | JobState::Waiting)
    }
}

/// レポート種別ごとの1ジョブ分の状態スナップショット。
#[derive(Clone, Debug)]
pub struct UploadJob {
    /// 対象のレポート種別。
    pub report_type: ReportType,
    /// このライフサイクルを識別するローカルID。
    pub attempt: Uuid,
    /// 表示用の送信ファイル名。
    pub file_name: Option<String>,
    /// バックエンドが払い出したジョブID。
    pub job_id: Option<String>,
    /// 現在の状態。
    pub state: JobState,
    /// 失敗時のユーザー向けメッセージ。
    pub last_error: Option<String>,
}

impl UploadJob {
    /// 待機状態のジョブを作成する。
    pub fn idle(report_type: ReportType) -> Self {
        Self {
            report_type,
            attempt: Uuid::new_v4(),
            file_name: None,
            job_id: None,
            state: JobState::Idle,
            last_error: None,
        }
    }

    /// Idle/終端状態から送信中へ進める。新しいライフサイクルIDを振り直す。
    pub fn begin_upload(&mut self, file_name: &str) -> Uuid {
        self.attempt = Uuid::new_v4();
        self.file_name = Some(file_name.to_string());
        self.job_id = None;
        self.last_error = None;
        self.state = JobState::Uploading;
        self.attempt
    }

    /// バックエンドが受理した。
    pub fn accept(&mut self, job_id: String) {
        self.job_id = Some(job_id);
        self.state = JobState::Waiting;
    }

    /// 処理完了。
    pub fn complete(&mut self) {
        self.state = JobState::Completed;
    }

    /// 失敗（メッセージ付き）。
    pub fn fail(&mut self, message: impl Into<String>) {
        self.state = JobState::Failed;
        self.last_error = Some(message.into());
    }

    /// ポーリング上限に達した。
    pub fn time_out(&mut self, message: impl Into<String>) {
        self.state = JobState::TimedOut;
        self.last_error = Some(message.into());
    }

    /// Idleへ戻し、ジョブIDとエラーを消去する。
    pub fn reset(&mut self) {
        *self = Self::idle(self.report_type);
    }
}
