//! Document records and the pipeline state DAG (spec §4.4).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A document's position in the OCR → LLM → KB-index pipeline.
///
/// Transitions are monotonic (I1): a document only ever moves forward
/// along the DAG below, or into a `*_failed` branch, which is terminal for
/// that stage but not for the document (an explicit re-send with
/// `force=true` can re-enter the stage).
///
/// ```text
/// uploaded
///   └─→ ocr_processing ─→ ocr_completed ─→ llm_processing ─→ llm_completed
///                       └→ ocr_failed                      └→ llm_failed
/// ```
///
/// `kb_index_completed`/`kb_index_failed` are side-effect states: they
/// follow the same claim/transition discipline but never gate `llm_*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    Uploaded,
    OcrProcessing,
    OcrCompleted,
    OcrFailed,
    LlmProcessing,
    LlmCompleted,
    LlmFailed,
    KbIndexCompleted,
    KbIndexFailed,
}

impl DocumentState {
    /// Whether `self -> next` is a legal edge in the state DAG, ignoring
    /// the explicit forced re-entry a user-triggered re-run performs (those
    /// bypass this check deliberately — see `update_state` callers).
    pub fn can_advance_to(self, next: DocumentState) -> bool {
        use DocumentState::*;
        matches!(
            (self, next),
            (Uploaded, OcrProcessing)
                | (Uploaded, OcrCompleted) // unsupported-extension pass-through
                | (OcrProcessing, OcrCompleted)
                | (OcrProcessing, OcrFailed)
                | (OcrCompleted, LlmProcessing)
                | (OcrCompleted, KbIndexCompleted)
                | (OcrCompleted, KbIndexFailed)
                | (LlmProcessing, LlmCompleted)
                | (LlmProcessing, LlmFailed)
        )
    }

    /// True for states a handler only reaches once a stage is done, one way
    /// or another, absent an explicit forced re-run.
    pub fn is_terminal_for_stage(self) -> bool {
        matches!(
            self,
            DocumentState::OcrFailed
                | DocumentState::OcrCompleted
                | DocumentState::LlmFailed
                | DocumentState::LlmCompleted
                | DocumentState::KbIndexCompleted
                | DocumentState::KbIndexFailed
        )
    }
}

/// Per-document record: user metadata, tag set, storage keys, and current
/// pipeline position (spec §3, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub organization_id: String,
    pub user_file_name: String,
    pub mongo_file_name: Option<String>,
    pub pdf_file_name: Option<String>,
    #[serde(default)]
    pub tag_ids: Vec<String>,
    pub state: DocumentState,
    pub state_updated_at: DateTime<Utc>,
    pub upload_date: DateTime<Utc>,
}

impl Document {
    /// File extensions OCR does not apply to — structured-data formats pass
    /// straight through to `ocr_completed` (spec §4.4.1 step 2).
    const UNSUPPORTED_OCR_EXTENSIONS: &'static [&'static str] =
        &["csv", "xlsx", "xls", "json", "txt", "tsv"];

    /// Whether OCR should run for this document's uploaded file, based on
    /// its extension.
    pub fn ocr_supported(user_file_name: &str) -> bool {
        let ext = user_file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase());
        match ext {
            Some(ext) => !Self::UNSUPPORTED_OCR_EXTENSIONS.contains(&ext.as_str()),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_dag_is_legal() {
        assert!(DocumentState::Uploaded.can_advance_to(DocumentState::OcrProcessing));
        assert!(DocumentState::OcrProcessing.can_advance_to(DocumentState::OcrCompleted));
        assert!(DocumentState::OcrCompleted.can_advance_to(DocumentState::LlmProcessing));
        assert!(DocumentState::LlmProcessing.can_advance_to(DocumentState::LlmCompleted));
    }

    #[test]
    fn failure_branches_are_legal_but_terminal() {
        assert!(DocumentState::OcrProcessing.can_advance_to(DocumentState::OcrFailed));
        assert!(DocumentState::OcrFailed.is_terminal_for_stage());
        assert!(DocumentState::LlmProcessing.can_advance_to(DocumentState::LlmFailed));
        assert!(DocumentState::LlmFailed.is_terminal_for_stage());
    }

    #[test]
    fn unsupported_extension_passthrough_is_legal() {
        assert!(DocumentState::Uploaded.can_advance_to(DocumentState::OcrCompleted));
    }

    #[test]
    fn states_never_regress() {
        assert!(!DocumentState::OcrCompleted.can_advance_to(DocumentState::Uploaded));
        assert!(!DocumentState::LlmCompleted.can_advance_to(DocumentState::OcrProcessing));
        assert!(!DocumentState::OcrFailed.can_advance_to(DocumentState::OcrProcessing));
    }

    #[test]
    fn ocr_supported_extensions() {
        assert!(Document::ocr_supported("scan.pdf"));
        assert!(Document::ocr_supported("photo.png"));
        assert!(!Document::ocr_supported("sheet.csv"));
        assert!(!Document::ocr_supported("data.xlsx"));
    }
}
