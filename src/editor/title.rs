use super::document::DocumentModel;
use crate::state::note_sync::SyncEngine;
use crate::util::Timestamp;

/// Single-field editor for the document title.
///
/// Same debounce-and-sync path as block content, keyed on the title field.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct TitleEditor;

impl TitleEditor {
    pub const PLACEHOLDER: &'static str = "Untitled";

    /// Titles are single-line; pasted line breaks become spaces.
    pub fn normalize(value: &str) -> String {
        value
            .split(['\r', '\n'])
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Applies typed text. Returns false when nothing changed. An empty title
    /// is a valid value.
    pub fn input(
        &self,
        doc: &mut DocumentModel,
        sync: &mut SyncEngine,
        value: &str,
        now: &Timestamp,
    ) -> bool {
        let title = Self::normalize(value);
        if doc.title() == title {
            return false;
        }
        doc.rename_title(title.as_str());
        doc.touch(now.iso.clone());
        sync.on_title_changed(&title, now.ms);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::note_sync::{FieldKey, SyncOp};

    #[test]
    fn test_normalize_flattens_line_breaks() {
        assert_eq!(TitleEditor::normalize("a\nb\r\nc"), "a b c");
        assert_eq!(TitleEditor::normalize(""), "");
    }

    #[test]
    fn test_input_renames_and_schedules() {
        let mut doc = DocumentModel::new("n-1", "Old");
        let mut sync = SyncEngine::default();
        sync.seed(&doc);

        let now = Timestamp::at(1_000, "2026-01-01T00:00:01Z");
        assert!(TitleEditor.input(&mut doc, &mut sync, "New", &now));
        assert!(!TitleEditor.input(&mut doc, &mut sync, "New", &now));

        assert_eq!(doc.title(), "New");
        assert_eq!(doc.document().last_interacted_with, "2026-01-01T00:00:01Z");
        assert!(sync.is_pending(FieldKey::Title));
        let ops = sync.poll_due(&doc, 1_500);
        assert!(matches!(ops.as_slice(), [SyncOp::EditTitle { title, .. }] if title == "New"));
    }

    #[test]
    fn test_empty_title_is_accepted() {
        let mut doc = DocumentModel::new("n-1", "Old");
        let mut sync = SyncEngine::default();
        sync.seed(&doc);

        let now = Timestamp::at(0, "t");
        assert!(TitleEditor.input(&mut doc, &mut sync, "", &now));
        assert_eq!(doc.title(), "");
        assert_eq!(sync.poll_due(&doc, 500).len(), 1);
    }
}
