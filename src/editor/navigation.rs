//! Keyboard state machine for the focused block.
//!
//! The coordinator never touches the DOM. It mutates the document model and
//! answers with a [`KeyOutcome`]: whether the key was consumed, which block and
//! caret should hold focus next, and which structural/content events the sync
//! layer has to hear about.

use super::command_menu::{BlockCommand, CommandMenu};
use super::document::DocumentModel;
use crate::models::{Block, BlockKey, BlockVariant};
use log::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Key {
    Enter,
    Backspace,
    ArrowUp,
    ArrowDown,
    Escape,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct KeyInput {
    pub key: Key,
    pub shift: bool,
}

impl KeyInput {
    pub fn new(key: Key) -> Self {
        Self { key, shift: false }
    }

    pub fn shifted(key: Key) -> Self {
        Self { key, shift: true }
    }

    /// Maps a DOM `KeyboardEvent.key` value.
    pub fn from_dom(key: &str, shift: bool) -> Self {
        let key = match key {
            "Enter" => Key::Enter,
            "Backspace" => Key::Backspace,
            "ArrowUp" => Key::ArrowUp,
            "ArrowDown" => Key::ArrowDown,
            "Escape" => Key::Escape,
            _ => Key::Other,
        };
        Self { key, shift }
    }
}

/// Which block should hold the caret, and where. Rendering turns this into
/// an actual focus call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FocusIntent {
    pub index: usize,
    pub key: BlockKey,
    /// Offset in chars.
    pub caret: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum EditorEvent {
    BlockInserted { key: BlockKey },
    BlockRemoved { block: Block },
    ContentChanged { key: BlockKey },
    ImageRequested { key: BlockKey },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct KeyOutcome {
    /// The key was consumed; the view must suppress the default action.
    pub handled: bool,
    pub focus: Option<FocusIntent>,
    pub events: Vec<EditorEvent>,
}

impl KeyOutcome {
    fn ignored() -> Self {
        Self::default()
    }

    fn consumed() -> Self {
        Self {
            handled: true,
            ..Self::default()
        }
    }

    fn with_focus(mut self, focus: Option<FocusIntent>) -> Self {
        self.focus = focus;
        self
    }

    fn with_event(mut self, event: EditorEvent) -> Self {
        self.events.push(event);
        self
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct NavigationCoordinator {
    focused: Option<BlockKey>,
    menu: Option<(BlockKey, CommandMenu)>,
}

impl NavigationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn focused(&self) -> Option<BlockKey> {
        self.focused
    }

    /// The open command menu, with the block it belongs to.
    pub fn menu(&self) -> Option<(BlockKey, &CommandMenu)> {
        self.menu.as_ref().map(|(k, m)| (*k, m))
    }

    pub fn close_menu(&mut self) {
        self.menu = None;
    }

    /// Records that the view focused `index`. Images are not focusable.
    pub fn focus_at(&mut self, doc: &DocumentModel, index: usize, caret: usize) -> Option<FocusIntent> {
        let intent = text_focus(doc, index, caret)?;
        if self.focused != Some(intent.key) {
            self.menu = None;
        }
        self.focused = Some(intent.key);
        Some(intent)
    }

    /// Pointer selection of a menu entry.
    pub fn select_command(&mut self, command: BlockCommand) -> KeyOutcome {
        let Some((key, _)) = self.menu.take() else {
            return KeyOutcome::ignored();
        };
        match command {
            BlockCommand::Image => {
                KeyOutcome::consumed().with_event(EditorEvent::ImageRequested { key })
            }
        }
    }

    /// Applies the current text of the block at `index` after an input event.
    pub fn on_input(&mut self, doc: &mut DocumentModel, index: usize, content: &str) -> KeyOutcome {
        let Some(block) = doc.get(index) else {
            debug!("event=input module=navigation status=not_found index={index}");
            return KeyOutcome::ignored();
        };
        let key = block.key;
        self.focused = Some(key);

        let changed = block.variant.text_content() != Some(content);
        if !doc.set_text(key, content) {
            return KeyOutcome::ignored();
        }

        let still_matching = match &mut self.menu {
            Some((menu_key, menu)) if *menu_key == key => Some(menu.refilter(content)),
            _ => None,
        };
        match still_matching {
            Some(true) => {}
            Some(false) => self.menu = None,
            None => self.menu = CommandMenu::open_for(content).map(|m| (key, m)),
        }

        if changed {
            KeyOutcome::ignored().with_event(EditorEvent::ContentChanged { key })
        } else {
            KeyOutcome::ignored()
        }
    }

    pub fn handle_key(
        &mut self,
        doc: &mut DocumentModel,
        index: usize,
        caret: usize,
        input: KeyInput,
    ) -> KeyOutcome {
        let Some(block) = doc.get(index) else {
            debug!("event=key module=navigation status=not_found index={index}");
            return KeyOutcome::ignored();
        };
        let key = block.key;
        let Some(content) = block.variant.text_content().map(str::to_string) else {
            return KeyOutcome::ignored();
        };
        self.focused = Some(key);

        if let Some(outcome) = self.handle_menu_key(key, input) {
            return outcome;
        }

        let outcome = match input.key {
            Key::Enter if input.shift => self.split_after(doc, index, &content),
            Key::Backspace if caret == 0 => self.backspace_at_start(doc, index, &content),
            Key::ArrowUp if caret == 0 => {
                match prev_text_index(doc, index).and_then(|i| end_focus(doc, i)) {
                    Some(f) => KeyOutcome::consumed().with_focus(Some(f)),
                    None => KeyOutcome::ignored(),
                }
            }
            Key::ArrowDown if caret >= content.chars().count() => {
                match next_text_index(doc, index + 1).and_then(|i| text_focus(doc, i, 0)) {
                    Some(f) => KeyOutcome::consumed().with_focus(Some(f)),
                    None => KeyOutcome::ignored(),
                }
            }
            _ => KeyOutcome::ignored(),
        };

        if let Some(f) = outcome.focus {
            self.focused = Some(f.key);
        }
        outcome
    }

    fn handle_menu_key(&mut self, key: BlockKey, input: KeyInput) -> Option<KeyOutcome> {
        let menu_key = self.menu.as_ref()?.0;
        if menu_key != key {
            self.menu = None;
            return None;
        }

        match input.key {
            Key::ArrowDown => {
                if let Some((_, menu)) = self.menu.as_mut() {
                    menu.move_down();
                }
                Some(KeyOutcome::consumed())
            }
            Key::ArrowUp => {
                if let Some((_, menu)) = self.menu.as_mut() {
                    menu.move_up();
                }
                Some(KeyOutcome::consumed())
            }
            Key::Escape => {
                self.menu = None;
                Some(KeyOutcome::consumed())
            }
            Key::Enter if !input.shift => {
                let chosen = self.menu.take().and_then(|(_, m)| m.highlighted_command());
                match chosen {
                    Some(BlockCommand::Image) => Some(
                        KeyOutcome::consumed().with_event(EditorEvent::ImageRequested { key }),
                    ),
                    None => Some(KeyOutcome::consumed()),
                }
            }
            _ => None,
        }
    }

    fn split_after(&mut self, doc: &mut DocumentModel, index: usize, content: &str) -> KeyOutcome {
        let len = doc.len();
        let only_empty_after = index + 1 < len && doc.blocks()[index + 1..].iter().all(|b| b.is_empty_text());

        if !content.is_empty() && only_empty_after {
            return KeyOutcome::consumed().with_focus(text_focus(doc, len - 1, 0));
        }

        let created = doc.insert_block(index + 1, BlockVariant::text(""));
        KeyOutcome::consumed()
            .with_focus(text_focus(doc, index + 1, 0))
            .with_event(EditorEvent::BlockInserted { key: created.key })
    }

    fn backspace_at_start(&mut self, doc: &mut DocumentModel, index: usize, content: &str) -> KeyOutcome {
        if content.is_empty() {
            return self.delete_empty(doc, index);
        }

        let persisted = doc.get(index).map(|b| b.is_persisted()).unwrap_or(false);
        if !persisted || index == 0 {
            return KeyOutcome::ignored();
        }

        match doc.get(index - 1) {
            Some(prev) if prev.variant.is_text() => {
                KeyOutcome::consumed().with_focus(end_focus(doc, index - 1))
            }
            _ => KeyOutcome::ignored(),
        }
    }

    fn delete_empty(&mut self, doc: &mut DocumentModel, index: usize) -> KeyOutcome {
        if doc.len() <= 1 {
            return KeyOutcome::consumed();
        }

        if index > 0 && doc.get(index - 1).map(|b| b.variant.is_image()).unwrap_or(false) {
            // Images cannot take the caret: backspace removes the image and
            // the empty block keeps focus.
            let Some(image) = doc.remove_at(index - 1) else {
                return KeyOutcome::ignored();
            };
            return KeyOutcome::consumed()
                .with_focus(text_focus(doc, index - 1, 0))
                .with_event(EditorEvent::BlockRemoved { block: image });
        }

        let Some(removed) = doc.remove_at(index) else {
            return KeyOutcome::ignored();
        };
        let focus = if index > 0 {
            end_focus(doc, index - 1)
        } else {
            next_text_index(doc, 0).and_then(|i| text_focus(doc, i, 0))
        };

        KeyOutcome::consumed()
            .with_focus(focus)
            .with_event(EditorEvent::BlockRemoved { block: removed })
    }
}

fn text_focus(doc: &DocumentModel, index: usize, caret: usize) -> Option<FocusIntent> {
    let block = doc.get(index)?;
    let len = block.end_caret()?;
    Some(FocusIntent {
        index,
        key: block.key,
        caret: caret.min(len),
    })
}

fn end_focus(doc: &DocumentModel, index: usize) -> Option<FocusIntent> {
    let caret = doc.get(index)?.end_caret()?;
    text_focus(doc, index, caret)
}

fn prev_text_index(doc: &DocumentModel, index: usize) -> Option<usize> {
    (0..index).rev().find(|&i| doc.get(i).map(|b| b.variant.is_text()).unwrap_or(false))
}

fn next_text_index(doc: &DocumentModel, from: usize) -> Option<usize> {
    (from..doc.len()).find(|&i| doc.get(i).map(|b| b.variant.is_text()).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_of(variants: &[BlockVariant]) -> DocumentModel {
        let mut doc = DocumentModel::new("n-1", "t");
        let first = doc.blocks()[0].key;
        doc.set_variant(first, variants[0].clone());
        for (i, v) in variants.iter().enumerate().skip(1) {
            doc.insert_block(i, v.clone());
        }
        doc
    }

    fn persist_all(doc: &mut DocumentModel) {
        let keys = doc.blocks().iter().map(|b| b.key).collect::<Vec<_>>();
        for (i, k) in keys.into_iter().enumerate() {
            doc.assign_id(k, &format!("c-{i}"));
        }
    }

    fn texts(doc: &DocumentModel) -> Vec<String> {
        doc.blocks()
            .iter()
            .map(|b| b.variant.text_content().unwrap_or("<img>").to_string())
            .collect()
    }

    #[test]
    fn test_backspace_on_empty_block_focuses_end_of_previous() {
        let mut doc = doc_of(&[BlockVariant::text("Hello"), BlockVariant::text("")]);
        let mut nav = NavigationCoordinator::new();

        let out = nav.handle_key(&mut doc, 1, 0, KeyInput::new(Key::Backspace));

        assert!(out.handled);
        assert_eq!(texts(&doc), vec!["Hello"]);
        let f = out.focus.expect("focus intent");
        assert_eq!((f.index, f.caret), (0, 5));
        assert!(matches!(out.events.as_slice(), [EditorEvent::BlockRemoved { .. }]));
    }

    #[test]
    fn test_shift_enter_inserts_empty_block_after() {
        let mut doc = doc_of(&[BlockVariant::text("Hello")]);
        let mut nav = NavigationCoordinator::new();

        let out = nav.handle_key(&mut doc, 0, 5, KeyInput::shifted(Key::Enter));

        assert!(out.handled);
        assert_eq!(texts(&doc), vec!["Hello", ""]);
        let f = out.focus.expect("focus intent");
        assert_eq!((f.index, f.caret), (1, 0));
        assert_eq!(doc.get(1).and_then(|b| b.id.clone()), None);
        assert!(matches!(out.events.as_slice(), [EditorEvent::BlockInserted { .. }]));
    }

    #[test]
    fn test_shift_enter_reuses_trailing_empty_block() {
        let mut doc = doc_of(&[BlockVariant::text("Hello"), BlockVariant::text("")]);
        let mut nav = NavigationCoordinator::new();

        let out = nav.handle_key(&mut doc, 0, 5, KeyInput::shifted(Key::Enter));

        assert!(out.handled);
        assert_eq!(doc.len(), 2);
        assert!(out.events.is_empty());
        assert_eq!(out.focus.map(|f| f.index), Some(1));
    }

    #[test]
    fn test_shift_enter_in_middle_still_inserts() {
        let mut doc = doc_of(&[BlockVariant::text("A"), BlockVariant::text("B"), BlockVariant::text("")]);
        let mut nav = NavigationCoordinator::new();

        let out = nav.handle_key(&mut doc, 0, 1, KeyInput::shifted(Key::Enter));

        assert_eq!(texts(&doc), vec!["A", "", "B", ""]);
        assert_eq!(out.focus.map(|f| f.index), Some(1));
    }

    #[test]
    fn test_plain_enter_is_left_to_the_textarea() {
        let mut doc = doc_of(&[BlockVariant::text("Hello")]);
        let mut nav = NavigationCoordinator::new();
        let out = nav.handle_key(&mut doc, 0, 5, KeyInput::new(Key::Enter));
        assert!(!out.handled);
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn test_backspace_on_non_empty_local_block_is_default() {
        let mut doc = doc_of(&[BlockVariant::text("A"), BlockVariant::text("B")]);
        let mut nav = NavigationCoordinator::new();

        let out = nav.handle_key(&mut doc, 1, 0, KeyInput::new(Key::Backspace));

        assert!(!out.handled);
        assert!(out.focus.is_none());
        assert_eq!(texts(&doc), vec!["A", "B"]);
    }

    #[test]
    fn test_backspace_on_non_empty_persisted_block_moves_focus_only() {
        let mut doc = doc_of(&[BlockVariant::text("Hello"), BlockVariant::text("World")]);
        persist_all(&mut doc);
        let mut nav = NavigationCoordinator::new();

        let out = nav.handle_key(&mut doc, 1, 0, KeyInput::new(Key::Backspace));

        assert!(out.handled);
        assert!(out.events.is_empty());
        assert_eq!(texts(&doc), vec!["Hello", "World"]);
        let f = out.focus.expect("focus intent");
        assert_eq!((f.index, f.caret), (0, 5));
    }

    #[test]
    fn test_backspace_through_image_removes_image() {
        let mut doc = doc_of(&[
            BlockVariant::text("A"),
            BlockVariant::image("cat.png"),
            BlockVariant::text(""),
        ]);
        let mut nav = NavigationCoordinator::new();

        let out = nav.handle_key(&mut doc, 2, 0, KeyInput::new(Key::Backspace));

        assert!(out.handled);
        assert_eq!(texts(&doc), vec!["A", ""]);
        let f = out.focus.expect("focus intent");
        assert_eq!((f.index, f.caret), (1, 0));
        assert!(matches!(out.events.as_slice(), [EditorEvent::BlockRemoved { .. }]));
    }

    #[test]
    fn test_backspace_on_sole_empty_block_is_noop() {
        let mut doc = DocumentModel::new("n-1", "t");
        let key = doc.blocks()[0].key;
        let mut nav = NavigationCoordinator::new();

        let out = nav.handle_key(&mut doc, 0, 0, KeyInput::new(Key::Backspace));

        assert!(out.handled);
        assert!(out.events.is_empty());
        assert_eq!(doc.blocks()[0].key, key);
    }

    #[test]
    fn test_backspace_on_first_empty_block_focuses_next() {
        let mut doc = doc_of(&[BlockVariant::text(""), BlockVariant::text("B")]);
        let mut nav = NavigationCoordinator::new();

        let out = nav.handle_key(&mut doc, 0, 0, KeyInput::new(Key::Backspace));

        assert_eq!(texts(&doc), vec!["B"]);
        assert_eq!(out.focus.map(|f| (f.index, f.caret)), Some((0, 0)));
    }

    #[test]
    fn test_slash_menu_open_navigate_and_select() {
        let mut doc = doc_of(&[BlockVariant::text("")]);
        let key = doc.blocks()[0].key;
        let mut nav = NavigationCoordinator::new();

        nav.on_input(&mut doc, 0, "/");
        let (menu_key, menu) = nav.menu().expect("menu open");
        assert_eq!(menu_key, key);
        assert_eq!(menu.options(), &[BlockCommand::Image]);
        assert_eq!(menu.highlighted(), 0);

        let out = nav.handle_key(&mut doc, 0, 1, KeyInput::new(Key::ArrowDown));
        assert!(out.handled);
        assert_eq!(nav.menu().map(|(_, m)| m.highlighted()), Some(0));

        let out = nav.handle_key(&mut doc, 0, 1, KeyInput::new(Key::Enter));
        assert!(out.handled);
        assert!(nav.menu().is_none());
        assert_eq!(out.events, vec![EditorEvent::ImageRequested { key }]);
    }

    #[test]
    fn test_menu_closes_when_filter_stops_matching() {
        let mut doc = doc_of(&[BlockVariant::text("")]);
        let mut nav = NavigationCoordinator::new();

        nav.on_input(&mut doc, 0, "/");
        nav.on_input(&mut doc, 0, "/i");
        assert!(nav.menu().is_some());
        nav.on_input(&mut doc, 0, "/ix");
        assert!(nav.menu().is_none());
    }

    #[test]
    fn test_escape_closes_menu() {
        let mut doc = doc_of(&[BlockVariant::text("")]);
        let mut nav = NavigationCoordinator::new();
        nav.on_input(&mut doc, 0, "/");
        let out = nav.handle_key(&mut doc, 0, 1, KeyInput::new(Key::Escape));
        assert!(out.handled);
        assert!(nav.menu().is_none());
    }

    #[test]
    fn test_arrow_keys_skip_images() {
        let mut doc = doc_of(&[
            BlockVariant::text("ab"),
            BlockVariant::image("cat.png"),
            BlockVariant::text("cd"),
        ]);
        let mut nav = NavigationCoordinator::new();

        let up = nav.handle_key(&mut doc, 2, 0, KeyInput::new(Key::ArrowUp));
        assert_eq!(up.focus.map(|f| (f.index, f.caret)), Some((0, 2)));

        let down = nav.handle_key(&mut doc, 0, 2, KeyInput::new(Key::ArrowDown));
        assert_eq!(down.focus.map(|f| (f.index, f.caret)), Some((2, 0)));

        let mid = nav.handle_key(&mut doc, 0, 1, KeyInput::new(Key::ArrowDown));
        assert!(!mid.handled);
    }

    #[test]
    fn test_input_reports_content_change_once() {
        let mut doc = doc_of(&[BlockVariant::text("a")]);
        let mut nav = NavigationCoordinator::new();
        let out = nav.on_input(&mut doc, 0, "ab");
        assert_eq!(out.events.len(), 1);
        let out = nav.on_input(&mut doc, 0, "ab");
        assert!(out.events.is_empty());
    }
}
