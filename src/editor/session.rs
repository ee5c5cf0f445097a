//! The editing session for one open note.
//!
//! Owns the document, the keyboard coordinator and the sync engine, and runs
//! the editing loop: an input event mutates the document, the resulting
//! editor events become sync ops, and the caller gets back a focus intent
//! plus the ops to run. Results come back through
//! [`EditorSession::apply_result`].

use super::command_menu::{BlockCommand, CommandMenu};
use super::document::DocumentModel;
use super::navigation::{EditorEvent, FocusIntent, KeyInput, NavigationCoordinator};
use super::title::TitleEditor;
use crate::api::ApiResult;
use crate::models::{Block, BlockKey, BlockRecord, BlockVariant};
use crate::state::note_sync::{SyncConfig, SyncEngine, SyncOp, SyncOutcome, SyncReply, SyncStatus};
use crate::util::Timestamp;
use log::{debug, info};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct SessionUpdate {
    /// The key was consumed; suppress the browser default.
    pub handled: bool,
    pub focus: Option<FocusIntent>,
    /// Ops to run now, in order.
    pub ops: Vec<SyncOp>,
    /// The image command was chosen on this block; a file should be picked.
    pub upload_requested: Option<BlockKey>,
}

/// Where an image upload for a block can go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum UploadTarget {
    Ready { block_id: String },
    /// The block has no id yet; run this op first, then ask again.
    NeedsSync(SyncOp),
}

#[derive(Clone, Debug)]
pub(crate) struct EditorSession {
    doc: DocumentModel,
    nav: NavigationCoordinator,
    sync: SyncEngine,
    title: TitleEditor,
    unauthorized: bool,
}

impl EditorSession {
    /// Opens a note from its persisted blocks.
    pub fn load(note_id: &str, title: &str, records: &[BlockRecord], config: SyncConfig) -> Self {
        let session = Self::from_model(DocumentModel::from_records(note_id, title, records), config);
        info!(
            "event=load module=session status=ok note_id={note_id} blocks={} strategy={}",
            session.doc.len(),
            config.strategy
        );
        session
    }

    fn from_model(doc: DocumentModel, config: SyncConfig) -> Self {
        let mut sync = SyncEngine::new(config);
        sync.seed(&doc);
        Self {
            doc,
            nav: NavigationCoordinator::new(),
            sync,
            title: TitleEditor,
            unauthorized: false,
        }
    }

    pub fn note_id(&self) -> &str {
        self.doc.id()
    }

    pub fn title(&self) -> &str {
        self.doc.title()
    }

    pub fn blocks(&self) -> &[Block] {
        self.doc.blocks()
    }

    pub fn document(&self) -> &DocumentModel {
        &self.doc
    }

    pub fn sync(&self) -> &SyncEngine {
        &self.sync
    }

    pub fn focused(&self) -> Option<BlockKey> {
        self.nav.focused()
    }

    pub fn menu(&self) -> Option<(BlockKey, &CommandMenu)> {
        self.nav.menu()
    }

    /// True once any sync call was rejected as unauthorized. The surrounding
    /// shell decides what to do about it.
    pub fn unauthorized(&self) -> bool {
        self.unauthorized
    }

    pub fn next_deadline(&self) -> Option<i64> {
        self.sync.next_deadline()
    }

    /// Focus for a freshly opened note: the first text block, caret 0.
    pub fn initial_focus(&mut self) -> Option<FocusIntent> {
        let index = self.doc.blocks().iter().position(|b| b.variant.is_text())?;
        self.nav.focus_at(&self.doc, index, 0)
    }

    /// The view focused a block on its own (click, tab).
    pub fn focus_block(&mut self, index: usize, caret: usize) -> Option<FocusIntent> {
        self.nav.focus_at(&self.doc, index, caret)
    }

    pub fn close_menu(&mut self) {
        self.nav.close_menu();
    }

    pub fn input(&mut self, index: usize, content: &str, now: &Timestamp) -> SessionUpdate {
        let outcome = self.nav.on_input(&mut self.doc, index, content);
        let mut update = SessionUpdate {
            handled: outcome.handled,
            focus: outcome.focus,
            ..SessionUpdate::default()
        };
        self.dispatch(outcome.events, now, &mut update);
        update
    }

    pub fn key(&mut self, index: usize, caret: usize, input: KeyInput, now: &Timestamp) -> SessionUpdate {
        let outcome = self.nav.handle_key(&mut self.doc, index, caret, input);
        let mut update = SessionUpdate {
            handled: outcome.handled,
            focus: outcome.focus,
            ..SessionUpdate::default()
        };
        self.dispatch(outcome.events, now, &mut update);
        update
    }

    /// The user clicked a command menu entry.
    pub fn select_command(&mut self, command: BlockCommand, now: &Timestamp) -> SessionUpdate {
        let outcome = self.nav.select_command(command);
        let mut update = SessionUpdate {
            handled: outcome.handled,
            focus: outcome.focus,
            ..SessionUpdate::default()
        };
        self.dispatch(outcome.events, now, &mut update);
        update
    }

    pub fn title_input(&mut self, value: &str, now: &Timestamp) -> bool {
        self.title.input(&mut self.doc, &mut self.sync, value, now)
    }

    /// Drag reorder: moves the block and reconciles at once.
    pub fn reorder(&mut self, from: usize, to: usize, now: &Timestamp) -> SessionUpdate {
        if !self.doc.reorder(from, to) {
            return SessionUpdate::default();
        }
        self.doc.touch(now.iso.clone());
        debug!("event=reorder module=session status=ok from={from} to={to}");
        SessionUpdate {
            handled: true,
            ops: self.sync.on_structural_change(&self.doc),
            ..SessionUpdate::default()
        }
    }

    /// Removes any block, images included (pointer deletion).
    pub fn delete_block_at(&mut self, index: usize, now: &Timestamp) -> SessionUpdate {
        let Some(block) = self.doc.remove_at(index) else {
            return SessionUpdate::default();
        };
        if self.nav.focused() == Some(block.key) {
            self.nav.close_menu();
        }
        let mut update = SessionUpdate {
            handled: true,
            ..SessionUpdate::default()
        };
        self.dispatch(vec![EditorEvent::BlockRemoved { block }], now, &mut update);
        update
    }

    /// Adds an empty text block at the end and focuses it.
    pub fn append_text_block(&mut self, now: &Timestamp) -> SessionUpdate {
        let created = self.doc.insert_block(self.doc.len(), BlockVariant::text(""));
        let mut update = SessionUpdate {
            handled: true,
            focus: self.nav.focus_at(&self.doc, created.position, 0),
            ..SessionUpdate::default()
        };
        self.dispatch(
            vec![EditorEvent::BlockInserted { key: created.key }],
            now,
            &mut update,
        );
        update
    }

    /// Which block id an upload for `key` should be filed under.
    pub fn upload_target(&mut self, key: BlockKey) -> Option<UploadTarget> {
        let block = self.doc.block_by_key(key)?;
        Some(match &block.id {
            Some(id) => UploadTarget::Ready {
                block_id: id.clone(),
            },
            None => UploadTarget::NeedsSync(self.sync.bulk(&self.doc)),
        })
    }

    /// Places an uploaded image. A text block becomes the image in place; if
    /// the block already shows an image the new one goes right after it; if
    /// the block is gone the image is appended. A text block always follows
    /// the image so the caret has somewhere to go.
    pub fn complete_image_upload(&mut self, key: BlockKey, image_path: &str, now: &Timestamp) -> SessionUpdate {
        let image = BlockVariant::image(image_path);
        let index = match self.doc.index_of_key(key) {
            Some(i) if self.doc.get(i).map(|b| b.variant.is_text()).unwrap_or(false) => {
                self.doc.set_variant(key, image);
                i
            }
            Some(i) => self.doc.insert_block(i + 1, image).position,
            None => self.doc.insert_block(self.doc.len(), image).position,
        };

        let text_follows = self
            .doc
            .get(index + 1)
            .map(|b| b.variant.is_text())
            .unwrap_or(false);
        if !text_follows {
            self.doc.insert_block(index + 1, BlockVariant::text(""));
        }
        self.doc.touch(now.iso.clone());

        info!("event=image_placed module=session status=ok index={index}");
        SessionUpdate {
            handled: true,
            focus: self.nav.focus_at(&self.doc, index + 1, 0),
            ops: self.sync.on_structural_change(&self.doc),
            upload_requested: None,
        }
    }

    /// Debounced ops whose quiet period has elapsed.
    pub fn tick(&mut self, now_ms: i64) -> Vec<SyncOp> {
        self.sync.poll_due(&self.doc, now_ms)
    }

    /// Merges the result of a finished op. Follow-up ops are in the outcome.
    pub fn apply_result(&mut self, op: &SyncOp, result: ApiResult<SyncReply>) -> SyncOutcome {
        let outcome = self.sync.apply(&mut self.doc, op, result);
        if outcome.status == SyncStatus::Unauthorized {
            self.unauthorized = true;
        }
        if let Some(key) = self.nav.focused() {
            if self.doc.index_of_key(key).is_none() {
                // The response dropped the focused block.
                self.nav.close_menu();
            }
        }
        outcome
    }

    fn dispatch(&mut self, events: Vec<EditorEvent>, now: &Timestamp, update: &mut SessionUpdate) {
        for event in events {
            match event {
                EditorEvent::ContentChanged { key } => {
                    if let Some(content) = self
                        .doc
                        .block_by_key(key)
                        .and_then(|b| b.variant.text_content())
                    {
                        self.sync.on_content_changed(key, content, now.ms);
                    }
                }
                EditorEvent::BlockInserted { key } => {
                    update.ops.extend(self.sync.on_block_inserted(&self.doc, key));
                }
                EditorEvent::BlockRemoved { block } => {
                    update.ops.extend(self.sync.on_block_removed(
                        &self.doc,
                        block.key,
                        block.id.as_deref(),
                        block.variant.is_text(),
                    ));
                }
                EditorEvent::ImageRequested { key } => {
                    // The `/image` command text is consumed.
                    if self.doc.set_text(key, "") {
                        self.sync.on_content_changed(key, "", now.ms);
                    }
                    update.upload_requested = Some(key);
                }
            }
            self.doc.touch(now.iso.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiErrorKind, ImageUpload, NoteStore};
    use crate::editor::navigation::Key;
    use crate::models::BlockRecordType;
    use crate::state::note_sync::tests::FakeStore;
    use crate::state::note_sync::{execute, SyncStrategy};
    use futures::executor::block_on;
    use std::collections::VecDeque;

    fn now(ms: i64) -> Timestamp {
        Timestamp::at(ms, format!("t{ms}"))
    }

    /// Runs ops and their follow-ups to completion, one at a time.
    fn drain(session: &mut EditorSession, store: &FakeStore, ops: Vec<SyncOp>) -> Vec<SyncStatus> {
        let mut queue = VecDeque::from(ops);
        let mut statuses = vec![];
        while let Some(op) = queue.pop_front() {
            let result = block_on(execute(store, &op));
            let outcome = session.apply_result(&op, result);
            queue.extend(outcome.follow_up);
            statuses.push(outcome.status);
        }
        statuses
    }

    fn texts(session: &EditorSession) -> Vec<String> {
        session
            .blocks()
            .iter()
            .map(|b| b.variant.text_content().unwrap_or("<img>").to_string())
            .collect()
    }

    fn text_record(id: &str, content: &str, position: i64) -> BlockRecord {
        BlockRecord {
            id: Some(id.to_string()),
            note_id: Some("n-1".to_string()),
            kind: BlockRecordType::Text,
            text_node: Some(crate::models::TextNodeRecord {
                id: None,
                content: content.to_string(),
            }),
            image_node: None,
            position,
        }
    }

    fn loaded(contents: &[&str], strategy: SyncStrategy) -> (EditorSession, FakeStore) {
        let records = contents
            .iter()
            .enumerate()
            .map(|(i, c)| text_record(&format!("c-{i}"), c, i as i64))
            .collect::<Vec<_>>();
        let store = FakeStore::default();
        *store.blocks.borrow_mut() = records.clone();
        let session = EditorSession::load("n-1", "Note", &records, SyncConfig::new(strategy));
        (session, store)
    }

    #[test]
    fn test_load_empty_note_has_one_focusable_block() {
        let mut session = EditorSession::load("n-1", "Note", &[], SyncConfig::default());
        assert_eq!(texts(&session), vec![""]);
        let f = session.initial_focus().expect("initial focus");
        assert_eq!((f.index, f.caret), (0, 0));
    }

    #[test]
    fn test_load_fetches_and_sorts_from_store() {
        let store = FakeStore::default();
        *store.blocks.borrow_mut() = vec![text_record("b", "second", 1), text_record("a", "first", 0)];
        let records = block_on(store.get_blocks("n-1")).expect("blocks");
        let session = EditorSession::load("n-1", "Note", &records, SyncConfig::default());
        assert_eq!(texts(&session), vec!["first", "second"]);
    }

    #[test]
    fn test_backspace_on_empty_block_removes_and_syncs() {
        let (mut session, store) = loaded(&["Hello", ""], SyncStrategy::Bulk);

        let update = session.key(1, 0, KeyInput::new(Key::Backspace), &now(0));

        assert!(update.handled);
        assert_eq!(texts(&session), vec!["Hello"]);
        assert_eq!(update.focus.map(|f| (f.index, f.caret)), Some((0, 5)));
        assert_eq!(drain(&mut session, &store, update.ops), vec![SyncStatus::Applied]);
        assert_eq!(store.texts(), vec!["Hello"]);
    }

    #[test]
    fn test_shift_enter_then_bulk_assigns_identity() {
        let (mut session, store) = loaded(&["Hello"], SyncStrategy::Bulk);

        let update = session.key(0, 5, KeyInput::shifted(Key::Enter), &now(0));
        assert_eq!(texts(&session), vec!["Hello", ""]);
        assert_eq!(update.focus.map(|f| (f.index, f.caret)), Some((1, 0)));
        let new_key = session.blocks()[1].key;
        assert!(session.blocks()[1].id.is_none());

        drain(&mut session, &store, update.ops);

        let block = session.document().block_by_key(new_key).expect("block kept its key");
        assert!(block.id.is_some());
        assert_eq!(block.variant, BlockVariant::text(""));
    }

    #[test]
    fn test_reorder_sends_exact_order_and_store_follows() {
        let (mut session, store) = loaded(&["A", "B", "C"], SyncStrategy::PerField);

        let update = session.reorder(2, 0, &now(0));

        let [SyncOp::Bulk { blocks, .. }] = update.ops.as_slice() else {
            panic!("expected one bulk op, got {:?}", update.ops);
        };
        let ids = blocks
            .iter()
            .map(|r| r.id.clone().unwrap_or_default())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["c-2", "c-0", "c-1"]);

        drain(&mut session, &store, update.ops);
        assert_eq!(texts(&session), vec!["C", "A", "B"]);
        assert_eq!(store.texts(), vec!["C", "A", "B"]);
        let positions = session.blocks().iter().map(|b| b.position).collect::<Vec<_>>();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[test]
    fn test_reorder_out_of_range_issues_nothing() {
        let (mut session, _store) = loaded(&["A"], SyncStrategy::Bulk);
        let update = session.reorder(3, 0, &now(0));
        assert!(!update.handled);
        assert!(update.ops.is_empty());
    }

    #[test]
    fn test_typing_is_debounced_into_one_edit() {
        let (mut session, store) = loaded(&["a"], SyncStrategy::PerField);

        session.input(0, "ab", &now(0));
        session.input(0, "abc", &now(100));
        assert!(session.tick(350).is_empty());
        assert_eq!(session.next_deadline(), Some(400));

        let ops = session.tick(400);
        assert!(matches!(ops.as_slice(), [SyncOp::EditText { content, .. }] if content == "abc"));
        drain(&mut session, &store, ops);
        assert_eq!(store.texts(), vec!["abc"]);
        assert_eq!(store.calls.borrow().as_slice(), &["edit_text_block".to_string()]);
    }

    #[test]
    fn test_slash_command_requests_upload_and_converts_in_place() {
        let (mut session, store) = loaded(&["x", ""], SyncStrategy::Bulk);
        let key = session.blocks()[1].key;

        session.input(1, "/", &now(0));
        assert!(session.menu().is_some());
        let update = session.key(1, 1, KeyInput::new(Key::Enter), &now(10));
        assert_eq!(update.upload_requested, Some(key));
        assert!(session.menu().is_none());
        assert_eq!(texts(&session), vec!["x", ""]);

        let Some(UploadTarget::Ready { block_id }) = session.upload_target(key) else {
            panic!("persisted block should be ready for upload");
        };
        let upload = ImageUpload {
            file_name: "cat.png".to_string(),
            mime: "image/png".to_string(),
            bytes: vec![1, 2, 3],
        };
        let path = block_on(store.request_image_upload("n-1", &block_id, upload)).expect("path");

        let update = session.complete_image_upload(key, &path, &now(20));
        assert_eq!(texts(&session), vec!["x", "<img>", ""]);
        assert_eq!(session.blocks()[1].key, key);
        assert_eq!(update.focus.map(|f| f.index), Some(2));
        assert_eq!(drain(&mut session, &store, update.ops), vec![SyncStatus::Applied]);
        assert_eq!(store.texts(), vec!["x", "<img>", ""]);
    }

    #[test]
    fn test_clicking_menu_entry_requests_upload() {
        let (mut session, _store) = loaded(&[""], SyncStrategy::Bulk);
        let key = session.blocks()[0].key;
        session.input(0, "/", &now(0));

        let update = session.select_command(BlockCommand::Image, &now(5));

        assert!(update.handled);
        assert_eq!(update.upload_requested, Some(key));
        assert!(session.menu().is_none());
    }

    #[test]
    fn test_upload_for_local_block_needs_sync_first() {
        let mut session = EditorSession::load("n-1", "Note", &[], SyncConfig::default());
        let key = session.blocks()[0].key;
        assert!(matches!(session.upload_target(key), Some(UploadTarget::NeedsSync(SyncOp::Bulk { .. }))));
    }

    #[test]
    fn test_upload_onto_existing_image_inserts_after_it() {
        let (mut session, _store) = loaded(&["x"], SyncStrategy::Bulk);
        let key = session.blocks()[0].key;
        session.complete_image_upload(key, "a.png", &now(0));
        session.complete_image_upload(key, "b.png", &now(1));

        let paths = session
            .blocks()
            .iter()
            .map(|b| match &b.variant {
                BlockVariant::Image { image_path } => image_path.clone(),
                BlockVariant::Text { content } => content.clone(),
            })
            .collect::<Vec<_>>();
        assert_eq!(paths, vec!["a.png", "b.png", ""]);
    }

    #[test]
    fn test_upload_for_removed_block_appends() {
        let (mut session, _store) = loaded(&["x", "y"], SyncStrategy::Bulk);
        let key = session.blocks()[1].key;
        session.delete_block_at(1, &now(0));
        session.complete_image_upload(key, "a.png", &now(1));
        assert_eq!(texts(&session), vec!["x", "<img>", ""]);
    }

    #[test]
    fn test_delete_image_by_pointer() {
        let (mut session, store) = loaded(&["x"], SyncStrategy::PerField);
        let key = session.blocks()[0].key;
        let update = session.complete_image_upload(key, "a.png", &now(0));
        drain(&mut session, &store, update.ops);

        let update = session.delete_block_at(0, &now(1));
        assert!(matches!(update.ops.as_slice(), [SyncOp::Bulk { .. }]));
        drain(&mut session, &store, update.ops);
        assert_eq!(store.texts(), vec![""]);
    }

    #[test]
    fn test_append_text_block_focuses_new_block() {
        let (mut session, store) = loaded(&["x"], SyncStrategy::PerField);
        let update = session.append_text_block(&now(0));
        assert_eq!(update.focus.map(|f| f.index), Some(1));
        assert!(matches!(update.ops.as_slice(), [SyncOp::CreateText { position: 1, .. }]));
        drain(&mut session, &store, update.ops);
        assert!(session.blocks()[1].id.is_some());
    }

    #[test]
    fn test_unauthorized_is_recorded_and_state_kept() {
        let (mut session, _) = loaded(&["A", "B"], SyncStrategy::Bulk);
        let store = FakeStore::failing(ApiErrorKind::Unauthorized);
        let before = texts(&session);

        let update = session.reorder(1, 0, &now(0));
        let after_local = texts(&session);
        let statuses = drain(&mut session, &store, update.ops);

        assert_eq!(statuses, vec![SyncStatus::Unauthorized]);
        assert!(session.unauthorized());
        assert_ne!(before, after_local);
        assert_eq!(texts(&session), after_local);
    }

    #[test]
    fn test_title_edit_goes_through_its_own_debounce() {
        let (mut session, store) = loaded(&["A"], SyncStrategy::Bulk);
        assert!(session.title_input("Groceries", &now(0)));
        session.input(0, "AB", &now(0));

        let first = session.tick(300);
        assert!(matches!(first.as_slice(), [SyncOp::Bulk { .. }]));
        let second = session.tick(500);
        assert!(matches!(second.as_slice(), [SyncOp::EditTitle { .. }]));

        drain(&mut session, &store, second);
        assert_eq!(session.title(), "Groceries");
        assert_eq!(
            session.document().document().last_interacted_with,
            "2026-01-01T00:00:00Z"
        );
    }

    #[test]
    fn test_edits_typed_during_bulk_survive_the_response() {
        let (mut session, store) = loaded(&["a"], SyncStrategy::Bulk);
        session.input(0, "ab", &now(0));
        let ops = session.tick(300);

        // Keep typing while the request is out.
        session.input(0, "abc", &now(350));
        drain(&mut session, &store, ops);
        assert_eq!(texts(&session), vec!["abc"]);

        let ops = session.tick(650);
        drain(&mut session, &store, ops);
        assert_eq!(store.texts(), vec!["abc"]);
    }
}
