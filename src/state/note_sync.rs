//! Sync engine for the open note.
//!
//! The engine is sans-io: it turns document changes into [`SyncOp`]s, the
//! caller runs them with [`execute`] against a [`NoteStore`], and hands the
//! result back to [`SyncEngine::apply`], which merges it into the document.
//! Failures are logged and leave local state untouched; only an unauthorized
//! answer is reported as a distinct status.

use super::debounce::Debouncer;
use crate::api::{ApiError, ApiResult, NoteStore};
use crate::editor::document::DocumentModel;
use crate::models::{Block, BlockKey, BlockRecord, NoteRecord};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use strum::{Display, EnumString};

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum SyncStrategy {
    /// Submit the whole block sequence; the response is authoritative.
    #[default]
    Bulk,
    /// Create/edit/delete individual text blocks.
    PerField,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SyncConfig {
    pub strategy: SyncStrategy,
    pub content_debounce_ms: i64,
    pub title_debounce_ms: i64,
}

impl SyncConfig {
    pub const CONTENT_DEBOUNCE_MS: i64 = 300;
    pub const TITLE_DEBOUNCE_MS: i64 = 500;

    pub fn new(strategy: SyncStrategy) -> Self {
        Self {
            strategy,
            content_debounce_ms: Self::CONTENT_DEBOUNCE_MS,
            title_debounce_ms: Self::TITLE_DEBOUNCE_MS,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(SyncStrategy::default())
    }
}

/// Debounce field identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum FieldKey {
    Title,
    Block(BlockKey),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum SyncOp {
    Bulk {
        note_id: String,
        /// Document version the records were taken from.
        version: u64,
        blocks: Vec<BlockRecord>,
    },
    CreateText {
        note_id: String,
        key: BlockKey,
        content: String,
        position: usize,
    },
    EditText {
        note_id: String,
        key: BlockKey,
        id: String,
        content: String,
        position: usize,
    },
    DeleteText {
        note_id: String,
        id: String,
    },
    EditTitle {
        note_id: String,
        title: String,
    },
}

impl SyncOp {
    pub fn name(&self) -> &'static str {
        match self {
            SyncOp::Bulk { .. } => "bulk",
            SyncOp::CreateText { .. } => "create_text",
            SyncOp::EditText { .. } => "edit_text",
            SyncOp::DeleteText { .. } => "delete_text",
            SyncOp::EditTitle { .. } => "edit_title",
        }
    }
}

/// Successful answer of the remote store to a [`SyncOp`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum SyncReply {
    Blocks(Vec<BlockRecord>),
    Created(String),
    Done,
    Note(NoteRecord),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SkipReason {
    /// The block the op targeted was removed locally meanwhile.
    BlockGone,
    /// The reply does not belong to the op.
    UnexpectedReply,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum SyncStatus {
    Applied,
    Skipped(SkipReason),
    Failed(ApiError),
    Unauthorized,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SyncOutcome {
    pub status: SyncStatus,
    /// Ops that became possible only after this result (e.g. an edit that
    /// waited for its block's id).
    pub follow_up: Vec<SyncOp>,
}

impl SyncOutcome {
    fn status(status: SyncStatus) -> Self {
        Self {
            status,
            follow_up: vec![],
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct SyncEngine {
    config: SyncConfig,
    debouncer: Debouncer<FieldKey, String>,
    last_synced: BTreeMap<FieldKey, String>,
    /// Per-field creates in flight.
    awaiting_id: BTreeSet<BlockKey>,
    /// Blocks edited while their create was in flight.
    dirty_after_create: BTreeSet<BlockKey>,
    /// Blocks deleted while their create was in flight.
    deleted_before_id: BTreeSet<BlockKey>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            debouncer: Debouncer::new(),
            last_synced: BTreeMap::new(),
            awaiting_id: BTreeSet::new(),
            dirty_after_create: BTreeSet::new(),
            deleted_before_id: BTreeSet::new(),
        }
    }

    /// Records the current document as the last synced state of every field.
    pub fn seed(&mut self, doc: &DocumentModel) {
        self.debouncer.clear();
        self.last_synced.clear();
        self.awaiting_id.clear();
        self.dirty_after_create.clear();
        self.deleted_before_id.clear();
        self.last_synced.insert(FieldKey::Title, doc.title().to_string());
        self.seed_blocks(doc);
    }

    pub fn last_synced(&self, field: FieldKey) -> Option<&str> {
        self.last_synced.get(&field).map(String::as_str)
    }

    pub fn is_pending(&self, field: FieldKey) -> bool {
        self.debouncer.is_pending(&field)
    }

    pub fn has_pending(&self) -> bool {
        !self.debouncer.is_empty()
    }

    /// When the next debounced emission becomes due.
    pub fn next_deadline(&self) -> Option<i64> {
        self.debouncer.next_deadline()
    }

    pub fn on_content_changed(&mut self, key: BlockKey, content: &str, now_ms: i64) {
        self.debouncer.schedule(
            FieldKey::Block(key),
            content.to_string(),
            now_ms,
            self.config.content_debounce_ms,
        );
    }

    pub fn on_title_changed(&mut self, title: &str, now_ms: i64) {
        self.debouncer.schedule(
            FieldKey::Title,
            title.to_string(),
            now_ms,
            self.config.title_debounce_ms,
        );
    }

    /// A block was inserted locally. Synchronizes immediately.
    pub fn on_block_inserted(&mut self, doc: &DocumentModel, key: BlockKey) -> Vec<SyncOp> {
        match self.config.strategy {
            SyncStrategy::Bulk => vec![self.bulk(doc)],
            SyncStrategy::PerField => match doc.block_by_key(key) {
                Some(block) if block.variant.is_text() && !block.is_persisted() => {
                    self.create_text(doc, block).into_iter().collect()
                }
                Some(_) => vec![self.bulk(doc)],
                None => {
                    debug!(
                        "event=block_inserted module=note_sync status=not_found key={}",
                        key.0
                    );
                    vec![]
                }
            },
        }
    }

    /// A block was removed locally. `was_text` tells the per-field strategy
    /// whether the text endpoint can delete it.
    pub fn on_block_removed(
        &mut self,
        doc: &DocumentModel,
        key: BlockKey,
        id: Option<&str>,
        was_text: bool,
    ) -> Vec<SyncOp> {
        let field = FieldKey::Block(key);
        self.debouncer.cancel(&field);
        self.last_synced.remove(&field);
        self.dirty_after_create.remove(&key);

        match self.config.strategy {
            SyncStrategy::Bulk => vec![self.bulk(doc)],
            SyncStrategy::PerField => match id {
                Some(id) if was_text => vec![SyncOp::DeleteText {
                    note_id: doc.id().to_string(),
                    id: id.to_string(),
                }],
                Some(_) => vec![self.bulk(doc)],
                None if self.awaiting_id.contains(&key) => {
                    self.deleted_before_id.insert(key);
                    vec![]
                }
                None => vec![],
            },
        }
    }

    /// Reorders and image conversions: always a bulk reconcile, no debounce.
    pub fn on_structural_change(&mut self, doc: &DocumentModel) -> Vec<SyncOp> {
        vec![self.bulk(doc)]
    }

    /// Emits every debounced change whose quiet period has elapsed and whose
    /// value differs from the last synced one.
    pub fn poll_due(&mut self, doc: &DocumentModel, now_ms: i64) -> Vec<SyncOp> {
        let mut ops = vec![];
        let mut bulk_needed = false;

        for (field, value) in self.debouncer.take_due(now_ms) {
            if self.last_synced.get(&field) == Some(&value) {
                debug!("event=debounce module=note_sync status=unchanged field={field:?}");
                continue;
            }

            match field {
                FieldKey::Title => ops.push(SyncOp::EditTitle {
                    note_id: doc.id().to_string(),
                    title: value,
                }),
                FieldKey::Block(key) => {
                    let Some(block) = doc.block_by_key(key) else {
                        debug!(
                            "event=debounce module=note_sync status=not_found key={}",
                            key.0
                        );
                        continue;
                    };
                    match self.config.strategy {
                        SyncStrategy::Bulk => bulk_needed = true,
                        SyncStrategy::PerField => {
                            if let Some(op) = self.edit_text(doc, block) {
                                ops.push(op);
                            }
                        }
                    }
                }
            }
        }

        if bulk_needed {
            ops.push(self.bulk(doc));
        }
        ops
    }

    /// Builds a bulk reconcile of the current sequence. It carries every
    /// block's current content, so pending content emissions are dropped.
    pub fn bulk(&mut self, doc: &DocumentModel) -> SyncOp {
        self.debouncer.retain(|f| *f == FieldKey::Title);

        SyncOp::Bulk {
            note_id: doc.id().to_string(),
            version: doc.version(),
            blocks: doc.to_records(),
        }
    }

    /// Merges the result of `op` into the document.
    pub fn apply(
        &mut self,
        doc: &mut DocumentModel,
        op: &SyncOp,
        result: ApiResult<SyncReply>,
    ) -> SyncOutcome {
        let reply = match result {
            Ok(reply) => reply,
            Err(e) => return self.fail(op, e),
        };

        let outcome = match (op, reply) {
            (SyncOp::Bulk { version, .. }, SyncReply::Blocks(records)) => {
                self.merge_bulk(doc, &records);
                info!(
                    "event=sync module=note_sync status=applied op=bulk sent_version={version} blocks={}",
                    doc.len()
                );
                SyncOutcome::status(SyncStatus::Applied)
            }
            (SyncOp::CreateText { key, content, .. }, SyncReply::Created(id)) => {
                self.apply_created(doc, *key, content, &id)
            }
            (SyncOp::EditText { key, content, .. }, SyncReply::Done) => {
                if doc.block_by_key(*key).is_none() {
                    return SyncOutcome::status(SyncStatus::Skipped(SkipReason::BlockGone));
                }
                self.last_synced.insert(FieldKey::Block(*key), content.clone());
                SyncOutcome::status(SyncStatus::Applied)
            }
            (SyncOp::DeleteText { .. }, SyncReply::Done) => {
                SyncOutcome::status(SyncStatus::Applied)
            }
            (SyncOp::EditTitle { title, .. }, SyncReply::Note(note)) => {
                self.last_synced.insert(FieldKey::Title, title.clone());
                if !note.last_interacted_with.is_empty() {
                    doc.touch(note.last_interacted_with);
                }
                SyncOutcome::status(SyncStatus::Applied)
            }
            (op, reply) => {
                warn!(
                    "event=sync module=note_sync status=skipped reason=unexpected_reply op={} reply={reply:?}",
                    op.name()
                );
                SyncOutcome::status(SyncStatus::Skipped(SkipReason::UnexpectedReply))
            }
        };

        if outcome.status == SyncStatus::Applied {
            debug!("event=sync module=note_sync status=applied op={}", op.name());
        }
        outcome
    }

    fn fail(&mut self, op: &SyncOp, e: ApiError) -> SyncOutcome {
        if let SyncOp::CreateText { key, .. } = op {
            // Allow a later edit to retry the create.
            self.awaiting_id.remove(key);
            self.dirty_after_create.remove(key);
            self.deleted_before_id.remove(key);
        }

        if e.is_unauthorized() {
            error!(
                "event=sync module=note_sync status=unauthorized op={} error={e}",
                op.name()
            );
            SyncOutcome::status(SyncStatus::Unauthorized)
        } else {
            warn!(
                "event=sync module=note_sync status=failed op={} error={e}",
                op.name()
            );
            SyncOutcome::status(SyncStatus::Failed(e))
        }
    }

    fn apply_created(
        &mut self,
        doc: &mut DocumentModel,
        key: BlockKey,
        sent: &str,
        id: &str,
    ) -> SyncOutcome {
        self.awaiting_id.remove(&key);

        if self.deleted_before_id.remove(&key) || doc.block_by_key(key).is_none() {
            debug!(
                "event=sync module=note_sync status=skipped reason=block_gone op=create_text key={} id={id}",
                key.0
            );
            return SyncOutcome {
                status: SyncStatus::Skipped(SkipReason::BlockGone),
                follow_up: vec![SyncOp::DeleteText {
                    note_id: doc.id().to_string(),
                    id: id.to_string(),
                }],
            };
        }

        doc.assign_id(key, id);
        self.last_synced.insert(FieldKey::Block(key), sent.to_string());

        let mut follow_up = vec![];
        if self.dirty_after_create.remove(&key) {
            if let Some(op) = doc.block_by_key(key).and_then(|b| self.edit_text(doc, b)) {
                follow_up.push(op);
            }
        }

        SyncOutcome {
            status: SyncStatus::Applied,
            follow_up,
        }
    }

    /// Response order wins. Returned records are matched to local blocks by
    /// id, then to unacknowledged local blocks at the same position; anything
    /// else becomes a new local block. Local blocks the response omits are
    /// dropped.
    fn merge_bulk(&mut self, doc: &mut DocumentModel, records: &[BlockRecord]) {
        let local = doc.blocks().to_vec();
        let mut claimed = vec![false; local.len()];

        let mut sorted = records.iter().collect::<Vec<_>>();
        sorted.sort_by_key(|r| r.position);

        let mut merged: Vec<Block> = Vec::with_capacity(sorted.len());
        for rec in sorted {
            let by_id = rec.id.as_deref().and_then(|id| {
                local
                    .iter()
                    .enumerate()
                    .position(|(i, b)| !claimed[i] && b.id.as_deref() == Some(id))
            });
            let by_position = || {
                local.iter().enumerate().position(|(i, b)| {
                    !claimed[i] && b.id.is_none() && b.position as i64 == rec.position
                })
            };

            match by_id.or_else(by_position) {
                Some(i) => {
                    claimed[i] = true;
                    let mut block = local[i].clone();
                    if block.id.is_none() {
                        block.id = rec.id.clone();
                    }
                    // Content typed after the request went out stays local and
                    // its pending emission still goes out.
                    if !self.debouncer.is_pending(&FieldKey::Block(block.key)) {
                        block.variant = rec.variant();
                    }
                    merged.push(block);
                }
                None => merged.push(Block {
                    id: rec.id.clone(),
                    key: doc.alloc_key(),
                    position: 0,
                    variant: rec.variant(),
                }),
            }
        }

        let dropped = claimed.iter().filter(|c| !**c).count();
        if dropped > 0 {
            debug!("event=merge_bulk module=note_sync status=dropped_local count={dropped}");
        }

        doc.replace_blocks(merged);

        let server_content = records
            .iter()
            .filter_map(|r| Some((r.id.clone()?, r.variant())))
            .collect::<BTreeMap<_, _>>();
        self.seed_blocks(doc);
        // A block whose local content was kept has not been synced yet.
        for b in doc.blocks() {
            let field = FieldKey::Block(b.key);
            if self.debouncer.is_pending(&field) {
                match b.id.as_ref().and_then(|id| server_content.get(id)) {
                    Some(v) => {
                        let synced = v.text_content().unwrap_or_default().to_string();
                        self.last_synced.insert(field, synced);
                    }
                    None => {
                        self.last_synced.remove(&field);
                    }
                }
            }
        }
    }

    fn seed_blocks(&mut self, doc: &DocumentModel) {
        self.last_synced.retain(|f, _| *f == FieldKey::Title);
        for b in doc.blocks() {
            if let Some(content) = b.variant.text_content() {
                self.last_synced
                    .insert(FieldKey::Block(b.key), content.to_string());
            }
        }
    }

    fn create_text(&mut self, doc: &DocumentModel, block: &Block) -> Option<SyncOp> {
        let content = block.variant.text_content()?;
        self.awaiting_id.insert(block.key);
        Some(SyncOp::CreateText {
            note_id: doc.id().to_string(),
            key: block.key,
            content: content.to_string(),
            position: block.position,
        })
    }

    /// Edit for a text block, or its create when the block has no id yet.
    fn edit_text(&mut self, doc: &DocumentModel, block: &Block) -> Option<SyncOp> {
        let content = block.variant.text_content()?;
        match &block.id {
            Some(id) => Some(SyncOp::EditText {
                note_id: doc.id().to_string(),
                key: block.key,
                id: id.clone(),
                content: content.to_string(),
                position: block.position,
            }),
            None if self.awaiting_id.contains(&block.key) => {
                self.dirty_after_create.insert(block.key);
                None
            }
            None => self.create_text(doc, block),
        }
    }
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}

/// Runs one op against the remote store.
pub(crate) async fn execute<S: NoteStore>(store: &S, op: &SyncOp) -> ApiResult<SyncReply> {
    match op {
        SyncOp::Bulk {
            note_id, blocks, ..
        } => store.sync_blocks(note_id, blocks).await.map(SyncReply::Blocks),
        SyncOp::CreateText {
            note_id,
            content,
            position,
            ..
        } => store
            .create_text_block(note_id, content, *position)
            .await
            .map(SyncReply::Created),
        SyncOp::EditText {
            note_id,
            id,
            content,
            position,
            ..
        } => store
            .edit_text_block(note_id, id, content, *position)
            .await
            .map(|_| SyncReply::Done),
        SyncOp::DeleteText { note_id, id } => store
            .delete_text_block(note_id, id)
            .await
            .map(|_| SyncReply::Done),
        SyncOp::EditTitle { note_id, title } => {
            store.edit_title(note_id, title).await.map(SyncReply::Note)
        }
    }
}
