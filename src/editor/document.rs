//! In-memory document model for the open note.
//!
//! Every structural mutation renumbers positions before returning, so the
//! sequence is always `0..n` and never empty.

use crate::models::{Block, BlockKey, BlockRecord, BlockVariant, Document};
use log::debug;

/// Immutable view of the block sequence at a given version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct DocumentSnapshot {
    pub version: u64,
    pub title: String,
    pub blocks: Vec<Block>,
}

#[derive(Clone, Debug)]
pub(crate) struct DocumentModel {
    doc: Document,
    next_key: u64,
    /// Bumped on every mutation (structural or content).
    version: u64,
}

impl DocumentModel {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let mut m = Self {
            doc: Document {
                id: id.into(),
                title: title.into(),
                blocks: vec![],
                last_interacted_with: String::new(),
            },
            next_key: 1,
            version: 0,
        };
        m.ensure_non_empty();
        m
    }

    /// Builds the model from persisted records, ordered by their position.
    pub fn from_records(
        id: impl Into<String>,
        title: impl Into<String>,
        records: &[BlockRecord],
    ) -> Self {
        let mut m = Self {
            doc: Document {
                id: id.into(),
                title: title.into(),
                blocks: vec![],
                last_interacted_with: String::new(),
            },
            next_key: 1,
            version: 0,
        };

        let mut sorted = records.iter().collect::<Vec<_>>();
        sorted.sort_by_key(|r| r.position);
        for r in sorted {
            let key = m.alloc_key();
            m.doc.blocks.push(Block {
                id: r.id.clone(),
                key,
                position: 0,
                variant: r.variant(),
            });
        }

        m.ensure_non_empty();
        m.renumber();
        m
    }

    pub fn id(&self) -> &str {
        &self.doc.id
    }

    pub fn title(&self) -> &str {
        &self.doc.title
    }

    pub fn blocks(&self) -> &[Block] {
        &self.doc.blocks
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Bumped by every mutation.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.doc.blocks.len()
    }

    pub fn get(&self, index: usize) -> Option<&Block> {
        self.doc.blocks.get(index)
    }

    pub fn index_of_key(&self, key: BlockKey) -> Option<usize> {
        self.doc.blocks.iter().position(|b| b.key == key)
    }

    pub fn index_of_id(&self, id: &str) -> Option<usize> {
        self.doc
            .blocks
            .iter()
            .position(|b| b.id.as_deref() == Some(id))
    }

    pub fn block_by_key(&self, key: BlockKey) -> Option<&Block> {
        self.doc.blocks.iter().find(|b| b.key == key)
    }

    pub fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            version: self.version,
            title: self.doc.title.clone(),
            blocks: self.doc.blocks.clone(),
        }
    }

    pub fn to_records(&self) -> Vec<BlockRecord> {
        self.doc
            .blocks
            .iter()
            .map(|b| b.to_record(&self.doc.id))
            .collect()
    }

    /// Creates a local block (no id) at `at_index`, clamped to `[0, len]`.
    pub fn insert_block(&mut self, at_index: usize, variant: BlockVariant) -> Block {
        let key = self.alloc_key();
        let idx = at_index.min(self.doc.blocks.len());
        self.doc.blocks.insert(
            idx,
            Block {
                id: None,
                key,
                position: idx,
                variant,
            },
        );
        self.renumber();
        self.doc.blocks[idx].clone()
    }

    /// Removes the block with the given persisted id. Unknown ids are a no-op.
    pub fn remove_block(&mut self, id: &str) -> Option<Block> {
        let Some(idx) = self.index_of_id(id) else {
            debug!("event=remove_block module=document status=not_found id={id}");
            return None;
        };
        self.remove_at(idx)
    }

    pub fn remove_by_key(&mut self, key: BlockKey) -> Option<Block> {
        let Some(idx) = self.index_of_key(key) else {
            debug!("event=remove_block module=document status=not_found key={}", key.0);
            return None;
        };
        self.remove_at(idx)
    }

    /// Removes the block at `index`. If the sequence becomes empty an empty
    /// text block is synthesized in its place.
    pub fn remove_at(&mut self, index: usize) -> Option<Block> {
        if index >= self.doc.blocks.len() {
            debug!("event=remove_block module=document status=not_found index={index}");
            return None;
        }
        let removed = self.doc.blocks.remove(index);
        self.ensure_non_empty();
        self.renumber();
        Some(removed)
    }

    /// Array-move: remove at `from`, insert at `to` in the shorter sequence.
    /// Returns false (no-op) when `from` is out of range; `to` is clamped.
    pub fn reorder(&mut self, from: usize, to: usize) -> bool {
        if from >= self.doc.blocks.len() {
            debug!("event=reorder module=document status=not_found from={from}");
            return false;
        }
        let block = self.doc.blocks.remove(from);
        let to = to.min(self.doc.blocks.len());
        self.doc.blocks.insert(to, block);
        self.renumber();
        true
    }

    pub fn rename_title(&mut self, new_title: impl Into<String>) {
        self.doc.title = new_title.into();
        self.version += 1;
    }

    /// Replaces the text of a text block. Returns false for images and unknown keys.
    pub fn set_text(&mut self, key: BlockKey, content: &str) -> bool {
        let Some(block) = self.doc.blocks.iter_mut().find(|b| b.key == key) else {
            return false;
        };
        match &mut block.variant {
            BlockVariant::Text { content: c } => {
                if c != content {
                    *c = content.to_string();
                    self.version += 1;
                }
                true
            }
            BlockVariant::Image { .. } => false,
        }
    }

    /// Converts a block's variant in place, keeping its identity and position.
    pub fn set_variant(&mut self, key: BlockKey, variant: BlockVariant) -> bool {
        let Some(block) = self.doc.blocks.iter_mut().find(|b| b.key == key) else {
            return false;
        };
        block.variant = variant;
        self.version += 1;
        true
    }

    /// Assigns a server id to a local block. An id, once set, never changes.
    pub fn assign_id(&mut self, key: BlockKey, id: &str) -> bool {
        let Some(block) = self.doc.blocks.iter_mut().find(|b| b.key == key) else {
            return false;
        };
        match &block.id {
            Some(existing) if existing != id => {
                debug!(
                    "event=assign_id module=document status=skipped reason=already_assigned key={} id={existing}",
                    key.0
                );
                false
            }
            Some(_) => true,
            None => {
                block.id = Some(id.to_string());
                self.version += 1;
                true
            }
        }
    }

    /// Installs a new block sequence produced by reconciliation.
    pub(crate) fn replace_blocks(&mut self, blocks: Vec<Block>) {
        self.doc.blocks = blocks;
        self.ensure_non_empty();
        self.renumber();
    }

    pub fn touch(&mut self, timestamp: impl Into<String>) {
        self.doc.last_interacted_with = timestamp.into();
    }

    pub(crate) fn alloc_key(&mut self) -> BlockKey {
        let key = BlockKey(self.next_key);
        self.next_key += 1;
        key
    }

    fn ensure_non_empty(&mut self) {
        if self.doc.blocks.is_empty() {
            let key = self.alloc_key();
            self.doc.blocks.push(Block {
                id: None,
                key,
                position: 0,
                variant: BlockVariant::text(""),
            });
        }
    }

    fn renumber(&mut self) {
        for (i, b) in self.doc.blocks.iter_mut().enumerate() {
            b.position = i;
        }
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(m: &DocumentModel) -> Vec<String> {
        m.blocks()
            .iter()
            .map(|b| b.variant.text_content().unwrap_or("<img>").to_string())
            .collect()
    }

    fn positions(m: &DocumentModel) -> Vec<usize> {
        m.blocks().iter().map(|b| b.position).collect()
    }

    fn model_with(contents: &[&str]) -> DocumentModel {
        let mut m = DocumentModel::new("n-1", "Untitled");
        let first = m.blocks()[0].key;
        m.set_text(first, contents[0]);
        for (i, c) in contents.iter().enumerate().skip(1) {
            m.insert_block(i, BlockVariant::text(*c));
        }
        m
    }

    #[test]
    fn test_new_document_has_one_empty_text_block() {
        let m = DocumentModel::new("n-1", "Untitled");
        assert_eq!(m.len(), 1);
        assert!(m.blocks()[0].is_empty_text());
        assert_eq!(m.blocks()[0].id, None);
    }

    #[test]
    fn test_insert_clamps_index_and_renumbers() {
        let mut m = model_with(&["A", "B"]);
        let b = m.insert_block(99, BlockVariant::text("C"));
        assert_eq!(b.position, 2);
        assert_eq!(b.id, None);
        assert_eq!(texts(&m), vec!["A", "B", "C"]);

        m.insert_block(0, BlockVariant::text("Z"));
        assert_eq!(texts(&m), vec!["Z", "A", "B", "C"]);
        assert_eq!(positions(&m), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_remove_unknown_id_is_noop() {
        let mut m = model_with(&["A", "B"]);
        let before = m.snapshot();
        assert!(m.remove_block("missing").is_none());
        assert_eq!(m.blocks(), before.blocks.as_slice());
    }

    #[test]
    fn test_removing_last_block_synthesizes_empty_text() {
        let records = vec![BlockRecord {
            id: Some("c-1".to_string()),
            note_id: None,
            kind: crate::models::BlockRecordType::Text,
            text_node: Some(crate::models::TextNodeRecord {
                id: None,
                content: "only".to_string(),
            }),
            image_node: None,
            position: 0,
        }];
        let mut m = DocumentModel::from_records("n-1", "t", &records);
        assert!(m.remove_block("c-1").is_some());
        assert_eq!(m.len(), 1);
        assert!(m.blocks()[0].is_empty_text());
        assert_eq!(m.blocks()[0].id, None);
        assert_eq!(m.blocks()[0].position, 0);
    }

    #[test]
    fn test_reorder_moves_last_to_front() {
        let mut m = model_with(&["A", "B", "C"]);
        assert!(m.reorder(2, 0));
        assert_eq!(texts(&m), vec!["C", "A", "B"]);
        assert_eq!(positions(&m), vec![0, 1, 2]);
    }

    #[test]
    fn test_reorder_out_of_range_from_is_noop() {
        let mut m = model_with(&["A", "B"]);
        assert!(!m.reorder(5, 0));
        assert_eq!(texts(&m), vec!["A", "B"]);
    }

    #[test]
    fn test_positions_stay_contiguous_over_mixed_mutations() {
        let mut m = model_with(&["A", "B", "C", "D"]);
        m.insert_block(2, BlockVariant::image("x.png"));
        m.remove_at(0);
        m.reorder(3, 1);
        m.insert_block(1, BlockVariant::text(""));
        m.remove_at(4);
        m.reorder(0, 10);

        let n = m.len();
        assert_eq!(positions(&m), (0..n).collect::<Vec<_>>());
    }

    #[test]
    fn test_rename_title_leaves_blocks_alone() {
        let mut m = model_with(&["A"]);
        let blocks = m.blocks().to_vec();
        m.rename_title("Groceries");
        assert_eq!(m.title(), "Groceries");
        assert_eq!(m.blocks(), blocks.as_slice());
    }

    #[test]
    fn test_snapshot_version_advances_on_mutation() {
        let mut m = model_with(&["A"]);
        let v0 = m.snapshot().version;
        m.insert_block(1, BlockVariant::text("B"));
        let v1 = m.snapshot().version;
        assert!(v1 > v0);
        m.rename_title("x");
        assert!(m.snapshot().version > v1);
    }

    #[test]
    fn test_assign_id_is_immutable_once_set() {
        let mut m = model_with(&["A"]);
        let key = m.blocks()[0].key;
        assert!(m.assign_id(key, "c-1"));
        assert!(!m.assign_id(key, "c-2"));
        assert_eq!(m.blocks()[0].id.as_deref(), Some("c-1"));
    }

    #[test]
    fn test_from_records_sorts_by_position() {
        let rec = |id: &str, content: &str, position: i64| BlockRecord {
            id: Some(id.to_string()),
            note_id: None,
            kind: crate::models::BlockRecordType::Text,
            text_node: Some(crate::models::TextNodeRecord {
                id: None,
                content: content.to_string(),
            }),
            image_node: None,
            position,
        };
        let m = DocumentModel::from_records(
            "n-1",
            "t",
            &[rec("b", "second", 1), rec("a", "first", 0)],
        );
        assert_eq!(texts(&m), vec!["first", "second"]);
        assert_eq!(positions(&m), vec![0, 1]);
    }
}
