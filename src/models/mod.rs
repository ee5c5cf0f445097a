use serde::{Deserialize, Serialize};

/// Local identity of a block inside one open document.
///
/// Unlike the persisted `id`, a key exists from the moment a block is created
/// locally, so debounce timers and focus can address blocks the server has
/// not acknowledged yet. Keys are never sent over the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct BlockKey(pub u64);

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum BlockVariant {
    Text { content: String },
    Image { image_path: String },
}

impl BlockVariant {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    pub fn image(image_path: impl Into<String>) -> Self {
        Self::Image {
            image_path: image_path.into(),
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text { .. })
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image { .. })
    }

    pub fn text_content(&self) -> Option<&str> {
        match self {
            Self::Text { content } => Some(content),
            Self::Image { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Block {
    /// Persisted id. `None` while the block exists only locally.
    pub id: Option<String>,
    pub key: BlockKey,
    pub position: usize,
    pub variant: BlockVariant,
}

impl Block {
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    pub fn is_empty_text(&self) -> bool {
        matches!(&self.variant, BlockVariant::Text { content } if content.is_empty())
    }

    /// Caret offset (in chars) at the end of a text block; images have no caret.
    pub fn end_caret(&self) -> Option<usize> {
        self.variant.text_content().map(|c| c.chars().count())
    }

    pub fn to_record(&self, note_id: &str) -> BlockRecord {
        let (kind, text_node, image_node) = match &self.variant {
            BlockVariant::Text { content } => (
                BlockRecordType::Text,
                Some(TextNodeRecord {
                    id: None,
                    content: content.clone(),
                }),
                None,
            ),
            BlockVariant::Image { image_path } => (
                BlockRecordType::Image,
                None,
                Some(ImageNodeRecord {
                    id: None,
                    image_path: image_path.clone(),
                }),
            ),
        };

        BlockRecord {
            id: self.id.clone(),
            note_id: Some(note_id.to_string()),
            kind,
            text_node,
            image_node,
            position: self.position as i64,
        }
    }
}

/// The open note: title plus an ordered block sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Document {
    pub id: String,
    pub title: String,
    pub blocks: Vec<Block>,
    /// ISO-8601 timestamp as the backend stores it.
    pub last_interacted_with: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum BlockRecordType {
    Text,
    Image,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub(crate) struct TextNodeRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub content: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ImageNodeRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub image_path: String,
}

/// One note child as exchanged with the backend.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BlockRecord {
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_id: Option<String>,

    #[serde(rename = "type")]
    pub kind: BlockRecordType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_node: Option<TextNodeRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_node: Option<ImageNodeRecord>,

    #[serde(default)]
    pub position: i64,
}

impl BlockRecord {
    /// Variant carried by this record. A record typed `image` without an image
    /// node (or with an empty path) is still mid-upload and reads as text.
    pub fn variant(&self) -> BlockVariant {
        match self.kind {
            BlockRecordType::Image => match &self.image_node {
                Some(img) if !img.image_path.is_empty() => BlockVariant::image(&img.image_path),
                _ => BlockVariant::text(""),
            },
            BlockRecordType::Text => BlockVariant::text(
                self.text_node
                    .as_ref()
                    .map(|t| t.content.clone())
                    .unwrap_or_default(),
            ),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NoteRecord {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub last_interacted_with: String,
}
