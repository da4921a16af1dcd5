//! Styled text runs that make up a message's sender and body.

use serde::{Deserialize, Serialize};

/// Structured payload a chunk can link to (clickable in the renderer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChunkLink {
    Player {
        name: String,
        #[serde(default)]
        world_id: u16,
    },
    Item {
        item_id: u32,
        #[serde(default)]
        high_quality: bool,
    },
    Url {
        url: String,
    },
    Status {
        status_id: u32,
    },
    Map {
        territory_id: u32,
        /// Raw map coordinates, as sent by the client.
        raw_x: i32,
        raw_y: i32,
    },
}

/// Visual part of a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChunkKind {
    Text {
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        italic: bool,
        /// RGBA
        #[serde(default, skip_serializing_if = "Option::is_none")]
        foreground: Option<u32>,
        /// RGBA
        #[serde(default, skip_serializing_if = "Option::is_none")]
        glow: Option<u32>,
    },
    Icon {
        icon: u32,
    },
}

/// One styled run of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(flatten)]
    pub kind: ChunkKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<ChunkLink>,
}

impl Chunk {
    /// Plain, unstyled text.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: ChunkKind::Text {
                content: content.into(),
                italic: false,
                foreground: None,
                glow: None,
            },
            link: None,
        }
    }

    pub const fn icon(icon: u32) -> Self {
        Self {
            kind: ChunkKind::Icon { icon },
            link: None,
        }
    }

    /// A player name linking to that player.
    pub fn player(name: impl Into<String>, world_id: u16) -> Self {
        let name = name.into();
        Self {
            kind: ChunkKind::Text {
                content: name.clone(),
                italic: false,
                foreground: None,
                glow: None,
            },
            link: Some(ChunkLink::Player { name, world_id }),
        }
    }

    #[must_use]
    pub fn with_link(mut self, link: ChunkLink) -> Self {
        self.link = Some(link);
        self
    }

    /// Text content, or `None` for icons.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match &self.kind {
            ChunkKind::Text { content, .. } => Some(content),
            ChunkKind::Icon { .. } => None,
        }
    }
}

/// Flatten chunks to plain text, dropping icons and styling.
#[must_use]
pub fn chunks_to_text(chunks: &[Chunk]) -> String {
    chunks.iter().filter_map(Chunk::as_text).collect()
}
