/*!
 * Unit model shared by both translation algorithms.
 *
 * A `TranslationUnit` is one model-sized chunk of a document. A `UnitResult` is
 * created once per successfully translated unit and never mutated afterwards.
 */

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Kind of payload carried by a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Text,
    Image,
}

/// Payload of a unit: extracted text or an opaque image (PNG/JPEG bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitContent {
    Text(String),
    Image {
        /// Raw image bytes
        data: Bytes,
        /// MIME type, e.g. `image/png`
        media_type: String,
    },
}

/// One translatable chunk of a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationUnit {
    sequence_index: usize,
    content: UnitContent,
}

impl TranslationUnit {
    /// Create a text unit
    pub fn text(sequence_index: usize, text: impl Into<String>) -> Self {
        Self {
            sequence_index,
            content: UnitContent::Text(text.into()),
        }
    }

    /// Create an image unit
    pub fn image(sequence_index: usize, data: impl Into<Bytes>, media_type: impl Into<String>) -> Self {
        Self {
            sequence_index,
            content: UnitContent::Image {
                data: data.into(),
                media_type: media_type.into(),
            },
        }
    }

    pub fn sequence_index(&self) -> usize {
        self.sequence_index
    }

    pub fn content(&self) -> &UnitContent {
        &self.content
    }

    pub fn kind(&self) -> UnitKind {
        match self.content {
            UnitContent::Text(_) => UnitKind::Text,
            UnitContent::Image { .. } => UnitKind::Image,
        }
    }

    /// Source text, if this is a text unit
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            UnitContent::Text(text) => Some(text),
            UnitContent::Image { .. } => None,
        }
    }

    /// Size in characters for text, or bytes for images
    pub fn approximate_size(&self) -> usize {
        match &self.content {
            UnitContent::Text(text) => text.chars().count(),
            UnitContent::Image { data, .. } => data.len(),
        }
    }

    /// Feed the unit's identity into a document fingerprint
    pub(crate) fn hash_into(&self, hasher: &mut Sha256) {
        hasher.update(self.sequence_index.to_le_bytes());
        match &self.content {
            UnitContent::Text(text) => {
                hasher.update(b"text");
                hasher.update(text.as_bytes());
            }
            UnitContent::Image { data, media_type } => {
                hasher.update(b"image");
                hasher.update(media_type.as_bytes());
                hasher.update(data);
            }
        }
    }
}

/// Token usage reported by the provider for one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self { input, output }
    }

    pub fn total(&self) -> u64 {
        self.input + self.output
    }
}

impl std::ops::Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, other: TokenUsage) -> TokenUsage {
        TokenUsage {
            input: self.input + other.input,
            output: self.output + other.output,
        }
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, other: TokenUsage) {
        self.input += other.input;
        self.output += other.output;
    }
}

/// Why the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    Complete,
    Truncated,
    Refused,
}

/// Result of translating one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitResult {
    pub sequence_index: usize,
    pub translated_text: String,
    pub tokens_used: TokenUsage,
    pub model_used: String,
    pub finish_reason: FinishReason,
    /// Payload kind of the source unit
    #[serde(default = "default_unit_kind")]
    pub unit_kind: UnitKind,
}

fn default_unit_kind() -> UnitKind {
    UnitKind::Text
}

impl UnitResult {
    pub fn is_complete(&self) -> bool {
        self.finish_reason == FinishReason::Complete
    }
}

/// How a sliding window relates to its neighbours, in characters of the flat source text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    pub start_offset: usize,
    pub end_offset: usize,
    pub overlap_with_previous: usize,
}

impl WindowSpec {
    pub fn len(&self) -> usize {
        self.end_offset - self.start_offset
    }

    pub fn is_empty(&self) -> bool {
        self.end_offset == self.start_offset
    }
}

/// SHA-256 over every unit, used to match a checkpoint to its document
pub fn fingerprint(units: &[TranslationUnit]) -> String {
    let mut hasher = Sha256::new();
    for unit in units {
        unit.hash_into(&mut hasher);
    }
    format!("{:x}", hasher.finalize())
}
