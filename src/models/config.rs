//! Model hyperparameters shared by the encoder and decoder.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ExportError;

/// The ten integer hyperparameters that fully determine every weight shape
/// and intermediate activation of one checkpoint.
///
/// Constructed once from the checkpoint's metadata and never mutated. Also
/// embedded verbatim in every exported artifact so a consumer can rebuild
/// the module structure without the checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDimensions {
    /// Number of mel-frequency bins expected by the encoder front end.
    pub n_mels: usize,
    /// Vocabulary size.
    pub n_vocab: usize,
    /// Context length (frames) of the encoder output representation.
    pub n_audio_ctx: usize,
    /// Embedding width of each encoder frame.
    pub n_audio_state: usize,
    /// Head count of the encoder self-attention layers.
    pub n_audio_head: usize,
    /// Number of encoder residual blocks.
    pub n_audio_layer: usize,
    /// Maximum token context of the decoder.
    pub n_text_ctx: usize,
    /// Embedding width of each token.
    pub n_text_state: usize,
    /// Head count of the decoder attention layers.
    pub n_text_head: usize,
    /// Number of decoder residual blocks.
    pub n_text_layer: usize,
}

/// Field names as they appear in checkpoint metadata, in declaration order.
pub const DIMENSION_FIELDS: [&str; 10] = [
    "n_mels",
    "n_vocab",
    "n_audio_ctx",
    "n_audio_state",
    "n_audio_head",
    "n_audio_layer",
    "n_text_ctx",
    "n_text_state",
    "n_text_head",
    "n_text_layer",
];

impl ModelDimensions {
    /// Parse the dimensions record from checkpoint metadata.
    ///
    /// Every field is required; a missing or non-integer field is a schema
    /// error naming the offending key.
    pub fn from_metadata(metadata: &HashMap<String, String>) -> Result<Self, ExportError> {
        let field = |name: &str| -> Result<usize, ExportError> {
            let raw = metadata
                .get(name)
                .ok_or_else(|| ExportError::Schema(format!("missing dimension field `{name}`")))?;
            raw.parse::<usize>().map_err(|_| {
                ExportError::Schema(format!("dimension field `{name}` is not an integer: {raw:?}"))
            })
        };

        Ok(Self {
            n_mels: field("n_mels")?,
            n_vocab: field("n_vocab")?,
            n_audio_ctx: field("n_audio_ctx")?,
            n_audio_state: field("n_audio_state")?,
            n_audio_head: field("n_audio_head")?,
            n_audio_layer: field("n_audio_layer")?,
            n_text_ctx: field("n_text_ctx")?,
            n_text_state: field("n_text_state")?,
            n_text_head: field("n_text_head")?,
            n_text_layer: field("n_text_layer")?,
        })
    }

    /// Render the record as checkpoint metadata.
    pub fn to_metadata(&self) -> HashMap<String, String> {
        let values = [
            self.n_mels,
            self.n_vocab,
            self.n_audio_ctx,
            self.n_audio_state,
            self.n_audio_head,
            self.n_audio_layer,
            self.n_text_ctx,
            self.n_text_state,
            self.n_text_head,
            self.n_text_layer,
        ];
        DIMENSION_FIELDS
            .iter()
            .zip(values)
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    /// Check the structural invariants before any weight is touched.
    ///
    /// Embedding width must be even (the sinusoidal table interleaves a
    /// sin half and a cos half) and evenly divisible by the head count for
    /// both the audio and text stacks.
    pub fn validate(&self) -> Result<(), ExportError> {
        let nonzero = [
            ("n_mels", self.n_mels),
            ("n_vocab", self.n_vocab),
            ("n_audio_ctx", self.n_audio_ctx),
            ("n_audio_state", self.n_audio_state),
            ("n_audio_head", self.n_audio_head),
            ("n_audio_layer", self.n_audio_layer),
            ("n_text_ctx", self.n_text_ctx),
            ("n_text_state", self.n_text_state),
            ("n_text_head", self.n_text_head),
            ("n_text_layer", self.n_text_layer),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(ExportError::Shape(format!("`{name}` must be non-zero")));
            }
        }

        if self.n_audio_state % 2 != 0 {
            return Err(ExportError::Shape(format!(
                "n_audio_state ({}) must be even",
                self.n_audio_state
            )));
        }
        if self.n_text_state % 2 != 0 {
            return Err(ExportError::Shape(format!(
                "n_text_state ({}) must be even",
                self.n_text_state
            )));
        }
        if self.n_audio_state % self.n_audio_head != 0 {
            return Err(ExportError::Shape(format!(
                "n_audio_state ({}) not divisible by n_audio_head ({})",
                self.n_audio_state, self.n_audio_head
            )));
        }
        if self.n_text_state % self.n_text_head != 0 {
            return Err(ExportError::Shape(format!(
                "n_text_state ({}) not divisible by n_text_head ({})",
                self.n_text_state, self.n_text_head
            )));
        }
        Ok(())
    }
}
