//! # whisper-export
//!
//! Converts pretrained Whisper speech-recognition checkpoints into a bundle
//! of deployable, self-contained computation graphs using the Burn framework.
//!
//! ## Pipeline
//!
//! The tool processes exactly one model size per invocation, given two
//! checkpoints of that size:
//!
//! 1. **English-only checkpoint** -> frozen `encoder.en.pt` + `decoder.en.pt`
//! 2. **Multilingual checkpoint** -> frozen `encoder.pt` + `decoder.pt`
//!
//! and compresses all four graphs into one archive named after the
//! multilingual checkpoint. A downstream application picks the English pair
//! for English-to-English transcription and the multilingual pair for
//! everything else (including translation into English) without inspecting
//! model internals.
//!
//! ## Architecture
//!
//! Each checkpoint holds a classic encoder/decoder transformer:
//!
//! - **Audio encoder**: two 1-D convolutions over the mel spectrogram,
//!   sinusoidal positional encoding, pre-norm self-attention blocks.
//! - **Text decoder**: token + learned positional embeddings, pre-norm
//!   blocks with causal self-attention and step-cached cross-attention over
//!   the encoder output, vocabulary projection tied to the token embedding.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use whisper_export::export_pair;
//!
//! let archive = export_pair(
//!     "models/tiny.en.safetensors".as_ref(),
//!     "models/tiny.safetensors".as_ref(),
//!     ".".as_ref(),
//! )?;
//! println!("wrote {}", archive.display());
//! ```

pub mod checkpoint;
pub mod error;
pub mod export;
pub mod models;

pub use checkpoint::{Checkpoint, WeightMap, WeightTensor};
pub use error::ExportError;
pub use export::artifact::{FrozenGraph, GraphComponent};
pub use export::{export_pair, Variant};
pub use models::{ModelDimensions, Whisper};
