//! Complete model assembly: encoder and decoder wired from one dimensions
//! record.

use burn::module::Module;
use burn::tensor::backend::Backend;

use super::config::ModelDimensions;
use super::decoder::TextDecoder;
use super::encoder::AudioEncoder;
use super::loader;
use crate::checkpoint::Checkpoint;
use crate::error::ExportError;

/// Vocabulary size that identifies a multilingual checkpoint.
pub const MULTILINGUAL_VOCAB: usize = 51865;

/// Assembled speech-transcription model for one checkpoint.
pub struct Whisper<B: Backend> {
    dims: ModelDimensions,
    encoder: AudioEncoder<B>,
    decoder: TextDecoder<B>,
}

impl<B: Backend> Whisper<B> {
    /// Assemble with randomly initialized weights. Validation happens before
    /// any layer exists.
    pub fn new(dims: ModelDimensions, device: &B::Device) -> Result<Self, ExportError> {
        let encoder = AudioEncoder::new(&dims, device)?;
        let decoder = TextDecoder::new(&dims, device)?;
        Ok(Self {
            dims,
            encoder,
            decoder,
        })
    }

    /// Assemble and load every weight from a checkpoint.
    ///
    /// The full parameter set implied by the dimensions record is checked
    /// for presence and shape first; the decoder causal mask is the one
    /// declared parameter a checkpoint never populates, and it is rebuilt
    /// from the record instead.
    pub fn from_checkpoint(checkpoint: &Checkpoint, device: &B::Device) -> Result<Self, ExportError> {
        let dims = checkpoint.dims.clone();
        loader::validate_weights(&loader::expected_parameter_shapes(&dims), &checkpoint.weights)?;

        let encoder = loader::load_encoder(&dims, &checkpoint.weights, device)?;
        let decoder = loader::load_decoder(&dims, &checkpoint.weights, device)?;
        log::info!(
            "assembled model: {} mels, {} vocab, {}+{} layers, multilingual={}",
            dims.n_mels,
            dims.n_vocab,
            dims.n_audio_layer,
            dims.n_text_layer,
            dims.n_vocab == MULTILINGUAL_VOCAB,
        );

        Ok(Self {
            dims,
            encoder,
            decoder,
        })
    }

    /// Disable gradient bookkeeping on every parameter.
    pub fn no_grad(self) -> Self {
        Self {
            dims: self.dims,
            encoder: self.encoder.no_grad(),
            decoder: self.decoder.no_grad(),
        }
    }

    pub fn dims(&self) -> &ModelDimensions {
        &self.dims
    }

    pub fn encoder(&self) -> &AudioEncoder<B> {
        &self.encoder
    }

    pub fn decoder(&self) -> &TextDecoder<B> {
        &self.decoder
    }

    /// Whether this checkpoint is the multilingual variant.
    pub fn is_multilingual(&self) -> bool {
        self.dims.n_vocab == MULTILINGUAL_VOCAB
    }
}
