//! Audio encoder: convolutional front end plus self-attention stack.

use burn::module::{Module, Param, ParamId};
use burn::nn::conv::{Conv1d, Conv1dConfig};
use burn::nn::{Gelu, LayerNorm, LayerNormConfig, PaddingConfig1d};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::config::ModelDimensions;
use super::layers::{sinusoidal_tensor, EncoderBlock};
use crate::error::ExportError;

/// Maps a mel spectrogram [batch, n_mels, time] to the audio context
/// representation [batch, n_audio_ctx, n_audio_state].
///
/// The second convolution has stride 2, so the declared audio context length
/// corresponds to a spectrogram of `2 * n_audio_ctx` frames. The forward pass
/// is branch-free: every call executes the same operation sequence, which is
/// what makes the encoder safe to capture by straight replay.
#[derive(Module, Debug)]
pub struct AudioEncoder<B: Backend> {
    pub(crate) conv1: Conv1d<B>,
    pub(crate) conv2: Conv1d<B>,
    pub(crate) gelu: Gelu,
    /// Sinusoidal positional table [n_audio_ctx, n_audio_state]; derived
    /// from the dimensions record, also present in checkpoints as a buffer.
    pub(crate) positional_embedding: Param<Tensor<B, 2>>,
    pub(crate) blocks: Vec<EncoderBlock<B>>,
    pub(crate) ln_post: LayerNorm<B>,
}

impl<B: Backend> AudioEncoder<B> {
    /// Build the encoder for one dimensions record.
    ///
    /// Validation runs first: a record whose embedding width is not
    /// divisible by the head count never constructs a layer, and no weight
    /// is ever loaded into it.
    pub fn new(dims: &ModelDimensions, device: &B::Device) -> Result<Self, ExportError> {
        dims.validate()?;

        let conv1 = Conv1dConfig::new(dims.n_mels, dims.n_audio_state, 3)
            .with_padding(PaddingConfig1d::Explicit(1))
            .init(device);
        let conv2 = Conv1dConfig::new(dims.n_audio_state, dims.n_audio_state, 3)
            .with_stride(2)
            .with_padding(PaddingConfig1d::Explicit(1))
            .init(device);

        let positional = sinusoidal_tensor(dims.n_audio_ctx, dims.n_audio_state, device);

        let blocks = (0..dims.n_audio_layer)
            .map(|_| EncoderBlock::new(dims.n_audio_state, dims.n_audio_head, device))
            .collect();

        Ok(Self {
            conv1,
            conv2,
            gelu: Gelu::new(),
            positional_embedding: Param::initialized(ParamId::new(), positional),
            blocks,
            ln_post: LayerNormConfig::new(dims.n_audio_state).init(device),
        })
    }

    /// Encode a mel spectrogram [batch, n_mels, 2 * n_audio_ctx].
    pub fn forward(&self, mel: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = self.gelu.forward(self.conv1.forward(mel));
        let x = self.gelu.forward(self.conv2.forward(x));
        let x = x.swap_dims(1, 2);

        let mut x = x + self.positional_embedding.val().unsqueeze::<3>();

        for block in &self.blocks {
            x = block.forward(x);
        }

        self.ln_post.forward(x)
    }
}
