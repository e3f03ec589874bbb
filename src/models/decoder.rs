//! Text decoder: token embedding, decoder block stack, and the weight-tied
//! vocabulary projection.

use burn::module::{Module, Param, ParamId};
use burn::nn::{Embedding, EmbeddingConfig, LayerNorm, LayerNormConfig};
use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Int, Tensor, TensorData};

use super::config::ModelDimensions;
use super::layers::{DecoderBlock, DecoderCaches};
use crate::error::ExportError;

/// Additive causal mask [ctx, ctx]: zero on and below the diagonal, negative
/// infinity strictly above it.
///
/// This buffer is derived, not learned; checkpoints never carry it and it is
/// rebuilt from the dimensions record instead.
pub fn causal_mask<B: Backend>(ctx: usize, device: &B::Device) -> Tensor<B, 2> {
    let mut data = vec![0.0f32; ctx * ctx];
    for i in 0..ctx {
        for j in (i + 1)..ctx {
            data[i * ctx + j] = f32::NEG_INFINITY;
        }
    }
    Tensor::from_data(TensorData::new(data, [ctx, ctx]), device)
}

/// Autoregressive text decoder conditioned on the encoder output.
///
/// The vocabulary projection is the transpose of the token embedding matrix;
/// no separate output matrix exists. The cache-gated conditional inside
/// cross-attention is the one data-dependent branch of the whole model, which
/// is why the decoder cannot be captured by straight replay.
#[derive(Module, Debug)]
pub struct TextDecoder<B: Backend> {
    pub(crate) token_embedding: Embedding<B>,
    /// Learned positional table [n_text_ctx, n_text_state]; the first
    /// `seq_len` rows are added to the token embeddings.
    pub(crate) positional_embedding: Param<Tensor<B, 2>>,
    pub(crate) blocks: Vec<DecoderBlock<B>>,
    pub(crate) ln: LayerNorm<B>,
    pub(crate) mask: Param<Tensor<B, 2>>,
}

impl<B: Backend> TextDecoder<B> {
    /// Build the decoder for one dimensions record. Validates the record
    /// before constructing any layer.
    pub fn new(dims: &ModelDimensions, device: &B::Device) -> Result<Self, ExportError> {
        dims.validate()?;

        let token_embedding = EmbeddingConfig::new(dims.n_vocab, dims.n_text_state).init(device);
        let positional = Tensor::random(
            [dims.n_text_ctx, dims.n_text_state],
            Distribution::Normal(0.0, 0.02),
            device,
        );

        let blocks = (0..dims.n_text_layer)
            .map(|_| DecoderBlock::new(dims.n_text_state, dims.n_text_head, device))
            .collect();

        Ok(Self {
            token_embedding,
            positional_embedding: Param::initialized(ParamId::new(), positional),
            blocks,
            ln: LayerNormConfig::new(dims.n_text_state).init(device),
            mask: Param::initialized(ParamId::new(), causal_mask(dims.n_text_ctx, device)),
        })
    }

    /// Create empty cross-attention cache slots for one decoding session.
    pub fn create_caches(&self) -> DecoderCaches<B> {
        DecoderCaches::new(self.blocks.len())
    }

    /// Run the block stack and final norm, returning hidden states
    /// [batch, seq, n_text_state].
    ///
    /// `tokens` is [batch, seq] token ids, `xa` the fixed encoder output for
    /// the session, `step` the session's step index, and `caches` the
    /// session's cache slots (one per block).
    pub fn forward_hidden(
        &self,
        tokens: Tensor<B, 2, Int>,
        xa: Tensor<B, 3>,
        step: i64,
        caches: &mut DecoderCaches<B>,
    ) -> Tensor<B, 3> {
        let [_, seq] = tokens.dims();
        let state = self.positional_embedding.val().dims()[1];

        let positions = self
            .positional_embedding
            .val()
            .slice([0..seq, 0..state])
            .unsqueeze::<3>();
        let mut x = self.token_embedding.forward(tokens) + positions;

        for (i, block) in self.blocks.iter().enumerate() {
            if let Some(cache) = caches.get_mut(i) {
                x = block.forward(x, xa.clone(), self.mask.val(), step, cache);
            }
        }

        self.ln.forward(x)
    }

    /// Project hidden states to vocabulary logits through the transpose of
    /// the token embedding matrix (weight tying).
    pub fn logits(&self, hidden: Tensor<B, 3>) -> Tensor<B, 3> {
        let embed_t = self.token_embedding.weight.val().transpose();
        hidden.matmul(embed_t.unsqueeze::<3>())
    }

    /// Full decoding step: hidden states then logits [batch, seq, n_vocab].
    pub fn forward(
        &self,
        tokens: Tensor<B, 2, Int>,
        xa: Tensor<B, 3>,
        step: i64,
        caches: &mut DecoderCaches<B>,
    ) -> Tensor<B, 3> {
        let hidden = self.forward_hidden(tokens, xa, step, caches);
        self.logits(hidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;

    type TestBackend = NdArray;

    fn tiny_dims() -> ModelDimensions {
        ModelDimensions {
            n_mels: 6,
            n_vocab: 40,
            n_audio_ctx: 8,
            n_audio_state: 8,
            n_audio_head: 2,
            n_audio_layer: 2,
            n_text_ctx: 12,
            n_text_state: 8,
            n_text_head: 2,
            n_text_layer: 2,
        }
    }

    fn token_ids(ids: Vec<i64>) -> Tensor<TestBackend, 2, Int> {
        let len = ids.len();
        Tensor::from_data(TensorData::new(ids, [1, len]), &Default::default())
    }

    fn random_xa(dims: &ModelDimensions) -> Tensor<TestBackend, 3> {
        Tensor::random(
            [1, dims.n_audio_ctx, dims.n_text_state],
            Distribution::Normal(0.0, 1.0),
            &Default::default(),
        )
    }

    #[test]
    fn test_decoder_logits_shape() {
        let device = Default::default();
        let dims = tiny_dims();
        let decoder = TextDecoder::<TestBackend>::new(&dims, &device).unwrap();
        let mut caches = decoder.create_caches();

        let logits = decoder.forward(token_ids(vec![0, 3, 7, 1]), random_xa(&dims), 0, &mut caches);
        assert_eq!(logits.dims(), [1, 4, dims.n_vocab]);
    }

    #[test]
    fn test_decoder_rejects_indivisible_width() {
        let device = Default::default();
        let mut dims = tiny_dims();
        dims.n_text_head = 3;
        assert!(TextDecoder::<TestBackend>::new(&dims, &device).is_err());
    }

    #[test]
    fn test_logits_are_tied_to_token_embedding() {
        let device = Default::default();
        let dims = tiny_dims();
        let decoder = TextDecoder::<TestBackend>::new(&dims, &device).unwrap();

        let hidden = Tensor::<TestBackend, 3>::random(
            [1, 5, dims.n_text_state],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let logits = decoder.logits(hidden.clone());

        let manual = hidden.matmul(
            decoder
                .token_embedding
                .weight
                .val()
                .transpose()
                .unsqueeze::<3>(),
        );
        assert_eq!(
            logits.to_data().to_vec::<f32>().unwrap(),
            manual.to_data().to_vec::<f32>().unwrap()
        );
    }

    #[test]
    fn test_repeated_step_reuses_cache_and_output() {
        let device = Default::default();
        let dims = tiny_dims();
        let decoder = TextDecoder::<TestBackend>::new(&dims, &device).unwrap();
        let mut caches = decoder.create_caches();

        let xa = random_xa(&dims);
        let first = decoder.forward(token_ids(vec![1, 2, 3]), xa.clone(), 0, &mut caches);
        let second = decoder.forward(token_ids(vec![1, 2, 3]), xa, 0, &mut caches);

        assert_eq!(
            first.to_data().to_vec::<f32>().unwrap(),
            second.to_data().to_vec::<f32>().unwrap()
        );
    }

    #[test]
    fn test_session_reset_invalidates_cache() {
        let device = Default::default();
        let dims = tiny_dims();
        let decoder = TextDecoder::<TestBackend>::new(&dims, &device).unwrap();
        let mut caches = decoder.create_caches();

        decoder.forward(token_ids(vec![1, 2]), random_xa(&dims), 0, &mut caches);
        assert!(caches.get_mut(0).unwrap().is_populated());

        caches.reset();
        for i in 0..dims.n_text_layer {
            assert!(!caches.get_mut(i).unwrap().is_populated());
        }
    }
}
