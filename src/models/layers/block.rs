//! Residual attention blocks for the encoder and decoder stacks.
//!
//! Both variants use pre-normalization: the layer norm is applied before each
//! sublayer and the sublayer output is added back onto the residual stream.

use burn::module::Module;
use burn::nn::{Gelu, LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::attention::{MultiHeadCrossAttention, MultiHeadSelfAttention};
use super::cache::CrossKvCache;

/// Position-wise feed-forward sublayer: expansion to four times the
/// embedding width, GELU, projection back.
#[derive(Module, Debug)]
pub struct FeedForward<B: Backend> {
    pub(crate) fc1: Linear<B>,
    pub(crate) gelu: Gelu,
    pub(crate) fc2: Linear<B>,
}

impl<B: Backend> FeedForward<B> {
    pub fn new(n_state: usize, device: &B::Device) -> Self {
        let n_mlp = n_state * 4;
        Self {
            fc1: LinearConfig::new(n_state, n_mlp).init(device),
            gelu: Gelu::new(),
            fc2: LinearConfig::new(n_mlp, n_state).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        self.fc2.forward(self.gelu.forward(self.fc1.forward(x)))
    }
}

/// Encoder residual block: self-attention then feed-forward.
#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    pub(crate) attn: MultiHeadSelfAttention<B>,
    pub(crate) attn_ln: LayerNorm<B>,
    pub(crate) mlp: FeedForward<B>,
    pub(crate) mlp_ln: LayerNorm<B>,
}

impl<B: Backend> EncoderBlock<B> {
    pub fn new(n_state: usize, n_heads: usize, device: &B::Device) -> Self {
        Self {
            attn: MultiHeadSelfAttention::new(n_state, n_heads, device),
            attn_ln: LayerNormConfig::new(n_state).init(device),
            mlp: FeedForward::new(n_state, device),
            mlp_ln: LayerNormConfig::new(n_state).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = x.clone() + self.attn.forward(self.attn_ln.forward(x), None);
        x.clone() + self.mlp.forward(self.mlp_ln.forward(x))
    }
}

/// Decoder residual block: causal self-attention, cross-attention over the
/// encoder output, then feed-forward.
#[derive(Module, Debug)]
pub struct DecoderBlock<B: Backend> {
    pub(crate) attn: MultiHeadSelfAttention<B>,
    pub(crate) attn_ln: LayerNorm<B>,
    pub(crate) cross_attn: MultiHeadCrossAttention<B>,
    pub(crate) cross_attn_ln: LayerNorm<B>,
    pub(crate) mlp: FeedForward<B>,
    pub(crate) mlp_ln: LayerNorm<B>,
}

impl<B: Backend> DecoderBlock<B> {
    pub fn new(n_state: usize, n_heads: usize, device: &B::Device) -> Self {
        Self {
            attn: MultiHeadSelfAttention::new(n_state, n_heads, device),
            attn_ln: LayerNormConfig::new(n_state).init(device),
            cross_attn: MultiHeadCrossAttention::new(n_state, n_heads, device),
            cross_attn_ln: LayerNormConfig::new(n_state).init(device),
            mlp: FeedForward::new(n_state, device),
            mlp_ln: LayerNormConfig::new(n_state).init(device),
        }
    }

    /// One block step.
    ///
    /// `xa` is the fixed encoder output, `mask` the decoder causal mask, and
    /// `cache` this block's private cross-attention slot for the session.
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        xa: Tensor<B, 3>,
        mask: Tensor<B, 2>,
        step: i64,
        cache: &mut CrossKvCache<B>,
    ) -> Tensor<B, 3> {
        let x = x.clone() + self.attn.forward(self.attn_ln.forward(x), Some(mask));
        let x = x.clone()
            + self
                .cross_attn
                .forward(self.cross_attn_ln.forward(x), xa, step, cache);
        x.clone() + self.mlp.forward(self.mlp_ln.forward(x))
    }
}
