//! Building blocks shared by the encoder and decoder stacks.

pub mod attention;
pub mod block;
pub mod cache;
pub mod positional;

pub use attention::{MultiHeadCrossAttention, MultiHeadSelfAttention};
pub use block::{DecoderBlock, EncoderBlock, FeedForward};
pub use cache::{CrossKvCache, DecoderCaches};
pub use positional::{sinusoidal_table, sinusoidal_tensor};
