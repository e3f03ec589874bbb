//! Model definition: dimensions record, layer primitives, encoder, decoder,
//! assembly, and weight loading.

pub mod config;
pub mod decoder;
pub mod encoder;
pub mod layers;
pub mod loader;
pub mod whisper;

pub use config::ModelDimensions;
pub use decoder::TextDecoder;
pub use encoder::AudioEncoder;
pub use whisper::Whisper;
