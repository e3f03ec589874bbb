//! Frozen graph artifacts.
//!
//! An artifact is one exported computation graph: the component tag, the
//! dimensions record, and the component's weights under their original
//! fully-qualified names. Weights are embedded at their final values and the
//! file carries no gradient or training state, so loading an artifact yields
//! an immutable, standalone module. Serialized as gzipped bincode.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::checkpoint::WeightMap;
use crate::error::ExportError;
use crate::models::config::ModelDimensions;
use crate::models::{loader, AudioEncoder, TextDecoder};
use burn::tensor::backend::Backend;

/// Which half of the model an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphComponent {
    Encoder,
    Decoder,
}

impl GraphComponent {
    /// Prefix of this component's parameter names.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Encoder => "encoder.",
            Self::Decoder => "decoder.",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Encoder => "audio encoder",
            Self::Decoder => "text decoder",
        }
    }
}

/// One frozen, weights-embedded computation graph.
#[derive(Debug, Serialize, Deserialize)]
pub struct FrozenGraph {
    pub component: GraphComponent,
    pub dims: ModelDimensions,
    pub weights: WeightMap,
}

impl FrozenGraph {
    /// Freeze one component out of a checkpoint's weight mapping.
    ///
    /// Takes every parameter carrying the component's prefix, names
    /// unchanged, so the artifact can be reloaded with the same loader code
    /// that reads checkpoints.
    pub fn freeze(component: GraphComponent, dims: &ModelDimensions, weights: &WeightMap) -> Self {
        let weights = weights
            .iter()
            .filter(|(name, _)| name.starts_with(component.prefix()))
            .map(|(name, tensor)| (name.clone(), tensor.clone()))
            .collect();
        Self {
            component,
            dims: dims.clone(),
            weights,
        }
    }

    /// Write the artifact to `path`.
    pub fn save(&self, path: &Path) -> Result<(), ExportError> {
        let file = File::create(path).map_err(|e| ExportError::io(path, e))?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        bincode::serialize_into(&mut encoder, self).map_err(|e| encode_error(path, e))?;
        encoder
            .finish()
            .map_err(|e| ExportError::io(path, e))?
            .flush()
            .map_err(|e| ExportError::io(path, e))?;
        Ok(())
    }

    /// Read an artifact back from `path`.
    pub fn load(path: &Path) -> Result<Self, ExportError> {
        let file = File::open(path).map_err(|e| ExportError::io(path, e))?;
        Self::from_reader(BufReader::new(file))
    }

    /// Read an artifact from any stream (e.g. an archive entry).
    pub fn from_reader(reader: impl Read) -> Result<Self, ExportError> {
        let decoder = GzDecoder::new(reader);
        bincode::deserialize_from(decoder)
            .map_err(|e| ExportError::Schema(format!("corrupt artifact: {e}")))
    }

    /// Reassemble a runnable encoder from this artifact.
    pub fn assemble_encoder<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<AudioEncoder<B>, ExportError> {
        if self.component != GraphComponent::Encoder {
            return Err(ExportError::Schema(format!(
                "artifact holds a {}, not an audio encoder",
                self.component.name()
            )));
        }
        loader::validate_weights(&loader::encoder_parameter_shapes(&self.dims), &self.weights)?;
        loader::load_encoder(&self.dims, &self.weights, device)
    }

    /// Reassemble a runnable decoder from this artifact.
    pub fn assemble_decoder<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<TextDecoder<B>, ExportError> {
        if self.component != GraphComponent::Decoder {
            return Err(ExportError::Schema(format!(
                "artifact holds a {}, not a text decoder",
                self.component.name()
            )));
        }
        loader::validate_weights(&loader::decoder_parameter_shapes(&self.dims), &self.weights)?;
        loader::load_decoder(&self.dims, &self.weights, device)
    }
}

fn encode_error(path: impl Into<std::path::PathBuf>, e: bincode::Error) -> ExportError {
    ExportError::Io {
        path: path.into(),
        source: std::io::Error::other(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::WeightTensor;

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

    fn synthetic_weights(dims: &ModelDimensions) -> WeightMap {
        loader::expected_parameter_shapes(dims)
            .into_iter()
            .map(|(name, shape)| {
                let len = shape.iter().product();
                let data = (0..len)
                    .map(|i| ((i * 13 + name.len()) % 17) as f32 * 0.02 - 0.16)
                    .collect();
                (name, WeightTensor::new(shape, data))
            })
            .collect()
    }

    #[test]
    fn test_freeze_filters_by_component() {
        let dims = tiny_dims();
        let weights = synthetic_weights(&dims);

        let encoder = FrozenGraph::freeze(GraphComponent::Encoder, &dims, &weights);
        assert!(encoder.weights.keys().all(|k| k.starts_with("encoder.")));
        assert_eq!(
            encoder.weights.len(),
            loader::encoder_parameter_shapes(&dims).len()
        );

        let decoder = FrozenGraph::freeze(GraphComponent::Decoder, &dims, &weights);
        assert!(decoder.weights.keys().all(|k| k.starts_with("decoder.")));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dims = tiny_dims();
        let weights = synthetic_weights(&dims);
        let graph = FrozenGraph::freeze(GraphComponent::Decoder, &dims, &weights);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decoder.pt");
        graph.save(&path).unwrap();

        let loaded = FrozenGraph::load(&path).unwrap();
        assert_eq!(loaded.component, GraphComponent::Decoder);
        assert_eq!(loaded.dims, dims);
        assert_eq!(loaded.weights, graph.weights);
    }

    #[test]
    fn test_assemble_rejects_component_mismatch() {
        let dims = tiny_dims();
        let weights = synthetic_weights(&dims);
        let graph = FrozenGraph::freeze(GraphComponent::Encoder, &dims, &weights);

        let device = Default::default();
        let err = graph
            .assemble_decoder::<burn::backend::ndarray::NdArray>(&device)
            .unwrap_err();
        assert!(matches!(err, ExportError::Schema(_)));
    }
}
