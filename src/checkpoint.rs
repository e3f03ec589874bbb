//! Checkpoint reading.
//!
//! A checkpoint is a safetensors file: the user-metadata header carries the
//! ten dimension fields as decimal strings, and the tensor table maps
//! fully-qualified parameter names to f32 tensors.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use safetensors::tensor::Dtype;
use safetensors::SafeTensors;
use serde::{Deserialize, Serialize};

use crate::error::ExportError;
use crate::models::config::ModelDimensions;

/// A named weight: shape plus row-major f32 data.
///
/// Read-only after load; checkpoint tensors use the published parameter
/// layout (`[out, in]` linear weights, `[out, in, kernel]` convolutions,
/// `[vocab, state]` embeddings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl WeightTensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        debug_assert_eq!(shape.iter().product::<usize>(), data.len());
        Self { shape, data }
    }
}

/// Parameter-name-to-tensor mapping of one checkpoint.
pub type WeightMap = BTreeMap<String, WeightTensor>;

/// One deserialized checkpoint: the dimensions record plus every weight.
#[derive(Debug)]
pub struct Checkpoint {
    pub dims: ModelDimensions,
    pub weights: WeightMap,
}

impl Checkpoint {
    /// Read and parse a checkpoint file.
    ///
    /// Fails with a schema error if the metadata header or any dimension
    /// field is missing, or if a tensor is not f32; the dimensions record is
    /// validated before the weights are converted.
    pub fn open(path: &Path) -> Result<Self, ExportError> {
        let bytes = fs::read(path).map_err(|e| ExportError::io(path, e))?;

        let (_, header) = SafeTensors::read_metadata(&bytes)
            .map_err(|e| ExportError::Schema(format!("unreadable checkpoint header: {e}")))?;
        let metadata = header
            .metadata()
            .as_ref()
            .ok_or_else(|| ExportError::Schema("dimensions record missing from metadata".into()))?;
        let dims = ModelDimensions::from_metadata(metadata)?;
        dims.validate()?;

        let tensors = SafeTensors::deserialize(&bytes)
            .map_err(|e| ExportError::Schema(format!("unreadable checkpoint tensors: {e}")))?;

        let mut weights = WeightMap::new();
        for name in tensors.names() {
            let view = tensors
                .tensor(name)
                .map_err(|e| ExportError::Schema(format!("tensor `{name}`: {e}")))?;
            if view.dtype() != Dtype::F32 {
                return Err(ExportError::Schema(format!(
                    "tensor `{name}` has dtype {:?}, expected F32",
                    view.dtype()
                )));
            }

            let data = view
                .data()
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            weights.insert(
                name.to_string(),
                WeightTensor::new(view.shape().to_vec(), data),
            );
        }

        log::info!(
            "{}: {} weight tensors, vocab {}",
            path.display(),
            weights.len(),
            dims.n_vocab
        );
        Ok(Self { dims, weights })
    }
}
