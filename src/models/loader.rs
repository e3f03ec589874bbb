//! Weight loading: from a checkpoint's name-to-tensor mapping into the
//! assembled modules.
//!
//! Checkpoint parameter names are preserved exactly through export, so the
//! same loading code serves both full checkpoints and reloaded artifacts.
//! Linear weights arrive in the published `[out, in]` layout and are
//! transposed into Burn's `[in, out]` layout at injection time.

use burn::module::{Param, ParamId};
use burn::nn::conv::Conv1d;
use burn::nn::{Embedding, LayerNorm, Linear};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};

use super::config::ModelDimensions;
use super::decoder::TextDecoder;
use super::encoder::AudioEncoder;
use super::layers::attention::{MultiHeadCrossAttention, MultiHeadSelfAttention};
use super::layers::block::FeedForward;
use crate::checkpoint::{WeightMap, WeightTensor};
use crate::error::ExportError;

/// Expected name and shape of every encoder parameter implied by `dims`.
pub fn encoder_parameter_shapes(dims: &ModelDimensions) -> Vec<(String, Vec<usize>)> {
    let state = dims.n_audio_state;
    let mut shapes = vec![
        ("encoder.conv1.weight".into(), vec![state, dims.n_mels, 3]),
        ("encoder.conv1.bias".into(), vec![state]),
        ("encoder.conv2.weight".into(), vec![state, state, 3]),
        ("encoder.conv2.bias".into(), vec![state]),
        (
            "encoder.positional_embedding".into(),
            vec![dims.n_audio_ctx, state],
        ),
    ];
    for i in 0..dims.n_audio_layer {
        shapes.extend(block_parameter_shapes(
            &format!("encoder.blocks.{i}"),
            state,
            false,
        ));
    }
    shapes.push(("encoder.ln_post.weight".into(), vec![state]));
    shapes.push(("encoder.ln_post.bias".into(), vec![state]));
    shapes
}

/// Expected name and shape of every decoder parameter implied by `dims`.
///
/// The causal mask buffer is deliberately absent: it is declared by the
/// decoder but derived from the dimensions record, never loaded.
pub fn decoder_parameter_shapes(dims: &ModelDimensions) -> Vec<(String, Vec<usize>)> {
    let state = dims.n_text_state;
    let mut shapes = vec![
        (
            "decoder.token_embedding.weight".into(),
            vec![dims.n_vocab, state],
        ),
        (
            "decoder.positional_embedding".into(),
            vec![dims.n_text_ctx, state],
        ),
    ];
    for i in 0..dims.n_text_layer {
        shapes.extend(block_parameter_shapes(
            &format!("decoder.blocks.{i}"),
            state,
            true,
        ));
    }
    shapes.push(("decoder.ln.weight".into(), vec![state]));
    shapes.push(("decoder.ln.bias".into(), vec![state]));
    shapes
}

/// The full parameter table for one checkpoint.
pub fn expected_parameter_shapes(dims: &ModelDimensions) -> Vec<(String, Vec<usize>)> {
    let mut shapes = encoder_parameter_shapes(dims);
    shapes.extend(decoder_parameter_shapes(dims));
    shapes
}

fn attention_parameter_shapes(prefix: &str, state: usize) -> Vec<(String, Vec<usize>)> {
    vec![
        (format!("{prefix}.query.weight"), vec![state, state]),
        (format!("{prefix}.query.bias"), vec![state]),
        (format!("{prefix}.key.weight"), vec![state, state]),
        (format!("{prefix}.value.weight"), vec![state, state]),
        (format!("{prefix}.value.bias"), vec![state]),
        (format!("{prefix}.out.weight"), vec![state, state]),
        (format!("{prefix}.out.bias"), vec![state]),
    ]
}

fn block_parameter_shapes(
    prefix: &str,
    state: usize,
    cross: bool,
) -> Vec<(String, Vec<usize>)> {
    let mlp = state * 4;
    let mut shapes = attention_parameter_shapes(&format!("{prefix}.attn"), state);
    shapes.push((format!("{prefix}.attn_ln.weight"), vec![state]));
    shapes.push((format!("{prefix}.attn_ln.bias"), vec![state]));
    if cross {
        shapes.extend(attention_parameter_shapes(
            &format!("{prefix}.cross_attn"),
            state,
        ));
        shapes.push((format!("{prefix}.cross_attn_ln.weight"), vec![state]));
        shapes.push((format!("{prefix}.cross_attn_ln.bias"), vec![state]));
    }
    shapes.push((format!("{prefix}.mlp.0.weight"), vec![mlp, state]));
    shapes.push((format!("{prefix}.mlp.0.bias"), vec![mlp]));
    shapes.push((format!("{prefix}.mlp.2.weight"), vec![state, mlp]));
    shapes.push((format!("{prefix}.mlp.2.bias"), vec![state]));
    shapes.push((format!("{prefix}.mlp_ln.weight"), vec![state]));
    shapes.push((format!("{prefix}.mlp_ln.bias"), vec![state]));
    shapes
}

/// Check a weight mapping against an expected parameter table.
///
/// Every expected parameter must be present with the expected shape, and no
/// unexpected name may appear. Runs before any tensor is built, so a corrupt
/// checkpoint fails without touching device memory.
pub fn validate_weights(
    expected: &[(String, Vec<usize>)],
    weights: &WeightMap,
) -> Result<(), ExportError> {
    for (name, shape) in expected {
        let tensor = weights
            .get(name)
            .ok_or_else(|| ExportError::Schema(format!("missing weight `{name}`")))?;
        if &tensor.shape != shape {
            return Err(ExportError::Shape(format!(
                "weight `{name}`: expected {:?}, got {:?}",
                shape, tensor.shape
            )));
        }
    }

    let known: std::collections::BTreeSet<&str> =
        expected.iter().map(|(name, _)| name.as_str()).collect();
    for name in weights.keys() {
        if !known.contains(name.as_str()) {
            return Err(ExportError::Schema(format!("unexpected parameter `{name}`")));
        }
    }
    Ok(())
}

/// Build the encoder and inject every `encoder.*` weight from the mapping.
pub fn load_encoder<B: Backend>(
    dims: &ModelDimensions,
    weights: &WeightMap,
    device: &B::Device,
) -> Result<AudioEncoder<B>, ExportError> {
    let mut encoder = AudioEncoder::new(dims, device)?;

    load_conv1d(&mut encoder.conv1, weights, "encoder.conv1", device)?;
    load_conv1d(&mut encoder.conv2, weights, "encoder.conv2", device)?;
    encoder.positional_embedding = Param::initialized(
        ParamId::new(),
        tensor2(fetch(weights, "encoder.positional_embedding")?, device),
    );

    for (i, block) in encoder.blocks.iter_mut().enumerate() {
        let prefix = format!("encoder.blocks.{i}");
        load_self_attention(&mut block.attn, weights, &format!("{prefix}.attn"), device)?;
        load_layer_norm(&mut block.attn_ln, weights, &format!("{prefix}.attn_ln"), device)?;
        load_feed_forward(&mut block.mlp, weights, &format!("{prefix}.mlp"), device)?;
        load_layer_norm(&mut block.mlp_ln, weights, &format!("{prefix}.mlp_ln"), device)?;
    }

    load_layer_norm(&mut encoder.ln_post, weights, "encoder.ln_post", device)?;
    Ok(encoder)
}

/// Build the decoder and inject every `decoder.*` weight from the mapping.
/// The causal mask keeps its derived value.
pub fn load_decoder<B: Backend>(
    dims: &ModelDimensions,
    weights: &WeightMap,
    device: &B::Device,
) -> Result<TextDecoder<B>, ExportError> {
    let mut decoder = TextDecoder::new(dims, device)?;

    decoder.token_embedding = Embedding {
        weight: Param::initialized(
            ParamId::new(),
            tensor2(fetch(weights, "decoder.token_embedding.weight")?, device),
        ),
    };
    decoder.positional_embedding = Param::initialized(
        ParamId::new(),
        tensor2(fetch(weights, "decoder.positional_embedding")?, device),
    );

    for (i, block) in decoder.blocks.iter_mut().enumerate() {
        let prefix = format!("decoder.blocks.{i}");
        load_self_attention(&mut block.attn, weights, &format!("{prefix}.attn"), device)?;
        load_layer_norm(&mut block.attn_ln, weights, &format!("{prefix}.attn_ln"), device)?;
        load_cross_attention(
            &mut block.cross_attn,
            weights,
            &format!("{prefix}.cross_attn"),
            device,
        )?;
        load_layer_norm(
            &mut block.cross_attn_ln,
            weights,
            &format!("{prefix}.cross_attn_ln"),
            device,
        )?;
        load_feed_forward(&mut block.mlp, weights, &format!("{prefix}.mlp"), device)?;
        load_layer_norm(&mut block.mlp_ln, weights, &format!("{prefix}.mlp_ln"), device)?;
    }

    load_layer_norm(&mut decoder.ln, weights, "decoder.ln", device)?;
    Ok(decoder)
}

fn fetch<'a>(weights: &'a WeightMap, name: &str) -> Result<&'a WeightTensor, ExportError> {
    weights
        .get(name)
        .ok_or_else(|| ExportError::Schema(format!("missing weight `{name}`")))
}

fn tensor1<B: Backend>(w: &WeightTensor, device: &B::Device) -> Tensor<B, 1> {
    Tensor::from_data(TensorData::new(w.data.clone(), [w.shape[0]]), device)
}

fn tensor2<B: Backend>(w: &WeightTensor, device: &B::Device) -> Tensor<B, 2> {
    Tensor::from_data(
        TensorData::new(w.data.clone(), [w.shape[0], w.shape[1]]),
        device,
    )
}

fn tensor3<B: Backend>(w: &WeightTensor, device: &B::Device) -> Tensor<B, 3> {
    Tensor::from_data(
        TensorData::new(w.data.clone(), [w.shape[0], w.shape[1], w.shape[2]]),
        device,
    )
}

/// Replace a linear layer's weight (and bias when the layer carries one)
/// from the published `[out, in]` layout.
fn load_linear<B: Backend>(
    linear: &mut Linear<B>,
    weights: &WeightMap,
    name: &str,
    device: &B::Device,
) -> Result<(), ExportError> {
    let weight = tensor2(fetch(weights, &format!("{name}.weight"))?, device).transpose();
    linear.weight = Param::initialized(ParamId::new(), weight);
    if linear.bias.is_some() {
        let bias = tensor1(fetch(weights, &format!("{name}.bias"))?, device);
        linear.bias = Some(Param::initialized(ParamId::new(), bias));
    }
    Ok(())
}

fn load_conv1d<B: Backend>(
    conv: &mut Conv1d<B>,
    weights: &WeightMap,
    name: &str,
    device: &B::Device,
) -> Result<(), ExportError> {
    let weight = tensor3(fetch(weights, &format!("{name}.weight"))?, device);
    conv.weight = Param::initialized(ParamId::new(), weight);
    let bias = tensor1(fetch(weights, &format!("{name}.bias"))?, device);
    conv.bias = Some(Param::initialized(ParamId::new(), bias));
    Ok(())
}

fn load_layer_norm<B: Backend>(
    norm: &mut LayerNorm<B>,
    weights: &WeightMap,
    name: &str,
    device: &B::Device,
) -> Result<(), ExportError> {
    norm.gamma = Param::initialized(
        ParamId::new(),
        tensor1(fetch(weights, &format!("{name}.weight"))?, device),
    );
    norm.beta = Param::initialized(
        ParamId::new(),
        tensor1(fetch(weights, &format!("{name}.bias"))?, device),
    );
    Ok(())
}

fn load_self_attention<B: Backend>(
    attn: &mut MultiHeadSelfAttention<B>,
    weights: &WeightMap,
    prefix: &str,
    device: &B::Device,
) -> Result<(), ExportError> {
    load_linear(&mut attn.query, weights, &format!("{prefix}.query"), device)?;
    load_linear(&mut attn.key, weights, &format!("{prefix}.key"), device)?;
    load_linear(&mut attn.value, weights, &format!("{prefix}.value"), device)?;
    load_linear(&mut attn.out, weights, &format!("{prefix}.out"), device)
}

fn load_cross_attention<B: Backend>(
    attn: &mut MultiHeadCrossAttention<B>,
    weights: &WeightMap,
    prefix: &str,
    device: &B::Device,
) -> Result<(), ExportError> {
    load_linear(&mut attn.query, weights, &format!("{prefix}.query"), device)?;
    load_linear(&mut attn.key, weights, &format!("{prefix}.key"), device)?;
    load_linear(&mut attn.value, weights, &format!("{prefix}.value"), device)?;
    load_linear(&mut attn.out, weights, &format!("{prefix}.out"), device)
}

/// Sequential-index names inside `mlp.{0,2}` map onto the expansion and
/// projection layers of the feed-forward sublayer.
fn load_feed_forward<B: Backend>(
    mlp: &mut FeedForward<B>,
    weights: &WeightMap,
    prefix: &str,
    device: &B::Device,
) -> Result<(), ExportError> {
    load_linear(&mut mlp.fc1, weights, &format!("{prefix}.0"), device)?;
    load_linear(&mut mlp.fc2, weights, &format!("{prefix}.2"), device)
}
