//! Export pipeline: checkpoint to frozen graph pair, pair to archive.
//!
//! Each of the two checkpoints (English-only, multilingual) goes through the
//! same run: load, assemble, strip gradients, capture, serialize. The
//! encoder is branch-free and is captured by replaying one representative
//! forward pass; the decoder's cache conditional is exercised on both sides
//! (miss, then hit) before its definition is frozen. The archive is written
//! only after both runs have produced their artifacts.

pub mod artifact;

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::backend::ndarray::NdArray;
use burn::prelude::ElementConversion;
use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Int, Tensor};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::checkpoint::Checkpoint;
use crate::error::ExportError;
use crate::models::Whisper;
use self::artifact::{FrozenGraph, GraphComponent};

/// Which checkpoint a run is exporting. Selects the artifact entry names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    English,
    Multilingual,
}

impl Variant {
    pub fn label(&self) -> &'static str {
        match self {
            Self::English => "English",
            Self::Multilingual => "multilingual",
        }
    }

    /// Archive entry name of the encoder graph.
    pub fn encoder_entry(&self) -> &'static str {
        match self {
            Self::English => "encoder.en.pt",
            Self::Multilingual => "encoder.pt",
        }
    }

    /// Archive entry name of the decoder graph.
    pub fn decoder_entry(&self) -> &'static str {
        match self {
            Self::English => "decoder.en.pt",
            Self::Multilingual => "decoder.pt",
        }
    }
}

/// Export both checkpoints and bundle the four artifacts.
///
/// Returns the archive path (`{multilingual stem}.zip` under `out_dir`).
/// Artifact files written by a successful run may remain on disk when the
/// other run fails; the archive itself is only produced after both succeed.
pub fn export_pair(en_path: &Path, ml_path: &Path, out_dir: &Path) -> Result<PathBuf> {
    let mut files = export_checkpoint(en_path, Variant::English, out_dir)
        .with_context(|| format!("exporting English checkpoint {}", en_path.display()))?;
    files.extend(
        export_checkpoint(ml_path, Variant::Multilingual, out_dir).with_context(|| {
            format!("exporting multilingual checkpoint {}", ml_path.display())
        })?,
    );

    bundle(ml_path, out_dir, &files).context("bundling exported graphs")
}

/// One checkpoint's run: load, assemble, capture, serialize both graphs.
fn export_checkpoint(path: &Path, variant: Variant, out_dir: &Path) -> Result<Vec<PathBuf>> {
    type B = NdArray;
    let device = Default::default();

    log::info!("exporting {} ({})", path.display(), variant.label());

    let checkpoint = Checkpoint::open(path).context("loading checkpoint")?;
    let model =
        Whisper::<B>::from_checkpoint(&checkpoint, &device).context("assembling model")?;
    let model = model.no_grad();

    let encoder_graph =
        capture_encoder(&model, &checkpoint, &device).context("capturing audio encoder")?;
    let decoder_graph =
        capture_decoder(&model, &checkpoint, &device).context("capturing text decoder")?;

    let encoder_path = out_dir.join(variant.encoder_entry());
    encoder_graph
        .save(&encoder_path)
        .context("writing encoder graph")?;
    let decoder_path = out_dir.join(variant.decoder_entry());
    decoder_graph
        .save(&decoder_path)
        .context("writing decoder graph")?;

    log::info!("completed exporting {}", path.display());
    Ok(vec![encoder_path, decoder_path])
}

/// Capture the encoder by straight replay.
///
/// The encoder's forward pass is branch-free, so one execution over a
/// representative input validates the whole graph: a random mel spectrogram
/// of the declared bin count and twice the audio context in frames (3000 for
/// every published checkpoint size). The frozen graph embeds the loaded
/// weights under their checkpoint names.
pub fn capture_encoder<B: Backend>(
    model: &Whisper<B>,
    checkpoint: &Checkpoint,
    device: &B::Device,
) -> Result<FrozenGraph, ExportError> {
    let dims = model.dims();
    let mel = Tensor::<B, 3>::random(
        [1, dims.n_mels, 2 * dims.n_audio_ctx],
        Distribution::Normal(0.0, 1.0),
        device,
    );

    let out = model.encoder().forward(mel);
    let expected = [1, dims.n_audio_ctx, dims.n_audio_state];
    if out.dims() != expected {
        return Err(ExportError::Capture {
            component: "audio encoder",
            reason: format!("replay produced shape {:?}, expected {:?}", out.dims(), expected),
        });
    }

    Ok(FrozenGraph::freeze(
        GraphComponent::Encoder,
        dims,
        &checkpoint.weights,
    ))
}

/// Capture the decoder, preserving its cache conditional.
///
/// The decoder is run twice at step index 0 over representative token ids
/// and encoder output: the first pass takes the cache-miss branch, the
/// second the cache-hit branch. Both must agree exactly before the
/// definition is frozen; a divergence means the conditional would not
/// survive export.
pub fn capture_decoder<B: Backend>(
    model: &Whisper<B>,
    checkpoint: &Checkpoint,
    device: &B::Device,
) -> Result<FrozenGraph, ExportError> {
    let dims = model.dims();
    let n_tokens = dims.n_text_ctx.min(10);

    let tokens = Tensor::<B, 2, Int>::random(
        [1, n_tokens],
        Distribution::Uniform(0.0, dims.n_vocab as f64),
        device,
    );
    let xa = Tensor::<B, 3>::random(
        [1, dims.n_audio_ctx, dims.n_text_state],
        Distribution::Normal(0.0, 1.0),
        device,
    );

    let mut caches = model.decoder().create_caches();
    let miss = model
        .decoder()
        .forward(tokens.clone(), xa.clone(), 0, &mut caches);
    let hit = model.decoder().forward(tokens, xa, 0, &mut caches);

    let expected = [1, n_tokens, dims.n_vocab];
    if miss.dims() != expected {
        return Err(ExportError::Capture {
            component: "text decoder",
            reason: format!(
                "capture produced shape {:?}, expected {:?}",
                miss.dims(),
                expected
            ),
        });
    }

    let divergence: f32 = (miss - hit).abs().max().into_scalar().elem();
    if divergence > 1e-6 {
        return Err(ExportError::Capture {
            component: "text decoder",
            reason: format!("cache-hit branch diverged from cache-miss branch by {divergence}"),
        });
    }

    Ok(FrozenGraph::freeze(
        GraphComponent::Decoder,
        dims,
        &checkpoint.weights,
    ))
}

/// Deflate-compress the four artifact files into `{ml stem}.zip`.
fn bundle(ml_path: &Path, out_dir: &Path, files: &[PathBuf]) -> Result<PathBuf> {
    let stem = ml_path
        .file_stem()
        .context("multilingual checkpoint path has no file stem")?;
    let zip_path = out_dir.join(format!("{}.zip", stem.to_string_lossy()));

    log::info!("compressing {} entries into {}", files.len(), zip_path.display());

    let file = File::create(&zip_path)
        .map_err(|e| ExportError::io(&zip_path, e))
        .context("creating archive")?;
    let mut archive = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for path in files {
        let name = path
            .file_name()
            .with_context(|| format!("artifact path {} has no file name", path.display()))?;
        log::info!("compressing {}", name.to_string_lossy());
        archive.start_file(name.to_string_lossy(), options)?;
        let mut source = File::open(path).map_err(|e| ExportError::io(path, e))?;
        io::copy(&mut source, &mut archive).map_err(|e| ExportError::io(path, e))?;
    }

    archive.finish().context("finalizing archive")?;
    log::info!("wrote {}", zip_path.display());
    Ok(zip_path)
}
