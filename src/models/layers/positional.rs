//! Sinusoidal positional encoding for the audio encoder.

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};

/// Compute the sinusoidal positional table as a row-major `length x width`
/// matrix.
///
/// Row `i` is `sin(angle(i, j))` for `j in 0..width/2` followed by
/// `cos(angle(i, j))` for the same `j`, where
/// `angle(i, j) = i * exp(-j * ln(10000) / (width/2 - 1))`.
///
/// Pure and deterministic; the table depends only on its two arguments. It is
/// added elementwise to the encoder activations, so it has to match the
/// reference closed form to floating-point tolerance.
pub fn sinusoidal_table(length: usize, width: usize) -> Vec<f32> {
    assert!(width >= 4 && width % 2 == 0, "width must be even and >= 4");

    let half = width / 2;
    let log_timescale = (10_000f32).ln() / (half - 1) as f32;

    let mut table = vec![0.0f32; length * width];
    for (pos, row) in table.chunks_exact_mut(width).enumerate() {
        for j in 0..half {
            let angle = pos as f32 * (-log_timescale * j as f32).exp();
            row[j] = angle.sin();
            row[half + j] = angle.cos();
        }
    }
    table
}

/// Build the positional table as a `[length, width]` tensor.
pub fn sinusoidal_tensor<B: Backend>(
    length: usize,
    width: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    let table = sinusoidal_table(length, width);
    Tensor::from_data(TensorData::new(table, [length, width]), device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_zero_is_sin_zero_cos_one() {
        let width = 8;
        let table = sinusoidal_table(4, width);

        let row0 = &table[..width];
        for &s in &row0[..width / 2] {
            assert_eq!(s, 0.0);
        }
        for &c in &row0[width / 2..] {
            assert_eq!(c, 1.0);
        }
    }

    #[test]
    fn test_matches_closed_form() {
        let (length, width) = (16, 10);
        let half = width / 2;
        let table = sinusoidal_table(length, width);

        for pos in 0..length {
            for j in 0..half {
                let angle = pos as f32
                    * (-(j as f32) * (10_000f32).ln() / (half - 1) as f32).exp();
                let row = &table[pos * width..(pos + 1) * width];
                assert!((row[j] - angle.sin()).abs() < 1e-5);
                assert!((row[half + j] - angle.cos()).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_highest_frequency_column_advances_by_one_radian() {
        // Column j=0 has timescale 1, so row i holds sin(i) exactly.
        let table = sinusoidal_table(5, 6);
        for pos in 0..5 {
            assert!((table[pos * 6] - (pos as f32).sin()).abs() < 1e-6);
        }
    }
}
