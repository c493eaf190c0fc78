use std::borrow::Borrow;
use tch::{nn, Device, Kind, Tensor};

/// Token embedding lookup scaled by `sqrt(d_model)`.
///
/// The scaling keeps the embedding magnitudes comparable to the positional
/// encoding that is added right after.
#[derive(Debug)]
pub struct Embeddings {
    lut: nn::Embedding,
    scale: f64,
}

impl Embeddings {
    pub fn new<'a, P: Borrow<nn::Path<'a>>>(vs: P, vocab_size: i64, d_model: i64) -> Self {
        let lut = nn::embedding(vs.borrow() / "lut", vocab_size, d_model, Default::default());
        Self {
            lut,
            scale: (d_model as f64).sqrt(),
        }
    }

    /// Maps token ids of shape `[batch, seq_len]` to scaled vectors of shape
    /// `[batch, seq_len, d_model]`.
    pub fn forward(&self, xs: &Tensor) -> Tensor {
        xs.apply(&self.lut) * self.scale
    }
}

/// Fixed sinusoidal positional encoding.
///
/// A `[max_len, d_model]` table is precomputed once: sine on even columns,
/// cosine on odd columns, with geometrically decreasing frequencies
/// `exp(-(2i / d_model) * ln(10000))`. The table is a constant buffer, not a
/// trainable parameter.
#[derive(Debug)]
pub struct PositionalEncoding {
    pe: Tensor,
    dropout: f64,
}

impl PositionalEncoding {
    /// Creates a new PositionalEncoding table.
    ///
    /// Args:
    ///   d_model: The embedding dimensionality. Must be even, since sine and
    ///     cosine columns are interleaved in pairs.
    ///   dropout: Dropout probability applied after the addition.
    ///   max_len: The longest sequence the table covers.
    ///   device: The device the table lives on.
    pub fn new(d_model: i64, dropout: f64, max_len: i64, device: Device) -> Self {
        if d_model % 2 != 0 {
            panic!("d_model must be even for sinusoidal positional encoding");
        }

        let pe = Tensor::zeros(&[max_len, d_model], (Kind::Float, device));

        // Positions 0..max_len as a column, shape [max_len, 1].
        let position = Tensor::arange(max_len, (Kind::Float, device)).unsqueeze(-1);

        // One frequency per sine/cosine pair, shape [d_model / 2].
        let div_term = (Tensor::arange_start_step(0, d_model, 2, (Kind::Float, device))
            * -(10000f64.ln() / d_model as f64))
            .exp();

        // position [max_len, 1] broadcasts against div_term [d_model / 2],
        // giving the [max_len, d_model / 2] phase matrix for both halves.
        pe.slice(1, 0, d_model, 2)
            .copy_(&(&position * &div_term).sin());
        pe.slice(1, 1, d_model, 2)
            .copy_(&(&position * &div_term).cos());

        Self { pe, dropout }
    }

    /// Adds the encoding for the first `seq_len` positions to `xs` of shape
    /// `[batch, seq_len, d_model]`, then applies dropout when `train` is set.
    pub fn forward(&self, xs: &Tensor, train: bool) -> Tensor {
        let seq_len = xs.size()[1];
        (xs + self.pe.narrow(0, 0, seq_len).unsqueeze(0)).dropout(self.dropout, train)
    }
}

/// Position-free stand-in for [`PositionalEncoding`].
///
/// Applies only the dropout, so a model can be assembled with the same
/// embedding pipeline but no positional information.
#[derive(Debug)]
pub struct NoPositionalEncoding {
    dropout: f64,
}

impl NoPositionalEncoding {
    pub fn new(dropout: f64) -> Self {
        Self { dropout }
    }

    pub fn forward(&self, xs: &Tensor, train: bool) -> Tensor {
        xs.dropout(self.dropout, train)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::nn::VarStore;

    #[test]
    fn embeddings_scale_by_sqrt_d_model() {
        let vs = VarStore::new(Device::Cpu);
        let emb = Embeddings::new(&vs.root(), 10, 16);
        let ids = Tensor::from_slice(&[1i64, 2, 3]).unsqueeze(0);

        let out = emb.forward(&ids);
        assert_eq!(out.size(), &[1, 3, 16]);

        // Dividing out sqrt(d_model) = sqrt(16) must recover the raw lookup.
        let raw = ids.apply(&emb.lut);
        assert!((out / 4.0 - raw).abs().max().double_value(&[]) < 1e-6);
    }

    #[test]
    fn positional_encoding_first_row_is_sin_zero_cos_zero() {
        let enc = PositionalEncoding::new(8, 0.0, 16, Device::Cpu);
        let xs = Tensor::zeros(&[1, 2, 8], (Kind::Float, Device::Cpu));
        let out = enc.forward(&xs, false);

        // Position 0: sin(0) = 0 on even columns, cos(0) = 1 on odd ones.
        for i in 0..4 {
            assert!(out.double_value(&[0, 0, 2 * i]).abs() < 1e-6);
            assert!((out.double_value(&[0, 0, 2 * i + 1]) - 1.0).abs() < 1e-6);
        }
        // Position 1, column 0 has frequency 1: sin(1).
        assert!((out.double_value(&[0, 1, 0]) - 1f64.sin()).abs() < 1e-6);
    }

    #[test]
    fn positional_encoding_truncates_to_sequence_length() {
        let enc = PositionalEncoding::new(4, 0.0, 100, Device::Cpu);
        let xs = Tensor::rand(&[2, 7, 4], (Kind::Float, Device::Cpu));
        assert_eq!(enc.forward(&xs, false).size(), &[2, 7, 4]);
    }

    #[test]
    #[should_panic(expected = "must be even")]
    fn positional_encoding_rejects_odd_d_model() {
        let _ = PositionalEncoding::new(5, 0.0, 16, Device::Cpu);
    }

    #[test]
    fn no_positional_encoding_is_identity_in_eval_mode() {
        let enc = NoPositionalEncoding::new(0.5);
        let xs = Tensor::rand(&[2, 3, 4], (Kind::Float, Device::Cpu));
        let out = enc.forward(&xs, false);
        assert!((&out - &xs).abs().max().double_value(&[]) < 1e-6);
    }
}
