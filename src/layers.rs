use std::borrow::Borrow;
use tch::{nn, Kind, Tensor};

/// Layer normalization over the last dimension with a learned gain and bias.
///
/// Normalizes with the standard deviation rather than the variance, with
/// `eps` added to the denominator: `gain * (x - mean) / (std + eps) + bias`.
#[derive(Debug)]
pub struct LayerNorm {
    gain: Tensor,
    bias: Tensor,
    eps: f64,
}

impl LayerNorm {
    /// Creates a new LayerNorm over feature vectors of length `size`.
    ///
    /// The gain is initialized to ones and the bias to zeros, both registered
    /// as trainable parameters under `vs`.
    pub fn new<'a, P: Borrow<nn::Path<'a>>>(vs: P, size: i64) -> Self {
        let vs = vs.borrow();
        Self {
            gain: vs.ones("gain", &[size]),
            bias: vs.zeros("bias", &[size]),
            eps: 1e-6,
        }
    }

    pub fn forward(&self, xs: &Tensor) -> Tensor {
        // Statistics are taken over the feature dimension only, so every
        // position in the batch is normalized independently.
        let mean = xs.mean_dim(-1, true, Kind::Float);
        let std = xs.std_dim(-1, true, true);
        &self.gain * ((xs - &mean) / (&std + self.eps)) + &self.bias
    }
}

/// Pre-norm wrapper around an arbitrary sublayer.
///
/// Computes `x + dropout(sublayer(norm(x)))` — the norm is applied first,
/// before the sublayer, rather than after the residual sum. The
/// [`without_residual`](Self::without_residual) constructor drops the
/// residual term and returns `dropout(sublayer(norm(x)))` only.
#[derive(Debug)]
pub struct SublayerConnection {
    norm: LayerNorm,
    dropout: f64,
    residual: bool,
}

impl SublayerConnection {
    /// Creates a residual sublayer wrapper for inputs of feature size `size`.
    pub fn new<'a, P: Borrow<nn::Path<'a>>>(vs: P, size: i64, dropout: f64) -> Self {
        Self {
            norm: LayerNorm::new(vs.borrow() / "norm", size),
            dropout,
            residual: true,
        }
    }

    /// Same normalization and dropout, but the input is not added back.
    pub fn without_residual<'a, P: Borrow<nn::Path<'a>>>(vs: P, size: i64, dropout: f64) -> Self {
        Self {
            norm: LayerNorm::new(vs.borrow() / "norm", size),
            dropout,
            residual: false,
        }
    }

    /// Applies the wrapped `sublayer` to the normalized input.
    ///
    /// The sublayer must preserve the feature size so the residual sum is
    /// well defined. Dropout is active only when `train` is true.
    pub fn forward<F>(&self, xs: &Tensor, sublayer: F, train: bool) -> Tensor
    where
        F: FnOnce(&Tensor) -> Tensor,
    {
        let out = sublayer(&self.norm.forward(xs)).dropout(self.dropout, train);
        if self.residual {
            xs + out
        } else {
            out
        }
    }
}

/// Position-wise feed-forward network: `w_2(dropout(relu(w_1(x))))`.
///
/// The same two linear maps are applied to every position independently,
/// expanding from `d_model` to `d_ff` and back.
#[derive(Debug)]
pub struct PositionwiseFeedForward {
    w_1: nn::Linear,
    w_2: nn::Linear,
    dropout: f64,
}

impl PositionwiseFeedForward {
    pub fn new<'a, P: Borrow<nn::Path<'a>>>(
        vs: P,
        d_model: i64,
        d_ff: i64,
        dropout: f64,
    ) -> Self {
        let vs = vs.borrow();
        let w_1 = nn::linear(vs / "w_1", d_model, d_ff, Default::default());
        let w_2 = nn::linear(vs / "w_2", d_ff, d_model, Default::default());
        Self { w_1, w_2, dropout }
    }

    pub fn forward(&self, xs: &Tensor, train: bool) -> Tensor {
        xs.apply(&self.w_1)
            .relu()
            .dropout(self.dropout, train)
            .apply(&self.w_2)
    }
}
