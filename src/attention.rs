use std::borrow::Borrow;
use tch::{nn, Kind, Tensor};

/// Multi-head scaled dot-product attention.
///
/// Query, key, and value are projected to `d_model`, split into
/// `num_heads` heads of `d_model / num_heads` dimensions, attended
/// independently, then merged through a final output projection.
#[derive(Debug)]
pub struct MultiHeadAttention {
    q_proj: nn::Linear,
    k_proj: nn::Linear,
    v_proj: nn::Linear,
    out_proj: nn::Linear,
    num_heads: i64,
    head_dim: i64,
    scale: f64,
    dropout: f64,
}

impl MultiHeadAttention {
    /// Creates a new MultiHeadAttention layer.
    ///
    /// Args:
    ///   vs: The `nn::Path` owning the projection weights.
    ///   d_model: Input/output dimensionality. Must be divisible by
    ///     `num_heads`.
    ///   num_heads: The number of attention heads.
    ///   dropout: Dropout probability applied to the attention weights.
    pub fn new<'a, P: Borrow<nn::Path<'a>>>(
        vs: P,
        d_model: i64,
        num_heads: i64,
        dropout: f64,
    ) -> Self {
        let vs = vs.borrow();
        if d_model % num_heads != 0 {
            panic!("d_model must be divisible by num_heads");
        }
        let head_dim = d_model / num_heads;

        let q_proj = nn::linear(vs / "q_proj", d_model, d_model, Default::default());
        let k_proj = nn::linear(vs / "k_proj", d_model, d_model, Default::default());
        let v_proj = nn::linear(vs / "v_proj", d_model, d_model, Default::default());
        let out_proj = nn::linear(vs / "out_proj", d_model, d_model, Default::default());

        Self {
            q_proj,
            k_proj,
            v_proj,
            out_proj,
            num_heads,
            head_dim,
            // Scores are divided by sqrt(head_dim) so the softmax does not
            // saturate as the head dimension grows.
            scale: (head_dim as f64).sqrt(),
            dropout,
        }
    }

    /// Performs the attention forward pass.
    ///
    /// Args:
    ///   query: `[batch, q_len, d_model]`.
    ///   key, value: `[batch, k_len, d_model]`. For self-attention these are
    ///     the same tensor as `query`; for cross-attention they come from the
    ///     encoder memory and `k_len` may differ from `q_len`.
    ///   mask: Optional boolean mask, true where attending is allowed. A
    ///     3-dimensional `[batch, q_len, k_len]` mask is broadcast over the
    ///     head axis; a 4-dimensional mask is used as-is.
    ///
    /// Returns:
    ///   `[batch, q_len, d_model]`.
    pub fn forward(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
        train: bool,
    ) -> Tensor {
        let (batch, q_len, d_model) = query.size3().expect("query must have 3 dimensions");
        let k_len = key.size()[1];

        // Project and split into heads:
        // [batch, len, d_model] -> [batch, num_heads, len, head_dim].
        let q = query
            .apply(&self.q_proj)
            .view([batch, q_len, self.num_heads, self.head_dim])
            .transpose(1, 2);
        let k = key
            .apply(&self.k_proj)
            .view([batch, k_len, self.num_heads, self.head_dim])
            .transpose(1, 2);
        let v = value
            .apply(&self.v_proj)
            .view([batch, k_len, self.num_heads, self.head_dim])
            .transpose(1, 2);

        // Scaled dot-product scores: [batch, num_heads, q_len, k_len].
        let mut scores = q.matmul(&k.transpose(-2, -1)) / self.scale;

        if let Some(mask) = mask {
            let mask = if mask.dim() == 3 {
                mask.unsqueeze(1)
            } else {
                mask.shallow_clone()
            };
            // Forbidden positions get a large negative score so their
            // softmax weight vanishes.
            scores = scores.masked_fill(&mask.logical_not(), -1e9);
        }

        let attn = scores
            .softmax(-1, Kind::Float)
            .dropout(self.dropout, train);

        // Merge heads back: [batch, q_len, d_model].
        let out = attn
            .matmul(&v)
            .transpose(1, 2)
            .contiguous()
            .view([batch, q_len, d_model]);

        out.apply(&self.out_proj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::subsequent_mask;
    use tch::{nn::VarStore, Device};

    #[test]
    fn self_attention_preserves_shape() {
        let vs = VarStore::new(Device::Cpu);
        let attn = MultiHeadAttention::new(&vs.root(), 16, 4, 0.1);
        let xs = Tensor::rand(&[2, 5, 16], (Kind::Float, Device::Cpu));
        let out = attn.forward(&xs, &xs, &xs, None, false);
        assert_eq!(out.size(), &[2, 5, 16]);
    }

    #[test]
    fn cross_attention_handles_different_key_length() {
        let vs = VarStore::new(Device::Cpu);
        let attn = MultiHeadAttention::new(&vs.root(), 16, 4, 0.1);
        let query = Tensor::rand(&[2, 3, 16], (Kind::Float, Device::Cpu));
        let memory = Tensor::rand(&[2, 7, 16], (Kind::Float, Device::Cpu));
        let out = attn.forward(&query, &memory, &memory, None, false);
        assert_eq!(out.size(), &[2, 3, 16]);
    }

    #[test]
    fn causal_mask_blocks_future_positions() {
        let vs = VarStore::new(Device::Cpu);
        let attn = MultiHeadAttention::new(&vs.root(), 8, 2, 0.0);
        let xs = Tensor::rand(&[1, 4, 8], (Kind::Float, Device::Cpu));
        let mask = subsequent_mask(4, Device::Cpu);

        // The first position can only attend to itself, so changing later
        // positions must not change its output.
        let out_a = attn.forward(&xs, &xs, &xs, Some(&mask), false);
        let perturbed = xs.copy();
        perturbed
            .narrow(1, 2, 2)
            .copy_(&Tensor::rand(&[1, 2, 8], (Kind::Float, Device::Cpu)));
        let out_b = attn.forward(&perturbed, &perturbed, &perturbed, Some(&mask), false);

        let first_a = out_a.select(1, 0);
        let first_b = out_b.select(1, 0);
        assert!((first_a - first_b).abs().max().double_value(&[]) < 1e-5);
    }

    #[test]
    fn eval_mode_is_deterministic() {
        let vs = VarStore::new(Device::Cpu);
        let attn = MultiHeadAttention::new(&vs.root(), 16, 4, 0.5);
        let xs = Tensor::rand(&[2, 5, 16], (Kind::Float, Device::Cpu));
        let a = attn.forward(&xs, &xs, &xs, None, false);
        let b = attn.forward(&xs, &xs, &xs, None, false);
        assert!((a - b).abs().max().double_value(&[]) < 1e-6);
    }

    #[test]
    #[should_panic(expected = "divisible")]
    fn rejects_indivisible_head_count() {
        let vs = VarStore::new(Device::Cpu);
        let _ = MultiHeadAttention::new(&vs.root(), 10, 3, 0.1);
    }
}
