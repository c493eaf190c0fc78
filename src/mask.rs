use tch::{Device, Kind, Tensor};

/// Causal mask hiding positions after each query position.
///
/// Returns a boolean tensor of shape `[1, size, size]` where entry
/// `(q, k)` is true iff `k <= q`, so row `q` allows attending to the first
/// `q + 1` positions.
pub fn subsequent_mask(size: i64, device: Device) -> Tensor {
    Tensor::ones(&[size, size], (Kind::Uint8, device))
        .triu(1)
        .eq(0)
        .unsqueeze(0)
}

/// Marks non-padding positions in a `[batch, len]` token tensor.
///
/// Returns a boolean `[batch, 1, len]` tensor, true where the token differs
/// from `pad`, shaped to broadcast over the query axis of attention scores.
pub fn padding_mask(tokens: &Tensor, pad: i64) -> Tensor {
    tokens.ne(pad).unsqueeze(-2)
}

/// Decoder self-attention mask: padding mask AND causal mask.
///
/// Returns `[batch, len, len]`, true where a position may attend both
/// backwards in time and to a non-padding key.
pub fn target_mask(tokens: &Tensor, pad: i64) -> Tensor {
    let (_batch, len) = tokens
        .size2()
        .expect("token tensor must have shape [batch, len]");
    padding_mask(tokens, pad).logical_and(&subsequent_mask(len, tokens.device()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subsequent_mask_is_lower_triangular() {
        let mask = subsequent_mask(4, Device::Cpu);
        assert_eq!(mask.size(), &[1, 4, 4]);

        // Row q allows exactly q + 1 key positions.
        for q in 0..4 {
            let row_sum = mask.select(0, 0).select(0, q).sum(Kind::Int64);
            assert_eq!(row_sum.int64_value(&[]), q + 1);
        }
        // The future is hidden, the past is visible.
        assert_eq!(mask.int64_value(&[0, 0, 1]), 0);
        assert_eq!(mask.int64_value(&[0, 3, 0]), 1);
    }

    #[test]
    fn subsequent_mask_of_one_is_true() {
        let mask = subsequent_mask(1, Device::Cpu);
        assert_eq!(mask.size(), &[1, 1, 1]);
        assert_eq!(mask.int64_value(&[0, 0, 0]), 1);
    }

    #[test]
    fn padding_mask_hides_pad_tokens() {
        let tokens = Tensor::from_slice(&[5i64, 2, 0]).unsqueeze(0);
        let mask = padding_mask(&tokens, 0);
        assert_eq!(mask.size(), &[1, 1, 3]);
        assert_eq!(mask.int64_value(&[0, 0, 0]), 1);
        assert_eq!(mask.int64_value(&[0, 0, 2]), 0);
    }

    #[test]
    fn target_mask_combines_padding_and_causality() {
        let tokens = Tensor::from_slice(&[5i64, 2, 0]).unsqueeze(0);
        let mask = target_mask(&tokens, 0);
        assert_eq!(mask.size(), &[1, 3, 3]);

        // Future position: hidden even though the token is real.
        assert_eq!(mask.int64_value(&[0, 0, 1]), 0);
        // Past non-pad position: visible.
        assert_eq!(mask.int64_value(&[0, 1, 0]), 1);
        // Pad key: hidden even from later queries.
        assert_eq!(mask.int64_value(&[0, 2, 2]), 0);
    }
}
