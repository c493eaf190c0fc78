use anyhow::{bail, Result};
use tch::{Kind, Tensor};

use crate::mask::{padding_mask, subsequent_mask};
use crate::model::EncoderDecoder;

/// Greedy autoregressive decoding.
///
/// Encodes the source once, then repeatedly decodes the partial target,
/// takes the most probable token at the newest position, and appends it,
/// until the target is `max_len` tokens long. The whole loop runs under
/// `tch::no_grad`.
///
/// Args:
///   model: The encoder-decoder model to decode with.
///   src: Source token ids, shape `[batch, src_len]`.
///   src_mask: Source attention mask, e.g. from [`padding_mask`].
///   max_len: Total length of the decoded sequence, including the start
///     symbol.
///   start_symbol: Token id seeding every target sequence.
///   pad: Padding token id, masked out of decoder self-attention.
///
/// Returns:
///   Decoded token ids, shape `[batch, max_len]`, starting with
///   `start_symbol` in every row.
pub fn greedy_decode<M: EncoderDecoder>(
    model: &M,
    src: &Tensor,
    src_mask: &Tensor,
    max_len: i64,
    start_symbol: i64,
    pad: i64,
) -> Result<Tensor> {
    if max_len < 1 {
        bail!("max_len must be at least 1, got {}", max_len);
    }
    let (batch, src_len) = src
        .size2()
        .map_err(|_| anyhow::anyhow!("src must have shape [batch, src_len]"))?;
    if src_len == 0 {
        bail!("cannot decode from an empty source");
    }
    let device = src.device();

    Ok(tch::no_grad(|| {
        let memory = model.encode(src, src_mask);

        // Every row starts with the start symbol: [batch, 1].
        let mut ys = Tensor::full(&[batch, 1], start_symbol, (Kind::Int64, device));

        for _ in 0..max_len - 1 {
            let len = ys.size()[1];

            // The decoder may attend backwards in time and only to
            // non-padding tokens it has produced so far.
            let tgt_mask =
                padding_mask(&ys, pad).logical_and(&subsequent_mask(len, device));

            let out = model.decode(&memory, src_mask, &ys, &tgt_mask);

            // Log-probabilities for the newest position only: [batch, vocab].
            let prob = model.generate(&out.select(1, len - 1));
            let next_word = prob.argmax(-1, true);

            ys = Tensor::cat(&[ys, next_word], 1);
        }
        ys
    }))
}
