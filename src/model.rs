use std::borrow::Borrow;
use tch::{nn, Kind, Tensor};

use crate::attention::MultiHeadAttention;
use crate::embedding::{Embeddings, PositionalEncoding};
use crate::layers::{LayerNorm, PositionwiseFeedForward, SublayerConnection};

/// Inference seam between a composed encoder-decoder model and the
/// autoregressive decoding loop.
///
/// All three methods run in eval mode: dropout is disabled and no gradients
/// are expected.
pub trait EncoderDecoder {
    /// Encodes the source tokens into a memory tensor.
    fn encode(&self, src: &Tensor, src_mask: &Tensor) -> Tensor;

    /// Decodes target tokens against the encoded memory, returning hidden
    /// states of shape `[batch, tgt_len, d_model]`.
    fn decode(&self, memory: &Tensor, src_mask: &Tensor, tgt: &Tensor, tgt_mask: &Tensor)
        -> Tensor;

    /// Projects hidden states to log-probabilities over the vocabulary.
    fn generate(&self, hidden: &Tensor) -> Tensor;
}

/// Final projection from hidden states to vocabulary log-probabilities.
#[derive(Debug)]
pub struct Generator {
    proj: nn::Linear,
}

impl Generator {
    pub fn new<'a, P: Borrow<nn::Path<'a>>>(vs: P, d_model: i64, vocab_size: i64) -> Self {
        let proj = nn::linear(vs.borrow() / "proj", d_model, vocab_size, Default::default());
        Self { proj }
    }

    pub fn forward(&self, xs: &Tensor) -> Tensor {
        xs.apply(&self.proj).log_softmax(-1, Kind::Float)
    }
}

/// Single encoder layer: self-attention then feed-forward, each wrapped in a
/// residual [`SublayerConnection`].
#[derive(Debug)]
pub struct EncoderLayer {
    self_attn: MultiHeadAttention,
    feed_forward: PositionwiseFeedForward,
    sublayers: [SublayerConnection; 2],
}

impl EncoderLayer {
    pub fn new<'a, P: Borrow<nn::Path<'a>>>(
        vs: P,
        d_model: i64,
        num_heads: i64,
        d_ff: i64,
        dropout: f64,
    ) -> Self {
        let vs = vs.borrow();
        Self {
            self_attn: MultiHeadAttention::new(vs / "self_attn", d_model, num_heads, dropout),
            feed_forward: PositionwiseFeedForward::new(vs / "ff", d_model, d_ff, dropout),
            sublayers: [
                SublayerConnection::new(vs / "sublayer0", d_model, dropout),
                SublayerConnection::new(vs / "sublayer1", d_model, dropout),
            ],
        }
    }

    pub fn forward(&self, xs: &Tensor, mask: &Tensor, train: bool) -> Tensor {
        let xs = self.sublayers[0].forward(
            xs,
            |x| self.self_attn.forward(x, x, x, Some(mask), train),
            train,
        );
        self.sublayers[1].forward(&xs, |x| self.feed_forward.forward(x, train), train)
    }
}

/// Single decoder layer: masked self-attention, cross-attention over the
/// encoder memory, then feed-forward, with a residual wrapper around each.
#[derive(Debug)]
pub struct DecoderLayer {
    self_attn: MultiHeadAttention,
    src_attn: MultiHeadAttention,
    feed_forward: PositionwiseFeedForward,
    sublayers: [SublayerConnection; 3],
}

impl DecoderLayer {
    pub fn new<'a, P: Borrow<nn::Path<'a>>>(
        vs: P,
        d_model: i64,
        num_heads: i64,
        d_ff: i64,
        dropout: f64,
    ) -> Self {
        let vs = vs.borrow();
        Self {
            self_attn: MultiHeadAttention::new(vs / "self_attn", d_model, num_heads, dropout),
            src_attn: MultiHeadAttention::new(vs / "src_attn", d_model, num_heads, dropout),
            feed_forward: PositionwiseFeedForward::new(vs / "ff", d_model, d_ff, dropout),
            sublayers: [
                SublayerConnection::new(vs / "sublayer0", d_model, dropout),
                SublayerConnection::new(vs / "sublayer1", d_model, dropout),
                SublayerConnection::new(vs / "sublayer2", d_model, dropout),
            ],
        }
    }

    pub fn forward(
        &self,
        xs: &Tensor,
        memory: &Tensor,
        src_mask: &Tensor,
        tgt_mask: &Tensor,
        train: bool,
    ) -> Tensor {
        let xs = self.sublayers[0].forward(
            xs,
            |x| self.self_attn.forward(x, x, x, Some(tgt_mask), train),
            train,
        );
        let xs = self.sublayers[1].forward(
            &xs,
            |x| self.src_attn.forward(x, memory, memory, Some(src_mask), train),
            train,
        );
        self.sublayers[2].forward(&xs, |x| self.feed_forward.forward(x, train), train)
    }
}

/// Stack of identical encoder layers followed by a final layer norm.
#[derive(Debug)]
pub struct Encoder {
    layers: Vec<EncoderLayer>,
    norm: LayerNorm,
}

impl Encoder {
    pub fn new<'a, P: Borrow<nn::Path<'a>>>(
        vs: P,
        num_layers: i64,
        d_model: i64,
        num_heads: i64,
        d_ff: i64,
        dropout: f64,
    ) -> Self {
        let vs = vs.borrow();
        // Each layer gets its own parameter namespace, so the stack is N
        // structurally identical but independently trained layers.
        let layers = (0..num_layers)
            .map(|i| {
                EncoderLayer::new(vs / format!("layer{}", i), d_model, num_heads, d_ff, dropout)
            })
            .collect();
        Self {
            layers,
            norm: LayerNorm::new(vs / "norm", d_model),
        }
    }

    pub fn forward(&self, xs: &Tensor, mask: &Tensor, train: bool) -> Tensor {
        let mut xs = xs.shallow_clone();
        for layer in &self.layers {
            xs = layer.forward(&xs, mask, train);
        }
        self.norm.forward(&xs)
    }
}

/// Stack of identical decoder layers followed by a final layer norm.
#[derive(Debug)]
pub struct Decoder {
    layers: Vec<DecoderLayer>,
    norm: LayerNorm,
}

impl Decoder {
    pub fn new<'a, P: Borrow<nn::Path<'a>>>(
        vs: P,
        num_layers: i64,
        d_model: i64,
        num_heads: i64,
        d_ff: i64,
        dropout: f64,
    ) -> Self {
        let vs = vs.borrow();
        let layers = (0..num_layers)
            .map(|i| {
                DecoderLayer::new(vs / format!("layer{}", i), d_model, num_heads, d_ff, dropout)
            })
            .collect();
        Self {
            layers,
            norm: LayerNorm::new(vs / "norm", d_model),
        }
    }

    pub fn forward(
        &self,
        xs: &Tensor,
        memory: &Tensor,
        src_mask: &Tensor,
        tgt_mask: &Tensor,
        train: bool,
    ) -> Tensor {
        let mut xs = xs.shallow_clone();
        for layer in &self.layers {
            xs = layer.forward(&xs, memory, src_mask, tgt_mask, train);
        }
        self.norm.forward(&xs)
    }
}

/// Full encoder-decoder Transformer assembled from the building blocks.
#[derive(Debug)]
pub struct Transformer {
    src_embed: Embeddings,
    tgt_embed: Embeddings,
    pos_enc: PositionalEncoding,
    encoder: Encoder,
    decoder: Decoder,
    generator: Generator,
}

impl Transformer {
    /// Creates a new sequence-to-sequence Transformer.
    ///
    /// Args:
    ///   vs: The `nn::Path` for parameter ownership.
    ///   src_vocab / tgt_vocab: Source and target vocabulary sizes.
    ///   d_model: Embedding and hidden dimensionality.
    ///   num_layers: Number of encoder and decoder layers.
    ///   num_heads: Attention heads per layer.
    ///   d_ff: Inner feed-forward dimensionality.
    ///   max_len: Longest sequence the positional encoding covers.
    ///   dropout: Dropout probability used throughout.
    #[allow(clippy::too_many_arguments)]
    pub fn new<'a, P: Borrow<nn::Path<'a>>>(
        vs: P,
        src_vocab: i64,
        tgt_vocab: i64,
        d_model: i64,
        num_layers: i64,
        num_heads: i64,
        d_ff: i64,
        max_len: i64,
        dropout: f64,
    ) -> Self {
        let vs = vs.borrow();
        Self {
            src_embed: Embeddings::new(vs / "src_embed", src_vocab, d_model),
            tgt_embed: Embeddings::new(vs / "tgt_embed", tgt_vocab, d_model),
            // The sinusoidal table is a fixed buffer, shared by both sides.
            pos_enc: PositionalEncoding::new(d_model, dropout, max_len, vs.device()),
            encoder: Encoder::new(vs / "encoder", num_layers, d_model, num_heads, d_ff, dropout),
            decoder: Decoder::new(vs / "decoder", num_layers, d_model, num_heads, d_ff, dropout),
            generator: Generator::new(vs / "generator", d_model, tgt_vocab),
        }
    }

    /// Encodes source token ids `[batch, src_len]` into memory
    /// `[batch, src_len, d_model]`.
    pub fn encode_t(&self, src: &Tensor, src_mask: &Tensor, train: bool) -> Tensor {
        let xs = self.pos_enc.forward(&self.src_embed.forward(src), train);
        self.encoder.forward(&xs, src_mask, train)
    }

    /// Decodes target token ids against an encoded memory, returning hidden
    /// states `[batch, tgt_len, d_model]`.
    pub fn decode_t(
        &self,
        memory: &Tensor,
        src_mask: &Tensor,
        tgt: &Tensor,
        tgt_mask: &Tensor,
        train: bool,
    ) -> Tensor {
        let xs = self.pos_enc.forward(&self.tgt_embed.forward(tgt), train);
        self.decoder.forward(&xs, memory, src_mask, tgt_mask, train)
    }

    /// Full forward pass: encode the source, decode the target against it.
    ///
    /// Returns decoder hidden states; apply [`Transformer::generator`] to
    /// obtain vocabulary log-probabilities.
    pub fn forward(
        &self,
        src: &Tensor,
        tgt: &Tensor,
        src_mask: &Tensor,
        tgt_mask: &Tensor,
        train: bool,
    ) -> Tensor {
        let memory = self.encode_t(src, src_mask, train);
        self.decode_t(&memory, src_mask, tgt, tgt_mask, train)
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }
}

impl EncoderDecoder for Transformer {
    fn encode(&self, src: &Tensor, src_mask: &Tensor) -> Tensor {
        self.encode_t(src, src_mask, false)
    }

    fn decode(
        &self,
        memory: &Tensor,
        src_mask: &Tensor,
        tgt: &Tensor,
        tgt_mask: &Tensor,
    ) -> Tensor {
        self.decode_t(memory, src_mask, tgt, tgt_mask, false)
    }

    fn generate(&self, hidden: &Tensor) -> Tensor {
        self.generator.forward(hidden)
    }
}
