//! Building blocks for sequence-to-sequence Transformer models on `tch`.
//!
//! The crate provides the individual pieces — layer normalization, residual
//! sublayer wrapping, positional encodings, position-wise feed-forward
//! networks, scaled token embeddings, causal masking, and a greedy decoding
//! loop — together with an encoder-decoder [`model::Transformer`] that shows
//! how they compose. Training, data loading, and tokenization live elsewhere.

pub mod attention;
pub mod embedding;
pub mod generation;
pub mod layers;
pub mod mask;
pub mod model;

pub use attention::MultiHeadAttention;
pub use embedding::{Embeddings, NoPositionalEncoding, PositionalEncoding};
pub use generation::greedy_decode;
pub use layers::{LayerNorm, PositionwiseFeedForward, SublayerConnection};
pub use mask::{padding_mask, subsequent_mask, target_mask};
pub use model::{
    Decoder, DecoderLayer, Encoder, EncoderDecoder, EncoderLayer, Generator, Transformer,
};
