//! # nlu-core — Intenção + Slots para Comandos de Casa Inteligente
//!
//! Este crate implementa o lado determinístico de um sistema de NLU conjunto:
//! dado um comando em japonês ("リビングの照明をつけて"), o modelo prevê uma
//! **intenção** por sentença e um rótulo **BIO** por token de sub-palavra. O
//! trabalho difícil está na fronteira entre offsets de caractere e tokens.
//!
//! ## Arquitetura
//!
//! 1.  **Normalização** ([`normalizer`]): NFKC; todos os offsets se referem ao texto normalizado.
//! 2.  **Tokenização** ([`tokenizer`]): pré-tokenização por classe de script + WordPiece, com spans.
//! 3.  **Alinhamento** ([`aligner`]):
//!     *   **Ida**: anotações de caractere → `slot_labels` BIO de comprimento fixo.
//!     *   **Volta**: scores por token → entidades em offsets de caractere.
//! 4.  **Modelo** ([`model`]): fronteira `forward` com cabeças de intenção e slot.
//! 5.  **Pipeline** ([`pipeline`]): texto → [`Prediction`], com eventos por passo.
//!
//! ## Exemplo de Uso
//!
//! ```rust
//! use std::sync::Arc;
//! use nlu_core::{
//!     Aligner, EmbeddingEncoder, JointBert, NluConfig, NluPipeline, Vocab, WordPieceTokenizer,
//!     normalize,
//! };
//!
//! let config = NluConfig::default();
//! let corpus = normalize("リビングの照明をつけて");
//! let vocab = Arc::new(Vocab::build_from_texts([&corpus], 1));
//!
//! let encoder = EmbeddingEncoder::new(vec![vec![0.0; 4]; vocab.len()]).unwrap();
//! let model = Arc::new(JointBert::untrained(encoder, config.clone()));
//! let aligner = Aligner::new(WordPieceTokenizer::new(vocab), config).unwrap();
//!
//! let pipeline = NluPipeline::new(aligner, model);
//! let prediction = pipeline.analyze("リビングの照明をつけて").unwrap();
//! println!("intent={} entities={:?}", prediction.intent, prediction.entities);
//! ```
//!
//! ## Módulos Principais
//!
//! - [`aligner`]: codificação com rótulos e decodificação de entidades.
//! - [`corpus`] / [`dataset`]: carga, validação, divisão e formatação do corpus de treino.
//! - [`render`]: nomes de intenção/entidade e o bloco de saída do REPL.

pub mod aligner;
pub mod config;
pub mod corpus;
pub mod dataset;
pub mod error;
pub mod model;
pub mod normalizer;
pub mod pipeline;
pub mod render;
pub mod tagger;
pub mod tokenizer;
pub mod viterbi;

pub use aligner::{Aligner, DecodeStrategy, Encoding, TaggedEncoding, UntaggedEncoding};
pub use config::NluConfig;
pub use corpus::{load_corpus, split_dataset, CorpusRecord, DatasetSplit, IndexedRecord};
pub use dataset::{format_dataset, format_split, write_jsonl, FormattedDataset, TrainingExample};
pub use error::{NluError, Result};
pub use model::{EmbeddingEncoder, JointBert, JointModel, ModelOutput, Targets};
pub use normalizer::{normalize, NormalizedText};
pub use pipeline::{NluPipeline, PipelineEvent, Prediction};
pub use tagger::{Entity, EntityAnnotation, Tag, TaggedToken};
pub use tokenizer::{TokenSpan, Vocab, WordPieceTokenizer};
