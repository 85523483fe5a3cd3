//! # Alinhador de Offsets — Caracteres ↔ Tokens
//!
//! O coração do sistema. Faz a ponte entre anotações em offsets de **caractere**
//! e rótulos por **token** de sub-palavra, nos dois sentidos:
//!
//! - **Ida** ([`Aligner::encode_plus_tagged`]): texto + anotações → `input_ids`,
//!   `attention_mask`, `token_type_ids` e `slot_labels` BIO de comprimento fixo.
//! - **Volta** ([`Aligner::convert_to_entities`]): scores por token + spans →
//!   entidades em offsets de caractere, com tokens adjacentes do mesmo tipo
//!   agrupados.
//!
//! ## Layout da sequência
//!
//! ```text
//! posição:  0      1 .. k          k+1    k+2 .. max_length-1
//! token:    [CLS]  conteúdo        [SEP]  [PAD] ...
//! mask:     1      1               1      0
//! rótulo:   0      BIO             0      0
//! span:     (0,0)  (start,end)     (0,0)  —
//! ```
//!
//! `k` é no máximo `max_length - 2`: o que passar disso é truncado, e anotações
//! que caem inteiras na parte cortada somem sem erro.
//!
//! Cada token pertence a no máximo uma anotação. Duas anotações disjuntas em
//! caracteres que tocam o mesmo token de sub-palavra são rejeitadas.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::NluConfig;
use crate::error::{NluError, Result};
use crate::normalizer::{normalize, NormalizedText};
use crate::tagger::{tokens_to_entities, Entity, EntityAnnotation, Tag, TaggedToken};
use crate::tokenizer::{TokenSpan, WordPieceTokenizer};
use crate::viterbi::{scores_to_probs, viterbi_decode};

/// Entradas do modelo, todas com exatamente `max_length` posições.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encoding {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
    pub token_type_ids: Vec<u32>,
}

impl Encoding {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

/// Saída da ida: entradas do modelo + rótulos BIO densos por posição.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedEncoding {
    #[serde(flatten)]
    pub encoding: Encoding,
    pub slot_labels: Vec<u32>,
}

/// Codificação para inferência: guarda o texto normalizado e os spans das
/// posições reais (especiais + conteúdo, sem padding) para a volta.
#[derive(Debug, Clone)]
pub struct UntaggedEncoding {
    pub text: NormalizedText,
    pub encoding: Encoding,
    pub spans: Vec<TokenSpan>,
}

/// Estratégia para escolher o rótulo de cada token na volta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeStrategy {
    /// **Argmax** por token (empate → menor índice). Tags `I-*` órfãs são
    /// recuperadas no agrupamento.
    #[default]
    Argmax,
    /// **Viterbi** com transições BIO proibidas com `-∞`.
    Viterbi,
}

/// Alinhador bidirecional. Sem estado mutável: pode ser compartilhado entre threads.
#[derive(Debug, Clone)]
pub struct Aligner {
    tokenizer: WordPieceTokenizer,
    config: NluConfig,
}

impl Aligner {
    pub fn new(tokenizer: WordPieceTokenizer, config: NluConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { tokenizer, config })
    }

    pub fn config(&self) -> &NluConfig {
        &self.config
    }

    pub fn tokenizer(&self) -> &WordPieceTokenizer {
        &self.tokenizer
    }

    /// Ida: constrói as entradas e os rótulos BIO de treino.
    ///
    /// As anotações referem-se ao texto **normalizado**. Anotações vazias, fora
    /// do texto, com `type_id` fora de `[1, N]`, sobrepostas ou que disputam um
    /// mesmo token são rejeitadas.
    pub fn encode_plus_tagged(
        &self,
        text: &str,
        entities: &[EntityAnnotation],
        max_length: usize,
    ) -> Result<TaggedEncoding> {
        let text = normalize(text);
        let annotations = validate_annotations(&text, entities, self.config.num_entity_types)?;
        let (encoding, spans) = self.layout(&text, max_length)?;

        let mut slot_labels = vec![0u32; max_length];
        let mut owner: Vec<Option<EntityAnnotation>> = vec![None; max_length];
        let content = content_spans(&spans);
        for ann in &annotations {
            let mut first = true;
            for span in content.iter().filter(|s| s.intersects(ann.start, ann.end)) {
                if let Some(prev) = owner[span.token_index] {
                    return Err(NluError::malformed(format!(
                        "anotações [{}, {}) e [{}, {}) caem no mesmo token [{}, {})",
                        prev.start, prev.end, ann.start, ann.end, span.char_start, span.char_end
                    )));
                }
                owner[span.token_index] = Some(*ann);
                let tag = if first {
                    Tag::Begin(ann.type_id)
                } else {
                    Tag::Inside(ann.type_id)
                };
                slot_labels[span.token_index] = tag.encode();
                first = false;
            }
            if first {
                debug!(start = ann.start, end = ann.end, "anotação fora da janela de tokens descartada");
            }
        }

        Ok(TaggedEncoding {
            encoding,
            slot_labels,
        })
    }

    /// Codificação de inferência com a mesma política de truncamento e padding da ida.
    pub fn encode_plus_untagged(&self, text: &str, max_length: usize) -> Result<UntaggedEncoding> {
        let text = normalize(text);
        let (encoding, spans) = self.layout(&text, max_length)?;
        Ok(UntaggedEncoding {
            text,
            encoding,
            spans,
        })
    }

    /// Volta: scores por posição + spans → entidades (argmax).
    ///
    /// Nunca falha. Linhas ausentes ou de largura errada e rótulos fora do espaço
    /// contam como `O`.
    ///
    /// Pré-condição: `text` é o mesmo texto normalizado usado na tokenização.
    pub fn convert_to_entities(
        &self,
        text: &NormalizedText,
        token_scores: &[Vec<f32>],
        token_spans: &[TokenSpan],
    ) -> Vec<Entity> {
        self.convert_to_entities_with(text, token_scores, token_spans, DecodeStrategy::Argmax)
    }

    pub fn convert_to_entities_with(
        &self,
        text: &NormalizedText,
        token_scores: &[Vec<f32>],
        token_spans: &[TokenSpan],
        strategy: DecodeStrategy,
    ) -> Vec<Entity> {
        let tagged = self.tag_tokens(token_scores, token_spans, strategy);
        tokens_to_entities(&tagged, text)
    }

    /// Decide a tag de cada token de conteúdo (posições especiais são ignoradas).
    pub fn tag_tokens(
        &self,
        token_scores: &[Vec<f32>],
        token_spans: &[TokenSpan],
        strategy: DecodeStrategy,
    ) -> Vec<TaggedToken> {
        let num_types = self.config.num_entity_types;
        let width = self.config.label_space();

        let content: Vec<(TokenSpan, &[f32])> = token_spans
            .iter()
            .enumerate()
            .filter(|(_, span)| !span.is_special())
            .map(|(i, span)| {
                let row = token_scores.get(i).map(Vec::as_slice).unwrap_or(&[]);
                (*span, row)
            })
            .collect();

        let tags: Vec<Tag> = match strategy {
            DecodeStrategy::Argmax => content
                .iter()
                .map(|(_, row)| {
                    let row = &row[..row.len().min(width)];
                    argmax(row)
                        .and_then(|label| Tag::decode(label as u32, num_types))
                        .unwrap_or(Tag::Outside)
                })
                .collect(),
            DecodeStrategy::Viterbi => {
                let rows: Vec<&[f32]> = content.iter().map(|(_, row)| *row).collect();
                viterbi_decode(&rows, num_types).best_sequence
            }
        };

        content
            .into_iter()
            .zip(tags)
            .map(|((span, row), tag)| {
                let probs = scores_to_probs(&row[..row.len().min(width)]);
                let confidence = probs.get(tag.encode() as usize).copied().unwrap_or(0.0);
                TaggedToken {
                    span,
                    tag,
                    confidence,
                }
            })
            .collect()
    }

    /// Tokeniza, trunca, envolve com `[CLS]`/`[SEP]` e completa com `[PAD]`.
    fn layout(&self, text: &NormalizedText, max_length: usize) -> Result<(Encoding, Vec<TokenSpan>)> {
        if max_length < 2 {
            return Err(NluError::InvalidConfig(format!(
                "max_length deve ser >= 2 (recebido {max_length})"
            )));
        }
        let vocab = self.tokenizer.vocab();
        let mut tokens = self.tokenizer.tokenize(text);
        let budget = max_length - 2;
        if tokens.len() > budget {
            debug!(total = tokens.len(), kept = budget, "sequência truncada");
            tokens.truncate(budget);
        }

        let real = tokens.len() + 2;
        let mut input_ids = Vec::with_capacity(max_length);
        let mut spans = Vec::with_capacity(real);

        input_ids.push(vocab.cls_id());
        spans.push(TokenSpan::special(0));
        for (i, token) in tokens.iter().enumerate() {
            input_ids.push(token.id);
            spans.push(TokenSpan::new(i + 1, token.start, token.end));
        }
        input_ids.push(vocab.sep_id());
        spans.push(TokenSpan::special(real - 1));
        input_ids.resize(max_length, vocab.pad_id());

        let mut attention_mask = vec![1u32; real];
        attention_mask.resize(max_length, 0);

        Ok((
            Encoding {
                input_ids,
                attention_mask,
                token_type_ids: vec![0; max_length],
            },
            spans,
        ))
    }
}

fn content_spans(spans: &[TokenSpan]) -> Vec<TokenSpan> {
    spans.iter().filter(|s| !s.is_special()).copied().collect()
}

/// Índice do maior valor; empate fica com o menor índice e `NaN` nunca vence.
pub fn argmax(row: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in row.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Valida as anotações de um texto e devolve-as ordenadas por início.
pub fn validate_annotations(
    text: &NormalizedText,
    entities: &[EntityAnnotation],
    num_entity_types: usize,
) -> Result<Vec<EntityAnnotation>> {
    let len = text.char_len();
    for ann in entities {
        if ann.start >= ann.end {
            return Err(NluError::malformed(format!(
                "span vazio ou invertido [{}, {})",
                ann.start, ann.end
            )));
        }
        if ann.end > len {
            return Err(NluError::malformed(format!(
                "span [{}, {}) passa do fim do texto ({len} caracteres)",
                ann.start, ann.end
            )));
        }
        if ann.type_id == 0 || ann.type_id as usize > num_entity_types {
            return Err(NluError::malformed(format!(
                "type_id {} fora de [1, {num_entity_types}]",
                ann.type_id
            )));
        }
    }

    let mut sorted = entities.to_vec();
    sorted.sort_by_key(|a| (a.start, a.end));
    for w in sorted.windows(2) {
        if w[1].start < w[0].end {
            return Err(NluError::malformed(format!(
                "spans sobrepostos [{}, {}) e [{}, {})",
                w[0].start, w[0].end, w[1].start, w[1].end
            )));
        }
    }
    Ok(sorted)
}
