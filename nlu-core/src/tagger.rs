//! # Esquema de Rótulos BIO e Entidades
//!
//! Define o esquema de anotação **BIO** (Beginning-Inside-Outside) usado nos
//! slots, a sua codificação densa para o modelo e a máquina de estados que
//! reagrupa tokens rotulados em entidades.
//!
//! ## Codificação densa
//!
//! Com `N` tipos de entidade (`type_id` de 1 a `N`), o espaço de rótulos tem
//! `2N + 1` posições:
//!
//! | Rótulo | Inteiro  |
//! |--------|----------|
//! | `O`    | `0`      |
//! | `B-t`  | `2t - 1` |
//! | `I-t`  | `2t`     |
//!
//! Toda conversão entre as duas formas passa por [`Tag::encode`] / [`Tag::decode`].

use serde::{Deserialize, Serialize};

use crate::normalizer::NormalizedText;
use crate::tokenizer::TokenSpan;

/// Tag BIO aplicada a um token. O `u32` é o `type_id` (1-indexado).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    /// **Begin**: primeiro token de uma entidade. Ex: **照明** (B-2) を…
    Begin(u32),
    /// **Inside**: continuação de uma entidade iniciada antes.
    Inside(u32),
    /// **Outside**: o token não faz parte de nenhuma entidade.
    Outside,
}

impl Tag {
    /// Codifica a tag no inteiro denso usado pelos tensores.
    pub fn encode(&self) -> u32 {
        match self {
            Tag::Outside => 0,
            Tag::Begin(t) => (2 * t).saturating_sub(1),
            Tag::Inside(t) => 2 * t,
        }
    }

    /// Decodifica um rótulo denso; `None` se estiver fora do espaço `2N + 1`.
    pub fn decode(label: u32, num_entity_types: usize) -> Option<Tag> {
        if label == 0 {
            return Some(Tag::Outside);
        }
        let type_id = label.div_ceil(2);
        if type_id as usize > num_entity_types {
            return None;
        }
        if label % 2 == 1 {
            Some(Tag::Begin(type_id))
        } else {
            Some(Tag::Inside(type_id))
        }
    }

    /// Todas as tags em ordem de índice denso (para iteração no Viterbi).
    pub fn all(num_entity_types: usize) -> Vec<Tag> {
        let mut tags = Vec::with_capacity(2 * num_entity_types + 1);
        tags.push(Tag::Outside);
        for t in 1..=num_entity_types as u32 {
            tags.push(Tag::Begin(t));
            tags.push(Tag::Inside(t));
        }
        tags
    }

    /// Representação textual (ex: "B-2", "I-7", "O")
    pub fn label(&self) -> String {
        match self {
            Tag::Begin(t) => format!("B-{t}"),
            Tag::Inside(t) => format!("I-{t}"),
            Tag::Outside => "O".to_string(),
        }
    }

    pub fn type_id(&self) -> Option<u32> {
        match self {
            Tag::Begin(t) | Tag::Inside(t) => Some(*t),
            Tag::Outside => None,
        }
    }

    /// Verifica se a transição `prev → next` é válida no esquema BIO
    ///
    /// Regras:
    /// - `I-t` só pode seguir `B-t` ou `I-t` (mesmo tipo)
    /// - `B-t` e `O` podem seguir qualquer tag
    pub fn is_valid_transition(prev: &Tag, next: &Tag) -> bool {
        match next {
            Tag::Inside(t) => match prev {
                Tag::Begin(p) | Tag::Inside(p) => p == t,
                Tag::Outside => false,
            },
            _ => true,
        }
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Anotação de entidade em offsets de caractere do texto normalizado (entrada de treino).
///
/// O formato no corpus é `{"start": 0, "end": 2, "type_id": 2}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityAnnotation {
    pub start: usize,
    pub end: usize,
    pub type_id: u32,
}

/// Uma entidade decodificada (saída de inferência).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Trecho do texto normalizado coberto pela entidade
    pub text: String,
    /// Offset de caractere inicial (inclusivo)
    pub start: usize,
    /// Offset de caractere final (exclusivo)
    pub end: usize,
    pub type_id: u32,
    /// Probabilidade média dos rótulos dos tokens da entidade
    pub confidence: f64,
}

impl Entity {
    /// Forma de anotação (sem texto nem confiança), útil para comparar com o gold.
    pub fn annotation(&self) -> EntityAnnotation {
        EntityAnnotation {
            start: self.start,
            end: self.end,
            type_id: self.type_id,
        }
    }
}

/// Um token de conteúdo com a tag decidida e a confiança dessa decisão.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaggedToken {
    pub span: TokenSpan,
    pub tag: Tag,
    pub confidence: f64,
}

/// Uma entidade em construção durante a varredura.
struct Run {
    type_id: u32,
    start: usize,
    end: usize,
    conf_sum: f64,
    count: usize,
}

impl Run {
    fn open(token: &TaggedToken, type_id: u32) -> Self {
        Run {
            type_id,
            start: token.span.char_start,
            end: token.span.char_end,
            conf_sum: token.confidence,
            count: 1,
        }
    }

    fn extend(&mut self, token: &TaggedToken) {
        self.end = token.span.char_end;
        self.conf_sum += token.confidence;
        self.count += 1;
    }

    fn finish(self, text: &NormalizedText) -> Entity {
        Entity {
            text: text.slice_chars(self.start, self.end).to_string(),
            start: self.start,
            end: self.end,
            type_id: self.type_id,
            confidence: self.conf_sum / self.count as f64,
        }
    }
}

/// Converte uma sequência de tokens rotulados (BIO) em entidades.
///
/// Máquina de estados da varredura da esquerda para a direita:
/// - `B-t` fecha a entidade aberta (se houver) e abre uma nova do tipo `t`.
/// - `I-t` estende a entidade aberta se ela for do tipo `t`; caso contrário
///   fecha a anterior e **abre uma nova** como se fosse `B-t`. Sequências
///   malformadas vindas do modelo são recuperadas, nunca rejeitadas.
/// - `O` fecha a entidade aberta.
///
/// # Exemplo
/// `[B-2, I-2, O, I-3]` → `[Entity(2), Entity(3)]`
pub fn tokens_to_entities(
    tagged: &[TaggedToken],
    text: &NormalizedText,
) -> Vec<Entity> {
    let mut entities = Vec::new();
    let mut current: Option<Run> = None;

    for token in tagged {
        match token.tag {
            Tag::Outside => {
                if let Some(run) = current.take() {
                    entities.push(run.finish(text));
                }
            }
            Tag::Begin(t) => {
                if let Some(run) = current.take() {
                    entities.push(run.finish(text));
                }
                current = Some(Run::open(token, t));
            }
            Tag::Inside(t) => match current.as_mut() {
                Some(run) if run.type_id == t => run.extend(token),
                _ => {
                    if let Some(run) = current.take() {
                        entities.push(run.finish(text));
                    }
                    current = Some(Run::open(token, t));
                }
            },
        }
    }

    if let Some(run) = current.take() {
        entities.push(run.finish(text));
    }

    entities
}
