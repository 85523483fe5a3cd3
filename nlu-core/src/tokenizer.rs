//! # Tokenizador Sub-palavra (WordPiece)
//!
//! Divide o texto **normalizado** em tokens de sub-palavra do vocabulário. Cada
//! token carrega o intervalo de caracteres `[start, end)` que ocupa no texto, o
//! que permite projetar anotações de caractere sobre tokens (e de volta).
//!
//! ## Etapas
//!
//! 1. **Pré-tokenização**: espaços separam; cada sequência de um mesmo sistema de
//!    escrita vira uma "palavra" (kanji, hiragana, katakana com `ー`, latim/números,
//!    outras letras). Pontuação e símbolos viram palavras de um caractere.
//! 2. **WordPiece**: dentro de cada palavra, casamento guloso pelo prefixo mais
//!    longo presente no vocabulário; continuações levam o prefixo `##`.
//! 3. Palavra sem segmentação completa (ou longa demais) vira um único `[UNK]`
//!    cobrindo a palavra inteira.
//!
//! ## Exemplo de Uso
//!
//! ```rust
//! use std::sync::Arc;
//! use nlu_core::normalizer::normalize;
//! use nlu_core::tokenizer::{Vocab, WordPieceTokenizer};
//!
//! let text = normalize("照明をつけて");
//! let vocab = Vocab::build_from_texts([&text], 1);
//! let tokenizer = WordPieceTokenizer::new(Arc::new(vocab));
//!
//! // "照明" | "をつけて"
//! let tokens = tokenizer.tokenize(&text);
//! assert_eq!((tokens[0].start, tokens[0].end), (0, 2));
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{NluError, Result};
use crate::normalizer::NormalizedText;

pub const PAD_TOKEN: &str = "[PAD]";
pub const UNK_TOKEN: &str = "[UNK]";
pub const CLS_TOKEN: &str = "[CLS]";
pub const SEP_TOKEN: &str = "[SEP]";

/// Prefixo das peças de continuação do WordPiece.
pub const CONTINUATION_PREFIX: &str = "##";

/// Limite do BERT: palavras maiores viram `[UNK]` direto.
const DEFAULT_MAX_INPUT_CHARS_PER_WORD: usize = 100;

const PRE_TOKEN_PATTERN: &str = r"\p{Han}+|\p{Hiragana}+|[\p{Katakana}ー]+|[\p{Latin}\p{N}]+|[\p{P}\p{S}]|[^\s\p{Han}\p{Hiragana}\p{Katakana}\p{Latin}\p{N}\p{P}\p{S}]+";

fn pre_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(PRE_TOKEN_PATTERN).expect("padrão de pré-tokenização é constante"))
}

/// Um token de conteúdo extraído do texto normalizado.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Token {
    /// O texto da peça no vocabulário (ex: "照明", "##けて", "[UNK]").
    pub text: String,
    pub id: u32,
    /// Offset de caractere inicial no texto normalizado (inclusivo).
    pub start: usize,
    /// Offset de caractere final no texto normalizado (exclusivo).
    pub end: usize,
    /// Índice sequencial entre os tokens de conteúdo (0, 1, 2...).
    pub index: usize,
}

/// Intervalo de caracteres de uma posição da sequência codificada.
///
/// `token_index` é a posição na sequência (com `[CLS]` na posição 0). Tokens
/// especiais usam o span vazio `(0, 0)`; tokens de conteúdo nunca são vazios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSpan {
    pub token_index: usize,
    pub char_start: usize,
    pub char_end: usize,
}

impl TokenSpan {
    pub fn new(token_index: usize, char_start: usize, char_end: usize) -> Self {
        Self {
            token_index,
            char_start,
            char_end,
        }
    }

    pub fn special(token_index: usize) -> Self {
        Self::new(token_index, 0, 0)
    }

    pub fn is_special(&self) -> bool {
        self.char_start >= self.char_end
    }

    /// O span intercepta o intervalo de caracteres `[start, end)`?
    pub fn intersects(&self, start: usize, end: usize) -> bool {
        !self.is_special() && self.char_start < end && start < self.char_end
    }
}

/// Vocabulário ordenado: o id de cada token é a sua posição.
#[derive(Debug, Clone)]
pub struct Vocab {
    token_to_id: HashMap<String, u32>,
    id_to_token: Vec<String>,
    pad_id: u32,
    unk_id: u32,
    cls_id: u32,
    sep_id: u32,
}

impl Vocab {
    /// Monta o vocabulário a partir da lista de tokens (id = posição).
    ///
    /// Os quatro tokens especiais são obrigatórios. Duplicatas mantêm o primeiro id.
    pub fn from_tokens(tokens: Vec<String>) -> Result<Self> {
        let mut token_to_id = HashMap::with_capacity(tokens.len());
        for (i, token) in tokens.iter().enumerate() {
            token_to_id.entry(token.clone()).or_insert(i as u32);
        }

        let special = |name: &str| -> Result<u32> {
            token_to_id
                .get(name)
                .copied()
                .ok_or_else(|| NluError::Vocab(format!("token especial {name} ausente")))
        };
        let pad_id = special(PAD_TOKEN)?;
        let unk_id = special(UNK_TOKEN)?;
        let cls_id = special(CLS_TOKEN)?;
        let sep_id = special(SEP_TOKEN)?;

        debug!(vocab_size = tokens.len(), pad_id, unk_id, cls_id, sep_id, "vocabulário carregado");

        Ok(Self {
            token_to_id,
            id_to_token: tokens,
            pad_id,
            unk_id,
            cls_id,
            sep_id,
        })
    }

    /// Lê um `vocab.txt` (um token por linha).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let tokens: Vec<String> = raw
            .lines()
            .map(|l| l.trim_end_matches('\r').to_string())
            .collect();
        Self::from_tokens(tokens)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut out = self.id_to_token.join("\n");
        out.push('\n');
        std::fs::write(path.as_ref(), out)?;
        Ok(())
    }

    /// Constrói um vocabulário a partir de textos normalizados.
    ///
    /// Inclui os especiais, cada caractere visto (e sua forma `##`), e toda
    /// palavra da pré-tokenização com frequência `>= min_freq`. Com todos os
    /// caracteres presentes, texto visto no corpus nunca produz `[UNK]`.
    pub fn build_from_texts<'a, I>(texts: I, min_freq: usize) -> Self
    where
        I: IntoIterator<Item = &'a NormalizedText>,
    {
        let mut char_freq: HashMap<char, usize> = HashMap::new();
        let mut word_freq: HashMap<String, usize> = HashMap::new();

        for text in texts {
            for (start, end) in pre_tokenize(text) {
                let word = text.slice_chars(start, end);
                for ch in word.chars() {
                    *char_freq.entry(ch).or_insert(0) += 1;
                }
                if end - start > 1 {
                    *word_freq.entry(word.to_string()).or_insert(0) += 1;
                }
            }
        }

        let mut tokens: Vec<String> = [PAD_TOKEN, UNK_TOKEN, CLS_TOKEN, SEP_TOKEN]
            .iter()
            .map(|s| s.to_string())
            .collect();

        // Mais frequentes primeiro; empate em ordem lexicográfica para ser determinístico
        let mut chars: Vec<(char, usize)> = char_freq.into_iter().collect();
        chars.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        for (ch, _) in &chars {
            tokens.push(ch.to_string());
        }
        for (ch, _) in &chars {
            tokens.push(format!("{CONTINUATION_PREFIX}{ch}"));
        }

        let mut words: Vec<(String, usize)> = word_freq
            .into_iter()
            .filter(|(_, freq)| *freq >= min_freq.max(1))
            .collect();
        words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        tokens.extend(words.into_iter().map(|(w, _)| w));

        let mut token_to_id = HashMap::with_capacity(tokens.len());
        for (i, token) in tokens.iter().enumerate() {
            token_to_id.entry(token.clone()).or_insert(i as u32);
        }

        // Especiais nas quatro primeiras posições
        Self {
            token_to_id,
            id_to_token: tokens,
            pad_id: 0,
            unk_id: 1,
            cls_id: 2,
            sep_id: 3,
        }
    }

    pub fn len(&self) -> usize {
        self.id_to_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_token.is_empty()
    }

    pub fn id(&self, token: &str) -> Option<u32> {
        self.token_to_id.get(token).copied()
    }

    pub fn token(&self, id: u32) -> Option<&str> {
        self.id_to_token.get(id as usize).map(String::as_str)
    }

    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }

    pub fn unk_id(&self) -> u32 {
        self.unk_id
    }

    pub fn cls_id(&self) -> u32 {
        self.cls_id
    }

    pub fn sep_id(&self) -> u32 {
        self.sep_id
    }
}

/// Quebra o texto em "palavras" por sistema de escrita; devolve intervalos de caractere.
pub fn pre_tokenize(text: &NormalizedText) -> Vec<(usize, usize)> {
    pre_token_regex()
        .find_iter(text.as_str())
        .map(|m| (text.byte_to_char(m.start()), text.byte_to_char(m.end())))
        .filter(|(s, e)| e > s)
        .collect()
}

/// Tokenizador WordPiece com offsets de caractere.
///
/// O vocabulário é imutável e compartilhado via `Arc`: um mesmo tokenizador
/// atende chamadas concorrentes sem travas.
#[derive(Debug, Clone)]
pub struct WordPieceTokenizer {
    vocab: Arc<Vocab>,
    do_lower_case: bool,
    max_input_chars_per_word: usize,
}

impl WordPieceTokenizer {
    pub fn new(vocab: Arc<Vocab>) -> Self {
        Self {
            vocab,
            do_lower_case: false,
            max_input_chars_per_word: DEFAULT_MAX_INPUT_CHARS_PER_WORD,
        }
    }

    /// Consulta o vocabulário em minúsculas. Os offsets continuam sendo os do
    /// texto normalizado, mesmo quando a minúscula tem outro comprimento.
    pub fn with_lower_case(mut self, do_lower_case: bool) -> Self {
        self.do_lower_case = do_lower_case;
        self
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    /// Tokeniza o texto; devolve apenas tokens de conteúdo (sem especiais).
    pub fn tokenize(&self, text: &NormalizedText) -> Vec<Token> {
        let mut tokens = Vec::new();
        for (start, end) in pre_tokenize(text) {
            self.wordpiece(text, start, end, &mut tokens);
        }

        // Re-indexa os tokens
        for (i, token) in tokens.iter_mut().enumerate() {
            token.index = i;
        }
        tokens
    }

    fn wordpiece(&self, text: &NormalizedText, word_start: usize, word_end: usize, out: &mut Vec<Token>) {
        let word: Vec<char> = text.slice_chars(word_start, word_end).chars().collect();
        let n = word.len();

        if n > self.max_input_chars_per_word {
            out.push(self.unk(word_start, word_end));
            return;
        }

        let mut pieces = Vec::new();
        let mut start = 0;
        while start < n {
            let mut end = n;
            let mut found = None;
            while start < end {
                let mut candidate: String = if start > 0 {
                    CONTINUATION_PREFIX.to_string()
                } else {
                    String::new()
                };
                if self.do_lower_case {
                    candidate.extend(word[start..end].iter().flat_map(|c| c.to_lowercase()));
                } else {
                    candidate.extend(&word[start..end]);
                }
                if let Some(id) = self.vocab.id(&candidate) {
                    found = Some((candidate, id));
                    break;
                }
                end -= 1;
            }

            match found {
                Some((piece, id)) => {
                    pieces.push(Token {
                        text: piece,
                        id,
                        start: word_start + start,
                        end: word_start + end,
                        index: 0,
                    });
                    start = end;
                }
                None => {
                    // Sem segmentação completa: a palavra inteira vira [UNK]
                    out.push(self.unk(word_start, word_end));
                    return;
                }
            }
        }
        out.extend(pieces);
    }

    fn unk(&self, start: usize, end: usize) -> Token {
        Token {
            text: UNK_TOKEN.to_string(),
            id: self.vocab.unk_id(),
            start,
            end,
            index: 0,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::normalizer::normalize;

    /// Vocabulário de teste: especiais + os tokens dados.
    pub(crate) fn vocab_with(tokens: &[&str]) -> Arc<Vocab> {
        let mut all: Vec<String> = [PAD_TOKEN, UNK_TOKEN, CLS_TOKEN, SEP_TOKEN]
            .iter()
            .map(|s| s.to_string())
            .collect();
        all.extend(tokens.iter().map(|s| s.to_string()));
        Arc::new(Vocab::from_tokens(all).unwrap())
    }

    fn texts(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.text.as_str()).collect()
    }

    #[test]
    fn test_pre_tokenize_by_script() {
        let text = normalize("リビングの照明を25度 ON!");
        let words: Vec<&str> = pre_tokenize(&text)
            .into_iter()
            .map(|(s, e)| text.slice_chars(s, e))
            .collect();
        assert_eq!(words, vec!["リビング", "の", "照明", "を", "25", "度", "ON", "!"]);
    }

    #[test]
    fn test_katakana_keeps_prolonged_mark() {
        let text = normalize("ヒーターを");
        let words: Vec<(usize, usize)> = pre_tokenize(&text);
        assert_eq!(words, vec![(0, 4), (4, 5)]);
    }

    #[test]
    fn test_wordpiece_longest_match() {
        let vocab = vocab_with(&["照明", "照", "##明", "を", "##つけ", "##て"]);
        let tokenizer = WordPieceTokenizer::new(vocab);
        let text = normalize("照明をつけて");
        let tokens = tokenizer.tokenize(&text);

        assert_eq!(texts(&tokens), vec!["照明", "を", "##つけ", "##て"]);
        let spans: Vec<(usize, usize)> = tokens.iter().map(|t| (t.start, t.end)).collect();
        assert_eq!(spans, vec![(0, 2), (2, 3), (3, 5), (5, 6)]);
        assert_eq!(tokens[3].index, 3);
    }

    #[test]
    fn test_unknown_word_becomes_single_unk() {
        let vocab = vocab_with(&["を"]);
        let tokenizer = WordPieceTokenizer::new(vocab.clone());
        let text = normalize("照明を");
        let tokens = tokenizer.tokenize(&text);

        assert_eq!(texts(&tokens), vec![UNK_TOKEN, "を"]);
        assert_eq!((tokens[0].start, tokens[0].end), (0, 2));
        assert_eq!(tokens[0].id, vocab.unk_id());
    }

    #[test]
    fn test_lower_case_lookup_keeps_offsets() {
        let vocab = vocab_with(&["led", "on"]);
        let tokenizer = WordPieceTokenizer::new(vocab).with_lower_case(true);
        let text = normalize("LED ON");
        let tokens = tokenizer.tokenize(&text);
        assert_eq!(texts(&tokens), vec!["led", "on"]);
        assert_eq!((tokens[1].start, tokens[1].end), (4, 6));
    }

    #[test]
    fn test_vocab_requires_specials() {
        let err = Vocab::from_tokens(vec!["[PAD]".into(), "a".into()]).unwrap_err();
        assert!(matches!(err, NluError::Vocab(_)));
    }

    #[test]
    fn test_vocab_file_roundtrip() {
        let vocab = vocab_with(&["照明", "##明"]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.txt");
        vocab.save(&path).unwrap();

        let loaded = Vocab::from_file(&path).unwrap();
        assert_eq!(loaded.len(), vocab.len());
        assert_eq!(loaded.id("照明"), vocab.id("照明"));
        assert_eq!(loaded.cls_id(), vocab.cls_id());
    }

    #[test]
    fn test_built_vocab_covers_corpus() {
        let corpus = [normalize("照明をつけて"), normalize("照明を消して")];
        let vocab = Arc::new(Vocab::build_from_texts(corpus.iter(), 2));
        assert!(vocab.id("照明").is_some());
        // "つけて" aparece uma vez só: abaixo de min_freq
        assert!(vocab.id("をつけて").is_none());

        let tokenizer = WordPieceTokenizer::new(vocab.clone());
        for text in &corpus {
            let tokens = tokenizer.tokenize(text);
            assert!(tokens.iter().all(|t| t.id != vocab.unk_id()));
        }
    }

    #[test]
    fn test_token_span_intersection() {
        let span = TokenSpan::new(1, 2, 4);
        assert!(span.intersects(3, 5));
        assert!(span.intersects(0, 3));
        assert!(!span.intersects(4, 6));
        assert!(!span.intersects(0, 2));
        assert!(!TokenSpan::special(0).intersects(0, 10));
    }
}
