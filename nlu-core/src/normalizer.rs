//! # Normalização Unicode (NFKC)
//!
//! Todo offset de caractere do sistema (anotações do corpus, spans de tokens,
//! entidades decodificadas) se refere ao texto **depois** da normalização NFKC.
//! Por isso a mesma função precisa rodar antes da construção de rótulos e antes
//! da inferência; textos normalizados de formas diferentes desalinham os spans
//! sem nenhum erro visível.
//!
//! ## Por que NFKC
//!
//! Comandos em japonês chegam com variantes de largura (`ｶﾞ` → `ガ`, `２５` → `25`).
//! NFKC colapsa essas formas, de modo que o vocabulário vê uma única grafia.
//!
//! ## Offsets
//!
//! Os offsets são contados em **caracteres** (escalares Unicode), não em bytes.
//! [`NormalizedText`] mantém a tabela caractere → byte para fatiar em O(1).

use std::fmt;

use serde::{Serialize, Serializer};
use unicode_normalization::UnicodeNormalization;

/// Normaliza o texto bruto em NFKC. Função pura e total.
pub fn normalize(text: &str) -> NormalizedText {
    NormalizedText::new(text)
}

/// Um texto já normalizado em NFKC, imutável.
///
/// Só é construído via [`normalize`] / [`NormalizedText::new`], então quem recebe
/// um `&NormalizedText` sabe que os offsets batem com os da tokenização.
#[derive(Clone, PartialEq, Eq)]
pub struct NormalizedText {
    text: String,
    /// `char_to_byte[i]` = posição em bytes do i-ésimo caractere; o último
    /// elemento é `text.len()`, então o vetor tem `char_len + 1` entradas.
    char_to_byte: Vec<usize>,
}

impl NormalizedText {
    pub fn new(raw: &str) -> Self {
        let text: String = raw.nfkc().collect();
        let mut char_to_byte: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
        char_to_byte.push(text.len());
        Self { text, char_to_byte }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Número de caracteres (não de bytes).
    pub fn char_len(&self) -> usize {
        self.char_to_byte.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Fatia por offsets de caractere `[start, end)`.
    ///
    /// Offsets fora do texto são limitados ao comprimento; `start >= end` devolve
    /// `""`. Nunca entra em pânico, o que mantém a decodificação total.
    pub fn slice_chars(&self, start: usize, end: usize) -> &str {
        let len = self.char_len();
        let end = end.min(len);
        let start = start.min(end);
        &self.text[self.char_to_byte[start]..self.char_to_byte[end]]
    }

    /// Converte um offset de byte (ex.: vindo de um match de regex) em offset de caractere.
    pub fn byte_to_char(&self, byte: usize) -> usize {
        match self.char_to_byte.binary_search(&byte) {
            Ok(i) => i,
            // Byte no meio de um caractere: arredonda para o caractere que o contém
            Err(i) => i.saturating_sub(1),
        }
    }
}

impl fmt::Debug for NormalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NormalizedText").field(&self.text).finish()
    }
}

impl fmt::Display for NormalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl AsRef<str> for NormalizedText {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

impl Serialize for NormalizedText {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_halfwidth_katakana_is_composed() {
        let text = normalize("ｴｱｺﾝを２５度に");
        assert_eq!(text.as_str(), "エアコンを25度に");
        assert_eq!(text.char_len(), 9);
    }

    #[test]
    fn test_slice_chars_uses_char_offsets() {
        let text = normalize("照明をつけて");
        assert_eq!(text.slice_chars(0, 2), "照明");
        assert_eq!(text.slice_chars(2, 6), "をつけて");
    }

    #[test]
    fn test_slice_chars_clamps_out_of_range() {
        let text = normalize("abc");
        assert_eq!(text.slice_chars(1, 99), "bc");
        assert_eq!(text.slice_chars(5, 2), "");
        assert_eq!(text.slice_chars(0, 0), "");
    }

    #[test]
    fn test_byte_to_char() {
        let text = normalize("照明a");
        assert_eq!(text.byte_to_char(0), 0);
        assert_eq!(text.byte_to_char(3), 1);
        assert_eq!(text.byte_to_char(6), 2);
        assert_eq!(text.byte_to_char(7), 3);
        // Meio do primeiro caractere (3 bytes em UTF-8)
        assert_eq!(text.byte_to_char(1), 0);
    }

    #[test]
    fn test_empty_text() {
        let text = normalize("");
        assert!(text.is_empty());
        assert_eq!(text.char_len(), 0);
        assert_eq!(text.slice_chars(0, 3), "");
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(raw in "\\PC*") {
            let once = normalize(&raw);
            let twice = normalize(once.as_str());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_char_len_matches_chars(raw in "\\PC*") {
            let text = normalize(&raw);
            prop_assert_eq!(text.char_len(), text.as_str().chars().count());
        }
    }
}
