//! # Erros do NLU
//!
//! Somente o caminho de **treino** (construção de rótulos, carga de vocabulário,
//! configuração e pesos) produz erros. A decodificação de entidades é total:
//! nunca falha, no máximo devolve uma lista vazia.

use thiserror::Error;

/// Resultado padrão das operações do crate.
pub type Result<T> = std::result::Result<T, NluError>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum NluError {
    /// Anotação inválida: spans sobrepostos, fora do texto ou `type_id` fora da faixa.
    ///
    /// `record` é o índice do registro no corpus (ou `None` fora de um corpus).
    #[error("anotação inválida{}: {}", .record.map(|r| format!(" no registro {r}")).unwrap_or_default(), .reason)]
    MalformedAnnotation { record: Option<usize>, reason: String },

    #[error("configuração inválida: {0}")]
    InvalidConfig(String),

    #[error("vocabulário inválido: {0}")]
    Vocab(String),

    /// Pesos com dimensões incompatíveis ou saída do modelo malformada.
    #[error("erro no modelo: {0}")]
    Model(String),

    #[error("erro de IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("erro de JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl NluError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        NluError::MalformedAnnotation {
            record: None,
            reason: reason.into(),
        }
    }

    /// Anexa o índice do registro a um erro de anotação; outros erros passam intactos.
    pub fn in_record(self, index: usize) -> Self {
        match self {
            NluError::MalformedAnnotation { reason, .. } => NluError::MalformedAnnotation {
                record: Some(index),
                reason,
            },
            other => other,
        }
    }
}
