//! # Configuração do NLU
//!
//! Constantes que antes eram globais (comprimento máximo, número de intenções e
//! de tipos de entidade) viajam num [`NluConfig`] explícito, passado ao alinhador,
//! ao modelo e à renderização na construção.
//!
//! O arquivo é JSON; todo campo ausente cai no valor padrão:
//!
//! ```json
//! { "max_length": 64, "num_intent_labels": 7, "num_entity_types": 8 }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{NluError, Result};

/// Configuração do pipeline de intenção + slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NluConfig {
    /// Comprimento fixo das sequências (inclui `[CLS]` e `[SEP]`).
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default = "default_num_intent_labels")]
    pub num_intent_labels: usize,
    #[serde(default = "default_num_entity_types")]
    pub num_entity_types: usize,
    /// Descrição de cada intenção, indexada pelo id (0 = nenhuma).
    #[serde(default = "default_intent_names")]
    pub intent_names: Vec<String>,
    /// Descrição de cada tipo de entidade, indexada por `type_id - 1`.
    #[serde(default = "default_entity_names")]
    pub entity_names: Vec<String>,
}

impl Default for NluConfig {
    fn default() -> Self {
        Self {
            max_length: default_max_length(),
            num_intent_labels: default_num_intent_labels(),
            num_entity_types: default_num_entity_types(),
            intent_names: default_intent_names(),
            entity_names: default_entity_names(),
        }
    }
}

impl NluConfig {
    /// Lê e valida a configuração a partir de um arquivo JSON.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: NluConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Largura do espaço de rótulos BIO: `2 * num_entity_types + 1`.
    pub fn label_space(&self) -> usize {
        2 * self.num_entity_types + 1
    }

    /// Quantos tokens de conteúdo cabem entre `[CLS]` e `[SEP]`.
    pub fn max_content_tokens(&self) -> usize {
        self.max_length.saturating_sub(2)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_length < 2 {
            return Err(NluError::InvalidConfig(format!(
                "max_length deve ser >= 2 (recebido {})",
                self.max_length
            )));
        }
        if self.num_intent_labels == 0 {
            return Err(NluError::InvalidConfig(
                "num_intent_labels deve ser positivo".into(),
            ));
        }
        if self.num_entity_types == 0 {
            return Err(NluError::InvalidConfig(
                "num_entity_types deve ser positivo".into(),
            ));
        }
        // Tabelas de nomes vazias são aceitas (renderização cai no id numérico)
        if !self.intent_names.is_empty() && self.intent_names.len() != self.num_intent_labels {
            return Err(NluError::InvalidConfig(format!(
                "intent_names tem {} nomes para {} intenções",
                self.intent_names.len(),
                self.num_intent_labels
            )));
        }
        if !self.entity_names.is_empty() && self.entity_names.len() != self.num_entity_types {
            return Err(NluError::InvalidConfig(format!(
                "entity_names tem {} nomes para {} tipos",
                self.entity_names.len(),
                self.num_entity_types
            )));
        }
        Ok(())
    }
}

fn default_max_length() -> usize {
    128
}

fn default_num_intent_labels() -> usize {
    7
}

fn default_num_entity_types() -> usize {
    8
}

// None=0, LED_ON=1, LED_OFF=2, READ_THERMO=3, OPEN=4, CLOSE=5, SET_TEMP=6
fn default_intent_names() -> Vec<String> {
    [
        "なし",
        "点灯したい",
        "消灯したい",
        "数値が知りたい",
        "開けたい",
        "閉めたい",
        "数値設定したい",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

// COL=1, COLLTDEV=2, LOC=3, ONOFFDEV=4, OPENABLE=5, TEMPDEV=6, TEMPERTURE_NUM=7, THMDEV=8
fn default_entity_names() -> Vec<String> {
    [
        "色",
        "照明",
        "設置場所",
        "オンオフできる物",
        "開閉する物",
        "温度調節できる物",
        "温度",
        "温度計",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
