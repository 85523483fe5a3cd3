//! # Corpus de Comandos Anotados
//!
//! Cada registro traz o texto do comando, a intenção e as entidades em offsets
//! de caractere:
//!
//! ```json
//! { "text": "照明をつけて", "intent": 1, "entities": [{ "start": 0, "end": 2, "type_id": 2 }] }
//! ```
//!
//! O arquivo é um array JSON (formato `nlp_data.json`) ou JSON Lines
//! quando a extensão é `.jsonl`. Os textos são normalizados em NFKC na carga; os
//! offsets das anotações se referem ao texto normalizado.

use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::aligner::validate_annotations;
use crate::config::NluConfig;
use crate::error::{NluError, Result};
use crate::normalizer::normalize;
use crate::tagger::EntityAnnotation;

/// Limite de registros usados na divisão.
pub const DEFAULT_SPLIT_LIMIT: usize = 10_000;

/// Um comando anotado do corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusRecord {
    pub text: String,
    pub intent: usize,
    #[serde(default)]
    pub entities: Vec<EntityAnnotation>,
}

/// Carrega o corpus e normaliza os textos.
pub fn load_corpus(path: impl AsRef<Path>) -> Result<Vec<CorpusRecord>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)?;

    let is_jsonl = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("jsonl"))
        .unwrap_or(false);

    let mut records: Vec<CorpusRecord> = if is_jsonl {
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str::<CorpusRecord>)
            .collect::<std::result::Result<_, _>>()?
    } else {
        serde_json::from_str(&raw)?
    };

    for record in &mut records {
        record.text = normalize(&record.text).as_str().to_string();
    }

    info!(records = records.len(), path = %path.display(), "corpus carregado");
    Ok(records)
}

/// Valida um registro: intenção no intervalo e anotações bem formadas.
pub fn validate_record(record: &CorpusRecord, config: &NluConfig) -> Result<()> {
    if record.intent >= config.num_intent_labels {
        return Err(NluError::malformed(format!(
            "intent {} fora de [0, {})",
            record.intent, config.num_intent_labels
        )));
    }
    let text = normalize(&record.text);
    validate_annotations(&text, &record.entities, config.num_entity_types)?;
    Ok(())
}

/// Registro acompanhado da sua posição no corpus carregado.
pub type IndexedRecord = (usize, CorpusRecord);

/// Divisão treino / validação / teste. Cada registro guarda o índice que tinha
/// no corpus antes do embaralhamento.
#[derive(Debug, Clone, Default)]
pub struct DatasetSplit {
    pub train: Vec<IndexedRecord>,
    pub val: Vec<IndexedRecord>,
    pub test: Vec<IndexedRecord>,
}

/// Embaralha com semente fixa, limita a `limit` registros e divide 60/20/20.
pub fn split_dataset(records: Vec<CorpusRecord>, limit: usize, seed: u64) -> DatasetSplit {
    let mut records: Vec<IndexedRecord> = records.into_iter().enumerate().collect();
    let mut rng = StdRng::seed_from_u64(seed);
    records.shuffle(&mut rng);
    records.truncate(limit);

    let n = records.len();
    let n_train = n * 6 / 10;
    let n_val = n * 2 / 10;

    let test = records.split_off(n_train + n_val);
    let val = records.split_off(n_train);
    let train = records;

    info!(train = train.len(), val = val.len(), test = test.len(), seed, "dataset dividido");
    DatasetSplit { train, val, test }
}

/// Comandos de exemplo para a interface (um por intenção).
pub fn demo_texts() -> &'static [(&'static str, &'static str)] {
    &[
        ("点灯", "リビングの照明をつけて"),
        ("消灯", "寝室の電気を消して"),
        ("温度", "今の室温を教えて"),
        ("開ける", "玄関のドアを開けて"),
        ("閉める", "カーテンを閉めて"),
        ("設定", "エアコンを25度にして"),
        ("なし", "こんにちは"),
    ]
}
