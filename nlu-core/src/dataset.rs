//! # Formatação do Dataset de Treino
//!
//! Transforma registros do corpus em exemplos prontos para o modelo: entradas
//! de comprimento fixo, rótulos BIO por posição e o rótulo de intenção.
//!
//! Registros malformados não derrubam o lote: são registrados com `warn!` e
//! devolvidos em [`FormattedDataset::skipped`]. O processamento é paralelo
//! (rayon), mas a ordem dos exemplos segue a ordem do corpus.

use std::io::{BufWriter, Write};
use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aligner::{Aligner, TaggedEncoding};
use crate::corpus::{validate_record, CorpusRecord, IndexedRecord};
use crate::error::Result;

/// Um exemplo de treino serializado numa linha JSONL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingExample {
    #[serde(flatten)]
    pub tagged: TaggedEncoding,
    pub intent_label: usize,
}

/// Registro descartado e o motivo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct FormattedDataset {
    pub examples: Vec<TrainingExample>,
    pub skipped: Vec<SkippedRecord>,
}

/// Formata um registro isolado. O índice só serve para a mensagem de erro.
pub fn format_record(aligner: &Aligner, index: usize, record: &CorpusRecord) -> Result<TrainingExample> {
    let config = aligner.config();
    validate_record(record, config).map_err(|e| e.in_record(index))?;
    let tagged = aligner
        .encode_plus_tagged(&record.text, &record.entities, config.max_length)
        .map_err(|e| e.in_record(index))?;
    Ok(TrainingExample {
        tagged,
        intent_label: record.intent,
    })
}

/// Formata o corpus inteiro em paralelo. Os índices reportados são as posições em `records`.
pub fn format_dataset(aligner: &Aligner, records: &[CorpusRecord]) -> FormattedDataset {
    let indexed: Vec<(usize, &CorpusRecord)> = records.iter().enumerate().collect();
    format_indexed(aligner, &indexed)
}

/// Formata uma parte de [`split_dataset`](crate::corpus::split_dataset). Os
/// índices reportados são os do corpus, não a posição dentro da parte.
pub fn format_split(aligner: &Aligner, records: &[IndexedRecord]) -> FormattedDataset {
    let indexed: Vec<(usize, &CorpusRecord)> = records.iter().map(|(i, r)| (*i, r)).collect();
    format_indexed(aligner, &indexed)
}

fn format_indexed(aligner: &Aligner, records: &[(usize, &CorpusRecord)]) -> FormattedDataset {
    let results: Vec<(usize, Result<TrainingExample>)> = records
        .par_iter()
        .map(|&(i, record)| (i, format_record(aligner, i, record)))
        .collect();

    let mut dataset = FormattedDataset::default();
    for (index, result) in results {
        match result {
            Ok(example) => dataset.examples.push(example),
            Err(err) => {
                warn!(index, error = %err, "registro descartado");
                dataset.skipped.push(SkippedRecord {
                    index,
                    reason: err.to_string(),
                });
            }
        }
    }

    info!(
        examples = dataset.examples.len(),
        skipped = dataset.skipped.len(),
        "dataset formatado"
    );
    dataset
}

/// Escreve os exemplos em JSON Lines (um objeto por linha).
pub fn write_jsonl(path: impl AsRef<Path>, examples: &[TrainingExample]) -> Result<()> {
    let file = std::fs::File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    for example in examples {
        serde_json::to_writer(&mut writer, example)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NluConfig;
    use crate::tagger::EntityAnnotation;
    use crate::tokenizer::tests::vocab_with;
    use crate::tokenizer::WordPieceTokenizer;

    fn aligner() -> Aligner {
        let config = NluConfig {
            max_length: 8,
            ..NluConfig::default()
        };
        Aligner::new(WordPieceTokenizer::new(vocab_with(&["照明", "を", "##つけ", "##て"])), config).unwrap()
    }

    fn record(intent: usize, entities: Vec<EntityAnnotation>) -> CorpusRecord {
        CorpusRecord {
            text: "照明をつけて".to_string(),
            intent,
            entities,
        }
    }

    #[test]
    fn test_skips_bad_records_and_keeps_order() {
        let good = EntityAnnotation { start: 0, end: 2, type_id: 2 };
        let records = vec![
            record(1, vec![good]),
            record(99, vec![]),
            record(2, vec![EntityAnnotation { start: 0, end: 50, type_id: 2 }]),
            record(3, vec![]),
        ];

        let dataset = format_dataset(&aligner(), &records);
        assert_eq!(dataset.examples.len(), 2);
        assert_eq!(dataset.examples[0].intent_label, 1);
        assert_eq!(dataset.examples[1].intent_label, 3);
        assert_eq!(&dataset.examples[0].tagged.slot_labels[..3], &[0, 3, 0]);

        let skipped: Vec<usize> = dataset.skipped.iter().map(|s| s.index).collect();
        assert_eq!(skipped, vec![1, 2]);
        assert!(dataset.skipped[1].reason.contains("registro 2"));
    }

    #[test]
    fn test_split_reports_corpus_index() {
        let mut records: Vec<CorpusRecord> = (0..10).map(|i| record(i % 6 + 1, vec![])).collect();
        records[0].intent = 99;

        let split = crate::corpus::split_dataset(records, crate::corpus::DEFAULT_SPLIT_LIMIT, 42);
        let aligner = aligner();
        let skipped: Vec<SkippedRecord> = [&split.train, &split.val, &split.test]
            .into_iter()
            .flat_map(|part| format_split(&aligner, part).skipped)
            .collect();

        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].index, 0);
        assert!(skipped[0].reason.contains("registro 0"));
    }

    #[test]
    fn test_shared_token_annotations_are_skipped() {
        // "照明" é um único token: as duas anotações disputam a mesma posição
        let records = vec![
            record(1, vec![
                EntityAnnotation { start: 0, end: 1, type_id: 1 },
                EntityAnnotation { start: 1, end: 2, type_id: 2 },
            ]),
            record(2, vec![]),
        ];

        let dataset = format_dataset(&aligner(), &records);
        assert_eq!(dataset.examples.len(), 1);
        assert_eq!(dataset.examples[0].intent_label, 2);
        assert_eq!(dataset.skipped.len(), 1);
        assert_eq!(dataset.skipped[0].index, 0);
        assert!(dataset.skipped[0].reason.contains("registro 0"));
    }

    #[test]
    fn test_write_jsonl_has_flat_fields() {
        let dataset = format_dataset(&aligner(), &[record(1, vec![])]);
        let file = tempfile::NamedTempFile::new().unwrap();
        write_jsonl(file.path(), &dataset.examples).unwrap();

        let raw = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 1);

        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        for key in ["input_ids", "attention_mask", "token_type_ids", "slot_labels", "intent_label"] {
            assert!(value.get(key).is_some(), "faltou {key}");
        }
        assert_eq!(value["input_ids"].as_array().unwrap().len(), 8);

        let back: TrainingExample = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(back, dataset.examples[0]);
    }
}
