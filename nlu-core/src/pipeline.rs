//! # Pipeline NLU — Texto → Intenção + Entidades
//!
//! Coordena normalização, codificação, o modelo conjunto e a volta do
//! alinhador, emitindo eventos a cada passo via `mpsc`. O servidor WebSocket
//! repassa esses eventos ao cliente; [`NluPipeline::analyze`] apenas consome o
//! canal até o `Done`.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aligner::{argmax, Aligner, DecodeStrategy};
use crate::error::{NluError, Result};
use crate::model::JointModel;
use crate::tagger::{tokens_to_entities, Entity};
use crate::viterbi::scores_to_probs;

/// Resultado de uma análise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Texto já normalizado (os offsets das entidades se referem a ele)
    pub text: String,
    pub intent: usize,
    pub intent_confidence: f64,
    pub entities: Vec<Entity>,
    pub processing_ms: u64,
}

/// Eventos emitidos durante o processamento.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PipelineEvent {
    /// **Passo 1**: texto normalizado (NFKC).
    Normalized { text: String, changed: bool },
    /// **Passo 2**: peças de sub-palavra das posições reais, com `[CLS]`/`[SEP]`.
    Tokenized { tokens: Vec<String>, total: usize },
    /// **Passo 3**: intenção escolhida pelo argmax dos logits.
    IntentPredicted { intent: usize, confidence: f64 },
    /// **Passo 4**: tag decidida para um token de conteúdo.
    TagAssigned {
        token_index: usize,
        token_text: String,
        tag: String,
        confidence: f64,
    },
    /// **Conclusão**
    Done { prediction: Prediction },
    /// **Falha**: erro do modelo.
    Error { message: String },
}

/// O pipeline de inferência. Compartilhável entre threads (`Arc<NluPipeline>`).
pub struct NluPipeline {
    aligner: Aligner,
    model: Arc<dyn JointModel>,
    strategy: DecodeStrategy,
}

impl NluPipeline {
    pub fn new(aligner: Aligner, model: Arc<dyn JointModel>) -> Self {
        Self {
            aligner,
            model,
            strategy: DecodeStrategy::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: DecodeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn aligner(&self) -> &Aligner {
        &self.aligner
    }

    pub fn strategy(&self) -> DecodeStrategy {
        self.strategy
    }

    /// Processa o texto de forma síncrona.
    pub fn analyze(&self, text: &str) -> Result<Prediction> {
        let (tx, rx) = mpsc::channel();
        self.analyze_streaming(text, tx);

        let mut error = None;
        while let Ok(event) = rx.recv() {
            match event {
                PipelineEvent::Done { prediction } => return Ok(prediction),
                PipelineEvent::Error { message } => error = Some(message),
                _ => {}
            }
        }
        Err(NluError::Model(
            error.unwrap_or_else(|| "pipeline encerrado sem resultado".into()),
        ))
    }

    /// Executa o pipeline enviando eventos de progresso pelo canal.
    ///
    /// # Fluxo de Eventos
    /// 1. `Normalized`
    /// 2. `Tokenized`
    /// 3. `IntentPredicted`
    /// 4. `TagAssigned` (um por token de conteúdo)
    /// 5. `Done` ou `Error`
    pub fn analyze_streaming(&self, text: &str, tx: mpsc::Sender<PipelineEvent>) {
        let start = Instant::now();
        let config = self.aligner.config();

        let encoded = match self.aligner.encode_plus_untagged(text, config.max_length) {
            Ok(encoded) => encoded,
            Err(err) => {
                let _ = tx.send(PipelineEvent::Error { message: err.to_string() });
                return;
            }
        };
        let _ = tx.send(PipelineEvent::Normalized {
            text: encoded.text.to_string(),
            changed: encoded.text.as_str() != text,
        });

        let vocab = self.aligner.tokenizer().vocab();
        let pieces: Vec<String> = encoded
            .encoding
            .input_ids
            .iter()
            .take(encoded.spans.len())
            .map(|&id| vocab.token(id).unwrap_or_default().to_string())
            .collect();
        let _ = tx.send(PipelineEvent::Tokenized {
            total: pieces.len(),
            tokens: pieces.clone(),
        });

        let output = match self.model.forward(&encoded.encoding, None) {
            Ok(output) => output,
            Err(err) => {
                let _ = tx.send(PipelineEvent::Error { message: err.to_string() });
                return;
            }
        };

        let intent = argmax(&output.intent_logits).unwrap_or(0);
        let intent_confidence = scores_to_probs(&output.intent_logits)
            .get(intent)
            .copied()
            .unwrap_or(0.0);
        let _ = tx.send(PipelineEvent::IntentPredicted {
            intent,
            confidence: intent_confidence,
        });

        let tagged = self
            .aligner
            .tag_tokens(&output.slot_logits, &encoded.spans, self.strategy);
        for token in &tagged {
            let _ = tx.send(PipelineEvent::TagAssigned {
                token_index: token.span.token_index,
                token_text: pieces.get(token.span.token_index).cloned().unwrap_or_default(),
                tag: token.tag.label(),
                confidence: token.confidence,
            });
        }

        let entities: Vec<Entity> = tokens_to_entities(&tagged, &encoded.text);
        let processing_ms = start.elapsed().as_millis() as u64;
        debug!(intent, entities = entities.len(), processing_ms, "análise concluída");

        let _ = tx.send(PipelineEvent::Done {
            prediction: Prediction {
                text: encoded.text.to_string(),
                intent,
                intent_confidence,
                entities,
                processing_ms,
            },
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aligner::Encoding;
    use crate::config::NluConfig;
    use crate::model::{ModelOutput, Targets};
    use crate::tokenizer::tests::vocab_with;
    use crate::tokenizer::WordPieceTokenizer;

    /// Modelo fixo: intenção 1 e `B-2` em toda posição com máscara ativa.
    struct FixedModel;

    impl JointModel for FixedModel {
        fn forward(&self, encoding: &Encoding, _targets: Option<Targets<'_>>) -> Result<ModelOutput> {
            let slot_logits = encoding
                .attention_mask
                .iter()
                .map(|&m| {
                    let mut row = vec![0.0; 17];
                    row[if m == 1 { 3 } else { 0 }] = 5.0;
                    row
                })
                .collect();
            Ok(ModelOutput {
                loss: None,
                intent_logits: vec![0.0, 3.0, 3.0, 0.0, 0.0, 0.0, 0.0],
                slot_logits,
            })
        }
    }

    struct BrokenModel;

    impl JointModel for BrokenModel {
        fn forward(&self, _encoding: &Encoding, _targets: Option<Targets<'_>>) -> Result<ModelOutput> {
            Err(NluError::Model("sem pesos".into()))
        }
    }

    fn pipeline(model: Arc<dyn JointModel>) -> NluPipeline {
        let config = NluConfig {
            max_length: 16,
            ..NluConfig::default()
        };
        let tokenizer = WordPieceTokenizer::new(vocab_with(&["照明", "を", "##つけ", "##て"]));
        NluPipeline::new(Aligner::new(tokenizer, config).unwrap(), model)
    }

    #[test]
    fn test_analyze_predicts_intent_and_entities() {
        let prediction = pipeline(Arc::new(FixedModel)).analyze("照明をつけて").unwrap();
        // Empate entre 1 e 2 fica com o menor índice
        assert_eq!(prediction.intent, 1);
        assert_eq!(prediction.text, "照明をつけて");
        // B-2 em todo token: cada token vira uma entidade
        let texts: Vec<&str> = prediction.entities.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["照明", "を", "つけ", "て"]);
        assert!(prediction.entities.iter().all(|e| e.type_id == 2));
    }

    #[test]
    fn test_streaming_event_order() {
        let (tx, rx) = mpsc::channel();
        pipeline(Arc::new(FixedModel)).analyze_streaming("照明を", tx);
        let events: Vec<PipelineEvent> = rx.iter().collect();

        assert!(matches!(events[0], PipelineEvent::Normalized { changed: false, .. }));
        match &events[1] {
            PipelineEvent::Tokenized { tokens, total } => {
                assert_eq!(*total, 4);
                assert_eq!(tokens, &["[CLS]", "照明", "を", "[SEP]"]);
            }
            other => panic!("evento inesperado: {other:?}"),
        }
        assert!(matches!(events[2], PipelineEvent::IntentPredicted { intent: 1, .. }));
        let tags = events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::TagAssigned { .. }))
            .count();
        assert_eq!(tags, 2);
        assert!(matches!(events.last(), Some(PipelineEvent::Done { .. })));
    }

    #[test]
    fn test_normalized_event_flags_change() {
        let (tx, rx) = mpsc::channel();
        pipeline(Arc::new(FixedModel)).analyze_streaming("ｴｱｺﾝ", tx);
        match rx.recv().unwrap() {
            PipelineEvent::Normalized { text, changed } => {
                assert_eq!(text, "エアコン");
                assert!(changed);
            }
            other => panic!("evento inesperado: {other:?}"),
        }
    }

    #[test]
    fn test_model_error_propagates() {
        let result = pipeline(Arc::new(BrokenModel)).analyze("照明をつけて");
        assert!(matches!(result, Err(NluError::Model(_))));
    }

    #[test]
    fn test_empty_text_has_no_entities() {
        let prediction = pipeline(Arc::new(FixedModel)).analyze("").unwrap();
        assert!(prediction.entities.is_empty());
    }

    #[test]
    fn test_event_json_shape() {
        let event = PipelineEvent::IntentPredicted { intent: 2, confidence: 0.5 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "IntentPredicted");
        assert_eq!(json["data"]["intent"], 2);
    }
}
