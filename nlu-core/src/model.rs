//! # Modelo Conjunto Intenção + Slots
//!
//! A fronteira com a rede neural. O alinhador produz [`Encoding`]s; o modelo
//! devolve logits de intenção (um vetor por sentença) e de slot (uma linha por
//! posição), e a perda quando há alvos.
//!
//! ```text
//! input_ids ──► Encoder ──► sequence[max_length][hidden] ──► slot_head   ──► slot_logits
//!                       └─► pooled[hidden]               ──► intent_head ──► intent_logits
//! ```
//!
//! O [`Encoder`] é opaco: qualquer implementação que produza embeddings
//! contextuais serve. O crate traz o [`EmbeddingEncoder`], uma tabela de
//! lookup em CPU carregável de JSON, suficiente para rodar o pipeline de ponta
//! a ponta sem um runtime de deep learning.
//!
//! ## Perda
//!
//! ```text
//! loss = CE(intent_logits, intent_label)                       (MSE se há 1 só intenção)
//!      + slot_loss_coef · média_{mask=1} CE(slot_logits[i], slot_labels[i])
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::aligner::Encoding;
use crate::config::NluConfig;
use crate::error::{NluError, Result};

/// Alvos de treino para uma sequência.
#[derive(Debug, Clone, Copy)]
pub struct Targets<'a> {
    pub slot_labels: &'a [u32],
    pub intent_label: usize,
}

/// Saída do passo forward.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelOutput {
    /// Presente apenas quando o forward recebeu alvos.
    pub loss: Option<f32>,
    /// `[num_intent_labels]`
    pub intent_logits: Vec<f32>,
    /// `[max_length][2N + 1]`
    pub slot_logits: Vec<Vec<f32>>,
}

/// Contrato consumido pelo pipeline e exposto ao treino.
pub trait JointModel: Send + Sync {
    fn forward(&self, encoding: &Encoding, targets: Option<Targets<'_>>) -> Result<ModelOutput>;
}

/// Embeddings contextuais de uma sequência.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderOutput {
    pub sequence: Vec<Vec<f32>>,
    pub pooled: Vec<f32>,
}

pub trait Encoder: Send + Sync {
    fn hidden_size(&self) -> usize;
    fn encode(&self, encoding: &Encoding) -> Result<EncoderOutput>;
}

/// Camada linear `y = W·x + b`, com `W` em `[out][in]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearHead {
    pub weight: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
}

impl LinearHead {
    pub fn new(weight: Vec<Vec<f32>>, bias: Vec<f32>) -> Result<Self> {
        let head = Self { weight, bias };
        head.check()?;
        Ok(head)
    }

    pub fn zeros(in_dim: usize, out_dim: usize) -> Self {
        Self {
            weight: vec![vec![0.0; in_dim]; out_dim],
            bias: vec![0.0; out_dim],
        }
    }

    pub fn in_dim(&self) -> usize {
        self.weight.first().map(Vec::len).unwrap_or(0)
    }

    pub fn out_dim(&self) -> usize {
        self.weight.len()
    }

    pub fn forward(&self, x: &[f32]) -> Vec<f32> {
        self.weight
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(x).map(|(w, v)| w * v).sum::<f32>() + b)
            .collect()
    }

    fn check(&self) -> Result<()> {
        if self.bias.len() != self.weight.len() {
            return Err(NluError::Model(format!(
                "bias com {} posições para {} saídas",
                self.bias.len(),
                self.weight.len()
            )));
        }
        let in_dim = self.in_dim();
        if self.weight.iter().any(|row| row.len() != in_dim) {
            return Err(NluError::Model("matriz de pesos irregular".into()));
        }
        Ok(())
    }

    fn expect_shape(&self, name: &str, in_dim: usize, out_dim: usize) -> Result<()> {
        self.check()?;
        if self.in_dim() != in_dim || self.out_dim() != out_dim {
            return Err(NluError::Model(format!(
                "{name}: esperado [{out_dim}][{in_dim}], encontrado [{}][{}]",
                self.out_dim(),
                self.in_dim()
            )));
        }
        Ok(())
    }
}

/// Encoder de tabela de lookup: cada id vira sua linha de embedding.
///
/// Posições com `attention_mask == 0` saem zeradas; `pooled` é
/// `tanh(média das linhas ativas)`.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingEncoder {
    embeddings: Vec<Vec<f32>>,
    hidden: usize,
}

impl EmbeddingEncoder {
    pub fn new(embeddings: Vec<Vec<f32>>) -> Result<Self> {
        let hidden = embeddings.first().map(Vec::len).unwrap_or(0);
        if hidden == 0 {
            return Err(NluError::Model("tabela de embeddings vazia".into()));
        }
        if embeddings.iter().any(|row| row.len() != hidden) {
            return Err(NluError::Model("tabela de embeddings irregular".into()));
        }
        Ok(Self { embeddings, hidden })
    }

    pub fn vocab_size(&self) -> usize {
        self.embeddings.len()
    }
}

impl Encoder for EmbeddingEncoder {
    fn hidden_size(&self) -> usize {
        self.hidden
    }

    fn encode(&self, encoding: &Encoding) -> Result<EncoderOutput> {
        let mut sequence = Vec::with_capacity(encoding.len());
        let mut sum = vec![0.0f32; self.hidden];
        let mut active = 0usize;

        for (&id, &mask) in encoding.input_ids.iter().zip(&encoding.attention_mask) {
            if mask == 0 {
                sequence.push(vec![0.0; self.hidden]);
                continue;
            }
            let row = self.embeddings.get(id as usize).ok_or_else(|| {
                NluError::Model(format!(
                    "id {id} fora da tabela de embeddings ({} linhas)",
                    self.embeddings.len()
                ))
            })?;
            for (acc, v) in sum.iter_mut().zip(row) {
                *acc += v;
            }
            active += 1;
            sequence.push(row.clone());
        }

        let pooled = if active == 0 {
            vec![0.0; self.hidden]
        } else {
            sum.iter().map(|v| (v / active as f32).tanh()).collect()
        };

        Ok(EncoderOutput { sequence, pooled })
    }
}

/// Duas cabeças lineares sobre um encoder compartilhado.
#[derive(Debug, Clone)]
pub struct JointBert<E> {
    encoder: E,
    intent_head: LinearHead,
    slot_head: LinearHead,
    config: NluConfig,
    slot_loss_coef: f32,
}

impl<E: Encoder> JointBert<E> {
    pub fn new(encoder: E, intent_head: LinearHead, slot_head: LinearHead, config: NluConfig) -> Result<Self> {
        let hidden = encoder.hidden_size();
        intent_head.expect_shape("intent_head", hidden, config.num_intent_labels)?;
        slot_head.expect_shape("slot_head", hidden, config.label_space())?;
        Ok(Self {
            encoder,
            intent_head,
            slot_head,
            config,
            slot_loss_coef: 1.0,
        })
    }

    /// Cabeças zeradas: todos os logits iguais, útil para testes de fumaça.
    pub fn untrained(encoder: E, config: NluConfig) -> Self {
        let hidden = encoder.hidden_size();
        Self {
            intent_head: LinearHead::zeros(hidden, config.num_intent_labels),
            slot_head: LinearHead::zeros(hidden, config.label_space()),
            encoder,
            config,
            slot_loss_coef: 1.0,
        }
    }

    pub fn with_slot_loss_coef(mut self, coef: f32) -> Self {
        self.slot_loss_coef = coef;
        self
    }

    pub fn config(&self) -> &NluConfig {
        &self.config
    }

    fn loss(&self, encoding: &Encoding, output: &ModelOutput, targets: Targets<'_>) -> Result<f32> {
        if targets.slot_labels.len() != encoding.len() {
            return Err(NluError::Model(format!(
                "slot_labels com {} posições para sequência de {}",
                targets.slot_labels.len(),
                encoding.len()
            )));
        }

        let intent_loss = if self.config.num_intent_labels == 1 {
            let logit = output.intent_logits.first().copied().unwrap_or(0.0);
            let diff = logit - targets.intent_label as f32;
            diff * diff
        } else {
            if targets.intent_label >= self.config.num_intent_labels {
                return Err(NluError::Model(format!(
                    "intent_label {} fora de [0, {})",
                    targets.intent_label, self.config.num_intent_labels
                )));
            }
            cross_entropy(&output.intent_logits, targets.intent_label)
        };

        let width = self.config.label_space();
        let mut slot_sum = 0.0f32;
        let mut active = 0usize;
        for ((logits, &label), &mask) in output
            .slot_logits
            .iter()
            .zip(targets.slot_labels)
            .zip(&encoding.attention_mask)
        {
            if mask != 1 {
                continue;
            }
            if label as usize >= width {
                return Err(NluError::Model(format!("rótulo de slot {label} fora de [0, {width})")));
            }
            slot_sum += cross_entropy(logits, label as usize);
            active += 1;
        }
        let slot_loss = if active == 0 { 0.0 } else { slot_sum / active as f32 };

        Ok(intent_loss + self.slot_loss_coef * slot_loss)
    }
}

impl JointBert<EmbeddingEncoder> {
    /// Carrega encoder e cabeças de um arquivo JSON:
    ///
    /// ```json
    /// { "embeddings": [[...]], "intent_head": { "weight": [[...]], "bias": [...] },
    ///   "slot_head": { "weight": [[...]], "bias": [...] } }
    /// ```
    ///
    /// A tabela precisa cobrir todo o vocabulário (`vocab_size` linhas ou mais).
    pub fn from_weights_file(path: impl AsRef<Path>, config: NluConfig, vocab_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let weights: JointWeights = serde_json::from_str(&raw)?;

        let encoder = EmbeddingEncoder::new(weights.embeddings)?;
        if encoder.vocab_size() < vocab_size {
            return Err(NluError::Model(format!(
                "embeddings com {} linhas para vocabulário de {vocab_size}",
                encoder.vocab_size()
            )));
        }
        let model = Self::new(encoder, weights.intent_head, weights.slot_head, config)?;
        info!(
            path = %path.display(),
            hidden = model.encoder.hidden_size(),
            "pesos do modelo carregados"
        );
        Ok(model)
    }
}

impl<E: Encoder> JointModel for JointBert<E> {
    fn forward(&self, encoding: &Encoding, targets: Option<Targets<'_>>) -> Result<ModelOutput> {
        if encoding.attention_mask.len() != encoding.len() || encoding.token_type_ids.len() != encoding.len() {
            return Err(NluError::Model("entradas com comprimentos diferentes".into()));
        }

        let encoded = self.encoder.encode(encoding)?;
        let mut output = ModelOutput {
            loss: None,
            intent_logits: self.intent_head.forward(&encoded.pooled),
            slot_logits: encoded
                .sequence
                .iter()
                .map(|row| self.slot_head.forward(row))
                .collect(),
        };

        if let Some(targets) = targets {
            output.loss = Some(self.loss(encoding, &output, targets)?);
        }
        Ok(output)
    }
}

/// Formato do arquivo de pesos.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JointWeights {
    pub embeddings: Vec<Vec<f32>>,
    pub intent_head: LinearHead,
    pub slot_head: LinearHead,
}

/// `-log softmax(logits)[target]`, estável via log-sum-exp.
fn cross_entropy(logits: &[f32], target: usize) -> f32 {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let log_sum = logits.iter().map(|v| (v - max).exp()).sum::<f32>().ln() + max;
    log_sum - logits.get(target).copied().unwrap_or(f32::NEG_INFINITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(num_intent_labels: usize) -> NluConfig {
        NluConfig {
            max_length: 4,
            num_intent_labels,
            num_entity_types: 1,
            intent_names: vec![],
            entity_names: vec![],
        }
    }

    fn encoding(ids: &[u32], real: usize) -> Encoding {
        Encoding {
            input_ids: ids.to_vec(),
            attention_mask: (0..ids.len()).map(|i| (i < real) as u32).collect(),
            token_type_ids: vec![0; ids.len()],
        }
    }

    fn encoder() -> EmbeddingEncoder {
        EmbeddingEncoder::new(vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0], vec![2.0, 2.0]]).unwrap()
    }

    #[test]
    fn test_encoder_zeroes_padding_and_pools_active_rows() {
        let out = encoder().encode(&encoding(&[1, 2, 3, 0], 2)).unwrap();
        assert_eq!(out.sequence[0], vec![1.0, 0.0]);
        assert_eq!(out.sequence[2], vec![0.0, 0.0]);
        assert!((out.pooled[0] - 0.5f32.tanh()).abs() < 1e-6);
        assert!((out.pooled[1] - 0.5f32.tanh()).abs() < 1e-6);
    }

    #[test]
    fn test_encoder_rejects_unknown_id() {
        let err = encoder().encode(&encoding(&[9, 0, 0, 0], 1));
        assert!(matches!(err, Err(NluError::Model(_))));
    }

    #[test]
    fn test_untrained_loss_is_uniform() {
        let model = JointBert::untrained(encoder(), small_config(2));
        let enc = encoding(&[1, 2, 3, 0], 3);
        let labels = [0, 1, 2, 0];
        let out = model
            .forward(&enc, Some(Targets { slot_labels: &labels, intent_label: 1 }))
            .unwrap();

        assert_eq!(out.intent_logits, vec![0.0, 0.0]);
        assert_eq!(out.slot_logits.len(), 4);
        assert_eq!(out.slot_logits[0].len(), 3);
        // ln 2 (intenção) + ln 3 (slots)
        let expected = 2f32.ln() + 3f32.ln();
        assert!((out.loss.unwrap() - expected).abs() < 1e-5);
    }

    #[test]
    fn test_padding_positions_do_not_count() {
        let model = JointBert::untrained(encoder(), small_config(2));
        let enc = encoding(&[1, 0, 0, 0], 1);
        // Rótulo inválido numa posição mascarada é ignorado
        let labels = [0, 99, 99, 99];
        let out = model.forward(&enc, Some(Targets { slot_labels: &labels, intent_label: 0 }));
        assert!(out.is_ok());
    }

    #[test]
    fn test_single_intent_uses_mse() {
        let model = JointBert::untrained(encoder(), small_config(1)).with_slot_loss_coef(0.0);
        let enc = encoding(&[1, 0, 0, 0], 1);
        let labels = [0; 4];
        let out = model
            .forward(&enc, Some(Targets { slot_labels: &labels, intent_label: 3 }))
            .unwrap();
        assert!((out.loss.unwrap() - 9.0).abs() < 1e-6);
    }

    #[test]
    fn test_no_targets_no_loss() {
        let model = JointBert::untrained(encoder(), small_config(2));
        let out = model.forward(&encoding(&[1, 2, 0, 0], 2), None).unwrap();
        assert!(out.loss.is_none());
    }

    #[test]
    fn test_heads_shape_checked() {
        let config = small_config(2);
        let bad = LinearHead::zeros(5, 2);
        let ok = LinearHead::zeros(2, 3);
        assert!(JointBert::new(encoder(), bad, ok.clone(), config.clone()).is_err());
        assert!(JointBert::new(encoder(), LinearHead::zeros(2, 2), ok, config).is_ok());
        assert!(LinearHead::new(vec![vec![1.0, 2.0], vec![1.0]], vec![0.0, 0.0]).is_err());
    }

    #[test]
    fn test_linear_head_forward() {
        let head = LinearHead::new(vec![vec![1.0, 2.0], vec![-1.0, 0.5]], vec![0.5, 0.0]).unwrap();
        assert_eq!(head.forward(&[2.0, 1.0]), vec![4.5, -1.5]);
    }

    #[test]
    fn test_load_weights_file() {
        let config = small_config(2);
        let weights = JointWeights {
            embeddings: vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]],
            intent_head: LinearHead::new(vec![vec![1.0, 0.0], vec![0.0, 1.0]], vec![0.0, 0.0]).unwrap(),
            slot_head: LinearHead::zeros(2, 3),
        };
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), serde_json::to_string(&weights).unwrap()).unwrap();

        let model = JointBert::from_weights_file(file.path(), config.clone(), 3).unwrap();
        let out = model.forward(&encoding(&[2, 0, 0, 0], 1), None).unwrap();
        assert!(out.intent_logits[1] > out.intent_logits[0]);

        assert!(JointBert::from_weights_file(file.path(), config, 10).is_err());
    }
}
