//! # Algoritmo de Viterbi — Decodificação BIO Restrita
//!
//! Alternativa ao argmax token a token: encontra a sequência de tags de maior
//! score **respeitando o esquema BIO**, ou seja, sem `I-t` depois de `O`, de
//! outro tipo ou no início da sequência.
//!
//! ## Algoritmo
//!
//! ```text
//! Emissão:      e[i][t] = log_softmax(scores[i])[t]
//! Transição:    0 se válida, -∞ se proibida
//!
//! Inicialização: v[0][t] = e[0][t]            (I-* proibido no início)
//! Recursão:      v[i][t] = max_{t'} [v[i-1][t'] + trans(t', t)] + e[i][t]
//! Backtracking:  reconstrói o caminho ótimo de trás pra frente
//! ```
//!
//! Como `O` e `B-*` são sempre permitidos, sempre existe um caminho finito.
//! Empates vão para a tag de menor índice denso.

use serde::{Deserialize, Serialize};

use crate::tagger::Tag;

/// Resultado do Viterbi
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViterbiResult {
    /// Sequência de tags mais provável (uma por token)
    pub best_sequence: Vec<Tag>,
    /// Log-probabilidade da melhor sequência
    pub best_score: f64,
}

/// Executa o Viterbi sobre os scores brutos (logits) de cada token de conteúdo.
///
/// Linhas com largura diferente do espaço de rótulos são completadas com `-∞`;
/// valores `NaN` contam como `-∞`. Uma linha com `+∞` só admite as posições
/// infinitas; uma linha sem nenhum valor finito vira `O`.
pub fn viterbi_decode(scores: &[&[f32]], num_entity_types: usize) -> ViterbiResult {
    if scores.is_empty() {
        return ViterbiResult {
            best_sequence: vec![],
            best_score: 0.0,
        };
    }

    let tags = Tag::all(num_entity_types);
    let n_tags = tags.len();
    let n_tokens = scores.len();

    let emission: Vec<Vec<f64>> = scores.iter().map(|row| emission_row(row, n_tags)).collect();

    // Backpointer: backptr[i][t] = índice da tag anterior que maximiza o score
    let mut backptr: Vec<Vec<usize>> = vec![vec![0usize; n_tags]; n_tokens];

    // === Inicialização (token 0) ===
    let mut viterbi: Vec<f64> = (0..n_tags)
        .map(|t| match tags[t] {
            Tag::Inside(_) => f64::NEG_INFINITY,
            _ => emission[0][t],
        })
        .collect();

    // === Recursão (tokens 1..N-1) ===
    for i in 1..n_tokens {
        let mut next = vec![f64::NEG_INFINITY; n_tags];
        for t in 0..n_tags {
            // Só predecessores válidos entram, mesmo quando todos valem -∞
            let mut best_prev: Option<(usize, f64)> = None;
            for prev_t in 0..n_tags {
                if !Tag::is_valid_transition(&tags[prev_t], &tags[t]) {
                    continue;
                }
                match best_prev {
                    Some((_, score)) if viterbi[prev_t] <= score => {}
                    _ => best_prev = Some((prev_t, viterbi[prev_t])),
                }
            }
            let (best_prev_tag, best_prev_score) = best_prev.unwrap_or((0, f64::NEG_INFINITY));
            next[t] = best_prev_score + emission[i][t];
            backptr[i][t] = best_prev_tag;
        }
        viterbi = next;
    }

    // === Backtracking ===
    let (mut best_last, best_score) = best_in_slice(&viterbi);
    let mut best_sequence = vec![Tag::Outside; n_tokens];
    best_sequence[n_tokens - 1] = tags[best_last];
    for i in (0..n_tokens - 1).rev() {
        best_last = backptr[i + 1][best_last];
        best_sequence[i] = tags[best_last];
    }

    ViterbiResult {
        best_sequence,
        best_score,
    }
}

fn emission_row(row: &[f32], n_tags: usize) -> Vec<f64> {
    let mut logits: Vec<f64> = (0..n_tags)
        .map(|t| match row.get(t) {
            Some(v) if !v.is_nan() => *v as f64,
            _ => f64::NEG_INFINITY,
        })
        .collect();

    // Entradas +∞ dividem toda a massa entre si, como no argmax
    let infinite: Vec<usize> = (0..n_tags).filter(|&t| logits[t] == f64::INFINITY).collect();
    if !infinite.is_empty() {
        let share = -(infinite.len() as f64).ln();
        let mut row = vec![f64::NEG_INFINITY; n_tags];
        for t in infinite {
            row[t] = share;
        }
        return row;
    }

    let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        // Nada aproveitável: decide por `O`
        let mut fallback = vec![f64::NEG_INFINITY; n_tags];
        fallback[0] = 0.0;
        return fallback;
    }

    let log_sum = logits.iter().map(|&v| (v - max).exp()).sum::<f64>().ln() + max;
    for v in logits.iter_mut() {
        *v -= log_sum;
    }
    logits
}

/// Retorna (índice, valor) do máximo em um slice; empate fica com o menor índice.
fn best_in_slice(scores: &[f64]) -> (usize, f64) {
    let mut best = (0, f64::NEG_INFINITY);
    for (i, &v) in scores.iter().enumerate() {
        if v > best.1 {
            best = (i, v);
        }
    }
    best
}

/// Converte scores em probabilidades softmax (para confiança)
pub fn scores_to_probs(scores: &[f32]) -> Vec<f64> {
    if scores.is_empty() {
        return vec![];
    }
    let max_score = scores
        .iter()
        .filter(|v| v.is_finite())
        .map(|&v| v as f64)
        .fold(f64::NEG_INFINITY, f64::max);
    if !max_score.is_finite() {
        return vec![1.0 / scores.len() as f64; scores.len()];
    }
    let exps: Vec<f64> = scores
        .iter()
        .map(|&s| if s.is_nan() { 0.0 } else { (s as f64 - max_score).exp() })
        .collect();
    let sum: f64 = exps.iter().sum();
    if sum == 0.0 || !sum.is_finite() {
        return vec![1.0 / scores.len() as f64; scores.len()];
    }
    exps.iter().map(|e| e / sum).collect()
}
