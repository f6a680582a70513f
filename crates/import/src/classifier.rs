use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::text::normalize_label;

/// A user correction counts as this many ordinary training examples.
const CORRECTION_WEIGHT: f64 = 3.0;

const DEFAULT_MIN_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagPrediction {
    pub label: String,
    /// Posterior probability of `label`, in [0, 1].
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LabelStats {
    docs: f64,
    tokens: HashMap<String, f64>,
    token_total: f64,
}

/// Multinomial naive Bayes over description tokens, with add-one smoothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagClassifier {
    labels: HashMap<String, LabelStats>,
    vocabulary: HashSet<String>,
    total_docs: f64,
    min_confidence: f64,
}

impl Default for TagClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    normalize_label(text)
        .split(' ')
        .filter(|t| t.len() >= 2 && !t.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
        .collect()
}

impl TagClassifier {
    pub fn new() -> Self {
        Self {
            labels: HashMap::new(),
            vocabulary: HashSet::new(),
            total_docs: 0.0,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }

    /// A classifier seeded with installment, subscription, transfer and fee
    /// examples in Portuguese, English and Spanish.
    pub fn with_defaults() -> Self {
        let mut c = Self::new();
        let seeds: &[(&str, &[&str])] = &[
            (
                "installment",
                &[
                    "parcela 01 de 10 loja",
                    "compra parcelada parcela",
                    "parcela cartao",
                    "parc 02 10 magazine",
                    "installment payment",
                    "installment plan",
                    "cuota 3 de 6",
                    "cuotas sin interes",
                    "prestacao",
                ],
            ),
            (
                "subscription",
                &[
                    "netflix assinatura",
                    "spotify premium",
                    "assinatura mensal",
                    "monthly subscription",
                    "subscription renewal",
                    "suscripcion mensual",
                    "amazon prime",
                    "youtube premium",
                    "icloud storage",
                ],
            ),
            (
                "transfer",
                &[
                    "pix enviado",
                    "pix recebido",
                    "ted transferencia",
                    "transferencia enviada",
                    "transferencia recebida",
                    "transfer to savings",
                    "wire transfer",
                    "transferencia bancaria",
                ],
            ),
            (
                "fee",
                &[
                    "tarifa bancaria",
                    "tarifa pacote servicos",
                    "anuidade cartao",
                    "iof compra internacional",
                    "bank fee",
                    "monthly service fee",
                    "service charge",
                    "comision mantenimiento",
                ],
            ),
        ];
        for (label, examples) in seeds {
            for example in *examples {
                c.train(example, label);
            }
        }
        c
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence.clamp(0.0, 1.0);
        self
    }

    pub fn train(&mut self, text: &str, label: &str) {
        self.add(text, label, 1.0);
    }

    /// Records a user correction, weighted above ordinary examples.
    pub fn correct(&mut self, text: &str, label: &str) {
        self.add(text, label, CORRECTION_WEIGHT);
    }

    fn add(&mut self, text: &str, label: &str, weight: f64) {
        let tokens = tokenize(text);
        let stats = self.labels.entry(label.to_string()).or_default();
        stats.docs += weight;
        for token in tokens {
            *stats.tokens.entry(token.clone()).or_default() += weight;
            stats.token_total += weight;
            self.vocabulary.insert(token);
        }
        self.total_docs += weight;
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.labels.keys().map(String::as_str)
    }

    /// Best label for `text`, or `None` when no token is known or the winner
    /// is below the confidence floor.
    pub fn classify(&self, text: &str) -> Option<TagPrediction> {
        let tokens: Vec<String> = tokenize(text)
            .into_iter()
            .filter(|t| self.vocabulary.contains(t))
            .collect();
        if tokens.is_empty() || self.total_docs == 0.0 {
            return None;
        }

        let vocab = self.vocabulary.len() as f64;
        let scores: Vec<(&str, f64)> = self
            .labels
            .iter()
            .map(|(label, stats)| {
                let prior = (stats.docs / self.total_docs).ln();
                let denom = stats.token_total + vocab;
                let likelihood: f64 = tokens
                    .iter()
                    .map(|t| ((stats.tokens.get(t).copied().unwrap_or(0.0) + 1.0) / denom).ln())
                    .sum();
                (label.as_str(), prior + likelihood)
            })
            .collect();

        let max = scores
            .iter()
            .map(|(_, s)| *s)
            .fold(f64::NEG_INFINITY, f64::max);
        let norm: f64 = scores.iter().map(|(_, s)| (s - max).exp()).sum();
        let (label, score) = scores
            .iter()
            .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(a.0)))?;
        let confidence = (score - max).exp() / norm;

        (confidence >= self.min_confidence).then(|| TagPrediction {
            label: label.to_string(),
            confidence,
        })
    }
}
