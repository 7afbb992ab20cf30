//! Built-in keyword scorer.
//!
//! Each label owns a weighted cue list. Evidence for a label is the sum of
//! the weights of its cues found in the text; evidence is turned into a
//! distribution with a softmax. Labels without a built-in cue list are
//! scored from the words of the label itself.

use std::collections::HashMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::ScoringBackend;
use crate::error::ClassifyError;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-z0-9]+(?:'[a-z]+)?").unwrap());

/// Cues shorter than this only match whole tokens.
const MIN_PREFIX_CUE: usize = 5;

/// Evidence from repeats of one cue stops counting after this many hits.
const MAX_HITS_PER_CUE: usize = 2;

const SUPPORT_CUES: &[(&str, f32)] = &[
    ("help", 1.0),
    ("support", 1.5),
    ("account", 1.0),
    ("login", 1.5),
    ("log", 1.0),
    ("password", 2.0),
    ("reset", 1.5),
    ("access", 1.0),
    ("error", 1.0),
    ("unable", 1.0),
    ("working", 1.0),
    ("problem", 1.0),
    ("locked", 1.5),
    ("install", 1.0),
    ("how", 0.5),
];

const SALES_CUES: &[(&str, f32)] = &[
    ("pricing", 2.0),
    ("price", 1.5),
    ("quote", 2.0),
    ("purchase", 1.5),
    ("buy", 1.5),
    ("demo", 1.5),
    ("trial", 1.0),
    ("interested", 1.5),
    ("license", 1.0),
    ("enterprise", 1.0),
    ("discount", 1.0),
    ("plans", 1.0),
    ("upgrade", 1.0),
];

const BILLING_CUES: &[(&str, f32)] = &[
    ("invoice", 2.0),
    ("billing", 2.0),
    ("billed", 2.0),
    ("charge", 2.0),
    ("refund", 2.0),
    ("payment", 1.5),
    ("paid", 1.0),
    ("subscription", 1.0),
    ("card", 1.0),
    ("receipt", 1.0),
    ("twice", 1.0),
    ("overcharged", 2.0),
];

const COMPLAINT_CUES: &[(&str, f32)] = &[
    ("complain", 2.0),
    ("disappointed", 2.0),
    ("unacceptable", 2.0),
    ("terrible", 2.0),
    ("worst", 2.0),
    ("awful", 1.5),
    ("angry", 1.5),
    ("frustrat", 1.5),
    ("rude", 1.5),
    ("poor", 1.0),
    ("broken", 1.0),
    ("never", 0.5),
];

const FEEDBACK_CUES: &[(&str, f32)] = &[
    ("feedback", 2.0),
    ("suggest", 2.0),
    ("idea", 1.5),
    ("improve", 1.5),
    ("feature", 1.0),
    ("love", 1.5),
    ("great", 1.0),
    ("thanks", 1.0),
    ("thank", 1.0),
    ("recommend", 1.0),
    ("enjoy", 1.0),
];

/// Deterministic keyword classifier.
#[derive(Debug, Clone)]
pub struct LexicalBackend {
    cues: HashMap<String, Vec<(String, f32)>>,
}

impl Default for LexicalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LexicalBackend {
    /// Backend with cue lists for the default routing labels.
    pub fn new() -> Self {
        let mut backend = Self {
            cues: HashMap::new(),
        };
        for (label, cues) in [
            ("customer support", SUPPORT_CUES),
            ("sales inquiry", SALES_CUES),
            ("billing issue", BILLING_CUES),
            ("complaint", COMPLAINT_CUES),
            ("feedback", FEEDBACK_CUES),
        ] {
            backend = backend.with_cues(label, cues.iter().map(|(c, w)| (c.to_string(), *w)));
        }
        backend
    }

    /// Replace the cue list for `label`.
    pub fn with_cues(
        mut self,
        label: &str,
        cues: impl IntoIterator<Item = (String, f32)>,
    ) -> Self {
        let cues = cues
            .into_iter()
            .map(|(c, w)| (c.to_lowercase(), w))
            .collect();
        self.cues.insert(label.to_lowercase(), cues);
        self
    }

    /// Raw evidence for one label over pre-tokenized text.
    fn evidence(&self, label: &str, tokens: &[&str]) -> f32 {
        let key = label.to_lowercase();
        let derived;
        let cues: &[(String, f32)] = match self.cues.get(&key) {
            Some(cues) => cues,
            None => {
                derived = label_cues(&key);
                &derived
            }
        };

        cues.iter()
            .map(|(cue, weight)| {
                let hits = tokens
                    .iter()
                    .filter(|t| cue_matches(cue, t))
                    .take(MAX_HITS_PER_CUE)
                    .count();
                hits as f32 * weight
            })
            .sum()
    }
}

#[async_trait]
impl ScoringBackend for LexicalBackend {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn score(
        &self,
        text: &str,
        labels: &[String],
    ) -> Result<Vec<(String, f32)>, ClassifyError> {
        let lowered = text.to_lowercase();
        let tokens = tokenize(&lowered);
        let evidence: Vec<f32> = labels.iter().map(|l| self.evidence(l, &tokens)).collect();

        tracing::debug!(tokens = tokens.len(), ?evidence, "Lexical evidence");
        Ok(labels.iter().cloned().zip(softmax(&evidence)).collect())
    }
}

fn tokenize(lowered: &str) -> Vec<&str> {
    TOKEN.find_iter(lowered).map(|m| m.as_str()).collect()
}

/// Whole-token match, or prefix match for longer cues ("charge" → "charged").
fn cue_matches(cue: &str, token: &str) -> bool {
    token == cue || (cue.len() >= MIN_PREFIX_CUE && token.starts_with(cue))
}

/// Cues for a label with no built-in list: its own words.
fn label_cues(label: &str) -> Vec<(String, f32)> {
    tokenize(label)
        .into_iter()
        .filter(|w| w.len() >= 3)
        .map(|w| (w.to_string(), 1.0))
        .collect()
}

fn softmax(values: &[f32]) -> Vec<f32> {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = values.iter().map(|v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::classify::ClassificationGateway;
    use crate::config::DEFAULT_LABELS;

    fn gateway() -> ClassificationGateway {
        ClassificationGateway::new(
            Arc::new(LexicalBackend::new()),
            DEFAULT_LABELS.iter().map(|s| s.to_string()).collect(),
        )
    }

    async fn top(text: &str) -> String {
        gateway().classify(text).await.unwrap().labels[0].clone()
    }

    #[tokio::test]
    async fn login_trouble_routes_to_support() {
        assert_eq!(
            top("I can't log into my account, please help reset my password.").await,
            "customer support"
        );
    }

    #[tokio::test]
    async fn representative_texts_route_as_expected() {
        assert_eq!(top("Why was I charged twice on my last invoice? I want a refund.").await, "billing issue");
        assert_eq!(top("Could you send a quote and pricing for the enterprise plan?").await, "sales inquiry");
        assert_eq!(top("This is unacceptable, the worst service. Very disappointed.").await, "complaint");
        assert_eq!(top("Love the new feature! One suggestion to improve it.").await, "feedback");
    }

    #[tokio::test]
    async fn no_evidence_is_uniform() {
        let result = gateway().classify("zzz qqq").await.unwrap();
        assert!(result.scores.iter().all(|s| (*s - 0.2).abs() < 1e-5));
        assert_eq!(result.labels[0], "customer support");
    }

    #[tokio::test]
    async fn unknown_labels_score_from_their_own_words() {
        let gw = ClassificationGateway::new(
            Arc::new(LexicalBackend::new()),
            vec!["shipping delay".into(), "partnership".into()],
        );
        let result = gw.classify("Our shipping is late again").await.unwrap();
        assert_eq!(result.labels[0], "shipping delay");
    }

    #[test]
    fn cue_matching_uses_prefix_only_for_long_cues() {
        assert!(cue_matches("charge", "charged"));
        assert!(cue_matches("log", "log"));
        assert!(!cue_matches("log", "logo"));
    }

    #[test]
    fn tokenizer_keeps_contractions() {
        assert_eq!(tokenize("i can't log-in"), vec!["i", "can't", "log", "in"]);
    }

    #[test]
    fn softmax_sums_to_one() {
        let p = softmax(&[0.0, 2.0, 1.0]);
        assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(p[1] > p[2] && p[2] > p[0]);
    }
}
