use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tally_core::{CategoryRule, Merchant};

use crate::arena::{MatchResult, PatternArena};
use crate::distance::levenshtein;
use crate::engine::EngineError;

/// Similarity in [0, 100] between two already-normalised strings.
///
/// Exact equality scores 100. If one string contains the other the score is
/// `75 + 25 * shorter / longer`. Otherwise it is the better of an edit-distance
/// score and a subsequence score that rewards early in-order matches, so a
/// suffix like a store number does not sink an otherwise good match.
pub fn fuzzy_score(a: &str, b: &str) -> f64 {
    if a == b {
        return 100.0;
    }
    let len_a = a.chars().count();
    let len_b = b.chars().count();
    if len_a == 0 || len_b == 0 {
        return 0.0;
    }
    let (shorter, longer, short_len, long_len) = if len_a <= len_b {
        (a, b, len_a, len_b)
    } else {
        (b, a, len_b, len_a)
    };
    if longer.contains(shorter) {
        return 75.0 + 25.0 * short_len as f64 / long_len as f64;
    }

    let distance = levenshtein(a, b);
    let edit = 100.0 * long_len.saturating_sub(distance) as f64 / long_len as f64;
    edit.max(subsequence_score(shorter, longer))
}

fn subsequence_score(needle: &str, haystack: &str) -> f64 {
    let hay: Vec<char> = haystack.chars().collect();
    let mut pos = 0;
    let mut first = None;
    let mut last = 0;
    let mut matched = 0usize;
    for c in needle.chars() {
        if let Some(offset) = hay[pos..].iter().position(|h| *h == c) {
            let at = pos + offset;
            first.get_or_insert(at);
            last = at;
            matched += 1;
            pos = at + 1;
        }
    }
    let Some(first) = first else {
        return 0.0;
    };
    let gaps = (last - first + 1) - matched;
    let k = matched as f64;
    let compactness = k / (k + first as f64 + gaps as f64);
    let coverage = 0.5 + 0.5 * k / hay.len() as f64;
    100.0 * compactness * coverage
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuzzyMatch {
    pub entry: MatchResult,
    pub score: f64,
}

/// Approximate matcher over the same grouped pattern set as the exact engine.
/// Lookups scan every pattern.
#[derive(Default)]
pub struct FuzzyMatcher {
    inner: RwLock<PatternArena>,
}

impl FuzzyMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sources(rules: &[CategoryRule], merchants: &[Merchant]) -> Self {
        Self {
            inner: RwLock::new(PatternArena::build(rules, merchants)),
        }
    }

    pub fn build(&self, rules: &[CategoryRule], merchants: &[Merchant]) -> Result<(), EngineError> {
        let arena = PatternArena::build(rules, merchants);
        *self.inner.write().map_err(|_| EngineError::Poisoned)? = arena;
        Ok(())
    }

    /// Best pattern scoring at least `threshold`; equal scores go to the
    /// higher-ranked entry.
    pub fn find(&self, text: &str, threshold: f64) -> Result<Option<FuzzyMatch>, EngineError> {
        let arena = self.inner.read().map_err(|_| EngineError::Poisoned)?;
        let query = normalize_text(text);
        if query.is_empty() {
            return Ok(None);
        }

        let best = arena
            .patterns
            .iter()
            .enumerate()
            .filter_map(|(idx, pattern)| {
                let score = fuzzy_score(&query, pattern);
                (score >= threshold)
                    .then(|| arena.best_in(idx).map(|entry| (score, entry)))
                    .flatten()
            })
            .max_by(|(sa, ea), (sb, eb)| sa.total_cmp(sb).then_with(|| ea.rank(eb)));

        Ok(best.map(|(score, entry)| FuzzyMatch {
            entry: entry.clone(),
            score,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantCluster {
    /// Most frequent member text; ties go to the lexicographically smallest.
    pub label: String,
    /// Indices into the input slice, in input order.
    pub members: Vec<usize>,
}

/// Greedy clustering of descriptions. Each unassigned description seeds a
/// group, and later unassigned descriptions scoring at least `threshold`
/// against the seed join it.
pub fn find_similar_merchants<S: AsRef<str>>(descriptions: &[S], threshold: f64) -> Vec<MerchantCluster> {
    let normalized: Vec<String> = descriptions.iter().map(|d| normalize_text(d.as_ref())).collect();
    let mut assigned = vec![false; normalized.len()];
    let mut clusters = Vec::new();

    for seed in 0..normalized.len() {
        if assigned[seed] {
            continue;
        }
        assigned[seed] = true;
        let mut members = vec![seed];
        for other in seed + 1..normalized.len() {
            if !assigned[other] && fuzzy_score(&normalized[seed], &normalized[other]) >= threshold {
                assigned[other] = true;
                members.push(other);
            }
        }

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for &m in &members {
            *counts.entry(descriptions[m].as_ref().trim()).or_default() += 1;
        }
        let label = counts
            .into_iter()
            .max_by(|(ta, ca), (tb, cb)| ca.cmp(cb).then_with(|| tb.cmp(ta)))
            .map(|(text, _)| text.to_string())
            .unwrap_or_default();

        clusters.push(MerchantCluster { label, members });
    }
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::MatchSource;
    use tally_core::{CategoryId, MerchantId, Owner, RuleId, UserId};

    // ── score ─────────────────────────────────────────────────────────────────

    #[test]
    fn identical_is_100() {
        assert_eq!(fuzzy_score("NETFLIX", "NETFLIX"), 100.0);
        assert_eq!(fuzzy_score("", ""), 100.0);
    }

    #[test]
    fn empty_against_text_is_zero() {
        assert_eq!(fuzzy_score("", "NETFLIX"), 0.0);
    }

    #[test]
    fn containment_scores_between_75_and_100() {
        let s = fuzzy_score("STARBUCKS", "STARBUCKS 001");
        assert!((s - (75.0 + 25.0 * 9.0 / 13.0)).abs() < 1e-9);
        assert_eq!(fuzzy_score("STARBUCKS 001", "STARBUCKS"), s);
    }

    #[test]
    fn non_increasing_with_edit_distance() {
        let base = "STARBUCKS";
        let variants = ["STARBUCKX", "STARBUCXX", "STARBUXXX", "STARBXXXX"];
        let scores: Vec<f64> = variants.iter().map(|v| fuzzy_score(base, v)).collect();
        for pair in scores.windows(2) {
            assert!(pair[0] >= pair[1], "{scores:?}");
        }
        assert!(scores.iter().all(|s| *s < 100.0));
    }

    #[test]
    fn abbreviation_scores_reasonably() {
        let s = fuzzy_score("AMZN", "AMAZON");
        assert!(s > 60.0 && s < 75.0, "{s}");
    }

    #[test]
    fn unrelated_strings_score_low() {
        assert!(fuzzy_score("NETFLIX", "PADARIA") < 50.0);
    }

    // ── matcher ───────────────────────────────────────────────────────────────

    fn merchant(id: i64, pattern: &str, owner: Owner) -> Merchant {
        Merchant {
            id: MerchantId(id),
            owner,
            pattern: pattern.to_string(),
            clean_name: pattern.to_string(),
            category_id: Some(CategoryId(id)),
            is_recurring: false,
        }
    }

    #[test]
    fn finds_variant_above_threshold() {
        let matcher = FuzzyMatcher::from_sources(&[], &[merchant(1, "%STARBUCKS%", Owner::System)]);
        let m = matcher.find("starbuks", 80.0).unwrap().unwrap();
        assert_eq!(m.entry.source, MatchSource::Merchant(MerchantId(1)));
        assert!(m.score >= 80.0);
        assert!(matcher.find("padaria", 80.0).unwrap().is_none());
    }

    #[test]
    fn shared_pattern_prefers_rule() {
        let rule = CategoryRule {
            id: RuleId(9),
            user_id: UserId(1),
            pattern: "uber".into(),
            clean_name: "Uber (rule)".into(),
            category_id: None,
            priority: 0,
            is_recurring: false,
        };
        let matcher = FuzzyMatcher::from_sources(&[rule], &[merchant(1, "UBER", Owner::System)]);
        let m = matcher.find("UBER", 80.0).unwrap().unwrap();
        assert_eq!(m.entry.clean_name, "Uber (rule)");
    }

    #[test]
    fn rebuild_swaps_patterns() {
        let matcher = FuzzyMatcher::new();
        assert!(matcher.find("UBER", 50.0).unwrap().is_none());
        matcher.build(&[], &[merchant(1, "UBER", Owner::System)]).unwrap();
        assert!(matcher.find("UBER", 50.0).unwrap().is_some());
    }

    // ── clustering ────────────────────────────────────────────────────────────

    #[test]
    fn clusters_variants_greedily() {
        let descs = [
            "STARBUCKS 001",
            "NETFLIX.COM",
            "STARBUCKS",
            "STARBUCKS 001",
            "NETFLIX.COM",
        ];
        let clusters = find_similar_merchants(&descs, 80.0);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].members, vec![0, 2, 3]);
        assert_eq!(clusters[0].label, "STARBUCKS 001");
        assert_eq!(clusters[1].members, vec![1, 4]);
    }

    #[test]
    fn label_tie_breaks_lexicographically() {
        let clusters = find_similar_merchants(&["UBER TRIP", "UBER"], 80.0);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].label, "UBER");
    }

    #[test]
    fn empty_input_has_no_clusters() {
        assert!(find_similar_merchants::<&str>(&[], 80.0).is_empty());
    }
}
