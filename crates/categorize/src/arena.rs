use std::cmp::{Ordering, Reverse};
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tally_core::{
    normalize_pattern, CategorizationResult, CategoryId, CategoryRule, MatchKind, Merchant,
    MerchantId, RuleId,
};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum MatchSource {
    Rule(RuleId),
    Merchant(MerchantId),
}

impl MatchSource {
    // Rules before merchants, then lower id.
    fn tie_key(&self) -> (u8, Reverse<i64>) {
        match self {
            MatchSource::Rule(id) => (1, Reverse(id.0)),
            MatchSource::Merchant(id) => (0, Reverse(id.0)),
        }
    }
}

/// Metadata attached to one normalised pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Normalised (wildcard-free, upper-case) pattern.
    pub pattern: String,
    pub clean_name: String,
    pub category_id: Option<CategoryId>,
    pub priority: i32,
    pub is_recurring: bool,
    pub source: MatchSource,
}

impl MatchResult {
    pub fn rule_id(&self) -> Option<RuleId> {
        match self.source {
            MatchSource::Rule(id) => Some(id),
            MatchSource::Merchant(_) => None,
        }
    }

    pub fn merchant_id(&self) -> Option<MerchantId> {
        match self.source {
            MatchSource::Merchant(id) => Some(id),
            MatchSource::Rule(_) => None,
        }
    }

    /// Total order used to pick a winner: priority, then longer pattern,
    /// then rules before merchants, then lower id. `Greater` wins.
    pub fn rank(&self, other: &MatchResult) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| {
                self.pattern
                    .chars()
                    .count()
                    .cmp(&other.pattern.chars().count())
            })
            .then_with(|| self.source.tie_key().cmp(&other.source.tie_key()))
    }

    pub fn to_categorization(&self, kind: MatchKind) -> CategorizationResult {
        CategorizationResult {
            clean_merchant_name: self.clean_name.clone(),
            category_id: self.category_id,
            is_recurring: self.is_recurring,
            merchant_id: self.merchant_id(),
            rule_id: self.rule_id(),
            match_kind: kind,
        }
    }
}

/// Deduplicated patterns and their metadata groups, index-addressed:
/// `patterns[i]` owns `groups[i]`.
#[derive(Debug, Clone, Default)]
pub struct PatternArena {
    pub patterns: Vec<String>,
    pub groups: Vec<Vec<MatchResult>>,
}

impl PatternArena {
    pub fn build(rules: &[CategoryRule], merchants: &[Merchant]) -> Self {
        let rule_entries = rules.iter().map(|r| MatchResult {
            pattern: normalize_pattern(&r.pattern),
            clean_name: r.clean_name.clone(),
            category_id: r.category_id,
            priority: r.effective_priority(),
            is_recurring: r.is_recurring,
            source: MatchSource::Rule(r.id),
        });
        let merchant_entries = merchants.iter().map(|m| MatchResult {
            pattern: normalize_pattern(&m.pattern),
            clean_name: m.clean_name.clone(),
            category_id: m.category_id,
            priority: m.effective_priority(),
            is_recurring: m.is_recurring,
            source: MatchSource::Merchant(m.id),
        });

        let mut arena = PatternArena::default();
        let mut index: HashMap<String, usize> = HashMap::new();
        for entry in rule_entries.chain(merchant_entries) {
            if entry.pattern.is_empty() {
                warn!(source = ?entry.source, "skipping empty pattern");
                continue;
            }
            let slot = *index.entry(entry.pattern.clone()).or_insert_with(|| {
                arena.patterns.push(entry.pattern.clone());
                arena.groups.push(Vec::new());
                arena.patterns.len() - 1
            });
            arena.groups[slot].push(entry);
        }
        arena
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn entry_count(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    /// Highest-ranked entry of group `idx`.
    pub fn best_in(&self, idx: usize) -> Option<&MatchResult> {
        self.groups.get(idx)?.iter().max_by(|a, b| a.rank(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{Owner, UserId};

    fn rule(id: i64, pattern: &str, name: &str, priority: i32) -> CategoryRule {
        CategoryRule {
            id: RuleId(id),
            user_id: UserId(1),
            pattern: pattern.to_string(),
            clean_name: name.to_string(),
            category_id: Some(CategoryId(id)),
            priority,
            is_recurring: false,
        }
    }

    fn merchant(id: i64, pattern: &str, name: &str, owner: Owner) -> Merchant {
        Merchant {
            id: MerchantId(id),
            owner,
            pattern: pattern.to_string(),
            clean_name: name.to_string(),
            category_id: Some(CategoryId(100 + id)),
            is_recurring: false,
        }
    }

    #[test]
    fn same_normalised_pattern_shares_a_group() {
        let arena = PatternArena::build(
            &[rule(1, "%NETFLIX%", "Netflix", 0)],
            &[merchant(1, "netflix", "Netflix (Merchant)", Owner::System)],
        );
        assert_eq!(arena.len(), 1);
        assert_eq!(arena.entry_count(), 2);
        assert_eq!(arena.groups[0].len(), 2);
    }

    #[test]
    fn empty_patterns_are_skipped() {
        let arena = PatternArena::build(&[rule(1, "%%", "Nothing", 0)], &[]);
        assert!(arena.is_empty());
    }

    #[test]
    fn rank_prefers_priority_then_length_then_rules() {
        let arena = PatternArena::build(
            &[rule(2, "UBER", "Uber", 0), rule(1, "UBER", "Uber (old)", 0)],
            &[merchant(1, "UBER", "Uber", Owner::User(UserId(1)))],
        );
        // Same priority: lower rule id wins.
        assert_eq!(arena.best_in(0).unwrap().source, MatchSource::Rule(RuleId(1)));

        let short = MatchResult {
            pattern: "UBER".into(),
            clean_name: String::new(),
            category_id: None,
            priority: 100,
            is_recurring: false,
            source: MatchSource::Merchant(MerchantId(1)),
        };
        let long = MatchResult {
            pattern: "UBER EATS".into(),
            source: MatchSource::Merchant(MerchantId(2)),
            ..short.clone()
        };
        assert_eq!(long.rank(&short), Ordering::Greater);
    }

    #[test]
    fn to_categorization_sets_exactly_one_id() {
        let arena = PatternArena::build(&[rule(7, "NETFLIX", "Netflix", 5)], &[]);
        let result = arena.best_in(0).unwrap().to_categorization(MatchKind::Exact);
        assert_eq!(result.rule_id, Some(RuleId(7)));
        assert_eq!(result.merchant_id, None);
        assert_eq!(result.match_kind, MatchKind::Exact);
    }
}
