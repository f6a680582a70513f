use serde::{Deserialize, Serialize};

use crate::ids::{CategoryId, MerchantId, RuleId, UserId};

/// Added to every rule's configured priority so any rule outranks any merchant.
pub const RULE_PRIORITY_OFFSET: i32 = 1000;
pub const USER_MERCHANT_PRIORITY: i32 = 100;
pub const SYSTEM_MERCHANT_PRIORITY: i32 = 0;

/// Strips SQL `LIKE` wildcards and upper-cases, so `%netflix%` and
/// `NETFLIX` address the same matcher entry.
pub fn normalize_pattern(pattern: &str) -> String {
    pattern.replace('%', "").trim().to_uppercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "user_id")]
pub enum Owner {
    User(UserId),
    System,
}

/// A user-authored categorisation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub id: RuleId,
    pub user_id: UserId,
    pub pattern: String,
    pub clean_name: String,
    pub category_id: Option<CategoryId>,
    /// Configured priority, 0..=999.
    pub priority: i32,
    pub is_recurring: bool,
}

impl CategoryRule {
    pub fn effective_priority(&self) -> i32 {
        self.priority.clamp(0, RULE_PRIORITY_OFFSET - 1) + RULE_PRIORITY_OFFSET
    }
}

/// A merchant catalog entry, either shared (system) or user-specific.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Merchant {
    pub id: MerchantId,
    pub owner: Owner,
    pub pattern: String,
    pub clean_name: String,
    pub category_id: Option<CategoryId>,
    pub is_recurring: bool,
}

impl Merchant {
    pub fn effective_priority(&self) -> i32 {
        match self.owner {
            Owner::User(_) => USER_MERCHANT_PRIORITY,
            Owner::System => SYSTEM_MERCHANT_PRIORITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Fuzzy,
    None,
}

/// One categorised description, returned in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizationResult {
    pub clean_merchant_name: String,
    pub category_id: Option<CategoryId>,
    pub is_recurring: bool,
    pub merchant_id: Option<MerchantId>,
    pub rule_id: Option<RuleId>,
    pub match_kind: MatchKind,
}

impl CategorizationResult {
    pub fn uncategorized(clean_name: impl Into<String>) -> Self {
        CategorizationResult {
            clean_merchant_name: clean_name.into(),
            category_id: None,
            is_recurring: false,
            merchant_id: None,
            rule_id: None,
            match_kind: MatchKind::None,
        }
    }

    pub fn is_categorized(&self) -> bool {
        self.category_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(priority: i32) -> CategoryRule {
        CategoryRule {
            id: RuleId(1),
            user_id: UserId(1),
            pattern: "%NETFLIX%".to_string(),
            clean_name: "Netflix".to_string(),
            category_id: None,
            priority,
            is_recurring: false,
        }
    }

    #[test]
    fn normalize_strips_wildcards() {
        assert_eq!(normalize_pattern("%netflix%"), "NETFLIX");
        assert_eq!(normalize_pattern(" uber% "), "UBER");
    }

    #[test]
    fn rules_always_outrank_merchants() {
        let merchant = Merchant {
            id: MerchantId(1),
            owner: Owner::User(UserId(1)),
            pattern: "NETFLIX".to_string(),
            clean_name: "Netflix".to_string(),
            category_id: None,
            is_recurring: false,
        };
        for p in [0, 1, 500, 999] {
            assert!(rule(p).effective_priority() > merchant.effective_priority());
        }
    }

    #[test]
    fn rule_priority_is_clamped() {
        assert_eq!(rule(-5).effective_priority(), 1000);
        assert_eq!(rule(5000).effective_priority(), 1999);
    }

    #[test]
    fn owner_serializes_tagged() {
        let json = serde_json::to_string(&Owner::User(UserId(7))).unwrap();
        assert_eq!(json, r#"{"kind":"user","user_id":7}"#);
        let json = serde_json::to_string(&Owner::System).unwrap();
        assert_eq!(json, r#"{"kind":"system"}"#);
    }
}
