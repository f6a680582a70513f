pub mod currency;
pub mod ids;
pub mod mapping;
pub mod money;
pub mod rule;
pub mod transaction;

pub use currency::{convention_for, find_currency, symbol_to_code, NumberConvention};
pub use ids::{AccountId, CategoryId, JobId, MerchantId, RuleId, UserId};
pub use mapping::{
    AmountColumns, ColumnMapping, ColumnRole, ColumnSuggestion, DateOrder, DetectOptions,
    FileConfig, MappingError, RegionalDialect, ResolvedMapping, SourceFormat,
};
pub use money::{decimal_to_minor, format_minor};
pub use rule::{
    normalize_pattern, CategorizationResult, CategoryRule, MatchKind, Merchant, Owner,
    RULE_PRIORITY_OFFSET, SYSTEM_MERCHANT_PRIORITY, USER_MERCHANT_PRIORITY,
};
pub use transaction::{ParseError, ParseErrorKind, ParseStats, ParsedTransaction, RowOutcome};
