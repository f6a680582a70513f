//! Merchant and category matching: an exact multi-pattern engine, a fuzzy
//! fallback, a ranked search index, and a per-user caching service on top.

pub mod arena;
pub mod cache;
pub mod categorizer;
pub mod clean;
pub mod distance;
pub mod engine;
pub mod fuzzy;
pub mod search;

pub use arena::{MatchResult, MatchSource};
pub use cache::{MatcherCache, UserMatchers};
pub use categorizer::{CategorizeError, Categorizer, RuleSource, DEFAULT_FUZZY_THRESHOLD};
pub use clean::clean_description;
pub use distance::levenshtein;
pub use engine::{EngineError, MatchEngine};
pub use fuzzy::{find_similar_merchants, fuzzy_score, FuzzyMatch, FuzzyMatcher, MerchantCluster};
pub use search::{SearchHit, SearchIndex, SearchQuery};
