use std::sync::Arc;

use async_trait::async_trait;
use tally_core::{CategorizationResult, CategoryRule, MatchKind, Merchant, UserId};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{MatcherCache, UserMatchers};
use crate::clean::clean_description;
use crate::engine::EngineError;
use crate::search::{SearchHit, SearchQuery};

pub const DEFAULT_FUZZY_THRESHOLD: f64 = 80.0;

#[derive(Error, Debug)]
pub enum CategorizeError {
    #[error("Matcher error: {0}")]
    Engine(#[from] EngineError),
    #[error("Rule source error: {0}")]
    Source(String),
}

/// Where a user's rules and merchants come from.
#[async_trait]
pub trait RuleSource: Send + Sync {
    async fn load_rules(&self, user: UserId) -> Result<Vec<CategoryRule>, CategorizeError>;
    /// System merchants plus the user's own.
    async fn load_merchants(&self, user: UserId) -> Result<Vec<Merchant>, CategorizeError>;
}

/// Categorises descriptions against a user's rules and merchants, caching the
/// compiled matchers per user.
pub struct Categorizer {
    source: Arc<dyn RuleSource>,
    cache: MatcherCache,
    fuzzy_threshold: f64,
}

impl Categorizer {
    pub fn new(source: Arc<dyn RuleSource>) -> Self {
        Self {
            source,
            cache: MatcherCache::new(),
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
        }
    }

    pub fn with_fuzzy_threshold(mut self, threshold: f64) -> Self {
        self.fuzzy_threshold = threshold;
        self
    }

    pub async fn matchers(&self, user: UserId) -> Result<Arc<UserMatchers>, CategorizeError> {
        self.cache
            .get_or_build(user, || async {
                let rules = self.source.load_rules(user).await?;
                let merchants = self.source.load_merchants(user).await?;
                debug!(%user, rules = rules.len(), merchants = merchants.len(), "building matchers");
                Ok::<_, CategorizeError>(UserMatchers::build(&rules, &merchants)?)
            })
            .await
    }

    /// One result per description, in input order. Never fails: on any
    /// internal error every description comes back cleaned and uncategorised.
    pub async fn categorize<S: AsRef<str> + Sync>(
        &self,
        user: UserId,
        descriptions: &[S],
    ) -> Vec<CategorizationResult> {
        match self.try_categorize(user, descriptions).await {
            Ok(results) => results,
            Err(e) => {
                warn!(%user, error = %e, "categorization failed; returning uncategorised results");
                descriptions
                    .iter()
                    .map(|d| CategorizationResult::uncategorized(clean_description(d.as_ref())))
                    .collect()
            }
        }
    }

    pub async fn try_categorize<S: AsRef<str> + Sync>(
        &self,
        user: UserId,
        descriptions: &[S],
    ) -> Result<Vec<CategorizationResult>, CategorizeError> {
        let matchers = self.matchers(user).await?;
        let exact = matchers.engine.find_batch(descriptions)?;

        descriptions
            .iter()
            .zip(exact)
            .map(|(desc, hit)| -> Result<CategorizationResult, CategorizeError> {
                if let Some(hit) = hit {
                    return Ok(hit.to_categorization(MatchKind::Exact));
                }
                let cleaned = clean_description(desc.as_ref());
                Ok(match matchers.fuzzy.find(&cleaned, self.fuzzy_threshold)? {
                    Some(m) => m.entry.to_categorization(MatchKind::Fuzzy),
                    None => CategorizationResult::uncategorized(cleaned),
                })
            })
            .collect()
    }

    /// Ranked rule/merchant suggestions for a search box.
    pub async fn suggest(
        &self,
        user: UserId,
        query: &SearchQuery,
        limit: usize,
    ) -> Result<Vec<SearchHit>, CategorizeError> {
        let matchers = self.matchers(user).await?;
        Ok(matchers.search.search(query, limit))
    }

    /// Drops the user's compiled matchers; call after any rule or merchant change.
    pub fn invalidate(&self, user: UserId) {
        if let Err(e) = self.cache.invalidate(user) {
            warn!(%user, error = %e, "failed to invalidate matcher cache");
        }
    }

    /// Drops every user's compiled matchers; call after a system merchant
    /// changes.
    pub fn invalidate_all(&self) {
        if let Err(e) = self.cache.invalidate_all() {
            warn!(error = %e, "failed to clear matcher cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tally_core::{CategoryId, MerchantId, Owner, RuleId};

    #[derive(Default)]
    struct MemorySource {
        rules: Mutex<HashMap<UserId, Vec<CategoryRule>>>,
        merchants: Mutex<Vec<Merchant>>,
        loads: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl RuleSource for MemorySource {
        async fn load_rules(&self, user: UserId) -> Result<Vec<CategoryRule>, CategorizeError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(CategorizeError::Source("database is down".into()));
            }
            Ok(self.rules.lock().unwrap().get(&user).cloned().unwrap_or_default())
        }

        async fn load_merchants(&self, _user: UserId) -> Result<Vec<Merchant>, CategorizeError> {
            Ok(self.merchants.lock().unwrap().clone())
        }
    }

    fn netflix_source() -> Arc<MemorySource> {
        let source = MemorySource::default();
        source.rules.lock().unwrap().insert(
            UserId(1),
            vec![CategoryRule {
                id: RuleId(1),
                user_id: UserId(1),
                pattern: "%NETFLIX%".into(),
                clean_name: "Netflix".into(),
                category_id: Some(CategoryId(5)),
                priority: 0,
                is_recurring: true,
            }],
        );
        source.merchants.lock().unwrap().extend([
            Merchant {
                id: MerchantId(1),
                owner: Owner::System,
                pattern: "%NETFLIX%".into(),
                clean_name: "Netflix (Merchant)".into(),
                category_id: Some(CategoryId(6)),
                is_recurring: false,
            },
            Merchant {
                id: MerchantId(2),
                owner: Owner::System,
                pattern: "STARBUCKS".into(),
                clean_name: "Starbucks".into(),
                category_id: Some(CategoryId(7)),
                is_recurring: false,
            },
        ]);
        Arc::new(source)
    }

    #[tokio::test]
    async fn rule_beats_merchant_end_to_end() {
        let categorizer = Categorizer::new(netflix_source());
        let out = categorizer
            .categorize(UserId(1), &["NETFLIX.COM SUBSCRIPTION"])
            .await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].clean_merchant_name, "Netflix");
        assert!(out[0].is_recurring);
        assert_eq!(out[0].rule_id, Some(RuleId(1)));
        assert_eq!(out[0].merchant_id, None);
        assert_eq!(out[0].match_kind, MatchKind::Exact);
    }

    #[tokio::test]
    async fn fuzzy_pass_catches_misspellings() {
        let categorizer = Categorizer::new(netflix_source());
        let out = categorizer
            .categorize(UserId(1), &["SQ *STARBUKS 123456", "PADARIA REAL"])
            .await;
        assert_eq!(out[0].merchant_id, Some(MerchantId(2)));
        assert_eq!(out[0].match_kind, MatchKind::Fuzzy);
        assert_eq!(out[1].clean_merchant_name, "Padaria Real");
        assert_eq!(out[1].category_id, None);
        assert_eq!(out[1].match_kind, MatchKind::None);
    }

    #[tokio::test]
    async fn fails_open_on_source_error() {
        let source = netflix_source();
        source.fail.store(true, Ordering::SeqCst);
        let categorizer = Categorizer::new(source);
        let out = categorizer
            .categorize(UserId(1), &["PIX ENVIADO 12/03 JOAO", "NETFLIX.COM"])
            .await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].clean_merchant_name, "Joao");
        assert!(out.iter().all(|r| !r.is_categorized()));
    }

    #[tokio::test]
    async fn cached_until_invalidated() {
        let source = netflix_source();
        let categorizer = Categorizer::new(Arc::clone(&source) as Arc<dyn RuleSource>);
        categorizer.categorize(UserId(1), &["X"]).await;
        categorizer.categorize(UserId(1), &["Y"]).await;
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);

        source.rules.lock().unwrap().insert(
            UserId(1),
            vec![CategoryRule {
                id: RuleId(2),
                user_id: UserId(1),
                pattern: "HULU".into(),
                clean_name: "Hulu".into(),
                category_id: Some(CategoryId(5)),
                priority: 0,
                is_recurring: true,
            }],
        );
        let before = categorizer.categorize(UserId(1), &["HULU PLUS"]).await;
        assert!(!before[0].is_categorized());

        categorizer.invalidate(UserId(1));
        let after = categorizer.categorize(UserId(1), &["HULU PLUS"]).await;
        assert_eq!(after[0].rule_id, Some(RuleId(2)));
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn system_merchant_change_reaches_every_user() {
        let source = netflix_source();
        let categorizer = Categorizer::new(Arc::clone(&source) as Arc<dyn RuleSource>);
        for user in [UserId(1), UserId(2)] {
            let out = categorizer.categorize(user, &["IFOOD PEDIDO"]).await;
            assert!(!out[0].is_categorized());
        }

        source.merchants.lock().unwrap().push(Merchant {
            id: MerchantId(3),
            owner: Owner::System,
            pattern: "IFOOD".into(),
            clean_name: "iFood".into(),
            category_id: Some(CategoryId(8)),
            is_recurring: false,
        });
        categorizer.invalidate_all();

        for user in [UserId(1), UserId(2)] {
            let out = categorizer.categorize(user, &["IFOOD PEDIDO"]).await;
            assert_eq!(out[0].merchant_id, Some(MerchantId(3)));
        }
    }

    #[tokio::test]
    async fn suggest_uses_search_index() {
        let categorizer = Categorizer::new(netflix_source());
        let hits = categorizer
            .suggest(UserId(1), &SearchQuery::Prefix { text: "star".into() }, 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc.clean_name, "Starbucks");
    }
}
