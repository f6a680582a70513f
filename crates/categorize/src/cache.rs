use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tally_core::{CategoryRule, Merchant, UserId};
use tracing::debug;

use crate::engine::{EngineError, MatchEngine};
use crate::fuzzy::FuzzyMatcher;
use crate::search::SearchIndex;

/// Everything built from one user's rules and merchants.
pub struct UserMatchers {
    pub engine: MatchEngine,
    pub fuzzy: FuzzyMatcher,
    pub search: SearchIndex,
}

impl UserMatchers {
    pub fn build(rules: &[CategoryRule], merchants: &[Merchant]) -> Result<Self, EngineError> {
        Ok(Self {
            engine: MatchEngine::from_sources(rules, merchants)?,
            fuzzy: FuzzyMatcher::from_sources(rules, merchants),
            search: SearchIndex::build(rules, merchants),
        })
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<UserId, Arc<UserMatchers>>,
    generations: HashMap<UserId, u64>,
    /// Bumped by `invalidate_all`; part of every user's generation.
    epoch: u64,
}

impl CacheState {
    fn generation(&self, user: UserId) -> u64 {
        self.epoch + self.generations.get(&user).copied().unwrap_or(0)
    }
}

/// Per-user matcher cache. Entries live until [`invalidate`](Self::invalidate);
/// a build that raced an invalidation is returned to its caller but not stored.
#[derive(Default)]
pub struct MatcherCache {
    state: Mutex<CacheState>,
}

impl MatcherCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheState>, EngineError> {
        self.state.lock().map_err(|_| EngineError::Poisoned)
    }

    pub fn get(&self, user: UserId) -> Result<Option<Arc<UserMatchers>>, EngineError> {
        Ok(self.lock()?.entries.get(&user).cloned())
    }

    /// Returns the cached matchers for `user`, building them with `build` on a
    /// miss. The lock is not held while `build` runs.
    pub async fn get_or_build<F, Fut, E>(&self, user: UserId, build: F) -> Result<Arc<UserMatchers>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<UserMatchers, E>>,
        E: From<EngineError>,
    {
        let generation = {
            let state = self.lock()?;
            if let Some(hit) = state.entries.get(&user) {
                return Ok(Arc::clone(hit));
            }
            state.generation(user)
        };

        let built = Arc::new(build().await?);

        let mut state = self.lock()?;
        if state.generation(user) == generation {
            // Another caller may have filled the slot meanwhile; keep theirs.
            let entry = state.entries.entry(user).or_insert_with(|| Arc::clone(&built));
            debug!(%user, "matcher cache filled");
            return Ok(Arc::clone(entry));
        }
        debug!(%user, "matcher cache invalidated during build; not storing");
        Ok(built)
    }

    pub fn invalidate(&self, user: UserId) -> Result<(), EngineError> {
        let mut state = self.lock()?;
        state.entries.remove(&user);
        *state.generations.entry(user).or_default() += 1;
        debug!(%user, "matcher cache invalidated");
        Ok(())
    }

    /// Drops every user's matchers, for changes to shared data such as the
    /// system merchant catalog. Builds already in flight are not stored.
    pub fn invalidate_all(&self) -> Result<(), EngineError> {
        let mut state = self.lock()?;
        let dropped = state.entries.len();
        state.entries.clear();
        state.epoch += 1;
        debug!(dropped, "matcher cache cleared");
        Ok(())
    }

    pub fn len(&self) -> Result<usize, EngineError> {
        Ok(self.lock()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool, EngineError> {
        Ok(self.lock()?.entries.is_empty())
    }
}
