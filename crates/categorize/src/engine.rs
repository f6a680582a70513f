use std::sync::{RwLock, RwLockReadGuard};

use aho_corasick::{AhoCorasick, MatchKind};
use tally_core::{CategoryRule, Merchant};
use thiserror::Error;
use tracing::debug;

use crate::arena::{MatchResult, PatternArena};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Matcher lock poisoned")]
    Poisoned,
    #[error("Automaton build failed: {0}")]
    Build(#[from] aho_corasick::BuildError),
}

#[derive(Default)]
struct Compiled {
    automaton: Option<AhoCorasick>,
    arena: PatternArena,
}

impl Compiled {
    fn new(rules: &[CategoryRule], merchants: &[Merchant]) -> Result<Self, EngineError> {
        let arena = PatternArena::build(rules, merchants);
        let automaton = if arena.is_empty() {
            None
        } else {
            // Standard semantics so every overlapping occurrence is reported.
            Some(
                AhoCorasick::builder()
                    .match_kind(MatchKind::Standard)
                    .build(&arena.patterns)?,
            )
        };
        Ok(Self { automaton, arena })
    }

    fn find(&self, text: &str) -> Option<MatchResult> {
        let automaton = self.automaton.as_ref()?;
        let haystack = text.to_uppercase();
        automaton
            .find_overlapping_iter(&haystack)
            .filter_map(|m| self.arena.best_in(m.pattern().as_usize()))
            .max_by(|a, b| a.rank(b))
            .cloned()
    }
}

/// Exact multi-pattern matcher over rules and merchants.
///
/// One automaton pass per lookup regardless of how many patterns are loaded.
#[derive(Default)]
pub struct MatchEngine {
    inner: RwLock<Compiled>,
}

impl MatchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sources(rules: &[CategoryRule], merchants: &[Merchant]) -> Result<Self, EngineError> {
        Ok(Self {
            inner: RwLock::new(Compiled::new(rules, merchants)?),
        })
    }

    /// Replaces the pattern set. Lookups wait while the new set is swapped in.
    pub fn build(&self, rules: &[CategoryRule], merchants: &[Merchant]) -> Result<(), EngineError> {
        let compiled = Compiled::new(rules, merchants)?;
        debug!(
            patterns = compiled.arena.len(),
            entries = compiled.arena.entry_count(),
            "match engine rebuilt"
        );
        *self.inner.write().map_err(|_| EngineError::Poisoned)? = compiled;
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Compiled>, EngineError> {
        self.inner.read().map_err(|_| EngineError::Poisoned)
    }

    pub fn find(&self, text: &str) -> Result<Option<MatchResult>, EngineError> {
        Ok(self.read()?.find(text))
    }

    /// Matches many descriptions under one read lock; output order follows input.
    pub fn find_batch<S: AsRef<str>>(&self, texts: &[S]) -> Result<Vec<Option<MatchResult>>, EngineError> {
        let compiled = self.read()?;
        Ok(texts.iter().map(|t| compiled.find(t.as_ref())).collect())
    }

    /// Number of distinct (normalised) patterns in the automaton.
    pub fn pattern_count(&self) -> Result<usize, EngineError> {
        Ok(self.read()?.arena.len())
    }

    pub fn entry_count(&self) -> Result<usize, EngineError> {
        Ok(self.read()?.arena.entry_count())
    }
}
