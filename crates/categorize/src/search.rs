use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tally_core::{normalize_pattern, CategoryId, CategoryRule, Merchant, Owner};

use crate::arena::MatchSource;
use crate::distance::levenshtein;

const DEFAULT_FUZZINESS: u8 = 1;
const MAX_FUZZINESS: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Pattern,
    CleanName,
    Description,
}

impl Field {
    fn boost(self) -> f64 {
        match self {
            Field::CleanName => 2.0,
            Field::Pattern => 1.5,
            Field::Description => 1.0,
        }
    }
}

/// One rule or merchant as seen by the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDoc {
    pub id: usize,
    pub source: MatchSource,
    pub pattern: String,
    pub clean_name: String,
    pub description: String,
    pub category_id: Option<CategoryId>,
    pub priority: i32,
    pub owner: Owner,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub doc: SearchDoc,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum SearchQuery {
    /// Relevance search, typo-tolerant with the default fuzziness.
    Match { text: String },
    /// Every query token is treated as a term prefix (autocomplete).
    Prefix { text: String },
    /// Relevance search with explicit fuzziness, clamped to 0..=2.
    Fuzzy { text: String, fuzziness: u8 },
    /// `+must -must_not should` terms.
    QueryString { query: String },
    /// Every document in a category.
    Category { category_id: CategoryId },
}

#[derive(Debug, Clone, Copy)]
struct Posting {
    doc: usize,
    field: Field,
    tf: u32,
}

/// Immutable inverted index over rule and merchant text. Ranking only; it
/// never decides which rule applies.
#[derive(Debug, Clone, Default)]
pub struct SearchIndex {
    docs: Vec<SearchDoc>,
    postings: HashMap<String, Vec<Posting>>,
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

impl SearchIndex {
    pub fn build(rules: &[CategoryRule], merchants: &[Merchant]) -> Self {
        let rule_docs = rules.iter().map(|r| {
            (
                MatchSource::Rule(r.id),
                &r.pattern,
                &r.clean_name,
                r.category_id,
                r.effective_priority(),
                Owner::User(r.user_id),
            )
        });
        let merchant_docs = merchants.iter().map(|m| {
            (
                MatchSource::Merchant(m.id),
                &m.pattern,
                &m.clean_name,
                m.category_id,
                m.effective_priority(),
                m.owner,
            )
        });

        let mut index = SearchIndex::default();
        for (id, (source, pattern, clean_name, category_id, priority, owner)) in
            rule_docs.chain(merchant_docs).enumerate()
        {
            let pattern = normalize_pattern(pattern);
            let doc = SearchDoc {
                id,
                source,
                description: format!("{pattern} {clean_name}"),
                pattern,
                clean_name: clean_name.clone(),
                category_id,
                priority,
                owner,
            };
            index.add(&doc);
            index.docs.push(doc);
        }
        index
    }

    fn add(&mut self, doc: &SearchDoc) {
        for (field, text) in [
            (Field::Pattern, &doc.pattern),
            (Field::CleanName, &doc.clean_name),
            (Field::Description, &doc.description),
        ] {
            let mut counts: HashMap<String, u32> = HashMap::new();
            for token in tokenize(text) {
                *counts.entry(token).or_default() += 1;
            }
            for (term, tf) in counts {
                self.postings.entry(term).or_default().push(Posting {
                    doc: doc.id,
                    field,
                    tf,
                });
            }
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn idf(&self, term: &str) -> f64 {
        let df = self
            .postings
            .get(term)
            .map(|p| p.iter().map(|p| p.doc).collect::<HashSet<_>>().len())
            .unwrap_or(0);
        if df == 0 {
            return 0.0;
        }
        (1.0 + self.docs.len() as f64 / df as f64).ln()
    }

    /// Vocabulary terms matching `token`, with a weight per term.
    fn expand(&self, token: &str, fuzziness: u8, prefix: bool) -> Vec<(&str, f64)> {
        if prefix {
            return self
                .postings
                .keys()
                .filter(|term| term.starts_with(token))
                .map(|term| (term.as_str(), 1.0))
                .collect();
        }
        if fuzziness == 0 {
            return self
                .postings
                .get_key_value(token)
                .map(|(term, _)| vec![(term.as_str(), 1.0)])
                .unwrap_or_default();
        }
        self.postings
            .keys()
            .filter_map(|term| {
                let d = levenshtein(token, term);
                (d <= fuzziness as usize).then(|| (term.as_str(), 1.0 / (1.0 + d as f64)))
            })
            .collect()
    }

    /// Adds the boosted TF-IDF contribution of `term` to `scores`.
    fn accumulate(&self, term: &str, weight: f64, scores: &mut HashMap<usize, f64>) {
        let idf = self.idf(term);
        if let Some(postings) = self.postings.get(term) {
            for p in postings {
                *scores.entry(p.doc).or_default() +=
                    weight * idf * (p.tf as f64).sqrt() * p.field.boost();
            }
        }
    }

    fn docs_with(&self, term: &str) -> HashSet<usize> {
        self.postings
            .get(term)
            .map(|p| p.iter().map(|p| p.doc).collect())
            .unwrap_or_default()
    }

    fn relevance(&self, text: &str, fuzziness: u8, prefix: bool) -> HashMap<usize, f64> {
        let mut scores = HashMap::new();
        for token in tokenize(text) {
            for (term, weight) in self.expand(&token, fuzziness, prefix) {
                self.accumulate(term, weight, &mut scores);
            }
        }
        scores
    }

    fn query_string(&self, query: &str) -> HashMap<usize, f64> {
        let mut must = Vec::new();
        let mut must_not = Vec::new();
        let mut should = Vec::new();
        for raw in query.split_whitespace() {
            let (bucket, body) = if let Some(rest) = raw.strip_prefix('+') {
                (&mut must, rest)
            } else if let Some(rest) = raw.strip_prefix('-') {
                (&mut must_not, rest)
            } else {
                (&mut should, raw)
            };
            bucket.extend(tokenize(body));
        }

        let mut scores = HashMap::new();
        for term in must.iter().chain(&should) {
            self.accumulate(term, 1.0, &mut scores);
        }
        for term in &must {
            let allowed = self.docs_with(term);
            scores.retain(|doc, _| allowed.contains(doc));
        }
        for term in &must_not {
            let banned = self.docs_with(term);
            scores.retain(|doc, _| !banned.contains(doc));
        }
        scores
    }

    /// Ranked hits, best first: score, then priority, then document id.
    pub fn search(&self, query: &SearchQuery, limit: usize) -> Vec<SearchHit> {
        let scores = match query {
            SearchQuery::Match { text } => self.relevance(text, DEFAULT_FUZZINESS, false),
            SearchQuery::Prefix { text } => self.relevance(text, 0, true),
            SearchQuery::Fuzzy { text, fuzziness } => {
                self.relevance(text, (*fuzziness).min(MAX_FUZZINESS), false)
            }
            SearchQuery::QueryString { query } => self.query_string(query),
            SearchQuery::Category { category_id } => self
                .docs
                .iter()
                .filter(|d| d.category_id == Some(*category_id))
                .map(|d| (d.id, 1.0))
                .collect(),
        };

        let mut hits: Vec<SearchHit> = scores
            .into_iter()
            .filter(|(_, score)| *score > 0.0)
            .filter_map(|(id, score)| {
                self.docs.get(id).map(|doc| SearchHit {
                    doc: doc.clone(),
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.doc.priority.cmp(&a.doc.priority))
                .then_with(|| a.doc.id.cmp(&b.doc.id))
        });
        hits.truncate(limit);
        hits
    }

    /// Same as [`search`](Self::search) restricted to one category.
    pub fn search_in_category(
        &self,
        query: &SearchQuery,
        category_id: CategoryId,
        limit: usize,
    ) -> Vec<SearchHit> {
        let mut hits = self.search(query, usize::MAX);
        hits.retain(|h| h.doc.category_id == Some(category_id));
        hits.truncate(limit);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{MerchantId, RuleId, UserId};

    fn merchant(id: i64, pattern: &str, name: &str, category: i64) -> Merchant {
        Merchant {
            id: MerchantId(id),
            owner: Owner::System,
            pattern: pattern.to_string(),
            clean_name: name.to_string(),
            category_id: Some(CategoryId(category)),
            is_recurring: false,
        }
    }

    fn index() -> SearchIndex {
        let rules = [CategoryRule {
            id: RuleId(1),
            user_id: UserId(1),
            pattern: "%NETFLIX%".into(),
            clean_name: "Netflix".into(),
            category_id: Some(CategoryId(10)),
            priority: 0,
            is_recurring: true,
        }];
        let merchants = [
            merchant(1, "NETFLIX", "Netflix (Merchant)", 10),
            merchant(2, "SPOTIFY", "Spotify", 10),
            merchant(3, "UBER EATS", "Uber Eats", 20),
            merchant(4, "UBER TRIP", "Uber", 30),
            merchant(5, "STARBUCKS", "Starbucks Coffee", 20),
        ];
        SearchIndex::build(&rules, &merchants)
    }

    fn sources(hits: &[SearchHit]) -> Vec<MatchSource> {
        hits.iter().map(|h| h.doc.source).collect()
    }

    #[test]
    fn match_is_typo_tolerant() {
        let idx = index();
        let hits = idx.search(&SearchQuery::Match { text: "netflx".into() }, 10);
        assert_eq!(hits.len(), 2);
        // Equal text relevance: the rule's higher priority wins.
        assert_eq!(hits[0].doc.source, MatchSource::Rule(RuleId(1)));
    }

    #[test]
    fn exact_fuzziness_zero_needs_exact_term() {
        let idx = index();
        let q = SearchQuery::Fuzzy {
            text: "netflx".into(),
            fuzziness: 0,
        };
        assert!(idx.search(&q, 10).is_empty());
    }

    #[test]
    fn fuzziness_is_clamped() {
        let idx = index();
        let wide = SearchQuery::Fuzzy {
            text: "spotfy".into(),
            fuzziness: 9,
        };
        assert_eq!(
            sources(&idx.search(&wide, 10)),
            vec![MatchSource::Merchant(MerchantId(2))]
        );
    }

    #[test]
    fn prefix_autocompletes() {
        let idx = index();
        let hits = idx.search(&SearchQuery::Prefix { text: "ub".into() }, 10);
        assert_eq!(hits.len(), 2);
        let hits = idx.search(&SearchQuery::Prefix { text: "starb".into() }, 10);
        assert_eq!(sources(&hits), vec![MatchSource::Merchant(MerchantId(5))]);
    }

    #[test]
    fn query_string_must_and_must_not() {
        let idx = index();
        let hits = idx.search(
            &SearchQuery::QueryString {
                query: "+uber -eats".into(),
            },
            10,
        );
        assert_eq!(sources(&hits), vec![MatchSource::Merchant(MerchantId(4))]);
    }

    #[test]
    fn clean_name_outweighs_description() {
        let idx = index();
        // "coffee" is only in Starbucks' clean name and description.
        let hits = idx.search(&SearchQuery::Match { text: "coffee".into() }, 10);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score > 0.0);
    }

    #[test]
    fn category_filter() {
        let idx = index();
        let hits = idx.search(
            &SearchQuery::Category {
                category_id: CategoryId(20),
            },
            10,
        );
        assert_eq!(
            sources(&hits),
            vec![
                MatchSource::Merchant(MerchantId(3)),
                MatchSource::Merchant(MerchantId(5))
            ]
        );
        let hits = idx.search_in_category(
            &SearchQuery::Prefix { text: "uber".into() },
            CategoryId(30),
            10,
        );
        assert_eq!(sources(&hits), vec![MatchSource::Merchant(MerchantId(4))]);
    }

    #[test]
    fn limit_truncates() {
        let idx = index();
        assert_eq!(idx.search(&SearchQuery::Prefix { text: "".into() }, 10).len(), 0);
        let hits = idx.search(
            &SearchQuery::Category {
                category_id: CategoryId(10),
            },
            1,
        );
        assert_eq!(hits.len(), 1);
    }
}
