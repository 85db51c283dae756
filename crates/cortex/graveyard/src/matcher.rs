use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use cortex_store::{SessionStore, StoreResult};
use cortex_types::{GraveyardConfig, GraveyardEntry, NewGraveyardEntry, SessionId};
use serde::Serialize;
use tracing::{debug, info};

use crate::normalize::{normalize_path, Normalizer};

/// A ranked graveyard hit with the signals that produced its score.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GraveyardMatch {
    pub entry_id: i64,
    pub score: f64,
    pub summary: String,
    pub reason: String,
    pub files: Vec<String>,
    pub keyword_overlap: Vec<String>,
    pub file_overlap: Vec<String>,
    pub semantic_score: f64,
    pub created_at: String,
}

/// Records failed approaches and ranks them against new failures.
pub struct Graveyard {
    store: Arc<SessionStore>,
    config: GraveyardConfig,
    normalizer: Normalizer,
}

impl Graveyard {
    pub fn new(store: Arc<SessionStore>, config: GraveyardConfig) -> Self {
        let normalizer = Normalizer::new(&config.synonyms);
        Self {
            store,
            config,
            normalizer,
        }
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Record a failed approach. Returns `None` when the graveyard is disabled.
    pub fn record_failure(
        &self,
        session_id: Option<&SessionId>,
        summary: &str,
        reason: &str,
        files: &[String],
    ) -> StoreResult<Option<i64>> {
        match self.failure_entry(session_id, summary, reason, files) {
            Some(entry) => self.store.record_graveyard_entry(&entry).map(Some),
            None => Ok(None),
        }
    }

    /// The entry [`Graveyard::record_failure`] would write, with derived
    /// keywords. `None` when the graveyard is disabled.
    pub fn failure_entry(
        &self,
        session_id: Option<&SessionId>,
        summary: &str,
        reason: &str,
        files: &[String],
    ) -> Option<NewGraveyardEntry> {
        if !self.config.enabled {
            return None;
        }
        let mut keywords = self.normalizer.keywords(summary);
        keywords.extend(self.normalizer.keywords(reason));
        Some(NewGraveyardEntry {
            session_id: session_id.cloned(),
            summary: summary.to_string(),
            reason: reason.to_string(),
            files: files.to_vec(),
            keywords: keywords.into_iter().collect(),
        })
    }

    /// Rank recorded failures against `summary` and `files`.
    ///
    /// An empty query or an empty corpus yields an empty result. The optional
    /// full-text index only narrows the candidate set; scores are always
    /// recomputed here over the shortlist.
    pub fn find_similar(
        &self,
        summary: &str,
        files: &[String],
        max_matches: Option<usize>,
    ) -> StoreResult<Vec<GraveyardMatch>> {
        if !self.config.enabled {
            return Ok(Vec::new());
        }

        let query_tokens = self.normalizer.tokenize(summary);
        let query_keywords: BTreeSet<String> = query_tokens.iter().cloned().collect();
        let query_files: BTreeSet<String> = files
            .iter()
            .filter(|f| !f.trim().is_empty())
            .map(|f| normalize_path(f))
            .collect();
        if query_tokens.is_empty() && query_files.is_empty() {
            return Ok(Vec::new());
        }

        let corpus = self.store.list_graveyard(self.config.corpus_limit)?;
        if corpus.is_empty() {
            return Ok(Vec::new());
        }
        let shortlist = self.shortlist(&corpus, &query_tokens, &query_files)?;
        let stats = CorpusStats::build(&corpus, &self.normalizer);

        let query_weight = {
            let w: f64 = query_keywords.iter().map(|t| stats.keyword_idf(t)).sum();
            if w > 0.0 {
                w
            } else {
                1.0
            }
        };
        let query_vector = stats.tfidf(&query_tokens);

        let mut scored: Vec<GraveyardMatch> = Vec::new();
        for entry in shortlist {
            let entry_keywords: BTreeSet<&str> = entry.keywords.iter().map(String::as_str).collect();
            let entry_files: BTreeSet<String> = entry.files.iter().map(|f| normalize_path(f)).collect();

            let keyword_overlap: Vec<String> = query_keywords
                .iter()
                .filter(|k| entry_keywords.contains(k.as_str()))
                .cloned()
                .collect();
            let file_overlap: Vec<String> = query_files.intersection(&entry_files).cloned().collect();

            let keyword_score =
                keyword_overlap.iter().map(|t| stats.keyword_idf(t)).sum::<f64>() / query_weight;
            let file_score = if query_files.is_empty() {
                0.0
            } else {
                file_overlap.len() as f64 / query_files.len() as f64
            };
            let entry_tokens = self
                .normalizer
                .tokenize(&format!("{} {}", entry.summary, entry.reason));
            let semantic_score = cosine(&query_vector, &stats.tfidf(&entry_tokens));

            if keyword_overlap.len() < self.config.min_keyword_overlap
                && file_overlap.is_empty()
                && semantic_score < self.config.similarity_threshold
            {
                continue;
            }

            let score = keyword_score * self.config.keyword_weight
                + file_score * self.config.file_weight
                + semantic_score * self.config.semantic_weight;
            if score < self.config.similarity_threshold {
                continue;
            }

            scored.push(GraveyardMatch {
                entry_id: entry.id,
                score,
                summary: entry.summary.clone(),
                reason: entry.reason.clone(),
                files: entry.files.clone(),
                keyword_overlap,
                file_overlap,
                semantic_score,
                created_at: entry.created_at.to_rfc3339(),
            });
        }

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.entry_id.cmp(&a.entry_id))
        });
        scored.truncate(max_matches.unwrap_or(self.config.max_matches));
        for m in &mut scored {
            m.score = round3(m.score);
            m.semantic_score = round3(m.semantic_score);
        }

        debug!(
            candidates = corpus.len(),
            matches = scored.len(),
            "graveyard query ranked"
        );
        if !scored.is_empty() {
            info!(top_entry = scored[0].entry_id, top_score = scored[0].score, "graveyard match found");
        }
        Ok(scored)
    }

    /// FTS hits plus every corpus entry sharing a file with the query.
    /// Falls back to the whole corpus when the index is absent or finds nothing.
    fn shortlist<'c>(
        &self,
        corpus: &'c [GraveyardEntry],
        query_tokens: &[String],
        query_files: &BTreeSet<String>,
    ) -> StoreResult<Vec<&'c GraveyardEntry>> {
        if query_tokens.is_empty() {
            return Ok(corpus.iter().collect());
        }
        let distinct: Vec<String> = {
            let mut seen = BTreeSet::new();
            query_tokens
                .iter()
                .filter(|t| seen.insert(t.as_str()))
                .cloned()
                .collect()
        };
        let hits = match self.store.graveyard_fts_candidates(
            &distinct,
            self.config.corpus_limit,
            self.config.candidate_limit,
        )? {
            Some(hits) if !hits.is_empty() => hits,
            _ => return Ok(corpus.iter().collect()),
        };

        let hit_ids: BTreeSet<i64> = hits.iter().map(|e| e.id).collect();
        Ok(corpus
            .iter()
            .filter(|entry| {
                hit_ids.contains(&entry.id)
                    || entry
                        .files
                        .iter()
                        .any(|f| query_files.contains(&normalize_path(f)))
            })
            .collect())
    }
}

/// Document frequencies over the full corpus. Index availability never
/// changes these.
struct CorpusStats {
    docs: usize,
    keyword_df: HashMap<String, usize>,
    token_df: HashMap<String, usize>,
}

impl CorpusStats {
    fn build(corpus: &[GraveyardEntry], normalizer: &Normalizer) -> Self {
        let mut keyword_df = HashMap::new();
        let mut token_df = HashMap::new();
        for entry in corpus {
            let keywords: BTreeSet<&String> = entry.keywords.iter().collect();
            for k in keywords {
                *keyword_df.entry(k.clone()).or_insert(0) += 1;
            }
            let tokens = normalizer.keywords(&format!("{} {}", entry.summary, entry.reason));
            for t in tokens {
                *token_df.entry(t).or_insert(0) += 1;
            }
        }
        Self {
            docs: corpus.len(),
            keyword_df,
            token_df,
        }
    }

    fn idf(&self, df: usize) -> f64 {
        ((self.docs as f64 + 1.0) / (df as f64 + 1.0)).ln() + 1.0
    }

    fn keyword_idf(&self, token: &str) -> f64 {
        self.idf(self.keyword_df.get(token).copied().unwrap_or(0))
    }

    fn tfidf(&self, tokens: &[String]) -> BTreeMap<String, f64> {
        let mut tf: BTreeMap<String, f64> = BTreeMap::new();
        for t in tokens {
            *tf.entry(t.clone()).or_insert(0.0) += 1.0;
        }
        for (token, weight) in tf.iter_mut() {
            *weight *= self.idf(self.token_df.get(token).copied().unwrap_or(0));
        }
        tf
    }
}

fn cosine(a: &BTreeMap<String, f64>, b: &BTreeMap<String, f64>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let dot: f64 = a
        .iter()
        .filter_map(|(k, va)| b.get(k).map(|vb| va * vb))
        .sum();
    let norm_a = a.values().map(|v| v * v).sum::<f64>().sqrt();
    let norm_b = b.values().map(|v| v * v).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// One-line explanation of the top match, for hook warnings.
pub fn explain(matches: &[GraveyardMatch]) -> Option<String> {
    let top = matches.first()?;
    let mut parts = vec!["Top graveyard match".to_string()];
    let summary = top.summary.trim();
    if !summary.is_empty() {
        let clipped: String = summary.chars().take(120).collect();
        parts.push(format!("summary='{clipped}'"));
    }
    parts.push(format!("score={:.3}", top.score));
    parts.push(format!("semantic={:.3}", top.semantic_score));
    if !top.keyword_overlap.is_empty() {
        let kw: Vec<&str> = top.keyword_overlap.iter().take(5).map(String::as_str).collect();
        parts.push(format!("keyword_overlap={}", kw.join(",")));
    }
    if !top.file_overlap.is_empty() {
        let files: Vec<&str> = top.file_overlap.iter().take(3).map(String::as_str).collect();
        parts.push(format!("file_overlap={}", files.join(",")));
    }
    Some(parts.join("; "))
}
