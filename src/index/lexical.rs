//! BM25 keyword index
//!
//! Okapi BM25 over lower-cased whitespace tokens, no stemming or stopword
//! removal. Scores come back as one dense vector aligned to the chunk
//! list, which is what the fusion step consumes. Negative IDF values (for
//! terms present in most documents) are floored to a fraction of the mean
//! IDF rather than zeroed, so common query terms still contribute.

use ahash::AHashMap;

use crate::corpus::ChunkRecord;

const K1: f32 = 1.5;
const B: f32 = 0.75;
const EPSILON: f32 = 0.25;

/// Term-statistics index rebuilt wholesale from the chunk list
pub struct LexicalIndex {
    chunks: Vec<ChunkRecord>,
    doc_len: Vec<f32>,
    avg_doc_len: f32,
    postings: AHashMap<String, Vec<(u32, u32)>>,
    idf: AHashMap<String, f32>,
}

impl LexicalIndex {
    pub fn empty() -> Self {
        Self {
            chunks: Vec::new(),
            doc_len: Vec::new(),
            avg_doc_len: 0.0,
            postings: AHashMap::new(),
            idf: AHashMap::new(),
        }
    }

    /// Build the index over a chunk list, replacing any previous state
    pub fn build(chunks: Vec<ChunkRecord>) -> Self {
        let n = chunks.len();
        let mut postings: AHashMap<String, Vec<(u32, u32)>> = AHashMap::new();
        let mut doc_len = Vec::with_capacity(n);

        for (doc, chunk) in chunks.iter().enumerate() {
            let mut frequencies: AHashMap<String, u32> = AHashMap::new();
            let mut length = 0u32;
            for token in tokenize(&chunk.text) {
                *frequencies.entry(token).or_insert(0) += 1;
                length += 1;
            }
            doc_len.push(length as f32);
            for (token, tf) in frequencies {
                postings.entry(token).or_default().push((doc as u32, tf));
            }
        }

        let avg_doc_len = if n > 0 {
            doc_len.iter().sum::<f32>() / n as f32
        } else {
            0.0
        };

        let idf = compute_idf(&postings, n);

        Self {
            chunks,
            doc_len,
            avg_doc_len,
            postings,
            idf,
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[ChunkRecord] {
        &self.chunks
    }

    /// Raw BM25 scores for a query, one per chunk in list order
    pub fn scores(&self, query: &str) -> Vec<f32> {
        let mut scores = vec![0.0f32; self.chunks.len()];
        if self.chunks.is_empty() {
            return scores;
        }

        for token in tokenize(query) {
            let Some(&idf) = self.idf.get(&token) else {
                continue;
            };
            let Some(postings) = self.postings.get(&token) else {
                continue;
            };
            for &(doc, tf) in postings {
                let doc = doc as usize;
                let tf = tf as f32;
                let norm = 1.0 - B + B * self.doc_len[doc] / self.avg_doc_len;
                scores[doc] += idf * (tf * (K1 + 1.0)) / (tf + K1 * norm);
            }
        }

        scores
    }

    /// Scores divided by their maximum, in [0,1]; an all-zero score set
    /// divides by 1 and stays zero
    pub fn normalized_scores(&self, query: &str) -> Vec<f32> {
        let mut scores = self.scores(query);
        let max = scores.iter().fold(0.0f32, |m, &s| m.max(s));
        if max > 0.0 {
            for s in &mut scores {
                *s /= max;
            }
        }
        scores
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace().map(|t| t.to_lowercase())
}

/// IDF per term: `ln((N - df + 0.5) / (df + 0.5))`, then negative values
/// floored to `EPSILON * mean(idf)` computed over the raw values
fn compute_idf(postings: &AHashMap<String, Vec<(u32, u32)>>, n: usize) -> AHashMap<String, f32> {
    let mut idf: AHashMap<String, f32> = AHashMap::with_capacity(postings.len());
    if n == 0 || postings.is_empty() {
        return idf;
    }

    let mut sum = 0.0f64;
    for (term, entries) in postings {
        let df = entries.len() as f64;
        let value = ((n as f64 - df + 0.5) / (df + 0.5)).ln();
        sum += value;
        idf.insert(term.clone(), value as f32);
    }

    let average = (sum / postings.len() as f64) as f32;
    let floor = EPSILON * average;
    for value in idf.values_mut() {
        if *value < 0.0 {
            *value = floor;
        }
    }

    idf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(source: &str, sequence: u32, text: &str) -> ChunkRecord {
        ChunkRecord {
            source_id: source.to_string(),
            section: "general".to_string(),
            sequence,
            text: text.to_string(),
            candidate: source.trim_end_matches(".txt").to_string(),
        }
    }

    fn sample() -> LexicalIndex {
        LexicalIndex::build(vec![
            chunk("a.txt", 0, "Python and Go experience"),
            chunk("b.txt", 0, "Senior Java developer"),
            chunk("c.txt", 0, "Go backend engineer"),
        ])
    }

    #[test]
    fn test_scores_align_to_chunk_list() {
        let index = sample();
        let scores = index.scores("java");
        assert_eq!(scores.len(), 3);
        assert_eq!(scores[0], 0.0);
        assert!(scores[1] > 0.0);
        assert_eq!(scores[2], 0.0);
    }

    #[test]
    fn test_common_term_still_contributes() {
        // "go" appears in two of three chunks; its raw IDF is negative and
        // must be floored, not zeroed
        let index = sample();
        let scores = index.scores("go");
        assert!(scores[0] > 0.0);
        assert_eq!(scores[1], 0.0);
        assert!(scores[2] > 0.0);
    }

    #[test]
    fn test_tokenization_is_case_insensitive() {
        let index = sample();
        assert_eq!(index.scores("JAVA"), index.scores("java"));
    }

    #[test]
    fn test_normalized_scores_bounded() {
        let index = sample();
        let scores = index.normalized_scores("go developer");
        assert!(scores.iter().all(|&s| (0.0..=1.0).contains(&s)));
        assert!(scores.iter().any(|&s| (s - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_no_match_normalizes_to_zeros() {
        let index = sample();
        let scores = index.normalized_scores("astronaut");
        assert_eq!(scores, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_empty_index_scores_empty() {
        let index = LexicalIndex::empty();
        assert!(index.scores("anything").is_empty());
    }

    #[test]
    fn test_repeated_query_terms_accumulate() {
        let index = sample();
        let single = index.scores("java");
        let double = index.scores("java java");
        assert!((double[1] - 2.0 * single[1]).abs() < 1e-5);
    }

    #[test]
    fn test_build_replaces_previous_state() {
        let replaced = LexicalIndex::build(vec![chunk("d.txt", 0, "Rust developer")]);
        assert_eq!(replaced.len(), 1);
        assert!(replaced.scores("rust")[0] > 0.0);
        assert!(replaced.scores("java").iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let index = sample();
        assert_eq!(index.scores("go developer"), index.scores("go developer"));
    }
}
