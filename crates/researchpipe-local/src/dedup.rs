//! Candidate set construction: exact-URL dedup, custom URLs at the head.

use researchpipe_core::SearchHit;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShuffleMode {
    /// Keep search order.
    #[default]
    Preserve,
    /// Randomize the organic tail. A seed makes the order reproducible.
    Shuffle { seed: Option<u64> },
}

/// Hits with unique URLs; user-supplied URLs first, in the order given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSet {
    hits: Vec<SearchHit>,
    custom_len: usize,
}

impl CandidateSet {
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn hits(&self) -> &[SearchHit] {
        &self.hits
    }

    /// Number of entries at the head that came from user-supplied URLs.
    pub fn custom_len(&self) -> usize {
        self.custom_len
    }

    pub fn into_hits(self) -> Vec<SearchHit> {
        self.hits
    }

    /// Order in which extraction should visit the candidates. The custom head never moves.
    pub fn into_extraction_order(mut self, mode: ShuffleMode) -> Vec<SearchHit> {
        if let ShuffleMode::Shuffle { seed } = mode {
            let mut rng = match seed {
                Some(s) => fastrand::Rng::with_seed(s),
                None => fastrand::Rng::new(),
            };
            rng.shuffle(&mut self.hits[self.custom_len..]);
        }
        self.hits
    }
}

/// Merge search hits with user URLs. The first occurrence of a URL wins; later
/// duplicates are dropped without touching the kept entry's category.
pub fn build_candidates(hits: Vec<SearchHit>, custom_urls: &[String]) -> CandidateSet {
    let mut seen: HashSet<String> = HashSet::new();
    let mut organic: Vec<SearchHit> = Vec::with_capacity(hits.len());
    for h in hits {
        if seen.insert(h.url.clone()) {
            organic.push(h);
        }
    }

    let mut head: Vec<SearchHit> = Vec::new();
    for raw in custom_urls {
        let url = raw.trim();
        if url.is_empty() || !seen.insert(url.to_string()) {
            continue;
        }
        head.push(SearchHit::custom(url));
    }

    let custom_len = head.len();
    head.extend(organic);
    CandidateSet {
        hits: head,
        custom_len,
    }
}
