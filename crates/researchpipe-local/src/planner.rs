//! Expands one research query into the per-category search plan.

use researchpipe_core::{search_categories, Category};

pub const MIN_DEPTH: usize = 1;
pub const MAX_DEPTH: usize = 10;
/// Below this depth only the general search runs.
pub const FACET_MIN_DEPTH: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedQuery {
    pub category: Category,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    /// Clamped to `MIN_DEPTH..=MAX_DEPTH`.
    pub depth: usize,
    pub results_per_category: usize,
    /// General first, then the facets in table order.
    pub queries: Vec<PlannedQuery>,
}

impl QueryPlan {
    pub fn runs_facets(&self) -> bool {
        self.depth >= FACET_MIN_DEPTH
    }

    /// How many results to request for one planned query.
    pub fn requested_for(&self, category: &Category) -> usize {
        if *category == Category::General {
            self.results_per_category * 2
        } else {
            self.results_per_category
        }
    }
}

pub fn clamp_depth(depth: usize) -> usize {
    depth.clamp(MIN_DEPTH, MAX_DEPTH)
}

pub fn plan(query: &str, depth: usize) -> QueryPlan {
    let depth = clamp_depth(depth);
    let query = query.trim();
    let queries = search_categories()
        .iter()
        .map(|c| PlannedQuery {
            category: c.category.clone(),
            query: c.query_for(query),
        })
        .collect();
    QueryPlan {
        depth,
        results_per_category: (depth / 6).max(1),
        queries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_six_queries_general_first() {
        let p = plan("electric bikes", 5);
        assert_eq!(p.queries.len(), 6);
        assert_eq!(p.queries[0].category, Category::General);
        assert_eq!(p.queries[0].query, "electric bikes");
        assert_eq!(p.queries[2].query, "electric bikes competitors SWOT analysis");
        assert_eq!(p.queries[5].category, Category::Regulatory);
    }

    #[test]
    fn depth_is_clamped_and_drives_result_counts() {
        assert_eq!(plan("q", 0).depth, 1);
        assert_eq!(plan("q", 42).depth, 10);
        assert_eq!(plan("q", 5).results_per_category, 1);
        assert_eq!(plan("q", 6).results_per_category, 1);
        assert_eq!(plan("q", 10).results_per_category, 1);
        assert_eq!(plan("q", 5).requested_for(&Category::General), 2);
        assert_eq!(plan("q", 5).requested_for(&Category::Trends), 1);
    }

    #[test]
    fn facets_only_from_depth_three() {
        assert!(!plan("q", 2).runs_facets());
        assert!(plan("q", 3).runs_facets());
    }
}
