//! Citation numbering and the rendered research context handed to generation.

use researchpipe_core::{
    truncate_with_marker, Category, ExtractedDocument, ResearchContext, SourceCitation,
};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBuilder {
    pub excerpt_chars: usize,
    pub max_context_chars: usize,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self {
            excerpt_chars: 3_000,
            max_context_chars: 60_000,
        }
    }
}

impl ContextBuilder {
    pub fn new(excerpt_chars: usize, max_context_chars: usize) -> Self {
        Self {
            excerpt_chars,
            max_context_chars,
        }
    }

    /// Group by category precedence, number first-seen URLs from 1, render.
    ///
    /// A pure function of the input order.
    pub fn build(&self, documents: &[ExtractedDocument]) -> ResearchContext {
        let mut groups: BTreeMap<&Category, Vec<&ExtractedDocument>> = BTreeMap::new();
        for d in documents {
            groups.entry(&d.category).or_default().push(d);
        }

        let mut ids: HashMap<&str, usize> = HashMap::new();
        let mut citations: Vec<SourceCitation> = Vec::new();
        let mut out = String::new();
        let mut budget_spent = false;

        for (category, docs) in groups {
            let mut section = String::new();
            for d in docs {
                if ids.contains_key(d.url.as_str()) {
                    continue;
                }
                let id = citations.len() + 1;
                ids.insert(d.url.as_str(), id);
                citations.push(SourceCitation {
                    id,
                    title: d.title.clone(),
                    url: d.url.clone(),
                    accessed_at: d.accessed_at,
                });

                section.push_str(&format!("Source [{id}]: {}\nURL: {}\n", d.title, d.url));
                let used = out.chars().count() + section.chars().count();
                if budget_spent || used >= self.max_context_chars {
                    budget_spent = true;
                    section.push('\n');
                    continue;
                }
                let excerpt = truncate_with_marker(&d.content, self.excerpt_chars);
                section.push_str(&format!("Content: {excerpt}\n\n"));
            }
            if section.is_empty() {
                continue;
            }
            out.push_str(&category.banner());
            out.push_str("\n\n");
            out.push_str(&section);
        }

        ResearchContext {
            rendered_text: out.trim_end().to_string(),
            citations,
        }
    }
}
