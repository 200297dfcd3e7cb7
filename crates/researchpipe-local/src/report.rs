//! Final report: context → generation → citation footer, or the templated fallback.

use crate::context::ContextBuilder;
use crate::gateway::{Generation, ProviderGateway};
use chrono::Utc;
use researchpipe_core::{ExtractedDocument, GeneratedReport, SourceCitation};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "in", "on", "at", "to", "for", "is", "are", "was", "were", "and", "or",
    "but", "of", "with", "from", "by", "about", "into", "what", "how", "why", "who", "which",
    "that", "this", "these", "those", "be", "can", "should", "will", "would", "does", "do",
];

/// Most frequent non-trivial words, ties broken by first appearance.
pub fn extract_keywords(text: &str, max_keywords: usize) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 2 && !STOP_WORDS.contains(w))
    {
        let n = counts.entry(word.to_string()).or_insert(0);
        if *n == 0 {
            order.push(word.to_string());
        }
        *n += 1;
    }
    // Stable sort keeps first-seen order among equal counts.
    order.sort_by(|a, b| counts[b].cmp(&counts[a]));
    order.truncate(max_keywords);
    order
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResearchType {
    Market,
    Competitor,
    Trend,
    Customer,
}

pub fn research_type(query: &str) -> ResearchType {
    let q = query.to_lowercase();
    if q.contains("competitor") || q.contains("competition") {
        ResearchType::Competitor
    } else if q.contains("trend") {
        ResearchType::Trend
    } else if q.contains("customer") || q.contains("consumer") {
        ResearchType::Customer
    } else {
        ResearchType::Market
    }
}

fn title_case(words: &[String]) -> String {
    words
        .iter()
        .map(|w| {
            let mut cs = w.chars();
            match cs.next() {
                Some(f) => f.to_uppercase().chain(cs).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Report used when no source could be extracted. Contains no citations.
pub fn fallback_report(query: &str) -> String {
    let keywords = extract_keywords(query, 3);
    let (topic, heading) = if keywords.is_empty() {
        (query.trim().to_string(), query.trim().to_string())
    } else {
        (keywords.join(" "), title_case(&keywords))
    };

    let (title, sections): (String, &[(&str, &str)]) = match research_type(query) {
        ResearchType::Market => (
            format!("# Market Research Analysis: {heading}"),
            &[
                ("Market Size and Growth", "Establish the current market value, historical growth rate and projected growth for the segment, broken down by region where possible."),
                ("Key Market Drivers", "Identify technological change, shifts in customer preferences, investment activity and regulation that expand or constrain demand."),
                ("Competitive Landscape", "Map the leading players, their approximate share and how concentrated the market is."),
                ("Challenges and Opportunities", "Weigh price pressure, regulatory complexity and supply constraints against expansion, differentiation and partnership opportunities."),
            ],
        ),
        ResearchType::Competitor => (
            format!("# Competitor Analysis: {heading} Industry"),
            &[
                ("Market Leaders Overview", "List the main competitors with their market position, strengths, weaknesses and recent strategic moves."),
                ("SWOT Summary", "Summarize strengths, weaknesses, opportunities and threats across the competitive set."),
                ("Differentiation Opportunities", "Look for gaps in pricing, product features, customer experience or underserved segments."),
                ("Strategic Recommendations", "Prioritize positioning choices that exploit competitor weaknesses while defending against their strengths."),
            ],
        ),
        ResearchType::Trend => (
            format!("# Trend Analysis: {heading} Industry"),
            &[
                ("Emerging Trends", "Track technology adoption, changing consumer behaviour and new business models."),
                ("Growth Drivers", "Identify which forces are accelerating change and how durable they are."),
                ("Risks and Headwinds", "Note regulatory, economic and supply-side factors that could slow adoption."),
                ("Outlook", "Outline short- and medium-term scenarios and the signals that would confirm each."),
            ],
        ),
        ResearchType::Customer => (
            format!("# Customer Segmentation Analysis: {heading} Market"),
            &[
                ("Customer Segments", "Describe the main segments by demographics, psychographics and buying behaviour."),
                ("Pain Points and Needs", "Capture the problems each segment is trying to solve and the features they prioritize."),
                ("Purchase Drivers", "Identify the price, convenience, trust and quality factors that decide purchases."),
                ("Engagement Strategy", "Match messaging, channels and offers to each segment."),
            ],
        ),
    };

    let mut out = format!(
        "{title}\n\n## Executive Summary\n\
         No sources could be retrieved for \"{}\", so this report is a research framework rather than \
         an evidence-based analysis. Add specific URLs or try again later to ground it in current data about {topic}.\n",
        query.trim()
    );
    for (heading, body) in sections {
        out.push_str(&format!("\n## {heading}\n{body}\n"));
    }
    out
}

/// Append a `## Sources` list unless the text already cites one of the assigned ids.
pub fn assemble(text: &str, citations: &[SourceCitation]) -> String {
    if citations.is_empty() {
        return text.to_string();
    }
    let cited = citations.iter().any(|c| text.contains(&format!("[{}]", c.id)));
    if cited {
        return text.to_string();
    }
    let mut out = format!("{}\n\n## Sources\n", text.trim_end());
    for c in citations {
        out.push_str(&format!("{}. [{}]({})\n", c.id, c.title, c.url));
    }
    out
}

#[derive(Debug, Clone)]
pub struct ReportGenerator {
    gateway: ProviderGateway,
    context: ContextBuilder,
}

impl ReportGenerator {
    pub fn new(gateway: ProviderGateway, context: ContextBuilder) -> Self {
        Self { gateway, context }
    }

    pub fn gateway(&self) -> &ProviderGateway {
        &self.gateway
    }

    pub async fn generate_report(
        &self,
        query: &str,
        documents: &[ExtractedDocument],
        provider_name: &str,
        cancel: &CancellationToken,
    ) -> GeneratedReport {
        if documents.is_empty() {
            tracing::warn!("no documents extracted; using fallback report");
            return GeneratedReport {
                query: query.to_string(),
                text: fallback_report(query),
                citations: Vec::new(),
                provider: None,
                fallback: true,
                generated_at: Utc::now(),
            };
        }

        let ctx = self.context.build(documents);
        let provider = self
            .gateway
            .registry()
            .resolve(provider_name)
            .map(|b| b.name().to_string());
        let text = match self.gateway.generate(provider_name, query, &ctx, cancel).await {
            Generation::Text(t) => assemble(&t, &ctx.citations),
            Generation::CredentialRequired(msg) | Generation::Failed(msg) => msg,
        };
        GeneratedReport {
            query: query.to_string(),
            text,
            citations: ctx.citations,
            provider,
            fallback: false,
            generated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use crate::gateway::ProviderRegistry;
    use researchpipe_core::{
        AuthScheme, Category, Error, GenerationBackend, Prompt, ProviderConfig, Result,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct Scripted {
        config: ProviderConfig,
        reply: &'static str,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl GenerationBackend for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }
        fn config(&self) -> &ProviderConfig {
            &self.config
        }
        async fn complete(&self, _api_key: &str, _prompt: &Prompt) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.reply.is_empty() {
                return Err(Error::Format("empty".into()));
            }
            Ok(self.reply.to_string())
        }
    }

    fn generator(reply: &'static str) -> (ReportGenerator, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = Scripted {
            config: ProviderConfig {
                name: "scripted".to_string(),
                label: "Scripted".to_string(),
                endpoint: "http://unused".to_string(),
                auth: AuthScheme::Bearer,
                credential_env: "SCRIPTED_KEY".to_string(),
                key_url: String::new(),
                model: "s".to_string(),
                max_retries: 3,
                timeout_ms: 100,
            },
            reply,
            calls: calls.clone(),
        };
        let gw = ProviderGateway::new(
            ProviderRegistry::new().register(Arc::new(backend)),
            Credentials::from_pairs([("SCRIPTED_KEY", "k")]),
            Duration::ZERO,
        );
        (ReportGenerator::new(gw, ContextBuilder::default()), calls)
    }

    fn doc(url: &str, category: Category) -> ExtractedDocument {
        let hit = researchpipe_core::SearchHit {
            title: format!("T {url}"),
            url: url.to_string(),
            snippet: String::new(),
            category,
        };
        ExtractedDocument::new(&hit, &"content ".repeat(30), 10_000).unwrap()
    }

    #[test]
    fn keywords_drop_stop_words_and_short_words() {
        let k = extract_keywords("The market for EV charging in EU: EV charging growth", 5);
        assert_eq!(k, vec!["charging", "market", "growth"]);
        assert!(extract_keywords("a an of to", 5).is_empty());
    }

    #[test]
    fn research_type_follows_query_words() {
        assert_eq!(research_type("Competitor landscape for vegan snacks"), ResearchType::Competitor);
        assert_eq!(research_type("solar trends 2025"), ResearchType::Trend);
        assert_eq!(research_type("consumer habits in pet food"), ResearchType::Customer);
        assert_eq!(research_type("coffee subscriptions"), ResearchType::Market);
    }

    #[test]
    fn fallback_heading_uses_keywords() {
        let r = fallback_report("coffee subscription boxes");
        assert!(r.starts_with("# Market Research Analysis: Coffee Subscription Boxes\n"));
        assert!(r.contains("## Executive Summary"));
        assert!(!r.contains("[1]"));
    }

    #[test]
    fn fallback_heading_falls_back_to_the_query_without_keywords() {
        let r = fallback_report("AI in EU");
        assert!(r.starts_with("# Market Research Analysis: AI in EU\n"), "{r}");
    }

    #[test]
    fn assemble_appends_sources_when_uncited() {
        let cs = vec![SourceCitation {
            id: 1,
            title: "Custom Source: example.com".to_string(),
            url: "https://example.com".to_string(),
            accessed_at: Utc::now(),
        }];
        let out = assemble("Body without markers.", &cs);
        assert!(out.ends_with(
            "\n\n## Sources\n1. [Custom Source: example.com](https://example.com)\n"
        ));
        assert_eq!(assemble("Body [1].", &cs), "Body [1].");
        assert_eq!(assemble("Body.", &[]), "Body.");
    }

    #[tokio::test]
    async fn empty_documents_never_touch_the_gateway() {
        let (g, calls) = generator("unused");
        let r = g
            .generate_report("ev charging trends", &[], "scripted", &CancellationToken::new())
            .await;
        assert!(r.fallback);
        assert!(r.citations.is_empty());
        assert!(!r.text.is_empty());
        assert!(r.text.starts_with("# Trend Analysis"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn generated_text_gets_sources_footer() {
        let (g, calls) = generator("A report with no markers.");
        let docs = vec![
            doc("https://t", Category::Trends),
            doc("https://g", Category::General),
        ];
        let r = g
            .generate_report("ev charging", &docs, "scripted", &CancellationToken::new())
            .await;
        assert!(!r.fallback);
        assert_eq!(r.provider.as_deref(), Some("scripted"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(r.citations[0].url, "https://g");
        assert!(r.text.contains("1. [T https://g](https://g)\n2. [T https://t](https://t)"));
    }

    #[tokio::test]
    async fn failed_generation_returns_the_message() {
        let (g, _) = generator("");
        let docs = vec![doc("https://g", Category::General)];
        let r = g
            .generate_report("q", &docs, "scripted", &CancellationToken::new())
            .await;
        assert!(r.text.starts_with("Error with Scripted API"));
        assert_eq!(r.citations.len(), 1);
    }
}
