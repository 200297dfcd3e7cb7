use researchpipe_core::{Prompt, ResearchContext};

pub const SYSTEM_INSTRUCTION: &str = "\
You are a research analyst producing comprehensive market analysis.
Analyze the information provided from the gathered sources and write one detailed research report that answers the user's query.

Cover ALL of these aspects in a single response:
1. BUSINESS VIABILITY: market potential, revenue projections, risk assessment, financial metrics.
2. COMPETITOR ANALYSIS: SWOT analysis of key competitors, market positioning, competitive advantages.
3. TARGET AUDIENCE: demographic and psychographic profiles of the ideal customers.
4. CUSTOMER EXPECTATIONS: pain points, needs, feature priorities, satisfaction drivers.
5. MARKET TRENDS: industry evolution, technological shifts, growth opportunities.
6. REGULATORY & COMPLIANCE: legal requirements and compliance considerations.
7. SUPPLY CHAIN & DISTRIBUTION: supplier options, distribution channels, partnership opportunities.

Use clear section headings and bullet points where appropriate.
Cite specific facts or statistics with numbered references that match the source list.
Be objective and data-driven, and finish each section with actionable recommendations.";

const SECTION_INSTRUCTIONS: &str = "\
Based on these sources, write a comprehensive analysis that answers the research query.
Use the following sections, even when a section has little supporting information:

1. BUSINESS VIABILITY
2. COMPETITOR ANALYSIS
3. TARGET AUDIENCE
4. CUSTOMER EXPECTATIONS
5. MARKET TRENDS
6. REGULATORY & COMPLIANCE
7. SUPPLY CHAIN & DISTRIBUTION

Include relevant statistics and quantifiable data points (percentages, market shares, growth rates).
Cite sources using the [1], [2], ... format.";

pub fn build_prompt(query: &str, context: &ResearchContext) -> Prompt {
    let user = format!(
        "Research Query: {query}\n\n\
         Here are the sources gathered for this research, organized by category:\n\n\
         {}\n\n\
         {SECTION_INSTRUCTIONS}",
        context.rendered_text
    );
    Prompt {
        system: SYSTEM_INSTRUCTION.to_string(),
        user,
    }
}
