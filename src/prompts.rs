//! Centralized prompt definitions for the analysis stages
//!
//! Prompts are built here so stages stay focused on orchestration and the
//! wording can be tested and versioned in one place.

use std::fmt::Write;

use crate::backends::SearchResult;
use crate::stages::Technique;

/// Maximum number of search results shown to the fact-check synthesis prompt.
pub const MAX_RESULTS_IN_PROMPT: usize = 5;

/// Probability above which the narrative prompt carries manipulation context.
pub const NARRATIVE_CONTEXT_PROBABILITY: f64 = 0.5;

/// Role preamble shared by every stage prompt.
pub const ANALYST_ROLE: &str = "You are an expert analyst of Ukrainian-language media, \
specialising in manipulation techniques and disinformation. Respond in Ukrainian unless \
a JSON structure is requested.";

fn technique_catalogue() -> String {
    let mut out = String::new();
    for technique in Technique::ALL {
        let _ = writeln!(out, "- {}: {}", technique.as_str(), technique.description());
    }
    out
}

fn technique_list(techniques: &[Technique]) -> String {
    techniques
        .iter()
        .map(Technique::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Prompt for the LLM-based manipulation classifier.
pub fn classifier_prompt(content: &str) -> String {
    format!(
        r#"{role}

Analyze the content below for manipulation techniques.

Available techniques:
{catalogue}
Rules:
- Only include techniques clearly present in the content.
- manipulation_probability is between 0.0 (none) and 1.0 (strong manipulation).
- If nothing is detected, return probability 0.0 and an empty list.

Your response MUST be valid JSON in this exact format:
{{
  "manipulation_probability": 0.0,
  "manipulation_techniques": []
}}

Content:
{content}

Always respond with valid JSON only, no other text."#,
        role = ANALYST_ROLE,
        catalogue = technique_catalogue(),
        content = content,
    )
}

/// Prompt for narrative extraction.
///
/// Manipulation context is added only when `probability` exceeds
/// [`NARRATIVE_CONTEXT_PROBABILITY`], with or without a technique list.
pub fn narrative_prompt(content: &str, techniques: &[Technique], probability: f64) -> String {
    let context = if probability > NARRATIVE_CONTEXT_PROBABILITY {
        if techniques.is_empty() {
            format!(
                "\nManipulation detected with probability: {:.3}\n\
                 Examine the narrative for persuasive or misleading patterns.\n",
                probability
            )
        } else {
            format!(
                "\nDetected manipulation techniques: {}\nManipulation probability: {:.3}\n\
                 Examine how the narrative uses these techniques.\n",
                technique_list(techniques),
                probability
            )
        }
    } else {
        String::new()
    };

    format!(
        r#"{role}

Extract the main narrative of the content below: the core message, its key claims and
the intended emotional or logical effect. Focus on claims that can be fact-checked.
Answer in 2-3 sentences.
{context}
Content:
{content}"#,
        role = ANALYST_ROLE,
        context = context,
        content = content,
    )
}

/// Prompt asking for 2-3 line-delimited search queries.
pub fn query_generation_prompt(content: &str, narrative: Option<&str>) -> String {
    let narrative = narrative
        .filter(|n| !n.trim().is_empty())
        .map(|n| format!("\nExtracted narrative: {}", n))
        .unwrap_or_default();

    format!(
        r#"{role}

Generate 2-3 specific web search queries that would verify the factual claims in the
content below (statistics, events, dates, named assertions). Avoid opinions.
Return only the queries, one per line, without numbering or markers.

Content: {content}{narrative}"#,
        role = ANALYST_ROLE,
        content = content,
        narrative = narrative,
    )
}

/// Prompt comparing the content with gathered evidence.
pub fn fact_check_synthesis_prompt(
    content: &str,
    queries: &[String],
    results: &[SearchResult],
) -> String {
    let evidence = if results.is_empty() {
        "No search results available".to_string()
    } else {
        results
            .iter()
            .take(MAX_RESULTS_IN_PROMPT)
            .enumerate()
            .map(|(i, r)| format!("Result {}:\nURL: {}\nSnippet: {}", i + 1, r.url, r.snippet))
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    format!(
        r#"{role}

Compare the statements in the original content with the search results. State which
claims are confirmed or refuted, what evidence is missing, and cite the sources used.
Keep it concise.

Search queries used: {queries}
Number of search results: {count}

Search results:
{evidence}

Original content: {content}"#,
        role = ANALYST_ROLE,
        queries = queries.join(", "),
        count = results.len(),
        evidence = evidence,
        content = content,
    )
}

/// Upstream findings handed to the verifier.
#[derive(Debug, Clone, Copy)]
pub struct VerifierInputs<'a> {
    pub content: &'a str,
    pub probability: f64,
    pub threshold: f64,
    pub techniques: &'a [Technique],
    pub narrative: &'a str,
    pub fact_check: &'a str,
}

/// Prompt for the final verdict.
pub fn verifier_prompt(inputs: &VerifierInputs<'_>) -> String {
    format!(
        r#"{role}

Synthesize the results of the previous analysis steps into a final assessment.
Content counts as manipulative only when the probability is >= {threshold:.2} AND at least
one technique was found. List concrete false or unsupported claims as disinfo items in
the form "claim: explanation".

Your response MUST be valid JSON in this exact format:
{{
  "manipulation": false,
  "techniques": [],
  "disinfo": [],
  "explanation": "overall summary"
}}

Allowed techniques: {allowed}

Content: {content}
Manipulation probability: {probability:.3}
Manipulation techniques: [{techniques}]
Narrative: {narrative}
Fact-check results: {fact_check}

Always respond with valid JSON only, no other text."#,
        role = ANALYST_ROLE,
        threshold = inputs.threshold,
        allowed = technique_list(&Technique::ALL),
        content = inputs.content,
        probability = inputs.probability,
        techniques = technique_list(inputs.techniques),
        narrative = inputs.narrative,
        fact_check = inputs.fact_check,
    )
}
