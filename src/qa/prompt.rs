//! Prompt assembly and query classification
//!
//! Context blocks carry the originating filename, fused score, and
//! section label so the model can attribute every claim to a source
//! document.

use crate::retrieval::RankedResult;

use super::provider::ChatMessage;

/// Fixed system instruction for free-form answers
const SYSTEM_PROMPT: &str = "\
You are an expert ATS (Applicant Tracking System) assistant analyzing resumes.

Instructions:
1. Always identify candidates by their filename
2. For 'who' questions, list ALL matching candidates
3. Be specific and quote relevant information
4. If information is not found, say so clearly
5. For comparisons, create clear summaries

Keep responses concise and factual.";

/// Fixed system instruction for structured answers
const JSON_SYSTEM_PROMPT: &str =
    "You are an expert ATS system. Always respond with valid JSON.";

/// Question categories that steer the structured answer shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    SkillSearch,
    Comparison,
    Ranking,
    General,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::SkillSearch => "skill_search",
            QueryKind::Comparison => "comparison",
            QueryKind::Ranking => "ranking",
            QueryKind::General => "general",
        }
    }
}

/// Classify a question by its phrasing
pub fn classify(question: &str) -> QueryKind {
    let lower = question.to_lowercase();
    if ["who has", "which candidate", "list all"]
        .iter()
        .any(|p| lower.contains(p))
    {
        QueryKind::SkillSearch
    } else if lower.contains("compare") {
        QueryKind::Comparison
    } else if lower.contains("rank") || lower.contains("best") {
        QueryKind::Ranking
    } else {
        QueryKind::General
    }
}

/// One labeled block per retrieved chunk, in ranked order
pub fn format_context(results: &[RankedResult]) -> String {
    let blocks: Vec<String> = results
        .iter()
        .map(|r| {
            format!(
                "=== {} (Score: {:.2}) ===\nSection: {}\n{}\n",
                r.chunk.source_id, r.score, r.chunk.section, r.chunk.text
            )
        })
        .collect();
    blocks.join("\n\n")
}

/// Messages for a free-form answer
pub fn build_messages(question: &str, context: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(format!("Context:\n{}\n\nQuestion: {}", context, question)),
    ]
}

/// Messages for a structured JSON answer
///
/// Skill-search and comparison questions get an explicit shape hint;
/// other kinds only get the generic JSON instruction.
pub fn build_json_messages(question: &str, context: &str, kind: QueryKind) -> Vec<ChatMessage> {
    let shape = match kind {
        QueryKind::SkillSearch => {
            "\n\nRespond with {\"candidates\": [{\"name\", \"filename\", \"has_skill\", \"evidence\"}]}."
        }
        QueryKind::Comparison => {
            "\n\nRespond with {\"comparison\": [{\"candidate\", \"strengths\", \"experience_years\", \"key_skills\"}], \"recommendation\"}."
        }
        QueryKind::Ranking | QueryKind::General => "",
    };
    vec![
        ChatMessage::system(JSON_SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "Context:\n{}\n\nQuestion: {}\n\nProvide a structured JSON response.{}",
            context, question, shape
        )),
    ]
}
