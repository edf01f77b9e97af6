//! Single-document retrieval and brief generation.
//!
//! Everything here operates on the chunk set of exactly one document;
//! callers pass in that document's [`ChunkVector`]s and nothing else, so
//! there is no path by which another document's text reaches a prompt.
//!
//! # Ask
//!
//! 1. Score every chunk against the question vector (cosine).
//! 2. Keep chunks scoring at least `min_relevance`, best `top_k` first.
//! 3. No survivors -> [`NOT_FOUND_ANSWER`], no model call.
//! 4. Otherwise prompt with numbered excerpts; cite only those excerpts.
//!
//! # Brief
//!
//! The model is asked for JSON in the [`BriefJson`] shape. The parsed
//! result is cleaned: blank strings and empty sections are dropped, never
//! replaced with placeholders.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::embedding::{cosine_similarity, Prompt};
use crate::models::{Chunk, ChunkVector};

/// Answer returned when the document holds nothing relevant.
pub const NOT_FOUND_ANSWER: &str = "Not found in this file.";

/// Retrieval tuning.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    pub top_k: usize,
    pub min_relevance: f32,
    pub snippet_chars: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            top_k: 6,
            min_relevance: 0.25,
            snippet_chars: 240,
        }
    }
}

/// A chunk selected for grounding, with its similarity score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Source reference attached to an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Citation {
    pub doc_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AskAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
}

impl AskAnswer {
    pub fn not_found() -> Self {
        Self {
            answer: NOT_FOUND_ANSWER.to_string(),
            citations: Vec::new(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.answer == NOT_FOUND_ANSWER
    }
}

/// Rank a document's chunks against a query vector.
pub fn rank_chunks(
    query_vec: &[f32],
    candidates: Vec<ChunkVector>,
    params: &RetrievalParams,
) -> Vec<ScoredChunk> {
    let mut scored: Vec<ScoredChunk> = candidates
        .into_iter()
        .map(|cv| ScoredChunk {
            score: cosine_similarity(query_vec, &cv.vector),
            chunk: cv.chunk,
        })
        .filter(|s| s.score >= params.min_relevance)
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
    });
    scored.truncate(params.top_k);
    scored
}

const ASK_SYSTEM: &str = "You answer questions about a single tender document. \
Use only the numbered excerpts provided. If the excerpts do not contain the answer, \
reply with exactly: Not found in this file.";

/// Build the grounded question prompt.
pub fn ask_prompt(doc_name: &str, question: &str, hits: &[ScoredChunk]) -> Prompt {
    let mut user = format!("Document: {}\n\nExcerpts:\n", doc_name);
    for (i, hit) in hits.iter().enumerate() {
        match hit.chunk.page {
            Some(p) => user.push_str(&format!("[{}] (page {})\n{}\n\n", i + 1, p, hit.chunk.text)),
            None => user.push_str(&format!("[{}]\n{}\n\n", i + 1, hit.chunk.text)),
        }
    }
    user.push_str(&format!("Question: {}", question.trim()));
    Prompt {
        system: Some(ASK_SYSTEM.to_string()),
        user,
    }
}

/// Turn a model reply into an [`AskAnswer`] citing the retrieved chunks.
/// A sentinel reply (or an empty one) yields the not-found answer.
pub fn finish_answer(
    doc_name: &str,
    reply: &str,
    hits: &[ScoredChunk],
    snippet_chars: usize,
) -> AskAnswer {
    let answer = reply.trim();
    if answer.is_empty() || answer.trim_end_matches('.') == NOT_FOUND_ANSWER.trim_end_matches('.')
    {
        return AskAnswer::not_found();
    }
    AskAnswer {
        answer: answer.to_string(),
        citations: citations(doc_name, hits, snippet_chars),
    }
}

/// One citation per distinct page, in relevance order.
pub fn citations(doc_name: &str, hits: &[ScoredChunk], snippet_chars: usize) -> Vec<Citation> {
    let mut out: Vec<Citation> = Vec::new();
    for hit in hits {
        if hit.chunk.page.is_some() && out.iter().any(|c| c.page == hit.chunk.page) {
            continue;
        }
        let snippet = snippet(&hit.chunk.text, snippet_chars);
        out.push(Citation {
            doc_name: doc_name.to_string(),
            page: hit.chunk.page,
            snippet: (!snippet.is_empty()).then_some(snippet),
        });
    }
    out
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}…", cut.trim_end())
    }
}

/// Requested brief size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BriefLength {
    Short,
    Medium,
    Long,
}

impl BriefLength {
    pub fn as_str(&self) -> &'static str {
        match self {
            BriefLength::Short => "short",
            BriefLength::Medium => "medium",
            BriefLength::Long => "long",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "short" => Some(BriefLength::Short),
            "medium" => Some(BriefLength::Medium),
            "long" => Some(BriefLength::Long),
            _ => None,
        }
    }

    /// Number of leading chunks fed to the model.
    pub fn chunk_budget(&self) -> usize {
        match self {
            BriefLength::Short => 8,
            BriefLength::Medium => 16,
            BriefLength::Long => 32,
        }
    }

    fn max_items(&self) -> usize {
        match self {
            BriefLength::Short => 3,
            BriefLength::Medium => 5,
            BriefLength::Long => 10,
        }
    }
}

/// Submission details. Every field is optional; absent means the source
/// does not state it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_security: Option<String>,
}

impl Submission {
    fn is_empty(&self) -> bool {
        self.deadline.is_none() && self.method.is_none() && self.bid_security.is_none()
    }
}

/// Fixed-shape tender brief.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BriefJson {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub purpose: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_requirements: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub eligibility: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission: Option<Submission>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub risks: Vec<String>,
}

impl BriefJson {
    pub fn is_empty(&self) -> bool {
        self.purpose.is_empty()
            && self.key_requirements.is_empty()
            && self.eligibility.is_empty()
            && self.submission.is_none()
            && self.risks.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Brief {
    pub brief_json: BriefJson,
    pub markdown: String,
}

const BRIEF_SYSTEM: &str = "You summarize a single tender document. Respond with one JSON \
object and nothing else, using only these keys: purpose (array of strings), key_requirements \
(array of strings), eligibility (array of strings), submission (object with optional \
deadline, method, bid_security strings), risks (array of strings). Omit any key the document \
does not support. Never invent values.";

/// Build the brief prompt from a document's leading chunks.
pub fn brief_prompt(doc_name: &str, chunks: &[Chunk], length: BriefLength) -> Prompt {
    let mut user = format!(
        "Document: {}\nBrief length: {} (at most {} items per list)\n\nText:\n",
        doc_name,
        length.as_str(),
        length.max_items()
    );
    for chunk in chunks.iter().take(length.chunk_budget()) {
        user.push_str(&chunk.text);
        user.push_str("\n\n");
    }
    Prompt {
        system: Some(BRIEF_SYSTEM.to_string()),
        user,
    }
}

/// Parse and clean a model reply into a [`Brief`].
///
/// Tolerates prose or code fences around the JSON object. Fails when no
/// JSON object can be parsed.
pub fn parse_brief(reply: &str, length: BriefLength) -> Result<Brief> {
    let start = reply
        .find('{')
        .ok_or_else(|| anyhow!("brief reply contains no JSON object"))?;
    let end = reply
        .rfind('}')
        .filter(|e| *e > start)
        .ok_or_else(|| anyhow!("brief reply contains no JSON object"))?;
    let raw: BriefJson = serde_json::from_str(&reply[start..=end])
        .map_err(|e| anyhow!("brief reply is not valid brief JSON: {}", e))?;

    let brief_json = clean_brief(raw, length.max_items());
    let markdown = render_markdown(&brief_json);
    Ok(Brief {
        brief_json,
        markdown,
    })
}

fn clean_list(items: Vec<String>, max: usize) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .take(max)
        .collect()
}

fn clean_field(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn clean_brief(raw: BriefJson, max: usize) -> BriefJson {
    let submission = raw.submission.map(|s| Submission {
        deadline: clean_field(s.deadline),
        method: clean_field(s.method),
        bid_security: clean_field(s.bid_security),
    });
    BriefJson {
        purpose: clean_list(raw.purpose, max),
        key_requirements: clean_list(raw.key_requirements, max),
        eligibility: clean_list(raw.eligibility, max),
        submission: submission.filter(|s| !s.is_empty()),
        risks: clean_list(raw.risks, max),
    }
}

/// Render a cleaned brief as Markdown. Sections without content are
/// left out entirely.
pub fn render_markdown(brief: &BriefJson) -> String {
    let mut md = String::new();
    push_section(&mut md, "Purpose", &brief.purpose);
    push_section(&mut md, "Key requirements", &brief.key_requirements);
    push_section(&mut md, "Eligibility", &brief.eligibility);

    if let Some(sub) = &brief.submission {
        let mut lines = Vec::new();
        if let Some(d) = &sub.deadline {
            lines.push(format!("**Deadline:** {}", d));
        }
        if let Some(m) = &sub.method {
            lines.push(format!("**Method:** {}", m));
        }
        if let Some(b) = &sub.bid_security {
            lines.push(format!("**Bid security:** {}", b));
        }
        push_section(&mut md, "Submission", &lines);
    }

    push_section(&mut md, "Risks", &brief.risks);
    md.trim_end().to_string()
}

fn push_section(md: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    md.push_str(&format!("## {}\n\n", title));
    for item in items {
        md.push_str(&format!("- {}\n", item));
    }
    md.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cv(index: i64, page: Option<i64>, text: &str, vector: Vec<f32>) -> ChunkVector {
        ChunkVector {
            chunk: Chunk {
                id: format!("c{}", index),
                doc_hash: "h".to_string(),
                chunk_index: index,
                text: text.to_string(),
                page,
                offset: 0,
                hash: String::new(),
            },
            vector,
        }
    }

    #[test]
    fn rank_filters_below_threshold() {
        let params = RetrievalParams {
            top_k: 5,
            min_relevance: 0.5,
            snippet_chars: 50,
        };
        let hits = rank_chunks(
            &[1.0, 0.0],
            vec![
                cv(0, Some(1), "relevant", vec![1.0, 0.1]),
                cv(1, Some(2), "orthogonal", vec![0.0, 1.0]),
            ],
            &params,
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.text, "relevant");
    }

    #[test]
    fn rank_truncates_to_top_k_in_score_order() {
        let params = RetrievalParams {
            top_k: 2,
            min_relevance: 0.0,
            snippet_chars: 50,
        };
        let hits = rank_chunks(
            &[1.0, 0.0],
            vec![
                cv(0, None, "mid", vec![1.0, 1.0]),
                cv(1, None, "best", vec![1.0, 0.0]),
                cv(2, None, "low", vec![0.2, 1.0]),
            ],
            &params,
        );
        let texts: Vec<&str> = hits.iter().map(|h| h.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["best", "mid"]);
    }

    #[test]
    fn sentinel_reply_drops_citations() {
        let hits = vec![ScoredChunk {
            chunk: cv(0, Some(3), "text", vec![]).chunk,
            score: 0.9,
        }];
        let a = finish_answer("rfp.pdf", "Not found in this file", &hits, 50);
        assert!(a.is_not_found());
        assert!(a.citations.is_empty());
    }

    #[test]
    fn citations_dedupe_pages() {
        let hits: Vec<ScoredChunk> = [(0, 2), (1, 2), (2, 7)]
            .iter()
            .map(|(i, p)| ScoredChunk {
                chunk: cv(*i, Some(*p), "The bid security is 2 percent.", vec![]).chunk,
                score: 0.8,
            })
            .collect();
        let c = citations("rfp.pdf", &hits, 10);
        assert_eq!(c.len(), 2);
        assert_eq!(c[0].page, Some(2));
        assert_eq!(c[1].page, Some(7));
        assert_eq!(c[0].snippet.as_deref(), Some("The bid se…"));
    }

    #[test]
    fn brief_parse_strips_empty_content() {
        let reply = r#"Here you go:
```json
{"purpose": ["Road rehabilitation", " "], "key_requirements": [],
 "submission": {"deadline": "2026-05-12", "method": ""}, "risks": []}
```"#;
        let brief = parse_brief(reply, BriefLength::Medium).unwrap();
        assert_eq!(brief.brief_json.purpose, vec!["Road rehabilitation"]);
        assert!(brief.brief_json.key_requirements.is_empty());
        let sub = brief.brief_json.submission.clone().unwrap();
        assert_eq!(sub.deadline.as_deref(), Some("2026-05-12"));
        assert!(sub.method.is_none());

        let json = serde_json::to_value(&brief.brief_json).unwrap();
        assert!(json.get("key_requirements").is_none());
        assert!(json.get("risks").is_none());
        assert!(json["submission"].get("method").is_none());

        assert!(brief.markdown.contains("## Purpose"));
        assert!(brief.markdown.contains("**Deadline:** 2026-05-12"));
        assert!(!brief.markdown.contains("Risks"));
    }

    #[test]
    fn empty_submission_is_omitted() {
        let brief = parse_brief(r#"{"submission": {"method": "  "}}"#, BriefLength::Short).unwrap();
        assert!(brief.brief_json.submission.is_none());
        assert!(brief.brief_json.is_empty());
        assert_eq!(brief.markdown, "");
    }

    #[test]
    fn brief_parse_rejects_non_json() {
        assert!(parse_brief("I could not read the file.", BriefLength::Short).is_err());
    }

    #[test]
    fn brief_lists_capped_by_length() {
        let reply = r#"{"risks": ["a","b","c","d","e"]}"#;
        let brief = parse_brief(reply, BriefLength::Short).unwrap();
        assert_eq!(brief.brief_json.risks.len(), 3);
    }

    #[test]
    fn ask_prompt_numbers_excerpts_with_pages() {
        let hits = vec![ScoredChunk {
            chunk: cv(0, Some(4), "Deadline is 12 May.", vec![]).chunk,
            score: 0.7,
        }];
        let p = ask_prompt("rfp.pdf", "When is the deadline?", &hits);
        assert!(p.user.contains("[1] (page 4)"));
        assert!(p.user.ends_with("Question: When is the deadline?"));
        assert!(p.system.unwrap().contains(NOT_FOUND_ANSWER));
    }
}
