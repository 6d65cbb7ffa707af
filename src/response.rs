use crate::types::{Error, Result};

/// The four sections every well-formed model response must carry, in the
/// order the system message asks for them.
const SECTIONS: [&str; 4] = ["Title", "Content", "Summary", "Image Prompt"];

const FALLBACK_SUMMARY_LENGTH: usize = 200;

/// The structured contract parsed out of a model's free-text reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub title: String,
    pub body: String,
    pub summary: String,
    pub image_prompt: String,
}

/// Strict parse: every marker must be present, case-sensitive, and followed
/// by non-empty content before the next marker or end of text. Markers may
/// appear in any order. Fails naming every missing or empty section.
pub fn parse_sections(text: &str) -> Result<ParsedResponse> {
    // (position, content start, section name) for every marker found.
    let mut found: Vec<(usize, usize, &str)> = Vec::new();
    for name in SECTIONS {
        let marker = format!("=== {} ===", name);
        if let Some(pos) = text.find(&marker) {
            found.push((pos, pos + marker.len(), name));
        }
    }
    found.sort_by_key(|(pos, _, _)| *pos);

    // A marker followed by nothing before the next marker is as bad as an
    // absent marker, so empty sections are simply not collected.
    let mut sections: Vec<(&str, &str)> = Vec::new();
    for (i, (_, content_start, name)) in found.iter().enumerate() {
        let end = found
            .get(i + 1)
            .map(|(pos, _, _)| *pos)
            .unwrap_or(text.len());
        let content = text[*content_start..end].trim();
        if !content.is_empty() {
            sections.push((name, content));
        }
    }

    let missing: Vec<String> = SECTIONS
        .iter()
        .filter(|name| !sections.iter().any(|(found_name, _)| found_name == *name))
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(Error::ResponseFormat { missing });
    }

    let section = |name: &str| -> String {
        sections
            .iter()
            .find(|(found_name, _)| *found_name == name)
            .map(|(_, content)| content.to_string())
            .unwrap_or_default()
    };

    Ok(ParsedResponse {
        title: section("Title"),
        body: section("Content"),
        summary: section("Summary"),
        image_prompt: section("Image Prompt"),
    })
}

/// Best-effort salvage of a malformed response: first line becomes the title,
/// the rest the body, with a synthesized summary and image prompt. Only used
/// when the caller opts in, and the caller must tag the output metadata with
/// `fallback_parsing: true`.
pub fn fallback_parse(text: &str) -> ParsedResponse {
    let trimmed = text.trim();
    let (title, body) = match trimmed.split_once('\n') {
        Some((first, rest)) => (first.trim().to_string(), rest.trim().to_string()),
        None => (trimmed.to_string(), trimmed.to_string()),
    };

    let summary = if body.chars().count() > FALLBACK_SUMMARY_LENGTH {
        let cut: String = body.chars().take(FALLBACK_SUMMARY_LENGTH).collect();
        format!("{}...", cut)
    } else {
        body.clone()
    };

    ParsedResponse {
        image_prompt: format!("A news-style illustration representing: {}", title),
        title,
        body,
        summary,
    }
}
