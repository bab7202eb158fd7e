//! Candidate Parser: turns raw provider text into a `Candidate`.
//!
//! Stage one is a strict JSON parse (after stripping code fences). Stage two
//! is best-effort extraction: a field-by-field scan of JSON that `serde_json`
//! refused (raw newlines in strings, trailing commas), or the markdown layout
//! devotionals are usually written in when the provider ignored the JSON
//! instruction. Any field filled with a placeholder is recorded so the
//! artifact says so.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::models::artifact::Candidate;

pub const PLACEHOLDER_TITLE: &str = "Daily Devotional";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStage {
    Strict,
    Extracted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCandidate {
    pub candidate: Candidate,
    pub stage: ParseStage,
    /// Names of fields that were filled with placeholders.
    pub defaulted: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("output is empty")]
    Empty,

    #[error("output looks like JSON but does not parse: {0}")]
    MalformedJson(String),

    #[error("no reflection content found")]
    MissingContent,
}

/// Lenient view of the JSON shape the prompt asks for.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Draft {
    title: Option<String>,
    #[serde(alias = "scripture_reference", alias = "scripture")]
    scripture_reference: Option<String>,
    #[serde(alias = "reflection", alias = "body")]
    content: Option<String>,
    questions: Option<Value>,
    prayer: Option<String>,
    theme: Option<String>,
}

pub fn parse_candidate(raw: &str) -> Result<ParsedCandidate, ParseError> {
    let text = strip_json_fences(raw);
    if text.is_empty() {
        return Err(ParseError::Empty);
    }

    let (draft, stage) = match parse_strict(text) {
        Ok(draft) => (draft, ParseStage::Strict),
        Err(e) => match extract_json_fields(text) {
            Some(draft) => {
                debug!("Strict JSON parse failed ({e}); recovered fields by scanning");
                (draft, ParseStage::Extracted)
            }
            None if text.starts_with('{') || text.starts_with('[') => {
                return Err(ParseError::MalformedJson(e.to_string()));
            }
            None => (extract_markdown(text), ParseStage::Extracted),
        },
    };

    finish(draft, stage)
}

/// Parses a markdown devotional (`# Title`, `## Scripture`, ...) directly,
/// skipping the JSON stages.
pub fn parse_markdown(text: &str) -> Result<ParsedCandidate, ParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }
    finish(extract_markdown(text), ParseStage::Extracted)
}

/// Parses the whole text, or failing that the outermost `{...}` span, so a
/// sentence of preamble around the object does not defeat the strict stage.
fn parse_strict(text: &str) -> Result<Draft, serde_json::Error> {
    let err = match serde_json::from_str(text) {
        Ok(draft) => return Ok(draft),
        Err(e) => e,
    };
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start && (start > 0 || end + 1 < text.len()) => {
            serde_json::from_str(&text[start..=end]).map_err(|_| err)
        }
        _ => Err(err),
    }
}

fn finish(draft: Draft, stage: ParseStage) -> Result<ParsedCandidate, ParseError> {
    let content = clean(draft.content).ok_or(ParseError::MissingContent)?;

    let mut defaulted = Vec::new();
    let title = match clean(draft.title) {
        Some(t) => strip_emphasis(&t).to_string(),
        None => {
            defaulted.push("title".to_string());
            PLACEHOLDER_TITLE.to_string()
        }
    };

    Ok(ParsedCandidate {
        candidate: Candidate {
            title,
            content,
            scripture_reference: clean(draft.scripture_reference),
            theme: clean(draft.theme),
            questions: questions_from(draft.questions),
            prayer: clean(draft.prayer),
        },
        stage,
        defaulted,
    })
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Accepts an array of strings or a single newline-separated string.
fn questions_from(value: Option<Value>) -> Vec<String> {
    let items: Vec<String> = match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => s.lines().map(str::to_string).collect(),
        _ => Vec::new(),
    };
    items
        .iter()
        .map(|q| strip_list_marker(q.trim()).to_string())
        .filter(|q| !q.is_empty())
        .collect()
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
pub fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}

// ────────────────────────────────────────────────────────────────────────────
// JSON field scan
// ────────────────────────────────────────────────────────────────────────────

/// Walks `"key": value` pairs from the first `{`, decoding strings leniently
/// (raw control characters are kept, stray commas are skipped). The first
/// value seen for a field wins. `None` when no known key is present.
fn extract_json_fields(text: &str) -> Option<Draft> {
    let mut rest = &text[text.find('{')?..];
    let mut draft = Draft::default();
    let mut found = false;

    while let Some(quote) = rest.find('"') {
        let Some((key, after)) = read_string(&rest[quote + 1..]) else {
            break;
        };
        let Some(value_src) = after.trim_start().strip_prefix(':') else {
            rest = after;
            continue;
        };
        let (value, remaining) = read_value(value_src.trim_start());
        rest = remaining;
        let Some(value) = value else {
            continue;
        };

        let slot = match key.as_str() {
            "title" => &mut draft.title,
            "scriptureReference" | "scripture_reference" | "scripture" => {
                &mut draft.scripture_reference
            }
            "content" | "reflection" | "body" => &mut draft.content,
            "prayer" => &mut draft.prayer,
            "theme" => &mut draft.theme,
            "questions" => {
                if draft.questions.is_none() {
                    draft.questions = Some(value);
                    found = true;
                }
                continue;
            }
            _ => continue,
        };
        if let Value::String(s) = value {
            if slot.is_none() {
                *slot = Some(s);
                found = true;
            }
        }
    }

    found.then_some(draft)
}

/// Reads a JSON string body up to its closing quote. `s` starts just after
/// the opening quote. `None` when the string is unterminated.
fn read_string(s: &str) -> Option<(String, &str)> {
    let mut out = String::new();
    let mut chars = s.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Some((out, &s[i + 1..])),
            '\\' => match chars.next()?.1 {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                'b' => out.push('\u{8}'),
                'f' => out.push('\u{c}'),
                'u' => {
                    let mut code = hex4(&mut chars);
                    if (0xD800..0xDC00).contains(&code) {
                        let mut look = chars.clone();
                        if let (Some((_, '\\')), Some((_, 'u'))) = (look.next(), look.next()) {
                            let low = hex4(&mut look);
                            if (0xDC00..0xE000).contains(&low) {
                                code = 0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00);
                                chars = look;
                            }
                        }
                    }
                    out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
                }
                other => out.push(other),
            },
            c => out.push(c),
        }
    }
    None
}

fn hex4(chars: &mut std::str::CharIndices<'_>) -> u32 {
    let digits: String = chars.by_ref().take(4).map(|(_, c)| c).collect();
    u32::from_str_radix(&digits, 16).unwrap_or(0xFFFD)
}

/// Reads a string or an array of strings. Other values yield `None` and
/// leave the input in place for the key scan to continue from.
fn read_value(src: &str) -> (Option<Value>, &str) {
    if let Some(body) = src.strip_prefix('"') {
        return match read_string(body) {
            Some((s, rest)) => (Some(Value::String(s)), rest),
            None => (None, ""),
        };
    }

    let Some(mut body) = src.strip_prefix('[') else {
        return (None, src);
    };
    let mut items = Vec::new();
    loop {
        body = body.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
        if let Some(after) = body.strip_prefix(']') {
            return (Some(Value::Array(items)), after);
        }
        if let Some(inner) = body.strip_prefix('"') {
            match read_string(inner) {
                Some((s, after)) => {
                    items.push(Value::String(s));
                    body = after;
                }
                None => return (Some(Value::Array(items)), ""),
            }
            continue;
        }
        // Non-string element: skip to the next separator.
        match body.find(|c: char| c == ',' || c == ']') {
            Some(i) if i > 0 => body = &body[i..],
            _ => return (Some(Value::Array(items)), body),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Markdown extraction
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Body,
    Scripture,
    Questions,
    Prayer,
    Theme,
    Ignored,
}

fn section_for(heading: &str) -> Section {
    let h = heading.to_ascii_lowercase();
    if h.contains("scripture") || h.contains("verse") {
        Section::Scripture
    } else if h.contains("question") || h.starts_with("reflect:") || h == "reflect" {
        Section::Questions
    } else if h.contains("prayer") {
        Section::Prayer
    } else if h.contains("theme") {
        Section::Theme
    } else if h.contains("reflection") || h.contains("devotional") || h.contains("meditation") {
        Section::Body
    } else {
        Section::Ignored
    }
}

/// Pulls fields out of `# Title` / `## Section` markdown, including the
/// inline `**Scripture:** ...` and `**Reflect:**` forms.
fn extract_markdown(text: &str) -> Draft {
    let mut title = None;
    let mut body: Vec<&str> = Vec::new();
    let mut scripture: Vec<&str> = Vec::new();
    let mut questions: Vec<String> = Vec::new();
    let mut prayer: Vec<&str> = Vec::new();
    let mut theme: Vec<&str> = Vec::new();
    let mut section = Section::Body;

    for line in text.lines() {
        let trimmed = line.trim();

        if let Some(h) = trimmed.strip_prefix("# ") {
            if title.is_none() {
                title = Some(h.trim().to_string());
                continue;
            }
        }
        if let Some(h) = trimmed.strip_prefix("## ").or_else(|| trimmed.strip_prefix("### ")) {
            section = section_for(h.trim());
            continue;
        }
        if let Some((label, value)) = inline_label(trimmed) {
            let labelled = section_for(label);
            if labelled != Section::Ignored {
                section = labelled;
                if !value.is_empty() {
                    match labelled {
                        Section::Body => body.push(value),
                        Section::Scripture => scripture.push(value),
                        Section::Prayer => prayer.push(value),
                        Section::Theme => theme.push(value),
                        Section::Questions => questions.push(strip_list_marker(value).to_string()),
                        Section::Ignored => {}
                    }
                    // Inline values are complete; following prose is reflection again.
                    if labelled != Section::Questions {
                        section = Section::Body;
                    }
                }
                continue;
            }
        }

        match section {
            Section::Body => body.push(line.trim_end()),
            Section::Scripture => {
                let s = trimmed.trim_start_matches('>').trim();
                if !s.is_empty() {
                    scripture.push(s);
                }
            }
            Section::Questions => {
                let q = strip_list_marker(trimmed);
                if !q.is_empty() {
                    questions.push(q.to_string());
                }
            }
            Section::Prayer => {
                if !trimmed.is_empty() {
                    prayer.push(trimmed);
                }
            }
            Section::Theme => {
                if !trimmed.is_empty() {
                    theme.push(trimmed);
                }
            }
            Section::Ignored => {}
        }
    }

    Draft {
        title,
        // The reference is the first line of the section; later lines are quoted text.
        scripture_reference: scripture.first().map(|s| strip_emphasis(s).to_string()),
        content: Some(body.join("\n").trim().to_string()),
        questions: Some(Value::Array(
            questions.into_iter().map(Value::String).collect(),
        )),
        prayer: Some(prayer.join(" ")),
        theme: theme.first().map(|t| t.to_string()),
    }
}

/// `**Label:** value` → `(label, value)`.
fn inline_label(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix("**")?;
    let end = rest.find("**")?;
    let label = rest[..end].trim().trim_end_matches(':').trim();
    let value = rest[end + 2..].trim().trim_start_matches(':').trim();
    if label.is_empty() {
        return None;
    }
    Some((label, value))
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
        return rest.trim();
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return rest.trim();
        }
    }
    line
}

fn strip_emphasis(s: &str) -> &str {
    s.trim().trim_matches('*').trim_matches('_').trim()
}
