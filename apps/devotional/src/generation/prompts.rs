// All LLM prompt text for devotional generation.
// Templates use `{placeholder}` markers filled in one pass before sending.

use chrono::{Datelike, NaiveDate};

use crate::models::artifact::Season;
use crate::novelty::gate::{DuplicateField, RejectionReason};

/// System prompt: enforces JSON-only output with a fixed key set.
pub const DEVOTIONAL_SYSTEM: &str =
    "You write short, original daily Christian devotionals for \"Our Night Sky\", \
    an app that connects faith with celestial observation. \
    You MUST respond with a single valid JSON object only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences.";

/// User prompt template. Replace `{date}`, `{day_of_year}`, `{season}`,
/// `{avoid_titles}`, `{avoid_scriptures}`, `{theme_ideas}` and `{corrective}`.
pub const DEVOTIONAL_PROMPT_TEMPLATE: &str = r#"Write devotional #{day_of_year} for {date} ({season} season).

Return a JSON object with this EXACT schema (no extra fields):
{
  "title": "A fresh, distinct title",
  "scriptureReference": "Book Chapter:Verse",
  "content": "A 200-400 word reflection",
  "questions": ["Reflection question one?", "Reflection question two?"],
  "prayer": "A one or two sentence prayer",
  "theme": "A short theme label"
}

CRITICAL REQUIREMENTS FOR UNIQUENESS:
1. The title must not repeat or closely resemble any prior title.
2. Choose a scripture passage that has not been used in the last three weeks.
3. Use concrete imagery and specific details; avoid cliches and stock phrasing.
4. Keep a single cohesive theme, warm, encouraging and theologically sound.
{avoid_titles}{avoid_scriptures}
THEME IDEAS FOR VARIETY (pick one that feels fresh):
{theme_ideas}
{corrective}"#;

pub const THEME_IDEAS: &[&str] = &[
    "Phases of the moon and seasons of faith",
    "Constellations and God's promises (Abraham's descendants)",
    "Planets and God's sovereignty over all creation",
    "Meteor showers and God's sudden grace",
    "The Milky Way and our place in God's vast plan",
    "Northern lights and the glory of God",
    "Eclipse events and times of spiritual testing",
    "Morning and evening star and Jesus the light",
    "Deep space and God's infinite nature",
    "Comets and life's brief journey with eternal purpose",
];

/// Everything the user prompt is built from.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub avoid_titles: Vec<String>,
    pub avoid_scriptures: Vec<String>,
    pub corrective_hint: Option<String>,
    pub attempt: u32,
}

pub fn build_prompt(date: NaiveDate, ctx: &PromptContext) -> String {
    let avoid_titles = if ctx.avoid_titles.is_empty() {
        String::new()
    } else {
        let lines: Vec<String> = ctx
            .avoid_titles
            .iter()
            .map(|t| format!("- \"{t}\""))
            .collect();
        format!("\nRecent titles to AVOID repeating:\n{}\n", lines.join("\n"))
    };

    let avoid_scriptures = if ctx.avoid_scriptures.is_empty() {
        String::new()
    } else {
        let lines: Vec<String> = ctx
            .avoid_scriptures
            .iter()
            .map(|s| format!("- {s}"))
            .collect();
        format!(
            "\nRecent scriptures used (choose something DIFFERENT):\n{}\n",
            lines.join("\n")
        )
    };

    let theme_ideas: Vec<String> = THEME_IDEAS.iter().map(|t| format!("- {t}")).collect();

    let corrective = match &ctx.corrective_hint {
        Some(hint) => format!(
            "\nATTEMPT #{}: Additional constraint due to the previous attempt: {hint}\n",
            ctx.attempt
        ),
        None => String::new(),
    };

    let date_str = date.format("%Y-%m-%d").to_string();
    let day_of_year = date.ordinal().to_string();
    let season = Season::for_date(date).to_string();
    let theme_ideas = theme_ideas.join("\n");

    fill_template(
        DEVOTIONAL_PROMPT_TEMPLATE,
        &[
            ("date", date_str.as_str()),
            ("day_of_year", day_of_year.as_str()),
            ("season", season.as_str()),
            ("avoid_titles", avoid_titles.as_str()),
            ("avoid_scriptures", avoid_scriptures.as_str()),
            ("theme_ideas", theme_ideas.as_str()),
            ("corrective", corrective.as_str()),
        ],
    )
}

/// Replaces each known `{name}` in a single left-to-right pass. Inserted
/// values are never rescanned, so history text containing a placeholder
/// stays literal. Unknown braces are copied through.
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let hit = after.find('}').and_then(|close| {
            let name = &after[..close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close))
        });
        match hit {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Targeted instruction derived from why the previous candidate was rejected.
pub fn corrective_hint(reason: &RejectionReason) -> String {
    match reason {
        RejectionReason::ExactDuplicate {
            field: DuplicateField::Title,
            ..
        } => "Your title duplicated an earlier devotional exactly. \
              Produce a completely different title."
            .to_string(),
        RejectionReason::ExactDuplicate {
            field: DuplicateField::Content,
            ..
        } => "Your reflection duplicated an earlier devotional. \
              Write an entirely new reflection with a different angle."
            .to_string(),
        RejectionReason::SimilarTitle { matched_title, .. } => format!(
            "Your title was too similar to a previous one (\"{matched_title}\"). \
             Produce a distinctly different title."
        ),
        RejectionReason::SimilarContent { .. } => {
            "Your content overlapped too closely with prior days. Use different imagery, \
             a new angle, and avoid repeating stock phrasing."
                .to_string()
        }
        RejectionReason::RecentScriptureReuse { reference, .. } => format!(
            "{reference} was used too recently. Choose a different scripture passage."
        ),
    }
}

/// Hint used when no provider produced usable output on the previous attempt.
pub const PROVIDER_FAILURE_HINT: &str =
    "The previous response could not be used. Return ONLY the JSON object \
     with every key filled in.";
