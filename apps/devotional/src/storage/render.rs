use crate::models::artifact::Artifact;

/// Renders the human-readable markdown companion of a persisted artifact.
pub fn render_markdown(artifact: &Artifact) -> String {
    let mut out = format!("# {}\n\n", artifact.title.trim());

    out.push_str(&format!(
        "*{} · {}*\n\n",
        artifact.date.format("%A, %B %-d, %Y"),
        artifact.season
    ));

    if let Some(reference) = non_blank(artifact.scripture_reference.as_deref()) {
        out.push_str(&format!("## Scripture\n\n{reference}\n\n"));
    }

    out.push_str(&format!("## Reflection\n\n{}\n\n", artifact.content.trim()));

    if !artifact.questions.is_empty() {
        out.push_str("## Questions\n\n");
        for question in &artifact.questions {
            out.push_str(&format!("- {}\n", question.trim()));
        }
        out.push('\n');
    }

    if let Some(prayer) = non_blank(artifact.prayer.as_deref()) {
        out.push_str(&format!("## Prayer\n\n{prayer}\n\n"));
    }

    if let Some(theme) = non_blank(artifact.theme.as_deref()) {
        out.push_str(&format!("---\n\n*Theme: {theme}*\n"));
    }

    out
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
