//! Instructions sent with every page image.

/// System prompt for transcribing one rendered page to Markdown.
pub const PAGE_PROMPT: &str = r#"You convert an image of a single document page into clean Markdown.

Rules:

1. Transcribe all text faithfully, in the order a person would read it.
2. Mark up structure: one # title at most, ## and ### for sections, - and 1. for lists, keeping nesting.
3. Render tables as GFM pipe tables. Fall back to HTML only when cells span rows or columns.
4. Put code in fenced blocks with a language tag, and formulas in LaTeX ($inline$, $$display$$).
5. Leave out page numbers, running headers and footers, and purely decorative rules.
6. Reply with the Markdown only: no ```markdown fence, no commentary, no "Page X of Y"."#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_forbids_fences_and_commentary() {
        assert!(PAGE_PROMPT.contains("no ```markdown fence"));
        assert!(PAGE_PROMPT.contains("no commentary"));
    }
}
