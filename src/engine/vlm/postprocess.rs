//! Deterministic cleanup of model output.
//!
//! Vision models occasionally ignore the prompt's formatting rules: they wrap
//! the answer in a ```` ```markdown ```` fence, emit CRLF, sprinkle zero-width
//! characters, or invent image links to files that do not exist. Each rule
//! below fixes one such quirk without touching content. Order matters: the
//! fence comes off before line endings are normalised, and blank-line
//! collapsing runs after anything that can leave empty lines behind.

use once_cell::sync::Lazy;
use regex::Regex;

type Rule = fn(&str) -> String;

const RULES: &[Rule] = &[
    strip_outer_fence,
    normalise_lines,
    drop_invisible_chars,
    drop_placeholder_images,
    collapse_blank_runs,
];

/// Clean one page of model output.
pub fn clean_page(raw: &str) -> String {
    RULES
        .iter()
        .fold(raw.to_string(), |text, rule| rule(&text))
        .trim()
        .to_string()
}

/// Join cleaned pages in order, ending with a single newline.
pub fn join_pages<I>(pages: I) -> String
where
    I: IntoIterator<Item = String>,
{
    let body = pages
        .into_iter()
        .filter(|p| !p.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("{}\n", body.trim_end())
}

static OUTER_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\r?\n(.*?)\r?\n```\s*$").expect("valid regex")
});

fn strip_outer_fence(input: &str) -> String {
    match OUTER_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

/// CRLF/CR → LF and trailing whitespace trimmed on every line.
fn normalise_lines(input: &str) -> String {
    input
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

fn drop_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{00AD}'],
        "",
    )
}

static IMAGE_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").expect("valid regex"));

const PLACEHOLDER_HOSTS: &[&str] = &[
    "example.com",
    "placeholder.com",
    "placehold.it",
    "dummyimage.com",
    "picsum.photos",
];

/// The page image is the only real image the model saw; any relative or
/// placeholder link is invented. Keep its alt text as an italic caption.
fn drop_placeholder_images(input: &str) -> String {
    IMAGE_LINK
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let alt = caps[1].trim();
            let target = caps[2].trim();
            let absolute = target.starts_with("http://") || target.starts_with("https://");
            let placeholder = PLACEHOLDER_HOSTS.iter().any(|h| target.contains(h));
            if absolute && !placeholder {
                caps[0].to_string()
            } else if alt.is_empty() {
                String::new()
            } else {
                format!("*{alt}*")
            }
        })
        .into_owned()
}

static BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

fn collapse_blank_runs(input: &str) -> String {
    BLANK_RUN.replace_all(input, "\n\n").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markdown_fence() {
        assert_eq!(clean_page("```markdown\n# Title\nBody\n```"), "# Title\nBody");
        assert_eq!(clean_page("```\n# Title\n```\n"), "# Title");
    }

    #[test]
    fn inner_code_fences_survive() {
        let page = "Intro\n\n```rust\nfn main() {}\n```\n\nOutro";
        assert_eq!(clean_page(page), page);
    }

    #[test]
    fn normalises_line_endings_and_blank_runs() {
        assert_eq!(clean_page("a  \r\nb\r\n\r\n\r\n\r\nc"), "a\nb\n\nc");
    }

    #[test]
    fn removes_invisible_characters() {
        assert_eq!(clean_page("he\u{200B}llo\u{FEFF}"), "hello");
    }

    #[test]
    fn invented_images_become_captions() {
        assert_eq!(clean_page("![Chart](chart.png)"), "*Chart*");
        assert_eq!(clean_page("![](https://example.com/x.png)"), "");
        let real = "![Fig 1](https://arxiv.org/fig1.png)";
        assert_eq!(clean_page(real), real);
    }

    #[test]
    fn join_skips_empty_pages() {
        let joined = join_pages(vec!["# One".to_string(), "  ".to_string(), "Two".to_string()]);
        assert_eq!(joined, "# One\n\nTwo\n");
    }
}
