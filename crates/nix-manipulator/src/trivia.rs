//! Non-semantic source material: comments, line breaks, blank lines.
//!
//! Every semantic node owns two ordered trivia sequences, `before` and
//! `after`; a trivia unit belongs to exactly one owner. Attachment rules
//! live in `lower`; the two helpers here are the only way trivia reaches
//! the output, so the emit rule is written once.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Trivia {
    /// A `#` comment, stored verbatim (delimiter included). `inline` marks
    /// comments sharing a line with a preceding token.
    Comment { text: String, inline: bool },
    /// A `/* … */` comment, stored verbatim across all of its lines.
    MultilineComment { text: String },
    /// A single line break between two nodes. Containers already separate
    /// their children with newlines, so this renders as nothing.
    LineBreak,
    /// A run of two or more consecutive line breaks, collapsed.
    BlankLine,
}

impl Trivia {
    pub fn comment(text: impl Into<String>) -> Self {
        Trivia::Comment {
            text: text.into(),
            inline: false,
        }
    }

    pub fn is_inline_comment(&self) -> bool {
        matches!(self, Trivia::Comment { inline: true, .. })
    }

    pub fn is_comment(&self) -> bool {
        matches!(self, Trivia::Comment { .. } | Trivia::MultilineComment { .. })
    }

    pub fn is_layout(&self) -> bool {
        matches!(self, Trivia::LineBreak | Trivia::BlankLine)
    }

    fn raw_text(&self) -> Option<&str> {
        match self {
            Trivia::Comment { text, .. } => Some(text),
            Trivia::MultilineComment { text } => Some(text),
            _ => None,
        }
    }
}

/// Render a `before` sequence. Comments end their line; blank lines add an
/// empty line; bare line breaks are structural no-ops (the container joins
/// its children with newlines).
pub fn format_trivia(items: &[Trivia], indent: usize) -> String {
    let mut out = String::new();
    let pad = " ".repeat(indent);
    for item in items {
        match item {
            Trivia::Comment { text, .. } => {
                out.push_str(&pad);
                out.push_str(text);
                out.push('\n');
            }
            Trivia::MultilineComment { text } => {
                out.push_str(&pad);
                out.push_str(text);
                out.push('\n');
            }
            Trivia::BlankLine => out.push('\n'),
            Trivia::LineBreak => {}
        }
    }
    out
}

/// Drop the final newline of a rendered trivia block unless the sequence
/// explicitly ends in layout trivia.
pub fn trim_layout_newline(items: &[Trivia], mut rendered: String) -> String {
    if let Some(last) = items.last() {
        if !last.is_layout() && rendered.ends_with('\n') {
            rendered.pop();
        }
    }
    rendered
}

/// Append an `after` sequence to an already rendered node. A leading
/// inline comment stays on the node's line; everything else moves below.
pub fn apply_trailing(rendered: &str, after: &[Trivia], indent: usize) -> String {
    if after.is_empty() {
        return rendered.to_string();
    }

    if let Some(first @ Trivia::Comment { inline: true, .. }) = after.first() {
        let mut out = format!("{rendered} {}", first.raw_text().unwrap_or_default());
        let rest = trim_layout_newline(&after[1..], format_trivia(&after[1..], indent));
        if !rest.is_empty() {
            out.push('\n');
            out.push_str(&rest);
        }
        return out;
    }

    let rest = trim_layout_newline(after, format_trivia(after, indent));
    if rest.is_empty() {
        rendered.to_string()
    } else {
        format!("{rendered}\n{rest}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_comments_take_their_own_line() {
        let items = vec![Trivia::comment("# note"), Trivia::BlankLine];
        assert_eq!(format_trivia(&items, 2), "  # note\n\n");
    }

    #[test]
    fn line_breaks_render_as_nothing() {
        assert_eq!(format_trivia(&[Trivia::LineBreak], 0), "");
    }

    #[test]
    fn trailing_inline_comment_stays_on_the_line() {
        let after = vec![Trivia::Comment {
            text: "# here".to_string(),
            inline: true,
        }];
        assert_eq!(apply_trailing("foo = 1;", &after, 0), "foo = 1; # here");
    }

    #[test]
    fn trailing_block_comment_moves_below() {
        let after = vec![Trivia::LineBreak, Trivia::comment("# below")];
        assert_eq!(apply_trailing("foo = 1;", &after, 2), "foo = 1;\n  # below");
    }
}
