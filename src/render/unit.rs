//! Renderable units and render results.
//!
//! A [`RenderableUnit`] is an immutable snapshot of buffered content that
//! is eligible to become styled, measured output. Content classes form a
//! closed tagged union so the renderer boundary matches exhaustively.

use std::hash::{Hash, Hasher};
use std::time::Duration;

use super::style::StyledLine;

/// Kinds of embedded-surface content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
    /// Fenced code blocks.
    Code,
    /// Display math.
    Math,
    /// Pipe tables.
    Table,
}

/// Closed set of content classes the renderer dispatches over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentClass {
    /// Unstructured text; cheap synchronous rendering.
    PlainText,
    /// Text with structural markers (headings, lists, quotes).
    Markup,
    /// Content needing a heavyweight, stateful render surface.
    EmbeddedSurface(SurfaceKind),
}

impl ContentClass {
    /// Classify a content snapshot.
    ///
    /// Heuristic: the goal is picking a render path, not parsing a
    /// grammar. Embedded classes win over markup because their cost
    /// dominates the render decision.
    pub fn classify(content: &str) -> Self {
        if content.contains("```") {
            return Self::EmbeddedSurface(SurfaceKind::Code);
        }
        if content.contains("$$") {
            return Self::EmbeddedSurface(SurfaceKind::Math);
        }
        if looks_like_table(content) {
            return Self::EmbeddedSurface(SurfaceKind::Table);
        }
        if content.lines().any(is_markup_line) {
            return Self::Markup;
        }
        Self::PlainText
    }
}

/// A pipe table needs at least a header row and a delimiter row.
fn looks_like_table(content: &str) -> bool {
    let mut piped = content
        .lines()
        .filter(|l| {
            let t = l.trim();
            t.starts_with('|') && t.ends_with('|') && t.len() > 1
        });
    piped.next().is_some() && piped.next().is_some()
}

fn is_markup_line(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with('#')
        || t.starts_with("- ")
        || t.starts_with("* ")
        || t.starts_with("> ")
        || t.starts_with("`")
        || numbered_item(t)
}

fn numbered_item(t: &str) -> bool {
    let digits: String = t.chars().take_while(char::is_ascii_digit).collect();
    !digits.is_empty() && t[digits.len()..].starts_with(". ")
}

/// A buffered content snapshot eligible for rendering.
///
/// Value type: cheap to clone, never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderableUnit {
    /// The full content snapshot.
    pub content: String,
    /// Whether the message's completion signal has been applied.
    pub is_complete: bool,
    /// Whether the source buffer head-truncated under its byte cap;
    /// rendered output carries a truncation marker row when set.
    pub truncated: bool,
    /// Content class driving renderer dispatch.
    pub class: ContentClass,
}

impl RenderableUnit {
    /// Snapshot content into a unit, classifying it.
    pub fn snapshot(content: impl Into<String>, is_complete: bool) -> Self {
        let content = content.into();
        let class = ContentClass::classify(&content);
        Self {
            content,
            is_complete,
            truncated: false,
            class,
        }
    }

    /// Snapshot content whose buffer was head-truncated.
    pub fn snapshot_truncated(content: impl Into<String>, is_complete: bool) -> Self {
        Self {
            truncated: true,
            ..Self::snapshot(content, is_complete)
        }
    }

    /// Content fingerprint for render memoization.
    ///
    /// Not cryptographic; collisions only cost a wrong cache hit on
    /// identical-by-fingerprint content, the same trade the transcript
    /// caches in the wild make.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.class.hash(&mut hasher);
        self.truncated.hash(&mut hasher);
        self.content.hash(&mut hasher);
        hasher.finish()
    }
}

/// Exact measured size of rendered output, in column/row units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasuredSize {
    /// Widest row, in columns.
    pub width: u16,
    /// Number of rows.
    pub height: u32,
}

/// Styled, measured output of one render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderResult {
    /// Rows of styled output.
    pub lines: Vec<StyledLine>,
    /// Exact measured size at the render's constraint width.
    pub size: MeasuredSize,
    /// How long the render took.
    pub duration: Duration,
    /// Byte length of the source content, for commit ordering.
    pub source_len: usize,
    /// Character count of the source content, for height prediction.
    pub source_chars: usize,
    /// Whether the source content was complete.
    pub is_complete: bool,
    /// Whether this is a plain-text fallback for a failed expensive render.
    pub fallback: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_plain() {
        assert_eq!(
            ContentClass::classify("just a sentence of chat text"),
            ContentClass::PlainText
        );
    }

    #[test]
    fn test_classify_markup() {
        assert_eq!(
            ContentClass::classify("# Heading\nbody text"),
            ContentClass::Markup
        );
        assert_eq!(
            ContentClass::classify("steps:\n1. first\n2. second"),
            ContentClass::Markup
        );
    }

    #[test]
    fn test_classify_code_fence() {
        assert_eq!(
            ContentClass::classify("look:\n```rust\nfn main() {}\n```"),
            ContentClass::EmbeddedSurface(SurfaceKind::Code)
        );
    }

    #[test]
    fn test_classify_table() {
        let table = "| a | b |\n|---|---|\n| 1 | 2 |";
        assert_eq!(
            ContentClass::classify(table),
            ContentClass::EmbeddedSurface(SurfaceKind::Table)
        );
        // One piped line is not yet a table.
        assert_eq!(ContentClass::classify("| not | yet |"), ContentClass::PlainText);
    }

    #[test]
    fn test_classify_math() {
        assert_eq!(
            ContentClass::classify("so $$x^2$$"),
            ContentClass::EmbeddedSurface(SurfaceKind::Math)
        );
    }

    #[test]
    fn test_fingerprint_distinguishes_content() {
        let a = RenderableUnit::snapshot("hello", false);
        let b = RenderableUnit::snapshot("hello!", false);
        assert_ne!(a.fingerprint(), b.fingerprint());
        // Same content, same fingerprint: prefix re-renders hit the cache.
        let c = RenderableUnit::snapshot("hello", true);
        assert_eq!(a.fingerprint(), c.fingerprint());
    }
}
