//! Text renderers: the cheap synchronous render paths.
//!
//! Plain text wraps grapheme-by-grapheme at the constraint width; markup
//! additionally styles structural line shapes (headings, bullets, quotes,
//! fences). Both compute exact sizes from `unicode-width` measurement, so
//! a text render is also a measurement.

use std::time::Instant;

use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

use super::style::{Modifiers, Rgb, SpanStyle, StyledLine, StyledSpan};
use super::unit::{ContentClass, MeasuredSize, RenderResult, RenderableUnit};

/// Marker prefixed to output when the source buffer was head-truncated.
pub const TRUNCATION_MARKER: &str = "[…]";

/// Foreground used for fenced/code-looking lines.
const CODE_FG: Rgb = Rgb::new(180, 210, 160);

/// Cheap synchronous renderer for plain and markup content.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextRenderer;

impl TextRenderer {
    /// Render a unit at the given constraint width.
    ///
    /// Infallible: this is also the fallback path for every failed
    /// expensive render, so it must always produce output.
    pub fn render(unit: &RenderableUnit, width: u16) -> RenderResult {
        Self::render_inner(unit, width, false)
    }

    /// Render a plain-text fallback for a unit whose expensive render
    /// failed. Styling is dropped; content and measurement are exact.
    pub fn render_fallback(unit: &RenderableUnit, width: u16) -> RenderResult {
        Self::render_inner(unit, width, true)
    }

    fn render_inner(unit: &RenderableUnit, width: u16, fallback: bool) -> RenderResult {
        let start = Instant::now();
        let width = width.max(1);
        let styled = !fallback && unit.class == ContentClass::Markup;

        let mut lines = Vec::new();
        if unit.truncated {
            lines.push(StyledLine::styled(
                TRUNCATION_MARKER,
                SpanStyle::modifiers(Modifiers::DIM),
            ));
        }
        for source_line in unit.content.split('\n') {
            let style = if styled {
                markup_style(source_line)
            } else {
                SpanStyle::PLAIN
            };
            for wrapped in wrap_line(source_line, width as usize) {
                lines.push(StyledLine::styled(wrapped, style));
            }
        }

        let size = measure(&lines, width);
        RenderResult {
            lines,
            size,
            duration: start.elapsed(),
            source_len: unit.content.len(),
            source_chars: unit.content.chars().count(),
            is_complete: unit.is_complete,
            fallback,
        }
    }
}

/// Measure rendered rows: height is the row count, width the widest row.
fn measure(lines: &[StyledLine], constraint: u16) -> MeasuredSize {
    let widest = lines
        .iter()
        .map(|l| UnicodeWidthStr::width(l.text().as_str()))
        .max()
        .unwrap_or(0);
    MeasuredSize {
        width: u16::try_from(widest).unwrap_or(u16::MAX).min(constraint),
        height: u32::try_from(lines.len().max(1)).unwrap_or(u32::MAX),
    }
}

/// Style for one markup source line, chosen by its structural shape.
fn markup_style(line: &str) -> SpanStyle {
    let t = line.trim_start();
    if t.starts_with('#') {
        SpanStyle::modifiers(Modifiers::BOLD)
    } else if t.starts_with("> ") {
        SpanStyle::modifiers(Modifiers::ITALIC | Modifiers::DIM)
    } else if t.starts_with('`') {
        SpanStyle {
            fg: Some(CODE_FG),
            modifiers: Modifiers::empty(),
        }
    } else {
        SpanStyle::PLAIN
    }
}

/// Wrap one source line to the given display width.
///
/// Prefers breaking at word bounds; words wider than the whole line are
/// hard-broken grapheme by grapheme. Always yields at least one row.
fn wrap_line(line: &str, max_width: usize) -> Vec<String> {
    let max_width = max_width.max(1);
    let mut rows = Vec::new();
    let mut current = String::new();
    let mut current_width = 0usize;

    for word in line.split_word_bounds() {
        let word_width = UnicodeWidthStr::width(word);
        if current_width + word_width <= max_width {
            current.push_str(word);
            current_width += word_width;
            continue;
        }
        if word.trim().is_empty() {
            // Whitespace at the wrap point is consumed by the break.
            rows.push(std::mem::take(&mut current));
            current_width = 0;
            continue;
        }
        if word_width <= max_width {
            rows.push(std::mem::take(&mut current));
            current.push_str(word);
            current_width = word_width;
            continue;
        }
        // Oversized word: hard-break.
        for grapheme in word.graphemes(true) {
            let gw = UnicodeWidthStr::width(grapheme);
            if current_width + gw > max_width && !current.is_empty() {
                rows.push(std::mem::take(&mut current));
                current_width = 0;
            }
            current.push_str(grapheme);
            current_width += gw;
        }
    }
    rows.push(current);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(content: &str) -> RenderableUnit {
        RenderableUnit::snapshot(content, false)
    }

    #[test]
    fn test_single_line_measurement() {
        let result = TextRenderer::render(&unit("Hello"), 80);
        assert_eq!(result.size.height, 1);
        assert_eq!(result.size.width, 5);
        assert_eq!(result.lines[0].text(), "Hello");
        assert!(!result.fallback);
    }

    #[test]
    fn test_wrap_at_word_bounds() {
        let result = TextRenderer::render(&unit("alpha beta gamma"), 10);
        assert_eq!(result.size.height, 2);
        assert_eq!(result.lines[0].text(), "alpha beta");
        assert_eq!(result.lines[1].text(), "gamma");
    }

    #[test]
    fn test_hard_break_oversized_word() {
        let result = TextRenderer::render(&unit("abcdefghij"), 4);
        assert_eq!(result.size.height, 3);
        assert_eq!(result.lines[0].text(), "abcd");
        assert_eq!(result.lines[2].text(), "ij");
    }

    #[test]
    fn test_newlines_make_rows() {
        let result = TextRenderer::render(&unit("a\nb\nc"), 80);
        assert_eq!(result.size.height, 3);
    }

    #[test]
    fn test_empty_content_is_one_row() {
        let result = TextRenderer::render(&unit(""), 80);
        assert_eq!(result.size.height, 1);
    }

    #[test]
    fn test_wide_graphemes_wrap_by_display_width() {
        // Each CJK glyph is two columns wide; five fit in ten columns.
        let result = TextRenderer::render(&unit("日本語日本語"), 10);
        assert_eq!(result.size.height, 2);
    }

    #[test]
    fn test_markup_heading_is_bold() {
        let result = TextRenderer::render(&unit("# Title\nbody"), 80);
        assert_eq!(
            result.lines[0].spans[0].style.modifiers,
            Modifiers::BOLD
        );
        assert_eq!(result.lines[1].spans[0].style, SpanStyle::PLAIN);
    }

    #[test]
    fn test_truncation_marker_row() {
        let result = TextRenderer::render(&RenderableUnit::snapshot_truncated("tail", false), 80);
        assert_eq!(result.lines[0].text(), TRUNCATION_MARKER);
        assert_eq!(result.size.height, 2);
    }

    #[test]
    fn test_fallback_drops_styling() {
        let u = unit("# Title");
        let result = TextRenderer::render_fallback(&u, 80);
        assert!(result.fallback);
        assert_eq!(result.lines[0].spans[0].style, SpanStyle::PLAIN);
    }
}
