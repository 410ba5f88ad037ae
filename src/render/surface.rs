//! Embedded render surface backed by a `vt100` emulator.
//!
//! Embedded-surface content classes (code, math, tables) are loaded into a
//! reusable terminal-emulation grid: escape sequences resolve into styled
//! cells, the grid wraps at the constraint width, and the exact measured
//! height is read back from the screen. Surfaces are expensive to keep
//! around, which is why they live in a bounded pool and are leased per
//! render.

use std::time::Instant;

use super::style::{Modifiers, Rgb, SpanStyle, StyledLine, StyledSpan};
use super::unit::{MeasuredSize, RenderResult, RenderableUnit};
use crate::error::RenderError;

/// Grid height of a surface; embedded blocks taller than this are clamped.
const SURFACE_ROWS: u16 = 512;

/// Bytes fed to the emulator between deadline checks.
const LOAD_SLICE: usize = 4096;

/// A reusable, stateful embedded render surface.
///
/// Exactly one lease may hold a surface at a time; the pool enforces this.
pub struct RenderSurface {
    parser: vt100::Parser,
    cols: u16,
    /// Renders performed since creation (or last reset-after-fault).
    loads: u64,
}

impl std::fmt::Debug for RenderSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderSurface")
            .field("cols", &self.cols)
            .field("loads", &self.loads)
            .finish()
    }
}

impl RenderSurface {
    /// Create a blank surface wrapping at `cols` columns.
    pub fn new(cols: u16) -> Self {
        let cols = cols.max(1);
        Self {
            parser: vt100::Parser::new(SURFACE_ROWS, cols, 0),
            cols,
            loads: 0,
        }
    }

    /// Change the wrap width, clearing any loaded content.
    pub fn set_width(&mut self, cols: u16) {
        let cols = cols.max(1);
        if cols != self.cols {
            self.cols = cols;
            self.parser = vt100::Parser::new(SURFACE_ROWS, cols, 0);
        }
    }

    /// Reset to a blank state, dropping loaded content and pending state.
    pub fn reset(&mut self) {
        self.parser = vt100::Parser::new(SURFACE_ROWS, self.cols, 0);
    }

    /// Number of renders this surface has performed.
    pub const fn loads(&self) -> u64 {
        self.loads
    }

    /// Load a unit into the surface and measure it.
    ///
    /// Content is fed to the emulator in slices with the deadline checked
    /// between them; exceeding it fails with [`RenderError::Timeout`] and
    /// leaves the surface in an undefined mid-load state (the caller
    /// should treat the lease as faulted).
    pub fn load(
        &mut self,
        unit: &RenderableUnit,
        deadline: Instant,
    ) -> Result<RenderResult, RenderError> {
        let start = Instant::now();
        self.reset();

        // The emulator needs CRLF to return to column zero.
        let bytes = unit.content.replace('\n', "\r\n").into_bytes();
        for slice in bytes.chunks(LOAD_SLICE) {
            if Instant::now() > deadline {
                return Err(RenderError::Timeout {
                    waited: start.elapsed(),
                });
            }
            self.parser.process(slice);
        }
        self.loads += 1;

        let lines = self.read_rows();
        let size = MeasuredSize {
            width: lines
                .iter()
                .map(|l| {
                    u16::try_from(unicode_width::UnicodeWidthStr::width(l.text().as_str()))
                        .unwrap_or(u16::MAX)
                })
                .max()
                .unwrap_or(0)
                .min(self.cols),
            height: u32::try_from(lines.len().max(1)).unwrap_or(u32::MAX),
        };
        Ok(RenderResult {
            lines,
            size,
            duration: start.elapsed(),
            source_len: unit.content.len(),
            source_chars: unit.content.chars().count(),
            is_complete: unit.is_complete,
            fallback: false,
        })
    }

    /// Read the populated rows of the grid back as styled lines.
    fn read_rows(&self) -> Vec<StyledLine> {
        let screen = self.parser.screen();
        let mut rows: Vec<StyledLine> = Vec::new();
        let mut blank_run = 0usize;

        for row in 0..SURFACE_ROWS {
            let mut spans: Vec<StyledSpan> = Vec::new();
            let mut run = String::new();
            let mut run_style = SpanStyle::PLAIN;

            for col in 0..self.cols {
                let Some(cell) = screen.cell(row, col) else {
                    continue;
                };
                if cell.is_wide_continuation() {
                    continue;
                }
                let contents = cell.contents();
                let text = if contents.is_empty() { " " } else { contents.as_str() };
                let style = cell_style(cell);
                if style != run_style && !run.is_empty() {
                    spans.push(StyledSpan::new(std::mem::take(&mut run), run_style));
                }
                run_style = style;
                run.push_str(text);
            }
            if !run.is_empty() {
                spans.push(StyledSpan::new(run, run_style));
            }

            let line = StyledLine { spans };
            let trimmed_empty = line.text().trim().is_empty();
            rows.push(line);
            if trimmed_empty {
                blank_run += 1;
            } else {
                blank_run = 0;
            }
        }

        // Trim the trailing blank region of the grid.
        rows.truncate(rows.len() - blank_run);
        // Strip trailing padding spaces from each kept row.
        for line in &mut rows {
            if let Some(last) = line.spans.last_mut() {
                let trimmed = last.text.trim_end().to_string();
                last.text = trimmed;
            }
            while line.spans.last().is_some_and(|s| s.text.is_empty()) {
                line.spans.pop();
            }
        }
        rows
    }
}

/// Translate one emulator cell's attributes into a span style.
fn cell_style(cell: &vt100::Cell) -> SpanStyle {
    let fg = match cell.fgcolor() {
        vt100::Color::Default => None,
        vt100::Color::Rgb(r, g, b) => Some(Rgb::new(r, g, b)),
        vt100::Color::Idx(i) => Some(ansi_to_rgb(i)),
    };
    let mut modifiers = Modifiers::empty();
    if cell.bold() {
        modifiers |= Modifiers::BOLD;
    }
    if cell.italic() {
        modifiers |= Modifiers::ITALIC;
    }
    if cell.underline() {
        modifiers |= Modifiers::UNDERLINE;
    }
    SpanStyle { fg, modifiers }
}

/// Standard 16-color palette values.
const ANSI_BASE: [Rgb; 16] = [
    Rgb::new(0, 0, 0),
    Rgb::new(128, 0, 0),
    Rgb::new(0, 128, 0),
    Rgb::new(128, 128, 0),
    Rgb::new(0, 0, 128),
    Rgb::new(128, 0, 128),
    Rgb::new(0, 128, 128),
    Rgb::new(192, 192, 192),
    Rgb::new(128, 128, 128),
    Rgb::new(255, 0, 0),
    Rgb::new(0, 255, 0),
    Rgb::new(255, 255, 0),
    Rgb::new(0, 0, 255),
    Rgb::new(255, 0, 255),
    Rgb::new(0, 255, 255),
    Rgb::new(255, 255, 255),
];

/// Convert a 256-color index to RGB.
const fn ansi_to_rgb(idx: u8) -> Rgb {
    match idx {
        0..=15 => ANSI_BASE[idx as usize],
        16..=231 => {
            let i = idx - 16;
            let r = (i / 36) % 6;
            let g = (i / 6) % 6;
            let b = i % 6;
            Rgb::new(
                if r == 0 { 0 } else { r * 40 + 55 },
                if g == 0 { 0 } else { g * 40 + 55 },
                if b == 0 { 0 } else { b * 40 + 55 },
            )
        }
        232..=255 => {
            let v = (idx - 232) * 10 + 8;
            Rgb::new(v, v, v)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(10)
    }

    #[test]
    fn test_load_measures_height() {
        let mut surface = RenderSurface::new(40);
        let unit = RenderableUnit::snapshot("line one\nline two\nline three", false);
        let result = surface.load(&unit, far_deadline()).unwrap();
        assert_eq!(result.size.height, 3);
        assert_eq!(result.lines[0].text(), "line one");
    }

    #[test]
    fn test_load_wraps_at_width() {
        let mut surface = RenderSurface::new(4);
        let unit = RenderableUnit::snapshot("abcdefgh", false);
        let result = surface.load(&unit, far_deadline()).unwrap();
        assert_eq!(result.size.height, 2);
    }

    #[test]
    fn test_ansi_color_resolves_into_style() {
        let mut surface = RenderSurface::new(40);
        let unit = RenderableUnit::snapshot("\x1b[31mred\x1b[0m plain", false);
        let result = surface.load(&unit, far_deadline()).unwrap();
        let first = &result.lines[0].spans[0];
        assert_eq!(first.text, "red");
        assert_eq!(first.style.fg, Some(ansi_to_rgb(1)));
    }

    #[test]
    fn test_reset_blanks_the_surface() {
        let mut surface = RenderSurface::new(40);
        let unit = RenderableUnit::snapshot("residue", false);
        surface.load(&unit, far_deadline()).unwrap();
        surface.reset();
        let empty = RenderableUnit::snapshot("", false);
        let result = surface.load(&empty, far_deadline()).unwrap();
        assert_eq!(result.size.height, 1);
        assert!(result.lines.is_empty() || result.lines[0].text().trim().is_empty());
    }

    #[test]
    fn test_expired_deadline_times_out() {
        let mut surface = RenderSurface::new(40);
        let unit = RenderableUnit::snapshot("x".repeat(LOAD_SLICE * 2), false);
        let err = surface
            .load(&unit, Instant::now() - Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, RenderError::Timeout { .. }));
    }

    #[test]
    fn test_set_width_changes_wrap() {
        let mut surface = RenderSurface::new(80);
        surface.set_width(4);
        let unit = RenderableUnit::snapshot("abcdefgh", false);
        let result = surface.load(&unit, far_deadline()).unwrap();
        assert_eq!(result.size.height, 2);
    }
}
