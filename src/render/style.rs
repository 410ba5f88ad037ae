//! Styled output types.
//!
//! The pipeline's output is toolkit-neutral: rows of styled spans. The
//! consumer maps these onto whatever its toolkit draws with.

use bitflags::bitflags;

/// True-color RGB representation.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Rgb {
    /// Red channel (0-255)
    pub r: u8,
    /// Green channel (0-255)
    pub g: u8,
    /// Blue channel (0-255)
    pub b: u8,
}

impl Rgb {
    /// Create a new RGB color.
    #[inline]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Create from a 24-bit hex color (e.g., 0xFF5500).
    #[inline]
    pub const fn from_u32(hex: u32) -> Self {
        Self::new(
            ((hex >> 16) & 0xFF) as u8,
            ((hex >> 8) & 0xFF) as u8,
            (hex & 0xFF) as u8,
        )
    }
}

impl std::fmt::Debug for Rgb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

bitflags! {
    /// Text style modifiers, combinable with bitwise OR.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u8 {
        /// Bold text
        const BOLD = 0b0000_0001;
        /// Dim/faint text
        const DIM = 0b0000_0010;
        /// Italic text
        const ITALIC = 0b0000_0100;
        /// Underlined text
        const UNDERLINE = 0b0000_1000;
        /// Strikethrough text
        const STRIKETHROUGH = 0b0001_0000;
    }
}

/// Style applied to one span of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpanStyle {
    /// Foreground color, `None` for the toolkit default.
    pub fg: Option<Rgb>,
    /// Style modifiers.
    pub modifiers: Modifiers,
}

impl SpanStyle {
    /// The unstyled default.
    pub const PLAIN: Self = Self {
        fg: None,
        modifiers: Modifiers::empty(),
    };

    /// Style with only modifiers set.
    pub const fn modifiers(modifiers: Modifiers) -> Self {
        Self { fg: None, modifiers }
    }
}

/// A run of text sharing one style.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledSpan {
    /// The text content.
    pub text: String,
    /// The style of this run.
    pub style: SpanStyle,
}

impl StyledSpan {
    /// Create a styled span.
    pub fn new(text: impl Into<String>, style: SpanStyle) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }

    /// Create an unstyled span.
    pub fn plain(text: impl Into<String>) -> Self {
        Self::new(text, SpanStyle::PLAIN)
    }
}

/// One visual row of styled output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StyledLine {
    /// Spans making up the row, left to right.
    pub spans: Vec<StyledSpan>,
}

impl StyledLine {
    /// A line holding one unstyled span.
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            spans: vec![StyledSpan::plain(text)],
        }
    }

    /// A line holding one styled span.
    pub fn styled(text: impl Into<String>, style: SpanStyle) -> Self {
        Self {
            spans: vec![StyledSpan::new(text, style)],
        }
    }

    /// Concatenated text of the row, styles dropped.
    pub fn text(&self) -> String {
        self.spans.iter().map(|s| s.text.as_str()).collect()
    }
}
