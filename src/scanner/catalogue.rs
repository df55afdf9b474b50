//! Marker catalogue: the raw tokens the risk scanner looks for.
//!
//! Tokens are PDF name objects commonly abused for script execution, payload
//! smuggling or unwanted interactivity. They are matched as raw substrings, so
//! `/EF` also fires on `/EFOpen` and `/AA` on `/AAPL:Keywords`.

use serde::Serialize;

/// Category a marker token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarkerCategory {
    /// Scripts and automatic actions.
    ActiveContent,
    /// Files carried inside the document.
    EmbeddedResource,
    /// Interactive forms.
    Form,
    /// Launch, submit, import and rich media actions.
    OtherDangerous,
}

impl MarkerCategory {
    /// Short label used in logs.
    pub fn label(self) -> &'static str {
        match self {
            MarkerCategory::ActiveContent => "active-content",
            MarkerCategory::EmbeddedResource => "embedded-resource",
            MarkerCategory::Form => "form",
            MarkerCategory::OtherDangerous => "other-dangerous",
        }
    }
}

/// One catalogue entry: a category and its tokens in search order.
#[derive(Debug, Clone, Copy)]
pub struct MarkerGroup {
    pub category: MarkerCategory,
    pub tokens: &'static [&'static str],
}

/// Token catalogue, searched in this order.
pub const CATALOGUE: &[MarkerGroup] = &[
    MarkerGroup {
        category: MarkerCategory::ActiveContent,
        tokens: &["/JS", "/JavaScript", "/AA", "/OpenAction"],
    },
    MarkerGroup {
        category: MarkerCategory::EmbeddedResource,
        tokens: &["/EmbeddedFiles", "/EF"],
    },
    MarkerGroup {
        category: MarkerCategory::Form,
        tokens: &["/AcroForm"],
    },
    MarkerGroup {
        category: MarkerCategory::OtherDangerous,
        tokens: &["/Launch", "/SubmitForm", "/ImportData", "/RichMedia", "/XFA"],
    },
];

/// Encryption dictionary marker. Checked on its own, outside the category loop.
pub const ENCRYPTION_MARKER: &str = "/Encrypt";

/// Look up the category of a catalogue token.
pub fn category_of(token: &str) -> Option<MarkerCategory> {
    CATALOGUE
        .iter()
        .find(|group| group.tokens.contains(&token))
        .map(|group| group.category)
}
