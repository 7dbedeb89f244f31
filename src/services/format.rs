use std::fmt;
use std::path::Path;

/// Canonical image format derived from a filename extension.
///
/// `Jfif` only ever appears as table data: `resolve` normalizes `.jfif`
/// uploads to `Jpeg` before anything else sees them. Extensions we do not
/// recognize pass through as `Other` so the transform engine can surface a
/// codec-level error instead of a resolver-level one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FormatTag {
    Png,
    Jpeg,
    Jfif,
    Webp,
    Gif,
    Svg,
    Heic,
    Other(String),
}

impl FormatTag {
    /// Derive the format from a filename. Lower-cases the extension and
    /// folds the jpeg aliases (`jpg`, `jpeg`, `jfif`) into `Jpeg`.
    pub fn resolve(filename: &str) -> FormatTag {
        let ext = Path::new(filename)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "jpg" | "jpeg" | "jfif" => FormatTag::Jpeg,
            "png" => FormatTag::Png,
            "webp" => FormatTag::Webp,
            "gif" => FormatTag::Gif,
            "svg" => FormatTag::Svg,
            "heic" => FormatTag::Heic,
            other => FormatTag::Other(other.to_string()),
        }
    }

    /// Parse a client-requested target format. `jpg` is accepted as an
    /// alias for `jpeg`. Only formats that appear somewhere in the policy
    /// table parse; `gif` and `heic` are never offered as targets, so
    /// requesting them is an unsupported format, not an illegal pairing.
    pub fn parse_target(raw: &str) -> Option<FormatTag> {
        match raw.trim().to_lowercase().as_str() {
            "png" => Some(FormatTag::Png),
            "jpg" | "jpeg" => Some(FormatTag::Jpeg),
            "webp" => Some(FormatTag::Webp),
            "svg" => Some(FormatTag::Svg),
            _ => None,
        }
    }

    /// The conversion policy table. This deliberately narrows choices to
    /// conversions the product considers meaningful; it is not a codec
    /// capability matrix. Kept as data so the policy is testable on its own.
    pub fn legal_targets(&self) -> Vec<FormatTag> {
        use FormatTag::*;
        let targets: &[FormatTag] = match self {
            Png => &[Jpeg, Webp, Svg],
            Jpeg => &[Png, Webp],
            Webp => &[Png, Jpeg],
            Jfif => &[Png],
            Heic => &[Jpeg, Png],
            Svg => &[Png, Jpeg],
            Gif | Other(_) => &[Png, Jpeg, Webp],
        };
        targets.to_vec()
    }

    /// Canonical presentation token (`jpeg`, never `jpg`).
    pub fn as_str(&self) -> &str {
        match self {
            FormatTag::Png => "png",
            FormatTag::Jpeg | FormatTag::Jfif => "jpeg",
            FormatTag::Webp => "webp",
            FormatTag::Gif => "gif",
            FormatTag::Svg => "svg",
            FormatTag::Heic => "heic",
            FormatTag::Other(ext) => ext,
        }
    }

    /// File extension used for generated artifacts.
    pub fn extension(&self) -> &str {
        self.as_str()
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            FormatTag::Png => "image/png",
            FormatTag::Jpeg | FormatTag::Jfif => "image/jpeg",
            FormatTag::Webp => "image/webp",
            FormatTag::Gif => "image/gif",
            FormatTag::Svg => "image/svg+xml",
            FormatTag::Heic => "image/heic",
            FormatTag::Other(_) => "application/octet-stream",
        }
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
