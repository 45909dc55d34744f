//! The seam between the host attachment framework and the storage backend.
//!
//! The host owns the attachment: its set of styles and the naming pattern
//! that turns a style into a relative path. The backend only delegates to
//! these, never computes paths on its own.

use std::fmt;

/// A named variant of an attachment ("original", "thumb", ...).
///
/// The set of styles is fixed at configuration time, per attachment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Style(String);

impl Style {
    /// Create a style from its name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The style name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Style {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// The logical attachment a storage adapter acts on.
///
/// Implemented by the host framework; the adapter holds a shared reference
/// and calls back for style enumeration and naming.
pub trait Attachment: Send + Sync {
    /// Every style this attachment is configured with.
    fn styles(&self) -> Vec<Style>;

    /// The style operations default to when none is given.
    fn default_style(&self) -> Style;

    /// Interpolate the naming pattern for `style` into a relative path.
    fn path(&self, style: &Style) -> String;
}

/// Host-side registry of named URL interpolations.
///
/// The adapter registers one interpolation under
/// [`PATH_URL_INTERPOLATION`]; the host resolves it whenever it needs an
/// attachment's public URL.
pub trait InterpolationRegistry {
    /// Register `name` to resolve through `interpolate`.
    fn register(&mut self, name: &str, interpolate: Box<dyn Fn(&Style) -> String + Send + Sync>);
}

/// Name under which the adapter registers its URL interpolation.
pub const PATH_URL_INTERPOLATION: &str = "storage_path_url";
