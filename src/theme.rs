//! Semantic colors for CLI output.
//!
//! Colors can be disabled globally with the `--no-color` flag or the
//! `NO_COLOR` environment variable; every styling helper then returns the text
//! unchanged.

use std::sync::atomic::{AtomicBool, Ordering};

use owo_colors::OwoColorize;

static COLORS_ENABLED: AtomicBool = AtomicBool::new(true);

/// Disable all colors globally. Call this early in `main`.
pub fn disable_colors() {
    COLORS_ENABLED.store(false, Ordering::Relaxed);
    owo_colors::set_override(false);
}

pub fn colors_enabled() -> bool {
    COLORS_ENABLED.load(Ordering::Relaxed)
}

/// Semantic color categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Semantic {
    /// File paths in section headers
    File,
    TagName,
    /// Resolved timezone and its source
    Timezone,
    Warning,
    Error,
    Muted,
}

fn paint(text: &str, semantic: Semantic) -> String {
    if !colors_enabled() {
        return text.to_string();
    }
    match semantic {
        Semantic::File => text.bold().underline().to_string(),
        Semantic::TagName => text.cyan().to_string(),
        Semantic::Timezone => text.green().to_string(),
        Semantic::Warning => text.yellow().to_string(),
        Semantic::Error => text.red().bold().to_string(),
        Semantic::Muted => text.dimmed().to_string(),
    }
}

/// Styling helpers for anything displayable.
pub trait Themed: std::fmt::Display {
    fn themed(&self, semantic: Semantic) -> String {
        paint(&self.to_string(), semantic)
    }

    fn file_header(&self) -> String {
        self.themed(Semantic::File)
    }

    fn tag_name(&self) -> String {
        self.themed(Semantic::TagName)
    }

    fn timezone(&self) -> String {
        self.themed(Semantic::Timezone)
    }

    fn warning(&self) -> String {
        self.themed(Semantic::Warning)
    }

    fn error_style(&self) -> String {
        self.themed(Semantic::Error)
    }

    fn muted(&self) -> String {
        self.themed(Semantic::Muted)
    }
}

impl<T: std::fmt::Display + ?Sized> Themed for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_disabled_colors_leave_text_unchanged() {
        disable_colors();
        assert!(!colors_enabled());
        assert_eq!("DateTimeOriginal".tag_name(), "DateTimeOriginal");
        assert_eq!("UTC+8".timezone(), "UTC+8");
        assert_eq!(42.muted(), "42");
    }
}
