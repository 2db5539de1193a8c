use crate::error::{ComposeError, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Design tokens and the breakpoint registry a composition pass reads from.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Theme {
    /// Flat tokens: `@brand-font`, `@border-radius`, ...
    pub tokens: HashMap<String, String>,
    pub spacing: HashMap<String, String>,
    pub colors: HashMap<String, HashMap<String, String>>,
    pub opacity: HashMap<String, String>,
    /// Breakpoint name to minimum viewport width in pixels.
    pub breakpoints: BTreeMap<String, u32>,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            tokens: HashMap::new(),
            spacing: HashMap::new(),
            colors: HashMap::new(),
            opacity: HashMap::new(),
            breakpoints: default_breakpoints(),
        }
    }
}

/// The grid framework's stock breakpoints.
pub fn default_breakpoints() -> BTreeMap<String, u32> {
    [("xs", 0), ("sm", 576), ("md", 768), ("lg", 992), ("xl", 1200)]
        .into_iter()
        .map(|(name, width)| (name.to_string(), width))
        .collect()
}

impl Theme {
    /// Load a theme from a single JSON document. Missing sections fall back
    /// to their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let theme: Self = load_json(path.as_ref())?;
        debug!(
            path = %path.as_ref().display(),
            breakpoints = theme.breakpoints.len(),
            "loaded theme"
        );
        Ok(theme)
    }

    /// Load a theme split across a directory. Every file is optional:
    ///
    /// theme/
    ///   tokens.json
    ///   spacing.json
    ///   colors.json
    ///   opacity.json
    ///   breakpoints.json
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut theme = Self::default();

        if let Some(tokens) = load_optional(&dir.join("tokens.json"))? {
            theme.tokens = tokens;
        }
        if let Some(spacing) = load_optional(&dir.join("spacing.json"))? {
            theme.spacing = spacing;
        }
        if let Some(colors) = load_optional(&dir.join("colors.json"))? {
            theme.colors = colors;
        }
        if let Some(opacity) = load_optional(&dir.join("opacity.json"))? {
            theme.opacity = opacity;
        }
        if let Some(breakpoints) = load_optional(&dir.join("breakpoints.json"))? {
            theme.breakpoints = breakpoints;
        }

        debug!(dir = %dir.display(), "loaded theme directory");
        Ok(theme)
    }

    pub fn breakpoint(&self, name: &str) -> Option<u32> {
        self.breakpoints.get(name).copied()
    }
}

fn load_optional<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>> {
    if path.exists() {
        load_json(path).map(Some)
    } else {
        Ok(None)
    }
}

/// Generic JSON loader with type inference
fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let data = fs::read_to_string(path).map_err(|source| ComposeError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&data).map_err(|source| ComposeError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/theme").join(name)
    }

    #[test]
    fn default_registry_has_grid_breakpoints() {
        let theme = Theme::default();
        assert_eq!(theme.breakpoint("md"), Some(768));
        assert_eq!(theme.breakpoint("xl"), Some(1200));
        assert_eq!(theme.breakpoint("xxl"), None);
    }

    #[test]
    fn single_file_keeps_defaults_for_missing_sections() {
        let theme = Theme::load(fixture("theme.json")).expect("load theme");
        assert_eq!(theme.tokens["brand-font"], "\"Open Sans\", sans-serif");
        assert_eq!(theme.colors["blue"]["500"], "#0075B4");
        assert_eq!(theme.breakpoint("md"), Some(768));
    }

    #[test]
    fn directory_loader_overrides_breakpoints() {
        let theme = Theme::load_from_dir(fixture("split")).expect("load dir");
        assert_eq!(theme.spacing["2"], "0.5rem");
        assert_eq!(theme.breakpoint("md"), Some(800));
        assert_eq!(theme.breakpoint("sm"), None);
    }

    #[test]
    fn bad_json_is_reported_with_path() {
        let err = Theme::load(fixture("broken.json")).unwrap_err();
        assert!(matches!(err, ComposeError::Json { .. }));
        assert!(err.to_string().contains("broken.json"));
    }
}
