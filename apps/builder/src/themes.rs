//! Theme Registry — derives installed theme names from the project's `package.json`.
//!
//! A theme is any `devDependencies` entry named `<prefix><theme>`, e.g.
//! `jsonresume-theme-elegant` → `elegant`. The list is computed once at startup and
//! handed to the pipeline by value; nothing here touches the network.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::BuildError;

/// A theme identifier with the package prefix stripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Theme(String);

impl Theme {
    pub fn new(name: impl Into<String>) -> Self {
        Theme(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Re-prefixes the identifier into the npm package name the renderer expects.
    pub fn package_name(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.0)
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Only the part of `package.json` the registry reads.
#[derive(Debug, Deserialize)]
struct PackageManifest {
    #[serde(default, rename = "devDependencies")]
    dev_dependencies: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct ThemeRegistry {
    prefix: String,
    themes: Vec<Theme>,
}

impl ThemeRegistry {
    pub fn new(prefix: impl Into<String>, themes: Vec<Theme>) -> Self {
        Self {
            prefix: prefix.into(),
            themes,
        }
    }

    /// Loads the registry from a `package.json` file.
    ///
    /// Key order follows the manifest (serde_json is built with `preserve_order`).
    pub fn from_manifest(path: &Path, prefix: &str) -> Result<Self, BuildError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| BuildError::Manifest(format!("cannot read {}: {e}", path.display())))?;
        Self::from_manifest_str(&raw, prefix)
            .map_err(|e| BuildError::Manifest(format!("{}: {e}", path.display())))
    }

    fn from_manifest_str(raw: &str, prefix: &str) -> Result<Self, serde_json::Error> {
        let manifest: PackageManifest = serde_json::from_str(raw)?;
        let themes = themes_from_dependencies(manifest.dev_dependencies.keys(), prefix);
        Ok(Self::new(prefix, themes))
    }

    pub fn themes(&self) -> &[Theme] {
        &self.themes
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_empty(&self) -> bool {
        self.themes.is_empty()
    }
}

/// Keeps dependency names that follow the `<prefix><theme>` convention and strips the prefix.
///
/// A name equal to the bare prefix has no theme part and is skipped.
pub fn themes_from_dependencies<I, S>(names: I, prefix: &str) -> Vec<Theme>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .filter_map(|name| {
            name.as_ref()
                .strip_prefix(prefix)
                .filter(|rest| !rest.is_empty())
                .map(Theme::new)
        })
        .collect()
}
