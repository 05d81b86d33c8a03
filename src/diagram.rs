//! Diagram descriptors and output formats.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;

use crate::error::ConfigError;

/// Extension of diagram source files.
pub const SOURCE_EXTENSION: &str = "puml";

/// Output format of a rendered diagram.
#[derive(clap::ValueEnum, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Svg,
    Png,
    Txt,
}

impl Format {
    pub const ALL: [Self; 3] = [Self::Svg, Self::Png, Self::Txt];

    /// Lower-case token passed to the engine and used in remote URLs.
    pub const fn token(self) -> &'static str {
        match self {
            Self::Svg => "svg",
            Self::Png => "png",
            Self::Txt => "txt",
        }
    }

    /// Conventional file suffix, including the leading dot.
    pub fn file_suffix(self) -> String {
        format!(".{}", self.token())
    }

    /// Engine flag selecting this format, e.g. `-tsvg`.
    pub fn engine_flag(self) -> String {
        format!("-t{}", self.token())
    }
}

impl FromStr for Format {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "svg" => Ok(Self::Svg),
            "png" => Ok(Self::Png),
            "txt" => Ok(Self::Txt),
            _ => Err(ConfigError::UnknownFormat(s.to_string())),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// A named diagram: one source file mapped to one rendered artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagram {
    name: String,
    source_file: PathBuf,
}

impl Diagram {
    /// Create a diagram with an explicit source file.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidName`] when the name is empty or contains
    /// a path separator.
    pub fn new(name: impl Into<String>, source_file: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            name,
            source_file: source_file.into(),
        })
    }

    /// Create a diagram whose source defaults to `<root>/<name>.puml`.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidName`] for invalid names.
    pub fn with_default_source(name: impl Into<String>, project_root: &Path) -> Result<Self, ConfigError> {
        let name = name.into();
        validate_name(&name)?;
        let source_file = project_root.join(format!("{name}.{SOURCE_EXTENSION}"));
        Ok(Self { name, source_file })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_file(&self) -> &Path {
        &self.source_file
    }
}

fn validate_name(name: &str) -> Result<(), ConfigError> {
    if name.trim().is_empty() {
        return Err(ConfigError::InvalidName(name.to_string(), "name must not be empty"));
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(ConfigError::InvalidName(
            name.to_string(),
            "name must not contain path separators",
        ));
    }
    Ok(())
}

/// Base name of a source file: everything before the final `.`.
///
/// Names without an extension are returned unchanged.
pub fn strip_extension(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(0) | None => file_name,
        Some(idx) => &file_name[..idx],
    }
}
