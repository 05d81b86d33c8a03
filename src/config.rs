use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::diagram::{Diagram, Format};
use crate::error::ConfigError;

pub const DEFAULT_SERVER_PATH: &str = "https://www.plantuml.com/plantuml/";
pub const DEFAULT_ENGINE_COMMAND: &str = "plantuml";
pub const DEFAULT_ENGINE_TIMEOUT: Duration = Duration::from_secs(120);
pub const DECLARATION_FILE_NAME: &str = "pumlgen.json5";

/// Which engine renders diagrams.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Run the engine as a local subprocess.
    #[default]
    Local,
    /// Fetch rendered artifacts from a diagram server.
    Remote,
}

impl FromStr for Strategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            _ => Err(ConfigError::UnknownStrategy(s.to_string())),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Remote => "remote",
        })
    }
}

/// Option values from one layer (file or command line). Unset fields fall
/// through to the layer below.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OptionOverrides {
    pub output_dir: Option<PathBuf>,
    pub format: Option<String>,
    pub server_path: Option<String>,
    pub strategy: Option<String>,
    pub suffix: Option<bool>,
    pub jobs: Option<usize>,
}

impl OptionOverrides {
    /// Merge two layers; values in `other` win.
    pub fn union(&self, other: &Self) -> Self {
        Self {
            output_dir: other.output_dir.clone().or_else(|| self.output_dir.clone()),
            format: other.format.clone().or_else(|| self.format.clone()),
            server_path: other.server_path.clone().or_else(|| self.server_path.clone()),
            strategy: other.strategy.clone().or_else(|| self.strategy.clone()),
            suffix: other.suffix.or(self.suffix),
            jobs: other.jobs.or(self.jobs),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EngineOverrides {
    pub command: Option<Vec<String>>,
    pub timeout_secs: Option<u64>,
    pub headless: Option<bool>,
}

impl EngineOverrides {
    pub fn union(&self, other: &Self) -> Self {
        Self {
            command: other.command.clone().or_else(|| self.command.clone()),
            timeout_secs: other.timeout_secs.or(self.timeout_secs),
            headless: other.headless.or(self.headless),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DiagramDeclaration {
    pub source_file: Option<PathBuf>,
}

/// Contents of a `pumlgen.json5` declaration file.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Declaration {
    #[serde(default)]
    pub options: OptionOverrides,
    #[serde(default)]
    pub engine: EngineOverrides,
    #[serde(default)]
    pub diagrams: BTreeMap<String, DiagramDeclaration>,
    pub sources: Option<PathBuf>,
}

impl Declaration {
    /// Parse declaration text. `path` is only used in error messages.
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] for malformed input.
    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }

    /// Load a declaration file. A missing file yields an empty declaration.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }
}

/// Options shared read-only by every task of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    pub output_dir: PathBuf,
    pub format: Format,
    pub server_path: String,
    pub strategy: Strategy,
    /// Append the format suffix to output file names.
    pub suffix: bool,
    /// Upper bound on concurrently running renders.
    pub jobs: usize,
}

impl RenderOptions {
    /// Defaults for a project rooted at `root`.
    pub fn defaults(root: &Path) -> Self {
        Self {
            output_dir: default_output_dir(root),
            format: Format::default(),
            server_path: DEFAULT_SERVER_PATH.to_string(),
            strategy: Strategy::default(),
            suffix: false,
            jobs: default_jobs(),
        }
    }

    /// Resolve a merged override layer into concrete options.
    ///
    /// # Errors
    /// Returns [`ConfigError::UnknownFormat`] or [`ConfigError::UnknownStrategy`]
    /// for values outside the supported sets.
    pub fn resolve(overrides: &OptionOverrides, root: &Path) -> Result<Self, ConfigError> {
        let defaults = Self::defaults(root);
        let format = match overrides.format.as_deref() {
            Some(value) => value.parse()?,
            None => defaults.format,
        };
        let strategy = match overrides.strategy.as_deref() {
            Some(value) => value.parse()?,
            None => defaults.strategy,
        };
        Ok(Self {
            output_dir: overrides
                .output_dir
                .as_deref()
                .map_or(defaults.output_dir, |dir| resolve_path(root, dir)),
            format,
            server_path: overrides.server_path.clone().unwrap_or(defaults.server_path),
            strategy,
            suffix: overrides.suffix.unwrap_or(defaults.suffix),
            jobs: overrides.jobs.unwrap_or(defaults.jobs).max(1),
        })
    }

    /// Artifact path for a diagram or source file base name.
    pub fn output_path(&self, base_name: &str) -> PathBuf {
        if self.suffix {
            self.output_dir
                .join(format!("{base_name}{}", self.format.file_suffix()))
        } else {
            self.output_dir.join(base_name)
        }
    }
}

/// How the local engine is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Program followed by any fixed leading arguments.
    pub command: Vec<String>,
    pub timeout: Duration,
    pub headless: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            command: vec![DEFAULT_ENGINE_COMMAND.to_string()],
            timeout: DEFAULT_ENGINE_TIMEOUT,
            headless: true,
        }
    }
}

impl EngineSettings {
    /// # Errors
    /// Returns [`ConfigError::MissingField`] when the command is empty.
    pub fn resolve(overrides: &EngineOverrides) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let command = overrides.command.clone().unwrap_or(defaults.command);
        if command.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(ConfigError::MissingField("engine.command"));
        }
        Ok(Self {
            command,
            timeout: overrides
                .timeout_secs
                .map_or(defaults.timeout, Duration::from_secs),
            headless: overrides.headless.unwrap_or(defaults.headless),
        })
    }
}

/// A fully resolved project: options, engine settings and declared diagrams.
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub options: RenderOptions,
    pub engine: EngineSettings,
    diagrams: Vec<Diagram>,
    pub sources: Option<PathBuf>,
}

impl Project {
    /// An empty project with default options.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            options: RenderOptions::defaults(&root),
            engine: EngineSettings::default(),
            diagrams: Vec::new(),
            sources: None,
            root,
        }
    }

    /// Build a project from a declaration plus command-line overrides.
    ///
    /// # Errors
    /// Returns the first configuration error found. Nothing is rendered
    /// before the whole declaration validates.
    pub fn from_declaration(
        declaration: &Declaration,
        root: &Path,
        option_overrides: &OptionOverrides,
        engine_overrides: &EngineOverrides,
    ) -> Result<Self, ConfigError> {
        let options = RenderOptions::resolve(&declaration.options.union(option_overrides), root)?;
        let engine = EngineSettings::resolve(&declaration.engine.union(engine_overrides))?;

        let mut project = Self {
            root: root.to_path_buf(),
            options,
            engine,
            diagrams: Vec::with_capacity(declaration.diagrams.len()),
            sources: declaration.sources.as_deref().map(|dir| resolve_path(root, dir)),
        };
        for (name, decl) in &declaration.diagrams {
            let diagram = match &decl.source_file {
                Some(source) => Diagram::new(name.clone(), resolve_path(root, source))?,
                None => Diagram::with_default_source(name.clone(), root)?,
            };
            project.add_diagram(diagram)?;
        }
        Ok(project)
    }

    /// Load `path` and apply overrides. The project root is the file's directory.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(
        path: &Path,
        option_overrides: &OptionOverrides,
        engine_overrides: &EngineOverrides,
    ) -> Result<Self, ConfigError> {
        let declaration = Declaration::load(path)?;
        let root = project_root_for(path);
        Self::from_declaration(&declaration, &root, option_overrides, engine_overrides)
    }

    /// Declare another diagram.
    ///
    /// # Errors
    /// Returns [`ConfigError::DuplicateDiagram`] if the name is taken.
    pub fn add_diagram(&mut self, diagram: Diagram) -> Result<(), ConfigError> {
        if self.diagrams.iter().any(|d| d.name() == diagram.name()) {
            return Err(ConfigError::DuplicateDiagram(diagram.name().to_string()));
        }
        self.diagrams.push(diagram);
        Ok(())
    }

    pub fn diagrams(&self) -> &[Diagram] {
        &self.diagrams
    }
}

pub fn default_declaration_path() -> PathBuf {
    PathBuf::from(DECLARATION_FILE_NAME)
}

pub fn default_output_dir(root: &Path) -> PathBuf {
    root.join("build").join("plantuml")
}

fn default_jobs() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

fn project_root_for(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

fn resolve_path(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
