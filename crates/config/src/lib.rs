//! Layered configuration for folio.
//!
//! Sources, lowest to highest precedence:
//!
//! 1. built-in defaults ([`Config::default()`]);
//! 2. the user config file, `config.toml` in the platform config directory;
//! 3. an explicitly named file (TOML, YAML or JSON, by extension);
//! 4. environment variables prefixed `FOLIO_`, with `__` separating nested
//!    keys (`FOLIO_LIBRARY_ROOT`, `FOLIO_SEARCH__CONTEXT_CHARS`);
//! 5. command-line [`Overrides`].
//!
//! The merged result is validated before it is returned.

pub mod error;

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, Result};

pub const ENV_PREFIX: &str = "FOLIO_";
pub const DEFAULT_LIBRARY_ROOT: &str = "/ebooks";
pub const MAX_CONTEXT_CHARS: usize = 10_000;
const USER_CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the library; must be absolute
    pub library_root: PathBuf,
    /// Default log verbosity (`trace`, `debug`, `info`, `warn` or `error`)
    pub log_level: String,
    pub search: SearchConfig,
    pub resolve: ResolveConfig,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            library_root: PathBuf::from(DEFAULT_LIBRARY_ROOT),
            log_level: "info".to_string(),
            search: SearchConfig::default(),
            resolve: ResolveConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Characters of context either side of a match
    pub context_chars: usize,
    /// Matches kept per book in library-wide searches; `0` keeps them all
    pub max_results_per_book: usize,
}
impl Default for SearchConfig {
    fn default() -> Self {
        Self { context_chars: 200, max_results_per_book: 5 }
    }
}
impl SearchConfig {
    /// [`max_results_per_book`](Self::max_results_per_book) as a limit.
    pub fn result_limit(&self) -> Option<usize> {
        (self.max_results_per_book > 0).then_some(self.max_results_per_book)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveConfig {
    /// Split documents into one chapter per navigation anchor
    pub split_on_anchors: bool,
}
impl Default for ResolveConfig {
    fn default() -> Self {
        Self { split_on_anchors: true }
    }
}

impl Config {
    /// # Errors
    ///
    /// [`Invalid`](ErrorKind::Invalid) naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if !self.library_root.is_absolute() {
            exn::bail!(ErrorKind::invalid("library_root", format!("{} is not absolute", self.library_root.display())));
        }
        if self.search.context_chars > MAX_CONTEXT_CHARS {
            exn::bail!(ErrorKind::invalid(
                "search.context_chars",
                format!("{} exceeds the maximum of {MAX_CONTEXT_CHARS}", self.search.context_chars)
            ));
        }
        if self.log_level.parse::<tracing::Level>().is_err() {
            exn::bail!(ErrorKind::invalid("log_level", format!("unknown level {:?}", self.log_level)));
        }
        Ok(())
    }
}

/// Values given on the command line; `None` leaves lower layers alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

/// `config.toml` in the platform config directory, if there is a home
/// directory to put it in.
pub fn user_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "folio").map(|dirs| dirs.config_dir().join(USER_CONFIG_FILE))
}

pub struct Loader {
    user_file: Option<PathBuf>,
    file: Option<PathBuf>,
    env_prefix: String,
    overrides: Overrides,
}
impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}
impl Loader {
    pub fn new() -> Self {
        Self { user_file: user_config_path(), file: None, env_prefix: ENV_PREFIX.to_string(), overrides: Overrides::default() }
    }

    /// Adds an explicitly named config file, which must exist.
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn without_user_file(mut self) -> Self {
        self.user_file = None;
        self
    }

    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// The merged, unvalidated sources.
    ///
    /// # Errors
    ///
    /// [`Load`](ErrorKind::Load) if the explicit file is missing or has an
    /// extension other than `toml`, `yaml`, `yml` or `json`.
    pub fn figment(&self) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = &self.user_file {
            tracing::debug!(path = %path.display(), "Reading user config file if present");
            figment = figment.merge(Toml::file(path));
        }
        if let Some(path) = &self.file {
            figment = merge_file(figment, path)?;
        }
        Ok(figment.merge(Env::prefixed(&self.env_prefix).split("__")).merge(Serialized::defaults(&self.overrides)))
    }

    /// Loads and validates the configuration.
    pub fn load(&self) -> Result<Config> {
        let config: Config = self.figment()?.extract().map_err(|err| ErrorKind::Load(err.to_string()))?;
        config.validate()?;
        tracing::debug!(?config, "Configuration loaded");
        Ok(config)
    }
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    if !path.is_file() {
        exn::bail!(ErrorKind::Load(format!("config file not found: {}", path.display())));
    }
    let extension = path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase);
    let figment = match extension.as_deref() {
        Some("toml") => figment.merge(Toml::file(path)),
        Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
        Some("json") => figment.merge(Json::file(path)),
        _ => exn::bail!(ErrorKind::Load(format!("unsupported config file format: {}", path.display()))),
    };
    Ok(figment)
}
