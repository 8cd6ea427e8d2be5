//! Configuration loading and management
//!
//! Runtime settings come from the command line; keybindings come from a
//! TOML file that is read at startup and again on every reload.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::hotkey::KeyCombo;

/// Default location of the input device nodes
pub const DEFAULT_INPUT_DIR: &str = "/dev/input";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Settings {
    /// Path to the keybinding file
    pub config_path: PathBuf,

    /// Directory scanned for input devices
    pub input_dir: PathBuf,

    /// PID file used to find a running instance
    pub pid_file: PathBuf,
}

impl Settings {
    pub fn new(
        config_path: PathBuf,
        input_dir: Option<PathBuf>,
        pid_file: Option<PathBuf>,
    ) -> Self {
        Self {
            config_path,
            input_dir: input_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_INPUT_DIR)),
            pid_file: pid_file.unwrap_or_else(default_pid_file),
        }
    }
}

/// `$XDG_RUNTIME_DIR/hotkeyd.pid`, or the temp dir when there is no runtime dir
pub fn default_pid_file() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("hotkeyd.pid")
}

/// What a keybinding does when triggered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Shell command run with `sh -c`
    Run(String),
    /// Inline script body run through an interpreter
    Script { interpreter: String, body: String },
    /// External script file, `~/` is expanded to the home directory
    File(String),
}

/// A validated keybinding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keybinding {
    pub name: String,
    pub combo: KeyCombo,
    pub action: Action,
}

/// Errors that can occur while loading keybindings
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("every keybinding must have a name")]
    MissingName,

    #[error("{0}: must provide one of 'run', 'script', 'file'")]
    NoAction(String),

    #[error("{0}: only one of 'run', 'script', 'file' is allowed")]
    MultipleActions(String),

    #[error("{0}: 'script' requires 'interpreter'")]
    MissingInterpreter(String),

    #[error("{name}: duplicate key combination '{combo}'")]
    DuplicateCombo { name: String, combo: String },

    #[error("{0}: duplicate keybinding name")]
    DuplicateName(String),
}

/// Keybinding as written in the config file
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawKeybinding {
    #[serde(default)]
    name: String,
    keys: KeyCombo,
    run: Option<String>,
    script: Option<String>,
    interpreter: Option<String>,
    file: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    keybindings: Vec<RawKeybinding>,
}

/// Read and validate the keybinding file at `path`
pub fn load_keybindings(path: &Path) -> Result<Vec<Keybinding>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    parse_keybindings(&text, path)
}

fn parse_keybindings(text: &str, path: &Path) -> Result<Vec<Keybinding>, ConfigError> {
    let file: ConfigFile = toml::from_str(text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let mut seen_combos = HashSet::new();
    let mut seen_names = HashSet::new();
    let mut bindings = Vec::with_capacity(file.keybindings.len());

    for raw in file.keybindings {
        let binding = validate(raw)?;

        let codes = (binding.combo.modifiers().to_vec(), binding.combo.key());
        if !seen_combos.insert(codes) {
            return Err(ConfigError::DuplicateCombo {
                combo: binding.combo.to_string(),
                name: binding.name,
            });
        }

        if !seen_names.insert(binding.name.clone()) {
            return Err(ConfigError::DuplicateName(binding.name));
        }

        bindings.push(binding);
    }

    Ok(bindings)
}

/// Check a single raw keybinding and convert it
fn validate(raw: RawKeybinding) -> Result<Keybinding, ConfigError> {
    let name = raw.name.trim().to_string();
    if name.is_empty() {
        return Err(ConfigError::MissingName);
    }

    let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
    let run = non_empty(raw.run);
    let script = non_empty(raw.script);
    let file = non_empty(raw.file);
    let interpreter = non_empty(raw.interpreter);

    let count = [run.is_some(), script.is_some(), file.is_some()]
        .iter()
        .filter(|set| **set)
        .count();
    if count == 0 {
        return Err(ConfigError::NoAction(name));
    }
    if count > 1 {
        return Err(ConfigError::MultipleActions(name));
    }

    let action = match (run, script, file) {
        (Some(command), _, _) => Action::Run(command),
        (_, Some(body), _) => match interpreter {
            Some(interpreter) => Action::Script { interpreter, body },
            None => return Err(ConfigError::MissingInterpreter(name)),
        },
        (_, _, Some(path)) => Action::File(path),
        (None, None, None) => return Err(ConfigError::NoAction(name)),
    };

    Ok(Keybinding {
        name,
        combo: raw.keys,
        action,
    })
}
