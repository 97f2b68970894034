//! Static startup configuration (SPEC_FULL.md §4.8): the `managed_alarms` /
//! `alarm_levels` descriptor, loaded once and accessed thereafter through a
//! `OnceLock`-backed global, mirroring this codebase's established
//! process-wide write-once/read-many pattern.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::{FaultlineError, FaultlineResult};
use crate::id::AlarmId;
use crate::level::Level;

const CONFIG_ENV_VAR: &str = "FAULTLINE_CONFIG";
const CONFIG_FILE_NAME: &str = "faultline.toml";

/// The static descriptor honoured at startup (SPEC_FULL.md §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub managed_alarms: Vec<AlarmId>,
    pub alarm_levels: HashMap<AlarmId, Level>,
}

impl Default for Config {
    fn default() -> Self {
        Config { managed_alarms: Vec::new(), alarm_levels: HashMap::new() }
    }
}

impl Config {
    /// Loads per the order in SPEC_FULL.md §4.8: `FAULTLINE_CONFIG` env var,
    /// then `faultline.toml` in the working directory, then built-in
    /// defaults. Parsing errors are surfaced, never panics.
    pub fn load() -> FaultlineResult<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::load_file(Path::new(&path));
        }
        let cwd_path = Path::new(CONFIG_FILE_NAME);
        if cwd_path.exists() {
            return Self::load_file(cwd_path);
        }
        Ok(Config::default())
    }

    fn load_file(path: &Path) -> FaultlineResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| FaultlineError::Validation(format!("reading {}: {e}", path.display())))?;
        toml::from_str(&contents)
            .map_err(|e| FaultlineError::Validation(format!("parsing {}: {e}", path.display())))
    }
}

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Installs `config` as the process-wide configuration. Calling this more
/// than once is a startup bug, not a data error, and panics rather than
/// silently keeping the first value (SPEC_FULL.md §4.8).
pub fn init(config: Config) {
    if CONFIG.set(config).is_err() {
        panic!("config::init called more than once");
    }
}

/// Returns the installed configuration. Panics if `init` has not run yet.
pub fn get() -> &'static Config {
    CONFIG.get().expect("config::get called before config::init")
}
