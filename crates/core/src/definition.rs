//! Distribution definition parsing
//!
//! A definition is a JSON object mapping group name → {origin path →
//! destination path}. Origin and destination must each be consistently
//! a single file or a directory tree; mixing the two is a caller
//! error the resolver does not try to detect.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use color_eyre::eyre::WrapErr;
use serde::{Deserialize, Serialize};

/// Declarative mapping of what each group receives:
/// `{ "<group>": { "<origin-path>": "<dest-path>" } }`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Definition {
    pub groups: HashMap<String, HashMap<PathBuf, PathBuf>>,
}

impl Definition {
    /// Load a definition from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not valid
    /// definition JSON.
    pub fn load(path: &Path) -> color_eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading definition {}", path.display()))?;
        let definition: Self = serde_json::from_str(&content)
            .wrap_err_with(|| format!("parsing definition {}", path.display()))?;
        Ok(definition)
    }
}
