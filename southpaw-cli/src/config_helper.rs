//! Loads the YAML engine config and the JSON relations files named on the
//! command line, grounded on the teacher's `config_helper` convention of
//! reading files up front and surfacing parse failures with the path
//! attached.

use std::fs;
use std::path::Path;

use southpaw_types::errors::ConfigError;
use southpaw_types::{Config, Relation};

pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let contents = read_to_string(path)?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::ConfigFileParse(path.to_string(), e))
}

/// Loads every `--relations` file and flattens them into one list of root
/// relations. Each file is a JSON array of `Relation` nodes (spec §6).
pub fn load_relations(paths: &[String]) -> Result<Vec<Relation>, ConfigError> {
    let mut roots = Vec::new();
    for path in paths {
        let contents = read_to_string(path)?;
        let parsed: Vec<Relation> =
            serde_json::from_str(&contents).map_err(|e| ConfigError::RelationsFileParse(path.clone(), e))?;
        roots.extend(parsed);
    }
    Ok(roots)
}

fn read_to_string(path: &str) -> Result<String, ConfigError> {
    fs::read_to_string(Path::new(path)).map_err(|e| ConfigError::Io(path.to_string(), e))
}
