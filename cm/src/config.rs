//! Configuration for the `cm` binary

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use propstore::Properties;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::runtime::InitializationData;

/// An object adapter `cm run` creates and activates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub name: String,

    /// Written to `<name>.Endpoints` before the adapter is created
    #[serde(default)]
    pub endpoints: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(default)]
    pub log_level: Option<String>,

    /// Value for `Comm.ProgramName`
    #[serde(default)]
    pub program_name: Option<String>,

    /// Runtime properties, applied after the property files
    #[serde(default)]
    pub properties: BTreeMap<String, String>,

    /// Property files to load, in order
    #[serde(default)]
    pub property_files: Vec<PathBuf>,

    #[serde(default)]
    pub adapters: Vec<AdapterConfig>,
}

impl Config {
    /// Load config from file, or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
            let config: Config = serde_yaml::from_str(&content).context("Failed to parse config file")?;
            return Ok(config);
        }

        // Try default locations
        let default_paths = [
            dirs::config_dir().map(|p| p.join("communicator").join("config.yml")),
            Some(PathBuf::from("communicator.yml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let config: Config = serde_yaml::from_str(&content)?;
                return Ok(config);
            }
        }

        Ok(Config::default())
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Build the properties described by this config into initialization data
    pub fn to_init_data(&self) -> Result<InitializationData> {
        debug!(files = self.property_files.len(), properties = self.properties.len(), "Config::to_init_data: called");
        let properties = Properties::new();
        for file in &self.property_files {
            properties
                .load(file)
                .with_context(|| format!("Failed to load property file {}", file.display()))?;
        }
        for (key, value) in &self.properties {
            properties.set_property(key, value)?;
        }
        if let Some(name) = &self.program_name {
            properties.set_property("Comm.ProgramName", name)?;
        }
        Ok(InitializationData::new().with_properties(properties))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_save_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yml");

        let mut config = Config::default();
        config.log_level = Some("DEBUG".to_string());
        config.adapters.push(AdapterConfig {
            name: "Printer".to_string(),
            endpoints: Some("tcp -p 10000".to_string()),
        });
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.log_level.as_deref(), Some("DEBUG"));
        assert_eq!(loaded.adapters, config.adapters);
    }

    #[test]
    fn test_missing_fields_default() {
        let config: Config = serde_yaml::from_str("program_name: demo\n").unwrap();
        assert_eq!(config.program_name.as_deref(), Some("demo"));
        assert!(config.properties.is_empty());
        assert!(config.adapters.is_empty());
    }

    #[test]
    fn test_to_init_data_layers_properties() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("app.cfg");
        std::fs::write(&file, "A.Key = from-file\nB.Key = from-file\n").unwrap();

        let yaml = format!(
            "program_name: demo\nproperty_files: [{}]\nproperties:\n  B.Key: from-config\n",
            file.display()
        );
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        let init = config.to_init_data().unwrap();

        assert_eq!(init.properties.get_property("A.Key"), "from-file");
        assert_eq!(init.properties.get_property("B.Key"), "from-config");
        assert_eq!(init.properties.get_property("Comm.ProgramName"), "demo");
    }

    #[test]
    fn test_missing_property_file_fails() {
        let config = Config {
            property_files: vec![PathBuf::from("/no/such/file.cfg")],
            ..Config::default()
        };
        assert!(config.to_init_data().is_err());
    }
}
