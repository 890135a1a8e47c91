//! Editor configuration.
//!
//! Settings are read from a TOML or JSON file, chosen by extension, and
//! then overridden from the environment.
//!
//! # Configuration File Format
//!
//! ```toml
//! configuration_path = "/etc/nixos/configuration.nix"
//! store_root = "/var/lib/nixconf"
//! overwrite_source = false
//!
//! [evaluator]
//! program = "nix-instantiate"
//! timeout_secs = 120
//! nix_path = "nixpkgs=/nix/var/nix/profiles/per-user/root/channels/nixos"
//! ```

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    store::DirStore,
};

/// Source path override.
pub const ENV_CONFIGURATION_PATH: &str = "CONFIGURATION_PATH";
/// `1` or `true` saves over the source instead of into the store.
pub const ENV_OVERWRITE_SOURCE: &str = "NIXCONF_OVERWRITE_SOURCE";
/// Store root override.
pub const ENV_STORE: &str = "NIXCONF_STORE";

/// Top-level editor settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct EditorConfig {
    /// The configuration file being edited.
    pub configuration_path: PathBuf,
    /// Root of the revision store. Defaults to `$XDG_DATA_HOME/nixconf`,
    /// or `~/.local/share/nixconf`.
    pub store_root: Option<PathBuf>,
    /// Save over `configuration_path` instead of into the store.
    pub overwrite_source: bool,
    /// Evaluator settings.
    pub evaluator: EvaluatorConfig,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            configuration_path: PathBuf::from("/etc/nixos/configuration.nix"),
            store_root: None,
            overwrite_source: false,
            evaluator: EvaluatorConfig::default(),
        }
    }
}

/// How to run `nix-instantiate`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Program name or path.
    pub program: String,
    /// Seconds before a running evaluation is killed.
    pub timeout_secs: u64,
    /// `NIX_PATH` for the evaluator; inherited when unset.
    pub nix_path: Option<String>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            program: "nix-instantiate".to_string(),
            timeout_secs: 120,
            nix_path: None,
        }
    }
}

impl EvaluatorConfig {
    /// The settings that decide what the evaluator produces: the program
    /// and the effective `NIX_PATH`. Timeouts are left out.
    pub fn fingerprint(&self) -> String {
        let nix_path = self
            .nix_path
            .clone()
            .or_else(|| env::var("NIX_PATH").ok())
            .unwrap_or_default();
        format!("{}\0{nix_path}", self.program)
    }
}

impl EditorConfig {
    /// Read settings from a `.toml` or `.json` file.
    ///
    /// # Errors
    ///
    /// I/O and parse failures, or [`Error::UnsupportedFormat`] for any
    /// other extension.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = match path.extension().and_then(|s| s.to_str()).unwrap_or("") {
            "toml" => toml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            ext => return Err(Error::UnsupportedFormat(ext.to_string())),
        };
        debug!("loaded editor config from {}", path.display());
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| env::var(key).ok());
    }

    /// Apply overrides from `lookup`, which maps variable names to values.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup(ENV_CONFIGURATION_PATH) {
            self.configuration_path = PathBuf::from(path);
        }
        if let Some(flag) = lookup(ENV_OVERWRITE_SOURCE) {
            self.overwrite_source = matches!(flag.trim(), "1" | "true" | "yes");
        }
        if let Some(root) = lookup(ENV_STORE) {
            self.store_root = Some(PathBuf::from(root));
        }
    }

    /// The revision store.
    pub fn store(&self) -> DirStore {
        DirStore::new(
            self.store_root
                .clone()
                .unwrap_or_else(default_store_root),
        )
    }

    /// JSON schema of this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the schema cannot be converted.
    pub fn json_schema() -> Result<serde_json::Value> {
        Ok(serde_json::to_value(schemars::schema_for!(EditorConfig))?)
    }
}

fn default_store_root() -> PathBuf {
    let data_home = env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/share")))
        .unwrap_or_else(env::temp_dir);
    data_home.join("nixconf")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_load_toml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("nixconf.toml");
        fs::write(
            &toml_path,
            "configuration_path = \"/tmp/c.nix\"\n[evaluator]\ntimeout_secs = 5\n",
        )
        .unwrap();
        let config = EditorConfig::load(&toml_path).unwrap();
        assert_eq!(config.configuration_path, Path::new("/tmp/c.nix"));
        assert_eq!(config.evaluator.timeout_secs, 5);
        assert_eq!(config.evaluator.program, "nix-instantiate");
        assert!(!config.overwrite_source);

        let json_path = dir.path().join("nixconf.json");
        fs::write(&json_path, r#"{"overwrite_source": true}"#).unwrap();
        let config = EditorConfig::load(&json_path).unwrap();
        assert!(config.overwrite_source);
        assert_eq!(config.evaluator, EvaluatorConfig::default());

        let yaml_path = dir.path().join("nixconf.yaml");
        fs::write(&yaml_path, "").unwrap();
        assert!(matches!(
            EditorConfig::load(&yaml_path),
            Err(Error::UnsupportedFormat(ext)) if ext == "yaml"
        ));

        fs::write(&toml_path, "timeout_secs = [").unwrap();
        assert!(matches!(EditorConfig::load(&toml_path), Err(Error::Toml(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_CONFIGURATION_PATH, "/home/me/configuration.nix"),
            (ENV_OVERWRITE_SOURCE, "1"),
            (ENV_STORE, "/srv/store"),
        ]);
        let mut config = EditorConfig::default();
        config.apply_env_from(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(
            config.configuration_path,
            Path::new("/home/me/configuration.nix")
        );
        assert!(config.overwrite_source);
        assert_eq!(config.store().root(), Path::new("/srv/store"));
    }

    #[test]
    fn test_fingerprint_ignores_timeout() {
        let base = EvaluatorConfig {
            nix_path: Some("nixpkgs=/a".into()),
            ..EvaluatorConfig::default()
        };
        let slower = EvaluatorConfig {
            timeout_secs: 600,
            ..base.clone()
        };
        assert_eq!(base.fingerprint(), slower.fingerprint());
        let other_path = EvaluatorConfig {
            nix_path: Some("nixpkgs=/b".into()),
            ..base.clone()
        };
        assert_ne!(base.fingerprint(), other_path.fingerprint());
        let other_program = EvaluatorConfig {
            program: "/opt/nix/bin/nix-instantiate".into(),
            ..base.clone()
        };
        assert_ne!(base.fingerprint(), other_program.fingerprint());
    }

    #[test]
    fn test_json_schema() {
        let schema = EditorConfig::json_schema().unwrap();
        let properties = &schema["properties"];
        assert!(properties.get("configuration_path").is_some());
        assert!(properties.get("evaluator").is_some());
    }
}
