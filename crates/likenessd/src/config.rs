use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use likeness_core::gallery::{DEFAULT_DIMENSION, DEFAULT_MAX_DISTANCE};
use likeness_core::{GalleryConfig, TieBreak};
use serde::Deserialize;

/// Daemon configuration: optional TOML file, then `LIKENESS_*` overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Euclidean distance below which two descriptors are the same person.
    pub max_distance: f32,
    /// Descriptor length produced by the detector.
    pub dimension: usize,
    /// How the matcher picks among several qualifying persons.
    pub tie_break: TieBreak,
    /// Directory polled for detection batches (`*.json`).
    pub spool_dir: PathBuf,
    pub spool_poll_secs: u64,
    /// Period of the background reconciliation pass.
    pub regroup_interval_secs: u64,
    /// Run a reconciliation pass after every ingested batch.
    pub regroup_after_ingest: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            db_path: data_dir.join("gallery.db"),
            max_distance: DEFAULT_MAX_DISTANCE,
            dimension: DEFAULT_DIMENSION,
            tie_break: TieBreak::First,
            spool_dir: data_dir.join("spool"),
            spool_poll_secs: 5,
            regroup_interval_secs: 300,
            regroup_after_ingest: true,
        }
    }
}

impl Config {
    /// Load from `LIKENESS_CONFIG` (if set), apply environment overrides
    /// and validate.
    pub fn load() -> Result<Self> {
        let mut cfg = match std::env::var("LIKENESS_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        cfg.apply_env(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = get("LIKENESS_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = get("LIKENESS_SPOOL_DIR") {
            self.spool_dir = PathBuf::from(v);
        }
        env_parse(&get, "LIKENESS_MAX_DISTANCE", &mut self.max_distance)?;
        env_parse(&get, "LIKENESS_DIMENSION", &mut self.dimension)?;
        env_parse(&get, "LIKENESS_SPOOL_POLL_SECS", &mut self.spool_poll_secs)?;
        env_parse(&get, "LIKENESS_REGROUP_INTERVAL_SECS", &mut self.regroup_interval_secs)?;
        if let Some(v) = get("LIKENESS_TIE_BREAK") {
            self.tie_break = v.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(v) = get("LIKENESS_REGROUP_AFTER_INGEST") {
            self.regroup_after_ingest = v != "0";
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(self.max_distance.is_finite() && self.max_distance > 0.0) {
            bail!("max_distance must be a positive number, got {}", self.max_distance);
        }
        if self.dimension == 0 {
            bail!("dimension must be positive");
        }
        Ok(())
    }

    pub fn gallery(&self) -> GalleryConfig {
        GalleryConfig {
            max_distance: self.max_distance,
            dimension: self.dimension,
            tie_break: self.tie_break,
        }
    }
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("likeness")
}

fn env_parse<T>(get: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) -> Result<()>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(v) = get(key) {
        *slot = v.trim().parse().with_context(|| format!("invalid {key}={v:?}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_env_overrides() {
        let mut cfg = Config::default();
        cfg.apply_env(env(&[
            ("LIKENESS_DB_PATH", "/var/lib/likeness/g.db"),
            ("LIKENESS_MAX_DISTANCE", "0.45"),
            ("LIKENESS_DIMENSION", "512"),
            ("LIKENESS_TIE_BREAK", "nearest"),
            ("LIKENESS_REGROUP_AFTER_INGEST", "0"),
        ]))
        .unwrap();

        assert_eq!(cfg.db_path, PathBuf::from("/var/lib/likeness/g.db"));
        assert_eq!(cfg.max_distance, 0.45);
        assert_eq!(cfg.dimension, 512);
        assert_eq!(cfg.tie_break, TieBreak::Nearest);
        assert!(!cfg.regroup_after_ingest);
        assert_eq!(cfg.regroup_interval_secs, 300);
    }

    #[test]
    fn test_bad_env_value_is_an_error() {
        let mut cfg = Config::default();
        assert!(cfg.apply_env(env(&[("LIKENESS_MAX_DISTANCE", "far")])).is_err());
        assert!(cfg.apply_env(env(&[("LIKENESS_TIE_BREAK", "closest")])).is_err());
    }

    #[test]
    fn test_toml_file_with_partial_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("likeness.toml");
        std::fs::write(&path, "max_distance = 0.5\ntie_break = \"nearest\"\n").unwrap();

        let cfg = Config::from_file(&path).unwrap();
        assert_eq!(cfg.max_distance, 0.5);
        assert_eq!(cfg.tie_break, TieBreak::Nearest);
        assert_eq!(cfg.dimension, DEFAULT_DIMENSION);
    }

    #[test]
    fn test_toml_rejects_unknown_field() {
        assert!(toml::from_str::<Config>("treshold = 0.5").is_err());
    }

    #[test]
    fn test_validate() {
        let mut cfg = Config::default();
        assert!(cfg.validate().is_ok());
        cfg.max_distance = 0.0;
        assert!(cfg.validate().is_err());
        cfg.max_distance = 0.6;
        cfg.dimension = 0;
        assert!(cfg.validate().is_err());
    }
}
