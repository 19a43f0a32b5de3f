use crate::consts::{
    DEFAULT_EXPIRE_SECS, DEFAULT_FILTER_CAPACITY, DEFAULT_FILTER_FP_RATE, DEFAULT_IDLE_SECS,
    DEFAULT_LISTEN, DEFAULT_SOFT_SHUTDOWN_SECS, DEFAULT_SYNC_SECS, MOD_LIMIT,
};
use crate::errors::{FuzzyError, Result};
use crate::index::FuzzyStore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Durations are written as seconds and read as either seconds or `"2d"` style strings.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Secs(n) => Ok(Duration::from_secs(n)),
            Raw::Text(t) => crate::utils::parse_duration(&t).map_err(serde::de::Error::custom),
        }
    }
}

/// Runtime settings for one storage instance.
///
/// A missing `hashfile` disables persistence: the store starts empty and
/// syncs never write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen: String,
    pub hashfile: Option<PathBuf>,
    #[serde(with = "duration_serde")]
    pub expire: Duration,
    #[serde(with = "duration_serde")]
    pub sync_interval: Duration,
    #[serde(with = "duration_serde")]
    pub idle_timeout: Duration,
    #[serde(with = "duration_serde")]
    pub soft_shutdown: Duration,
    pub mod_limit: u32,
    pub filter_capacity: usize,
    pub filter_fp_rate: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            hashfile: None,
            expire: Duration::from_secs(DEFAULT_EXPIRE_SECS),
            sync_interval: Duration::from_secs(DEFAULT_SYNC_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_SECS),
            soft_shutdown: Duration::from_secs(DEFAULT_SOFT_SHUTDOWN_SECS),
            mod_limit: MOD_LIMIT,
            filter_capacity: DEFAULT_FILTER_CAPACITY,
            filter_fp_rate: DEFAULT_FILTER_FP_RATE,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let cfg: Config = serde_json::from_str(&s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync_interval.is_zero() {
            return Err(FuzzyError::Config("sync_interval must be positive".into()));
        }
        if self.idle_timeout.is_zero() {
            return Err(FuzzyError::Config("idle_timeout must be positive".into()));
        }
        if !(self.filter_fp_rate > 0.0 && self.filter_fp_rate < 1.0) {
            return Err(FuzzyError::Config(format!(
                "filter_fp_rate must be in (0, 1), got {}",
                self.filter_fp_rate
            )));
        }
        if self.filter_capacity == 0 {
            return Err(FuzzyError::Config("filter_capacity must be positive".into()));
        }
        Ok(())
    }

    /// Empty store sized per this config.
    pub fn new_store(&self) -> FuzzyStore {
        FuzzyStore::new(self.filter_capacity, self.filter_fp_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn partial_file_takes_defaults() {
        let tmp = tempdir().unwrap();
        let p = tmp.path().join("fuzzy.json");
        fs::write(&p, r#"{ "hashfile": "/var/lib/fuzzy.db", "expire": "1d", "sync_interval": 30 }"#).unwrap();
        let cfg = Config::load(&p).unwrap();
        assert_eq!(cfg.hashfile.as_deref(), Some(Path::new("/var/lib/fuzzy.db")));
        assert_eq!(cfg.expire, Duration::from_secs(86_400));
        assert_eq!(cfg.sync_interval, Duration::from_secs(30));
        assert_eq!(cfg.mod_limit, MOD_LIMIT);
        assert_eq!(cfg.listen, DEFAULT_LISTEN);
    }

    #[test]
    fn bad_values_rejected() {
        let tmp = tempdir().unwrap();
        let p = tmp.path().join("fuzzy.json");
        fs::write(&p, r#"{ "filter_fp_rate": 1.5 }"#).unwrap();
        assert!(matches!(Config::load(&p), Err(FuzzyError::Config(_))));
        fs::write(&p, r#"{ "expire": "forever" }"#).unwrap();
        assert!(matches!(Config::load(&p), Err(FuzzyError::SerdeJson(_))));
    }

    #[test]
    fn serializes_durations_as_seconds() {
        let s = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(s["expire"], 172_800);
    }
}
