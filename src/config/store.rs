use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::error::{AppError, Result};

use super::schema::AppConfig;

const RELOAD_CHANNEL_CAPACITY: usize = 16;
const ENV_PREFIX: &str = "CAMERA_SERVICE_";

/// Config Provider (C1). Holds an atomically-swappable snapshot of
/// [`AppConfig`] plus a broadcast channel fanning out the new snapshot to
/// subscribers on every successful reload.
pub struct ConfigProvider {
    path: Option<PathBuf>,
    snapshot: ArcSwap<AppConfig>,
    reload_tx: broadcast::Sender<Arc<AppConfig>>,
}

impl ConfigProvider {
    /// Load from `path` (if given) overlaid with `CAMERA_SERVICE_*`
    /// environment variables, validate, and construct the provider.
    ///
    /// Resolves Open Question 1: an absent/empty path does not fall back to
    /// an implicit default filename — only the struct-level `Default` plus
    /// the environment overlay determine the result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = Self::load_config(path)?;
        let (reload_tx, _) = broadcast::channel(RELOAD_CHANNEL_CAPACITY);
        Ok(Self {
            path: path.map(PathBuf::from),
            snapshot: ArcSwap::from_pointee(config),
            reload_tx,
        })
    }

    fn load_config(path: Option<&Path>) -> Result<AppConfig> {
        let mut config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)
                    .map_err(|_| AppError::ConfigMissing(p.display().to_string()))?;
                serde_yaml::from_str(&text)
                    .map_err(|e| AppError::ConfigParse(format!("{}: {e}", p.display())))?
            }
            None => AppConfig::default(),
        };

        apply_env_overrides(&mut config)?;

        config
            .validate()
            .map_err(AppError::ConfigInvalid)?;

        Ok(config)
    }

    /// Return the current immutable snapshot. Cheap, lock-free, no I/O.
    pub fn snapshot(&self) -> Arc<AppConfig> {
        self.snapshot.load_full()
    }

    /// Register for reload notifications; each subscriber receives the new
    /// snapshot, in full, on every successful reload.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AppConfig>> {
        self.reload_tx.subscribe()
    }

    /// Re-parse the file (if one was given at construction) and re-apply
    /// the full environment overlay. A reload is all-or-nothing: a bad
    /// reload is rejected and the previous snapshot stays live.
    pub fn reload(&self) -> Result<()> {
        let config = Self::load_config(self.path.as_deref())?;
        let config = Arc::new(config);
        self.snapshot.store(config.clone());
        let _ = self.reload_tx.send(config);
        info!("configuration reloaded");
        Ok(())
    }
}

/// Overlay `CAMERA_SERVICE_<SECTION>_<FIELD>` environment variables onto a
/// parsed config. Round-trips the struct through JSON so each leaf can be
/// located and replaced generically without hand-writing one setter per
/// field; an override with a type mismatch (e.g. a non-integer port) fails
/// loading with a typed error rather than being silently ignored.
fn apply_env_overrides(config: &mut AppConfig) -> Result<()> {
    let mut value = serde_json::to_value(&*config)
        .map_err(|e| AppError::Internal(format!("config round-trip failed: {e}")))?;

    for (key, raw) in std::env::vars() {
        let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path: Vec<String> = rest.to_lowercase().split('_').map(str::to_string).collect();
        if path.len() < 2 {
            continue;
        }
        if let Err(msg) = set_path(&mut value, &path, &raw) {
            warn!(key = %key, "ignoring env override with unrecognized path: {msg}");
        }
    }

    *config = serde_json::from_value(value)
        .map_err(|e| AppError::ConfigInvalid(format!("override produced invalid config: {e}")))?;
    Ok(())
}

/// Attempt to set `path` (section, then one or more underscore-joined field
/// segments) inside a `serde_json::Value` tree to the parsed scalar form of
/// `raw`. Section and field names in `AppConfig` are single words, so the
/// remaining segments are rejoined with `_` to recover multi-word field
/// names such as `poll_interval_secs`.
fn set_path(value: &mut serde_json::Value, path: &[String], raw: &str) -> std::result::Result<(), String> {
    let section = &path[0];
    let field = path[1..].join("_");

    let obj = value
        .as_object_mut()
        .ok_or_else(|| "config root is not an object".to_string())?;
    let section_value = obj
        .get_mut(section)
        .ok_or_else(|| format!("unknown section {section}"))?;
    let section_obj = section_value
        .as_object_mut()
        .ok_or_else(|| format!("section {section} is not an object"))?;
    let Some(existing) = section_obj.get(&field) else {
        return Err(format!("unknown field {section}.{field}"));
    };

    let parsed = match existing {
        serde_json::Value::Bool(_) => raw
            .parse::<bool>()
            .map(serde_json::Value::Bool)
            .map_err(|e| e.to_string())?,
        serde_json::Value::Number(n) if n.is_u64() || n.is_i64() => raw
            .parse::<i64>()
            .map(|v| serde_json::Value::Number(v.into()))
            .map_err(|e| e.to_string())?,
        serde_json::Value::Number(_) => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(serde_json::Value::Number)
            .ok_or_else(|| "invalid float".to_string())?,
        serde_json::Value::Array(_) => {
            let items: std::result::Result<Vec<serde_json::Value>, String> = raw
                .split(',')
                .map(|s| {
                    s.trim()
                        .parse::<i64>()
                        .map(|v| serde_json::Value::Number(v.into()))
                        .map_err(|e| e.to_string())
                })
                .collect();
            serde_json::Value::Array(items?)
        }
        _ => serde_json::Value::String(raw.to_string()),
    };

    section_obj.insert(field, parsed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_defaults_with_no_path() {
        let provider = ConfigProvider::load(None).unwrap();
        let snap = provider.snapshot();
        assert_eq!(snap.server.port, 8899);
    }

    #[test]
    fn env_override_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "server:\n  host: \"127.0.0.1\"\n  port: 8080").unwrap();

        std::env::set_var("CAMERA_SERVICE_SERVER_HOST", "test-host");
        let provider = ConfigProvider::load(Some(&path)).unwrap();
        std::env::remove_var("CAMERA_SERVICE_SERVER_HOST");

        let snap = provider.snapshot();
        assert_eq!(snap.server.host, "test-host");
        assert_eq!(snap.server.port, 8080);
    }

    #[test]
    fn non_integer_port_override_fails_load() {
        std::env::set_var("CAMERA_SERVICE_SERVER_PORT", "not-a-number");
        let result = ConfigProvider::load(None);
        std::env::remove_var("CAMERA_SERVICE_SERVER_PORT");
        assert!(result.is_err());
    }

    #[test]
    fn missing_file_fails_load() {
        let result = ConfigProvider::load(Some(Path::new("/no/such/file.yaml")));
        assert!(matches!(result, Err(AppError::ConfigMissing(_))));
    }

    #[test]
    fn malformed_yaml_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "not: [valid: yaml").unwrap();
        let result = ConfigProvider::load(Some(&path));
        assert!(matches!(result, Err(AppError::ConfigParse(_))));
    }

    #[test]
    fn empty_device_range_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "camera:\n  device_range: []\n").unwrap();
        let result = ConfigProvider::load(Some(&path));
        assert!(matches!(result, Err(AppError::ConfigInvalid(_))));
    }
}
