//! Locating and loading the RON configuration file

use std::path::{Path, PathBuf};

use crate::Herald;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "HERALD_CONFIG";

fn default_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("./herald.config.ron"),
        PathBuf::from("/etc/herald/herald.config.ron"),
    ]
}

/// Find the configuration file using the following precedence:
/// 1. `explicit` (the `--config` flag)
/// 2. `HERALD_CONFIG` environment variable
/// 3. ./herald.config.ron (current working directory)
/// 4. /etc/herald/herald.config.ron (system-wide config)
///
/// # Errors
/// If an explicitly named file does not exist, or no candidate does.
pub fn find_config_file(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    resolve(
        explicit,
        std::env::var_os(CONFIG_ENV).map(PathBuf::from),
        &default_paths(),
    )
}

fn resolve(
    explicit: Option<PathBuf>,
    from_env: Option<PathBuf>,
    defaults: &[PathBuf],
) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("--config points to non-existent file: {}", path.display());
    }

    if let Some(path) = from_env {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    if let Some(path) = defaults.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = defaults
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}

/// Read and parse a configuration file
///
/// # Errors
/// If the file cannot be read or is not a valid configuration.
pub fn load(path: &Path) -> anyhow::Result<Herald> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        anyhow::anyhow!("Failed to read config from {}: {}", path.display(), e)
    })?;

    ron::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Invalid config in {}: {}", path.display(), e))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use herald_delivery::{Backoff, Encryption};
    use herald_queue::StoreConfig;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_resolution_order() {
        let dir = TempDir::new().unwrap();
        let explicit = dir.path().join("explicit.ron");
        let env = dir.path().join("env.ron");
        let fallback = dir.path().join("fallback.ron");
        for path in [&explicit, &env, &fallback] {
            std::fs::write(path, "()").unwrap();
        }
        let defaults = vec![dir.path().join("missing.ron"), fallback.clone()];

        assert_eq!(
            resolve(Some(explicit.clone()), Some(env.clone()), &defaults).unwrap(),
            explicit
        );
        assert_eq!(resolve(None, Some(env.clone()), &defaults).unwrap(), env);
        assert_eq!(resolve(None, None, &defaults).unwrap(), fallback);
    }

    #[test]
    fn test_missing_files_are_reported() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.ron");

        let err = resolve(Some(missing.clone()), None, &[]).unwrap_err();
        assert!(err.to_string().contains("--config"));

        let err = resolve(None, Some(missing.clone()), &[]).unwrap_err();
        assert!(err.to_string().contains(CONFIG_ENV));

        let err = resolve(None, None, &[missing]).unwrap_err();
        assert!(err.to_string().contains("missing.ron"));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Herald = ron::from_str("()").unwrap();

        assert!(matches!(config.store, StoreConfig::File(_)));
        assert_eq!(config.dispatcher.interval_secs, 10);
        assert_eq!(config.smtp.port, 587);
        assert_eq!(config.templates.dir(), Path::new("templates"));
    }

    #[test]
    fn test_sample_config_parses() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("herald.config.ron");
        std::fs::write(&path, include_str!("../../herald.config.ron")).unwrap();

        let config = load(&path).unwrap();

        assert_eq!(
            config.store.path(),
            Some(Path::new("/var/spool/herald"))
        );
        assert_eq!(config.dispatcher.batch_size, 10);
        assert_eq!(config.dispatcher.retry.backoff, Backoff::Exponential);
        assert_eq!(config.smtp.encryption, Encryption::StartTls);
        assert_eq!(config.smtp.sender.address, "noreply@example.com");
    }

    #[test]
    fn test_invalid_config_names_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.ron");
        std::fs::write(&path, "(store: (type: \"Carrier pigeon\"))").unwrap();

        let err = load(&path).unwrap_err();
        assert!(err.to_string().contains("broken.ron"));
    }
}
