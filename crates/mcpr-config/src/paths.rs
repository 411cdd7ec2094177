use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub const DATA_DIR_ENV: &str = "MCPR_DATA_DIR";

/// Resolve the data directory: `MCPR_DATA_DIR` wins, otherwise the
/// platform data dir (`~/.local/share/mcp-router` on Linux).
pub fn resolve_data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }

    let dirs = directories::ProjectDirs::from("", "", "mcp-router")
        .context("failed to determine platform data directory")?;
    Ok(dirs.data_dir().to_path_buf())
}

/// Create the data directory with owner-only permissions.
pub fn ensure_data_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create data directory: {}", dir.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        std::fs::set_permissions(dir, perms)
            .with_context(|| format!("failed to chmod data directory: {}", dir.display()))?;
    }

    Ok(())
}

/// Restrict a data file (config, database) to owner read/write.
pub fn restrict_file_mode(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("failed to chmod data file: {}", path.display()))?;
    }
    #[cfg(not(unix))]
    let _ = path;

    Ok(())
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.toml")
}

pub fn database_path(data_dir: &Path) -> PathBuf {
    data_dir.join("router.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_env_override_wins() {
        let temp = tempfile::tempdir().unwrap();
        unsafe { std::env::set_var(DATA_DIR_ENV, temp.path()) };
        let resolved = resolve_data_dir().unwrap();
        unsafe { std::env::remove_var(DATA_DIR_ENV) };
        assert_eq!(resolved, temp.path());
    }

    #[test]
    #[serial]
    fn test_empty_env_falls_through() {
        unsafe { std::env::set_var(DATA_DIR_ENV, "  ") };
        let resolved = resolve_data_dir().unwrap();
        unsafe { std::env::remove_var(DATA_DIR_ENV) };
        assert!(!resolved.as_os_str().is_empty());
    }

    #[test]
    fn test_ensure_data_dir_sets_owner_only_mode() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("nested").join("data");
        ensure_data_dir(&dir).unwrap();
        assert!(dir.is_dir());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&dir).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }

    #[test]
    fn test_restrict_file_mode() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("router.db");
        std::fs::write(&file, b"").unwrap();
        restrict_file_mode(&file).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&file).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_derived_paths() {
        let dir = Path::new("/tmp/mcpr");
        assert_eq!(config_path(dir), Path::new("/tmp/mcpr/config.toml"));
        assert_eq!(database_path(dir), Path::new("/tmp/mcpr/router.db"));
    }
}
