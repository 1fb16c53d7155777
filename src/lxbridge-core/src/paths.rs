use crate::{APP_AUTHOR, APP_NAME, APP_QUALIFIER};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct AppDirs {
    config_dir: PathBuf,
    data_dir: PathBuf,
    log_dir: PathBuf,
    plugin_dir: PathBuf,
}

impl AppDirs {
    pub fn discover() -> Result<Self, DirsError> {
        let dirs = ProjectDirs::from(APP_QUALIFIER, APP_AUTHOR, APP_NAME)
            .ok_or(DirsError::MissingProjectDirs)?;
        Ok(Self {
            config_dir: dirs.config_dir().to_path_buf(),
            data_dir: dirs.data_dir().to_path_buf(),
            log_dir: dirs.data_dir().join("logs"),
            plugin_dir: dirs.data_dir().join("plugins"),
        })
    }

    /// Roots every directory under `root`. Used by tests and portable installs.
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            config_dir: root.join("config"),
            data_dir: root.join("data"),
            log_dir: root.join("data").join("logs"),
            plugin_dir: root.join("data").join("plugins"),
        }
    }

    pub fn ensure_exists(&self) -> Result<(), DirsError> {
        for dir in [
            &self.config_dir,
            &self.data_dir,
            &self.log_dir,
            &self.plugin_dir,
        ] {
            std::fs::create_dir_all(dir).map_err(|source| DirsError::CreateDirectory {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Default home of module manifests managed by a supervisor.
    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }
}

#[derive(Debug, Error)]
pub enum DirsError {
    #[error("unable to determine project directories for lxbridge")]
    MissingProjectDirs,
    #[error("failed to create directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rooted_dirs_nest_logs_under_data() {
        let dirs = AppDirs::rooted_at("/tmp/lxbridge-test");
        assert!(dirs.config_dir().ends_with("config"));
        assert!(dirs.log_dir().starts_with(dirs.data_dir()));
        assert!(dirs.log_dir().ends_with("logs"));
    }

    #[test]
    fn ensure_exists_creates_all_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = AppDirs::rooted_at(tmp.path());
        dirs.ensure_exists().expect("dirs should be created");
        assert!(dirs.config_dir().is_dir());
        assert!(dirs.log_dir().is_dir());
        assert!(dirs.plugin_dir().is_dir());
    }
}
