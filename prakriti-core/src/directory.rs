use std::path::PathBuf;

use directories::ProjectDirs;

use crate::meta::NAME;

pub struct Directory {}

impl Directory {
    #[cfg(not(feature = "portable"))]
    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("app", "prakriti", NAME)
    }

    /// Return path adjacent to the executable
    #[cfg(feature = "portable")]
    fn project_dirs() -> Option<ProjectDirs> {
        let current_exe = std::env::current_exe().ok()?;
        ProjectDirs::from_path(current_exe.parent()?.join("prakriti-data"))
    }

    /// Get the local data directory, creating it when missing
    pub fn data_local_directory() -> Option<PathBuf> {
        let dir = Self::project_dirs()?.data_local_dir().to_path_buf();
        if !dir.exists() {
            let _ = std::fs::create_dir_all(&dir);
        }
        Some(dir)
    }

    /// Get the config directory, creating it when missing
    pub fn config_directory() -> Option<PathBuf> {
        let dir = Self::project_dirs()?.config_dir().to_path_buf();
        if !dir.exists() {
            let _ = std::fs::create_dir_all(&dir);
        }
        Some(dir)
    }

    /// Directory holding persisted credentials and the session snapshot
    pub fn auth_directory() -> Option<PathBuf> {
        let dir = Self::data_local_directory()?.join("auth");
        if !dir.exists() {
            let _ = std::fs::create_dir_all(&dir);
        }
        Some(dir)
    }
}
