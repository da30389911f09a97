use std::path::PathBuf;

use dirs::home_dir;

/// Environment override for the data directory; must be absolute.
pub const DATA_DIR_ENV: &str = "SQLGATE_DATA_DIR";

pub fn app_data_dir() -> PathBuf {
    if let Ok(custom_dir) = std::env::var(DATA_DIR_ENV) {
        let path = PathBuf::from(custom_dir);
        if path.is_absolute() {
            return path;
        }
        log::warn!("{} is not absolute, ignoring: {}", DATA_DIR_ENV, path.display());
    }
    home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".sqlgate")
}

pub fn data_dir() -> PathBuf {
    app_data_dir().join("data")
}

pub fn config_file_path() -> PathBuf {
    app_data_dir().join("config.json")
}

/// Database file used when no engine path is configured.
pub fn default_engine_path() -> PathBuf {
    data_dir().join("warehouse.duckdb")
}

pub fn ensure_app_directories() -> Result<(), std::io::Error> {
    std::fs::create_dir_all(app_data_dir())?;
    std::fs::create_dir_all(data_dir())?;
    Ok(())
}
