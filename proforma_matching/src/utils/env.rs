// src/utils/env.rs
use log::{debug, info, warn};
use std::path::Path;

/// Env files checked in order. Variables already set in the process win, and
/// earlier files win over later ones.
const ENV_FILES: [&str; 3] = [".env", ".env.local", "../.env"];

/// Loads environment variables from the first available env files.
pub fn load_env() {
    for file in ENV_FILES {
        load_env_from_file(file);
    }
}

/// Loads one env file if it exists. Missing files are not an error.
pub fn load_env_from_file(file_path: &str) -> bool {
    if !Path::new(file_path).is_file() {
        debug!("No env file at {}", file_path);
        return false;
    }
    match dotenv::from_filename(file_path) {
        Ok(path) => {
            info!("Loaded environment variables from {}", path.display());
            true
        }
        Err(e) => {
            warn!(
                "Could not load env file '{}': {}. Proceeding with system environment variables.",
                file_path, e
            );
            false
        }
    }
}
