//! `relaychat init`: writes a config file with every default spelled out.

use std::error::Error;
use std::path::{Path, PathBuf};

use crate::core::config::Config;

/// Writes the default config to `path`. An existing file is left alone
/// unless `force` is set; returns whether anything was written.
pub fn write_default_config(path: &Path, force: bool) -> Result<bool, Box<dyn Error>> {
    if path.exists() && !force {
        return Ok(false);
    }
    Config::default().save_to_path(path)?;
    Ok(true)
}

pub fn run_init(explicit_path: Option<&Path>, force: bool) -> Result<(), Box<dyn Error>> {
    let path: PathBuf = match explicit_path {
        Some(path) => path.to_path_buf(),
        None => Config::get_config_path().ok_or("could not determine the config directory")?,
    };

    if write_default_config(&path, force)? {
        println!("✅ Wrote default config to {}", path.display());
    } else {
        eprintln!(
            "⚠️  Config already exists at {} (use --force to overwrite)",
            path.display()
        );
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn writes_defaults_that_load_back() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("relaychat").join("config.toml");

        assert!(write_default_config(&path, false).unwrap());

        let loaded = Config::load_from_path(&path).expect("Failed to load config");
        assert_eq!(loaded, Config::default());
        assert!(fs::read_to_string(&path).unwrap().contains("[provider]"));
    }

    #[test]
    fn existing_config_is_kept_without_force() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[server]\nmax_duration_secs = 5\n").unwrap();

        assert!(!write_default_config(&path, false).unwrap());
        assert_eq!(
            Config::load_from_path(&path).unwrap().server.max_duration_secs,
            5
        );

        assert!(write_default_config(&path, true).unwrap());
        assert_eq!(Config::load_from_path(&path).unwrap(), Config::default());
    }
}
