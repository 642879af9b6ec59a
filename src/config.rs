use crate::error::ChainbakError;
use crate::naming::TimeBasis;
use crate::Result;
use configparser::ini::Ini;
use std::path::{Path, PathBuf};

const SECTION: &str = "chainbak";

#[derive(Debug, Clone)]
pub struct Config {
    pub timestamps: TimeBasis,
    pub preserve_permissions: bool,
    pub preserve_timestamps: bool,
    pub follow_symlinks: bool,
    pub progress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            timestamps: TimeBasis::Local,
            preserve_permissions: true,
            preserve_timestamps: true,
            follow_symlinks: false,
            progress: true,
        }
    }
}

/// Get default configuration
pub fn default_config() -> Config {
    Config::default()
}

/// Load configuration from the user's config file, falling back to defaults
pub fn load_config() -> Result<Config> {
    let config_path = get_config_path()?;

    if !config_path.exists() {
        return Ok(default_config());
    }

    load_config_from(&config_path)
}

/// Load configuration from an explicit INI file
pub fn load_config_from(path: &Path) -> Result<Config> {
    let mut conf = Ini::new();
    conf.load(path)
        .map_err(|e| ChainbakError::config(format!("Failed to parse config file: {e}")))?;

    let mut config = default_config();

    if let Some(value) = conf.get(SECTION, "timestamps") {
        config.timestamps = value.parse()?;
    }
    if let Some(value) = conf.get(SECTION, "preserve_permissions") {
        config.preserve_permissions = parse_bool_key("preserve_permissions", &value)?;
    }
    if let Some(value) = conf.get(SECTION, "preserve_timestamps") {
        config.preserve_timestamps = parse_bool_key("preserve_timestamps", &value)?;
    }
    if let Some(value) = conf.get(SECTION, "follow_symlinks") {
        config.follow_symlinks = parse_bool_key("follow_symlinks", &value)?;
    }
    if let Some(value) = conf.get(SECTION, "progress") {
        config.progress = parse_bool_key("progress", &value)?;
    }

    Ok(config)
}

/// Get the configuration file path for the current platform
fn get_config_path() -> Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return Ok(PathBuf::from(appdata).join("chainbak").join("config.ini"));
        }
    }

    if let Some(config_dir) = std::env::var_os("XDG_CONFIG_HOME") {
        Ok(PathBuf::from(config_dir)
            .join("chainbak")
            .join("config.ini"))
    } else if let Some(home) = std::env::var_os("HOME") {
        Ok(PathBuf::from(home)
            .join(".config")
            .join("chainbak")
            .join("config.ini"))
    } else {
        Err(ChainbakError::config("Could not determine config directory"))
    }
}

/// Parse a boolean value from INI string
fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}

fn parse_bool_key(key: &str, value: &str) -> Result<bool> {
    parse_bool(value).ok_or_else(|| ChainbakError::config(format!("Invalid {key}: {value}")))
}

/// Create a sample configuration file
pub fn create_sample_config() -> String {
    r#"[chainbak]
# Clock for snapshot names and change detection (local/utc)
timestamps = local

# Apply the source mode to copied files and directories (true/false)
preserve_permissions = true

# Apply the source modification time to copies (true/false)
preserve_timestamps = true

# Follow symbolic links instead of recreating them as links
follow_symlinks = false

# Show a progress bar on interactive terminals
progress = true
"#
    .to_string()
}

/// Display the current configuration in a user-friendly format
pub fn dump_config(config: &Config) -> Result<()> {
    let config_path = get_config_path()?;

    println!("chainbak Configuration");
    println!("======================");
    println!();

    if config_path.exists() {
        println!("Config file: {} (found)", config_path.display());
    } else {
        println!(
            "Config file: {} (not found, using defaults)",
            config_path.display()
        );
    }
    println!();

    println!("Current Settings:");
    println!("----------------");
    println!("timestamps           = {}", config.timestamps);
    println!("preserve_permissions = {}", config.preserve_permissions);
    println!("preserve_timestamps  = {}", config.preserve_timestamps);
    println!("follow_symlinks      = {}", config.follow_symlinks);
    println!("progress             = {}", config.progress);
    println!();

    if !config_path.exists() {
        println!("Sample configuration:");
        println!("--------------------");
        print!("{}", create_sample_config());
    }

    Ok(())
}
