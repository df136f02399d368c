use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

pub const CONFIG_FILE: &str = "bluegate_config.json";
pub const CONFIG_SEARCH_DIR: &str = "/usr/local/etc/bluegate";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Dotted-quad address the acceptors bind and redirects point at.
    pub hostname: String,
    pub patch_port: u16,
    pub data_port: u16,
    pub login_port: u16,
    pub character_port: u16,
    #[serde(default)]
    pub db_host: String,
    #[serde(default)]
    pub db_port: u16,
    #[serde(default)]
    pub db_username: String,
    #[serde(default)]
    pub db_password: String,
    #[serde(default)]
    pub db_name: String,
    /// Text shown on the patch download screen.
    #[serde(default)]
    pub welcome_message: String,
    /// Ticker text on the ship selection screen.
    #[serde(default)]
    pub scroll_message: String,
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_parameter_dir")]
    pub parameter_dir: String,
    #[serde(default = "default_patch_dir")]
    pub patch_dir: String,
    #[serde(default = "default_save_dir")]
    pub save_dir: String,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_parameter_dir() -> String {
    "parameters".to_string()
}

fn default_patch_dir() -> String {
    "patches".to_string()
}

fn default_save_dir() -> String {
    "save".to_string()
}

impl AppConfig {
    /// Load the configuration file. An explicit path may be passed as the
    /// first program argument; otherwise the working directory is searched,
    /// then the system config directory. Failure to find one is fatal.
    pub fn load(args: &[String]) -> Result<Self, String> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(path) = args.get(1) {
            candidates.push(PathBuf::from(path));
        } else {
            candidates.push(PathBuf::from(CONFIG_FILE));
            candidates.push(Path::new(CONFIG_SEARCH_DIR).join(CONFIG_FILE));
        }

        for path in &candidates {
            match std::fs::read_to_string(path) {
                Ok(data) => return Self::from_json(&data),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(format!(
                        "config read failed for {}: {}",
                        path.display(),
                        err
                    ))
                }
            }
        }
        Err(format!(
            "no config file found; checked {}",
            candidates
                .iter()
                .map(|path| path.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    pub fn from_json(data: &str) -> Result<Self, String> {
        serde_json::from_str(data).map_err(|err| format!("config parse failed: {}", err))
    }

    /// The four-octet address redirect packets carry.
    pub fn redirect_ip(&self) -> Result<[u8; 4], String> {
        self.hostname
            .parse::<Ipv4Addr>()
            .map(|addr| addr.octets())
            .map_err(|_| {
                format!(
                    "hostname '{}' is not a dotted-quad IPv4 address",
                    self.hostname
                )
            })
    }

    pub fn parameter_path(&self) -> PathBuf {
        self.root.join(&self.parameter_dir)
    }

    pub fn patch_path(&self) -> PathBuf {
        self.root.join(&self.patch_dir)
    }

    pub fn save_path(&self) -> PathBuf {
        self.root.join(&self.save_dir)
    }
}
