//! Configuration loading and root folder resolution
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. `CRP_ROOT_FOLDER` environment variable
//! 3. TOML config file `root_folder` key
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing or unreadable TOML file is never fatal: it is logged and the
//! compiled defaults are used instead.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "CRP_ROOT_FOLDER";

/// Environment variable naming an explicit config file
pub const CONFIG_FILE_ENV: &str = "CRP_CONFIG";

/// Primary store file name inside the root folder
pub const PRIMARY_DB_FILE: &str = "crp.db";

/// Audit store file name inside the root folder
pub const AUDIT_DB_FILE: &str = "crp-audit.db";

/// Default HTTP bind address
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:5790";

/// Compiled fallback values used when nothing else is configured
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub bind_address: SocketAddr,
}

impl CompiledDefaults {
    /// Defaults for the platform this binary was compiled for
    pub fn for_current_platform() -> Self {
        let root_folder = if cfg!(target_os = "linux") {
            dirs::data_local_dir()
                .map(|d| d.join("crp"))
                .unwrap_or_else(|| PathBuf::from("/var/lib/crp"))
        } else if cfg!(target_os = "macos") {
            dirs::data_dir()
                .map(|d| d.join("crp"))
                .unwrap_or_else(|| PathBuf::from("/Library/Application Support/crp"))
        } else if cfg!(target_os = "windows") {
            dirs::data_local_dir()
                .map(|d| d.join("crp"))
                .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\crp"))
        } else {
            PathBuf::from("./crp_data")
        };

        Self {
            root_folder,
            log_level: "info".to_string(),
            log_file: None,
            bind_address: DEFAULT_BIND_ADDRESS
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 5790))),
        }
    }
}

/// `[logging]` section of the TOML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// EnvFilter directive, e.g. "info" or "crp_access=debug"
    #[serde(default)]
    pub level: Option<String>,
    /// Optional log file path
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Parsed TOML configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub root_folder: Option<PathBuf>,
    /// Explicit audit store location; defaults to `<root>/crp-audit.db`
    #[serde(default)]
    pub audit_database: Option<PathBuf>,
    #[serde(default)]
    pub bind_address: Option<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TomlConfig {
    /// Parse a TOML document
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Read and parse a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Bind address from the file, falling back to the compiled default
    pub fn bind_address(&self, defaults: &CompiledDefaults) -> Result<SocketAddr> {
        match &self.bind_address {
            Some(addr) => addr
                .parse()
                .map_err(|e| Error::Config(format!("Invalid bind_address '{}': {}", addr, e))),
            None => Ok(defaults.bind_address),
        }
    }
}

/// Locate the config file for this platform
///
/// `CRP_CONFIG` wins; otherwise `~/.config/crp/config.toml`, then
/// `/etc/crp/config.toml` on Linux.
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
        return Some(PathBuf::from(path));
    }

    let user_config = dirs::config_dir().map(|d| d.join("crp").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/crp/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Load the TOML config, degrading to an empty config on any problem
pub fn load_toml_config_or_default() -> TomlConfig {
    let Some(path) = config_file_path() else {
        debug!("No config file found, using compiled defaults");
        return TomlConfig::default();
    };

    match TomlConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            warn!("Ignoring config file {}: {}", path.display(), e);
            TomlConfig::default()
        }
    }
}

/// Root folder resolution following the 4-tier priority order
pub struct RootFolderResolver {
    cli_arg: Option<PathBuf>,
    toml: TomlConfig,
    defaults: CompiledDefaults,
}

impl RootFolderResolver {
    /// Create a resolver reading the platform config file
    pub fn new() -> Self {
        Self::with_config(load_toml_config_or_default())
    }

    /// Create a resolver over an already-loaded config
    pub fn with_config(toml: TomlConfig) -> Self {
        Self {
            cli_arg: None,
            toml,
            defaults: CompiledDefaults::for_current_platform(),
        }
    }

    /// Command-line override (priority 1)
    pub fn with_cli_arg(mut self, cli_arg: Option<PathBuf>) -> Self {
        self.cli_arg = cli_arg;
        self
    }

    /// Resolve the root folder
    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml.root_folder {
            return path.clone();
        }

        self.defaults.root_folder.clone()
    }
}

impl Default for RootFolderResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Prepares the resolved root folder and names the two stores inside it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
    audit_override: Option<PathBuf>,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self {
            root_folder,
            audit_override: None,
        }
    }

    /// Place the audit store somewhere other than the root folder
    pub fn with_audit_database(mut self, path: Option<PathBuf>) -> Self {
        self.audit_override = path;
        self
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    /// Create the root folder if needed (idempotent)
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        Ok(())
    }

    /// Primary store path
    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(PRIMARY_DB_FILE)
    }

    /// Audit store path
    pub fn audit_database_path(&self) -> PathBuf {
        self.audit_override
            .clone()
            .unwrap_or_else(|| self.root_folder.join(AUDIT_DB_FILE))
    }

    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }

    /// Both store paths, rejecting a configuration that would put the audit
    /// trail in the primary store's file
    pub fn store_paths(&self) -> Result<(PathBuf, PathBuf)> {
        let primary = self.database_path();
        let audit = self.audit_database_path();
        if same_file_path(&primary, &audit) {
            return Err(Error::Config(format!(
                "Audit store must be separate from the primary store (both resolve to {})",
                primary.display()
            )));
        }
        Ok((primary, audit))
    }
}

fn same_file_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = TomlConfig::parse(
            r#"
            root_folder = "/srv/crp"
            audit_database = "/srv/audit/crp-audit.db"
            bind_address = "0.0.0.0:6000"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.root_folder, Some(PathBuf::from("/srv/crp")));
        assert_eq!(
            config.audit_database,
            Some(PathBuf::from("/srv/audit/crp-audit.db"))
        );
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
        let defaults = CompiledDefaults::for_current_platform();
        assert_eq!(
            config.bind_address(&defaults).unwrap(),
            "0.0.0.0:6000".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_parse_empty_config_uses_defaults() {
        let config = TomlConfig::parse("").unwrap();
        assert_eq!(config, TomlConfig::default());
        let defaults = CompiledDefaults::for_current_platform();
        assert_eq!(config.bind_address(&defaults).unwrap(), defaults.bind_address);
    }

    #[test]
    fn test_bad_bind_address_is_config_error() {
        let config = TomlConfig::parse(r#"bind_address = "nowhere""#).unwrap();
        let defaults = CompiledDefaults::for_current_platform();
        assert!(matches!(
            config.bind_address(&defaults),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_store_paths_rejects_shared_file() {
        let root = PathBuf::from("/tmp/crp-same-file");
        let initializer = RootFolderInitializer::new(root.clone())
            .with_audit_database(Some(root.join(PRIMARY_DB_FILE)));
        assert!(matches!(initializer.store_paths(), Err(Error::Config(_))));
    }

    #[test]
    fn test_store_paths_default_layout() {
        let root = PathBuf::from("/tmp/crp-layout");
        let (primary, audit) = RootFolderInitializer::new(root.clone())
            .store_paths()
            .unwrap();
        assert_eq!(primary, root.join("crp.db"));
        assert_eq!(audit, root.join("crp-audit.db"));
    }
}
