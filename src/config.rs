//! Configuration for the media indexer

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::{Result, ScanError};

/// Default number of directory entries delivered per listing page
pub const DEFAULT_PAGE_SIZE: usize = 64;

/// Default per-file probe timeout in seconds
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// Default number of ffprobe processes allowed to run at once
pub const DEFAULT_MAX_PROBES: usize = 2;

/// Default interval between progress messages
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 500;

/// System wide configuration file
pub const SYSTEM_CONFIG: &str = "/etc/media_indexer.toml";

/// Per-user configuration file, relative to `$HOME`
pub const USER_CONFIG: &str = ".media_indexer.toml";

/// Drivers the repository can open
const SQLITE_DRIVERS: [&str; 2] = ["sqlite", "sqlite3"];

/// Database connection parameters.
///
/// Either a full `uri` or the discrete components. When a uri is present it
/// wins: every component is re-derived from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub uri: Option<String>,
    pub drivername: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
}

/// Where a sqlite database lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteLocation {
    Memory,
    File(PathBuf),
}

impl DatabaseConfig {
    /// Configuration for a sqlite database file
    pub fn sqlite(path: impl AsRef<Path>) -> Self {
        Self {
            drivername: Some("sqlite".to_string()),
            database: Some(path.as_ref().to_string_lossy().to_string()),
            ..Default::default()
        }
    }

    /// Configuration for a private in-memory sqlite database
    pub fn sqlite_memory() -> Self {
        Self {
            drivername: Some("sqlite".to_string()),
            ..Default::default()
        }
    }

    /// Overlay every component set in `overrides` on top of `self`
    pub fn merge(self, overrides: DatabaseConfig) -> Self {
        Self {
            uri: overrides.uri.or(self.uri),
            drivername: overrides.drivername.or(self.drivername),
            user: overrides.user.or(self.user),
            password: overrides.password.or(self.password),
            host: overrides.host.or(self.host),
            port: overrides.port.or(self.port),
            database: overrides.database.or(self.database),
        }
    }

    /// Derive the components from the uri (if any), check the mandatory
    /// ones and recompose the canonical uri.
    pub fn resolve(mut self) -> Result<Self> {
        if let Some(uri) = self.uri.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            let url = Url::parse(uri)?;
            self.drivername = Some(url.scheme().to_string());
            self.user = Some(url.username())
                .filter(|u| !u.is_empty())
                .map(str::to_string);
            self.password = url.password().map(str::to_string);
            self.host = url
                .host_str()
                .filter(|h| !h.is_empty())
                .map(str::to_string);
            self.port = url.port();
            self.database = url
                .path()
                .strip_prefix('/')
                .filter(|p| !p.is_empty())
                .map(str::to_string);
        }

        let driver = self
            .drivername
            .clone()
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| ScanError::config("Missing drivername"))?;
        self.uri = Some(self.compose_uri(&driver));
        Ok(self)
    }

    fn compose_uri(&self, driver: &str) -> String {
        let mut uri = format!("{}://", driver);
        if let Some(user) = &self.user {
            uri.push_str(user);
            if let Some(password) = &self.password {
                uri.push(':');
                uri.push_str(password);
            }
            uri.push('@');
        }
        if let Some(host) = &self.host {
            uri.push_str(host);
        }
        if let Some(port) = self.port {
            let _ = write!(uri, ":{}", port);
        }
        if let Some(database) = &self.database {
            uri.push('/');
            uri.push_str(database);
        }
        uri
    }

    /// Resolve where the sqlite database lives.
    ///
    /// Only sqlite drivers are supported; a missing database component
    /// selects an in-memory database.
    pub fn sqlite_location(&self) -> Result<SqliteLocation> {
        let driver = self
            .drivername
            .as_deref()
            .ok_or_else(|| ScanError::config("Missing drivername"))?;
        if !SQLITE_DRIVERS.contains(&driver) {
            return Err(ScanError::config(format!(
                "Unsupported database driver '{}': only sqlite is available",
                driver
            )));
        }
        Ok(match self.database.as_deref() {
            None | Some(":memory:") => SqliteLocation::Memory,
            Some(path) => SqliteLocation::File(PathBuf::from(path)),
        })
    }
}

/// Contents of a configuration file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Database connection parameters
    pub database: DatabaseConfig,
    /// Media root directory
    pub root: Option<PathBuf>,
}

impl ConfigFile {
    /// Parse a TOML configuration document
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load the configuration file.
    ///
    /// An explicitly passed file must exist. Otherwise the system wide file is
    /// tried, then the per-user one; with neither present the defaults apply.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::read(path);
        }

        let system = Path::new(SYSTEM_CONFIG);
        if system.is_file() {
            return Self::read(system);
        }

        if let Some(home) = std::env::var_os("HOME") {
            let user = Path::new(&home).join(USER_CONFIG);
            if user.is_file() {
                return Self::read(&user);
            }
        }

        Ok(Self::default())
    }

    fn read(path: &Path) -> Result<Self> {
        log::debug!("Reading configuration from {}", path.display());
        let text = std::fs::read_to_string(path).map_err(|e| {
            ScanError::config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }
}

/// Configuration for an indexing run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Media root directory
    pub root: PathBuf,

    /// Database connection parameters
    pub database: DatabaseConfig,

    /// Stop the loop once nothing is outstanding
    pub quit_on_idle: bool,

    /// Probe every file regardless of its stored modification time
    pub force_rescan: bool,

    /// Monitor the root directory for changes
    pub watch: bool,

    /// Install the rescan/liveness/interrupt signal handlers
    pub handle_signals: bool,

    /// Directory entries per listing page
    pub page_size: usize,

    /// Per-file probe timeout in seconds
    pub probe_timeout_secs: u64,

    /// Upper bound on concurrently running ffprobe processes
    pub max_probes: usize,

    /// Emit JSON progress lines on stderr
    pub show_progress: bool,

    /// Minimum interval between progress lines
    pub progress_interval_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            database: DatabaseConfig::default(),
            quit_on_idle: false,
            force_rescan: false,
            watch: true,
            handle_signals: true,
            page_size: DEFAULT_PAGE_SIZE,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            max_probes: DEFAULT_MAX_PROBES,
            show_progress: false,
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
        }
    }
}

impl ScanConfig {
    /// Create a new config for the given root directory
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            ..Default::default()
        }
    }

    /// Create a config builder
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::new()
    }

    /// Check that the root directory is usable
    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(ScanError::config("Missing media root directory"));
        }
        if !self.root.is_dir() {
            return Err(ScanError::new(
                crate::error::ScanErrorKind::Config,
                Some(self.root.clone()),
                "Media root is not a directory",
            ));
        }
        Ok(())
    }

    /// Listing page size, never zero
    pub fn effective_page_size(&self) -> usize {
        self.page_size.max(1)
    }

    /// Per-file probe timeout
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Builder for ScanConfig
#[derive(Debug, Default)]
pub struct ScanConfigBuilder {
    config: ScanConfig,
}

impl ScanConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the root directory
    pub fn root(mut self, root: PathBuf) -> Self {
        self.config.root = root;
        self
    }

    /// Set the database connection parameters
    pub fn database(mut self, database: DatabaseConfig) -> Self {
        self.config.database = database;
        self
    }

    /// Stop once all listings and probes are done
    pub fn quit_on_idle(mut self, enabled: bool) -> Self {
        self.config.quit_on_idle = enabled;
        self
    }

    /// Probe every file even when unchanged
    pub fn force_rescan(mut self, enabled: bool) -> Self {
        self.config.force_rescan = enabled;
        self
    }

    /// Enable or disable the change monitor
    pub fn watch(mut self, enabled: bool) -> Self {
        self.config.watch = enabled;
        self
    }

    /// Enable or disable the signal handlers
    pub fn handle_signals(mut self, enabled: bool) -> Self {
        self.config.handle_signals = enabled;
        self
    }

    /// Set the listing page size
    pub fn page_size(mut self, size: usize) -> Self {
        self.config.page_size = size;
        self
    }

    /// Set the probe timeout
    pub fn probe_timeout_secs(mut self, secs: u64) -> Self {
        self.config.probe_timeout_secs = secs;
        self
    }

    /// Set how many ffprobe processes may run at once
    pub fn max_probes(mut self, max: usize) -> Self {
        self.config.max_probes = max;
        self
    }

    /// Enable or disable progress output
    pub fn show_progress(mut self, enabled: bool) -> Self {
        self.config.show_progress = enabled;
        self
    }

    /// Build the config
    pub fn build(self) -> ScanConfig {
        self.config
    }
}
