//! CLI configuration handling.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use strata_migrate::{CopyFailurePolicy, DEFAULT_VALUES_TABLE, MigrationConfig};
use strata_postgres::{PgConfig, SslMode};

use crate::error::{CliError, CliResult};

/// Default config file name (lives in project root)
pub const CONFIG_FILE_NAME: &str = "strata.toml";

/// Environment variable that overrides the database settings
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Strata CLI configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Migration configuration
    pub migration: MigrationSettings,

    /// Packages in chain order
    pub packages: Vec<PackageConfig>,

    /// Directory relative paths resolve against
    #[serde(skip)]
    pub base_dir: PathBuf,

    /// File the configuration was read from
    #[serde(skip)]
    pub source: PathBuf,
}

impl Config {
    /// Find the config file: an explicit path, else `strata.toml` in `cwd`.
    pub fn locate(explicit: Option<&Path>, cwd: &Path) -> CliResult<PathBuf> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => cwd.join(CONFIG_FILE_NAME),
        };
        if !path.is_file() {
            return Err(CliError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        Ok(path)
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&content)?;
        config.source = path.to_path_buf();
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> CliResult<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> CliResult<()> {
        if self.packages.is_empty() {
            return Err(CliError::Config("no [[packages]] configured".to_string()));
        }
        for (i, package) in self.packages.iter().enumerate() {
            if package.name.trim().is_empty() {
                return Err(CliError::Config(format!("package #{} has no name", i + 1)));
            }
            if self.packages[..i].iter().any(|p| p.name == package.name) {
                return Err(CliError::Config(format!(
                    "package '{}' is declared twice",
                    package.name
                )));
            }
        }
        Ok(())
    }

    /// Resolve a path from the config file against its directory
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Position of a package in the chain
    pub fn package_index(&self, name: &str) -> CliResult<usize> {
        self.packages
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| CliError::Config(format!("unknown package '{}'", name)))
    }

    /// The package to run when none is named
    pub fn first_package(&self) -> CliResult<&PackageConfig> {
        self.packages
            .first()
            .ok_or_else(|| CliError::Config("no [[packages]] configured".to_string()))
    }

    /// The package that runs after `name`, if any
    pub fn next_package(&self, name: &str) -> CliResult<Option<&PackageConfig>> {
        let index = self.package_index(name)?;
        Ok(self.packages.get(index + 1))
    }

    /// Engine settings for one run
    pub fn migration_config(&self) -> MigrationConfig {
        MigrationConfig::new()
            .mapping_table(self.migration.mapping_table.clone())
            .on_copy_failure(self.migration.on_copy_failure)
    }
}

/// Database configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database connection URL
    pub url: Option<String>,

    /// Host (used when no URL is given)
    pub host: Option<String>,

    /// Port
    pub port: Option<u16>,

    /// Database name
    pub name: Option<String>,

    /// Username
    pub user: Option<String>,

    /// Password
    pub password: Option<String>,

    /// SSL mode
    pub ssl: Option<SslMode>,

    /// Create the database when it does not exist
    pub ensure_database: bool,
}

impl DatabaseConfig {
    /// Build the connection settings. A `DATABASE_URL` value replaces the file.
    pub fn connection(&self, env_url: Option<String>) -> CliResult<PgConfig> {
        if let Some(url) = env_url.filter(|u| !u.trim().is_empty()) {
            return Ok(PgConfig::from_url(url)?);
        }

        let mut builder = PgConfig::builder().application_name("strata");
        if let Some(url) = &self.url {
            builder = builder.url(url.clone());
        }
        if let Some(host) = &self.host {
            builder = builder.host(host.clone());
        }
        if let Some(port) = self.port {
            builder = builder.port(port);
        }
        if let Some(name) = &self.name {
            builder = builder.database(name.clone());
        }
        if let Some(user) = &self.user {
            builder = builder.user(user.clone());
        }
        if let Some(password) = &self.password {
            builder = builder.password(password.clone());
        }
        if let Some(ssl) = self.ssl {
            builder = builder.ssl_mode(ssl);
        }
        Ok(builder.build()?)
    }

    /// Connection settings using the process environment
    pub fn connection_from_env(&self) -> CliResult<PgConfig> {
        self.connection(std::env::var(DATABASE_URL_ENV).ok())
    }
}

/// Migration configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MigrationSettings {
    /// Seed identity mapping table name
    pub mapping_table: String,

    /// What to do with rows that fail to copy back after a rebuild
    pub on_copy_failure: CopyFailurePolicy,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            mapping_table: DEFAULT_VALUES_TABLE.to_string(),
            on_copy_failure: CopyFailurePolicy::Skip,
        }
    }
}

/// One package in the chain
#[derive(Debug, Clone, Deserialize)]
pub struct PackageConfig {
    /// Package name
    pub name: String,

    /// Seed level (defaults to the package name)
    pub level: Option<String>,

    /// Table descriptor file
    pub descriptors: PathBuf,

    /// Seed file for the package level
    pub seeds: Option<PathBuf>,

    /// Modules that add tables and their own seed levels
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
}

impl PackageConfig {
    /// Seed level owned by the package itself
    pub fn level(&self) -> &str {
        self.level.as_deref().unwrap_or(&self.name)
    }
}

/// A module inside a package
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleConfig {
    /// Module name, also its seed level
    pub name: String,

    /// Table descriptor file
    pub descriptors: Option<PathBuf>,

    /// Seed file
    pub seeds: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[database]
host = "db"
name = "app"
user = "svc"
ssl = "disable"

[migration]
on_copy_failure = "abort"

[[packages]]
name = "core"
descriptors = "core/tables.json"
seeds = "core/seeds.json"

[[packages]]
name = "systems"
level = "system"
descriptors = "systems/tables.json"
modules = [{ name = "billing", seeds = "billing/seeds.json" }]
"#;

    #[test]
    fn test_parse_config() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.packages.len(), 2);
        assert_eq!(config.packages[0].level(), "core");
        assert_eq!(config.packages[1].level(), "system");
        assert_eq!(config.packages[1].modules[0].name, "billing");
        assert_eq!(config.migration.mapping_table, DEFAULT_VALUES_TABLE);
        assert_eq!(config.migration.on_copy_failure, CopyFailurePolicy::Abort);
    }

    #[test]
    fn test_package_chain() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.first_package().unwrap().name, "core");
        assert_eq!(
            config.next_package("core").unwrap().map(|p| p.name.as_str()),
            Some("systems")
        );
        assert!(config.next_package("systems").unwrap().is_none());
        assert!(config.next_package("missing").is_err());
    }

    #[test]
    fn test_rejects_duplicate_packages() {
        let toml = r#"
[[packages]]
name = "core"
descriptors = "a.json"

[[packages]]
name = "core"
descriptors = "b.json"
"#;
        assert!(Config::parse(toml).is_err());
        assert!(Config::parse("").is_err());
    }

    #[test]
    fn test_connection_from_parts() {
        let config = Config::parse(SAMPLE).unwrap();
        let pg = config.database.connection(None).unwrap();
        assert_eq!(pg.host, "db");
        assert_eq!(pg.database, "app");
        assert_eq!(pg.user, "svc");
        assert_eq!(pg.ssl_mode, SslMode::Disable);
    }

    #[test]
    fn test_database_url_overrides_file() {
        let config = Config::parse(SAMPLE).unwrap();
        let pg = config
            .database
            .connection(Some("postgres://other@elsewhere/seeded".to_string()))
            .unwrap();
        assert_eq!(pg.host, "elsewhere");
        assert_eq!(pg.database, "seeded");
        assert!(config.database.connection(Some("mysql://x/y".to_string())).is_err());
    }

    #[test]
    fn test_relative_paths_resolve_against_config_dir() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.base_dir = PathBuf::from("/srv/app");
        assert_eq!(
            config.resolve(Path::new("core/tables.json")),
            PathBuf::from("/srv/app/core/tables.json")
        );
        assert_eq!(config.resolve(Path::new("/abs.json")), PathBuf::from("/abs.json"));
    }
}
