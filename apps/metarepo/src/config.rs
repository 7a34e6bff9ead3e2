//! # Configuration
//!
//! `metarepo.toml` plus environment overrides.
//!
//! ```toml
//! [repository]
//! metadata_collection_id = "5c1b...-local"
//! metadata_collection_name = "Local Metarepo"
//! default_user = "metarepo"
//!
//! [storage]
//! backend = "redb"        # or "memory"
//! path = "metarepo.redb"
//!
//! [types]
//! path = "types.toml"
//!
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//! ```
//!
//! ## Environment Variables
//!
//! - `METAREPO_CONFIG`: config file path (when `--config` is not given)
//! - `METAREPO_COLLECTION_ID`: overrides `repository.metadata_collection_id`
//! - `METAREPO_DB`: overrides `storage.path`

use metarepo_core::{
    MetarepoError, Repository, RepositoryIdentity, TypeCatalog, TypeDefinitions, TypeRegistry,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const CONFIG_ENV: &str = "METAREPO_CONFIG";
pub const COLLECTION_ID_ENV: &str = "METAREPO_COLLECTION_ID";
pub const DB_ENV: &str = "METAREPO_DB";

/// Config file read from the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "metarepo.toml";

/// Maximum size of a config or type-definition file (4 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 4 * 1024 * 1024;

// =============================================================================
// SECTIONS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepositoryConfig {
    pub metadata_collection_id: String,
    pub metadata_collection_name: String,
    /// User recorded on writes that do not name one.
    pub default_user: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            metadata_collection_id: "metarepo-local".to_string(),
            metadata_collection_name: "Local Metarepo".to_string(),
            default_user: "metarepo".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Redb,
    Memory,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Redb => f.write_str("redb"),
            Self::Memory => f.write_str("memory"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub backend: Backend,
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Redb,
            path: PathBuf::from("metarepo.redb"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TypesConfig {
    /// TOML type-definition file. Without one the repository knows no types.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub repository: RepositoryConfig,
    pub storage: StorageConfig,
    pub types: TypesConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Load the configuration.
    ///
    /// Lookup order: `path`, then `METAREPO_CONFIG`, then `./metarepo.toml`
    /// if present, else built-in defaults. An explicitly named file must exist.
    /// Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self, MetarepoError> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    Self::from_file(default)?
                } else {
                    tracing::debug!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
                    Self::default()
                }
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Read a config file. A relative `types.path` is resolved against the
    /// file's directory.
    pub fn from_file(path: &Path) -> Result<Self, MetarepoError> {
        let text = read_limited(path)?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(types) = config.types.path.as_mut()
            && types.is_relative()
            && let Some(dir) = path.parent()
        {
            *types = dir.join(&*types);
        }
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, MetarepoError> {
        toml::from_str(text)
            .map_err(|e| MetarepoError::InvalidParameter(format!("Invalid configuration: {}", e)))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var(COLLECTION_ID_ENV)
            && !id.trim().is_empty()
        {
            tracing::info!("{} overrides metadata collection id", COLLECTION_ID_ENV);
            self.repository.metadata_collection_id = id.trim().to_string();
        }
        if let Some(db) = std::env::var_os(DB_ENV) {
            tracing::info!("{} overrides storage path", DB_ENV);
            self.storage.path = PathBuf::from(db);
        }
    }

    pub fn identity(&self) -> RepositoryIdentity {
        RepositoryIdentity::new(
            self.repository.metadata_collection_id.clone(),
            self.repository.metadata_collection_name.clone(),
        )
    }

    /// Load the type-definition file named by `[types]`.
    pub fn load_types(&self) -> Result<TypeCatalog, MetarepoError> {
        match &self.types.path {
            Some(path) => {
                let catalog = parse_types(&read_limited(path)?)?;
                tracing::info!("Loaded {} type definitions from {}", catalog.len(), path.display());
                Ok(catalog)
            }
            None => {
                tracing::warn!("No [types] path configured, the repository knows no types");
                Ok(TypeCatalog::default())
            }
        }
    }

    /// Open the configured repository with the configured types.
    pub fn open_repository(&self) -> Result<Repository, MetarepoError> {
        let registry: Arc<dyn TypeRegistry> = Arc::new(self.load_types()?);
        match self.storage.backend {
            Backend::Redb => Repository::with_redb(&self.storage.path, registry, self.identity()),
            Backend::Memory => Ok(Repository::in_memory(registry, self.identity())),
        }
    }
}

/// Parse a TOML type-definition file into a validated catalog.
pub fn parse_types(text: &str) -> Result<TypeCatalog, MetarepoError> {
    let definitions: TypeDefinitions = toml::from_str(text).map_err(|e| {
        MetarepoError::InvalidTypeDefinition(format!("Invalid type-definition file: {}", e))
    })?;
    TypeCatalog::from_definitions(definitions)
}

fn read_limited(path: &Path) -> Result<String, MetarepoError> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        MetarepoError::Storage(format!("Cannot read '{}': {}", path.display(), e))
    })?;
    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(MetarepoError::InvalidParameter(format!(
            "File '{}' is {} bytes, maximum is {}",
            path.display(),
            metadata.len(),
            MAX_CONFIG_FILE_SIZE
        )));
    }
    std::fs::read_to_string(path)
        .map_err(|e| MetarepoError::Storage(format!("Cannot read '{}': {}", path.display(), e)))
}

// =============================================================================
// TESTS
// =============================================================================
