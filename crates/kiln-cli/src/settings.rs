//! Command-line flags and their validation into a single cache operation.

use clap::{Parser, ValueEnum};
use kiln_cache::keys::repository_namespace;
use kiln_cache::storage::s3::{DEFAULT_ENDPOINT, DEFAULT_REGION};
use kiln_cache::{
    ArchiveFormat, ArchiveKind, CacheOperation, DEFAULT_FLUSH_CONCURRENCY, MaxAge, S3Config,
    flush_prefix, object_key,
};
use kiln_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Storage backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    #[default]
    S3,
    Filesystem,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "kiln")]
#[command(author, version, about = "Build cache plugin: rebuild, restore or flush cached directories", long_about = None)]
pub struct Cli {
    /// Rebuild the cache from the mount directories
    #[arg(long, env = "PLUGIN_REBUILD")]
    pub rebuild: bool,

    /// Restore the cache directories
    #[arg(long, env = "PLUGIN_RESTORE")]
    pub restore: bool,

    /// Flush old cache archives
    #[arg(long, env = "PLUGIN_FLUSH")]
    pub flush: bool,

    /// Remote namespace for the archive [default: <repo owner>/<repo name>]
    #[arg(long, env = "PLUGIN_PATH")]
    pub path: Option<String>,

    /// Namespace tried when nothing exists at the primary path [default: path]
    #[arg(long, alias = "fallback_path", env = "PLUGIN_FALLBACK_PATH")]
    pub fallback_path: Option<String>,

    /// Archive object name [default: archive.tgz or archive.tar by format]
    #[arg(long, env = "PLUGIN_FILENAME")]
    pub filename: Option<String>,

    /// Archive format: tgz, tar.gz or tar [default: tgz]
    #[arg(long, env = "PLUGIN_FORMAT")]
    pub format: Option<String>,

    /// Directories to cache (comma separated or repeated)
    #[arg(long, env = "PLUGIN_MOUNT", value_delimiter = ',')]
    pub mount: Vec<String>,

    /// Flush cache archives older than this many days
    #[arg(long, alias = "flush_age", env = "PLUGIN_FLUSH_AGE", default_value = "30")]
    pub flush_age: String,

    /// Maximum concurrent deletes while flushing
    #[arg(long, env = "PLUGIN_FLUSH_CONCURRENCY", default_value_t = DEFAULT_FLUSH_CONCURRENCY)]
    pub flush_concurrency: usize,

    /// Directory archive entries are stored relative to
    #[arg(long, env = "PLUGIN_ROOT", default_value = "/")]
    pub root: PathBuf,

    /// Repository owner, used for the default path
    #[arg(long, alias = "repo.owner", env = "DRONE_REPO_OWNER")]
    pub repo_owner: Option<String>,

    /// Repository name, used for the default path
    #[arg(long, alias = "repo.name", env = "DRONE_REPO_NAME")]
    pub repo_name: Option<String>,

    /// Storage backend
    #[arg(long, value_enum, env = "PLUGIN_BACKEND", default_value_t = BackendKind::S3)]
    pub backend: BackendKind,

    /// Directory holding objects for the filesystem backend
    #[arg(long, env = "PLUGIN_STORAGE_ROOT")]
    pub storage_root: Option<PathBuf>,

    /// Object storage endpoint
    #[arg(long, env = "PLUGIN_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Object storage signing region
    #[arg(long, env = "PLUGIN_REGION", default_value = DEFAULT_REGION)]
    pub region: String,

    /// Object storage bucket name
    #[arg(long, env = "PLUGIN_BUCKET")]
    pub bucket: Option<String>,

    /// Object storage access key id
    #[arg(long, env = "PLUGIN_ACCESS_KEY_ID")]
    pub access_key_id: Option<String>,

    /// Object storage access key secret
    #[arg(long, env = "PLUGIN_ACCESS_KEY_SECRET", hide_env_values = true)]
    pub access_key_secret: Option<String>,

    /// Use path-style bucket addressing
    #[arg(long, env = "PLUGIN_PATH_STYLE")]
    pub path_style: bool,

    /// Debug plugin output
    #[arg(long, env = "PLUGIN_DEBUG")]
    pub debug: bool,

    /// Log output format
    #[arg(long, value_enum, env = "PLUGIN_LOG_FORMAT", default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Which storage to construct.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    S3(S3Config),
    Filesystem { root: PathBuf },
}

/// Fully validated invocation.
#[derive(Debug)]
pub struct Settings {
    pub operation: CacheOperation,
    pub backend: BackendConfig,
    pub root: PathBuf,
    pub flush_concurrency: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Rebuild,
    Restore,
    Flush,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl Cli {
    /// Validate flags and build the operation to run. Relative paths are
    /// resolved against `cwd`. Nothing here touches storage.
    pub fn resolve(&self, cwd: &Path) -> Result<Settings> {
        let mode = self.mode()?;

        let mounts: Vec<PathBuf> = self
            .mount
            .iter()
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .map(|m| cwd.join(m))
            .collect();
        if mode == Mode::Rebuild && mounts.is_empty() {
            return Err(Error::Configuration("No mounts specified".into()));
        }

        let path = match non_empty(self.path.as_deref()) {
            Some(path) => path.to_string(),
            None => {
                info!("No path specified. Creating default");
                self.default_path()?
            }
        };

        let fallback_path = match non_empty(self.fallback_path.as_deref()) {
            Some(fallback) => fallback.to_string(),
            None => {
                info!("No fallback_path specified. Creating default");
                path.clone()
            }
        };

        let format = match non_empty(self.format.as_deref()) {
            Some(format) => format.parse::<ArchiveFormat>()?,
            None => ArchiveFormat::default(),
        };
        info!("Set archive format to {}", format.as_str());

        let filename = non_empty(self.filename.as_deref())
            .unwrap_or(format.default_filename())
            .to_string();
        ArchiveKind::from_filename(&filename)?;

        let flush_age: i64 = self.flush_age.trim().parse().map_err(|_| {
            Error::Configuration(format!(
                "flush_age must be a whole number of days, got '{}'",
                self.flush_age
            ))
        })?;

        let backend = self.backend_config(cwd)?;

        let operation = match mode {
            Mode::Rebuild => CacheOperation::Rebuild {
                mounts,
                destination: object_key(&path, &filename),
            },
            Mode::Restore => CacheOperation::Restore {
                primary: object_key(&path, &filename),
                fallback: object_key(&fallback_path, &filename),
            },
            Mode::Flush => {
                let prefix = flush_prefix(&path);
                info!("Flushing cache items older than {} days at {}", flush_age, prefix);
                CacheOperation::Flush {
                    prefix,
                    policy: Arc::new(MaxAge::days(flush_age)),
                }
            }
        };

        Ok(Settings {
            operation,
            backend,
            root: cwd.join(&self.root),
            flush_concurrency: self.flush_concurrency,
        })
    }

    fn mode(&self) -> Result<Mode> {
        let selected: Vec<Mode> = [
            (self.rebuild, Mode::Rebuild),
            (self.restore, Mode::Restore),
            (self.flush, Mode::Flush),
        ]
        .into_iter()
        .filter_map(|(set, mode)| set.then_some(mode))
        .collect();

        match selected.as_slice() {
            [] => Err(Error::Configuration("No action specified".into())),
            [mode] => Ok(*mode),
            _ => Err(Error::Configuration(
                "Must use a single mode: rebuild, restore, flush".into(),
            )),
        }
    }

    fn default_path(&self) -> Result<String> {
        match (
            non_empty(self.repo_owner.as_deref()),
            non_empty(self.repo_name.as_deref()),
        ) {
            (Some(owner), Some(name)) => Ok(repository_namespace(owner, name)),
            _ => Err(Error::Configuration(
                "No path specified and repository owner/name are not set".into(),
            )),
        }
    }

    fn backend_config(&self, cwd: &Path) -> Result<BackendConfig> {
        match self.backend {
            BackendKind::S3 => {
                let config = S3Config {
                    endpoint: self.endpoint.clone(),
                    region: self.region.clone(),
                    bucket: self.bucket.clone().unwrap_or_default(),
                    access_key_id: self.access_key_id.clone().unwrap_or_default(),
                    access_key_secret: self.access_key_secret.clone().unwrap_or_default(),
                    path_style: self.path_style,
                };
                config.validate()?;
                Ok(BackendConfig::S3(config))
            }
            BackendKind::Filesystem => {
                let root = self.storage_root.as_ref().ok_or_else(|| {
                    Error::Configuration("storage-root must be set for the filesystem backend".into())
                })?;
                Ok(BackendConfig::Filesystem {
                    root: cwd.join(root),
                })
            }
        }
    }
}
