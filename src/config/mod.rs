use std::env;
use std::path::PathBuf;

use crate::services::staging::StagingConfig;

/// Runtime configuration for the transformation backend.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Maximum accepted upload size in bytes (default: 100 MB).
    pub max_upload_size: usize,

    /// Inbound staging directory for raw uploads (default: "uploads").
    pub inbound_dir: PathBuf,

    /// Outbound staging directory for transform results (default: "output").
    pub outbound_dir: PathBuf,

    /// Grace window before staged files are deleted after a response has
    /// been handed to the transport (default: 60 s). Long enough for a slow
    /// client to finish a streamed download.
    pub cleanup_grace_secs: u64,

    /// How often the background sweep runs (default: 10 s).
    pub sweep_interval_secs: u64,

    /// Maximum number of files in one bulk-resize job (default: 50).
    pub max_bulk_files: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_upload_size: 100 * 1024 * 1024, // 100 MB
            inbound_dir: PathBuf::from("uploads"),
            outbound_dir: PathBuf::from("output"),
            cleanup_grace_secs: 60,
            sweep_interval_secs: 10,
            max_bulk_files: 50,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults above for anything unset or unparsable.
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            max_upload_size: env::var("MAX_UPLOAD_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_upload_size),

            inbound_dir: env::var("STAGING_INBOUND_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.inbound_dir),

            outbound_dir: env::var("STAGING_OUTBOUND_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.outbound_dir),

            cleanup_grace_secs: env::var("CLEANUP_GRACE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.cleanup_grace_secs),

            sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.sweep_interval_secs),

            max_bulk_files: env::var("MAX_BULK_FILES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_bulk_files),
        }
    }

    /// Config for development and tests: short grace window, frequent
    /// sweeps.
    pub fn development() -> Self {
        Self {
            cleanup_grace_secs: 1,
            sweep_interval_secs: 1,
            ..Self::default()
        }
    }

    pub fn staging(&self) -> StagingConfig {
        StagingConfig {
            inbound_dir: self.inbound_dir.clone(),
            outbound_dir: self.outbound_dir.clone(),
        }
    }
}
