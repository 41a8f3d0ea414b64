//! Point-in-time filesystem usage for the monitored path.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};

use crate::config::ServerConfig;

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Error, Debug)]
pub enum SampleError {
    #[error("Failed to read filesystem usage for {path:?}: {source}")]
    Os {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("No mounted filesystem contains {0:?}")]
    NoFilesystem(PathBuf),
    #[error("Sampling task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DiskStatus {
    Ok,
    Warning,
}

impl DiskStatus {
    /// The threshold is inclusive: usage exactly at it is a warning.
    pub fn for_usage(percent_used: f64, threshold_percent: u8) -> Self {
        if percent_used >= f64::from(threshold_percent) {
            DiskStatus::Warning
        } else {
            DiskStatus::Ok
        }
    }
}

/// Byte counts as reported by the OS for one filesystem.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FsUsage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percent: f64,
}

impl FsUsage {
    /// Builds usage from `statvfs` style block counts. Reserved blocks count as
    /// neither used nor free, so `percent` is relative to what unprivileged
    /// users can actually fill.
    pub fn from_blocks(
        fragment_size: u64,
        blocks: u64,
        blocks_free: u64,
        blocks_available: u64,
    ) -> Self {
        let total = blocks.saturating_mul(fragment_size);
        let free = blocks_available.saturating_mul(fragment_size);
        let used = blocks.saturating_sub(blocks_free).saturating_mul(fragment_size);
        let usable = used.saturating_add(free);
        let percent = if usable > 0 {
            used as f64 / usable as f64 * 100.0
        } else {
            0.0
        };
        Self {
            total,
            used,
            free,
            percent,
        }
    }
}

/// Usage in GiB (two decimals) plus the unrounded percentage.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DiskUsage {
    pub total: f64,
    pub used: f64,
    pub free: f64,
    pub percent: f64,
}

fn bytes_to_gib(bytes: u64) -> f64 {
    (bytes as f64 / BYTES_PER_GIB * 100.0).round() / 100.0
}

impl From<FsUsage> for DiskUsage {
    fn from(usage: FsUsage) -> Self {
        Self {
            total: bytes_to_gib(usage.total),
            used: bytes_to_gib(usage.used),
            free: bytes_to_gib(usage.free),
            percent: usage.percent,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Sample {
    #[serde(rename = "disk_path")]
    pub path: String,
    #[serde(rename = "usage_threshold")]
    pub threshold_percent: u8,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "disk_usage")]
    pub usage: DiskUsage,
    #[serde(rename = "disk_status")]
    pub status: DiskStatus,
    pub check_interval_minutes: f64,
}

impl Sample {
    pub fn new(
        path: &Path,
        threshold_percent: u8,
        check_interval_minutes: f64,
        usage: FsUsage,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            path: path.display().to_string(),
            threshold_percent,
            timestamp,
            usage: DiskUsage::from(usage),
            status: DiskStatus::for_usage(usage.percent, threshold_percent),
            check_interval_minutes,
        }
    }

    pub fn percent_used(&self) -> f64 {
        self.usage.percent
    }

    pub fn is_warning(&self) -> bool {
        self.status == DiskStatus::Warning
    }

    pub fn report(&self) -> String {
        let mut report = format!(
            concat!(
                "Disk usage report for '{}': total {:.2} GiB, used {:.2} GiB, ",
                "free {:.2} GiB, {:.2}% used (threshold {}%)."
            ),
            self.path,
            self.usage.total,
            self.usage.used,
            self.usage.free,
            self.usage.percent,
            self.threshold_percent,
        );
        if self.is_warning() {
            let _ = write!(
                report,
                " WARNING: disk usage is above the {}% threshold!",
                self.threshold_percent
            );
        }
        report
    }
}

#[cfg(unix)]
#[allow(clippy::unnecessary_cast)]
pub fn read_fs_usage(path: &Path) -> Result<FsUsage, SampleError> {
    let stat = nix::sys::statvfs::statvfs(path).map_err(|errno| SampleError::Os {
        path: path.to_path_buf(),
        source: std::io::Error::from(errno),
    })?;
    Ok(FsUsage::from_blocks(
        stat.fragment_size() as u64,
        stat.blocks() as u64,
        stat.blocks_free() as u64,
        stat.blocks_available() as u64,
    ))
}

#[cfg(not(unix))]
pub fn read_fs_usage(path: &Path) -> Result<FsUsage, SampleError> {
    use sysinfo::Disks;

    let canonical = path.canonicalize().map_err(|source| SampleError::Os {
        path: path.to_path_buf(),
        source,
    })?;
    let disks = Disks::new_with_refreshed_list();
    // Longest mount point that prefixes the path owns it.
    let disk = disks
        .list()
        .iter()
        .filter(|d| canonical.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .ok_or_else(|| SampleError::NoFilesystem(path.to_path_buf()))?;

    let total = disk.total_space();
    let free = disk.available_space();
    let used = total.saturating_sub(free);
    let percent = if total > 0 {
        used as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    Ok(FsUsage {
        total,
        used,
        free,
        percent,
    })
}

/// Samples `path` once and logs the report line. Failures are returned to
/// the caller, which decides whether to skip the tick.
pub fn sample_path(
    path: &Path,
    threshold_percent: u8,
    check_interval_minutes: f64,
) -> Result<Sample, SampleError> {
    let usage = read_fs_usage(path)?;
    let sample = Sample::new(
        path,
        threshold_percent,
        check_interval_minutes,
        usage,
        Utc::now(),
    );
    info!(path = %sample.path, status = ?sample.status, "{}", sample.report());
    Ok(sample)
}

#[async_trait]
pub trait Sampler: Send + Sync {
    async fn sample(&self) -> Result<Sample, SampleError>;
}

/// Samples the configured disk path on the blocking pool, so a slow
/// filesystem never stalls the runtime.
pub struct DiskSampler {
    path: PathBuf,
    threshold_percent: u8,
    check_interval_minutes: f64,
}

impl DiskSampler {
    pub fn new(path: PathBuf, threshold_percent: u8, check_interval_minutes: f64) -> Self {
        Self {
            path,
            threshold_percent,
            check_interval_minutes,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            config.disk_path(),
            config.disk_monitor.usage_threshold,
            config.disk_monitor.check_interval_minutes,
        )
    }
}

#[async_trait]
impl Sampler for DiskSampler {
    async fn sample(&self) -> Result<Sample, SampleError> {
        let path = self.path.clone();
        let threshold = self.threshold_percent;
        let interval = self.check_interval_minutes;
        tokio::task::spawn_blocking(move || sample_path(&path, threshold, interval))
            .await
            .map_err(|e| {
                error!(error = %e, "Disk sampling task panicked or was cancelled.");
                SampleError::Task(e.to_string())
            })?
    }
}
