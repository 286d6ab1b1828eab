/// Memory statistics sources sampled once per watcher tick.
use crate::unit::MemoryUnit;
use std::path::{Path, PathBuf};

#[cfg(target_os = "linux")]
const STATM_PATH: &str = "/proc/self/statm";

/// Errors a provider may report for a single sample.
#[derive(Debug)]
pub enum SampleError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        detail: String,
    },
    /// The platform exposes no usable memory statistic.
    Unsupported(String),
}

impl std::fmt::Display for SampleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleError::Io { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            SampleError::Parse { path, detail } => {
                write!(f, "failed to parse {}: {}", path.display(), detail)
            }
            SampleError::Unsupported(what) => write!(f, "memory sampling unsupported: {what}"),
        }
    }
}

impl std::error::Error for SampleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SampleError::Io { source, .. } => Some(source),
            SampleError::Parse { .. } | SampleError::Unsupported(_) => None,
        }
    }
}

/// Reports the current in-use memory of the watched process.
///
/// Called from the watcher's worker task once per interval, so it should be
/// cheap. A failed sample makes the watcher skip that tick.
pub trait MemoryStatsProvider: Send + Sync {
    fn sample(&self) -> Result<MemoryUnit, SampleError>;
}

impl<F> MemoryStatsProvider for F
where
    F: Fn() -> Result<MemoryUnit, SampleError> + Send + Sync,
{
    fn sample(&self) -> Result<MemoryUnit, SampleError> {
        self()
    }
}

/// Resident set size of the current process.
///
/// Linux reads `/proc/self/statm`; other Unix targets fall back to the peak
/// RSS reported by `getrusage`. On that fallback path readings only ever grow,
/// so memory freed after a spike never brings the sample back down.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessMemory;

impl MemoryStatsProvider for ProcessMemory {
    #[cfg(target_os = "linux")]
    fn sample(&self) -> Result<MemoryUnit, SampleError> {
        let path = Path::new(STATM_PATH);
        let contents = std::fs::read_to_string(path).map_err(|e| SampleError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        parse_statm(&contents, page_size()?, path)
    }

    #[cfg(not(target_os = "linux"))]
    fn sample(&self) -> Result<MemoryUnit, SampleError> {
        use nix::sys::resource::{getrusage, UsageWho};

        let usage = getrusage(UsageWho::RUSAGE_SELF)
            .map_err(|e| SampleError::Unsupported(format!("getrusage: {e}")))?;
        // macOS reports bytes, the BSDs kilobytes.
        let max_rss = i64::from(usage.max_rss());
        let bytes = if cfg!(target_os = "macos") {
            max_rss
        } else {
            max_rss.saturating_mul(1024)
        };
        Ok(MemoryUnit::from_bytes(bytes))
    }
}

#[cfg(target_os = "linux")]
fn page_size() -> Result<i64, SampleError> {
    use nix::unistd::{sysconf, SysconfVar};

    match sysconf(SysconfVar::PAGE_SIZE) {
        Ok(Some(size)) if size > 0 => Ok(page_bytes(size)),
        Ok(_) => Err(SampleError::Unsupported("page size unavailable".to_string())),
        Err(e) => Err(SampleError::Unsupported(format!("sysconf(PAGE_SIZE): {e}"))),
    }
}

#[cfg(all(target_os = "linux", target_pointer_width = "64"))]
fn page_bytes(size: nix::libc::c_long) -> i64 {
    size
}

#[cfg(all(target_os = "linux", not(target_pointer_width = "64")))]
fn page_bytes(size: nix::libc::c_long) -> i64 {
    i64::from(size)
}

/// Parse the resident page count (second field) of a statm line.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_statm(contents: &str, page_size: i64, path: &Path) -> Result<MemoryUnit, SampleError> {
    let resident = contents
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| SampleError::Parse {
            path: path.to_path_buf(),
            detail: "missing resident field".to_string(),
        })?;
    let pages: i64 = resident.parse().map_err(|_| SampleError::Parse {
        path: path.to_path_buf(),
        detail: format!("invalid resident page count {resident:?}"),
    })?;
    Ok(MemoryUnit::from_bytes(pages.saturating_mul(page_size)))
}
