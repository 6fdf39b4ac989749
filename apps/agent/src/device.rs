//! Device identity and process bookkeeping.

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use restswitch_sync::config::DeviceConfig;
use restswitch_sync::SyncError;

/// Returns the configured thing name, or reads it from the factory partition.
pub fn resolve_thing_name(device: &DeviceConfig) -> Result<String> {
    if let Some(ref name) = device.thing_name {
        return Ok(name.clone());
    }

    read_thing_name(
        &device.thing_name_file,
        device.thing_name_offset,
        device.thing_name_len,
    )
}

/// Reads `len` bytes at `offset` of `path`. Padding (NUL, 0xff, whitespace)
/// is stripped from the end.
pub fn read_thing_name(path: &Path, offset: u64, len: usize) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("opening {}", path.display()))?;
    file.seek(SeekFrom::Start(offset))
        .with_context(|| format!("seeking to {:#x} in {}", offset, path.display()))?;

    let mut raw = vec![0u8; len];
    file.read_exact(&mut raw)
        .with_context(|| format!("reading {} bytes from {}", len, path.display()))?;

    let end = raw
        .iter()
        .rposition(|&b| !matches!(b, 0 | 0xff) && !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    let name = String::from_utf8_lossy(&raw[..end]).into_owned();

    if name.is_empty() {
        bail!(SyncError::MissingThingName);
    }
    debug!(path = %path.display(), %name, "Read thing name from device");
    Ok(name)
}

/// Pid file that is removed again when dropped.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Replaces any stale file at `path` with the current process id.
    pub fn create(path: &Path) -> Result<Self> {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "Removed stale pid file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("removing {}", path.display()));
            }
        }

        std::fs::write(path, format!("{}\n", std::process::id()))
            .with_context(|| format!("writing pid file {}", path.display()))?;

        Ok(PidFile {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove pid file");
        }
    }
}
