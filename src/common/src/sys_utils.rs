use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PidFileError {
    #[error("pid already running: {0}")]
    AlreadyRunning(u32),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Pidfile handle; the file is removed when the handle drops.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Write the current pid. Refuses when the file names a live process;
    /// a stale file from a dead process is overwritten.
    pub fn write(path: impl AsRef<Path>) -> Result<PidFile, PidFileError> {
        let path = path.as_ref();
        if let Ok(raw) = fs_err::read_to_string(path) {
            if let Ok(pid) = raw.trim().parse::<u32>() {
                if process_alive(pid) {
                    return Err(PidFileError::AlreadyRunning(pid));
                }
            }
        }
        fs_err::write(path, format!("{}\n", std::process::id()))?;
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
        if let Err(err) = fs_err::remove_file(&self.path) {
            tracing::warn!("can not delete {}. cause={err}", self.path.display());
        }
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    // no portable liveness probe; treat the file as stale
    false
}
