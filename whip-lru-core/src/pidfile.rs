//! PID file management, owned by the top-level process object rather than
//! a hidden global singleton (see spec.md §9, "Global mutable state").

use log::info;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Lifecycle status recorded alongside the process id.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum Status {
    Init = 0,
    Ready = 1,
    Running = 2,
}

/// Writes `"<status_int> <pid>"` to a file and removes it on drop.
pub struct PidFileManager {
    path: PathBuf,
}

impl PidFileManager {
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let me = PidFileManager { path };
        me.write(Status::Init)?;
        Ok(me)
    }

    pub fn write(&self, status: Status) -> io::Result<()> {
        let pid = std::process::id();
        fs::write(&self.path, format!("{} {}\n", status as u8, pid))?;
        info!("Wrote pid file {:?} with status {:?}", self.path, status);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFileManager {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("whip-lru.pid");

        {
            let pf = PidFileManager::create(&path).unwrap();
            let contents = fs::read_to_string(&path).unwrap();
            assert!(contents.starts_with("0 "));

            pf.write(Status::Ready).unwrap();
            let contents = fs::read_to_string(&path).unwrap();
            assert!(contents.starts_with("1 "));
        }

        assert!(!path.exists());
    }
}
