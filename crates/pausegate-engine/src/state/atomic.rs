use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};

/// Seconds after which a lock left by a dead writer is taken over.
const STALE_AFTER_SECS: i64 = 60;

/// Replace `path` with `content` via a synced sibling temp file and rename.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let temp_path = dir.join(format!(".{}.tmp", temp_suffix()));

    let mut file = std::fs::File::create(&temp_path)
        .with_context(|| format!("cannot create temp file for {}", path.display()))?;
    file.write_all(content)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&temp_path, path)
        .with_context(|| format!("cannot rename temp to {}", path.display()))?;
    Ok(())
}

/// Writer lock on a run file, held as `<file>.lock` containing pid and
/// timestamp. Released on drop.
#[derive(Debug)]
pub struct AdvisoryLock {
    lock_path: PathBuf,
}

impl AdvisoryLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        let mut name = path.as_os_str().to_owned();
        name.push(".lock");
        let lock_path = PathBuf::from(name);

        if lock_path.exists() {
            let content = std::fs::read_to_string(&lock_path).unwrap_or_default();
            let stamped = content
                .lines()
                .nth(1)
                .and_then(|ts| ts.parse::<i64>().ok());
            match stamped {
                Some(ts) if chrono::Utc::now().timestamp() - ts > STALE_AFTER_SECS => {
                    let _ = std::fs::remove_file(&lock_path);
                }
                _ => bail!(
                    "run file is locked by another writer (lock: {})",
                    lock_path.display()
                ),
            }
        }

        let content = format!("{}\n{}\n", std::process::id(), chrono::Utc::now().timestamp());
        std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .and_then(|mut f| f.write_all(content.as_bytes()))
            .with_context(|| format!("cannot acquire lock {}", lock_path.display()))?;

        Ok(Self { lock_path })
    }
}

impl Drop for AdvisoryLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.lock_path);
    }
}

fn temp_suffix() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let thread = format!("{:?}", std::thread::current().id());
    let thread: String = thread.chars().filter(char::is_ascii_digit).collect();
    format!("{nanos:x}-{}-{thread}", std::process::id())
}
