use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// Exclusive lock held for the lifetime of a server instance.
pub struct InstanceLock {
    lock_file: File,
}

fn open_lock_file(lock_path: &Path) -> Result<File, CoreError> {
    if let Some(parent) = lock_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)?)
}

impl InstanceLock {
    /// Fail fast when another instance holds the lock.
    pub fn acquire(lock_path: &Path) -> Result<Self, CoreError> {
        match Self::try_acquire(lock_path)? {
            Some(lock) => Ok(lock),
            None => Err(CoreError::Conflict(format!(
                "another instance holds {}",
                lock_path.display()
            ))),
        }
    }

    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>, CoreError> {
        let file = open_lock_file(lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { lock_file: file })),
            Err(_) => Ok(None),
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Run `on_shutdown` on the first Ctrl-C; a second one exits immediately.
pub fn install_shutdown_handler(on_shutdown: impl Fn() + Send + 'static) {
    let result = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.swap(true, Ordering::SeqCst) {
            std::process::exit(1);
        }
        eprintln!("\nshutdown requested, finishing in-flight requests...");
        on_shutdown();
    });
    if let Err(e) = result {
        warn!("could not install signal handler: {e}");
    }
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}
