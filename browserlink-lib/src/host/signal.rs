use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::trace;

use super::index::sanitize_name;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Result of waiting on a named signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled,
    TimedOut,
    /// Nobody owns a signal by that name.
    Missing,
}

/// Named one-shot signals shared with the host process. Both operations are
/// blocking; async callers run them on the blocking pool.
pub trait SignalSource: Send + Sync {
    /// Set an existing signal. Returns false if no signal by that name exists.
    fn set(&self, name: &str) -> bool;

    fn wait(&self, name: &str, timeout: Duration) -> WaitOutcome;
}

/// Signals represented by marker files in a directory.
///
/// The owner creates an empty file. Setting writes a byte into it. A waiter
/// sees the signal once the file has content or has been removed by its owner.
#[derive(Debug, Clone)]
pub struct DirectorySignals {
    dir: PathBuf,
}

impl DirectorySignals {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(sanitize_name(name))
    }

    /// Create (or reset) a signal owned by the caller.
    pub fn create(&self, name: &str) -> std::io::Result<()> {
        std::fs::write(self.path_for(name), b"")
    }

    /// True if the signal exists and has been set.
    pub fn is_set(&self, name: &str) -> bool {
        is_marked(&self.path_for(name)) == Some(true)
    }
}

/// `None` when the file is gone, otherwise whether it carries a mark.
fn is_marked(path: &Path) -> Option<bool> {
    std::fs::metadata(path).ok().map(|m| m.len() > 0)
}

impl SignalSource for DirectorySignals {
    fn set(&self, name: &str) -> bool {
        let path = self.path_for(name);
        if !path.exists() {
            trace!(signal = name, "no signal to set");
            return false;
        }
        std::fs::write(&path, b"1").is_ok()
    }

    fn wait(&self, name: &str, timeout: Duration) -> WaitOutcome {
        let path = self.path_for(name);
        let deadline = Instant::now() + timeout;
        let mut first = true;

        loop {
            match is_marked(&path) {
                None if first => return WaitOutcome::Missing,
                None | Some(true) => return WaitOutcome::Signaled,
                Some(false) => {}
            }
            first = false;

            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }
}

/// Named kernel events owned by the host.
#[cfg(windows)]
#[derive(Debug, Default, Clone, Copy)]
pub struct NamedEvents;

#[cfg(windows)]
impl SignalSource for NamedEvents {
    fn set(&self, name: &str) -> bool {
        use windows_sys::Win32::Foundation::{CloseHandle, FALSE};
        use windows_sys::Win32::System::Threading::{OpenEventW, SetEvent, EVENT_MODIFY_STATE};

        let wide = super::to_wide(name);
        let handle = unsafe { OpenEventW(EVENT_MODIFY_STATE, FALSE, wide.as_ptr()) };
        if handle.is_null() {
            trace!(signal = name, "no event to set");
            return false;
        }
        let ok = unsafe { SetEvent(handle) } != 0;
        unsafe { CloseHandle(handle) };
        ok
    }

    fn wait(&self, name: &str, timeout: Duration) -> WaitOutcome {
        use windows_sys::Win32::Foundation::{CloseHandle, FALSE, WAIT_OBJECT_0};
        use windows_sys::Win32::System::Threading::{OpenEventW, WaitForSingleObject, SYNCHRONIZATION_SYNCHRONIZE};

        let wide = super::to_wide(name);
        let handle = unsafe { OpenEventW(SYNCHRONIZATION_SYNCHRONIZE, FALSE, wide.as_ptr()) };
        if handle.is_null() {
            return WaitOutcome::Missing;
        }
        let millis = timeout.as_millis().min(u32::MAX as u128 - 1) as u32;
        let result = unsafe { WaitForSingleObject(handle, millis) };
        unsafe { CloseHandle(handle) };

        if result == WAIT_OBJECT_0 {
            WaitOutcome::Signaled
        } else {
            WaitOutcome::TimedOut
        }
    }
}
