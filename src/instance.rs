//! System-wide single-instance lock, held for the process lifetime.

/// Fixed identifier the lock is keyed by; one holder per user session.
pub const APP_LOCK_NAME: &str = "CpuPowerWatchAppMutex";

pub struct InstanceGuard {
    lock: Option<imp::Lock>,
}

impl InstanceGuard {
    /// Acquires the process-wide lock. `None` means another instance
    /// already holds it; the caller must notify and exit without further
    /// side effects.
    pub fn acquire() -> Option<Self> {
        Self::acquire_named(APP_LOCK_NAME)
    }

    pub fn acquire_named(name: &str) -> Option<Self> {
        imp::Lock::acquire(name).map(|lock| Self { lock: Some(lock) })
    }

    /// Idempotent; also runs on drop, which covers every exit path.
    pub fn release(&mut self) {
        if let Some(lock) = self.lock.take() {
            lock.release();
        }
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(windows)]
mod imp {
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{CloseHandle, GetLastError, ERROR_ALREADY_EXISTS, HANDLE};
    use windows::Win32::System::Threading::CreateMutexW;

    pub struct Lock {
        handle: HANDLE,
    }

    impl Lock {
        pub fn acquire(name: &str) -> Option<Self> {
            let name_wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();
            unsafe {
                let handle = CreateMutexW(None, false, PCWSTR(name_wide.as_ptr())).ok()?;
                // The named mutex exists as long as any handle to it is
                // open; ERROR_ALREADY_EXISTS means another process got
                // there first.
                if GetLastError() == ERROR_ALREADY_EXISTS {
                    let _ = CloseHandle(handle);
                    return None;
                }
                Some(Self { handle })
            }
        }

        pub fn release(self) {
            unsafe {
                let _ = CloseHandle(self.handle);
            }
        }
    }
}

#[cfg(not(windows))]
mod imp {
    use std::fs::OpenOptions;
    use std::path::PathBuf;

    // Lock-file stand-in for the named mutex. A crash can leave the file
    // behind, unlike a kernel object; acceptable for the non-Windows build,
    // which exists for development and tests.
    pub struct Lock {
        path: PathBuf,
    }

    impl Lock {
        pub fn acquire(name: &str) -> Option<Self> {
            let path = std::env::temp_dir().join(format!("{name}.lock"));
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .ok()?;
            Some(Self { path })
        }

        pub fn release(self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Names are process-unique so stale state from an earlier killed test
    // run cannot shadow the lock.
    fn test_lock_name(tag: &str) -> String {
        format!("cpu-power-watch-{tag}-{}", std::process::id())
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let name = test_lock_name("guard-exclusive");
        let first = InstanceGuard::acquire_named(&name);
        assert!(first.is_some());
        assert!(InstanceGuard::acquire_named(&name).is_none());
    }

    #[test]
    fn release_frees_the_lock_and_is_idempotent() {
        let name = test_lock_name("guard-release");
        let mut guard = InstanceGuard::acquire_named(&name).unwrap();
        guard.release();
        guard.release();
        assert!(InstanceGuard::acquire_named(&name).is_some());
    }

    #[test]
    fn drop_releases_on_exit_paths() {
        let name = test_lock_name("guard-drop");
        {
            let _guard = InstanceGuard::acquire_named(&name).unwrap();
        }
        assert!(InstanceGuard::acquire_named(&name).is_some());
    }
}
