//! Login-launch registration, unified over two interchangeable backends:
//! a value under the HKCU Run key (default) or a logon-triggered scheduled
//! task (`task-scheduler` feature). Selection happens at build time; the
//! query/enable/disable contract is identical for callers, and every query
//! re-reads the backing store so state is never cached.

use std::env;
use std::error::Error;
use std::path::PathBuf;
use tracing::warn;

/// Executable identity the registration is keyed by: the value name (or
/// `{name}Task` task name) and the launch path.
pub struct AppIdentity {
    pub name: String,
    pub exe: PathBuf,
}

impl AppIdentity {
    pub fn current() -> Result<Self, Box<dyn Error>> {
        let exe = env::current_exe()?;
        let name = exe
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("CpuPowerWatch")
            .to_string();
        Ok(Self { name, exe })
    }

    pub fn task_name(&self) -> String {
        format!("{}Task", self.name)
    }

    /// Launch command with the path quoted, as the Run key expects.
    pub fn quoted_exe(&self) -> String {
        format!("\"{}\"", self.exe.display())
    }
}

/// Read/write contract of a login-launch backing store. Presence of the
/// entry means enabled; both mutations must be idempotent.
pub trait LoginLaunchStore {
    fn is_present(&self) -> Result<bool, Box<dyn Error>>;
    fn register(&self) -> Result<(), Box<dyn Error>>;
    fn unregister(&self) -> Result<(), Box<dyn Error>>;
}

pub struct AutostartManager {
    store: Box<dyn LoginLaunchStore>,
}

impl AutostartManager {
    pub fn new(store: Box<dyn LoginLaunchStore>) -> Self {
        Self { store }
    }

    /// Backend chosen by the build configuration.
    pub fn from_build_config() -> Result<Self, Box<dyn Error>> {
        let identity = AppIdentity::current()?;
        #[cfg(windows)]
        {
            if cfg!(feature = "task-scheduler") {
                Ok(Self::new(Box::new(ScheduledTaskStore::new(&identity))))
            } else {
                Ok(Self::new(Box::new(RegistryRunStore::new(&identity))))
            }
        }
        #[cfg(not(windows))]
        {
            let _ = identity;
            Ok(Self::new(Box::new(UnsupportedStore)))
        }
    }

    /// Re-reads the store on every call; a read failure reports disabled.
    pub fn is_enabled(&self) -> bool {
        match self.store.is_present() {
            Ok(present) => present,
            Err(e) => {
                warn!("autostart query failed: {e}");
                false
            }
        }
    }

    pub fn enable(&self) -> Result<(), Box<dyn Error>> {
        self.store.register()
    }

    pub fn disable(&self) -> Result<(), Box<dyn Error>> {
        self.store.unregister()
    }

    /// Flips the registration and returns the new state.
    pub fn toggle(&self) -> Result<bool, Box<dyn Error>> {
        if self.is_enabled() {
            self.disable()?;
            Ok(false)
        } else {
            self.enable()?;
            Ok(true)
        }
    }
}

#[cfg(not(windows))]
struct UnsupportedStore;

#[cfg(not(windows))]
impl LoginLaunchStore for UnsupportedStore {
    fn is_present(&self) -> Result<bool, Box<dyn Error>> {
        Ok(false)
    }

    fn register(&self) -> Result<(), Box<dyn Error>> {
        Err("login-launch registration is only supported on Windows".into())
    }

    fn unregister(&self) -> Result<(), Box<dyn Error>> {
        Ok(())
    }
}

/// Nul-terminated UTF-16, the payload shape REG_SZ values are written in.
fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Named value under the per-user Run key; the value holds the quoted
/// executable path.
pub struct RegistryRunStore {
    value_name: String,
    command: String,
}

impl RegistryRunStore {
    pub fn new(identity: &AppIdentity) -> Self {
        Self {
            value_name: identity.name.clone(),
            command: identity.quoted_exe(),
        }
    }

    pub fn value_name(&self) -> &str {
        &self.value_name
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[cfg(windows)]
impl RegistryRunStore {
    const RUN_KEY: windows::core::PCWSTR =
        windows::core::w!("Software\\Microsoft\\Windows\\CurrentVersion\\Run");

    fn open_run_key(
        access: windows::Win32::System::Registry::REG_SAM_FLAGS,
    ) -> windows::core::Result<windows::Win32::System::Registry::HKEY> {
        use windows::Win32::System::Registry::{RegOpenKeyExW, HKEY, HKEY_CURRENT_USER};

        let mut key = HKEY::default();
        unsafe { RegOpenKeyExW(HKEY_CURRENT_USER, Self::RUN_KEY, 0, access, &mut key).ok()? };
        Ok(key)
    }
}

#[cfg(windows)]
impl LoginLaunchStore for RegistryRunStore {
    fn is_present(&self) -> Result<bool, Box<dyn Error>> {
        use windows::core::PCWSTR;
        use windows::Win32::System::Registry::{RegCloseKey, RegQueryValueExW, KEY_READ, REG_NONE};

        let key = Self::open_run_key(KEY_READ)?;
        let value_name = wide(&self.value_name);
        let mut data_type = REG_NONE;
        let mut data_size = 0u32;
        let result = unsafe {
            RegQueryValueExW(
                key,
                PCWSTR(value_name.as_ptr()),
                None,
                Some(&mut data_type),
                None,
                Some(&mut data_size),
            )
        };
        let _ = unsafe { RegCloseKey(key) };
        Ok(result.is_ok())
    }

    fn register(&self) -> Result<(), Box<dyn Error>> {
        use windows::core::PCWSTR;
        use windows::Win32::System::Registry::{RegCloseKey, RegSetValueExW, KEY_WRITE, REG_SZ};

        let key = Self::open_run_key(KEY_WRITE)?;
        let value_name = wide(&self.value_name);
        let command = wide(&self.command);
        // REG_SZ data is the UTF-16 bytes including the terminator;
        // overwriting an existing value keeps this idempotent.
        let data =
            unsafe { std::slice::from_raw_parts(command.as_ptr() as *const u8, command.len() * 2) };
        let result =
            unsafe { RegSetValueExW(key, PCWSTR(value_name.as_ptr()), 0, REG_SZ, Some(data)) };
        let _ = unsafe { RegCloseKey(key) };
        result.ok()?;
        Ok(())
    }

    fn unregister(&self) -> Result<(), Box<dyn Error>> {
        use windows::core::PCWSTR;
        use windows::Win32::Foundation::ERROR_FILE_NOT_FOUND;
        use windows::Win32::System::Registry::{RegCloseKey, RegDeleteValueW, KEY_WRITE};

        let key = Self::open_run_key(KEY_WRITE)?;
        let value_name = wide(&self.value_name);
        let result = unsafe { RegDeleteValueW(key, PCWSTR(value_name.as_ptr())) };
        let _ = unsafe { RegCloseKey(key) };
        // An absent value already is the requested state.
        if result == ERROR_FILE_NOT_FOUND {
            return Ok(());
        }
        result.ok()?;
        Ok(())
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Logon-triggered scheduled task named `{appName}Task`, registered at the
/// highest run level with on-demand start explicitly allowed, driven
/// through `schtasks`. The full definition goes in as task XML since the
/// plain `/Create` switches cannot express the description or the
/// demand-start setting.
pub struct ScheduledTaskStore {
    app_name: String,
    task_name: String,
    exe: PathBuf,
}

impl ScheduledTaskStore {
    pub fn new(identity: &AppIdentity) -> Self {
        Self {
            app_name: identity.name.clone(),
            task_name: identity.task_name(),
            exe: identity.exe.clone(),
        }
    }

    /// Task definition fed to `/Create /XML`. The schema spells the
    /// demand-start setting `AllowStartOnDemand`.
    pub fn definition_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Task version="1.2" xmlns="http://schemas.microsoft.com/windows/2004/02/mit/task">
  <RegistrationInfo>
    <Description>Starts {name} on system startup.</Description>
  </RegistrationInfo>
  <Triggers>
    <LogonTrigger>
      <Enabled>true</Enabled>
    </LogonTrigger>
  </Triggers>
  <Principals>
    <Principal id="Author">
      <RunLevel>HighestAvailable</RunLevel>
    </Principal>
  </Principals>
  <Settings>
    <AllowStartOnDemand>true</AllowStartOnDemand>
    <Enabled>true</Enabled>
  </Settings>
  <Actions Context="Author">
    <Exec>
      <Command>{command}</Command>
    </Exec>
  </Actions>
</Task>
"#,
            name = xml_escape(&self.app_name),
            command = xml_escape(&self.exe.display().to_string()),
        )
    }

    pub fn query_args(&self) -> Vec<String> {
        vec!["/Query".into(), "/TN".into(), self.task_name.clone()]
    }

    /// /F re-registers an existing task, making enable idempotent.
    pub fn create_args(&self, xml_path: &str) -> Vec<String> {
        vec![
            "/Create".into(),
            "/F".into(),
            "/TN".into(),
            self.task_name.clone(),
            "/XML".into(),
            xml_path.into(),
        ]
    }

    pub fn delete_args(&self) -> Vec<String> {
        vec![
            "/Delete".into(),
            "/F".into(),
            "/TN".into(),
            self.task_name.clone(),
        ]
    }

    #[cfg(windows)]
    fn schtasks(args: &[String]) -> Result<std::process::Output, Box<dyn Error>> {
        let output = std::process::Command::new("schtasks").args(args).output()?;
        Ok(output)
    }
}

#[cfg(windows)]
impl LoginLaunchStore for ScheduledTaskStore {
    fn is_present(&self) -> Result<bool, Box<dyn Error>> {
        // A nonzero exit from /Query means the task does not exist; only a
        // failure to run schtasks at all is a store error.
        let output = Self::schtasks(&self.query_args())?;
        Ok(output.status.success())
    }

    fn register(&self) -> Result<(), Box<dyn Error>> {
        let xml_path = std::env::temp_dir().join(format!("{}.xml", self.task_name));
        std::fs::write(&xml_path, self.definition_xml())?;
        let output = Self::schtasks(&self.create_args(&xml_path.to_string_lossy()));
        let _ = std::fs::remove_file(&xml_path);
        let output = output?;
        if output.status.success() {
            Ok(())
        } else {
            Err(format!(
                "schtasks /Create failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )
            .into())
        }
    }

    fn unregister(&self) -> Result<(), Box<dyn Error>> {
        if !self.is_present()? {
            return Ok(());
        }
        let output = Self::schtasks(&self.delete_args())?;
        if output.status.success() {
            Ok(())
        } else {
            Err(format!(
                "schtasks /Delete failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Default)]
    struct FakeStore {
        present: Rc<Cell<bool>>,
        fail_reads: Cell<bool>,
        fail_writes: Cell<bool>,
    }

    impl LoginLaunchStore for FakeStore {
        fn is_present(&self) -> Result<bool, Box<dyn Error>> {
            if self.fail_reads.get() {
                return Err("store unavailable".into());
            }
            Ok(self.present.get())
        }

        fn register(&self) -> Result<(), Box<dyn Error>> {
            if self.fail_writes.get() {
                return Err("permission denied".into());
            }
            self.present.set(true);
            Ok(())
        }

        fn unregister(&self) -> Result<(), Box<dyn Error>> {
            if self.fail_writes.get() {
                return Err("permission denied".into());
            }
            self.present.set(false);
            Ok(())
        }
    }

    fn manager_with_fake() -> (AutostartManager, Rc<Cell<bool>>) {
        let store = FakeStore::default();
        let present = store.present.clone();
        (AutostartManager::new(Box::new(store)), present)
    }

    #[test]
    fn enable_is_idempotent() {
        let (manager, _) = manager_with_fake();
        manager.enable().unwrap();
        assert!(manager.is_enabled());
        manager.enable().unwrap();
        assert!(manager.is_enabled());
    }

    #[test]
    fn disable_when_absent_is_a_noop() {
        let (manager, _) = manager_with_fake();
        manager.disable().unwrap();
        manager.disable().unwrap();
        assert!(!manager.is_enabled());
    }

    #[test]
    fn toggle_flips_from_disabled_to_enabled() {
        let (manager, _) = manager_with_fake();
        assert!(manager.toggle().unwrap());
        assert!(manager.is_enabled());
        assert!(!manager.toggle().unwrap());
        assert!(!manager.is_enabled());
    }

    #[test]
    fn read_failure_reports_disabled() {
        let store = FakeStore::default();
        store.present.set(true);
        store.fail_reads.set(true);
        let manager = AutostartManager::new(Box::new(store));
        assert!(!manager.is_enabled());
    }

    #[test]
    fn write_failure_leaves_state_unchanged() {
        let store = FakeStore::default();
        store.fail_writes.set(true);
        let present = store.present.clone();
        let manager = AutostartManager::new(Box::new(store));
        assert!(manager.enable().is_err());
        assert!(!present.get());
    }

    #[test]
    fn queries_reread_the_backing_store() {
        let (manager, present) = manager_with_fake();
        assert!(!manager.is_enabled());
        // External change between queries is observed, never cached.
        present.set(true);
        assert!(manager.is_enabled());
    }

    #[test]
    fn identity_derives_task_name_from_executable_stem() {
        let identity = AppIdentity {
            name: "CpuPowerWatch".into(),
            exe: PathBuf::from("CpuPowerWatch.exe"),
        };
        assert_eq!(identity.task_name(), "CpuPowerWatchTask");
        assert_eq!(identity.quoted_exe(), "\"CpuPowerWatch.exe\"");
    }

    fn identity() -> AppIdentity {
        AppIdentity {
            name: "CpuPowerWatch".into(),
            exe: PathBuf::from(r"C:\Tools\CpuPowerWatch.exe"),
        }
    }

    #[test]
    fn registry_store_writes_quoted_command_under_app_name() {
        let store = RegistryRunStore::new(&identity());
        assert_eq!(store.value_name(), "CpuPowerWatch");
        assert_eq!(store.command(), r#""C:\Tools\CpuPowerWatch.exe""#);
    }

    #[test]
    fn wide_strings_carry_the_nul_terminator() {
        let encoded = wide("CpuPowerWatch");
        assert_eq!(encoded.len(), "CpuPowerWatch".len() + 1);
        assert_eq!(encoded.last(), Some(&0));
    }

    #[test]
    fn task_definition_declares_description_trigger_and_demand_start() {
        let xml = ScheduledTaskStore::new(&identity()).definition_xml();
        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(xml.contains(r#"xmlns="http://schemas.microsoft.com/windows/2004/02/mit/task""#));
        assert!(xml.contains("<Description>Starts CpuPowerWatch on system startup.</Description>"));
        assert!(xml.contains("<LogonTrigger>"));
        assert!(xml.contains("<RunLevel>HighestAvailable</RunLevel>"));
        assert!(xml.contains("<AllowStartOnDemand>true</AllowStartOnDemand>"));
        assert!(xml.contains(r"<Command>C:\Tools\CpuPowerWatch.exe</Command>"));
    }

    #[test]
    fn task_definition_escapes_xml_metacharacters() {
        let store = ScheduledTaskStore::new(&AppIdentity {
            name: "A&B".into(),
            exe: PathBuf::from(r"C:\A & B\watch.exe"),
        });
        let xml = store.definition_xml();
        assert!(xml.contains("<Description>Starts A&amp;B on system startup.</Description>"));
        assert!(xml.contains(r"<Command>C:\A &amp; B\watch.exe</Command>"));
        assert!(!xml.contains("A&B"));
    }

    #[test]
    fn schtasks_invocations_target_the_derived_task_name() {
        let store = ScheduledTaskStore::new(&identity());
        assert_eq!(store.query_args(), ["/Query", "/TN", "CpuPowerWatchTask"]);
        assert_eq!(
            store.create_args(r"C:\Temp\CpuPowerWatchTask.xml"),
            [
                "/Create",
                "/F",
                "/TN",
                "CpuPowerWatchTask",
                "/XML",
                r"C:\Temp\CpuPowerWatchTask.xml",
            ]
        );
        assert_eq!(
            store.delete_args(),
            ["/Delete", "/F", "/TN", "CpuPowerWatchTask"]
        );
    }
}
