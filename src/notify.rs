//! Single user-facing notification sink. Every non-fatal warning in the
//! agent funnels through here instead of raising dialogs per call site.

use tracing::{info, warn};

const TITLE: &str = "CPU Power Watch";

pub struct Notifier {
    last_warning: Option<String>,
}

impl Notifier {
    pub fn new() -> Self {
        Self { last_warning: None }
    }

    /// Always-shown notice (instance conflict, user-triggered failures).
    pub fn notice(&self, message: &str) {
        info!("{message}");
        show_dialog(TITLE, message, DialogKind::Notice);
    }

    /// Non-fatal warning. Logged every time, but the dialog is
    /// edge-triggered: a condition repeating every tick notifies once,
    /// then again only after [`clear_warning`](Self::clear_warning).
    pub fn warning(&mut self, message: &str) {
        warn!("{message}");
        if self.last_warning.as_deref() != Some(message) {
            show_dialog(TITLE, message, DialogKind::Warning);
            self.last_warning = Some(message.to_string());
        }
    }

    /// Marks the warned-about condition as recovered.
    pub fn clear_warning(&mut self) {
        self.last_warning = None;
    }
}

enum DialogKind {
    Notice,
    Warning,
}

#[cfg(windows)]
fn show_dialog(title: &str, message: &str, kind: DialogKind) {
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::HWND;
    use windows::Win32::UI::WindowsAndMessaging::{
        MessageBoxW, MB_ICONEXCLAMATION, MB_ICONWARNING, MB_OK,
    };

    // Notices use the exclamation icon so the instance-conflict dialog
    // reads as a caution, not a routine information box.
    let icon = match kind {
        DialogKind::Notice => MB_ICONEXCLAMATION,
        DialogKind::Warning => MB_ICONWARNING,
    };
    let title_wide: Vec<u16> = title.encode_utf16().chain(std::iter::once(0)).collect();
    let message_wide: Vec<u16> = message.encode_utf16().chain(std::iter::once(0)).collect();
    unsafe {
        let _ = MessageBoxW(
            HWND::default(),
            PCWSTR(message_wide.as_ptr()),
            PCWSTR(title_wide.as_ptr()),
            MB_OK | icon,
        );
    }
}

#[cfg(not(windows))]
fn show_dialog(title: &str, message: &str, kind: DialogKind) {
    let prefix = match kind {
        DialogKind::Notice => "NOTICE",
        DialogKind::Warning => "WARNING",
    };
    eprintln!("{prefix}: {title}: {message}");
}
