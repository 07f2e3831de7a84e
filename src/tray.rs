//! Tray icon, tooltip and the two-entry context menu.

#[cfg(not(windows))]
use crate::icon::RenderedIcon;
use crate::sensors::CpuSample;

pub const LABEL_AUTOSTART_OFF: &str = "Start with Windows";
pub const LABEL_AUTOSTART_ON: &str = "Don't start with Windows";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrayMessage {
    ToggleAutostart,
    Exit,
}

/// Tooltip shown for the current sample: load with no decimals, watts
/// with one.
pub fn tooltip_text(sample: &CpuSample) -> String {
    format!(
        "CPU: {:.0}% - {:.1}W",
        sample.load_percent, sample.package_watts
    )
}

pub fn toggle_label(autostart_enabled: bool) -> &'static str {
    if autostart_enabled {
        LABEL_AUTOSTART_ON
    } else {
        LABEL_AUTOSTART_OFF
    }
}

#[cfg(windows)]
pub use imp::TrayPresenter;

#[cfg(windows)]
mod imp {
    use super::{toggle_label, tooltip_text, TrayMessage};
    use crate::icon::{self, RenderedIcon};
    use crate::sensors::CpuSample;
    use std::error::Error;
    use std::sync::mpsc;
    use tracing::warn;
    use tray_icon::menu::{Menu, MenuEvent, MenuItem, PredefinedMenuItem};
    use tray_icon::{TrayIcon, TrayIconBuilder};

    pub struct TrayPresenter {
        tray_icon: TrayIcon,
        toggle_item: MenuItem,
        receiver: mpsc::Receiver<TrayMessage>,
    }

    impl TrayPresenter {
        pub fn new(autostart_enabled: bool) -> Result<Self, Box<dyn Error>> {
            let (sender, receiver) = mpsc::channel::<TrayMessage>();

            let toggle_item = MenuItem::new(toggle_label(autostart_enabled), true, None);
            let exit_item = MenuItem::new("Exit", true, None);

            // Menu clicks arrive on the tray backend's callback; forward
            // them as messages so the main loop stays the only mutator.
            // Matching is by id, not label, since the toggle label flips.
            let toggle_id = toggle_item.id().clone();
            let exit_id = exit_item.id().clone();
            MenuEvent::set_event_handler(Some(Box::new(move |event: MenuEvent| {
                let message = if *event.id() == toggle_id {
                    Some(TrayMessage::ToggleAutostart)
                } else if *event.id() == exit_id {
                    Some(TrayMessage::Exit)
                } else {
                    None
                };
                if let Some(message) = message {
                    let _ = sender.send(message);
                }
            })));

            let menu = Menu::new();
            menu.append_items(&[&toggle_item, &PredefinedMenuItem::separator(), &exit_item])?;

            let initial = icon::render(0.0);
            let tray_icon = TrayIconBuilder::new()
                .with_menu(Box::new(menu))
                .with_tooltip(tooltip_text(&CpuSample::default()))
                .with_icon(initial.to_tray_icon()?)
                .build()?;

            Ok(Self {
                tray_icon,
                toggle_item,
                receiver,
            })
        }

        /// Swaps in the freshly rendered icon (the superseded handle is
        /// released by the swap) and refreshes the tooltip. A failed
        /// conversion keeps the previous icon on display.
        pub fn update(&mut self, rendered: &RenderedIcon, sample: &CpuSample) {
            match rendered.to_tray_icon() {
                Ok(next) => {
                    if let Err(e) = self.tray_icon.set_icon(Some(next)) {
                        warn!("failed to set tray icon: {e}");
                    }
                }
                Err(e) => warn!("icon conversion failed, keeping previous icon: {e}"),
            }
            if let Err(e) = self.tray_icon.set_tooltip(Some(tooltip_text(sample))) {
                warn!("failed to set tooltip: {e}");
            }
        }

        pub fn set_autostart_label(&self, enabled: bool) {
            self.toggle_item.set_text(toggle_label(enabled));
        }

        /// Non-blocking; drained by the main loop between ticks.
        pub fn try_message(&self) -> Option<TrayMessage> {
            self.receiver.try_recv().ok()
        }
    }
}

// Headless stand-in for development builds without a tray subsystem; it
// keeps the wiring in main compiling and logs what it would display.
#[cfg(not(windows))]
pub struct TrayPresenter {
    tooltip: String,
}

#[cfg(not(windows))]
impl TrayPresenter {
    pub fn new(_autostart_enabled: bool) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            tooltip: tooltip_text(&CpuSample::default()),
        })
    }

    pub fn update(&mut self, _rendered: &RenderedIcon, sample: &CpuSample) {
        self.tooltip = tooltip_text(sample);
        tracing::info!(tooltip = %self.tooltip, "tray update");
    }

    pub fn set_autostart_label(&self, _enabled: bool) {}

    pub fn try_message(&self) -> Option<TrayMessage> {
        None
    }
}
