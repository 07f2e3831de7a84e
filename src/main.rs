#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod autostart;
mod icon;
mod instance;
mod notify;
mod sensors;
mod tray;

use autostart::AutostartManager;
use instance::InstanceGuard;
use notify::Notifier;
use sensors::{PollOutcome, SensorReader};
use tray::{TrayMessage, TrayPresenter};

use std::error::Error;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::info;

/// Fixed poll period; one sensor poll, render and tray update per tick.
const POLL_INTERVAL: Duration = Duration::from_millis(1500);
/// How often queued menu clicks are drained between ticks.
const MENU_DRAIN_INTERVAL: Duration = Duration::from_millis(100);

// All work runs on one cooperative loop: ticks and menu handling share a
// single task, so a tick callback can never overlap another.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let mut notifier = Notifier::new();

    let Some(mut guard) = InstanceGuard::acquire() else {
        notifier.notice("Another instance is already running.");
        return Ok(());
    };
    info!("cpu-power-watch starting");

    let autostart = AutostartManager::from_build_config()?;
    // Queried once here to seed the menu label; afterwards the label only
    // changes when the user toggles it.
    let mut tray = TrayPresenter::new(autostart.is_enabled())?;
    let mut reader = SensorReader::new();

    let mut ticks = tokio::time::interval(POLL_INTERVAL);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut menu_drain = tokio::time::interval(MENU_DRAIN_INTERVAL);

    // Registered once; re-creating the listener each loop pass would race
    // against signals delivered between passes.
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                let PollOutcome { sample, warning } = reader.poll();
                match warning {
                    Some(message) => notifier.warning(&message),
                    None => notifier.clear_warning(),
                }
                let rendered = icon::render(sample.package_watts);
                tray.update(&rendered, &sample);
            }
            _ = menu_drain.tick() => {
                while let Some(message) = tray.try_message() {
                    match message {
                        TrayMessage::ToggleAutostart => match autostart.toggle() {
                            Ok(enabled) => {
                                tray.set_autostart_label(enabled);
                                info!(enabled, "autostart registration toggled");
                            }
                            Err(e) => notifier.notice(&format!(
                                "Could not update login-launch registration: {e}"
                            )),
                        },
                        TrayMessage::Exit => {
                            info!("exit requested from tray menu");
                            guard.release();
                            return Ok(());
                        }
                    }
                }
            }
            _ = &mut ctrl_c => {
                info!("interrupt received, shutting down");
                guard.release();
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn overrunning_tick_delays_the_next_without_bursting() {
        let mut ticks = tokio::time::interval(POLL_INTERVAL);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticks.tick().await;

        // Simulate a tick callback overrunning two full periods.
        tokio::time::sleep(POLL_INTERVAL * 2).await;

        // The single overdue tick fires as soon as the callback returns.
        let resumed = Instant::now();
        ticks.tick().await;
        assert_eq!(resumed.elapsed(), Duration::ZERO);

        // Delay re-arms from that point: the next tick is a full period
        // out, not a burst of the other missed one.
        let after_overdue = Instant::now();
        ticks.tick().await;
        assert_eq!(after_overdue.elapsed(), POLL_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_fires_immediately_then_at_the_fixed_period() {
        let start = Instant::now();
        let mut ticks = tokio::time::interval(POLL_INTERVAL);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticks.tick().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        ticks.tick().await;
        assert_eq!(start.elapsed(), POLL_INTERVAL);
    }
}
