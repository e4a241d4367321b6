//! Watchdog guard.
//!
//! [`WatchdogGuard`] is what the loop feeds. It wraps a [`WatchdogHw`] and
//! turns every call into a no-op when the watchdog is disabled. [`SoftDog`]
//! is a host stand-in for the hardware timer: a background thread that
//! ends the process when the loop stops feeding it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use portal_core::fault::RuntimeFault;
use tracing::{error, info, warn};

use crate::hal::WatchdogHw;

pub struct WatchdogGuard {
    hw: Box<dyn WatchdogHw>,
    enabled: bool,
    timeout: Duration,
}

impl WatchdogGuard {
    /// Arm `hw` with `timeout`, or make sure it is off when `enabled` is false.
    pub fn configure(mut hw: Box<dyn WatchdogHw>, enabled: bool, timeout: Duration) -> Self {
        if !enabled {
            info!("watchdog is disabled");
            if let Err(e) = hw.disarm() {
                error!("could not disable watchdog: {e}");
            }
            return Self { hw, enabled: false, timeout };
        }
        match hw.arm(timeout) {
            Ok(()) => {
                warn!("--------------------------------------------------------");
                warn!("IMPORTANT: watchdog is enabled with a {}s timeout!", timeout.as_secs());
                warn!("The device resets if the main loop stalls. Run with --no-watchdog to disable it.");
                warn!("--------------------------------------------------------");
                Self { hw, enabled: true, timeout }
            }
            Err(e) => {
                error!("could not arm watchdog, running without it: {e}");
                Self { hw, enabled: false, timeout }
            }
        }
    }

    /// Restart the countdown. Never fails; does nothing while disabled.
    pub fn feed(&mut self) {
        if self.enabled {
            self.hw.feed();
        }
    }

    /// Turn the watchdog off. Returns true if it is now disabled.
    pub fn disarm(&mut self) -> bool {
        match self.hw.disarm() {
            Ok(()) => self.enabled = false,
            Err(e) => error!("could not disable watchdog: {e}"),
        }
        !self.enabled
    }

    pub fn is_enabled(&self) -> bool { self.enabled }

    pub fn timeout(&self) -> Duration { self.timeout }
}

/// What [`SoftDog`] does when it bites.
pub type BiteAction = Box<dyn Fn() + Send + 'static>;

/// Software dead-man's switch for hosts without a hardware watchdog.
pub struct SoftDog {
    deadline: Arc<Mutex<Option<(Instant, Duration)>>>,
    stop: Arc<AtomicBool>,
    check_every: Duration,
    on_bite: Option<BiteAction>,
}

impl SoftDog {
    /// Exits the process with `exit_code` when it bites.
    pub fn new(exit_code: i32) -> Self {
        Self::with_action(Duration::from_millis(250), Box::new(move || {
            error!("watchdog expired, restarting");
            std::process::exit(exit_code);
        }))
    }

    pub fn with_action(check_every: Duration, on_bite: BiteAction) -> Self {
        Self {
            deadline: Arc::new(Mutex::new(None)),
            stop: Arc::new(AtomicBool::new(false)),
            check_every,
            on_bite: Some(on_bite),
        }
    }

    fn set_deadline(&self, value: Option<(Instant, Duration)>) -> Result<(), RuntimeFault> {
        let mut slot = self
            .deadline
            .lock()
            .map_err(|_| RuntimeFault("watchdog state poisoned".to_string()))?;
        *slot = value;
        Ok(())
    }
}

impl WatchdogHw for SoftDog {
    fn arm(&mut self, timeout: Duration) -> Result<(), RuntimeFault> {
        self.set_deadline(Some((Instant::now(), timeout)))?;
        let Some(on_bite) = self.on_bite.take() else {
            return Ok(()); // already watching
        };
        let deadline = Arc::clone(&self.deadline);
        let stop = Arc::clone(&self.stop);
        let check_every = self.check_every;
        thread::Builder::new()
            .name("softdog".to_string())
            .spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    thread::sleep(check_every);
                    let expired = match deadline.lock() {
                        Ok(slot) => (*slot).is_some_and(|(fed, t)| fed.elapsed() > t),
                        Err(_) => true,
                    };
                    if expired {
                        on_bite();
                        return;
                    }
                }
            })
            .map_err(|e| RuntimeFault(format!("spawn watchdog thread: {e}")))?;
        Ok(())
    }

    fn feed(&mut self) {
        if let Ok(mut slot) = self.deadline.lock() {
            if let Some((fed, _)) = slot.as_mut() {
                *fed = Instant::now();
            }
        }
    }

    fn disarm(&mut self) -> Result<(), RuntimeFault> {
        self.set_deadline(None)
    }
}

impl Drop for SoftDog {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimDog;
    use std::sync::mpsc;

    #[test]
    fn disabled_guard_never_feeds() {
        let dog = SimDog::default();
        let mut guard = WatchdogGuard::configure(Box::new(dog.clone()), false, Duration::from_secs(15));
        assert!(!guard.is_enabled());
        guard.feed();
        guard.feed();
        assert_eq!(dog.feeds(), 0);
        assert!(!dog.armed());
        assert_eq!(dog.disarms(), 1);
    }

    #[test]
    fn enabled_guard_arms_and_feeds() {
        let dog = SimDog::default();
        let mut guard = WatchdogGuard::configure(Box::new(dog.clone()), true, Duration::from_secs(15));
        assert!(guard.is_enabled());
        assert_eq!(dog.timeout(), Some(Duration::from_secs(15)));
        guard.feed();
        assert_eq!(dog.feeds(), 1);
        assert!(guard.disarm());
        guard.feed();
        assert_eq!(dog.feeds(), 1);
    }

    #[test]
    fn failed_arm_leaves_guard_disabled() {
        let dog = SimDog::default();
        dog.fail_arm();
        let mut guard = WatchdogGuard::configure(Box::new(dog.clone()), true, Duration::from_secs(15));
        assert!(!guard.is_enabled());
        guard.feed();
        assert_eq!(dog.feeds(), 0);
    }

    #[test]
    fn soft_dog_bites_when_starved() {
        let (tx, rx) = mpsc::channel();
        let mut dog = SoftDog::with_action(
            Duration::from_millis(5),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        dog.arm(Duration::from_millis(30)).unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn soft_dog_stays_quiet_while_fed_or_disarmed() {
        let (tx, rx) = mpsc::channel();
        let mut dog = SoftDog::with_action(
            Duration::from_millis(5),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        dog.arm(Duration::from_millis(200)).unwrap();
        for _ in 0..10 {
            thread::sleep(Duration::from_millis(20));
            dog.feed();
        }
        dog.disarm().unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
    }
}
