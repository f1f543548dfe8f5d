//! Scoped signal-handler override for environments that own external
//! processes.
//!
//! An environment that has containers or child processes running wants
//! Ctrl-C to mean "note the request, let teardown run" rather than the
//! default immediate exit. [`SignalGuard`] installs handlers for SIGINT
//! and SIGTERM that set a flag, saves the previous dispositions, and
//! restores them when dropped — the override never outlives the
//! environment that installed it.

use std::sync::atomic::{AtomicBool, Ordering};

use nix::libc::c_int;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn note_shutdown(_signal: c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Guard holding the previous SIGINT/SIGTERM dispositions.
///
/// While alive, both signals set the shutdown flag instead of taking their
/// default action. Dropping the guard restores whatever was installed
/// before, in reverse order.
pub struct SignalGuard {
    previous: Vec<(Signal, SigAction)>,
}

impl SignalGuard {
    /// Installs the flag-setting handlers, remembering the old ones.
    pub fn install() -> nix::Result<Self> {
        let action = SigAction::new(
            SigHandler::Handler(note_shutdown),
            SaFlags::empty(),
            SigSet::empty(),
        );

        let mut previous = Vec::new();
        for signal in [Signal::SIGINT, Signal::SIGTERM] {
            // Safety: note_shutdown only touches an atomic.
            let old = unsafe { sigaction(signal, &action) }?;
            previous.push((signal, old));
        }

        Ok(Self { previous })
    }

    /// Whether a shutdown signal arrived while a guard was active.
    pub fn shutdown_requested() -> bool {
        SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
    }

    /// Clears the shutdown flag (for reuse across evaluations).
    pub fn reset() {
        SHUTDOWN_REQUESTED.store(false, Ordering::SeqCst);
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        for (signal, old) in self.previous.drain(..).rev() {
            // Safety: restoring a disposition we previously read.
            unsafe {
                let _ = sigaction(signal, &old);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_and_restore() {
        SignalGuard::reset();
        {
            let _guard = SignalGuard::install().unwrap();
            assert!(!SignalGuard::shutdown_requested());

            // With the guard active, SIGINT sets the flag instead of
            // killing the test process.
            nix::sys::signal::raise(Signal::SIGINT).unwrap();
            assert!(SignalGuard::shutdown_requested());
        }
        SignalGuard::reset();
    }
}
