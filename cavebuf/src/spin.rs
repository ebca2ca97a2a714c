//! Wait policy for the shared header lock flag.
//!
//! The flag is advisory between cooperating participants, and the default
//! policy is to wait for it indefinitely: the holder is trusted code
//! writing a bounded number of bytes. The wait can still go bad in one real
//! way, a participant dying with the flag set, so two escape hatches exist:
//!
//! - `CAVEBUF_LOCK_TIMEOUT_MS` bounds the wait and surfaces
//!   [`BufferError::LockContention`] to the caller.
//! - `CAVEBUF_NODEADLOCK=true` panics with a captured backtrace once the
//!   wait exceeds a grace period, turning a silently hung append into an
//!   actionable report.

use std::{
    backtrace::Backtrace,
    thread,
    time::{Duration, Instant},
};

use crate::error::{BufferError, Result};

const LOCK_TIMEOUT_ENV: &str = "CAVEBUF_LOCK_TIMEOUT_MS";
const NODEADLOCK_ENV: &str = "CAVEBUF_NODEADLOCK";

/// Interval between header re-reads while the flag is held elsewhere.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// How long `CAVEBUF_NODEADLOCK` tolerates a held flag before panicking.
const NODEADLOCK_GRACE: Duration = Duration::from_secs(5);

fn configured_timeout() -> Option<Duration> {
    std::env::var(LOCK_TIMEOUT_ENV)
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_millis)
}

fn nodeadlock_enabled() -> bool {
    std::env::var(NODEADLOCK_ENV)
        .ok()
        .and_then(|value| value.trim().to_ascii_lowercase().parse::<bool>().ok())
        .unwrap_or(false)
}

/// One wait on the lock flag, from first observation of a held flag until
/// it clears or a configured bound trips.
pub(crate) struct SpinWait {
    started: Instant,
    deadline: Option<Instant>,
    nodeadlock: bool,
}

impl SpinWait {
    pub(crate) fn start() -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: configured_timeout().map(|timeout| started + timeout),
            nodeadlock: nodeadlock_enabled(),
        }
    }

    /// Sleep one poll interval, unless a bound has been exceeded.
    pub(crate) fn pause(&self) -> Result<()> {
        if self
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
        {
            return Err(BufferError::LockContention);
        }
        if self.nodeadlock && self.started.elapsed() >= NODEADLOCK_GRACE {
            let backtrace = Backtrace::force_capture();
            panic!(
                "CAVEBUF_NODEADLOCK: buffer lock flag still held after {NODEADLOCK_GRACE:?}; \
                a cooperating participant likely died mid-append.\nBacktrace:\n{backtrace:?}"
            );
        }
        thread::sleep(POLL_INTERVAL);
        Ok(())
    }
}
