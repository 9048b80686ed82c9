//! Keep-alive scheduling for one connection attempt.
//!
//! Two independent timers:
//! - the ping timer sends PINGREQ while connected and is rescheduled only
//!   after the matching PINGRESP arrives;
//! - the watchdog is pushed back on every inbound packet and closes the
//!   connection when it fires.
//!
//! A slow peer is caught by the watchdog even while pings still go out.

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{sleep, Instant, Sleep};

/// Timer that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Time to send a PINGREQ.
    Ping,
    /// Nothing heard from the peer before the deadline.
    Watchdog,
}

/// Timer state of a connection attempt.
#[derive(Debug)]
pub struct KeepAlive {
    watchdog: Pin<Box<Sleep>>,
    ping: Option<Pin<Box<Sleep>>>,
    ping_outstanding: bool,
    closed: bool,
}

impl KeepAlive {
    /// Arm the watchdog for `deadline` from now. No ping is scheduled yet.
    pub fn new(deadline: Duration) -> Self {
        Self {
            watchdog: Box::pin(sleep(deadline)),
            ping: None,
            ping_outstanding: false,
            closed: false,
        }
    }

    /// Push the watchdog back to `timeout` from now.
    pub fn rearm(&mut self, timeout: Duration) {
        if self.closed {
            return;
        }
        self.watchdog.as_mut().reset(Instant::now() + timeout);
    }

    /// Schedule the next PINGREQ `delay` from now.
    pub fn schedule_ping(&mut self, delay: Duration) {
        if self.closed {
            return;
        }
        self.ping = Some(Box::pin(sleep(delay)));
    }

    /// Record that a PINGREQ went out; no new ping until [`pong`](Self::pong).
    pub fn ping_sent(&mut self) {
        self.ping = None;
        self.ping_outstanding = true;
    }

    /// Handle PINGRESP: schedule the next ping after `interval`.
    ///
    /// Unsolicited responses are ignored so they cannot double the ping rate.
    pub fn pong(&mut self, interval: Duration) {
        if !self.ping_outstanding {
            return;
        }
        self.ping_outstanding = false;
        self.schedule_ping(interval);
    }

    /// Stop both timers. Idempotent.
    pub fn stop(&mut self) {
        self.closed = true;
        self.ping = None;
        self.ping_outstanding = false;
    }

    #[cfg(test)]
    pub(crate) fn is_stopped(&self) -> bool {
        self.closed
    }

    #[cfg(test)]
    pub(crate) fn ping_scheduled(&self) -> bool {
        self.ping.is_some()
    }

    /// Wait for the next timer. Never completes once stopped.
    pub async fn expired(&mut self) -> Tick {
        if self.closed {
            return pending().await;
        }

        let Self { watchdog, ping, .. } = self;
        let ping = async {
            match ping.as_mut() {
                Some(timer) => timer.as_mut().await,
                None => pending().await,
            }
        };

        tokio::select! {
            _ = watchdog.as_mut() => Tick::Watchdog,
            _ = ping => Tick::Ping,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_fires_after_deadline() {
        let start = Instant::now();
        let mut keep_alive = KeepAlive::new(Duration::from_secs(5));

        assert_eq!(keep_alive.expired().await, Tick::Watchdog);
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_pushes_watchdog_back() {
        let start = Instant::now();
        let mut keep_alive = KeepAlive::new(Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(4)).await;
        keep_alive.rearm(Duration::from_secs(60));

        assert_eq!(keep_alive.expired().await, Tick::Watchdog);
        assert!(start.elapsed() >= Duration::from_secs(64));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_waits_for_pong() {
        let mut keep_alive = KeepAlive::new(Duration::from_secs(60));
        keep_alive.schedule_ping(Duration::from_secs(10));

        assert_eq!(keep_alive.expired().await, Tick::Ping);
        keep_alive.ping_sent();
        assert!(!keep_alive.ping_scheduled());

        keep_alive.pong(Duration::from_secs(30));
        assert!(keep_alive.ping_scheduled());
        // A second, unsolicited PINGRESP is ignored
        keep_alive.pong(Duration::from_secs(30));

        let before = Instant::now();
        assert_eq!(keep_alive.expired().await, Tick::Ping);
        assert!(before.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_silences_timers() {
        let mut keep_alive = KeepAlive::new(Duration::from_millis(10));
        keep_alive.schedule_ping(Duration::from_millis(5));
        keep_alive.stop();
        keep_alive.stop();
        keep_alive.schedule_ping(Duration::from_millis(5));

        assert!(keep_alive.is_stopped());
        assert!(!keep_alive.ping_scheduled());
        let fired = tokio::time::timeout(Duration::from_secs(1), keep_alive.expired()).await;
        assert!(fired.is_err());
    }
}
