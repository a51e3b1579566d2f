//! Per-connection stream lifecycle.
//!
//! ```text
//! Connecting -> Registered -> Active <-> IdleChecked -> Closing -> Removed
//! ```
//!
//! The session is a pure state machine over elapsed time. A driver asks it
//! what to do next with [`StreamSession::poll`], performs the action and
//! reports the outcome back. It never sleeps or touches the network itself,
//! so the same logic runs under tokio and under a blocking device loop.

use std::time::Duration;

use chat_core::StreamSettings;
use chat_protocol::CloseReason;

/// Probe, ping and lifetime intervals for one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamTimings {
    pub probe_interval: Duration,
    pub ping_interval: Duration,
    pub max_lifetime: Duration,
    /// Reconnect hint sent to clients.
    pub retry: Duration,
}

impl Default for StreamTimings {
    fn default() -> Self {
        Self::from(&StreamSettings::default())
    }
}

impl From<&StreamSettings> for StreamTimings {
    fn from(settings: &StreamSettings) -> Self {
        Self {
            probe_interval: Duration::from_secs(settings.probe_interval_secs),
            ping_interval: Duration::from_secs(settings.ping_interval_secs),
            max_lifetime: Duration::from_secs(settings.max_lifetime_secs),
            retry: Duration::from_millis(settings.retry_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Registered,
    /// Data was written recently.
    Active,
    /// The connection was idle and a probe confirmed it is alive.
    IdleChecked,
    Closing,
    Removed,
}

/// Next step for the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    /// Nothing due; sleep this long.
    Wait(Duration),
    Probe,
    Ping,
    /// Send a close event with this reason, unregister, then call `finish`.
    Close(CloseReason),
    /// The session is over.
    Done,
}

#[derive(Debug, Clone)]
pub struct StreamSession {
    timings: StreamTimings,
    state: SessionState,
    last_probe: Duration,
    last_ping: Duration,
    close_reason: Option<CloseReason>,
}

impl StreamSession {
    pub fn new(timings: StreamTimings) -> Self {
        Self {
            timings,
            state: SessionState::Connecting,
            last_probe: Duration::ZERO,
            last_ping: Duration::ZERO,
            close_reason: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    pub fn timings(&self) -> &StreamTimings {
        &self.timings
    }

    /// The client is in the registry and has its backlog.
    pub fn mark_registered(&mut self) {
        if self.state == SessionState::Connecting {
            self.state = SessionState::Registered;
        }
    }

    /// Decide the next action at `elapsed` since the stream opened.
    pub fn poll(&mut self, elapsed: Duration) -> SessionAction {
        match self.state {
            SessionState::Removed => return SessionAction::Done,
            SessionState::Closing => {
                return SessionAction::Close(
                    self.close_reason.unwrap_or(CloseReason::Unregistered),
                )
            }
            _ => {}
        }

        if elapsed >= self.timings.max_lifetime {
            self.begin_close(CloseReason::LifetimeExpired);
            return SessionAction::Close(CloseReason::LifetimeExpired);
        }

        let next_ping = self.last_ping + self.timings.ping_interval;
        let next_probe = self.last_probe + self.timings.probe_interval;
        if elapsed >= next_ping {
            return SessionAction::Ping;
        }
        if elapsed >= next_probe {
            return SessionAction::Probe;
        }

        let due = next_ping.min(next_probe).min(self.timings.max_lifetime);
        SessionAction::Wait(due - elapsed)
    }

    /// Report a probe made at `elapsed`.
    pub fn record_probe(&mut self, elapsed: Duration, alive: bool) {
        self.last_probe = elapsed;
        if !alive {
            self.begin_close(CloseReason::ProbeFailed);
        } else if self.is_open() {
            self.state = SessionState::IdleChecked;
        }
    }

    /// Report a ping sent at `elapsed`. A delivered ping also counts as a probe.
    pub fn record_ping(&mut self, elapsed: Duration, delivered: bool) {
        self.last_ping = elapsed;
        self.last_probe = elapsed;
        if !delivered {
            self.begin_close(CloseReason::SendFailed);
        } else if self.is_open() {
            self.state = SessionState::Active;
        }
    }

    /// Start closing. The first reason wins.
    pub fn begin_close(&mut self, reason: CloseReason) {
        if self.is_open() {
            self.state = SessionState::Closing;
            self.close_reason = Some(reason);
        }
    }

    /// The client has been removed from the registry.
    pub fn finish(&mut self) {
        if self.close_reason.is_none() {
            self.close_reason = Some(CloseReason::Unregistered);
        }
        self.state = SessionState::Removed;
    }

    fn is_open(&self) -> bool {
        !matches!(self.state, SessionState::Closing | SessionState::Removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn session() -> StreamSession {
        let mut session = StreamSession::new(StreamTimings::default());
        session.mark_registered();
        session
    }

    /// Run the session with every probe and ping succeeding.
    fn run_healthy(session: &mut StreamSession) -> Vec<(u64, SessionAction)> {
        let mut now = Duration::ZERO;
        let mut log = Vec::new();
        loop {
            match session.poll(now) {
                SessionAction::Wait(d) => now += d,
                SessionAction::Probe => {
                    session.record_probe(now, true);
                    log.push((now.as_secs(), SessionAction::Probe));
                }
                SessionAction::Ping => {
                    session.record_ping(now, true);
                    log.push((now.as_secs(), SessionAction::Ping));
                }
                action @ SessionAction::Close(_) => {
                    log.push((now.as_secs(), action));
                    session.finish();
                }
                SessionAction::Done => return log,
            }
        }
    }

    #[test]
    fn test_starts_connecting() {
        let mut session = StreamSession::new(StreamTimings::default());
        assert_eq!(session.state(), SessionState::Connecting);
        session.mark_registered();
        assert_eq!(session.state(), SessionState::Registered);
    }

    #[test]
    fn test_first_actions() {
        let mut s = session();
        assert_eq!(s.poll(Duration::ZERO), SessionAction::Wait(secs(2)));
        assert_eq!(s.poll(secs(2)), SessionAction::Probe);
        s.record_probe(secs(2), true);
        assert_eq!(s.state(), SessionState::IdleChecked);
        assert_eq!(s.poll(secs(2)), SessionAction::Wait(secs(2)));
    }

    #[test]
    fn test_ping_takes_priority_over_probe() {
        let mut s = session();
        s.record_probe(secs(8), true);
        assert_eq!(s.poll(secs(10)), SessionAction::Ping);
        s.record_ping(secs(10), true);
        assert_eq!(s.state(), SessionState::Active);
        assert_eq!(s.poll(secs(10)), SessionAction::Wait(secs(2)));
    }

    #[test]
    fn test_full_lifetime_schedule() {
        let mut s = session();
        let log = run_healthy(&mut s);

        let pings = log.iter().filter(|(_, a)| *a == SessionAction::Ping).count();
        let probes = log.iter().filter(|(_, a)| *a == SessionAction::Probe).count();
        assert_eq!(pings, 59);
        // four probes between consecutive pings, 60 ping windows
        assert_eq!(probes, 240);
        assert_eq!(
            log.last(),
            Some(&(600, SessionAction::Close(CloseReason::LifetimeExpired)))
        );
        assert_eq!(s.state(), SessionState::Removed);
        assert_eq!(s.close_reason(), Some(CloseReason::LifetimeExpired));
    }

    #[test]
    fn test_failed_probe_closes() {
        let mut s = session();
        s.record_probe(secs(2), false);
        assert_eq!(s.state(), SessionState::Closing);
        assert_eq!(s.poll(secs(2)), SessionAction::Close(CloseReason::ProbeFailed));
    }

    #[test]
    fn test_failed_ping_closes() {
        let mut s = session();
        s.record_ping(secs(10), false);
        assert_eq!(s.poll(secs(10)), SessionAction::Close(CloseReason::SendFailed));
    }

    #[test]
    fn test_first_close_reason_wins() {
        let mut s = session();
        s.begin_close(CloseReason::ServerShutdown);
        s.record_probe(secs(2), false);
        assert_eq!(s.close_reason(), Some(CloseReason::ServerShutdown));
        s.finish();
        assert_eq!(s.poll(secs(3)), SessionAction::Done);
        assert_eq!(s.close_reason(), Some(CloseReason::ServerShutdown));
    }

    #[test]
    fn test_finish_without_close_is_unregistered() {
        let mut s = session();
        s.finish();
        assert_eq!(s.close_reason(), Some(CloseReason::Unregistered));
        assert_eq!(s.poll(secs(1)), SessionAction::Done);
    }
}
