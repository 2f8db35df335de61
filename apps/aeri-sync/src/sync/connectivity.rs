use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::Effect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connectivity {
    #[default]
    Unknown,
    Connected,
    Disconnected,
}

impl Connectivity {
    pub fn is_connected(self) -> bool {
        self == Connectivity::Connected
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Connectivity::Unknown => "unknown",
            Connectivity::Connected => "connected",
            Connectivity::Disconnected => "disconnected",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
    pub backoff: bool,
}

impl ReconnectPolicy {
    /// Delay before the attempt following `failures` consecutive failures.
    pub fn delay(&self, failures: u32) -> Duration {
        if !self.backoff {
            return self.base;
        }
        let shift = failures.saturating_sub(1).min(16);
        self.base.saturating_mul(1 << shift).min(self.max.max(self.base))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            max: Duration::from_secs(30),
            backoff: false,
        }
    }
}

/// An outstanding full-state fetch and the epoch its result is stamped with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub id: u64,
    pub epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Live {
    Closed,
    Opening(u64),
    Open { session: u64, stamp: u64 },
}

/// Result of a completed fetch, as far as connectivity is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchDone {
    pub stamp: u64,
    pub changed: Option<Connectivity>,
}

#[derive(Debug, Clone, Copy)]
struct Transition {
    changed: Option<Connectivity>,
    reconnected: bool,
}

pub struct Monitor {
    state: Connectivity,
    epoch: u64,
    policy: ReconnectPolicy,
    poll_interval: Duration,
    live_enabled: bool,
    failures: u32,
    fetch: Option<FetchTicket>,
    next_fetch: u64,
    live: Live,
    next_session: u64,
    wake_at: Option<Instant>,
}

impl Monitor {
    pub fn new(policy: ReconnectPolicy, poll_interval: Duration, live_enabled: bool) -> Self {
        Self {
            state: Connectivity::Unknown,
            epoch: 0,
            policy,
            poll_interval,
            live_enabled,
            failures: 0,
            fetch: None,
            next_fetch: 0,
            live: Live::Closed,
            next_session: 0,
            wake_at: None,
        }
    }

    pub fn state(&self) -> Connectivity {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn fetch_in_flight(&self) -> bool {
        self.fetch.is_some()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.wake_at
    }

    pub fn start(&mut self, out: &mut Vec<Effect>) {
        self.request_fetch(out);
        self.open_channel(out);
    }

    /// Issues a full-state fetch unless one is already outstanding.
    pub fn request_fetch(&mut self, out: &mut Vec<Effect>) -> bool {
        if self.fetch.is_some() {
            return false;
        }
        self.next_fetch += 1;
        let ticket = FetchTicket {
            id: self.next_fetch,
            epoch: self.epoch,
        };
        self.fetch = Some(ticket);
        out.push(Effect::Fetch(ticket));
        true
    }

    fn open_channel(&mut self, out: &mut Vec<Effect>) {
        if !self.live_enabled || self.live != Live::Closed {
            return;
        }
        self.next_session += 1;
        self.live = Live::Opening(self.next_session);
        out.push(Effect::OpenChannel {
            session: self.next_session,
        });
    }

    fn go_connected(&mut self, now: Instant) -> Transition {
        let previous = self.state;
        self.state = Connectivity::Connected;
        self.failures = 0;
        self.wake_at = Some(now + self.poll_interval);
        let reconnected = previous == Connectivity::Disconnected;
        if reconnected {
            self.epoch += 1;
            // A session that survived the outage now speaks for the new epoch.
            if let Live::Open { stamp, .. } = &mut self.live {
                *stamp = self.epoch;
            }
            info!(target: "aeri.connectivity", epoch = self.epoch, "reconnected");
        } else if previous == Connectivity::Unknown {
            info!(target: "aeri.connectivity", epoch = self.epoch, "connected");
        }
        Transition {
            changed: (previous != Connectivity::Connected).then_some(Connectivity::Connected),
            reconnected,
        }
    }

    fn go_disconnected(&mut self, now: Instant, cause: &str) -> Option<Connectivity> {
        let previous = self.state;
        self.state = Connectivity::Disconnected;
        self.failures = self.failures.saturating_add(1);
        let delay = self.policy.delay(self.failures);
        self.wake_at = Some(now + delay);
        if previous == Connectivity::Disconnected {
            debug!(target: "aeri.connectivity", cause, failures = self.failures, ?delay, "still unreachable");
            None
        } else {
            warn!(target: "aeri.connectivity", cause, ?delay, "device unreachable");
            Some(Connectivity::Disconnected)
        }
    }

    /// Returns `None` when `id` is not the outstanding fetch.
    pub fn fetch_succeeded(&mut self, id: u64, now: Instant, out: &mut Vec<Effect>) -> Option<FetchDone> {
        let ticket = self.fetch.take_if(|ticket| ticket.id == id)?;
        let transition = self.go_connected(now);
        self.open_channel(out);
        Some(FetchDone {
            stamp: if transition.reconnected { self.epoch } else { ticket.epoch },
            changed: transition.changed,
        })
    }

    pub fn fetch_failed(&mut self, id: u64, now: Instant) -> Option<Connectivity> {
        self.fetch.take_if(|ticket| ticket.id == id)?;
        self.go_disconnected(now, "fetch failed")
    }

    /// Handshake completed. A reconnect through the channel triggers exactly
    /// one refresh: the fetch already in flight if any, otherwise a new one.
    pub fn channel_opened(&mut self, session: u64, now: Instant, out: &mut Vec<Effect>) -> Option<Connectivity> {
        if self.live != Live::Opening(session) {
            return None;
        }
        let transition = self.go_connected(now);
        self.live = Live::Open {
            session,
            stamp: self.epoch,
        };
        if transition.reconnected {
            match self.fetch.as_mut() {
                Some(ticket) => ticket.epoch = self.epoch,
                None => {
                    self.request_fetch(out);
                }
            }
        }
        transition.changed
    }

    pub fn channel_failed(&mut self, session: u64, now: Instant) -> Option<Connectivity> {
        if self.live != Live::Opening(session) {
            return None;
        }
        self.live = Live::Closed;
        self.go_disconnected(now, "live channel handshake failed")
    }

    pub fn channel_closed(&mut self, session: u64, now: Instant) -> Option<Connectivity> {
        match self.live {
            Live::Open { session: open, .. } if open == session => {
                self.live = Live::Closed;
                self.go_disconnected(now, "live channel closed")
            }
            _ => None,
        }
    }

    /// Epoch stamp for a push arriving on `session`; `None` for old sessions.
    pub fn push_stamp(&self, session: u64) -> Option<u64> {
        match self.live {
            Live::Open { session: open, stamp } if open == session => Some(stamp),
            _ => None,
        }
    }

    /// A command failed to reach the device at all.
    pub fn send_unreachable(&mut self, now: Instant) -> Option<Connectivity> {
        if self.state == Connectivity::Disconnected {
            return None;
        }
        self.go_disconnected(now, "command could not reach device")
    }

    /// Fires the reconnect or heartbeat timer when due.
    pub fn tick(&mut self, now: Instant, out: &mut Vec<Effect>) {
        match self.wake_at {
            Some(at) if at <= now => {}
            _ => return,
        }
        self.wake_at = None;
        match self.state {
            Connectivity::Disconnected => {
                debug!(target: "aeri.connectivity", failures = self.failures, "reconnect attempt");
                self.request_fetch(out);
                self.open_channel(out);
            }
            Connectivity::Connected | Connectivity::Unknown => {
                self.request_fetch(out);
                self.wake_at = Some(now + self.poll_interval);
            }
        }
    }
}
