use std::fmt;

use super::mirror::SnapshotHandle;

/// How a dispatched command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ack,
    /// No answer within the command timeout.
    Timeout,
    /// The device could not be reached.
    TransportError(String),
    /// The device answered but refused the command (bad PIN, bad request).
    Rejected(String),
    /// Never attempted because the device is known to be offline.
    Offline,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Ack => f.write_str("ack"),
            Outcome::Timeout => f.write_str("timed out"),
            Outcome::TransportError(reason) => write!(f, "unreachable: {reason}"),
            Outcome::Rejected(reason) => write!(f, "rejected: {reason}"),
            Outcome::Offline => f.write_str("offline"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The device holds the value now.
    Confirm,
    /// Undo the field and tell the user.
    Rollback,
    /// Leave the optimistic value in place without confirmation.
    Keep,
    /// The outcome predates a reconnect; the refresh owns this field now.
    Discard,
}

pub fn decide(outcome: &Outcome, handle: &SnapshotHandle, current_epoch: u64) -> Verdict {
    if handle.epoch < current_epoch {
        return Verdict::Discard;
    }
    match outcome {
        Outcome::Ack => Verdict::Confirm,
        Outcome::Offline => Verdict::Keep,
        Outcome::Timeout | Outcome::TransportError(_) | Outcome::Rejected(_) => {
            if handle.connected_at_apply {
                Verdict::Rollback
            } else {
                Verdict::Keep
            }
        }
    }
}
