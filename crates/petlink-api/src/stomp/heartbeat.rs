use std::time::Duration;

use crate::error::Error;

/// Negotiated heart-beat intervals. Zero disables a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    /// How often this side must send something.
    pub outgoing: Duration,
    /// How often the peer promised to send something.
    pub incoming: Duration,
}

impl HeartBeat {
    /// Value for the `heart-beat` header (`<send-ms>,<expect-ms>`).
    pub fn header_value(&self) -> String {
        format!("{},{}", self.outgoing.as_millis(), self.incoming.as_millis())
    }

    /// Parse a `heart-beat` header as sent by the peer.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let (sx, sy) = raw
            .split_once(',')
            .ok_or_else(|| Error::Protocol(format!("invalid heart-beat header '{raw}'")))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| Error::Protocol(format!("invalid heart-beat header '{raw}'")))
        };
        Ok(Self {
            outgoing: parse(sx)?,
            incoming: parse(sy)?,
        })
    }

    /// Combine what we asked for with what the broker answered.
    ///
    /// Each direction runs at the slower of the two proposals, or not at all
    /// if either side declined it.
    pub fn negotiate(client: Self, server: Self) -> Self {
        let pick = |ours: Duration, theirs: Duration| {
            if ours.is_zero() || theirs.is_zero() {
                Duration::ZERO
            } else {
                ours.max(theirs)
            }
        };
        Self {
            outgoing: pick(client.outgoing, server.incoming),
            incoming: pick(client.incoming, server.outgoing),
        }
    }
}
