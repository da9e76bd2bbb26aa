//! Per-producer timestamp reconciliation.

/// Snaps a producer's chunk timestamps onto a continuous timeline.
///
/// Each chunk is expected to start where the previous one ended. A nominal
/// timestamp within `epsilon` of that expectation is treated as jitter and
/// replaced by the expectation; anything further away is genuine drift and
/// kept as is, re-anchoring the timeline.
///
/// A chunk that starts at or before the previous one (a reordered or
/// duplicated delivery) is placed at its nominal time and leaves the anchor
/// alone.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    anchor: Option<Anchor>,
}

/// How a chunk relates to the producer's running timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuity {
    /// Starts where the previous in-order chunk ended.
    Contiguous,
    /// First chunk after a reset, or drift beyond epsilon: the timeline
    /// restarts at this chunk.
    Restarted,
    /// At or before the previous chunk. The anchor is untouched.
    OutOfOrder,
}

/// Placement decided for one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciled {
    /// Where the chunk's first frame goes.
    pub timestamp: u64,
    /// How the chunk continues the timeline.
    pub continuity: Continuity,
}

#[derive(Debug, Clone, Copy)]
struct Anchor {
    timestamp: u64,
    duration_ns: u64,
}

impl Reconciler {
    /// Creates a reconciler with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets the previous chunk; the next one is placed at its nominal time.
    pub fn reset(&mut self) {
        self.anchor = None;
    }

    /// Placement time of the previous in-order chunk.
    pub fn last_timestamp(&self) -> Option<u64> {
        self.anchor.map(|a| a.timestamp)
    }

    /// Where the next in-order chunk is expected to start.
    pub fn expected(&self) -> Option<u64> {
        self.anchor.map(|a| a.timestamp + a.duration_ns)
    }

    /// Returns the placement timestamp for a chunk stamped `nominal` that
    /// plays for `duration_ns`.
    pub fn reconcile(&mut self, nominal: u64, duration_ns: u64, epsilon_ns: u64) -> u64 {
        self.advance(nominal, duration_ns, epsilon_ns).timestamp
    }

    /// Like [`reconcile`](Self::reconcile), also reporting whether the chunk
    /// continues the previous one.
    pub fn advance(&mut self, nominal: u64, duration_ns: u64, epsilon_ns: u64) -> Reconciled {
        let (timestamp, continuity) = match self.anchor {
            Some(anchor) if nominal <= anchor.timestamp => {
                return Reconciled {
                    timestamp: nominal,
                    continuity: Continuity::OutOfOrder,
                };
            }
            Some(anchor) => {
                let expected = anchor.timestamp + anchor.duration_ns;
                if nominal.abs_diff(expected) < epsilon_ns {
                    (expected, Continuity::Contiguous)
                } else {
                    (nominal, Continuity::Restarted)
                }
            }
            None => (nominal, Continuity::Restarted),
        };

        self.anchor = Some(Anchor {
            timestamp,
            duration_ns,
        });
        Reconciled {
            timestamp,
            continuity,
        }
    }
}
