//! Event-cluster detector for the IR break-beam.
//!
//! A single bird passing through the beam rarely produces a single clean
//! pulse: wings and tail break the beam several times within a few tens of
//! milliseconds.  The detector coalesces every pulse that arrives within
//! `cluster_gap_ms` of the previous pulse into one *cluster*, and only the
//! pulse that opens a cluster counts as an event.
//!
//! ```text
//!  raw   ‾‾‾|_|‾|_|‾‾|_|‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾‾|_|‾‾‾‾
//!            ^ event #1                     ^ event #2
//!            └── cluster ──┘<── ≥ gap ──>
//! ```
//!
//! Closure of a cluster is evaluated lazily at the start of each poll, so
//! the detector never needs a timer of its own.

/// Default silence (ms) after the last pulse that closes a cluster.
pub const DEFAULT_CLUSTER_GAP_MS: u64 = 300;

/// Sequence number of a detected event (1-based, equal to the running count).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventId(pub u64);

/// Internal detector state.  Mutated only by [`ClusterDetector::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionState {
    /// `true` when the previous sample was "beam broken".
    pub last_raw_level: bool,
    pub cluster_active: bool,
    /// Timestamp of the most recent pulse (rising edge of "triggered").
    pub last_pulse_ms: u64,
    pub event_count: u64,
}

impl DetectionState {
    const fn new() -> Self {
        Self {
            last_raw_level: false,
            cluster_active: false,
            last_pulse_ms: 0,
            event_count: 0,
        }
    }
}

pub struct ClusterDetector {
    state: DetectionState,
    cluster_gap_ms: u64,
}

impl ClusterDetector {
    pub fn new(cluster_gap_ms: u64) -> Self {
        Self {
            state: DetectionState::new(),
            cluster_gap_ms,
        }
    }

    /// Feed one raw sample.
    ///
    /// `triggered` is the logical sensor level (beam broken), `now_ms` a
    /// monotonic timestamp.  Must be called at least as often as the
    /// shortest pulse the sensor can produce, otherwise pulses are lost.
    ///
    /// Returns the id of a new event when this sample opens a cluster.
    pub fn poll(&mut self, triggered: bool, now_ms: u64) -> Option<EventId> {
        let s = &mut self.state;

        // Close a stale cluster before looking at the new sample; a pulse
        // landing exactly on the gap boundary starts a new cluster.
        if s.cluster_active && now_ms.saturating_sub(s.last_pulse_ms) >= self.cluster_gap_ms {
            s.cluster_active = false;
        }

        let pulse = triggered && !s.last_raw_level;
        s.last_raw_level = triggered;

        if !pulse {
            return None;
        }

        s.last_pulse_ms = now_ms;
        if s.cluster_active {
            return None;
        }

        s.cluster_active = true;
        s.event_count += 1;
        Some(EventId(s.event_count))
    }

    /// Total events since boot.
    pub fn event_count(&self) -> u64 {
        self.state.event_count
    }

    pub fn state(&self) -> &DetectionState {
        &self.state
    }

    pub fn cluster_gap_ms(&self) -> u64 {
        self.cluster_gap_ms
    }
}

impl Default for ClusterDetector {
    fn default() -> Self {
        Self::new(DEFAULT_CLUSTER_GAP_MS)
    }
}
