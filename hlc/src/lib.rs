//! Hybrid Logical Clock (HLC) primitives shared by every mutating engine path.
//!
//! An `Hlc` combines a physical millisecond timestamp with a logical counter
//! so that timestamps generated within the same millisecond still total-order.
//! `HlcClock` is the process-wide generator: every table write, LWW merge, and
//! dirty-row entry is stamped from the same clock so that causality holds
//! across every database an application opens in this process, not just
//! within a single one.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A Hybrid Logical Clock timestamp.
///
/// Field order is significant: deriving `Ord` on `(timestamp, version,
/// node_id)` gives exactly the total order the engine needs, including the
/// tie-break "the newly arriving write wins when HLCs are otherwise equal"
/// (ties only remain after this comparison when `timestamp` and `version`
/// are both equal and node ids differ, at which point `node_id`'s byte order
/// decides — a fixed, if arbitrary, tie-break).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hlc {
    pub timestamp: u64,
    pub version: u32,
    pub node_id: Uuid,
}

impl Hlc {
    /// The zero value for a given node, used before any clock tick has been observed.
    pub fn zero(node_id: Uuid) -> Self {
        Hlc {
            timestamp: 0,
            version: 0,
            node_id,
        }
    }
}

impl fmt::Display for Hlc {
    /// Zero-padded so byte-wise string order equals temporal order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:020}-{:010}-{}",
            self.timestamp, self.version, self.node_id
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HlcParseError {
    #[error("malformed HLC string: {0}")]
    Malformed(String),
}

impl FromStr for Hlc {
    type Err = HlcParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '-');
        let (ts, ver, node) = match (parts.next(), parts.next(), parts.next()) {
            (Some(ts), Some(ver), Some(node)) => (ts, ver, node),
            _ => return Err(HlcParseError::Malformed(s.to_string())),
        };
        let timestamp = ts
            .parse::<u64>()
            .map_err(|_| HlcParseError::Malformed(s.to_string()))?;
        let version = ver
            .parse::<u32>()
            .map_err(|_| HlcParseError::Malformed(s.to_string()))?;
        let node_id =
            Uuid::parse_str(node).map_err(|_| HlcParseError::Malformed(s.to_string()))?;
        Ok(Hlc {
            timestamp,
            version,
            node_id,
        })
    }
}

fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_millis() as u64
}

/// Process-wide monotonic HLC generator.
///
/// One `HlcClock` is meant to back an entire process via [`HlcClock::global`];
/// tests that need an isolated clock (e.g. to control tie-breaking) can still
/// construct one directly with [`HlcClock::new`].
pub struct HlcClock {
    node_id: Uuid,
    last: Mutex<Hlc>,
}

impl HlcClock {
    pub fn new(node_id: Uuid) -> Self {
        HlcClock {
            node_id,
            last: Mutex::new(Hlc::zero(node_id)),
        }
    }

    /// The process-wide singleton, created with a random node id on first use.
    /// There is deliberately no teardown: the clock's lifetime is the process's.
    pub fn global() -> &'static HlcClock {
        static CLOCK: OnceLock<HlcClock> = OnceLock::new();
        CLOCK.get_or_init(|| HlcClock::new(Uuid::new_v4()))
    }

    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    /// Produces a value strictly greater than any value previously produced
    /// by this clock or folded in via [`HlcClock::observe`].
    pub fn now(&self) -> Hlc {
        let mut last = self.last.lock().expect("hlc clock mutex poisoned");
        let physical = current_millis();
        let (timestamp, version) = match physical.cmp(&last.timestamp) {
            Ordering::Greater => (physical, 0),
            Ordering::Equal | Ordering::Less => (last.timestamp, last.version + 1),
        };
        let next = Hlc {
            timestamp,
            version,
            node_id: self.node_id,
        };
        *last = next;
        next
    }

    /// Folds an externally observed HLC into this clock so that subsequent
    /// [`HlcClock::now`] calls remain strictly greater than it. Used by
    /// `applyServerUpdate` and by engine startup (folding in the maximum HLC
    /// already persisted in `system_version`/`*__hlc` columns).
    pub fn observe(&self, other: Hlc) {
        let mut last = self.last.lock().expect("hlc clock mutex poisoned");
        if other > *last {
            *last = Hlc {
                timestamp: other.timestamp,
                version: other.version,
                node_id: self.node_id,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_monotonic() {
        let clock = HlcClock::new(Uuid::new_v4());
        let mut prev = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > prev, "{:?} should be greater than {:?}", next, prev);
            prev = next;
        }
    }

    #[test]
    fn observe_advances_future_ticks_past_it() {
        let clock = HlcClock::new(Uuid::new_v4());
        let far_future = Hlc {
            timestamp: current_millis() + 1_000_000,
            version: 42,
            node_id: Uuid::new_v4(),
        };
        clock.observe(far_future);
        let next = clock.now();
        assert!(next > far_future);
    }

    #[test]
    fn display_roundtrips_through_parse() {
        let hlc = Hlc {
            timestamp: 1_700_000_000_123,
            version: 7,
            node_id: Uuid::new_v4(),
        };
        let s = hlc.to_string();
        let parsed: Hlc = s.parse().unwrap();
        assert_eq!(hlc, parsed);
    }

    #[test]
    fn string_order_matches_temporal_order() {
        let node = Uuid::new_v4();
        let a = Hlc {
            timestamp: 5,
            version: 0,
            node_id: node,
        };
        let b = Hlc {
            timestamp: 5,
            version: 1,
            node_id: node,
        };
        assert!(a < b);
        assert!(a.to_string() < b.to_string());
    }
}
