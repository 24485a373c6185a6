//! Vector clocks and the decay curve families that turn hop-distance into
//! an edge weight.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A logical-time stamp: agent id -> monotonically non-decreasing tick.
///
/// Backed by a `BTreeMap` so serialization is canonical (keys sorted) without
/// any extra bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock(BTreeMap<String, u64>);

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ticks(ticks: impl IntoIterator<Item = (String, u64)>) -> Self {
        Self(ticks.into_iter().collect())
    }

    pub fn tick(&self, agent: &str) -> u64 {
        self.0.get(agent).copied().unwrap_or(0)
    }

    pub fn set(&mut self, agent: impl Into<String>, tick: u64) {
        self.0.insert(agent.into(), tick);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn agents(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Pointwise maximum of two clocks.
    pub fn merge(&self, other: &VectorClock) -> VectorClock {
        let mut out = self.0.clone();
        for (agent, tick) in &other.0 {
            let entry = out.entry(agent.clone()).or_insert(0);
            if *tick > *entry {
                *entry = *tick;
            }
        }
        VectorClock(out)
    }

    /// Sum over all keys present in either clock of the absolute tick
    /// difference, missing keys treated as 0.
    pub fn hop_count(&self, other: &VectorClock) -> u64 {
        let mut agents: Vec<&str> = self.0.keys().map(String::as_str).collect();
        for a in other.0.keys() {
            if !self.0.contains_key(a) {
                agents.push(a);
            }
        }
        agents
            .into_iter()
            .map(|a| self.tick(a).abs_diff(other.tick(a)))
            .sum()
    }

    /// Pointwise max over a set of clocks; the project's Reference Clock.
    pub fn merge_all<'a>(clocks: impl IntoIterator<Item = &'a VectorClock>) -> VectorClock {
        clocks
            .into_iter()
            .fold(VectorClock::new(), |acc, c| acc.merge(c))
    }
}

/// A monotone non-increasing function of hop-count, represented as a tagged
/// variant rather than a trait object so weight computation never touches
/// the heap on the hot path (see design note on dynamic-dispatch decay
/// models).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecayCurve {
    Exponential { w0: f64, r: f64 },
    Linear { w0: f64, k: f64 },
    DelayedLinear { w0: f64, k: f64, hold: f64 },
    /// Independent hold/decay tiers; their sum may exceed 1 at small hops.
    Tiered { tiers: Vec<DecayTier> },
    PowerLaw { w0: f64, k: f64, alpha: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayTier {
    pub w0: f64,
    pub k: f64,
    pub hold: f64,
}

/// Weight below which an edge is effectively absent for traversal purposes.
pub const MIN_WEIGHT_DEFAULT: f64 = 0.01;

impl DecayCurve {
    /// Weight for a given non-negative hop distance, always in `[0, w0]`.
    pub fn weight(&self, hops: f64) -> f64 {
        let hops = hops.max(0.0);
        match *self {
            DecayCurve::Exponential { w0, r } => w0 * r.powf(hops),
            DecayCurve::Linear { w0, k } => (w0 - k * hops).max(0.0),
            DecayCurve::DelayedLinear { w0, k, hold } => {
                if hops < hold {
                    w0
                } else {
                    (w0 - k * (hops - hold)).max(0.0)
                }
            }
            DecayCurve::Tiered { ref tiers } => tiers
                .iter()
                .map(|t| (t.w0 - t.k * (hops - t.hold).max(0.0)).max(0.0))
                .sum(),
            DecayCurve::PowerLaw { w0, k, alpha } => w0 / (1.0 + k * hops).powf(alpha),
        }
    }

    /// Weight is effectively zero below `min_weight`, marking the edge absent
    /// from traversal.
    pub fn is_alive(&self, hops: f64, min_weight: f64) -> bool {
        self.weight(hops) >= min_weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn hop_count_is_symmetric_and_sums_abs_diffs() {
        let mut a = VectorClock::new();
        a.set("agent-a", 3);
        a.set("agent-b", 1);
        let mut b = VectorClock::new();
        b.set("agent-a", 5);
        b.set("agent-c", 2);
        // |3-5| + |1-0| + |0-2| = 2 + 1 + 2 = 5
        assert_eq!(a.hop_count(&b), 5);
        assert_eq!(b.hop_count(&a), 5);
    }

    #[test]
    fn merge_is_pointwise_max() {
        let mut a = VectorClock::new();
        a.set("x", 4);
        let mut b = VectorClock::new();
        b.set("x", 2);
        b.set("y", 9);
        let m = a.merge(&b);
        assert_eq!(m.tick("x"), 4);
        assert_eq!(m.tick("y"), 9);
    }

    #[test]
    fn merge_all_hop_count_nonnegative_and_zero_iff_already_max() {
        let mut a = VectorClock::new();
        a.set("x", 1);
        let mut b = VectorClock::new();
        b.set("x", 5);
        let merged = VectorClock::merge_all([&a, &b]);
        assert!(merged.hop_count(&a) >= 0);
        assert!(merged.hop_count(&b) == 0);
    }

    #[test]
    fn exponential_decays_to_zero() {
        let c = DecayCurve::Exponential { w0: 1.0, r: 0.5 };
        approx(c.weight(0.0), 1.0);
        assert!(c.weight(50.0) < 1e-10);
        assert!(c.weight(1.0) <= c.weight(0.0));
    }

    #[test]
    fn linear_floors_at_zero() {
        let c = DecayCurve::Linear { w0: 1.0, k: 0.3 };
        approx(c.weight(0.0), 1.0);
        approx(c.weight(10.0), 0.0);
    }

    #[test]
    fn delayed_linear_holds_then_decays() {
        let c = DecayCurve::DelayedLinear {
            w0: 0.8,
            k: 0.1,
            hold: 5.0,
        };
        approx(c.weight(0.0), 0.8);
        approx(c.weight(5.0), 0.8);
        approx(c.weight(6.0), 0.7);
    }

    #[test]
    fn power_law_monotone_non_increasing() {
        let c = DecayCurve::PowerLaw {
            w0: 1.0,
            k: 0.2,
            alpha: 1.5,
        };
        let mut prev = c.weight(0.0);
        for h in 1..20 {
            let w = c.weight(h as f64);
            assert!(w <= prev + 1e-12);
            prev = w;
        }
        assert!(c.weight(1000.0) < 0.01);
    }

    #[test]
    fn tiered_can_exceed_one_at_small_hops() {
        let c = DecayCurve::Tiered {
            tiers: vec![
                DecayTier {
                    w0: 0.7,
                    k: 0.1,
                    hold: 0.0,
                },
                DecayTier {
                    w0: 0.6,
                    k: 0.1,
                    hold: 0.0,
                },
            ],
        };
        assert!(c.weight(0.0) > 1.0);
    }

    #[test]
    fn min_weight_cutoff_marks_edge_dead() {
        let c = DecayCurve::Exponential { w0: 1.0, r: 0.5 };
        assert!(c.is_alive(1.0, MIN_WEIGHT_DEFAULT));
        assert!(!c.is_alive(100.0, MIN_WEIGHT_DEFAULT));
    }
}
