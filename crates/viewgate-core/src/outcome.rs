//! Fan-in outcome aggregators.
//!
//! Both aggregators are pure: feeding a completion returns the terminal
//! outcome exactly once (as `Some`), and the caller delivers it. Participants
//! may complete in any interleaving; late or duplicate completions are
//! silently discarded.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::GatewayError;

// ─── Fail-fast aggregation ────────────────────────────────────────

/// Terminal outcome of an [`AllOrAbort`] aggregation.
pub type AggregateOutcome = Result<(), GatewayError>;

/// Fail-fast fan-in over a fixed set of participant keys.
///
/// The terminal outcome is produced exactly once: success when the last
/// outstanding participant succeeds, or immediately on the first failure with
/// that failure's cause. Completions arriving after termination — including
/// further failures — are discarded without overriding the recorded cause.
#[derive(Debug)]
pub struct AllOrAbort<K: Ord> {
    outstanding: BTreeSet<K>,
    terminated: bool,
}

impl<K: Ord + Clone> AllOrAbort<K> {
    /// Create an aggregation expecting one completion per key.
    pub fn new(participants: impl IntoIterator<Item = K>) -> Self {
        Self {
            outstanding: participants.into_iter().collect(),
            terminated: false,
        }
    }

    /// An empty participant set has nothing to wait for; the terminal success
    /// is available immediately via [`Self::complete_empty`].
    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty() && !self.terminated
    }

    /// Claim the immediate success outcome of an empty participant set.
    pub fn complete_empty(&mut self) -> Option<AggregateOutcome> {
        if self.is_empty() {
            self.terminated = true;
            Some(Ok(()))
        } else {
            None
        }
    }

    /// Record one participant's completion. Returns the terminal outcome when
    /// this completion terminates the aggregation, `None` otherwise.
    ///
    /// Unknown keys and completions after termination are no-ops rather than
    /// errors: late stragglers must not crash the caller.
    pub fn complete(&mut self, key: &K, result: Result<(), GatewayError>) -> Option<AggregateOutcome> {
        if self.terminated || !self.outstanding.remove(key) {
            return None;
        }
        match result {
            Ok(()) => {
                if self.outstanding.is_empty() {
                    self.terminated = true;
                    Some(Ok(()))
                } else {
                    None
                }
            }
            Err(cause) => {
                self.terminated = true;
                Some(Err(cause))
            }
        }
    }

    /// Force the unique failure firing without waiting for any participant,
    /// for operations cancelled before starting. No-op once terminated.
    pub fn abort(&mut self, cause: GatewayError) -> Option<AggregateOutcome> {
        if self.terminated {
            return None;
        }
        self.terminated = true;
        Some(Err(cause))
    }
}

// ─── Collect-all aggregation ──────────────────────────────────────

/// Collect-all fan-in: waits for every participant and reports each one's
/// individual outcome. Participant failures do not abort siblings or suppress
/// waiting for the rest — partial failure stays inspectable.
#[derive(Debug)]
pub struct ValueAggregation<K: Ord, V> {
    outstanding: BTreeSet<K>,
    results: BTreeMap<K, Result<V, GatewayError>>,
    terminated: bool,
}

impl<K: Ord + Clone, V> ValueAggregation<K, V> {
    /// Create an aggregation expecting one value or failure per key.
    pub fn new(participants: impl IntoIterator<Item = K>) -> Self {
        Self {
            outstanding: participants.into_iter().collect(),
            results: BTreeMap::new(),
            terminated: false,
        }
    }

    /// Record one participant's outcome. Returns the full result map exactly
    /// once, after the final participant completes.
    pub fn complete(
        &mut self,
        key: &K,
        result: Result<V, GatewayError>,
    ) -> Option<BTreeMap<K, Result<V, GatewayError>>> {
        if self.terminated || !self.outstanding.remove(key) {
            return None;
        }
        self.results.insert(key.clone(), result);
        if self.outstanding.is_empty() {
            self.terminated = true;
            Some(std::mem::take(&mut self.results))
        } else {
            None
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn err(msg: &str) -> GatewayError {
        GatewayError::operation(msg)
    }

    // -- AllOrAbort --

    #[test]
    fn all_success_fires_after_last() {
        let mut agg = AllOrAbort::new(["a", "b", "c"]);
        assert_eq!(agg.complete(&"a", Ok(())), None);
        assert_eq!(agg.complete(&"c", Ok(())), None);
        assert_eq!(agg.complete(&"b", Ok(())), Some(Ok(())));
    }

    #[test]
    fn first_failure_fires_immediately() {
        let mut agg = AllOrAbort::new(["a", "b", "c"]);
        assert_eq!(agg.complete(&"a", Ok(())), None);
        assert_eq!(agg.complete(&"b", Err(err("b down"))), Some(Err(err("b down"))));
    }

    #[test]
    fn later_completions_after_failure_are_discarded() {
        let mut agg = AllOrAbort::new(["a", "b", "c"]);
        assert!(agg.complete(&"a", Err(err("first"))).is_some());
        // No cause override: the second failure is swallowed.
        assert_eq!(agg.complete(&"b", Err(err("second"))), None);
        assert_eq!(agg.complete(&"c", Ok(())), None);
    }

    #[test]
    fn first_failure_wins_regardless_of_interleaving() {
        for order in [["x", "y", "z"], ["z", "x", "y"], ["y", "z", "x"]] {
            let mut agg = AllOrAbort::new(["x", "y", "z"]);
            let mut fired = None;
            for key in order {
                let result = if key == "y" { Err(err("y failed")) } else { Ok(()) };
                if let Some(outcome) = agg.complete(&key, result) {
                    assert!(fired.is_none(), "terminal fired twice");
                    fired = Some(outcome);
                }
            }
            assert_eq!(fired, Some(Err(err("y failed"))));
        }
    }

    #[test]
    fn duplicate_completion_is_noop() {
        let mut agg = AllOrAbort::new(["a", "b"]);
        assert_eq!(agg.complete(&"a", Ok(())), None);
        assert_eq!(agg.complete(&"a", Ok(())), None);
        assert_eq!(agg.complete(&"b", Ok(())), Some(Ok(())));
    }

    #[test]
    fn unknown_key_is_noop() {
        let mut agg = AllOrAbort::new(["a"]);
        assert_eq!(agg.complete(&"nope", Ok(())), None);
        assert_eq!(agg.complete(&"a", Ok(())), Some(Ok(())));
    }

    #[test]
    fn abort_fires_without_waiting() {
        let mut agg = AllOrAbort::new(["a", "b"]);
        assert_eq!(agg.abort(err("cancelled")), Some(Err(err("cancelled"))));
        assert_eq!(agg.complete(&"a", Ok(())), None);
        assert_eq!(agg.abort(err("again")), None);
    }

    #[test]
    fn empty_set_completes_immediately() {
        let mut agg: AllOrAbort<&str> = AllOrAbort::new([]);
        assert!(agg.is_empty());
        assert_eq!(agg.complete_empty(), Some(Ok(())));
        assert_eq!(agg.complete_empty(), None);
    }

    // -- ValueAggregation --

    #[test]
    fn collects_every_outcome() {
        let mut agg = ValueAggregation::new(["a", "b", "c"]);
        assert!(agg.complete(&"b", Ok(2)).is_none());
        assert!(agg.complete(&"a", Err(err("a failed"))).is_none());
        let map = agg.complete(&"c", Ok(3)).expect("terminal after last");
        assert_eq!(map.len(), 3);
        assert_eq!(map[&"b"], Ok(2));
        assert_eq!(map[&"c"], Ok(3));
        assert_eq!(map[&"a"], Err(err("a failed")));
    }

    #[test]
    fn failure_does_not_abort_siblings() {
        let mut agg = ValueAggregation::new(["a", "b"]);
        assert!(agg.complete(&"a", Err::<u32, _>(err("boom"))).is_none());
        // Still waiting for b even though a failed.
        assert!(agg.complete(&"b", Ok(1)).is_some());
    }

    #[test]
    fn value_duplicate_and_unknown_are_noops() {
        let mut agg = ValueAggregation::new(["a", "b"]);
        assert!(agg.complete(&"a", Ok(1)).is_none());
        assert!(agg.complete(&"a", Ok(99)).is_none());
        assert!(agg.complete(&"zzz", Ok(5)).is_none());
        let map = agg.complete(&"b", Ok(2)).expect("terminal");
        assert_eq!(map[&"a"], Ok(1), "first value kept");
        assert!(!map.contains_key(&"zzz"));
    }

    #[test]
    fn value_terminal_fires_once() {
        let mut agg = ValueAggregation::new(["a"]);
        assert!(agg.complete(&"a", Ok(1)).is_some());
        assert!(agg.complete(&"a", Ok(1)).is_none());
    }
}
