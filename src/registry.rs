//! Fan-out edges from a producer to its consumers.
//!
//! The registry is an ordered list of (consumer, input slot) pairs. It can
//! be mutated from any thread while frames are in flight; a propagation pass
//! works from a [`TargetRegistry::snapshot`] so it observes either the
//! pre- or post-mutation list, never a torn one.
//!
//! Consumers are held by `Weak` reference — the registry owns nothing.
//! Edges whose consumer has been dropped are skipped during propagation and
//! pruned on the next mutation.

use std::sync::{Arc, Mutex, Weak};

use crate::error::OutputError;
use crate::sink::FrameSink;

/// How a slot index is chosen when a target is added without one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotPolicy {
    /// Ask the consumer via [`FrameSink::next_input_slot`] (pipeline
    /// convention: the count of producers already feeding it).
    #[default]
    Consumer,
    /// Count this registry's existing edges to that consumer.
    Registry,
}

/// One fan-out edge: a non-owning consumer reference and the input slot it
/// feeds.
pub struct TargetEdge<C> {
    pub sink: Weak<dyn FrameSink<C>>,
    pub slot: usize,
}

impl<C> Clone for TargetEdge<C> {
    fn clone(&self) -> Self {
        TargetEdge {
            sink: self.sink.clone(),
            slot: self.slot,
        }
    }
}

/// Ordered collection of a producer's outgoing edges.
pub struct TargetRegistry<C> {
    edges: Mutex<Vec<TargetEdge<C>>>,
    policy: SlotPolicy,
}

impl<C> TargetRegistry<C> {
    pub fn new(policy: SlotPolicy) -> Self {
        TargetRegistry {
            edges: Mutex::new(Vec::new()),
            policy,
        }
    }

    pub fn policy(&self) -> SlotPolicy {
        self.policy
    }

    /// Append `sink` with a slot chosen by the registry's [`SlotPolicy`].
    /// Returns the assigned slot.
    pub fn add(&self, sink: &Arc<dyn FrameSink<C>>) -> Result<usize, OutputError> {
        let weak = Arc::downgrade(sink);
        let mut edges = self.edges.lock().expect("registry lock");
        prune(&mut edges);
        let slot = match self.policy {
            SlotPolicy::Consumer => sink.next_input_slot(),
            SlotPolicy::Registry => edges.iter().filter(|e| same_target(&e.sink, &weak)).count(),
        };
        insert(&mut edges, weak, slot)?;
        Ok(slot)
    }

    /// Append `sink` feeding an explicit input slot. Re-adding the same
    /// consumer at a slot it already occupies is an error; the registry is
    /// left untouched.
    pub fn add_at(&self, sink: &Arc<dyn FrameSink<C>>, slot: usize) -> Result<(), OutputError> {
        let weak = Arc::downgrade(sink);
        let mut edges = self.edges.lock().expect("registry lock");
        prune(&mut edges);
        insert(&mut edges, weak, slot)
    }

    /// Remove the edge(s) to `sink`. Not an error if absent. Returns whether
    /// anything was removed.
    pub fn remove(&self, sink: &Arc<dyn FrameSink<C>>) -> bool {
        let weak = Arc::downgrade(sink);
        let mut edges = self.edges.lock().expect("registry lock");
        let before = edges.len();
        edges.retain(|e| !same_target(&e.sink, &weak) && e.sink.strong_count() > 0);
        edges.len() < before
    }

    /// Drop every edge. Owned resources (the output texture) are unaffected.
    pub fn clear(&self) {
        self.edges.lock().expect("registry lock").clear();
    }

    pub fn len(&self) -> usize {
        self.edges.lock().expect("registry lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consistent copy of the edge list for one propagation pass. Consumers
    /// added after the snapshot is taken are not notified in that pass;
    /// consumers removed after it may still be (they were present when the
    /// pass began dispatch).
    pub fn snapshot(&self) -> Vec<TargetEdge<C>> {
        self.edges.lock().expect("registry lock").clone()
    }
}

impl<C> Default for TargetRegistry<C> {
    fn default() -> Self {
        TargetRegistry::new(SlotPolicy::default())
    }
}

/// Identity comparison for consumer references. Compares allocation
/// addresses only; `Weak::ptr_eq` on trait objects also compares vtable
/// pointers, which may spuriously differ.
pub(crate) fn same_target<C>(a: &Weak<dyn FrameSink<C>>, b: &Weak<dyn FrameSink<C>>) -> bool {
    std::ptr::addr_eq(a.as_ptr(), b.as_ptr())
}

fn prune<C>(edges: &mut Vec<TargetEdge<C>>) {
    edges.retain(|e| e.sink.strong_count() > 0);
}

fn insert<C>(
    edges: &mut Vec<TargetEdge<C>>,
    sink: Weak<dyn FrameSink<C>>,
    slot: usize,
) -> Result<(), OutputError> {
    if edges.iter().any(|e| e.slot == slot && same_target(&e.sink, &sink)) {
        return Err(OutputError::InvalidTarget {
            reason: format!("consumer already registered at slot {slot}"),
        });
    }
    edges.push(TargetEdge { sink, slot });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Size;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        reported_slot: usize,
        frames: AtomicUsize,
    }

    impl CountingSink {
        fn new(reported_slot: usize) -> Arc<Self> {
            Arc::new(CountingSink {
                reported_slot,
                frames: AtomicUsize::new(0),
            })
        }
    }

    impl FrameSink<()> for CountingSink {
        fn set_input_texture(&self, _tex: u32, _slot: usize) {}
        fn set_input_size(&self, _size: Size, _slot: usize) {}
        fn new_frame_ready(&self, _ctx: &()) -> Result<(), OutputError> {
            self.frames.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn next_input_slot(&self) -> usize {
            self.reported_slot
        }
    }

    fn as_sink(s: &Arc<CountingSink>) -> Arc<dyn FrameSink<()>> {
        s.clone()
    }

    #[test]
    fn consumer_policy_uses_reported_slot() {
        let registry = TargetRegistry::<()>::new(SlotPolicy::Consumer);
        let sink = CountingSink::new(3);
        assert_eq!(registry.add(&as_sink(&sink)).unwrap(), 3);
    }

    #[test]
    fn registry_policy_counts_existing_edges() {
        let registry = TargetRegistry::<()>::new(SlotPolicy::Registry);
        let sink = CountingSink::new(9);
        assert_eq!(registry.add(&as_sink(&sink)).unwrap(), 0);
        assert_eq!(registry.add(&as_sink(&sink)).unwrap(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn duplicate_edge_is_rejected_without_corruption() {
        let registry = TargetRegistry::<()>::default();
        let sink = CountingSink::new(0);
        registry.add_at(&as_sink(&sink), 0).unwrap();
        let err = registry.add_at(&as_sink(&sink), 0).unwrap_err();
        assert!(matches!(err, OutputError::InvalidTarget { .. }));
        assert_eq!(registry.len(), 1);
        // Same consumer at a different slot is fine.
        registry.add_at(&as_sink(&sink), 1).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn remove_is_a_noop_when_absent() {
        let registry = TargetRegistry::<()>::default();
        let sink = CountingSink::new(0);
        assert!(!registry.remove(&as_sink(&sink)));
        registry.add(&as_sink(&sink)).unwrap();
        assert!(registry.remove(&as_sink(&sink)));
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_is_isolated_from_later_mutation() {
        let registry = TargetRegistry::<()>::default();
        let a = CountingSink::new(0);
        let b = CountingSink::new(0);
        registry.add(&as_sink(&a)).unwrap();

        let snap = registry.snapshot();
        registry.add_at(&as_sink(&b), 1).unwrap();
        registry.remove(&as_sink(&a));

        assert_eq!(snap.len(), 1);
        assert!(same_target(&snap[0].sink, &Arc::downgrade(&as_sink(&a))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn dropped_consumers_are_pruned_on_mutation() {
        let registry = TargetRegistry::<()>::default();
        let keep = CountingSink::new(0);
        {
            let gone = CountingSink::new(0);
            registry.add(&as_sink(&gone)).unwrap();
        }
        assert_eq!(registry.len(), 1);
        registry.add(&as_sink(&keep)).unwrap();
        // The dead edge went away during the add.
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn edges_preserve_insertion_order() {
        let registry = TargetRegistry::<()>::default();
        let a = CountingSink::new(0);
        let b = CountingSink::new(0);
        let c = CountingSink::new(0);
        registry.add_at(&as_sink(&a), 0).unwrap();
        registry.add_at(&as_sink(&b), 0).unwrap();
        registry.add_at(&as_sink(&c), 2).unwrap();
        let snap = registry.snapshot();
        assert!(same_target(&snap[0].sink, &Arc::downgrade(&as_sink(&a))));
        assert!(same_target(&snap[1].sink, &Arc::downgrade(&as_sink(&b))));
        assert_eq!(snap[2].slot, 2);
    }
}
