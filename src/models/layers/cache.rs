//! Cross-attention key/value cache for autoregressive decoding.
//!
//! The encoder output is invariant across decoding steps of one audio
//! segment, so each decoder block caches its cross-attention key/value
//! projections and reuses them until the caller signals a new segment with a
//! fresh step index.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Single-slot key/value cache of one cross-attention layer.
///
/// The slot is either `Empty` or holds a `(key, value, step)` triple that was
/// stored together in one update; there is no partially-populated state.
#[derive(Debug, Clone)]
pub enum CrossKvCache<B: Backend> {
    /// No projections cached yet; guaranteed to miss for every step index.
    Empty,
    /// Cached projections for the segment identified by `step`.
    Populated {
        /// Cached key projection [batch, kv_seq, state].
        key: Tensor<B, 3>,
        /// Cached value projection [batch, kv_seq, state].
        value: Tensor<B, 3>,
        /// Step index the projections were computed for.
        step: i64,
    },
}

impl<B: Backend> Default for CrossKvCache<B> {
    fn default() -> Self {
        Self::Empty
    }
}

impl<B: Backend> CrossKvCache<B> {
    /// Create an empty cache slot.
    pub fn new() -> Self {
        Self::Empty
    }

    /// Cached key/value for `step`, if the slot holds that exact index.
    pub fn lookup(&self, step: i64) -> Option<(Tensor<B, 3>, Tensor<B, 3>)> {
        match self {
            Self::Populated {
                key,
                value,
                step: cached,
            } if *cached == step => Some((key.clone(), value.clone())),
            _ => None,
        }
    }

    /// Replace the slot contents. Key, value, and step move together.
    pub fn store(&mut self, key: Tensor<B, 3>, value: Tensor<B, 3>, step: i64) {
        *self = Self::Populated { key, value, step };
    }

    /// Return the slot to the empty state.
    pub fn reset(&mut self) {
        *self = Self::Empty;
    }

    /// Whether the slot currently holds projections.
    pub fn is_populated(&self) -> bool {
        matches!(self, Self::Populated { .. })
    }
}

/// Cross-attention cache slots for all decoder blocks.
///
/// Scoped to one decoding session of one decoder instance. Must be reset (or
/// replaced) when an unrelated audio context begins.
#[derive(Debug)]
pub struct DecoderCaches<B: Backend> {
    slots: Vec<CrossKvCache<B>>,
}

impl<B: Backend> DecoderCaches<B> {
    /// Create empty slots for `n_layers` blocks.
    pub fn new(n_layers: usize) -> Self {
        Self {
            slots: (0..n_layers).map(|_| CrossKvCache::new()).collect(),
        }
    }

    /// Get mutable access to one block's slot.
    pub fn get_mut(&mut self, layer: usize) -> Option<&mut CrossKvCache<B>> {
        self.slots.get_mut(layer)
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether there are no slots at all.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Reset every slot to the empty state.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::Tensor;

    type TestBackend = NdArray;

    fn filled(value: f32) -> Tensor<TestBackend, 3> {
        Tensor::full([1, 4, 8], value, &Default::default())
    }

    #[test]
    fn test_cache_starts_empty() {
        let cache: CrossKvCache<TestBackend> = CrossKvCache::new();
        assert!(!cache.is_populated());
        assert!(cache.lookup(0).is_none());
        assert!(cache.lookup(-1).is_none());
    }

    #[test]
    fn test_store_then_lookup_same_step() {
        let mut cache: CrossKvCache<TestBackend> = CrossKvCache::new();
        cache.store(filled(1.0), filled(2.0), 7);

        let (k, v) = cache.lookup(7).expect("hit");
        assert_eq!(k.to_data().to_vec::<f32>().unwrap(), vec![1.0; 32]);
        assert_eq!(v.to_data().to_vec::<f32>().unwrap(), vec![2.0; 32]);
        assert!(cache.lookup(8).is_none());
    }

    #[test]
    fn test_store_replaces_whole_slot() {
        let mut cache: CrossKvCache<TestBackend> = CrossKvCache::new();
        cache.store(filled(1.0), filled(2.0), 0);
        cache.store(filled(3.0), filled(4.0), 1);

        assert!(cache.lookup(0).is_none());
        let (k, v) = cache.lookup(1).expect("hit");
        assert_eq!(k.to_data().to_vec::<f32>().unwrap(), vec![3.0; 32]);
        assert_eq!(v.to_data().to_vec::<f32>().unwrap(), vec![4.0; 32]);
    }

    #[test]
    fn test_reset_clears_slot() {
        let mut cache: CrossKvCache<TestBackend> = CrossKvCache::new();
        cache.store(filled(1.0), filled(2.0), 3);
        cache.reset();
        assert!(!cache.is_populated());
        assert!(cache.lookup(3).is_none());
    }

    #[test]
    fn test_decoder_caches_are_independent() {
        let mut a: DecoderCaches<TestBackend> = DecoderCaches::new(2);
        let mut b: DecoderCaches<TestBackend> = DecoderCaches::new(2);

        a.get_mut(0).unwrap().store(filled(1.0), filled(2.0), 0);

        assert!(a.get_mut(0).unwrap().is_populated());
        assert!(!b.get_mut(0).unwrap().is_populated());
        assert!(!b.get_mut(1).unwrap().is_populated());
    }

    #[test]
    fn test_decoder_caches_reset_all() {
        let mut caches: DecoderCaches<TestBackend> = DecoderCaches::new(3);
        for i in 0..3 {
            caches.get_mut(i).unwrap().store(filled(1.0), filled(1.0), 5);
        }
        caches.reset();
        for i in 0..3 {
            assert!(!caches.get_mut(i).unwrap().is_populated());
        }
    }
}
