//! Bounded integer allocator
//!
//! Hands out unique numbers (TCP ports, minor numbers, ...) from a bounded
//! range, backed by a word-level bitmap. The pool serializes all callers with
//! its own internal mutex, distinct from any per-entity lock and only ever
//! acquired while the caller already holds its entity's lock, which fixes a
//! single cluster-wide lock order.
//!
//! Pool mutations participate in the transaction scope: they apply eagerly to
//! the shared bitmap — a number handed out is immediately unavailable to
//! every other context — and register an undo entry with the supplied
//! [`TransactionContext`], so rolling back the context releases numbers it
//! allocated and re-acquires numbers it deallocated.

use crate::error::{Error, Result};
use crate::transaction::{TransactionContext, TransactionObject};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

const WORD_BITS: u32 = u64::BITS;

// =============================================================================
// Number Pool
// =============================================================================

struct Bitmap {
    words: Vec<u64>,
    allocated: usize,
}

impl Bitmap {
    fn test(&self, bit: u32) -> bool {
        self.words[(bit / WORD_BITS) as usize] & (1u64 << (bit % WORD_BITS)) != 0
    }

    fn set(&mut self, bit: u32) {
        self.words[(bit / WORD_BITS) as usize] |= 1u64 << (bit % WORD_BITS);
        self.allocated += 1;
    }

    fn clear(&mut self, bit: u32) {
        self.words[(bit / WORD_BITS) as usize] &= !(1u64 << (bit % WORD_BITS));
        self.allocated -= 1;
    }
}

/// Allocator for scarce numbers within `[range_min, range_max]`
pub struct NumberPool {
    name: String,
    range_min: u32,
    range_max: u32,
    bitmap: Mutex<Bitmap>,
}

impl NumberPool {
    /// Create a pool covering the inclusive range `[range_min, range_max]`
    pub fn new(name: impl Into<String>, range_min: u32, range_max: u32) -> Result<Arc<Self>> {
        let name = name.into();
        if range_min > range_max {
            return Err(Error::ImplementationError(format!(
                "number pool '{}' has an inverted range [{}, {}]",
                name, range_min, range_max
            )));
        }
        let size = (range_max - range_min + 1) as usize;
        let words = vec![0u64; size.div_ceil(WORD_BITS as usize)];
        Ok(Arc::new(Self {
            name,
            range_min,
            range_max,
            bitmap: Mutex::new(Bitmap {
                words,
                allocated: 0,
            }),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn range(&self) -> (u32, u32) {
        (self.range_min, self.range_max)
    }

    /// Numbers currently handed out
    pub fn allocated_count(&self) -> usize {
        self.bitmap.lock().allocated
    }

    pub fn is_allocated(&self, number: u32) -> bool {
        match self.offset_of(number) {
            Ok(bit) => self.bitmap.lock().test(bit),
            Err(_) => false,
        }
    }

    /// Claim a specific number
    pub fn allocate(self: &Arc<Self>, tx: &TransactionContext, number: u32) -> Result<()> {
        let bit = self.offset_of(number)?;
        {
            let mut bitmap = self.bitmap.lock();
            if bitmap.test(bit) {
                return Err(Error::ValueInUse {
                    pool: self.name.clone(),
                    number,
                });
            }
            bitmap.set(bit);
        }
        debug!(pool = %self.name, number, "allocated number");
        tx.register(PoolUndo::new(self.clone(), PoolOp::Allocated(number)));
        Ok(())
    }

    /// Release a number; a no-op if it is not allocated
    ///
    /// Returns whether the number was actually released.
    pub fn deallocate(self: &Arc<Self>, tx: &TransactionContext, number: u32) -> bool {
        let released = match self.offset_of(number) {
            Ok(bit) => {
                let mut bitmap = self.bitmap.lock();
                if bitmap.test(bit) {
                    bitmap.clear(bit);
                    true
                } else {
                    false
                }
            }
            Err(_) => false,
        };
        if released {
            debug!(pool = %self.name, number, "released number");
            tx.register(PoolUndo::new(self.clone(), PoolOp::Deallocated(number)));
        }
        released
    }

    /// Claim the smallest free number in range
    pub fn auto_allocate(self: &Arc<Self>, tx: &TransactionContext) -> Result<u32> {
        let number = {
            let mut bitmap = self.bitmap.lock();
            let bit = self.find_free(&bitmap).ok_or(Error::ExhaustedPool {
                pool: self.name.clone(),
            })?;
            bitmap.set(bit);
            self.range_min + bit
        };
        debug!(pool = %self.name, number, "auto-allocated number");
        tx.register(PoolUndo::new(self.clone(), PoolOp::Allocated(number)));
        Ok(number)
    }

    fn offset_of(&self, number: u32) -> Result<u32> {
        if number < self.range_min || number > self.range_max {
            return Err(Error::ValueOutOfRange {
                pool: self.name.clone(),
                number,
                min: self.range_min,
                max: self.range_max,
            });
        }
        Ok(number - self.range_min)
    }

    fn find_free(&self, bitmap: &Bitmap) -> Option<u32> {
        let size = self.range_max - self.range_min + 1;
        for (index, word) in bitmap.words.iter().enumerate() {
            if *word != u64::MAX {
                let bit = index as u32 * WORD_BITS + word.trailing_ones();
                if bit < size {
                    return Some(bit);
                }
            }
        }
        None
    }

    /// Undo helper: give a number back without journaling
    fn release_raw(&self, number: u32) {
        if let Ok(bit) = self.offset_of(number) {
            let mut bitmap = self.bitmap.lock();
            if bitmap.test(bit) {
                bitmap.clear(bit);
            }
        }
    }

    /// Undo helper: take a number back without journaling
    fn reacquire_raw(&self, number: u32) {
        if let Ok(bit) = self.offset_of(number) {
            let mut bitmap = self.bitmap.lock();
            if !bitmap.test(bit) {
                bitmap.set(bit);
            } else {
                // Another context claimed the number after we released it;
                // the rollback cannot restore it
                warn!(
                    pool = %self.name,
                    number,
                    "rollback could not restore deallocated number, already re-allocated"
                );
            }
        }
    }
}

// =============================================================================
// Rollback Journal
// =============================================================================

enum PoolOp {
    Allocated(u32),
    Deallocated(u32),
}

/// One journaled pool mutation, registered with the owning context
struct PoolUndo {
    pool: Arc<NumberPool>,
    op: PoolOp,
    armed: AtomicBool,
}

impl PoolUndo {
    fn new(pool: Arc<NumberPool>, op: PoolOp) -> Arc<Self> {
        Arc::new(Self {
            pool,
            op,
            armed: AtomicBool::new(true),
        })
    }
}

impl TransactionObject for PoolUndo {
    fn is_dirty(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    fn commit(&self) -> Result<()> {
        // The bitmap mutation already happened; commit only retires the undo
        self.armed.store(false, Ordering::Release);
        Ok(())
    }

    fn rollback(&self) {
        if self.armed.swap(false, Ordering::AcqRel) {
            match self.op {
                PoolOp::Allocated(number) => self.pool.release_raw(number),
                PoolOp::Deallocated(number) => self.pool.reacquire_raw(number),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_allocate_lifecycle() {
        let tx = TransactionContext::new();
        let pool = NumberPool::new("tcp-ports", 7000, 7001).unwrap();

        pool.allocate(&tx, 7000).unwrap();
        assert_matches!(
            pool.allocate(&tx, 7000),
            Err(Error::ValueInUse { number: 7000, .. })
        );

        assert_eq!(pool.auto_allocate(&tx).unwrap(), 7001);
        assert_matches!(pool.auto_allocate(&tx), Err(Error::ExhaustedPool { .. }));

        assert!(pool.deallocate(&tx, 7000));
        assert_eq!(pool.auto_allocate(&tx).unwrap(), 7000);
        tx.commit().unwrap();
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        let tx = TransactionContext::new();
        let pool = NumberPool::new("tcp-ports", 7000, 7999).unwrap();

        assert_matches!(
            pool.allocate(&tx, 6999),
            Err(Error::ValueOutOfRange {
                number: 6999,
                min: 7000,
                max: 7999,
                ..
            })
        );
        assert_matches!(
            pool.allocate(&tx, 8000),
            Err(Error::ValueOutOfRange { .. })
        );
    }

    #[test]
    fn test_deallocate_is_idempotent() {
        let tx = TransactionContext::new();
        let pool = NumberPool::new("minors", 1000, 1010).unwrap();

        pool.allocate(&tx, 1005).unwrap();
        assert!(pool.deallocate(&tx, 1005));
        assert!(!pool.deallocate(&tx, 1005));
        assert!(!pool.deallocate(&tx, 9999));
        tx.commit().unwrap();
    }

    #[test]
    fn test_rollback_releases_numbers_allocated_in_the_context() {
        let pool = NumberPool::new("tcp-ports", 7000, 7063).unwrap();

        let tx = TransactionContext::new();
        pool.allocate(&tx, 7000).unwrap();
        pool.auto_allocate(&tx).unwrap();
        assert_eq!(pool.allocated_count(), 2);

        tx.rollback();
        assert_eq!(pool.allocated_count(), 0);
        assert!(!pool.is_allocated(7000));
        assert!(!pool.is_allocated(7001));
    }

    #[test]
    fn test_rollback_reacquires_deallocated_numbers() {
        let pool = NumberPool::new("tcp-ports", 7000, 7063).unwrap();

        let setup = TransactionContext::new();
        pool.allocate(&setup, 7003).unwrap();
        setup.commit().unwrap();

        let tx = TransactionContext::new();
        assert!(pool.deallocate(&tx, 7003));
        assert!(!pool.is_allocated(7003));

        tx.rollback();
        assert!(pool.is_allocated(7003));
    }

    #[test]
    fn test_commit_retires_the_journal() {
        let pool = NumberPool::new("tcp-ports", 7000, 7063).unwrap();

        let tx = TransactionContext::new();
        pool.allocate(&tx, 7000).unwrap();
        tx.commit().unwrap();

        // Rolling back after commit must not release the committed number
        tx.rollback();
        assert!(pool.is_allocated(7000));
    }

    #[test]
    fn test_eager_visibility_across_contexts() {
        let pool = NumberPool::new("tcp-ports", 7000, 7063).unwrap();

        let first = TransactionContext::new();
        pool.allocate(&first, 7000).unwrap();

        // Uncommitted, but the number is already reserved pool-wide
        let second = TransactionContext::new();
        assert_matches!(pool.allocate(&second, 7000), Err(Error::ValueInUse { .. }));
        assert_eq!(pool.auto_allocate(&second).unwrap(), 7001);

        first.rollback();
        second.commit().unwrap();
        assert!(!pool.is_allocated(7000));
        assert!(pool.is_allocated(7001));
    }

    #[test]
    fn test_auto_allocate_spans_word_boundaries() {
        let tx = TransactionContext::new();
        let pool = NumberPool::new("minors", 0, 130).unwrap();

        for expected in 0..=130 {
            assert_eq!(pool.auto_allocate(&tx).unwrap(), expected);
        }
        assert_matches!(pool.auto_allocate(&tx), Err(Error::ExhaustedPool { .. }));
        tx.commit().unwrap();
    }
}
