//! Wasm reference table. Backs `table.*` and `call_indirect`.
//!
//! A Wasm table is a vector of nullable references. The runtime does not
//! know what a reference points to: every slot is a `RefSlot`, an optional
//! opaque `u32` handle. `brine-core` interprets the handle as a store
//! function address for `funcref` tables and as a host handle for
//! `externref` tables.
//!
//! Bulk operations (`fill`, `init`, `copy_within`) validate the whole range
//! before touching any slot, so a trapping bulk operation leaves the table
//! unchanged.

use alloc::vec::Vec;

use crate::{ConstructionError, Trap, TrapResult};

/// A single table slot: `None` is the null reference.
pub type RefSlot = Option<u32>;

/// Growable reference table.
#[derive(Debug, Clone)]
pub struct Table {
    entries: Vec<RefSlot>,
    /// Declared maximum number of elements, if any.
    max: Option<u32>,
    /// Implementation limit. `grow` never exceeds it.
    limit: u32,
}

impl Table {
    /// Create a table with `initial` slots, all set to `init`.
    ///
    /// # Errors
    /// `TableInitialSizeExceedsMax` if `initial` exceeds the declared maximum
    /// or the implementation limit.
    pub fn try_new(
        initial: u32,
        max: Option<u32>,
        limit: u32,
        init: RefSlot,
    ) -> Result<Self, ConstructionError> {
        let ceiling = max.map_or(limit, |m| m.min(limit));
        if initial > ceiling {
            return Err(ConstructionError::TableInitialSizeExceedsMax {
                initial,
                max: ceiling,
            });
        }
        let mut entries = Vec::new();
        entries
            .try_reserve_exact(initial as usize)
            .map_err(|_| ConstructionError::AllocationFailed)?;
        entries.resize(initial as usize, init);
        Ok(Self {
            entries,
            max,
            limit,
        })
    }

    /// Current number of slots.
    #[inline(always)]
    pub fn size(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Declared maximum number of slots.
    #[inline(always)]
    pub fn max(&self) -> Option<u32> {
        self.max
    }

    /// Wasm `table.get`.
    ///
    /// `TableOutOfBounds` if `index >= size`.
    #[inline]
    pub fn get(&self, index: u32) -> TrapResult<RefSlot> {
        self.entries
            .get(index as usize)
            .copied()
            .ok_or(Trap::TableOutOfBounds)
    }

    /// Wasm `table.set`.
    ///
    /// `TableOutOfBounds` if `index >= size`.
    #[inline]
    pub fn set(&mut self, index: u32, value: RefSlot) -> TrapResult<()> {
        match self.entries.get_mut(index as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(Trap::TableOutOfBounds),
        }
    }

    /// Wasm `table.grow`: grow by `delta` slots filled with `init`.
    /// Returns the previous size, or -1 on failure (size unchanged).
    pub fn grow(&mut self, delta: u32, init: RefSlot) -> i32 {
        let old = self.size();
        let new = old as u64 + delta as u64;
        let ceiling = self.max.map_or(self.limit, |m| m.min(self.limit));
        if new > ceiling as u64 {
            return -1;
        }
        if self.entries.try_reserve_exact(delta as usize).is_err() {
            return -1;
        }
        self.entries.resize(new as usize, init);
        old as i32
    }

    /// Wasm `table.fill`: set `len` slots starting at `dst` to `value`.
    pub fn fill(&mut self, dst: u32, value: RefSlot, len: u32) -> TrapResult<()> {
        let range = checked_range(self.entries.len(), dst, len)?;
        self.entries[range].fill(value);
        Ok(())
    }

    /// Borrow `len` slots starting at `src`.
    pub fn slice(&self, src: u32, len: u32) -> TrapResult<&[RefSlot]> {
        let range = checked_range(self.entries.len(), src, len)?;
        Ok(&self.entries[range])
    }

    /// Wasm `table.copy` within one table (memmove semantics).
    pub fn copy_within(&mut self, dst: u32, src: u32, len: u32) -> TrapResult<()> {
        let src_range = checked_range(self.entries.len(), src, len)?;
        let dst_range = checked_range(self.entries.len(), dst, len)?;
        self.entries.copy_within(src_range, dst_range.start);
        Ok(())
    }

    /// Wasm `table.init`: copy `items[src..src + len]` into the table at `dst`.
    ///
    /// A dropped element segment is passed as `&[]`.
    pub fn init(&mut self, dst: u32, items: &[RefSlot], src: u32, len: u32) -> TrapResult<()> {
        let src_range = checked_range(items.len(), src, len)?;
        let dst_range = checked_range(self.entries.len(), dst, len)?;
        self.entries[dst_range].copy_from_slice(&items[src_range]);
        Ok(())
    }
}

/// `start..start + len` if it fits in `size`, else `TableOutOfBounds`.
#[inline(always)]
fn checked_range(size: usize, start: u32, len: u32) -> TrapResult<core::ops::Range<usize>> {
    let end = start as u64 + len as u64;
    if end > size as u64 {
        return Err(Trap::TableOutOfBounds);
    }
    Ok(start as usize..end as usize)
}


// ── Kani Formal Verification Proofs ──────────────────────────────────────

#[cfg(kani)]
mod proofs {
    use super::*;

    /// Proof: get never panics, only returns Ok or Err.
    #[kani::proof]
    #[kani::unwind(5)]
    fn get_never_panics() {
        let table = Table::try_new(4, Some(4), 4, None).unwrap();
        let index: u32 = kani::any();
        let _ = table.get(index);
    }

    /// Proof: grow size never exceeds the maximum.
    #[kani::proof]
    #[kani::unwind(5)]
    fn grow_respects_max_size() {
        let mut table = Table::try_new(1, Some(4), 4, None).unwrap();
        let delta: u32 = kani::any();
        let old_size = table.size();
        let result = table.grow(delta, None);

        kani::assert(table.size() <= 4, "size must not exceed max");
        if result >= 0 {
            kani::assert(result == old_size as i32, "grow returns old size");
        } else {
            kani::assert(table.size() == old_size, "failed grow leaves size unchanged");
        }
    }

    /// Proof: a failing fill leaves every slot untouched.
    #[kani::proof]
    #[kani::unwind(5)]
    fn failed_fill_is_side_effect_free() {
        let mut table = Table::try_new(4, Some(4), 4, None).unwrap();
        let dst: u32 = kani::any();
        let len: u32 = kani::any();
        if table.fill(dst, Some(1), len).is_err() {
            kani::assert(table.get(0) == Ok(None), "slot 0 untouched");
            kani::assert(table.get(3) == Ok(None), "slot 3 untouched");
        }
    }
}
