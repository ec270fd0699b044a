//! WebAssembly linear memory.
//!
//! The backing store is a `Vec<u8>` sized to exactly `pages * PAGE_SIZE`
//! bytes; it is resized (zero-filled) by `grow`. Every access goes through
//! `checked_slice`, which computes the end address with overflow checks and
//! compares it against the active size, so an out-of-range access becomes a
//! `Trap::MemoryOutOfBounds` instead of a panic.
//!
//! Effective addresses are passed as `u64`: a Wasm address is a `u32`
//! operand plus a `u32` static offset, which can exceed `u32::MAX`.

use alloc::vec::Vec;

use crate::{ConstructionError, Trap, TrapResult, MAX_PAGES, PAGE_SIZE};

/// Linear memory of a single Wasm instance (or a host-created memory).
#[derive(Debug, Clone)]
pub struct LinearMemory {
    /// Active bytes. Length is always a multiple of `PAGE_SIZE`.
    bytes: Vec<u8>,
    /// Declared maximum in pages, if any.
    max_pages: Option<u32>,
    /// Implementation limit in pages. `grow` never exceeds it.
    limit_pages: u32,
}

impl LinearMemory {
    /// Create a zero-filled memory with `initial_pages` active.
    ///
    /// `limit_pages` is the engine's implementation limit; it is clamped to
    /// [`MAX_PAGES`].
    ///
    /// # Errors
    /// `MemoryInitialPagesExceedsMax` if `initial_pages` exceeds the declared
    /// maximum or the limit, `AllocationFailed` if the bytes cannot be reserved.
    pub fn try_new(
        initial_pages: u32,
        max_pages: Option<u32>,
        limit_pages: u32,
    ) -> Result<Self, ConstructionError> {
        let limit_pages = limit_pages.min(MAX_PAGES);
        let ceiling = max_pages.map_or(limit_pages, |m| m.min(limit_pages));
        if initial_pages > ceiling {
            return Err(ConstructionError::MemoryInitialPagesExceedsMax {
                initial: initial_pages,
                max: ceiling,
            });
        }
        let len = initial_pages as usize * PAGE_SIZE;
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| ConstructionError::AllocationFailed)?;
        bytes.resize(len, 0);
        Ok(Self {
            bytes,
            max_pages,
            limit_pages,
        })
    }

    /// Current number of active pages.
    #[inline(always)]
    pub fn page_count(&self) -> u32 {
        (self.bytes.len() / PAGE_SIZE) as u32
    }

    /// Declared maximum page count.
    #[inline(always)]
    pub fn max_pages(&self) -> Option<u32> {
        self.max_pages
    }

    /// Current active size in bytes.
    #[inline(always)]
    pub fn active_size(&self) -> usize {
        self.bytes.len()
    }

    /// Wasm `memory.grow`: returns previous page count, or -1 on failure.
    ///
    /// Fails when the new size would exceed the declared maximum, the
    /// implementation limit, or when the allocator refuses. A failed grow
    /// leaves the memory untouched.
    pub fn grow(&mut self, delta: u32) -> i32 {
        let old = self.page_count();
        let new = old as u64 + delta as u64;
        let ceiling = self
            .max_pages
            .map_or(self.limit_pages, |m| m.min(self.limit_pages));
        if new > ceiling as u64 {
            return -1;
        }
        let new_len = new as usize * PAGE_SIZE;
        if self
            .bytes
            .try_reserve_exact(new_len - self.bytes.len())
            .is_err()
        {
            return -1;
        }
        // New pages start zeroed.
        self.bytes.resize(new_len, 0);
        old as i32
    }

    // ── Bounds-checked load/store ─────────────────────────────────────

    /// Read `N` bytes at effective address `addr`.
    #[inline]
    pub fn read<const N: usize>(&self, addr: u64) -> TrapResult<[u8; N]> {
        let s = checked_slice(&self.bytes, addr, N as u64)?;
        to_array(s)
    }

    /// Write `N` bytes at effective address `addr`.
    #[inline]
    pub fn write<const N: usize>(&mut self, addr: u64, value: [u8; N]) -> TrapResult<()> {
        let s = checked_slice_mut(&mut self.bytes, addr, N as u64)?;
        s.copy_from_slice(&value);
        Ok(())
    }

    /// Borrow `len` bytes starting at `offset` (host-side inspection).
    pub fn read_bytes(&self, offset: u64, len: u64) -> TrapResult<&[u8]> {
        checked_slice(&self.bytes, offset, len)
    }

    /// Copy `data` into memory at `offset` (host-side initialisation).
    pub fn write_bytes(&mut self, offset: u64, data: &[u8]) -> TrapResult<()> {
        let dst = checked_slice_mut(&mut self.bytes, offset, data.len() as u64)?;
        dst.copy_from_slice(data);
        Ok(())
    }

    // ── Bulk memory operations ────────────────────────────────────────

    /// Wasm `memory.fill`: set `len` bytes at `dst` to `value`.
    ///
    /// The whole range is checked before any byte is written.
    pub fn fill(&mut self, dst: u32, value: u8, len: u32) -> TrapResult<()> {
        let s = checked_slice_mut(&mut self.bytes, dst as u64, len as u64)?;
        s.fill(value);
        Ok(())
    }

    /// Wasm `memory.copy`: copy `len` bytes from `src` to `dst`.
    ///
    /// Semantics match `memmove`: overlapping source and destination regions
    /// are handled correctly. Traps if either region extends beyond the
    /// active memory.
    pub fn copy_within(&mut self, dst: u32, src: u32, len: u32) -> TrapResult<()> {
        let active = self.bytes.len() as u64;
        let (dst, src, len) = (dst as u64, src as u64, len as u64);
        if src + len > active || dst + len > active {
            return Err(Trap::MemoryOutOfBounds);
        }
        let (src, dst, len) = (src as usize, dst as usize, len as usize);
        self.bytes.copy_within(src..src + len, dst);
        Ok(())
    }

    /// Wasm `memory.init`: copy `data[src..src + len]` to `dst`.
    ///
    /// Traps if the source range exceeds `data` or the destination range
    /// exceeds the active memory. A dropped segment is passed as `&[]`.
    pub fn init(&mut self, dst: u32, data: &[u8], src: u32, len: u32) -> TrapResult<()> {
        let src_bytes = checked_slice(data, src as u64, len as u64)?;
        let dst_bytes = checked_slice_mut(&mut self.bytes, dst as u64, len as u64)?;
        dst_bytes.copy_from_slice(src_bytes);
        Ok(())
    }

    /// Read-only access to the active memory region.
    #[inline(always)]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

// ── Helpers ───────────────────────────────────────────────────────────

/// Bounds-check and return the sub-slice `memory[offset..offset+len]`.
/// Returns `Err(MemoryOutOfBounds)` on overflow or out-of-range.
#[inline(always)]
fn checked_slice(memory: &[u8], offset: u64, len: u64) -> TrapResult<&[u8]> {
    let end = offset.checked_add(len).ok_or(Trap::MemoryOutOfBounds)?;
    if end > memory.len() as u64 {
        return Err(Trap::MemoryOutOfBounds);
    }
    memory
        .get(offset as usize..end as usize)
        .ok_or(Trap::MemoryOutOfBounds)
}

/// Mutable variant of `checked_slice`.
#[inline(always)]
fn checked_slice_mut(memory: &mut [u8], offset: u64, len: u64) -> TrapResult<&mut [u8]> {
    let end = offset.checked_add(len).ok_or(Trap::MemoryOutOfBounds)?;
    if end > memory.len() as u64 {
        return Err(Trap::MemoryOutOfBounds);
    }
    memory
        .get_mut(offset as usize..end as usize)
        .ok_or(Trap::MemoryOutOfBounds)
}

/// Convert a slice to a fixed-size array. Returns `Err(MemoryOutOfBounds)` if
/// the length doesn't match.
#[inline(always)]
fn to_array<const N: usize>(slice: &[u8]) -> TrapResult<[u8; N]> {
    slice.try_into().map_err(|_| Trap::MemoryOutOfBounds)
}


// ── Kani Formal Verification Proofs ──────────────────────────────────────

#[cfg(kani)]
mod proofs {
    use super::*;

    /// Proof: read never panics, only returns Ok or Err.
    #[kani::proof]
    #[kani::unwind(2)]
    fn read_never_panics() {
        let m = LinearMemory::try_new(0, Some(0), 0).unwrap();
        let addr: u64 = kani::any();
        let _ = m.read::<4>(addr);
    }

    /// Proof: grow never exceeds the declared maximum.
    #[kani::proof]
    #[kani::unwind(2)]
    fn grow_respects_max() {
        let mut m = LinearMemory::try_new(0, Some(0), 0).unwrap();
        let delta: u32 = kani::any();
        let result = m.grow(delta);
        kani::assert(m.page_count() == 0, "page count must stay within max");
        if delta > 0 {
            kani::assert(result == -1, "grow beyond max returns -1");
        }
    }
}
