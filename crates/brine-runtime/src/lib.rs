//! `brine-runtime`: runtime primitives for the brine WebAssembly engine.
//!
//! This crate is `#![no_std]` (it only needs `alloc`). It provides:
//! - `LinearMemory` for Wasm linear memory
//! - `Table` for Wasm reference tables
//! - `Trap` / `TrapResult<T>` for Wasm trap handling
//! - trapping numeric helpers in [`ops`]
//!
//! Nothing here knows about modules or instances; `brine-core` composes
//! these pieces into a store.

#![no_std]

extern crate alloc;

/// WebAssembly page size: 64 KiB.
pub const PAGE_SIZE: usize = 65536;

/// Largest page count a 32-bit linear memory can address.
pub const MAX_PAGES: u32 = 65536;

mod memory;
pub use memory::LinearMemory;

mod table;
pub use table::{RefSlot, Table};

pub mod ops;

/// Wasm execution faults. Reported as values, never as panics.
///
/// The `Display` strings follow the wording used by the reference test
/// suite so harnesses can match on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    /// `unreachable` instruction executed.
    Unreachable,
    /// Linear memory access (or bulk memory range) out of bounds.
    MemoryOutOfBounds,
    /// Table access (or bulk table range) out of bounds.
    TableOutOfBounds,
    /// `call_indirect` index beyond the table size.
    UndefinedElement,
    /// `call_indirect` through a null table entry.
    UninitializedElement,
    /// `call_indirect` signature check failed.
    IndirectCallTypeMismatch,
    /// Integer division or remainder by zero.
    IntegerDivideByZero,
    /// Signed division overflow or out-of-range float truncation.
    IntegerOverflow,
    /// Float truncation of NaN.
    InvalidConversionToInteger,
    /// A host function reported failure.
    HostFailure,
}

impl core::fmt::Display for Trap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            Trap::Unreachable => "unreachable",
            Trap::MemoryOutOfBounds => "out of bounds memory access",
            Trap::TableOutOfBounds => "out of bounds table access",
            Trap::UndefinedElement => "undefined element",
            Trap::UninitializedElement => "uninitialized element",
            Trap::IndirectCallTypeMismatch => "indirect call type mismatch",
            Trap::IntegerDivideByZero => "integer divide by zero",
            Trap::IntegerOverflow => "integer overflow",
            Trap::InvalidConversionToInteger => "invalid conversion to integer",
            Trap::HostFailure => "host function failed",
        };
        f.write_str(msg)
    }
}

impl core::error::Error for Trap {}

/// Result type for Wasm operations.
pub type TrapResult<T> = Result<T, Trap>;

/// Errors that occur while allocating a memory or a table.
///
/// These are not traps: they are reported before any code runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructionError {
    /// Initial pages exceed the maximum (declared or implementation limit).
    MemoryInitialPagesExceedsMax { initial: u32, max: u32 },
    /// Initial size exceeds the maximum (declared or implementation limit).
    TableInitialSizeExceedsMax { initial: u32, max: u32 },
    /// The allocator refused the backing storage.
    AllocationFailed,
}

impl core::fmt::Display for ConstructionError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConstructionError::MemoryInitialPagesExceedsMax { initial, max } => {
                write!(f, "memory of {initial} pages exceeds limit of {max} pages")
            }
            ConstructionError::TableInitialSizeExceedsMax { initial, max } => {
                write!(f, "table of {initial} elements exceeds limit of {max} elements")
            }
            ConstructionError::AllocationFailed => f.write_str("allocation failed"),
        }
    }
}

impl core::error::Error for ConstructionError {}
