//! Low-level binary format primitives.

mod reader;

pub use reader::{Reader, Result};
pub(crate) use reader::val_type_from_byte;

/// `\0asm`
pub const MAGIC: [u8; 4] = *b"\0asm";
pub const VERSION: [u8; 4] = [1, 0, 0, 0];

/// Section ids.
pub mod section {
    pub const CUSTOM: u8 = 0;
    pub const TYPE: u8 = 1;
    pub const IMPORT: u8 = 2;
    pub const FUNCTION: u8 = 3;
    pub const TABLE: u8 = 4;
    pub const MEMORY: u8 = 5;
    pub const GLOBAL: u8 = 6;
    pub const EXPORT: u8 = 7;
    pub const START: u8 = 8;
    pub const ELEMENT: u8 = 9;
    pub const CODE: u8 = 10;
    pub const DATA: u8 = 11;
    pub const DATA_COUNT: u8 = 12;

    /// Position of a known section in the mandated order. Data count sits
    /// between element and code.
    pub fn rank(id: u8) -> Option<u8> {
        match id {
            TYPE..=ELEMENT => Some(id),
            DATA_COUNT => Some(10),
            CODE => Some(11),
            DATA => Some(12),
            _ => None,
        }
    }
}
