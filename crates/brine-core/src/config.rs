/// Implementation limits for a [`Store`](crate::Store).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Nested Wasm frames allowed before the call is aborted with
    /// [`Error::Exhaustion`](crate::Error::Exhaustion).
    pub max_call_depth: usize,
    /// Operand-stack slots (locals included) allowed per invocation.
    pub max_value_stack: usize,
    /// Upper bound on memory size in pages, for allocation and `memory.grow`.
    pub max_memory_pages: u32,
    /// Upper bound on table size in elements, for allocation and `table.grow`.
    pub max_table_elements: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_call_depth: 10_000,
            max_value_stack: 1 << 20,
            max_memory_pages: brine_runtime::MAX_PAGES,
            max_table_elements: 10_000_000,
        }
    }
}
