//! # Interrupt Hooks
//!
//! The descriptor table and the entry stubs belong to the interrupt layer;
//! memory management only needs a way to route a vector to a Rust handler.

pub mod page_fault;

/// Register state pushed by the common interrupt entry stub.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct InterruptFrame {
    pub vector: u32,
    /// Error code pushed by the CPU, or 0 for vectors without one.
    pub error_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
}

/// A handler invoked by the entry stub with interrupts disabled.
pub type InterruptHandler = fn(&InterruptFrame);

/// Implemented by the interrupt layer.
pub trait InterruptHooks {
    /// Route `vector` to `handler`, replacing any previous handler.
    fn register_handler(&mut self, vector: u8, handler: InterruptHandler);
}
