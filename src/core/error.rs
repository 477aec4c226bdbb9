// This module defines the error type shared by every layer of the JIT core using the thiserror
// crate. JitError covers allocation exhaustion of code buffers, failed page-protection
// transitions (carrying the OS error and the requested mode), releases of buffers the
// allocator adapter never handed out, observed-handle requests on heap resources, empty
// sessions, unbound labels, operands the backend cannot encode, and errors bubbling up from
// the x86-64 assembler or the object-file writer. JitResult<T> is the convenience alias used
// throughout the crate.

//! Error types for the JIT core.

use std::io;

use thiserror::Error;

use crate::core::protect::MemoryProtection;

/// Main error type for code generation and handle management.
#[derive(Error, Debug)]
pub enum JitError {
    #[error("Out of memory allocating {requested} bytes of code buffer")]
    OutOfMemory { requested: usize },

    #[error("Failed to protect {len} bytes at {addr:#x} as {mode:?}: {source}")]
    Protection {
        addr: usize,
        len: usize,
        mode: MemoryProtection,
        #[source]
        source: io::Error,
    },

    #[error("Buffer {addr:#x} is not tracked by this allocator")]
    UntrackedBuffer { addr: usize },

    #[error("Observed handles require an in-place memory resource")]
    NotInplace,

    #[error("Code generator finalized without emitting any code")]
    EmptyCode,

    #[error("Label {id} referenced but never bound")]
    UnboundLabel { id: u32 },

    #[error("Invalid operand: {0}")]
    InvalidOperand(String),

    #[cfg(target_arch = "x86_64")]
    #[error("Assembly error: {0}")]
    Encoding(#[from] iced_x86::IcedError),

    #[error("Object file error: {0}")]
    Object(#[from] object::write::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for JIT operations.
pub type JitResult<T> = Result<T, JitError>;
