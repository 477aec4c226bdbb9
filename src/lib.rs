//! kernjit - a JIT core for hand-written numeric kernels.
//!
//! kernjit emits machine code into a growable buffer, moves the buffer from writable to
//! executable pages (never both), and returns typed handles to the finished function.
//! Meta-mnemonic strategies layered on the backend assembler cover the composite sequences
//! kernels keep needing.
//!
//! # Primary Usage
//!
//! ```ignore
//! use kernjit::CodeGenerator;
//! use iced_x86::code_asm::*;
//!
//! let mut gen = CodeGenerator::<extern "C" fn(u64) -> u64>::new()?;
//! gen.lea(rax, ptr(rdi + 1))?;
//! gen.ret()?;
//! let add_one = unsafe { gen.get_unique()? };
//! assert_eq!(add_one.call(41), 42);
//! ```
//!
//! # Architecture
//!
//! - [`core`] - Protection, memory resources, code buffers, generators and handles
//! - [`vreg_view`] - Lane views shared by the transpose networks
//! - [`x64`] - x86-64 assembler and meta-mnemonics
//! - [`aarch64`] - AArch64 assembler and meta-mnemonics

pub mod core;
pub mod vreg_view;

#[cfg(target_arch = "x86_64")]
pub mod x64;

#[cfg(any(target_arch = "aarch64", test))]
pub mod aarch64;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("kernjit supports x86_64 and aarch64 targets only");

/// Assembler of the target architecture.
#[cfg(target_arch = "x86_64")]
pub use x64::{Assembler, CodeUnit};

#[cfg(target_arch = "aarch64")]
pub use aarch64::{Assembler, CodeUnit};

pub use crate::core::{
    // Generation
    BasicCodeGenerator, CodeGenerator, Emitter, GeneratorOptions,
    // Handles
    dynamic_fn_cast, DynamicFnCast, ObservedFn, SharedFn, UniqueFn, WeakFn, Signature,
    // Memory
    default_resource, AllocatorAdapter, CodeBuffer, HeapResource, InplaceResource,
    MemoryResource,
    // Protection
    page_size, protect, MemoryProtection,
    // Errors
    JitError, JitResult,
};
pub use vreg_view::VregView;
