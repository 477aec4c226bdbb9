//! x86-64 backend.
//!
//! This module contains all x86-64 specific code:
//! - The iced-x86 assembler bridged to the code buffer
//! - Large-immediate synthesis (`large_imm`)
//! - Scratch stack frames over the System V callee-saved set (`stack`)
//! - SSE2 transpose networks (`vreg_transpose`)
//!
//! Meta-mnemonics take `&mut CodeAssembler`, which a generator derefs to, so they can be
//! called as `imm.meta_mov_imm(&mut gen, rax, v)?` next to plain `gen.mov(..)?` calls.

pub mod assembler;
pub mod large_imm;
pub mod stack;
pub mod vreg_transpose;

pub use assembler::Assembler;
pub use large_imm::LargeImm;
pub use stack::{Stack, DEFAULT_STACK_SIZE};
pub use vreg_transpose::VregTranspose;

/// Encoding unit of the x86-64 instruction stream.
pub type CodeUnit = u8;
