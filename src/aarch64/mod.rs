//! AArch64 backend.
//!
//! This module contains all AArch64 specific code:
//! - Register and operand types (`registers`)
//! - Instruction word encoders (`encoder`)
//! - The label-resolving assembler over the code buffer (`assembler`)
//! - Large-immediate synthesis (`large_imm`)
//! - Scratch stack frames saving v8-v15 (`stack`)
//! - trn1/trn2 transpose networks (`vreg_transpose`)
//! - Apple matrix coprocessor opcodes (`m1_accelerate`)
//!
//! The encoders are plain functions over words, so this module also builds on other hosts
//! for testing encodings.

pub mod assembler;
pub mod encoder;
pub mod large_imm;
pub mod m1_accelerate;
pub mod registers;
pub mod stack;
pub mod vreg_transpose;

pub use assembler::{Assembler, Label};
pub use large_imm::LargeImm;
pub use m1_accelerate::{M1Accelerate, M1Op};
pub use registers::*;
pub use stack::{Stack, DEFAULT_STACK_SIZE};
pub use vreg_transpose::VregTranspose;

/// Encoding unit of the A64 instruction stream.
pub type CodeUnit = u32;
