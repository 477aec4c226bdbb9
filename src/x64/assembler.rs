// This module adapts iced-x86's CodeAssembler to the generator's Emitter interface. Mnemonics
// are queued on the CodeAssembler, which the Assembler dereferences to, and ready() encodes
// the queue into the code buffer. Encoding happens at the address the bytes will occupy, so
// RIP-relative operands and absolute branch targets resolve correctly; if reserving space
// moves the buffer the queue is re-encoded at the new address. align_to() flushes the queue
// and pads the buffer with multi-byte NOPs, and argument_address() names the entry-time stack
// slot of a System V integer argument that did not fit in registers.

//! x86-64 assembler feeding a code buffer.

use std::ops::{Deref, DerefMut};

use iced_x86::code_asm::{qword_ptr, rsp, AsmMemoryOperand, CodeAssembler};

use crate::core::code_buffer::CodeBuffer;
use crate::core::error::JitResult;
use crate::core::generator::Emitter;

/// Recommended NOP encodings of 1 to 9 bytes.
const NOPS: [&[u8]; 9] = [
    &[0x90],
    &[0x66, 0x90],
    &[0x0F, 0x1F, 0x00],
    &[0x0F, 0x1F, 0x40, 0x00],
    &[0x0F, 0x1F, 0x44, 0x00, 0x00],
    &[0x66, 0x0F, 0x1F, 0x44, 0x00, 0x00],
    &[0x0F, 0x1F, 0x80, 0x00, 0x00, 0x00, 0x00],
    &[0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
];

/// Instruction queue plus the buffer it is encoded into.
pub struct Assembler {
    code: CodeAssembler,
    buffer: CodeBuffer,
}

impl Assembler {
    /// Number of instructions queued and not yet encoded.
    pub fn pending_instructions(&self) -> usize {
        self.code.instructions().len()
    }

    /// Pad with NOPs until the code size is a multiple of `alignment`.
    ///
    /// The queue is encoded first, so every label referenced before this point must be
    /// bound before it.
    pub fn align_to(&mut self, alignment: usize) -> JitResult<()> {
        assert!(alignment > 0, "alignment must be non-zero");
        self.ready()?;
        let mut pad = (alignment - self.buffer.len() % alignment) % alignment;
        while pad > 0 {
            let n = pad.min(NOPS.len());
            self.buffer.extend_from_slice(NOPS[n - 1])?;
            pad -= n;
        }
        Ok(())
    }

    /// Stack slot of integer argument `n` (zero-based) at function entry, above the return
    /// address. Arguments 0 to 5 travel in registers and have no slot.
    pub fn argument_address(&self, n: usize) -> AsmMemoryOperand {
        assert!(n > 5, "integer arguments 0..=5 are passed in registers");
        qword_ptr(rsp + (8 * (n - 5)) as i32)
    }
}

impl Emitter for Assembler {
    fn with_buffer(buffer: CodeBuffer) -> JitResult<Self> {
        Ok(Self {
            code: CodeAssembler::new(64)?,
            buffer,
        })
    }

    fn ready(&mut self) -> JitResult<()> {
        if self.code.instructions().is_empty() {
            return Ok(());
        }

        let mut ip = self.buffer.next_address();
        loop {
            let bytes = self.code.assemble(ip)?;
            self.buffer.reserve(bytes.len())?;
            let next = self.buffer.next_address();
            if next == ip {
                self.buffer.extend_from_slice(&bytes)?;
                log::trace!(
                    "encoded {} instructions into {} bytes at {:#x}",
                    self.code.instructions().len(),
                    bytes.len(),
                    ip
                );
                break;
            }
            ip = next;
        }

        self.code.reset();
        Ok(())
    }

    fn buffer(&self) -> &CodeBuffer {
        &self.buffer
    }

    fn into_buffer(self) -> CodeBuffer {
        self.buffer
    }
}

impl Deref for Assembler {
    type Target = CodeAssembler;

    fn deref(&self) -> &CodeAssembler {
        &self.code
    }
}

impl DerefMut for Assembler {
    fn deref_mut(&mut self) -> &mut CodeAssembler {
        &mut self.code
    }
}
