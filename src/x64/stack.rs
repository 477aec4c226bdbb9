// This module gives hand-written x86-64 kernels a private scratch stack addressed through a
// dedicated base register. The prologue lowers RSP by the region size in 1024-byte steps,
// points the base register at the bottom of the region and spills the System V callee-saved
// registers there in pairs, so the kernel body may use all of them freely. The epilogue undoes
// this exactly. Pushes store upward through the base register and pops reload downward; the
// base register moves with LEA so condition flags survive stack traffic.

//! Scratch stack frames for x86-64 kernels.

use iced_x86::code_asm::{
    ptr, qword_ptr, r12, r13, r14, r15, rbp, rbx, rsp, AsmRegister64, CodeAssembler,
};

use crate::core::error::JitResult;

/// Default size of the scratch region in bytes.
pub const DEFAULT_STACK_SIZE: u32 = 2048;

/// RSP is moved by at most this much per instruction.
const STACK_CHUNK: i32 = 1024;

const CALLEE_SAVED: [AsmRegister64; 6] = [rbx, rbp, r12, r13, r14, r15];

/// A scratch stack rooted at `base`.
#[derive(Debug, Clone, Copy)]
pub struct Stack {
    base: AsmRegister64,
    size: u32,
}

impl Stack {
    pub fn new(base: AsmRegister64) -> Self {
        Self::with_size(base, DEFAULT_STACK_SIZE)
    }

    /// Panics if `base` is RSP or callee-saved, or the region cannot hold the saved registers.
    pub fn with_size(base: AsmRegister64, size: u32) -> Self {
        assert!(
            base != rsp && !CALLEE_SAVED.contains(&base),
            "stack base must be a caller-saved register"
        );
        assert!(
            size as usize >= CALLEE_SAVED.len() * 8,
            "stack region too small for the callee-saved registers"
        );
        Self { base, size }
    }

    pub fn base(&self) -> AsmRegister64 {
        self.base
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    fn chunks(&self) -> u32 {
        self.size.div_ceil(STACK_CHUNK as u32)
    }

    pub fn prologue(&self, a: &mut CodeAssembler) -> JitResult<()> {
        for _ in 0..self.chunks() {
            a.sub(rsp, STACK_CHUNK)?;
        }
        a.mov(self.base, rsp)?;
        for pair in CALLEE_SAVED.chunks(2) {
            self.meta_push_pair(a, pair[0], pair[1])?;
        }
        Ok(())
    }

    pub fn epilogue(&self, a: &mut CodeAssembler) -> JitResult<()> {
        for pair in CALLEE_SAVED.chunks(2).rev() {
            self.meta_pop_pair(a, pair[0], pair[1])?;
        }
        for _ in 0..self.chunks() {
            a.add(rsp, STACK_CHUNK)?;
        }
        Ok(())
    }

    pub fn meta_push(&self, a: &mut CodeAssembler, reg: AsmRegister64) -> JitResult<()> {
        a.mov(qword_ptr(self.base), reg)?;
        a.lea(self.base, ptr(self.base + 8))?;
        Ok(())
    }

    pub fn meta_pop(&self, a: &mut CodeAssembler, reg: AsmRegister64) -> JitResult<()> {
        a.lea(self.base, ptr(self.base - 8))?;
        a.mov(reg, qword_ptr(self.base))?;
        Ok(())
    }

    pub fn meta_push_pair(
        &self,
        a: &mut CodeAssembler,
        first: AsmRegister64,
        second: AsmRegister64,
    ) -> JitResult<()> {
        a.mov(qword_ptr(self.base), first)?;
        a.mov(qword_ptr(self.base + 8), second)?;
        a.lea(self.base, ptr(self.base + 16))?;
        Ok(())
    }

    pub fn meta_pop_pair(
        &self,
        a: &mut CodeAssembler,
        first: AsmRegister64,
        second: AsmRegister64,
    ) -> JitResult<()> {
        a.lea(self.base, ptr(self.base - 16))?;
        a.mov(first, qword_ptr(self.base))?;
        a.mov(second, qword_ptr(self.base + 8))?;
        Ok(())
    }

    /// Push `regs` in order, two at a time where possible.
    pub fn meta_push_all(&self, a: &mut CodeAssembler, regs: &[AsmRegister64]) -> JitResult<()> {
        for i in (1..regs.len()).step_by(2) {
            self.meta_push_pair(a, regs[i - 1], regs[i])?;
        }
        if regs.len() % 2 == 1 {
            self.meta_push(a, regs[regs.len() - 1])?;
        }
        Ok(())
    }

    /// Pop into `regs`, undoing a [`Stack::meta_push_all`] of the same length.
    pub fn meta_pop_all(&self, a: &mut CodeAssembler, regs: &[AsmRegister64]) -> JitResult<()> {
        if regs.len() % 2 == 1 {
            self.meta_pop(a, regs[regs.len() - 1])?;
        }
        for i in (1..regs.len()).step_by(2).rev() {
            self.meta_pop_pair(a, regs[i - 1], regs[i])?;
        }
        Ok(())
    }
}
