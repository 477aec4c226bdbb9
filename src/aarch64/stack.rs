// This module gives hand-written AArch64 kernels a private scratch stack addressed through a
// dedicated base register. The prologue lowers SP by the region size in 1024-byte steps, copies
// SP into the base register and spills the callee-saved SIMD registers v8-v15 as full q
// registers, so kernels may use every vector register. Pushes store through the base register
// with post-increment and pops reload with pre-decrement, so a push and the matching pop are
// one instruction each and condition flags are never touched.

//! Scratch stack frames for AArch64 kernels.

use crate::core::error::JitResult;

use super::assembler::Assembler;
use super::registers::{post_ptr, pre_ptr, VReg, XReg, SP, V10, V11, V12, V13, V14, V15, V8, V9};

/// Default size of the scratch region in bytes.
pub const DEFAULT_STACK_SIZE: u32 = 2048;

/// SP is moved by at most this much per instruction.
const STACK_CHUNK: u32 = 1024;

const SAVED_VREGS: [(VReg, VReg); 4] = [(V8, V9), (V10, V11), (V12, V13), (V14, V15)];

/// Each saved pair advances the base register by this much.
const SAVE_STRIDE: i32 = 64;

/// A scratch stack rooted at `base`.
#[derive(Debug, Clone, Copy)]
pub struct Stack {
    base: XReg,
    size: u32,
}

impl Stack {
    pub fn new(base: XReg) -> Self {
        Self::with_size(base, DEFAULT_STACK_SIZE)
    }

    /// Panics if `base` is SP, XZR, the platform register or callee-saved, or the region
    /// cannot hold the saved registers.
    pub fn with_size(base: XReg, size: u32) -> Self {
        assert!(
            !base.is_sp() && !base.is_zr() && base.code() < 18,
            "stack base must be a caller-saved register"
        );
        assert!(
            size as usize >= SAVED_VREGS.len() * SAVE_STRIDE as usize,
            "stack region too small for the callee-saved registers"
        );
        Self { base, size }
    }

    pub fn base(&self) -> XReg {
        self.base
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    fn chunks(&self) -> u32 {
        self.size.div_ceil(STACK_CHUNK)
    }

    pub fn prologue(&self, a: &mut Assembler) -> JitResult<()> {
        for _ in 0..self.chunks() {
            a.subi(SP, SP, STACK_CHUNK)?;
        }
        a.mov(self.base, SP)?;
        for (first, second) in SAVED_VREGS {
            a.stp_v(first.q(), second.q(), post_ptr(self.base, SAVE_STRIDE))?;
        }
        Ok(())
    }

    pub fn epilogue(&self, a: &mut Assembler) -> JitResult<()> {
        for (first, second) in SAVED_VREGS.iter().rev() {
            a.ldp_v(first.q(), second.q(), pre_ptr(self.base, -SAVE_STRIDE))?;
        }
        for _ in 0..self.chunks() {
            a.addi(SP, SP, STACK_CHUNK)?;
        }
        Ok(())
    }

    pub fn meta_push(&self, a: &mut Assembler, reg: XReg) -> JitResult<()> {
        a.str(reg, post_ptr(self.base, 8))
    }

    pub fn meta_pop(&self, a: &mut Assembler, reg: XReg) -> JitResult<()> {
        a.ldr(reg, pre_ptr(self.base, -8))
    }

    pub fn meta_push_pair(&self, a: &mut Assembler, first: XReg, second: XReg) -> JitResult<()> {
        a.stp(first, second, post_ptr(self.base, 16))
    }

    pub fn meta_pop_pair(&self, a: &mut Assembler, first: XReg, second: XReg) -> JitResult<()> {
        a.ldp(first, second, pre_ptr(self.base, -16))
    }

    /// Push `regs` in order, two at a time where possible.
    pub fn meta_push_all(&self, a: &mut Assembler, regs: &[XReg]) -> JitResult<()> {
        for pair in regs.chunks(2) {
            match *pair {
                [first, second] => self.meta_push_pair(a, first, second)?,
                [single] => self.meta_push(a, single)?,
                _ => unreachable!(),
            }
        }
        Ok(())
    }

    /// Pop into `regs`, undoing a [`Stack::meta_push_all`] of the same length.
    pub fn meta_pop_all(&self, a: &mut Assembler, regs: &[XReg]) -> JitResult<()> {
        for pair in regs.chunks(2).rev() {
            match *pair {
                [first, second] => self.meta_pop_pair(a, first, second)?,
                [single] => self.meta_pop(a, single)?,
                _ => unreachable!(),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::aarch64::encoder;
    use crate::aarch64::registers::*;
    use crate::core::allocator::AllocatorAdapter;
    use crate::core::code_buffer::CodeBuffer;
    use crate::core::generator::Emitter;
    use crate::core::memory_resource::HeapResource;

    fn assembler() -> Assembler {
        let adapter = AllocatorAdapter::new(Arc::new(HeapResource::new()));
        Assembler::with_buffer(CodeBuffer::new(adapter, 64).unwrap()).unwrap()
    }

    fn words(a: &Assembler) -> Vec<u32> {
        (0..a.position() / 4)
            .map(|i| a.buffer().read_u32(i * 4).unwrap())
            .collect()
    }

    #[test]
    fn test_prologue_words() {
        let stack = Stack::new(X4);
        let mut a = assembler();
        stack.prologue(&mut a).unwrap();
        let w = words(&a);
        assert_eq!(w.len(), 2 + 1 + 4);
        assert_eq!(&w[..4], &[0xD110_03FF, 0xD110_03FF, 0x9100_03E4, 0xAC82_2488]);
        assert_eq!(w[4], 0xAC82_2C8A);
    }

    #[test]
    fn test_epilogue_mirrors_prologue() {
        let stack = Stack::with_size(X4, 1500);
        let mut a = assembler();
        stack.epilogue(&mut a).unwrap();
        let w = words(&a);
        assert_eq!(w.len(), 4 + 2);
        assert_eq!(w[0], encoder::simd_ldstp(true, ScalarWidth::Q, V14, V15, X4, -4, encoder::PAIR_PRE).unwrap());
        assert_eq!(w[3], encoder::simd_ldstp(true, ScalarWidth::Q, V8, V9, X4, -4, encoder::PAIR_PRE).unwrap());
        assert_eq!(w[4], encoder::add_imm(SP, SP, 1024, false));
    }

    #[test]
    fn test_odd_push_pop_counts() {
        let stack = Stack::new(X4);
        let mut a = assembler();
        stack.meta_push_all(&mut a, &[X0, X1, X2]).unwrap();
        stack.meta_pop_all(&mut a, &[X5, X6, X7]).unwrap();
        assert_eq!(
            words(&a),
            vec![
                encoder::ldstp(false, X0, X1, X4, 2, encoder::PAIR_POST),
                encoder::ldst_imm9(false, X2, X4, 8, encoder::IMM9_POST),
                encoder::ldst_imm9(true, X7, X4, -8, encoder::IMM9_PRE),
                encoder::ldstp(true, X5, X6, X4, -2, encoder::PAIR_PRE),
            ]
        );
    }

    #[test]
    #[should_panic(expected = "caller-saved")]
    fn test_callee_saved_base_panics() {
        Stack::new(X19);
    }
}
