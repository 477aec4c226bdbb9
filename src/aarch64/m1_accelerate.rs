// This module issues the private matrix coprocessor instructions found on Apple M1 class
// silicon. Every instruction is one raw word, 0x00201000 with a 5-bit opcode at bit 5 and a
// 5-bit operand at bit 0. For the load, store and arithmetic opcodes the operand names the
// general register holding the operand block; enable and disable use opcode 17 with an
// immediate operand and must be preceded by three nops. The encoding is the one observed on
// first generation parts and nothing here checks which core is running.

//! Matrix coprocessor opcodes for Apple silicon.

use crate::core::error::JitResult;

use super::assembler::Assembler;
use super::registers::XReg;

const BASE: u32 = 0x0020_1000;

const SET_CLR: u32 = 17;

/// Coprocessor opcodes taking a general register operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum M1Op {
    Ldx = 0,
    Ldy = 1,
    Stx = 2,
    Sty = 3,
    Ldz = 4,
    Stz = 5,
    Ldzi = 6,
    Stzi = 7,
    Fma64 = 10,
    Fms64 = 11,
    Fma32 = 12,
    Fms32 = 13,
    Mac16 = 14,
    Fma16 = 15,
    Fms16 = 16,
}

/// Raw coprocessor instruction word.
pub const fn encode(op: u32, operand: u32) -> u32 {
    BASE | (op & 0x1f) << 5 | (operand & 0x1f)
}

/// Issuer of coprocessor instructions.
#[derive(Debug, Clone, Copy, Default)]
pub struct M1Accelerate;

macro_rules! reg_ops {
    ($($name:ident => $op:ident),* $(,)?) => {
        $(
            pub fn $name(&self, a: &mut Assembler, operand: XReg) -> JitResult<()> {
                self.issue(a, M1Op::$op, operand)
            }
        )*
    };
}

impl M1Accelerate {
    pub fn new() -> Self {
        Self
    }

    /// Emit `op` with `operand` as its register operand.
    pub fn issue(&self, a: &mut Assembler, op: M1Op, operand: XReg) -> JitResult<()> {
        assert!(!operand.is_sp(), "coprocessor operand cannot be sp");
        a.dw(encode(op as u32, operand.code()))
    }

    pub fn enable(&self, a: &mut Assembler) -> JitResult<()> {
        self.set_clr(a, 0)
    }

    pub fn disable(&self, a: &mut Assembler) -> JitResult<()> {
        self.set_clr(a, 1)
    }

    fn set_clr(&self, a: &mut Assembler, operand: u32) -> JitResult<()> {
        for _ in 0..3 {
            a.nop()?;
        }
        a.dw(encode(SET_CLR, operand))
    }

    reg_ops!(
        ldx => Ldx,
        ldy => Ldy,
        stx => Stx,
        sty => Sty,
        ldz => Ldz,
        stz => Stz,
        ldzi => Ldzi,
        stzi => Stzi,
        fma64 => Fma64,
        fms64 => Fms64,
        fma32 => Fma32,
        fms32 => Fms32,
        mac16 => Mac16,
        fma16 => Fma16,
        fms16 => Fms16,
    );
}
