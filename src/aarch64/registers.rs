// This module defines the operand types of the A64 assembler: 64-bit general registers (with
// the stack pointer kept apart from the zero register even though both occupy encoding slot
// 31), SIMD registers viewed either as vectors with a lane arrangement or as scalars of one
// width, condition codes for conditional branches, and memory operands with plain,
// pre-indexed or post-indexed addressing.

//! AArch64 register and operand definitions.

use std::fmt;

/// 64-bit general-purpose register. `XZR` and `SP` share encoding 31.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct XReg(u8);

impl XReg {
    /// `X0`..`X30` for 0..=30, `XZR` for 31.
    pub const fn new(index: u8) -> Self {
        assert!(index < 32, "general register index out of range");
        XReg(index)
    }

    pub const fn is_sp(self) -> bool {
        self.0 == 32
    }

    pub const fn is_zr(self) -> bool {
        self.0 == 31
    }

    /// 5-bit encoding field. `SP` and `XZR` both encode as 31.
    pub const fn code(self) -> u32 {
        if self.is_sp() {
            31
        } else {
            self.0 as u32
        }
    }
}

impl fmt::Display for XReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            31 => write!(f, "xzr"),
            32 => write!(f, "sp"),
            n => write!(f, "x{}", n),
        }
    }
}

macro_rules! xregs {
    ($($name:ident = $index:expr),* $(,)?) => {
        $(pub const $name: XReg = XReg($index);)*
    };
}

xregs!(
    X0 = 0, X1 = 1, X2 = 2, X3 = 3, X4 = 4, X5 = 5, X6 = 6, X7 = 7,
    X8 = 8, X9 = 9, X10 = 10, X11 = 11, X12 = 12, X13 = 13, X14 = 14, X15 = 15,
    X16 = 16, X17 = 17, X18 = 18, X19 = 19, X20 = 20, X21 = 21, X22 = 22, X23 = 23,
    X24 = 24, X25 = 25, X26 = 26, X27 = 27, X28 = 28, X29 = 29, X30 = 30,
    XZR = 31, SP = 32,
);

/// SIMD/FP register `V0`..`V31`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VReg(u8);

impl VReg {
    pub const fn new(index: u8) -> Self {
        assert!(index < 32, "vector register index out of range");
        VReg(index)
    }

    pub const fn code(self) -> u32 {
        self.0 as u32
    }

    pub const fn b(self) -> SimdScalar {
        SimdScalar::new(self, ScalarWidth::B)
    }

    pub const fn h(self) -> SimdScalar {
        SimdScalar::new(self, ScalarWidth::H)
    }

    pub const fn s(self) -> SimdScalar {
        SimdScalar::new(self, ScalarWidth::S)
    }

    pub const fn d(self) -> SimdScalar {
        SimdScalar::new(self, ScalarWidth::D)
    }

    pub const fn q(self) -> SimdScalar {
        SimdScalar::new(self, ScalarWidth::Q)
    }
}

impl fmt::Display for VReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

macro_rules! vregs {
    ($($name:ident = $index:expr),* $(,)?) => {
        $(pub const $name: VReg = VReg($index);)*
    };
}

vregs!(
    V0 = 0, V1 = 1, V2 = 2, V3 = 3, V4 = 4, V5 = 5, V6 = 6, V7 = 7,
    V8 = 8, V9 = 9, V10 = 10, V11 = 11, V12 = 12, V13 = 13, V14 = 14, V15 = 15,
    V16 = 16, V17 = 17, V18 = 18, V19 = 19, V20 = 20, V21 = 21, V22 = 22, V23 = 23,
    V24 = 24, V25 = 25, V26 = 26, V27 = 27, V28 = 28, V29 = 29, V30 = 30, V31 = 31,
);

/// Width of a scalar SIMD access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarWidth {
    B,
    H,
    S,
    D,
    Q,
}

impl ScalarWidth {
    pub const fn bytes(self) -> usize {
        match self {
            ScalarWidth::B => 1,
            ScalarWidth::H => 2,
            ScalarWidth::S => 4,
            ScalarWidth::D => 8,
            ScalarWidth::Q => 16,
        }
    }

    /// The width covering `bytes` bytes.
    pub const fn from_bytes(bytes: usize) -> Self {
        match bytes {
            1 => ScalarWidth::B,
            2 => ScalarWidth::H,
            4 => ScalarWidth::S,
            8 => ScalarWidth::D,
            16 => ScalarWidth::Q,
            _ => panic!("no scalar SIMD register of that width"),
        }
    }
}

/// A SIMD register accessed as one scalar, e.g. `q3` or `s0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimdScalar {
    pub reg: VReg,
    pub width: ScalarWidth,
}

impl SimdScalar {
    pub const fn new(reg: VReg, width: ScalarWidth) -> Self {
        Self { reg, width }
    }
}

/// Vector lane arrangement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arrangement {
    B8,
    B16,
    H4,
    H8,
    S2,
    S4,
    D1,
    D2,
}

impl Arrangement {
    pub const fn q_bit(self) -> u32 {
        match self {
            Arrangement::B8 | Arrangement::H4 | Arrangement::S2 | Arrangement::D1 => 0,
            Arrangement::B16 | Arrangement::H8 | Arrangement::S4 | Arrangement::D2 => 1,
        }
    }

    pub const fn size_bits(self) -> u32 {
        match self {
            Arrangement::B8 | Arrangement::B16 => 0b00,
            Arrangement::H4 | Arrangement::H8 => 0b01,
            Arrangement::S2 | Arrangement::S4 => 0b10,
            Arrangement::D1 | Arrangement::D2 => 0b11,
        }
    }
}

impl fmt::Display for Arrangement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Arrangement::B8 => "8b",
            Arrangement::B16 => "16b",
            Arrangement::H4 => "4h",
            Arrangement::H8 => "8h",
            Arrangement::S2 => "2s",
            Arrangement::S4 => "4s",
            Arrangement::D1 => "1d",
            Arrangement::D2 => "2d",
        };
        f.write_str(name)
    }
}

/// Condition codes for `b.cond`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Cond {
    Eq = 0b0000,
    Ne = 0b0001,
    Hs = 0b0010,
    Lo = 0b0011,
    Mi = 0b0100,
    Pl = 0b0101,
    Vs = 0b0110,
    Vc = 0b0111,
    Hi = 0b1000,
    Ls = 0b1001,
    Ge = 0b1010,
    Lt = 0b1011,
    Gt = 0b1100,
    Le = 0b1101,
    Al = 0b1110,
}

impl Cond {
    pub const fn code(self) -> u32 {
        self as u32
    }
}

/// Addressing mode of a memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrMode {
    /// `[base, #off]`
    Offset,
    /// `[base, #off]!`
    PreIndex,
    /// `[base], #off`
    PostIndex,
}

/// Memory operand `base` plus a byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mem {
    pub base: XReg,
    pub offset: i32,
    pub mode: AddrMode,
}

/// `[base]`
pub const fn ptr(base: XReg) -> Mem {
    ptr_off(base, 0)
}

/// `[base, #offset]`
pub const fn ptr_off(base: XReg, offset: i32) -> Mem {
    Mem {
        base,
        offset,
        mode: AddrMode::Offset,
    }
}

/// `[base, #offset]!`
pub const fn pre_ptr(base: XReg, offset: i32) -> Mem {
    Mem {
        base,
        offset,
        mode: AddrMode::PreIndex,
    }
}

/// `[base], #offset`
pub const fn post_ptr(base: XReg, offset: i32) -> Mem {
    Mem {
        base,
        offset,
        mode: AddrMode::PostIndex,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sp_and_zr_share_slot_31() {
        assert_eq!(SP.code(), 31);
        assert_eq!(XZR.code(), 31);
        assert_ne!(SP, XZR);
        assert!(SP.is_sp() && !SP.is_zr());
        assert!(XZR.is_zr() && !XZR.is_sp());
        assert_eq!(X30.code(), 30);
        assert_eq!(SP.to_string(), "sp");
    }

    #[test]
    fn test_sp_based_operands_keep_their_base() {
        let mem = pre_ptr(SP, -16);
        assert_eq!(mem.base.code(), 31);
        assert_eq!(mem.mode, AddrMode::PreIndex);
    }
}
