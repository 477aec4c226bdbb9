// This module holds the raw A64 instruction encoders used by the assembler. Each function packs
// already-validated operands into one 32-bit instruction word: arithmetic with immediates,
// shifted and extended registers, wide moves, general and SIMD loads and stores in their
// scaled, unscaled, pre-indexed, post-indexed and pair forms, the trn permutes,
// and branches with their PC-relative immediates. Range checks live in the assembler; these
// encoders only mask fields to their widths.

//! A64 instruction word encoders.

use super::registers::{Arrangement, Cond, ScalarWidth, VReg, XReg};

pub const NOP: u32 = 0xD503_201F;

/// Mode field of the 9-bit immediate load/store forms.
pub const IMM9_UNSCALED: u32 = 0b00;
pub const IMM9_POST: u32 = 0b01;
pub const IMM9_PRE: u32 = 0b11;

/// Mode field (bits 25:23) of the pair load/store forms.
pub const PAIR_POST: u32 = 0b001;
pub const PAIR_OFFSET: u32 = 0b010;
pub const PAIR_PRE: u32 = 0b011;

#[inline]
fn load_bit(load: bool) -> u32 {
    (load as u32) << 22
}

pub fn ret(rn: XReg) -> u32 {
    0xD65F_0000 | rn.code() << 5
}

/// `add rd, rn, #imm12 {, lsl #12}`; `rd`/`rn` may be SP.
pub fn add_imm(rd: XReg, rn: XReg, imm12: u32, shift12: bool) -> u32 {
    0x9100_0000 | (shift12 as u32) << 22 | (imm12 & 0xfff) << 10 | rn.code() << 5 | rd.code()
}

/// `sub rd, rn, #imm12 {, lsl #12}`; `rd`/`rn` may be SP.
pub fn sub_imm(rd: XReg, rn: XReg, imm12: u32, shift12: bool) -> u32 {
    0xD100_0000 | (shift12 as u32) << 22 | (imm12 & 0xfff) << 10 | rn.code() << 5 | rd.code()
}

/// `cmp rn, #imm12`
pub fn cmp_imm(rn: XReg, imm12: u32) -> u32 {
    0xF100_001F | (imm12 & 0xfff) << 10 | rn.code() << 5
}

/// `cmn rn, #imm12`
pub fn cmn_imm(rn: XReg, imm12: u32) -> u32 {
    0xB100_001F | (imm12 & 0xfff) << 10 | rn.code() << 5
}

pub fn add_reg(rd: XReg, rn: XReg, rm: XReg) -> u32 {
    0x8B00_0000 | rm.code() << 16 | rn.code() << 5 | rd.code()
}

pub fn sub_reg(rd: XReg, rn: XReg, rm: XReg) -> u32 {
    0xCB00_0000 | rm.code() << 16 | rn.code() << 5 | rd.code()
}

/// `add rd, rn, rm, uxtx`, the register form that accepts SP.
pub fn add_ext(rd: XReg, rn: XReg, rm: XReg) -> u32 {
    0x8B20_6000 | rm.code() << 16 | rn.code() << 5 | rd.code()
}

/// `sub rd, rn, rm, uxtx`, the register form that accepts SP.
pub fn sub_ext(rd: XReg, rn: XReg, rm: XReg) -> u32 {
    0xCB20_6000 | rm.code() << 16 | rn.code() << 5 | rd.code()
}

pub fn cmp_reg(rn: XReg, rm: XReg) -> u32 {
    0xEB00_001F | rm.code() << 16 | rn.code() << 5
}

pub fn orr_reg(rd: XReg, rn: XReg, rm: XReg) -> u32 {
    0xAA00_0000 | rm.code() << 16 | rn.code() << 5 | rd.code()
}

/// `mul rd, rn, rm` (madd with xzr)
pub fn mul(rd: XReg, rn: XReg, rm: XReg) -> u32 {
    0x9B00_7C00 | rm.code() << 16 | rn.code() << 5 | rd.code()
}

/// `movz rd, #imm16, lsl #(16 * hw)`
pub fn movz(rd: XReg, imm16: u16, hw: u32) -> u32 {
    0xD280_0000 | (hw & 3) << 21 | (imm16 as u32) << 5 | rd.code()
}

pub fn movk(rd: XReg, imm16: u16, hw: u32) -> u32 {
    0xF280_0000 | (hw & 3) << 21 | (imm16 as u32) << 5 | rd.code()
}

pub fn movn(rd: XReg, imm16: u16, hw: u32) -> u32 {
    0x9280_0000 | (hw & 3) << 21 | (imm16 as u32) << 5 | rd.code()
}

/// `ldr/str xt, [xn, #(imm12 * 8)]`
pub fn ldst_unsigned(load: bool, rt: XReg, rn: XReg, imm12: u32) -> u32 {
    0xF900_0000 | load_bit(load) | (imm12 & 0xfff) << 10 | rn.code() << 5 | rt.code()
}

/// Unscaled, pre-indexed or post-indexed `ldr/str xt` with a 9-bit signed offset.
pub fn ldst_imm9(load: bool, rt: XReg, rn: XReg, imm9: i32, mode: u32) -> u32 {
    0xF800_0000
        | load_bit(load)
        | ((imm9 as u32) & 0x1ff) << 12
        | mode << 10
        | rn.code() << 5
        | rt.code()
}

/// `ldp/stp xt, xt2` with a 7-bit signed offset in units of 8 bytes.
pub fn ldstp(load: bool, rt: XReg, rt2: XReg, rn: XReg, imm7: i32, mode: u32) -> u32 {
    0xA800_0000
        | mode << 23
        | load_bit(load)
        | ((imm7 as u32) & 0x7f) << 15
        | rt2.code() << 10
        | rn.code() << 5
        | rt.code()
}

/// `size` and `opc` fields of the SIMD&FP single-register load/store forms.
fn simd_size_opc(load: bool, width: ScalarWidth) -> (u32, u32) {
    let size = match width {
        ScalarWidth::B | ScalarWidth::Q => 0,
        ScalarWidth::H => 1,
        ScalarWidth::S => 2,
        ScalarWidth::D => 3,
    };
    let opc = match width {
        ScalarWidth::Q => 2 | load as u32,
        _ => load as u32,
    };
    (size, opc)
}

/// `ldr/str <bhsdq>t, [xn, #(imm12 * width)]`
pub fn simd_ldst_unsigned(load: bool, width: ScalarWidth, rt: VReg, rn: XReg, imm12: u32) -> u32 {
    let (size, opc) = simd_size_opc(load, width);
    size << 30 | 0x3D00_0000 | opc << 22 | (imm12 & 0xfff) << 10 | rn.code() << 5 | rt.code()
}

/// Unscaled, pre-indexed or post-indexed SIMD&FP load/store.
pub fn simd_ldst_imm9(
    load: bool,
    width: ScalarWidth,
    rt: VReg,
    rn: XReg,
    imm9: i32,
    mode: u32,
) -> u32 {
    let (size, opc) = simd_size_opc(load, width);
    size << 30
        | 0x3C00_0000
        | opc << 22
        | ((imm9 as u32) & 0x1ff) << 12
        | mode << 10
        | rn.code() << 5
        | rt.code()
}

/// `ldp/stp <sdq>t, <sdq>t2` with a 7-bit signed offset in units of the width.
///
/// Returns `None` for widths without a pair form.
pub fn simd_ldstp(
    load: bool,
    width: ScalarWidth,
    rt: VReg,
    rt2: VReg,
    rn: XReg,
    imm7: i32,
    mode: u32,
) -> Option<u32> {
    let opc = match width {
        ScalarWidth::S => 0,
        ScalarWidth::D => 1,
        ScalarWidth::Q => 2,
        ScalarWidth::B | ScalarWidth::H => return None,
    };
    Some(
        opc << 30
            | 0x2C00_0000
            | mode << 23
            | load_bit(load)
            | ((imm7 as u32) & 0x7f) << 15
            | rt2.code() << 10
            | rn.code() << 5
            | rt.code(),
    )
}

/// Permute instructions (bits 14:12 of the encoding).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permute {
    Trn1 = 0b010,
    Trn2 = 0b110,
}

pub fn permute(op: Permute, rd: VReg, rn: VReg, rm: VReg, arr: Arrangement) -> u32 {
    0x0E00_0800
        | arr.q_bit() << 30
        | arr.size_bits() << 22
        | rm.code() << 16
        | (op as u32) << 12
        | rn.code() << 5
        | rd.code()
}

/// `orr vd.16b, vn.16b, vm.16b`; `mov vd.16b, vn.16b` when `vn == vm`.
pub fn orr_vec(rd: VReg, rn: VReg, rm: VReg) -> u32 {
    0x4EA0_1C00 | rm.code() << 16 | rn.code() << 5 | rd.code()
}

/// `b` with a word offset.
pub fn b(imm26: i32) -> u32 {
    0x1400_0000 | ((imm26 as u32) & 0x03ff_ffff)
}

pub fn b_cond(cond: Cond, imm19: i32) -> u32 {
    0x5400_0000 | ((imm19 as u32) & 0x7ffff) << 5 | cond.code()
}

pub fn cbz(rt: XReg, imm19: i32) -> u32 {
    0xB400_0000 | ((imm19 as u32) & 0x7ffff) << 5 | rt.code()
}

pub fn cbnz(rt: XReg, imm19: i32) -> u32 {
    0xB500_0000 | ((imm19 as u32) & 0x7ffff) << 5 | rt.code()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aarch64::registers::*;

    #[test]
    fn test_known_words() {
        assert_eq!(ret(X30), 0xD65F_03C0);
        assert_eq!(sub_imm(SP, SP, 1024, false), 0xD110_03FF);
        assert_eq!(add_imm(X4, SP, 0, false), 0x9100_03E4);
        assert_eq!(add_imm(X0, X0, 1, true), 0x9140_0400);
        assert_eq!(orr_reg(X0, XZR, X1), 0xAA01_03E0);
        assert_eq!(movz(X0, 0x1234, 1), 0xD2A2_4680);
        assert_eq!(movk(X1, 0xFFFF, 3), 0xF2FF_FFE1);
        assert_eq!(movn(X2, 0, 0), 0x9280_0002);
        assert_eq!(cmp_imm(X3, 255), 0xF103_FC7F);
        assert_eq!(cmp_reg(X0, X1), 0xEB01_001F);
        assert_eq!(mul(X0, X1, X2), 0x9B02_7C20);
    }

    #[test]
    fn test_load_store_words() {
        // str x0, [x4], #8 / ldr x0, [x4, #-8]!
        assert_eq!(ldst_imm9(false, X0, X4, 8, IMM9_POST), 0xF800_8480);
        assert_eq!(ldst_imm9(true, X0, X4, -8, IMM9_PRE), 0xF85F_8C80);
        // stp x0, x1, [x4], #16 / ldp x0, x1, [x4, #-16]!
        assert_eq!(ldstp(false, X0, X1, X4, 2, PAIR_POST), 0xA881_0480);
        assert_eq!(ldstp(true, X0, X1, X4, -2, PAIR_PRE), 0xA9FF_0480);
        // ldr x1, [x0, #16]
        assert_eq!(ldst_unsigned(true, X1, X0, 2), 0xF940_0801);
        // stp q8, q9, [x4], #64
        assert_eq!(
            simd_ldstp(false, ScalarWidth::Q, V8, V9, X4, 4, PAIR_POST),
            Some(0xAC82_2488)
        );
        assert_eq!(
            simd_ldstp(false, ScalarWidth::H, V8, V9, X4, 4, PAIR_POST),
            None
        );
        // ldr q0, [x0, #16] / str s1, [x0, #4] / ldr b2, [x0]
        assert_eq!(simd_ldst_unsigned(true, ScalarWidth::Q, V0, X0, 1), 0x3DC0_0400);
        assert_eq!(simd_ldst_unsigned(false, ScalarWidth::S, V1, X0, 1), 0xBD00_0401);
        assert_eq!(simd_ldst_unsigned(true, ScalarWidth::B, V2, X0, 0), 0x3D40_0002);
    }

    #[test]
    fn test_permute_and_branch_words() {
        // trn1 v0.16b, v1.16b, v2.16b / trn2 v0.4s, v1.4s, v2.4s
        assert_eq!(permute(Permute::Trn1, V0, V1, V2, Arrangement::B16), 0x4E02_2820);
        assert_eq!(permute(Permute::Trn2, V0, V1, V2, Arrangement::S4), 0x4E82_6820);
        assert_eq!(orr_vec(V3, V4, V4), 0x4EA4_1C83);
        assert_eq!(b(-1), 0x17FF_FFFF);
        assert_eq!(b_cond(Cond::Ne, 2), 0x5400_0041);
        assert_eq!(cbz(X0, 1), 0xB400_0020);
    }
}
