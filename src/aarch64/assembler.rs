// This module provides the A64 assembler the generator drives on AArch64. Instructions are
// validated, encoded and appended to the code buffer one word at a time. The mnemonic surface
// covers what hand-written kernels need: register moves, arithmetic with plain and synthesized
// immediates, wide moves, compares, general and SIMD loads and stores (single and pair, all
// addressing modes), the trn permutes, branches and raw words. Forward branches record
// a fixup against a label; ready() patches every fixup once all labels are bound.

//! A64 assembler feeding a code buffer.

use crate::core::code_buffer::CodeBuffer;
use crate::core::error::{JitError, JitResult};
use crate::core::generator::Emitter;

use super::encoder::{self, Permute};
use super::registers::{AddrMode, Arrangement, Cond, Mem, SimdScalar, VReg, XReg};

/// A position in the code, bound at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

impl Label {
    pub const fn id(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FixupKind {
    /// `b`: ±128MB
    Branch26,
    /// `b.cond`, `cbz`, `cbnz`: ±1MB
    Branch19,
}

#[derive(Debug, Clone, Copy)]
struct Fixup {
    offset: usize,
    label: Label,
    kind: FixupKind,
}

fn invalid(msg: String) -> JitError {
    JitError::InvalidOperand(msg)
}

pub struct Assembler {
    buffer: CodeBuffer,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
}

impl Assembler {
    /// Byte offset of the next instruction.
    pub fn position(&self) -> usize {
        self.buffer.len()
    }

    /// Append a raw instruction word.
    pub fn dw(&mut self, word: u32) -> JitResult<()> {
        self.buffer.push_u32(word)
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() as u32 - 1)
    }

    pub fn bind(&mut self, label: Label) -> JitResult<()> {
        let position = self.position();
        match self.labels.get_mut(label.0 as usize) {
            Some(slot @ None) => {
                *slot = Some(position);
                Ok(())
            }
            Some(Some(_)) => Err(invalid(format!("label {} bound twice", label.0))),
            None => Err(JitError::UnboundLabel { id: label.0 }),
        }
    }

    fn emit_fixup(&mut self, word: u32, label: Label, kind: FixupKind) -> JitResult<()> {
        self.fixups.push(Fixup {
            offset: self.position(),
            label,
            kind,
        });
        self.dw(word)
    }

    fn resolve_fixups(&mut self) -> JitResult<()> {
        for fixup in std::mem::take(&mut self.fixups) {
            let target = self
                .labels
                .get(fixup.label.0 as usize)
                .copied()
                .flatten()
                .ok_or(JitError::UnboundLabel { id: fixup.label.0 })?;
            let delta = (target as i64 - fixup.offset as i64) / 4;
            let word = self.buffer.read_u32(fixup.offset).ok_or_else(|| {
                invalid(format!("fixup at {} outside the buffer", fixup.offset))
            })?;

            let patched = match fixup.kind {
                FixupKind::Branch26 => {
                    if !(-(1 << 25)..(1 << 25)).contains(&delta) {
                        return Err(invalid(format!("branch of {} words out of range", delta)));
                    }
                    word | (delta as u32 & 0x03ff_ffff)
                }
                FixupKind::Branch19 => {
                    if !(-(1 << 18)..(1 << 18)).contains(&delta) {
                        return Err(invalid(format!(
                            "conditional branch of {} words out of range",
                            delta
                        )));
                    }
                    word | (delta as u32 & 0x7ffff) << 5
                }
            };
            log::trace!(
                "fixup at {:#x} -> label {} ({} words)",
                fixup.offset,
                fixup.label.0,
                delta
            );
            self.buffer.patch_u32(fixup.offset, patched)?;
        }
        Ok(())
    }

    // =========================================================================
    // Moves and arithmetic
    // =========================================================================

    /// `mov dst, src`; either side may be SP.
    pub fn mov(&mut self, dst: XReg, src: XReg) -> JitResult<()> {
        if dst.is_sp() || src.is_sp() {
            self.dw(encoder::add_imm(dst, src, 0, false))
        } else {
            self.dw(encoder::orr_reg(dst, super::registers::XZR, src))
        }
    }

    pub fn movz(&mut self, dst: XReg, imm16: u16, shift: u32) -> JitResult<()> {
        self.dw(encoder::movz(dst, imm16, wide_shift(shift)?))
    }

    pub fn movk(&mut self, dst: XReg, imm16: u16, shift: u32) -> JitResult<()> {
        self.dw(encoder::movk(dst, imm16, wide_shift(shift)?))
    }

    pub fn movn(&mut self, dst: XReg, imm16: u16, shift: u32) -> JitResult<()> {
        self.dw(encoder::movn(dst, imm16, wide_shift(shift)?))
    }

    /// Load any 64-bit constant with `movz`/`movn` followed by `movk`s.
    pub fn mov_imm(&mut self, dst: XReg, value: u64) -> JitResult<()> {
        let lanes = [0u32, 1, 2, 3].map(|hw| (hw, (value >> (16 * hw)) as u16));
        let ones = lanes.iter().filter(|(_, lane)| *lane == 0xffff).count();
        let zeros = lanes.iter().filter(|(_, lane)| *lane == 0).count();

        if ones > zeros {
            let mut first = true;
            for (hw, lane) in lanes.iter().copied().filter(|(_, lane)| *lane != 0xffff) {
                if first {
                    self.dw(encoder::movn(dst, !lane, hw))?;
                    first = false;
                } else {
                    self.dw(encoder::movk(dst, lane, hw))?;
                }
            }
            if first {
                self.dw(encoder::movn(dst, 0, 0))?;
            }
        } else {
            let mut first = true;
            for (hw, lane) in lanes.iter().copied().filter(|(_, lane)| *lane != 0) {
                if first {
                    self.dw(encoder::movz(dst, lane, hw))?;
                    first = false;
                } else {
                    self.dw(encoder::movk(dst, lane, hw))?;
                }
            }
            if first {
                self.dw(encoder::movz(dst, 0, 0))?;
            }
        }
        Ok(())
    }

    /// `add dst, src, #imm` for a 12-bit immediate, optionally shifted left by 12.
    pub fn addi(&mut self, dst: XReg, src: XReg, imm: u32) -> JitResult<()> {
        let (imm12, shift) = arith_imm(imm)?;
        self.dw(encoder::add_imm(dst, src, imm12, shift))
    }

    /// `sub dst, src, #imm` for a 12-bit immediate, optionally shifted left by 12.
    pub fn subi(&mut self, dst: XReg, src: XReg, imm: u32) -> JitResult<()> {
        let (imm12, shift) = arith_imm(imm)?;
        self.dw(encoder::sub_imm(dst, src, imm12, shift))
    }

    pub fn add(&mut self, dst: XReg, n: XReg, m: XReg) -> JitResult<()> {
        no_sp(m, "add")?;
        if dst.is_sp() || n.is_sp() {
            self.dw(encoder::add_ext(dst, n, m))
        } else {
            self.dw(encoder::add_reg(dst, n, m))
        }
    }

    pub fn sub(&mut self, dst: XReg, n: XReg, m: XReg) -> JitResult<()> {
        no_sp(m, "sub")?;
        if dst.is_sp() || n.is_sp() {
            self.dw(encoder::sub_ext(dst, n, m))
        } else {
            self.dw(encoder::sub_reg(dst, n, m))
        }
    }

    pub fn mul(&mut self, dst: XReg, n: XReg, m: XReg) -> JitResult<()> {
        self.dw(encoder::mul(dst, n, m))
    }

    pub fn orr(&mut self, dst: XReg, n: XReg, m: XReg) -> JitResult<()> {
        self.dw(encoder::orr_reg(dst, n, m))
    }

    /// `dst = src + imm` for any immediate, using `tmp` when one instruction is not enough.
    pub fn add_imm(&mut self, dst: XReg, src: XReg, imm: i64, tmp: XReg) -> JitResult<()> {
        if imm >= 0 {
            self.add_sub_magnitude(dst, src, imm as u64, false, tmp)
        } else {
            self.add_sub_magnitude(dst, src, imm.unsigned_abs(), true, tmp)
        }
    }

    /// `dst = src - imm` for any immediate, using `tmp` when one instruction is not enough.
    pub fn sub_imm(&mut self, dst: XReg, src: XReg, imm: i64, tmp: XReg) -> JitResult<()> {
        if imm >= 0 {
            self.add_sub_magnitude(dst, src, imm as u64, true, tmp)
        } else {
            self.add_sub_magnitude(dst, src, imm.unsigned_abs(), false, tmp)
        }
    }

    fn add_sub_magnitude(
        &mut self,
        dst: XReg,
        src: XReg,
        magnitude: u64,
        subtract: bool,
        tmp: XReg,
    ) -> JitResult<()> {
        if let Some((imm12, shift)) = split_arith_imm(magnitude) {
            let word = if subtract {
                encoder::sub_imm(dst, src, imm12, shift)
            } else {
                encoder::add_imm(dst, src, imm12, shift)
            };
            return self.dw(word);
        }

        assert_ne!(tmp, src, "immediate scratch register aliases the source");
        self.mov_imm(tmp, magnitude)?;
        if subtract {
            self.sub(dst, src, tmp)
        } else {
            self.add(dst, src, tmp)
        }
    }

    pub fn cmp(&mut self, n: XReg, m: XReg) -> JitResult<()> {
        self.dw(encoder::cmp_reg(n, m))
    }

    /// `cmp n, #imm`, or `cmn` for negative immediates. `|imm|` must be below 4096.
    pub fn cmpi(&mut self, n: XReg, imm: i32) -> JitResult<()> {
        let magnitude = imm.unsigned_abs();
        if magnitude >= 4096 {
            return Err(invalid(format!("compare immediate {} out of range", imm)));
        }
        if imm >= 0 {
            self.dw(encoder::cmp_imm(n, magnitude))
        } else {
            self.dw(encoder::cmn_imm(n, magnitude))
        }
    }

    // =========================================================================
    // Loads and stores
    // =========================================================================

    pub fn ldr(&mut self, rt: XReg, mem: Mem) -> JitResult<()> {
        self.ldst(true, rt, mem)
    }

    pub fn str(&mut self, rt: XReg, mem: Mem) -> JitResult<()> {
        self.ldst(false, rt, mem)
    }

    fn ldst(&mut self, load: bool, rt: XReg, mem: Mem) -> JitResult<()> {
        let word = match mem.mode {
            AddrMode::Offset => match scaled_offset(mem.offset, 8) {
                Some(imm12) => encoder::ldst_unsigned(load, rt, mem.base, imm12),
                None => encoder::ldst_imm9(
                    load,
                    rt,
                    mem.base,
                    imm9(mem.offset)?,
                    encoder::IMM9_UNSCALED,
                ),
            },
            AddrMode::PreIndex => {
                encoder::ldst_imm9(load, rt, mem.base, imm9(mem.offset)?, encoder::IMM9_PRE)
            }
            AddrMode::PostIndex => {
                encoder::ldst_imm9(load, rt, mem.base, imm9(mem.offset)?, encoder::IMM9_POST)
            }
        };
        self.dw(word)
    }

    pub fn ldp(&mut self, rt: XReg, rt2: XReg, mem: Mem) -> JitResult<()> {
        let imm7 = imm7(mem.offset, 8)?;
        self.dw(encoder::ldstp(true, rt, rt2, mem.base, imm7, pair_mode(mem.mode)))
    }

    pub fn stp(&mut self, rt: XReg, rt2: XReg, mem: Mem) -> JitResult<()> {
        let imm7 = imm7(mem.offset, 8)?;
        self.dw(encoder::ldstp(false, rt, rt2, mem.base, imm7, pair_mode(mem.mode)))
    }

    /// Load a scalar SIMD register, e.g. `ldr q0, [x0, #16]`.
    pub fn ldr_v(&mut self, rt: SimdScalar, mem: Mem) -> JitResult<()> {
        self.simd_ldst(true, rt, mem)
    }

    pub fn str_v(&mut self, rt: SimdScalar, mem: Mem) -> JitResult<()> {
        self.simd_ldst(false, rt, mem)
    }

    fn simd_ldst(&mut self, load: bool, rt: SimdScalar, mem: Mem) -> JitResult<()> {
        let width = rt.width;
        let word = match mem.mode {
            AddrMode::Offset => match scaled_offset(mem.offset, width.bytes()) {
                Some(imm12) => encoder::simd_ldst_unsigned(load, width, rt.reg, mem.base, imm12),
                None => encoder::simd_ldst_imm9(
                    load,
                    width,
                    rt.reg,
                    mem.base,
                    imm9(mem.offset)?,
                    encoder::IMM9_UNSCALED,
                ),
            },
            AddrMode::PreIndex => encoder::simd_ldst_imm9(
                load,
                width,
                rt.reg,
                mem.base,
                imm9(mem.offset)?,
                encoder::IMM9_PRE,
            ),
            AddrMode::PostIndex => encoder::simd_ldst_imm9(
                load,
                width,
                rt.reg,
                mem.base,
                imm9(mem.offset)?,
                encoder::IMM9_POST,
            ),
        };
        self.dw(word)
    }

    pub fn ldp_v(&mut self, rt: SimdScalar, rt2: SimdScalar, mem: Mem) -> JitResult<()> {
        self.simd_ldstp(true, rt, rt2, mem)
    }

    pub fn stp_v(&mut self, rt: SimdScalar, rt2: SimdScalar, mem: Mem) -> JitResult<()> {
        self.simd_ldstp(false, rt, rt2, mem)
    }

    fn simd_ldstp(
        &mut self,
        load: bool,
        rt: SimdScalar,
        rt2: SimdScalar,
        mem: Mem,
    ) -> JitResult<()> {
        if rt.width != rt2.width {
            return Err(invalid("pair of mixed SIMD widths".into()));
        }
        let imm7 = imm7(mem.offset, rt.width.bytes())?;
        let word = encoder::simd_ldstp(
            load,
            rt.width,
            rt.reg,
            rt2.reg,
            mem.base,
            imm7,
            pair_mode(mem.mode),
        )
        .ok_or_else(|| invalid(format!("no pair form for {:?} registers", rt.width)))?;
        self.dw(word)
    }

    // =========================================================================
    // SIMD permutes
    // =========================================================================

    pub fn trn1(&mut self, dst: VReg, n: VReg, m: VReg, arr: Arrangement) -> JitResult<()> {
        self.permute(Permute::Trn1, dst, n, m, arr)
    }

    pub fn trn2(&mut self, dst: VReg, n: VReg, m: VReg, arr: Arrangement) -> JitResult<()> {
        self.permute(Permute::Trn2, dst, n, m, arr)
    }

    fn permute(
        &mut self,
        op: Permute,
        dst: VReg,
        n: VReg,
        m: VReg,
        arr: Arrangement,
    ) -> JitResult<()> {
        if arr == Arrangement::D1 {
            return Err(invalid(format!("{:?} has no 1d form", op)));
        }
        self.dw(encoder::permute(op, dst, n, m, arr))
    }

    /// `mov dst.16b, src.16b`
    pub fn mov_v(&mut self, dst: VReg, src: VReg) -> JitResult<()> {
        self.dw(encoder::orr_vec(dst, src, src))
    }

    // =========================================================================
    // Control flow
    // =========================================================================

    pub fn b(&mut self, label: Label) -> JitResult<()> {
        self.emit_fixup(encoder::b(0), label, FixupKind::Branch26)
    }

    pub fn b_cond(&mut self, cond: Cond, label: Label) -> JitResult<()> {
        self.emit_fixup(encoder::b_cond(cond, 0), label, FixupKind::Branch19)
    }

    pub fn cbz(&mut self, rt: XReg, label: Label) -> JitResult<()> {
        self.emit_fixup(encoder::cbz(rt, 0), label, FixupKind::Branch19)
    }

    pub fn cbnz(&mut self, rt: XReg, label: Label) -> JitResult<()> {
        self.emit_fixup(encoder::cbnz(rt, 0), label, FixupKind::Branch19)
    }

    pub fn ret(&mut self) -> JitResult<()> {
        self.dw(encoder::ret(super::registers::X30))
    }

    pub fn nop(&mut self) -> JitResult<()> {
        self.dw(encoder::NOP)
    }
}

impl Emitter for Assembler {
    fn with_buffer(buffer: CodeBuffer) -> JitResult<Self> {
        Ok(Self {
            buffer,
            labels: Vec::new(),
            fixups: Vec::new(),
        })
    }

    fn ready(&mut self) -> JitResult<()> {
        self.resolve_fixups()
    }

    fn buffer(&self) -> &CodeBuffer {
        &self.buffer
    }

    fn into_buffer(self) -> CodeBuffer {
        self.buffer
    }
}

fn wide_shift(shift: u32) -> JitResult<u32> {
    match shift {
        0 | 16 | 32 | 48 => Ok(shift / 16),
        _ => Err(invalid(format!("wide move shift {} not a multiple of 16", shift))),
    }
}

/// Split an add/sub immediate into `imm12` and the `lsl #12` flag.
fn split_arith_imm(imm: u64) -> Option<(u32, bool)> {
    if imm < 0x1000 {
        Some((imm as u32, false))
    } else if imm & 0xfff == 0 && imm < 0x100_0000 {
        Some(((imm >> 12) as u32, true))
    } else {
        None
    }
}

fn arith_imm(imm: u32) -> JitResult<(u32, bool)> {
    split_arith_imm(imm as u64)
        .ok_or_else(|| invalid(format!("arithmetic immediate {:#x} not encodable", imm)))
}

fn no_sp(reg: XReg, op: &str) -> JitResult<()> {
    if reg.is_sp() {
        Err(invalid(format!("{} cannot take sp as its last operand", op)))
    } else {
        Ok(())
    }
}

fn scaled_offset(offset: i32, scale: usize) -> Option<u32> {
    let scale = scale as i32;
    if offset >= 0 && offset % scale == 0 && offset / scale < 0x1000 {
        Some((offset / scale) as u32)
    } else {
        None
    }
}

fn imm9(offset: i32) -> JitResult<i32> {
    if (-256..256).contains(&offset) {
        Ok(offset)
    } else {
        Err(invalid(format!("offset {} outside the 9-bit range", offset)))
    }
}

fn imm7(offset: i32, scale: usize) -> JitResult<i32> {
    let scale = scale as i32;
    if offset % scale == 0 && (-64..64).contains(&(offset / scale)) {
        Ok(offset / scale)
    } else {
        Err(invalid(format!(
            "pair offset {} not encodable for {}-byte registers",
            offset, scale
        )))
    }
}

fn pair_mode(mode: AddrMode) -> u32 {
    match mode {
        AddrMode::Offset => encoder::PAIR_OFFSET,
        AddrMode::PreIndex => encoder::PAIR_PRE,
        AddrMode::PostIndex => encoder::PAIR_POST,
    }
}
