// This module synthesizes arbitrary 64-bit immediates on AArch64. A64 arithmetic only encodes a
// 12-bit immediate (optionally shifted by 12), so anything wider is built in the fixed scratch
// register and applied register to register. Moves of a wide constant place the lowest non-zero
// 16-bit lane with movz and fold every further lane in through the scratch register. The
// destination may never be the scratch register; that is checked while generating.

//! Large-immediate synthesis for AArch64.

use crate::core::error::JitResult;

use super::assembler::Assembler;
use super::registers::XReg;

/// Immediate synthesis with one reserved scratch register.
#[derive(Debug, Clone, Copy)]
pub struct LargeImm {
    tmp: XReg,
}

impl LargeImm {
    pub fn new(tmp: XReg) -> Self {
        assert!(!tmp.is_sp(), "immediate scratch register cannot be sp");
        Self { tmp }
    }

    pub fn tmp(&self) -> XReg {
        self.tmp
    }

    fn check(&self, dst: XReg) {
        assert_ne!(dst, self.tmp, "destination aliases the immediate scratch register");
    }

    /// `dst = imm`
    pub fn meta_mov_imm(&self, a: &mut Assembler, dst: XReg, imm: i64) -> JitResult<()> {
        self.check(dst);
        let bits = imm as u64;
        if bits & !0xfff == 0 {
            return a.movz(dst, bits as u16, 0);
        }

        let mut placed = false;
        for hw in 0..4u32 {
            let lane = (bits >> (16 * hw)) as u16;
            if lane == 0 {
                continue;
            }
            if placed {
                a.movz(self.tmp, lane, 16 * hw)?;
                a.add(dst, dst, self.tmp)?;
            } else {
                a.movz(dst, lane, 16 * hw)?;
                placed = true;
            }
        }
        Ok(())
    }

    /// `dst += imm`
    pub fn meta_add_imm(&self, a: &mut Assembler, dst: XReg, imm: i64) -> JitResult<()> {
        self.check(dst);
        if imm == 0 {
            return Ok(());
        }
        a.add_imm(dst, dst, imm, self.tmp)
    }

    /// `dst -= imm`
    pub fn meta_sub_imm(&self, a: &mut Assembler, dst: XReg, imm: i64) -> JitResult<()> {
        self.check(dst);
        if imm == 0 {
            return Ok(());
        }
        a.sub_imm(dst, dst, imm, self.tmp)
    }

    /// `dst += imm`, adding the magnitude for positive and subtracting it for negative values.
    pub fn meta_sadd_imm(&self, a: &mut Assembler, dst: XReg, imm: i64) -> JitResult<()> {
        self.check(dst);
        if imm >= 0 {
            self.meta_add_imm(a, dst, imm)
        } else {
            // add_imm takes the magnitude as u64, so i64::MIN is representable here.
            a.add_imm(dst, dst, imm, self.tmp)
        }
    }

    /// Set flags from `reg - imm`.
    pub fn meta_cmp(&self, a: &mut Assembler, reg: XReg, imm: i64) -> JitResult<()> {
        self.check(reg);
        if (-4095..=4095).contains(&imm) {
            return a.cmpi(reg, imm as i32);
        }
        a.mov_imm(self.tmp, imm as u64)?;
        a.cmp(reg, self.tmp)
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
    fn test_small_move_is_one_movz() {
        let imm = LargeImm::new(X9);
        let mut a = assembler();
        imm.meta_mov_imm(&mut a, X0, 4095).unwrap();
        imm.meta_mov_imm(&mut a, X0, 0).unwrap();
        assert_eq!(
            words(&a),
            vec![encoder::movz(X0, 4095, 0), encoder::movz(X0, 0, 0)]
        );
    }

    #[test]
    fn test_wide_move_folds_lanes_through_scratch() {
        let imm = LargeImm::new(X9);
        let mut a = assembler();
        imm.meta_mov_imm(&mut a, X0, 0x0001_0000_0000_0002).unwrap();
        assert_eq!(
            words(&a),
            vec![
                encoder::movz(X0, 2, 0),
                encoder::movz(X9, 1, 3),
                encoder::add_reg(X0, X0, X9),
            ]
        );
    }

    #[test]
    fn test_zero_add_emits_nothing() {
        let imm = LargeImm::new(X9);
        let mut a = assembler();
        imm.meta_add_imm(&mut a, X0, 0).unwrap();
        imm.meta_sub_imm(&mut a, X0, 0).unwrap();
        imm.meta_sadd_imm(&mut a, X0, 0).unwrap();
        assert_eq!(a.position(), 0);
    }

    #[test]
    fn test_signed_add_picks_direction() {
        let imm = LargeImm::new(X9);
        let mut a = assembler();
        imm.meta_sadd_imm(&mut a, X0, 17).unwrap();
        imm.meta_sadd_imm(&mut a, X0, -17).unwrap();
        assert_eq!(
            words(&a),
            vec![
                encoder::add_imm(X0, X0, 17, false),
                encoder::sub_imm(X0, X0, 17, false),
            ]
        );
    }

    #[test]
    fn test_compare_ranges() {
        let imm = LargeImm::new(X9);
        let mut a = assembler();
        imm.meta_cmp(&mut a, X0, -5).unwrap();
        imm.meta_cmp(&mut a, X0, 0x10000).unwrap();
        assert_eq!(
            words(&a),
            vec![
                encoder::cmn_imm(X0, 5),
                encoder::movz(X9, 1, 1),
                encoder::cmp_reg(X0, X9),
            ]
        );
    }

    #[test]
    #[should_panic(expected = "scratch")]
    fn test_scratch_alias_panics() {
        let imm = LargeImm::new(X9);
        let mut a = assembler();
        let _ = imm.meta_add_imm(&mut a, X9, 1);
    }
}
