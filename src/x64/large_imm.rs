// This module synthesizes arbitrary 64-bit immediates on x86-64. Add, subtract and compare take
// a sign-extended 32-bit immediate directly; anything wider is first moved into the fixed
// scratch register with a 64-bit mov and then applied register to register. Moves need no
// scratch since x86-64 has a full 64-bit immediate move. The destination may never be the
// scratch register; that is checked while generating.

//! Large-immediate synthesis for x86-64.

use iced_x86::code_asm::{AsmRegister64, CodeAssembler};

use crate::core::error::JitResult;

/// Immediate synthesis with one reserved scratch register.
#[derive(Debug, Clone, Copy)]
pub struct LargeImm {
    tmp: AsmRegister64,
}

impl LargeImm {
    pub fn new(tmp: AsmRegister64) -> Self {
        Self { tmp }
    }

    pub fn tmp(&self) -> AsmRegister64 {
        self.tmp
    }

    fn check(&self, dst: AsmRegister64) {
        assert_ne!(dst, self.tmp, "destination aliases the immediate scratch register");
    }

    /// `dst = imm`
    pub fn meta_mov_imm(
        &self,
        a: &mut CodeAssembler,
        dst: AsmRegister64,
        imm: i64,
    ) -> JitResult<()> {
        self.check(dst);
        a.mov(dst, imm)?;
        Ok(())
    }

    /// `dst += imm`
    pub fn meta_add_imm(
        &self,
        a: &mut CodeAssembler,
        dst: AsmRegister64,
        imm: i64,
    ) -> JitResult<()> {
        self.check(dst);
        if imm == 0 {
            return Ok(());
        }
        match i32::try_from(imm) {
            Ok(imm32) => a.add(dst, imm32)?,
            Err(_) => {
                a.mov(self.tmp, imm)?;
                a.add(dst, self.tmp)?;
            }
        }
        Ok(())
    }

    /// `dst -= imm`
    pub fn meta_sub_imm(
        &self,
        a: &mut CodeAssembler,
        dst: AsmRegister64,
        imm: i64,
    ) -> JitResult<()> {
        self.check(dst);
        if imm == 0 {
            return Ok(());
        }
        match i32::try_from(imm) {
            Ok(imm32) => a.sub(dst, imm32)?,
            Err(_) => {
                a.mov(self.tmp, imm)?;
                a.sub(dst, self.tmp)?;
            }
        }
        Ok(())
    }

    /// `dst += imm`, adding the magnitude for positive and subtracting it for negative values.
    pub fn meta_sadd_imm(
        &self,
        a: &mut CodeAssembler,
        dst: AsmRegister64,
        imm: i64,
    ) -> JitResult<()> {
        if imm >= 0 {
            self.meta_add_imm(a, dst, imm)
        } else {
            self.meta_sub_imm(a, dst, imm.wrapping_neg())
        }
    }

    /// Set flags from `reg - imm`.
    pub fn meta_cmp(&self, a: &mut CodeAssembler, reg: AsmRegister64, imm: i64) -> JitResult<()> {
        self.check(reg);
        match i32::try_from(imm) {
            Ok(imm32) => a.cmp(reg, imm32)?,
            Err(_) => {
                a.mov(self.tmp, imm)?;
                a.cmp(reg, self.tmp)?;
            }
        }
        Ok(())
    }
}
