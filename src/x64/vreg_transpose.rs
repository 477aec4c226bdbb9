// This module transposes N x N blocks held one row per XMM register using SSE2 unpack
// instructions. Each round interleaves row i with row i + N/2 into a low and a high half at the
// row's element size; after log2(N) rounds the rows come out transposed, but spread over
// whichever physical registers the rounds happened to use. The network tracks the logical row
// held by every register and finishes with a parallel move into the requested registers, using
// the free register left over by the rounds to break cycles. SSE2 has no 2x2 transpose below
// 64-bit lanes, so the pair primitives exist for 64-bit lanes only.

//! SIMD register transposes for x86-64.

use iced_x86::code_asm::{AsmRegisterXmm, CodeAssembler};

use crate::core::error::{JitError, JitResult};
use crate::vreg_view::VregView;

/// Transpose networks over XMM registers.
#[derive(Debug, Clone, Copy, Default)]
pub struct VregTranspose;

fn unpack_low(
    a: &mut CodeAssembler,
    elem_size: usize,
    dst: AsmRegisterXmm,
    src: AsmRegisterXmm,
) -> JitResult<()> {
    match elem_size {
        1 => a.punpcklbw(dst, src)?,
        2 => a.punpcklwd(dst, src)?,
        4 => a.punpckldq(dst, src)?,
        _ => a.punpcklqdq(dst, src)?,
    }
    Ok(())
}

fn unpack_high(
    a: &mut CodeAssembler,
    elem_size: usize,
    dst: AsmRegisterXmm,
    src: AsmRegisterXmm,
) -> JitResult<()> {
    match elem_size {
        1 => a.punpckhbw(dst, src)?,
        2 => a.punpckhwd(dst, src)?,
        4 => a.punpckhdq(dst, src)?,
        _ => a.punpckhqdq(dst, src)?,
    }
    Ok(())
}

fn assert_distinct(regs: &[AsmRegisterXmm]) {
    for (i, r) in regs.iter().enumerate() {
        assert!(
            !regs[i + 1..].contains(r),
            "transpose registers must be distinct"
        );
    }
}

fn assert_square_view(v: VregView, rows: usize) {
    assert_eq!(v.bytes(), 16, "x86-64 transposes work on full 128-bit rows");
    assert_eq!(v.num_elems(), rows, "row count must match the lane count");
    assert!(rows >= 2, "transpose needs at least two rows");
}

fn assert_qword_pair(v: VregView) {
    assert_eq!(v, VregView::new(8, 2), "pair transposes need 64-bit lanes");
}

/// Run the interleave rounds on `rows`, then place logical row `i` in `targets[i]`.
fn network(
    a: &mut CodeAssembler,
    v: VregView,
    rows: &[AsmRegisterXmm],
    mut free: Vec<AsmRegisterXmm>,
    targets: &[AsmRegisterXmm],
) -> JitResult<()> {
    let n = rows.len();
    let half = n / 2;
    let mut phys = rows.to_vec();

    for _ in 0..n.trailing_zeros() {
        let mut next = phys.clone();
        for i in 0..half {
            let lo = phys[i];
            let src = phys[i + half];
            let Some(hi) = free.pop() else {
                return Err(JitError::InvalidOperand(
                    "transpose ran out of temporaries".into(),
                ));
            };
            a.movdqa(hi, lo)?;
            unpack_low(a, v.elem_size(), lo, src)?;
            unpack_high(a, v.elem_size(), hi, src)?;
            free.push(src);
            next[2 * i] = lo;
            next[2 * i + 1] = hi;
        }
        phys = next;
    }

    loop {
        let Some(pending) = (0..n).find(|&i| phys[i] != targets[i]) else {
            break;
        };
        if let Some(j) = (0..n).find(|&j| phys[j] != targets[j] && free.contains(&targets[j])) {
            a.movdqa(targets[j], phys[j])?;
            free.retain(|r| *r != targets[j]);
            free.push(phys[j]);
            phys[j] = targets[j];
            continue;
        }

        // Every unplaced row waits on an occupied register: park one occupant.
        let Some(k) = (0..n).find(|&k| phys[k] == targets[pending]) else {
            return Err(JitError::InvalidOperand(
                "transpose target not in the register set".into(),
            ));
        };
        let Some(spare) = free.pop() else {
            return Err(JitError::InvalidOperand(
                "transpose ran out of temporaries".into(),
            ));
        };
        a.movdqa(spare, phys[k])?;
        free.push(phys[k]);
        phys[k] = spare;
    }
    Ok(())
}

impl VregTranspose {
    pub fn new() -> Self {
        Self
    }

    /// Transpose `rows` in place; `tmp` is clobbered.
    pub fn transpose_inplace(
        &self,
        a: &mut CodeAssembler,
        v: VregView,
        rows: &[AsmRegisterXmm],
        tmp: AsmRegisterXmm,
    ) -> JitResult<()> {
        assert_square_view(v, rows.len());
        let mut all = rows.to_vec();
        all.push(tmp);
        assert_distinct(&all);
        network(a, v, rows, vec![tmp], rows)
    }

    /// Transpose `src` into `dst`. The sources are clobbered.
    pub fn transpose_onto(
        &self,
        a: &mut CodeAssembler,
        v: VregView,
        src: &[AsmRegisterXmm],
        dst: &[AsmRegisterXmm],
    ) -> JitResult<()> {
        assert_square_view(v, src.len());
        assert_eq!(src.len(), dst.len(), "source and destination counts differ");
        let mut all = src.to_vec();
        all.extend_from_slice(dst);
        assert_distinct(&all);
        network(a, v, src, dst.to_vec(), dst)
    }

    /// Transpose the 2x2 block in `r0`, `r1`, leaving the first row in `r0` and the second
    /// in `t`.
    pub fn trn2s_keep_first(
        &self,
        a: &mut CodeAssembler,
        v: VregView,
        r0: AsmRegisterXmm,
        r1: AsmRegisterXmm,
        t: AsmRegisterXmm,
    ) -> JitResult<()> {
        assert_qword_pair(v);
        a.movdqa(t, r0)?;
        a.punpckhqdq(t, r1)?;
        a.punpcklqdq(r0, r1)?;
        Ok(())
    }

    /// Transpose the 2x2 block in `r0`, `r1`, leaving the first row in `t` and the second
    /// in `r1`.
    pub fn trn2s_keep_second(
        &self,
        a: &mut CodeAssembler,
        v: VregView,
        r0: AsmRegisterXmm,
        r1: AsmRegisterXmm,
        t: AsmRegisterXmm,
    ) -> JitResult<()> {
        assert_qword_pair(v);
        a.movdqa(t, r0)?;
        a.punpcklqdq(t, r1)?;
        a.movhlps(r1, r0)?;
        Ok(())
    }

    pub fn trn2s_inplace(
        &self,
        a: &mut CodeAssembler,
        v: VregView,
        r0: AsmRegisterXmm,
        r1: AsmRegisterXmm,
        t: AsmRegisterXmm,
    ) -> JitResult<()> {
        self.trn2s_keep_first(a, v, r0, r1, t)?;
        a.movdqa(r1, t)?;
        Ok(())
    }

    pub fn trn2s_onto(
        &self,
        a: &mut CodeAssembler,
        v: VregView,
        s0: AsmRegisterXmm,
        s1: AsmRegisterXmm,
        d0: AsmRegisterXmm,
        d1: AsmRegisterXmm,
    ) -> JitResult<()> {
        assert_qword_pair(v);
        a.movdqa(d0, s0)?;
        a.punpcklqdq(d0, s1)?;
        a.movdqa(d1, s0)?;
        a.punpckhqdq(d1, s1)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iced_x86::code_asm::*;

    #[test]
    fn test_two_row_network_instruction_count() {
        let mut a = CodeAssembler::new(64).unwrap();
        VregTranspose
            .transpose_inplace(&mut a, VregView::new(8, 2), &[xmm0, xmm1], xmm2)
            .unwrap();
        // movdqa, unpack low, unpack high, then one move back into xmm1.
        assert_eq!(a.instructions().len(), 4);
    }

    #[test]
    #[should_panic(expected = "full 128-bit")]
    fn test_half_width_view_rejected() {
        let mut a = CodeAssembler::new(64).unwrap();
        let _ = VregTranspose.transpose_inplace(
            &mut a,
            VregView::new(4, 2),
            &[xmm0, xmm1],
            xmm2,
        );
    }

    #[test]
    #[should_panic(expected = "distinct")]
    fn test_aliasing_temporary_rejected() {
        let mut a = CodeAssembler::new(64).unwrap();
        let _ = VregTranspose.transpose_inplace(
            &mut a,
            VregView::new(8, 2),
            &[xmm0, xmm1],
            xmm1,
        );
    }
}
