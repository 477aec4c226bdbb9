// This module transposes N x N blocks held one row per vector register with the A64 trn1/trn2
// pair. A 2x2 step at element size E swaps the off-diagonal lanes of two rows; an N x N block is
// transposed by running 2x2 steps over row pairs at E, then over pairs of the resulting 2x2
// blocks seen as elements of size 2E, and so on until the element covers a whole half row.
// The keep_first and keep_second steps write only one output back over an input, which lets
// the larger networks thread two temporaries through every level instead of copying rows.

//! SIMD register transposes for AArch64.

use crate::core::error::JitResult;
use crate::vreg_view::VregView;

use super::assembler::Assembler;
use super::registers::{Arrangement, VReg};

/// Transpose networks over vector registers.
#[derive(Debug, Clone, Copy, Default)]
pub struct VregTranspose;

/// Lane arrangement a view's rows are permuted at.
pub fn arrangement(v: VregView) -> Arrangement {
    match (v.elem_size(), v.num_elems()) {
        (1, 16) => Arrangement::B16,
        (1, _) => Arrangement::B8,
        (2, 8) => Arrangement::H8,
        (2, _) => Arrangement::H4,
        (4, 4) => Arrangement::S4,
        (4, _) => Arrangement::S2,
        (8, 2) => Arrangement::D2,
        _ => Arrangement::D1,
    }
}

fn assert_distinct(regs: &[VReg]) {
    for (i, r) in regs.iter().enumerate() {
        assert!(
            !regs[i + 1..].contains(r),
            "transpose registers must be distinct"
        );
    }
}

fn assert_rows(v: VregView, rows: usize) {
    assert_eq!(v.num_elems(), rows, "row count must match the lane count");
}

impl VregTranspose {
    pub fn new() -> Self {
        Self
    }

    /// Transpose the 2x2 block in `r0`, `r1`, leaving the first row in `r0` and the second
    /// in `t`.
    pub fn trn2s_keep_first(
        &self,
        a: &mut Assembler,
        v: VregView,
        r0: VReg,
        r1: VReg,
        t: VReg,
    ) -> JitResult<()> {
        let arr = arrangement(v);
        a.trn2(t, r0, r1, arr)?;
        a.trn1(r0, r0, r1, arr)
    }

    /// Transpose the 2x2 block in `r0`, `r1`, leaving the first row in `t` and the second
    /// in `r1`.
    pub fn trn2s_keep_second(
        &self,
        a: &mut Assembler,
        v: VregView,
        r0: VReg,
        r1: VReg,
        t: VReg,
    ) -> JitResult<()> {
        let arr = arrangement(v);
        a.trn1(t, r0, r1, arr)?;
        a.trn2(r1, r0, r1, arr)
    }

    pub fn trn2s_inplace(
        &self,
        a: &mut Assembler,
        v: VregView,
        r0: VReg,
        r1: VReg,
        t: VReg,
    ) -> JitResult<()> {
        let arr = arrangement(v);
        a.mov_v(t, r0)?;
        a.trn1(r0, t, r1, arr)?;
        a.trn2(r1, t, r1, arr)
    }

    pub fn trn2s_onto(
        &self,
        a: &mut Assembler,
        v: VregView,
        s0: VReg,
        s1: VReg,
        d0: VReg,
        d1: VReg,
    ) -> JitResult<()> {
        let arr = arrangement(v);
        a.trn1(d0, s0, s1, arr)?;
        a.trn2(d1, s0, s1, arr)
    }

    pub fn trn4s_inplace(
        &self,
        a: &mut Assembler,
        v: VregView,
        r: [VReg; 4],
        t: [VReg; 2],
    ) -> JitResult<()> {
        let v2 = v.doubled();
        self.trn2s_keep_first(a, v, r[0], r[1], t[0])?;
        self.trn2s_keep_second(a, v, r[2], r[3], t[1])?;
        self.trn2s_keep_first(a, v2, r[0], t[1], r[2])?;
        self.trn2s_keep_second(a, v2, t[0], r[3], r[1])
    }

    pub fn trn4s_onto(
        &self,
        a: &mut Assembler,
        v: VregView,
        s: [VReg; 4],
        d: [VReg; 4],
    ) -> JitResult<()> {
        let v2 = v.doubled();
        self.trn2s_keep_first(a, v, s[0], s[1], d[1])?;
        self.trn2s_keep_second(a, v, s[2], s[3], d[2])?;
        self.trn2s_keep_first(a, v2, d[1], s[3], d[3])?;
        self.trn2s_keep_second(a, v2, s[0], d[2], d[0])
    }

    pub fn trn8s_inplace(
        &self,
        a: &mut Assembler,
        v: VregView,
        r: [VReg; 8],
        t: [VReg; 2],
    ) -> JitResult<()> {
        let v2 = v.doubled();
        let v4 = v2.doubled();
        self.trn4s_inplace(a, v, [r[4], r[5], r[6], r[7]], t)?;

        self.trn2s_keep_first(a, v, r[0], r[1], t[0])?;
        self.trn2s_keep_second(a, v, r[2], r[3], t[1])?;
        self.trn2s_keep_second(a, v2, r[0], t[1], r[1])?;
        self.trn2s_keep_second(a, v4, r[1], r[4], r[0])?;
        self.trn2s_keep_second(a, v4, t[1], r[6], r[2])?;
        self.trn2s_keep_first(a, v2, t[0], r[3], t[1])?;
        self.trn2s_keep_second(a, v4, t[0], r[5], r[1])?;
        self.trn2s_keep_second(a, v4, t[1], r[7], r[3])
    }

    pub fn trn8s_onto(
        &self,
        a: &mut Assembler,
        v: VregView,
        s: [VReg; 8],
        d: [VReg; 8],
    ) -> JitResult<()> {
        let v4 = v.doubled().doubled();
        self.trn4s_inplace(a, v, [s[0], s[1], s[2], s[3]], [d[0], d[2]])?;
        self.trn4s_onto(a, v, [s[4], s[5], s[6], s[7]], [d[4], d[5], d[6], d[7]])?;
        for i in 0..4 {
            self.trn2s_keep_second(a, v4, s[i], d[i + 4], d[i])?;
        }
        Ok(())
    }

    pub fn trn16s_inplace(
        &self,
        a: &mut Assembler,
        v: VregView,
        r: [VReg; 16],
        t: [VReg; 2],
    ) -> JitResult<()> {
        let v4 = v.doubled().doubled();
        for g in 0..4 {
            let b = 4 * g;
            self.trn4s_inplace(a, v, [r[b], r[b + 1], r[b + 2], r[b + 3]], t)?;
        }
        for c in 0..4 {
            self.trn4s_inplace(a, v4, [r[c], r[c + 4], r[c + 8], r[c + 12]], t)?;
        }
        Ok(())
    }

    pub fn trn16s_onto(
        &self,
        a: &mut Assembler,
        v: VregView,
        s: [VReg; 16],
        d: [VReg; 16],
    ) -> JitResult<()> {
        let v4 = v.doubled().doubled();
        let t = [d[1], d[2]];
        for g in 0..4 {
            let b = 4 * g;
            self.trn4s_inplace(a, v, [s[b], s[b + 1], s[b + 2], s[b + 3]], t)?;
        }
        for c in 0..4 {
            self.trn4s_onto(
                a,
                v4,
                [s[c], s[c + 4], s[c + 8], s[c + 12]],
                [d[c], d[c + 4], d[c + 8], d[c + 12]],
            )?;
        }
        Ok(())
    }

    /// Transpose `rows` in place. Two rows clobber `tmp[0]` only, larger blocks both.
    pub fn transpose_inplace(
        &self,
        a: &mut Assembler,
        v: VregView,
        rows: &[VReg],
        tmp: [VReg; 2],
    ) -> JitResult<()> {
        assert_rows(v, rows.len());
        let mut all = rows.to_vec();
        all.extend_from_slice(&tmp);
        assert_distinct(&all);

        match rows.len() {
            2 => self.trn2s_inplace(a, v, rows[0], rows[1], tmp[0]),
            4 => self.trn4s_inplace(a, v, [rows[0], rows[1], rows[2], rows[3]], tmp),
            8 => self.trn8s_inplace(a, v, rows_array(rows), tmp),
            16 => self.trn16s_inplace(a, v, rows_array(rows), tmp),
            n => panic!("no transpose network for {} rows", n),
        }
    }

    /// Transpose `src` into `dst`. The sources are clobbered.
    pub fn transpose_onto(
        &self,
        a: &mut Assembler,
        v: VregView,
        src: &[VReg],
        dst: &[VReg],
    ) -> JitResult<()> {
        assert_rows(v, src.len());
        assert_eq!(src.len(), dst.len(), "source and destination counts differ");
        let mut all = src.to_vec();
        all.extend_from_slice(dst);
        assert_distinct(&all);

        match src.len() {
            2 => self.trn2s_onto(a, v, src[0], src[1], dst[0], dst[1]),
            4 => self.trn4s_onto(a, v, rows_array(src), rows_array(dst)),
            8 => self.trn8s_onto(a, v, rows_array(src), rows_array(dst)),
            16 => self.trn16s_onto(a, v, rows_array(src), rows_array(dst)),
            n => panic!("no transpose network for {} rows", n),
        }
    }
}

fn rows_array<const N: usize>(rows: &[VReg]) -> [VReg; N] {
    std::array::from_fn(|i| rows[i])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::aarch64::encoder::{self, Permute};
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

    /// Simulates trn1/trn2/mov over 16-byte registers so networks can be checked off-target.
    fn simulate(words: &[u32], regs: &mut [[u8; 16]; 32]) {
        for &w in words {
            let rd = (w & 31) as usize;
            let rn = ((w >> 5) & 31) as usize;
            let rm = ((w >> 16) & 31) as usize;
            if w & 0xFFE0_FC00 == 0x4EA0_1C00 {
                regs[rd] = regs[rn];
                continue;
            }
            let q = (w >> 30) & 1;
            let elem = 1usize << ((w >> 22) & 3);
            let op = (w >> 12) & 7;
            let bytes = if q == 1 { 16 } else { 8 };
            let lanes = bytes / elem;
            let (n, m) = (regs[rn], regs[rm]);
            let mut out = [0u8; 16];
            for lane in 0..lanes {
                let pair = lane & !1;
                let (from, idx) = match (op, lane & 1) {
                    (0b010, 0) => (&n, pair),
                    (0b010, _) => (&m, pair),
                    (0b110, 0) => (&n, pair + 1),
                    (_, _) => (&m, pair + 1),
                };
                out[lane * elem..(lane + 1) * elem]
                    .copy_from_slice(&from[idx * elem..(idx + 1) * elem]);
            }
            regs[rd] = out;
        }
    }

    fn iota(v: VregView, rows: &[VReg], regs: &mut [[u8; 16]; 32]) {
        let e = v.elem_size();
        for (r, reg) in rows.iter().enumerate() {
            for c in 0..v.num_elems() {
                let value = (r * v.num_elems() + c) as u8;
                regs[reg.code() as usize][c * e..(c + 1) * e].fill(value);
            }
        }
    }

    fn check_transposed(v: VregView, rows: &[VReg], regs: &[[u8; 16]; 32]) {
        let e = v.elem_size();
        let n = v.num_elems();
        for (r, reg) in rows.iter().enumerate() {
            for c in 0..n {
                let lane = &regs[reg.code() as usize][c * e..(c + 1) * e];
                assert!(
                    lane.iter().all(|b| *b == (c * n + r) as u8),
                    "element ({}, {}) of {:?} wrong: {:?}",
                    r,
                    c,
                    v,
                    lane
                );
            }
        }
    }

    fn vregs(range: std::ops::Range<u8>) -> Vec<VReg> {
        range.map(VReg::new).collect()
    }

    const CONFIGS: [(usize, usize); 9] = [
        (8, 2),
        (4, 2),
        (4, 4),
        (2, 4),
        (2, 8),
        (1, 2),
        (1, 4),
        (1, 8),
        (1, 16),
    ];

    #[test]
    fn test_inplace_networks_transpose_iota() {
        for (e, n) in CONFIGS {
            let v = VregView::new(e, n);
            let rows = vregs(0..n as u8);
            let mut a = assembler();
            VregTranspose
                .transpose_inplace(&mut a, v, &rows, [V30, V31])
                .unwrap();
            let mut regs = [[0u8; 16]; 32];
            iota(v, &rows, &mut regs);
            simulate(&words(&a), &mut regs);
            check_transposed(v, &rows, &regs);
        }
    }

    #[test]
    fn test_onto_networks_transpose_iota() {
        for (e, n) in CONFIGS {
            let v = VregView::new(e, n);
            let src = vregs(0..n as u8);
            let dst = vregs(16..16 + n as u8);
            let mut a = assembler();
            VregTranspose.transpose_onto(&mut a, v, &src, &dst).unwrap();
            let mut regs = [[0u8; 16]; 32];
            iota(v, &src, &mut regs);
            simulate(&words(&a), &mut regs);
            check_transposed(v, &dst, &regs);
        }
    }

    #[test]
    fn test_pair_steps_encode_trn() {
        let v = VregView::new(4, 4);
        let mut a = assembler();
        VregTranspose.trn2s_keep_first(&mut a, v, V0, V1, V2).unwrap();
        assert_eq!(
            words(&a),
            vec![
                encoder::permute(Permute::Trn2, V2, V0, V1, Arrangement::S4),
                encoder::permute(Permute::Trn1, V0, V0, V1, Arrangement::S4),
            ]
        );
    }

    #[test]
    fn test_arrangements() {
        assert_eq!(arrangement(VregView::new(1, 16)), Arrangement::B16);
        assert_eq!(arrangement(VregView::new(1, 4)), Arrangement::B8);
        assert_eq!(arrangement(VregView::new(2, 2)), Arrangement::H4);
        assert_eq!(arrangement(VregView::new(4, 4)), Arrangement::S4);
        assert_eq!(arrangement(VregView::new(8, 2)), Arrangement::D2);
    }

    #[test]
    #[should_panic(expected = "distinct")]
    fn test_aliasing_temporary_rejected() {
        let mut a = assembler();
        let _ = VregTranspose.transpose_inplace(&mut a, VregView::new(8, 2), &[V0, V1], [V1, V2]);
    }
}
