//! Execution tests for the AArch64 meta-mnemonics.
//!
//! Kernels are generated, finalized and called; results are compared with the same
//! computation done in Rust.

#![cfg(target_arch = "aarch64")]

use kernjit::aarch64::*;
use kernjit::{CodeGenerator, UniqueFn, VregView};

type Unary = extern "C" fn(u64) -> u64;
type Buffer = extern "C" fn(*mut u8);

const IMMEDIATES: [i64; 12] = [
    0,
    1,
    4095,
    4096,
    0x1000_0000,
    -123_456_789,
    0x1_0000_0001,
    0x0001_0000_0000_0002,
    -0x7fff_ffff_ffff,
    i32::MIN as i64,
    i64::MIN,
    i64::MAX,
];

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn unary(build: impl FnOnce(&mut Assembler)) -> UniqueFn<Unary> {
    let mut gen = CodeGenerator::<Unary>::new().unwrap();
    let a: &mut Assembler = &mut gen;
    build(a);
    gen.ret().unwrap();
    unsafe { gen.get_unique().unwrap() }
}

#[test]
fn large_immediates_compute_exact_results() {
    init();
    let large = LargeImm::new(X9);
    let arg = 0x0123_4567_89ab_cdefu64;
    let mut immediates = IMMEDIATES.to_vec();
    immediates.extend((1..8).map(|i| i * 100_000_000));

    for imm in immediates {
        let mov = unary(|a| large.meta_mov_imm(a, X0, imm).unwrap());
        assert_eq!(mov.call(arg), imm as u64, "mov {:#x}", imm);

        let add = unary(|a| large.meta_add_imm(a, X0, imm).unwrap());
        assert_eq!(add.call(arg), arg.wrapping_add(imm as u64), "add {:#x}", imm);

        let sub = unary(|a| large.meta_sub_imm(a, X0, imm).unwrap());
        assert_eq!(sub.call(arg), arg.wrapping_sub(imm as u64), "sub {:#x}", imm);

        let sadd = unary(|a| large.meta_sadd_imm(a, X0, imm).unwrap());
        assert_eq!(sadd.call(arg), arg.wrapping_add(imm as u64), "sadd {:#x}", imm);
    }
}

#[test]
fn large_compare_sets_flags() {
    init();
    let large = LargeImm::new(X9);
    for imm in IMMEDIATES {
        // x0 = (x0 == imm)
        let eq = unary(|a| {
            let equal = a.new_label();
            let done = a.new_label();
            large.meta_cmp(a, X0, imm).unwrap();
            a.b_cond(Cond::Eq, equal).unwrap();
            a.movz(X0, 0, 0).unwrap();
            a.b(done).unwrap();
            a.bind(equal).unwrap();
            a.movz(X0, 1, 0).unwrap();
            a.bind(done).unwrap();
        });
        assert_eq!(eq.call(imm as u64), 1, "cmp {:#x}", imm);
        assert_eq!(eq.call((imm as u64).wrapping_add(1)), 0, "cmp {:#x}", imm);
    }
}

/// Reverse `n` u64 values in place through the scratch stack, one register at a time.
fn reverser_single(n: usize) -> UniqueFn<Buffer> {
    let mut gen = CodeGenerator::<Buffer>::new().unwrap();
    let stack = Stack::new(X4);
    stack.prologue(&mut gen).unwrap();
    for i in 0..n {
        gen.ldr(X1, ptr_off(X0, 8 * i as i32)).unwrap();
        stack.meta_push(&mut gen, X1).unwrap();
    }
    for i in 0..n {
        stack.meta_pop(&mut gen, X1).unwrap();
        gen.str(X1, ptr_off(X0, 8 * i as i32)).unwrap();
    }
    stack.epilogue(&mut gen).unwrap();
    gen.ret().unwrap();
    unsafe { gen.get_unique().unwrap() }
}

/// Reverse `n` u64 values by loading them into registers, pushing them in pairs and popping
/// them back into the registers in reverse order.
fn reverser_paired(n: usize) -> UniqueFn<Buffer> {
    let regs: Vec<XReg> = [1u8, 2, 3, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17]
        .into_iter()
        .map(XReg::new)
        .collect();
    assert!(n <= regs.len());
    let regs = &regs[..n];
    let reversed: Vec<_> = regs.iter().rev().copied().collect();

    let mut gen = CodeGenerator::<Buffer>::new().unwrap();
    let stack = Stack::new(X4);
    stack.prologue(&mut gen).unwrap();
    for (i, reg) in regs.iter().enumerate() {
        gen.ldr(*reg, ptr_off(X0, 8 * i as i32)).unwrap();
    }
    stack.meta_push_all(&mut gen, regs).unwrap();
    stack.meta_pop_all(&mut gen, &reversed).unwrap();
    for (i, reg) in regs.iter().enumerate() {
        gen.str(*reg, ptr_off(X0, 8 * i as i32)).unwrap();
    }
    stack.epilogue(&mut gen).unwrap();
    gen.ret().unwrap();
    unsafe { gen.get_unique().unwrap() }
}

#[test]
fn stack_reverses_arrays() {
    init();
    for n in [10, 11] {
        for f in [reverser_single(n), reverser_paired(n)] {
            let mut data: Vec<u64> = (0..n as u64).map(|i| i * 3 + 1).collect();
            let expected: Vec<u64> = data.iter().rev().copied().collect();
            f.call(data.as_mut_ptr().cast());
            assert_eq!(data, expected, "n = {}", n);
        }
    }
}

/// Load `n` rows of 16 bytes, transpose, store. The frame keeps v8-v15 intact for the caller.
fn transposer(v: VregView, onto: bool) -> UniqueFn<Buffer> {
    let n = v.num_elems();
    let src: Vec<VReg> = (0..n as u8).map(VReg::new).collect();
    let dst: Vec<VReg> = if onto {
        (16..16 + n as u8).map(VReg::new).collect()
    } else {
        src.clone()
    };

    let mut gen = CodeGenerator::<Buffer>::new().unwrap();
    let stack = Stack::new(X4);
    stack.prologue(&mut gen).unwrap();
    for (i, reg) in src.iter().enumerate() {
        gen.ldr_v(reg.q(), ptr_off(X0, 16 * i as i32)).unwrap();
    }
    if onto {
        VregTranspose::new()
            .transpose_onto(&mut gen, v, &src, &dst)
            .unwrap();
    } else {
        VregTranspose::new()
            .transpose_inplace(&mut gen, v, &src, [V30, V31])
            .unwrap();
    }
    for (i, reg) in dst.iter().enumerate() {
        gen.str_v(reg.q(), ptr_off(X0, 16 * i as i32)).unwrap();
    }
    stack.epilogue(&mut gen).unwrap();
    gen.ret().unwrap();
    unsafe { gen.get_unique().unwrap() }
}

fn element(rows: &[u8], v: VregView, r: usize, c: usize) -> u64 {
    let e = v.elem_size();
    let start = 16 * r + e * c;
    rows[start..start + e]
        .iter()
        .rev()
        .fold(0u64, |acc, b| acc << 8 | *b as u64)
}

fn iota_rows(v: VregView) -> Vec<u8> {
    let (e, n) = (v.elem_size(), v.num_elems());
    let mut rows = vec![0u8; 16 * n];
    for r in 0..n {
        for c in 0..n {
            let value = ((r * n + c) as u64).to_le_bytes();
            rows[16 * r + e * c..16 * r + e * (c + 1)].copy_from_slice(&value[..e]);
        }
    }
    rows
}

#[test]
fn trn_networks_transpose_every_configuration() {
    init();
    let configs = [
        (8, 2),
        (4, 2),
        (4, 4),
        (2, 2),
        (2, 4),
        (2, 8),
        (1, 2),
        (1, 4),
        (1, 8),
        (1, 16),
    ];
    for (e, n) in configs {
        let v = VregView::new(e, n);
        for onto in [false, true] {
            let f = transposer(v, onto);
            let input = iota_rows(v);
            let mut rows = input.clone();
            f.call(rows.as_mut_ptr());
            for r in 0..n {
                for c in 0..n {
                    assert_eq!(
                        element(&rows, v, r, c),
                        element(&input, v, c, r),
                        "{:?} onto={} at ({}, {})",
                        v,
                        onto,
                        r,
                        c
                    );
                }
            }
        }
    }
}

#[cfg(target_os = "macos")]
#[test]
#[ignore = "needs an Apple matrix coprocessor"]
fn coprocessor_enable_disable_round_trip() {
    init();
    let mut gen = CodeGenerator::<Unary>::new().unwrap();
    let amx = M1Accelerate::new();
    amx.enable(&mut gen).unwrap();
    amx.disable(&mut gen).unwrap();
    gen.ret().unwrap();
    let f = unsafe { gen.get_unique().unwrap() };
    assert_eq!(f.call(5), 5);
}
