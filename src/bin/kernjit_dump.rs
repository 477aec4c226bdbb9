//! Kernel dump tool.
//!
//! Builds one of the demo kernels with the target's meta-mnemonics, prints its disassembly,
//! optionally calls it, and writes raw or object dumps of the generated code.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use kernjit::{JitResult, UniqueFn};

/// Every demo kernel is `u64 -> u64`; `reverse` takes and returns a pointer to its array.
type KernelFn = extern "C" fn(u64) -> u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Kernel {
    /// Return the immediate
    MovImm,
    /// Return the argument plus the immediate
    AddImm,
    /// Return the argument minus the immediate
    SubImm,
    /// Reverse a u64 array through the scratch stack
    Reverse,
}

#[derive(Parser)]
#[command(name = "kernjit-dump")]
#[command(version = "0.1.0")]
#[command(about = "Generate, disassemble and dump kernjit demo kernels")]
struct Cli {
    /// Kernel to generate
    #[arg(value_enum)]
    kernel: Kernel,

    /// Immediate used by the mov/add/sub kernels
    #[arg(long, default_value_t = 0x1234_5678_9abc, allow_hyphen_values = true)]
    imm: i64,

    /// Array length for the reverse kernel
    #[arg(long, default_value_t = 11)]
    len: usize,

    /// Call the kernel with this argument and print the result
    #[arg(long, allow_hyphen_values = true)]
    run: Option<u64>,

    /// Write the raw machine code here
    #[arg(long, value_name = "PATH")]
    raw: Option<PathBuf>,

    /// Write an object file defining the kernel here
    #[arg(long, value_name = "PATH")]
    object: Option<PathBuf>,

    /// Announce the kernel to perf
    #[arg(long)]
    perf: bool,
}

#[cfg(target_arch = "x86_64")]
mod kernels {
    use iced_x86::code_asm::*;
    use iced_x86::{Decoder, DecoderOptions, Formatter, NasmFormatter};

    use kernjit::x64::{LargeImm, Stack, DEFAULT_STACK_SIZE};
    use kernjit::{CodeGenerator, JitResult, UniqueFn};

    use super::{Kernel, KernelFn};

    pub fn build(kernel: Kernel, imm: i64, len: usize) -> JitResult<UniqueFn<KernelFn>> {
        let mut gen = CodeGenerator::<KernelFn>::new()?;
        let large = LargeImm::new(r11);
        match kernel {
            Kernel::MovImm => large.meta_mov_imm(&mut gen, rax, imm)?,
            Kernel::AddImm => {
                gen.mov(rax, rdi)?;
                large.meta_add_imm(&mut gen, rax, imm)?;
            }
            Kernel::SubImm => {
                gen.mov(rax, rdi)?;
                large.meta_sub_imm(&mut gen, rax, imm)?;
            }
            Kernel::Reverse => {
                let size = DEFAULT_STACK_SIZE.max(48 + 8 * len as u32);
                let stack = Stack::with_size(r10, size);
                stack.prologue(&mut gen)?;
                for i in 0..len {
                    gen.mov(rax, qword_ptr(rdi + (8 * i) as i32))?;
                    stack.meta_push(&mut gen, rax)?;
                }
                for i in 0..len {
                    stack.meta_pop(&mut gen, rax)?;
                    gen.mov(qword_ptr(rdi + (8 * i) as i32), rax)?;
                }
                stack.epilogue(&mut gen)?;
                gen.mov(rax, rdi)?;
            }
        }
        gen.ret()?;
        // SAFETY: each kernel above implements `u64 -> u64` under the System V ABI.
        unsafe { gen.get_unique() }
    }

    pub fn disassemble(code: &[u8], ip: u64) {
        let mut decoder = Decoder::with_ip(64, code, ip, DecoderOptions::NONE);
        let mut formatter = NasmFormatter::new();
        let mut line = String::new();
        for instr in &mut decoder {
            line.clear();
            formatter.format(&instr, &mut line);
            println!("{:016x}  {}", instr.ip(), line);
        }
    }
}

#[cfg(target_arch = "aarch64")]
mod kernels {
    use kernjit::aarch64::*;
    use kernjit::{CodeGenerator, JitResult, UniqueFn};

    use super::{Kernel, KernelFn};

    pub fn build(kernel: Kernel, imm: i64, len: usize) -> JitResult<UniqueFn<KernelFn>> {
        let mut gen = CodeGenerator::<KernelFn>::new()?;
        let large = LargeImm::new(X9);
        match kernel {
            Kernel::MovImm => large.meta_mov_imm(&mut gen, X0, imm)?,
            Kernel::AddImm => large.meta_add_imm(&mut gen, X0, imm)?,
            Kernel::SubImm => large.meta_sub_imm(&mut gen, X0, imm)?,
            Kernel::Reverse => {
                let size = DEFAULT_STACK_SIZE.max(256 + 8 * len as u32);
                let stack = Stack::with_size(X4, size);
                stack.prologue(&mut gen)?;
                for i in 0..len {
                    gen.ldr(X1, ptr_off(X0, 8 * i as i32))?;
                    stack.meta_push(&mut gen, X1)?;
                }
                for i in 0..len {
                    stack.meta_pop(&mut gen, X1)?;
                    gen.str(X1, ptr_off(X0, 8 * i as i32))?;
                }
                stack.epilogue(&mut gen)?;
            }
        }
        gen.ret()?;
        // SAFETY: each kernel above implements `u64 -> u64` under AAPCS64.
        unsafe { gen.get_unique() }
    }

    pub fn disassemble(code: &[u8], ip: u64) {
        for (i, word) in code.chunks_exact(4).enumerate() {
            let word = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            println!("{:016x}  .inst {:#010x}", ip + 4 * i as u64, word);
        }
    }
}

fn kernel_name(kernel: Kernel) -> &'static str {
    match kernel {
        Kernel::MovImm => "kernjit_mov_imm",
        Kernel::AddImm => "kernjit_add_imm",
        Kernel::SubImm => "kernjit_sub_imm",
        Kernel::Reverse => "kernjit_reverse",
    }
}

fn run(cli: &Cli) -> JitResult<()> {
    let f: UniqueFn<KernelFn> = kernels::build(cli.kernel, cli.imm, cli.len)?;
    let name = kernel_name(cli.kernel);
    log::info!("generated {} ({} bytes)", name, f.size().unwrap_or(0));

    if let Some(code) = f.code() {
        kernels::disassemble(code, f.as_ptr() as u64);
    }
    if cli.perf {
        f.register_perf(name);
    }
    if let Some(path) = &cli.raw {
        f.save_to_file(path);
    }
    if let Some(path) = &cli.object {
        std::fs::write(path, f.object_file(name)?)?;
    }

    if let Some(arg) = cli.run {
        if cli.kernel == Kernel::Reverse {
            let mut data: Vec<u64> = (0..cli.len as u64).map(|i| arg.wrapping_add(i)).collect();
            f.call(data.as_mut_ptr() as u64);
            println!("{:?}", data);
        } else {
            println!("{:#x}", f.call(arg));
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}
