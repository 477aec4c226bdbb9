// This module wraps the OS page-protection calls that enforce write-xor-execute on generated
// code. protect() rounds the requested range out to page boundaries and switches every
// covered page to read-write, read-write-execute or read-execute through mprotect, turning a
// failed call into a JitError carrying the OS error. The host page size is queried once via
// sysconf and cached. On AArch64 the module also provides the cache maintenance sequence that
// must run after writing instructions and before executing them; on x86-64 the instruction
// cache is coherent and the call compiles to nothing.

//! Page protection for code buffers.

use std::io;
use std::sync::OnceLock;

use crate::core::error::{JitError, JitResult};

/// Access rights applied to the pages covering a code buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryProtection {
    ReadWrite,
    ReadWriteExecute,
    ReadExecute,
}

impl MemoryProtection {
    fn prot_flags(self) -> libc::c_int {
        match self {
            MemoryProtection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
            MemoryProtection::ReadWriteExecute => {
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC
            }
            MemoryProtection::ReadExecute => libc::PROT_READ | libc::PROT_EXEC,
        }
    }
}

/// Host page size in bytes.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        // SAFETY: sysconf has no preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as usize
        } else {
            4096
        }
    })
}

/// Round `value` up to a multiple of the page size.
pub(crate) fn round_up_to_page(value: usize) -> usize {
    let page = page_size();
    value.div_ceil(page) * page
}

/// Change the protection of every page touched by `[addr, addr + size)`.
///
/// The start is rounded down to its page and the length grows by the same amount, so
/// neighbouring data on the first and last page changes mode too. Buffers handed out by
/// this crate's resources are page-granular for that reason.
pub fn protect(addr: *const u8, size: usize, mode: MemoryProtection) -> JitResult<()> {
    let page = page_size();
    let start = addr as usize;
    let aligned = start & !(page - 1);
    let len = size + (start - aligned);

    // SAFETY: mprotect only changes page attributes; an invalid range is reported through
    // the return value.
    let rc = unsafe { libc::mprotect(aligned as *mut libc::c_void, len, mode.prot_flags()) };
    if rc != 0 {
        return Err(JitError::Protection {
            addr: start,
            len: size,
            mode,
            source: io::Error::last_os_error(),
        });
    }

    log::trace!("protect {:#x}+{:#x} -> {:?}", aligned, len, mode);
    Ok(())
}

/// Make freshly written instructions in `[start, start + len)` visible to instruction fetch.
#[cfg(target_arch = "aarch64")]
pub fn flush_instruction_cache(start: *const u8, len: usize) {
    use std::arch::asm;

    if len == 0 {
        return;
    }

    let ctr: u64;
    // SAFETY: CTR_EL0 is readable from EL0 on every supported OS.
    unsafe { asm!("mrs {}, ctr_el0", out(reg) ctr, options(nomem, nostack)) };
    let dline = 4usize << ((ctr >> 16) & 0xf);
    let iline = 4usize << (ctr & 0xf);

    let begin = start as usize;
    let end = begin + len;

    let mut addr = begin & !(dline - 1);
    while addr < end {
        // SAFETY: cache maintenance by VA on mapped memory.
        unsafe { asm!("dc cvau, {}", in(reg) addr, options(nostack)) };
        addr += dline;
    }
    // SAFETY: barrier only.
    unsafe { asm!("dsb ish", options(nostack)) };

    let mut addr = begin & !(iline - 1);
    while addr < end {
        // SAFETY: cache maintenance by VA on mapped memory.
        unsafe { asm!("ic ivau, {}", in(reg) addr, options(nostack)) };
        addr += iline;
    }
    // SAFETY: barriers only.
    unsafe { asm!("dsb ish", "isb", options(nostack)) };
}

/// Make freshly written instructions in `[start, start + len)` visible to instruction fetch.
#[cfg(not(target_arch = "aarch64"))]
#[inline]
pub fn flush_instruction_cache(_start: *const u8, _len: usize) {}
