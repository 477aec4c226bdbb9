// This module implements the append-only byte buffer that both backends encode into. Storage
// comes from an AllocatorAdapter, so it lives in pages provided by the configured memory
// resource. The buffer grows by allocating a larger block, copying, and freeing the old one
// through the adapter; in an in-place arena growth simply takes a fresh chunk. Besides
// appending it supports patching a 32-bit word in place, which the AArch64 assembler uses to
// resolve branch labels. A finished buffer is detached with release(), which transfers the
// memory together with the resource's deleter to whoever packages it into a function handle.

//! Growable code buffer.

use std::fmt;
use std::mem::size_of;
use std::ptr::NonNull;

use crate::core::allocator::{AllocatorAdapter, Deleter};
use crate::core::error::{JitError, JitResult};
use crate::CodeUnit;

/// Memory detached from a finished buffer.
pub struct ReleasedBuffer {
    pub ptr: NonNull<u8>,
    pub len: usize,
    pub deleter: Deleter,
    pub inplace: bool,
}

pub struct CodeBuffer {
    adapter: AllocatorAdapter,
    ptr: Option<NonNull<u8>>,
    len: usize,
    capacity: usize,
}

// SAFETY: the buffer exclusively owns its allocation.
unsafe impl Send for CodeBuffer {}

impl CodeBuffer {
    pub fn new(mut adapter: AllocatorAdapter, initial_capacity: usize) -> JitResult<Self> {
        let units = initial_capacity.max(1).div_ceil(size_of::<CodeUnit>());
        let ptr = adapter.alloc(units)?;
        Ok(Self {
            adapter,
            ptr: Some(ptr),
            len: 0,
            capacity: units * size_of::<CodeUnit>(),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_inplace(&self) -> bool {
        self.adapter.is_inplace()
    }

    /// Current start of the buffer. Moves when the buffer grows.
    pub fn base(&self) -> *const u8 {
        self.ptr.map_or(std::ptr::null(), |p| p.as_ptr() as *const u8)
    }

    /// Address the next appended byte will land at, if no growth happens first.
    pub fn next_address(&self) -> u64 {
        self.base() as u64 + self.len as u64
    }

    pub fn as_slice(&self) -> &[u8] {
        match self.ptr {
            // SAFETY: the first `len` bytes are initialized by appends.
            Some(ptr) => unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.len) },
            None => &[],
        }
    }

    /// Make room for `additional` more bytes.
    pub fn reserve(&mut self, additional: usize) -> JitResult<()> {
        let needed = self
            .len
            .checked_add(additional)
            .ok_or(JitError::OutOfMemory {
                requested: usize::MAX,
            })?;
        if needed <= self.capacity {
            return Ok(());
        }

        let new_capacity = needed.max(self.capacity * 2);
        let units = new_capacity.div_ceil(size_of::<CodeUnit>());
        let new_ptr = self.adapter.alloc(units)?;
        if let Some(old) = self.ptr {
            // SAFETY: distinct allocations, `len` bytes valid in the old one and room in the new.
            unsafe { std::ptr::copy_nonoverlapping(old.as_ptr(), new_ptr.as_ptr(), self.len) };
            self.adapter.free(old);
        }
        log::trace!(
            "code buffer grew {:#x} -> {:#x} bytes ({:p})",
            self.capacity,
            units * size_of::<CodeUnit>(),
            new_ptr
        );
        self.ptr = Some(new_ptr);
        self.capacity = units * size_of::<CodeUnit>();
        Ok(())
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> JitResult<()> {
        self.reserve(bytes.len())?;
        let ptr = self.ptr.ok_or(JitError::OutOfMemory {
            requested: bytes.len(),
        })?;
        // SAFETY: `reserve` guarantees `len + bytes.len() <= capacity`.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr().add(self.len), bytes.len())
        };
        self.len += bytes.len();
        Ok(())
    }

    pub fn push_u32(&mut self, word: u32) -> JitResult<()> {
        self.extend_from_slice(&word.to_le_bytes())
    }

    pub fn read_u32(&self, offset: usize) -> Option<u32> {
        let bytes = self.as_slice().get(offset..offset + 4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Overwrite the word at byte `offset`, which must already have been written.
    pub fn patch_u32(&mut self, offset: usize, word: u32) -> JitResult<()> {
        let end = offset.checked_add(4).filter(|end| *end <= self.len);
        match (end, self.ptr) {
            (Some(_), Some(ptr)) => {
                let bytes = word.to_le_bytes();
                // SAFETY: `offset + 4 <= len`.
                unsafe {
                    std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr().add(offset), 4)
                };
                Ok(())
            }
            _ => Err(JitError::InvalidOperand(format!(
                "patch at offset {} outside {} written bytes",
                offset, self.len
            ))),
        }
    }

    /// Detach the memory from the adapter for ownership transfer.
    pub fn release(mut self) -> JitResult<ReleasedBuffer> {
        let ptr = self.ptr.take().ok_or(JitError::EmptyCode)?;
        if let Err(err) = self.adapter.release(ptr) {
            self.ptr = Some(ptr);
            return Err(err);
        }
        Ok(ReleasedBuffer {
            ptr,
            len: self.len,
            deleter: self.adapter.deleter(),
            inplace: self.adapter.is_inplace(),
        })
    }
}

impl fmt::Debug for CodeBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeBuffer")
            .field("base", &self.base())
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .field("adapter", &self.adapter)
            .finish()
    }
}

impl Drop for CodeBuffer {
    fn drop(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            self.adapter.free(ptr);
        }
    }
}
