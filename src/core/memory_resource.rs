// This module implements the pluggable memory providers behind code buffers. HeapResource
// gives every allocation its own anonymous page-aligned mapping, so freeing or re-protecting
// one buffer never touches another; a process-wide instance backs generators that do not ask
// for anything else. InplaceResource sub-allocates page-aligned chunks from a single arena,
// either mapped and owned by the resource or supplied by the caller, never frees individual
// buffers, and can be rewound as a whole once every kernel built in it is dead. Both report
// their mode through is_inplace(), which decides whether handles manage deallocation.

//! Memory resources backing code buffers.

use std::fmt;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, OnceLock};

use hashbrown::HashMap;

use crate::core::error::{JitError, JitResult};
use crate::core::protect::{protect, round_up_to_page, MemoryProtection};

/// Provider of raw memory for code buffers.
pub trait MemoryResource: Send + Sync + fmt::Debug {
    /// Allocate at least `size` bytes of read-write memory.
    fn allocate_bytes(&self, size: usize) -> JitResult<NonNull<u8>>;

    /// Return memory obtained from [`MemoryResource::allocate_bytes`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate_bytes` on this resource and must not be used after
    /// this call.
    unsafe fn deallocate_bytes(&self, ptr: NonNull<u8>);

    /// Whether buffers live in a caller-managed arena with no per-buffer free.
    fn is_inplace(&self) -> bool;
}

/// Map `len` bytes of fresh read-write anonymous memory.
fn map_pages(len: usize) -> JitResult<NonNull<u8>> {
    // SAFETY: anonymous private mapping with no address hint.
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        log::warn!(
            "mmap of {} bytes failed: {}",
            len,
            std::io::Error::last_os_error()
        );
        return Err(JitError::OutOfMemory { requested: len });
    }
    NonNull::new(ptr as *mut u8).ok_or(JitError::OutOfMemory { requested: len })
}

/// # Safety
///
/// `ptr`/`len` must describe a mapping created by [`map_pages`].
unsafe fn unmap_pages(ptr: NonNull<u8>, len: usize) {
    if libc::munmap(ptr.as_ptr() as *mut libc::c_void, len) != 0 {
        log::warn!(
            "munmap of {:p}+{:#x} failed: {}",
            ptr,
            len,
            std::io::Error::last_os_error()
        );
    }
}

/// Heap mode: each buffer is an independent page-aligned mapping.
#[derive(Default)]
pub struct HeapResource {
    mappings: Mutex<HashMap<usize, usize>>,
}

impl HeapResource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live allocations.
    pub fn live_allocations(&self) -> usize {
        self.mappings.lock().map(|m| m.len()).unwrap_or(0)
    }
}

impl fmt::Debug for HeapResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapResource")
            .field("live_allocations", &self.live_allocations())
            .finish()
    }
}

impl MemoryResource for HeapResource {
    fn allocate_bytes(&self, size: usize) -> JitResult<NonNull<u8>> {
        let len = round_up_to_page(size.max(1));
        let ptr = map_pages(len)?;
        match self.mappings.lock() {
            Ok(mut mappings) => {
                mappings.insert(ptr.as_ptr() as usize, len);
            }
            Err(_) => {
                // SAFETY: just mapped, never handed out.
                unsafe { unmap_pages(ptr, len) };
                return Err(JitError::OutOfMemory { requested: size });
            }
        }
        log::trace!("heap resource mapped {:p}+{:#x}", ptr, len);
        Ok(ptr)
    }

    unsafe fn deallocate_bytes(&self, ptr: NonNull<u8>) {
        let len = match self.mappings.lock() {
            Ok(mut mappings) => mappings.remove(&(ptr.as_ptr() as usize)),
            Err(_) => None,
        };
        match len {
            Some(len) => {
                unmap_pages(ptr, len);
                log::trace!("heap resource unmapped {:p}+{:#x}", ptr, len);
            }
            None => log::warn!("heap resource asked to free unknown buffer {:p}", ptr),
        }
    }

    fn is_inplace(&self) -> bool {
        false
    }
}

impl Drop for HeapResource {
    fn drop(&mut self) {
        let mappings = match self.mappings.get_mut() {
            Ok(mappings) => mappings,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (addr, len) in mappings.drain() {
            if let Some(ptr) = NonNull::new(addr as *mut u8) {
                // SAFETY: every entry is a live mapping owned by this resource.
                unsafe { unmap_pages(ptr, len) };
            }
        }
    }
}

/// Process-wide heap resource used when a generator is not given one.
pub fn default_resource() -> Arc<dyn MemoryResource> {
    static DEFAULT: OnceLock<Arc<HeapResource>> = OnceLock::new();
    DEFAULT.get_or_init(|| Arc::new(HeapResource::new())).clone()
}

#[derive(Debug)]
struct Arena {
    base: NonNull<u8>,
    len: usize,
    owned: bool,
}

/// In-place mode: buffers are carved out of one arena and never freed individually.
#[derive(Debug)]
pub struct InplaceResource {
    arena: Arena,
    cursor: Mutex<usize>,
}

// SAFETY: the arena is plain memory; the bump cursor is behind a mutex.
unsafe impl Send for InplaceResource {}
unsafe impl Sync for InplaceResource {}

impl InplaceResource {
    /// Map a private arena of at least `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> JitResult<Self> {
        let len = round_up_to_page(capacity.max(1));
        let base = map_pages(len)?;
        Ok(Self {
            arena: Arena {
                base,
                len,
                owned: true,
            },
            cursor: Mutex::new(0),
        })
    }

    /// Use caller-owned memory as the arena.
    ///
    /// # Safety
    ///
    /// `base` must be page-aligned, `len` bytes long, readable and writable, and must outlive
    /// the resource and every handle built from it. Pages of the region get their protection
    /// changed.
    pub unsafe fn from_raw_parts(base: NonNull<u8>, len: usize) -> Self {
        Self {
            arena: Arena {
                base,
                len,
                owned: false,
            },
            cursor: Mutex::new(0),
        }
    }

    pub fn base(&self) -> NonNull<u8> {
        self.arena.base
    }

    pub fn capacity(&self) -> usize {
        self.arena.len
    }

    /// Bytes handed out so far, including page padding.
    pub fn used(&self) -> usize {
        self.cursor.lock().map(|c| *c).unwrap_or(self.arena.len)
    }

    /// Make the whole arena writable again and start allocating from its beginning.
    ///
    /// # Safety
    ///
    /// No function generated into the arena may run or be called afterwards; observed handles
    /// into it become dangling.
    pub unsafe fn reset(&self) -> JitResult<()> {
        protect(
            self.arena.base.as_ptr(),
            self.arena.len,
            MemoryProtection::ReadWrite,
        )?;
        if let Ok(mut cursor) = self.cursor.lock() {
            *cursor = 0;
        }
        log::debug!("in-place arena {:p} reset", self.arena.base);
        Ok(())
    }
}

impl MemoryResource for InplaceResource {
    fn allocate_bytes(&self, size: usize) -> JitResult<NonNull<u8>> {
        let len = round_up_to_page(size.max(1));
        let mut cursor = self
            .cursor
            .lock()
            .map_err(|_| JitError::OutOfMemory { requested: size })?;
        let end = cursor
            .checked_add(len)
            .filter(|end| *end <= self.arena.len)
            .ok_or(JitError::OutOfMemory { requested: size })?;

        // SAFETY: `*cursor < end <= len`, inside the arena.
        let ptr = unsafe { self.arena.base.as_ptr().add(*cursor) };
        *cursor = end;
        NonNull::new(ptr).ok_or(JitError::OutOfMemory { requested: size })
    }

    unsafe fn deallocate_bytes(&self, _ptr: NonNull<u8>) {}

    fn is_inplace(&self) -> bool {
        true
    }
}

impl Drop for InplaceResource {
    fn drop(&mut self) {
        if self.arena.owned {
            // SAFETY: owned arenas come from map_pages with exactly this length.
            unsafe { unmap_pages(self.arena.base, self.arena.len) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protect::page_size;

    #[test]
    fn test_heap_allocations_are_independent_pages() {
        let heap = HeapResource::new();
        let a = heap.allocate_bytes(10).unwrap();
        let b = heap.allocate_bytes(page_size() + 1).unwrap();
        assert_eq!(heap.live_allocations(), 2);
        assert_eq!(a.as_ptr() as usize % page_size(), 0);
        assert_eq!(b.as_ptr() as usize % page_size(), 0);
        assert!(!heap.is_inplace());

        unsafe {
            a.as_ptr().write(1);
            b.as_ptr().add(page_size()).write(2);
            heap.deallocate_bytes(a);
        }
        assert_eq!(heap.live_allocations(), 1);
        unsafe { heap.deallocate_bytes(b) };
        assert_eq!(heap.live_allocations(), 0);
    }

    #[test]
    fn test_inplace_bump_and_exhaustion() {
        let page = page_size();
        let arena = InplaceResource::with_capacity(3 * page).unwrap();
        assert!(arena.is_inplace());

        let a = arena.allocate_bytes(1).unwrap();
        let b = arena.allocate_bytes(page + 1).unwrap();
        assert_eq!(a, arena.base());
        assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, page);
        assert_eq!(arena.used(), 3 * page);

        let err = arena.allocate_bytes(1).unwrap_err();
        assert!(matches!(err, JitError::OutOfMemory { requested: 1 }));

        // Freeing is a no-op and gives nothing back.
        unsafe { arena.deallocate_bytes(a) };
        assert!(arena.allocate_bytes(1).is_err());

        unsafe { arena.reset().unwrap() };
        assert_eq!(arena.used(), 0);
        assert_eq!(arena.allocate_bytes(1).unwrap(), arena.base());
    }

    #[test]
    fn test_inplace_from_caller_region() {
        let page = page_size();
        let region = map_pages(2 * page).unwrap();
        {
            let arena = unsafe { InplaceResource::from_raw_parts(region, 2 * page) };
            assert_eq!(arena.capacity(), 2 * page);
            assert_eq!(arena.allocate_bytes(page).unwrap(), region);
        }
        // The caller still owns the mapping.
        unsafe {
            region.as_ptr().write(9);
            unmap_pages(region, 2 * page);
        }
    }
}
