// This module provides the allocator adapter that sits between a memory resource and the code
// buffer. It converts encoding-unit counts into byte requests, remembers every heap-mode
// pointer it has handed out in a hashbrown set, frees only pointers it still tracks, and lets a
// finished buffer be detached for ownership transfer into a function handle. Releasing an
// address it never allocated, or releasing twice, is reported as an error. On drop the
// adapter checks that nothing it tracked leaked.

//! Allocator adapter tracking buffers handed to the encoding engine.

use std::fmt;
use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::Arc;

use hashbrown::HashSet;

use crate::core::error::{JitError, JitResult};
use crate::core::memory_resource::MemoryResource;
use crate::CodeUnit;

/// Deallocation routine detached from an adapter, owned by function handles.
pub type Deleter = Box<dyn FnOnce(NonNull<u8>) + Send + Sync>;

pub struct AllocatorAdapter {
    resource: Arc<dyn MemoryResource>,
    managed: HashSet<usize>,
}

impl AllocatorAdapter {
    pub fn new(resource: Arc<dyn MemoryResource>) -> Self {
        Self {
            resource,
            managed: HashSet::new(),
        }
    }

    pub fn resource(&self) -> &Arc<dyn MemoryResource> {
        &self.resource
    }

    pub fn is_inplace(&self) -> bool {
        self.resource.is_inplace()
    }

    /// Number of buffers currently owned through this adapter.
    pub fn managed_count(&self) -> usize {
        self.managed.len()
    }

    /// Allocate room for `units` encoding units.
    pub fn alloc(&mut self, units: usize) -> JitResult<NonNull<u8>> {
        let bytes = units
            .checked_mul(size_of::<CodeUnit>())
            .ok_or(JitError::OutOfMemory {
                requested: usize::MAX,
            })?;
        let ptr = self.resource.allocate_bytes(bytes)?;
        if !self.resource.is_inplace() {
            self.managed.insert(ptr.as_ptr() as usize);
        }
        Ok(ptr)
    }

    /// Free a buffer this adapter still owns. Anything else is ignored.
    pub fn free(&mut self, ptr: NonNull<u8>) {
        if self.resource.is_inplace() {
            return;
        }
        if self.managed.remove(&(ptr.as_ptr() as usize)) {
            // SAFETY: the pointer was allocated by this resource and was still tracked.
            unsafe { self.resource.deallocate_bytes(ptr) };
        } else {
            log::trace!("ignoring free of untracked buffer {:p}", ptr);
        }
    }

    /// Stop tracking `ptr` and hand ownership to the caller.
    pub fn release(&mut self, ptr: NonNull<u8>) -> JitResult<NonNull<u8>> {
        if self.resource.is_inplace() || self.managed.remove(&(ptr.as_ptr() as usize)) {
            Ok(ptr)
        } else {
            Err(JitError::UntrackedBuffer {
                addr: ptr.as_ptr() as usize,
            })
        }
    }

    /// The resource's deallocation routine, for buffers taken out with [`Self::release`].
    pub fn deleter(&self) -> Deleter {
        let resource = Arc::clone(&self.resource);
        // SAFETY: deleters are only attached to buffers released from this resource.
        Box::new(move |ptr| unsafe { resource.deallocate_bytes(ptr) })
    }
}

impl fmt::Debug for AllocatorAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocatorAdapter")
            .field("resource", &self.resource)
            .field("managed", &self.managed.len())
            .finish()
    }
}

impl Drop for AllocatorAdapter {
    fn drop(&mut self) {
        if !self.managed.is_empty() {
            log::error!(
                "allocator adapter dropped with {} tracked buffers",
                self.managed.len()
            );
        }
        debug_assert!(self.managed.is_empty(), "leaked code buffers");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory_resource::{HeapResource, InplaceResource};

    #[test]
    fn test_alloc_free_tracks_heap_buffers() {
        let heap = Arc::new(HeapResource::new());
        let mut adapter = AllocatorAdapter::new(heap.clone());

        let a = adapter.alloc(16).unwrap();
        let b = adapter.alloc(16).unwrap();
        assert_eq!(adapter.managed_count(), 2);
        assert_eq!(heap.live_allocations(), 2);

        adapter.free(a);
        // Second free of the same pointer is ignored.
        adapter.free(a);
        assert_eq!(adapter.managed_count(), 1);
        assert_eq!(heap.live_allocations(), 1);

        adapter.free(b);
        assert_eq!(heap.live_allocations(), 0);
    }

    #[test]
    fn test_release_rejects_untracked() {
        let heap = Arc::new(HeapResource::new());
        let mut adapter = AllocatorAdapter::new(heap.clone());
        let ptr = adapter.alloc(8).unwrap();

        let released = adapter.release(ptr).unwrap();
        assert_eq!(released, ptr);
        assert_eq!(adapter.managed_count(), 0);

        let err = adapter.release(ptr).unwrap_err();
        assert!(matches!(err, JitError::UntrackedBuffer { addr } if addr == ptr.as_ptr() as usize));

        // Freeing a released pointer does not touch it.
        adapter.free(ptr);
        assert_eq!(heap.live_allocations(), 1);

        adapter.deleter()(ptr);
        assert_eq!(heap.live_allocations(), 0);
    }

    #[test]
    fn test_foreign_pointer_is_ignored() {
        let mut adapter = AllocatorAdapter::new(Arc::new(HeapResource::new()));
        let mut local = 0u8;
        let foreign = NonNull::from(&mut local);
        adapter.free(foreign);
        assert!(adapter.release(foreign).is_err());
    }

    #[test]
    fn test_inplace_release_always_succeeds() {
        let arena = Arc::new(InplaceResource::with_capacity(1 << 16).unwrap());
        let mut adapter = AllocatorAdapter::new(arena);
        assert!(adapter.is_inplace());
        let ptr = adapter.alloc(4).unwrap();
        assert_eq!(adapter.managed_count(), 0);
        assert!(adapter.release(ptr).is_ok());
        assert!(adapter.release(ptr).is_ok());
    }
}
