// This module implements the basic code generator: one single-use encoding session bound to
// one allocator adapter. The generator dereferences to the active backend's assembler, so
// mnemonics are issued directly on it. Requesting a handle consumes the generator: pending
// instructions are flushed into the buffer, the buffer is detached from its adapter, the
// instruction cache is synchronized, the pages are switched to read-execute, and the memory
// is wrapped in a unique, shared or observed handle. A failed protection change frees the
// buffer and returns the error, so no callable handle ever exists over writable pages.
// GeneratorOptions carries the initial buffer capacity and the memory resource to use.

//! Basic code generator and its configuration.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::core::allocator::AllocatorAdapter;
use crate::core::code_buffer::{CodeBuffer, ReleasedBuffer};
use crate::core::dynamic_fn::{CodeRegion, ObservedFn, SharedFn, UniqueFn};
use crate::core::error::{JitError, JitResult};
use crate::core::memory_resource::{default_resource, InplaceResource, MemoryResource};
use crate::core::protect::{flush_instruction_cache, protect, MemoryProtection};
use crate::core::signature::Signature;
use crate::Assembler;

/// Interface a backend assembler provides to the generator.
pub trait Emitter: Sized {
    /// Start a session writing into `buffer`.
    fn with_buffer(buffer: CodeBuffer) -> JitResult<Self>;

    /// Flush pending instructions and resolve fixups so the buffer holds the final bytes.
    fn ready(&mut self) -> JitResult<()>;

    fn buffer(&self) -> &CodeBuffer;

    fn into_buffer(self) -> CodeBuffer;
}

/// Default initial code buffer size in bytes.
pub const DEFAULT_INITIAL_CAPACITY: usize = 4096;

/// Construction parameters for a generator.
#[derive(Clone)]
pub struct GeneratorOptions {
    pub initial_capacity: usize,
    pub resource: Arc<dyn MemoryResource>,
}

impl GeneratorOptions {
    /// Generate into an in-place arena.
    pub fn inplace(arena: Arc<InplaceResource>) -> Self {
        Self::default().with_resource(arena)
    }

    pub fn with_capacity(mut self, initial_capacity: usize) -> Self {
        self.initial_capacity = initial_capacity;
        self
    }

    pub fn with_resource(mut self, resource: Arc<dyn MemoryResource>) -> Self {
        self.resource = resource;
        self
    }
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            resource: default_resource(),
        }
    }
}

impl fmt::Debug for GeneratorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorOptions")
            .field("initial_capacity", &self.initial_capacity)
            .field("resource", &self.resource)
            .finish()
    }
}

/// One encoding session producing one function.
pub struct BasicCodeGenerator {
    asm: Assembler,
}

impl BasicCodeGenerator {
    pub fn new() -> JitResult<Self> {
        Self::with_options(GeneratorOptions::default())
    }

    pub fn with_options(options: GeneratorOptions) -> JitResult<Self> {
        let adapter = AllocatorAdapter::new(options.resource);
        let buffer = CodeBuffer::new(adapter, options.initial_capacity)?;
        Ok(Self {
            asm: Assembler::with_buffer(buffer)?,
        })
    }

    pub fn is_inplace(&self) -> bool {
        self.asm.buffer().is_inplace()
    }

    /// Finish the session and leave the code read-execute and detached from the adapter.
    fn finalize(self) -> JitResult<ReleasedBuffer> {
        let mut asm = self.asm;
        asm.ready()?;
        let buffer = asm.into_buffer();
        if buffer.is_empty() {
            return Err(JitError::EmptyCode);
        }

        let released = buffer.release()?;
        flush_instruction_cache(released.ptr.as_ptr(), released.len);
        if let Err(err) = protect(
            released.ptr.as_ptr(),
            released.len,
            MemoryProtection::ReadExecute,
        ) {
            (released.deleter)(released.ptr);
            return Err(err);
        }

        log::debug!(
            "finalized {} bytes of code at {:p}",
            released.len,
            released.ptr
        );
        Ok(released)
    }

    fn into_region(self) -> JitResult<CodeRegion> {
        let released = self.finalize()?;
        Ok(CodeRegion::new(released.ptr, released.len, released.deleter))
    }

    /// Finalize into a sole-owner handle.
    ///
    /// # Safety
    ///
    /// The emitted code must implement a function of type `F`.
    pub unsafe fn get_unique_fn<F: Signature>(self) -> JitResult<UniqueFn<F>> {
        Ok(UniqueFn::from_region(self.into_region()?))
    }

    /// Finalize into a reference-counted handle.
    ///
    /// # Safety
    ///
    /// The emitted code must implement a function of type `F`.
    pub unsafe fn get_shared_fn<F: Signature>(self) -> JitResult<SharedFn<F>> {
        Ok(SharedFn::from_region(self.into_region()?))
    }

    /// Finalize into a non-owning handle. Only valid for in-place resources.
    ///
    /// # Safety
    ///
    /// The emitted code must implement a function of type `F`, and the arena must stay
    /// mapped and executable while the handle is used.
    pub unsafe fn get_observed_fn<F: Signature>(self) -> JitResult<ObservedFn<F>> {
        if !self.is_inplace() {
            return Err(JitError::NotInplace);
        }
        let released = self.finalize()?;
        Ok(ObservedFn::from_raw_parts(released.ptr, released.len))
    }
}

impl Deref for BasicCodeGenerator {
    type Target = Assembler;

    fn deref(&self) -> &Assembler {
        &self.asm
    }
}

impl DerefMut for BasicCodeGenerator {
    fn deref_mut(&mut self) -> &mut Assembler {
        &mut self.asm
    }
}

/// A generator whose product has the fixed signature `F`.
pub struct CodeGenerator<F: Signature> {
    inner: BasicCodeGenerator,
    _sig: PhantomData<F>,
}

impl<F: Signature> CodeGenerator<F> {
    pub fn new() -> JitResult<Self> {
        Self::with_options(GeneratorOptions::default())
    }

    pub fn with_options(options: GeneratorOptions) -> JitResult<Self> {
        Ok(Self {
            inner: BasicCodeGenerator::with_options(options)?,
            _sig: PhantomData,
        })
    }

    pub fn into_inner(self) -> BasicCodeGenerator {
        self.inner
    }

    /// # Safety
    ///
    /// The emitted code must implement a function of type `F`.
    pub unsafe fn get_unique(self) -> JitResult<UniqueFn<F>> {
        self.inner.get_unique_fn()
    }

    /// # Safety
    ///
    /// The emitted code must implement a function of type `F`.
    pub unsafe fn get_shared(self) -> JitResult<SharedFn<F>> {
        self.inner.get_shared_fn()
    }

    /// # Safety
    ///
    /// See [`BasicCodeGenerator::get_observed_fn`].
    pub unsafe fn get_observed(self) -> JitResult<ObservedFn<F>> {
        self.inner.get_observed_fn()
    }
}

impl<F: Signature> Deref for CodeGenerator<F> {
    type Target = BasicCodeGenerator;

    fn deref(&self) -> &BasicCodeGenerator {
        &self.inner
    }
}

impl<F: Signature> DerefMut for CodeGenerator<F> {
    fn deref_mut(&mut self) -> &mut BasicCodeGenerator {
        &mut self.inner
    }
}
