// This module gathers the architecture-independent half of kernjit: page protection, memory
// resources and the allocator adapter behind code buffers, the growable code buffer itself,
// the basic code generator that finalizes a session, and the typed function handles that
// own or observe the finished code. Profiler registration and object-file export hang off the
// handles. Everything here is shared by whichever backend the target selects.

//! Core JIT infrastructure.
//!
//! # Key Components
//!
//! ## Protection (`protect`)
//! - W^X transitions over page-aligned ranges
//! - Instruction cache synchronization
//!
//! ## Memory (`memory_resource`, `allocator`, `code_buffer`)
//! - Heap resource with one mapping per buffer
//! - In-place arena resource
//! - Adapter tracking ownership of every heap buffer
//!
//! ## Generation (`generator`)
//! - Single-use sessions producing unique, shared or observed handles
//!
//! ## Handles (`dynamic_fn`, `signature`)
//! - `UniqueFn`, `SharedFn`, `WeakFn`, `ObservedFn`
//! - Unsafe signature casts

pub mod allocator;
pub mod code_buffer;
pub mod dynamic_fn;
pub mod error;
pub mod generator;
pub mod memory_resource;
pub mod object_file;
pub mod perf;
pub mod protect;
pub mod signature;

pub use allocator::{AllocatorAdapter, Deleter};
pub use code_buffer::CodeBuffer;
pub use dynamic_fn::{dynamic_fn_cast, DynamicFnCast, ObservedFn, SharedFn, UniqueFn, WeakFn};
pub use error::{JitError, JitResult};
pub use generator::{BasicCodeGenerator, CodeGenerator, Emitter, GeneratorOptions};
pub use memory_resource::{default_resource, HeapResource, InplaceResource, MemoryResource};
pub use protect::{page_size, protect, MemoryProtection};
pub use signature::Signature;
