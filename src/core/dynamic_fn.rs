// This module provides the typed handles through which generated code is called. A CodeRegion
// owns one finished, read-execute buffer together with its resource's deleter; dropping it
// turns the pages back to read-write and frees them, exactly once. UniqueFn owns a region
// outright, SharedFn shares it through an Arc, WeakFn observes a SharedFn without keeping it
// alive, and ObservedFn is a bare pointer into memory managed elsewhere (an in-place arena).
// Every handle carries its call signature as a type parameter and offers typed access, raw
// byte dumps, object-file export and perf registration. dynamic_fn_cast re-types a handle
// without touching its memory.

//! Function handles over generated code.

use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::{Arc, Weak};

use crate::core::allocator::Deleter;
use crate::core::error::JitResult;
use crate::core::object_file::object_file;
use crate::core::perf;
use crate::core::protect::{protect, MemoryProtection};
use crate::core::signature::Signature;

/// A finished executable buffer and the routine that frees it.
pub(crate) struct CodeRegion {
    ptr: NonNull<u8>,
    size: usize,
    deleter: Option<Deleter>,
}

// SAFETY: the region is immutable executable memory; the deleter is Send + Sync.
unsafe impl Send for CodeRegion {}
unsafe impl Sync for CodeRegion {}

impl CodeRegion {
    pub(crate) fn new(ptr: NonNull<u8>, size: usize, deleter: Deleter) -> Self {
        Self {
            ptr,
            size,
            deleter: Some(deleter),
        }
    }

    fn view(&self) -> CodeView {
        CodeView {
            ptr: self.ptr.as_ptr(),
            size: self.size,
        }
    }
}

impl Drop for CodeRegion {
    fn drop(&mut self) {
        if let Err(err) = protect(self.ptr.as_ptr(), self.size, MemoryProtection::ReadWrite) {
            log::warn!("releasing code at {:p}: {}", self.ptr, err);
        }
        if let Some(deleter) = self.deleter.take() {
            deleter(self.ptr);
        }
        log::trace!("released code region {:p}+{:#x}", self.ptr, self.size);
    }
}

/// Borrowed view of generated bytes.
#[derive(Clone, Copy)]
struct CodeView {
    ptr: *const u8,
    size: usize,
}

impl CodeView {
    fn bytes<'a>(self) -> &'a [u8] {
        // SAFETY: views are only built from live regions; callers tie the lifetime to the
        // owning handle.
        unsafe { std::slice::from_raw_parts(self.ptr, self.size) }
    }
}

fn save_bytes(bytes: Option<&[u8]>, path: &Path) {
    let Some(bytes) = bytes else {
        log::warn!("not saving empty function handle to {}", path.display());
        return;
    };
    if let Err(err) = std::fs::write(path, bytes) {
        log::warn!("cannot save generated code to {}: {}", path.display(), err);
    }
}

fn save_object(bytes: Option<&[u8]>, path: &Path, name: &str) {
    let Some(bytes) = bytes else {
        log::warn!("not saving empty function handle to {}", path.display());
        return;
    };
    let result = object_file(bytes, name).and_then(|obj| Ok(std::fs::write(path, obj)?));
    if let Err(err) = result {
        log::warn!("cannot save object file {}: {}", path.display(), err);
    }
}

macro_rules! impl_code_accessors {
    ($handle:ident) => {
        impl<F: Signature> $handle<F> {
            /// Whether the handle refers to code.
            pub fn is_valid(&self) -> bool {
                self.view().is_some()
            }

            /// The typed entry point.
            pub fn get(&self) -> Option<F> {
                // SAFETY: whoever attached `F` to this code vouched for it.
                self.view().map(|view| unsafe { F::from_entry(view.ptr) })
            }

            /// Entry address, null for an empty handle.
            pub fn as_ptr(&self) -> *const u8 {
                self.view().map_or(std::ptr::null(), |view| view.ptr)
            }

            /// Size of the code in bytes.
            pub fn size(&self) -> Option<usize> {
                self.view().map(|view| view.size)
            }

            /// The generated machine code.
            pub fn code(&self) -> Option<&[u8]> {
                self.view().map(CodeView::bytes)
            }

            pub fn swap(&mut self, other: &mut Self) {
                mem::swap(self, other);
            }

            /// Write the raw code to `path`. Failures are logged, not returned.
            pub fn save_to_file(&self, path: impl AsRef<Path>) {
                save_bytes(self.code(), path.as_ref());
            }

            /// Write the code as an object file defining `name`. Failures are logged.
            pub fn save_to_object(&self, path: impl AsRef<Path>, name: &str) {
                save_object(self.code(), path.as_ref(), name);
            }

            /// Serialize the code as an object file defining `name`.
            pub fn object_file(&self, name: &str) -> JitResult<Vec<u8>> {
                object_file(self.code().unwrap_or(&[]), name)
            }

            /// Announce the code to a sampling profiler.
            pub fn register_perf(&self, name: &str) {
                if let Some(view) = self.view() {
                    perf::register(name, view.ptr as usize, view.size);
                }
            }
        }

        impl<F: Signature> Default for $handle<F> {
            fn default() -> Self {
                Self::empty()
            }
        }

        impl<F: Signature> fmt::Debug for $handle<F> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($handle))
                    .field("ptr", &self.as_ptr())
                    .field("size", &self.size())
                    .finish()
            }
        }
    };
}

macro_rules! impl_call {
    ($handle:ident; $($arg:ident: $ty:ident),*) => {
        impl<R: 'static, $($ty: 'static),*> $handle<extern "C" fn($($ty),*) -> R> {
            /// Call the generated function. Panics on an empty handle.
            #[allow(clippy::too_many_arguments)]
            pub fn call(&self, $($arg: $ty),*) -> R {
                match self.get() {
                    Some(f) => f($($arg),*),
                    None => panic!(concat!("call through an empty ", stringify!($handle))),
                }
            }
        }
    };
}

macro_rules! impl_calls {
    ($handle:ident) => {
        impl_call!($handle;);
        impl_call!($handle; a: A);
        impl_call!($handle; a: A, b: B);
        impl_call!($handle; a: A, b: B, c: C);
        impl_call!($handle; a: A, b: B, c: C, d: D);
        impl_call!($handle; a: A, b: B, c: C, d: D, e: E);
        impl_call!($handle; a: A, b: B, c: C, d: D, e: E, g: G);
    };
}

/// Sole owner of generated code.
pub struct UniqueFn<F: Signature> {
    region: Option<CodeRegion>,
    _sig: PhantomData<F>,
}

impl<F: Signature> UniqueFn<F> {
    pub fn empty() -> Self {
        Self {
            region: None,
            _sig: PhantomData,
        }
    }

    pub(crate) fn from_region(region: CodeRegion) -> Self {
        Self {
            region: Some(region),
            _sig: PhantomData,
        }
    }

    fn view(&self) -> Option<CodeView> {
        self.region.as_ref().map(CodeRegion::view)
    }

    /// Drop the code now, leaving the handle empty.
    pub fn reset(&mut self) {
        self.region = None;
    }
}

impl_code_accessors!(UniqueFn);
impl_calls!(UniqueFn);

/// Reference-counted owner of generated code.
pub struct SharedFn<F: Signature> {
    region: Option<Arc<CodeRegion>>,
    _sig: PhantomData<F>,
}

impl<F: Signature> SharedFn<F> {
    pub fn empty() -> Self {
        Self {
            region: None,
            _sig: PhantomData,
        }
    }

    pub(crate) fn from_region(region: CodeRegion) -> Self {
        Self {
            region: Some(Arc::new(region)),
            _sig: PhantomData,
        }
    }

    fn view(&self) -> Option<CodeView> {
        self.region.as_deref().map(CodeRegion::view)
    }

    /// Release this owner. The code is freed when the last owner goes.
    pub fn reset(&mut self) {
        self.region = None;
    }

    /// Number of shared owners, zero for an empty handle.
    pub fn use_count(&self) -> usize {
        self.region.as_ref().map_or(0, Arc::strong_count)
    }

    pub fn downgrade(&self) -> WeakFn<F> {
        WeakFn {
            region: self.region.as_ref().map_or_else(Weak::new, Arc::downgrade),
            _sig: PhantomData,
        }
    }
}

impl<F: Signature> Clone for SharedFn<F> {
    fn clone(&self) -> Self {
        Self {
            region: self.region.clone(),
            _sig: PhantomData,
        }
    }
}

impl<F: Signature> From<UniqueFn<F>> for SharedFn<F> {
    fn from(unique: UniqueFn<F>) -> Self {
        Self {
            region: unique.region.map(Arc::new),
            _sig: PhantomData,
        }
    }
}

impl_code_accessors!(SharedFn);
impl_calls!(SharedFn);

/// Non-owning observer of a [`SharedFn`].
pub struct WeakFn<F: Signature> {
    region: Weak<CodeRegion>,
    _sig: PhantomData<F>,
}

impl<F: Signature> WeakFn<F> {
    pub fn new() -> Self {
        Self {
            region: Weak::new(),
            _sig: PhantomData,
        }
    }

    /// A new owner of the code, or an empty handle once every owner is gone.
    pub fn lock(&self) -> SharedFn<F> {
        SharedFn {
            region: self.region.upgrade(),
            _sig: PhantomData,
        }
    }

    pub fn expired(&self) -> bool {
        self.region.strong_count() == 0
    }

    pub fn reset(&mut self) {
        self.region = Weak::new();
    }
}

impl<F: Signature> Default for WeakFn<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Signature> Clone for WeakFn<F> {
    fn clone(&self) -> Self {
        Self {
            region: self.region.clone(),
            _sig: PhantomData,
        }
    }
}

impl<F: Signature> fmt::Debug for WeakFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakFn")
            .field("expired", &self.expired())
            .finish()
    }
}

/// Non-owning pointer to code whose memory is managed elsewhere.
pub struct ObservedFn<F: Signature> {
    ptr: Option<NonNull<u8>>,
    size: usize,
    _sig: PhantomData<F>,
}

// SAFETY: observed code is immutable executable memory.
unsafe impl<F: Signature> Send for ObservedFn<F> {}
unsafe impl<F: Signature> Sync for ObservedFn<F> {}

impl<F: Signature> ObservedFn<F> {
    pub fn empty() -> Self {
        Self {
            ptr: None,
            size: 0,
            _sig: PhantomData,
        }
    }

    /// Observe `size` bytes of code at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be executable code matching `F` that stays mapped and executable for as
    /// long as the handle (or any copy of it) is used.
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, size: usize) -> Self {
        Self {
            ptr: Some(ptr),
            size,
            _sig: PhantomData,
        }
    }

    fn view(&self) -> Option<CodeView> {
        self.ptr.map(|ptr| CodeView {
            ptr: ptr.as_ptr(),
            size: self.size,
        })
    }

    pub fn reset(&mut self) {
        self.ptr = None;
        self.size = 0;
    }
}

impl<F: Signature> Clone for ObservedFn<F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<F: Signature> Copy for ObservedFn<F> {}

impl_code_accessors!(ObservedFn);
impl_calls!(ObservedFn);

/// Re-typing of a handle under another signature.
pub trait DynamicFnCast<To: Signature> {
    type Output;

    /// # Safety
    ///
    /// The code must be ABI-compatible with `To`.
    unsafe fn cast(self) -> Self::Output;
}

impl<F: Signature, To: Signature> DynamicFnCast<To> for UniqueFn<F> {
    type Output = UniqueFn<To>;

    unsafe fn cast(self) -> UniqueFn<To> {
        UniqueFn {
            region: self.region,
            _sig: PhantomData,
        }
    }
}

impl<F: Signature, To: Signature> DynamicFnCast<To> for SharedFn<F> {
    type Output = SharedFn<To>;

    unsafe fn cast(self) -> SharedFn<To> {
        SharedFn {
            region: self.region,
            _sig: PhantomData,
        }
    }
}

impl<F: Signature, To: Signature> DynamicFnCast<To> for &SharedFn<F> {
    type Output = SharedFn<To>;

    unsafe fn cast(self) -> SharedFn<To> {
        SharedFn {
            region: self.region.clone(),
            _sig: PhantomData,
        }
    }
}

impl<F: Signature, To: Signature> DynamicFnCast<To> for &WeakFn<F> {
    type Output = WeakFn<To>;

    unsafe fn cast(self) -> WeakFn<To> {
        WeakFn {
            region: self.region.clone(),
            _sig: PhantomData,
        }
    }
}

impl<F: Signature, To: Signature> DynamicFnCast<To> for ObservedFn<F> {
    type Output = ObservedFn<To>;

    unsafe fn cast(self) -> ObservedFn<To> {
        ObservedFn {
            ptr: self.ptr,
            size: self.size,
            _sig: PhantomData,
        }
    }
}

/// Re-wrap `handle` under signature `To`, keeping its code and size.
///
/// Unique handles are moved; shared, weak and observed handles can be cast by reference.
///
/// # Safety
///
/// The generated code must be callable with the `To` ABI.
pub unsafe fn dynamic_fn_cast<To: Signature, H: DynamicFnCast<To>>(handle: H) -> H::Output {
    handle.cast()
}
