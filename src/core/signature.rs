// This module defines the Signature trait attached to function handles. A signature is a plain
// `extern "C"` function pointer type; implementing the trait asserts that a code address can
// be reinterpreted as such a pointer. Implementations are generated for safe and unsafe
// C-ABI function pointers of up to six arguments.

//! Call signatures for generated functions.

/// A C-ABI function pointer type generated code can be exposed as.
///
/// # Safety
///
/// Implementors must be pointer-sized function pointer types.
pub unsafe trait Signature: Copy + Send + Sync + 'static {
    const ARITY: usize;

    /// Reinterpret `entry` as this function pointer type.
    ///
    /// # Safety
    ///
    /// `entry` must point at executable code following this signature's ABI.
    unsafe fn from_entry(entry: *const u8) -> Self;
}

macro_rules! count {
    () => { 0usize };
    ($head:ident $($tail:ident)*) => { 1usize + count!($($tail)*) };
}

macro_rules! impl_signature {
    ($($arg:ident),*) => {
        unsafe impl<R: 'static, $($arg: 'static),*> Signature for extern "C" fn($($arg),*) -> R {
            const ARITY: usize = count!($($arg)*);

            unsafe fn from_entry(entry: *const u8) -> Self {
                std::mem::transmute_copy::<*const u8, Self>(&entry)
            }
        }

        unsafe impl<R: 'static, $($arg: 'static),*> Signature
            for unsafe extern "C" fn($($arg),*) -> R
        {
            const ARITY: usize = count!($($arg)*);

            unsafe fn from_entry(entry: *const u8) -> Self {
                std::mem::transmute_copy::<*const u8, Self>(&entry)
            }
        }
    };
}

impl_signature!();
impl_signature!(A);
impl_signature!(A, B);
impl_signature!(A, B, C);
impl_signature!(A, B, C, D);
impl_signature!(A, B, C, D, E);
impl_signature!(A, B, C, D, E, G);
