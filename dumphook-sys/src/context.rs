use crate::{codec::PathChar, DumpCallback};
use std::{ffi::c_void, ptr::NonNull};

/// The user's callback and its opaque context, reachable from the native
/// crash handler while a handler is attached.
pub struct HandlerContext {
    callback: DumpCallback,
    callback_ctx: *mut c_void,
}

// The context is never mutated after construction, and `callback_ctx` is
// only ever handed back to the callback that was registered with it
unsafe impl Send for HandlerContext {}
unsafe impl Sync for HandlerContext {}

impl HandlerContext {
    #[inline]
    pub fn new(callback: DumpCallback, callback_ctx: *mut c_void) -> Self {
        Self {
            callback,
            callback_ctx,
        }
    }

    /// Invokes the callback with the finished minidump path
    #[inline]
    pub fn notify(&self, minidump_path: &[PathChar]) {
        (self.callback)(minidump_path.as_ptr(), minidump_path.len(), self.callback_ctx);
    }
}

/// A borrowed pointer to a [`HandlerContext`] owned by an
/// [`AttachedHandler`](crate::AttachedHandler), given to the native handler
/// for the duration of the attachment.
#[derive(Copy, Clone)]
pub struct ContextRef(NonNull<HandlerContext>);

unsafe impl Send for ContextRef {}
unsafe impl Sync for ContextRef {}

impl ContextRef {
    #[inline]
    pub(crate) fn new(ctx: NonNull<HandlerContext>) -> Self {
        Self(ctx)
    }

    /// # Safety
    ///
    /// The owning handler must not have been detached. Native handlers only
    /// call this from their crash callback, which is unregistered before the
    /// context is freed.
    #[inline]
    pub unsafe fn get(&self) -> &HandlerContext {
        self.0.as_ref()
    }
}
