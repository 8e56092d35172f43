//! Attaches an in-process crash handler that writes a minidump when the
//! process crashes, then reports the minidump's path to a plain C callback.
//!
//! Paths cross the boundary as [`PathChar`] code units: UTF-16 on Windows,
//! bytes everywhere else. The directory given to
//! [`attach_exception_handler`] and the path given to the callback always use
//! the same width.
//!
//! # Crash time restrictions
//!
//! The callback runs inside the crash handler. On Linux and Android this is a
//! signal handler, so allocating, taking locks, formatting strings and most of
//! libc are not safe there. This restriction is inherited from the platform
//! and is not lifted by this crate; do as little as possible in the callback.

/// Writes a literal directly to stderr when the `debug-logs` feature is
/// enabled. Safe to use inside a signal handler.
#[cfg(feature = "debug-logs")]
macro_rules! debug_print {
    ($s:literal) => {
        $crate::write_stderr(concat!("[dumphook] ", $s, "\n"))
    };
}

#[cfg(not(feature = "debug-logs"))]
macro_rules! debug_print {
    ($s:literal) => {};
}

mod bridge;
pub mod codec;
mod context;
mod error;
pub mod fixed_path;
mod handler;
mod installer;

pub use codec::{ActiveCodec, DumpPathCodec, PathChar};
pub use context::{ContextRef, HandlerContext};
pub use error::Error;
pub use handler::AttachedHandler;
pub use installer::{ActiveInstaller, InstallOptions, NativeHandler, PlatformInstaller};

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use crash_handler::Signal;

use std::{ffi::c_void, ptr::NonNull};

/// Writes the specified string directly to stderr.
///
/// This is safe to be called from within a compromised context.
#[cfg(feature = "debug-logs")]
#[inline]
pub fn write_stderr(s: &'static str) {
    unsafe {
        #[cfg(target_os = "windows")]
        libc::write(2, s.as_ptr().cast(), s.len() as u32);

        #[cfg(not(target_os = "windows"))]
        libc::write(2, s.as_ptr().cast(), s.len());
    }
}

/// Invoked after a minidump has been written, with the path + length of the
/// minidump file, along with the callback context given on attach
pub type DumpCallback =
    extern "C" fn(minidump_path: *const PathChar, minidump_path_len: usize, ctx: *mut c_void);

/// No fault sources are hooked
pub const INSTALL_NO_HANDLER: u32 = 0;
/// Hook Mach exceptions (MacOS only)
pub const INSTALL_EXCEPTION_HANDLER: u32 = 1;
/// Hook `SIGABRT` (MacOS only)
pub const INSTALL_SIGNAL_HANDLER: u32 = 2;
/// Hook both Mach exceptions and `SIGABRT` (MacOS only)
pub const INSTALL_BOTH_HANDLERS: u32 = 3;

/// Opaque handle to an attached exception handler
#[repr(C)]
pub struct ExceptionHandler {
    _unused: [u8; 0],
}

/// Creates and attaches an exception handler that will monitor this process
/// for crashes, writing minidumps to the directory `path`.
///
/// `install_options` selects the fault sources to hook on MacOS, see the
/// `INSTALL_*` constants, and is ignored on every other platform.
///
/// Returns null if the handler could not be attached.
///
/// # Safety
///
/// `path` must point to `path_len` valid code units. `callback` is invoked
/// from inside the crash handler, see the crate documentation, and
/// `callback_ctx` must stay valid until the handler is detached.
#[no_mangle]
pub unsafe extern "C" fn attach_exception_handler(
    path: *const PathChar,
    path_len: usize,
    callback: DumpCallback,
    callback_ctx: *mut c_void,
    install_options: u32,
) -> *mut ExceptionHandler {
    let directory = if path_len == 0 {
        &[][..]
    } else if path.is_null() {
        log::error!("failed to attach exception handler: {}", Error::NullPath);
        return std::ptr::null_mut();
    } else {
        std::slice::from_raw_parts(path, path_len)
    };

    match AttachedHandler::<ActiveInstaller>::attach(
        directory,
        callback,
        callback_ctx,
        InstallOptions::from_raw(install_options),
    ) {
        Ok(handler) => handler.into_handle().as_ptr().cast(),
        Err(e) => {
            log::error!("failed to attach exception handler: {}", e);
            std::ptr::null_mut()
        }
    }
}

/// The native handler behind a handle returned by
/// [`attach_exception_handler`], eg. to simulate a crash from Rust.
///
/// # Safety
///
/// `handler` must be null or attached, and stay attached while the returned
/// reference is used.
pub unsafe fn native_handler<'a>(handler: *mut ExceptionHandler) -> Option<&'a NativeHandler> {
    handler
        .cast::<AttachedHandler<ActiveInstaller>>()
        .as_ref()
        .map(AttachedHandler::native)
}

/// Detaches and frees the exception handler. Null handles are ignored.
///
/// Detaching does not wait for a crash being handled on another thread, so
/// only detach once no other thread can crash, eg. during shutdown after
/// joining them.
///
/// # Safety
///
/// `handler` must have been returned by [`attach_exception_handler`] and not
/// already detached.
#[no_mangle]
pub unsafe extern "C" fn detach_exception_handler(handler: *mut ExceptionHandler) {
    if let Some(handle) = NonNull::new(handler.cast::<AttachedHandler<ActiveInstaller>>()) {
        drop(AttachedHandler::from_handle(handle));
    }
}
