mod error;
pub use error::Error;

use dumphook_sys::{ActiveCodec, DumpPathCodec, PathChar};
use std::{ffi::c_void, path::PathBuf, sync::atomic};

/// Invoked with the path of the minidump after a crash.
///
/// This runs inside the crash handler, on Linux that means inside a signal
/// handler, so anything beyond the bare minimum (eg. allocating, locking)
/// risks deadlocking or crashing again. Record the path and return.
pub trait CrashEvent: Sync + Send {
    fn on_crash(&self, minidump_path: PathBuf);
}

impl<F> CrashEvent for F
where
    F: Fn(PathBuf) + Send + Sync,
{
    fn on_crash(&self, minidump_path: PathBuf) {
        self(minidump_path)
    }
}

static HANDLER_ATTACHED: atomic::AtomicBool = atomic::AtomicBool::new(false);

/// Determines which handlers are installed to catch errors. These options are
/// only used when targetting MacOS, all other platforms use the only error
/// handler they support
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InstallOptions {
    /// No handlers are registered. This means you won't actually catch any
    /// errors at all.
    NoHandlers,
    /// Registers the exception handler. On Mac, this means that traditional
    /// Unix signals will **NOT** be sent, which can interfere with normal
    /// operations of your program if it is indeed trying to hook into signal
    /// handlers, eg wasmtime.
    ExceptionHandler,
    /// Registers the `SIGABRT` signal handler, so that `abort()` writes a
    /// minidump. Other signal handlers can interoperate with it by
    /// installing themselves **AFTER** it and restoring it when they are
    /// finished with their own signal handling.
    SignalHandler,
    /// Installs both the ExceptionHandler and SignalHandler, but this has all
    /// of the caveats of the ExceptionHandler.
    BothHandlers,
}

impl From<InstallOptions> for dumphook_sys::InstallOptions {
    fn from(io: InstallOptions) -> Self {
        let raw = match io {
            InstallOptions::NoHandlers => dumphook_sys::INSTALL_NO_HANDLER,
            InstallOptions::ExceptionHandler => dumphook_sys::INSTALL_EXCEPTION_HANDLER,
            InstallOptions::SignalHandler => dumphook_sys::INSTALL_SIGNAL_HANDLER,
            InstallOptions::BothHandlers => dumphook_sys::INSTALL_BOTH_HANDLERS,
        };

        Self::from_raw(raw)
    }
}

pub struct DumpHandler {
    handler: Option<dumphook_sys::AttachedHandler>,
    on_crash: *mut c_void,
}

unsafe impl Send for DumpHandler {}
unsafe impl Sync for DumpHandler {}

extern "C" fn crash_callback(path: *const PathChar, path_len: usize, ctx: *mut c_void) {
    let path_slice = unsafe { std::slice::from_raw_parts(path, path_len) };
    let path = ActiveCodec::decode(path_slice);

    let on_crash = unsafe { &*ctx.cast::<Box<dyn CrashEvent>>() };
    on_crash.on_crash(path);
}

impl DumpHandler {
    /// Sets up a crash handler to catch exceptions/signals, writing out
    /// a minidump to the designated directory if a crash occurs. The directory
    /// is created if it doesn't exist. Only one handler can be attached at a
    /// time
    pub fn attach<P: AsRef<std::path::Path>>(
        crash_dir: P,
        install_opts: InstallOptions,
        on_crash: Box<dyn CrashEvent>,
    ) -> Result<Self, Error> {
        if HANDLER_ATTACHED
            .compare_exchange(
                false,
                true,
                atomic::Ordering::Acquire,
                atomic::Ordering::Relaxed,
            )
            .is_err()
        {
            return Err(Error::HandlerAlreadyRegistered);
        }

        let res = Self::attach_inner(crash_dir.as_ref(), install_opts, on_crash);
        if res.is_err() {
            HANDLER_ATTACHED.store(false, atomic::Ordering::Release);
        }
        res
    }

    fn attach_inner(
        crash_dir: &std::path::Path,
        install_opts: InstallOptions,
        on_crash: Box<dyn CrashEvent>,
    ) -> Result<Self, Error> {
        std::fs::create_dir_all(crash_dir)?;

        let path = ActiveCodec::encode(crash_dir);
        let on_crash = Box::into_raw(Box::new(on_crash)).cast::<c_void>();

        let handler = unsafe {
            dumphook_sys::AttachedHandler::<dumphook_sys::ActiveInstaller>::attach(
                &path,
                crash_callback,
                on_crash,
                install_opts.into(),
            )
        };

        match handler {
            Ok(handler) => {
                log::debug!("writing minidumps to '{}'", crash_dir.display());
                Ok(Self {
                    handler: Some(handler),
                    on_crash,
                })
            }
            Err(e) => {
                unsafe { drop(Box::from_raw(on_crash.cast::<Box<dyn CrashEvent>>())) };
                Err(e.into())
            }
        }
    }

    /// Runs the crash handling path, including writing a minidump and
    /// invoking the [`CrashEvent`], without an actual crash. Returns whether
    /// the minidump was written.
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "windows"))]
    pub fn simulate_crash(&self) -> bool {
        let Some(handler) = &self.handler else {
            return false;
        };

        simulate_on(handler.native())
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
#[inline]
fn simulate_on(native: &dumphook_sys::NativeHandler) -> bool {
    native.simulate_signal(dumphook_sys::Signal::Segv)
}

#[cfg(target_os = "windows")]
#[inline]
fn simulate_on(native: &dumphook_sys::NativeHandler) -> bool {
    native.simulate_exception(None)
}

impl Drop for DumpHandler {
    fn drop(&mut self) {
        // Detach before freeing the event the native handler reports to
        drop(self.handler.take());

        unsafe { drop(Box::from_raw(self.on_crash.cast::<Box<dyn CrashEvent>>())) };
        HANDLER_ATTACHED.store(false, atomic::Ordering::Release);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn maps_install_options() {
        assert_eq!(
            dumphook_sys::InstallOptions::from(InstallOptions::NoHandlers),
            dumphook_sys::InstallOptions::empty()
        );
        assert_eq!(
            dumphook_sys::InstallOptions::from(InstallOptions::ExceptionHandler),
            dumphook_sys::InstallOptions::EXCEPTION_HANDLER
        );
        assert_eq!(
            dumphook_sys::InstallOptions::from(InstallOptions::SignalHandler),
            dumphook_sys::InstallOptions::SIGNAL_HANDLER
        );
        assert_eq!(
            dumphook_sys::InstallOptions::from(InstallOptions::BothHandlers),
            dumphook_sys::InstallOptions::all()
        );
    }
}
