use crate::{
    codec::{self, PathChar, MAX_PATH_UNITS},
    context::{ContextRef, HandlerContext},
    installer::{ActiveInstaller, InstallOptions, PlatformInstaller},
    DumpCallback, Error,
};
use std::{ffi::c_void, ptr::NonNull};

/// An attached crash handler. Owns both the native handler and the context
/// it reports through; dropping it detaches the handler.
pub struct AttachedHandler<I: PlatformInstaller = ActiveInstaller> {
    native: Option<I::Native>,
    context: NonNull<HandlerContext>,
}

unsafe impl<I: PlatformInstaller> Send for AttachedHandler<I> where I::Native: Send {}
unsafe impl<I: PlatformInstaller> Sync for AttachedHandler<I> where I::Native: Sync {}

impl<I: PlatformInstaller> AttachedHandler<I> {
    /// Attaches a crash handler that writes minidumps to `directory` and
    /// invokes `callback` with the path of each one, along with `callback_ctx`.
    ///
    /// # Safety
    ///
    /// `callback` is invoked from inside the crash handler, on Linux that is a
    /// signal handler, where allocating, locking and most of libc are not
    /// safe. `callback_ctx` must remain valid for as long as the handler is
    /// attached.
    pub unsafe fn attach(
        directory: &[PathChar],
        callback: DumpCallback,
        callback_ctx: *mut c_void,
        options: InstallOptions,
    ) -> Result<Self, Error> {
        if codec::required_units(directory.len()) > MAX_PATH_UNITS {
            return Err(Error::PathTooLong {
                len: directory.len(),
                max: MAX_PATH_UNITS - codec::required_units(0),
            });
        }

        let context = NonNull::from(Box::leak(Box::new(HandlerContext::new(
            callback,
            callback_ctx,
        ))));

        match I::install(directory, ContextRef::new(context), options) {
            Ok(native) => {
                log::debug!("attached crash handler ({} path units)", directory.len());
                Ok(Self {
                    native: Some(native),
                    context,
                })
            }
            Err(e) => {
                drop(Box::from_raw(context.as_ptr()));
                Err(e)
            }
        }
    }

    /// The native handler
    #[inline]
    pub fn native(&self) -> &I::Native {
        // Only taken in drop
        match &self.native {
            Some(native) => native,
            None => unreachable!("native handler already uninstalled"),
        }
    }

    /// Hands ownership to a C caller, see [`Self::from_handle`]
    pub(crate) fn into_handle(self) -> NonNull<Self> {
        let handle = NonNull::from(Box::leak(Box::new(self)));
        registry::insert(handle.as_ptr() as usize);
        handle
    }

    /// Takes ownership back from a C caller.
    ///
    /// # Safety
    ///
    /// `handle` must have come from [`Self::into_handle`] and not have been
    /// passed to this function before. In debug builds a violation panics.
    pub(crate) unsafe fn from_handle(handle: NonNull<Self>) -> Box<Self> {
        registry::remove(handle.as_ptr() as usize);
        Box::from_raw(handle.as_ptr())
    }
}

impl<I: PlatformInstaller> Drop for AttachedHandler<I> {
    fn drop(&mut self) {
        // The native handler must be gone before the context it points to
        if let Some(native) = self.native.take() {
            I::uninstall(native);
        }

        unsafe { drop(Box::from_raw(self.context.as_ptr())) };
        log::debug!("detached crash handler");
    }
}

/// Tracks live C handles in debug builds so that a double detach is caught
/// instead of freeing the handler twice
#[cfg(debug_assertions)]
mod registry {
    use parking_lot::Mutex;

    static LIVE_HANDLES: Mutex<Vec<usize>> = parking_lot::const_mutex(Vec::new());

    pub(super) fn insert(handle: usize) {
        LIVE_HANDLES.lock().push(handle);
    }

    pub(super) fn remove(handle: usize) {
        let mut live = LIVE_HANDLES.lock();
        match live.iter().position(|h| *h == handle) {
            Some(ind) => {
                live.swap_remove(ind);
            }
            None => {
                drop(live);
                panic!("exception handler {handle:#x} was already detached, or never attached");
            }
        }
    }
}

#[cfg(not(debug_assertions))]
mod registry {
    #[inline]
    pub(super) fn insert(_handle: usize) {}
    #[inline]
    pub(super) fn remove(_handle: usize) {}
}

#[cfg(test)]
mod test {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records the context of every installed handler instead of hooking
    /// anything, so crashes can be simulated by calling the bridge directly
    struct FakeInstaller;

    struct FakeNative {
        directory: Vec<PathChar>,
        context: ContextRef,
        options: InstallOptions,
    }

    static UNINSTALLED: AtomicUsize = AtomicUsize::new(0);

    impl FakeNative {
        fn simulate_crash(&self, succeeded: bool) -> bool {
            let id = codec::generate_id::<PathChar>();
            unsafe { crate::bridge::deliver_joined(self.context.get(), &self.directory, &id, succeeded) }
        }
    }

    impl PlatformInstaller for FakeInstaller {
        type Native = FakeNative;

        unsafe fn install(
            directory: &[PathChar],
            context: ContextRef,
            options: InstallOptions,
        ) -> Result<FakeNative, Error> {
            Ok(FakeNative {
                directory: directory.to_vec(),
                context,
                options,
            })
        }

        fn uninstall(_native: FakeNative) {
            UNINSTALLED.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FailingInstaller;

    impl PlatformInstaller for FailingInstaller {
        type Native = ();

        unsafe fn install(_: &[PathChar], _: ContextRef, _: InstallOptions) -> Result<(), Error> {
            Err(Error::SignalHook(std::io::Error::from(
                std::io::ErrorKind::PermissionDenied,
            )))
        }

        fn uninstall(_native: ()) {
            unreachable!("nothing was installed");
        }
    }

    #[derive(Default)]
    struct Calls {
        paths: Mutex<Vec<(Vec<PathChar>, usize)>>,
    }

    extern "C" fn on_dump(path: *const PathChar, len: usize, ctx: *mut c_void) {
        let calls = unsafe { &*ctx.cast::<Calls>() };
        let path = unsafe { std::slice::from_raw_parts(path, len) };
        calls.paths.lock().push((path.to_vec(), ctx as usize));
    }

    fn dir(s: &str) -> Vec<PathChar> {
        s.bytes().map(<PathChar as codec::CodeUnit>::from_ascii).collect()
    }

    #[test]
    fn attach_detach_without_crash() {
        let calls = Calls::default();
        let ctx = (&calls as *const Calls).cast_mut().cast();

        let before = UNINSTALLED.load(Ordering::SeqCst);
        let handler = unsafe {
            AttachedHandler::<FakeInstaller>::attach(&dir("/tmp/dumps"), on_dump, ctx, InstallOptions::all())
        }
        .unwrap();
        assert_eq!(handler.native().options, InstallOptions::all());
        drop(handler);

        assert!(UNINSTALLED.load(Ordering::SeqCst) > before);
        assert!(calls.paths.lock().is_empty());
    }

    #[test]
    fn simulated_crash() {
        let calls = Calls::default();
        let ctx: *mut c_void = (&calls as *const Calls).cast_mut().cast();

        let handler = unsafe {
            AttachedHandler::<FakeInstaller>::attach(
                &dir("/tmp/dumps"),
                on_dump,
                ctx,
                InstallOptions::empty(),
            )
        }
        .unwrap();

        assert!(handler.native().simulate_crash(true));
        assert!(!handler.native().simulate_crash(false));
        drop(handler);

        let paths = calls.paths.lock();
        assert_eq!(paths.len(), 2);

        for (path, delivered_ctx) in paths.iter() {
            assert_eq!(*delivered_ctx, ctx as usize);

            let prefix = dir("/tmp/dumps/");
            assert_eq!(&path[..prefix.len()], prefix.as_slice());
            assert_eq!(&path[path.len() - 4..], dir(".dmp").as_slice());
            assert_eq!(path.len(), prefix.len() + codec::MINIDUMP_ID_LEN + 4);
        }

        assert_ne!(paths[0].0, paths[1].0);
    }

    #[test]
    fn install_failure_is_surfaced() {
        let calls = Calls::default();
        let ctx = (&calls as *const Calls).cast_mut().cast();

        let err = unsafe {
            AttachedHandler::<FailingInstaller>::attach(&dir("/tmp"), on_dump, ctx, InstallOptions::all())
        }
        .err()
        .unwrap();
        assert!(matches!(err, Error::SignalHook(_)));
    }

    #[test]
    fn rejects_long_paths() {
        let long = vec![<PathChar as codec::CodeUnit>::from_ascii(b'a'); MAX_PATH_UNITS];

        let err = unsafe {
            AttachedHandler::<FakeInstaller>::attach(
                &long,
                on_dump,
                std::ptr::null_mut(),
                InstallOptions::empty(),
            )
        }
        .err()
        .unwrap();
        assert!(matches!(err, Error::PathTooLong { len, .. } if len == MAX_PATH_UNITS));
    }

    #[test]
    fn handle_round_trip() {
        let handler = unsafe {
            AttachedHandler::<FakeInstaller>::attach(
                &dir("/tmp"),
                on_dump,
                std::ptr::null_mut(),
                InstallOptions::empty(),
            )
        }
        .unwrap();

        let handle = handler.into_handle();
        drop(unsafe { AttachedHandler::<FakeInstaller>::from_handle(handle) });
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "already detached")]
    fn double_detach_is_flagged() {
        let handler = unsafe {
            AttachedHandler::<FakeInstaller>::attach(
                &dir("/tmp"),
                on_dump,
                std::ptr::null_mut(),
                InstallOptions::empty(),
            )
        }
        .unwrap();

        let handle = handler.into_handle();
        drop(unsafe { AttachedHandler::<FakeInstaller>::from_handle(handle) });
        // The registry panics before the freed handle is touched
        drop(unsafe { AttachedHandler::<FakeInstaller>::from_handle(handle) });
    }
}
