use dumphook_sys::{
    attach_exception_handler, detach_exception_handler, ActiveCodec, DumpPathCodec, PathChar,
};
use parking_lot::Mutex;
use std::{
    ffi::c_void,
    sync::atomic::{AtomicUsize, Ordering},
};

/// Only one native handler can be attached per process
static SERIAL: Mutex<()> = parking_lot::const_mutex(());

static CALLS: AtomicUsize = AtomicUsize::new(0);

extern "C" fn count(_path: *const PathChar, _len: usize, _ctx: *mut c_void) {
    CALLS.fetch_add(1, Ordering::SeqCst);
}

fn encoded_tempdir() -> (tempfile::TempDir, Vec<PathChar>) {
    let dir = tempfile::tempdir().unwrap();
    let encoded = ActiveCodec::encode(dir.path());
    (dir, encoded)
}

#[rstest::rstest]
#[case(dumphook_sys::INSTALL_NO_HANDLER)]
#[case(dumphook_sys::INSTALL_EXCEPTION_HANDLER)]
#[case(dumphook_sys::INSTALL_SIGNAL_HANDLER)]
#[case(dumphook_sys::INSTALL_BOTH_HANDLERS)]
#[case(0xffff_0000)]
fn attach_then_detach(#[case] install_options: u32) {
    let _serial = SERIAL.lock();
    let (_dir, path) = encoded_tempdir();

    let before = CALLS.load(Ordering::SeqCst);

    unsafe {
        let handler = attach_exception_handler(
            path.as_ptr(),
            path.len(),
            count,
            std::ptr::null_mut(),
            install_options,
        );
        assert!(!handler.is_null());
        detach_exception_handler(handler);
    }

    assert_eq!(CALLS.load(Ordering::SeqCst), before);
}

#[test]
fn null_path_is_rejected() {
    unsafe {
        let handler =
            attach_exception_handler(std::ptr::null(), 10, count, std::ptr::null_mut(), 0);
        assert!(handler.is_null());
    }
}

#[test]
fn overlong_path_is_rejected() {
    let path = vec![b'a' as PathChar; dumphook_sys::codec::MAX_PATH_UNITS];

    unsafe {
        let handler = attach_exception_handler(
            path.as_ptr(),
            path.len(),
            count,
            std::ptr::null_mut(),
            dumphook_sys::INSTALL_BOTH_HANDLERS,
        );
        assert!(handler.is_null());
    }
}

#[test]
fn detach_null_is_ignored() {
    unsafe { detach_exception_handler(std::ptr::null_mut()) };
}

/// The native handler is process wide, a second attach must fail rather than
/// silently returning a handle that never fires
#[cfg(not(target_os = "macos"))]
#[test]
fn second_attach_fails() {
    let _serial = SERIAL.lock();
    let (_dir, path) = encoded_tempdir();

    unsafe {
        let first = attach_exception_handler(path.as_ptr(), path.len(), count, std::ptr::null_mut(), 0);
        assert!(!first.is_null());

        let second =
            attach_exception_handler(path.as_ptr(), path.len(), count, std::ptr::null_mut(), 0);
        assert!(second.is_null());

        detach_exception_handler(first);

        // Once detached, attaching works again
        let third = attach_exception_handler(path.as_ptr(), path.len(), count, std::ptr::null_mut(), 0);
        assert!(!third.is_null());
        detach_exception_handler(third);
    }
}

/// Every dump the real handler reports, along with the context it was
/// reported with
#[cfg(any(target_os = "linux", target_os = "android", target_os = "windows"))]
#[derive(Default)]
struct Reported {
    dumps: Mutex<Vec<(Vec<PathChar>, usize)>>,
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "windows"))]
extern "C" fn record(path: *const PathChar, len: usize, ctx: *mut c_void) {
    let reported = unsafe { &*ctx.cast::<Reported>() };
    let path = unsafe { std::slice::from_raw_parts(path, len) };
    reported.dumps.lock().push((path.to_vec(), ctx as usize));
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn simulate(native: &dumphook_sys::NativeHandler) -> bool {
    native.simulate_signal(dumphook_sys::Signal::Segv)
}

#[cfg(target_os = "windows")]
fn simulate(native: &dumphook_sys::NativeHandler) -> bool {
    native.simulate_exception(None)
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "windows"))]
#[test]
fn simulated_crash_writes_reported_dump() {
    let _serial = SERIAL.lock();
    let (dir, path) = encoded_tempdir();

    let reported = Reported::default();
    let ctx: *mut c_void = (&reported as *const Reported).cast_mut().cast();

    let written = unsafe {
        let handler = attach_exception_handler(
            path.as_ptr(),
            path.len(),
            record,
            ctx,
            dumphook_sys::INSTALL_BOTH_HANDLERS,
        );
        assert!(!handler.is_null());

        let written = simulate(dumphook_sys::native_handler(handler).unwrap());
        detach_exception_handler(handler);
        written
    };

    let dumps = reported.dumps.lock();
    assert_eq!(dumps.len(), 1);

    let (minidump, delivered_ctx) = &dumps[0];
    assert_eq!(*delivered_ctx, ctx as usize);

    let mut prefix = path.clone();
    prefix.push(b'/' as PathChar);
    let suffix: Vec<PathChar> = ".dmp".bytes().map(PathChar::from).collect();
    assert_eq!(&minidump[..prefix.len()], prefix.as_slice());
    assert_eq!(&minidump[minidump.len() - suffix.len()..], suffix.as_slice());
    assert_eq!(
        minidump.len(),
        prefix.len() + dumphook_sys::codec::MINIDUMP_ID_LEN + suffix.len()
    );

    // The flag given back to the native handler is whether the dump exists
    let minidump = ActiveCodec::decode(minidump);
    assert_eq!(minidump.parent().unwrap(), dir.path());
    let on_disk = std::fs::metadata(&minidump).map_or(false, |md| md.len() > 0);
    assert_eq!(written, on_disk);
}
