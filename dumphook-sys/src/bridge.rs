//! Crash time entry points used by the native handlers to report a written
//! minidump. These run inside the crash handler, on Linux that means inside a
//! signal handler, so nothing here allocates, locks or formats.

use crate::{
    codec::{self, PathChar, MAX_PATH_UNITS},
    context::HandlerContext,
    fixed_path::FixedPath,
};

/// Reports a minidump written to `directory/minidump_id.dmp`.
///
/// Returns `succeeded` unchanged. If the path doesn't fit in
/// [`MAX_PATH_UNITS`] the callback is skipped.
#[cfg_attr(any(target_os = "linux", target_os = "android"), allow(dead_code))]
pub(crate) fn deliver_joined(
    ctx: &HandlerContext,
    directory: &[PathChar],
    minidump_id: &[PathChar],
    succeeded: bool,
) -> bool {
    let mut dump_path = FixedPath::<PathChar, MAX_PATH_UNITS>::new();

    if codec::compose(&mut dump_path, directory, minidump_id).is_err() {
        debug_print!("minidump path exceeds capacity, skipping callback");
        return succeeded;
    }

    ctx.notify(dump_path.as_slice());
    succeeded
}

/// Reports a minidump whose complete path was produced by the native handler.
///
/// Returns `succeeded` unchanged.
#[cfg_attr(not(any(target_os = "linux", target_os = "android")), allow(dead_code))]
pub(crate) fn deliver_complete(
    ctx: &HandlerContext,
    minidump_path: &[PathChar],
    succeeded: bool,
) -> bool {
    ctx.notify(minidump_path);
    succeeded
}

#[cfg(test)]
mod test {
    use super::*;
    use parking_lot::Mutex;
    use std::ffi::c_void;

    struct Recorded {
        paths: Mutex<Vec<Vec<PathChar>>>,
    }

    extern "C" fn record(path: *const PathChar, len: usize, ctx: *mut c_void) {
        let recorded = unsafe { &*ctx.cast::<Recorded>() };
        let path = unsafe { std::slice::from_raw_parts(path, len) };
        recorded.paths.lock().push(path.to_vec());
    }

    fn units(s: &str) -> Vec<PathChar> {
        s.bytes().map(<PathChar as codec::CodeUnit>::from_ascii).collect()
    }

    #[test]
    fn joins_and_passes_through() {
        let recorded = Recorded {
            paths: Mutex::new(Vec::new()),
        };
        let ctx = HandlerContext::new(record, (&recorded as *const Recorded).cast_mut().cast());

        assert!(deliver_joined(&ctx, &units("/tmp/dumps"), &units("id-1"), true));
        assert!(!deliver_joined(&ctx, &units("/tmp/dumps"), &units("id-2"), false));

        let paths = recorded.paths.lock();
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0], units("/tmp/dumps/id-1.dmp"));
        assert_eq!(paths[1], units("/tmp/dumps/id-2.dmp"));
    }

    #[test]
    fn skips_callback_on_overflow() {
        let recorded = Recorded {
            paths: Mutex::new(Vec::new()),
        };
        let ctx = HandlerContext::new(record, (&recorded as *const Recorded).cast_mut().cast());

        let huge = units(&"d".repeat(MAX_PATH_UNITS));
        assert!(deliver_joined(&ctx, &huge, &units("id"), true));
        assert!(recorded.paths.lock().is_empty());
    }

    #[test]
    fn complete_path_is_forwarded_verbatim() {
        let recorded = Recorded {
            paths: Mutex::new(Vec::new()),
        };
        let ctx = HandlerContext::new(record, (&recorded as *const Recorded).cast_mut().cast());

        let path = units("/tmp/dumps/0b9c1f9e.dmp");
        assert!(!deliver_complete(&ctx, &path, false));
        assert_eq!(recorded.paths.lock().as_slice(), &[path]);
    }
}
