use super::{InstallOptions, PlatformInstaller};
use crate::{
    bridge,
    codec::{self, DumpPathCodec, Utf16Codec, MAX_PATH_UNITS, MINIDUMP_ID_LEN},
    context::ContextRef,
    fixed_path::FixedPath,
    Error,
};
use parking_lot::Mutex;
use std::{ptr, sync::Arc};

struct DumpTarget {
    directory: Vec<u16>,
    next_id: Mutex<[u16; MINIDUMP_ID_LEN]>,
    context: ContextRef,
}

impl DumpTarget {
    /// Writes `directory/next_id.dmp` and reports it through the bridge
    unsafe fn handle_crash(&self, cc: &crash_handler::CrashContext) -> bool {
        let mut id = self.next_id.lock();

        let mut path = FixedPath::<u16, MAX_PATH_UNITS>::new();
        let succeeded = codec::compose(&mut path, &self.directory, &*id).is_ok()
            && write_minidump(path.as_slice(), cc);

        let handled = bridge::deliver_joined(self.context.get(), &self.directory, &*id, succeeded);

        *id = codec::generate_id();
        handled
    }
}

unsafe fn write_minidump(path: &[u16], cc: &crash_handler::CrashContext) -> bool {
    // Structured exceptions don't carry the allocation restrictions of a
    // signal handler, so the file is opened through std
    let mut file = match std::fs::File::create(Utf16Codec::decode(path)) {
        Ok(file) => file,
        Err(_) => {
            debug_print!("failed to create minidump file");
            return false;
        }
    };

    // The context is a set of pointers into the crashed thread's state,
    // which stays alive until we return
    minidump_writer::minidump_writer::MinidumpWriter::dump_crash_context(
        ptr::read(cc),
        None,
        &mut file,
    )
    .is_ok()
}

/// Hooks unhandled structured exceptions, along with the abort, pure call
/// and invalid parameter handlers, via `crash-handler`
pub struct WindowsInstaller;

pub struct NativeHandler {
    handler: crash_handler::CrashHandler,
}

impl PlatformInstaller for WindowsInstaller {
    type Native = NativeHandler;

    unsafe fn install(
        directory: &[u16],
        context: ContextRef,
        _options: InstallOptions,
    ) -> Result<NativeHandler, Error> {
        let target = Arc::new(DumpTarget {
            directory: directory.to_vec(),
            next_id: Mutex::new(codec::generate_id()),
            context,
        });

        let on_crash = crash_handler::make_crash_event(move |cc: &crash_handler::CrashContext| {
            crash_handler::CrashEventResult::Handled(target.handle_crash(cc))
        });

        let handler = crash_handler::CrashHandler::attach(on_crash)?;
        Ok(NativeHandler { handler })
    }

    fn uninstall(native: NativeHandler) {
        drop(native);
    }
}

impl NativeHandler {
    /// Runs the crash path as if `exception_code` had been raised on the
    /// current thread, returning the result of the callback bridge.
    pub fn simulate_exception(&self, exception_code: Option<i32>) -> bool {
        matches!(
            self.handler.simulate_exception(exception_code),
            crash_handler::CrashEventResult::Handled(true)
        )
    }
}
