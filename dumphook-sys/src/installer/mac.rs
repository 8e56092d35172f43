use super::{InstallOptions, PlatformInstaller};
use crate::{
    bridge,
    codec::{self, MAX_PATH_UNITS, MINIDUMP_ID_LEN},
    context::ContextRef,
    fixed_path::FixedPath,
    Error,
};
use parking_lot::Mutex;
use std::{
    mem, ptr,
    sync::{
        atomic::{AtomicPtr, Ordering},
        Arc,
    },
};

/// Exception code breakpad uses for `EXC_SOFTWARE` exceptions caused by `abort()`
const MD_EXCEPTION_CODE_MAC_ABORT: u64 = 0x00010002;

struct DumpTarget {
    directory: Vec<u8>,
    next_id: Mutex<[u8; MINIDUMP_ID_LEN]>,
    context: ContextRef,
}

impl DumpTarget {
    /// Writes `directory/next_id.dmp` and reports it through the bridge
    unsafe fn handle_crash(&self, cc: crash_context::CrashContext) -> bool {
        let mut id = self.next_id.lock();

        let mut path = FixedPath::<u8, MAX_PATH_UNITS>::new();
        let succeeded = codec::compose(&mut path, &self.directory, &*id).is_ok()
            && write_minidump(path.as_nul_terminated(), cc);

        let handled = bridge::deliver_joined(self.context.get(), &self.directory, &*id, succeeded);

        *id = codec::generate_id();
        handled
    }
}

unsafe fn write_minidump(path: &[u8], cc: crash_context::CrashContext) -> bool {
    use std::os::unix::io::FromRawFd;

    let fd = libc::open(
        path.as_ptr().cast::<libc::c_char>(),
        libc::O_CREAT | libc::O_WRONLY | libc::O_TRUNC | libc::O_CLOEXEC,
        0o600,
    );
    if fd == -1 {
        debug_print!("failed to open minidump file");
        return false;
    }

    let mut file = std::fs::File::from_raw_fd(fd);
    let mut writer = minidump_writer::minidump_writer::MinidumpWriter::with_crash_context(cc);

    writer.dump(&mut file).is_ok()
}

/// Hooks Mach exceptions and/or `SIGABRT`, as selected by [`InstallOptions`]
pub struct MacInstaller;

pub struct NativeHandler {
    exception_hook: Option<crash_handler::CrashHandler>,
    abort_hooked: bool,
    target: Arc<DumpTarget>,
}

impl PlatformInstaller for MacInstaller {
    type Native = NativeHandler;

    unsafe fn install(
        directory: &[u8],
        context: ContextRef,
        options: InstallOptions,
    ) -> Result<NativeHandler, Error> {
        let target = Arc::new(DumpTarget {
            directory: directory.to_vec(),
            next_id: Mutex::new(codec::generate_id()),
            context,
        });

        let abort_hooked = if hooks_abort(options) {
            install_abort_handler(&target)?;
            true
        } else {
            false
        };

        let exception_hook = if options.contains(InstallOptions::EXCEPTION_HANDLER) {
            let exc_target = target.clone();
            let on_crash =
                crash_handler::make_crash_event(move |cc: &crash_handler::CrashContext| {
                    // The context only holds port names and exception codes
                    let handled = exc_target.handle_crash(ptr::read(cc));
                    crash_handler::CrashEventResult::Handled(handled)
                });

            match crash_handler::CrashHandler::attach(on_crash) {
                Ok(handler) => Some(handler),
                Err(e) => {
                    if abort_hooked {
                        restore_abort_handler();
                    }
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        Ok(NativeHandler {
            exception_hook,
            abort_hooked,
            target,
        })
    }

    fn uninstall(native: NativeHandler) {
        let NativeHandler {
            exception_hook,
            abort_hooked,
            target,
        } = native;

        drop(exception_hook);

        if abort_hooked {
            unsafe { restore_abort_handler() };
        }

        drop(target);
    }
}

/// Whether our own `SIGABRT` hook is installed. `crash-handler` catches
/// `SIGABRT` itself whenever the exception port is hooked.
fn hooks_abort(options: InstallOptions) -> bool {
    options.contains(InstallOptions::SIGNAL_HANDLER)
        && !options.contains(InstallOptions::EXCEPTION_HANDLER)
}

/// The target of the `SIGABRT` handler. Signal handlers can't carry state so
/// only one can be hooked at a time.
static ABORT_TARGET: AtomicPtr<DumpTarget> = AtomicPtr::new(ptr::null_mut());
static OLD_ABORT_ACTION: Mutex<Option<libc::sigaction>> = parking_lot::const_mutex(None);

unsafe fn install_abort_handler(target: &Arc<DumpTarget>) -> Result<(), Error> {
    let target_ptr = Arc::as_ptr(target).cast_mut();

    if ABORT_TARGET
        .compare_exchange(ptr::null_mut(), target_ptr, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return Err(Error::SignalHook(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "a SIGABRT handler is already installed",
        )));
    }

    let mut sa: libc::sigaction = mem::zeroed();
    libc::sigemptyset(&mut sa.sa_mask);
    libc::sigaddset(&mut sa.sa_mask, libc::SIGABRT);
    sa.sa_sigaction = abort_handler as usize;
    sa.sa_flags = libc::SA_ONSTACK | libc::SA_SIGINFO;

    let mut old: libc::sigaction = mem::zeroed();
    if libc::sigaction(libc::SIGABRT, &sa, &mut old) == -1 {
        let err = std::io::Error::last_os_error();
        ABORT_TARGET.store(ptr::null_mut(), Ordering::Release);
        return Err(Error::SignalHook(err));
    }

    *OLD_ABORT_ACTION.lock() = Some(old);
    Ok(())
}

/// Restores the action that was in place before [`install_abort_handler`],
/// or the default if that isn't possible
unsafe fn restore_abort_handler() {
    ABORT_TARGET.store(ptr::null_mut(), Ordering::Release);

    if let Some(old) = OLD_ABORT_ACTION.lock().take() {
        if libc::sigaction(libc::SIGABRT, &old, ptr::null_mut()) == -1 {
            libc::signal(libc::SIGABRT, libc::SIG_DFL);
        }
    }
}

unsafe extern "C" fn abort_handler(
    _sig: libc::c_int,
    _info: *mut libc::siginfo_t,
    _uc: *mut libc::c_void,
) {
    let target = ABORT_TARGET.load(Ordering::Acquire);
    if target.is_null() {
        libc::signal(libc::SIGABRT, libc::SIG_DFL);
        return;
    }

    let cc = crash_context::CrashContext {
        task: mach2::traps::mach_task_self(),
        thread: mach2::mach_init::mach_thread_self(),
        // The crashing thread is dumping itself, so there is no handler
        // thread to leave out of the dump
        handler_thread: mach2::port::MACH_PORT_NULL,
        exception: Some(crash_context::ExceptionInfo {
            kind: mach2::exception_types::EXC_SOFTWARE as _,
            code: MD_EXCEPTION_CODE_MAC_ABORT,
            subcode: None,
        }),
    };

    let handled = (*target).handle_crash(cc);

    // abort() raises SIGABRT again once we return. If the crash was handled
    // let it take the default action, otherwise give it to whoever was
    // hooked before us
    if handled {
        ABORT_TARGET.store(ptr::null_mut(), Ordering::Release);
        libc::signal(libc::SIGABRT, libc::SIG_DFL);
    } else {
        restore_abort_handler();
    }
}
