use super::{InstallOptions, PlatformInstaller};
use crate::{
    bridge,
    codec::{self, MAX_PATH_UNITS},
    context::ContextRef,
    fixed_path::FixedPath,
    Error,
};
use parking_lot::Mutex;
use std::{mem, ptr, sync::Arc};

/// Decides where the next minidump is written. The full path is computed
/// ahead of time so that the signal handler only needs to open it.
struct MinidumpDescriptor {
    directory: Vec<u8>,
    path: Mutex<FixedPath<u8, MAX_PATH_UNITS>>,
}

impl MinidumpDescriptor {
    fn new(directory: &[u8]) -> Self {
        let descriptor = Self {
            directory: directory.to_vec(),
            path: Mutex::new(FixedPath::new()),
        };
        descriptor.update_path();
        descriptor
    }

    /// Picks a new id for the next minidump
    fn update_path(&self) {
        let id = codec::generate_id::<u8>();
        let mut path = self.path.lock();
        // The directory length was validated on attach
        if codec::compose(&mut path, &self.directory, &id).is_err() {
            path.clear();
        }
    }
}

/// Hooks the fatal signals via `crash-handler`
pub struct LinuxInstaller;

pub struct NativeHandler {
    handler: crash_handler::CrashHandler,
}

impl NativeHandler {
    /// Runs the crash path for `signal` as if it had been raised on the
    /// current thread, returning the result of the callback bridge.
    pub fn simulate_signal(&self, signal: crash_handler::Signal) -> bool {
        matches!(
            self.handler.simulate_signal(signal as u32),
            crash_handler::CrashEventResult::Handled(true)
        )
    }
}

impl PlatformInstaller for LinuxInstaller {
    type Native = NativeHandler;

    unsafe fn install(
        directory: &[u8],
        context: ContextRef,
        _options: InstallOptions,
    ) -> Result<NativeHandler, Error> {
        let descriptor = Arc::new(MinidumpDescriptor::new(directory));

        let on_crash = crash_handler::make_crash_event(move |cc: &crash_handler::CrashContext| {
            let handled = {
                let mut path = descriptor.path.lock();
                let succeeded = write_minidump(path.as_nul_terminated(), cc);

                bridge::deliver_complete(context.get(), path.as_slice(), succeeded)
            };

            descriptor.update_path();
            crash_handler::CrashEventResult::Handled(handled)
        });

        let handler = crash_handler::CrashHandler::attach(on_crash)?;
        Ok(NativeHandler { handler })
    }

    fn uninstall(native: NativeHandler) {
        // Dropping the crash-handler restores the previous signal handlers
        // and frees the crash event, along with the descriptor it holds
        drop(native);
    }
}

const CHILD_STACK_SIZE: usize = 1024 * 1024;

struct ThreadArgument {
    /// The crashing process
    pid: libc::pid_t,
    context: *const crash_handler::CrashContext,
    /// The already opened minidump file
    fd: libc::c_int,
    pipe_read: libc::c_int,
    pipe_write: libc::c_int,
}

/// Entry point of the cloned child that writes the minidump. A process can't
/// ptrace its own threads, so the crashing process is dumped from a child.
extern "C" fn thread_entry(ta: *mut libc::c_void) -> libc::c_int {
    use std::os::unix::io::FromRawFd;

    unsafe {
        let ta = &*ta.cast::<ThreadArgument>();

        // Close the write end of the pipe. This allows us to fail if the parent
        // dies while waiting for the continue signal.
        libc::close(ta.pipe_write);

        // Block here until the crashing process unblocks us when we're
        // allowed to use ptrace
        let mut received = 0u8;
        loop {
            let res = libc::read(
                ta.pipe_read,
                (&mut received as *mut u8).cast::<libc::c_void>(),
                mem::size_of::<u8>(),
            );

            if res == -1 && nix::errno::Errno::last() == nix::errno::Errno::EINTR {
                continue;
            }

            break;
        }

        libc::close(ta.pipe_read);

        let cc = &*ta.context;
        let mut file = std::fs::File::from_raw_fd(ta.fd);

        let mut writer = minidump_writer::minidump_writer::MinidumpWriter::new(ta.pid, cc.tid);
        // The context is plain data copied into this process by clone
        writer.set_crash_context(minidump_writer::crash_context::CrashContext {
            inner: ptr::read(cc),
        });

        match writer.dump(&mut file) {
            Ok(_) => 0,
            Err(_) => 1,
        }
    }
}

/// Writes a minidump for the crashing process to the nul terminated `path`,
/// returning true if the dump was written.
///
/// Runs in a compromised context.
unsafe fn write_minidump(path: &[u8], cc: &crash_handler::CrashContext) -> bool {
    let fd = libc::open(
        path.as_ptr().cast::<libc::c_char>(),
        libc::O_CREAT | libc::O_WRONLY | libc::O_TRUNC | libc::O_CLOEXEC,
        0o600,
    );
    if fd == -1 {
        debug_print!("failed to open minidump file");
        return false;
    }

    let stack = libc::mmap(
        ptr::null_mut(),
        CHILD_STACK_SIZE,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANON,
        -1,
        0,
    );
    if stack == libc::MAP_FAILED {
        libc::close(fd);
        return false;
    }

    // We need to explicitly enable ptrace of parent processes on some
    // kernels, but we need to know the PID of the cloned process before we
    // can do this. Create a pipe here which we can use to block the cloned
    // process after creating it, until we have explicitly enabled ptrace
    let mut fds = [-1, -1];
    if libc::pipe(fds.as_mut_ptr()) == -1 {
        // Carry on anyway, the handshake will fail with EBADF but the child
        // will still attempt the dump
        debug_print!("failed to create handshake pipe");
        fds = [-1, -1];
    }

    let [pipe_read, pipe_write] = fds;

    let mut thread_args = ThreadArgument {
        pid: cc.pid,
        context: cc,
        fd,
        pipe_read,
        pipe_write,
    };

    // clone() needs the top-most address
    let stack_top = stack.cast::<u8>().add(CHILD_STACK_SIZE);

    let child = libc::clone(
        thread_entry,
        stack_top.cast::<libc::c_void>(),
        libc::CLONE_FS | libc::CLONE_UNTRACED,
        (&mut thread_args as *mut ThreadArgument).cast::<libc::c_void>(),
    );

    let succeeded = if child == -1 {
        libc::close(pipe_read);
        libc::close(pipe_write);
        false
    } else {
        libc::close(pipe_read);
        // Allow the child to ptrace us
        libc::prctl(libc::PR_SET_PTRACER, child as libc::c_ulong, 0, 0, 0);

        let ok_to_continue = b'a';
        loop {
            let res = libc::write(
                pipe_write,
                (&ok_to_continue as *const u8).cast::<libc::c_void>(),
                mem::size_of::<u8>(),
            );

            if res == -1 && nix::errno::Errno::last() == nix::errno::Errno::EINTR {
                continue;
            }

            break;
        }

        use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};

        let status = loop {
            match waitpid(nix::unistd::Pid::from_raw(child), Some(WaitPidFlag::__WALL)) {
                Err(nix::errno::Errno::EINTR) => continue,
                other => break other,
            }
        };

        libc::close(pipe_write);

        matches!(status, Ok(WaitStatus::Exited(_, 0)))
    };

    libc::munmap(stack, CHILD_STACK_SIZE);
    libc::close(fd);

    if !succeeded {
        debug_print!("minidump child failed");
    }

    succeeded
}
