use dumphook_sys::{ActiveCodec, DumpPathCodec, PathChar};

fn main() {
    let cur_dir = std::env::current_dir().unwrap();
    let path = ActiveCodec::encode(&cur_dir);

    unsafe {
        extern "C" fn callback(path: *const PathChar, path_len: usize, _ctx: *mut std::ffi::c_void) {
            let path_slice = unsafe { std::slice::from_raw_parts(path, path_len) };
            let path = ActiveCodec::decode(path_slice);

            println!("Crashdump written to {}", path.display());
            match std::fs::remove_file(&path) {
                Ok(_) => {
                    println!("Removed {}", path.display());
                }
                Err(e) => {
                    println!("Failed to remove {}: {}", path.display(), e);
                }
            }
        }

        let exc_handler = dumphook_sys::attach_exception_handler(
            path.as_ptr(),
            path.len(),
            callback,
            std::ptr::null_mut(),
            dumphook_sys::INSTALL_BOTH_HANDLERS,
        );
        assert!(!exc_handler.is_null(), "failed to attach exception handler");

        if std::env::args().any(|a| a == "--crash") {
            let ptr: *mut u8 = std::ptr::null_mut();
            ptr.write_volatile(42);
        }

        dumphook_sys::detach_exception_handler(exc_handler);
    }
}
