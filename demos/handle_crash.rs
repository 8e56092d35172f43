fn main() {
    let cur_dir = std::env::current_dir().unwrap();

    let _handler = dumphook::DumpHandler::attach(
        cur_dir,
        dumphook::InstallOptions::BothHandlers,
        Box::new(|minidump_path: std::path::PathBuf| {
            println!("Minidump written to {}", minidump_path.display());

            match std::fs::remove_file(&minidump_path) {
                Ok(_) => {
                    println!("Removed {}", minidump_path.display());
                }
                Err(e) => {
                    println!("Failed to remove {}: {}", minidump_path.display(), e);
                }
            }
        }),
    )
    .unwrap();

    unsafe {
        if std::env::args().any(|a| a == "--crash") {
            let ptr: *mut u8 = std::ptr::null_mut();
            ptr.write_volatile(42);
        }
    }
}
