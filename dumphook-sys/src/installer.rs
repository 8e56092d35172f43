use crate::{codec::PathChar, context::ContextRef, Error};

bitflags::bitflags! {
    /// Selects which fault sources are hooked. Only MacOS distinguishes
    /// between them, every other platform hooks everything it supports.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct InstallOptions: u32 {
        /// Mach exception ports
        const EXCEPTION_HANDLER = 0x1;
        /// The `SIGABRT` signal handler
        const SIGNAL_HANDLER = 0x2;
    }
}

impl InstallOptions {
    /// Converts the raw bitmask received over the C ABI, unknown bits are
    /// discarded
    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        Self::from_bits_truncate(raw)
    }
}

/// Builds the native crash handler for a platform and wires it to the
/// crash callback bridge.
pub trait PlatformInstaller {
    /// The native handler, hooked until passed to [`Self::uninstall`]
    type Native;

    /// Hooks the platform's fault sources so that minidumps are written to
    /// `directory` and reported through `context`.
    ///
    /// # Safety
    ///
    /// `context` must stay valid until the returned handler is uninstalled.
    unsafe fn install(
        directory: &[PathChar],
        context: ContextRef,
        options: InstallOptions,
    ) -> Result<Self::Native, Error>;

    /// Unhooks the fault sources. Once this returns the context given to
    /// [`Self::install`] is no longer referenced.
    fn uninstall(native: Self::Native);
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        mod linux;

        pub use linux::{LinuxInstaller as ActiveInstaller, NativeHandler};
    } else if #[cfg(target_os = "windows")] {
        mod windows;

        pub use windows::{WindowsInstaller as ActiveInstaller, NativeHandler};
    } else if #[cfg(target_os = "macos")] {
        mod mac;

        pub use mac::{MacInstaller as ActiveInstaller, NativeHandler};
    } else {
        compile_error!("dumphook-sys only supports Windows, MacOS, Linux and Android");
    }
}
