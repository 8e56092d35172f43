#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A null directory pointer was passed with a non-zero length
    #[error("the minidump directory pointer is null")]
    NullPath,
    /// The directory leaves no room for the generated minidump file name
    #[error("the minidump directory is {len} code units long, the maximum is {max}")]
    PathTooLong { len: usize, max: usize },
    /// The native crash handler could not be attached
    #[error("unable to attach the native crash handler: {0}")]
    Install(#[from] crash_handler::Error),
    /// The `SIGABRT` handler could not be installed
    #[error("unable to install the abort signal handler: {0}")]
    SignalHook(#[source] std::io::Error),
}
