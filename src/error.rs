#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unable to register crash handler, only one is allowed at a time")]
    HandlerAlreadyRegistered,
    #[error("handler error: {0}")]
    Handler(#[from] dumphook_sys::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
