use thiserror::Error;

/// Crate error type.
///
/// The coder and model are pure transformations; they surface errors to the
/// driving compressor/decompressor, which reports them to the caller. The
/// escape-symbol round trip is a protocol signal, not an error, and is
/// expressed in the APIs of [`crate::stats`] instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Installing another symbol would exhaust the frequency budget and make
    /// halving loop forever.
    #[error("too many symbols installed in statistical context")]
    TooManySymbols,

    /// A memory limit was exceeded (e.g. the decoder's rule registry).
    #[error("memory limit exceeded: {0}")]
    NoMemory(&'static str),

    /// The outstanding-bits counter passed its bound. Only reachable on
    /// pathological streams hundreds of megabytes of identical bits long.
    #[error("outstanding bit count exceeded limit - input too large")]
    OutputSaturated,

    /// The decoder observed an impossible state or ran past the permitted
    /// end of input.
    #[error("corrupt compressed input: {0}")]
    CorruptInput(&'static str),

    /// Rejected configuration parameters.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// General IO error from the underlying byte sink or source.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
