//! I/O primitives shared across the relay: a transport-uniform [`Conn`],
//! peek-without-consume buffering for protocol detection ([`detect`]), and
//! the [`EitherIo`]/[`PrefixedIo`] building blocks it's built from.

mod conn;
mod detect;
mod either;
mod prefixed;

pub use conn::Conn;
pub use detect::{detect, Detect, DetectError};
pub use either::EitherIo;
pub use prefixed::PrefixedIo;

pub use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
