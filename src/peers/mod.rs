pub mod assembler;
pub mod session;

mod comms;
mod error;

pub use comms::*;
pub use error::{FramingError, HandshakeMismatch, PeerError, PeerErrorKind};
pub use session::{PeerConnection, PeerConnector, PeerSession};

use tokio::io::{AsyncRead, AsyncWrite};

pub type PieceIndex = usize;
pub type PieceLength = u32;
type BlockLength = u32;
type BlockOffset = u32;

/// any bidirectional byte stream a peer can be spoken to over.
pub trait PeerStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}
impl<T> PeerStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}
