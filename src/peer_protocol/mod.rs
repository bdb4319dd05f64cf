pub mod codec;
pub mod handshake;

pub use codec::{upgrade_stream, PeerFrames, PeerMessage, PeerMessageCodec};
pub use handshake::{receive_handshake, send_handshake, PeerHandshake};
