use crate::peers::{FramingError, PeerError, PeerStream};
use crate::torrent::Bitfield;
use tokio_util::{
    bytes::{self, Buf, BufMut},
    codec::{Decoder, Encoder, Framed},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Bitfield),
    Request {
        index: u32,
        begin: u32,
        length: u32,
    },
    Piece {
        index: u32,
        begin: u32,
        block: Vec<u8>,
    },
    Cancel {
        index: u32,
        begin: u32,
        length: u32,
    },
}

impl PeerMessage {
    pub const CHOKE: u8 = 0;
    pub const UNCHOKE: u8 = 1;
    pub const INTERESTED: u8 = 2;
    pub const NOT_INTERESTED: u8 = 3;
    pub const HAVE: u8 = 4;
    pub const BITFIELD: u8 = 5;
    pub const REQUEST: u8 = 6;
    pub const PIECE: u8 = 7;
    pub const CANCEL: u8 = 8;

    /// the message id byte written after the length prefix.
    pub fn tag(&self) -> u8 {
        match self {
            Self::Choke => Self::CHOKE,
            Self::Unchoke => Self::UNCHOKE,
            Self::Interested => Self::INTERESTED,
            Self::NotInterested => Self::NOT_INTERESTED,
            Self::Have(_) => Self::HAVE,
            Self::Bitfield(_) => Self::BITFIELD,
            Self::Request { .. } => Self::REQUEST,
            Self::Piece { .. } => Self::PIECE,
            Self::Cancel { .. } => Self::CANCEL,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Choke => "Choke",
            Self::Unchoke => "Unchoke",
            Self::Interested => "Interested",
            Self::NotInterested => "NotInterested",
            Self::Have(_) => "Have",
            Self::Bitfield(_) => "Bitfield",
            Self::Request { .. } => "Request",
            Self::Piece { .. } => "Piece",
            Self::Cancel { .. } => "Cancel",
        }
    }
}

pub type PeerFrames<S> = Framed<S, PeerMessageCodec>;

pub fn upgrade_stream<S: PeerStream>(stream: S) -> PeerFrames<S> {
    Framed::new(stream, PeerMessageCodec::new())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PeerMessageCodec;

impl PeerMessageCodec {
    const LEN_HEADER_SIZE: usize = std::mem::size_of::<u32>();
    const TAG_SIZE: usize = std::mem::size_of::<u8>();
    // prevent malicious peers from making us buffer arbitrarily large frames.
    pub const MAX_FRAME_SIZE: usize = 1 << 21;

    pub fn new() -> Self {
        Self
    }

    // length of the frame body announced by the prefix, if the prefix has arrived.
    fn peek_frame_len(src: &bytes::BytesMut) -> Option<usize> {
        let header = src.get(..Self::LEN_HEADER_SIZE)?;
        let mut len_bytes = [0u8; Self::LEN_HEADER_SIZE];
        len_bytes.copy_from_slice(header);
        Some(u32::from_be_bytes(len_bytes) as usize)
    }

    // bail if the peer sends less payload than the particular variant requires.
    fn ensure_payload(src: &bytes::BytesMut, tag: u8, min: usize) -> Result<(), FramingError> {
        let len = src.len();
        if len < min {
            return Err(FramingError::PayloadTooShort { tag, len, min });
        }
        Ok(())
    }

    // helper for the Cancel and Request variants only.
    fn decode_triple(src: &mut bytes::BytesMut, tag: u8) -> Result<(u32, u32, u32), FramingError> {
        const TRIPLE_SIZE: usize = 3 * std::mem::size_of::<u32>();
        Self::ensure_payload(src, tag, TRIPLE_SIZE)?;
        Ok((src.get_u32(), src.get_u32(), src.get_u32()))
    }

    fn decode_body(mut body: bytes::BytesMut) -> Result<PeerMessage, FramingError> {
        type PM = PeerMessage;

        let tag = body.get_u8();
        let msg = match tag {
            PM::CHOKE => PM::Choke,
            PM::UNCHOKE => PM::Unchoke,
            PM::INTERESTED => PM::Interested,
            PM::NOT_INTERESTED => PM::NotInterested,
            PM::HAVE => {
                Self::ensure_payload(&body, tag, std::mem::size_of::<u32>())?;
                PM::Have(body.get_u32())
            }
            // any amount of bytes is a valid bitfield
            PM::BITFIELD => PM::Bitfield(Bitfield::from_slice(&body)),
            PM::REQUEST => {
                let (index, begin, length) = Self::decode_triple(&mut body, tag)?;
                PM::Request {
                    index,
                    begin,
                    length,
                }
            }
            PM::PIECE => {
                Self::ensure_payload(&body, tag, 2 * std::mem::size_of::<u32>())?;
                PM::Piece {
                    index: body.get_u32(),
                    begin: body.get_u32(),
                    block: body.to_vec(),
                }
            }
            PM::CANCEL => {
                let (index, begin, length) = Self::decode_triple(&mut body, tag)?;
                PM::Cancel {
                    index,
                    begin,
                    length,
                }
            }
            _ => return Err(FramingError::UnknownTag(tag)),
        };

        Ok(msg)
    }
}

impl Decoder for PeerMessageCodec {
    type Item = PeerMessage;
    type Error = PeerError;

    fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(frame_len) = Self::peek_frame_len(src) else {
            // more bytes need to be read before the length prefix is known.
            return Ok(None);
        };

        if frame_len == 0 {
            return Err(FramingError::ZeroLength.into());
        }

        if frame_len > Self::MAX_FRAME_SIZE {
            return Err(FramingError::Oversized {
                len: frame_len,
                max: Self::MAX_FRAME_SIZE,
            }
            .into());
        }

        let total_len = Self::LEN_HEADER_SIZE + frame_len;
        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        src.advance(Self::LEN_HEADER_SIZE);
        let body = src.split_to(frame_len);

        Ok(Some(Self::decode_body(body)?))
    }

    fn decode_eof(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(msg) = self.decode(src)? {
            return Ok(Some(msg));
        }

        if src.is_empty() {
            return Ok(None);
        }

        let expected = Self::peek_frame_len(src)
            .map_or(Self::LEN_HEADER_SIZE, |len| Self::LEN_HEADER_SIZE + len);
        Err(FramingError::Truncated {
            expected,
            available: src.len(),
        }
        .into())
    }
}

impl Encoder<PeerMessage> for PeerMessageCodec {
    type Error = PeerError;

    fn encode(&mut self, item: PeerMessage, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
        const U32_SIZE: usize = std::mem::size_of::<u32>();
        let tag = item.tag();

        let payload_len = match &item {
            PeerMessage::Choke
            | PeerMessage::Unchoke
            | PeerMessage::Interested
            | PeerMessage::NotInterested => 0,
            PeerMessage::Have(_) => U32_SIZE,
            PeerMessage::Request { .. } | PeerMessage::Cancel { .. } => 3 * U32_SIZE,
            PeerMessage::Piece { block, .. } => 2 * U32_SIZE + block.len(),
            PeerMessage::Bitfield(bitfield) => bitfield.as_raw_slice().len(),
        };

        let frame_len = Self::TAG_SIZE + payload_len;
        if frame_len > Self::MAX_FRAME_SIZE {
            return Err(FramingError::Oversized {
                len: frame_len,
                max: Self::MAX_FRAME_SIZE,
            }
            .into());
        }

        dst.reserve(Self::LEN_HEADER_SIZE + frame_len);
        dst.put_u32(frame_len as u32);
        dst.put_u8(tag);

        type PM = PeerMessage;
        match item {
            PM::Choke | PM::Unchoke | PM::Interested | PM::NotInterested => {}
            PM::Have(index) => dst.put_u32(index),
            PM::Request {
                index,
                begin,
                length,
            }
            | PM::Cancel {
                index,
                begin,
                length,
            } => {
                dst.put_u32(index);
                dst.put_u32(begin);
                dst.put_u32(length);
            }
            PM::Piece {
                index,
                begin,
                block,
            } => {
                dst.put_u32(index);
                dst.put_u32(begin);
                dst.put(block.as_slice());
            }
            PM::Bitfield(bitfield) => dst.put(bitfield.as_raw_slice()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use rstest::rstest;
    use tokio_test::io::Builder;
    use tokio_util::bytes::BytesMut;
    use tokio_util::codec::FramedRead;

    fn encode(msg: PeerMessage) -> BytesMut {
        let mut buffer = BytesMut::new();
        PeerMessageCodec::new()
            .encode(msg, &mut buffer)
            .expect("encoding into memory does not fail");
        buffer
    }

    #[rstest]
    #[case(PeerMessage::Choke)]
    #[case(PeerMessage::Unchoke)]
    #[case(PeerMessage::Interested)]
    #[case(PeerMessage::NotInterested)]
    #[case(PeerMessage::Have(42))]
    #[case(PeerMessage::Bitfield(Bitfield::from_slice(&[0b1010_0000, 0xff])))]
    #[case(PeerMessage::Request { index: 1, begin: 16384, length: 3616 })]
    #[case(PeerMessage::Piece { index: 9, begin: 0, block: vec![1, 2, 3, 4, 5] })]
    #[case(PeerMessage::Cancel { index: 3, begin: 0, length: 16384 })]
    fn test_decode_inverts_encode(#[case] msg: PeerMessage) {
        let mut buffer = encode(msg.clone());
        let decoded = PeerMessageCodec::new().decode(&mut buffer).unwrap();
        assert_eq!(decoded, Some(msg));
        assert!(buffer.is_empty(), "decode must consume exactly one frame");
    }

    #[rstest]
    fn test_request_wire_layout() {
        let buffer = encode(PeerMessage::Request {
            index: 1,
            begin: 0x4000,
            length: 0x0e20,
        });
        assert_eq!(
            &buffer[..],
            &[0, 0, 0, 13, 6, 0, 0, 0, 1, 0, 0, 0x40, 0, 0, 0, 0x0e, 0x20]
        );
    }

    #[rstest]
    fn test_interested_wire_layout() {
        assert_eq!(&encode(PeerMessage::Interested)[..], &[0, 0, 0, 1, 2]);
    }

    #[rstest]
    fn test_partial_frame_waits_without_consuming() {
        let full = encode(PeerMessage::Have(7));
        let mut partial = BytesMut::from(&full[..full.len() - 1]);

        let decoded = PeerMessageCodec::new().decode(&mut partial).unwrap();
        assert_eq!(decoded, None);
        assert_eq!(&partial[..], &full[..full.len() - 1]);
    }

    #[rstest]
    fn test_truncated_frame_at_eof_is_framing_error() {
        let full = encode(PeerMessage::Piece {
            index: 0,
            begin: 0,
            block: vec![7; 32],
        });
        let mut truncated = BytesMut::from(&full[..20]);

        let err = PeerMessageCodec::new()
            .decode_eof(&mut truncated)
            .unwrap_err();
        assert!(matches!(
            err,
            PeerError::Framing(FramingError::Truncated {
                expected: 45,
                available: 20
            })
        ));
        assert_eq!(truncated.len(), 20);
    }

    #[rstest]
    fn test_truncated_length_prefix_is_framing_error() {
        let mut truncated = BytesMut::from(&[0u8, 0][..]);
        let err = PeerMessageCodec::new()
            .decode_eof(&mut truncated)
            .unwrap_err();
        assert!(matches!(
            err,
            PeerError::Framing(FramingError::Truncated {
                expected: 4,
                available: 2
            })
        ));
    }

    #[rstest]
    fn test_keep_alive_is_framing_error() {
        let mut buffer = BytesMut::from(&[0u8, 0, 0, 0][..]);
        let err = PeerMessageCodec::new().decode(&mut buffer).unwrap_err();
        assert!(matches!(err, PeerError::Framing(FramingError::ZeroLength)));
    }

    #[rstest]
    #[case(&[0, 0, 0, 1, 9], FramingError::UnknownTag(9))]
    #[case(&[0, 0, 0, 3, 4, 0, 1], FramingError::PayloadTooShort { tag: 4, len: 2, min: 4 })]
    #[case(&[0, 0, 0, 5, 7, 0, 0, 0, 1], FramingError::PayloadTooShort { tag: 7, len: 4, min: 8 })]
    #[case(&[0, 0x40, 0, 0, 7], FramingError::Oversized { len: 1 << 22, max: 1 << 21 })]
    fn test_malformed_frames(#[case] bytes: &[u8], #[case] expected: FramingError) {
        let mut buffer = BytesMut::from(bytes);
        match PeerMessageCodec::new().decode(&mut buffer) {
            Err(PeerError::Framing(err)) => assert_eq!(err, expected),
            other => panic!("expected framing error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reads_frames_split_across_reads() {
        let first = encode(PeerMessage::Unchoke);
        let second = encode(PeerMessage::Piece {
            index: 2,
            begin: 16384,
            block: vec![0xab; 10],
        });

        let mock = Builder::new()
            .read(&first[..2])
            .read(&first[2..])
            .read(&second[..7])
            .read(&second[7..])
            .build();
        let mut frames = FramedRead::new(mock, PeerMessageCodec::new());

        assert_eq!(frames.next().await.unwrap().unwrap(), PeerMessage::Unchoke);
        assert_eq!(
            frames.next().await.unwrap().unwrap(),
            PeerMessage::Piece {
                index: 2,
                begin: 16384,
                block: vec![0xab; 10],
            }
        );
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_closed_mid_frame() {
        let frame = encode(PeerMessage::Have(1));
        let mock = Builder::new().read(&frame[..6]).build();
        let mut frames = FramedRead::new(mock, PeerMessageCodec::new());

        let err = frames.next().await.unwrap().unwrap_err();
        assert!(matches!(err, PeerError::Framing(FramingError::Truncated { .. })));
    }
}
