use super::{BlockLength, BlockOffset, PeerError, PeerStream, PieceDescriptor, PieceIndex, PieceLength};
use crate::peer_protocol::{PeerFrames, PeerMessage};
use crate::prelude::*;
use crate::torrent::Bitfield;
use futures::SinkExt;
use std::cmp::min;
use tokio_stream::StreamExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRequest {
    pub begin: BlockOffset,
    pub length: BlockLength,
}

/// reassembles one piece from blocks that may arrive in any order.
#[derive(Debug, Clone)]
pub struct PieceAssembler {
    index: PieceIndex,
    piece_length: PieceLength,
    buffer: Vec<u8>,
    block_status: Bitfield,
}

impl PieceAssembler {
    pub const BLOCK_SIZE: u32 = 1 << 14;

    pub fn new(index: PieceIndex, piece_length: PieceLength) -> Self {
        let nblocks = piece_length.div_ceil(Self::BLOCK_SIZE);
        let mut block_status = Bitfield::new();
        block_status.resize(nblocks as usize, false);

        Self {
            index,
            piece_length,
            buffer: vec![0; piece_length as usize],
            block_status,
        }
    }

    pub fn block_count(&self) -> usize {
        self.block_status.len()
    }

    pub fn block_requests(&self) -> impl Iterator<Item = BlockRequest> + '_ {
        (0..self.block_count() as u32).map(|block_id| self.block_info(block_id))
    }

    fn block_info(&self, block_id: u32) -> BlockRequest {
        let begin = block_id * Self::BLOCK_SIZE;
        let length = min(self.piece_length - begin, Self::BLOCK_SIZE);

        BlockRequest { begin, length }
    }

    fn reject(&self, reason: String) -> PeerError {
        warn!(piece = self.index, %reason, "rejecting block");
        PeerError::BlockMismatch {
            piece: self.index,
            reason,
        }
    }

    /// copies a received block into place, the block must be one we requested and not yet
    /// received.
    pub fn place(&mut self, index: u32, begin: BlockOffset, block: &[u8]) -> Result<(), PeerError> {
        if index as usize != self.index {
            return Err(self.reject(format!("block belongs to piece {index}")));
        }

        if begin % Self::BLOCK_SIZE != 0 || begin >= self.piece_length {
            return Err(self.reject(format!("offset {begin} is not a block boundary")));
        }

        let block_id = begin / Self::BLOCK_SIZE;
        let expected = self.block_info(block_id);
        if block.len() != expected.length as usize {
            return Err(self.reject(format!(
                "block at offset {begin} has {} bytes, requested {}",
                block.len(),
                expected.length
            )));
        }

        if self.block_status[block_id as usize] {
            return Err(self.reject(format!("block at offset {begin} received twice")));
        }

        let start = begin as usize;
        self.buffer[start..start + block.len()].copy_from_slice(block);
        self.block_status.set(block_id as usize, true);
        trace!(piece = self.index, begin, "placed block");

        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.block_status.all()
    }

    pub fn into_piece(self) -> Vec<u8> {
        self.buffer
    }
}

/// pipelines every block request for `piece`, then reads exactly one Piece message per block.
pub async fn fetch_piece<S: PeerStream>(
    frames: &mut PeerFrames<S>,
    piece: &PieceDescriptor,
) -> Result<Vec<u8>, PeerError> {
    let mut assembler = PieceAssembler::new(piece.index, piece.length);

    for BlockRequest { begin, length } in assembler.block_requests() {
        trace!(begin, length, "queue block request");
        frames
            .feed(PeerMessage::Request {
                index: piece.index as u32,
                begin,
                length,
            })
            .await?;
    }
    frames.flush().await?;
    debug!(blocks = assembler.block_count(), "block requests sent");

    while !assembler.is_done() {
        let msg = match frames.next().await {
            Some(msg) => msg?,
            None => {
                warn!("peer closed connection before piece could be downloaded");
                return Err(PeerError::ConnectionClosed);
            }
        };

        match msg {
            PeerMessage::Piece {
                index,
                begin,
                block,
            } => assembler.place(index, begin, &block)?,
            other => {
                warn!(received = other.name(), "unexpected message while waiting for blocks");
                return Err(PeerError::ProtocolViolation {
                    expected: "Piece",
                    received: other.name(),
                });
            }
        }
    }

    Ok(assembler.into_piece())
}
