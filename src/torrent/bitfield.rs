use bitvec::{order::Msb0, prelude as bv};

// bitfields sent on the peer messages codec are big endian byte order (i.e Most significant bit
// first), bit i of byte b is piece 8 * b + i.
pub type Bitfield = bv::BitVec<u8, Msb0>;

/// indices of every set bit, i.e every piece the peer claims to have.
pub fn available_pieces(bitfield: &Bitfield) -> Vec<usize> {
    bitfield.iter_ones().collect()
}
