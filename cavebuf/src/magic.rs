//! Buffer start tag.

/// Byte pattern written at the start of every buffer.
///
/// The value is fixed at build time so that independently loaded modules
/// agree on it, and random enough that it will not occur incidentally in
/// code or uninitialized memory. It must never be randomized per process;
/// discovery across modules depends on every participant using the same
/// constant.
pub const BUFFER_MAGIC: [u8; 16] = [
    0xC6, 0x11, 0x5A, 0x9E, 0x3D, 0x7F, 0x24, 0xB8, 0x0B, 0xED, 0x42, 0x96, 0x58, 0xA1, 0x33, 0xF4,
];

pub(crate) const MAGIC_LEN: usize = BUFFER_MAGIC.len();

/// Byte-for-byte comparison against the leading bytes of `bytes`.
pub(crate) fn matches_magic(bytes: &[u8]) -> bool {
    bytes.len() >= MAGIC_LEN && bytes[..MAGIC_LEN] == BUFFER_MAGIC
}
