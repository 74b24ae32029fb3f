//! Update descriptors and diff generation.
//!
//! An update descriptor enumerates the byte ranges of a value payload a
//! same-size update touches. It is serialized inline with every delta
//! (secondary versions, WAL update records), and it drives four byte-span
//! walks:
//!
//! - `generate_diff`: gather the described spans of `src` into `dst`
//!   (forward diff: the pre-image of the touched ranges)
//! - `generate_xor_diff`: XOR the described spans of `src` into `dst`;
//!   run over a forward diff with the post-image as `src`, the diff
//!   becomes `old XOR new`
//! - `apply_diff`: scatter `src` back into the described spans of `dst`
//! - `apply_xor_diff`: XOR `src` into the described spans of `dst`;
//!   XOR-diff bytes applied to the post-image recover the pre-image

use chain_common::{ChainError, ChainResult};

/// One touched byte range of the value payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffSlot {
    /// Byte offset into the value payload.
    pub offset: u16,
    /// Length of the touched range.
    pub length: u16,
}

/// An ordered list of touched byte ranges.
///
/// Serialized form: `count: u16` followed by `count` pairs of
/// `offset: u16, length: u16`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateDescriptor {
    slots: Vec<DiffSlot>,
}

impl UpdateDescriptor {
    /// Creates a descriptor from slots. Slots must be sorted by offset
    /// and non-overlapping.
    #[must_use]
    pub fn new(slots: Vec<DiffSlot>) -> Self {
        debug_assert!(slots
            .windows(2)
            .all(|w| w[0].offset as u32 + w[0].length as u32 <= w[1].offset as u32));
        Self { slots }
    }

    /// Creates a descriptor covering a single range.
    #[must_use]
    pub fn single(offset: u16, length: u16) -> Self {
        Self::new(vec![DiffSlot { offset, length }])
    }

    /// Returns the slots.
    #[inline]
    #[must_use]
    pub fn slots(&self) -> &[DiffSlot] {
        &self.slots
    }

    /// Serialized size of the descriptor itself.
    #[inline]
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        2 + self.slots.len() * 4
    }

    /// Total length of the diff bytes the descriptor describes.
    #[inline]
    #[must_use]
    pub fn diff_length(&self) -> usize {
        self.slots.iter().map(|s| s.length as usize).sum()
    }

    /// Serializes the descriptor into `out` (exactly
    /// [`Self::size_bytes`] bytes).
    pub fn write_to(&self, out: &mut [u8]) {
        debug_assert_eq!(out.len(), self.size_bytes());
        out[0..2].copy_from_slice(&(self.slots.len() as u16).to_le_bytes());
        for (i, slot) in self.slots.iter().enumerate() {
            let base = 2 + i * 4;
            out[base..base + 2].copy_from_slice(&slot.offset.to_le_bytes());
            out[base + 2..base + 4].copy_from_slice(&slot.length.to_le_bytes());
        }
    }

    /// Deserializes a descriptor from the head of `bytes`, returning it
    /// together with the number of bytes consumed.
    pub fn read_from(bytes: &[u8]) -> ChainResult<(Self, usize)> {
        if bytes.len() < 2 {
            return Err(ChainError::Internal("truncated update descriptor".into()));
        }
        let count = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
        let consumed = 2 + count * 4;
        if bytes.len() < consumed {
            return Err(ChainError::Internal("truncated update descriptor".into()));
        }
        let mut slots = Vec::with_capacity(count);
        for i in 0..count {
            let base = 2 + i * 4;
            slots.push(DiffSlot {
                offset: u16::from_le_bytes([bytes[base], bytes[base + 1]]),
                length: u16::from_le_bytes([bytes[base + 2], bytes[base + 3]]),
            });
        }
        Ok((Self { slots }, consumed))
    }
}

/// Gathers the described spans of `src` into `dst` (forward diff).
pub fn generate_diff(descriptor: &UpdateDescriptor, dst: &mut [u8], src: &[u8]) {
    let mut at = 0;
    for slot in descriptor.slots() {
        let (offset, length) = (slot.offset as usize, slot.length as usize);
        dst[at..at + length].copy_from_slice(&src[offset..offset + length]);
        at += length;
    }
}

/// XORs the described spans of `src` into `dst`.
///
/// Overwriting a forward diff with this, using the post-image as `src`,
/// turns the diff bytes into `old XOR new`.
pub fn generate_xor_diff(descriptor: &UpdateDescriptor, dst: &mut [u8], src: &[u8]) {
    let mut at = 0;
    for slot in descriptor.slots() {
        let (offset, length) = (slot.offset as usize, slot.length as usize);
        for i in 0..length {
            dst[at + i] ^= src[offset + i];
        }
        at += length;
    }
}

/// Scatters `src` into the described spans of `dst`.
pub fn apply_diff(descriptor: &UpdateDescriptor, dst: &mut [u8], src: &[u8]) {
    let mut at = 0;
    for slot in descriptor.slots() {
        let (offset, length) = (slot.offset as usize, slot.length as usize);
        dst[offset..offset + length].copy_from_slice(&src[at..at + length]);
        at += length;
    }
}

/// XORs `src` into the described spans of `dst`.
///
/// Applied to a post-image with `old XOR new` bytes, this recovers the
/// pre-image.
pub fn apply_xor_diff(descriptor: &UpdateDescriptor, dst: &mut [u8], src: &[u8]) {
    let mut at = 0;
    for slot in descriptor.slots() {
        let (offset, length) = (slot.offset as usize, slot.length as usize);
        for i in 0..length {
            dst[offset + i] ^= src[at + i];
        }
        at += length;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_roundtrip() {
        let descriptor = UpdateDescriptor::new(vec![
            DiffSlot { offset: 1, length: 2 },
            DiffSlot { offset: 8, length: 4 },
        ]);
        let mut out = vec![0u8; descriptor.size_bytes()];
        descriptor.write_to(&mut out);
        let (decoded, consumed) = UpdateDescriptor::read_from(&out).unwrap();
        assert_eq!(decoded, descriptor);
        assert_eq!(consumed, descriptor.size_bytes());
        assert_eq!(descriptor.diff_length(), 6);
    }

    #[test]
    fn test_read_from_ignores_trailing_bytes() {
        let descriptor = UpdateDescriptor::single(0, 3);
        let mut out = vec![0u8; descriptor.size_bytes() + 3];
        descriptor.write_to(&mut out[..6]);
        let (decoded, consumed) = UpdateDescriptor::read_from(&out).unwrap();
        assert_eq!(decoded, descriptor);
        assert_eq!(consumed, 6);
    }

    #[test]
    fn test_forward_diff_roundtrip() {
        let descriptor = UpdateDescriptor::new(vec![
            DiffSlot { offset: 0, length: 2 },
            DiffSlot { offset: 4, length: 1 },
        ]);
        let old = [10u8, 11, 12, 13, 14, 15];
        let mut diff = vec![0u8; descriptor.diff_length()];
        generate_diff(&descriptor, &mut diff, &old);
        assert_eq!(diff, vec![10, 11, 14]);

        // Mutate the touched spans, then restore them from the diff.
        let mut value = old;
        value[0] = 99;
        value[1] = 98;
        value[4] = 97;
        apply_diff(&descriptor, &mut value, &diff);
        assert_eq!(value, old);
    }

    #[test]
    fn test_xor_diff_recovers_pre_image() {
        let descriptor = UpdateDescriptor::single(1, 3);
        let old = [1u8, 2, 3, 4, 5];
        let new = [1u8, 9, 8, 7, 5];

        // Forward diff of the old bytes, then XOR with the new bytes.
        let mut diff = vec![0u8; descriptor.diff_length()];
        generate_diff(&descriptor, &mut diff, &old);
        generate_xor_diff(&descriptor, &mut diff, &new);

        // XOR-applying over the post-image restores the pre-image.
        let mut value = new;
        apply_xor_diff(&descriptor, &mut value, &diff);
        assert_eq!(value, old);
    }

    #[test]
    fn test_empty_descriptor() {
        let descriptor = UpdateDescriptor::new(Vec::new());
        assert_eq!(descriptor.diff_length(), 0);
        assert_eq!(descriptor.size_bytes(), 2);
        let mut out = vec![0u8; 2];
        descriptor.write_to(&mut out);
        let (decoded, _) = UpdateDescriptor::read_from(&out).unwrap();
        assert!(decoded.slots().is_empty());
        // Zero-length walks are no-ops.
        let mut value = [1u8, 2];
        apply_diff(&decoded, &mut value, &[]);
        assert_eq!(value, [1, 2]);
    }
}
