//! Big-endian bit cursor over a decoded consent payload.

/// Sequential reader of MSB-first bit-packed integers.
///
/// Every read is bounds-checked and returns `None` past the end of the
/// buffer, so truncated payloads surface as absent fields rather than panics.
pub(crate) struct BitReader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    /// Bits not yet consumed.
    pub(crate) fn remaining(&self) -> usize {
        (self.bytes.len() * 8).saturating_sub(self.position)
    }

    /// Read `width` bits (at most 64) as an unsigned integer.
    pub(crate) fn read(&mut self, width: usize) -> Option<u64> {
        if width > 64 || width > self.remaining() {
            return None;
        }
        let mut value = 0u64;
        for offset in self.position..self.position + width {
            let byte = self.bytes.get(offset / 8)?;
            let bit = (byte >> (7 - (offset % 8))) & 1;
            value = (value << 1) | u64::from(bit);
        }
        self.position += width;
        Some(value)
    }

    pub(crate) fn read_bool(&mut self) -> Option<bool> {
        self.read(1).map(|bit| bit == 1)
    }

    /// Read `count` consecutive single-bit flags.
    pub(crate) fn read_flags(&mut self, count: usize) -> Option<Vec<bool>> {
        if count > self.remaining() {
            return None;
        }
        (0..count).map(|_| self.read_bool()).collect()
    }

    /// Read exactly `N` flags into a fixed-size array.
    pub(crate) fn read_flag_array<const N: usize>(&mut self) -> Option<[bool; N]> {
        let mut flags = [false; N];
        for flag in &mut flags {
            *flag = self.read_bool()?;
        }
        Some(flags)
    }
}
