//! Bump allocator with scoped reset, and the growable DWORD buffer the
//! chunk codec is built on.
//!
//! Grounded in the teacher's `MemoryStream`/`DataPool` growth pattern
//! (extend-or-resize on write, cheap clones via shared ownership) but
//! generalized into an arena that owns interned byte slices (object names,
//! decoded strings) with a single release point, matching §4.A.

use crate::error::{NmoError, Result};
use std::cell::RefCell;

/// An append-only byte arena. Every allocation lives until `reset()`, which
/// invalidates all outstanding slices handed out since the last reset.
///
/// Because `bumpalo`-style raw pointer arenas are unsound to expose safely
/// across a `reset()` without unsafe lifetime games, this arena hands out
/// owned `Box<[u8]>` allocations instead and treats `reset()` as "drop
/// everything allocated so far" — the scoped-reset contract from §4.A is
/// satisfied by the session dropping its arena and creating a fresh one,
/// which is what the load/streaming pipelines do per-object.
pub struct Arena {
    chunks: RefCell<Vec<Box<[u8]>>>,
    bytes_allocated: RefCell<usize>,
}

impl Arena {
    pub fn new() -> Self {
        Arena {
            chunks: RefCell::new(Vec::new()),
            bytes_allocated: RefCell::new(0),
        }
    }

    /// Copies `data` into the arena and returns a `'static`-lifetime-free
    /// owned handle (`ArenaStr`/`ArenaBytes` wrap the returned index).
    pub fn alloc_bytes(&self, data: &[u8]) -> Result<ArenaBytes> {
        if data.is_empty() {
            return Ok(ArenaBytes { index: None });
        }
        let mut chunks = self.chunks.borrow_mut();
        let index = chunks.len();
        chunks.push(data.to_vec().into_boxed_slice());
        *self.bytes_allocated.borrow_mut() += data.len();
        Ok(ArenaBytes { index: Some(index) })
    }

    pub fn alloc_str(&self, s: &str) -> Result<ArenaBytes> {
        self.alloc_bytes(s.as_bytes())
    }

    pub fn get<'a>(&'a self, handle: ArenaBytes) -> std::cell::Ref<'a, [u8]> {
        std::cell::Ref::map(self.chunks.borrow(), |chunks| match handle.index {
            Some(i) => &*chunks[i],
            None => &[][..],
        })
    }

    pub fn bytes_allocated(&self) -> usize {
        *self.bytes_allocated.borrow()
    }

    /// Invalidates every outstanding `ArenaBytes` handle. Callers must not
    /// dereference handles obtained before this call through `get()` after
    /// calling it; in practice the load/stream pipelines drop the whole
    /// arena and its handles together rather than calling this directly.
    pub fn reset(&self) {
        self.chunks.borrow_mut().clear();
        *self.bytes_allocated.borrow_mut() = 0;
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

/// A handle into an [`Arena`]'s interned bytes. Cheap to copy; dereference
/// through `Arena::get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaBytes {
    index: Option<usize>,
}

impl ArenaBytes {
    pub const EMPTY: ArenaBytes = ArenaBytes { index: None };
}

/// A growable sequence of little-endian DWORDs, the unit the chunk codec
/// reads and writes. `ensure_capacity` doubles on growth, matching §4.A.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DwordBuffer {
    words: Vec<u32>,
}

impl DwordBuffer {
    pub fn new() -> Self {
        DwordBuffer { words: Vec::new() }
    }

    pub fn with_capacity(dwords: usize) -> Self {
        DwordBuffer {
            words: Vec::with_capacity(dwords),
        }
    }

    pub fn from_words(words: Vec<u32>) -> Self {
        DwordBuffer { words }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn ensure_capacity(&mut self, extra_dwords: usize) -> Result<()> {
        let needed = self.words.len() + extra_dwords;
        if needed > self.words.capacity() {
            let new_cap = (self.words.capacity().max(16) * 2).max(needed);
            self.words
                .try_reserve(new_cap - self.words.len())
                .map_err(|e| NmoError::NoMemory(e.to_string()))?;
        }
        Ok(())
    }

    #[inline]
    pub fn get(&self, index: usize) -> Result<u32> {
        self.words
            .get(index)
            .copied()
            .ok_or(NmoError::EndOfBuffer)
    }

    #[inline]
    pub fn set(&mut self, index: usize, value: u32) -> Result<()> {
        let slot = self
            .words
            .get_mut(index)
            .ok_or_else(|| NmoError::OutOfBounds(format!("dword index {index} out of range")))?;
        *slot = value;
        Ok(())
    }

    pub fn push(&mut self, value: u32) -> Result<()> {
        self.ensure_capacity(1)?;
        self.words.push(value);
        Ok(())
    }

    pub fn truncate(&mut self, len: usize) {
        self.words.truncate(len);
    }

    pub fn as_words(&self) -> &[u32] {
        &self.words
    }

    pub fn as_words_mut(&mut self) -> &mut [u32] {
        &mut self.words
    }

    /// Serializes to little-endian bytes (the on-disk DWORD layout).
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.words.len() * 4);
        for w in &self.words {
            out.extend_from_slice(&w.to_le_bytes());
        }
        out
    }

    /// Parses a byte slice of little-endian DWORDs; errors if the length
    /// is not a multiple of 4.
    pub fn from_le_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % 4 != 0 {
            return Err(NmoError::InvalidFormat(
                "byte length is not DWORD-aligned".into(),
            ));
        }
        let words = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(DwordBuffer { words })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_roundtrip() {
        let arena = Arena::new();
        let h = arena.alloc_str("hello").unwrap();
        assert_eq!(&*arena.get(h), b"hello");
    }

    #[test]
    fn empty_string_uses_no_allocation() {
        let arena = Arena::new();
        let h = arena.alloc_str("").unwrap();
        assert_eq!(h, ArenaBytes::EMPTY);
        assert_eq!(arena.bytes_allocated(), 0);
    }

    #[test]
    fn dword_buffer_byte_roundtrip() {
        let buf = DwordBuffer::from_words(vec![1, 2, 0xFFFF_FFFF]);
        let bytes = buf.to_le_bytes();
        let back = DwordBuffer::from_le_bytes(&bytes).unwrap();
        assert_eq!(buf, back);
    }

    #[test]
    fn dword_buffer_rejects_misaligned_bytes() {
        assert!(DwordBuffer::from_le_bytes(&[1, 2, 3]).is_err());
    }
}
