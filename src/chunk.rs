//! The chunk codec: a typed read/write cursor over a DWORD-aligned binary
//! stream, with identifier-based random access, sub-chunks, object-ID
//! tracking tables, manager sequences, and payload compression.
//!
//! Grounded in the teacher's `IffWriter`/`IffChunk` chunk-stack pattern
//! (`put_chunk`/`close_chunk` size-field patching, recursive sub-chunk
//! writes, even-byte padding) generalized from byte-granular IFF chunks to
//! DWORD-granular chunks carrying an intra-chunk identifier index and
//! offset tables the ID remap pass rewrites in place. Compression follows
//! the teacher's `bzz::bzz_compress`/`bzz_decompress` wrapper-around-a-crate
//! shape, using `flate2` (deflate) per the spec's compatibility requirement
//! instead of the teacher's bzip2 wrapper.

use crate::arena::{Arena, ArenaBytes, DwordBuffer};
use crate::error::{NmoError, Result};
use crate::types::{ClassId, Guid, Matrix4, ObjectId, Vector2, Vector3, Vector4};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::io::{Read, Write};

pub const PACKED: u8 = 0x01;
pub const CHN: u8 = 0x02;
pub const IDS: u8 = 0x04;
pub const MAN: u8 = 0x08;
pub const FILE: u8 = 0x10;

/// Format revision of the chunk envelope itself (as opposed to `data_version`,
/// the class-specific payload revision).
pub const MIN_SUPPORTED_CHUNK_VERSION: u8 = 4;
pub const DEFAULT_CHUNK_VERSION: u8 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkMode {
    Empty,
    Writing,
    Closed,
    Reading,
}

/// The atomic serialization unit: one object's (or manager's) encoded state.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub class_id: ClassId,
    pub chunk_version: u8,
    pub data_version: u32,
    option_flags: u8,
    buffer: DwordBuffer,
    /// Present iff `option_flags & PACKED`: the compressed bytes, with
    /// `unpack_size` recording the original DWORD count.
    compressed: Option<Vec<u8>>,
    unpack_size: u32,
    cursor: usize,
    data_size: usize,
    /// Encodes the identifier back-link chain: 0 means "no identifier written
    /// yet"; otherwise `real_dword_position + 1` of the most recent marker.
    /// The `+1` shift keeps 0 an unambiguous "chain empty" sentinel without
    /// needing an `Option` in the on-disk envelope.
    prev_identifier_pos: u32,
    /// Buffer offsets (in DWORDs) of every `ObjectId` written, so the remap
    /// pass can find and rewrite them without re-parsing the payload.
    ids: Vec<i32>,
    /// Buffer offsets of every manager-tagged DWORD; parallel to `ids`.
    managers: Vec<u32>,
    /// Buffer offsets of the length-prefix DWORD of every embedded sub-chunk,
    /// so remap can recurse into them in place.
    sub_chunk_positions: Vec<u32>,
    mode: ChunkMode,
}

impl Chunk {
    pub fn new(class_id: ClassId, data_version: u32) -> Self {
        Chunk {
            class_id,
            chunk_version: DEFAULT_CHUNK_VERSION,
            data_version,
            option_flags: 0,
            buffer: DwordBuffer::new(),
            compressed: None,
            unpack_size: 0,
            cursor: 0,
            data_size: 0,
            prev_identifier_pos: 0,
            ids: Vec::new(),
            managers: Vec::new(),
            sub_chunk_positions: Vec::new(),
            mode: ChunkMode::Empty,
        }
    }

    pub fn option_flags(&self) -> u8 {
        self.option_flags
    }

    pub fn is_packed(&self) -> bool {
        self.option_flags & PACKED != 0
    }

    pub fn data_size_dwords(&self) -> usize {
        self.data_size
    }

    pub fn set_file_flag(&mut self, set: bool) {
        if set {
            self.option_flags |= FILE;
        } else {
            self.option_flags &= !FILE;
        }
    }

    // ---- state machine ----------------------------------------------

    pub fn start_write(&mut self) -> Result<()> {
        if self.mode == ChunkMode::Reading {
            return Err(NmoError::InvalidState(
                "cannot start_write while chunk is in Reading mode".into(),
            ));
        }
        self.buffer = DwordBuffer::new();
        self.compressed = None;
        self.unpack_size = 0;
        self.cursor = 0;
        self.data_size = 0;
        self.prev_identifier_pos = 0;
        self.ids.clear();
        self.managers.clear();
        self.sub_chunk_positions.clear();
        self.option_flags &= FILE; // preserve FILE, clear everything else
        self.mode = ChunkMode::Writing;
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        if self.mode != ChunkMode::Writing {
            return Err(NmoError::InvalidState(
                "close() requires the chunk to be in Writing mode".into(),
            ));
        }
        self.data_size = self.buffer.len();
        if !self.ids.is_empty() {
            self.option_flags |= IDS;
        }
        if !self.managers.is_empty() {
            self.option_flags |= MAN;
        }
        if !self.sub_chunk_positions.is_empty() {
            self.option_flags |= CHN;
        }
        self.mode = ChunkMode::Closed;
        Ok(())
    }

    pub fn start_read(&mut self) -> Result<()> {
        if !matches!(self.mode, ChunkMode::Closed | ChunkMode::Reading) {
            return Err(NmoError::InvalidState(
                "start_read requires a closed chunk".into(),
            ));
        }
        self.cursor = 0;
        self.mode = ChunkMode::Reading;
        Ok(())
    }

    #[inline]
    fn require_writing(&self) -> Result<()> {
        if self.mode != ChunkMode::Writing {
            return Err(NmoError::InvalidState("chunk is not in Writing mode".into()));
        }
        Ok(())
    }

    #[inline]
    fn require_reading(&self) -> Result<()> {
        if self.mode != ChunkMode::Reading {
            return Err(NmoError::InvalidState("chunk is not in Reading mode".into()));
        }
        Ok(())
    }

    // ---- primitive read/write -----------------------------------------

    fn write_dword_raw(&mut self, v: u32) -> Result<()> {
        self.require_writing()?;
        self.buffer.push(v)?;
        self.cursor += 1;
        Ok(())
    }

    fn read_dword_raw(&mut self) -> Result<u32> {
        self.require_reading()?;
        if self.cursor >= self.data_size {
            return Err(NmoError::EndOfBuffer);
        }
        let v = self.buffer.get(self.cursor)?;
        self.cursor += 1;
        Ok(v)
    }

    pub fn write_byte(&mut self, v: u8) -> Result<()> {
        self.write_dword_raw(v as u32)
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        Ok(self.read_dword_raw()? as u8)
    }

    pub fn write_word(&mut self, v: u16) -> Result<()> {
        self.write_dword_raw(v as u32)
    }

    pub fn read_word(&mut self) -> Result<u16> {
        Ok(self.read_dword_raw()? as u16)
    }

    pub fn write_int(&mut self, v: i32) -> Result<()> {
        self.write_dword_raw(v as u32)
    }

    pub fn read_int(&mut self) -> Result<i32> {
        Ok(self.read_dword_raw()? as i32)
    }

    pub fn write_dword(&mut self, v: u32) -> Result<()> {
        self.write_dword_raw(v)
    }

    pub fn read_dword(&mut self) -> Result<u32> {
        self.read_dword_raw()
    }

    pub fn write_float(&mut self, v: f32) -> Result<()> {
        self.write_dword_raw(v.to_bits())
    }

    pub fn read_float(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_dword_raw()?))
    }

    pub fn write_guid(&mut self, g: Guid) -> Result<()> {
        self.write_dword(g.d1)?;
        self.write_dword(g.d2)
    }

    pub fn read_guid(&mut self) -> Result<Guid> {
        let d1 = self.read_dword()?;
        let d2 = self.read_dword()?;
        Ok(Guid::new(d1, d2))
    }

    // ---- padded byte blocks --------------------------------------------

    fn write_padded_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        for chunk4 in bytes.chunks(4) {
            let mut word = [0u8; 4];
            word[..chunk4.len()].copy_from_slice(chunk4);
            self.write_dword_raw(u32::from_le_bytes(word))?;
        }
        Ok(())
    }

    fn read_padded_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let dwords = len.div_ceil(4);
        let mut out = Vec::with_capacity(dwords * 4);
        for _ in 0..dwords {
            out.extend_from_slice(&self.read_dword_raw()?.to_le_bytes());
        }
        out.truncate(len);
        Ok(out)
    }

    pub fn write_buffer(&mut self, data: &[u8]) -> Result<()> {
        self.write_dword(data.len() as u32)?;
        self.write_padded_bytes(data)
    }

    pub fn write_buffer_no_size(&mut self, data: &[u8]) -> Result<()> {
        self.write_padded_bytes(data)
    }

    pub fn read_buffer(&mut self) -> Result<Vec<u8>> {
        let len = self.read_dword()? as usize;
        self.read_padded_bytes(len)
    }

    pub fn read_buffer_no_size(&mut self, len: usize) -> Result<Vec<u8>> {
        self.read_padded_bytes(len)
    }

    /// `None` encodes as a zero-length string. The returned handle is
    /// interned into `arena` and lives as long as it does.
    pub fn write_string(&mut self, s: Option<&str>) -> Result<()> {
        match s {
            None | Some("") => self.write_dword(0),
            Some(s) => {
                let mut bytes = s.as_bytes().to_vec();
                bytes.push(0);
                self.write_dword(bytes.len() as u32)?;
                self.write_padded_bytes(&bytes)
            }
        }
    }

    pub fn read_string(&mut self, arena: &Arena) -> Result<Option<ArenaBytes>> {
        let len = self.read_dword()? as usize;
        if len == 0 {
            return Ok(None);
        }
        let bytes = self.read_padded_bytes(len)?;
        let content = &bytes[..bytes.len().saturating_sub(1)]; // drop NUL terminator
        Ok(Some(arena.alloc_bytes(content)?))
    }

    // ---- object ids ------------------------------------------------------

    pub fn write_object_id(&mut self, id: ObjectId) -> Result<()> {
        let pos = self.cursor;
        self.write_dword(id.0)?;
        self.ids.push(pos as i32);
        Ok(())
    }

    pub fn read_object_id(&mut self) -> Result<ObjectId> {
        Ok(ObjectId(self.read_dword()?))
    }

    pub fn write_object_id_array(&mut self, ids: &[ObjectId]) -> Result<()> {
        self.write_dword(ids.len() as u32)?;
        for &id in ids {
            self.write_object_id(id)?;
        }
        Ok(())
    }

    pub fn read_object_id_array(&mut self) -> Result<Vec<ObjectId>> {
        let count = self.read_dword()? as usize;
        (0..count).map(|_| self.read_object_id()).collect()
    }

    pub fn write_dword_array(&mut self, values: &[u32]) -> Result<()> {
        self.write_dword(values.len() as u32)?;
        for &v in values {
            self.write_dword(v)?;
        }
        Ok(())
    }

    pub fn read_dword_array(&mut self) -> Result<Vec<u32>> {
        let count = self.read_dword()? as usize;
        (0..count).map(|_| self.read_dword()).collect()
    }

    pub fn write_int_array(&mut self, values: &[i32]) -> Result<()> {
        self.write_dword(values.len() as u32)?;
        for &v in values {
            self.write_int(v)?;
        }
        Ok(())
    }

    pub fn read_int_array(&mut self) -> Result<Vec<i32>> {
        let count = self.read_dword()? as usize;
        (0..count).map(|_| self.read_int()).collect()
    }

    pub fn write_float_array(&mut self, values: &[f32]) -> Result<()> {
        self.write_dword(values.len() as u32)?;
        for &v in values {
            self.write_float(v)?;
        }
        Ok(())
    }

    pub fn read_float_array(&mut self) -> Result<Vec<f32>> {
        let count = self.read_dword()? as usize;
        (0..count).map(|_| self.read_float()).collect()
    }

    // ---- math types -------------------------------------------------------

    pub fn write_vector2(&mut self, v: Vector2) -> Result<()> {
        self.write_float(v.x)?;
        self.write_float(v.y)
    }

    pub fn read_vector2(&mut self) -> Result<Vector2> {
        Ok(Vector2 {
            x: self.read_float()?,
            y: self.read_float()?,
        })
    }

    pub fn write_vector3(&mut self, v: Vector3) -> Result<()> {
        self.write_float(v.x)?;
        self.write_float(v.y)?;
        self.write_float(v.z)
    }

    pub fn read_vector3(&mut self) -> Result<Vector3> {
        Ok(Vector3 {
            x: self.read_float()?,
            y: self.read_float()?,
            z: self.read_float()?,
        })
    }

    /// Also used for quaternions and colors (all four packed floats on disk).
    pub fn write_vector4(&mut self, v: Vector4) -> Result<()> {
        self.write_float(v.x)?;
        self.write_float(v.y)?;
        self.write_float(v.z)?;
        self.write_float(v.w)
    }

    pub fn read_vector4(&mut self) -> Result<Vector4> {
        Ok(Vector4 {
            x: self.read_float()?,
            y: self.read_float()?,
            z: self.read_float()?,
            w: self.read_float()?,
        })
    }

    pub fn write_matrix(&mut self, m: Matrix4) -> Result<()> {
        for row in &m.rows {
            for &v in row {
                self.write_float(v)?;
            }
        }
        Ok(())
    }

    pub fn read_matrix(&mut self) -> Result<Matrix4> {
        let mut rows = [[0f32; 4]; 4];
        for row in &mut rows {
            for v in row.iter_mut() {
                *v = self.read_float()?;
            }
        }
        Ok(Matrix4 { rows })
    }

    // ---- sub-chunks ---------------------------------------------------

    /// Serializes `child` (which must already be closed) to a temporary
    /// buffer and writes it inline as a sized buffer, recording the
    /// length-prefix position so remap can recurse into it later.
    pub fn write_sub_chunk(&mut self, child: &Chunk) -> Result<()> {
        if child.mode != ChunkMode::Closed {
            return Err(NmoError::InvalidState(
                "sub-chunk must be closed before being written".into(),
            ));
        }
        let pos = self.cursor;
        let bytes = child.to_bytes();
        self.write_buffer(&bytes)?;
        self.sub_chunk_positions.push(pos as u32);
        self.option_flags |= CHN;
        Ok(())
    }

    pub fn read_sub_chunk(&mut self) -> Result<Chunk> {
        let bytes = self.read_buffer()?;
        Chunk::from_bytes(&bytes)
    }

    // ---- manager sequences ----------------------------------------------

    pub fn start_manager_sequence(&mut self, guid: Guid, count: u32) -> Result<()> {
        self.write_guid(guid)?;
        self.write_dword(count)?;
        self.option_flags |= MAN;
        Ok(())
    }

    pub fn write_manager_int(&mut self, _guid: Guid, value: i32) -> Result<()> {
        let pos = self.cursor;
        self.write_int(value)?;
        self.managers.push(pos as u32);
        Ok(())
    }

    // ---- identifiers --------------------------------------------------

    pub fn write_identifier(&mut self, id: u32) -> Result<()> {
        let marker_pos = self.cursor;
        self.write_dword(id)?;
        self.write_dword(self.prev_identifier_pos)?;
        self.prev_identifier_pos = marker_pos as u32 + 1;
        Ok(())
    }

    /// Walks the intra-chunk back-link chain from the most recently written
    /// identifier towards the start, looking for `id`. On success, the
    /// cursor is left immediately past the matched marker's two DWORDs.
    pub fn seek_identifier(&mut self, id: u32) -> Result<()> {
        self.require_reading()?;
        let mut link = self.prev_identifier_pos;
        while link != 0 {
            let real_pos = (link - 1) as usize;
            let stored_id = self.buffer.get(real_pos)?;
            let back_link = self.buffer.get(real_pos + 1)?;
            if stored_id == id {
                self.cursor = real_pos + 2;
                return Ok(());
            }
            link = back_link;
        }
        Err(NmoError::NotFound(format!("identifier 0x{id:08X} not found")))
    }

    pub fn skip(&mut self, k: usize) -> Result<()> {
        self.require_reading()?;
        let target = self
            .cursor
            .checked_add(k)
            .ok_or_else(|| NmoError::OutOfBounds("skip overflow".into()))?;
        if target > self.data_size {
            return Err(NmoError::OutOfBounds(format!(
                "skip({k}) would move cursor past data_size ({} > {})",
                target, self.data_size
            )));
        }
        self.cursor = target;
        Ok(())
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.data_size.saturating_sub(self.cursor)
    }

    // ---- compression ----------------------------------------------------

    pub fn compress(&mut self, level: i32) -> Result<()> {
        if self.is_packed() {
            return Ok(());
        }
        let level = Self::normalize_level(level);
        let raw = self.buffer.to_le_bytes();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
        encoder
            .write_all(&raw)
            .map_err(|e| NmoError::Compression(e.to_string()))?;
        let compressed = encoder
            .finish()
            .map_err(|e| NmoError::Compression(e.to_string()))?;
        self.unpack_size = self.buffer.len() as u32;
        self.compressed = Some(compressed);
        self.buffer = DwordBuffer::new();
        self.option_flags |= PACKED;
        Ok(())
    }

    /// Compresses only if doing so actually shrinks the payload to at most
    /// `original_size * min_ratio` bytes; otherwise the chunk is left
    /// unpacked.
    pub fn compress_if_beneficial(&mut self, level: i32, min_ratio: f64) -> Result<()> {
        if self.is_packed() {
            return Ok(());
        }
        let level = Self::normalize_level(level);
        let raw = self.buffer.to_le_bytes();
        if raw.is_empty() {
            return Ok(());
        }
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
        encoder
            .write_all(&raw)
            .map_err(|e| NmoError::Compression(e.to_string()))?;
        let compressed = encoder
            .finish()
            .map_err(|e| NmoError::Compression(e.to_string()))?;
        if (compressed.len() as f64) <= (raw.len() as f64) * min_ratio {
            self.unpack_size = self.buffer.len() as u32;
            self.compressed = Some(compressed);
            self.buffer = DwordBuffer::new();
            self.option_flags |= PACKED;
        }
        Ok(())
    }

    pub fn decompress(&mut self) -> Result<()> {
        if !self.is_packed() {
            return Ok(());
        }
        let compressed = self
            .compressed
            .take()
            .ok_or_else(|| NmoError::InvalidState("PACKED flag set with no compressed data".into()))?;
        let mut decoder = ZlibDecoder::new(&compressed[..]);
        let mut raw = Vec::new();
        decoder
            .read_to_end(&mut raw)
            .map_err(|e| NmoError::Compression(e.to_string()))?;
        let buffer = DwordBuffer::from_le_bytes(&raw)?;
        if buffer.len() != self.unpack_size as usize {
            return Err(NmoError::InvalidFormat(format!(
                "decompressed {} dwords, expected {}",
                buffer.len(),
                self.unpack_size
            )));
        }
        self.buffer = buffer;
        self.unpack_size = 0;
        self.option_flags &= !PACKED;
        Ok(())
    }

    fn normalize_level(level: i32) -> u32 {
        if level < 0 {
            6
        } else {
            level.min(9) as u32
        }
    }

    pub fn compute_crc(&self, initial: u32) -> u32 {
        let bytes = match &self.compressed {
            Some(c) => c.as_slice().to_vec(),
            None => self.buffer.to_le_bytes(),
        };
        adler32(&bytes, initial)
    }

    // ---- ID remap -----------------------------------------------------

    /// Rewrites every recorded `ObjectId` offset (and recurses into
    /// embedded sub-chunks) using `table`. Offsets not present in `table`
    /// are left untouched (the identity-outside-domain guarantee).
    pub fn remap_object_ids(&mut self, table: &HashMap<ObjectId, ObjectId>) -> Result<()> {
        if self.chunk_version < MIN_SUPPORTED_CHUNK_VERSION {
            return Err(NmoError::UnsupportedVersion(format!(
                "chunk_version {} predates offset-list ID remap",
                self.chunk_version
            )));
        }
        if self.is_packed() {
            // Remap operates on the decoded buffer; packed chunks must be
            // decompressed by the caller (the load/save pipeline always
            // remaps before the final compression pass).
            return Err(NmoError::InvalidState(
                "remap_object_ids requires a decompressed chunk".into(),
            ));
        }

        for &offset in &self.ids.clone() {
            if offset < 0 {
                continue; // sequence-header marker, not a rewritable id slot
            }
            let idx = offset as usize;
            let raw = self.buffer.get(idx)?;
            let id = ObjectId(raw);
            if let Some(&new_id) = table.get(&id) {
                if new_id != id {
                    self.buffer.set(idx, new_id.0)?;
                }
            }
        }

        for &pos in &self.sub_chunk_positions.clone() {
            let pos = pos as usize;
            let byte_len = self.buffer.get(pos)? as usize;
            let start = pos + 1;
            let dwords = byte_len.div_ceil(4);
            let mut bytes = Vec::with_capacity(dwords * 4);
            for i in 0..dwords {
                bytes.extend_from_slice(&self.buffer.get(start + i)?.to_le_bytes());
            }
            bytes.truncate(byte_len);

            let mut sub = Chunk::from_bytes(&bytes)?;
            sub.remap_object_ids(table)?;
            let new_bytes = sub.to_bytes();
            debug_assert_eq!(new_bytes.len(), byte_len, "remap must not change sub-chunk size");

            for (i, word) in new_bytes.chunks(4).enumerate() {
                let mut buf = [0u8; 4];
                buf[..word.len()].copy_from_slice(word);
                self.buffer.set(start + i, u32::from_le_bytes(buf))?;
            }
        }

        Ok(())
    }

    // ---- envelope (de)serialization --------------------------------------

    /// Serializes the full self-describing envelope: version fields,
    /// payload, and (when set) the ids/managers/sub-chunk-position tables.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.chunk_version as u32).to_le_bytes());
        out.extend_from_slice(&self.data_version.to_le_bytes());
        out.extend_from_slice(&self.class_id.0.to_le_bytes());
        out.extend_from_slice(&(self.option_flags as u32).to_le_bytes());

        let payload: &[u8];
        let payload_owned;
        let data_size_field: u32;
        if let Some(compressed) = &self.compressed {
            payload_owned = None;
            payload = compressed.as_slice();
            data_size_field = payload.len() as u32;
        } else {
            payload_owned = Some(self.buffer.to_le_bytes());
            payload = payload_owned.as_ref().unwrap();
            data_size_field = self.buffer.len() as u32;
        }
        out.extend_from_slice(&data_size_field.to_le_bytes());
        out.extend_from_slice(&self.unpack_size.to_le_bytes());
        out.extend_from_slice(&self.prev_identifier_pos.to_le_bytes());
        out.extend_from_slice(payload);

        if self.option_flags & IDS != 0 {
            out.extend_from_slice(&(self.ids.len() as u32).to_le_bytes());
            for &v in &self.ids {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        if self.option_flags & MAN != 0 {
            out.extend_from_slice(&(self.managers.len() as u32).to_le_bytes());
            for &v in &self.managers {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        if self.option_flags & CHN != 0 {
            out.extend_from_slice(&(self.sub_chunk_positions.len() as u32).to_le_bytes());
            for &v in &self.sub_chunk_positions {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Chunk> {
        let mut r = ByteReader::new(bytes);
        let chunk_version = r.u32()? as u8;
        let data_version = r.u32()?;
        let class_id = ClassId(r.u32()?);
        let option_flags = r.u32()? as u8;
        let data_size_field = r.u32()?;
        let unpack_size = r.u32()?;
        let prev_identifier_pos = r.u32()?;

        let (buffer, compressed) = if option_flags & PACKED != 0 {
            let bytes = r.take(data_size_field as usize)?;
            (DwordBuffer::new(), Some(bytes.to_vec()))
        } else {
            let byte_len = data_size_field as usize * 4;
            let bytes = r.take(byte_len)?;
            (DwordBuffer::from_le_bytes(bytes)?, None)
        };

        let ids = if option_flags & IDS != 0 {
            let count = r.u32()? as usize;
            (0..count).map(|_| r.i32()).collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };
        let managers = if option_flags & MAN != 0 {
            let count = r.u32()? as usize;
            (0..count).map(|_| r.u32()).collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };
        let sub_chunk_positions = if option_flags & CHN != 0 {
            let count = r.u32()? as usize;
            (0..count).map(|_| r.u32()).collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };

        let data_size = if option_flags & PACKED != 0 {
            0
        } else {
            data_size_field as usize
        };

        Ok(Chunk {
            class_id,
            chunk_version,
            data_version,
            option_flags,
            buffer,
            compressed,
            unpack_size,
            cursor: 0,
            data_size,
            prev_identifier_pos,
            ids,
            managers,
            sub_chunk_positions,
            mode: ChunkMode::Closed,
        })
    }
}

/// Minimal cursor over an immutable byte slice, used only to parse a
/// chunk's own envelope in [`Chunk::from_bytes`].
struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        ByteReader { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.bytes.len() {
            return Err(NmoError::EndOfBuffer);
        }
        let s = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(s)
    }

    fn u32(&mut self) -> Result<u32> {
        let s = self.take(4)?;
        Ok(u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(self.u32()? as i32)
    }
}

/// Adler-32 checksum, initialized as `initial` (the spec's header CRC uses
/// the canonical a=1,b=0 start, i.e. `initial == 1`).
pub fn adler32(data: &[u8], initial: u32) -> u32 {
    const MOD_ADLER: u32 = 65521;
    let mut a = initial & 0xFFFF;
    let mut b = (initial >> 16) & 0xFFFF;
    for &byte in data {
        a = (a + byte as u32) % MOD_ADLER;
        b = (b + a) % MOD_ADLER;
    }
    (b << 16) | a
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_chunk() -> Chunk {
        Chunk::new(ClassId(1), 1)
    }

    #[test]
    fn primitive_roundtrip() {
        let mut c = new_chunk();
        c.start_write().unwrap();
        c.write_byte(0xAB).unwrap();
        c.write_word(0xBEEF).unwrap();
        c.write_int(-42).unwrap();
        c.write_dword(0xDEAD_BEEF).unwrap();
        c.write_float(3.5).unwrap();
        c.close().unwrap();
        c.start_read().unwrap();
        assert_eq!(c.read_byte().unwrap(), 0xAB);
        assert_eq!(c.read_word().unwrap(), 0xBEEF);
        assert_eq!(c.read_int().unwrap(), -42);
        assert_eq!(c.read_dword().unwrap(), 0xDEAD_BEEF);
        assert_eq!(c.read_float().unwrap(), 3.5);
    }

    #[test]
    fn read_in_writing_mode_rejected() {
        let mut c = new_chunk();
        c.start_write().unwrap();
        assert!(c.read_dword().is_err());
    }

    #[test]
    fn write_in_reading_mode_rejected() {
        let mut c = new_chunk();
        c.start_write().unwrap();
        c.write_dword(1).unwrap();
        c.close().unwrap();
        c.start_read().unwrap();
        assert!(c.write_dword(2).is_err());
    }

    #[test]
    fn string_roundtrip_boundaries() {
        let arena = Arena::new();
        for s in ["", "a", "abcd", "abcde", "hello world"] {
            let mut c = new_chunk();
            c.start_write().unwrap();
            c.write_string(Some(s)).unwrap();
            c.close().unwrap();
            c.start_read().unwrap();
            let handle = c.read_string(&arena).unwrap();
            match handle {
                None => assert_eq!(s, ""),
                Some(h) => assert_eq!(&*arena.get(h), s.as_bytes()),
            }
        }
    }

    #[test]
    fn null_string_is_zero_length() {
        let mut c = new_chunk();
        c.start_write().unwrap();
        c.write_string(None).unwrap();
        c.close().unwrap();
        c.start_read().unwrap();
        let arena = Arena::new();
        assert!(c.read_string(&arena).unwrap().is_none());
    }

    #[test]
    fn object_id_boundary_values() {
        for id in [ObjectId(0), ObjectId::INVALID, ObjectId(7).as_reference()] {
            let mut c = new_chunk();
            c.start_write().unwrap();
            c.write_object_id(id).unwrap();
            c.close().unwrap();
            c.start_read().unwrap();
            assert_eq!(c.read_object_id().unwrap(), id);
        }
    }

    #[test]
    fn identifier_seek_after_interleaving() {
        let mut c = new_chunk();
        c.start_write().unwrap();
        c.write_identifier(0xA).unwrap();
        c.write_dword(100).unwrap();
        c.write_identifier(0xB).unwrap();
        c.write_dword(200).unwrap();
        c.write_identifier(0xC).unwrap();
        c.write_dword(300).unwrap();
        c.close().unwrap();
        c.start_read().unwrap();
        // position the cursor past 0xC, as the spec's scenario does
        c.skip(c.data_size_dwords() - c.cursor()).unwrap();
        c.seek_identifier(0xB).unwrap();
        assert_eq!(c.read_dword().unwrap(), 200);
    }

    #[test]
    fn seek_identifier_never_written_fails() {
        let mut c = new_chunk();
        c.start_write().unwrap();
        c.write_identifier(0x1).unwrap();
        c.close().unwrap();
        c.start_read().unwrap();
        assert!(c.seek_identifier(0x2).is_err());
    }

    #[test]
    fn skip_boundary_behaviors() {
        let mut c = new_chunk();
        c.start_write().unwrap();
        c.write_dword(1).unwrap();
        c.write_dword(2).unwrap();
        c.close().unwrap();
        c.start_read().unwrap();
        let remaining = c.remaining();
        c.skip(remaining).unwrap(); // exactly at data_size: ok
        assert!(c.skip(1).is_err()); // one past: OutOfBounds
    }

    #[test]
    fn compression_roundtrip_all_levels() {
        for level in -1..=9 {
            let mut c = new_chunk();
            c.start_write().unwrap();
            for i in 0..64 {
                c.write_dword(i).unwrap();
            }
            c.close().unwrap();
            c.compress(level).unwrap();
            assert!(c.is_packed());
            c.decompress().unwrap();
            assert!(!c.is_packed());
            c.start_read().unwrap();
            for i in 0..64 {
                assert_eq!(c.read_dword().unwrap(), i);
            }
        }
    }

    #[test]
    fn compress_if_beneficial_keeps_compressible_data() {
        let mut c = new_chunk();
        c.start_write().unwrap();
        for _ in 0..1024 {
            c.write_dword(0).unwrap();
        }
        c.close().unwrap();
        c.compress_if_beneficial(6, 0.9).unwrap();
        assert!(c.is_packed());
        c.decompress().unwrap();
        c.start_read().unwrap();
        for _ in 0..1024 {
            assert_eq!(c.read_dword().unwrap(), 0);
        }
    }

    #[test]
    fn compress_if_beneficial_skips_incompressible_data() {
        let mut c = new_chunk();
        c.start_write().unwrap();
        // A small, high-entropy buffer: deflate overhead alone exceeds it.
        let values: [u32; 8] = [
            0x9E3779B9, 0x7F4A7C15, 0x2545F491, 0xA3D2C1B0, 0x1B873593, 0xCC9E2D51, 0x85EBCA6B,
            0xC2B2AE35,
        ];
        for v in values {
            c.write_dword(v).unwrap();
        }
        c.close().unwrap();
        c.compress_if_beneficial(6, 0.1).unwrap();
        assert!(!c.is_packed());
    }

    #[test]
    fn remap_object_ids_rewrites_recorded_offsets() {
        let mut c = new_chunk();
        c.start_write().unwrap();
        c.write_object_id(ObjectId(2)).unwrap();
        c.write_dword(0xFF).unwrap();
        c.close().unwrap();

        let mut table = HashMap::new();
        table.insert(ObjectId(2), ObjectId(77));
        c.remap_object_ids(&table).unwrap();

        c.start_read().unwrap();
        assert_eq!(c.read_object_id().unwrap(), ObjectId(77));
        assert_eq!(c.read_dword().unwrap(), 0xFF);
    }

    #[test]
    fn remap_recurses_into_sub_chunks() {
        let mut child = Chunk::new(ClassId(2), 1);
        child.start_write().unwrap();
        child.write_object_id(ObjectId(5)).unwrap();
        child.close().unwrap();

        let mut parent = new_chunk();
        parent.start_write().unwrap();
        parent.write_sub_chunk(&child).unwrap();
        parent.close().unwrap();

        let mut table = HashMap::new();
        table.insert(ObjectId(5), ObjectId(99));
        parent.remap_object_ids(&table).unwrap();

        parent.start_read().unwrap();
        let mut sub = parent.read_sub_chunk().unwrap();
        sub.start_read().unwrap();
        assert_eq!(sub.read_object_id().unwrap(), ObjectId(99));
    }

    #[test]
    fn legacy_chunk_version_rejected_for_remap() {
        let mut c = new_chunk();
        c.chunk_version = 3;
        c.start_write().unwrap();
        c.write_object_id(ObjectId(1)).unwrap();
        c.close().unwrap();
        assert!(c.remap_object_ids(&HashMap::new()).is_err());
    }

    #[test]
    fn envelope_roundtrip_preserves_everything() {
        let mut c = new_chunk();
        c.start_write().unwrap();
        c.write_identifier(0x10).unwrap();
        c.write_object_id(ObjectId(3)).unwrap();
        c.start_manager_sequence(Guid::new(1, 2), 1).unwrap();
        c.write_manager_int(Guid::new(1, 2), 9).unwrap();
        c.close().unwrap();

        let bytes = c.to_bytes();
        let mut back = Chunk::from_bytes(&bytes).unwrap();
        back.start_read().unwrap();
        back.seek_identifier(0x10).unwrap();
        assert_eq!(back.read_object_id().unwrap(), ObjectId(3));
    }

    #[test]
    fn empty_chunk_roundtrips() {
        let mut c = new_chunk();
        c.start_write().unwrap();
        c.close().unwrap();
        let bytes = c.to_bytes();
        let mut back = Chunk::from_bytes(&bytes).unwrap();
        back.start_read().unwrap();
        assert_eq!(back.remaining(), 0);
    }

    #[test]
    fn adler32_matches_known_vector() {
        // "Wikipedia" -> 0x11E60398 is the canonical adler32 test vector.
        assert_eq!(adler32(b"Wikipedia", 1), 0x11E6_0398);
    }
}
