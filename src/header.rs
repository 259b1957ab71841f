//! File-level framing: the fixed signature header, the compressed Header1
//! metadata region (object descriptor table, plugin/include lists), and the
//! byte-level helpers both are built from.
//!
//! Grounded in the teacher's `chunk_tree::IffDocument::write_with_dirm_patch`
//! two-pass layout (reserve space for a directory, stream payloads, patch
//! offsets back in) generalized to this format's fixed binary header plus a
//! separately compressed metadata region, per §4.D/§6.1.

use crate::chunk::adler32;
use crate::error::{NmoError, Result};
use crate::types::ClassId;
use byteorder::{ByteOrder, LittleEndian};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

pub const SIGNATURE: [u8; 8] = *b"Nemo Fi\0";
pub const FIXED_HEADER_SIZE: usize = 8 + 11 * 4;

pub const MIN_FILE_VERSION: u32 = 2;
pub const MAX_FILE_VERSION: u32 = 9;

pub const INCLUDE_REFERENCES: u32 = 0x1;
pub const EXCLUDE_REFERENCES: u32 = 0x2;
pub const COMPRESS_DATA: u32 = 0x4;

/// The fixed-layout prefix of every file: signature, versions, section
/// sizes, and the Header1 CRC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub ck_version: u32,
    pub file_version: u32,
    pub file_write_mode: u32,
    pub manager_count: u32,
    pub object_count: u32,
    pub max_id_saved: u32,
    pub hdr1_crc: u32,
    pub hdr1_packed_size: u32,
    pub hdr1_unpacked_size: u32,
    pub data_packed_size: u32,
    pub data_unpacked_size: u32,
}

impl FileHeader {
    pub fn include_references(&self) -> bool {
        self.file_write_mode & INCLUDE_REFERENCES != 0
    }

    pub fn exclude_references(&self) -> bool {
        self.file_write_mode & EXCLUDE_REFERENCES != 0
    }

    pub fn compress_data(&self) -> bool {
        self.file_write_mode & COMPRESS_DATA != 0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FIXED_HEADER_SIZE);
        out.extend_from_slice(&SIGNATURE);
        for v in [
            self.ck_version,
            self.file_version,
            self.file_write_mode,
            self.manager_count,
            self.object_count,
            self.max_id_saved,
            self.hdr1_crc,
            self.hdr1_packed_size,
            self.hdr1_unpacked_size,
            self.data_packed_size,
            self.data_unpacked_size,
        ] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// Parses the fixed prefix and returns it along with the remaining
    /// bytes (the Header1 region followed by the data section).
    pub fn parse(bytes: &[u8]) -> Result<(FileHeader, &[u8])> {
        if bytes.len() < FIXED_HEADER_SIZE {
            return Err(NmoError::InvalidFormat(
                "buffer shorter than the fixed file header".into(),
            ));
        }
        if bytes[..8] != SIGNATURE {
            return Err(NmoError::InvalidFormat("bad file signature".into()));
        }
        let fields = &bytes[8..FIXED_HEADER_SIZE];
        let mut words = [0u32; 11];
        LittleEndian::read_u32_into(fields, &mut words);
        let header = FileHeader {
            ck_version: words[0],
            file_version: words[1],
            file_write_mode: words[2],
            manager_count: words[3],
            object_count: words[4],
            max_id_saved: words[5],
            hdr1_crc: words[6],
            hdr1_packed_size: words[7],
            hdr1_unpacked_size: words[8],
            data_packed_size: words[9],
            data_unpacked_size: words[10],
        };
        if !(MIN_FILE_VERSION..=MAX_FILE_VERSION).contains(&header.file_version) {
            return Err(NmoError::UnsupportedVersion(format!(
                "file_version {} outside supported range {}..={}",
                header.file_version, MIN_FILE_VERSION, MAX_FILE_VERSION
            )));
        }
        Ok((header, &bytes[FIXED_HEADER_SIZE..]))
    }
}

/// One entry of the Header1 descriptor table: where to find an object's
/// chunk in the data section, and its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDescriptor {
    pub file_index: u32,
    pub class_id: ClassId,
    pub name: Option<String>,
    pub chunk_offset: u32,
    pub chunk_size: u32,
}

/// The decompressed Header1 region: plugin/include-file counts plus the
/// full object descriptor table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Header1 {
    pub plugin_category_count: u32,
    pub included_file_count: u32,
    pub descriptors: Vec<ObjectDescriptor>,
}

impl Header1 {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = DwordWriter::new();
        w.dword(self.plugin_category_count);
        w.dword(self.included_file_count);
        w.dword(self.descriptors.len() as u32);
        for d in &self.descriptors {
            w.dword(d.file_index);
            w.dword(d.class_id.0);
            w.string(d.name.as_deref());
            w.dword(d.chunk_offset);
            w.dword(d.chunk_size);
        }
        w.into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Header1> {
        let mut r = DwordReader::new(bytes);
        let plugin_category_count = r.dword()?;
        let included_file_count = r.dword()?;
        let descriptor_count = r.dword()? as usize;
        let mut descriptors = Vec::with_capacity(descriptor_count);
        for _ in 0..descriptor_count {
            let file_index = r.dword()?;
            let class_id = ClassId(r.dword()?);
            let name = r.string()?;
            let chunk_offset = r.dword()?;
            let chunk_size = r.dword()?;
            descriptors.push(ObjectDescriptor {
                file_index,
                class_id,
                name,
                chunk_offset,
                chunk_size,
            });
        }
        Ok(Header1 {
            plugin_category_count,
            included_file_count,
            descriptors,
        })
    }
}

/// Compresses `data` with deflate and returns `(packed_bytes, crc)`, the crc
/// being the Adler-32 of the *uncompressed* bytes per §6.1.
pub fn pack_region(data: &[u8], level: i32) -> Result<(Vec<u8>, u32)> {
    let crc = adler32(data, 1);
    let level = if level < 0 { 6 } else { (level as u32).min(9) };
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
    encoder
        .write_all(data)
        .map_err(|e| NmoError::Compression(e.to_string()))?;
    let packed = encoder
        .finish()
        .map_err(|e| NmoError::Compression(e.to_string()))?;
    Ok((packed, crc))
}

/// Decompresses `data`, verifies its length against `unpacked_size`, and
/// checks `crc` against the Adler-32 of the result.
pub fn unpack_region(data: &[u8], unpacked_size: usize, crc: u32) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(unpacked_size);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| NmoError::Compression(e.to_string()))?;
    if out.len() != unpacked_size {
        return Err(NmoError::InvalidFormat(format!(
            "decompressed {} bytes, header declared {}",
            out.len(),
            unpacked_size
        )));
    }
    let actual_crc = adler32(&out, 1);
    if actual_crc != crc {
        return Err(NmoError::ValidationFailed(format!(
            "CRC mismatch: header says {crc:#010X}, computed {actual_crc:#010X}"
        )));
    }
    Ok(out)
}

/// Minimal DWORD-granular byte writer for the Header1 region: strings use
/// the same length-prefixed-and-padded convention as [`crate::chunk::Chunk`],
/// but Header1 is parsed before a session arena exists, so names are plain
/// owned `String`s rather than arena handles.
struct DwordWriter {
    bytes: Vec<u8>,
}

impl DwordWriter {
    fn new() -> Self {
        DwordWriter { bytes: Vec::new() }
    }

    fn dword(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn string(&mut self, s: Option<&str>) {
        match s {
            None | Some("") => self.dword(0),
            Some(s) => {
                let mut content = s.as_bytes().to_vec();
                content.push(0);
                self.dword(content.len() as u32);
                for chunk4 in content.chunks(4) {
                    let mut word = [0u8; 4];
                    word[..chunk4.len()].copy_from_slice(chunk4);
                    self.bytes.extend_from_slice(&word);
                }
            }
        }
    }

    fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

struct DwordReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> DwordReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        DwordReader { bytes, pos: 0 }
    }

    fn dword(&mut self) -> Result<u32> {
        if self.pos + 4 > self.bytes.len() {
            return Err(NmoError::EndOfBuffer);
        }
        let v = LittleEndian::read_u32(&self.bytes[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(v)
    }

    fn string(&mut self) -> Result<Option<String>> {
        let len = self.dword()? as usize;
        if len == 0 {
            return Ok(None);
        }
        let dwords = len.div_ceil(4);
        let byte_len = dwords * 4;
        if self.pos + byte_len > self.bytes.len() {
            return Err(NmoError::EndOfBuffer);
        }
        let raw = &self.bytes[self.pos..self.pos + byte_len];
        self.pos += byte_len;
        let content = &raw[..len.saturating_sub(1)]; // drop NUL terminator
        let s = String::from_utf8(content.to_vec())
            .map_err(|e| NmoError::InvalidFormat(format!("non-utf8 descriptor name: {e}")))?;
        Ok(Some(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> FileHeader {
        FileHeader {
            ck_version: 0x0D0C0000,
            file_version: 8,
            file_write_mode: COMPRESS_DATA,
            manager_count: 2,
            object_count: 3,
            max_id_saved: 10,
            hdr1_crc: 0xDEAD_BEEF,
            hdr1_packed_size: 100,
            hdr1_unpacked_size: 200,
            data_packed_size: 300,
            data_unpacked_size: 400,
        }
    }

    #[test]
    fn file_header_roundtrip() {
        let header = sample_header();
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), FIXED_HEADER_SIZE);
        let (parsed, rest) = FileHeader::parse(&bytes).unwrap();
        assert_eq!(parsed, header);
        assert!(rest.is_empty());
    }

    #[test]
    fn bad_signature_rejected() {
        let mut bytes = sample_header().to_bytes();
        bytes[0] = b'X';
        assert!(FileHeader::parse(&bytes).is_err());
    }

    #[test]
    fn file_version_out_of_range_rejected() {
        let mut header = sample_header();
        header.file_version = 1;
        assert!(FileHeader::parse(&header.to_bytes()).is_err());
        header.file_version = 10;
        assert!(FileHeader::parse(&header.to_bytes()).is_err());
    }

    #[test]
    fn truncated_buffer_rejected() {
        let bytes = sample_header().to_bytes();
        assert!(FileHeader::parse(&bytes[..FIXED_HEADER_SIZE - 1]).is_err());
    }

    #[test]
    fn file_write_mode_flags() {
        let header = sample_header();
        assert!(header.compress_data());
        assert!(!header.include_references());
        assert!(!header.exclude_references());
    }

    #[test]
    fn header1_descriptor_roundtrip() {
        let h1 = Header1 {
            plugin_category_count: 1,
            included_file_count: 0,
            descriptors: vec![
                ObjectDescriptor {
                    file_index: 0,
                    class_id: ClassId(42),
                    name: Some("root".into()),
                    chunk_offset: 0,
                    chunk_size: 16,
                },
                ObjectDescriptor {
                    file_index: 1,
                    class_id: ClassId(43),
                    name: None,
                    chunk_offset: 16,
                    chunk_size: 32,
                },
            ],
        };
        let bytes = h1.to_bytes();
        let parsed = Header1::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, h1);
    }

    #[test]
    fn region_pack_roundtrip_and_crc_check() {
        let data = b"object descriptor table payload bytes".to_vec();
        let (packed, crc) = pack_region(&data, 6).unwrap();
        let unpacked = unpack_region(&packed, data.len(), crc).unwrap();
        assert_eq!(unpacked, data);
    }

    #[test]
    fn region_crc_mismatch_detected() {
        let data = b"payload".to_vec();
        let (packed, crc) = pack_region(&data, 6).unwrap();
        assert!(unpack_region(&packed, data.len(), crc.wrapping_add(1)).is_err());
    }

    #[test]
    fn region_size_mismatch_detected() {
        let data = b"payload".to_vec();
        let (packed, crc) = pack_region(&data, 6).unwrap();
        assert!(unpack_region(&packed, data.len() + 1, crc).is_err());
    }
}
