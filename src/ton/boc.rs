//! Bag-of-cells (BOC) serialization, the transport form of cells in wallets and RPC payloads.

use base64::{engine::general_purpose, Engine as _};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::cell::{Cell, CellError};

const BOC_MAGIC: u32 = 0xb5ee_9c72;
const FLAG_HAS_INDEX: u8 = 0x80;
const FLAG_HAS_CRC32C: u8 = 0x40;
const FLAG_WITH_HASHES: u8 = 0x10;
const FLAG_EXOTIC: u8 = 0x08;

fn crc32c(data: &[u8]) -> u32 {
    let mut crc = !0_u32;
    for byte in data {
        crc ^= u32::from(*byte);
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0x82f6_3b78 & mask);
        }
    }
    !crc
}

fn bytes_for(value: usize) -> usize {
    let bits = usize::BITS as usize - value.leading_zeros() as usize;
    bits.div_ceil(8).max(1)
}

fn push_uint(out: &mut Vec<u8>, value: usize, len: usize) {
    for i in (0..len).rev() {
        out.push((value >> (i * 8)) as u8);
    }
}

/// Orders cells parents-first (reverse post-order), deduplicated by hash.
fn topological_order(root: &Cell) -> (Vec<&Cell>, HashMap<[u8; 32], usize>) {
    fn visit<'c>(
        cell: &'c Cell,
        seen: &mut HashSet<[u8; 32]>,
        post_order: &mut Vec<(&'c Cell, [u8; 32])>,
    ) {
        let hash = cell.hash();
        if !seen.insert(hash) {
            return;
        }
        for child in cell.refs() {
            visit(child, seen, post_order);
        }
        post_order.push((cell, hash));
    }

    let mut seen = HashSet::new();
    let mut post_order = Vec::new();
    visit(root, &mut seen, &mut post_order);
    post_order.reverse();

    let index = post_order
        .iter()
        .enumerate()
        .map(|(i, (_, hash))| (*hash, i))
        .collect();
    let cells = post_order.into_iter().map(|(cell, _)| cell).collect();
    (cells, index)
}

pub fn serialize(root: &Cell) -> Result<Vec<u8>, CellError> {
    let (cells, index) = topological_order(root);
    let size_bytes = bytes_for(cells.len());
    if size_bytes > 4 {
        return Err(CellError::InvalidBoc("too many cells".to_string()));
    }

    let mut body = Vec::new();
    for cell in &cells {
        body.extend_from_slice(&cell.descriptors());
        body.extend_from_slice(&cell.padded_data());
        for child in cell.refs() {
            let child_index = index
                .get(&child.hash())
                .copied()
                .ok_or_else(|| CellError::InvalidBoc("dangling reference".to_string()))?;
            push_uint(&mut body, child_index, size_bytes);
        }
    }
    let off_bytes = bytes_for(body.len());

    let mut out = Vec::with_capacity(body.len() + 32);
    out.extend_from_slice(&BOC_MAGIC.to_be_bytes());
    out.push(FLAG_HAS_CRC32C | size_bytes as u8);
    out.push(off_bytes as u8);
    push_uint(&mut out, cells.len(), size_bytes);
    push_uint(&mut out, 1, size_bytes);
    push_uint(&mut out, 0, size_bytes);
    push_uint(&mut out, body.len(), off_bytes);
    push_uint(&mut out, 0, size_bytes);
    out.extend_from_slice(&body);
    let crc = crc32c(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], CellError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| CellError::InvalidBoc("truncated data".to_string()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8, CellError> {
        Ok(self.take(1)?[0])
    }

    fn uint(&mut self, len: usize) -> Result<usize, CellError> {
        Ok(self
            .take(len)?
            .iter()
            .fold(0_usize, |acc, b| (acc << 8) | usize::from(*b)))
    }
}

struct RawCell {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<usize>,
}

pub fn deserialize(bytes: &[u8]) -> Result<Cell, CellError> {
    let mut reader = Reader { bytes, pos: 0 };
    let magic = u32::from_be_bytes(
        reader
            .take(4)?
            .try_into()
            .map_err(|_| CellError::InvalidBoc("missing magic".to_string()))?,
    );
    if magic != BOC_MAGIC {
        return Err(CellError::InvalidBoc(format!("unknown magic {magic:#010x}")));
    }

    let flags = reader.byte()?;
    let has_index = flags & FLAG_HAS_INDEX != 0;
    let has_crc = flags & FLAG_HAS_CRC32C != 0;
    let size_bytes = usize::from(flags & 0x07);
    let off_bytes = usize::from(reader.byte()?);
    if !(1..=4).contains(&size_bytes) || !(1..=8).contains(&off_bytes) {
        return Err(CellError::InvalidBoc("bad size fields".to_string()));
    }

    let cells_num = reader.uint(size_bytes)?;
    let roots_num = reader.uint(size_bytes)?;
    let _absent = reader.uint(size_bytes)?;
    let total_size = reader.uint(off_bytes)?;
    if roots_num == 0 {
        return Err(CellError::InvalidBoc("no root cell".to_string()));
    }
    if cells_num == 0 || cells_num > bytes.len() || total_size > bytes.len() {
        return Err(CellError::InvalidBoc("declared sizes exceed payload".to_string()));
    }
    let root_index = reader.uint(size_bytes)?;
    for _ in 1..roots_num {
        reader.uint(size_bytes)?;
    }
    if has_index {
        reader.take(cells_num.saturating_mul(off_bytes))?;
    }

    let cells_start = reader.pos;
    if has_crc {
        let expected_end = cells_start
            .checked_add(total_size)
            .filter(|end| end.checked_add(4).is_some_and(|with_crc| with_crc <= bytes.len()))
            .ok_or_else(|| CellError::InvalidBoc("truncated checksum".to_string()))?;
        let stored = u32::from_le_bytes([
            bytes[expected_end],
            bytes[expected_end + 1],
            bytes[expected_end + 2],
            bytes[expected_end + 3],
        ]);
        if crc32c(&bytes[..expected_end]) != stored {
            return Err(CellError::InvalidBoc("checksum mismatch".to_string()));
        }
    }

    let mut raw_cells = Vec::with_capacity(cells_num.min(bytes.len()));
    for i in 0..cells_num {
        let d1 = reader.byte()?;
        let d2 = usize::from(reader.byte()?);
        if d1 & FLAG_EXOTIC != 0 {
            return Err(CellError::Unsupported("exotic cell".to_string()));
        }
        let refs_count = usize::from(d1 & 0x07);
        if refs_count > 4 {
            return Err(CellError::InvalidBoc("too many references".to_string()));
        }
        if d1 & FLAG_WITH_HASHES != 0 {
            let hash_count = (d1 >> 5).count_ones() as usize + 1;
            reader.take(hash_count * (32 + 2))?;
        }

        let data_len = d2.div_ceil(2);
        let data = reader.take(data_len)?.to_vec();
        let bit_len = if d2 % 2 == 0 {
            data_len * 8
        } else {
            let last = data.last().copied().unwrap_or(0);
            if last == 0 {
                return Err(CellError::InvalidBoc("missing completion tag".to_string()));
            }
            data_len * 8 - last.trailing_zeros() as usize - 1
        };

        let mut refs = Vec::with_capacity(refs_count);
        for _ in 0..refs_count {
            let target = reader.uint(size_bytes)?;
            if target <= i || target >= cells_num {
                return Err(CellError::InvalidBoc("reference out of order".to_string()));
            }
            refs.push(target);
        }
        raw_cells.push(RawCell {
            data,
            bit_len,
            refs,
        });
    }
    if reader.pos - cells_start != total_size {
        return Err(CellError::InvalidBoc("cell data size mismatch".to_string()));
    }

    let mut built: Vec<Option<Arc<Cell>>> = vec![None; cells_num];
    for (i, raw) in raw_cells.into_iter().enumerate().rev() {
        let refs = raw
            .refs
            .iter()
            .map(|idx| {
                built[*idx]
                    .clone()
                    .ok_or_else(|| CellError::InvalidBoc("unresolved reference".to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        built[i] = Some(Arc::new(Cell::from_parts(raw.data, raw.bit_len, refs)?));
    }

    let root = built
        .get(root_index)
        .cloned()
        .flatten()
        .ok_or_else(|| CellError::InvalidBoc("root index out of range".to_string()))?;
    Ok(Arc::unwrap_or_clone(root))
}

/// Decodes standard or URL-safe base64, padded or not.
pub(crate) fn decode_base64(raw: &str) -> Option<Vec<u8>> {
    let trimmed = raw.trim();
    general_purpose::STANDARD
        .decode(trimmed)
        .or_else(|_| general_purpose::URL_SAFE.decode(trimmed))
        .or_else(|_| general_purpose::STANDARD_NO_PAD.decode(trimmed))
        .or_else(|_| general_purpose::URL_SAFE_NO_PAD.decode(trimmed))
        .ok()
}

impl Cell {
    pub fn to_boc(&self) -> Result<Vec<u8>, CellError> {
        serialize(self)
    }

    pub fn to_boc_base64(&self) -> Result<String, CellError> {
        Ok(general_purpose::STANDARD.encode(self.to_boc()?))
    }

    pub fn from_boc(bytes: &[u8]) -> Result<Self, CellError> {
        deserialize(bytes)
    }

    pub fn from_boc_base64(raw: &str) -> Result<Self, CellError> {
        let bytes =
            decode_base64(raw).ok_or_else(|| CellError::InvalidBoc("invalid base64".to_string()))?;
        deserialize(&bytes)
    }
}
