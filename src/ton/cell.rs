use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;

use super::Address;

pub const MAX_CELL_BITS: usize = 1023;
pub const MAX_CELL_REFS: usize = 4;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CellError {
    #[error("cell bit capacity exceeded ({0} bits)")]
    BitOverflow(usize),
    #[error("cell reference capacity exceeded")]
    RefOverflow,
    #[error("value {value} does not fit in {bits} bits")]
    ValueTooWide { value: String, bits: usize },
    #[error("unexpected end of cell data")]
    EndOfData,
    #[error("no more cell references")]
    EndOfRefs,
    #[error("unsupported encoding: {0}")]
    Unsupported(String),
    #[error("invalid bag of cells: {0}")]
    InvalidBoc(String),
}

/// Ordinary (level 0) cell: up to 1023 data bits and up to 4 child references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Arc<Cell>>,
}

impl Cell {
    pub(crate) fn from_parts(
        data: Vec<u8>,
        bit_len: usize,
        refs: Vec<Arc<Cell>>,
    ) -> Result<Self, CellError> {
        if bit_len > MAX_CELL_BITS {
            return Err(CellError::BitOverflow(bit_len));
        }
        if refs.len() > MAX_CELL_REFS {
            return Err(CellError::RefOverflow);
        }
        let mut data = data;
        data.resize(bit_len.div_ceil(8), 0);
        if bit_len % 8 != 0 {
            if let Some(last) = data.last_mut() {
                *last &= 0xff_u8 << (8 - bit_len % 8);
            }
        }
        Ok(Self {
            data,
            bit_len,
            refs,
        })
    }

    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            bit_len: 0,
            refs: Vec::new(),
        }
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn refs(&self) -> &[Arc<Cell>] {
        &self.refs
    }

    pub fn parse(&self) -> CellSlice<'_> {
        CellSlice::new(self)
    }

    pub(crate) fn descriptors(&self) -> [u8; 2] {
        let d1 = self.refs.len() as u8;
        let d2 = (self.bit_len / 8 + self.bit_len.div_ceil(8)) as u8;
        [d1, d2]
    }

    /// Data bytes with the completion tag appended when the bit length is not byte aligned.
    pub(crate) fn padded_data(&self) -> Vec<u8> {
        let mut out = self.data.clone();
        let rem = self.bit_len % 8;
        if rem != 0 {
            if let Some(last) = out.last_mut() {
                *last |= 0x80 >> rem;
            }
        }
        out
    }

    pub fn depth(&self) -> u16 {
        self.refs
            .iter()
            .map(|r| r.depth() + 1)
            .max()
            .unwrap_or(0)
    }

    /// Representation hash as used on-chain to identify the cell.
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.descriptors());
        hasher.update(self.padded_data());
        for child in &self.refs {
            hasher.update(child.depth().to_be_bytes());
        }
        for child in &self.refs {
            hasher.update(child.hash());
        }
        let digest = hasher.finalize();
        let mut out = [0_u8; 32];
        out.copy_from_slice(&digest);
        out
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash())
    }
}

#[derive(Debug, Default, Clone)]
pub struct CellBuilder {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Arc<Cell>>,
}

impl CellBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bits_left(&self) -> usize {
        MAX_CELL_BITS - self.bit_len
    }

    pub fn store_bit(&mut self, bit: bool) -> Result<&mut Self, CellError> {
        if self.bit_len >= MAX_CELL_BITS {
            return Err(CellError::BitOverflow(self.bit_len + 1));
        }
        if self.bit_len % 8 == 0 {
            self.data.push(0);
        }
        if bit {
            let idx = self.bit_len / 8;
            self.data[idx] |= 0x80 >> (self.bit_len % 8);
        }
        self.bit_len += 1;
        Ok(self)
    }

    pub fn store_uint(&mut self, value: u128, bits: usize) -> Result<&mut Self, CellError> {
        if bits > 128 || (bits < 128 && value >> bits != 0) {
            return Err(CellError::ValueTooWide {
                value: value.to_string(),
                bits,
            });
        }
        if bits > self.bits_left() {
            return Err(CellError::BitOverflow(self.bit_len + bits));
        }
        for i in (0..bits).rev() {
            self.store_bit((value >> i) & 1 == 1)?;
        }
        Ok(self)
    }

    /// Two's complement signed integer.
    pub fn store_int(&mut self, value: i128, bits: usize) -> Result<&mut Self, CellError> {
        if bits == 0 || bits > 128 {
            return Err(CellError::ValueTooWide {
                value: value.to_string(),
                bits,
            });
        }
        if bits < 128 {
            let bound = 1_i128 << (bits - 1);
            if value < -bound || value >= bound {
                return Err(CellError::ValueTooWide {
                    value: value.to_string(),
                    bits,
                });
            }
        }
        let mask = if bits == 128 { u128::MAX } else { (1_u128 << bits) - 1 };
        self.store_uint((value as u128) & mask, bits)
    }

    pub fn store_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self, CellError> {
        for byte in bytes {
            self.store_uint(u128::from(*byte), 8)?;
        }
        Ok(self)
    }

    /// `VarUInteger 16`: 4-bit byte length followed by the big-endian value.
    pub fn store_coins(&mut self, amount: u128) -> Result<&mut Self, CellError> {
        let byte_len = (128 - amount.leading_zeros() as usize).div_ceil(8);
        if byte_len > 15 {
            return Err(CellError::ValueTooWide {
                value: amount.to_string(),
                bits: 120,
            });
        }
        self.store_uint(byte_len as u128, 4)?;
        self.store_uint(amount, byte_len * 8)
    }

    /// `MsgAddress`: `addr_none$00` for `None`, otherwise `addr_std$10` without anycast.
    pub fn store_address(&mut self, address: Option<&Address>) -> Result<&mut Self, CellError> {
        match address {
            None => self.store_uint(0, 2),
            Some(addr) => {
                self.store_uint(0b10, 2)?;
                self.store_bit(false)?;
                self.store_int(i128::from(addr.workchain), 8)?;
                self.store_bytes(&addr.hash)
            }
        }
    }

    pub fn store_ref(&mut self, cell: impl Into<Arc<Cell>>) -> Result<&mut Self, CellError> {
        if self.refs.len() >= MAX_CELL_REFS {
            return Err(CellError::RefOverflow);
        }
        self.refs.push(cell.into());
        Ok(self)
    }

    /// `Maybe ^Cell`.
    pub fn store_maybe_ref(&mut self, cell: Option<Cell>) -> Result<&mut Self, CellError> {
        match cell {
            Some(cell) => {
                self.store_bit(true)?;
                self.store_ref(cell)
            }
            None => self.store_bit(false),
        }
    }

    pub fn build(&self) -> Result<Cell, CellError> {
        Cell::from_parts(self.data.clone(), self.bit_len, self.refs.clone())
    }
}

/// Read cursor over a cell's bits and references.
#[derive(Debug, Clone)]
pub struct CellSlice<'a> {
    cell: &'a Cell,
    bit_pos: usize,
    ref_pos: usize,
}

impl<'a> CellSlice<'a> {
    pub fn new(cell: &'a Cell) -> Self {
        Self {
            cell,
            bit_pos: 0,
            ref_pos: 0,
        }
    }

    pub fn remaining_bits(&self) -> usize {
        self.cell.bit_len - self.bit_pos
    }

    pub fn load_bit(&mut self) -> Result<bool, CellError> {
        if self.bit_pos >= self.cell.bit_len {
            return Err(CellError::EndOfData);
        }
        let byte = self.cell.data[self.bit_pos / 8];
        let bit = byte & (0x80 >> (self.bit_pos % 8)) != 0;
        self.bit_pos += 1;
        Ok(bit)
    }

    pub fn load_uint(&mut self, bits: usize) -> Result<u128, CellError> {
        if bits > 128 {
            return Err(CellError::Unsupported(format!("{bits}-bit integer")));
        }
        if bits > self.remaining_bits() {
            return Err(CellError::EndOfData);
        }
        let mut value = 0_u128;
        for _ in 0..bits {
            value = (value << 1) | u128::from(self.load_bit()?);
        }
        Ok(value)
    }

    pub fn load_u16(&mut self) -> Result<u16, CellError> {
        Ok(self.load_uint(16)? as u16)
    }

    pub fn load_u32(&mut self) -> Result<u32, CellError> {
        Ok(self.load_uint(32)? as u32)
    }

    pub fn load_u64(&mut self) -> Result<u64, CellError> {
        Ok(self.load_uint(64)? as u64)
    }

    pub fn load_int(&mut self, bits: usize) -> Result<i128, CellError> {
        if bits == 0 {
            return Ok(0);
        }
        let raw = self.load_uint(bits)?;
        if bits == 128 {
            return Ok(raw as i128);
        }
        let sign_bit = 1_u128 << (bits - 1);
        if raw & sign_bit != 0 {
            Ok((raw as i128).wrapping_sub(1_i128 << bits))
        } else {
            Ok(raw as i128)
        }
    }

    pub fn load_bytes(&mut self, len: usize) -> Result<Vec<u8>, CellError> {
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(self.load_uint(8)? as u8);
        }
        Ok(out)
    }

    pub fn load_coins(&mut self) -> Result<u128, CellError> {
        let byte_len = self.load_uint(4)? as usize;
        self.load_uint(byte_len * 8)
    }

    pub fn load_address(&mut self) -> Result<Option<Address>, CellError> {
        match self.load_uint(2)? {
            0b00 => Ok(None),
            0b10 => {
                if self.load_bit()? {
                    return Err(CellError::Unsupported("anycast address".to_string()));
                }
                let workchain = self.load_int(8)? as i8;
                let bytes = self.load_bytes(32)?;
                let mut hash = [0_u8; 32];
                hash.copy_from_slice(&bytes);
                Ok(Some(Address::new(workchain, hash)))
            }
            other => Err(CellError::Unsupported(format!("address tag {other:#04b}"))),
        }
    }

    pub fn load_ref(&mut self) -> Result<&'a Arc<Cell>, CellError> {
        let cell = self
            .cell
            .refs
            .get(self.ref_pos)
            .ok_or(CellError::EndOfRefs)?;
        self.ref_pos += 1;
        Ok(cell)
    }

    pub fn load_maybe_ref(&mut self) -> Result<Option<&'a Arc<Cell>>, CellError> {
        if self.load_bit()? {
            Ok(Some(self.load_ref()?))
        } else {
            Ok(None)
        }
    }
}
