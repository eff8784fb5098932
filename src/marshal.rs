// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Wire marshalling primitives for TPM 1.2 structures.
//!
//! All multi-byte integers are big-endian. Variable-length fields use the
//! `TPM_SIZED_BUFFER` convention: a `u32` length followed by that many bytes.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MarshalError {
    #[error("size mismatch: needed {needed} bytes, {remaining} remaining")]
    SizeMismatch { needed: usize, remaining: usize },
    #[error("bad structure tag: expected {expected:#06x}, found {found:#06x}")]
    BadTag { expected: u16, found: u16 },
    #[error("sized buffer length {len} exceeds maximum {max}")]
    SizedBufferTooLarge { len: usize, max: usize },
}

/// Growable output buffer.
#[derive(Debug, Default)]
pub struct Sbuffer {
    data: Vec<u8>,
}

impl Sbuffer {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn append_u8(&mut self, val: u8) {
        self.data.push(val);
    }

    pub fn append_u16(&mut self, val: u16) {
        self.data.extend_from_slice(&val.to_be_bytes());
    }

    pub fn append_u32(&mut self, val: u32) {
        self.data.extend_from_slice(&val.to_be_bytes());
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Append a `TPM_SIZED_BUFFER`: `u32` length, then the bytes.
    pub fn append_sized(&mut self, bytes: &[u8]) {
        self.append_u32(bytes.len() as u32);
        self.append_bytes(bytes);
    }

    pub fn append_bool(&mut self, val: bool) {
        self.append_u8(val as u8);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

/// Checked input reader over a byte stream.
///
/// Every `load_*` either consumes the requested bytes or fails without
/// consuming anything.
#[derive(Debug, Clone, Copy)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn consumed(&self) -> usize {
        self.pos
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], MarshalError> {
        if self.remaining() < needed {
            return Err(MarshalError::SizeMismatch {
                needed,
                remaining: self.remaining(),
            });
        }
        let out = &self.data[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(out)
    }

    pub fn load_u8(&mut self) -> Result<u8, MarshalError> {
        Ok(self.take(1)?[0])
    }

    pub fn load_u16(&mut self) -> Result<u16, MarshalError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn load_u32(&mut self) -> Result<u32, MarshalError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn load_bytes(&mut self, len: usize) -> Result<&'a [u8], MarshalError> {
        self.take(len)
    }

    pub fn load_array<const N: usize>(&mut self) -> Result<[u8; N], MarshalError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Load a `TPM_SIZED_BUFFER`, rejecting declared lengths above `max`.
    pub fn load_sized(&mut self, max: usize) -> Result<&'a [u8], MarshalError> {
        // Peek the length without committing, so a truncated payload leaves
        // the cursor untouched.
        let mut probe = *self;
        let len = probe.load_u32()? as usize;
        if len > max {
            return Err(MarshalError::SizedBufferTooLarge { len, max });
        }
        probe.take(len)?;
        self.load_u32()?;
        self.take(len)
    }

    pub fn load_bool(&mut self) -> Result<bool, MarshalError> {
        Ok(self.load_u8()? != 0)
    }

    /// Load a `u16` structure tag and require it to match `expected`.
    pub fn expect_tag(&mut self, expected: u16) -> Result<(), MarshalError> {
        let mut probe = *self;
        let found = probe.load_u16()?;
        if found != expected {
            return Err(MarshalError::BadTag { expected, found });
        }
        self.load_u16()?;
        Ok(())
    }
}
