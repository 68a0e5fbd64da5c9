//! Size-prefixed XDR frame streams.
//!
//! This is the framing stellar-core uses for its metadata output stream and
//! history files, so a file or pipe written by a node can be read back here
//! one `LedgerCloseMeta` at a time.
//!
//! # Wire Format
//!
//! ```text
//! [4-byte big-endian length, bit 31 set] [XDR payload]
//! ```
//!
//! Bit 31 is the "last fragment" marker from XDR record marking (RFC 5531);
//! frames are never fragmented, so it is always set on write and masked off
//! on read.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use stellar_xdr::curr::{Limits, ReadXdr, WriteXdr};

use crate::{Error, Result};

const LAST_FRAGMENT_BIT: u32 = 0x8000_0000;

/// Writes XDR values as size-prefixed frames.
pub struct XdrOutputStream {
    writer: BufWriter<Box<dyn Write + Send>>,
}

impl XdrOutputStream {
    /// Create (or truncate) a file and write frames to it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self::from_writer(Box::new(file)))
    }

    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Encode `value` and write it as one frame.
    ///
    /// Returns the number of bytes written, header included.
    pub fn write_one<T: WriteXdr>(&mut self, value: &T) -> Result<usize> {
        let payload = value.to_xdr(Limits::none())?;
        let len = u32::try_from(payload.len())
            .ok()
            .filter(|len| len & LAST_FRAGMENT_BIT == 0)
            .ok_or_else(|| {
                Error::InvalidData(format!("frame of {} bytes is too large", payload.len()))
            })?;

        self.writer.write_all(&(len | LAST_FRAGMENT_BIT).to_be_bytes())?;
        self.writer.write_all(&payload)?;
        self.writer.flush()?;
        Ok(4 + payload.len())
    }

    pub fn flush(&mut self) -> Result<()> {
        Ok(self.writer.flush()?)
    }
}

/// Reads size-prefixed XDR frames written by [`XdrOutputStream`] or by
/// stellar-core.
pub struct XdrInputStream {
    reader: BufReader<Box<dyn Read + Send>>,
}

impl XdrInputStream {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::from_reader(Box::new(file)))
    }

    pub fn from_reader(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` on a clean end of stream (no header bytes left). A
    /// header without its full payload is [`Error::Io`]; a payload that does
    /// not decode as `T` is [`Error::Xdr`].
    pub fn read_one<T: ReadXdr>(&mut self) -> Result<Option<T>> {
        let mut header = [0u8; 4];
        match self.reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(header) & !LAST_FRAGMENT_BIT;
        let mut payload = vec![0u8; len as usize];
        self.reader.read_exact(&mut payload)?;

        Ok(Some(T::from_xdr(&payload, Limits::none())?))
    }

    /// Read frames until end of stream.
    pub fn read_all<T: ReadXdr>(&mut self) -> Result<Vec<T>> {
        let mut values = Vec::new();
        while let Some(value) = self.read_one()? {
            values.push(value);
        }
        Ok(values)
    }
}
