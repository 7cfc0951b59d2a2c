//! Transparent coins supplied by the caller, and their byte encoding.
//!
//! The encoding is how the boundary layer receives inputs:
//!
//! ```text
//! count: u16 LE
//! count × {
//!     pubkey:        [u8; 33]
//!     prevout_txid:  [u8; 32]
//!     prevout_index: u32 LE
//!     value:         u64 LE
//!     script_len:    u16 LE
//!     script_pubkey: [u8; script_len]
//! }
//! ```

use core::fmt;
use std::io::{self, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use getset::Getters;

/// A transparent coin that the caller wants to spend.
#[derive(Clone, Debug, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct TransparentInput {
    /// The compressed public key controlling the coin.
    pubkey: [u8; 33],
    prevout_txid: [u8; 32],
    prevout_index: u32,
    value: u64,
    script_pubkey: Vec<u8>,
}

impl TransparentInput {
    pub fn new(
        pubkey: [u8; 33],
        prevout_txid: [u8; 32],
        prevout_index: u32,
        value: u64,
        script_pubkey: Vec<u8>,
    ) -> Self {
        Self {
            pubkey,
            prevout_txid,
            prevout_index,
            value,
            script_pubkey,
        }
    }

    fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut pubkey = [0; 33];
        reader.read_exact(&mut pubkey)?;
        let mut prevout_txid = [0; 32];
        reader.read_exact(&mut prevout_txid)?;
        let prevout_index = reader.read_u32::<LittleEndian>()?;
        let value = reader.read_u64::<LittleEndian>()?;
        let script_len = reader.read_u16::<LittleEndian>()?;
        let mut script_pubkey = vec![0; usize::from(script_len)];
        reader.read_exact(&mut script_pubkey)?;

        Ok(Self {
            pubkey,
            prevout_txid,
            prevout_index,
            value,
            script_pubkey,
        })
    }
}

/// Parses a list of inputs from their byte encoding.
pub fn parse_inputs(mut bytes: &[u8]) -> Result<Vec<TransparentInput>, Error> {
    let count = bytes.read_u16::<LittleEndian>().map_err(Error::Read)?;
    let inputs = (0..count)
        .map(|_| TransparentInput::read(&mut bytes))
        .collect::<io::Result<Vec<_>>>()
        .map_err(Error::Read)?;

    if !bytes.is_empty() {
        return Err(Error::TrailingBytes(bytes.len()));
    }

    Ok(inputs)
}

/// Encodes a list of inputs.
pub fn serialize_inputs(inputs: &[TransparentInput]) -> Result<Vec<u8>, Error> {
    let count = u16::try_from(inputs.len()).map_err(|_| Error::TooManyInputs(inputs.len()))?;

    let mut bytes = count.to_le_bytes().to_vec();
    for (index, input) in inputs.iter().enumerate() {
        let script_len = u16::try_from(input.script_pubkey.len())
            .map_err(|_| Error::ScriptTooLong { index })?;
        bytes.extend_from_slice(&input.pubkey);
        bytes.extend_from_slice(&input.prevout_txid);
        bytes.extend_from_slice(&input.prevout_index.to_le_bytes());
        bytes.extend_from_slice(&input.value.to_le_bytes());
        bytes.extend_from_slice(&script_len.to_le_bytes());
        bytes.extend_from_slice(&input.script_pubkey);
    }

    Ok(bytes)
}

/// Errors that can occur while encoding or decoding transparent inputs.
#[derive(Debug)]
pub enum Error {
    /// The encoding was truncated.
    Read(io::Error),
    ScriptTooLong { index: usize },
    TooManyInputs(usize),
    TrailingBytes(usize),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Read(e) => write!(f, "malformed input encoding: {}", e),
            Error::ScriptTooLong { index } => {
                write!(f, "input {} has a script longer than 65535 bytes", index)
            }
            Error::TooManyInputs(n) => write!(f, "{} inputs cannot be encoded", n),
            Error::TrailingBytes(n) => write!(f, "{} unexpected bytes after the inputs", n),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Read(e) => Some(e),
            _ => None,
        }
    }
}
