//! Transparent inputs and outputs of a staged transaction.

use std::io::{self, Write};

use getset::Getters;
use ripemd::Ripemd160;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use sha2::{Digest, Sha256};
use zcash_encoding::CompactSize;

use crate::roles::combiner::merge_optional;

/// Signs all inputs and all outputs. This is the only sighash type that staged
/// transactions use.
pub const SIGHASH_ALL: u8 = 0x01;

/// The sequence number given to every input. Lock time is not used.
pub(crate) const FINAL_SEQUENCE: u32 = 0xFFFF_FFFF;

const OP_DUP: u8 = 0x76;
const OP_EQUAL: u8 = 0x87;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_HASH160: u8 = 0xa9;
const OP_CHECKSIG: u8 = 0xac;
const OP_PUSHDATA1: u8 = 0x4c;

/// Computes `RIPEMD160(SHA256(data))`.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(Sha256::digest(data)).into()
}

/// Returns the P2PKH script paying to the given public key hash.
pub fn p2pkh_script(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[OP_DUP, OP_HASH160, 20]);
    script.extend_from_slice(pubkey_hash);
    script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
    script
}

/// Returns the P2SH script paying to the given script hash.
pub fn p2sh_script(script_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(23);
    script.extend_from_slice(&[OP_HASH160, 20]);
    script.extend_from_slice(script_hash);
    script.push(OP_EQUAL);
    script
}

/// Returns the public key hash if `script` is a P2PKH script.
pub(crate) fn p2pkh_hash(script: &[u8]) -> Option<[u8; 20]> {
    match script {
        [OP_DUP, OP_HASH160, 20, hash @ .., OP_EQUALVERIFY, OP_CHECKSIG] => hash.try_into().ok(),
        _ => None,
    }
}

/// Appends a minimal push of `data` to `script`.
pub(crate) fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    match u8::try_from(data.len()) {
        Ok(len) if len < OP_PUSHDATA1 => script.push(len),
        Ok(len) => script.extend_from_slice(&[OP_PUSHDATA1, len]),
        Err(_) => {
            // P2PKH script_sigs never get here.
            script.push(0x4d);
            script.extend_from_slice(&(data.len() as u16).to_le_bytes());
        }
    }
    script.extend_from_slice(data);
}

/// Writes a script with its CompactSize length prefix.
pub(crate) fn write_script<W: Write>(mut writer: W, script: &[u8]) -> io::Result<()> {
    CompactSize::write(&mut writer, script.len())?;
    writer.write_all(script)
}

/// The number of bytes in the CompactSize encoding of `len`.
fn compact_size_len(len: usize) -> usize {
    match len {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x10000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Staged transaction fields for the transparent bundle.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct Bundle {
    pub(crate) inputs: Vec<Input>,
    pub(crate) outputs: Vec<Output>,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct Input {
    //
    // Transparent effecting data.
    //
    // These are required fields that are part of the final transaction, and are filled in
    // by the Constructor.
    //
    pub(crate) prevout_txid: [u8; 32],
    pub(crate) prevout_index: u32,
    pub(crate) sequence: u32,

    // These are required by the Signer to compute the sighash, and by the Verifier to
    // compute the fee.
    pub(crate) value: u64,
    pub(crate) script_pubkey: Vec<u8>,

    /// The compressed public key whose hash appears in `script_pubkey`.
    ///
    /// - The Signer verifies signatures against this key.
    /// - The Spend Finalizer places it in the `script_sig`.
    #[serde_as(as = "[_; 33]")]
    pub(crate) pubkey: [u8; 33],

    /// The sighash type to be used for this input. Always [`SIGHASH_ALL`].
    pub(crate) sighash_type: u8,

    /// The signature slot: a compact low-S ECDSA signature by `pubkey` over this
    /// input's sighash.
    ///
    /// - This is set by a Signer.
    /// - This is required by the Spend Finalizer to assemble the `script_sig`.
    #[serde_as(as = "Option<[_; 64]>")]
    pub(crate) signature: Option<[u8; 64]>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct Output {
    pub(crate) value: u64,
    pub(crate) script_pubkey: Vec<u8>,
}

impl Input {
    /// Writes the 36-byte outpoint this input spends.
    pub(crate) fn write_prevout<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.prevout_txid)?;
        writer.write_all(&self.prevout_index.to_le_bytes())
    }
}

impl Output {
    /// Constructs a transparent output, for example to describe expected change.
    pub fn new(value: u64, script_pubkey: Vec<u8>) -> Self {
        Self {
            value,
            script_pubkey,
        }
    }

    /// The size of this output in the transaction encoding.
    pub(crate) fn serialized_size(&self) -> usize {
        8 + compact_size_len(self.script_pubkey.len()) + self.script_pubkey.len()
    }

    pub(crate) fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.value.to_le_bytes())?;
        write_script(writer, &self.script_pubkey)
    }
}

impl Bundle {
    /// Merges this bundle with another.
    ///
    /// Returns `None` if the bundles differ in anything other than their signature slots,
    /// or if a signature slot is filled with different values.
    pub(crate) fn merge(mut self, other: Self) -> Option<Self> {
        // Destructure `other` to ensure we handle everything.
        let Self { inputs, outputs } = other;

        if self.inputs.len() != inputs.len() || self.outputs.len() != outputs.len() {
            return None;
        }

        for (lhs, rhs) in self.inputs.iter_mut().zip(inputs) {
            // Destructure `rhs` to ensure we handle everything.
            let Input {
                prevout_txid,
                prevout_index,
                sequence,
                value,
                script_pubkey,
                pubkey,
                sighash_type,
                signature,
            } = rhs;

            if lhs.prevout_txid != prevout_txid
                || lhs.prevout_index != prevout_index
                || lhs.sequence != sequence
                || lhs.value != value
                || lhs.script_pubkey != script_pubkey
                || lhs.pubkey != pubkey
                || lhs.sighash_type != sighash_type
            {
                return None;
            }

            if !merge_optional(&mut lhs.signature, signature) {
                return None;
            }
        }

        if self.outputs != outputs {
            return None;
        }

        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::{hash160, p2pkh_hash, p2pkh_script, p2sh_script, push_data, Bundle, Input, Output};

    fn input(signature: Option<[u8; 64]>) -> Input {
        Input {
            prevout_txid: [1; 32],
            prevout_index: 0,
            sequence: super::FINAL_SEQUENCE,
            value: 10_000,
            script_pubkey: p2pkh_script(&[2; 20]),
            pubkey: [3; 33],
            sighash_type: super::SIGHASH_ALL,
            signature,
        }
    }

    #[test]
    fn script_shapes() {
        let p2pkh = p2pkh_script(&[7; 20]);
        assert_eq!(p2pkh.len(), 25);
        assert_eq!(p2pkh_hash(&p2pkh), Some([7; 20]));

        let p2sh = p2sh_script(&[7; 20]);
        assert_eq!(p2sh.len(), 23);
        assert_eq!(p2pkh_hash(&p2sh), None);

        assert_eq!(Output::new(1, p2pkh).serialized_size(), 34);
    }

    #[test]
    fn hash160_of_empty_input() {
        assert_eq!(
            hex::encode(hash160(&[])),
            "b472a266d0bd89c13706a4132ccfb16f7c3b9fcb"
        );
    }

    #[test]
    fn push_data_encodings() {
        let mut script = vec![];
        push_data(&mut script, &[0xaa; 33]);
        assert_eq!(script[0], 33);
        assert_eq!(script.len(), 34);

        let mut script = vec![];
        push_data(&mut script, &[0xaa; 80]);
        assert_eq!(&script[..2], &[0x4c, 80]);
    }

    #[test]
    fn merge_fills_signature_slots() {
        let empty = Bundle {
            inputs: vec![input(None)],
            outputs: vec![],
        };
        let signed = Bundle {
            inputs: vec![input(Some([9; 64]))],
            outputs: vec![],
        };

        let merged = empty.clone().merge(signed.clone()).unwrap();
        assert_eq!(merged, signed);
        assert_eq!(signed.clone().merge(empty.clone()).unwrap(), signed);

        let conflicting = Bundle {
            inputs: vec![input(Some([8; 64]))],
            outputs: vec![],
        };
        assert!(signed.merge(conflicting).is_none());
    }

    #[test]
    fn merge_rejects_skeleton_changes() {
        let bundle = Bundle {
            inputs: vec![input(None)],
            outputs: vec![Output::new(5_000, p2pkh_script(&[4; 20]))],
        };

        let mut other = bundle.clone();
        other.outputs[0].value += 1;
        assert!(bundle.clone().merge(other).is_none());

        let mut other = bundle.clone();
        other.inputs[0].prevout_index = 1;
        assert!(bundle.clone().merge(other).is_none());

        let mut other = bundle.clone();
        other.outputs.clear();
        assert!(bundle.merge(other).is_none());
    }
}
