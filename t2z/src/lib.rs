//! Staged transparent-to-shielded Zcash transactions.
//!
//! A [`StagedTransaction`] is a transaction under construction that can be passed between
//! distinct entities, in the spirit of BIP 174 (Partially Signed Bitcoin Transactions):
//! - Constructor (single entity)
//!   - Builds the transaction skeleton from caller-supplied transparent coins and a
//!     [`PaymentRequest`], leaving empty slots for proofs and signatures.
//! - Prover (anyone can execute)
//!   - Fills the proof slots of the shielded actions.
//! - Verifier (every Signer that did not construct the transaction)
//!   - Checks that the outputs and change match what was requested.
//! - Signer (one or more entities)
//!   - Computes the signature hash of a transparent input and attaches a signature.
//! - Combiner (anyone can execute)
//!   - Merges several copies of the same staged transaction that were advanced
//!     independently.
//! - Transaction Extractor (anyone can execute)
//!   - Finalizes the transparent spends and emits the raw v5 transaction.
//!
//! The skeleton (every field other than the proof, witness and signature slots) never
//! changes after construction. Every role returns a new value rather than mutating one
//! that another holder can observe, and a staged transaction can be serialized between
//! any two steps.
//!
#![cfg_attr(feature = "std", doc = "## Feature flags")]
#![cfg_attr(feature = "std", doc = document_features::document_features!())]
//!

#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
// Catch documentation errors caused by code changes.
#![deny(rustdoc::broken_intra_doc_links)]

use core::fmt;

use getset::Getters;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

pub mod common;
pub mod fees;
pub mod input;
pub mod request;
pub mod roles;
pub mod shielded;
pub mod sighash;
pub mod transparent;

mod address;

#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(test)]
pub(crate) mod testing;

pub use address::AddressError;
pub use input::{parse_inputs, serialize_inputs, TransparentInput};
pub use request::{Payment, PaymentRequest, RequestError};
pub use sighash::TxId;
pub use zcash_protocol::consensus::Network;

use roles::{
    combiner::{self, Combiner},
    constructor::{self, Constructor},
    prover::{self, Prover, TranscriptProver},
    signer::{self, Signer},
    tx_extractor::{self, TransactionExtractor},
    verifier::{self, Verifier},
};

const MAGIC_BYTES: &[u8] = b"T2ZS";
const STAGED_VERSION_1: u32 = 1;

/// A staged transparent-to-shielded Zcash transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct StagedTransaction {
    /// Global fields that are relevant to the transaction as a whole.
    pub(crate) global: common::Global,

    //
    // Protocol-specific fields.
    //
    // These are not optional: an empty bundle is a bundle with no inputs, outputs or
    // actions.
    //
    pub(crate) transparent: transparent::Bundle,
    pub(crate) shielded: shielded::Bundle,
}

impl StagedTransaction {
    /// Parses a staged transaction from its encoding.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < 8 {
            return Err(ParseError::TooShort);
        }
        if &bytes[..4] != MAGIC_BYTES {
            return Err(ParseError::NotStaged);
        }
        let mut version = [0; 4];
        version.copy_from_slice(&bytes[4..8]);
        let version = u32::from_le_bytes(version);
        if version != STAGED_VERSION_1 {
            return Err(ParseError::UnknownVersion(version));
        }

        // This is a v1 staged transaction.
        let (tx, rest) = postcard::take_from_bytes(&bytes[8..]).map_err(ParseError::Invalid)?;
        if !rest.is_empty() {
            return Err(ParseError::TrailingBytes(rest.len()));
        }
        Ok(tx)
    }

    /// Serializes this staged transaction.
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = vec![];
        bytes.extend_from_slice(MAGIC_BYTES);
        bytes.extend_from_slice(&STAGED_VERSION_1.to_le_bytes());
        postcard::to_extend(self, bytes).expect("can serialize into memory")
    }
}

/// Errors that can occur while parsing a staged transaction.
#[derive(Debug)]
pub enum ParseError {
    /// The bytes do not contain a valid staged transaction.
    Invalid(postcard::Error),
    /// The bytes do not start with the staged transaction magic bytes.
    NotStaged,
    /// The bytes are too short to contain a staged transaction header.
    TooShort,
    /// Bytes were left over after the staged transaction.
    TrailingBytes(usize),
    /// The staged transaction has an unknown version.
    UnknownVersion(u32),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Invalid(e) => write!(f, "invalid staged transaction: {}", e),
            ParseError::NotStaged => write!(f, "not a staged transaction"),
            ParseError::TooShort => write!(f, "too short to be a staged transaction"),
            ParseError::TrailingBytes(n) => {
                write!(f, "{} unexpected bytes after the staged transaction", n)
            }
            ParseError::UnknownVersion(v) => {
                write!(f, "unknown staged transaction version {}", v)
            }
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParseError::Invalid(e) => Some(e),
            _ => None,
        }
    }
}

//
// Lifecycle operations.
//
// Each of these leaves its arguments untouched on failure, and returns a fresh value on
// success.
//

/// Builds a staged transaction spending `inputs` to pay `request`, sending any change
/// to `change_address`.
///
/// On success the request is marked as consumed.
#[tracing::instrument(skip_all, fields(inputs = inputs.len()))]
pub fn propose_transaction(
    inputs: &[TransparentInput],
    request: &mut PaymentRequest,
    change_address: &str,
) -> Result<StagedTransaction, constructor::Error> {
    Constructor::new(inputs, change_address).build(request)
}

/// Like [`propose_transaction`], but draws commitment randomness from `rng`.
#[tracing::instrument(skip_all, fields(inputs = inputs.len()))]
pub fn propose_transaction_with_rng<R: RngCore + CryptoRng>(
    inputs: &[TransparentInput],
    request: &mut PaymentRequest,
    change_address: &str,
    rng: R,
) -> Result<StagedTransaction, constructor::Error> {
    Constructor::new(inputs, change_address).build_with_rng(request, rng)
}

/// Fills every empty proof slot using the default [`TranscriptProver`].
#[tracing::instrument(skip_all)]
pub fn prove_transaction(tx: &StagedTransaction) -> Result<StagedTransaction, prover::Error> {
    let mut prover = Prover::new(tx.clone());
    prover.create_proofs(&TranscriptProver)?;
    Ok(prover.finish())
}

/// Checks that `tx` pays exactly what `request` asked for, with exactly
/// `expected_change` as change.
///
/// This must be called by every signer that did not construct `tx` itself, before it
/// signs.
#[tracing::instrument(skip_all)]
pub fn verify_before_signing(
    tx: &StagedTransaction,
    request: &PaymentRequest,
    expected_change: &[transparent::Output],
) -> Result<(), verifier::Error> {
    Verifier::new(tx.clone()).verify_payments(request, expected_change)
}

/// Returns the signature hash for the transparent input at `input_index`.
#[tracing::instrument(skip(tx))]
pub fn get_sighash(
    tx: &StagedTransaction,
    input_index: usize,
) -> Result<[u8; 32], signer::SighashError> {
    Signer::new(tx.clone()).sighash(input_index)
}

/// Attaches a compact ECDSA signature to the transparent input at `input_index`.
#[tracing::instrument(skip(tx, signature))]
pub fn append_signature(
    tx: &StagedTransaction,
    input_index: usize,
    signature: &[u8; 64],
) -> Result<StagedTransaction, signer::Error> {
    let mut signer = Signer::new(tx.clone());
    signer.append_signature(input_index, signature)?;
    Ok(signer.finish())
}

/// Merges independently-advanced copies of the same staged transaction.
#[tracing::instrument(skip_all, fields(copies = txs.len()))]
pub fn combine(txs: &[StagedTransaction]) -> Result<StagedTransaction, combiner::Error> {
    Combiner::new(txs.to_vec()).combine()
}

/// Finalizes the transparent spends and returns the raw transaction bytes.
///
/// By contract, no further operation should be performed on `tx` once this succeeds.
#[tracing::instrument(skip_all)]
pub fn finalize_and_extract(tx: &StagedTransaction) -> Result<Vec<u8>, tx_extractor::Error> {
    TransactionExtractor::new(tx.clone())
        .extract()
        .map(|extracted| extracted.into_bytes())
}
