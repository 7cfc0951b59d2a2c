//! The Signer role (one or more entities).
//!
//!  - Computes the signature hash of a transparent input.
//!  - Attaches a signature over that hash, after checking it against the input's
//!    public key.
//!
//! The signature hash commits to every shielded proof, so a transaction with shielded
//! actions can only be signed after it has been proven.

use core::fmt;

use secp256k1::{ecdsa, Message, PublicKey, Secp256k1, VerifyOnly};

use crate::{
    common::GlobalError,
    sighash::signature_hash,
    transparent::SIGHASH_ALL,
    StagedTransaction,
};

pub struct Signer {
    tx: StagedTransaction,
    secp: Secp256k1<VerifyOnly>,
}

impl Signer {
    /// Instantiates the Signer role with the given staged transaction.
    pub fn new(tx: StagedTransaction) -> Self {
        Self {
            tx,
            secp: Secp256k1::verification_only(),
        }
    }

    /// Returns the signature hash for the transparent input at `index`.
    ///
    /// It is the caller's responsibility to perform any semantic validity checks on the
    /// transaction (for example, with the Verifier role) before signing this hash.
    pub fn sighash(&self, index: usize) -> Result<[u8; 32], SighashError> {
        sighash_for_input(&self.tx, index)
    }

    /// Attaches a compact ECDSA signature to the transparent input at `index`.
    ///
    /// The signature is normalized to low-S form and must verify against the input's
    /// public key. Attaching the signature already in the slot is a no-op; attaching a
    /// different one is an error.
    pub fn append_signature(&mut self, index: usize, signature: &[u8; 64]) -> Result<(), Error> {
        let sighash = sighash_for_input(&self.tx, index).map_err(|e| match e {
            SighashError::InvalidIndex { index, inputs } => Error::InvalidIndex { index, inputs },
            e => Error::Sighash(e),
        })?;

        let input = &mut self.tx.transparent.inputs[index];

        let mut sig =
            ecdsa::Signature::from_compact(signature).map_err(|_| Error::InvalidSignature)?;
        sig.normalize_s();
        let pubkey = PublicKey::from_slice(&input.pubkey).map_err(|_| Error::InvalidPubkey)?;

        self.secp
            .verify_ecdsa(&Message::from_digest(sighash), &sig, &pubkey)
            .map_err(|_| Error::VerificationFailed { index })?;

        let sig = sig.serialize_compact();
        match &input.signature {
            Some(existing) if existing == &sig => {
                tracing::trace!(index, "Signature already attached");
            }
            Some(_) => return Err(Error::SlotOccupied { index }),
            None => {
                input.signature = Some(sig);
                tracing::debug!(index, "Attached transparent signature");
            }
        }

        Ok(())
    }

    /// Finishes the Signer role, returning the updated staged transaction.
    pub fn finish(self) -> StagedTransaction {
        self.tx
    }
}

/// Computes the signature hash for the transparent input at `index`, checking every
/// precondition of the digest.
pub(crate) fn sighash_for_input(tx: &StagedTransaction, index: usize) -> Result<[u8; 32], SighashError> {
    let inputs = tx.transparent.inputs.len();
    let input = tx
        .transparent
        .inputs
        .get(index)
        .ok_or(SighashError::InvalidIndex { index, inputs })?;

    tx.global.check_version().map_err(SighashError::Global)?;

    if input.sighash_type != SIGHASH_ALL {
        return Err(SighashError::UnsupportedSighashType(input.sighash_type));
    }

    if let Some(index) = tx
        .shielded
        .actions
        .iter()
        .position(|action| action.zkproof.is_none())
    {
        return Err(SighashError::MissingProof { index });
    }

    let value_balance = tx
        .shielded
        .value_balance()
        .map_err(|_| SighashError::InvalidValueBalance)?;

    Ok(signature_hash(tx, index, value_balance))
}

/// Errors that can occur while computing a signature hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SighashError {
    Global(GlobalError),
    InvalidIndex { index: usize, inputs: usize },
    InvalidValueBalance,
    /// The shielded action at `index` has not been proven yet.
    MissingProof { index: usize },
    UnsupportedSighashType(u8),
}

impl fmt::Display for SighashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SighashError::Global(e) => e.fmt(f),
            SighashError::InvalidIndex { index, inputs } => write!(
                f,
                "input index {} is out of range for {} transparent inputs",
                index, inputs
            ),
            SighashError::InvalidValueBalance => write!(f, "the shielded value balance is out of range"),
            SighashError::MissingProof { index } => {
                write!(f, "action {} must be proven before signing", index)
            }
            SighashError::UnsupportedSighashType(t) => {
                write!(f, "unsupported sighash type {:#04x}", t)
            }
        }
    }
}

impl std::error::Error for SighashError {}

/// Errors that can occur while attaching a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    InvalidIndex { index: usize, inputs: usize },
    InvalidPubkey,
    /// The bytes are not a compact ECDSA signature.
    InvalidSignature,
    Sighash(SighashError),
    /// The input at `index` already holds a different signature.
    SlotOccupied { index: usize },
    /// The signature does not verify against the input's public key.
    VerificationFailed { index: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidIndex { index, inputs } => write!(
                f,
                "input index {} is out of range for {} transparent inputs",
                index, inputs
            ),
            Error::InvalidPubkey => write!(f, "the input's public key is invalid"),
            Error::InvalidSignature => write!(f, "not a compact ECDSA signature"),
            Error::Sighash(e) => write!(f, "cannot compute the signature hash: {}", e),
            Error::SlotOccupied { index } => {
                write!(f, "input {} already holds a different signature", index)
            }
            Error::VerificationFailed { index } => {
                write!(f, "signature does not verify for input {}", index)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Sighash(e) => Some(e),
            _ => None,
        }
    }
}
