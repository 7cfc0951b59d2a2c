//! The Spend Finalizer role (anyone can execute).
//!
//! - Turns the signature attached to each transparent input into its `script_sig`.

use core::fmt;

use secp256k1::{ecdsa, Message, PublicKey, Secp256k1};

use crate::{
    roles::signer::{sighash_for_input, SighashError},
    transparent::{hash160, p2pkh_hash, push_data},
    StagedTransaction,
};

pub struct SpendFinalizer<'a> {
    tx: &'a StagedTransaction,
}

impl<'a> SpendFinalizer<'a> {
    /// Instantiates the Spend Finalizer role with the given staged transaction.
    pub fn new(tx: &'a StagedTransaction) -> Self {
        Self { tx }
    }

    /// Returns the P2PKH `script_sig` of every transparent input, in input order.
    ///
    /// Every signature is checked again against its input's signature hash, so a
    /// signature that was merged in by a Combiner cannot slip through unverified.
    pub fn finalize_spends(self) -> Result<Vec<Vec<u8>>, Error> {
        let secp = Secp256k1::verification_only();

        self.tx
            .transparent
            .inputs
            .iter()
            .enumerate()
            .map(|(index, input)| {
                let signature = input.signature.ok_or(Error::MissingSignature { index })?;

                if p2pkh_hash(&input.script_pubkey) != Some(hash160(&input.pubkey)) {
                    return Err(Error::WrongPubkey { index });
                }

                let sighash = sighash_for_input(self.tx, index).map_err(Error::Sighash)?;
                let pubkey =
                    PublicKey::from_slice(&input.pubkey).map_err(|_| Error::WrongPubkey { index })?;
                let sig = ecdsa::Signature::from_compact(&signature)
                    .map_err(|_| Error::InvalidSignature { index })?;
                secp.verify_ecdsa(&Message::from_digest(sighash), &sig, &pubkey)
                    .map_err(|_| Error::InvalidSignature { index })?;

                let mut sig_bytes = sig.serialize_der().to_vec();
                sig_bytes.push(input.sighash_type);

                let mut script_sig = vec![];
                push_data(&mut script_sig, &sig_bytes);
                push_data(&mut script_sig, &input.pubkey);
                Ok(script_sig)
            })
            .collect()
    }
}

/// Errors that can occur while finalizing the transparent spends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    InvalidSignature { index: usize },
    MissingSignature { index: usize },
    Sighash(SighashError),
    /// The public key of the input at `index` does not match its script.
    WrongPubkey { index: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidSignature { index } => {
                write!(f, "input {} has an invalid signature", index)
            }
            Error::MissingSignature { index } => write!(f, "input {} is not signed", index),
            Error::Sighash(e) => write!(f, "cannot compute the signature hash: {}", e),
            Error::WrongPubkey { index } => {
                write!(f, "input {} has a public key that does not match its script", index)
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
