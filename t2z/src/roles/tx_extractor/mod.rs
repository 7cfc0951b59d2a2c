//! The Transaction Extractor role (anyone can execute).
//!
//! - Finalizes the transparent spends and extracts the final v5 transaction.
//!
//! A transparent-only transaction is extracted in its consensus encoding. When actions
//! are present, the shielded section carries `cv || cmx` per action, the flags, the value
//! balance and the transcript proofs, which is not the Orchard bundle encoding: such a
//! transaction is only accepted by the network once a real proving system and the
//! Orchard action fields are plugged in.

use core::fmt;
use std::io::{self, Write};

use getset::Getters;
use zcash_encoding::{CompactSize, Vector};

use crate::{
    common::{GlobalError, OVERWINTERED_FLAG},
    roles::spend_finalizer::{self, SpendFinalizer},
    sighash::{txid, TxId, SHIELDED_FLAGS_OUTPUTS_ONLY},
    transparent::write_script,
    StagedTransaction,
};

/// A fully-authorized transaction, and its encoding.
#[derive(Clone, Debug, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct ExtractedTransaction {
    txid: TxId,
    bytes: Vec<u8>,
}

impl ExtractedTransaction {
    /// Returns the raw transaction bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

pub struct TransactionExtractor {
    tx: StagedTransaction,
}

impl TransactionExtractor {
    /// Instantiates the Transaction Extractor role with the given staged transaction.
    pub fn new(tx: StagedTransaction) -> Self {
        Self { tx }
    }

    /// Attempts to extract a valid transaction from the staged transaction.
    pub fn extract(self) -> Result<ExtractedTransaction, Error> {
        let tx = self.tx;

        tx.global.check_version().map_err(Error::Global)?;

        // Proofs are checked before signatures, because a signature can only have been
        // made once every proof was present.
        if let Some(index) = tx
            .shielded
            .actions
            .iter()
            .position(|action| action.zkproof.is_none())
        {
            return Err(Error::MissingProof { index });
        }
        if let Some(index) = tx
            .transparent
            .inputs
            .iter()
            .position(|input| input.signature.is_none())
        {
            return Err(Error::MissingSignature { index });
        }

        let value_balance = tx
            .shielded
            .value_balance()
            .map_err(|_| Error::InvalidValueBalance)?;

        let script_sigs = SpendFinalizer::new(&tx)
            .finalize_spends()
            .map_err(Error::SpendFinalizer)?;

        let mut bytes = vec![];
        write_transaction(&mut bytes, &tx, &script_sigs, value_balance).map_err(Error::Write)?;

        let txid = txid(&tx, value_balance);
        tracing::debug!(%txid, size = bytes.len(), "Extracted transaction");

        Ok(ExtractedTransaction { txid, bytes })
    }
}

fn write_transaction<W: Write>(
    mut writer: W,
    tx: &StagedTransaction,
    script_sigs: &[Vec<u8>],
    value_balance: i64,
) -> io::Result<()> {
    let global = &tx.global;
    writer.write_all(&(global.tx_version | OVERWINTERED_FLAG).to_le_bytes())?;
    writer.write_all(&global.version_group_id.to_le_bytes())?;
    writer.write_all(&global.consensus_branch_id.to_le_bytes())?;
    writer.write_all(&global.lock_time.to_le_bytes())?;
    writer.write_all(&global.expiry_height.to_le_bytes())?;

    // Transparent bundle
    CompactSize::write(&mut writer, tx.transparent.inputs.len())?;
    for (input, script_sig) in tx.transparent.inputs.iter().zip(script_sigs) {
        input.write_prevout(&mut writer)?;
        write_script(&mut writer, script_sig)?;
        writer.write_all(&input.sequence.to_le_bytes())?;
    }
    Vector::write(&mut writer, &tx.transparent.outputs, |w, output| {
        output.write(w)
    })?;

    // Sapling bundle: no spends, no outputs.
    CompactSize::write(&mut writer, 0)?;
    CompactSize::write(&mut writer, 0)?;

    // Shielded bundle
    let actions = &tx.shielded.actions;
    CompactSize::write(&mut writer, actions.len())?;
    if !actions.is_empty() {
        for action in actions {
            writer.write_all(&action.cv)?;
            writer.write_all(&action.cmx)?;
        }
        writer.write_all(&[SHIELDED_FLAGS_OUTPUTS_ONLY])?;
        writer.write_all(&value_balance.to_le_bytes())?;
        for proof in actions.iter().filter_map(|action| action.zkproof.as_ref()) {
            write_script(&mut writer, proof)?;
        }
    }

    Ok(())
}

/// Errors that can occur while extracting a transaction from a staged transaction.
#[derive(Debug)]
pub enum Error {
    Global(GlobalError),
    InvalidValueBalance,
    MissingProof { index: usize },
    MissingSignature { index: usize },
    SpendFinalizer(spend_finalizer::Error),
    Write(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Global(e) => e.fmt(f),
            Error::InvalidValueBalance => write!(f, "the shielded value balance is out of range"),
            Error::MissingProof { index } => write!(f, "action {} has not been proven", index),
            Error::MissingSignature { index } => write!(f, "input {} is not signed", index),
            Error::SpendFinalizer(e) => write!(f, "failed to finalize spends: {}", e),
            Error::Write(e) => write!(f, "failed to encode the transaction: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::SpendFinalizer(e) => Some(e),
            Error::Write(e) => Some(e),
            _ => None,
        }
    }
}
