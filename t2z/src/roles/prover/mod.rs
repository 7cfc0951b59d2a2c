//! The Prover role (anyone can execute).
//!
//!  - Fills the proof slot of every shielded action.
//!
//! Proof generation is pluggable through [`ActionProver`]. Only the witness check and
//! the placement of proofs are performed here.

use core::{convert::Infallible, fmt};

use blake2b_simd::Params;

use crate::{
    shielded::{Action, WitnessError},
    StagedTransaction,
};

const T2Z_TRANSCRIPT_PERSONALIZATION: &[u8; 16] = b"T2z_Transcript__";

/// A backend capable of producing the proof for a single shielded action.
pub trait ActionProver {
    type Error: fmt::Display;

    /// Creates the proof for `action`, whose witness has already been checked.
    fn prove(&self, action: &Action) -> Result<Vec<u8>, Self::Error>;
}

/// A prover that binds each action to a transcript digest of its public data and
/// witness.
///
/// The resulting proof is deterministic, so independently proven copies of the same
/// staged transaction always combine.
#[derive(Clone, Copy, Debug, Default)]
pub struct TranscriptProver;

impl ActionProver for TranscriptProver {
    type Error = Infallible;

    fn prove(&self, action: &Action) -> Result<Vec<u8>, Infallible> {
        let mut h = Params::new()
            .hash_length(64)
            .personal(T2Z_TRANSCRIPT_PERSONALIZATION)
            .to_state();
        h.update(&action.cv);
        h.update(&action.cmx);
        h.update(&action.recipient);
        h.update(&action.value.to_le_bytes());
        h.update(&action.memo);
        // The witness was checked by the caller.
        if let Some(rcv) = &action.rcv {
            h.update(rcv);
        }
        if let Some(rseed) = &action.rseed {
            h.update(rseed);
        }
        Ok(h.finalize().as_bytes().to_vec())
    }
}

pub struct Prover {
    tx: StagedTransaction,
}

impl Prover {
    /// Instantiates the Prover role with the given staged transaction.
    pub fn new(tx: StagedTransaction) -> Self {
        Self { tx }
    }

    /// Fills every empty proof slot using `prover`.
    ///
    /// Slots that already hold a proof are left alone. If any action fails, no slot is
    /// filled.
    pub fn create_proofs<P: ActionProver>(&mut self, prover: &P) -> Result<(), Error> {
        let proofs = self
            .tx
            .shielded
            .actions
            .iter()
            .enumerate()
            .map(|(index, action)| {
                if action.zkproof.is_some() {
                    return Ok(None);
                }
                action
                    .check_witness()
                    .map_err(|error| Error::InvalidWitness { index, error })?;
                prover
                    .prove(action)
                    .map(Some)
                    .map_err(|e| Error::ProofFailed {
                        index,
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut created = 0;
        for (action, proof) in self.tx.shielded.actions.iter_mut().zip(proofs) {
            if let Some(proof) = proof {
                action.zkproof = Some(proof);
                created += 1;
            }
        }

        tracing::debug!(created, "Created shielded proofs");
        Ok(())
    }

    /// Finishes the Prover role, returning the updated staged transaction.
    pub fn finish(self) -> StagedTransaction {
        self.tx
    }
}

/// Errors that can occur while proving a staged transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The witness of the action at `index` does not open its commitments.
    InvalidWitness { index: usize, error: WitnessError },
    ProofFailed { index: usize, reason: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidWitness { index, error } => {
                write!(f, "action {} has an invalid witness: {}", index, error)
            }
            Error::ProofFailed { index, reason } => {
                write!(f, "failed to prove action {}: {}", index, reason)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::InvalidWitness { error, .. } => Some(error),
            Error::ProofFailed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::{ActionProver, Error, Prover, TranscriptProver};
    use crate::{
        shielded::{Action, WitnessError},
        testing::shielded_transaction,
    };

    struct FailingProver;

    impl ActionProver for FailingProver {
        type Error = &'static str;

        fn prove(&self, _: &Action) -> Result<Vec<u8>, Self::Error> {
            Err("no parameters")
        }
    }

    #[test]
    fn fills_every_slot() {
        let tx = shielded_transaction();
        assert!(!tx.shielded.actions.is_empty());

        let mut prover = Prover::new(tx.clone());
        prover.create_proofs(&TranscriptProver).unwrap();
        let proven = prover.finish();

        for action in &proven.shielded.actions {
            assert_eq!(action.zkproof.as_ref().map(|p| p.len()), Some(64));
        }

        // Proving is deterministic and idempotent.
        let mut again = Prover::new(proven.clone());
        again.create_proofs(&TranscriptProver).unwrap();
        assert_eq!(again.finish(), proven);

        let mut fresh = Prover::new(tx);
        fresh.create_proofs(&TranscriptProver).unwrap();
        assert_eq!(fresh.finish(), proven);
    }

    #[test]
    fn transparent_only_transactions_need_no_proofs() {
        let tx = crate::testing::proposed_transaction();
        assert!(tx.shielded.actions.is_empty());

        let mut prover = Prover::new(tx.clone());
        prover.create_proofs(&TranscriptProver).unwrap();
        assert_eq!(prover.finish(), tx);
    }

    #[test]
    fn invalid_witness_fills_nothing() {
        let mut tx = shielded_transaction();
        let last = tx.shielded.actions.len() - 1;
        tx.shielded.actions[last].rseed = None;

        let mut prover = Prover::new(tx.clone());
        assert_matches!(
            prover.create_proofs(&TranscriptProver),
            Err(Error::InvalidWitness {
                error: WitnessError::MissingRandomSeed,
                ..
            })
        );
        assert_eq!(prover.finish(), tx);
    }

    #[test]
    fn backend_failures_are_reported() {
        let mut prover = Prover::new(shielded_transaction());
        assert_matches!(
            prover.create_proofs(&FailingProver),
            Err(Error::ProofFailed { index: 0, reason }) if reason == "no parameters"
        );
    }
}
