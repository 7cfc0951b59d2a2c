//! Shielded actions of a staged transaction.
//!
//! Each action pays one shielded payment to the Orchard receiver of a unified address.
//! The action publishes a value commitment `cv` and a note commitment `cmx`; the
//! trapdoor `rcv` and the note randomness `rseed` are the witness that opens them, and
//! the proof slot holds the proof that an [`ActionProver`] produced over that witness.
//!
//! [`ActionProver`]: crate::roles::prover::ActionProver

use core::fmt;

use blake2b_simd::Params;
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use zcash_protocol::value::{BalanceError, Zatoshis};

use crate::roles::combiner::merge_optional;

const VALUE_COMMITMENT_PERSONALIZATION: &[u8; 16] = b"T2z_ValueCommit_";
const NOTE_COMMITMENT_PERSONALIZATION: &[u8; 16] = b"T2z_NoteCommit__";

/// The size of an Orchard receiver.
pub const RECEIVER_SIZE: usize = 43;

/// The size of an encoded memo.
pub const MEMO_SIZE: usize = 512;

/// Commits to `value` under the trapdoor `rcv`.
pub(crate) fn value_commitment(value: u64, rcv: &[u8; 32]) -> [u8; 32] {
    let hash = Params::new()
        .hash_length(32)
        .personal(VALUE_COMMITMENT_PERSONALIZATION)
        .to_state()
        .update(&value.to_le_bytes())
        .update(rcv)
        .finalize();
    let mut cv = [0; 32];
    cv.copy_from_slice(hash.as_bytes());
    cv
}

/// Commits to the note sent by an action.
pub(crate) fn note_commitment(
    recipient: &[u8; RECEIVER_SIZE],
    value: u64,
    rseed: &[u8; 32],
    memo: &[u8; MEMO_SIZE],
) -> [u8; 32] {
    let hash = Params::new()
        .hash_length(32)
        .personal(NOTE_COMMITMENT_PERSONALIZATION)
        .to_state()
        .update(recipient)
        .update(&value.to_le_bytes())
        .update(rseed)
        .update(memo)
        .finalize();
    let mut cmx = [0; 32];
    cmx.copy_from_slice(hash.as_bytes());
    cmx
}

/// Staged transaction fields for the shielded bundle.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct Bundle {
    /// The shielded actions, in the order of the shielded payments they pay.
    pub(crate) actions: Vec<Action>,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct Action {
    //
    // Action effecting data.
    //
    // These are required fields that are part of the final transaction, and are filled in
    // by the Constructor.
    //
    pub(crate) cv: [u8; 32],
    pub(crate) cmx: [u8; 32],

    //
    // Output data.
    //
    // These are checked by the Verifier against the payment request, and must open the
    // commitments above.
    //
    #[serde_as(as = "[_; 43]")]
    pub(crate) recipient: [u8; RECEIVER_SIZE],
    pub(crate) value: u64,
    #[serde_as(as = "[_; 512]")]
    pub(crate) memo: [u8; MEMO_SIZE],

    /// The value commitment trapdoor.
    ///
    /// - This is set by the Constructor.
    /// - This is required by the Prover and the Verifier.
    pub(crate) rcv: Option<[u8; 32]>,

    /// The seed randomness for the output note.
    ///
    /// - This is set by the Constructor.
    /// - This is required by the Prover and the Verifier.
    pub(crate) rseed: Option<[u8; 32]>,

    /// The proof slot.
    ///
    /// This is set by the Prover.
    pub(crate) zkproof: Option<Vec<u8>>,
}

impl Action {
    /// Builds an action paying `value` to `recipient`, committing with the given
    /// randomness.
    pub(crate) fn from_parts(
        recipient: [u8; RECEIVER_SIZE],
        value: u64,
        memo: [u8; MEMO_SIZE],
        rcv: [u8; 32],
        rseed: [u8; 32],
    ) -> Self {
        Self {
            cv: value_commitment(value, &rcv),
            cmx: note_commitment(&recipient, value, &rseed, &memo),
            recipient,
            value,
            memo,
            rcv: Some(rcv),
            rseed: Some(rseed),
            zkproof: None,
        }
    }

    /// Checks that the witness data is present and opens both commitments.
    pub fn check_witness(&self) -> Result<(), WitnessError> {
        let rcv = self.rcv.ok_or(WitnessError::MissingValueCommitTrapdoor)?;
        let rseed = self.rseed.ok_or(WitnessError::MissingRandomSeed)?;

        if value_commitment(self.value, &rcv) != self.cv {
            return Err(WitnessError::InvalidValueCommitment);
        }
        if note_commitment(&self.recipient, self.value, &rseed, &self.memo) != self.cmx {
            return Err(WitnessError::InvalidNoteCommitment);
        }

        Ok(())
    }
}

impl Bundle {
    /// Returns the net value moved out of the transparent pool by this bundle, as a
    /// signed value balance (negative when value enters the shielded pool).
    pub(crate) fn value_balance(&self) -> Result<i64, BalanceError> {
        let total = self
            .actions
            .iter()
            .try_fold(Zatoshis::ZERO, |acc, action| {
                (acc + Zatoshis::from_u64(action.value)?).ok_or(BalanceError::Overflow)
            })?;
        Ok(-(total.into_u64() as i64))
    }

    /// Merges this bundle with another.
    ///
    /// Returns `None` if the bundles differ in their effecting data, or have conflicting
    /// witness or proof slots.
    pub(crate) fn merge(mut self, other: Self) -> Option<Self> {
        // Destructure `other` to ensure we handle everything.
        let Self { actions } = other;

        if self.actions.len() != actions.len() {
            return None;
        }

        for (lhs, rhs) in self.actions.iter_mut().zip(actions) {
            // Destructure `rhs` to ensure we handle everything.
            let Action {
                cv,
                cmx,
                recipient,
                value,
                memo,
                rcv,
                rseed,
                zkproof,
            } = rhs;

            if lhs.cv != cv
                || lhs.cmx != cmx
                || lhs.recipient != recipient
                || lhs.value != value
                || lhs.memo != memo
            {
                return None;
            }

            if !(merge_optional(&mut lhs.rcv, rcv)
                && merge_optional(&mut lhs.rseed, rseed)
                && merge_optional(&mut lhs.zkproof, zkproof))
            {
                return None;
            }
        }

        Some(self)
    }
}

/// Errors in the witness data of a shielded action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WitnessError {
    InvalidNoteCommitment,
    InvalidValueCommitment,
    MissingRandomSeed,
    MissingValueCommitTrapdoor,
}

impl fmt::Display for WitnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WitnessError::InvalidNoteCommitment => {
                write!(f, "note commitment does not open to the action's output")
            }
            WitnessError::InvalidValueCommitment => {
                write!(f, "value commitment does not open to the action's value")
            }
            WitnessError::MissingRandomSeed => write!(f, "missing note randomness"),
            WitnessError::MissingValueCommitTrapdoor => {
                write!(f, "missing value commitment trapdoor")
            }
        }
    }
}

impl std::error::Error for WitnessError {}
