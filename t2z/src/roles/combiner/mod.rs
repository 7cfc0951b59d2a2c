//! The Combiner role (anyone can execute).
//!
//!  - Merges copies of the same staged transaction that were advanced independently,
//!    for example when each signer of a multi-party spend signed its own copy.

use core::fmt;

use crate::StagedTransaction;

pub struct Combiner {
    txs: Vec<StagedTransaction>,
}

impl Combiner {
    /// Instantiates the Combiner role with the given staged transactions.
    pub fn new(txs: Vec<StagedTransaction>) -> Self {
        Self { txs }
    }

    /// Combines the staged transactions.
    ///
    /// Every copy must share the same skeleton. Empty slots are filled from whichever
    /// copy has them, and a slot filled with different values in two copies is a
    /// mismatch.
    pub fn combine(self) -> Result<StagedTransaction, Error> {
        let count = self.txs.len();
        let combined = self
            .txs
            .into_iter()
            .try_fold(None, |acc, tx| match acc {
                None => Ok(Some(tx)),
                Some(acc) => merge(acc, tx).map(Some),
            })
            .transpose()
            .unwrap_or(Err(Error::NoStagedTransactions))?;

        tracing::debug!(count, "Combined staged transactions");
        Ok(combined)
    }
}

fn merge(lhs: StagedTransaction, rhs: StagedTransaction) -> Result<StagedTransaction, Error> {
    let transparent = lhs
        .transparent
        .merge(rhs.transparent)
        .ok_or(Error::DataMismatch)?;
    let shielded = lhs
        .shielded
        .merge(rhs.shielded)
        .ok_or(Error::DataMismatch)?;
    let global = lhs.global.merge(rhs.global).ok_or(Error::DataMismatch)?;

    Ok(StagedTransaction {
        global,
        transparent,
        shielded,
    })
}

/// Merges two values for an optional field together.
///
/// Returns `false` if the values cannot be merged.
pub(crate) fn merge_optional<T: PartialEq>(lhs: &mut Option<T>, rhs: Option<T>) -> bool {
    match (&lhs, rhs) {
        // If the RHS is not present, keep the LHS.
        (_, None) => (),
        // If the LHS is not present, set it to the RHS.
        (None, Some(rhs)) => *lhs = Some(rhs),
        // If both are present and are equal, nothing to do.
        (Some(lhs), Some(rhs)) if lhs == &rhs => (),
        // If both are present and are not equal, fail. Here we differ from BIP 174.
        (Some(_), Some(_)) => return false,
    }

    true
}

/// Errors that can occur while combining staged transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    NoStagedTransactions,
    /// The copies are not of the same transaction, or fill a slot differently.
    DataMismatch,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoStagedTransactions => write!(f, "no staged transactions to combine"),
            Error::DataMismatch => {
                write!(f, "the staged transactions are incompatible and cannot be combined")
            }
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use proptest::{collection::vec, prelude::*};

    use secp256k1::{Message, Secp256k1, SecretKey};

    use super::{merge_optional, Combiner, Error};
    use crate::{
        roles::{
            prover::{Prover, TranscriptProver},
            signer::Signer,
        },
        testing::{proposed_transaction, shielded_transaction, sign_all, sign_input, TEST_KEYS},
        StagedTransaction,
    };

    /// Clears every slot, leaving only the fields that must never change.
    fn skeleton(tx: &StagedTransaction) -> StagedTransaction {
        let mut tx = tx.clone();
        for input in &mut tx.transparent.inputs {
            input.signature = None;
        }
        for action in &mut tx.shielded.actions {
            action.rcv = None;
            action.rseed = None;
            action.zkproof = None;
        }
        tx
    }

    /// Keeps only the signatures selected by `mask`.
    fn with_signatures(signed: &StagedTransaction, mask: &[bool]) -> StagedTransaction {
        let mut tx = signed.clone();
        for (input, keep) in tx.transparent.inputs.iter_mut().zip(mask) {
            if !keep {
                input.signature = None;
            }
        }
        tx
    }

    #[test]
    fn merge_optional_rules() {
        let mut slot = None;
        assert!(merge_optional(&mut slot, None::<u8>));
        assert_eq!(slot, None);
        assert!(merge_optional(&mut slot, Some(1)));
        assert_eq!(slot, Some(1));
        assert!(merge_optional(&mut slot, Some(1)));
        assert!(merge_optional(&mut slot, None));
        assert_eq!(slot, Some(1));
        assert!(!merge_optional(&mut slot, Some(2)));
    }

    #[test]
    fn combining_nothing_fails() {
        assert_matches!(
            Combiner::new(vec![]).combine(),
            Err(Error::NoStagedTransactions)
        );
    }

    #[test]
    fn single_copy_is_unchanged() {
        let tx = proposed_transaction();
        assert_eq!(Combiner::new(vec![tx.clone()]).combine().unwrap(), tx);
    }

    #[test]
    fn disjoint_signatures_are_merged() {
        let tx = proposed_transaction();
        assert_eq!(tx.transparent.inputs.len(), 2);

        let first = sign_input(&tx, 0, &TEST_KEYS[0]);
        let second = sign_input(&tx, 1, &TEST_KEYS[1]);

        let combined = Combiner::new(vec![first.clone(), second.clone()])
            .combine()
            .unwrap();
        assert!(combined
            .transparent
            .inputs
            .iter()
            .all(|input| input.signature.is_some()));

        // Order does not matter.
        assert_eq!(
            Combiner::new(vec![second, first]).combine().unwrap(),
            combined
        );
    }

    #[test]
    fn different_transactions_do_not_combine() {
        let tx = proposed_transaction();
        let mut other = tx.clone();
        other.global.expiry_height += 1;

        assert_matches!(
            Combiner::new(vec![tx, other]).combine(),
            Err(Error::DataMismatch)
        );
    }

    #[test]
    fn lifecycle_preserves_the_skeleton() {
        let tx = shielded_transaction();
        let original = skeleton(&tx);

        let mut prover = Prover::new(tx);
        prover.create_proofs(&TranscriptProver).unwrap();
        let proven = prover.finish();
        assert!(proven
            .shielded
            .actions
            .iter()
            .all(|action| action.zkproof.is_some()));
        assert_eq!(skeleton(&proven), original);

        let copies = (0..proven.transparent.inputs.len())
            .map(|index| sign_input(&proven, index, &TEST_KEYS[index]))
            .collect::<Vec<_>>();
        for copy in &copies {
            assert_eq!(skeleton(copy), original);
        }

        let combined = Combiner::new(copies).combine().unwrap();
        assert_eq!(skeleton(&combined), original);

        // Only the slots differ from the proven transaction.
        for (input, unsigned) in combined
            .transparent
            .inputs
            .iter()
            .zip(&proven.transparent.inputs)
        {
            assert!(input.signature.is_some());
            assert_eq!(input.prevout_txid, unsigned.prevout_txid);
        }
        assert_eq!(combined.shielded, proven.shielded);
    }

    #[test]
    fn conflicting_signatures_do_not_combine() {
        let tx = proposed_transaction();
        let first = sign_input(&tx, 0, &TEST_KEYS[0]);

        // A second valid signature over the same input, with a different nonce.
        let mut signer = Signer::new(tx.clone());
        let sighash = signer.sighash(0).unwrap();
        let sk = SecretKey::from_slice(&TEST_KEYS[0]).unwrap();
        let signature = Secp256k1::signing_only()
            .sign_ecdsa_with_noncedata(&Message::from_digest(sighash), &sk, &[7; 32])
            .serialize_compact();
        signer.append_signature(0, &signature).unwrap();
        let second = signer.finish();
        assert_ne!(first, second);

        assert_matches!(
            Combiner::new(vec![first.clone(), second.clone()]).combine(),
            Err(Error::DataMismatch)
        );
        assert_matches!(
            Combiner::new(vec![second, tx, first]).combine(),
            Err(Error::DataMismatch)
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn combine_is_commutative_and_associative(
            a in vec(any::<bool>(), 2),
            b in vec(any::<bool>(), 2),
            c in vec(any::<bool>(), 2),
        ) {
            let signed = sign_all(&proposed_transaction());
            let (a, b, c) = (
                with_signatures(&signed, &a),
                with_signatures(&signed, &b),
                with_signatures(&signed, &c),
            );

            let ab = Combiner::new(vec![a.clone(), b.clone()]).combine().unwrap();
            let ba = Combiner::new(vec![b.clone(), a.clone()]).combine().unwrap();
            prop_assert_eq!(&ab, &ba);

            let ab_c = Combiner::new(vec![ab, c.clone()]).combine().unwrap();
            let bc = Combiner::new(vec![b.clone(), c.clone()]).combine().unwrap();
            let a_bc = Combiner::new(vec![a.clone(), bc]).combine().unwrap();
            prop_assert_eq!(&ab_c, &a_bc);

            // The combination holds exactly the union of the slots.
            for (index, input) in ab_c.transparent.inputs.iter().enumerate() {
                let filled = [&a, &b, &c]
                    .iter()
                    .any(|tx| tx.transparent.inputs[index].signature.is_some());
                prop_assert_eq!(input.signature.is_some(), filled);
            }
        }
    }
}
