pub mod constructor;

pub mod prover;

pub mod verifier;

pub mod signer;

pub mod combiner;

pub mod spend_finalizer;

pub mod tx_extractor;

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::{
        roles::{
            combiner::Combiner,
            prover::{Prover, TranscriptProver},
            signer::Signer,
            tx_extractor::{self, TransactionExtractor},
            verifier::Verifier,
        },
        testing::{change_output, shielded_request, shielded_transaction, sign_compact, TEST_KEYS},
    };

    #[test]
    fn extract_fails_before_proving() {
        // Extraction fails on proofs because we check them before signatures.
        assert_matches!(
            TransactionExtractor::new(shielded_transaction()).extract(),
            Err(tx_extractor::Error::MissingProof { index: 0 })
        );
    }

    #[test]
    fn roles_compose() {
        let tx = shielded_transaction();

        let mut prover = Prover::new(tx);
        prover.create_proofs(&TranscriptProver).unwrap();
        let tx = prover.finish();

        let change = change_output(&tx);
        let verifier = Verifier::new(tx);
        verifier
            .verify_payments(&shielded_request(), &[change])
            .unwrap();
        let tx = verifier.finish();

        // Each signer works on its own copy.
        let copies = (0..tx.transparent.inputs.len())
            .map(|index| {
                let mut signer = Signer::new(tx.clone());
                let sighash = signer.sighash(index).unwrap();
                signer
                    .append_signature(index, &sign_compact(&TEST_KEYS[index], &sighash))
                    .unwrap();
                signer.finish()
            })
            .collect::<Vec<_>>();

        let tx = Combiner::new(copies).combine().unwrap();
        let extracted = TransactionExtractor::new(tx).extract().unwrap();
        assert!(!extracted.bytes().is_empty());
    }
}
