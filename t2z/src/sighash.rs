//! [ZIP 244] digests over staged transactions.
//!
//! The header and transparent digests are exactly those of ZIP 244, and a transaction
//! without shielded actions has the same txid and signature hashes as the equivalent v5
//! transaction. The shielded digest covers the action commitments, the value balance,
//! and (for signature hashes) every proof.
//!
//! [ZIP 244]: https://zips.z.cash/zip-0244

use core::fmt;

use blake2b_simd::{Hash as Blake2bHash, Params, State};

use crate::{
    common::{Global, OVERWINTERED_FLAG},
    shielded,
    transparent::{self, write_script, SIGHASH_ALL},
    StagedTransaction,
};

/// TxId tree root personalization
const ZCASH_TX_PERSONALIZATION_PREFIX: &[u8; 12] = b"ZcashTxHash_";

// TxId level 1 node personalization
const ZCASH_HEADERS_HASH_PERSONALIZATION: &[u8; 16] = b"ZTxIdHeadersHash";
const ZCASH_TRANSPARENT_HASH_PERSONALIZATION: &[u8; 16] = b"ZTxIdTranspaHash";
const ZCASH_SAPLING_HASH_PERSONALIZATION: &[u8; 16] = b"ZTxIdSaplingHash";
const ZCASH_ORCHARD_HASH_PERSONALIZATION: &[u8; 16] = b"ZTxIdOrchardHash";

// TxId transparent level 2 node personalization
const ZCASH_PREVOUTS_HASH_PERSONALIZATION: &[u8; 16] = b"ZTxIdPrevoutHash";
const ZCASH_SEQUENCE_HASH_PERSONALIZATION: &[u8; 16] = b"ZTxIdSequencHash";
const ZCASH_OUTPUTS_HASH_PERSONALIZATION: &[u8; 16] = b"ZTxIdOutputsHash";

// Transparent signature digest personalizations
const ZCASH_TRANSPARENT_AMOUNTS_HASH_PERSONALIZATION: &[u8; 16] = b"ZTxTrAmountsHash";
const ZCASH_TRANSPARENT_SCRIPTS_HASH_PERSONALIZATION: &[u8; 16] = b"ZTxTrScriptsHash";
const ZCASH_TRANSPARENT_INPUT_HASH_PERSONALIZATION: &[u8; 16] = b"Zcash___TxInHash";

// Shielded level 2 node personalization
const T2Z_ACTIONS_HASH_PERSONALIZATION: &[u8; 16] = b"T2z_ActionsHash_";
const T2Z_PROOFS_HASH_PERSONALIZATION: &[u8; 16] = b"T2z_ProofsHash__";

/// The flags byte of a shielded bundle that only creates outputs.
pub(crate) const SHIELDED_FLAGS_OUTPUTS_ONLY: u8 = 0b0000_0010;

fn hasher(personal: &[u8; 16]) -> State {
    Params::new().hash_length(32).personal(personal).to_state()
}

/// Appends a CompactSize-prefixed script to a digest.
fn update_script(h: &mut State, script: &[u8]) {
    let mut prefixed = Vec::with_capacity(script.len() + 9);
    write_script(&mut prefixed, script).expect("can serialize into memory");
    h.update(&prefixed);
}

/// The identifier of a transaction, as defined in [ZIP 244].
///
/// [ZIP 244]: https://zips.z.cash/zip-0244
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TxId([u8; 32]);

impl TxId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        TxId(bytes)
    }
}

impl AsRef<[u8; 32]> for TxId {
    fn as_ref(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<TxId> for [u8; 32] {
    fn from(value: TxId) -> Self {
        value.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut data = self.0;
        data.reverse();
        f.write_str(&hex::encode(data))
    }
}

pub(crate) fn header_digest(global: &Global) -> Blake2bHash {
    let mut h = hasher(ZCASH_HEADERS_HASH_PERSONALIZATION);
    h.update(&(global.tx_version | OVERWINTERED_FLAG).to_le_bytes());
    h.update(&global.version_group_id.to_le_bytes());
    h.update(&global.consensus_branch_id.to_le_bytes());
    h.update(&global.lock_time.to_le_bytes());
    h.update(&global.expiry_height.to_le_bytes());
    h.finalize()
}

fn transparent_prevout_hash(inputs: &[transparent::Input]) -> Blake2bHash {
    let mut h = hasher(ZCASH_PREVOUTS_HASH_PERSONALIZATION);
    for input in inputs {
        h.update(&input.prevout_txid);
        h.update(&input.prevout_index.to_le_bytes());
    }
    h.finalize()
}

fn transparent_sequence_hash(inputs: &[transparent::Input]) -> Blake2bHash {
    let mut h = hasher(ZCASH_SEQUENCE_HASH_PERSONALIZATION);
    for input in inputs {
        h.update(&input.sequence.to_le_bytes());
    }
    h.finalize()
}

fn transparent_outputs_hash(outputs: &[transparent::Output]) -> Blake2bHash {
    let mut h = hasher(ZCASH_OUTPUTS_HASH_PERSONALIZATION);
    for output in outputs {
        h.update(&output.value.to_le_bytes());
        update_script(&mut h, &output.script_pubkey);
    }
    h.finalize()
}

fn transparent_amounts_hash(inputs: &[transparent::Input]) -> Blake2bHash {
    let mut h = hasher(ZCASH_TRANSPARENT_AMOUNTS_HASH_PERSONALIZATION);
    for input in inputs {
        h.update(&input.value.to_le_bytes());
    }
    h.finalize()
}

fn transparent_scripts_hash(inputs: &[transparent::Input]) -> Blake2bHash {
    let mut h = hasher(ZCASH_TRANSPARENT_SCRIPTS_HASH_PERSONALIZATION);
    for input in inputs {
        update_script(&mut h, &input.script_pubkey);
    }
    h.finalize()
}

fn transparent_input_hash(input: &transparent::Input) -> Blake2bHash {
    let mut h = hasher(ZCASH_TRANSPARENT_INPUT_HASH_PERSONALIZATION);
    h.update(&input.prevout_txid);
    h.update(&input.prevout_index.to_le_bytes());
    h.update(&input.value.to_le_bytes());
    update_script(&mut h, &input.script_pubkey);
    h.update(&input.sequence.to_le_bytes());
    h.finalize()
}

/// The transparent part of the txid digest.
fn transparent_txid_digest(bundle: &transparent::Bundle) -> Blake2bHash {
    let mut h = hasher(ZCASH_TRANSPARENT_HASH_PERSONALIZATION);
    if !(bundle.inputs.is_empty() && bundle.outputs.is_empty()) {
        h.update(transparent_prevout_hash(&bundle.inputs).as_bytes());
        h.update(transparent_sequence_hash(&bundle.inputs).as_bytes());
        h.update(transparent_outputs_hash(&bundle.outputs).as_bytes());
    }
    h.finalize()
}

/// The transparent part of the `SIGHASH_ALL` signature digest for `input`.
fn transparent_sig_digest(bundle: &transparent::Bundle, input: &transparent::Input) -> Blake2bHash {
    let mut h = hasher(ZCASH_TRANSPARENT_HASH_PERSONALIZATION);
    h.update(&[SIGHASH_ALL]);
    h.update(transparent_prevout_hash(&bundle.inputs).as_bytes());
    h.update(transparent_amounts_hash(&bundle.inputs).as_bytes());
    h.update(transparent_scripts_hash(&bundle.inputs).as_bytes());
    h.update(transparent_sequence_hash(&bundle.inputs).as_bytes());
    h.update(transparent_outputs_hash(&bundle.outputs).as_bytes());
    h.update(transparent_input_hash(input).as_bytes());
    h.finalize()
}

fn sapling_digest() -> Blake2bHash {
    hasher(ZCASH_SAPLING_HASH_PERSONALIZATION).finalize()
}

/// The shielded digest. Proofs are committed to only when `with_proofs` is set.
///
/// The caller must have checked that every proof slot is filled when `with_proofs` is
/// set, and that the value balance is in range.
fn shielded_digest(bundle: &shielded::Bundle, value_balance: i64, with_proofs: bool) -> Blake2bHash {
    let mut h = hasher(ZCASH_ORCHARD_HASH_PERSONALIZATION);
    if !bundle.actions.is_empty() {
        let mut actions = hasher(T2Z_ACTIONS_HASH_PERSONALIZATION);
        for action in &bundle.actions {
            actions.update(&action.cv);
            actions.update(&action.cmx);
        }
        h.update(actions.finalize().as_bytes());

        if with_proofs {
            let mut proofs = hasher(T2Z_PROOFS_HASH_PERSONALIZATION);
            for proof in bundle.actions.iter().filter_map(|a| a.zkproof.as_ref()) {
                update_script(&mut proofs, proof);
            }
            h.update(proofs.finalize().as_bytes());
        }

        h.update(&[SHIELDED_FLAGS_OUTPUTS_ONLY]);
        h.update(&value_balance.to_le_bytes());
    }
    h.finalize()
}

fn root_digest(
    global: &Global,
    header: Blake2bHash,
    transparent: Blake2bHash,
    shielded: Blake2bHash,
) -> [u8; 32] {
    let mut personal = [0; 16];
    personal[..12].copy_from_slice(ZCASH_TX_PERSONALIZATION_PREFIX);
    personal[12..].copy_from_slice(&global.consensus_branch_id.to_le_bytes());

    let mut h = hasher(&personal);
    h.update(header.as_bytes());
    h.update(transparent.as_bytes());
    h.update(sapling_digest().as_bytes());
    h.update(shielded.as_bytes());

    let mut digest = [0; 32];
    digest.copy_from_slice(h.finalize().as_bytes());
    digest
}

/// Computes the `SIGHASH_ALL` signature hash for the transparent input at `index`.
///
/// The caller must have checked that `index` is in range, that every proof is present,
/// and that the value balance is valid.
pub(crate) fn signature_hash(tx: &StagedTransaction, index: usize, value_balance: i64) -> [u8; 32] {
    let input = &tx.transparent.inputs[index];
    root_digest(
        &tx.global,
        header_digest(&tx.global),
        transparent_sig_digest(&tx.transparent, input),
        shielded_digest(&tx.shielded, value_balance, true),
    )
}

/// Computes the txid of the transaction.
pub(crate) fn txid(tx: &StagedTransaction, value_balance: i64) -> TxId {
    TxId(root_digest(
        &tx.global,
        header_digest(&tx.global),
        transparent_txid_digest(&tx.transparent),
        shielded_digest(&tx.shielded, value_balance, false),
    ))
}
