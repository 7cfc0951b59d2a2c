//! Helpers shared by the unit tests.

use proptest::{collection::vec, option, prelude::*};
use rand_chacha::ChaChaRng;
use rand_core::SeedableRng;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use zcash_address::{
    unified::{self, Encoding},
    ToAddress, ZcashAddress,
};
use zcash_protocol::{consensus::NetworkType, value::MAX_MONEY};

use crate::{
    common::{Global, V5_TX_VERSION, V5_VERSION_GROUP_ID},
    roles::{constructor::Constructor, signer::Signer},
    shielded::{self, Action, MEMO_SIZE, RECEIVER_SIZE},
    transparent::{self, hash160, p2pkh_script, SIGHASH_ALL},
    Payment, PaymentRequest, StagedTransaction, TransparentInput,
};

pub(crate) const TEST_KEYS: [[u8; 32]; 3] = [[0x01; 32], [0x02; 32], [0x03; 32]];

pub(crate) fn transparent_address(network: NetworkType, pubkey_hash: [u8; 20]) -> String {
    ZcashAddress::from_transparent_p2pkh(network, pubkey_hash).encode()
}

/// Encodes a unified address containing only the given Orchard receiver.
pub(crate) fn orchard_address(network: NetworkType, receiver: [u8; RECEIVER_SIZE]) -> String {
    let ua = unified::Address::try_from_items(vec![unified::Receiver::Orchard(receiver)])
        .expect("valid unified address");
    ZcashAddress::from_unified(network, ua).encode()
}

fn pubkey(key: &[u8; 32]) -> [u8; 33] {
    let secp = Secp256k1::signing_only();
    let sk = SecretKey::from_slice(key).expect("valid test key");
    PublicKey::from_secret_key(&secp, &sk).serialize()
}

/// A P2PKH coin controlled by `key`.
pub(crate) fn input_for_key(key: &[u8; 32], prevout_index: u32, value: u64) -> TransparentInput {
    let pubkey = pubkey(key);
    let pubkey_hash = hash160(&pubkey);
    let mut prevout_txid = [0; 32];
    prevout_txid[..20].copy_from_slice(&pubkey_hash);
    TransparentInput::new(
        pubkey,
        prevout_txid,
        prevout_index,
        value,
        p2pkh_script(&pubkey_hash),
    )
}

pub(crate) fn sign_compact(key: &[u8; 32], sighash: &[u8; 32]) -> [u8; 64] {
    let secp = Secp256k1::signing_only();
    let sk = SecretKey::from_slice(key).expect("valid test key");
    secp.sign_ecdsa(&Message::from_digest(*sighash), &sk)
        .serialize_compact()
}

/// Signs the input at `index` with `key`.
pub(crate) fn sign_input(
    tx: &StagedTransaction,
    index: usize,
    key: &[u8; 32],
) -> StagedTransaction {
    let mut signer = Signer::new(tx.clone());
    let sighash = signer.sighash(index).unwrap();
    signer
        .append_signature(index, &sign_compact(key, &sighash))
        .unwrap();
    signer.finish()
}

/// Signs input `i` with `TEST_KEYS[i]`, for every input.
pub(crate) fn sign_all(tx: &StagedTransaction) -> StagedTransaction {
    (0..tx.transparent.inputs.len()).fold(tx.clone(), |tx, index| {
        sign_input(&tx, index, &TEST_KEYS[index])
    })
}

/// The change output of a transaction built by one of the helpers below.
pub(crate) fn change_output(tx: &StagedTransaction) -> transparent::Output {
    tx.transparent
        .outputs
        .last()
        .cloned()
        .expect("has change")
}

fn change_address() -> String {
    transparent_address(NetworkType::Test, [0xcc; 20])
}

/// Pays 50000 zatoshis to a transparent address.
pub(crate) fn proposed_request() -> PaymentRequest {
    PaymentRequest::new(vec![Payment::new(
        transparent_address(NetworkType::Test, [0x11; 20]),
        50_000,
    )])
    .unwrap()
}

/// Spends 120000 and 80000 zatoshis to pay [`proposed_request`], leaving 140000
/// zatoshis of change.
pub(crate) fn proposed_transaction() -> StagedTransaction {
    let inputs = [
        input_for_key(&TEST_KEYS[0], 0, 120_000),
        input_for_key(&TEST_KEYS[1], 1, 80_000),
    ];
    Constructor::new(&inputs, &change_address())
        .build_with_rng(&mut proposed_request(), ChaChaRng::seed_from_u64(0))
        .unwrap()
}

/// Pays two shielded recipients and one transparent one.
pub(crate) fn shielded_request() -> PaymentRequest {
    let shielded = orchard_address(NetworkType::Test, [0x42; RECEIVER_SIZE]);
    PaymentRequest::new(vec![
        Payment::new(shielded.clone(), 100_000).with_memo(b"invoice 17".to_vec()),
        Payment::new(transparent_address(NetworkType::Test, [0x11; 20]), 20_000),
        Payment::new(shielded, 30_000),
    ])
    .unwrap()
}

/// Spends 300000 and 200000 zatoshis to pay [`shielded_request`], with change.
pub(crate) fn shielded_transaction() -> StagedTransaction {
    let inputs = [
        input_for_key(&TEST_KEYS[0], 0, 300_000),
        input_for_key(&TEST_KEYS[1], 1, 200_000),
    ];
    Constructor::new(&inputs, &change_address())
        .build_with_rng(&mut shielded_request(), ChaChaRng::seed_from_u64(1))
        .unwrap()
}

fn arb_array<const N: usize>() -> impl Strategy<Value = [u8; N]> {
    vec(any::<u8>(), N).prop_map(|bytes| bytes.try_into().expect("correct length"))
}

prop_compose! {
    fn arb_global()(
        consensus_branch_id in any::<u32>(),
        lock_time in any::<u32>(),
        expiry_height in any::<u32>(),
        coin_type in prop_oneof![Just(1), Just(133)],
    ) -> Global {
        Global {
            tx_version: V5_TX_VERSION,
            version_group_id: V5_VERSION_GROUP_ID,
            consensus_branch_id,
            lock_time,
            expiry_height,
            coin_type,
        }
    }
}

prop_compose! {
    fn arb_input()(
        prevout_txid in any::<[u8; 32]>(),
        prevout_index in any::<u32>(),
        sequence in any::<u32>(),
        value in 0..=MAX_MONEY,
        script_pubkey in vec(any::<u8>(), 0..30),
        pubkey in arb_array::<33>(),
        signature in option::of(arb_array::<64>()),
    ) -> transparent::Input {
        transparent::Input {
            prevout_txid,
            prevout_index,
            sequence,
            value,
            script_pubkey,
            pubkey,
            sighash_type: SIGHASH_ALL,
            signature,
        }
    }
}

prop_compose! {
    fn arb_output()(
        value in 0..=MAX_MONEY,
        script_pubkey in vec(any::<u8>(), 0..30),
    ) -> transparent::Output {
        transparent::Output::new(value, script_pubkey)
    }
}

prop_compose! {
    fn arb_action()(
        cv in any::<[u8; 32]>(),
        cmx in any::<[u8; 32]>(),
        recipient in arb_array::<RECEIVER_SIZE>(),
        value in 0..=MAX_MONEY,
        memo in arb_array::<MEMO_SIZE>(),
        rcv in option::of(any::<[u8; 32]>()),
        rseed in option::of(any::<[u8; 32]>()),
        zkproof in option::of(vec(any::<u8>(), 0..96)),
    ) -> Action {
        Action {
            cv,
            cmx,
            recipient,
            value,
            memo,
            rcv,
            rseed,
            zkproof,
        }
    }
}

prop_compose! {
    pub(crate) fn arb_staged_transaction()(
        global in arb_global(),
        inputs in vec(arb_input(), 0..4),
        outputs in vec(arb_output(), 0..4),
        actions in vec(arb_action(), 0..3),
    ) -> StagedTransaction {
        StagedTransaction {
            global,
            transparent: transparent::Bundle { inputs, outputs },
            shielded: shielded::Bundle { actions },
        }
    }
}
