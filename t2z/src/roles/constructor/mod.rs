//! The Constructor role (single entity).
//!
//!  - Builds the skeleton of a staged transaction from transparent coins, a payment
//!    request and a change address.
//!  - Leaves every signature and proof slot empty.

use core::fmt;
use std::collections::BTreeSet;

use rand_core::{CryptoRng, OsRng, RngCore};
use secp256k1::PublicKey;
use zcash_protocol::{
    consensus::{BlockHeight, BranchId, NetworkUpgrade, Parameters},
    memo::MemoBytes,
    value::{BalanceError, Zatoshis},
};

use crate::{
    address::{AddressError, Recipient},
    common::Global,
    fees::{FeeRule, DUST_THRESHOLD},
    request::PaymentRequest,
    shielded::{self, Action},
    transparent::{self, hash160, p2pkh_hash, FINAL_SEQUENCE, SIGHASH_ALL},
    StagedTransaction, TransparentInput,
};

/// The default number of blocks after the target height at which a staged transaction
/// expires.
pub const DEFAULT_TX_EXPIRY_DELTA: u32 = 40;

/// Builds staged transactions from transparent coins and a [`PaymentRequest`].
pub struct Constructor<'a> {
    inputs: &'a [TransparentInput],
    change_address: &'a str,
    fee_rule: FeeRule,
}

impl<'a> Constructor<'a> {
    /// Instantiates the Constructor role, spending `inputs` and sending any change to
    /// `change_address`.
    pub fn new(inputs: &'a [TransparentInput], change_address: &'a str) -> Self {
        Self {
            inputs,
            change_address,
            fee_rule: FeeRule::standard(),
        }
    }

    /// Uses `fee_rule` instead of the standard ZIP 317 rule.
    pub fn with_fee_rule(mut self, fee_rule: FeeRule) -> Self {
        self.fee_rule = fee_rule;
        self
    }

    /// Builds a staged transaction paying `request`, drawing commitment randomness from
    /// the operating system.
    ///
    /// On success the request is marked as consumed. On failure it is left untouched.
    pub fn build(self, request: &mut PaymentRequest) -> Result<StagedTransaction, Error> {
        self.build_with_rng(request, OsRng)
    }

    /// Builds a staged transaction paying `request`, drawing commitment randomness from
    /// `rng`.
    pub fn build_with_rng<R: RngCore + CryptoRng>(
        self,
        request: &mut PaymentRequest,
        mut rng: R,
    ) -> Result<StagedTransaction, Error> {
        if request.is_consumed() {
            return Err(Error::RequestConsumed);
        }

        let network = request.network();
        let available = self.check_inputs()?;

        // Classify the payments, keeping request order within each pool.
        let mut outputs = vec![];
        let mut payees = vec![];
        for (index, payment) in request.payments().iter().enumerate() {
            let recipient = Recipient::parse(payment.address(), &network)
                .map_err(|error| Error::InvalidPaymentAddress { index, error })?;
            match recipient {
                Recipient::Transparent { script_pubkey } => {
                    if payment.memo().is_some() {
                        return Err(Error::TransparentMemo { index });
                    }
                    outputs.push(transparent::Output::new(*payment.amount(), script_pubkey));
                }
                Recipient::Shielded { receiver } => {
                    let memo = match payment.memo() {
                        Some(memo) => {
                            MemoBytes::from_bytes(memo).map_err(|_| Error::InvalidMemo { index })?
                        }
                        None => MemoBytes::empty(),
                    };
                    payees.push((receiver, *payment.amount(), memo));
                }
            }
        }

        let change_script = match Recipient::parse(self.change_address, &network)
            .map_err(Error::InvalidChangeAddress)?
        {
            Recipient::Transparent { script_pubkey } => script_pubkey,
            Recipient::Shielded { .. } => return Err(Error::ShieldedChangeAddress),
        };

        // Fees
        let total = request.total_amount();
        let fee_without_change = self.fee_for(&outputs, payees.len())?;
        let required = (total + fee_without_change).ok_or(Error::BalanceOverflow)?;
        if available < required {
            return Err(Error::InsufficientFunds {
                available: available.into_u64(),
                required: required.into_u64(),
            });
        }

        let change_output = transparent::Output::new(0, change_script);
        let fee_with_change = self.fee_for(
            outputs.iter().chain(Some(&change_output)),
            payees.len(),
        )?;
        let change = (total + fee_with_change)
            .and_then(|spent| available - spent)
            .filter(|change| *change >= DUST_THRESHOLD);
        let fee = match change {
            Some(change) => {
                outputs.push(transparent::Output {
                    value: change.into_u64(),
                    ..change_output
                });
                fee_with_change
            }
            None => (available - total).ok_or(Error::BalanceOverflow)?,
        };

        if let Some(height) = request.target_height() {
            if !network.is_nu_active(NetworkUpgrade::Nu5, BlockHeight::from_u32(height)) {
                return Err(Error::PreNu5TargetHeight(height));
            }
        }
        let (branch_id, expiry_height) = branch_and_expiry(&network, request.target_height());

        let inputs = self
            .inputs
            .iter()
            .map(|input| transparent::Input {
                prevout_txid: *input.prevout_txid(),
                prevout_index: *input.prevout_index(),
                sequence: FINAL_SEQUENCE,
                value: *input.value(),
                script_pubkey: input.script_pubkey().clone(),
                pubkey: *input.pubkey(),
                sighash_type: SIGHASH_ALL,
                signature: None,
            })
            .collect::<Vec<_>>();

        let actions = payees
            .into_iter()
            .map(|(receiver, value, memo)| {
                let mut rcv = [0; 32];
                rng.fill_bytes(&mut rcv);
                let mut rseed = [0; 32];
                rng.fill_bytes(&mut rseed);
                Action::from_parts(receiver, value, *memo.as_array(), rcv, rseed)
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            inputs = inputs.len(),
            outputs = outputs.len(),
            actions = actions.len(),
            fee = fee.into_u64(),
            change = change.map(Zatoshis::into_u64).unwrap_or(0),
            "Constructed staged transaction"
        );

        let tx = StagedTransaction {
            global: Global::new(&network, branch_id, expiry_height),
            transparent: transparent::Bundle { inputs, outputs },
            shielded: shielded::Bundle { actions },
        };

        request.mark_consumed();
        Ok(tx)
    }

    /// Checks the inputs, returning their total value.
    fn check_inputs(&self) -> Result<Zatoshis, Error> {
        if self.inputs.is_empty() {
            return Err(Error::NoInputs);
        }

        let mut outpoints = BTreeSet::new();
        let mut total = Zatoshis::ZERO;
        for (index, input) in self.inputs.iter().enumerate() {
            if !outpoints.insert((*input.prevout_txid(), *input.prevout_index())) {
                return Err(Error::DuplicateInput { index });
            }
            PublicKey::from_slice(input.pubkey())
                .map_err(|_| Error::InvalidInputPubkey { index })?;
            if p2pkh_hash(input.script_pubkey()) != Some(hash160(input.pubkey())) {
                return Err(Error::InputScriptMismatch { index });
            }
            let value = Zatoshis::from_u64(*input.value())
                .map_err(|_| Error::InvalidInputValue { index })?;
            tracing::trace!(index, value = value.into_u64(), "Spending transparent input");
            total = (total + value).ok_or(Error::BalanceOverflow)?;
        }

        Ok(total)
    }

    fn fee_for<'o>(
        &self,
        outputs: impl IntoIterator<Item = &'o transparent::Output>,
        action_count: usize,
    ) -> Result<Zatoshis, Error> {
        self.fee_rule
            .fee_required(
                self.inputs.len(),
                outputs.into_iter().map(transparent::Output::serialized_size),
                action_count,
            )
            .map_err(|_: BalanceError| Error::BalanceOverflow)
    }
}

/// Returns the consensus branch and expiry height of a transaction targeting
/// `target_height` on `network`.
///
/// With no target height, the transaction uses the NU6 branch and never expires.
pub(crate) fn branch_and_expiry<P: Parameters>(
    network: &P,
    target_height: Option<u32>,
) -> (BranchId, u32) {
    match target_height {
        Some(height) => (
            BranchId::for_height(network, BlockHeight::from_u32(height)),
            height.saturating_add(DEFAULT_TX_EXPIRY_DELTA),
        ),
        None => (BranchId::Nu6, 0),
    }
}

/// Errors that can occur while constructing a staged transaction.
#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    BalanceOverflow,
    DuplicateInput {
        index: usize,
    },
    InputScriptMismatch {
        index: usize,
    },
    InsufficientFunds {
        available: u64,
        required: u64,
    },
    InvalidChangeAddress(AddressError),
    InvalidInputPubkey {
        index: usize,
    },
    InvalidInputValue {
        index: usize,
    },
    InvalidMemo {
        index: usize,
    },
    InvalidPaymentAddress {
        index: usize,
        error: AddressError,
    },
    NoInputs,
    PreNu5TargetHeight(u32),
    /// The payment request has already been used to build a staged transaction.
    RequestConsumed,
    ShieldedChangeAddress,
    TransparentMemo {
        index: usize,
    },
}

impl Error {
    /// Returns `true` if the error is caused by a payment address that is valid, but of
    /// a kind that staged transactions cannot pay.
    pub fn is_unsupported_address(&self) -> bool {
        matches!(
            self,
            Error::InvalidPaymentAddress {
                error: AddressError::Unsupported(_),
                ..
            }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BalanceOverflow => write!(f, "transaction values overflow"),
            Error::DuplicateInput { index } => {
                write!(f, "input {} spends an outpoint that is already spent", index)
            }
            Error::InputScriptMismatch { index } => write!(
                f,
                "input {} is not a P2PKH coin controlled by its public key",
                index
            ),
            Error::InsufficientFunds {
                available,
                required,
            } => write!(
                f,
                "insufficient funds: {} zatoshis available, {} required",
                available, required
            ),
            Error::InvalidChangeAddress(e) => write!(f, "invalid change address: {}", e),
            Error::InvalidInputPubkey { index } => {
                write!(f, "input {} has an invalid public key", index)
            }
            Error::InvalidInputValue { index } => {
                write!(f, "input {} has an invalid value", index)
            }
            Error::InvalidMemo { index } => write!(f, "payment {} has an invalid memo", index),
            Error::InvalidPaymentAddress { index, error } => {
                write!(f, "payment {}: {}", index, error)
            }
            Error::NoInputs => write!(f, "no transparent inputs to spend"),
            Error::PreNu5TargetHeight(height) => write!(
                f,
                "target height {} is before NU5 activation",
                height
            ),
            Error::RequestConsumed => {
                write!(f, "the payment request has already been consumed")
            }
            Error::ShieldedChangeAddress => write!(f, "the change address must be transparent"),
            Error::TransparentMemo { index } => write!(
                f,
                "payment {} has a memo, but pays a transparent address",
                index
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::InvalidChangeAddress(e) => Some(e),
            Error::InvalidPaymentAddress { error, .. } => Some(error),
            _ => None,
        }
    }
}
