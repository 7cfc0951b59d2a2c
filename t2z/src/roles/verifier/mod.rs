//! The Verifier role (every Signer that did not construct the transaction).
//!
//! Checks the externally visible effects of a staged transaction against the payment
//! request it is supposed to pay, and against the change the signer expects back. Only
//! after this succeeds should a signer sign.

use core::fmt;

use zcash_protocol::{
    consensus::{NetworkConstants, Parameters},
    memo::MemoBytes,
    value::Zatoshis,
};

use crate::{
    address::{AddressError, Recipient},
    fees::{FeeRule, DUST_THRESHOLD},
    request::PaymentRequest,
    roles::constructor::branch_and_expiry,
    shielded::WitnessError,
    transparent::{self, FINAL_SEQUENCE},
    StagedTransaction,
};

pub struct Verifier {
    tx: StagedTransaction,
    fee_rule: FeeRule,
}

impl Verifier {
    /// Instantiates the Verifier role with the given staged transaction.
    pub fn new(tx: StagedTransaction) -> Self {
        Self {
            tx,
            fee_rule: FeeRule::standard(),
        }
    }

    /// Checks fees against `fee_rule` instead of the standard ZIP 317 rule.
    pub fn with_fee_rule(mut self, fee_rule: FeeRule) -> Self {
        self.fee_rule = fee_rule;
        self
    }

    /// Checks that the transaction pays exactly what `request` asks for, in request
    /// order, with exactly `expected_change` as its remaining transparent outputs.
    ///
    /// An empty `expected_change` means that no change output may be present.
    pub fn verify_payments(
        &self,
        request: &PaymentRequest,
        expected_change: &[transparent::Output],
    ) -> Result<(), Error> {
        let network = request.network();
        let expected_coin_type = network.network_type().coin_type();
        if self.tx.global.coin_type != expected_coin_type {
            return Err(Error::NetworkMismatch {
                expected: expected_coin_type,
                actual: self.tx.global.coin_type,
            });
        }

        self.verify_timing(request)?;

        let outputs = &self.tx.transparent.outputs;
        let actions = &self.tx.shielded.actions;
        let mut next_output = 0;
        let mut next_action = 0;

        for (index, payment) in request.payments().iter().enumerate() {
            match Recipient::parse(payment.address(), &network)
                .map_err(|error| Error::InvalidPaymentAddress { index, error })?
            {
                Recipient::Transparent { script_pubkey } => {
                    let output = outputs
                        .get(next_output)
                        .ok_or(Error::MissingOutput { payment: index })?;
                    if output.script_pubkey != script_pubkey || output.value != *payment.amount() {
                        return Err(Error::OutputMismatch {
                            payment: index,
                            output: next_output,
                        });
                    }
                    next_output += 1;
                }
                Recipient::Shielded { receiver } => {
                    let action = actions
                        .get(next_action)
                        .ok_or(Error::MissingAction { payment: index })?;
                    let memo = match payment.memo() {
                        Some(memo) => MemoBytes::from_bytes(memo).ok(),
                        None => Some(MemoBytes::empty()),
                    };
                    if action.recipient != receiver
                        || action.value != *payment.amount()
                        || memo.as_ref().map(MemoBytes::as_array) != Some(&action.memo)
                    {
                        return Err(Error::ActionMismatch {
                            payment: index,
                            action: next_action,
                        });
                    }
                    action.check_witness().map_err(|error| Error::ActionWitness {
                        action: next_action,
                        error,
                    })?;
                    next_action += 1;
                }
            }
        }

        if next_action != actions.len() {
            return Err(Error::UnexpectedActions {
                count: actions.len() - next_action,
            });
        }

        if &outputs[next_output..] != expected_change {
            return Err(Error::ChangeMismatch);
        }

        self.verify_fee()
    }

    /// Checks that the transaction can be mined as soon as the request intends, and
    /// expires when a Constructor for the request would have made it expire.
    fn verify_timing(&self, request: &PaymentRequest) -> Result<(), Error> {
        let global = &self.tx.global;
        if global.lock_time != 0 {
            return Err(Error::LockTimeSet(global.lock_time));
        }
        if let Some(index) = self
            .tx
            .transparent
            .inputs
            .iter()
            .position(|input| input.sequence != FINAL_SEQUENCE)
        {
            return Err(Error::NonFinalSequence { index });
        }

        let (branch_id, expiry_height) =
            branch_and_expiry(&request.network(), request.target_height());
        let branch_id = u32::from(branch_id);
        if global.consensus_branch_id != branch_id {
            return Err(Error::BranchMismatch {
                expected: branch_id,
                actual: global.consensus_branch_id,
            });
        }
        if global.expiry_height != expiry_height {
            return Err(Error::ExpiryMismatch {
                expected: expiry_height,
                actual: global.expiry_height,
            });
        }

        Ok(())
    }

    /// Checks that the implied fee is non-negative, and no larger than the fee rule
    /// allows once sub-dust change has been absorbed into it.
    fn verify_fee(&self) -> Result<(), Error> {
        let inputs = sum_values(self.tx.transparent.inputs.iter().map(|i| i.value))?;
        let outputs = sum_values(self.tx.transparent.outputs.iter().map(|o| o.value))?;
        let shielded = sum_values(self.tx.shielded.actions.iter().map(|a| a.value))?;

        let spent = (outputs + shielded).ok_or(Error::ValueOverflow)?;
        let fee = (inputs - spent).ok_or(Error::OutputsExceedInputs {
            inputs: inputs.into_u64(),
            outputs: spent.into_u64(),
        })?;

        let fee_required = self
            .fee_rule
            .fee_required(
                self.tx.transparent.inputs.len(),
                self.tx
                    .transparent
                    .outputs
                    .iter()
                    .map(transparent::Output::serialized_size),
                self.tx.shielded.actions.len(),
            )
            .map_err(|_| Error::ValueOverflow)?;
        let fee_limit = (fee_required + DUST_THRESHOLD)
            .and_then(|limit| limit + self.fee_rule.marginal_fee())
            .ok_or(Error::ValueOverflow)?;

        tracing::trace!(
            fee = fee.into_u64(),
            fee_required = fee_required.into_u64(),
            "Checking implied fee"
        );

        if fee > fee_limit {
            return Err(Error::ExcessiveFee {
                fee: fee.into_u64(),
                limit: fee_limit.into_u64(),
            });
        }

        Ok(())
    }

    /// Finishes the Verifier role, returning the unchanged staged transaction.
    pub fn finish(self) -> StagedTransaction {
        self.tx
    }
}

fn sum_values(mut values: impl Iterator<Item = u64>) -> Result<Zatoshis, Error> {
    values.try_fold(Zatoshis::ZERO, |acc, value| {
        (acc + Zatoshis::from_u64(value).map_err(|_| Error::ValueOverflow)?)
            .ok_or(Error::ValueOverflow)
    })
}

/// Errors that can occur while verifying a staged transaction.
#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    /// The action paying `payment` does not match it.
    ActionMismatch { payment: usize, action: usize },
    /// The witness of an action paying a request does not open its commitments.
    ActionWitness { action: usize, error: WitnessError },
    /// The transaction commits to a different consensus branch than the request's
    /// target height selects.
    BranchMismatch { expected: u32, actual: u32 },
    /// The change outputs differ from the expected change.
    ChangeMismatch,
    ExcessiveFee { fee: u64, limit: u64 },
    ExpiryMismatch { expected: u32, actual: u32 },
    InvalidPaymentAddress { index: usize, error: AddressError },
    /// The transaction cannot be mined before the given lock time.
    LockTimeSet(u32),
    MissingAction { payment: usize },
    MissingOutput { payment: usize },
    /// The transaction is for a different network than the request.
    NetworkMismatch { expected: u32, actual: u32 },
    /// The transparent input at `index` does not use the final sequence number.
    NonFinalSequence { index: usize },
    /// The transparent output at `output` does not match `payment`.
    OutputMismatch { payment: usize, output: usize },
    OutputsExceedInputs { inputs: u64, outputs: u64 },
    /// The transaction has `count` actions that no payment asked for.
    UnexpectedActions { count: usize },
    ValueOverflow,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ActionMismatch { payment, action } => write!(
                f,
                "action {} does not match payment {}",
                action, payment
            ),
            Error::ActionWitness { action, error } => {
                write!(f, "action {} has an invalid witness: {}", action, error)
            }
            Error::BranchMismatch { expected, actual } => write!(
                f,
                "the transaction has consensus branch {:08x}, but the request expects {:08x}",
                actual, expected
            ),
            Error::ChangeMismatch => write!(f, "the change outputs differ from the expected change"),
            Error::ExcessiveFee { fee, limit } => write!(
                f,
                "the fee of {} zatoshis exceeds the limit of {} zatoshis",
                fee, limit
            ),
            Error::ExpiryMismatch { expected, actual } => write!(
                f,
                "the transaction expires at height {}, but the request expects {}",
                actual, expected
            ),
            Error::InvalidPaymentAddress { index, error } => {
                write!(f, "payment {}: {}", index, error)
            }
            Error::LockTimeSet(lock_time) => {
                write!(f, "the transaction has a lock time of {}", lock_time)
            }
            Error::MissingAction { payment } => {
                write!(f, "no action pays payment {}", payment)
            }
            Error::MissingOutput { payment } => {
                write!(f, "no transparent output pays payment {}", payment)
            }
            Error::NetworkMismatch { expected, actual } => write!(
                f,
                "the transaction has coin type {}, but the request expects {}",
                actual, expected
            ),
            Error::NonFinalSequence { index } => {
                write!(f, "transparent input {} is not final", index)
            }
            Error::OutputMismatch { payment, output } => write!(
                f,
                "transparent output {} does not match payment {}",
                output, payment
            ),
            Error::OutputsExceedInputs { inputs, outputs } => write!(
                f,
                "outputs of {} zatoshis exceed inputs of {} zatoshis",
                outputs, inputs
            ),
            Error::UnexpectedActions { count } => {
                write!(f, "{} actions do not pay any requested payment", count)
            }
            Error::ValueOverflow => write!(f, "transaction values overflow"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ActionWitness { error, .. } => Some(error),
            Error::InvalidPaymentAddress { error, .. } => Some(error),
            _ => None,
        }
    }
}
