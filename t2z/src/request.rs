//! Payment requests: the outputs a caller wants a staged transaction to create.

use core::fmt;

use getset::Getters;
use zcash_protocol::{
    consensus::Network,
    value::{Zatoshis, MAX_MONEY},
};

use crate::shielded::MEMO_SIZE;

/// A single payment within a [`PaymentRequest`].
#[derive(Clone, Debug, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct Payment {
    /// The encoded Zcash address to pay.
    address: String,
    /// The amount to pay, in zatoshis.
    amount: u64,
    /// A memo for the recipient. Only shielded recipients can receive one.
    memo: Option<Vec<u8>>,
    /// A human-readable label for the recipient.
    label: Option<String>,
    /// A human-readable message for the payer.
    message: Option<String>,
}

impl Payment {
    /// Constructs a payment of `amount` zatoshis to `address`, with no memo.
    pub fn new(address: impl Into<String>, amount: u64) -> Self {
        Self {
            address: address.into(),
            amount,
            memo: None,
            label: None,
            message: None,
        }
    }

    pub fn with_memo(mut self, memo: impl Into<Vec<u8>>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// A validated, ordered list of payments, together with the chain parameters that a
/// Constructor should build the transaction for.
///
/// The request is single-use: once a Constructor has built a staged transaction from it,
/// its parameters can no longer be changed, but it can still be read (for example by the
/// Verifier).
#[derive(Clone, Debug, PartialEq, Eq, Getters)]
pub struct PaymentRequest {
    #[getset(get = "pub")]
    payments: Vec<Payment>,
    target_height: Option<u32>,
    network: Network,
    total: Zatoshis,
    consumed: bool,
}

impl PaymentRequest {
    /// Builds a request for the given payments, targeting testnet with no target
    /// height.
    pub fn new(payments: Vec<Payment>) -> Result<Self, RequestError> {
        if payments.is_empty() {
            return Err(RequestError::Empty);
        }

        let mut total = Zatoshis::ZERO;
        for (index, payment) in payments.iter().enumerate() {
            if payment.address.is_empty() {
                return Err(RequestError::EmptyAddress { index });
            }
            if payment.amount == 0 {
                return Err(RequestError::ZeroAmount { index });
            }
            let amount = Zatoshis::from_u64(payment.amount)
                .map_err(|_| RequestError::AmountTooLarge { index })?;
            if payment.memo.as_ref().is_some_and(|m| m.len() > MEMO_SIZE) {
                return Err(RequestError::MemoTooLong { index });
            }
            total = (total + amount).ok_or(RequestError::TotalTooLarge)?;
        }

        Ok(Self {
            payments,
            target_height: None,
            network: Network::TestNetwork,
            total,
            consumed: false,
        })
    }

    /// Sets the block height at which the transaction is expected to be mined.
    ///
    /// This selects the consensus branch and the expiry height.
    pub fn set_target_height(&mut self, height: u32) -> Result<(), RequestError> {
        self.check_unconsumed()?;
        self.target_height = Some(height);
        Ok(())
    }

    /// Sets the network the transaction is for.
    pub fn set_network(&mut self, network: Network) -> Result<(), RequestError> {
        self.check_unconsumed()?;
        self.network = network;
        Ok(())
    }

    pub fn target_height(&self) -> Option<u32> {
        self.target_height
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Returns the sum of all payment amounts.
    pub fn total_amount(&self) -> Zatoshis {
        self.total
    }

    /// Returns `true` once a Constructor has built a staged transaction from this
    /// request.
    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    pub(crate) fn mark_consumed(&mut self) {
        self.consumed = true;
    }

    fn check_unconsumed(&self) -> Result<(), RequestError> {
        if self.consumed {
            Err(RequestError::AlreadyConsumed)
        } else {
            Ok(())
        }
    }
}

/// Errors that can occur while building or updating a [`PaymentRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The request has already been used to build a staged transaction.
    AlreadyConsumed,
    AmountTooLarge {
        index: usize,
    },
    Empty,
    EmptyAddress {
        index: usize,
    },
    MemoTooLong {
        index: usize,
    },
    TotalTooLarge,
    ZeroAmount {
        index: usize,
    },
}

impl RequestError {
    /// Returns `true` if this error reports misuse of a request's lifecycle, rather than
    /// invalid request contents.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, RequestError::AlreadyConsumed)
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::AlreadyConsumed => {
                write!(f, "the payment request has already been consumed")
            }
            RequestError::AmountTooLarge { index } => write!(
                f,
                "payment {} exceeds the maximum of {} zatoshis",
                index, MAX_MONEY
            ),
            RequestError::Empty => write!(f, "a payment request needs at least one payment"),
            RequestError::EmptyAddress { index } => write!(f, "payment {} has no address", index),
            RequestError::MemoTooLong { index } => write!(
                f,
                "payment {} has a memo longer than {} bytes",
                index, MEMO_SIZE
            ),
            RequestError::TotalTooLarge => write!(
                f,
                "the payments total more than {} zatoshis",
                MAX_MONEY
            ),
            RequestError::ZeroAmount { index } => write!(f, "payment {} has a zero amount", index),
        }
    }
}

impl std::error::Error for RequestError {}
