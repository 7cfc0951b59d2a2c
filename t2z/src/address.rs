//! Classification of payment addresses into the outputs that can pay them.

use core::fmt;

use zcash_address::{
    unified::{self, Container},
    ConversionError, ParseError, TryFromRawAddress, ZcashAddress,
};
use zcash_protocol::consensus::{Network, NetworkType, Parameters};

use crate::{
    shielded::RECEIVER_SIZE,
    transparent::{p2pkh_script, p2sh_script},
};

/// Where a payment address sends funds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Recipient {
    /// A transparent output with the given script.
    Transparent { script_pubkey: Vec<u8> },
    /// A shielded action to the given raw Orchard receiver.
    Shielded { receiver: [u8; RECEIVER_SIZE] },
}

impl TryFromRawAddress for Recipient {
    type Error = &'static str;

    fn try_from_raw_unified(data: unified::Address) -> Result<Self, ConversionError<Self::Error>> {
        data.items()
            .into_iter()
            .find_map(|receiver| match receiver {
                unified::Receiver::Orchard(receiver) => Some(Recipient::Shielded { receiver }),
                _ => None,
            })
            .ok_or_else(|| "unified addresses without an Orchard receiver".into())
    }

    fn try_from_raw_transparent_p2pkh(
        data: [u8; 20],
    ) -> Result<Self, ConversionError<Self::Error>> {
        Ok(Recipient::Transparent {
            script_pubkey: p2pkh_script(&data),
        })
    }

    fn try_from_raw_transparent_p2sh(data: [u8; 20]) -> Result<Self, ConversionError<Self::Error>> {
        Ok(Recipient::Transparent {
            script_pubkey: p2sh_script(&data),
        })
    }

    fn try_from_raw_tex(data: [u8; 20]) -> Result<Self, ConversionError<Self::Error>> {
        // Staged transactions only spend transparent coins, so paying the P2PKH script
        // behind a TEX address satisfies ZIP 320.
        Ok(Recipient::Transparent {
            script_pubkey: p2pkh_script(&data),
        })
    }
}

impl Recipient {
    /// Parses `address` and classifies it, requiring it to be for `network`.
    pub(crate) fn parse(address: &str, network: &Network) -> Result<Self, AddressError> {
        ZcashAddress::try_from_encoded(address)
            .map_err(AddressError::Malformed)?
            .convert_if_network(network.network_type())
            .map_err(|e| match e {
                ConversionError::IncorrectNetwork { expected, actual } => {
                    AddressError::IncorrectNetwork { expected, actual }
                }
                e => AddressError::Unsupported(e.to_string()),
            })
    }

    pub(crate) fn is_shielded(&self) -> bool {
        matches!(self, Recipient::Shielded { .. })
    }
}

/// Errors that can occur while interpreting a payment or change address.
#[derive(Debug, PartialEq, Eq)]
pub enum AddressError {
    IncorrectNetwork {
        expected: NetworkType,
        actual: NetworkType,
    },
    /// The string is not a Zcash address.
    Malformed(ParseError),
    /// The address is valid, but staged transactions cannot pay it.
    Unsupported(String),
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressError::IncorrectNetwork { expected, actual } => write!(
                f,
                "address is for {:?}, but the transaction is for {:?}",
                actual, expected
            ),
            AddressError::Malformed(e) => write!(f, "invalid address: {}", e),
            AddressError::Unsupported(e) => write!(f, "unsupported address: {}", e),
        }
    }
}

impl std::error::Error for AddressError {}
