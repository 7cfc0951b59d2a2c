use core::fmt;

use getset::Getters;
use serde::{Deserialize, Serialize};
use zcash_protocol::consensus::{BranchId, Network, NetworkConstants, Parameters};

pub(crate) const V5_TX_VERSION: u32 = 5;
pub(crate) const V5_VERSION_GROUP_ID: u32 = 0x26A7270A;

/// The overwintered flag set in the header of every v5 transaction.
pub(crate) const OVERWINTERED_FLAG: u32 = 1 << 31;

/// Global fields that are relevant to the transaction as a whole.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct Global {
    //
    // Transaction effecting data.
    //
    // These are required fields that are part of the final transaction, and are filled in
    // by the Constructor.
    //
    pub(crate) tx_version: u32,
    pub(crate) version_group_id: u32,

    /// The consensus branch ID for the chain in which this transaction will be mined.
    ///
    /// This commits to the set of consensus rules that will apply to the transaction,
    /// and is part of every signature hash.
    pub(crate) consensus_branch_id: u32,

    pub(crate) lock_time: u32,

    /// The block height after which this transaction can no longer be mined, or 0 if it
    /// never expires.
    pub(crate) expiry_height: u32,

    /// The [SLIP 44] coin type, indicating the network for which this transaction is
    /// being constructed.
    ///
    /// This is not included in the transaction. The Verifier checks it against the
    /// network of the payment request it is given.
    ///
    /// [SLIP 44]: https://github.com/satoshilabs/slips/blob/master/slip-0044.md
    pub(crate) coin_type: u32,
}

impl Global {
    pub(crate) fn new(network: &Network, branch_id: BranchId, expiry_height: u32) -> Self {
        Self {
            tx_version: V5_TX_VERSION,
            version_group_id: V5_VERSION_GROUP_ID,
            consensus_branch_id: branch_id.into(),
            lock_time: 0,
            expiry_height,
            coin_type: network.network_type().coin_type(),
        }
    }

    /// Merges this global with another.
    ///
    /// Every global field is effecting data, so the globals must be identical.
    pub(crate) fn merge(self, other: Self) -> Option<Self> {
        // Destructure `other` to ensure we handle everything.
        let Self {
            tx_version,
            version_group_id,
            consensus_branch_id,
            lock_time,
            expiry_height,
            coin_type,
        } = other;

        if self.tx_version != tx_version
            || self.version_group_id != version_group_id
            || self.consensus_branch_id != consensus_branch_id
            || self.lock_time != lock_time
            || self.expiry_height != expiry_height
            || self.coin_type != coin_type
        {
            return None;
        }

        Some(self)
    }

    /// Checks that this is a v5 transaction for a known consensus branch.
    pub(crate) fn check_version(&self) -> Result<BranchId, GlobalError> {
        match (self.tx_version, self.version_group_id) {
            (V5_TX_VERSION, V5_VERSION_GROUP_ID) => Ok(()),
            (version, version_group_id) => Err(GlobalError::UnsupportedTxVersion {
                version,
                version_group_id,
            }),
        }?;

        BranchId::try_from(self.consensus_branch_id)
            .map_err(|_| GlobalError::UnknownConsensusBranchId(self.consensus_branch_id))
    }
}

/// Errors in the global fields of a staged transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalError {
    UnknownConsensusBranchId(u32),
    UnsupportedTxVersion { version: u32, version_group_id: u32 },
}

impl fmt::Display for GlobalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GlobalError::UnknownConsensusBranchId(id) => {
                write!(f, "unknown consensus branch ID {:#010x}", id)
            }
            GlobalError::UnsupportedTxVersion {
                version,
                version_group_id,
            } => write!(
                f,
                "unsupported transaction version {} (version group ID {:#010x})",
                version, version_group_id
            ),
        }
    }
}

impl std::error::Error for GlobalError {}
