//! The [ZIP 317] fee rule, as applied to staged transactions.
//!
//! Staged transactions spend only P2PKH inputs and have no Sapling component, so the
//! rule reduces to counting transparent bytes and shielded actions.
//!
//! [ZIP 317]: https//zips.z.cash/zip-0317
use core::cmp::max;

use zcash_protocol::value::{BalanceError, Zatoshis};

/// The standard [ZIP 317] marginal fee.
///
/// [ZIP 317]: https//zips.z.cash/zip-0317
pub const MARGINAL_FEE: Zatoshis = Zatoshis::const_from_u64(5_000);

/// The minimum number of logical actions that must be paid according to [ZIP 317].
///
/// [ZIP 317]: https//zips.z.cash/zip-0317
pub const GRACE_ACTIONS: usize = 2;

/// The standard size of a P2PKH input, in bytes, according to [ZIP 317].
///
/// [ZIP 317]: https//zips.z.cash/zip-0317
pub const P2PKH_STANDARD_INPUT_SIZE: usize = 150;

/// The standard size of a P2PKH output, in bytes, according to [ZIP 317].
///
/// [ZIP 317]: https//zips.z.cash/zip-0317
pub const P2PKH_STANDARD_OUTPUT_SIZE: usize = 34;

/// Change below this value is not worth an output; it is left to the fee instead.
pub const DUST_THRESHOLD: Zatoshis = Zatoshis::const_from_u64(5_000);

/// A fee rule implementing [ZIP 317] for P2PKH inputs, transparent outputs and shielded
/// actions.
///
/// [ZIP 317]: https//zips.z.cash/zip-0317
#[derive(Clone, Debug)]
pub struct FeeRule {
    marginal_fee: Zatoshis,
    grace_actions: usize,
    p2pkh_standard_input_size: usize,
    p2pkh_standard_output_size: usize,
}

impl FeeRule {
    /// Construct a new FeeRule using the standard [ZIP 317] constants.
    ///
    /// [ZIP 317]: https//zips.z.cash/zip-0317
    pub fn standard() -> Self {
        Self {
            marginal_fee: MARGINAL_FEE,
            grace_actions: GRACE_ACTIONS,
            p2pkh_standard_input_size: P2PKH_STANDARD_INPUT_SIZE,
            p2pkh_standard_output_size: P2PKH_STANDARD_OUTPUT_SIZE,
        }
    }

    /// Construct a new FeeRule instance with the specified parameter values.
    ///
    /// Returns `None` if either `p2pkh_standard_input_size` or `p2pkh_standard_output_size`
    /// are zero.
    pub fn non_standard(
        marginal_fee: Zatoshis,
        grace_actions: usize,
        p2pkh_standard_input_size: usize,
        p2pkh_standard_output_size: usize,
    ) -> Option<Self> {
        if p2pkh_standard_input_size == 0 || p2pkh_standard_output_size == 0 {
            None
        } else {
            Some(Self {
                marginal_fee,
                grace_actions,
                p2pkh_standard_input_size,
                p2pkh_standard_output_size,
            })
        }
    }

    /// Returns the ZIP 317 marginal fee.
    pub fn marginal_fee(&self) -> Zatoshis {
        self.marginal_fee
    }

    /// Returns the fee required for a transaction spending `transparent_input_count`
    /// P2PKH inputs, with transparent outputs of the given serialized sizes and
    /// `action_count` shielded actions.
    pub fn fee_required(
        &self,
        transparent_input_count: usize,
        transparent_output_sizes: impl IntoIterator<Item = usize>,
        action_count: usize,
    ) -> Result<Zatoshis, BalanceError> {
        let t_in_total_size = transparent_input_count * self.p2pkh_standard_input_size;
        let t_out_total_size: usize = transparent_output_sizes.into_iter().sum();

        let ceildiv = |num: usize, den: usize| num.div_ceil(den);

        let logical_actions = max(
            ceildiv(t_in_total_size, self.p2pkh_standard_input_size),
            ceildiv(t_out_total_size, self.p2pkh_standard_output_size),
        ) + action_count;

        (self.marginal_fee * max(self.grace_actions, logical_actions)).ok_or(BalanceError::Overflow)
    }
}
