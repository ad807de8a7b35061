//! Wei/ETH conversions and the balance column of the status table.

use std::fmt;

use alloy_core::primitives::U256;

/// Number of BY tokens a participant holds once the token contract is deployed.
pub const BY_TOKEN_GRANT: u64 = 1000;

const WEI_PER_ETH: u128 = 1_000_000_000_000_000_000;
const WEI_PER_GWEI: u64 = 1_000_000_000;

/// Convert a wei amount to ETH.
///
/// Amounts that fit in 128 bits are split into whole ETH and a wei remainder
/// before converting, so realistic balances keep their precision. Larger dev
/// balances are approximated limb by limb.
pub fn wei_to_eth(wei: U256) -> f64 {
    let limbs = wei.as_limbs();

    if limbs[2] == 0 && limbs[3] == 0 {
        let wei = (u128::from(limbs[1]) << 64) | u128::from(limbs[0]);
        let whole = wei / WEI_PER_ETH;
        let remainder = wei % WEI_PER_ETH;
        return whole as f64 + remainder as f64 / WEI_PER_ETH as f64;
    }

    let wei = limbs
        .iter()
        .rev()
        .fold(0.0_f64, |acc, limb| acc * 18_446_744_073_709_551_616.0 + *limb as f64);
    wei / WEI_PER_ETH as f64
}

/// Convert an ETH amount to wei, rounded to gwei precision.
///
/// Negative and non-finite amounts convert to zero.
pub fn eth_to_wei(eth: f64) -> U256 {
    let gwei = (eth * 1e9).round();
    if !gwei.is_finite() || gwei <= 0.0 {
        return U256::ZERO;
    }
    U256::from(gwei as u128) * U256::from(WEI_PER_GWEI)
}

/// What the balance column shows for a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BalanceDisplay {
    /// A plain ETH balance.
    Eth(f64),
    /// A BY token holding, optionally with some ETH on top.
    Tokens { tokens: u64, eth: Option<f64> },
    /// The balance could not be determined.
    Unknown,
}

impl BalanceDisplay {
    pub fn from_wei(wei: U256) -> Self {
        Self::Eth(wei_to_eth(wei))
    }
}

impl fmt::Display for BalanceDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceDisplay::Eth(eth) => write!(f, "{:.4} ETH", eth),
            BalanceDisplay::Tokens { tokens, eth: None } => write!(f, "{} BY tokens", tokens),
            BalanceDisplay::Tokens {
                tokens,
                eth: Some(eth),
            } => write!(f, "{} BY tokens + {:.1} ETH", tokens, eth),
            BalanceDisplay::Unknown => write!(f, "N/A"),
        }
    }
}
