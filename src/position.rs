//! Per-participant staking state.
//!
//! A position moves `NotStaking -> Staking` on every deposit (top-ups are
//! additive) and back to `NotStaking` on withdrawal. `has_staked` is a
//! separate flag that is set on the first deposit and never cleared.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{error::BankError, units::Amount};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StakeStatus {
    #[default]
    NotStaking,
    Staking,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StakePosition {
    #[serde(with = "crate::units::serde_amount")]
    pub staked: Amount,
    pub status: StakeStatus,
    pub has_staked: bool,
}

impl StakePosition {
    pub fn is_staking(&self) -> bool {
        self.status == StakeStatus::Staking
    }

    /// Adds `amount` to the position. Returns `true` on the first deposit
    /// this position has ever seen.
    pub fn deposit(&mut self, amount: Amount) -> bool {
        let first = !self.has_staked;
        self.staked += amount;
        self.status = StakeStatus::Staking;
        self.has_staked = true;
        debug!(staked = %self.staked, first, "position deposit");
        first
    }

    /// Closes the position and returns the principal to hand back.
    pub fn withdraw(&mut self) -> Result<Amount, BankError> {
        if !self.is_staking() {
            return Err(BankError::NotStaking);
        }
        let principal = self.staked;
        self.staked = 0;
        self.status = StakeStatus::NotStaking;
        debug!(%principal, "position withdraw");
        Ok(principal)
    }
}
