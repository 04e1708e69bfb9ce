use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    ledger::Address,
    position::StakePosition,
    registry::StakerRegistry,
    units::Amount,
};

/// Reward paid per distribution pass is `staked / divisor`, floored on
/// base units.
pub const DEFAULT_REWARD_DIVISOR: Amount = 9;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RewardPolicy {
    #[serde(with = "crate::units::serde_amount")]
    pub divisor: Amount,
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self {
            divisor: DEFAULT_REWARD_DIVISOR,
        }
    }
}

impl RewardPolicy {
    /// Callers validate `divisor != 0` at configuration time; a zero divisor
    /// pays nothing rather than panicking.
    pub fn reward_for(&self, staked: Amount) -> Amount {
        staked.checked_div(self.divisor).unwrap_or(0)
    }
}

/// What happens when the reserve cannot cover every payment of a pass.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistributionPolicy {
    /// The pass fails and nobody is paid.
    #[default]
    AllOrNothing,
    /// Payments are made in registry order; ones the remaining reserve cannot
    /// cover are skipped and reported.
    BestEffort,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RewardPayment {
    pub recipient: Address,
    #[serde(with = "crate::units::serde_amount")]
    pub staked: Amount,
    #[serde(with = "crate::units::serde_amount")]
    pub amount: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RewardPlan {
    pub payments: Vec<RewardPayment>,
}

impl RewardPlan {
    pub fn total_amount(&self) -> Amount {
        self.payments.iter().map(|p| p.amount).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.payments.is_empty()
    }
}

pub struct RewardEngine<'a> {
    policy: &'a RewardPolicy,
    registry: &'a StakerRegistry,
    positions: &'a BTreeMap<Address, StakePosition>,
}

impl<'a> RewardEngine<'a> {
    pub fn new(
        policy: &'a RewardPolicy,
        registry: &'a StakerRegistry,
        positions: &'a BTreeMap<Address, StakePosition>,
    ) -> Self {
        Self {
            policy,
            registry,
            positions,
        }
    }

    /// One payment per currently staking registry entry with a non-zero
    /// reward, in registry order.
    pub fn plan(&self) -> RewardPlan {
        let mut payments = Vec::new();
        for address in self.registry.iter() {
            let Some(position) = self.positions.get(address) else {
                continue;
            };
            if !position.is_staking() {
                continue;
            }
            let amount = self.policy.reward_for(position.staked);
            if amount == 0 {
                continue;
            }
            payments.push(RewardPayment {
                recipient: address.clone(),
                staked: position.staked,
                amount,
            });
        }
        RewardPlan { payments }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::tokens;

    fn staked(amount: Amount) -> StakePosition {
        let mut pos = StakePosition::default();
        pos.deposit(amount);
        pos
    }

    #[test]
    fn reward_is_floor_of_stake_over_divisor() {
        let policy = RewardPolicy::default();
        assert_eq!(policy.reward_for(tokens(100)), 11_111_111_111_111_111_111);
        assert_eq!(policy.reward_for(90), 10);
        assert_eq!(policy.reward_for(8), 0);
        assert_eq!(RewardPolicy { divisor: 0 }.reward_for(100), 0);
    }

    #[test]
    fn plan_walks_registry_order_and_skips_idle_entries() {
        let mut registry = StakerRegistry::new();
        let mut positions = BTreeMap::new();
        for name in ["zed", "amy", "dust", "gone"] {
            registry.register(&name.to_string());
        }
        positions.insert("zed".to_string(), staked(900));
        positions.insert("amy".to_string(), staked(18));
        positions.insert("dust".to_string(), staked(8));
        let mut gone = staked(1_000);
        gone.withdraw().unwrap();
        positions.insert("gone".to_string(), gone);

        let policy = RewardPolicy::default();
        let plan = RewardEngine::new(&policy, &registry, &positions).plan();
        let recipients: Vec<_> = plan.payments.iter().map(|p| p.recipient.as_str()).collect();
        assert_eq!(recipients, ["zed", "amy"]);
        assert_eq!(plan.payments[0].amount, 100);
        assert_eq!(plan.payments[1].amount, 2);
        assert_eq!(plan.total_amount(), 102);
    }
}
