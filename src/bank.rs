//! The staking pool.
//!
//! [`DecentralBank`] custodies every deposited stake-asset unit and the
//! reward-asset reserve under its own [`address`](DecentralBank::address).
//! Participants stake after approving the bank on the stake ledger, the owner
//! triggers distribution passes, and participants unstake their whole
//! principal at once.
//!
//! Each operation either completes or returns an error with the bank left
//! exactly as it was. Exclusive access across threads is the job of
//! [`crate::service::StakingService`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    error::BankError,
    ledger::{Address, TokenLedger, TokenMeta},
    position::StakePosition,
    registry::StakerRegistry,
    rewards::{DistributionPolicy, RewardEngine, RewardPayment, RewardPolicy},
    units::Amount,
};

pub const DEFAULT_BANK_NAME: &str = "Decentral Bank";

/// Which of the two ledgers an operation targets.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Asset {
    /// The token participants deposit.
    Stake,
    /// The token the bank pays out as yield.
    Reward,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BankParams {
    pub name: String,
    pub reward: RewardPolicy,
    pub distribution: DistributionPolicy,
    pub stake_token: TokenMeta,
    pub reward_token: TokenMeta,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BankEvent {
    Staked {
        staker: Address,
        #[serde(with = "crate::units::serde_amount")]
        amount: Amount,
        first: bool,
    },
    Unstaked {
        staker: Address,
        #[serde(with = "crate::units::serde_amount")]
        amount: Amount,
    },
    RewardPaid {
        recipient: Address,
        #[serde(with = "crate::units::serde_amount")]
        amount: Amount,
    },
    RewardSkipped {
        recipient: Address,
        #[serde(with = "crate::units::serde_amount")]
        amount: Amount,
        #[serde(with = "crate::units::serde_amount")]
        reserve: Amount,
    },
    TokenTransfer {
        asset: Asset,
        from: Address,
        to: Address,
        #[serde(with = "crate::units::serde_amount")]
        amount: Amount,
    },
    TokenApproval {
        asset: Asset,
        owner: Address,
        spender: Address,
        #[serde(with = "crate::units::serde_amount")]
        amount: Amount,
    },
}

/// Outcome of one distribution pass.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DistributionReport {
    pub paid: Vec<RewardPayment>,
    pub skipped: Vec<RewardPayment>,
}

impl DistributionReport {
    pub fn total_paid(&self) -> Amount {
        self.paid.iter().map(|p| p.amount).sum()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BankInfo {
    pub name: String,
    pub address: Address,
    pub owner: Address,
    pub stakers_count: usize,
    pub stake_token: TokenMeta,
    pub reward_token: TokenMeta,
    #[serde(with = "crate::units::serde_amount")]
    pub stake_balance: Amount,
    #[serde(with = "crate::units::serde_amount")]
    pub reward_balance: Amount,
    pub height: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecentralBank {
    name: String,
    address: Address,
    owner: Address,
    reward: RewardPolicy,
    distribution: DistributionPolicy,
    stake_token: TokenLedger,
    reward_token: TokenLedger,
    positions: BTreeMap<Address, StakePosition>,
    registry: StakerRegistry,
    /// Signed calls executed per address; the next call must carry this value.
    #[serde(default)]
    nonces: BTreeMap<Address, u64>,
    events: Vec<BankEvent>,
    height: u64,
}

impl DecentralBank {
    /// Mints both token supplies to `owner` and opens an empty pool at
    /// `address`. The reward reserve starts empty; the owner funds it with a
    /// plain reward-asset transfer to the bank.
    pub fn deploy(params: BankParams, owner: Address, address: Address) -> Self {
        let stake_token = TokenLedger::genesis(params.stake_token, &owner);
        let reward_token = TokenLedger::genesis(params.reward_token, &owner);
        info!(%owner, %address, name = %params.name, "bank deployed");
        Self {
            name: params.name,
            address,
            owner,
            reward: params.reward,
            distribution: params.distribution,
            stake_token,
            reward_token,
            positions: BTreeMap::new(),
            registry: StakerRegistry::new(),
            nonces: BTreeMap::new(),
            events: Vec::new(),
            height: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn owner(&self) -> &Address {
        &self.owner
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn reward_policy(&self) -> RewardPolicy {
        self.reward
    }

    pub fn distribution_policy(&self) -> DistributionPolicy {
        self.distribution
    }

    pub fn set_distribution_policy(&mut self, policy: DistributionPolicy) {
        self.distribution = policy;
    }

    pub fn events(&self) -> &[BankEvent] {
        &self.events
    }

    pub fn token(&self, asset: Asset) -> &TokenLedger {
        match asset {
            Asset::Stake => &self.stake_token,
            Asset::Reward => &self.reward_token,
        }
    }

    fn token_mut(&mut self, asset: Asset) -> &mut TokenLedger {
        match asset {
            Asset::Stake => &mut self.stake_token,
            Asset::Reward => &mut self.reward_token,
        }
    }

    pub fn positions(&self) -> &BTreeMap<Address, StakePosition> {
        &self.positions
    }

    pub fn registry(&self) -> &StakerRegistry {
        &self.registry
    }

    // ---- read accessors ----

    pub fn staking_balance_of(&self, address: &str) -> Amount {
        self.positions.get(address).map(|p| p.staked).unwrap_or(0)
    }

    pub fn is_staking(&self, address: &str) -> bool {
        self.positions
            .get(address)
            .map(StakePosition::is_staking)
            .unwrap_or(false)
    }

    pub fn has_staked(&self, address: &str) -> bool {
        self.positions
            .get(address)
            .map(|p| p.has_staked)
            .unwrap_or(false)
    }

    pub fn stakers(&self) -> &[Address] {
        self.registry.as_slice()
    }

    pub fn stakers_count(&self) -> usize {
        self.registry.len()
    }

    pub fn balance_of(&self, asset: Asset, address: &str) -> Amount {
        self.token(asset).balance_of(address)
    }

    pub fn allowance(&self, asset: Asset, owner: &str, spender: &str) -> Amount {
        self.token(asset).allowance(owner, spender)
    }

    /// Reward-asset units the bank can still pay out.
    /// Nonce the next signed call from `address` must carry.
    pub fn next_nonce(&self, address: &str) -> u64 {
        self.nonces.get(address).copied().unwrap_or(0)
    }

    pub fn nonces(&self) -> &BTreeMap<Address, u64> {
        &self.nonces
    }

    /// Marks the signed call carrying `next_nonce(address)` as executed.
    pub(crate) fn consume_nonce(&mut self, address: &str) {
        *self.nonces.entry(address.to_string()).or_default() += 1;
    }

    pub fn reward_reserve(&self) -> Amount {
        self.reward_token.balance_of(&self.address)
    }

    pub fn info(&self) -> BankInfo {
        BankInfo {
            name: self.name.clone(),
            address: self.address.clone(),
            owner: self.owner.clone(),
            stakers_count: self.registry.len(),
            stake_token: self.stake_token.meta.clone(),
            reward_token: self.reward_token.meta.clone(),
            stake_balance: self.stake_token.balance_of(&self.address),
            reward_balance: self.reward_reserve(),
            height: self.height,
        }
    }

    // ---- token pass-through ----

    pub fn transfer(
        &mut self,
        caller: &str,
        asset: Asset,
        to: &str,
        amount: Amount,
    ) -> Result<(), BankError> {
        let (from, to) = (caller.to_string(), to.to_string());
        self.token_mut(asset).transfer(&from, &to, amount)?;
        debug!(?asset, %from, %to, %amount, "token transfer");
        self.commit(BankEvent::TokenTransfer {
            asset,
            from,
            to,
            amount,
        });
        Ok(())
    }

    pub fn approve(&mut self, caller: &str, asset: Asset, spender: &str, amount: Amount) {
        let (owner, spender) = (caller.to_string(), spender.to_string());
        self.token_mut(asset).approve(&owner, &spender, amount);
        debug!(?asset, %owner, %spender, %amount, "token approval");
        self.commit(BankEvent::TokenApproval {
            asset,
            owner,
            spender,
            amount,
        });
    }

    // ---- staking ----

    /// Pulls `amount` stake-asset units from `caller` into the pool. The
    /// caller must have approved the bank for at least `amount` beforehand.
    pub fn stake(&mut self, caller: &str, amount: Amount) -> Result<(), BankError> {
        if amount == 0 {
            return Err(BankError::InvalidAmount);
        }
        let staker = caller.to_string();
        let bank = self.address.clone();
        self.stake_token
            .transfer_from(&bank, &staker, &bank, amount)
            .inspect_err(|err| warn!(%staker, %amount, %err, "stake rejected"))?;

        let first = self.positions.entry(staker.clone()).or_default().deposit(amount);
        if first {
            self.registry.register(&staker);
        }
        info!(
            %staker,
            %amount,
            first,
            balance = %self.staking_balance_of(&staker),
            "staked"
        );
        self.commit(BankEvent::Staked {
            staker,
            amount,
            first,
        });
        Ok(())
    }

    /// Returns the caller's whole principal and closes the position.
    pub fn unstake(&mut self, caller: &str) -> Result<Amount, BankError> {
        let principal = match self.positions.get(caller) {
            Some(position) if position.is_staking() => position.staked,
            _ => return Err(BankError::NotStaking),
        };
        let staker = caller.to_string();
        let bank = self.address.clone();
        self.stake_token.transfer(&bank, &staker, principal)?;
        let position = self
            .positions
            .get_mut(caller)
            .ok_or(BankError::NotStaking)?;
        position.withdraw()?;
        info!(%staker, %principal, "unstaked");
        self.commit(BankEvent::Unstaked {
            staker,
            amount: principal,
        });
        Ok(principal)
    }

    /// One distribution pass: every currently staking registry entry receives
    /// `staked / divisor` reward-asset units. Owner only.
    pub fn issue_rewards(&mut self, caller: &str) -> Result<DistributionReport, BankError> {
        if caller != self.owner {
            warn!(%caller, "issue_rewards rejected: caller is not the owner");
            return Err(BankError::Unauthorized {
                caller: caller.to_string(),
            });
        }

        let plan = RewardEngine::new(&self.reward, &self.registry, &self.positions).plan();
        let reserve = self.reward_reserve();
        let required = plan.total_amount();
        if self.distribution == DistributionPolicy::AllOrNothing && required > reserve {
            warn!(%reserve, %required, "distribution aborted");
            return Err(BankError::ReserveDepleted { reserve, required });
        }

        // Payments land on a staged copy so a failure leaves the reserve intact.
        let bank = self.address.clone();
        let mut staged = self.reward_token.clone();
        let mut report = DistributionReport::default();
        let mut events = Vec::with_capacity(plan.payments.len());
        for payment in plan.payments {
            match staged.transfer(&bank, &payment.recipient, payment.amount) {
                Ok(()) => {
                    debug!(recipient = %payment.recipient, amount = %payment.amount, "reward paid");
                    events.push(BankEvent::RewardPaid {
                        recipient: payment.recipient.clone(),
                        amount: payment.amount,
                    });
                    report.paid.push(payment);
                }
                Err(_) if self.distribution == DistributionPolicy::BestEffort => {
                    let reserve = staged.balance_of(&bank);
                    warn!(recipient = %payment.recipient, amount = %payment.amount, %reserve, "reward skipped");
                    events.push(BankEvent::RewardSkipped {
                        recipient: payment.recipient.clone(),
                        amount: payment.amount,
                        reserve,
                    });
                    report.skipped.push(payment);
                }
                Err(_) => {
                    return Err(BankError::ReserveDepleted {
                        reserve: staged.balance_of(&bank),
                        required: payment.amount,
                    });
                }
            }
        }

        self.reward_token = staged;
        info!(
            paid = report.paid.len(),
            skipped = report.skipped.len(),
            total = %report.total_paid(),
            "rewards issued"
        );
        self.events.extend(events);
        self.height += 1;
        Ok(report)
    }

    fn commit(&mut self, event: BankEvent) {
        self.events.push(event);
        self.height += 1;
    }

    /// Cross-checks the pieces of state that must agree with each other.
    /// Used when loading a persisted bank.
    pub fn check_consistency(&self) -> Result<(), String> {
        for (asset, ledger) in [(Asset::Stake, &self.stake_token), (Asset::Reward, &self.reward_token)] {
            if ledger.circulating() != ledger.meta.total_supply {
                return Err(format!(
                    "{asset:?} ledger balances sum to {}, supply is {}",
                    ledger.circulating(),
                    ledger.meta.total_supply
                ));
            }
        }
        let mut locked: Amount = 0;
        for (address, position) in &self.positions {
            if position.has_staked != self.registry.contains(address) {
                return Err(format!("position {address} disagrees with staker registry"));
            }
            if !position.is_staking() && position.staked != 0 {
                return Err(format!("closed position {address} still holds stake"));
            }
            locked += position.staked;
        }
        for address in self.registry.iter() {
            if !self.has_staked(address) {
                return Err(format!("registry entry {address} never staked"));
            }
        }
        let custody = self.stake_token.balance_of(&self.address);
        if custody < locked {
            return Err(format!(
                "bank holds {custody} stake units but positions lock {locked}"
            ));
        }
        Ok(())
    }
}
