//! Thread-safe front of the bank.
//!
//! One mutex guards the bank (ledgers, positions, registry, account nonces).
//! Every operation holds it from start to finish, so operations are
//! serialized exactly like transactions on a single-threaded chain.

use std::path::Path;

use parking_lot::Mutex;
use tracing::{info_span, warn};

use crate::{
    auth::{AuthError, SignedCall},
    bank::{Asset, BankInfo, DecentralBank, DistributionReport},
    error::BankError,
    ledger::Address,
    snapshot::{save_state, state_root, BankSnapshot, StateError},
    units::Amount,
};

#[derive(Debug)]
pub struct StakingService {
    bank: Mutex<DecentralBank>,
}

impl StakingService {
    pub fn new(bank: DecentralBank) -> Self {
        Self {
            bank: Mutex::new(bank),
        }
    }

    pub fn stake(&self, caller: &str, amount: Amount) -> Result<(), BankError> {
        let _span = info_span!("stake", %caller, %amount).entered();
        self.bank.lock().stake(caller, amount)
    }

    pub fn unstake(&self, caller: &str) -> Result<Amount, BankError> {
        let _span = info_span!("unstake", %caller).entered();
        self.bank.lock().unstake(caller)
    }

    pub fn issue_rewards(&self, caller: &str) -> Result<DistributionReport, BankError> {
        let _span = info_span!("issue_rewards", %caller).entered();
        self.bank.lock().issue_rewards(caller)
    }

    pub fn transfer(&self, caller: &str, asset: Asset, to: &str, amount: Amount) -> Result<(), BankError> {
        let _span = info_span!("transfer", %caller, ?asset, %to, %amount).entered();
        self.bank.lock().transfer(caller, asset, to, amount)
    }

    pub fn approve(&self, caller: &str, asset: Asset, spender: &str, amount: Amount) {
        let _span = info_span!("approve", %caller, ?asset, %spender, %amount).entered();
        self.bank.lock().approve(caller, asset, spender, amount)
    }

    /// Verifies `call`, checks that it carries the caller's next nonce, then
    /// runs `op` as the authenticated caller. The nonce check and the
    /// operation happen under one lock acquisition. Only a successful
    /// operation consumes the nonce, so a failed call may be resubmitted.
    pub fn execute_signed<T, R, E>(
        &self,
        call: &SignedCall<T>,
        op: impl FnOnce(&mut DecentralBank, &Address, &T) -> Result<R, E>,
    ) -> Result<R, E>
    where
        T: serde::Serialize,
        E: From<AuthError>,
    {
        let caller = call.verify()?;
        let mut bank = self.bank.lock();
        let expected = bank.next_nonce(&caller);
        if call.nonce < expected {
            warn!(%caller, nonce = call.nonce, expected, "replayed call rejected");
            return Err(AuthError::Replay.into());
        }
        if call.nonce > expected {
            warn!(%caller, nonce = call.nonce, expected, "call nonce ahead");
            return Err(AuthError::NonceGap {
                expected,
                got: call.nonce,
            }
            .into());
        }
        let result = op(&mut *bank, &caller, &call.call)?;
        bank.consume_nonce(&caller);
        Ok(result)
    }

    /// Runs `f` against the bank while holding the lock.
    pub fn with_bank<R>(&self, f: impl FnOnce(&DecentralBank) -> R) -> R {
        f(&*self.bank.lock())
    }

    pub fn info(&self) -> BankInfo {
        self.with_bank(DecentralBank::info)
    }

    pub fn snapshot(&self) -> BankSnapshot {
        self.with_bank(BankSnapshot::capture)
    }

    pub fn state_root(&self) -> [u8; 32] {
        self.with_bank(state_root)
    }

    /// Writes the current bank to `path`. The lock is held for the write, so
    /// concurrent persists land in execution order.
    pub fn persist(&self, path: &Path) -> Result<(), StateError> {
        self.with_bank(|bank| save_state(path, bank))
    }
}
