use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::units::{self, Amount};

pub type Address = String;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("insufficient {symbol} balance in account {account}: has {available}, needs {required}")]
    InsufficientBalance {
        symbol: String,
        account: Address,
        available: Amount,
        required: Amount,
    },
    #[error("insufficient {symbol} allowance from {owner} to {spender}: approved {approved}, needs {required}")]
    InsufficientAllowance {
        symbol: String,
        owner: Address,
        spender: Address,
        approved: Amount,
        required: Amount,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenMeta {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    #[serde(with = "crate::units::serde_amount")]
    pub total_supply: Amount,
}

impl TokenMeta {
    pub fn format(&self, amount: Amount) -> String {
        format!("{} {}", units::format_units(amount, self.decimals), self.symbol)
    }
}

/// Allowances granted by one owner, keyed by spender.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct Allowances(#[serde(with = "crate::units::serde_amount_map")] BTreeMap<Address, Amount>);

/// A fixed-supply fungible token: balances plus approve/transfer_from
/// allowances. Every failing operation leaves the ledger untouched.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenLedger {
    pub meta: TokenMeta,
    #[serde(with = "crate::units::serde_amount_map")]
    balances: BTreeMap<Address, Amount>,
    allowances: BTreeMap<Address, Allowances>,
}

impl TokenLedger {
    /// Mints the whole supply to `minter`. Supply never changes afterwards.
    pub fn genesis(meta: TokenMeta, minter: &Address) -> Self {
        let mut balances = BTreeMap::new();
        if meta.total_supply > 0 {
            balances.insert(minter.clone(), meta.total_supply);
        }
        Self {
            meta,
            balances,
            allowances: BTreeMap::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.meta.symbol
    }

    pub fn balance_of(&self, account: &str) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn allowance(&self, owner: &str, spender: &str) -> Amount {
        self.allowances
            .get(owner)
            .and_then(|book| book.0.get(spender))
            .copied()
            .unwrap_or(0)
    }

    /// Sum of all balances. Equals `meta.total_supply` at all times.
    pub fn circulating(&self) -> Amount {
        self.balances.values().sum()
    }

    pub fn balances(&self) -> impl Iterator<Item = (&Address, Amount)> {
        self.balances.iter().map(|(k, v)| (k, *v))
    }

    /// Every non-zero allowance as `(owner, spender, amount)`.
    pub fn allowances(&self) -> impl Iterator<Item = (&Address, &Address, Amount)> {
        self.allowances.iter().flat_map(|(owner, book)| {
            book.0
                .iter()
                .map(move |(spender, amount)| (owner, spender, *amount))
        })
    }

    pub fn transfer(&mut self, from: &Address, to: &Address, amount: Amount) -> Result<(), TokenError> {
        self.ensure_balance(from, amount)?;
        self.move_units(from, to, amount);
        Ok(())
    }

    /// Overwrites the allowance `owner` grants to `spender`.
    pub fn approve(&mut self, owner: &Address, spender: &Address, amount: Amount) {
        let book = self.allowances.entry(owner.clone()).or_default();
        if amount == 0 {
            book.0.remove(spender);
        } else {
            book.0.insert(spender.clone(), amount);
        }
        if book.0.is_empty() {
            self.allowances.remove(owner);
        }
    }

    /// Moves `amount` from `from` to `to` on behalf of `spender`, consuming
    /// allowance. Balance is checked before allowance.
    pub fn transfer_from(
        &mut self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), TokenError> {
        self.ensure_balance(from, amount)?;
        let approved = self.allowance(from, spender);
        if approved < amount {
            return Err(TokenError::InsufficientAllowance {
                symbol: self.meta.symbol.clone(),
                owner: from.clone(),
                spender: spender.clone(),
                approved,
                required: amount,
            });
        }
        self.approve(from, spender, approved - amount);
        self.move_units(from, to, amount);
        Ok(())
    }

    fn ensure_balance(&self, account: &Address, amount: Amount) -> Result<(), TokenError> {
        let available = self.balance_of(account);
        if available < amount {
            return Err(TokenError::InsufficientBalance {
                symbol: self.meta.symbol.clone(),
                account: account.clone(),
                available,
                required: amount,
            });
        }
        Ok(())
    }

    fn move_units(&mut self, from: &Address, to: &Address, amount: Amount) {
        if amount == 0 || from == to {
            return;
        }
        let remaining = self.balance_of(from) - amount;
        if remaining == 0 {
            self.balances.remove(from);
        } else {
            self.balances.insert(from.clone(), remaining);
        }
        *self.balances.entry(to.clone()).or_insert(0) += amount;
    }
}
