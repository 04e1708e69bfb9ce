//! Bank configuration, read from TOML. An empty file (or no file) describes
//! the reference deployment; a token table must at least name its token.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    auth,
    bank::{Asset, BankParams, DecentralBank, DEFAULT_BANK_NAME},
    error::BankError,
    ledger::{Address, TokenMeta},
    rewards::{DistributionPolicy, RewardPolicy, DEFAULT_REWARD_DIVISOR},
    units::{self, Amount, DECIMALS, MAX_DECIMALS},
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("reward_divisor must be greater than zero")]
    ZeroDivisor,
    #[error("token {symbol}: {source}")]
    Supply {
        symbol: String,
        source: units::UnitsError,
    },
    #[error("token {symbol}: decimals must be at most {max}")]
    Decimals { symbol: String, max: u8 },
    #[error("cannot fund reward reserve: {0}")]
    Funding(#[from] BankError),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenConfig {
    pub name: String,
    pub symbol: String,
    #[serde(default = "default_decimals")]
    pub decimals: u8,
    /// Tokens minted to the owner at deployment.
    #[serde(default = "default_supply")]
    pub supply: String,
}

fn default_decimals() -> u8 {
    DECIMALS
}

fn default_supply() -> String {
    "1000000".into()
}

impl TokenConfig {
    fn stake_default() -> Self {
        Self {
            name: "Tether".into(),
            symbol: "mUSDT".into(),
            decimals: default_decimals(),
            supply: default_supply(),
        }
    }

    fn reward_default() -> Self {
        Self {
            name: "Reward Token".into(),
            symbol: "RWD".into(),
            decimals: default_decimals(),
            supply: default_supply(),
        }
    }

    pub fn meta(&self) -> Result<TokenMeta, ConfigError> {
        if self.decimals > MAX_DECIMALS {
            return Err(ConfigError::Decimals {
                symbol: self.symbol.clone(),
                max: MAX_DECIMALS,
            });
        }
        let total_supply: Amount =
            units::parse_units(&self.supply, self.decimals).map_err(|source| {
                ConfigError::Supply {
                    symbol: self.symbol.clone(),
                    source,
                }
            })?;
        Ok(TokenMeta {
            name: self.name.clone(),
            symbol: self.symbol.clone(),
            decimals: self.decimals,
            total_supply,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BankConfig {
    pub name: String,
    /// Each distribution pass pays `staked / reward_divisor`.
    pub reward_divisor: u64,
    pub distribution: DistributionPolicy,
    pub stake_token: TokenConfig,
    pub reward_token: TokenConfig,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_BANK_NAME.into(),
            reward_divisor: DEFAULT_REWARD_DIVISOR as u64,
            distribution: DistributionPolicy::AllOrNothing,
            stake_token: TokenConfig::stake_default(),
            reward_token: TokenConfig::reward_default(),
        }
    }
}

impl BankConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Loads `path` when given, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Validates the config and turns it into deployment parameters.
    pub fn params(&self) -> Result<BankParams, ConfigError> {
        if self.reward_divisor == 0 {
            return Err(ConfigError::ZeroDivisor);
        }
        Ok(BankParams {
            name: self.name.clone(),
            reward: RewardPolicy {
                divisor: self.reward_divisor as Amount,
            },
            distribution: self.distribution,
            stake_token: self.stake_token.meta()?,
            reward_token: self.reward_token.meta()?,
        })
    }

    /// Deploys a bank owned by `owner` at its derived address and moves
    /// `reserve` reward units into it (the whole reward supply when `None`).
    pub fn deploy(&self, owner: Address, reserve: Option<Amount>) -> Result<DecentralBank, ConfigError> {
        let params = self.params()?;
        let address = auth::contract_address(&owner, &params.name);
        let mut bank = DecentralBank::deploy(params, owner, address);
        let reserve = reserve.unwrap_or(bank.token(Asset::Reward).meta.total_supply);
        if reserve > 0 {
            let (owner, address) = (bank.owner().clone(), bank.address().clone());
            bank.transfer(&owner, Asset::Reward, &address, reserve)?;
        }
        Ok(bank)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::tokens;

    #[test]
    fn empty_config_is_reference_deployment() {
        let config = BankConfig::from_toml("").unwrap();
        assert_eq!(config, BankConfig::default());
        let params = config.params().unwrap();
        assert_eq!(params.name, "Decentral Bank");
        assert_eq!(params.reward.divisor, 9);
        assert_eq!(params.distribution, DistributionPolicy::AllOrNothing);
        assert_eq!(params.stake_token.symbol, "mUSDT");
        assert_eq!(params.reward_token.name, "Reward Token");
        assert_eq!(params.reward_token.total_supply, tokens(1_000_000));
    }

    #[test]
    fn partial_config_overrides_fields() {
        let config = BankConfig::from_toml(
            r#"
            reward_divisor = 20
            distribution = "best_effort"

            [reward_token]
            name = "Yield"
            symbol = "YLD"
            supply = "5000.5"
            "#,
        )
        .unwrap();
        let params = config.params().unwrap();
        assert_eq!(params.reward.divisor, 20);
        assert_eq!(params.distribution, DistributionPolicy::BestEffort);
        assert_eq!(params.reward_token.symbol, "YLD");
        assert_eq!(params.reward_token.decimals, 18);
        assert_eq!(params.reward_token.total_supply, tokens(5_000) + tokens(1) / 2);
        assert_eq!(params.stake_token.symbol, "mUSDT");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let zero = BankConfig {
            reward_divisor: 0,
            ..BankConfig::default()
        };
        assert!(matches!(zero.params(), Err(ConfigError::ZeroDivisor)));

        let mut wide = BankConfig::default();
        wide.stake_token.decimals = 39;
        assert!(matches!(wide.params(), Err(ConfigError::Decimals { .. })));

        let mut bad_supply = BankConfig::default();
        bad_supply.reward_token.supply = "lots".into();
        assert!(matches!(bad_supply.params(), Err(ConfigError::Supply { .. })));

        assert!(matches!(
            BankConfig::from_toml("reward_divisor = \"nine\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn deploy_funds_the_reserve() {
        let config = BankConfig::default();
        let bank = config.deploy("0xowner".into(), None).unwrap();
        assert_eq!(bank.reward_reserve(), tokens(1_000_000));
        assert_eq!(bank.balance_of(Asset::Reward, "0xowner"), 0);
        assert_eq!(bank.balance_of(Asset::Stake, "0xowner"), tokens(1_000_000));
        assert_eq!(bank.address(), &auth::contract_address("0xowner", "Decentral Bank"));

        let partial = config.deploy("0xowner".into(), Some(tokens(10))).unwrap();
        assert_eq!(partial.reward_reserve(), tokens(10));

        assert!(matches!(
            config.deploy("0xowner".into(), Some(tokens(2_000_000))),
            Err(ConfigError::Funding(BankError::InsufficientBalance { .. }))
        ));
    }
}
