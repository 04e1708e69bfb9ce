use std::{fs, io::Write, path::Path};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{
    bank::{Asset, DecentralBank},
    ledger::TokenLedger,
    rewards::DistributionPolicy,
};

pub const SNAPSHOT_VERSION: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("state file {path} is not valid json: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
    #[error("unsupported state version {0}")]
    Version(u8),
    #[error("state root mismatch: file says {stored}, state hashes to {computed}")]
    RootMismatch { stored: String, computed: String },
    #[error("inconsistent state: {0}")]
    Inconsistent(String),
}

/// On-disk form of a bank.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BankSnapshot {
    pub version: u8,
    #[serde(with = "crate::auth::serde_hex")]
    pub state_root: Vec<u8>,
    pub bank: DecentralBank,
}

impl BankSnapshot {
    pub fn capture(bank: &DecentralBank) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            state_root: state_root(bank).to_vec(),
            bank: bank.clone(),
        }
    }

    /// Checks version, root and internal consistency, then hands the bank out.
    pub fn into_bank(self) -> Result<DecentralBank, StateError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(StateError::Version(self.version));
        }
        let computed = state_root(&self.bank);
        if self.state_root != computed {
            return Err(StateError::RootMismatch {
                stored: hex::encode(&self.state_root),
                computed: hex::encode(computed),
            });
        }
        self.bank
            .check_consistency()
            .map_err(StateError::Inconsistent)?;
        Ok(self.bank)
    }
}

pub fn load_state(path: &Path) -> Result<DecentralBank, StateError> {
    let bytes = fs::read(path).map_err(|source| StateError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let snapshot: BankSnapshot =
        serde_json::from_slice(&bytes).map_err(|source| StateError::Json {
            path: path.display().to_string(),
            source,
        })?;
    let bank = snapshot.into_bank()?;
    debug!(path = %path.display(), height = bank.height(), "state loaded");
    Ok(bank)
}

/// Writes to a sibling temp file first and renames it over `path`.
pub fn save_state(path: &Path, bank: &DecentralBank) -> Result<(), StateError> {
    let io_err = |source| StateError::Io {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }
    let json = serde_json::to_vec_pretty(&BankSnapshot::capture(bank)).map_err(|source| {
        StateError::Json {
            path: path.display().to_string(),
            source,
        }
    })?;
    let tmp = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp).map_err(io_err)?;
    file.write_all(&json).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;
    debug!(path = %path.display(), height = bank.height(), "state saved");
    Ok(())
}

/// Loads the bank at `path`, applies `op` and writes the result back. Nothing
/// is written when `op` fails.
pub fn update_state<R, E>(
    path: &Path,
    op: impl FnOnce(&mut DecentralBank) -> Result<R, E>,
) -> Result<R, E>
where
    E: From<StateError>,
{
    let mut bank = load_state(path)?;
    let out = op(&mut bank)?;
    save_state(path, &bank)?;
    Ok(out)
}

/// Merkle root over token balances and allowances, staking positions,
/// registry order, account nonces and bank parameters. Events and height are
/// not part of the root.
pub fn state_root(bank: &DecentralBank) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();
    ledger_leaves(b"stake", bank.token(Asset::Stake), &mut leaves);
    ledger_leaves(b"reward", bank.token(Asset::Reward), &mut leaves);
    for (address, position) in bank.positions() {
        let mut hasher = Sha256::new();
        hasher.update(b"position");
        hasher.update(address.as_bytes());
        hasher.update(position.staked.to_le_bytes());
        hasher.update([position.is_staking() as u8, position.has_staked as u8]);
        leaves.push(hasher.finalize().into());
    }
    for (idx, address) in bank.stakers().iter().enumerate() {
        let mut hasher = Sha256::new();
        hasher.update(b"staker");
        hasher.update((idx as u64).to_le_bytes());
        hasher.update(address.as_bytes());
        leaves.push(hasher.finalize().into());
    }
    for (address, nonce) in bank.nonces() {
        let mut hasher = Sha256::new();
        hasher.update(b"nonce");
        hasher.update(address.as_bytes());
        hasher.update(nonce.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    let distribution: u8 = match bank.distribution_policy() {
        DistributionPolicy::AllOrNothing => 0,
        DistributionPolicy::BestEffort => 1,
    };
    let mut hasher = Sha256::new();
    hasher.update(b"owner");
    hasher.update(bank.owner().as_bytes());
    hasher.update(bank.address().as_bytes());
    hasher.update(bank.reward_policy().divisor.to_le_bytes());
    hasher.update([distribution]);
    leaves.push(hasher.finalize().into());
    build_merkle(leaves)
}

fn ledger_leaves(tag: &[u8], ledger: &TokenLedger, leaves: &mut Vec<[u8; 32]>) {
    for (account, balance) in ledger.balances() {
        let mut hasher = Sha256::new();
        hasher.update(b"acct");
        hasher.update(tag);
        hasher.update(account.as_bytes());
        hasher.update(balance.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for (owner, spender, amount) in ledger.allowances() {
        let mut hasher = Sha256::new();
        hasher.update(b"allow");
        hasher.update(tag);
        hasher.update(owner.as_bytes());
        hasher.update([0u8]);
        hasher.update(spender.as_bytes());
        hasher.update(amount.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"dbank-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity(leaves.len().div_ceil(2));
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bank::tests::{funded_bank, BANK, CUSTOMER, OWNER},
        units::tokens,
    };

    fn active_bank() -> DecentralBank {
        let mut bank = funded_bank();
        bank.approve(CUSTOMER, Asset::Stake, BANK, tokens(60));
        bank.stake(CUSTOMER, tokens(60)).unwrap();
        bank.issue_rewards(OWNER).unwrap();
        bank
    }

    #[test]
    fn root_is_deterministic_and_tracks_balances() {
        let mut bank = active_bank();
        let root = state_root(&bank);
        assert_eq!(root, state_root(&bank.clone()));
        bank.unstake(CUSTOMER).unwrap();
        assert_ne!(root, state_root(&bank));
    }

    #[test]
    fn root_covers_allowances_policy_and_nonces() {
        let bank = active_bank();
        let root = state_root(&bank);

        let mut approved = bank.clone();
        approved.approve(CUSTOMER, Asset::Stake, BANK, tokens(5));
        assert_ne!(root, state_root(&approved));

        let mut lenient = bank.clone();
        lenient.set_distribution_policy(DistributionPolicy::BestEffort);
        assert_ne!(root, state_root(&lenient));

        let mut signed = bank.clone();
        signed.consume_nonce(CUSTOMER);
        assert_ne!(root, state_root(&signed));
    }

    #[test]
    fn edited_allowance_or_policy_fails_to_load() {
        let bank = active_bank();
        let mut json = serde_json::to_value(BankSnapshot::capture(&bank)).unwrap();
        json["bank"]["stake_token"]["allowances"][CUSTOMER][BANK] =
            serde_json::Value::String(tokens(1_000).to_string());
        let snapshot: BankSnapshot = serde_json::from_value(json).unwrap();
        assert!(matches!(
            snapshot.into_bank(),
            Err(StateError::RootMismatch { .. })
        ));

        let mut json = serde_json::to_value(BankSnapshot::capture(&bank)).unwrap();
        json["bank"]["distribution"] = serde_json::Value::String("best_effort".into());
        let snapshot: BankSnapshot = serde_json::from_value(json).unwrap();
        assert!(matches!(
            snapshot.into_bank(),
            Err(StateError::RootMismatch { .. })
        ));
    }

    #[test]
    fn save_then_load_preserves_bank() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let bank = active_bank();
        save_state(&path, &bank).unwrap();
        let loaded = load_state(&path).unwrap();
        assert_eq!(loaded, bank);
        assert_eq!(state_root(&loaded), state_root(&bank));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn tampered_state_is_rejected() {
        let bank = active_bank();
        let mut json = serde_json::to_value(BankSnapshot::capture(&bank)).unwrap();
        json["bank"]["positions"][CUSTOMER]["staked"] = serde_json::Value::String("1".into());
        let snapshot: BankSnapshot = serde_json::from_value(json).unwrap();
        assert!(matches!(
            snapshot.into_bank(),
            Err(StateError::RootMismatch { .. })
        ));

        let mut snapshot = BankSnapshot::capture(&bank);
        snapshot.version = 9;
        assert!(matches!(snapshot.into_bank(), Err(StateError::Version(9))));
    }

    #[derive(Debug)]
    enum OpError {
        State(StateError),
        Bank(crate::error::BankError),
    }

    impl From<StateError> for OpError {
        fn from(err: StateError) -> Self {
            OpError::State(err)
        }
    }

    #[test]
    fn update_state_saves_only_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        save_state(&path, &funded_bank()).unwrap();
        let original = fs::read(&path).unwrap();

        let failed = update_state(&path, |bank| {
            bank.approve(CUSTOMER, Asset::Stake, BANK, tokens(100));
            bank.unstake(CUSTOMER).map_err(OpError::Bank)
        });
        assert!(matches!(failed, Err(OpError::Bank(_))));
        assert_eq!(fs::read(&path).unwrap(), original);

        let staked = update_state(&path, |bank| {
            bank.approve(CUSTOMER, Asset::Stake, BANK, tokens(100));
            bank.stake(CUSTOMER, tokens(100)).map_err(OpError::Bank)
        });
        assert!(staked.is_ok());
        assert_eq!(load_state(&path).unwrap().staking_balance_of(CUSTOMER), tokens(100));

        let missing = update_state(&dir.path().join("absent.json"), |_| Ok::<_, OpError>(()));
        assert!(matches!(missing, Err(OpError::State(StateError::Io { .. }))));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_state(&dir.path().join("absent.json")),
            Err(StateError::Io { .. })
        ));
    }
}
