//! Reward-bearing staking ledger.
//!
//! Participants deposit a stake asset into a pool after approving it on the
//! stake-asset ledger. The pool owner periodically runs a distribution pass
//! that pays every active staker `staked / divisor` units of a reward asset.
//! Participants withdraw their whole principal at once.
//!
//! * [`ledger`] fixed-supply token ledgers with approve/transfer_from.
//! * [`position`] and [`registry`] per-participant state and the staker list.
//! * [`rewards`] reward policy and distribution planning.
//! * [`bank`] the pool itself; [`service`] serializes access to it.
//! * [`auth`], [`rpc`], [`server`], [`client`], [`snapshot`], [`config`] and
//!   [`logging`] are the edges used by the binaries.

pub mod auth;
pub mod bank;
pub mod client;
pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod position;
pub mod registry;
pub mod rewards;
pub mod rpc;
pub mod server;
pub mod service;
pub mod snapshot;
pub mod units;

pub use bank::{Asset, DecentralBank};
pub use error::BankError;
pub use service::StakingService;
