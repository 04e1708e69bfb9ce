//! Line-delimited JSON protocol spoken by `dbank-serve`.
//!
//! One request per line, one response per line. State-changing calls travel
//! inside a [`SignedCall`]; queries are unauthenticated.
//!
//! ```text
//! {"query":{"method":"staking_balance","address":"0x…"}}
//! {"call":{"call":{"method":"stake","amount":"100000000000000000000"},"nonce":1,"public_key":"…","signature":"…"}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    auth::{AuthError, SignedCall},
    bank::{Asset, DecentralBank},
    error::BankError,
    ledger::Address,
    service::StakingService,
    units::Amount,
};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Call {
    Stake {
        #[serde(with = "crate::units::serde_amount")]
        amount: Amount,
    },
    Unstake,
    IssueRewards,
    Transfer {
        asset: Asset,
        to: Address,
        #[serde(with = "crate::units::serde_amount")]
        amount: Amount,
    },
    Approve {
        asset: Asset,
        spender: Address,
        #[serde(with = "crate::units::serde_amount")]
        amount: Amount,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Query {
    StakingBalance { address: Address },
    IsStaking { address: Address },
    HasStaked { address: Address },
    BalanceOf { asset: Asset, address: Address },
    Allowance { asset: Asset, owner: Address, spender: Address },
    NextNonce { address: Address },
    BankInfo,
    Stakers,
    StateRoot,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Request {
    Call(SignedCall<Call>),
    Query(Query),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcError {
    pub kind: String,
    pub message: String,
}

impl From<BankError> for RpcError {
    fn from(err: BankError) -> Self {
        Self {
            kind: err.kind().into(),
            message: err.to_string(),
        }
    }
}

impl From<AuthError> for RpcError {
    fn from(err: AuthError) -> Self {
        Self {
            kind: err.kind().into(),
            message: err.to_string(),
        }
    }
}

impl RpcError {
    pub fn bad_request(message: impl ToString) -> Self {
        Self {
            kind: "bad_request".into(),
            message: message.to_string(),
        }
    }

    fn internal(message: impl ToString) -> Self {
        Self {
            kind: "internal".into(),
            message: message.to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn from_result(result: Result<Value, RpcError>) -> Self {
        match result {
            Ok(value) => Self {
                ok: true,
                result: Some(value),
                error: None,
            },
            Err(err) => Self {
                ok: false,
                result: None,
                error: Some(err),
            },
        }
    }
}

pub fn dispatch(service: &StakingService, request: &Request) -> Response {
    let result = match request {
        Request::Query(query) => service.with_bank(|bank| run_query(bank, query)),
        Request::Call(signed) => service.execute_signed(signed, run_call),
    };
    Response::from_result(result)
}

/// Parses and dispatches one protocol line. The flag reports whether bank
/// state changed.
pub fn dispatch_line(service: &StakingService, line: &str) -> (Response, bool) {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => {
            let response = dispatch(service, &request);
            let mutated = response.ok && matches!(request, Request::Call(_));
            (response, mutated)
        }
        Err(err) => {
            debug!(%err, "malformed request");
            (Response::from_result(Err(RpcError::bad_request(err))), false)
        }
    }
}

fn amount_value(amount: Amount) -> Value {
    Value::String(amount.to_string())
}

fn run_query(bank: &DecentralBank, query: &Query) -> Result<Value, RpcError> {
    let value = match query {
        Query::StakingBalance { address } => amount_value(bank.staking_balance_of(address)),
        Query::IsStaking { address } => Value::Bool(bank.is_staking(address)),
        Query::HasStaked { address } => Value::Bool(bank.has_staked(address)),
        Query::BalanceOf { asset, address } => amount_value(bank.balance_of(*asset, address)),
        Query::Allowance {
            asset,
            owner,
            spender,
        } => amount_value(bank.allowance(*asset, owner, spender)),
        Query::NextNonce { address } => json!(bank.next_nonce(address)),
        Query::BankInfo => serde_json::to_value(bank.info()).map_err(RpcError::internal)?,
        Query::Stakers => json!(bank.stakers()),
        Query::StateRoot => Value::String(hex::encode(crate::snapshot::state_root(bank))),
    };
    Ok(value)
}

fn run_call(bank: &mut DecentralBank, caller: &Address, call: &Call) -> Result<Value, RpcError> {
    let value = match call {
        Call::Stake { amount } => {
            bank.stake(caller, *amount)?;
            json!({ "staking_balance": amount_value(bank.staking_balance_of(caller)) })
        }
        Call::Unstake => {
            let returned = bank.unstake(caller)?;
            json!({ "returned": amount_value(returned) })
        }
        Call::IssueRewards => {
            let report = bank.issue_rewards(caller)?;
            serde_json::to_value(report).map_err(RpcError::internal)?
        }
        Call::Transfer { asset, to, amount } => {
            bank.transfer(caller, *asset, to, *amount)?;
            json!({ "balance": amount_value(bank.balance_of(*asset, caller)) })
        }
        Call::Approve {
            asset,
            spender,
            amount,
        } => {
            bank.approve(caller, *asset, spender, *amount);
            json!({ "allowance": amount_value(bank.allowance(*asset, caller, spender)) })
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;

    use super::*;
    use crate::{
        auth::address_of,
        bank::tests::{funded_bank, BANK, OWNER},
        units::tokens,
    };

    fn service_with_member(key: &SigningKey) -> (StakingService, Address) {
        let me = address_of(&key.verifying_key());
        let service = StakingService::new(funded_bank());
        service
            .transfer(OWNER, Asset::Stake, &me, tokens(100))
            .unwrap();
        (service, me)
    }

    fn signed_line(key: &SigningKey, call: Call, nonce: u64) -> String {
        serde_json::to_string(&Request::Call(SignedCall::sign(key, call, nonce).unwrap())).unwrap()
    }

    #[test]
    fn approve_stake_and_query_over_the_wire() {
        let key = SigningKey::from_bytes(&[9u8; 32]);
        let (service, me) = service_with_member(&key);

        let approve = Call::Approve {
            asset: Asset::Stake,
            spender: BANK.into(),
            amount: tokens(100),
        };
        let (response, mutated) = dispatch_line(&service, &signed_line(&key, approve, 0));
        assert!(response.ok, "{response:?}");
        assert!(mutated);

        let stake = Call::Stake { amount: tokens(100) };
        let (response, _) = dispatch_line(&service, &signed_line(&key, stake, 1));
        assert_eq!(
            response.result.unwrap()["staking_balance"],
            Value::String(tokens(100).to_string())
        );

        let query = format!(r#"{{"query":{{"method":"is_staking","address":"{me}"}}}}"#);
        let (response, mutated) = dispatch_line(&service, &query);
        assert_eq!(response.result, Some(Value::Bool(true)));
        assert!(!mutated);

        let (response, _) = dispatch_line(&service, r#"{"query":{"method":"stakers"}}"#);
        assert_eq!(response.result, Some(json!([me])));

        let query = format!(r#"{{"query":{{"method":"next_nonce","address":"{me}"}}}}"#);
        assert_eq!(dispatch_line(&service, &query).0.result, Some(json!(2)));
    }

    #[test]
    fn errors_carry_their_kind() {
        let key = SigningKey::from_bytes(&[9u8; 32]);
        let (service, _) = service_with_member(&key);

        // Failed calls leave the nonce at 0.
        let (response, mutated) = dispatch_line(&service, &signed_line(&key, Call::Unstake, 0));
        assert!(!response.ok);
        assert!(!mutated);
        assert_eq!(response.error.unwrap().kind, "not_staking");

        let (response, _) = dispatch_line(&service, &signed_line(&key, Call::IssueRewards, 0));
        let error = response.error.unwrap();
        assert_eq!(error.kind, "unauthorized");
        assert!(error.message.contains("caller must be the owner"));

        let (response, _) =
            dispatch_line(&service, &signed_line(&key, Call::Stake { amount: 0 }, 0));
        assert_eq!(response.error.unwrap().kind, "invalid_amount");

        let (response, _) = dispatch_line(&service, &signed_line(&key, Call::Unstake, 4));
        assert_eq!(response.error.unwrap().kind, "bad_nonce");

        let (response, _) = dispatch_line(&service, "{not json");
        assert_eq!(response.error.unwrap().kind, "bad_request");
    }

    #[test]
    fn replayed_line_is_rejected() {
        let key = SigningKey::from_bytes(&[9u8; 32]);
        let (service, me) = service_with_member(&key);
        let line = signed_line(
            &key,
            Call::Transfer {
                asset: Asset::Stake,
                to: "0xfriend".into(),
                amount: tokens(10),
            },
            0,
        );
        assert!(dispatch_line(&service, &line).0.ok);
        let (response, mutated) = dispatch_line(&service, &line);
        assert_eq!(response.error.unwrap().kind, "replay");
        assert!(!mutated);
        assert_eq!(
            service.with_bank(|b| b.balance_of(Asset::Stake, &me)),
            tokens(90)
        );
    }

    #[test]
    fn replay_is_rejected_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let key = SigningKey::from_bytes(&[9u8; 32]);
        let (service, me) = service_with_member(&key);
        let line = signed_line(
            &key,
            Call::Transfer {
                asset: Asset::Stake,
                to: "0xfriend".into(),
                amount: tokens(10),
            },
            0,
        );
        let (response, mutated) = dispatch_line(&service, &line);
        assert!(response.ok && mutated);
        service.persist(&path).unwrap();
        drop(service);

        let restarted = StakingService::new(crate::snapshot::load_state(&path).unwrap());
        let (response, mutated) = dispatch_line(&restarted, &line);
        assert_eq!(response.error.unwrap().kind, "replay");
        assert!(!mutated);
        restarted.with_bank(|b| {
            assert_eq!(b.balance_of(Asset::Stake, "0xfriend"), tokens(10));
            assert_eq!(b.balance_of(Asset::Stake, &me), tokens(90));
            assert_eq!(b.next_nonce(&me), 1);
        });
    }
}
