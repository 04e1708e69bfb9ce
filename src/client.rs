//! Blocking client for the `dbank-serve` line protocol.

use std::{
    io::{self, BufRead, BufReader, Write},
    net::TcpStream,
};

use serde::de::DeserializeOwned;

use crate::{
    bank::{Asset, BankInfo},
    ledger::Address,
    rpc::{Query, Request, Response, RpcError},
    units::{self, Amount, UnitsError},
};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection: {0}")]
    Io(#[from] io::Error),
    #[error("bad message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("server closed the connection")]
    Closed,
    #[error("{}: {}", .0.kind, .0.message)]
    Remote(RpcError),
    #[error("invalid amount: {0}")]
    Units(#[from] UnitsError),
}

pub struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Client {
    pub fn connect(addr: &str) -> Result<Self, ClientError> {
        let writer = TcpStream::connect(addr)?;
        let reader = BufReader::new(writer.try_clone()?);
        Ok(Self { reader, writer })
    }

    pub fn request(&mut self, request: &Request) -> Result<Response, ClientError> {
        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        self.writer.write_all(&line)?;
        self.writer.flush()?;

        let mut reply = String::new();
        if self.reader.read_line(&mut reply)? == 0 {
            return Err(ClientError::Closed);
        }
        Ok(serde_json::from_str(&reply)?)
    }

    /// Runs `query` and decodes a successful result.
    pub fn query<T: DeserializeOwned>(&mut self, query: Query) -> Result<T, ClientError> {
        let response = self.request(&Request::Query(query))?;
        match (response.result, response.error) {
            (_, Some(err)) => Err(ClientError::Remote(err)),
            (Some(value), None) => Ok(serde_json::from_value(value)?),
            (None, None) => Err(ClientError::Closed),
        }
    }

    pub fn bank_info(&mut self) -> Result<BankInfo, ClientError> {
        self.query(Query::BankInfo)
    }

    pub fn next_nonce(&mut self, address: &Address) -> Result<u64, ClientError> {
        self.query(Query::NextNonce {
            address: address.clone(),
        })
    }
}

/// Parses a token amount using the decimals the bank reports for `asset`.
pub fn parse_amount(info: &BankInfo, asset: Asset, value: &str) -> Result<Amount, UnitsError> {
    let decimals = match asset {
        Asset::Stake => info.stake_token.decimals,
        Asset::Reward => info.reward_token.decimals,
    };
    units::parse_units(value, decimals)
}

#[cfg(test)]
mod tests {
    use std::{io::BufReader, net::TcpListener, sync::Arc, thread};

    use ed25519_dalek::SigningKey;

    use super::*;
    use crate::{
        auth::{address_of, SignedCall},
        config::BankConfig,
        rpc::Call,
        server::serve_connection,
        service::StakingService,
    };

    fn six_decimal_bank() -> StakingService {
        let config = BankConfig::from_toml(
            r#"
            [stake_token]
            name = "Tether"
            symbol = "mUSDT"
            decimals = 6
            "#,
        )
        .unwrap();
        StakingService::new(config.deploy("0xowner".into(), None).unwrap())
    }

    #[test]
    fn amounts_follow_token_decimals() {
        let service = six_decimal_bank();
        let info = service.info();
        assert_eq!(parse_amount(&info, Asset::Stake, "100").unwrap(), 100_000_000);
        assert_eq!(parse_amount(&info, Asset::Stake, "0.5").unwrap(), 500_000);
        assert!(parse_amount(&info, Asset::Stake, "0.0000001").is_err());
        assert_eq!(
            parse_amount(&info, Asset::Reward, "1").unwrap(),
            units::tokens(1)
        );
    }

    #[test]
    fn stake_over_tcp_with_server_nonce_and_decimals() {
        let service = Arc::new(six_decimal_bank());
        let key = SigningKey::from_bytes(&[6u8; 32]);
        let me = address_of(&key.verifying_key());
        service
            .transfer("0xowner", Asset::Stake, &me, 100_000_000)
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = {
            let service = Arc::clone(&service);
            thread::spawn(move || {
                let (stream, _) = listener.accept().unwrap();
                let reader = BufReader::new(stream.try_clone().unwrap());
                serve_connection(reader, stream, &service, None).unwrap();
            })
        };

        let mut client = Client::connect(&addr).unwrap();
        let info = client.bank_info().unwrap();
        let amount = parse_amount(&info, Asset::Stake, "100").unwrap();
        let spender = info.address.clone();

        for call in [
            Call::Approve {
                asset: Asset::Stake,
                spender,
                amount,
            },
            Call::Stake { amount },
        ] {
            let nonce = client.next_nonce(&me).unwrap();
            let signed = SignedCall::sign(&key, call, nonce).unwrap();
            let response = client.request(&Request::Call(signed)).unwrap();
            assert!(response.ok, "{response:?}");
        }
        assert_eq!(client.next_nonce(&me).unwrap(), 2);
        let staked: String = client
            .query(Query::StakingBalance {
                address: me.clone(),
            })
            .unwrap();
        assert_eq!(staked, "100000000");

        drop(client);
        server.join().unwrap();
        assert_eq!(service.with_bank(|b| b.staking_balance_of(&me)), 100_000_000);
    }
}
