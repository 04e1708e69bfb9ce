use clap::{Parser, Subcommand};
use dbank_cli::{
    auth::{self, SignedCall},
    bank::Asset,
    client::{self, Client, ClientError},
    ledger::Address,
    logging,
    rpc::{Call, Query, Request},
    units::Amount,
};

/// Sends one request to `dbank-serve` and prints the response line.
///
/// Amounts are token amounts (`"12.5"`), scaled by the decimals the server
/// reports for the target token.
#[derive(Debug, Parser)]
#[command(name = "dbank-call", version)]
struct Args {
    #[arg(long, env = "DBANK_CONNECT", default_value = "127.0.0.1:7411")]
    connect: String,

    /// Signing key for calls (64 hex chars).
    #[arg(long, env = "DBANK_SK_HEX", hide_env_values = true)]
    sk_hex: Option<String>,

    /// Call nonce; defaults to the next nonce the server expects.
    #[arg(long)]
    nonce: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Stake {
        amount: String,
    },
    Unstake,
    IssueRewards,
    Transfer {
        #[arg(value_enum)]
        asset: Asset,
        to: Address,
        amount: String,
    },
    Approve {
        #[arg(value_enum)]
        asset: Asset,
        spender: Address,
        amount: String,
    },
    StakingBalance {
        address: Address,
    },
    IsStaking {
        address: Address,
    },
    HasStaked {
        address: Address,
    },
    NextNonce {
        address: Address,
    },
    BalanceOf {
        #[arg(value_enum)]
        asset: Asset,
        address: Address,
    },
    Allowance {
        #[arg(value_enum)]
        asset: Asset,
        owner: Address,
        spender: Address,
    },
    BankInfo,
    Stakers,
    StateRoot,
}

fn client_err(err: ClientError) -> String {
    err.to_string()
}

enum Prepared {
    Call(Call),
    Query(Query),
}

fn prepare(command: &Command, client: &mut Client) -> Result<Prepared, String> {
    let mut amount = |asset: Asset, value: &str| -> Result<Amount, String> {
        let info = client.bank_info().map_err(client_err)?;
        client::parse_amount(&info, asset, value).map_err(|e| format!("invalid amount {value:?}: {e}"))
    };
    let call = match command {
        Command::Stake { amount: value } => Call::Stake {
            amount: amount(Asset::Stake, value)?,
        },
        Command::Unstake => Call::Unstake,
        Command::IssueRewards => Call::IssueRewards,
        Command::Transfer {
            asset,
            to,
            amount: value,
        } => Call::Transfer {
            asset: *asset,
            to: to.clone(),
            amount: amount(*asset, value)?,
        },
        Command::Approve {
            asset,
            spender,
            amount: value,
        } => Call::Approve {
            asset: *asset,
            spender: spender.clone(),
            amount: amount(*asset, value)?,
        },
        Command::StakingBalance { address } => {
            return Ok(Prepared::Query(Query::StakingBalance {
                address: address.clone(),
            }))
        }
        Command::IsStaking { address } => {
            return Ok(Prepared::Query(Query::IsStaking {
                address: address.clone(),
            }))
        }
        Command::HasStaked { address } => {
            return Ok(Prepared::Query(Query::HasStaked {
                address: address.clone(),
            }))
        }
        Command::NextNonce { address } => {
            return Ok(Prepared::Query(Query::NextNonce {
                address: address.clone(),
            }))
        }
        Command::BalanceOf { asset, address } => {
            return Ok(Prepared::Query(Query::BalanceOf {
                asset: *asset,
                address: address.clone(),
            }))
        }
        Command::Allowance {
            asset,
            owner,
            spender,
        } => {
            return Ok(Prepared::Query(Query::Allowance {
                asset: *asset,
                owner: owner.clone(),
                spender: spender.clone(),
            }))
        }
        Command::BankInfo => return Ok(Prepared::Query(Query::BankInfo)),
        Command::Stakers => return Ok(Prepared::Query(Query::Stakers)),
        Command::StateRoot => return Ok(Prepared::Query(Query::StateRoot)),
    };
    Ok(Prepared::Call(call))
}

fn run(args: &Args) -> Result<bool, String> {
    let mut client = Client::connect(&args.connect).map_err(client_err)?;
    let request = match prepare(&args.command, &mut client)? {
        Prepared::Query(query) => Request::Query(query),
        Prepared::Call(call) => {
            let sk_hex = args.sk_hex.as_deref().ok_or("calls need --sk-hex")?;
            let key = auth::signing_key_from_hex(sk_hex).map_err(|e| e.to_string())?;
            let nonce = match args.nonce {
                Some(nonce) => nonce,
                None => {
                    let me = auth::address_of(&key.verifying_key());
                    client.next_nonce(&me).map_err(client_err)?
                }
            };
            Request::Call(SignedCall::sign(&key, call, nonce).map_err(|e| e.to_string())?)
        }
    };
    let response = client.request(&request).map_err(client_err)?;
    println!("{}", serde_json::to_string_pretty(&response).map_err(|e| e.to_string())?);
    Ok(response.ok)
}

fn main() {
    logging::init("dbank-call");
    let args = Args::parse();
    match run(&args) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    }
}
