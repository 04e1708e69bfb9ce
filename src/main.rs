use std::{
    fs,
    path::{Path, PathBuf},
};

use clap::{Args, Parser, Subcommand};
use dbank_cli::{
    auth::{self, AuthError},
    bank::{Asset, DecentralBank, DistributionReport},
    config::{BankConfig, ConfigError},
    error::BankError,
    ledger::Address,
    logging,
    snapshot::{self, StateError},
    units::{self, Amount, UnitsError},
};
use ed25519_dalek::SigningKey;
use rand::{rngs::OsRng, RngCore};
use tracing::info;

//==================== Аргументы ====================//

#[derive(Debug, Parser)]
#[command(name = "dbank-cli", version, about = "Staking ledger: stake, unstake and issue rewards")]
struct Cli {
    /// Bank state file (JSON snapshot).
    #[arg(long, global = true, env = "DBANK_STATE", default_value = "dbank-state.json")]
    state: PathBuf,

    /// Bank configuration (TOML). Only read by `init` and `demo`.
    #[arg(long, global = true, env = "DBANK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct CallerArgs {
    /// Act as this address (`--owner` reads better for `init`).
    #[arg(long, visible_alias = "owner", conflicts_with = "sk_hex")]
    caller: Option<Address>,

    /// Act as the address of this Ed25519 secret key (64 hex chars).
    #[arg(long, env = "DBANK_SK_HEX", hide_env_values = true)]
    sk_hex: Option<String>,
}

impl CallerArgs {
    fn resolve(&self) -> Result<Address, CliError> {
        match (&self.caller, &self.sk_hex) {
            (Some(address), _) => Ok(address.clone()),
            (None, Some(sk_hex)) => {
                let key = auth::signing_key_from_hex(sk_hex)?;
                Ok(auth::address_of(&key.verifying_key()))
            }
            (None, None) => Err(CliError::Usage("pass --caller or --sk-hex".into())),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Deploy a bank: mint both tokens to the owner and fund the reward reserve.
    Init {
        #[command(flatten)]
        owner: CallerArgs,
        /// Reward tokens moved into the bank's reserve (default: whole supply).
        #[arg(long)]
        reserve: Option<String>,
        /// Overwrite an existing state file.
        #[arg(long)]
        force: bool,
    },
    /// Generate an Ed25519 keypair (sk.hex / pk.hex) and print its address.
    Keygen {
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Print the address of a secret key.
    Address {
        #[arg(long)]
        sk_hex: String,
    },
    /// Move tokens between accounts.
    Transfer {
        #[command(flatten)]
        caller: CallerArgs,
        #[arg(long, value_enum)]
        asset: Asset,
        #[arg(long)]
        to: Address,
        #[arg(long)]
        amount: String,
    },
    /// Allow a spender (default: the bank) to pull tokens.
    Approve {
        #[command(flatten)]
        caller: CallerArgs,
        #[arg(long, value_enum, default_value = "stake")]
        asset: Asset,
        #[arg(long)]
        spender: Option<Address>,
        #[arg(long)]
        amount: String,
    },
    /// Deposit stake tokens into the bank.
    Stake {
        #[command(flatten)]
        caller: CallerArgs,
        #[arg(long)]
        amount: String,
    },
    /// Withdraw the whole staked balance.
    Unstake {
        #[command(flatten)]
        caller: CallerArgs,
    },
    /// Run one reward distribution pass (owner only).
    IssueRewards {
        #[command(flatten)]
        caller: CallerArgs,
    },
    /// Show the staking position of an address.
    Position {
        #[arg(long)]
        address: Address,
    },
    /// Show a token balance.
    Balance {
        #[arg(long, value_enum)]
        asset: Asset,
        #[arg(long)]
        address: Address,
    },
    /// Show bank metadata and custody balances.
    BankInfo,
    /// Print the state root of the current snapshot.
    StateRoot,
    /// Replay the reference scenario in memory.
    Demo,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Bank(#[from] BankError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("invalid amount: {0}")]
    Units(#[from] UnitsError),
    #[error("{path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

//==================== Утилиты ====================//

fn parse_amount(bank: &DecentralBank, asset: Asset, value: &str) -> Result<Amount, CliError> {
    Ok(units::parse_units(value, bank.token(asset).meta.decimals)?)
}

fn fmt_amount(bank: &DecentralBank, asset: Asset, amount: Amount) -> String {
    bank.token(asset).meta.format(amount)
}

fn write_all(path: &Path, bytes: &[u8]) -> Result<(), CliError> {
    fs::write(path, bytes).map_err(|source| CliError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn print_report(bank: &DecentralBank, report: &DistributionReport) {
    for payment in &report.paid {
        println!(
            "  paid    {} → {}",
            fmt_amount(bank, Asset::Reward, payment.amount),
            payment.recipient
        );
    }
    for payment in &report.skipped {
        println!(
            "  skipped {} → {}",
            fmt_amount(bank, Asset::Reward, payment.amount),
            payment.recipient
        );
    }
    println!(
        "Rewards issued: {} to {} staker(s)",
        fmt_amount(bank, Asset::Reward, report.total_paid()),
        report.paid.len()
    );
}

//==================== Развёртывание ====================//

fn deploy(
    config: &BankConfig,
    owner: Address,
    reserve: Option<&str>,
) -> Result<DecentralBank, CliError> {
    let reserve = reserve
        .map(|value| units::parse_units(value, config.reward_token.decimals))
        .transpose()?;
    Ok(config.deploy(owner, reserve)?)
}

fn init_cmd(
    cli: &Cli,
    owner: &CallerArgs,
    reserve: Option<&str>,
    force: bool,
) -> Result<(), CliError> {
    if cli.state.exists() && !force {
        return Err(CliError::Usage(format!(
            "{} already exists (use --force to overwrite)",
            cli.state.display()
        )));
    }
    let config = BankConfig::load_or_default(cli.config.as_deref())?;
    let bank = deploy(&config, owner.resolve()?, reserve)?;
    snapshot::save_state(&cli.state, &bank)?;
    let info = bank.info();
    println!("Deployed \"{}\" at {}", info.name, info.address);
    println!("  owner          {}", info.owner);
    println!(
        "  reward reserve {}",
        fmt_amount(&bank, Asset::Reward, info.reward_balance)
    );
    println!("  state          {}", cli.state.display());
    Ok(())
}

//==================== Ключи ====================//

fn keygen_cmd(out_dir: &Path) -> Result<(), CliError> {
    fs::create_dir_all(out_dir).map_err(|source| CliError::Io {
        path: out_dir.display().to_string(),
        source,
    })?;
    let mut sk_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut sk_bytes);
    let sk = SigningKey::from_bytes(&sk_bytes);
    let pk = sk.verifying_key();

    write_all(&out_dir.join("sk.hex"), hex::encode(sk_bytes).as_bytes())?;
    write_all(&out_dir.join("pk.hex"), hex::encode(pk.as_bytes()).as_bytes())?;
    println!("{}", auth::address_of(&pk));
    info!(out_dir = %out_dir.display(), "keypair written");
    Ok(())
}

//==================== Операции ====================//

fn run(cli: &Cli) -> Result<(), CliError> {
    match &cli.command {
        Command::Init {
            owner,
            reserve,
            force,
        } => init_cmd(cli, owner, reserve.as_deref(), *force),
        Command::Keygen { out_dir } => keygen_cmd(out_dir),
        Command::Address { sk_hex } => {
            let key = auth::signing_key_from_hex(sk_hex)?;
            println!("{}", auth::address_of(&key.verifying_key()));
            Ok(())
        }
        Command::Transfer {
            caller,
            asset,
            to,
            amount,
        } => {
            let from = caller.resolve()?;
            let line = snapshot::update_state(&cli.state, |bank| -> Result<_, CliError> {
                let amount = parse_amount(bank, *asset, amount)?;
                bank.transfer(&from, *asset, to, amount)?;
                Ok(format!(
                    "Transferred {} {from} → {to}",
                    fmt_amount(bank, *asset, amount)
                ))
            })?;
            println!("{line}");
            Ok(())
        }
        Command::Approve {
            caller,
            asset,
            spender,
            amount,
        } => {
            let owner = caller.resolve()?;
            let line = snapshot::update_state(&cli.state, |bank| -> Result<_, CliError> {
                let amount = parse_amount(bank, *asset, amount)?;
                let spender = spender.clone().unwrap_or_else(|| bank.address().clone());
                bank.approve(&owner, *asset, &spender, amount);
                Ok(format!(
                    "Approved {} for {spender}",
                    fmt_amount(bank, *asset, amount)
                ))
            })?;
            println!("{line}");
            Ok(())
        }
        Command::Stake { caller, amount } => {
            let staker = caller.resolve()?;
            let line = snapshot::update_state(&cli.state, |bank| -> Result<_, CliError> {
                let amount = parse_amount(bank, Asset::Stake, amount)?;
                bank.stake(&staker, amount)?;
                Ok(format!(
                    "Staked {} (balance {})",
                    fmt_amount(bank, Asset::Stake, amount),
                    fmt_amount(bank, Asset::Stake, bank.staking_balance_of(&staker))
                ))
            })?;
            println!("{line}");
            Ok(())
        }
        Command::Unstake { caller } => {
            let staker = caller.resolve()?;
            let line = snapshot::update_state(&cli.state, |bank| -> Result<_, CliError> {
                let returned = bank.unstake(&staker)?;
                Ok(format!(
                    "Unstaked {}",
                    fmt_amount(bank, Asset::Stake, returned)
                ))
            })?;
            println!("{line}");
            Ok(())
        }
        Command::IssueRewards { caller } => {
            let issuer = caller.resolve()?;
            snapshot::update_state(&cli.state, |bank| -> Result<_, CliError> {
                let report = bank.issue_rewards(&issuer)?;
                print_report(bank, &report);
                Ok(())
            })
        }
        Command::Position { address } => {
            let bank = snapshot::load_state(&cli.state)?;
            println!("address          {address}");
            println!(
                "staking balance  {}",
                fmt_amount(&bank, Asset::Stake, bank.staking_balance_of(address))
            );
            println!("is staking       {}", bank.is_staking(address));
            println!("has staked       {}", bank.has_staked(address));
            println!(
                "rewards held     {}",
                fmt_amount(&bank, Asset::Reward, bank.balance_of(Asset::Reward, address))
            );
            Ok(())
        }
        Command::Balance { asset, address } => {
            let bank = snapshot::load_state(&cli.state)?;
            println!(
                "{}",
                fmt_amount(&bank, *asset, bank.balance_of(*asset, address))
            );
            Ok(())
        }
        Command::BankInfo => {
            let bank = snapshot::load_state(&cli.state)?;
            let info = bank.info();
            println!("name            {}", info.name);
            println!("address         {}", info.address);
            println!("owner           {}", info.owner);
            println!("stakers         {}", info.stakers_count);
            println!(
                "stake custody   {}",
                fmt_amount(&bank, Asset::Stake, info.stake_balance)
            );
            println!(
                "reward reserve  {}",
                fmt_amount(&bank, Asset::Reward, info.reward_balance)
            );
            println!("reward divisor  {}", bank.reward_policy().divisor);
            println!("height          {}", info.height);
            Ok(())
        }
        Command::StateRoot => {
            let bank = snapshot::load_state(&cli.state)?;
            println!("{}", hex::encode(snapshot::state_root(&bank)));
            Ok(())
        }
        Command::Demo => demo_cmd(cli),
    }
}

//==================== Демо ====================//

fn demo_cmd(cli: &Cli) -> Result<(), CliError> {
    let config = BankConfig::load_or_default(cli.config.as_deref())?;
    let owner: Address = "0xowner".into();
    let customer: Address = "0xcustomer".into();

    let mut bank = deploy(&config, owner.clone(), None)?;
    let hundred = parse_amount(&bank, Asset::Stake, "100")?;
    bank.transfer(&owner, Asset::Stake, &customer, hundred)?;
    println!(
        "customer holds {}",
        fmt_amount(&bank, Asset::Stake, bank.balance_of(Asset::Stake, &customer))
    );

    let bank_address = bank.address().clone();
    bank.approve(&customer, Asset::Stake, &bank_address, hundred);
    bank.stake(&customer, hundred)?;
    println!(
        "customer staked {}, is_staking={}, has_staked={}",
        fmt_amount(&bank, Asset::Stake, bank.staking_balance_of(&customer)),
        bank.is_staking(&customer),
        bank.has_staked(&customer)
    );

    match bank.issue_rewards(&customer) {
        Err(err) => println!("customer issue_rewards: {err}"),
        Ok(_) => return Err(CliError::Usage("non-owner distribution succeeded".into())),
    }
    let report = bank.issue_rewards(&owner)?;
    print_report(&bank, &report);
    println!(
        "customer rewards {}",
        fmt_amount(&bank, Asset::Reward, bank.balance_of(Asset::Reward, &customer))
    );
    Ok(())
}

//==================== main ====================//

fn main() {
    logging::init("dbank-cli");
    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        eprintln!("error: {err}");
        std::process::exit(2);
    }
}
