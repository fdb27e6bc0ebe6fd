use clap::Parser;
use delegate_chain::config::{Constants, GLOBAL_CONFIG};
use delegate_chain::core::{
    BlockLogic, BlockVerifier, Chain, DelegateAsset, LogForkReporter, RawBlock, Transaction,
    TransactionAsset, TransactionKind, TransactionLogic, TransactionRegistry,
};
use delegate_chain::storage::SledLedger;
use delegate_chain::utils::{derive_address, is_valid_public_key_hex, Keypair};
use delegate_chain::{Command, Opt};
use log::{error, info};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

fn main() {
    env_logger::builder()
        .filter_level(GLOBAL_CONFIG.log_filter())
        .init();

    let opt = Opt::parse();
    if let Err(e) = run_command(opt.command) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn data_dir(dir: Option<PathBuf>) -> PathBuf {
    dir.unwrap_or_else(|| GLOBAL_CONFIG.data_dir.clone())
}

fn open_chain(dir: Option<PathBuf>) -> Result<Chain<SledLedger>, Box<dyn std::error::Error>> {
    let constants = Arc::new(GLOBAL_CONFIG.constants()?);
    let store = SledLedger::open(data_dir(dir))?;
    Ok(Chain::new(
        store,
        constants,
        TransactionRegistry::with_defaults(),
        Arc::new(LogForkReporter),
    )?)
}

fn run_command(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Keygen { secret } => {
            let keypair = Keypair::from_secret(&secret)?;
            println!("Public key: {}", keypair.public_key_hex());
            println!("Address: {}", keypair.address());
        }
        Command::Address { public_key } => {
            if !is_valid_public_key_hex(&public_key) {
                return Err(format!("Invalid public key: {public_key}").into());
            }
            println!("{}", derive_address(&hex::decode(&public_key)?));
        }
        Command::Genesis {
            secret,
            username,
            data_dir,
        } => {
            let keypair = Keypair::from_secret(&secret)?;
            let mut chain = open_chain(data_dir)?;
            let tx_logic = chain.transaction_logic();
            let registration = tx_logic.create(
                &keypair,
                None,
                Transaction {
                    tx_type: TransactionKind::Delegate as u8,
                    asset: Some(TransactionAsset::Delegate {
                        delegate: DelegateAsset {
                            username,
                            public_key: keypair.public_key_hex(),
                        },
                    }),
                    ..Default::default()
                },
            )?;
            let vote = tx_logic.create(
                &keypair,
                None,
                Transaction {
                    tx_type: TransactionKind::Vote as u8,
                    recipient_id: Some(keypair.address()),
                    asset: Some(TransactionAsset::Vote {
                        votes: vec![format!("+{}", keypair.public_key_hex())],
                    }),
                    ..Default::default()
                },
            )?;
            let block = chain
                .block_logic()
                .create(&keypair, 0, &[registration, vote], None)?;
            chain.apply_genesis(block.clone())?;
            info!("Genesis block {} stored", block.id);
            println!("{}", serde_json::to_string_pretty(&block)?);
        }
        Command::Status { data_dir } => {
            let chain = open_chain(data_dir)?;
            println!("{}", serde_json::to_string_pretty(&chain.status())?);
        }
        Command::VerifyBlock { file } => {
            let constants: Arc<Constants> = Arc::new(GLOBAL_CONFIG.constants()?);
            let tx_logic = Arc::new(TransactionLogic::new(
                constants.clone(),
                TransactionRegistry::with_defaults(),
            ));
            let block_logic = Arc::new(BlockLogic::new(constants.clone(), tx_logic));
            let raw: RawBlock = serde_json::from_str(&std::fs::read_to_string(file)?)?;
            let block = block_logic.object_normalize(raw)?;
            let verifier = BlockVerifier::new(block_logic, constants, Arc::new(LogForkReporter));
            let result = if block.height == 1 {
                verifier.verify_genesis(&block)
            } else {
                verifier.verify_receipt(&block)
            };
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.verified {
                process::exit(2);
            }
        }
    }
    Ok(())
}
