use crate::config::Constants;
use crate::core::block::{Block, BlockLogic};
use crate::core::chain::Chain;
use crate::core::transaction::{DelegateAsset, Transaction, TransactionAsset, TransactionLogic};
use crate::core::tx_types::{TransactionKind, TransactionRegistry};
use crate::core::verify::{ForkReporter, ForkType};
use crate::error::Result;
use crate::storage::memory::MemoryLedger;
use crate::utils::Keypair;
use std::sync::{Arc, Mutex};

/// Balance the genesis block hands to the funded account
pub const FUNDED_BALANCE: u64 = 1_000_000_000_000;
/// Minimum send fee under the default fee schedule
pub const SEND_FEE: u64 = 10_000_000;

pub fn keypair(secret: &str) -> Keypair {
    Keypair::from_secret(secret).expect("fixture secret")
}

pub fn constants(active_delegates: u32) -> Arc<Constants> {
    Arc::new(Constants {
        active_delegates,
        ..Constants::default()
    })
}

/// Fork reporter remembering every report.
#[derive(Debug, Default)]
pub struct RecordingForkReporter {
    reports: Mutex<Vec<ForkType>>,
}

impl RecordingForkReporter {
    pub fn reports(&self) -> Vec<ForkType> {
        self.reports.lock().expect("reporter lock").clone()
    }
}

impl ForkReporter for RecordingForkReporter {
    fn report(&self, _block: &Block, fork: ForkType) -> Result<()> {
        self.reports.lock().expect("reporter lock").push(fork);
        Ok(())
    }
}

pub struct TestNet {
    pub genesis_keypair: Keypair,
    pub delegates: Vec<Keypair>,
    /// Holds the genesis funds and votes for every delegate
    pub funded: Keypair,
    /// Account without any history
    pub recipient: Keypair,
    pub genesis: Block,
    pub reporter: Arc<RecordingForkReporter>,
}

pub fn send(
    logic: &TransactionLogic,
    from: &Keypair,
    to: &str,
    amount: u64,
    fee: u64,
) -> Transaction {
    let draft = Transaction {
        tx_type: TransactionKind::Send as u8,
        recipient_id: Some(to.to_string()),
        amount,
        fee,
        ..Default::default()
    };
    logic.create(from, None, draft).expect("send")
}

pub fn delegate_registration(logic: &TransactionLogic, from: &Keypair, username: &str) -> Transaction {
    let fee = logic.constants().fees[0].delegate;
    let draft = Transaction {
        tx_type: TransactionKind::Delegate as u8,
        fee,
        asset: Some(TransactionAsset::Delegate {
            delegate: DelegateAsset {
                username: username.to_string(),
                public_key: from.public_key_hex(),
            },
        }),
        ..Default::default()
    };
    logic.create(from, None, draft).expect("delegate registration")
}

pub fn vote(logic: &TransactionLogic, from: &Keypair, votes: Vec<String>) -> Transaction {
    let fee = logic.constants().fees[0].vote;
    let draft = Transaction {
        tx_type: TransactionKind::Vote as u8,
        recipient_id: Some(from.address()),
        fee,
        asset: Some(TransactionAsset::Vote { votes }),
        ..Default::default()
    };
    logic.create(from, None, draft).expect("vote")
}

/// Genesis block funding `funded`, registering `delegates` and voting for all
/// of them from `funded`.
pub fn genesis_block(
    logic: &BlockLogic,
    genesis: &Keypair,
    funded: &Keypair,
    delegates: &[Keypair],
) -> Block {
    let tx_logic = logic.transaction_logic();
    let mut transactions = vec![send(tx_logic, genesis, &funded.address(), FUNDED_BALANCE, 0)];
    for (i, delegate) in delegates.iter().enumerate() {
        transactions.push(delegate_registration(tx_logic, delegate, &format!("delegate_{i}")));
    }
    let votes = delegates
        .iter()
        .map(|d| format!("+{}", d.public_key_hex()))
        .collect();
    transactions.push(vote(tx_logic, funded, votes));
    logic
        .create(genesis, 0, &transactions, None)
        .expect("genesis block")
}

/// In-memory chain with `active_delegates` registered delegates and the
/// genesis block applied.
pub fn memory_chain(active_delegates: u32) -> (Chain<MemoryLedger>, TestNet) {
    let reporter = Arc::new(RecordingForkReporter::default());
    let mut chain = Chain::new(
        MemoryLedger::new(),
        constants(active_delegates),
        TransactionRegistry::with_defaults(),
        reporter.clone(),
    )
    .expect("chain");

    let genesis_keypair = keypair("genesis");
    let funded = keypair("funded");
    let delegates: Vec<Keypair> = (0..active_delegates)
        .map(|i| keypair(&format!("delegate {i}")))
        .collect();
    let genesis = genesis_block(chain.block_logic(), &genesis_keypair, &funded, &delegates);
    chain.apply_genesis(genesis.clone()).expect("genesis applies");

    let net = TestNet {
        genesis_keypair,
        delegates,
        funded,
        recipient: keypair("recipient"),
        genesis,
        reporter,
    };
    (chain, net)
}
