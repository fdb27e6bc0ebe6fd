//! Block verification
//!
//! Every check of a pass runs and appends to the error list; callers decide
//! what a failed verdict means. Fork reports go out fire-and-forget.

use crate::config::Constants;
use crate::core::block::{Block, BlockLogic, BLOCK_VERSION};
use crate::error::Result;
use crate::storage::ledger::LedgerStore;
use log::{debug, warn};
use ring::digest::{Context, SHA256};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub verified: bool,
    pub errors: Vec<String>,
}

impl VerificationResult {
    fn from_errors(errors: Vec<String>) -> VerificationResult {
        VerificationResult {
            verified: errors.is_empty(),
            errors,
        }
    }
}

/// Why a block was reported as a fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ForkType {
    /// Parent is not the local tip
    WrongPreviousBlock = 1,
    /// Block carries transactions that are already confirmed
    TxAlreadyConfirmed = 2,
}

impl fmt::Display for ForkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fork type {}", *self as u8)
    }
}

pub trait ForkReporter: Send + Sync {
    fn report(&self, block: &Block, fork: ForkType) -> Result<()>;
}

/// Reporter that only writes the fork to the log.
#[derive(Debug, Default)]
pub struct LogForkReporter;

impl ForkReporter for LogForkReporter {
    fn report(&self, block: &Block, fork: ForkType) -> Result<()> {
        warn!(
            "Fork detected ({fork}): block {} at height {} with parent {:?}",
            block.id, block.height, block.previous_block
        );
        Ok(())
    }
}

/// Sends a fork notification, logging instead of propagating failures.
pub fn notify_fork(reporter: &dyn ForkReporter, block: &Block, fork: ForkType) {
    if let Err(e) = reporter.report(block, fork) {
        warn!("Fork reporter failed for block {}: {e}", block.id);
    }
}

/// Post-processing hook over a verification verdict, run in registration order.
pub trait VerifyFilter: Send + Sync {
    fn filter(&self, result: VerificationResult, block: &Block) -> VerificationResult;
}

pub struct BlockVerifier {
    block_logic: Arc<BlockLogic>,
    constants: Arc<Constants>,
    fork_reporter: Arc<dyn ForkReporter>,
    /// Ids of the last accepted blocks, oldest first
    last_block_ids: VecDeque<String>,
    receipt_filters: Vec<Box<dyn VerifyFilter>>,
    block_filters: Vec<Box<dyn VerifyFilter>>,
}

impl BlockVerifier {
    pub fn new(
        block_logic: Arc<BlockLogic>,
        constants: Arc<Constants>,
        fork_reporter: Arc<dyn ForkReporter>,
    ) -> BlockVerifier {
        BlockVerifier {
            last_block_ids: VecDeque::with_capacity(constants.block_slot_window),
            block_logic,
            constants,
            fork_reporter,
            receipt_filters: Vec::new(),
            block_filters: Vec::new(),
        }
    }

    pub fn add_receipt_filter(&mut self, filter: Box<dyn VerifyFilter>) {
        self.receipt_filters.push(filter);
    }

    pub fn add_block_filter(&mut self, filter: Box<dyn VerifyFilter>) {
        self.block_filters.push(filter);
    }

    pub fn last_block_ids(&self) -> impl Iterator<Item = &String> {
        self.last_block_ids.iter()
    }

    /// Seeds the known-id window from the stored chain.
    pub fn on_blockchain_ready(&mut self, store: &dyn LedgerStore) -> Result<()> {
        let ids = store.last_block_ids(self.constants.block_slot_window)?;
        debug!("Verifier window seeded with {} block ids", ids.len());
        self.last_block_ids = ids.into();
        Ok(())
    }

    pub fn on_new_block(&mut self, block: &Block) {
        self.last_block_ids.push_back(block.id.clone());
        while self.last_block_ids.len() > self.constants.block_slot_window {
            self.last_block_ids.pop_front();
        }
    }

    pub fn on_block_deleted(&mut self, block_id: &str) {
        self.last_block_ids.retain(|id| id != block_id);
    }

    /// Light checks deciding whether a block from the network is worth
    /// processing.
    pub fn verify_receipt(&self, block: &Block) -> VerificationResult {
        let mut errors = Vec::new();
        if self.last_block_ids.iter().any(|id| *id == block.id) {
            errors.push("Block Already exists in the chain".to_string());
        }
        self.verify_signature(block, &mut errors);
        if block.previous_block.is_none() {
            errors.push("Invalid previous block".to_string());
        }
        self.verify_version(block, &mut errors);
        self.verify_id(block, &mut errors);
        self.verify_payload(block, &mut errors);

        let result = VerificationResult::from_errors(errors);
        apply_filters(&self.receipt_filters, result, block)
    }

    /// Checks for the block a chain starts from: height 1, no parent and the
    /// same signature, id and payload rules as any other block.
    pub fn verify_genesis(&self, block: &Block) -> VerificationResult {
        let mut errors = Vec::new();
        self.verify_signature(block, &mut errors);
        if block.height != 1 || block.previous_block.is_some() {
            errors.push("Genesis block must have height 1 and no previous block".to_string());
        }
        self.verify_version(block, &mut errors);
        self.verify_id(block, &mut errors);
        self.verify_payload(block, &mut errors);
        VerificationResult::from_errors(errors)
    }

    /// Full checks against the current tip before a block is applied.
    pub fn verify_block(&self, block: &Block, last_block: &Block) -> VerificationResult {
        let mut errors = Vec::new();
        self.verify_signature(block, &mut errors);
        self.verify_previous_block(block, last_block, &mut errors);
        self.verify_version(block, &mut errors);

        let expected_reward = self
            .block_logic
            .rewards()
            .calc_reward(last_block.height + 1);
        if block.reward != expected_reward {
            errors.push(format!(
                "Invalid block reward: {} expected: {expected_reward}",
                block.reward
            ));
        }

        self.verify_id(block, &mut errors);
        self.verify_payload(block, &mut errors);

        let result = VerificationResult::from_errors(errors);
        apply_filters(&self.block_filters, result, block)
    }

    fn verify_signature(&self, block: &Block, errors: &mut Vec<String>) {
        match self.block_logic.verify_signature(block) {
            Ok(true) => {}
            Ok(false) => errors.push("Failed to verify block signature".to_string()),
            Err(e) => errors.push(format!("Error: {e}")),
        }
    }

    fn verify_previous_block(&self, block: &Block, last_block: &Block, errors: &mut Vec<String>) {
        match &block.previous_block {
            None => errors.push("Invalid previous block".to_string()),
            Some(previous) if *previous != last_block.id => {
                notify_fork(
                    self.fork_reporter.as_ref(),
                    block,
                    ForkType::WrongPreviousBlock,
                );
                errors.push(format!(
                    "Invalid previous block: {previous} expected {}",
                    last_block.id
                ));
            }
            Some(_) => {}
        }
    }

    fn verify_version(&self, block: &Block, errors: &mut Vec<String>) {
        if block.version != BLOCK_VERSION {
            errors.push("Invalid block version".to_string());
        }
    }

    fn verify_id(&self, block: &Block, errors: &mut Vec<String>) {
        match self.block_logic.get_id(block) {
            Ok(id) if id == block.id => {}
            Ok(id) => errors.push(format!("BlockID: Expected {id} - Received {}", block.id)),
            Err(e) => errors.push(format!("Error: {e}")),
        }
    }

    fn verify_payload(&self, block: &Block, errors: &mut Vec<String>) {
        if block.payload_length as usize > self.constants.max_payload_length {
            errors.push("Payload length is too long".to_string());
        }
        if block.transactions.len() != block.number_of_transactions as usize {
            errors.push("Included transactions do not match block transactions count".to_string());
        }
        if block.transactions.len() > self.constants.max_txs_per_block {
            errors.push("Number of transactions exceeds maximum per block".to_string());
        }

        let tx_logic = self.block_logic.transaction_logic();
        let mut payload = Context::new(&SHA256);
        let mut seen = HashSet::new();
        let mut total_amount: u128 = 0;
        let mut total_fee: u128 = 0;
        for tx in &block.transactions {
            match tx_logic.get_bytes(tx, false, false) {
                Ok(bytes) => payload.update(&bytes),
                Err(e) => errors.push(format!("Error: {e}")),
            }
            if !seen.insert(tx.id.as_str()) {
                errors.push(format!("Encountered duplicate transaction: {}", tx.id));
            }
            total_amount += u128::from(tx.amount);
            total_fee += u128::from(tx.fee);
        }

        if payload.finish().as_ref() != block.payload_hash.as_slice() {
            errors.push("Invalid payload hash".to_string());
        }
        if total_amount != u128::from(block.total_amount) {
            errors.push("Invalid total amount".to_string());
        }
        if total_fee != u128::from(block.total_fee) {
            errors.push("Invalid total fee".to_string());
        }
    }
}

fn apply_filters(
    filters: &[Box<dyn VerifyFilter>],
    mut result: VerificationResult,
    block: &Block,
) -> VerificationResult {
    for filter in filters {
        result = filter.filter(result, block);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::{Transaction, TransactionLogic};
    use crate::core::tx_types::{TransactionKind, TransactionRegistry};
    use crate::utils::Keypair;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(String, ForkType)>>);

    impl ForkReporter for Recorder {
        fn report(&self, block: &Block, fork: ForkType) -> Result<()> {
            self.0
                .lock()
                .map_err(|_| crate::error::ChainError::storage("poisoned"))?
                .push((block.id.clone(), fork));
            Ok(())
        }
    }

    struct Fixture {
        logic: Arc<BlockLogic>,
        verifier: BlockVerifier,
        recorder: Arc<Recorder>,
        forger: Keypair,
        tip: Block,
    }

    fn fixture() -> Fixture {
        let constants = Arc::new(Constants::default());
        let tx_logic = Arc::new(TransactionLogic::new(
            constants.clone(),
            TransactionRegistry::with_defaults(),
        ));
        let logic = Arc::new(BlockLogic::new(constants.clone(), tx_logic));
        let recorder = Arc::new(Recorder::default());
        let verifier = BlockVerifier::new(logic.clone(), constants, recorder.clone());
        let tip = Block {
            id: "10000000000000000001".to_string(),
            height: 10,
            ..Default::default()
        };
        Fixture {
            logic,
            verifier,
            recorder,
            forger: Keypair::from_secret("forger").unwrap(),
            tip,
        }
    }

    fn sends(logic: &BlockLogic, count: u64) -> Vec<Transaction> {
        let sender = Keypair::from_secret("sender").unwrap();
        (1..=count)
            .map(|amount| {
                logic
                    .transaction_logic()
                    .create(
                        &sender,
                        None,
                        Transaction {
                            tx_type: TransactionKind::Send as u8,
                            recipient_id: Some("58191285901858109R".to_string()),
                            amount,
                            fee: 10_000_000,
                            ..Default::default()
                        },
                    )
                    .unwrap()
            })
            .collect()
    }

    /// Re-signs `block` after a header change so only the intended check fails.
    fn resign(f: &Fixture, mut block: Block) -> Block {
        block.block_signature = f.logic.sign(&f.forger, &block).unwrap();
        block.id = f.logic.get_id(&block).unwrap();
        block
    }

    #[test]
    fn test_valid_block_passes() {
        let f = fixture();
        let block = f
            .logic
            .create(&f.forger, 10, &sends(&f.logic, 2), Some(&f.tip))
            .unwrap();
        assert_eq!(
            f.verifier.verify_block(&block, &f.tip),
            VerificationResult {
                verified: true,
                errors: Vec::new()
            }
        );
        assert!(f.verifier.verify_receipt(&block).verified);
    }

    #[test]
    fn test_invalid_id() {
        let f = fixture();
        let mut block = f.logic.create(&f.forger, 10, &[], Some(&f.tip)).unwrap();
        block.id = "1".to_string();
        let result = f.verifier.verify_receipt(&block);
        assert!(!result.verified);
        assert!(result.errors[0].starts_with("BlockID: Expected "));
        assert!(result.errors[0].ends_with(" - Received 1"));
    }

    #[test]
    fn test_bad_signature_is_the_only_error() {
        let f = fixture();
        let mut block = f.logic.create(&f.forger, 10, &[], Some(&f.tip)).unwrap();
        block.block_signature = vec![0xaa; 64];
        block.id = f.logic.get_id(&block).unwrap();
        let result = f.verifier.verify_block(&block, &f.tip);
        assert_eq!(result.errors, vec!["Failed to verify block signature"]);
    }

    #[test]
    fn test_oversized_payload_still_runs_other_checks() {
        let f = fixture();
        let mut block = f.logic.create(&f.forger, 10, &[], Some(&f.tip)).unwrap();
        block.payload_length = 1024 * 1024 + 1;
        block.version = 1;
        let result = f.verifier.verify_block(&block, &f.tip);
        assert!(!result.verified);
        assert!(result.errors.contains(&"Payload length is too long".to_string()));
        assert!(result.errors.contains(&"Failed to verify block signature".to_string()));
        assert!(result.errors.contains(&"Invalid block version".to_string()));
    }

    #[test]
    fn test_fork_one_is_reported() {
        let f = fixture();
        let other = Block {
            id: "2".to_string(),
            height: 10,
            ..Default::default()
        };
        let block = f.logic.create(&f.forger, 10, &[], Some(&other)).unwrap();
        let result = f.verifier.verify_block(&block, &f.tip);
        assert!(result
            .errors
            .contains(&format!("Invalid previous block: 2 expected {}", f.tip.id)));
        assert_eq!(
            f.recorder.0.lock().unwrap().as_slice(),
            &[(block.id.clone(), ForkType::WrongPreviousBlock)]
        );

        // receipt checks never report forks
        f.verifier.verify_receipt(&block);
        assert_eq!(f.recorder.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_payload_mismatches() {
        let f = fixture();
        let txs = sends(&f.logic, 3);
        let block = f.logic.create(&f.forger, 10, &txs, Some(&f.tip)).unwrap();

        let mut counted = block.clone();
        counted.number_of_transactions += 1;
        let errors = f.verifier.verify_block(&resign(&f, counted), &f.tip).errors;
        assert_eq!(
            errors,
            vec!["Included transactions do not match block transactions count"]
        );

        let mut duplicated = block.clone();
        duplicated.transactions.push(txs[0].clone());
        let errors = f.verifier.verify_block(&resign(&f, duplicated), &f.tip).errors;
        assert!(errors.contains(&format!("Encountered duplicate transaction: {}", txs[0].id)));
        assert!(errors.contains(&"Invalid payload hash".to_string()));
        assert!(errors.contains(&"Invalid total amount".to_string()));
        assert!(errors.contains(&"Invalid total fee".to_string()));

        let mut rewarded = block.clone();
        rewarded.reward += 1;
        let errors = f.verifier.verify_block(&resign(&f, rewarded), &f.tip).errors;
        assert_eq!(
            errors,
            vec![format!(
                "Invalid block reward: {} expected: {}",
                block.reward + 1,
                block.reward
            )]
        );
    }

    #[test]
    fn test_known_block_window() {
        let mut f = fixture();
        let block = f.logic.create(&f.forger, 10, &[], Some(&f.tip)).unwrap();
        f.verifier.on_new_block(&block);
        assert!(f
            .verifier
            .verify_receipt(&block)
            .errors
            .contains(&"Block Already exists in the chain".to_string()));

        for i in 0..5 {
            f.verifier.on_new_block(&Block {
                id: i.to_string(),
                ..Default::default()
            });
        }
        assert_eq!(f.verifier.last_block_ids().count(), 5);
        assert!(f.verifier.verify_receipt(&block).verified);
    }

    #[test]
    fn test_receipt_requires_previous_block() {
        let f = fixture();
        let genesis = f.logic.create(&f.forger, 0, &sends(&f.logic, 1), None).unwrap();
        assert_eq!(
            f.verifier.verify_receipt(&genesis).errors,
            vec!["Invalid previous block"]
        );
        assert!(f.verifier.verify_genesis(&genesis).verified);

        let child = f.logic.create(&f.forger, 10, &[], Some(&genesis)).unwrap();
        assert_eq!(
            f.verifier.verify_genesis(&child).errors,
            vec!["Genesis block must have height 1 and no previous block"]
        );
    }

    struct Veto;

    impl VerifyFilter for Veto {
        fn filter(&self, mut result: VerificationResult, _block: &Block) -> VerificationResult {
            result.errors.push("vetoed".to_string());
            result.verified = false;
            result
        }
    }

    #[test]
    fn test_filters_see_the_verdict() {
        let mut f = fixture();
        f.verifier.add_block_filter(Box::new(Veto));
        let block = f.logic.create(&f.forger, 10, &[], Some(&f.tip)).unwrap();
        assert_eq!(f.verifier.verify_block(&block, &f.tip).errors, vec!["vetoed"]);
        assert!(f.verifier.verify_receipt(&block).verified);
    }
}
