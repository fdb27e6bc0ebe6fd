use super::{invalid_asset, TransactionKind, TransactionType, TxContext};
use crate::config::{Constants, FeeMilestone};
use crate::consensus::rounds::calc_round;
use crate::core::account::{merge_balance_diff, Account, RoundRef};
use crate::core::block::Block;
use crate::core::transaction::{Transaction, TransactionAsset};
use crate::error::{ChainError, Result};
use crate::storage::db_ops::{row, DbOp, Row, Table};
use num_bigint::BigInt;

/// Hook run over the ops produced by a confirmed send, in registration order.
pub trait OpsFilter: Send + Sync {
    fn filter(&self, ops: Vec<DbOp>, tx: &Transaction, block: &Block) -> Result<Vec<DbOp>>;
}

/// Plain value transfer, optionally carrying a short data field.
#[derive(Default)]
pub struct SendTransaction {
    apply_filters: Vec<Box<dyn OpsFilter>>,
    undo_filters: Vec<Box<dyn OpsFilter>>,
}

impl SendTransaction {
    pub fn new() -> SendTransaction {
        SendTransaction::default()
    }

    pub fn with_apply_filter(mut self, filter: Box<dyn OpsFilter>) -> SendTransaction {
        self.apply_filters.push(filter);
        self
    }

    pub fn with_undo_filter(mut self, filter: Box<dyn OpsFilter>) -> SendTransaction {
        self.undo_filters.push(filter);
        self
    }

    fn data(tx: &Transaction) -> Result<Option<&str>> {
        match &tx.asset {
            None => Ok(None),
            Some(TransactionAsset::Send { data }) => Ok(Some(data)),
            Some(TransactionAsset::Other(map)) if map.is_empty() => Ok(None),
            Some(_) => Err(invalid_asset(tx)),
        }
    }

    fn recipient(tx: &Transaction) -> Result<&str> {
        tx.recipient_id
            .as_deref()
            .ok_or_else(|| ChainError::tx("Missing recipient"))
    }

    fn round_of(block: &Block, ctx: &TxContext<'_>) -> RoundRef {
        RoundRef {
            block_id: block.id.clone(),
            round: calc_round(block.height, ctx.constants.active_delegates),
        }
    }

    fn run_filters(
        filters: &[Box<dyn OpsFilter>],
        mut ops: Vec<DbOp>,
        tx: &Transaction,
        block: &Block,
    ) -> Result<Vec<DbOp>> {
        for filter in filters {
            ops = filter.filter(ops, tx, block)?;
        }
        Ok(ops)
    }
}

impl TransactionType for SendTransaction {
    fn kind(&self) -> TransactionKind {
        TransactionKind::Send
    }

    fn calculate_min_fee(
        &self,
        tx: &Transaction,
        _sender: &Account,
        fees: &FeeMilestone,
    ) -> Result<u64> {
        let data_len = Self::data(tx)?.map_or(0, str::len) as u64;
        Ok(fees.send + data_len * fees.send_data_multiplier)
    }

    fn asset_bytes(&self, tx: &Transaction) -> Result<Vec<u8>> {
        Ok(Self::data(tx)?.map(|d| d.as_bytes().to_vec()).unwrap_or_default())
    }

    fn verify(&self, tx: &Transaction, _sender: &Account, ctx: &TxContext<'_>) -> Result<()> {
        Self::recipient(tx)?;
        if tx.amount == 0 {
            return Err(ChainError::tx("Invalid transaction amount"));
        }
        let max = ctx.constants.send_data_max_length;
        if Self::data(tx)?.map_or(0, str::len) > max {
            return Err(ChainError::tx(format!(
                "Cannot send more than {max} bytes in data field"
            )));
        }
        Ok(())
    }

    fn apply(
        &self,
        tx: &Transaction,
        block: &Block,
        _sender: &mut Account,
        ctx: &TxContext<'_>,
    ) -> Result<Vec<DbOp>> {
        let recipient = Self::recipient(tx)?;
        let round = Self::round_of(block, ctx);
        let ops = merge_balance_diff(recipient, tx.amount, tx.amount, Some(&round));
        Self::run_filters(&self.apply_filters, ops, tx, block)
    }

    fn undo(
        &self,
        tx: &Transaction,
        block: &Block,
        _sender: &mut Account,
        ctx: &TxContext<'_>,
    ) -> Result<Vec<DbOp>> {
        let recipient = Self::recipient(tx)?;
        let round = Self::round_of(block, ctx);
        let amount = -BigInt::from(tx.amount);
        let ops = merge_balance_diff(recipient, amount.clone(), amount, Some(&round));
        Self::run_filters(&self.undo_filters, ops, tx, block)
    }

    fn object_normalize(&self, tx: Transaction, constants: &Constants) -> Result<Transaction> {
        if let Some(data) = Self::data(&tx)? {
            if data.len() > constants.send_data_max_length {
                return Err(ChainError::schema(
                    "asset.data",
                    format!(
                        "String is too long ({} chars), maximum {}",
                        data.len(),
                        constants.send_data_max_length
                    ),
                ));
            }
        }
        Ok(tx)
    }

    fn db_save(&self, tx: &Transaction) -> Result<Option<DbOp>> {
        Ok(Self::data(tx)?.map(|data| DbOp::Create {
            table: Table::SendAssets,
            values: row([("transactionId", tx.id.as_str()), ("data", data)]),
        }))
    }

    fn asset_table(&self) -> Option<Table> {
        Some(Table::SendAssets)
    }

    fn asset_from_row(&self, row: &Row) -> Result<Option<TransactionAsset>> {
        Ok(row
            .get("data")
            .and_then(|v| v.as_str())
            .map(|data| TransactionAsset::Send {
                data: data.to_string(),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db_ops::CustomQuery;
    use crate::storage::memory::MemoryLedger;

    struct Tag;

    impl OpsFilter for Tag {
        fn filter(&self, mut ops: Vec<DbOp>, tx: &Transaction, _block: &Block) -> Result<Vec<DbOp>> {
            ops.push(DbOp::Custom(CustomQuery::RecalcVotes { round: u64::from(tx.tx_type) }));
            Ok(ops)
        }
    }

    fn send_with_data(data: &str) -> Transaction {
        Transaction {
            recipient_id: Some("1R".to_string()),
            amount: 5,
            asset: Some(TransactionAsset::Send {
                data: data.to_string(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_data_raises_min_fee() {
        let constants = Constants::default();
        let fees = constants.fees[0];
        let handler = SendTransaction::new();
        let sender = Account::default();
        assert_eq!(
            handler
                .calculate_min_fee(&send_with_data(""), &sender, &fees)
                .unwrap(),
            10_000_000
        );
        assert_eq!(
            handler
                .calculate_min_fee(&send_with_data("abc"), &sender, &fees)
                .unwrap(),
            13_000_000
        );
    }

    #[test]
    fn test_verify_rules() {
        let constants = Constants::default();
        let store = MemoryLedger::new();
        let ctx = TxContext::new(&constants, &store, 2);
        let handler = SendTransaction::new();
        let sender = Account::default();

        assert!(handler.verify(&send_with_data("hi"), &sender, &ctx).is_ok());

        let mut no_recipient = send_with_data("hi");
        no_recipient.recipient_id = None;
        assert_eq!(
            handler.verify(&no_recipient, &sender, &ctx),
            Err(ChainError::tx("Missing recipient"))
        );

        let mut zero = send_with_data("");
        zero.amount = 0;
        assert!(handler.verify(&zero, &sender, &ctx).is_err());

        let long = send_with_data(&"x".repeat(129));
        assert!(handler.verify(&long, &sender, &ctx).is_err());
        assert!(handler.object_normalize(long, &constants).is_err());
    }

    #[test]
    fn test_filters_run_in_order_on_apply() {
        let constants = Constants::default();
        let store = MemoryLedger::new();
        let ctx = TxContext::new(&constants, &store, 2);
        let handler = SendTransaction::new().with_apply_filter(Box::new(Tag));
        let block = Block {
            id: "9".to_string(),
            height: 2,
            ..Default::default()
        };
        let mut sender = Account::default();

        let ops = handler
            .apply(&send_with_data(""), &block, &mut sender, &ctx)
            .unwrap();
        assert!(matches!(ops.last(), Some(DbOp::Custom(CustomQuery::RecalcVotes { .. }))));

        let undo = handler
            .undo(&send_with_data(""), &block, &mut sender, &ctx)
            .unwrap();
        assert!(!matches!(undo.last(), Some(DbOp::Custom(CustomQuery::RecalcVotes { .. }))));
    }
}
