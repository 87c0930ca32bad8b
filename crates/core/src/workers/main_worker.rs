//! The main projection: balances, per-address transaction indices, the
//! delegation state machine, tokens and forging sums.

use super::{spawn_worker, WorkerHandle};
use crate::storage::{keys, records, Batch, KvStore};
use anyhow::{bail, Context};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use torrent_node_config::types::Modules;
use torrent_node_types::transaction::int_status;
use torrent_node_types::{
    Address, BalanceInfo, BlockInfo, DelegateHelper, DelegateState, ForgingSums, Token, TokenInfo,
    TransactionInfo, TransactionStatus, TxStatusKind, WorkerCursor,
};

/// Per-block LIFO of delegate row keys created inside the running batch,
/// keyed by the `from;to` pair.
type DelegateCache = HashMap<Vec<u8>, Vec<Vec<u8>>>;

/// Burn-address sentinel, excluded from state-block assertions.
static ZERO_ADDRESS: Lazy<Address> = Lazy::new(|| Address::new(vec![0u8; 25]));

pub struct MainWorker {
    kv: Arc<KvStore>,
    modules: Modules,
    validate_states: bool,
    count_val: u64,
    last_saved_block: u64,
}

impl MainWorker {
    pub fn new(
        kv: Arc<KvStore>,
        modules: Modules,
        validate_states: bool,
    ) -> anyhow::Result<MainWorker> {
        let cursor = records::find_main_cursor(&kv)?;
        Ok(MainWorker {
            kv,
            modules,
            validate_states,
            count_val: cursor.count_val,
            last_saved_block: cursor.block_number,
        })
    }

    /// Block number the worker will resume after.
    pub fn init_block_number(&self) -> u64 {
        self.last_saved_block
    }

    pub fn spawn(self) -> WorkerHandle {
        spawn_worker("main", self, |worker, block| worker.apply_block(&block))
    }

    fn next_count_val(&mut self) -> u64 {
        self.count_val += 1;
        self.count_val
    }

    /// Applies one linked main block; the idempotence guard makes a
    /// re-apply a no-op.
    pub fn apply_block(&mut self, block: &BlockInfo) -> anyhow::Result<()> {
        let block_number = block
            .header
            .block_number
            .context("worker received an unlinked block")?;

        let cursor = records::find_main_cursor(&self.kv)?;
        if block_number <= cursor.block_number {
            return Ok(());
        }
        if let Some(prev) = &cursor.block_hash {
            if *prev != block.header.prev_hash {
                bail!(
                    "main worker linearity check failed: expected prev {prev}, block {} has {}",
                    block_number,
                    block.header.prev_hash
                );
            }
        }

        let started = Instant::now();
        let mut common_balance = records::find_common_balance(&self.kv)?;
        let update_common_balance = common_balance.block_number < block_number;

        let mut batch = Batch::new();
        let mut delegate_cache = DelegateCache::new();
        let mut balances: HashMap<Address, BalanceInfo> = HashMap::new();

        if block.header.is_simple_block() || block.header.is_forging_block() {
            for tx in &block.txs {
                self.apply_transaction(
                    block,
                    block_number,
                    tx,
                    &mut batch,
                    &mut delegate_cache,
                    &mut balances,
                )?;

                if self.modules.contains(Modules::BLOCK)
                    && update_common_balance
                    && (tx.from_address.is_initial_wallet() || block.header.is_forging_block())
                {
                    common_balance.money += tx.value;
                    common_balance.block_number = block_number;
                }
            }
        } else if block.header.is_state_block() {
            self.validate_state_block(block)?;
        }

        if block.header.is_forging_block() {
            let mut sums = make_forging_sums(block, block_number);
            sums.merge(&records::find_forging_sums(&self.kv)?);
            batch.put_record(keys::FORGING_SUMS_KEY.to_vec(), &sums)?;
        }

        if self.modules.contains(Modules::BALANCE) {
            for (address, delta) in &balances {
                let old = records::find_balance(&self.kv, address)?;
                if old.block_number < block_number {
                    let mut merged = old;
                    merged.merge(delta);
                    if merged.received() < merged.spent() {
                        tracing::warn!(address = %address, "balance went negative");
                    }
                    batch.put_record(keys::balance(address), &merged)?;
                }
            }
        }

        if self.modules.contains(Modules::BLOCK) {
            batch.put_record(keys::COMMON_BALANCE_KEY.to_vec(), &common_balance)?;
        }

        batch.put_record(
            keys::MAIN_CURSOR_KEY.to_vec(),
            &WorkerCursor::new(block_number, block.header.hash, self.count_val),
        )?;
        self.kv.write(batch)?;
        self.last_saved_block = block_number;

        tracing::info!(
            block = block_number,
            txs = block.txs.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "block saved"
        );
        Ok(())
    }

    fn apply_transaction(
        &mut self,
        block: &BlockInfo,
        block_number: u64,
        tx: &TransactionInfo,
        batch: &mut Batch,
        delegate_cache: &mut DelegateCache,
        balances: &mut HashMap<Address, BalanceInfo>,
    ) -> anyhow::Result<()> {
        let any_index_module = self.modules.contains(Modules::BALANCE)
            || self.modules.contains(Modules::TXS)
            || self.modules.contains(Modules::ADDR_TXS);
        if !any_index_module {
            return Ok(());
        }

        let delegate_status = self.instant_delegate_status(tx, block_number, delegate_cache, batch)?;

        self.index_address_side(block, tx, &tx.from_address, &delegate_status, batch, balances)?;
        if tx.from_address != tx.to_address {
            self.index_address_side(block, tx, &tx.to_address, &delegate_status, batch, balances)?;
        }

        if self.modules.contains(Modules::TXS) {
            batch.put_record(keys::transaction(&tx.hash), tx)?;
            if let Some(status) = &delegate_status {
                batch.put_record(keys::transaction_status(&status.transaction), status)?;
            }
            if let Some(token_info) = &tx.token_info {
                if !tx.is_status_not_success() {
                    self.apply_token_registry_op(tx, token_info, batch)?;
                }
            }
        }

        if self.modules.contains(Modules::BALANCE) {
            if let Some(token_info) = &tx.token_info {
                apply_token_balances(tx, token_info, balances);
            }
        }
        Ok(())
    }

    fn index_address_side(
        &mut self,
        block: &BlockInfo,
        tx: &TransactionInfo,
        address: &Address,
        delegate_status: &Option<TransactionStatus>,
        batch: &mut Batch,
        balances: &mut HashMap<Address, BalanceInfo>,
    ) -> anyhow::Result<()> {
        if address.is_initial_wallet() || tx.is_status_node_test() {
            return Ok(());
        }

        if self.modules.contains(Modules::ADDR_TXS) {
            let undelegate_value = delegate_status.as_ref().and_then(|status| {
                match &status.status {
                    TxStatusKind::UnDelegate { value, .. } => Some(*value),
                    _ => None,
                }
            });
            let row = torrent_node_types::AddressInfo {
                file_pos: tx.file_pos.clone(),
                block_number: tx.block_number,
                block_index: tx.block_index,
                undelegate_value,
            };
            let counter = self.next_count_val();
            batch.put_record(keys::address_row(address, counter), &row)?;

            if let Some(status) = delegate_status {
                batch.put_record(keys::address_status(address, &status.transaction), status)?;
            }
        }

        if self.modules.contains(Modules::BALANCE) {
            let balance = balances.entry(address.clone()).or_default();
            balance.plus_without_delegate(
                tx,
                address,
                !tx.is_status_no_balance(),
                block.header.is_forging_block(),
            );
            if tx.delegate.is_some() {
                if let Some(status) = delegate_status {
                    let undelegate_value = match &status.status {
                        TxStatusKind::UnDelegate { value, .. } => Some(*value),
                        _ => None,
                    };
                    balance.plus_with_delegate(tx, address, undelegate_value, status.is_success);
                }
            }
        }
        Ok(())
    }

    /// The delegation state machine. Delegates push a fresh row; an
    /// undelegate pops the newest still-active one (batch first, then
    /// store) and carries its value and hash in the compensating status.
    fn instant_delegate_status(
        &mut self,
        tx: &TransactionInfo,
        block_number: u64,
        delegate_cache: &mut DelegateCache,
        batch: &mut Batch,
    ) -> anyhow::Result<Option<TransactionStatus>> {
        let Some(delegate) = &tx.delegate else {
            return Ok(None);
        };
        let pair = keys::delegate_pair(&tx.from_address, &tx.to_address);
        let helper_key = keys::delegate_helper(&pair);

        // Already applied by an earlier pass over this pair.
        let helper_in_batch: Option<DelegateHelper> = batch.pending_record(&helper_key)?;
        if helper_in_batch.is_none() {
            if let Some(helper) = records::find_delegate_helper(&self.kv, &pair)? {
                if helper.block_number >= block_number {
                    return Ok(None);
                }
            }
        }

        let status = if delegate.is_delegate {
            let is_success = !tx.is_status_not_success();
            if is_success {
                let counter = self.next_count_val();
                let row_key = keys::delegate_row(&pair, counter);
                batch.put_record(
                    row_key.clone(),
                    &DelegateState {
                        value: delegate.value,
                        tx_hash: tx.hash,
                    },
                )?;
                delegate_cache.entry(pair.clone()).or_default().push(row_key);
            }
            TransactionStatus {
                transaction: tx.hash,
                block_number,
                is_success,
                status: TxStatusKind::Delegate,
            }
        } else {
            let state = self.pop_newest_delegation(&pair, delegate_cache, batch)?;
            TransactionStatus {
                transaction: tx.hash,
                block_number,
                is_success: true,
                status: TxStatusKind::UnDelegate {
                    value: state.value,
                    delegate_hash: state.tx_hash,
                },
            }
        };

        batch.put_record(helper_key, &DelegateHelper { block_number })?;
        Ok(Some(status))
    }

    fn pop_newest_delegation(
        &self,
        pair: &[u8],
        delegate_cache: &mut DelegateCache,
        batch: &mut Batch,
    ) -> anyhow::Result<DelegateState> {
        if let Some(stack) = delegate_cache.get_mut(pair) {
            if let Some(row_key) = stack.pop() {
                let state: DelegateState = batch
                    .pending_record(&row_key)?
                    .context("delegate cache points at a missing batch row")?;
                batch.delete(row_key);
                return Ok(state);
            }
        }
        let deleted = batch.deleted_keys();
        if let Some((row_key, state)) = records::find_delegate_row(&self.kv, pair, &deleted)? {
            batch.delete(row_key);
            return Ok(state);
        }
        // Nothing active: the compensation carries a zero value.
        Ok(DelegateState::default())
    }

    fn apply_token_registry_op(
        &self,
        tx: &TransactionInfo,
        token_info: &TokenInfo,
        batch: &mut Batch,
    ) -> anyhow::Result<()> {
        match token_info {
            TokenInfo::Create {
                kind,
                owner,
                decimals,
                value,
                symbol,
                name,
                emission,
                ..
            } => {
                let token = Token {
                    kind: kind.clone(),
                    owner: owner.clone(),
                    decimals: *decimals,
                    begin_value: *value,
                    all_value: *value,
                    symbol: symbol.clone(),
                    name: name.clone(),
                    emission: *emission,
                    tx_hash: tx.hash,
                };
                batch.put_record(keys::token(&tx.to_address), &token)?;
            }
            TokenInfo::ChangeOwner { new_owner } => {
                self.modify_token(&tx.to_address, batch, |token| {
                    token.owner = new_owner.clone();
                })?;
            }
            TokenInfo::ChangeEmission { new_emission } => {
                self.modify_token(&tx.to_address, batch, |token| {
                    token.emission = *new_emission;
                })?;
            }
            TokenInfo::AddTokens { value, .. } => {
                self.modify_token(&tx.to_address, batch, |token| {
                    token.all_value += value;
                })?;
            }
            TokenInfo::MoveTokens { .. } => {}
        }
        Ok(())
    }

    /// Read-modify-write of a token record within the running batch.
    fn modify_token(
        &self,
        token_address: &Address,
        batch: &mut Batch,
        change: impl FnOnce(&mut Token),
    ) -> anyhow::Result<()> {
        let key = keys::token(token_address);
        let mut token = match batch.pending_record::<Token>(&key)? {
            Some(token) => token,
            None => match records::find_token(&self.kv, token_address)? {
                Some(token) => token,
                // Operation on a token that was never created.
                None => return Ok(()),
            },
        };
        change(&mut token);
        batch.put_record(key, &token)?;
        Ok(())
    }

    /// State blocks assert the snapshot of every account as of the
    /// previous block; a mismatch means this node diverged.
    fn validate_state_block(&self, block: &BlockInfo) -> anyhow::Result<()> {
        if !self.validate_states {
            return Ok(());
        }
        for tx in &block.txs {
            let address = &tx.to_address;
            if *address == *ZERO_ADDRESS {
                continue;
            }
            let balance = records::find_balance(&self.kv, address)?;
            if balance.calc_balance_without_delegate() != tx.value as i64 {
                bail!(
                    "state block balance mismatch for {address}: indexed {}, asserted {}",
                    balance.calc_balance_without_delegate(),
                    tx.value
                );
            }

            let Ok(doc) = serde_json::from_slice::<serde_json::Value>(&tx.data) else {
                continue;
            };
            let Some(asserted) = doc.get("delegate_to").and_then(|value| value.as_array()) else {
                continue;
            };
            let mut expected: Vec<(Vec<u8>, u64)> = Vec::new();
            for entry in asserted {
                let target = entry
                    .get("a")
                    .and_then(|value| value.as_str())
                    .and_then(Address::from_hex)
                    .with_context(|| format!("bad delegate_to entry for {address}"))?;
                let value = entry
                    .get("v")
                    .and_then(|value| value.as_u64())
                    .with_context(|| format!("bad delegate_to entry for {address}"))?;
                expected.push((target.as_bytes().to_vec(), value));
            }
            let mut live: Vec<(Vec<u8>, u64)> = Vec::new();
            for (row_key, state) in records::find_all_delegations_from(&self.kv, address)? {
                let target = keys::second_of_delegate_pair(address, &row_key)
                    .with_context(|| format!("bad delegate row under {address}"))?;
                live.push((target, state.value));
            }
            expected.sort();
            live.sort();
            if expected != live {
                bail!("state block delegation mismatch for {address}");
            }
        }
        Ok(())
    }
}

/// Sum of forged values per forging status; every forging status key is
/// present even when the block minted nothing under it.
pub(crate) fn make_forging_sums(block: &BlockInfo, block_number: u64) -> ForgingSums {
    let mut sums = ForgingSums {
        block_number,
        ..ForgingSums::default()
    };
    for status in int_status::FORGING_FAMILY {
        sums.sums.insert(status, 0);
    }
    for tx in &block.txs {
        if tx.is_status_forging() {
            if let Some(status) = tx.int_status {
                *sums.sums.entry(status).or_default() += tx.value;
            }
        }
    }
    sums
}

fn apply_token_balances(
    tx: &TransactionInfo,
    token_info: &TokenInfo,
    balances: &mut HashMap<Address, BalanceInfo>,
) {
    let is_ok = !tx.is_status_not_success();
    match token_info {
        TokenInfo::Create {
            owner,
            value,
            begin_distribution,
            ..
        } => {
            let mut rest = *value;
            for (address, amount) in begin_distribution {
                balances
                    .entry(address.clone())
                    .or_default()
                    .add_tokens(tx, *amount, is_ok);
                rest = rest.saturating_sub(*amount);
            }
            balances
                .entry(owner.clone())
                .or_default()
                .add_tokens(tx, rest, is_ok);
        }
        TokenInfo::AddTokens { to, value } => {
            balances
                .entry(to.clone())
                .or_default()
                .add_tokens(tx, *value, is_ok);
        }
        TokenInfo::MoveTokens { to, value } => {
            balances
                .entry(to.clone())
                .or_default()
                .move_tokens(tx, to, to, *value, is_ok);
            if *to != tx.from_address {
                let from = tx.from_address.clone();
                balances
                    .entry(from.clone())
                    .or_default()
                    .move_tokens(tx, &from, to, *value, is_ok);
            }
        }
        TokenInfo::ChangeOwner { .. } | TokenInfo::ChangeEmission { .. } => {}
    }
}
