//! Contract projection: runs each contract transaction through the
//! external execution oracle and persists the resulting contract state in
//! the worker's own store.

use super::oracle::{OracleClient, OracleError};
use super::WorkerHandle;
use crate::storage::{keys, records, Batch, KvStore};
use anyhow::{bail, Context};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use torrent_node_config::types::Modules;
use torrent_node_types::{
    Address, BlockInfo, ContractCode, ContractDetails, ContractErrorKind, ContractState,
    ContractStatus, ScriptKind, TransactionInfo, TransactionStatus, TxStatusKind, WorkerCursor,
};

pub struct ScriptWorker {
    /// The worker's own store for contract state, details and code.
    contract_kv: Arc<KvStore>,
    /// The main store, receiving transaction and address statuses.
    kv: Arc<KvStore>,
    oracle: OracleClient,
    modules: Modules,
    init_block_number: u64,
}

impl ScriptWorker {
    pub fn new(
        contract_kv: Arc<KvStore>,
        kv: Arc<KvStore>,
        oracle: OracleClient,
        modules: Modules,
    ) -> anyhow::Result<ScriptWorker> {
        let cursor = records::find_contract_cursor(&contract_kv)?;
        Ok(ScriptWorker {
            contract_kv,
            kv,
            oracle,
            modules,
            init_block_number: cursor.block_number,
        })
    }

    pub fn init_block_number(&self) -> u64 {
        self.init_block_number
    }

    pub fn spawn(mut self) -> WorkerHandle {
        let (sender, mut receiver) = mpsc::channel::<Arc<BlockInfo>>(1);
        let join = tokio::spawn(async move {
            while let Some(block) = receiver.recv().await {
                if let Err(err) = self.apply_block(&block).await {
                    tracing::error!(worker = "script", error = %err, "worker failed, stopping ingestion");
                    return Err(err);
                }
            }
            tracing::info!(worker = "script", "worker drained and stopped");
            Ok(())
        });
        WorkerHandle::from_parts("script", sender, join)
    }

    pub async fn apply_block(&mut self, block: &BlockInfo) -> anyhow::Result<()> {
        let block_number = block
            .header
            .block_number
            .context("worker received an unlinked block")?;

        let cursor = records::find_contract_cursor(&self.contract_kv)?;
        if block_number <= cursor.block_number {
            return Ok(());
        }
        if let Some(prev) = &cursor.block_hash {
            if *prev != block.header.prev_hash {
                bail!(
                    "script worker linearity check failed: expected prev {prev}, block {} has {}",
                    block_number,
                    block.header.prev_hash
                );
            }
        }

        let started = Instant::now();
        let mut batch = Batch::new();
        if block.header.is_simple_block() {
            for tx in &block.txs {
                if tx.script_info.is_none() {
                    continue;
                }
                self.apply_contract_tx(tx, block_number, &mut batch).await?;
            }
        }

        batch.put_record(
            keys::CONTRACT_CURSOR_KEY.to_vec(),
            &WorkerCursor::new(block_number, block.header.hash, 0),
        )?;
        self.contract_kv.write(batch)?;

        tracing::info!(
            block = block_number,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "block saved to contract store"
        );
        Ok(())
    }

    /// Prior state of a contract: the running batch wins over the store.
    fn find_prev_state(
        &self,
        batch: &Batch,
        address: &Address,
    ) -> anyhow::Result<(bool, ContractState)> {
        let key = keys::contract_state(address);
        if let Some(state) = batch.pending_record::<ContractState>(&key)? {
            return Ok((true, state));
        }
        let state = records::find_contract_state(&self.contract_kv, address)?.unwrap_or_default();
        Ok((false, state))
    }

    async fn apply_contract_tx(
        &mut self,
        tx: &TransactionInfo,
        block_number: u64,
        batch: &mut Batch,
    ) -> anyhow::Result<()> {
        let script = tx.script_info.as_ref().expect("caller checked script_info");
        tracing::debug!(tx = %tx.hash, from = %tx.from_address, "contract transaction");

        let status = match script.kind {
            ScriptKind::Compile => {
                let mut state = match self
                    .oracle
                    .compile(&script.raw_tx, &tx.sign, &tx.pub_key, &tx.from_address)
                    .await
                {
                    Ok(state) => state,
                    Err(OracleError::UserError { code, message }) => {
                        bail!("oracle rejected tx {} at protocol level ({code}): {message}", tx.hash)
                    }
                    Err(err) => ContractState {
                        error_kind: ContractErrorKind::ServerError,
                        error_message: err.to_string(),
                        ..ContractState::default()
                    },
                };
                state.block_number = block_number;
                if !state.is_ok() || state.address.is_empty_addr() {
                    state.address = tx.to_address.clone();
                }
                if state.address != tx.to_address {
                    tracing::warn!(tx = %tx.hash, "compiled contract address differs from target");
                }
                let contract = state.address.clone();
                let mut status = contract_status(&state, &contract);

                let (in_batch, prev) = self.find_prev_state(batch, &contract)?;
                if !prev.state.is_empty() && prev.block_number >= block_number && !in_batch {
                    return Ok(());
                }
                if !prev.state.is_empty() {
                    // Re-compile of a live contract: record it as a script
                    // failure, keep the existing state.
                    tracing::info!(tx = %tx.hash, "contract state already exists");
                    status.is_script_error = true;
                    batch.put_record(
                        keys::contract_details(&contract),
                        &ContractDetails {
                            details: prev.details.clone(),
                            last_error: "contract state already exists".to_string(),
                        },
                    )?;
                } else if !state.is_ok() {
                    tracing::info!(tx = %tx.hash, error = %state.error_message, "contract compile failed");
                    batch.put_record(
                        keys::contract_details(&contract),
                        &ContractDetails {
                            details: prev.details.clone(),
                            last_error: state.error_message.clone(),
                        },
                    )?;
                } else {
                    batch.put_record(keys::contract_state(&contract), &state)?;
                    batch.put_record(
                        keys::contract_details(&contract),
                        &ContractDetails {
                            details: state.details.clone(),
                            last_error: String::new(),
                        },
                    )?;
                    batch.put_record(
                        keys::contract_code(&contract),
                        &ContractCode {
                            code: tx.data.clone(),
                        },
                    )?;
                }
                status
            }
            ScriptKind::Run | ScriptKind::Pay => {
                let contract = tx.to_address.clone();
                let (in_batch, prev) = self.find_prev_state(batch, &contract)?;
                if !prev.state.is_empty() && prev.block_number >= block_number && !in_batch {
                    return Ok(());
                }

                let mut state = if prev.state.is_empty() {
                    ContractState {
                        block_number,
                        error_kind: ContractErrorKind::ScriptError,
                        error_message: format!("no compiled contract at {contract}"),
                        ..ContractState::default()
                    }
                } else {
                    match self
                        .oracle
                        .run(&script.raw_tx, &tx.sign, &tx.pub_key, &contract, &prev.state)
                        .await
                    {
                        Ok(state) => state,
                        Err(OracleError::UserError { code, message }) => {
                            bail!(
                                "oracle rejected tx {} at protocol level ({code}): {message}",
                                tx.hash
                            )
                        }
                        Err(err) => ContractState {
                            error_kind: ContractErrorKind::ServerError,
                            error_message: err.to_string(),
                            ..ContractState::default()
                        },
                    }
                };
                state.block_number = block_number;
                state.address = contract.clone();
                let status = contract_status(&state, &contract);

                if !state.is_ok() {
                    tracing::info!(tx = %tx.hash, error = %state.error_message, "contract run failed");
                    batch.put_record(
                        keys::contract_details(&contract),
                        &ContractDetails {
                            details: prev.details.clone(),
                            last_error: state.error_message.clone(),
                        },
                    )?;
                } else {
                    batch.put_record(keys::contract_state(&contract), &state)?;
                    batch.put_record(
                        keys::contract_details(&contract),
                        &ContractDetails {
                            details: state.details.clone(),
                            last_error: String::new(),
                        },
                    )?;
                }
                status
            }
            ScriptKind::Unknown => {
                let contract = tx.to_address.clone();
                let state = ContractState {
                    block_number,
                    error_kind: ContractErrorKind::ScriptError,
                    error_message: format!("no contract body at {contract}"),
                    ..ContractState::default()
                };
                let status = contract_status(&state, &contract);

                let (in_batch, prev) = self.find_prev_state(batch, &contract)?;
                if !prev.state.is_empty() && prev.block_number >= block_number && !in_batch {
                    return Ok(());
                }
                batch.put_record(
                    keys::contract_details(&contract),
                    &ContractDetails {
                        details: prev.details,
                        last_error: state.error_message.clone(),
                    },
                )?;
                status
            }
        };

        let tx_status = TransactionStatus {
            transaction: tx.hash,
            block_number: tx.block_number,
            is_success: !status.is_script_error && !status.is_server_error,
            status: TxStatusKind::Contract(status),
        };

        // Statuses land in the main store outside the contract batch so
        // read paths over the main store stay self-contained.
        if self.modules.contains(Modules::ADDR_TXS) {
            for address in [&tx.from_address, &tx.to_address] {
                if address.is_initial_wallet() {
                    continue;
                }
                self.kv.put_record(
                    &keys::address_status(address, &tx.hash),
                    &tx_status,
                )?;
                if tx.from_address == tx.to_address {
                    break;
                }
            }
        }
        if self.modules.contains(Modules::TXS) {
            self.kv
                .put_record(&keys::transaction_status(&tx.hash), &tx_status)?;
        }
        Ok(())
    }
}

fn contract_status(state: &ContractState, contract: &Address) -> ContractStatus {
    ContractStatus {
        is_server_error: state.error_kind == ContractErrorKind::ServerError,
        is_script_error: state.error_kind == ContractErrorKind::ScriptError,
        compiled_contract_address: contract.clone(),
    }
}
