//! Per-address balance projection.

use crate::primitives::Address;
use crate::transaction::TransactionInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A received/spent accumulator pair. On overflow the pair collapses to
/// `(balance, 0)` so the difference survives even when the running totals do
/// not fit anymore.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceElement {
    received: u64,
    spent: u64,
}

impl BalanceElement {
    pub fn fill(received: u64, spent: u64) -> BalanceElement {
        BalanceElement { received, spent }
    }

    pub fn balance(&self) -> u64 {
        self.received.wrapping_sub(self.spent)
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn spent(&self) -> u64 {
        self.spent
    }

    pub fn receive_value(&mut self, value: u64) {
        if self.received >= u64::MAX - value {
            self.received = self.balance();
            self.spent = 0;
        }
        self.received += value;
    }

    pub fn spent_value(&mut self, value: u64) {
        if self.spent >= u64::MAX - value {
            self.received = self.balance();
            self.spent = 0;
        }
        self.spent += value;
    }
}

/// Delegation accounting attached to a balance once the address has taken
/// part in a delegate transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateBalance {
    pub count_op: u64,
    /// Outgoing side: delegate as "received", undelegate as "spent".
    pub delegate: BalanceElement,
    /// Incoming side, mirrored from the senders delegating to this address.
    pub delegated: BalanceElement,
    /// Value currently locked by in-flight delegations; transiently negative
    /// while a block's deltas are being accumulated.
    pub reserved: i64,
}

impl DelegateBalance {
    pub fn delegate_out(&self) -> u64 {
        self.delegate.received()
    }

    pub fn undelegate_out(&self) -> u64 {
        self.delegate.spent()
    }

    pub fn delegated_in(&self) -> u64 {
        self.delegated.received()
    }

    pub fn undelegated_in(&self) -> u64 {
        self.delegated.spent()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForgedBalance {
    pub count_op: u64,
    pub forged: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBalance {
    pub balance: BalanceElement,
    pub count_op: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub balance: BalanceElement,
    pub count_received: u64,
    pub count_spent: u64,
    pub count_txs: u64,
    pub block_number: u64,
    pub delegated: Option<DelegateBalance>,
    pub forged: Option<ForgedBalance>,
    pub tokens: BTreeMap<Address, TokenBalance>,
}

impl BalanceInfo {
    pub fn received(&self) -> u64 {
        self.balance.received()
    }

    pub fn spent(&self) -> u64 {
        self.balance.spent()
    }

    pub fn calc_balance(&self) -> i64 {
        self.balance.received() as i64 - self.balance.spent() as i64
    }

    /// Spendable balance plus the value parked in active delegations; the
    /// quantity state blocks assert.
    pub fn calc_balance_without_delegate(&self) -> i64 {
        let delegated = self
            .delegated
            .as_ref()
            .map(|d| d.delegate_out() as i64 - d.undelegate_out() as i64)
            .unwrap_or(0);
        self.calc_balance() + delegated
    }

    /// Applies a plain value transfer to this address's side of the ledger.
    pub fn plus_without_delegate(
        &mut self,
        tx: &TransactionInfo,
        address: &Address,
        change_balance: bool,
        is_forging: bool,
    ) {
        if &tx.from_address == address {
            self.count_spent += 1;
            if change_balance {
                self.balance.spent_value(tx.value + tx.real_fee());
            }
            self.block_number = self.block_number.max(tx.block_number);
        }
        if &tx.to_address == address {
            self.count_received += 1;
            if change_balance {
                self.balance.receive_value(tx.value);
            }
            self.block_number = self.block_number.max(tx.block_number);
        }

        self.count_txs += 1;

        if let Some(delegate) = &tx.delegate {
            let delegated = self.delegated.get_or_insert_with(DelegateBalance::default);
            if delegate.is_delegate && &tx.from_address == address {
                delegated.reserved += delegate.value as i64;
            }
        }

        if is_forging && &tx.to_address == address {
            let forged = self.forged.get_or_insert_with(ForgedBalance::default);
            forged.count_op += 1;
            forged.forged += tx.value;
        }
    }

    /// Applies the delegate side of a delegate/undelegate transaction.
    /// `undelegate_value` carries the compensated amount for undelegates.
    pub fn plus_with_delegate(
        &mut self,
        tx: &TransactionInfo,
        address: &Address,
        undelegate_value: Option<u64>,
        is_ok_status: bool,
    ) {
        let delegate = tx
            .delegate
            .clone()
            .expect("delegate transaction without delegate info");
        let delegated = self.delegated.get_or_insert_with(DelegateBalance::default);
        delegated.count_op += 1;

        if is_ok_status {
            if &tx.from_address == address {
                if delegate.is_delegate {
                    self.balance.spent_value(delegate.value);
                    self.delegated
                        .as_mut()
                        .unwrap()
                        .delegate
                        .receive_value(delegate.value);
                } else {
                    let value = undelegate_value.expect("undelegate value not set");
                    self.balance.receive_value(value);
                    self.delegated
                        .as_mut()
                        .unwrap()
                        .delegate
                        .spent_value(value);
                }
            }

            if &tx.to_address == address {
                let delegated = self.delegated.as_mut().unwrap();
                if delegate.is_delegate {
                    delegated.delegated.receive_value(delegate.value);
                } else {
                    let value = undelegate_value.expect("undelegate value not set");
                    delegated.delegated.spent_value(value);
                }
            }
        }
        if &tx.from_address == address && delegate.is_delegate {
            self.delegated.as_mut().unwrap().reserved -= delegate.value as i64;
        }
    }

    /// Credits newly created or added token units to this address.
    pub fn add_tokens(&mut self, tx: &TransactionInfo, value: u64, is_ok_status: bool) {
        if !is_ok_status || tx.token_info.is_none() {
            return;
        }
        let entry = self.tokens.entry(tx.to_address.clone()).or_default();
        entry.count_op += 1;
        entry.balance.receive_value(value);
    }

    /// Moves token units between addresses inside the token keyed by the
    /// transaction's target.
    pub fn move_tokens(
        &mut self,
        tx: &TransactionInfo,
        address: &Address,
        to_address: &Address,
        value: u64,
        is_ok_status: bool,
    ) {
        if !is_ok_status || tx.token_info.is_none() {
            return;
        }
        let token_address = tx.to_address.clone();
        if &tx.from_address == address {
            let entry = self.tokens.entry(token_address.clone()).or_default();
            entry.count_op += 1;
            entry.balance.spent_value(value);
        }
        if to_address == address {
            let entry = self.tokens.entry(token_address).or_default();
            entry.count_op += 1;
            entry.balance.receive_value(value);
        }
    }

    /// Folds another balance delta into this one.
    pub fn merge(&mut self, other: &BalanceInfo) {
        self.balance.receive_value(other.balance.received());
        self.count_received += other.count_received;
        self.balance.spent_value(other.balance.spent());
        self.count_spent += other.count_spent;
        self.count_txs += other.count_txs;

        if let Some(other_delegated) = &other.delegated {
            let delegated = self.delegated.get_or_insert_with(DelegateBalance::default);
            delegated.count_op += other_delegated.count_op;
            delegated
                .delegate
                .receive_value(other_delegated.delegate.received());
            delegated
                .delegate
                .spent_value(other_delegated.delegate.spent());
            delegated
                .delegated
                .receive_value(other_delegated.delegated.received());
            delegated
                .delegated
                .spent_value(other_delegated.delegated.spent());
            delegated.reserved += other_delegated.reserved;
        }

        if let Some(other_forged) = &other.forged {
            let forged = self.forged.get_or_insert_with(ForgedBalance::default);
            forged.count_op += other_forged.count_op;
            forged.forged += other_forged.forged;
        }

        for (token, token_balance) in &other.tokens {
            let entry = self.tokens.entry(token.clone()).or_default();
            entry.balance.receive_value(token_balance.balance.received());
            entry.balance.spent_value(token_balance.balance.spent());
            entry.count_op += token_balance.count_op;
        }

        self.block_number = self.block_number.max(other.block_number);
    }
}

/// Total money observed entering circulation (genesis funds and forging).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonBalance {
    pub money: u64,
    pub block_number: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(from: &Address, to: &Address, value: u64, fees: u64, size_raw_tx: u64) -> TransactionInfo {
        TransactionInfo {
            from_address: from.clone(),
            to_address: to.clone(),
            value,
            fees,
            size_raw_tx,
            block_number: 1,
            ..TransactionInfo::default()
        }
    }

    #[test]
    fn transfer_charges_value_plus_real_fee() {
        let from = Address::from_pubkey(b"a");
        let to = Address::from_pubkey(b"b");
        let tx = transfer(&from, &to, 10, 3, 260);

        let mut sender = BalanceInfo::default();
        sender.plus_without_delegate(&tx, &from, true, false);
        assert_eq!(sender.spent(), 13);
        assert_eq!(sender.count_spent, 1);

        let mut receiver = BalanceInfo::default();
        receiver.plus_without_delegate(&tx, &to, true, false);
        assert_eq!(receiver.received(), 10);
        assert_eq!(receiver.count_received, 1);
    }

    #[test]
    fn conservation_across_two_accounts() {
        let a = Address::from_pubkey(b"a");
        let b = Address::from_pubkey(b"b");
        let mut bal_a = BalanceInfo::default();
        let mut bal_b = BalanceInfo::default();
        for (value, from_a) in [(5u64, true), (3, false), (10, true), (2, false)] {
            let (from, to) = if from_a { (&a, &b) } else { (&b, &a) };
            let tx = transfer(from, to, value, 0, 100);
            bal_a.plus_without_delegate(&tx, &a, true, false);
            bal_b.plus_without_delegate(&tx, &b, true, false);
        }
        let net = bal_a.calc_balance() + bal_b.calc_balance();
        assert_eq!(net, 0);
    }

    #[test]
    fn overflow_collapses_to_balance() {
        let mut element = BalanceElement::fill(u64::MAX - 5, 100);
        element.receive_value(10);
        assert_eq!(element.spent(), 0);
        assert_eq!(element.received(), u64::MAX - 105 + 10);
    }

    #[test]
    fn merge_prefers_max_block_number() {
        let mut first = BalanceInfo {
            block_number: 7,
            ..BalanceInfo::default()
        };
        let second = BalanceInfo {
            block_number: 3,
            ..BalanceInfo::default()
        };
        first.merge(&second);
        assert_eq!(first.block_number, 7);
    }

    #[test]
    fn forged_subrecord_tracks_credits() {
        let from = Address::initial_wallet();
        let to = Address::from_pubkey(b"forger");
        let mut tx = transfer(&from, &to, 50, 0, 100);
        tx.int_status = Some(crate::transaction::int_status::FORGING);
        let mut balance = BalanceInfo::default();
        balance.plus_without_delegate(&tx, &to, true, true);
        let forged = balance.forged.unwrap();
        assert_eq!(forged.forged, 50);
        assert_eq!(forged.count_op, 1);
    }
}
