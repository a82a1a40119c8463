use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

pub type AccountId = String;
pub type Amount = u64;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient balance in account {account}: has {available}, needs {required}")]
    InsufficientBalance {
        account: AccountId,
        available: Amount,
        required: Amount,
    },
    #[error("total supply overflow")]
    SupplyOverflow,
    #[error("balance overflow in account {account}")]
    BalanceOverflow { account: AccountId },
}

/// A single mint, burn or transfer as reported to the observer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BalanceChange {
    Mint {
        to: AccountId,
        value: Amount,
    },
    Burn {
        from: AccountId,
        value: Amount,
    },
    Transfer {
        from: AccountId,
        to: AccountId,
        value: Amount,
    },
}

impl BalanceChange {
    pub fn value(&self) -> Amount {
        match self {
            BalanceChange::Mint { value, .. }
            | BalanceChange::Burn { value, .. }
            | BalanceChange::Transfer { value, .. } => *value,
        }
    }

    /// Account losing balance, if any.
    pub fn sender(&self) -> Option<&AccountId> {
        match self {
            BalanceChange::Mint { .. } => None,
            BalanceChange::Burn { from, .. } | BalanceChange::Transfer { from, .. } => Some(from),
        }
    }

    /// Account gaining balance, if any.
    pub fn receiver(&self) -> Option<&AccountId> {
        match self {
            BalanceChange::Burn { .. } => None,
            BalanceChange::Mint { to, .. } | BalanceChange::Transfer { to, .. } => Some(to),
        }
    }
}

/// Read side of the balance ledger.
pub trait BalanceLedger {
    fn balance_of(&self, account: &AccountId) -> Amount;
    fn total_supply(&self) -> Amount;
}

/// Notified synchronously, exactly once per balance change, before the
/// change is committed. An error vetoes the change.
pub trait BalanceObserver {
    type Error: From<LedgerError>;

    fn on_balance_change(&mut self, change: &BalanceChange) -> Result<(), Self::Error>;
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("payout rejected: {reason}")]
pub struct PayoutRejected {
    pub reason: String,
}

/// Fallible funds-transfer primitive used to pay out withdrawals.
pub trait FundsTransfer {
    fn pay(&mut self, recipient: &AccountId, amount: Amount) -> Result<(), PayoutRejected>;
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InMemoryLedger {
    balances: BTreeMap<AccountId, Amount>,
    total_supply: Amount,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balances(&self) -> &BTreeMap<AccountId, Amount> {
        &self.balances
    }

    /// Validate `change`, hand it to `observer`, then commit it. Nothing is
    /// written when validation or the observer fails.
    pub fn apply<O: BalanceObserver>(
        &mut self,
        change: BalanceChange,
        observer: &mut O,
    ) -> Result<(), O::Error> {
        self.validate(&change)?;
        observer.on_balance_change(&change)?;
        self.commit(&change);
        Ok(())
    }

    fn validate(&self, change: &BalanceChange) -> Result<(), LedgerError> {
        let value = change.value();
        if let Some(from) = change.sender() {
            let available = self.balance_of(from);
            if available < value {
                return Err(LedgerError::InsufficientBalance {
                    account: from.clone(),
                    available,
                    required: value,
                });
            }
        }
        if let BalanceChange::Mint { to, .. } = change {
            self.total_supply
                .checked_add(value)
                .ok_or(LedgerError::SupplyOverflow)?;
            self.balance_of(to)
                .checked_add(value)
                .ok_or_else(|| LedgerError::BalanceOverflow { account: to.clone() })?;
        }
        Ok(())
    }

    fn commit(&mut self, change: &BalanceChange) {
        let value = change.value();
        if let Some(from) = change.sender() {
            if let Some(balance) = self.balances.get_mut(from) {
                *balance -= value;
            }
        }
        if let Some(to) = change.receiver() {
            *self.balances.entry(to.clone()).or_default() += value;
        }
        match change {
            BalanceChange::Mint { .. } => self.total_supply += value,
            BalanceChange::Burn { .. } => self.total_supply -= value,
            BalanceChange::Transfer { .. } => {}
        }
    }
}

impl BalanceLedger for InMemoryLedger {
    fn balance_of(&self, account: &AccountId) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    fn total_supply(&self) -> Amount {
        self.total_supply
    }
}

/// Holds deposited funds and pays them out. Recipients can be marked as
/// rejecting payments, which makes [`FundsTransfer::pay`] fail for them.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Treasury {
    reserve: Amount,
    paid: BTreeMap<AccountId, Amount>,
    rejecting: BTreeSet<AccountId>,
}

impl Treasury {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn receive(&mut self, amount: Amount) -> Result<(), LedgerError> {
        self.reserve = self
            .reserve
            .checked_add(amount)
            .ok_or(LedgerError::SupplyOverflow)?;
        Ok(())
    }

    pub fn reserve(&self) -> Amount {
        self.reserve
    }

    /// Total funds ever paid to `account`.
    pub fn paid_to(&self, account: &AccountId) -> Amount {
        self.paid.get(account).copied().unwrap_or(0)
    }

    pub fn set_rejecting(&mut self, account: &AccountId, rejecting: bool) {
        if rejecting {
            self.rejecting.insert(account.clone());
        } else {
            self.rejecting.remove(account);
        }
    }
}

impl FundsTransfer for Treasury {
    fn pay(&mut self, recipient: &AccountId, amount: Amount) -> Result<(), PayoutRejected> {
        if self.rejecting.contains(recipient) {
            return Err(PayoutRejected {
                reason: format!("recipient {recipient} does not accept funds"),
            });
        }
        if self.reserve < amount {
            return Err(PayoutRejected {
                reason: format!("reserve of {} cannot cover {amount}", self.reserve),
            });
        }
        self.reserve -= amount;
        let total = self.paid.entry(recipient.clone()).or_default();
        *total = total.saturating_add(amount);
        Ok(())
    }
}
