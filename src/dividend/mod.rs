use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::DividendError;
use crate::ledger::{
    AccountId, Amount, BalanceChange, BalanceLedger, BalanceObserver, FundsTransfer,
};
use crate::math::{self, Magnified};

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GlobalState {
    pub magnified_dividend_per_share: Magnified,
    pub total_dividends_distributed: Amount,
    pub total_dividends_withdrawn: Amount,
    /// Scaled remainder dropped by deposit truncation, never redistributed.
    pub magnified_dust: Magnified,
    pub deposit_count: u64,
}

/// Per-holder bookkeeping. A default entry is equivalent to a missing one.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountEntry {
    pub magnified_correction: Magnified,
    pub withdrawn_dividends: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DividendEvent {
    DividendDeposited {
        deposited_by: AccountId,
        amount: Amount,
    },
    BalanceWithdrawn {
        recipient: AccountId,
        amount: Amount,
    },
}

/// Result of [`DividendTracker::audit`].
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConservationReport {
    pub accounts: usize,
    pub total_outstanding: Amount,
    pub undistributed: Amount,
    /// `undistributed - total_outstanding`, base units lost to rounding.
    pub rounding_gap: Amount,
    pub gap_bound: Amount,
}

/// Deposits raise one scaled per-share value. Each account carries a signed
/// correction, adjusted on every mint, burn and transfer, so that
///
/// ```text
/// accrued(a) = floor((per_share * balance(a) + correction(a)) / MAGNITUDE)
/// ```
///
/// is unaffected by balance changes and only grows with deposits.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DividendTracker {
    state: GlobalState,
    accounts: BTreeMap<AccountId, AccountEntry>,
    minimum_deposit: Amount,
    events: Vec<DividendEvent>,
}

impl DividendTracker {
    pub fn new(minimum_deposit: Amount) -> Self {
        Self {
            minimum_deposit,
            ..Self::default()
        }
    }

    pub fn state(&self) -> &GlobalState {
        &self.state
    }

    pub fn minimum_deposit(&self) -> Amount {
        self.minimum_deposit
    }

    pub fn account(&self, account: &AccountId) -> AccountEntry {
        self.accounts.get(account).cloned().unwrap_or_default()
    }

    pub fn accounts(&self) -> &BTreeMap<AccountId, AccountEntry> {
        &self.accounts
    }

    /// Append-only event log.
    pub fn events(&self) -> &[DividendEvent] {
        &self.events
    }

    /// Spread `amount` over `total_supply` units. Nothing changes on error.
    pub fn deposit_dividend(
        &mut self,
        depositor: &AccountId,
        amount: Amount,
        total_supply: Amount,
    ) -> Result<DividendEvent, DividendError> {
        if total_supply == 0 {
            return Err(DividendError::NoDistributionTarget);
        }
        if amount < self.minimum_deposit {
            return Err(DividendError::DepositBelowMinimum {
                amount,
                minimum: self.minimum_deposit,
            });
        }

        let increment = math::per_share_increment(amount, total_supply)?;
        let per_share = math::checked_add(
            self.state.magnified_dividend_per_share,
            increment.per_share,
            "per-share accumulator",
        )?;
        let dust = math::checked_add(self.state.magnified_dust, increment.dust, "dust")?;
        let distributed = self
            .state
            .total_dividends_distributed
            .checked_add(amount)
            .ok_or_else(|| DividendError::overflow("total distributed"))?;

        self.state.magnified_dividend_per_share = per_share;
        self.state.magnified_dust = dust;
        self.state.total_dividends_distributed = distributed;
        self.state.deposit_count += 1;

        info!(
            depositor = %depositor,
            amount,
            total_supply,
            per_share = %per_share,
            "dividend deposited"
        );
        let event = DividendEvent::DividendDeposited {
            deposited_by: depositor.clone(),
            amount,
        };
        self.events.push(event.clone());
        Ok(event)
    }

    /// Total dividend `account` has ever been entitled to, given its current
    /// balance.
    pub fn accrued(&self, account: &AccountId, balance: Amount) -> Result<Amount, DividendError> {
        let entry = self.accounts.get(account);
        let correction = entry.map_or(Magnified::ZERO, |e| e.magnified_correction);
        let magnified = math::checked_add(
            math::scaled_product(self.state.magnified_dividend_per_share, balance)?,
            correction,
            "accrued dividend",
        )?;
        math::to_amount(math::descale_floor(magnified), "accrued dividend")
    }

    pub fn outstanding_balance_for(
        &self,
        account: &AccountId,
        balance: Amount,
    ) -> Result<Amount, DividendError> {
        let accrued = self.accrued(account, balance)?;
        let withdrawn = self
            .accounts
            .get(account)
            .map_or(0, |e| e.withdrawn_dividends);
        accrued.checked_sub(withdrawn).ok_or_else(|| {
            DividendError::InvariantViolation(format!(
                "account {account} withdrew {withdrawn} but accrued only {accrued}"
            ))
        })
    }

    /// Pay out everything `account` is owed. The withdrawn counter and the
    /// payout succeed or fail together.
    pub fn withdraw_balance<P: FundsTransfer + ?Sized>(
        &mut self,
        account: &AccountId,
        balance: Amount,
        payout: &mut P,
    ) -> Result<DividendEvent, DividendError> {
        let amount = self.outstanding_balance_for(account, balance)?;
        let total_withdrawn = self
            .state
            .total_dividends_withdrawn
            .checked_add(amount)
            .ok_or_else(|| DividendError::overflow("total withdrawn"))?;

        let entry = self.accounts.entry(account.clone()).or_default();
        let previous = entry.withdrawn_dividends;
        // Equals accrued(account), so it fits.
        entry.withdrawn_dividends = previous + amount;

        if let Err(rejected) = payout.pay(account, amount) {
            if let Some(entry) = self.accounts.get_mut(account) {
                entry.withdrawn_dividends = previous;
            }
            warn!(recipient = %account, amount, reason = %rejected.reason, "payout rejected");
            return Err(DividendError::TransferFailed {
                recipient: account.clone(),
                amount,
                reason: rejected.reason,
            });
        }
        self.state.total_dividends_withdrawn = total_withdrawn;

        info!(recipient = %account, amount, "balance withdrawn");
        let event = DividendEvent::BalanceWithdrawn {
            recipient: account.clone(),
            amount,
        };
        self.events.push(event.clone());
        Ok(event)
    }

    /// Check conservation over every tracked account. Walks the whole
    /// account map; meant for tests and tooling.
    pub fn audit<L: BalanceLedger + ?Sized>(
        &self,
        ledger: &L,
    ) -> Result<ConservationReport, DividendError> {
        let mut total_outstanding: Amount = 0;
        for account in self.accounts.keys() {
            let owed = self.outstanding_balance_for(account, ledger.balance_of(account))?;
            total_outstanding = total_outstanding
                .checked_add(owed)
                .ok_or_else(|| DividendError::overflow("conservation sum"))?;
        }

        let undistributed = self
            .state
            .total_dividends_distributed
            .checked_sub(self.state.total_dividends_withdrawn)
            .ok_or_else(|| {
                DividendError::InvariantViolation("withdrawn exceeds distributed".into())
            })?;
        let rounding_gap = undistributed.checked_sub(total_outstanding).ok_or_else(|| {
            DividendError::InvariantViolation(format!(
                "outstanding {total_outstanding} exceeds undistributed {undistributed}"
            ))
        })?;

        // Deposit truncation stays below one unit in total; flooring loses
        // less than one unit per account.
        let gap_bound = self.accounts.len() as Amount;
        if rounding_gap > gap_bound {
            return Err(DividendError::InvariantViolation(format!(
                "rounding gap {rounding_gap} exceeds bound {gap_bound}"
            )));
        }

        Ok(ConservationReport {
            accounts: self.accounts.len(),
            total_outstanding,
            undistributed,
            rounding_gap,
            gap_bound,
        })
    }

    fn correction_after(
        &self,
        account: &AccountId,
        delta: Magnified,
    ) -> Result<Magnified, DividendError> {
        let current = self
            .accounts
            .get(account)
            .map_or(Magnified::ZERO, |e| e.magnified_correction);
        math::checked_add(current, delta, "correction")
    }
}

impl BalanceObserver for DividendTracker {
    type Error = DividendError;

    fn on_balance_change(&mut self, change: &BalanceChange) -> Result<(), DividendError> {
        let shift = math::scaled_product(self.state.magnified_dividend_per_share, change.value())?;
        let negative_shift = math::checked_sub(Magnified::ZERO, shift, "correction")?;

        // Both sides are computed before either entry is written.
        let updates: Vec<(AccountId, Magnified)> = match (change.sender(), change.receiver()) {
            (Some(from), Some(to)) if from == to => {
                vec![(from.clone(), self.correction_after(from, Magnified::ZERO)?)]
            }
            (from, to) => {
                let mut updates = Vec::with_capacity(2);
                if let Some(from) = from {
                    updates.push((from.clone(), self.correction_after(from, shift)?));
                }
                if let Some(to) = to {
                    updates.push((to.clone(), self.correction_after(to, negative_shift)?));
                }
                updates
            }
        };

        for (account, correction) in updates {
            self.accounts.entry(account).or_default().magnified_correction = correction;
        }
        debug!(?change, shift = %shift, "corrections updated");
        Ok(())
    }
}

/// Dividend earned so far by one whole token unit, rounded down.
pub fn dividend_per_unit(state: &GlobalState) -> Result<Amount, DividendError> {
    math::to_amount(
        math::descale_floor(state.magnified_dividend_per_share),
        "per-unit dividend",
    )
}
