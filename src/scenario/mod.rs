use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dividend::{ConservationReport, DividendEvent};
use crate::error::DividendError;
use crate::ledger::{AccountId, Amount};
use crate::token::DividendToken;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Deposit {
        from: AccountId,
        amount: Amount,
    },
    Transfer {
        from: AccountId,
        to: AccountId,
        amount: Amount,
    },
    Mint {
        to: AccountId,
        amount: Amount,
    },
    Burn {
        from: AccountId,
        amount: Amount,
    },
    Withdraw {
        account: AccountId,
    },
    RejectPayouts {
        account: AccountId,
    },
    AcceptPayouts {
        account: AccountId,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Ok,
    Event { event: DividendEvent },
    Failed { error: String },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplayReport {
    pub steps: Vec<StepOutcome>,
    pub balances: BTreeMap<AccountId, Amount>,
    pub outstanding: BTreeMap<AccountId, Amount>,
    pub paid: BTreeMap<AccountId, Amount>,
    pub total_supply: Amount,
    pub total_dividends_distributed: Amount,
    pub dividend_per_unit: Amount,
    pub conservation: ConservationReport,
    pub state_root: String,
}

pub fn parse_scenario(raw: &str) -> Result<Vec<Operation>, serde_json::Error> {
    serde_json::from_str(raw)
}

/// Apply `operations` in order. Recoverable failures are recorded in the
/// step list and replay continues; an invariant violation aborts.
pub fn replay(
    token: &mut DividendToken,
    operations: &[Operation],
) -> Result<ReplayReport, DividendError> {
    let mut steps = Vec::with_capacity(operations.len());
    for (idx, op) in operations.iter().enumerate() {
        debug!(step = idx, ?op, "replaying");
        let result = match op {
            Operation::Deposit { from, amount } => {
                token.deposit_dividend(from, *amount).map(Some)
            }
            Operation::Transfer { from, to, amount } => {
                token.transfer(from, to, *amount).map(|_| None)
            }
            Operation::Mint { to, amount } => token.mint(to, *amount).map(|_| None),
            Operation::Burn { from, amount } => token.burn(from, *amount).map(|_| None),
            Operation::Withdraw { account } => token.withdraw_balance(account).map(Some),
            Operation::RejectPayouts { account } => {
                token.set_rejecting_payouts(account, true);
                Ok(None)
            }
            Operation::AcceptPayouts { account } => {
                token.set_rejecting_payouts(account, false);
                Ok(None)
            }
        };
        let outcome = match result {
            Ok(Some(event)) => StepOutcome::Event { event },
            Ok(None) => StepOutcome::Ok,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(step = idx, error = %err, "operation failed");
                StepOutcome::Failed {
                    error: err.to_string(),
                }
            }
        };
        steps.push(outcome);
    }

    let snapshot = token.snapshot();
    let mut outstanding = BTreeMap::new();
    let mut paid = BTreeMap::new();
    for account in snapshot.balances.keys().chain(snapshot.accounts.keys()) {
        outstanding.insert(account.clone(), token.outstanding_balance_for(account)?);
        paid.insert(account.clone(), token.treasury().paid_to(account));
    }

    Ok(ReplayReport {
        steps,
        balances: snapshot.balances.clone(),
        outstanding,
        paid,
        total_supply: snapshot.total_supply,
        total_dividends_distributed: snapshot.state.total_dividends_distributed,
        dividend_per_unit: crate::dividend::dividend_per_unit(&snapshot.state)?,
        conservation: token.audit()?,
        state_root: snapshot.state_root_hex(),
    })
}
