use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::TokenConfig;
use crate::dividend::{AccountEntry, ConservationReport, DividendEvent, DividendTracker, GlobalState};
use crate::error::DividendError;
use crate::ledger::{AccountId, Amount, BalanceChange, BalanceLedger, InMemoryLedger, Treasury};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenSnapshot {
    pub state: GlobalState,
    pub total_supply: Amount,
    pub treasury_reserve: Amount,
    pub balances: BTreeMap<AccountId, Amount>,
    pub accounts: BTreeMap<AccountId, AccountEntry>,
    pub events: Vec<DividendEvent>,
    pub state_root: [u8; 32],
}

impl TokenSnapshot {
    pub fn state_root_hex(&self) -> String {
        hex::encode(self.state_root)
    }
}

pub struct DividendToken {
    ledger: InMemoryLedger,
    tracker: DividendTracker,
    treasury: Treasury,
}

impl DividendToken {
    /// Create the token and mint the initial supply to the creator.
    pub fn new(config: &TokenConfig) -> Result<Self, DividendError> {
        let mut token = Self {
            ledger: InMemoryLedger::new(),
            tracker: DividendTracker::new(config.minimum_deposit),
            treasury: Treasury::new(),
        };
        if config.initial_supply > 0 {
            token.mint(&config.creator, config.initial_supply)?;
        }
        debug!(
            creator = %config.creator,
            initial_supply = config.initial_supply,
            minimum_deposit = config.minimum_deposit,
            "dividend token created"
        );
        Ok(token)
    }

    pub fn balance_of(&self, account: &AccountId) -> Amount {
        self.ledger.balance_of(account)
    }

    pub fn total_supply(&self) -> Amount {
        self.ledger.total_supply()
    }

    pub fn tracker(&self) -> &DividendTracker {
        &self.tracker
    }

    pub fn treasury(&self) -> &Treasury {
        &self.treasury
    }

    pub fn events(&self) -> &[DividendEvent] {
        self.tracker.events()
    }

    /// Toggle whether payouts to `account` are refused.
    pub fn set_rejecting_payouts(&mut self, account: &AccountId, rejecting: bool) {
        self.treasury.set_rejecting(account, rejecting);
    }

    pub fn mint(&mut self, to: &AccountId, value: Amount) -> Result<(), DividendError> {
        self.apply(BalanceChange::Mint {
            to: to.clone(),
            value,
        })
    }

    pub fn burn(&mut self, from: &AccountId, value: Amount) -> Result<(), DividendError> {
        self.apply(BalanceChange::Burn {
            from: from.clone(),
            value,
        })
    }

    pub fn transfer(
        &mut self,
        from: &AccountId,
        to: &AccountId,
        value: Amount,
    ) -> Result<(), DividendError> {
        self.apply(BalanceChange::Transfer {
            from: from.clone(),
            to: to.clone(),
            value,
        })
    }

    fn apply(&mut self, change: BalanceChange) -> Result<(), DividendError> {
        self.ledger.apply(change, &mut self.tracker)
    }

    pub fn deposit_dividend(
        &mut self,
        depositor: &AccountId,
        amount: Amount,
    ) -> Result<DividendEvent, DividendError> {
        let event = self
            .tracker
            .deposit_dividend(depositor, amount, self.ledger.total_supply())?;
        self.treasury.receive(amount)?;
        Ok(event)
    }

    pub fn outstanding_balance_for(&self, account: &AccountId) -> Result<Amount, DividendError> {
        self.tracker
            .outstanding_balance_for(account, self.ledger.balance_of(account))
    }

    pub fn withdraw_balance(&mut self, account: &AccountId) -> Result<DividendEvent, DividendError> {
        let balance = self.ledger.balance_of(account);
        self.tracker
            .withdraw_balance(account, balance, &mut self.treasury)
    }

    pub fn audit(&self) -> Result<ConservationReport, DividendError> {
        self.tracker.audit(&self.ledger)
    }

    pub fn snapshot(&self) -> TokenSnapshot {
        let state = self.tracker.state().clone();
        let balances = self.ledger.balances().clone();
        let accounts = self.tracker.accounts().clone();
        let state_root = compute_state_root(&state, self.total_supply(), &balances, &accounts);
        TokenSnapshot {
            state,
            total_supply: self.total_supply(),
            treasury_reserve: self.treasury.reserve(),
            balances,
            accounts,
            events: self.events().to_vec(),
            state_root,
        }
    }
}

/// Thread-safe handle. Every operation runs under one exclusive lock, so
/// deposits, balance changes and withdrawals never interleave.
#[derive(Clone)]
pub struct SharedDividendToken {
    inner: Arc<Mutex<DividendToken>>,
}

impl SharedDividendToken {
    pub fn new(config: &TokenConfig) -> Result<Self, DividendError> {
        Ok(Self::from_token(DividendToken::new(config)?))
    }

    pub fn from_token(token: DividendToken) -> Self {
        Self {
            inner: Arc::new(Mutex::new(token)),
        }
    }

    /// Run `f` with exclusive access to the token.
    pub fn with<R>(&self, f: impl FnOnce(&mut DividendToken) -> R) -> R {
        let mut token = self.inner.lock();
        f(&mut token)
    }

    pub fn deposit_dividend(
        &self,
        depositor: &AccountId,
        amount: Amount,
    ) -> Result<DividendEvent, DividendError> {
        self.inner.lock().deposit_dividend(depositor, amount)
    }

    pub fn transfer(
        &self,
        from: &AccountId,
        to: &AccountId,
        value: Amount,
    ) -> Result<(), DividendError> {
        self.inner.lock().transfer(from, to, value)
    }

    pub fn outstanding_balance_for(&self, account: &AccountId) -> Result<Amount, DividendError> {
        self.inner.lock().outstanding_balance_for(account)
    }

    pub fn withdraw_balance(&self, account: &AccountId) -> Result<DividendEvent, DividendError> {
        self.inner.lock().withdraw_balance(account)
    }

    pub fn balance_of(&self, account: &AccountId) -> Amount {
        self.inner.lock().balance_of(account)
    }

    pub fn audit(&self) -> Result<ConservationReport, DividendError> {
        self.inner.lock().audit()
    }

    pub fn snapshot(&self) -> TokenSnapshot {
        self.inner.lock().snapshot()
    }
}

fn compute_state_root(
    state: &GlobalState,
    total_supply: Amount,
    balances: &BTreeMap<AccountId, Amount>,
    accounts: &BTreeMap<AccountId, AccountEntry>,
) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();

    let mut hasher = Sha256::new();
    hasher.update(b"global");
    hasher.update(state.magnified_dividend_per_share.to_le_bytes());
    hasher.update(state.total_dividends_distributed.to_le_bytes());
    hasher.update(state.total_dividends_withdrawn.to_le_bytes());
    hasher.update(state.magnified_dust.to_le_bytes());
    hasher.update(state.deposit_count.to_le_bytes());
    hasher.update(total_supply.to_le_bytes());
    leaves.push(hasher.finalize().into());

    for (account, balance) in balances {
        let mut hasher = Sha256::new();
        hasher.update(b"bal");
        hasher.update((account.len() as u64).to_le_bytes());
        hasher.update(account.as_bytes());
        hasher.update(balance.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for (account, entry) in accounts {
        // Zero entries are the same as absent ones.
        if *entry == AccountEntry::default() {
            continue;
        }
        let mut hasher = Sha256::new();
        hasher.update(b"div");
        hasher.update((account.len() as u64).to_le_bytes());
        hasher.update(account.as_bytes());
        hasher.update(entry.magnified_correction.to_le_bytes());
        hasher.update(entry.withdrawn_dividends.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"divtoken-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::thread;

    fn id(s: &str) -> AccountId {
        s.to_string()
    }

    fn token(initial_supply: Amount, minimum_deposit: Amount) -> DividendToken {
        DividendToken::new(&TokenConfig {
            creator: id("creator"),
            initial_supply,
            minimum_deposit,
        })
        .unwrap()
    }

    #[test]
    fn zero_supply_rejects_deposits() {
        let mut t = token(0, 0);
        let before = t.snapshot();
        assert_eq!(
            t.deposit_dividend(&id("funder"), 41),
            Err(DividendError::NoDistributionTarget)
        );
        assert_eq!(t.snapshot(), before);
        assert_eq!(t.treasury().reserve(), 0);
    }

    #[test]
    fn fresh_token_owes_nothing_and_pays_nothing() {
        let mut t = token(1024, 0);
        assert_eq!(t.outstanding_balance_for(&id("anyone")).unwrap(), 0);
        assert_eq!(t.outstanding_balance_for(&id("creator")).unwrap(), 0);
        let event = t.withdraw_balance(&id("anyone")).unwrap();
        assert_eq!(
            event,
            DividendEvent::BalanceWithdrawn { recipient: id("anyone"), amount: 0 }
        );
        assert_eq!(t.treasury().paid_to(&id("anyone")), 0);
        assert_eq!(t.balance_of(&id("anyone")), 0);
    }

    #[test]
    fn deposit_and_withdraw_emit_events() {
        let mut t = token(1024, 0);
        assert_eq!(
            t.deposit_dividend(&id("funder"), 42).unwrap(),
            DividendEvent::DividendDeposited { deposited_by: id("funder"), amount: 42 }
        );
        assert_eq!(
            t.withdraw_balance(&id("anyone")).unwrap(),
            DividendEvent::BalanceWithdrawn { recipient: id("anyone"), amount: 0 }
        );
        assert_eq!(t.events().len(), 2);
    }

    #[test]
    fn minimum_deposit_is_enforced() {
        let mut t = token(1024, 50);
        assert!(matches!(
            t.deposit_dividend(&id("funder"), 49),
            Err(DividendError::DepositBelowMinimum { .. })
        ));
        assert_eq!(t.treasury().reserve(), 0);
        t.deposit_dividend(&id("funder"), 50).unwrap();
        assert_eq!(t.treasury().reserve(), 50);
    }

    #[test]
    fn split_follows_balances() {
        let mut t = token(1024, 0);
        t.transfer(&id("creator"), &id("minor"), 256).unwrap();
        t.deposit_dividend(&id("funder"), 64).unwrap();
        assert_eq!(t.outstanding_balance_for(&id("creator")).unwrap(), 48);
        assert_eq!(t.outstanding_balance_for(&id("minor")).unwrap(), 16);
    }

    #[test]
    fn withdrawal_pays_out_and_zeroes_debt() {
        let mut t = token(1024, 0);
        t.deposit_dividend(&id("funder"), 64).unwrap();
        t.withdraw_balance(&id("creator")).unwrap();
        assert_eq!(t.outstanding_balance_for(&id("creator")).unwrap(), 0);
        assert_eq!(t.treasury().paid_to(&id("creator")), 64);

        let second = t.withdraw_balance(&id("creator")).unwrap();
        assert_eq!(
            second,
            DividendEvent::BalanceWithdrawn { recipient: id("creator"), amount: 0 }
        );
        assert_eq!(t.treasury().paid_to(&id("creator")), 64);
    }

    #[test]
    fn transfer_is_neutral_then_accrual_follows_new_split() {
        let mut t = token(1024, 0);
        t.deposit_dividend(&id("funder"), 64).unwrap();
        t.transfer(&id("creator"), &id("fresh"), 512).unwrap();
        assert_eq!(t.outstanding_balance_for(&id("creator")).unwrap(), 64);
        assert_eq!(t.outstanding_balance_for(&id("fresh")).unwrap(), 0);

        t.deposit_dividend(&id("funder"), 64).unwrap();
        assert_eq!(t.outstanding_balance_for(&id("creator")).unwrap(), 96);
        assert_eq!(t.outstanding_balance_for(&id("fresh")).unwrap(), 32);
        assert_eq!(t.audit().unwrap().rounding_gap, 0);
    }

    #[test]
    fn transfer_after_withdrawal_keeps_debt_at_zero() {
        let mut t = token(1000, 0);
        t.deposit_dividend(&id("funder"), 333).unwrap();
        t.withdraw_balance(&id("creator")).unwrap();
        t.transfer(&id("creator"), &id("b"), 1000).unwrap();
        assert_eq!(t.outstanding_balance_for(&id("creator")).unwrap(), 0);
        assert_eq!(t.outstanding_balance_for(&id("b")).unwrap(), 0);
        t.deposit_dividend(&id("funder"), 10).unwrap();
        assert_eq!(t.outstanding_balance_for(&id("creator")).unwrap(), 0);
        // 10 over 1000 units does not divide 2^128 evenly.
        assert_eq!(t.outstanding_balance_for(&id("b")).unwrap(), 9);
    }

    #[test]
    fn failed_transfer_changes_nothing() {
        let mut t = token(10, 0);
        t.deposit_dividend(&id("funder"), 10).unwrap();
        let before = t.snapshot();
        assert!(matches!(
            t.transfer(&id("creator"), &id("b"), 11),
            Err(DividendError::Ledger(_))
        ));
        assert_eq!(t.snapshot(), before);
    }

    #[test]
    fn rejected_payout_can_be_retried() {
        let mut t = token(100, 0);
        t.deposit_dividend(&id("funder"), 100).unwrap();
        t.set_rejecting_payouts(&id("creator"), true);
        assert!(matches!(
            t.withdraw_balance(&id("creator")),
            Err(DividendError::TransferFailed { amount: 100, .. })
        ));
        assert_eq!(t.outstanding_balance_for(&id("creator")).unwrap(), 100);
        assert_eq!(t.treasury().reserve(), 100);

        t.set_rejecting_payouts(&id("creator"), false);
        t.withdraw_balance(&id("creator")).unwrap();
        assert_eq!(t.treasury().paid_to(&id("creator")), 100);
        assert_eq!(t.treasury().reserve(), 0);
    }

    #[test]
    fn state_root_is_deterministic_and_tracks_changes() {
        let mut a = token(1024, 0);
        let mut b = token(1024, 0);
        assert_eq!(a.snapshot().state_root, b.snapshot().state_root);

        a.deposit_dividend(&id("funder"), 64).unwrap();
        assert_ne!(a.snapshot().state_root, b.snapshot().state_root);

        b.deposit_dividend(&id("funder"), 64).unwrap();
        assert_eq!(a.snapshot().state_root_hex(), b.snapshot().state_root_hex());
        assert_eq!(a.snapshot().state_root_hex().len(), 64);
    }

    #[test]
    fn random_sequences_conserve_funds() {
        let holders: Vec<AccountId> = ["creator", "a", "b", "c", "d"].iter().map(|s| id(s)).collect();
        for seed in 0..8u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut t = token(1_000, 0);
            let mut last_withdrawn: BTreeMap<AccountId, Amount> = BTreeMap::new();

            for _ in 0..300 {
                let who = &holders[rng.gen_range(0..holders.len())];
                match rng.gen_range(0..6) {
                    0 | 1 => {
                        let amount = rng.gen_range(0..5_000);
                        let res = t.deposit_dividend(&id("funder"), amount);
                        if t.total_supply() == 0 {
                            assert_eq!(res, Err(DividendError::NoDistributionTarget));
                        } else {
                            res.unwrap();
                        }
                    }
                    2 => {
                        let to = &holders[rng.gen_range(0..holders.len())];
                        let value = rng.gen_range(0..=t.balance_of(who));
                        let before = t.outstanding_balance_for(who).unwrap()
                            + if to == who { 0 } else { t.outstanding_balance_for(to).unwrap() };
                        let sender_before = t.outstanding_balance_for(who).unwrap();
                        t.transfer(who, to, value).unwrap();
                        let after = t.outstanding_balance_for(who).unwrap()
                            + if to == who { 0 } else { t.outstanding_balance_for(to).unwrap() };
                        assert_eq!(before, after);
                        assert_eq!(sender_before, t.outstanding_balance_for(who).unwrap());
                    }
                    3 => {
                        let owed = t.outstanding_balance_for(who).unwrap();
                        t.mint(who, rng.gen_range(0..500)).unwrap();
                        assert_eq!(owed, t.outstanding_balance_for(who).unwrap());
                    }
                    4 => {
                        let owed = t.outstanding_balance_for(who).unwrap();
                        let value = rng.gen_range(0..=t.balance_of(who));
                        t.burn(who, value).unwrap();
                        assert_eq!(owed, t.outstanding_balance_for(who).unwrap());
                    }
                    _ => {
                        let owed = t.outstanding_balance_for(who).unwrap();
                        let paid_before = t.treasury().paid_to(who);
                        t.withdraw_balance(who).unwrap();
                        assert_eq!(t.treasury().paid_to(who), paid_before + owed);
                    }
                }

                for holder in &holders {
                    let withdrawn = t.tracker().account(holder).withdrawn_dividends;
                    let previous = last_withdrawn.insert(holder.clone(), withdrawn).unwrap_or(0);
                    assert!(withdrawn >= previous);
                }
                let report = t.audit().unwrap();
                let state = t.tracker().state();
                assert_eq!(
                    report.undistributed,
                    state.total_dividends_distributed - state.total_dividends_withdrawn
                );
                assert_eq!(t.treasury().reserve(), report.undistributed);
            }
        }
    }

    #[test]
    fn shared_handle_serializes_concurrent_operations() {
        let shared = SharedDividendToken::new(&TokenConfig {
            creator: id("creator"),
            initial_supply: 4_000,
            minimum_deposit: 0,
        })
        .unwrap();
        for n in 0..4 {
            shared
                .transfer(&id("creator"), &format!("holder-{n}"), 1_000)
                .unwrap();
        }

        let workers: Vec<_> = (0..4u64)
            .map(|n| {
                let shared = shared.clone();
                thread::spawn(move || {
                    let mut rng = StdRng::seed_from_u64(n);
                    let me = format!("holder-{n}");
                    let peer = format!("holder-{}", (n + 1) % 4);
                    for _ in 0..200 {
                        match rng.gen_range(0..3) {
                            0 => {
                                shared.deposit_dividend(&me, rng.gen_range(1..1_000)).unwrap();
                            }
                            1 => {
                                shared.with(|t| {
                                    let value = rng.gen_range(0..=t.balance_of(&me));
                                    t.transfer(&me, &peer, value).unwrap();
                                });
                            }
                            _ => {
                                shared.withdraw_balance(&me).unwrap();
                            }
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let report = shared.audit().unwrap();
        assert!(report.rounding_gap <= report.gap_bound);
        let snapshot = shared.snapshot();
        let deposits = snapshot
            .events
            .iter()
            .filter(|e| matches!(e, DividendEvent::DividendDeposited { .. }))
            .count();
        assert_eq!(deposits as u64, snapshot.state.deposit_count);
        assert_eq!(snapshot.treasury_reserve, report.undistributed);
        assert_eq!(snapshot.total_supply, 4_000);
    }
}
