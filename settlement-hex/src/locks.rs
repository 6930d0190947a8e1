//! Per-account async locks serialising settlements of the same account.

use std::sync::Arc;

use dashmap::DashMap;
use settlement_types::AccountNumber;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Idle entries are pruned once the map grows past this size.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Default)]
pub struct AccountLocks {
    locks: DashMap<AccountNumber, Arc<Mutex<()>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `account`. Access ends when the guard drops.
    pub async fn acquire(&self, account: &AccountNumber) -> OwnedMutexGuard<()> {
        if self.locks.len() > PRUNE_THRESHOLD {
            self.prune();
        }

        let lock = self.locks.entry(account.clone()).or_default().clone();
        lock.lock_owned().await
    }

    /// Drops locks nobody holds or waits on.
    fn prune(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn account(n: &str) -> AccountNumber {
        AccountNumber::parse(n).unwrap()
    }

    #[tokio::test]
    async fn test_same_account_is_exclusive() {
        let locks = Arc::new(AccountLocks::new());
        let guard = locks.acquire(&account("1234567890")).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(&account("1234567890")).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_accounts_do_not_block() {
        let locks = AccountLocks::new();
        let _a = locks.acquire(&account("1234567890")).await;

        let b = tokio::time::timeout(
            Duration::from_millis(100),
            locks.acquire(&account("0987654321")),
        )
        .await;

        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let locks = AccountLocks::new();
        let held = locks.acquire(&account("1234567890")).await;
        drop(locks.acquire(&account("0987654321")).await);

        locks.prune();

        assert_eq!(locks.len(), 1);
        drop(held);
    }
}
