//! Shared state for the HTTP service
//!
//! Sessions and accounts live in registries keyed by id. Each entry sits
//! behind its own mutex, so operations on one entry are serialized while
//! different entries proceed independently.

use crate::agent::{LoopConfig, Sidekick};
use crate::audit::RunLog;
use crate::error::SidekickError;
use crate::evaluator::Evaluator;
use crate::ledger::{Account, AccountSnapshot, PriceSource};
use crate::tools::ToolProvider;
use crate::worker::Worker;
use crate::Result;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// Everything needed to start a new sidekick
#[derive(Clone)]
pub struct SidekickFactory {
    worker: Arc<dyn Worker>,
    evaluator: Arc<dyn Evaluator>,
    provider: Arc<dyn ToolProvider>,
    config: LoopConfig,
    run_log: Arc<RunLog>,
}

impl SidekickFactory {
    pub fn new(
        worker: Arc<dyn Worker>,
        evaluator: Arc<dyn Evaluator>,
        provider: Arc<dyn ToolProvider>,
        config: LoopConfig,
    ) -> Self {
        Self {
            worker,
            evaluator,
            provider,
            config,
            run_log: Arc::new(RunLog::new()),
        }
    }

    pub async fn build(&self) -> Result<Sidekick> {
        let sidekick = Sidekick::start(
            self.worker.clone(),
            self.evaluator.clone(),
            self.provider.clone(),
            self.config,
        )
        .await?;
        Ok(sidekick.with_run_log(self.run_log.clone()))
    }

    pub fn run_log(&self) -> &Arc<RunLog> {
        &self.run_log
    }
}

pub type SharedSidekick = Arc<Mutex<Sidekick>>;

pub struct SessionRegistry {
    factory: SidekickFactory,
    sessions: Arc<RwLock<HashMap<Uuid, SharedSidekick>>>,
}

impl SessionRegistry {
    pub fn new(factory: SidekickFactory) -> Self {
        Self {
            factory,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn create(&self) -> Result<Uuid> {
        let sidekick = self.factory.build().await?;
        let id = sidekick.session_id();
        self.sessions
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(sidekick)));
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Result<SharedSidekick> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(SidekickError::SessionNotFound(id))
    }

    /// Reset a session; it is re-registered under its new id and the runs
    /// of the old one are dropped
    pub async fn reset(&self, id: Uuid) -> Result<Uuid> {
        let handle = self.get(id).await?;
        let mut sidekick = handle.lock().await;

        // A concurrent reset may already have re-keyed this entry
        if sidekick.session_id() != id {
            return Err(SidekickError::SessionNotFound(id));
        }

        sidekick.reset().await?;
        let new_id = sidekick.session_id();

        {
            let mut sessions = self.sessions.write().await;
            // Removed while we waited for the lock
            if sessions.remove(&id).is_none() {
                return Err(SidekickError::SessionNotFound(id));
            }
            sessions.insert(new_id, handle.clone());
        }

        let dropped = self.run_log().remove_session(id).await;
        info!(old_session_id = %id, session_id = %new_id, dropped_runs = dropped, "Session reset");
        Ok(new_id)
    }

    /// Unregister a session, drop its runs and close its tools
    pub async fn remove(&self, id: Uuid) -> Result<()> {
        let handle = self
            .sessions
            .write()
            .await
            .remove(&id)
            .ok_or(SidekickError::SessionNotFound(id))?;
        self.run_log().remove_session(id).await;

        let sidekick = handle.lock().await;
        if let Err(e) = sidekick.close().await {
            warn!(session_id = %id, error = %e, "Closing tools failed during removal");
            return Err(e);
        }
        info!(session_id = %id, "Session removed");
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub fn run_log(&self) -> &Arc<RunLog> {
        self.factory.run_log()
    }
}

pub type SharedAccount = Arc<Mutex<Account>>;

pub struct AccountBook {
    prices: Arc<dyn PriceSource>,
    accounts: Arc<RwLock<HashMap<String, SharedAccount>>>,
}

impl AccountBook {
    pub fn new(prices: Arc<dyn PriceSource>) -> Self {
        Self {
            prices,
            accounts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn open(&self, account_id: &str, initial_deposit: Decimal) -> Result<AccountSnapshot> {
        let account = Account::create(account_id, initial_deposit, self.prices.clone())?;
        let snapshot = account.snapshot()?;

        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(account.account_id()) {
            return Err(SidekickError::AccountExists(account.account_id().to_string()));
        }
        accounts.insert(
            account.account_id().to_string(),
            Arc::new(Mutex::new(account)),
        );
        Ok(snapshot)
    }

    pub async fn get(&self, account_id: &str) -> Result<SharedAccount> {
        self.accounts
            .read()
            .await
            .get(account_id.trim())
            .cloned()
            .ok_or_else(|| SidekickError::AccountNotFound(account_id.to_string()))
    }

    /// Run `op` with exclusive access to one account
    pub async fn update<T, F>(&self, account_id: &str, op: F) -> Result<T>
    where
        F: FnOnce(&mut Account) -> Result<T>,
    {
        let handle = self.get(account_id).await?;
        let mut account = handle.lock().await;
        op(&mut account)
    }

    pub async fn snapshot(&self, account_id: &str) -> Result<AccountSnapshot> {
        self.update(account_id, |account| account.snapshot()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::FixedPriceSource;
    use crate::models::{Completion, Verdict};
    use crate::evaluator::EvaluationInput;
    use crate::tools::{ToolExecutor, ToolRequest, ToolSpec};
    use crate::worker::WorkerTurn;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoWorker;

    #[async_trait]
    impl Worker for EchoWorker {
        async fn step(&self, turn: WorkerTurn<'_>) -> Result<Completion> {
            let last = turn.history.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(Completion::text(format!("echo: {}", last)))
        }
    }

    struct ApproveAll;

    #[async_trait]
    impl Evaluator for ApproveAll {
        async fn evaluate(&self, _input: EvaluationInput<'_>) -> Result<Verdict> {
            Ok(Verdict::met("fine"))
        }
    }

    struct NoTools(Arc<AtomicUsize>);

    #[async_trait]
    impl ToolExecutor for NoTools {
        fn specs(&self) -> Vec<ToolSpec> {
            Vec::new()
        }

        async fn invoke(&self, request: ToolRequest) -> Result<String> {
            Err(SidekickError::ToolNotFound(request.kind().name().to_string()))
        }

        async fn close(&self) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct NoToolsProvider {
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ToolProvider for NoToolsProvider {
        async fn acquire(&self) -> Result<Arc<dyn ToolExecutor>> {
            tokio::task::yield_now().await;
            Ok(Arc::new(NoTools(self.closed.clone())))
        }
    }

    fn registry() -> (SessionRegistry, Arc<NoToolsProvider>) {
        let provider = Arc::new(NoToolsProvider::default());
        let factory = SidekickFactory::new(
            Arc::new(EchoWorker),
            Arc::new(ApproveAll),
            provider.clone(),
            LoopConfig::default(),
        );
        (SessionRegistry::new(factory), provider)
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let (registry, provider) = registry();
        let id = registry.create().await.unwrap();
        assert_eq!(registry.len().await, 1);

        let outcome = {
            let handle = registry.get(id).await.unwrap();
            let mut sidekick = handle.lock().await;
            sidekick.submit("hello", "").await.unwrap()
        };
        assert_eq!(outcome.answer.as_deref(), Some("echo: hello"));
        assert_eq!(
            registry.run_log().list_for_session(id).await.unwrap(),
            vec![outcome.run_id]
        );

        let new_id = registry.reset(id).await.unwrap();
        assert_ne!(new_id, id);
        assert!(registry.run_log().is_empty().await);
        assert!(matches!(
            registry.get(id).await,
            Err(SidekickError::SessionNotFound(_))
        ));
        assert_eq!(provider.closed.load(Ordering::SeqCst), 1);

        registry.remove(new_id).await.unwrap();
        assert!(registry.is_empty().await);
        assert_eq!(provider.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_resets_register_one_session() {
        let (registry, provider) = registry();
        let id = registry.create().await.unwrap();

        let (first, second) = tokio::join!(registry.reset(id), registry.reset(id));
        let new_id = match (first, second) {
            (Ok(new_id), Err(SidekickError::SessionNotFound(_)))
            | (Err(SidekickError::SessionNotFound(_)), Ok(new_id)) => new_id,
            other => panic!("expected exactly one reset to win, got {:?}", other),
        };

        assert_eq!(registry.len().await, 1);
        let handle = registry.get(new_id).await.unwrap();
        assert_eq!(handle.lock().await.session_id(), new_id);
        assert_eq!(provider.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remove_drops_runs() {
        let (registry, _) = registry();
        let id = registry.create().await.unwrap();
        {
            let handle = registry.get(id).await.unwrap();
            handle.lock().await.submit("hello", "").await.unwrap();
        }
        assert_eq!(registry.run_log().len().await, 1);

        registry.remove(id).await.unwrap();
        assert!(registry.run_log().is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_unknown_session() {
        let (registry, _) = registry();
        assert!(matches!(
            registry.remove(Uuid::new_v4()).await,
            Err(SidekickError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_account_book() {
        let book = AccountBook::new(Arc::new(FixedPriceSource::default()));
        let snapshot = book.open("alice", dec!(1000)).await.unwrap();
        assert_eq!(snapshot.balance, dec!(1000));

        assert!(matches!(
            book.open(" alice ", dec!(5)).await,
            Err(SidekickError::AccountExists(_))
        ));

        book.update("alice", |a| a.buy("AAPL", 2)).await.unwrap();
        let snapshot = book.snapshot("alice").await.unwrap();
        assert_eq!(snapshot.balance, dec!(700));
        assert_eq!(snapshot.portfolio_value, dec!(300));

        assert!(matches!(
            book.snapshot("bob").await,
            Err(SidekickError::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_update_leaves_account_unchanged() {
        let book = AccountBook::new(Arc::new(FixedPriceSource::default()));
        book.open("carol", dec!(100)).await.unwrap();

        let result = book.update("carol", |a| a.withdraw(dec!(500))).await;
        tokio_test::assert_err!(result);

        let snapshot = book.snapshot("carol").await.unwrap();
        assert_eq!(snapshot.balance, dec!(100));
        assert_eq!(snapshot.transaction_count, 1);
    }
}
