//! In-memory executor for dispatcher and loader tests.

use crate::backend::{ColumnMeta, RawResultSet, SqlDialect, SqlExecutor, TypeTag, WireValue};
use crate::decode::{SqliteTypes, TypeSystem};
use async_trait::async_trait;
use fanload_error::{FanloadError, Result};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub(crate) enum Script {
    Rows(RawResultSet, Duration),
    Fail(FanloadError, Duration),
    /// Never completes on its own; only cancellation ends it.
    Hang,
}

impl Script {
    pub(crate) fn rows(result: RawResultSet) -> Self {
        Script::Rows(result, Duration::ZERO)
    }

    pub(crate) fn fail(err: FanloadError) -> Self {
        Script::Fail(err, Duration::ZERO)
    }

    pub(crate) fn after(self, delay: Duration) -> Self {
        match self {
            Script::Rows(result, _) => Script::Rows(result, delay),
            Script::Fail(err, _) => Script::Fail(err, delay),
            Script::Hang => Script::Hang,
        }
    }
}

type Responder = Box<dyn Fn(&str) -> Script + Send + Sync>;

pub(crate) struct ScriptedExecutor {
    respond: Responder,
    max_sessions: Option<usize>,
    pub(crate) calls: AtomicUsize,
    pub(crate) active: AtomicUsize,
    pub(crate) max_active: AtomicUsize,
    pub(crate) cancelled: AtomicUsize,
    pub(crate) executed: Mutex<Vec<String>>,
}

impl fmt::Debug for ScriptedExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedExecutor")
            .field("calls", &self.calls)
            .finish()
    }
}

impl ScriptedExecutor {
    pub(crate) fn new(respond: impl Fn(&str) -> Script + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            max_sessions: None,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_max_sessions(mut self, limit: usize) -> Self {
        self.max_sessions = Some(limit);
        self
    }

    pub(crate) fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    async fn wait(&self, delay: Duration, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = cancel.cancelled() => {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                Err(FanloadError::cancelled("scripted query cancelled"))
            }
        }
    }
}

#[async_trait]
impl SqlExecutor for ScriptedExecutor {
    fn name(&self) -> &str {
        "scripted"
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    fn type_system(&self) -> &'static dyn TypeSystem {
        &SqliteTypes
    }

    fn max_sessions(&self) -> Option<usize> {
        self.max_sessions
    }

    async fn execute(&self, query: &str, cancel: CancellationToken) -> Result<RawResultSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().unwrap().push(query.to_string());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let outcome = match (self.respond)(query) {
            Script::Rows(result, delay) => self.wait(delay, &cancel).await.map(|_| result),
            Script::Fail(err, delay) => self.wait(delay, &cancel).await.and(Err(err)),
            Script::Hang => self.wait(Duration::from_secs(3600), &cancel).await.and(Err(
                FanloadError::internal("scripted hang finished without cancellation"),
            )),
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// Single nullable INTEGER column.
pub(crate) fn int_result(name: &str, values: &[Option<i64>]) -> RawResultSet {
    RawResultSet::new(
        vec![ColumnMeta::new(name, TypeTag::native("INTEGER"), true)],
        values
            .iter()
            .map(|v| vec![v.map(WireValue::Int).unwrap_or(WireValue::Null)])
            .collect(),
    )
}
