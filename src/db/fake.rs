// Scripted in-memory driver for unit tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::db::connection::{Connection, ConnectionDescriptor};
use crate::db::context::RequestContext;
use crate::db::traits::{Dialer, Param, Record, SqlHandle};
use crate::error::{ProviderError, ProviderResult};

#[derive(Debug, Clone)]
enum Response {
    Exec(Result<u64, String>),
    Row(Result<Option<Record>, String>),
}

#[derive(Debug)]
struct Rule {
    pattern: String,
    response: Response,
    remaining: Option<usize>,
}

/// Statement script shared by every handle of a fake database.
///
/// Rules are matched in insertion order by SQL substring; a rule with a
/// count is consumed after that many matches. Unmatched statements succeed
/// with zero rows affected, unmatched queries return no row.
#[derive(Debug, Default)]
pub struct FakeScript {
    rules: Mutex<Vec<Rule>>,
    statements: Mutex<Vec<(String, Vec<Param>)>>,
}

impl FakeScript {
    fn push(&self, pattern: &str, response: Response, remaining: Option<usize>) {
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            response,
            remaining,
        });
    }

    fn respond(&self, sql: &str, params: &[Param], is_query: bool) -> Option<Response> {
        self.statements
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));

        let mut rules = self.rules.lock().unwrap();
        let idx = rules.iter().position(|rule| {
            let kind_matches = matches!(
                (&rule.response, is_query),
                (Response::Row(_), true) | (Response::Exec(_), false)
            );
            kind_matches && rule.remaining != Some(0) && sql.contains(&rule.pattern)
        })?;
        let rule = &mut rules[idx];
        if let Some(n) = rule.remaining.as_mut() {
            *n -= 1;
        }
        Some(rule.response.clone())
    }
}

/// Builder over a shared script, also usable to make connections directly
#[derive(Clone, Default)]
pub struct FakeDb {
    script: Arc<FakeScript>,
}

impl FakeDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_exec(&self, pattern: &str, rows: u64) -> &Self {
        self.script.push(pattern, Response::Exec(Ok(rows)), None);
        self
    }

    pub fn on_exec_err(&self, pattern: &str, message: &str) -> &Self {
        self.script
            .push(pattern, Response::Exec(Err(message.to_string())), None);
        self
    }

    pub fn on_query(&self, pattern: &str, row: Option<Record>) -> &Self {
        self.script.push(pattern, Response::Row(Ok(row)), None);
        self
    }

    pub fn on_query_once(&self, pattern: &str, row: Option<Record>) -> &Self {
        self.script.push(pattern, Response::Row(Ok(row)), Some(1));
        self
    }

    pub fn on_query_err(&self, pattern: &str, message: &str) -> &Self {
        self.script
            .push(pattern, Response::Row(Err(message.to_string())), None);
        self
    }

    /// Every statement and query seen so far, in order
    pub fn statements(&self) -> Vec<String> {
        self.script
            .statements
            .lock()
            .unwrap()
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    pub fn params_of(&self, pattern: &str) -> Vec<Param> {
        self.script
            .statements
            .lock()
            .unwrap()
            .iter()
            .find(|(sql, _)| sql.contains(pattern))
            .map(|(_, params)| params.clone())
            .unwrap_or_default()
    }

    pub fn executed(&self, pattern: &str) -> bool {
        self.statements().iter().any(|sql| sql.contains(pattern))
    }

    pub fn handle(&self) -> Arc<FakeHandle> {
        Arc::new(FakeHandle {
            script: Arc::clone(&self.script),
            broken: AtomicBool::new(false),
            fail_pings: AtomicBool::new(false),
            pings: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// A connection outside any cache
    pub fn connection(&self, connection_id: &str) -> Connection {
        let descriptor = ConnectionDescriptor::parse(connection_id).unwrap();
        Connection::new(
            Arc::new(descriptor),
            self.handle(),
            RequestContext::new(),
            Weak::new(),
        )
    }
}

pub struct FakeHandle {
    script: Arc<FakeScript>,
    broken: AtomicBool,
    fail_pings: AtomicBool,
    pings: Arc<AtomicUsize>,
}

impl FakeHandle {
    pub fn break_handle(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    pub fn fail_pings(&self, fail: bool) {
        self.fail_pings.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl SqlHandle for FakeHandle {
    async fn ping(&self) -> ProviderResult<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.fail_pings.load(Ordering::SeqCst) || self.broken.load(Ordering::SeqCst) {
            return Err(ProviderError::QueryFailed("connection is closed".to_string()));
        }
        Ok(())
    }

    async fn exec(&self, sql: &str, params: &[Param]) -> ProviderResult<u64> {
        match self.script.respond(sql, params, false) {
            Some(Response::Exec(Ok(rows))) => Ok(rows),
            Some(Response::Exec(Err(message))) => Err(ProviderError::QueryFailed(message)),
            _ => Ok(0),
        }
    }

    async fn query_row(&self, sql: &str, params: &[Param]) -> ProviderResult<Option<Record>> {
        match self.script.respond(sql, params, true) {
            Some(Response::Row(Ok(row))) => Ok(row),
            Some(Response::Row(Err(message))) => Err(ProviderError::QueryFailed(message)),
            _ => Ok(None),
        }
    }

    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }
}

/// Dialer over a fake database that counts dials and pings
pub struct FakeDialer {
    db: FakeDb,
    dials: AtomicUsize,
    pings: Arc<AtomicUsize>,
    dial_delay: Duration,
    fail_dials: AtomicBool,
    fail_pings: AtomicBool,
    handles: Mutex<Vec<Arc<FakeHandle>>>,
}

impl FakeDialer {
    pub fn new() -> Self {
        Self::over(FakeDb::new())
    }

    pub fn over(db: FakeDb) -> Self {
        Self {
            db,
            dials: AtomicUsize::new(0),
            pings: Arc::new(AtomicUsize::new(0)),
            dial_delay: Duration::ZERO,
            fail_dials: AtomicBool::new(false),
            fail_pings: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn with_dial_delay(mut self, delay: Duration) -> Self {
        self.dial_delay = delay;
        self
    }

    pub fn fail_dials(&self, fail: bool) {
        self.fail_dials.store(fail, Ordering::SeqCst);
    }

    /// New handles fail their first ping
    pub fn fail_pings(&self, fail: bool) {
        self.fail_pings.store(fail, Ordering::SeqCst);
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn last_handle(&self) -> Option<Arc<FakeHandle>> {
        self.handles.lock().unwrap().last().cloned()
    }
}

#[async_trait::async_trait]
impl Dialer for FakeDialer {
    async fn dial(&self, descriptor: &ConnectionDescriptor) -> ProviderResult<Arc<dyn SqlHandle>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if !self.dial_delay.is_zero() {
            tokio::time::sleep(self.dial_delay).await;
        }
        if self.fail_dials.load(Ordering::SeqCst) {
            return Err(ProviderError::ConnectionFailed {
                connection_id: descriptor.connection_id.clone(),
                message: "login failed".to_string(),
            });
        }

        let handle = Arc::new(FakeHandle {
            script: Arc::clone(&self.db.script),
            broken: AtomicBool::new(false),
            fail_pings: AtomicBool::new(self.fail_pings.load(Ordering::SeqCst)),
            pings: Arc::clone(&self.pings),
        });
        self.handles.lock().unwrap().push(Arc::clone(&handle));
        Ok(handle)
    }
}
