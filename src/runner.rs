//! Executing compiled queries on worker threads.
//!
//! A [`QueryExecutor`] owns a set of worker threads and a shared [`ConnectionPool`].
//! [`QueryExecutor::submit`] schedules a [`CompiledQuery`] and immediately returns a [`QueryHandle`].
//! The worker acquires a connection, executes the query, decodes the rows, and sends them to a bounded channel read through the handle.
//!
//! A handle moves through states `Created -> Running -> {Done | Closed}`.
//! The consumer may close the handle at any time from any thread.
//! Closing interrupts the running statement, stops further sends, and releases the connection.
//! A failed query ends its stream with a single `Err` marker and records the error in the handle.

use crate::error::{ConnectionError, DecodeError, QueryError};
use crate::pedigree::FamilyLookup;
use crate::query::{CompiledQuery, SummaryCache, VariantResult};

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};

use rusqlite::types::Value;
use rusqlite::{Connection, InterruptHandle, OpenFlags};

use tracing::{debug, error, warn};

#[cfg(test)]
mod tests;

//-----------------------------------------------------------------------------

/// Parameters of a query executor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutorParams {
    /// Number of worker threads.
    pub workers: usize,
    /// Maximum number of open connections.
    pub pool_size: usize,
    /// Wait for a connection before checking whether the handle has been closed.
    pub acquire_timeout: Duration,
    /// Capacity of the result channel of each query.
    pub channel_capacity: usize,
    /// Wait for the consumer before retrying a send.
    pub send_timeout: Duration,
    /// Warn that nobody is consuming the results after this many failed sends.
    pub warn_after: usize,
    /// Close the handle after this many failed sends.
    pub cancel_after: usize,
}

impl ExecutorParams {
    pub const WORKERS: usize = 4;
    pub const POOL_SIZE: usize = 4;
    pub const ACQUIRE_TIMEOUT: Duration = Duration::from_millis(100);
    pub const CHANNEL_CAPACITY: usize = 128;
    pub const SEND_TIMEOUT: Duration = Duration::from_millis(100);
    pub const WARN_AFTER: usize = 50;
    pub const CANCEL_AFTER: usize = 600;
}

impl Default for ExecutorParams {
    fn default() -> Self {
        ExecutorParams {
            workers: Self::WORKERS,
            pool_size: Self::POOL_SIZE,
            acquire_timeout: Self::ACQUIRE_TIMEOUT,
            channel_capacity: Self::CHANNEL_CAPACITY,
            send_timeout: Self::SEND_TIMEOUT,
            warn_after: Self::WARN_AFTER,
            cancel_after: Self::CANCEL_AFTER,
        }
    }
}

//-----------------------------------------------------------------------------

#[derive(Debug)]
struct PoolState {
    idle: Vec<Connection>,
    // Open connections, including the idle ones.
    open: usize,
    closed: bool,
}

/// A bounded pool of read-only connections to a variant store.
///
/// Connections are opened on demand, up to the size of the pool.
#[derive(Debug)]
pub struct ConnectionPool {
    filename: PathBuf,
    size: usize,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl ConnectionPool {
    /// Creates a pool for the store in the given file.
    ///
    /// Opens the first connection to check that the file can be opened.
    pub fn open<P: AsRef<Path>>(filename: P, size: usize) -> Result<Arc<Self>, ConnectionError> {
        let filename = filename.as_ref().to_path_buf();
        let connection = Self::connect(&filename)?;
        let state = PoolState { idle: vec![connection], open: 1, closed: false };
        Ok(Arc::new(ConnectionPool {
            filename,
            size: size.max(1),
            state: Mutex::new(state),
            available: Condvar::new(),
        }))
    }

    fn connect(filename: &Path) -> Result<Connection, ConnectionError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        Connection::open_with_flags(filename, flags).map_err(|x| ConnectionError::Open(x.to_string()))
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|x| x.into_inner())
    }

    /// Returns the maximum number of connections.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the number of open connections not in use.
    pub fn idle_count(&self) -> usize {
        self.lock().idle.len()
    }

    /// Returns the number of open connections.
    pub fn open_count(&self) -> usize {
        self.lock().open
    }

    /// Acquires a connection, waiting at most `timeout` for one to become available.
    pub fn acquire(self: &Arc<Self>, timeout: Duration) -> Result<PooledConnection, ConnectionError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(ConnectionError::PoolClosed);
            }
            if let Some(connection) = state.idle.pop() {
                return Ok(PooledConnection { pool: self.clone(), connection: Some(connection) });
            }
            if state.open < self.size {
                state.open += 1;
                drop(state);
                return match Self::connect(&self.filename) {
                    Ok(connection) => Ok(PooledConnection { pool: self.clone(), connection: Some(connection) }),
                    Err(err) => {
                        self.lock().open -= 1;
                        self.available.notify_one();
                        Err(err)
                    },
                };
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ConnectionError::Timeout(timeout));
            }
            state = self.available.wait_timeout(state, deadline - now).map(|x| x.0).unwrap_or_else(|x| x.into_inner().0);
        }
    }

    fn release(&self, connection: Connection) {
        let mut state = self.lock();
        if state.closed {
            state.open -= 1;
            drop(state);
            drop(connection);
        } else {
            state.idle.push(connection);
            drop(state);
        }
        self.available.notify_one();
    }

    /// Closes the pool.
    ///
    /// Idle connections are closed immediately and connections in use when they are released.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        let idle = std::mem::take(&mut state.idle);
        state.open -= idle.len();
        drop(state);
        drop(idle);
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// A connection acquired from a [`ConnectionPool`].
///
/// The connection returns to the pool when dropped.
#[derive(Debug)]
pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    connection: Option<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // The connection is only taken in `drop`.
        self.connection.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.release(connection);
        }
    }
}

//-----------------------------------------------------------------------------

/// State of a query handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandleState {
    /// Submitted but not picked up by a worker.
    Created,
    /// A worker is executing the query.
    Running,
    /// The worker has sent all rows or the error marker.
    Done,
    /// The handle was closed before the query finished.
    Closed,
}

// State shared by a handle and its worker.
struct HandleShared {
    closed: AtomicBool,
    state: Mutex<HandleState>,
    error: Mutex<Option<QueryError>>,
    interrupt: Mutex<Option<InterruptHandle>>,
}

impl HandleShared {
    fn new() -> Self {
        HandleShared {
            closed: AtomicBool::new(false),
            state: Mutex::new(HandleState::Created),
            error: Mutex::new(None),
            interrupt: Mutex::new(None),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn state(&self) -> HandleState {
        *self.state.lock().unwrap_or_else(|x| x.into_inner())
    }

    // Moves to the next state unless the handle is already closed or done.
    fn transition(&self, next: HandleState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|x| x.into_inner());
        match *state {
            HandleState::Done | HandleState::Closed => false,
            _ => {
                debug!("Query handle: {:?} -> {:?}", *state, next);
                *state = next;
                true
            },
        }
    }

    fn close(&self) {
        if !self.transition(HandleState::Closed) {
            return;
        }
        self.closed.store(true, Ordering::Release);
        let interrupt = self.interrupt.lock().unwrap_or_else(|x| x.into_inner());
        if let Some(handle) = interrupt.as_ref() {
            handle.interrupt();
        }
    }

    fn set_interrupt(&self, handle: Option<InterruptHandle>) {
        *self.interrupt.lock().unwrap_or_else(|x| x.into_inner()) = handle;
    }

    fn set_error(&self, err: QueryError) {
        *self.error.lock().unwrap_or_else(|x| x.into_inner()) = Some(err);
    }

    fn error(&self) -> Option<QueryError> {
        self.error.lock().unwrap_or_else(|x| x.into_inner()).clone()
    }
}

/// A handle to a submitted query.
///
/// Iterating over the handle yields the decoded rows in the order the backend returns them.
/// A failed query yields a single `Err` after the successful rows.
/// Dropping the handle closes it.
pub struct QueryHandle {
    shared: Arc<HandleShared>,
    receiver: Receiver<Result<VariantResult, QueryError>>,
}

impl QueryHandle {
    // Poll interval for noticing a close from another thread while waiting for rows.
    const POLL_INTERVAL: Duration = Duration::from_millis(50);

    pub fn state(&self) -> HandleState {
        self.shared.state()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Returns the error that terminated the query, if any.
    pub fn error(&self) -> Option<QueryError> {
        self.shared.error()
    }

    /// Closes the handle.
    ///
    /// Idempotent, and a no-op after the query is done.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Returns a closer that can be sent to another thread.
    pub fn closer(&self) -> QueryCloser {
        QueryCloser { shared: self.shared.clone() }
    }

    /// Waits at most `timeout` for the next row.
    ///
    /// Returns `Err(RecvTimeoutError::Disconnected)` when the stream has ended or the handle is closed.
    pub fn next_timeout(&self, timeout: Duration) -> Result<Result<VariantResult, QueryError>, RecvTimeoutError> {
        if self.is_closed() {
            return Err(RecvTimeoutError::Disconnected);
        }
        self.receiver.recv_timeout(timeout)
    }
}

impl Iterator for QueryHandle {
    type Item = Result<VariantResult, QueryError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.next_timeout(Self::POLL_INTERVAL) {
                Ok(item) => return Some(item),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

impl Drop for QueryHandle {
    fn drop(&mut self) {
        self.shared.close();
    }
}

/// Closes a query handle from another thread.
#[derive(Clone)]
pub struct QueryCloser {
    shared: Arc<HandleShared>,
}

impl QueryCloser {
    pub fn close(&self) {
        self.shared.close();
    }
}

//-----------------------------------------------------------------------------

struct Job {
    query: CompiledQuery,
    shared: Arc<HandleShared>,
    sender: Sender<Result<VariantResult, QueryError>>,
}

/// Runs compiled queries on a pool of worker threads.
///
/// Dropping the executor waits for the running queries to finish.
pub struct QueryExecutor {
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    pool: Arc<ConnectionPool>,
    params: ExecutorParams,
}

impl QueryExecutor {
    /// Starts the worker threads.
    pub fn new(pool: Arc<ConnectionPool>, families: Arc<dyn FamilyLookup>, params: ExecutorParams) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let mut workers = Vec::with_capacity(params.workers);
        for _ in 0..params.workers.max(1) {
            let receiver = receiver.clone();
            let pool = pool.clone();
            let families = families.clone();
            let params = params.clone();
            workers.push(thread::spawn(move || {
                for job in receiver.iter() {
                    run(job, &pool, families.as_ref(), &params);
                }
            }));
        }
        QueryExecutor { jobs: Some(sender), workers, pool, params }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn params(&self) -> &ExecutorParams {
        &self.params
    }

    /// Schedules the query and returns a handle to its results.
    pub fn submit(&self, query: CompiledQuery) -> QueryHandle {
        let (sender, receiver) = crossbeam_channel::bounded(self.params.channel_capacity.max(1));
        let shared = Arc::new(HandleShared::new());
        let job = Job { query, shared: shared.clone(), sender };
        let scheduled = self.jobs.as_ref().map(|jobs| jobs.send(job).is_ok()).unwrap_or(false);
        if !scheduled {
            shared.set_error(QueryError::Connection(ConnectionError::PoolClosed));
            shared.transition(HandleState::Done);
        }
        QueryHandle { shared, receiver }
    }
}

impl Drop for QueryExecutor {
    fn drop(&mut self) {
        drop(self.jobs.take());
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

//-----------------------------------------------------------------------------

// Sends the item, retrying until the consumer takes it or the handle is closed.
fn send(item: Result<VariantResult, QueryError>, job: &Job, params: &ExecutorParams) -> bool {
    let mut item = item;
    let mut attempts = 0;
    loop {
        if job.shared.is_closed() {
            return false;
        }
        match job.sender.send_timeout(item, params.send_timeout) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(returned)) => {
                item = returned;
                attempts += 1;
                if attempts == params.warn_after {
                    warn!("Nobody is consuming the results after {} attempts", attempts);
                }
                if attempts >= params.cancel_after {
                    warn!("Closing the query after {} failed sends", attempts);
                    job.shared.set_error(QueryError::Cancelled(attempts));
                    job.shared.close();
                    return false;
                }
            },
            Err(SendTimeoutError::Disconnected(_)) => {
                job.shared.close();
                return false;
            },
        }
    }
}

fn fail(err: QueryError, job: &Job, params: &ExecutorParams) {
    error!("Query failed: {}", err);
    job.shared.set_error(err.clone());
    send(Err(err), job, params);
}

// Executes the query and sends the rows. Returns the number of sent rows.
fn execute(connection: &Connection, job: &Job, families: &dyn FamilyLookup, params: &ExecutorParams) -> Result<usize, QueryError> {
    let query = &job.query;
    let execution = |err: rusqlite::Error| QueryError::Execution(err.to_string());
    let mut statement = connection.prepare(&query.sql).map_err(execution)?;
    let mut rows = statement.query(rusqlite::params_from_iter(query.sql_params())).map_err(execution)?;

    let mut cache = SummaryCache::default();
    let mut sent = 0;
    let mut dropped = 0;
    loop {
        let row = match rows.next() {
            Ok(Some(row)) => row,
            Ok(None) => break,
            Err(_) if job.shared.is_closed() => break,
            Err(err) => return Err(execution(err)),
        };
        if job.shared.is_closed() {
            break;
        }
        let mut values: Vec<Value> = Vec::with_capacity(query.columns.len());
        for index in 0..query.columns.len() {
            values.push(row.get(index).map_err(|x| QueryError::Decode(x.to_string()))?);
        }
        match query.decode_row(&values, families, &mut cache) {
            Ok(result) => {
                if !send(Ok(result), job, params) {
                    break;
                }
                sent += 1;
            },
            Err(err @ DecodeError::Column { .. }) => return Err(QueryError::Decode(err.to_string())),
            Err(err) => {
                warn!("Dropped a record: {}", err);
                dropped += 1;
            },
        }
    }
    if dropped > 0 {
        warn!("Dropped {} records that could not be decoded", dropped);
    }
    Ok(sent)
}

fn run(job: Job, pool: &Arc<ConnectionPool>, families: &dyn FamilyLookup, params: &ExecutorParams) {
    if !job.shared.transition(HandleState::Running) {
        debug!("Skipping a closed query");
        return;
    }

    let connection = loop {
        if job.shared.is_closed() {
            return;
        }
        match pool.acquire(params.acquire_timeout) {
            Ok(connection) => break connection,
            Err(ConnectionError::Timeout(_)) => continue,
            Err(err) => {
                fail(err.into(), &job, params);
                job.shared.transition(HandleState::Done);
                return;
            },
        }
    };

    job.shared.set_interrupt(Some(connection.get_interrupt_handle()));
    let result = if job.shared.is_closed() { Ok(0) } else { execute(&connection, &job, families, params) };
    job.shared.set_interrupt(None);
    drop(connection);

    match result {
        Ok(sent) => debug!("Query sent {} rows", sent),
        Err(err) => fail(err, &job, params),
    }
    job.shared.transition(HandleState::Done);
}

//-----------------------------------------------------------------------------
