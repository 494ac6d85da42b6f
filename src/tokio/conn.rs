//! Asynchronous PostgreSQL connection.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::buffer_set::BufferSet;
use crate::cancel::CancelToken;
use crate::conversion::{FromRow, Row, ToParams, encode_params};
use crate::error::{Error, Result};
use crate::handler::{
    AsyncMessageHandler, CollectHandler, DropHandler, FirstRowHandler, RowHandler, RowsHandler,
};
use crate::opts::{Opts, TransportTarget};
use crate::protocol::backend::ColumnInfo;
use crate::protocol::frontend::{Target, write_terminate};
use crate::protocol::types::{Oid, TransactionStatus};
use crate::state::action::{Action, Notification, parse_async_message};
use crate::state::batch::{Batch, BatchOutcome, BatchStateMachine};
use crate::state::connection::ConnectionStateMachine;
use crate::state::extended::ExtendedQueryStateMachine;
use crate::state::session::{Lifecycle, Session};
use crate::state::simple_query::SimpleQueryStateMachine;
use crate::state::transaction::{quote_identifier, validate_savepoint_name};
use crate::state::{StateMachine, TransactionStack};
use crate::statement::{IntoStatement, PreparedStatement};

use super::stream::Stream;
use super::transaction::Transaction;

fn timed_out() -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "I/O timed out"))
}

/// Await `fut`, bounded by `limit` when one is set.
async fn bounded<T>(limit: Option<Duration>, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_elapsed| timed_out())?,
        None => fut.await,
    }
}

/// Asynchronous PostgreSQL connection.
///
/// Dropping the connection closes the socket without a Terminate message;
/// call [`close`](Self::close) for a clean shutdown.
pub struct Conn {
    stream: Stream,
    buffer_set: BufferSet,
    session: Session,
    target: TransportTarget,
    io_timeout: Option<Duration>,
}

impl Conn {
    /// Connect to a PostgreSQL server.
    pub async fn new<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts = opts.try_into()?;
        let target = opts.target()?;
        tracing::debug!(%target, "connecting");
        let conn = bounded(opts.io_timeout, async {
            let stream = Stream::connect(&target).await?;
            Self::startup(stream, target.clone(), &opts).await
        })
        .await?;

        // Upgrade to Unix socket if connected via TCP to loopback
        let conn = if opts.prefer_unix_socket && conn.stream.is_tcp_loopback() {
            conn.try_upgrade_to_unix_socket(&opts).await
        } else {
            conn
        };
        Ok(conn)
    }

    async fn startup(mut stream: Stream, target: TransportTarget, opts: &Opts) -> Result<Self> {
        let mut opts = opts.clone();
        opts.ssl_mode = opts.effective_ssl_mode(&target, cfg!(feature = "tokio-tls"))?;
        let io_timeout = opts.io_timeout;
        #[cfg(feature = "tokio-tls")]
        let host = opts.host.clone();

        let mut buffer_set = BufferSet::new();
        let mut state_machine = ConnectionStateMachine::new(opts);
        loop {
            match state_machine.step(&mut buffer_set)? {
                Action::WriteAndReadByte => {
                    stream.write_all(&buffer_set.write_buffer).await?;
                    stream.flush().await?;
                    let byte = stream.read_u8().await?;
                    state_machine.set_ssl_response(byte);
                }
                Action::ReadMessage => stream.read_message(&mut buffer_set).await?,
                Action::Write => {
                    stream.write_all(&buffer_set.write_buffer).await?;
                    stream.flush().await?;
                }
                Action::WriteAndReadMessage => {
                    stream.write_all(&buffer_set.write_buffer).await?;
                    stream.flush().await?;
                    stream.read_message(&mut buffer_set).await?;
                }
                Action::TlsHandshake => {
                    #[cfg(feature = "tokio-tls")]
                    {
                        stream = stream.upgrade_to_tls(&host).await?;
                    }
                    #[cfg(not(feature = "tokio-tls"))]
                    {
                        return Err(Error::ProtocolSync(
                            "TLS handshake requested without the tokio-tls feature".into(),
                        ));
                    }
                }
                Action::HandleAsyncMessageAndReadMessage(_) => {
                    stream.read_message(&mut buffer_set).await?;
                }
                Action::Finished => break,
            }
        }

        Ok(Self {
            stream,
            buffer_set,
            session: state_machine.into_session(),
            target,
            io_timeout,
        })
    }

    /// Try to upgrade to Unix socket connection.
    /// Returns upgraded conn on success, original conn on failure.
    async fn try_upgrade_to_unix_socket(mut self, opts: &Opts) -> Self {
        let dirs = match self.query_first::<(String,)>("SHOW unix_socket_directories").await {
            Ok(Some((dirs,))) => dirs,
            _ => return self,
        };
        // May contain multiple directories, use the first one
        let socket_dir = match dirs.split(',').next().map(str::trim) {
            Some(d) if !d.is_empty() => d.to_string(),
            _ => return self,
        };
        let target = TransportTarget::UnixSocket(format!("{socket_dir}/.s.PGSQL.{}", opts.port).into());

        let mut opts_unix = opts.clone();
        opts_unix.prefer_unix_socket = false;
        let upgraded = bounded(opts.io_timeout, async {
            let stream = Stream::connect(&target).await?;
            Self::startup(stream, target.clone(), &opts_unix).await
        })
        .await;
        match upgraded {
            Ok(mut new_conn) => {
                tracing::debug!(target = %new_conn.target, "upgraded to unix socket");
                std::mem::swap(&mut self, &mut new_conn);
                // The TCP connection is done; a failed goodbye does not matter.
                if let Err(e) = new_conn.close().await {
                    tracing::warn!("failed to send Terminate: {e}");
                }
                self
            }
            Err(_) => self,
        }
    }

    // === Driving ===

    async fn write_pending(&mut self) -> Result<()> {
        let limit = self.io_timeout;
        let stream = &mut self.stream;
        let pending = &self.buffer_set.write_buffer;
        bounded(limit, async move {
            stream.write_all(pending).await?;
            stream.flush().await?;
            Ok(())
        })
        .await
    }

    async fn read_message(&mut self) -> Result<()> {
        bounded(self.io_timeout, self.stream.read_message(&mut self.buffer_set)).await
    }

    /// Drive a state machine to completion, apply its ReadyForQuery and mark
    /// the connection broken on transport or protocol failure.
    async fn drive<S: StateMachine>(&mut self, state_machine: &mut S) -> Result<()> {
        let result = self.run(state_machine).await;
        if let Some(status) = state_machine.ready_status() {
            self.session.on_ready(status);
        }
        self.settle(result)
    }

    async fn run<S: StateMachine>(&mut self, state_machine: &mut S) -> Result<()> {
        loop {
            match state_machine.step(&mut self.buffer_set)? {
                Action::WriteAndReadByte | Action::TlsHandshake => {
                    return Err(Error::ProtocolSync(
                        "startup action requested by a query state machine".into(),
                    ));
                }
                Action::ReadMessage => self.read_message().await?,
                Action::Write => self.write_pending().await?,
                Action::WriteAndReadMessage => {
                    self.write_pending().await?;
                    self.read_message().await?;
                }
                Action::HandleAsyncMessageAndReadMessage(message) => {
                    self.session.handle_async(message);
                    self.read_message().await?;
                }
                Action::Finished => return Ok(()),
            }
        }
    }

    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result
            && e.is_connection_broken()
        {
            self.session.mark_broken(e);
        }
        result
    }

    // === Session state ===

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Get the connection ID (backend process ID).
    ///
    /// Returns 0 if the backend key data is not available.
    pub fn connection_id(&self) -> u32 {
        self.session.process_id()
    }

    pub fn target(&self) -> &TransportTarget {
        &self.target
    }

    pub fn server_params(&self) -> &[(String, String)] {
        self.session.server_params()
    }

    pub fn server_param(&self, name: &str) -> Option<&str> {
        self.session.server_param(name)
    }

    pub fn server_version(&self) -> Option<&str> {
        self.session.server_version()
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.session.transaction_status()
    }

    /// Check if currently in a transaction.
    pub fn in_transaction(&self) -> bool {
        self.session.transaction_status().in_transaction()
    }

    pub fn transactions(&self) -> &TransactionStack {
        self.session.transactions()
    }

    pub fn is_broken(&self) -> bool {
        self.session.lifecycle() == Lifecycle::Broken
    }

    pub fn is_closed(&self) -> bool {
        self.session.lifecycle() == Lifecycle::Closed
    }

    /// Set the async message handler.
    ///
    /// The handler is called when the server sends asynchronous messages:
    /// - `Notice` - warnings and informational messages
    /// - `ParameterChanged` - server parameter updates
    pub fn set_async_handler<H: AsyncMessageHandler + 'static>(&mut self, handler: H) {
        self.session.set_async_handler(Some(Box::new(handler)));
    }

    pub fn clear_async_handler(&mut self) {
        self.session.set_async_handler(None);
    }

    pub fn cancel_token(&self) -> Option<CancelToken> {
        self.session.backend_key().map(|key| {
            CancelToken::new(self.target.clone(), key.process_id(), key.secret(), self.io_timeout)
        })
    }

    // === Simple query protocol ===

    pub async fn query<H: RowHandler>(&mut self, sql: &str, handler: &mut H) -> Result<()> {
        self.session.ensure_open()?;
        let mut state_machine = SimpleQueryStateMachine::new(handler, sql);
        self.drive(&mut state_machine).await
    }

    pub async fn query_drop(&mut self, sql: &str) -> Result<Option<u64>> {
        let mut handler = DropHandler::new();
        self.query(sql, &mut handler).await?;
        Ok(handler.rows_affected())
    }

    pub async fn query_collect<T: for<'a> FromRow<'a>>(&mut self, sql: &str) -> Result<Vec<T>> {
        let mut handler = CollectHandler::<T>::new();
        self.query(sql, &mut handler).await?;
        Ok(handler.into_rows())
    }

    pub async fn query_first<T: for<'a> FromRow<'a>>(&mut self, sql: &str) -> Result<Option<T>> {
        let mut handler = FirstRowHandler::<T>::new();
        self.query(sql, &mut handler).await?;
        Ok(handler.into_row())
    }

    pub async fn query_rows(&mut self, sql: &str) -> Result<Vec<Row>> {
        let mut handler = RowsHandler::new();
        self.query(sql, &mut handler).await?;
        Ok(handler.into_rows())
    }

    /// Ping the server with an empty query to check connection aliveness.
    pub async fn ping(&mut self) -> Result<()> {
        self.query_drop("").await?;
        Ok(())
    }

    // === Extended query protocol ===

    pub async fn prepare(&mut self, sql: &str) -> Result<PreparedStatement> {
        self.prepare_typed(sql, &[]).await
    }

    pub async fn prepare_typed(&mut self, sql: &str, param_oids: &[Oid]) -> Result<PreparedStatement> {
        self.session.ensure_open()?;
        let name = self.session.next_statement_name();
        let mut handler = DropHandler::new();
        let mut state_machine =
            ExtendedQueryStateMachine::prepare(&mut self.buffer_set, &mut handler, &name, sql, param_oids);
        self.drive(&mut state_machine).await?;
        let described_oids = state_machine.take_param_oids();
        let columns = state_machine.columns().map(|c| c.to_vec()).unwrap_or_default();
        tracing::debug!(name = %name, params = described_oids.len(), "statement prepared");
        let stmt = PreparedStatement::new(
            name,
            sql.to_string(),
            described_oids,
            columns,
            self.session.integer_datetimes(),
        );
        self.session.register_statement(stmt.clone());
        Ok(stmt)
    }

    /// Execute a prepared statement or raw SQL with a handler.
    pub async fn exec<S: IntoStatement, P: ToParams, H: RowHandler>(
        &mut self,
        statement: S,
        params: P,
        handler: &mut H,
    ) -> Result<()> {
        self.session.ensure_open()?;
        if let Some(stmt) = statement.as_prepared() {
            self.session.check_statement(stmt)?;
            let encoded = encode_params(&params, stmt.param_oids())?;
            let mut state_machine =
                ExtendedQueryStateMachine::execute(&mut self.buffer_set, handler, stmt, &encoded);
            self.drive(&mut state_machine).await
        } else if let Some(sql) = statement.as_sql() {
            let param_oids = params.natural_oids();
            let encoded = encode_params(&params, &param_oids)?;
            let mut state_machine = ExtendedQueryStateMachine::execute_sql(
                &mut self.buffer_set,
                handler,
                sql,
                &param_oids,
                &encoded,
            );
            self.drive(&mut state_machine).await
        } else {
            Err(Error::InvalidUsage("statement is neither SQL nor prepared".into()))
        }
    }

    pub async fn exec_drop<S: IntoStatement, P: ToParams>(&mut self, statement: S, params: P) -> Result<Option<u64>> {
        let mut handler = DropHandler::new();
        self.exec(statement, params, &mut handler).await?;
        Ok(handler.rows_affected())
    }

    pub async fn exec_collect<T: for<'a> FromRow<'a>, S: IntoStatement, P: ToParams>(
        &mut self,
        statement: S,
        params: P,
    ) -> Result<Vec<T>> {
        let mut handler = CollectHandler::<T>::new();
        self.exec(statement, params, &mut handler).await?;
        Ok(handler.into_rows())
    }

    pub async fn exec_first<T: for<'a> FromRow<'a>, S: IntoStatement, P: ToParams>(
        &mut self,
        statement: S,
        params: P,
    ) -> Result<Option<T>> {
        let mut handler = FirstRowHandler::<T>::new();
        self.exec(statement, params, &mut handler).await?;
        Ok(handler.into_row())
    }

    pub async fn exec_rows<S: IntoStatement, P: ToParams>(&mut self, statement: S, params: P) -> Result<Vec<Row>> {
        let mut handler = RowsHandler::new();
        self.exec(statement, params, &mut handler).await?;
        Ok(handler.into_rows())
    }

    pub async fn close_statement(&mut self, statement: &PreparedStatement) -> Result<()> {
        self.session.ensure_open()?;
        self.session.check_statement(statement)?;
        let mut handler = DropHandler::new();
        let mut state_machine =
            ExtendedQueryStateMachine::close(&mut self.buffer_set, &mut handler, Target::Statement, statement.name());
        self.drive(&mut state_machine).await?;
        self.session.unregister_statement(statement);
        tracing::debug!(name = statement.name(), "statement closed");
        Ok(())
    }

    // === Batches ===

    pub fn batch(&self) -> Batch {
        Batch::new()
    }

    /// Send every batch entry followed by a single Sync.
    pub async fn run_batch(&mut self, batch: &Batch) -> Result<Vec<BatchOutcome>> {
        self.session.ensure_open()?;
        for stmt in batch.statements() {
            self.session.check_statement(stmt)?;
        }
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let mut state_machine = BatchStateMachine::new(&mut self.buffer_set, batch);
        self.drive(&mut state_machine).await?;
        Ok(state_machine.into_outcomes())
    }

    // === Portals ===

    pub(crate) async fn bind_portal<S: IntoStatement, P: ToParams>(
        &mut self,
        statement: S,
        params: P,
    ) -> Result<(String, Arc<[ColumnInfo]>)> {
        self.session.ensure_open()?;
        if !self.session.transaction_status().in_transaction() {
            return Err(Error::InvalidUsage("named portals need an open transaction".into()));
        }
        let name = self.session.next_portal_name();
        let mut handler = DropHandler::new();
        let columns = if let Some(stmt) = statement.as_prepared() {
            self.session.check_statement(stmt)?;
            let encoded = encode_params(&params, stmt.param_oids())?;
            let mut state_machine =
                ExtendedQueryStateMachine::bind_portal(&mut self.buffer_set, &mut handler, &name, stmt, &encoded);
            self.drive(&mut state_machine).await?;
            Arc::clone(stmt.shared_columns())
        } else if let Some(sql) = statement.as_sql() {
            let param_oids = params.natural_oids();
            let encoded = encode_params(&params, &param_oids)?;
            let mut state_machine = ExtendedQueryStateMachine::bind_portal_sql(
                &mut self.buffer_set,
                &mut handler,
                &name,
                sql,
                &param_oids,
                &encoded,
            );
            self.drive(&mut state_machine).await?;
            state_machine.columns().cloned().unwrap_or_else(|| Arc::from(Vec::new()))
        } else {
            return Err(Error::InvalidUsage("statement is neither SQL nor prepared".into()));
        };
        self.session.register_portal(&name);
        tracing::debug!(portal = %name, "portal bound");
        Ok((name, columns))
    }

    pub(crate) async fn execute_portal<H: RowHandler>(
        &mut self,
        name: &str,
        columns: &Arc<[ColumnInfo]>,
        max_rows: u32,
        handler: &mut H,
    ) -> Result<bool> {
        self.session.ensure_open()?;
        if self.session.portal(name).is_none_or(|p| p.complete) {
            return Err(Error::InvalidUsage(format!("portal {name:?} is closed or exhausted")));
        }
        let mut state_machine = ExtendedQueryStateMachine::execute_portal(
            &mut self.buffer_set,
            handler,
            name,
            Arc::clone(columns),
            max_rows,
        );
        self.drive(&mut state_machine).await?;
        let has_more = state_machine.is_suspended();
        if let Ok(portal) = self.session.portal_mut(name) {
            portal.rows += state_machine.rows_seen();
            portal.complete = !has_more;
        }
        Ok(has_more)
    }

    pub(crate) async fn close_portal(&mut self, name: &str) -> Result<()> {
        self.session.ensure_open()?;
        if self.session.portal(name).is_none() {
            // Already closed by the end of its transaction.
            return Ok(());
        }
        let mut handler = DropHandler::new();
        let mut state_machine =
            ExtendedQueryStateMachine::close(&mut self.buffer_set, &mut handler, Target::Portal, name);
        self.drive(&mut state_machine).await?;
        self.session.remove_portal(name);
        Ok(())
    }

    // === Transactions ===

    pub async fn begin(&mut self) -> Result<()> {
        self.session.ensure_open()?;
        if self.transaction_status().in_transaction() || !self.session.transactions().is_empty() {
            return Err(Error::InvalidUsage("a transaction is already open".into()));
        }
        self.session.transactions_mut().begin();
        self.query_drop("BEGIN").await?;
        Ok(())
    }

    /// Send `COMMIT`. Refused locally while the transaction is aborted.
    pub async fn commit(&mut self) -> Result<()> {
        self.session.ensure_open()?;
        match self.transaction_status() {
            TransactionStatus::Failed => Err(Error::InFailedTransaction),
            TransactionStatus::Idle => Err(Error::InvalidUsage("no transaction is open".into())),
            TransactionStatus::InTransaction => {
                self.query_drop("COMMIT").await?;
                Ok(())
            }
        }
    }

    pub async fn rollback(&mut self) -> Result<()> {
        self.session.ensure_open()?;
        if self.transaction_status() == TransactionStatus::Idle {
            return Ok(());
        }
        self.query_drop("ROLLBACK").await?;
        Ok(())
    }

    pub async fn savepoint(&mut self, name: &str) -> Result<()> {
        self.session.ensure_open()?;
        validate_savepoint_name(name)?;
        match self.transaction_status() {
            TransactionStatus::Failed => return Err(Error::InFailedTransaction),
            TransactionStatus::Idle => {
                return Err(Error::InvalidUsage("savepoints need an open transaction".into()));
            }
            TransactionStatus::InTransaction => {}
        }
        self.query_drop(&format!("SAVEPOINT {}", quote_identifier(name))).await?;
        self.session.transactions_mut().push_savepoint(name);
        Ok(())
    }

    pub async fn release(&mut self, name: &str) -> Result<()> {
        self.session.ensure_open()?;
        validate_savepoint_name(name)?;
        if self.transaction_status() == TransactionStatus::Failed {
            return Err(Error::InFailedTransaction);
        }
        self.check_savepoint(name)?;
        self.query_drop(&format!("RELEASE SAVEPOINT {}", quote_identifier(name)))
            .await?;
        self.session.transactions_mut().release(name)
    }

    pub async fn rollback_to(&mut self, name: &str) -> Result<()> {
        self.session.ensure_open()?;
        validate_savepoint_name(name)?;
        self.check_savepoint(name)?;
        self.query_drop(&format!("ROLLBACK TO SAVEPOINT {}", quote_identifier(name)))
            .await?;
        self.session.transactions_mut().rollback_to(name)
    }

    fn check_savepoint(&self, name: &str) -> Result<()> {
        if self.session.transactions().contains_savepoint(name) {
            Ok(())
        } else {
            Err(Error::InvalidUsage(format!("no savepoint named {name:?} is open")))
        }
    }

    /// Begin a transaction, or a savepoint when one is already open.
    pub async fn start_transaction(&mut self) -> Result<Transaction> {
        Transaction::start(self).await
    }

    /// Run `f` inside a transaction block.
    ///
    /// Nested calls become savepoints. The block commits (or releases) when
    /// `f` returns `Ok` and rolls back otherwise, unless `f` already finished
    /// it through the handle.
    ///
    /// # Example
    ///
    /// ```ignore
    /// conn.transaction(async |conn, _tx| {
    ///     conn.exec_drop("INSERT INTO t VALUES ($1)", (1,)).await?;
    ///     Ok(())
    /// })
    /// .await?;
    /// ```
    pub async fn transaction<F, R>(&mut self, f: F) -> Result<R>
    where
        F: AsyncFnOnce(&mut Conn, &mut Transaction) -> Result<R>,
    {
        let mut tx = self.start_transaction().await?;
        let result = f(self, &mut tx).await;
        if tx.is_finished() {
            return result;
        }
        match result {
            Ok(value) if self.transaction_status() != TransactionStatus::Failed => {
                tx.commit(self).await?;
                Ok(value)
            }
            Ok(_) => {
                tx.rollback(self).await?;
                Err(Error::InFailedTransaction)
            }
            Err(e) => {
                if self.session.ensure_open().is_ok()
                    && let Err(rollback_error) = tx.rollback(self).await
                {
                    tracing::warn!("rollback after failed transaction block: {rollback_error}");
                }
                Err(e)
            }
        }
    }

    // === Notifications ===

    pub async fn listen(&mut self, channel: &str) -> Result<()> {
        self.query_drop(&format!("LISTEN {}", quote_identifier(channel))).await?;
        Ok(())
    }

    /// Stop listening and drop the callbacks registered for `channel`.
    pub async fn unlisten(&mut self, channel: &str) -> Result<()> {
        self.query_drop(&format!("UNLISTEN {}", quote_identifier(channel))).await?;
        self.session.remove_listeners(channel);
        Ok(())
    }

    pub async fn notify(&mut self, channel: &str, payload: &str) -> Result<()> {
        self.exec_drop("SELECT pg_notify($1, $2)", (channel, payload)).await?;
        Ok(())
    }

    pub fn on_notification<F>(&mut self, channel: &str, callback: F)
    where
        F: FnMut(&Notification) + Send + 'static,
    {
        self.session.add_listener(channel, Box::new(callback));
    }

    pub fn poll_notification(&mut self) -> Option<Notification> {
        self.session.poll_notification()
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        self.session.drain_notifications()
    }

    /// Wait until a notification is queued. Only valid while no request is
    /// in flight; the io timeout does not apply.
    pub async fn wait_notification(&mut self) -> Result<Notification> {
        self.session.ensure_open()?;
        loop {
            if let Some(notification) = self.session.poll_notification() {
                return Ok(notification);
            }
            let read = self.stream.read_message(&mut self.buffer_set).await;
            self.settle(read)?;
            let message = parse_async_message(self.buffer_set.type_byte, &self.buffer_set.read_buffer);
            match self.settle(message)? {
                Some(message) => self.session.handle_async(message),
                None => {
                    let error = Error::ProtocolSync(format!(
                        "unexpected message '{}' while idle",
                        self.buffer_set.type_byte as char
                    ));
                    return self.settle(Err(error));
                }
            }
        }
    }

    // === Lifecycle ===

    /// Send Terminate and close the connection. Later operations fail with
    /// [`Error::ConnectionDoesNotExist`].
    pub async fn close(&mut self) -> Result<()> {
        let result = if self.session.lifecycle() == Lifecycle::Ready {
            self.buffer_set.write_buffer.clear();
            write_terminate(&mut self.buffer_set.write_buffer);
            self.write_pending().await
        } else {
            Ok(())
        };
        self.session.mark_closed();
        result
    }
}
