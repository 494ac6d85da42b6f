//! Synchronous PostgreSQL connection.

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

/// Synchronous PostgreSQL connection.
pub struct Conn {
    stream: Stream,
    buffer_set: BufferSet,
    session: Session,
    target: TransportTarget,
    io_timeout: Option<Duration>,
}

impl Conn {
    /// Connect to a PostgreSQL server.
    pub fn new<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts = opts.try_into()?;
        let target = opts.target()?;
        tracing::debug!(%target, "connecting");
        let stream = Stream::connect(&target, opts.io_timeout)?;
        let conn = Self::startup(stream, target, &opts)?;

        // Upgrade to Unix socket if connected via TCP to loopback
        let conn = if opts.prefer_unix_socket && conn.stream.is_tcp_loopback() {
            conn.try_upgrade_to_unix_socket(&opts)
        } else {
            conn
        };
        Ok(conn)
    }

    fn startup(mut stream: Stream, target: TransportTarget, opts: &Opts) -> Result<Self> {
        let mut opts = opts.clone();
        opts.ssl_mode = opts.effective_ssl_mode(&target, cfg!(feature = "sync-tls"))?;
        let io_timeout = opts.io_timeout;
        #[cfg(feature = "sync-tls")]
        let host = opts.host.clone();

        let mut buffer_set = BufferSet::new();
        let mut state_machine = ConnectionStateMachine::new(opts);
        loop {
            match state_machine.step(&mut buffer_set)? {
                Action::WriteAndReadByte => {
                    stream.write_all(&buffer_set.write_buffer)?;
                    stream.flush()?;
                    let byte = stream.read_u8()?;
                    state_machine.set_ssl_response(byte);
                }
                Action::ReadMessage => stream.read_message(&mut buffer_set)?,
                Action::Write => {
                    stream.write_all(&buffer_set.write_buffer)?;
                    stream.flush()?;
                }
                Action::WriteAndReadMessage => {
                    stream.write_all(&buffer_set.write_buffer)?;
                    stream.flush()?;
                    stream.read_message(&mut buffer_set)?;
                }
                Action::TlsHandshake => {
                    #[cfg(feature = "sync-tls")]
                    {
                        stream = stream.upgrade_to_tls(&host)?;
                    }
                    #[cfg(not(feature = "sync-tls"))]
                    {
                        return Err(Error::ProtocolSync(
                            "TLS handshake requested without the sync-tls feature".into(),
                        ));
                    }
                }
                Action::HandleAsyncMessageAndReadMessage(_) => {
                    stream.read_message(&mut buffer_set)?;
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
    fn try_upgrade_to_unix_socket(mut self, opts: &Opts) -> Self {
        let dirs = match self.query_first::<(String,)>("SHOW unix_socket_directories") {
            Ok(Some((dirs,))) => dirs,
            _ => return self,
        };
        // May contain multiple directories, use the first one
        let socket_dir = match dirs.split(',').next().map(str::trim) {
            Some(d) if !d.is_empty() => d.to_string(),
            _ => return self,
        };
        let target = TransportTarget::UnixSocket(format!("{socket_dir}/.s.PGSQL.{}", opts.port).into());
        let Ok(stream) = Stream::connect(&target, opts.io_timeout) else {
            return self;
        };

        let mut opts_unix = opts.clone();
        opts_unix.prefer_unix_socket = false;
        match Self::startup(stream, target, &opts_unix) {
            Ok(new_conn) => {
                tracing::debug!(target = %new_conn.target, "upgraded to unix socket");
                new_conn
            }
            Err(_) => self,
        }
    }

    // === Driving ===

    fn write_pending(&mut self) -> Result<()> {
        self.stream.write_all(&self.buffer_set.write_buffer)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Drive a state machine to completion, then apply its ReadyForQuery.
    fn drive<S: StateMachine>(&mut self, state_machine: &mut S) -> Result<()> {
        let result = self.run(state_machine);
        if let Some(status) = state_machine.ready_status() {
            self.session.on_ready(status);
        }
        result
    }

    fn run<S: StateMachine>(&mut self, state_machine: &mut S) -> Result<()> {
        loop {
            match state_machine.step(&mut self.buffer_set)? {
                Action::WriteAndReadByte | Action::TlsHandshake => {
                    return Err(Error::ProtocolSync(
                        "startup action requested by a query state machine".into(),
                    ));
                }
                Action::ReadMessage => self.stream.read_message(&mut self.buffer_set)?,
                Action::Write => self.write_pending()?,
                Action::WriteAndReadMessage => {
                    self.write_pending()?;
                    self.stream.read_message(&mut self.buffer_set)?;
                }
                Action::HandleAsyncMessageAndReadMessage(message) => {
                    self.session.handle_async(message);
                    self.stream.read_message(&mut self.buffer_set)?;
                }
                Action::Finished => return Ok(()),
            }
        }
    }

    /// Run `f` on an open connection, marking it broken when `f` fails in a
    /// way that leaves the stream unusable.
    fn guarded<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.session.ensure_open()?;
        let result = f(self);
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

    /// Observe notices and parameter changes.
    pub fn set_async_handler<H: AsyncMessageHandler + 'static>(&mut self, handler: H) {
        self.session.set_async_handler(Some(Box::new(handler)));
    }

    pub fn clear_async_handler(&mut self) {
        self.session.set_async_handler(None);
    }

    /// Token for cancelling queries on this connection from elsewhere.
    pub fn cancel_token(&self) -> Option<CancelToken> {
        self.session.backend_key().map(|key| {
            CancelToken::new(self.target.clone(), key.process_id(), key.secret(), self.io_timeout)
        })
    }

    // === Simple query protocol ===

    /// Execute a simple query with a handler.
    pub fn query<H: RowHandler>(&mut self, sql: &str, handler: &mut H) -> Result<()> {
        self.guarded(|conn| {
            let mut state_machine = SimpleQueryStateMachine::new(handler, sql);
            conn.drive(&mut state_machine)
        })
    }

    /// Execute a simple query and discard results.
    pub fn query_drop(&mut self, sql: &str) -> Result<Option<u64>> {
        let mut handler = DropHandler::new();
        self.query(sql, &mut handler)?;
        Ok(handler.rows_affected())
    }

    /// Execute a simple query and collect typed rows.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let rows: Vec<(i32, String)> = conn.query_collect("SELECT id, name FROM users")?;
    /// ```
    pub fn query_collect<T: for<'a> FromRow<'a>>(&mut self, sql: &str) -> Result<Vec<T>> {
        let mut handler = CollectHandler::<T>::new();
        self.query(sql, &mut handler)?;
        Ok(handler.into_rows())
    }

    /// Execute a simple query and return the first typed row.
    pub fn query_first<T: for<'a> FromRow<'a>>(&mut self, sql: &str) -> Result<Option<T>> {
        let mut handler = FirstRowHandler::<T>::new();
        self.query(sql, &mut handler)?;
        Ok(handler.into_row())
    }

    pub fn query_rows(&mut self, sql: &str) -> Result<Vec<Row>> {
        let mut handler = RowsHandler::new();
        self.query(sql, &mut handler)?;
        Ok(handler.into_rows())
    }

    /// Ping the server with an empty query to check connection aliveness.
    pub fn ping(&mut self) -> Result<()> {
        self.query_drop("")?;
        Ok(())
    }

    // === Extended query protocol ===

    /// Prepare a statement, letting the server infer parameter types.
    pub fn prepare(&mut self, sql: &str) -> Result<PreparedStatement> {
        self.prepare_typed(sql, &[])
    }

    /// Prepare a statement with explicit parameter types. `0` leaves a
    /// parameter for the server to infer.
    pub fn prepare_typed(&mut self, sql: &str, param_oids: &[Oid]) -> Result<PreparedStatement> {
        self.guarded(|conn| {
            let name = conn.session.next_statement_name();
            let mut handler = DropHandler::new();
            let mut state_machine = ExtendedQueryStateMachine::prepare(
                &mut conn.buffer_set,
                &mut handler,
                &name,
                sql,
                param_oids,
            );
            conn.drive(&mut state_machine)?;
            let described_oids = state_machine.take_param_oids();
            let columns = state_machine.columns().map(|c| c.to_vec()).unwrap_or_default();
            tracing::debug!(name = %name, params = described_oids.len(), "statement prepared");
            let stmt = PreparedStatement::new(
                name,
                sql.to_string(),
                described_oids,
                columns,
                conn.session.integer_datetimes(),
            );
            conn.session.register_statement(stmt.clone());
            Ok(stmt)
        })
    }

    /// Execute a prepared statement or raw SQL with a handler.
    ///
    /// Raw SQL is parsed as the unnamed statement with the parameters'
    /// natural types and returns text-format results.
    pub fn exec<S: IntoStatement, P: ToParams, H: RowHandler>(
        &mut self,
        statement: S,
        params: P,
        handler: &mut H,
    ) -> Result<()> {
        self.guarded(|conn| {
            if let Some(stmt) = statement.as_prepared() {
                conn.session.check_statement(stmt)?;
                let encoded = encode_params(&params, stmt.param_oids())?;
                let mut state_machine =
                    ExtendedQueryStateMachine::execute(&mut conn.buffer_set, handler, stmt, &encoded);
                conn.drive(&mut state_machine)
            } else if let Some(sql) = statement.as_sql() {
                let param_oids = params.natural_oids();
                let encoded = encode_params(&params, &param_oids)?;
                let mut state_machine = ExtendedQueryStateMachine::execute_sql(
                    &mut conn.buffer_set,
                    handler,
                    sql,
                    &param_oids,
                    &encoded,
                );
                conn.drive(&mut state_machine)
            } else {
                Err(Error::InvalidUsage("statement is neither SQL nor prepared".into()))
            }
        })
    }

    /// Execute and return the number of affected rows, if the command reports one.
    pub fn exec_drop<S: IntoStatement, P: ToParams>(&mut self, statement: S, params: P) -> Result<Option<u64>> {
        let mut handler = DropHandler::new();
        self.exec(statement, params, &mut handler)?;
        Ok(handler.rows_affected())
    }

    pub fn exec_collect<T: for<'a> FromRow<'a>, S: IntoStatement, P: ToParams>(
        &mut self,
        statement: S,
        params: P,
    ) -> Result<Vec<T>> {
        let mut handler = CollectHandler::<T>::new();
        self.exec(statement, params, &mut handler)?;
        Ok(handler.into_rows())
    }

    pub fn exec_first<T: for<'a> FromRow<'a>, S: IntoStatement, P: ToParams>(
        &mut self,
        statement: S,
        params: P,
    ) -> Result<Option<T>> {
        let mut handler = FirstRowHandler::<T>::new();
        self.exec(statement, params, &mut handler)?;
        Ok(handler.into_row())
    }

    /// Execute and collect dynamic rows.
    pub fn exec_rows<S: IntoStatement, P: ToParams>(&mut self, statement: S, params: P) -> Result<Vec<Row>> {
        let mut handler = RowsHandler::new();
        self.exec(statement, params, &mut handler)?;
        Ok(handler.into_rows())
    }

    /// Close a prepared statement on the server.
    pub fn close_statement(&mut self, statement: &PreparedStatement) -> Result<()> {
        self.guarded(|conn| {
            conn.session.check_statement(statement)?;
            let mut handler = DropHandler::new();
            let mut state_machine = ExtendedQueryStateMachine::close(
                &mut conn.buffer_set,
                &mut handler,
                Target::Statement,
                statement.name(),
            );
            conn.drive(&mut state_machine)?;
            conn.session.unregister_statement(statement);
            tracing::debug!(name = statement.name(), "statement closed");
            Ok(())
        })
    }

    // === Batches ===

    pub fn batch(&self) -> Batch {
        Batch::new()
    }

    /// Send every batch entry followed by a single Sync.
    ///
    /// A server error fails its entry and skips the rest; it is reported in
    /// the outcomes rather than as `Err`.
    pub fn run_batch(&mut self, batch: &Batch) -> Result<Vec<BatchOutcome>> {
        self.guarded(|conn| {
            for stmt in batch.statements() {
                conn.session.check_statement(stmt)?;
            }
            if batch.is_empty() {
                return Ok(Vec::new());
            }
            let mut state_machine = BatchStateMachine::new(&mut conn.buffer_set, batch);
            conn.drive(&mut state_machine)?;
            Ok(state_machine.into_outcomes())
        })
    }

    // === Portals ===

    /// Bind a named portal. Its columns come from the statement, or from
    /// Describe for raw SQL.
    pub(crate) fn bind_portal<S: IntoStatement, P: ToParams>(
        &mut self,
        statement: S,
        params: P,
    ) -> Result<(String, Arc<[ColumnInfo]>)> {
        self.guarded(|conn| {
            if !conn.session.transaction_status().in_transaction() {
                return Err(Error::InvalidUsage("named portals need an open transaction".into()));
            }
            let name = conn.session.next_portal_name();
            let mut handler = DropHandler::new();
            let columns = if let Some(stmt) = statement.as_prepared() {
                conn.session.check_statement(stmt)?;
                let encoded = encode_params(&params, stmt.param_oids())?;
                let mut state_machine = ExtendedQueryStateMachine::bind_portal(
                    &mut conn.buffer_set,
                    &mut handler,
                    &name,
                    stmt,
                    &encoded,
                );
                conn.drive(&mut state_machine)?;
                Arc::clone(stmt.shared_columns())
            } else if let Some(sql) = statement.as_sql() {
                let param_oids = params.natural_oids();
                let encoded = encode_params(&params, &param_oids)?;
                let mut state_machine = ExtendedQueryStateMachine::bind_portal_sql(
                    &mut conn.buffer_set,
                    &mut handler,
                    &name,
                    sql,
                    &param_oids,
                    &encoded,
                );
                conn.drive(&mut state_machine)?;
                state_machine.columns().cloned().unwrap_or_else(|| Arc::from(Vec::new()))
            } else {
                return Err(Error::InvalidUsage("statement is neither SQL nor prepared".into()));
            };
            conn.session.register_portal(&name);
            tracing::debug!(portal = %name, "portal bound");
            Ok((name, columns))
        })
    }

    /// Execute a portal. Returns true when rows remain.
    pub(crate) fn execute_portal<H: RowHandler>(
        &mut self,
        name: &str,
        columns: &Arc<[ColumnInfo]>,
        max_rows: u32,
        handler: &mut H,
    ) -> Result<bool> {
        self.guarded(|conn| {
            if conn.session.portal(name).is_none_or(|p| p.complete) {
                return Err(Error::InvalidUsage(format!("portal {name:?} is closed or exhausted")));
            }
            let mut state_machine = ExtendedQueryStateMachine::execute_portal(
                &mut conn.buffer_set,
                handler,
                name,
                Arc::clone(columns),
                max_rows,
            );
            conn.drive(&mut state_machine)?;
            let has_more = state_machine.is_suspended();
            if let Ok(portal) = conn.session.portal_mut(name) {
                portal.rows += state_machine.rows_seen();
                portal.complete = !has_more;
            }
            Ok(has_more)
        })
    }

    pub(crate) fn close_portal(&mut self, name: &str) -> Result<()> {
        self.guarded(|conn| {
            if conn.session.portal(name).is_none() {
                // Already closed by the end of its transaction.
                return Ok(());
            }
            let mut handler = DropHandler::new();
            let mut state_machine =
                ExtendedQueryStateMachine::close(&mut conn.buffer_set, &mut handler, Target::Portal, name);
            conn.drive(&mut state_machine)?;
            conn.session.remove_portal(name);
            Ok(())
        })
    }

    // === Transactions ===

    /// Send `BEGIN`.
    pub fn begin(&mut self) -> Result<()> {
        self.session.ensure_open()?;
        if self.transaction_status().in_transaction() || !self.session.transactions().is_empty() {
            return Err(Error::InvalidUsage("a transaction is already open".into()));
        }
        self.session.transactions_mut().begin();
        self.query_drop("BEGIN")?;
        Ok(())
    }

    /// Send `COMMIT`. Refused locally while the transaction is aborted.
    pub fn commit(&mut self) -> Result<()> {
        self.session.ensure_open()?;
        match self.transaction_status() {
            TransactionStatus::Failed => Err(Error::InFailedTransaction),
            TransactionStatus::Idle => Err(Error::InvalidUsage("no transaction is open".into())),
            TransactionStatus::InTransaction => {
                self.query_drop("COMMIT")?;
                Ok(())
            }
        }
    }

    /// Send `ROLLBACK`. A no-op when no transaction is open.
    pub fn rollback(&mut self) -> Result<()> {
        self.session.ensure_open()?;
        if self.transaction_status() == TransactionStatus::Idle {
            return Ok(());
        }
        self.query_drop("ROLLBACK")?;
        Ok(())
    }

    pub fn savepoint(&mut self, name: &str) -> Result<()> {
        self.session.ensure_open()?;
        validate_savepoint_name(name)?;
        match self.transaction_status() {
            TransactionStatus::Failed => return Err(Error::InFailedTransaction),
            TransactionStatus::Idle => {
                return Err(Error::InvalidUsage("savepoints need an open transaction".into()));
            }
            TransactionStatus::InTransaction => {}
        }
        self.query_drop(&format!("SAVEPOINT {}", quote_identifier(name)))?;
        self.session.transactions_mut().push_savepoint(name);
        Ok(())
    }

    /// Release a savepoint and every savepoint opened after it.
    pub fn release(&mut self, name: &str) -> Result<()> {
        self.session.ensure_open()?;
        validate_savepoint_name(name)?;
        if self.transaction_status() == TransactionStatus::Failed {
            return Err(Error::InFailedTransaction);
        }
        self.check_savepoint(name)?;
        self.query_drop(&format!("RELEASE SAVEPOINT {}", quote_identifier(name)))?;
        self.session.transactions_mut().release(name)
    }

    /// Roll back to a savepoint, which stays open.
    pub fn rollback_to(&mut self, name: &str) -> Result<()> {
        self.session.ensure_open()?;
        validate_savepoint_name(name)?;
        self.check_savepoint(name)?;
        self.query_drop(&format!("ROLLBACK TO SAVEPOINT {}", quote_identifier(name)))?;
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
    pub fn start_transaction(&mut self) -> Result<Transaction> {
        Transaction::start(self)
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
    /// conn.transaction(|conn, _tx| {
    ///     conn.exec_drop("INSERT INTO t VALUES ($1)", (1,))?;
    ///     conn.transaction(|conn, _inner| conn.exec_drop("INSERT INTO t VALUES ($1)", (2,)))
    /// })?;
    /// ```
    pub fn transaction<F, R>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Conn, &mut Transaction) -> Result<R>,
    {
        let mut tx = self.start_transaction()?;
        let result = f(self, &mut tx);
        if tx.is_finished() {
            return result;
        }
        match result {
            Ok(value) if self.transaction_status() != TransactionStatus::Failed => {
                tx.commit(self)?;
                Ok(value)
            }
            Ok(_) => {
                tx.rollback(self)?;
                Err(Error::InFailedTransaction)
            }
            Err(e) => {
                if self.session.ensure_open().is_ok()
                    && let Err(rollback_error) = tx.rollback(self)
                {
                    tracing::warn!("rollback after failed transaction block: {rollback_error}");
                }
                Err(e)
            }
        }
    }

    // === Notifications ===

    pub fn listen(&mut self, channel: &str) -> Result<()> {
        self.query_drop(&format!("LISTEN {}", quote_identifier(channel)))?;
        Ok(())
    }

    /// Stop listening and drop the callbacks registered for `channel`.
    pub fn unlisten(&mut self, channel: &str) -> Result<()> {
        self.query_drop(&format!("UNLISTEN {}", quote_identifier(channel)))?;
        self.session.remove_listeners(channel);
        Ok(())
    }

    pub fn notify(&mut self, channel: &str, payload: &str) -> Result<()> {
        self.exec_drop("SELECT pg_notify($1, $2)", (channel, payload))?;
        Ok(())
    }

    /// Deliver notifications on `channel` to `callback` instead of the queue.
    pub fn on_notification<F>(&mut self, channel: &str, callback: F)
    where
        F: FnMut(&Notification) + Send + 'static,
    {
        self.session.add_listener(channel, Box::new(callback));
    }

    /// Take the oldest queued notification without any I/O.
    pub fn poll_notification(&mut self) -> Option<Notification> {
        self.session.poll_notification()
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        self.session.drain_notifications()
    }

    /// Block until a notification is queued.
    ///
    /// Only valid while no request is in flight. Notifications that go to a
    /// registered callback are not returned here.
    pub fn wait_notification(&mut self) -> Result<Notification> {
        self.guarded(|conn| loop {
            if let Some(notification) = conn.session.poll_notification() {
                return Ok(notification);
            }
            conn.stream.read_message(&mut conn.buffer_set)?;
            match parse_async_message(conn.buffer_set.type_byte, &conn.buffer_set.read_buffer)? {
                Some(message) => conn.session.handle_async(message),
                None => {
                    return Err(Error::ProtocolSync(format!(
                        "unexpected message '{}' while idle",
                        conn.buffer_set.type_byte as char
                    )));
                }
            }
        })
    }

    // === Lifecycle ===

    /// Send Terminate and close the connection. Later operations fail with
    /// [`Error::ConnectionDoesNotExist`].
    pub fn close(&mut self) -> Result<()> {
        let result = if self.session.lifecycle() == Lifecycle::Ready {
            self.buffer_set.write_buffer.clear();
            write_terminate(&mut self.buffer_set.write_buffer);
            self.write_pending()
        } else {
            Ok(())
        };
        self.session.mark_closed();
        result
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        if self.session.lifecycle() == Lifecycle::Ready
            && let Err(e) = self.close()
        {
            tracing::warn!("failed to send Terminate: {e}");
        }
    }
}
