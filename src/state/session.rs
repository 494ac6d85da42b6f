//! Per-connection session state shared by the sync and tokio drivers.

use std::collections::{HashMap, VecDeque};

use crate::error::{Error, Result};
use crate::handler::AsyncMessageHandler;
use crate::protocol::backend::BackendKeyData;
use crate::protocol::types::TransactionStatus;
use crate::statement::PreparedStatement;

use super::action::{AsyncMessage, Notification};
use super::transaction::TransactionStack;

/// Callback registered for one notification channel.
pub type NotificationCallback = Box<dyn FnMut(&Notification) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Ready,
    /// A transport or protocol failure; the stream cannot be trusted.
    Broken,
    Closed,
}

/// Progress of a named portal.
#[derive(Debug, Clone, Copy, Default)]
pub struct PortalState {
    pub rows: u64,
    pub complete: bool,
}

/// Everything a connection knows about its server session.
pub struct Session {
    backend_key: Option<BackendKeyData>,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
    transactions: TransactionStack,
    statements: HashMap<String, PreparedStatement>,
    portals: HashMap<String, PortalState>,
    notifications: VecDeque<Notification>,
    listeners: HashMap<String, Vec<NotificationCallback>>,
    async_handler: Option<Box<dyn AsyncMessageHandler>>,
    lifecycle: Lifecycle,
    statement_counter: u64,
    portal_counter: u64,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("backend_key", &self.backend_key)
            .field("server_params", &self.server_params)
            .field("transaction_status", &self.transaction_status)
            .field("transactions", &self.transactions)
            .field("statements", &self.statements.len())
            .field("portals", &self.portals.len())
            .field("notifications", &self.notifications.len())
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            backend_key: None,
            server_params: Vec::new(),
            transaction_status: TransactionStatus::Idle,
            transactions: TransactionStack::new(),
            statements: HashMap::new(),
            portals: HashMap::new(),
            notifications: VecDeque::new(),
            listeners: HashMap::new(),
            async_handler: None,
            lifecycle: Lifecycle::Ready,
            statement_counter: 0,
            portal_counter: 0,
        }
    }

    // === Server parameters ===

    pub fn backend_key(&self) -> Option<&BackendKeyData> {
        self.backend_key.as_ref()
    }

    pub(crate) fn set_backend_key(&mut self, key: BackendKeyData) {
        self.backend_key = Some(key);
    }

    /// Backend process id, 0 if the server sent no BackendKeyData.
    pub fn process_id(&self) -> u32 {
        self.backend_key.as_ref().map_or(0, |k| k.process_id())
    }

    pub fn server_params(&self) -> &[(String, String)] {
        &self.server_params
    }

    pub fn server_param(&self, name: &str) -> Option<&str> {
        self.server_params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub(crate) fn set_server_param(&mut self, name: &str, value: &str) {
        match self.server_params.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => self
                .server_params
                .push((name.to_string(), value.to_string())),
        }
    }

    pub fn server_version(&self) -> Option<&str> {
        self.server_param("server_version")
    }

    pub fn server_encoding(&self) -> Option<&str> {
        self.server_param("server_encoding")
    }

    pub fn client_encoding(&self) -> Option<&str> {
        self.server_param("client_encoding")
    }

    /// Whether datetimes travel as 64-bit microsecond integers in binary.
    pub fn integer_datetimes(&self) -> bool {
        self.server_param("integer_datetimes") == Some("on")
    }

    // === Transaction status ===

    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    pub fn transactions(&self) -> &TransactionStack {
        &self.transactions
    }

    pub(crate) fn transactions_mut(&mut self) -> &mut TransactionStack {
        &mut self.transactions
    }

    /// Apply a ReadyForQuery. Named portals die with their transaction.
    pub(crate) fn on_ready(&mut self, status: TransactionStatus) {
        self.transaction_status = status;
        self.transactions.reconcile(status);
        if status == TransactionStatus::Idle && !self.portals.is_empty() {
            tracing::debug!(count = self.portals.len(), "portals closed by transaction end");
            self.portals.clear();
        }
    }

    // === Statements and portals ===

    pub(crate) fn next_statement_name(&mut self) -> String {
        self.statement_counter += 1;
        format!("_pw_s_{}", self.statement_counter)
    }

    pub(crate) fn next_portal_name(&mut self) -> String {
        self.portal_counter += 1;
        format!("_pw_p_{}", self.portal_counter)
    }

    pub(crate) fn register_statement(&mut self, stmt: PreparedStatement) {
        self.statements.insert(stmt.name().to_string(), stmt);
    }

    pub(crate) fn unregister_statement(&mut self, stmt: &PreparedStatement) {
        if self.holds_statement(stmt) {
            self.statements.remove(stmt.name());
        }
    }

    /// True if `stmt` was prepared on this session and not closed since.
    pub fn holds_statement(&self, stmt: &PreparedStatement) -> bool {
        self.statements
            .get(stmt.name())
            .is_some_and(|s| s.same_as(stmt))
    }

    pub(crate) fn check_statement(&self, stmt: &PreparedStatement) -> Result<()> {
        if self.holds_statement(stmt) {
            Ok(())
        } else {
            Err(Error::InvalidUsage(format!(
                "statement {:?} is not prepared on this connection",
                stmt.name()
            )))
        }
    }

    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }

    pub(crate) fn register_portal(&mut self, name: &str) {
        self.portals.insert(name.to_string(), PortalState::default());
    }

    pub fn portal(&self, name: &str) -> Option<&PortalState> {
        self.portals.get(name)
    }

    pub(crate) fn portal_mut(&mut self, name: &str) -> Result<&mut PortalState> {
        self.portals.get_mut(name).ok_or_else(|| {
            Error::InvalidUsage(format!("portal {name:?} no longer exists"))
        })
    }

    pub(crate) fn remove_portal(&mut self, name: &str) {
        self.portals.remove(name);
    }

    // === Asynchronous messages ===

    pub(crate) fn set_async_handler(&mut self, handler: Option<Box<dyn AsyncMessageHandler>>) {
        self.async_handler = handler;
    }

    /// Route one asynchronous message.
    ///
    /// Notifications go to the callbacks registered for their channel, or to
    /// the queue when there are none.
    pub(crate) fn handle_async(&mut self, message: AsyncMessage) {
        match message {
            AsyncMessage::Notification(notification) => self.deliver(notification),
            AsyncMessage::ParameterChanged { ref name, ref value } => {
                self.set_server_param(name, value);
                if let Some(handler) = self.async_handler.as_mut() {
                    handler.handle(&message);
                }
            }
            AsyncMessage::Notice(ref notice) => match self.async_handler.as_mut() {
                Some(handler) => handler.handle(&message),
                None => tracing::warn!("server notice: {notice}"),
            },
        }
    }

    fn deliver(&mut self, notification: Notification) {
        match self.listeners.get_mut(&notification.channel) {
            Some(callbacks) if !callbacks.is_empty() => {
                for callback in callbacks.iter_mut() {
                    callback(&notification);
                }
            }
            _ => self.notifications.push_back(notification),
        }
    }

    pub(crate) fn add_listener(&mut self, channel: &str, callback: NotificationCallback) {
        self.listeners
            .entry(channel.to_string())
            .or_default()
            .push(callback);
    }

    pub(crate) fn remove_listeners(&mut self, channel: &str) {
        self.listeners.remove(channel);
    }

    pub fn pending_notifications(&self) -> usize {
        self.notifications.len()
    }

    pub(crate) fn poll_notification(&mut self) -> Option<Notification> {
        self.notifications.pop_front()
    }

    pub(crate) fn drain_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }

    // === Lifecycle ===

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Ready => Ok(()),
            Lifecycle::Broken | Lifecycle::Closed => Err(Error::ConnectionDoesNotExist),
        }
    }

    pub(crate) fn mark_broken(&mut self, cause: &Error) {
        if self.lifecycle == Lifecycle::Ready {
            tracing::warn!("connection marked broken: {cause}");
            self.lifecycle = Lifecycle::Broken;
        }
    }

    pub(crate) fn mark_closed(&mut self) {
        self.lifecycle = Lifecycle::Closed;
        self.statements.clear();
        self.portals.clear();
        self.transactions = TransactionStack::new();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn notification(channel: &str, payload: &str) -> AsyncMessage {
        AsyncMessage::Notification(Notification {
            pid: 1,
            channel: channel.into(),
            payload: payload.into(),
        })
    }

    #[test]
    fn test_notifications_fifo_and_callbacks() {
        let mut session = Session::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        session.add_listener(
            "jobs",
            Box::new(move |n: &Notification| sink.lock().unwrap().push(n.payload.clone())),
        );

        session.handle_async(notification("a", "1"));
        session.handle_async(notification("jobs", "x"));
        session.handle_async(notification("b", "2"));

        assert_eq!(*seen.lock().unwrap(), vec!["x".to_string()]);
        assert_eq!(session.pending_notifications(), 2);
        assert_eq!(session.poll_notification().unwrap().payload, "1");
        assert_eq!(session.drain_notifications()[0].channel, "b");
        assert!(session.poll_notification().is_none());

        session.remove_listeners("jobs");
        session.handle_async(notification("jobs", "y"));
        assert_eq!(session.pending_notifications(), 1);
    }

    #[test]
    fn test_parameter_changes() {
        let mut session = Session::new();
        session.set_server_param("integer_datetimes", "on");
        session.handle_async(AsyncMessage::ParameterChanged {
            name: "client_encoding".into(),
            value: "UTF8".into(),
        });
        assert!(session.integer_datetimes());
        assert_eq!(session.client_encoding(), Some("UTF8"));
        session.set_server_param("client_encoding", "LATIN1");
        assert_eq!(session.client_encoding(), Some("LATIN1"));
        assert_eq!(session.server_params().len(), 2);
    }

    #[test]
    fn test_ready_drops_portals() {
        let mut session = Session::new();
        session.on_ready(TransactionStatus::InTransaction);
        let name = session.next_portal_name();
        assert_eq!(name, "_pw_p_1");
        session.register_portal(&name);
        assert!(session.portal(&name).is_some());
        session.on_ready(TransactionStatus::Idle);
        assert!(session.portal(&name).is_none());
        assert!(session.transactions().is_empty());
    }

    #[test]
    fn test_lifecycle() {
        let mut session = Session::new();
        assert!(session.ensure_open().is_ok());
        session.mark_broken(&Error::ProtocolSync("x".into()));
        assert_eq!(session.lifecycle(), Lifecycle::Broken);
        assert!(matches!(session.ensure_open(), Err(Error::ConnectionDoesNotExist)));
        session.mark_closed();
        assert_eq!(session.lifecycle(), Lifecycle::Closed);
    }
}
