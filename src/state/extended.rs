//! Extended query protocol state machine.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::handler::RowHandler;
use crate::protocol::backend::{
    ColumnInfo, CommandComplete, DataRow, ParameterDescription, ReadyForQuery, RowDescription,
    msg_type, parse_fields,
};
use crate::protocol::frontend::{
    EncodedParams, Target, write_bind, write_close, write_describe_portal,
    write_describe_statement, write_execute, write_parse, write_sync,
};
use crate::protocol::types::{Oid, TransactionStatus};
use crate::statement::PreparedStatement;

use super::StateMachine;
use super::action::{Action, parse_async_message};

/// Reply the server owes for a message already written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expect {
    ParseComplete,
    ParameterDescription,
    RowDescriptionOrNoData,
    BindComplete,
    /// DataRow* then CommandComplete, EmptyQueryResponse or PortalSuspended
    Rows,
    CloseComplete,
    ReadyForQuery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    Running,
    Finished,
}

/// Extended query protocol state machine.
///
/// Each constructor writes one message group ending in Sync into the write
/// buffer and records the replies it expects, in order.
pub struct ExtendedQueryStateMachine<'a, H> {
    state: State,
    handler: &'a mut H,
    expect: VecDeque<Expect>,
    columns: Option<Arc<[ColumnInfo]>>,
    param_oids: Vec<Oid>,
    result_started: bool,
    suspended: bool,
    rows_seen: u64,
    failure: Option<Error>,
    ready: Option<TransactionStatus>,
}

impl<'a, H: RowHandler> ExtendedQueryStateMachine<'a, H> {
    fn new(handler: &'a mut H, expect: &[Expect], columns: Option<Arc<[ColumnInfo]>>) -> Self {
        Self {
            state: State::Initial,
            handler,
            expect: expect.iter().copied().collect(),
            columns,
            param_oids: Vec::new(),
            result_started: false,
            suspended: false,
            rows_seen: 0,
            failure: None,
            ready: None,
        }
    }

    /// `Parse(name) + Describe(S) + Sync`.
    pub fn prepare(
        buffer_set: &mut BufferSet,
        handler: &'a mut H,
        name: &str,
        sql: &str,
        param_oids: &[Oid],
    ) -> Self {
        buffer_set.write_buffer.clear();
        write_parse(&mut buffer_set.write_buffer, name, sql, param_oids);
        write_describe_statement(&mut buffer_set.write_buffer, name);
        write_sync(&mut buffer_set.write_buffer);
        Self::new(
            handler,
            &[
                Expect::ParseComplete,
                Expect::ParameterDescription,
                Expect::RowDescriptionOrNoData,
                Expect::ReadyForQuery,
            ],
            None,
        )
    }

    /// `Bind("") + Execute("", 0) + Sync` on a prepared statement.
    pub fn execute(
        buffer_set: &mut BufferSet,
        handler: &'a mut H,
        statement: &PreparedStatement,
        params: &EncodedParams,
    ) -> Self {
        buffer_set.write_buffer.clear();
        write_bind(
            &mut buffer_set.write_buffer,
            "",
            statement.name(),
            params,
            statement.result_formats(),
        );
        write_execute(&mut buffer_set.write_buffer, "", 0);
        write_sync(&mut buffer_set.write_buffer);
        Self::new(
            handler,
            &[Expect::BindComplete, Expect::Rows, Expect::ReadyForQuery],
            Some(Arc::clone(statement.shared_columns())),
        )
    }

    /// `Parse("") + Bind("") + Describe(P) + Execute("", 0) + Sync`.
    ///
    /// Results come back in text format.
    pub fn execute_sql(
        buffer_set: &mut BufferSet,
        handler: &'a mut H,
        sql: &str,
        param_oids: &[Oid],
        params: &EncodedParams,
    ) -> Self {
        buffer_set.write_buffer.clear();
        write_parse(&mut buffer_set.write_buffer, "", sql, param_oids);
        write_bind(&mut buffer_set.write_buffer, "", "", params, &[]);
        write_describe_portal(&mut buffer_set.write_buffer, "");
        write_execute(&mut buffer_set.write_buffer, "", 0);
        write_sync(&mut buffer_set.write_buffer);
        Self::new(
            handler,
            &[
                Expect::ParseComplete,
                Expect::BindComplete,
                Expect::RowDescriptionOrNoData,
                Expect::Rows,
                Expect::ReadyForQuery,
            ],
            None,
        )
    }

    /// `Bind(portal) + Sync` on a prepared statement.
    pub fn bind_portal(
        buffer_set: &mut BufferSet,
        handler: &'a mut H,
        portal: &str,
        statement: &PreparedStatement,
        params: &EncodedParams,
    ) -> Self {
        buffer_set.write_buffer.clear();
        write_bind(
            &mut buffer_set.write_buffer,
            portal,
            statement.name(),
            params,
            statement.result_formats(),
        );
        write_sync(&mut buffer_set.write_buffer);
        Self::new(
            handler,
            &[Expect::BindComplete, Expect::ReadyForQuery],
            Some(Arc::clone(statement.shared_columns())),
        )
    }

    /// `Parse("") + Bind(portal) + Describe(P) + Sync`.
    pub fn bind_portal_sql(
        buffer_set: &mut BufferSet,
        handler: &'a mut H,
        portal: &str,
        sql: &str,
        param_oids: &[Oid],
        params: &EncodedParams,
    ) -> Self {
        buffer_set.write_buffer.clear();
        write_parse(&mut buffer_set.write_buffer, "", sql, param_oids);
        write_bind(&mut buffer_set.write_buffer, portal, "", params, &[]);
        write_describe_portal(&mut buffer_set.write_buffer, portal);
        write_sync(&mut buffer_set.write_buffer);
        Self::new(
            handler,
            &[
                Expect::ParseComplete,
                Expect::BindComplete,
                Expect::RowDescriptionOrNoData,
                Expect::ReadyForQuery,
            ],
            None,
        )
    }

    /// `Execute(portal, max_rows) + Sync`. `max_rows == 0` fetches everything.
    pub fn execute_portal(
        buffer_set: &mut BufferSet,
        handler: &'a mut H,
        portal: &str,
        columns: Arc<[ColumnInfo]>,
        max_rows: u32,
    ) -> Self {
        buffer_set.write_buffer.clear();
        write_execute(&mut buffer_set.write_buffer, portal, max_rows);
        write_sync(&mut buffer_set.write_buffer);
        Self::new(handler, &[Expect::Rows, Expect::ReadyForQuery], Some(columns))
    }

    /// `Close(target, name) + Sync`.
    pub fn close(buffer_set: &mut BufferSet, handler: &'a mut H, target: Target, name: &str) -> Self {
        buffer_set.write_buffer.clear();
        write_close(&mut buffer_set.write_buffer, target, name);
        write_sync(&mut buffer_set.write_buffer);
        Self::new(handler, &[Expect::CloseComplete, Expect::ReadyForQuery], None)
    }

    /// Parameter types from ParameterDescription.
    pub fn take_param_oids(&mut self) -> Vec<Oid> {
        std::mem::take(&mut self.param_oids)
    }

    /// Result columns, from the statement or from RowDescription/NoData.
    pub fn columns(&self) -> Option<&Arc<[ColumnInfo]>> {
        self.columns.as_ref()
    }

    /// True when Execute stopped at its row limit.
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn rows_seen(&self) -> u64 {
        self.rows_seen
    }

    fn record(&mut self, result: Result<()>) {
        if let Err(e) = result
            && self.failure.is_none()
        {
            self.failure = Some(e);
        }
    }

    fn start_result(&mut self) {
        if self.result_started || self.failure.is_some() {
            return;
        }
        self.result_started = true;
        let result = match self.columns.as_deref() {
            Some(columns) if !columns.is_empty() => self.handler.result_start(columns),
            _ => Ok(()),
        };
        self.record(result);
    }

    fn handle_rows(&mut self, type_byte: u8, payload: &[u8]) -> Result<()> {
        match type_byte {
            msg_type::DATA_ROW => {
                let row = DataRow::parse(payload)?;
                let width = self.columns.as_deref().map(<[ColumnInfo]>::len);
                if width != Some(row.len()) {
                    return Err(Error::ProtocolSync(format!(
                        "DataRow has {} fields, expected {width:?}",
                        row.len()
                    )));
                }
                self.rows_seen += 1;
                self.start_result();
                if self.failure.is_none()
                    && let Some(columns) = self.columns.as_deref()
                {
                    let result = self.handler.row(columns, row);
                    self.record(result);
                }
            }
            msg_type::COMMAND_COMPLETE => {
                let complete = CommandComplete::parse(payload)?;
                self.start_result();
                if self.failure.is_none() {
                    let result = self.handler.result_end(complete);
                    self.record(result);
                }
                self.expect.pop_front();
            }
            msg_type::EMPTY_QUERY_RESPONSE => {
                self.expect.pop_front();
            }
            msg_type::PORTAL_SUSPENDED => {
                self.start_result();
                self.suspended = true;
                self.expect.pop_front();
            }
            other => return Err(unexpected(Expect::Rows, other)),
        }
        Ok(())
    }

    fn handle_message(&mut self, type_byte: u8, payload: &[u8]) -> Result<Action> {
        if type_byte == msg_type::ERROR_RESPONSE {
            let fields = parse_fields(payload)?;
            if fields.is_fatal() {
                self.state = State::Finished;
                return Err(Error::Server(fields));
            }
            // The server discards everything up to Sync.
            self.expect.retain(|e| *e == Expect::ReadyForQuery);
            if self.failure.is_none() {
                self.failure = Some(Error::Server(fields));
            }
            return Ok(Action::ReadMessage);
        }

        let expected = *self
            .expect
            .front()
            .ok_or_else(|| Error::ProtocolSync("reply to a finished request".into()))?;

        match (expected, type_byte) {
            (Expect::ParseComplete, msg_type::PARSE_COMPLETE)
            | (Expect::BindComplete, msg_type::BIND_COMPLETE)
            | (Expect::CloseComplete, msg_type::CLOSE_COMPLETE) => {
                self.expect.pop_front();
            }
            (Expect::ParameterDescription, msg_type::PARAMETER_DESCRIPTION) => {
                self.param_oids = ParameterDescription::parse(payload)?.into_oids();
                self.expect.pop_front();
            }
            (Expect::RowDescriptionOrNoData, msg_type::ROW_DESCRIPTION) => {
                self.columns = Some(RowDescription::parse(payload)?.into_columns().into());
                self.expect.pop_front();
            }
            (Expect::RowDescriptionOrNoData, msg_type::NO_DATA) => {
                self.columns = Some(Arc::from(Vec::new()));
                self.expect.pop_front();
            }
            (Expect::Rows, _) => self.handle_rows(type_byte, payload)?,
            (Expect::ReadyForQuery, msg_type::READY_FOR_QUERY) => {
                let status = ReadyForQuery::parse(payload)?
                    .transaction_status()
                    .ok_or_else(|| Error::ProtocolSync("invalid transaction status".into()))?;
                self.ready = Some(status);
                self.expect.pop_front();
                self.state = State::Finished;
                return match self.failure.take() {
                    Some(e) => Err(e),
                    None => Ok(Action::Finished),
                };
            }
            (expected, other) => return Err(unexpected(expected, other)),
        }
        Ok(Action::ReadMessage)
    }
}

pub(crate) fn unexpected(expected: Expect, type_byte: u8) -> Error {
    Error::ProtocolSync(format!(
        "expected {expected:?}, got message '{}'",
        type_byte as char
    ))
}

impl<H: RowHandler> StateMachine for ExtendedQueryStateMachine<'_, H> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.state {
            State::Initial => {
                self.state = State::Running;
                Ok(Action::WriteAndReadMessage)
            }
            State::Running => {
                if let Some(message) =
                    parse_async_message(buffer_set.type_byte, &buffer_set.read_buffer)?
                {
                    return Ok(Action::HandleAsyncMessageAndReadMessage(message));
                }
                self.handle_message(buffer_set.type_byte, &buffer_set.read_buffer)
            }
            State::Finished => Err(Error::ProtocolSync("extended query already finished".into())),
        }
    }

    fn ready_status(&self) -> Option<TransactionStatus> {
        self.ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::encode_params;
    use crate::handler::{CollectHandler, DropHandler, RowsHandler};
    use crate::protocol::types::oid;

    fn feed<M: StateMachine>(machine: &mut M, set: &mut BufferSet, tag: u8, payload: &[u8]) -> Result<Action> {
        set.set_message(tag, payload);
        machine.step(set)
    }

    fn row_description(columns: &[(&str, u32)]) -> Vec<u8> {
        let mut out = (columns.len() as u16).to_be_bytes().to_vec();
        for (name, type_oid) in columns {
            ColumnInfo::new(*name, *type_oid).write_to(&mut out);
        }
        out
    }

    fn data_row(values: &[&[u8]]) -> Vec<u8> {
        let mut out = (values.len() as u16).to_be_bytes().to_vec();
        for v in values {
            out.extend_from_slice(&(v.len() as i32).to_be_bytes());
            out.extend_from_slice(v);
        }
        out
    }

    /// Frame tags of everything in the write buffer.
    fn written_tags(buf: &[u8]) -> Vec<u8> {
        let mut decoder = crate::protocol::codec::FrameDecoder::new();
        decoder.extend(buf);
        let mut tags = Vec::new();
        while let Some((tag, _)) = decoder.next_frame().unwrap() {
            tags.push(tag);
        }
        tags
    }

    #[test]
    fn test_prepare_collects_description() {
        let mut set = BufferSet::new();
        let mut handler = DropHandler::new();
        let mut machine =
            ExtendedQueryStateMachine::prepare(&mut set, &mut handler, "_pw_s_1", "SELECT $1::int4", &[]);
        assert_eq!(written_tags(&set.write_buffer), b"PDS");
        assert!(matches!(machine.step(&mut set).unwrap(), Action::WriteAndReadMessage));

        feed(&mut machine, &mut set, b'1', b"").unwrap();
        let mut oids = 1u16.to_be_bytes().to_vec();
        oids.extend_from_slice(&oid::INT4.to_be_bytes());
        feed(&mut machine, &mut set, b't', &oids).unwrap();
        feed(&mut machine, &mut set, b'T', &row_description(&[("int4", oid::INT4)])).unwrap();
        assert!(matches!(feed(&mut machine, &mut set, b'Z', b"I").unwrap(), Action::Finished));

        assert_eq!(machine.take_param_oids(), vec![oid::INT4]);
        assert_eq!(machine.columns().map(|c| c.len()), Some(1));
    }

    #[test]
    fn test_execute_sql_rows() {
        let mut set = BufferSet::new();
        let params = encode_params(&(7_i32,), &[oid::INT4]).unwrap();
        let mut handler = CollectHandler::<(i32, String)>::new();
        let mut machine = ExtendedQueryStateMachine::execute_sql(
            &mut set,
            &mut handler,
            "SELECT $1, 'x'",
            &[oid::INT4],
            &params,
        );
        assert_eq!(written_tags(&set.write_buffer), b"PBDES");
        machine.step(&mut set).unwrap();
        feed(&mut machine, &mut set, b'1', b"").unwrap();
        feed(&mut machine, &mut set, b'2', b"").unwrap();
        feed(
            &mut machine,
            &mut set,
            b'T',
            &row_description(&[("a", oid::INT4), ("b", oid::TEXT)]),
        )
        .unwrap();
        feed(&mut machine, &mut set, b'D', &data_row(&[b"7", b"x"])).unwrap();
        feed(&mut machine, &mut set, b'C', b"SELECT 1\0").unwrap();
        feed(&mut machine, &mut set, b'Z', b"I").unwrap();
        assert_eq!(machine.rows_seen(), 1);
        assert_eq!(handler.into_rows(), vec![(7, "x".to_string())]);
    }

    #[test]
    fn test_error_drops_pending_replies() {
        let mut set = BufferSet::new();
        let params = EncodedParams::default();
        let mut handler = DropHandler::new();
        let mut machine =
            ExtendedQueryStateMachine::execute_sql(&mut set, &mut handler, "SELEC 1", &[], &params);
        machine.step(&mut set).unwrap();
        let error = b"SERROR\0C42601\0Msyntax error\0\0";
        assert!(matches!(
            feed(&mut machine, &mut set, b'E', error).unwrap(),
            Action::ReadMessage
        ));
        let err = feed(&mut machine, &mut set, b'Z', b"I").unwrap_err();
        assert_eq!(err.sqlstate(), Some("42601"));
        assert_eq!(machine.ready_status(), Some(TransactionStatus::Idle));
    }

    #[test]
    fn test_unexpected_reply_is_protocol_sync() {
        let mut set = BufferSet::new();
        let mut handler = DropHandler::new();
        let mut machine = ExtendedQueryStateMachine::close(&mut set, &mut handler, Target::Statement, "s");
        machine.step(&mut set).unwrap();
        let err = feed(&mut machine, &mut set, b'2', b"").unwrap_err();
        assert!(matches!(err, Error::ProtocolSync(_)));
    }

    #[test]
    fn test_portal_suspension() {
        let mut set = BufferSet::new();
        let columns: Arc<[ColumnInfo]> = vec![ColumnInfo::new("n", oid::INT4)].into();
        let mut handler = RowsHandler::new();
        let mut machine =
            ExtendedQueryStateMachine::execute_portal(&mut set, &mut handler, "_pw_p_1", columns, 2);
        assert_eq!(written_tags(&set.write_buffer), b"ES");
        machine.step(&mut set).unwrap();
        feed(&mut machine, &mut set, b'D', &data_row(&[b"1"])).unwrap();
        feed(&mut machine, &mut set, b'D', &data_row(&[b"2"])).unwrap();
        feed(&mut machine, &mut set, b's', b"").unwrap();
        feed(&mut machine, &mut set, b'Z', b"T").unwrap();
        assert!(machine.is_suspended());
        assert_eq!(handler.into_rows().len(), 2);
    }
}
