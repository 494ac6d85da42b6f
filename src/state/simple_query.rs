//! Simple query protocol state machine.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::handler::RowHandler;
use crate::protocol::backend::{
    ColumnInfo, CommandComplete, DataRow, ReadyForQuery, RowDescription, msg_type, parse_fields,
};
use crate::protocol::frontend::write_query;
use crate::protocol::types::TransactionStatus;

use super::StateMachine;
use super::action::{Action, parse_async_message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    ReadingResponse,
    Finished,
}

/// Simple query protocol state machine.
///
/// One `Query` may hold several statements; each produces its own
/// `result_start`/`row`/`result_end` sequence on the handler.
pub struct SimpleQueryStateMachine<'a, H> {
    state: State,
    handler: &'a mut H,
    sql: &'a str,
    columns: Option<Vec<ColumnInfo>>,
    failure: Option<Error>,
    ready: Option<TransactionStatus>,
}

impl<'a, H: RowHandler> SimpleQueryStateMachine<'a, H> {
    pub fn new(handler: &'a mut H, sql: &'a str) -> Self {
        Self {
            state: State::Initial,
            handler,
            sql,
            columns: None,
            failure: None,
            ready: None,
        }
    }

    fn handle_message(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        let payload = buffer_set.read_buffer.as_slice();
        match buffer_set.type_byte {
            msg_type::ROW_DESCRIPTION => {
                let columns = RowDescription::parse(payload)?.into_columns();
                if self.failure.is_none()
                    && let Err(e) = self.handler.result_start(&columns)
                {
                    self.failure = Some(e);
                }
                self.columns = Some(columns);
            }
            msg_type::DATA_ROW => {
                let columns = self.columns.as_deref().ok_or_else(|| {
                    Error::ProtocolSync("DataRow without RowDescription".into())
                })?;
                let row = DataRow::parse(payload)?;
                if row.len() != columns.len() {
                    return Err(Error::ProtocolSync(format!(
                        "DataRow has {} fields, RowDescription {}",
                        row.len(),
                        columns.len()
                    )));
                }
                if self.failure.is_none()
                    && let Err(e) = self.handler.row(columns, row)
                {
                    self.failure = Some(e);
                }
            }
            msg_type::COMMAND_COMPLETE => {
                let complete = CommandComplete::parse(payload)?;
                self.columns = None;
                if self.failure.is_none()
                    && let Err(e) = self.handler.result_end(complete)
                {
                    self.failure = Some(e);
                }
            }
            msg_type::EMPTY_QUERY_RESPONSE => {}
            msg_type::ERROR_RESPONSE => {
                let fields = parse_fields(payload)?;
                if fields.is_fatal() {
                    self.state = State::Finished;
                    return Err(Error::Server(fields));
                }
                // The server skips the rest of the query string.
                self.columns = None;
                if self.failure.is_none() {
                    self.failure = Some(Error::Server(fields));
                }
            }
            msg_type::READY_FOR_QUERY => {
                let status = ReadyForQuery::parse(payload)?
                    .transaction_status()
                    .ok_or_else(|| Error::ProtocolSync("invalid transaction status".into()))?;
                self.ready = Some(status);
                self.state = State::Finished;
                return match self.failure.take() {
                    Some(e) => Err(e),
                    None => Ok(Action::Finished),
                };
            }
            other => {
                return Err(Error::ProtocolSync(format!(
                    "unexpected message '{}' in simple query response",
                    other as char
                )));
            }
        }
        Ok(Action::ReadMessage)
    }
}

impl<H: RowHandler> StateMachine for SimpleQueryStateMachine<'_, H> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.state {
            State::Initial => {
                buffer_set.write_buffer.clear();
                write_query(&mut buffer_set.write_buffer, self.sql);
                self.state = State::ReadingResponse;
                Ok(Action::WriteAndReadMessage)
            }
            State::ReadingResponse => {
                if let Some(message) =
                    parse_async_message(buffer_set.type_byte, &buffer_set.read_buffer)?
                {
                    return Ok(Action::HandleAsyncMessageAndReadMessage(message));
                }
                self.handle_message(buffer_set)
            }
            State::Finished => Err(Error::ProtocolSync("simple query already finished".into())),
        }
    }

    fn ready_status(&self) -> Option<TransactionStatus> {
        self.ready
    }
}
