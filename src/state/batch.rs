//! Several extended-protocol statements under one Sync.
//!
//! Once one entry fails the server ignores everything up to Sync, so later
//! entries report [`BatchOutcome::Skipped`].

use std::collections::VecDeque;
use std::sync::Arc;

use crate::buffer_set::BufferSet;
use crate::conversion::{Row, ToParams, encode_params};
use crate::error::{Error, Result, ServerError};
use crate::protocol::backend::{
    ColumnInfo, CommandComplete, DataRow, ReadyForQuery, RowDescription, msg_type, parse_fields,
};
use crate::protocol::frontend::{
    EncodedParams, write_bind, write_describe_portal, write_execute, write_parse, write_sync,
};
use crate::protocol::types::{Oid, TransactionStatus};
use crate::statement::{IntoStatement, PreparedStatement};

use super::StateMachine;
use super::action::{Action, parse_async_message};
use super::extended::{Expect, unexpected};

#[derive(Debug)]
enum Source {
    Prepared(PreparedStatement),
    Sql { sql: String, param_oids: Vec<Oid> },
}

#[derive(Debug)]
struct BatchEntry {
    source: Source,
    params: EncodedParams,
}

/// Statements queued for [`run_batch`](crate::sync::Conn::run_batch).
#[derive(Debug, Default)]
pub struct Batch {
    entries: Vec<BatchEntry>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one statement. Parameters are encoded now, so arity and type
    /// errors surface here and nothing is sent.
    pub fn exec<S: IntoStatement, P: ToParams>(&mut self, statement: S, params: P) -> Result<&mut Self> {
        let entry = if let Some(stmt) = statement.as_prepared() {
            BatchEntry {
                params: encode_params(&params, stmt.param_oids())?,
                source: Source::Prepared(stmt.clone()),
            }
        } else if let Some(sql) = statement.as_sql() {
            let param_oids = params.natural_oids();
            BatchEntry {
                params: encode_params(&params, &param_oids)?,
                source: Source::Sql {
                    sql: sql.to_string(),
                    param_oids,
                },
            }
        } else {
            return Err(Error::InvalidUsage("statement is neither SQL nor prepared".into()));
        };
        self.entries.push(entry);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn statements(&self) -> impl Iterator<Item = &PreparedStatement> {
        self.entries.iter().filter_map(|e| match &e.source {
            Source::Prepared(stmt) => Some(stmt),
            Source::Sql { .. } => None,
        })
    }
}

/// Result of one batch entry.
#[derive(Debug, Clone)]
pub enum BatchOutcome {
    Completed { rows: Vec<Row>, tag: String },
    Failed(ServerError),
    /// Ignored by the server after an earlier entry failed.
    Skipped,
}

impl BatchOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, BatchOutcome::Completed { .. })
    }

    pub fn rows(&self) -> &[Row] {
        match self {
            BatchOutcome::Completed { rows, .. } => rows,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    Running,
    Finished,
}

/// Writes every entry, then a single Sync, and sorts the replies per entry.
pub struct BatchStateMachine {
    state: State,
    expect: VecDeque<(usize, Expect)>,
    columns: Vec<Option<Arc<[ColumnInfo]>>>,
    rows: Vec<Vec<Row>>,
    outcomes: Vec<BatchOutcome>,
    decode_failure: Option<Error>,
    ready: Option<TransactionStatus>,
}

impl BatchStateMachine {
    pub fn new(buffer_set: &mut BufferSet, batch: &Batch) -> Self {
        let buf = &mut buffer_set.write_buffer;
        buf.clear();
        let mut expect = VecDeque::new();
        let mut columns = Vec::with_capacity(batch.entries.len());
        for (index, entry) in batch.entries.iter().enumerate() {
            match &entry.source {
                Source::Prepared(stmt) => {
                    write_bind(buf, "", stmt.name(), &entry.params, stmt.result_formats());
                    write_execute(buf, "", 0);
                    expect.push_back((index, Expect::BindComplete));
                    expect.push_back((index, Expect::Rows));
                    columns.push(Some(Arc::clone(stmt.shared_columns())));
                }
                Source::Sql { sql, param_oids } => {
                    write_parse(buf, "", sql, param_oids);
                    write_bind(buf, "", "", &entry.params, &[]);
                    write_describe_portal(buf, "");
                    write_execute(buf, "", 0);
                    expect.extend([
                        (index, Expect::ParseComplete),
                        (index, Expect::BindComplete),
                        (index, Expect::RowDescriptionOrNoData),
                        (index, Expect::Rows),
                    ]);
                    columns.push(None);
                }
            }
        }
        write_sync(buf);
        expect.push_back((batch.entries.len(), Expect::ReadyForQuery));

        let count = batch.entries.len();
        Self {
            state: State::Initial,
            expect,
            columns,
            rows: (0..count).map(|_| Vec::new()).collect(),
            outcomes: (0..count).map(|_| BatchOutcome::Skipped).collect(),
            decode_failure: None,
            ready: None,
        }
    }

    /// Outcomes in entry order. Only meaningful once the machine finished.
    pub fn into_outcomes(self) -> Vec<BatchOutcome> {
        self.outcomes
    }

    fn complete(&mut self, index: usize, tag: &str) {
        let rows = self.rows.get_mut(index).map(std::mem::take).unwrap_or_default();
        if let Some(slot) = self.outcomes.get_mut(index) {
            *slot = BatchOutcome::Completed {
                rows,
                tag: tag.to_string(),
            };
        }
    }

    fn handle_message(&mut self, type_byte: u8, payload: &[u8]) -> Result<Action> {
        if type_byte == msg_type::ERROR_RESPONSE {
            let fields = parse_fields(payload)?;
            if fields.is_fatal() {
                self.state = State::Finished;
                return Err(Error::Server(fields));
            }
            let index = self.expect.front().map(|(i, _)| *i);
            if let Some(slot) = index.and_then(|i| self.outcomes.get_mut(i)) {
                *slot = BatchOutcome::Failed(fields);
            }
            self.expect.retain(|(_, e)| *e == Expect::ReadyForQuery);
            return Ok(Action::ReadMessage);
        }

        let (index, expected) = *self
            .expect
            .front()
            .ok_or_else(|| Error::ProtocolSync("reply to a finished batch".into()))?;

        match (expected, type_byte) {
            (Expect::ParseComplete, msg_type::PARSE_COMPLETE)
            | (Expect::BindComplete, msg_type::BIND_COMPLETE) => {
                self.expect.pop_front();
            }
            (Expect::RowDescriptionOrNoData, msg_type::ROW_DESCRIPTION) => {
                let described: Arc<[ColumnInfo]> = RowDescription::parse(payload)?.into_columns().into();
                if let Some(slot) = self.columns.get_mut(index) {
                    *slot = Some(described);
                }
                self.expect.pop_front();
            }
            (Expect::RowDescriptionOrNoData, msg_type::NO_DATA) => {
                if let Some(slot) = self.columns.get_mut(index) {
                    *slot = Some(Arc::from(Vec::new()));
                }
                self.expect.pop_front();
            }
            (Expect::Rows, msg_type::DATA_ROW) => {
                let columns = self
                    .columns
                    .get(index)
                    .and_then(Option::as_ref)
                    .ok_or_else(|| Error::ProtocolSync("DataRow before RowDescription".into()))?;
                let row = DataRow::parse(payload)?;
                if row.len() != columns.len() {
                    return Err(Error::ProtocolSync(format!(
                        "DataRow has {} fields, expected {}",
                        row.len(),
                        columns.len()
                    )));
                }
                match Row::decode(columns, row) {
                    Ok(decoded) => {
                        if let Some(rows) = self.rows.get_mut(index) {
                            rows.push(decoded);
                        }
                    }
                    Err(e) => {
                        if self.decode_failure.is_none() {
                            self.decode_failure = Some(e);
                        }
                    }
                }
            }
            (Expect::Rows, msg_type::COMMAND_COMPLETE) => {
                let complete = CommandComplete::parse(payload)?;
                self.complete(index, complete.tag);
                self.expect.pop_front();
            }
            (Expect::Rows, msg_type::EMPTY_QUERY_RESPONSE) => {
                self.complete(index, "");
                self.expect.pop_front();
            }
            (Expect::ReadyForQuery, msg_type::READY_FOR_QUERY) => {
                let status = ReadyForQuery::parse(payload)?
                    .transaction_status()
                    .ok_or_else(|| Error::ProtocolSync("invalid transaction status".into()))?;
                self.ready = Some(status);
                self.expect.pop_front();
                self.state = State::Finished;
                return match self.decode_failure.take() {
                    Some(e) => Err(e),
                    None => Ok(Action::Finished),
                };
            }
            (expected, other) => return Err(unexpected(expected, other)),
        }
        Ok(Action::ReadMessage)
    }
}

impl StateMachine for BatchStateMachine {
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
            State::Finished => Err(Error::ProtocolSync("batch already finished".into())),
        }
    }

    fn ready_status(&self) -> Option<TransactionStatus> {
        self.ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::Value;
    use crate::protocol::codec::FrameDecoder;
    use crate::protocol::types::oid;

    fn feed(machine: &mut BatchStateMachine, set: &mut BufferSet, tag: u8, payload: &[u8]) -> Result<Action> {
        set.set_message(tag, payload);
        machine.step(set)
    }

    fn written_tags(buf: &[u8]) -> Vec<u8> {
        let mut decoder = FrameDecoder::new();
        decoder.extend(buf);
        let mut tags = Vec::new();
        while let Some((tag, _)) = decoder.next_frame().unwrap() {
            tags.push(tag);
        }
        tags
    }

    fn one_text_column() -> Vec<u8> {
        let mut out = 1u16.to_be_bytes().to_vec();
        ColumnInfo::new("v", oid::TEXT).write_to(&mut out);
        out
    }

    #[test]
    fn test_single_sync_and_skip_after_failure() {
        let mut batch = Batch::new();
        batch
            .exec("INSERT INTO t VALUES ($1)", (1_i32,))
            .unwrap()
            .exec("SELECT $1::text", ("b",))
            .unwrap()
            .exec("SELECT 'c'", ())
            .unwrap();
        assert_eq!(batch.len(), 3);

        let mut set = BufferSet::new();
        let mut machine = BatchStateMachine::new(&mut set, &batch);
        assert_eq!(written_tags(&set.write_buffer), b"PBDEPBDEPBDES");
        assert!(matches!(machine.step(&mut set).unwrap(), Action::WriteAndReadMessage));

        // entry 0 succeeds
        feed(&mut machine, &mut set, b'1', b"").unwrap();
        feed(&mut machine, &mut set, b'2', b"").unwrap();
        feed(&mut machine, &mut set, b'n', b"").unwrap();
        feed(&mut machine, &mut set, b'C', b"INSERT 0 1\0").unwrap();
        // entry 1 fails at bind
        feed(&mut machine, &mut set, b'1', b"").unwrap();
        feed(&mut machine, &mut set, b'E', b"SERROR\0C22P02\0Mbad input\0\0").unwrap();
        assert!(matches!(feed(&mut machine, &mut set, b'Z', b"I").unwrap(), Action::Finished));

        let outcomes = machine.into_outcomes();
        assert!(matches!(&outcomes[0], BatchOutcome::Completed { tag, rows } if tag == "INSERT 0 1" && rows.is_empty()));
        assert!(matches!(&outcomes[1], BatchOutcome::Failed(e) if e.code() == Some("22P02")));
        assert!(matches!(outcomes[2], BatchOutcome::Skipped));
    }

    #[test]
    fn test_rows_per_entry() {
        let mut batch = Batch::new();
        batch.exec("SELECT 'a'", ()).unwrap();
        batch.exec("SELECT 'b'", ()).unwrap();
        let mut set = BufferSet::new();
        let mut machine = BatchStateMachine::new(&mut set, &batch);
        machine.step(&mut set).unwrap();
        for value in [b"a", b"b"] {
            feed(&mut machine, &mut set, b'1', b"").unwrap();
            feed(&mut machine, &mut set, b'2', b"").unwrap();
            feed(&mut machine, &mut set, b'T', &one_text_column()).unwrap();
            let mut row = 1u16.to_be_bytes().to_vec();
            row.extend_from_slice(&1i32.to_be_bytes());
            row.extend_from_slice(value);
            feed(&mut machine, &mut set, b'D', &row).unwrap();
            feed(&mut machine, &mut set, b'C', b"SELECT 1\0").unwrap();
        }
        feed(&mut machine, &mut set, b'Z', b"I").unwrap();
        let outcomes = machine.into_outcomes();
        assert_eq!(outcomes[1].rows()[0].get(0), Some(&Value::Text("b".into())));
        assert!(outcomes.iter().all(BatchOutcome::is_completed));
    }

    #[test]
    fn test_arity_checked_on_queue() {
        let stmt = PreparedStatement::new(
            "_pw_s_1".into(),
            "SELECT $1".into(),
            vec![oid::INT4],
            vec![],
            true,
        );
        let mut batch = Batch::new();
        assert!(matches!(
            batch.exec(&stmt, (1_i32, 2_i32)),
            Err(Error::BindParameter(_))
        ));
        assert!(batch.is_empty());
        batch.exec(&stmt, (1_i32,)).unwrap();
        assert_eq!(batch.statements().count(), 1);
    }
}
