//! Insert an employee inside a transaction, then read the salary back,
//! all through prepared statements.

mod common;

use common::Session;
use postwire::protocol::codec::{read_bytes, read_cstr, read_i16, read_i32};
use postwire::protocol::types::oid;
use postwire::sync::Conn;

/// Bind message fields the script checks.
struct Bind {
    portal: String,
    statement: String,
    param_formats: Vec<i16>,
    values: Vec<Option<Vec<u8>>>,
    result_formats: Vec<i16>,
}

fn parse_bind(payload: &[u8]) -> Bind {
    let (portal, rest) = read_cstr(payload).unwrap();
    let (statement, mut rest) = read_cstr(rest).unwrap();
    let (count, after) = read_i16(rest).unwrap();
    rest = after;
    let mut param_formats = Vec::new();
    for _ in 0..count {
        let (format, after) = read_i16(rest).unwrap();
        param_formats.push(format);
        rest = after;
    }
    let (count, after) = read_i16(rest).unwrap();
    rest = after;
    let mut values = Vec::new();
    for _ in 0..count {
        let (len, after) = read_i32(rest).unwrap();
        if len < 0 {
            values.push(None);
            rest = after;
        } else {
            let (bytes, after) = read_bytes(after, usize::try_from(len).unwrap()).unwrap();
            values.push(Some(bytes.to_vec()));
            rest = after;
        }
    }
    let (count, after) = read_i16(rest).unwrap();
    rest = after;
    let mut result_formats = Vec::new();
    for _ in 0..count {
        let (format, after) = read_i16(rest).unwrap();
        result_formats.push(format);
        rest = after;
    }
    assert!(rest.is_empty());
    Bind {
        portal: portal.to_string(),
        statement: statement.to_string(),
        param_formats,
        values,
        result_formats,
    }
}

/// Binary numeric 150000: two base-10000 digit groups, 15 and 0000.
const SALARY_BINARY: [u8; 12] = [0, 2, 0, 1, 0, 0, 0, 0, 0, 15, 0, 0];

fn script(session: &mut Session) {
    session.handshake_trust();

    // prepare INSERT
    let parse = session.expect(b'P');
    let (name, rest) = read_cstr(&parse).unwrap();
    assert_eq!(name, "_pw_s_1");
    assert_eq!(read_cstr(rest).unwrap().0, "INSERT INTO emp VALUES ($1, $2)");
    session.expect(b'D');
    session.expect(b'S');
    session.parse_complete();
    session.parameter_description(&[oid::TEXT, oid::NUMERIC]);
    session.no_data();
    session.ready(b'I');

    // transaction around the insert
    assert_eq!(session.read_query(), "BEGIN");
    session.complete("BEGIN", b'T');
    let bind = parse_bind(&session.expect(b'B'));
    assert_eq!(bind.portal, "");
    assert_eq!(bind.statement, "_pw_s_1");
    // text-like parameters go binary, numeric goes as text for the server to parse
    assert_eq!(bind.param_formats, vec![1, 0]);
    assert_eq!(
        bind.values,
        vec![Some(b"John Doe".to_vec()), Some(b"150000".to_vec())]
    );
    assert!(bind.result_formats.is_empty());
    session.expect(b'E');
    session.expect(b'S');
    session.bind_complete();
    session.command_complete("INSERT 0 1");
    session.ready(b'T');
    assert_eq!(session.read_query(), "COMMIT");
    session.complete("COMMIT", b'I');

    // prepare SELECT
    let parse = session.expect(b'P');
    assert_eq!(read_cstr(&parse).unwrap().0, "_pw_s_2");
    session.expect(b'D');
    session.expect(b'S');
    session.parse_complete();
    session.parameter_description(&[oid::TEXT]);
    session.row_description(&[("emp_salary", oid::NUMERIC)]);
    session.ready(b'I');

    let bind = parse_bind(&session.expect(b'B'));
    assert_eq!(bind.statement, "_pw_s_2");
    assert_eq!(bind.values, vec![Some(b"John Doe".to_vec())]);
    assert_eq!(bind.result_formats, vec![1]);
    session.expect(b'E');
    session.expect(b'S');
    session.bind_complete();
    session.data_row(&[Some(SALARY_BINARY.as_slice())]);
    session.command_complete("SELECT 1");
    session.ready(b'I');

    session.expect_terminate();
}

#[test]
fn test_insert_then_select_salary() {
    let server = common::spawn(script);
    let mut conn = Conn::new(server.opts()).unwrap();

    let insert = conn.prepare("INSERT INTO emp VALUES ($1, $2)").unwrap();
    assert_eq!(insert.param_oids(), &[oid::TEXT, oid::NUMERIC]);
    let affected = conn
        .transaction(|conn, _tx| conn.exec_drop(&insert, ("John Doe", "150000")))
        .unwrap();
    assert_eq!(affected, Some(1));

    let select = conn.prepare("SELECT emp_salary FROM emp WHERE emp_name = $1").unwrap();
    assert!(select.returns_rows());
    let salary: Option<(String,)> = conn.exec_first(&select, ("John Doe",)).unwrap();
    assert_eq!(salary, Some(("150000".to_string(),)));

    conn.close().unwrap();
    server.join();
}
