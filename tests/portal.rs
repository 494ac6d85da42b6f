//! Named portals fetched in chunks inside a transaction.

mod common;

use postwire::protocol::types::oid;
use postwire::sync::Conn;
use postwire::Error;

#[test]
fn test_portal_fetches_in_chunks() {
    let server = common::spawn(|session| {
        session.handshake_trust();
        assert_eq!(session.read_query(), "BEGIN");
        session.complete("BEGIN", b'T');

        let tags = session.read_until_sync();
        assert_eq!(tags, b"PBDS");
        session.parse_complete();
        session.bind_complete();
        session.row_description(&[("n", oid::INT4)]);
        session.ready(b'T');

        let execute = session.expect(b'E');
        assert_eq!(&execute, b"_pw_p_1\0\0\0\0\x02");
        session.expect(b'S');
        session.text_row(&["1"]);
        session.text_row(&["2"]);
        session.portal_suspended();
        session.ready(b'T');

        assert_eq!(session.read_until_sync(), b"ES");
        session.text_row(&["3"]);
        session.command_complete("SELECT 3");
        session.ready(b'T');

        let close = session.expect(b'C');
        assert_eq!(&close, b"P_pw_p_1\0");
        session.expect(b'S');
        session.close_complete();
        session.ready(b'T');

        assert_eq!(session.read_query(), "COMMIT");
        session.complete("COMMIT", b'I');
        session.expect_terminate();
    });
    let mut conn = Conn::new(server.opts()).unwrap();
    let mut tx = conn.start_transaction().unwrap();
    let mut portal = tx
        .exec_portal(&mut conn, "SELECT generate_series(1, 3) AS n", ())
        .unwrap();
    assert_eq!(portal.columns().len(), 1);
    assert_eq!(portal.columns()[0].name, "n");

    let first: Vec<(i32,)> = portal.execute_collect(&mut conn, 2).unwrap();
    assert_eq!(first, vec![(1,), (2,)]);
    assert!(!portal.is_complete());

    let rest: Vec<(i32,)> = portal.execute_collect(&mut conn, 2).unwrap();
    assert_eq!(rest, vec![(3,)]);
    assert!(portal.is_complete());

    // Exhausted portals refuse further fetches without touching the wire.
    let err = portal.execute_collect::<(i32,)>(&mut conn, 1).unwrap_err();
    assert!(matches!(err, Error::InvalidUsage(_)), "{err}");

    portal.close(&mut conn).unwrap();
    tx.commit(&mut conn).unwrap();
    conn.close().unwrap();
    server.join();
}

#[test]
fn test_finished_transaction_refuses_portals() {
    let server = common::spawn(|session| {
        session.handshake_trust();
        assert_eq!(session.read_query(), "BEGIN");
        session.complete("BEGIN", b'T');
        assert_eq!(session.read_query(), "COMMIT");
        session.complete("COMMIT", b'I');
        session.expect_terminate();
    });
    let mut conn = Conn::new(server.opts()).unwrap();
    let mut tx = conn.start_transaction().unwrap();
    tx.commit(&mut conn).unwrap();
    let err = tx.exec_portal(&mut conn, "SELECT 1", ()).err().unwrap();
    assert!(matches!(err, Error::InvalidUsage(_)), "{err}");
    conn.close().unwrap();
    server.join();
}
