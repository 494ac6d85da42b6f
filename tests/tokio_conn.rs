//! The tokio driver against the same scripted server.

mod common;

use postwire::protocol::backend::auth::auth_type;
use postwire::protocol::frontend::auth::md5_password;
use postwire::protocol::types::oid;
use postwire::tokio::{Conn, SharedConn};
use postwire::{BatchOutcome, Error, TransactionStatus};

#[tokio::test]
async fn test_md5_query_and_close() {
    let server = common::spawn(|session| {
        let salt = [7, 7, 7, 7];
        session.read_startup();
        session.auth(auth_type::MD5_PASSWORD, &salt);
        assert_eq!(session.read_password(), md5_password(common::USER, common::PASSWORD, &salt));
        session.finish_startup();

        assert_eq!(session.read_query(), "SELECT 1, 'one'");
        session.row_description(&[("n", oid::INT4), ("s", oid::TEXT)]);
        session.text_row(&["1", "one"]);
        session.complete("SELECT 1", b'I');
        session.expect_terminate();
    });
    let mut conn = Conn::new(server.opts()).await.unwrap();
    assert_eq!(conn.connection_id(), common::BACKEND_PID);
    let rows: Vec<(i32, String)> = conn.query_collect("SELECT 1, 'one'").await.unwrap();
    assert_eq!(rows, vec![(1, "one".to_string())]);
    conn.close().await.unwrap();
    assert!(matches!(conn.ping().await, Err(Error::ConnectionDoesNotExist)));
    server.join();
}

#[tokio::test]
async fn test_prepared_exec_binary_results() {
    let server = common::spawn(|session| {
        session.handshake_trust();
        assert_eq!(session.read_until_sync(), b"PDS");
        session.parse_complete();
        session.parameter_description(&[oid::INT4]);
        session.row_description(&[("next", oid::INT4)]);
        session.ready(b'I');

        assert_eq!(session.read_until_sync(), b"BES");
        session.bind_complete();
        session.data_row(&[Some(42_i32.to_be_bytes().as_slice())]);
        session.command_complete("SELECT 1");
        session.ready(b'I');
        session.expect_terminate();
    });
    let mut conn = Conn::new(server.opts()).await.unwrap();
    let stmt = conn.prepare("SELECT $1::int4 + 1").await.unwrap();
    let next: Option<(i32,)> = conn.exec_first(&stmt, (41_i32,)).await.unwrap();
    assert_eq!(next, Some((42,)));
    conn.close().await.unwrap();
    server.join();
}

#[tokio::test]
async fn test_transaction_rolls_back_on_error() {
    let server = common::spawn(|session| {
        session.handshake_trust();
        assert_eq!(session.read_query(), "BEGIN");
        session.complete("BEGIN", b'T');
        assert_eq!(session.read_query(), "DELETE FROM locked");
        session.error("ERROR", "42501", "permission denied for table locked");
        session.ready(b'E');
        assert_eq!(session.read_query(), "ROLLBACK");
        session.complete("ROLLBACK", b'I');
        session.expect_terminate();
    });
    let mut conn = Conn::new(server.opts()).await.unwrap();
    let err = conn
        .transaction(async |conn, _tx| conn.query_drop("DELETE FROM locked").await)
        .await
        .unwrap_err();
    assert_eq!(err.sqlstate(), Some("42501"));
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
    conn.close().await.unwrap();
    server.join();
}

#[tokio::test]
async fn test_transaction_handle_after_close() {
    let server = common::spawn(|session| {
        session.handshake_trust();
        assert_eq!(session.read_query(), "BEGIN");
        session.complete("BEGIN", b'T');
        session.expect_terminate();
    });
    let mut conn = Conn::new(server.opts()).await.unwrap();
    let mut tx = conn.start_transaction().await.unwrap();
    conn.close().await.unwrap();
    assert!(matches!(tx.rollback(&mut conn).await, Err(Error::ConnectionDoesNotExist)));
    assert!(matches!(tx.commit(&mut conn).await, Err(Error::ConnectionDoesNotExist)));
    assert!(matches!(conn.savepoint("").await, Err(Error::ConnectionDoesNotExist)));
    server.join();
}

#[tokio::test]
async fn test_shared_batch() {
    let server = common::spawn(|session| {
        session.handshake_trust();
        assert_eq!(session.read_until_sync(), b"PBDEPBDES");
        session.parse_complete();
        session.bind_complete();
        session.no_data();
        session.command_complete("UPDATE 3");
        session.error("ERROR", "42P01", "relation \"gone\" does not exist");
        session.ready(b'I');
        session.expect_terminate();
    });
    let conn = Conn::new(server.opts()).await.unwrap();
    let shared = SharedConn::new(conn);
    let outcomes = shared
        .with(async |conn| {
            let mut batch = conn.batch();
            batch.exec("UPDATE t SET n = n + 1", ())?;
            batch.exec("UPDATE gone SET n = 0", ())?;
            conn.run_batch(&batch).await
        })
        .await
        .unwrap();
    assert!(matches!(&outcomes[0], BatchOutcome::Completed { tag, .. } if tag == "UPDATE 3"));
    assert!(matches!(&outcomes[1], BatchOutcome::Failed(e) if e.code() == Some("42P01")));
    shared.lock().await.close().await.unwrap();
    server.join();
}
