//! Authentication against a scripted server that checks the client's proofs.

mod common;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use common::{PASSWORD, Session, USER};
use postwire::protocol::backend::auth::auth_type;
use postwire::protocol::codec::{read_cstr, read_i32};
use postwire::protocol::frontend::auth::ScramClient;
use postwire::protocol::types::oid;
use postwire::sync::Conn;
use postwire::{Error, SslMode};

/// Reject the client the way the server does after a bad password.
fn reject(session: &mut Session) {
    session.error(
        "FATAL",
        "28P01",
        &format!("password authentication failed for user \"{USER}\""),
    );
    session.expect_hang_up();
}

/// Serve one `SELECT 1` and wait for Terminate.
fn answer_select_one(session: &mut Session) {
    assert_eq!(session.read_query(), "SELECT 1");
    session.row_description(&[("n", oid::INT4)]);
    session.text_row(&["1"]);
    session.complete("SELECT 1", b'I');
    session.expect_terminate();
}

/// The handshake left a working session behind.
fn assert_usable(mut conn: Conn) {
    conn.query_drop("SELECT 1").unwrap();
    conn.close().unwrap();
}

fn assert_rejected(result: postwire::Result<Conn>) {
    match result {
        Err(Error::AuthenticationFailed {
            server: Some(server),
            ..
        }) => assert_eq!(server.code(), Some("28P01")),
        Err(other) => panic!("expected AuthenticationFailed, got {other}"),
        Ok(_) => panic!("expected AuthenticationFailed, got a connection"),
    }
}

#[test]
fn test_trust_collects_session_state() {
    let server = common::spawn(|session| {
        let params = session.read_startup();
        assert!(params.contains(&("user".into(), USER.into())));
        assert!(params.contains(&("database".into(), "test".into())));
        assert!(params.contains(&("client_encoding".into(), "UTF8".into())));
        assert!(params.contains(&("application_name".into(), "auth-test".into())));
        session.finish_startup();
        session.expect_terminate();
    });

    let mut opts = server.opts();
    opts.application_name = Some("auth-test".into());
    let mut conn = Conn::new(opts).unwrap();
    assert_eq!(conn.connection_id(), common::BACKEND_PID);
    assert_eq!(conn.server_version(), Some("16.4"));
    assert_eq!(conn.server_param("client_encoding"), Some("UTF8"));
    assert!(!conn.in_transaction());
    let token = conn.cancel_token().unwrap();
    assert_eq!(token.process_id(), common::BACKEND_PID);
    conn.close().unwrap();
    server.join();
}

#[test]
fn test_prefer_degrades_to_plaintext() {
    // Without a TLS feature Prefer resolves to Disable and no SSLRequest
    // goes out. With one, the script declines the SSLRequest with 'N'.
    let server = common::spawn(|session| {
        session.handshake_trust();
        let expected = if cfg!(feature = "sync-tls") { 1 } else { 0 };
        assert_eq!(session.ssl_requests(), expected);
        session.expect_terminate();
    });
    let mut opts = server.opts();
    opts.ssl_mode = SslMode::Prefer;
    let conn = Conn::new(opts).unwrap();
    drop(conn);
    server.join();
}

#[test]
fn test_cleartext_password() {
    let server = common::spawn(|session| {
        session.read_startup();
        session.auth(auth_type::CLEARTEXT_PASSWORD, &[]);
        assert_eq!(session.read_password(), PASSWORD);
        session.finish_startup();
        session.expect_terminate();
    });
    let mut conn = Conn::new(server.opts()).unwrap();
    conn.close().unwrap();
    server.join();
}

#[test]
fn test_cleartext_password_rejected() {
    let server = common::spawn(|session| {
        session.read_startup();
        session.auth(auth_type::CLEARTEXT_PASSWORD, &[]);
        assert_eq!(session.read_password(), "wrong");
        reject(session);
    });
    let mut opts = server.opts();
    opts.password = Some("wrong".into());
    assert_rejected(Conn::new(opts));
    server.join();
}

fn md5_server(session: &mut Session) -> bool {
    session.read_startup();
    session.auth(auth_type::MD5_PASSWORD, &[0x01, 0x02, 0x03, 0x04]);
    let sent = session.read_password();
    // md5 of "wonderland" for "alice" under salt 01 02 03 04
    if sent == "md5370dfac54ebb2bdeedf68eab452ffd72" {
        session.finish_startup();
        true
    } else {
        reject(session);
        false
    }
}

#[test]
fn test_md5_password() {
    let server = common::spawn(|session| {
        assert!(md5_server(session));
        answer_select_one(session);
    });
    assert_usable(Conn::new(server.opts()).unwrap());
    server.join();
}

#[test]
fn test_md5_password_rejected() {
    let server = common::spawn(|session| {
        assert!(!md5_server(session));
    });
    let mut opts = server.opts();
    opts.password = Some("not the password".into());
    assert_rejected(Conn::new(opts));
    server.join();
}

#[cfg(feature = "legacy-crypt")]
fn crypt_server(session: &mut Session) -> bool {
    session.read_startup();
    session.auth(auth_type::CRYPT_PASSWORD, b"ab");
    let sent = session.read_password();
    // crypt(3) of "wonderland" with salt "ab"
    if sent == "abbIw0V4oaGvc" {
        session.finish_startup();
        true
    } else {
        reject(session);
        false
    }
}

#[cfg(feature = "legacy-crypt")]
#[test]
fn test_crypt_password() {
    let server = common::spawn(|session| {
        assert!(crypt_server(session));
        answer_select_one(session);
    });
    assert_usable(Conn::new(server.opts()).unwrap());
    server.join();
}

#[cfg(feature = "legacy-crypt")]
#[test]
fn test_crypt_password_rejected() {
    let server = common::spawn(|session| {
        assert!(!crypt_server(session));
    });
    let mut opts = server.opts();
    opts.password = Some("nope".into());
    assert_rejected(Conn::new(opts));
    server.join();
}

const SCRAM_SALT: &[u8] = b"scripted-salt";
const SCRAM_ITERATIONS: u32 = 4096;

/// Run the server half of SCRAM-SHA-256. Returns whether the proof matched.
fn scram_server(session: &mut Session, tamper_signature: bool) -> bool {
    session.read_startup();
    session.auth(auth_type::SASL, b"SCRAM-SHA-256\0\0");

    let initial = session.expect(b'p');
    let (mechanism, rest) = read_cstr(&initial).unwrap();
    assert_eq!(mechanism, "SCRAM-SHA-256");
    let (len, data) = read_i32(rest).unwrap();
    assert_eq!(usize::try_from(len).unwrap(), data.len());
    let client_first = std::str::from_utf8(data).unwrap();
    let client_first_bare = client_first.strip_prefix("n,,").unwrap();
    let client_nonce = client_first_bare.strip_prefix("n=,r=").unwrap();

    let server_first = format!(
        "r={client_nonce}scriptednonce,s={},i={SCRAM_ITERATIONS}",
        BASE64.encode(SCRAM_SALT)
    );
    session.auth(auth_type::SASL_CONTINUE, server_first.as_bytes());

    let response = session.expect(b'p');
    let client_final = std::str::from_utf8(&response).unwrap();
    assert!(client_final.starts_with("c=biws,r="));
    let (server_final, proof_ok) = ScramClient::server_verify(
        PASSWORD,
        SCRAM_SALT,
        SCRAM_ITERATIONS,
        client_first_bare,
        &server_first,
        client_final,
    )
    .unwrap();

    if !proof_ok {
        reject(session);
        return false;
    }
    let server_final = if tamper_signature {
        format!("v={}", BASE64.encode([0u8; 32]))
    } else {
        server_final
    };
    session.auth(auth_type::SASL_FINAL, server_final.as_bytes());
    if !tamper_signature {
        session.finish_startup();
    }
    true
}

#[test]
fn test_scram_sha_256() {
    let server = common::spawn(|session| {
        assert!(scram_server(session, false));
        answer_select_one(session);
    });
    assert_usable(Conn::new(server.opts()).unwrap());
    server.join();
}

#[test]
fn test_scram_sha_256_wrong_password() {
    let server = common::spawn(|session| {
        assert!(!scram_server(session, false));
    });
    let mut opts = server.opts();
    opts.password = Some("Wonderland".into());
    assert_rejected(Conn::new(opts));
    server.join();
}

#[test]
fn test_scram_rejects_forged_server_signature() {
    let server = common::spawn(|session| {
        assert!(scram_server(session, true));
        session.expect_hang_up();
    });
    let err = Conn::new(server.opts()).err().unwrap();
    assert!(matches!(err, Error::AuthenticationFailed { server: None, .. }), "{err}");
    server.join();
}

#[test]
fn test_unsupported_method() {
    let server = common::spawn(|session| {
        session.read_startup();
        session.auth(auth_type::KERBEROS_V5, &[]);
        session.expect_hang_up();
    });
    let err = Conn::new(server.opts()).err().unwrap();
    assert!(
        err.to_string().contains("unsupported authentication method"),
        "{err}"
    );
    server.join();
}

#[test]
fn test_missing_password() {
    let server = common::spawn(|session| {
        session.read_startup();
        session.auth(auth_type::MD5_PASSWORD, &[9, 9, 9, 9]);
        session.expect_hang_up();
    });
    let mut opts = server.opts();
    opts.password = None;
    let err = Conn::new(opts).err().unwrap();
    assert!(err.to_string().contains("password required"), "{err}");
    server.join();
}
