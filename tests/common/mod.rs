//! In-process scripted PostgreSQL server for integration tests.
//!
//! Each test spawns a listener thread running a script against one client
//! connection. Frontend frames are read with the crate's `FrameDecoder` and
//! replies are built with `MessageBuilder`, so no database is needed.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::JoinHandle;
use std::time::Duration;

use postwire::protocol::backend::ColumnInfo;
use postwire::protocol::backend::auth::auth_type;
use postwire::protocol::codec::{FrameDecoder, MessageBuilder, read_cstr, read_i32, read_u32};
use postwire::protocol::frontend::startup::{
    CANCEL_REQUEST_CODE, PROTOCOL_VERSION_3_0, SSL_REQUEST_CODE, parse_startup,
};
use postwire::{Oid, Opts, SslMode};

pub const USER: &str = "alice";
pub const PASSWORD: &str = "wonderland";
pub const BACKEND_PID: u32 = 4242;
pub const BACKEND_SECRET: u32 = 0x5EC2_E7A1;

pub struct Server {
    port: u16,
    listener: TcpListener,
    handle: JoinHandle<()>,
}

/// Accept one connection and run `script` on it.
pub fn spawn<F>(script: F) -> Server
where
    F: FnOnce(&mut Session) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let extra = listener.try_clone().unwrap();
    let handle = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        let mut session = Session {
            stream,
            decoder: FrameDecoder::new_startup(),
            ssl_requests: 0,
        };
        script(&mut session);
    });
    Server {
        port,
        listener: extra,
        handle,
    }
}

impl Server {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Client options pointing at this server, without TLS or socket upgrade.
    pub fn opts(&self) -> Opts {
        Opts {
            host: "127.0.0.1".into(),
            port: self.port,
            user: USER.into(),
            password: Some(PASSWORD.into()),
            database: Some("test".into()),
            ssl_mode: SslMode::Disable,
            prefer_unix_socket: false,
            io_timeout: Some(Duration::from_secs(10)),
            ..Default::default()
        }
    }

    /// Accept a second connection carrying a CancelRequest and return its
    /// `(process_id, secret_key)`.
    pub fn accept_cancel(&self) -> (u32, u32) {
        let (mut stream, _) = self.listener.accept().unwrap();
        let mut request = [0u8; 16];
        stream.read_exact(&mut request).unwrap();
        let mut decoder = FrameDecoder::new_startup();
        decoder.extend(&request);
        let (_, payload) = decoder.next_frame().unwrap().unwrap();
        let (code, rest) = read_i32(&payload).unwrap();
        assert_eq!(code, CANCEL_REQUEST_CODE);
        let (pid, rest) = read_u32(rest).unwrap();
        let (secret, _) = read_u32(rest).unwrap();
        (pid, secret)
    }

    /// Wait for the script, re-raising its assertion failures.
    pub fn join(self) {
        if let Err(panic) = self.handle.join() {
            std::panic::resume_unwind(panic);
        }
    }
}

/// Server side of one connection.
pub struct Session {
    stream: TcpStream,
    decoder: FrameDecoder,
    ssl_requests: u32,
}

impl Session {
    // === Reading ===

    /// Next frontend frame as `(tag, payload)`; startup messages have tag 0.
    pub fn read_frame(&mut self) -> (u8, Vec<u8>) {
        loop {
            if let Some(frame) = self.decoder.next_frame().unwrap() {
                return frame;
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).unwrap();
            assert!(n > 0, "client closed the connection");
            self.decoder.extend(&chunk[..n]);
        }
    }

    /// Read one frame and check its tag.
    pub fn expect(&mut self, tag: u8) -> Vec<u8> {
        let (got, payload) = self.read_frame();
        assert_eq!(got as char, tag as char, "unexpected frontend message");
        payload
    }

    /// Read frames up to and including Sync, returning their tags.
    pub fn read_until_sync(&mut self) -> Vec<u8> {
        let mut tags = Vec::new();
        loop {
            let (tag, _) = self.read_frame();
            tags.push(tag);
            if tag == b'S' {
                return tags;
            }
        }
    }

    /// Read the StartupMessage, declining an SSLRequest first. Returns the
    /// startup parameters.
    pub fn read_startup(&mut self) -> Vec<(String, String)> {
        loop {
            let (tag, payload) = self.read_frame();
            assert_eq!(tag, 0);
            if payload.first_chunk::<4>() == Some(&SSL_REQUEST_CODE.to_be_bytes()) {
                self.stream.write_all(b"N").unwrap();
                self.ssl_requests += 1;
                continue;
            }
            let (version, params) = parse_startup(&payload).unwrap();
            assert_eq!(version, PROTOCOL_VERSION_3_0);
            return params;
        }
    }

    /// SSLRequests declined so far.
    pub fn ssl_requests(&self) -> u32 {
        self.ssl_requests
    }

    /// Read a simple Query and return its SQL.
    pub fn read_query(&mut self) -> String {
        let payload = self.expect(b'Q');
        let (sql, _) = read_cstr(&payload).unwrap();
        sql.to_string()
    }

    /// Read a PasswordMessage and return its content.
    pub fn read_password(&mut self) -> String {
        let payload = self.expect(b'p');
        let (password, _) = read_cstr(&payload).unwrap();
        password.to_string()
    }

    pub fn expect_terminate(&mut self) {
        self.expect(b'X');
    }

    /// The client sends nothing but an optional Terminate, then closes.
    pub fn expect_hang_up(&mut self) {
        loop {
            while let Some((tag, _)) = self.decoder.next_frame().unwrap() {
                assert_eq!(tag as char, 'X', "client kept talking");
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).unwrap();
            if n == 0 {
                return;
            }
            self.decoder.extend(&chunk[..n]);
        }
    }

    // === Writing ===

    pub fn send(&mut self, tag: u8, payload: &[u8]) {
        let mut out = Vec::new();
        let mut msg = MessageBuilder::new(&mut out, tag);
        msg.write_bytes(payload);
        msg.finish();
        self.stream.write_all(&out).unwrap();
    }

    pub fn auth(&mut self, code: i32, extra: &[u8]) {
        let mut payload = code.to_be_bytes().to_vec();
        payload.extend_from_slice(extra);
        self.send(b'R', &payload);
    }

    pub fn auth_ok(&mut self) {
        self.auth(auth_type::OK, &[]);
    }

    pub fn param_status(&mut self, name: &str, value: &str) {
        self.send(b'S', &cstrs(&[name, value]));
    }

    pub fn backend_key(&mut self) {
        let mut payload = BACKEND_PID.to_be_bytes().to_vec();
        payload.extend_from_slice(&BACKEND_SECRET.to_be_bytes());
        self.send(b'K', &payload);
    }

    /// ReadyForQuery with status `I`, `T` or `E`.
    pub fn ready(&mut self, status: u8) {
        self.send(b'Z', &[status]);
    }

    /// The post-authentication burst ending in ReadyForQuery.
    pub fn finish_startup(&mut self) {
        self.auth_ok();
        self.param_status("server_version", "16.4");
        self.param_status("integer_datetimes", "on");
        self.param_status("client_encoding", "UTF8");
        self.backend_key();
        self.ready(b'I');
    }

    /// Accept the startup under trust authentication.
    pub fn handshake_trust(&mut self) {
        self.read_startup();
        self.finish_startup();
    }

    pub fn row_description(&mut self, columns: &[(&str, Oid)]) {
        let mut payload = u16::try_from(columns.len()).unwrap().to_be_bytes().to_vec();
        for (name, type_oid) in columns {
            ColumnInfo::new(*name, *type_oid).write_to(&mut payload);
        }
        self.send(b'T', &payload);
    }

    pub fn data_row(&mut self, values: &[Option<&[u8]>]) {
        let mut payload = u16::try_from(values.len()).unwrap().to_be_bytes().to_vec();
        for value in values {
            match value {
                Some(bytes) => {
                    payload.extend_from_slice(&i32::try_from(bytes.len()).unwrap().to_be_bytes());
                    payload.extend_from_slice(bytes);
                }
                None => payload.extend_from_slice(&(-1_i32).to_be_bytes()),
            }
        }
        self.send(b'D', &payload);
    }

    /// DataRow with every value in text form.
    pub fn text_row(&mut self, values: &[&str]) {
        let values: Vec<Option<&[u8]>> = values.iter().map(|v| Some(v.as_bytes())).collect();
        self.data_row(&values);
    }

    pub fn command_complete(&mut self, tag: &str) {
        self.send(b'C', &cstrs(&[tag]));
    }

    /// CommandComplete followed by ReadyForQuery.
    pub fn complete(&mut self, tag: &str, status: u8) {
        self.command_complete(tag);
        self.ready(status);
    }

    pub fn error(&mut self, severity: &str, code: &str, message: &str) {
        self.send(b'E', &fields(severity, code, message));
    }

    pub fn notice(&mut self, message: &str) {
        self.send(b'N', &fields("NOTICE", "00000", message));
    }

    pub fn notification(&mut self, pid: u32, channel: &str, payload: &str) {
        let mut body = pid.to_be_bytes().to_vec();
        body.extend_from_slice(&cstrs(&[channel, payload]));
        self.send(b'A', &body);
    }

    pub fn parse_complete(&mut self) {
        self.send(b'1', &[]);
    }

    pub fn bind_complete(&mut self) {
        self.send(b'2', &[]);
    }

    pub fn close_complete(&mut self) {
        self.send(b'3', &[]);
    }

    pub fn no_data(&mut self) {
        self.send(b'n', &[]);
    }

    pub fn empty_query(&mut self) {
        self.send(b'I', &[]);
    }

    pub fn portal_suspended(&mut self) {
        self.send(b's', &[]);
    }

    pub fn parameter_description(&mut self, oids: &[Oid]) {
        let mut payload = u16::try_from(oids.len()).unwrap().to_be_bytes().to_vec();
        for type_oid in oids {
            payload.extend_from_slice(&type_oid.to_be_bytes());
        }
        self.send(b't', &payload);
    }
}

fn cstrs(parts: &[&str]) -> Vec<u8> {
    let mut out = Vec::new();
    for part in parts {
        out.extend_from_slice(part.as_bytes());
        out.push(0);
    }
    out
}

fn fields(severity: &str, code: &str, message: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for (field, value) in [(b'S', severity), (b'V', severity), (b'C', code), (b'M', message)] {
        out.push(field);
        out.extend_from_slice(value.as_bytes());
        out.push(0);
    }
    out.push(0);
    out
}
