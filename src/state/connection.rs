//! Connection startup and authentication state machine.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::opts::{Opts, SslMode};
use crate::protocol::backend::{
    AuthenticationMessage, BackendKeyData, NegotiateProtocolVersion, ReadyForQuery, msg_type,
    parse_fields,
};
use crate::protocol::frontend::auth::{ScramClient, crypt_password, md5_password};
use crate::protocol::frontend::{
    write_password, write_sasl_initial_response, write_sasl_response, write_ssl_request,
    write_startup,
};
use crate::protocol::types::TransactionStatus;

use super::StateMachine;
use super::action::{Action, parse_async_message};
use super::session::Session;

const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// Connection state during startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initial,
    WaitingSslResponse,
    SslHandshake,
    WaitingAuth,
    SaslInProgress,
    WaitingAuthResult,
    WaitingReady,
    Ready,
    Failed,
}

/// Connection startup state machine.
///
/// Drives SSL negotiation, the StartupMessage, authentication and the
/// BackendKeyData/ParameterStatus burst up to the first ReadyForQuery. The
/// collected state is handed over with [`into_session`](Self::into_session).
pub struct ConnectionStateMachine {
    state: ConnectionState,
    opts: Opts,
    ssl_response: Option<u8>,
    scram: Option<ScramClient>,
    authenticated: bool,
    session: Session,
    ready: Option<TransactionStatus>,
}

impl ConnectionStateMachine {
    pub fn new(opts: Opts) -> Self {
        Self {
            state: ConnectionState::Initial,
            opts,
            ssl_response: None,
            scram: None,
            authenticated: false,
            session: Session::new(),
            ready: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Record the byte answering SSLRequest, before the next `step`.
    pub fn set_ssl_response(&mut self, byte: u8) {
        self.ssl_response = Some(byte);
    }

    pub fn into_session(self) -> Session {
        self.session
    }

    fn write_startup_message(&mut self, buffer_set: &mut BufferSet) -> Action {
        buffer_set.write_buffer.clear();
        write_startup(&mut buffer_set.write_buffer, self.opts.startup_params());
        self.state = ConnectionState::WaitingAuth;
        Action::WriteAndReadMessage
    }

    fn password(&self) -> Result<&str> {
        self.opts
            .password
            .as_deref()
            .ok_or_else(|| Error::auth("password required but not provided"))
    }

    fn fail(&mut self, error: Error) -> Error {
        self.state = ConnectionState::Failed;
        error
    }

    fn handle_ssl_response(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.ssl_response.take() {
            Some(b'S') => {
                tracing::debug!("server accepted SSLRequest");
                self.state = ConnectionState::SslHandshake;
                Ok(Action::TlsHandshake)
            }
            Some(b'N') => {
                if self.opts.ssl_mode == SslMode::Require {
                    return Err(self.fail(Error::auth("SSL required but not supported by server")));
                }
                tracing::debug!("server declined SSLRequest, continuing in plaintext");
                Ok(self.write_startup_message(buffer_set))
            }
            Some(other) => Err(self.fail(Error::ProtocolSync(format!(
                "unexpected SSL response byte {other:#04x}"
            )))),
            None => Err(self.fail(Error::ProtocolSync("SSL response not received".into()))),
        }
    }

    fn handle_auth_request(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let auth = AuthenticationMessage::parse(&buffer_set.read_buffer)?;
        let response = match auth {
            AuthenticationMessage::Ok => {
                tracing::debug!("authentication: trust");
                self.authenticated = true;
                self.state = ConnectionState::WaitingReady;
                return Ok(Action::ReadMessage);
            }
            AuthenticationMessage::CleartextPassword => {
                tracing::debug!("authentication: cleartext password");
                self.password()?.to_string()
            }
            AuthenticationMessage::Md5Password { salt } => {
                tracing::debug!("authentication: md5");
                md5_password(&self.opts.user, self.password()?, &salt)
            }
            AuthenticationMessage::CryptPassword { salt } => {
                tracing::debug!("authentication: crypt");
                crypt_password(self.password()?, &salt)?
            }
            AuthenticationMessage::Sasl { mechanisms } => {
                if !mechanisms.contains(&SCRAM_SHA_256) {
                    return Err(Error::auth(format!(
                        "no supported SASL mechanism, server offers {mechanisms:?}"
                    )));
                }
                tracing::debug!("authentication: {SCRAM_SHA_256}");
                let scram = ScramClient::new(self.password()?);
                buffer_set.write_buffer.clear();
                write_sasl_initial_response(
                    &mut buffer_set.write_buffer,
                    SCRAM_SHA_256,
                    scram.client_first_message().as_bytes(),
                );
                self.scram = Some(scram);
                self.state = ConnectionState::SaslInProgress;
                return Ok(Action::WriteAndReadMessage);
            }
            other => {
                return Err(Error::auth(format!(
                    "unsupported authentication method: {}",
                    method_name(&other)
                )));
            }
        };
        buffer_set.write_buffer.clear();
        write_password(&mut buffer_set.write_buffer, &response);
        self.state = ConnectionState::WaitingAuthResult;
        Ok(Action::WriteAndReadMessage)
    }

    fn handle_sasl(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let scram = self
            .scram
            .as_mut()
            .ok_or_else(|| Error::ProtocolSync("SASL message without SASL exchange".into()))?;
        match AuthenticationMessage::parse(&buffer_set.read_buffer)? {
            AuthenticationMessage::SaslContinue { data } => {
                let server_first = simdutf8::compat::from_utf8(data)
                    .map_err(|e| Error::auth(format!("invalid server-first-message: {e}")))?;
                let client_final = scram.process_server_first(server_first)?;
                buffer_set.write_buffer.clear();
                write_sasl_response(&mut buffer_set.write_buffer, client_final.as_bytes());
                Ok(Action::WriteAndReadMessage)
            }
            AuthenticationMessage::SaslFinal { data } => {
                let server_final = simdutf8::compat::from_utf8(data)
                    .map_err(|e| Error::auth(format!("invalid server-final-message: {e}")))?;
                scram.verify_server_final(server_final)?;
                self.state = ConnectionState::WaitingAuthResult;
                Ok(Action::ReadMessage)
            }
            other => Err(Error::auth(format!(
                "unexpected message during SASL exchange: {}",
                method_name(&other)
            ))),
        }
    }

    fn handle_auth_result(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        match AuthenticationMessage::parse(&buffer_set.read_buffer)? {
            AuthenticationMessage::Ok => {
                self.authenticated = true;
                self.state = ConnectionState::WaitingReady;
                Ok(Action::ReadMessage)
            }
            other => Err(Error::auth(format!(
                "unexpected authentication result: {}",
                method_name(&other)
            ))),
        }
    }

    fn handle_ready(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        let payload = buffer_set.read_buffer.as_slice();
        match buffer_set.type_byte {
            msg_type::BACKEND_KEY_DATA => {
                let key = *BackendKeyData::parse(payload)?;
                tracing::debug!(pid = key.process_id(), "backend key received");
                self.session.set_backend_key(key);
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => {
                let status = ReadyForQuery::parse(payload)?
                    .transaction_status()
                    .ok_or_else(|| Error::ProtocolSync("invalid transaction status".into()))?;
                self.session.on_ready(status);
                self.ready = Some(status);
                self.state = ConnectionState::Ready;
                Ok(Action::Finished)
            }
            other => Err(Error::ProtocolSync(format!(
                "unexpected message '{}' during startup",
                other as char
            ))),
        }
    }

    fn handle_message(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let type_byte = buffer_set.type_byte;

        // ParameterStatus and notices during startup go straight into the
        // session being built.
        if let Some(message) = parse_async_message(type_byte, &buffer_set.read_buffer)? {
            self.session.handle_async(message);
            return Ok(Action::ReadMessage);
        }

        if type_byte == msg_type::ERROR_RESPONSE {
            let fields = parse_fields(&buffer_set.read_buffer)?;
            return Err(if self.authenticated {
                Error::Server(fields)
            } else {
                Error::AuthenticationFailed {
                    message: fields.message().to_string(),
                    server: Some(fields),
                }
            });
        }

        if type_byte == msg_type::NEGOTIATE_PROTOCOL_VERSION {
            let negotiate = NegotiateProtocolVersion::parse(&buffer_set.read_buffer)?;
            tracing::debug!(
                minor = negotiate.newest_minor_version,
                unrecognized = ?negotiate.unrecognized_options,
                "server negotiated protocol version"
            );
            return Ok(Action::ReadMessage);
        }

        match self.state {
            ConnectionState::WaitingAuth
            | ConnectionState::SaslInProgress
            | ConnectionState::WaitingAuthResult
                if type_byte != msg_type::AUTHENTICATION =>
            {
                Err(Error::ProtocolSync(format!(
                    "expected Authentication, got message '{}'",
                    type_byte as char
                )))
            }
            ConnectionState::WaitingAuth => self.handle_auth_request(buffer_set),
            ConnectionState::SaslInProgress => self.handle_sasl(buffer_set),
            ConnectionState::WaitingAuthResult => self.handle_auth_result(buffer_set),
            ConnectionState::WaitingReady => self.handle_ready(buffer_set),
            state => Err(Error::ProtocolSync(format!(
                "unexpected message '{}' in state {state:?}",
                type_byte as char
            ))),
        }
    }
}

impl StateMachine for ConnectionStateMachine {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.state {
            ConnectionState::Initial => {
                if self.opts.ssl_mode == SslMode::Disable {
                    return Ok(self.write_startup_message(buffer_set));
                }
                buffer_set.write_buffer.clear();
                write_ssl_request(&mut buffer_set.write_buffer);
                self.state = ConnectionState::WaitingSslResponse;
                Ok(Action::WriteAndReadByte)
            }
            ConnectionState::WaitingSslResponse => self.handle_ssl_response(buffer_set),
            ConnectionState::SslHandshake => Ok(self.write_startup_message(buffer_set)),
            ConnectionState::Ready | ConnectionState::Failed => Err(Error::ProtocolSync(
                format!("startup already ended in state {:?}", self.state),
            )),
            _ => self.handle_message(buffer_set).map_err(|e| self.fail(e)),
        }
    }

    fn ready_status(&self) -> Option<TransactionStatus> {
        self.ready
    }
}

fn method_name(auth: &AuthenticationMessage<'_>) -> String {
    match auth {
        AuthenticationMessage::Ok => "AuthenticationOk".into(),
        AuthenticationMessage::KerberosV5 => "KerberosV5".into(),
        AuthenticationMessage::CleartextPassword => "cleartext password".into(),
        AuthenticationMessage::CryptPassword { .. } => "crypt".into(),
        AuthenticationMessage::Md5Password { .. } => "MD5".into(),
        AuthenticationMessage::ScmCredential => "SCM credential".into(),
        AuthenticationMessage::Gss | AuthenticationMessage::GssContinue { .. } => "GSSAPI".into(),
        AuthenticationMessage::Sspi => "SSPI".into(),
        AuthenticationMessage::Sasl { .. }
        | AuthenticationMessage::SaslContinue { .. }
        | AuthenticationMessage::SaslFinal { .. } => "SASL".into(),
        AuthenticationMessage::Unknown(code) => format!("unknown method {code}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::backend::auth::auth_type;
    use crate::protocol::codec::FrameDecoder;
    use crate::protocol::frontend::startup::parse_startup;

    fn opts(ssl_mode: SslMode, password: Option<&str>) -> Opts {
        Opts {
            user: "scott".into(),
            password: password.map(String::from),
            ssl_mode,
            ..Opts::default()
        }
    }

    fn auth_payload(code: i32, extra: &[u8]) -> Vec<u8> {
        let mut out = code.to_be_bytes().to_vec();
        out.extend_from_slice(extra);
        out
    }

    fn feed(machine: &mut ConnectionStateMachine, set: &mut BufferSet, tag: u8, payload: &[u8]) -> Result<Action> {
        set.set_message(tag, payload);
        machine.step(set)
    }

    fn finish_startup(machine: &mut ConnectionStateMachine, set: &mut BufferSet) {
        feed(machine, set, b'S', b"integer_datetimes\0on\0").unwrap();
        feed(machine, set, b'K', &[0, 0, 0, 42, 0, 0, 0, 7]).unwrap();
        assert!(matches!(feed(machine, set, b'Z', b"I").unwrap(), Action::Finished));
    }

    #[test]
    fn test_trust_and_session() {
        let mut set = BufferSet::new();
        let mut machine = ConnectionStateMachine::new(opts(SslMode::Disable, None));
        assert!(matches!(machine.step(&mut set).unwrap(), Action::WriteAndReadMessage));

        let mut decoder = FrameDecoder::new_startup();
        decoder.extend(&set.write_buffer);
        let (_, payload) = decoder.next_frame().unwrap().unwrap();
        let (_, params) = parse_startup(&payload).unwrap();
        assert!(params.contains(&("user".into(), "scott".into())));
        assert!(params.contains(&("DateStyle".into(), "ISO, MDY".into())));

        feed(&mut machine, &mut set, b'R', &auth_payload(auth_type::OK, &[])).unwrap();
        finish_startup(&mut machine, &mut set);
        assert_eq!(machine.state(), ConnectionState::Ready);
        let session = machine.into_session();
        assert_eq!(session.process_id(), 42);
        assert!(session.integer_datetimes());
    }

    #[test]
    fn test_md5_response() {
        let mut set = BufferSet::new();
        let mut machine = ConnectionStateMachine::new(opts(SslMode::Disable, Some("tiger")));
        machine.step(&mut set).unwrap();
        let salt = [1, 2, 3, 4];
        feed(&mut machine, &mut set, b'R', &auth_payload(auth_type::MD5_PASSWORD, &salt)).unwrap();
        let expected = md5_password("scott", "tiger", &salt);
        assert_eq!(set.write_buffer.first(), Some(&b'p'));
        assert_eq!(&set.write_buffer[5..set.write_buffer.len() - 1], expected.as_bytes());
        feed(&mut machine, &mut set, b'R', &auth_payload(auth_type::OK, &[])).unwrap();
        finish_startup(&mut machine, &mut set);
    }

    #[test]
    fn test_error_before_ok_is_auth_failure() {
        let mut set = BufferSet::new();
        let mut machine = ConnectionStateMachine::new(opts(SslMode::Disable, Some("bad")));
        machine.step(&mut set).unwrap();
        feed(&mut machine, &mut set, b'R', &auth_payload(auth_type::CLEARTEXT_PASSWORD, &[])).unwrap();
        let err = feed(
            &mut machine,
            &mut set,
            b'E',
            b"SFATAL\0C28P01\0Mpassword authentication failed\0\0",
        )
        .unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailed { server: Some(_), .. }));
        assert_eq!(err.sqlstate(), Some("28P01"));
        assert_eq!(machine.state(), ConnectionState::Failed);
    }

    #[test]
    fn test_missing_password_and_unsupported() {
        let mut set = BufferSet::new();
        let mut machine = ConnectionStateMachine::new(opts(SslMode::Disable, None));
        machine.step(&mut set).unwrap();
        let err = feed(&mut machine, &mut set, b'R', &auth_payload(auth_type::CLEARTEXT_PASSWORD, &[]))
            .unwrap_err();
        assert!(err.to_string().contains("password required"));

        let mut machine = ConnectionStateMachine::new(opts(SslMode::Disable, Some("x")));
        machine.step(&mut set).unwrap();
        let err = feed(&mut machine, &mut set, b'R', &auth_payload(auth_type::KERBEROS_V5, &[]))
            .unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailed { server: None, .. }));
        assert!(err.to_string().contains("KerberosV5"));
    }

    #[test]
    fn test_ssl_negotiation() {
        let mut set = BufferSet::new();
        let mut machine = ConnectionStateMachine::new(opts(SslMode::Prefer, None));
        assert!(matches!(machine.step(&mut set).unwrap(), Action::WriteAndReadByte));
        assert_eq!(set.write_buffer.len(), 8);
        machine.set_ssl_response(b'N');
        assert!(matches!(machine.step(&mut set).unwrap(), Action::WriteAndReadMessage));
        assert_eq!(machine.state(), ConnectionState::WaitingAuth);

        let mut machine = ConnectionStateMachine::new(opts(SslMode::Require, None));
        machine.step(&mut set).unwrap();
        machine.set_ssl_response(b'N');
        assert!(matches!(machine.step(&mut set), Err(Error::AuthenticationFailed { .. })));

        let mut machine = ConnectionStateMachine::new(opts(SslMode::Require, None));
        machine.step(&mut set).unwrap();
        machine.set_ssl_response(b'S');
        assert!(matches!(machine.step(&mut set).unwrap(), Action::TlsHandshake));
        assert!(matches!(machine.step(&mut set).unwrap(), Action::WriteAndReadMessage));

        let mut machine = ConnectionStateMachine::new(opts(SslMode::Prefer, None));
        machine.step(&mut set).unwrap();
        machine.set_ssl_response(b'X');
        assert!(matches!(machine.step(&mut set), Err(Error::ProtocolSync(_))));
    }

    #[test]
    fn test_unexpected_tag_during_auth() {
        let mut set = BufferSet::new();
        let mut machine = ConnectionStateMachine::new(opts(SslMode::Disable, None));
        machine.step(&mut set).unwrap();
        assert!(matches!(
            feed(&mut machine, &mut set, b'D', b"\0\0"),
            Err(Error::ProtocolSync(_))
        ));
    }
}
