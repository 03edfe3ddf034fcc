//! Connection startup and authentication state machine.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::opts::{Opts, SslMode};
use crate::protocol::backend::auth::auth_type;
use crate::protocol::backend::{AuthenticationMessage, BackendKeyData, BackendMessage};
use crate::protocol::codec::decode_utf8;
use crate::protocol::frontend::auth::{SCRAM_SHA_256, ScramClient, md5_password};
use crate::protocol::frontend::{
    write_password, write_sasl_initial_response, write_sasl_response, write_ssl_request,
    write_startup,
};
use crate::protocol::types::TransactionStatus;

use super::StateMachine;
use super::action::{Action, AsyncMessage, unexpected};

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Startup,
    Authenticating,
    Ready,
    QueryInFlight,
    CopyIn,
    CopyOut,
    /// The transport or protocol failed; the connection cannot be used again
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Initial,
    WaitingSslResponse,
    TlsHandshake,
    WaitingAuth,
    SaslInProgress,
    WaitingReady,
    Finished,
}

/// Connection startup state machine.
///
/// Drives SSL negotiation, the StartupMessage and the authentication
/// exchange up to the first ReadyForQuery.
pub struct StartupStateMachine {
    phase: Phase,
    user: String,
    password: Option<String>,
    startup_params: Vec<(String, String)>,
    ssl_mode: SslMode,
    request_ssl: bool,
    scram: Option<ScramClient>,
    backend_key: Option<BackendKeyData>,
    transaction_status: Option<TransactionStatus>,
}

impl StartupStateMachine {
    /// Create a startup machine. Unix-domain connections never request TLS.
    pub fn new(opts: &Opts, is_unix: bool) -> Result<Self> {
        let request_ssl = match opts.ssl_mode {
            SslMode::Disable => false,
            _ if is_unix => false,
            SslMode::Prefer => cfg!(feature = "sync-tls"),
            SslMode::Require => {
                if !cfg!(feature = "sync-tls") {
                    return Err(Error::Unsupported(
                        "sslmode=require needs the sync-tls feature".into(),
                    ));
                }
                true
            }
        };

        let mut startup_params = vec![
            ("user".to_string(), opts.user.clone()),
            ("client_encoding".to_string(), "UTF8".to_string()),
        ];
        if let Some(db) = &opts.database {
            startup_params.push(("database".to_string(), db.clone()));
        }
        if let Some(app) = &opts.application_name {
            startup_params.push(("application_name".to_string(), app.clone()));
        }
        startup_params.extend(opts.params.iter().cloned());

        Ok(Self {
            phase: Phase::Initial,
            user: opts.user.clone(),
            password: opts.password.clone(),
            startup_params,
            ssl_mode: opts.ssl_mode,
            request_ssl,
            scram: None,
            backend_key: None,
            transaction_status: None,
        })
    }

    /// The connection phase this machine is in, for [`ConnectionState`] tracking.
    pub fn connection_state(&self) -> ConnectionState {
        match self.phase {
            Phase::Initial => ConnectionState::Unconnected,
            Phase::WaitingSslResponse | Phase::TlsHandshake => ConnectionState::Startup,
            Phase::WaitingAuth | Phase::SaslInProgress | Phase::WaitingReady => {
                ConnectionState::Authenticating
            }
            Phase::Finished => ConnectionState::Ready,
        }
    }

    /// Backend key data (for cancellation), once received.
    pub fn backend_key(&self) -> Option<BackendKeyData> {
        self.backend_key
    }

    fn write_startup_message(&self, buf: &mut Vec<u8>) {
        let params: Vec<(&str, &str)> = self
            .startup_params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        write_startup(buf, &params);
    }

    fn password(&self) -> Result<&str> {
        self.password
            .as_deref()
            .ok_or_else(|| Error::Auth("password required but not provided".into()))
    }

    fn handle_ssl_response(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match buffer_set.type_byte {
            b'S' => {
                tracing::debug!("server accepted SSLRequest");
                self.phase = Phase::TlsHandshake;
                Ok(Action::TlsHandshake)
            }
            b'N' => {
                if self.ssl_mode == SslMode::Require {
                    return Err(Error::Auth("SSL required but not supported by server".into()));
                }
                tracing::debug!("server refused SSLRequest, continuing without TLS");
                self.write_startup_message(&mut buffer_set.write_buffer);
                self.phase = Phase::WaitingAuth;
                Ok(Action::WriteAndReadMessage)
            }
            other => Err(Error::Protocol(format!(
                "unexpected SSL response byte {other:#04x}"
            ))),
        }
    }

    fn handle_auth(
        &mut self,
        auth: AuthenticationMessage<'_>,
        write_buffer: &mut Vec<u8>,
    ) -> Result<Action> {
        match (self.phase, auth) {
            (Phase::WaitingAuth, AuthenticationMessage::Ok) => {
                tracing::debug!("authentication succeeded");
                self.phase = Phase::WaitingReady;
                Ok(Action::ReadMessage)
            }
            (Phase::WaitingAuth, AuthenticationMessage::CleartextPassword) => {
                tracing::debug!("server requested cleartext password");
                write_password(write_buffer, self.password()?);
                Ok(Action::WriteAndReadMessage)
            }
            (Phase::WaitingAuth, AuthenticationMessage::Md5Password { salt }) => {
                tracing::debug!("server requested MD5 password");
                let hashed = md5_password(&self.user, self.password()?, &salt);
                write_password(write_buffer, &hashed);
                Ok(Action::WriteAndReadMessage)
            }
            (Phase::WaitingAuth, AuthenticationMessage::Sasl { mechanisms }) => {
                if !mechanisms.contains(&SCRAM_SHA_256) {
                    return Err(Error::Auth(format!(
                        "no supported SASL mechanism, server offers {}",
                        mechanisms.join(", ")
                    )));
                }
                tracing::debug!("starting SCRAM-SHA-256 exchange");
                let scram = ScramClient::new(&self.user, self.password()?);
                write_sasl_initial_response(
                    write_buffer,
                    SCRAM_SHA_256,
                    scram.client_first_message().as_bytes(),
                );
                self.scram = Some(scram);
                self.phase = Phase::SaslInProgress;
                Ok(Action::WriteAndReadMessage)
            }
            (Phase::SaslInProgress, AuthenticationMessage::SaslContinue { data }) => {
                let scram = self
                    .scram
                    .as_mut()
                    .ok_or_else(|| Error::Protocol("SASLContinue without SASL start".into()))?;
                let client_final = scram.process_server_first(decode_utf8(data)?)?;
                write_sasl_response(write_buffer, client_final.as_bytes());
                Ok(Action::WriteAndReadMessage)
            }
            (Phase::SaslInProgress, AuthenticationMessage::SaslFinal { data }) => {
                let scram = self
                    .scram
                    .take()
                    .ok_or_else(|| Error::Protocol("SASLFinal without SASL start".into()))?;
                scram.verify_server_final(decode_utf8(data)?)?;
                self.phase = Phase::WaitingAuth;
                Ok(Action::ReadMessage)
            }
            (_, AuthenticationMessage::Unsupported { code }) => Err(Error::Auth(format!(
                "unsupported authentication method {} (code {code})",
                auth_type::name(code)
            ))),
            (phase, auth) => Err(Error::Protocol(format!(
                "unexpected authentication message {auth:?} in phase {phase:?}"
            ))),
        }
    }
}

impl StateMachine for StartupStateMachine {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.phase {
            Phase::Initial => {
                if self.request_ssl {
                    write_ssl_request(&mut buffer_set.write_buffer);
                    self.phase = Phase::WaitingSslResponse;
                    return Ok(Action::WriteAndReadByte);
                }
                self.write_startup_message(&mut buffer_set.write_buffer);
                self.phase = Phase::WaitingAuth;
                return Ok(Action::WriteAndReadMessage);
            }
            Phase::WaitingSslResponse => return self.handle_ssl_response(buffer_set),
            Phase::TlsHandshake => {
                self.write_startup_message(&mut buffer_set.write_buffer);
                self.phase = Phase::WaitingAuth;
                return Ok(Action::WriteAndReadMessage);
            }
            Phase::Finished => {
                return Err(Error::Protocol("startup already finished".into()));
            }
            Phase::WaitingAuth | Phase::SaslInProgress | Phase::WaitingReady => {}
        }

        let msg = BackendMessage::parse(buffer_set.type_byte, &buffer_set.read_buffer)?;
        if let Some(async_msg) = AsyncMessage::from_backend(&msg) {
            return Ok(Action::HandleAsyncMessageAndReadMessage(async_msg));
        }

        match msg {
            BackendMessage::ErrorResponse(err) => Err(Error::Server(err)),
            BackendMessage::NegotiateProtocolVersion(negotiate) => {
                tracing::debug!(
                    newest_minor_version = negotiate.newest_minor_version,
                    unrecognized = ?negotiate.unrecognized_options,
                    "server negotiated protocol version"
                );
                Ok(Action::ReadMessage)
            }
            BackendMessage::Authentication(auth) => {
                if self.phase == Phase::WaitingReady {
                    return Err(Error::Protocol(
                        "authentication request after AuthenticationOk".into(),
                    ));
                }
                self.handle_auth(auth, &mut buffer_set.write_buffer)
            }
            BackendMessage::BackendKeyData(key) if self.phase == Phase::WaitingReady => {
                self.backend_key = Some(key);
                Ok(Action::ReadMessage)
            }
            BackendMessage::ReadyForQuery(status) if self.phase == Phase::WaitingReady => {
                self.transaction_status = Some(status);
                self.phase = Phase::Finished;
                Ok(Action::Finished)
            }
            other => Err(unexpected(&other, "during startup")),
        }
    }

    fn transaction_status(&self) -> Option<TransactionStatus> {
        self.transaction_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(password: Option<&str>) -> Opts {
        Opts {
            user: "alice".into(),
            password: password.map(str::to_string),
            database: Some("db".into()),
            ssl_mode: SslMode::Disable,
            ..Default::default()
        }
    }

    fn feed(buffer_set: &mut BufferSet, tag: u8, payload: &[u8]) {
        buffer_set.type_byte = tag;
        buffer_set.read_buffer.clear();
        buffer_set.read_buffer.extend_from_slice(payload);
        buffer_set.write_buffer.clear();
    }

    fn auth_payload(code: i32, rest: &[u8]) -> Vec<u8> {
        let mut payload = code.to_be_bytes().to_vec();
        payload.extend_from_slice(rest);
        payload
    }

    #[test]
    fn cleartext_flow() {
        let mut sm = StartupStateMachine::new(&opts(Some("pw")), false).unwrap();
        let mut bs = BufferSet::new();
        assert_eq!(sm.connection_state(), ConnectionState::Unconnected);

        assert!(matches!(sm.step(&mut bs).unwrap(), Action::WriteAndReadMessage));
        assert!(bs.write_buffer.windows(6).any(|w| w == b"alice\0"));
        assert_eq!(sm.connection_state(), ConnectionState::Authenticating);

        feed(&mut bs, b'R', &auth_payload(3, &[]));
        assert!(matches!(sm.step(&mut bs).unwrap(), Action::WriteAndReadMessage));
        assert_eq!(&bs.write_buffer[5..], b"pw\0");

        feed(&mut bs, b'R', &auth_payload(0, &[]));
        assert!(matches!(sm.step(&mut bs).unwrap(), Action::ReadMessage));

        feed(&mut bs, b'S', b"server_version\x0016.2\0");
        assert!(matches!(
            sm.step(&mut bs).unwrap(),
            Action::HandleAsyncMessageAndReadMessage(AsyncMessage::ParameterChanged { .. })
        ));

        let mut key = 42_u32.to_be_bytes().to_vec();
        key.extend_from_slice(&7_u32.to_be_bytes());
        feed(&mut bs, b'K', &key);
        assert!(matches!(sm.step(&mut bs).unwrap(), Action::ReadMessage));

        feed(&mut bs, b'Z', b"I");
        assert!(matches!(sm.step(&mut bs).unwrap(), Action::Finished));
        assert_eq!(sm.backend_key().map(|k| k.process_id()), Some(42));
        assert_eq!(sm.transaction_status(), Some(TransactionStatus::Idle));
        assert_eq!(sm.connection_state(), ConnectionState::Ready);
    }

    #[test]
    fn missing_password_is_an_auth_error() {
        let mut sm = StartupStateMachine::new(&opts(None), false).unwrap();
        let mut bs = BufferSet::new();
        sm.step(&mut bs).unwrap();

        feed(&mut bs, b'R', &auth_payload(5, &[1, 2, 3, 4]));
        assert!(matches!(sm.step(&mut bs), Err(Error::Auth(_))));
    }

    #[test]
    fn unsupported_method_names_the_code() {
        let mut sm = StartupStateMachine::new(&opts(Some("pw")), false).unwrap();
        let mut bs = BufferSet::new();
        sm.step(&mut bs).unwrap();

        feed(&mut bs, b'R', &auth_payload(7, &[]));
        match sm.step(&mut bs) {
            Err(Error::Auth(msg)) => assert!(msg.contains("GSSAPI") && msg.contains('7')),
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[test]
    fn startup_error_response_is_fatal() {
        let mut sm = StartupStateMachine::new(&opts(Some("pw")), false).unwrap();
        let mut bs = BufferSet::new();
        sm.step(&mut bs).unwrap();

        feed(
            &mut bs,
            b'E',
            b"SFATAL\0C28P01\0Mpassword authentication failed\0\0",
        );

        let err = sm.step(&mut bs).unwrap_err();
        assert_eq!(err.sqlstate(), Some("28P01"));
    }

    #[test]
    fn unix_sockets_skip_ssl() {
        let mut o = opts(Some("pw"));
        o.ssl_mode = SslMode::Prefer;
        let mut sm = StartupStateMachine::new(&o, true).unwrap();
        let mut bs = BufferSet::new();
        assert!(matches!(sm.step(&mut bs).unwrap(), Action::WriteAndReadMessage));
    }
}
