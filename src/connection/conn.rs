//! Core connection type

use super::result::QueryResult;
use super::state::ConnectionState;
use super::transport::Transport;
use crate::auth::{md5_password, ScramClient};
use crate::descriptor::ConnectionDescriptor;
use crate::protocol::{
    decode_message, encode_message, AuthenticationMessage, BackendMessage, FrontendMessage,
};
use crate::{Error, Result};
use bytes::{Buf, BytesMut};
use std::collections::HashMap;
use std::io;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Default application name reported to the server
pub const APPLICATION_NAME: &str = "pgsu";

/// Connection configuration
///
/// Stores connection parameters including database, credentials, and optional timeouts.
/// Use `ConnectionConfig::builder()` for advanced configuration.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Database name
    pub database: String,
    /// Username
    pub user: String,
    /// Password (optional)
    pub password: Option<String>,
    /// Additional startup parameters
    pub params: HashMap<String, String>,
    /// Bound on transport connect plus startup (default: none)
    pub connect_timeout: Option<Duration>,
    /// Server-side statement timeout
    pub statement_timeout: Option<Duration>,
    /// Application name for Postgres logs
    pub application_name: Option<String>,
}

impl ConnectionConfig {
    /// Create new configuration with defaults
    pub fn new(database: impl Into<String>, user: impl Into<String>) -> Self {
        Self::builder(database, user).build()
    }

    /// Create a builder for advanced configuration
    ///
    /// # Examples
    ///
    /// ```
    /// use pgsu::connection::ConnectionConfig;
    /// use std::time::Duration;
    ///
    /// let config = ConnectionConfig::builder("template1", "postgres")
    ///     .connect_timeout(Duration::from_secs(5))
    ///     .application_name("provisioning")
    ///     .build();
    /// assert_eq!(config.connect_timeout, Some(Duration::from_secs(5)));
    /// ```
    pub fn builder(
        database: impl Into<String>,
        user: impl Into<String>,
    ) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder {
            database: database.into(),
            user: user.into(),
            password: None,
            params: HashMap::new(),
            connect_timeout: None,
            statement_timeout: None,
            application_name: Some(APPLICATION_NAME.to_string()),
        }
    }

    /// Configuration for a resolved descriptor
    pub fn from_descriptor(descriptor: &ConnectionDescriptor) -> ConnectionConfigBuilder {
        let builder = Self::builder(&descriptor.database, &descriptor.user);
        match descriptor.password {
            Some(ref password) => builder.password(password),
            None => builder,
        }
    }

    /// Set password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Add startup parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    fn startup_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("user".to_string(), self.user.clone()),
            ("database".to_string(), self.database.clone()),
        ];
        if let Some(ref app_name) = self.application_name {
            params.push(("application_name".to_string(), app_name.clone()));
        }
        if let Some(timeout) = self.statement_timeout {
            params.push((
                "statement_timeout".to_string(),
                timeout.as_millis().to_string(),
            ));
        }
        let mut extra: Vec<_> = self.params.iter().collect();
        extra.sort();
        params.extend(extra.into_iter().map(|(k, v)| (k.clone(), v.clone())));
        params
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .field("params", &self.params)
            .field("connect_timeout", &self.connect_timeout)
            .field("statement_timeout", &self.statement_timeout)
            .field("application_name", &self.application_name)
            .finish()
    }
}

/// Builder for creating `ConnectionConfig`
#[derive(Clone)]
pub struct ConnectionConfigBuilder {
    database: String,
    user: String,
    password: Option<String>,
    params: HashMap<String, String>,
    connect_timeout: Option<Duration>,
    statement_timeout: Option<Duration>,
    application_name: Option<String>,
}

impl ConnectionConfigBuilder {
    /// Set the password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Add a startup parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Bound transport connect plus startup
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.connect_timeout = Some(duration);
        self
    }

    /// Set statement (query) timeout
    pub fn statement_timeout(mut self, duration: Duration) -> Self {
        self.statement_timeout = Some(duration);
        self
    }

    /// Set application name for Postgres logs
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> ConnectionConfig {
        ConnectionConfig {
            database: self.database,
            user: self.user,
            password: self.password,
            params: self.params,
            connect_timeout: self.connect_timeout,
            statement_timeout: self.statement_timeout,
            application_name: self.application_name,
        }
    }
}

/// Postgres connection
pub struct Connection {
    transport: Transport,
    state: ConnectionState,
    read_buf: BytesMut,
    process_id: Option<i32>,
    server_params: HashMap<String, String>,
}

impl Connection {
    /// Create connection from transport
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            state: ConnectionState::Initial,
            read_buf: BytesMut::with_capacity(8192),
            process_id: None,
            server_params: HashMap::new(),
        }
    }

    /// Connect to `descriptor` and authenticate, within `config.connect_timeout` if set
    pub async fn open(descriptor: &ConnectionDescriptor, config: &ConnectionConfig) -> Result<Self> {
        let establish = async {
            let transport = Transport::connect(&descriptor.endpoint()).await?;
            let mut conn = Connection::new(transport);
            conn.startup(config).await?;
            Ok(conn)
        };
        match config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, establish)
                .await
                .map_err(|_| Error::Timeout(limit))?,
            None => establish.await,
        }
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Backend process id reported by the server
    pub fn process_id(&self) -> Option<i32> {
        self.process_id
    }

    /// Server parameter reported during startup (e.g. `server_version`)
    pub fn server_param(&self, name: &str) -> Option<&str> {
        self.server_params.get(name).map(String::as_str)
    }

    /// Perform startup and authentication
    pub async fn startup(&mut self, config: &ConnectionConfig) -> Result<()> {
        let unix = self.transport.is_unix();
        async {
            self.state.transition(ConnectionState::AwaitingAuth)?;

            let startup = FrontendMessage::Startup {
                version: crate::protocol::constants::PROTOCOL_VERSION,
                params: config.startup_params(),
            };
            self.send_message(&startup).await?;

            self.state.transition(ConnectionState::Authenticating)?;
            self.authenticate(config).await?;

            self.state.transition(ConnectionState::Idle)?;
            tracing::debug!(
                server_version = self.server_param("server_version").unwrap_or("unknown"),
                "startup complete"
            );
            Ok(())
        }
        .instrument(tracing::debug_span!(
            "startup",
            user = %config.user,
            database = %config.database,
            unix
        ))
        .await
    }

    /// Handle authentication
    async fn authenticate(&mut self, config: &ConnectionConfig) -> Result<()> {
        let auth_start = Instant::now();
        let mut mechanism = crate::metrics::labels::MECHANISM_TRUST;

        loop {
            let msg = self.receive_message().await?;

            match msg {
                BackendMessage::Authentication(auth) => match auth {
                    AuthenticationMessage::Ok => {
                        tracing::debug!(mechanism, "authentication successful");
                        crate::metrics::counters::auth_successful(mechanism);
                        crate::metrics::histograms::auth_duration(
                            mechanism,
                            auth_start.elapsed().as_millis() as u64,
                        );
                        // Keep reading until ReadyForQuery
                    }
                    AuthenticationMessage::CleartextPassword => {
                        mechanism = crate::metrics::labels::MECHANISM_CLEARTEXT;
                        crate::metrics::counters::auth_attempted(mechanism);

                        let password = require_password(config, "cleartext")?;
                        self.send_message(&FrontendMessage::Password(password.to_string()))
                            .await?;
                    }
                    AuthenticationMessage::Md5Password { salt } => {
                        mechanism = crate::metrics::labels::MECHANISM_MD5;
                        crate::metrics::counters::auth_attempted(mechanism);

                        let password = require_password(config, "md5")?;
                        let hashed = md5_password(&config.user, password, salt);
                        self.send_message(&FrontendMessage::Password(hashed)).await?;
                    }
                    AuthenticationMessage::Sasl { mechanisms } => {
                        mechanism = crate::metrics::labels::MECHANISM_SCRAM;
                        crate::metrics::counters::auth_attempted(mechanism);
                        self.handle_sasl(&mechanisms, config).await?;
                    }
                    AuthenticationMessage::SaslContinue { .. }
                    | AuthenticationMessage::SaslFinal { .. } => {
                        return Err(Error::Protocol(
                            "unexpected SASL message outside of SASL flow".into(),
                        ));
                    }
                },
                BackendMessage::BackendKeyData { process_id, .. } => {
                    self.process_id = Some(process_id);
                }
                BackendMessage::ParameterStatus { name, value } => {
                    self.server_params.insert(name, value);
                }
                BackendMessage::NoticeResponse(notice) => {
                    tracing::debug!("notice during startup: {}", notice);
                }
                BackendMessage::ReadyForQuery { .. } => break,
                BackendMessage::ErrorResponse(err) => {
                    crate::metrics::counters::auth_failed(mechanism, "server_error");
                    return Err(Error::Authentication(err.to_string()));
                }
                _ => {
                    return Err(Error::Protocol(format!(
                        "unexpected message during auth: {:?}",
                        msg
                    )));
                }
            }
        }

        Ok(())
    }

    /// Handle SASL authentication (SCRAM-SHA-256)
    async fn handle_sasl(&mut self, mechanisms: &[String], config: &ConnectionConfig) -> Result<()> {
        if !mechanisms.iter().any(|m| m == "SCRAM-SHA-256") {
            return Err(Error::Authentication(format!(
                "server does not offer SCRAM-SHA-256. Available: {}",
                mechanisms.join(", ")
            )));
        }

        let password = require_password(config, "SCRAM-SHA-256")?;
        let scram = ScramClient::new(password);

        self.send_message(&FrontendMessage::SaslInitialResponse {
            mechanism: "SCRAM-SHA-256".to_string(),
            data: scram.client_first().into_bytes(),
        })
        .await?;

        let server_first = match self.receive_message().await? {
            BackendMessage::Authentication(AuthenticationMessage::SaslContinue { data }) => data,
            BackendMessage::ErrorResponse(err) => {
                return Err(Error::Authentication(err.to_string()));
            }
            other => {
                return Err(Error::Protocol(format!(
                    "expected SaslContinue during SASL authentication, got {:?}",
                    other
                )));
            }
        };
        let server_first = String::from_utf8(server_first).map_err(|e| {
            Error::Authentication(format!("invalid UTF-8 in server first message: {}", e))
        })?;

        let (client_final, scram_state) = scram
            .client_final(&server_first)
            .map_err(|e| Error::Authentication(format!("SCRAM error: {}", e)))?;

        self.send_message(&FrontendMessage::SaslResponse {
            data: client_final.into_bytes(),
        })
        .await?;

        let server_final = match self.receive_message().await? {
            BackendMessage::Authentication(AuthenticationMessage::SaslFinal { data }) => data,
            BackendMessage::ErrorResponse(err) => {
                return Err(Error::Authentication(err.to_string()));
            }
            other => {
                return Err(Error::Protocol(format!(
                    "expected SaslFinal during SASL authentication, got {:?}",
                    other
                )));
            }
        };
        let server_final = String::from_utf8(server_final).map_err(|e| {
            Error::Authentication(format!("invalid UTF-8 in server final message: {}", e))
        })?;

        scram
            .verify_server_final(&server_final, &scram_state)
            .map_err(|e| Error::Authentication(format!("SCRAM verification failed: {}", e)))?;

        Ok(())
    }

    /// Execute a statement with the simple-query protocol
    ///
    /// Runs in the server's autocommit mode. If the string holds several
    /// statements, the result describes the last one.
    pub async fn simple_query(&mut self, query: &str) -> Result<QueryResult> {
        if self.state != ConnectionState::Idle {
            return Err(Error::ConnectionBusy(format!(
                "connection in state: {}",
                self.state
            )));
        }

        self.send_message(&FrontendMessage::Query(query.to_string()))
            .await?;
        self.state.transition(ConnectionState::Querying)?;

        let mut result = QueryResult::default();
        let mut server_error = None;

        loop {
            match self.receive_message().await? {
                BackendMessage::RowDescription(fields) => {
                    result.columns = fields.into_iter().map(|f| f.name).collect();
                    result.rows.clear();
                }
                BackendMessage::DataRow(values) => {
                    result.rows.push(
                        values
                            .into_iter()
                            .map(|v| v.map(|b| String::from_utf8_lossy(&b).into_owned()))
                            .collect(),
                    );
                }
                BackendMessage::CommandComplete(tag) => result.command = Some(tag),
                BackendMessage::EmptyQueryResponse => {}
                BackendMessage::ErrorResponse(err) => {
                    // The server still finishes with ReadyForQuery
                    server_error = Some(err);
                }
                BackendMessage::NoticeResponse(notice) => {
                    tracing::info!("server notice: {}", notice);
                }
                BackendMessage::ParameterStatus { name, value } => {
                    self.server_params.insert(name, value);
                }
                BackendMessage::ReadyForQuery { .. } => break,
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected message in query response: {:?}",
                        other
                    )));
                }
            }
        }

        self.state.transition(ConnectionState::Idle)?;

        match server_error {
            Some(err) => Err(Error::Sql(err)),
            None => Ok(result),
        }
    }

    /// Send a frontend message
    async fn send_message(&mut self, msg: &FrontendMessage) -> Result<()> {
        let buf = encode_message(msg)?;
        self.transport.write_all(&buf).await?;
        self.transport.flush().await?;
        Ok(())
    }

    /// Receive a backend message
    async fn receive_message(&mut self) -> Result<BackendMessage> {
        loop {
            match decode_message(&mut self.read_buf) {
                Ok((msg, consumed)) => {
                    self.read_buf.advance(consumed);
                    return Ok(msg);
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {}
                // The server wants a method we cannot do (GSSAPI, SSPI)
                Err(e) if e.kind() == io::ErrorKind::Unsupported => {
                    return Err(Error::Authentication(e.to_string()))
                }
                Err(e) => return Err(Error::Protocol(e.to_string())),
            }

            let n = self.transport.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Close the connection
    pub async fn close(mut self) -> Result<()> {
        self.state.transition(ConnectionState::Closed)?;
        let _ = self.send_message(&FrontendMessage::Terminate).await;
        self.transport.shutdown().await?;
        Ok(())
    }
}

fn require_password<'a>(config: &'a ConnectionConfig, mechanism: &str) -> Result<&'a str> {
    config.password.as_deref().ok_or_else(|| {
        Error::Authentication(format!(
            "server requested {} password authentication but no password was supplied",
            mechanism
        ))
    })
}
