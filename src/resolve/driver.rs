//! Driver boundary

use crate::connection::{Connection, ConnectionConfig, QueryResult};
use crate::descriptor::ConnectionDescriptor;
use crate::Result;
use async_trait::async_trait;

/// An open, authenticated database connection
#[async_trait]
pub trait DriverConnection: Send {
    /// Run one statement in autocommit mode
    async fn execute(&mut self, statement: &str) -> Result<QueryResult>;

    /// Close the connection
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Capability to open connections for descriptors
#[async_trait]
pub trait Driver: Send + Sync {
    /// Connect and authenticate.
    ///
    /// Errors classify through [`crate::Error::failure_kind`]. The resolver bounds
    /// the call with its connect timeout.
    async fn open(&self, descriptor: &ConnectionDescriptor) -> Result<Box<dyn DriverConnection>>;
}

/// [`Driver`] speaking the PostgreSQL wire protocol natively
#[derive(Debug, Clone, Default)]
pub struct WireDriver {
    application_name: Option<String>,
}

impl WireDriver {
    /// Driver with default startup parameters
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `name` as `application_name`
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }
}

#[async_trait]
impl Driver for WireDriver {
    async fn open(&self, descriptor: &ConnectionDescriptor) -> Result<Box<dyn DriverConnection>> {
        let mut builder = ConnectionConfig::from_descriptor(descriptor);
        if let Some(ref name) = self.application_name {
            builder = builder.application_name(name);
        }
        let conn = Connection::open(descriptor, &builder.build()).await?;
        Ok(Box::new(conn))
    }
}

#[async_trait]
impl DriverConnection for Connection {
    async fn execute(&mut self, statement: &str) -> Result<QueryResult> {
        self.simple_query(statement).await
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Connection::close(*self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FailureKind;

    #[tokio::test]
    async fn test_wire_driver_missing_socket_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let desc = ConnectionDescriptor::new("postgres", "template1")
            .host(dir.path().to_string_lossy())
            .port(5432);
        let err = match WireDriver::new().open(&desc).await {
            Ok(_) => panic!("expected connection failure"),
            Err(e) => e,
        };
        assert_eq!(err.failure_kind(), FailureKind::Unreachable);
    }
}
