//! Connection configuration and the factory the pool opens attachments
//! through.

use std::time::Duration;

use super::attachment::Attachment;
use super::charset::Charset;
use super::parameter::*;
use super::services::DUMMY_PACKET_INTERVAL;
use super::transaction::{IsolationLevel, TransactionOptions};
use crate::error::{FbError, Result};

pub const DEFAULT_PACKET_SIZE: usize = 8192;
pub const DEFAULT_MAX_POOL_SIZE: usize = 100;
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(15);

/// Everything needed to open an attachment, plus the pool settings that
/// apply to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub data_source: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub role: Option<String>,
    pub charset: Charset,
    pub dialect: u16,
    pub packet_size: usize,
    pub pooling: bool,
    pub min_pool_size: usize,
    pub max_pool_size: usize,
    /// Maximum age of an idle pooled connection; zero keeps them forever.
    pub connection_lifetime: Duration,
    /// How long a checkout waits for a free connection.
    pub connection_timeout: Duration,
    pub isolation: IsolationLevel,
}

impl ConnectionOptions {
    pub fn new(database: &str) -> Self {
        Self {
            data_source: "localhost".to_string(),
            port: 3050,
            database: database.to_string(),
            user: "SYSDBA".to_string(),
            password: "masterkey".to_string(),
            role: None,
            charset: Charset::Utf8,
            dialect: 3,
            packet_size: DEFAULT_PACKET_SIZE,
            pooling: true,
            min_pool_size: 0,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            connection_lifetime: Duration::ZERO,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            isolation: IsolationLevel::ReadCommitted,
        }
    }

    pub fn data_source(mut self, host: &str, port: u16) -> Self {
        self.data_source = host.to_string();
        self.port = port;
        self
    }

    pub fn user(mut self, user: &str, password: &str) -> Self {
        self.user = user.to_string();
        self.password = password.to_string();
        self
    }

    pub fn role(mut self, role: &str) -> Self {
        self.role = Some(role.to_string());
        self
    }

    pub fn charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    pub fn dialect(mut self, dialect: u16) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn packet_size(mut self, size: usize) -> Self {
        self.packet_size = size;
        self
    }

    pub fn pooling(mut self, enabled: bool) -> Self {
        self.pooling = enabled;
        self
    }

    pub fn pool_size(mut self, min: usize, max: usize) -> Self {
        self.min_pool_size = min;
        self.max_pool_size = max;
        self
    }

    pub fn connection_lifetime(mut self, lifetime: Duration) -> Self {
        self.connection_lifetime = lifetime;
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.is_empty() {
            return Err(FbError::ConfigError("database must be specified".to_string()));
        }
        if !matches!(self.dialect, 1 | 3) {
            return Err(FbError::ConfigError(format!(
                "unsupported SQL dialect {}",
                self.dialect
            )));
        }
        if self.max_pool_size == 0 || self.min_pool_size > self.max_pool_size {
            return Err(FbError::ConfigError(format!(
                "invalid pool size range {}..={}",
                self.min_pool_size, self.max_pool_size
            )));
        }
        if !(512..=32767).contains(&self.packet_size) {
            return Err(FbError::ConfigError(format!(
                "packet size {} outside 512..=32767",
                self.packet_size
            )));
        }
        Ok(())
    }

    /// Canonical configuration string; connections are pooled per key.
    pub fn key(&self) -> String {
        format!(
            "data_source={};port={};database={};user={};password={};role={};charset={};dialect={};\
             packet_size={};pooling={};min_pool_size={};max_pool_size={};lifetime_ms={};timeout_ms={};isolation={:?}",
            self.data_source,
            self.port,
            self.database,
            self.user,
            self.password,
            self.role.as_deref().unwrap_or(""),
            self.charset.name(),
            self.dialect,
            self.packet_size,
            self.pooling,
            self.min_pool_size,
            self.max_pool_size,
            self.connection_lifetime.as_millis(),
            self.connection_timeout.as_millis(),
            self.isolation,
        )
    }

    /// Database-attach parameter buffer.
    pub fn to_dpb(&self) -> Result<ParameterBuffer> {
        let mut dpb = ParameterBuffer::database(self.charset);
        dpb.append_bytes(ISC_DPB_DUMMY_PACKET_INTERVAL, &DUMMY_PACKET_INTERVAL)?;
        dpb.append_int(ISC_DPB_SQL_DIALECT, self.dialect as i32);
        dpb.append_string(ISC_DPB_LC_CTYPE, self.charset.name())?;
        dpb.append_string(ISC_DPB_USER_NAME, &self.user)?;
        dpb.append_string(ISC_DPB_PASSWORD, &self.password)?;
        if let Some(role) = self.role.as_deref().filter(|r| !r.is_empty()) {
            dpb.append_string(ISC_DPB_SQL_ROLE_NAME, role)?;
        }
        Ok(dpb)
    }

    /// Options for transactions started without explicit settings.
    pub fn transaction_options(&self) -> TransactionOptions {
        TransactionOptions::new(self.isolation)
    }
}

/// Opens attachments. The transport behind it is not this crate's concern.
pub trait ConnectionFactory: Send + Sync {
    fn connect(&self, options: &ConnectionOptions) -> Result<Box<dyn Attachment>>;
}
