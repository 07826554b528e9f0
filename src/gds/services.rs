//! Services manager: administrative actions and server information.
//!
//! Every action is one service-start buffer (action code plus arguments).
//! Verbose actions are followed by polling `isc_info_svc_line` until the
//! server returns an empty line. Information requests decode a
//! `tag, length(2), body` stream; a few bodies are nested records which are
//! walked with a reader bounded to the declared length, so a malformed
//! record cannot desynchronize the outer stream.

use std::collections::BTreeMap;
use std::ops::BitOr;

use serde::Serialize;

use super::attachment::ServiceManager;
use super::charset::Charset;
use super::parameter::*;
use super::protocol::*;
use crate::error::{FbError, Result};

pub const SERVICE_MANAGER_NAME: &str = "service_mgr";
pub const DEFAULT_QUERY_BUFFER_SIZE: usize = 1024;

/// Keep-alive interval bytes sent on attach.
pub const DUMMY_PACKET_INTERVAL: [u8; 4] = [120, 10, 0, 0];

// ============================================================================
// Action and argument codes
// ============================================================================

pub const ISC_ACTION_SVC_BACKUP: u8 = 1;
pub const ISC_ACTION_SVC_RESTORE: u8 = 2;
pub const ISC_ACTION_SVC_REPAIR: u8 = 3;
pub const ISC_ACTION_SVC_ADD_USER: u8 = 4;
pub const ISC_ACTION_SVC_DELETE_USER: u8 = 5;
pub const ISC_ACTION_SVC_MODIFY_USER: u8 = 6;
pub const ISC_ACTION_SVC_DISPLAY_USER: u8 = 7;
pub const ISC_ACTION_SVC_PROPERTIES: u8 = 8;
pub const ISC_ACTION_SVC_DB_STATS: u8 = 11;
pub const ISC_ACTION_SVC_GET_LOG: u8 = 12;

pub const ISC_SPB_USER_NAME: u8 = ISC_DPB_USER_NAME;
pub const ISC_SPB_PASSWORD: u8 = ISC_DPB_PASSWORD;
pub const ISC_SPB_SQL_ROLE_NAME: u8 = ISC_DPB_SQL_ROLE_NAME;
pub const ISC_SPB_DUMMY_PACKET_INTERVAL: u8 = ISC_DPB_DUMMY_PACKET_INTERVAL;
pub const ISC_SPB_DBNAME: u8 = 106;
pub const ISC_SPB_VERBOSE: u8 = 107;
pub const ISC_SPB_OPTIONS: u8 = 108;

pub const ISC_SPB_NUM_ATT: u8 = 5;
pub const ISC_SPB_NUM_DB: u8 = 6;

pub const ISC_SPB_BKP_FILE: u8 = 5;
pub const ISC_SPB_BKP_FACTOR: u8 = 6;
pub const ISC_SPB_BKP_LENGTH: u8 = 7;
pub const ISC_SPB_RES_BUFFERS: u8 = 9;
pub const ISC_SPB_RES_PAGE_SIZE: u8 = 10;
pub const ISC_SPB_RES_LENGTH: u8 = 11;
pub const ISC_SPB_RES_ACCESS_MODE: u8 = 12;

pub const ISC_SPB_PRP_PAGE_BUFFERS: u8 = 5;
pub const ISC_SPB_PRP_SWEEP_INTERVAL: u8 = 6;
pub const ISC_SPB_PRP_SHUTDOWN_DB: u8 = 7;
pub const ISC_SPB_PRP_DENY_NEW_ATTACHMENTS: u8 = 9;
pub const ISC_SPB_PRP_DENY_NEW_TRANSACTIONS: u8 = 10;
pub const ISC_SPB_PRP_RESERVE_SPACE: u8 = 11;
pub const ISC_SPB_PRP_WRITE_MODE: u8 = 12;
pub const ISC_SPB_PRP_ACCESS_MODE: u8 = 13;
pub const ISC_SPB_PRP_SET_SQL_DIALECT: u8 = 14;
pub const ISC_SPB_PRP_RES_USE_FULL: u8 = 35;
pub const ISC_SPB_PRP_RES: u8 = 36;
pub const ISC_SPB_PRP_WM_ASYNC: u8 = 37;
pub const ISC_SPB_PRP_WM_SYNC: u8 = 38;
pub const ISC_SPB_PRP_AM_READONLY: u8 = 39;
pub const ISC_SPB_PRP_AM_READWRITE: u8 = 40;
pub const ISC_SPB_PRP_DB_ONLINE: i32 = 0x0200;

pub const ISC_SPB_SEC_USERID: u8 = 5;
pub const ISC_SPB_SEC_GROUPID: u8 = 6;
pub const ISC_SPB_SEC_USERNAME: u8 = 7;
pub const ISC_SPB_SEC_PASSWORD: u8 = 8;
pub const ISC_SPB_SEC_GROUPNAME: u8 = 9;
pub const ISC_SPB_SEC_FIRSTNAME: u8 = 10;
pub const ISC_SPB_SEC_MIDDLENAME: u8 = 11;
pub const ISC_SPB_SEC_LASTNAME: u8 = 12;

// ============================================================================
// Info items
// ============================================================================

pub const ISC_INFO_SVC_SVR_DB_INFO: u8 = 50;
pub const ISC_INFO_SVC_GET_LICENSE_MASK: u8 = 52;
pub const ISC_INFO_SVC_GET_CONFIG: u8 = 53;
pub const ISC_INFO_SVC_VERSION: u8 = 54;
pub const ISC_INFO_SVC_SERVER_VERSION: u8 = 55;
pub const ISC_INFO_SVC_IMPLEMENTATION: u8 = 56;
pub const ISC_INFO_SVC_CAPABILITIES: u8 = 57;
pub const ISC_INFO_SVC_USER_DBPATH: u8 = 58;
pub const ISC_INFO_SVC_GET_ENV: u8 = 59;
pub const ISC_INFO_SVC_GET_ENV_LOCK: u8 = 60;
pub const ISC_INFO_SVC_GET_ENV_MSG: u8 = 61;
pub const ISC_INFO_SVC_LINE: u8 = 62;
pub const ISC_INFO_SVC_TO_EOF: u8 = 63;
pub const ISC_INFO_SVC_GET_LICENSED_USERS: u8 = 65;
pub const ISC_INFO_SVC_GET_USERS: u8 = 68;

// ============================================================================
// Option flags
// ============================================================================

macro_rules! option_flags {
    ($name:ident { $($flag:ident = $value:expr),* $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name(pub i32);

        impl $name {
            pub const NONE: Self = Self(0);
            $(pub const $flag: Self = Self($value);)*

            pub fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }
    };
}

option_flags!(BackupFlags {
    IGNORE_CHECKSUMS = 0x01,
    IGNORE_LIMBO = 0x02,
    METADATA_ONLY = 0x04,
    NO_GARBAGE_COLLECT = 0x08,
    OLD_DESCRIPTIONS = 0x10,
    NON_TRANSPORTABLE = 0x20,
    CONVERT = 0x40,
    EXPAND = 0x80,
    NO_TRIGGERS = 0x8000,
});

option_flags!(RestoreFlags {
    METADATA_ONLY = 0x04,
    DEACTIVATE_INDEXES = 0x0100,
    NO_SHADOW = 0x0200,
    NO_VALIDITY = 0x0400,
    INDIVIDUAL_COMMIT = 0x0800,
    REPLACE = 0x1000,
    CREATE = 0x2000,
    USE_ALL_SPACE = 0x4000,
});

option_flags!(ValidationFlags {
    VALIDATE_DATABASE = 0x01,
    SWEEP_DATABASE = 0x02,
    MEND_DATABASE = 0x04,
    CHECK_DATABASE = 0x10,
    IGNORE_CHECKSUM = 0x20,
    KILL_SHADOWS = 0x40,
    FULL = 0x80,
});

option_flags!(StatisticsFlags {
    DATA_PAGES = 0x01,
    DATABASE_LOG = 0x02,
    HEADER_PAGES = 0x04,
    INDEX_PAGES = 0x08,
    SYSTEM_TABLES_RELATIONS = 0x10,
    RECORD_VERSIONS = 0x20,
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Disconnect everyone after the timeout.
    Forced,
    /// Refuse new transactions, shut down once existing ones end.
    DenyTransaction,
    /// Refuse new attachments, shut down once existing ones end.
    DenyConnection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Forced writes on.
    Sync,
    Async,
}

// ============================================================================
// Decoded structures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct UserData {
    pub user_name: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub user_id: i32,
    pub group_id: i32,
    pub group_name: String,
    pub role_name: String,
}

impl UserData {
    pub fn new(user_name: &str) -> Self {
        Self {
            user_name: user_name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = password.to_string();
        self
    }

    fn validate(&self) -> Result<()> {
        if self.user_name.is_empty() || self.user_name.len() > 31 {
            return Err(FbError::ConfigError(format!(
                "user name must be 1 to 31 characters: {:?}",
                self.user_name
            )));
        }
        if self.password.len() > 31 {
            return Err(FbError::ConfigError(
                "user password cannot exceed 31 characters".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DatabasesInfo {
    pub connection_count: i32,
    pub database_count: i32,
    pub databases: Vec<String>,
}

/// Lock manager and memory settings reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ServerConfig {
    pub values: BTreeMap<String, i32>,
}

impl ServerConfig {
    pub fn get(&self, key: &str) -> Option<i32> {
        self.values.get(key).copied()
    }
}

fn config_key_name(key: u8) -> String {
    let name = match key {
        0 => "lock_mem_size",
        1 => "lock_sem_count",
        2 => "lock_signal",
        3 => "event_memory_size",
        4 => "default_db_cache_pages",
        5 => "priority_switch_delay",
        6 => "ipc_map_size",
        7 => "min_memory",
        8 => "max_memory",
        9 => "lock_grant_order",
        10 => "any_lock_memory",
        11 => "any_lock_semaphore",
        12 => "any_lock_signal",
        13 => "any_event_memory",
        14 => "lock_hash_slots",
        15 => "deadlock_timeout",
        16 => "lock_require_spins",
        17 => "connection_timeout",
        18 => "dummy_packet_interval",
        20 => "remote_buffer",
        other => return format!("key_{}", other),
    };
    name.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ServerProperties {
    pub version: i32,
    pub server_version: String,
    pub implementation: String,
    pub root_directory: String,
    pub lock_manager: String,
    pub message_file: String,
    pub database_location: String,
    pub databases: DatabasesInfo,
    pub config: ServerConfig,
}

/// One decoded info item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceInfo {
    Version(i32),
    Capabilities(i32),
    LicenseMask(i32),
    LicensedUsers(i32),
    ServerVersion(String),
    Implementation(String),
    RootDirectory(String),
    LockDirectory(String),
    MessageDirectory(String),
    SecurityDatabase(String),
    Line(String),
    Output(Vec<u8>),
    Databases(DatabasesInfo),
    Users(Vec<UserData>),
    Config(ServerConfig),
    DataNotReady,
}

// ============================================================================
// Info decoding
// ============================================================================

/// Decode a query response; `Ok(None)` when the server truncated it.
pub fn parse_service_info(buf: &[u8], charset: Charset) -> Result<Option<Vec<ServiceInfo>>> {
    let mut items = Vec::new();
    let mut reader = InfoReader::new(buf);
    loop {
        let tag = reader.read_tag();
        let item = match tag {
            ISC_INFO_END => break,
            ISC_INFO_TRUNCATED => return Ok(None),
            ISC_INFO_DATA_NOT_READY => ServiceInfo::DataNotReady,
            ISC_INFO_SVC_VERSION
            | ISC_INFO_SVC_CAPABILITIES
            | ISC_INFO_SVC_GET_LICENSE_MASK
            | ISC_INFO_SVC_GET_LICENSED_USERS => {
                let value = reader.read_prefixed_int()? as i32;
                match tag {
                    ISC_INFO_SVC_VERSION => ServiceInfo::Version(value),
                    ISC_INFO_SVC_CAPABILITIES => ServiceInfo::Capabilities(value),
                    ISC_INFO_SVC_GET_LICENSE_MASK => ServiceInfo::LicenseMask(value),
                    _ => ServiceInfo::LicensedUsers(value),
                }
            }
            ISC_INFO_SVC_SERVER_VERSION
            | ISC_INFO_SVC_IMPLEMENTATION
            | ISC_INFO_SVC_GET_ENV
            | ISC_INFO_SVC_GET_ENV_LOCK
            | ISC_INFO_SVC_GET_ENV_MSG
            | ISC_INFO_SVC_USER_DBPATH
            | ISC_INFO_SVC_LINE => {
                let text = charset.decode(reader.read_prefixed_bytes()?);
                match tag {
                    ISC_INFO_SVC_SERVER_VERSION => ServiceInfo::ServerVersion(text),
                    ISC_INFO_SVC_IMPLEMENTATION => ServiceInfo::Implementation(text),
                    ISC_INFO_SVC_GET_ENV => ServiceInfo::RootDirectory(text),
                    ISC_INFO_SVC_GET_ENV_LOCK => ServiceInfo::LockDirectory(text),
                    ISC_INFO_SVC_GET_ENV_MSG => ServiceInfo::MessageDirectory(text),
                    ISC_INFO_SVC_USER_DBPATH => ServiceInfo::SecurityDatabase(text),
                    _ => ServiceInfo::Line(text),
                }
            }
            ISC_INFO_SVC_TO_EOF => ServiceInfo::Output(reader.read_prefixed_bytes()?.to_vec()),
            ISC_INFO_SVC_SVR_DB_INFO => {
                ServiceInfo::Databases(parse_databases_info(reader.read_prefixed_bytes()?, charset)?)
            }
            ISC_INFO_SVC_GET_USERS => {
                ServiceInfo::Users(parse_user_data(reader.read_prefixed_bytes()?, charset)?)
            }
            ISC_INFO_SVC_GET_CONFIG => {
                ServiceInfo::Config(parse_server_config(reader.read_prefixed_bytes()?)?)
            }
            other => {
                return Err(FbError::ProtocolError(format!(
                    "unexpected service info item {} at offset {}",
                    other,
                    reader.position() - 1
                )))
            }
        };
        items.push(item);
    }
    Ok(Some(items))
}

fn parse_databases_info(body: &[u8], charset: Charset) -> Result<DatabasesInfo> {
    let mut info = DatabasesInfo::default();
    let mut reader = InfoReader::new(body);
    loop {
        match reader.read_tag() {
            ISC_INFO_END | ISC_INFO_FLAG_END => break,
            ISC_SPB_NUM_ATT => info.connection_count = reader.read_i32()?,
            ISC_SPB_NUM_DB => info.database_count = reader.read_i32()?,
            ISC_SPB_DBNAME => info.databases.push(charset.decode(reader.read_prefixed_bytes()?)),
            other => {
                return Err(FbError::ProtocolError(format!(
                    "unexpected database info item {}",
                    other
                )))
            }
        }
    }
    Ok(info)
}

fn parse_user_data(body: &[u8], charset: Charset) -> Result<Vec<UserData>> {
    let mut users: Vec<UserData> = Vec::new();
    let mut reader = InfoReader::new(body);
    loop {
        let tag = reader.read_tag();
        if tag == ISC_INFO_END {
            break;
        }
        if tag == ISC_SPB_SEC_USERNAME {
            users.push(UserData::new(&charset.decode(reader.read_prefixed_bytes()?)));
            continue;
        }
        let user = users.last_mut().ok_or_else(|| {
            FbError::ProtocolError(format!("user attribute {} before user name", tag))
        })?;
        match tag {
            ISC_SPB_SEC_FIRSTNAME => user.first_name = charset.decode(reader.read_prefixed_bytes()?),
            ISC_SPB_SEC_MIDDLENAME => user.middle_name = charset.decode(reader.read_prefixed_bytes()?),
            ISC_SPB_SEC_LASTNAME => user.last_name = charset.decode(reader.read_prefixed_bytes()?),
            ISC_SPB_SEC_GROUPNAME => user.group_name = charset.decode(reader.read_prefixed_bytes()?),
            ISC_SPB_SEC_PASSWORD => user.password = charset.decode(reader.read_prefixed_bytes()?),
            ISC_SPB_SEC_USERID => user.user_id = reader.read_i32()?,
            ISC_SPB_SEC_GROUPID => user.group_id = reader.read_i32()?,
            other => {
                return Err(FbError::ProtocolError(format!("unexpected user item {}", other)))
            }
        }
    }
    Ok(users)
}

fn parse_server_config(body: &[u8]) -> Result<ServerConfig> {
    let mut config = ServerConfig::default();
    let mut reader = InfoReader::new(body);
    while let Some(key) = reader.peek_tag() {
        if key == ISC_INFO_FLAG_END || key == ISC_INFO_END {
            break;
        }
        reader.read_tag();
        let value = reader.read_i32()?;
        config.values.insert(config_key_name(key), value);
    }
    Ok(config)
}

// ============================================================================
// Actions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupFile {
    pub path: String,
    /// Maximum bytes for this file; the last file may be unbounded.
    pub length: Option<i32>,
}

impl BackupFile {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            length: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceAction {
    Backup {
        database: String,
        files: Vec<BackupFile>,
        factor: Option<i32>,
        flags: BackupFlags,
        verbose: bool,
    },
    Restore {
        database: String,
        files: Vec<BackupFile>,
        page_size: Option<i32>,
        page_buffers: Option<i32>,
        read_only: bool,
        flags: RestoreFlags,
        verbose: bool,
    },
    Validate {
        database: String,
        flags: ValidationFlags,
    },
    Statistics {
        database: String,
        flags: StatisticsFlags,
    },
    GetLog,
    Shutdown {
        database: String,
        mode: ShutdownMode,
        seconds: i32,
    },
    BringOnline {
        database: String,
    },
    SetSqlDialect {
        database: String,
        dialect: i32,
    },
    SetSweepInterval {
        database: String,
        interval: i32,
    },
    SetPageBuffers {
        database: String,
        buffers: i32,
    },
    SetWriteMode {
        database: String,
        mode: WriteMode,
    },
    SetReserveSpace {
        database: String,
        reserve: bool,
    },
    SetAccessMode {
        database: String,
        read_only: bool,
    },
    AddUser(UserData),
    ModifyUser(UserData),
    DeleteUser {
        user_name: String,
        role_name: Option<String>,
    },
    DisplayUsers {
        user_name: Option<String>,
    },
}

impl ServiceAction {
    /// Actions whose output is read line by line after starting.
    pub fn produces_lines(&self) -> bool {
        match self {
            ServiceAction::Backup { verbose, .. } | ServiceAction::Restore { verbose, .. } => {
                *verbose
            }
            ServiceAction::Validate { .. }
            | ServiceAction::Statistics { .. }
            | ServiceAction::GetLog => true,
            _ => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServiceAction::Backup { .. } => "backup",
            ServiceAction::Restore { .. } => "restore",
            ServiceAction::Validate { .. } => "validate",
            ServiceAction::Statistics { .. } => "statistics",
            ServiceAction::GetLog => "get_log",
            ServiceAction::Shutdown { .. } => "shutdown",
            ServiceAction::BringOnline { .. } => "bring_online",
            ServiceAction::SetSqlDialect { .. } => "set_sql_dialect",
            ServiceAction::SetSweepInterval { .. } => "set_sweep_interval",
            ServiceAction::SetPageBuffers { .. } => "set_page_buffers",
            ServiceAction::SetWriteMode { .. } => "set_write_mode",
            ServiceAction::SetReserveSpace { .. } => "set_reserve_space",
            ServiceAction::SetAccessMode { .. } => "set_access_mode",
            ServiceAction::AddUser(_) => "add_user",
            ServiceAction::ModifyUser(_) => "modify_user",
            ServiceAction::DeleteUser { .. } => "delete_user",
            ServiceAction::DisplayUsers { .. } => "display_users",
        }
    }

    /// Build the service-start buffer.
    pub fn to_spb(&self) -> Result<ParameterBuffer> {
        let mut spb = ParameterBuffer::service_start();
        match self {
            ServiceAction::Backup {
                database,
                files,
                factor,
                flags,
                verbose,
            } => {
                spb.append(ISC_ACTION_SVC_BACKUP);
                spb.append_string(ISC_SPB_DBNAME, database)?;
                for file in files {
                    spb.append_string(ISC_SPB_BKP_FILE, &file.path)?;
                    if let Some(length) = file.length {
                        spb.append_int(ISC_SPB_BKP_LENGTH, length);
                    }
                }
                if let Some(factor) = factor {
                    spb.append_int(ISC_SPB_BKP_FACTOR, *factor);
                }
                if *verbose {
                    spb.append(ISC_SPB_VERBOSE);
                }
                spb.append_int(ISC_SPB_OPTIONS, flags.0);
            }
            ServiceAction::Restore {
                database,
                files,
                page_size,
                page_buffers,
                read_only,
                flags,
                verbose,
            } => {
                spb.append(ISC_ACTION_SVC_RESTORE);
                for file in files {
                    spb.append_string(ISC_SPB_BKP_FILE, &file.path)?;
                }
                spb.append_string(ISC_SPB_DBNAME, database)?;
                if let Some(length) = files.last().and_then(|f| f.length) {
                    spb.append_int(ISC_SPB_RES_LENGTH, length);
                }
                if let Some(buffers) = page_buffers {
                    spb.append_int(ISC_SPB_RES_BUFFERS, *buffers);
                }
                if let Some(size) = page_size {
                    spb.append_int(ISC_SPB_RES_PAGE_SIZE, *size);
                }
                spb.append_byte(
                    ISC_SPB_RES_ACCESS_MODE,
                    if *read_only {
                        ISC_SPB_PRP_AM_READONLY
                    } else {
                        ISC_SPB_PRP_AM_READWRITE
                    },
                );
                if *verbose {
                    spb.append(ISC_SPB_VERBOSE);
                }
                spb.append_int(ISC_SPB_OPTIONS, flags.0);
            }
            ServiceAction::Validate { database, flags } => {
                spb.append(ISC_ACTION_SVC_REPAIR);
                spb.append_string(ISC_SPB_DBNAME, database)?;
                spb.append_int(ISC_SPB_OPTIONS, flags.0);
            }
            ServiceAction::Statistics { database, flags } => {
                spb.append(ISC_ACTION_SVC_DB_STATS);
                spb.append_string(ISC_SPB_DBNAME, database)?;
                spb.append_int(ISC_SPB_OPTIONS, flags.0);
            }
            ServiceAction::GetLog => {
                spb.append(ISC_ACTION_SVC_GET_LOG);
            }
            ServiceAction::Shutdown {
                database,
                mode,
                seconds,
            } => {
                properties(&mut spb, database)?;
                let tag = match mode {
                    ShutdownMode::Forced => ISC_SPB_PRP_SHUTDOWN_DB,
                    ShutdownMode::DenyTransaction => ISC_SPB_PRP_DENY_NEW_TRANSACTIONS,
                    ShutdownMode::DenyConnection => ISC_SPB_PRP_DENY_NEW_ATTACHMENTS,
                };
                spb.append_int(tag, *seconds);
            }
            ServiceAction::BringOnline { database } => {
                properties(&mut spb, database)?;
                spb.append_int(ISC_SPB_OPTIONS, ISC_SPB_PRP_DB_ONLINE);
            }
            ServiceAction::SetSqlDialect { database, dialect } => {
                properties(&mut spb, database)?;
                spb.append_int(ISC_SPB_PRP_SET_SQL_DIALECT, *dialect);
            }
            ServiceAction::SetSweepInterval { database, interval } => {
                properties(&mut spb, database)?;
                spb.append_int(ISC_SPB_PRP_SWEEP_INTERVAL, *interval);
            }
            ServiceAction::SetPageBuffers { database, buffers } => {
                properties(&mut spb, database)?;
                spb.append_int(ISC_SPB_PRP_PAGE_BUFFERS, *buffers);
            }
            ServiceAction::SetWriteMode { database, mode } => {
                properties(&mut spb, database)?;
                let value = match mode {
                    WriteMode::Sync => ISC_SPB_PRP_WM_SYNC,
                    WriteMode::Async => ISC_SPB_PRP_WM_ASYNC,
                };
                spb.append_byte(ISC_SPB_PRP_WRITE_MODE, value);
            }
            ServiceAction::SetReserveSpace { database, reserve } => {
                properties(&mut spb, database)?;
                let value = if *reserve {
                    ISC_SPB_PRP_RES
                } else {
                    ISC_SPB_PRP_RES_USE_FULL
                };
                spb.append_byte(ISC_SPB_PRP_RESERVE_SPACE, value);
            }
            ServiceAction::SetAccessMode {
                database,
                read_only,
            } => {
                properties(&mut spb, database)?;
                let value = if *read_only {
                    ISC_SPB_PRP_AM_READONLY
                } else {
                    ISC_SPB_PRP_AM_READWRITE
                };
                spb.append_byte(ISC_SPB_PRP_ACCESS_MODE, value);
            }
            ServiceAction::AddUser(user) => {
                user.validate()?;
                spb.append(ISC_ACTION_SVC_ADD_USER);
                user_items(&mut spb, user, true)?;
            }
            ServiceAction::ModifyUser(user) => {
                user.validate()?;
                spb.append(ISC_ACTION_SVC_MODIFY_USER);
                user_items(&mut spb, user, false)?;
            }
            ServiceAction::DeleteUser {
                user_name,
                role_name,
            } => {
                spb.append(ISC_ACTION_SVC_DELETE_USER);
                spb.append_string(ISC_SPB_SEC_USERNAME, user_name)?;
                if let Some(role) = role_name {
                    spb.append_string(ISC_SPB_SQL_ROLE_NAME, role)?;
                }
            }
            ServiceAction::DisplayUsers { user_name } => {
                spb.append(ISC_ACTION_SVC_DISPLAY_USER);
                if let Some(name) = user_name {
                    spb.append_string(ISC_SPB_SEC_USERNAME, name)?;
                }
            }
        }
        Ok(spb)
    }
}

fn properties(spb: &mut ParameterBuffer, database: &str) -> Result<()> {
    spb.append(ISC_ACTION_SVC_PROPERTIES);
    spb.append_string(ISC_SPB_DBNAME, database)?;
    Ok(())
}

fn user_items(spb: &mut ParameterBuffer, user: &UserData, adding: bool) -> Result<()> {
    spb.append_string(ISC_SPB_SEC_USERNAME, &user.user_name)?;
    if adding || !user.password.is_empty() {
        spb.append_string(ISC_SPB_SEC_PASSWORD, &user.password)?;
    }
    for (tag, value) in [
        (ISC_SPB_SEC_FIRSTNAME, &user.first_name),
        (ISC_SPB_SEC_MIDDLENAME, &user.middle_name),
        (ISC_SPB_SEC_LASTNAME, &user.last_name),
    ] {
        if !value.is_empty() {
            spb.append_string(tag, value)?;
        }
    }
    if !adding || user.user_id != 0 {
        spb.append_int(ISC_SPB_SEC_USERID, user.user_id);
    }
    if !adding || user.group_id != 0 {
        spb.append_int(ISC_SPB_SEC_GROUPID, user.group_id);
    }
    if !user.group_name.is_empty() {
        spb.append_string(ISC_SPB_SEC_GROUPNAME, &user.group_name)?;
    }
    if !user.role_name.is_empty() {
        spb.append_string(ISC_SPB_SQL_ROLE_NAME, &user.role_name)?;
    }
    Ok(())
}

// ============================================================================
// Client
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOptions {
    /// Host prefix for the service name; `None` means the local server.
    pub data_source: Option<String>,
    pub user: String,
    pub password: String,
    pub role: Option<String>,
    pub query_buffer_size: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            data_source: None,
            user: "SYSDBA".to_string(),
            password: "masterkey".to_string(),
            role: None,
            query_buffer_size: DEFAULT_QUERY_BUFFER_SIZE,
        }
    }
}

impl ServiceOptions {
    pub fn service_name(&self) -> String {
        match &self.data_source {
            Some(host) => format!("{}:{}", host, SERVICE_MANAGER_NAME),
            None => SERVICE_MANAGER_NAME.to_string(),
        }
    }

    pub fn to_spb(&self) -> Result<ParameterBuffer> {
        if self.user.is_empty() {
            return Err(FbError::ConfigError("no user name was specified".to_string()));
        }
        if self.password.is_empty() {
            return Err(FbError::ConfigError("no user password was specified".to_string()));
        }
        let mut spb = ParameterBuffer::service_attach();
        spb.append_string(ISC_SPB_USER_NAME, &self.user)?;
        spb.append_string(ISC_SPB_PASSWORD, &self.password)?;
        if let Some(role) = self.role.as_deref().filter(|r| !r.is_empty()) {
            spb.append_string(ISC_SPB_SQL_ROLE_NAME, role)?;
        }
        spb.append_bytes(ISC_SPB_DUMMY_PACKET_INTERVAL, &DUMMY_PACKET_INTERVAL)?;
        Ok(spb)
    }
}

/// Runs actions and queries over one services-manager attachment,
/// attaching lazily on first use.
pub struct ServiceClient<M: ServiceManager> {
    manager: M,
    options: ServiceOptions,
    attached: bool,
}

impl<M: ServiceManager> ServiceClient<M> {
    pub fn new(manager: M, options: ServiceOptions) -> Self {
        Self {
            manager,
            options,
            attached: false,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    pub fn attach(&mut self) -> Result<()> {
        if self.attached {
            return Ok(());
        }
        let spb = self.options.to_spb()?;
        let service = self.options.service_name();
        self.manager.attach(&service, spb.as_bytes())?;
        self.attached = true;
        tracing::debug!(target: "fbcore::services", %service, "attached to services manager");
        Ok(())
    }

    pub fn detach(&mut self) -> Result<()> {
        if !self.attached {
            return Ok(());
        }
        self.attached = false;
        self.manager.detach()
    }

    /// Start `action` without reading its output.
    pub fn start(&mut self, action: &ServiceAction) -> Result<()> {
        let spb = action.to_spb()?;
        self.attach()?;
        tracing::debug!(target: "fbcore::services", action = action.name(), "starting service action");
        self.manager.start(spb.as_bytes())
    }

    /// Start `action` and collect its output lines, if it produces any.
    pub fn run(&mut self, action: &ServiceAction) -> Result<Vec<String>> {
        self.start(action)?;
        let mut lines = Vec::new();
        if action.produces_lines() {
            while let Some(line) = self.next_line()? {
                lines.push(line);
            }
        }
        Ok(lines)
    }

    /// Next line of output from the running action, `None` when finished.
    pub fn next_line(&mut self) -> Result<Option<String>> {
        let items = self.query(&[ISC_INFO_SVC_LINE])?;
        for item in items {
            if let ServiceInfo::Line(line) = item {
                return Ok(if line.is_empty() { None } else { Some(line) });
            }
        }
        Ok(None)
    }

    /// Issue an information request, retrying with a doubled buffer while
    /// the response is truncated.
    pub fn query(&mut self, items: &[u8]) -> Result<Vec<ServiceInfo>> {
        self.attach()?;
        let manager = &mut self.manager;
        request_info(
            self.options.query_buffer_size,
            |len| manager.query(&[], items, len),
            |buf| parse_service_info(buf, Charset::Utf8),
        )
    }

    pub fn server_version(&mut self) -> Result<String> {
        for item in self.query(&[ISC_INFO_SVC_SERVER_VERSION])? {
            if let ServiceInfo::ServerVersion(version) = item {
                return Ok(version);
            }
        }
        Err(FbError::ProtocolError("server version missing from response".to_string()))
    }

    pub fn server_properties(&mut self) -> Result<ServerProperties> {
        let items = self.query(&[
            ISC_INFO_SVC_VERSION,
            ISC_INFO_SVC_SERVER_VERSION,
            ISC_INFO_SVC_IMPLEMENTATION,
            ISC_INFO_SVC_GET_ENV,
            ISC_INFO_SVC_GET_ENV_LOCK,
            ISC_INFO_SVC_GET_ENV_MSG,
            ISC_INFO_SVC_USER_DBPATH,
            ISC_INFO_SVC_SVR_DB_INFO,
            ISC_INFO_SVC_GET_CONFIG,
        ])?;
        let mut props = ServerProperties::default();
        for item in items {
            match item {
                ServiceInfo::Version(v) => props.version = v,
                ServiceInfo::ServerVersion(s) => props.server_version = s,
                ServiceInfo::Implementation(s) => props.implementation = s,
                ServiceInfo::RootDirectory(s) => props.root_directory = s,
                ServiceInfo::LockDirectory(s) => props.lock_manager = s,
                ServiceInfo::MessageDirectory(s) => props.message_file = s,
                ServiceInfo::SecurityDatabase(s) => props.database_location = s,
                ServiceInfo::Databases(d) => props.databases = d,
                ServiceInfo::Config(c) => props.config = c,
                _ => {}
            }
        }
        Ok(props)
    }

    /// Security records, for one user or all of them.
    pub fn display_users(&mut self, user_name: Option<&str>) -> Result<Vec<UserData>> {
        self.start(&ServiceAction::DisplayUsers {
            user_name: user_name.map(str::to_string),
        })?;
        let mut users = Vec::new();
        for item in self.query(&[ISC_INFO_SVC_GET_USERS])? {
            if let ServiceInfo::Users(mut batch) = item {
                users.append(&mut batch);
            }
        }
        Ok(users)
    }
}
