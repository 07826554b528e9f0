//! Prepared statement lifecycle.
//!
//! ```text
//! Deallocated -> Allocated -> Prepared -> Executed -> Closed
//!                                 ^           |          |
//!                                 +-----------+----------+   (re-execute)
//! ```
//!
//! A server failure while executing or fetching moves the statement to
//! `Error`, which only `release` leaves. The statement owns its input and
//! output descriptors; both are rebuilt on every prepare.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};

use super::array::{ArrayHandle, SqlCatalog};
use super::attachment::{Attachment, Handle, QuadId};
use super::charset::Charset;
use super::descriptor::Descriptor;
use super::protocol::*;
use super::transaction::{Transaction, TransactionObserver};
use super::types::{DbArray, DbValue};
use crate::error::{FbError, Result};

pub const DEFAULT_MAX_BUFFER_SIZE: usize = 8192;
pub const ROWS_AFFECTED_BUFFER_SIZE: usize = 34;
pub const STATEMENT_TYPE_BUFFER_SIZE: usize = 8;
pub const DEFAULT_FETCH_SIZE: usize = 200;

const STATEMENT_TYPE_ITEMS: [u8; 1] = [ISC_INFO_SQL_STMT_TYPE];
const ROWS_AFFECTED_ITEMS: [u8; 1] = [ISC_INFO_SQL_RECORDS];
const PLAN_ITEMS: [u8; 1] = [ISC_INFO_SQL_GET_PLAN];

const SELECT_ITEMS: [u8; 13] = [
    ISC_INFO_SQL_SELECT,
    ISC_INFO_SQL_DESCRIBE_VARS,
    ISC_INFO_SQL_SQLDA_SEQ,
    ISC_INFO_SQL_TYPE,
    ISC_INFO_SQL_SUB_TYPE,
    ISC_INFO_SQL_SCALE,
    ISC_INFO_SQL_LENGTH,
    ISC_INFO_SQL_FIELD,
    ISC_INFO_SQL_RELATION,
    ISC_INFO_SQL_OWNER,
    ISC_INFO_SQL_ALIAS,
    ISC_INFO_SQL_DESCRIBE_END,
    ISC_INFO_END,
];

const BIND_ITEMS: [u8; 13] = [
    ISC_INFO_SQL_BIND,
    ISC_INFO_SQL_DESCRIBE_VARS,
    ISC_INFO_SQL_SQLDA_SEQ,
    ISC_INFO_SQL_TYPE,
    ISC_INFO_SQL_SUB_TYPE,
    ISC_INFO_SQL_SCALE,
    ISC_INFO_SQL_LENGTH,
    ISC_INFO_SQL_FIELD,
    ISC_INFO_SQL_RELATION,
    ISC_INFO_SQL_OWNER,
    ISC_INFO_SQL_ALIAS,
    ISC_INFO_SQL_DESCRIBE_END,
    ISC_INFO_END,
];

/// Items sent with prepare: statement type, then both describes.
fn prepare_items() -> Vec<u8> {
    let mut items = Vec::with_capacity(1 + SELECT_ITEMS.len() + BIND_ITEMS.len());
    items.push(ISC_INFO_SQL_STMT_TYPE);
    items.extend_from_slice(&SELECT_ITEMS[..SELECT_ITEMS.len() - 1]);
    items.extend_from_slice(&BIND_ITEMS);
    items
}

// ============================================================================
// States and kinds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    Deallocated,
    Allocated,
    Prepared,
    Executed,
    Error,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    None,
    Select,
    Insert,
    Update,
    Delete,
    Ddl,
    GetSegment,
    PutSegment,
    StoredProcedure,
    StartTransaction,
    Commit,
    Rollback,
    SelectForUpdate,
    SetGenerator,
    SavePoint,
}

impl StatementKind {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => StatementKind::Select,
            2 => StatementKind::Insert,
            3 => StatementKind::Update,
            4 => StatementKind::Delete,
            5 => StatementKind::Ddl,
            6 => StatementKind::GetSegment,
            7 => StatementKind::PutSegment,
            8 => StatementKind::StoredProcedure,
            9 => StatementKind::StartTransaction,
            10 => StatementKind::Commit,
            11 => StatementKind::Rollback,
            12 => StatementKind::SelectForUpdate,
            13 => StatementKind::SetGenerator,
            14 => StatementKind::SavePoint,
            _ => StatementKind::None,
        }
    }

    /// Kinds that hold a server-side cursor until closed.
    pub fn is_select_family(self) -> bool {
        matches!(
            self,
            StatementKind::Select | StatementKind::SelectForUpdate | StatementKind::StoredProcedure
        )
    }

    fn has_open_cursor(self) -> bool {
        matches!(self, StatementKind::Select | StatementKind::SelectForUpdate)
    }

    fn counts_records(self) -> bool {
        matches!(
            self,
            StatementKind::Insert
                | StatementKind::Update
                | StatementKind::Delete
                | StatementKind::StoredProcedure
        )
    }
}

// ============================================================================
// Describe parsing
// ============================================================================

#[derive(Debug, Default)]
struct Described {
    kind: Option<StatementKind>,
    select: Option<Descriptor>,
    bind: Option<Descriptor>,
}

#[derive(Clone, Copy)]
enum Section {
    Select,
    Bind,
}

/// Walk a describe response. `Ok(None)` means it was truncated.
fn parse_describe(buf: &[u8], charset: Charset) -> Result<Option<Described>> {
    let mut out = Described::default();
    let mut reader = InfoReader::new(buf);
    let mut section = Section::Select;
    let mut index = 0usize;

    loop {
        let tag = reader.read_tag();
        match tag {
            ISC_INFO_END => break,
            ISC_INFO_TRUNCATED => return Ok(None),
            ISC_INFO_SQL_STMT_TYPE => {
                out.kind = Some(StatementKind::from_code(reader.read_prefixed_int()?));
            }
            ISC_INFO_SQL_SELECT => section = Section::Select,
            ISC_INFO_SQL_BIND => section = Section::Bind,
            ISC_INFO_SQL_DESCRIBE_VARS => {
                let count = reader.read_prefixed_int()? as usize;
                let desc = Descriptor::new(count);
                match section {
                    Section::Select => out.select = Some(desc),
                    Section::Bind => out.bind = Some(desc),
                }
            }
            ISC_INFO_SQL_DESCRIBE_END => {}
            ISC_INFO_SQL_SQLDA_SEQ => {
                index = (reader.read_prefixed_int()? as usize).saturating_sub(1);
            }
            ISC_INFO_SQL_TYPE
            | ISC_INFO_SQL_SUB_TYPE
            | ISC_INFO_SQL_SCALE
            | ISC_INFO_SQL_LENGTH
            | ISC_INFO_SQL_FIELD
            | ISC_INFO_SQL_RELATION
            | ISC_INFO_SQL_OWNER
            | ISC_INFO_SQL_ALIAS => {
                let body = reader.read_prefixed_bytes()?;
                let desc = match section {
                    Section::Select => out.select.as_mut(),
                    Section::Bind => out.bind.as_mut(),
                }
                .ok_or_else(|| {
                    FbError::ProtocolError(format!("describe item {} before variable count", tag))
                })?;
                let field = desc.field_mut(index).map_err(|_| {
                    FbError::ProtocolError(format!("describe sequence {} out of range", index + 1))
                })?;
                let int = || vax_integer(body);
                let text = || charset.decode(body);
                match tag {
                    ISC_INFO_SQL_TYPE => field.data_type = int() as i32,
                    ISC_INFO_SQL_SUB_TYPE => field.sub_type = int() as i16,
                    ISC_INFO_SQL_SCALE => field.scale = int() as i16,
                    ISC_INFO_SQL_LENGTH => field.length = int() as usize,
                    ISC_INFO_SQL_FIELD => field.name = text(),
                    ISC_INFO_SQL_RELATION => field.relation = text(),
                    ISC_INFO_SQL_OWNER => field.owner = text(),
                    _ => field.alias = text(),
                }
            }
            _ => reader.skip_item()?,
        }
    }

    for desc in [out.select.as_mut(), out.bind.as_mut()].into_iter().flatten() {
        for i in 0..desc.len() {
            desc.field_mut(i)?.resolve_charset(charset);
        }
    }
    Ok(Some(out))
}

/// Sum of inserted, updated and deleted rows from an `isc_info_sql_records`
/// response.
pub fn parse_records_affected(buf: &[u8]) -> Result<i64> {
    let mut reader = InfoReader::new(buf);
    let mut total = 0i64;
    loop {
        match reader.read_tag() {
            ISC_INFO_END => break,
            ISC_INFO_TRUNCATED => {
                return Err(FbError::ProtocolError(
                    "records affected response truncated".to_string(),
                ))
            }
            ISC_INFO_SQL_RECORDS => {
                let mut counts = InfoReader::new(reader.read_prefixed_bytes()?);
                loop {
                    match counts.read_tag() {
                        ISC_INFO_END => break,
                        ISC_INFO_REQ_INSERT_COUNT
                        | ISC_INFO_REQ_UPDATE_COUNT
                        | ISC_INFO_REQ_DELETE_COUNT => total += counts.read_prefixed_int()?,
                        _ => counts.skip_item()?,
                    }
                }
            }
            _ => reader.skip_item()?,
        }
    }
    Ok(total)
}

fn parse_statement_kind(buf: &[u8]) -> Result<StatementKind> {
    let mut reader = InfoReader::new(buf);
    loop {
        match reader.read_tag() {
            ISC_INFO_SQL_STMT_TYPE => {
                return Ok(StatementKind::from_code(reader.read_prefixed_int()?))
            }
            ISC_INFO_END => return Ok(StatementKind::None),
            ISC_INFO_TRUNCATED => {
                return Err(FbError::ProtocolError(
                    "statement type response truncated".to_string(),
                ))
            }
            _ => reader.skip_item()?,
        }
    }
}

/// The plan text starts after a leading newline.
fn parse_plan(buf: &[u8], charset: Charset) -> Result<Option<String>> {
    match buf.first() {
        Some(&ISC_INFO_TRUNCATED) => Ok(None),
        None | Some(&ISC_INFO_END) => Ok(Some(String::new())),
        Some(&ISC_INFO_SQL_GET_PLAN) => {
            let mut reader = InfoReader::new(&buf[1..]);
            let len = reader.read_length()?;
            if len == 0 {
                return Ok(Some(String::new()));
            }
            let body = reader.read_bytes(len)?;
            Ok(Some(charset.decode(&body[1..])))
        }
        Some(other) => Err(FbError::ProtocolError(format!(
            "unexpected plan item {}",
            other
        ))),
    }
}

// ============================================================================
// Statement
// ============================================================================

/// Descriptors shared with the transaction so it can drop array handles.
#[derive(Debug)]
struct StatementLink {
    parameters: Mutex<Descriptor>,
    fields: Mutex<Descriptor>,
}

impl Default for StatementLink {
    fn default() -> Self {
        Self {
            parameters: Mutex::new(Descriptor::new(0)),
            fields: Mutex::new(Descriptor::new(0)),
        }
    }
}

impl TransactionObserver for StatementLink {
    fn transaction_ended(&self, transaction: Handle) {
        tracing::debug!(target: "fbcore::statement", transaction, "dropping transaction-scoped array handles");
        self.parameters.lock().clear_array_handles();
        self.fields.lock().clear_array_handles();
    }
}

#[derive(Debug)]
pub struct Statement {
    handle: Option<Handle>,
    state: StatementState,
    kind: StatementKind,
    dialect: u16,
    sql: String,
    link: Arc<StatementLink>,
    records_affected: i64,
    fetch_size: usize,
    rows: VecDeque<Vec<DbValue>>,
    end_of_cursor: bool,
    singleton: Option<Vec<DbValue>>,
}

impl Statement {
    pub fn new(dialect: u16) -> Self {
        Self {
            handle: None,
            state: StatementState::Deallocated,
            kind: StatementKind::None,
            dialect,
            sql: String::new(),
            link: Arc::new(StatementLink::default()),
            records_affected: -1,
            fetch_size: DEFAULT_FETCH_SIZE,
            rows: VecDeque::new(),
            end_of_cursor: true,
            singleton: None,
        }
    }

    pub fn state(&self) -> StatementState {
        self.state
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn handle(&self) -> Option<Handle> {
        self.handle
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Rows changed by the last execute, or -1 when not applicable.
    pub fn records_affected(&self) -> i64 {
        self.records_affected
    }

    pub fn set_fetch_size(&mut self, fetch_size: usize) {
        self.fetch_size = fetch_size.max(1);
    }

    /// Input descriptor.
    pub fn parameters(&self) -> MutexGuard<'_, Descriptor> {
        self.link.parameters.lock()
    }

    /// Output descriptor; value slots hold the most recently decoded row.
    pub fn fields(&self) -> MutexGuard<'_, Descriptor> {
        self.link.fields.lock()
    }

    pub fn set_parameter(&mut self, index: usize, value: DbValue) -> Result<()> {
        self.link.parameters.lock().set_value(index, value)
    }

    /// Clear parameter values between executions, keeping their shape.
    pub fn clear_parameters(&mut self) {
        self.link.parameters.lock().reset();
    }

    fn require_handle(&self) -> Result<Handle> {
        self.handle
            .ok_or_else(|| FbError::StateError("statement is not allocated".to_string()))
    }

    fn observer(&self) -> Weak<dyn TransactionObserver> {
        let link: Arc<dyn TransactionObserver> = self.link.clone();
        Arc::downgrade(&link)
    }

    fn fail(&mut self, err: FbError) -> FbError {
        tracing::debug!(target: "fbcore::statement", handle = ?self.handle, error = %err, "statement failed");
        self.state = StatementState::Error;
        err
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn allocate(&mut self, att: &mut dyn Attachment) -> Result<()> {
        if self.state != StatementState::Deallocated {
            return Err(FbError::StateError(format!(
                "cannot allocate a statement in state {:?}",
                self.state
            )));
        }
        self.handle = Some(att.allocate_statement()?);
        self.state = StatementState::Allocated;
        Ok(())
    }

    pub fn prepare(
        &mut self,
        att: &mut dyn Attachment,
        transaction: &mut Transaction,
        sql: &str,
    ) -> Result<()> {
        if self.state == StatementState::Error {
            return Err(FbError::StateError(
                "statement in error state must be released".to_string(),
            ));
        }
        if !transaction.is_active() {
            return Err(FbError::StateError(
                "cannot prepare in an inactive transaction".to_string(),
            ));
        }
        if self.state == StatementState::Executed {
            self.close(att)?;
        }
        if self.state == StatementState::Deallocated {
            self.allocate(att)?;
        }
        let handle = self.require_handle()?;

        self.rows.clear();
        self.singleton = None;
        self.records_affected = -1;

        let charset = att.charset();
        let items = prepare_items();
        let tr = transaction.handle();
        let dialect = self.dialect;
        let mut first = true;
        let described = request_info(
            DEFAULT_MAX_BUFFER_SIZE,
            |len| {
                if std::mem::take(&mut first) {
                    att.prepare(tr, handle, sql, dialect, &items, len)
                } else {
                    att.statement_info(handle, &items, len)
                }
            },
            |buf| parse_describe(buf, charset),
        )?;

        self.kind = described.kind.unwrap_or(StatementKind::None);
        *self.link.fields.lock() = described.select.unwrap_or_else(|| Descriptor::new(0));
        *self.link.parameters.lock() = described.bind.unwrap_or_else(|| Descriptor::new(0));
        self.sql = sql.to_string();
        self.state = StatementState::Prepared;
        transaction.register(self.observer());

        tracing::debug!(target: "fbcore::statement", handle, kind = ?self.kind, "statement prepared");
        Ok(())
    }

    /// Re-request the output descriptor.
    pub fn describe(&mut self, att: &mut dyn Attachment) -> Result<()> {
        let desc = self.describe_section(att, &SELECT_ITEMS, |d| d.select)?;
        *self.link.fields.lock() = desc;
        Ok(())
    }

    /// Re-request the input descriptor.
    pub fn describe_parameters(&mut self, att: &mut dyn Attachment) -> Result<()> {
        let desc = self.describe_section(att, &BIND_ITEMS, |d| d.bind)?;
        *self.link.parameters.lock() = desc;
        Ok(())
    }

    fn describe_section(
        &self,
        att: &mut dyn Attachment,
        items: &[u8],
        pick: fn(Described) -> Option<Descriptor>,
    ) -> Result<Descriptor> {
        if !matches!(
            self.state,
            StatementState::Prepared | StatementState::Executed | StatementState::Closed
        ) {
            return Err(FbError::StateError(format!(
                "cannot describe a statement in state {:?}",
                self.state
            )));
        }
        let handle = self.require_handle()?;
        let charset = att.charset();
        let described = request_info(
            DEFAULT_MAX_BUFFER_SIZE,
            |len| att.statement_info(handle, items, len),
            |buf| parse_describe(buf, charset),
        )?;
        Ok(pick(described).unwrap_or_else(|| Descriptor::new(0)))
    }

    pub fn execute(&mut self, att: &mut dyn Attachment, transaction: &mut Transaction) -> Result<()> {
        if !matches!(
            self.state,
            StatementState::Prepared | StatementState::Executed | StatementState::Closed
        ) {
            return Err(FbError::StateError(format!(
                "cannot execute a statement in state {:?}",
                self.state
            )));
        }
        if !transaction.is_active() {
            return Err(FbError::StateError(
                "cannot execute in an inactive transaction".to_string(),
            ));
        }
        if self.state == StatementState::Executed {
            self.close(att)?;
        }
        let handle = self.require_handle()?;

        let (input_layout, input_message) = {
            let params = self.link.parameters.lock();
            if params.is_empty() {
                (Vec::new(), Vec::new())
            } else {
                (params.to_message_layout().to_vec(), params.encode_message()?)
            }
        };
        let output_layout = if self.kind == StatementKind::StoredProcedure {
            self.link.fields.lock().to_message_layout().to_vec()
        } else {
            Vec::new()
        };

        let output = match att.execute(
            transaction.handle(),
            handle,
            &input_layout,
            &input_message,
            &output_layout,
        ) {
            Ok(output) => output,
            Err(err) => return Err(self.fail(err)),
        };

        self.rows.clear();
        let decoded = match output {
            Some(message) => {
                let mut fields = self.link.fields.lock();
                let row = fields.decode_message(&message).map(|()| Some(fields.values()));
                row
            }
            None => Ok(None),
        };
        self.singleton = match decoded {
            Ok(row) => row,
            Err(err) => return Err(self.fail(err)),
        };
        self.end_of_cursor = !self.kind.has_open_cursor();

        self.records_affected = if self.kind.counts_records() {
            match self.query_records_affected(att) {
                Ok(count) => count,
                Err(err) => return Err(self.fail(err)),
            }
        } else {
            -1
        };

        transaction.register(self.observer());
        self.state = StatementState::Executed;
        Ok(())
    }

    /// Next row, or `None` once the cursor is exhausted. Non-cursor
    /// statements yield their singleton output row once.
    pub fn fetch(&mut self, att: &mut dyn Attachment) -> Result<Option<Vec<DbValue>>> {
        if self.state != StatementState::Executed {
            return Err(FbError::StateError(format!(
                "cannot fetch from a statement in state {:?}",
                self.state
            )));
        }
        if !self.kind.has_open_cursor() {
            return Ok(self.singleton.take());
        }

        if self.rows.is_empty() && !self.end_of_cursor {
            let handle = self.require_handle()?;
            let layout = self.link.fields.lock().to_message_layout();
            let batch = match att.fetch(handle, &layout, self.fetch_size) {
                Ok(batch) => batch,
                Err(err) => return Err(self.fail(err)),
            };
            let decoded = {
                let mut fields = self.link.fields.lock();
                batch
                    .rows
                    .iter()
                    .map(|message| -> Result<Vec<DbValue>> {
                        fields.decode_message(message)?;
                        Ok(fields.values())
                    })
                    .collect::<Result<Vec<_>>>()
            };
            match decoded {
                Ok(rows) => self.rows.extend(rows),
                Err(err) => {
                    self.rows.clear();
                    return Err(self.fail(err));
                }
            }
            self.end_of_cursor = batch.end_of_cursor || batch.rows.is_empty();
        }

        Ok(self.rows.pop_front())
    }

    /// Release the server-side cursor of a select-family statement. A no-op
    /// for every other kind.
    pub fn close(&mut self, att: &mut dyn Attachment) -> Result<()> {
        if !self.kind.is_select_family() {
            return Ok(());
        }
        match self.state {
            StatementState::Executed => {
                let handle = self.require_handle()?;
                if self.kind.has_open_cursor() {
                    att.free_statement(handle, FreeOption::Close)?;
                }
                self.clear_array_handles();
                self.rows.clear();
                self.singleton = None;
                self.end_of_cursor = true;
                self.state = StatementState::Closed;
            }
            StatementState::Error => {
                if let Some(handle) = self.handle {
                    if let Err(err) = att.free_statement(handle, FreeOption::Close) {
                        tracing::warn!(target: "fbcore::statement", handle, error = %err, "closing failed cursor");
                    }
                }
                self.clear_array_handles();
            }
            _ => {}
        }
        Ok(())
    }

    /// Drop the prepared form and return to `Deallocated`, whatever the
    /// current state. A failure to free the handle is still reported.
    pub fn release(&mut self, att: &mut dyn Attachment) -> Result<()> {
        let result = match self.handle.take() {
            Some(handle) => att.free_statement(handle, FreeOption::Drop),
            None => Ok(()),
        };
        self.clear_array_handles();
        // A fresh link detaches this statement from every transaction.
        self.link = Arc::new(StatementLink::default());
        self.state = StatementState::Deallocated;
        self.kind = StatementKind::None;
        self.rows.clear();
        self.singleton = None;
        self.end_of_cursor = true;
        self.records_affected = -1;
        if let Err(err) = &result {
            tracing::warn!(target: "fbcore::statement", error = %err, "freeing statement handle failed");
        }
        result
    }

    fn clear_array_handles(&self) {
        self.link.parameters.lock().clear_array_handles();
        self.link.fields.lock().clear_array_handles();
    }

    // ========================================================================
    // Info
    // ========================================================================

    fn query_records_affected(&mut self, att: &mut dyn Attachment) -> Result<i64> {
        let handle = self.require_handle()?;
        let buf = att.statement_info(handle, &ROWS_AFFECTED_ITEMS, ROWS_AFFECTED_BUFFER_SIZE)?;
        parse_records_affected(&buf)
    }

    /// Ask the server for the statement kind.
    pub fn query_kind(&mut self, att: &mut dyn Attachment) -> Result<StatementKind> {
        let handle = self.require_handle()?;
        let buf = att.statement_info(handle, &STATEMENT_TYPE_ITEMS, STATEMENT_TYPE_BUFFER_SIZE)?;
        self.kind = parse_statement_kind(&buf)?;
        Ok(self.kind)
    }

    /// Execution plan text.
    pub fn plan(&mut self, att: &mut dyn Attachment) -> Result<String> {
        let handle = self.require_handle()?;
        let charset = att.charset();
        request_info(
            DEFAULT_MAX_BUFFER_SIZE,
            |len| att.statement_info(handle, &PLAN_ITEMS, len),
            |buf| parse_plan(buf, charset),
        )
    }

    // ========================================================================
    // Arrays
    // ========================================================================

    /// Read the array stored in output column `ordinal` of the current row.
    /// The column's array descriptor is resolved on first use and kept
    /// until the transaction ends.
    pub fn read_array(
        &mut self,
        att: &mut dyn Attachment,
        transaction: &mut Transaction,
        ordinal: usize,
    ) -> Result<Option<DbArray>> {
        let (relation, name, id, cached) = {
            let fields = self.link.fields.lock();
            let field = fields.field(ordinal)?;
            if !field.is_array() {
                return Err(FbError::TypeError(format!("column {} is not an array", ordinal)));
            }
            let id = match field.value() {
                DbValue::Quad(id) => *id,
                DbValue::Null => return Ok(None),
                other => {
                    return Err(FbError::TypeError(format!(
                        "array column holds {}",
                        other.type_name()
                    )))
                }
            };
            (field.relation.clone(), field.name.clone(), id, field.array_handle().cloned())
        };

        let mut handle = match cached {
            Some(handle) => handle,
            None => ArrayHandle::initialize(&mut SqlCatalog::new(att, transaction), &relation, &name)?,
        };
        let array = handle.read(att, transaction, id)?;
        self.link.fields.lock().field_mut(ordinal)?.set_array_handle(handle);
        transaction.register(self.observer());
        Ok(Some(array))
    }

    /// Store `array` and bind its id to parameter `ordinal`.
    pub fn write_array(
        &mut self,
        att: &mut dyn Attachment,
        transaction: &mut Transaction,
        ordinal: usize,
        array: &DbArray,
    ) -> Result<QuadId> {
        let (relation, name, cached) = {
            let params = self.link.parameters.lock();
            let field = params.field(ordinal)?;
            (field.relation.clone(), field.name.clone(), field.array_handle().cloned())
        };
        let mut handle = match cached {
            Some(handle) => handle,
            None => ArrayHandle::initialize(&mut SqlCatalog::new(att, transaction), &relation, &name)?,
        };
        let id = handle.write(att, transaction, array)?;
        {
            let mut params = self.link.parameters.lock();
            let field = params.field_mut(ordinal)?;
            field.set_value(DbValue::Quad(id));
            field.set_array_handle(handle);
        }
        transaction.register(self.observer());
        Ok(id)
    }
}
