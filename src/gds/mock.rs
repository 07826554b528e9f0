//! In-memory backend for scenario tests.
//!
//! `MockAttachment` answers prepare and info requests from scripted
//! statements matched by SQL fragment, keeps blobs and array slices in
//! maps, and records every call the tests assert on.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::array::ArrayBound;
use super::attachment::*;
use super::charset::Charset;
use super::connection::{ConnectionFactory, ConnectionOptions};
use super::descriptor::{Descriptor, FieldDescriptor};
use super::protocol::*;
use super::services::*;
use super::types::{DbDataType, DbValue};
use crate::error::{FbError, Result, ISC_NET_READ_ERR};

// ============================================================================
// Scripted statements
// ============================================================================

#[derive(Debug, Clone, Default)]
pub(crate) struct Script {
    pub kind: i64,
    pub select: Vec<FieldDescriptor>,
    pub bind: Vec<FieldDescriptor>,
    pub rows: Vec<Vec<DbValue>>,
    /// Insert, update and delete counts.
    pub records: (i32, i32, i32),
    pub plan: String,
}

impl Script {
    pub fn new(kind: i64) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn column(mut self, name: &str, kind: DbDataType, length: usize) -> Self {
        let mut field = FieldDescriptor::for_kind(kind, length, 0, Charset::Utf8);
        field.name = name.to_string();
        field.relation = "T".to_string();
        self.select.push(field);
        self
    }

    pub fn array_column(mut self, relation: &str, name: &str) -> Self {
        let mut field = FieldDescriptor::for_kind(DbDataType::Array, 8, 0, Charset::Utf8);
        field.name = name.to_string();
        field.relation = relation.to_string();
        self.select.push(field);
        self
    }

    pub fn param(mut self, kind: DbDataType, length: usize) -> Self {
        self.bind.push(FieldDescriptor::for_kind(kind, length, 0, Charset::Utf8));
        self
    }

    pub fn array_param(mut self, relation: &str, name: &str) -> Self {
        let mut field = FieldDescriptor::for_kind(DbDataType::Array, 8, 0, Charset::Utf8);
        field.name = name.to_string();
        field.relation = relation.to_string();
        self.bind.push(field);
        self
    }

    pub fn row(mut self, values: Vec<DbValue>) -> Self {
        self.rows.push(values);
        self
    }

    pub fn records(mut self, inserted: i32, updated: i32, deleted: i32) -> Self {
        self.records = (inserted, updated, deleted);
        self
    }

    fn encode_row(&self, values: &[DbValue]) -> Result<Vec<u8>> {
        let mut desc = Descriptor::from_fields(self.select.clone());
        for (i, value) in values.iter().enumerate() {
            desc.set_value(i, value.clone())?;
        }
        desc.encode_message()
    }
}

fn push_item(out: &mut Vec<u8>, tag: u8, body: &[u8]) {
    out.push(tag);
    out.extend_from_slice(&(body.len() as u16).to_le_bytes());
    out.extend_from_slice(body);
}

fn push_int(out: &mut Vec<u8>, tag: u8, value: i32) {
    push_item(out, tag, &value.to_le_bytes());
}

fn describe_section(out: &mut Vec<u8>, tag: u8, fields: &[FieldDescriptor]) {
    out.push(tag);
    push_int(out, ISC_INFO_SQL_DESCRIBE_VARS, fields.len() as i32);
    for (i, field) in fields.iter().enumerate() {
        push_int(out, ISC_INFO_SQL_SQLDA_SEQ, i as i32 + 1);
        push_int(out, ISC_INFO_SQL_TYPE, field.data_type);
        push_int(out, ISC_INFO_SQL_SUB_TYPE, field.sub_type as i32);
        push_int(out, ISC_INFO_SQL_SCALE, field.scale as i32);
        push_int(out, ISC_INFO_SQL_LENGTH, field.length as i32);
        push_item(out, ISC_INFO_SQL_FIELD, field.name.as_bytes());
        push_item(out, ISC_INFO_SQL_RELATION, field.relation.as_bytes());
        push_item(out, ISC_INFO_SQL_OWNER, b"SYSDBA");
        push_item(out, ISC_INFO_SQL_ALIAS, field.name.as_bytes());
        out.push(ISC_INFO_SQL_DESCRIBE_END);
    }
}

/// Answer as a server would: a response that does not fit is replaced by
/// a truncation marker.
fn fit(response: Vec<u8>, buffer_length: usize) -> Vec<u8> {
    if response.len() > buffer_length {
        vec![ISC_INFO_TRUNCATED]
    } else {
        response
    }
}

#[derive(Debug)]
struct PreparedRun {
    script: Script,
    cursor: usize,
}

// ============================================================================
// Mock attachment
// ============================================================================

#[derive(Debug)]
pub(crate) struct MockAttachment {
    pub packet_size: usize,
    pub charset: Charset,
    next_handle: Handle,
    next_id: QuadId,
    scripts: Vec<(String, Script)>,
    prepared: HashMap<Handle, PreparedRun>,
    open_blobs: HashMap<Handle, (QuadId, usize)>,
    new_blobs: HashMap<Handle, (QuadId, Vec<u8>)>,

    pub blobs: HashMap<QuadId, Vec<u8>>,
    pub slices: HashMap<QuadId, Vec<u8>>,
    pub put_segments: Vec<usize>,
    pub get_segment_calls: usize,
    pub cancelled_blobs: Vec<Handle>,
    pub closed_blobs: Vec<Handle>,
    pub slice_requests: Vec<usize>,
    pub last_sdl: Vec<u8>,
    pub freed: Vec<(Handle, FreeOption)>,
    pub info_lengths: Vec<usize>,
    pub executed_inputs: Vec<Vec<u8>>,
    pub queued_events: Vec<Vec<u8>>,
    pub cancelled_events: Vec<Handle>,
    pub committed: Vec<Handle>,
    pub rolled_back: Vec<Handle>,

    /// Fail the n-th (1-based) `get_segment` call.
    pub fail_get_segment_at: Option<usize>,
    /// Fail the n-th (1-based) `put_segment` call.
    pub fail_put_segment_at: Option<usize>,
    pub fail_execute: Option<FbError>,
    /// Answer every info request with a truncation marker.
    pub always_truncate: bool,
    /// Cut the row at this index to a single byte whenever it is sent.
    pub short_row_at: Option<usize>,

    alive: Arc<AtomicBool>,
    detached: Arc<AtomicUsize>,
}

impl Default for MockAttachment {
    fn default() -> Self {
        Self {
            packet_size: 8192,
            charset: Charset::Utf8,
            next_handle: 1,
            next_id: 1000,
            scripts: Vec::new(),
            prepared: HashMap::new(),
            open_blobs: HashMap::new(),
            new_blobs: HashMap::new(),
            blobs: HashMap::new(),
            slices: HashMap::new(),
            put_segments: Vec::new(),
            get_segment_calls: 0,
            cancelled_blobs: Vec::new(),
            closed_blobs: Vec::new(),
            slice_requests: Vec::new(),
            last_sdl: Vec::new(),
            freed: Vec::new(),
            info_lengths: Vec::new(),
            executed_inputs: Vec::new(),
            queued_events: Vec::new(),
            cancelled_events: Vec::new(),
            committed: Vec::new(),
            rolled_back: Vec::new(),
            fail_get_segment_at: None,
            fail_put_segment_at: None,
            fail_execute: None,
            always_truncate: false,
            short_row_at: None,
            alive: Arc::new(AtomicBool::new(true)),
            detached: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl MockAttachment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `script` for any SQL containing `fragment`.
    pub fn script(&mut self, fragment: &str, script: Script) -> &mut Self {
        self.scripts.push((fragment.to_string(), script));
        self
    }

    /// Catalog answers for a one-dimensional INTEGER array column.
    pub fn int_array_catalog(&mut self, relation: &str, field: &str, bound: ArrayBound) -> &mut Self {
        let source = format!("RDB${}_{}", relation, field);
        let desc = Script::new(1)
            .column("RDB$FIELD_TYPE", DbDataType::SmallInt, 2)
            .column("RDB$FIELD_SCALE", DbDataType::SmallInt, 2)
            .column("RDB$FIELD_LENGTH", DbDataType::SmallInt, 2)
            .column("RDB$DIMENSIONS", DbDataType::SmallInt, 2)
            .column("RDB$FIELD_SOURCE", DbDataType::Char, 31)
            .param(DbDataType::VarChar, 31)
            .param(DbDataType::VarChar, 31)
            .row(vec![
                DbValue::SmallInt(BLR_LONG as i16),
                DbValue::SmallInt(0),
                DbValue::SmallInt(4),
                DbValue::SmallInt(1),
                DbValue::Text(source),
            ]);
        let bounds = Script::new(1)
            .column("RDB$LOWER_BOUND", DbDataType::Integer, 4)
            .column("RDB$UPPER_BOUND", DbDataType::Integer, 4)
            .param(DbDataType::VarChar, 31)
            .row(vec![DbValue::Integer(bound.lower), DbValue::Integer(bound.upper)]);
        self.script("RDB$RELATION_FIELDS", desc);
        self.script("RDB$FIELD_DIMENSIONS", bounds);
        self
    }

    pub fn alive_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.alive)
    }

    pub fn detach_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.detached)
    }

    fn handle(&mut self) -> Handle {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    fn quad(&mut self) -> QuadId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn run(&mut self, statement: Handle) -> Result<&mut PreparedRun> {
        self.prepared
            .get_mut(&statement)
            .ok_or_else(|| FbError::server(335544485, "invalid statement handle"))
    }

    fn info_response(&self, run: &PreparedRun, items: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for item in items {
            match *item {
                ISC_INFO_SQL_STMT_TYPE => push_int(&mut out, ISC_INFO_SQL_STMT_TYPE, run.script.kind as i32),
                ISC_INFO_SQL_SELECT => describe_section(&mut out, ISC_INFO_SQL_SELECT, &run.script.select),
                ISC_INFO_SQL_BIND => describe_section(&mut out, ISC_INFO_SQL_BIND, &run.script.bind),
                ISC_INFO_SQL_RECORDS => {
                    let (inserted, updated, deleted) = run.script.records;
                    let mut counts = Vec::new();
                    push_int(&mut counts, ISC_INFO_REQ_INSERT_COUNT, inserted);
                    push_int(&mut counts, ISC_INFO_REQ_UPDATE_COUNT, updated);
                    push_int(&mut counts, ISC_INFO_REQ_DELETE_COUNT, deleted);
                    counts.push(ISC_INFO_END);
                    push_item(&mut out, ISC_INFO_SQL_RECORDS, &counts);
                }
                ISC_INFO_SQL_GET_PLAN => {
                    let text = format!("\n{}", run.script.plan);
                    push_item(&mut out, ISC_INFO_SQL_GET_PLAN, text.as_bytes());
                }
                _ => {}
            }
        }
        out.push(ISC_INFO_END);
        out
    }
}

impl Attachment for MockAttachment {
    fn packet_size(&self) -> usize {
        self.packet_size
    }

    fn charset(&self) -> Charset {
        self.charset
    }

    fn dialect(&self) -> u16 {
        3
    }

    fn detach(&mut self) -> Result<()> {
        self.detached.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn verify(&mut self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn database_info(&mut self, _items: &[u8], _buffer_length: usize) -> Result<Vec<u8>> {
        Ok(vec![ISC_INFO_END])
    }

    fn start_transaction(&mut self, _tpb: &[u8]) -> Result<Handle> {
        Ok(self.handle())
    }

    fn commit(&mut self, transaction: Handle) -> Result<()> {
        self.committed.push(transaction);
        Ok(())
    }

    fn commit_retaining(&mut self, _transaction: Handle) -> Result<()> {
        Ok(())
    }

    fn rollback(&mut self, transaction: Handle) -> Result<()> {
        self.rolled_back.push(transaction);
        Ok(())
    }

    fn rollback_retaining(&mut self, _transaction: Handle) -> Result<()> {
        Ok(())
    }

    fn allocate_statement(&mut self) -> Result<Handle> {
        Ok(self.handle())
    }

    fn prepare(
        &mut self,
        _transaction: Handle,
        statement: Handle,
        sql: &str,
        _dialect: u16,
        items: &[u8],
        buffer_length: usize,
    ) -> Result<Vec<u8>> {
        let script = self
            .scripts
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, script)| script.clone())
            .ok_or_else(|| FbError::server(335544569, format!("Dynamic SQL Error: {}", sql)))?;
        let run = PreparedRun { script, cursor: 0 };
        self.info_lengths.push(buffer_length);
        let response = if self.always_truncate {
            vec![ISC_INFO_TRUNCATED]
        } else {
            fit(self.info_response(&run, items), buffer_length)
        };
        self.prepared.insert(statement, run);
        Ok(response)
    }

    fn statement_info(&mut self, statement: Handle, items: &[u8], buffer_length: usize) -> Result<Vec<u8>> {
        self.info_lengths.push(buffer_length);
        if self.always_truncate {
            return Ok(vec![ISC_INFO_TRUNCATED]);
        }
        let run = self
            .prepared
            .get(&statement)
            .ok_or_else(|| FbError::server(335544485, "invalid statement handle"))?;
        Ok(fit(self.info_response(run, items), buffer_length))
    }

    fn execute(
        &mut self,
        _transaction: Handle,
        statement: Handle,
        _input_layout: &[u8],
        input_message: &[u8],
        output_layout: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        if let Some(err) = self.fail_execute.take() {
            return Err(err);
        }
        self.executed_inputs.push(input_message.to_vec());
        let short = self.short_row_at == Some(0);
        let run = self.run(statement)?;
        run.cursor = 0;
        if output_layout.is_empty() {
            return Ok(None);
        }
        match run.script.rows.first() {
            Some(row) => run.script.encode_row(row).map(|mut msg| {
                if short {
                    msg.truncate(1);
                }
                Some(msg)
            }),
            None => Ok(None),
        }
    }

    fn fetch(&mut self, statement: Handle, _output_layout: &[u8], fetch_size: usize) -> Result<FetchBatch> {
        let short_row_at = self.short_row_at;
        let run = self.run(statement)?;
        let end = (run.cursor + fetch_size).min(run.script.rows.len());
        let rows = (run.cursor..end)
            .map(|i| -> Result<Vec<u8>> {
                let mut msg = run.script.encode_row(&run.script.rows[i])?;
                if short_row_at == Some(i) {
                    msg.truncate(1);
                }
                Ok(msg)
            })
            .collect::<Result<Vec<_>>>()?;
        run.cursor = end;
        Ok(FetchBatch {
            rows,
            end_of_cursor: end == run.script.rows.len(),
        })
    }

    fn free_statement(&mut self, statement: Handle, option: FreeOption) -> Result<()> {
        self.freed.push((statement, option));
        if option == FreeOption::Drop {
            self.prepared.remove(&statement);
        }
        Ok(())
    }

    fn create_blob(&mut self, _transaction: Handle) -> Result<(Handle, QuadId)> {
        let handle = self.handle();
        let id = self.quad();
        self.new_blobs.insert(handle, (id, Vec::new()));
        Ok((handle, id))
    }

    fn open_blob(&mut self, _transaction: Handle, blob_id: QuadId) -> Result<Handle> {
        if !self.blobs.contains_key(&blob_id) {
            return Err(FbError::server(335544329, "invalid BLOB ID"));
        }
        let handle = self.handle();
        self.open_blobs.insert(handle, (blob_id, 0));
        Ok(handle)
    }

    fn get_segment(&mut self, blob: Handle, max_length: usize) -> Result<Segment> {
        self.get_segment_calls += 1;
        if self.fail_get_segment_at == Some(self.get_segment_calls) {
            return Err(FbError::server(ISC_NET_READ_ERR, "connection lost reading blob"));
        }
        let (id, offset) = self
            .open_blobs
            .get_mut(&blob)
            .ok_or_else(|| FbError::server(335544328, "invalid BLOB handle"))?;
        let data = self.blobs.get(id).map(Vec::as_slice).unwrap_or(&[]);
        if *offset >= data.len() {
            return Ok(Segment {
                data: Vec::new(),
                status: SegmentStatus::Eof,
            });
        }
        let end = (*offset + max_length).min(data.len());
        let chunk = data[*offset..end].to_vec();
        *offset = end;
        Ok(Segment {
            data: chunk,
            status: SegmentStatus::Complete,
        })
    }

    fn put_segment(&mut self, blob: Handle, data: &[u8]) -> Result<()> {
        if self.fail_put_segment_at == Some(self.put_segments.len() + 1) {
            return Err(FbError::server(ISC_NET_READ_ERR, "connection lost writing blob"));
        }
        let (_, buf) = self
            .new_blobs
            .get_mut(&blob)
            .ok_or_else(|| FbError::server(335544328, "invalid BLOB handle"))?;
        buf.extend_from_slice(data);
        self.put_segments.push(data.len());
        Ok(())
    }

    fn close_blob(&mut self, blob: Handle) -> Result<()> {
        self.closed_blobs.push(blob);
        if let Some((id, data)) = self.new_blobs.remove(&blob) {
            self.blobs.insert(id, data);
        }
        self.open_blobs.remove(&blob);
        Ok(())
    }

    fn cancel_blob(&mut self, blob: Handle) -> Result<()> {
        self.cancelled_blobs.push(blob);
        self.new_blobs.remove(&blob);
        self.open_blobs.remove(&blob);
        Ok(())
    }

    fn get_slice(
        &mut self,
        _transaction: Handle,
        array_id: QuadId,
        sdl: &[u8],
        slice_length: usize,
    ) -> Result<Vec<u8>> {
        self.last_sdl = sdl.to_vec();
        self.slice_requests.push(slice_length);
        let mut slice = self.slices.get(&array_id).cloned().unwrap_or_default();
        slice.resize(slice_length, 0);
        Ok(slice)
    }

    fn put_slice(&mut self, _transaction: Handle, _array_id: QuadId, sdl: &[u8], slice: &[u8]) -> Result<QuadId> {
        self.last_sdl = sdl.to_vec();
        let id = self.quad();
        self.slices.insert(id, slice.to_vec());
        Ok(id)
    }

    fn queue_events(&mut self, epb: &[u8]) -> Result<Handle> {
        self.queued_events.push(epb.to_vec());
        Ok(self.handle())
    }

    fn cancel_events(&mut self, event: Handle) -> Result<()> {
        self.cancelled_events.push(event);
        Ok(())
    }
}

// ============================================================================
// Mock factory
// ============================================================================

#[derive(Debug, Default)]
pub(crate) struct MockFactory {
    pub connects: AtomicUsize,
    pub detached: Arc<AtomicUsize>,
    pub fail: AtomicBool,
    /// Liveness flags of every attachment handed out, in creation order.
    pub alive: parking_lot::Mutex<Vec<Arc<AtomicBool>>>,
}

impl MockFactory {
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn detach_count(&self) -> usize {
        self.detached.load(Ordering::SeqCst)
    }
}

impl ConnectionFactory for MockFactory {
    fn connect(&self, _options: &ConnectionOptions) -> Result<Box<dyn Attachment>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(FbError::server(335544344, "I/O error during open"));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        let mut att = MockAttachment::new();
        att.detached = Arc::clone(&self.detached);
        self.alive.lock().push(att.alive_flag());
        Ok(Box::new(att))
    }
}

// ============================================================================
// Mock services manager
// ============================================================================

#[derive(Debug, Default)]
pub(crate) struct MockServiceManager {
    pub server_version: String,
    pub lines: VecDeque<String>,
    pub users: Vec<(String, i32)>,
    /// Buffer length of every query.
    pub query_lengths: Vec<usize>,
    pub started: Vec<Vec<u8>>,
    pub attached: Option<(String, Vec<u8>)>,
    pub detached: bool,
}

impl ServiceManager for MockServiceManager {
    fn attach(&mut self, service: &str, spb: &[u8]) -> Result<()> {
        self.attached = Some((service.to_string(), spb.to_vec()));
        Ok(())
    }

    fn detach(&mut self) -> Result<()> {
        self.detached = true;
        Ok(())
    }

    fn start(&mut self, spb: &[u8]) -> Result<()> {
        self.started.push(spb.to_vec());
        Ok(())
    }

    fn query(&mut self, _send_spb: &[u8], items: &[u8], buffer_length: usize) -> Result<Vec<u8>> {
        self.query_lengths.push(buffer_length);
        let mut out = Vec::new();
        for item in items {
            match *item {
                ISC_INFO_SVC_SERVER_VERSION => {
                    push_item(&mut out, ISC_INFO_SVC_SERVER_VERSION, self.server_version.as_bytes())
                }
                ISC_INFO_SVC_LINE => {
                    let line = self.lines.front().cloned().unwrap_or_default();
                    push_item(&mut out, ISC_INFO_SVC_LINE, line.as_bytes());
                }
                ISC_INFO_SVC_GET_USERS => {
                    let mut body = Vec::new();
                    for (name, uid) in &self.users {
                        push_item(&mut body, ISC_SPB_SEC_USERNAME, name.as_bytes());
                        body.push(ISC_SPB_SEC_USERID);
                        body.extend_from_slice(&uid.to_le_bytes());
                    }
                    push_item(&mut out, ISC_INFO_SVC_GET_USERS, &body);
                }
                _ => {}
            }
        }
        out.push(ISC_INFO_END);
        let response = fit(out, buffer_length);
        // A line is consumed only when it was actually delivered.
        if items.contains(&ISC_INFO_SVC_LINE) && !is_truncated(&response) {
            self.lines.pop_front();
        }
        Ok(response)
    }
}
