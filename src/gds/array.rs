//! Array columns.
//!
//! An array value travels as one slice: every element in row-major order,
//! each in its native slot (`length` bytes, plus a 2-byte length prefix
//! for varying text). The slice is described to the server with a small
//! slice description language (SDL) built from the array descriptor.

use smallvec::SmallVec;

use super::attachment::{Attachment, QuadId};
use super::charset::Charset;
use super::protocol::*;
use super::statement::Statement;
use super::transaction::Transaction;
use super::types::{DbArray, DbValue, ScalarShape, SqlType};
use crate::error::{FbError, Result};

pub const MAX_DIMENSIONS: usize = 16;

// ============================================================================
// SDL codes
// ============================================================================

const ISC_SDL_VERSION1: u8 = 1;
const ISC_SDL_RELATION: u8 = 2;
const ISC_SDL_FIELD: u8 = 4;
const ISC_SDL_STRUCT: u8 = 6;
const ISC_SDL_VARIABLE: u8 = 7;
const ISC_SDL_SCALAR: u8 = 8;
const ISC_SDL_TINY_INTEGER: u8 = 9;
const ISC_SDL_SHORT_INTEGER: u8 = 10;
const ISC_SDL_LONG_INTEGER: u8 = 11;
const ISC_SDL_DO2: u8 = 34;
const ISC_SDL_DO1: u8 = 35;
const ISC_SDL_ELEMENT: u8 = 36;
const ISC_SDL_EOC: u8 = 255;

// ============================================================================
// Catalog lookups
// ============================================================================

const ARRAY_DESC_SQL: &str = "SELECT Y.RDB$FIELD_TYPE, Y.RDB$FIELD_SCALE, Y.RDB$FIELD_LENGTH, \
     Y.RDB$DIMENSIONS, X.RDB$FIELD_SOURCE \
     FROM RDB$RELATION_FIELDS X, RDB$FIELDS Y \
     WHERE X.RDB$FIELD_SOURCE = Y.RDB$FIELD_NAME \
     AND X.RDB$RELATION_NAME = ? AND X.RDB$FIELD_NAME = ?";

const ARRAY_BOUNDS_SQL: &str = "SELECT X.RDB$LOWER_BOUND, X.RDB$UPPER_BOUND \
     FROM RDB$FIELD_DIMENSIONS X \
     WHERE X.RDB$FIELD_NAME = ? \
     ORDER BY X.RDB$DIMENSION";

/// Element metadata of an array column, as stored in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayElementInfo {
    /// Element type as a message-layout opcode.
    pub blr_type: u8,
    pub scale: i16,
    pub length: usize,
    pub dimensions: usize,
    /// Domain the column is based on; dimensions are keyed by it.
    pub field_source: String,
}

/// Source of array metadata.
pub trait ArrayCatalog {
    fn element_info(&mut self, relation: &str, field: &str) -> Result<Option<ArrayElementInfo>>;
    fn bounds(&mut self, field_source: &str) -> Result<Vec<ArrayBound>>;
}

/// Catalog lookups issued as ordinary statements inside `transaction`.
pub struct SqlCatalog<'a> {
    att: &'a mut dyn Attachment,
    transaction: &'a mut Transaction,
}

impl<'a> SqlCatalog<'a> {
    pub fn new(att: &'a mut dyn Attachment, transaction: &'a mut Transaction) -> Self {
        Self { att, transaction }
    }

    fn query(&mut self, sql: &str, params: Vec<DbValue>) -> Result<Vec<Vec<DbValue>>> {
        let mut stmt = Statement::new(self.att.dialect());
        let result: Result<Vec<Vec<DbValue>>> = (|| {
            stmt.prepare(self.att, self.transaction, sql)?;
            for (i, value) in params.into_iter().enumerate() {
                stmt.set_parameter(i, value)?;
            }
            stmt.execute(self.att, self.transaction)?;
            let mut rows = Vec::new();
            while let Some(row) = stmt.fetch(self.att)? {
                rows.push(row);
            }
            Ok(rows)
        })();
        let released = stmt.release(self.att);
        let rows = result?;
        released?;
        Ok(rows)
    }
}

impl ArrayCatalog for SqlCatalog<'_> {
    fn element_info(&mut self, relation: &str, field: &str) -> Result<Option<ArrayElementInfo>> {
        let rows = self.query(
            ARRAY_DESC_SQL,
            vec![DbValue::Text(relation.to_string()), DbValue::Text(field.to_string())],
        )?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };
        if row.len() < 5 {
            return Err(FbError::ProtocolError(format!(
                "array descriptor row has {} columns",
                row.len()
            )));
        }
        let field_source = match &row[4] {
            DbValue::Text(s) => s.trim().to_string(),
            other => {
                return Err(FbError::TypeError(format!(
                    "unexpected field source value {}",
                    other.type_name()
                )))
            }
        };
        Ok(Some(ArrayElementInfo {
            blr_type: row[0].as_i64()? as u8,
            scale: row[1].as_i64()? as i16,
            length: row[2].as_i64()? as usize,
            dimensions: row[3].as_i64()? as usize,
            field_source,
        }))
    }

    fn bounds(&mut self, field_source: &str) -> Result<Vec<ArrayBound>> {
        let rows = self.query(ARRAY_BOUNDS_SQL, vec![DbValue::Text(field_source.to_string())])?;
        rows.iter()
            .map(|row| -> Result<ArrayBound> {
                let lower = row.first().map(|v| v.as_i64()).transpose()?.unwrap_or(0) as i32;
                let upper = row.get(1).map(|v| v.as_i64()).transpose()?.unwrap_or(0) as i32;
                Ok(ArrayBound { lower, upper })
            })
            .collect()
    }
}

// ============================================================================
// Array descriptor
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArrayBound {
    pub lower: i32,
    pub upper: i32,
}

impl ArrayBound {
    pub fn extent(&self) -> usize {
        (self.upper - self.lower + 1).max(0) as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayDesc {
    pub relation: String,
    pub field: String,
    pub blr_type: u8,
    pub scale: i16,
    pub length: usize,
    pub bounds: SmallVec<[ArrayBound; MAX_DIMENSIONS]>,
}

impl ArrayDesc {
    pub fn dimensions(&self) -> usize {
        self.bounds.len()
    }

    pub fn element_count(&self) -> usize {
        self.bounds.iter().map(ArrayBound::extent).product()
    }

    fn is_varying(&self) -> bool {
        matches!(self.blr_type, BLR_VARYING | BLR_VARYING2)
    }

    /// Wire type of one element.
    pub fn element_type(&self) -> Result<SqlType> {
        Ok(match self.blr_type {
            BLR_SHORT => SqlType::SHORT,
            BLR_LONG => SqlType::LONG,
            BLR_INT64 => SqlType::INT64,
            BLR_QUAD => SqlType::QUAD,
            BLR_FLOAT => SqlType::FLOAT,
            BLR_DOUBLE => SqlType::DOUBLE,
            BLR_D_FLOAT => SqlType::D_FLOAT,
            BLR_TEXT | BLR_TEXT2 | BLR_CSTRING | BLR_CSTRING2 => SqlType::TEXT,
            BLR_VARYING | BLR_VARYING2 => SqlType::VARYING,
            BLR_SQL_DATE => SqlType::TYPE_DATE,
            BLR_SQL_TIME => SqlType::TYPE_TIME,
            BLR_TIMESTAMP => SqlType::TIMESTAMP,
            BLR_BOOL => SqlType::BOOLEAN,
            other => return Err(FbError::UnsupportedType(other as i32)),
        })
    }

    pub fn element_shape(&self, charset: Charset) -> Result<ScalarShape> {
        Ok(ScalarShape {
            sql_type: self.element_type()?,
            sub_type: 0,
            scale: self.scale,
            length: self.length,
            charset,
        })
    }

    /// Bytes in a whole slice: elements times element length, plus a
    /// 2-byte prefix per element for varying text.
    pub fn slice_length(&self) -> usize {
        let elements = self.element_count();
        let mut length = elements * self.length;
        if self.is_varying() {
            length += elements * 2;
        }
        length
    }

    /// Reshape the upper bounds to the extents of `array`, keeping each
    /// dimension's lower bound.
    pub fn fit_to(&mut self, array: &DbArray) -> Result<()> {
        if array.rank() != self.dimensions() {
            return Err(FbError::TypeError(format!(
                "array of rank {} written to a column of rank {}",
                array.rank(),
                self.dimensions()
            )));
        }
        for (bound, len) in self.bounds.iter_mut().zip(&array.lengths) {
            bound.upper = *len as i32 - 1 + bound.lower;
        }
        Ok(())
    }

    /// Slice description for `get_slice`/`put_slice`.
    pub fn to_sdl(&self) -> Result<Vec<u8>> {
        let dimensions = self.dimensions();
        if dimensions > MAX_DIMENSIONS {
            return Err(FbError::InvalidDimension(dimensions));
        }

        let mut sdl = vec![ISC_SDL_VERSION1, ISC_SDL_STRUCT, 1, self.blr_type];
        match self.blr_type {
            BLR_SHORT | BLR_LONG | BLR_INT64 | BLR_QUAD => sdl.push(self.scale as u8),
            BLR_TEXT | BLR_CSTRING | BLR_VARYING => {
                sdl.extend_from_slice(&(self.length as i16).to_le_bytes())
            }
            _ => {}
        }

        stuff_string(&mut sdl, ISC_SDL_RELATION, &self.relation)?;
        stuff_string(&mut sdl, ISC_SDL_FIELD, &self.field)?;

        for (n, bound) in self.bounds.iter().enumerate() {
            if bound.lower == 1 {
                sdl.extend_from_slice(&[ISC_SDL_DO1, n as u8]);
            } else {
                sdl.extend_from_slice(&[ISC_SDL_DO2, n as u8]);
                stuff_literal(&mut sdl, bound.lower);
            }
            stuff_literal(&mut sdl, bound.upper);
        }

        sdl.extend_from_slice(&[ISC_SDL_ELEMENT, 1, ISC_SDL_SCALAR, 0, dimensions as u8]);
        for n in 0..dimensions {
            sdl.extend_from_slice(&[ISC_SDL_VARIABLE, n as u8]);
        }
        sdl.push(ISC_SDL_EOC);
        Ok(sdl)
    }
}

fn stuff_literal(sdl: &mut Vec<u8>, literal: i32) {
    if (-128..=127).contains(&literal) {
        sdl.extend_from_slice(&[ISC_SDL_TINY_INTEGER, literal as u8]);
    } else if (-32768..=32767).contains(&literal) {
        sdl.push(ISC_SDL_SHORT_INTEGER);
        sdl.extend_from_slice(&(literal as i16).to_le_bytes());
    } else {
        sdl.push(ISC_SDL_LONG_INTEGER);
        sdl.extend_from_slice(&literal.to_le_bytes());
    }
}

fn stuff_string(sdl: &mut Vec<u8>, code: u8, value: &str) -> Result<()> {
    let len = u8::try_from(value.len())
        .map_err(|_| FbError::ProtocolError(format!("name too long for SDL: {}", value)))?;
    sdl.push(code);
    sdl.push(len);
    sdl.extend_from_slice(value.as_bytes());
    Ok(())
}

// ============================================================================
// Array handle
// ============================================================================

/// Resolved array metadata plus the id and size of the last slice moved.
#[derive(Debug, Clone)]
pub struct ArrayHandle {
    desc: ArrayDesc,
    handle: QuadId,
    slice_length: usize,
}

impl ArrayHandle {
    /// Resolve the column's descriptor with two catalog lookups.
    pub fn initialize(catalog: &mut dyn ArrayCatalog, relation: &str, field: &str) -> Result<Self> {
        let info = catalog
            .element_info(relation, field)?
            .ok_or_else(|| FbError::NotDescribable {
                relation: relation.to_string(),
                field: field.to_string(),
            })?;

        let mut bounds = catalog.bounds(&info.field_source)?;
        if bounds.len() > MAX_DIMENSIONS || info.dimensions > MAX_DIMENSIONS {
            return Err(FbError::InvalidDimension(bounds.len().max(info.dimensions)));
        }
        if info.dimensions > 0 {
            bounds.truncate(info.dimensions);
        }

        tracing::debug!(
            target: "fbcore::array",
            relation,
            field,
            dimensions = bounds.len(),
            blr_type = info.blr_type,
            "array descriptor resolved"
        );

        Ok(Self::from_desc(ArrayDesc {
            relation: relation.to_string(),
            field: field.to_string(),
            blr_type: info.blr_type,
            scale: info.scale,
            length: info.length,
            bounds: bounds.into_iter().collect(),
        }))
    }

    pub fn from_desc(desc: ArrayDesc) -> Self {
        Self {
            desc,
            handle: 0,
            slice_length: 0,
        }
    }

    pub fn desc(&self) -> &ArrayDesc {
        &self.desc
    }

    pub fn handle(&self) -> QuadId {
        self.handle
    }

    /// Size of the most recent slice read or written.
    pub fn last_slice_length(&self) -> usize {
        self.slice_length
    }

    pub fn slice_length(&self) -> usize {
        self.desc.slice_length()
    }

    pub fn read(
        &mut self,
        att: &mut dyn Attachment,
        transaction: &Transaction,
        array_id: QuadId,
    ) -> Result<DbArray> {
        let sdl = self.desc.to_sdl()?;
        let length = self.desc.slice_length();
        let slice = att.get_slice(transaction.handle(), array_id, &sdl, length)?;
        self.handle = array_id;
        self.slice_length = slice.len();
        self.decode_slice(&slice, att.charset())
    }

    /// Write `array` as a new slice and return its id.
    pub fn write(
        &mut self,
        att: &mut dyn Attachment,
        transaction: &Transaction,
        array: &DbArray,
    ) -> Result<QuadId> {
        self.desc.fit_to(array)?;
        let sdl = self.desc.to_sdl()?;
        let slice = self.encode_slice(array, att.charset())?;
        let id = att.put_slice(transaction.handle(), 0, &sdl, &slice)?;
        tracing::debug!(target: "fbcore::array", field = %self.desc.field, bytes = slice.len(), "slice written");
        self.handle = id;
        self.slice_length = slice.len();
        Ok(id)
    }

    pub fn decode_slice(&self, slice: &[u8], charset: Charset) -> Result<DbArray> {
        let shape = self.desc.element_shape(charset)?;
        let step = shape.slot_size();
        let count = self.desc.element_count();
        if slice.len() < count * step {
            return Err(FbError::ProtocolError(format!(
                "slice of {} bytes is short of {} elements",
                slice.len(),
                count
            )));
        }
        let elements = slice
            .chunks_exact(step)
            .take(count)
            .map(|chunk| shape.decode(chunk))
            .collect::<Result<Vec<_>>>()?;
        DbArray::new(
            self.desc.bounds.iter().map(|b| b.lower).collect(),
            self.desc.bounds.iter().map(ArrayBound::extent).collect(),
            elements,
        )
    }

    pub fn encode_slice(&self, array: &DbArray, charset: Charset) -> Result<Vec<u8>> {
        let shape = self.desc.element_shape(charset)?;
        let mut slice = Vec::with_capacity(self.desc.slice_length());
        for element in &array.elements {
            shape.encode(element, &mut slice)?;
        }
        Ok(slice)
    }
}
