//! Row shapes and the native message codec.
//!
//! A [`Descriptor`] describes one input or output message. It serializes
//! to the message-layout opcode stream the server uses to interpret the
//! message, and encodes or decodes the message itself: each field sits at
//! its natural alignment and is followed by a 2-byte null indicator.

use bytes::{BufMut, Bytes, BytesMut};

use super::array::ArrayHandle;
use super::charset::Charset;
use super::protocol::*;
use super::types::{DbDataType, DbValue, ScalarShape, SqlType};
use crate::error::{FbError, Result};

/// Descriptor version tag.
pub const DESCRIPTOR_VERSION: i16 = 1;

const NULL_INDICATOR: i16 = -1;

// ============================================================================
// Field Descriptor
// ============================================================================

#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// Raw wire type; the low bit is the nullability flag.
    pub data_type: i32,
    pub scale: i16,
    pub sub_type: i16,
    pub length: usize,
    pub name: String,
    pub relation: String,
    pub owner: String,
    pub alias: String,
    pub charset: Charset,
    array: Option<ArrayHandle>,
    value: DbValue,
}

impl Default for FieldDescriptor {
    fn default() -> Self {
        Self {
            data_type: 0,
            scale: 0,
            sub_type: 0,
            length: 0,
            name: String::new(),
            relation: String::new(),
            owner: String::new(),
            alias: String::new(),
            charset: Charset::default(),
            array: None,
            value: DbValue::Null,
        }
    }
}

impl FieldDescriptor {
    /// A nullable parameter slot shaped for `kind`.
    pub fn for_kind(kind: DbDataType, length: usize, scale: i16, charset: Charset) -> Self {
        let sub_type = match kind {
            DbDataType::Text => 1,
            DbDataType::Numeric => 1,
            DbDataType::Decimal => 2,
            _ => 0,
        };
        let charset = if kind == DbDataType::Guid {
            Charset::Octets
        } else {
            charset
        };
        Self {
            data_type: kind.data_type(true),
            scale,
            sub_type,
            length,
            charset,
            ..Default::default()
        }
    }

    #[inline]
    pub fn sql_type(&self) -> SqlType {
        SqlType::from_data_type(self.data_type)
    }

    #[inline]
    pub fn is_nullable(&self) -> bool {
        self.data_type & 1 == 1
    }

    pub fn shape(&self) -> ScalarShape {
        ScalarShape {
            sql_type: self.sql_type(),
            sub_type: self.sub_type,
            scale: self.scale,
            length: self.length,
            charset: self.charset,
        }
    }

    pub fn db_data_type(&self) -> Result<DbDataType> {
        self.shape().data_type()
    }

    pub fn is_array(&self) -> bool {
        self.sql_type() == SqlType::ARRAY
    }

    pub fn is_blob(&self) -> bool {
        self.sql_type() == SqlType::BLOB
    }

    /// Name shown to callers: the alias when present.
    pub fn display_name(&self) -> &str {
        if self.alias.is_empty() {
            &self.name
        } else {
            &self.alias
        }
    }

    pub fn value(&self) -> &DbValue {
        &self.value
    }

    pub fn set_value(&mut self, value: DbValue) {
        self.value = value;
    }

    pub fn take_value(&mut self) -> DbValue {
        std::mem::replace(&mut self.value, DbValue::Null)
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    pub fn array_handle(&self) -> Option<&ArrayHandle> {
        self.array.as_ref()
    }

    pub fn array_handle_mut(&mut self) -> Option<&mut ArrayHandle> {
        self.array.as_mut()
    }

    pub fn set_array_handle(&mut self, handle: ArrayHandle) {
        self.array = Some(handle);
    }

    pub fn clear_array_handle(&mut self) {
        self.array = None;
    }

    /// Text columns carry their charset id in the low byte of the sub-type;
    /// NONE falls back to the connection charset.
    pub fn resolve_charset(&mut self, connection: Charset) {
        self.charset = if self.sql_type().is_text() {
            match Charset::from_id((self.sub_type & 0xFF) as i32) {
                Ok(Charset::None) | Err(_) => connection,
                Ok(cs) => cs,
            }
        } else {
            connection
        };
    }

    fn alignment(&self) -> usize {
        match self.sql_type() {
            SqlType::VARYING | SqlType::SHORT => 2,
            SqlType::DOUBLE | SqlType::D_FLOAT | SqlType::INT64 => 8,
            SqlType::FLOAT
            | SqlType::LONG
            | SqlType::TYPE_DATE
            | SqlType::TYPE_TIME
            | SqlType::TIMESTAMP
            | SqlType::BLOB
            | SqlType::ARRAY
            | SqlType::QUAD => 4,
            _ => 1,
        }
    }
}

/// Round `offset` up to a multiple of `alignment` (a power of two).
#[inline]
pub fn blr_align(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) & !(alignment - 1)
}

// ============================================================================
// Descriptor
// ============================================================================

#[derive(Debug, Clone)]
pub struct Descriptor {
    version: i16,
    fields: Vec<FieldDescriptor>,
    actual_count: usize,
}

impl Descriptor {
    pub fn new(count: usize) -> Self {
        Self {
            version: DESCRIPTOR_VERSION,
            fields: vec![FieldDescriptor::default(); count],
            actual_count: count,
        }
    }

    pub fn from_fields(fields: Vec<FieldDescriptor>) -> Self {
        let actual_count = fields.len();
        Self {
            version: DESCRIPTOR_VERSION,
            fields,
            actual_count,
        }
    }

    pub fn version(&self) -> i16 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field count reported by the server, which may differ from the
    /// allocated count until the describe is re-requested.
    pub fn actual_count(&self) -> usize {
        self.actual_count
    }

    pub fn set_actual_count(&mut self, count: usize) {
        self.actual_count = count;
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Result<&FieldDescriptor> {
        self.fields
            .get(index)
            .ok_or_else(|| FbError::StateError(format!("no field at ordinal {}", index)))
    }

    pub fn field_mut(&mut self, index: usize) -> Result<&mut FieldDescriptor> {
        self.fields
            .get_mut(index)
            .ok_or_else(|| FbError::StateError(format!("no field at ordinal {}", index)))
    }

    pub fn set_value(&mut self, index: usize, value: DbValue) -> Result<()> {
        self.field_mut(index)?.set_value(value);
        Ok(())
    }

    pub fn values(&self) -> Vec<DbValue> {
        self.fields.iter().map(|f| f.value.clone()).collect()
    }

    /// Clear value slots, keep the shape.
    pub fn reset(&mut self) {
        for field in &mut self.fields {
            field.value = DbValue::Null;
        }
    }

    pub fn clear_array_handles(&mut self) {
        for field in &mut self.fields {
            field.array = None;
        }
    }

    pub fn has_array_handles(&self) -> bool {
        self.fields.iter().any(|f| f.array.is_some())
    }

    // ========================================================================
    // Message layout
    // ========================================================================

    /// Serialize the shape into the message-layout opcode stream.
    /// Unrecognized wire types emit no opcode.
    pub fn to_message_layout(&self) -> Bytes {
        let mut blr = BytesMut::with_capacity(8 + self.fields.len() * 6);
        let par_count = self.fields.len() * 2;

        blr.put_u8(BLR_VERSION5);
        blr.put_u8(BLR_BEGIN);
        blr.put_u8(BLR_MESSAGE);
        blr.put_u8(0);
        blr.put_u8((par_count & 255) as u8);
        blr.put_u8((par_count >> 8) as u8);

        for field in &self.fields {
            let len = field.length;
            match field.sql_type() {
                SqlType::VARYING => {
                    blr.put_u8(BLR_VARYING);
                    blr.put_u16_le(len as u16);
                }
                SqlType::TEXT | SqlType::NULL => {
                    blr.put_u8(BLR_TEXT);
                    blr.put_u16_le(len as u16);
                }
                SqlType::DOUBLE => blr.put_u8(BLR_DOUBLE),
                SqlType::FLOAT => blr.put_u8(BLR_FLOAT),
                SqlType::D_FLOAT => blr.put_u8(BLR_D_FLOAT),
                SqlType::TYPE_DATE => blr.put_u8(BLR_SQL_DATE),
                SqlType::TYPE_TIME => blr.put_u8(BLR_SQL_TIME),
                SqlType::TIMESTAMP => blr.put_u8(BLR_TIMESTAMP),
                SqlType::BLOB | SqlType::ARRAY => {
                    blr.put_u8(BLR_QUAD);
                    blr.put_u8(0);
                }
                SqlType::LONG => {
                    blr.put_u8(BLR_LONG);
                    blr.put_u8(field.scale as u8);
                }
                SqlType::SHORT => {
                    blr.put_u8(BLR_SHORT);
                    blr.put_u8(field.scale as u8);
                }
                SqlType::INT64 => {
                    blr.put_u8(BLR_INT64);
                    blr.put_u8(field.scale as u8);
                }
                SqlType::QUAD => {
                    blr.put_u8(BLR_QUAD);
                    blr.put_u8(field.scale as u8);
                }
                SqlType::BOOLEAN => blr.put_u8(BLR_BOOL),
                _ => {}
            }

            blr.put_u8(BLR_SHORT);
            blr.put_u8(0);
        }

        blr.put_u8(BLR_END);
        blr.put_u8(BLR_EOC);
        blr.freeze()
    }

    /// Byte length of the message described by [`to_message_layout`].
    ///
    /// [`to_message_layout`]: Descriptor::to_message_layout
    pub fn message_length(&self) -> usize {
        let mut length = 0;
        for field in &self.fields {
            if field.sql_type().blr_type().is_some() || field.sql_type() == SqlType::NULL {
                length = blr_align(length, field.alignment());
                length += field.shape().slot_size();
            }
            length = blr_align(length, 2);
            length += 2;
        }
        length
    }

    // ========================================================================
    // Message codec
    // ========================================================================

    /// Encode the current values into a native message buffer.
    pub fn encode_message(&self) -> Result<Vec<u8>> {
        let mut msg = Vec::with_capacity(self.message_length());
        for field in &self.fields {
            let sql_type = field.sql_type();
            if sql_type.blr_type().is_some() || sql_type == SqlType::NULL {
                msg.resize(blr_align(msg.len(), field.alignment()), 0);
                field.shape().encode(&field.value, &mut msg)?;
            }
            msg.resize(blr_align(msg.len(), 2), 0);
            let indicator: i16 = if field.value.is_null() { NULL_INDICATOR } else { 0 };
            msg.extend_from_slice(&indicator.to_le_bytes());
        }
        Ok(msg)
    }

    /// Decode a native message buffer into the value slots.
    pub fn decode_message(&mut self, msg: &[u8]) -> Result<()> {
        let expected = self.message_length();
        if msg.len() < expected {
            return Err(FbError::ProtocolError(format!(
                "message of {} bytes is shorter than its layout ({} bytes)",
                msg.len(),
                expected
            )));
        }

        let mut offset = 0;
        for field in &mut self.fields {
            let shape = field.shape();
            let mut decoded = None;
            if shape.sql_type.blr_type().is_some() || shape.sql_type == SqlType::NULL {
                offset = blr_align(offset, field.alignment());
                decoded = Some(shape.decode(&msg[offset..])?);
                offset += shape.slot_size();
            }
            offset = blr_align(offset, 2);
            let indicator = i16::from_le_bytes([msg[offset], msg[offset + 1]]);
            offset += 2;

            field.value = match decoded {
                Some(value) if indicator != NULL_INDICATOR => value,
                _ => DbValue::Null,
            };
        }
        Ok(())
    }
}
