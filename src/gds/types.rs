//! Wire type codes, logical kinds and scalar value conversion.
//!
//! A column is described by its wire code plus sub-type, scale, byte length
//! and charset. From these the logical kind is derived, and values move
//! between host form ([`DbValue`]) and their fixed-width native slot.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::charset::Charset;
use super::protocol::*;
use crate::error::{FbError, Result};

// ============================================================================
// Wire type codes
// ============================================================================

/// Wire scalar type code with the nullability bit stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SqlType(pub i32);

impl SqlType {
    pub const TEXT: SqlType = SqlType(452);
    pub const VARYING: SqlType = SqlType(448);
    pub const SHORT: SqlType = SqlType(500);
    pub const LONG: SqlType = SqlType(496);
    pub const FLOAT: SqlType = SqlType(482);
    pub const DOUBLE: SqlType = SqlType(480);
    pub const D_FLOAT: SqlType = SqlType(530);
    pub const TIMESTAMP: SqlType = SqlType(510);
    pub const BLOB: SqlType = SqlType(520);
    pub const ARRAY: SqlType = SqlType(540);
    pub const QUAD: SqlType = SqlType(550);
    pub const TYPE_TIME: SqlType = SqlType(560);
    pub const TYPE_DATE: SqlType = SqlType(570);
    pub const INT64: SqlType = SqlType(580);
    pub const BOOLEAN: SqlType = SqlType(32764);
    pub const NULL: SqlType = SqlType(32766);

    /// Strip the nullability bit from a raw `DataType`.
    #[inline]
    pub fn from_data_type(data_type: i32) -> Self {
        SqlType(data_type & !1)
    }

    /// Raw `DataType` with the nullability bit applied.
    #[inline]
    pub fn data_type(self, nullable: bool) -> i32 {
        if nullable {
            self.0 | 1
        } else {
            self.0
        }
    }

    pub fn is_integer_container(self) -> bool {
        matches!(
            self,
            SqlType::SHORT | SqlType::LONG | SqlType::INT64 | SqlType::QUAD
        )
    }

    pub fn is_text(self) -> bool {
        matches!(self, SqlType::TEXT | SqlType::VARYING)
    }

    /// Message-layout opcode for this type.
    pub fn blr_type(self) -> Option<i32> {
        Some(match self {
            SqlType::VARYING => BLR_VARYING as i32,
            SqlType::TEXT => BLR_TEXT as i32,
            SqlType::DOUBLE => BLR_DOUBLE as i32,
            SqlType::FLOAT => BLR_FLOAT as i32,
            SqlType::D_FLOAT => BLR_D_FLOAT as i32,
            SqlType::TYPE_DATE => BLR_SQL_DATE as i32,
            SqlType::TYPE_TIME => BLR_SQL_TIME as i32,
            SqlType::TIMESTAMP => BLR_TIMESTAMP as i32,
            SqlType::BLOB => BLR_BLOB,
            SqlType::ARRAY | SqlType::QUAD => BLR_QUAD as i32,
            SqlType::LONG => BLR_LONG as i32,
            SqlType::SHORT => BLR_SHORT as i32,
            SqlType::INT64 => BLR_INT64 as i32,
            SqlType::BOOLEAN => BLR_BOOL as i32,
            _ => return None,
        })
    }
}

// ============================================================================
// Logical kinds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbDataType {
    Char,
    VarChar,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Double,
    Numeric,
    Decimal,
    Date,
    Time,
    TimeStamp,
    /// Text blob (sub-type 1).
    Text,
    Binary,
    Array,
    Guid,
    Boolean,
    Null,
}

impl DbDataType {
    /// Derive the logical kind of a described column.
    pub fn from_wire(
        sql_type: SqlType,
        sub_type: i16,
        scale: i16,
        length: usize,
        charset: Charset,
    ) -> Result<Self> {
        let scaled = |plain: DbDataType| match sub_type {
            2 => DbDataType::Decimal,
            1 => DbDataType::Numeric,
            _ if scale < 0 => DbDataType::Decimal,
            _ => plain,
        };

        Ok(match sql_type {
            SqlType::TEXT | SqlType::VARYING if length == 16 && charset.is_octets() => {
                DbDataType::Guid
            }
            SqlType::TEXT => DbDataType::Char,
            SqlType::VARYING => DbDataType::VarChar,
            SqlType::SHORT => scaled(DbDataType::SmallInt),
            SqlType::LONG => scaled(DbDataType::Integer),
            SqlType::INT64 | SqlType::QUAD => scaled(DbDataType::BigInt),
            SqlType::FLOAT => DbDataType::Float,
            SqlType::DOUBLE | SqlType::D_FLOAT => scaled(DbDataType::Double),
            SqlType::BLOB if sub_type == 1 => DbDataType::Text,
            SqlType::BLOB => DbDataType::Binary,
            SqlType::TIMESTAMP => DbDataType::TimeStamp,
            SqlType::TYPE_TIME => DbDataType::Time,
            SqlType::TYPE_DATE => DbDataType::Date,
            SqlType::ARRAY => DbDataType::Array,
            SqlType::BOOLEAN => DbDataType::Boolean,
            SqlType::NULL => DbDataType::Null,
            SqlType(other) => return Err(FbError::UnsupportedType(other)),
        })
    }

    /// Wire code used to send a value of this kind.
    pub fn sql_type(self) -> SqlType {
        match self {
            DbDataType::Char | DbDataType::Guid => SqlType::TEXT,
            DbDataType::VarChar => SqlType::VARYING,
            DbDataType::SmallInt => SqlType::SHORT,
            DbDataType::Integer => SqlType::LONG,
            DbDataType::BigInt | DbDataType::Numeric | DbDataType::Decimal => SqlType::INT64,
            DbDataType::Float => SqlType::FLOAT,
            DbDataType::Double => SqlType::DOUBLE,
            DbDataType::Date => SqlType::TYPE_DATE,
            DbDataType::Time => SqlType::TYPE_TIME,
            DbDataType::TimeStamp => SqlType::TIMESTAMP,
            DbDataType::Text | DbDataType::Binary => SqlType::BLOB,
            DbDataType::Array => SqlType::ARRAY,
            DbDataType::Boolean => SqlType::BOOLEAN,
            DbDataType::Null => SqlType::NULL,
        }
    }

    /// Raw `DataType` including the nullability bit.
    pub fn data_type(self, nullable: bool) -> i32 {
        self.sql_type().data_type(nullable)
    }
}

// ============================================================================
// Host values
// ============================================================================

/// A dimensioned array value in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct DbArray {
    pub lower_bounds: Vec<i32>,
    pub lengths: Vec<usize>,
    pub elements: Vec<DbValue>,
}

impl DbArray {
    pub fn new(lower_bounds: Vec<i32>, lengths: Vec<usize>, elements: Vec<DbValue>) -> Result<Self> {
        if lower_bounds.len() != lengths.len() {
            return Err(FbError::TypeError(
                "array bounds and lengths differ in rank".to_string(),
            ));
        }
        let expected: usize = lengths.iter().product();
        if expected != elements.len() {
            return Err(FbError::TypeError(format!(
                "array shape holds {} elements, got {}",
                expected,
                elements.len()
            )));
        }
        Ok(Self {
            lower_bounds,
            lengths,
            elements,
        })
    }

    /// One-dimensional, 1-based array.
    pub fn from_vec(elements: Vec<DbValue>) -> Self {
        Self {
            lower_bounds: vec![1],
            lengths: vec![elements.len()],
            elements,
        }
    }

    pub fn rank(&self) -> usize {
        self.lengths.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    Null,
    Boolean(bool),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    Decimal(Decimal),
    Text(String),
    Binary(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    TimeStamp(NaiveDateTime),
    Guid(Uuid),
    /// Blob or array id as stored in a row.
    Quad(i64),
    Array(DbArray),
}

impl DbValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DbValue::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            DbValue::Null => "null",
            DbValue::Boolean(_) => "boolean",
            DbValue::SmallInt(_) => "smallint",
            DbValue::Integer(_) => "integer",
            DbValue::BigInt(_) => "bigint",
            DbValue::Float(_) => "float",
            DbValue::Double(_) => "double",
            DbValue::Decimal(_) => "decimal",
            DbValue::Text(_) => "text",
            DbValue::Binary(_) => "binary",
            DbValue::Date(_) => "date",
            DbValue::Time(_) => "time",
            DbValue::TimeStamp(_) => "timestamp",
            DbValue::Guid(_) => "guid",
            DbValue::Quad(_) => "quad",
            DbValue::Array(_) => "array",
        }
    }

    fn mismatch(&self, target: &str) -> FbError {
        FbError::TypeError(format!("cannot convert {} to {}", self.type_name(), target))
    }

    pub fn as_i64(&self) -> Result<i64> {
        match self {
            DbValue::Boolean(b) => Ok(*b as i64),
            DbValue::SmallInt(v) => Ok(*v as i64),
            DbValue::Integer(v) => Ok(*v as i64),
            DbValue::BigInt(v) | DbValue::Quad(v) => Ok(*v),
            DbValue::Decimal(d) => d.trunc().to_i64().ok_or_else(|| self.mismatch("bigint")),
            DbValue::Text(s) => s.trim().parse().map_err(|_| self.mismatch("bigint")),
            _ => Err(self.mismatch("bigint")),
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            DbValue::Float(v) => Ok(*v as f64),
            DbValue::Double(v) => Ok(*v),
            DbValue::Decimal(d) => d.to_f64().ok_or_else(|| self.mismatch("double")),
            DbValue::SmallInt(_) | DbValue::Integer(_) | DbValue::BigInt(_) => {
                Ok(self.as_i64()? as f64)
            }
            DbValue::Text(s) => s.trim().parse().map_err(|_| self.mismatch("double")),
            _ => Err(self.mismatch("double")),
        }
    }

    pub fn as_decimal(&self) -> Result<Decimal> {
        match self {
            DbValue::Decimal(d) => Ok(*d),
            DbValue::SmallInt(_) | DbValue::Integer(_) | DbValue::BigInt(_) => {
                Ok(Decimal::from(self.as_i64()?))
            }
            DbValue::Float(_) | DbValue::Double(_) => {
                Decimal::try_from(self.as_f64()?).map_err(|_| self.mismatch("decimal"))
            }
            DbValue::Text(s) => s.trim().parse().map_err(|_| self.mismatch("decimal")),
            _ => Err(self.mismatch("decimal")),
        }
    }
}

// ============================================================================
// Scalar codecs
// ============================================================================

const DATE_OFFSET: i64 = 1721119 - 2400001;
const TICKS_PER_SECOND: u32 = 10_000;
const NANOS_PER_TICK: u32 = 100_000;

/// Days relative to 1858-11-17, computed with the months-from-March
/// Julian-day rearrangement.
pub fn encode_date(date: NaiveDate) -> i32 {
    let mut year = date.year() as i64;
    let mut month = date.month() as i64;
    let day = date.day() as i64;

    if month > 2 {
        month -= 3;
    } else {
        month += 9;
        year -= 1;
    }

    let century = year / 100;
    let ya = year - 100 * century;

    (146097 * century / 4 + 1461 * ya / 4 + (153 * month + 2) / 5 + day + DATE_OFFSET) as i32
}

pub fn decode_date(value: i32) -> Result<NaiveDate> {
    let mut d = value as i64 - DATE_OFFSET;

    let century = (4 * d - 1) / 146097;
    d = 4 * d - 1 - 146097 * century;
    let mut day = d / 4;

    d = (4 * day + 3) / 1461;
    day = 4 * day + 3 - 1461 * d;
    day = (day + 4) / 4;

    let mut month = (5 * day - 3) / 153;
    day = 5 * day - 3 - 153 * month;
    day = (day + 5) / 5;

    let mut year = 100 * century + d;

    if month < 10 {
        month += 3;
    } else {
        month -= 9;
        year += 1;
    }

    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .ok_or_else(|| FbError::TypeError(format!("date value {} out of range", value)))
}

/// Ticks of 100 microseconds since midnight.
pub fn encode_time(time: NaiveTime) -> i32 {
    let ticks = time.num_seconds_from_midnight() * TICKS_PER_SECOND
        + time.nanosecond().min(999_999_999) / NANOS_PER_TICK;
    ticks as i32
}

pub fn decode_time(ticks: i32) -> Result<NaiveTime> {
    let ticks = u32::try_from(ticks)
        .map_err(|_| FbError::TypeError(format!("negative time value {}", ticks)))?;
    let secs = ticks / TICKS_PER_SECOND;
    let nanos = (ticks % TICKS_PER_SECOND) * NANOS_PER_TICK;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
        .ok_or_else(|| FbError::TypeError(format!("time value {} out of range", ticks)))
}

/// `Uuid` holds its fields in network order, which is the wire form. A
/// host GUID with little-endian leading fields must pass through
/// [`Uuid::from_bytes_le`] first; the trailing 8 bytes never move.
pub fn encode_guid(guid: &Uuid) -> [u8; 16] {
    *guid.as_bytes()
}

pub fn decode_guid(bytes: &[u8]) -> Result<Uuid> {
    Uuid::from_slice(bytes).map_err(|e| FbError::TypeError(format!("invalid guid: {}", e)))
}

pub fn encode_bool(value: bool) -> u8 {
    value as u8
}

pub fn decode_bool(byte: u8) -> bool {
    byte != 0
}

/// `raw / 10^-scale`.
pub fn decode_decimal(raw: i64, scale: i16) -> Result<Decimal> {
    if scale >= 0 {
        let factor = 10i128
            .checked_pow(scale as u32)
            .ok_or_else(|| FbError::TypeError(format!("scale {} out of range", scale)))?;
        return Decimal::try_from_i128_with_scale(raw as i128 * factor, 0)
            .map_err(|e| FbError::TypeError(e.to_string()));
    }
    Decimal::try_from_i128_with_scale(raw as i128, (-scale) as u32)
        .map_err(|e| FbError::TypeError(e.to_string()))
}

/// Inverse of [`decode_decimal`]: excess fraction digits are truncated and
/// the result must fit the integer container of `sql_type`.
pub fn encode_decimal(value: Decimal, scale: i16, sql_type: SqlType) -> Result<i64> {
    let mut scaled = value;
    if scale < 0 {
        let factor = 10i64
            .checked_pow((-scale) as u32)
            .map(Decimal::from)
            .ok_or_else(|| FbError::TypeError(format!("scale {} out of range", scale)))?;
        scaled = value
            .checked_mul(factor)
            .ok_or_else(|| FbError::TypeError(format!("{} overflows scale {}", value, scale)))?;
    }
    let raw = scaled
        .trunc()
        .to_i64()
        .ok_or_else(|| FbError::TypeError(format!("{} overflows bigint", value)))?;
    fit_container(raw, sql_type)
}

fn fit_container(raw: i64, sql_type: SqlType) -> Result<i64> {
    let fits = match sql_type {
        SqlType::SHORT => i16::try_from(raw).is_ok(),
        SqlType::LONG => i32::try_from(raw).is_ok(),
        _ => true,
    };
    if fits {
        Ok(raw)
    } else {
        Err(FbError::TypeError(format!(
            "value {} does not fit wire type {}",
            raw, sql_type.0
        )))
    }
}

// ============================================================================
// Native slot codec
// ============================================================================

/// Everything needed to move one scalar in and out of its native slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalarShape {
    pub sql_type: SqlType,
    pub sub_type: i16,
    pub scale: i16,
    pub length: usize,
    pub charset: Charset,
}

impl ScalarShape {
    pub fn data_type(&self) -> Result<DbDataType> {
        DbDataType::from_wire(
            self.sql_type,
            self.sub_type,
            self.scale,
            self.length,
            self.charset,
        )
    }

    /// Bytes the value occupies, excluding alignment.
    pub fn slot_size(&self) -> usize {
        match self.sql_type {
            SqlType::VARYING => self.length + 2,
            SqlType::TEXT | SqlType::NULL => self.length,
            SqlType::SHORT => 2,
            SqlType::LONG | SqlType::FLOAT | SqlType::TYPE_DATE | SqlType::TYPE_TIME => 4,
            SqlType::BOOLEAN => 1,
            _ => 8,
        }
    }

    /// Append the slot bytes for `value`. `Null` writes a zeroed slot.
    pub fn encode(&self, value: &DbValue, out: &mut Vec<u8>) -> Result<()> {
        if value.is_null() {
            out.resize(out.len() + self.slot_size(), 0);
            return Ok(());
        }

        match self.sql_type {
            SqlType::TEXT => {
                let bytes = self.text_bytes(value)?;
                out.extend_from_slice(&bytes);
                let pad = if self.charset.is_octets() { 0 } else { b' ' };
                out.resize(out.len() + (self.length - bytes.len()), pad);
            }
            SqlType::VARYING => {
                let bytes = self.text_bytes(value)?;
                out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
                out.extend_from_slice(&bytes);
                out.resize(out.len() + (self.length - bytes.len()), 0);
            }
            SqlType::SHORT => {
                let raw = self.integer(value)?;
                out.extend_from_slice(&(raw as i16).to_le_bytes());
            }
            SqlType::LONG => {
                let raw = self.integer(value)?;
                out.extend_from_slice(&(raw as i32).to_le_bytes());
            }
            SqlType::INT64 => {
                let raw = self.integer(value)?;
                out.extend_from_slice(&raw.to_le_bytes());
            }
            SqlType::FLOAT => out.extend_from_slice(&(value.as_f64()? as f32).to_le_bytes()),
            SqlType::DOUBLE | SqlType::D_FLOAT => {
                let v = if self.scale < 0 {
                    let raw = encode_decimal(value.as_decimal()?, self.scale, SqlType::INT64)?;
                    raw as f64
                } else {
                    value.as_f64()?
                };
                out.extend_from_slice(&v.to_le_bytes());
            }
            SqlType::TYPE_DATE => match value {
                DbValue::Date(d) => out.extend_from_slice(&encode_date(*d).to_le_bytes()),
                DbValue::TimeStamp(ts) => {
                    out.extend_from_slice(&encode_date(ts.date()).to_le_bytes())
                }
                other => return Err(other.mismatch("date")),
            },
            SqlType::TYPE_TIME => match value {
                DbValue::Time(t) => out.extend_from_slice(&encode_time(*t).to_le_bytes()),
                DbValue::TimeStamp(ts) => {
                    out.extend_from_slice(&encode_time(ts.time()).to_le_bytes())
                }
                other => return Err(other.mismatch("time")),
            },
            SqlType::TIMESTAMP => {
                let ts = match value {
                    DbValue::TimeStamp(ts) => *ts,
                    DbValue::Date(d) => d.and_time(NaiveTime::MIN),
                    other => return Err(other.mismatch("timestamp")),
                };
                out.extend_from_slice(&encode_date(ts.date()).to_le_bytes());
                out.extend_from_slice(&encode_time(ts.time()).to_le_bytes());
            }
            SqlType::BLOB | SqlType::ARRAY | SqlType::QUAD => {
                let id = match value {
                    DbValue::Quad(id) => *id,
                    other => return Err(other.mismatch("quad")),
                };
                out.extend_from_slice(&((id >> 32) as i32).to_le_bytes());
                out.extend_from_slice(&(id as u32).to_le_bytes());
            }
            SqlType::BOOLEAN => {
                let b = match value {
                    DbValue::Boolean(b) => *b,
                    other => other.as_i64()? != 0,
                };
                out.push(encode_bool(b));
            }
            SqlType(other) => return Err(FbError::UnsupportedType(other)),
        }
        Ok(())
    }

    /// Decode exactly one slot from the front of `bytes`.
    pub fn decode(&self, bytes: &[u8]) -> Result<DbValue> {
        let size = self.slot_size();
        if bytes.len() < size {
            return Err(FbError::ProtocolError(format!(
                "slot of wire type {} needs {} bytes, {} available",
                self.sql_type.0,
                size,
                bytes.len()
            )));
        }
        let kind = self.data_type()?;
        let i32_at = |at: usize| i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);

        Ok(match self.sql_type {
            SqlType::TEXT => self.text_value(kind, &bytes[..self.length], true)?,
            SqlType::VARYING => {
                let len = (u16::from_le_bytes([bytes[0], bytes[1]]) as usize).min(self.length);
                self.text_value(kind, &bytes[2..2 + len], false)?
            }
            SqlType::SHORT => self.integer_value(kind, i16::from_le_bytes([bytes[0], bytes[1]]) as i64)?,
            SqlType::LONG => self.integer_value(kind, i32_at(0) as i64)?,
            SqlType::INT64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes[..8]);
                self.integer_value(kind, i64::from_le_bytes(raw))?
            }
            SqlType::FLOAT => DbValue::Float(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            SqlType::DOUBLE | SqlType::D_FLOAT => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes[..8]);
                let v = f64::from_le_bytes(raw);
                if kind == DbDataType::Decimal || kind == DbDataType::Numeric {
                    decode_decimal(v as i64, self.scale).map(DbValue::Decimal)?
                } else {
                    DbValue::Double(v)
                }
            }
            SqlType::TYPE_DATE => DbValue::Date(decode_date(i32_at(0))?),
            SqlType::TYPE_TIME => DbValue::Time(decode_time(i32_at(0))?),
            SqlType::TIMESTAMP => {
                let date = decode_date(i32_at(0))?;
                let time = decode_time(i32_at(4))?;
                DbValue::TimeStamp(date.and_time(time))
            }
            SqlType::BLOB | SqlType::ARRAY | SqlType::QUAD => {
                let high = i32_at(0) as i64;
                let low = i32_at(4) as u32 as i64;
                DbValue::Quad((high << 32) | low)
            }
            SqlType::BOOLEAN => DbValue::Boolean(decode_bool(bytes[0])),
            SqlType::NULL => DbValue::Null,
            SqlType(other) => return Err(FbError::UnsupportedType(other)),
        })
    }

    fn text_bytes(&self, value: &DbValue) -> Result<Vec<u8>> {
        let bytes = match value {
            DbValue::Text(s) => self.charset.encode(s),
            DbValue::Binary(b) => b.clone(),
            DbValue::Guid(g) => encode_guid(g).to_vec(),
            other => self.charset.encode(&scalar_to_string(other)?),
        };
        if bytes.len() > self.length {
            return Err(FbError::TypeError(format!(
                "string right truncation: {} bytes into a {} byte field",
                bytes.len(),
                self.length
            )));
        }
        Ok(bytes)
    }

    fn text_value(&self, kind: DbDataType, bytes: &[u8], fixed: bool) -> Result<DbValue> {
        if kind == DbDataType::Guid {
            return decode_guid(bytes).map(DbValue::Guid);
        }
        if self.charset.is_octets() {
            return Ok(DbValue::Binary(bytes.to_vec()));
        }
        let text = self.charset.decode(bytes);
        Ok(DbValue::Text(if fixed {
            text.trim_end_matches(' ').to_string()
        } else {
            text
        }))
    }

    fn integer(&self, value: &DbValue) -> Result<i64> {
        if self.scale < 0 || matches!(value, DbValue::Decimal(_)) {
            return encode_decimal(value.as_decimal()?, self.scale, self.sql_type);
        }
        fit_container(value.as_i64()?, self.sql_type)
    }

    fn integer_value(&self, kind: DbDataType, raw: i64) -> Result<DbValue> {
        Ok(match kind {
            DbDataType::Numeric | DbDataType::Decimal => DbValue::Decimal(decode_decimal(raw, self.scale)?),
            DbDataType::SmallInt => DbValue::SmallInt(raw as i16),
            DbDataType::Integer => DbValue::Integer(raw as i32),
            _ => DbValue::BigInt(raw),
        })
    }
}

fn scalar_to_string(value: &DbValue) -> Result<String> {
    Ok(match value {
        DbValue::Boolean(b) => b.to_string(),
        DbValue::SmallInt(v) => v.to_string(),
        DbValue::Integer(v) => v.to_string(),
        DbValue::BigInt(v) => v.to_string(),
        DbValue::Float(v) => v.to_string(),
        DbValue::Double(v) => v.to_string(),
        DbValue::Decimal(d) => d.to_string(),
        DbValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        DbValue::Time(t) => t.format("%H:%M:%S%.4f").to_string(),
        DbValue::TimeStamp(ts) => ts.format("%Y-%m-%d %H:%M:%S%.4f").to_string(),
        DbValue::Guid(g) => g.to_string(),
        other => return Err(other.mismatch("text")),
    })
}
