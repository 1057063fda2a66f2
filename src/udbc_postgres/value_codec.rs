use std::error::Error;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tokio_postgres::Row as PgRow;
use tokio_postgres::types::{FromSql, IsNull, ToSql, Type, to_sql_checked};

use crate::error::DbError;
use crate::udbc::Row;
use crate::udbc::value::Value;

/// Parameter already narrowed to the width the server expects.
#[derive(Debug, Clone, PartialEq)]
pub enum PgParam {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeUtc(DateTime<Utc>),
    Decimal(Decimal),
}

fn out_of_range(value: &Value, ty: &Type) -> DbError {
    DbError::Value(format!("{:?} does not fit parameter type {}", value, ty))
}

impl PgParam {
    /// Converts `value` for a parameter the server typed as `ty`.
    pub fn for_type(value: &Value, ty: &Type) -> Result<Self, DbError> {
        let param = match value {
            Value::Null => PgParam::Null,
            Value::Bool(v) => PgParam::Bool(*v),
            Value::I16(v) => Self::int(*v as i64, value, ty)?,
            Value::I32(v) => Self::int(*v as i64, value, ty)?,
            Value::I64(v) => Self::int(*v, value, ty)?,
            Value::U8(v) => Self::int(*v as i64, value, ty)?,
            Value::F64(v) => match *ty {
                Type::FLOAT4 => PgParam::F32(*v as f32),
                Type::NUMERIC => PgParam::Decimal(Decimal::try_from(*v).map_err(|_| out_of_range(value, ty))?),
                _ => PgParam::F64(*v),
            },
            Value::Str(v) => Self::text(v, ty),
            Value::Bytes(v) => PgParam::Bytes(v.clone()),
            Value::Date(v) => PgParam::Date(*v),
            Value::Time(v) => PgParam::Time(*v),
            Value::DateTime(v) => match *ty {
                Type::TIMESTAMPTZ => PgParam::DateTimeUtc(v.and_utc()),
                _ => PgParam::DateTime(*v),
            },
            Value::DateTimeUtc(v) => match *ty {
                Type::TIMESTAMP => PgParam::DateTime(v.naive_utc()),
                _ => PgParam::DateTimeUtc(*v),
            },
            Value::Decimal(v) => match *ty {
                Type::FLOAT8 => PgParam::F64(v.to_f64().ok_or_else(|| out_of_range(value, ty))?),
                Type::FLOAT4 => PgParam::F32(v.to_f32().ok_or_else(|| out_of_range(value, ty))?),
                Type::TEXT | Type::VARCHAR | Type::BPCHAR => PgParam::Text(v.to_string()),
                _ => PgParam::Decimal(*v),
            },
        };
        Ok(param)
    }

    fn int(v: i64, value: &Value, ty: &Type) -> Result<Self, DbError> {
        let param = match *ty {
            Type::INT2 => PgParam::I16(i16::try_from(v).map_err(|_| out_of_range(value, ty))?),
            Type::INT4 => PgParam::I32(i32::try_from(v).map_err(|_| out_of_range(value, ty))?),
            Type::FLOAT4 => PgParam::F32(v as f32),
            Type::FLOAT8 => PgParam::F64(v as f64),
            Type::NUMERIC => PgParam::Decimal(Decimal::from(v)),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR => PgParam::Text(v.to_string()),
            _ => PgParam::I64(v),
        };
        Ok(param)
    }

    /// Strings are parsed into the target type when they can be, otherwise
    /// sent as text for the server to reject or cast.
    fn text(v: &str, ty: &Type) -> Self {
        let parsed = match *ty {
            Type::INT2 => v.parse().ok().map(PgParam::I16),
            Type::INT4 => v.parse().ok().map(PgParam::I32),
            Type::INT8 => v.parse().ok().map(PgParam::I64),
            Type::FLOAT8 => v.parse().ok().map(PgParam::F64),
            Type::NUMERIC => v.parse().ok().map(PgParam::Decimal),
            Type::BOOL => v.parse().ok().map(PgParam::Bool),
            Type::DATE => NaiveDate::parse_from_str(v, "%Y-%m-%d").ok().map(PgParam::Date),
            Type::TIME => NaiveTime::parse_from_str(v, "%H:%M:%S%.f").ok().map(PgParam::Time),
            Type::TIMESTAMP => NaiveDateTime::parse_from_str(v, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(PgParam::DateTime),
            Type::TIMESTAMPTZ => DateTime::parse_from_rfc3339(v)
                .ok()
                .map(|t| PgParam::DateTimeUtc(t.with_timezone(&Utc))),
            _ => None,
        };
        parsed.unwrap_or_else(|| PgParam::Text(v.to_string()))
    }
}

impl ToSql for PgParam {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            PgParam::Null => Ok(IsNull::Yes),
            PgParam::Bool(v) => v.to_sql(ty, out),
            PgParam::I16(v) => v.to_sql(ty, out),
            PgParam::I32(v) => v.to_sql(ty, out),
            PgParam::I64(v) => v.to_sql(ty, out),
            PgParam::F32(v) => v.to_sql(ty, out),
            PgParam::F64(v) => v.to_sql(ty, out),
            PgParam::Text(v) => v.to_sql(ty, out),
            PgParam::Bytes(v) => v.to_sql(ty, out),
            PgParam::Date(v) => v.to_sql(ty, out),
            PgParam::Time(v) => v.to_sql(ty, out),
            PgParam::DateTime(v) => v.to_sql(ty, out),
            PgParam::DateTimeUtc(v) => v.to_sql(ty, out),
            PgParam::Decimal(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Column of a type without a dedicated mapping, read as text.
struct FallbackText(String);

impl<'a> FromSql<'a> for FallbackText {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(Self(String::from_utf8_lossy(raw).into_owned()))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

fn get<'a, T>(row: &'a PgRow, idx: usize) -> Result<Value, DbError>
where
    T: FromSql<'a> + Into<Value>,
{
    row.try_get::<_, Option<T>>(idx)
        .map(Value::from)
        .map_err(|e| DbError::Value(format!("column {}: {}", row.columns()[idx].name(), e)))
}

pub fn map_row(row: &PgRow) -> Result<Row, DbError> {
    let mut out = Row::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = match *column.type_() {
            Type::BOOL => get::<bool>(row, idx)?,
            Type::INT2 => get::<i16>(row, idx)?,
            Type::INT4 => get::<i32>(row, idx)?,
            Type::INT8 => get::<i64>(row, idx)?,
            Type::OID => get::<u32>(row, idx)?,
            Type::FLOAT4 => get::<f32>(row, idx)?,
            Type::FLOAT8 => get::<f64>(row, idx)?,
            Type::NUMERIC => get::<Decimal>(row, idx)?,
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => get::<String>(row, idx)?,
            Type::BYTEA => get::<Vec<u8>>(row, idx)?,
            Type::DATE => get::<NaiveDate>(row, idx)?,
            Type::TIME => get::<NaiveTime>(row, idx)?,
            Type::TIMESTAMP => get::<NaiveDateTime>(row, idx)?,
            Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, idx)?,
            _ => row
                .try_get::<_, Option<FallbackText>>(idx)
                .map(|v| v.map_or(Value::Null, |t| Value::Str(t.0)))
                .map_err(|e| DbError::Value(e.to_string()))?,
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}
