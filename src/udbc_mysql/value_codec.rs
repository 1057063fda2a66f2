use crate::error::DbError;
use crate::udbc::value::Value;
use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};
use mysql_async::Value as MyValue;

fn date(y: u16, m: u8, d: u8) -> Result<NaiveDate, DbError> {
    NaiveDate::from_ymd_opt(y as i32, m as u32, d as u32)
        .ok_or_else(|| DbError::Value(format!("invalid mysql date {:04}-{:02}-{:02}", y, m, d)))
}

pub fn from_mysql_value(v: &MyValue) -> Result<Value, DbError> {
    let value = match v {
        MyValue::NULL => Value::Null,
        MyValue::Int(i) => Value::I64(*i),
        MyValue::UInt(u) => match i64::try_from(*u) {
            Ok(i) => Value::I64(i),
            Err(_) => Value::Str(u.to_string()),
        },
        MyValue::Float(f) => Value::F64(*f as f64),
        MyValue::Double(d) => Value::F64(*d),
        MyValue::Bytes(b) => match String::from_utf8(b.clone()) {
            Ok(s) => Value::Str(s),
            Err(e) => Value::Bytes(e.into_bytes()),
        },
        // Zero dates are legal in MySQL and have no chrono counterpart.
        MyValue::Date(0, 0, 0, ..) => Value::Null,
        MyValue::Date(y, m, d, 0, 0, 0, 0) => Value::Date(date(*y, *m, *d)?),
        MyValue::Date(y, m, d, h, min, s, micro) => {
            let dt = date(*y, *m, *d)?
                .and_hms_micro_opt(*h as u32, *min as u32, *s as u32, *micro)
                .ok_or_else(|| DbError::Value(format!("invalid mysql datetime {:?}", v)))?;
            Value::DateTime(dt)
        }
        MyValue::Time(is_neg, days, h, min, s, micro) => {
            let time = if *days == 0 && !*is_neg {
                NaiveTime::from_hms_micro_opt(*h as u32, *min as u32, *s as u32, *micro)
            } else {
                None
            };
            match time {
                Some(t) => Value::Time(t),
                // Durations outside a day are kept in MySQL's own notation.
                None => Value::Str(format!(
                    "{}{:02}:{:02}:{:02}.{:06}",
                    if *is_neg { "-" } else { "" },
                    *days * 24 + *h as u32,
                    min,
                    s,
                    micro
                )),
            }
        }
    };
    Ok(value)
}

pub fn to_mysql_value(v: &Value) -> MyValue {
    match v {
        Value::Null => MyValue::NULL,
        Value::Bool(b) => MyValue::Int(i64::from(*b)),
        Value::I16(i) => MyValue::Int(*i as i64),
        Value::I32(i) => MyValue::Int(*i as i64),
        Value::I64(i) => MyValue::Int(*i),
        Value::U8(u) => MyValue::UInt(*u as u64),
        Value::F64(f) => MyValue::Double(*f),
        Value::Str(s) => MyValue::Bytes(s.clone().into_bytes()),
        Value::Bytes(b) => MyValue::Bytes(b.clone()),
        Value::Date(d) => MyValue::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0),
        Value::Time(t) => MyValue::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1000,
        ),
        Value::DateTime(dt) => MyValue::Date(
            dt.year() as u16,
            dt.month() as u8,
            dt.day() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            dt.second() as u8,
            dt.nanosecond() / 1000,
        ),
        Value::DateTimeUtc(dt) => to_mysql_value(&Value::DateTime(dt.naive_utc())),
        Value::Decimal(d) => MyValue::Bytes(d.to_string().into_bytes()),
    }
}
