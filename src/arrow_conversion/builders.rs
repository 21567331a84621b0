//! Array builders for converting decoded values to Arrow arrays.
//!
//! Each builder takes one column of decoded [`Value`]s and produces an Arrow
//! array of the type chosen by [`TypeMapper`](crate::types::TypeMapper),
//! with proper NULL handling.

use crate::error::DecodeError;
use crate::types::Value;
use arrow::array::{
    ArrayRef, BinaryBuilder, BooleanBuilder, Date32Builder, Decimal128Builder, Float32Builder,
    Float64Builder, Int16Builder, Int32Builder, Int64Builder, Int8Builder, StringBuilder,
    Time64MicrosecondBuilder, TimestampMicrosecondBuilder,
};
use arrow::datatypes::{DataType, TimeUnit};
use std::sync::Arc;

const MICROS_PER_SECOND: i64 = 1_000_000;
const SECONDS_PER_DAY: i64 = 86_400;

/// Build an Arrow array of `data_type` from one column of values.
///
/// # Arguments
/// * `data_type` - Target Arrow type
/// * `values` - Column of values (one per row)
/// * `column` - Column index for error reporting
pub fn build_array(
    data_type: &DataType,
    values: &[&Value],
    column: usize,
) -> Result<ArrayRef, DecodeError> {
    match data_type {
        DataType::Boolean => build_boolean_array(values, column),
        DataType::Int8 => build_integer_array(values, column, Int8Builder::with_capacity(values.len())),
        DataType::Int16 => {
            build_integer_array(values, column, Int16Builder::with_capacity(values.len()))
        }
        DataType::Int32 => {
            build_integer_array(values, column, Int32Builder::with_capacity(values.len()))
        }
        DataType::Int64 => {
            build_integer_array(values, column, Int64Builder::with_capacity(values.len()))
        }
        DataType::Float32 => build_real_array(values, column),
        DataType::Float64 => build_double_array(values, column),
        DataType::Decimal128(precision, scale) => {
            build_decimal128_array(values, *precision, *scale, column)
        }
        DataType::Binary => build_binary_array(values, column),
        DataType::Date32 => build_date_array(values, column),
        DataType::Time64(TimeUnit::Microsecond) => build_time_array(values, column),
        DataType::Timestamp(TimeUnit::Microsecond, None) => build_timestamp_array(values, column),
        DataType::Utf8 => build_string_array(values, column),
        other => Err(DecodeError::UnsupportedType {
            trino_type: other.to_string(),
        }),
    }
}

fn conversion_error(row: usize, column: usize, message: String) -> DecodeError {
    DecodeError::ValueConversionFailed {
        row,
        column,
        message,
    }
}

/// Build a Boolean array.
fn build_boolean_array(values: &[&Value], column: usize) -> Result<ArrayRef, DecodeError> {
    let mut builder = BooleanBuilder::with_capacity(values.len());

    for (row, value) in values.iter().enumerate() {
        if value.is_null() {
            builder.append_null();
        } else if let Some(b) = value.as_bool() {
            builder.append_value(b);
        } else {
            return Err(conversion_error(
                row,
                column,
                format!("Expected boolean, got: {:?}", value),
            ));
        }
    }

    Ok(Arc::new(builder.finish()))
}

/// Common surface of the fixed-width integer builders.
trait IntegerBuilder {
    fn append_i64(&mut self, value: i64) -> Result<(), String>;
    fn append_null(&mut self);
    fn finish_array(&mut self) -> ArrayRef;
}

macro_rules! integer_builder {
    ($builder:ty, $native:ty) => {
        impl IntegerBuilder for $builder {
            fn append_i64(&mut self, value: i64) -> Result<(), String> {
                let narrowed = <$native>::try_from(value)
                    .map_err(|_| format!("{} out of range for {}", value, stringify!($native)))?;
                self.append_value(narrowed);
                Ok(())
            }

            fn append_null(&mut self) {
                <$builder>::append_null(self);
            }

            fn finish_array(&mut self) -> ArrayRef {
                Arc::new(self.finish())
            }
        }
    };
}

integer_builder!(Int8Builder, i8);
integer_builder!(Int16Builder, i16);
integer_builder!(Int32Builder, i32);
integer_builder!(Int64Builder, i64);

fn build_integer_array<B: IntegerBuilder>(
    values: &[&Value],
    column: usize,
    mut builder: B,
) -> Result<ArrayRef, DecodeError> {
    for (row, value) in values.iter().enumerate() {
        if value.is_null() {
            builder.append_null();
        } else if let Some(v) = value.as_i64() {
            builder
                .append_i64(v)
                .map_err(|message| conversion_error(row, column, message))?;
        } else {
            return Err(conversion_error(
                row,
                column,
                format!("Expected integer, got: {:?}", value),
            ));
        }
    }

    Ok(builder.finish_array())
}

/// Build a Float32 array.
fn build_real_array(values: &[&Value], column: usize) -> Result<ArrayRef, DecodeError> {
    let mut builder = Float32Builder::with_capacity(values.len());

    for (row, value) in values.iter().enumerate() {
        match value {
            Value::Null => builder.append_null(),
            Value::Real(v) => builder.append_value(*v),
            other => match other.as_f64() {
                Some(v) => builder.append_value(v as f32),
                None => {
                    return Err(conversion_error(
                        row,
                        column,
                        format!("Expected number, got: {:?}", other),
                    ))
                }
            },
        }
    }

    Ok(Arc::new(builder.finish()))
}

/// Build a Float64 array.
fn build_double_array(values: &[&Value], column: usize) -> Result<ArrayRef, DecodeError> {
    let mut builder = Float64Builder::with_capacity(values.len());

    for (row, value) in values.iter().enumerate() {
        if value.is_null() {
            builder.append_null();
        } else if let Some(f) = value.as_f64() {
            builder.append_value(f);
        } else {
            return Err(conversion_error(
                row,
                column,
                format!("Expected number, got: {:?}", value),
            ));
        }
    }

    Ok(Arc::new(builder.finish()))
}

/// Build a Decimal128 array.
fn build_decimal128_array(
    values: &[&Value],
    precision: u8,
    scale: i8,
    column: usize,
) -> Result<ArrayRef, DecodeError> {
    let mut builder = Decimal128Builder::with_capacity(values.len())
        .with_precision_and_scale(precision, scale)
        .map_err(|e| DecodeError::ArrowError(e.to_string()))?;

    for (row, value) in values.iter().enumerate() {
        match value {
            Value::Null => builder.append_null(),
            Value::Decimal(s) => {
                let unscaled = parse_decimal_to_i128(s, precision, scale)
                    .map_err(|message| conversion_error(row, column, message))?;
                builder.append_value(unscaled);
            }
            other => {
                return Err(conversion_error(
                    row,
                    column,
                    format!("Expected decimal, got: {:?}", other),
                ))
            }
        }
    }

    Ok(Arc::new(builder.finish()))
}

/// Parse decimal text such as `-123.45` into its unscaled i128 value.
///
/// Extra fractional digits beyond `scale` are rejected rather than rounded.
fn parse_decimal_to_i128(text: &str, precision: u8, scale: i8) -> Result<i128, String> {
    let text = text.trim();
    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (integer_part, fraction_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));

    let valid = |part: &str| part.chars().all(|c| c.is_ascii_digit());
    if (integer_part.is_empty() && fraction_part.is_empty())
        || !valid(integer_part)
        || !valid(fraction_part)
    {
        return Err(format!("Invalid decimal format: {}", text));
    }

    let scale = usize::try_from(scale).map_err(|_| format!("Unsupported negative scale {}", scale))?;
    let significant_fraction = fraction_part.trim_end_matches('0');
    if significant_fraction.len() > scale {
        return Err(format!("{} has more than {} fractional digits", text, scale));
    }

    let integer_digits = integer_part.trim_start_matches('0');
    if integer_digits.len() + scale > usize::from(precision) {
        return Err(format!("{} exceeds DECIMAL({}, {})", text, precision, scale));
    }

    let mut digits = String::with_capacity(integer_digits.len() + scale);
    digits.push_str(integer_digits);
    digits.push_str(significant_fraction);
    digits.extend(std::iter::repeat('0').take(scale - significant_fraction.len()));

    let magnitude: i128 = if digits.is_empty() {
        0
    } else {
        digits
            .parse()
            .map_err(|_| format!("Invalid decimal format: {}", text))?
    };

    Ok(if negative { -magnitude } else { magnitude })
}

/// Build a Binary array.
fn build_binary_array(values: &[&Value], column: usize) -> Result<ArrayRef, DecodeError> {
    let mut builder = BinaryBuilder::with_capacity(values.len(), values.len() * 16);

    for (row, value) in values.iter().enumerate() {
        if value.is_null() {
            builder.append_null();
        } else if let Some(bytes) = value.as_bytes() {
            builder.append_value(bytes);
        } else {
            return Err(conversion_error(
                row,
                column,
                format!("Expected binary, got: {:?}", value),
            ));
        }
    }

    Ok(Arc::new(builder.finish()))
}

/// Build a Date32 array (days since Unix epoch).
fn build_date_array(values: &[&Value], column: usize) -> Result<ArrayRef, DecodeError> {
    let mut builder = Date32Builder::with_capacity(values.len());

    for (row, value) in values.iter().enumerate() {
        match value {
            Value::Null => builder.append_null(),
            Value::Date(s) => {
                let days = parse_date_to_days(s)
                    .and_then(|days| {
                        i32::try_from(days).map_err(|_| format!("Date out of range: {}", s))
                    })
                    .map_err(|message| conversion_error(row, column, message))?;
                builder.append_value(days);
            }
            other => {
                return Err(conversion_error(
                    row,
                    column,
                    format!("Expected date, got: {:?}", other),
                ))
            }
        }
    }

    Ok(Arc::new(builder.finish()))
}

/// Parse `YYYY-MM-DD` to days since 1970-01-01 in the proleptic Gregorian calendar.
fn parse_date_to_days(text: &str) -> Result<i64, String> {
    let invalid = || format!("Invalid date format: {}", text);

    // Years may carry a sign, e.g. "-0044-03-15".
    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let mut parts = unsigned.splitn(3, '-');
    let year: i64 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
    let month: u32 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
    let day: u32 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
    let year = if negative { -year } else { year };

    if !(1..=12).contains(&month) || day == 0 || day > days_in_month(year, month) {
        return Err(format!("Invalid date values: {}", text));
    }

    Ok(days_from_civil(year, month, day))
}

fn is_leap_year(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i64, month: u32) -> u32 {
    match month {
        2 if is_leap_year(year) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = (if year >= 0 { year } else { year - 399 }) / 400;
    let year_of_era = year - era * 400;
    let month_index = i64::from((month + 9) % 12);
    let day_of_year = (153 * month_index + 2) / 5 + i64::from(day) - 1;
    let day_of_era = year_of_era * 365 + year_of_era / 4 - year_of_era / 100 + day_of_year;
    era * 146_097 + day_of_era - 719_468
}

/// Parse `HH:MM:SS[.fraction]` to microseconds since midnight.
fn parse_time_to_micros(text: &str) -> Result<i64, String> {
    let invalid = || format!("Invalid time format: {}", text);

    let (clock, fraction) = text.split_once('.').unwrap_or((text, ""));
    let mut parts = clock.splitn(3, ':');
    let hour: i64 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
    let minute: i64 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
    let second: i64 = parts.next().map_or(Ok(0), |p| p.parse().map_err(|_| invalid()))?;

    if !(0..24).contains(&hour) || !(0..60).contains(&minute) || !(0..60).contains(&second) {
        return Err(format!("Invalid time values: {}", text));
    }
    if !fraction.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }

    // Sub-microsecond digits are truncated.
    let mut micros_text: String = fraction.chars().take(6).collect();
    while micros_text.len() < 6 {
        micros_text.push('0');
    }
    let micros: i64 = micros_text.parse().map_err(|_| invalid())?;

    Ok((hour * 3600 + minute * 60 + second) * MICROS_PER_SECOND + micros)
}

/// Parse `YYYY-MM-DD HH:MM:SS[.fraction]` to microseconds since the epoch.
fn parse_timestamp_to_micros(text: &str) -> Result<i64, String> {
    let (date, time) = text
        .split_once(' ')
        .or_else(|| text.split_once('T'))
        .unwrap_or((text, "00:00:00"));
    let days = parse_date_to_days(date)?;
    let micros = parse_time_to_micros(time)?;

    days.checked_mul(SECONDS_PER_DAY * MICROS_PER_SECOND)
        .and_then(|v| v.checked_add(micros))
        .ok_or_else(|| format!("Timestamp out of range: {}", text))
}

/// Build a Time64 (microsecond) array.
fn build_time_array(values: &[&Value], column: usize) -> Result<ArrayRef, DecodeError> {
    let mut builder = Time64MicrosecondBuilder::with_capacity(values.len());

    for (row, value) in values.iter().enumerate() {
        match value {
            Value::Null => builder.append_null(),
            Value::Time(s) => {
                let micros =
                    parse_time_to_micros(s).map_err(|message| conversion_error(row, column, message))?;
                builder.append_value(micros);
            }
            other => {
                return Err(conversion_error(
                    row,
                    column,
                    format!("Expected time, got: {:?}", other),
                ))
            }
        }
    }

    Ok(Arc::new(builder.finish()))
}

/// Build a Timestamp (microsecond, no time zone) array.
fn build_timestamp_array(values: &[&Value], column: usize) -> Result<ArrayRef, DecodeError> {
    let mut builder = TimestampMicrosecondBuilder::with_capacity(values.len());

    for (row, value) in values.iter().enumerate() {
        match value {
            Value::Null => builder.append_null(),
            Value::Timestamp(s) => {
                let micros = parse_timestamp_to_micros(s)
                    .map_err(|message| conversion_error(row, column, message))?;
                builder.append_value(micros);
            }
            other => {
                return Err(conversion_error(
                    row,
                    column,
                    format!("Expected timestamp, got: {:?}", other),
                ))
            }
        }
    }

    Ok(Arc::new(builder.finish()))
}

/// Estimate the byte capacity of a string column from a sample.
fn estimate_string_capacity(values: &[&Value]) -> usize {
    const SAMPLE_SIZE: usize = 10;
    const DEFAULT_AVG_LEN: usize = 32;

    let sampled: Vec<usize> = values
        .iter()
        .take(SAMPLE_SIZE)
        .filter_map(|v| v.as_str().map(str::len))
        .collect();

    if sampled.is_empty() {
        DEFAULT_AVG_LEN * values.len()
    } else {
        let avg_len = sampled.iter().sum::<usize>() / sampled.len();
        (avg_len + 8) * values.len()
    }
}

/// Build a Utf8 array. Nested values are rendered as JSON text.
fn build_string_array(values: &[&Value], _column: usize) -> Result<ArrayRef, DecodeError> {
    let mut builder = StringBuilder::with_capacity(values.len(), estimate_string_capacity(values));

    for value in values {
        match value {
            Value::Null => builder.append_null(),
            Value::Array(_) | Value::Map(_) | Value::Row(_) => {
                builder.append_value(value.to_json().to_string())
            }
            other => match other.as_str() {
                Some(s) => builder.append_value(s),
                None => builder.append_value(other.to_string()),
            },
        }
    }

    Ok(Arc::new(builder.finish()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{
        Array, BinaryArray, Date32Array, Decimal128Array, Int16Array, StringArray,
        Time64MicrosecondArray, TimestampMicrosecondArray,
    };

    #[test]
    fn test_days_from_civil() {
        assert_eq!(parse_date_to_days("1970-01-01").unwrap(), 0);
        assert_eq!(parse_date_to_days("2000-03-01").unwrap(), 11_017);
        assert_eq!(parse_date_to_days("2024-02-29").unwrap(), 19_782);
        assert_eq!(parse_date_to_days("1969-12-31").unwrap(), -1);
        assert!(parse_date_to_days("2023-02-29").is_err());
        assert!(parse_date_to_days("2023-13-01").is_err());
        assert!(parse_date_to_days("not a date").is_err());
    }

    #[test]
    fn test_time_parsing() {
        assert_eq!(parse_time_to_micros("00:00:00").unwrap(), 0);
        assert_eq!(parse_time_to_micros("01:02:03.5").unwrap(), 3_723_500_000);
        assert_eq!(
            parse_time_to_micros("23:59:59.123456789").unwrap(),
            86_399_123_456
        );
        assert!(parse_time_to_micros("24:00:00").is_err());
    }

    #[test]
    fn test_timestamp_parsing() {
        assert_eq!(
            parse_timestamp_to_micros("1970-01-02 00:00:01.000").unwrap(),
            86_401_000_000
        );
        assert_eq!(
            parse_timestamp_to_micros("1969-12-31 23:59:59").unwrap(),
            -1_000_000
        );
    }

    #[test]
    fn test_decimal_parsing() {
        assert_eq!(parse_decimal_to_i128("123.45", 10, 2).unwrap(), 12_345);
        assert_eq!(parse_decimal_to_i128("-0.5", 10, 2).unwrap(), -50);
        assert_eq!(parse_decimal_to_i128("7", 10, 2).unwrap(), 700);
        assert_eq!(parse_decimal_to_i128("1.230", 10, 2).unwrap(), 123);
        assert!(parse_decimal_to_i128("1.234", 10, 2).is_err());
        assert!(parse_decimal_to_i128("123456789.00", 10, 2).is_err());
        assert!(parse_decimal_to_i128("12a.0", 10, 2).is_err());
    }

    #[test]
    fn test_integer_array_with_nulls() {
        let values = [Value::SmallInt(7), Value::Null, Value::SmallInt(-3)];
        let refs: Vec<&Value> = values.iter().collect();
        let array = build_array(&DataType::Int16, &refs, 0).unwrap();
        let array = array.as_any().downcast_ref::<Int16Array>().unwrap();
        assert_eq!(array.value(0), 7);
        assert!(array.is_null(1));
        assert_eq!(array.value(2), -3);
    }

    #[test]
    fn test_integer_overflow_reports_position() {
        let values = [Value::Null, Value::BigInt(70_000)];
        let refs: Vec<&Value> = values.iter().collect();
        let err = build_array(&DataType::Int16, &refs, 3).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::ValueConversionFailed { row: 1, column: 3, .. }
        ));
    }

    #[test]
    fn test_temporal_arrays() {
        let date = [Value::Date("2024-01-15".to_string())];
        let array = build_array(&DataType::Date32, &date.iter().collect::<Vec<_>>(), 0).unwrap();
        let array = array.as_any().downcast_ref::<Date32Array>().unwrap();
        assert_eq!(array.value(0), 19_737);

        let time = [Value::Time("12:00:00.250".to_string())];
        let array = build_array(
            &DataType::Time64(TimeUnit::Microsecond),
            &time.iter().collect::<Vec<_>>(),
            0,
        )
        .unwrap();
        let array = array.as_any().downcast_ref::<Time64MicrosecondArray>().unwrap();
        assert_eq!(array.value(0), 43_200_250_000);

        let ts = [Value::Timestamp("2024-01-15 00:00:00.000".to_string())];
        let array = build_array(
            &DataType::Timestamp(TimeUnit::Microsecond, None),
            &ts.iter().collect::<Vec<_>>(),
            0,
        )
        .unwrap();
        let array = array
            .as_any()
            .downcast_ref::<TimestampMicrosecondArray>()
            .unwrap();
        assert_eq!(array.value(0), 19_737 * 86_400 * 1_000_000);
    }

    #[test]
    fn test_decimal_array() {
        let values = [Value::Decimal("12.30".to_string()), Value::Null];
        let refs: Vec<&Value> = values.iter().collect();
        let array = build_array(&DataType::Decimal128(5, 2), &refs, 0).unwrap();
        let array = array.as_any().downcast_ref::<Decimal128Array>().unwrap();
        assert_eq!(array.value(0), 1_230);
        assert!(array.is_null(1));
    }

    #[test]
    fn test_string_array_renders_nested_as_json() {
        let values = [
            Value::Varchar("plain".to_string()),
            Value::Array(vec![Value::Integer(1), Value::Null]),
            Value::Row(vec![Value::Varchar("a".to_string()), Value::Boolean(true)]),
            Value::Null,
        ];
        let refs: Vec<&Value> = values.iter().collect();
        let array = build_array(&DataType::Utf8, &refs, 0).unwrap();
        let array = array.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(array.value(0), "plain");
        assert_eq!(array.value(1), "[1,null]");
        assert_eq!(array.value(2), r#"["a",true]"#);
        assert!(array.is_null(3));
    }

    #[test]
    fn test_binary_array() {
        let values = [Value::Varbinary(vec![0xde, 0xad])];
        let refs: Vec<&Value> = values.iter().collect();
        let array = build_array(&DataType::Binary, &refs, 0).unwrap();
        let array = array.as_any().downcast_ref::<BinaryArray>().unwrap();
        assert_eq!(array.value(0), &[0xde, 0xad]);
    }

    #[test]
    fn test_type_mismatch() {
        let values = [Value::Varchar("yes".to_string())];
        let refs: Vec<&Value> = values.iter().collect();
        assert!(build_array(&DataType::Boolean, &refs, 0).is_err());
    }
}
