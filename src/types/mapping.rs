//! Type mapping between Trino type signatures and Apache Arrow data types.

use arrow::datatypes::{DataType, TimeUnit};
use std::collections::HashMap;

/// Trino data type parsed from a column's type signature text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrinoType {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    /// DECIMAL(p, s)
    Decimal { precision: u8, scale: i8 },
    /// VARCHAR or VARCHAR(n)
    Varchar { length: Option<u32> },
    /// CHAR(n)
    Char { length: u32 },
    Varbinary,
    Json,
    Date,
    /// TIME(p) [WITH TIME ZONE]
    Time {
        precision: Option<u8>,
        with_time_zone: bool,
    },
    /// TIMESTAMP(p) [WITH TIME ZONE]
    Timestamp {
        precision: Option<u8>,
        with_time_zone: bool,
    },
    IntervalYearToMonth,
    IntervalDayToSecond,
    Uuid,
    IpAddress,
    /// ARRAY(element)
    Array(Box<TrinoType>),
    /// MAP(key, value)
    Map(Box<TrinoType>, Box<TrinoType>),
    /// ROW(name type, ...); field names may be absent
    Row(Vec<(Option<String>, TrinoType)>),
    /// Any type this driver has no dedicated handling for
    Other(String),
}

impl TrinoType {
    /// Parse a type signature such as `decimal(10,2)` or
    /// `row(a bigint, b array(varchar))`.
    ///
    /// Parsing never fails; unknown signatures become `TrinoType::Other`.
    pub fn parse(signature: &str) -> TrinoType {
        let text = signature.trim();
        let lower = text.to_ascii_lowercase();

        let (base, args, suffix) = match split_signature(&lower) {
            Some(parts) => parts,
            None => return TrinoType::Other(text.to_string()),
        };
        let with_time_zone = suffix == "with time zone";
        if !suffix.is_empty() && !with_time_zone {
            return TrinoType::Other(text.to_string());
        }

        // Arguments keep their original case; row field names are case-sensitive.
        let raw_args = args.map(|range| &text[range]);

        match (base, raw_args) {
            ("boolean", None) => TrinoType::Boolean,
            ("tinyint", None) => TrinoType::TinyInt,
            ("smallint", None) => TrinoType::SmallInt,
            ("integer", None) | ("int", None) => TrinoType::Integer,
            ("bigint", None) => TrinoType::BigInt,
            ("real", None) => TrinoType::Real,
            ("double", None) => TrinoType::Double,
            ("decimal", None) => TrinoType::Decimal {
                precision: 38,
                scale: 0,
            },
            ("decimal", Some(args)) => {
                let parts = split_top_level(args);
                let precision = parts.first().and_then(|p| p.trim().parse::<u8>().ok());
                let scale = match parts.get(1) {
                    Some(s) => s.trim().parse::<i8>().ok(),
                    None => Some(0),
                };
                match (precision, scale, parts.len()) {
                    (Some(precision), Some(scale), 1 | 2) => TrinoType::Decimal { precision, scale },
                    _ => TrinoType::Other(text.to_string()),
                }
            }
            ("varchar", None) => TrinoType::Varchar { length: None },
            ("varchar", Some(args)) => match args.trim().parse::<u32>() {
                Ok(length) => TrinoType::Varchar {
                    length: Some(length),
                },
                Err(_) => TrinoType::Other(text.to_string()),
            },
            ("char", None) => TrinoType::Char { length: 1 },
            ("char", Some(args)) => match args.trim().parse::<u32>() {
                Ok(length) => TrinoType::Char { length },
                Err(_) => TrinoType::Other(text.to_string()),
            },
            ("varbinary", None) => TrinoType::Varbinary,
            ("json", None) => TrinoType::Json,
            ("date", None) => TrinoType::Date,
            ("time", args) => match parse_precision(args) {
                Ok(precision) => TrinoType::Time {
                    precision,
                    with_time_zone,
                },
                Err(()) => TrinoType::Other(text.to_string()),
            },
            ("timestamp", args) => match parse_precision(args) {
                Ok(precision) => TrinoType::Timestamp {
                    precision,
                    with_time_zone,
                },
                Err(()) => TrinoType::Other(text.to_string()),
            },
            ("interval year to month", None) => TrinoType::IntervalYearToMonth,
            ("interval day to second", None) => TrinoType::IntervalDayToSecond,
            ("uuid", None) => TrinoType::Uuid,
            ("ipaddress", None) => TrinoType::IpAddress,
            ("array", Some(args)) => TrinoType::Array(Box::new(TrinoType::parse(args))),
            ("map", Some(args)) => match split_top_level(args).as_slice() {
                [key, value] => TrinoType::Map(
                    Box::new(TrinoType::parse(key)),
                    Box::new(TrinoType::parse(value)),
                ),
                _ => TrinoType::Other(text.to_string()),
            },
            ("row", Some(args)) => TrinoType::Row(
                split_top_level(args)
                    .into_iter()
                    .map(parse_row_field)
                    .collect(),
            ),
            _ => TrinoType::Other(text.to_string()),
        }
    }

    /// Whether the type is ARRAY, MAP or ROW.
    pub fn is_nested(&self) -> bool {
        matches!(
            self,
            TrinoType::Array(_) | TrinoType::Map(_, _) | TrinoType::Row(_)
        )
    }
}

/// Split `base(args) suffix` into its parts. The returned argument range
/// indexes into the input.
fn split_signature(lower: &str) -> Option<(&str, Option<std::ops::Range<usize>>, &str)> {
    let Some(open) = lower.find('(') else {
        // `time with time zone` has a suffix but no arguments
        return Some(match lower.strip_suffix(" with time zone") {
            Some(base) => (base.trim_end(), None, "with time zone"),
            None => (lower, None, ""),
        });
    };

    let mut depth = 0usize;
    let mut in_quotes = false;
    for (idx, ch) in lower.char_indices().skip_while(|(i, _)| *i < open) {
        match ch {
            '"' => in_quotes = !in_quotes,
            '(' if !in_quotes => depth += 1,
            ')' if !in_quotes => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    let base = lower[..open].trim_end();
                    let suffix = lower[idx + 1..].trim();
                    return Some((base, Some(open + 1..idx), suffix));
                }
            }
            _ => {}
        }
    }
    None
}

/// Split at commas that are not nested in parentheses or quotes.
fn split_top_level(args: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut start = 0;
    for (idx, ch) in args.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '(' if !in_quotes => depth += 1,
            ')' if !in_quotes => depth = depth.saturating_sub(1),
            ',' if !in_quotes && depth == 0 => {
                parts.push(args[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    let last = args[start..].trim();
    if !last.is_empty() || !parts.is_empty() {
        parts.push(last);
    }
    parts
}

fn parse_precision(args: Option<&str>) -> Result<Option<u8>, ()> {
    match args {
        None => Ok(None),
        Some(p) => p.trim().parse::<u8>().map(Some).map_err(|_| ()),
    }
}

fn parse_row_field(field: &str) -> (Option<String>, TrinoType) {
    let field = field.trim();
    if let Some(rest) = field.strip_prefix('"') {
        if let Some(end) = rest.find('"') {
            let name = rest[..end].to_string();
            return (Some(name), TrinoType::parse(&rest[end + 1..]));
        }
    }

    let whole = TrinoType::parse(field);
    if !matches!(whole, TrinoType::Other(_)) {
        return (None, whole);
    }
    match field.split_once(char::is_whitespace) {
        Some((name, ty)) => (Some(name.to_string()), TrinoType::parse(ty)),
        None => (None, whole),
    }
}

/// Type mapper for converting Trino types to Arrow types.
pub struct TypeMapper;

impl TypeMapper {
    /// Convert a Trino type to an Arrow DataType.
    ///
    /// Types without a lossless Arrow counterpart map to `Utf8` and carry
    /// their text form: nested types as JSON, zoned timestamps and intervals
    /// as the coordinator's string rendering.
    pub fn trino_to_arrow(trino_type: &TrinoType) -> DataType {
        match trino_type {
            TrinoType::Boolean => DataType::Boolean,
            TrinoType::TinyInt => DataType::Int8,
            TrinoType::SmallInt => DataType::Int16,
            TrinoType::Integer => DataType::Int32,
            TrinoType::BigInt => DataType::Int64,
            TrinoType::Real => DataType::Float32,
            TrinoType::Double => DataType::Float64,
            TrinoType::Decimal { precision, scale } if *precision <= 38 => {
                DataType::Decimal128(*precision, *scale)
            }
            TrinoType::Varbinary => DataType::Binary,
            TrinoType::Date => DataType::Date32,
            TrinoType::Time {
                with_time_zone: false,
                ..
            } => DataType::Time64(TimeUnit::Microsecond),
            TrinoType::Timestamp {
                with_time_zone: false,
                ..
            } => DataType::Timestamp(TimeUnit::Microsecond, None),
            _ => DataType::Utf8,
        }
    }

    /// Create Arrow field metadata preserving the Trino type signature.
    pub fn create_field_metadata(type_name: &str, trino_type: &TrinoType) -> HashMap<String, String> {
        let mut metadata = HashMap::new();
        metadata.insert("trino.type".to_string(), type_name.to_string());

        match trino_type {
            TrinoType::Decimal { precision, scale } => {
                metadata.insert("trino.precision".to_string(), precision.to_string());
                metadata.insert("trino.scale".to_string(), scale.to_string());
            }
            TrinoType::Varchar {
                length: Some(length),
            }
            | TrinoType::Char { length } => {
                metadata.insert("trino.length".to_string(), length.to_string());
            }
            _ => {}
        }

        metadata
    }

    /// Extract the Trino type from Arrow field metadata.
    pub fn from_field_metadata(metadata: &HashMap<String, String>) -> Option<TrinoType> {
        metadata.get("trino.type").map(|s| TrinoType::parse(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scalar_types() {
        assert_eq!(TrinoType::parse("boolean"), TrinoType::Boolean);
        assert_eq!(TrinoType::parse("INTEGER"), TrinoType::Integer);
        assert_eq!(TrinoType::parse("bigint"), TrinoType::BigInt);
        assert_eq!(TrinoType::parse("double"), TrinoType::Double);
        assert_eq!(TrinoType::parse("varbinary"), TrinoType::Varbinary);
        assert_eq!(TrinoType::parse("uuid"), TrinoType::Uuid);
    }

    #[test]
    fn test_parse_parameterized_types() {
        assert_eq!(
            TrinoType::parse("decimal(10,2)"),
            TrinoType::Decimal {
                precision: 10,
                scale: 2
            }
        );
        assert_eq!(
            TrinoType::parse("varchar(25)"),
            TrinoType::Varchar { length: Some(25) }
        );
        assert_eq!(TrinoType::parse("varchar"), TrinoType::Varchar { length: None });
        assert_eq!(TrinoType::parse("char(3)"), TrinoType::Char { length: 3 });
    }

    #[test]
    fn test_parse_temporal_types() {
        assert_eq!(
            TrinoType::parse("timestamp(3)"),
            TrinoType::Timestamp {
                precision: Some(3),
                with_time_zone: false
            }
        );
        assert_eq!(
            TrinoType::parse("timestamp(6) with time zone"),
            TrinoType::Timestamp {
                precision: Some(6),
                with_time_zone: true
            }
        );
        assert_eq!(
            TrinoType::parse("time with time zone"),
            TrinoType::Time {
                precision: None,
                with_time_zone: true
            }
        );
        assert_eq!(
            TrinoType::parse("interval day to second"),
            TrinoType::IntervalDayToSecond
        );
    }

    #[test]
    fn test_parse_nested_types() {
        assert_eq!(
            TrinoType::parse("array(varchar(10))"),
            TrinoType::Array(Box::new(TrinoType::Varchar { length: Some(10) }))
        );
        assert_eq!(
            TrinoType::parse("map(varchar, array(integer))"),
            TrinoType::Map(
                Box::new(TrinoType::Varchar { length: None }),
                Box::new(TrinoType::Array(Box::new(TrinoType::Integer)))
            )
        );
        assert_eq!(
            TrinoType::parse("row(id bigint, \"Display Name\" varchar, decimal(5,1))"),
            TrinoType::Row(vec![
                (Some("id".to_string()), TrinoType::BigInt),
                (
                    Some("Display Name".to_string()),
                    TrinoType::Varchar { length: None }
                ),
                (
                    None,
                    TrinoType::Decimal {
                        precision: 5,
                        scale: 1
                    }
                ),
            ])
        );
    }

    #[test]
    fn test_parse_unknown_type() {
        assert_eq!(
            TrinoType::parse("HyperLogLog"),
            TrinoType::Other("HyperLogLog".to_string())
        );
        assert_eq!(
            TrinoType::parse("decimal(x)"),
            TrinoType::Other("decimal(x)".to_string())
        );
        assert_eq!(
            TrinoType::parse("array(integer"),
            TrinoType::Other("array(integer".to_string())
        );
    }

    #[test]
    fn test_arrow_mapping() {
        assert_eq!(TypeMapper::trino_to_arrow(&TrinoType::Integer), DataType::Int32);
        assert_eq!(
            TypeMapper::trino_to_arrow(&TrinoType::parse("decimal(18,2)")),
            DataType::Decimal128(18, 2)
        );
        assert_eq!(
            TypeMapper::trino_to_arrow(&TrinoType::parse("timestamp(3)")),
            DataType::Timestamp(TimeUnit::Microsecond, None)
        );
        assert_eq!(
            TypeMapper::trino_to_arrow(&TrinoType::parse("timestamp(3) with time zone")),
            DataType::Utf8
        );
        assert_eq!(
            TypeMapper::trino_to_arrow(&TrinoType::parse("array(integer)")),
            DataType::Utf8
        );
        assert_eq!(TypeMapper::trino_to_arrow(&TrinoType::Varbinary), DataType::Binary);
    }

    #[test]
    fn test_metadata_preservation() {
        let ty = TrinoType::parse("decimal(18,2)");
        let metadata = TypeMapper::create_field_metadata("decimal(18,2)", &ty);
        assert_eq!(metadata.get("trino.type"), Some(&"decimal(18,2)".to_string()));
        assert_eq!(metadata.get("trino.precision"), Some(&"18".to_string()));
        assert_eq!(metadata.get("trino.scale"), Some(&"2".to_string()));

        assert_eq!(TypeMapper::from_field_metadata(&metadata), Some(ty));
    }
}
