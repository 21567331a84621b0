//! Trino type handling: type signatures, decoded values and Arrow mapping.

mod decoder;
mod mapping;
mod schema;
mod value;

pub use decoder::{decode_value, RowDecoder, TypedValueDecoder};
pub use mapping::{TrinoType, TypeMapper};
pub use schema::SchemaBuilder;
pub use value::{Row, Value};
