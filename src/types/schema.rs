//! Schema building utilities for converting result columns to Arrow schemas.

use crate::transport::Column;
use crate::types::TypeMapper;
use arrow::datatypes::{Field, Schema};
use std::collections::HashMap;

/// Builder for constructing Arrow schemas from coordinator column metadata.
///
/// Trino does not report nullability, so every field is nullable.
pub struct SchemaBuilder {
    columns: Vec<Column>,
}

impl SchemaBuilder {
    /// Create a new schema builder.
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
        }
    }

    /// Add a column to the schema.
    pub fn add_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Add multiple columns to the schema.
    pub fn add_columns(mut self, columns: impl IntoIterator<Item = Column>) -> Self {
        self.columns.extend(columns);
        self
    }

    /// Build the Arrow schema.
    pub fn build(self) -> Schema {
        let fields: Vec<Field> = self
            .columns
            .iter()
            .map(|col| {
                let trino_type = col.trino_type();
                let arrow_type = TypeMapper::trino_to_arrow(&trino_type);
                let metadata = TypeMapper::create_field_metadata(&col.type_name, &trino_type);
                Field::new(&col.name, arrow_type, true).with_metadata(metadata)
            })
            .collect();

        Schema::new(fields)
    }

    /// Build the Arrow schema with additional schema-level metadata.
    pub fn build_with_metadata(self, metadata: HashMap<String, String>) -> Schema {
        self.build().with_metadata(metadata)
    }
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::DataType;

    #[test]
    fn test_schema_builder() {
        let schema = SchemaBuilder::new()
            .add_column(Column::new("id", "bigint"))
            .add_column(Column::new("name", "varchar(100)"))
            .add_column(Column::new("price", "decimal(10,2)"))
            .build();

        assert_eq!(schema.fields().len(), 3);
        assert_eq!(schema.field(0).name(), "id");
        assert_eq!(schema.field(0).data_type(), &DataType::Int64);
        assert_eq!(schema.field(1).data_type(), &DataType::Utf8);
        assert_eq!(schema.field(2).data_type(), &DataType::Decimal128(10, 2));
        assert!(schema.field(0).is_nullable());
        assert_eq!(
            schema.field(1).metadata().get("trino.type"),
            Some(&"varchar(100)".to_string())
        );
    }

    #[test]
    fn test_schema_with_metadata() {
        let mut metadata = HashMap::new();
        metadata.insert("trino.query_id".to_string(), "q1".to_string());

        let schema = SchemaBuilder::new()
            .add_columns(vec![Column::new("_col0", "integer")])
            .build_with_metadata(metadata);

        assert_eq!(
            schema.metadata().get("trino.query_id"),
            Some(&"q1".to_string())
        );
    }
}
