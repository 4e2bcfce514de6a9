//! Plain structs mapped onto tables.
//!
//! A [TableModel] declares, statically, which of its fields map to which columns and which columns must be inlined
//! unquoted.  Conversion goes through `serde_json`, so any `Serialize + Deserialize` struct can be a model.
use crate::errors::*;
use crate::row::{Row, Value};

pub trait TableModel: serde::Serialize + serde::de::DeserializeOwned {
    /// `(field, column)` pairs, in the order columns should be written.
    fn properties() -> &'static [(&'static str, &'static str)];

    /// Columns whose values are raw SQL rather than literals.
    fn unquoted_fields() -> &'static [&'static str] {
        &[]
    }

    /// The mapped fields as a row keyed by column name.
    fn to_row(&self) -> Result<Row> {
        collect_row(self, |_, column| column)
    }

    /// The mapped fields as a row keyed by field name.
    fn to_attributes(&self) -> Result<Row> {
        collect_row(self, |field, _| field)
    }

    /// Build the model from a row keyed by column name.
    ///
    /// Columns the row doesn't have are passed to serde as null, so `Option` fields may be left out of a select.
    fn from_row(row: &Row) -> Result<Self> {
        let object = Self::properties()
            .iter()
            .map(|(field, column)| {
                let value = row.get(column).map(Value::to_json).unwrap_or_default();
                (field.to_string(), value)
            })
            .collect::<serde_json::Map<_, _>>();

        Ok(serde_json::from_value(serde_json::Value::Object(object))?)
    }
}

fn collect_row<T: TableModel>(model: &T, key: impl Fn(&'static str, &'static str) -> &'static str) -> Result<Row> {
    let mut json = serde_json::to_value(model)?;
    let mut row = Row::new();

    for (field, column) in T::properties() {
        let value = json.get_mut(*field).ok_or_else(|| {
            Error::Mapping(format!(
                "Model doesn't have field {} for column {}",
                field, column
            ))
        })?;
        row.insert(key(*field, *column), Value::from_json(value.take()));
    }

    Ok(row)
}

/// Anything which can be the payload of an insert, replace or update.
pub trait RowSource {
    fn to_payload(&self) -> Result<Row>;

    fn unquoted_columns(&self) -> &[&str] {
        &[]
    }
}

impl RowSource for Row {
    fn to_payload(&self) -> Result<Row> {
        Ok(self.clone())
    }
}

impl<T: TableModel> RowSource for T {
    fn to_payload(&self) -> Result<Row> {
        self.to_row()
    }

    fn unquoted_columns(&self) -> &[&str] {
        T::unquoted_fields()
    }
}
