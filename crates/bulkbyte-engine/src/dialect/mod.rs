//! Database dialects: connection URLs, driver identifiers, column DDL, and
//! bulk-loader command lines for each supported target family.
//!
//! Each family is a flat unit struct implementing [`DialectAdapter`]; callers
//! obtain one through [`DatabaseFamily::dialect`].

mod hypersonic;
mod mysql;
mod postgres;

use std::fmt;
use std::path::Path;

use bulkbyte_types::error::StepError;
use bulkbyte_types::row_meta::{names_match, FieldDescriptor, RowMetadata};
use serde::{Deserialize, Serialize};

pub use hypersonic::Hypersonic;
pub use mysql::MySql;
pub use postgres::Postgres;

/// String lengths at or above this map to an unbounded text type.
pub const CLOB_LENGTH: u32 = 9_999_999;

/// Fragment emitted for a type the dialect cannot express.
pub const UNKNOWN_TYPE: &str = "UNKNOWN";

const ODBC_DRIVER: &str = "sun.jdbc.odbc.JdbcOdbcDriver";

/// Supported target database families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseFamily {
    Hypersonic,
    #[serde(alias = "mariadb")]
    Mysql,
    #[serde(alias = "postgresql")]
    Postgres,
}

impl DatabaseFamily {
    /// The dialect implementation for this family.
    pub fn dialect(self) -> &'static dyn DialectAdapter {
        match self {
            Self::Hypersonic => &Hypersonic,
            Self::Mysql => &MySql,
            Self::Postgres => &Postgres,
        }
    }
}

impl fmt::Display for DatabaseFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dialect().family_name())
    }
}

/// How the database is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    #[default]
    Native,
    Odbc,
}

/// Connection coordinates handed to a dialect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionParams {
    pub access: AccessMode,
    pub host: String,
    /// `None` or `Some(0)` means "not specified".
    pub port: Option<u16>,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl ConnectionParams {
    /// Configured port, treating zero as unset.
    pub fn explicit_port(&self) -> Option<u16> {
        self.port.filter(|p| *p != 0)
    }
}

/// Names of the fields that map to the auto-increment surrogate type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyFields {
    pub technical_key: Option<String>,
    pub primary_key: Option<String>,
}

impl KeyFields {
    pub fn is_key(&self, name: &str) -> bool {
        [&self.technical_key, &self.primary_key]
            .into_iter()
            .flatten()
            .any(|k| names_match(k, name))
    }
}

/// Everything a dialect needs to build a bulk-load command line.
#[derive(Debug, Clone)]
pub struct LoaderSpec<'a> {
    pub connection: &'a ConnectionParams,
    pub schema: Option<&'a str>,
    pub table: &'a str,
    /// Target columns in the order the encoder writes them.
    pub columns: &'a [String],
    pub pipe: &'a Path,
    pub delimiter: &'a str,
    pub enclosure: Option<&'a str>,
    pub escape: Option<&'a str>,
    pub replace: bool,
    pub ignore_errors: bool,
}

/// A fully built external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoaderCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment variables (credentials are passed here, never as args).
    pub env: Vec<(String, String)>,
}

impl LoaderCommand {
    /// Render for logging. Environment values are not included.
    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            if arg.contains(char::is_whitespace) {
                out.push('\'');
                out.push_str(arg);
                out.push('\'');
            } else {
                out.push_str(arg);
            }
        }
        out
    }
}

/// Family-specific SQL and connection rules.
pub trait DialectAdapter: Send + Sync {
    /// Human-readable family name.
    fn family_name(&self) -> &'static str;

    fn default_port(&self, access: AccessMode) -> Option<u16>;

    fn driver_class(&self, access: AccessMode) -> &'static str;

    fn connection_url(&self, params: &ConnectionParams) -> String;

    /// DDL type for one field. Unsupported types yield [`UNKNOWN_TYPE`].
    fn map_column_type(&self, field: &FieldDescriptor, is_key: bool) -> String;

    /// Quote a single identifier.
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Default text written for a null value by this family's loader.
    fn null_marker(&self, escape: Option<&str>) -> String {
        let _ = escape;
        String::new()
    }

    /// Command line that bulk-loads the pipe into the target table.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the family has no bulk loader or
    /// the requested options are unsupported.
    fn loader_command(&self, spec: &LoaderSpec<'_>) -> Result<LoaderCommand, StepError> {
        let _ = spec;
        Err(StepError::config(
            "NO_BULK_LOADER",
            format!(
                "{} has no bulk loader; configure loader.command",
                self.family_name()
            ),
        ))
    }

    /// `name TYPE` column definition.
    fn field_definition(&self, field: &FieldDescriptor, keys: &KeyFields) -> String {
        format!(
            "{} {}",
            field.name,
            self.map_column_type(field, keys.is_key(&field.name))
        )
    }

    fn add_column_statement(&self, table: &str, field: &FieldDescriptor, keys: &KeyFields) -> String {
        format!("ALTER TABLE {table} ADD {}", self.field_definition(field, keys))
    }

    fn modify_column_statement(
        &self,
        table: &str,
        field: &FieldDescriptor,
        keys: &KeyFields,
    ) -> String {
        format!("ALTER TABLE {table} MODIFY {}", self.field_definition(field, keys))
    }

    /// Quoted `schema.table`, or just the table when no schema is given.
    fn schema_table(&self, schema: Option<&str>, table: &str) -> String {
        match schema.map(str::trim).filter(|s| !s.is_empty()) {
            Some(schema) => format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(table)
            ),
            None => self.quote_identifier(table),
        }
    }
}

/// Integer-class sizing shared by every family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NumericClass {
    Decimal { length: u32, precision: u32 },
    BigInt,
    SmallInt,
    Integer,
    Floating,
}

pub(crate) fn classify_numeric(field: &FieldDescriptor) -> NumericClass {
    let precision = field.precision.unwrap_or(0);
    match field.length.filter(|l| *l > 0) {
        Some(length) if precision > 0 || length > 18 => NumericClass::Decimal { length, precision },
        Some(length) if length > 9 => NumericClass::BigInt,
        Some(length) if length < 5 => NumericClass::SmallInt,
        Some(_) => NumericClass::Integer,
        None => NumericClass::Floating,
    }
}

pub(crate) fn odbc_url(params: &ConnectionParams) -> String {
    format!("jdbc:odbc:{}", params.database)
}

pub(crate) fn odbc_driver() -> &'static str {
    ODBC_DRIVER
}

/// `ALTER TABLE ... ADD` for every field of `fields`.
///
/// # Errors
///
/// Returns a `schema` error naming every field whose type the dialect
/// could only render as [`UNKNOWN_TYPE`].
pub fn add_column_statements(
    dialect: &dyn DialectAdapter,
    table: &str,
    fields: &RowMetadata,
    keys: &KeyFields,
) -> Result<Vec<String>, StepError> {
    let unknown: Vec<&str> = fields
        .iter()
        .filter(|f| dialect.map_column_type(f, keys.is_key(&f.name)) == UNKNOWN_TYPE)
        .map(|f| f.name.as_str())
        .collect();
    if !unknown.is_empty() {
        return Err(StepError::schema(
            "UNKNOWN_COLUMN_TYPE",
            format!(
                "{} cannot express the type of: {}",
                dialect.family_name(),
                unknown.join(", ")
            ),
        ));
    }
    Ok(fields
        .iter()
        .map(|f| dialect.add_column_statement(table, f, keys))
        .collect())
}

/// Join quoted column names with `", "`.
pub(crate) fn column_list(dialect: &dyn DialectAdapter, columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| dialect.quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulkbyte_types::value_type::ValueType;
    use rstest::rstest;

    fn number(length: Option<u32>, precision: Option<u32>) -> FieldDescriptor {
        FieldDescriptor {
            name: "amount".into(),
            value_type: ValueType::Number,
            length,
            precision,
            origin: String::new(),
        }
    }

    #[rstest]
    #[case(Some(3), None, NumericClass::SmallInt)]
    #[case(Some(9), None, NumericClass::Integer)]
    #[case(Some(5), Some(0), NumericClass::Integer)]
    #[case(Some(10), None, NumericClass::BigInt)]
    #[case(Some(18), None, NumericClass::BigInt)]
    #[case(Some(19), None, NumericClass::Decimal { length: 19, precision: 0 })]
    #[case(Some(20), Some(2), NumericClass::Decimal { length: 20, precision: 2 })]
    #[case(Some(4), Some(1), NumericClass::Decimal { length: 4, precision: 1 })]
    #[case(None, None, NumericClass::Floating)]
    #[case(Some(0), Some(2), NumericClass::Floating)]
    fn numeric_thresholds(
        #[case] length: Option<u32>,
        #[case] precision: Option<u32>,
        #[case] expected: NumericClass,
    ) {
        assert_eq!(classify_numeric(&number(length, precision)), expected);
    }

    #[rstest]
    #[case(DatabaseFamily::Hypersonic, "SMALLINT", "INTEGER", "BIGINT", "NUMERIC(20, 2)")]
    #[case(DatabaseFamily::Postgres, "SMALLINT", "INTEGER", "BIGINT", "NUMERIC(20, 2)")]
    #[case(DatabaseFamily::Mysql, "SMALLINT", "INT", "BIGINT", "DECIMAL(20, 2)")]
    fn numeric_mapping_per_family(
        #[case] family: DatabaseFamily,
        #[case] small: &str,
        #[case] int: &str,
        #[case] big: &str,
        #[case] decimal: &str,
    ) {
        let d = family.dialect();
        assert_eq!(d.map_column_type(&number(Some(3), None), false), small);
        assert_eq!(d.map_column_type(&number(Some(9), None), false), int);
        assert_eq!(d.map_column_type(&number(Some(10), None), false), big);
        assert_eq!(d.map_column_type(&number(Some(20), Some(2)), false), decimal);
    }

    #[rstest]
    #[case(DatabaseFamily::Hypersonic)]
    #[case(DatabaseFamily::Postgres)]
    #[case(DatabaseFamily::Mysql)]
    fn key_field_ignores_sizing(#[case] family: DatabaseFamily) {
        let d = family.dialect();
        let surrogate = d.map_column_type(&number(Some(3), None), true);
        assert_eq!(d.map_column_type(&number(Some(20), Some(2)), true), surrogate);
        assert_eq!(d.map_column_type(&number(None, None), true), surrogate);
        assert_ne!(surrogate, d.map_column_type(&number(Some(3), None), false));
    }

    #[test]
    fn key_fields_match_case_insensitively() {
        let keys = KeyFields {
            technical_key: Some("ID".into()),
            primary_key: None,
        };
        assert!(keys.is_key("id"));
        assert!(!keys.is_key("name"));
        assert!(!KeyFields::default().is_key("id"));

        let keys = KeyFields {
            technical_key: None,
            primary_key: Some("Ñumero".into()),
        };
        assert!(keys.is_key("ñUMERO"));
    }

    #[test]
    fn unknown_type_is_flagged() {
        let field = FieldDescriptor::new("mystery", ValueType::None);
        for family in [DatabaseFamily::Hypersonic, DatabaseFamily::Mysql, DatabaseFamily::Postgres] {
            let ddl = family
                .dialect()
                .add_column_statement("t", &field, &KeyFields::default());
            assert!(ddl.ends_with(UNKNOWN_TYPE), "{family}: {ddl}");
        }
    }

    #[test]
    fn ddl_preview_rejects_unknown_types() {
        let keys = KeyFields {
            technical_key: Some("id".into()),
            primary_key: None,
        };
        let fields = RowMetadata::from_fields([
            FieldDescriptor::new("id", ValueType::Integer).with_length(9),
            FieldDescriptor::new("label", ValueType::String).with_length(40),
        ])
        .unwrap();
        let ddl = add_column_statements(&MySql, "`customers`", &fields, &keys).unwrap();
        assert_eq!(
            ddl,
            vec![
                "ALTER TABLE `customers` ADD id BIGINT AUTO_INCREMENT NOT NULL PRIMARY KEY",
                "ALTER TABLE `customers` ADD label VARCHAR(40)",
            ]
        );

        let mut fields = fields;
        fields
            .add_field(FieldDescriptor::new("mystery", ValueType::None))
            .unwrap();
        let err = add_column_statements(&MySql, "t", &fields, &keys).unwrap_err();
        assert_eq!(err.code, "UNKNOWN_COLUMN_TYPE");
        assert!(err.message.contains("mystery"));
    }

    #[test]
    fn family_deserializes_with_aliases() {
        let fam: DatabaseFamily = serde_yaml::from_str("postgresql").unwrap();
        assert_eq!(fam, DatabaseFamily::Postgres);
        let fam: DatabaseFamily = serde_yaml::from_str("mysql").unwrap();
        assert_eq!(fam, DatabaseFamily::Mysql);
    }

    #[test]
    fn loader_command_display_quotes_spaced_args() {
        let cmd = LoaderCommand {
            program: "psql".into(),
            args: vec!["--command".into(), "select 1".into()],
            env: vec![("PGPASSWORD".into(), "secret".into())],
        };
        assert_eq!(cmd.display(), "psql --command 'select 1'");
    }
}
