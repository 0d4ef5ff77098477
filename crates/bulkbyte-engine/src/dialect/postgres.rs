use bulkbyte_types::error::StepError;
use bulkbyte_types::row_meta::FieldDescriptor;
use bulkbyte_types::value_type::ValueType;

use super::{
    classify_numeric, column_list, odbc_driver, odbc_url, AccessMode, ConnectionParams,
    DialectAdapter, LoaderCommand, LoaderSpec, NumericClass, CLOB_LENGTH, UNKNOWN_TYPE,
};

const DEFAULT_PORT: u16 = 5432;

/// PostgreSQL, loaded through `psql`'s client-side `\copy`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres;

/// Quote `s` as an escape-string literal (`E'...'`).
fn literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 3);
    out.push_str("E'");
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn single_byte(option: &str, value: &str) -> Result<(), StepError> {
    if value.len() == 1 {
        Ok(())
    } else {
        Err(StepError::config(
            "COPY_OPTION",
            format!("psql \\copy needs a single-byte {option}, got {value:?}"),
        ))
    }
}

impl DialectAdapter for Postgres {
    fn family_name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn default_port(&self, access: AccessMode) -> Option<u16> {
        match access {
            AccessMode::Native => Some(DEFAULT_PORT),
            AccessMode::Odbc => None,
        }
    }

    fn driver_class(&self, access: AccessMode) -> &'static str {
        match access {
            AccessMode::Native => "org.postgresql.Driver",
            AccessMode::Odbc => odbc_driver(),
        }
    }

    fn connection_url(&self, params: &ConnectionParams) -> String {
        if params.access == AccessMode::Odbc {
            return odbc_url(params);
        }
        format!(
            "jdbc:postgresql://{}:{}/{}",
            params.host,
            params.explicit_port().unwrap_or(DEFAULT_PORT),
            params.database
        )
    }

    fn map_column_type(&self, field: &FieldDescriptor, is_key: bool) -> String {
        match field.value_type {
            ValueType::Date => "TIMESTAMP".into(),
            ValueType::Boolean => "BOOLEAN".into(),
            ValueType::Binary => "BYTEA".into(),
            ValueType::Integer | ValueType::Number | ValueType::BigNumber if is_key => {
                "BIGSERIAL".into()
            }
            ValueType::Integer | ValueType::Number | ValueType::BigNumber => {
                match classify_numeric(field) {
                    NumericClass::Decimal { length, precision } => {
                        format!("NUMERIC({length}, {precision})")
                    }
                    NumericClass::BigInt => "BIGINT".into(),
                    NumericClass::SmallInt => "SMALLINT".into(),
                    NumericClass::Integer => "INTEGER".into(),
                    NumericClass::Floating => "DOUBLE PRECISION".into(),
                }
            }
            ValueType::String => match field.length.filter(|l| *l > 0) {
                Some(length) if length >= CLOB_LENGTH => "TEXT".into(),
                Some(length) => format!("VARCHAR({length})"),
                None => "TEXT".into(),
            },
            ValueType::None => UNKNOWN_TYPE.into(),
        }
    }

    /// PostgreSQL spells column changes `ALTER COLUMN ... TYPE`.
    fn modify_column_statement(
        &self,
        table: &str,
        field: &FieldDescriptor,
        keys: &super::KeyFields,
    ) -> String {
        format!(
            "ALTER TABLE {table} ALTER COLUMN {} TYPE {}",
            field.name,
            self.map_column_type(field, keys.is_key(&field.name))
        )
    }

    fn loader_command(&self, spec: &LoaderSpec<'_>) -> Result<LoaderCommand, StepError> {
        if spec.replace || spec.ignore_errors {
            return Err(StepError::config(
                "COPY_OPTION",
                "psql \\copy supports neither replace nor ignore_errors",
            ));
        }
        if spec.columns.is_empty() {
            return Err(StepError::config(
                "NO_COLUMNS",
                "bulk load needs at least one target column",
            ));
        }
        single_byte("delimiter", spec.delimiter)?;

        let mut options = vec![
            "FORMAT csv".to_string(),
            format!("DELIMITER {}", literal(spec.delimiter)),
        ];
        if let Some(enclosure) = spec.enclosure {
            single_byte("enclosure", enclosure)?;
            options.push(format!("QUOTE {}", literal(enclosure)));
        }
        if let Some(escape) = spec.escape {
            single_byte("escape", escape)?;
            options.push(format!("ESCAPE {}", literal(escape)));
        }

        let copy = format!(
            "\\copy {} ({}) FROM {} WITH ({})",
            self.schema_table(spec.schema, spec.table),
            column_list(self, spec.columns),
            literal(&spec.pipe.to_string_lossy()),
            options.join(", ")
        );

        let conn = spec.connection;
        let mut args = vec![
            "--no-psqlrc".to_string(),
            "--set=ON_ERROR_STOP=1".to_string(),
        ];
        if !conn.host.is_empty() {
            args.push(format!("--host={}", conn.host));
        }
        args.push(format!(
            "--port={}",
            conn.explicit_port().unwrap_or(DEFAULT_PORT)
        ));
        if let Some(user) = &conn.user {
            args.push(format!("--username={user}"));
        }
        args.push(format!("--dbname={}", conn.database));
        args.push(format!("--command={copy}"));

        let env = conn
            .password
            .iter()
            .map(|p| ("PGPASSWORD".to_string(), p.clone()))
            .collect();

        Ok(LoaderCommand {
            program: "psql".into(),
            args,
            env,
        })
    }
}
