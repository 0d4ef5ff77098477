use bulkbyte_types::error::StepError;
use bulkbyte_types::row_meta::FieldDescriptor;
use bulkbyte_types::value_type::ValueType;

use super::{
    classify_numeric, column_list, odbc_driver, odbc_url, AccessMode, ConnectionParams,
    DialectAdapter, LoaderCommand, LoaderSpec, NumericClass, UNKNOWN_TYPE,
};

const DEFAULT_PORT: u16 = 3306;

/// MySQL / MariaDB, loaded through `LOAD DATA LOCAL INFILE` via the `mysql` client.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySql;

/// Quote `s` as a MySQL string literal.
fn literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

impl DialectAdapter for MySql {
    fn family_name(&self) -> &'static str {
        "MySQL"
    }

    fn default_port(&self, access: AccessMode) -> Option<u16> {
        match access {
            AccessMode::Native => Some(DEFAULT_PORT),
            AccessMode::Odbc => None,
        }
    }

    fn driver_class(&self, access: AccessMode) -> &'static str {
        match access {
            AccessMode::Native => "org.gjt.mm.mysql.Driver",
            AccessMode::Odbc => odbc_driver(),
        }
    }

    fn connection_url(&self, params: &ConnectionParams) -> String {
        if params.access == AccessMode::Odbc {
            return odbc_url(params);
        }
        format!(
            "jdbc:mysql://{}:{}/{}",
            params.host,
            params.explicit_port().unwrap_or(DEFAULT_PORT),
            params.database
        )
    }

    fn map_column_type(&self, field: &FieldDescriptor, is_key: bool) -> String {
        match field.value_type {
            ValueType::Date => "DATETIME".into(),
            ValueType::Boolean => "CHAR(1)".into(),
            ValueType::Binary => "LONGBLOB".into(),
            ValueType::Integer | ValueType::Number | ValueType::BigNumber if is_key => {
                "BIGINT AUTO_INCREMENT NOT NULL PRIMARY KEY".into()
            }
            ValueType::Integer | ValueType::Number | ValueType::BigNumber => {
                match classify_numeric(field) {
                    NumericClass::Decimal { length, precision } => {
                        format!("DECIMAL({length}, {precision})")
                    }
                    NumericClass::BigInt => "BIGINT".into(),
                    NumericClass::SmallInt => "SMALLINT".into(),
                    NumericClass::Integer => "INT".into(),
                    NumericClass::Floating => "DOUBLE".into(),
                }
            }
            ValueType::String => match field.length.filter(|l| *l > 0) {
                Some(1) => "CHAR(1)".into(),
                Some(length) if length < 256 => format!("VARCHAR({length})"),
                Some(length) if length < 65_536 => "TEXT".into(),
                Some(length) if length < 16_777_216 => "MEDIUMTEXT".into(),
                Some(_) => "LONGTEXT".into(),
                None => "TINYTEXT".into(),
            },
            ValueType::None => UNKNOWN_TYPE.into(),
        }
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    /// `\N`, built from the configured escape character.
    fn null_marker(&self, escape: Option<&str>) -> String {
        format!("{}N", escape.unwrap_or("\\"))
    }

    fn loader_command(&self, spec: &LoaderSpec<'_>) -> Result<LoaderCommand, StepError> {
        if spec.columns.is_empty() {
            return Err(StepError::config(
                "NO_COLUMNS",
                "bulk load needs at least one target column",
            ));
        }
        let conn = spec.connection;

        let mut sql = format!(
            "LOAD DATA LOCAL INFILE {} ",
            literal(&spec.pipe.to_string_lossy())
        );
        if spec.replace {
            sql.push_str("REPLACE ");
        } else if spec.ignore_errors {
            sql.push_str("IGNORE ");
        }
        sql.push_str(&format!(
            "INTO TABLE {} FIELDS TERMINATED BY {}",
            self.schema_table(spec.schema, spec.table),
            literal(spec.delimiter)
        ));
        if let Some(enclosure) = spec.enclosure {
            sql.push_str(&format!(" OPTIONALLY ENCLOSED BY {}", literal(enclosure)));
        }
        if let Some(escape) = spec.escape {
            sql.push_str(&format!(" ESCAPED BY {}", literal(escape)));
        }
        sql.push_str(&format!(
            " LINES TERMINATED BY '\\n' ({})",
            column_list(self, spec.columns)
        ));

        let mut args = vec!["--local-infile=1".to_string(), "--batch".to_string()];
        if !conn.host.is_empty() {
            args.push(format!("--host={}", conn.host));
        }
        args.push(format!(
            "--port={}",
            conn.explicit_port().unwrap_or(DEFAULT_PORT)
        ));
        if let Some(user) = &conn.user {
            args.push(format!("--user={user}"));
        }
        args.push(format!("--database={}", conn.database));
        args.push(format!("--execute={sql}"));

        let env = conn
            .password
            .iter()
            .map(|p| ("MYSQL_PWD".to_string(), p.clone()))
            .collect();

        Ok(LoaderCommand {
            program: "mysql".into(),
            args,
            env,
        })
    }
}
