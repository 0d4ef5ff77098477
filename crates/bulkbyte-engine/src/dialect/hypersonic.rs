use bulkbyte_types::row_meta::FieldDescriptor;
use bulkbyte_types::value_type::ValueType;

use super::{
    classify_numeric, odbc_driver, odbc_url, AccessMode, ConnectionParams,
    DialectAdapter, NumericClass, CLOB_LENGTH, UNKNOWN_TYPE,
};

const DEFAULT_VARCHAR: u32 = 255;

/// HSQLDB. Embedded when no port is given; has no bulk loader.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hypersonic;

impl DialectAdapter for Hypersonic {
    fn family_name(&self) -> &'static str {
        "Hypersonic"
    }

    fn default_port(&self, access: AccessMode) -> Option<u16> {
        match access {
            AccessMode::Native => Some(9001),
            AccessMode::Odbc => None,
        }
    }

    fn driver_class(&self, access: AccessMode) -> &'static str {
        match access {
            AccessMode::Native => "org.hsqldb.jdbcDriver",
            AccessMode::Odbc => odbc_driver(),
        }
    }

    fn connection_url(&self, params: &ConnectionParams) -> String {
        if params.access == AccessMode::Odbc {
            return odbc_url(params);
        }
        match params.explicit_port() {
            Some(port) => format!(
                "jdbc:hsqldb:hsql://{}:{}/{}",
                params.host, port, params.database
            ),
            None => format!("jdbc:hsqldb:{}", params.database),
        }
    }

    fn map_column_type(&self, field: &FieldDescriptor, is_key: bool) -> String {
        match field.value_type {
            ValueType::Date => "TIMESTAMP".into(),
            ValueType::Boolean => "CHAR(1)".into(),
            ValueType::Binary => "LONGVARBINARY".into(),
            ValueType::Integer | ValueType::Number | ValueType::BigNumber if is_key => {
                "BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY".into()
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
                Some(length) if length >= CLOB_LENGTH => "LONGVARCHAR".into(),
                Some(length) => format!("VARCHAR({length})"),
                None => format!("VARCHAR({DEFAULT_VARCHAR})"),
            },
            ValueType::None => UNKNOWN_TYPE.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::KeyFields;

    fn params(port: Option<u16>) -> ConnectionParams {
        ConnectionParams {
            host: "db.local".into(),
            port,
            database: "warehouse".into(),
            ..ConnectionParams::default()
        }
    }

    #[test]
    fn blank_or_zero_port_selects_embedded_url() {
        assert_eq!(Hypersonic.connection_url(&params(None)), "jdbc:hsqldb:warehouse");
        assert_eq!(Hypersonic.connection_url(&params(Some(0))), "jdbc:hsqldb:warehouse");
    }

    #[test]
    fn explicit_port_selects_server_url() {
        assert_eq!(
            Hypersonic.connection_url(&params(Some(9001))),
            "jdbc:hsqldb:hsql://db.local:9001/warehouse"
        );
    }

    #[test]
    fn odbc_access() {
        let p = ConnectionParams {
            access: AccessMode::Odbc,
            ..params(Some(9001))
        };
        assert_eq!(Hypersonic.connection_url(&p), "jdbc:odbc:warehouse");
        assert_eq!(Hypersonic.driver_class(AccessMode::Odbc), "sun.jdbc.odbc.JdbcOdbcDriver");
        assert_eq!(Hypersonic.default_port(AccessMode::Odbc), None);
    }

    #[test]
    fn strings_use_default_length_and_clob_threshold() {
        let plain = FieldDescriptor::new("name", ValueType::String);
        assert_eq!(Hypersonic.map_column_type(&plain, false), "VARCHAR(255)");
        let big = plain.clone().with_length(CLOB_LENGTH);
        assert_eq!(Hypersonic.map_column_type(&big, false), "LONGVARCHAR");
        let sized = plain.with_length(40);
        assert_eq!(Hypersonic.map_column_type(&sized, false), "VARCHAR(40)");
    }

    #[test]
    fn alter_statements() {
        let field = FieldDescriptor::new("born", ValueType::Date);
        let keys = KeyFields::default();
        assert_eq!(
            Hypersonic.add_column_statement("people", &field, &keys),
            "ALTER TABLE people ADD born TIMESTAMP"
        );
        assert_eq!(
            Hypersonic.modify_column_statement("people", &field, &keys),
            "ALTER TABLE people MODIFY born TIMESTAMP"
        );
    }

    #[test]
    fn has_no_bulk_loader() {
        let conn = params(None);
        let columns = vec!["id".to_string()];
        let spec = crate::dialect::LoaderSpec {
            connection: &conn,
            schema: None,
            table: "t",
            columns: &columns,
            pipe: std::path::Path::new("/tmp/p"),
            delimiter: "\t",
            enclosure: None,
            escape: None,
            replace: false,
            ignore_errors: false,
        };
        let err = Hypersonic.loader_command(&spec).unwrap_err();
        assert_eq!(err.code, "NO_BULK_LOADER");
    }
}
