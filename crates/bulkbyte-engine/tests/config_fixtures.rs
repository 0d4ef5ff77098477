//! Step fixtures parse, validate, and produce the expected loader commands.

use std::path::{Path, PathBuf};

use bulkbyte_engine::config::types::OutputFormat;
use bulkbyte_engine::config::{parser, validator};
use bulkbyte_engine::dialect::{DatabaseFamily, LoaderSpec};
use bulkbyte_engine::IfExists;
use bulkbyte_types::FormatHint;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("tests/fixtures/steps")
        .join(name)
}

#[test]
fn mysql_fixture_parses_and_builds_load_command() {
    std::env::set_var("TEST_BB_DB_HOST", "db.internal");
    std::env::set_var("TEST_BB_DB_PASSWORD", "s3cret");

    let config = parser::parse_step(&fixture("mysql_load.yaml")).expect("fixture parses");
    validator::validate_step(&config).expect("fixture is valid");

    assert_eq!(config.pipeline, "nightly_crm");
    assert_eq!(config.mapping.len(), 3);
    assert_eq!(config.mapping.entries()[1].format, FormatHint::StringEscape);
    let connection = config.connection.as_ref().unwrap();
    assert_eq!(connection.family, DatabaseFamily::Mysql);
    assert_eq!(connection.host, "db.internal");

    let params = connection.to_params();
    let dialect = connection.family.dialect();
    assert_eq!(
        dialect.connection_url(&params),
        "jdbc:mysql://db.internal:3306/crm"
    );

    let columns: Vec<String> = config.mapping.columns().iter().map(|c| c.to_string()).collect();
    let command = dialect
        .loader_command(&LoaderSpec {
            connection: &params,
            schema: None,
            table: &config.target.table,
            columns: &columns,
            pipe: Path::new("/tmp/bulkbyte-load.fifo"),
            delimiter: &config.loader.delimiter,
            enclosure: config.loader.enclosure(),
            escape: config.loader.escape(),
            replace: config.loader.replace,
            ignore_errors: config.loader.ignore_errors,
        })
        .unwrap();
    assert_eq!(command.program, "mysql");
    let sql = command.args.last().unwrap();
    assert!(sql.contains("LOAD DATA LOCAL INFILE '/tmp/bulkbyte-load.fifo' REPLACE INTO TABLE `customers`"));
    assert!(sql.ends_with("(`id`, `label`, `created_at`)"));
    assert!(command.env.contains(&("MYSQL_PWD".to_string(), "s3cret".to_string())));
    assert!(!command.display().contains("s3cret"));

    std::env::remove_var("TEST_BB_DB_HOST");
    std::env::remove_var("TEST_BB_DB_PASSWORD");
}

#[test]
fn cube_export_fixture_declares_inline_fields() {
    let config = parser::parse_step(&fixture("cube_export.yaml")).unwrap();
    validator::validate_step(&config).unwrap();

    let meta = config.input.inline_metadata().unwrap().unwrap();
    assert_eq!(meta.field_names(), vec!["order_id", "amount"]);
    assert_eq!(meta.find("amount").unwrap().precision, Some(2));
    let output = config.output.as_ref().unwrap();
    assert_eq!(output.format, OutputFormat::Cube);
    assert_eq!(output.if_exists, IfExists::Rename);
    assert!(!config.has_loader());
    validator::validate_against_metadata(&config, &meta).unwrap();
}

#[test]
fn unknown_family_fails_at_parse_time() {
    let err = parser::parse_step(&fixture("invalid_step.yaml")).unwrap_err();
    let message = format!("{err:#}");
    assert!(
        message.contains("unknown variant") || message.contains("Failed to parse step YAML"),
        "unexpected error: {message}"
    );
}
