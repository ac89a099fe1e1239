//! Statement-kind detection for callers without their own SQL parser.
//!
//! Uses [sqlparser](https://docs.rs/sqlparser/) with the target's dialect.
//! Query text often does not parse strictly (named parameters, vendor
//! extensions, stored-code bodies), so an unparseable statement is
//! classified by its leading keyword instead.

use crate::models::{DatabaseType, QueryKind};
use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};
use tracing::trace;

/// Get the appropriate SQL dialect for the given database type.
fn get_dialect(db_type: DatabaseType) -> Box<dyn Dialect> {
    match db_type {
        DatabaseType::PostgreSQL => Box::new(PostgreSqlDialect {}),
        DatabaseType::MySQL => Box::new(MySqlDialect {}),
        DatabaseType::SQLite => Box::new(SQLiteDialect {}),
    }
}

/// Classify the first statement of `sql`.
///
/// ```
/// use dbsession::db::classify::detect_kind;
/// use dbsession::models::{DatabaseType, QueryKind};
///
/// assert_eq!(detect_kind("SELECT 1", DatabaseType::SQLite), QueryKind::Select);
/// assert_eq!(detect_kind("DROP TABLE t", DatabaseType::SQLite), QueryKind::Ddl);
/// ```
pub fn detect_kind(sql: &str, db_type: DatabaseType) -> QueryKind {
    let dialect = get_dialect(db_type);
    match Parser::parse_sql(dialect.as_ref(), sql) {
        Ok(statements) => match statements.first() {
            Some(stmt) => classify_statement(stmt),
            None => QueryKind::Unknown,
        },
        Err(e) => {
            trace!(error = %e, "Statement did not parse, classifying by keyword");
            classify_keyword(sql)
        }
    }
}

/// Classify every statement of a script, in order.
///
/// A script the parser rejects is split at top-level semicolons and each
/// piece is classified by its leading keyword.
///
/// ```
/// use dbsession::db::classify::detect_kinds;
/// use dbsession::models::{DatabaseType, QueryKind};
///
/// assert_eq!(
///     detect_kinds("UPDATE t SET x = 1; SELECT x FROM t", DatabaseType::SQLite),
///     vec![QueryKind::Dml, QueryKind::Select]
/// );
/// ```
pub fn detect_kinds(sql: &str, db_type: DatabaseType) -> Vec<QueryKind> {
    let dialect = get_dialect(db_type);
    if let Ok(statements) = Parser::parse_sql(dialect.as_ref(), sql) {
        return statements.iter().map(classify_statement).collect();
    }

    match Tokenizer::new(dialect.as_ref(), sql).tokenize() {
        Ok(tokens) => tokens
            .split(|token| *token == Token::SemiColon)
            .map(|piece| piece.iter().map(Token::to_string).collect::<String>())
            .filter(|text| !strip_leading_comments(text).is_empty())
            .map(|text| classify_keyword(&text))
            .collect(),
        Err(e) => {
            trace!(error = %e, "Script did not tokenize, classifying as one statement");
            vec![classify_keyword(sql)]
        }
    }
}

fn classify_statement(stmt: &Statement) -> QueryKind {
    match stmt {
        // =====================================================================
        // Reads
        // =====================================================================
        Statement::Query(_)
        | Statement::ShowTables { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowDatabases { .. }
        | Statement::ShowSchemas { .. }
        | Statement::ShowCreate { .. }
        | Statement::ShowFunctions { .. }
        | Statement::ShowVariable { .. }
        | Statement::ShowVariables { .. }
        | Statement::ShowStatus { .. }
        | Statement::ShowCollation { .. }
        | Statement::ExplainTable { .. }
        | Statement::Explain { .. }
        | Statement::Pragma { .. } => QueryKind::Select,

        // =====================================================================
        // Data changes
        // =====================================================================
        Statement::Insert(_)
        | Statement::Update { .. }
        | Statement::Delete(_)
        | Statement::Merge { .. }
        | Statement::Copy { .. } => QueryKind::Dml,

        // =====================================================================
        // Stored code
        // =====================================================================
        Statement::CreateFunction { .. }
        | Statement::CreateProcedure { .. }
        | Statement::CreateTrigger { .. }
        | Statement::Call { .. }
        | Statement::Execute { .. } => QueryKind::Code,

        // =====================================================================
        // Schema changes
        // =====================================================================
        Statement::CreateTable { .. }
        | Statement::CreateView { .. }
        | Statement::CreateIndex(_)
        | Statement::CreateSchema { .. }
        | Statement::CreateDatabase { .. }
        | Statement::CreateSequence { .. }
        | Statement::CreateType { .. }
        | Statement::CreateRole { .. }
        | Statement::CreateVirtualTable { .. }
        | Statement::CreateExtension { .. }
        | Statement::AlterTable { .. }
        | Statement::AlterView { .. }
        | Statement::AlterIndex { .. }
        | Statement::AlterRole { .. }
        | Statement::AlterType { .. }
        | Statement::Drop { .. }
        | Statement::DropFunction { .. }
        | Statement::DropProcedure { .. }
        | Statement::DropTrigger { .. }
        | Statement::Truncate { .. }
        | Statement::Comment { .. }
        | Statement::Grant { .. }
        | Statement::Revoke { .. } => QueryKind::Ddl,

        _ => QueryKind::Unknown,
    }
}

/// Classify by the first keyword, skipping leading comments.
fn classify_keyword(sql: &str) -> QueryKind {
    let text = strip_leading_comments(sql);
    let mut words = text
        .split(|c: char| c.is_whitespace() || c == '(')
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_uppercase());
    let Some(first) = words.next() else {
        return QueryKind::Unknown;
    };

    match first.as_str() {
        "SELECT" | "WITH" | "SHOW" | "DESCRIBE" | "DESC" | "EXPLAIN" | "VALUES" | "PRAGMA" => {
            QueryKind::Select
        }
        "INSERT" | "UPDATE" | "DELETE" | "MERGE" | "REPLACE" | "UPSERT" => QueryKind::Dml,
        "CALL" | "EXEC" | "EXECUTE" | "BEGIN" | "DECLARE" | "DO" => QueryKind::Code,
        "CREATE" | "ALTER" => {
            // CREATE [OR REPLACE] [DEFINER ...] FUNCTION/PROCEDURE/... is stored code
            let is_code = words.take(6).any(|w| {
                matches!(
                    w.as_str(),
                    "FUNCTION" | "PROCEDURE" | "TRIGGER" | "PACKAGE" | "BODY"
                )
            });
            if is_code {
                QueryKind::Code
            } else {
                QueryKind::Ddl
            }
        }
        "DROP" | "TRUNCATE" | "RENAME" | "COMMENT" | "GRANT" | "REVOKE" => QueryKind::Ddl,
        _ => QueryKind::Unknown,
    }
}

fn strip_leading_comments(sql: &str) -> &str {
    let mut text = sql.trim_start();
    loop {
        if let Some(rest) = text.strip_prefix("--") {
            text = match rest.find('\n') {
                Some(idx) => rest[idx + 1..].trim_start(),
                None => "",
            };
        } else if let Some(rest) = text.strip_prefix("/*") {
            text = match rest.find("*/") {
                Some(idx) => rest[idx + 2..].trim_start(),
                None => "",
            };
        } else {
            return text;
        }
    }
}
