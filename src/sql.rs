use std::collections::HashMap;

use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    Register {
        name: String,
        email: String,
        password: String,
    },
    Login {
        email: String,
        password: String,
    },
    Logout,
    InsertSpace {
        name: Option<String>,
        in_service: bool,
    },
    SetSpaceService {
        id: Ulid,
        in_service: bool,
    },
    SelectSpaces,
    SelectCurrentUser,
    InsertBooking {
        from: NaiveDate,
        to: NaiveDate,
    },
    /// `NULL` or an omitted bound keeps the current value.
    AmendBooking {
        id: Ulid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    },
    CancelBooking {
        id: Ulid,
    },
    /// The session user's bookings, optionally just one.
    SelectBookings {
        id: Option<Ulid>,
    },
    SelectAvailability {
        from: NaiveDate,
        to: NaiveDate,
    },
    SelectAvailabilityOnDay {
        day: NaiveDate,
    },
    SelectFreeSpaces {
        from: NaiveDate,
        to: NaiveDate,
    },
    SelectPrice {
        day: NaiveDate,
    },
    SelectTotalPrice {
        from: NaiveDate,
        to: NaiveDate,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// Column order assumed when an INSERT omits its column list.
fn default_columns(table: &str) -> &'static [&'static str] {
    match table {
        "users" => &["name", "email", "password"],
        "sessions" => &["email", "password"],
        "spaces" => &["name"],
        "space_status" => &["space_id", "in_service"],
        "bookings" => &["from", "to"],
        "amendments" => &["booking_id", "from", "to"],
        _ => &[],
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let columns: Vec<String> = if insert.columns.is_empty() {
        default_columns(&table).iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if values.len() != columns.len() {
        return Err(SqlError::WrongArity(columns.len(), values.len()));
    }
    let row: HashMap<String, &Expr> = columns.into_iter().zip(values.iter()).collect();

    match table.as_str() {
        "users" => Ok(Command::Register {
            name: required(&row, "name", parse_string)?,
            email: required(&row, "email", parse_string)?,
            password: required(&row, "password", parse_string)?,
        }),
        "sessions" => Ok(Command::Login {
            email: required(&row, "email", parse_string)?,
            password: required(&row, "password", parse_string)?,
        }),
        "spaces" => Ok(Command::InsertSpace {
            name: optional(&row, "name", parse_string)?,
            in_service: optional(&row, "in_service", parse_bool)?.unwrap_or(true),
        }),
        "space_status" => Ok(Command::SetSpaceService {
            id: required(&row, "space_id", parse_ulid)?,
            in_service: required(&row, "in_service", parse_bool)?,
        }),
        "bookings" => Ok(Command::InsertBooking {
            from: required(&row, "from", parse_date)?,
            to: required(&row, "to", parse_date)?,
        }),
        "amendments" => Ok(Command::AmendBooking {
            id: required(&row, "booking_id", parse_ulid)?,
            from: optional(&row, "from", parse_date)?,
            to: optional(&row, "to", parse_date)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn required<T>(
    row: &HashMap<String, &Expr>,
    column: &'static str,
    parse: fn(&Expr) -> Result<T, SqlError>,
) -> Result<T, SqlError> {
    optional(row, column, parse)?.ok_or(SqlError::MissingColumn(column))
}

/// Absent and `NULL` both yield `None`.
fn optional<T>(
    row: &HashMap<String, &Expr>,
    column: &'static str,
    parse: fn(&Expr) -> Result<T, SqlError>,
) -> Result<Option<T>, SqlError> {
    match row.get(column) {
        None => Ok(None),
        Some(expr) if matches!(extract_value(expr), Some(Value::Null)) => Ok(None),
        Some(expr) => parse(expr).map(Some),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;

    match table.as_str() {
        "sessions" => Ok(Command::Logout),
        "bookings" => Ok(Command::CancelBooking {
            id: extract_where_id(&delete.selection)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = HashMap::new();
    if let Some(selection) = &select.selection {
        extract_eq_filters(selection, &mut filters)?;
    }
    if let Some(column) = filters.keys().find(|c| !allowed_filters(&table).contains(&c.as_str())) {
        return Err(SqlError::Unsupported(format!("filter on {column} in {table}")));
    }
    let date = |column: &'static str| -> Result<NaiveDate, SqlError> {
        filters
            .get(column)
            .ok_or(SqlError::MissingFilter(column))
            .and_then(|e| parse_date(e))
    };

    match table.as_str() {
        "spaces" => Ok(Command::SelectSpaces),
        "users" => Ok(Command::SelectCurrentUser),
        "bookings" => Ok(Command::SelectBookings {
            id: filters.get("id").map(parse_ulid).transpose()?,
        }),
        "availability" if filters.contains_key("day") => Ok(Command::SelectAvailabilityOnDay { day: date("day")? }),
        "availability" => Ok(Command::SelectAvailability {
            from: date("from")?,
            to: date("to")?,
        }),
        "free_spaces" => Ok(Command::SelectFreeSpaces {
            from: date("from")?,
            to: date("to")?,
        }),
        "prices" if filters.contains_key("day") => Ok(Command::SelectPrice { day: date("day")? }),
        "prices" => Ok(Command::SelectTotalPrice {
            from: date("from")?,
            to: date("to")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Columns a SELECT on `table` may filter by.
fn allowed_filters(table: &str) -> &'static [&'static str] {
    match table {
        "bookings" => &["id"],
        "availability" | "prices" => &["from", "to", "day"],
        "free_spaces" => &["from", "to"],
        _ => &[],
    }
}

/// Collect `column = value` terms joined by AND. Other predicates are rejected.
fn extract_eq_filters(expr: &Expr, filters: &mut HashMap<String, Expr>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            extract_eq_filters(left, filters)?;
            extract_eq_filters(right, filters)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left).ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            filters.insert(col, right.as_ref().clone());
            Ok(())
        }
        Expr::Nested(inner) => extract_eq_filters(inner, filters),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

/// Single-row VALUES only.
fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [row] => Ok(row.clone()),
            [] => Err(SqlError::Parse("empty VALUES".into())),
            _ => Err(SqlError::Unsupported("multi-row VALUES".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid(right),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

/// `true`/`false`, `1`/`0`, or their quoted forms (bound parameters arrive quoted).
fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    let text = match extract_value(expr) {
        Some(Value::Boolean(b)) => return Ok(*b),
        Some(Value::Number(n, _)) => n.as_str(),
        Some(Value::SingleQuotedString(s)) => s.as_str(),
        Some(value) => return Err(SqlError::Parse(format!("expected boolean, got {value}"))),
        None => return Err(SqlError::Parse(format!("expected value, got {expr}"))),
    };
    match text.to_ascii_lowercase().as_str() {
        "true" | "t" | "1" => Ok(true),
        "false" | "f" | "0" => Ok(false),
        other => Err(SqlError::Parse(format!("expected boolean, got {other:?}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

/// `'YYYY-MM-DD'`.
fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("expected {0} values, got {1}")]
    WrongArity(usize, usize),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}
