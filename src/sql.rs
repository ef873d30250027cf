use std::collections::HashMap;

use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::admission::BookingRequest;
use crate::limits::*;
use crate::model::*;

const RESERVATIONS: &str = "reservations";

/// Column order assumed by `INSERT INTO reservations VALUES (...)` without a column list.
pub const INSERT_COLUMNS: [&str; 7] = [
    "user_id",
    "owner_name",
    "lab",
    "room",
    "date",
    "start_time",
    "end_time",
];

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertReservation(ReservationInsert),
    SelectReservations(ReservationFilter),
}

/// Row values of an `INSERT INTO reservations`, before the session's user is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationInsert {
    /// Only set when the statement names `user_id`. It must then match the session user.
    pub user_id: Option<UserId>,
    pub owner_name: String,
    pub lab: String,
    pub room: String,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
}

impl ReservationInsert {
    pub fn into_request(self, requester_user_id: UserId) -> BookingRequest {
        BookingRequest {
            requester_user_id,
            requester_name: self.owner_name,
            lab: self.lab,
            room: self.room,
            date: self.date,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(first) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match first {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != RESERVATIONS {
        return Err(SqlError::UnknownTable(table));
    }

    let rows = extract_insert_rows(insert)?;
    if rows.len() > 1 {
        return Err(SqlError::Unsupported("one reservation per INSERT".into()));
    }
    let values = &rows[0];

    let columns: Vec<String> = if insert.columns.is_empty() {
        INSERT_COLUMNS.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if columns.len() != values.len() {
        return Err(SqlError::WrongArity(RESERVATIONS, columns.len(), values.len()));
    }

    let mut fields: HashMap<&str, &Expr> = HashMap::new();
    for (column, value) in columns.iter().zip(values) {
        if !INSERT_COLUMNS.contains(&column.as_str()) {
            return Err(SqlError::UnknownColumn(column.clone()));
        }
        fields.insert(column.as_str(), value);
    }
    let field = |name: &'static str| fields.get(name).copied().ok_or(SqlError::MissingColumn(name));

    Ok(Command::InsertReservation(ReservationInsert {
        user_id: fields.get("user_id").map(|e| parse_i64_expr(e)).transpose()?,
        owner_name: parse_bounded_text(field("owner_name")?, "owner_name", MAX_OWNER_NAME_LEN)?,
        lab: parse_bounded_text(field("lab")?, "lab", MAX_LAB_LEN)?,
        room: parse_bounded_text(field("room")?, "room", MAX_ROOM_LEN)?,
        date: parse_raw_text(field("date")?)?,
        start_time: parse_raw_text(field("start_time")?)?,
        end_time: parse_raw_text(field("end_time")?)?,
    }))
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    if table != RESERVATIONS {
        return Err(SqlError::UnknownTable(table));
    }

    let mut filter = ReservationFilter::default();
    if let Some(selection) = &select.selection {
        extract_reservation_filters(selection, &mut filter)?;
    }
    Ok(Command::SelectReservations(filter))
}

/// Accepts `col = value` terms joined by AND.
fn extract_reservation_filters(expr: &Expr, filter: &mut ReservationFilter) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => extract_reservation_filters(inner, filter),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            extract_reservation_filters(left, filter)?;
            extract_reservation_filters(right, filter)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            match expr_column_name(left).as_deref() {
                Some("user_id") => filter.user_id = Some(parse_i64_expr(right)?),
                Some("lab") => filter.lab = Some(parse_raw_text(right)?),
                Some("room") => filter.room = Some(parse_raw_text(right)?),
                Some("date") => filter.date = Some(parse_date_expr(right)?),
                Some(other) => return Err(SqlError::UnknownColumn(other.to_string())),
                None => return Err(SqlError::Unsupported(format!("filter on {left}"))),
            }
            Ok(())
        }
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

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
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

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected integer, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

/// Text exactly as written. NULL reads as empty, like an absent form field.
fn parse_raw_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(Value::Null) => Ok(String::new()),
        Some(other) => Err(SqlError::Parse(format!("expected text, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_bounded_text(expr: &Expr, column: &'static str, max_len: usize) -> Result<String, SqlError> {
    let text = parse_raw_text(expr)?;
    if text.len() > max_len {
        return Err(SqlError::TooLong(column, max_len));
    }
    Ok(text)
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let text = parse_raw_text(expr)?;
    NaiveDate::parse_from_str(&text, "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {text:?}: {e}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    MissingColumn(&'static str),
    WrongArity(&'static str, usize, usize),
    TooLong(&'static str, usize),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::MissingColumn(c) => write!(f, "missing column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::TooLong(c, max) => write!(f, "{c} longer than {max} bytes"),
        }
    }
}

impl std::error::Error for SqlError {}
