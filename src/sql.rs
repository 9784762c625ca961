use std::collections::HashMap;
use std::str::FromStr;

use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::calendar::{parse_date, parse_timestamp};
use crate::limits::*;
use crate::model::*;

/// Aggregations exposed as read-only virtual tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    BookingStats,
    Overview,
    Revenue,
    RevenueByType,
    Occupancy,
    SpaceUsage,
    SpaceTypes,
    ClientRevenue,
    ClientSegments,
    Dashboard,
    BillingStats,
}

impl Report {
    fn from_table(table: &str) -> Option<Self> {
        Some(match table {
            "booking_stats" => Report::BookingStats,
            "overview" => Report::Overview,
            "revenue" => Report::Revenue,
            "revenue_by_type" => Report::RevenueByType,
            "occupancy" => Report::Occupancy,
            "space_usage" => Report::SpaceUsage,
            "space_types" => Report::SpaceTypes,
            "client_revenue" => Report::ClientRevenue,
            "client_segments" => Report::ClientSegments,
            "dashboard" => Report::Dashboard,
            "billing_stats" => Report::BillingStats,
            _ => return None,
        })
    }

    pub fn table(&self) -> &'static str {
        match self {
            Report::BookingStats => "booking_stats",
            Report::Overview => "overview",
            Report::Revenue => "revenue",
            Report::RevenueByType => "revenue_by_type",
            Report::Occupancy => "occupancy",
            Report::SpaceUsage => "space_usage",
            Report::SpaceTypes => "space_types",
            Report::ClientRevenue => "client_revenue",
            Report::ClientSegments => "client_segments",
            Report::Dashboard => "dashboard",
            Report::BillingStats => "billing_stats",
        }
    }
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertSpace(NewSpace),
    UpdateSpace {
        id: Ulid,
        patch: SpacePatch,
    },
    DeleteSpace {
        id: Ulid,
    },
    SelectSpaces {
        id: Option<Ulid>,
        filter: SpaceFilter,
    },
    InsertClient(NewClient),
    UpdateClient {
        id: Ulid,
        patch: ClientPatch,
    },
    DeactivateClient {
        id: Ulid,
    },
    SelectClients {
        id: Option<Ulid>,
        filter: ClientFilter,
    },
    InsertBooking(NewBooking),
    UpdateBooking {
        id: Ulid,
        patch: BookingPatch,
    },
    SetBookingStatus {
        id: Ulid,
        status: BookingStatus,
    },
    CancelBooking {
        id: Ulid,
    },
    SelectBookings {
        id: Option<Ulid>,
        filter: BookingFilter,
        page: Page,
    },
    SelectBookingTotals {
        filter: BookingFilter,
    },
    SelectConflicts {
        space_id: Ulid,
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    },
    SelectAvailability {
        space_id: Ulid,
        date: NaiveDate,
    },
    SelectFreeSlots {
        space_id: Ulid,
        date: NaiveDate,
        min_duration: Option<Ms>,
    },
    InsertInvoice(NewInvoice),
    PayInvoice {
        id: Ulid,
    },
    GenerateInvoices,
    SelectInvoices {
        id: Option<Ulid>,
        filter: InvoiceFilter,
    },
    SelectReport {
        report: Report,
        range: Option<DateRange>,
        space_id: Option<Ulid>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };
    if stmts.len() > 1 {
        return Err(SqlError::Unsupported("multiple statements".into()));
    }

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection.as_ref()),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        Statement::Call(function) => match object_name_last(&function.name).as_deref() {
            Some("generate_invoices") => Ok(Command::GenerateInvoices),
            _ => Err(SqlError::Unsupported(format!("CALL {}", function.name))),
        },
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Name of the row set a statement returns, if it returns rows. Works on
/// statements still holding `$n` placeholders.
pub fn result_table(sql: &str) -> Option<String> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    match stmts.first()? {
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(select) => table_factor_name(&select.from.first()?.relation).ok(),
            _ => None,
        },
        Statement::Call(function) => object_name_last(&function.name),
        _ => None,
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let mut row = insert_row(insert, &table)?;

    let cmd = match table.as_str() {
        "spaces" => {
            let hourly_rate = parse_f64(&row.require("hourly_rate")?)?;
            Command::InsertSpace(NewSpace {
                id: row.ulid("id")?,
                name: parse_string(&row.require("name")?)?,
                space_type: parse_enum(&row.require("type")?)?,
                capacity: parse_u32(&row.require("capacity")?)?,
                hourly_rate,
                daily_rate: row.take("daily_rate").map(|e| parse_f64(&e)).transpose()?.unwrap_or(0.0),
                monthly_rate: row.take("monthly_rate").map(|e| parse_f64(&e)).transpose()?.unwrap_or(0.0),
                description: row.nullable_string("description")?.flatten(),
            })
        }
        "clients" => Command::InsertClient(NewClient {
            id: row.ulid("id")?,
            name: parse_string(&row.require("name")?)?,
            email: parse_string(&row.require("email")?)?,
            phone: row.nullable_string("phone")?.flatten(),
            company: row.nullable_string("company")?.flatten(),
            segment: row.nullable_string("segment")?.flatten(),
        }),
        "bookings" => Command::InsertBooking(NewBooking {
            id: row.ulid("id")?,
            space_id: row.ulid("space_id")?,
            client_id: row.ulid("client_id")?,
            start: parse_ms(&row.require("start")?)?,
            end: parse_ms(&row.require("end")?)?,
            notes: row.nullable_string("notes")?.flatten(),
        }),
        "invoices" => Command::InsertInvoice(NewInvoice {
            id: row.ulid("id")?,
            client_id: row.ulid("client_id")?,
            booking_id: row.take("booking_id").map(|e| parse_ulid_or_null(&e)).transpose()?.flatten(),
            amount: row.take("amount").map(|e| parse_f64(&e)).transpose()?,
            tax_amount: row.take("tax_amount").map(|e| parse_f64(&e)).transpose()?,
            due_date: row.take("due_date").map(|e| parse_ms(&e)).transpose()?,
            notes: row.nullable_string("notes")?.flatten(),
        }),
        _ => return Err(SqlError::UnknownTable(table)),
    };
    row.finish()?;
    Ok(cmd)
}

fn insert_row(insert: &ast::Insert, table: &str) -> Result<Fields, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    let rows = match body.body.as_ref() {
        SetExpr::Values(values) => &values.rows,
        _ => return Err(SqlError::Parse("expected VALUES".into())),
    };
    let values = match rows.as_slice() {
        [row] => row,
        [] => return Err(SqlError::Parse("empty VALUES".into())),
        _ => return Err(SqlError::Unsupported("multi-row INSERT".into())),
    };
    if insert.columns.is_empty() {
        return Err(SqlError::Parse(format!("INSERT INTO {table} needs a column list")));
    }
    if insert.columns.len() != values.len() {
        return Err(SqlError::WrongArity(
            table.to_string(),
            insert.columns.len(),
            values.len(),
        ));
    }
    let mut fields = Fields::new(table);
    for (column, value) in insert.columns.iter().zip(values) {
        fields.insert(column.value.to_lowercase(), value.clone())?;
    }
    Ok(fields)
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: Option<&Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = where_id(&table, selection)?;
    let mut set = Fields::new(&table);
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => {
                object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))?
            }
            AssignmentTarget::Tuple(_) => return Err(SqlError::Unsupported("tuple assignment".into())),
        };
        set.insert(column, assignment.value.clone())?;
    }

    let cmd = match table.as_str() {
        "spaces" => Command::UpdateSpace {
            id,
            patch: SpacePatch {
                name: set.take("name").map(|e| parse_string(&e)).transpose()?,
                space_type: set.take("type").map(|e| parse_enum(&e)).transpose()?,
                capacity: set.take("capacity").map(|e| parse_u32(&e)).transpose()?,
                hourly_rate: set.take("hourly_rate").map(|e| parse_f64(&e)).transpose()?,
                daily_rate: set.take("daily_rate").map(|e| parse_f64(&e)).transpose()?,
                monthly_rate: set.take("monthly_rate").map(|e| parse_f64(&e)).transpose()?,
                description: set.nullable_string("description")?,
                active: set.take("active").map(|e| parse_bool(&e)).transpose()?,
            },
        },
        "clients" => Command::UpdateClient {
            id,
            patch: ClientPatch {
                name: set.take("name").map(|e| parse_string(&e)).transpose()?,
                email: set.take("email").map(|e| parse_string(&e)).transpose()?,
                phone: set.nullable_string("phone")?,
                company: set.nullable_string("company")?,
                segment: set.nullable_string("segment")?,
            },
        },
        "bookings" => match set.take("status") {
            // A status change is a transition of its own, never mixed with field edits.
            Some(status) if set.is_empty() => Command::SetBookingStatus {
                id,
                status: parse_enum(&status)?,
            },
            Some(_) => {
                return Err(SqlError::Unsupported(
                    "status cannot be changed together with other columns".into(),
                ));
            }
            None => Command::UpdateBooking {
                id,
                patch: BookingPatch {
                    space_id: set.take("space_id").map(|e| parse_ulid(&e)).transpose()?,
                    client_id: set.take("client_id").map(|e| parse_ulid(&e)).transpose()?,
                    start: set.take("start").map(|e| parse_ms(&e)).transpose()?,
                    end: set.take("end").map(|e| parse_ms(&e)).transpose()?,
                    notes: set.nullable_string("notes")?,
                },
            },
        },
        "invoices" => {
            let status: InvoiceStatus = parse_enum(&set.require("status")?)?;
            if status != InvoiceStatus::Paid {
                return Err(SqlError::Unsupported("invoices can only be set to PAID".into()));
            }
            Command::PayInvoice { id }
        }
        _ => return Err(SqlError::UnknownTable(table)),
    };
    set.finish()?;
    Ok(cmd)
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = where_id(&table, delete.selection.as_ref())?;

    match table.as_str() {
        "spaces" => Ok(Command::DeleteSpace { id }),
        "clients" => Ok(Command::DeactivateClient { id }),
        "bookings" => Ok(Command::CancelBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let mut w = Conditions::parse(&table, select.selection.as_ref())?;

    let cmd = match table.as_str() {
        "spaces" => {
            let id = w.ulid_eq("id")?;
            let mut filter = SpaceFilter {
                space_type: w.take_eq("type").map(|e| parse_enum(&e)).transpose()?,
                active: w.take_eq("active").map(|e| parse_bool(&e)).transpose()?,
                ..Default::default()
            };
            if let Some((_, e)) = w.take("capacity", &[Cmp::GtEq]) {
                filter.min_capacity = Some(parse_u32(&e)?);
            }
            if let Some((_, e)) = w.take("capacity", &[Cmp::LtEq]) {
                filter.max_capacity = Some(parse_u32(&e)?);
            }
            Command::SelectSpaces { id, filter }
        }
        "clients" => Command::SelectClients {
            id: w.ulid_eq("id")?,
            filter: ClientFilter {
                active: w.take_eq("active").map(|e| parse_bool(&e)).transpose()?,
                segment: w.take_eq("segment").map(|e| parse_string(&e)).transpose()?,
                search: w.take_eq("search").map(|e| parse_string(&e)).transpose()?,
            },
        },
        "bookings" => {
            let id = w.ulid_eq("id")?;
            let filter = booking_filter(&mut w)?;
            let page = Page {
                page: w.take_eq("page").map(|e| parse_u32(&e)).transpose()?.unwrap_or(1),
                per_page: w
                    .take_eq("per_page")
                    .map(|e| parse_u32(&e))
                    .transpose()?
                    .unwrap_or(DEFAULT_PAGE_SIZE),
            };
            Command::SelectBookings { id, filter, page }
        }
        "booking_totals" => Command::SelectBookingTotals {
            filter: booking_filter(&mut w)?,
        },
        "conflicts" => {
            let space_id = w.ulid_eq("space_id")?.ok_or(SqlError::MissingFilter("space_id"))?;
            let (_, start) = w
                .take("start", &[Cmp::Eq, Cmp::GtEq])
                .ok_or(SqlError::MissingFilter("start"))?;
            let (_, end) = w
                .take("end", &[Cmp::Eq, Cmp::LtEq])
                .ok_or(SqlError::MissingFilter("end"))?;
            let exclude = w
                .take("id", &[Cmp::NotEq])
                .map(|(_, e)| parse_ulid(&e))
                .transpose()?;
            Command::SelectConflicts {
                space_id,
                start: parse_ms(&start)?,
                end: parse_ms(&end)?,
                exclude,
            }
        }
        "availability" => Command::SelectAvailability {
            space_id: w.ulid_eq("space_id")?.ok_or(SqlError::MissingFilter("space_id"))?,
            date: parse_date_expr(&w.take_eq("date").ok_or(SqlError::MissingFilter("date"))?)?,
        },
        "free_slots" => Command::SelectFreeSlots {
            space_id: w.ulid_eq("space_id")?.ok_or(SqlError::MissingFilter("space_id"))?,
            date: parse_date_expr(&w.take_eq("date").ok_or(SqlError::MissingFilter("date"))?)?,
            min_duration: w.take_eq("min_duration").map(|e| parse_i64(&e)).transpose()?,
        },
        "invoices" => {
            let id = w.ulid_eq("id")?;
            let created_from = w.take("created_at", &[Cmp::GtEq]).map(|(_, e)| parse_ms(&e)).transpose()?;
            let created_before = w.take("created_at", &[Cmp::Lt]).map(|(_, e)| parse_ms(&e)).transpose()?;
            let created_within = match (created_from, created_before) {
                (None, None) => None,
                (from, before) => Some(window(
                    from.unwrap_or(MIN_VALID_TIMESTAMP_MS),
                    before.unwrap_or(MAX_VALID_TIMESTAMP_MS),
                )?),
            };
            Command::SelectInvoices {
                id,
                filter: InvoiceFilter {
                    client_id: w.ulid_eq("client_id")?,
                    booking_id: w.ulid_eq("booking_id")?,
                    status: w.take_eq("status").map(|e| parse_enum(&e)).transpose()?,
                    created_within,
                },
            }
        }
        other => match Report::from_table(other) {
            Some(report) => Command::SelectReport {
                report,
                range: date_range(&mut w)?,
                space_id: match report {
                    Report::BookingStats => w.ulid_eq("space_id")?,
                    _ => None,
                },
            },
            None => return Err(SqlError::UnknownTable(table)),
        },
    };
    w.finish()?;
    Ok(cmd)
}

/// `space_id`, `client_id`, `status = …` / `status <> 'CANCELLED'`, and a time
/// window: `start >= a AND start < b` keeps bookings starting inside it,
/// `"end" > a AND start < b` keeps bookings overlapping it.
fn booking_filter(w: &mut Conditions) -> Result<BookingFilter, SqlError> {
    let mut filter = BookingFilter {
        space_id: w.ulid_eq("space_id")?,
        client_id: w.ulid_eq("client_id")?,
        ..Default::default()
    };
    while let Some((op, e)) = w.take("status", &[Cmp::Eq, Cmp::NotEq]) {
        let status: BookingStatus = parse_enum(&e)?;
        match op {
            Cmp::Eq => filter.status = Some(status),
            _ if status == BookingStatus::Cancelled => filter.exclude_cancelled = true,
            _ => return Err(SqlError::Unsupported("status <> only supports 'CANCELLED'".into())),
        }
    }

    let start_from = w.take("start", &[Cmp::GtEq]).map(|(_, e)| parse_ms(&e)).transpose()?;
    let start_before = w.take("start", &[Cmp::Lt]).map(|(_, e)| parse_ms(&e)).transpose()?;
    let end_after = w.take("end", &[Cmp::Gt]).map(|(_, e)| parse_ms(&e)).transpose()?;
    match end_after {
        Some(from) => {
            filter.overlaps = Some(window(from, start_before.unwrap_or(MAX_VALID_TIMESTAMP_MS))?);
            if let Some(from) = start_from {
                filter.starts_within = Some(window(from, MAX_VALID_TIMESTAMP_MS)?);
            }
        }
        None if start_from.is_some() || start_before.is_some() => {
            filter.starts_within = Some(window(
                start_from.unwrap_or(MIN_VALID_TIMESTAMP_MS),
                start_before.unwrap_or(MAX_VALID_TIMESTAMP_MS),
            )?);
        }
        None => {}
    }
    Ok(filter)
}

/// `date = d`, or `date >= a AND date <= b` (both inclusive).
fn date_range(w: &mut Conditions) -> Result<Option<DateRange>, SqlError> {
    if let Some(e) = w.take_eq("date") {
        let date = parse_date_expr(&e)?;
        return Ok(DateRange::new(date, date));
    }
    let from = w.take("date", &[Cmp::GtEq]).map(|(_, e)| parse_date_expr(&e)).transpose()?;
    let to = w.take("date", &[Cmp::LtEq]).map(|(_, e)| parse_date_expr(&e)).transpose()?;
    match (from, to) {
        (None, None) => Ok(None),
        (Some(from), Some(to)) => DateRange::new(from, to)
            .map(Some)
            .ok_or_else(|| SqlError::Parse(format!("empty date range {from} .. {to}"))),
        (None, Some(_)) => Err(SqlError::MissingFilter("date >=")),
        (Some(_), None) => Err(SqlError::MissingFilter("date <=")),
    }
}

fn window(start: Ms, end: Ms) -> Result<Span, SqlError> {
    Span::checked(start, end).ok_or_else(|| SqlError::Parse(format!("empty window [{start}, {end})")))
}

// ── Column/value collections ──────────────────────────────────

/// Named values of an INSERT row or an UPDATE SET list.
struct Fields {
    table: String,
    values: HashMap<String, Expr>,
}

impl Fields {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            values: HashMap::new(),
        }
    }

    fn insert(&mut self, column: String, value: Expr) -> Result<(), SqlError> {
        if self.values.contains_key(&column) {
            return Err(SqlError::Parse(format!("column {column} given twice")));
        }
        self.values.insert(column, value);
        Ok(())
    }

    fn take(&mut self, column: &str) -> Option<Expr> {
        self.values.remove(column)
    }

    fn require(&mut self, column: &'static str) -> Result<Expr, SqlError> {
        self.take(column).ok_or(SqlError::MissingColumn(column))
    }

    fn ulid(&mut self, column: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid(&self.require(column)?)
    }

    /// `None` when absent, `Some(None)` when set to NULL.
    fn nullable_string(&mut self, column: &str) -> Result<Option<Option<String>>, SqlError> {
        self.take(column).map(|e| parse_string_or_null(&e)).transpose()
    }

    fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn finish(self) -> Result<(), SqlError> {
        match self.values.into_keys().min() {
            Some(column) => Err(SqlError::UnknownColumn {
                table: self.table,
                column,
            }),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cmp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

/// `column <op> value` conjuncts of a WHERE clause. Only AND is supported.
struct Conditions {
    table: String,
    items: Vec<(String, Cmp, Expr)>,
}

impl Conditions {
    fn parse(table: &str, selection: Option<&Expr>) -> Result<Self, SqlError> {
        let mut items = Vec::new();
        if let Some(expr) = selection {
            collect_conjuncts(expr, &mut items)?;
        }
        Ok(Self {
            table: table.to_string(),
            items,
        })
    }

    fn take(&mut self, column: &str, ops: &[Cmp]) -> Option<(Cmp, Expr)> {
        let pos = self
            .items
            .iter()
            .position(|(c, op, _)| c == column && ops.contains(op))?;
        let (_, op, value) = self.items.remove(pos);
        Some((op, value))
    }

    fn take_eq(&mut self, column: &str) -> Option<Expr> {
        self.take(column, &[Cmp::Eq]).map(|(_, e)| e)
    }

    fn ulid_eq(&mut self, column: &str) -> Result<Option<Ulid>, SqlError> {
        self.take_eq(column).map(|e| parse_ulid(&e)).transpose()
    }

    fn finish(self) -> Result<(), SqlError> {
        match self.items.into_iter().next() {
            Some((column, _, _)) => Err(SqlError::UnknownColumn {
                table: self.table,
                column,
            }),
            None => Ok(()),
        }
    }
}

fn collect_conjuncts(expr: &Expr, out: &mut Vec<(String, Cmp, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_conjuncts(inner, out),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_conjuncts(left, out)?;
            collect_conjuncts(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
            let cmp = match op {
                BinaryOperator::Eq => Cmp::Eq,
                BinaryOperator::NotEq => Cmp::NotEq,
                BinaryOperator::Lt => Cmp::Lt,
                BinaryOperator::LtEq => Cmp::LtEq,
                BinaryOperator::Gt => Cmp::Gt,
                BinaryOperator::GtEq => Cmp::GtEq,
                other => return Err(SqlError::Unsupported(format!("operator {other}"))),
            };
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("expected column on the left of {expr}")))?;
            out.push((column, cmp, (**right).clone()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
    }
}

fn where_id(table: &str, selection: Option<&Expr>) -> Result<Ulid, SqlError> {
    let mut w = Conditions::parse(table, selection)?;
    let id = w.ulid_eq("id")?.ok_or(SqlError::MissingFilter("id"))?;
    w.finish()?;
    Ok(id)
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
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected ULID string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if is_null(expr) {
        Ok(None)
    } else {
        parse_ulid(expr).map(Some)
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        Ok(None)
    } else {
        parse_string(expr).map(Some)
    }
}

fn parse_enum<T: FromStr<Err = String>>(expr: &Expr) -> Result<T, SqlError> {
    parse_string(expr)?.parse().map_err(SqlError::Parse)
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    match extract_value(expr) {
        Some(Value::Number(s, _) | Value::SingleQuotedString(s)) => s
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value}"))),
        None => match expr {
            Expr::UnaryOp {
                op: ast::UnaryOperator::Minus,
                expr,
            } => Ok(-parse_i64(expr)?),
            _ => Err(SqlError::Parse(format!("expected value, got {expr}"))),
        },
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_f64(expr: &Expr) -> Result<f64, SqlError> {
    match extract_value(expr) {
        Some(Value::Number(s, _) | Value::SingleQuotedString(s)) => s
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad number {s}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value}"))),
        None => match expr {
            Expr::UnaryOp {
                op: ast::UnaryOperator::Minus,
                expr,
            } => Ok(-parse_f64(expr)?),
            _ => Err(SqlError::Parse(format!("expected value, got {expr}"))),
        },
    }
}

/// Unix milliseconds, or an RFC 3339 / `YYYY-MM-DD[ HH:MM[:SS]]` string.
fn parse_ms(expr: &Expr) -> Result<Ms, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            parse_timestamp(s).ok_or_else(|| SqlError::Parse(format!("bad timestamp: {s}")))
        }
        _ => parse_i64(expr),
    }
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    parse_date(&s).ok_or_else(|| SqlError::Parse(format!("bad date (expected YYYY-MM-DD): {s}")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
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
    #[error("{table}: unknown column {column}")]
    UnknownColumn { table: String, column: String },
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(String, usize, usize),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}
