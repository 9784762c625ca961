use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::{debug, error, warn};
use ulid::Ulid;

use crate::auth::{CoworkAuthSource, RoleDirectory};
use crate::engine::{Engine, EngineError, ErrorKind};
use crate::limits::DEFAULT_REPORT_DAYS;
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::sql::{self, Command, Report, SqlError};
use crate::tenant::OrganizationManager;

pub struct CoworkHandler {
    organizations: Arc<OrganizationManager>,
    roles: Arc<RoleDirectory>,
    query_parser: Arc<CoworkQueryParser>,
}

impl CoworkHandler {
    pub fn new(organizations: Arc<OrganizationManager>, roles: Arc<RoleDirectory>) -> Self {
        Self {
            organizations,
            roles,
            query_parser: Arc::new(CoworkQueryParser),
        }
    }

    /// Engine of the connection's database and the principal its login user acts as.
    fn resolve<C: ClientInfo>(&self, client: &C) -> PgWireResult<(Arc<Engine>, Principal)> {
        let metadata = client.metadata();
        let db = metadata.get("database").map(String::as_str).unwrap_or("default");
        let user = metadata.get("user").map(String::as_str).unwrap_or("anonymous");
        let engine = self
            .organizations
            .get_or_create(db)
            .map_err(|e| user_error("08006", format!("organization error: {e}")))?;
        let principal = self.roles.principal(user, engine.organization_id());
        Ok((engine, principal))
    }

    async fn run(
        &self,
        engine: &Engine,
        principal: &Principal,
        cmd: Command,
    ) -> PgWireResult<Response> {
        let label = command_label(&cmd);
        let started = Instant::now();
        debug!(user = %principal.user_id, command = label, "executing");
        let result = execute(engine, principal, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label).record(started.elapsed().as_secs_f64());
        result.map_err(engine_err)
    }
}

async fn execute(
    engine: &Engine,
    principal: &Principal,
    cmd: Command,
) -> Result<Response, EngineError> {
    let p = principal;
    Ok(match cmd {
        Command::InsertSpace(new) => {
            engine.create_space(p, new).await?;
            inserted()
        }
        Command::UpdateSpace { id, patch } => {
            engine.update_space(p, id, patch).await?;
            updated()
        }
        Command::DeleteSpace { id } => {
            engine.delete_space(p, id).await?;
            deleted()
        }
        Command::SelectSpaces { id, filter } => {
            let spaces = match id {
                Some(id) => engine.get_space(&id).await.into_iter().collect(),
                None => engine.list_spaces(&filter).await,
            };
            rows(schema("spaces"), spaces.iter().map(space_row))
        }
        Command::InsertClient(new) => {
            engine.create_client(p, new).await?;
            inserted()
        }
        Command::UpdateClient { id, patch } => {
            engine.update_client(p, id, patch).await?;
            updated()
        }
        Command::DeactivateClient { id } => {
            engine.deactivate_client(p, id).await?;
            deleted()
        }
        Command::SelectClients { id, filter } => {
            let clients = match id {
                Some(id) => engine.get_client(&id).into_iter().collect(),
                None => engine.list_clients(&filter),
            };
            rows(schema("clients"), clients.iter().map(client_row))
        }
        Command::InsertBooking(new) => {
            engine.create_booking(p, new).await?;
            inserted()
        }
        Command::UpdateBooking { id, patch } => {
            engine.update_booking(p, id, patch).await?;
            updated()
        }
        Command::SetBookingStatus { id, status } => {
            engine.set_booking_status(p, id, status).await?;
            updated()
        }
        Command::CancelBooking { id } => {
            engine.cancel_booking(p, id).await?;
            deleted()
        }
        Command::SelectBookings { id, filter, page } => {
            let bookings = match id {
                Some(id) => engine.get_booking(&id).await.into_iter().collect(),
                None => engine.list_bookings(&filter, page).await?.items,
            };
            rows(schema("bookings"), bookings.iter().map(booking_row))
        }
        Command::SelectBookingTotals { filter } => {
            let t = engine.booking_totals(&filter).await;
            rows(
                schema("booking_totals"),
                [vec![count(t.count), Cell::Float(t.total_amount), Cell::Float(t.total_hours)]],
            )
        }
        Command::SelectConflicts {
            space_id,
            start,
            end,
            exclude,
        } => {
            let hit = engine.find_overlapping(space_id, start, end, exclude).await?;
            rows(schema("conflicts"), hit.iter().map(booking_row))
        }
        Command::SelectAvailability { space_id, date } => {
            let day = engine.day_availability(space_id, date).await?;
            rows(
                schema("availability"),
                day.bookings.iter().map(|slot| {
                    vec![
                        Cell::Text(slot.booking_id.to_string()),
                        Cell::Int(slot.start),
                        Cell::Int(slot.end),
                        Cell::Text(slot.status.to_string()),
                    ]
                }),
            )
        }
        Command::SelectFreeSlots {
            space_id,
            date,
            min_duration,
        } => {
            let slots = engine.free_slots(space_id, date, min_duration).await?;
            let sid = space_id.to_string();
            rows(
                schema("free_slots"),
                slots
                    .iter()
                    .map(|s| vec![Cell::Text(sid.clone()), Cell::Int(s.start), Cell::Int(s.end)]),
            )
        }
        Command::InsertInvoice(new) => {
            engine.issue_invoice(p, new).await?;
            inserted()
        }
        Command::PayInvoice { id } => {
            engine.mark_invoice_paid(p, id).await?;
            updated()
        }
        Command::GenerateInvoices => {
            let generated = engine.generate_invoices(p).await?;
            rows(schema("generate_invoices"), [vec![count(generated as u64)]])
        }
        Command::SelectInvoices { id, filter } => {
            let invoices = match id {
                Some(id) => engine.get_invoice(&id).into_iter().collect(),
                None => engine.list_invoices(&filter),
            };
            rows(schema("invoices"), invoices.iter().map(invoice_row))
        }
        Command::SelectReport {
            report,
            range,
            space_id,
        } => report_rows(engine, p, report, range, space_id).await?,
    })
}

async fn report_rows(
    engine: &Engine,
    p: &Principal,
    report: Report,
    range: Option<DateRange>,
    space_id: Option<Ulid>,
) -> Result<Response, EngineError> {
    let fields = schema(report.table());
    Ok(match report {
        Report::BookingStats => {
            let s = engine.booking_stats(p, range, space_id).await?;
            rows(
                fields,
                [vec![
                    count(s.total),
                    count(s.confirmed),
                    count(s.checked_in),
                    count(s.completed),
                    count(s.cancelled),
                    Cell::Float(s.total_revenue),
                    Cell::Float(s.occupancy_rate),
                ]],
            )
        }
        Report::Overview => {
            let o = engine.overview(p, range).await?;
            rows(
                fields,
                [vec![
                    Cell::Float(o.total_revenue),
                    count(o.total_bookings),
                    count(o.active_clients),
                    count(o.total_spaces),
                    Cell::Float(o.occupancy_rate),
                ]],
            )
        }
        Report::Revenue => {
            let r = engine.revenue_report(p, range_or_default(engine, range)).await?;
            rows(
                fields,
                r.daily
                    .iter()
                    .map(|d| vec![Cell::Text(d.date.to_string()), Cell::Float(d.revenue)]),
            )
        }
        Report::RevenueByType => {
            let r = engine.revenue_report(p, range_or_default(engine, range)).await?;
            rows(
                fields,
                r.by_type
                    .iter()
                    .map(|t| vec![Cell::Text(t.space_type.to_string()), Cell::Float(t.revenue)]),
            )
        }
        Report::Occupancy => {
            let o = engine.occupancy_report(p, range_or_default(engine, range)).await?;
            rows(
                fields,
                o.daily.iter().map(|d| {
                    vec![
                        Cell::Text(d.date.to_string()),
                        count(d.bookings),
                        Cell::Float(d.occupancy_rate),
                    ]
                }),
            )
        }
        Report::SpaceUsage => {
            let s = engine.spaces_report(p, range).await?;
            rows(
                fields,
                s.top_spaces.iter().map(|u| {
                    vec![
                        Cell::Text(u.id.to_string()),
                        Cell::Text(u.name.clone()),
                        Cell::Text(u.space_type.to_string()),
                        count(u.bookings_count),
                        Cell::Float(u.total_hours),
                        Cell::Float(u.revenue),
                    ]
                }),
            )
        }
        Report::SpaceTypes => {
            let s = engine.spaces_report(p, range).await?;
            rows(
                fields,
                s.types.iter().map(|t| {
                    vec![
                        Cell::Text(t.space_type.to_string()),
                        count(t.spaces),
                        count(t.bookings),
                    ]
                }),
            )
        }
        Report::ClientRevenue => {
            let c = engine.clients_report(p, range).await?;
            rows(
                fields,
                c.top_clients.iter().map(|r| {
                    vec![
                        Cell::Text(r.id.to_string()),
                        Cell::Text(r.name.clone()),
                        Cell::opt(r.company.clone()),
                        count(r.bookings_count),
                        Cell::Float(r.total_revenue),
                    ]
                }),
            )
        }
        Report::ClientSegments => {
            let c = engine.clients_report(p, range).await?;
            rows(
                fields,
                c.segments
                    .iter()
                    .map(|s| vec![Cell::opt(s.segment.clone()), count(s.count)]),
            )
        }
        Report::Dashboard => {
            let d = engine.dashboard(p).await?;
            rows(
                fields,
                [vec![
                    count(d.total_spaces),
                    count(d.total_clients),
                    count(d.today_bookings),
                    Cell::Float(d.today_revenue),
                    count(d.pending_invoices),
                ]],
            )
        }
        Report::BillingStats => {
            let b = engine.billing_stats(p, range).await?;
            rows(
                fields,
                [vec![
                    count(b.total_invoices),
                    count(b.pending_invoices),
                    count(b.paid_invoices),
                    count(b.overdue_invoices),
                    Cell::Float(b.total_amount),
                    Cell::Float(b.pending_amount),
                    Cell::Float(b.paid_amount),
                    Cell::Float(b.collection_rate),
                ]],
            )
        }
    })
}

/// The last 30 days up to today when a report gets no range.
fn range_or_default(engine: &Engine, range: Option<DateRange>) -> DateRange {
    range.unwrap_or_else(|| {
        let today = engine.calendar().date_of(chrono::Utc::now().timestamp_millis());
        DateRange {
            start: today - chrono::Days::new(DEFAULT_REPORT_DAYS as u64 - 1),
            end: today,
        }
    })
}

fn inserted() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

fn updated() -> Response {
    Response::Execution(Tag::new("UPDATE").with_rows(1))
}

fn deleted() -> Response {
    Response::Execution(Tag::new("DELETE").with_rows(1))
}

// ── Row encoding ─────────────────────────────────────────────────

/// One output value.
#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl Cell {
    fn opt(value: Option<String>) -> Self {
        value.map_or(Cell::Null, Cell::Text)
    }

    fn opt_int(value: Option<i64>) -> Self {
        value.map_or(Cell::Null, Cell::Int)
    }

    fn encode(&self, encoder: &mut DataRowEncoder) -> PgWireResult<()> {
        match self {
            Cell::Text(s) => encoder.encode_field(s),
            Cell::Int(i) => encoder.encode_field(i),
            Cell::Float(f) => encoder.encode_field(f),
            Cell::Bool(b) => encoder.encode_field(b),
            Cell::Null => encoder.encode_field(&None::<String>),
        }
    }
}

fn count(n: u64) -> Cell {
    Cell::Int(i64::try_from(n).unwrap_or(i64::MAX))
}

fn rows<I>(schema: Vec<FieldInfo>, rows: I) -> Response
where
    I: IntoIterator<Item = Vec<Cell>>,
{
    let schema = Arc::new(schema);
    let data: Vec<PgWireResult<_>> = rows
        .into_iter()
        .map(|cells| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            for cell in &cells {
                cell.encode(&mut encoder)?;
            }
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(data)))
}

fn space_row(s: &Space) -> Vec<Cell> {
    vec![
        Cell::Text(s.id.to_string()),
        Cell::Text(s.name.clone()),
        Cell::Text(s.space_type.to_string()),
        Cell::Int(i64::from(s.capacity)),
        Cell::Float(s.hourly_rate),
        Cell::Float(s.daily_rate),
        Cell::Float(s.monthly_rate),
        Cell::opt(s.description.clone()),
        Cell::Bool(s.active),
        Cell::Int(s.created_at),
        Cell::Int(s.updated_at),
    ]
}

fn client_row(c: &Client) -> Vec<Cell> {
    vec![
        Cell::Text(c.id.to_string()),
        Cell::Text(c.name.clone()),
        Cell::Text(c.email.clone()),
        Cell::opt(c.phone.clone()),
        Cell::opt(c.company.clone()),
        Cell::opt(c.segment.clone()),
        Cell::Bool(c.active),
        Cell::Int(c.created_at),
        Cell::Int(c.updated_at),
    ]
}

fn booking_row(b: &Booking) -> Vec<Cell> {
    vec![
        Cell::Text(b.id.to_string()),
        Cell::Text(b.space_id.to_string()),
        Cell::Text(b.client_id.to_string()),
        Cell::Int(b.span.start),
        Cell::Int(b.span.end),
        Cell::Text(b.status.to_string()),
        Cell::Float(b.total_amount),
        Cell::opt(b.notes.clone()),
        Cell::Int(b.created_at),
        Cell::Int(b.updated_at),
    ]
}

fn invoice_row(i: &Invoice) -> Vec<Cell> {
    vec![
        Cell::Text(i.id.to_string()),
        Cell::Text(i.number.clone()),
        Cell::Text(i.client_id.to_string()),
        Cell::opt(i.booking_id.map(|b| b.to_string())),
        Cell::Float(i.amount),
        Cell::Float(i.tax_amount),
        Cell::Int(i.due_date),
        Cell::Text(i.status.to_string()),
        Cell::opt_int(i.paid_at),
        Cell::opt(i.notes.clone()),
        Cell::Int(i.created_at),
    ]
}

const TEXT: Type = Type::VARCHAR;
const INT: Type = Type::INT8;
const FLOAT: Type = Type::FLOAT8;
const BOOL: Type = Type::BOOL;

/// Columns of every row set, by table name. Empty for statements without rows.
fn schema(table: &str) -> Vec<FieldInfo> {
    let columns: Vec<(&str, Type)> = match table {
        "spaces" => vec![
            ("id", TEXT),
            ("name", TEXT),
            ("type", TEXT),
            ("capacity", INT),
            ("hourly_rate", FLOAT),
            ("daily_rate", FLOAT),
            ("monthly_rate", FLOAT),
            ("description", TEXT),
            ("active", BOOL),
            ("created_at", INT),
            ("updated_at", INT),
        ],
        "clients" => vec![
            ("id", TEXT),
            ("name", TEXT),
            ("email", TEXT),
            ("phone", TEXT),
            ("company", TEXT),
            ("segment", TEXT),
            ("active", BOOL),
            ("created_at", INT),
            ("updated_at", INT),
        ],
        "bookings" | "conflicts" => vec![
            ("id", TEXT),
            ("space_id", TEXT),
            ("client_id", TEXT),
            ("start", INT),
            ("end", INT),
            ("status", TEXT),
            ("total_amount", FLOAT),
            ("notes", TEXT),
            ("created_at", INT),
            ("updated_at", INT),
        ],
        "invoices" => vec![
            ("id", TEXT),
            ("number", TEXT),
            ("client_id", TEXT),
            ("booking_id", TEXT),
            ("amount", FLOAT),
            ("tax_amount", FLOAT),
            ("due_date", INT),
            ("status", TEXT),
            ("paid_at", INT),
            ("notes", TEXT),
            ("created_at", INT),
        ],
        "booking_totals" => vec![("count", INT), ("total_amount", FLOAT), ("total_hours", FLOAT)],
        "availability" => vec![("booking_id", TEXT), ("start", INT), ("end", INT), ("status", TEXT)],
        "free_slots" => vec![("space_id", TEXT), ("start", INT), ("end", INT)],
        "generate_invoices" => vec![("generated", INT)],
        "booking_stats" => vec![
            ("total", INT),
            ("confirmed", INT),
            ("checked_in", INT),
            ("completed", INT),
            ("cancelled", INT),
            ("total_revenue", FLOAT),
            ("occupancy_rate", FLOAT),
        ],
        "overview" => vec![
            ("total_revenue", FLOAT),
            ("total_bookings", INT),
            ("active_clients", INT),
            ("total_spaces", INT),
            ("occupancy_rate", FLOAT),
        ],
        "revenue" => vec![("date", TEXT), ("revenue", FLOAT)],
        "revenue_by_type" => vec![("type", TEXT), ("revenue", FLOAT)],
        "occupancy" => vec![("date", TEXT), ("bookings", INT), ("occupancy_rate", FLOAT)],
        "space_usage" => vec![
            ("id", TEXT),
            ("name", TEXT),
            ("type", TEXT),
            ("bookings_count", INT),
            ("total_hours", FLOAT),
            ("revenue", FLOAT),
        ],
        "space_types" => vec![("type", TEXT), ("spaces", INT), ("bookings", INT)],
        "client_revenue" => vec![
            ("id", TEXT),
            ("name", TEXT),
            ("company", TEXT),
            ("bookings_count", INT),
            ("total_revenue", FLOAT),
        ],
        "client_segments" => vec![("segment", TEXT), ("count", INT)],
        "dashboard" => vec![
            ("total_spaces", INT),
            ("total_clients", INT),
            ("today_bookings", INT),
            ("today_revenue", FLOAT),
            ("pending_invoices", INT),
        ],
        "billing_stats" => vec![
            ("total_invoices", INT),
            ("pending_invoices", INT),
            ("paid_invoices", INT),
            ("overdue_invoices", INT),
            ("total_amount", FLOAT),
            ("pending_amount", FLOAT),
            ("paid_amount", FLOAT),
            ("collection_rate", FLOAT),
        ],
        _ => vec![],
    };
    columns
        .into_iter()
        .map(|(name, ty)| FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text))
        .collect()
}

fn statement_schema(sql: &str) -> Vec<FieldInfo> {
    sql::result_table(sql).map_or_else(Vec::new, |table| schema(&table))
}

#[async_trait]
impl SimpleQueryHandler for CoworkHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let (engine, principal) = self.resolve(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let response = self
            .run(&engine, &principal, cmd)
            .await?;
        Ok(vec![response])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CoworkQueryParser;

#[async_trait]
impl QueryParser for CoworkQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(statement_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for CoworkHandler {
    type Statement = String;
    type QueryParser = CoworkQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let (engine, principal) = self.resolve(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.run(&engine, &principal, cmd).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            statement_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(statement_schema(&target.statement.statement)))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// Highest index first, so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut sql = portal.statement.statement.clone();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        sql = sql.replace(&format!("${}", i + 1), &value);
    }
    sql
}

// ── Factory ──────────────────────────────────────────────────────

#[derive(Clone)]
pub struct CoworkFactory {
    handler: Arc<CoworkHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<CoworkAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl CoworkFactory {
    pub fn new(organizations: Arc<OrganizationManager>, roles: RoleDirectory, password: String) -> Self {
        let auth_source = CoworkAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(CoworkHandler::new(organizations, Arc::new(roles))),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(auth_source, param_provider)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CoworkFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    factory: CoworkFactory,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

/// SQLSTATE for an engine failure.
pub fn sqlstate(e: &EngineError) -> &'static str {
    if matches!(e, EngineError::Overlap { .. }) {
        return "23P01";
    }
    match e.kind() {
        ErrorKind::Validation => "22023",
        ErrorKind::NotFound => "P0002",
        ErrorKind::Conflict => "55000",
        ErrorKind::Forbidden => "42501",
        ErrorKind::Limit => "54000",
        ErrorKind::Internal => "58030",
    }
}

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn engine_err(e: EngineError) -> PgWireError {
    let code = sqlstate(&e);
    match e.kind() {
        ErrorKind::Internal => error!(code, "{e}"),
        _ => warn!(code, "request rejected: {e}"),
    }
    user_error(code, e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    warn!("bad statement: {e}");
    user_error("42601", e.to_string())
}
