use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::{error, info};
use ulid::Ulid;

use crate::auth::ServiceAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};

/// Client metadata key holding the logged-in user's id.
const SESSION_USER_KEY: &str = "parkd.user_id";

pub struct ParkdHandler {
    engine: Arc<Engine>,
    query_parser: Arc<ParkdQueryParser>,
}

impl ParkdHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(ParkdQueryParser),
        }
    }

    /// Parse, execute and record metrics for one statement.
    async fn run<C: ClientInfo>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(client, cmd).await;

        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label).record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command<C: ClientInfo>(&self, client: &mut C, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = self.engine.as_ref();
        match cmd {
            Command::Register { name, email, password } => {
                let user = engine.register(&name, &email, &password).await.map_err(engine_err)?;
                Ok(vec![user_rows(&[user])])
            }
            Command::Login { email, password } => {
                let user = engine.verify(&email, &password).await.map_err(engine_err)?;
                client
                    .metadata_mut()
                    .insert(SESSION_USER_KEY.to_string(), user.id.to_string());
                info!(user_id = %user.id, "session login");
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::Logout => {
                let removed = client.metadata_mut().remove(SESSION_USER_KEY).is_some();
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(usize::from(removed)))])
            }
            Command::InsertSpace { name, in_service } => {
                let space = engine.create_space(name, in_service).await.map_err(engine_err)?;
                Ok(vec![space_rows(&[space])])
            }
            Command::SetSpaceService { id, in_service } => {
                let space = engine.set_in_service(id, in_service).await.map_err(engine_err)?;
                Ok(vec![space_rows(&[space])])
            }
            Command::SelectSpaces => {
                let spaces = engine.list_spaces().await.map_err(engine_err)?;
                Ok(vec![space_rows(&spaces)])
            }
            Command::SelectCurrentUser => {
                let user = engine.find_user(session_user(client)?).await.map_err(engine_err)?;
                Ok(vec![user_rows(&[user])])
            }
            Command::InsertBooking { from, to } => {
                let owner = session_user(client)?;
                let booking = engine.create(owner, from, to).await.map_err(engine_err)?;
                Ok(vec![booking_rows(engine, &[booking])?])
            }
            Command::AmendBooking { id, from, to } => {
                self.owned_booking(client, id).await?;
                let booking = engine.amend(id, from, to).await.map_err(engine_err)?;
                Ok(vec![booking_rows(engine, &[booking])?])
            }
            Command::CancelBooking { id } => {
                self.owned_booking(client, id).await?;
                engine.cancel(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectBookings { id } => {
                let owner = session_user(client)?;
                let mut bookings = engine.list_for_user(owner).await.map_err(engine_err)?;
                if let Some(id) = id {
                    bookings.retain(|b| b.id == id);
                }
                Ok(vec![booking_rows(engine, &bookings)?])
            }
            Command::SelectAvailability { from, to } => {
                let a = engine.availability(from, to).await.map_err(engine_err)?;
                Ok(vec![availability_row(from, to, a.total, a.available)?])
            }
            Command::SelectAvailabilityOnDay { day } => {
                let a = engine.availability_on_day(day).await.map_err(engine_err)?;
                Ok(vec![availability_row(day, day, a.total, a.available)?])
            }
            Command::SelectFreeSpaces { from, to } => {
                let spaces = engine.available_spaces(from, to).await.map_err(engine_err)?;
                Ok(vec![space_rows(&spaces)])
            }
            Command::SelectPrice { day } => {
                let price = engine.pricing().price_per_day(day);
                Ok(vec![price_row(day, day, price)?])
            }
            Command::SelectTotalPrice { from, to } => {
                let price = engine.quote(from, to).map_err(engine_err)?;
                Ok(vec![price_row(from, to, price)?])
            }
        }
    }

    /// The booking, if it belongs to the session user. Other users' bookings
    /// are reported as missing.
    async fn owned_booking<C: ClientInfo>(&self, client: &C, id: BookingId) -> PgWireResult<Booking> {
        let user = session_user(client)?;
        let booking = self.engine.get_booking(id).await.map_err(engine_err)?;
        if booking.owner != user {
            return Err(engine_err(EngineError::NotFound(id)));
        }
        Ok(booking)
    }
}

fn session_user<C: ClientInfo>(client: &C) -> PgWireResult<UserId> {
    client
        .metadata()
        .get(SESSION_USER_KEY)
        .and_then(|s| Ulid::from_string(s).ok())
        .ok_or_else(|| user_error("28000", "login required".to_string()))
}

// ── Result sets ──────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn space_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("available", Type::BOOL),
        field("in_service", Type::BOOL),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("space_id", Type::VARCHAR),
        field("from", Type::VARCHAR),
        field("to", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("price", Type::INT8),
        field("created_at", Type::VARCHAR),
        field("cancelled_at", Type::VARCHAR),
    ]
}

fn user_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("email", Type::VARCHAR),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("from", Type::VARCHAR),
        field("to", Type::VARCHAR),
        field("total", Type::INT8),
        field("available", Type::INT8),
    ]
}

fn price_schema() -> Vec<FieldInfo> {
    vec![
        field("from", Type::VARCHAR),
        field("to", Type::VARCHAR),
        field("price", Type::INT8),
    ]
}

fn query_response<F>(schema: Vec<FieldInfo>, rows: usize, mut encode: F) -> Response
where
    F: FnMut(usize, &mut DataRowEncoder) -> PgWireResult<()>,
{
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = (0..rows)
        .map(|i| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(i, &mut encoder)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn space_rows(spaces: &[Space]) -> Response {
    query_response(space_schema(), spaces.len(), |i, enc| {
        let s = &spaces[i];
        enc.encode_field(&s.id.to_string())?;
        enc.encode_field(&s.name)?;
        enc.encode_field(&s.available)?;
        enc.encode_field(&s.in_service)
    })
}

fn user_rows(users: &[User]) -> Response {
    query_response(user_schema(), users.len(), |i, enc| {
        let u = &users[i];
        enc.encode_field(&u.id.to_string())?;
        enc.encode_field(&u.name)?;
        enc.encode_field(&u.email)
    })
}

fn booking_rows(engine: &Engine, bookings: &[Booking]) -> PgWireResult<Response> {
    let prices = bookings
        .iter()
        .map(|b| engine.price_of(b).map(|p| p as i64))
        .collect::<Result<Vec<_>, _>>()
        .map_err(engine_err)?;
    Ok(query_response(booking_schema(), bookings.len(), |i, enc| {
        let b = &bookings[i];
        enc.encode_field(&b.id.to_string())?;
        enc.encode_field(&b.space.map(|s| s.to_string()))?;
        enc.encode_field(&b.span.from.to_string())?;
        enc.encode_field(&b.span.to.to_string())?;
        enc.encode_field(&b.status.as_str())?;
        enc.encode_field(&prices[i])?;
        enc.encode_field(&b.created_at.to_rfc3339())?;
        enc.encode_field(&b.cancelled_at.map(|t| t.to_rfc3339()))
    }))
}

fn availability_row(
    from: chrono::NaiveDate,
    to: chrono::NaiveDate,
    total: usize,
    available: usize,
) -> PgWireResult<Response> {
    let total = i64::try_from(total).map_err(|_| user_error("22003", "count out of range".into()))?;
    let available = i64::try_from(available).map_err(|_| user_error("22003", "count out of range".into()))?;
    Ok(query_response(availability_schema(), 1, |_, enc| {
        enc.encode_field(&from.to_string())?;
        enc.encode_field(&to.to_string())?;
        enc.encode_field(&total)?;
        enc.encode_field(&available)
    }))
}

fn price_row(from: chrono::NaiveDate, to: chrono::NaiveDate, price: Amount) -> PgWireResult<Response> {
    let price = i64::try_from(price).map_err(|_| user_error("22003", "price out of range".into()))?;
    Ok(query_response(price_schema(), 1, |_, enc| {
        enc.encode_field(&from.to_string())?;
        enc.encode_field(&to.to_string())?;
        enc.encode_field(&price)
    }))
}

/// Result columns for a statement, guessed from its text so that
/// parameterized statements can be described before binding.
fn schema_for(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.trim_start().to_uppercase();
    if upper.starts_with("DELETE") || upper.contains("SESSIONS") {
        vec![]
    } else if upper.contains("SPACES") || upper.contains("SPACE_STATUS") {
        space_schema()
    } else if upper.contains("BOOKINGS") || upper.contains("AMENDMENTS") {
        booking_schema()
    } else if upper.contains("USERS") {
        user_schema()
    } else if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("PRICES") {
        price_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for ParkdHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run(client, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ParkdQueryParser;

#[async_trait]
impl QueryParser for ParkdQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ParkdHandler {
    type Statement = String;
    type QueryParser = ParkdQueryParser;

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
        let sql = substitute_params(portal);
        let mut responses = self.run(client, &sql).await?;
        Ok(responses.remove(0))
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
        Ok(DescribeStatementResponse::new(param_types, schema_for(&target.statement)))
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
        Ok(DescribePortalResponse::new(schema_for(&target.statement.statement)))
    }
}

/// Highest `$N` placeholder in the SQL string.
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

/// Replace `$1, $2, ...` with bound text parameters, quoted; NULL stays bare.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.clone();
    // Highest index first so `$1` never clobbers the prefix of `$10`.
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        result = result.replace(&format!("${}", i + 1), &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ParkdFactory {
    handler: Arc<ParkdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<ServiceAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl ParkdFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        Self {
            handler: Arc::new(ParkdHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                ServiceAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ParkdFactory {
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

/// Serve one client until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(ParkdFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::InvalidRange { .. } | EngineError::Validation(_) => "22023",
        EngineError::NotFound(_) => "P0002",
        EngineError::NoAvailableParkingSpaces => "23P01",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::InvalidCredentials => "28000",
        EngineError::Hashing(_) => "XX000",
        EngineError::Storage(_) => "58000",
    }
}

/// Storage and hashing details stay in the log; the client sees a fixed message.
fn client_message(e: &EngineError) -> String {
    match e {
        EngineError::Storage(err) => {
            error!(error = %err, "storage failure");
            "internal storage error".into()
        }
        EngineError::Hashing(err) => {
            error!(error = %err, "password hashing failure");
            "internal error".into()
        }
        other => other.to_string(),
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), client_message(&e))
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
