use std::fmt::Debug;
use std::io;
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
    QueryResponse, Response,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::admission::{Admission, AdmissionError, ReservationAdmission, Rejection};
use crate::auth::LabresAuthSource;
use crate::model::UserId;
use crate::observability;
use crate::sql::{self, Command};
use crate::store::select_reservations;

pub struct LabresHandler {
    admission: Arc<ReservationAdmission>,
    query_parser: Arc<LabresQueryParser>,
}

impl LabresHandler {
    pub fn new(admission: Arc<ReservationAdmission>) -> Self {
        Self {
            admission,
            query_parser: Arc::new(LabresQueryParser),
        }
    }

    async fn run_sql(&self, sql: &str, login: Option<&str>) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(cmd, login).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(&self, cmd: Command, login: Option<&str>) -> PgWireResult<Response> {
        match cmd {
            Command::InsertReservation(insert) => {
                let requester = session_user(login)?;
                if let Some(claimed) = insert.user_id
                    && claimed != requester
                {
                    return Err(forbidden_err(format!(
                        "user {requester} cannot book on behalf of user {claimed}"
                    )));
                }
                let request = insert.into_request(requester);
                let reservation_id = match self.admission.admit(request).await.map_err(admission_err)? {
                    Admission::Accepted { reservation_id } => reservation_id,
                    Admission::Rejected { reasons } => return Err(rejection_err(&reasons)),
                };

                let schema = Arc::new(admission_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&reservation_id.to_string())?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectReservations(filter) => {
                let reservations = select_reservations(self.admission.store(), &filter)
                    .await
                    .map_err(|e| admission_err(e.into()))?;

                let schema = Arc::new(reservation_schema());
                let rows: Vec<PgWireResult<_>> = reservations
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.owner_name)?;
                        encoder.encode_field(&r.lab)?;
                        encoder.encode_field(&r.room)?;
                        encoder.encode_field(&r.date.format("%Y-%m-%d").to_string())?;
                        encoder.encode_field(&r.start_time.format("%H:%M").to_string())?;
                        encoder.encode_field(&r.end_time.format("%H:%M").to_string())?;
                        encoder.encode_field(&r.user_id)?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
        }
    }
}

/// Startup `user` of the connection.
fn login_user<C: ClientInfo>(client: &C) -> Option<&str> {
    client.metadata().get("user").map(String::as_str)
}

/// The requester is whoever logged in; the login name is their numeric user id.
fn session_user(login: Option<&str>) -> PgWireResult<UserId> {
    let login = login.unwrap_or_default();
    login.parse().map_err(|_| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "28000".into(),
            format!("login user {login:?} is not a numeric user id"),
        )))
    })
}

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn admission_schema() -> Vec<FieldInfo> {
    vec![text_field("id")]
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("owner_name"),
        text_field("lab"),
        text_field("room"),
        text_field("date"),
        text_field("start_time"),
        text_field("end_time"),
        FieldInfo::new("user_id".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

/// Result columns for an unbound statement, guessed from its leading keyword.
fn statement_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.trim_start().to_uppercase();
    if upper.starts_with("INSERT") {
        admission_schema()
    } else if upper.starts_with("SELECT") {
        reservation_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for LabresHandler {
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
        Ok(vec![self.run_sql(query, login_user(&*client)).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct LabresQueryParser;

#[async_trait]
impl QueryParser for LabresQueryParser {
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
        Ok(statement_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for LabresHandler {
    type Statement = String;
    type QueryParser = LabresQueryParser;

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
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        self.run_sql(&sql, login_user(&*client)).await
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
        Ok(DescribePortalResponse::new(statement_schema(
            &target.statement.statement,
        )))
    }
}

/// A `$N` placeholder outside quoted text: byte range in the statement and N.
struct Placeholder {
    start: usize,
    end: usize,
    index: usize,
}

/// Find `$N` placeholders, skipping single-quoted literals and double-quoted
/// identifiers. A doubled quote inside either stays inside it.
fn placeholders(sql: &str) -> Vec<Placeholder> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'$' => {
                let digits = bytes[i + 1..].iter().take_while(|d| d.is_ascii_digit()).count();
                if let Ok(index) = sql[i + 1..i + 1 + digits].parse::<usize>()
                    && index > 0
                {
                    found.push(Placeholder {
                        start: i,
                        end: i + 1 + digits,
                        index,
                    });
                }
                i += digits;
            }
            None => {}
        }
        i += 1;
    }
    found
}

/// Highest `$N` in the statement, i.e. how many parameters it binds.
fn count_params(sql: &str) -> usize {
    placeholders(sql).iter().map(|p| p.index).max().unwrap_or(0)
}

/// Render bound parameters (text format) into the statement in one pass over
/// the original text. Bound values are copied out and never rescanned.
fn substitute_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    for placeholder in placeholders(sql) {
        let Some(param) = params.get(placeholder.index - 1) else {
            continue;
        };
        result.push_str(&sql[copied..placeholder.start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            None => result.push_str("NULL"),
        }
        copied = placeholder.end;
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct LabresFactory {
    handler: Arc<LabresHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<LabresAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl LabresFactory {
    pub fn new(admission: Arc<ReservationAdmission>, password: String) -> Self {
        let auth_source = LabresAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(LabresHandler::new(admission)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for LabresFactory {
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
    admission: Arc<ReservationAdmission>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(LabresFactory::new(admission, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn rejection_message(reasons: &[Rejection]) -> String {
    let joined: Vec<String> = reasons.iter().map(|r| r.to_string()).collect();
    format!("reservation rejected: {}", joined.join("; "))
}

fn rejection_err(reasons: &[Rejection]) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
        rejection_message(reasons),
    )))
}

fn forbidden_err(message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42501".into(),
        message,
    )))
}

fn admission_err(e: AdmissionError) -> PgWireError {
    tracing::error!("{e}");
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "58030".into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
