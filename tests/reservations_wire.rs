use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{Datelike, Local};
use tokio::net::TcpListener;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

use labres::admission::ReservationAdmission;
use labres::clock::SystemClock;
use labres::store::DurableStore;
use labres::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("labres_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let store = Arc::new(DurableStore::open(&dir.join("reservations.wal")).unwrap());
    let admission = Arc::new(ReservationAdmission::new(store, Arc::new(SystemClock)));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let admission = admission.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, admission, "labres".to_string(), None).await;
            });
        }
    });

    addr
}

/// Log in as `login`; bookings are made on behalf of that user id.
async fn connect(addr: SocketAddr, login: &str) -> Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("labres")
        .user(login)
        .password("labres");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

/// A June date safely in the future.
fn future_date(day: u32) -> String {
    format!("{}-06-{day:02}", Local::now().year() + 2)
}

fn insert_sql(user_id: i64, room: &str, date: &str, start: &str, end: &str) -> String {
    format!(
        r#"INSERT INTO reservations (user_id, owner_name, lab, room, "date", start_time, end_time)
           VALUES ({user_id}, 'Ana', 'Chemistry', '{room}', '{date}', '{start}', '{end}')"#
    )
}

fn data_rows(messages: &[SimpleQueryMessage]) -> Vec<Vec<String>> {
    messages
        .iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(
                (0..row.len())
                    .map(|i| row.get(i).unwrap_or_default().to_string())
                    .collect(),
            ),
            _ => None,
        })
        .collect()
}

async fn book(client: &Client, sql: &str) -> Result<String, tokio_postgres::Error> {
    let messages = client.simple_query(sql).await?;
    let rows = data_rows(&messages);
    assert_eq!(rows.len(), 1, "admission returns exactly one row");
    Ok(rows[0][0].clone())
}

fn rejection(err: &tokio_postgres::Error) -> String {
    assert_eq!(err.code(), Some(&SqlState::RAISE_EXCEPTION));
    err.as_db_error().unwrap().message().to_string()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn accepted_booking_is_listed() {
    let addr = start_test_server().await;
    let client = connect(addr, "7").await;
    let date = future_date(20);

    let id = book(&client, &insert_sql(7, "A-12", &date, "10:00", "11:00"))
        .await
        .unwrap();
    assert!(Ulid::from_string(&id).is_ok());

    let messages = client
        .simple_query("SELECT * FROM reservations WHERE user_id = 7")
        .await
        .unwrap();
    let rows = data_rows(&messages);
    assert_eq!(
        rows,
        vec![vec![
            id,
            "Ana".to_string(),
            "Chemistry".to_string(),
            "A-12".to_string(),
            date,
            "10:00".to_string(),
            "11:00".to_string(),
            "7".to_string(),
        ]]
    );
}

#[tokio::test]
async fn overlapping_booking_rejected() {
    let addr = start_test_server().await;
    let first_user = connect(addr, "1").await;
    let client = connect(addr, "2").await;
    let date = future_date(20);

    let first = book(&first_user, &insert_sql(1, "A", &date, "10:00", "11:00"))
        .await
        .unwrap();
    let err = book(&client, &insert_sql(2, "A", &date, "10:30", "11:30"))
        .await
        .unwrap_err();
    assert_eq!(
        rejection(&err),
        format!("reservation rejected: conflicts with reservation {first}")
    );

    // Same times in another room are fine.
    book(&client, &insert_sql(2, "B", &date, "10:30", "11:30"))
        .await
        .unwrap();
}

#[tokio::test]
async fn buffer_after_existing_reservation() {
    let addr = start_test_server().await;
    let first_user = connect(addr, "1").await;
    let client = connect(addr, "2").await;
    let date = future_date(21);

    book(&first_user, &insert_sql(1, "A", &date, "10:00", "11:00"))
        .await
        .unwrap();
    let err = book(&client, &insert_sql(2, "A", &date, "11:04", "12:00"))
        .await
        .unwrap_err();
    assert!(rejection(&err).contains("conflicts with reservation"));

    book(&client, &insert_sql(2, "A", &date, "11:05", "12:00"))
        .await
        .unwrap();
}

#[tokio::test]
async fn monthly_quota_over_wire() {
    let addr = start_test_server().await;
    let client = connect(addr, "9").await;

    for day in 1..=3 {
        book(&client, &insert_sql(9, "A", &future_date(day), "08:00", "09:00"))
            .await
            .unwrap();
    }
    let err = book(&client, &insert_sql(9, "A", &future_date(4), "08:00", "09:00"))
        .await
        .unwrap_err();
    assert_eq!(
        rejection(&err),
        "reservation rejected: monthly quota of 3 reservations already used"
    );

    let messages = client
        .simple_query("SELECT * FROM reservations WHERE user_id = 9")
        .await
        .unwrap();
    assert_eq!(data_rows(&messages).len(), 3);
}

#[tokio::test]
async fn validation_reasons_reported_together() {
    let addr = start_test_server().await;
    let client = connect(addr, "1").await;

    let err = book(&client, &insert_sql(1, "A", "2001-01-01", "11:00", "10:00"))
        .await
        .unwrap_err();
    assert_eq!(
        rejection(&err),
        "reservation rejected: date cannot be in the past; end time must be after start time"
    );

    let messages = client.simple_query("SELECT * FROM reservations").await.unwrap();
    assert!(data_rows(&messages).is_empty());
}

#[tokio::test]
async fn extended_protocol_parameters() {
    let addr = start_test_server().await;
    let client = connect(addr, "5").await;
    let date = future_date(15);

    let row = client
        .query_one(
            r#"INSERT INTO reservations (user_id, owner_name, lab, room, "date", start_time, end_time)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
            &[&"5", &"O'Neil", &"Physics", &"P-1", &date.as_str(), &"14:00", &"15:30"],
        )
        .await
        .unwrap();
    let id: String = row.get(0);

    let rows = client
        .query(
            r#"SELECT * FROM reservations WHERE lab = $1 AND room = $2 AND "date" = $3"#,
            &[&"Physics", &"P-1", &date.as_str()],
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let listed_id: String = rows[0].get("id");
    let owner: String = rows[0].get("owner_name");
    assert_eq!(listed_id, id);
    assert_eq!(owner, "O'Neil");
}

#[tokio::test]
async fn malformed_sql_is_syntax_error() {
    let addr = start_test_server().await;
    let client = connect(addr, "1").await;

    let err = client.simple_query("RESERVE ROOM A").await.unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::SYNTAX_ERROR));

    let err = client.simple_query("SELECT * FROM users").await.unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::SYNTAX_ERROR));
}

#[tokio::test]
async fn booking_for_another_user_refused() {
    let addr = start_test_server().await;
    let client = connect(addr, "9").await;

    for day in 1..=3 {
        book(&client, &insert_sql(9, "A", &future_date(day), "08:00", "09:00"))
            .await
            .unwrap();
    }

    // Claiming other user ids does not open a fresh quota.
    for other in 1000..1003 {
        let err = book(&client, &insert_sql(other, "A", &future_date(10), "08:00", "09:00"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(&SqlState::INSUFFICIENT_PRIVILEGE));
    }

    let messages = client.simple_query("SELECT * FROM reservations").await.unwrap();
    assert_eq!(data_rows(&messages).len(), 3);
}

#[tokio::test]
async fn user_id_defaults_to_login() {
    let addr = start_test_server().await;
    let client = connect(addr, "31").await;
    let date = future_date(12);

    book(
        &client,
        &format!(
            r#"INSERT INTO reservations (owner_name, lab, room, "date", start_time, end_time)
               VALUES ('Bia', 'Physics', 'P-2', '{date}', '09:00', '10:00')"#
        ),
    )
    .await
    .unwrap();

    let messages = client
        .simple_query("SELECT * FROM reservations WHERE user_id = 31")
        .await
        .unwrap();
    let rows = data_rows(&messages);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][7], "31");
}

#[tokio::test]
async fn non_numeric_login_may_list_but_not_book() {
    let addr = start_test_server().await;
    let client = connect(addr, "labres").await;

    let err = book(&client, &insert_sql(1, "A", &future_date(5), "08:00", "09:00"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::INVALID_AUTHORIZATION_SPECIFICATION));

    let messages = client.simple_query("SELECT * FROM reservations").await.unwrap();
    assert!(data_rows(&messages).is_empty());
}

#[tokio::test]
async fn bound_value_containing_placeholder_text() {
    let addr = start_test_server().await;
    let client = connect(addr, "7").await;
    let date = future_date(18);

    client
        .query_one(
            r#"INSERT INTO reservations (user_id, owner_name, lab, room, "date", start_time, end_time)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
            &[&"7", &"Ana", &"Lab $1", &"R $2", &date.as_str(), &"09:00", &"10:00"],
        )
        .await
        .unwrap();

    let rows = client
        .query(
            "SELECT * FROM reservations WHERE user_id = $1 AND lab = $2",
            &[&"7", &"Lab $1"],
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let room: String = rows[0].get("room");
    assert_eq!(room, "R $2");
}
