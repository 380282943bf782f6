//! Glue between bind values and the `sqlx` drivers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{Database, Decode, Encode, Row, Type};
use uuid::Uuid;

use crate::dialect::SqlDialect;
use crate::value::{BindValue, SqlType};

/// A `sqlx` database Stratum can execute statements on.
///
/// Every driver also names the SQL dialect templates are compiled for.
pub trait Driver: Database + Sized + Send + Sync {
    fn dialect() -> Arc<dyn SqlDialect>;

    fn rows_affected(result: &Self::QueryResult) -> u64;

    fn bind<'q>(
        query: sqlx::query::Query<'q, Self, <Self as Database>::Arguments<'q>>,
        value: BindValue,
    ) -> sqlx::query::Query<'q, Self, <Self as Database>::Arguments<'q>>;

    /// Reads column `index` of `row` as a bind value of `sql_type`.
    fn decode(row: &Self::Row, index: usize, sql_type: SqlType) -> Result<BindValue, sqlx::Error>;
}

#[inline(always)]
fn bind_value<'q, DB>(
    query: sqlx::query::Query<'q, DB, <DB as Database>::Arguments<'q>>,
    value: BindValue,
) -> sqlx::query::Query<'q, DB, <DB as Database>::Arguments<'q>>
where
    DB: Database,
    String: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    bool: Encode<'q, DB> + Type<DB>,
    Uuid: Encode<'q, DB> + Type<DB>,
    DateTime<Utc>: Encode<'q, DB> + Type<DB>,
    Json<serde_json::Value>: Encode<'q, DB> + Type<DB>,
    Vec<u8>: Encode<'q, DB> + Type<DB>,
    Option<String>: Encode<'q, DB> + Type<DB>,
{
    match value {
        BindValue::String(v) => query.bind(v),
        BindValue::I64(v) => query.bind(v),
        BindValue::F64(v) => query.bind(v),
        BindValue::Bool(v) => query.bind(v),
        BindValue::Uuid(v) => query.bind(v),
        BindValue::DateTime(v) => query.bind(v),
        BindValue::Json(v) => query.bind(Json(v)),
        BindValue::Bytes(v) => query.bind(v),
        BindValue::Null => query.bind(Option::<String>::None),
    }
}

fn decode_column<'r, DB>(
    row: &'r DB::Row,
    index: usize,
    sql_type: SqlType,
) -> Result<BindValue, sqlx::Error>
where
    DB: Database,
    usize: sqlx::ColumnIndex<DB::Row>,
    bool: Decode<'r, DB> + Type<DB>,
    i16: Decode<'r, DB> + Type<DB>,
    i32: Decode<'r, DB> + Type<DB>,
    i64: Decode<'r, DB> + Type<DB>,
    f64: Decode<'r, DB> + Type<DB>,
    String: Decode<'r, DB> + Type<DB>,
    Uuid: Decode<'r, DB> + Type<DB>,
    DateTime<Utc>: Decode<'r, DB> + Type<DB>,
    Json<serde_json::Value>: Decode<'r, DB> + Type<DB>,
    Vec<u8>: Decode<'r, DB> + Type<DB>,
{
    let value = match sql_type {
        SqlType::Bool => row.try_get::<Option<bool>, _>(index)?.map(BindValue::Bool),
        SqlType::SmallInt => row
            .try_get::<Option<i16>, _>(index)?
            .map(|v| BindValue::I64(i64::from(v))),
        SqlType::Int => row
            .try_get::<Option<i32>, _>(index)?
            .map(|v| BindValue::I64(i64::from(v))),
        SqlType::BigInt => row.try_get::<Option<i64>, _>(index)?.map(BindValue::I64),
        SqlType::Float => row.try_get::<Option<f64>, _>(index)?.map(BindValue::F64),
        SqlType::Text => row.try_get::<Option<String>, _>(index)?.map(BindValue::String),
        SqlType::Uuid => row.try_get::<Option<Uuid>, _>(index)?.map(BindValue::Uuid),
        SqlType::Timestamp => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map(BindValue::DateTime),
        SqlType::Json => row
            .try_get::<Option<Json<serde_json::Value>>, _>(index)?
            .map(|Json(v)| BindValue::Json(v)),
        SqlType::Bytes => row.try_get::<Option<Vec<u8>>, _>(index)?.map(BindValue::Bytes),
    };
    Ok(value.unwrap_or(BindValue::Null))
}

#[cfg(feature = "sqlite")]
impl Driver for sqlx::Sqlite {
    fn dialect() -> Arc<dyn SqlDialect> {
        Arc::new(crate::dialect::SqliteDialect)
    }

    fn rows_affected(result: &sqlx::sqlite::SqliteQueryResult) -> u64 {
        result.rows_affected()
    }

    fn bind<'q>(
        query: sqlx::query::Query<'q, Self, sqlx::sqlite::SqliteArguments<'q>>,
        value: BindValue,
    ) -> sqlx::query::Query<'q, Self, sqlx::sqlite::SqliteArguments<'q>> {
        bind_value(query, value)
    }

    fn decode(
        row: &sqlx::sqlite::SqliteRow,
        index: usize,
        sql_type: SqlType,
    ) -> Result<BindValue, sqlx::Error> {
        decode_column::<Self>(row, index, sql_type)
    }
}

#[cfg(feature = "postgres")]
impl Driver for sqlx::Postgres {
    fn dialect() -> Arc<dyn SqlDialect> {
        Arc::new(crate::dialect::PostgresDialect)
    }

    fn rows_affected(result: &sqlx::postgres::PgQueryResult) -> u64 {
        result.rows_affected()
    }

    fn bind<'q>(
        query: sqlx::query::Query<'q, Self, sqlx::postgres::PgArguments>,
        value: BindValue,
    ) -> sqlx::query::Query<'q, Self, sqlx::postgres::PgArguments> {
        bind_value(query, value)
    }

    fn decode(
        row: &sqlx::postgres::PgRow,
        index: usize,
        sql_type: SqlType,
    ) -> Result<BindValue, sqlx::Error> {
        decode_column::<Self>(row, index, sql_type)
    }
}

#[cfg(feature = "mysql")]
impl Driver for sqlx::MySql {
    fn dialect() -> Arc<dyn SqlDialect> {
        Arc::new(crate::dialect::MySqlDialect)
    }

    fn rows_affected(result: &sqlx::mysql::MySqlQueryResult) -> u64 {
        result.rows_affected()
    }

    fn bind<'q>(
        query: sqlx::query::Query<'q, Self, sqlx::mysql::MySqlArguments>,
        value: BindValue,
    ) -> sqlx::query::Query<'q, Self, sqlx::mysql::MySqlArguments> {
        bind_value(query, value)
    }

    fn decode(
        row: &sqlx::mysql::MySqlRow,
        index: usize,
        sql_type: SqlType,
    ) -> Result<BindValue, sqlx::Error> {
        decode_column::<Self>(row, index, sql_type)
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::test_utils::TestDatabase;

    #[tokio::test]
    async fn sqlite_round_trips_bind_values() {
        let db = TestDatabase::in_memory().await.unwrap();
        let query = [
            BindValue::I64(42),
            BindValue::from("Leo"),
            BindValue::Null,
            BindValue::F64(1.5),
        ]
        .into_iter()
        .fold(
            sqlx::query::<sqlx::Sqlite>("SELECT ?, ?, ?, ?"),
            <sqlx::Sqlite as Driver>::bind,
        );
        let row = query.fetch_one(db.pool()).await.unwrap();

        let decoded: Vec<BindValue> = [SqlType::BigInt, SqlType::Text, SqlType::Text, SqlType::Float]
            .into_iter()
            .enumerate()
            .map(|(index, sql_type)| <sqlx::Sqlite as Driver>::decode(&row, index, sql_type).unwrap())
            .collect();
        assert_eq!(
            decoded,
            vec![
                BindValue::I64(42),
                BindValue::from("Leo"),
                BindValue::Null,
                BindValue::F64(1.5)
            ]
        );
    }
}
