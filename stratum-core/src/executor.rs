use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use sqlx::{Database, IntoArguments};

use crate::driver::Driver;
use crate::entity_cache::EntityCache;
use crate::error::{MappingError, StratumError, StratumResult, TemplateError};
use crate::mapper::ModelMapper;
use crate::model::ModelRegistry;
use crate::record::{Record, RecordType, TypeHandle};
use crate::template::{RowLayout, Statement};
use crate::value::BindValue;

/// A database executor wrapping either a connection pool or a single connection.
///
/// Statements run the same way on both, so callers inside a transaction pass
/// the transaction's connection and everyone else passes the pool.
pub enum Executor<'a, DB: Database> {
    /// A shared connection pool.
    Pool(&'a sqlx::Pool<DB>),
    /// A single, mutable database connection.
    Conn(&'a mut DB::Connection),
}

impl<DB: Database> std::fmt::Debug for Executor<'_, DB> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pool(_) => f.write_str("Executor::Pool"),
            Self::Conn(_) => f.write_str("Executor::Conn"),
        }
    }
}

impl<'a, DB: Database> From<&'a sqlx::Pool<DB>> for Executor<'a, DB> {
    fn from(pool: &'a sqlx::Pool<DB>) -> Self {
        Self::Pool(pool)
    }
}

/// Types that can be turned into an [`Executor`].
pub trait IntoExecutor<'a>: Send + 'a {
    type DB: Driver;
    fn into_executor(self) -> Executor<'a, Self::DB>;
}

impl<'a, DB: Driver> IntoExecutor<'a> for &'a sqlx::Pool<DB> {
    type DB = DB;
    fn into_executor(self) -> Executor<'a, DB> {
        Executor::Pool(self)
    }
}

#[cfg(feature = "sqlite")]
impl<'a> IntoExecutor<'a> for &'a mut sqlx::SqliteConnection {
    type DB = sqlx::Sqlite;
    fn into_executor(self) -> Executor<'a, Self::DB> {
        Executor::Conn(self)
    }
}

#[cfg(feature = "postgres")]
impl<'a> IntoExecutor<'a> for &'a mut sqlx::postgres::PgConnection {
    type DB = sqlx::Postgres;
    fn into_executor(self) -> Executor<'a, Self::DB> {
        Executor::Conn(self)
    }
}

#[cfg(feature = "mysql")]
impl<'a> IntoExecutor<'a> for &'a mut sqlx::mysql::MySqlConnection {
    type DB = sqlx::MySql;
    fn into_executor(self) -> Executor<'a, Self::DB> {
        Executor::Conn(self)
    }
}

impl<'a, DB: Driver> IntoExecutor<'a> for Executor<'a, DB>
where
    DB::Connection: Send,
{
    type DB = DB;
    fn into_executor(self) -> Executor<'a, DB> {
        self
    }
}

#[cfg_attr(not(feature = "metrics"), allow(dead_code))]
fn table_label(statement: &Statement) -> &'static str {
    statement.row.as_ref().map_or("-", |row| row.record.name())
}

fn log_statement(operation: &'static str, statement: &Statement) {
    #[cfg(debug_assertions)]
    tracing::debug!(
        operation,
        sql = %statement.sql,
        binds = %statement
            .binds
            .iter()
            .map(BindValue::to_log_string)
            .collect::<Vec<_>>()
            .join(", "),
        "stratum query"
    );
    #[cfg(not(debug_assertions))]
    let _ = (operation, statement);
}

fn row_layout(statement: &Statement) -> StratumResult<&Arc<RowLayout>> {
    statement.row.as_ref().ok_or_else(|| {
        TemplateError::Invalid("statement does not select a record".to_owned()).into()
    })
}

fn decode_row<DB: Driver>(row: &DB::Row, layout: &RowLayout) -> StratumResult<Vec<BindValue>> {
    layout
        .types
        .iter()
        .enumerate()
        .map(|(index, sql_type)| DB::decode(row, index, *sql_type).map_err(StratumError::from))
        .collect()
}

fn bind_all<DB: Driver>(statement: &Statement) -> sqlx::query::Query<'_, DB, DB::Arguments<'_>> {
    statement
        .binds
        .iter()
        .cloned()
        .fold(sqlx::query::<DB>(&statement.sql), DB::bind)
}

fn check_record<T: RecordType>(layout: &RowLayout) -> Result<(), MappingError> {
    if layout.record == TypeHandle::of::<T>() {
        Ok(())
    } else {
        Err(MappingError::TypeMismatch {
            expected: T::NAME.to_owned(),
            found: layout.record.name().to_owned(),
        })
    }
}

impl<DB: Driver> Executor<'_, DB> {
    #[cfg(feature = "metrics")]
    fn record_metrics(&self, operation: &'static str, statement: &Statement, elapsed: Duration) {
        let dialect = DB::dialect().name();
        crate::metrics::record_query(operation, dialect, table_label(statement), elapsed);
        if let Self::Pool(pool) = self {
            crate::metrics::record_pool(*pool, dialect);
        }
    }

    #[cfg(not(feature = "metrics"))]
    fn record_metrics(&self, _: &'static str, _: &Statement, _: Duration) {}
}

impl<'a, DB> Executor<'a, DB>
where
    DB: Driver,
    for<'q> <DB as Database>::Arguments<'q>: IntoArguments<'q, DB>,
    for<'c> &'c mut <DB as Database>::Connection: sqlx::Executor<'c, Database = DB>,
{
    /// Runs a statement that returns no rows and reports the affected row count.
    #[tracing::instrument(skip_all, fields(binds = statement.binds.len()))]
    pub async fn execute(&mut self, statement: &Statement) -> StratumResult<u64> {
        log_statement("execute", statement);
        let start = Instant::now();
        let query = bind_all::<DB>(statement);
        let result = match self {
            Self::Pool(pool) => query.execute(*pool).await?,
            Self::Conn(conn) => query.execute(&mut **conn).await?,
        };
        self.record_metrics("execute", statement, start.elapsed());
        Ok(DB::rows_affected(&result))
    }

    /// Fetches all rows, decoded by the statement's row layout.
    #[tracing::instrument(skip_all, fields(binds = statement.binds.len()))]
    pub async fn fetch_rows(&mut self, statement: &Statement) -> StratumResult<Vec<Vec<BindValue>>> {
        let layout = row_layout(statement)?;
        log_statement("select", statement);
        let start = Instant::now();
        let query = bind_all::<DB>(statement);
        let rows = match self {
            Self::Pool(pool) => query.fetch_all(*pool).await?,
            Self::Conn(conn) => query.fetch_all(&mut **conn).await?,
        };
        self.record_metrics("select", statement, start.elapsed());
        rows.iter().map(|row| decode_row::<DB>(row, layout)).collect()
    }

    pub async fn fetch_records<T: RecordType>(
        &mut self,
        statement: &Statement,
        registry: &ModelRegistry,
    ) -> StratumResult<Vec<Arc<T>>> {
        check_record::<T>(row_layout(statement)?)?;
        let rows = self.fetch_rows(statement).await?;
        let model = registry.model::<T>()?;
        let mapper = ModelMapper::new(registry);
        rows.iter()
            .map(|values| Ok(mapper.unmap_as::<T>(&model, values)?))
            .collect()
    }

    /// Like [`Self::fetch_records`], but rows already seen in this
    /// transaction resolve to the cached instance.
    pub async fn fetch_records_cached<T: RecordType>(
        &mut self,
        statement: &Statement,
        registry: &ModelRegistry,
        cache: &EntityCache,
    ) -> StratumResult<Vec<Arc<T>>> {
        check_record::<T>(row_layout(statement)?)?;
        let rows = self.fetch_rows(statement).await?;
        let model = registry.model::<T>()?;
        let mapper = ModelMapper::new(registry);

        let mut records = Vec::with_capacity(rows.len());
        for values in &rows {
            let record = mapper.unmap(&model, values)?;
            let key = mapper.map_key(&model, record.as_ref())?;
            let shared: Arc<dyn Record> = cache.intern(key, record);
            let typed = shared
                .downcast_arc::<T>()
                .map_err(|_| MappingError::TypeMismatch {
                    expected: T::NAME.to_owned(),
                    found: model.name().to_owned(),
                })?;
            records.push(typed);
        }
        Ok(records)
    }

    /// Streams rows without loading the whole result.
    pub fn fetch_stream(
        self,
        statement: Statement,
    ) -> StratumResult<futures_util::stream::BoxStream<'a, StratumResult<Vec<BindValue>>>>
    where
        DB: 'a,
    {
        let layout = row_layout(&statement)?.clone();
        log_statement("stream", &statement);
        Ok(Box::pin(async_stream::try_stream! {
            let query = bind_all::<DB>(&statement);
            let mut rows = match self {
                Self::Pool(pool) => query.fetch(pool),
                Self::Conn(conn) => query.fetch(conn),
            };
            while let Some(row) = rows.next().await {
                let row = row?;
                yield decode_row::<DB>(&row, &layout)?;
            }
        }))
    }
}
