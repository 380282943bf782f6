use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use stratum_orm::prelude::*;

#[derive(Record, Debug, Clone)]
struct Users {
    #[stratum(id)]
    id: i32,
    name: String,
    age: i32,
}

async fn init_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:?cache=shared")
        .await
        .expect("connect sqlite memory");

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            age INTEGER NOT NULL
        )",
    )
    .execute(&pool)
    .await
    .expect("create table");

    sqlx::query("INSERT INTO users (name, age) VALUES (?, ?)")
        .bind("Alice")
        .bind(42)
        .execute(&pool)
        .await
        .expect("seed row");

    pool
}

fn by_id(id: i32) -> Template {
    Template::builder()
        .sql("SELECT ")
        .select::<Users>()
        .sql(" FROM ")
        .from::<Users>()
        .sql(" WHERE ")
        .compare::<Users>("id", Operator::Eq, id)
        .build()
}

fn bench_stratum_vs_sqlx(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let pool = Arc::new(rt.block_on(init_pool()));
    let stratum = Arc::new(Stratum::for_database::<sqlx::Sqlite>());

    let raw_pool = pool.clone();
    c.bench_function("raw_sqlx_fetch_one", |b| {
        b.to_async(&rt).iter(|| {
            let pool = raw_pool.clone();
            async move {
                let row = sqlx::query("SELECT id, name, age FROM users WHERE id = ?")
                    .bind(1)
                    .fetch_one(pool.as_ref())
                    .await
                    .expect("raw fetch");
                let _: String = row.get("name");
            }
        })
    });

    let stratum_pool = pool.clone();
    c.bench_function("stratum_fetch_all", |b| {
        b.to_async(&rt).iter(|| {
            let pool = stratum_pool.clone();
            let stratum = stratum.clone();
            async move {
                let users = stratum
                    .fetch_all::<Users, _>(pool.as_ref(), &by_id(1))
                    .await
                    .expect("stratum fetch");
                assert_eq!(users.len(), 1);
            }
        })
    });
}

criterion_group!(benches, bench_stratum_vs_sqlx);
criterion_main!(benches);
