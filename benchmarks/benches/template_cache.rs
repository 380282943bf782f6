use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use stratum_orm::prelude::*;

#[derive(Record, Debug, Clone)]
struct City {
    #[stratum(id)]
    id: i32,
    name: String,
}

#[derive(Record, Debug, Clone)]
struct Owner {
    #[stratum(id)]
    id: i32,
    first_name: String,
    last_name: String,
    #[stratum(foreign_key)]
    city: std::sync::Arc<City>,
    #[stratum(version)]
    version: i32,
}

fn by_name(last_name: &str, ids: &[i32]) -> Template {
    Template::builder()
        .sql("SELECT ")
        .select::<Owner>()
        .sql(" FROM ")
        .from::<Owner>()
        .sql(" WHERE ")
        .compare::<Owner>("last_name", Operator::Eq, last_name)
        .sql(" AND ")
        .in_list::<Owner, _>("city.id", ids.iter().copied())
        .sql(" ORDER BY ")
        .column::<Owner>("first_name")
        .build()
}

fn bench_template_cache(c: &mut Criterion) {
    let cached = Stratum::new(StratumConfig::default());
    let uncached = Stratum::new(StratumConfig::default().template_cache(0, 1));
    let template = by_name("Franklin", &[1, 2, 3]);

    c.bench_function("prepare_cold_compile", |b| {
        b.iter(|| uncached.prepare(black_box(&template)).unwrap())
    });

    cached.prepare(&template).unwrap();
    c.bench_function("prepare_cache_hit", |b| {
        b.iter(|| cached.prepare(black_box(&template)).unwrap())
    });

    c.bench_function("build_and_prepare_cache_hit", |b| {
        b.iter(|| {
            let template = by_name(black_box("Davis"), &[4, 5, 6]);
            cached.prepare(&template).unwrap()
        })
    });
}

criterion_group!(benches, bench_template_cache);
criterion_main!(benches);
