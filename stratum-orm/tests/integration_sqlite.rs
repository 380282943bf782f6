use std::sync::Arc;

use futures_util::TryStreamExt;
use stratum_orm::prelude::*;
use stratum_orm::sqlx::Sqlite;
use stratum_orm::test_utils::TestDatabase;

#[derive(Record, Debug, Clone, PartialEq)]
struct PetType {
    #[stratum(id)]
    id: i32,
    name: String,
}

#[derive(Record, Debug, Clone, PartialEq)]
struct Owner {
    #[stratum(id)]
    id: i32,
    first_name: String,
    last_name: String,
    telephone: Option<String>,
    #[stratum(version)]
    version: i32,
}

#[derive(Record, Debug, Clone)]
struct Pet {
    #[stratum(id)]
    id: i32,
    name: String,
    #[stratum(foreign_key, column = "type_id")]
    pet_type: Arc<PetType>,
    #[stratum(foreign_key)]
    owner: Option<Arc<Owner>>,
}

const SCHEMA: &str = "
    CREATE TABLE pet_type (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
    CREATE TABLE owner (
        id INTEGER PRIMARY KEY,
        first_name TEXT NOT NULL,
        last_name TEXT NOT NULL,
        telephone TEXT,
        version INTEGER NOT NULL
    );
    CREATE TABLE pet (id INTEGER PRIMARY KEY, name TEXT NOT NULL, type_id INTEGER NOT NULL, owner_id INTEGER)
";

fn insert<T: RecordType>(records: Vec<Arc<dyn stratum_orm::Record>>) -> Template {
    Template::builder()
        .insert::<T>()
        .sql(" ")
        .values(records)
        .build()
}

fn all_pets() -> Template {
    Template::builder()
        .sql("SELECT ")
        .select::<Pet>()
        .sql(" FROM ")
        .from::<Pet>()
        .sql(" ORDER BY ")
        .column::<Pet>("id")
        .build()
}

fn george() -> Owner {
    Owner {
        id: 1,
        first_name: "George".to_owned(),
        last_name: "Franklin".to_owned(),
        telephone: Some("6085551023".to_owned()),
        version: 0,
    }
}

async fn seeded() -> (TestDatabase<Sqlite>, Stratum, Arc<Owner>) {
    let db = TestDatabase::with_tables(SCHEMA).await.unwrap();
    let stratum = Stratum::for_database::<Sqlite>();

    let cat = Arc::new(PetType {
        id: 1,
        name: "cat".to_owned(),
    });
    let dog = Arc::new(PetType {
        id: 2,
        name: "dog".to_owned(),
    });
    let inserted = stratum
        .execute(db.pool(), &insert::<PetType>(vec![cat.clone(), dog.clone()]))
        .await
        .unwrap();
    assert_eq!(inserted, 2);

    let owner = Arc::new(george());
    stratum
        .execute(db.pool(), &insert::<Owner>(vec![owner.clone()]))
        .await
        .unwrap();

    let pets: Vec<Arc<dyn stratum_orm::Record>> = vec![
        Arc::new(Pet {
            id: 1,
            name: "Leo".to_owned(),
            pet_type: cat,
            owner: Some(owner.clone()),
        }),
        Arc::new(Pet {
            id: 2,
            name: "Basil".to_owned(),
            pet_type: dog,
            owner: None,
        }),
    ];
    stratum
        .execute(db.pool(), &insert::<Pet>(pets))
        .await
        .unwrap();

    (db, stratum, owner)
}

#[tokio::test]
async fn eager_foreign_keys_are_joined() {
    let (db, stratum, owner) = seeded().await;

    let pets = stratum
        .fetch_all::<Pet, _>(db.pool(), &all_pets())
        .await
        .unwrap();

    assert_eq!(pets.len(), 2);
    assert_eq!(pets[0].name, "Leo");
    assert_eq!(pets[0].pet_type.name, "cat");
    assert_eq!(pets[0].owner.as_deref(), Some(owner.as_ref()));
    assert_eq!(pets[1].pet_type.name, "dog");
    assert!(pets[1].owner.is_none());
}

#[tokio::test]
async fn filters_bind_their_values() {
    let (db, stratum, _) = seeded().await;

    let template = Template::builder()
        .sql("SELECT ")
        .select::<Pet>()
        .sql(" FROM ")
        .from::<Pet>()
        .sql(" WHERE ")
        .compare::<Pet>("pet_type.name", Operator::Eq, "dog")
        .build();
    let dogs = stratum.fetch_all::<Pet, _>(db.pool(), &template).await.unwrap();
    assert_eq!(dogs.len(), 1);
    assert_eq!(dogs[0].name, "Basil");

    let template = Template::builder()
        .sql("SELECT ")
        .select::<Owner>()
        .sql(" FROM ")
        .from::<Owner>()
        .sql(" WHERE ")
        .in_list::<Owner, _>("last_name", ["Davis", "Franklin"])
        .build();
    let owners = stratum
        .fetch_all::<Owner, _>(db.pool(), &template)
        .await
        .unwrap();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].first_name, "George");

    // Three inserts from seeding plus the two selects.
    assert_eq!(stratum.cache_stats().len, 5);
}

#[tokio::test]
async fn updates_check_and_bump_the_version() {
    let (db, stratum, owner) = seeded().await;

    let renamed: Arc<dyn stratum_orm::Record> = Arc::new(Owner {
        telephone: None,
        ..(*owner).clone()
    });
    let update = Template::builder()
        .update::<Owner>(None)
        .sql(" ")
        .set(renamed.clone())
        .sql(" WHERE ")
        .matching(renamed)
        .build();

    assert_eq!(stratum.execute(db.pool(), &update).await.unwrap(), 1);
    // The stored version moved on, so the same record is now stale.
    assert_eq!(stratum.execute(db.pool(), &update).await.unwrap(), 0);

    let template = Template::builder()
        .sql("SELECT ")
        .select::<Owner>()
        .sql(" FROM ")
        .from::<Owner>()
        .build();
    let owners = stratum
        .fetch_all::<Owner, _>(db.pool(), &template)
        .await
        .unwrap();
    assert_eq!(owners[0].version, 1);
    assert_eq!(owners[0].telephone, None);
}

#[tokio::test]
async fn deletes_match_on_key_and_version() {
    let (db, stratum, _) = seeded().await;

    let stale: Arc<dyn stratum_orm::Record> = Arc::new(Owner {
        version: 7,
        ..george()
    });
    let delete = |record: Arc<dyn stratum_orm::Record>| {
        Template::builder()
            .delete::<Owner>(None)
            .sql(" WHERE ")
            .matching(record)
            .build()
    };
    assert_eq!(stratum.execute(db.pool(), &delete(stale)).await.unwrap(), 0);
    assert_eq!(
        stratum
            .execute(db.pool(), &delete(Arc::new(george())))
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn repeatable_reads_share_instances() {
    let (db, stratum, _) = seeded().await;
    let template = all_pets();

    let mut tx = db.pool().begin().await.unwrap();
    let cache = EntityCache::new(IsolationLevel::RepeatableRead);
    let first = stratum
        .fetch_all_cached::<Pet, _>(&mut *tx, &template, &cache)
        .await
        .unwrap();
    let second = stratum
        .fetch_all_cached::<Pet, _>(&mut *tx, &template, &cache)
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    assert!(Arc::ptr_eq(&first[0], &second[0]));
    assert!(Arc::ptr_eq(&first[1], &second[1]));
    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn read_committed_reads_are_fresh() {
    let (db, stratum, _) = seeded().await;
    let template = all_pets();
    let cache = EntityCache::new(IsolationLevel::ReadCommitted);

    let first = stratum
        .fetch_all_cached::<Pet, _>(db.pool(), &template, &cache)
        .await
        .unwrap();
    let second = stratum
        .fetch_all_cached::<Pet, _>(db.pool(), &template, &cache)
        .await
        .unwrap();

    assert!(!Arc::ptr_eq(&first[0], &second[0]));
    assert!(cache.is_empty());
}

#[tokio::test]
async fn rows_can_be_streamed() {
    let (db, stratum, _) = seeded().await;
    let statement = stratum.prepare(&all_pets()).unwrap();
    let width = statement.row.as_ref().unwrap().types.len();

    let rows: Vec<_> = Executor::from(db.pool())
        .fetch_stream(statement)
        .unwrap()
        .try_collect()
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.len() == width));
}

#[tokio::test]
async fn rolled_back_inserts_are_discarded() {
    let (db, stratum, _) = seeded().await;
    let hamster: Arc<dyn stratum_orm::Record> = Arc::new(PetType {
        id: 3,
        name: "hamster".to_owned(),
    });
    let statement = stratum.prepare(&insert::<PetType>(vec![hamster])).unwrap();

    let inserted = db
        .rolled_back(move |mut executor| {
            Box::pin(async move { executor.execute(&statement).await })
        })
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let template = Template::builder()
        .sql("SELECT ")
        .select::<PetType>()
        .sql(" FROM ")
        .from::<PetType>()
        .build();
    let types = stratum
        .fetch_all::<PetType, _>(db.pool(), &template)
        .await
        .unwrap();
    assert_eq!(types.len(), 2);
}

#[tokio::test]
async fn mismatched_dialects_are_rejected() {
    let (db, _, _) = seeded().await;
    let ansi = Stratum::default();

    let err = ansi
        .fetch_all::<Pet, _>(db.pool(), &all_pets())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("dialect"));
}
