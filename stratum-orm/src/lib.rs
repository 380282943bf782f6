//! # Stratum ORM
//!
//! > **"Describe records once, compile SQL once."**
//!
//! Stratum compiles typed query templates into dialect SQL, caches the result
//! by template shape and maps rows back into records.
//!
//! ## Key Features
//!
//! - **Typed templates**: raw SQL fragments interleaved with `Select`, `From`,
//!   `Compare`, `In`, `Insert`, `Update`, `Delete` and friends.
//! - **Shape-keyed cache**: the same template with different values compiles once.
//! - **Eager joins**: foreign keys held as `Arc<T>` are joined automatically;
//!   `Ref<T>` stays lazy.
//! - **Multi-Database**: ANSI, SQLite, PostgreSQL and MySQL dialects.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stratum_orm::prelude::*;
//!
//! #[derive(Record, Debug)]
//! struct City {
//!     #[stratum(id)]
//!     id: i32,
//!     name: String,
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = stratum_orm::sqlx::SqlitePool::connect("sqlite::memory:").await?;
//! let stratum = Stratum::for_database::<stratum_orm::sqlx::Sqlite>();
//!
//! let template = Template::builder()
//!     .sql("SELECT ")
//!     .select::<City>()
//!     .sql(" FROM ")
//!     .from::<City>()
//!     .sql(" WHERE ")
//!     .compare::<City>("name", Operator::Eq, "Madison")
//!     .build();
//! let cities = stratum.fetch_all::<City, _>(&pool, &template).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Installation
//!
//! ```toml
//! [dependencies]
//! stratum-orm = "0.3.0-alpha"
//! stratum-core = "0.3.0-alpha"
//! ```

pub use stratum_core::*;
pub use stratum_macros::Record;

pub mod prelude {
    pub use stratum_core::prelude::*;

    pub use crate::Record; // The derive macro and the trait
}
