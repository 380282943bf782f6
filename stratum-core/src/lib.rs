pub use sqlx;

pub mod annotation;
pub mod config;
pub mod converter;
pub mod dialect;
pub mod driver;
pub mod entity_cache;
pub mod error;
pub mod executor;
pub mod mapper;
pub mod metamodel;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod model;
pub mod naming;
pub mod record;
pub mod scanner;
pub mod sql_cache;
pub mod template;
pub mod test_utils;
pub mod value;

mod engine;
#[cfg(test)]
pub(crate) mod fixtures;

pub use config::StratumConfig;
pub use dialect::{AnsiDialect, LockMode, MySqlDialect, PostgresDialect, SqlDialect, SqliteDialect};
pub use driver::Driver;
pub use engine::Stratum;
pub use entity_cache::{EntityCache, IsolationLevel};
pub use error::{
    ConvertError, MappingError, ModelError, PathError, ScanError, StratumError, StratumResult,
    TemplateError, ValueError,
};
pub use executor::{Executor, IntoExecutor};
pub use mapper::ModelMapper;
pub use metamodel::Metamodel;
pub use model::{Model, ModelRegistry};
pub use record::{Record, RecordType, Ref, TypeHandle};
pub use sql_cache::{CacheStats, TemplateCache};
pub use template::{Element, JoinKind, Operator, Statement, Template};
pub use value::{BindValue, SqlType, Value};

pub mod prelude {
    pub use crate::{
        EntityCache, Executor, IntoExecutor, IsolationLevel, Operator, Record, RecordType, Ref,
        Statement, Stratum, StratumConfig, StratumError, StratumResult, Template,
    };
}
