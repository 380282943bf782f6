use std::sync::Arc;

use parking_lot::RwLock;
use sqlx::{Database, IntoArguments};

use crate::config::StratumConfig;
use crate::dialect::SqlDialect;
use crate::driver::Driver;
use crate::entity_cache::EntityCache;
use crate::error::{ModelError, PathError, StratumResult, TemplateError};
use crate::executor::IntoExecutor;
use crate::mapper::ModelMapper;
use crate::metamodel::Metamodel;
use crate::model::{Model, ModelRegistry};
use crate::record::RecordType;
use crate::sql_cache::{CacheStats, TemplateCache};
use crate::template::{
    CompileOptions, CompiledTemplate, Statement, Template, TemplateKey, TemplateShape, compile,
};

#[derive(Debug)]
struct Inner {
    config: StratumConfig,
    registry: Arc<ModelRegistry>,
    cache: TemplateCache,
}

impl Inner {
    fn new(config: StratumConfig) -> Self {
        Self {
            registry: Arc::new(ModelRegistry::new(
                config.naming.clone(),
                config.converters.clone(),
                config.validate_models,
            )),
            cache: TemplateCache::new(config.template_cache_size, config.template_cache_segments),
            config,
        }
    }

    fn options(&self) -> CompileOptions {
        CompileOptions {
            inline_parameters: self.config.inline_parameters,
        }
    }
}

/// Entry point of the ORM core: owns the model registry and the template cache.
///
/// Cheap to share behind an `Arc`. Calls already in flight keep the
/// configuration they started with when [`Stratum::reconfigure`] swaps it.
#[derive(Debug)]
pub struct Stratum {
    inner: RwLock<Arc<Inner>>,
}

impl Default for Stratum {
    fn default() -> Self {
        Self::new(StratumConfig::default())
    }
}

impl Stratum {
    pub fn new(config: StratumConfig) -> Self {
        Self {
            inner: RwLock::new(Arc::new(Inner::new(config))),
        }
    }

    pub fn from_env() -> Self {
        Self::new(StratumConfig::from_env())
    }

    /// Service whose dialect matches the given `sqlx` database.
    pub fn for_database<DB: Driver>() -> Self {
        Self::new(StratumConfig {
            dialect: DB::dialect(),
            ..StratumConfig::default()
        })
    }

    fn snapshot(&self) -> Arc<Inner> {
        self.inner.read().clone()
    }

    pub fn config(&self) -> StratumConfig {
        self.snapshot().config.clone()
    }

    pub fn dialect(&self) -> Arc<dyn SqlDialect> {
        self.snapshot().config.dialect.clone()
    }

    pub fn models(&self) -> Arc<ModelRegistry> {
        self.snapshot().registry.clone()
    }

    pub fn model<T: RecordType>(&self) -> Result<Arc<Model>, ModelError> {
        self.snapshot().registry.model::<T>()
    }

    /// Resolves a dotted field path rooted at `T`, e.g. `"owner.address.city"`.
    pub fn path<T: RecordType>(&self, dotted: &str) -> Result<Metamodel, PathError> {
        Metamodel::resolve_for::<T>(&self.snapshot().registry, dotted)
    }

    /// Swaps the configuration; models and compiled templates start over.
    pub fn reconfigure(&self, config: StratumConfig) {
        let next = Arc::new(Inner::new(config));
        let previous = std::mem::replace(&mut *self.inner.write(), next);
        previous.cache.clear();
        tracing::debug!(config = ?self.snapshot().config, "stratum reconfigured");
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.snapshot().cache.stats()
    }

    pub fn clear_cache(&self) {
        self.snapshot().cache.clear();
    }

    /// Compiled form of `template`, from the cache when its shape was seen before.
    pub fn compile(&self, template: &Template) -> Result<Arc<CompiledTemplate>, TemplateError> {
        let inner = self.snapshot();
        let shape = TemplateShape::of(template);
        compiled(&inner, template, shape)
    }

    /// Compiles `template` and binds the values it carries.
    pub fn prepare(&self, template: &Template) -> Result<Statement, TemplateError> {
        let inner = self.snapshot();
        prepare_with(&inner, template)
    }

    fn prepare_for<DB: Driver>(
        &self,
        template: &Template,
    ) -> Result<(Statement, Arc<ModelRegistry>), TemplateError> {
        let inner = self.snapshot();
        let expected = DB::dialect();
        if expected.name() != inner.config.dialect.name() {
            return Err(TemplateError::Invalid(format!(
                "configured for the {} dialect but executing on {}",
                inner.config.dialect.name(),
                expected.name()
            )));
        }
        Ok((prepare_with(&inner, template)?, inner.registry.clone()))
    }

    /// Prepares and runs a statement that returns no rows.
    pub async fn execute<'a, E>(&self, executor: E, template: &Template) -> StratumResult<u64>
    where
        E: IntoExecutor<'a>,
        for<'q> <E::DB as Database>::Arguments<'q>: IntoArguments<'q, E::DB>,
        for<'c> &'c mut <E::DB as Database>::Connection: sqlx::Executor<'c, Database = E::DB>,
    {
        let (statement, _) = self.prepare_for::<E::DB>(template)?;
        executor.into_executor().execute(&statement).await
    }

    /// Prepares and runs a `Select` of `T`, mapping every row to a record.
    pub async fn fetch_all<'a, T, E>(
        &self,
        executor: E,
        template: &Template,
    ) -> StratumResult<Vec<Arc<T>>>
    where
        T: RecordType,
        E: IntoExecutor<'a>,
        for<'q> <E::DB as Database>::Arguments<'q>: IntoArguments<'q, E::DB>,
        for<'c> &'c mut <E::DB as Database>::Connection: sqlx::Executor<'c, Database = E::DB>,
    {
        let (statement, registry) = self.prepare_for::<E::DB>(template)?;
        executor
            .into_executor()
            .fetch_records::<T>(&statement, &registry)
            .await
    }

    /// Like [`Stratum::fetch_all`], sharing instances through a transaction's cache.
    pub async fn fetch_all_cached<'a, T, E>(
        &self,
        executor: E,
        template: &Template,
        cache: &EntityCache,
    ) -> StratumResult<Vec<Arc<T>>>
    where
        T: RecordType,
        E: IntoExecutor<'a>,
        for<'q> <E::DB as Database>::Arguments<'q>: IntoArguments<'q, E::DB>,
        for<'c> &'c mut <E::DB as Database>::Connection: sqlx::Executor<'c, Database = E::DB>,
    {
        let (statement, registry) = self.prepare_for::<E::DB>(template)?;
        executor
            .into_executor()
            .fetch_records_cached::<T>(&statement, &registry, cache)
            .await
    }
}

fn compiled(
    inner: &Inner,
    template: &Template,
    shape: TemplateShape,
) -> Result<Arc<CompiledTemplate>, TemplateError> {
    let key = TemplateKey {
        shape,
        dialect: inner.config.dialect.name(),
        inline_parameters: inner.config.inline_parameters,
    };
    let mut missed = false;
    let compiled = inner.cache.get_or_try_compute(key, || {
        missed = true;
        compile(
            template,
            &inner.registry,
            inner.config.dialect.as_ref(),
            inner.options(),
        )
    });
    if missed {
        publish_cache_stats(&inner.cache);
    }
    compiled
}

#[cfg(feature = "metrics")]
fn publish_cache_stats(cache: &TemplateCache) {
    crate::metrics::record_cache_stats(&cache.stats());
}

#[cfg(not(feature = "metrics"))]
fn publish_cache_stats(_cache: &TemplateCache) {}

fn prepare_with(inner: &Inner, template: &Template) -> Result<Statement, TemplateError> {
    let (shape, arguments) = TemplateShape::split(template);
    let compiled = compiled(inner, template, shape)?;
    let mapper = ModelMapper::new(&inner.registry);
    compiled.bind(&arguments, &mapper, inner.config.dialect.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::PostgresDialect;
    use crate::fixtures::{City, Owner};
    use crate::template::Operator;
    use crate::value::BindValue;

    fn by_name(name: &str) -> Template {
        Template::builder()
            .sql("SELECT ")
            .select::<City>()
            .sql(" FROM ")
            .from::<City>()
            .sql(" WHERE ")
            .compare::<City>("name", Operator::Eq, name)
            .build()
    }

    #[test]
    fn same_shape_compiles_once() {
        let stratum = Stratum::default();
        let first = stratum.prepare(&by_name("Madison")).unwrap();
        let second = stratum.prepare(&by_name("Sun Prairie")).unwrap();

        assert_eq!(first.sql, "SELECT c.id, c.name FROM city c WHERE c.name = ?");
        assert_eq!(first.sql, second.sql);
        assert_eq!(first.binds, vec![BindValue::from("Madison")]);
        assert_eq!(second.binds, vec![BindValue::from("Sun Prairie")]);

        let stats = stratum.cache_stats();
        assert_eq!((stats.misses, stats.hits, stats.len), (1, 1, 1));
    }

    #[test]
    fn compile_returns_the_cached_instance() {
        let stratum = Stratum::default();
        let first = stratum.compile(&by_name("a")).unwrap();
        let second = stratum.compile(&by_name("b")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn reconfigure_switches_dialect_and_clears_the_cache() {
        let stratum = Stratum::default();
        stratum.prepare(&by_name("Madison")).unwrap();
        assert_eq!(stratum.cache_stats().len, 1);

        stratum.reconfigure(StratumConfig::default().dialect(PostgresDialect));
        let stats = stratum.cache_stats();
        assert_eq!((stats.len, stats.misses), (0, 0));

        let statement = stratum.prepare(&by_name("Madison")).unwrap();
        assert_eq!(statement.sql, "SELECT c.id, c.name FROM city c WHERE c.name = $1");
        assert_eq!(stratum.dialect().name(), "postgres");
    }

    #[test]
    fn inline_parameters_render_literals() {
        let stratum = Stratum::new(StratumConfig::default().inline_parameters(true));
        let statement = stratum.prepare(&by_name("O'Hare")).unwrap();
        assert_eq!(
            statement.sql,
            "SELECT c.id, c.name FROM city c WHERE c.name = 'O''Hare'"
        );
        assert!(statement.binds.is_empty());
    }

    #[test]
    fn failed_compilation_is_not_cached() {
        let stratum = Stratum::default();
        let template = Template::builder()
            .sql("SELECT ")
            .column::<City>("name")
            .sql(" FROM city")
            .build();
        assert!(matches!(
            stratum.prepare(&template),
            Err(TemplateError::NoScope { .. })
        ));
        assert_eq!(stratum.cache_stats().len, 0);
    }

    #[test]
    fn paths_resolve_against_the_registry() {
        let stratum = Stratum::default();
        let path = stratum.path::<Owner>("address.city").unwrap();
        assert_eq!(path.path(), "address");
        assert_eq!(path.field_name(), "city");
        assert_eq!(
            stratum.path::<Owner>("addres").unwrap_err().to_string(),
            "No field named 'addres' on type Owner"
        );
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn drivers_pick_their_dialect() {
        let stratum = Stratum::for_database::<sqlx::Sqlite>();
        assert_eq!(stratum.dialect().name(), crate::dialect::SqliteDialect.name());
        assert!(stratum.prepare_for::<sqlx::Sqlite>(&by_name("x")).is_ok());

        let ansi = Stratum::default();
        assert!(matches!(
            ansi.prepare_for::<sqlx::Sqlite>(&by_name("x")),
            Err(TemplateError::Invalid(_))
        ));
    }
}
