use std::collections::HashSet;

use crate::dialect::SqlDialect;
use crate::error::TemplateError;
use crate::record::TypeHandle;

/// A table visible to column references.
#[derive(Debug, Clone)]
pub(crate) struct ScopeEntry {
    pub record: TypeHandle,
    /// Escaped table name.
    pub table: String,
    /// Qualifier for columns; `None` renders bare column names.
    pub alias: Option<String>,
    /// Written in the template rather than generated by an auto-join.
    pub explicit: bool,
    /// Entries registered by the same `From` share a group.
    pub group: usize,
    /// Field indexes from the group's root record to this table.
    pub table_path: Vec<usize>,
}

impl ScopeEntry {
    /// Prefix for a column of this table, `alias.` or nothing.
    pub fn qualify(&self, column: &str) -> String {
        match &self.alias {
            Some(alias) => format!("{alias}.{column}"),
            None => column.to_owned(),
        }
    }

    pub fn label(&self) -> String {
        self.alias.clone().unwrap_or_else(|| self.table.clone())
    }
}

/// Nested alias scopes of one compilation; subqueries push a level.
#[derive(Debug, Default)]
pub(crate) struct Scopes {
    levels: Vec<Vec<ScopeEntry>>,
    used: HashSet<String>,
    groups: usize,
}

fn initials(table: &str) -> String {
    let initials: String = table
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter_map(|segment| segment.chars().next())
        .filter(char::is_ascii_alphabetic)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if initials.is_empty() {
        "t".to_owned()
    } else {
        initials
    }
}

impl Scopes {
    pub fn push_level(&mut self) {
        self.levels.push(Vec::new());
    }

    pub fn pop_level(&mut self) {
        self.levels.pop();
    }

    pub fn next_group(&mut self) -> usize {
        self.groups += 1;
        self.groups
    }

    /// Marks an alias written in the template so generated ones avoid it.
    pub fn reserve(&mut self, alias: &str) {
        self.used.insert(alias.to_ascii_lowercase());
    }

    /// Alias made of the table's segment initials, suffixed until unique and not a keyword.
    pub fn generate(&mut self, table: &str, dialect: &dyn SqlDialect) -> String {
        let base = initials(table);
        let mut candidate = base.clone();
        let mut suffix = 1;
        while self.used.contains(&candidate) || dialect.is_keyword(&candidate) {
            candidate = format!("{base}{suffix}");
            suffix += 1;
        }
        self.used.insert(candidate.clone());
        candidate
    }

    pub fn register(&mut self, entry: ScopeEntry) -> Result<(), TemplateError> {
        if self.levels.is_empty() {
            self.push_level();
        }
        let level = self
            .levels
            .last_mut()
            .ok_or_else(|| TemplateError::Invalid("scope stack is empty".to_owned()))?;
        if let Some(alias) = &entry.alias {
            if level
                .iter()
                .any(|other| other.alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(alias)))
            {
                return Err(TemplateError::Invalid(format!(
                    "alias '{alias}' is declared twice"
                )));
            }
        }
        level.push(entry);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(Vec::is_empty)
    }

    /// Best entry of type `record`, innermost level first; explicit entries win.
    pub fn by_type(&self, record: TypeHandle) -> Result<Option<&ScopeEntry>, TemplateError> {
        for level in self.levels.iter().rev() {
            let candidates: Vec<&ScopeEntry> =
                level.iter().filter(|entry| entry.record == record).collect();
            if candidates.is_empty() {
                continue;
            }
            for explicit in [true, false] {
                let ranked: Vec<&ScopeEntry> = candidates
                    .iter()
                    .copied()
                    .filter(|entry| entry.explicit == explicit)
                    .collect();
                match ranked.as_slice() {
                    [] => continue,
                    [entry] => return Ok(Some(*entry)),
                    many => {
                        return Err(TemplateError::AmbiguousAlias {
                            type_name: record.name().to_owned(),
                            candidates: many.iter().map(|entry| entry.label()).collect(),
                        });
                    }
                }
            }
        }
        Ok(None)
    }

    pub fn by_alias(&self, alias: &str) -> Option<&ScopeEntry> {
        self.levels.iter().rev().find_map(|level| {
            level.iter().find(|entry| {
                entry
                    .alias
                    .as_deref()
                    .is_some_and(|a| a.eq_ignore_ascii_case(alias))
            })
        })
    }

    /// Entry joined into `base`'s group at `relative` below it.
    pub fn joined(&self, base: &ScopeEntry, relative: &[usize]) -> Option<&ScopeEntry> {
        if relative.is_empty() {
            return self.levels.iter().flatten().find(|entry| {
                entry.group == base.group && entry.table_path == base.table_path
            });
        }
        self.levels.iter().flatten().find(|entry| {
            entry.group == base.group
                && entry.table_path.len() == base.table_path.len() + relative.len()
                && entry.table_path.starts_with(&base.table_path)
                && entry.table_path[base.table_path.len()..] == *relative
        })
    }

    /// Table holding the columns at `relative` below `root`, typed `table`.
    ///
    /// An alias pins the root. Otherwise the root's auto-joins are tried
    /// first, then any entry of the table's type.
    pub fn resolve(
        &self,
        root: TypeHandle,
        relative: &[usize],
        table: TypeHandle,
        alias: Option<&str>,
    ) -> Result<&ScopeEntry, TemplateError> {
        if let Some(alias) = alias {
            let base = self
                .by_alias(alias)
                .filter(|entry| entry.record == root)
                .ok_or_else(|| TemplateError::UnknownTable {
                    type_name: format!("{} as {alias}", root.name()),
                })?;
            return self
                .joined(base, relative)
                .ok_or_else(|| TemplateError::UnknownTable {
                    type_name: table.name().to_owned(),
                });
        }

        if !relative.is_empty() {
            if let Some(base) = self.by_type(root)? {
                if let Some(entry) = self.joined(base, relative) {
                    return Ok(entry);
                }
            }
        }

        match self.by_type(table)? {
            Some(entry) => Ok(entry),
            None if self.is_empty() => Err(TemplateError::NoScope {
                type_name: table.name().to_owned(),
            }),
            None => Err(TemplateError::UnknownTable {
                type_name: table.name().to_owned(),
            }),
        }
    }
}
