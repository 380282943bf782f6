/// How a primary key value comes into existence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Generation {
    /// Assigned by the database on insert; excluded from insert columns.
    Identity,
    /// Drawn from a named sequence inside the insert statement.
    Sequence(&'static str),
    /// Supplied by the caller.
    None,
}

/// Capability attached to a record type or one of its fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Annotation {
    PrimaryKey(Generation),
    ForeignKey,
    Inline,
    Version,
    Persist { insertable: bool, updatable: bool },
    DbTable(&'static str),
    /// Repeatable: one entry per physical column of a multi-column field.
    DbColumn(&'static str),
    Json,
    Convert(&'static str),
    /// Container holding several instances of a repeatable annotation.
    Repeated(Vec<Annotation>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnnotationKind {
    PrimaryKey,
    ForeignKey,
    Inline,
    Version,
    Persist,
    DbTable,
    DbColumn,
    Json,
    Convert,
}

impl AnnotationKind {
    pub fn is_repeatable(self) -> bool {
        matches!(self, AnnotationKind::DbColumn)
    }

    pub fn name(self) -> &'static str {
        match self {
            AnnotationKind::PrimaryKey => "primary key",
            AnnotationKind::ForeignKey => "foreign key",
            AnnotationKind::Inline => "inline",
            AnnotationKind::Version => "version",
            AnnotationKind::Persist => "persist",
            AnnotationKind::DbTable => "table name",
            AnnotationKind::DbColumn => "column name",
            AnnotationKind::Json => "json",
            AnnotationKind::Convert => "converter",
        }
    }
}

impl Annotation {
    /// Kind of a direct annotation; containers have none.
    pub fn kind(&self) -> Option<AnnotationKind> {
        Some(match self {
            Annotation::PrimaryKey(_) => AnnotationKind::PrimaryKey,
            Annotation::ForeignKey => AnnotationKind::ForeignKey,
            Annotation::Inline => AnnotationKind::Inline,
            Annotation::Version => AnnotationKind::Version,
            Annotation::Persist { .. } => AnnotationKind::Persist,
            Annotation::DbTable(_) => AnnotationKind::DbTable,
            Annotation::DbColumn(_) => AnnotationKind::DbColumn,
            Annotation::Json => AnnotationKind::Json,
            Annotation::Convert(_) => AnnotationKind::Convert,
            Annotation::Repeated(_) => return None,
        })
    }
}

/// Annotations of one type or field.
///
/// Containers are unwrapped for repeatable kinds, so three column names given
/// as one direct annotation plus a container of two count as three.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotations(Vec<Annotation>);

impl Annotations {
    pub fn new(annotations: Vec<Annotation>) -> Self {
        Self(annotations)
    }

    /// Every instance of `kind`, direct or from containers.
    pub fn all(&self, kind: AnnotationKind) -> Vec<&Annotation> {
        let mut found = Vec::new();
        for annotation in &self.0 {
            match annotation {
                Annotation::Repeated(members) if kind.is_repeatable() => {
                    found.extend(members.iter().filter(|m| m.kind() == Some(kind)));
                }
                direct if direct.kind() == Some(kind) => found.push(direct),
                _ => {}
            }
        }
        found
    }

    /// The single instance of `kind`; `None` when absent or ambiguous.
    pub fn get(&self, kind: AnnotationKind) -> Option<&Annotation> {
        match self.all(kind).as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    pub fn has(&self, kind: AnnotationKind) -> bool {
        !self.all(kind).is_empty()
    }

    pub fn count(&self, kind: AnnotationKind) -> usize {
        self.all(kind).len()
    }

    pub fn generation(&self) -> Option<&Generation> {
        match self.get(AnnotationKind::PrimaryKey)? {
            Annotation::PrimaryKey(generation) => Some(generation),
            _ => None,
        }
    }

    pub fn table_name(&self) -> Option<&'static str> {
        match self.get(AnnotationKind::DbTable)? {
            Annotation::DbTable(name) => Some(name),
            _ => None,
        }
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.all(AnnotationKind::DbColumn)
            .into_iter()
            .filter_map(|annotation| match annotation {
                Annotation::DbColumn(name) => Some(*name),
                _ => None,
            })
            .collect()
    }

    pub fn converter(&self) -> Option<&'static str> {
        match self.get(AnnotationKind::Convert)? {
            Annotation::Convert(name) => Some(name),
            _ => None,
        }
    }

    /// `(insertable, updatable)`; both default to true.
    pub fn persist(&self) -> (bool, bool) {
        match self.get(AnnotationKind::Persist) {
            Some(Annotation::Persist {
                insertable,
                updatable,
            }) => (*insertable, *updatable),
            _ => (true, true),
        }
    }

    /// First container member whose kind is not repeatable.
    pub(crate) fn misplaced(&self) -> Option<&Annotation> {
        self.0.iter().find_map(|annotation| match annotation {
            Annotation::Repeated(members) => members
                .iter()
                .find(|m| !m.kind().is_some_and(AnnotationKind::is_repeatable)),
            _ => None,
        })
    }

    /// First non-repeatable kind given more than once.
    pub(crate) fn duplicated(&self) -> Option<AnnotationKind> {
        let mut seen = Vec::new();
        for kind in self.0.iter().filter_map(Annotation::kind) {
            if kind.is_repeatable() {
                continue;
            }
            if seen.contains(&kind) {
                return Some(kind);
            }
            seen.push(kind);
        }
        None
    }

    pub fn iter(&self) -> impl Iterator<Item = &Annotation> {
        self.0.iter()
    }
}

impl From<Vec<Annotation>> for Annotations {
    fn from(annotations: Vec<Annotation>) -> Self {
        Self(annotations)
    }
}
