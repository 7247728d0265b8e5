use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smrlog_types::UpdateEntry;

use crate::error::{DispatchError, HandlerError, ObjectError, ObjectResult};

/// How an operation interacts with the log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Read-only; never appends to the log.
    Accessor,
    /// Write-only; the caller never sees a return value.
    Mutator,
    /// Writes, and returns a value derived from applying the write.
    MutatorAccessor,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Accessor => "accessor",
            Self::Mutator => "mutator",
            Self::MutatorAccessor => "mutator-accessor",
        };
        write!(f, "{s}")
    }
}

pub type ReadFn<T> = Arc<dyn Fn(&T, &[Value]) -> Result<Value, HandlerError> + Send + Sync>;
pub type WriteFn<T> = Arc<dyn Fn(&mut T, &[Value]) -> Result<Value, HandlerError> + Send + Sync>;

enum Handler<T> {
    Read(ReadFn<T>),
    Write(WriteFn<T>),
}

impl<T> Clone for Handler<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Read(f) => Self::Read(Arc::clone(f)),
            Self::Write(f) => Self::Write(Arc::clone(f)),
        }
    }
}

/// A classified operation bound to its handler.
pub struct Operation<T> {
    kind: OperationKind,
    handler: Handler<T>,
}

impl<T> Operation<T> {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }
}

/// Per-type mapping from operation name to kind and handler.
///
/// Built once per object type and immutable afterwards, so one table can be
/// shared by every replica of that type across threads.
pub struct DispatchTable<T> {
    type_name: String,
    operations: HashMap<String, Operation<T>>,
    /// Operations registered without a kind that defaulted to
    /// [`OperationKind::MutatorAccessor`].
    defaulted: Vec<String>,
}

impl<T> DispatchTable<T> {
    pub fn builder(type_name: impl Into<String>) -> DispatchTableBuilder<T> {
        DispatchTableBuilder {
            type_name: type_name.into(),
            strict: false,
            entries: Vec::new(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn get(&self, name: &str) -> Option<&Operation<T>> {
        self.operations.get(name)
    }

    pub fn kind(&self, name: &str) -> Option<OperationKind> {
        self.get(name).map(Operation::kind)
    }

    /// Operation names, sorted.
    pub fn operation_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn defaulted(&self) -> &[String] {
        &self.defaulted
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Run an accessor against `state`.
    pub fn read(&self, state: &T, operation: &str, args: &[Value]) -> ObjectResult<Value> {
        let op = self.lookup(operation)?;
        let result = match &op.handler {
            Handler::Read(f) => f(state, args),
            Handler::Write(_) => {
                return Err(ObjectError::WrongKind {
                    operation: operation.to_string(),
                    kind: op.kind,
                })
            }
        };
        result.map_err(|e| ObjectError::from_handler(operation, e))
    }

    /// Apply a recorded update to `state`.
    ///
    /// Only mutators and mutator-accessors can be applied; an accessor name
    /// in the log is rejected with [`ObjectError::WrongKind`].
    pub fn apply(&self, state: &mut T, entry: &UpdateEntry) -> ObjectResult<Value> {
        let op = self.lookup(&entry.operation)?;
        let result = match &op.handler {
            Handler::Write(f) => f(state, &entry.arguments),
            Handler::Read(_) => {
                return Err(ObjectError::WrongKind {
                    operation: entry.operation.clone(),
                    kind: op.kind,
                })
            }
        };
        result.map_err(|e| ObjectError::from_handler(&entry.operation, e))
    }

    fn lookup(&self, operation: &str) -> ObjectResult<&Operation<T>> {
        self.operations
            .get(operation)
            .ok_or_else(|| ObjectError::UnknownOperation {
                operation: operation.to_string(),
            })
    }
}

impl<T> fmt::Debug for DispatchTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("type_name", &self.type_name)
            .field("operations", &self.operation_names())
            .finish()
    }
}

/// Registration step for a [`DispatchTable`].
pub struct DispatchTableBuilder<T> {
    type_name: String,
    strict: bool,
    entries: Vec<(String, Option<OperationKind>, Handler<T>)>,
}

impl<T: 'static> DispatchTableBuilder<T> {
    /// Reject unclassified operations instead of defaulting them to
    /// mutator-accessors.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn accessor<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&T, &[Value]) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.entries.push((
            name.into(),
            Some(OperationKind::Accessor),
            Handler::Read(Arc::new(f)),
        ));
        self
    }

    pub fn mutator<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut T, &[Value]) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let handler: WriteFn<T> =
            Arc::new(move |state: &mut T, args: &[Value]| f(state, args).map(|()| Value::Null));
        self.entries
            .push((name.into(), Some(OperationKind::Mutator), Handler::Write(handler)));
        self
    }

    pub fn mutator_accessor<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut T, &[Value]) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.entries.push((
            name.into(),
            Some(OperationKind::MutatorAccessor),
            Handler::Write(Arc::new(f)),
        ));
        self
    }

    /// Register an operation without a kind.
    pub fn unclassified<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut T, &[Value]) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.entries
            .push((name.into(), None, Handler::Write(Arc::new(f))));
        self
    }

    pub fn build(self) -> Result<DispatchTable<T>, DispatchError> {
        let mut operations: HashMap<String, Operation<T>> = HashMap::new();
        let mut defaulted = Vec::new();

        for (name, kind, handler) in self.entries {
            if name.is_empty() {
                return Err(DispatchError::EmptyName);
            }
            let kind = match kind {
                Some(kind) => kind,
                None if self.strict => return Err(DispatchError::Unclassified { name }),
                None => {
                    defaulted.push(name.clone());
                    OperationKind::MutatorAccessor
                }
            };
            if let Some(existing) = operations.get(&name) {
                return Err(if existing.kind == kind {
                    DispatchError::DuplicateOperation { name }
                } else {
                    DispatchError::ConflictingKinds {
                        name,
                        first: existing.kind,
                        second: kind,
                    }
                });
            }
            operations.insert(name, Operation { kind, handler });
        }

        Ok(DispatchTable {
            type_name: self.type_name,
            operations,
            defaulted,
        })
    }
}
