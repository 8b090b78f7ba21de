pub mod describe;
pub mod insert;
pub mod select;
pub mod simple;

use std::rc::Rc;

use qwery_parser::ast::DataResource;

use crate::errors::Result;
use crate::registry::DeviceRegistry;
use crate::rows::Row;
use crate::scope::Scope;
use crate::sources::{self, InputSource};

/// A compiled statement. Executing yields a result set; side effects are
/// confined to devices, variable writes and view registration.
pub enum Executable {
    Select(select::SelectExec),
    Insert(insert::InsertExec),
    Describe(describe::DescribeExec),
    Declare(simple::DeclareExec),
    Assign(simple::AssignExec),
    Show(simple::ShowExec),
    DefineView(simple::DefineViewExec),
    Connect(simple::ConnectExec),
    Disconnect(simple::DisconnectExec),
}

impl std::fmt::Debug for Executable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            Executable::Select(_) => "Select",
            Executable::Insert(_) => "Insert",
            Executable::Describe(_) => "Describe",
            Executable::Declare(_) => "Declare",
            Executable::Assign(_) => "Assign",
            Executable::Show(_) => "Show",
            Executable::DefineView(_) => "DefineView",
            Executable::Connect(_) => "Connect",
            Executable::Disconnect(_) => "Disconnect",
        };
        f.debug_tuple(variant).finish()
    }
}

impl Executable {
    pub fn execute(&self, scope: &Scope) -> Result<ResultSet> {
        match self {
            Executable::Select(exec) => exec.execute(scope),
            Executable::Insert(exec) => exec.execute(scope),
            Executable::Describe(exec) => exec.execute(scope),
            Executable::Declare(exec) => exec.execute(scope),
            Executable::Assign(exec) => exec.execute(scope),
            Executable::Show(exec) => exec.execute(scope),
            Executable::DefineView(exec) => exec.execute(scope),
            Executable::Connect(exec) => exec.execute(scope),
            Executable::Disconnect(exec) => exec.execute(scope),
        }
    }
}

/// A pull stream of rows. Operators compose by holding their upstream and
/// forwarding `close`.
pub trait RowStream {
    fn next_row(&mut self) -> Result<Option<Row>>;
    fn close(&mut self) -> Result<()>;
}

/// Lazy, single-pass row iterator. Exhaustion, an error, an explicit
/// `close` or a drop all release the underlying devices; consumers that
/// stop pulling leak nothing.
pub struct ResultSet {
    stream: Option<Box<dyn RowStream>>,
}

impl std::fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSet").finish_non_exhaustive()
    }
}

impl ResultSet {
    pub fn empty() -> Self {
        Self::from_rows(Vec::new())
    }

    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self::from_stream(VecStream {
            rows: rows.into_iter(),
        })
    }

    pub fn from_stream(stream: impl RowStream + 'static) -> Self {
        Self {
            stream: Some(Box::new(stream)),
        }
    }

    pub fn next_row(&mut self) -> Result<Option<Row>> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        match stream.next_row() {
            Ok(Some(row)) => Ok(Some(row)),
            Ok(None) => {
                self.close()?;
                Ok(None)
            }
            Err(error) => {
                let _ = self.close();
                Err(error)
            }
        }
    }

    /// Idempotent; forwards to the stream chain exactly once.
    pub fn close(&mut self) -> Result<()> {
        match self.stream.take() {
            Some(mut stream) => stream.close(),
            None => Ok(()),
        }
    }

    pub fn collect_rows(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row()? {
            rows.push(row);
        }
        Ok(rows)
    }
}

impl Iterator for ResultSet {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}

impl Drop for ResultSet {
    fn drop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close();
        }
    }
}

struct VecStream {
    rows: std::vec::IntoIter<Row>,
}

impl RowStream for VecStream {
    fn next_row(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.next())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A bound source: a symbolic resource resolved at execute time (views
/// first, then the device registry) or a compiled sub-query.
pub(crate) enum CompiledSource {
    Resource(DataResource),
    Query(Rc<Executable>),
}

impl CompiledSource {
    pub(crate) fn open(&self, scope: &Scope, registry: &Rc<DeviceRegistry>) -> Result<ResultSet> {
        match self {
            CompiledSource::Resource(resource) => {
                if let Some(view) = scope.view(&resource.path) {
                    return view.execute(scope);
                }
                let mut source =
                    sources::input_source(registry, &resource.path, &resource.hints)?;
                if let Err(error) = source.open(scope) {
                    let _ = source.close();
                    return Err(error);
                }
                Ok(ResultSet::from_stream(SourceStream { source }))
            }
            CompiledSource::Query(exec) => exec.execute(scope),
        }
    }
}

struct SourceStream {
    source: Box<dyn InputSource>,
}

impl RowStream for SourceStream {
    fn next_row(&mut self) -> Result<Option<Row>> {
        self.source.read()
    }

    fn close(&mut self) -> Result<()> {
        self.source.close()
    }
}
