use std::cell::Cell;
use std::path::Path;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use qwery_engine::devices::{DeviceStats, InputDevice, OutputDevice, Record, TextFileInputDevice};
use qwery_engine::registry::{DeviceFactory, DeviceRegistry, FileDeviceFactory};
use qwery_engine::{EngineError, Hints, Phase, Row, Runtime, RuntimeError, Scope, Value};

const COMPANYLIST: &str = "\
Symbol,Name,Sector,Industry,LastSale,MarketCap
XOM,\"Exxon Mobil Corp.\",Energy,Oil/Gas Transmission,88.5,410000000000
CVX,\"Chevron Corp.\",Energy,Integrated Oil,155.4,290000000000
MSFT,\"Microsoft Corp.\",Technology,Software,410.1,3000000000000
AAPL,\"Apple Inc.\",Technology,Consumer Electronics,195.3,2900000000000
INTC,\"Intel Corp.\",Technology,Semiconductors,35.2,150000000000
JPM,\"JPMorgan Chase\",Finance,Banks,182.9,520000000000
";

fn write_companylist(dir: &Path) -> String {
    let path = dir.join("companylist.csv");
    std::fs::write(&path, COMPANYLIST).unwrap();
    path.to_string_lossy().into_owned()
}

fn rows_of(runtime: &Runtime, scope: &Scope, sql: &str) -> Vec<Row> {
    runtime
        .execute(sql, scope)
        .unwrap()
        .collect_rows()
        .unwrap()
}

fn cell(row: &Row, name: &str) -> Value {
    row.get(name).cloned().unwrap_or(Value::Null)
}

#[test]
fn csv_filter_returns_the_matching_row() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_companylist(dir.path());
    let runtime = Runtime::new();
    let scope = runtime.new_scope();

    let rows = rows_of(
        &runtime,
        &scope,
        &format!("SELECT Symbol, Name FROM '{csv}' WHERE Industry = 'Oil/Gas Transmission'"),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(cell(&rows[0], "Symbol"), Value::Str("XOM".into()));
    assert_eq!(cell(&rows[0], "Name"), Value::Str("Exxon Mobil Corp.".into()));
}

#[test]
fn insert_overwrite_with_json_format() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_companylist(dir.path());
    let out = dir.path().join("out.json");
    std::fs::write(&out, "stale content\n").unwrap();
    let out = out.to_string_lossy().into_owned();

    let runtime = Runtime::new();
    let scope = runtime.new_scope();
    let summary = rows_of(
        &runtime,
        &scope,
        &format!(
            "INSERT OVERWRITE '{out}' WITH JSON FORMAT (Symbol, Name) \
             SELECT Symbol, Name FROM '{csv}' WITH CSV FORMAT WHERE Sector = 'Technology'"
        ),
    );
    assert_eq!(cell(&summary[0], "inserted"), Value::Int(3));

    let written = std::fs::read_to_string(&out).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines.len(), 3, "prior content must be overwritten");
    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["Symbol"], "MSFT");
    assert_eq!(first["Name"], "Microsoft Corp.");
    assert_eq!(first.as_object().unwrap().len(), 2);
}

#[test]
fn group_by_with_descending_count() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_companylist(dir.path());
    let runtime = Runtime::new();
    let scope = runtime.new_scope();

    let rows = rows_of(
        &runtime,
        &scope,
        &format!("SELECT Sector, COUNT(*) AS n FROM '{csv}' GROUP BY Sector ORDER BY n DESC LIMIT 3"),
    );
    assert_eq!(rows.len(), 3);
    let counts: Vec<i64> = rows
        .iter()
        .map(|row| cell(row, "n").as_int().unwrap())
        .collect();
    assert_eq!(counts, vec![3, 2, 1]);
    assert_eq!(cell(&rows[0], "Sector"), Value::Str("Technology".into()));
}

#[test]
fn declare_set_and_select_a_variable() {
    let runtime = Runtime::new();
    let scope = runtime.new_scope();
    let rows = runtime
        .execute_script(
            "DECLARE @x DOUBLE; SET @x = 2 * 3 + 1; SELECT @x AS v",
            &scope,
        )
        .unwrap()
        .collect_rows()
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(cell(&rows[0], "v"), Value::Float(7.0));
}

#[test]
fn describe_reports_columns_types_and_samples() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_companylist(dir.path());
    let runtime = Runtime::new();
    let scope = runtime.new_scope();

    let rows = rows_of(&runtime, &scope, &format!("DESCRIBE '{csv}' LIMIT 3"));
    assert_eq!(rows.len(), 3);
    assert_eq!(cell(&rows[0], "Column"), Value::Str("Symbol".into()));
    assert_eq!(cell(&rows[0], "Type"), Value::Str("String".into()));
    assert_eq!(cell(&rows[0], "Sample"), Value::Str("XOM".into()));
    let names: Vec<Value> = rows.iter().map(|row| cell(row, "Column")).collect();
    assert_eq!(
        names,
        vec![
            Value::Str("Symbol".into()),
            Value::Str("Name".into()),
            Value::Str("Sector".into()),
        ]
    );
}

#[test]
fn values_insert_writes_each_row_and_a_header() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("k.csv").to_string_lossy().into_owned();
    let runtime = Runtime::new();
    let scope = runtime.new_scope();

    rows_of(
        &runtime,
        &scope,
        &format!("INSERT INTO '{out}' (a, b) VALUES (1, 'x') VALUES (2, 'y')"),
    );
    let written = std::fs::read_to_string(&out).unwrap();
    assert_eq!(written.lines().count(), 3, "header plus two data rows");

    let rows = rows_of(&runtime, &scope, &format!("SELECT * FROM '{out}'"));
    assert_eq!(rows.len(), 2);
    assert_eq!(cell(&rows[0], "a"), Value::Int(1));
    assert_eq!(cell(&rows[1], "b"), Value::Str("y".into()));
}

#[test]
fn appending_values_keeps_the_existing_header() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("k.csv").to_string_lossy().into_owned();
    let runtime = Runtime::new();
    let scope = runtime.new_scope();

    rows_of(&runtime, &scope, &format!("INSERT INTO '{out}' (a, b) VALUES (1, 'x')"));
    rows_of(&runtime, &scope, &format!("INSERT INTO '{out}' (a, b) VALUES (2, 'y')"));

    let rows = rows_of(&runtime, &scope, &format!("SELECT * FROM '{out}'"));
    assert_eq!(rows.len(), 2);
}

/// An unfiltered select preserves source row order, and inserting a table
/// into a fresh target round-trips the same rows.
#[test]
fn select_star_preserves_order_and_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_companylist(dir.path());
    let copy = dir.path().join("copy.csv").to_string_lossy().into_owned();
    let runtime = Runtime::new();
    let scope = runtime.new_scope();

    let original = rows_of(&runtime, &scope, &format!("SELECT * FROM '{csv}'"));
    let symbols: Vec<Value> = original.iter().map(|row| cell(row, "Symbol")).collect();
    assert_eq!(
        symbols,
        ["XOM", "CVX", "MSFT", "AAPL", "INTC", "JPM"]
            .map(|s| Value::Str(s.into()))
            .to_vec()
    );

    rows_of(
        &runtime,
        &scope,
        &format!("INSERT OVERWRITE '{copy}' (Symbol, Name, Sector, Industry, LastSale, MarketCap) SELECT * FROM '{csv}'"),
    );
    let copied = rows_of(&runtime, &scope, &format!("SELECT * FROM '{copy}'"));
    assert_eq!(copied, original);
}

/// Equal sort keys retain input order.
#[test]
fn order_by_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pairs.csv");
    std::fs::write(&path, "k,seq\nb,1\na,2\nb,3\na,4\na,5\n").unwrap();
    let path = path.to_string_lossy().into_owned();

    let runtime = Runtime::new();
    let scope = runtime.new_scope();
    let rows = rows_of(&runtime, &scope, &format!("SELECT * FROM '{path}' ORDER BY k"));
    let seqs: Vec<i64> = rows
        .iter()
        .map(|row| cell(row, "seq").as_int().unwrap())
        .collect();
    assert_eq!(seqs, vec![2, 4, 5, 1, 3]);
}

#[test]
fn gzip_sinks_round_trip_through_gzip_sources() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_companylist(dir.path());
    let packed = dir.path().join("packed.csv.gz").to_string_lossy().into_owned();
    let runtime = Runtime::new();
    let scope = runtime.new_scope();

    rows_of(
        &runtime,
        &scope,
        &format!("INSERT OVERWRITE '{packed}' (Symbol, Sector) SELECT Symbol, Sector FROM '{csv}'"),
    );
    let rows = rows_of(&runtime, &scope, &format!("SELECT * FROM '{packed}'"));
    assert_eq!(rows.len(), 6);
    assert_eq!(cell(&rows[0], "Symbol"), Value::Str("XOM".into()));
}

#[test]
fn views_resolve_before_devices() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_companylist(dir.path());
    let runtime = Runtime::new();
    let scope = runtime.new_scope();

    runtime
        .execute_script(
            &format!("CREATE VIEW tech AS SELECT Symbol FROM '{csv}' WHERE Sector = 'Technology'"),
            &scope,
        )
        .unwrap();
    let rows = rows_of(&runtime, &scope, "SELECT * FROM 'tech'");
    assert_eq!(rows.len(), 3);

    let views = rows_of(&runtime, &scope, "SHOW VIEWS");
    assert_eq!(cell(&views[0], "view"), Value::Str("tech".into()));
}

#[test]
fn connections_register_and_disconnect() {
    let runtime = Runtime::new();
    let scope = runtime.new_scope();
    runtime
        .execute("CONNECT TO 'jdbc:postgresql://localhost/etl' AS warehouse", &scope)
        .unwrap();
    let listed = rows_of(&runtime, &scope, "SHOW CONNECTIONS");
    assert_eq!(listed.len(), 1);
    assert_eq!(cell(&listed[0], "connection"), Value::Str("warehouse".into()));

    runtime.execute("DISCONNECT FROM warehouse", &scope).unwrap();
    assert!(rows_of(&runtime, &scope, "SHOW CONNECTIONS").is_empty());

    let err = runtime
        .execute("DISCONNECT FROM warehouse", &scope)
        .unwrap_err();
    assert!(matches!(err, EngineError::Runtime(_)));
}

#[test]
fn aggregates_over_known_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("n.csv");
    std::fs::write(&path, "x\n2\n4\n4\n4\n5\n5\n7\n9\n").unwrap();
    let path = path.to_string_lossy().into_owned();

    let runtime = Runtime::new();
    let scope = runtime.new_scope();
    let rows = rows_of(
        &runtime,
        &scope,
        &format!(
            "SELECT COUNT(*) AS n, SUM(x) AS total, AVG(x) AS mean, \
             MIN(x) AS low, MAX(x) AS high, VARIANCE(x) AS var, \
             COUNT(DISTINCT x) AS uniq FROM '{path}'"
        ),
    );
    let row = &rows[0];
    assert_eq!(cell(row, "n"), Value::Int(8));
    assert_eq!(cell(row, "total"), Value::Int(40));
    assert_eq!(cell(row, "mean"), Value::Float(5.0));
    assert_eq!(cell(row, "low"), Value::Int(2));
    assert_eq!(cell(row, "high"), Value::Int(9));
    // Sample variance of {2,4,4,4,5,5,7,9}.
    let variance = match cell(row, "var") {
        Value::Float(v) => v,
        other => panic!("expected a double, got {other:?}"),
    };
    assert!((variance - 32.0 / 7.0).abs() < 1e-9);
    assert_eq!(cell(row, "uniq"), Value::Int(5));
}

// ---------------------------------------------------------------------------
// Device lifecycle tracking.
// ---------------------------------------------------------------------------

struct TrackingDevice {
    inner: TextFileInputDevice,
    closed: bool,
    closes: Rc<Cell<usize>>,
}

impl InputDevice for TrackingDevice {
    fn open(&mut self, scope: &Scope) -> qwery_engine::Result<()> {
        self.inner.open(scope)
    }

    fn read(&mut self) -> qwery_engine::Result<Option<Record>> {
        self.inner.read()
    }

    fn close(&mut self) -> qwery_engine::Result<()> {
        if !self.closed {
            self.closed = true;
            self.closes.set(self.closes.get() + 1);
        }
        self.inner.close()
    }

    fn stats(&self) -> DeviceStats {
        self.inner.stats()
    }
}

struct TrackingFactory {
    closes: Rc<Cell<usize>>,
}

impl DeviceFactory for TrackingFactory {
    fn accepts(&self, path: &str, _hints: &Hints) -> bool {
        path.starts_with("tracked://")
    }

    fn input(&self, path: &str, _hints: &Hints) -> qwery_engine::Result<Box<dyn InputDevice>> {
        let local = path.strip_prefix("tracked://").unwrap_or(path);
        Ok(Box::new(TrackingDevice {
            inner: TextFileInputDevice::new(local, false),
            closed: false,
            closes: Rc::clone(&self.closes),
        }))
    }

    fn output(&self, path: &str, _hints: &Hints) -> qwery_engine::Result<Box<dyn OutputDevice>> {
        Err(RuntimeError::new(Phase::Open, format!("'{path}' is read-only")).into())
    }
}

fn tracking_runtime(closes: &Rc<Cell<usize>>) -> Runtime {
    let registry = DeviceRegistry::builder()
        .with_factory(TrackingFactory {
            closes: Rc::clone(closes),
        })
        .with_factory(FileDeviceFactory)
        .build();
    Runtime::with_registry(registry)
}

/// A fully drained query leaves zero open devices.
#[test]
fn exhaustion_closes_the_device() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_companylist(dir.path());
    let closes = Rc::new(Cell::new(0));
    let runtime = tracking_runtime(&closes);
    let scope = runtime.new_scope();

    let rows = rows_of(&runtime, &scope, &format!("SELECT * FROM 'tracked://{csv}'"));
    assert_eq!(rows.len(), 6);
    assert_eq!(closes.get(), 1);
}

/// A consumer that stops pulling releases the device when the result set
/// drops.
#[test]
fn cancellation_closes_the_device() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_companylist(dir.path());
    let closes = Rc::new(Cell::new(0));
    let runtime = tracking_runtime(&closes);
    let scope = runtime.new_scope();

    let mut results = runtime
        .execute(&format!("SELECT * FROM 'tracked://{csv}'"), &scope)
        .unwrap();
    let first = results.next_row().unwrap();
    assert!(first.is_some());
    assert_eq!(closes.get(), 0, "still streaming");
    drop(results);
    assert_eq!(closes.get(), 1);
}

/// Aggregation drains the source eagerly and closes it before rows are
/// handed out.
#[test]
fn grouped_queries_release_the_device_before_emitting() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_companylist(dir.path());
    let closes = Rc::new(Cell::new(0));
    let runtime = tracking_runtime(&closes);
    let scope = runtime.new_scope();

    let results = runtime
        .execute(
            &format!("SELECT Sector, COUNT(*) AS n FROM 'tracked://{csv}' GROUP BY Sector"),
            &scope,
        )
        .unwrap();
    assert_eq!(closes.get(), 1);
    assert_eq!(results.collect_rows().unwrap().len(), 3);
}

#[test]
fn set_from_subquery_reads_the_first_value() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_companylist(dir.path());
    let runtime = Runtime::new();
    let scope = runtime.new_scope();

    let rows = runtime
        .execute_script(
            &format!(
                "DECLARE @n LONG; SET @n = (SELECT COUNT(*) FROM '{csv}'); SELECT @n AS rows"
            ),
            &scope,
        )
        .unwrap()
        .collect_rows()
        .unwrap();
    assert_eq!(cell(&rows[0], "rows"), Value::Int(6));
}

#[test]
fn subquery_sources_nest() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_companylist(dir.path());
    let runtime = Runtime::new();
    let scope = runtime.new_scope();

    let rows = rows_of(
        &runtime,
        &scope,
        &format!(
            "SELECT Symbol FROM (SELECT Symbol, LastSale FROM '{csv}' WHERE Sector = 'Energy') \
             WHERE LastSale > 100"
        ),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(cell(&rows[0], "Symbol"), Value::Str("CVX".into()));
}
