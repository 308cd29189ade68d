//! lakecat - a Git-backed column catalog for warehouse tables
//!
//! This is the main entry point for the lakecat command-line interface.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use lakecat::catalog::{NoLiveSchema, ProbeError, ProbeRequest, ProbedColumn, SchemaProbe, ScopeId, TableFormat};
use lakecat::store::RecordKey;
use lakecat::warehouse::{CatalogConfig, CatalogError, CreateTable, TableManager};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Columns declared on the command line stand in for reading the source.
struct DeclaredColumns(Vec<ProbedColumn>);

impl SchemaProbe for DeclaredColumns {
    fn infer(&self, request: &ProbeRequest) -> Result<Vec<ProbedColumn>, ProbeError> {
        if self.0.is_empty() {
            return Err(ProbeError::Unreachable(format!(
                "cannot read {} from the command line; declare columns as name=Type",
                request.url_pattern
            )));
        }
        Ok(self.0.clone())
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    // Parse simple command line args.
    let mut path: Option<PathBuf> = None;
    let mut config_file: Option<PathBuf> = None;
    let mut command: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-d" | "--catalog" => {
                i += 1;
                if i < args.len() {
                    path = Some(PathBuf::from(&args[i]));
                }
            }
            "-c" | "--config" => {
                i += 1;
                if i < args.len() {
                    config_file = Some(PathBuf::from(&args[i]));
                }
            }
            "-h" | "--help" => {
                print_help();
                return ExitCode::SUCCESS;
            }
            "--version" => {
                println!("lakecat v{}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            arg if arg.starts_with('-') && command.is_empty() => {
                eprintln!("Unknown option: {}", arg);
                return ExitCode::FAILURE;
            }
            arg => command.push(arg.to_string()),
        }
        i += 1;
    }

    let config = match load_config(config_file, path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = lakecat::logging::init(&config.log_filter) {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    match run(&config, &command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            if let Some(hint) = e.downcast_ref::<CatalogError>().and_then(hint) {
                eprintln!("hint: {}", hint);
            }
            ExitCode::FAILURE
        }
    }
}

fn hint(err: &CatalogError) -> Option<&'static str> {
    if err.is_conflict() {
        Some("the table changed while the command ran; run it again")
    } else if err.is_not_found() {
        Some("deleted tables are hidden; `list SCOPE` shows the live ones")
    } else {
        None
    }
}

fn print_help() {
    println!("lakecat - a Git-backed column catalog for warehouse tables");
    println!();
    println!("Usage: lakecat [OPTIONS] COMMAND [ARGS]");
    println!();
    println!("Options:");
    println!("  -d, --catalog PATH     Path to catalog directory (default: .lakecat)");
    println!("  -c, --config FILE      Read settings from a JSON file");
    println!("  -h, --help             Show this help message");
    println!("  --version              Show version");
    println!();
    println!("Commands:");
    println!("  list SCOPE [SEARCH]                        List live tables of a scope");
    println!("  create SCOPE NAME FORMAT URL [COL=TYPE..]  Register a table with declared columns");
    println!("  show ID                                    Print a table as JSON");
    println!("  columns ID                                 Print a table's column descriptors");
    println!("  update-schema ID COL=KIND [COL=KIND..]     Override column types");
    println!("  delete ID                                  Soft-delete a table");
    println!("  history ID [LIMIT]                         Show commits that touched a table");
    println!();
    println!("Environment:");
    println!("  LAKECAT_PATH, LAKECAT_CREATE_IF_MISSING, LAKECAT_INFERENCE_TIMEOUT_SECS,");
    println!("  LAKECAT_AUTHOR_NAME, LAKECAT_AUTHOR_EMAIL, LAKECAT_LOG, RUST_LOG");
}

fn load_config(file: Option<PathBuf>, path: Option<PathBuf>) -> CliResult<CatalogConfig> {
    let config = match file {
        Some(file) => CatalogConfig::from_file(file)?,
        None => CatalogConfig::default(),
    };
    let mut config = config.apply_env()?;
    if let Some(path) = path {
        config.path = path;
    }
    Ok(config)
}

fn run(config: &CatalogConfig, command: &[String]) -> CliResult<()> {
    let Some((name, args)) = command.split_first() else {
        print_help();
        return Ok(());
    };

    match name.as_str() {
        "create" => create(config, args),
        "list" => {
            let scope = parse_scope(args.first())?;
            let manager = open(config, Vec::new())?;
            let tables = manager.list(scope, args.get(1).map(String::as_str))?;
            if tables.is_empty() {
                println!("(0 tables)");
                return Ok(());
            }
            println!("id\tname\tformat\tcolumns");
            for table in &tables {
                println!("{}\t{}\t{}\t{}", table.id, table.name, table.format, table.columns.len());
            }
            println!("({} tables)", tables.len());
            Ok(())
        }
        "show" => {
            let manager = open(config, Vec::new())?;
            let table = manager.get(&parse_id(args.first())?)?;
            let view = manager.view(&table, &NoLiveSchema)?;
            println!("{}", serde_json::to_string_pretty(&view)?);
            Ok(())
        }
        "columns" => {
            let manager = open(config, Vec::new())?;
            let fields = manager.definition_columns(&parse_id(args.first())?)?;
            println!("{}", serde_json::to_string_pretty(&fields)?);
            Ok(())
        }
        "update-schema" => {
            let id = parse_id(args.first())?;
            let updates: BTreeMap<String, String> = parse_pairs(&args[1..])?.into_iter().collect();
            let manager = open(config, Vec::new())?;
            let table = manager.update_schema(&id, &updates)?;
            for column in updates.keys() {
                if let Some(entry) = table.columns.get(column) {
                    let state = if entry.is_valid() { "valid" } else { "invalid" };
                    println!("{}\t{}\t{}", column, entry.clickhouse(), state);
                }
            }
            Ok(())
        }
        "delete" => {
            let manager = open(config, Vec::new())?;
            let table = manager.soft_delete(&parse_id(args.first())?)?;
            println!("deleted {} ({})", table.name, table.id);
            Ok(())
        }
        "history" => {
            let id = parse_id(args.first())?;
            let limit = args.get(1).map(|n| n.parse::<usize>()).transpose()?;
            let manager = open(config, Vec::new())?;
            for commit in manager.history(&id, limit)? {
                println!(
                    "{}  {}  {}",
                    commit.id.short(),
                    commit.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    commit.summary()
                );
            }
            Ok(())
        }
        other => Err(format!("unknown command '{}', see --help", other).into()),
    }
}

fn create(config: &CatalogConfig, args: &[String]) -> CliResult<()> {
    let [scope, name, format, url, columns @ ..] = args else {
        return Err("usage: create SCOPE NAME FORMAT URL [COL=TYPE ...]".into());
    };

    let scope = parse_scope(Some(scope))?;
    let format: TableFormat = format.parse()?;
    let declared = parse_pairs(columns)?
        .into_iter()
        .map(|(name, clickhouse)| ProbedColumn::new(name, clickhouse))
        .collect();

    let manager = open(config, declared)?;
    let table = manager.create(CreateTable::new(scope, name.as_str(), format, url.as_str()))?;
    println!("created {} ({}) with {} columns", table.name, table.id, table.columns.len());
    Ok(())
}

fn open(config: &CatalogConfig, declared: Vec<ProbedColumn>) -> CliResult<TableManager> {
    Ok(TableManager::open(config, Arc::new(DeclaredColumns(declared)))?)
}

fn parse_scope(arg: Option<&String>) -> CliResult<ScopeId> {
    let arg = arg.ok_or("missing SCOPE")?;
    Ok(ScopeId(arg.parse()?))
}

fn parse_id(arg: Option<&String>) -> CliResult<RecordKey> {
    let arg = arg.ok_or("missing table ID")?;
    Ok(RecordKey::new(arg.as_str())?)
}

fn parse_pairs(args: &[String]) -> CliResult<Vec<(String, String)>> {
    args.iter()
        .map(|arg| match arg.split_once('=') {
            Some((key, value)) if !key.is_empty() && !value.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(format!("expected NAME=VALUE, got '{}'", arg).into()),
        })
        .collect()
}
