use anyhow::{bail, Context, Result};
use brine_core::{
    compile, Config, ErrorKind, FuncType, Imports, Module, Store, ValType, ValidatedModule, Value,
    PRINT_FUNCS,
};
use clap::{ArgAction, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// brine: a small WebAssembly interpreter.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Nested Wasm calls allowed before a call is aborted
    #[arg(long, global = true, default_value_t = Config::default().max_call_depth)]
    max_call_depth: usize,

    /// Upper bound on any memory's size, in 64 KiB pages
    #[arg(long, global = true, default_value_t = Config::default().max_memory_pages)]
    max_memory_pages: u32,

    /// Upper bound on any table's size, in elements
    #[arg(long, global = true, default_value_t = Config::default().max_table_elements)]
    max_table_elements: u32,

    /// Log more (-v info, -vv debug, -vvv trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode and validate a module, printing its verdict
    Validate {
        /// Input WebAssembly binary (.wasm)
        input: PathBuf,
    },
    /// Print a summary of a module's types, imports and exports
    Inspect {
        /// Input WebAssembly binary (.wasm)
        input: PathBuf,
    },
    /// Instantiate a module and optionally call one of its exports
    Run {
        /// Input WebAssembly binary (.wasm)
        input: PathBuf,

        /// Exported function to call after instantiation
        #[arg(long)]
        invoke: Option<String>,

        /// Arguments for the invoked function, parsed by parameter type
        #[arg(allow_negative_numbers = true)]
        args: Vec<String>,
    },
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            max_call_depth: self.max_call_depth,
            max_memory_pages: self.max_memory_pages,
            max_table_elements: self.max_table_elements,
            ..Config::default()
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_module(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn category(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Malformed => "malformed",
        ErrorKind::Invalid => "invalid",
        ErrorKind::Unlinkable => "unlinkable",
        ErrorKind::Uninstantiable => "uninstantiable",
        ErrorKind::Trap => "trap",
        ErrorKind::Exhaustion => "exhaustion",
        ErrorKind::Host => "error",
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Command::Validate { input } => {
            let bytes = read_module(input)?;
            match compile(&bytes) {
                Ok(_) => {
                    println!("valid");
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => {
                    println!("{}: {err}", category(err.kind()));
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Inspect { input } => {
            let bytes = read_module(input)?;
            let module = compile(&bytes)
                .with_context(|| format!("failed to load {}", input.display()))?;
            print!("{}", summary(&module));
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            input,
            invoke,
            args,
        } => {
            let bytes = read_module(input)?;
            let module = compile(&bytes)
                .with_context(|| format!("failed to load {}", input.display()))?;
            run(&module, cli.config(), invoke.as_deref(), args)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run(module: &ValidatedModule, config: Config, invoke: Option<&str>, args: &[String]) -> Result<()> {
    let mut store = Store::new(config);
    let imports = print_imports(&mut store)?;
    let instance = store
        .instantiate(module, &imports)
        .context("instantiation failed")?;
    info!("instantiated module");

    let Some(name) = invoke else {
        if !args.is_empty() {
            bail!("arguments given without --invoke");
        }
        return Ok(());
    };
    let func = instance.func(&store, name)?;
    let ty = store.func_type(func)?.clone();
    if ty.params.len() != args.len() {
        bail!("{name} expects {} arguments ({ty}), got {}", ty.params.len(), args.len());
    }
    let values = ty
        .params
        .iter()
        .zip(args)
        .map(|(ty, arg)| parse_value(*ty, arg))
        .collect::<Result<Vec<_>>>()?;
    let results = store
        .invoke(func, &values)
        .with_context(|| format!("calling {name} failed"))?;
    for value in results {
        println!("{value}");
    }
    Ok(())
}

/// Print functions importable as `spectest.print*`.
fn print_imports(store: &mut Store) -> Result<Imports> {
    let mut imports = Imports::new();
    for (name, params) in PRINT_FUNCS {
        let ty = FuncType::new(params.iter().copied(), []);
        let func = store.host_func(ty, |args: &[Value]| {
            let line: Vec<String> = args.iter().map(ToString::to_string).collect();
            println!("{}", line.join(" "));
            Ok(Vec::new())
        })?;
        imports.define("spectest", name, func);
    }
    Ok(imports)
}

fn parse_value(ty: ValType, text: &str) -> Result<Value> {
    let bad = || format!("cannot parse {text:?} as {ty}");
    let value = match ty {
        ValType::I32 => Value::I32(parse_int(text).and_then(|v| {
            i32::try_from(v).or_else(|_| u32::try_from(v).map(|u| u as i32)).ok()
        }).with_context(bad)?),
        ValType::I64 => Value::I64(parse_int(text).and_then(|v| {
            i64::try_from(v).or_else(|_| u64::try_from(v).map(|u| u as i64)).ok()
        }).with_context(bad)?),
        ValType::F32 => Value::f32(text.parse().ok().with_context(bad)?),
        ValType::F64 => Value::f64(text.parse().ok().with_context(bad)?),
        ValType::FuncRef | ValType::ExternRef if text == "null" => Value::default_for(ty),
        ValType::ExternRef => Value::ExternRef(Some(text.parse().ok().with_context(bad)?)),
        ValType::FuncRef => bail!("only null function references can be passed"),
    };
    Ok(value)
}

/// Decimal or `0x` hexadecimal, optionally negative.
fn parse_int(text: &str) -> Option<i128> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let magnitude = match digits.strip_prefix("0x") {
        Some(hex) => i128::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i128>().ok()?,
    };
    Some(if negative { -magnitude } else { magnitude })
}

fn summary(module: &Module) -> String {
    let mut out = String::new();
    if let Some(name) = &module.names.module {
        out.push_str(&format!("module {name}\n"));
    }
    out.push_str(&format!("types: {}\n", module.types.len()));
    for (i, ty) in module.types.iter().enumerate() {
        out.push_str(&format!("  type[{i}] {ty}\n"));
    }
    out.push_str(&format!("imports: {}\n", module.imports.len()));
    for import in &module.imports {
        out.push_str(&format!(
            "  {} {}.{}\n",
            import.desc.kind(),
            import.module,
            import.name
        ));
    }
    let imported = module.num_imported_funcs();
    out.push_str(&format!("functions: {}\n", module.funcs.len()));
    for (i, type_index) in module.funcs.iter().enumerate() {
        let index = imported + i as u32;
        let ty = module
            .types
            .get(*type_index as usize)
            .map(ToString::to_string)
            .unwrap_or_default();
        match module.names.funcs.get(&index) {
            Some(name) => out.push_str(&format!("  func[{index}] ${name} {ty}\n")),
            None => out.push_str(&format!("  func[{index}] {ty}\n")),
        }
    }
    for (i, table) in module.tables.iter().enumerate() {
        out.push_str(&format!("table[{i}] {} {}\n", ValType::from(table.elem), table.limits));
    }
    for (i, memory) in module.memories.iter().enumerate() {
        out.push_str(&format!("memory[{i}] {}\n", memory.limits));
    }
    out.push_str(&format!("globals: {}\n", module.globals.len()));
    out.push_str(&format!("exports: {}\n", module.exports.len()));
    for export in &module.exports {
        out.push_str(&format!("  {} {} -> {}\n", export.kind, export.name, export.index));
    }
    if let Some(start) = module.start {
        out.push_str(&format!("start: func[{start}]\n"));
    }
    out.push_str(&format!(
        "segments: {} elem, {} data\n",
        module.elems.len(),
        module.datas.len()
    ));
    out
}
