//! RXC Driver
//!
//! Command-line front door to the toolchain: compile IR modules (JSON) to
//! object files, bundle objects into archives and link them into images.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use log::info;
use rxc_backend::{compile_module, AllocatorKind, CompileOptions};
use rxc_ir::Module;
use rxc_object::{write_atomic, Archive, LinkInput, LinkOptions, Linker, MemoryLayout, ObjectFile};
use rxc_target::{target_by_name, TargetDescription};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rxc")]
#[command(about = "RXC - IR to machine code toolchain")]
#[command(version = "0.1.0")]
struct Cli {
    /// Raise the log level (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Allocator {
    /// Iterated register coalescing
    Irc,
    /// Linear scan
    Linear,
}

impl From<Allocator> for AllocatorKind {
    fn from(a: Allocator) -> Self {
        match a {
            Allocator::Irc => AllocatorKind::Irc,
            Allocator::Linear => AllocatorKind::LinearScan,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compile an IR module (JSON) into an object file
    Compile {
        /// Input module
        input: PathBuf,

        /// Target name (riscv32, x86_64)
        #[arg(short, long)]
        target: String,

        /// Optimization level
        #[arg(short = 'O', default_value_t = 1)]
        opt_level: u8,

        #[arg(long, value_enum, default_value_t = Allocator::Irc)]
        allocator: Allocator,

        /// Print the module after optimization and legalization
        #[arg(long)]
        print_ir: bool,

        /// Compile functions one after another
        #[arg(long)]
        serial: bool,

        /// Output object file; defaults to the input with `.rxo`
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Link objects and archives into an image
    Link {
        /// Objects and archives, in command-line order
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[arg(short, long)]
        target: String,

        /// Entry symbol (default `_start` when defined)
        #[arg(long)]
        entry: Option<String>,

        /// Memory layout (JSON) replacing the target default
        #[arg(long)]
        memory_map: Option<PathBuf>,

        #[arg(short, long, default_value = "a.rxi")]
        output: PathBuf,
    },

    /// Bundle object files into an archive
    Archive {
        output: PathBuf,

        #[arg(required = true)]
        objects: Vec<PathBuf>,
    },
}

type DriverResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let result = match cli.command {
        Commands::Compile {
            input,
            target,
            opt_level,
            allocator,
            print_ir,
            serial,
            output,
        } => {
            let options = CompileOptions {
                opt_level,
                allocator: allocator.into(),
                parallel: !serial,
                ..Default::default()
            };
            let output = output.unwrap_or_else(|| input.with_extension("rxo"));
            run_compile(&input, &target, &options, print_ir, &output)
        }
        Commands::Link {
            inputs,
            target,
            entry,
            memory_map,
            output,
        } => run_link(&inputs, &target, entry, memory_map.as_deref(), &output),
        Commands::Archive { output, objects } => run_archive(&output, &objects),
    };
    if let Err(e) = result {
        eprintln!("rxc: error: {e}");
        std::process::exit(1);
    }
}

fn target(name: &str) -> DriverResult<TargetDescription> {
    target_by_name(name).ok_or_else(|| format!("unknown target '{name}'").into())
}

fn run_compile(
    input: &Path,
    target_name: &str,
    options: &CompileOptions,
    print_ir: bool,
    output: &Path,
) -> DriverResult<()> {
    let target = target(target_name)?;
    let module: Module = serde_json::from_str(&fs::read_to_string(input)?)?;
    if print_ir {
        let prepared = rxc_backend::prepare_module(&module, &target, options)?;
        println!("{prepared}");
    }
    let object = compile_module(&module, &target, options)?;
    write_atomic(output, &object.to_bytes()?)?;
    info!("wrote {}", output.display());
    Ok(())
}

fn run_link(
    inputs: &[PathBuf],
    target_name: &str,
    entry: Option<String>,
    memory_map: Option<&Path>,
    output: &Path,
) -> DriverResult<()> {
    let target = target(target_name)?;
    let memory_layout = match memory_map {
        Some(path) => Some(MemoryLayout::from_json(&fs::read_to_string(path)?)?),
        None => None,
    };
    let options = LinkOptions {
        entry,
        memory_layout,
        ..Default::default()
    };
    let inputs = inputs
        .iter()
        .map(|path| LinkInput::from_path(path))
        .collect::<Result<Vec<_>, _>>()?;
    let image = Linker::new(&target.link_target(), options).link(inputs)?;
    image.write_to(output)?;
    info!("wrote {}", output.display());
    Ok(())
}

fn run_archive(output: &Path, objects: &[PathBuf]) -> DriverResult<()> {
    let mut archive = Archive::new();
    for path in objects {
        let object = ObjectFile::from_bytes(&fs::read(path)?)?;
        let name = path.file_name().map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        archive.add(&name, object);
    }
    write_atomic(output, &archive.to_bytes()?)?;
    info!("wrote {} ({} members)", output.display(), objects.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rxc_ir::{BinaryOp, IrBuilder, IrType, Linkage, Signature};
    use rxc_object::Image;

    fn write_module(dir: &Path, name: &str, callee: Option<&str>) -> PathBuf {
        let mut b = IrBuilder::new(name);
        let sig = Signature::new(vec![IrType::I32, IrType::I32], vec![IrType::I32]);
        if let Some(callee) = callee {
            b.declare_function(callee, sig.clone());
        }
        let mut f = b.function(name, sig, Linkage::External);
        let p = f.params();
        let entry = f.create_block();
        f.switch_to_block(entry).unwrap();
        let v = match callee {
            Some(callee) => f.call(callee, &[p[0], p[1]], &[IrType::I32]).unwrap()[0],
            None => f.binary(BinaryOp::Add, p[0], p[1]).unwrap(),
        };
        f.ret(&[v]).unwrap();
        f.finish().unwrap();
        let path = dir.join(format!("{name}.json"));
        fs::write(&path, serde_json::to_string(&b.finish()).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_compile_archive_and_link() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        let add = write_module(dir, "add", None);
        let main = write_module(dir, "main", Some("add"));
        let options = CompileOptions::default();
        for input in [&add, &main] {
            run_compile(input, "riscv32", &options, false, &input.with_extension("rxo")).unwrap();
        }
        let lib = dir.join("libadd.rxa");
        run_archive(&lib, &[add.with_extension("rxo")]).unwrap();

        let out = dir.join("main.rxi");
        run_link(&[main.with_extension("rxo"), lib], "riscv32", Some("main".to_string()), None, &out).unwrap();
        let image = Image::read_from(&out).unwrap();
        assert_eq!(image.arch, "riscv32");
        assert_eq!(image.entry, image.symbol("main"));
        assert!(image.symbol("add").is_some());
        // two modules, two objects, the archive and the image; no temporaries
        assert_eq!(fs::read_dir(dir).unwrap().count(), 6);
    }

    #[test]
    fn test_unknown_target_and_failed_link_write_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        let main = write_module(dir, "main", Some("add"));
        let object = main.with_extension("rxo");
        assert!(run_compile(&main, "z80", &CompileOptions::default(), false, &object).is_err());
        assert!(!object.exists());

        run_compile(&main, "x86_64", &CompileOptions::default(), false, &object).unwrap();
        let out = dir.join("main.rxi");
        let err = run_link(&[object], "x86_64", None, None, &out).unwrap_err();
        assert!(err.to_string().contains("add"));
        assert!(!out.exists());
    }
}
