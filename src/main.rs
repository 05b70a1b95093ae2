use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use elfdd::{DynamicEdit, PatchOptions, Request};

#[derive(Parser)]
#[command(
    name = "elfdd",
    version,
    about = "Rewrite the ELF interpreter and RUNPATH in place, without growing the file"
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Set the interpreter and/or RUNPATH of an ELF file
    Set {
        /// ELF file to patch
        file: PathBuf,

        /// New interpreter path (must fit in the existing PT_INTERP segment)
        #[arg(short = 'i', long)]
        set_interpreter: Option<String>,

        /// New RUNPATH (stored in a reclaimed dynamic symbol name)
        #[arg(short = 'r', long)]
        set_runpath: Option<String>,

        /// Write the result here instead of replacing FILE
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Show the planned writes without touching the file
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the interpreter, RUNPATH and reclaimable symbol names of an ELF file
    Show {
        /// ELF file to inspect
        file: PathBuf,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            let code = e
                .downcast_ref::<elfdd::Error>()
                .map_or(1, elfdd::Error::exit_code);
            ExitCode::from(code)
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Set {
            file,
            set_interpreter,
            set_runpath,
            output,
            dry_run,
        } => {
            let request = Request {
                interpreter: set_interpreter,
                runpath: set_runpath,
            };
            let opts = PatchOptions {
                output: output.as_deref(),
                dry_run,
                verbose: cli.verbose,
            };
            let report = elfdd::patch_file(&file, &request, &opts)?;

            if dry_run {
                for w in &report.plan.writes {
                    println!(
                        "{:#010x} {:>4} bytes  {:?}",
                        w.offset,
                        w.bytes.len(),
                        w.purpose
                    );
                }
            }
            if let Some(interp) = &report.plan.interpreter {
                println!("interpreter: {interp}");
            }
            if let (Some(rp), Some(runpath)) = (&report.plan.runpath, &request.runpath) {
                let how = match rp.dynamic {
                    DynamicEdit::Rewrite { index } => format!("rewrote dynamic entry {index}"),
                    DynamicEdit::Convert { index } => format!("converted DT_NULL entry {index}"),
                };
                println!("runpath: {runpath} (replaces {}, {how})", rp.candidate.name);
            }
            if report.written {
                println!("wrote {}", report.destination.display());
            }
        }
        Command::Show { file } => {
            let info = elfdd::inspect_file(&file)
                .with_context(|| format!("failed to inspect {}", file.display()))?;
            println!("format: {}, {} bytes", info.layout, info.size);
            println!(
                "interpreter: {}",
                info.interpreter.as_deref().unwrap_or("(none)")
            );
            println!("runpath: {}", info.runpath.as_deref().unwrap_or("(none)"));
            if let Some(rpath) = &info.rpath {
                println!("rpath: {rpath}");
            }
            if info.candidates.is_empty() {
                println!("reclaimable: (none)");
            }
            for c in &info.candidates {
                println!(
                    "reclaimable: {} at .dynstr+{:#x}, runpath up to {} bytes",
                    c.name,
                    c.str_offset,
                    c.capacity() - 1
                );
            }
        }
        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "elfdd", &mut std::io::stdout());
        }
    }

    Ok(())
}
