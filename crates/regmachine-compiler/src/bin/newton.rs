//! Compile Newton's method and run it on the register machine.
//!
//! Usage: `newton [--config FILE] [--trace] [--print-controller]`

use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

use regmachine::MachineConfig;
use regmachine_compiler::{compile_program, programs, source_machine_with_config};

#[derive(Parser, Debug)]
#[command(name = "newton")]
#[command(about = "Run Newton's method compiled for the register machine")]
struct Args {
    /// JSON machine configuration; missing fields take their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Trace every executed instruction
    #[arg(long)]
    trace: bool,

    /// Print the compiled controller before running it
    #[arg(long = "print-controller")]
    print_controller: bool,
}

fn load_config(args: &Args) -> MachineConfig {
    let mut config = match &args.config {
        None => MachineConfig::default(),
        Some(path) => {
            let text = match fs::read_to_string(path) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to read {}: {}", path.display(), e);
                    process::exit(1);
                }
            };
            match serde_json::from_str(&text) {
                Ok(config) => config,
                Err(e) => {
                    error!("Invalid config {}: {}", path.display(), e);
                    process::exit(1);
                }
            }
        }
    };
    config.trace_instructions |= args.trace;
    config
}

fn main() {
    regmachine_compiler::init_logging();

    let args = Args::parse();
    let config = load_config(&args);
    let program = programs::newton();

    if args.print_controller {
        match compile_program(&program) {
            Ok(controller) => {
                for inst in &controller {
                    println!("{}", inst);
                }
            }
            Err(e) => {
                error!("Compilation error: {}", e);
                process::exit(1);
            }
        }
    }

    let mut machine = match source_machine_with_config(&program, config) {
        Ok(machine) => machine,
        Err(e) => {
            error!("Compilation error: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = machine.start() {
        error!("Execution error: {}", e);
        process::exit(1);
    }

    match machine.get_register("val") {
        Ok(value) => info!("Result: {}", value),
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }
    info!(
        "Executed {} instructions, stack {}",
        machine.instruction_count(),
        machine.stack_statistics()
    );
}
