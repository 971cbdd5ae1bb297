//! CLI dispatch: argument parsing, subcommand execution, and error
//! formatting. Out of scope for the interpreter itself — this crate is
//! thin glue around `yks-runtime` and `yks-syntax`.

pub mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use yks_runtime::Interpreter;

pub const PROG: &str = "yks";

#[derive(Parser)]
#[command(name = PROG, version, about = "Yarik# interpreter")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Execute a .yks file
    Run { file: PathBuf },
    /// Execute a .yks file, then dump the root scope's bindings
    Runinfo { file: PathBuf },
    /// Lex a .yks file and print its token stream
    Tokens { file: PathBuf },
    /// Print the interpreter's name and version
    Version,
    /// List available commands
    Help,
}

/// Run the parsed command, returning the process exit code.
pub fn run(cli: Cli) -> i32 {
    match cli.command {
        Command::Run { file } => run_file(&file),
        Command::Runinfo { file } => runinfo(&file),
        Command::Tokens { file } => tokens(&file),
        Command::Version => {
            println!("{PROG} {}", env!("CARGO_PKG_VERSION"));
            0
        }
        Command::Help => {
            print_help();
            0
        }
    }
}

fn run_file(file: &PathBuf) -> i32 {
    let interp = Interpreter::new();
    match interp.run_file(file) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{}", e.format(PROG));
            1
        }
    }
}

fn runinfo(file: &PathBuf) -> i32 {
    let interp = Interpreter::new();
    match interp.run_file(file) {
        Ok(()) => {
            println!("{}", interp.describe_root());
            0
        }
        Err(e) => {
            eprintln!("{}", e.format(PROG));
            1
        }
    }
}

fn tokens(file: &PathBuf) -> i32 {
    let source = match std::fs::read_to_string(file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{PROG}: cannot read '{}': {e}", file.display());
            return 1;
        }
    };
    match yks_syntax::Lexer::new(&source).tokenize() {
        Ok(tokens) => {
            for t in tokens {
                println!("{}:{} {:?}", t.position.line, t.position.column, t.kind);
            }
            0
        }
        Err(e) => {
            eprintln!("{PROG} {}:{}: {}.", e.position.line, e.position.column, e.message);
            1
        }
    }
}

fn print_help() {
    println!("{PROG} commands:");
    println!("  run <file>      execute a .yks file");
    println!("  runinfo <file>  execute a .yks file, then dump the root scope");
    println!("  tokens <file>   lex a .yks file and print its token stream");
    println!("  version         print name and version");
    println!("  help            show this message");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn run_command_exits_zero_on_success() {
        let mut f = tempfile::Builder::new().suffix(".yks").tempfile().unwrap();
        f.write_all(b"yar a = 1;").unwrap();
        assert_eq!(run_file(&f.path().to_path_buf()), 0);
    }

    #[test]
    fn run_command_exits_one_on_error() {
        let mut f = tempfile::Builder::new().suffix(".yks").tempfile().unwrap();
        f.write_all(b"yar a = 1; yar a = 2;").unwrap();
        assert_eq!(run_file(&f.path().to_path_buf()), 1);
    }
}
