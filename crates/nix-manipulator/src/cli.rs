//! Command-line front-end.
//!
//! All commands read the document from stdin unless `-f FILE` is given and
//! write the result to stdout. Errors become a single-line message and a
//! non-zero exit code; `test` catches parse/rebuild failures itself and
//! prints `Fail` instead.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use nix_manipulator::{parse, remove_value, set_value, ManipulatorError, SourceFile};

pub enum CliError {
    Manipulator(ManipulatorError),
    Usage(String),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Manipulator(err) => write!(f, "{err}"),
            CliError::Usage(msg) => write!(f, "usage error: {msg}"),
        }
    }
}

impl From<ManipulatorError> for CliError {
    fn from(err: ManipulatorError) -> Self {
        CliError::Manipulator(err)
    }
}

impl From<io::Error> for CliError {
    fn from(err: io::Error) -> Self {
        CliError::Manipulator(ManipulatorError::Io(err))
    }
}

struct Invocation {
    command: String,
    file: Option<PathBuf>,
    args: Vec<String>,
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Option<Invocation>, CliError> {
    let mut command: Option<String> = None;
    let mut file: Option<PathBuf> = None;
    let mut rest: Vec<String> = Vec::new();

    let mut args = args.peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "-f" | "--file" => {
                let Some(value) = args.next() else {
                    return Err(CliError::Usage("-f expects a path".to_string()));
                };
                file = Some(PathBuf::from(value));
            }
            _ if command.is_none() => command = Some(arg),
            _ => rest.push(arg),
        }
    }

    let Some(command) = command else {
        return Ok(None);
    };
    Ok(Some(Invocation {
        command,
        file,
        args: rest,
    }))
}

pub fn run() -> Result<ExitCode, CliError> {
    let Some(invocation) = parse_args(std::env::args().skip(1))? else {
        print_help();
        return Ok(ExitCode::SUCCESS);
    };

    match invocation.command.as_str() {
        "set" => {
            let [npath, value] = invocation.args.as_slice() else {
                return Err(CliError::Usage("set expects NPATH and VALUE".to_string()));
            };
            let text = read_input(&invocation.file)?;
            let mut source = parse(&text)?;
            let output = set_value(&mut source, npath, value)?;
            print!("{output}");
            Ok(ExitCode::SUCCESS)
        }
        "rm" => {
            let [npath] = invocation.args.as_slice() else {
                return Err(CliError::Usage("rm expects NPATH".to_string()));
            };
            let text = read_input(&invocation.file)?;
            let mut source = parse(&text)?;
            let output = remove_value(&mut source, npath)?;
            print!("{output}");
            Ok(ExitCode::SUCCESS)
        }
        "test" => {
            let text = read_input(&invocation.file)?;
            match parse(&text) {
                Ok(source) if source.rebuild() == text => {
                    println!("OK");
                    Ok(ExitCode::SUCCESS)
                }
                _ => {
                    println!("Fail");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        "parse" => {
            let text = read_input(&invocation.file)?;
            let source = parse(&text)?;
            let dump = serde_json::to_string_pretty(&source)
                .map_err(|err| CliError::Manipulator(ManipulatorError::Io(io::Error::other(err))))?;
            println!("{dump}");
            Ok(ExitCode::SUCCESS)
        }
        "shell" => cmd_shell(invocation.file),
        other => {
            print_help();
            Err(CliError::Usage(format!("unknown command: {other}")))
        }
    }
}

fn read_input(file: &Option<PathBuf>) -> Result<String, CliError> {
    match file {
        Some(path) => Ok(fs::read_to_string(path)?),
        None => Ok(io::read_to_string(io::stdin())?),
    }
}

fn print_help() {
    println!(
        "nix-manipulator\n\n\
         USAGE:\n  nix-manipulator <COMMAND> [-f FILE] [ARGS]\n\n\
         COMMANDS:\n  \
         set NPATH VALUE   set a binding to a Nix expression\n  \
         rm NPATH          remove a binding\n  \
         test              parse + rebuild; prints OK or Fail\n  \
         parse             dump the parsed document as JSON\n  \
         shell             interactive editing session\n\n\
         NPATH is a dotted path (`foo.bar`, `foo.\"quoted.seg\"`); leading\n\
         `@`s address `let … in` scope layers, innermost first.\n\n\
         Input is read from stdin unless -f FILE is given; results go to\n\
         stdout.\n\n  -h, --help"
    );
}

struct ShellState {
    text: Option<String>,
    source: Option<SourceFile>,
}

fn cmd_shell(file: Option<PathBuf>) -> Result<ExitCode, CliError> {
    let mut state = ShellState {
        text: None,
        source: None,
    };
    if let Some(path) = &file {
        let text = fs::read_to_string(path)?;
        state.source = Some(parse(&text)?);
        state.text = Some(text);
        println!("loaded {}", path.display());
    }
    println!("nix-manipulator shell (load FILE, show, set NPATH VALUE, rm NPATH, test, quit)");

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Err(err) = shell_command(&mut state, line) {
            match err {
                ShellOutcome::Quit => break,
                ShellOutcome::Error(message) => eprintln!("{message}"),
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

enum ShellOutcome {
    Quit,
    Error(String),
}

fn shell_command(state: &mut ShellState, line: &str) -> Result<(), ShellOutcome> {
    let fail = |err: ManipulatorError| ShellOutcome::Error(err.to_string());
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    match command {
        "quit" | "exit" => Err(ShellOutcome::Quit),
        "load" => {
            if rest.is_empty() {
                return Err(ShellOutcome::Error("load expects a path".to_string()));
            }
            let text = fs::read_to_string(rest)
                .map_err(|err| ShellOutcome::Error(err.to_string()))?;
            state.source = Some(parse(&text).map_err(fail)?);
            state.text = Some(text);
            println!("loaded {rest}");
            Ok(())
        }
        "show" => {
            let source = state
                .source
                .as_ref()
                .ok_or_else(|| ShellOutcome::Error("no document loaded".to_string()))?;
            print!("{}", source.rebuild());
            Ok(())
        }
        "set" => {
            let source = state
                .source
                .as_mut()
                .ok_or_else(|| ShellOutcome::Error("no document loaded".to_string()))?;
            let Some((npath, value)) = rest.split_once(char::is_whitespace) else {
                return Err(ShellOutcome::Error("set expects NPATH and VALUE".to_string()));
            };
            let output = set_value(source, npath, value.trim()).map_err(fail)?;
            print!("{output}");
            Ok(())
        }
        "rm" => {
            if rest.is_empty() {
                return Err(ShellOutcome::Error("rm expects NPATH".to_string()));
            }
            let source = state
                .source
                .as_mut()
                .ok_or_else(|| ShellOutcome::Error("no document loaded".to_string()))?;
            let output = remove_value(source, rest).map_err(fail)?;
            print!("{output}");
            Ok(())
        }
        "test" => {
            let (Some(text), Some(source)) = (&state.text, &state.source) else {
                return Err(ShellOutcome::Error("no document loaded".to_string()));
            };
            if source.rebuild() == *text {
                println!("OK");
            } else {
                println!("Fail");
            }
            Ok(())
        }
        other => Err(ShellOutcome::Error(format!(
            "unknown command: {other} (try load, show, set, rm, test, quit)"
        ))),
    }
}
