use std::{env, path::PathBuf, process::ExitCode};

use pyrite::{CompileOptions, DriverError};

const USAGE: &str = "usage: pyrite compile <source.py> <output> [--emit-c <dir>] [--emit-ir <path>]";

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut positional = Vec::new();
    let mut options = CompileOptions::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--emit-c" => match iter.next() {
                Some(dir) => options.emit_c = Some(PathBuf::from(dir)),
                None => {
                    eprintln!("{USAGE}");
                    return ExitCode::from(2);
                }
            },
            "--emit-ir" => match iter.next() {
                Some(path) => options.emit_ir = Some(PathBuf::from(path)),
                None => {
                    eprintln!("{USAGE}");
                    return ExitCode::from(2);
                }
            },
            other => positional.push(other.to_owned()),
        }
    }
    let [command, source, output] = positional.as_slice() else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };
    if command != "compile" {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    }

    match pyrite::compile(&PathBuf::from(source), &PathBuf::from(output), &options) {
        Ok(()) => ExitCode::SUCCESS,
        // Parse, name, and type errors: everything the front end caught,
        // with source spans, one per line.
        Err(DriverError::Compile(errors)) => {
            for error in errors {
                eprintln!("{error}");
            }
            ExitCode::from(1)
        }
        Err(DriverError::Io(message)) => {
            eprintln!("error: {message}");
            ExitCode::from(2)
        }
        Err(DriverError::ExternalCompiler { status, stderr }) => {
            eprint!("{stderr}");
            match status {
                Some(code) => eprintln!("external compiler exited with status {code}"),
                None => eprintln!("external compiler terminated by signal"),
            }
            ExitCode::from(3)
        }
    }
}
