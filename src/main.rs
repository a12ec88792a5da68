use std::io::{self, Write};
use std::process;

use ristretto::state::Interp;
use ristretto::value;
use ristretto::vm::{self, InterpretResult};

fn repl() {
    let mut state = Interp::new();
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush().unwrap();

        line.clear();
        match io::stdin().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let (ok, result) = vm::execute(&mut state, &line, true);
                if ok {
                    println!("{}", value::inspect(&state, result));
                }
            }
            Err(error) => eprintln!("Error reading line: {}", error),
        }
    }
}

fn run_file(path: &str) {
    let source = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("Could not read file \"{}\": {}", path, e);
            process::exit(74);
        }
    };

    let mut state = Interp::new();
    match vm::interpret(&mut state, &source, false) {
        InterpretResult::CompileError => process::exit(65),
        InterpretResult::RuntimeError => process::exit(70),
        InterpretResult::Ok(_) => (),
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 2 {
        let program = std::path::Path::new(&args[0])
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("ristretto");
        eprintln!("Usage: {program} <script.{}>", vm::SOURCE_EXTENSION);
        process::exit(64);
    } else if args.len() == 2 {
        run_file(&args[1]);
    } else {
        repl();
    }
}
