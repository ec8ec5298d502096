use std::{
    io::{stdout, Write},
    rc::Rc,
    time::Duration,
};

use miette::{Diagnostic, IntoDiagnostic, Report, Result};
use rustyline::error::ReadlineError;

use jessie_rs::{
    ast::Program,
    codegen::{self, CompileMode},
    host::{Board, Host},
    Interpreter, InterpreterOpts, Parser, ParserOpts, RuntimeError, Scanner, SourceReference,
};

const USAGE: &str =
    "Usage: jessie-rs [--compiled] [--timeout=MS] [--emit=surface|bytecode] [--ast] [file]";

struct CliOpts {
    interpreter: InterpreterOpts,
    emit: Option<CompileMode>,
    print_ast: bool,
}

fn main() -> Result<()> {
    let mut args: Vec<_> = std::env::args().skip(1).collect();
    let compiled = consume_arg(&mut args, |arg| (arg == "--compiled").then(|| true)).unwrap_or(false);
    let timeout = consume_arg(&mut args, |arg| {
        arg.strip_prefix("--timeout=")
            .map(|millis| millis.parse::<u64>().map(Duration::from_millis))
    });
    let emit = consume_arg(&mut args, |arg| match arg {
        "--emit=surface" => Some(CompileMode::Surface),
        "--emit=bytecode" => Some(CompileMode::Bytecode),
        _ => None,
    });
    let print_ast = consume_arg(&mut args, |arg| (arg == "--ast").then(|| true)).unwrap_or(false);
    let file = consume_arg(&mut args, |arg| {
        if arg.starts_with("--") {
            None
        } else {
            Some(arg.to_string())
        }
    });
    if !args.is_empty() {
        eprintln!("Unrecognized arguments: {:?}", args);
        eprintln!("{}", USAGE);
        std::process::exit(64);
    }

    let mut interpreter_opts = InterpreterOpts::default();
    if compiled {
        interpreter_opts = interpreter_opts.compiled();
    }
    match timeout {
        Some(Ok(limit)) => interpreter_opts = interpreter_opts.with_max_runtime(limit),
        Some(Err(error)) => {
            eprintln!("Invalid --timeout: {}", error);
            eprintln!("{}", USAGE);
            std::process::exit(64);
        }
        None => {}
    }
    let opts = CliOpts {
        interpreter: interpreter_opts,
        emit,
        print_ast,
    };

    if let Some(file) = file {
        run_file(file, opts)?;
    } else {
        run_prompt(opts)?;
    }

    Ok(())
}

fn consume_arg<T, F: Fn(&str) -> Option<T>>(args: &mut Vec<String>, predicate: F) -> Option<T> {
    let found = args
        .iter()
        .enumerate()
        .filter_map(|(idx, arg)| predicate(arg).map(|val| (idx, val)))
        .next();

    if let Some((idx, val)) = found {
        args.remove(idx);
        Some(val)
    } else {
        None
    }
}

fn report_all<E: Diagnostic + Send + Sync + 'static>(errors: impl IntoIterator<Item = E>) {
    for error in errors {
        eprintln!("{:?}", Report::new(error));
    }
}

fn parse_and_report_errors(
    file_name: &str,
    source: &str,
    parser_opts: ParserOpts,
) -> Option<Program> {
    let source_reference = SourceReference::new(file_name.to_string(), source.to_string());
    let (program, errors) = Parser::parse(Scanner::new(source), source_reference, parser_opts);
    let did_have_error = !errors.is_empty();
    report_all(errors);
    program.filter(|_| !did_have_error)
}

fn board_interpreter<W: Write>(stdout: &mut W, opts: InterpreterOpts) -> Interpreter<W> {
    Interpreter::new(stdout)
        .with_host(Host::with_board(Rc::new(Board::new("board"))))
        .with_opts(opts)
}

fn run_file(file_name: String, opts: CliOpts) -> Result<()> {
    let path = std::fs::canonicalize(file_name).into_diagnostic()?;
    let source = std::fs::read_to_string(&path).into_diagnostic()?;
    let file_name = path.to_string_lossy();

    let program = match parse_and_report_errors(&file_name, &source, opts.interpreter.parser) {
        Some(program) => program,
        None => std::process::exit(65),
    };

    if opts.print_ast {
        println!("{}", program);
        return Ok(());
    }
    if let Some(mode) = opts.emit {
        match codegen::compile(&program.root, mode, &program.source_reference) {
            Ok(code) => print!("{}", code),
            Err(error) => {
                report_all([error]);
                std::process::exit(65);
            }
        }
        return Ok(());
    }

    let mut stdout = stdout();
    let mut interpreter = board_interpreter(&mut stdout, opts.interpreter);
    let result = interpreter.execute_program(&program);
    report_all(interpreter.take_warnings());
    if let Err(error) = result {
        report_all([error]);
        std::process::exit(70);
    }

    Ok(())
}

fn repl_loop<
    E: Diagnostic + Send + Sync + 'static,
    F: FnMut(String, String) -> Option<Result<String, E>>,
>(
    mut eval: F,
) -> Result<()> {
    let mut rl = rustyline::Editor::<()>::new();
    let mut repl_line: usize = 1;
    loop {
        match rl.readline(&format!("{}> ", repl_line)) {
            Ok(line) => {
                rl.add_history_entry(line.as_str());
                match eval(format!("<repl-{}>", repl_line), format!("{}\n", line)) {
                    Some(Ok(val)) => println!("==> {}", val),
                    Some(Err(err)) => eprintln!("{:?}", Report::new(err)),
                    None => {}
                }
            }
            Err(ReadlineError::Interrupted) => return Ok(()),
            Err(ReadlineError::Eof) => return Ok(()),
            Err(err) => return Err(err).into_diagnostic(),
        }
        repl_line += 1;
    }
}

fn run_prompt(opts: CliOpts) -> Result<()> {
    let CliOpts {
        interpreter: interpreter_opts,
        emit,
        print_ast,
    } = opts;
    let repl_opts = interpreter_opts.for_repl();
    let parser_opts = repl_opts.parser;
    let mut stdout = stdout();
    let mut interpreter = board_interpreter(&mut stdout, repl_opts);
    repl_loop(|file_name, source| {
        let program = parse_and_report_errors(&file_name, &source, parser_opts)?;
        if print_ast {
            return Some(Ok(program.to_string()));
        }
        if let Some(mode) = emit {
            return Some(
                codegen::compile(&program.root, mode, &program.source_reference)
                    .map_err(RuntimeError::from),
            );
        }
        let result = interpreter.execute_program(&program);
        report_all(interpreter.take_warnings());
        Some(result.map(|value| format!("{:?}", value)))
    })
}
