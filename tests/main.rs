use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    rc::Rc,
    time::Duration,
};

use colored::Colorize;
use itertools::Itertools;
use jessie_rs::{
    host::{Board, Host},
    ExecutionMode, Interpreter, InterpreterOpts, ParseOutcome, SourceReference,
};
use lazy_static::lazy_static;
use libtest_mimic::{self, run_tests, Arguments, Outcome, Test};
use miette::{miette, Diagnostic, IntoDiagnostic, Result};
use regex::Regex;

fn main() {
    let tests = read_all_files("test_fixtures".to_string().into())
        .unwrap()
        .into_iter()
        .filter(|path| path.extension().map_or(false, |extension| extension == "jc"))
        .sorted()
        .flat_map(|path| {
            [
                Test {
                    name: path.to_string_lossy().into(),
                    kind: "treewalk".into(),
                    is_bench: false,
                    is_ignored: false,
                    data: (path.clone(), ExecutionMode::TreeWalk),
                },
                Test {
                    name: path.to_string_lossy().into(),
                    kind: "compiled".into(),
                    is_bench: false,
                    is_ignored: false,
                    data: (path, ExecutionMode::Compiled),
                },
            ]
        })
        .collect::<Vec<_>>();

    run_tests(&Arguments::from_args(), tests, |test| {
        let (path, mode) = &test.data;
        match run_test(path, *mode) {
            Ok(outcome) => outcome,
            Err(err) => Outcome::Failed {
                msg: Some(format!("{:?}", err)),
            },
        }
    })
    .exit();
}

lazy_static! {
    static ref EXPECTED_OUTPUT_RE: Regex = Regex::new("// expect: (.*)\n?").unwrap();
    static ref SYNTAX_ERROR_RE: Regex = Regex::new("// SyntaxError: (.*)\n?").unwrap();
    static ref RUNTIME_ERROR_RE: Regex = Regex::new("// RuntimeError: (.*)\n?").unwrap();
    static ref WARNING_RE: Regex = Regex::new("// Warning: (.*)\n?").unwrap();
}

fn run_test(path: &Path, mode: ExecutionMode) -> Result<Outcome> {
    let test_source = fs::read_to_string(path).into_diagnostic()?;
    let source_reference =
        SourceReference::new(path.to_string_lossy().to_string(), test_source.clone());

    let expected_output = EXPECTED_OUTPUT_RE
        .captures_iter(&test_source)
        .map(|captures| format!("{}\n", &captures[1]))
        .collect::<String>();
    let expected_syntax_errors = SYNTAX_ERROR_RE
        .captures_iter(&test_source)
        .map(|captures| format!("SyntaxError: {}", &captures[1]))
        .collect::<Vec<_>>();
    let expected_runtime_error = RUNTIME_ERROR_RE
        .captures_iter(&test_source)
        .map(|captures| format!("RuntimeError: {}", &captures[1]))
        .at_most_one()
        .map_err(|_| miette!("should have at most one expected runtime error"))?;
    let expected_warnings = WARNING_RE
        .captures_iter(&test_source)
        .map(|captures| format!("Warning: {}", &captures[1]))
        .collect::<Vec<_>>();

    let mut output_writer = StringWriter::new();
    let opts = InterpreterOpts {
        mode,
        ..InterpreterOpts::default().with_max_runtime(Duration::from_secs(5))
    };
    let (result, warnings) = {
        let mut interpreter = Interpreter::new(&mut output_writer)
            .with_host(Host::with_board(Rc::new(Board::new("board"))))
            .with_opts(opts);
        let result = interpreter.parse_source(source_reference);
        (result, interpreter.take_warnings())
    };

    match result {
        Ok(ParseOutcome { errors, .. }) => {
            let actual_errors = errors
                .iter()
                .map(|error| format!("SyntaxError: {}", error))
                .collect::<Vec<_>>();
            if let Err(msg) = match_all("syntax errors", &expected_syntax_errors, &actual_errors) {
                return Ok(Outcome::Failed { msg: Some(msg) });
            }
            if let Some(expected_error) = &expected_runtime_error {
                return Ok(Outcome::Failed {
                    msg: Some(format!("Expected runtime error:\n{}", expected_error)),
                });
            }
        }
        Err(error) => {
            let actual_error = fmt_diagnostic("RuntimeError", &error, &test_source);
            match &expected_runtime_error {
                Some(expected) if expected.trim() == actual_error.trim() => {}
                Some(expected) => {
                    return Ok(Outcome::Failed {
                        msg: Some(format!(
                            "Errors do not match.\nExpected: {}\n  Actual: {}",
                            expected, actual_error
                        )),
                    })
                }
                None => {
                    return Ok(Outcome::Failed {
                        msg: Some(format!("Unexpected error:\n{}", actual_error)),
                    })
                }
            }
        }
    }

    let actual_warnings = warnings
        .iter()
        .map(|warning| fmt_diagnostic("Warning", warning, &test_source))
        .collect::<Vec<_>>();
    if let Err(msg) = match_all("warnings", &expected_warnings, &actual_warnings) {
        return Ok(Outcome::Failed { msg: Some(msg) });
    }

    let actual_output: String = output_writer.into();

    Ok(compare_outputs(
        expected_output.split('\n').map(String::from).collect(),
        actual_output.split('\n').map(String::from).collect(),
    ))
}

fn match_all(what: &str, expected: &[String], actual: &[String]) -> Result<(), String> {
    if expected == actual {
        return Ok(());
    }
    let list = |items: &[String]| {
        items
            .iter()
            .map(|item| format!(" - {}\n", item))
            .collect::<String>()
    };
    Err(format!(
        "The {} do not match.\nExpected:\n{}Actual:\n{}",
        what,
        list(expected),
        list(actual)
    ))
}

/// `<kind>: <message> [line N]`, using the first label of the diagnostic when it has one.
fn fmt_diagnostic<D: Diagnostic>(kind: &str, diagnostic: &D, source: &str) -> String {
    let line = diagnostic
        .labels()
        .and_then(|mut labels| labels.next())
        .map(|label| line_of(label.offset(), source));
    match line {
        Some(line) => format!("{}: {} [line {}]", kind, diagnostic, line),
        None => format!("{}: {}", kind, diagnostic),
    }
}

fn line_of(byte_offset: usize, source: &str) -> usize {
    source
        .bytes()
        .take(byte_offset)
        .filter(|byte| *byte == b'\n')
        .count()
        + 1
}

fn compare_outputs(expected_lines: Vec<String>, actual_lines: Vec<String>) -> Outcome {
    const EXPECTED: &str = "expected";
    const ACTUAL: &str = "actual";
    const NONE: &str = "<None>";

    fn max_len(lines: &[String], label: &str) -> usize {
        lines
            .iter()
            .map(|line| line.len())
            .max()
            .unwrap_or(0)
            .max(label.len())
    }

    let max_expected_len = max_len(&expected_lines, EXPECTED);
    let max_actual_len = max_len(&actual_lines, ACTUAL);

    let mut output_str = format!(
        "   | {:max_expected_len$} | {:max_actual_len$} \n",
        EXPECTED.bold(),
        ACTUAL.bold()
    );
    let line_count = expected_lines.len().max(actual_lines.len());
    let mut unmatched_count = 0usize;
    for i in 0..line_count {
        let expected_line = expected_lines.get(i);
        let actual_line = actual_lines.get(i);

        let is_match = expected_line == actual_line;
        if !is_match {
            unmatched_count += 1;
        }

        let colorify = |string: &str| {
            if is_match {
                string.green()
            } else {
                string.red()
            }
        };

        let result_char = if is_match { "✓" } else { "✗" };
        output_str.push_str(&format!(
            " {} | {:max_expected_len$} | {:max_actual_len$}\n",
            colorify(result_char),
            expected_line
                .map(|line| colorify(line))
                .unwrap_or_else(|| NONE.dimmed()),
            actual_line
                .map(|line| colorify(line))
                .unwrap_or_else(|| NONE.dimmed()),
        ));
    }

    if unmatched_count > 0 {
        Outcome::Failed {
            msg: Some(output_str),
        }
    } else {
        Outcome::Passed
    }
}

fn read_all_files(prefix: PathBuf) -> Result<Vec<PathBuf>> {
    let mut results = Vec::<PathBuf>::new();
    read_children(prefix, &mut results)?;
    return Ok(results);

    fn read_children(prefix: PathBuf, results: &mut Vec<PathBuf>) -> Result<()> {
        for entry in fs::read_dir(prefix).into_diagnostic()? {
            let entry = entry.into_diagnostic()?;
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            if entry.file_type().into_diagnostic()?.is_dir() {
                read_children(entry.path(), results)?;
            } else {
                results.push(entry.path())
            }
        }
        Ok(())
    }
}

struct StringWriter {
    string: String,
}
impl StringWriter {
    fn new() -> Self {
        Self {
            string: String::new(),
        }
    }
}
impl Write for StringWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.string.push_str(&String::from_utf8_lossy(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
impl From<StringWriter> for String {
    fn from(string_writer: StringWriter) -> Self {
        string_writer.string
    }
}
