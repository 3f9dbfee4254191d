//! # miniscript
//!
//! The command-line driver for the MiniScript interpreter: run a file,
//! drop into a REPL, or run the built-in test harness.

mod cli;

use cli::*;

use std::cell::RefCell;
use std::error::Error;
use std::io::{self, Write};
use std::path::Path;
use std::rc::Rc;

use log::error;
use miniscript::interpreter::DEFAULT_TIME_LIMIT_SECONDS;
use miniscript::parser::Parser;
use miniscript::vm::{buffering_sink, Sink};
use miniscript::Interpreter;

fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::init();

    simple_logger::init_with_level((&args.verbosity).into()).unwrap();

    match args.command {
        Some(Commands::Run(run_args)) => run_file(&run_args.file, run_args.dump_tac),
        Some(Commands::Repl) | None => run_repl(),
        Some(Commands::Test(test_args)) => match test_args.integration {
            Some(path) => run_integration(&path),
            None => run_smoke(),
        },
    }
}

fn stdout_sink() -> Sink {
    Rc::new(RefCell::new(|text: &str, append_eol: bool| {
        print!("{text}");
        if append_eol {
            println!();
        }
        let _ = io::stdout().flush();
    }))
}

fn stderr_sink() -> Sink {
    Rc::new(RefCell::new(|text: &str, append_eol: bool| {
        eprint!("{text}");
        if append_eol {
            eprintln!();
        }
    }))
}

fn run_file(path: &Path, dump_tac: bool) -> Result<(), Box<dyn Error>> {
    let source = std::fs::read_to_string(path)?;

    if dump_tac {
        match Parser::compile(&source) {
            Ok(code) => {
                println!("-- TAC ({} lines) --", code.len());
                for (i, line) in code.iter().enumerate() {
                    println!("{i:4}: {line:?}");
                }
            }
            Err(e) => {
                error!("{e}");
                std::process::exit(1);
            }
        }
    }

    let mut interp = Interpreter::new(Some(&source), Some(stdout_sink()), Some(stderr_sink()));
    if interp.compile().is_err() {
        std::process::exit(1);
    }
    if !interp.run_until_done(DEFAULT_TIME_LIMIT_SECONDS, false) {
        error!("script did not finish within the time limit");
        std::process::exit(1);
    }
    Ok(())
}

fn run_repl() -> Result<(), Box<dyn Error>> {
    let mut interp = Interpreter::new(None, Some(stdout_sink()), Some(stderr_sink()));
    let mut line = String::new();
    loop {
        let prompt = if interp.need_more_input() { ">>> " } else { "> " };
        print!("{prompt}");
        io::stdout().flush()?;

        line.clear();
        if io::stdin().read_line(&mut line)? == 0 {
            println!();
            break;
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);
        let _ = interp.repl(Some(trimmed), DEFAULT_TIME_LIMIT_SECONDS);
    }
    Ok(())
}

/// One `====`/`----`-delimited block of `tests/fixtures`-style source (spec
/// §9 test-harness collaborator, made concrete for the CLI).
struct Fixture {
    name: String,
    source: String,
    expected: String,
}

fn parse_fixtures(content: &str) -> Vec<Fixture> {
    let mut fixtures = Vec::new();
    let mut name: Option<String> = None;
    let mut source_lines: Vec<&str> = Vec::new();
    let mut expected_lines: Vec<&str> = Vec::new();
    let mut in_expected = false;

    fn flush<'a>(fixtures: &mut Vec<Fixture>, name: &mut Option<String>, source: &mut Vec<&'a str>, expected: &mut Vec<&'a str>) {
        if let Some(n) = name.take() {
            fixtures.push(Fixture {
                name: n,
                source: source.join("\n"),
                expected: expected.join("\n"),
            });
        }
        source.clear();
        expected.clear();
    }

    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("====") {
            flush(&mut fixtures, &mut name, &mut source_lines, &mut expected_lines);
            name = Some(rest.trim().to_string());
            in_expected = false;
        } else if line.trim() == "----" {
            in_expected = true;
        } else if in_expected {
            expected_lines.push(line);
        } else {
            source_lines.push(line);
        }
    }
    flush(&mut fixtures, &mut name, &mut source_lines, &mut expected_lines);
    fixtures
}

fn run_integration(path: &Path) -> Result<(), Box<dyn Error>> {
    let content = std::fs::read_to_string(path)?;
    let fixtures = parse_fixtures(&content);

    let mut passed = 0;
    let mut failed = 0;
    for fixture in &fixtures {
        let out = Rc::new(RefCell::new(String::new()));
        let err = Rc::new(RefCell::new(String::new()));
        let mut interp = Interpreter::new(Some(&fixture.source), Some(buffering_sink(out.clone())), Some(buffering_sink(err.clone())));
        let _ = interp.compile();
        interp.run_until_done(DEFAULT_TIME_LIMIT_SECONDS, false);

        let actual = out.borrow();
        if actual.trim_end_matches('\n') == fixture.expected.trim_end_matches('\n') {
            passed += 1;
            println!("ok   {}", fixture.name);
        } else {
            failed += 1;
            println!("FAIL {}", fixture.name);
            println!("  expected: {:?}", fixture.expected);
            println!("  actual:   {:?}", actual.trim_end_matches('\n'));
            if !err.borrow().is_empty() {
                println!("  stderr:   {:?}", err.borrow().trim_end_matches('\n'));
            }
        }
    }

    println!("{passed} passed, {failed} failed");
    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Built-in smoke scripts (no `--integration` file): a sanity pass over a
/// release build, mirroring the original CLI's bare `--test` role.
const SMOKE_SCRIPTS: &[&str] = &[
    "print 6 * 7",
    "x = []\nx.push 42\nprint x.sum",
    "for i in range(3,1)\n  print i\nend for",
];

fn run_smoke() -> Result<(), Box<dyn Error>> {
    let mut failures = 0;
    for script in SMOKE_SCRIPTS {
        let err = Rc::new(RefCell::new(String::new()));
        let mut interp = Interpreter::new(Some(script), None, Some(buffering_sink(err.clone())));
        let ok = interp.compile().is_ok() && interp.run_until_done(DEFAULT_TIME_LIMIT_SECONDS, false);
        if !ok {
            failures += 1;
            eprintln!("smoke script failed: {script:?}\n  {}", err.borrow());
        }
    }
    println!("{} smoke script(s), {failures} failure(s)", SMOKE_SCRIPTS.len());
    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}
