use std::fs;
use std::process;

use hostlua::config::RuntimeConfig;
use hostlua::host::{ExecContext, HostValue, ObjectRef, Store, TypeRegistry};
use hostlua::scripting::{compile_and_execute, execute_with, RunStatus};

const USAGE: &str = "usage: hostlua [--moon] [--namespace NS] <script>";

fn main() {
    let mut moon = false;
    let mut namespace = "default".to_string();
    let mut script = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--moon" => moon = true,
            "--namespace" => match args.next() {
                Some(ns) => namespace = ns,
                None => fail(USAGE),
            },
            "-h" | "--help" => {
                println!("{}", USAGE);
                return;
            }
            _ => script = Some(arg),
        }
    }
    let Some(path) = script else {
        fail(USAGE);
    };

    let config = RuntimeConfig::load_or_default();
    hostlua::core::init_logging(&config.logging);

    let source = match fs::read_to_string(&path) {
        Ok(source) => source,
        Err(e) => fail(&format!("Failed to read {}: {}", path, e)),
    };

    let client = HostValue::ptr(ObjectRef::new(Store::new("local")));
    let ctx = ExecContext::new(namespace, path.as_str());
    let registry = TypeRegistry::global();
    let result = if moon {
        compile_and_execute(config, registry, ctx, &source, client)
    } else {
        execute_with(config, registry, ctx, &source, client)
    };

    if let Ok(output) = &result {
        print!("{}", output);
    }
    let status = RunStatus::from_result(&result);
    eprintln!("{}", status.status_text());
    if !status.is_success() {
        process::exit(1);
    }
}

fn fail(message: &str) -> ! {
    eprintln!("{}", message);
    process::exit(2);
}
