use std::{collections::BTreeSet, env, path::PathBuf, process::ExitCode, str::FromStr, time::Duration};

use ailang::{
    Diagnostic, Effect, EffContext, EvalTracer, LoaderConfig, MatchMode, NetPolicy, NoopTracer, ReplOutcome,
    ReplSession, Runtime, StderrTracer, StdPrint, Value, Warning,
};

const USAGE: &str = "usage: ailang <command> [flags]

commands:
  run [flags] <file>     execute a program (default entry: main)
  check <file>           parse and type-check without evaluating
  repl                   interactive session

run flags:
  --entry <name>             alternate entry function (default: main)
  --args-json <json>         argument for the entry function (default: null)
  --caps <csv>               capability grants, e.g. IO,FS,Net
  --max-recursion-depth <n>  recursion budget (default: 10000)
  --net-allow <csv>          domain allowlist, *.example.com wildcards
  --net-allow-localhost      permit loopback/private network targets
  --net-allow-http           permit plain http
  --net-timeout <dur>        request timeout, e.g. 30s or 500ms
  --net-max-bytes <n>        response body cap in bytes
  --json | --compact         structured error output
  --print                    print the result even when it is ()
  --trace                    structured evaluation trace on stderr
  --decision-tree            compiled match dispatch (same semantics)";

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };
    match command.as_str() {
        "run" => cmd_run(&args[1..], false),
        "check" => cmd_run(&args[1..], true),
        "repl" => cmd_repl(),
        "--help" | "-h" | "help" => {
            println!("{USAGE}");
            ExitCode::SUCCESS
        }
        other => {
            eprintln!("unknown command `{other}`\n{USAGE}");
            ExitCode::from(2)
        }
    }
}

struct RunFlags {
    file: PathBuf,
    entry: String,
    args_json: serde_json::Value,
    caps: BTreeSet<Effect>,
    max_recursion_depth: u32,
    net: NetPolicy,
    json: bool,
    compact: bool,
    print_always: bool,
    trace: bool,
    match_mode: MatchMode,
}

/// Hand-rolled flag parsing; anything malformed is CLI misuse (exit 2).
fn parse_run_flags(args: &[String]) -> Result<RunFlags, String> {
    let mut flags = RunFlags {
        file: PathBuf::new(),
        entry: "main".to_owned(),
        args_json: serde_json::Value::Null,
        caps: BTreeSet::new(),
        max_recursion_depth: ailang::DEFAULT_MAX_RECURSION_DEPTH,
        net: NetPolicy::default(),
        json: false,
        compact: false,
        print_always: false,
        trace: false,
        match_mode: MatchMode::Linear,
    };
    let mut file = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value_for = |name: &str| -> Result<String, String> {
            iter.next()
                .map(String::clone)
                .ok_or_else(|| format!("flag {name} needs a value"))
        };
        match arg.as_str() {
            "--entry" => flags.entry = value_for("--entry")?,
            "--args-json" => {
                let raw = value_for("--args-json")?;
                flags.args_json =
                    serde_json::from_str(&raw).map_err(|e| format!("--args-json is not valid JSON: {e}"))?;
            }
            "--caps" => {
                for cap in value_for("--caps")?.split(',').filter(|s| !s.is_empty()) {
                    let effect =
                        Effect::from_str(cap.trim()).map_err(|_| format!("unknown capability `{cap}`"))?;
                    flags.caps.insert(effect);
                }
            }
            "--max-recursion-depth" => {
                flags.max_recursion_depth = value_for("--max-recursion-depth")?
                    .parse()
                    .map_err(|_| "--max-recursion-depth needs an integer".to_owned())?;
            }
            "--net-allow" => {
                let domains: Vec<String> = value_for("--net-allow")?
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(|s| s.trim().to_owned())
                    .collect();
                flags.net.allow_domains = Some(domains);
            }
            "--net-allow-localhost" => flags.net.allow_localhost = true,
            "--net-allow-http" => flags.net.allow_http = true,
            "--net-timeout" => {
                flags.net.timeout = parse_duration(&value_for("--net-timeout")?)?;
            }
            "--net-max-bytes" => {
                flags.net.max_bytes = value_for("--net-max-bytes")?
                    .parse()
                    .map_err(|_| "--net-max-bytes needs an integer".to_owned())?;
            }
            "--json" => flags.json = true,
            "--compact" => {
                flags.json = true;
                flags.compact = true;
            }
            "--print" => flags.print_always = true,
            "--trace" => flags.trace = true,
            "--decision-tree" => flags.match_mode = MatchMode::DecisionTree,
            other if other.starts_with('-') => return Err(format!("unknown flag `{other}`")),
            other => {
                if file.replace(PathBuf::from(other)).is_some() {
                    return Err("multiple input files given".to_owned());
                }
            }
        }
    }
    flags.file = file.ok_or_else(|| "no input file given".to_owned())?;
    Ok(flags)
}

/// Parses `30s`, `500ms`, or a bare number of seconds.
fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if let Some(ms) = raw.strip_suffix("ms") {
        return ms
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| format!("invalid duration `{raw}`"));
    }
    let secs = raw.strip_suffix('s').unwrap_or(raw);
    secs.parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| format!("invalid duration `{raw}`"))
}

fn loader_config() -> LoaderConfig {
    LoaderConfig {
        root: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        stdlib_path: env::var_os("AILANG_STDLIB_PATH").map(PathBuf::from),
        no_prelude: env::var_os("AILANG_NO_PRELUDE").is_some(),
    }
}

fn seed_from_env() -> Option<u64> {
    let raw = env::var("AILANG_SEED").ok()?;
    raw.trim().parse().ok()
}

fn print_warnings(warnings: &[Warning]) {
    for warning in warnings {
        eprintln!("\x1b[33mwarning\x1b[0m: {warning}");
    }
}

fn report_error(diag: &Diagnostic, json: bool, compact: bool) {
    if json {
        let value = diag.to_json();
        if compact {
            eprintln!("{value}");
        } else {
            eprintln!("{}", serde_json::to_string_pretty(&value).expect("error json serializes"));
        }
    } else {
        eprintln!("\x1b[31merror\x1b[0m: {diag}");
    }
}

fn cmd_run(args: &[String], check_only: bool) -> ExitCode {
    let flags = match parse_run_flags(args) {
        Ok(flags) => flags,
        Err(message) => {
            eprintln!("error: {message}\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    let runtime = match Runtime::load_file(&flags.file, loader_config()) {
        Ok(runtime) => runtime,
        Err(diag) => {
            report_error(&diag, flags.json, flags.compact);
            return ExitCode::FAILURE;
        }
    };
    print_warnings(&runtime.warnings());
    if check_only {
        return ExitCode::SUCCESS;
    }

    let eff = EffContext::new(flags.caps, seed_from_env())
        .with_sandbox(env::var_os("AILANG_FS_SANDBOX").map(PathBuf::from))
        .with_net(flags.net)
        .with_max_recursion_depth(flags.max_recursion_depth);

    let mut tracer: Box<dyn EvalTracer> = if flags.trace {
        Box::new(StderrTracer)
    } else {
        Box::new(NoopTracer)
    };

    let result = {
        let mut writer = StdPrint;
        runtime.call_entrypoint(
            &flags.entry,
            &flags.args_json,
            &eff,
            &mut writer,
            tracer.as_mut(),
            flags.match_mode,
        )
        // writer drops here, flushing buffered program output before the
        // result line below.
    };

    match result {
        Ok(value) => {
            if flags.print_always || !matches!(value, Value::Unit) {
                println!("{value}");
            }
            ExitCode::SUCCESS
        }
        Err(diag) => {
            report_error(&diag, flags.json, flags.compact);
            ExitCode::FAILURE
        }
    }
}

fn cmd_repl() -> ExitCode {
    use std::io::{BufRead as _, Write as _};

    let eff = EffContext::new(
        // The REPL grants the interactive effects by default; Net stays
        // off unless the session is restarted with explicit flags.
        BTreeSet::from([Effect::IO, Effect::FS, Effect::Clock, Effect::Rand]),
        seed_from_env(),
    )
    .with_sandbox(env::var_os("AILANG_FS_SANDBOX").map(PathBuf::from));

    let mut session = match ReplSession::new(eff) {
        Ok(session) => session,
        Err(diag) => {
            report_error(&diag, false, false);
            return ExitCode::FAILURE;
        }
    };

    println!("ailang repl — :type <expr> shows a type, :quit exits");
    let stdin = std::io::stdin();
    loop {
        print!("λ> ");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => {
                println!();
                return ExitCode::SUCCESS;
            }
            Ok(_) => {}
            Err(e) => {
                eprintln!("error reading input: {e}");
                return ExitCode::FAILURE;
            }
        }
        let outcome = {
            let mut writer = StdPrint;
            session.execute(&line, &mut writer)
            // writer drops here so program output lands before the echo.
        };
        match outcome {
            Ok(ReplOutcome::Value { value, scheme }) => println!("{value} : {scheme}"),
            Ok(ReplOutcome::Bound { name, scheme }) => println!("{name} : {scheme}"),
            Ok(ReplOutcome::DefinedType { name }) => println!("type {name} defined"),
            Ok(ReplOutcome::TypeOf { scheme }) => println!("{scheme}"),
            Ok(ReplOutcome::Quit) => return ExitCode::SUCCESS,
            Ok(ReplOutcome::Empty) => {}
            Err(diag) => report_error(&diag, false, false),
        }
    }
}
