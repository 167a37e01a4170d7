//! End-to-end pipeline tests: source text in, values out.
//!
//! Each test drives the full stack — lexer, parser, elaborator, type
//! checker, linker, loader, runtime, evaluator — through the public API.

use std::collections::BTreeSet;

use ailang::{
    CollectStringPrint, DiagResult, Effect, EffContext, ErrorCode, LoaderConfig, MatchMode, NoopTracer, Runtime,
    Value,
};
use pretty_assertions::assert_eq;

fn run_with(
    source: &str,
    entry: &str,
    args: serde_json::Value,
    caps: &[Effect],
    seed: Option<u64>,
    match_mode: MatchMode,
) -> (DiagResult<Value>, String) {
    let runtime = match Runtime::from_source(source, "demo", LoaderConfig::default()) {
        Ok(runtime) => runtime,
        Err(diag) => return (Err(diag), String::new()),
    };
    let eff = EffContext::new(caps.iter().copied().collect::<BTreeSet<_>>(), seed);
    let mut writer = CollectStringPrint::new();
    let mut tracer = NoopTracer;
    let result = runtime.call_entrypoint(entry, &args, &eff, &mut writer, &mut tracer, match_mode);
    (result, writer.into_output())
}

fn run(source: &str, entry: &str, args: serde_json::Value) -> (DiagResult<Value>, String) {
    run_with(source, entry, args, &[], None, MatchMode::Linear)
}

// === Recursion ===

#[test]
fn factorial_of_five_is_120() {
    let source = "module demo\n\
                  export func factorial(n: int) -> int { if n <= 1 then 1 else n * factorial(n - 1) }";
    let (result, _) = run(source, "factorial", serde_json::json!(5));
    assert_eq!(result.unwrap(), Value::Int(120));
}

#[test]
fn fibonacci_of_ten_is_55() {
    let source = "module demo\n\
                  export func fib(n: int) -> int { if n <= 1 then n else fib(n - 1) + fib(n - 2) }";
    let (result, _) = run(source, "fib", serde_json::json!(10));
    assert_eq!(result.unwrap(), Value::Int(55));
}

#[test]
fn mutual_recursion_through_letrec() {
    let source = "module demo\n\
                  export func main() -> bool {\n\
                    letrec isEven = \\n. if n == 0 then true else isOdd(n - 1),\n\
                           isOdd = \\n. if n == 0 then false else isEven(n - 1)\n\
                    in isEven(42)\n\
                  }";
    let (result, _) = run(source, "main", serde_json::json!(null));
    assert_eq!(result.unwrap(), Value::Bool(true));
}

#[test]
fn mutual_recursion_across_top_level_functions() {
    let source = "module demo\n\
                  func isEven(n: int) -> bool { if n == 0 then true else isOdd(n - 1) }\n\
                  func isOdd(n: int) -> bool { if n == 0 then false else isEven(n - 1) }\n\
                  export func main(n: int) -> bool { isEven(n) }";
    let (result, _) = run(source, "main", serde_json::json!(42));
    assert_eq!(result.unwrap(), Value::Bool(true));
}

#[test]
fn recursion_budget_fails_with_rt_rec_003() {
    let source = "module demo\n\
                  export func spin(n: int) -> int { spin(n + 1) }";
    let runtime = Runtime::from_source(source, "demo", LoaderConfig::default()).unwrap();
    let eff = EffContext::new(BTreeSet::new(), None).with_max_recursion_depth(64);
    let mut writer = CollectStringPrint::new();
    let mut tracer = NoopTracer;
    let err = runtime
        .call_entrypoint("spin", &serde_json::json!(0), &eff, &mut writer, &mut tracer, MatchMode::Linear)
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::RtRecursionLimit);
}

// === Dictionary routing ===

#[test]
fn float_equality_at_variable_uses_eq_float() {
    // Regression guard: must route through eq_Float via the resolved
    // method table, not through literal inspection.
    let source = "module demo\n\
                  export func main() -> bool { let b: float = 0.0 in b == 0.0 }";
    let (result, _) = run(source, "main", serde_json::json!(null));
    assert_eq!(result.unwrap(), Value::Bool(true));
}

#[test]
fn integer_arithmetic_ladder() {
    let source = "module demo\n\
                  export func main() -> int { 2 + 3 * 4 - 6 / 2 % 2 ** 2 }";
    let (result, _) = run(source, "main", serde_json::json!(null));
    // 2 + 12 - ((6/2) % (2**2)) = 14 - 3 = 11
    assert_eq!(result.unwrap(), Value::Int(11));
}

#[test]
fn polymorphic_show_picks_the_instance_dictionary() {
    let source = "module demo\n\
                  export func main() -> string {\n\
                    show(42) ++ \" \" ++ show(2.5) ++ \" \" ++ show(true) ++ \" \" ++ show(\"hi\")\n\
                  }";
    let (result, _) = run(source, "main", serde_json::json!(null));
    assert_eq!(result.unwrap(), Value::str("42 2.5 true \"hi\""));
}

#[test]
fn string_and_list_concat() {
    let source = "module demo\n\
                  export func s() -> string { \"foo\" ++ \"bar\" }\n\
                  export func l() -> [int] { [1, 2] ++ [3] }";
    let (s, _) = run(source, "s", serde_json::json!(null));
    assert_eq!(s.unwrap(), Value::str("foobar"));
    let (l, _) = run(source, "l", serde_json::json!(null));
    assert_eq!(l.unwrap().to_string(), "[1, 2, 3]");
}

// === Records ===

#[test]
fn record_subsumption_at_call_sites() {
    let source = "module demo\n\
                  func printId(e: {id: int}) -> int { e.id }\n\
                  export func main() -> int { printId({id: 42, name: \"alice\"}) }";
    let (result, _) = run(source, "main", serde_json::json!(null));
    assert_eq!(result.unwrap(), Value::Int(42));
}

#[test]
fn record_update_preserves_unspecified_fields() {
    let source = "module demo\n\
                  export func main() -> int {\n\
                    let r = {x: 1, y: 2, z: 3} in\n\
                    let r2 = {r | y: 20} in\n\
                    r2.x + r2.y + r2.z\n\
                  }";
    let (result, _) = run(source, "main", serde_json::json!(null));
    assert_eq!(result.unwrap(), Value::Int(24));
}

#[test]
fn entry_decodes_record_arguments() {
    let source = "module demo\n\
                  export func greet(p: {name: string}) -> string { \"hi \" ++ p.name }";
    let (result, _) = run(source, "greet", serde_json::json!({"name": "ada"}));
    assert_eq!(result.unwrap(), Value::str("hi ada"));
}

// === Pattern matching ===

#[test]
fn adt_matching_with_guards() {
    let source = "module demo\n\
                  type Shape = Circle(int) | Square(int)\n\
                  export func area(s: Shape) -> int {\n\
                    match s { Circle(r) if r > 0 => 3 * r * r, Circle(_) => 0, Square(w) => w * w }\n\
                  }\n\
                  export func main() -> int { area(Square(5)) }";
    let (result, _) = run(source, "main", serde_json::json!(null));
    assert_eq!(result.unwrap(), Value::Int(25));
}

#[test]
fn list_patterns_with_rest() {
    let source = "module demo\n\
                  export func sum(xs: [int]) -> int {\n\
                    match xs { [] => 0, [head, ...tail] => head + sum(tail) }\n\
                  }";
    let (result, _) = run(source, "sum", serde_json::json!([1, 2, 3, 4]));
    assert_eq!(result.unwrap(), Value::Int(10));
}

#[test]
fn runtime_match_failure_is_rt_match() {
    let source = "module demo\n\
                  export func pick(n: int) -> int { match n { 1 => 10, 2 => 20 } }";
    let (result, _) = run(source, "pick", serde_json::json!(3));
    assert_eq!(result.unwrap_err().code, ErrorCode::RtNonExhaustiveMatch);
}

#[test]
fn decision_tree_mode_is_observationally_equivalent() {
    let source = "module demo\n\
                  export func classify(n: int) -> string {\n\
                    match n {\n\
                      0 => \"zero\",\n\
                      x if x < 0 => \"negative\",\n\
                      1 => \"one\",\n\
                      _ => \"many\"\n\
                    }\n\
                  }";
    for n in [-5, 0, 1, 2, 7] {
        let (linear, _) = run_with(source, "classify", serde_json::json!(n), &[], None, MatchMode::Linear);
        let (tree, _) = run_with(source, "classify", serde_json::json!(n), &[], None, MatchMode::DecisionTree);
        assert_eq!(linear.unwrap(), tree.unwrap(), "diverged at {n}");
    }
}

#[test]
fn decision_tree_agrees_with_linear_on_float_zero_sign_and_nan() {
    // `==` on floats treats 0.0 and -0.0 as equal and NaN as unequal to
    // everything (itself included); the tree dispatcher must not regroup
    // either case by raw bit pattern.
    let source = "module demo\n\
                  export func zeroes() -> string {\n\
                    match -0.0 { 0.0 => \"zero\", _ => \"other\" }\n\
                  }\n\
                  export func nans() -> string {\n\
                    match 0.0 / 0.0 { 0.0 => \"zero\", 1.0 => \"one\", _ => \"unmatched\" }\n\
                  }";
    for entry in ["zeroes", "nans"] {
        let (linear, _) = run_with(source, entry, serde_json::json!(null), &[], None, MatchMode::Linear);
        let (tree, _) = run_with(source, entry, serde_json::json!(null), &[], None, MatchMode::DecisionTree);
        assert_eq!(linear.unwrap(), tree.unwrap(), "diverged at {entry}");
    }
    let (tree_zero, _) = run_with(source, "zeroes", serde_json::json!(null), &[], None, MatchMode::DecisionTree);
    assert_eq!(tree_zero.unwrap(), Value::str("zero"));
    let (tree_nan, _) = run_with(source, "nans", serde_json::json!(null), &[], None, MatchMode::DecisionTree);
    assert_eq!(tree_nan.unwrap(), Value::str("unmatched"));
}

// === Capabilities and effects ===

#[test]
fn capability_denied_prints_nothing() {
    let source = "module demo\n\
                  import std/io (println)\n\
                  export func main() -> () ! {IO} { println(\"hi\") }";
    let (result, output) = run(source, "main", serde_json::json!(null));
    let err = result.unwrap_err();
    assert_eq!(err.code, ErrorCode::CapMissing);
    assert_eq!(output, "", "denied effects must not reach stdout");
}

#[test]
fn granted_io_reaches_the_writer() {
    let source = "module demo\n\
                  import std/io (println, print)\n\
                  export func main() -> () ! {IO} { { print(\"a\"); println(\"b\") } }";
    let (result, output) = run_with(source, "main", serde_json::json!(null), &[Effect::IO], None, MatchMode::Linear);
    assert_eq!(result.unwrap(), Value::Unit);
    assert_eq!(output, "ab\n");
}

#[test]
fn pure_function_cannot_hide_effects() {
    let source = "module demo\n\
                  import std/io (println)\n\
                  export func main() -> () { println(\"hi\") }";
    let (result, _) = run(source, "main", serde_json::json!(null));
    assert_eq!(result.unwrap_err().code, ErrorCode::TcUndeclaredEffect);
}

#[test]
fn effectful_recursive_functions_type_check_and_run() {
    let source = "module demo\n\
                  import std/io (println)\n\
                  export func countdown(n: int) -> () ! {IO} {\n\
                    if n == 0 then () else { println(showInt(n)); countdown(n - 1) }\n\
                  }";
    let (result, output) = run_with(
        source,
        "countdown",
        serde_json::json!(3),
        &[Effect::IO],
        None,
        MatchMode::Linear,
    );
    assert_eq!(result.unwrap(), Value::Unit);
    assert_eq!(output, "3\n2\n1\n");
}

#[test]
fn effects_inside_block_statements_are_still_tracked() {
    // Block statements desugar to `let _ = ...` chains; the sequenced
    // effects must still reach the enclosing function's row check.
    let source = "module demo\n\
                  import std/io (println)\n\
                  export func main() -> int { { println(\"hi\"); 1 } }";
    let (result, _) = run(source, "main", serde_json::json!(null));
    assert_eq!(result.unwrap_err().code, ErrorCode::TcUndeclaredEffect);
}

#[test]
fn virtual_clock_makes_sleep_instant_and_deterministic() {
    let source = "module demo\n\
                  import std/clock (now, sleep)\n\
                  export func main() -> int ! {Clock} {\n\
                    let t0 = now() in { sleep(250); now() - t0 }\n\
                  }";
    let started = std::time::Instant::now();
    let (result, _) = run_with(source, "main", serde_json::json!(null), &[Effect::Clock], Some(1), MatchMode::Linear);
    assert_eq!(result.unwrap(), Value::Int(250));
    assert!(started.elapsed() < std::time::Duration::from_secs(1));
}

#[test]
fn seeded_rand_is_reproducible_across_runs() {
    let source = "module demo\n\
                  import std/rand (randInt)\n\
                  export func main() -> int ! {Rand} { randInt(0, 1000000) }";
    let (first, _) = run_with(source, "main", serde_json::json!(null), &[Effect::Rand], Some(99), MatchMode::Linear);
    let (second, _) = run_with(source, "main", serde_json::json!(null), &[Effect::Rand], Some(99), MatchMode::Linear);
    assert_eq!(first.unwrap(), second.unwrap());
}

// === Modules ===

#[test]
fn exports_round_trip_and_private_names_stay_hidden() {
    let source = "module demo\n\
                  func hidden() -> int { 1 }\n\
                  export func visible() -> int { hidden() + 1 }";
    let runtime = Runtime::from_source(source, "demo", LoaderConfig::default()).unwrap();
    let eff = EffContext::new(BTreeSet::new(), None);
    let mut writer = CollectStringPrint::new();
    let mut tracer = NoopTracer;
    runtime
        .evaluate_all(&eff, &mut writer, &mut tracer, MatchMode::Linear)
        .unwrap();
    assert!(runtime.get_export("demo", "visible").is_some());
    assert!(runtime.get_export("demo", "hidden").is_none());
    assert!(runtime.get_export("demo", "nonexistent").is_none());
}

#[test]
fn entry_with_more_than_one_parameter_is_rejected() {
    let source = "module demo\n\
                  export func add(a: int, b: int) -> int { a + b }";
    let (result, _) = run(source, "add", serde_json::json!(1));
    assert_eq!(result.unwrap_err().code, ErrorCode::RtBadEntry);
}

#[test]
fn missing_entry_is_reported() {
    let source = "module demo\nexport func main() -> int { 1 }";
    let (result, _) = run(source, "nope", serde_json::json!(null));
    assert_eq!(result.unwrap_err().code, ErrorCode::RtBadEntry);
}

#[test]
fn argument_decode_mismatch_has_structured_data() {
    let source = "module demo\nexport func main(n: int) -> int { n }";
    let (result, _) = run(source, "main", serde_json::json!("five"));
    let err = result.unwrap_err();
    assert_eq!(err.code, ErrorCode::RtBadArgument);
    assert!(err.data.contains_key("expected"));
    assert!(err.data.contains_key("got"));
    assert!(err.data.contains_key("reason"));
}

#[test]
fn script_files_run_their_trailing_expression() {
    let (result, _) = run("1 + 2 * 3", "main", serde_json::json!(null));
    assert_eq!(result.unwrap(), Value::Int(7));
}

#[test]
fn prelude_helpers_are_available_without_imports() {
    let source = "module demo\n\
                  export func main() -> int { withDefault(Some(41), 0) + length([1]) }";
    let (result, _) = run(source, "main", serde_json::json!(null));
    assert_eq!(result.unwrap(), Value::Int(42));
}

#[test]
fn tagged_values_print_like_constructors() {
    let source = "module demo\n\
                  export func main() -> Option[int] { Some(5) }";
    let (result, _) = run(source, "main", serde_json::json!(null));
    assert_eq!(result.unwrap().to_string(), "Some(5)");
}

#[test]
fn division_by_zero_is_a_runtime_diagnostic() {
    let source = "module demo\nexport func main(n: int) -> int { 10 / n }";
    let (result, _) = run(source, "main", serde_json::json!(0));
    assert_eq!(result.unwrap_err().code, ErrorCode::RtDivisionByZero);
}

#[test]
fn modulo_on_floats_is_rejected_at_type_checking() {
    let source = "module demo\nexport func main() -> float { 5.0 % 2.0 }";
    let (result, _) = run(source, "main", serde_json::json!(null));
    assert_eq!(result.unwrap_err().code, ErrorCode::TcNoInstance);
}
