//! Net effect policy tests that perform no actual network I/O: every
//! scenario here is rejected by validation before a socket would open.

use std::collections::BTreeSet;

use ailang::{
    CollectStringPrint, DiagResult, Effect, EffContext, ErrorCode, LoaderConfig, MatchMode, NoopTracer, Runtime,
    Value,
};
use pretty_assertions::assert_eq;

fn run_net(source: &str, caps: &[Effect], seed: Option<u64>) -> DiagResult<Value> {
    let runtime = Runtime::from_source(source, "demo", LoaderConfig::default())?;
    let eff = EffContext::new(caps.iter().copied().collect::<BTreeSet<_>>(), seed);
    let mut writer = CollectStringPrint::new();
    let mut tracer = NoopTracer;
    runtime.call_entrypoint(
        "main",
        &serde_json::Value::Null,
        &eff,
        &mut writer,
        &mut tracer,
        MatchMode::Linear,
    )
}

#[test]
fn localhost_is_err_disallowed_host_with_no_socket() {
    let source = "module demo\n\
                  import std/net (httpGet, NetError)\n\
                  export func main() -> string ! {Net} {\n\
                    match httpGet(\"http://localhost:8080/x\") {\n\
                      Err(DisallowedHost(_)) => \"blocked\",\n\
                      Err(_) => \"other error\",\n\
                      Ok(_) => \"unexpectedly ok\"\n\
                    }\n\
                  }";
    let value = run_net(source, &[Effect::Net], None).unwrap();
    assert_eq!(value, Value::str("blocked"));
}

#[test]
fn private_address_is_err_disallowed_host() {
    let source = "module demo\n\
                  import std/net (httpGet, NetError)\n\
                  export func main() -> string ! {Net} {\n\
                    match httpGet(\"https://10.0.0.1/secrets\") {\n\
                      Err(DisallowedHost(msg)) => msg,\n\
                      Err(_) => \"other error\",\n\
                      Ok(_) => \"unexpectedly ok\"\n\
                    }\n\
                  }";
    let value = run_net(source, &[Effect::Net], None).unwrap();
    let Value::Str(message) = value else {
        panic!("expected a string");
    };
    assert!(message.contains("10.0.0.1"), "{message}");
}

#[test]
fn net_without_capability_is_cap_001() {
    let source = "module demo\n\
                  import std/net (httpGet)\n\
                  export func main() -> bool ! {Net} { isOk(httpGet(\"https://example.com/\")) }";
    let err = run_net(source, &[], None).unwrap_err();
    assert_eq!(err.code, ErrorCode::CapMissing);
}

#[test]
fn deterministic_mode_disables_the_network() {
    let source = "module demo\n\
                  import std/net (httpGet, NetError)\n\
                  export func main() -> string ! {Net} {\n\
                    match httpGet(\"https://example.com/\") {\n\
                      Err(Transport(msg)) => msg,\n\
                      Err(_) => \"other error\",\n\
                      Ok(_) => \"unexpectedly ok\"\n\
                    }\n\
                  }";
    let value = run_net(source, &[Effect::Net], Some(7)).unwrap();
    let Value::Str(message) = value else {
        panic!("expected a string");
    };
    assert!(message.contains("deterministic"), "{message}");
}

#[test]
fn unsupported_scheme_is_err_transport() {
    let source = "module demo\n\
                  import std/net (httpGet, NetError)\n\
                  export func main() -> string ! {Net} {\n\
                    match httpGet(\"ftp://example.com/\") {\n\
                      Err(Transport(_)) => \"transport\",\n\
                      Err(_) => \"other error\",\n\
                      Ok(_) => \"unexpectedly ok\"\n\
                    }\n\
                  }";
    let value = run_net(source, &[Effect::Net], None).unwrap();
    assert_eq!(value, Value::str("transport"));
}

#[test]
fn forbidden_request_headers_are_err_invalid_header() {
    let source = "module demo\n\
                  import std/net (httpRequest, NetError)\n\
                  export func main() -> string ! {Net} {\n\
                    match httpRequest(\"GET\", \"https://93.184.216.34/\", [(\"Host\", \"evil\")], \"\") {\n\
                      Err(InvalidHeader(_)) => \"invalid header\",\n\
                      Err(_) => \"other error\",\n\
                      Ok(_) => \"unexpectedly ok\"\n\
                    }\n\
                  }";
    let value = run_net(source, &[Effect::Net], None).unwrap();
    assert_eq!(value, Value::str("invalid header"));
}
