//! The embedded standard library.
//!
//! `std/*` modules ship inside the binary; setting `AILANG_STDLIB_PATH`
//! makes the loader read them from disk instead (same module paths,
//! `.ail` files under the given directory).

/// Source of an embedded `std/*` module, if it exists.
#[must_use]
pub fn embedded_source(path: &str) -> Option<&'static str> {
    match path {
        "std/prelude" => Some(PRELUDE),
        "std/io" => Some(IO),
        "std/fs" => Some(FS),
        "std/clock" => Some(CLOCK),
        "std/net" => Some(NET),
        "std/rand" => Some(RAND),
        _ => None,
    }
}

/// Names of all embedded modules, for loader diagnostics.
#[must_use]
pub fn embedded_names() -> &'static [&'static str] {
    &["std/prelude", "std/io", "std/fs", "std/clock", "std/net", "std/rand"]
}

const PRELUDE: &str = r"
module std/prelude

export type Option[a] = None | Some(a)
export type Result[a, e] = Ok(a) | Err(e)

export func identity[T](x: T) -> T { x }

export func showInt(n: int) -> string { show_Int(n) }
export func showFloat(x: float) -> string { show_Float(x) }
export func showBool(b: bool) -> string { show_Bool(b) }

export func length[T](xs: [T]) -> int { _list_length(xs) }

export func isSome[T](o: Option[T]) -> bool {
  match o { Some(_) => true, None => false }
}

export func isNone[T](o: Option[T]) -> bool {
  match o { Some(_) => false, None => true }
}

export func withDefault[T](o: Option[T], fallback: T) -> T {
  match o { Some(x) => x, None => fallback }
}

export func isOk[T, E](r: Result[T, E]) -> bool {
  match r { Ok(_) => true, Err(_) => false }
}
";

const IO: &str = r"
module std/io

export func print(s: string) -> () ! {IO} { _io_print(s) }
export func println(s: string) -> () ! {IO} { _io_println(s) }
export func readLine() -> string ! {IO} { _io_readLine() }
";

const FS: &str = r"
module std/fs

export func readFile(path: string) -> string ! {FS} { _fs_readFile(path) }
export func writeFile(path: string, content: string) -> () ! {FS} { _fs_writeFile(path, content) }
export func exists(path: string) -> bool ! {FS} { _fs_exists(path) }
";

const CLOCK: &str = r"
module std/clock

export func now() -> int ! {Clock} { _clock_now() }
export func sleep(ms: int) -> () ! {Clock} { _clock_sleep(ms) }
";

const NET: &str = r"
module std/net

import std/prelude (Result)

export type NetError = Transport(string) | DisallowedHost(string) | InvalidHeader(string) | BodyTooLarge(string)
export type HttpResponse = { status: int, body: string, headers: [(string, string)] }

export func httpGet(url: string) -> Result[HttpResponse, NetError] ! {Net} {
  _net_httpGet(url)
}

export func httpPost(url: string, body: string) -> Result[HttpResponse, NetError] ! {Net} {
  _net_httpPost(url, body)
}

export func httpRequest(method: string, url: string, headers: [(string, string)], body: string) -> Result[HttpResponse, NetError] ! {Net} {
  _net_httpRequest(method, url, headers, body)
}
";

const RAND: &str = r"
module std/rand

export func randInt(lo: int, hi: int) -> int ! {Rand} { _rand_int(lo, hi) }
export func randFloat() -> float ! {Rand} { _rand_float() }
";
