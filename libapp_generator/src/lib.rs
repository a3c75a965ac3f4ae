//! Generate rust code from libapp interface files
//!
//! An interface file such as `Calculator.interface`:
//!
//! ```ini
//! service=Calculator
//!
//! [constants]
//! MAX_OPERAND=1000
//!
//! [call::add]
//! ret=INT32
//! arg1=INT32,a
//! arg2=INT32,b
//! ```
//!
//! becomes, for the server side, a `CalculatorCalls` trait with one method
//! per call and a `register_calculator` function, which installs the
//! trampolines `libapp` resolves as `Calculator_add` into a
//! `libapp::Symbols` table:
//!
//! ```rust,ignore
//! include!(concat!(env!("OUT_DIR"), "/Calculator.rs"));
//!
//! struct MyCalculator;
//!
//! impl CalculatorCalls for MyCalculator {
//!     fn add(&self, _ctx: &libapp::CallContext<'_>, a: i32, b: i32) -> libapp::Result<i32> {
//!         Ok(a + b)
//!     }
//! }
//!
//! let mut symbols = libapp::Symbols::new();
//! register_calculator(&mut symbols, MyCalculator);
//! ```
//!
//! Use [`cargo_build`] from a `build.rs`, or the `appbroker` binary.

use std::env;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::exit;

use libapp_parser::{Config, Section};
use proc_macro2::{Ident, Literal, TokenStream};
use quote::{format_ident, quote};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Parse(libapp_parser::Error),
    #[error("I/O error: {0}")]
    Io(std::io::Error),
    #[error("{0}")]
    Schema(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Maximum number of declared arguments per method.
const MAX_ARGUMENTS: usize = 4;

const CONSTANTS_SECTION: &str = "constants";

/// Which side of the interface to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// The calls a server executes
    Server,
    /// The callbacks a client executes
    Client,
}

impl Mode {
    fn section_prefix(self) -> &'static str {
        match self {
            Mode::Server => "call::",
            Mode::Client => "callback::",
        }
    }

    fn trait_suffix(self) -> &'static str {
        match self {
            Mode::Server => "Calls",
            Mode::Client => "Callbacks",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    In,
    Out,
    InOut,
}

struct Param {
    name: Ident,
    vtype: TokenStream,
    direction: Direction,
}

struct Method {
    name: String,
    ret: TokenStream,
    params: Vec<Param>,
}

fn rust_type(t: &str) -> Option<TokenStream> {
    let ts = match t {
        "BOOL" => quote!(bool),
        "INT8" => quote!(i8),
        "UINT8" => quote!(u8),
        "INT16" => quote!(i16),
        "UINT16" => quote!(u16),
        "INT32" => quote!(i32),
        "UINT32" => quote!(u32),
        "INT64" => quote!(i64),
        "UINT64" => quote!(u64),
        "FLOAT" => quote!(f32),
        "DOUBLE" => quote!(f64),
        "STRING" => quote!(String),
        "BUFFER" => quote!(Vec<u8>),
        _ => return None,
    };
    Some(ts)
}

const KEYWORDS: &[&str] = &[
    "as", "async", "await", "break", "const", "continue", "crate", "dyn", "else", "enum",
    "extern", "false", "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move",
    "mut", "pub", "ref", "return", "self", "Self", "static", "struct", "super", "trait", "true",
    "type", "unsafe", "use", "where", "while",
];

/// Names the generated trampolines use for themselves.
const RESERVED: &[&str] = &["ctx", "args", "ret", "implementation", "symbols"];

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    s != "_" && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && !KEYWORDS.contains(&s)
}

fn identifier(s: &str, what: &str) -> Result<Ident> {
    if is_identifier(s) {
        Ok(format_ident!("{}", s))
    } else {
        Err(Error::Schema(format!("'{}' is not a valid {} name", s, what)))
    }
}

fn to_snake_case(s: &str) -> String {
    let mut words = vec![];
    for part in s.split('_') {
        let mut last_upper = false;
        let mut buf = String::new();
        if part.is_empty() {
            continue;
        }
        for ch in part.chars() {
            if !buf.is_empty() && ch.is_uppercase() && !last_upper {
                words.push(buf);
                buf = String::new();
            }
            last_upper = ch.is_uppercase();
            buf.extend(ch.to_lowercase());
        }
        words.push(buf);
    }
    words.join("_")
}

fn parse_param(method: &str, index: usize, token: &str) -> Result<Param> {
    let mut parts = token.splitn(2, ',');
    let type_token = parts.next().unwrap_or("").trim();
    let name = match parts.next().map(str::trim) {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => format!("arg{}", index),
    };

    let (t, direction) = if let Some(t) = type_token.strip_suffix("_IN_OUT") {
        (t, Direction::InOut)
    } else if let Some(t) = type_token.strip_suffix("_OUT") {
        (t, Direction::Out)
    } else if let Some(t) = type_token.strip_suffix("_IN") {
        (t, Direction::In)
    } else {
        (type_token, Direction::In)
    };

    let vtype = rust_type(t).ok_or_else(|| {
        Error::Schema(format!(
            "{}: '{}' is not a valid argument type",
            method, type_token
        ))
    })?;
    if RESERVED.contains(&name.as_str()) {
        return Err(Error::Schema(format!(
            "{}: argument name '{}' is reserved",
            method, name
        )));
    }
    Ok(Param {
        name: identifier(&name, "argument")?,
        vtype,
        direction,
    })
}

impl Method {
    fn from_section(name: &str, section: &Section) -> Result<Self> {
        identifier(name, "method")?;
        let ret = match section.get("ret").map(|r| r.split(',').next().unwrap_or("").trim()) {
            None | Some("VOID") => quote!(()),
            Some(t) => rust_type(t).ok_or_else(|| {
                Error::Schema(format!("{}: '{}' is not a valid return type", name, t))
            })?,
        };

        let mut params = Vec::new();
        for i in 1..=MAX_ARGUMENTS {
            match section.get(&format!("arg{}", i)) {
                Some(token) => params.push(parse_param(name, i, token)?),
                None => break,
            }
        }

        Ok(Method {
            name: name.to_string(),
            ret,
            params,
        })
    }

    fn signature(&self) -> TokenStream {
        let mname = format_ident!("{}", self.name);
        let ret = &self.ret;
        let params = self.params.iter().map(|p| {
            let (name, vtype) = (&p.name, &p.vtype);
            match p.direction {
                Direction::In => quote!(#name: #vtype),
                Direction::Out | Direction::InOut => quote!(#name: &mut #vtype),
            }
        });
        quote!(
            fn #mname(&self, ctx: &libapp::CallContext<'_> #(, #params)*) -> libapp::Result<#ret>;
        )
    }

    fn trampoline(&self, service: &str) -> TokenStream {
        let mname = format_ident!("{}", self.name);
        let symbol = format!("{}_{}", service, self.name);

        let mut load = TokenStream::new();
        let mut store = TokenStream::new();
        let mut pass = Vec::new();
        for (i, p) in self.params.iter().enumerate() {
            let (name, vtype) = (&p.name, &p.vtype);
            let index = Literal::usize_unsuffixed(i);
            match p.direction {
                Direction::In => {
                    load.extend(quote!(
                        let #name: #vtype = std::convert::TryFrom::try_from(&args[#index])?;
                    ));
                    pass.push(quote!(#name));
                }
                Direction::Out | Direction::InOut => {
                    load.extend(quote!(
                        let mut #name: #vtype = std::convert::TryFrom::try_from(&args[#index])?;
                    ));
                    store.extend(quote!(
                        args[#index] = libapp::Variant::from(#name);
                    ));
                    pass.push(quote!(&mut #name));
                }
            }
        }
        let args = if self.params.is_empty() {
            format_ident!("_args")
        } else {
            format_ident!("args")
        };

        quote!(
            {
                let implementation = implementation.clone();
                symbols.register(#symbol, move |ctx, #args| {
                    #load
                    let ret = implementation.#mname(ctx #(, #pass)*)?;
                    #store
                    Ok(libapp::Variant::from(ret))
                });
            }
        )
    }
}

fn constants(config: &Config) -> Result<TokenStream> {
    let mut ts = TokenStream::new();
    let section = match config.section(CONSTANTS_SECTION) {
        Some(s) => s,
        None => return Ok(ts),
    };
    for (name, value) in section.iter() {
        let ident = identifier(name, "constant")?;
        if let Ok(v) = value.parse::<i64>() {
            let v = Literal::i64_unsuffixed(v);
            ts.extend(quote!(pub const #ident: i64 = #v;));
        } else if let Some(v) = value.parse::<f64>().ok().filter(|v| v.is_finite()) {
            let v = Literal::f64_unsuffixed(v);
            ts.extend(quote!(pub const #ident: f64 = #v;));
        } else {
            ts.extend(quote!(pub const #ident: &str = #value;));
        }
    }
    Ok(ts)
}

/// Generate the code for one side of an interface.
///
/// The service name is `name`, or else the top-level `service` key.
pub fn compile(config: &Config, mode: Mode, name: Option<&str>) -> Result<TokenStream> {
    let service = name
        .or_else(|| config.get("", "service"))
        .ok_or_else(|| Error::Schema("no service name given".into()))?;
    identifier(service, "service")?;

    let methods = config
        .sections_with_prefix(mode.section_prefix())
        .map(|(name, section)| Method::from_section(name, section))
        .collect::<Result<Vec<_>>>()?;

    let trait_name = format_ident!("{}{}", service, mode.trait_suffix());
    let register = format_ident!("register_{}", to_snake_case(service));
    let signatures = methods.iter().map(Method::signature);
    let trampolines = methods.iter().map(|m| m.trampoline(service));
    let implementation = if methods.is_empty() {
        format_ident!("_implementation")
    } else {
        format_ident!("implementation")
    };

    let mut ts = constants(config)?;
    ts.extend(quote!(
        pub trait #trait_name: Send + Sync + 'static {
            #(#signatures)*
        }

        pub fn #register<T: #trait_name>(
            symbols: &mut libapp::Symbols,
            implementation: T,
        ) -> &mut libapp::Symbols {
            let #implementation = std::sync::Arc::new(implementation);
            #(#trampolines)*
            symbols
        }
    ));
    Ok(ts)
}

/// `generate` reads an interface file from `reader` and writes the rust
/// code to `writer`.
pub fn generate(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    mode: Mode,
    name: Option<&str>,
) -> Result<()> {
    let mut buffer = String::new();
    reader.read_to_string(&mut buffer).map_err(Error::Io)?;

    let config = Config::from_string(&buffer).map_err(Error::Parse)?;
    let ts = compile(&config, mode, name)?;

    writer
        .write_all(b"// This file is generated by appbroker. Do not edit.\n")
        .and_then(|_| writer.write_all(ts.to_string().as_bytes()))
        .and_then(|_| writer.write_all(b"\n"))
        .map_err(Error::Io)
}

/// cargo build helper function
///
/// `cargo_build` is used in a `build.rs` program to generate the rust code
/// for an interface file into `OUT_DIR`, named after the file with an `.rs`
/// extension.
///
/// Errors are emitted to stderr and terminate the process.
///
/// ```rust,no_run
/// fn main() {
///     libapp_generator::cargo_build("src/Calculator.interface", libapp_generator::Mode::Server);
/// }
/// ```
pub fn cargo_build<T: AsRef<Path> + ?Sized>(input_path: &T, mode: Mode) {
    let input_path = input_path.as_ref();

    let out_dir: PathBuf = match env::var_os("OUT_DIR") {
        Some(d) => d.into(),
        None => {
            eprintln!("OUT_DIR is not set; cargo_build must run from build.rs");
            exit(1);
        }
    };
    let rust_path = match input_path.file_name() {
        Some(f) => out_dir.join(f).with_extension("rs"),
        None => {
            eprintln!("Not an interface file: `{}`", input_path.display());
            exit(1);
        }
    };

    let writer: &mut dyn Write = &mut (File::create(&rust_path).unwrap_or_else(|e| {
        eprintln!(
            "Could not open output file `{}`: {}",
            rust_path.display(),
            e
        );
        exit(1);
    }));

    let reader: &mut dyn Read = &mut (File::open(input_path).unwrap_or_else(|e| {
        eprintln!(
            "Could not read interface file `{}`: {}",
            input_path.display(),
            e
        );
        exit(1);
    }));

    if let Err(e) = generate(reader, writer, mode, None) {
        eprintln!(
            "Could not generate rust code from interface file `{}`: {}",
            input_path.display(),
            e,
        );
        exit(1);
    }

    println!("cargo:rerun-if-changed={}", input_path.display());
}
