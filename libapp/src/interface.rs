//! Interface schemas and call dispatch.
//!
//! An interface file declares the calls a server executes and the callbacks
//! a client executes:
//!
//! ```ini
//! service=Calculator
//!
//! [call::add]
//! ret=INT32
//! arg1=INT32,a
//! arg2=INT32,b
//! deny=attacker
//!
//! [callback::progress]
//! arg1=UINT32
//! ```
//!
//! Arguments are `TYPE`, `TYPE_IN`, `TYPE_OUT` or `TYPE_IN_OUT`, optionally
//! followed by `,name`. Every method of the local table (calls for a
//! server, callbacks for a client) must resolve to a native function named
//! `<app>_<method>` when the interface is loaded.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use libapp_parser::{Config, Section};

use crate::error::*;
use crate::message::{CallArgument, Direction};
use crate::status::AppStatus;
use crate::transport::{ClientId, TransportMode};
use crate::variant::{Variant, VariantType};

/// Maximum number of declared arguments per method.
pub const MAX_ARGUMENTS: usize = 4;

pub const CALL_PREFIX: &str = "call::";
pub const CALLBACK_PREFIX: &str = "callback::";

/// Who is asking for a call to be executed.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    pub app: &'a str,
    pub mode: TransportMode,
    pub client: Option<ClientId>,
    /// Display name of the calling peer, if known
    pub peer: Option<&'a str>,
}

/// A native implementation of a declared method.
///
/// `args` holds one value per declared parameter, already converted to the
/// declared types. OUT and IN_OUT values are written back in place.
pub type NativeFn =
    Arc<dyn Fn(&CallContext<'_>, &mut [Variant]) -> Result<Variant> + Send + Sync + 'static>;

/// Resolves `<app>_<method>` symbol names to native functions.
pub trait SymbolResolver {
    fn resolve(&self, symbol: &str) -> Option<NativeFn>;
}

/// A table of native functions, filled in by hand or by code generated with
/// `appbroker`.
#[derive(Clone, Default)]
pub struct Symbols {
    table: HashMap<String, NativeFn>,
}

impl Symbols {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S, F>(&mut self, symbol: S, f: F) -> &mut Self
    where
        S: Into<String>,
        F: Fn(&CallContext<'_>, &mut [Variant]) -> Result<Variant> + Send + Sync + 'static,
    {
        self.table.insert(symbol.into(), Arc::new(f));
        self
    }

    pub fn with<S, F>(mut self, symbol: S, f: F) -> Self
    where
        S: Into<String>,
        F: Fn(&CallContext<'_>, &mut [Variant]) -> Result<Variant> + Send + Sync + 'static,
    {
        self.register(symbol, f);
        self
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.table.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl SymbolResolver for Symbols {
    fn resolve(&self, symbol: &str) -> Option<NativeFn> {
        self.table.get(symbol).cloned()
    }
}

impl fmt::Debug for Symbols {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut names: Vec<_> = self.table.keys().collect();
        names.sort();
        f.debug_set().entries(names).finish()
    }
}

/// Resolves nothing. Used where only the shape of an interface matters.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSymbols;

impl SymbolResolver for NoSymbols {
    fn resolve(&self, _symbol: &str) -> Option<NativeFn> {
        None
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub vtype: VariantType,
    pub direction: Direction,
    /// Documentation only
    pub name: Option<String>,
}

impl FromStr for Parameter {
    type Err = Error;

    fn from_str(token: &str) -> Result<Self> {
        let (type_token, name) = match token.split_once(',') {
            Some((type_token, name)) => (type_token.trim(), Some(name.trim().to_string())),
            None => (token.trim(), None),
        };
        let name = name.filter(|n| !n.is_empty());

        let (vtype, direction) = if let Some(t) = type_token.strip_suffix("_IN_OUT") {
            (t, Direction::InOut)
        } else if let Some(t) = type_token.strip_suffix("_OUT") {
            (t, Direction::Out)
        } else if let Some(t) = type_token.strip_suffix("_IN") {
            (t, Direction::In)
        } else {
            (type_token, Direction::In)
        };

        let vtype = VariantType::from_str(vtype)?;
        if matches!(vtype, VariantType::Void | VariantType::Pointer) {
            return Err(ErrorKind::SchemaLoadError(format!(
                "'{}' is not a valid argument type",
                token
            ))
            .into());
        }
        Ok(Parameter {
            vtype,
            direction,
            name,
        })
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.vtype.name())?;
        match self.direction {
            Direction::In => {}
            Direction::Out => f.write_str("_OUT")?,
            Direction::InOut => f.write_str("_IN_OUT")?,
        }
        if let Some(ref name) = self.name {
            write!(f, ",{}", name)?;
        }
        Ok(())
    }
}

fn parse_return(token: Option<&str>) -> Result<VariantType> {
    match token {
        None => Ok(VariantType::Void),
        Some(t) => {
            let t = t.split(',').next().unwrap_or("").trim();
            let vtype = VariantType::from_str(t)?;
            if vtype == VariantType::Pointer {
                return Err(
                    ErrorKind::SchemaLoadError(format!("'{}' is not a valid return type", t))
                        .into(),
                );
            }
            Ok(vtype)
        }
    }
}

fn parse_list(value: Option<&str>) -> Option<Vec<String>> {
    value.map(|v| {
        v.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
}

/// Matches `name` against a pattern where `*` stands for any run of
/// characters and `?` for one character.
fn glob_match(pattern: &str, name: &str) -> bool {
    fn matches(p: &[char], n: &[char]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some('*'), _) => matches(&p[1..], n) || (!n.is_empty() && matches(p, &n[1..])),
            (Some('?'), Some(_)) => matches(&p[1..], &n[1..]),
            (Some(a), Some(b)) if a == b => matches(&p[1..], &n[1..]),
            _ => false,
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    matches(&p, &n)
}

/// One entry of a call or callback table.
#[derive(Clone)]
pub struct Method {
    pub name: String,
    pub ret: VariantType,
    pub params: Vec<Parameter>,
    allow: Option<Vec<String>>,
    deny: Option<Vec<String>>,
    handler: Option<NativeFn>,
}

impl Method {
    fn from_section(name: &str, section: &Section) -> Result<Self> {
        let ret = parse_return(section.get("ret")).map_err(|e| in_method(name, e))?;

        let mut params = Vec::new();
        for i in 1..=MAX_ARGUMENTS {
            let token = match section.get(&format!("arg{}", i)) {
                Some(t) => t,
                None => break,
            };
            params.push(Parameter::from_str(token).map_err(|e| in_method(name, e))?);
        }
        let ignored = format!("arg{}", MAX_ARGUMENTS + 1);
        if section.contains_key(&ignored) {
            log::warn!(
                "{}: only {} arguments are supported, ignoring {} and later",
                name,
                MAX_ARGUMENTS,
                ignored
            );
        }

        Ok(Method {
            name: name.to_string(),
            ret,
            params,
            allow: parse_list(section.get("allow")),
            deny: parse_list(section.get("deny")),
            handler: None,
        })
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Whether the native function was resolved.
    pub fn is_resolved(&self) -> bool {
        self.handler.is_some()
    }

    /// Apply the allow/deny lists to a peer name.
    ///
    /// Without lists every peer is permitted. A deny list permits every peer
    /// it does not match, and takes precedence over an allow list. An allow
    /// list alone permits only the peers it matches.
    pub fn permits(&self, peer: &str) -> bool {
        match (&self.allow, &self.deny) {
            (None, None) => true,
            (_, Some(deny)) => !deny.iter().any(|p| glob_match(p, peer)),
            (Some(allow), None) => allow.iter().any(|p| glob_match(p, peer)),
        }
    }

    /// Signature in interface file notation.
    pub fn signature(&self) -> String {
        let params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
        format!("{} {}({})", self.ret, self.name, params.join(", "))
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("ret", &self.ret)
            .field("params", &self.params)
            .field("allow", &self.allow)
            .field("deny", &self.deny)
            .field("resolved", &self.handler.is_some())
            .finish()
    }
}

fn in_method(method: &str, e: Error) -> Error {
    Error::with_source(
        ErrorKind::SchemaLoadError(format!("method '{}': {}", method, e)),
        e,
    )
}

fn parse_table(config: &Config, prefix: &str) -> Result<Vec<Method>> {
    config
        .sections_with_prefix(prefix)
        .map(|(name, section)| Method::from_section(name, section))
        .collect()
}

/// A loaded interface: the call table, the callback table and the status
/// fields of one application.
#[derive(Debug)]
pub struct Interface {
    mode: TransportMode,
    app: String,
    calls: Vec<Method>,
    callbacks: Vec<Method>,
    status: AppStatus,
}

impl Interface {
    /// Build an interface from a parsed schema.
    ///
    /// Every method of the local table must resolve through `symbols`, or
    /// the whole interface fails to load.
    pub fn new(
        mode: TransportMode,
        app: &str,
        config: &Config,
        symbols: &dyn SymbolResolver,
    ) -> Result<Self> {
        let mut interface = Self::describe(mode, app, config)?;
        for method in interface.local_mut() {
            let symbol = format!("{}_{}", app, method.name);
            match symbols.resolve(&symbol) {
                Some(f) => method.handler = Some(f),
                None => {
                    return Err(ErrorKind::SchemaLoadError(format!(
                        "{}: unresolved native function '{}'",
                        app, symbol
                    ))
                    .into())
                }
            }
        }
        log::debug!(
            "loaded interface {} ({:?}): {} calls, {} callbacks",
            app,
            mode,
            interface.calls.len(),
            interface.callbacks.len()
        );
        Ok(interface)
    }

    /// Parse a schema without resolving any native function.
    pub fn describe(mode: TransportMode, app: &str, config: &Config) -> Result<Self> {
        Ok(Interface {
            mode,
            app: app.to_string(),
            calls: parse_table(config, CALL_PREFIX)?,
            callbacks: parse_table(config, CALLBACK_PREFIX)?,
            status: AppStatus::from_config(config)?,
        })
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn calls(&self) -> &[Method] {
        &self.calls
    }

    pub fn callbacks(&self) -> &[Method] {
        &self.callbacks
    }

    pub fn status(&self) -> &AppStatus {
        &self.status
    }

    pub fn status_mut(&mut self) -> &mut AppStatus {
        &mut self.status
    }

    /// The methods this side executes.
    pub fn local(&self) -> &[Method] {
        match self.mode {
            TransportMode::Server => &self.calls,
            TransportMode::Client => &self.callbacks,
        }
    }

    fn local_mut(&mut self) -> &mut [Method] {
        match self.mode {
            TransportMode::Server => &mut self.calls,
            TransportMode::Client => &mut self.callbacks,
        }
    }

    /// The methods this side asks the other side to execute.
    pub fn remote(&self) -> &[Method] {
        match self.mode {
            TransportMode::Server => &self.callbacks,
            TransportMode::Client => &self.calls,
        }
    }

    fn find<'a>(table: &'a [Method], method: &str) -> Result<&'a Method> {
        table
            .iter()
            .find(|m| m.name == method)
            .ok_or_else(|| ErrorKind::UnknownMethod(method.to_string()).into())
    }

    pub fn local_method(&self, method: &str) -> Result<&Method> {
        Self::find(self.local(), method)
    }

    pub fn remote_method(&self, method: &str) -> Result<&Method> {
        Self::find(self.remote(), method)
    }

    /// Whether `peer` may have `method` executed here.
    ///
    /// A client executes callbacks only for the server it connected to, so
    /// the client role always permits.
    pub fn can_call(&self, method: &str, peer: &str) -> Result<bool> {
        let m = self.local_method(method)?;
        match self.mode {
            TransportMode::Server => Ok(m.permits(peer)),
            TransportMode::Client => {
                log::debug!("{}: callback '{}' from '{}' permitted", self.app, method, peer);
                Ok(true)
            }
        }
    }

    /// Execute a local method.
    ///
    /// `args` must hold one value per declared parameter. Values are
    /// converted to the declared types before the native function runs, and
    /// its result is converted to the declared return type.
    pub fn dispatch(
        &self,
        ctx: &CallContext<'_>,
        method: &str,
        args: &mut [Variant],
    ) -> Result<Variant> {
        let m = self.local_method(method)?;
        if args.len() != m.arity() {
            return Err(ErrorKind::ArityMismatch {
                method: method.to_string(),
                expected: m.arity(),
                got: args.len(),
            }
            .into());
        }
        for (arg, param) in args.iter_mut().zip(m.params.iter()) {
            if arg.variant_type() != param.vtype {
                *arg = arg.get_as(param.vtype)?;
            }
        }

        let handler = m
            .handler
            .as_ref()
            .ok_or_else(|| Error::from(ErrorKind::UnknownMethod(method.to_string())))?;
        log::debug!("{}: dispatching {}", self.app, m.signature());
        let ret = handler(ctx, args)?;

        match m.ret {
            VariantType::Void => Ok(Variant::Void),
            t => ret.get_as(t),
        }
    }

    /// Run a call received from the wire: rebuild the argument list,
    /// dispatch it and collect the output values.
    pub fn execute(
        &self,
        ctx: &CallContext<'_>,
        method: &str,
        args: Vec<CallArgument>,
    ) -> Result<(Variant, Vec<Variant>)> {
        let mut argv = self.unmarshal_call(method, args)?;
        let value = self.dispatch(ctx, method, &mut argv)?;
        let outputs = self.outputs(method, &argv)?;
        Ok((value, outputs))
    }

    /// Build the wire arguments for calling a remote method. OUT
    /// parameters are not carried.
    pub fn marshal_call(&self, method: &str, args: &[Variant]) -> Result<Vec<CallArgument>> {
        let m = self.remote_method(method)?;
        if args.len() != m.arity() {
            return Err(ErrorKind::ArityMismatch {
                method: method.to_string(),
                expected: m.arity(),
                got: args.len(),
            }
            .into());
        }
        args.iter()
            .zip(m.params.iter())
            .filter(|(_, p)| p.direction.is_input())
            .map(|(a, p)| Ok(CallArgument::new(p.direction, a.get_as(p.vtype)?)))
            .collect()
    }

    /// Rebuild the full argument list of a local method from the wire
    /// arguments. OUT parameters start out as the zero value of their type.
    pub fn unmarshal_call(&self, method: &str, args: Vec<CallArgument>) -> Result<Vec<Variant>> {
        let m = self.local_method(method)?;
        let inputs = m.params.iter().filter(|p| p.direction.is_input()).count();
        if args.len() != inputs {
            return Err(ErrorKind::ArityMismatch {
                method: method.to_string(),
                expected: inputs,
                got: args.len(),
            }
            .into());
        }

        let mut argv: Vec<Variant> = m
            .params
            .iter()
            .map(|p| Variant::default_for(p.vtype))
            .collect();
        let slots = m
            .params
            .iter()
            .enumerate()
            .filter(|(_, p)| p.direction.is_input());
        for ((i, param), arg) in slots.zip(args) {
            if arg.direction != param.direction {
                return Err(ErrorKind::MalformedEncoding(format!(
                    "{}: argument {} sent as {:?}, declared {:?}",
                    method,
                    i + 1,
                    arg.direction,
                    param.direction
                ))
                .into());
            }
            argv[i] = arg.value;
        }
        Ok(argv)
    }

    /// The OUT and IN_OUT values of a local call, in declared order.
    pub fn outputs(&self, method: &str, args: &[Variant]) -> Result<Vec<Variant>> {
        let m = self.local_method(method)?;
        Ok(args
            .iter()
            .zip(m.params.iter())
            .filter(|(_, p)| p.direction.is_output())
            .map(|(a, _)| a.clone())
            .collect())
    }

    /// Write the OUT and IN_OUT values returned by a remote call back into
    /// the caller's argument list.
    pub fn store_outputs(
        &self,
        method: &str,
        args: &mut [Variant],
        outputs: Vec<Variant>,
    ) -> Result<()> {
        let m = self.remote_method(method)?;
        let slots: Vec<usize> = m
            .params
            .iter()
            .enumerate()
            .filter(|(_, p)| p.direction.is_output())
            .map(|(i, _)| i)
            .collect();
        if slots.len() != outputs.len() {
            return Err(ErrorKind::MalformedEncoding(format!(
                "{}: expected {} output values, got {}",
                method,
                slots.len(),
                outputs.len()
            ))
            .into());
        }
        for (slot, value) in slots.into_iter().zip(outputs) {
            if let Some(arg) = args.get_mut(slot) {
                *arg = value.get_as(m.params[slot].vtype)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = "\
service=Test

[call::ping]
ret=INT32

[call::add]
ret=INT32
arg1=INT32,a
arg2=INT32,b
deny=attacker

[call::swap]
arg1=STRING_IN_OUT,text
arg2=UINT32_OUT,length

[call::private]
allow=friend, ally-*

[callback::progress]
arg1=UINT32
";

    fn symbols() -> Symbols {
        Symbols::new()
            .with("Test_ping", |_, _| Ok(Variant::Int32(42)))
            .with("Test_add", |_, args| {
                let a = i32::try_from(&args[0])?;
                let b = i32::try_from(&args[1])?;
                Ok(Variant::Int32(a + b))
            })
            .with("Test_swap", |_, args| {
                let s = String::try_from(&args[0])?;
                args[1] = Variant::UInt32(s.len() as u32);
                args[0] = Variant::String(s.chars().rev().collect());
                Ok(Variant::Void)
            })
            .with("Test_private", |ctx, _| {
                Ok(Variant::String(ctx.peer.unwrap_or("").to_string()))
            })
    }

    fn server() -> Interface {
        let config = Config::from_string(SCHEMA).unwrap();
        Interface::new(TransportMode::Server, "Test", &config, &symbols()).unwrap()
    }

    fn ctx() -> CallContext<'static> {
        CallContext {
            app: "Test",
            mode: TransportMode::Server,
            client: None,
            peer: Some("anyone"),
        }
    }

    #[test]
    fn test_parameter_tokens() {
        let p: Parameter = "STRING_IN_OUT,text".parse().unwrap();
        assert_eq!(p.vtype, VariantType::String);
        assert_eq!(p.direction, Direction::InOut);
        assert_eq!(p.name.as_deref(), Some("text"));
        assert_eq!(p.to_string(), "STRING_IN_OUT,text");

        let p: Parameter = "int8".parse().unwrap();
        assert_eq!((p.vtype, p.direction), (VariantType::Int8, Direction::In));
        let p: Parameter = "BUFFER_OUT".parse().unwrap();
        assert_eq!(p.direction, Direction::Out);
        let p: Parameter = "DOUBLE_IN".parse().unwrap();
        assert_eq!(p.direction, Direction::In);

        for bad in ["VOID", "POINTER", "INT128", "STRING_SIDEWAYS"] {
            assert!(bad.parse::<Parameter>().is_err(), "{}", bad);
        }
    }

    #[test]
    fn test_load() {
        let i = server();
        assert_eq!(i.app(), "Test");
        assert_eq!(i.calls().len(), 4);
        assert_eq!(i.callbacks().len(), 1);
        assert!(i.local().iter().all(Method::is_resolved));
        // callbacks are executed by the client, nothing to resolve here
        assert!(!i.remote()[0].is_resolved());
        assert_eq!(
            i.local_method("add").unwrap().signature(),
            "INT32 add(INT32,a, INT32,b)"
        );
    }

    #[test]
    fn test_unresolved_fails() {
        let config = Config::from_string(SCHEMA).unwrap();
        let partial = Symbols::new().with("Test_ping", |_, _| Ok(Variant::Int32(1)));
        let e = Interface::new(TransportMode::Server, "Test", &config, &partial).unwrap_err();
        assert!(matches!(e.kind(), ErrorKind::SchemaLoadError(_)));

        // the client only needs its callbacks
        let client_symbols = Symbols::new().with("Test_progress", |_, _| Ok(Variant::Void));
        assert!(Interface::new(TransportMode::Client, "Test", &config, &client_symbols).is_ok());
        assert!(Interface::new(TransportMode::Client, "Test", &config, &NoSymbols).is_err());
    }

    #[test]
    fn test_bad_types_fail() {
        for schema in [
            "[call::x]\nret=INT128\n",
            "[call::x]\narg1=VOID\n",
            "[call::x]\nret=POINTER\n",
        ] {
            let config = Config::from_string(schema).unwrap();
            let e = Interface::describe(TransportMode::Server, "T", &config).unwrap_err();
            assert!(matches!(e.kind(), ErrorKind::SchemaLoadError(_)), "{}", schema);
        }
    }

    #[test]
    fn test_argument_limit() {
        let config = Config::from_string(
            "[call::x]\narg1=INT8\narg2=INT8\narg4=INT8\n\
             [call::y]\narg1=INT8\narg2=INT8\narg3=INT8\narg4=INT8\narg5=INT8\n",
        )
        .unwrap();
        let i = Interface::describe(TransportMode::Server, "T", &config).unwrap();
        // loading stops at the first missing argument
        assert_eq!(i.local_method("x").unwrap().arity(), 2);
        assert_eq!(i.local_method("y").unwrap().arity(), MAX_ARGUMENTS);
    }

    #[test]
    fn test_dispatch() {
        let i = server();
        assert_eq!(i.dispatch(&ctx(), "ping", &mut []).unwrap(), Variant::Int32(42));

        let mut args = [Variant::Int8(2), Variant::Int32(3)];
        assert_eq!(i.dispatch(&ctx(), "add", &mut args).unwrap(), Variant::Int32(5));

        let e = i
            .dispatch(&ctx(), "ping", &mut [Variant::Int32(1)])
            .unwrap_err();
        assert_eq!(
            *e.kind(),
            ErrorKind::ArityMismatch {
                method: "ping".into(),
                expected: 0,
                got: 1
            }
        );

        let e = i.dispatch(&ctx(), "nope", &mut []).unwrap_err();
        assert_eq!(*e.kind(), ErrorKind::UnknownMethod("nope".into()));

        let e = i
            .dispatch(&ctx(), "add", &mut [Variant::String("2".into()), Variant::Int32(3)])
            .unwrap_err();
        assert!(matches!(e.kind(), ErrorKind::IncompatibleType { .. }));

        // callbacks are not executed by a server
        let e = i.dispatch(&ctx(), "progress", &mut [Variant::UInt32(1)]).unwrap_err();
        assert!(matches!(e.kind(), ErrorKind::UnknownMethod(_)));
    }

    #[test]
    fn test_can_call() {
        let i = server();
        assert!(!i.can_call("add", "attacker").unwrap());
        assert!(i.can_call("add", "anyone_else").unwrap());
        assert!(i.can_call("ping", "attacker").unwrap());
        assert!(i.can_call("private", "friend").unwrap());
        assert!(i.can_call("private", "ally-7").unwrap());
        assert!(!i.can_call("private", "stranger").unwrap());
        assert!(i.can_call("nope", "friend").is_err());

        let config = Config::from_string(SCHEMA).unwrap();
        let client = Interface::describe(TransportMode::Client, "Test", &config).unwrap();
        assert!(client.can_call("progress", "attacker").unwrap());
    }

    #[test]
    fn test_glob() {
        assert!(glob_match("*", ""));
        assert!(glob_match("a*c", "abbbc"));
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "ac"));
        assert!(!glob_match("abc", "abcd"));
    }

    #[test]
    fn test_marshal_roundtrip() {
        let config = Config::from_string(SCHEMA).unwrap();
        let client = Interface::describe(TransportMode::Client, "Test", &config).unwrap();
        let server = server();

        let mut args = vec![Variant::String("abc".into()), Variant::UInt32(99)];
        let wire = client.marshal_call("swap", &args).unwrap();
        assert_eq!(
            wire,
            vec![CallArgument::new(
                Direction::InOut,
                Variant::String("abc".into())
            )]
        );

        let mut argv = server.unmarshal_call("swap", wire).unwrap();
        assert_eq!(argv[1], Variant::UInt32(0));
        assert_eq!(server.dispatch(&ctx(), "swap", &mut argv).unwrap(), Variant::Void);
        let outputs = server.outputs("swap", &argv).unwrap();
        assert_eq!(
            outputs,
            vec![Variant::String("cba".into()), Variant::UInt32(3)]
        );

        client.store_outputs("swap", &mut args, outputs).unwrap();
        assert_eq!(args, vec![Variant::String("cba".into()), Variant::UInt32(3)]);

        assert!(client
            .store_outputs("swap", &mut args, vec![Variant::Void])
            .is_err());
        assert!(matches!(
            client.marshal_call("add", &[Variant::Int32(1)]).unwrap_err().kind(),
            ErrorKind::ArityMismatch { .. }
        ));
        assert!(matches!(
            server.unmarshal_call("add", vec![]).unwrap_err().kind(),
            ErrorKind::ArityMismatch { .. }
        ));
        assert!(matches!(
            server
                .unmarshal_call("swap", vec![CallArgument::input(Variant::from("abc"))])
                .unwrap_err()
                .kind(),
            ErrorKind::MalformedEncoding(m) if m.contains("argument 1")
        ));
    }
}
