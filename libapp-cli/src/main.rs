//! `libapp`: inspect interfaces and call applications from the shell.
//!
//! Exit status: 2 when the application could not be located, 3 when the
//! connection failed, 4 when the interface file could not be loaded, 1 for
//! anything else.

use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Arg, ArgAction, ArgMatches, Command};
use serde_json::{json, Map, Value};

use libapp::config::resolve_target;
use libapp::interface::Method;
use libapp::{
    transport, AppClient, ClientConfig, ErrorKind, Interface, InterfaceSource, Symbols,
    TransportMode, Variant,
};

mod logger;

type Result<T> = anyhow::Result<T>;

fn interface_source(file: Option<&String>) -> InterfaceSource {
    match file {
        Some(f) => InterfaceSource::Path(PathBuf::from(f)),
        None => InterfaceSource::Default,
    }
}

fn print_table(title: &str, methods: &[Method]) {
    if methods.is_empty() {
        return;
    }
    println!("{}:", title);
    for m in methods {
        println!("  {}", m.signature());
    }
}

fn do_transports() -> Result<()> {
    for t in transport::transports() {
        println!("{:<6} {}", t.name, t.description);
    }
    Ok(())
}

fn do_lookup(app: &str, name: Option<&String>, broker: Option<&String>) -> Result<()> {
    let target = resolve_target(
        app,
        name.map(String::as_str),
        TransportMode::Client,
        broker.map(String::as_str),
    )
    .with_context(|| format!("Failed to locate '{}'", app))?;
    println!("{}\t{}", target.transport, target.address);
    Ok(())
}

fn do_interface(app: &str, file: Option<&String>) -> Result<()> {
    let config = interface_source(file)
        .load(app)
        .with_context(|| format!("Failed to load the interface of '{}'", app))?;
    let interface = Interface::describe(TransportMode::Server, app, &config)
        .with_context(|| format!("Invalid interface for '{}'", app))?;

    println!("{}", app);
    print_table("calls", interface.calls());
    print_table("callbacks", interface.callbacks());
    if !interface.status().is_empty() {
        println!("status:");
        for (name, value) in interface.status().iter() {
            println!("  {} {}", value.variant_type(), name);
        }
    }
    Ok(())
}

/// Build the argument list of `method` from the command line values. OUT
/// parameters take no value and start out empty.
fn parse_arguments(method: &Method, values: &[&str]) -> Result<Vec<Variant>> {
    let inputs = method
        .params
        .iter()
        .filter(|p| p.direction.is_input())
        .count();
    if values.len() != inputs {
        bail!(
            "'{}' takes {} arguments, {} given",
            method.name,
            inputs,
            values.len()
        );
    }

    let mut values = values.iter();
    method
        .params
        .iter()
        .enumerate()
        .map(|(i, p)| {
            if !p.direction.is_input() {
                return Ok(Variant::default_for(p.vtype));
            }
            let value = values.next().copied().unwrap_or_default();
            Variant::parse(p.vtype, value)
                .with_context(|| format!("argument {}: '{}' is not a {}", i + 1, value, p.vtype))
        })
        .collect()
}

fn to_json(v: &Variant) -> Value {
    match v {
        Variant::Void | Variant::Pointer(_) => Value::Null,
        Variant::Bool(b) => json!(b),
        Variant::Int8(n) => json!(n),
        Variant::UInt8(n) => json!(n),
        Variant::Int16(n) => json!(n),
        Variant::UInt16(n) => json!(n),
        Variant::Int32(n) => json!(n),
        Variant::UInt32(n) => json!(n),
        Variant::Int64(n) => json!(n),
        Variant::UInt64(n) => json!(n),
        Variant::Float(n) => json!(n),
        Variant::Double(n) => json!(n),
        Variant::String(s) => json!(s),
        Variant::Buffer(b) => json!(b),
    }
}

fn result_json(method: &Method, value: &Variant, args: &[Variant]) -> Value {
    let outputs: Map<String, Value> = method
        .params
        .iter()
        .zip(args)
        .enumerate()
        .filter(|(_, (p, _))| p.direction.is_output())
        .map(|(i, (p, v))| {
            let name = p.name.clone().unwrap_or_else(|| format!("arg{}", i + 1));
            (name, to_json(v))
        })
        .collect();

    let mut result = json!({ "return": to_json(value) });
    if !outputs.is_empty() {
        result["outputs"] = Value::Object(outputs);
    }
    result
}

/// Callbacks the server may send while a call is running are logged and
/// answered with the zero value of their return type.
fn callback_symbols(interface: &Interface) -> Symbols {
    let mut symbols = Symbols::new();
    for m in interface.callbacks() {
        let name = m.name.clone();
        let ret = m.ret;
        symbols.register(
            format!("{}_{}", interface.app(), m.name),
            move |_, args| {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                log::info!("callback {}({})", name, args.join(", "));
                Ok(Variant::default_for(ret))
            },
        );
    }
    symbols
}

fn do_call(app: &str, sub_matches: &ArgMatches) -> Result<()> {
    let source = interface_source(sub_matches.get_one::<String>("file"));
    let method = sub_matches
        .get_one::<String>("METHOD")
        .map(String::as_str)
        .unwrap_or_default();
    let values: Vec<&str> = sub_matches
        .get_many::<String>("ARGS")
        .map(|v| v.map(String::as_str).collect())
        .unwrap_or_default();

    let schema = source
        .load(app)
        .with_context(|| format!("Failed to load the interface of '{}'", app))?;
    let description = Interface::describe(TransportMode::Client, app, &schema)
        .with_context(|| format!("Invalid interface for '{}'", app))?;
    let declared = description.remote_method(method)?.clone();
    let mut args = parse_arguments(&declared, &values)?;

    let mut client = AppClient::with_config(
        app,
        ClientConfig {
            name: sub_matches.get_one::<String>("name").cloned(),
            interface: source,
            symbols: callback_symbols(&description),
            broker: sub_matches.get_one::<String>("broker").cloned(),
            timeout: sub_matches.get_one::<Duration>("timeout").copied(),
        },
    )
    .with_context(|| format!("Failed to connect to '{}'", app))?;

    let value = client
        .call(method, &mut args)
        .with_context(|| format!("Call of '{}' failed", method))?;
    println!(
        "{}",
        serde_json::to_string_pretty(&result_json(&declared, &value, &args))?
    );
    Ok(())
}

/// Exit status for the first libapp error in the chain of `e`.
fn exit_code(e: &anyhow::Error) -> i32 {
    for cause in e.chain() {
        if let Some(e) = cause.downcast_ref::<libapp::Error>() {
            return match e.kind() {
                ErrorKind::AddressResolutionError(_) | ErrorKind::InvalidAddress(_) => 2,
                ErrorKind::ConnectionError(_)
                | ErrorKind::ConnectionClosed
                | ErrorKind::Timeout
                | ErrorKind::Io(_) => 3,
                ErrorKind::SchemaLoadError(_) => 4,
                _ => 1,
            };
        }
    }
    1
}

fn cli() -> Command {
    let app = Arg::new("app")
        .short('a')
        .long("app")
        .value_name("APP")
        .required(true)
        .help("name of the application");
    let name = Arg::new("name")
        .short('n')
        .long("name")
        .value_name("[TRANSPORT:]ADDRESS")
        .help("where the application listens")
        .long_help(
            "Where the application listens. Without it, APPSERVER_<APP> is consulted, and \
             then the session broker.",
        );
    let file = Arg::new("file")
        .short('f')
        .long("file")
        .value_name("FILE")
        .help("interface file to use instead of the installed one");
    let broker = Arg::new("broker")
        .short('b')
        .long("broker")
        .value_name("[TRANSPORT:]ADDRESS")
        .help("address of the session broker");

    Command::new("libapp")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Inspect libapp interfaces and call applications")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .global(true)
                .help("log more, may be repeated"),
        )
        .subcommand(Command::new("transports").about("List the available transports"))
        .subcommand(
            Command::new("lookup")
                .about("Print where an application is reached")
                .arg(app.clone())
                .arg(name.clone())
                .arg(broker.clone()),
        )
        .subcommand(
            Command::new("interface")
                .about("Print the calls and callbacks of an application")
                .arg(app.clone())
                .arg(file.clone()),
        )
        .subcommand(
            Command::new("call")
                .about("Call a method")
                .long_about(
                    "Call METHOD of APP. One value per IN and IN_OUT parameter is given, in \
                     declared order. The result is printed as JSON.",
                )
                .arg(app)
                .arg(name)
                .arg(file)
                .arg(broker)
                .arg(
                    Arg::new("timeout")
                        .short('t')
                        .long("timeout")
                        .value_name("DURATION")
                        .value_parser(humantime::parse_duration)
                        .help("give up after DURATION, e.g. 5s"),
                )
                .arg(Arg::new("METHOD").required(true))
                .arg(
                    Arg::new("ARGS")
                        .num_args(0..)
                        .allow_negative_numbers(true),
                ),
        )
}

fn do_main(matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("transports", _)) => do_transports(),
        Some(("lookup", sub_matches)) => do_lookup(
            app_name(sub_matches),
            sub_matches.get_one::<String>("name"),
            sub_matches.get_one::<String>("broker"),
        ),
        Some(("interface", sub_matches)) => {
            do_interface(app_name(sub_matches), sub_matches.get_one::<String>("file"))
        }
        Some(("call", sub_matches)) => do_call(app_name(sub_matches), sub_matches),
        _ => bail!("no subcommand given"),
    }
}

fn app_name(matches: &ArgMatches) -> &str {
    matches
        .get_one::<String>("app")
        .map(String::as_str)
        .unwrap_or_default()
}

fn main() {
    let matches = cli().get_matches();

    let verbosity = match matches.subcommand() {
        Some((_, sub_matches)) => sub_matches.get_count("verbose"),
        None => matches.get_count("verbose"),
    };
    if let Err(e) = logger::init(verbosity) {
        eprintln!("Could not install the logger: {:#}", e);
    }

    if let Err(e) = do_main(&matches) {
        eprintln!("Error: {:#}", e);
        exit(exit_code(&e));
    }
}
