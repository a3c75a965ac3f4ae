/*!
 appbroker generates rust code from a libapp interface file

 # Usage
 $ appbroker [-c|-s] [-n NAME] [-o OUTFILE] FILE

 `-s` (the default) generates the calls a server implements, `-c` the
 callbacks a client implements. Output goes to stdout unless `-o` is given.
!*/

use std::env;
use std::fs::File;
use std::io::{self, Write};
use std::process::exit;

use libapp_generator::{generate, Error, Mode, Result};

fn print_usage(program: &str, opts: &getopts::Options) {
    let brief = format!("Usage: {} [-c|-s] [-n NAME] [-o OUTFILE] FILE", program);
    eprint!("{}", opts.usage(&brief));
}

fn run(mode: Mode, name: Option<&str>, outfile: Option<&str>, infile: &str) -> Result<()> {
    let mut reader = File::open(infile).map_err(Error::Io)?;
    let mut writer: Box<dyn Write> = match outfile {
        Some(path) => Box::new(File::create(path).map_err(Error::Io)?),
        None => Box::new(io::stdout()),
    };
    generate(&mut reader, &mut writer, mode, name)?;
    writer.flush().map_err(Error::Io)
}

fn main() {
    let args: Vec<_> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("appbroker");

    let mut opts = getopts::Options::new();
    opts.optflag("c", "client", "generate the callbacks of a client");
    opts.optflag("s", "server", "generate the calls of a server (default)");
    opts.optopt("n", "name", "override the service name", "NAME");
    opts.optopt("o", "output", "write to OUTFILE instead of stdout", "OUTFILE");
    opts.optflag("h", "help", "print this help menu");

    let matches = match opts.parse(args.iter().skip(1)) {
        Ok(m) => m,
        Err(f) => {
            eprintln!("{}: {}", program, f);
            print_usage(program, &opts);
            exit(1);
        }
    };

    if matches.opt_present("h") {
        print_usage(program, &opts);
        return;
    }
    if matches.free.len() != 1 || (matches.opt_present("c") && matches.opt_present("s")) {
        print_usage(program, &opts);
        exit(1);
    }

    let mode = if matches.opt_present("c") {
        Mode::Client
    } else {
        Mode::Server
    };
    let name = matches.opt_str("n");
    let outfile = matches.opt_str("o");
    let infile = &matches.free[0];

    if let Err(e) = run(mode, name.as_deref(), outfile.as_deref(), infile) {
        eprintln!("{}: {}: {}", program, infile, e);
        exit(2);
    }
}
