pub mod commands;

use clap::{Arg, Command};

pub use commands::handle_subcommands;

pub fn build_cli() -> Command {
    Command::new("frisko-poller")
        .version(crate::VERSION)
        .about("Reads measurements and output states from a Frisko heating controller over Modbus TCP")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .help("Controller address (default 192.168.1.99)"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Modbus TCP port (default 502)"),
        )
        .arg(
            Arg::new("interval")
                .short('i')
                .long("interval")
                .value_name("SECONDS")
                .help("Seconds between cycles in watch mode"),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_name("FORMAT")
                .value_parser(["console", "json"])
                .help("Output format"),
        )
        .subcommand(Command::new("poll").about("Run a single poll cycle (default)"))
        .subcommand(Command::new("watch").about("Poll repeatedly until Ctrl-C"))
        .subcommand(Command::new("registers").about("List the register map"))
        .subcommand(
            Command::new("read")
                .about("Read one holding register")
                .arg(Arg::new("address").required(true).help("Register address")),
        )
}
