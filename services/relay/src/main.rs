use clap::{App, Arg};
use relay::config::Config;
use relay::server::Server;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::process;
use std::thread;
use veil::logging;

fn main() {
    let matches = App::new("Chat Relay")
        .version("1.0")
        .about("Runs the end-to-end-encrypted chat relay server.")
        .arg(
            Arg::with_name("CONFIG_FILE")
                .help("Path to the config file (defaults apply when omitted)")
                .required(false),
        )
        .get_matches();

    let log = logging::init();

    let config = match matches.value_of("CONFIG_FILE") {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(err) => {
                logging::error!(log, "invalid configuration"; "path" => path, "error" => err);
                process::exit(1);
            }
        },
        None => Config::default(),
    };

    let server = match Server::bind(config, &log) {
        Ok(server) => server,
        Err(err) => {
            logging::error!(log, "server initialization failed"; "error" => err.to_string());
            process::exit(1);
        }
    };

    let relay = server.relay();
    let signal_log = log.new(logging::o!());
    let mut signals = Signals::new(&[SIGINT, SIGTERM]).expect("signal registration failed");

    thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            logging::info!(signal_log, "signal received, shutting down"; "signal" => signal);
            relay.stop();
        }
    });

    server.run();
}
