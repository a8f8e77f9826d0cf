extern crate getopts;

use std::{process, sync::Arc, time::Duration};

use axum::{extract::Request, http::StatusCode, ServiceExt};
use getopts::Options;
use tower::layer::Layer;
use tower_http::normalize_path::NormalizePathLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mhcmatch::api::routes::build_router;
use mhcmatch::api::{pipeline_runner, AppState};
use mhcmatch::config::Config;
use mhcmatch::reference::ReferenceData;

const PKG_NAME: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_LOG_FILTER: &str = "mhcmatch=info,mhcmatch_server=info,tower_http=warn";

fn print_usage(program: &str, opts: Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

#[tokio::main]
async fn main() {
    println!("{} v{}", PKG_NAME, VERSION);

    let args: Vec<String> = std::env::args().collect();
    let mut opts = Options::new();

    opts.optflag("h", "help", "print this help message");
    opts.optopt("a", "alleles", "JSON file of reference alleles, optionally .gz or .zst",
                "ALLELES_FILE");
    opts.optopt("e", "eplets", "JSON file of known eplets", "EPLETS_FILE");
    opts.optopt("s", "structures", "Tab separated file of per residue ASA values",
                "STRUCTURES_FILE");
    opts.optopt("c", "config-file", "Configuration file name", "CONFIG");
    opts.optopt("b", "bind-address-and-port", "The address:port to bind to",
                "BIND_ADDRESS_AND_PORT");

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            println!("Invalid options\n{}", f);
            print_usage(&args[0], opts);
            process::exit(1);
        }
    };

    let program = args[0].clone();

    if matches.opt_present("help") {
        print_usage(&program, opts);
        process::exit(0);
    }
    if !matches.opt_present("alleles") {
        println!("no -a|--alleles option");
        print_usage(&program, opts);
        process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let config =
        match matches.opt_str("config-file") {
            Some(config_file_name) => match Config::read(&config_file_name) {
                Ok(config) => config,
                Err(err) => {
                    error!("{:#}", err);
                    process::exit(1);
                }
            },
            None => Config::default(),
        };

    let alleles_file_name = matches.opt_str("alleles").unwrap_or_default();
    let eplets_file_name = matches.opt_str("eplets");
    let structures_file_name = matches.opt_str("structures");

    let reference =
        match ReferenceData::from_files(&config, &alleles_file_name, eplets_file_name.as_deref(),
                                        structures_file_name.as_deref()) {
            Ok(reference) => reference,
            Err(err) => {
                error!("failed to load reference data: {:#}", err);
                process::exit(1);
            }
        };

    let bind_address_and_port = matches.opt_str("bind-address-and-port")
        .unwrap_or_else(|| config.server.bind_address_and_port.clone());

    let listener =
        match tokio::net::TcpListener::bind(&bind_address_and_port).await {
            Ok(listener) => listener,
            Err(err) => {
                error!("failed to bind to {}: {}", bind_address_and_port, err);
                process::exit(1);
            }
        };

    let reference = Arc::new(reference);
    let config = Arc::new(config);
    let runner = pipeline_runner(reference.clone(), config.clone());
    let request_timeout = Duration::from_secs(config.server.request_timeout_secs);

    let state = AppState::start(reference, config, runner);

    info!("starting server on {}", bind_address_and_port);

    let app = build_router(state)
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, request_timeout));

    let app = NormalizePathLayer::trim_trailing_slash().layer(app);

    if let Err(err) = axum::serve(listener, ServiceExt::<Request>::into_make_service(app)).await {
        error!("server failed: {}", err);
        process::exit(1);
    }
}
