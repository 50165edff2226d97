use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use svcd::config::ServerConfig;
use svcd::http::HttpContext;
use svcd::route::{RouteRegistry, ServiceLibraries};
use svcd::server::{self, ProcessRole, Server};

/// Library path of the handlers compiled into the binary
const BUILTIN_LIBRARY: &str = "builtin";

#[derive(Parser)]
#[command(name = "svcd")]
#[command(about = "HTTP/1.x service router and static file server", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

fn builtin_services() -> ServiceLibraries {
    let mut services = ServiceLibraries::new();
    services.register(BUILTIN_LIBRARY, "echo", |_: &RouteRegistry, ctx: &mut HttpContext| {
        let body = ctx.request().body().to_vec();
        let response = ctx.response_mut();
        response.set_body(body);
        response.headers_mut().set("Content-Type", "application/octet-stream");
        0
    });
    services.register(BUILTIN_LIBRARY, "routes", |registry: &RouteRegistry, ctx: &mut HttpContext| {
        let mut listing = String::new();
        for entry in registry.routes().iter() {
            listing.push_str(&format!(
                "{}\t{}\t{}\t{}\n",
                entry.name(),
                entry.pattern(),
                entry.kind(),
                entry.library()
            ));
        }
        let response = ctx.response_mut();
        response.set_body(listing);
        response.headers_mut().set("Content-Type", "text/plain");
        0
    });
    services
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ServerConfig::from_file(path),
        None => ServerConfig::from_toml_str(""),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("svcd: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if cli.check {
        println!("configuration ok: {} route(s)", config.routes.len());
        return ExitCode::SUCCESS;
    }

    svcd::logging::init(&config.log);

    let processes = config.worker_processes;
    let server = match Server::bind(config, builtin_services()) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("startup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let role = match server::fork_workers(processes - 1) {
        Ok(role) => role,
        Err(e) => {
            tracing::error!("fork failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let ProcessRole::Child(n) = role {
        tracing::info!(worker_process = n, pid = std::process::id(), "forked");
    }

    if let Err(e) = server.run() {
        tracing::error!("server failed: {}", e);
        return ExitCode::FAILURE;
    }

    if let ProcessRole::Parent(children) = role {
        if server::wait_children(&children) > 0 {
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}
