pub mod config;
pub mod net;
pub mod params;
pub mod persistence;
pub mod telemetry;

use std::sync::Arc;

pub use config::AppConfig;
pub use net::cipher::{BbCipher, Cipher, PcCipher};
pub use net::packet::{PacketReader, PacketWriter};
pub use net::server::{
    run_character_server, run_data_server, run_login_server, run_patch_server, ServerContext,
    ServerControl,
};
pub use params::ParameterCache;

pub fn run(args: &[String]) -> Result<(), String> {
    let config = config::AppConfig::load(args)?;
    telemetry::logging::init(&config.root)?;

    let params = Arc::new(params::ParameterCache::load(&config.parameter_path())?);
    println!(
        "bluegate: cached {} parameter files ({} chunks)",
        params.num_files(),
        params.chunk_count()
    );

    let patches = Arc::new(net::patch::PatchFileSet::scan(&config.patch_path())?);
    println!("bluegate: serving {} patch files", patches.files().len());

    let storage = Arc::new(persistence::storage::FileStore::open(&config.save_path())?);

    let ctx = Arc::new(net::server::ServerContext::new(
        config, storage, params, patches,
    )?);
    let control = Arc::new(net::server::ServerControl::new());

    // One acceptor per role; the join below keeps the process alive for as
    // long as any of them runs.
    let acceptors = [
        ("patch", net::server::run_patch_server as AcceptorFn),
        ("data", net::server::run_data_server as AcceptorFn),
        ("login", net::server::run_login_server as AcceptorFn),
        ("character", net::server::run_character_server as AcceptorFn),
    ];
    let mut handles = Vec::with_capacity(acceptors.len());
    for (role, acceptor) in acceptors {
        let ctx = Arc::clone(&ctx);
        let control = Arc::clone(&control);
        handles.push((role, std::thread::spawn(move || acceptor(ctx, control))));
    }

    let mut failure: Option<String> = None;
    for (role, handle) in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let message = format!("{} server error: {}", role, err);
                telemetry::logging::log_error(&message);
                eprintln!("{}", message);
                control.request_shutdown();
                failure.get_or_insert(message);
            }
            Err(_) => {
                let message = format!("{} server thread panicked", role);
                telemetry::logging::log_error(&message);
                eprintln!("{}", message);
                control.request_shutdown();
                failure.get_or_insert(message);
            }
        }
    }

    match failure {
        Some(message) => Err(message),
        None => Ok(()),
    }
}

type AcceptorFn = fn(Arc<ServerContext>, Arc<ServerControl>) -> Result<(), String>;
