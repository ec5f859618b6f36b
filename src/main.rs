use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use serde::Serialize;
use tracing::{debug, error, info};

use rfid_link::cli::{Cli, Commands};
use rfid_link::commands::reader::{
    connect_reader, disconnect_reader, discover_reader, list_serial_ports, read_card, CardRead,
};
use rfid_link::commands::settings::{init_reader_settings, load_reader_settings};
use rfid_link::logging;
use rfid_link::reader::{DuplicatePolicy, ReaderSession};

/// How often the watch printer re-checks its deadline.
const WATCH_TICK: Duration = Duration::from_millis(200);

fn emit<T: Serialize>(value: &T, json: bool, text: impl FnOnce() -> String) {
    if json {
        match serde_json::to_string(value) {
            Ok(line) => println!("{line}"),
            Err(e) => error!(error = %e, "Failed to serialize output"),
        }
    } else {
        println!("{}", text());
    }
}

fn print_card(card: &CardRead, json: bool) {
    emit(card, json, || card.uid.clone());
}

/// Open `port` if given, otherwise discover the reader.
async fn connect(session: &Arc<ReaderSession>, port: Option<String>, json: bool) -> Result<String, String> {
    match port {
        Some(port) => connect_reader(session.clone(), port).await,
        None => {
            discover_reader(session.clone(), move |event| {
                if json {
                    debug!(stage = %event.stage, "{}", event.message);
                } else {
                    info!(stage = %event.stage, "{}", event.message);
                }
            })
            .await
        }
    }
}

async fn watch(
    session: Arc<ReaderSession>,
    policy: DuplicatePolicy,
    duration: Option<Duration>,
    json: bool,
) -> Result<(), String> {
    let poll = session.timing().poll_slice.max(WATCH_TICK);
    let watch = session.watch(poll, policy);
    let stop = watch.stop_flag();
    let deadline = duration.map(|d| Instant::now() + d);

    let mut printer = tokio::task::spawn_blocking(move || {
        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }
            match watch.events().recv_timeout(WATCH_TICK) {
                Ok(event) => print_card(&CardRead::new(event, session.port()), json),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        watch.stop()
    });

    let finished = tokio::select! {
        joined = &mut printer => Some(joined),
        _ = tokio::signal::ctrl_c() => None,
    };

    let joined = match finished {
        Some(joined) => joined,
        None => {
            info!("Ctrl-C, stopping watch");
            stop.store(true, Ordering::SeqCst);
            printer.await
        }
    };

    joined
        .map_err(|e| format!("Watch task panicked: {}", e))?
        .map_err(|e| rfid_link::commands::reader::describe_error(&e))
}

async fn run(cli: Cli) -> Result<(), String> {
    if let Commands::InitSettings { path } = &cli.command {
        init_reader_settings(path.clone()).await?;
        println!("{}", path.display());
        return Ok(());
    }

    let settings = load_reader_settings(cli.settings.clone()).await?;
    let json = cli.json;

    match cli.command {
        Commands::Ports => {
            for entry in list_serial_ports().await? {
                emit(&entry, json, || format!("{}\t{}", entry.port, entry.label));
            }
        }
        Commands::Discover => {
            let session = Arc::new(ReaderSession::from_settings(&settings));
            let port = connect(&session, None, json).await?;
            emit(&serde_json::json!({ "port": port }), json, || port.clone());
            disconnect_reader(session).await?;
        }
        Commands::Read { port, timeout_ms } => {
            let session = Arc::new(ReaderSession::from_settings(&settings));
            connect(&session, port, json).await?;
            let timeout_ms = timeout_ms.unwrap_or(settings.read_timeout_ms);
            let result = read_card(session.clone(), timeout_ms).await;
            disconnect_reader(session).await?;
            print_card(&result?, json);
        }
        Commands::Watch {
            port,
            cooldown_ms,
            duration_secs,
        } => {
            let session = Arc::new(ReaderSession::from_settings(&settings));
            connect(&session, port, json).await?;
            let policy = cooldown_ms
                .map(|ms| DuplicatePolicy::new(Duration::from_millis(ms)))
                .unwrap_or_else(|| settings.duplicate_policy());
            let result = watch(
                session.clone(),
                policy,
                duration_secs.map(Duration::from_secs),
                json,
            )
            .await;
            disconnect_reader(session).await?;
            result?;
        }
        Commands::InitSettings { .. } => {}
    }

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    logging::init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("{}", message);
            ExitCode::FAILURE
        }
    }
}
