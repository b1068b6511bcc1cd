use std::{error::Error, net::SocketAddr, process, sync::Arc, time::Duration};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, warn, LevelFilter};
use tokio::{
    net::TcpListener,
    sync::{oneshot, Mutex},
};

use tunestatus::{
    authorization::Authorizer,
    config::{Config, Secrets},
    error::ErrorKind,
    events::Event,
    poller::Poller,
    provider::Provider,
    server::{self, AppState},
    session::{Session, SessionState},
    signal,
    slack::StatusClient,
    spotify::Spotify,
    store::{FileStore, MemoryStore, Store},
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Secrets file
    ///
    /// Holds the Slack token and, optionally, the Spotify app registration.
    /// Keep this file private: the Slack token grants access to your
    /// profile. Reloaded on SIGHUP.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("secrets.toml"), env = "TUNESTATUS_SECRETS_FILE")]
    secrets_file: String,

    /// Credential store file
    ///
    /// Persists the Spotify app registration and tokens across restarts.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("tunestatus.json"), env = "TUNESTATUS_STORE_FILE")]
    store_file: String,

    /// Keep credentials in memory only
    ///
    /// Spotify has to be authorized again after every restart.
    #[arg(long, default_value_t = false, env = "TUNESTATUS_EPHEMERAL")]
    ephemeral: bool,

    /// Address of the authorization server
    #[arg(short, long, value_name = "ADDR", default_value_t = SocketAddr::from(Config::DEFAULT_LISTEN), env = "TUNESTATUS_LISTEN")]
    listen: SocketAddr,

    /// Seconds between two now-playing checks
    #[arg(short, long, value_name = "SECS", default_value_t = Config::DEFAULT_POLL_INTERVAL.as_secs(), env = "TUNESTATUS_INTERVAL")]
    interval: u64,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            // Quiet and verbose are mutually exclusive.
            0 => LevelFilter::Warn,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// Loads the secrets and builds a Slack client from them.
fn load_secrets(
    secrets_file: &str,
    config: &Config,
) -> tunestatus::error::Result<(Secrets, StatusClient)> {
    let secrets = Secrets::from_file(secrets_file).inspect_err(|e| {
        if e.kind == ErrorKind::NotFound {
            info!("copy secrets.toml.example to {secrets_file} and set your Slack token");
        }
    })?;

    let slack = StatusClient::new(config, secrets.slack_token.clone())?;
    Ok((secrets, slack))
}

/// Logs what the user has to do next.
fn on_state_changed(to: SessionState, listen: SocketAddr) {
    match to {
        SessionState::MissingAppInfo => {
            warn!("no Spotify app registration; open http://{listen}/ to set one");
        }
        SessionState::MissingAccessToken => {
            warn!("Spotify is not authorized; open http://{listen}/ to authorize");
        }
        SessionState::Ready => info!("Spotify is authorized"),
        SessionState::Initialising => {}
    }
}

/// Main application loop.
///
/// Runs until a shutdown signal arrives or the authorization server stops.
///
/// # Errors
///
/// Returns an error when the configuration or the credential store cannot be
/// loaded, or when the authorization server fails.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let mut config = Config::new()?;
    config.listen = args.listen;
    config.set_poll_interval(Duration::from_secs(args.interval));

    let (secrets, mut slack) = load_secrets(&args.secrets_file, &config)?;

    let store: Arc<dyn Store> = if args.ephemeral {
        warn!("credentials are not persisted; authorize again after restarting");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(FileStore::open(&args.store_file).await?)
    };
    let provider: Arc<dyn Provider> = Arc::new(Spotify::new(&config)?);

    let mut session = Session::new(Arc::clone(&store), Arc::clone(&provider));
    let mut session_events = session.subscribe();
    session.init().await?;

    let authorizer = Arc::new(Authorizer::new(store, provider));
    if let Some(registration) = secrets.spotify {
        if let Err(e) = authorizer
            .register_app_info(&mut session, registration)
            .await
        {
            warn!("ignoring Spotify app registration in {}: {e}", args.secrets_file);
        }
    }

    let session = Arc::new(Mutex::new(session));

    let mut poller = Poller::new(config.poll_interval);
    let mut poller_events = poller.subscribe();
    let poller_task = tokio::spawn(poller.run(Arc::clone(&session)));

    let listener = TcpListener::bind(config.listen).await?;
    let router = server::router(AppState {
        session: Arc::clone(&session),
        authorizer: Arc::clone(&authorizer),
    });
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let mut server_task = tokio::spawn(server::serve(listener, router, async move {
        let _ = shutdown_rx.await;
    }));

    let mut signals = signal::Handler::new()?;

    let result = loop {
        tokio::select! {
            // Prioritize shutdown signals.
            biased;

            signal = signals.recv() => {
                if signal.is_shutdown() {
                    info!("received {signal}; shutting down gracefully");
                    break Ok(());
                }

                info!("received {signal}; reloading {}", args.secrets_file);
                match load_secrets(&args.secrets_file, &config) {
                    Ok((secrets, reloaded)) => {
                        slack = reloaded;
                        if let Some(registration) = secrets.spotify {
                            let mut session = session.lock().await;
                            if let Err(e) = authorizer
                                .register_app_info(&mut session, registration)
                                .await
                            {
                                warn!(
                                    "ignoring Spotify app registration in {}: {e}",
                                    args.secrets_file
                                );
                            }
                        }
                    }
                    Err(e) => error!("keeping previous secrets: {e}"),
                }
            }

            result = &mut server_task => {
                break match result {
                    Ok(Ok(())) => Err("authorization server stopped".into()),
                    Ok(Err(e)) => Err(e.into()),
                    Err(e) => Err(e.into()),
                };
            }

            Some(event) = session_events.recv() => {
                if let Event::StateChanged { to, .. } = event {
                    on_state_changed(to, config.listen);
                }
            }

            Some(event) = poller_events.recv() => {
                match event {
                    Event::TrackChanged(text) => {
                        if let Err(e) = slack.set_status(&text, None).await {
                            error!("updating Slack status failed: {e}");
                        }
                    }
                    Event::PlaybackStopped => {
                        if let Err(e) = slack.clear_status().await {
                            error!("clearing Slack status failed: {e}");
                        }
                    }
                    Event::RequestFailed(e) => debug!("poll failed: {e}"),
                    Event::StateChanged { .. } => {}
                }
            }
        }
    };

    poller_task.abort();
    let _ = shutdown_tx.send(());
    if !server_task.is_finished() {
        let _ = server_task.await;
    }

    if let Err(e) = slack.clear_status().await {
        error!("clearing Slack status failed: {e}");
    }

    result
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and starts the main application loop.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
