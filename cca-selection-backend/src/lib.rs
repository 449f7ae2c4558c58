pub mod admission;
pub mod cohorts;
pub mod confirmation;
pub mod connections;
pub mod courses;
pub mod error;
pub mod handler;
pub mod ledger;
pub mod phase;
pub mod protocol;
pub mod routes;
pub mod schedule;
pub mod selection;
pub mod session;
pub mod snapshot;
pub mod websocket;

use core::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use admission::AdmissionControl;
use bytes::Bytes;
use cca_selection_config::Config;
use cca_selection_database::get_database_connection;
use cohorts::Cohorts;
use error::AppError;
use futures_util::{pin_mut, Future};
use http::{Method, Request, Response};
use http_body_util::Full;
use hyper::body::{Body, Incoming};
use hyper_util::rt::{TokioExecutor, TokioIo};
use ledger::postgres::PgLedger;
use session::SessionResolver;
use tokio::net::TcpListener;
use tokio::select;
use tokio::sync::watch;
use tracing::{debug, debug_span, error, info, warn, Instrument as _};

#[derive(Clone)]
pub struct AppState {
    pub control: Arc<AdmissionControl>,
    pub sessions: Arc<dyn SessionResolver>,
    /// Outbound messages buffered per real-time connection.
    pub send_queue: usize,
}

pub async fn setup_server(config: &Config) -> Result<AppState, AppError> {
    info!("starting up server...");

    let pool = get_database_connection(&config.database_url, config.database.max_connections)?;
    let ledger = Arc::new(PgLedger::new(
        pool,
        Duration::from_secs(config.database.connect_timeout_secs),
    ));
    let control = AdmissionControl::start(ledger.clone(), Cohorts::from_config(config)).await?;

    Ok(AppState {
        control: Arc::new(control),
        sessions: ledger,
        send_queue: config.websocket.send_queue,
    })
}

async fn route<B>(state: &AppState, request: Request<B>) -> Result<Response<Full<Bytes>>, AppError>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match (request.method(), request.uri().path()) {
        (&Method::GET, "/ws") => routes::ws::websocket(state, request).await,
        (&Method::GET, "/courses") => routes::courses::list(state, request).await,
        (&Method::POST, "/courses") => routes::courses::import(state, request).await,
        (&Method::POST, "/state") => routes::state::set_state(state, request).await,
        (&Method::POST, "/confirm") => routes::students::confirm(state, request).await,
        (&Method::GET, "/students/unconfirmed") => {
            routes::students::unconfirmed(state, request).await
        }
        (_, "/ws" | "/courses" | "/state" | "/confirm" | "/students/unconfirmed") => {
            Err(AppError::MethodNotAllowed)
        }
        _ => Err(AppError::NotFound),
    }
}

pub async fn handle_request<B>(state: &AppState, request: Request<B>) -> Response<Full<Bytes>>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let response = route(state, request)
        .await
        .unwrap_or_else(AppError::into_response);
    debug!(%method, %path, status = response.status().as_u16(), "handled request");
    response
}

#[allow(clippy::cognitive_complexity)]
pub async fn run_server(
    config: Config,
) -> Result<impl Future<Output = Result<(), AppError>>, AppError> {
    let state = setup_server(&config).await?;

    let listener = TcpListener::bind(config.listen).await?;

    // tell the connections to shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let shutdown_tx = Arc::new(shutdown_tx);

    // wait for the connections to finish shutdown
    let (closed_tx, closed_rx) = watch::channel(());

    info!(listen = %config.listen, "started up server...");

    Ok(async move {
        #[allow(clippy::redundant_pub_crate)]
        loop {
            select! {
                accept = listener.accept() => {
                    let (socket, remote_addr) = match accept {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            warn!(%err, "failed to accept connection");
                            continue;
                        }
                    };

                    let state = state.clone();
                    let shutdown_tx = Arc::clone(&shutdown_tx);
                    let closed_rx = closed_rx.clone();

                    let fut = async move {
                        let socket = TokioIo::new(socket);

                        let hyper_service = hyper::service::service_fn(move |request: Request<Incoming>| {
                            let state = state.clone();
                            async move { Ok::<_, Infallible>(handle_request(&state, request).await) }
                        });

                        let builder = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new());
                        let connection = builder.serve_connection_with_upgrades(socket, hyper_service);
                        pin_mut!(connection);

                        select! {
                            connection_result = connection.as_mut() => {
                                if let Err(err) = connection_result {
                                    debug!("failed to serve connection: {err:#}");
                                }
                            }
                            () = shutdown_tx.closed() => {
                                connection.as_mut().graceful_shutdown();
                                if let Err(err) = connection.as_mut().await {
                                    debug!("failed to shut down connection: {err:#}");
                                }
                            }
                        }

                        drop(closed_rx);
                    };

                    tokio::spawn(fut.instrument(debug_span!("connection", %remote_addr)));
                }
                () = shutdown_signal() => {
                    warn!("shutting down");
                    // upgraded connections are not tracked by hyper
                    state.control.connections().cancel_all();
                    drop(shutdown_rx); // initiate shutdown
                    drop(closed_rx);
                    closed_tx.closed().await;
                    break;
                }
            }
        }

        Ok(())
    })
}

#[allow(clippy::redundant_pub_crate)]
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(%err, "failed to listen for Ctrl+C");
            core::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(%err, "failed to install SIGTERM handler");
                core::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
