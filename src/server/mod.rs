//! The HTTP front end: accept loop, per-connection handling and the two
//! application routes.
//!
//! # Endpoints
//!
//! - `GET /` — renders the step registry as an HTML overview page
//! - `GET /notify/<anything containing the secret>` — triggers a coalesced
//!   build signal (403 when the secret is absent from the path)
//! - anything else — 404
//!
//! Everything here runs on the reactor thread. Each accepted connection
//! becomes a `spawn_local` task that reads one request, routes it, writes
//! one HTTP/1.0 response and shuts the socket down. Requests that fail to
//! parse are dropped without a response.

use std::collections::HashMap;
use std::rc::Rc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::http::router::{handler, make_directory, Handler, RouteOutcome};
use crate::http::{read_request, Request, Response};
use crate::notify::SaturatingNotifier;
use crate::registry::SharedRegistry;
use crate::status::render_overview_page;

/// Response body when the notify secret is missing from the path.
const BODY_WRONG_SECRET: &str = "the path does not contain the correct secret";
/// Response body for an accepted notification.
const BODY_NOTIFIED: &str = "the server has been successfully notified";

/// Builds the notify route: substring-containment secret check, then a
/// fan-out to every step's notifier.
///
/// The check is deliberately "does the raw path contain the secret
/// anywhere", not an equality or query-parameter match.
fn notify_route(secret: String, notifiers: Vec<SaturatingNotifier>) -> Handler {
    handler(move |request: &Request, _rest: &[&str]| {
        if !request.path.contains(&secret) {
            debug!(path = %request.path, "notify rejected: secret not in path");
            return RouteOutcome::Handled(Response::forbidden(BODY_WRONG_SECRET));
        }
        info!("push notification accepted");
        for notifier in &notifiers {
            notifier.notify();
        }
        RouteOutcome::Handled(Response::ok(BODY_NOTIFIED))
    })
}

/// Builds the root route: render the registry.
fn overview_route(registry: SharedRegistry) -> Handler {
    handler(move |_request: &Request, _rest: &[&str]| {
        let page = render_overview_page(&registry.borrow());
        RouteOutcome::Handled(Response::ok(page))
    })
}

/// Builds the application's dispatch tree.
pub fn make_root_handler(
    secret: String,
    notifiers: Vec<SaturatingNotifier>,
    registry: SharedRegistry,
) -> Handler {
    make_directory(HashMap::from([
        ("", overview_route(registry)),
        ("notify", notify_route(secret, notifiers)),
    ]))
}

/// Serves one accepted connection to completion.
///
/// Parse failures abandon the connection without a response (the peer is
/// misbehaving; there is nothing useful to say to it). Write and shutdown
/// errors are logged and otherwise ignored: the response is best-effort.
pub async fn serve_connection(mut stream: TcpStream, root: Handler) {
    let request = match read_request(&mut stream).await {
        Ok(request) => request,
        Err(error) => {
            debug!(error = %error, "dropping unparsable connection");
            return;
        }
    };

    let segments = request.path_segments();
    let response = match root(&request, &segments) {
        RouteOutcome::Handled(response) => response,
        RouteOutcome::NotFound => Response::not_found(),
    };

    debug!(
        method = %request.method,
        path = %request.path,
        status = response.status,
        "handled request"
    );

    if let Err(error) = response.write_to(&mut stream).await {
        debug!(error = %error, "failed to write response");
    }
    // Both directions; shutdown errors are uninteresting.
    let _ = tokio::io::AsyncWriteExt::shutdown(&mut stream).await;
}

/// Runs the accept loop until the token is cancelled.
///
/// Every connection becomes its own reactor-thread task, so a slow client
/// never blocks the next accept or the build loop.
pub async fn serve(listener: TcpListener, root: Handler, shutdown: CancellationToken) {
    info!(addr = ?listener.local_addr().ok(), "listening");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("shutdown requested, no longer accepting connections");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "accepted connection");
                        let root = Rc::clone(&root);
                        tokio::task::spawn_local(serve_connection(stream, root));
                    }
                    Err(error) => {
                        // Transient accept errors (EMFILE and friends) must
                        // not kill the reactor.
                        debug!(error = %error, "accept failed");
                    }
                }
            }
        }
    }
}
