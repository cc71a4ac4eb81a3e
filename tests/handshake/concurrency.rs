//! Many clients handshaking with one shared server from separate threads.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use dtls_connector::message::{ConnectionId, Message};
use dtls_connector::{Config, ConnectOptions, Connector, CredentialStore, Output, VerifiedIdentity};

use crate::common::*;

const CLIENTS: usize = 16;

type Inbox = (SocketAddr, Option<ConnectionId>, Message);
type Routes = Arc<HashMap<SocketAddr, Mutex<Sender<Inbox>>>>;

fn client_addr(i: usize) -> SocketAddr {
    addr(&format!("10.0.1.{}:40000", i + 1))
}

/// Hand every pending server message to the channel of its client.
fn route_server_outputs(server: &Connector, routes: &Routes, now: Instant) {
    loop {
        match server.poll_output(now) {
            Output::Timeout(_) => return,
            Output::Message {
                peer,
                connection_id,
                message,
            } => {
                if let Some(tx) = routes.get(&peer) {
                    let _ = tx.lock().unwrap().send((addr(SERVER), connection_id, message));
                }
            }
            _ => {}
        }
    }
}

#[test]
fn parallel_clients_share_one_server() {
    init_log();
    let now = Instant::now();

    let store = (0..CLIENTS)
        .fold(CredentialStore::builder(), |b, i| {
            b.psk(format!("client-{}", i), format!("secret-{}", i).into_bytes())
        })
        .build();
    let server_config = Config::builder()
        .max_connections(CLIENTS)
        .connection_threads(CLIENTS)
        .credentials(store)
        .build()
        .unwrap();
    // One processing thread per client.
    let workers = server_config.connection_threads();
    let server = Arc::new(Connector::new(Arc::new(server_config)).unwrap());

    let mut receivers: Vec<Receiver<Inbox>> = Vec::new();
    let mut senders = HashMap::new();
    for i in 0..workers {
        let (tx, rx) = channel();
        senders.insert(client_addr(i), Mutex::new(tx));
        receivers.push(rx);
    }
    let routes: Routes = Arc::new(senders);

    let handles: Vec<_> = receivers
        .into_iter()
        .enumerate()
        .map(|(i, inbox)| {
            let server = server.clone();
            let routes = routes.clone();
            thread::spawn(move || {
                let local = client_addr(i);
                let config = psk_client(&format!("client-{}", i), format!("secret-{}", i).as_bytes());
                let client = Connector::new(Arc::new(config)).unwrap();
                let establishment = client
                    .connect(addr(SERVER), ConnectOptions::new(), now)
                    .unwrap();

                for _ in 0..10_000 {
                    if establishment.is_complete() {
                        break;
                    }
                    loop {
                        match client.poll_output(now) {
                            Output::Timeout(_) => break,
                            Output::Message {
                                connection_id,
                                message,
                                ..
                            } => {
                                server
                                    .handle_message(local, connection_id.as_ref(), message, now)
                                    .unwrap();
                            }
                            _ => {}
                        }
                    }
                    // Any thread may carry another client's answer.
                    route_server_outputs(&server, &routes, now);
                    while let Ok((from, connection_id, message)) = inbox.try_recv() {
                        client
                            .handle_message(from, connection_id.as_ref(), message, now)
                            .unwrap();
                    }
                    thread::yield_now();
                }

                // Let the final flight reach the server.
                loop {
                    match client.poll_output(now) {
                        Output::Timeout(_) => break,
                        Output::Message {
                            connection_id,
                            message,
                            ..
                        } => {
                            server
                                .handle_message(local, connection_id.as_ref(), message, now)
                                .unwrap();
                        }
                        _ => {}
                    }
                }
                route_server_outputs(&server, &routes, now);

                established(&establishment)
            })
        })
        .collect();

    let contexts: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("client thread"))
        .collect();

    let secrets: HashSet<_> = contexts
        .iter()
        .map(|ctx| ctx.master_secret().to_vec())
        .collect();
    assert_eq!(secrets.len(), CLIENTS);

    assert_eq!(server.connection_count(), CLIENTS);
    for i in 0..CLIENTS {
        let session = server.session(client_addr(i)).expect("server session");
        assert_eq!(
            session.identity(),
            &VerifiedIdentity::PskIdentity(format!("client-{}", i))
        );
    }
}
