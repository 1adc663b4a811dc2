use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tungstenite::WebSocket;

use super::Reload;

/// Connections kept open; older tabs are closed first.
const MAX_CLIENTS: usize = 10;

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

/// Binds the reload socket on `preferred`, or on any free port when it is
/// taken.
pub fn reserve_port(host: &str, preferred: u16) -> std::io::Result<TcpListener> {
    match TcpListener::bind((host, preferred)) {
        Ok(listener) => Ok(listener),
        Err(e) => {
            tracing::warn!("reload port {preferred} unavailable ({e}), picking another");
            TcpListener::bind((host, 0))
        }
    }
}

/// WebSocket endpoint that browsers connect to and wait for `"reload"` on.
pub struct ReloadHub {
    port: u16,
    clients: Clients,
    tx: Sender<()>,
    _threads: (JoinHandle<()>, JoinHandle<()>),
}

impl ReloadHub {
    pub fn start(listener: TcpListener) -> std::io::Result<Self> {
        let port = listener.local_addr()?.port();
        let clients: Clients = Arc::new(Mutex::new(vec![]));

        let incoming = new_thread_ws_incoming(listener, clients.clone());
        let (tx, outgoing) = new_thread_ws_reload(clients.clone());

        tracing::info!("live reload listening on port {port}");

        Ok(Self {
            port,
            clients,
            tx,
            _threads: (incoming, outgoing),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn clients(&self) -> usize {
        self.clients.lock().unwrap().len()
    }
}

impl Reload for ReloadHub {
    fn reload(&self) {
        // The broadcast thread lives as long as the hub.
        self.tx.send(()).ok();
    }
}

fn new_thread_ws_incoming(server: TcpListener, clients: Clients) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::debug!("reload connection failed: {e}");
                    continue;
                }
            };

            match tungstenite::accept(stream) {
                Ok(socket) => clients.lock().unwrap().push(socket),
                Err(e) => tracing::debug!("reload handshake failed: {e}"),
            }
        }
    })
}

fn new_thread_ws_reload(clients: Clients) -> (Sender<()>, JoinHandle<()>) {
    let (tx, rx) = channel();

    let thread = std::thread::spawn(move || {
        while rx.recv().is_ok() {
            let mut clients = clients.lock().unwrap();
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send("reload".into()) {
                    Ok(_) => {}
                    Err(tungstenite::error::Error::Io(e)) => {
                        if e.kind() == std::io::ErrorKind::BrokenPipe {
                            broken.push(i);
                        }
                    }
                    Err(
                        tungstenite::error::Error::ConnectionClosed
                        | tungstenite::error::Error::AlreadyClosed,
                    ) => broken.push(i),
                    Err(e) => {
                        tracing::error!("reload error: {e:?}");
                    }
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            let len = clients.len();
            if len > MAX_CLIENTS {
                for mut socket in clients.drain(0..len - MAX_CLIENTS) {
                    socket.close(None).ok();
                }
            }

            tracing::debug!("reload sent to {} clients", clients.len());
        }
    });

    (tx, thread)
}
