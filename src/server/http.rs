use std::thread;

use axum::Router;
use camino::Utf8PathBuf;
use console::style;
use tower_http::services::ServeDir;
use tracing::{error, info};

/// Serves `dir` on `host:port` from a dedicated thread. The thread ends, and
/// logs why, when the server cannot start or stops.
pub fn serve(dir: Utf8PathBuf, host: String, port: u16) -> thread::JoinHandle<()> {
    info!(url = %style(format!("http://{host}:{port}/")).yellow(), "starting a HTTP server");

    thread::spawn(move || {
        if let Err(e) = run(dir, &host, port) {
            error!("HTTP server on {host}:{port} stopped: {e:#}");
        }
    })
}

fn run(dir: Utf8PathBuf, host: &str, port: u16) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(listen(dir, host.to_string(), port))
}

async fn listen(dir: Utf8PathBuf, host: String, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;

    let router = Router::new().fallback_service(ServeDir::new(dir));

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taken_port_ends_the_thread() {
        let taken = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = taken.local_addr().unwrap().port();
        let dir = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

        let err = run(dir.clone(), "127.0.0.1", port).unwrap_err();
        assert!(err.downcast_ref::<std::io::Error>().is_some());

        // The failure is logged and the thread finishes instead of panicking.
        serve(dir, "127.0.0.1".into(), port).join().unwrap();
    }
}
