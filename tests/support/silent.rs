use tokio::net::TcpListener;

/// Starts a TCP service that accepts connections, keeps them open and never
/// writes a byte, so an SSH client waits forever for the server banner.
pub async fn start_silent() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    port
}
