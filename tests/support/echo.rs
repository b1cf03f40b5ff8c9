use tokio::{io::AsyncWriteExt, net::TcpListener};

/// Starts a TCP echo service on loopback and returns its port.
///
/// Each connection echoes until EOF, then shuts its write side down.
pub async fn start_echo() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut rx, mut tx) = socket.into_split();
                if tokio::io::copy(&mut rx, &mut tx).await.is_ok() {
                    tx.shutdown().await.ok();
                }
            });
        }
    });
    port
}
