use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use russh::{
    Channel,
    keys::{Algorithm, PrivateKey, PublicKey, ssh_key::rand_core::OsRng},
    server::{self, Auth, Msg, Session},
};
use tokio::net::{TcpListener, TcpStream};

/// In-process SSH server that accepts any credentials (unless told to reject
/// them) and, when allowed,
/// serves `direct-tcpip` channels by dialing the requested target.
pub struct TestSshServer {
    pub port: u16,
    public_key: PublicKey,
    events: Arc<Mutex<Vec<String>>>,
}

impl TestSshServer {
    pub async fn start() -> Self {
        Self::start_with(true, true).await
    }

    /// a server that refuses every forwarding request
    pub async fn start_refusing() -> Self {
        Self::start_with(true, false).await
    }

    /// a server that rejects every login attempt
    pub async fn start_rejecting() -> Self {
        Self::start_with(false, true).await
    }

    async fn start_with(accept_auth: bool, allow_forwarding: bool) -> Self {
        let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        let public_key = key.public_key().clone();
        let config = Arc::new(server::Config {
            keys: vec![key],
            auth_rejection_time: Duration::from_millis(10),
            auth_rejection_time_initial: Some(Duration::from_millis(0)),
            ..Default::default()
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let events = Arc::new(Mutex::new(Vec::new()));

        let session_events = Arc::clone(&events);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let handler = TestHandler {
                    accept_auth,
                    allow_forwarding,
                    events: Arc::clone(&session_events),
                };
                let config = Arc::clone(&config);
                tokio::spawn(async move {
                    if let Ok(session) = server::run_stream(config, socket, handler).await {
                        let _ = session.await;
                    }
                });
            }
        });

        TestSshServer {
            port,
            public_key,
            events,
        }
    }

    pub fn fingerprint(&self) -> String {
        self.public_key.fingerprint(Default::default()).to_string()
    }

    /// `password:<user>`, `publickey:<user>` and `direct-tcpip:<host>:<port>`
    /// entries, in the order they happened
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

struct TestHandler {
    accept_auth: bool,
    allow_forwarding: bool,
    events: Arc<Mutex<Vec<String>>>,
}

impl TestHandler {
    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn auth(&self) -> Auth {
        if self.accept_auth {
            Auth::Accept
        } else {
            Auth::Reject { proceed_with_methods: None }
        }
    }
}

impl server::Handler for TestHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, _password: &str) -> Result<Auth, Self::Error> {
        self.record(format!("password:{user}"));
        Ok(self.auth())
    }

    async fn auth_publickey(&mut self, user: &str, _public_key: &PublicKey) -> Result<Auth, Self::Error> {
        self.record(format!("publickey:{user}"));
        Ok(self.auth())
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let target = format!("{host_to_connect}:{port_to_connect}");
        self.record(format!("direct-tcpip:{target}"));
        if !self.allow_forwarding {
            return Ok(false);
        }
        tokio::spawn(async move {
            if let Ok(mut stream) = TcpStream::connect(&target).await {
                let mut channel_stream = channel.into_stream();
                let _ = tokio::io::copy_bidirectional(&mut stream, &mut channel_stream).await;
            }
        });
        Ok(true)
    }
}
