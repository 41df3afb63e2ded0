//! Pairing session actor
//!
//! One [`PairingSession`] is one attempt: it generates a fresh client
//! identity, opens TLS to the pairing port, drives a [`PairingHandshake`] and
//! reports [`PairingEvent`]s to its owner. A failed or disposed session is
//! finished; pairing again means spawning a new one.

use super::events::PairingEvent;
use super::handshake::{HandshakeStep, PairingHandshake, PairingPhase};
use crate::certificate::ClientIdentity;
use crate::observer::{ErrorContext, Observer};
use crate::transport::{connect_tls, MessageStream};
use crate::{Credentials, ProtocolError, Result, PAIRING_PORT};
use openssl::x509::X509;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default timeout for each protocol step
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time the user has to type the code
pub const DEFAULT_CODE_TIMEOUT: Duration = Duration::from_secs(120);

/// Service name announced in the pairing request
pub const DEFAULT_SERVICE_NAME: &str = "atvremote";

/// Client name shown on the TV
pub const DEFAULT_CLIENT_NAME: &str = "tvlink";

/// Pairing session configuration
#[derive(Debug, Clone)]
pub struct PairingConfig {
    /// TLS port of the pairing service
    pub port: u16,
    /// Timeout for every step that waits on the TV
    pub step_timeout: Duration,
    /// Timeout for the user to enter the code
    pub code_timeout: Duration,
    /// Client name (also the certificate common name)
    pub client_name: String,
    /// Service name
    pub service_name: String,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            port: PAIRING_PORT,
            step_timeout: DEFAULT_STEP_TIMEOUT,
            code_timeout: DEFAULT_CODE_TIMEOUT,
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

/// Handle to a running pairing attempt
///
/// Dropping the handle disposes the attempt.
pub struct PairingSession {
    code_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PairingSession {
    /// Start pairing with the TV at `ip`
    pub fn spawn(
        ip: IpAddr,
        config: PairingConfig,
        events: mpsc::Sender<PairingEvent>,
        observer: Arc<dyn Observer>,
    ) -> Self {
        let addr = SocketAddr::new(ip, config.port);
        let client_name = config.client_name.clone();
        let connect_timeout = config.step_timeout;

        Self::launch(ip.to_string(), config, events, observer, async move {
            let identity = ClientIdentity::generate_async(client_name).await?;
            let (stream, server_certificate) =
                connect_tls(addr, &identity, connect_timeout).await?;
            Ok((stream, identity, server_certificate))
        })
    }

    /// Run the handshake over an already-open transport
    ///
    /// `server_certificate` is the certificate the peer presented when the
    /// transport was established.
    pub fn over_stream<S>(
        peer: impl Into<String>,
        stream: S,
        identity: ClientIdentity,
        server_certificate: X509,
        config: PairingConfig,
        events: mpsc::Sender<PairingEvent>,
        observer: Arc<dyn Observer>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::launch(peer.into(), config, events, observer, async move {
            Ok((stream, identity, server_certificate))
        })
    }

    fn launch<S, F>(
        peer: String,
        config: PairingConfig,
        events: mpsc::Sender<PairingEvent>,
        observer: Arc<dyn Observer>,
        connect: F,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        F: Future<Output = Result<(S, ClientIdentity, X509)>> + Send + 'static,
    {
        let (code_tx, code_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let worker = Worker {
            peer,
            config,
            code_rx,
            events,
            observer,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run(connect));

        Self {
            code_tx,
            cancel,
            task,
        }
    }

    /// Hand the code shown on the TV to the session
    pub fn submit_code(&self, code: impl Into<String>) -> Result<()> {
        if self.is_disposed() {
            return Err(ProtocolError::Disposed);
        }
        self.code_tx.try_send(code.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                ProtocolError::InvalidMessage("A pairing code was already submitted".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => ProtocolError::Disposed,
        })
    }

    /// Stop the attempt and close its socket; idempotent
    pub fn dispose(&self) {
        if !self.cancel.is_cancelled() {
            debug!("Disposing pairing session");
        }
        self.cancel.cancel();
        self.task.abort();
    }

    pub fn is_disposed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for PairingSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

struct PairingFailure {
    phase: PairingPhase,
    error: ProtocolError,
}

fn failed_in(phase: PairingPhase) -> impl Fn(ProtocolError) -> PairingFailure + Copy {
    move |error| PairingFailure { phase, error }
}

struct Worker {
    peer: String,
    config: PairingConfig,
    code_rx: mpsc::Receiver<String>,
    events: mpsc::Sender<PairingEvent>,
    observer: Arc<dyn Observer>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run<S, F>(mut self, connect: F)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        F: Future<Output = Result<(S, ClientIdentity, X509)>> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(ip = %self.peer, "Pairing disposed");
                return;
            }
            outcome = self.pair(connect) => outcome,
        };

        match outcome {
            Ok(credentials) => {
                info!(ip = %self.peer, "Pairing complete");
                self.emit(PairingEvent::Paired(credentials)).await;
            }
            Err(PairingFailure { phase, error }) => {
                self.observer.on_error(
                    &ErrorContext::new(self.peer.clone(), format!("pairing.{}", phase)),
                    &error,
                );
                self.emit(PairingEvent::Failed {
                    phase,
                    message: error.to_string(),
                })
                .await;
            }
        }
    }

    async fn pair<S, F>(&mut self, connect: F) -> std::result::Result<Credentials, PairingFailure>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        F: Future<Output = Result<(S, ClientIdentity, X509)>>,
    {
        let (stream, identity, server_certificate) =
            connect.await.map_err(failed_in(PairingPhase::Connecting))?;

        let mut handshake = PairingHandshake::new(
            identity,
            server_certificate,
            self.config.service_name.clone(),
            self.config.client_name.clone(),
        );
        let mut messages = MessageStream::new(stream, self.observer.clone());

        let result = self.drive(&mut handshake, &mut messages).await;
        messages.shutdown().await;
        result?;

        if handshake.reduced_assurance() {
            warn!(ip = %self.peer, "Paired with reduced assurance: TV secret did not verify");
        }

        Ok(Credentials::new(
            handshake.identity().clone(),
            handshake.server_certificate().clone(),
        ))
    }

    async fn drive<S>(
        &mut self,
        handshake: &mut PairingHandshake,
        messages: &mut MessageStream<S>,
    ) -> std::result::Result<(), PairingFailure>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request = handshake
            .start()
            .map_err(failed_in(PairingPhase::Connecting))?;
        messages
            .send(&request)
            .await
            .map_err(failed_in(handshake.phase()))?;

        let mut phase = handshake.phase();
        let mut deadline = Instant::now() + self.config.step_timeout;

        loop {
            if handshake.phase() != phase {
                phase = handshake.phase();
                let window = match phase {
                    PairingPhase::WaitingForCode => self.config.code_timeout,
                    _ => self.config.step_timeout,
                };
                deadline = Instant::now() + window;
            }
            let fail = failed_in(phase);

            match phase {
                PairingPhase::Complete => return Ok(()),
                PairingPhase::WaitingForCode => {
                    tokio::select! {
                        code = self.code_rx.recv() => {
                            let code = code.ok_or(ProtocolError::Disposed).map_err(fail)?;
                            let secret = handshake.submit_code(&code).map_err(fail)?;
                            messages.send(&secret).await.map_err(fail)?;
                        }
                        received = messages.recv() => {
                            self.apply(handshake, messages, received).await.map_err(fail)?;
                        }
                        _ = sleep_until(deadline) => {
                            return Err(fail(ProtocolError::Timeout(phase.awaiting().to_string())));
                        }
                    }
                }
                _ => {
                    tokio::select! {
                        received = messages.recv() => {
                            self.apply(handshake, messages, received).await.map_err(fail)?;
                        }
                        _ = sleep_until(deadline) => {
                            return Err(fail(ProtocolError::Timeout(phase.awaiting().to_string())));
                        }
                    }
                }
            }
        }
    }

    async fn apply<S>(
        &self,
        handshake: &mut PairingHandshake,
        messages: &mut MessageStream<S>,
        received: Result<crate::codec::Envelope>,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let envelope = match received {
            Ok(envelope) => envelope,
            Err(ProtocolError::InvalidMessage(message)) => {
                warn!(ip = %self.peer, "Dropping malformed frame: {}", message);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match handshake.handle(&envelope)? {
            HandshakeStep::Send(envelopes) => {
                for envelope in &envelopes {
                    messages.send(envelope).await?;
                }
            }
            HandshakeStep::AwaitCode => {
                info!(ip = %self.peer, "TV is displaying the pairing code");
                self.emit(PairingEvent::PromptReceived).await;
            }
            HandshakeStep::Complete | HandshakeStep::Ignore => {}
        }
        Ok(())
    }

    async fn emit(&self, event: PairingEvent) {
        if self.cancel.is_cancelled() {
            return;
        }
        if self.events.send(event).await.is_err() {
            debug!(ip = %self.peer, "Pairing event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_frame, Envelope, STATUS_BAD_CONFIGURATION};
    use crate::messages::pairing::{message_type, PairingRequestAck, PairingSecret};
    use crate::messages::PairingMessage;
    use crate::observer::NoopObserver;
    use crate::pairing::handshake::tests::{code, identities};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn session(stream: DuplexStream, config: PairingConfig) -> (PairingSession, mpsc::Receiver<PairingEvent>) {
        let (client, server) = identities();
        let (tx, rx) = mpsc::channel(8);
        let session = PairingSession::over_stream(
            "tv",
            stream,
            client.clone(),
            server.certificate.clone(),
            config,
            tx,
            Arc::new(NoopObserver),
        );
        (session, rx)
    }

    /// Plays the TV side up to the code prompt
    async fn tv_until_prompt(tv: &mut MessageStream<DuplexStream>) {
        let request = tv.recv().await.unwrap();
        assert_eq!(request.message_type, message_type::PAIRING_REQUEST);
        tv.send(
            &PairingMessage::RequestAck(PairingRequestAck {
                server_name: "tv".to_string(),
            })
            .to_envelope(),
        )
        .await
        .unwrap();
        assert_eq!(tv.recv().await.unwrap().message_type, message_type::OPTIONS);
        assert_eq!(tv.recv().await.unwrap().message_type, message_type::CONFIGURATION);
        tv.send(&PairingMessage::ConfigurationAck.to_envelope())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_pairs_over_stream() {
        let (client_side, tv_side) = duplex(4096);
        let (session, mut events) = session(client_side, PairingConfig::default());
        let mut tv = MessageStream::new(tv_side, Arc::new(NoopObserver));

        tv_until_prompt(&mut tv).await;
        assert!(matches!(events.recv().await, Some(PairingEvent::PromptReceived)));

        session.submit_code(code(true)).unwrap();
        let secret = tv.recv().await.unwrap();
        assert_eq!(secret.message_type, message_type::SECRET);
        tv.send(
            &PairingMessage::SecretAck(PairingSecret {
                secret: vec![1; 32],
            })
            .to_envelope(),
        )
        .await
        .unwrap();

        match events.recv().await {
            Some(PairingEvent::Paired(credentials)) => {
                let (_, server) = identities();
                assert_eq!(
                    credentials.server_certificate.to_der().unwrap(),
                    server.certificate.to_der().unwrap()
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wrong_code_writes_nothing() {
        let (client_side, tv_side) = duplex(4096);
        let (session, mut events) = session(client_side, PairingConfig::default());
        let mut tv = MessageStream::new(tv_side, Arc::new(NoopObserver));

        tv_until_prompt(&mut tv).await;
        assert!(matches!(events.recv().await, Some(PairingEvent::PromptReceived)));

        session.submit_code(code(false)).unwrap();
        match events.recv().await {
            Some(PairingEvent::Failed { phase, message }) => {
                assert_eq!(phase, PairingPhase::WaitingForCode);
                assert!(message.contains("Verification failed"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let mut rest = Vec::new();
        let mut raw = tv.into_inner();
        raw.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty(), "wrote {:?} after a bad code", rest);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_dropped() {
        let (client_side, tv_side) = duplex(4096);
        let (_session, mut events) = session(client_side, PairingConfig::default());
        let mut tv = MessageStream::new(tv_side, Arc::new(NoopObserver));
        assert_eq!(
            tv.recv().await.unwrap().message_type,
            message_type::PAIRING_REQUEST
        );

        // Well framed, but the version varint runs past 32 bits
        let mut raw = tv.into_inner();
        raw.write_all(&encode_frame(&[0x08, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F]))
            .await
            .unwrap();
        let mut tv = MessageStream::new(raw, Arc::new(NoopObserver));

        tv.send(
            &PairingMessage::RequestAck(PairingRequestAck {
                server_name: "tv".to_string(),
            })
            .to_envelope(),
        )
        .await
        .unwrap();
        assert_eq!(tv.recv().await.unwrap().message_type, message_type::OPTIONS);
        assert_eq!(tv.recv().await.unwrap().message_type, message_type::CONFIGURATION);
        tv.send(&PairingMessage::ConfigurationAck.to_envelope())
            .await
            .unwrap();

        assert!(matches!(events.recv().await, Some(PairingEvent::PromptReceived)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_timeout_names_phase() {
        let (client_side, tv_side) = duplex(4096);
        let (_session, mut events) = session(client_side, PairingConfig::default());
        let mut tv = MessageStream::new(tv_side, Arc::new(NoopObserver));

        // Swallow the request and never answer
        tv.recv().await.unwrap();

        match events.recv().await {
            Some(PairingEvent::Failed { phase, message }) => {
                assert_eq!(phase, PairingPhase::WaitingForOptions);
                assert_eq!(message, "Timed out waiting for pairing request ack");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bad_status_fails_session() {
        let (client_side, tv_side) = duplex(4096);
        let (_session, mut events) = session(client_side, PairingConfig::default());
        let mut tv = MessageStream::new(tv_side, Arc::new(NoopObserver));

        tv.recv().await.unwrap();
        let mut rejected = PairingMessage::ConfigurationAck.to_envelope();
        rejected.status = STATUS_BAD_CONFIGURATION;
        tv.send(&rejected).await.unwrap();

        assert!(matches!(
            events.recv().await,
            Some(PairingEvent::Failed { phase: PairingPhase::WaitingForOptions, .. })
        ));
    }

    #[tokio::test]
    async fn test_close_before_complete_fails() {
        let (client_side, tv_side) = duplex(4096);
        let (_session, mut events) = session(client_side, PairingConfig::default());
        let mut tv = MessageStream::new(tv_side, Arc::new(NoopObserver));
        tv.recv().await.unwrap();
        drop(tv);

        match events.recv().await {
            Some(PairingEvent::Failed { message, .. }) => {
                assert!(message.contains("Connection closed"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispose_suppresses_events() {
        let (client_side, tv_side) = duplex(4096);
        let (session, mut events) = session(client_side, PairingConfig::default());
        let mut tv = MessageStream::new(tv_side, Arc::new(NoopObserver));
        tv.recv().await.unwrap();

        session.dispose();
        session.dispose();
        assert!(session.is_disposed());
        assert!(matches!(session.submit_code("ABCDEF"), Err(ProtocolError::Disposed)));

        let _ = tv
            .send(&Envelope::pairing(message_type::PAIRING_REQUEST_ACK, Vec::new()))
            .await;
        assert!(events.recv().await.is_none());
    }
}
