mod address;
pub mod auth;
pub mod channel;
mod command;
mod envelope;
mod reply;
mod session;
pub mod tls;
mod validation;

#[cfg(test)]
mod tests;

pub use command::Command;
pub use envelope::Envelope;
pub use reply::Reply;
pub use session::{Session, SmtpCommandResult};

use crate::config::Config;
use crate::dns::MxResolver;
use crate::policy::Policy;
use acton_reactive::prelude::Reply as ActorReply;
use acton_reactive::prelude::*;
use anyhow::{Context, Result};
use channel::{drive, Handoff, LineChannel};
use log::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

/// The collaborators every session consults.
#[derive(Clone)]
pub struct Services {
    pub policy: Arc<dyn Policy>,
    pub resolver: Arc<dyn MxResolver>,
}

impl Services {
    pub fn new(policy: Arc<dyn Policy>, resolver: Arc<dyn MxResolver>) -> Self {
        Services { policy, resolver }
    }
}

// --- SmtpListenerActor ---

#[acton_actor]
pub struct SmtpListenerState;

impl SmtpListenerState {
    pub async fn create(
        runtime: &mut ActorRuntime,
        config: &Config,
        services: Services,
    ) -> anyhow::Result<ActorHandle> {
        let actor_config = ActorConfig::new(Ern::with_root("smtp-listener")?, None, None)?
            .with_restart_policy(RestartPolicy::Permanent);

        let acceptor = tls::build_acceptor(config).context("Failed to prepare TLS")?;

        let mut builder = runtime.new_actor_with_config::<Self>(actor_config);

        let cancel = CancellationToken::new();
        let cancel_for_loop = cancel.clone();
        let cancel_for_stop = cancel.clone();

        let smtp_config = Arc::new(config.clone());

        builder.after_start(move |_actor| {
            let config = smtp_config.clone();
            let services = services.clone();
            let acceptor = acceptor.clone();
            let cancel = cancel_for_loop.clone();

            tokio::spawn(async move {
                let addr = format!("{}:{}", config.smtp_bind_address, config.smtp_port);
                let listener = match TcpListener::bind(&addr).await {
                    Ok(l) => {
                        tracing::info!("SMTP server listening on {}", addr);
                        l
                    }
                    Err(e) => {
                        tracing::error!("Failed to bind SMTP: {}", e);
                        return;
                    }
                };

                loop {
                    tokio::select! {
                        result = listener.accept() => {
                            match result {
                                Ok((stream, remote_addr)) => {
                                    tracing::info!("New connection from: {}", remote_addr);
                                    let config = config.clone();
                                    let services = services.clone();
                                    let acceptor = acceptor.clone();
                                    tokio::spawn(async move {
                                        if let Err(e) = handle_connection(stream, remote_addr, config, services, acceptor).await {
                                            tracing::error!("Error handling SMTP connection from {}: {:#}", remote_addr, e);
                                        }
                                    });
                                }
                                Err(e) => tracing::error!("Error accepting connection: {:?}", e),
                            }
                        }
                        _ = cancel.cancelled() => {
                            tracing::info!("SMTP listener shutting down gracefully");
                            break;
                        }
                    }
                }
            });

            ActorReply::ready()
        });

        builder.before_stop(move |_| {
            cancel_for_stop.cancel();
            ActorReply::ready()
        });

        Ok(builder.start().await)
    }
}

// --- Connection handlers ---

async fn handle_connection(
    mut stream: TcpStream,
    remote_addr: SocketAddr,
    config: Arc<Config>,
    services: Services,
    acceptor: TlsAcceptor,
) -> Result<()> {
    let remote_address = remote_addr.ip().to_string();

    if config.secure_connection {
        let tls_stream = accept_tls(&acceptor, stream, &config).await?;
        info!("TLS handshake with {} successful.", remote_address);
        let mut session = Session::new(config.clone(), services, remote_address, true);
        converse(tls_stream, &mut session, &config, true).await?;
        return Ok(());
    }

    let mut session = Session::new(config.clone(), services, remote_address, false);
    let handoff = converse(&mut stream, &mut session, &config, true).await?;
    if handoff != Handoff::StartTls {
        return Ok(());
    }

    info!("Client initiated STARTTLS. Proceeding with handshake.");
    let tls_stream = accept_tls(&acceptor, stream, &config).await?;
    session.tls_established();

    match converse(tls_stream, &mut session, &config, false).await? {
        Handoff::Closed => Ok(()),
        Handoff::StartTls => {
            // The session refuses a second STARTTLS, so this is unreachable in practice.
            warn!("STARTTLS requested on an encrypted channel; closing");
            Ok(())
        }
    }
}

/// Performs the server side of the TLS handshake, bounded by the idle timeout.
async fn accept_tls(
    acceptor: &TlsAcceptor,
    stream: TcpStream,
    config: &Config,
) -> Result<TlsStream<TcpStream>> {
    let limit = Duration::from_secs(config.timeout_secs);
    tokio::time::timeout(limit, acceptor.accept(stream))
        .await
        .context("TLS handshake timed out")?
        .context("TLS handshake failed")
}

/// Runs one phase of the conversation over `stream`.
///
/// Buffered input is dropped with the reader when the phase ends, which
/// discards anything a client pipelined behind STARTTLS.
async fn converse<S>(
    stream: S,
    session: &mut Session,
    config: &Config,
    greet: bool,
) -> Result<Handoff>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let reader = BufReader::new(read_half);
    let writer = BufWriter::new(write_half);
    let mut channel = LineChannel::new(reader, writer, Duration::from_secs(config.timeout_secs));

    if greet {
        channel
            .write_reply(&session.greeting())
            .await
            .context("Failed to send greeting")?;
    }

    Ok(drive(&mut channel, session).await)
}
