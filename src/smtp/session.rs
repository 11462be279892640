//! Implements the per-connection SMTP state machine and command dispatch.
//!
//! A `Session` owns one [`Envelope`] and one [`Authentication`] state and is
//! driven by the transport loop through a single entry point per input kind:
//! [`Session::handle_command`] for command lines, [`Session::data`] and
//! [`Session::data_ready`] while a message body is streaming. Every method
//! takes `&mut self`, so a command's asynchronous validation (MX lookups,
//! policy hooks) completes before the next line can be dispatched.
//!
//! The session never touches the socket. It returns an [`SmtpCommandResult`]
//! telling the channel what to send and which transport action follows.

use super::address::{parse_path, PathError};
use super::auth::{self, Authentication, Mechanism, PASSWORD_PROMPT, USERNAME_PROMPT};
use super::command::Command;
use super::validation::{validate_address, AddressRole};
use super::{Envelope, Reply, Services};
use crate::config::Config;
use bytes::Bytes;
use log::{debug, info, warn};
use std::sync::Arc;

/// Represents the outcome of processing a single SMTP command line.
///
/// Each variant carries the reply to send; the variant tells the channel what
/// to do once the reply is written.
#[derive(Debug)]
pub enum SmtpCommandResult {
    /// Send the reply and keep reading commands.
    Reply(Reply),
    /// Send the reply, then collect the message body until the lone `.` line.
    DataStart(Reply),
    /// Send the reply, then perform the TLS handshake on the same socket.
    StartTls(Reply),
    /// Send the reply, then close the connection.
    Quit(Reply),
}

impl SmtpCommandResult {
    pub fn reply(&self) -> &Reply {
        match self {
            SmtpCommandResult::Reply(reply)
            | SmtpCommandResult::DataStart(reply)
            | SmtpCommandResult::StartTls(reply)
            | SmtpCommandResult::Quit(reply) => reply,
        }
    }
}

pub struct Session {
    config: Arc<Config>,
    services: Services,
    envelope: Envelope,
    auth: Authentication,
    host_name_appears_as: Option<String>,
    remote_address: String,
    secure: bool,
    closed: bool,
    // Set between `354` and the end of the body.
    receiving_data: bool,
}

impl Session {
    /// Creates the state for a freshly accepted connection.
    ///
    /// `secure` is true when the socket is already encrypted (implicit TLS).
    pub fn new(
        config: Arc<Config>,
        services: Services,
        remote_address: impl Into<String>,
        secure: bool,
    ) -> Self {
        let remote_address = remote_address.into();
        Session {
            config,
            services,
            envelope: Envelope::new(remote_address.clone()),
            auth: Authentication::default(),
            host_name_appears_as: None,
            remote_address,
            secure,
            closed: false,
            receiving_data: false,
        }
    }

    /// The 220 banner sent as soon as the connection is established.
    pub fn greeting(&self) -> Reply {
        Reply::new(
            220,
            format!("{} {}", self.config.hostname, self.config.banner),
        )
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn authentication(&self) -> &Authentication {
        &self.auth
    }

    pub fn host_name_appears_as(&self) -> Option<&str> {
        self.host_name_appears_as.as_deref()
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Records that the channel finished its TLS handshake.
    ///
    /// Envelope and HELO identity are kept; clients re-issue EHLO by convention.
    pub fn tls_established(&mut self) {
        info!("TLS established with {}", self.remote_address);
        self.secure = true;
    }

    /// Reply for an idle timeout. The connection is finished afterwards.
    pub fn timeout_reply(&mut self) -> Reply {
        self.closed = true;
        Reply::new(
            421,
            format!("4.4.2 {} Error: timeout exceeded", self.config.hostname),
        )
    }

    /// Reply for a transport failure. The connection is finished afterwards.
    pub fn error_reply(&mut self) -> Reply {
        self.closed = true;
        Reply::new(
            421,
            format!("4.4.2 {} Error: client error", self.config.hostname),
        )
    }

    /// Marks the connection as closed by the transport.
    ///
    /// A message body still being received is abandoned and the policy's
    /// `abort_data` hook is told so.
    pub async fn end(&mut self) {
        if self.receiving_data {
            self.receiving_data = false;
            info!("Message from {} abandoned mid-body", self.remote_address);
            self.services.policy.abort_data(&self.envelope).await;
            self.envelope = self.envelope.renew();
        }
        if !self.closed {
            info!("Connection closed to {}", self.remote_address);
        }
        self.closed = true;
    }

    /// Processes a single command line received from the client.
    pub async fn handle_command(&mut self, command: &Command) -> SmtpCommandResult {
        if self.closed {
            warn!("Command received after close from {}", self.remote_address);
            return SmtpCommandResult::Quit(Reply::new(
                421,
                format!("4.4.2 {} Error: connection closed", self.config.hostname),
            ));
        }

        if self.auth.is_authenticating() {
            // Mid-exchange lines are credentials, not commands; never log them.
            debug!("SMTP({}): Processing AUTH continuation", self.remote_address);
            return SmtpCommandResult::Reply(self.continue_auth(&command.raw).await);
        }

        debug!(
            "SMTP({}): Processing command: {} {:?}",
            self.remote_address, command.verb, command.payload
        );

        match command.verb.as_str() {
            "HELO" => SmtpCommandResult::Reply(self.on_helo(&command.payload)),
            "EHLO" => SmtpCommandResult::Reply(self.on_ehlo(&command.payload)),
            "RSET" => SmtpCommandResult::Reply(self.on_rset()),
            "QUIT" => {
                self.closed = true;
                SmtpCommandResult::Quit(Reply::new(221, "2.0.0 Goodbye!"))
            }
            "VRFY" => SmtpCommandResult::Reply(Reply::new(
                252,
                "2.1.5 Send some mail, I'll try my best",
            )),
            "MAIL" => SmtpCommandResult::Reply(self.on_mail(&command.payload).await),
            "RCPT" => SmtpCommandResult::Reply(self.on_rcpt(&command.payload).await),
            "AUTH" => SmtpCommandResult::Reply(self.on_auth(&command.payload).await),
            "DATA" => self.on_data().await,
            "STARTTLS" => self.on_starttls(),
            _ => SmtpCommandResult::Reply(Self::not_recognized()),
        }
    }

    /// Forwards one chunk of the message body to the policy.
    pub async fn data(&mut self, chunk: Bytes) {
        self.services.policy.data(&self.envelope, chunk).await;
    }

    /// Completes the message: asks the policy for a verdict, then resets the
    /// envelope (authentication is kept).
    pub async fn data_ready(&mut self) -> Reply {
        self.receiving_data = false;
        let verdict = self.services.policy.data_ready(&self.envelope).await;
        self.envelope = self.envelope.renew();

        match verdict {
            Ok(queue_id) => {
                let queue_id = queue_id.unwrap_or_else(|| "FOOBARBAZ".to_string());
                info!("Message from {} queued as {}", self.remote_address, queue_id);
                Reply::new(250, format!("2.0.0 Ok: queued as {}", queue_id))
            }
            Err(rejection) => {
                warn!("Message from {} refused: {}", self.remote_address, rejection);
                rejection
                    .reply()
                    .cloned()
                    .unwrap_or_else(|| Reply::new(550, "FAILED"))
            }
        }
    }

    fn not_recognized() -> Reply {
        Reply::new(502, "5.5.2 Error: command not recognized")
    }

    fn service_line(&self) -> String {
        format!(
            "{} at your service, [{}]",
            self.config.hostname, self.remote_address
        )
    }

    fn greet(&mut self, host: &str) {
        self.host_name_appears_as = Some(host.to_string());
        self.envelope.host = Some(host.to_string());
    }

    fn on_helo(&mut self, host: &str) -> Reply {
        if host.is_empty() {
            return Reply::new(501, "Syntax: EHLO hostname");
        }
        self.greet(host);
        Reply::new(250, self.service_line())
    }

    fn on_ehlo(&mut self, host: &str) -> Reply {
        if self.config.disable_ehlo {
            return Self::not_recognized();
        }
        if host.is_empty() {
            return Reply::new(501, "Syntax: EHLO hostname");
        }
        self.greet(host);

        let mut features = vec![
            self.service_line(),
            "8BITMIME".to_string(),
            "ENHANCEDSTATUSCODES".to_string(),
        ];
        if let Some(max_size) = self.config.max_size {
            features.push(format!("SIZE {}", max_size));
        }
        if self.secure && self.config.require_authentication {
            features.push("AUTH LOGIN PLAIN".to_string());
            features.push("AUTH=LOGIN PLAIN".to_string());
        }
        if !self.secure {
            features.push("STARTTLS".to_string());
        }
        Reply::multiline(250, features)
    }

    fn on_rset(&mut self) -> Reply {
        self.envelope = self.envelope.renew();
        Reply::new(250, "2.0.0 Ok")
    }

    /// The checks every envelope command shares: greeting, TLS, authentication.
    fn transaction_gate(&self) -> Option<Reply> {
        if self.host_name_appears_as.is_none() {
            return Some(Reply::new(503, "5.5.1 Error: send HELO/EHLO first"));
        }
        if let Some(reply) = self.tls_gate() {
            return Some(reply);
        }
        if self.config.require_authentication && !self.auth.authenticated {
            return Some(Reply::new(530, "5.5.1 Authentication Required"));
        }
        None
    }

    fn tls_gate(&self) -> Option<Reply> {
        if self.config.requires_tls() && !self.secure {
            return Some(Reply::new(
                530,
                "5.7.0 Must issue a STARTTLS command first",
            ));
        }
        None
    }

    async fn on_mail(&mut self, argument: &str) -> Reply {
        if let Some(reply) = self.transaction_gate() {
            return reply;
        }
        if self.envelope.has_sender() {
            return Reply::new(503, "5.5.1 Error: nested MAIL command");
        }

        let path = match parse_path(argument, "from:") {
            Ok(path) => path,
            Err(PathError::InvalidSize) => {
                return Reply::new(501, "5.5.4 Invalid SIZE parameter");
            }
            Err(PathError::Syntax) => {
                warn!("Bad sender address syntax: {:?}", argument);
                return Reply::new(501, "5.1.7 Bad sender address syntax");
            }
        };

        let declared_size = path.size();
        if let (Some(max_size), Some(size)) = (self.config.max_size, declared_size) {
            if size > max_size {
                return Reply::new(
                    552,
                    "5.3.4 Error: message exceeds fixed maximum message size",
                );
            }
        }

        self.envelope.message_size = declared_size;
        match validate_address(
            AddressRole::Sender,
            &path,
            &self.envelope,
            &self.config,
            &self.services,
        )
        .await
        {
            Ok(email) => {
                debug!("Sender accepted: {}", email);
                self.envelope.from = Some(email);
                Reply::new(250, "2.1.0 Ok")
            }
            Err(reply) => {
                self.envelope.message_size = None;
                reply
            }
        }
    }

    async fn on_rcpt(&mut self, argument: &str) -> Reply {
        if let Some(reply) = self.transaction_gate() {
            return reply;
        }
        if !self.envelope.has_sender() {
            return Reply::new(503, "5.5.1 Error: need MAIL command");
        }

        let path = match parse_path(argument, "to:") {
            Ok(path) => path,
            Err(_) => {
                warn!("Bad recipient address syntax: {:?}", argument);
                return Reply::new(501, "5.1.3 Bad recipient address syntax");
            }
        };

        match validate_address(
            AddressRole::Recipient,
            &path,
            &self.envelope,
            &self.config,
            &self.services,
        )
        .await
        {
            Ok(email) => {
                if !self.envelope.add_recipient(email.clone()) {
                    debug!("Recipient {} already in envelope", email);
                }
                Reply::new(250, "2.1.5 Ok")
            }
            Err(reply) => reply,
        }
    }

    async fn on_data(&mut self) -> SmtpCommandResult {
        if let Some(reply) = self.tls_gate() {
            return SmtpCommandResult::Reply(reply);
        }
        if !self.envelope.has_recipients() {
            return SmtpCommandResult::Reply(Reply::new(503, "5.5.1 Error: need RCPT command"));
        }

        self.services.policy.start_data(&self.envelope).await;
        self.receiving_data = true;
        SmtpCommandResult::DataStart(Reply::new(354, "End data with <CR><LF>.<CR><LF>"))
    }

    fn on_starttls(&mut self) -> SmtpCommandResult {
        if self.secure {
            return SmtpCommandResult::Reply(Reply::new(554, "5.5.1 Error: TLS already active"));
        }
        SmtpCommandResult::StartTls(Reply::new(220, "2.0.0 Ready to start TLS"))
    }

    async fn on_auth(&mut self, argument: &str) -> Reply {
        if !self.config.require_authentication {
            return Reply::new(503, "5.5.1 Error: authentication not enabled");
        }
        if let Some(reply) = self.tls_gate() {
            return reply;
        }
        if self.auth.authenticated {
            return Reply::new(503, "5.7.0 No identity changes permitted");
        }

        let (name, initial_response) = match argument.split_once(' ') {
            Some((name, rest)) => (name, rest.trim()),
            None => (argument, ""),
        };

        match Mechanism::parse(name) {
            Some(Mechanism::Plain) if initial_response.is_empty() => {
                self.auth.begin(Mechanism::Plain);
                Reply::new(334, "")
            }
            Some(Mechanism::Plain) => self.finish_plain(initial_response).await,
            Some(Mechanism::Login) => {
                self.auth.begin(Mechanism::Login);
                if initial_response.is_empty() {
                    Reply::new(334, USERNAME_PROMPT)
                } else {
                    self.continue_auth(initial_response).await
                }
            }
            None => {
                warn!("Unsupported AUTH mechanism {:?}", name);
                Reply::new(
                    535,
                    "5.7.8 Error: authentication failed: no mechanism available",
                )
            }
        }
    }

    /// Handles a raw line while an AUTH exchange is in progress.
    async fn continue_auth(&mut self, line: &str) -> Reply {
        if line.trim() == "*" {
            self.auth.fail();
            return Reply::new(501, "5.7.0 Authentication aborted");
        }

        if self.auth.mechanism == Some(Mechanism::Plain) {
            return self.finish_plain(line).await;
        }

        match self.auth.username.clone() {
            None => match auth::decode_login(line) {
                Ok(username) => {
                    self.auth.username = Some(username);
                    Reply::new(334, PASSWORD_PROMPT)
                }
                Err(_) => self.undecodable(),
            },
            Some(username) => match auth::decode_login(line) {
                Ok(password) => self.verify(username, password).await,
                Err(_) => self.undecodable(),
            },
        }
    }

    async fn finish_plain(&mut self, payload: &str) -> Reply {
        match auth::decode_plain(payload) {
            Ok((username, password)) => {
                self.auth.username = Some(username.clone());
                self.verify(username, password).await
            }
            Err(_) => self.undecodable(),
        }
    }

    fn undecodable(&mut self) -> Reply {
        self.auth.fail();
        Reply::new(501, "5.5.2 Error: cannot decode response")
    }

    async fn verify(&mut self, username: String, password: String) -> Reply {
        let verdict = self
            .services
            .policy
            .authorize_user(&self.envelope, &username, &password)
            .await;

        let custom_reply = match verdict {
            Ok(true) => {
                info!("User '{}' authenticated from {}", username, self.remote_address);
                self.auth.succeed(username);
                return Reply::new(235, "2.7.0 Authentication successful");
            }
            Ok(false) => None,
            Err(rejection) => rejection.reply().cloned(),
        };

        warn!("Authentication failed for '{}' from {}", username, self.remote_address);
        self.auth.fail();
        custom_reply.unwrap_or_else(|| {
            Reply::new(535, "5.7.8 Error: authentication failed: generic failure")
        })
    }
}
