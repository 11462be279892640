//! Line-oriented transport for one SMTP connection.
//!
//! `LineChannel` reads CRLF-terminated lines and writes [`Reply`] values over
//! any buffered async reader/writer pair. [`drive`] feeds those lines into a
//! [`Session`] until the connection ends or the client asks for STARTTLS.

use super::command::Command;
use super::session::{Session, SmtpCommandResult};
use super::Reply;
use crate::error::ChannelError;
use bytes::Bytes;
use log::{debug, info, warn};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Longest line accepted in command or data mode, terminator included.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Why [`drive`] handed control back to the connection handler.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Handoff {
    /// The conversation is over; drop the socket.
    Closed,
    /// `220` has been sent for STARTTLS; upgrade the socket and drive again.
    StartTls,
}

pub struct LineChannel<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    reader: R,
    writer: W,
    timeout: Duration,
}

impl<R, W> LineChannel<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, timeout: Duration) -> Self {
        LineChannel {
            reader,
            writer,
            timeout,
        }
    }

    /// Reads one line with its terminator removed.
    ///
    /// Returns `Ok(None)` on a clean EOF. A line still missing its `\n` after
    /// [`MAX_LINE_LENGTH`] bytes fails with [`ChannelError::LineTooLong`].
    pub async fn read_line(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        let mut buffer = Vec::new();
        let limit = MAX_LINE_LENGTH as u64;
        let mut limited = (&mut self.reader).take(limit);
        let read = limited.read_until(b'\n', &mut buffer);

        let bytes_read = tokio::time::timeout(self.timeout, read)
            .await
            .map_err(|_| ChannelError::Timeout)??;

        if bytes_read == 0 {
            return Ok(None);
        }
        if buffer.last() != Some(&b'\n') && bytes_read >= MAX_LINE_LENGTH {
            return Err(ChannelError::LineTooLong {
                max: MAX_LINE_LENGTH,
            });
        }

        while matches!(buffer.last(), Some(b'\n') | Some(b'\r')) {
            buffer.pop();
        }
        debug!("SMTP Read: {} bytes", buffer.len());
        Ok(Some(buffer))
    }

    /// Writes a reply and flushes it to the peer.
    pub async fn write_reply(&mut self, reply: &Reply) -> Result<(), ChannelError> {
        debug!("SMTP Write: {}", reply.to_string().trim_end());
        self.writer.write_all(reply.to_string().as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn writer(&self) -> &W {
        &self.writer
    }
}

/// Runs the command loop until the session closes or STARTTLS is accepted.
///
/// Transport failures are answered with the session's `421` reply here, so
/// the caller only sees which way the conversation ended.
pub async fn drive<R, W>(channel: &mut LineChannel<R, W>, session: &mut Session) -> Handoff
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match converse(channel, session).await {
        Ok(handoff) => handoff,
        Err(ChannelError::Timeout) => {
            info!("Client timed out");
            let reply = session.timeout_reply();
            if let Err(e) = channel.write_reply(&reply).await {
                debug!("Could not deliver timeout reply: {}", e);
            }
            session.end().await;
            Handoff::Closed
        }
        Err(e) => {
            warn!("Client connection error: {}", e);
            let reply = session.error_reply();
            if let Err(e) = channel.write_reply(&reply).await {
                debug!("Could not deliver error reply: {}", e);
            }
            session.end().await;
            Handoff::Closed
        }
    }
}

async fn converse<R, W>(
    channel: &mut LineChannel<R, W>,
    session: &mut Session,
) -> Result<Handoff, ChannelError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let line = match channel.read_line().await? {
            Some(line) => line,
            None => {
                info!("Connection closed by client (EOF)");
                session.end().await;
                return Ok(Handoff::Closed);
            }
        };

        let command = Command::parse(&String::from_utf8_lossy(&line));
        let result = session.handle_command(&command).await;
        channel.write_reply(result.reply()).await?;

        match result {
            SmtpCommandResult::Reply(_) => {}
            SmtpCommandResult::Quit(_) => {
                session.end().await;
                return Ok(Handoff::Closed);
            }
            SmtpCommandResult::StartTls(_) => return Ok(Handoff::StartTls),
            SmtpCommandResult::DataStart(_) => {
                if !receive_data(channel, session).await? {
                    info!("Connection closed by client (EOF) during DATA");
                    session.end().await;
                    return Ok(Handoff::Closed);
                }
            }
        }
    }
}

/// Streams the message body into the session. Returns `false` on EOF.
async fn receive_data<R, W>(
    channel: &mut LineChannel<R, W>,
    session: &mut Session,
) -> Result<bool, ChannelError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let Some(line) = channel.read_line().await? else {
            return Ok(false);
        };

        if line == b"." {
            let reply = session.data_ready().await;
            channel.write_reply(&reply).await?;
            return Ok(true);
        }

        session.data(unstuff(line)).await;
    }
}

/// Removes one leading dot and restores the line terminator.
fn unstuff(mut line: Vec<u8>) -> Bytes {
    if line.first() == Some(&b'.') {
        line.remove(0);
    }
    line.extend_from_slice(b"\r\n");
    Bytes::from(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::{self, BufReader};

    fn channel_over(input: &[u8]) -> LineChannel<BufReader<Cursor<Vec<u8>>>, Vec<u8>> {
        LineChannel::new(
            BufReader::new(Cursor::new(input.to_vec())),
            Vec::new(),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_read_line_strips_crlf_and_lf() {
        let mut channel = channel_over(b"HELO example.com\r\nMAIL FROM:<a@b.c>\n");
        assert_eq!(
            channel.read_line().await.unwrap().as_deref(),
            Some(&b"HELO example.com"[..])
        );
        assert_eq!(
            channel.read_line().await.unwrap().as_deref(),
            Some(&b"MAIL FROM:<a@b.c>"[..])
        );
        assert!(channel.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_line_eof_returns_none() {
        let mut channel = LineChannel::new(
            BufReader::new(io::empty()),
            io::sink(),
            Duration::from_secs(5),
        );
        assert!(channel.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_line_rejects_overlong_lines() {
        let input = vec![b'a'; MAX_LINE_LENGTH + 10];
        let mut channel = channel_over(&input);
        let err = channel.read_line().await.unwrap_err();
        assert!(matches!(err, ChannelError::LineTooLong { max } if max == MAX_LINE_LENGTH));
    }

    #[tokio::test]
    async fn test_read_line_times_out() {
        let (client, server) = io::duplex(64);
        let mut channel = LineChannel::new(
            BufReader::new(server),
            io::sink(),
            Duration::from_millis(20),
        );
        let err = channel.read_line().await.unwrap_err();
        assert!(matches!(err, ChannelError::Timeout));
        drop(client);
    }

    #[tokio::test]
    async fn test_write_reply_flushes_wire_format() {
        let mut channel = channel_over(b"");
        channel
            .write_reply(&Reply::multiline(250, vec!["first".to_string(), "second".to_string()]))
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8(channel.writer().clone()).unwrap(),
            "250-first\r\n250 second\r\n"
        );
    }

    #[test]
    fn test_unstuff_removes_only_one_dot() {
        assert_eq!(unstuff(b"..hidden".to_vec()), Bytes::from_static(b".hidden\r\n"));
        assert_eq!(unstuff(b"plain".to_vec()), Bytes::from_static(b"plain\r\n"));
        assert_eq!(unstuff(Vec::new()), Bytes::from_static(b"\r\n"));
    }
}
