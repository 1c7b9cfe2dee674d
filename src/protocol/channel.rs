//! Connections to the control and stop ports.
//!
//! The two ports are distinct types so a command can only be issued on the
//! port it belongs to. In particular STOP for a running acquisition goes out
//! on a [`StopChannel`] while the [`ControlChannel`] may be blocked reading
//! frames.

use super::codec::{self, Arg, FieldKind, Fields};
use super::io::{read_bytes, read_message, read_result, write_packet};
use super::types::{CommandCode, ResultType};
use crate::error::{DetectorError, Result};
use crate::transport::{Dialer, Port};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tracing::{debug, warn};

/// A decoded reply, branching on its result tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok(Fields),
    Finished(Fields),
    ForceUpdate(Fields),
    /// Device-provided failure text
    Fail(String),
}

impl Reply {
    pub fn result_type(&self) -> ResultType {
        match self {
            Reply::Ok(_) => ResultType::Ok,
            Reply::Finished(_) => ResultType::Finished,
            Reply::ForceUpdate(_) => ResultType::ForceUpdate,
            Reply::Fail(_) => ResultType::Fail,
        }
    }

    /// Turn a FAIL into a protocol error carrying the device text.
    pub fn into_response(self) -> Result<Response> {
        let result = self.result_type();
        match self {
            Reply::Ok(fields) | Reply::Finished(fields) | Reply::ForceUpdate(fields) => Ok(Response { result, fields }),
            Reply::Fail(message) => Err(DetectorError::Protocol(message)),
        }
    }
}

/// A successful reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub result: ResultType,
    pub fields: Fields,
}

/// A typed command result together with the reply tag it arrived with.
#[derive(Debug, Clone, PartialEq)]
pub struct Tagged<T> {
    pub result: ResultType,
    pub value: T,
}

impl<T> Tagged<T> {
    pub(crate) fn new(result: ResultType, value: T) -> Self {
        Self { result, value }
    }
}

/// A buffered connection to one device port.
pub struct Connection<S> {
    stream: BufReader<S>,
    port: Port,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    pub fn new(stream: S, port: Port) -> Self {
        Self {
            stream: BufReader::new(stream),
            port,
        }
    }

    pub fn port(&self) -> Port {
        self.port
    }

    /// Send a request without waiting for any reply.
    pub async fn write_request(&mut self, code: CommandCode, args: &[Arg<'_>]) -> Result<()> {
        debug!("{:?} request {code:?}", self.port);
        let packet = codec::encode(code, args);
        write_packet(&mut self.stream, &packet).await
    }

    /// Send a request and read back exactly one reply.
    ///
    /// The result tag is read first. Only OK, FINISHED and FORCE_UPDATE are
    /// followed by `reply_layout`; FAIL is followed by its message and
    /// nothing else is read.
    pub async fn exchange(&mut self, code: CommandCode, args: &[Arg<'_>], reply_layout: &[FieldKind]) -> Result<Reply> {
        self.write_request(code, args).await?;
        let result = self.read_result().await?;

        let reply = match result {
            ResultType::Fail => {
                let message = self.read_message().await?;
                warn!("{code:?} failed on {:?} port: {message}", self.port);
                Reply::Fail(message)
            }
            ResultType::Ok => Reply::Ok(self.read_fields(reply_layout).await?),
            ResultType::Finished => Reply::Finished(self.read_fields(reply_layout).await?),
            ResultType::ForceUpdate => Reply::ForceUpdate(self.read_fields(reply_layout).await?),
        };
        Ok(reply)
    }

    /// Request/reply round trip; a FAIL reply becomes a protocol error.
    pub async fn send_request(
        &mut self,
        code: CommandCode,
        args: &[Arg<'_>],
        reply_layout: &[FieldKind],
    ) -> Result<Response> {
        self.exchange(code, args, reply_layout).await?.into_response()
    }

    pub async fn read_result(&mut self) -> Result<ResultType> {
        read_result(&mut self.stream).await
    }

    pub async fn read_bytes(&mut self, size: usize) -> Result<Vec<u8>> {
        read_bytes(&mut self.stream, size).await
    }

    pub async fn read_message(&mut self) -> Result<String> {
        read_message(&mut self.stream).await
    }

    /// Wait until reply bytes are buffered or the peer closed.
    ///
    /// Cancel safe: whatever arrived stays buffered for the next read.
    pub async fn wait_readable(&mut self) -> Result<()> {
        self.stream
            .fill_buf()
            .await
            .map(|_| ())
            .map_err(|e| DetectorError::connection(format!("Read failed: {e}")))
    }

    async fn read_fields(&mut self, layout: &[FieldKind]) -> Result<Fields> {
        if layout.is_empty() {
            return Ok(Fields::default());
        }
        let body = self.read_bytes(codec::layout_size(layout)).await?;
        codec::decode(layout, &body)
    }
}

/// Connection to the control port.
pub struct ControlChannel<S>(pub(crate) Connection<S>);

/// Connection to the stop port.
pub struct StopChannel<S>(pub(crate) Connection<S>);

impl<S: AsyncRead + AsyncWrite + Unpin> ControlChannel<S> {
    /// Dial a fresh control connection.
    pub async fn open<D: Dialer<Stream = S>>(dialer: &D) -> Result<Self> {
        let stream = dialer.dial(Port::Control).await?;
        Ok(Self(Connection::new(stream, Port::Control)))
    }

    pub fn from_stream(stream: S) -> Self {
        Self(Connection::new(stream, Port::Control))
    }

    /// Generic request/reply for parameters without a typed wrapper.
    pub async fn send_request(
        &mut self,
        code: CommandCode,
        args: &[Arg<'_>],
        reply_layout: &[FieldKind],
    ) -> Result<Response> {
        self.0.send_request(code, args, reply_layout).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> StopChannel<S> {
    /// Dial a fresh stop connection.
    pub async fn open<D: Dialer<Stream = S>>(dialer: &D) -> Result<Self> {
        let stream = dialer.dial(Port::Stop).await?;
        Ok(Self(Connection::new(stream, Port::Stop)))
    }

    pub fn from_stream(stream: S) -> Self {
        Self(Connection::new(stream, Port::Stop))
    }

    pub async fn send_request(
        &mut self,
        code: CommandCode,
        args: &[Arg<'_>],
        reply_layout: &[FieldKind],
    ) -> Result<Response> {
        self.0.send_request(code, args, reply_layout).await
    }
}
