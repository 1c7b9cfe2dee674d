//! Scripted in-memory detector used by the unit tests.
//!
//! Each dial takes the next script queued for that port and serves it on a
//! `tokio::io::duplex` pair. Once the script has run the server closes its
//! write side and records every byte the client sent on that connection.

use crate::detector::Detector;
use crate::error::{DetectorError, Result};
use crate::protocol::{Arg, CommandCode, INET_ADDRSTRLEN, ResultType, encode};
use crate::transport::{Dialer, Port};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

const PIPE_CAPACITY: usize = 1 << 20;

/// One server-side action.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    /// Read exactly this many request bytes.
    Expect(usize),
    Send(Vec<u8>),
    /// Park until a stop connection has been served.
    WaitStop,
    /// Wake a connection parked on `WaitStop`.
    NotifyStop,
    Pause(Duration),
}

#[derive(Debug)]
struct Received {
    id: usize,
    port: Port,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct DeviceInner {
    scripts: Mutex<HashMap<Port, VecDeque<Vec<Step>>>>,
    received: Mutex<Vec<Received>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    dials: Mutex<usize>,
    stop_signal: Notify,
}

#[derive(Clone, Default)]
pub(crate) struct ScriptedDevice {
    inner: Arc<DeviceInner>,
}

impl ScriptedDevice {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue the script for the next connection to `port`.
    pub(crate) fn script(&self, port: Port, steps: Vec<Step>) -> &Self {
        if let Ok(mut scripts) = self.inner.scripts.lock() {
            scripts.entry(port).or_default().push_back(steps);
        }
        self
    }

    /// Queue a plain request/reply connection on the control port.
    pub(crate) fn control(&self, request_len: usize, reply: Vec<u8>) -> &Self {
        self.script(Port::Control, vec![Step::Expect(request_len), Step::Send(reply)])
    }

    /// Queue a stop-port STOP that wakes any parked connection.
    pub(crate) fn stop_port_stop(&self) -> &Self {
        self.script(
            Port::Stop,
            vec![Step::Expect(4), Step::Send(tag(ResultType::Ok)), Step::NotifyStop],
        )
    }

    /// Detector handle backed by this device.
    pub(crate) fn detector(&self) -> Detector<ScriptedDevice> {
        Detector::new(self.clone(), Duration::from_secs(5), Duration::from_secs(5))
    }

    /// Wait for every served connection to close.
    pub(crate) async fn settle(&self) {
        let tasks: Vec<_> = match self.inner.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for task in tasks {
            task.await.expect("scripted connection panicked");
        }
    }

    /// Client bytes per connection to `port`, in dial order.
    pub(crate) fn received(&self, port: Port) -> Vec<Vec<u8>> {
        let received = self.inner.received.lock().expect("received lock");
        let mut connections: Vec<_> = received.iter().filter(|r| r.port == port).collect();
        connections.sort_by_key(|r| r.id);
        connections.into_iter().map(|r| r.bytes.clone()).collect()
    }

    /// Scripts never dialed.
    pub(crate) fn unused_scripts(&self) -> usize {
        let scripts = self.inner.scripts.lock().expect("scripts lock");
        scripts.values().map(VecDeque::len).sum()
    }
}

impl Dialer for ScriptedDevice {
    type Stream = DuplexStream;

    async fn dial(&self, port: Port) -> Result<DuplexStream> {
        let script = self
            .inner
            .scripts
            .lock()
            .ok()
            .and_then(|mut scripts| scripts.get_mut(&port)?.pop_front())
            .ok_or_else(|| DetectorError::connection(format!("no scripted {port:?} connection")))?;

        let id = {
            let mut dials = self.inner.dials.lock().expect("dials lock");
            *dials += 1;
            *dials
        };

        let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(serve(inner, id, port, server, script));
        self.inner.tasks.lock().expect("tasks lock").push(task);
        Ok(client)
    }
}

async fn serve(inner: Arc<DeviceInner>, id: usize, port: Port, mut server: DuplexStream, script: Vec<Step>) {
    let mut bytes = Vec::new();
    for step in script {
        match step {
            Step::Expect(len) => {
                let mut buf = vec![0u8; len];
                if server.read_exact(&mut buf).await.is_err() {
                    break;
                }
                bytes.extend_from_slice(&buf);
            }
            Step::Send(reply) => {
                if server.write_all(&reply).await.is_err() {
                    break;
                }
            }
            Step::WaitStop => inner.stop_signal.notified().await,
            Step::NotifyStop => inner.stop_signal.notify_one(),
            Step::Pause(delay) => tokio::time::sleep(delay).await,
        }
    }

    let _ = server.shutdown().await;
    let _ = server.read_to_end(&mut bytes).await;
    inner
        .received
        .lock()
        .expect("received lock")
        .push(Received { id, port, bytes });
}

// Reply builders ----------------------------------------------------------------

pub(crate) fn tag(result: ResultType) -> Vec<u8> {
    result.as_i32().to_le_bytes().to_vec()
}

pub(crate) fn ok_i32(value: i32) -> Vec<u8> {
    let mut reply = tag(ResultType::Ok);
    reply.extend_from_slice(&value.to_le_bytes());
    reply
}

pub(crate) fn ok_i64(value: i64) -> Vec<u8> {
    let mut reply = tag(ResultType::Ok);
    reply.extend_from_slice(&value.to_le_bytes());
    reply
}

pub(crate) fn fail(message: &str) -> Vec<u8> {
    let mut reply = tag(ResultType::Fail);
    reply.extend_from_slice(message.as_bytes());
    reply.push(0);
    reply
}

/// Frame payload preceded by an OK tag.
pub(crate) fn frame(payload: &[u8]) -> Vec<u8> {
    let mut reply = tag(ResultType::Ok);
    reply.extend_from_slice(payload);
    reply
}

/// UPDATE_CLIENT body values.
#[derive(Debug, Clone)]
pub(crate) struct DeviceState {
    pub dynamic_range: i32,
    pub data_bytes: i32,
    pub nb_frames: i64,
    pub nb_cycles: i64,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            dynamic_range: 16,
            data_bytes: 8,
            nb_frames: 1,
            nb_cycles: 1,
        }
    }
}

pub(crate) fn update_client_reply(result: ResultType, state: &DeviceState) -> Vec<u8> {
    let mut reply = tag(result);
    let mut ip = b"127.0.0.1".to_vec();
    ip.resize(INET_ADDRSTRLEN, 0);
    reply.extend_from_slice(&ip);
    for value in [1, 1, state.dynamic_range, state.data_bytes, 0, 5000] {
        reply.extend_from_slice(&i32::to_le_bytes(value));
    }
    for value in [state.nb_frames, 1_000_000, 2_000_000, 0, 0, 0, state.nb_cycles] {
        reply.extend_from_slice(&i64::to_le_bytes(value));
    }
    reply
}

/// Encoded request bytes, for comparing against what the client sent.
pub(crate) fn request(code: CommandCode, args: &[Arg<'_>]) -> Vec<u8> {
    encode(code, args)
}
