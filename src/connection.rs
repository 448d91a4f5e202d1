use crate::modbus::{self, ModbusTCPCodec, Request};
use crate::transport::{Transport, TransportError};
use futures::{SinkExt as _, StreamExt as _};
use std::sync::atomic::AtomicU16;
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::SendError;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("lookup of `{1}` failed")]
    LookupHost(#[source] std::io::Error, String),
    #[error("could not connect to `{1}` over TCP")]
    Connect(#[source] std::io::Error, String),
    #[error("connecting to `{0}` timed out")]
    ConnectTimeout(String),
    #[error("scheduling a request failed")]
    ScheduleRequest(#[source] SendError<Job>),
    #[error("could not read data from the stream")]
    Receive(#[source] std::io::Error),
    #[error("the connection was closed by the device")]
    Closed,
    #[error("could not send out the request")]
    Send(#[source] std::io::Error),
    #[error("sending the request timed out")]
    SendTimeout,
}

/// A queued request together with the channel its response is delivered on.
///
/// The response is `None` if the request failed or timed out.
pub struct Job {
    request: Request,
    reply: oneshot::Sender<Option<modbus::Response>>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job").field("request", &self.request).finish_non_exhaustive()
    }
}

impl Job {
    /// Whoever scheduled the request stopped waiting for it.
    fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }

    fn finish(self, response: Option<modbus::Response>) {
        if self.reply.send(response).is_err() {
            trace!(message = "response arrived after the caller gave up");
        }
    }
}

#[derive(clap::Parser, Clone)]
#[group(id = "connection::Args")]
pub struct Args {
    /// Connect to the askoheat device over Modbus TCP (e.g. `192.168.1.20:502`).
    #[arg(long)]
    tcp: String,

    /// The modbus device ID.
    #[arg(long, short = 'i', default_value = "1")]
    device_id: u8,

    /// If the modbus response isn't received in this amount of time, consider the request failed.
    #[arg(long, default_value = "1s")]
    read_timeout: humantime::Duration,

    /// Reconnect, if the modbus request can't be sent in this amount of time.
    #[arg(long, default_value = "3s")]
    send_timeout: humantime::Duration,

    /// Reconnect to the modbus server after the specified number of reads timeout.
    #[arg(long, default_value = "3")]
    reconnect_after_timeouts: usize,

    /// The amount of additional time to wait between sending requests over TCP.
    ///
    /// Interacting too fast can make some Modbus TCP interfaces behave poorly.
    #[arg(long, default_value = "100ms")]
    tcp_send_delay: humantime::Duration,

    /// The amount of additional time to wait after receiving a server busy exception.
    ///
    /// When busy, modbus devices can respond with an exception code 6. Give the device
    /// this amount of time to finish its current work before retrying.
    #[arg(long, default_value = "25ms")]
    server_busy_retry_delay: humantime::Duration,

    /// How many times a request answered with "server busy" is retried.
    #[arg(long, default_value = "5")]
    server_busy_retries: usize,
}

impl Args {
    /// The longest a single request may take before it is reported as failed.
    pub fn request_timeout(&self) -> std::time::Duration {
        let attempt = self.send_timeout.saturating_add(*self.read_timeout);
        let retries = u32::try_from(self.server_busy_retries).unwrap_or(u32::MAX);
        (attempt + *self.server_busy_retry_delay).saturating_mul(retries.saturating_add(1))
    }
}

/// A Modbus TCP connection shared by all coordinators of one device.
///
/// Requests are queued to a background worker which sends them one at a time. A request whose
/// caller stopped waiting before its turn came is dropped without being sent.
pub struct Connection {
    request_queue: tokio::sync::mpsc::UnboundedSender<Job>,
    pub worker: tokio::task::JoinHandle<()>,
    transaction_id_generator: AtomicU16,
    args: Args,
}

impl Connection {
    pub fn new(args: Args) -> Connection {
        let (request_queue, jobs) = tokio::sync::mpsc::unbounded_channel();
        let worker =
            TcpWorker { reconnect_countdown: args.reconnect_after_timeouts, args: args.clone() }
                .spawn(jobs);
        Self { request_queue, worker, transaction_id_generator: AtomicU16::new(0), args }
    }

    pub fn args(&self) -> &Args {
        &self.args
    }

    pub fn new_transaction_id(&self) -> u16 {
        self.transaction_id_generator.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    /// Queue `operation` and wait for its response.
    ///
    /// Dropping the returned future before the request is sent withdraws it.
    pub async fn send(
        &self,
        operation: modbus::Operation,
    ) -> Result<Option<modbus::Response>, Error> {
        let transaction_id = self.new_transaction_id();
        let request = modbus::Request { device_id: self.args.device_id, transaction_id, operation };
        let (reply, response) = oneshot::channel();
        self.request_queue.send(Job { request, reply }).map_err(Error::ScheduleRequest)?;
        // The worker dropping the job without an answer counts as no response.
        Ok(response.await.ok().flatten())
    }

    /// [`Self::send`] but retries `Server Busy` exceptions a bounded number of times.
    pub async fn send_retrying(
        &self,
        operation: modbus::Operation,
    ) -> Result<modbus::Response, TransportError> {
        let mut retries = self.args.server_busy_retries;
        loop {
            let response = self
                .send(operation.clone())
                .await
                .map_err(TransportError::Connection)?
                .ok_or(TransportError::NoResponse)?;
            if !response.is_server_busy() {
                break Ok(response);
            }
            let Some(remaining) = retries.checked_sub(1) else {
                break Err(TransportError::ServerBusy);
            };
            retries = remaining;
            debug!(message = "server busy, retrying", remaining);
            tokio::time::sleep(*self.args.server_busy_retry_delay).await;
        }
    }
}

impl Transport for Connection {
    async fn read_registers(&self, start: u16, count: u16) -> Result<Vec<u16>, TransportError> {
        let operation = modbus::Operation::GetHoldings { address: start, count };
        let response = self.send_retrying(operation).await?;
        match response.kind {
            modbus::ResponseKind::ErrorCode(code) => Err(TransportError::Exception(code)),
            modbus::ResponseKind::GetHoldings { values } if values.len() == usize::from(count) => {
                Ok(values)
            }
            modbus::ResponseKind::GetHoldings { values } => Err(TransportError::ShortResponse {
                expected: usize::from(count),
                got: values.len(),
            }),
            modbus::ResponseKind::SetHoldings { .. } => Err(TransportError::UnexpectedResponse),
        }
    }

    async fn write_registers(&self, start: u16, words: &[u16]) -> Result<(), TransportError> {
        let operation = modbus::Operation::SetHoldings { address: start, values: words.to_vec() };
        let response = self.send_retrying(operation).await?;
        match response.kind {
            modbus::ResponseKind::ErrorCode(code) => Err(TransportError::Exception(code)),
            modbus::ResponseKind::SetHoldings { address, count }
                if address == start && usize::from(count) == words.len() =>
            {
                Ok(())
            }
            _ => Err(TransportError::UnexpectedResponse),
        }
    }
}

struct TcpWorker {
    args: Args,
    reconnect_countdown: usize,
}

type TcpIo = Framed<TcpStream, ModbusTCPCodec>;

enum Exchange {
    Answered(modbus::Response),
    TimedOut { reconnect: bool },
}

impl TcpWorker {
    fn spawn(self, jobs: UnboundedReceiver<Job>) -> tokio::task::JoinHandle<()> {
        tokio::task::spawn(self.main_loop(jobs))
    }

    /// Send queued requests one at a time, (re)connecting as necessary.
    ///
    /// The askoheat only handles a single outstanding request, so a request is not sent before
    /// the previous one has been answered or has timed out.
    async fn main_loop(mut self, mut jobs: UnboundedReceiver<Job>) {
        let mut io: Option<TcpIo> = None;
        let mut next_send = Instant::now();
        while let Some(job) = jobs.recv().await {
            if job.is_abandoned() {
                debug!(
                    message = "dropping abandoned request",
                    transaction = job.request.transaction_id
                );
                continue;
            }
            tokio::time::sleep_until(next_send).await;
            if io.is_none() {
                let connected = tokio::time::timeout(*self.args.send_timeout, self.connect())
                    .await
                    .unwrap_or_else(|_| Err(Error::ConnectTimeout(self.args.tcp.clone())));
                match connected {
                    Ok(stream) => io = Some(stream),
                    Err(e) => {
                        warn!(
                            message = "could not connect, failing the request",
                            error = (&e as &dyn std::error::Error)
                        );
                        job.finish(None);
                        next_send = Instant::now() + *self.args.read_timeout;
                        continue;
                    }
                }
            }
            // Connecting may have taken a while.
            if job.is_abandoned() {
                debug!(
                    message = "dropping abandoned request",
                    transaction = job.request.transaction_id
                );
                continue;
            }
            let Some(stream) = io.as_mut() else { continue };
            match self.exchange(stream, &job.request).await {
                Ok(Exchange::Answered(response)) => job.finish(Some(response)),
                Ok(Exchange::TimedOut { reconnect }) => {
                    job.finish(None);
                    if reconnect {
                        warn!("too many timeouts, will reconnect");
                        io = None;
                    }
                }
                Err(e) => {
                    warn!(
                        message = "request failed, will reconnect",
                        error = (&e as &dyn std::error::Error)
                    );
                    job.finish(None);
                    io = None;
                }
            }
            // Interacting too fast with some Modbus TCP gateways makes them drop requests.
            next_send = Instant::now() + *self.args.tcp_send_delay;
        }
        if let Some(mut stream) = io {
            let close_result = stream.close().await;
            trace!(message = "closed the connection", is_error = ?close_result.err());
        }
    }

    /// Send `req` and wait for the response carrying its transaction id.
    async fn exchange(&mut self, io: &mut TcpIo, req: &Request) -> Result<Exchange, Error> {
        match tokio::time::timeout(*self.args.send_timeout, io.send(req)).await {
            Err(_) => return Err(Error::SendTimeout),
            Ok(result) => result.map_err(Error::Send)?,
        }
        let deadline = Instant::now() + *self.args.read_timeout;
        loop {
            let response = match tokio::time::timeout_at(deadline, io.next()).await {
                Err(_) => {
                    let reconnect = self.handle_timeout(req.transaction_id);
                    return Ok(Exchange::TimedOut { reconnect });
                }
                Ok(None) => return Err(Error::Closed),
                Ok(Some(response)) => response.map_err(Error::Receive)?,
            };
            if response.transaction_id != req.transaction_id {
                debug!(
                    message = "discarding a stale response",
                    transaction = response.transaction_id,
                    expected = req.transaction_id
                );
                continue;
            }
            self.reconnect_countdown = self.args.reconnect_after_timeouts;
            return Ok(Exchange::Answered(response));
        }
    }

    async fn connect(&mut self) -> Result<TcpIo, Error> {
        let address = &self.args.tcp;
        info!(message = "connecting", address);
        let addresses = tokio::net::lookup_host(address)
            .await
            .map_err(|e| Error::LookupHost(e, address.to_string()))?
            .collect::<Vec<_>>();
        debug!(message = "resolved", ?addresses);
        let socket = TcpStream::connect(&*addresses)
            .await
            .map_err(|e| Error::Connect(e, address.to_string()))?;
        if let Err(e) = socket.set_nodelay(true) {
            trace!(message = "could not disable nagle", error = (&e as &dyn std::error::Error));
        }
        info!(message = "connected", address);
        self.reconnect_countdown = self.args.reconnect_after_timeouts;
        Ok(Framed::new(socket, ModbusTCPCodec {}))
    }

    /// Count a timed out request. Returns whether the connection should be re-established.
    fn handle_timeout(&mut self, transaction_id: u16) -> bool {
        debug!(
            message = "request timed out",
            transaction_id,
            reconnect_countdown = self.reconnect_countdown
        );
        match self.reconnect_countdown.checked_sub(1) {
            Some(remaining) => {
                self.reconnect_countdown = remaining;
                false
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

    fn args(address: &str, extra: &[&str]) -> Args {
        use clap::Parser as _;
        let base = ["x", "--tcp", address, "--read-timeout", "500ms", "--tcp-send-delay", "1ms"];
        Args::try_parse_from(base.iter().chain(extra)).unwrap()
    }

    /// A device on a local socket recording the function code of every frame it receives.
    /// Read requests are answered with `0, 1, 2, ...` when `answer` is set.
    async fn device(answer: bool) -> (String, Arc<Mutex<Vec<u8>>>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let functions = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&functions);
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buffer = Vec::new();
            let mut chunk = [0u8; 256];
            loop {
                let n = socket.read(&mut chunk).await.unwrap_or(0);
                if n == 0 {
                    break;
                }
                buffer.extend_from_slice(&chunk[..n]);
                while buffer.len() >= 8 {
                    let length = usize::from(u16::from_be_bytes([buffer[4], buffer[5]]));
                    if buffer.len() < 6 + length {
                        break;
                    }
                    let frame = buffer.drain(..6 + length).collect::<Vec<u8>>();
                    seen.lock().unwrap().push(frame[7]);
                    if answer && frame[7] == 3 {
                        let count = u16::from_be_bytes([frame[10], frame[11]]);
                        let mut response = vec![frame[0], frame[1], 0, 0];
                        response.extend_from_slice(&(3 + 2 * count).to_be_bytes());
                        response.extend_from_slice(&[frame[6], 3, (2 * count) as u8]);
                        for value in 0..count {
                            response.extend_from_slice(&value.to_be_bytes());
                        }
                        socket.write_all(&response).await.unwrap();
                    }
                }
            }
        });
        (address, functions)
    }

    #[tokio::test]
    async fn answered_read_resolves() {
        let (address, functions) = device(true).await;
        let connection = Connection::new(args(&address, &[]));
        assert_eq!(connection.read_registers(300, 3).await.unwrap(), [0, 1, 2]);
        assert_eq!(connection.read_registers(500, 2).await.unwrap(), [0, 1]);
        assert_eq!(*functions.lock().unwrap(), [3, 3]);
    }

    #[tokio::test]
    async fn abandoned_request_is_never_sent() {
        let (address, functions) = device(false).await;
        let connection = Connection::new(args(&address, &[]));
        let patience = Duration::from_millis(100);
        let read = tokio::time::timeout(patience, connection.read_registers(300, 47)).await;
        assert!(read.is_err());
        // Queued behind the unanswered read, then given up on.
        let write = connection.write_registers(303, &[0xFFA1]);
        assert!(tokio::time::timeout(patience, write).await.is_err());
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(*functions.lock().unwrap(), [3]);
    }

    #[tokio::test]
    async fn unanswered_request_reports_no_response() {
        let (address, _) = device(false).await;
        let connection = Connection::new(args(&address, &[]));
        let result = connection.read_registers(300, 1).await;
        assert!(matches!(result, Err(TransportError::NoResponse)));
    }

    #[tokio::test]
    async fn unreachable_device_fails_within_send_timeout() {
        let connection = Connection::new(args("10.255.255.1:502", &["--send-timeout", "200ms"]));
        let result = tokio::time::timeout(Duration::from_secs(2), connection.read_registers(0, 1));
        assert!(matches!(result.await, Ok(Err(TransportError::NoResponse))));
    }

    #[test]
    fn request_timeout_covers_busy_retries() {
        use clap::Parser as _;
        let argv = ["x", "--tcp", "localhost:502", "--server-busy-retries", "1"];
        let args = Args::try_parse_from(argv).unwrap();
        assert_eq!(args.request_timeout(), Duration::from_millis(2 * (3000 + 1000 + 25)));
    }
}
