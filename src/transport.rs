use std::future::Future;

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("device did not respond to the request")]
    NoResponse,
    #[error("device responded with exception code {0}")]
    Exception(u8),
    #[error("device kept responding with \"server busy\"")]
    ServerBusy,
    #[error("connection to the device failed")]
    Connection(#[source] crate::connection::Error),
    #[error("expected {expected} registers in response, got {got}")]
    ShortResponse { expected: usize, got: usize },
    #[error("response does not match the request")]
    UnexpectedResponse,
}

/// Reads and writes of holding registers at absolute addresses.
///
/// Implementations must be usable from several coordinators at once and serialize the
/// operations themselves if the underlying link requires it.
pub trait Transport: Send + Sync + 'static {
    fn read_registers(
        &self,
        start: u16,
        count: u16,
    ) -> impl Future<Output = Result<Vec<u16>, TransportError>> + Send;

    fn write_registers(
        &self,
        start: u16,
        words: &[u16],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{Transport, TransportError};
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::{Notify, Semaphore};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Op {
        ReadStarted(u16, u16),
        ReadFinished(u16, u16),
        Write(u16, Vec<u16>),
    }

    /// A register map in memory that records every operation performed on it.
    #[derive(Default)]
    pub struct MemoryTransport {
        registers: Mutex<BTreeMap<u16, u16>>,
        log: Mutex<Vec<Op>>,
        fail: AtomicBool,
        gate: Mutex<Option<std::sync::Arc<Semaphore>>>,
        read_started: Notify,
    }

    impl MemoryTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set(&self, address: u16, words: &[u16]) {
            let mut registers = self.registers.lock().unwrap();
            for (a, w) in (address..).zip(words) {
                registers.insert(a, *w);
            }
        }

        pub fn get(&self, address: u16) -> u16 {
            self.registers.lock().unwrap().get(&address).copied().unwrap_or(0)
        }

        pub fn fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        pub fn log(&self) -> Vec<Op> {
            self.log.lock().unwrap().clone()
        }

        pub fn writes(&self) -> Vec<(u16, Vec<u16>)> {
            self.log()
                .into_iter()
                .filter_map(|op| match op {
                    Op::Write(a, w) => Some((a, w)),
                    _ => None,
                })
                .collect()
        }

        pub fn clear_log(&self) {
            self.log.lock().unwrap().clear();
        }

        /// Hold reads until the returned semaphore receives a permit.
        pub fn gate_reads(&self) -> std::sync::Arc<Semaphore> {
            let gate = std::sync::Arc::new(Semaphore::new(0));
            *self.gate.lock().unwrap() = Some(gate.clone());
            gate
        }

        /// Resolves once a read has started.
        pub async fn read_started(&self) {
            self.read_started.notified().await
        }
    }

    impl Transport for MemoryTransport {
        async fn read_registers(&self, start: u16, count: u16) -> Result<Vec<u16>, TransportError> {
            self.log.lock().unwrap().push(Op::ReadStarted(start, count));
            self.read_started.notify_one();
            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.acquire().await.unwrap().forget();
            }
            self.log.lock().unwrap().push(Op::ReadFinished(start, count));
            if self.fail.load(Ordering::SeqCst) {
                return Err(TransportError::Timeout);
            }
            let registers = self.registers.lock().unwrap();
            Ok((start..start + count).map(|a| registers.get(&a).copied().unwrap_or(0)).collect())
        }

        async fn write_registers(&self, start: u16, words: &[u16]) -> Result<(), TransportError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(TransportError::Timeout);
            }
            self.log.lock().unwrap().push(Op::Write(start, words.to_vec()));
            self.set(start, words);
            Ok(())
        }
    }
}
