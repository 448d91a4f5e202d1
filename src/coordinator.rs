use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use strum::VariantArray as _;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::blocks::{ConfigurationError, Entity, RegisterBlockDescriptor};
use crate::keys::{AttrKey, DeviceKey};
use crate::registers::{EncodeError, RegisterInputDescriptor, Value};
use crate::transport::{Transport, TransportError};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    #[error("the value was rejected")]
    Rejected(#[source] EncodeError),
    #[error("registers {start}..{end} lie outside of the `{block}` block")]
    OutOfBlock { block: &'static str, start: u32, end: u32 },
    #[error("writing to the device failed")]
    Transport(#[source] TransportError),
    #[error("`{0}` is not an active entity of this block")]
    UnknownEntity(AttrKey),
    #[error("`{0}` is read-only")]
    ReadOnly(AttrKey),
    #[error("`{0}` is not backed by a register")]
    NoRegister(AttrKey),
    #[error("{value} is outside of the {min}..={max} range of `{key}`")]
    OutOfRange { key: AttrKey, value: f64, min: f64, max: f64 },
    #[error("`{0}` only accepts on or off")]
    NotASwitchState(AttrKey),
}

/// Decoded values of one successful poll.
///
/// A key that is missing has not been read yet or could not be decoded.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Snapshot {
    values: BTreeMap<AttrKey, Value>,
    registers: Vec<u16>,
}

impl Snapshot {
    pub fn get(&self, key: impl Into<AttrKey>) -> Option<&Value> {
        self.values.get(&key.into())
    }

    pub fn contains(&self, key: impl Into<AttrKey>) -> bool {
        self.values.contains_key(&key.into())
    }

    pub fn values(&self) -> &BTreeMap<AttrKey, Value> {
        &self.values
    }

    /// Raw register content of the block the values were decoded from.
    pub fn registers(&self) -> &[u16] {
        &self.registers
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl serde::Serialize for Snapshot {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.values.serialize(serializer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// Polling and write serialization for one register block.
///
/// The coordinator periodically reads the whole block, decodes every entity into a [`Snapshot`]
/// and publishes it. Writes go through the same coordinator so that no read or write of the
/// block ever overlaps another.
pub struct Coordinator<T> {
    block: &'static RegisterBlockDescriptor,
    devices: BTreeSet<DeviceKey>,
    transport: Arc<T>,
    timeout: Duration,
    /// Held for the duration of every transport operation on the block.
    io: tokio::sync::Mutex<()>,
    snapshot: watch::Sender<Arc<Snapshot>>,
    available: AtomicBool,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

impl<T: Transport> Coordinator<T> {
    /// Create a coordinator for `block`, rejecting blocks whose layout is inconsistent.
    pub fn new(
        block: &'static RegisterBlockDescriptor,
        transport: Arc<T>,
    ) -> Result<Self, ConfigurationError> {
        block.validate()?;
        Ok(Self {
            block,
            devices: DeviceKey::VARIANTS.iter().copied().collect(),
            transport,
            timeout: DEFAULT_TIMEOUT,
            io: tokio::sync::Mutex::new(()),
            snapshot: watch::Sender::new(Arc::default()),
            available: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        })
    }

    /// Only decode entities that belong to no device or to one of `devices`.
    pub fn with_devices(mut self, devices: BTreeSet<DeviceKey>) -> Self {
        self.devices = devices;
        self
    }

    /// Bound every transport operation to `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn block(&self) -> &'static RegisterBlockDescriptor {
        self.block
    }

    pub fn name(&self) -> &'static str {
        self.block.name
    }

    /// The entities this coordinator decodes.
    pub fn entities(&self) -> impl Iterator<Item = Entity<'static>> + '_ {
        self.block.entities().filter(|e| e.is_supported_by(&self.devices))
    }

    pub fn entity(&self, key: AttrKey) -> Option<Entity<'static>> {
        self.entities().find(|e| e.key() == key)
    }

    pub fn get_snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.borrow())
    }

    /// Whether the most recent poll succeeded.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Invoke `listener` after every published snapshot, in publication order.
    ///
    /// Listeners run while the block is locked for I/O and must return quickly.
    pub fn subscribe(&self, listener: impl Fn(&Snapshot) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(i, _)| *i != id);
        listeners.len() != before
    }

    /// Receiver observing every published snapshot.
    pub fn receiver(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshot.subscribe()
    }

    pub fn watch(&self) -> WatchStream<Arc<Snapshot>> {
        WatchStream::new(self.receiver())
    }

    /// Read the whole block and publish a fresh snapshot.
    ///
    /// On failure the previous snapshot stays published and the coordinator is marked
    /// unavailable until a later poll succeeds.
    pub async fn poll(&self) -> Result<Arc<Snapshot>, TransportError> {
        let block = self.block;
        let _io = self.io.lock().await;
        match self.read(block.starting_register, block.number_of_registers).await {
            Ok(registers) => {
                let snapshot = Arc::new(self.decode(registers));
                self.available.store(true, Ordering::Release);
                self.publish(Arc::clone(&snapshot));
                debug!(message = "polled", block = block.name, values = snapshot.values.len());
                Ok(snapshot)
            }
            Err(e) => {
                self.available.store(false, Ordering::Release);
                warn!(
                    message = "poll failed, block is unavailable",
                    block = block.name,
                    error = (&e as &dyn std::error::Error)
                );
                Err(e)
            }
        }
    }

    /// Encode `value` and write it to the registers of `descriptor`.
    ///
    /// Flags are written by reading back the current register first so that the other bits of
    /// the word are preserved. On success the written registers are merged into the current
    /// snapshot, which is then re-decoded and published.
    pub async fn async_write(
        &self,
        descriptor: &RegisterInputDescriptor,
        value: &Value,
    ) -> Result<(), WriteError> {
        let block = self.block;
        if !block.contains(descriptor) {
            let start = u32::from(descriptor.starting_register());
            return Err(WriteError::OutOfBlock {
                block: block.name,
                start,
                end: start + u32::from(descriptor.word_span()),
            });
        }
        let address = block.absolute_register_index(descriptor);
        let span = descriptor.word_span();
        if !descriptor.needs_current_value() {
            // Reject bad values before waiting for the block.
            descriptor.encode(value).map_err(WriteError::Rejected)?;
        }
        let _io = self.io.lock().await;
        let mut window = if descriptor.needs_current_value() {
            self.read(address, span).await.map_err(WriteError::Transport)?
        } else {
            vec![0; usize::from(span)]
        };
        descriptor.encode_into(value, &mut window).map_err(WriteError::Rejected)?;
        self.write(address, &window).await.map_err(WriteError::Transport)?;
        info!(message = "written", block = block.name, address, %value, words = ?window);
        self.merge(descriptor, &window);
        Ok(())
    }

    /// Write the value of the entity named by `key`.
    ///
    /// Switches accept a boolean and write their configured on or off state.
    pub async fn write_key(&self, key: AttrKey, value: Value) -> Result<(), WriteError> {
        let entity = self.entity(key).ok_or(WriteError::UnknownEntity(key))?;
        if !entity.kind().is_writable() {
            return Err(WriteError::ReadOnly(key));
        }
        let descriptor = entity.descriptor().ok_or(WriteError::NoRegister(key))?;
        let value = match entity {
            Entity::Switch(switch) => {
                let on = value.as_bool().ok_or(WriteError::NotASwitchState(key))?;
                switch.state_for(on).to_value()
            }
            Entity::Number(number) => {
                if let Some(n) = value.as_f64() {
                    if !number.contains(n) {
                        return Err(WriteError::OutOfRange {
                            key,
                            value: n,
                            min: number.min,
                            max: number.max,
                        });
                    }
                }
                value
            }
            _ => value,
        };
        self.async_write(descriptor, &value).await
    }

    /// Poll every `interval` until `cancel` is triggered.
    ///
    /// Failed polls are retried on the next tick. A poll in progress is abandoned on cancellation.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                // Failures are logged and reflected in availability.
                _ = self.poll() => {}
            }
        }
        debug!(message = "polling stopped", block = self.block.name);
    }

    async fn bounded<R>(
        &self,
        operation: impl Future<Output = Result<R, TransportError>>,
    ) -> Result<R, TransportError> {
        tokio::time::timeout(self.timeout, operation).await.map_err(|_| TransportError::Timeout)?
    }

    async fn read(&self, address: u16, count: u16) -> Result<Vec<u16>, TransportError> {
        let registers = self.bounded(self.transport.read_registers(address, count)).await?;
        if registers.len() != usize::from(count) {
            return Err(TransportError::ShortResponse {
                expected: usize::from(count),
                got: registers.len(),
            });
        }
        Ok(registers)
    }

    async fn write(&self, address: u16, words: &[u16]) -> Result<(), TransportError> {
        self.bounded(self.transport.write_registers(address, words)).await
    }

    /// Decode every active entity, leaving out the ones that fail.
    fn decode(&self, registers: Vec<u16>) -> Snapshot {
        let mut values = BTreeMap::new();
        for entity in self.entities() {
            let Some(descriptor) = entity.descriptor() else { continue };
            match descriptor.decode(&registers) {
                Ok(value) => {
                    values.insert(entity.key(), value);
                }
                Err(e) => warn!(
                    message = "could not decode value",
                    block = self.block.name,
                    key = %entity.key(),
                    error = (&e as &dyn std::error::Error)
                ),
            }
        }
        Snapshot { values, registers }
    }

    /// Patch freshly written registers into the current snapshot and publish the result.
    ///
    /// Nothing is published before the first successful poll.
    fn merge(&self, descriptor: &RegisterInputDescriptor, window: &[u16]) {
        let current = self.get_snapshot();
        let offset = usize::from(descriptor.starting_register());
        let mut registers = current.registers.clone();
        let Some(target) = registers.get_mut(offset..offset + window.len()) else { return };
        target.copy_from_slice(window);
        self.publish(Arc::new(self.decode(registers)));
    }

    /// Replace the published snapshot and run the listeners.
    ///
    /// Only called with the I/O lock held, so listeners observe snapshots in publication order.
    fn publish(&self, snapshot: Arc<Snapshot>) {
        self.snapshot.send_replace(Arc::clone(&snapshot));
        self.notify(&snapshot);
    }

    fn notify(&self, snapshot: &Snapshot) {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect::<Vec<_>>();
        for listener in listeners {
            listener(snapshot);
        }
    }
}
