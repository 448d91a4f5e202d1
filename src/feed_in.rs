use std::sync::Arc;

use futures::StreamExt as _;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::blocks::conf::CONF_FEED_IN_ENABLED_SWITCH;
use crate::blocks::ema::EMA_FEED_IN_VALUE_NUMBER;
use crate::coordinator::{Coordinator, WriteError};
use crate::keys::{AttrKey, NumberAttrKey};
use crate::registers::Value;
use crate::transport::Transport;

#[derive(thiserror::Error, Debug)]
pub enum FeedInError {
    #[error("feed-in value {0} does not fit into the feed-in register")]
    OutOfRange(f64),
    #[error("could not write to the device")]
    Write(#[source] WriteError),
    #[error("`{state}` is not a valid reading of `{entity}`")]
    InvalidReading { entity: String, state: String },
    #[error("`{0}` is not tracked by the auto feed-in")]
    UnknownEntity(String),
}

/// The value written to the device for a power reading.
///
/// No reading means zero is written.
pub fn feed_in_value(power: Option<f64>, invert: bool, buffer: i32) -> Result<i16, FeedInError> {
    let Some(power) = power else { return Ok(0) };
    let sign = if invert { -1.0 } else { 1.0 };
    let value = (power * sign + f64::from(buffer)).round();
    if !EMA_FEED_IN_VALUE_NUMBER.contains(value) {
        return Err(FeedInError::OutOfRange(value));
    }
    Ok(value as i16)
}

#[derive(Debug, Default)]
struct State {
    buffer: i32,
    power: Option<f64>,
    /// Whether the enable flag was on when last observed or set.
    was_on: bool,
}

/// Forwards an external power measurement to the heater.
///
/// While the configuration block's feed-in switch is on, every new power reading and every
/// change of the locally held buffer is written to the energy manager's feed-in value as
/// `power * sign + buffer`. Turning the switch off writes a single zero.
pub struct AutoFeedIn<T> {
    conf: Arc<Coordinator<T>>,
    ema: Arc<Coordinator<T>>,
    power_entity_id: String,
    invert_power: bool,
    state: Mutex<State>,
}

impl<T: Transport> AutoFeedIn<T> {
    pub fn new(
        conf: Arc<Coordinator<T>>,
        ema: Arc<Coordinator<T>>,
        power_entity_id: String,
        invert_power: bool,
    ) -> Self {
        Self { conf, ema, power_entity_id, invert_power, state: Mutex::new(State::default()) }
    }

    pub fn power_entity_id(&self) -> &str {
        &self.power_entity_id
    }

    /// Identifier of the number holding the buffer.
    pub fn buffer_entity_id() -> String {
        AttrKey::from(NumberAttrKey::EmaAutoFeedInBuffer).to_string()
    }

    /// Both blocks are reachable and expose the values the feed-in works with.
    pub fn is_available(&self) -> bool {
        self.conf.is_available()
            && self.ema.is_available()
            && self.conf.get_snapshot().contains(CONF_FEED_IN_ENABLED_SWITCH.key)
            && self.ema.get_snapshot().contains(EMA_FEED_IN_VALUE_NUMBER.key)
    }

    pub fn is_on(&self) -> bool {
        self.conf
            .get_snapshot()
            .get(CONF_FEED_IN_ENABLED_SWITCH.key)
            .is_some_and(|v| CONF_FEED_IN_ENABLED_SWITCH.is_on(v))
    }

    pub async fn buffer(&self) -> i32 {
        self.state.lock().await.buffer
    }

    /// Record a new power reading and forward it if the feed-in is on.
    pub async fn on_power_reading(&self, power: f64) -> Result<(), FeedInError> {
        let mut state = self.state.lock().await;
        state.power = Some(power);
        if self.is_available() && self.is_on() {
            self.send(&state, Some(power)).await?;
        }
        Ok(())
    }

    /// Change the buffer and re-send the current reading if the feed-in is on.
    pub async fn set_buffer(&self, buffer: i32) -> Result<(), FeedInError> {
        let mut state = self.state.lock().await;
        state.buffer = buffer;
        if let Some(power) = state.power {
            if self.is_available() && self.is_on() {
                self.send(&state, Some(power)).await?;
            }
        }
        Ok(())
    }

    /// Dispatch a state change of the power or buffer entity.
    ///
    /// States that are not numbers, such as `unknown`, are ignored.
    pub async fn on_entity_change(&self, entity_id: &str, state: &str) -> Result<(), FeedInError> {
        if matches!(state, "unknown" | "unavailable") {
            debug!(message = "ignoring state without value", entity_id, state);
            return Ok(());
        }
        let invalid = || FeedInError::InvalidReading {
            entity: entity_id.to_string(),
            state: state.to_string(),
        };
        if entity_id == self.power_entity_id {
            let power = state.trim().parse::<f64>().map_err(|_| invalid())?;
            self.on_power_reading(power).await
        } else if entity_id == Self::buffer_entity_id() {
            let buffer = state.trim().parse::<i32>().map_err(|_| invalid())?;
            self.set_buffer(buffer).await
        } else {
            Err(FeedInError::UnknownEntity(entity_id.to_string()))
        }
    }

    /// Enable the feed-in and immediately forward the last known reading.
    pub async fn turn_on(&self) -> Result<(), FeedInError> {
        let mut state = self.state.lock().await;
        self.set_enabled(true).await?;
        state.was_on = true;
        info!(message = "auto feed-in turned on", power = ?state.power);
        if let Some(power) = state.power {
            self.send(&state, Some(power)).await?;
        }
        Ok(())
    }

    /// Disable the feed-in and reset the feed-in value to zero.
    pub async fn turn_off(&self) -> Result<(), FeedInError> {
        let mut state = self.state.lock().await;
        self.set_enabled(false).await?;
        state.was_on = false;
        info!("auto feed-in turned off");
        self.send(&state, None).await
    }

    /// Follow the enable flag as published by the configuration block.
    ///
    /// When the flag is switched on by something other than [`Self::turn_on`], the last known
    /// reading is forwarded right away.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        // Yields the current snapshot first, then every newer one.
        let mut snapshots = self.conf.watch();
        loop {
            let snapshot = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = snapshots.next() => match next {
                    Some(snapshot) => snapshot,
                    None => break,
                },
            };
            let Some(on) = snapshot
                .get(CONF_FEED_IN_ENABLED_SWITCH.key)
                .map(|v| CONF_FEED_IN_ENABLED_SWITCH.is_on(v))
            else {
                continue;
            };
            if let Err(e) = self.on_enabled_changed(on).await {
                warn!(
                    message = "could not forward the power reading",
                    error = (&e as &dyn std::error::Error)
                );
            }
        }
    }

    async fn on_enabled_changed(&self, on: bool) -> Result<(), FeedInError> {
        let mut state = self.state.lock().await;
        if on == state.was_on {
            return Ok(());
        }
        state.was_on = on;
        debug!(message = "feed-in enable flag changed", on);
        match state.power {
            Some(power) if on && self.is_available() => self.send(&state, Some(power)).await,
            _ => Ok(()),
        }
    }

    async fn set_enabled(&self, on: bool) -> Result<(), FeedInError> {
        let Some(descriptor) = CONF_FEED_IN_ENABLED_SWITCH.descriptor else {
            return Ok(());
        };
        let value = CONF_FEED_IN_ENABLED_SWITCH.state_for(on).to_value();
        self.conf.async_write(&descriptor, &value).await.map_err(FeedInError::Write)
    }

    async fn send(&self, state: &State, power: Option<f64>) -> Result<(), FeedInError> {
        let value = feed_in_value(power, self.invert_power, state.buffer)?;
        debug!(message = "sending feed-in value", ?power, buffer = state.buffer, value);
        self.ema
            .async_write(&EMA_FEED_IN_VALUE_NUMBER.descriptor, &Value::I16(value))
            .await
            .map_err(FeedInError::Write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{CONF_REGISTER_BLOCK_DESCRIPTOR, EMA_REGISTER_BLOCK_DESCRIPTOR};
    use crate::transport::testing::MemoryTransport;
    use std::time::Duration;

    async fn setup() -> (Arc<MemoryTransport>, Arc<AutoFeedIn<MemoryTransport>>) {
        let transport = Arc::new(MemoryTransport::new());
        let conf = Coordinator::new(&CONF_REGISTER_BLOCK_DESCRIPTOR, Arc::clone(&transport));
        let ema = Coordinator::new(&EMA_REGISTER_BLOCK_DESCRIPTOR, Arc::clone(&transport));
        let (conf, ema) = (Arc::new(conf.unwrap()), Arc::new(ema.unwrap()));
        conf.poll().await.unwrap();
        ema.poll().await.unwrap();
        transport.clear_log();
        let feed_in = AutoFeedIn::new(conf, ema, "sensor.grid_power".into(), true);
        (transport, Arc::new(feed_in))
    }

    fn feed_in_writes(transport: &MemoryTransport) -> Vec<Vec<u16>> {
        transport.writes().into_iter().filter(|(a, _)| *a == 303).map(|(_, w)| w).collect()
    }

    #[test]
    fn value_is_signed_power_plus_buffer() {
        assert_eq!(feed_in_value(Some(100.0), true, 5).unwrap(), -95);
        assert_eq!(feed_in_value(Some(100.0), false, 5).unwrap(), 105);
        assert_eq!(feed_in_value(Some(-20.4), false, 0).unwrap(), -20);
        assert_eq!(feed_in_value(None, true, 5).unwrap(), 0);
        assert!(matches!(feed_in_value(Some(40000.0), false, 0), Err(FeedInError::OutOfRange(_))));
    }

    #[tokio::test]
    async fn inverted_reading_with_buffer_then_single_zero_on_turn_off() {
        let (transport, feed_in) = setup().await;
        feed_in.set_buffer(5).await.unwrap();
        feed_in.turn_on().await.unwrap();
        assert!(feed_in.is_on());
        assert!(feed_in_writes(&transport).is_empty());

        feed_in.on_power_reading(100.0).await.unwrap();
        assert_eq!(feed_in_writes(&transport), [vec![0xFFA1]]);
        assert_eq!(transport.get(501) & 0b10, 0b10);

        transport.clear_log();
        feed_in.turn_off().await.unwrap();
        assert!(!feed_in.is_on());
        feed_in.on_power_reading(250.0).await.unwrap();
        feed_in.set_buffer(7).await.unwrap();
        assert_eq!(feed_in_writes(&transport), [vec![0]]);
        assert_eq!(transport.get(501) & 0b10, 0);
    }

    #[tokio::test]
    async fn turning_on_forwards_last_reading() {
        let (transport, feed_in) = setup().await;
        feed_in.on_power_reading(100.0).await.unwrap();
        assert!(feed_in_writes(&transport).is_empty());
        feed_in.turn_on().await.unwrap();
        assert_eq!(feed_in_writes(&transport), [vec![(-100i16) as u16]]);
    }

    #[tokio::test]
    async fn buffer_change_resends_while_on() {
        let (transport, feed_in) = setup().await;
        feed_in.on_entity_change("sensor.grid_power", "100").await.unwrap();
        feed_in.turn_on().await.unwrap();
        let buffer_entity = AutoFeedIn::<MemoryTransport>::buffer_entity_id();
        feed_in.on_entity_change(&buffer_entity, "20").await.unwrap();
        assert_eq!(feed_in.buffer().await, 20);
        assert_eq!(feed_in_writes(&transport), [vec![(-100i16) as u16], vec![(-80i16) as u16]]);
        feed_in.on_entity_change("sensor.grid_power", "unknown").await.unwrap();
        assert!(matches!(
            feed_in.on_entity_change("sensor.grid_power", "lots").await,
            Err(FeedInError::InvalidReading { .. })
        ));
        assert!(matches!(
            feed_in.on_entity_change("sensor.other", "1").await,
            Err(FeedInError::UnknownEntity(_))
        ));
    }

    #[tokio::test]
    async fn unavailable_until_both_blocks_polled() {
        let transport = Arc::new(MemoryTransport::new());
        let conf = Coordinator::new(&CONF_REGISTER_BLOCK_DESCRIPTOR, Arc::clone(&transport));
        let ema = Coordinator::new(&EMA_REGISTER_BLOCK_DESCRIPTOR, Arc::clone(&transport));
        let (conf, ema) = (Arc::new(conf.unwrap()), Arc::new(ema.unwrap()));
        transport.set(501, &[0b10]);
        conf.poll().await.unwrap();
        let feed_in = AutoFeedIn::new(Arc::clone(&conf), Arc::clone(&ema), "p".into(), false);
        assert!(!feed_in.is_available());
        feed_in.on_power_reading(10.0).await.unwrap();
        assert!(feed_in_writes(&transport).is_empty());
        ema.poll().await.unwrap();
        assert!(feed_in.is_available());
        feed_in.on_power_reading(10.0).await.unwrap();
        assert_eq!(feed_in_writes(&transport), [vec![10]]);
    }

    #[tokio::test]
    async fn external_enable_forwards_last_reading() {
        let (transport, feed_in) = setup().await;
        feed_in.on_power_reading(30.0).await.unwrap();
        let cancel = CancellationToken::new();
        let watcher = tokio::spawn(Arc::clone(&feed_in).run(cancel.clone()));
        transport.set(501, &[0b10]);
        feed_in.conf.poll().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while feed_in_writes(&transport).is_empty() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(feed_in_writes(&transport), [vec![(-30i16) as u16]]);
        cancel.cancel();
        watcher.await.unwrap();
    }
}
