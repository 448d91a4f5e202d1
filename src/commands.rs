use std::sync::Arc;

use crate::blocks::{BLOCKS, ConfigurationError, RegisterBlockDescriptor};
use crate::connection::Connection;
use crate::coordinator::Coordinator;

fn runtime() -> Result<tokio::runtime::Runtime, std::io::Error> {
    tokio::runtime::Builder::new_multi_thread().enable_all().build()
}

fn coordinator(
    block: &'static RegisterBlockDescriptor,
    connection: &Arc<Connection>,
) -> Result<Coordinator<Connection>, ConfigurationError> {
    let timeout = connection.args().request_timeout();
    Ok(Coordinator::new(block, Arc::clone(connection))?.with_timeout(timeout))
}

/// Which register block to operate on.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Block {
    Par,
    Ema,
    Conf,
}

impl Block {
    pub fn descriptor(self) -> &'static RegisterBlockDescriptor {
        match self {
            Block::Par => &crate::blocks::PAR_REGISTER_BLOCK_DESCRIPTOR,
            Block::Ema => &crate::blocks::EMA_REGISTER_BLOCK_DESCRIPTOR,
            Block::Conf => &crate::blocks::CONF_REGISTER_BLOCK_DESCRIPTOR,
        }
    }
}

pub mod registers {
    use crate::blocks::{BLOCKS, Entity};
    use crate::keys::{AttrKey, DeviceKey};
    use crate::output;

    /// Search and output known registers.
    #[derive(clap::Parser)]
    pub struct Args {
        /// Only list registers whose key or address contains this text.
        filter: Option<String>,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not output the registers")]
        Output(#[source] output::Error),
    }

    #[derive(serde::Serialize)]
    pub struct RegisterSchema {
        pub address: u16,
        pub block: &'static str,
        pub key: AttrKey,
        pub kind: &'static str,
        pub encoding: &'static str,
        pub words: u16,
        pub device: Option<DeviceKey>,
        pub unit: Option<&'static str>,
        pub minimum: Option<f64>,
        pub maximum: Option<f64>,
        pub options: Vec<&'static str>,
    }

    impl RegisterSchema {
        pub fn all_registers() -> impl Iterator<Item = Self> {
            BLOCKS.into_iter().flat_map(|block| {
                block.entities().filter_map(move |entity| {
                    let descriptor = entity.descriptor()?;
                    let (unit, minimum, maximum, options) = match entity {
                        Entity::Sensor(s) => (s.unit, s.min, s.max, Vec::new()),
                        Entity::Number(n) => (n.unit, Some(n.min), Some(n.max), Vec::new()),
                        Entity::Select(s) => (None, None, None, s.options()),
                        _ => (None, None, None, Vec::new()),
                    };
                    Some(RegisterSchema {
                        address: block.absolute_register_index(descriptor),
                        block: block.name,
                        key: entity.key(),
                        kind: entity.kind().into(),
                        encoding: descriptor.encoding(),
                        words: descriptor.word_span(),
                        device: entity.device_key(),
                        unit,
                        minimum,
                        maximum,
                        options,
                    })
                })
            })
        }

        pub fn is_match(&self, pattern: &str) -> bool {
            let pattern = pattern.to_lowercase();
            self.key.to_string().contains(&pattern) || self.address.to_string().contains(&pattern)
        }
    }

    impl output::Record for RegisterSchema {
        fn cells(&self) -> Vec<String> {
            vec![
                self.address.to_string(),
                self.block.to_string(),
                self.key.to_string(),
                self.encoding.to_string(),
                self.words.to_string(),
                self.device.map(|d| d.to_string()).unwrap_or_default(),
                self.unit.unwrap_or_default().to_string(),
                self.minimum.map(|v| v.to_string()).unwrap_or_default(),
                self.maximum.map(|v| v.to_string()).unwrap_or_default(),
                self.options.join(", "),
            ]
        }
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let mut output = args.output.to_output().map_err(Error::Output)?;
        output
            .table_headers(vec![
                "Address", "Block", "Key", "Encoding", "Words", "Device", "Unit", "Min", "Max",
                "Options",
            ])
            .map_err(Error::Output)?;
        for register in RegisterSchema::all_registers() {
            if let Some(pattern) = &args.filter {
                if !register.is_match(pattern) {
                    continue;
                }
            }
            output.record(&register).map_err(Error::Output)?;
        }
        output.commit().map_err(Error::Output)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn schema_lists_absolute_addresses() {
            let all = RegisterSchema::all_registers().collect::<Vec<_>>();
            let feed_in = all.iter().find(|r| r.key.to_string() == "number.ema_feed_in_value");
            let feed_in = feed_in.unwrap();
            assert_eq!((feed_in.address, feed_in.encoding), (303, "i16"));
            assert!(all.iter().any(|r| r.address == 400 && r.words == 16));
            assert!(all.iter().filter(|r| r.is_match("legionella")).count() >= 4);
        }
    }
}

pub mod read {
    use super::{Block, coordinator};
    use crate::blocks::ConfigurationError;
    use crate::connection::{self, Connection};
    use crate::output;
    use crate::transport::TransportError;
    use std::sync::Arc;

    /// Read register blocks once and output the decoded values.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        /// The blocks to read. All of them if not given.
        #[arg(long, short = 'b', value_enum)]
        block: Vec<Block>,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("register block is misconfigured")]
        Configuration(#[source] ConfigurationError),
        #[error("could not read the `{1}` block")]
        Poll(#[source] TransportError, &'static str),
        #[error("could not output the values")]
        Output(#[source] output::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let blocks = if args.block.is_empty() {
            vec![Block::Par, Block::Ema, Block::Conf]
        } else {
            args.block
        };
        let mut output = args.output.to_output().map_err(Error::Output)?;
        output.table_headers(vec!["Block", "Key", "Value"]).map_err(Error::Output)?;
        super::runtime().map_err(Error::Runtime)?.block_on(async {
            let connection = Arc::new(Connection::new(args.connection));
            for block in blocks {
                let coordinator =
                    coordinator(block.descriptor(), &connection).map_err(Error::Configuration)?;
                let snapshot =
                    coordinator.poll().await.map_err(|e| Error::Poll(e, coordinator.name()))?;
                output.snapshot(coordinator.name(), true, &snapshot).map_err(Error::Output)?;
            }
            Ok::<_, Error>(())
        })?;
        output.commit().map_err(Error::Output)
    }
}

pub mod write {
    use super::{BLOCKS, coordinator};
    use crate::blocks::ConfigurationError;
    use crate::connection::{self, Connection};
    use crate::coordinator::WriteError;
    use crate::keys::AttrKey;
    use crate::registers::ParseValueError;
    use std::sync::Arc;
    use tracing::info;

    /// Write the value of one entity, e.g. `write number.ema_set_heater_step 3`.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        /// The key of the entity, `<kind>.<key>`.
        key: AttrKey,
        /// The value to write. Switches take `on` or `off`, times `HH:MM`.
        value: String,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("register block is misconfigured")]
        Configuration(#[source] ConfigurationError),
        #[error("`{0}` is not backed by any register block")]
        UnknownKey(AttrKey),
        #[error("could not parse the value for `{1}`")]
        Parse(#[source] ParseValueError, AttrKey),
        #[error("could not write `{1}`")]
        Write(#[source] WriteError, AttrKey),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let key = args.key;
        let (block, entity) = BLOCKS
            .into_iter()
            .find_map(|b| Some((b, b.entity(key)?)))
            .ok_or(Error::UnknownKey(key))?;
        let value = entity.parse_value(&args.value).map_err(|e| Error::Parse(e, key))?;
        super::runtime().map_err(Error::Runtime)?.block_on(async {
            let connection = Arc::new(Connection::new(args.connection));
            let coordinator = coordinator(block, &connection).map_err(Error::Configuration)?;
            coordinator.write_key(key, value.clone()).await.map_err(|e| Error::Write(e, key))?;
            info!(message = "value written", %key, %value);
            Ok(())
        })
    }
}

pub mod watch {
    use super::{Block, coordinator};
    use crate::blocks::ConfigurationError;
    use crate::config::{self, Config};
    use crate::connection::{self, Connection};
    use crate::coordinator::Coordinator;
    use crate::feed_in::AutoFeedIn;
    use std::io::Write as _;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tokio::io::AsyncBufReadExt as _;
    use tokio_util::sync::CancellationToken;
    use tracing::{info, warn};

    /// Poll all blocks continuously and print every snapshot as a JSON line.
    ///
    /// With auto feed-in configured, lines read from the standard input drive it: `on`, `off`
    /// or `<entity id> <state>` for the power and buffer entities.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        /// JSON configuration file.
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
        /// Poll interval, overriding the configuration file.
        #[arg(long)]
        interval: Option<humantime::Duration>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not load the configuration")]
        Config(#[source] config::Error),
        #[error("register block is misconfigured")]
        Configuration(#[source] ConfigurationError),
        #[error("could not read commands from the standard input")]
        Stdin(#[source] std::io::Error),
        #[error("could not wait for the interrupt signal")]
        Signal(#[source] std::io::Error),
    }

    fn print_snapshots(coordinator: &Coordinator<Connection>) {
        let block = coordinator.name();
        coordinator.subscribe(move |snapshot| {
            let line = serde_json::json!({ "block": block, "values": snapshot });
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = writeln!(stdout, "{line}") {
                warn!(message = "could not print snapshot", error = (&e as &dyn std::error::Error));
            }
        });
    }

    async fn handle_line(feed_in: &AutoFeedIn<Connection>, line: &str) {
        let result = match line.split_whitespace().collect::<Vec<_>>().as_slice() {
            [] => return,
            ["on"] => feed_in.turn_on().await,
            ["off"] => feed_in.turn_off().await,
            [entity_id, state] => feed_in.on_entity_change(entity_id, state).await,
            _ => {
                warn!(message = "unrecognized command", line);
                return;
            }
        };
        if let Err(e) = result {
            warn!(message = "auto feed-in command failed", error = (&e as &dyn std::error::Error));
        }
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let config = match &args.config {
            Some(path) => Config::load(path).map_err(Error::Config)?,
            None => Config::default(),
        };
        let power_entity = config.power_entity().map_err(Error::Config)?.map(str::to_string);
        let interval = args.interval.map_or(config.scan_interval, Into::into);
        super::runtime().map_err(Error::Runtime)?.block_on(async {
            let connection = Arc::new(Connection::new(args.connection));
            let [par, ema, conf] = [Block::Par, Block::Ema, Block::Conf].map(|block| {
                coordinator(block.descriptor(), &connection)
                    .map(|c| Arc::new(c.with_devices(config.devices.clone())))
            });
            let (par, ema, conf) = (
                par.map_err(Error::Configuration)?,
                ema.map_err(Error::Configuration)?,
                conf.map_err(Error::Configuration)?,
            );
            let cancel = CancellationToken::new();
            let mut tasks = tokio::task::JoinSet::new();
            for coordinator in [&par, &ema, &conf] {
                print_snapshots(coordinator);
                tasks.spawn(Arc::clone(coordinator).run(interval, cancel.clone()));
            }
            let feed_in = power_entity.map(|power_entity| {
                info!(message = "auto feed-in enabled", %power_entity);
                let feed_in = Arc::new(AutoFeedIn::new(
                    Arc::clone(&conf),
                    Arc::clone(&ema),
                    power_entity,
                    config.invert_power(),
                ));
                tasks.spawn(Arc::clone(&feed_in).run(cancel.clone()));
                feed_in
            });
            let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
            let mut stdin_open = feed_in.is_some();
            let result = loop {
                tokio::select! {
                    signal = tokio::signal::ctrl_c() => break signal.map_err(Error::Signal),
                    line = lines.next_line(), if stdin_open => match line {
                        Ok(Some(line)) => {
                            if let Some(feed_in) = &feed_in {
                                handle_line(feed_in, &line).await;
                            }
                        }
                        Ok(None) => stdin_open = false,
                        Err(e) => break Err(Error::Stdin(e)),
                    },
                }
            };
            info!("shutting down");
            cancel.cancel();
            while tasks.join_next().await.is_some() {}
            result
        })
    }
}
