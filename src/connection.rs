use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

use crate::modbus::{
    MAX_REGISTERS_PER_REQUEST, ModbusTCPCodec, Operation, Request, Response, ResponseKind,
};

/// Errors surfaced while establishing a session. Faults on an established
/// session are not errors: reads yield `None` and writes yield `false`, and
/// the caller decides how to degrade.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("lookup of `{1}` failed")]
    LookupHost(#[source] std::io::Error, String),
    #[error("could not connect to `{1}` over TCP")]
    Connect(#[source] std::io::Error, String),
}

#[derive(clap::Parser, Clone)]
#[group(id = "connection::Args")]
pub struct Args {
    /// Host name or address of the Topvex Access controller.
    #[arg(long)]
    pub host: String,

    /// The modbus TCP port.
    #[arg(long, default_value_t = 502)]
    pub port: u16,

    /// The modbus device ID.
    #[arg(long, short = 'i', default_value_t = 1)]
    pub device_id: u8,

    /// Consider a request failed if the response isn't received in this
    /// amount of time.
    #[arg(long, default_value = "5s")]
    pub timeout: humantime::Duration,
}

/// The register transport seam.
///
/// The decode and command layers are generic over this so they can be
/// exercised against an in-memory register bank in tests.
pub trait RegisterBus {
    /// Read `count` freely-readable registers starting at `address`.
    fn read_inputs(
        &mut self,
        address: u16,
        count: u16,
    ) -> impl Future<Output = Option<Vec<u16>>> + Send;
    /// Read `count` settings registers starting at `address`.
    fn read_holdings(
        &mut self,
        address: u16,
        count: u16,
    ) -> impl Future<Output = Option<Vec<u16>>> + Send;
    /// Write a single settings register. Returns whether the write took.
    fn write_holding(&mut self, address: u16, value: u16) -> impl Future<Output = bool> + Send;
    /// Write a single flag register.
    fn write_coil(&mut self, address: u16, on: bool) -> impl Future<Output = bool> + Send;
}

/// A single modbus TCP session to the controller.
///
/// The session is a two-state machine: disconnected or connected. Any
/// communication fault drops back to disconnected; reconnecting is the
/// poll loop's job. Requests are strictly sequential, the controller does
/// not cope with interleaved exchanges.
pub struct Client {
    args: Args,
    io: Option<Framed<TcpStream, ModbusTCPCodec>>,
    next_transaction_id: u16,
}

impl Client {
    pub fn new(args: Args) -> Self {
        Self { args, io: None, next_transaction_id: 0 }
    }

    pub fn is_connected(&self) -> bool {
        self.io.is_some()
    }

    pub async fn connect(&mut self) -> Result<(), Error> {
        let address = format!("{}:{}", self.args.host, self.args.port);
        info!(message = "connecting...", address);
        let addresses = tokio::net::lookup_host(&address)
            .await
            .map_err(|e| Error::LookupHost(e, address.clone()))?
            .collect::<Vec<_>>();
        debug!(message = "resolved", ?addresses);
        let socket = TcpStream::connect(&*addresses)
            .await
            .map_err(|e| Error::Connect(e, address))?;
        let nodelay_result = socket.set_nodelay(true);
        trace!(message = "setting nodelay", is_error = ?nodelay_result.err());
        info!(message = "connected");
        self.io = Some(Framed::new(socket, ModbusTCPCodec {}));
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.io.take().is_some() {
            info!("disconnected");
        }
    }

    /// One request-response exchange with a bounded timeout.
    ///
    /// `None` covers every expected fault: no session, a dead session, a
    /// garbled frame, or no response within the deadline. All of those also
    /// drop the session so the next cycle reconnects.
    async fn exchange(&mut self, operation: Operation) -> Option<Response> {
        let transaction_id = self.next_transaction_id;
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1);
        let request =
            Request { device_id: self.args.device_id, transaction_id, operation };
        let io = self.io.as_mut()?;
        let exchange = async {
            io.send(&request).await.ok()?;
            loop {
                let response = io.next().await?.ok()?;
                if response.transaction_id != transaction_id {
                    debug!(
                        message = "response for a stale transaction",
                        transaction = response.transaction_id
                    );
                    continue;
                }
                return Some(response);
            }
        };
        let outcome = tokio::time::timeout(*self.args.timeout, exchange).await;
        match outcome {
            Ok(Some(response)) => Some(response),
            Ok(None) => {
                warn!(?operation, "session fault, dropping the connection");
                self.disconnect();
                None
            }
            Err(_elapsed) => {
                warn!(?operation, "request timed out, dropping the connection");
                self.disconnect();
                None
            }
        }
    }

    async fn read_words(&mut self, operation: Operation, count: u16) -> Option<Vec<u16>> {
        match self.exchange(operation).await?.kind {
            ResponseKind::Words(values) => {
                if values.len() < usize::from(count) {
                    warn!(
                        ?operation,
                        received = values.len(),
                        "short read response"
                    );
                    return None;
                }
                Some(values)
            }
            ResponseKind::Exception(code) => {
                debug!(?operation, code, "controller rejected the read");
                None
            }
            ResponseKind::WriteEcho { .. } => {
                warn!(?operation, "mismatched response kind");
                None
            }
        }
    }

    async fn write(&mut self, operation: Operation) -> bool {
        match self.exchange(operation).await {
            Some(Response { kind: ResponseKind::WriteEcho { .. }, .. }) => true,
            Some(Response { kind: ResponseKind::Exception(code), .. }) => {
                error!(?operation, code, "controller rejected the write");
                false
            }
            Some(_) => {
                warn!(?operation, "mismatched response kind");
                false
            }
            None => false,
        }
    }
}

impl RegisterBus for Client {
    async fn read_inputs(&mut self, address: u16, count: u16) -> Option<Vec<u16>> {
        assert!(count <= MAX_REGISTERS_PER_REQUEST, "read of {count} registers");
        self.read_words(Operation::ReadInputs { address, count }, count).await
    }

    async fn read_holdings(&mut self, address: u16, count: u16) -> Option<Vec<u16>> {
        assert!(count <= MAX_REGISTERS_PER_REQUEST, "read of {count} registers");
        self.read_words(Operation::ReadHoldings { address, count }, count).await
    }

    async fn write_holding(&mut self, address: u16, value: u16) -> bool {
        self.write(Operation::WriteHolding { address, value }).await
    }

    async fn write_coil(&mut self, address: u16, on: bool) -> bool {
        self.write(Operation::WriteCoil { address, on }).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;

    use super::RegisterBus;
    use crate::modbus::MAX_REGISTERS_PER_REQUEST;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum BusOp {
        ReadInputs { address: u16, count: u16 },
        ReadHoldings { address: u16, count: u16 },
        WriteHolding { address: u16, value: u16 },
        WriteCoil { address: u16, on: bool },
    }

    /// In-memory register bank standing in for a controller session.
    ///
    /// Reads starting at an address listed in the corresponding `fail_*`
    /// list return `None`, mimicking a transport fault for that batch.
    #[derive(Default)]
    pub(crate) struct FakeBus {
        pub inputs: HashMap<u16, u16>,
        pub holdings: HashMap<u16, u16>,
        pub fail_input_reads_at: Vec<u16>,
        pub fail_holding_reads_at: Vec<u16>,
        pub fail_writes: bool,
        pub log: Vec<BusOp>,
    }

    impl FakeBus {
        pub fn with_inputs(values: impl IntoIterator<Item = (u16, u16)>) -> Self {
            Self { inputs: values.into_iter().collect(), ..Self::default() }
        }

        pub fn with_holdings(values: impl IntoIterator<Item = (u16, u16)>) -> Self {
            Self { holdings: values.into_iter().collect(), ..Self::default() }
        }

        pub fn writes(&self) -> Vec<BusOp> {
            self.log
                .iter()
                .filter(|op| {
                    matches!(op, BusOp::WriteHolding { .. } | BusOp::WriteCoil { .. })
                })
                .copied()
                .collect()
        }

        fn read(bank: &HashMap<u16, u16>, address: u16, count: u16) -> Vec<u16> {
            (address..address + count).map(|a| bank.get(&a).copied().unwrap_or(0)).collect()
        }
    }

    impl RegisterBus for FakeBus {
        async fn read_inputs(&mut self, address: u16, count: u16) -> Option<Vec<u16>> {
            assert!(count <= MAX_REGISTERS_PER_REQUEST);
            self.log.push(BusOp::ReadInputs { address, count });
            if self.fail_input_reads_at.contains(&address) {
                return None;
            }
            Some(Self::read(&self.inputs, address, count))
        }

        async fn read_holdings(&mut self, address: u16, count: u16) -> Option<Vec<u16>> {
            assert!(count <= MAX_REGISTERS_PER_REQUEST);
            self.log.push(BusOp::ReadHoldings { address, count });
            if self.fail_holding_reads_at.contains(&address) {
                return None;
            }
            Some(Self::read(&self.holdings, address, count))
        }

        async fn write_holding(&mut self, address: u16, value: u16) -> bool {
            self.log.push(BusOp::WriteHolding { address, value });
            if self.fail_writes {
                return false;
            }
            self.holdings.insert(address, value);
            true
        }

        async fn write_coil(&mut self, address: u16, on: bool) -> bool {
            self.log.push(BusOp::WriteCoil { address, on });
            !self.fail_writes
        }
    }
}
