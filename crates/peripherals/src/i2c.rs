//! STM32F4-family I²C controller, master mode.
//!
//! The software-visible behavior is a single state machine driven by CR1
//! writes, DR accesses, and the SR1→SR2 read order the hardware contract
//! uses to clear the address flag. The observable status flags
//! (ADDR/BTF/RxNE/TxE) are pure derivations of the state and queue
//! occupancy, computed in [`StatusFlags`].
//!
//! Child devices hang off the controller by 7-bit address and speak
//! [`I2cDevice`]: batched writes, batched reads, and an end-of-transaction
//! commit. Child calls triggered by register accesses run through the
//! machine scheduler so they land in a synchronized state rather than in
//! the middle of the originating bus transaction.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use machine::{AccessWidth, GpioLine, Peripheral, SyncScheduler};
use regbank::{project_narrow, Field, Register, RegisterBank};
use tracing::{debug, warn};

/// Error raised by a child device. Treated as an abort of the current
/// transaction: the controller returns to idle and raises AF.
#[derive(Debug)]
pub struct DeviceError(pub String);

impl core::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "i2c device error: {}", self.0)
    }
}

impl std::error::Error for DeviceError {}

/// A slave device attached to the controller.
pub trait I2cDevice: Send {
    /// Accept a batch of bytes written by the master.
    fn write(&mut self, data: &[u8]) -> Result<(), DeviceError>;

    /// Produce a batch of bytes for the master to read. May be empty.
    fn read(&mut self) -> Result<Vec<u8>, DeviceError>;

    /// The current transaction ended (STOP or repeated START).
    fn finish_transmission(&mut self) -> Result<(), DeviceError>;
}

/// Errors from controller configuration.
#[derive(Debug, PartialEq, Eq)]
pub enum I2cConfigError {
    /// 7-bit addressing only: valid addresses are 0x00..=0x7F.
    AddressOutOfRange(u8),
    /// A device is already attached at this address.
    AddressInUse(u8),
}

impl core::fmt::Display for I2cConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            I2cConfigError::AddressOutOfRange(addr) => {
                write!(f, "i2c address {addr:#04x} outside 7-bit range")
            }
            I2cConfigError::AddressInUse(addr) => {
                write!(f, "i2c address {addr:#04x} already attached")
            }
        }
    }
}

impl std::error::Error for I2cConfigError {}

/// Transfer direction requested in the address byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum BusDirection {
    #[default]
    Write,
    Read,
}

/// The controller's private state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum TransferState {
    #[default]
    Idle,
    AwaitingAddress,
    AwaitingSr1Read,
    AwaitingSr2Read,
    AwaitingData,
    ReceivingData,
}

/// Observable status flags, derived purely from machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StatusFlags {
    addr: bool,
    rxne: bool,
    txe: bool,
    btf: bool,
    msl: bool,
    busy: bool,
    tra: bool,
}

impl StatusFlags {
    fn derive(
        state: TransferState,
        direction: BusDirection,
        tx_empty: bool,
        rx_empty: bool,
    ) -> Self {
        use TransferState::*;
        let addr = matches!(state, AwaitingSr1Read | AwaitingSr2Read);
        let rxne = state == ReceivingData && !rx_empty;
        let txe = (state == AwaitingData && tx_empty)
            || (direction == BusDirection::Write && addr);
        let btf = matches!(state, AwaitingData | ReceivingData)
            && match direction {
                BusDirection::Read => rxne,
                BusDirection::Write => txe,
            };
        let active = state != Idle;
        Self {
            addr,
            rxne,
            txe,
            btf,
            msl: active,
            busy: active,
            tra: direction == BusDirection::Write && active,
        }
    }
}

/// Child calls that must run in a synchronized state rather than inside
/// the register access that requested them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeferredOp {
    /// Pull a batch from the selected child into the receive queue.
    PullFromChild,
    /// Flush the transmit queue to the selected child.
    FlushToChild,
}

struct I2cCore {
    children: BTreeMap<u8, Box<dyn I2cDevice>>,
    state: TransferState,
    direction: BusDirection,
    selected: Option<u8>,
    tx: VecDeque<u8>,
    rx: VecDeque<u8>,
    sb: bool,
    af: bool,
    peripheral_enabled: bool,
    acknowledge: bool,
    event_enabled: bool,
    buffer_event_enabled: bool,
    error_enabled: bool,
    dma_enabled: bool,
    dma_last: bool,
    event_irq: GpioLine,
    error_irq: GpioLine,
    dma_tx_request: GpioLine,
    dma_rx_request: GpioLine,
    deferred: Vec<DeferredOp>,
    reset_requested: bool,
}

impl I2cCore {
    fn start_written(&mut self) {
        if !self.peripheral_enabled {
            warn!("START while peripheral disabled ignored");
            return;
        }
        match self.state {
            TransferState::Idle => {
                self.state = TransferState::AwaitingAddress;
                self.sb = true;
            }
            TransferState::AwaitingAddress => {
                debug!("repeated START before address byte, staying in address phase");
            }
            _ => {
                // Repeated start: commit the running batch, then open a new
                // address phase on the same bus tenure.
                self.commit_batch();
                self.state = TransferState::AwaitingAddress;
                self.sb = true;
            }
        }
        self.update_lines();
    }

    fn stop_written(&mut self) {
        if self.state == TransferState::Idle {
            debug!("STOP while idle ignored");
            return;
        }
        self.commit_batch();
        self.end_transaction();
    }

    /// Flush any buffered master→slave bytes and close the child's current
    /// transaction.
    fn commit_batch(&mut self) {
        let Some(address) = self.selected else {
            return;
        };
        let pending: Vec<u8> = self.tx.drain(..).collect();
        let result = match self.children.get_mut(&address) {
            Some(child) => {
                let write_result = if pending.is_empty() {
                    Ok(())
                } else {
                    child.write(&pending)
                };
                write_result.and_then(|()| child.finish_transmission())
            }
            None => Ok(()),
        };
        if let Err(err) = result {
            self.abort_transaction(&err);
        }
    }

    fn end_transaction(&mut self) {
        self.state = TransferState::Idle;
        self.selected = None;
        self.direction = BusDirection::Write;
        self.tx.clear();
        self.rx.clear();
        self.sb = false;
        self.update_lines();
    }

    /// A child call failed: the transaction is dead, software sees AF.
    fn abort_transaction(&mut self, err: &DeviceError) {
        warn!(%err, "child aborted transaction");
        self.af = true;
        self.state = TransferState::Idle;
        self.selected = None;
        self.tx.clear();
        self.rx.clear();
        self.sb = false;
        self.update_lines();
    }

    fn address_written(&mut self, byte: u8) {
        let address = byte >> 1;
        let read = byte & 1 == 1;
        self.sb = false;
        if !self.children.contains_key(&address) {
            warn!(address, "no device at address, AF set");
            self.af = true;
            self.state = TransferState::Idle;
            self.selected = None;
            self.update_lines();
            return;
        }
        self.selected = Some(address);
        self.direction = if read {
            BusDirection::Read
        } else {
            BusDirection::Write
        };
        self.state = TransferState::AwaitingSr1Read;
        self.update_lines();
    }

    fn dr_written(&mut self, value: u32) {
        let byte = value as u8;
        match self.state {
            TransferState::AwaitingAddress => self.address_written(byte),
            TransferState::AwaitingData => {
                self.tx.push_back(byte);
                self.deferred.push(DeferredOp::FlushToChild);
                self.update_lines();
            }
            state => {
                warn!(?state, "DR write in unsupported state ignored");
            }
        }
    }

    fn dr_read(&mut self) -> u32 {
        match self.state {
            TransferState::ReceivingData => {
                let byte = match self.rx.pop_front() {
                    Some(byte) => byte,
                    None => {
                        warn!("DR read with empty receive queue");
                        0
                    }
                };
                if self.rx.is_empty() {
                    self.deferred.push(DeferredOp::PullFromChild);
                }
                self.update_lines();
                u32::from(byte)
            }
            state => {
                warn!(?state, "DR read in unsupported state returns 0");
                0
            }
        }
    }

    /// SR1 was read; in the address phase this is the first half of the
    /// ADDR-clearing sequence.
    fn sr1_read(&mut self) {
        if self.state == TransferState::AwaitingSr1Read {
            self.state = TransferState::AwaitingSr2Read;
            self.update_lines();
        }
    }

    /// SR2 was read; completes the address phase. Entering the receive
    /// branch immediately schedules the first child pull.
    fn sr2_read(&mut self) {
        if self.state == TransferState::AwaitingSr2Read {
            self.state = match self.direction {
                BusDirection::Read => {
                    self.deferred.push(DeferredOp::PullFromChild);
                    TransferState::ReceivingData
                }
                BusDirection::Write => TransferState::AwaitingData,
            };
            self.update_lines();
        }
    }

    fn clear_af(&mut self) {
        self.af = false;
        self.update_lines();
    }

    fn run_deferred(&mut self, op: DeferredOp) {
        let Some(address) = self.selected else {
            return;
        };
        match op {
            DeferredOp::PullFromChild => {
                if self.state != TransferState::ReceivingData {
                    return;
                }
                let result = match self.children.get_mut(&address) {
                    Some(child) => child.read(),
                    None => return,
                };
                match result {
                    Ok(batch) => self.rx.extend(batch),
                    Err(err) => {
                        self.abort_transaction(&err);
                        return;
                    }
                }
            }
            DeferredOp::FlushToChild => {
                if self.state != TransferState::AwaitingData || self.tx.is_empty() {
                    return;
                }
                let batch: Vec<u8> = self.tx.drain(..).collect();
                let result = match self.children.get_mut(&address) {
                    Some(child) => child.write(&batch),
                    None => return,
                };
                if let Err(err) = result {
                    self.abort_transaction(&err);
                    return;
                }
            }
        }
        self.update_lines();
    }

    fn flags(&self) -> StatusFlags {
        StatusFlags::derive(
            self.state,
            self.direction,
            self.tx.is_empty(),
            self.rx.is_empty(),
        )
    }

    /// Recompute every outgoing level after a state or queue mutation.
    fn update_lines(&self) {
        let flags = self.flags();
        let event = self.event_enabled
            && (self.sb
                || flags.addr
                || flags.btf
                || (self.buffer_event_enabled && (flags.txe || flags.rxne)));
        let error = self.error_enabled && self.af;
        let dma_rx = self.dma_enabled && flags.rxne && self.state == TransferState::ReceivingData;
        let dma_tx = self.dma_enabled && flags.txe && self.state == TransferState::AwaitingData;

        self.event_irq.set_level(event);
        self.error_irq.set_level(error);
        self.dma_rx_request.set_level(dma_rx);
        self.dma_tx_request.set_level(dma_tx);
    }

    fn reset_state(&mut self) {
        self.state = TransferState::Idle;
        self.direction = BusDirection::Write;
        self.selected = None;
        self.tx.clear();
        self.rx.clear();
        self.sb = false;
        self.af = false;
        self.peripheral_enabled = false;
        self.acknowledge = false;
        self.event_enabled = false;
        self.buffer_event_enabled = false;
        self.error_enabled = false;
        self.dma_enabled = false;
        self.dma_last = false;
        self.deferred.clear();
        self.update_lines();
    }
}

struct I2cInner {
    bank: RegisterBank<I2cCore>,
    core: I2cCore,
}

/// The I²C controller.
pub struct StmI2c {
    inner: Arc<Mutex<I2cInner>>,
    scheduler: Arc<dyn SyncScheduler>,
}

impl StmI2c {
    /// Build a controller over the machine's scheduler.
    pub fn new(scheduler: Arc<dyn SyncScheduler>) -> Self {
        let core = I2cCore {
            children: BTreeMap::new(),
            state: TransferState::default(),
            direction: BusDirection::default(),
            selected: None,
            tx: VecDeque::new(),
            rx: VecDeque::new(),
            sb: false,
            af: false,
            peripheral_enabled: false,
            acknowledge: false,
            event_enabled: false,
            buffer_event_enabled: false,
            error_enabled: false,
            dma_enabled: false,
            dma_last: false,
            event_irq: GpioLine::new("i2c.event"),
            error_irq: GpioLine::new("i2c.error"),
            dma_tx_request: GpioLine::new("i2c.dma_tx"),
            dma_rx_request: GpioLine::new("i2c.dma_rx"),
            deferred: Vec::new(),
            reset_requested: false,
        };
        Self {
            inner: Arc::new(Mutex::new(I2cInner {
                bank: build_bank(),
                core,
            })),
            scheduler,
        }
    }

    /// Attach a child device at a 7-bit address. Fatal at construction time
    /// when the address is out of range or taken.
    pub fn attach_child(
        &self,
        address: u8,
        device: Box<dyn I2cDevice>,
    ) -> Result<(), I2cConfigError> {
        if address > 0x7F {
            return Err(I2cConfigError::AddressOutOfRange(address));
        }
        let Ok(mut inner) = self.inner.lock() else {
            return Ok(());
        };
        if inner.core.children.contains_key(&address) {
            return Err(I2cConfigError::AddressInUse(address));
        }
        inner.core.children.insert(address, device);
        Ok(())
    }

    /// The event-interrupt line.
    pub fn event_irq(&self) -> GpioLine {
        self.line(|core| core.event_irq.clone())
    }

    /// The error-interrupt line.
    pub fn error_irq(&self) -> GpioLine {
        self.line(|core| core.error_irq.clone())
    }

    /// The DMA transmit-request line, asserted while the controller can
    /// accept another DR write in a write transfer.
    pub fn dma_tx_request(&self) -> GpioLine {
        self.line(|core| core.dma_tx_request.clone())
    }

    /// The DMA receive-request line, asserted while a received byte is
    /// waiting in DR.
    pub fn dma_rx_request(&self) -> GpioLine {
        self.line(|core| core.dma_rx_request.clone())
    }

    fn line(&self, select: fn(&I2cCore) -> GpioLine) -> GpioLine {
        match self.inner.lock() {
            Ok(inner) => select(&inner.core),
            Err(poisoned) => select(&poisoned.into_inner().core),
        }
    }

    /// Hand deferred child calls to the scheduler after the register access
    /// that produced them released the controller lock.
    fn dispatch_deferred(&self, ops: Vec<DeferredOp>) {
        for op in ops {
            let inner = self.inner.clone();
            self.scheduler
                .execute_in_nearest_synced_state(Box::new(move || {
                    if let Ok(mut inner) = inner.lock() {
                        let I2cInner { core, .. } = &mut *inner;
                        core.run_deferred(op);
                    }
                }));
        }
    }
}

impl Peripheral for StmI2c {
    fn name(&self) -> &'static str {
        "i2c"
    }

    fn read(&self, offset: u32, width: AccessWidth) -> u32 {
        let (value, ops) = {
            let Ok(mut inner) = self.inner.lock() else {
                return 0;
            };
            let I2cInner { bank, core } = &mut *inner;
            let aligned = offset & !0x3;
            let word = bank.read(core, aligned);
            (
                project_narrow(word, offset, width.bytes()),
                std::mem::take(&mut core.deferred),
            )
        };
        self.dispatch_deferred(ops);
        value
    }

    fn write(&self, offset: u32, value: u32, width: AccessWidth) {
        // Narrow writes land only on word-aligned offsets; widening through
        // a word read here would dequeue DR as a side effect.
        if width != AccessWidth::Word && offset % 4 != 0 {
            warn!(offset, "narrow write at unaligned offset ignored");
            return;
        }
        let ops = {
            let Ok(mut inner) = self.inner.lock() else {
                return;
            };
            let I2cInner { bank, core } = &mut *inner;
            bank.write(core, offset & !0x3, value & width.mask());
            if core.reset_requested {
                core.reset_requested = false;
                bank.reset();
                core.reset_state();
            }
            std::mem::take(&mut core.deferred)
        };
        self.dispatch_deferred(ops);
    }

    fn reset(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            let I2cInner { bank, core } = &mut *inner;
            bank.reset();
            core.reset_state();
        }
    }
}

fn build_bank() -> RegisterBank<I2cCore> {
    let mut bank = RegisterBank::new("i2c");

    bank.register(
        0x00,
        Register::new(
            "CR1",
            vec![
                Field::flag("PE", 0)
                    .on_read(|core: &mut I2cCore| u32::from(core.peripheral_enabled))
                    .on_write(|core: &mut I2cCore, _old, new| {
                        core.peripheral_enabled = new != 0;
                    }),
                Field::flag("START", 8)
                    .access(regbank::Access::Write)
                    .on_write(|core: &mut I2cCore, _old, new| {
                        if new != 0 {
                            core.start_written();
                        }
                    }),
                Field::flag("STOP", 9)
                    .access(regbank::Access::Write)
                    .on_write(|core: &mut I2cCore, _old, new| {
                        if new != 0 {
                            core.stop_written();
                        }
                    }),
                Field::flag("ACK", 10)
                    .on_read(|core: &mut I2cCore| u32::from(core.acknowledge))
                    .on_write(|core: &mut I2cCore, _old, new| {
                        core.acknowledge = new != 0;
                    }),
                Field::unimplemented("POS", 11, 1),
                Field::flag("SWRST", 15)
                    .access(regbank::Access::Write)
                    .on_write(|core: &mut I2cCore, _old, new| {
                        if new != 0 {
                            core.reset_requested = true;
                        }
                    }),
            ],
        ),
    );

    bank.register(
        0x04,
        Register::new(
            "CR2",
            vec![
                Field::value("FREQ", 0, 6),
                Field::flag("ITERREN", 8).on_write(|core: &mut I2cCore, _old, new| {
                    core.error_enabled = new != 0;
                    core.update_lines();
                }),
                Field::flag("ITEVTEN", 9).on_write(|core: &mut I2cCore, _old, new| {
                    core.event_enabled = new != 0;
                    core.update_lines();
                }),
                Field::flag("ITBUFEN", 10).on_write(|core: &mut I2cCore, _old, new| {
                    core.buffer_event_enabled = new != 0;
                    core.update_lines();
                }),
                Field::flag("DMAEN", 11).on_write(|core: &mut I2cCore, _old, new| {
                    core.dma_enabled = new != 0;
                    core.update_lines();
                }),
                Field::flag("LAST", 12).on_write(|core: &mut I2cCore, _old, new| {
                    core.dma_last = new != 0;
                }),
            ],
        ),
    );

    bank.register(0x08, Register::new("OAR1", vec![Field::value("OAR1", 0, 16)]));
    bank.register(0x0C, Register::new("OAR2", vec![Field::value("OAR2", 0, 16)]));

    bank.register(
        0x10,
        Register::new(
            "DR",
            vec![Field::value("DR", 0, 8)
                .on_read(I2cCore::dr_read)
                .on_write(|core: &mut I2cCore, _old, new| core.dr_written(new))],
        ),
    );

    bank.register(
        0x14,
        Register::new(
            "SR1",
            vec![
                Field::flag("SB", 0)
                    .access(regbank::Access::Read)
                    .on_read(|core: &mut I2cCore| u32::from(core.sb)),
                Field::flag("ADDR", 1)
                    .access(regbank::Access::Read)
                    .on_read(|core: &mut I2cCore| u32::from(core.flags().addr)),
                Field::flag("BTF", 2)
                    .access(regbank::Access::Read)
                    .on_read(|core: &mut I2cCore| u32::from(core.flags().btf)),
                Field::flag("RXNE", 6)
                    .access(regbank::Access::Read)
                    .on_read(|core: &mut I2cCore| u32::from(core.flags().rxne)),
                Field::flag("TXE", 7)
                    .access(regbank::Access::Read)
                    .on_read(|core: &mut I2cCore| u32::from(core.flags().txe)),
                // AF is sticky; software clears it by writing 0 here.
                Field::flag("AF", 10)
                    .on_read(|core: &mut I2cCore| u32::from(core.af))
                    .on_write(|core: &mut I2cCore, _old, new| {
                        if new == 0 {
                            core.clear_af();
                        }
                    }),
            ],
        )
        .after_read(I2cCore::sr1_read),
    );

    bank.register(
        0x18,
        Register::new(
            "SR2",
            vec![
                Field::flag("MSL", 0)
                    .access(regbank::Access::Read)
                    .on_read(|core: &mut I2cCore| u32::from(core.flags().msl)),
                Field::flag("BUSY", 1)
                    .access(regbank::Access::Read)
                    .on_read(|core: &mut I2cCore| u32::from(core.flags().busy)),
                Field::flag("TRA", 2)
                    .access(regbank::Access::Read)
                    .on_read(|core: &mut I2cCore| u32::from(core.flags().tra)),
            ],
        )
        .after_read(I2cCore::sr2_read),
    );

    bank.register(0x1C, Register::new("CCR", vec![Field::value("CCR", 0, 16)]));
    bank.register(
        0x20,
        Register::new("TRISE", vec![Field::value("TRISE", 0, 6).reset(0x2)]),
    );
    bank.register(0x24, Register::new("FLTR", vec![Field::value("FLTR", 0, 5)]));

    bank
}
