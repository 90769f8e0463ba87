//! STM32 F2/F4-family DMA controller.
//!
//! Eight independent streams share one 1 KiB register region:
//!
//! ```text
//! 0x00 LISR    transfer-complete status, streams 0-3
//! 0x04 HISR    transfer-complete status, streams 4-7
//! 0x08 LIFCR   write-1-to-clear, streams 0-3
//! 0x0C HIFCR   write-1-to-clear, streams 4-7
//! 0x10 + 0x18*n   per-stream block: CR, NDTR, PAR, M0AR, M1AR, FCR
//! ```
//!
//! Memory-to-memory streams burst the whole block on enable; peripheral
//! streams move one item per request pulse. Completion IRQ edges are
//! deferred to the machine's nearest synchronized state so the ISR never
//! runs inside the bus write that finished the transfer.

use std::sync::{Arc, Mutex};

use machine::{
    bus::SharedBus, AccessWidth, GpioLine, Peripheral, SyncScheduler,
};
use regbank::{merge_narrow, project_narrow, Field, Register, RegisterBank};
use tracing::{debug, error, warn};

/// Number of streams multiplexed over the controller.
pub const STREAM_COUNT: usize = 8;

const STREAM_BASE: u32 = 0x10;
const STREAM_STRIDE: u32 = 0x18;

/// Bit position of the transfer-complete flag for stream `n % 4` within its
/// status half. The scatter is a hardware artifact and load-bearing for
/// software that masks LISR/HISR directly.
const TC_BIT: [u8; 4] = [5, 11, 21, 27];

/// Transfer direction, from the CR DIR field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Direction {
    #[default]
    PeripheralToMemory,
    MemoryToPeripheral,
    MemoryToMemory,
}

impl Direction {
    fn from_bits(bits: u32, stream: usize) -> Self {
        match bits {
            0 => Direction::PeripheralToMemory,
            1 => Direction::MemoryToPeripheral,
            2 => Direction::MemoryToMemory,
            _ => {
                warn!(stream, "reserved DIR value, treating as peripheral-to-memory");
                Direction::PeripheralToMemory
            }
        }
    }

    fn bits(self) -> u32 {
        match self {
            Direction::PeripheralToMemory => 0,
            Direction::MemoryToPeripheral => 1,
            Direction::MemoryToMemory => 2,
        }
    }
}

/// Item size on one side of a transfer, from PSIZE/MSIZE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum TransferSize {
    #[default]
    Byte,
    HalfWord,
    Word,
}

impl TransferSize {
    fn from_bits(bits: u32, stream: usize, field: &'static str) -> Self {
        match bits {
            0 => TransferSize::Byte,
            1 => TransferSize::HalfWord,
            2 => TransferSize::Word,
            _ => {
                warn!(stream, field, "reserved size value, treating as byte");
                TransferSize::Byte
            }
        }
    }

    fn bits(self) -> u32 {
        match self {
            TransferSize::Byte => 0,
            TransferSize::HalfWord => 1,
            TransferSize::Word => 2,
        }
    }

    fn bytes(self) -> u32 {
        match self {
            TransferSize::Byte => 1,
            TransferSize::HalfWord => 2,
            TransferSize::Word => 4,
        }
    }
}

#[derive(Default)]
struct Stream {
    enabled: bool,
    request_pending: bool,
    finished: bool,
    tc_interrupt_enable: bool,
    circular: bool,
    peripheral_increment: bool,
    memory_increment: bool,
    direction: Direction,
    peripheral_size: TransferSize,
    memory_size: TransferSize,
    peripheral_address: u32,
    memory0_address: u32,
    memory1_address: u32,
    ndt: u16,
    ndt_latch: u16,
}

/// Controller state shared by every register callback. One lock in
/// [`StmDma`] covers the whole structure: the finished bits, the request
/// latches, and stream reconfiguration are all serialized through it.
struct DmaCore {
    bus: SharedBus,
    scheduler: Arc<dyn SyncScheduler>,
    streams: [Stream; STREAM_COUNT],
    irq: [GpioLine; STREAM_COUNT],
}

impl DmaCore {
    fn enable_written(&mut self, index: usize, requested: bool) {
        let stream = &mut self.streams[index];
        if requested && !stream.enabled {
            stream.ndt_latch = stream.ndt;
            let total = u32::from(stream.ndt) * stream.peripheral_size.bytes();
            if stream.ndt == 0 || stream.memory_size.bytes() > total {
                error!(
                    stream = index,
                    ndt = stream.ndt,
                    "transfer request rejected, stream disabled"
                );
                return;
            }
            stream.enabled = true;
            if stream.direction == Direction::MemoryToMemory && stream.request_pending {
                self.select_transfer(index);
            }
        } else if !requested && stream.enabled {
            // Cancels arming only; finished state and the IRQ line persist.
            stream.enabled = false;
        }
    }

    /// A pulse on the external request pin of `index`.
    fn request_changed(&mut self, index: usize, level: bool) {
        let stream = &mut self.streams[index];
        let rising = level && !stream.request_pending;
        stream.request_pending = level;
        if !rising {
            return;
        }
        if stream.enabled {
            self.select_transfer(index);
        } else {
            debug!(stream = index, "request pulse on disabled stream ignored");
        }
    }

    fn select_transfer(&mut self, index: usize) {
        match self.streams[index].direction {
            Direction::MemoryToMemory => self.do_memory_transfer(index),
            _ => self.do_peripheral_transfer(index),
        }
    }

    /// Burst the whole remaining block in a single bus copy.
    fn do_memory_transfer(&mut self, index: usize) {
        let stream = &self.streams[index];
        let already = u32::from(stream.ndt_latch - stream.ndt);
        let src = advance(
            stream.peripheral_address,
            stream.peripheral_increment,
            already,
            stream.peripheral_size,
        );
        let dst = advance(
            stream.memory0_address,
            stream.memory_increment,
            already,
            stream.memory_size,
        );
        let len = u32::from(stream.ndt) * stream.peripheral_size.bytes();

        if let Err(err) = self.copy(src, dst, len as usize) {
            error!(stream = index, %err, "memory-to-memory copy failed, stream disabled");
            self.streams[index].enabled = false;
            return;
        }

        let stream = &mut self.streams[index];
        if stream.circular {
            stream.ndt = stream.ndt_latch;
        } else {
            stream.ndt = 0;
            stream.enabled = false;
        }
        self.complete(index);
    }

    /// Move exactly one peripheral-sized item.
    fn do_peripheral_transfer(&mut self, index: usize) {
        let stream = &self.streams[index];
        let already = u32::from(stream.ndt_latch - stream.ndt);
        let (src, dst) = match stream.direction {
            Direction::PeripheralToMemory => (
                advance(
                    stream.peripheral_address,
                    stream.peripheral_increment,
                    already,
                    stream.peripheral_size,
                ),
                advance(
                    stream.memory0_address,
                    stream.memory_increment,
                    already,
                    stream.memory_size,
                ),
            ),
            Direction::MemoryToPeripheral => (
                advance(
                    stream.memory0_address,
                    stream.memory_increment,
                    already,
                    stream.memory_size,
                ),
                advance(
                    stream.peripheral_address,
                    stream.peripheral_increment,
                    already,
                    stream.peripheral_size,
                ),
            ),
            Direction::MemoryToMemory => return,
        };
        let len = stream.peripheral_size.bytes() as usize;

        if let Err(err) = self.copy(src, dst, len) {
            error!(stream = index, %err, "peripheral transfer failed, stream disabled");
            self.streams[index].enabled = false;
            return;
        }

        let stream = &mut self.streams[index];
        stream.ndt -= 1;
        if stream.ndt > 0 {
            return;
        }
        if stream.circular {
            stream.ndt = stream.ndt_latch;
        } else {
            stream.enabled = false;
        }
        self.complete(index);
    }

    fn copy(&self, src: u32, dst: u32, len: usize) -> Result<(), machine::BusError> {
        match self.bus.lock() {
            Ok(mut bus) => bus.copy_block(src, dst, len),
            Err(_) => {
                error!("bus lock poisoned, copy dropped");
                Ok(())
            }
        }
    }

    /// Set the finished bit and, if enabled, schedule the IRQ edge for the
    /// next synchronized state.
    fn complete(&mut self, index: usize) {
        let stream = &mut self.streams[index];
        stream.finished = true;
        if stream.tc_interrupt_enable {
            let line = self.irq[index].clone();
            self.scheduler
                .execute_in_nearest_synced_state(Box::new(move || line.raise()));
        }
    }

    /// Software wrote 1 into the clear position of `index`.
    fn clear_finished(&mut self, index: usize) {
        self.streams[index].finished = false;
        self.irq[index].lower();
    }

    fn reset_state(&mut self) {
        for (index, stream) in self.streams.iter_mut().enumerate() {
            *stream = Stream::default();
            self.irq[index].lower();
        }
    }
}

fn advance(base: u32, increment: bool, items: u32, size: TransferSize) -> u32 {
    if increment {
        base.wrapping_add(items * size.bytes())
    } else {
        base
    }
}

struct DmaInner {
    bank: RegisterBank<DmaCore>,
    core: DmaCore,
}

/// The DMA controller. `Clone`-free: the machine owns one handle and hands
/// out [`GpioLine`] clones for the stream IRQs.
pub struct StmDma {
    inner: Mutex<DmaInner>,
}

impl StmDma {
    /// Build a controller over the machine's bus and scheduler.
    pub fn new(bus: SharedBus, scheduler: Arc<dyn SyncScheduler>) -> Self {
        const IRQ_NAMES: [&str; STREAM_COUNT] = [
            "dma.stream0.irq",
            "dma.stream1.irq",
            "dma.stream2.irq",
            "dma.stream3.irq",
            "dma.stream4.irq",
            "dma.stream5.irq",
            "dma.stream6.irq",
            "dma.stream7.irq",
        ];
        let irq = IRQ_NAMES.map(GpioLine::new);
        let core = DmaCore {
            bus,
            scheduler,
            streams: Default::default(),
            irq,
        };
        let bank = build_bank();
        Self {
            inner: Mutex::new(DmaInner { bank, core }),
        }
    }

    /// The outgoing transfer-complete IRQ line of `stream`.
    pub fn irq_line(&self, stream: usize) -> GpioLine {
        match self.inner.lock() {
            Ok(inner) => inner.core.irq[stream].clone(),
            Err(poisoned) => poisoned.into_inner().core.irq[stream].clone(),
        }
    }

    /// Drive the incoming peripheral request pin of `stream`.
    ///
    /// Level semantics: a rising edge on an enabled stream dispatches a
    /// transfer, a rising edge on a disabled stream is ignored, the latch
    /// tracks the level either way.
    pub fn set_request(&self, stream: usize, level: bool) {
        if stream >= STREAM_COUNT {
            warn!(stream, "request for stream out of range ignored");
            return;
        }
        if let Ok(mut inner) = self.inner.lock() {
            inner.core.request_changed(stream, level);
        }
    }
}

impl Peripheral for StmDma {
    fn name(&self) -> &'static str {
        "dma"
    }

    fn read(&self, offset: u32, width: AccessWidth) -> u32 {
        let Ok(mut inner) = self.inner.lock() else {
            return 0;
        };
        let DmaInner { bank, core } = &mut *inner;
        let aligned = offset & !0x3;
        let word = bank.read(core, aligned);
        project_narrow(word, offset, width.bytes())
    }

    fn write(&self, offset: u32, value: u32, width: AccessWidth) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let DmaInner { bank, core } = &mut *inner;
        let aligned = offset & !0x3;
        let word = match width {
            AccessWidth::Word => value,
            // Narrow writes widen read-modify-write; the DMA bank has no
            // read side effects, so the preliminary read is safe.
            _ => {
                let current = bank.read(core, aligned);
                merge_narrow(current, offset, value, width.bytes())
            }
        };
        bank.write(core, aligned, word);
    }

    fn reset(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            let DmaInner { bank, core } = &mut *inner;
            bank.reset();
            core.reset_state();
        }
    }
}

/// The interrupt block plus eight stream blocks, all table-driven.
fn build_bank() -> RegisterBank<DmaCore> {
    let mut bank = RegisterBank::new("dma");

    bank.register(0x00, status_register("LISR", 0));
    bank.register(0x04, status_register("HISR", 4));
    bank.register(0x08, clear_register("LIFCR", 0));
    bank.register(0x0C, clear_register("HIFCR", 4));

    for index in 0..STREAM_COUNT {
        let base = STREAM_BASE + STREAM_STRIDE * index as u32;
        bank.register(base, stream_control(index));
        bank.register(base + 0x04, stream_ndtr(index));
        bank.register(
            base + 0x08,
            stream_address("PAR", index, |stream| &mut stream.peripheral_address),
        );
        bank.register(
            base + 0x0C,
            stream_address("M0AR", index, |stream| &mut stream.memory0_address),
        );
        bank.register(
            base + 0x10,
            stream_address("M1AR", index, |stream| &mut stream.memory1_address),
        );
        bank.register(base + 0x14, stream_fcr());
    }

    bank
}

fn status_register(name: &'static str, first_stream: usize) -> Register<DmaCore> {
    let mut fields = Vec::new();
    for slot in 0..4 {
        let index = first_stream + slot;
        fields.push(
            Field::flag(tc_flag_name(index), TC_BIT[slot])
                .access(regbank::Access::Read)
                .on_read(move |core: &mut DmaCore| u32::from(core.streams[index].finished)),
        );
    }
    Register::new(name, fields)
}

fn clear_register(name: &'static str, first_stream: usize) -> Register<DmaCore> {
    let mut fields = Vec::new();
    for slot in 0..4 {
        let index = first_stream + slot;
        fields.push(
            Field::flag(tc_clear_name(index), TC_BIT[slot])
                .access(regbank::Access::Write)
                .on_write(move |core: &mut DmaCore, _old, new| {
                    if new != 0 {
                        core.clear_finished(index);
                    }
                }),
        );
    }
    Register::new(name, fields)
}

fn stream_control(index: usize) -> Register<DmaCore> {
    // Fields dispatch in declaration order; EN sits last so a single CR
    // write configures direction and sizes before the enable edge arms the
    // stream.
    Register::new(
        "CR",
        vec![
            Field::unimplemented("DMEIE", 1, 1),
            Field::unimplemented("TEIE", 2, 1),
            Field::unimplemented("HTIE", 3, 1),
            Field::flag("TCIE", 4)
                .on_read(move |core: &mut DmaCore| {
                    u32::from(core.streams[index].tc_interrupt_enable)
                })
                .on_write(move |core: &mut DmaCore, _old, new| {
                    core.streams[index].tc_interrupt_enable = new != 0;
                }),
            Field::unimplemented("PFCTRL", 5, 1),
            Field::enumerated("DIR", 6, 2)
                .on_read(move |core: &mut DmaCore| core.streams[index].direction.bits())
                .on_write(move |core: &mut DmaCore, _old, new| {
                    core.streams[index].direction = Direction::from_bits(new, index);
                }),
            Field::flag("CIRC", 8)
                .on_read(move |core: &mut DmaCore| u32::from(core.streams[index].circular))
                .on_write(move |core: &mut DmaCore, _old, new| {
                    core.streams[index].circular = new != 0;
                }),
            Field::flag("PINC", 9)
                .on_read(move |core: &mut DmaCore| {
                    u32::from(core.streams[index].peripheral_increment)
                })
                .on_write(move |core: &mut DmaCore, _old, new| {
                    core.streams[index].peripheral_increment = new != 0;
                }),
            Field::flag("MINC", 10)
                .on_read(move |core: &mut DmaCore| {
                    u32::from(core.streams[index].memory_increment)
                })
                .on_write(move |core: &mut DmaCore, _old, new| {
                    core.streams[index].memory_increment = new != 0;
                }),
            Field::enumerated("PSIZE", 11, 2)
                .on_read(move |core: &mut DmaCore| core.streams[index].peripheral_size.bits())
                .on_write(move |core: &mut DmaCore, _old, new| {
                    core.streams[index].peripheral_size =
                        TransferSize::from_bits(new, index, "PSIZE");
                }),
            Field::enumerated("MSIZE", 13, 2)
                .on_read(move |core: &mut DmaCore| core.streams[index].memory_size.bits())
                .on_write(move |core: &mut DmaCore, _old, new| {
                    core.streams[index].memory_size =
                        TransferSize::from_bits(new, index, "MSIZE");
                }),
            Field::unimplemented("PINCOS", 15, 1),
            Field::unimplemented("PL", 16, 2),
            Field::unimplemented("DBM", 18, 1),
            Field::unimplemented("CT", 19, 1),
            Field::unimplemented("PBURST", 21, 2),
            Field::unimplemented("MBURST", 23, 2),
            Field::unimplemented("CHSEL", 25, 3),
            Field::flag("EN", 0)
                .on_read(move |core: &mut DmaCore| u32::from(core.streams[index].enabled))
                .on_write(move |core: &mut DmaCore, _old, new| {
                    core.enable_written(index, new != 0);
                }),
        ],
    )
}

fn stream_ndtr(index: usize) -> Register<DmaCore> {
    Register::new(
        "NDTR",
        vec![Field::value("NDT", 0, 16)
            .on_read(move |core: &mut DmaCore| u32::from(core.streams[index].ndt))
            .on_write(move |core: &mut DmaCore, _old, new| {
                let stream = &mut core.streams[index];
                if stream.enabled {
                    warn!(stream = index, "NDTR write while enabled ignored");
                    return;
                }
                stream.ndt = new as u16;
            })],
    )
}

fn stream_address(
    name: &'static str,
    index: usize,
    select: fn(&mut Stream) -> &mut u32,
) -> Register<DmaCore> {
    Register::new(
        name,
        vec![Field::value(name, 0, 32)
            .on_read(move |core: &mut DmaCore| *select(&mut core.streams[index]))
            .on_write(move |core: &mut DmaCore, _old, new| {
                let stream = &mut core.streams[index];
                if stream.enabled {
                    warn!(stream = index, register = name, "write while enabled ignored");
                    return;
                }
                *select(stream) = new;
            })],
    )
}

/// FIFO control is register-visible only; the model always runs in the
/// equivalent of direct mode.
fn stream_fcr() -> Register<DmaCore> {
    Register::new(
        "FCR",
        vec![
            Field::value("FTH", 0, 2).reset(0x1),
            Field::flag("DMDIS", 2),
            Field::value("FS", 3, 3).access(regbank::Access::Read).reset(0x4),
            Field::unimplemented("FEIE", 7, 1),
        ],
    )
}

fn tc_flag_name(index: usize) -> &'static str {
    const NAMES: [&str; 8] = [
        "TCIF0", "TCIF1", "TCIF2", "TCIF3", "TCIF4", "TCIF5", "TCIF6", "TCIF7",
    ];
    NAMES[index]
}

fn tc_clear_name(index: usize) -> &'static str {
    const NAMES: [&str; 8] = [
        "CTCIF0", "CTCIF1", "CTCIF2", "CTCIF3", "CTCIF4", "CTCIF5", "CTCIF6", "CTCIF7",
    ];
    NAMES[index]
}
