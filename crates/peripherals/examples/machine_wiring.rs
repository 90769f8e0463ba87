//! Minimal machine wiring: a DMA stream paced by the I²C receive-request
//! line, the way a full machine definition would connect them.
//!
//! The bus here is a bare test RAM, so the stream's peripheral address
//! points at a stub backing region rather than the I²C data register; the
//! point of the demo is the request-line handshake — one DMA item moves per
//! byte the I²C controller has ready.
//!
//! Run with `cargo run -p peripherals --example machine_wiring`.

use std::sync::{Arc, Mutex};

use machine::mocks::SparseRam;
use machine::{AccessWidth, ImmediateSync, Peripheral};
use peripherals::{DeviceError, I2cDevice, StmDma, StmI2c};

/// A slave that serves one byte per batch from a canned message.
struct Beacon {
    message: Vec<u8>,
    cursor: usize,
}

impl I2cDevice for Beacon {
    fn write(&mut self, _data: &[u8]) -> Result<(), DeviceError> {
        Ok(())
    }

    fn read(&mut self) -> Result<Vec<u8>, DeviceError> {
        let byte = self.message.get(self.cursor).copied();
        self.cursor += 1;
        Ok(byte.into_iter().collect())
    }

    fn finish_transmission(&mut self) -> Result<(), DeviceError> {
        self.cursor = 0;
        Ok(())
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let ram = Arc::new(Mutex::new(SparseRam::new()));
    let dma = Arc::new(StmDma::new(ram.clone(), Arc::new(ImmediateSync)));
    let i2c = StmI2c::new(Arc::new(ImmediateSync));

    let message = b"canlab".to_vec();
    i2c.attach_child(
        0x50,
        Box::new(Beacon {
            message: message.clone(),
            cursor: 0,
        }),
    )
    .expect("address 0x50 is free");

    // Receive-request line → stream 0 request pin.
    let sink = dma.clone();
    i2c.dma_rx_request()
        .on_change(move |level| sink.set_request(0, level));

    // Stream 0: one byte per request from the stub region into the buffer.
    let source = 0x4000_5410u32;
    let destination = 0x2000_0000u32;
    ram.lock().expect("ram lock").fill_pattern(source, 1, 0xC5);
    dma.write(0x14, message.len() as u32, AccessWidth::Word); // NDTR
    dma.write(0x18, source, AccessWidth::Word); // PAR
    dma.write(0x1C, destination, AccessWidth::Word); // M0AR
    dma.write(0x10, 1 | (1 << 10), AccessWidth::Word); // CR: EN | MINC

    // Software side of the I²C read transaction.
    i2c.write(0x04, 1 << 11, AccessWidth::Word); // CR2: DMAEN
    i2c.write(0x00, 1 | (1 << 8), AccessWidth::Word); // CR1: PE | START
    i2c.write(0x10, u32::from((0x50u8 << 1) | 1), AccessWidth::Word);
    let _ = i2c.read(0x14, AccessWidth::Word); // SR1
    let _ = i2c.read(0x18, AccessWidth::Word); // SR2: triggers the first pull

    // Each DR read drains the queue; the refill re-pulses the request line
    // and the DMA moves one more item.
    let mut received = Vec::new();
    for _ in 0..message.len() {
        received.push(i2c.read(0x10, AccessWidth::Byte) as u8);
    }
    i2c.write(0x00, 1 | (1 << 9), AccessWidth::Word); // CR1: PE | STOP

    let status = dma.read(0x00, AccessWidth::Word);
    let ram = ram.lock().expect("ram lock");
    println!("message read over i2c: {:?}", String::from_utf8_lossy(&received));
    println!("dma items moved:      {}", ram.copies().len());
    println!("LISR after transfer:  {status:#010x}");
}
