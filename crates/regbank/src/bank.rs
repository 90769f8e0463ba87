//! Register composition and the access dispatcher.

use std::collections::BTreeMap;

use tracing::warn;

use crate::field::{Access, Field, FieldKind};

type RegHook<S> = Box<dyn FnMut(&mut S) + Send>;

/// A named 32-bit register: a set of disjoint fields plus optional hooks
/// that run after the whole register was read or written.
///
/// Register-level hooks exist for peripherals whose hardware contract is
/// triggered by *the access itself* rather than by a particular field value
/// (the I²C SR1→SR2 read order is the canonical case).
pub struct Register<S> {
    name: &'static str,
    fields: Vec<Field<S>>,
    after_read: Option<RegHook<S>>,
    after_write: Option<RegHook<S>>,
}

impl<S> Register<S> {
    /// Compose a register from disjoint fields.
    pub fn new(name: &'static str, fields: Vec<Field<S>>) -> Self {
        let mut occupied = 0u32;
        for field in &fields {
            let mask = field.mask_in_place();
            assert!(
                occupied & mask == 0,
                "register {name}: field {} overlaps",
                field.name
            );
            occupied |= mask;
        }
        Self {
            name,
            fields,
            after_read: None,
            after_write: None,
        }
    }

    /// Run a hook after every read of this register.
    pub fn after_read(mut self, hook: impl FnMut(&mut S) + Send + 'static) -> Self {
        self.after_read = Some(Box::new(hook));
        self
    }

    /// Run a hook after every write to this register.
    pub fn after_write(mut self, hook: impl FnMut(&mut S) + Send + 'static) -> Self {
        self.after_write = Some(Box::new(hook));
        self
    }

    fn read(&mut self, state: &mut S, bank: &'static str, offset: u32) -> u32 {
        let mut word = 0u32;
        for field in &mut self.fields {
            if matches!(field.kind, FieldKind::Reserved) {
                continue;
            }
            if !field.access.readable() {
                continue;
            }
            let value = match field.read.as_mut() {
                Some(read) => read(state),
                None => field.value,
            };
            word |= (value << field.pos) & field.mask_in_place();
            if matches!(field.access, Access::ReadToClear) {
                field.value = 0;
            }
        }
        tracing::trace!(bank, register = self.name, offset, value = word, "read");
        if let Some(hook) = self.after_read.as_mut() {
            hook(state);
        }
        word
    }

    fn write(&mut self, state: &mut S, bank: &'static str, offset: u32, word: u32) {
        tracing::trace!(bank, register = self.name, offset, value = word, "write");
        for field in &mut self.fields {
            let new = field.extract(word);
            let old = field.value;
            match field.kind {
                FieldKind::Reserved => continue,
                FieldKind::Unimplemented(tag) => {
                    if new != 0 {
                        warn!(
                            bank,
                            register = self.name,
                            field = tag,
                            value = new,
                            "write to unimplemented field"
                        );
                    }
                    continue;
                }
                _ => {}
            }
            match field.access {
                Access::Read => continue,
                Access::Write | Access::ReadWrite => field.value = new,
                Access::ReadToClear => continue,
                Access::WriteOneToClear => field.value = old & !new,
                Access::WriteZeroToClear => field.value = old & new,
            }
            if let Some(write) = field.write.as_mut() {
                write(state, old, new);
            }
            if old != new {
                if let Some(changed) = field.changed.as_mut() {
                    changed(state, old, new);
                }
            }
        }
        if let Some(hook) = self.after_write.as_mut() {
            hook(state);
        }
    }

    fn reset(&mut self) {
        for field in &mut self.fields {
            field.value = field.reset;
        }
    }
}

/// Offset → register table with a single read/write/reset dispatcher.
pub struct RegisterBank<S> {
    name: &'static str,
    registers: BTreeMap<u32, Register<S>>,
}

impl<S> RegisterBank<S> {
    /// Create an empty bank.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            registers: BTreeMap::new(),
        }
    }

    /// Mount `register` at a word-aligned byte offset.
    pub fn register(&mut self, offset: u32, register: Register<S>) {
        assert!(offset % 4 == 0, "register {} not word aligned", register.name);
        let previous = self.registers.insert(offset, register);
        assert!(previous.is_none(), "duplicate register at {offset:#x}");
    }

    /// Read the 32-bit register at `offset`. Unhandled offsets read zero.
    pub fn read(&mut self, state: &mut S, offset: u32) -> u32 {
        match self.registers.get_mut(&offset) {
            Some(register) => register.read(state, self.name, offset),
            None => {
                warn!(bank = self.name, offset, "unhandled read");
                0
            }
        }
    }

    /// Write the 32-bit register at `offset`. Unhandled offsets drop the
    /// value.
    pub fn write(&mut self, state: &mut S, offset: u32, value: u32) {
        match self.registers.get_mut(&offset) {
            Some(register) => register.write(state, self.name, offset, value),
            None => {
                warn!(
                    bank = self.name,
                    offset,
                    value,
                    "unhandled write"
                );
            }
        }
    }

    /// Restore every field to its declared reset value. Callbacks do not
    /// fire; reset is not a software access.
    pub fn reset(&mut self) {
        for register in self.registers.values_mut() {
            register.reset();
        }
    }

    /// Whether an offset has a register mounted.
    pub fn is_mapped(&self, offset: u32) -> bool {
        self.registers.contains_key(&offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Probe {
        reads: u32,
        last_change: Option<(u32, u32)>,
    }

    fn flag_bank() -> RegisterBank<Probe> {
        let mut bank = RegisterBank::new("test");
        bank.register(
            0x0,
            Register::new(
                "CTRL",
                vec![
                    Field::flag("EN", 0),
                    Field::value("MODE", 4, 2).reset(0b10),
                    Field::reserved(8, 8),
                ],
            ),
        );
        bank
    }

    #[test]
    fn reset_values_compose_into_word() {
        let mut bank = flag_bank();
        let mut probe = Probe::default();
        assert_eq!(bank.read(&mut probe, 0x0), 0b10_0000);
    }

    #[test]
    fn write_then_read_round_trips_rw_fields() {
        let mut bank = flag_bank();
        let mut probe = Probe::default();
        bank.write(&mut probe, 0x0, 0b01_0001);
        assert_eq!(bank.read(&mut probe, 0x0), 0b01_0001);
    }

    #[test]
    fn reserved_bits_read_zero_and_ignore_writes() {
        let mut bank = flag_bank();
        let mut probe = Probe::default();
        bank.write(&mut probe, 0x0, 0xFF00);
        assert_eq!(bank.read(&mut probe, 0x0) & 0xFF00, 0);
    }

    #[test]
    fn unhandled_offset_reads_zero() {
        let mut bank = flag_bank();
        let mut probe = Probe::default();
        assert_eq!(bank.read(&mut probe, 0x44), 0);
    }

    #[test]
    fn read_callback_overrides_stored_value() {
        let mut bank = RegisterBank::new("test");
        bank.register(
            0x0,
            Register::new(
                "STAT",
                vec![Field::value("COUNT", 0, 8).on_read(|probe: &mut Probe| {
                    probe.reads += 1;
                    probe.reads
                })],
            ),
        );
        let mut probe = Probe::default();
        assert_eq!(bank.read(&mut probe, 0x0), 1);
        assert_eq!(bank.read(&mut probe, 0x0), 2);
    }

    #[test]
    fn change_callback_fires_only_on_change() {
        let mut bank = RegisterBank::new("test");
        bank.register(
            0x0,
            Register::new(
                "CTRL",
                vec![Field::flag("EN", 0).on_change(|probe: &mut Probe, old, new| {
                    probe.last_change = Some((old, new));
                })],
            ),
        );
        let mut probe = Probe::default();
        bank.write(&mut probe, 0x0, 0);
        assert_eq!(probe.last_change, None);
        bank.write(&mut probe, 0x0, 1);
        assert_eq!(probe.last_change, Some((0, 1)));
    }

    #[test]
    fn write_one_to_clear_drops_only_written_bits() {
        let mut bank = RegisterBank::new("test");
        bank.register(
            0x0,
            Register::new(
                "ISR",
                vec![Field::value("FLAGS", 0, 4)
                    .access(Access::WriteOneToClear)
                    .reset(0b1111)],
            ),
        );
        let mut probe = Probe::default();
        bank.write(&mut probe, 0x0, 0b0101);
        assert_eq!(bank.read(&mut probe, 0x0), 0b1010);
    }

    #[test]
    fn read_to_clear_clears_after_first_read() {
        let mut bank = RegisterBank::new("test");
        bank.register(
            0x0,
            Register::new(
                "ERR",
                vec![Field::flag("AF", 0).access(Access::ReadToClear).reset(1)],
            ),
        );
        let mut probe = Probe::default();
        assert_eq!(bank.read(&mut probe, 0x0), 1);
        assert_eq!(bank.read(&mut probe, 0x0), 0);
    }

    #[test]
    fn after_read_hook_sees_every_access() {
        let count = Arc::new(AtomicU32::new(0));
        let hits = count.clone();
        let mut bank = RegisterBank::new("test");
        bank.register(
            0x0,
            Register::new("SR1", vec![Field::flag("SB", 0)]).after_read(move |_: &mut Probe| {
                hits.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let mut probe = Probe::default();
        let _ = bank.read(&mut probe, 0x0);
        let _ = bank.read(&mut probe, 0x0);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn bank_reset_restores_declared_values() {
        let mut bank = flag_bank();
        let mut probe = Probe::default();
        bank.write(&mut probe, 0x0, 0b11_0001);
        bank.reset();
        assert_eq!(bank.read(&mut probe, 0x0), 0b10_0000);
    }
}
