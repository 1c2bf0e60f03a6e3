use rustc_hash::FxHashMap;
use tracing::debug;

use karst_shared::protocol::to_client;
use karst_shared::wire::{PacketReader, WireError};

use crate::client::Client;
use crate::net::Transport;

/// One handler per client-bound opcode. Plain function pointers so the
/// table is copyable and dispatch never borrows it across the call.
pub type PacketHandler<T> = fn(&mut Client<T>, &mut PacketReader) -> Result<(), WireError>;

pub type HandlerTable<T> = FxHashMap<u16, PacketHandler<T>>;

/// Per-opcode receive counts, reported and cleared on a fixed cadence.
/// Diagnostics only; losing it would change no behavior.
#[derive(Default)]
pub struct PacketCounter {
    counts: FxHashMap<u16, u32>,
}

impl PacketCounter {
    pub fn add(&mut self, opcode: u16) {
        *self.counts.entry(opcode).or_insert(0) += 1;
    }

    pub fn sum(&self) -> u32 {
        self.counts.values().sum()
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }

    pub fn report(&self, window_secs: f32) {
        let sum = self.sum();
        debug!(
            "packet counter ({window_secs}s): sum={sum} avg={:.1}/s",
            sum as f32 / window_secs
        );
        let mut entries: Vec<(u16, u32)> = self.counts.iter().map(|(k, v)| (*k, *v)).collect();
        entries.sort_unstable_by_key(|(opcode, _)| *opcode);
        for (opcode, count) in entries {
            let name = to_client::name(opcode).unwrap_or("?");
            debug!("  cmd 0x{opcode:04X} ({name}) count {count}");
        }
    }
}
