#![no_main]

use jitcache::{BlockCache, CacheConfig, CodeAddr, CompiledCode, ExitLink, HandleJit, ModeBits};
use libfuzzer_sys::fuzz_target;

/// Host whose guest code is a pure function of the address
struct FuzzHost {
    mode: ModeBits,
    next_code: usize,
}

impl HandleJit for FuzzHost {
    type Error = jitcache::error::BlockError;

    fn translate_address(&self, address: u32, mode: ModeBits) -> Option<u32> {
        if mode.contains(ModeBits::INSTRUCTION_TRANSLATION) {
            Some(address & 0x0fff_ffff)
        } else {
            Some(address)
        }
    }

    fn current_mode(&self) -> ModeBits {
        self.mode
    }

    fn compile(
        &mut self,
        cache: &mut BlockCache,
        address: u32,
        mode: ModeBits,
    ) -> Result<(), Self::Error> {
        let Some(id) = cache.allocate(&*self, address, mode) else {
            return Ok(());
        };
        let original_size = 1 + (address >> 2) % 12;
        let base = self.next_code;
        self.next_code += 0x100;
        let exits = vec![
            ExitLink::new(address.wrapping_add(original_size * 4), CodeAddr(base + 0x80)),
            ExitLink::new(address.wrapping_sub(0x40), CodeAddr(base + 0x88)),
        ];
        cache.finalize(
            self,
            id,
            address & 0x100 == 0,
            CompiledCode {
                original_size,
                code_size: 0x80,
                checked_entry: CodeAddr(base),
                normal_entry: CodeAddr(base + 0x10),
                exits,
            },
        )
    }

    fn write_link(&mut self, _exit: &ExitLink, _target: Option<CodeAddr>) {}
}

fuzz_target!(|data: &[u8]| {
    let mut cache = BlockCache::new(CacheConfig {
        fast_map_bits: 6,
        range_shift: 8,
        valid_block_space: 0x1_0000,
        ..CacheConfig::default()
    });
    let mut host = FuzzHost {
        mode: ModeBits::NONE,
        next_code: 0x10_0000,
    };

    for chunk in data.chunks_exact(4) {
        let &[op, address_low, address_high, argument] = chunk else {
            unreachable!()
        };
        let address = u32::from(u16::from_le_bytes([address_low, address_high])) << 2;
        match op % 8 {
            0..=2 => {
                let mode = if op & 0x80 == 0 {
                    ModeBits::NONE
                } else {
                    ModeBits::INSTRUCTION_TRANSLATION
                };
                let _ = cache.dispatch(&mut host, address, mode);
            }
            3 => cache.invalidate_physical(&mut host, address + u32::from(argument % 4), 32, false),
            4 => cache.invalidate_physical(&mut host, address, u32::from(argument) * 4, op & 0x80 != 0),
            5 => {
                host.mode = ModeBits(u32::from(argument));
                cache.invalidate(&mut host, address, u32::from(argument % 64), false);
            }
            6 => {
                if argument == 0 {
                    cache.clear(&mut host);
                } else {
                    cache.compact_range_map();
                }
            }
            _ => {
                if let Some(id) = cache.allocate(&host, address, ModeBits::NONE)
                    && argument % 2 == 0
                {
                    let _ = cache.discard(id);
                }
            }
        }
        if let Err(violation) = cache.check_invariants() {
            panic!("{violation}");
        }
    }
});
