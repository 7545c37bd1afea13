use anyhow::Result;

use crate::process::Process;

const INT3: u64 = 0xcc;

/// A software breakpoint: the low byte of the word at `address` is swapped
/// for INT3 while enabled, with the original byte kept for restore.
#[derive(Clone, Copy, Debug)]
pub struct Breakpoint {
    address: u64,
    saved_byte: u8,
    enabled: bool,
}

impl Breakpoint {
    pub fn new(address: u64) -> Self {
        Self {
            address,
            saved_byte: 0,
            enabled: false,
        }
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn saved_byte(&self) -> u8 {
        self.saved_byte
    }

    /// Patch the trap in, remembering the displaced byte.
    pub fn enable(&mut self, process: &Process) -> Result<()> {
        let word = process.peek_text(self.address)?;
        self.saved_byte = (word & 0xff) as u8;
        process.poke_text(self.address, (word & !0xff) | INT3)?;
        self.enabled = true;
        Ok(())
    }

    /// Restore the displaced byte.
    pub fn disable(&mut self, process: &Process) -> Result<()> {
        let word = process.peek_text(self.address)?;
        process.poke_text(self.address, (word & !0xff) | u64::from(self.saved_byte))?;
        self.enabled = false;
        Ok(())
    }

    /// Execute the displaced instruction and re-arm the trap. The inferior
    /// must be stopped just past the trap (PC = address + 1): the trap is
    /// removed, PC rewound by one, the original instruction single-stepped,
    /// and the trap reinstalled.
    pub fn step_over(&mut self, process: &mut Process) -> Result<()> {
        self.disable(process)?;

        let mut regs = process.get_regs()?;
        regs.rip -= 1;
        process.set_regs(&regs)?;

        process.single_step()?;
        process.wait_expecting_stop()?;

        self.enable(process)
    }
}
