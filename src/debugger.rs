use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use nix::libc::user_regs_struct;

use crate::breakpoint::Breakpoint;
use crate::command::Command;
use crate::dwarf::{Dwarf, DwarfLocation};
use crate::elf::Elf;
use crate::process::{disassemble, Process};
use crate::registers::{register_by_dwarf_id, REGISTERS};
use crate::utils::tokenize;

/// Debugger state: the target image and its debug info, the (at most one)
/// inferior, and the breakpoint table keyed by address.
pub struct Debugger {
    target: PathBuf,
    elf: Elf,
    dwarf: Dwarf,
    inferior: Option<Process>,
    breakpoints: BTreeMap<u64, Breakpoint>,
}

impl Debugger {
    pub fn new(target: PathBuf) -> Result<Self> {
        let elf = Elf::open(&target)?;
        let dwarf = Dwarf::load(&elf)?;
        Ok(Self {
            target,
            elf,
            dwarf,
            inferior: None,
            breakpoints: BTreeMap::new(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.inferior.is_some()
    }

    /// Dispatch one parsed command. Recoverable misses print a diagnostic
    /// and succeed; an `Err` is fatal and ends the session.
    pub fn handle(&mut self, command: Command) -> Result<()> {
        if !self.is_running() && !matches!(command, Command::Start | Command::Quit) {
            println!("The target is not currently running.");
            return Ok(());
        }
        match command {
            Command::Break { location } => self.break_at(&location),
            Command::Backtrace => self.backtrace(),
            Command::Continue => self.continue_execution(),
            Command::Delete => self.delete_all_breakpoints(),
            Command::Finish => self.finish(),
            Command::Info => self.print_registers(),
            Command::Next => self.next(),
            Command::Print { variable } => self.print_variable(&variable),
            Command::Quit => self.quit(),
            Command::Set { variable, value } => self.set_variable(&variable, value),
            Command::Start => self.start(),
            Command::Step { count } => {
                for _ in 0..count {
                    self.step()?;
                }
                Ok(())
            }
            Command::Unknown => {
                println!("Unknown command.");
                Ok(())
            }
        }
    }

    /// Emulate the gdb/lldb `start` command: launch the target, break on
    /// `main`, and run to the breakpoint.
    fn start(&mut self) -> Result<()> {
        if self.inferior.is_some() {
            return Ok(());
        }
        println!("Starting: {}", self.target.display());
        self.inferior = Some(Process::launch(&self.target)?);
        self.break_on_function("main")?;
        self.continue_execution()
    }

    /// A location is either `function` or `file:line`.
    fn break_at(&mut self, location: &str) -> Result<()> {
        if location.contains(':') {
            let tokens = tokenize(location, ':');
            if tokens.len() != 2 {
                println!("Expected a breakpoint location of the form file:line.");
                return Ok(());
            }
            let Ok(line) = tokens[1].parse::<u64>() else {
                println!("Expected a line number, got '{}'.", tokens[1]);
                return Ok(());
            };
            self.break_on_line_and_file(line, &tokens[0])
        } else {
            self.break_on_function(location)
        }
    }

    fn break_on_function(&mut self, function: &str) -> Result<()> {
        let resolved = self
            .dwarf
            .source_location_from_function(function)?
            .map(|location| (location.address, location.file.to_string(), location.line));
        if let Some((address, file, line)) = resolved {
            if self.install_breakpoint(address)? {
                println!(
                    "Breakpoint #{} at {address:#x} ({file}:{line})",
                    self.breakpoints.len()
                );
            }
            return Ok(());
        }

        // No matching subprogram DIE; fall back to the ELF symbol table.
        if let Some(symbol_address) = self.elf.function_symbol_address(function) {
            let address = self
                .dwarf
                .source_location_from_pc(symbol_address, true)?
                .map(|location| location.address)
                .unwrap_or(symbol_address);
            if self.install_breakpoint(address)? {
                println!(
                    "Breakpoint #{} at {address:#x} ({function})",
                    self.breakpoints.len()
                );
            }
            return Ok(());
        }

        println!("Function {function} not found.");
        Ok(())
    }

    fn break_on_line_and_file(&mut self, line: u64, file: &str) -> Result<()> {
        match self.dwarf.pc_from_line_and_file(line, file)? {
            Some(address) => {
                if self.install_breakpoint(address)? {
                    println!(
                        "Breakpoint #{} at {address:#x} ({file}:{line})",
                        self.breakpoints.len()
                    );
                }
            }
            None => println!("Unable to set a breakpoint on {file}:{line}."),
        }
        Ok(())
    }

    fn install_breakpoint(&mut self, address: u64) -> Result<bool> {
        let Some(process) = self.inferior.as_ref() else {
            return Ok(false);
        };
        if self.breakpoints.contains_key(&address) {
            println!("A breakpoint is already active at {address:#x}.");
            return Ok(false);
        }
        let mut breakpoint = Breakpoint::new(address);
        breakpoint.enable(process)?;
        self.breakpoints.insert(address, breakpoint);
        Ok(true)
    }

    fn delete_all_breakpoints(&mut self) -> Result<()> {
        let Some(process) = self.inferior.as_ref() else {
            return Ok(());
        };
        for breakpoint in self.breakpoints.values_mut() {
            if breakpoint.is_enabled() {
                breakpoint.disable(process)?;
            }
        }
        println!("Deleted {} breakpoints.", self.breakpoints.len());
        self.breakpoints.clear();
        Ok(())
    }

    fn continue_execution(&mut self) -> Result<()> {
        let Some(process) = self.inferior.as_mut() else {
            return Ok(());
        };
        process.cont()?;
        process.wait_expecting_stop()?;

        // A trap leaves the PC one past the patched byte.
        let rip = process.get_regs()?.rip;
        let trap_address = rip.wrapping_sub(1);
        let Some(breakpoint) = self.breakpoints.get_mut(&trap_address) else {
            return Ok(());
        };
        breakpoint.step_over(process)?;

        self.report_breakpoint_hit(trap_address)
    }

    fn report_breakpoint_hit(&self, address: u64) -> Result<()> {
        print!("Hit breakpoint at {address:#x}");
        if let Some(location) = self.dwarf.source_location_from_pc(address, false)? {
            println!(" ({}:{})", location.file, location.line);
        } else {
            println!();
            self.print_disassembly(address, 4);
        }
        Ok(())
    }

    /// Show a few instructions at `address` with any installed traps
    /// patched back to their original bytes.
    fn print_disassembly(&self, address: u64, count: usize) {
        let Some(process) = self.inferior.as_ref() else {
            return;
        };
        let Ok(mut code) = process.read_memory(address, count * 15) else {
            return;
        };
        for breakpoint in self.breakpoints.values() {
            if !breakpoint.is_enabled() {
                continue;
            }
            let site = breakpoint.address();
            if site >= address && site - address < code.len() as u64 {
                code[(site - address) as usize] = breakpoint.saved_byte();
            }
        }
        for instruction in disassemble(&code, address, count) {
            println!("  {:#018x}: {}", instruction.address, instruction.text);
        }
    }

    /// Run to the end of the current stack frame. Assumes a preserved
    /// frame-pointer chain: the return address sits at rbp + 8.
    fn finish(&mut self) -> Result<()> {
        let Some(process) = self.inferior.as_mut() else {
            return Ok(());
        };
        let regs = process.get_regs()?;
        let return_address = process.peek_data(regs.rbp + 8)?;

        print!("Run till end of the current stack frame ({return_address:#x}");
        if let Some(location) = self.dwarf.source_location_from_pc(return_address, false)? {
            print!(", {}:{}", location.file, location.line);
        }
        println!(")");

        let mut breakpoint = Breakpoint::new(return_address);
        breakpoint.enable(process)?;
        process.cont()?;
        process.wait_expecting_stop()?;
        breakpoint.step_over(process)?;
        breakpoint.disable(process)?;
        Ok(())
    }

    /// Source-level step-over: single-step until the source location
    /// changes, but run CALLs to completion via a temporary breakpoint on
    /// the return site.
    fn next(&mut self) -> Result<()> {
        let Some(process) = self.inferior.as_mut() else {
            return Ok(());
        };
        let mut rip = process.get_regs()?.rip;
        let Some((start_file, start_line)) = self
            .dwarf
            .source_location_from_pc(rip, false)?
            .map(|location| (location.file.to_string(), location.line))
        else {
            println!("No line information for the current location.");
            return Ok(());
        };

        loop {
            // E8 rel32 is a five-byte near call.
            let word = process.peek_text(rip)?;
            if word & 0xff == 0xe8 {
                let mut breakpoint = Breakpoint::new(rip + 5);
                breakpoint.enable(process)?;
                process.cont()?;
                process.wait_expecting_stop()?;
                breakpoint.step_over(process)?;
                breakpoint.disable(process)?;
            } else {
                process.single_step()?;
                process.wait_expecting_stop()?;
            }

            rip = process.get_regs()?.rip;
            if let Some(location) = self.dwarf.source_location_from_pc(rip, false)? {
                if location.line != start_line || location.file != start_file {
                    // Rows with line zero cannot be attributed to source.
                    if location.line == 0 {
                        continue;
                    }
                    println!("Stopped at {rip:#x} ({}:{})", location.file, location.line);
                    break;
                }
            }
        }
        Ok(())
    }

    /// Source-level step-in: single-step until the source location changes.
    fn step(&mut self) -> Result<()> {
        let Some(process) = self.inferior.as_mut() else {
            return Ok(());
        };
        let rip = process.get_regs()?.rip;
        let Some((start_file, start_line)) = self
            .dwarf
            .source_location_from_pc(rip, false)?
            .map(|location| (location.file.to_string(), location.line))
        else {
            println!("No line information for the current location.");
            return Ok(());
        };

        loop {
            process.single_step()?;
            process.wait_expecting_stop()?;
            let rip = process.get_regs()?.rip;
            if let Some(location) = self.dwarf.source_location_from_pc(rip, false)? {
                if location.line != start_line || location.file != start_file {
                    println!(
                        "Stopped at address {:#x} ({}:{})",
                        location.address, location.file, location.line
                    );
                    break;
                }
            }
        }
        Ok(())
    }

    /// Walk the frame-pointer chain, printing one line per frame. A frame
    /// with no resolvable name is printed as `unknown` and the walk goes
    /// on; it ends at `main`, a zero frame pointer, or a failed read.
    fn backtrace(&self) -> Result<()> {
        let Some(process) = self.inferior.as_ref() else {
            return Ok(());
        };
        let regs = process.get_regs()?;
        let mut pc = regs.rip;
        let mut frame_pointer = regs.rbp;
        let mut frame_count = 0u32;

        loop {
            let name = self.function_name_at(pc)?;
            match &name {
                Some(name) => print!("#{frame_count} : {name}"),
                None => print!("#{frame_count} : unknown"),
            }
            if let Some(name) = &name {
                if let Some(location) = self.dwarf.source_location_from_function(name)? {
                    print!(" ({}:{})", location.file, location.line);
                }
            }
            println!();
            frame_count += 1;

            if name.as_deref() == Some("main") || frame_pointer == 0 {
                break;
            }
            let Ok(return_address) = process.peek_data(frame_pointer + 8) else {
                break;
            };
            let Ok(caller_frame) = process.peek_data(frame_pointer) else {
                break;
            };
            pc = return_address;
            frame_pointer = caller_frame;
        }
        Ok(())
    }

    fn function_name_at(&self, pc: u64) -> Result<Option<String>> {
        if let Some(name) = self.dwarf.function_from_pc(pc)? {
            return Ok(Some(name.to_string()));
        }
        Ok(self.elf.function_symbol_containing(pc))
    }

    fn print_registers(&self) -> Result<()> {
        let Some(process) = self.inferior.as_ref() else {
            return Ok(());
        };
        // One register-block fetch serves the whole table.
        let regs = process.get_regs()?;
        for info in &REGISTERS {
            let value = info.read(&regs);
            println!("{:<10} {:<22} ({value:#x})", info.name, value);
        }
        Ok(())
    }

    /// Print the low 32 bits of the named variable in the current frame.
    fn print_variable(&self, variable: &str) -> Result<()> {
        let Some(process) = self.inferior.as_ref() else {
            return Ok(());
        };
        let regs = process.get_regs()?;
        let Some(location) = self.dwarf.variable_location(regs.rip, variable)? else {
            println!("No symbol named {variable} in the current context.");
            return Ok(());
        };
        match self.variable_word(&regs, location)? {
            Some(word) => println!("{}", word & 0xffff_ffff),
            None => println!("Unable to retrieve a value for variable {variable}."),
        }
        Ok(())
    }

    /// The word holding the variable's value, or `None` for storage the
    /// debugger cannot reach.
    fn variable_word(&self, regs: &user_regs_struct, location: DwarfLocation) -> Result<Option<u64>> {
        let Some(process) = self.inferior.as_ref() else {
            return Ok(None);
        };
        Ok(match location {
            DwarfLocation::FrameBase { offset } => {
                Some(process.peek_data(regs.rbp.wrapping_add_signed(offset))?)
            }
            DwarfLocation::Address { address } => Some(process.peek_data(address)?),
            DwarfLocation::Register {
                register,
                offset: Some(offset),
            } => match register_by_dwarf_id(i32::from(register)) {
                Some(info) => Some(process.peek_data(info.read(regs).wrapping_add_signed(offset))?),
                None => None,
            },
            DwarfLocation::Register {
                register,
                offset: None,
            } => register_by_dwarf_id(i32::from(register)).map(|info| info.read(regs)),
        })
    }

    /// Overwrite the low 32 bits of the named variable.
    fn set_variable(&mut self, variable: &str, value: i32) -> Result<()> {
        let Some(process) = self.inferior.as_ref() else {
            return Ok(());
        };
        let mut regs = process.get_regs()?;
        let Some(location) = self.dwarf.variable_location(regs.rip, variable)? else {
            println!("No symbol named {variable} in the current context.");
            return Ok(());
        };

        let address = match location {
            DwarfLocation::FrameBase { offset } => Some(regs.rbp.wrapping_add_signed(offset)),
            DwarfLocation::Address { address } => Some(address),
            DwarfLocation::Register {
                register,
                offset: Some(offset),
            } => register_by_dwarf_id(i32::from(register))
                .map(|info| info.read(&regs).wrapping_add_signed(offset)),
            DwarfLocation::Register {
                register,
                offset: None,
            } => {
                let Some(info) = register_by_dwarf_id(i32::from(register)) else {
                    println!("Unable to write variable {variable}.");
                    return Ok(());
                };
                let merged = (info.read(&regs) & 0xffff_ffff_0000_0000) | u64::from(value as u32);
                info.write(&mut regs, merged);
                process.set_regs(&regs)?;
                return Ok(());
            }
        };
        let Some(address) = address else {
            println!("Unable to write variable {variable}.");
            return Ok(());
        };
        let word = process.peek_data(address)?;
        let merged = (word & 0xffff_ffff_0000_0000) | u64::from(value as u32);
        process.poke_data(address, merged)
    }

    fn quit(&mut self) -> Result<()> {
        if let Some(process) = self.inferior.as_ref() {
            println!("Sending SIGTERM to process {}.", process.pid());
            let _ = process.terminate();
        }
        std::process::exit(0);
    }
}
