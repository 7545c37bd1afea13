use std::ffi::CString;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use iced_x86::{Decoder, DecoderOptions, Formatter, NasmFormatter};
use nix::fcntl::OFlag;
use nix::libc::{self, user_regs_struct, ADDR_NO_RANDOMIZE};
use nix::sys::ptrace;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execv, fork, pipe2, ForkResult, Pid};

/// What `waitpid` reported about the inferior.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    Stopped(Signal),
    Exited(i32),
    Signalled(Signal, /* core dumped */ bool),
}

/// Handle on the traced inferior. There is exactly one; dropping the handle
/// kills a still-live inferior so a failing debugger never leaks a stopped
/// tracee.
pub struct Process {
    pid: Pid,
    alive: bool,
}

impl Drop for Process {
    fn drop(&mut self) {
        if self.alive {
            let _ = kill(self.pid, Signal::SIGKILL);
            let _ = waitpid(self.pid, None);
        }
    }
}

impl Process {
    /// Fork and exec `path` under tracing. The child disables address-space
    /// randomization and reports exec failure back through a close-on-exec
    /// pipe; on success the returned process is stopped at its entry.
    pub fn launch(path: &Path) -> Result<Self> {
        let (read_fd, write_fd) = pipe2(OFlag::O_CLOEXEC)?;

        let fork_result = unsafe { fork() }?;
        match fork_result {
            ForkResult::Parent { child } => {
                drop(write_fd);
                let mut report = String::new();
                File::from(read_fd).read_to_string(&mut report)?;
                if !report.is_empty() {
                    let _ = waitpid(child, None);
                    bail!("could not launch {}: {report}", path.display());
                }

                let mut process = Process {
                    pid: child,
                    alive: true,
                };
                match process.wait()? {
                    WaitOutcome::Stopped(_) => Ok(process),
                    outcome => bail!("inferior did not stop after exec: {outcome:?}"),
                }
            }
            ForkResult::Child => {
                drop(read_fd);

                // Keep the image at its link-time addresses.
                unsafe {
                    let current = libc::personality(0xffffffff);
                    if current != -1 {
                        libc::personality(current as libc::c_ulong | ADDR_NO_RANDOMIZE as libc::c_ulong);
                    }
                }

                if let Err(err) = ptrace::traceme() {
                    report_child_failure(write_fd, &format!("traceme failed: {err}"));
                }
                let c_path = match CString::new(path.as_os_str().as_encoded_bytes()) {
                    Ok(c_path) => c_path,
                    Err(_) => {
                        report_child_failure(write_fd, "path contains a NUL byte");
                    }
                };
                let _ = execv(&c_path, &[c_path.clone()]);
                report_child_failure(write_fd, "exec failed");
            }
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn cont(&self) -> Result<()> {
        ptrace::cont(self.pid, None).context("could not continue the inferior")
    }

    pub fn single_step(&self) -> Result<()> {
        ptrace::step(self.pid, None).context("could not single-step the inferior")
    }

    pub fn get_regs(&self) -> Result<user_regs_struct> {
        ptrace::getregs(self.pid).context("could not read registers")
    }

    pub fn set_regs(&self, regs: &user_regs_struct) -> Result<()> {
        ptrace::setregs(self.pid, *regs).context("could not write registers")
    }

    pub fn peek_text(&self, address: u64) -> Result<u64> {
        let word = ptrace::read(self.pid, address as ptrace::AddressType)
            .with_context(|| format!("could not read inferior memory at {address:#x}"))?;
        Ok(word as u64)
    }

    pub fn poke_text(&self, address: u64, word: u64) -> Result<()> {
        ptrace::write(self.pid, address as ptrace::AddressType, word as i64)
            .with_context(|| format!("could not write inferior memory at {address:#x}"))
    }

    // PTRACE_PEEKDATA and PTRACE_PEEKTEXT coincide on Linux.
    pub fn peek_data(&self, address: u64) -> Result<u64> {
        self.peek_text(address)
    }

    pub fn poke_data(&self, address: u64, word: u64) -> Result<()> {
        self.poke_text(address, word)
    }

    /// Word-at-a-time read of `length` bytes starting at `address`.
    pub fn read_memory(&self, address: u64, length: usize) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(length + 7);
        let mut cursor = address;
        while bytes.len() < length {
            let word = self.peek_data(cursor)?;
            bytes.extend_from_slice(&word.to_le_bytes());
            cursor += 8;
        }
        bytes.truncate(length);
        Ok(bytes)
    }

    /// Block until the inferior changes state. Exit and fatal-signal states
    /// mark the handle dead.
    pub fn wait(&mut self) -> Result<WaitOutcome> {
        match waitpid(self.pid, None).context("waitpid failed")? {
            WaitStatus::Exited(_, code) => {
                self.alive = false;
                Ok(WaitOutcome::Exited(code))
            }
            WaitStatus::Signaled(_, signal, core_dumped) => {
                self.alive = false;
                Ok(WaitOutcome::Signalled(signal, core_dumped))
            }
            WaitStatus::Stopped(_, signal) => Ok(WaitOutcome::Stopped(signal)),
            status => bail!("unexpected wait status {status:?}"),
        }
    }

    /// Wait for a stop. A dead inferior is unrecoverable for the command
    /// loop: the wait status is reported and the debugger exits.
    pub fn wait_expecting_stop(&mut self) -> Result<Signal> {
        match self.wait()? {
            WaitOutcome::Stopped(signal) => Ok(signal),
            outcome => {
                report_wait_outcome(&outcome);
                std::process::exit(1);
            }
        }
    }

    /// SIGTERM the inferior (used by the quit command).
    pub fn terminate(&self) -> Result<()> {
        kill(self.pid, Signal::SIGTERM).context("could not signal the inferior")
    }
}

pub fn report_wait_outcome(outcome: &WaitOutcome) {
    match outcome {
        WaitOutcome::Exited(code) => {
            println!("The inferior exited normally with status {code}.");
        }
        WaitOutcome::Signalled(signal, core_dumped) => {
            print!("The inferior was terminated by signal {signal}.");
            if *core_dumped {
                print!(" Core dumped.");
            }
            println!();
        }
        WaitOutcome::Stopped(signal) => {
            println!("The inferior stopped with signal {signal}.");
        }
    }
}

fn report_child_failure(write_fd: std::os::fd::OwnedFd, message: &str) -> ! {
    let mut pipe = File::from(write_fd);
    let _ = pipe.write_all(message.as_bytes());
    std::process::exit(1);
}

pub struct Instruction {
    pub address: u64,
    pub text: String,
}

/// Render up to `count` instructions from `code`, which was read starting
/// at `ip`.
pub fn disassemble(code: &[u8], ip: u64, count: usize) -> Vec<Instruction> {
    let mut instructions = Vec::with_capacity(count);
    let mut decoder = Decoder::with_ip(64, code, ip, DecoderOptions::NONE);
    let mut formatter = NasmFormatter::new();

    for _ in 0..count {
        if !decoder.can_decode() {
            break;
        }
        let instruction = decoder.decode();
        let mut text = String::new();
        formatter.format(&instruction, &mut text);
        instructions.push(Instruction {
            address: instruction.ip(),
            text,
        });
    }
    instructions
}

#[cfg(test)]
mod tests {
    use super::disassemble;

    #[test]
    fn disassembles_a_known_sequence() {
        // push rbp; mov rbp, rsp; ret
        let code = [0x55, 0x48, 0x89, 0xe5, 0xc3];
        let instructions = disassemble(&code, 0x400500, 8);
        assert_eq!(instructions.len(), 3);
        assert_eq!(instructions[0].address, 0x400500);
        assert_eq!(instructions[0].text, "push rbp");
        assert_eq!(instructions[1].address, 0x400501);
        assert_eq!(instructions[2].text, "ret");
    }
}
