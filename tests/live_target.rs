use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};
use nix::sys::signal::Signal;
use sldbg::breakpoint::Breakpoint;
use sldbg::dwarf::Dwarf;
use sldbg::elf::{Elf, ET_EXEC};
use sldbg::process::{Process, WaitOutcome};

/// Build the fixture with fixed load addresses and frame pointers so the
/// debugger's no-PIE assumptions hold.
fn compile_fixture() -> Result<PathBuf> {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let source = manifest_dir.join("test_programs").join("countdown.rs");
    let out_dir = manifest_dir.join("target").join("test_bins");
    std::fs::create_dir_all(&out_dir)?;
    let output = out_dir.join("countdown");

    let status = Command::new("rustc")
        .args([
            OsStr::new("-g"),
            OsStr::new("-C"),
            OsStr::new("opt-level=0"),
            OsStr::new("-C"),
            OsStr::new("relocation-model=static"),
            OsStr::new("-C"),
            OsStr::new("force-frame-pointers=yes"),
            source.as_os_str(),
            OsStr::new("-o"),
            output.as_os_str(),
        ])
        .status()
        .context("failed to spawn rustc")?;
    if !status.success() {
        anyhow::bail!("rustc returned status {status}");
    }
    Ok(output)
}

#[test]
fn break_on_function_and_run_to_exit() -> Result<()> {
    let binary = match compile_fixture() {
        Ok(binary) => binary,
        Err(err) => {
            eprintln!("skipping live test: {err:#}");
            return Ok(());
        }
    };

    let elf = Elf::open(&binary)?;
    if elf.header.e_type != ET_EXEC {
        eprintln!("skipping live test: fixture is not a fixed-address executable");
        return Ok(());
    }
    let dwarf = match Dwarf::load(&elf) {
        Ok(dwarf) => dwarf,
        Err(err) if err.to_string().contains("DWARF") => {
            eprintln!("skipping live test: {err:#}");
            return Ok(());
        }
        Err(err) => return Err(err),
    };

    // Static queries against the fixture's debug info. `accumulate` is the
    // only function with that name in the image.
    let entry = dwarf
        .source_location_from_function("accumulate")?
        .expect("accumulate should have a source location");
    assert!(entry.address > 0x1000, "implausible entry {:#x}", entry.address);
    assert!(entry.line > 0);
    assert_eq!(dwarf.function_from_pc(entry.address)?, Some("accumulate"));

    // Variable storage should decode for a frame-local once the function
    // is in scope; any of the supported encodings is acceptable.
    let _ = dwarf.variable_location(entry.address, "total");

    // Live half: needs permission to trace.
    let mut process = match Process::launch(&binary) {
        Ok(process) => process,
        Err(err) => {
            eprintln!("skipping live half: {err:#}");
            return Ok(());
        }
    };

    let mut breakpoint = Breakpoint::new(entry.address);
    breakpoint.enable(&process)?;

    process.cont()?;
    match process.wait()? {
        WaitOutcome::Stopped(signal) => assert_eq!(signal, Signal::SIGTRAP),
        outcome => panic!("expected a trap stop, got {outcome:?}"),
    }

    let regs = process.get_regs()?;
    assert_eq!(regs.rip - 1, entry.address, "stopped somewhere unexpected");

    // Step over the trap and let the fixture finish.
    breakpoint.step_over(&mut process)?;
    breakpoint.disable(&process)?;
    process.cont()?;
    match process.wait()? {
        WaitOutcome::Exited(code) => assert_eq!(code, 0),
        outcome => panic!("expected a clean exit, got {outcome:?}"),
    }
    Ok(())
}
