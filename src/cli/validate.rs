//! WASM validation command implementation.

use super::CliError;
use std::fs;
use std::path::Path;
use tickboot::sim::SimHost;
use tickboot::wasm::{self, WasmLoader};
use tickboot::{LoadStatus, Scheduler};

/// Execute the validate command.
///
/// # Errors
///
/// Returns an error if the WASM file cannot be read or is invalid.
pub(crate) fn execute(payload: &Path) -> Result<(), CliError> {
    let wasm_bytes = fs::read(payload)
        .map_err(|e| CliError::new(format!("Failed to read {}: {e}", payload.display())))?;

    println!("Validating: {}", payload.display());
    println!();

    // Check WASM magic number
    let magic_ok = wasm_bytes.len() >= 4 && &wasm_bytes[0..4] == b"\0asm";
    print_check("WASM magic number", magic_ok);
    if !magic_ok {
        return Err(CliError::new("Not a valid WASM file (missing magic number)"));
    }

    // Check version
    let version_ok = wasm_bytes.len() >= 8 && wasm_bytes[4..8] == [1, 0, 0, 0];
    print_check("WASM version 1", version_ok);
    if !version_ok {
        return Err(CliError::new("Unsupported WASM version (expected version 1)"));
    }

    let engine = wasm::create_engine()?;
    let module = wasm::compile(&engine, &wasm_bytes)?;
    print_check("Compiles", true);

    let report = match wasm::inspect(&module) {
        Ok(report) => report,
        Err(e) => {
            print_check("Payload ABI", false);
            return Err(e.into());
        }
    };
    print_check("Payload ABI", true);

    // Instantiate and initialize once against a fresh simulated host.
    println!();
    print!("Initialize test... ");
    let linker = wasm::create_linker(&engine)?;
    let loader = WasmLoader::from_module(linker, payload.display().to_string(), module);
    let mut scheduler = Scheduler::new(loader);
    let mut host = SimHost::default();
    match scheduler.ensure_loaded(&mut host) {
        LoadStatus::Loaded | LoadStatus::AlreadyLoaded => println!("OK"),
        status => {
            println!("FAILED");
            let detail = host.notifications().last().cloned().unwrap_or_default();
            return Err(CliError::new(format!("Initialize failed ({status:?}): {detail}")));
        }
    }

    println!();
    println!("Summary:");
    println!("  File size:     {} bytes", wasm_bytes.len());
    println!("  Entry points:  {}", report.entry_points.join(", "));
    if !report.missing_optional.is_empty() {
        println!("  Not provided:  {}", report.missing_optional.join(", "));
    }
    if !report.imports.is_empty() {
        println!("  Imports:       {}", report.imports.join(", "));
    }

    println!();
    println!("Validation successful!");

    Ok(())
}

fn print_check(name: &str, ok: bool) {
    let status = if ok { "OK" } else { "FAILED" };
    let symbol = if ok { "✓" } else { "✗" };
    println!("  {symbol} {name}: {status}");
}
