//! Host functions for WASM payloads.
//!
//! Everything is imported from module `env`. Pointers are offsets into the
//! payload's exported `memory`; an out-of-bounds pointer traps the call.

// WASM host functions intentionally use casts for ABI compatibility
// needless_pass_by_value is required by wasmtime's Caller API
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::needless_pass_by_value
)]

use super::{CallState, FUEL_PER_CPU};
use tracing::{debug, error, info, trace, warn};
use wasmtime::{Caller, Extern, Linker, Memory};

/// Register all host functions with the linker.
///
/// # Errors
///
/// Returns an error if registration fails.
pub(super) fn register_host_functions(linker: &mut Linker<CallState>) -> wasmtime::Result<()> {
    linker.func_wrap("env", "log", log)?;
    linker.func_wrap("env", "game_time", game_time)?;
    linker.func_wrap("env", "cpu_bucket", cpu_bucket)?;
    linker.func_wrap("env", "cpu_used", cpu_used)?;
    linker.func_wrap("env", "arg_read", arg_read)?;
    linker.func_wrap("env", "segment_read", segment_read)?;
    linker.func_wrap("env", "segment_write", segment_write)?;
    Ok(())
}

fn memory(caller: &mut Caller<'_, CallState>) -> wasmtime::Result<Memory> {
    caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or_else(|| wasmtime::Error::msg("payload has no exported memory"))
}

fn read_bytes(caller: &mut Caller<'_, CallState>, ptr: i32, len: i32) -> wasmtime::Result<Vec<u8>> {
    if ptr < 0 || len < 0 {
        return Err(wasmtime::Error::msg(format!("bad pointer {ptr} / length {len}")));
    }
    let memory = memory(caller)?;
    let size = memory.data_size(&*caller);
    let (start, len) = (ptr as usize, len as usize);
    if start.checked_add(len).is_none_or(|end| end > size) {
        return Err(wasmtime::Error::msg(format!(
            "range {start}+{len} is outside linear memory ({size} bytes)"
        )));
    }
    let mut buf = vec![0; len];
    memory.read(&*caller, start, &mut buf)?;
    Ok(buf)
}

/// Copy `data` into `[ptr, ptr + cap)`; returns the full length of `data`.
fn write_bytes(
    caller: &mut Caller<'_, CallState>,
    ptr: i32,
    cap: i32,
    data: &[u8],
) -> wasmtime::Result<i32> {
    if ptr < 0 || cap < 0 {
        return Err(wasmtime::Error::msg(format!("bad pointer {ptr} / capacity {cap}")));
    }
    let memory = memory(caller)?;
    let n = data.len().min(cap as usize);
    memory.write(&mut *caller, ptr as usize, &data[..n])?;
    Ok(data.len().min(i32::MAX as usize) as i32)
}

/// Log a UTF-8 message. Levels: 0 error, 1 warn, 2 info, 3 debug, else trace.
fn log(mut caller: Caller<'_, CallState>, level: i32, ptr: i32, len: i32) -> wasmtime::Result<()> {
    let bytes = read_bytes(&mut caller, ptr, len)?;
    let message = String::from_utf8_lossy(&bytes);
    let tick = caller.data().time;
    match level {
        0 => error!(target: "tickboot::payload", tick, "{message}"),
        1 => warn!(target: "tickboot::payload", tick, "{message}"),
        2 => info!(target: "tickboot::payload", tick, "{message}"),
        3 => debug!(target: "tickboot::payload", tick, "{message}"),
        _ => trace!(target: "tickboot::payload", tick, "{message}"),
    }
    Ok(())
}

/// Current tick number.
fn game_time(caller: Caller<'_, CallState>) -> i32 {
    caller.data().time as i32
}

/// Bucket at the start of the call.
fn cpu_bucket(caller: Caller<'_, CallState>) -> i32 {
    caller.data().bucket.min(i32::MAX as u32) as i32
}

/// CPU used this tick, including what this call has burned so far.
fn cpu_used(caller: Caller<'_, CallState>) -> f64 {
    let state = caller.data();
    let remaining = caller.get_fuel().unwrap_or(0);
    let burned = state.fuel_granted.saturating_sub(remaining);
    state.cpu_before + burned as f64 / FUEL_PER_CPU
}

/// Copy the entry point's argument (e.g. a flag name); returns its length.
fn arg_read(mut caller: Caller<'_, CallState>, ptr: i32, cap: i32) -> wasmtime::Result<i32> {
    let arg = std::mem::take(&mut caller.data_mut().arg);
    let result = write_bytes(&mut caller, ptr, cap, &arg);
    caller.data_mut().arg = arg;
    result
}

/// Copy the persisted segment; returns its length, or -1 if there is none.
fn segment_read(mut caller: Caller<'_, CallState>, ptr: i32, cap: i32) -> wasmtime::Result<i32> {
    let Some(segment) = caller.data_mut().segment.take() else {
        return Ok(-1);
    };
    let result = write_bytes(&mut caller, ptr, cap, &segment);
    caller.data_mut().segment = Some(segment);
    result
}

/// Stage a new persisted segment; it is written only if the call succeeds.
fn segment_write(mut caller: Caller<'_, CallState>, ptr: i32, len: i32) -> wasmtime::Result<i32> {
    let data = read_bytes(&mut caller, ptr, len)?;
    caller.data_mut().staged = Some(data);
    Ok(0)
}
