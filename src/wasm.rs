//! WASM payload runtime.
//!
//! A payload compiled to WASM runs inside wasmtime with fuel metering. Each
//! call is fuelled with the tick's remaining CPU headroom; the fuel it burns
//! is reported back to the host as CPU, and running dry becomes
//! [`PayloadFault::BudgetExhausted`] instead of killing the host tick.
//!
//! Module ABI:
//!
//! - required exports: `memory`, `initialize`, `tick`
//! - optional exports: `reset_state`, `toggle_flag`, `wipe_memory`,
//!   `rescan_network`, `self_destruct`
//! - every entry point is `() -> i32`; non-zero is a fault
//! - imports live in module `env`, see [`host`]

// WASM runtime code intentionally uses casts for memory/ABI operations
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]

mod host;

use crate::error::{LoadError, PayloadFault};
use crate::payload::{Payload, PayloadHandle, PayloadLoader, PayloadResult, TickContext};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use wasmtime::{
    Config, Engine, ExternType, Instance, Linker, Module, Store, StoreLimits, StoreLimitsBuilder,
    Trap, TypedFunc, ValType, WasmBacktrace,
};

/// Fuel granted per unit of host CPU.
pub const FUEL_PER_CPU: f64 = 10_000.0;

/// Linear memory limit (16 MiB).
const MEMORY_LIMIT: usize = 16 * 1024 * 1024;

/// Exports every payload module must provide.
pub const REQUIRED_EXPORTS: [&str; 2] = ["initialize", "tick"];

/// Exports a payload module may provide.
pub const OPTIONAL_EXPORTS: [&str; 5] = [
    "reset_state",
    "toggle_flag",
    "wipe_memory",
    "rescan_network",
    "self_destruct",
];

/// Per-call view of the host, owned by the wasmtime store.
pub struct CallState {
    /// Tick number.
    time: u32,
    /// Bucket at call start.
    bucket: u32,
    /// CPU already used this tick at call start.
    cpu_before: f64,
    /// Fuel the call started with.
    fuel_granted: u64,
    /// Argument bytes for the current entry point.
    arg: Vec<u8>,
    /// Persisted segment snapshot.
    segment: Option<Vec<u8>>,
    /// Segment write staged by the payload; applied only if the call succeeds.
    staged: Option<Vec<u8>>,
    /// Store limits.
    limits: StoreLimits,
}

impl std::fmt::Debug for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallState")
            .field("time", &self.time)
            .field("bucket", &self.bucket)
            .field("staged", &self.staged.as_ref().map(Vec::len))
            .finish_non_exhaustive()
    }
}

impl CallState {
    fn new() -> Self {
        Self {
            time: 0,
            bucket: 0,
            cpu_before: 0.0,
            fuel_granted: 0,
            arg: Vec::new(),
            segment: None,
            staged: None,
            limits: StoreLimitsBuilder::new()
                .memory_size(MEMORY_LIMIT)
                .build(),
        }
    }
}

/// Create an engine with fuel metering enabled.
///
/// # Errors
///
/// Returns an error if engine creation fails.
pub fn create_engine() -> Result<Engine, LoadError> {
    let mut config = Config::new();

    // CPU accounting via fuel
    config.consume_fuel(true);
    config.cranelift_opt_level(wasmtime::OptLevel::Speed);
    config.wasm_backtrace(true);

    Engine::new(&config).map_err(|e| LoadError::Compile(format!("engine setup failed: {e}")))
}

/// Compile a module, accepting the binary or text format.
///
/// # Errors
///
/// Returns [`LoadError::Compile`] if the bytes are not a valid module.
pub fn compile(engine: &Engine, bytes: &[u8]) -> Result<Module, LoadError> {
    Module::new(engine, bytes).map_err(|e| LoadError::Compile(format!("{e:#}")))
}

/// Exports and imports of a compiled module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleReport {
    /// Entry points found, required ones included.
    pub entry_points: Vec<String>,
    /// Optional entry points the module lacks.
    pub missing_optional: Vec<String>,
    /// Imports as `module::name`.
    pub imports: Vec<String>,
}

fn is_entry_point(ty: &ExternType) -> bool {
    let ExternType::Func(func) = ty else {
        return false;
    };
    func.params().len() == 0
        && func.results().len() == 1
        && func.results().all(|r| matches!(r, ValType::I32))
}

/// Check a compiled module against the payload ABI without instantiating it.
///
/// # Errors
///
/// Returns an error if `memory` or a required entry point is missing, or an
/// entry point has the wrong signature.
pub fn inspect(module: &Module) -> Result<ModuleReport, LoadError> {
    let mut report = ModuleReport::default();
    let mut has_memory = false;

    for export in module.exports() {
        let ty = export.ty();
        let name = export.name();
        if name == "memory" {
            has_memory = matches!(ty, ExternType::Memory(_));
            continue;
        }
        let known = REQUIRED_EXPORTS.contains(&name) || OPTIONAL_EXPORTS.contains(&name);
        if !known {
            continue;
        }
        if !is_entry_point(&ty) {
            return Err(LoadError::Link(format!(
                "export `{name}` must have type () -> i32"
            )));
        }
        report.entry_points.push(name.to_string());
    }

    if !has_memory {
        return Err(LoadError::MissingExport("memory"));
    }
    for required in REQUIRED_EXPORTS {
        if !report.entry_points.iter().any(|e| e == required) {
            return Err(LoadError::MissingExport(required));
        }
    }
    report.missing_optional = OPTIONAL_EXPORTS
        .iter()
        .filter(|name| !report.entry_points.iter().any(|e| e == *name))
        .map(|name| (*name).to_string())
        .collect();
    report.imports = module
        .imports()
        .map(|import| format!("{}::{}", import.module(), import.name()))
        .collect();
    Ok(report)
}

/// A payload instantiated from a WASM module.
pub struct WasmPayload {
    store: Store<CallState>,
    initialize: TypedFunc<(), i32>,
    tick: TypedFunc<(), i32>,
    reset_state: Option<TypedFunc<(), i32>>,
    toggle_flag: Option<TypedFunc<(), i32>>,
    wipe_memory: Option<TypedFunc<(), i32>>,
    rescan_network: Option<TypedFunc<(), i32>>,
    self_destruct: Option<TypedFunc<(), i32>>,
}

impl std::fmt::Debug for WasmPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmPayload")
            .field("state", self.store.data())
            .finish_non_exhaustive()
    }
}

impl WasmPayload {
    /// Instantiate a module using a linker that has the host imports.
    ///
    /// # Errors
    ///
    /// Returns an error if instantiation fails or the module does not follow
    /// the payload ABI.
    pub fn instantiate(linker: &Linker<CallState>, module: &Module) -> Result<Self, LoadError> {
        inspect(module)?;

        let mut store = Store::new(linker.engine(), CallState::new());
        store.limiter(|s| &mut s.limits);
        // Start-function execution is bounded too.
        store
            .set_fuel(FUEL_PER_CPU as u64)
            .map_err(|e| LoadError::Link(e.to_string()))?;

        let instance = linker
            .instantiate(&mut store, module)
            .map_err(|e| LoadError::Link(format!("{e:#}")))?;

        let required = |store: &mut Store<CallState>,
                        name: &'static str|
         -> Result<TypedFunc<(), i32>, LoadError> {
            entry(&instance, store, name)?.ok_or(LoadError::MissingExport(name))
        };
        let initialize = required(&mut store, "initialize")?;
        let tick = required(&mut store, "tick")?;

        Ok(Self {
            reset_state: entry(&instance, &mut store, "reset_state")?,
            toggle_flag: entry(&instance, &mut store, "toggle_flag")?,
            wipe_memory: entry(&instance, &mut store, "wipe_memory")?,
            rescan_network: entry(&instance, &mut store, "rescan_network")?,
            self_destruct: entry(&instance, &mut store, "self_destruct")?,
            store,
            initialize,
            tick,
        })
    }

    /// One metered call into the module.
    fn call(
        &mut self,
        func: Option<TypedFunc<(), i32>>,
        name: &'static str,
        ctx: &mut TickContext<'_>,
        arg: &[u8],
    ) -> PayloadResult {
        let Some(func) = func else {
            return Err(PayloadFault::Unsupported(name));
        };

        let budget = ctx.budget();
        let fuel = (budget.headroom() * FUEL_PER_CPU) as u64;
        {
            let state = self.store.data_mut();
            state.time = ctx.time();
            state.bucket = budget.bucket;
            state.cpu_before = budget.used;
            state.fuel_granted = fuel;
            state.arg.clear();
            state.arg.extend_from_slice(arg);
            state.segment = ctx.persisted().map(<[u8]>::to_vec);
            state.staged = None;
        }
        self.store
            .set_fuel(fuel)
            .map_err(|e| PayloadFault::Host(e.to_string()))?;

        let result = func.call(&mut self.store, ());

        let remaining = self.store.get_fuel().unwrap_or(0);
        let burned = fuel.saturating_sub(remaining);
        ctx.consume_cpu(burned as f64 / FUEL_PER_CPU);
        debug!(entry = name, fuel = burned, "wasm call finished");

        let staged = self.store.data_mut().staged.take();
        match result {
            Ok(0) => {
                if let Some(data) = staged {
                    ctx.flush_segment(data);
                }
                Ok(())
            }
            Ok(code) => Err(PayloadFault::ErrorCode(code)),
            Err(err) => Err(classify(&err)),
        }
    }
}

/// Look up an optional entry point.
fn entry(
    instance: &Instance,
    store: &mut Store<CallState>,
    name: &'static str,
) -> Result<Option<TypedFunc<(), i32>>, LoadError> {
    let Some(func) = instance.get_func(&mut *store, name) else {
        return Ok(None);
    };
    func.typed::<(), i32>(&*store)
        .map(Some)
        .map_err(|e| LoadError::Link(format!("export `{name}`: {e}")))
}

/// Turn a wasmtime call error into a payload fault.
fn classify(err: &wasmtime::Error) -> PayloadFault {
    if matches!(err.downcast_ref::<Trap>(), Some(Trap::OutOfFuel)) {
        return PayloadFault::BudgetExhausted;
    }
    let backtrace = err
        .downcast_ref::<WasmBacktrace>()
        .map(ToString::to_string)
        .filter(|trace| !trace.is_empty());
    let message = err
        .downcast_ref::<Trap>()
        .map_or_else(|| err.root_cause().to_string(), ToString::to_string);
    PayloadFault::Trap { message, backtrace }
}

impl Payload for WasmPayload {
    fn initialize(&mut self, ctx: &mut TickContext<'_>) -> PayloadResult {
        let func = Some(self.initialize.clone());
        self.call(func, "initialize", ctx, &[])
    }

    fn tick(&mut self, ctx: &mut TickContext<'_>) -> PayloadResult {
        let func = Some(self.tick.clone());
        self.call(func, "tick", ctx, &[])
    }

    fn reset_state(&mut self, ctx: &mut TickContext<'_>) -> PayloadResult {
        self.call(self.reset_state.clone(), "reset_state", ctx, &[])
    }

    fn toggle_flag(&mut self, ctx: &mut TickContext<'_>, name: &str) -> PayloadResult {
        self.call(self.toggle_flag.clone(), "toggle_flag", ctx, name.as_bytes())
    }

    fn wipe_memory(&mut self, ctx: &mut TickContext<'_>) -> PayloadResult {
        self.call(self.wipe_memory.clone(), "wipe_memory", ctx, &[])
    }

    fn rescan_network(&mut self, ctx: &mut TickContext<'_>) -> PayloadResult {
        self.call(self.rescan_network.clone(), "rescan_network", ctx, &[])
    }

    fn self_destruct(&mut self, ctx: &mut TickContext<'_>) -> PayloadResult {
        self.call(self.self_destruct.clone(), "self_destruct", ctx, &[])
    }
}

/// Where a [`WasmLoader`] gets its bytes.
#[derive(Debug, Clone)]
enum Source {
    File(PathBuf),
    Bytes,
}

/// Staged loader for WASM payloads.
///
/// Each stage (read, compile, instantiate) is cached, so when a later stage
/// fails the next attempt resumes from there. The raw bytes are released as
/// soon as an instance exists.
pub struct WasmLoader {
    name: String,
    source: Source,
    linker: Linker<CallState>,
    bytes: Option<Vec<u8>>,
    module: Option<Module>,
}

impl std::fmt::Debug for WasmLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmLoader")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("bytes_cached", &self.bytes.is_some())
            .field("compiled", &self.module.is_some())
            .finish_non_exhaustive()
    }
}

/// Create a linker with the host imports registered.
///
/// # Errors
///
/// Returns an error if registration fails.
pub fn create_linker(engine: &Engine) -> Result<Linker<CallState>, LoadError> {
    let mut linker = Linker::new(engine);
    host::register_host_functions(&mut linker)
        .map_err(|e| LoadError::Link(format!("host import registration failed: {e}")))?;
    Ok(linker)
}

impl WasmLoader {
    /// Loader reading the module from a file on first load.
    ///
    /// # Errors
    ///
    /// Returns an error if the linker cannot be set up.
    pub fn from_file(engine: &Engine, path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_stem()
            .map_or_else(|| "wasm".to_string(), |s| s.to_string_lossy().into_owned());
        Ok(Self {
            name,
            source: Source::File(path),
            linker: create_linker(engine)?,
            bytes: None,
            module: None,
        })
    }

    /// Loader over in-memory module bytes (binary or text format).
    ///
    /// # Errors
    ///
    /// Returns an error if the linker cannot be set up.
    pub fn from_bytes(
        engine: &Engine,
        name: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<Self, LoadError> {
        Ok(Self {
            name: name.into(),
            source: Source::Bytes,
            linker: create_linker(engine)?,
            bytes: Some(bytes),
            module: None,
        })
    }

    /// Loader over an already compiled module, sharing a linker.
    #[must_use]
    pub fn from_module(linker: Linker<CallState>, name: impl Into<String>, module: Module) -> Self {
        Self {
            name: name.into(),
            source: Source::Bytes,
            linker,
            bytes: None,
            module: Some(module),
        }
    }

    /// Whether the module has been compiled.
    #[must_use]
    pub fn is_compiled(&self) -> bool {
        self.module.is_some()
    }

    /// Whether raw bytes are still held.
    #[must_use]
    pub fn holds_bytes(&self) -> bool {
        self.bytes.is_some()
    }

    fn module(&mut self) -> Result<Module, LoadError> {
        if let Some(module) = &self.module {
            return Ok(module.clone());
        }

        if self.bytes.is_none() {
            let Source::File(path) = &self.source else {
                return Err(LoadError::Rejected(
                    "module bytes were already released".to_string(),
                ));
            };
            let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
                path: path.clone(),
                source,
            })?;
            info!(bytes = bytes.len(), path = %path.display(), "read payload module");
            self.bytes = Some(bytes);
        }

        let bytes = self.bytes.as_deref().unwrap_or_default();
        let module = compile(self.linker.engine(), bytes)?;
        info!(payload = %self.name, "compiled payload module");
        self.module = Some(module.clone());
        Ok(module)
    }
}

impl PayloadLoader for WasmLoader {
    fn load(&mut self) -> Result<PayloadHandle, LoadError> {
        let module = self.module()?;
        let payload = WasmPayload::instantiate(&self.linker, &module)?;
        self.bytes = None;
        Ok(PayloadHandle::new(self.name.clone(), Box::new(payload)))
    }
}
