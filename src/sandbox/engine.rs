//! Wasmtime + WASI preview 1 implementation of [`SandboxEngine`].

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::debug;
use wasmtime::{Config, Engine, Linker, Module, Store, Trap};
use wasmtime_wasi::p2::pipe::MemoryOutputPipe;
use wasmtime_wasi::preview1::WasiP1Ctx;
use wasmtime_wasi::{DirPerms, FilePerms, I32Exit, WasiCtxBuilder};

use super::{CapturedOutput, MountAccess, MountSet, SandboxEngine};
use crate::error::SandboxError;

/// Capacity of each capture pipe. Writes past it fail inside the guest.
const MAX_CAPTURE_BYTES: usize = 16 * 1024 * 1024;

/// Runs `wasm32-wasip1` command modules.
pub struct WasmtimeEngine {
    engine: Engine,
}

impl WasmtimeEngine {
    pub fn new() -> Result<Self, SandboxError> {
        let mut config = Config::new();
        // Needed for the execution deadline
        config.epoch_interruption(true);

        let engine = Engine::new(&config)
            .map_err(|e| SandboxError::Engine(format!("failed to create wasmtime engine: {e}")))?;

        Ok(Self { engine })
    }

    fn run(
        &self,
        module: &Module,
        mounts: &MountSet,
        args: &[String],
        deadline: Option<Duration>,
        stdout: &MemoryOutputPipe,
        stderr: &MemoryOutputPipe,
    ) -> Result<(), SandboxError> {
        let mut builder = WasiCtxBuilder::new();
        builder
            .args(args)
            .stdout(stdout.clone())
            .stderr(stderr.clone())
            .allow_tcp(false)
            .allow_udp(false)
            .allow_ip_name_lookup(false);

        for mount in mounts.as_slice() {
            let (dir_perms, file_perms) = match mount.access() {
                MountAccess::ReadOnly => (DirPerms::READ, FilePerms::READ),
                MountAccess::ReadWrite => (DirPerms::all(), FilePerms::all()),
            };
            builder
                .preopened_dir(mount.host_dir(), mount.guest_path(), dir_perms, file_perms)
                .map_err(|e| {
                    SandboxError::Engine(format!(
                        "mount {} at {}: {e}",
                        mount.host_dir().display(),
                        mount.guest_path()
                    ))
                })?;
        }

        let mut store = Store::new(&self.engine, builder.build_p1());

        let _watchdog = match deadline {
            Some(limit) => {
                store.set_epoch_deadline(1);
                store.epoch_deadline_trap();
                Some(Watchdog::start(self.engine.clone(), limit)?)
            }
            None => {
                store.set_epoch_deadline(u64::MAX);
                None
            }
        };

        let mut linker = Linker::new(&self.engine);
        wasmtime_wasi::preview1::add_to_linker_sync(&mut linker, |ctx: &mut WasiP1Ctx| ctx)
            .map_err(|e| SandboxError::Engine(format!("failed to link WASI: {e}")))?;

        let instance = match linker.instantiate(&mut store, module) {
            Ok(instance) => instance,
            Err(e) => return exit_status(e, deadline),
        };

        let start = instance
            .get_typed_func::<(), ()>(&mut store, "_start")
            .map_err(|e| SandboxError::Instantiate(format!("no _start entry point: {e}")))?;

        match start.call(&mut store, ()) {
            Ok(()) => Ok(()),
            Err(e) => exit_status(e, deadline),
        }
    }
}

impl SandboxEngine for WasmtimeEngine {
    type Module = Module;

    fn compile(&self, wasm: &[u8]) -> Result<Module, SandboxError> {
        Module::new(&self.engine, wasm).map_err(|e| SandboxError::Compile(format!("{e:#}")))
    }

    fn instantiate(
        &self,
        module: &Module,
        mounts: &MountSet,
        args: &[String],
        deadline: Option<Duration>,
        output: &mut CapturedOutput,
    ) -> Result<(), SandboxError> {
        let stdout = MemoryOutputPipe::new(MAX_CAPTURE_BYTES);
        let stderr = MemoryOutputPipe::new(MAX_CAPTURE_BYTES);

        let result = self.run(module, mounts, args, deadline, &stdout, &stderr);

        output.stdout = stdout.contents().to_vec();
        output.stderr = stderr.contents().to_vec();
        debug!(
            "Guest finished: stdout={}B stderr={}B ok={}",
            output.stdout.len(),
            output.stderr.len(),
            result.is_ok()
        );
        result
    }
}

/// Maps a guest error to its outcome. `proc_exit(0)` counts as success.
fn exit_status(err: wasmtime::Error, deadline: Option<Duration>) -> Result<(), SandboxError> {
    if let Some(exit) = err.downcast_ref::<I32Exit>() {
        return match exit.0 {
            0 => Ok(()),
            code => Err(SandboxError::Exit(code)),
        };
    }
    if let (Some(Trap::Interrupt), Some(limit)) = (err.downcast_ref::<Trap>(), deadline) {
        return Err(SandboxError::Timeout(limit));
    }
    Err(SandboxError::Instantiate(format!("{err:#}")))
}

/// Bumps the engine epoch once `limit` elapses, interrupting the guest.
/// Dropping it before then cancels the interrupt.
struct Watchdog {
    cancel: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    fn start(engine: Engine, limit: Duration) -> Result<Self, SandboxError> {
        let (cancel, cancelled) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name("sandhost-watchdog".to_string())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = cancelled.recv_timeout(limit) {
                    engine.increment_epoch();
                }
            })
            .map_err(|e| SandboxError::Engine(format!("failed to spawn watchdog: {e}")))?;

        Ok(Self {
            cancel: Some(cancel),
            handle: Some(handle),
        })
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        // Disconnecting the channel wakes the thread
        drop(self.cancel.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
