//! C ABI for the pq transposition engine
//!
//! The host creates an engine context with [`pq_engine_new`] and passes it,
//! together with a [`PqStoreVTable`] describing its row store, to every
//! other entry point. Entry points return a host status: 0 on success, 198 on
//! failure, 601 when an input file does not exist. Failures are reported
//! through the store's `error` callback. A null or closed engine reports the
//! availability message.
//!
//! Export hands the caller two addresses of Arrow C data interface structs;
//! each pair must be passed back to [`pq_release_arrow_pointers`] exactly once.

use std::ffi::{c_char, c_int};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use pq_core::ffi::import_record_batch;
use pq_core::{
    ArrowHandles, Engine, EngineConfig, ExportRequest, ImportRequest, Stage, TransposeError,
    UNAVAILABLE_MESSAGE,
};
use pq_host_adapter::{execute, ConsoleSink, HostConsole, STATUS_FAILURE, STATUS_OK};

mod args;
mod console;
mod store;

pub use args::ArgError;
pub use console::FfiConsole;
pub use store::{
    FfiStore, PqStoreVTable, PQ_TYPE_FLOAT32, PQ_TYPE_FLOAT64, PQ_TYPE_INT16, PQ_TYPE_INT32,
    PQ_TYPE_INT64, PQ_TYPE_INT8, PQ_TYPE_LONG_TEXT, PQ_TYPE_TEXT,
};

#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[cfg(not(any(target_os = "linux", target_os = "windows")))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Run `f`, turning a panic into a failure status
fn guarded<F: FnOnce() -> i32>(console: Option<&dyn HostConsole>, f: F) -> i32 {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| payload.downcast_ref::<&str>().copied())
            .unwrap_or("unknown error");
        let line = format!("Panic occurred: {}", message);
        match console {
            Some(console) => console.error(&line),
            None => eprintln!("{}", line),
        }
        STATUS_FAILURE
    })
}

/// Report `result` on `console` and convert it to a status
fn report(console: &dyn HostConsole, result: pq_core::Result<()>) -> i32 {
    match result {
        Ok(()) => STATUS_OK,
        Err(e) if e.is_unavailable() => {
            console.error(UNAVAILABLE_MESSAGE);
            STATUS_FAILURE
        }
        Err(e) => {
            console.error(&e.to_string());
            STATUS_FAILURE
        }
    }
}

/// Run `f` with the engine's log lines routed to `console`
fn with_console<T>(engine: &Engine, console: &Arc<FfiConsole>, f: impl FnOnce() -> T) -> T {
    engine.set_log_sink(Arc::new(ConsoleSink(console.clone())));
    let outcome = catch_unwind(AssertUnwindSafe(f));
    engine.clear_log_sink();
    match outcome {
        Ok(value) => value,
        Err(payload) => std::panic::resume_unwind(payload),
    }
}

/// Borrow an open engine, or `Unavailable`
///
/// # Safety
///
/// A non-null `engine` must come from [`pq_engine_new`] and not be freed.
unsafe fn open_engine<'a>(engine: *const Engine) -> pq_core::Result<&'a Engine> {
    match engine.as_ref() {
        Some(engine) if engine.is_open() => Ok(engine),
        _ => Err(TransposeError::Unavailable),
    }
}

/// Create an engine context; `threads` 0 keeps the configured default
#[no_mangle]
pub extern "C" fn pq_engine_new(threads: usize) -> *mut Engine {
    let built = catch_unwind(|| {
        let mut config = EngineConfig::from_env();
        if threads > 0 {
            config.default_threads = threads;
        }
        Box::new(Engine::new(config))
    });
    match built {
        Ok(engine) => Box::into_raw(engine),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Destroy an engine context
///
/// # Safety
///
/// `engine` must be null or come from [`pq_engine_new`], and must not be used
/// afterwards.
#[no_mangle]
pub unsafe extern "C" fn pq_engine_free(engine: *mut Engine) {
    if !engine.is_null() {
        drop(Box::from_raw(engine));
    }
}

/// Tear down the worker pool; the next call rebuilds it
///
/// # Safety
///
/// `engine` must be null or a live context from [`pq_engine_new`].
#[no_mangle]
pub unsafe extern "C" fn pq_engine_shutdown(engine: *const Engine) -> c_int {
    guarded(None, || match engine.as_ref() {
        Some(engine) => {
            engine.shutdown();
            STATUS_OK
        }
        None => STATUS_FAILURE,
    })
}

/// Shut down and refuse every further call except release
///
/// # Safety
///
/// `engine` must be null or a live context from [`pq_engine_new`].
#[no_mangle]
pub unsafe extern "C" fn pq_engine_close(engine: *const Engine) -> c_int {
    guarded(None, || match engine.as_ref() {
        Some(engine) => {
            engine.close();
            STATUS_OK
        }
        None => STATUS_FAILURE,
    })
}

/// Run a host command (`setup_check`, `describe`, `read`, `save`)
///
/// # Safety
///
/// `store` must point to a valid vtable, `argv` to `argc` NUL-terminated
/// strings, and `engine` must be null or a live context.
#[no_mangle]
pub unsafe extern "C" fn pq_execute(
    engine: *const Engine,
    store: *const PqStoreVTable,
    argc: c_int,
    argv: *const *const c_char,
) -> c_int {
    let Some(vtable) = store.as_ref() else {
        return STATUS_FAILURE;
    };
    let console: Arc<dyn HostConsole> = Arc::new(FfiConsole::new(vtable));
    guarded(Some(console.as_ref()), || {
        let store = FfiStore::new(*vtable);
        let count = usize::try_from(argc).unwrap_or(0);
        let args = match args::strings(argv, count, "argv") {
            Ok(args) => args,
            Err(e) => {
                console.error(&format!("Error: {}", e));
                return STATUS_FAILURE;
            }
        };
        execute(engine.as_ref(), &store, console.clone(), &args)
    })
}

/// Copy a foreign Arrow batch into the store from row `row_offset` (1-based)
///
/// `column_names[i]` goes to store variable `store_indices[i]`; the two
/// lengths must match. A non-null descriptor pair is consumed before any other
/// argument is looked at, so on return it is released whatever the status.
///
/// # Safety
///
/// `schema`/`array` must address unreleased Arrow C data interface structs;
/// the string arrays must hold the given number of NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn pq_assign_to_store(
    engine: *const Engine,
    store: *const PqStoreVTable,
    schema: usize,
    array: usize,
    row_offset: usize,
    threads: usize,
    special_columns: *const *const c_char,
    n_special: usize,
    column_names: *const *const c_char,
    n_names: usize,
    store_indices: *const usize,
    n_indices: usize,
) -> c_int {
    let imported = catch_unwind(AssertUnwindSafe(|| {
        import_record_batch(ArrowHandles::new(schema, array))
    }));
    let Some(vtable) = store.as_ref() else {
        return STATUS_FAILURE;
    };
    let console = Arc::new(FfiConsole::new(vtable));
    guarded(Some(console.as_ref() as &dyn HostConsole), || {
        let run = || -> pq_core::Result<()> {
            let batch = match imported {
                Ok(batch) => batch.map_err(|e| e.in_stage(Stage::Handoff))?,
                Err(payload) => std::panic::resume_unwind(payload),
            };
            let engine = open_engine(engine)?;
            let store = FfiStore::new(*vtable);
            let special = args::strings(special_columns, n_special, "special_columns")?;
            let names = args::strings(column_names, n_names, "column_names")?;
            let indices = args::slice(store_indices, n_indices, "store_indices")?;
            let request = ImportRequest::from_pairs(
                row_offset,
                threads,
                special.iter().map(|s| s.to_string()).collect(),
                names.iter().map(|s| s.to_string()).collect(),
                indices.to_vec(),
            )?;
            with_console(engine, &console, || {
                engine.assign_batch(&store, &batch, &request)
            })?;
            Ok(())
        };
        report(console.as_ref(), run())
    })
}

/// Export `row_count` rows from 0-based `start_row` into a new Arrow batch
///
/// On success the descriptor addresses are written to `out_schema` and
/// `out_array`.
///
/// # Safety
///
/// The string arrays must hold the given number of NUL-terminated strings and
/// the out pointers must be writable.
#[no_mangle]
pub unsafe extern "C" fn pq_export_from_store(
    engine: *const Engine,
    store: *const PqStoreVTable,
    column_names: *const *const c_char,
    n_names: usize,
    start_row: usize,
    row_count: usize,
    threads: usize,
    special_columns: *const *const c_char,
    n_special: usize,
    out_schema: *mut usize,
    out_array: *mut usize,
) -> c_int {
    let Some(vtable) = store.as_ref() else {
        return STATUS_FAILURE;
    };
    let console = Arc::new(FfiConsole::new(vtable));
    guarded(Some(console.as_ref() as &dyn HostConsole), || {
        let run = || -> pq_core::Result<()> {
            let engine = open_engine(engine)?;
            if out_schema.is_null() || out_array.is_null() {
                return Err(ArgError::Null("out_schema/out_array").into());
            }
            let store = FfiStore::new(*vtable);
            let names = args::strings(column_names, n_names, "column_names")?;
            let special = args::strings(special_columns, n_special, "special_columns")?;
            let request = ExportRequest::new(names, start_row, row_count)
                .with_threads(threads)
                .with_special(special);
            let handles =
                with_console(engine, &console, || engine.export_handles(&store, &request))?;
            *out_schema = handles.schema;
            *out_array = handles.array;
            Ok(())
        };
        report(console.as_ref(), run())
    })
}

/// Free a descriptor pair returned by [`pq_export_from_store`]
///
/// Unknown or already released pairs are refused without touching memory.
///
/// # Safety
///
/// `engine` must be null or a live context from [`pq_engine_new`].
#[no_mangle]
pub unsafe extern "C" fn pq_release_arrow_pointers(
    engine: *const Engine,
    schema: usize,
    array: usize,
) -> c_int {
    guarded(None, || {
        let Some(engine) = engine.as_ref() else {
            eprintln!("{}", UNAVAILABLE_MESSAGE);
            return STATUS_FAILURE;
        };
        match engine.release_arrow_pointers(ArrowHandles::new(schema, array)) {
            Ok(()) => STATUS_OK,
            Err(e) => {
                engine.logger().error(|| e.to_string());
                STATUS_FAILURE
            }
        }
    })
}

#[cfg(test)]
mod test_host;
