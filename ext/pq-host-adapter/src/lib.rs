//! Host command layer for the pq transposition engine
//!
//! The host calls [`execute`] with its argument vector. The first argument
//! names the command:
//!
//! - `setup_check`: confirms the plugin loads
//! - `describe <path> [detailed]`: column types and suggested store types
//! - `if <condition>`: checks a row filter and prints it in SQL form
//! - `read <path> <varlist> <n_rows> <offset> <batch_size> <threads> [condition]`
//! - `save <path> <varlist> <n_rows> <offset> <compression> <level> <threads>
//!   [condition] [partition_by] [overwrite]`
//!
//! Every command returns a host status: [`STATUS_OK`], [`STATUS_FAILURE`] or
//! [`STATUS_FILE_NOT_FOUND`]. Messages go to the [`HostConsole`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use pq_core::{Engine, StoreLayout, UNAVAILABLE_MESSAGE};

pub mod codec;
pub mod command;
pub mod condition;
pub mod console;
pub mod describe;
pub mod error;
pub mod partition;
pub mod read;
pub mod save;
pub mod varlist;

pub use command::{Command, ReadArgs, SaveArgs};
pub use condition::Condition;
pub use console::{BufferConsole, ConsoleSink, HostConsole};
pub use describe::{describe_file, ColumnInfo, FileSummary};
pub use error::{
    ErrorContext, HostError, Result, STATUS_FAILURE, STATUS_FILE_NOT_FOUND, STATUS_OK,
};
pub use read::{read_file, ReadSummary};
pub use save::{save_file, SaveSummary};

fn run<S: StoreLayout + ?Sized>(
    engine: &Engine,
    store: &S,
    console: &dyn HostConsole,
    args: &[&str],
) -> Result<()> {
    match Command::parse(args)? {
        Command::SetupCheck => {}
        Command::If(condition) => console.display(&condition.to_string()),
        Command::Describe { path, detailed } => {
            let summary = describe_file(&path, detailed)?;
            summary.display(console);
            console.display(&summary.to_json()?);
        }
        Command::Read(args) => {
            let summary = read_file(engine, store, &args)?;
            for name in &summary.dropped {
                console.display(&format!("Warning: column {} was not read", name));
            }
            console.display(&format!(
                "({} observations read, {} variables)",
                summary.rows,
                summary.columns.len()
            ));
        }
        Command::Save(args) => {
            let summary = save_file(engine, store, &args)?;
            let partitions = if summary.partitions.is_empty() {
                String::new()
            } else {
                format!(", {} partitions", summary.partitions.len())
            };
            console.display(&format!(
                "file {} saved ({} observations, {} variables{})",
                args.path,
                summary.rows,
                summary.columns.len(),
                partitions
            ));
        }
    }
    Ok(())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<String>() {
        format!("Panic occurred: {}", message)
    } else if let Some(message) = payload.downcast_ref::<&str>() {
        format!("Panic occurred: {}", message)
    } else {
        "Panic occurred with unknown error".to_string()
    }
}

/// Run one host command and return its status.
///
/// Engine log lines go to `console` for the duration of the call. A missing
/// or closed engine prints the availability message and fails.
pub fn execute<S: StoreLayout + ?Sized>(
    engine: Option<&Engine>,
    store: &S,
    console: Arc<dyn HostConsole>,
    args: &[&str],
) -> i32 {
    let Some(engine) = engine.filter(|e| e.is_open()) else {
        console.error(UNAVAILABLE_MESSAGE);
        return STATUS_FAILURE;
    };
    engine.set_log_sink(Arc::new(ConsoleSink(console.clone())));

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        run(engine, store, console.as_ref(), args)
    }));
    engine.clear_log_sink();
    match outcome {
        Ok(Ok(())) => STATUS_OK,
        Ok(Err(e)) => {
            if e.is_unavailable() {
                console.error(UNAVAILABLE_MESSAGE);
            } else {
                console.error(&e.to_string());
            }
            e.status()
        }
        Err(payload) => {
            console.error(&panic_message(payload.as_ref()));
            STATUS_FAILURE
        }
    }
}
