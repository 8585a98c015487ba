//! Fan-out of disjoint row batches onto the worker pool

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::error::Stage;
use crate::pool::PoolHandle;
use crate::wave::RowRange;
use crate::{Result, TransposeError};

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run one task per batch and wait for all of them.
///
/// Every task runs to completion even when a sibling fails; the first failure
/// in batch order is returned, tagged with its batch number and rows.
pub(crate) fn run_batches<T, F>(
    pool: &PoolHandle,
    stage: Stage,
    tasks: Vec<(RowRange, T)>,
    work: F,
) -> Result<()>
where
    T: Send,
    F: Fn(RowRange, T) -> Result<()> + Sync,
{
    if tasks.is_empty() {
        return Ok(());
    }

    let ranges: Vec<RowRange> = tasks.iter().map(|(range, _)| *range).collect();
    let mut outcomes: Vec<Option<Result<()>>> = ranges.iter().map(|_| None).collect();
    let work = &work;

    pool.scope(|scope| {
        for ((range, payload), outcome) in tasks.into_iter().zip(outcomes.iter_mut()) {
            let guard = pool.track();
            scope.spawn(move |_| {
                let _guard = guard;
                let result = panic::catch_unwind(AssertUnwindSafe(|| work(range, payload)));
                *outcome = Some(match result {
                    Ok(result) => result,
                    Err(payload) => Err(TransposeError::TaskPanicked(panic_message(&*payload))),
                });
            });
        }
    });

    for (batch, (range, outcome)) in ranges.into_iter().zip(outcomes).enumerate() {
        let result = outcome.unwrap_or_else(|| {
            Err(TransposeError::internal("worker task finished without a result"))
        });
        if let Err(source) = result {
            return Err(TransposeError::Batch {
                stage,
                batch,
                start: range.start,
                end: range.end,
                source: Box::new(source),
            });
        }
    }
    Ok(())
}
