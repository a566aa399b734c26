//! Per-transaction execution tracing.
//!
//! When a block runs with [`VmConfig::debug`](crate::VmConfig::debug), the executor asks a
//! [`TracerFactory`] for one [`Tracer`] per transaction and flushes it once the transaction is
//! done.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
};

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::Serialize;

use crate::{CallMessage, CallOutcome};

/// Error raised while producing or flushing a trace.
#[derive(Debug, thiserror::Error)]
pub enum TracerError {
    /// Writing the trace failed.
    #[error("trace io: {0}")]
    Io(#[from] std::io::Error),
    /// Encoding a trace event failed.
    #[error("trace encoding: {0}")]
    Json(#[from] serde_json::Error),
}

/// Receives execution events of one transaction.
pub trait Tracer {
    /// The transaction starts executing.
    fn on_tx_start(&mut self, _tx_hash: B256, _msg: &CallMessage) {}

    /// A call frame is entered.
    fn on_call_enter(&mut self, _depth: usize, _msg: &CallMessage) {}

    /// A call frame is left.
    fn on_call_exit(&mut self, _depth: usize, _outcome: &CallOutcome) {}

    /// The transaction finished, with `error` set if it was not applied.
    fn on_tx_end(&mut self, _gas_used: u64, _error: Option<&str>) {}

    /// Writes out everything recorded.
    fn flush(&mut self) -> Result<(), TracerError> {
        Ok(())
    }
}

/// Hands out a [`Tracer`] per transaction.
pub trait TracerFactory {
    /// Tracer for transaction `index` with hash `tx_hash`.
    fn get_tracer(&self, index: usize, tx_hash: B256) -> Result<Box<dyn Tracer>, TracerError>;
}

impl<F> TracerFactory for F
where
    F: Fn(usize, B256) -> Result<Box<dyn Tracer>, TracerError>,
{
    fn get_tracer(&self, index: usize, tx_hash: B256) -> Result<Box<dyn Tracer>, TracerError> {
        self(index, tx_hash)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
enum TraceEvent {
    #[serde(rename_all = "camelCase")]
    TxStart { tx_hash: B256, from: Address, to: Option<Address>, value: U256, gas: u64 },
    #[serde(rename_all = "camelCase")]
    Enter {
        depth: usize,
        from: Address,
        to: Option<Address>,
        value: U256,
        gas: u64,
        input: Bytes,
    },
    #[serde(rename_all = "camelCase")]
    Exit { depth: usize, gas_left: u64, output: Bytes, status: String },
    #[serde(rename_all = "camelCase")]
    TxEnd {
        gas_used: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Buffers events and writes them as JSON lines on [`flush`](Tracer::flush).
pub struct JsonLinesTracer<W> {
    out: W,
    events: Vec<TraceEvent>,
}

impl<W> core::fmt::Debug for JsonLinesTracer<W> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JsonLinesTracer")
            .field("events", &self.events.len())
            .finish_non_exhaustive()
    }
}

impl<W: Write> JsonLinesTracer<W> {
    /// Creates a tracer writing to `out`.
    pub const fn new(out: W) -> Self {
        Self { out, events: Vec::new() }
    }

    /// Number of buffered events.
    pub fn pending(&self) -> usize {
        self.events.len()
    }

    /// Releases the writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Tracer for JsonLinesTracer<W> {
    fn on_tx_start(&mut self, tx_hash: B256, msg: &CallMessage) {
        self.events.push(TraceEvent::TxStart {
            tx_hash,
            from: msg.caller,
            to: msg.to,
            value: msg.value,
            gas: msg.gas_limit,
        });
    }

    fn on_call_enter(&mut self, depth: usize, msg: &CallMessage) {
        self.events.push(TraceEvent::Enter {
            depth,
            from: msg.caller,
            to: msg.to,
            value: msg.value,
            gas: msg.gas_limit,
            input: msg.input.clone(),
        });
    }

    fn on_call_exit(&mut self, depth: usize, outcome: &CallOutcome) {
        self.events.push(TraceEvent::Exit {
            depth,
            gas_left: outcome.gas_left,
            output: outcome.output.clone(),
            status: outcome.status.to_string(),
        });
    }

    fn on_tx_end(&mut self, gas_used: u64, error: Option<&str>) {
        self.events.push(TraceEvent::TxEnd { gas_used, error: error.map(str::to_owned) });
    }

    fn flush(&mut self) -> Result<(), TracerError> {
        for event in self.events.drain(..) {
            serde_json::to_writer(&mut self.out, &event)?;
            self.out.write_all(b"\n")?;
        }
        self.out.flush()?;
        Ok(())
    }
}

/// Writes the trace of every transaction to `trace-<index>-<hash>.jsonl` under a directory.
#[derive(Debug, Clone)]
pub struct FileTracerFactory {
    dir: PathBuf,
}

impl FileTracerFactory {
    /// Creates a factory writing into `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the trace file of transaction `index`.
    pub fn trace_path(&self, index: usize, tx_hash: B256) -> PathBuf {
        self.dir.join(format!("trace-{index}-{tx_hash}.jsonl"))
    }
}

impl TracerFactory for FileTracerFactory {
    fn get_tracer(&self, index: usize, tx_hash: B256) -> Result<Box<dyn Tracer>, TracerError> {
        let file = File::create(self.trace_path(index, tx_hash))?;
        Ok(Box::new(JsonLinesTracer::new(BufWriter::new(file))))
    }
}
