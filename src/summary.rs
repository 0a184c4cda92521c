use anyhow::{Context, Result};
use log::debug;
use serde::Serialize;
use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

const EVENTS_PREFIX: &str = "events.out.";
const EVENTS_SUFFIX: &str = ".jsonl";

// Tells apart writers created within the same clock tick.
static WRITERS: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Serialize)]
struct ScalarEvent<'a> {
    tag: &'a str,
    step: usize,
    value: f32,
    wall_time: f64,
}

// Writes scalar summaries, one JSON object per line, to a fresh events.out.<nanos>.<n>.jsonl file
// inside a log directory, so every run gets its own file. Every record is flushed immediately so
// the file can be followed while a run is in progress.
pub struct SummaryWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl SummaryWriter {
    pub fn create(dir: &Path) -> Result<SummaryWriter> {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("could not create log directory {}", dir.display()))?;
        }
        let started = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        let sequence = WRITERS.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("{EVENTS_PREFIX}{started}.{sequence}{EVENTS_SUFFIX}"));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("could not create summary file {}", path.display()))?;

        Ok(SummaryWriter {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add_scalar(&mut self, tag: &str, step: usize, value: f32) -> Result<()> {
        let wall_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs_f64())
            .unwrap_or_default();
        let event = ScalarEvent {
            tag,
            step,
            value,
            wall_time,
        };

        serde_json::to_writer(&mut self.writer, &event)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        debug!("Summary {tag} step {step}: {value}");
        Ok(())
    }
}
