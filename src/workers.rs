//! The build pipeline: parallel per-file compression with ordered collation.
//!
//! A fixed pool of worker threads drains a job channel of source files and
//! sends back `(index, Entry)` pairs; the coordinator slots results into a
//! pre-sized vector so the archive order always matches the sorted input,
//! regardless of completion order. Noise entries are built afterwards on the
//! coordinator thread because they must consume the noise RNG stream in
//! index order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel::bounded;
use log::{debug, warn};

use crate::assemble;
use crate::config::BuildConfig;
use crate::entry::{self, Entry, EntryOptions};
use crate::error::ArchiveError;
use crate::hooks::Hooks;
use crate::noise::NoiseRng;
use crate::walk::{self, FileItem};

/// Runs a full build: walk, compress in parallel, append noise, assemble.
/// Returns the number of entries written. Aborts on the first per-file
/// error; staged temp files are cleaned up on every path.
pub fn build_archive(cfg: &BuildConfig, hooks: &Hooks) -> Result<usize, ArchiveError> {
    cfg.validate()?;
    if cfg.strategy.is_ignored() {
        let msg = format!(
            "strategy {:?} has no effect here; falling back to default",
            cfg.strategy.as_str()
        );
        warn!("{}", msg);
        hooks.log(&msg);
    }

    let items = walk::list_files(&cfg.src_dir, &cfg.out_zip, cfg.include_hidden)?;
    if items.is_empty() {
        return Err(ArchiveError::EmptyInput);
    }
    hooks.log(&format!("Files found: {}", items.len()));

    let opts = EntryOptions::from_config(cfg);
    let total = items.len() + cfg.noise_files as usize;
    let workers = cfg.workers.max(1);

    let mut slots: Vec<Option<Entry>> = Vec::with_capacity(items.len());
    slots.resize_with(items.len(), || None);
    let mut first_err: Option<ArchiveError> = None;
    let mut done = 0usize;
    let abort = AtomicBool::new(false);

    thread::scope(|s| {
        let (job_tx, job_rx) = bounded::<FileItem>(workers);
        let (res_tx, res_rx) = bounded::<(usize, String, Result<Entry, ArchiveError>)>(workers);

        let opts_ref = &opts;
        let abort_ref = &abort;

        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let res_tx = res_tx.clone();
            s.spawn(move || {
                for item in job_rx.iter() {
                    if abort_ref.load(Ordering::Relaxed) {
                        continue;
                    }
                    let built =
                        entry::build_file_entry(opts_ref, &item.path, &item.rel, item.mtime);
                    if res_tx.send((item.index, item.rel, built)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(job_rx);
        drop(res_tx);

        s.spawn(move || {
            for item in items {
                if abort_ref.load(Ordering::Relaxed) {
                    break;
                }
                if job_tx.send(item).is_err() {
                    break;
                }
            }
        });

        for (index, rel, built) in res_rx.iter() {
            match built {
                Ok(entry) => {
                    slots[index] = Some(entry);
                    done += 1;
                    hooks.progress(done, total, &rel);
                }
                Err(e) => {
                    debug!("compression of {} failed: {}", rel, e);
                    if first_err.is_none() {
                        first_err = Some(e);
                        abort.store(true, Ordering::Relaxed);
                    }
                }
            }
        }
    });

    if let Some(err) = first_err {
        // Dropping the collated entries unlinks their staged payloads.
        return Err(err);
    }
    let mut entries: Vec<Entry> = slots.into_iter().flatten().collect();

    let mut rng = NoiseRng::from_seed(cfg.seed);
    for i in 0..cfg.noise_files {
        let name = format!(".junk/{:04}_{}.bin", i, rng.hex(6));
        let entry = entry::build_noise_entry(&opts, &mut rng, &name, cfg.noise_size)?;
        entries.push(entry);
        done += 1;
        hooks.progress(done, total, &name);
    }

    assemble::write_archive(
        &cfg.out_zip,
        &mut entries,
        cfg.overwrite_central_dir,
        cfg.comment_size as u16,
        &mut rng,
    )?;

    Ok(entries.len())
}
