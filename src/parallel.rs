//! Conversation-level fan-out.
//!
//! Each talker is an independent unit of work: its rows are read, decoded and labelled
//! without touching any shared mutable state, so a pool of scoped threads drains a
//! bounded job queue and reports back over a result channel.

use crate::datasource::{MessageStore, StoreReader};
use crate::directory::{
    find_contact_db, load_contact_book, load_group_directory, resolve_talker_inputs,
};
use crate::exporter::{csv_file_name, write_csv_file};
use crate::resolver::Resolver;
use crate::utils::ExportConfig;
use crossbeam_channel::{SendTimeoutError, bounded, unbounded};
use eyre::{Context, Result, eyre};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What happened to a single conversation.
#[derive(Debug)]
pub enum ConversationOutcome {
    Exported { path: PathBuf, messages: usize },
    Empty,
    Failed(eyre::Report),
}

#[derive(Debug, Default)]
pub struct ExportSummary {
    /// `(talker, csv path)` for every exported conversation, sorted by talker.
    pub exported: Vec<(String, PathBuf)>,
    pub empty: usize,
    pub failed: Vec<(String, String)>,
}

pub fn execute(config: &ExportConfig) -> Result<ExportSummary> {
    fs::create_dir_all(&config.output_dir).wrap_err_with(|| {
        format!(
            "Failed to create output directory: {}",
            config.output_dir.display()
        )
    })?;

    let store = MessageStore::open(&config.data_dir)?;
    let available = store.list_talkers()?;
    let resolver = load_resolver(config);

    let talkers = match &config.talkers {
        Some(inputs) if !inputs.is_empty() => {
            resolve_talker_inputs(inputs, resolver.contacts(), &available)?
        }
        _ => available,
    };
    let talkers = distinct(talkers);
    info!(count = talkers.len(), "Exporting conversations");

    Ok(run_pool(&store, &resolver, &talkers, config))
}

/// Drop repeated talkers, keeping the first occurrence.
fn distinct(talkers: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    talkers
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Directory tables are optional: a broken contact database only costs the labels.
fn load_resolver(config: &ExportConfig) -> Resolver {
    let contact_db = config
        .contact_db
        .clone()
        .unwrap_or_else(|| find_contact_db(&config.data_dir));

    let contacts = load_contact_book(&contact_db).unwrap_or_else(|e| {
        warn!("Contact book unavailable ({}): {:#}", contact_db.display(), e);
        Default::default()
    });
    let groups = load_group_directory(&contact_db).unwrap_or_else(|e| {
        warn!("Group directory unavailable ({}): {:#}", contact_db.display(), e);
        Default::default()
    });
    debug!(contacts = contacts.len(), group_members = groups.len(), "Loaded directory");

    let resolver = Resolver::new(contacts, groups);
    match &config.self_label {
        Some(label) => resolver.with_self_label(label.as_str()),
        None => resolver,
    }
}

pub fn run_pool(
    store: &MessageStore,
    resolver: &Resolver,
    talkers: &[String],
    config: &ExportConfig,
) -> ExportSummary {
    let (job_tx, job_rx) = bounded::<String>(64);
    let (result_tx, result_rx) = unbounded::<(String, ConversationOutcome)>();
    let n_workers = config.workers.max(1).min(talkers.len().max(1));

    std::thread::scope(|s| {
        for _ in 0..n_workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();

            s.spawn(move || {
                let reader = store.connect();
                if let Err(e) = &reader {
                    warn!("Worker failed to open message store: {:#}", e);
                }

                while let Ok(talker) = job_rx.recv() {
                    let outcome = match &reader {
                        Ok(reader) => export_conversation(reader, resolver, &talker, config)
                            .unwrap_or_else(ConversationOutcome::Failed),
                        Err(e) => ConversationOutcome::Failed(eyre!(
                            "Message store unavailable: {:#}",
                            e
                        )),
                    };
                    if result_tx.send((talker, outcome)).is_err() {
                        break;
                    }
                }
            });
        }

        drop(job_rx);
        drop(result_tx);

        'outer: for talker in talkers {
            let mut pending = talker.clone();
            loop {
                match job_tx.send_timeout(pending, Duration::from_millis(50)) {
                    Ok(()) => break,
                    Err(SendTimeoutError::Disconnected(_)) => break 'outer,
                    Err(SendTimeoutError::Timeout(r)) => {
                        pending = r;
                    }
                }
            }
        }

        drop(job_tx);
    });

    let mut summary = ExportSummary::default();
    for (talker, outcome) in result_rx.iter() {
        match outcome {
            ConversationOutcome::Exported { path, messages } => {
                info!("Exported {} message(s): {} -> {}", messages, talker, path.display());
                summary.exported.push((talker, path));
            }
            ConversationOutcome::Empty => {
                debug!("No messages for {}", talker);
                summary.empty += 1;
            }
            ConversationOutcome::Failed(e) => {
                warn!("Failed to export {}: {:#}", talker, e);
                summary.failed.push((talker, format!("{:#}", e)));
            }
        }
    }
    summary.exported.sort();
    summary.failed.sort();
    summary
}

fn export_conversation(
    reader: &StoreReader,
    resolver: &Resolver,
    talker: &str,
    config: &ExportConfig,
) -> Result<ConversationOutcome> {
    let mut messages = reader.messages(talker, &config.range, config.limit)?;
    if messages.is_empty() {
        return Ok(ConversationOutcome::Empty);
    }

    resolver.resolve(&mut messages);
    let path = config
        .output_dir
        .join(csv_file_name(talker, &messages[0].talker_display));
    write_csv_file(&path, &messages)?;

    Ok(ConversationOutcome::Exported {
        path,
        messages: messages.len(),
    })
}
