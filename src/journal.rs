//! Append-only attempt journal.
//!
//! One JSON object per line with a UTC timestamp. Writing never fails the
//! caller: a journal that cannot be written only produces a warning.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{OpenOptions, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::common::StepOutcome;
use crate::common::paths;
use crate::package::AttemptPhase;
use crate::ui::prelude::*;

const JOURNAL_FILE: &str = "install.jsonl";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEvent {
    Attempt {
        package: String,
        source: String,
        phase: AttemptPhase,
    },
    Installed {
        package: String,
        source: String,
    },
    AttemptFailed {
        package: String,
        source: String,
        error: String,
    },
    PackageFailed {
        package: String,
    },
    Repair {
        error: Option<String>,
    },
    Cancelled {
        remaining: usize,
    },
    Step {
        name: String,
        outcome: StepOutcome,
    },
}

impl JournalEvent {
    pub fn describe(&self) -> String {
        match self {
            Self::Attempt {
                package,
                source,
                phase,
            } => format!("attempt {package} from {source} ({phase})"),
            Self::Installed { package, source } => format!("{package} installed from {source}"),
            Self::AttemptFailed {
                package,
                source,
                error,
            } => format!("{package} failed from {source}: {error}"),
            Self::PackageFailed { package } => format!("{package} failed from every source"),
            Self::Repair { error: None } => "dependency repair ran".to_string(),
            Self::Repair { error: Some(e) } => format!("dependency repair failed: {e}"),
            Self::Cancelled { remaining } => format!("cancelled with {remaining} package(s) left"),
            Self::Step { name, outcome } => format!("step {name}: {outcome}"),
        }
    }

    fn is_failure(&self) -> bool {
        match self {
            Self::AttemptFailed { .. } | Self::PackageFailed { .. } | Self::Cancelled { .. } => {
                true
            }
            Self::Repair { error } => error.is_some(),
            Self::Step { outcome, .. } => !outcome.is_success(),
            Self::Attempt { .. } | Self::Installed { .. } => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: JournalEvent,
}

/// Destination of install-loop events.
pub trait AttemptSink {
    fn record(&mut self, event: JournalEvent);
}

/// JSONL journal on disk
#[derive(Debug, Clone)]
pub struct FileJournal {
    path: PathBuf,
}

impl FileJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data_dir>/startup/logs/install.jsonl`
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(paths::logs_dir()?.join(JOURNAL_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, event: &JournalEvent) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            create_dir_all(parent).context("Failed to create journal directory")?;
        }

        let entry = JournalEntry {
            timestamp: Utc::now(),
            event: event.clone(),
        };
        let line = serde_json::to_string(&entry).context("Failed to serialize journal entry")?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open journal {}", self.path.display()))?;
        writeln!(file, "{line}").context("Failed to write journal entry")?;
        Ok(())
    }

    /// All entries, newest first. Unparseable lines are skipped.
    pub fn entries(&self) -> Result<Vec<JournalEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read journal {}", self.path.display()))?;

        let mut entries: Vec<JournalEntry> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        entries.reverse();
        Ok(entries)
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).context("Failed to remove journal file")?;
        }
        Ok(())
    }

    pub fn print_recent(&self, limit: usize) -> Result<()> {
        let entries = self.entries()?;

        if entries.is_empty() {
            emit(
                Level::Info,
                "logs.empty",
                &format!("{} No install history yet.", char::from(NerdFont::Info)),
                None,
            );
            return Ok(());
        }

        emit(
            Level::Info,
            "logs.list.start",
            &format!("{} Recent install history:", char::from(NerdFont::List)),
            None,
        );
        separator(true);

        for entry in entries.iter().take(limit) {
            let time = entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC");
            let icon = if entry.event.is_failure() {
                NerdFont::CrossCircle
            } else {
                NerdFont::Check
            };
            emit(
                Level::Info,
                "logs.entry",
                &format!(
                    "{} {} {}  {}",
                    char::from(NerdFont::Clock),
                    time,
                    char::from(icon),
                    entry.event.describe()
                ),
                serde_json::to_value(entry).ok(),
            );
        }

        if entries.len() > limit {
            emit(
                Level::Info,
                "logs.more",
                &format!("... {} older entries", entries.len() - limit),
                None,
            );
        }
        Ok(())
    }
}

impl AttemptSink for FileJournal {
    fn record(&mut self, event: JournalEvent) {
        if let Err(e) = self.append(&event) {
            emit(
                Level::Warn,
                "journal.write_failed",
                &format!(
                    "{} Could not write install journal: {e:#}",
                    char::from(NerdFont::Warning)
                ),
                None,
            );
        }
    }
}

/// Journal kept in memory, used when the log directory is unavailable.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    events: Vec<JournalEvent>,
}

impl MemoryJournal {
    pub fn events(&self) -> impl Iterator<Item = &JournalEvent> {
        self.events.iter()
    }
}

impl AttemptSink for MemoryJournal {
    fn record(&mut self, event: JournalEvent) {
        self.events.push(event);
    }
}

/// The journal of one command: on disk when possible, in memory otherwise.
#[derive(Debug)]
pub enum RunJournal {
    File(FileJournal),
    Memory(MemoryJournal),
}

impl RunJournal {
    pub fn open() -> Self {
        match FileJournal::open_default() {
            Ok(journal) => {
                emit(
                    Level::Debug,
                    "journal.path",
                    &format!("Journal: {}", journal.path().display()),
                    None,
                );
                Self::File(journal)
            }
            Err(e) => {
                emit(
                    Level::Warn,
                    "journal.unavailable",
                    &format!(
                        "{} Install journal unavailable, keeping it in memory: {e:#}",
                        char::from(NerdFont::Warning)
                    ),
                    None,
                );
                Self::Memory(MemoryJournal::default())
            }
        }
    }

    /// Events that never reached disk are replayed at debug level.
    pub fn finish(self) {
        if let Self::Memory(journal) = self {
            for event in journal.events() {
                emit(Level::Debug, "journal.memory", &event.describe(), None);
            }
        }
    }
}

impl AttemptSink for RunJournal {
    fn record(&mut self, event: JournalEvent) {
        match self {
            Self::File(journal) => journal.record(event),
            Self::Memory(journal) => journal.record(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = FileJournal::new(dir.path().join("logs").join(JOURNAL_FILE));

        journal.record(JournalEvent::Attempt {
            package: "nmap".into(),
            source: "default".into(),
            phase: AttemptPhase::TryingPrimary,
        });
        journal.record(JournalEvent::Installed {
            package: "nmap".into(),
            source: "default".into(),
        });

        let entries = journal.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[0].event, JournalEvent::Installed { .. }));
        assert!(entries[0].timestamp >= entries[1].timestamp);
    }

    #[test]
    fn lines_are_tagged_json() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FileJournal::new(dir.path().join(JOURNAL_FILE));
        journal
            .append(&JournalEvent::PackageFailed {
                package: "ghost-pkg".into(),
            })
            .unwrap();

        let raw = std::fs::read_to_string(journal.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(raw.trim()).unwrap();
        assert_eq!(value["event"], "package_failed");
        assert_eq!(value["package"], "ghost-pkg");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn step_outcomes_survive_the_journal() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FileJournal::new(dir.path().join(JOURNAL_FILE));
        let event = JournalEvent::Step {
            name: "theme".into(),
            outcome: StepOutcome::Ignored("grub.cfg missing".into()),
        };
        journal.append(&event).unwrap();

        assert_eq!(journal.entries().unwrap()[0].event, event);
    }

    #[test]
    fn garbage_lines_are_skipped_and_clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FileJournal::new(dir.path().join(JOURNAL_FILE));
        journal.append(&JournalEvent::Repair { error: None }).unwrap();
        let mut file = OpenOptions::new().append(true).open(journal.path()).unwrap();
        writeln!(file, "not json").unwrap();

        assert_eq!(journal.entries().unwrap().len(), 1);

        journal.clear().unwrap();
        assert!(!journal.path().exists());
        assert!(journal.entries().unwrap().is_empty());
    }

    #[test]
    fn memory_run_journal_keeps_events() {
        let mut journal = RunJournal::Memory(MemoryJournal::default());
        journal.record(JournalEvent::Cancelled { remaining: 3 });

        match &journal {
            RunJournal::Memory(memory) => assert_eq!(
                memory.events().collect::<Vec<_>>(),
                vec![&JournalEvent::Cancelled { remaining: 3 }]
            ),
            RunJournal::File(_) => panic!("expected the in-memory journal"),
        }
        journal.finish();
    }
}
