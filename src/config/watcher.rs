//! Hot reload of the rate limit rule table.
//!
//! Only `[rate_limits]` is re-read on change. A file that fails to parse or
//! validate is logged and the rules in force stay as they are.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_rules;
use crate::security::rate_limit::RuleTable;

pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<RuleTable>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver of validated rule tables.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<RuleTable>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Re-read the file once. Returns whether a new table was sent.
    pub fn reload(&self) -> bool {
        reload_rules(&self.path, &self.update_tx)
    }

    /// Start watching the file. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    tracing::info!(path = ?path, "Config file changed, reloading rate limit rules");
                    reload_rules(&path, &tx);
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

fn reload_rules(path: &Path, tx: &mpsc::UnboundedSender<RuleTable>) -> bool {
    match load_rules(path) {
        Ok(rules) => tx.send(rules).is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "Rejected reloaded rules, keeping current table");
            false
        }
    }
}
