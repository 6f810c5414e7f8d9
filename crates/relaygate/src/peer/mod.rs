//! In-memory authoritative peer.
//!
//! Stands in for the authoring tool: holds named tables, answers observer
//! commands forwarded by the hub, and replies with table snapshots that the
//! hub fans out to every observer.

use std::collections::HashMap;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ws::HubEvent;

/// Table `set_var` writes to when the command names none.
pub const DEFAULT_VARS_TABLE: &str = "/project1/web_vars";

/// Largest row or column index `set_cell` will grow a table to.
pub const MAX_TABLE_DIM: usize = 10_000;

/// Rows of cells; row 0 is the header.
pub type Rows = Vec<Vec<String>>;

/// Commands observers send to the authoritative peer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TableCommand {
    GetTable {
        table: String,
    },
    SetCell {
        table: String,
        row: usize,
        col: usize,
        value: Value,
    },
    SetVar {
        key: String,
        value: Value,
        #[serde(default)]
        table: Option<String>,
    },
}

/// Replies the peer sends back through the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerReply {
    TableSnapshot { table: String, rows: Rows },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("table not found: {0}")]
    UnknownTable(String),

    #[error("set_var: no key provided")]
    MissingKey,

    #[error("cell ({row}, {col}) is outside the table size limit")]
    OutOfRange { row: usize, col: usize },
}

#[derive(Debug, Clone, Default)]
pub struct TableStore {
    tables: HashMap<String, Rows>,
}

impl TableStore {
    /// Store seeded with an empty variables table.
    pub fn with_defaults() -> Self {
        let mut store = Self::default();
        store.insert(
            DEFAULT_VARS_TABLE,
            vec![vec!["key".to_string(), "value".to_string()]],
        );
        store
    }

    pub fn insert(&mut self, path: impl Into<String>, rows: Rows) {
        self.tables.insert(path.into(), rows);
    }

    pub fn rows(&self, path: &str) -> Option<&Rows> {
        self.tables.get(path)
    }

    /// Apply a command and return the affected table's snapshot.
    pub fn apply(&mut self, command: TableCommand) -> Result<PeerReply, TableError> {
        match command {
            TableCommand::GetTable { table } => self.snapshot(table),
            TableCommand::SetCell {
                table,
                row,
                col,
                value,
            } => {
                if row >= MAX_TABLE_DIM || col >= MAX_TABLE_DIM {
                    return Err(TableError::OutOfRange { row, col });
                }
                let rows = self.tables.entry(table.clone()).or_default();
                if rows.len() <= row {
                    rows.resize_with(row + 1, Vec::new);
                }
                let cells = &mut rows[row];
                if cells.len() <= col {
                    cells.resize(col + 1, String::new());
                }
                cells[col] = cell_text(&value);
                self.snapshot(table)
            }
            TableCommand::SetVar { key, value, table } => {
                if key.is_empty() {
                    return Err(TableError::MissingKey);
                }
                let table = table
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| DEFAULT_VARS_TABLE.to_string());
                let rows = self
                    .tables
                    .get_mut(&table)
                    .ok_or_else(|| TableError::UnknownTable(table.clone()))?;

                let value = cell_text(&value);
                // Row 0 is the header.
                let existing = rows
                    .iter()
                    .skip(1)
                    .position(|cells| cells.first() == Some(&key))
                    .map(|index| index + 1);
                match existing {
                    Some(index) => {
                        let cells = &mut rows[index];
                        if cells.len() < 2 {
                            cells.resize(2, String::new());
                        }
                        debug!(table = %table, key = %key, old = %cells[1], new = %value, "set_var update");
                        cells[1] = value;
                    }
                    None => {
                        debug!(table = %table, key = %key, value = %value, "set_var append");
                        rows.push(vec![key, value]);
                    }
                }
                self.snapshot(table)
            }
        }
    }

    fn snapshot(&self, table: String) -> Result<PeerReply, TableError> {
        let rows = self
            .tables
            .get(&table)
            .cloned()
            .ok_or_else(|| TableError::UnknownTable(table.clone()))?;
        Ok(PeerReply::TableSnapshot { table, rows })
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Handle one hub frame; returns the reply text to send, if any.
pub fn handle_frame(store: &mut TableStore, text: &str) -> Option<String> {
    let event: HubEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(_) => {
            debug!("ignoring unrecognised frame: {}", text);
            return None;
        }
    };

    match event {
        HubEvent::TdAck => {
            info!("registered as authoritative peer");
            None
        }
        HubEvent::UiToTd { payload } => {
            let command = match serde_json::from_value::<TableCommand>(payload) {
                Ok(command) => command,
                Err(e) => {
                    warn!("ignoring unknown observer command: {}", e);
                    return None;
                }
            };
            match store.apply(command) {
                Ok(reply) => serde_json::to_string(&reply).ok(),
                Err(e) => {
                    warn!("table command failed: {}", e);
                    None
                }
            }
        }
        HubEvent::Error { msg } => {
            warn!("hub reported error: {}", msg);
            None
        }
        other => {
            debug!("ignoring hub event: {:?}", other);
            None
        }
    }
}

/// Connect to the hub at `url` and serve table commands until the socket
/// closes or `shutdown` fires. Returns the final table state.
pub async fn run(url: &str, mut store: TableStore, shutdown: CancellationToken) -> Result<TableStore> {
    let (socket, _) = connect_async(url)
        .await
        .with_context(|| format!("connecting to relay at {url}"))?;
    let (mut sink, mut stream) = socket.split();
    info!(url = %url, "connected to relay");

    sink.send(Message::text(json!({ "type": "td.hello" }).to_string()))
        .await
        .context("sending td.hello")?;

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                if let Some(reply) = handle_frame(&mut store, text.as_str()) {
                    sink.send(Message::text(reply))
                        .await
                        .context("sending reply")?;
                }
            }
            // Pongs are queued by tungstenite and flushed on the next read.
            Some(Ok(Message::Ping(_))) => {}
            Some(Ok(Message::Close(frame))) => {
                info!("relay closed the connection: {:?}", frame);
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e).context("relay socket error"),
            None => break,
        }
    }

    Ok(store)
}
