//! `layersync session`: persisted clients per document.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tabled::{settings::Style, Table, Tabled};

use layersync_core::session::{self, SessionFile};

#[derive(Subcommand, Debug)]
pub enum SessionCommand {
    /// List saved sessions and their clients.
    List(SessionListArgs),
    /// Forget the saved clients of a document.
    Remove {
        /// Document name the session was saved under.
        document: String,
    },
}

#[derive(Args, Debug)]
pub struct SessionListArgs {
    /// Only show the session of this document.
    #[arg(long)]
    pub document: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct ClientRow {
    #[tabled(rename = "document")]
    document: String,
    #[tabled(rename = "client")]
    client: String,
    #[tabled(rename = "role")]
    role: String,
    #[tabled(rename = "stream")]
    stream: String,
    #[tabled(rename = "paused")]
    paused: bool,
    #[tabled(rename = "visible")]
    visible: bool,
    #[tabled(rename = "server")]
    server: String,
}

pub fn run(command: SessionCommand) -> Result<()> {
    let home = super::home()?;
    match command {
        SessionCommand::List(args) => {
            let mut sessions = session::list_at(&home).context("failed to read saved sessions")?;
            if let Some(document) = args.document.as_ref() {
                sessions.retain(|s| &s.document == document);
            }
            if args.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&sessions)
                        .context("failed to serialize session JSON")?
                );
            } else {
                print_table(sessions);
            }
        }
        SessionCommand::Remove { document } => {
            session::remove_at(&home, &document)
                .with_context(|| format!("failed to remove session of '{document}'"))?;
            println!("removed session: {document}");
        }
    }
    Ok(())
}

fn print_table(sessions: Vec<SessionFile>) {
    let rows: Vec<ClientRow> = sessions
        .into_iter()
        .flat_map(|s| {
            let document = s.document;
            s.clients.into_iter().map(move |c| ClientRow {
                document: document.clone(),
                client: c.client.client_id.to_string(),
                role: c.client.role.to_string(),
                stream: c.client.stream_id.to_string(),
                paused: c.paused,
                visible: c.visible,
                server: c.client.server_url,
            })
        })
        .collect();
    if rows.is_empty() {
        println!("No saved sessions.");
        return;
    }
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}
