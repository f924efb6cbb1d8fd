mod commands;
mod render;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use client_core::{
    load_settings, load_settings_from, services::is_searchable, ChatClient, ClientError, ClientEvent, HistoryState,
};
use shared::domain::{ConversationId, UserProfile};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::{broadcast::error::RecvError, Mutex},
};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    commands::{parse_line, ConversationRef, TerminalCommand, HELP},
    render::TimelineCursor,
};

#[derive(Parser, Debug)]
struct Args {
    /// Settings file to read instead of `./client.toml`.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides `server_url` from client.toml and the environment.
    #[arg(long)]
    server_url: Option<String>,
    /// Overrides `credential_db_url`, e.g. `sqlite://./data/client.db`.
    #[arg(long)]
    db: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => load_settings_from(path)?,
        None => load_settings(),
    };
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    if let Some(db) = args.db {
        settings.credential_db_url = db;
    }

    let client = Arc::new(
        ChatClient::connect(&settings)
            .await
            .with_context(|| format!("failed to start client for {}", settings.server_url))?,
    );
    let cursor = Arc::new(Mutex::new(TimelineCursor::default()));
    let printer = tokio::spawn(print_events(
        Arc::clone(&client),
        Arc::clone(&cursor),
        client.subscribe_events(),
    ));

    match client.restore().await {
        Some(identity) => println!("Signed in as {identity}. Type /help for commands."),
        None => println!("Not signed in. Use /login <user> <password> or /register <user> <password>."),
    }

    let mut shell = Shell {
        client,
        cursor,
        listed: Vec::new(),
        found: Vec::new(),
    };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(usage) => {
                println!("{usage}");
                continue;
            }
        };
        debug!(command = command.name(), "terminal: dispatching");
        if command == TerminalCommand::Quit {
            break;
        }
        if let Err(err) = shell.dispatch(command).await {
            println!("{}", err.user_message());
        }
    }

    printer.abort();
    Ok(())
}

struct Shell {
    client: Arc<ChatClient>,
    cursor: Arc<Mutex<TimelineCursor>>,
    listed: Vec<ConversationId>,
    found: Vec<UserProfile>,
}

impl Shell {
    async fn dispatch(&mut self, command: TerminalCommand) -> Result<(), ClientError> {
        match command {
            TerminalCommand::Register { user_name, secret } => {
                self.client.register(&user_name, &secret).await?;
                println!("Welcome, {user_name}.");
                self.list().await;
            }
            TerminalCommand::Login { user_name, secret } => {
                self.client.login(&user_name, &secret).await?;
                println!("Signed in as {user_name}.");
                self.list().await;
            }
            TerminalCommand::Logout => {
                self.client.logout().await;
                self.listed.clear();
                self.found.clear();
            }
            TerminalCommand::List => {
                if let Err(err) = self.client.refresh_conversations().await {
                    debug!(error = %err, "terminal: refresh before listing failed");
                }
                self.list().await;
            }
            TerminalCommand::Open(target) => {
                let Some(conversation_id) = self.resolve(target) else {
                    println!("No such conversation; /list shows the numbers.");
                    return Ok(());
                };
                self.open(&conversation_id).await?;
            }
            TerminalCommand::Search(query) => {
                if !is_searchable(&query) {
                    println!("Type at least 2 characters to search.");
                    return Ok(());
                }
                self.found = self.client.search_users(&query).await?;
                if self.found.is_empty() {
                    println!("No users found.");
                }
                for (position, user) in self.found.iter().enumerate() {
                    println!("{}", render::user_line(position + 1, user));
                }
            }
            TerminalCommand::Start(position) => {
                let Some(user) = self.found.get(position - 1).cloned() else {
                    println!("No such search result; run /search first.");
                    return Ok(());
                };
                let created = self.client.start_conversation(&user.id).await?;
                println!("Conversation with {} ready.", user.user_name);
                self.open(&created.id).await?;
            }
            TerminalCommand::Send(text) => {
                let Some(conversation_id) = self.client.selected_conversation().await else {
                    println!("Open a conversation first (/list, then /open <number>).");
                    return Ok(());
                };
                self.client.send_message(&conversation_id, &text).await?;
            }
            TerminalCommand::Resync => {
                self.client.resync().await?;
                println!("Resynced.");
            }
            TerminalCommand::Status => {
                match self.client.identity().await {
                    Some(identity) => println!("Signed in as {identity}."),
                    None => println!("Not signed in."),
                }
                if let Some(status) = self.client.channel_status().await {
                    println!("{}", render::status_line(&status));
                }
                if let Some(err) = self.client.conversations_error().await {
                    println!("Last conversation refresh failed: {err}");
                }
            }
            TerminalCommand::Help => println!("{HELP}"),
            TerminalCommand::Quit => {}
        }
        Ok(())
    }

    async fn list(&mut self) {
        let Some(me) = self.client.identity().await else {
            println!("Not signed in.");
            return;
        };
        let conversations = render::listing_order(self.client.conversations().await, &me);
        let selected = self.client.selected_conversation().await;
        let now = Utc::now();

        self.listed = conversations.iter().map(|summary| summary.id.clone()).collect();
        if let Some(err) = self.client.conversations_error().await {
            println!("Could not refresh conversations: {err}");
        }
        if conversations.is_empty() {
            println!("{}", render::NO_CONVERSATIONS);
        }
        for (position, summary) in conversations.iter().enumerate() {
            println!(
                "{}",
                render::conversation_line(position + 1, summary, &me, selected.as_ref(), now)
            );
        }
    }

    fn resolve(&self, target: ConversationRef) -> Option<ConversationId> {
        match target {
            ConversationRef::Position(position) => self.listed.get(position - 1).cloned(),
            ConversationRef::Id(id) => Some(ConversationId::new(id)),
        }
    }

    async fn open(&self, conversation_id: &ConversationId) -> Result<(), ClientError> {
        self.cursor.lock().await.reset();
        self.client.select_conversation(conversation_id).await?;
        if self.client.history_state().await == HistoryState::Loaded
            && self.client.timeline().await.is_empty()
        {
            println!("{}", render::NO_MESSAGES);
        }
        Ok(())
    }
}

async fn print_events(
    client: Arc<ChatClient>,
    cursor: Arc<Mutex<TimelineCursor>>,
    mut events: tokio::sync::broadcast::Receiver<ClientEvent>,
) {
    loop {
        match events.recv().await {
            Ok(ClientEvent::TimelineUpdated { conversation_id }) => {
                if client.selected_conversation().await.as_ref() != Some(&conversation_id) {
                    continue;
                }
                let me = client.identity().await;
                let timeline = client.timeline().await;
                let lines =
                    cursor
                        .lock()
                        .await
                        .advance(&conversation_id, &timeline, me.as_ref(), Utc::now());
                for line in lines {
                    println!("{line}");
                }
            }
            Ok(ClientEvent::ChannelStatusChanged(status)) => {
                println!("{}", render::status_line(&status));
            }
            Ok(ClientEvent::SessionChanged(None)) => {
                cursor.lock().await.reset();
                println!("Signed out.");
            }
            Ok(ClientEvent::Error(message)) => debug!(%message, "terminal: client reported error"),
            Ok(ClientEvent::SessionChanged(Some(_)) | ClientEvent::ConversationsUpdated) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "terminal: event printer fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
