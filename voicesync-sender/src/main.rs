use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
    sync::{Arc, Mutex},
};

use clap::{ArgAction, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::fmt::MakeWriter;
use voicesync_core::{AddressHistoryEntry, SyncMessage};
use voicesync_sender::{
    AddressBook, SchedulerEvent, SchedulerHandle, SchedulerOptions, SharedAddressBook, SyncClient,
    address_book::{address_book_path, config_dir},
    default_address, spawn_scheduler,
};

#[derive(Parser, Debug)]
#[command(name = "voicesync-send")]
struct SenderArgs {
    /// Receiver `host:port`. Defaults to the most recently used address.
    #[arg(long)]
    address: Option<String>,

    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    auto_send: bool,

    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    auto_clear: bool,

    /// Ask the receiver to press Enter after pasting.
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    auto_enter: bool,

    #[command(subcommand)]
    command: Option<SenderCommand>,
}

#[derive(Subcommand, Debug)]
enum SenderCommand {
    /// Send one piece of text and exit.
    Send { text: String },
    /// Show or edit the address history.
    Addresses {
        #[command(subcommand)]
        action: Option<AddressAction>,
    },
}

#[derive(Subcommand, Debug)]
enum AddressAction {
    List,
    Forget { address: String },
    Clear,
}

#[derive(Clone)]
struct FileMakeWriter {
    file: Arc<Mutex<File>>,
}

struct FileWriterGuard {
    file: Arc<Mutex<File>>,
}

impl Write for FileWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut locked = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        locked.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut locked = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        locked.flush()
    }
}

impl<'a> MakeWriter<'a> for FileMakeWriter {
    type Writer = FileWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        FileWriterGuard {
            file: Arc::clone(&self.file),
        }
    }
}

/// The REPL owns stdout, so logs go to a file.
fn init_logging() {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();

    let log_path = sender_log_path();
    let file = match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("failed to open log file {}: {err}", log_path.display());
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(io::stderr)
                .init();
            return;
        }
    };

    let make_writer = FileMakeWriter {
        file: Arc::new(Mutex::new(file)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .with_writer(make_writer)
        .init();
}

fn sender_log_path() -> PathBuf {
    let dir = config_dir().join("logs");
    let _ = std::fs::create_dir_all(&dir);
    dir.join("voicesync-send.log")
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let args = SenderArgs::parse();
    let mut book = AddressBook::open(address_book_path());

    let address = args
        .address
        .clone()
        .or_else(|| book.latest().map(str::to_owned))
        .unwrap_or_else(default_address);

    match args.command {
        Some(SenderCommand::Send { ref text }) => {
            send_once(SharedAddressBook::new(book), &address, text, args.auto_enter).await
        }
        Some(SenderCommand::Addresses { action }) => manage_addresses(&mut book, action),
        None => {
            let options = SchedulerOptions {
                auto_send: args.auto_send,
                auto_clear: args.auto_clear,
                auto_enter: args.auto_enter,
            };
            run_repl(book, address, options).await
        }
    }
}

async fn send_once(
    book: SharedAddressBook,
    address: &str,
    text: &str,
    auto_enter: bool,
) -> ExitCode {
    let client = match SyncClient::new(address) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    match client.send_message(&SyncMessage::new(text, auto_enter)).await {
        Ok(()) => {
            println!("sent to {}", client.endpoint());
            if let Err(err) = book.touch(address.to_owned()).await {
                warn!("failed to save address history: {err}");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("send failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn manage_addresses(book: &mut AddressBook, action: Option<AddressAction>) -> ExitCode {
    let result = match action.unwrap_or(AddressAction::List) {
        AddressAction::List => {
            print_addresses(&book.entries().cloned().collect::<Vec<_>>());
            Ok(())
        }
        AddressAction::Forget { address } => book.forget(&address).map(|removed| {
            if !removed {
                println!("{address} is not in the history");
            }
        }),
        AddressAction::Clear => book.clear(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("address history: {err}");
            ExitCode::FAILURE
        }
    }
}

fn print_addresses(entries: &[AddressHistoryEntry]) {
    if entries.is_empty() {
        println!("no saved addresses");
        return;
    }
    for entry in entries {
        let when = chrono::DateTime::from_timestamp_millis(entry.last_used_at_millis)
            .map(|at| at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!("{:<28} {}", entry.address, when);
    }
}

struct Repl {
    scheduler: SchedulerHandle,
    book: SharedAddressBook,
    address: String,
}

enum Flow {
    Continue,
    Quit,
}

async fn run_repl(book: AddressBook, address: String, options: SchedulerOptions) -> ExitCode {
    let client = match SyncClient::new(&address) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    info!(endpoint = %client.endpoint(), ?options, "sender starting");
    println!("voicesync: sending to {}", client.endpoint());
    println!("type text to sync, /help for commands");

    let (scheduler, mut events) = spawn_scheduler(options, Arc::new(client));
    let mut repl = Repl {
        scheduler,
        book: SharedAddressBook::new(book),
        address,
    };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Flow::Quit = repl.handle_line(line).await {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!("stdin read failed: {err}");
                    break;
                }
            },
            Some(event) = events.recv() => repl.render(event).await,
        }
    }

    ExitCode::SUCCESS
}

impl Repl {
    async fn handle_line(&mut self, line: String) -> Flow {
        let Some(command) = line.strip_prefix('/') else {
            self.scheduler.edit(line);
            return Flow::Continue;
        };

        let mut parts = command.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let arg = parts.next();

        match (name, arg) {
            ("send", _) => self.scheduler.send_now(),
            ("clear", _) => self.scheduler.clear(),
            ("auto-send", Some(value)) => match parse_toggle(value) {
                Some(enabled) => self.scheduler.set_auto_send(enabled),
                None => println!("usage: /auto-send on|off"),
            },
            ("auto-clear", Some(value)) => match parse_toggle(value) {
                Some(enabled) => self.scheduler.set_auto_clear(enabled),
                None => println!("usage: /auto-clear on|off"),
            },
            ("auto-enter", Some(value)) => match parse_toggle(value) {
                Some(enabled) => self.scheduler.set_auto_enter(enabled),
                None => println!("usage: /auto-enter on|off"),
            },
            ("connect", Some(address)) => self.connect(address).await,
            ("addresses", _) => print_addresses(&self.book.entries()),
            ("forget", Some(address)) => match self.book.forget(address.to_owned()).await {
                Ok(true) => println!("forgot {address}"),
                Ok(false) => println!("{address} is not in the history"),
                Err(err) => println!("address history: {err}"),
            },
            ("records", _) => self.print_records().await,
            ("status", _) => self.print_status().await,
            ("quit" | "exit", _) => return Flow::Quit,
            _ => print_help(),
        }
        Flow::Continue
    }

    async fn connect(&mut self, address: &str) {
        match SyncClient::new(address) {
            Ok(client) => {
                println!("now sending to {}", client.endpoint());
                self.scheduler.set_transport(Arc::new(client));
                self.address = address.to_owned();
                self.touch(address.to_owned()).await;
            }
            Err(err) => println!("{err}"),
        }
    }

    async fn touch(&self, address: String) {
        if let Err(err) = self.book.touch(address).await {
            warn!("failed to save address history: {err}");
        }
    }

    async fn render(&self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::BufferChanged(buffer) if buffer.is_empty() => println!("(cleared)"),
            SchedulerEvent::BufferChanged(_) => {}
            SchedulerEvent::Sending { content } => {
                println!("sending {} chars...", content.chars().count());
            }
            SchedulerEvent::Recorded { record, address } if record.success => {
                println!("[{}] synced to {address}", record.timestamp);
                self.touch(address).await;
            }
            SchedulerEvent::Recorded { record, .. } => {
                println!("[{}] failed: {}", record.timestamp, record.message);
            }
            SchedulerEvent::Status(status) => println!("{status}"),
        }
    }

    async fn print_records(&self) {
        let Some(snapshot) = self.scheduler.snapshot().await else {
            return;
        };
        if snapshot.records.is_empty() {
            println!("no sync attempts yet");
        }
        for record in snapshot.records {
            let mark = if record.success { "ok  " } else { "FAIL" };
            println!("{} {} {:?} {}", record.timestamp, mark, record.content, record.message);
        }
    }

    async fn print_status(&self) {
        let Some(snapshot) = self.scheduler.snapshot().await else {
            return;
        };
        println!("receiver:   {}", self.address);
        println!("buffer:     {:?}", snapshot.buffer);
        println!(
            "auto-send:  {} auto-clear: {} auto-enter: {}",
            on_off(snapshot.options.auto_send),
            on_off(snapshot.options.auto_clear),
            on_off(snapshot.options.auto_enter)
        );
        println!(
            "pending:    send={} clear={}",
            snapshot.send_pending, snapshot.clear_pending
        );
    }
}

fn parse_toggle(value: &str) -> Option<bool> {
    match value {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

fn print_help() {
    println!("commands:");
    println!("  /send                  send the buffer now");
    println!("  /clear                 empty the buffer");
    println!("  /auto-send on|off");
    println!("  /auto-clear on|off");
    println!("  /auto-enter on|off");
    println!("  /connect <host:port>   switch receiver");
    println!("  /addresses             list saved receivers");
    println!("  /forget <host:port>    remove a saved receiver");
    println!("  /records               recent sync attempts");
    println!("  /status");
    println!("  /quit");
}
