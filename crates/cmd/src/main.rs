// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueEnum};
use snafu::{ResultExt, Whatever, whatever};
use spillway_queue::{PersistentQueue, QueueBuilder, StringSerializer};
use spillway_telemetry::{LogFormat, LoggingOptions, init_global_logging, set_panic_hook};

type TextQueue = PersistentQueue<String, StringSerializer>;

#[derive(Debug, Parser)]
#[clap(
name = "spillway",
about = "Inspect and feed spillway queue directories",
author = env!("CARGO_PKG_AUTHORS"),
version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Clone, Args)]
struct GlobalArgs {
    /// Byte budget of the queue directory. Defaults to the largest allowed.
    #[arg(long, global = true)]
    max_size: Option<u64>,

    /// Evict the oldest file instead of rejecting pushes when full.
    #[arg(long, global = true)]
    evict: bool,

    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[arg(long, global = true, value_enum, default_value_t = Format::Text)]
    log_format: Format,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

impl GlobalArgs {
    fn logging_options(&self) -> LoggingOptions {
        LoggingOptions::builder()
            .level(self.log_level.clone())
            .log_format(match self.log_format {
                Format::Text => LogFormat::Text,
                Format::Json => LogFormat::Json,
            })
            .build()
    }

    fn open(&self, dir: &Path) -> Result<TextQueue, Whatever> {
        let mut builder = QueueBuilder::new()
            .directory(dir)
            .delete_oldest_on_overflow(self.evict);
        if let Some(max_size) = self.max_size {
            builder = builder.max_size(max_size);
        }
        builder
            .build(|| StringSerializer)
            .with_whatever_context(|e| format!("failed to open queue at {}: {e}", dir.display()))
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Push(PushArgs),
    Pop(PopArgs),
    Peek(PeekArgs),
    Stat(StatArgs),
    Clear(ClearArgs),
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Append messages to a queue directory, creating it when missing.
Examples:

spillway push /var/lib/spillway/events hello world

")]
struct PushArgs {
    dir:      PathBuf,
    #[arg(required = true)]
    messages: Vec<String>,
}

impl PushArgs {
    fn run(&self, global: &GlobalArgs) -> Result<(), Whatever> {
        let queue = global.open(&self.dir)?;
        for message in &self.messages {
            let accepted = queue
                .push(message)
                .whatever_context("failed to push message")?;
            if !accepted {
                whatever!("queue at {} is full", self.dir.display());
            }
        }
        queue.close().whatever_context("failed to close queue")
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Remove messages from a queue directory and print them, oldest first.
Examples:

spillway pop /var/lib/spillway/events -n 10
spillway pop /var/lib/spillway/events --timeout-ms 5000

")]
struct PopArgs {
    dir:        PathBuf,
    /// Number of messages to pop.
    #[arg(short = 'n', long, default_value_t = 1)]
    count:      usize,
    /// Wait up to this long for each message instead of stopping when empty.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

impl PopArgs {
    fn run(&self, global: &GlobalArgs) -> Result<(), Whatever> {
        let queue = global.open(&self.dir)?;
        for _ in 0..self.count {
            let popped = match self.timeout_ms {
                Some(ms) => queue.blocking_pop(Some(Duration::from_millis(ms))),
                None => queue.pop(),
            }
            .whatever_context("failed to pop message")?;

            let Some(message) = popped else {
                break;
            };
            println!("{message}");
        }
        queue.close().whatever_context("failed to close queue")
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Print the oldest message without removing it.
Examples:

spillway peek /var/lib/spillway/events

")]
struct PeekArgs {
    dir: PathBuf,
}

impl PeekArgs {
    fn run(&self, global: &GlobalArgs) -> Result<(), Whatever> {
        let queue = global.open(&self.dir)?;
        match queue.peek().whatever_context("failed to peek message")? {
            Some(message) => println!("{message}"),
            None => eprintln!("queue is empty"),
        }
        queue.close().whatever_context("failed to close queue")
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Print counters of a queue directory and any quarantined files.
Examples:

spillway stat /var/lib/spillway/events

")]
struct StatArgs {
    dir: PathBuf,
}

impl StatArgs {
    fn run(&self, global: &GlobalArgs) -> Result<(), Whatever> {
        let queue = global.open(&self.dir)?;
        let storage = queue.raw().queue();

        println!("path:            {}", storage.path().display());
        println!("max_size:        {}", storage.max_size());
        println!(
            "count:           {}",
            queue.count().whatever_context("failed to read count")?
        );
        println!(
            "bytes:           {}",
            queue.bytes().whatever_context("failed to read bytes")?
        );
        println!(
            "remaining_bytes: {}",
            queue
                .remaining_bytes()
                .whatever_context("failed to read remaining bytes")?
        );
        println!(
            "remaining_count: {}",
            queue
                .remaining_count()
                .whatever_context("failed to read remaining count")?
        );
        println!(
            "files:           {}",
            storage.files().whatever_context("failed to read files")?
        );
        for path in storage
            .corrupted_files()
            .whatever_context("failed to list corrupted files")?
        {
            println!("corrupted:       {}", path.display());
        }
        queue.close().whatever_context("failed to close queue")
    }
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Drop every message in a queue directory.
Examples:

spillway clear /var/lib/spillway/events

")]
struct ClearArgs {
    dir: PathBuf,
}

impl ClearArgs {
    fn run(&self, global: &GlobalArgs) -> Result<(), Whatever> {
        let queue = global.open(&self.dir)?;
        queue.clear().whatever_context("failed to clear queue")?;
        queue.close().whatever_context("failed to close queue")
    }
}

fn main() -> Result<(), Whatever> {
    let cli = Cli::parse();
    let _guards = init_global_logging("spillway", &cli.global.logging_options());
    set_panic_hook();

    match &cli.commands {
        Commands::Push(args) => args.run(&cli.global),
        Commands::Pop(args) => args.run(&cli.global),
        Commands::Peek(args) => args.run(&cli.global),
        Commands::Stat(args) => args.run(&cli.global),
        Commands::Clear(args) => args.run(&cli.global),
    }
}
