// keeper: capture and restore named desktop contexts
//
// Commands:
//   keeper keep <name> [--quick] [--yes]
//   keeper restore <name> [--tabs-only | --layout-only] [--clear minimize|close] [--save-current <name>]
//   keeper list | recent | delete <name> | delete-all --yes
//   keeper env keep|restore|list|cleanup <name> [--keep-last N]
//   keeper whitelist add|remove|list [<entry>]
//   keeper clear minimize|close [--force]

use std::env;
use std::io::{self, BufRead, Write};

use anyhow::{anyhow, bail, Context, Result};
use context_keeper::clear::ClearMode;
use context_keeper::config::Config;
use context_keeper::handlers::RestoreScope;
use context_keeper::inventory::UnsavedDocument;
use context_keeper::logging;
use context_keeper::outcome::{Outcome, OutcomeStatus};
use context_keeper::restore::{AppOutcome, RestoreOptions};
use context_keeper::snapshot::{Confirm, KeepOptions};
use context_keeper::ContextKeeper;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

fn print_help() {
    println!(
        r#"keeper - save and restore desktop working contexts

USAGE:
    keeper <COMMAND> [OPTIONS]

COMMANDS:
    keep <name>              Capture open windows, tabs and environment as <name>
    restore <name>           Bring a saved context back
    list                     List saved contexts, newest first
    recent                   Recently kept context names
    delete <name>            Delete a saved context
    delete-all --yes         Delete every saved context
    env <action> <name>      Environment snapshots: keep | restore | list | cleanup
    whitelist <action>       Windows never cleared: add <entry> | remove <entry> | list
    clear <mode>             Minimize or close the current windows: minimize | close
    help                     Show this help message

OPTIONS:
    --quick                  keep: skip unsaved check, Firefox tabs, favicons and env cleanup
    --yes, -y                Answer yes to every confirmation
    --tabs-only              restore: browser tabs only
    --layout-only            restore: place running windows, launch nothing
    --clear <mode>           restore: minimize or close current windows first
    --save-current <name>    restore: keep the current desktop as <name> first
    --keep-last <n>          env cleanup: snapshots to retain (default from config)
    --force                  clear close: terminate windows that ignore the request
    --json                   Output in JSON format

ENVIRONMENT:
    KEEPER_HOME              Data directory (default ~/.keeper)
    KEEPER_LOG               Log filter, e.g. debug (falls back to RUST_LOG)

EXAMPLES:
    keeper keep "client-a"
    keeper restore client-a --clear minimize
    keeper restore client-a --tabs-only
    keeper env cleanup client-a --keep-last 3
"#
    );
}

/// Asks on the terminal unless --yes was given
struct TerminalConfirm {
    assume_yes: bool,
}

impl TerminalConfirm {
    fn ask(&self, question: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        eprint!("{} [y/N] ", question);
        let _ = io::stderr().flush();
        read_yes(&mut io::stdin().lock())
    }
}

/// One answer line; anything but y/yes (or a read failure) is a no
fn read_yes(input: &mut dyn BufRead) -> bool {
    let mut line = String::new();
    // Asked from inside capture, on a runtime worker
    match tokio::task::block_in_place(|| input.read_line(&mut line)) {
        Ok(0) | Err(_) => false,
        Ok(_) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
    }
}

impl Confirm for TerminalConfirm {
    fn confirm_unsaved(&self, unsaved: &[UnsavedDocument]) -> bool {
        if !self.assume_yes {
            eprintln!("These windows have unsaved changes:");
            for doc in unsaved {
                eprintln!("  {}  {}", doc.process_name, doc.title);
            }
        }
        self.ask("Keep anyway?")
    }

    fn confirm_clear(&self, mode: ClearMode) -> bool {
        match mode {
            ClearMode::Minimize => true,
            ClearMode::Close => self.ask("Close all current windows before restoring?"),
        }
    }
}

#[derive(Default)]
struct Args {
    positional: Vec<String>,
    json: bool,
    quick: bool,
    yes: bool,
    force: bool,
    tabs_only: bool,
    layout_only: bool,
    clear: Option<ClearMode>,
    save_current: Option<String>,
    keep_last: Option<usize>,
}

fn parse_args(raw: &[String]) -> Result<Args> {
    let mut args = Args::default();
    let mut i = 0;
    while i < raw.len() {
        match raw[i].as_str() {
            "--json" => args.json = true,
            "--quick" => args.quick = true,
            "--yes" | "-y" => args.yes = true,
            "--force" => args.force = true,
            "--tabs-only" => args.tabs_only = true,
            "--layout-only" => args.layout_only = true,
            "--clear" => {
                i += 1;
                let mode = raw.get(i).ok_or_else(|| anyhow!("--clear needs minimize|close"))?;
                args.clear = Some(mode.parse().map_err(|e: String| anyhow!(e))?);
            }
            "--save-current" => {
                i += 1;
                let name = raw.get(i).ok_or_else(|| anyhow!("--save-current needs a name"))?;
                args.save_current = Some(name.clone());
            }
            "--keep-last" => {
                i += 1;
                let n = raw.get(i).ok_or_else(|| anyhow!("--keep-last needs a number"))?;
                args.keep_last = Some(n.parse().context("--keep-last must be a non-negative integer")?);
            }
            other if other.starts_with("--") => bail!("unknown option {}", other),
            _ => args.positional.push(raw[i].clone()),
        }
        i += 1;
    }
    if args.tabs_only && args.layout_only {
        bail!("--tabs-only and --layout-only cannot be combined");
    }
    Ok(args)
}

fn required<'a>(args: &'a Args, index: usize, usage: &str) -> Result<&'a str> {
    args.positional
        .get(index)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("Usage: {}", usage))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_warnings<T>(outcome: &Outcome<T>) {
    for warning in &outcome.warnings {
        eprintln!("  warning: {}", warning);
    }
}

/// Cancel in-flight work on Ctrl-C; what already finished is kept
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted; finishing what already started");
            on_signal.cancel();
        }
    });
    token
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let raw: Vec<String> = env::args().collect();
    if raw.len() < 2 {
        print_help();
        return Ok(());
    }
    let command = raw[1].as_str();
    let args = parse_args(&raw[2..])?;

    if matches!(command, "help" | "--help" | "-h") {
        print_help();
        return Ok(());
    }

    let config = Config::from_env();
    let keeper = ContextKeeper::new(config);
    let confirm = TerminalConfirm {
        assume_yes: args.yes,
    };

    match command {
        "keep" => {
            let name = required(&args, 0, "keeper keep <name> [--quick]")?;
            let cancel = cancel_on_ctrl_c();
            let outcome = keeper
                .keep(name, KeepOptions { quick: args.quick }, &confirm, &cancel)
                .await
                .with_context(|| format!("Failed to keep '{}'", name))?;
            if args.json {
                return print_json(&outcome);
            }
            let s = &outcome.value;
            println!(
                "Kept '{}': {} application(s), {} browser window(s), {} tab(s)",
                s.name, s.applications, s.browsers, s.tabs
            );
            print_warnings(&outcome);
        }

        "restore" => {
            let name = required(&args, 0, "keeper restore <name>")?;
            let scope = if args.tabs_only {
                RestoreScope::TabsOnly
            } else if args.layout_only {
                RestoreScope::LayoutOnly
            } else {
                RestoreScope::Full
            };
            let options = RestoreOptions {
                scope,
                clear_existing: args.clear,
                save_current: args.save_current.clone(),
            };
            let cancel = cancel_on_ctrl_c();
            let outcome = keeper
                .restore(name, &options, &confirm, &cancel)
                .await
                .with_context(|| format!("Failed to restore '{}'", name))?;
            if args.json {
                print_json(&outcome)?;
            } else {
                let s = &outcome.value;
                println!(
                    "Restored '{}': {} restored, {} skipped, {} failed",
                    s.context_name, s.restored, s.skipped, s.failed
                );
                for report in s.reports.iter().filter(|r| r.outcome != AppOutcome::Restored) {
                    println!(
                        "  {:?} {}: {}",
                        report.outcome,
                        report.application,
                        report.message.as_deref().unwrap_or("")
                    );
                }
                if let Some(env) = &s.environment {
                    println!(
                        "  environment restored in this process; for your shell run {}",
                        env.script_path.display()
                    );
                }
                print_warnings(&outcome);
            }
            if outcome.status == OutcomeStatus::Failure {
                std::process::exit(1);
            }
        }

        "list" => {
            let contexts = keeper.list()?;
            if args.json {
                return print_json(&contexts);
            }
            if contexts.is_empty() {
                println!("No saved contexts");
            }
            for c in contexts {
                println!(
                    "{:<24} {}  {} app(s), {} browser(s), {} tab(s)",
                    c.name, c.timestamp, c.applications, c.browsers, c.tabs
                );
            }
        }

        "recent" => {
            let names = keeper.recent();
            if args.json {
                return print_json(&names);
            }
            for name in names {
                println!("{}", name);
            }
        }

        "delete" => {
            let name = required(&args, 0, "keeper delete <name>")?;
            let deleted = keeper.delete(name)?;
            if args.json {
                return print_json(&serde_json::json!({ "deleted": deleted }));
            }
            if deleted {
                println!("Deleted '{}'", name);
            } else {
                println!("No context named '{}'", name);
            }
        }

        "delete-all" => {
            if !args.yes {
                bail!("delete-all removes every saved context; pass --yes to confirm");
            }
            let deleted = keeper.delete_all()?;
            if args.json {
                return print_json(&serde_json::json!({ "deleted": deleted }));
            }
            println!("Deleted {} context(s)", deleted);
        }

        "env" => {
            let usage = "keeper env keep|restore|list|cleanup <name>";
            let action = required(&args, 0, usage)?;
            let name = required(&args, 1, usage)?;
            match action {
                "keep" => {
                    let file = keeper.keep_environment(name)?;
                    if args.json {
                        return print_json(&file);
                    }
                    println!("Saved {}", file.path.display());
                }
                "restore" => {
                    let restore = keeper.restore_environment(name)?;
                    if args.json {
                        return print_json(&restore);
                    }
                    println!(
                        "Restored from {} ({} added, {} removed, {} changed)",
                        restore.source.display(),
                        restore.added.len(),
                        restore.removed.len(),
                        restore.changed.len()
                    );
                    println!("Run {} to apply it to your shell", restore.script_path.display());
                }
                "list" => {
                    let files = keeper.list_environment(name)?;
                    if args.json {
                        return print_json(&files);
                    }
                    for f in files {
                        let age = f
                            .age
                            .map(|a| format!("{}m ago", a.as_secs() / 60))
                            .unwrap_or_default();
                        println!("{:<32} {:>8} bytes  {}", f.file_name, f.size, age);
                    }
                }
                "cleanup" => {
                    let keep_last = args.keep_last.unwrap_or(keeper.config().env_keep_last);
                    let deleted = keeper.cleanup_environment(name, keep_last)?;
                    if args.json {
                        return print_json(&serde_json::json!({ "deleted": deleted }));
                    }
                    println!("Deleted {} environment snapshot(s)", deleted);
                }
                other => bail!("unknown env action '{}'; {}", other, usage),
            }
        }

        "whitelist" => {
            let usage = "keeper whitelist add|remove|list [<entry>]";
            let whitelist = keeper.whitelist();
            match required(&args, 0, usage)? {
                "list" => {
                    let entries = whitelist.list()?;
                    if args.json {
                        return print_json(&entries);
                    }
                    for entry in entries {
                        println!("{}", entry);
                    }
                }
                "add" => {
                    let entry = required(&args, 1, usage)?;
                    if whitelist.add(entry)? {
                        println!("Added '{}'", entry);
                    } else {
                        println!("'{}' is already whitelisted", entry);
                    }
                }
                "remove" => {
                    let entry = required(&args, 1, usage)?;
                    if whitelist.remove(entry)? {
                        println!("Removed '{}'", entry);
                    } else {
                        println!("'{}' was not removed (absent or protected)", entry);
                    }
                }
                other => bail!("unknown whitelist action '{}'; {}", other, usage),
            }
        }

        "clear" => {
            let mode: ClearMode = required(&args, 0, "keeper clear minimize|close")?
                .parse()
                .map_err(|e: String| anyhow!(e))?;
            if mode == ClearMode::Close && !confirm.confirm_clear(mode) {
                bail!("Aborted");
            }
            let counts = keeper.clear_desktop(mode, args.force)?;
            if args.json {
                return print_json(&counts);
            }
            println!(
                "{} window(s) affected, {} whitelisted, {} excluded, {} failed",
                counts.affected, counts.skipped_whitelisted, counts.excluded, counts.failed
            );
        }

        other => {
            eprintln!("Unknown command: {}", other);
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}
