use std::io;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};

use crate::commit::{commit, CommitOutcome};
use crate::config::{create_config, default_config_path, default_record_path, load_config, save_config};
use crate::generator::{generate, CharGroups, DEFAULT_LENGTH};
use crate::keystore::{KeyStore, KeyringKeyStore, PassphraseKeyStore};
use crate::models::{Configuration, KeySource, Record, ATTRIBUTES};
use crate::storage::CipherStore;
use crate::tracker::{ChangeTracker, EntryId, Status};

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Init,
    List { query: String },
    Show { position: usize, reveal: bool },
    Add { fields: Vec<(String, String)>, generate: bool },
    Edit { position: usize, fields: Vec<(String, String)>, generate: bool },
    Remove { positions: Vec<usize> },
    Tags,
    Generate { length: usize, groups: CharGroups },
    Backups,
    Help,
    Version,
}

#[derive(Debug, PartialEq, Eq)]
struct Cli {
    config: Option<PathBuf>,
    command: Command,
}

pub fn run() -> Result<()> {
    let bin_name = executable_name();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_args(&args)?;

    match cli.command {
        Command::Help => {
            print_usage(&bin_name);
            return Ok(());
        }
        Command::Version => {
            println!("{bin_name} v{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Command::Generate { length, ref groups } => {
            let generated = zeroize::Zeroizing::new(generate(length, groups)?);
            println!("{}", generated.as_str());
            return Ok(());
        }
        _ => {}
    }

    let config_path = match cli.config {
        Some(p) => p,
        None => default_config_path()?,
    };

    if cli.command == Command::Init {
        return init(&config_path);
    }

    let config = load_config(&config_path)?.ok_or_else(|| {
        anyhow!(
            "No configuration at {}. Run `{bin_name} init` first.",
            config_path.display()
        )
    })?;
    tracing::debug!(identity = %config.identity, path = %config.path.display(), "using configuration");
    let store = CipherStore::new(key_store_for(&config));

    match cli.command {
        Command::List { query } => {
            let tracker = ChangeTracker::open(store.load_or_empty(&config)?);
            for id in tracker.filter(&query, false) {
                print_row(&tracker, id);
            }
        }
        Command::Show { position, reveal } => {
            let tracker = ChangeTracker::open(store.load_or_empty(&config)?);
            let id = entry_at(&tracker, position)?;
            if let Some(entry) = tracker.get(id) {
                let record = entry.record();
                for (name, value) in ATTRIBUTES.iter().zip(record.values()) {
                    let shown = if *name == "password" && !reveal && !value.is_empty() {
                        "********"
                    } else {
                        value
                    };
                    println!("{name:>12}: {shown}");
                }
            }
        }
        Command::Add { fields, generate } => {
            edit_session(&store, &config, |tracker| {
                let mut record = Record::default();
                apply_fields(&mut record, &fields, generate)?;
                tracker.add(record);
                Ok(())
            })?;
        }
        Command::Edit {
            position,
            fields,
            generate,
        } => {
            edit_session(&store, &config, |tracker| {
                let id = entry_at(tracker, position)?;
                let mut record = tracker
                    .get(id)
                    .map(|e| e.record().clone())
                    .ok_or_else(|| anyhow!("No entry {position}"))?;
                apply_fields(&mut record, &fields, generate)?;
                tracker.edit(id, record);
                Ok(())
            })?;
        }
        Command::Remove { positions } => {
            edit_session(&store, &config, |tracker| {
                for &position in &positions {
                    let id = entry_at(tracker, position)?;
                    tracker.toggle_delete(id);
                }
                Ok(())
            })?;
        }
        Command::Tags => {
            let tracker = ChangeTracker::open(store.load_or_empty(&config)?);
            for (tag, count) in tracker.tag_counts() {
                println!("{tag} ({count})");
            }
        }
        Command::Backups => {
            for path in store.backups(&config)? {
                println!("{}", path.display());
            }
        }
        Command::Init | Command::Help | Command::Version | Command::Generate { .. } => {}
    }
    Ok(())
}

fn init(config_path: &std::path::Path) -> Result<()> {
    if load_config(config_path)?.is_some() {
        return Err(anyhow!(
            "Configuration already exists at {}",
            config_path.display()
        ));
    }
    println!("Creating new configuration at {}...", config_path.display());
    let default_path = default_record_path()?;
    let stdin = io::stdin();
    let config = create_config(&mut stdin.lock(), &mut io::stdout(), &default_path)?;
    save_config(config_path, &config)?;

    if config.key_source == KeySource::Keyring
        && KeyringKeyStore::new().provision(&config.identity)?
    {
        println!("Generated a new key for {} in the platform keyring.", config.identity);
    }
    println!("Passwords will be stored in {}", config.path.display());
    Ok(())
}

fn key_store_for(config: &Configuration) -> Box<dyn KeyStore> {
    match config.key_source {
        KeySource::Keyring => Box::new(KeyringKeyStore::new()),
        KeySource::Passphrase => Box::new(passphrase_store(config)),
    }
}

/// A passphrase typed before the file exists becomes the file's key, so it is
/// asked for twice.
fn passphrase_store(config: &Configuration) -> PassphraseKeyStore {
    if config.path.exists() {
        PassphraseKeyStore::new()
    } else {
        PassphraseKeyStore::confirming()
    }
}

/// Loads, lets `mutate` change the working set, shows the changes and commits.
fn edit_session<K, F>(store: &CipherStore<K>, config: &Configuration, mutate: F) -> Result<()>
where
    K: KeyStore,
    F: FnOnce(&mut ChangeTracker) -> Result<()>,
{
    let mut tracker = ChangeTracker::open(store.load_or_empty(config)?);
    mutate(&mut tracker)?;

    for id in tracker.filter("", true) {
        print_row(&tracker, id);
    }

    match commit(store, config, &tracker) {
        Ok(CommitOutcome::NoOp) => println!("No changes."),
        Ok(CommitOutcome::Committed) => {
            let s = tracker.summary();
            println!(
                "Saved {} ({} new, {} modified, {} deleted).",
                config.file_name(),
                s.new,
                s.modified,
                s.deleted
            );
        }
        Err(e) => {
            return Err(e).with_context(|| {
                format!(
                    "Nothing was saved and {} is unchanged; run the command again to retry",
                    config.path.display()
                )
            });
        }
    }
    Ok(())
}

fn print_row(tracker: &ChangeTracker, id: EntryId) {
    let (Some(entry), Some(status)) = (tracker.get(id), tracker.status(id)) else {
        return;
    };
    let record = entry.record();
    let position = match status {
        Status::New => "new".to_string(),
        _ => (id.index() + 1).to_string(),
    };
    println!(
        "{} {:>4}  {:<24} {:<20} {:<28} {}",
        status.marker(),
        position,
        record.label,
        record.username,
        record.url,
        record.tags
    );
}

fn entry_at(tracker: &ChangeTracker, position: usize) -> Result<EntryId> {
    position
        .checked_sub(1)
        .and_then(|i| tracker.id_at(i))
        .ok_or_else(|| anyhow!("No entry {position} (there are {})", tracker.len()))
}

fn apply_fields(record: &mut Record, fields: &[(String, String)], generate_password: bool) -> Result<()> {
    for (name, value) in fields {
        if !record.set(name, value) {
            return Err(anyhow!(
                "Unknown field '{name}'. Fields: {}",
                ATTRIBUTES.join(", ")
            ));
        }
    }
    if generate_password {
        let generated = generate(DEFAULT_LENGTH, &CharGroups::default())?;
        record.set("password", &generated);
    }
    if !fields.iter().any(|(name, _)| name == "last_changed") {
        record.touch();
    }
    Ok(())
}

fn parse_args(args: &[String]) -> Result<Cli> {
    let mut config = None;
    let mut rest: Vec<&str> = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                let path = iter.next().ok_or_else(|| anyhow!("--config requires a path"))?;
                config = Some(PathBuf::from(path));
            }
            "-V" | "--version" => {
                return Ok(Cli {
                    config,
                    command: Command::Version,
                });
            }
            "-h" | "--help" => {
                return Ok(Cli {
                    config,
                    command: Command::Help,
                });
            }
            other => rest.push(other),
        }
    }

    let Some((&name, tail)) = rest.split_first() else {
        return Ok(Cli {
            config,
            command: Command::Help,
        });
    };

    let command = match name {
        "init" => Command::Init,
        "list" | "ls" => Command::List {
            query: tail.join(" "),
        },
        "show" => {
            let position = parse_position(tail.first().copied())?;
            Command::Show {
                position,
                reveal: tail.contains(&"--reveal"),
            }
        }
        "add" => {
            let (fields, generate) = parse_fields(tail)?;
            Command::Add { fields, generate }
        }
        "edit" => {
            let position = parse_position(tail.first().copied())?;
            let (fields, generate) = parse_fields(&tail[1..])?;
            if fields.is_empty() && !generate {
                return Err(anyhow!("edit needs at least one field=value"));
            }
            Command::Edit {
                position,
                fields,
                generate,
            }
        }
        "rm" | "remove" => {
            if tail.is_empty() {
                return Err(anyhow!("rm needs at least one entry number"));
            }
            let positions = tail
                .iter()
                .map(|a| parse_position(Some(*a)))
                .collect::<Result<Vec<_>>>()?;
            Command::Remove { positions }
        }
        "tags" => Command::Tags,
        "gen" | "generate" => parse_generate(tail)?,
        "backups" => Command::Backups,
        other => return Err(anyhow!("Unknown command: {other}")),
    };
    Ok(Cli { config, command })
}

fn parse_position(arg: Option<&str>) -> Result<usize> {
    let arg = arg.ok_or_else(|| anyhow!("Missing entry number"))?;
    match arg.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(anyhow!("Invalid entry number: {arg}")),
    }
}

fn parse_fields(args: &[&str]) -> Result<(Vec<(String, String)>, bool)> {
    let mut fields = Vec::new();
    let mut generate = false;
    for arg in args {
        if *arg == "--generate" || *arg == "-g" {
            generate = true;
            continue;
        }
        let (name, value) = arg
            .split_once('=')
            .ok_or_else(|| anyhow!("Expected field=value, got '{arg}'"))?;
        if !ATTRIBUTES.iter().any(|a| *a == name) {
            return Err(anyhow!(
                "Unknown field '{name}'. Fields: {}",
                ATTRIBUTES.join(", ")
            ));
        }
        fields.push((name.to_string(), value.to_string()));
    }
    Ok((fields, generate))
}

fn parse_generate(args: &[&str]) -> Result<Command> {
    let mut length = DEFAULT_LENGTH;
    let mut groups = CharGroups::none();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match *arg {
            "-n" | "--num" => {
                let n = iter.next().ok_or_else(|| anyhow!("-n requires a number"))?;
                length = n.parse().map_err(|_| anyhow!("Invalid length: {n}"))?;
            }
            "-l" | "--lower" => groups.lower = true,
            "-u" | "--upper" => groups.upper = true,
            "-d" | "--digit" => groups.digits = true,
            "-p" | "--punct" => groups.punct = true,
            "-s" | "--special" => {
                let chars = iter.next().ok_or_else(|| anyhow!("-s requires characters"))?;
                groups.extra = chars.to_string();
            }
            other => return Err(anyhow!("Unknown generator option: {other}")),
        }
    }
    if groups == CharGroups::none() {
        groups = CharGroups::default();
    }
    Ok(Command::Generate { length, groups })
}

fn print_usage(bin_name: &str) {
    eprintln!("Usage: {bin_name} [--config PATH] <COMMAND>");
    eprintln!("  init                          Create configuration and key");
    eprintln!("  list [QUERY]                  List entries matching QUERY");
    eprintln!("  show N [--reveal]             Show all fields of entry N");
    eprintln!("  add [FIELD=VALUE ...] [-g]    Add an entry (-g generates a password)");
    eprintln!("  edit N FIELD=VALUE ... [-g]   Change fields of entry N");
    eprintln!("  rm N ...                      Delete entries");
    eprintln!("  tags                          List tags with entry counts");
    eprintln!("  gen [-n N] [-l] [-u] [-d] [-p] [-s CHARS]");
    eprintln!("                                Generate a random password");
    eprintln!("  backups                       List backups of the passwords file");
    eprintln!("  -V, --version                 Show version and exit");
    eprintln!("Fields: {}", ATTRIBUTES.join(", "));
}

fn executable_name() -> String {
    std::env::args()
        .next()
        .and_then(|p| {
            std::path::Path::new(&p)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "pwdmgr".to_string())
}
