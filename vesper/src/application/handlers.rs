use std::io::{self, BufRead, Write};

use tracing::{info, warn};
use vesper_core::repo::MetadataStore;
use vesper_core::secret::{Alphabet, alphabet_names, generate_secret};
use vesper_core::stats::{RestoreSummary, StoreSummary};
use vesper_core::{
    Backend, Config, MasterKey, Result, VesperError, list, open_index, purge, restore, store,
    verify,
};
use zeroize::Zeroizing;

fn prompt_passphrase(confirm: bool) -> Result<Zeroizing<String>> {
    let pass = Zeroizing::new(rpassword::prompt_password("Passphrase: ")?);
    if pass.is_empty() {
        return Err(VesperError::config("passphrase must not be empty"));
    }
    if confirm {
        let again = Zeroizing::new(rpassword::prompt_password("Confirm passphrase: ")?);
        if *again != *pass {
            return Err(VesperError::config("passphrases do not match"));
        }
    }
    Ok(pass)
}

fn open(cfg: &Config) -> Result<Box<dyn MetadataStore>> {
    open_index(Backend::Sqlite(cfg.paths.index.clone()))
}

/// Run `f` against an open index and close it whatever the outcome.
fn with_index<T>(cfg: &Config, f: impl FnOnce(&dyn MetadataStore) -> Result<T>) -> Result<T> {
    let index = open(cfg)?;
    let out = f(index.as_ref());
    settle(out, index.close())
}

/// The run's own error wins over a failed close.
fn settle<T>(out: Result<T>, closed: Result<()>) -> Result<T> {
    match (out, closed) {
        (Ok(v), Ok(())) => Ok(v),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close)) => {
            warn!(error = %close, "index close failed");
            Err(e)
        }
    }
}

fn print_store(s: &StoreSummary) {
    println!(
        "stored {} files, {} directories, {} chunks, {} bytes; {} ignored, {} failed",
        s.files,
        s.dirs,
        s.chunks,
        s.bytes,
        s.ignored,
        s.failed.len()
    );
    for f in &s.failed {
        println!("  failed: {}: {}", f.name, f.reason);
    }
}

fn print_restore(verb: &str, s: &RestoreSummary) {
    println!(
        "{verb} {} files, {} directories, {} bytes; {} excluded, {} failed",
        s.files,
        s.dirs,
        s.bytes,
        s.excluded,
        s.failed.len()
    );
    for f in &s.failed {
        println!("  failed: {}: {}", f.name, f.reason);
    }
}

pub fn handle_store(cfg: &Config) -> Result<()> {
    let pass = prompt_passphrase(true)?;
    let master = MasterKey::derive(&pass, &cfg.kdf)?;
    info!(input = %cfg.paths.input.display(), output = %cfg.paths.output.display(), "store");
    let summary = with_index(cfg, |index| {
        store(
            &cfg.paths.input,
            &cfg.paths.output,
            index,
            &master,
            &cfg.engine,
        )
    })?;
    print_store(&summary);
    Ok(())
}

pub fn handle_restore(cfg: &Config) -> Result<()> {
    let pass = prompt_passphrase(false)?;
    let master = MasterKey::derive(&pass, &cfg.kdf)?;
    info!(dest = %cfg.paths.restore.display(), "restore");
    let summary = with_index(cfg, |index| {
        restore(
            index,
            &cfg.paths.output,
            &cfg.paths.restore,
            &master,
            &cfg.engine,
        )
    })?;
    print_restore("restored", &summary);
    Ok(())
}

pub fn handle_verify(cfg: &Config) -> Result<()> {
    let pass = prompt_passphrase(false)?;
    let master = MasterKey::derive(&pass, &cfg.kdf)?;
    let summary =
        with_index(cfg, |index| verify(index, &cfg.paths.output, &master, &cfg.engine))?;
    print_restore("verified", &summary);
    if summary.failed.is_empty() {
        Ok(())
    } else {
        Err(VesperError::integrity(format!(
            "{} records failed verification",
            summary.failed.len()
        )))
    }
}

pub fn handle_list(cfg: &Config) -> Result<()> {
    let rows = with_index(cfg, list)?;
    for r in rows {
        let kind = if r.is_dir { "dir " } else { "file" };
        println!(
            "{:>6}  {kind}  chunks={:<6} created={}  {}",
            r.id, r.chunks, r.created_at, r.name
        );
    }
    Ok(())
}

pub fn handle_purge(cfg: &Config, name: &str) -> Result<()> {
    let pass = prompt_passphrase(false)?;
    let master = MasterKey::derive(&pass, &cfg.kdf)?;
    let removed = with_index(cfg, |index| purge(index, &cfg.paths.output, &master, name))?;
    println!("purged {removed} records");
    Ok(())
}

pub fn handle_secret(
    length: usize,
    alphabets: Vec<String>,
    chars: Option<String>,
    list_alphabets: bool,
) -> Result<()> {
    if list_alphabets {
        for name in alphabet_names() {
            println!("{name}");
        }
        return Ok(());
    }
    let alphabet = match chars {
        Some(set) => Alphabet::Explicit(set.chars().collect()),
        None if alphabets.is_empty() => Alphabet::named(vesper_core::secret::DEFAULT_ALPHABETS),
        None => Alphabet::Named(alphabets),
    };
    let secret = generate_secret(length, &alphabet.characters()?)?;
    println!("{}", secret.as_str());
    Ok(())
}

/// The two-mode prompt: `s` stores, `r` retrieves.
pub fn handle_interactive(cfg: &Config) -> Result<()> {
    print!("Store / Retrieve? [s/r] ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    match line.trim().to_ascii_lowercase().as_str() {
        "s" | "store" => handle_store(cfg),
        "r" | "retrieve" | "restore" => handle_restore(cfg),
        other => Err(VesperError::config(format!("unknown mode: {other:?}"))),
    }
}
