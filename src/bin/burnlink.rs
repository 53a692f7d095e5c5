//! Burnlink client CLI
//!
//! Usage:
//!   burnlink passphrase [--words N] [--wordlist FILE]
//!   burnlink strength <PASSPHRASE>
//!   burnlink seal   --passphrase-env VAR   < plaintext   > create-request.json
//!   burnlink unseal --passphrase-env VAR   < reveal.json > plaintext
//!
//! Passphrases are read from an environment variable so they never show up
//! in the process list.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use burnlink_envelope::{seal, unseal, Envelope, PassphraseGenerator, DEFAULT_WORD_COUNT};

#[derive(Parser)]
#[command(name = "burnlink", version)]
#[command(about = "Client-side tooling for one-time secret links", long_about = None)]
struct Cli {
    /// Passphrase corpus, one word per line (defaults to the bundled list)
    #[arg(long, global = true, env = "BURNLINK_WORDLIST", value_name = "FILE")]
    wordlist: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a passphrase from the bundled word corpus
    Passphrase {
        /// Number of words
        #[arg(short, long, default_value_t = DEFAULT_WORD_COUNT)]
        words: usize,
    },

    /// Estimate the strength of a passphrase
    Strength { passphrase: String },

    /// Encrypt stdin and print an end-to-end create request
    Seal {
        /// Environment variable holding the passphrase
        #[arg(long, value_name = "VAR")]
        passphrase_env: String,
    },

    /// Decrypt a reveal response read from stdin
    Unseal {
        /// Environment variable holding the passphrase
        #[arg(long, value_name = "VAR")]
        passphrase_env: String,
    },
}

#[derive(Serialize)]
struct SealOutput<'a> {
    ciphertext: &'a str,
    salt: &'a str,
    nonce: &'a str,
}

#[derive(Deserialize)]
struct RevealBody {
    payload: Option<String>,
    e2ee: Option<E2eeFields>,
}

#[derive(Deserialize)]
struct E2eeFields {
    salt: String,
    nonce: String,
}

fn passphrase_from(var: &str) -> Result<Zeroizing<String>> {
    let value = std::env::var(var)
        .map(Zeroizing::new)
        .with_context(|| format!("environment variable {var} is not set"))?;
    if value.is_empty() {
        bail!("environment variable {var} is empty");
    }
    Ok(value)
}

fn read_stdin() -> Result<Zeroizing<Vec<u8>>> {
    let mut buf = Zeroizing::new(Vec::new());
    io::stdin().read_to_end(&mut buf).context("reading stdin")?;
    Ok(buf)
}

fn generator(wordlist: Option<&Path>) -> Result<PassphraseGenerator> {
    Ok(match wordlist {
        Some(path) => PassphraseGenerator::from_path(path)
            .with_context(|| format!("loading wordlist {}", path.display()))?,
        None => PassphraseGenerator::bundled()?,
    })
}

fn cmd_passphrase(wordlist: Option<&Path>, words: usize) -> Result<()> {
    if words == 0 {
        bail!("--words must be at least 1");
    }
    let generator = generator(wordlist)?;
    let passphrase = Zeroizing::new(generator.generate(words));
    let strength = generator.strength_of(&passphrase);
    println!("{}", passphrase.as_str());
    eprintln!("strength: {} ({:.1} bits)", strength.label, strength.entropy_bits);
    Ok(())
}

fn cmd_strength(wordlist: Option<&Path>, passphrase: &str) -> Result<()> {
    let strength = generator(wordlist)?.strength_of(passphrase);
    println!("{} {:.1}", strength.label, strength.entropy_bits);
    Ok(())
}

fn cmd_seal(var: &str) -> Result<()> {
    let passphrase = passphrase_from(var)?;
    let plaintext = read_stdin()?;
    if plaintext.is_empty() {
        bail!("nothing to seal on stdin");
    }
    let envelope = seal(&plaintext, &passphrase)?;
    let out = SealOutput {
        ciphertext: &envelope.ciphertext,
        salt: &envelope.salt,
        nonce: &envelope.nonce,
    };
    println!("{}", serde_json::to_string(&out)?);
    Ok(())
}

fn cmd_unseal(var: &str) -> Result<()> {
    let passphrase = passphrase_from(var)?;
    let input = read_stdin()?;
    let body: RevealBody = serde_json::from_slice(&input).context("reveal response is not JSON")?;
    let (ciphertext, e2ee) = match (body.payload, body.e2ee) {
        (Some(payload), Some(e2ee)) => (payload, e2ee),
        (Some(_), None) => bail!("secret is not end-to-end encrypted, nothing to unseal"),
        _ => bail!("link was already used, expired or never existed"),
    };
    let envelope = Envelope {
        salt: e2ee.salt,
        nonce: e2ee.nonce,
        ciphertext,
    };
    let plaintext = unseal(&envelope, &passphrase)?;
    let mut stdout = io::stdout().lock();
    stdout.write_all(&plaintext)?;
    stdout.flush()?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let wordlist = cli.wordlist.as_deref();
    let result = match cli.command {
        Command::Passphrase { words } => cmd_passphrase(wordlist, words),
        Command::Strength { passphrase } => cmd_strength(wordlist, &passphrase),
        Command::Seal { passphrase_env } => cmd_seal(&passphrase_env),
        Command::Unseal { passphrase_env } => cmd_unseal(&passphrase_env),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
