use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use fuzzy_core::{
    consts::{BUCKETS, DEFAULT_EXPIRE_SECS, DEFAULT_LISTEN},
    persist::read_records,
    utils::{now_secs, parse_duration},
    Command, Digest, Opcode, Reply, StoredRecord,
};

#[derive(Parser)]
#[command(name = "fuzzy", about = "Fuzzy storage client and record-file tools")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Args)]
struct HashArgs {
    #[arg(long, default_value = DEFAULT_LISTEN)]
    addr: String,
    #[arg(long)]
    block_size: u32,
    /// Digest as text (at most 64 bytes)
    #[arg(long, conflicts_with = "hash_hex", required_unless_present = "hash_hex")]
    hash: Option<String>,
    /// Digest as hex
    #[arg(long)]
    hash_hex: Option<String>,
    /// Socket timeout, e.g. 5s
    #[arg(long, default_value = "5s")]
    timeout: String,
}

#[derive(Subcommand)]
enum Cmd {
    /// Ask whether a similar hash is stored
    Check(HashArgs),
    /// Store a hash
    Write(HashArgs),
    /// Delete every stored hash similar to this one
    Delete(HashArgs),
    /// Summarize a record file
    Info {
        #[arg(long)]
        file: PathBuf,
        /// Expiry used to count stale records
        #[arg(long)]
        expire: Option<String>,
    },
    /// Print every record of a record file
    Dump {
        #[arg(long)]
        file: PathBuf,
    },
}

fn digest_from(args: &HashArgs) -> Result<Digest> {
    let bytes = match (&args.hash, &args.hash_hex) {
        (Some(s), None) => s.as_bytes().to_vec(),
        (None, Some(h)) => hex::decode(h)?,
        _ => bail!("exactly one of --hash or --hash-hex is required"),
    };
    Ok(Digest::from_pattern(args.block_size, &bytes)?)
}

fn send(op: Opcode, args: &HashArgs) -> Result<Reply> {
    let cmd = Command::new(op, digest_from(args)?);
    let timeout = parse_duration(&args.timeout)?;
    let mut stream =
        TcpStream::connect(&args.addr).with_context(|| format!("connect {}", args.addr))?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    stream.write_all(&cmd.encode())?;
    let mut line = Vec::new();
    stream.read_to_end(&mut line)?;
    Reply::parse(&line).ok_or_else(|| {
        anyhow!("unexpected reply: {:?}", String::from_utf8_lossy(&line))
    })
}

fn load_file(path: &Path) -> Result<(Vec<StoredRecord>, usize)> {
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut recs = Vec::new();
    let report = read_records(f, |r| recs.push(r))?;
    Ok((recs, report.trailing_garbage))
}

fn render_time(ts: u64) -> String {
    let fmt = time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    i64::try_from(ts)
        .ok()
        .and_then(|t| time::OffsetDateTime::from_unix_timestamp(t).ok())
        .and_then(|t| t.format(fmt).ok())
        .unwrap_or_else(|| ts.to_string())
}

fn info(file: &Path, expire: Option<String>) -> Result<()> {
    let expire = match expire {
        Some(e) => parse_duration(&e)?,
        None => Duration::from_secs(DEFAULT_EXPIRE_SECS),
    };
    let (recs, garbage) = load_file(file)?;
    let now = now_secs();
    let stale = recs.iter().filter(|r| r.age(now) >= expire.as_secs()).count();
    let mut by_size: BTreeMap<u32, usize> = BTreeMap::new();
    for r in &recs {
        *by_size.entry(r.digest.block_size).or_default() += 1;
    }
    let buckets: std::collections::HashSet<usize> = recs.iter().map(|r| r.digest.bucket()).collect();

    println!("file: {}", file.display());
    println!("records: {}", recs.len());
    println!("buckets used: {}/{}", buckets.len(), BUCKETS);
    println!("trailing garbage: {garbage} bytes");
    println!("expired (>= {}s): {stale}", expire.as_secs());
    for (bs, n) in by_size {
        println!("  block_size {bs}: {n}");
    }
    Ok(())
}

fn dump(file: &Path) -> Result<()> {
    let (recs, garbage) = load_file(file)?;
    for r in &recs {
        println!(
            "{}\t{}\t{}",
            r.digest.block_size,
            render_time(r.inserted_at),
            String::from_utf8_lossy(r.digest.pattern())
        );
    }
    if garbage > 0 {
        eprintln!("warning: {garbage} trailing bytes ignored");
    }
    Ok(())
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let (op, args) = match cli.cmd {
        Cmd::Check(a) => (Opcode::Check, a),
        Cmd::Write(a) => (Opcode::Write, a),
        Cmd::Delete(a) => (Opcode::Delete, a),
        Cmd::Info { file, expire } => {
            info(&file, expire)?;
            return Ok(ExitCode::SUCCESS);
        }
        Cmd::Dump { file } => {
            dump(&file)?;
            return Ok(ExitCode::SUCCESS);
        }
    };
    match send(op, &args)? {
        Reply::Ok => {
            println!("OK");
            Ok(ExitCode::SUCCESS)
        }
        Reply::Err => {
            println!("ERR");
            Ok(ExitCode::from(1))
        }
    }
}
