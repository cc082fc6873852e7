//! Crypto bridge command line
//!
//! Drives the bridge the way a scripting runtime would: every command creates
//! a runtime, calls module functions and host object methods, and awaits the
//! promises they return. Output is JSON on stdout.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crypto_bridge::config::{get_settings_path, Settings};
use crypto_bridge::keys;
use crypto_bridge::password::{self, KdfParams, DEFAULT_ITERATIONS};
use crypto_bridge::{ScriptRuntime, Value};

/// Native crypto bridge
#[derive(Parser, Debug)]
#[command(name = "crypto-bridge")]
#[command(version, about = "Exercise native crypto host objects through the dispatch bridge")]
struct Args {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, env = "CRYPTO_BRIDGE_DEBUG")]
    debug: bool,

    /// Worker threads in the dispatch pool
    #[arg(short, long, global = true, env = "CRYPTO_BRIDGE_WORKERS")]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(flatten)]
    Session(SessionCommand),

    /// Write a settings file with default values
    InitConfig,
}

/// Commands that run against a script runtime
#[derive(Subcommand, Debug)]
enum SessionCommand {
    /// List supported curves, ciphers and hashes
    Curves,

    /// Run a two-party key agreement
    Ecdh {
        /// Curve name (defaults to the configured curve)
        #[arg(long)]
        curve: Option<String>,
    },

    /// Generate a key pair as base64 PEM documents
    Keygen {
        /// Curve name (defaults to the configured curve)
        #[arg(long)]
        curve: Option<String>,
    },

    /// Derive the public key for a base64 PEM private key
    ImportKey {
        #[arg(long, env = "CRYPTO_BRIDGE_PRIVATE_KEY")]
        private_key: String,
    },

    /// Seal text under a password
    Encrypt {
        #[arg(long, env = "CRYPTO_BRIDGE_PASSWORD")]
        password: String,

        /// Plaintext
        #[arg(long)]
        data: String,

        #[command(flatten)]
        kdf: KdfArgs,
    },

    /// Open a sealed message
    Decrypt {
        #[arg(long, env = "CRYPTO_BRIDGE_PASSWORD")]
        password: String,

        /// Base64 ciphertext
        #[arg(long)]
        data: String,

        #[command(flatten)]
        kdf: KdfArgs,
    },
}

#[derive(clap::Args, Debug)]
struct KdfArgs {
    /// PBKDF2 salt
    #[arg(long)]
    salt: Option<String>,

    /// PBKDF2 iterations
    #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
    iterations: u32,
}

impl KdfArgs {
    fn params(&self) -> KdfParams {
        let mut params = KdfParams {
            iterations: self.iterations,
            ..KdfParams::default()
        };
        if let Some(salt) = &self.salt {
            params.salt = salt.as_bytes().to_vec();
        }
        params
    }
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .unwrap_or_default()
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

fn expect_string(value: Value, what: &str) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        other => anyhow::bail!("{} returned {} instead of a string", what, other.type_name()),
    }
}

/// Two-party agreement: both sides generate keys off-thread, then derive the secret
fn run_ecdh(rt: &mut ScriptRuntime, curve: &str) -> Result<serde_json::Value> {
    let params = Value::object([("curve_name", Value::from(curve))]);
    let alice = rt.call("createECDH", std::slice::from_ref(&params))?;
    let bob = rt.call("createECDH", &[params])?;

    let alice_pending = rt.call_method(&alice, "generateKeysAsync", &[Value::from("hex")])?;
    let bob_pending = rt.call_method(&bob, "generateKeysAsync", &[Value::from("hex")])?;
    let alice_public = expect_string(rt.await_promise(&alice_pending)?, "generateKeysAsync")?;
    let bob_public = expect_string(rt.await_promise(&bob_pending)?, "generateKeysAsync")?;

    let hex = Value::from("hex");
    let alice_secret = rt.call_method(
        &alice,
        "computeSecretAsync",
        &[Value::from(bob_public.as_str()), hex.clone(), hex.clone()],
    )?;
    let bob_secret = rt.call_method(
        &bob,
        "computeSecretAsync",
        &[Value::from(alice_public.as_str()), hex.clone(), hex],
    )?;
    let alice_secret = expect_string(rt.await_promise(&alice_secret)?, "computeSecretAsync")?;
    let bob_secret = expect_string(rt.await_promise(&bob_secret)?, "computeSecretAsync")?;

    let curve_name = rt.get_property(&alice, "curve")?;
    Ok(json!({
        "curve": curve_name.as_str().unwrap_or(curve),
        "alice_public_key": alice_public,
        "bob_public_key": bob_public,
        "secret_bytes": alice_secret.len() / 2,
        "secrets_match": alice_secret == bob_secret,
    }))
}

/// Execute one command on a fresh runtime
fn run_session(settings: Settings, command: SessionCommand) -> Result<serde_json::Value> {
    let mut rt = ScriptRuntime::new(&settings).context("Failed to start script runtime")?;

    let output = match command {
        SessionCommand::Curves => {
            let curves = rt.call("getCurves", &[])?;
            let ciphers = rt.call("getCiphers", &[])?;
            let hashes = rt.call("getHashes", &[])?;
            json!({
                "curves": string_list(&curves),
                "ciphers": string_list(&ciphers),
                "hashes": string_list(&hashes),
            })
        }
        SessionCommand::Ecdh { curve } => {
            let curve = curve.unwrap_or_else(|| settings.default_curve.clone());
            run_ecdh(&mut rt, &curve)?
        }
        SessionCommand::Keygen { curve } => {
            let curve = curve.unwrap_or_else(|| settings.default_curve.clone());
            serde_json::to_value(keys::generate_key_pair(&mut rt, &curve)?)?
        }
        SessionCommand::ImportKey { private_key } => {
            serde_json::to_value(keys::import_private_key(&mut rt, &private_key)?)?
        }
        SessionCommand::Encrypt {
            password,
            data,
            kdf,
        } => {
            let sealed = password::seal(&mut rt, &password, &data, &kdf.params())?;
            json!({ "ciphertext": sealed })
        }
        SessionCommand::Decrypt {
            password,
            data,
            kdf,
        } => {
            let plain = password::open(&mut rt, &password, &data, &kdf.params())?;
            json!({ "plaintext": plain })
        }
    };

    let stats = rt.stats();
    let queue = rt.queue_stats();
    tracing::debug!(
        host_objects = stats.host_objects_created,
        promises = stats.promises_created,
        deliveries = stats.deliveries_run,
        work_items = queue.completed,
        "Session finished"
    );
    rt.shutdown();

    Ok(output)
}

/// `RUST_LOG` wins; otherwise the `--debug` flag picks the level
fn log_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging before settings load so its warnings are kept
    tracing_subscriber::registry()
        .with(log_filter(args.debug))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting crypto bridge");

    let mut settings = Settings::load(args.config.as_deref()).await?;
    if let Some(workers) = args.workers {
        settings.worker_threads = workers;
    }
    settings.debug |= args.debug;
    settings.normalize();

    let command = match args.command {
        Command::InitConfig => {
            let path = args.config.clone().unwrap_or_else(get_settings_path);
            settings.save_to(&path).await?;
            println!("{}", json!({ "written": path.display().to_string() }));
            return Ok(());
        }
        Command::Session(command) => command,
    };

    tracing::debug!(workers = settings.worker_threads, "Settings loaded");

    // The runtime blocks its own thread while awaiting promises.
    let output = tokio::task::spawn_blocking(move || run_session(settings, command))
        .await
        .context("Runtime thread panicked")??;

    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("Failed to serialize output")?
    );

    Ok(())
}
