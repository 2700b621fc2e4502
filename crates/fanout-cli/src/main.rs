//! CLI de operación sobre el store Postgres:
//!
//! ```text
//! fanout-cli resend   --tenant <T> --user <U> --from <RFC3339>
//! fanout-cli backfill --tenant <T> --user <U>
//! fanout-cli flush    --tenant <T> --user <U>
//! fanout-cli block    (--tenant <T> | --global) --user <U>
//! fanout-cli unblock  --tenant <T> --user <U>
//! fanout-cli mute     --tenant <T> --user <U> --hours <H>
//! ```
//!
//! Códigos de salida: 0 ok, 2 uso incorrecto, 4 rechazado, 5 error de
//! backend.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fanout_core::{CatchupEngine, EligibilityGate, FanoutConfig, FanoutError, LoggingTransport, Moderation,
                  SharedStore, MAX_MUTE_HOURS};
use fanout_persistence::PgFanoutStore;
use log::error;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Resend { tenant: String, user: String, from: DateTime<Utc> },
    Backfill { tenant: String, user: String },
    Flush { tenant: String, user: String },
    Block { tenant: Option<String>, user: String },
    Unblock { tenant: String, user: String },
    Mute { tenant: String, user: String, hours: u32 },
}

#[derive(Debug, Default)]
struct Flags {
    tenant: Option<String>,
    user: Option<String>,
    from: Option<String>,
    hours: Option<String>,
    global: bool,
}

fn parse_flags(args: &[String]) -> Result<Flags, String> {
    let mut flags = Flags::default();
    let mut i = 0;
    while i < args.len() {
        let slot = match args[i].as_str() {
            "--global" => {
                flags.global = true;
                i += 1;
                continue;
            }
            "--tenant" => &mut flags.tenant,
            "--user" => &mut flags.user,
            "--from" => &mut flags.from,
            "--hours" => &mut flags.hours,
            other => return Err(format!("unknown flag {other}")),
        };
        i += 1;
        match args.get(i) {
            Some(v) => *slot = Some(v.clone()),
            None => return Err(format!("missing value for {}", args[i - 1])),
        }
        i += 1;
    }
    Ok(flags)
}

fn required(v: Option<String>, name: &str) -> Result<String, String> {
    v.ok_or_else(|| format!("--{name} is required"))
}

fn parse_command(args: &[String]) -> Result<Command, String> {
    let (name, rest) = args.split_first().ok_or("missing subcommand")?;
    let f = parse_flags(rest)?;
    match name.as_str() {
        "resend" => {
            let from = required(f.from, "from")?;
            let from = DateTime::parse_from_rfc3339(&from).map_err(|e| format!("invalid --from: {e}"))?
                                                          .with_timezone(&Utc);
            Ok(Command::Resend { tenant: required(f.tenant, "tenant")?, user: required(f.user, "user")?, from })
        }
        "backfill" => Ok(Command::Backfill { tenant: required(f.tenant, "tenant")?, user: required(f.user, "user")? }),
        "flush" => Ok(Command::Flush { tenant: required(f.tenant, "tenant")?, user: required(f.user, "user")? }),
        "block" => {
            let tenant = if f.global { None } else { Some(required(f.tenant, "tenant")?) };
            Ok(Command::Block { tenant, user: required(f.user, "user")? })
        }
        "unblock" => Ok(Command::Unblock { tenant: required(f.tenant, "tenant")?, user: required(f.user, "user")? }),
        "mute" => {
            let hours = required(f.hours, "hours")?.parse::<u32>()
                                                   .map_err(|e| format!("invalid --hours: {e}"))?;
            if hours > MAX_MUTE_HOURS {
                return Err(format!("invalid --hours: at most {MAX_MUTE_HOURS}"));
            }
            Ok(Command::Mute { tenant: required(f.tenant, "tenant")?, user: required(f.user, "user")?, hours })
        }
        other => Err(format!("unknown subcommand {other}")),
    }
}

async fn execute(cmd: Command, store: SharedStore) -> Result<String, FanoutError> {
    let config = FanoutConfig::default();
    let gate = Arc::new(EligibilityGate::new(store.clone()));
    let catchup = CatchupEngine::new(store.clone(),
                                     Arc::new(LoggingTransport),
                                     config.backfill_count,
                                     config.catchup_max_rounds);
    let moderation = Moderation::new(store, gate);
    Ok(match cmd {
        Command::Resend { tenant, user, from } => {
            let rounds = catchup.catch_up_from(&tenant, &user, from).await?;
            format!("resend: tenant={tenant} user={user} rounds={rounds}")
        }
        Command::Backfill { tenant, user } => {
            let sent = catchup.backfill_latest(&tenant, &user).await?;
            format!("backfill: tenant={tenant} user={user} sent={sent}")
        }
        Command::Flush { tenant, user } => {
            let sent = catchup.flush_standalone(&tenant, &user).await?;
            format!("flush: tenant={tenant} user={user} sent={sent}")
        }
        Command::Block { tenant: Some(tenant), user } => {
            let recalled = moderation.block_member(&tenant, &user).await?;
            format!("block: tenant={tenant} user={user} recalled={recalled}")
        }
        Command::Block { tenant: None, user } => {
            moderation.block_globally(&user).await?;
            format!("block: global user={user}")
        }
        Command::Unblock { tenant, user } => {
            moderation.unblock_member(&tenant, &user).await?;
            format!("unblock: tenant={tenant} user={user}")
        }
        Command::Mute { tenant, user, hours } => {
            moderation.mute_member(&tenant, &user, hours).await?;
            format!("mute: tenant={tenant} user={user} hours={hours}")
        }
    })
}

fn exit_code(e: &FanoutError) -> i32 {
    match e {
        FanoutError::UnknownMember { .. }
        | FanoutError::UnknownTenant(_)
        | FanoutError::InvalidLevel(_)
        | FanoutError::InvalidMute { .. } => 4,
        _ => 5,
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cmd = match parse_command(&args) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("[fanout-cli] {msg}");
            std::process::exit(2);
        }
    };

    let pool = match tokio::task::spawn_blocking(fanout_persistence::build_dev_pool_from_env).await {
        Ok(Ok(p)) => p,
        Ok(Err(e)) => {
            eprintln!("[fanout-cli] pool error: {e}");
            std::process::exit(5);
        }
        Err(e) => {
            eprintln!("[fanout-cli] pool task failed: {e}");
            std::process::exit(5);
        }
    };
    let store: SharedStore = Arc::new(PgFanoutStore::from_pool(pool));

    match execute(cmd, store).await {
        Ok(summary) => println!("{summary}"),
        Err(e) => {
            error!("cli:failed err={e}");
            std::process::exit(exit_code(&e));
        }
    }
}
