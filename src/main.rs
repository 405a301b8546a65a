use std::env;

use clap::{Parser, Subcommand};
use flexi_logger::{FileSpec, Logger};
use log::{error, info};

use hustbox::config::SandboxArgs;
use hustbox::error::{SandboxError, SandboxExit};
use hustbox::utils::default_format;
use hustbox::verdict::VERDICT_FD;
use hustbox::{shim, supervisor};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
  #[command(about = "Supervise one sandboxed run and report the verdict on fd 3")]
  Sandbox(SandboxArgs),

  #[command(about = "In-namespace setup shim that becomes the user program (internal)")]
  Child(SandboxArgs),
}

fn bootstrap() -> Result<(), SandboxError> {
  Logger::try_with_str("hustbox=info")?
    .log_to_file(
      FileSpec::default()
        .directory(env::var("HUSTBOX_LOG").unwrap_or("./logs/".into()))
        .basename("hustbox")
        .discriminant(format!(
          "{}",
          chrono::offset::Local::now().format("%Y-%m-%d")
        ))
        .suppress_timestamp(),
    )
    .append()
    .format_for_files(default_format)
    .start()?;

  let cli = Cli::parse();
  match cli.command {
    Commands::Sandbox(args) => {
      info!("Start supervising solution {}: {}", args.sid, args.command);
      let verdict = supervisor::run(&args)?;
      info!("Verdict: {:?}", verdict);
      verdict.write_to(VERDICT_FD)
    }
    Commands::Child(args) => {
      info!("Start shim (pid = {})", std::process::id());
      shim::child_main(&args)
    }
  }
}

fn main() -> SandboxExit {
  match bootstrap() {
    Ok(_) => SandboxExit::Ok,
    Err(err) => {
      error!("Sandbox run fails: {}", err);
      SandboxExit::Err(err)
    }
  }
}
