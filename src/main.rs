use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use staging_core::{
    string_to_sha1, to_file_system_safe_name, AccessibilityProber, ArchiveCodec, FolderGuard,
    StagingFolder, StagingSettings,
};

#[derive(Parser)]
#[command(name = "dama-staging")]
#[command(about = "Staging folder safety tools for data transfer services")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that a path (or its nearest existing ancestor) is readable and writable
    Probe {
        path: PathBuf,
        /// Maximum wait in milliseconds (raised to at least 1000)
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
    },
    /// Restrict a folder to the current user
    Lock { dir: PathBuf },
    /// Grant group access to a folder
    Open { dir: PathBuf },
    /// Change the group of a folder recursively
    Chgrp {
        dir: PathBuf,
        /// Numeric or symbolic group
        group: String,
    },
    /// Pack the content of a directory into a zip archive
    Pack { dir: PathBuf, archive: PathBuf },
    /// Unpack a zip archive
    Unpack {
        archive: PathBuf,
        dest: PathBuf,
        /// Delete the archive after successful extraction
        #[arg(long)]
        delete: bool,
    },
    /// Replace the data folder of a staging folder with a single archive
    Bundle { root: PathBuf, object_id: String },
    /// Encrypt a secret with the global secret
    Encrypt {
        text: String,
        /// Override the configured global secret
        #[arg(long)]
        secret: Option<String>,
    },
    /// Decrypt a secret with the global secret
    Decrypt {
        text: String,
        /// Override the configured global secret
        #[arg(long)]
        secret: Option<String>,
    },
    /// Print the double SHA-1 of a string
    Sha1 { text: String },
    /// Print the file-system safe form of a name
    SafeName {
        name: String,
        /// Keep '/' and '\' unencoded
        #[arg(long)]
        keep_dir_separators: bool,
    },
    /// Print the effective settings as JSON
    Settings,
}

/// Entry point for the staging tools.
///
/// Settings are read from the environment (and a `.env` file, if present) once at
/// startup. Logging is controlled through `RUST_LOG`.
fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(with_default_directives(EnvFilter::from_default_env())?)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let settings = StagingSettings::from_lookup(|key| std::env::var(key).ok())
        .context("invalid staging settings")?;
    tracing::debug!("Resolved settings: {:?}", settings);

    let command = cli.command.name();
    if let Err(e) = run(cli.command, settings) {
        tracing::error!("Command '{}' failed: {:#}", command, e);
        return Err(e);
    }
    Ok(())
}

fn run(command: Commands, settings: StagingSettings) -> anyhow::Result<()> {
    match command {
        Commands::Probe { path, timeout_ms } => {
            let probe = AccessibilityProber::probe(&path, Duration::from_millis(timeout_ms));
            match probe.resolved_ancestor() {
                Some(ancestor) => println!(
                    "{}: {} (checked {})",
                    probe.target().display(),
                    reachability(probe.is_reachable()),
                    ancestor.display()
                ),
                None => println!(
                    "{}: {}",
                    probe.target().display(),
                    reachability(probe.is_reachable())
                ),
            }
            if !probe.is_reachable() {
                bail!("{} is not accessible", path.display());
            }
        }
        Commands::Lock { dir } => {
            if !FolderGuard::new(&settings).lock(&dir) {
                bail!("failed to lock {}", dir.display());
            }
            println!("Locked {}", dir.display());
        }
        Commands::Open { dir } => {
            if !FolderGuard::new(&settings).open(&dir) {
                bail!("failed to open {}", dir.display());
            }
            println!("Opened {}", dir.display());
        }
        Commands::Chgrp { dir, group } => {
            if !FolderGuard::new(&settings).change_group(&dir, &group) {
                bail!("failed to change group of {} to {}", dir.display(), group);
            }
            println!("Changed group of {} to {}", dir.display(), group);
        }
        Commands::Pack { dir, archive } => {
            ArchiveCodec::pack_directory(&dir, &archive)
                .with_context(|| format!("failed to pack {}", dir.display()))?;
            println!("Packed {} into {}", dir.display(), archive.display());
        }
        Commands::Unpack {
            archive,
            dest,
            delete,
        } => {
            if !ArchiveCodec::unpack(&archive, &dest, delete) {
                bail!("failed to unpack {}", archive.display());
            }
            println!("Unpacked {} into {}", archive.display(), dest.display());
        }
        Commands::Bundle { root, object_id } => {
            let bundle = StagingFolder::open(root).bundle_data(&object_id)?;
            tracing::info!("Bundle for '{}' written", object_id);
            println!("{}", bundle.display());
        }
        Commands::Encrypt { text, secret } => {
            let cipher = cipher_settings(settings, secret).secret_cipher()?;
            match cipher.encrypt(Some(&text)) {
                Some(encrypted) => println!("{}", encrypted),
                None => bail!("nothing to encrypt"),
            }
        }
        Commands::Decrypt { text, secret } => {
            let cipher = cipher_settings(settings, secret).secret_cipher()?;
            match cipher.decrypt(Some(&text))? {
                Some(decrypted) => println!("{}", decrypted),
                None => bail!("nothing to decrypt"),
            }
        }
        Commands::Sha1 { text } => println!("{}", string_to_sha1(&text)),
        Commands::SafeName {
            name,
            keep_dir_separators,
        } => println!("{}", to_file_system_safe_name(&name, keep_dir_separators)),
        Commands::Settings => println!("{}", serde_json::to_string_pretty(&settings)?),
    }

    Ok(())
}

/// Adds `info` directives for this binary and every staging crate.
fn with_default_directives(
    filter: EnvFilter,
) -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
    Ok(filter
        .add_directive("dama_staging=info".parse()?)
        .add_directive("staging_core=info".parse()?)
        .add_directive("staging_files=info".parse()?)
        .add_directive("staging_cipher=info".parse()?))
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Probe { .. } => "probe",
            Commands::Lock { .. } => "lock",
            Commands::Open { .. } => "open",
            Commands::Chgrp { .. } => "chgrp",
            Commands::Pack { .. } => "pack",
            Commands::Unpack { .. } => "unpack",
            Commands::Bundle { .. } => "bundle",
            Commands::Encrypt { .. } => "encrypt",
            Commands::Decrypt { .. } => "decrypt",
            Commands::Sha1 { .. } => "sha1",
            Commands::SafeName { .. } => "safe-name",
            Commands::Settings => "settings",
        }
    }
}

fn cipher_settings(settings: StagingSettings, secret: Option<String>) -> StagingSettings {
    match secret {
        Some(secret) => settings.with_global_secret(secret),
        None => settings,
    }
}

fn reachability(reachable: bool) -> &'static str {
    if reachable {
        "accessible"
    } else {
        "NOT accessible"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_covers_all_staging_crates() {
        let filter = with_default_directives(EnvFilter::new("warn")).unwrap().to_string();
        for target in ["dama_staging", "staging_core", "staging_files", "staging_cipher"] {
            assert!(filter.contains(&format!("{target}=info")), "missing {target} in {filter}");
        }
    }

    #[test]
    fn command_names_match_subcommands() {
        let cli = Cli::try_parse_from(["dama-staging", "safe-name", "a b"]).unwrap();
        assert_eq!(cli.command.name(), "safe-name");
        let cli = Cli::try_parse_from(["dama-staging", "unpack", "in.zip", "out", "--delete"])
            .unwrap();
        assert_eq!(cli.command.name(), "unpack");
    }
}
