use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Parser};
use spack::{CompressionLevel, LayoutOrder, PackConfig, Packer};
use spack_digest::HashAlgorithm;
use tracing_subscriber::{filter::LevelFilter, util::SubscriberInitExt, EnvFilter};

/// Pack every regular file below a directory into a single file.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The pack file to create. An existing file is overwritten.
    destination: PathBuf,

    /// The directory to pack.
    root: PathBuf,

    /// The directory that caches compressed blobs between runs.
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// The number of workers in every pool.
    #[arg(short, long, default_value_t = spack::DEFAULT_WORKERS)]
    jobs: usize,

    /// The digest used to fingerprint files (md5 or sha256).
    #[arg(long = "hash", default_value_t = HashAlgorithm::Md5)]
    algorithm: HashAlgorithm,

    /// The gzip level of newly compressed blobs.
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(0..=9))]
    level: Option<u32>,

    /// Lay blobs out in discovery order so that the same tree and cache
    /// always produce the same pack.
    #[arg(long)]
    deterministic: bool,

    /// Also write a JSON manifest describing where every file ended up.
    #[arg(long, value_name = "FILE")]
    manifest: Option<PathBuf>,

    /// Increase logging verbosity.
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Decrease logging verbosity.
    #[arg(short, long, action = ArgAction::Count)]
    quiet: u8,
}

impl Cli {
    fn level_filter(&self) -> LevelFilter {
        const LEVELS: [LevelFilter; 6] = [
            LevelFilter::OFF,
            LevelFilter::ERROR,
            LevelFilter::WARN,
            LevelFilter::INFO,
            LevelFilter::DEBUG,
            LevelFilter::TRACE,
        ];
        let index = (3 + i32::from(self.verbose) - i32::from(self.quiet)).clamp(0, 5);
        LEVELS[index as usize]
    }

    fn into_config(self) -> PackConfig {
        let mut config = PackConfig::new(self.destination, self.root)
            .with_cache_dir(self.cache_dir.unwrap_or_else(std::env::temp_dir))
            .with_workers(self.jobs)
            .with_algorithm(self.algorithm);
        if let Some(level) = self.level {
            config = config.with_compression_level(CompressionLevel::Numeric(level));
        }
        if self.deterministic {
            config = config.with_layout(LayoutOrder::Discovery);
        }
        if let Some(manifest) = self.manifest {
            config = config.with_manifest(manifest);
        }
        config
    }
}

/// Entry point of the `spack` cli.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Usage errors exit here, before anything touches the filesystem.
    let cli = Cli::parse();

    let env_filter = EnvFilter::builder()
        .with_default_directive(cli.level_filter().into())
        .from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .without_time()
        .finish()
        .try_init()?;

    let config = cli.into_config();
    let destination = config.destination.clone();
    let report = Packer::new(config)?
        .run()
        .await
        .with_context(|| format!("failed to create '{}'", destination.display()))?;

    tracing::debug!(
        "{} of {} files were duplicates",
        report.entries.iter().filter(|entry| entry.deduplicated).count(),
        report.entries.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "spack",
            "out.pack",
            "src",
            "-j",
            "3",
            "--hash",
            "sha256",
            "-l",
            "9",
            "--deterministic",
            "--cache-dir",
            "cache",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.level_filter(), LevelFilter::TRACE);

        let config = cli.into_config();
        assert_eq!(config.destination, PathBuf::from("out.pack"));
        assert_eq!(config.root, PathBuf::from("src"));
        assert_eq!(config.cache_dir, PathBuf::from("cache"));
        assert_eq!(config.hash_workers, 3);
        assert_eq!(config.write_workers, 3);
        assert_eq!(config.algorithm, HashAlgorithm::Sha256);
        assert_eq!(config.compression_level, CompressionLevel::Numeric(9));
        assert_eq!(config.layout, LayoutOrder::Discovery);
        assert!(config.manifest.is_none());
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["spack", "out.pack", "src"]).unwrap();
        assert_eq!(cli.level_filter(), LevelFilter::INFO);
        let config = cli.into_config();
        assert_eq!(config.cache_dir, std::env::temp_dir());
        assert_eq!(config.layout, LayoutOrder::Completion);
        assert_eq!(config.compression_level, CompressionLevel::Default);
    }

    #[test]
    fn test_positional_count() {
        assert!(Cli::try_parse_from(["spack"]).is_err());
        assert!(Cli::try_parse_from(["spack", "out.pack"]).is_err());
        assert!(Cli::try_parse_from(["spack", "out.pack", "src", "extra"]).is_err());
        assert!(Cli::try_parse_from(["spack", "a", "b", "--level", "10"]).is_err());
    }
}
