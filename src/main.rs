use clap::{Parser, Subcommand};
use chainarc::archive::{Archive, ArchiveOptions};
use chainarc::block::NamePolicy;
use chainarc::observer::LogObserver;
use chainarc::processor::{get_processor, ProcessorTag};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "chainarc", about = "Single-file block archive CLI")]
struct Cli {
    /// Truncate names longer than the header allows instead of failing
    #[arg(long, global = true)]
    truncate_names: bool,
    /// Keep *_processed / *_reverse_process intermediate files
    #[arg(long, global = true)]
    keep_intermediate: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a file, creating the archive if needed
    Add {
        archive: PathBuf,
        file:    PathBuf,
        /// Processor tag: comp (zstd) or lz4f
        #[arg(short, long)]
        processor: Option<String>,
    },
    /// Extract a stored file to a destination path
    Extract {
        archive: PathBuf,
        name:    String,
        dest:    PathBuf,
    },
    /// Remove a stored file
    Remove {
        archive: PathBuf,
        name:    String,
    },
    /// List stored files
    List {
        archive: PathBuf,
    },
    /// Print every block's index, empty flag and owner
    Dump {
        archive: PathBuf,
    },
    /// Drop free blocks and shrink the archive
    Compact {
        archive: PathBuf,
    },
    /// Show block and file counts
    Info {
        archive: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let opts = ArchiveOptions {
        name_policy:       if cli.truncate_names { NamePolicy::Truncate } else { NamePolicy::Reject },
        keep_intermediate: cli.keep_intermediate,
    };

    match cli.command {
        Commands::Add { archive, file, processor } => {
            let mut ar = Archive::open_or_create(&archive, opts)?;
            ar.add_observer(LogObserver);
            let processor = match processor {
                Some(name) => {
                    let tag = ProcessorTag::from_name(&name)
                        .ok_or_else(|| format!("unknown processor '{name}' (expected comp or lz4f)"))?;
                    Some(get_processor(tag)?)
                }
                None => None,
            };
            ar.add(&file, processor)?;
        }

        Commands::Extract { archive, name, dest } => {
            let mut ar = open_archive(&archive, opts)?;
            ar.extract(&name, &dest)?;
        }

        Commands::Remove { archive, name } => {
            let mut ar = open_archive(&archive, opts)?;
            ar.remove(&name)?;
        }

        Commands::List { archive } => {
            let ar = open_archive(&archive, opts)?;
            let count = ar.list(&mut std::io::stdout().lock())?;
            println!("{count} file(s)");
        }

        Commands::Dump { archive } => {
            let mut ar = open_archive(&archive, opts)?;
            let count = ar.debug_dump(&mut std::io::stdout().lock())?;
            println!("{count} block(s)");
        }

        Commands::Compact { archive } => {
            let mut ar = open_archive(&archive, opts)?;
            let kept = ar.compact()?;
            println!("{kept} block(s) kept");
        }

        Commands::Info { archive } => {
            let mut ar = open_archive(&archive, opts)?;
            let stats = ar.stats()?;
            println!("Archive          {}", ar.path().display());
            println!("Blocks           {}", stats.blocks);
            println!("Free blocks      {}", stats.free_blocks);
            println!("Processed blocks {}", stats.processed_blocks);
            println!("Files            {}", stats.files);
        }
    }

    Ok(())
}

fn open_archive(path: &PathBuf, opts: ArchiveOptions) -> Result<Archive, Box<dyn std::error::Error>> {
    let mut ar = Archive::open(path, opts)?;
    ar.add_observer(LogObserver);
    Ok(ar)
}
