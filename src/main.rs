use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use oci2dockerfile::sources::open_archive;
use oci2dockerfile::synthesizer::FILES_DIR;
use oci2dockerfile::{
    generate_from_info, reverse_dockerfile, save_dockerfile_data, DockerSource,
    HistoryFileSource, HistorySource, NerdctlSource, Notifier, Source, TarSource,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum Engine {
    Docker,
    Nerdctl,
    Tar,
    /// Engine history API JSON saved to a file
    HistoryJson,
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Verbose mode (-v for info, -vv for debug, -vvv for trace). Also switches to text-based progress"
    )]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Reconstruct a Dockerfile from the layer history of an image
    Reverse {
        #[arg(help = "Image name, tarball path or history JSON file, depending on the engine")]
        image: String,

        #[arg(
            short,
            long,
            value_enum,
            default_value = "docker",
            help = "Where the history comes from",
            long_help = "Where the history comes from. An image tarball (tar, nerdctl) only tags \
                         its newest record, so stacked images are split into separate blocks \
                         only with docker, which reads local tags from the daemon, or with \
                         history-json"
        )]
        engine: Engine,

        #[arg(short, long, help = "Write the Dockerfile here instead of stdout")]
        output: Option<PathBuf>,
    },
    /// Capture the image filesystem and write a minimal FROM scratch Dockerfile for it
    Generate {
        #[arg(help = "Image name or tarball path, depending on the engine")]
        image: String,

        #[arg(
            short,
            long,
            value_enum,
            default_value = "docker",
            help = "Container engine to use"
        )]
        engine: Engine,

        #[arg(
            short,
            long,
            default_value = "./recipe",
            help = "Output directory for the Dockerfile and the captured files"
        )]
        output: PathBuf,
    },
}

fn history_source(engine: Engine) -> Result<Box<dyn HistorySource>> {
    let source: Box<dyn HistorySource> = match engine {
        Engine::Docker => Box::new(DockerSource::new()?),
        Engine::Nerdctl => Box::new(NerdctlSource::new()?),
        Engine::Tar => Box::new(TarSource::new()?),
        Engine::HistoryJson => Box::new(HistoryFileSource::new()),
    };
    Ok(source)
}

fn archive_source(engine: Engine) -> Result<Box<dyn Source>> {
    let source: Box<dyn Source> = match engine {
        Engine::Docker => Box::new(DockerSource::new()?),
        Engine::Nerdctl => Box::new(NerdctlSource::new()?),
        Engine::Tar => Box::new(TarSource::new()?),
        Engine::HistoryJson => {
            return Err(anyhow!(
                "history JSON carries no filesystem, use docker, nerdctl or tar"
            ))
        }
    };
    Ok(source)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let notifier = Notifier::new(cli.verbose);

    match cli.command {
        Command::Reverse {
            image,
            engine,
            output,
        } => {
            notifier.debug(&format!("Engine: {:?}", engine));
            let source = history_source(engine)?;
            let lines = reverse_dockerfile(source.as_ref(), &image, &notifier)?;

            match output {
                Some(path) => {
                    save_dockerfile_data(&path, &lines)?;
                    notifier.info(&format!("Dockerfile written to {}", path.display()));
                }
                None => {
                    notifier.finish();
                    println!("{}", lines.join("\n"));
                }
            }
        }
        Command::Generate {
            image,
            engine,
            output,
        } => {
            notifier.debug(&format!("Engine: {:?}", engine));
            let source = archive_source(engine)?;
            let archive = open_archive(source.as_ref(), &image, &notifier)?;

            notifier.info("Capturing image filesystem...");
            archive.flatten_into(output.join(FILES_DIR), &notifier)?;

            let path = generate_from_info(&output, &archive.runtime_info())?;
            notifier.info(&format!("Dockerfile written to {}", path.display()));
        }
    }

    notifier.finish();
    Ok(())
}
