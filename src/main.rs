use std::{
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use dicom_stack::{
    CacheError, DicomDataSource, DicomFileSource, Direction, DirectoryStore, FileIdentity,
    GifAnimationWriter, LatestFrameWriter, MemoryStore, MetadataCache, MetadataRecord,
    MetadataStore, MetadataValue, NavigationEvent, PngSequenceWriter, SequenceState, SliceNavigator,
    SliceStack, SortBy, StackLoader,
    dicom_source::Slice,
    render::save_slice_png,
    server::{AppState, ServerConfig, run_server},
};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "dicom-stack", version, about = "Inspect DICOM metadata and step through slice stacks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a file's metadata, reading through the metadata cache
    Info {
        path: PathBuf,
        /// Print the full record as JSON
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        cache: CacheArgs,
    },
    /// Render one slice to PNG (middle slice when no valid index is given)
    Show {
        path: PathBuf,
        #[arg(long, allow_negative_numbers = true)]
        slice: Option<isize>,
        #[arg(short, long, default_value = "slice.png")]
        output: PathBuf,
        #[command(flatten)]
        stack: StackArgs,
    },
    /// Write every slice, first to last, as a PNG sequence or animated GIF
    Export {
        path: PathBuf,
        /// Directory for PNG frames, or the .gif file for `--format gif`
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, value_enum, default_value_t = ExportFormat::Png)]
        format: ExportFormat,
        /// Delay between frames
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,
        #[command(flatten)]
        stack: StackArgs,
    },
    /// Scroll through slices from stdin (`up`, `down`, an index, `q`),
    /// mirroring the current slice to a PNG
    Browse {
        path: PathBuf,
        #[arg(short, long, default_value = "current.png")]
        output: PathBuf,
        #[arg(long, allow_negative_numbers = true)]
        start: Option<isize>,
        #[command(flatten)]
        stack: StackArgs,
    },
    /// Serve GET /dicom_info over HTTP
    Serve {
        #[arg(long, env = "DICOM_STACK_BIND", default_value = "127.0.0.1")]
        bind: std::net::IpAddr,
        #[arg(long, env = "DICOM_STACK_PORT", default_value_t = ServerConfig::default().port)]
        port: u16,
        #[command(flatten)]
        cache: CacheArgs,
    },
}

#[derive(clap::Args)]
struct CacheArgs {
    /// Persist metadata under this directory; in-memory otherwise
    #[arg(long, env = "DICOM_STACK_CACHE_DIR")]
    cache_dir: Option<PathBuf>,
}

impl CacheArgs {
    fn open(&self) -> anyhow::Result<Arc<dyn MetadataStore + Send + Sync>> {
        Ok(match &self.cache_dir {
            Some(dir) => Arc::new(
                DirectoryStore::open(dir)
                    .with_context(|| format!("opening metadata cache {}", dir.display()))?,
            ),
            None => Arc::new(MemoryStore::new()),
        })
    }
}

#[derive(clap::Args)]
struct StackArgs {
    /// Slice order when PATH is a directory of single-frame files
    #[arg(long, value_enum, default_value_t = SortArg::ImagePosition)]
    sort_by: SortArg,
}

#[derive(Clone, Copy, ValueEnum)]
enum SortArg {
    ImagePosition,
    TablePosition,
    InstanceNumber,
    None,
}

impl From<SortArg> for SortBy {
    fn from(value: SortArg) -> Self {
        match value {
            SortArg::ImagePosition => SortBy::ImagePositionPatient,
            SortArg::TablePosition => SortBy::TablePosition,
            SortArg::InstanceNumber => SortBy::InstanceNumber,
            SortArg::None => SortBy::None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ExportFormat {
    Png,
    Gif,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let _ = env_logger::Builder::from_default_env()
        .format_timestamp_secs()
        .try_init();

    match Cli::parse().command {
        Command::Info { path, json, cache } => info(&path, json, &cache),
        Command::Show {
            path,
            slice,
            output,
            stack,
        } => show(&path, slice, &output, stack.sort_by.into()),
        Command::Export {
            path,
            output,
            format,
            interval_ms,
            stack,
        } => {
            export(
                path,
                output,
                format,
                Duration::from_millis(interval_ms),
                stack.sort_by.into(),
            )
            .await
        }
        Command::Browse {
            path,
            output,
            start,
            stack,
        } => browse(&path, &output, start, stack.sort_by.into()),
        Command::Serve { bind, port, cache } => {
            let state = AppState {
                cache: MetadataCache::new(cache.open()?),
                parser: Arc::new(|identity: &FileIdentity| DicomFileSource.parse(identity)),
            };
            run_server(state, ServerConfig { bind, port }).await
        }
    }
}

fn load_stack(path: &Path, sort_by: SortBy) -> anyhow::Result<SliceStack<Slice>> {
    let stack = if path.is_dir() {
        StackLoader::load_from_directory(path, sort_by)?
    } else {
        DicomFileSource.load_stack(&FileIdentity::resolve(path)?)?
    };
    Ok(stack)
}

fn info(path: &Path, json: bool, cache: &CacheArgs) -> anyhow::Result<()> {
    let identity = FileIdentity::resolve(path)?;
    let cache = MetadataCache::new(cache.open()?);
    let record = match cache.get_metadata(&identity, || DicomFileSource.parse(&identity)) {
        Ok(record) => record,
        Err(CacheError::Encoding { record, source, .. }) => {
            log::warn!("metadata not cached: {source}");
            *record
        }
        Err(err) => return Err(err.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        print_details(&record);
    }
    Ok(())
}

fn print_details(record: &MetadataRecord) {
    let field = |name: &str| match record.get(name) {
        Some(MetadataValue::Text(text)) => text.clone(),
        Some(MetadataValue::Integer(value)) => value.to_string(),
        Some(MetadataValue::Float(value)) => value.to_string(),
        Some(MetadataValue::List(values)) => values
            .iter()
            .map(|value| match value {
                MetadataValue::Float(v) => v.to_string(),
                MetadataValue::Integer(v) => v.to_string(),
                other => format!("{other:?}"),
            })
            .collect::<Vec<_>>()
            .join(", "),
        Some(MetadataValue::Map(_)) | None => "(missing)".to_owned(),
    };

    println!();
    println!("File path........: {}", field("file_path"));
    println!("SOP Class........: {}", field("sop_class_uid"));
    println!();
    println!("Patient's Name...: {}", field("patient_name"));
    println!("Patient ID.......: {}", field("patient_id"));
    println!("Modality.........: {}", field("modality"));
    println!("Study Date.......: {}", field("study_date"));
    println!("Image size.......: {} x {}", field("rows"), field("columns"));
    println!("Frames...........: {}", field("number_of_frames"));
    println!("Pixel Spacing....: [{}]", field("pixel_spacing"));
    println!("Slice location...: {}", field("slice_location"));
}

fn show(path: &Path, slice: Option<isize>, output: &Path, sort_by: SortBy) -> anyhow::Result<()> {
    let stack = load_stack(path, sort_by)?;
    let navigator = match slice {
        Some(index) => SliceNavigator::starting_at(stack, index)?,
        None => SliceNavigator::new(stack)?,
    };
    save_slice_png(navigator.current_frame(), output)?;
    println!(
        "slice {} of {} written to {}",
        navigator.cursor(),
        navigator.len(),
        output.display()
    );
    Ok(())
}

async fn export(
    path: PathBuf,
    output: PathBuf,
    format: ExportFormat,
    frame_interval: Duration,
    sort_by: SortBy,
) -> anyhow::Result<()> {
    let token = CancellationToken::new();
    let on_interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let navigator = SliceNavigator::new(load_stack(&path, sort_by)?)?;
        let driver = navigator.export(frame_interval);

        let (report, written) = match format {
            ExportFormat::Png => {
                let prefix = path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "slice".to_owned());
                let mut writer = PngSequenceWriter::new(&output, prefix);
                let report = driver.run_until_cancelled(&mut writer, &token);
                (report, writer.finish()?.len())
            }
            ExportFormat::Gif => {
                let mut writer = GifAnimationWriter::new(&output);
                let report = driver.run_until_cancelled(&mut writer, &token);
                (report, writer.finish()?)
            }
        };

        if report.state == SequenceState::Cancelled {
            bail!(
                "export interrupted after {} of {} frames",
                report.frames_emitted,
                navigator.len()
            );
        }
        println!("{written} frames written to {}", output.display());
        Ok(())
    })
    .await?
}

fn browse(path: &Path, output: &Path, start: Option<isize>, sort_by: SortBy) -> anyhow::Result<()> {
    let stack = load_stack(path, sort_by)?;
    let mut navigator = match start {
        Some(index) => SliceNavigator::starting_at(stack, index)?,
        None => SliceNavigator::new(stack)?,
    };
    let total = navigator.len();
    let mut driver = navigator.interactive(LatestFrameWriter::new(output));

    let stdout = io::stdout();
    let mut stdout = stdout.lock();
    writeln!(stdout, "Slice Number: {} / {total}", driver.cursor())?;
    for line in io::stdin().lock().lines() {
        let line = line?;
        let event = match line.trim() {
            "" => continue,
            "q" | "quit" => break,
            "up" | "u" | "+" => NavigationEvent::Scroll(Direction::Forward),
            "down" | "d" | "-" => NavigationEvent::Scroll(Direction::Backward),
            other => match other.parse::<isize>() {
                Ok(index) => NavigationEvent::Seek(index),
                Err(_) => {
                    writeln!(stdout, "expected up, down, a slice index or q")?;
                    continue;
                }
            },
        };
        let index = driver.handle(event);
        writeln!(stdout, "Slice Number: {index} / {total}")?;
    }

    let mut writer = driver.into_renderer();
    if let Some(err) = writer.take_error() {
        return Err(err).context(format!("writing {}", writer.path().display()));
    }
    Ok(())
}
