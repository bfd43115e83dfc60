use audiobook_pipeline::espeak::EspeakFactory;
use audiobook_pipeline::extract::read_source;
use audiobook_pipeline::text::TextProcessor;
use audiobook_pipeline::{AudioFormat, Config, EnginePolicy, Orchestrator, TaskStatus};
use clap::{Arg, ArgAction, ArgMatches, Command};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::process::{Command as ProcessCommand, ExitCode};
use std::sync::Arc;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn cli() -> Command {
    Command::new("Audiobook Pipeline")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Converts books and plain text into a single audiobook file")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .global(true),
        )
        .subcommand(
            Command::new("convert")
                .about("Convert an EPUB or text file")
                .arg(
                    Arg::new("input")
                        .short('i')
                        .long("input")
                        .value_name("FILE")
                        .help("Input EPUB or text file")
                        .required(true),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("DIR")
                        .help("Output directory"),
                )
                .arg(
                    Arg::new("format")
                        .short('f')
                        .long("format")
                        .value_name("FORMAT")
                        .help("Output audio format")
                        .value_parser(["mp3", "vorbis"]),
                )
                .arg(
                    Arg::new("chunk-size")
                        .long("chunk-size")
                        .value_name("CHARS")
                        .help("Maximum characters per synthesis chunk")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    Arg::new("bitrate")
                        .short('b')
                        .long("bitrate")
                        .value_name("KBPS")
                        .help("Encoder bitrate in kbit/s")
                        .value_parser(clap::value_parser!(u32)),
                )
                .arg(
                    Arg::new("speed")
                        .short('s')
                        .long("speed")
                        .value_name("FLOAT")
                        .help("Voice speed multiplier")
                        .value_parser(clap::value_parser!(f32)),
                )
                .arg(
                    Arg::new("pitch")
                        .short('p')
                        .long("pitch")
                        .value_name("FLOAT")
                        .help("Voice pitch multiplier")
                        .value_parser(clap::value_parser!(f32)),
                )
                .arg(
                    Arg::new("engine-policy")
                        .long("engine-policy")
                        .value_name("POLICY")
                        .help("Share one engine pool or start an engine per task")
                        .value_parser(["shared", "per-task"]),
                ),
        )
        .subcommand(Command::new("check").about("Check for the external tools the pipeline needs"))
        .subcommand(
            Command::new("config")
                .about("Print the effective configuration")
                .arg(
                    Arg::new("write")
                        .short('w')
                        .long("write")
                        .value_name("FILE")
                        .help("Write the configuration to FILE instead")
                        .action(ArgAction::Set),
                ),
        )
}

fn load_config(matches: &ArgMatches) -> CliResult<Config> {
    match matches.get_one::<String>("config") {
        Some(path) => Ok(Config::load(Path::new(path))?),
        None => Ok(Config::default()),
    }
}

fn apply_overrides(config: &mut Config, matches: &ArgMatches) {
    if let Some(dir) = matches.get_one::<String>("output") {
        config.output_dir = PathBuf::from(dir);
    }
    if let Some(format) = matches
        .get_one::<String>("format")
        .and_then(|f| AudioFormat::parse(f))
    {
        config.output_format = format;
    }
    if let Some(size) = matches.get_one::<usize>("chunk-size") {
        config.chunk_size = *size;
    }
    if let Some(bitrate) = matches.get_one::<u32>("bitrate") {
        config.bitrate_kbps = *bitrate;
    }
    if let Some(speed) = matches.get_one::<f32>("speed") {
        config.voice_speed = *speed;
    }
    if let Some(pitch) = matches.get_one::<f32>("pitch") {
        config.voice_pitch = *pitch;
    }
    if let Some(policy) = matches
        .get_one::<String>("engine-policy")
        .and_then(|p| EnginePolicy::parse(p))
    {
        config.engine_policy = policy;
    }
}

async fn convert(mut config: Config, matches: &ArgMatches) -> CliResult<bool> {
    apply_overrides(&mut config, matches);
    config.validate()?;

    let input = match matches.get_one::<String>("input") {
        Some(input) => PathBuf::from(input),
        None => return Err("an input file is required".into()),
    };
    let filename = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    println!("📖 Reading {}...", input.display());
    let processor = TextProcessor::new();
    let text = read_source(&input, &processor, config.preprocessing_aggressive)?;
    println!("📊 Total words: {}", text.split_whitespace().count());

    let orchestrator = Orchestrator::with_factory(&config, Arc::new(EspeakFactory::new(&config)))?;
    orchestrator.start_retention_janitor();

    let start_time = Instant::now();
    let task_id = orchestrator.submit(&text, &filename)?;
    println!("🎤 Converting as task {}", task_id);

    let progress_bar = ProgressBar::new(100);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")?
            .progress_chars("█▉▊▋▌▍▎▏  "),
    );

    let task = loop {
        let task = orchestrator.poll(task_id)?;
        progress_bar.set_position(u64::from(task.progress));
        progress_bar.set_message(task.message.clone());
        if task.status.is_terminal() {
            break task;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };
    progress_bar.finish_and_clear();
    orchestrator.shutdown().await;

    for skipped in &task.skipped_chunks {
        println!("⚠️  Skipped chunk {}: {}", skipped.index, skipped.reason);
    }

    match (task.status, task.output_file, task.error) {
        (TaskStatus::Completed, Some(output_file), _) => {
            println!("✅ Conversion completed in {:.2?}", start_time.elapsed());
            println!("📁 Output saved to: {}", config.output_dir.join(output_file).display());
            Ok(true)
        }
        (_, _, error) => {
            eprintln!("❌ Conversion failed: {}", error.unwrap_or(task.message));
            Ok(false)
        }
    }
}

fn check_dependencies(config: &Config) -> bool {
    let ffmpeg = config.ffmpeg_path.to_string_lossy().into_owned();
    let tools = [
        ("espeak-ng", "TTS engine"),
        ("espeak", "TTS engine (fallback)"),
        (ffmpeg.as_str(), "audio assembly"),
    ];

    println!("📋 System Dependencies Check:\n");
    let mut found = Vec::new();
    for (tool, purpose) in tools {
        let available = ProcessCommand::new("which")
            .arg(tool)
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false);
        let mark = if available { "✅" } else { "❌" };
        println!("{} {} ({})", mark, tool, purpose);
        found.push(available);
    }

    let ready = (found[0] || found[1]) && found[2];
    if !ready {
        println!("\n📦 Install the missing tools, e.g.: sudo pacman -S espeak-ng ffmpeg");
    }
    ready
}

async fn run(matches: ArgMatches) -> CliResult<bool> {
    let config = load_config(&matches)?;

    match matches.subcommand() {
        Some(("convert", sub)) => convert(config, sub).await,
        Some(("check", _)) => Ok(check_dependencies(&config)),
        Some(("config", sub)) => {
            match sub.get_one::<String>("write") {
                Some(path) => {
                    config.save(Path::new(path))?;
                    println!("📝 Configuration written to {}", path);
                }
                None => println!("{}", serde_json::to_string_pretty(&config)?),
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(cli().get_matches()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("❌ {}", e);
            ExitCode::FAILURE
        }
    }
}
