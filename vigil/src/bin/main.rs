use std::{
    fs::OpenOptions,
    io::{BufWriter, Write},
    path::PathBuf,
    time::Duration,
};

use anyhow::{anyhow, Context as _};
use aya::{
    maps::{perf::AsyncPerfEventArray, HashMap as AyaHashMap, MapData},
    util::online_cpus,
    Ebpf, VerifierLogLevel,
};
use bytes::BytesMut;
use clap::{Parser, Subcommand};
use env_logger::Builder;
use log::{debug, error, info, warn, LevelFilter};
use tokio::{sync::mpsc, task, time};

use vigil::{
    config::Config,
    events::EventFormatter,
    util::{get_current_uid, uptime::BootClock},
};
use vigil_common::{
    args::{StrBuffer, ARGS_ENVS_CACHE_MAP},
    bpf_events::{EbpfEvent, EncodedEvent, ExecEvent, Type, VIGIL_EVENTS_MAP, VIGIL_STATS_MAP},
    discarders::Discarders,
};

// exec events are the largest ones
const MAX_BPF_EVENT_SIZE: usize = ExecEvent::size_of();

#[derive(Parser)]
#[command(author, version, about = "Process lineage and span correlation sensor", long_about = None)]
struct Cli {
    /// Enable debugging
    #[arg(short, long)]
    debug: bool,

    /// Silents out debug, info, error logging.
    #[arg(short, long)]
    silent: bool,

    /// Set verbosity level, repeat option for more verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Specify a vigil command (if any)
    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Default, Parser)]
struct RunOpt {
    /// Specify a configuration file to use. Command line options supersede the ones specified in the configuration file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path of the eBPF object to load
    #[arg(long, value_name = "FILE")]
    ebpf: Option<PathBuf>,

    /// Number of worker threads used to process events
    #[arg(short, long)]
    workers: Option<usize>,

    /// Exclude events by name (comma separated).
    #[arg(long)]
    exclude: Option<String>,

    /// Include events by name (comma separated). Supersedes any exclude filter.
    #[arg(long)]
    include: Option<String>,

    /// Output file, events are written as JSON lines
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
}

impl TryFrom<RunOpt> for Config {
    type Error = anyhow::Error;

    fn try_from(opt: RunOpt) -> Result<Self, Self::Error> {
        let mut conf = match opt.config {
            Some(p) => Config::from_file(&p)
                .with_context(|| format!("failed to read config {}", p.to_string_lossy()))?,
            None => Config::default(),
        };

        // command line supersedes configuration
        if let Some(ebpf) = opt.ebpf {
            conf.ebpf = ebpf;
        }

        if let Some(workers) = opt.workers {
            conf.workers = Some(workers);
        }

        if let Some(output) = opt.output {
            conf = conf.output(output);
        }

        if let Some(exclude) = opt.exclude {
            let exclude: Vec<&str> = exclude.split(',').collect();
            conf.exclude(&exclude)?;
        }

        if let Some(include) = opt.include {
            let include: Vec<&str> = include.split(',').collect();
            conf.include(&include)?;
        }

        Ok(conf)
    }
}

#[derive(Debug, Parser)]
struct ConfigOpt {
    /// Dump a default configuration
    #[arg(long)]
    dump: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run vigil with custom options
    Run(RunOpt),
    /// Configuration related commands
    Config(ConfigOpt),
}

#[inline(always)]
fn optimal_page_count(page_size: usize, max_event_size: usize, n_events: usize) -> usize {
    // perf buffers are expected to be a power of two pages
    ((max_event_size * n_events) / page_size)
        .max(1)
        .next_power_of_two()
}

fn page_size() -> usize {
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        n if n > 0 => n as usize,
        _ => 4096,
    }
}

fn log_stats(stats: &AyaHashMap<MapData, Type, u64>) {
    for ty in Type::variants() {
        if ty.is_configurable() {
            error!("stats {}: {}", ty, stats.get(&ty, 0).unwrap_or_default());
        }
    }
}

/// Reads the perf buffers of every online CPU and forwards what is
/// read to the consumer
fn spawn_producers(
    bpf: &mut Ebpf,
    conf: &Config,
    sender: mpsc::Sender<EncodedEvent>,
) -> anyhow::Result<Vec<task::JoinHandle<anyhow::Result<()>>>> {
    let mut perf_array = AsyncPerfEventArray::try_from(
        bpf.take_map(VIGIL_EVENTS_MAP)
            .ok_or(anyhow!("missing map {VIGIL_EVENTS_MAP}"))?,
    )?;

    let stats: AyaHashMap<_, Type, u64> = AyaHashMap::try_from(
        bpf.take_map(VIGIL_STATS_MAP)
            .ok_or(anyhow!("missing map {VIGIL_STATS_MAP}"))?,
    )?;
    let stats = std::sync::Arc::new(stats);

    let cpus = online_cpus().map_err(|(_, e)| e)?;
    let page_count = optimal_page_count(
        page_size(),
        MAX_BPF_EVENT_SIZE,
        conf.max_buffered_events as usize,
    );

    let mut tasks = vec![];
    for cpu_id in cpus {
        // open a separate perf buffer for each cpu
        let mut buf = perf_array.open(cpu_id, Some(page_count))?;
        let sender = sender.clone();
        let stats = stats.clone();
        let n_buffers = conf.max_buffered_events as usize;

        tasks.push(task::spawn(async move {
            // the number of buffers gives the number of events read in one go
            let mut buffers = (0..n_buffers)
                .map(|_| BytesMut::with_capacity(MAX_BPF_EVENT_SIZE))
                .collect::<Vec<_>>();

            loop {
                let events = buf.read_events(&mut buffers).await?;

                if events.lost > 0 {
                    error!(
                        "some events have been lost in the way from kernel read={} lost={}: consider filtering out some events or increase the number of buffered events in configuration",
                        events.read, events.lost
                    );
                    log_stats(&stats);
                }

                for b in buffers.iter().take(events.read) {
                    if sender.send(EncodedEvent::from_bytes(b)).await.is_err() {
                        // consumer is gone
                        return Ok(());
                    }
                }
            }
        }));
    }

    Ok(tasks)
}

/// Decodes events and writes them to the configured output
fn spawn_consumer(
    bpf: &mut Ebpf,
    conf: &Config,
    mut receiver: mpsc::Receiver<EncodedEvent>,
) -> anyhow::Result<task::JoinHandle<anyhow::Result<()>>> {
    let args: AyaHashMap<MapData, u32, StrBuffer> = AyaHashMap::try_from(
        bpf.take_map(ARGS_ENVS_CACHE_MAP)
            .ok_or(anyhow!("missing map {ARGS_ENVS_CACHE_MAP}"))?,
    )?;

    let formatter = EventFormatter::new(BootClock::from_sys()?, args);

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&conf.output)
        .with_context(|| format!("failed to open output {}", conf.output))?;
    let mut out = BufWriter::new(file);

    Ok(task::spawn(async move {
        while let Some(enc) = receiver.recv().await {
            let event = match enc.decode() {
                Ok(e) => e,
                Err(e) => {
                    error!("failed to decode event: {e}");
                    continue;
                }
            };

            if let EbpfEvent::Log(l) = &event {
                error!(
                    "probe error pid={} line={}: {}",
                    l.info.process.pid,
                    l.data.line,
                    l.data.error.description()
                );
                continue;
            }

            if let Some(ue) = formatter.format(&event) {
                writeln!(out, "{}", serde_json::to_string(&ue)?)?;
            }

            // flushing when there is nothing left to process
            if receiver.is_empty() {
                out.flush()?;
            }
        }

        Ok(())
    }))
}

/// Periodically flushes the pid discarders
fn spawn_discarders_flush(bpf: &mut Ebpf, conf: &Config) -> anyhow::Result<()> {
    if conf.discarders_flush_interval == 0 {
        return Ok(());
    }

    let mut discarders = Discarders::take_from(bpf)?;
    let mut interval = time::interval(Duration::from_secs(conf.discarders_flush_interval));

    task::spawn(async move {
        loop {
            interval.tick().await;
            match discarders.flush() {
                Ok(n) => debug!("flushed {n} pid discarders"),
                Err(e) => warn!("failed to flush pid discarders: {e}"),
            }
        }
    });

    Ok(())
}

impl Command {
    fn run(opt: Option<RunOpt>, vll: VerifierLogLevel) -> anyhow::Result<()> {
        // checking that we are running as root
        if get_current_uid() != 0 {
            return Err(anyhow::Error::msg(
                "You need to be root to run this program, this is necessary to load eBPF programs",
            ));
        }

        let conf: Config = opt.unwrap_or_default().try_into()?;

        let mut builder = tokio::runtime::Builder::new_multi_thread();
        if let Some(workers) = conf.workers {
            builder.worker_threads(workers);
        }
        let runtime = builder.enable_all().build()?;

        runtime.block_on(async move {
            let (mut bpf, data) = vigil::prepare_bpf(&conf, vll)?;

            let (sender, receiver) = mpsc::channel(conf.max_buffered_events as usize);
            let consumer = spawn_consumer(&mut bpf, &conf, receiver)?;
            let producers = spawn_producers(&mut bpf, &conf, sender)?;
            spawn_discarders_flush(&mut bpf, &conf)?;

            // programs are attached once everything is ready to read events
            vigil::load_and_attach_bpf(&mut bpf, &data)?;

            info!("Waiting for Ctrl-C...");
            let main = async move {
                for t in producers {
                    t.await??;
                }
                consumer.await?
            };

            tokio::select! {
                _ = tokio::signal::ctrl_c() => Ok(()),
                res = main => res,
            }
        })
    }

    fn config(co: ConfigOpt) -> anyhow::Result<()> {
        if co.dump {
            println!("{}", serde_yaml::to_string(&Config::default())?);
        }
        Ok(())
    }
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // setting log level according to the verbosity level
    let mut log_level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        3..=u8::MAX => LevelFilter::Trace,
    };

    // silent out logging if specified in CLI
    if cli.silent {
        log_level = LevelFilter::Off;
    }

    let mut verifier_level = match std::env::var("VERIFIER_LOG_LEVEL") {
        Ok(s) => match s.as_str() {
            "debug" => VerifierLogLevel::DEBUG,
            "verbose" => VerifierLogLevel::VERBOSE,
            "disable" => VerifierLogLevel::DISABLE,
            _ => VerifierLogLevel::STATS,
        },
        _ => VerifierLogLevel::STATS,
    };

    // handling debugging flag
    if cli.debug {
        log_level = LevelFilter::Debug;
        verifier_level = VerifierLogLevel::DEBUG;
    }

    // building the logger
    Builder::new().filter_level(log_level).init();

    match cli.command {
        Some(Command::Config(o)) => Command::config(o),
        Some(Command::Run(o)) => Command::run(Some(o), verifier_level),
        None => Command::run(None, verifier_level),
    }
}
