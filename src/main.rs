//! descring - ring driver
//!
//! Menjalankan producer dan consumer di dua thread, mengirim sejumlah buffer
//! lewat ring, lalu melaporkan throughput dan jumlah signal.
//!
//! Usage:
//!   cargo run --release -- [OPTIONS]

use std::io;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use descring::affinity::pin_if_configured;
use descring::{
    mio_pair, Consumer, Error, MioWaiter, NoopNotifier, Notifier, Producer, RingConfig, Session,
};
use tracing_subscriber::EnvFilter;

/// Exit status when ring storage cannot be allocated.
const EXIT_ALLOC: i32 = 3;
const EXIT_USAGE: i32 = 2;
const EXIT_FAILURE: i32 = 1;

/// Batas atas satu kali tunggu doorbell; loop cek ulang ring setelahnya.
const WAIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Panjang buffer palsu yang di-publish di setiap descriptor.
const BUFFER_LEN: u32 = 64;

/// Konfigurasi driver
struct HarnessConfig {
    ring_size: usize,
    buffers: u64,
    batch: usize,
    sleep: bool,
    producer_cpu: Option<usize>,
    consumer_cpu: Option<usize>,
    shm_path: Option<PathBuf>,
    verbose: bool,
    help: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            ring_size: descring::config::DEFAULT_CAPACITY,
            buffers: 2_000_000,
            batch: 1,
            sleep: false,
            producer_cpu: None,
            consumer_cpu: None,
            shm_path: None,
            verbose: false,
            help: false,
        }
    }
}

#[derive(Debug, Default)]
struct ProducerStats {
    kicks: u64,
    waits: u64,
}

#[derive(Debug, Default)]
struct ConsumerStats {
    calls: u64,
    waits: u64,
}

/// Error yang dikembalikan thread jika berhenti karena peer-nya gagal.
fn peer_stopped() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "peer thread stopped")
}

/// Run one endpoint; if it fails, raise `stop` so the peer does not wait
/// forever for signals that will never come.
fn endpoint<T>(stop: &AtomicBool, body: impl FnOnce() -> io::Result<T>) -> io::Result<T> {
    let result = body();
    if result.is_err() {
        stop.store(true, Ordering::Release);
    }
    result
}

fn run_producer<N: Notifier>(
    mut producer: Producer<u64, N>,
    mut waiter: Option<MioWaiter>,
    stop: &AtomicBool,
    buffers: u64,
    batch: usize,
) -> io::Result<ProducerStats> {
    let mut stats = ProducerStats::default();
    let mut started = 0u64;
    let mut completed = 0u64;
    let batch = batch.min(producer.capacity()) as u64;

    loop {
        if stop.load(Ordering::Acquire) {
            return Err(peer_stopped());
        }
        producer.cancel_notify_request();

        let mut progressed = false;
        let mut published = false;
        while started < buffers && started - completed < batch {
            match producer.publish(BUFFER_LEN, started, started, 0) {
                Ok(_) => {
                    started += 1;
                    published = true;
                }
                Err(_) => break,
            }
        }
        if published {
            progressed = true;
            if producer.notify_consumer_if_needed() {
                stats.kicks += 1;
            }
        }

        while let Some(reclaimed) = producer.reclaim() {
            if reclaimed.tag != completed {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("reclaimed buffer {} out of order, expected {}", reclaimed.tag, completed),
                ));
            }
            completed += 1;
            progressed = true;
        }

        if completed == buffers {
            return Ok(stats);
        }
        if progressed {
            continue;
        }

        match waiter.as_mut() {
            Some(waiter) => {
                if producer.request_notify_on_completion() {
                    stats.waits += 1;
                    waiter.wait(Some(WAIT_TIMEOUT))?;
                }
            }
            None => std::hint::spin_loop(),
        }
    }
}

fn run_consumer<N: Notifier>(
    mut consumer: Consumer<N>,
    mut waiter: Option<MioWaiter>,
    stop: &AtomicBool,
    buffers: u64,
) -> io::Result<ConsumerStats> {
    let mut stats = ConsumerStats::default();
    let mut done = 0u64;

    loop {
        if stop.load(Ordering::Acquire) {
            return Err(peer_stopped());
        }
        consumer.cancel_notify_request();

        let mut progressed = false;
        while let Some(claimed) = consumer.claim_and_complete() {
            debug_assert_eq!(claimed.len, BUFFER_LEN);
            done += 1;
            progressed = true;
        }
        if progressed && consumer.notify_producer_if_needed() {
            stats.calls += 1;
        }

        if done == buffers {
            return Ok(stats);
        }
        if progressed {
            continue;
        }

        match waiter.as_mut() {
            Some(waiter) => {
                if consumer.request_notify_on_publish() {
                    stats.waits += 1;
                    waiter.wait(Some(WAIT_TIMEOUT))?;
                }
            }
            None => std::hint::spin_loop(),
        }
    }
}

fn join<T>(
    handle: thread::JoinHandle<io::Result<T>>,
    role: &str,
    stop: &AtomicBool,
) -> io::Result<T> {
    handle.join().map_err(|_| {
        stop.store(true, Ordering::Release);
        io::Error::new(io::ErrorKind::Other, format!("{role} thread panicked"))
    })?
}

fn run<K, C>(
    config: &HarnessConfig,
    kick: K,
    call: C,
    kick_waiter: Option<MioWaiter>,
    call_waiter: Option<MioWaiter>,
) -> Result<(), Box<dyn std::error::Error>>
where
    K: Notifier + Send + 'static,
    C: Notifier + Send + 'static,
{
    let mut ring_config = RingConfig::new(config.ring_size);
    if let Some(path) = &config.shm_path {
        ring_config = ring_config.with_shm_path(path);
    }
    let session = Session::<u64>::new(&ring_config)?;
    let (producer, consumer) = session.split(kick, call);

    let buffers = config.buffers;
    let batch = config.batch;
    let producer_cpu = config.producer_cpu;
    let consumer_cpu = config.consumer_cpu;

    let stop = Arc::new(AtomicBool::new(false));
    let consumer_stop = Arc::clone(&stop);
    let producer_stop = Arc::clone(&stop);

    let start = Instant::now();
    let consumer_thread = thread::Builder::new()
        .name("consumer".into())
        .spawn(move || {
            pin_if_configured("consumer", consumer_cpu);
            endpoint(&consumer_stop, || {
                run_consumer(consumer, kick_waiter, &consumer_stop, buffers)
            })
        })?;
    let producer_thread = thread::Builder::new()
        .name("producer".into())
        .spawn(move || {
            pin_if_configured("producer", producer_cpu);
            endpoint(&producer_stop, || {
                run_producer(producer, call_waiter, &producer_stop, buffers, batch)
            })
        })?;

    let producer_result = join(producer_thread, "producer", &stop);
    let consumer_result = join(consumer_thread, "consumer", &stop);
    let (producer_stats, consumer_stats) = match (producer_result, consumer_result) {
        (Ok(p), Ok(c)) => (p, c),
        (Err(e), Ok(_)) | (Ok(_), Err(e)) => return Err(e.into()),
        // Report the thread that failed first, not the one that gave up.
        (Err(p), Err(c)) => {
            let first = if p.kind() == io::ErrorKind::ConnectionAborted { c } else { p };
            return Err(first.into());
        }
    };
    let elapsed = start.elapsed();

    let mops = buffers as f64 / elapsed.as_secs_f64() / 1_000_000.0;
    println!("descring: {} buffers through a {}-slot ring", buffers, config.ring_size);
    println!("  Mode:        {}", if config.sleep { "sleep" } else { "poll" });
    println!("  Batch:       {}", config.batch);
    println!("  Elapsed:     {:.3} s", elapsed.as_secs_f64());
    println!("  Throughput:  {:.2} M buffers/sec", mops);
    println!(
        "  Per buffer:  {:.2} ns",
        elapsed.as_nanos() as f64 / buffers.max(1) as f64
    );
    println!("  Kicks:       {} ({} consumer waits)", producer_stats.kicks, consumer_stats.waits);
    println!("  Calls:       {} ({} producer waits)", consumer_stats.calls, producer_stats.waits);

    if let Some(path) = &config.shm_path {
        std::fs::remove_file(path).ok();
    }
    Ok(())
}

/// Both endpoints block on mio doorbells when they run out of work.
fn run_sleeping(config: &HarnessConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (kick, kick_waiter) = mio_pair()?;
    let (call, call_waiter) = mio_pair()?;
    run(config, kick, call, Some(kick_waiter), Some(call_waiter))
}

fn usage() {
    println!("descring - SPSC descriptor ring driver\n");
    println!("Usage: descring [OPTIONS]\n");
    println!("Options:");
    println!("  -r, --ring-size <N>     Ring slots, power of two (default: 256)");
    println!("  -n, --buffers <N>       Buffers to pass through (default: 2000000)");
    println!("  -b, --batch <N>         Max buffers in flight (default: 1)");
    println!("  -s, --sleep             Block on notifications instead of polling");
    println!("      --producer-cpu <N>  Pin the producer thread");
    println!("      --consumer-cpu <N>  Pin the consumer thread");
    println!("      --shm <PATH>        Place the ring in a shared-memory file");
    println!("  -v, --verbose           Debug logging (RUST_LOG overrides)");
    println!("  -h, --help              Show this help");
}

fn usage_error(msg: &str) -> ! {
    eprintln!("descring: {}\n", msg);
    usage();
    process::exit(EXIT_USAGE);
}

fn parse_value<T: std::str::FromStr>(args: &[String], i: usize) -> Result<T, String> {
    let raw = args
        .get(i + 1)
        .ok_or_else(|| format!("{} needs a value", args[i]))?;
    raw.parse()
        .map_err(|_| format!("invalid value {:?} for {}", raw, args[i]))
}

/// Parse driver options. `args[0]` is the program name.
fn parse_options(args: &[String]) -> Result<HarnessConfig, String> {
    let mut config = HarnessConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--ring-size" | "-r" => {
                config.ring_size = parse_value(args, i)?;
                i += 1;
            }
            "--buffers" | "-n" => {
                config.buffers = parse_value(args, i)?;
                i += 1;
            }
            "--batch" | "-b" => {
                config.batch = parse_value(args, i)?;
                i += 1;
            }
            "--sleep" | "-s" => config.sleep = true,
            "--producer-cpu" => {
                config.producer_cpu = Some(parse_value(args, i)?);
                i += 1;
            }
            "--consumer-cpu" => {
                config.consumer_cpu = Some(parse_value(args, i)?);
                i += 1;
            }
            "--shm" => {
                config.shm_path = Some(PathBuf::from(parse_value::<String>(args, i)?));
                i += 1;
            }
            "--verbose" | "-v" => config.verbose = true,
            "--help" | "-h" => config.help = true,
            other => return Err(format!("unknown option {}", other)),
        }
        i += 1;
    }

    if config.batch == 0 {
        return Err("--batch must be at least 1".to_string());
    }
    Ok(config)
}

fn parse_args() -> HarnessConfig {
    let args: Vec<String> = std::env::args().collect();
    match parse_options(&args) {
        Ok(config) if config.help => {
            usage();
            process::exit(0);
        }
        Ok(config) => config,
        Err(msg) => usage_error(&msg),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn exit_code(err: &(dyn std::error::Error + 'static)) -> i32 {
    match err.downcast_ref::<Error>() {
        Some(Error::Alloc { .. }) => EXIT_ALLOC,
        _ => EXIT_FAILURE,
    }
}

fn main() {
    let config = parse_args();
    init_tracing(config.verbose);

    let result = if config.sleep {
        run_sleeping(&config)
    } else {
        run(&config, NoopNotifier, NoopNotifier, None, None)
    };

    if let Err(e) = result {
        eprintln!("descring: {}", e);
        process::exit(exit_code(e.as_ref()));
    }
}
