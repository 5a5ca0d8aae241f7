use anyhow::{bail, Context};
use clap::{Arg, Command};
use log::LevelFilter;
use receipt_processor::http::build_router;
use receipt_processor::queue::amqp::AmqpBroker;
use receipt_processor::queue::memory::MemoryBroker;
use receipt_processor::queue::monitor::DepthMonitor;
use receipt_processor::queue::Broker;
use receipt_processor::{
    BrokerKind, Config, Consumer, IntakeService, ReceiptIndex, ReceiptSubmission, ScoringEngine,
    SledStore,
};
use std::future::Future;
use std::process;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Intake,
    Consumer,
    All,
}

impl Mode {
    fn parse(value: &str) -> Self {
        match value {
            "intake" => Mode::Intake,
            "consumer" => Mode::Consumer,
            _ => Mode::All,
        }
    }

    fn runs_intake(self) -> bool {
        matches!(self, Mode::Intake | Mode::All)
    }

    fn runs_consumer(self) -> bool {
        matches!(self, Mode::Consumer | Mode::All)
    }
}

#[tokio::main]
async fn main() {
    let matches = Command::new("receipt-processor")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Receipt intake, durable storage and points scoring service")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("receipt-processor.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Test configuration validity")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("mode")
                .long("mode")
                .value_name("MODE")
                .help("Which side of the pipeline to run")
                .value_parser(["intake", "consumer", "all"])
                .default_value("all"),
        )
        .arg(
            Arg::new("score")
                .long("score")
                .value_name("FILE")
                .help("Validate and score a receipt JSON file, then exit")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    if let Some(receipt_file) = matches.get_one::<String>("score") {
        if let Err(e) = score_file(receipt_file) {
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("receipt-processor.yaml");

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e:#}");
            process::exit(1);
        }
    };

    if matches.get_flag("test-config") {
        println!("🔍 Testing configuration...");
        println!();
        match config.validate() {
            Ok(()) => {
                print_config_summary(&config);
                println!("✅ Configuration is valid");
            }
            Err(e) => {
                println!("❌ Configuration validation failed:");
                println!("Error: {e:#}");
                process::exit(1);
            }
        }
        return;
    }

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e:#}");
        process::exit(1);
    }

    let mode = Mode::parse(
        matches
            .get_one::<String>("mode")
            .map(String::as_str)
            .unwrap_or("all"),
    );

    if let Err(e) = run(config, mode).await {
        log::error!("{e:#}");
        process::exit(1);
    }
}

async fn run(config: Config, mode: Mode) -> anyhow::Result<()> {
    if config.broker.kind == BrokerKind::Memory && mode != Mode::All {
        bail!("the memory broker requires --mode all");
    }

    log::info!("Starting receipt-processor ({mode:?})...");

    let store = SledStore::open(&config.store.path)
        .with_context(|| format!("Failed to open store at {}", config.store.path))?;

    let index = if mode.runs_intake() {
        let index = ReceiptIndex::load_from_store(&store)
            .await
            .context("Failed to load receipts from the store")?;
        Some(index)
    } else {
        None
    };

    // sled locks the database per process, so intake alone lets go of it
    let store = if mode.runs_consumer() {
        Some(Arc::new(store))
    } else {
        drop(store);
        None
    };

    let broker = connect_broker(&config).await?;

    let monitor = DepthMonitor::new(
        broker.clone(),
        &config.broker.intake_queue,
        config.broker.depth_watermark,
    );
    monitor.check().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    tokio::spawn(forward_ctrl_c(tokio::signal::ctrl_c(), shutdown_tx.clone()));

    tokio::spawn(monitor.run(
        config.depth_check_interval(),
        shutdown_signal(&shutdown_rx),
    ));

    let consumer_task = match store {
        Some(store) => {
            let deliveries = broker
                .subscribe(&config.broker.intake_queue)
                .await
                .context("Failed to subscribe to the intake queue")?;
            let consumer = Consumer::new(store, broker.clone(), config.consumer_settings());
            let signal = shutdown_signal(&shutdown_rx);
            let stop_all = shutdown_tx.clone();
            Some(tokio::spawn(async move {
                let result = consumer.run(deliveries, signal).await;
                if let Err(e) = &result {
                    log::error!("Consumer failed: {e}");
                }
                stop_all.send_replace(true);
                result
            }))
        }
        None => None,
    };

    if let Some(index) = index {
        let intake = Arc::new(IntakeService::new(
            index,
            broker.clone(),
            &config.broker.intake_queue,
            config.publish_timeout(),
        ));
        let router = build_router(intake.clone(), config.server.max_body_bytes);

        let addr = config.bind_address()?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        log::info!("Listening on {addr}");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal(&shutdown_rx))
            .await
            .context("HTTP server failed")?;
        log::info!("HTTP server stopped");

        // Each publish is bounded by the publish timeout on its own
        intake.drain_publishes(config.publish_timeout() * 2).await;
    }

    if let Some(task) = consumer_task {
        task.await
            .context("Consumer task panicked")?
            .context("Consumer stopped with an error")?;
    }

    Ok(())
}

async fn connect_broker(config: &Config) -> anyhow::Result<Arc<dyn Broker>> {
    let queues = [
        config.broker.intake_queue.as_str(),
        config.broker.dead_letter_queue.as_str(),
    ];
    match config.broker.kind {
        BrokerKind::Amqp => {
            let broker = AmqpBroker::connect(&config.broker.url, &queues, config.broker.durable)
                .await
                .context("Failed to connect to the message broker")?;
            Ok(Arc::new(broker))
        }
        BrokerKind::Memory => {
            log::warn!("Using the in-memory broker: queued receipts are lost on exit");
            Ok(Arc::new(MemoryBroker::with_queues(&queues)))
        }
    }
}

/// Flip the shutdown flag once `signal` fires. If the signal cannot be
/// listened for, the service keeps running.
async fn forward_ctrl_c(
    signal: impl Future<Output = std::io::Result<()>>,
    shutdown: Arc<watch::Sender<bool>>,
) {
    match signal.await {
        Ok(()) => {
            log::info!("Received shutdown signal, stopping...");
            shutdown.send_replace(true);
        }
        Err(e) => log::error!("Failed to listen for shutdown signal, Ctrl-C is disabled: {e}"),
    }
}

fn shutdown_signal(rx: &watch::Receiver<bool>) -> impl Future<Output = ()> {
    let mut rx = rx.clone();
    async move {
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file(path)
    } else {
        log::warn!("Configuration file '{path}' not found, using default configuration");
        Ok(Config::default())
    }
}

fn generate_default_config(path: &str) {
    let config = Config::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}

fn print_config_summary(config: &Config) {
    println!("Bind address: {}", config.server.bind_address);
    println!("Broker: {:?}", config.broker.kind);
    println!(
        "Queues: {} (dead-letter: {})",
        config.broker.intake_queue, config.broker.dead_letter_queue
    );
    println!("Store path: {}", config.store.path);
    println!(
        "Commit attempts per message: {}",
        config.consumer.max_attempts
    );
}

fn score_file(path: &str) -> anyhow::Result<()> {
    let payload =
        std::fs::read(path).with_context(|| format!("Failed to read receipt file {path}"))?;
    let submission = ReceiptSubmission::from_json(&payload)
        .with_context(|| format!("{path} is not a receipt"))?;
    submission.validate().context("Receipt is invalid")?;

    let receipt = submission.into_receipt(String::new());
    let breakdown = ScoringEngine::new()
        .evaluate(&receipt)
        .context("Receipt could not be scored")?;

    println!("🧾 {} ({} {})", receipt.retailer, receipt.purchase_date, receipt.purchase_time);
    println!();
    for rule in &breakdown.scores {
        println!("  {:<20} {:>5}", rule.rule_name, rule.points);
    }
    println!("  {:<20} {:>5}", "Total", breakdown.total_points);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ctrl_c_triggers_shutdown() {
        let (tx, rx) = watch::channel(false);
        forward_ctrl_c(async { Ok(()) }, Arc::new(tx)).await;
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn test_signal_listener_failure_keeps_running() {
        let (tx, rx) = watch::channel(false);
        let failed = async { Err(std::io::Error::other("no signal support")) };
        forward_ctrl_c(failed, Arc::new(tx)).await;
        assert!(!*rx.borrow());
    }

    #[test]
    fn test_mode_parsing() {
        assert!(Mode::parse("intake").runs_intake());
        assert!(!Mode::parse("intake").runs_consumer());
        assert!(Mode::parse("consumer").runs_consumer());
        assert!(Mode::parse("all").runs_intake() && Mode::parse("all").runs_consumer());
    }
}
