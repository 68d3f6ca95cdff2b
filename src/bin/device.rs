use clap::{App, Arg, ArgMatches};
use colored::*;
use pinlink::config::RuntimeConfig;
use pinlink::{
    DeviceRuntime, FileStorage, LoopbackTransport, MemoryStorage, Outbox, Storage, SystemClock,
    Transport, Value,
};
use std::time::{Duration, Instant};
use tokio::time;
use tracing::{error, info, warn};

const DEFAULT_TICK_MS: &str = "10";
const DEFAULT_RECONNECT_MS: &str = "5000";
const SENSOR_PERIOD_MS: u64 = 5000;

const LED_PIN: usize = 0;
const SETTINGS_PIN: usize = 1;
const TEMPERATURE_PIN: usize = 2;
const UPTIME_PIN: usize = 3;

type HostRuntime = DeviceRuntime<Box<dyn Transport>, Box<dyn Storage>, SystemClock>;

enum Exit {
    Shutdown,
    Reboot,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("pinlink-device")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Virtual-pin device runtime host")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON runtime configuration")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("device-id")
                .short("d")
                .long("device-id")
                .value_name("ID")
                .help("Device identity used in topics and as client id")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("token")
                .short("t")
                .long("token")
                .value_name("TOKEN")
                .help("Authentication token")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("server")
                .short("s")
                .long("server")
                .value_name("HOST")
                .help("Broker host")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Broker port")
                .takes_value(true)
                .validator(|v| match v.parse::<u16>() {
                    Ok(port) if port > 0 => Ok(()),
                    _ => Err("Port must be between 1 and 65535".into()),
                }),
        )
        .arg(Arg::with_name("secure").long("secure").help("Use TLS"))
        .arg(
            Arg::with_name("heartbeat")
                .long("heartbeat")
                .value_name("MS")
                .help("Heartbeat interval in milliseconds (0 disables)")
                .takes_value(true)
                .validator(validate_number),
        )
        .arg(
            Arg::with_name("transport")
                .long("transport")
                .value_name("KIND")
                .help("Transport backend")
                .takes_value(true)
                .possible_values(&["loopback", "mqtt"])
                .default_value("loopback"),
        )
        .arg(
            Arg::with_name("storage")
                .long("storage")
                .value_name("FILE")
                .help("Persist device storage to this JSON file (in-memory otherwise)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("tick")
                .long("tick")
                .value_name("MS")
                .help("Run loop period in milliseconds")
                .takes_value(true)
                .default_value(DEFAULT_TICK_MS)
                .validator(validate_number),
        )
        .arg(
            Arg::with_name("reconnect")
                .long("reconnect")
                .value_name("MS")
                .help("Delay between connection attempts in milliseconds")
                .takes_value(true)
                .default_value(DEFAULT_RECONNECT_MS)
                .validator(validate_number),
        )
        .arg(
            Arg::with_name("demo")
                .long("demo")
                .help("Feed scripted cloud traffic through the loopback transport"),
        )
        .get_matches();

    let config = build_config(&matches)?;
    let tick = Duration::from_millis(parse_number(&matches, "tick"));
    let reconnect = Duration::from_millis(parse_number(&matches, "reconnect"));

    println!("{}", "pinlink device runtime".bold().cyan());
    println!("   Device:    {}", config.device_id.green());
    println!("   Broker:    {}:{}", config.server, config.port);
    println!("   Heartbeat: {} ms", config.heartbeat_interval_ms);

    loop {
        let mut runtime = boot(&matches, config.clone())?;
        match run(&mut runtime, tick, reconnect).await {
            Exit::Shutdown => {
                runtime.disconnect();
                break;
            }
            Exit::Reboot => {
                runtime.disconnect();
                println!("{}", "rebooting...".yellow());
            }
        }
    }

    println!("{}", "stopped".bold());
    Ok(())
}

fn validate_number(value: String) -> Result<(), String> {
    value
        .parse::<u64>()
        .map(|_| ())
        .map_err(|_| "Value must be a non-negative integer".to_string())
}

fn parse_number(matches: &ArgMatches<'_>, name: &str) -> u64 {
    matches
        .value_of(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or_default()
}

fn build_config(matches: &ArgMatches<'_>) -> Result<RuntimeConfig, Box<dyn std::error::Error>> {
    let mut config = match matches.value_of("config") {
        Some(path) => RuntimeConfig::from_file(path)?,
        None => RuntimeConfig::new("pinlink-dev", ""),
    };

    if let Some(device_id) = matches.value_of("device-id") {
        config.device_id = device_id.to_string();
    }
    if let Some(token) = matches.value_of("token") {
        config.auth_token = token.to_string();
    }
    if let Some(server) = matches.value_of("server") {
        config.server = server.to_string();
    }
    if let Some(port) = matches.value_of("port") {
        config.port = port.parse()?;
    }
    if matches.is_present("secure") {
        config.secure = true;
    }
    if matches.is_present("heartbeat") {
        config.heartbeat_interval_ms = parse_number(matches, "heartbeat");
    }

    config.validate()?;
    Ok(config)
}

/// Construct a fresh runtime, as a device does on power-up.
fn boot(matches: &ArgMatches<'_>, config: RuntimeConfig) -> Result<HostRuntime, Box<dyn std::error::Error>> {
    let storage: Box<dyn Storage> = match matches.value_of("storage") {
        Some(path) => Box::new(FileStorage::open(path)?),
        None => Box::new(MemoryStorage::new()),
    };

    let loopback = LoopbackTransport::new();
    let transport: Box<dyn Transport> = match matches.value_of("transport") {
        Some("mqtt") => mqtt_transport()?,
        _ => Box::new(loopback.clone()),
    };

    let mut runtime = DeviceRuntime::new(config, transport, storage, SystemClock::new())?;
    install_handlers(&mut runtime)?;

    if matches.is_present("demo") {
        script_demo_traffic(&loopback, runtime.topics().prefix());
    }
    Ok(runtime)
}

#[cfg(feature = "mqtt")]
fn mqtt_transport() -> Result<Box<dyn Transport>, Box<dyn std::error::Error>> {
    Ok(Box::new(pinlink::transport::mqtt::MqttTransport::new()))
}

#[cfg(not(feature = "mqtt"))]
fn mqtt_transport() -> Result<Box<dyn Transport>, Box<dyn std::error::Error>> {
    Err("built without the `mqtt` feature".into())
}

fn install_handlers(runtime: &mut HostRuntime) -> Result<(), Box<dyn std::error::Error>> {
    runtime.attach_virtual(LED_PIN, |value: &Value, outbox: &mut Outbox| {
        let on = value.as_bool();
        info!(on, "LED");
        outbox.virtual_write(LED_PIN, u8::from(on));
    });

    runtime.attach_virtual(SETTINGS_PIN, |value: &Value, _: &mut Outbox| {
        let mode = value.get("mode");
        let level = value.get("level").as_int();
        match serde_json::to_string(value) {
            Ok(json) => info!(mode = mode.as_str(), level, "settings: {}", json),
            Err(e) => warn!("settings not serializable: {}", e),
        }
    });

    let started = Instant::now();
    runtime.attach_virtual_read(UPTIME_PIN, move |_: &Value, outbox: &mut Outbox| {
        outbox.virtual_write(UPTIME_PIN, started.elapsed().as_secs());
    });

    let mut reading: f64 = 21.0;
    runtime.set_timer(SENSOR_PERIOD_MS, move |outbox: &mut Outbox| {
        reading = if reading > 24.0 { 21.0 } else { reading + 0.5 };
        outbox.send_sensor(TEMPERATURE_PIN, reading);
    })?;

    runtime.on_connected(|| info!("{}", "cloud connected".green()));
    runtime.on_disconnected(|| warn!("{}", "cloud disconnected".red()));
    runtime.on_event(|name: &str, value: &Value| {
        info!(command = name, payload = value.as_str(), "system command");
    });
    Ok(())
}

fn script_demo_traffic(loopback: &LoopbackTransport, prefix: &str) {
    let messages: [(&str, &[u8]); 6] = [
        ("virtual-write/0", b"1"),
        ("virtual-write/1", br#"{"mode":"eco","level":3}"#),
        ("virtual-read/0", b""),
        ("virtual-read/3", b""),
        ("system/ping", b""),
        ("system/info", b""),
    ];
    for (suffix, payload) in messages {
        loopback.inject(&format!("{prefix}/{suffix}"), payload);
    }
}

async fn run(runtime: &mut HostRuntime, tick: Duration, reconnect: Duration) -> Exit {
    let mut interval = time::interval(tick.max(Duration::from_millis(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut last_attempt: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("signal handler failed: {}", e);
                }
                return Exit::Shutdown;
            }
        }

        // Retry policy lives here, not in the runtime.
        if !runtime.is_connected() && last_attempt.map_or(true, |at| at.elapsed() >= reconnect) {
            last_attempt = Some(Instant::now());
            if !runtime.connect() {
                warn!("connect failed, retrying in {:?}", reconnect);
            }
        }

        runtime.tick();

        if runtime.take_reboot_request() {
            info!(stats = ?runtime.stats(), "reboot");
            return Exit::Reboot;
        }
    }
}
