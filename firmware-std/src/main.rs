//! esplink: ESP-IDF std host firmware
//!
//! Runs on an ESP32-S3 and drives an ESP8266 companion wired to UART1
//! (TX GPIO43, RX GPIO44). Brings the module up, joins the network named by
//! the `WIFI_SSID`/`WIFI_PASS` build environment, lists nearby access points
//! as NDJSON, then serves a TCP port and advertises it with the UDP beacon.

use std::time::{Duration, Instant};

use esp_idf_svc::hal::delay::NON_BLOCK;
use esp_idf_svc::hal::gpio::AnyIOPin;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::hal::uart::{config, UartDriver};
use esp_idf_svc::hal::units::Hertz;
use esp_idf_svc::sys::EspError;

use esplink::protocol::{self, COMMAND_TIMEOUT_MS};
use esplink::{AccessPoint, Callbacks, Clock, Config, DebugLevel, Esp8266, Transport, WifiMode};

const SSID: &str = match option_env!("WIFI_SSID") {
    Some(s) => s,
    None => "esplink",
};
const PASSWORD: &str = match option_env!("WIFI_PASS") {
    Some(s) => s,
    None => "",
};

const SERVER_PORT: u16 = 8080;
const DEVICE_NAME: &str = "esplink-std";
const MAX_SCAN: usize = 16;

// ── Platform seams ───────────────────────────────────────────────────

struct Uart(UartDriver<'static>);

impl Transport for Uart {
    type Error = EspError;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, EspError> {
        self.0.read(buf, NON_BLOCK)
    }

    fn write(&mut self, mut data: &[u8]) -> Result<(), EspError> {
        while !data.is_empty() {
            let n = self.0.write(data)?;
            data = &data[n..];
        }
        Ok(())
    }
}

struct Uptime(Instant);

impl Clock for Uptime {
    fn now_ms(&self) -> u64 {
        self.0.elapsed().as_millis() as u64
    }
}

fn main() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    // Bind the ESP-IDF logger to the `log` facade
    esp_idf_svc::log::EspLogger::initialize_default();

    let peripherals = Peripherals::take()?;
    let driver_config = Config::default()
        .with_mode(WifiMode::Station)
        .with_baud(115_200)
        .with_debug(DebugLevel::Errors);

    let uart = UartDriver::new(
        peripherals.uart1,
        peripherals.pins.gpio43,
        peripherals.pins.gpio44,
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &config::Config::default().baudrate(Hertz(driver_config.baud)),
    )?;

    let mut handler = Callbacks::new(
        |channel, payload: &[u8]| {
            log::info!("link {}: {} bytes", channel, payload.len());
            0
        },
        || log::info!("peer connected"),
    );

    let mut wifi = Esp8266::new(Uart(uart), Uptime(Instant::now()), driver_config);

    wifi.initialize(&mut handler)
        .map_err(|e| anyhow::anyhow!("module bring-up: {e}"))?;
    log::info!("module ready ({:?})", wifi.state());

    report_scan(&mut wifi);

    wifi.connect(SSID, PASSWORD)
        .map_err(|e| anyhow::anyhow!("join {SSID}: {e}"))?;
    let ip = wifi
        .current_ip()
        .map_err(|e| anyhow::anyhow!("address query: {e}"))?;
    log::info!("joined {} as {}", SSID, ip);

    wifi.start_server(SERVER_PORT, COMMAND_TIMEOUT_MS)
        .map_err(|e| anyhow::anyhow!("listen on {SERVER_PORT}: {e}"))?;
    if let Err(e) = wifi.enable_beacon(DEVICE_NAME) {
        log::warn!("beacon unavailable: {}", e);
    }

    loop {
        if let Err(e) = wifi.poll() {
            log::warn!("poll: {}", e);
        }
        if let Err(e) = wifi.service_beacon() {
            log::warn!("beacon: {}", e);
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Print one JSON line per visible access point.
fn report_scan<T: Transport, C: Clock>(wifi: &mut Esp8266<'_, T, C>) {
    let mut found: [AccessPoint; MAX_SCAN] = core::array::from_fn(|_| AccessPoint::default());
    let count = match wifi.scan(&mut found, MAX_SCAN) {
        Ok(count) => count,
        Err(e) => {
            log::warn!("scan: {}", e);
            return;
        }
    };
    if count.truncated {
        log::warn!("scan: more than {} access points, list truncated", MAX_SCAN);
    }

    let mut buf = [0u8; 160];
    for ap in &found[..count.written] {
        if let Some(len) = protocol::encode_json(ap, &mut buf) {
            println!("{}", core::str::from_utf8(&buf[..len]).unwrap_or_default());
        }
    }
}
