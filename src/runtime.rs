// 1 kHz chassis control loop
//
// Tasks:
// - control loop (this function): drain inputs, run one controller tick, send frames
// - feedback thread: blocking serial reads, decoded into the shared motor state
// - telemetry task: publishes decimated snapshots and health
// - cue task: hands feedback cues to whoever plays them (20 Hz)
//
// The control loop never awaits the other tasks: telemetry goes through a
// bounded channel with try_send, cues through a single atomic slot.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::chassis::{ChassisController, RemoteInput};
use crate::clock::Clock;
use crate::config::ChassisConfig;
use crate::cue::{CueSlot, FeedbackCue};
use crate::messages::{ChassisSnapshot, PowerBudget, RemoteSample, RuntimeHealth};
use crate::motor::{
    FeedbackDispatcher, FrameSink, MotorCodec, NullSink, SlcanBus, SlcanRx, motor_link,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const TELEMETRY_QUEUE: usize = 8;
const CUE_PERIOD: Duration = Duration::from_millis(50);
const RX_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Latest values received from the outside world
#[derive(Debug, Default)]
pub struct Inputs {
    remote: Option<RemoteInput>,
    budget: PowerBudget,
}

impl Inputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process an incoming remote sample, stamped with its arrival time
    pub fn on_remote(&mut self, payload: &[u8], now_ms: u64) {
        match serde_json::from_slice::<RemoteSample>(payload) {
            Ok(sample) => {
                self.remote = Some(RemoteInput {
                    sample,
                    received_at_ms: now_ms,
                });
            }
            Err(e) => warn!("Failed to parse remote sample: {}", e),
        }
    }

    /// Process an incoming power budget; keeps the previous one on error
    pub fn on_power(&mut self, payload: &[u8]) {
        match serde_json::from_slice::<PowerBudget>(payload) {
            Ok(budget) => self.budget = budget,
            Err(e) => warn!("Failed to parse power budget: {}", e),
        }
    }

    pub fn remote(&self) -> Option<&RemoteInput> {
        self.remote.as_ref()
    }

    pub fn budget(&self) -> &PowerBudget {
        &self.budget
    }
}

/// Blocking receive loop for the fieldbus adapter
fn receive_loop(
    mut rx: SlcanRx,
    dispatcher: FeedbackDispatcher,
    clock: Clock,
    running: Arc<AtomicBool>,
) {
    let mut healthy = true;
    while running.load(Ordering::Relaxed) {
        match rx.recv() {
            Ok(Some(frame)) => {
                if !healthy {
                    info!("Fieldbus receive recovered");
                    healthy = true;
                }
                if let Err(e) = dispatcher.on_frame(&frame, clock.now_ms()) {
                    debug!("Dropping frame: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => {
                if healthy {
                    warn!("Fieldbus receive failed: {}", e);
                    healthy = false;
                }
                std::thread::sleep(RX_ERROR_BACKOFF);
            }
        }
    }
}

fn spawn_receiver(
    rx: SlcanRx,
    dispatcher: FeedbackDispatcher,
    clock: Clock,
    running: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("fieldbus-rx".into())
        .spawn(move || receive_loop(rx, dispatcher, clock, running))
}

async fn publish_telemetry(
    mut snapshots: mpsc::Receiver<ChassisSnapshot>,
    pub_snapshot: zenoh::pubsub::Publisher<'static>,
    pub_health: zenoh::pubsub::Publisher<'static>,
) {
    let mut last_health = None;
    while let Some(snapshot) = snapshots.recv().await {
        let health = RuntimeHealth::from(&snapshot);
        if last_health != Some(health) {
            info!("Runtime health: {:?}", health);
            last_health = Some(health);
        }

        let result: Result<(), BoxError> = async {
            pub_snapshot.put(serde_json::to_string(&snapshot)?).await?;
            pub_health.put(serde_json::to_string(&health)?).await?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            debug!("Failed to publish telemetry: {}", e);
        }
    }
}

async fn publish_cues(cues: Arc<CueSlot>, publisher: zenoh::pubsub::Publisher<'static>) {
    let mut tick = interval(CUE_PERIOD);
    loop {
        tick.tick().await;
        let Some(cue) = cues.take() else {
            continue;
        };
        debug!("Cue: {:?}", cue);
        let result: Result<(), BoxError> = async {
            publisher.put(serde_json::to_string(&cue)?).await?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            warn!("Failed to publish cue: {}", e);
        }
    }
}

/// Run the chassis until Ctrl-C
///
/// # Arguments
/// * `config` - validated configuration
/// * `dry_run` - discard outbound frames and skip the fieldbus adapter
pub async fn run(config: ChassisConfig, dry_run: bool) -> Result<(), BoxError> {
    config.validate()?;
    let rt = config.runtime.clone();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_remote = session.declare_subscriber(rt.topic_remote.clone()).await?;
    let sub_power = session.declare_subscriber(rt.topic_power.clone()).await?;
    let pub_snapshot = session.declare_publisher(rt.topic_snapshot.clone()).await?;
    let pub_health = session.declare_publisher(rt.topic_health.clone()).await?;
    let pub_cue = session.declare_publisher(rt.topic_cue.clone()).await?;

    let clock = Clock::start();
    let codec = MotorCodec::new(config.link);

    let (sink, bus_rx): (Box<dyn FrameSink + Send>, Option<SlcanRx>) =
        if dry_run || !config.bus.enabled {
            warn!("Fieldbus disabled: frames are discarded and wheels read stale");
            (Box::new(NullSink), None)
        } else {
            let bus = SlcanBus::open_with_baudrate(&config.bus.port, config.bus.baudrate)?;
            let (tx, rx) = bus.split()?;
            (Box::new(tx), Some(rx))
        };

    let (link, dispatcher) = motor_link(sink, codec, config.link.stale_window_ms);
    let running = Arc::new(AtomicBool::new(true));
    let receiver = match bus_rx {
        Some(rx) => Some(spawn_receiver(rx, dispatcher, clock, running.clone())?),
        None => None,
    };

    let cues = Arc::new(CueSlot::new());
    cues.request(FeedbackCue::Startup);
    let mut controller = ChassisController::new(&config, link, cues.clone());

    let (telemetry_tx, telemetry_rx) = mpsc::channel(TELEMETRY_QUEUE);
    let telemetry = tokio::spawn(publish_telemetry(telemetry_rx, pub_snapshot, pub_health));
    let cue_task = tokio::spawn(publish_cues(cues, pub_cue));

    let mut inputs = Inputs::new();
    let mut tick = interval(Duration::from_micros(1_000_000 / rt.loop_hz as u64));
    // A late tick is dropped, never replayed in a burst
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let divider = rt.telemetry_divider as u64;

    info!(
        "Runtime started: {}Hz loop, {}ms remote timeout, {}ms feedback window",
        rt.loop_hz, config.arbiter.liveness_timeout_ms, config.link.stale_window_ms
    );
    info!("Subscribed to: {}, {}", rt.topic_remote, rt.topic_power);
    info!(
        "Publishing to: {}, {}, {}",
        rt.topic_snapshot, rt.topic_health, rt.topic_cue
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Shutting down");
                break;
            }
            _ = tick.tick() => {}
        }

        let now = clock.now_ms();

        // 1. Drain all pending inputs (non-blocking), keep latest
        while let Ok(Some(sample)) = sub_remote.try_recv() {
            let payload = sample.payload().to_bytes();
            inputs.on_remote(&payload, now);
        }
        while let Ok(Some(sample)) = sub_power.try_recv() {
            let payload = sample.payload().to_bytes();
            inputs.on_power(&payload);
        }

        // 2. One control tick (arbiter, regulators, governor, frames out)
        let snapshot = *controller.tick(now, inputs.remote(), inputs.budget());

        // 3. Hand a decimated snapshot to telemetry, never waiting on it
        if snapshot.tick % divider == 0 && telemetry_tx.try_send(snapshot).is_err() {
            debug!("Telemetry queue full, dropping snapshot {}", snapshot.tick);
        }
    }

    if let Err(e) = controller.stop() {
        warn!("Failed to stop motors: {}", e);
    }
    running.store(false, Ordering::Relaxed);
    if let Some(handle) = receiver {
        if handle.join().is_err() {
            warn!("Fieldbus receive thread panicked");
        }
    }
    telemetry.abort();
    cue_task.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::SwitchPosition;

    #[test]
    fn remote_sample_is_stamped_on_arrival() {
        let mut inputs = Inputs::new();
        assert!(inputs.remote().is_none());

        let json = r#"{"ch_lh":0.0,"ch_lv":0.5,"ch_rh":0.0,"ch_rv":0.0,"sw_l":"mid","sw_r":"down"}"#;
        inputs.on_remote(json.as_bytes(), 1234);

        let remote = inputs.remote().unwrap();
        assert_eq!(remote.received_at_ms, 1234);
        assert_eq!(remote.sample.ch_lv, 0.5);
        assert_eq!(remote.sample.sw_r, SwitchPosition::Down);
    }

    #[test]
    fn malformed_remote_keeps_previous_stamp() {
        let mut inputs = Inputs::new();
        let json = r#"{"ch_lh":0,"ch_lv":0,"ch_rh":0,"ch_rv":0,"sw_l":"up","sw_r":"mid"}"#;
        inputs.on_remote(json.as_bytes(), 10);
        inputs.on_remote(b"not json", 20);
        assert_eq!(inputs.remote().unwrap().received_at_ms, 10);
    }

    #[test]
    fn power_budget_defaults_output_flag() {
        let mut inputs = Inputs::new();
        assert_eq!(inputs.budget().limit_watts, 0.0);

        inputs.on_power(br#"{"limit_watts":60.0,"buffered_energy_joules":55.5}"#);
        assert_eq!(inputs.budget().limit_watts, 60.0);
        assert!(inputs.budget().chassis_output);

        inputs.on_power(br#"{"limit_watts":"lots"}"#);
        assert_eq!(inputs.budget().limit_watts, 60.0);
    }
}
